//! Simulated packet loss.
//!
//! Models an unreliable link by dropping outbound transmission attempts
//! before they reach the socket. Production deployments run with a
//! probability of zero.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Decides, per transmission attempt, whether the attempt is dropped.
#[derive(Debug, Clone, Default)]
pub enum LossModel {
    /// Every attempt reaches the socket.
    #[default]
    Never,
    /// Each attempt is dropped independently with `probability`.
    Random {
        /// Drop probability in [0.0, 1.0].
        probability: f64,
        /// Source of randomness.
        rng: StdRng,
    },
    /// Drops follow a fixed script; once exhausted nothing is dropped.
    Scripted(VecDeque<bool>),
}

impl LossModel {
    /// Build the model described by an ARQ configuration.
    ///
    /// A probability of zero (or below) yields [`LossModel::Never`]. A seed
    /// makes the drop pattern reproducible.
    pub fn from_probability(probability: f64, seed: Option<u64>) -> Self {
        if probability <= 0.0 {
            return LossModel::Never;
        }

        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        LossModel::Random {
            probability: probability.min(1.0),
            rng,
        }
    }

    /// Drop exactly the attempts marked `true`, in order.
    pub fn scripted(drops: impl IntoIterator<Item = bool>) -> Self {
        LossModel::Scripted(drops.into_iter().collect())
    }

    /// Consult the model for the next attempt.
    pub fn should_drop(&mut self) -> bool {
        match self {
            LossModel::Never => false,
            LossModel::Random { probability, rng } => rng.gen::<f64>() < *probability,
            LossModel::Scripted(script) => script.pop_front().unwrap_or(false),
        }
    }
}
