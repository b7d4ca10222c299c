//! RDT Hunt Client
//!
//! Usage: `rdt-hunt-client <name> [local_port]`
//!
//! Connects to `RDT_SERVER` (default `127.0.0.1:12345`), logs in, then relays
//! stdin lines as commands and prints every notice the server sends.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::{bail, Context};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rdt_hunt::network::client::Client;
use rdt_hunt::ServerConfig;

/// How often the relay loop checks for typed commands.
const POLL: Duration = Duration::from_millis(100);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .init();

    let mut args = std::env::args().skip(1);
    let Some(name) = args.next() else {
        bail!("usage: rdt-hunt-client <name> [local_port]");
    };
    let local_port: u16 = match args.next() {
        Some(port) => port.parse().with_context(|| format!("invalid port {port}"))?,
        None => 0,
    };

    let server: SocketAddr = match std::env::var("RDT_SERVER") {
        Ok(addr) => addr.parse().with_context(|| format!("invalid RDT_SERVER {addr}"))?,
        Err(_) => ServerConfig::default().bind_addr,
    };
    // Same ARQ settings as the server, including simulated loss.
    let arq = ServerConfig::default().overlay_env().context("reading environment")?.arq;

    let bind = SocketAddr::from(([127, 0, 0, 1], local_port));
    let mut client = Client::connect(bind, server, &arq).await.context("opening socket")?;
    println!("Local port: {}", client.local_addr().port());

    client.login(&name).await.context("login failed")?;
    println!("Logged in as {name}. Waiting for the game to start...");

    let (tx, mut lines) = mpsc::channel::<String>(16);
    tokio::spawn(async move {
        let mut stdin = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = stdin.next_line().await {
            if tx.send(line).await.is_err() {
                break;
            }
        }
    });

    loop {
        // Commands go out between receives so a recv is never cut short.
        loop {
            match lines.try_recv() {
                Ok(line) => {
                    let line = line.trim().to_string();
                    if line.is_empty() {
                        continue;
                    }
                    if let Err(e) = client.send(&line).await {
                        warn!("Command not delivered: {}", e);
                        println!("Command not delivered, try again.");
                    }
                    if line.eq_ignore_ascii_case("logout") {
                        // Read the farewell before leaving.
                        if let Ok(Some(text)) = client.recv(Some(Duration::from_secs(2))).await {
                            println!("[Server]: {text}");
                        }
                        return Ok(());
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => break,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    info!("stdin closed");
                    return Ok(());
                }
            }
        }

        match client.recv(Some(POLL)).await {
            Ok(Some(text)) => println!("[Server]: {text}"),
            Ok(None) => {}
            Err(e) => {
                println!("Connection lost: {e}");
                return Ok(());
            }
        }
    }
}
