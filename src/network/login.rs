//! Login Handshake
//!
//! Checks `login <name>` requests from unregistered endpoints against an
//! optional contact book. The server does not manage accounts; contacts are
//! supplied by configuration.

use std::collections::BTreeMap;
use std::net::SocketAddr;

/// Usage hint sent in reply to an empty login request.
pub const LOGIN_PROMPT: &str = "Type: login <name>";

/// Reply sent once a login succeeds.
pub const LOGIN_OK: &str = "you are online!";

/// Reasons a login is refused. The display text is the reply sent back.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LoginError {
    /// Empty request.
    #[error("{}", LOGIN_PROMPT)]
    Usage,

    /// Something other than `login`.
    #[error("Invalid command. Use: login <name>")]
    NotALogin,

    /// `login` without a name.
    #[error("Correct format: login <name>")]
    MissingName,

    /// Name not present in the contact book.
    #[error("User {0} is not in the contact list!")]
    NotAContact(String),

    /// Contact is pinned to a different endpoint.
    #[error("User {0} must log in from its registered address!")]
    EndpointMismatch(String),

    /// Name already logged in.
    #[error("User {0} is already online!")]
    AlreadyOnline(String),
}

/// Malformed contact list.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ContactError {
    /// Entry with an empty name.
    #[error("Contact entry without a name: {0:?}")]
    MissingName(String),

    /// Endpoint that is not `ip:port`.
    #[error("Invalid endpoint for contact {name}: {value}")]
    InvalidEndpoint {
        /// Contact name.
        name: String,
        /// Unparseable text.
        value: String,
    },
}

/// One allowed user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    /// Login name.
    pub name: String,
    /// Endpoint the user must log in from, if pinned.
    pub endpoint: Option<SocketAddr>,
}

/// Allow-list of login names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactBook {
    contacts: BTreeMap<String, Contact>,
}

impl ContactBook {
    /// Create an empty book.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse entries separated by newlines or commas.
    ///
    /// Each entry is `name;ip:port` or a bare `name`. Blank entries and
    /// lines starting with `#` are skipped.
    pub fn parse(text: &str) -> Result<Self, ContactError> {
        let mut book = Self::new();

        for entry in text.split(['\n', ',']).map(str::trim) {
            if entry.is_empty() || entry.starts_with('#') {
                continue;
            }

            let (name, endpoint) = match entry.split_once(';') {
                Some((name, addr)) => (name.trim(), Some(addr.trim())),
                None => (entry, None),
            };

            if name.is_empty() {
                return Err(ContactError::MissingName(entry.to_string()));
            }

            let endpoint = match endpoint {
                Some(addr) => Some(addr.parse().map_err(|_| ContactError::InvalidEndpoint {
                    name: name.to_string(),
                    value: addr.to_string(),
                })?),
                None => None,
            };

            book.insert(Contact {
                name: name.to_string(),
                endpoint,
            });
        }

        Ok(book)
    }

    /// Add or replace a contact.
    pub fn insert(&mut self, contact: Contact) {
        self.contacts.insert(contact.name.clone(), contact);
    }

    /// Look up a contact.
    pub fn get(&self, name: &str) -> Option<&Contact> {
        self.contacts.get(name)
    }

    /// Whether `name` is a contact.
    pub fn contains(&self, name: &str) -> bool {
        self.contacts.contains_key(name)
    }

    /// Number of contacts.
    pub fn len(&self) -> usize {
        self.contacts.len()
    }

    /// Whether the book is empty.
    pub fn is_empty(&self) -> bool {
        self.contacts.is_empty()
    }
}

/// Extract the name from a `login <name>` request.
pub fn parse_login(text: &str) -> Result<String, LoginError> {
    let mut words = text.split_whitespace();

    match words.next() {
        None => Err(LoginError::Usage),
        Some(word) if !word.eq_ignore_ascii_case("login") => Err(LoginError::NotALogin),
        Some(_) => words
            .next()
            .map(str::to_string)
            .ok_or(LoginError::MissingName),
    }
}

/// Check a name against the contact book.
///
/// Without a book every name is allowed. Whether the name is already online
/// is decided by the caller, which owns the peer table.
pub fn authorize(contacts: Option<&ContactBook>, name: &str, endpoint: SocketAddr) -> Result<(), LoginError> {
    let Some(book) = contacts else {
        return Ok(());
    };

    let contact = book
        .get(name)
        .ok_or_else(|| LoginError::NotAContact(name.to_string()))?;

    match contact.endpoint {
        Some(pinned) if pinned != endpoint => Err(LoginError::EndpointMismatch(name.to_string())),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_login() {
        assert_eq!(parse_login("login ana"), Ok("ana".to_string()));
        assert_eq!(parse_login("  LOGIN   bia  "), Ok("bia".to_string()));
        assert_eq!(parse_login(""), Err(LoginError::Usage));
        assert_eq!(parse_login("   "), Err(LoginError::Usage));
        assert_eq!(parse_login("move up"), Err(LoginError::NotALogin));
        assert_eq!(parse_login("login"), Err(LoginError::MissingName));
    }

    #[test]
    fn test_contact_book_parse() {
        let book = ContactBook::parse("ana;127.0.0.1:5000\n# comment\n\nbia, caio ; 10.0.0.2:7000").unwrap();

        assert_eq!(book.len(), 3);
        assert_eq!(book.get("ana").unwrap().endpoint, Some(addr("127.0.0.1:5000")));
        assert_eq!(book.get("bia").unwrap().endpoint, None);
        assert_eq!(book.get("caio").unwrap().endpoint, Some(addr("10.0.0.2:7000")));
    }

    #[test]
    fn test_contact_book_rejects_bad_entries() {
        assert_eq!(
            ContactBook::parse("ana;not-an-address"),
            Err(ContactError::InvalidEndpoint {
                name: "ana".into(),
                value: "not-an-address".into(),
            })
        );
        assert!(matches!(
            ContactBook::parse(";127.0.0.1:1"),
            Err(ContactError::MissingName(_))
        ));
    }

    #[test]
    fn test_authorize_without_book_allows_anyone() {
        assert!(authorize(None, "whoever", addr("127.0.0.1:1")).is_ok());
    }

    #[test]
    fn test_authorize_with_book() {
        let book = ContactBook::parse("ana;127.0.0.1:5000,bia").unwrap();

        assert!(authorize(Some(&book), "ana", addr("127.0.0.1:5000")).is_ok());
        assert!(authorize(Some(&book), "bia", addr("127.0.0.1:6000")).is_ok());
        assert_eq!(
            authorize(Some(&book), "ana", addr("127.0.0.1:5001")),
            Err(LoginError::EndpointMismatch("ana".into()))
        );
        assert_eq!(
            authorize(Some(&book), "zed", addr("127.0.0.1:5000")),
            Err(LoginError::NotAContact("zed".into()))
        );
    }

    #[test]
    fn test_rejections_read_as_replies() {
        assert_eq!(LoginError::Usage.to_string(), LOGIN_PROMPT);
        assert_eq!(
            LoginError::AlreadyOnline("ana".into()).to_string(),
            "User ana is already online!"
        );
    }
}
