//! Email addressing
//!
//! Parses sender-supplied email addresses so they can be used as a reply-to.
//! Accepts a bare `local@domain` or a display form `Name <local@domain>`.
//!
//! # Examples
//!
//! ```
//! use linkrelay::dispatch::{resolve_reply_to, EmailAddress};
//!
//! let addr: EmailAddress = "Ada <ada@example.com>".parse().unwrap();
//! assert_eq!(addr.local(), "ada");
//! assert_eq!(addr.domain(), "example.com");
//!
//! assert_eq!(resolve_reply_to("not an address", "antonym@example.com"), "antonym@example.com");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type for address parsing
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid address format: expected 'local@domain', got '{0}'")]
    InvalidFormat(String),

    #[error("address local part cannot be empty")]
    EmptyLocal,

    #[error("address domain cannot be empty")]
    EmptyDomain,

    #[error("address local part contains invalid characters: '{0}'")]
    InvalidLocalCharacters(String),

    #[error("address domain contains invalid characters: '{0}'")]
    InvalidDomainCharacters(String),
}

/// A validated email address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EmailAddress {
    local: String,
    domain: String,
}

impl EmailAddress {
    /// Create an address from parts
    ///
    /// # Errors
    /// Returns an error if either part is empty or contains invalid characters.
    pub fn new(local: impl Into<String>, domain: impl Into<String>) -> Result<Self, AddressError> {
        let local = local.into();
        let domain = domain.into();

        Self::validate_local(&local)?;
        Self::validate_domain(&domain)?;

        Ok(Self { local, domain })
    }

    pub fn local(&self) -> &str {
        &self.local
    }

    pub fn domain(&self) -> &str {
        &self.domain
    }

    fn validate_local(local: &str) -> Result<(), AddressError> {
        if local.is_empty() {
            return Err(AddressError::EmptyLocal);
        }

        if local
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || "<>()[],;:\"\\".contains(c))
        {
            return Err(AddressError::InvalidLocalCharacters(local.to_string()));
        }

        Ok(())
    }

    fn validate_domain(domain: &str) -> Result<(), AddressError> {
        if domain.is_empty() {
            return Err(AddressError::EmptyDomain);
        }

        // Alphanumeric labels joined by dots; no empty labels
        let labels_ok = domain.split('.').all(|label| {
            !label.is_empty() && label.chars().all(|c| c.is_alphanumeric() || c == '-')
        });
        if !labels_ok {
            return Err(AddressError::InvalidDomainCharacters(domain.to_string()));
        }

        Ok(())
    }
}

impl FromStr for EmailAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();

        // "Display Name <local@domain>"
        let bare = match (trimmed.rfind('<'), trimmed.strip_suffix('>')) {
            (Some(open), Some(inner)) => &inner[open + 1..],
            (None, None) => trimmed,
            _ => return Err(AddressError::InvalidFormat(s.to_string())),
        };

        let parts: Vec<&str> = bare.split('@').collect();
        if parts.len() != 2 {
            return Err(AddressError::InvalidFormat(s.to_string()));
        }

        Self::new(parts[0], parts[1])
    }
}

impl TryFrom<String> for EmailAddress {
    type Error = AddressError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<EmailAddress> for String {
    fn from(addr: EmailAddress) -> Self {
        addr.to_string()
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

/// Reply-to for a sender: the parsed sender address, or `default` when it does not parse
pub fn resolve_reply_to(sender: &str, default: &str) -> String {
    match sender.parse::<EmailAddress>() {
        Ok(addr) => addr.to_string(),
        Err(e) => {
            tracing::debug!(sender = %sender, error = %e, "Using default reply-to");
            default.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_parsing() {
        let addr: EmailAddress = "someone@example.com".parse().unwrap();
        assert_eq!(addr.local(), "someone");
        assert_eq!(addr.domain(), "example.com");
        assert_eq!(addr.to_string(), "someone@example.com");
    }

    #[test]
    fn test_display_name_form() {
        let addr: EmailAddress = "  Some One <some.one+tag@mail.example.com> ".parse().unwrap();
        assert_eq!(addr.to_string(), "some.one+tag@mail.example.com");
    }

    #[test]
    fn test_invalid_format() {
        for raw in ["no-at-sign", "too@many@signs", "Name <a@b.com", "a@b.com>"] {
            let result: Result<EmailAddress, _> = raw.parse();
            assert!(
                matches!(result, Err(AddressError::InvalidFormat(_))),
                "{} should be rejected",
                raw
            );
        }
    }

    #[test]
    fn test_empty_parts() {
        let result: Result<EmailAddress, _> = "@domain".parse();
        assert!(matches!(result, Err(AddressError::EmptyLocal)));

        let result: Result<EmailAddress, _> = "local@".parse();
        assert!(matches!(result, Err(AddressError::EmptyDomain)));
    }

    #[test]
    fn test_invalid_characters() {
        let result: Result<EmailAddress, _> = "with space@domain.com".parse();
        assert!(matches!(result, Err(AddressError::InvalidLocalCharacters(_))));

        let result: Result<EmailAddress, _> = "a@domain..com".parse();
        assert!(matches!(result, Err(AddressError::InvalidDomainCharacters(_))));
    }

    #[test]
    fn test_resolve_reply_to() {
        assert_eq!(
            resolve_reply_to("a@b.com", "antonym@example.com"),
            "a@b.com"
        );
        assert_eq!(resolve_reply_to("", "antonym@example.com"), "antonym@example.com");
        assert_eq!(
            resolve_reply_to("+15551234567", "antonym@example.com"),
            "antonym@example.com"
        );
    }

    #[test]
    fn test_serde_roundtrip() {
        let addr: EmailAddress = "agent@example.com".parse().unwrap();
        let json = serde_json::to_string(&addr).unwrap();
        assert_eq!(json, "\"agent@example.com\"");

        let parsed: EmailAddress = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, addr);
    }
}
