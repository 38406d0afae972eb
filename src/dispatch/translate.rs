//! Protocol selection
//!
//! Turns a [`Connection`] into a ready-to-send [`Sender`]. The receiver's
//! shape picks the protocol: an address containing `@` is email, one starting
//! with `+` is SMS. Validation happens here, so a connection that cannot be
//! delivered never reaches a transport.

use super::address::resolve_reply_to;
use super::sender::{Email, Sender, Sms};
use super::transport::{EmailTransport, SmsTransport};
use crate::connection::Connection;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Carrier limit on a single SMS body, in bytes
pub const MAX_SMS_LENGTH: usize = 1600;

/// Reasons a connection cannot be turned into a sender
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("connection has no content")]
    NoContent,

    #[error("sms length {length} exceeds maximum of {max}")]
    SmsLengthExceeded { length: usize, max: usize },

    #[error("unknown connection type for receiver '{0}'")]
    UnknownConnectionType(String),
}

/// Deployment values baked into every outgoing message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Verified address emails are sent from
    pub email_source: String,
    /// Appended to email subjects: `"<sender> -> <site_label>"`
    pub site_label: String,
    /// Reply-to when the sender is not a usable email address
    pub default_reply_to: String,
    /// Number texts are sent from
    pub sms_from: String,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            email_source: "relay@localhost".to_string(),
            site_label: "localhost".to_string(),
            default_reply_to: "antonym@localhost".to_string(),
            sms_from: "+10000000000".to_string(),
        }
    }
}

/// Builds senders bound to the injected transports
#[derive(Clone)]
pub struct Translator {
    settings: DispatchSettings,
    email: Arc<dyn EmailTransport>,
    sms: Arc<dyn SmsTransport>,
}

impl Translator {
    pub fn new(
        settings: DispatchSettings,
        email: Arc<dyn EmailTransport>,
        sms: Arc<dyn SmsTransport>,
    ) -> Self {
        Self {
            settings,
            email,
            sms,
        }
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    /// Pick and validate a sender for `connection`
    pub fn translate(&self, connection: &Connection) -> Result<Box<dyn Sender>, DispatchError> {
        if connection.receiver.contains('@') {
            Ok(Box::new(self.email_from_connection(connection)?))
        } else if connection.receiver.starts_with('+') {
            Ok(Box::new(self.sms_from_connection(connection)?))
        } else {
            Err(DispatchError::UnknownConnectionType(
                connection.receiver.clone(),
            ))
        }
    }

    /// Email to the connection's receiver
    pub fn email_from_connection(&self, connection: &Connection) -> Result<Email, DispatchError> {
        if connection.message.is_empty() {
            return Err(DispatchError::NoContent);
        }

        let sender = connection.effective_sender();
        Ok(Email::new(
            format!("{} -> {}", sender, self.settings.site_label),
            connection.message.clone(),
            sender.to_string(),
            vec![connection.receiver.clone()],
            self.settings.email_source.clone(),
            resolve_reply_to(&connection.sender, &self.settings.default_reply_to),
            Arc::clone(&self.email),
        ))
    }

    /// Text to the connection's receiver, prefixed with who sent it
    pub fn sms_from_connection(&self, connection: &Connection) -> Result<Sms, DispatchError> {
        if connection.message.is_empty() {
            return Err(DispatchError::NoContent);
        }

        let prefix = format!("From: {}", connection.effective_sender());
        let length = prefix.len() + connection.message.len();
        if length > MAX_SMS_LENGTH {
            return Err(DispatchError::SmsLengthExceeded {
                length,
                max: MAX_SMS_LENGTH,
            });
        }

        Ok(Sms::new(
            self.settings.sms_from.clone(),
            connection.receiver.clone(),
            format!("{}\n {}", prefix, connection.message),
            Arc::clone(&self.sms),
        ))
    }
}

impl fmt::Debug for Translator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Translator")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
