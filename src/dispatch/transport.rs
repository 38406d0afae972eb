//! Delivery transport abstraction
//!
//! The mail and SMS providers live outside this crate. They are reached only
//! through these traits, which are injected into the [`Translator`](super::Translator).

use crate::communicator::retry::{RetryDecision, RetryableError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Transport errors
#[derive(Debug, Error)]
pub enum TransportError {
    /// The provider refused the message; resending the same payload will not help
    #[error("delivery rejected: {0}")]
    Rejected(String),

    /// The provider could not be reached or failed transiently
    #[error("provider unavailable: {0}")]
    Unavailable(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RetryableError for TransportError {
    fn retry_decision(&self) -> RetryDecision {
        match self {
            TransportError::Unavailable(_) | TransportError::Io(_) => RetryDecision::Retry,
            TransportError::Rejected(_) | TransportError::Serialization(_) => {
                RetryDecision::NoRetry
            }
        }
    }
}

/// Result type for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

/// Everything a transactional-mail provider needs to send one email
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailRequest {
    pub subject: String,
    pub body: String,
    /// Verified origin address
    pub from: String,
    pub reply_to: String,
    pub to: Vec<String>,
}

/// Everything an SMS gateway needs to send one text
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmsRequest {
    pub to: String,
    pub from: String,
    pub body: String,
}

/// Trait for email delivery backends
#[async_trait]
pub trait EmailTransport: Send + Sync {
    /// Hand one email to the provider
    async fn send_email(&self, request: &EmailRequest) -> Result<()>;
}

/// Trait for SMS delivery backends
#[async_trait]
pub trait SmsTransport: Send + Sync {
    /// Hand one text message to the gateway
    async fn send_sms(&self, request: &SmsRequest) -> Result<()>;
}
