//! Delivery capabilities
//!
//! A [`Sender`] is a message that is ready to go: validated, addressed, and
//! bound to the transport that will carry it. [`Email`] and [`Sms`] are built
//! by the [`Translator`](super::Translator); tests can implement the trait directly.

use super::transport::{EmailRequest, EmailTransport, Result, SmsRequest, SmsTransport};
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Which kind of delivery a sender performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SenderKind {
    Email,
    Sms,
}

impl fmt::Display for SenderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SenderKind::Email => write!(f, "email"),
            SenderKind::Sms => write!(f, "sms"),
        }
    }
}

/// A single delivery attempt
#[async_trait]
pub trait Sender: Send + Sync {
    /// Deliver the message; blocks for as long as the provider takes
    async fn send(&self) -> Result<()>;

    /// Kind of delivery, for logs and metrics
    fn kind(&self) -> SenderKind;
}

/// An email addressed to one or more receivers
#[derive(Clone)]
pub struct Email {
    pub subject: String,
    pub message: String,
    pub sender: String,
    pub receivers: Vec<String>,
    /// Verified origin address the provider sends from
    pub source: String,
    /// Where replies go: the sender if it parsed, else the default
    pub reply_to: String,
    transport: Arc<dyn EmailTransport>,
}

impl Email {
    pub(crate) fn new(
        subject: String,
        message: String,
        sender: String,
        receivers: Vec<String>,
        source: String,
        reply_to: String,
        transport: Arc<dyn EmailTransport>,
    ) -> Self {
        Self {
            subject,
            message,
            sender,
            receivers,
            source,
            reply_to,
            transport,
        }
    }

    /// Provider payload for this email
    pub fn request(&self) -> EmailRequest {
        EmailRequest {
            subject: self.subject.clone(),
            body: self.message.clone(),
            from: self.source.clone(),
            reply_to: self.reply_to.clone(),
            to: self.receivers.clone(),
        }
    }
}

impl fmt::Debug for Email {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Email")
            .field("subject", &self.subject)
            .field("sender", &self.sender)
            .field("receivers", &self.receivers)
            .field("reply_to", &self.reply_to)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Sender for Email {
    async fn send(&self) -> Result<()> {
        let request = self.request();
        self.transport.send_email(&request).await?;
        tracing::debug!(
            receivers = ?self.receivers,
            reply_to = %self.reply_to,
            "Email handed to transport"
        );
        Ok(())
    }

    fn kind(&self) -> SenderKind {
        SenderKind::Email
    }
}

/// A text message to one phone number
#[derive(Clone)]
pub struct Sms {
    /// Number the gateway sends from
    pub sender: String,
    pub receiver: String,
    /// Full body, including the `From:` prefix
    pub message: String,
    transport: Arc<dyn SmsTransport>,
}

impl Sms {
    pub(crate) fn new(
        sender: String,
        receiver: String,
        message: String,
        transport: Arc<dyn SmsTransport>,
    ) -> Self {
        Self {
            sender,
            receiver,
            message,
            transport,
        }
    }

    /// Gateway payload for this text
    pub fn request(&self) -> SmsRequest {
        SmsRequest {
            to: self.receiver.clone(),
            from: self.sender.clone(),
            body: self.message.clone(),
        }
    }
}

impl fmt::Debug for Sms {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sms")
            .field("sender", &self.sender)
            .field("receiver", &self.receiver)
            .field("length", &self.message.len())
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Sender for Sms {
    async fn send(&self) -> Result<()> {
        let request = self.request();
        self.transport.send_sms(&request).await?;
        tracing::debug!(receiver = %self.receiver, "SMS handed to transport");
        Ok(())
    }

    fn kind(&self) -> SenderKind {
        SenderKind::Sms
    }
}
