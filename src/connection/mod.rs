//! Connection data model
//!
//! A [`Connection`] is one requested message delivery: who sent it, where it
//! goes, when it was recorded, what it says, and (once linked) when delivery
//! was confirmed.
//!
//! # Identity
//!
//! Two connections are the same logical request when `(sender, receiver,
//! send_epoch, message)` match. `receive_epoch` is never compared, so a record
//! in the desired log (unstamped) and its delivered twin in the current log
//! (stamped) are recognized as one entity.

pub mod codec;

pub use codec::{deserialize, serialize, CodecError, ConnectionCodec};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Sender token used when a connection carries no sender address
pub const ANON_TOKEN: &str = "antonym";

/// A requested (and possibly delivered) message
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Connection {
    /// Address of the sender (empty means anonymous)
    #[serde(default)]
    pub sender: String,

    /// Address of the receiver (`name@domain` or `+E164`)
    pub receiver: String,

    /// Seconds since the epoch when the request was recorded
    #[serde(default)]
    pub send_epoch: i64,

    /// Message body
    pub message: String,

    /// Seconds since the epoch when delivery was confirmed, zero until linked
    #[serde(default)]
    pub receive_epoch: i64,
}

impl Connection {
    /// Create an unlinked connection
    pub fn new(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        send_epoch: i64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            receiver: receiver.into(),
            send_epoch,
            message: message.into(),
            receive_epoch: 0,
        }
    }

    /// Create a connection recorded now
    pub fn now(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::new(sender, receiver, chrono::Utc::now().timestamp(), message)
    }

    /// Sender as persisted: the anonymous token stands in for an empty sender
    pub fn effective_sender(&self) -> &str {
        if self.sender.is_empty() {
            ANON_TOKEN
        } else {
            &self.sender
        }
    }

    /// Whether delivery has been confirmed
    pub fn is_linked(&self) -> bool {
        self.receive_epoch != 0
    }

    /// Copy of this connection stamped as delivered at `epoch`
    pub fn linked_at(&self, epoch: i64) -> Self {
        Self {
            receive_epoch: epoch,
            ..self.clone()
        }
    }

    /// Identity key for the 4-tuple
    pub fn identity(&self) -> ConnectionIdentity {
        ConnectionIdentity::of(self)
    }
}

impl PartialEq for Connection {
    fn eq(&self, other: &Self) -> bool {
        self.effective_sender() == other.effective_sender()
            && self.receiver == other.receiver
            && self.send_epoch == other.send_epoch
            && self.message == other.message
    }
}

impl Eq for Connection {}

impl Hash for Connection {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.effective_sender().hash(state);
        self.receiver.hash(state);
        self.send_epoch.hash(state);
        self.message.hash(state);
    }
}

impl fmt::Display for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} -> {} @{}",
            self.effective_sender(),
            self.receiver,
            self.send_epoch
        )
    }
}

/// SHA-256 of the encoded 4-tuple
///
/// Hashes the same hex fields the codec writes, so two connections share an
/// identity exactly when they are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionIdentity([u8; 32]);

impl ConnectionIdentity {
    fn of(connection: &Connection) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(hex::encode(connection.effective_sender()));
        hasher.update(b" ");
        hasher.update(hex::encode(&connection.receiver));
        hasher.update(b" ");
        hasher.update(connection.send_epoch.to_string());
        hasher.update(b" ");
        hasher.update(hex::encode(&connection.message));
        let digest = hasher.finalize();
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// Raw digest bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for ConnectionIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // First 8 bytes are plenty for log output
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}
