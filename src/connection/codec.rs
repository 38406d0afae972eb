//! Line codec for connection records
//!
//! One record per line:
//!
//! ```text
//! <hex(sender)> <hex(receiver)> <send_epoch> <hex(message)> [<receive_epoch>]
//! ```
//!
//! Text fields are hex-encoded so user-supplied content can never contain the
//! space delimiter or a newline. The trailing `receive_epoch` is optional on
//! read; a line without it is an unlinked request.

use super::Connection;
use crate::storage::LineCodec;
use thiserror::Error;

/// Codec errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("malformed connection record: {reason}")]
    MalformedRecord { reason: String },
}

impl CodecError {
    fn malformed(reason: impl Into<String>) -> Self {
        CodecError::MalformedRecord {
            reason: reason.into(),
        }
    }
}

/// Serialize a connection to one newline-terminated line
///
/// An empty sender is written as the anonymous token.
pub fn serialize(connection: &Connection) -> String {
    format!(
        "{} {} {} {} {}\n",
        hex::encode(connection.effective_sender()),
        hex::encode(&connection.receiver),
        connection.send_epoch,
        hex::encode(&connection.message),
        connection.receive_epoch
    )
}

/// Deserialize one line (with or without its trailing newline)
pub fn deserialize(line: &str) -> Result<Connection, CodecError> {
    let line = line.trim_end_matches(&['\n', '\r'][..]);
    let fields: Vec<&str> = line.split(' ').collect();

    if fields.len() < 4 {
        return Err(CodecError::malformed(format!(
            "expected at least 4 fields, got {}",
            fields.len()
        )));
    }

    let sender = decode_text(fields[0], "sender")?;
    let receiver = decode_text(fields[1], "receiver")?;
    let send_epoch = decode_epoch(fields[2], "send_epoch")?;
    let message = decode_text(fields[3], "message")?;
    let receive_epoch = match fields.get(4) {
        Some(raw) => decode_epoch(raw, "receive_epoch")?,
        None => 0,
    };

    Ok(Connection {
        sender,
        receiver,
        send_epoch,
        message,
        receive_epoch,
    })
}

fn decode_text(raw: &str, field: &str) -> Result<String, CodecError> {
    let bytes =
        hex::decode(raw).map_err(|e| CodecError::malformed(format!("{}: {}", field, e)))?;
    String::from_utf8(bytes).map_err(|e| CodecError::malformed(format!("{}: {}", field, e)))
}

fn decode_epoch(raw: &str, field: &str) -> Result<i64, CodecError> {
    raw.parse::<i64>()
        .map_err(|e| CodecError::malformed(format!("{}: {}", field, e)))
}

/// [`LineCodec`] for connection logs
#[derive(Debug, Clone, Copy, Default)]
pub struct ConnectionCodec;

impl LineCodec for ConnectionCodec {
    type Item = Connection;
    type Error = CodecError;

    fn encode(&self, item: &Connection) -> Result<String, CodecError> {
        Ok(serialize(item))
    }

    fn decode(&self, line: &str) -> Result<Connection, CodecError> {
        deserialize(line)
    }
}
