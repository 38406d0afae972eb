//! Message dispatch
//!
//! Chooses a delivery protocol for a connection, validates it, and hands the
//! result to an injected transport.

mod address;
mod outbox;
mod sender;
mod transport;
mod translate;

pub use address::{resolve_reply_to, AddressError, EmailAddress};
pub use outbox::{FilesystemOutbox, OutboxEntry};
pub use sender::{Email, Sender, SenderKind, Sms};
pub use transport::{EmailRequest, EmailTransport, SmsRequest, SmsTransport, TransportError};
pub use translate::{DispatchError, DispatchSettings, Translator, MAX_SMS_LENGTH};
