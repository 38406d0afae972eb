//! Storage layer
//!
//! Append-only line-delimited logs with lazy, cancellable scans.

mod connection_file;
mod line_file;
mod scan;

pub use connection_file::{ConnectionFile, ConnectionScan, Each};
pub use line_file::{LineCodec, LineFile, Lines};
pub use scan::{detect, select, CancelToken, ForEach, ScanError, Select};
