//! linkrelay - Durable message relay
//!
//! Relays submitted messages to a fixed recipient by email or SMS and tracks
//! which requested messages have actually been delivered. Two append-only
//! logs hold the state: *desired* (every request) and *current* (every
//! confirmed delivery). Reconciling the two retries whatever is missing.
//!
//! # Architecture
//!
//! - **connection**: Data model, 4-tuple identity, and the hex line codec
//! - **storage**: Append-only line files with lazy, cancellable scans
//! - **dispatch**: Protocol selection (email vs SMS), validation, transports
//! - **communicator**: Record, link, and reconcile over the two logs
//! - **sweeper**: Background daemon for boot-time and periodic reconcile
//! - **config**: YAML configuration and validation

// Core modules
pub mod config;
pub mod connection;
pub mod error;
pub mod logging;
pub mod storage;

// Components
pub mod communicator;
pub mod dispatch;
pub mod sweeper;

// Re-exports
pub use communicator::Communicator;
pub use connection::Connection;
pub use error::{RelayError, Result};
