//! Configuration system
//!
//! Loads ~/.config/linkrelay/config.yaml with support for:
//! - Desired and current log locations
//! - Email and SMS origin settings
//! - The filesystem outbox used by the CLI
//! - Reconcile interval, fan-out, and retry

mod relay_config;
pub mod validation;

pub use relay_config::{
    EmailConfig, OutboxConfig, ReconcileConfig, RelayConfig, SmsConfig, StorageConfig,
};
pub use validation::{validate_config, validate_config_result, ValidationError};
