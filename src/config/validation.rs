//! Configuration validation
//!
//! Checks a relay configuration before anything is opened:
//! - Both log paths set and distinct
//! - At least one delivery in flight
//! - Addresses and numbers well formed

use super::relay_config::RelayConfig;
use crate::dispatch::EmailAddress;
use crate::RelayError;

/// Validation error details
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Validation result
pub type ValidationResult = std::result::Result<(), Vec<ValidationError>>;

/// Validate a relay configuration, reporting every problem found
pub fn validate_config(config: &RelayConfig) -> ValidationResult {
    let mut errors = Vec::new();

    let storage = &config.storage;
    if storage.desired_path.as_os_str().is_empty() {
        errors.push(ValidationError::new("storage.desired_path", "Path must not be empty"));
    }
    if storage.current_path.as_os_str().is_empty() {
        errors.push(ValidationError::new("storage.current_path", "Path must not be empty"));
    }
    if !storage.desired_path.as_os_str().is_empty() && storage.desired_path == storage.current_path
    {
        errors.push(ValidationError::new(
            "storage.current_path",
            format!(
                "Desired and current logs must differ (both are {})",
                storage.current_path.display()
            ),
        ));
    }

    if config.outbox.path.as_os_str().is_empty() {
        errors.push(ValidationError::new("outbox.path", "Path must not be empty"));
    }

    if config.reconcile.max_in_flight == 0 {
        errors.push(ValidationError::new(
            "reconcile.max_in_flight",
            "Must allow at least one delivery in flight",
        ));
    }
    if config.reconcile.interval_secs == 0 {
        errors.push(ValidationError::new(
            "reconcile.interval_secs",
            "Interval must be greater than 0",
        ));
    }

    if let Err(e) = config.email.source.parse::<EmailAddress>() {
        errors.push(ValidationError::new("email.source", e.to_string()));
    }
    if let Err(e) = config.email.default_reply_to.parse::<EmailAddress>() {
        errors.push(ValidationError::new("email.default_reply_to", e.to_string()));
    }

    let from = &config.sms.from_number;
    let digits_ok = from
        .strip_prefix('+')
        .map(|digits| !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit()))
        .unwrap_or(false);
    if !digits_ok {
        errors.push(ValidationError::new(
            "sms.from_number",
            format!("Invalid number '{}'. Must be '+' followed by digits", from),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Validate and convert to a Result with a combined error message
pub fn validate_config_result(config: &RelayConfig) -> crate::Result<()> {
    validate_config(config).map_err(|errors| {
        let messages: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        RelayError::Config(format!(
            "Configuration validation failed:\n  - {}",
            messages.join("\n  - ")
        ))
    })
}
