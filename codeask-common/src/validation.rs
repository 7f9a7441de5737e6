//! Configuration validation.
//!
//! Checks that required values are present and that the timing
//! parameters are consistent with each other.

use thiserror::Error;

use crate::config::{Config, ExchangeConfig, ObservabilityConfig, RuntimeConfig};

/// Configuration validation error.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },

    #[error("Configuration conflict: {reason}")]
    Conflict { reason: String },

    #[error("Multiple validation errors: {0:?}")]
    Multiple(Vec<ValidationError>),
}

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Trait for validatable configuration sections.
pub trait Validate {
    /// Validate this configuration section.
    fn validate(&self) -> ValidationResult<()>;
}

impl Validate for Config {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors: Vec<ValidationError> = [
            self.runtime.validate(),
            self.exchange.validate(),
            self.observability.validate(),
        ]
        .into_iter()
        .filter_map(Result::err)
        .collect();

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ValidationError::Multiple(errors)),
        }
    }
}

impl Validate for RuntimeConfig {
    fn validate(&self) -> ValidationResult<()> {
        let endpoint = self.endpoint.trim();
        if endpoint.is_empty() {
            return Err(ValidationError::MissingField {
                field: "runtime.endpoint".into(),
            });
        }
        if !(endpoint.starts_with("http://") || endpoint.starts_with("https://")) {
            return Err(ValidationError::InvalidValue {
                field: "runtime.endpoint".into(),
                reason: format!("'{endpoint}' must start with http:// or https://"),
            });
        }
        if self.connect_timeout_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "runtime.connect_timeout_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.request_timeout_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "runtime.request_timeout_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }
        Ok(())
    }
}

impl Validate for ExchangeConfig {
    fn validate(&self) -> ValidationResult<()> {
        if self.progress_interval_ms == 0 {
            return Err(ValidationError::InvalidValue {
                field: "exchange.progress_interval_ms".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.hard_ceiling_secs == 0 {
            return Err(ValidationError::InvalidValue {
                field: "exchange.hard_ceiling_secs".into(),
                reason: "must be greater than 0".into(),
            });
        }
        if self.grace_window_secs >= self.hard_ceiling_secs {
            return Err(ValidationError::Conflict {
                reason: format!(
                    "grace window ({}s) must be shorter than the hard ceiling ({}s)",
                    self.grace_window_secs, self.hard_ceiling_secs
                ),
            });
        }
        Ok(())
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        match self.log_format.as_str() {
            "json" | "pretty" => Ok(()),
            other => Err(ValidationError::InvalidValue {
                field: "observability.log_format".into(),
                reason: format!("'{other}' is not one of: json, pretty"),
            }),
        }
    }
}
