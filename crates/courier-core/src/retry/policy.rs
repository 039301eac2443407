//! Retry policy: how many attempts before quarantine, and where to.

use serde::{Deserialize, Serialize};

use crate::domain::ConfigError;

pub const DEFAULT_MAX_DELIVERY_ATTEMPTS: u32 = 5;
pub const DEFAULT_ERROR_QUEUE: &str = "error";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Failed deliveries allowed before the message is exhausted (>= 1).
    pub max_delivery_attempts: u32,

    /// Queue exhausted messages are forwarded to.
    pub error_queue_address: String,

    /// Upper bound in bytes for the error-details header. 0 means unlimited.
    pub error_details_max_length: usize,

    /// Run `Failed<M>` handlers before quarantining.
    pub second_level_retry_enabled: bool,

    /// Quarantine deserialization failures on their first occurrence.
    pub fail_fast_on_deserialization: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_delivery_attempts: DEFAULT_MAX_DELIVERY_ATTEMPTS,
            error_queue_address: DEFAULT_ERROR_QUEUE.to_string(),
            error_details_max_length: 0,
            second_level_retry_enabled: false,
            fail_fast_on_deserialization: false,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_delivery_attempts(mut self, attempts: u32) -> Self {
        self.max_delivery_attempts = attempts;
        self
    }

    pub fn with_error_queue(mut self, address: impl Into<String>) -> Self {
        self.error_queue_address = address.into();
        self
    }

    pub fn with_error_details_max_length(mut self, max_length: usize) -> Self {
        self.error_details_max_length = max_length;
        self
    }

    pub fn with_second_level_retry(mut self, enabled: bool) -> Self {
        self.second_level_retry_enabled = enabled;
        self
    }

    pub fn with_fail_fast_on_deserialization(mut self, enabled: bool) -> Self {
        self.fail_fast_on_deserialization = enabled;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_delivery_attempts == 0 {
            return Err(ConfigError::invalid(
                "retry.max_delivery_attempts",
                "must be at least 1",
            ));
        }
        if self.error_queue_address.trim().is_empty() {
            return Err(ConfigError::invalid(
                "retry.error_queue_address",
                "must not be empty",
            ));
        }
        Ok(())
    }
}
