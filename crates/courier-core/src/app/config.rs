//! BusConfig - endpoint 設定（JSON, serde）
//!
//! Durations are written as seconds; fractions are allowed (`0.5`).
//! Every field has a default, so `{}` is a valid config.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::domain::ConfigError;
use crate::retry::RetryPolicy;

pub const DEFAULT_INPUT_QUEUE: &str = "courier-input";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    pub input_queue: String,

    /// Number of concurrent workers, each handling one message at a time.
    pub workers: usize,

    /// How long in-flight deliveries may drain after shutdown is requested.
    #[serde(with = "secs")]
    pub shutdown_timeout: Duration,

    pub retry: RetryPolicy,

    /// Silence periods of the Ignorant, in order. The last one repeats.
    #[serde(with = "secs_list")]
    pub silence_periods: Vec<Duration>,

    /// Tracking entries untouched for longer than this are swept.
    #[serde(with = "secs")]
    pub error_tracking_max_age: Duration,

    #[serde(with = "secs")]
    pub error_tracking_cleanup_interval: Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            input_queue: DEFAULT_INPUT_QUEUE.to_string(),
            workers: 1,
            shutdown_timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            silence_periods: vec![Duration::from_secs(60), Duration::from_secs(600)],
            error_tracking_max_age: Duration::from_secs(600),
            error_tracking_cleanup_interval: Duration::from_secs(60),
        }
    }
}

impl BusConfig {
    pub fn new(input_queue: impl Into<String>) -> Self {
        Self {
            input_queue: input_queue.into(),
            ..Self::default()
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate()?;
        if self.input_queue.trim().is_empty() {
            return Err(ConfigError::invalid("input_queue", "must not be empty"));
        }
        if self.retry.error_queue_address == self.input_queue {
            return Err(ConfigError::invalid(
                "retry.error_queue_address",
                "must differ from the input queue",
            ));
        }
        if self.workers == 0 {
            return Err(ConfigError::invalid("workers", "must be at least 1"));
        }
        if self.silence_periods.is_empty() {
            return Err(ConfigError::invalid("silence_periods", "must not be empty"));
        }
        if self.silence_periods.iter().any(Duration::is_zero) {
            return Err(ConfigError::invalid(
                "silence_periods",
                "periods must be longer than zero",
            ));
        }
        if self.error_tracking_cleanup_interval.is_zero() {
            return Err(ConfigError::invalid(
                "error_tracking_cleanup_interval",
                "must be longer than zero",
            ));
        }
        Ok(())
    }
}

mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

mod secs_list {
    use std::time::Duration;

    use serde::ser::SerializeSeq;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        values: &[Duration],
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(values.len()))?;
        for value in values {
            seq.serialize_element(&value.as_secs_f64())?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Vec<Duration>, D::Error> {
        Vec::<f64>::deserialize(deserializer)?
            .into_iter()
            .map(|secs| Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_defaults_are_valid() {
        let config = BusConfig::from_json_str("{}").unwrap();
        assert_eq!(config, BusConfig::default());
    }

    #[test]
    fn test_parse_full_config() {
        let config = BusConfig::from_json_str(
            r#"{
                "input_queue": "orders",
                "workers": 4,
                "shutdown_timeout": 2.5,
                "retry": {
                    "max_delivery_attempts": 3,
                    "error_queue_address": "orders-error",
                    "error_details_max_length": 2048,
                    "second_level_retry_enabled": true
                },
                "silence_periods": [60, 600]
            }"#,
        )
        .unwrap();

        assert_eq!(config.input_queue, "orders");
        assert_eq!(config.workers, 4);
        assert_eq!(config.shutdown_timeout, Duration::from_millis(2500));
        assert_eq!(config.retry.max_delivery_attempts, 3);
        assert!(config.retry.second_level_retry_enabled);
        assert_eq!(
            config.silence_periods,
            vec![Duration::from_secs(60), Duration::from_secs(600)]
        );
    }

    #[rstest]
    #[case(r#"{"workers": 0}"#, "workers")]
    #[case(r#"{"silence_periods": []}"#, "silence_periods")]
    #[case(r#"{"silence_periods": [60, 0]}"#, "silence_periods")]
    #[case(r#"{"input_queue": "error"}"#, "error_queue_address")]
    #[case(r#"{"retry": {"max_delivery_attempts": 0}}"#, "max_delivery_attempts")]
    fn test_invalid_settings_fail_fast(#[case] json: &str, #[case] setting: &str) {
        let err = BusConfig::from_json_str(json).unwrap_err();
        assert!(
            matches!(&err, ConfigError::InvalidSetting { setting: s, .. } if s.contains(setting)),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn test_negative_duration_is_a_parse_error() {
        let err = BusConfig::from_json_str(r#"{"shutdown_timeout": -1}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_serialize_roundtrips_through_seconds() {
        let json = serde_json::to_string(&BusConfig::new("orders")).unwrap();
        assert!(json.contains(r#""shutdown_timeout":30.0"#));
        assert_eq!(
            BusConfig::from_json_str(&json).unwrap(),
            BusConfig::new("orders")
        );
    }
}
