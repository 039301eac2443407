//! Errors - エラー型と分類
//!
//! - `BusError`: message processing 中のエラー（retry step まで伝播する）
//! - `ConfigError`: 起動時の設定エラー（fail fast）

use std::backtrace::{Backtrace, BacktraceStatus};
use std::error::Error as StdError;

use thiserror::Error;

use super::ids::SagaId;
use crate::ports::saga_storage::StorageError;
use crate::ports::transport::TransportError;

/// Boxed error type accepted from user handler code.
pub type BoxError = Box<dyn StdError + Send + Sync>;

/// Alias so `thiserror` does not treat the field as a provided backtrace
/// (that requires the unstable `error_generic_member_access` feature).
type CapturedBacktrace = Backtrace;

/// ErrorKind は実行エラーの運用分類
///
/// Every kind is retryable; the kind only decides how the error is described
/// and whether a fail-fast policy may short-circuit the retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Transient,
    ConcurrencyConflict,
    Deserialization,
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum BusError {
    #[error("handler failed: {source}")]
    Handler {
        #[source]
        source: BoxError,
        /// Captured when `RUST_BACKTRACE` / `RUST_LIB_BACKTRACE` enable it.
        trace: CapturedBacktrace,
    },

    #[error("could not deserialize message of type '{message_type}': {source}")]
    Deserialization {
        message_type: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("could not serialize message of type '{message_type}': {source}")]
    Serialization {
        message_type: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("no message type registered under '{0}'")]
    UnknownMessageType(String),

    #[error("required header '{0}' is missing")]
    MissingHeader(&'static str),

    #[error("content type '{0}' is not supported")]
    UnsupportedContentType(String),

    #[error("no deserialized message is present in the step context")]
    NotDeserialized,

    #[error("message of type '{0}' could not be dispatched to any handler")]
    NoHandlers(String),

    #[error(
        "message '{message_type}' carries no value for correlation property '{property}' of saga '{saga_type}'"
    )]
    CorrelationValueMissing {
        saga_type: &'static str,
        message_type: &'static str,
        property: &'static str,
    },

    #[error("saga {saga_id}: expected revision {expected}, storage has {actual:?}")]
    ConcurrencyConflict {
        saga_id: SagaId,
        expected: u64,
        /// `None` when the instance was deleted concurrently.
        actual: Option<u64>,
    },

    #[error("stored data of saga {saga_id} is unreadable: {source}")]
    SagaData {
        saga_id: SagaId,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl BusError {
    /// Wrap an application error raised by handler code.
    pub fn handler(source: impl Into<BoxError>) -> Self {
        Self::Handler {
            source: source.into(),
            trace: Backtrace::capture(),
        }
    }

    /// Where a handler error was raised, if a backtrace was captured.
    pub fn trace(&self) -> Option<&Backtrace> {
        match self {
            Self::Handler { trace, .. } if trace.status() == BacktraceStatus::Captured => {
                Some(trace)
            }
            _ => None,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Handler { .. } | Self::CorrelationValueMissing { .. } | Self::NoHandlers(_) => {
                ErrorKind::Transient
            }
            Self::ConcurrencyConflict { .. } => ErrorKind::ConcurrencyConflict,
            Self::Deserialization { .. }
            | Self::UnknownMessageType(_)
            | Self::MissingHeader(_)
            | Self::UnsupportedContentType(_)
            | Self::NotDeserialized => ErrorKind::Deserialization,
            Self::Serialization { .. }
            | Self::SagaData { .. }
            | Self::Transport(_)
            | Self::Storage(_) => ErrorKind::Infrastructure,
        }
    }

    /// Full diagnostic text: kind, message, the source chain and the backtrace
    /// when one was captured.
    pub fn describe(&self) -> String {
        let mut text = format!("{:?}: {}", self.kind(), self);
        let mut source = self.source();
        while let Some(cause) = source {
            let cause_text = cause.to_string();
            if !text.contains(&cause_text) {
                text.push_str("\n  caused by: ");
                text.push_str(&cause_text);
            }
            source = cause.source();
        }
        if let Some(trace) = self.trace() {
            text.push_str("\n  backtrace:\n");
            text.push_str(&trace.to_string());
        }
        text
    }
}

/// Startup errors. Never raised while processing messages.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no step of type {0} is present in the pipeline")]
    AnchorNotFound(&'static str),

    #[error("invalid setting '{setting}': {reason}")]
    InvalidSetting {
        setting: &'static str,
        reason: String,
    },

    #[error("could not read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    pub(crate) fn invalid(setting: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidSetting {
            setting,
            reason: reason.into(),
        }
    }
}
