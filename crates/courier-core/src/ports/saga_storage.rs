//! SagaStorage port - saga data の永続化
//!
//! Storage backends must provide compare-and-swap semantics on `revision`:
//! `update` and `delete` succeed only when the stored revision equals the
//! revision the caller read. The outcome is tagged, not raised as an error,
//! so the engine branches on conflicts explicitly.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ulid::Ulid;

use crate::domain::SagaId;

/// Value used to look a saga instance up by one of its properties.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CorrelationValue(String);

impl CorrelationValue {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CorrelationValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

macro_rules! correlation_value_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for CorrelationValue {
                fn from(value: $ty) -> Self {
                    Self(value.to_string())
                }
            }
        )*
    };
}

correlation_value_from!(String, &str, &String, u32, u64, i32, i64, Ulid, SagaId);

/// One indexed property of a stored saga instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationEntry {
    pub property: &'static str,
    pub value: CorrelationValue,
}

/// Serialized saga instance as seen by storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaRecord {
    pub id: SagaId,
    pub saga_type: String,
    pub revision: u64,
    pub data: serde_json::Value,
}

/// Result of a revision-guarded write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreOutcome<T> {
    Ok(T),
    /// The stored revision differs from the one the writer read.
    ConcurrencyConflict { expected: u64, actual: u64 },
    /// The instance does not exist (anymore).
    NotFound,
}

impl<T> StoreOutcome<T> {
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> StoreOutcome<U> {
        match self {
            Self::Ok(value) => StoreOutcome::Ok(f(value)),
            Self::ConcurrencyConflict { expected, actual } => {
                StoreOutcome::ConcurrencyConflict { expected, actual }
            }
            Self::NotFound => StoreOutcome::NotFound,
        }
    }
}

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("saga storage unavailable: {0}")]
    Unavailable(String),

    #[error("saga storage failure: {0}")]
    Other(String),
}

#[async_trait]
pub trait SagaStorage: Send + Sync {
    async fn find(
        &self,
        saga_type: &str,
        property: &str,
        value: &CorrelationValue,
    ) -> Result<Option<SagaRecord>, StorageError>;

    /// Store a new instance at revision 0.
    ///
    /// Returns `ConcurrencyConflict` when another instance of the same saga
    /// type already claims one of `correlations`.
    async fn insert(
        &self,
        record: SagaRecord,
        correlations: &[CorrelationEntry],
    ) -> Result<StoreOutcome<SagaRecord>, StorageError>;

    /// Replace an instance. `record.revision` is the revision read; the stored
    /// record comes back with the revision incremented.
    async fn update(
        &self,
        record: SagaRecord,
        correlations: &[CorrelationEntry],
    ) -> Result<StoreOutcome<SagaRecord>, StorageError>;

    async fn delete(
        &self,
        id: SagaId,
        expected_revision: u64,
    ) -> Result<StoreOutcome<()>, StorageError>;
}
