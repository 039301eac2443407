//! Message headers.
//!
//! Keys are case-sensitive. Order is irrelevant. A `Headers` value is always
//! owned by exactly one envelope; copying across pipeline boundaries clones it.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Well-known header names used by the core.
pub mod names {
    pub const MESSAGE_ID: &str = "courier-msg-id";
    pub const CORRELATION_ID: &str = "courier-corr-id";
    pub const RETURN_ADDRESS: &str = "courier-return-address";
    pub const CONTENT_TYPE: &str = "courier-content-type";
    pub const MESSAGE_TYPE: &str = "courier-msg-type";
    pub const SENT_TIME: &str = "courier-senttime";
    pub const ERROR_DETAILS: &str = "courier-error-details";
    pub const SOURCE_QUEUE: &str = "courier-source-queue";
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Headers(HashMap<String, String>);

impl Headers {
    pub fn new() -> Self {
        Self(HashMap::new())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    /// Insert or overwrite a header, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) -> Option<String> {
        self.0.insert(key.into(), value.into())
    }

    /// Insert only when absent (caller-provided values win).
    pub fn insert_if_absent(&mut self, key: &str, value: impl FnOnce() -> String) {
        if !self.0.contains_key(key) {
            self.0.insert(key.to_string(), value());
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.0.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Message id, treating an empty value as absent.
    pub fn message_id(&self) -> Option<&str> {
        self.get(names::MESSAGE_ID).filter(|id| !id.is_empty())
    }

    pub fn correlation_id(&self) -> Option<&str> {
        self.get(names::CORRELATION_ID)
    }

    pub fn return_address(&self) -> Option<&str> {
        self.get(names::RETURN_ADDRESS)
    }

    pub fn message_type(&self) -> Option<&str> {
        self.get(names::MESSAGE_TYPE)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Headers {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}
