//! Domain identifiers (strongly-typed IDs).
//!
//! ULID ベースの `Id<T>` を Phantom type で型付けしています。
//! - `MessageId`: outgoing messages (rendered into the message-id header)
//! - `SagaId`: saga instances (opaque, stable for the conversation lifetime)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// IdMarker は各 ID 型のマーカー trait
pub trait IdMarker: Send + Sync + 'static {
    /// Display で使うプレフィックス（例: "msg-", "saga-"）
    fn prefix() -> &'static str;
}

/// ジェネリック ID 型
///
/// `T` は実行時には存在しないマーカーで、`SagaId` と `MessageId` の混同を
/// コンパイル時に防ぎます。
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Message {}

impl IdMarker for Message {
    fn prefix() -> &'static str {
        "msg-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Saga {}

impl IdMarker for Saga {
    fn prefix() -> &'static str {
        "saga-"
    }
}

/// Identifier assigned to every outgoing message.
pub type MessageId = Id<Message>;

/// Identifier of a saga instance.
pub type SagaId = Id<Saga>;
