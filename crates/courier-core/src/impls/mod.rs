//! Impls - ports の in-memory 実装（開発用・テスト用）
//!
//! # 含まれる実装
//! - **InMemoryNetwork / InMemoryTransport**: キュー集合と endpoint transport
//! - **InMemorySagaStorage**: revision 比較付きの saga storage
//!
//! The error tracker lives in `retry` next to the step that uses it.

pub mod inmem_saga_storage;
pub mod inmem_transport;

pub use self::inmem_saga_storage::InMemorySagaStorage;
pub use self::inmem_transport::{InMemoryDelivery, InMemoryNetwork, InMemoryTransport};
