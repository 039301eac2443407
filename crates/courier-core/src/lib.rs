//! courier-core
//!
//! Message-processing core of the Courier service bus.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, headers, envelope, errors）
//! - **ports**: 抽象化レイヤー（Transport, SagaStorage, ErrorTracker, Clock, IdGenerator）
//! - **pipeline**: step チェーン（anchor 相対の挿入・削除、組み込み step）
//! - **typed**: 型付き Message / Handler API、HandlerRegistry、PayloadCodec
//! - **saga**: correlation と楽観的並行制御つきの saga 実行
//! - **retry**: error tracking、retry step、second-level retry、error queue
//! - **app**: BusBuilder / Bus、設定、worker group、Ignorant
//! - **impls**: 実装（InMemoryTransport, InMemorySagaStorage など開発用）
//!
//! Delivery is at-least-once: a message leaves its queue only when the
//! pipeline completes and its outgoing messages are forwarded in the same
//! commit.

pub mod app;
pub mod domain;
pub mod impls;
pub mod pipeline;
pub mod ports;
pub mod retry;
pub mod saga;
pub mod typed;

pub use app::{Bus, BusBuilder, BusConfig, BuildError};
pub use domain::{BusError, ConfigError, ErrorKind, Headers, TransportMessage};
pub use typed::{Handler, Message, MessageContext};
