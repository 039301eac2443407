//! Typed layer - 型付きメッセージと Handler
//!
//! # 構成
//! - `Message`: 型名付きペイロード
//! - `Handler<M>` → `DynHandler`: 型消去して registry に格納
//! - `HandlerRegistry`: message type → handlers（base type 含む）
//! - `PayloadCodec`: JSON と TransportMessage の変換
//! - `Outbound`: 送信メッセージへの default header 付与

pub mod codec;
pub mod handler;
pub mod message;
pub mod ordering;
pub mod outbound;
pub mod registry;

pub use self::codec::{JSON_CONTENT_TYPE, PayloadCodec};
pub use self::handler::{Handler, Invocation, MessageContext};
pub use self::message::{IncomingMessage, Message};
pub use self::ordering::HandlerOrdering;
pub use self::outbound::Outbound;
pub use self::registry::{HandlerRegistry, RegistryError, SagaRegistration};
