//! Transport port - メッセージの送受信
//!
//! Transport は at-least-once を提供します:
//! - `receive` で取り出したメッセージは `Delivery` として worker が所有
//! - `commit` で outgoing をまとめて送信し、元メッセージを取り除く
//! - `abort` で outgoing を捨て、元メッセージを再配送する

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::domain::{OutgoingMessage, TransportMessage};
use crate::pipeline::TransactionContext;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("destination queue '{0}' does not exist")]
    UnknownQueue(String),

    #[error("delivery was already settled")]
    AlreadySettled,

    #[error("transport failure: {0}")]
    Other(String),
}

/// A received message owned by exactly one worker until settled.
#[async_trait]
pub trait Delivery: Send {
    fn message(&self) -> &TransportMessage;

    /// Forward `outgoing` and remove the message from its queue, atomically.
    async fn commit(self: Box<Self>, outgoing: Vec<OutgoingMessage>) -> Result<(), TransportError>;

    /// Discard the attempt; the message becomes visible again.
    async fn abort(self: Box<Self>) -> Result<(), TransportError>;
}

#[async_trait]
pub trait Transport: Send + Sync {
    /// Input queue of this endpoint (used as return address).
    fn address(&self) -> &str;

    /// Enlist a message in `tx`. Nothing is visible to receivers before commit.
    async fn send(
        &self,
        destination: &str,
        message: TransportMessage,
        tx: &mut TransactionContext,
    ) -> Result<(), TransportError> {
        tx.enlist(OutgoingMessage {
            destination: destination.to_string(),
            message,
        });
        Ok(())
    }

    /// Wait for the next message, returning `None` once `cancel` fires.
    async fn receive(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<Box<dyn Delivery>>, TransportError>;

    /// Deliver messages sent outside of any received message.
    async fn deliver(&self, outgoing: Vec<OutgoingMessage>) -> Result<(), TransportError>;
}
