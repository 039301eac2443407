//! Handler trait - メッセージを処理する Handler の定義
//!
//! - 表層: `Handler<M>`（型安全、ユーザーが実装）
//! - 内部: `DynHandler`（object-safe、registry に格納）
//! - `TypedHandler<M, H>` が型消去のブリッジ

use std::any::{TypeId, type_name};
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{BusError, Headers};
use crate::pipeline::TransactionContext;
use crate::ports::ErrorEntry;
use crate::saga::SagaEngine;
use crate::typed::message::{IncomingMessage, Message};
use crate::typed::outbound::Outbound;

/// What a handler sees of the delivery it runs in.
///
/// Outgoing messages are enlisted in the delivery's transaction and only
/// leave when the whole delivery commits.
pub struct MessageContext<'a> {
    headers: &'a Headers,
    transaction: &'a mut TransactionContext,
    outbound: &'a Outbound,
}

impl<'a> MessageContext<'a> {
    pub(crate) fn new(
        headers: &'a Headers,
        transaction: &'a mut TransactionContext,
        outbound: &'a Outbound,
    ) -> Self {
        Self {
            headers,
            transaction,
            outbound,
        }
    }

    /// Headers of the message being handled.
    pub fn headers(&self) -> &Headers {
        self.headers
    }

    pub fn message_id(&self) -> Option<&str> {
        self.headers.message_id()
    }

    pub async fn send<M: Message>(&mut self, destination: &str, message: &M) -> Result<(), BusError> {
        let outgoing = self.outbound.prepare(message, Some(self.headers))?;
        self.outbound
            .transport()
            .send(destination, outgoing, self.transaction)
            .await?;
        Ok(())
    }

    /// Send to the return address of the message being handled.
    pub async fn reply<M: Message>(&mut self, message: &M) -> Result<(), BusError> {
        let destination = self
            .headers
            .return_address()
            .ok_or(BusError::MissingHeader(crate::domain::header_names::RETURN_ADDRESS))?
            .to_string();
        self.send(&destination, message).await
    }

    /// Number of messages enlisted so far in this delivery.
    pub fn pending_outgoing(&self) -> usize {
        self.transaction.outgoing().len()
    }
}

/// Handler は `M` を処理する
///
/// # 使用例
/// ```ignore
/// struct AuditHandler;
///
/// #[async_trait]
/// impl Handler<OrderPlaced> for AuditHandler {
///     async fn handle(&self, message: OrderPlaced, ctx: &mut MessageContext<'_>) -> Result<(), BusError> {
///         tracing::info!(order_id = %message.order_id, "order placed");
///         Ok(())
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<M: Send + 'static>: Send + Sync {
    async fn handle(&self, message: M, ctx: &mut MessageContext<'_>) -> Result<(), BusError>;
}

/// Result of invoking one resolved handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Invocation {
    Handled,
    /// A saga handler found no instance and may not start one.
    NotCorrelated { saga_type: &'static str },
}

#[async_trait]
pub(crate) trait DynHandler: Send + Sync {
    /// Identity used by `HandlerOrdering`.
    fn handler_type(&self) -> TypeId;

    fn handler_name(&self) -> &'static str;

    async fn invoke(
        &self,
        message: &IncomingMessage,
        ctx: &mut MessageContext<'_>,
        sagas: &SagaEngine,
    ) -> Result<Invocation, BusError>;
}

/// Second-level counterpart of [`DynHandler`].
#[async_trait]
pub(crate) trait DynFailedHandler: Send + Sync {
    fn handler_type(&self) -> TypeId;

    fn handler_name(&self) -> &'static str;

    async fn invoke_failed(
        &self,
        message: &IncomingMessage,
        errors: &[ErrorEntry],
        ctx: &mut MessageContext<'_>,
    ) -> Result<(), BusError>;
}

pub(crate) struct TypedHandler<M, H> {
    handler: Arc<H>,
    _marker: PhantomData<fn(M)>,
}

impl<M, H> TypedHandler<M, H> {
    pub(crate) fn new(handler: Arc<H>) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<M, H> DynHandler for TypedHandler<M, H>
where
    M: Message,
    H: Handler<M> + 'static,
{
    fn handler_type(&self) -> TypeId {
        TypeId::of::<H>()
    }

    fn handler_name(&self) -> &'static str {
        type_name::<H>()
    }

    async fn invoke(
        &self,
        message: &IncomingMessage,
        ctx: &mut MessageContext<'_>,
        _sagas: &SagaEngine,
    ) -> Result<Invocation, BusError> {
        let message = message
            .downcast_ref::<M>()
            .ok_or_else(|| BusError::UnknownMessageType(message.message_type().to_string()))?
            .clone();
        self.handler.handle(message, ctx).await?;
        Ok(Invocation::Handled)
    }
}
