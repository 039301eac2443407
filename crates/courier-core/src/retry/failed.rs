//! Failed<M> - second-level retry で handler に渡される失敗通知

use std::any::{TypeId, type_name};
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{BusError, Headers};
use crate::ports::ErrorEntry;
use crate::typed::handler::{DynFailedHandler, Handler, MessageContext};
use crate::typed::message::{IncomingMessage, Message};

/// A message whose ordinary delivery attempts are exhausted.
///
/// `errors` holds every recorded failure, untruncated.
#[derive(Debug, Clone)]
pub struct Failed<M> {
    pub message: M,
    pub headers: Headers,
    pub errors: Vec<ErrorEntry>,
}

impl<M> Failed<M> {
    pub fn last_error(&self) -> Option<&ErrorEntry> {
        self.errors.last()
    }
}

pub(crate) struct TypedFailedHandler<M, H> {
    handler: Arc<H>,
    _marker: PhantomData<fn(M)>,
}

impl<M, H> TypedFailedHandler<M, H> {
    pub(crate) fn new(handler: Arc<H>) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<M, H> DynFailedHandler for TypedFailedHandler<M, H>
where
    M: Message,
    H: Handler<Failed<M>> + 'static,
{
    fn handler_type(&self) -> TypeId {
        TypeId::of::<H>()
    }

    fn handler_name(&self) -> &'static str {
        type_name::<H>()
    }

    async fn invoke_failed(
        &self,
        message: &IncomingMessage,
        errors: &[ErrorEntry],
        ctx: &mut MessageContext<'_>,
    ) -> Result<(), BusError> {
        let message = message
            .downcast_ref::<M>()
            .ok_or_else(|| BusError::UnknownMessageType(message.message_type().to_string()))?
            .clone();
        let failed = Failed {
            message,
            headers: ctx.headers().clone(),
            errors: errors.to_vec(),
        };
        self.handler.handle(failed, ctx).await
    }
}
