//! Dispatch - 解決した handler を順番に呼び出す
//!
//! Handlers run sequentially in resolution order. The first error stops the
//! dispatch and propagates to the retry step.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::BusError;
use crate::pipeline::{Next, Step, StepContext};
use crate::ports::ErrorEntry;
use crate::saga::SagaEngine;
use crate::typed::handler::{Invocation, MessageContext};
use crate::typed::message::IncomingMessage;
use crate::typed::outbound::Outbound;
use crate::typed::registry::HandlerRegistry;

/// Summary of one dispatch, stored in the step context.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    pub handled: usize,
    /// Sagas that found no instance for the message and could not start one.
    pub not_correlated: Vec<&'static str>,
}

pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    sagas: Arc<SagaEngine>,
    outbound: Arc<Outbound>,
}

impl Dispatcher {
    pub fn new(registry: Arc<HandlerRegistry>, sagas: Arc<SagaEngine>, outbound: Arc<Outbound>) -> Self {
        Self {
            registry,
            sagas,
            outbound,
        }
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub async fn dispatch(&self, ctx: &mut StepContext) -> Result<DispatchReport, BusError> {
        let message = ctx
            .get::<IncomingMessage>()
            .cloned()
            .ok_or(BusError::NotDeserialized)?;
        let handlers = self.registry.handlers_for(&message);
        if handlers.is_empty() {
            return Err(BusError::NoHandlers(message.message_type().to_string()));
        }

        let mut report = DispatchReport::default();
        {
            let (transport_message, transaction) = ctx.split();
            let mut message_ctx =
                MessageContext::new(&transport_message.headers, transaction, &self.outbound);

            for (handler, view) in handlers {
                tracing::debug!(
                    handler = handler.handler_name(),
                    message_type = view.message_type(),
                    "invoking handler"
                );
                match handler.invoke(&view, &mut message_ctx, &self.sagas).await? {
                    Invocation::Handled => report.handled += 1,
                    Invocation::NotCorrelated { saga_type } => report.not_correlated.push(saga_type),
                }
            }
        }

        ctx.insert(report.clone());
        Ok(report)
    }

    /// Run second-level handlers for the deserialized message.
    ///
    /// Returns `false` when there is nothing to run, i.e. the message was
    /// never deserialized or no handler is registered for `Failed<M>`.
    pub async fn dispatch_failed(
        &self,
        ctx: &mut StepContext,
        errors: &[ErrorEntry],
    ) -> Result<bool, BusError> {
        let Some(message) = ctx.get::<IncomingMessage>().cloned() else {
            return Ok(false);
        };
        let handlers = self.registry.failed_handlers_for(message.message_type());
        if handlers.is_empty() {
            return Ok(false);
        }

        let (transport_message, transaction) = ctx.split();
        let mut message_ctx =
            MessageContext::new(&transport_message.headers, transaction, &self.outbound);
        for handler in handlers {
            tracing::info!(
                handler = handler.handler_name(),
                message_type = message.message_type(),
                "invoking second-level handler"
            );
            handler.invoke_failed(&message, errors, &mut message_ctx).await?;
        }
        Ok(true)
    }
}

pub struct DispatchStep {
    dispatcher: Arc<Dispatcher>,
}

impl DispatchStep {
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

#[async_trait]
impl Step for DispatchStep {
    async fn process(&self, ctx: &mut StepContext, next: Next<'_>) -> Result<(), BusError> {
        let report = self.dispatcher.dispatch(ctx).await?;
        tracing::debug!(
            handled = report.handled,
            not_correlated = report.not_correlated.len(),
            "message dispatched"
        );
        next.run(ctx).await
    }
}
