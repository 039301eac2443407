use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::BusError;
use crate::pipeline::{Next, Step, StepContext};
use crate::typed::codec::PayloadCodec;
use crate::typed::message::IncomingMessage;
use crate::typed::registry::HandlerRegistry;

/// Decodes the transport body into an [`IncomingMessage`] stored in the context.
pub struct DeserializeStep {
    registry: Arc<HandlerRegistry>,
    codec: PayloadCodec,
}

impl DeserializeStep {
    pub fn new(registry: Arc<HandlerRegistry>, codec: PayloadCodec) -> Self {
        Self { registry, codec }
    }
}

#[async_trait]
impl Step for DeserializeStep {
    async fn process(&self, ctx: &mut StepContext, next: Next<'_>) -> Result<(), BusError> {
        // an earlier step may already have produced the message
        if !ctx.contains::<IncomingMessage>() {
            let incoming = self.codec.decode(&self.registry, ctx.message())?;
            tracing::debug!(message_type = incoming.message_type(), "message deserialized");
            ctx.insert(incoming);
        }
        next.run(ctx).await
    }
}
