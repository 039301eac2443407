//! Poison queue - 使い切ったメッセージを error queue へ移す
//!
//! The forwarded copy is enlisted in the delivery's transaction, so moving it
//! to the error queue and removing it from the input queue commit together.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{TransportMessage, header_names};
use crate::pipeline::TransactionContext;
use crate::ports::Transport;
use crate::retry::details::ErrorDetails;

/// Final destination of exhausted messages. Never fails: problems are
/// logged and the transaction is aborted so the message stays on its queue.
#[async_trait]
pub trait ErrorHandler: Send + Sync {
    async fn handle_poison_message(
        &self,
        message: &TransportMessage,
        transaction: &mut TransactionContext,
        details: &ErrorDetails,
    );
}

pub struct PoisonQueueErrorHandler {
    transport: Arc<dyn Transport>,
    error_queue: String,
    details_max_length: usize,
}

impl PoisonQueueErrorHandler {
    pub fn new(
        transport: Arc<dyn Transport>,
        error_queue: impl Into<String>,
        details_max_length: usize,
    ) -> Self {
        Self {
            transport,
            error_queue: error_queue.into(),
            details_max_length,
        }
    }

    pub fn error_queue(&self) -> &str {
        &self.error_queue
    }
}

#[async_trait]
impl ErrorHandler for PoisonQueueErrorHandler {
    async fn handle_poison_message(
        &self,
        message: &TransportMessage,
        transaction: &mut TransactionContext,
        details: &ErrorDetails,
    ) {
        let mut headers = message.headers.clone();
        headers.insert(
            header_names::ERROR_DETAILS,
            details.render_truncated(self.details_max_length),
        );
        headers.insert(header_names::SOURCE_QUEUE, self.transport.address());
        let poisoned = TransportMessage::new(headers, message.body.clone());

        let message_id = message.message_id().unwrap_or("<none>");
        match self
            .transport
            .send(&self.error_queue, poisoned, transaction)
            .await
        {
            Ok(()) => tracing::info!(
                message_id,
                error_queue = %self.error_queue,
                attempts = details.entries().len(),
                "moving message to error queue"
            ),
            Err(error) => {
                tracing::error!(
                    message_id,
                    error_queue = %self.error_queue,
                    error = %error,
                    "could not forward message to error queue; it stays on the input queue"
                );
                transaction.abort();
            }
        }
    }
}
