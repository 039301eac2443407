//! RetryStrategyStep - pipeline の先頭で失敗を捕まえる
//!
//! # 状態遷移（message id ごと）
//! Clean → Tracking(n) → { Recovered | Exhausted }
//!
//! - 成功: tracking entry を消す
//! - 失敗 (n < max): エラーを返し、transport が再配送する
//! - 失敗 (n >= max): outgoing を捨て、second level → error queue
//!
//! A message id that is already exhausted when it arrives (its quarantine did
//! not commit last time) skips the handlers and goes straight to quarantine.

use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{BusError, ErrorKind, header_names};
use crate::pipeline::steps::Dispatcher;
use crate::pipeline::{Next, Step, StepContext};
use crate::ports::{Clock, ErrorEntry, ErrorTracker};
use crate::retry::details::ErrorDetails;
use crate::retry::poison::ErrorHandler;
use crate::retry::policy::RetryPolicy;

pub struct RetryStrategyStep {
    policy: RetryPolicy,
    tracker: Arc<dyn ErrorTracker>,
    error_handler: Arc<dyn ErrorHandler>,
    clock: Arc<dyn Clock>,
    second_level: Option<Arc<Dispatcher>>,
}

impl RetryStrategyStep {
    pub fn new(
        policy: RetryPolicy,
        tracker: Arc<dyn ErrorTracker>,
        error_handler: Arc<dyn ErrorHandler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            policy,
            tracker,
            error_handler,
            clock,
            second_level: None,
        }
    }

    /// Dispatcher used for `Failed<M>` handlers when second-level retry is on.
    pub fn with_second_level(mut self, dispatcher: Arc<Dispatcher>) -> Self {
        self.second_level = Some(dispatcher);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn quarantine_without_id(&self, ctx: &mut StepContext) {
        tracing::warn!("received message without message id; moving it to the error queue");
        let details = ErrorDetails::new(vec![ErrorEntry {
            description: BusError::MissingHeader(header_names::MESSAGE_ID).describe(),
            at: self.clock.now(),
        }]);
        let (message, transaction) = ctx.split();
        self.error_handler
            .handle_poison_message(message, transaction, &details)
            .await;
    }

    async fn handle_exhausted(&self, ctx: &mut StepContext, message_id: &str) {
        let discarded = ctx.transaction_mut().discard_outgoing();
        if discarded > 0 {
            tracing::debug!(message_id, discarded, "discarded outgoing messages of failed delivery");
        }

        if self.policy.second_level_retry_enabled
            && let Some(dispatcher) = &self.second_level
        {
            let errors = self.recorded_errors(message_id);
            match dispatcher.dispatch_failed(ctx, &errors).await {
                Ok(true) => {
                    tracing::info!(message_id, "message handled by second-level handlers");
                    self.tracker.clean_up(message_id);
                    return;
                }
                Ok(false) => {}
                Err(error) => {
                    tracing::warn!(message_id, error = %error, "second-level handler failed");
                    self.tracker.register_error(message_id, error.describe());
                    ctx.transaction_mut().discard_outgoing();
                }
            }
        }

        let details = ErrorDetails::new(self.recorded_errors(message_id));
        let (message, transaction) = ctx.split();
        self.error_handler
            .handle_poison_message(message, transaction, &details)
            .await;

        if ctx.transaction().is_aborted() {
            tracing::warn!(message_id, "quarantine did not succeed; keeping error tracking entry");
        } else {
            self.tracker.clean_up(message_id);
        }
    }

    fn recorded_errors(&self, message_id: &str) -> Vec<ErrorEntry> {
        self.tracker
            .errors(message_id)
            .map(|tracked| tracked.entries)
            .unwrap_or_default()
    }
}

#[async_trait]
impl Step for RetryStrategyStep {
    async fn process(&self, ctx: &mut StepContext, next: Next<'_>) -> Result<(), BusError> {
        let Some(message_id) = ctx.message().message_id().map(str::to_string) else {
            self.quarantine_without_id(ctx).await;
            return Ok(());
        };
        let max_attempts = self.policy.max_delivery_attempts;

        if self.tracker.has_failed_too_many_times(&message_id, max_attempts) {
            self.handle_exhausted(ctx, &message_id).await;
            return Ok(());
        }

        let error = match next.run(ctx).await {
            Ok(()) => {
                self.tracker.clean_up(&message_id);
                return Ok(());
            }
            Err(error) => error,
        };

        let attempt = self.tracker.register_error(&message_id, error.describe());
        if self.policy.fail_fast_on_deserialization && error.kind() == ErrorKind::Deserialization {
            self.tracker.mark_as_final(&message_id);
        }

        if !self.tracker.has_failed_too_many_times(&message_id, max_attempts) {
            tracing::warn!(
                message_id = %message_id,
                attempt,
                max_attempts,
                error = %error,
                "delivery attempt failed; message will be redelivered"
            );
            return Err(error);
        }

        tracing::warn!(
            message_id = %message_id,
            attempt,
            max_attempts,
            kind = ?error.kind(),
            "message exhausted its delivery attempts"
        );
        self.handle_exhausted(ctx, &message_id).await;
        Ok(())
    }
}
