//! WorkerGroup - 固定数の worker が transport から受信して pipeline を回す
//!
//! # フロー（worker 1 つ）
//! 1. `Transport::receive` で delivery を取得（cancel と競合）
//! 2. StepContext を作って pipeline を実行
//! 3. Ok かつ abort されていなければ commit、それ以外は abort
//!
//! Shutdown stops new receives at once; in-flight deliveries get
//! `shutdown_timeout` to finish, then the remaining tasks are aborted and
//! their messages are redelivered later.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::app::ignorant::Ignorant;
use crate::pipeline::{Pipeline, StepContext};
use crate::ports::{Delivery, Transport, TransportError};

const RECEIVE_BACKOFF: Duration = Duration::from_millis(250);

/// How a delivery was settled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Committed,
    Aborted,
}

/// Run one delivery through `pipeline` and settle it.
pub async fn process_delivery(
    pipeline: &Pipeline,
    delivery: Box<dyn Delivery>,
) -> Result<DeliveryOutcome, TransportError> {
    let mut ctx = StepContext::new(delivery.message().clone());
    let result = pipeline.execute(&mut ctx).await;
    let transaction = ctx.into_transaction();

    match result {
        Ok(()) if !transaction.is_aborted() => {
            delivery.commit(transaction.into_outgoing()).await?;
            Ok(DeliveryOutcome::Committed)
        }
        Ok(()) => {
            delivery.abort().await?;
            Ok(DeliveryOutcome::Aborted)
        }
        Err(error) => {
            tracing::debug!(error = %error, "pipeline failed; aborting delivery");
            delivery.abort().await?;
            Ok(DeliveryOutcome::Aborted)
        }
    }
}

/// What `shutdown_and_join` observed. Only workers are counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    pub drained: usize,
    pub aborted: usize,
}

/// Worker group handle.
/// - `request_shutdown()` で全 worker が新しい receive をやめる
/// - `shutdown_and_join()` で drain を待ち、timeout 後は abort
pub struct WorkerGroup {
    cancel: CancellationToken,
    workers: Vec<JoinHandle<()>>,
    background: Vec<JoinHandle<()>>,
    shutdown_timeout: Duration,
}

impl WorkerGroup {
    /// Spawn `n` workers. `background` tasks are stopped together with them.
    pub(crate) fn spawn(
        n: usize,
        transport: Arc<dyn Transport>,
        pipeline: Pipeline,
        ignorant: Arc<Ignorant>,
        cancel: CancellationToken,
        shutdown_timeout: Duration,
        background: Vec<JoinHandle<()>>,
    ) -> Self {
        let workers = (0..n)
            .map(|worker_id| {
                let transport = Arc::clone(&transport);
                let pipeline = pipeline.clone();
                let ignorant = Arc::clone(&ignorant);
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    worker_loop(worker_id, transport, pipeline, ignorant, cancel).await;
                })
            })
            .collect();

        Self {
            cancel,
            workers,
            background,
            shutdown_timeout,
        }
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn request_shutdown(&self) {
        self.cancel.cancel();
    }

    /// Shutdown and wait for all workers, at most `shutdown_timeout`.
    ///
    /// Returns only after every task has finished or been aborted and awaited,
    /// so abandoned deliveries are back on their queue by then.
    pub async fn shutdown_and_join(self) -> ShutdownReport {
        self.request_shutdown();
        let deadline = Instant::now() + self.shutdown_timeout;
        let mut report = ShutdownReport::default();

        for join in self.workers {
            if join_until(deadline, join).await {
                report.drained += 1;
            } else {
                report.aborted += 1;
            }
        }
        for join in self.background {
            if !join_until(deadline, join).await {
                tracing::debug!("background task aborted at shutdown");
            }
        }

        if report.aborted > 0 {
            tracing::warn!(
                aborted = report.aborted,
                timeout_ms = self.shutdown_timeout.as_millis() as u64,
                "workers did not finish in time and were aborted"
            );
        }
        tracing::info!(drained = report.drained, "worker group stopped");
        report
    }
}

/// `true` when the task finished before `deadline`. Otherwise it is aborted
/// and awaited, which drops whatever it still held.
async fn join_until(deadline: Instant, mut join: JoinHandle<()>) -> bool {
    if tokio::time::timeout_at(deadline, &mut join).await.is_ok() {
        return true;
    }
    join.abort();
    let _ = join.await;
    false
}

async fn worker_loop(
    worker_id: usize,
    transport: Arc<dyn Transport>,
    pipeline: Pipeline,
    ignorant: Arc<Ignorant>,
    cancel: CancellationToken,
) {
    tracing::debug!(worker_id, "worker started");

    while !cancel.is_cancelled() {
        let delivery = match transport.receive(&cancel).await {
            Ok(Some(delivery)) => delivery,
            Ok(None) => {
                tokio::task::yield_now().await;
                continue;
            }
            Err(error) => {
                if !ignorant.is_to_be_ignored(&error) {
                    tracing::warn!(worker_id, error = %error, "receive failed");
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(RECEIVE_BACKOFF) => continue,
                }
            }
        };

        let message_id = delivery.message().message_id().map(str::to_string);
        match process_delivery(&pipeline, delivery).await {
            Ok(outcome) => tracing::debug!(worker_id, ?message_id, ?outcome, "delivery settled"),
            Err(error) => {
                if !ignorant.is_to_be_ignored(&error) {
                    tracing::error!(worker_id, ?message_id, error = %error, "could not settle delivery");
                }
            }
        }
    }

    tracing::debug!(worker_id, "worker stopped");
}
