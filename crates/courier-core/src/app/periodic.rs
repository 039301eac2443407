//! PeriodicTask - 一定間隔で動くバックグラウンド処理
//!
//! Failures are logged through the Ignorant so a persistent condition does
//! not flood the log.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::app::ignorant::Ignorant;
use crate::domain::BoxError;

/// Run `task` every `interval` until `cancel` fires. The first run happens
/// one interval after start.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    interval: Duration,
    cancel: CancellationToken,
    ignorant: Arc<Ignorant>,
    mut task: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), BoxError>> + Send,
{
    tokio::spawn(async move {
        let mut ticks = tokio::time::interval(interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticks.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticks.tick() => {}
            }
            if let Err(error) = task().await {
                if ignorant.is_to_be_ignored(error.as_ref()) {
                    tracing::debug!(task = name, error = %error, "periodic task failed (silenced)");
                } else {
                    tracing::warn!(task = name, error = %error, "periodic task failed");
                }
            }
        }
        tracing::debug!(task = name, "periodic task stopped");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::SystemClock;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test(start_paused = true)]
    async fn runs_every_interval_until_cancelled() {
        let runs = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        let ignorant = Arc::new(Ignorant::new(
            vec![Duration::from_secs(60)],
            Arc::new(SystemClock),
        ));

        let handle = spawn_periodic("count", Duration::from_secs(10), cancel.clone(), ignorant, {
            let runs = Arc::clone(&runs);
            move || {
                let runs = Arc::clone(&runs);
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Err::<(), BoxError>("still failing".into())
                }
            }
        });

        tokio::time::sleep(Duration::from_secs(35)).await;
        cancel.cancel();
        handle.await.unwrap();

        assert_eq!(runs.load(Ordering::SeqCst), 3);
    }
}
