//! Ignorant - 同じバックグラウンドエラーのログを間引く
//!
//! # 状態遷移（fingerprint ごと）
//! - 初回: 記録して無視 (true)
//! - 現在の silence period 内: 無視 (true)
//! - period を越えた: 報告 (false)、その時刻から次の period で計測し直す
//!
//! The period list is walked in order and its last entry repeats. All time
//! comes from the injected `Clock`.

use std::any::type_name;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::ports::Clock;
use crate::ports::clock::elapsed_between;

struct Silence {
    since: DateTime<Utc>,
    period_index: usize,
}

pub struct Ignorant {
    periods: Vec<Duration>,
    clock: Arc<dyn Clock>,
    silenced: Mutex<HashMap<String, Silence>>,
}

impl Ignorant {
    pub fn new(periods: Vec<Duration>, clock: Arc<dyn Clock>) -> Self {
        Self {
            periods,
            clock,
            silenced: Mutex::new(HashMap::new()),
        }
    }

    /// `true` when `error` should not be logged right now.
    pub fn is_to_be_ignored<E: StdError + ?Sized + 'static>(&self, error: &E) -> bool {
        self.is_fingerprint_ignored(fingerprint(error))
    }

    fn is_fingerprint_ignored(&self, fingerprint: String) -> bool {
        let Some(last) = self.periods.len().checked_sub(1) else {
            return false;
        };
        let now = self.clock.now();
        let mut silenced = self.silenced.lock();

        let silence = match silenced.entry(fingerprint) {
            Entry::Vacant(vacant) => {
                vacant.insert(Silence {
                    since: now,
                    period_index: 0,
                });
                return true;
            }
            Entry::Occupied(occupied) => occupied.into_mut(),
        };

        let period = self.periods[silence.period_index.min(last)];
        if elapsed_between(silence.since, now) < period {
            return true;
        }
        silence.since = now;
        silence.period_index = silence.period_index.saturating_add(1);
        false
    }

    /// Forget every fingerprint.
    pub fn reset(&self) {
        self.silenced.lock().clear();
    }
}

/// Type name, message and the messages of the source chain.
/// A boxed `dyn Error` has no concrete type name, so it is keyed by messages only.
fn fingerprint<E: StdError + ?Sized + 'static>(error: &E) -> String {
    let mut fingerprint = match type_name::<E>() {
        name if name.starts_with("dyn ") => error.to_string(),
        name => format!("{name}: {error}"),
    };
    let mut source = error.source();
    while let Some(cause) = source {
        fingerprint.push_str(" <- ");
        fingerprint.push_str(&cause.to_string());
        source = cause.source();
    }
    fingerprint
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::FixedClock;
    use chrono::TimeZone;

    #[derive(Debug, thiserror::Error)]
    #[error("connection refused")]
    struct ConnectionRefused;

    #[derive(Debug, thiserror::Error)]
    #[error("disk full")]
    struct DiskFull;

    const MINUTE: Duration = Duration::from_secs(60);

    fn ignorant(periods: Vec<Duration>) -> (Arc<FixedClock>, Ignorant) {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        ));
        (clock.clone(), Ignorant::new(periods, clock))
    }

    fn tenth_minutes(n: u64) -> Duration {
        Duration::from_secs(6 * n)
    }

    #[test]
    fn single_period_reports_once_per_period() {
        let (clock, ignorant) = ignorant(vec![MINUTE]);

        assert!(ignorant.is_to_be_ignored(&ConnectionRefused));
        clock.advance(tenth_minutes(9));
        assert!(ignorant.is_to_be_ignored(&ConnectionRefused));
        clock.advance(tenth_minutes(2));
        assert!(!ignorant.is_to_be_ignored(&ConnectionRefused));
        assert!(ignorant.is_to_be_ignored(&ConnectionRefused));

        clock.advance(tenth_minutes(9));
        assert!(ignorant.is_to_be_ignored(&ConnectionRefused));
        clock.advance(tenth_minutes(1));
        assert!(!ignorant.is_to_be_ignored(&ConnectionRefused));
    }

    #[test]
    fn periods_advance_and_last_one_repeats() {
        let (clock, ignorant) = ignorant(vec![MINUTE, MINUTE * 10]);

        assert!(ignorant.is_to_be_ignored(&ConnectionRefused));
        clock.advance(tenth_minutes(11));
        assert!(!ignorant.is_to_be_ignored(&ConnectionRefused)); // t = 1.1min

        clock.advance(MINUTE); // t = 2.1min
        assert!(ignorant.is_to_be_ignored(&ConnectionRefused));

        clock.advance(MINUTE * 9); // t = 11.1min
        assert!(!ignorant.is_to_be_ignored(&ConnectionRefused));

        clock.advance(MINUTE * 9); // t = 20.1min, still inside the repeated 10min period
        assert!(ignorant.is_to_be_ignored(&ConnectionRefused));
        clock.advance(MINUTE);
        assert!(!ignorant.is_to_be_ignored(&ConnectionRefused));
    }

    #[test]
    fn fingerprints_are_independent_and_reset_clears_them() {
        let (clock, ignorant) = ignorant(vec![MINUTE]);

        assert!(ignorant.is_to_be_ignored(&ConnectionRefused));
        clock.advance(MINUTE * 2);
        assert!(ignorant.is_to_be_ignored(&DiskFull));
        assert!(!ignorant.is_to_be_ignored(&ConnectionRefused));

        ignorant.reset();
        assert!(ignorant.is_to_be_ignored(&ConnectionRefused));
    }

    #[derive(Debug, thiserror::Error)]
    #[error("cleanup failed")]
    struct CleanupFailed {
        #[source]
        source: DiskFull,
    }

    #[test]
    fn boxed_errors_are_fingerprinted_by_message() {
        let (_, ignorant) = ignorant(vec![MINUTE]);
        let first: Box<dyn StdError + Send + Sync> = "timeout".into();
        let other: Box<dyn StdError + Send + Sync> = "refused".into();

        assert_eq!(fingerprint(first.as_ref()), "timeout");
        assert!(ignorant.is_to_be_ignored(first.as_ref()));
        assert!(ignorant.is_to_be_ignored(other.as_ref()));
    }

    #[test]
    fn fingerprint_includes_type_and_source_chain() {
        let concrete = CleanupFailed { source: DiskFull };
        assert!(fingerprint(&concrete).ends_with("CleanupFailed: cleanup failed <- disk full"));

        let boxed: Box<dyn StdError + Send + Sync> = Box::new(CleanupFailed { source: DiskFull });
        let flat: Box<dyn StdError + Send + Sync> = "cleanup failed".into();
        assert_eq!(fingerprint(boxed.as_ref()), "cleanup failed <- disk full");
        assert_ne!(fingerprint(boxed.as_ref()), fingerprint(flat.as_ref()));
    }

    #[test]
    fn no_periods_never_ignores() {
        let (_, ignorant) = ignorant(Vec::new());
        assert!(!ignorant.is_to_be_ignored(&DiskFull));
    }
}
