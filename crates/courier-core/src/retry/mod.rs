//! Retry - 失敗の記録、再配送、second-level retry、error queue
//!
//! # 構成
//! - `RetryPolicy`: 試行回数と error queue の設定
//! - `InMemoryErrorTracker`: message id ごとの失敗履歴
//! - `RetryStrategyStep`: pipeline の先頭に置く step
//! - `PoisonQueueErrorHandler`: error-details header 付きで error queue へ転送
//! - `Failed<M>`: second-level handler に渡す失敗通知

pub mod details;
pub mod error_tracker;
pub mod failed;
pub mod poison;
pub mod policy;
pub mod step;

pub use self::details::ErrorDetails;
pub use self::error_tracker::InMemoryErrorTracker;
pub use self::failed::Failed;
pub use self::poison::{ErrorHandler, PoisonQueueErrorHandler};
pub use self::policy::RetryPolicy;
pub use self::step::RetryStrategyStep;
