//! App - アプリケーション層
//!
//! ports と pipeline を組み合わせて endpoint を動かします。
//!
//! # 主要コンポーネント
//! - **BusBuilder / Bus**: 構築とワイヤリング、送信、worker 起動
//! - **BusConfig**: JSON 設定と起動時検証
//! - **WorkerGroup**: receive → pipeline → commit/abort のループ
//! - **Ignorant**: バックグラウンドエラーのログ間引き
//! - **spawn_periodic**: 定期タスク（error tracker の掃除など）

pub mod builder;
pub mod config;
pub mod ignorant;
pub mod periodic;
pub mod worker;

pub use self::builder::{Bus, BuildError, BusBuilder};
pub use self::config::BusConfig;
pub use self::ignorant::Ignorant;
pub use self::periodic::spawn_periodic;
pub use self::worker::{DeliveryOutcome, ShutdownReport, WorkerGroup, process_delivery};
