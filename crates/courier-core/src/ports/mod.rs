//! Ports - 外部コラボレータへの抽象化レイヤー
//!
//! Transport / SagaStorage / ErrorTracker / Clock / IdGenerator を trait として
//! 定義し、実装の詳細（MQ, SQL, ...）を core から切り離します。

pub mod clock;
pub mod error_tracker;
pub mod id_generator;
pub mod saga_storage;
pub mod transport;

pub use self::clock::{Clock, FixedClock, SystemClock};
pub use self::error_tracker::{ErrorEntry, ErrorTracker, TrackedErrors};
pub use self::id_generator::{IdGenerator, UlidGenerator};
pub use self::saga_storage::{
    CorrelationEntry, CorrelationValue, SagaRecord, SagaStorage, StorageError, StoreOutcome,
};
pub use self::transport::{Delivery, Transport, TransportError};
