//! Built-in steps of the default pipeline:
//! `RetryStrategyStep` → `DeserializeStep` → `DispatchStep`.

pub mod deserialize;
pub mod dispatch;

pub use self::deserialize::DeserializeStep;
pub use self::dispatch::{DispatchReport, DispatchStep, Dispatcher};
pub use crate::retry::step::RetryStrategyStep;
