//! Saga - 複数メッセージにまたがる状態付き会話
//!
//! # 構成
//! - `Saga` / `SagaHandler<M>`: ユーザーが実装する trait
//! - `CorrelationConfig`: message field → saga data property の対応付け
//! - `SagaInstance`: handler に渡される saga data（revision 付き）
//! - `SagaEngine`: find → load/create → handle → insert/update/delete

pub mod correlation;
pub mod engine;
pub mod instance;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::BusError;
use crate::typed::handler::MessageContext;
use crate::typed::message::Message;

pub use self::correlation::{CorrelationConfig, CorrelationMap};
pub use self::engine::SagaEngine;
pub use self::instance::SagaInstance;

/// Persisted state of one saga instance.
pub trait SagaData: Serialize + DeserializeOwned + Default + Send + Sync + 'static {}

impl<T> SagaData for T where T: Serialize + DeserializeOwned + Default + Send + Sync + 'static {}

/// Saga は saga type と correlation を宣言する
///
/// # 使用例
/// ```ignore
/// impl Saga for OrderSaga {
///     type Data = OrderData;
///     const SAGA_TYPE: &'static str = "shop.order-saga";
///
///     fn correlate(config: &mut CorrelationConfig<OrderData>) {
///         config.correlate::<OrderPlaced, _>(
///             "order_id",
///             |m| Some(m.order_id.clone()),
///             |d| d.order_id.clone(),
///             |d, v| d.order_id = v,
///         );
///     }
/// }
/// ```
pub trait Saga: Send + Sync + 'static {
    type Data: SagaData;

    const SAGA_TYPE: &'static str;

    fn correlate(config: &mut CorrelationConfig<Self::Data>);
}

#[async_trait]
pub trait SagaHandler<M: Message>: Saga {
    async fn handle(
        &self,
        message: M,
        saga: &mut SagaInstance<Self::Data>,
        ctx: &mut MessageContext<'_>,
    ) -> Result<(), BusError>;
}
