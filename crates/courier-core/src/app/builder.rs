//! BusBuilder - endpoint の構築とワイヤリング
//!
//! # 学習ポイント
//! - Builder パターンの実装
//! - 起動時検証（Fail-fast 設計）
//! - ports の既定実装（in-memory）による差し替え可能な構成

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::app::config::BusConfig;
use crate::app::ignorant::Ignorant;
use crate::app::periodic::spawn_periodic;
use crate::app::worker::{DeliveryOutcome, WorkerGroup, process_delivery};
use crate::domain::{BoxError, BusError, ConfigError, OutgoingMessage, header_names};
use crate::impls::InMemorySagaStorage;
use crate::pipeline::steps::{DeserializeStep, DispatchStep, Dispatcher};
use crate::pipeline::{Pipeline, PipelineBuilder};
use crate::ports::{Clock, ErrorTracker, IdGenerator, SagaStorage, SystemClock, Transport, UlidGenerator};
use crate::retry::{ErrorHandler, InMemoryErrorTracker, PoisonQueueErrorHandler, RetryStrategyStep};
use crate::saga::SagaEngine;
use crate::typed::{
    Handler, HandlerOrdering, HandlerRegistry, Message, Outbound, PayloadCodec, RegistryError,
};

type PipelineCustomizer = Box<dyn FnOnce(&mut PipelineBuilder) -> Result<(), ConfigError> + Send>;

/// BuildError は endpoint 構築時のエラー
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing message types: {0:?}. These messages were expected but nothing handles them.")]
    MissingMessageTypes(Vec<String>),

    #[error("no transport configured")]
    MissingTransport,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// BusBuilder は endpoint を構築
///
/// # 使用例
/// ```ignore
/// let bus = BusBuilder::new(BusConfig::new("orders"))
///     .transport(Arc::new(InMemoryTransport::new(network, "orders")))
///     .register::<OrderPlaced, _>(AuditHandler)?
///     .configure_handlers(|r| {
///         r.saga(OrderSaga)?.initiated_by::<OrderPlaced>()?;
///         Ok(())
///     })?
///     .expect_messages(&["shop.order.placed.v1"])
///     .build()?;
/// ```
///
/// # Fail-fast 設計
/// - 設定値の検証 (`BusConfig::validate`)
/// - expect_messages() の全 type に handler があるか
/// - customize_pipeline() の anchor が存在するか
pub struct BusBuilder {
    config: BusConfig,
    registry: HandlerRegistry,
    expected_messages: Option<Vec<String>>,
    customizers: Vec<PipelineCustomizer>,
    transport: Option<Arc<dyn Transport>>,
    saga_storage: Option<Arc<dyn SagaStorage>>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    error_tracker: Option<Arc<dyn ErrorTracker>>,
    error_handler: Option<Arc<dyn ErrorHandler>>,
}

impl BusBuilder {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            registry: HandlerRegistry::new(),
            expected_messages: None,
            customizers: Vec::new(),
            transport: None,
            saga_storage: None,
            clock: None,
            ids: None,
            error_tracker: None,
            error_handler: None,
        }
    }

    pub fn register<M: Message, H: Handler<M> + 'static>(
        mut self,
        handler: H,
    ) -> Result<Self, RegistryError> {
        self.registry.register::<M, H>(handler)?;
        Ok(self)
    }

    /// Full access to the registry: sagas, base types, second-level handlers.
    pub fn configure_handlers(
        mut self,
        configure: impl FnOnce(&mut HandlerRegistry) -> Result<(), RegistryError>,
    ) -> Result<Self, RegistryError> {
        configure(&mut self.registry)?;
        Ok(self)
    }

    pub fn ordering(mut self, ordering: HandlerOrdering) -> Self {
        self.registry.set_ordering(ordering);
        self
    }

    pub fn expect_messages(mut self, message_types: &[&str]) -> Self {
        self.expected_messages = Some(message_types.iter().map(|t| t.to_string()).collect());
        self
    }

    /// Edit the default pipeline (insert, remove) before it is frozen.
    pub fn customize_pipeline(
        mut self,
        customize: impl FnOnce(&mut PipelineBuilder) -> Result<(), ConfigError> + Send + 'static,
    ) -> Self {
        self.customizers.push(Box::new(customize));
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn saga_storage(mut self, storage: Arc<dyn SagaStorage>) -> Self {
        self.saga_storage = Some(storage);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn error_tracker(mut self, tracker: Arc<dyn ErrorTracker>) -> Self {
        self.error_tracker = Some(tracker);
        self
    }

    pub fn error_handler(mut self, handler: Arc<dyn ErrorHandler>) -> Self {
        self.error_handler = Some(handler);
        self
    }

    pub fn build(self) -> Result<Bus, BuildError> {
        let config = self.config;
        config.validate()?;

        if let Some(expected) = &self.expected_messages {
            let missing: Vec<String> = expected
                .iter()
                .filter(|t| !self.registry.is_handled(t))
                .cloned()
                .collect();
            if !missing.is_empty() {
                return Err(BuildError::MissingMessageTypes(missing));
            }
        }

        let transport = self.transport.ok_or(BuildError::MissingTransport)?;
        if transport.address() != config.input_queue {
            return Err(ConfigError::invalid(
                "input_queue",
                format!(
                    "is '{}' but the transport listens on '{}'",
                    config.input_queue,
                    transport.address()
                ),
            )
            .into());
        }

        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids: Arc<dyn IdGenerator> = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(Arc::clone(&clock))));
        let saga_storage: Arc<dyn SagaStorage> = self
            .saga_storage
            .unwrap_or_else(|| Arc::new(InMemorySagaStorage::new()));
        let error_tracker: Arc<dyn ErrorTracker> = self
            .error_tracker
            .unwrap_or_else(|| Arc::new(InMemoryErrorTracker::new(Arc::clone(&clock))));
        let error_handler: Arc<dyn ErrorHandler> = self.error_handler.unwrap_or_else(|| {
            Arc::new(PoisonQueueErrorHandler::new(
                Arc::clone(&transport),
                config.retry.error_queue_address.clone(),
                config.retry.error_details_max_length,
            ))
        });

        let codec = PayloadCodec::new();
        let registry = Arc::new(self.registry);
        let outbound = Arc::new(Outbound::new(
            Arc::clone(&transport),
            codec,
            Arc::clone(&ids),
            Arc::clone(&clock),
        ));
        let sagas = Arc::new(SagaEngine::new(saga_storage, ids));
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&registry),
            sagas,
            Arc::clone(&outbound),
        ));

        let mut pipeline = PipelineBuilder::new();
        pipeline
            .append(
                RetryStrategyStep::new(
                    config.retry.clone(),
                    Arc::clone(&error_tracker),
                    error_handler,
                    Arc::clone(&clock),
                )
                .with_second_level(Arc::clone(&dispatcher)),
            )
            .append(DeserializeStep::new(Arc::clone(&registry), codec))
            .append(DispatchStep::new(dispatcher));
        for customize in self.customizers {
            customize(&mut pipeline)?;
        }
        let pipeline = pipeline.build();
        tracing::debug!(steps = ?pipeline.step_names(), "pipeline configured");

        let ignorant = Arc::new(Ignorant::new(config.silence_periods.clone(), Arc::clone(&clock)));

        Ok(Bus {
            config,
            transport,
            pipeline,
            registry,
            outbound,
            error_tracker,
            ignorant,
            clock,
        })
    }
}

/// Bus は構築済みの endpoint
///
/// - `send` / `send_local`: handler の外からメッセージを送る
/// - `process_next`: 1 件だけ処理（テスト・デバッグ用）
/// - `start`: worker group を起動
pub struct Bus {
    config: BusConfig,
    transport: Arc<dyn Transport>,
    pipeline: Pipeline,
    registry: Arc<HandlerRegistry>,
    outbound: Arc<Outbound>,
    error_tracker: Arc<dyn ErrorTracker>,
    ignorant: Arc<Ignorant>,
    clock: Arc<dyn Clock>,
}

impl Bus {
    /// Send `message` to `destination` right away. Returns its message id.
    pub async fn send<M: Message>(&self, destination: &str, message: &M) -> Result<String, BusError> {
        let prepared = self.outbound.prepare(message, None)?;
        let message_id = prepared
            .headers
            .get(header_names::MESSAGE_ID)
            .unwrap_or_default()
            .to_string();
        self.transport
            .deliver(vec![OutgoingMessage {
                destination: destination.to_string(),
                message: prepared,
            }])
            .await?;
        Ok(message_id)
    }

    /// Send `message` to this endpoint's own input queue.
    pub async fn send_local<M: Message>(&self, message: &M) -> Result<String, BusError> {
        let address = self.transport.address().to_string();
        self.send(&address, message).await
    }

    /// Receive and process exactly one message. `None` once `cancel` fires.
    pub async fn process_next(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<DeliveryOutcome>, BusError> {
        let Some(delivery) = self.transport.receive(cancel).await? else {
            return Ok(None);
        };
        Ok(Some(process_delivery(&self.pipeline, delivery).await?))
    }

    /// Spawn the configured number of workers plus the error tracker cleanup.
    pub fn start(&self) -> WorkerGroup {
        let cancel = CancellationToken::new();
        let cleanup = {
            let tracker = Arc::clone(&self.error_tracker);
            let clock = Arc::clone(&self.clock);
            let max_age = self.config.error_tracking_max_age;
            spawn_periodic(
                "error-tracker-cleanup",
                self.config.error_tracking_cleanup_interval,
                cancel.clone(),
                Arc::clone(&self.ignorant),
                move || {
                    let tracker = Arc::clone(&tracker);
                    let clock = Arc::clone(&clock);
                    async move {
                        let cutoff = clock.now() - chrono::Duration::from_std(max_age)?;
                        let removed = tracker.remove_older_than(cutoff);
                        if removed > 0 {
                            tracing::debug!(removed, "removed stale error tracking entries");
                        }
                        Ok::<(), BoxError>(())
                    }
                },
            )
        };

        tracing::info!(
            input_queue = %self.config.input_queue,
            workers = self.config.workers,
            "starting workers"
        );
        WorkerGroup::spawn(
            self.config.workers,
            Arc::clone(&self.transport),
            self.pipeline.clone(),
            Arc::clone(&self.ignorant),
            cancel,
            self.config.shutdown_timeout,
            vec![cleanup],
        )
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn address(&self) -> &str {
        self.transport.address()
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn error_tracker(&self) -> &Arc<dyn ErrorTracker> {
        &self.error_tracker
    }

    pub fn ignorant(&self) -> &Ignorant {
        &self.ignorant
    }
}
