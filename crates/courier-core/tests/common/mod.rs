//! テスト用の共通部品（メッセージ型、handler、endpoint の組み立て）

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use courier_core::impls::{InMemoryNetwork, InMemorySagaStorage, InMemoryTransport};
use courier_core::{Bus, BusBuilder, BusConfig, BusError, Handler, Message, MessageContext};

pub const INPUT: &str = "orders";
pub const ERROR_QUEUE: &str = "error";
pub const BILLING: &str = "billing";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Ping {
    pub value: i32,
}

impl Message for Ping {
    const TYPE: &'static str = "test.ping.v1";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Invoice {
    pub value: i32,
}

impl Message for Invoice {
    const TYPE: &'static str = "test.invoice.v1";
}

/// Counts invocations, optionally sends an invoice, then fails or succeeds.
#[derive(Clone, Default)]
pub struct PingHandler {
    pub calls: Arc<AtomicUsize>,
    pub fail_with: Option<String>,
    pub send_invoice: bool,
}

impl PingHandler {
    pub fn failing(message: impl Into<String>) -> Self {
        Self {
            fail_with: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler<Ping> for PingHandler {
    async fn handle(&self, message: Ping, ctx: &mut MessageContext<'_>) -> Result<(), BusError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.send_invoice {
            ctx.send(BILLING, &Invoice { value: message.value }).await?;
        }
        match &self.fail_with {
            Some(reason) => Err(BusError::handler(reason.clone())),
            None => Ok(()),
        }
    }
}

/// Records what a handler saw, in call order.
pub type Trace = Arc<Mutex<Vec<String>>>;

pub struct Endpoint {
    pub network: InMemoryNetwork,
    pub storage: Arc<InMemorySagaStorage>,
    pub bus: Bus,
}

pub fn config() -> BusConfig {
    let mut config = BusConfig::new(INPUT);
    config.retry.error_queue_address = ERROR_QUEUE.to_string();
    config
}

/// Build an endpoint on a fresh network with `orders`, `error` and `billing` queues.
pub fn endpoint(config: BusConfig, configure: impl FnOnce(BusBuilder) -> BusBuilder) -> Endpoint {
    let network = InMemoryNetwork::new();
    network.create_queue(BILLING);
    if !config.retry.error_queue_address.is_empty() {
        network.create_queue(&config.retry.error_queue_address);
    }
    endpoint_on(network, config, configure)
}

pub fn endpoint_on(
    network: InMemoryNetwork,
    config: BusConfig,
    configure: impl FnOnce(BusBuilder) -> BusBuilder,
) -> Endpoint {
    let storage = Arc::new(InMemorySagaStorage::new());
    let builder = BusBuilder::new(config)
        .transport(Arc::new(InMemoryTransport::new(network.clone(), INPUT)))
        .saga_storage(storage.clone());
    let bus = configure(builder).build().expect("endpoint should build");
    Endpoint {
        network,
        storage,
        bus,
    }
}

impl Endpoint {
    /// Process until the input queue is empty (bounded).
    pub async fn drain(&self) -> usize {
        let cancel = CancellationToken::new();
        let mut processed = 0;
        while self.network.count(INPUT) > 0 && processed < 100 {
            self.bus.process_next(&cancel).await.expect("delivery should settle");
            processed += 1;
        }
        processed
    }
}
