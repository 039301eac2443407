//! demo - in-memory order saga through the full pipeline
//!
//! 1. OrderPlaced で saga を開始（金額が上限を超える注文は失敗し続け error queue へ）
//! 2. PaymentReceived で ShipOrder を送信し saga を完了
//! 3. worker group を止めて結果を表示

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use courier_core::impls::{InMemoryNetwork, InMemorySagaStorage, InMemoryTransport};
use courier_core::saga::{CorrelationConfig, Saga, SagaHandler, SagaInstance};
use courier_core::{Bus, BusBuilder, BusConfig, BusError, Handler, Message, MessageContext};

const SHIPPING_QUEUE: &str = "shipping";
const AMOUNT_LIMIT: u64 = 1_000;
const PHASE_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OrderPlaced {
    order_id: String,
    amount: u64,
}

impl Message for OrderPlaced {
    const TYPE: &'static str = "demo.order-placed.v1";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PaymentReceived {
    order_id: String,
}

impl Message for PaymentReceived {
    const TYPE: &'static str = "demo.payment-received.v1";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ShipOrder {
    order_id: String,
    amount: u64,
}

impl Message for ShipOrder {
    const TYPE: &'static str = "demo.ship-order.v1";
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct OrderState {
    order_id: String,
    amount: u64,
}

struct OrderSaga;

impl Saga for OrderSaga {
    type Data = OrderState;
    const SAGA_TYPE: &'static str = "demo.order";

    fn correlate(config: &mut CorrelationConfig<OrderState>) {
        config
            .correlate::<OrderPlaced, _>(
                "order_id",
                |m| Some(m.order_id.clone()),
                |d| d.order_id.clone(),
                |d, v| d.order_id = v,
            )
            .correlate::<PaymentReceived, _>(
                "order_id",
                |m| Some(m.order_id.clone()),
                |d| d.order_id.clone(),
                |d, v| d.order_id = v,
            );
    }
}

#[async_trait]
impl SagaHandler<OrderPlaced> for OrderSaga {
    async fn handle(
        &self,
        message: OrderPlaced,
        saga: &mut SagaInstance<OrderState>,
        _ctx: &mut MessageContext<'_>,
    ) -> Result<(), BusError> {
        if message.amount > AMOUNT_LIMIT {
            return Err(BusError::handler(format!(
                "payment provider rejected order {} ({} > {AMOUNT_LIMIT})",
                message.order_id, message.amount
            )));
        }
        saga.data.amount = message.amount;
        tracing::info!(order_id = %message.order_id, saga_id = %saga.id(), "order accepted");
        Ok(())
    }
}

#[async_trait]
impl SagaHandler<PaymentReceived> for OrderSaga {
    async fn handle(
        &self,
        message: PaymentReceived,
        saga: &mut SagaInstance<OrderState>,
        ctx: &mut MessageContext<'_>,
    ) -> Result<(), BusError> {
        ctx.send(
            SHIPPING_QUEUE,
            &ShipOrder {
                order_id: message.order_id,
                amount: saga.data.amount,
            },
        )
        .await?;
        saga.mark_as_complete();
        Ok(())
    }
}

/// Logs every order, independently of the saga.
struct OrderAudit;

#[async_trait]
impl Handler<OrderPlaced> for OrderAudit {
    async fn handle(&self, message: OrderPlaced, ctx: &mut MessageContext<'_>) -> Result<(), BusError> {
        tracing::debug!(
            order_id = %message.order_id,
            amount = message.amount,
            message_id = ctx.message_id().unwrap_or_default(),
            "order placed"
        );
        Ok(())
    }
}

struct Scenario {
    network: InMemoryNetwork,
    storage: Arc<InMemorySagaStorage>,
    bus: Bus,
    orders: Vec<OrderPlaced>,
}

impl Scenario {
    fn build(config: BusConfig, orders: u32) -> anyhow::Result<Self> {
        let network = InMemoryNetwork::new();
        network.create_queue(&config.retry.error_queue_address);
        network.create_queue(SHIPPING_QUEUE);
        let storage = Arc::new(InMemorySagaStorage::new());
        let transport = Arc::new(InMemoryTransport::new(network.clone(), config.input_queue.clone()));

        let bus = BusBuilder::new(config)
            .transport(transport)
            .saga_storage(storage.clone())
            .register::<OrderPlaced, _>(OrderAudit)?
            .configure_handlers(|registry| {
                registry
                    .saga(OrderSaga)?
                    .initiated_by::<OrderPlaced>()?
                    .handles::<PaymentReceived>()?;
                Ok(())
            })?
            .expect_messages(&[OrderPlaced::TYPE, PaymentReceived::TYPE])
            .build()
            .context("could not build the bus")?;

        let orders = (1..=orders)
            .map(|n| OrderPlaced {
                order_id: format!("order-{n}"),
                amount: if n % 3 == 0 { AMOUNT_LIMIT * 5 } else { u64::from(n) * 100 },
            })
            .collect();

        Ok(Self {
            network,
            storage,
            bus,
            orders,
        })
    }

    fn accepted(&self) -> impl Iterator<Item = &OrderPlaced> {
        self.orders.iter().filter(|o| o.amount <= AMOUNT_LIMIT)
    }

    async fn run(&self) -> anyhow::Result<()> {
        let accepted = self.accepted().count();
        let rejected = self.orders.len() - accepted;
        let error_queue = self.bus.config().retry.error_queue_address.clone();

        for order in &self.orders {
            self.bus.send_local(order).await?;
        }
        self.wait_until("orders placed", || {
            self.storage.len() == accepted && self.network.count(&error_queue) == rejected
        })
        .await?;

        for order in self.accepted() {
            self.bus
                .send_local(&PaymentReceived {
                    order_id: order.order_id.clone(),
                })
                .await?;
        }
        self.wait_until("orders shipped", || {
            self.storage.is_empty() && self.network.count(SHIPPING_QUEUE) == accepted
        })
        .await
    }

    async fn wait_until(&self, phase: &str, done: impl Fn() -> bool) -> anyhow::Result<()> {
        let waited = tokio::time::timeout(PHASE_TIMEOUT, async {
            while !done() {
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
        .await;
        if waited.is_err() {
            bail!("{phase}: scenario did not settle within {PHASE_TIMEOUT:?}");
        }
        tracing::info!(phase, "phase complete");
        Ok(())
    }

    fn print_summary(&self) -> anyhow::Result<()> {
        println!("shipped:");
        for message in self.network.peek(SHIPPING_QUEUE) {
            let ship: ShipOrder =
                serde_json::from_slice(&message.body).context("shipping message is not valid JSON")?;
            println!("  {} amount={}", ship.order_id, ship.amount);
        }

        let error_queue = &self.bus.config().retry.error_queue_address;
        println!("dead-lettered ({error_queue}):");
        for message in self.network.peek(error_queue) {
            let first_line = message
                .headers
                .get(courier_core::domain::header_names::ERROR_DETAILS)
                .and_then(|details| details.lines().next())
                .unwrap_or("no details");
            println!("  {} {first_line}", message.message_id().unwrap_or("?"));
        }
        println!("active sagas: {}", self.storage.len());
        Ok(())
    }
}

pub async fn execute(config_path: Option<&Path>, orders: u32) -> anyhow::Result<()> {
    let config = match config_path {
        Some(path) => BusConfig::from_path(path)
            .with_context(|| format!("invalid configuration in {}", path.display()))?,
        None => BusConfig::default(),
    };

    let scenario = Scenario::build(config, orders)?;
    let workers = scenario.bus.start();

    let outcome = tokio::select! {
        result = scenario.run() => result,
        _ = tokio::signal::ctrl_c() => {
            tracing::warn!("interrupted; shutting down");
            Ok(())
        }
    };

    let report = workers.shutdown_and_join().await;
    tracing::info!(drained = report.drained, aborted = report.aborted, "workers stopped");

    outcome?;
    scenario.print_summary()
}
