//! Saga lifecycle and optimistic concurrency through the full pipeline.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Barrier;
use tokio_util::sync::CancellationToken;

use courier_core::app::DeliveryOutcome;
use courier_core::saga::{CorrelationConfig, Saga, SagaHandler, SagaInstance};
use courier_core::{BusBuilder, BusError, Message, MessageContext};

use common::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OrderPlaced {
    order_id: String,
}

impl Message for OrderPlaced {
    const TYPE: &'static str = "test.order-placed.v1";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct LineAdded {
    order_id: String,
    line: String,
}

impl Message for LineAdded {
    const TYPE: &'static str = "test.line-added.v1";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct OrderShipped {
    order_id: String,
}

impl Message for OrderShipped {
    const TYPE: &'static str = "test.order-shipped.v1";
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct OrderData {
    order_id: String,
    lines: Vec<String>,
}

/// Optional rendezvous for the first `gate_for` line additions.
#[derive(Default)]
struct OrderSaga {
    line_calls: AtomicUsize,
    gate: Option<(Arc<Barrier>, usize)>,
}

impl Saga for OrderSaga {
    type Data = OrderData;
    const SAGA_TYPE: &'static str = "test.order-saga";

    fn correlate(config: &mut CorrelationConfig<OrderData>) {
        config
            .correlate::<OrderPlaced, _>(
                "order_id",
                |m| Some(m.order_id.clone()),
                |d| d.order_id.clone(),
                |d, v| d.order_id = v,
            )
            .correlate::<LineAdded, _>(
                "order_id",
                |m| Some(m.order_id.clone()),
                |d| d.order_id.clone(),
                |d, v| d.order_id = v,
            )
            .correlate::<OrderShipped, _>(
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
        _message: OrderPlaced,
        _saga: &mut SagaInstance<OrderData>,
        _ctx: &mut MessageContext<'_>,
    ) -> Result<(), BusError> {
        Ok(())
    }
}

#[async_trait]
impl SagaHandler<LineAdded> for OrderSaga {
    async fn handle(
        &self,
        message: LineAdded,
        saga: &mut SagaInstance<OrderData>,
        _ctx: &mut MessageContext<'_>,
    ) -> Result<(), BusError> {
        let call = self.line_calls.fetch_add(1, Ordering::SeqCst);
        if let Some((barrier, gated)) = &self.gate
            && call < *gated
        {
            barrier.wait().await;
        }
        saga.data.lines.push(message.line);
        Ok(())
    }
}

#[async_trait]
impl SagaHandler<OrderShipped> for OrderSaga {
    async fn handle(
        &self,
        _message: OrderShipped,
        saga: &mut SagaInstance<OrderData>,
        _ctx: &mut MessageContext<'_>,
    ) -> Result<(), BusError> {
        saga.mark_as_complete();
        Ok(())
    }
}

fn with_saga(builder: BusBuilder, saga: OrderSaga) -> BusBuilder {
    builder
        .configure_handlers(move |registry| {
            registry
                .saga(saga)?
                .initiated_by::<OrderPlaced>()?
                .handles::<LineAdded>()?
                .handles::<OrderShipped>()?;
            Ok(())
        })
        .unwrap()
}

fn stored_lines(endpoint: &Endpoint) -> Vec<(u64, Vec<String>)> {
    endpoint
        .storage
        .records(OrderSaga::SAGA_TYPE)
        .into_iter()
        .map(|record| {
            let data: OrderData = serde_json::from_value(record.data).unwrap();
            (record.revision, data.lines)
        })
        .collect()
}

fn line(order_id: &str, line: &str) -> LineAdded {
    LineAdded {
        order_id: order_id.to_string(),
        line: line.to_string(),
    }
}

#[tokio::test]
async fn test_saga_is_created_updated_and_deleted_on_completion() {
    let endpoint = endpoint(config(), |b| with_saga(b, OrderSaga::default()));
    let order_id = "order-1".to_string();

    endpoint
        .bus
        .send_local(&OrderPlaced {
            order_id: order_id.clone(),
        })
        .await
        .unwrap();
    endpoint.drain().await;
    assert_eq!(stored_lines(&endpoint), vec![(0, Vec::<String>::new())]);

    endpoint.bus.send_local(&line(&order_id, "book")).await.unwrap();
    endpoint.drain().await;
    assert_eq!(stored_lines(&endpoint), vec![(1, vec!["book".to_string()])]);

    endpoint
        .bus
        .send_local(&OrderShipped { order_id })
        .await
        .unwrap();
    endpoint.drain().await;
    assert!(endpoint.storage.is_empty());
    assert_eq!(endpoint.network.count(ERROR_QUEUE), 0);
}

#[tokio::test]
async fn test_message_for_unknown_instance_is_not_correlated_and_committed() {
    let endpoint = endpoint(config(), |b| with_saga(b, OrderSaga::default()));

    endpoint.bus.send_local(&line("nobody", "pen")).await.unwrap();
    let outcome = endpoint
        .bus
        .process_next(&CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(outcome, Some(DeliveryOutcome::Committed));
    assert!(endpoint.storage.is_empty());
    assert_eq!(endpoint.network.count(INPUT), 0);
    assert_eq!(endpoint.network.count(ERROR_QUEUE), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_updates_conflict_and_the_loser_is_retried() {
    let barrier = Arc::new(Barrier::new(2));
    let saga = OrderSaga {
        line_calls: AtomicUsize::new(0),
        gate: Some((barrier, 2)),
    };
    let mut config = config();
    config.workers = 2;
    let endpoint = endpoint(config, |b| with_saga(b, saga));
    let order_id = "order-42";

    endpoint
        .bus
        .send_local(&OrderPlaced {
            order_id: order_id.to_string(),
        })
        .await
        .unwrap();
    endpoint.drain().await;

    endpoint.bus.send_local(&line(order_id, "a")).await.unwrap();
    endpoint.bus.send_local(&line(order_id, "b")).await.unwrap();
    let workers = endpoint.bus.start();

    let settled = tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            let stored = stored_lines(&endpoint);
            if stored.first().is_some_and(|(_, lines)| lines.len() == 2)
                && endpoint.network.count(INPUT) == 0
            {
                return stored;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("both lines should be stored");
    workers.shutdown_and_join().await;

    let (revision, mut lines) = settled.into_iter().next().unwrap();
    lines.sort();
    assert_eq!(revision, 2);
    assert_eq!(lines, vec!["a".to_string(), "b".to_string()]);
    assert_eq!(endpoint.network.count(ERROR_QUEUE), 0);
}
