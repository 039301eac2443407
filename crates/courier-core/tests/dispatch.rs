//! Handler resolution across base types, ordering and reply headers.

mod common;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use courier_core::app::DeliveryOutcome;
use courier_core::domain::header_names;
use courier_core::typed::HandlerOrdering;
use courier_core::{BusError, Handler, Message, MessageContext};

use common::*;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CustomerEvent {
    customer_id: String,
}

impl Message for CustomerEvent {
    const TYPE: &'static str = "test.customer-event.v1";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CustomerMoved {
    customer_id: String,
    city: String,
}

impl Message for CustomerMoved {
    const TYPE: &'static str = "test.customer-moved.v1";
}

impl From<&CustomerMoved> for CustomerEvent {
    fn from(moved: &CustomerMoved) -> Self {
        Self {
            customer_id: moved.customer_id.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Receipt {
    value: i32,
}

impl Message for Receipt {
    const TYPE: &'static str = "test.receipt.v1";
}

struct Recorder {
    name: &'static str,
    trace: Trace,
}

#[async_trait]
impl Handler<CustomerEvent> for Recorder {
    async fn handle(&self, message: CustomerEvent, _ctx: &mut MessageContext<'_>) -> Result<(), BusError> {
        self.trace
            .lock()
            .push(format!("{}:event:{}", self.name, message.customer_id));
        Ok(())
    }
}

#[async_trait]
impl Handler<CustomerMoved> for Recorder {
    async fn handle(&self, message: CustomerMoved, _ctx: &mut MessageContext<'_>) -> Result<(), BusError> {
        self.trace.lock().push(format!("{}:moved:{}", self.name, message.city));
        Ok(())
    }
}

struct Audit(Trace);

#[async_trait]
impl Handler<CustomerMoved> for Audit {
    async fn handle(&self, _message: CustomerMoved, _ctx: &mut MessageContext<'_>) -> Result<(), BusError> {
        self.0.lock().push("audit".to_string());
        Ok(())
    }
}

fn moved() -> CustomerMoved {
    CustomerMoved {
        customer_id: "c-1".to_string(),
        city: "Osaka".to_string(),
    }
}

#[tokio::test]
async fn test_base_type_handler_receives_derived_message_once() {
    let trace = Trace::default();
    let endpoint = endpoint(config(), |b| {
        let projection = Recorder {
            name: "projection",
            trace: trace.clone(),
        };
        b.configure_handlers(|registry| {
            registry.register::<CustomerEvent, _>(projection)?;
            registry.derive::<CustomerMoved, CustomerEvent>(|m| CustomerEvent::from(m))?;
            Ok(())
        })
        .unwrap()
    });

    endpoint.bus.send_local(&moved()).await.unwrap();
    endpoint.drain().await;

    assert_eq!(*trace.lock(), vec!["projection:event:c-1".to_string()]);
    assert_eq!(endpoint.network.count(ERROR_QUEUE), 0);
}

#[tokio::test]
async fn test_pinned_handlers_run_first_in_declared_order() {
    let trace = Trace::default();
    let endpoint = endpoint(config(), |b| {
        let recorder = Recorder {
            name: "recorder",
            trace: trace.clone(),
        };
        let audit = Audit(trace.clone());
        b.register::<CustomerMoved, _>(recorder)
            .unwrap()
            .register::<CustomerMoved, _>(audit)
            .unwrap()
            .ordering(HandlerOrdering::first::<Audit>().then::<Recorder>())
    });

    endpoint.bus.send_local(&moved()).await.unwrap();
    endpoint.drain().await;

    assert_eq!(
        *trace.lock(),
        vec!["audit".to_string(), "recorder:moved:Osaka".to_string()]
    );
}

struct Forwarder;

#[async_trait]
impl Handler<Ping> for Forwarder {
    async fn handle(&self, message: Ping, ctx: &mut MessageContext<'_>) -> Result<(), BusError> {
        ctx.send(INPUT, &Invoice { value: message.value }).await
    }
}

#[async_trait]
impl Handler<Invoice> for Forwarder {
    async fn handle(&self, message: Invoice, ctx: &mut MessageContext<'_>) -> Result<(), BusError> {
        ctx.reply(&Receipt { value: message.value }).await
    }
}

#[tokio::test]
async fn test_replies_keep_the_conversation_correlation_id() {
    let endpoint = endpoint(config(), |b| {
        b.register::<Ping, _>(Forwarder)
            .unwrap()
            .register::<Invoice, _>(Forwarder)
            .unwrap()
    });
    let cancel = CancellationToken::new();

    let ping_id = endpoint.bus.send_local(&Ping { value: 9 }).await.unwrap();
    assert_eq!(
        endpoint.bus.process_next(&cancel).await.unwrap(),
        Some(DeliveryOutcome::Committed)
    );
    let invoice = endpoint.network.peek(INPUT).remove(0);
    assert_eq!(invoice.headers.message_type(), Some(Invoice::TYPE));
    assert_eq!(invoice.headers.correlation_id(), Some(ping_id.as_str()));
    assert_ne!(invoice.message_id(), Some(ping_id.as_str()));

    assert_eq!(
        endpoint.bus.process_next(&cancel).await.unwrap(),
        Some(DeliveryOutcome::Committed)
    );
    let receipt = endpoint.network.peek(INPUT).remove(0);
    assert_eq!(receipt.headers.message_type(), Some(Receipt::TYPE));
    assert_eq!(receipt.headers.correlation_id(), Some(ping_id.as_str()));
    assert_eq!(receipt.headers.return_address(), Some(INPUT));
    assert!(receipt.headers.contains(header_names::SENT_TIME));
}
