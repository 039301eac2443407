//! InMemoryNetwork / InMemoryTransport - 開発・テスト用の transport
//!
//! # 学習ポイント
//! - parking_lot::Mutex + tokio::sync::Notify による async な待ち受け
//! - Drop での再配送（settle されなかった delivery はキューに戻る）
//! - commit 時の all-or-nothing な転送
//!
//! One network holds any number of named queues; every endpoint gets its
//! own `InMemoryTransport` bound to its input queue.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::domain::{Headers, OutgoingMessage, TransportMessage};
use crate::pipeline::TransactionContext;
use crate::ports::{Delivery, Transport, TransportError};

#[derive(Default)]
struct NetworkInner {
    queues: Mutex<HashMap<String, VecDeque<TransportMessage>>>,
    notify: Notify,
}

/// Shared set of queues. Cloning shares the same queues.
#[derive(Clone, Default)]
pub struct InMemoryNetwork {
    inner: Arc<NetworkInner>,
}

impl InMemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_queue(&self, name: &str) {
        self.inner
            .queues
            .lock()
            .entry(name.to_string())
            .or_default();
    }

    pub fn has_queue(&self, name: &str) -> bool {
        self.inner.queues.lock().contains_key(name)
    }

    /// Put every message on its destination queue, or none of them when a
    /// destination does not exist.
    pub fn deliver(&self, outgoing: Vec<OutgoingMessage>) -> Result<(), TransportError> {
        if outgoing.is_empty() {
            return Ok(());
        }
        {
            let mut queues = self.inner.queues.lock();
            if let Some(missing) = outgoing
                .iter()
                .find(|o| !queues.contains_key(&o.destination))
            {
                return Err(TransportError::UnknownQueue(missing.destination.clone()));
            }
            for OutgoingMessage {
                destination,
                message,
            } in outgoing
            {
                queues.entry(destination).or_default().push_back(message);
            }
        }
        self.inner.notify.notify_waiters();
        Ok(())
    }

    pub fn count(&self, queue: &str) -> usize {
        self.inner.queues.lock().get(queue).map_or(0, VecDeque::len)
    }

    /// Copies of the messages waiting in `queue`, oldest first.
    pub fn peek(&self, queue: &str) -> Vec<TransportMessage> {
        self.inner
            .queues
            .lock()
            .get(queue)
            .map(|q| q.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Remove and return the oldest message of `queue`.
    pub fn take(&self, queue: &str) -> Result<Option<TransportMessage>, TransportError> {
        self.inner
            .queues
            .lock()
            .get_mut(queue)
            .map(VecDeque::pop_front)
            .ok_or_else(|| TransportError::UnknownQueue(queue.to_string()))
    }

    fn requeue(&self, queue: &str, message: TransportMessage) {
        self.inner
            .queues
            .lock()
            .entry(queue.to_string())
            .or_default()
            .push_front(message);
        self.inner.notify.notify_waiters();
    }
}

pub struct InMemoryTransport {
    network: InMemoryNetwork,
    address: String,
}

impl InMemoryTransport {
    /// Bind to `address`, creating the queue if needed.
    pub fn new(network: InMemoryNetwork, address: impl Into<String>) -> Self {
        let address = address.into();
        network.create_queue(&address);
        Self { network, address }
    }

    pub fn network(&self) -> &InMemoryNetwork {
        &self.network
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    fn address(&self) -> &str {
        &self.address
    }

    async fn send(
        &self,
        destination: &str,
        message: TransportMessage,
        tx: &mut TransactionContext,
    ) -> Result<(), TransportError> {
        if !self.network.has_queue(destination) {
            return Err(TransportError::UnknownQueue(destination.to_string()));
        }
        tx.enlist(OutgoingMessage {
            destination: destination.to_string(),
            message,
        });
        Ok(())
    }

    async fn receive(
        &self,
        cancel: &CancellationToken,
    ) -> Result<Option<Box<dyn Delivery>>, TransportError> {
        loop {
            // register interest before looking, so a concurrent deliver is not missed
            let notified = self.network.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if let Some(message) = self.network.take(&self.address)? {
                return Ok(Some(Box::new(InMemoryDelivery {
                    network: self.network.clone(),
                    queue: self.address.clone(),
                    message,
                    settled: false,
                })));
            }

            tokio::select! {
                _ = cancel.cancelled() => return Ok(None),
                _ = &mut notified => {}
            }
        }
    }

    async fn deliver(&self, outgoing: Vec<OutgoingMessage>) -> Result<(), TransportError> {
        self.network.deliver(outgoing)
    }
}

/// A message taken off its queue. Goes back unless committed.
pub struct InMemoryDelivery {
    network: InMemoryNetwork,
    queue: String,
    message: TransportMessage,
    settled: bool,
}

impl InMemoryDelivery {
    fn return_to_queue(&mut self) {
        let message = std::mem::replace(
            &mut self.message,
            TransportMessage::new(Headers::new(), Vec::new()),
        );
        self.settled = true;
        self.network.requeue(&self.queue, message);
    }
}

#[async_trait]
impl Delivery for InMemoryDelivery {
    fn message(&self) -> &TransportMessage {
        &self.message
    }

    async fn commit(
        mut self: Box<Self>,
        outgoing: Vec<OutgoingMessage>,
    ) -> Result<(), TransportError> {
        // on failure the delivery is dropped unsettled and the message returns
        self.network.deliver(outgoing)?;
        self.settled = true;
        Ok(())
    }

    async fn abort(mut self: Box<Self>) -> Result<(), TransportError> {
        self.return_to_queue();
        Ok(())
    }
}

impl Drop for InMemoryDelivery {
    fn drop(&mut self) {
        if !self.settled {
            self.return_to_queue();
        }
    }
}
