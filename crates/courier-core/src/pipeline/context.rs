//! Per-delivery context objects.
//!
//! `StepContext` is created by the worker for exactly one received message and
//! dropped after the delivery is committed or aborted. Steps share data through
//! its typed bag (one value per type).

use std::any::{Any, TypeId};
use std::collections::HashMap;

use crate::domain::{OutgoingMessage, TransportMessage};

/// Outgoing effects of one delivery, released only on commit.
#[derive(Debug, Default)]
pub struct TransactionContext {
    outgoing: Vec<OutgoingMessage>,
    aborted: bool,
}

impl TransactionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enlist(&mut self, message: OutgoingMessage) {
        self.outgoing.push(message);
    }

    pub fn outgoing(&self) -> &[OutgoingMessage] {
        &self.outgoing
    }

    /// Roll back everything enlisted so far. Returns how many were dropped.
    pub fn discard_outgoing(&mut self) -> usize {
        let dropped = self.outgoing.len();
        self.outgoing.clear();
        dropped
    }

    /// Force the delivery to be aborted even if the pipeline returns `Ok`.
    pub fn abort(&mut self) {
        self.aborted = true;
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    pub fn into_outgoing(self) -> Vec<OutgoingMessage> {
        self.outgoing
    }
}

pub struct StepContext {
    message: TransportMessage,
    transaction: TransactionContext,
    items: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl StepContext {
    pub fn new(message: TransportMessage) -> Self {
        Self {
            message,
            transaction: TransactionContext::new(),
            items: HashMap::new(),
        }
    }

    pub fn message(&self) -> &TransportMessage {
        &self.message
    }

    pub fn message_mut(&mut self) -> &mut TransportMessage {
        &mut self.message
    }

    pub fn transaction(&self) -> &TransactionContext {
        &self.transaction
    }

    pub fn transaction_mut(&mut self) -> &mut TransactionContext {
        &mut self.transaction
    }

    /// Borrow the incoming message and the transaction at the same time.
    pub fn split(&mut self) -> (&TransportMessage, &mut TransactionContext) {
        (&self.message, &mut self.transaction)
    }

    pub fn insert<T: Any + Send + Sync>(&mut self, value: T) -> Option<T> {
        self.items
            .insert(TypeId::of::<T>(), Box::new(value))
            .and_then(|old| old.downcast::<T>().ok())
            .map(|old| *old)
    }

    pub fn get<T: Any + Send + Sync>(&self) -> Option<&T> {
        self.items
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn get_mut<T: Any + Send + Sync>(&mut self) -> Option<&mut T> {
        self.items
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut::<T>())
    }

    pub fn remove<T: Any + Send + Sync>(&mut self) -> Option<T> {
        self.items
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }

    pub fn contains<T: Any + Send + Sync>(&self) -> bool {
        self.items.contains_key(&TypeId::of::<T>())
    }

    pub fn into_transaction(self) -> TransactionContext {
        self.transaction
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Headers;

    #[derive(Debug, PartialEq)]
    struct Marker(u32);

    fn context() -> StepContext {
        StepContext::new(TransportMessage::new(Headers::new(), b"{}".to_vec()))
    }

    #[test]
    fn typed_bag_holds_one_value_per_type() {
        let mut ctx = context();
        assert_eq!(ctx.insert(Marker(1)), None);
        assert_eq!(ctx.insert(Marker(2)), Some(Marker(1)));
        assert_eq!(ctx.get::<Marker>(), Some(&Marker(2)));

        ctx.get_mut::<Marker>().unwrap().0 = 3;
        assert_eq!(ctx.remove::<Marker>(), Some(Marker(3)));
        assert!(!ctx.contains::<Marker>());
    }

    #[test]
    fn discard_outgoing_rolls_back_enlisted_messages() {
        let mut tx = TransactionContext::new();
        tx.enlist(OutgoingMessage {
            destination: "billing".to_string(),
            message: TransportMessage::new(Headers::new(), Vec::new()),
        });

        assert_eq!(tx.discard_outgoing(), 1);
        assert!(tx.outgoing().is_empty());
        assert!(!tx.is_aborted());
    }
}
