//! Correlation - message field と saga data property の対応付け
//!
//! Accessor closures are given explicitly at configuration time: `extract`
//! reads the value off the message, `get`/`set` read and seed the saga data
//! property. At most one property may apply per message type.

use std::collections::HashMap;
use std::sync::Arc;

use crate::ports::{CorrelationEntry, CorrelationValue};
use crate::typed::message::{IncomingMessage, Message};
use crate::typed::registry::RegistryError;

type Extract = Box<dyn Fn(&IncomingMessage) -> Option<CorrelationValue> + Send + Sync>;
type Seed<D> = Box<dyn Fn(&IncomingMessage, &mut D) + Send + Sync>;
type Read<D> = Box<dyn Fn(&D) -> CorrelationValue + Send + Sync>;

/// Correlation of one message type to one saga data property.
pub struct Correlation<D> {
    message_type: &'static str,
    property: &'static str,
    extract: Extract,
    seed: Seed<D>,
    read: Read<D>,
}

impl<D> Correlation<D> {
    pub fn message_type(&self) -> &'static str {
        self.message_type
    }

    pub fn property(&self) -> &'static str {
        self.property
    }

    /// `None` when the message carries no value for the property.
    pub fn extract(&self, message: &IncomingMessage) -> Option<CorrelationValue> {
        (self.extract)(message)
    }

    /// Copy the correlation value from `message` into freshly created data.
    pub fn seed(&self, message: &IncomingMessage, data: &mut D) {
        (self.seed)(message, data)
    }

    pub fn read(&self, data: &D) -> CorrelationValue {
        (self.read)(data)
    }
}

/// Collects the correlations a saga declares.
pub struct CorrelationConfig<D> {
    saga_type: &'static str,
    correlations: Vec<Correlation<D>>,
}

impl<D: Send + Sync + 'static> CorrelationConfig<D> {
    pub(crate) fn new(saga_type: &'static str) -> Self {
        Self {
            saga_type,
            correlations: Vec::new(),
        }
    }

    pub fn correlate<M, V>(
        &mut self,
        property: &'static str,
        extract: impl Fn(&M) -> Option<V> + Send + Sync + 'static,
        get: impl Fn(&D) -> V + Send + Sync + 'static,
        set: impl Fn(&mut D, V) + Send + Sync + 'static,
    ) -> &mut Self
    where
        M: Message,
        V: Into<CorrelationValue> + 'static,
    {
        let extract = Arc::new(extract);
        let seed_extract = Arc::clone(&extract);

        self.correlations.push(Correlation {
            message_type: M::TYPE,
            property,
            extract: Box::new(move |message| {
                message
                    .downcast_ref::<M>()
                    .and_then(|m| extract(m))
                    .map(Into::into)
            }),
            seed: Box::new(move |message, data| {
                if let Some(value) = message.downcast_ref::<M>().and_then(|m| seed_extract(m)) {
                    set(data, value);
                }
            }),
            read: Box::new(move |data| get(data).into()),
        });
        self
    }

    pub(crate) fn build(self) -> Result<CorrelationMap<D>, RegistryError> {
        let mut by_message: HashMap<&'static str, Arc<Correlation<D>>> = HashMap::new();
        let mut all = Vec::with_capacity(self.correlations.len());

        for correlation in self.correlations {
            if by_message.contains_key(correlation.message_type) {
                return Err(RegistryError::AmbiguousCorrelation {
                    saga_type: self.saga_type,
                    message_type: correlation.message_type,
                });
            }
            let correlation = Arc::new(correlation);
            by_message.insert(correlation.message_type, Arc::clone(&correlation));
            all.push(correlation);
        }

        Ok(CorrelationMap { by_message, all })
    }
}

/// Validated correlations of one saga type.
pub struct CorrelationMap<D> {
    by_message: HashMap<&'static str, Arc<Correlation<D>>>,
    all: Vec<Arc<Correlation<D>>>,
}

impl<D> CorrelationMap<D> {
    pub fn for_message(&self, message_type: &str) -> Option<&Arc<Correlation<D>>> {
        self.by_message.get(message_type)
    }

    /// Current value of every declared property, each property once.
    pub fn entries(&self, data: &D) -> Vec<CorrelationEntry> {
        let mut entries: Vec<CorrelationEntry> = Vec::new();
        for correlation in &self.all {
            if entries.iter().any(|e| e.property == correlation.property) {
                continue;
            }
            entries.push(CorrelationEntry {
                property: correlation.property,
                value: correlation.read(data),
            });
        }
        entries
    }

    pub fn message_types(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.all.iter().map(|c| c.message_type)
    }
}
