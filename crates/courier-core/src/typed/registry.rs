//! HandlerRegistry - message type → handler の明示的な登録表
//!
//! # 学習ポイント
//! - HashMap での型消去された trait object の管理
//! - `derive::<D, B>` で宣言した base type を辿る handler 解決
//! - Saga の登録と correlation の検証（起動時に fail fast）
//!
//! Everything is built once at startup and read-only afterwards.

use std::any::type_name;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use crate::retry::failed::{Failed, TypedFailedHandler};
use crate::saga::correlation::{CorrelationConfig, CorrelationMap};
use crate::saga::engine::SagaInvoker;
use crate::saga::{Saga, SagaHandler};
use crate::typed::handler::{DynFailedHandler, DynHandler, Handler, TypedHandler};
use crate::typed::message::{IncomingMessage, Message};
use crate::typed::ordering::HandlerOrdering;

/// RegistryError は HandlerRegistry の登録エラー
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("handler '{handler}' is already registered for message type '{message_type}'")]
    AlreadyRegistered {
        message_type: &'static str,
        handler: &'static str,
    },

    #[error("'{derived}' is already declared to derive from '{base}'")]
    DuplicateDerivation {
        derived: &'static str,
        base: &'static str,
    },

    #[error("saga '{saga_type}' declares more than one correlation for message type '{message_type}'")]
    AmbiguousCorrelation {
        saga_type: &'static str,
        message_type: &'static str,
    },

    #[error("saga '{saga_type}' handles '{message_type}' but declares no correlation for it")]
    MissingCorrelation {
        saga_type: &'static str,
        message_type: &'static str,
    },
}

type Decoder = fn(&[u8]) -> Result<IncomingMessage, serde_json::Error>;
type Upcast = Arc<dyn Fn(&IncomingMessage) -> Option<IncomingMessage> + Send + Sync>;

struct MessageTypeEntry {
    decode: Decoder,
    bases: Vec<(&'static str, Upcast)>,
}

impl MessageTypeEntry {
    fn new<M: Message>() -> Self {
        Self {
            decode: decode_as::<M>,
            bases: Vec::new(),
        }
    }
}

fn decode_as<M: Message>(body: &[u8]) -> Result<IncomingMessage, serde_json::Error> {
    serde_json::from_slice::<M>(body).map(IncomingMessage::new)
}

/// HandlerRegistry は型付き Handler と saga を登録・管理
///
/// # 使用例
/// ```ignore
/// let mut registry = HandlerRegistry::new();
/// registry.register::<OrderPlaced, _>(AuditHandler)?;
/// registry.derive::<AccountOpened, AccountEvent>(|m| AccountEvent::from(m))?;
/// registry
///     .saga(OrderSaga)?
///     .initiated_by::<OrderPlaced>()?
///     .handles::<PaymentReceived>()?;
/// ```
#[derive(Default)]
pub struct HandlerRegistry {
    message_types: HashMap<&'static str, MessageTypeEntry>,
    handlers: HashMap<&'static str, Vec<Arc<dyn DynHandler>>>,
    failed_handlers: HashMap<&'static str, Vec<Arc<dyn DynFailedHandler>>>,
    ordering: HandlerOrdering,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `M` decodable. Idempotent.
    pub fn register_message<M: Message>(&mut self) -> &mut Self {
        self.message_types
            .entry(M::TYPE)
            .or_insert_with(MessageTypeEntry::new::<M>);
        self
    }

    pub fn register<M: Message, H: Handler<M> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<&mut Self, RegistryError> {
        self.register_shared::<M, H>(Arc::new(handler))
    }

    /// Register one handler instance for several message types.
    pub fn register_shared<M: Message, H: Handler<M> + 'static>(
        &mut self,
        handler: Arc<H>,
    ) -> Result<&mut Self, RegistryError> {
        self.push_handler::<M>(Arc::new(TypedHandler::<M, H>::new(handler)))?;
        Ok(self)
    }

    /// Register a second-level handler, run once `M` has exhausted its attempts.
    pub fn register_failed<M: Message, H: Handler<Failed<M>> + 'static>(
        &mut self,
        handler: H,
    ) -> Result<&mut Self, RegistryError> {
        self.register_message::<M>();
        let handlers = self.failed_handlers.entry(M::TYPE).or_default();
        if handlers
            .iter()
            .any(|h| h.handler_type() == std::any::TypeId::of::<H>())
        {
            return Err(RegistryError::AlreadyRegistered {
                message_type: M::TYPE,
                handler: type_name::<H>(),
            });
        }
        handlers.push(Arc::new(TypedFailedHandler::<M, H>::new(Arc::new(handler))));
        Ok(self)
    }

    /// Declare `B` as a base type of `D`: handlers of `B` also receive `D`.
    pub fn derive<D: Message, B: Message>(
        &mut self,
        upcast: impl Fn(&D) -> B + Send + Sync + 'static,
    ) -> Result<&mut Self, RegistryError> {
        self.register_message::<B>();
        let entry = self
            .message_types
            .entry(D::TYPE)
            .or_insert_with(MessageTypeEntry::new::<D>);
        if entry.bases.iter().any(|(base, _)| *base == B::TYPE) {
            return Err(RegistryError::DuplicateDerivation {
                derived: D::TYPE,
                base: B::TYPE,
            });
        }
        let upcast: Upcast = Arc::new(move |message: &IncomingMessage| {
            message
                .downcast_ref::<D>()
                .map(|derived| IncomingMessage::new(upcast(derived)))
        });
        entry.bases.push((B::TYPE, upcast));
        Ok(self)
    }

    /// Start registering a saga; chain `initiated_by` / `handles`.
    pub fn saga<S: Saga>(&mut self, saga: S) -> Result<SagaRegistration<'_, S>, RegistryError> {
        let mut config = CorrelationConfig::new(S::SAGA_TYPE);
        S::correlate(&mut config);
        let correlations = Arc::new(config.build()?);
        Ok(SagaRegistration {
            registry: self,
            saga: Arc::new(saga),
            correlations,
        })
    }

    pub fn set_ordering(&mut self, ordering: HandlerOrdering) -> &mut Self {
        self.ordering = ordering;
        self
    }

    pub fn ordering(&self) -> &HandlerOrdering {
        &self.ordering
    }

    /// Message types with at least one handler.
    pub fn registered_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self
            .handlers
            .iter()
            .filter(|(_, handlers)| !handlers.is_empty())
            .map(|(message_type, _)| *message_type)
            .collect();
        types.sort_unstable();
        types
    }

    /// Whether dispatching `message_type` reaches any handler, directly or via a base type.
    pub fn is_handled(&self, message_type: &str) -> bool {
        self.ancestry(message_type)
            .iter()
            .any(|t| self.handlers.get(t).is_some_and(|h| !h.is_empty()))
    }

    /// Names of the handlers resolved for `message_type`, in invocation order.
    pub fn handler_names_for(&self, message_type: &str) -> Vec<&'static str> {
        let mut resolved: Vec<&Arc<dyn DynHandler>> = self
            .ancestry(message_type)
            .iter()
            .filter_map(|t| self.handlers.get(t))
            .flatten()
            .collect();
        self.ordering.apply(&mut resolved, |h| h.handler_type());
        resolved.iter().map(|h| h.handler_name()).collect()
    }

    pub(crate) fn decode(
        &self,
        message_type: &str,
        body: &[u8],
    ) -> Option<Result<IncomingMessage, serde_json::Error>> {
        self.message_types
            .get(message_type)
            .map(|entry| (entry.decode)(body))
    }

    /// Handlers for `message` and all of its declared base types, each paired
    /// with the view of the message it expects.
    pub(crate) fn handlers_for(
        &self,
        message: &IncomingMessage,
    ) -> Vec<(Arc<dyn DynHandler>, IncomingMessage)> {
        let mut resolved = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([message.clone()]);

        while let Some(view) = queue.pop_front() {
            if !visited.insert(view.message_type()) {
                continue;
            }
            if let Some(handlers) = self.handlers.get(view.message_type()) {
                resolved.extend(handlers.iter().map(|h| (Arc::clone(h), view.clone())));
            }
            if let Some(entry) = self.message_types.get(view.message_type()) {
                queue.extend(
                    entry
                        .bases
                        .iter()
                        .filter(|(base, _)| !visited.contains(base))
                        .filter_map(|(_, upcast)| upcast(&view)),
                );
            }
        }

        self.ordering.apply(&mut resolved, |(h, _)| h.handler_type());
        resolved
    }

    /// Second-level handlers match the exact message type only.
    pub(crate) fn failed_handlers_for(&self, message_type: &str) -> Vec<Arc<dyn DynFailedHandler>> {
        self.failed_handlers
            .get(message_type)
            .cloned()
            .unwrap_or_default()
    }

    fn ancestry(&self, message_type: &str) -> Vec<&'static str> {
        let mut seen: Vec<&'static str> = Vec::new();
        let Some((&root, _)) = self.message_types.get_key_value(message_type) else {
            return seen;
        };
        let mut queue = VecDeque::from([root]);
        while let Some(current) = queue.pop_front() {
            if seen.contains(&current) {
                continue;
            }
            seen.push(current);
            if let Some(entry) = self.message_types.get(current) {
                queue.extend(entry.bases.iter().map(|(base, _)| *base));
            }
        }
        seen
    }

    fn push_handler<M: Message>(&mut self, handler: Arc<dyn DynHandler>) -> Result<(), RegistryError> {
        self.register_message::<M>();
        let handlers = self.handlers.entry(M::TYPE).or_default();
        if handlers
            .iter()
            .any(|h| h.handler_type() == handler.handler_type())
        {
            return Err(RegistryError::AlreadyRegistered {
                message_type: M::TYPE,
                handler: handler.handler_name(),
            });
        }
        handlers.push(handler);
        Ok(())
    }
}

/// Builder returned by [`HandlerRegistry::saga`].
pub struct SagaRegistration<'r, S: Saga> {
    registry: &'r mut HandlerRegistry,
    saga: Arc<S>,
    correlations: Arc<CorrelationMap<S::Data>>,
}

impl<'r, S: Saga> SagaRegistration<'r, S> {
    /// `M` may start a new instance when none is found.
    pub fn initiated_by<M: Message>(self) -> Result<Self, RegistryError>
    where
        S: SagaHandler<M>,
    {
        self.add::<M>(true)
    }

    /// `M` is handled only by existing instances.
    pub fn handles<M: Message>(self) -> Result<Self, RegistryError>
    where
        S: SagaHandler<M>,
    {
        self.add::<M>(false)
    }

    fn add<M: Message>(self, initiator: bool) -> Result<Self, RegistryError>
    where
        S: SagaHandler<M>,
    {
        let correlation = self
            .correlations
            .for_message(M::TYPE)
            .cloned()
            .ok_or(RegistryError::MissingCorrelation {
                saga_type: S::SAGA_TYPE,
                message_type: M::TYPE,
            })?;
        let invoker = SagaInvoker::<S, M>::new(
            Arc::clone(&self.saga),
            correlation,
            Arc::clone(&self.correlations),
            initiator,
        );
        self.registry.push_handler::<M>(Arc::new(invoker))?;
        Ok(self)
    }
}
