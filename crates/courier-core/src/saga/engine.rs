//! SagaEngine - saga instance のライフサイクル
//!
//! # フロー（message 1 件 × saga type 1 つ）
//! 1. correlation property の値を message から取り出す
//! 2. `find(saga_type, property, value)`
//! 3. 見つかれば load、無ければ initiator の場合のみ revision 0 で作成
//! 4. handler 実行
//! 5. completed なら delete、新規なら insert、それ以外は update
//!
//! Revision mismatches come back from storage as `StoreOutcome` and are
//! turned into `BusError::ConcurrencyConflict` here, so the retry step
//! redelivers and the next attempt re-reads fresh state.

use std::any::{TypeId, type_name};
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{BusError, SagaId};
use crate::ports::{IdGenerator, SagaRecord, SagaStorage, StoreOutcome};
use crate::saga::correlation::{Correlation, CorrelationMap};
use crate::saga::instance::SagaInstance;
use crate::saga::{Saga, SagaHandler};
use crate::typed::handler::{DynHandler, Invocation, MessageContext};
use crate::typed::message::{IncomingMessage, Message};

pub struct SagaEngine {
    storage: Arc<dyn SagaStorage>,
    ids: Arc<dyn IdGenerator>,
}

impl SagaEngine {
    pub fn new(storage: Arc<dyn SagaStorage>, ids: Arc<dyn IdGenerator>) -> Self {
        Self { storage, ids }
    }

    pub fn storage(&self) -> &Arc<dyn SagaStorage> {
        &self.storage
    }

    async fn run<S, M>(
        &self,
        invoker: &SagaInvoker<S, M>,
        message: &IncomingMessage,
        ctx: &mut MessageContext<'_>,
    ) -> Result<Invocation, BusError>
    where
        S: SagaHandler<M>,
        M: Message,
    {
        let typed = message
            .downcast_ref::<M>()
            .ok_or_else(|| BusError::UnknownMessageType(message.message_type().to_string()))?;
        let correlation = &invoker.correlation;
        let property = correlation.property();

        let value = correlation
            .extract(message)
            .ok_or(BusError::CorrelationValueMissing {
                saga_type: S::SAGA_TYPE,
                message_type: M::TYPE,
                property,
            })?;

        let mut instance = match self.storage.find(S::SAGA_TYPE, property, &value).await? {
            Some(record) => {
                let data = serde_json::from_value(record.data).map_err(|source| {
                    BusError::SagaData {
                        saga_id: record.id,
                        source,
                    }
                })?;
                SagaInstance::loaded(record.id, record.revision, data)
            }
            None if invoker.initiator => {
                let mut data = S::Data::default();
                correlation.seed(message, &mut data);
                SagaInstance::created(self.ids.generate_saga_id(), data)
            }
            None => {
                tracing::warn!(
                    saga_type = S::SAGA_TYPE,
                    message_type = M::TYPE,
                    property,
                    value = %value,
                    "message could not be correlated with any saga instance"
                );
                return Ok(Invocation::NotCorrelated {
                    saga_type: S::SAGA_TYPE,
                });
            }
        };

        invoker
            .saga
            .handle(typed.clone(), &mut instance, ctx)
            .await?;

        self.persist::<S>(&invoker.correlations, instance).await?;
        Ok(Invocation::Handled)
    }

    async fn persist<S: Saga>(
        &self,
        correlations: &CorrelationMap<S::Data>,
        instance: SagaInstance<S::Data>,
    ) -> Result<(), BusError> {
        let saga_id = instance.id();
        let revision = instance.revision();

        if instance.is_completed() {
            if instance.is_new() {
                tracing::debug!(saga_type = S::SAGA_TYPE, %saga_id, "saga completed before it was stored");
                return Ok(());
            }
            let outcome = self.storage.delete(saga_id, revision).await?;
            tracing::debug!(saga_type = S::SAGA_TYPE, %saga_id, revision, "saga completed");
            return conflict_to_error(saga_id, revision, outcome);
        }

        let entries = correlations.entries(&instance.data);
        let data = serde_json::to_value(&instance.data)
            .map_err(|source| BusError::SagaData { saga_id, source })?;
        let record = SagaRecord {
            id: saga_id,
            saga_type: S::SAGA_TYPE.to_string(),
            revision,
            data,
        };

        let outcome = if instance.is_new() {
            self.storage.insert(record, &entries).await?
        } else {
            self.storage.update(record, &entries).await?
        };
        conflict_to_error(saga_id, revision, outcome.map(|_| ()))
    }
}

fn conflict_to_error(
    saga_id: SagaId,
    expected: u64,
    outcome: StoreOutcome<()>,
) -> Result<(), BusError> {
    match outcome {
        StoreOutcome::Ok(()) => Ok(()),
        StoreOutcome::ConcurrencyConflict { actual, .. } => Err(BusError::ConcurrencyConflict {
            saga_id,
            expected,
            actual: Some(actual),
        }),
        StoreOutcome::NotFound => Err(BusError::ConcurrencyConflict {
            saga_id,
            expected,
            actual: None,
        }),
    }
}

/// DynHandler for one (saga type, message type) pair.
pub(crate) struct SagaInvoker<S: Saga, M> {
    saga: Arc<S>,
    correlation: Arc<Correlation<S::Data>>,
    correlations: Arc<CorrelationMap<S::Data>>,
    initiator: bool,
    _marker: PhantomData<fn(M)>,
}

impl<S: Saga, M> SagaInvoker<S, M> {
    pub(crate) fn new(
        saga: Arc<S>,
        correlation: Arc<Correlation<S::Data>>,
        correlations: Arc<CorrelationMap<S::Data>>,
        initiator: bool,
    ) -> Self {
        Self {
            saga,
            correlation,
            correlations,
            initiator,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<S, M> DynHandler for SagaInvoker<S, M>
where
    S: SagaHandler<M>,
    M: Message,
{
    fn handler_type(&self) -> TypeId {
        TypeId::of::<S>()
    }

    fn handler_name(&self) -> &'static str {
        type_name::<S>()
    }

    async fn invoke(
        &self,
        message: &IncomingMessage,
        ctx: &mut MessageContext<'_>,
        sagas: &SagaEngine,
    ) -> Result<Invocation, BusError> {
        sagas.run(self, message, ctx).await
    }
}
