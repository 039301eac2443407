use crate::domain::SagaId;

/// Saga data together with its identity and the revision it was read at.
#[derive(Debug, Clone)]
pub struct SagaInstance<D> {
    id: SagaId,
    revision: u64,
    pub data: D,
    is_new: bool,
    completed: bool,
}

impl<D> SagaInstance<D> {
    pub(crate) fn created(id: SagaId, data: D) -> Self {
        Self {
            id,
            revision: 0,
            data,
            is_new: true,
            completed: false,
        }
    }

    pub(crate) fn loaded(id: SagaId, revision: u64, data: D) -> Self {
        Self {
            id,
            revision,
            data,
            is_new: false,
            completed: false,
        }
    }

    pub fn id(&self) -> SagaId {
        self.id
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// True when this delivery started the conversation.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// End the conversation: the instance is deleted instead of saved.
    pub fn mark_as_complete(&mut self) {
        self.completed = true;
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }
}
