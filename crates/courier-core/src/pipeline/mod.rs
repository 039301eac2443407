//! Pipeline - メッセージ処理のミドルウェアチェーン
//!
//! # 構造
//! - `Step`: `process(ctx, next)` を持つミドルウェア
//! - `Next`: 残りのチェーンを表すカーソル（index + step 配列）
//! - `PipelineBuilder`: 起動時のみ可変（anchor 相対の挿入・削除）
//! - `Pipeline`: 実行時は不変、worker 間で共有
//!
//! `Next::run` consumes the cursor, so a step can continue the chain at most
//! once. Dropping `next` without running it short-circuits the rest.

pub mod context;
pub mod steps;

use std::any::{TypeId, type_name};
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::{BusError, ConfigError};

pub use self::context::{StepContext, TransactionContext};

#[async_trait]
pub trait Step: Send + Sync + 'static {
    async fn process(&self, ctx: &mut StepContext, next: Next<'_>) -> Result<(), BusError>;
}

/// Where to put a step relative to an anchor step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    Before,
    After,
}

/// Where to put a step in absolute terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    Front,
    Back,
}

struct StepEntry {
    info: StepInfo,
    step: Arc<dyn Step>,
}

impl StepEntry {
    fn new<S: Step>(step: S) -> Self {
        Self {
            info: StepInfo {
                type_id: TypeId::of::<S>(),
                name: type_name::<S>(),
            },
            step: Arc::new(step),
        }
    }
}

/// Identity of a configured step, handed to removal predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepInfo {
    type_id: TypeId,
    name: &'static str,
}

impl StepInfo {
    pub fn is<S: Step>(&self) -> bool {
        self.type_id == TypeId::of::<S>()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Remainder of the chain after the current step.
pub struct Next<'a> {
    steps: &'a [StepEntry],
    index: usize,
}

impl Next<'_> {
    /// Run the remaining steps. The last step's continuation is a no-op.
    pub async fn run(self, ctx: &mut StepContext) -> Result<(), BusError> {
        match self.steps.get(self.index) {
            Some(entry) => {
                let next = Next {
                    steps: self.steps,
                    index: self.index + 1,
                };
                entry.step.process(ctx, next).await
            }
            None => Ok(()),
        }
    }

    pub fn remaining(&self) -> usize {
        self.steps.len().saturating_sub(self.index)
    }
}

#[derive(Default)]
pub struct PipelineBuilder {
    steps: Vec<StepEntry>,
}

impl PipelineBuilder {
    pub fn new() -> Self {
        Self { steps: Vec::new() }
    }

    pub fn append<S: Step>(&mut self, step: S) -> &mut Self {
        self.insert_absolute(step, Edge::Back)
    }

    pub fn insert_absolute<S: Step>(&mut self, step: S, edge: Edge) -> &mut Self {
        let entry = StepEntry::new(step);
        match edge {
            Edge::Front => self.steps.insert(0, entry),
            Edge::Back => self.steps.push(entry),
        }
        self
    }

    /// Insert `step` before or after the first step of type `A`.
    pub fn insert<A: Step, S: Step>(
        &mut self,
        step: S,
        position: Position,
    ) -> Result<&mut Self, ConfigError> {
        let anchor = self
            .steps
            .iter()
            .position(|entry| entry.info.is::<A>())
            .ok_or(ConfigError::AnchorNotFound(type_name::<A>()))?;
        let index = match position {
            Position::Before => anchor,
            Position::After => anchor + 1,
        };
        self.steps.insert(index, StepEntry::new(step));
        Ok(self)
    }

    /// Remove every step matching `predicate`. Returns how many were removed.
    pub fn remove(&mut self, predicate: impl Fn(&StepInfo) -> bool) -> usize {
        let before = self.steps.len();
        self.steps.retain(|entry| !predicate(&entry.info));
        before - self.steps.len()
    }

    pub fn remove_step<S: Step>(&mut self) -> usize {
        self.remove(|info| info.is::<S>())
    }

    pub fn contains<S: Step>(&self) -> bool {
        self.steps.iter().any(|entry| entry.info.is::<S>())
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|entry| entry.info.name).collect()
    }

    pub fn build(self) -> Pipeline {
        Pipeline {
            steps: self.steps.into(),
        }
    }
}

/// Immutable, cheaply clonable step chain.
#[derive(Clone)]
pub struct Pipeline {
    steps: Arc<[StepEntry]>,
}

impl Pipeline {
    pub async fn execute(&self, ctx: &mut StepContext) -> Result<(), BusError> {
        Next {
            steps: &self.steps[..],
            index: 0,
        }
        .run(ctx)
        .await
    }

    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|entry| entry.info.name).collect()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
