//! HandlerOrdering - 特定の handler 型を先頭に固定する
//!
//! Pinned handler types run first, in the configured order. Every other
//! handler keeps its resolution order after them.

use std::any::{TypeId, type_name};

#[derive(Debug, Clone, Default)]
pub struct HandlerOrdering {
    pinned: Vec<(TypeId, &'static str)>,
}

impl HandlerOrdering {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start the order with `H`.
    pub fn first<H: 'static>() -> Self {
        Self::new().then::<H>()
    }

    pub fn then<H: 'static>(mut self) -> Self {
        let id = TypeId::of::<H>();
        if !self.pinned.iter().any(|(pinned, _)| *pinned == id) {
            self.pinned.push((id, type_name::<H>()));
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.pinned.is_empty()
    }

    pub fn pinned_names(&self) -> Vec<&'static str> {
        self.pinned.iter().map(|(_, name)| *name).collect()
    }

    fn rank(&self, id: TypeId) -> usize {
        self.pinned
            .iter()
            .position(|(pinned, _)| *pinned == id)
            .unwrap_or(usize::MAX)
    }

    /// Stable sort: pinned first, everything else untouched relative to each other.
    pub(crate) fn apply<T>(&self, items: &mut [T], key: impl Fn(&T) -> TypeId) {
        if self.pinned.is_empty() {
            return;
        }
        items.sort_by_key(|item| self.rank(key(item)));
    }
}
