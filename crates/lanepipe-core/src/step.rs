use std::fmt::Debug;

use crate::substep::SubStepName;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepState {
    Initialized,
    Running,
    Completed,
}

/// Insertion-ordered, unique-on-key container of `(sub_step, state)` pairs.
///
/// Traversal order is insertion order; the scheduler relies on this to
/// deterministically pick which `Initialized` entry to dispatch first.
/// Cheap to clone: snapshot/rollback in `Scheduler::drive` just clones the
/// whole list before calling `advance_wave`.
#[derive(Clone, Debug, Default)]
pub struct StepList<T> {
    entries: Vec<(T, StepState)>,
}

impl<T: Copy + Eq + Debug> StepList<T> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn from_wave(wave: impl IntoIterator<Item = T>) -> Self {
        let mut list = Self::new();
        for step in wave {
            list.add(step, StepState::Initialized);
        }
        list
    }

    /// Append if absent, else update the existing entry's state.
    pub fn add(&mut self, step: T, state: StepState) {
        if let Some(entry) = self.entries.iter_mut().find(|(s, _)| *s == step) {
            entry.1 = state;
        } else {
            self.entries.push((step, state));
        }
    }

    pub fn set_state(&mut self, step: T, state: StepState) {
        self.add(step, state);
    }

    pub fn remove_completed(&mut self) {
        self.entries.retain(|(_, state)| *state != StepState::Completed);
    }

    pub fn is_done(&self) -> bool {
        !self.entries.is_empty() && self.entries.iter().all(|(_, s)| *s == StepState::Completed)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Entries currently `Initialized`, in insertion order.
    pub fn initialized(&self) -> impl Iterator<Item = T> + '_ {
        self.entries
            .iter()
            .filter(|(_, s)| *s == StepState::Initialized)
            .map(|(step, _)| *step)
    }

    pub fn iter(&self) -> impl Iterator<Item = (T, StepState)> + '_ {
        self.entries.iter().copied()
    }

    pub fn dump(&self) -> String
    where
        T: std::fmt::Display,
    {
        self.entries
            .iter()
            .map(|(step, state)| format!("{step}={state:?}"))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl<T: Copy + Eq + Debug + SubStepName> StepList<T> {
    /// Retag the entry matching `name` (a `CompleteStep` message only carries
    /// the `&'static str` name, not the typed value). No-op if no entry
    /// matches, which can happen if the list was rolled back since dispatch.
    pub fn retag_named(&mut self, name: &str, state: StepState) {
        if let Some((step, _)) = self.entries.iter().find(|(s, _)| s.name() == name) {
            let step = *step;
            self.set_state(step, state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    enum S {
        A,
        B,
    }

    #[test]
    fn add_is_idempotent_for_same_state() {
        let mut list = StepList::new();
        list.add(S::A, StepState::Completed);
        list.add(S::A, StepState::Completed);
        assert_eq!(list.len(), 1);
        assert!(list.is_done());
    }

    #[test]
    fn remove_completed_drops_only_completed() {
        let mut list = StepList::new();
        list.add(S::A, StepState::Completed);
        list.add(S::B, StepState::Initialized);
        list.remove_completed();
        assert_eq!(list.len(), 1);
        assert_eq!(list.initialized().next(), Some(S::B));
    }

    #[test]
    fn is_done_false_when_empty() {
        let list: StepList<S> = StepList::new();
        assert!(!list.is_done());
        assert!(list.is_empty());
    }

    #[test]
    fn initialized_preserves_insertion_order() {
        let mut list = StepList::new();
        list.add(S::B, StepState::Initialized);
        list.add(S::A, StepState::Initialized);
        assert_eq!(list.initialized().collect::<Vec<_>>(), vec![S::B, S::A]);
    }
}
