//! Shared call journal for the mock collaborators
//!
//! Mocks in the namespace and CNI crates record every call into one
//! `Journal` so tests can check ordering across collaborators.

use std::sync::{Arc, Mutex, PoisonError};

/// Ordered, cloneable record of collaborator calls
#[derive(Debug, Clone, Default)]
pub struct Journal {
    entries: Arc<Mutex<Vec<String>>>,
}

impl Journal {
    /// Create an empty journal
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry
    pub fn record(&self, entry: impl Into<String>) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry.into());
    }

    /// Drop every entry recorded so far
    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    /// Snapshot of all entries in call order
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of entries starting with `prefix`
    #[must_use]
    pub fn count(&self, prefix: &str) -> usize {
        self.entries()
            .iter()
            .filter(|entry| entry.starts_with(prefix))
            .count()
    }

    /// Index of the first entry starting with `prefix`
    #[must_use]
    pub fn position(&self, prefix: &str) -> Option<usize> {
        self.entries()
            .iter()
            .position(|entry| entry.starts_with(prefix))
    }

    /// Index of the last entry starting with `prefix`
    #[must_use]
    pub fn last_position(&self, prefix: &str) -> Option<usize> {
        self.entries()
            .iter()
            .rposition(|entry| entry.starts_with(prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_journal_shared_between_clones() {
        let journal = Journal::new();
        let other = journal.clone();

        journal.record("spawn 100");
        other.record("attach 100");
        journal.record("detach 100");
        other.record("attach 101");

        assert_eq!(journal.entries().len(), 4);
        assert_eq!(journal.count("attach"), 2);
        assert_eq!(journal.position("attach"), Some(1));
        assert_eq!(journal.last_position("attach"), Some(3));
        assert_eq!(journal.position("terminate"), None);
    }

    #[test]
    fn test_clear_empties_every_clone() {
        let journal = Journal::new();
        let other = journal.clone();

        journal.record("spawn 100");
        other.record("terminate 100");
        other.clear();

        assert!(journal.entries().is_empty());
        assert_eq!(journal.count("spawn"), 0);

        journal.record("spawn 101");
        assert_eq!(other.entries(), ["spawn 101"]);
    }
}
