//! Per-session exclusion for orchestration runs.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, PoisonError};

use crate::domain::errors::{DomainError, DomainResult};

/// Set of sessions with an orchestration run in progress in this process.
#[derive(Debug, Clone, Default)]
pub struct RunRegistry {
    active: Arc<Mutex<HashSet<String>>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `session_id` for the lifetime of the returned guard.
    ///
    /// # Errors
    /// Returns `RunAlreadyActive` if another run holds the session.
    pub fn try_acquire(&self, session_id: &str) -> DomainResult<RunGuard> {
        let mut active = self.active.lock().unwrap_or_else(PoisonError::into_inner);
        if !active.insert(session_id.to_string()) {
            return Err(DomainError::RunAlreadyActive(session_id.to_string()));
        }
        Ok(RunGuard {
            active: Arc::clone(&self.active),
            session_id: session_id.to_string(),
        })
    }

    pub fn is_active(&self, session_id: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(session_id)
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

/// Releases the session when dropped.
#[derive(Debug)]
pub struct RunGuard {
    active: Arc<Mutex<HashSet<String>>>,
    session_id: String,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.session_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_is_rejected_until_release() {
        let registry = RunRegistry::new();
        let guard = registry.try_acquire("s1").unwrap();
        assert!(matches!(
            registry.try_acquire("s1"),
            Err(DomainError::RunAlreadyActive(_))
        ));
        assert!(registry.try_acquire("s2").is_ok());

        drop(guard);
        assert!(!registry.is_active("s1"));
        assert!(registry.try_acquire("s1").is_ok());
    }
}
