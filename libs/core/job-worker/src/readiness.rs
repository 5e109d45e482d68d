//! Process readiness lifecycle shared between startup code and health endpoints.

use serde::Serialize;
use std::sync::{Arc, PoisonError, RwLock};
use strum::{AsRefStr, Display};

/// Initialization lifecycle: `Unset -> Initializing -> Ready | Failed`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Display, AsRefStr)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Lifecycle {
    #[default]
    Unset,
    Initializing,
    Ready,
    Failed,
}

/// Point-in-time view of the readiness state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadinessSnapshot {
    pub lifecycle: Lifecycle,
    pub engine: String,
}

impl ReadinessSnapshot {
    pub fn is_ready(&self) -> bool {
        self.lifecycle == Lifecycle::Ready
    }
}

impl Default for ReadinessSnapshot {
    fn default() -> Self {
        Self {
            lifecycle: Lifecycle::Unset,
            engine: "unknown".to_string(),
        }
    }
}

/// Thread-safe readiness handle. Clones share the same state.
#[derive(Debug, Clone, Default)]
pub struct ReadinessState {
    inner: Arc<RwLock<ReadinessSnapshot>>,
}

impl ReadinessState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn begin_initializing(&self, engine: impl Into<String>) {
        self.update(Lifecycle::Initializing, Some(engine.into()));
    }

    pub fn mark_ready(&self, engine: impl Into<String>) {
        self.update(Lifecycle::Ready, Some(engine.into()));
    }

    pub fn mark_failed(&self) {
        self.update(Lifecycle::Failed, None);
    }

    pub fn snapshot(&self) -> ReadinessSnapshot {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn is_ready(&self) -> bool {
        self.snapshot().is_ready()
    }

    pub fn engine(&self) -> String {
        self.snapshot().engine
    }

    fn update(&self, lifecycle: Lifecycle, engine: Option<String>) {
        let mut guard = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        guard.lifecycle = lifecycle;
        if let Some(engine) = engine {
            guard.engine = engine;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_unset() {
        let state = ReadinessState::new();
        let snapshot = state.snapshot();
        assert_eq!(snapshot.lifecycle, Lifecycle::Unset);
        assert_eq!(snapshot.engine, "unknown");
        assert!(!state.is_ready());
    }

    #[test]
    fn test_lifecycle_transitions() {
        let state = ReadinessState::new();
        state.begin_initializing("indic-conformer");
        assert_eq!(state.snapshot().lifecycle, Lifecycle::Initializing);
        assert_eq!(state.engine(), "indic-conformer");

        state.mark_ready("faster-whisper");
        assert!(state.is_ready());
        assert_eq!(state.engine(), "faster-whisper");
    }

    #[test]
    fn test_failed_keeps_engine_name() {
        let state = ReadinessState::new();
        state.begin_initializing("indic-conformer");
        state.mark_failed();
        let snapshot = state.snapshot();
        assert_eq!(snapshot.lifecycle, Lifecycle::Failed);
        assert_eq!(snapshot.engine, "indic-conformer");
    }

    #[test]
    fn test_clones_share_state() {
        let state = ReadinessState::new();
        let observer = state.clone();
        state.mark_ready("indic-conformer");
        assert!(observer.is_ready());
    }
}
