//! Pipeline lifecycle.

use log::{info, warn};
use serde::Serialize;
use std::sync::{PoisonError, RwLock};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineState {
    Idle,
    /// Radio front-end connected and tuned.
    Connected,
    /// At least one sample block has been read.
    Running,
    Stopping,
    /// Workers exited and buffers drained; terminal.
    Closed,
}

impl PipelineState {
    pub fn can_transition_to(&self, target: &PipelineState) -> bool {
        use PipelineState::*;

        match (self, target) {
            (Idle, Connected) => true,
            (Connected, Running) => true,
            // Stop requested, or the link died, before the first block.
            (Connected, Stopping) => true,
            (Running, Stopping) => true,
            (Stopping, Closed) => true,
            (Closed, _) => false,
            (a, b) if a == b => true,
            _ => false,
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            PipelineState::Idle => "Idle",
            PipelineState::Connected => "Connected",
            PipelineState::Running => "Running",
            PipelineState::Stopping => "Stopping",
            PipelineState::Closed => "Closed",
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}

/// Shared, validated holder of the current [`PipelineState`].
#[derive(Debug)]
pub struct StateCell {
    inner: RwLock<PipelineState>,
}

impl StateCell {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(PipelineState::Idle),
        }
    }

    pub fn get(&self) -> PipelineState {
        *self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves to `target` if allowed; returns whether the state changed.
    pub fn transition(&self, target: PipelineState) -> bool {
        let mut state = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if *state == target {
            return false;
        }
        if !state.can_transition_to(&target) {
            warn!("ignoring pipeline transition {} -> {}", *state, target);
            return false;
        }
        info!("pipeline {} -> {}", *state, target);
        *state = target;
        true
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}
