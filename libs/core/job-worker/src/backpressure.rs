//! Pause/resume decision for the broker consumer.
//!
//! The intake queue is the only backpressure signal: while it is full the
//! consumer is paused, and the first iteration that sees free capacity
//! resumes it.

/// What the coordinator must do to the consumer this iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowAction {
    Pause,
    Resume,
    Hold,
}

/// Tracks whether the consumer is currently paused.
#[derive(Debug, Default)]
pub struct Backpressure {
    paused: bool,
}

impl Backpressure {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Decide the next action from the intake queue state.
    pub fn evaluate(&self, queue_full: bool) -> FlowAction {
        match (queue_full, self.paused) {
            (true, false) => FlowAction::Pause,
            (false, true) => FlowAction::Resume,
            _ => FlowAction::Hold,
        }
    }

    /// Record that the action was applied to the consumer.
    pub fn applied(&mut self, action: FlowAction) {
        match action {
            FlowAction::Pause => self.paused = true,
            FlowAction::Resume => self.paused = false,
            FlowAction::Hold => {}
        }
    }
}
