//! Pipeline run state.

use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of the decode pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunState {
    /// No pump thread; resources released
    Stopped = 0,
    /// Pump thread decoding
    Running = 1,
    /// Shutdown requested; pump exits at its next check
    Terminating = 2,
}

impl RunState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RunState::Running,
            2 => RunState::Terminating,
            _ => RunState::Stopped,
        }
    }

    /// Whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: RunState) -> bool {
        matches!(
            (self, next),
            (RunState::Stopped, RunState::Running)
                | (RunState::Running, RunState::Terminating)
                | (RunState::Terminating, RunState::Stopped)
        )
    }
}

/// Run state shared between the owner and the pump thread
#[derive(Debug)]
pub struct RunStateCell(AtomicU8);

impl RunStateCell {
    pub fn new() -> Self {
        Self(AtomicU8::new(RunState::Stopped as u8))
    }

    pub fn load(&self) -> RunState {
        RunState::from_u8(self.0.load(Ordering::Acquire))
    }

    pub fn is_running(&self) -> bool {
        self.load() == RunState::Running
    }

    /// Move from `from` to `to`.
    ///
    /// Fails, leaving the cell untouched, if the current state is not `from`
    /// or the transition is not allowed. Returns the state actually observed.
    pub fn transition(&self, from: RunState, to: RunState) -> Result<(), RunState> {
        if !from.can_transition_to(to) {
            return Err(self.load());
        }
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(RunState::from_u8)
    }
}

impl Default for RunStateCell {
    fn default() -> Self {
        Self::new()
    }
}
