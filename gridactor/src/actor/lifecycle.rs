//! Actor lifecycle state machine.

use serde::{Deserialize, Serialize};

/// Actor lifecycle state machine.
///
/// # State Transitions
///
/// ```text
/// Created → Initializing → Running → Terminating → Stopped
///               ↓                        ↓
///            Stopped (start failed)    Running (stop hook failed)
/// ```
///
/// # Invariants
///
/// - An actor in `Running` has completed `on_start()` successfully
/// - Messages are handled only in `Running`
/// - `Stopped` is terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ActorState {
    /// Instance constructed, mailbox task not yet running.
    Created = 0,

    /// `on_start()` in progress.
    Initializing = 1,

    /// Processing messages.
    Running = 2,

    /// `on_stop()` in progress.
    Terminating = 3,

    /// Disposed, mailbox closed.
    Stopped = 4,
}

impl ActorState {
    /// Check if transition to next state is valid.
    ///
    /// # Valid Transitions
    ///
    /// - Created → Initializing
    /// - Initializing → Running (start succeeded)
    /// - Initializing → Stopped (start failed)
    /// - Running → Terminating
    /// - Terminating → Stopped (stop hook succeeded)
    /// - Terminating → Running (stop hook failed, stop will be retried)
    pub fn can_transition_to(&self, next: ActorState) -> bool {
        use ActorState::*;
        matches!(
            (self, next),
            (Created, Initializing)
                | (Initializing, Running)
                | (Initializing, Stopped)
                | (Running, Terminating)
                | (Terminating, Stopped)
                | (Terminating, Running)
        )
    }

    /// Check if the actor handles messages in this state.
    pub fn can_process_messages(&self) -> bool {
        matches!(self, ActorState::Running)
    }

    /// Check if this is the terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActorState::Stopped)
    }

    pub(crate) fn from_u8(raw: u8) -> ActorState {
        match raw {
            0 => ActorState::Created,
            1 => ActorState::Initializing,
            2 => ActorState::Running,
            3 => ActorState::Terminating,
            _ => ActorState::Stopped,
        }
    }
}

/// Stop reason used when the supervisor drains actors on shutdown.
pub const REASON_SHUTDOWN: &str = "shutdown";

/// Stop reason used when a hibernated actor outlives the sleep ceiling.
pub const REASON_INACTIVE: &str = "shutdown inactive";
