/// Run phases of a crawl session
use crate::state::CheckpointStatus;
use std::fmt;

/// Phase of the crawl scheduler's state machine
///
/// `Initializing -> Discovering -> Draining -> Finalizing -> {Completed | Paused | Error}`.
/// Any non-terminal phase may jump straight to `Finalizing` when the run is
/// cancelled or the store fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RunPhase {
    Initializing,
    Discovering,
    Draining,
    Finalizing,
    Completed,
    Paused,
    Error,
}

impl RunPhase {
    /// Returns true if no further transition is possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Paused | Self::Error)
    }

    /// Returns true if the state machine allows moving to `next`
    pub fn can_transition_to(&self, next: RunPhase) -> bool {
        use RunPhase::*;
        match (self, next) {
            (Initializing, Discovering) | (Discovering, Draining) | (Draining, Finalizing) => true,
            (Initializing | Discovering, Finalizing) => true,
            (Finalizing, Completed | Paused | Error) => true,
            _ => false,
        }
    }

    /// Checkpoint status written for a terminal phase
    pub fn checkpoint_status(&self) -> Option<CheckpointStatus> {
        match self {
            Self::Completed => Some(CheckpointStatus::Completed),
            Self::Paused => Some(CheckpointStatus::Paused),
            Self::Error => Some(CheckpointStatus::Error),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Discovering => "discovering",
            Self::Draining => "draining",
            Self::Finalizing => "finalizing",
            Self::Completed => "completed",
            Self::Paused => "paused",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
