/// Durable per-source resume markers
use chrono::{DateTime, Utc};
use std::fmt;

/// Lifecycle status stored with a checkpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckpointStatus {
    /// A run is (or was, if the process died) in progress
    Running,

    /// The last run was interrupted and wrote its state cleanly
    Paused,

    /// The last run drained its whole work queue
    Completed,

    /// The last run stopped on a store failure
    Error,
}

impl CheckpointStatus {
    /// Converts the status to its database string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Error => "error",
        }
    }

    /// Parses a status from its database string representation
    ///
    /// Returns None if the string doesn't match any known status.
    pub fn from_db_string(s: &str) -> Option<Self> {
        match s {
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "error" => Some(Self::Error),
            _ => None,
        }
    }
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}

/// Resume marker of one source
#[derive(Debug, Clone, PartialEq)]
pub struct Checkpoint {
    pub source: String,
    pub last_identifier: Option<u64>,
    pub last_url: Option<String>,
    pub status: CheckpointStatus,
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// Computes where an `auto` start resumes a numeric crawl
    ///
    /// A completed checkpoint means every identifier up to `last_identifier`
    /// has been handled, so the crawl continues right after it. Any other
    /// status means the previous run stopped part way with items finished
    /// out of order; it restarts from the configured start and the visited
    /// set filters out what is already done.
    ///
    /// # Arguments
    ///
    /// * `configured_start` - The source's configured first identifier
    ///
    /// # Returns
    ///
    /// The first identifier to schedule
    pub fn resume_point(&self, configured_start: u64) -> u64 {
        match (self.status, self.last_identifier) {
            (CheckpointStatus::Completed, Some(last)) => {
                last.saturating_add(1).max(configured_start)
            }
            _ => configured_start,
        }
    }
}
