//! State module for tracking crawl progress
//!
//! This module provides the durable resume marker and the in-memory run phase.
//!
//! # Components
//!
//! - `Checkpoint`: Per-source resume marker (last identifier, last URL, status)
//! - `CheckpointStatus`: Running, paused, completed or error
//! - `RunPhase`: Phase of the scheduler's state machine for the current session

mod checkpoint;
mod phase;

// Re-export main types
pub use checkpoint::{Checkpoint, CheckpointStatus};
pub use phase::RunPhase;
