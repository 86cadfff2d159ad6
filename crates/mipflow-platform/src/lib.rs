//! # Mipflow Platform
//!
//! Platform services used by the texture residency manager.
//!
//! This crate provides:
//! - **Threading**: Named background threads for the transfer worker
//! - **Timers**: High-resolution timers and scoped timing for profiling

pub mod threading;
pub mod timer;

pub use threading::Thread;
pub use timer::{HighResTimer, PerfCounter, ScopedTimer};

use thiserror::Error;

/// Platform-specific errors
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Thread spawn failed: {0}")]
    ThreadSpawn(#[from] std::io::Error),

    #[error("Thread panicked: {0}")]
    ThreadPanicked(String),
}

/// Result type for platform operations
pub type PlatformResult<T> = Result<T, PlatformError>;
