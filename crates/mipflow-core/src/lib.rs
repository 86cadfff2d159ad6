//! # Mipflow Core
//!
//! Core primitives shared by the mipflow texture residency crates.
//!
//! This crate provides:
//! - **Stamps**: Monotonic version counters used to detect redefinition and content changes
//! - **Memory**: Device memory accounting shared by the residency manager and its worker

pub mod memory;

pub use memory::{DeviceMemory, MemoryBudget, MemorySnapshot, MemoryStats, DEFAULT_ALLOWED_MEMORY};

/// Monotonically increasing version counter
///
/// A value of zero means "never stamped".
pub type Stamp = u32;

/// Bytes in one mebibyte
pub const MIB: u64 = 1024 * 1024;

/// Convert mebibytes to bytes
pub const fn mib(n: u64) -> u64 {
    n * MIB
}

/// Format a byte count for log output
pub fn format_bytes(bytes: u64) -> String {
    if bytes >= MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= 1024 {
        format!("{:.2} KiB", bytes as f64 / 1024.0)
    } else {
        format!("{} B", bytes)
    }
}
