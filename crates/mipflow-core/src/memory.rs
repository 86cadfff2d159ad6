//! Device Memory Accounting
//!
//! Counters for texture memory committed on the graphics device:
//! - Resident bytes, with sparse and framebuffer breakdowns
//! - Virtual (full resolution) bytes of every realized texture
//! - Texture, sparse texture and pending transfer counts
//! - The allowed budget consulted by the eviction sweep
//!
//! A single [`DeviceMemory`] is shared (via `Arc`) between the residency
//! manager, every device texture handle and the transfer worker. Handles
//! update it independently, so every counter is atomic.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Budget used when no explicit limit has been configured (256 MiB)
pub const DEFAULT_ALLOWED_MEMORY: u64 = 256 * 1024 * 1024;

/// Memory budget configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryBudget {
    /// Maximum bytes, 0 selects [`DEFAULT_ALLOWED_MEMORY`]
    pub max_bytes: u64,
}

impl MemoryBudget {
    /// Create a budget with the given ceiling
    pub fn with_max_bytes(max_bytes: u64) -> Self {
        Self { max_bytes }
    }
}

/// Byte counter for one memory category, with its high-water mark
#[derive(Debug, Default)]
pub struct MemoryStats {
    current: AtomicU64,
    peak: AtomicU64,
}

impl MemoryStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace a previously recorded size with a new one
    pub fn update(&self, previous: u64, next: u64) {
        if next > previous {
            let grown = next - previous;
            let new_size = self.current.fetch_add(grown, Ordering::Relaxed) + grown;
            self.peak.fetch_max(new_size, Ordering::Relaxed);
        } else if previous > next {
            self.current.fetch_sub(previous - next, Ordering::Relaxed);
        }
    }

    /// Get current bytes
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Relaxed)
    }

    /// Get peak bytes
    pub fn peak_usage(&self) -> u64 {
        self.peak.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.current.store(0, Ordering::Relaxed);
        self.peak.store(0, Ordering::Relaxed);
    }
}

/// Point-in-time copy of the device memory counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MemorySnapshot {
    pub textures: u32,
    pub sparse_textures: u32,
    pub pending_transfers: u32,
    pub resident_bytes: u64,
    pub peak_resident_bytes: u64,
    pub sparse_bytes: u64,
    pub framebuffer_bytes: u64,
    pub virtual_bytes: u64,
    pub allowed_bytes: u64,
}

/// Shared device memory accounting context
#[derive(Debug)]
pub struct DeviceMemory {
    resident: MemoryStats,
    sparse: MemoryStats,
    framebuffer: MemoryStats,
    virtual_bytes: MemoryStats,
    textures: AtomicU32,
    sparse_textures: AtomicU32,
    pending_transfers: AtomicU32,
    allowed: AtomicU64,
    last_reported_usage: AtomicU64,
    active: AtomicBool,
}

impl DeviceMemory {
    /// Create an accounting context with the given budget
    pub fn new(budget: MemoryBudget) -> Self {
        Self {
            resident: MemoryStats::new(),
            sparse: MemoryStats::new(),
            framebuffer: MemoryStats::new(),
            virtual_bytes: MemoryStats::new(),
            textures: AtomicU32::new(0),
            sparse_textures: AtomicU32::new(0),
            pending_transfers: AtomicU32::new(0),
            allowed: AtomicU64::new(budget.max_bytes),
            last_reported_usage: AtomicU64::new(0),
            active: AtomicBool::new(false),
        }
    }

    /// Start a session; counters are zeroed
    ///
    /// Called when the transfer worker starts up.
    pub fn begin(&self) {
        if self.active.swap(true, Ordering::AcqRel) {
            log::warn!("Device memory accounting started twice");
            return;
        }
        self.resident.reset();
        self.sparse.reset();
        self.framebuffer.reset();
        self.virtual_bytes.reset();
        self.textures.store(0, Ordering::Relaxed);
        self.sparse_textures.store(0, Ordering::Relaxed);
        self.pending_transfers.store(0, Ordering::Relaxed);
        self.last_reported_usage.store(0, Ordering::Relaxed);
    }

    /// End a session, reporting anything still accounted for
    ///
    /// Returns true when every counter drained to zero.
    pub fn end(&self) -> bool {
        self.active.store(false, Ordering::Release);
        let snapshot = self.snapshot();
        let clean = snapshot.textures == 0
            && snapshot.sparse_textures == 0
            && snapshot.resident_bytes == 0
            && snapshot.virtual_bytes == 0;
        if !clean {
            log::warn!(
                "Device memory still accounted at shutdown: {} textures, {} bytes resident",
                snapshot.textures,
                snapshot.resident_bytes
            );
        }
        clean
    }

    /// Whether a session is active
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Allowed texture memory in bytes
    pub fn allowed_memory(&self) -> u64 {
        match self.allowed.load(Ordering::Relaxed) {
            0 => DEFAULT_ALLOWED_MEMORY,
            bytes => bytes,
        }
    }

    /// Set allowed texture memory, 0 restores the default
    pub fn set_allowed_memory(&self, bytes: u64) {
        self.allowed.store(bytes, Ordering::Relaxed);
    }

    /// Replace the resident size of one texture
    pub fn update_resident(&self, previous: u64, next: u64) {
        self.resident.update(previous, next);
    }

    /// Replace the sparse committed size of one texture
    pub fn update_sparse(&self, previous: u64, next: u64) {
        self.sparse.update(previous, next);
    }

    /// Replace the framebuffer size of one texture
    pub fn update_framebuffer(&self, previous: u64, next: u64) {
        self.framebuffer.update(previous, next);
    }

    /// Replace the virtual size of one texture
    pub fn update_virtual(&self, previous: u64, next: u64) {
        self.virtual_bytes.update(previous, next);
    }

    pub fn increment_textures(&self) {
        self.textures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_textures(&self) {
        self.textures.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn increment_sparse_textures(&self) {
        self.sparse_textures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_sparse_textures(&self) {
        self.sparse_textures.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn increment_pending_transfers(&self) {
        self.pending_transfers.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decrement_pending_transfers(&self) {
        self.pending_transfers.fetch_sub(1, Ordering::Relaxed);
    }

    /// Resident bytes across all textures
    pub fn resident_bytes(&self) -> u64 {
        self.resident.current()
    }

    /// Consumed texture memory (excluding framebuffers) divided by the allowed memory
    ///
    /// A value above 1 means the budget is exceeded.
    pub fn memory_pressure(&self) -> f32 {
        let consumed = self
            .resident
            .current()
            .saturating_sub(self.framebuffer.current());
        let allowed = self.allowed_memory();
        let pressure = consumed as f32 / allowed as f32;
        if pressure > 1.0 && self.last_reported_usage.swap(consumed, Ordering::Relaxed) != consumed {
            log::debug!(
                "Exceeded max allowed texture memory: {} / {}",
                consumed,
                allowed
            );
        }
        pressure
    }

    /// Copy all counters
    pub fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            textures: self.textures.load(Ordering::Relaxed),
            sparse_textures: self.sparse_textures.load(Ordering::Relaxed),
            pending_transfers: self.pending_transfers.load(Ordering::Relaxed),
            resident_bytes: self.resident.current(),
            peak_resident_bytes: self.resident.peak_usage(),
            sparse_bytes: self.sparse.current(),
            framebuffer_bytes: self.framebuffer.current(),
            virtual_bytes: self.virtual_bytes.current(),
            allowed_bytes: self.allowed_memory(),
        }
    }
}

impl Default for DeviceMemory {
    fn default() -> Self {
        Self::new(MemoryBudget::default())
    }
}
