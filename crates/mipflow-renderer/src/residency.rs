//! Residency Manager
//!
//! The render-thread entry point. Creates device handles for textures,
//! submits them to the transfer worker and owns the allowed memory budget.
//!
//! ## Allocation strategy
//! - `External`: wraps a device object supplied by the resource
//! - `RenderBuffer`: fixed, counted as framebuffer memory
//! - `StrictResource`: fixed, every mip uploaded
//! - `Resource`: sparse when enabled and a device page size divides the
//!   texture, dense otherwise
//!
//! Handle creation never touches the device; storage is allocated by the
//! worker when the transfer starts.

use std::sync::Arc;
use std::time::Duration;

use ahash::AHashMap;
use mipflow_core::{format_bytes, DeviceMemory, MemoryBudget, Stamp};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::device::{Device, DeviceError};
use crate::format;
use crate::handle::{AllocationRequest, DeviceTexture, HandleContext, SyncState, TextureHandle};
use crate::resource::{Texture, TextureId, TextureUsage};
use crate::sparse::SparseInfo;
use crate::transfer::{
    TransferQueue, TransferStats, TransferStatsSnapshot, TransferThread, TransferWorker,
    MAX_TRANSFERS_PER_PASS,
};
use crate::TextureResult;

/// Whether resource textures may use sparse storage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SparseMode {
    /// Sparse when the device supports it and its vendor is not excluded
    #[default]
    Auto,
    Disabled,
    /// Sparse on any supporting device
    Forced,
}

/// Residency manager configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResidencyConfig {
    /// Allowed texture memory in bytes, 0 selects the default
    pub allowed_memory: u64,
    pub sparse: SparseMode,
    pub max_transfers_per_pass: usize,
    /// Worker sleep when nothing is in flight
    pub idle_wait_ms: u64,
    /// Variable textures keep every mip up to this many texels wide
    pub min_resident_extent: u32,
    /// Run the worker on its own thread, otherwise [`ResidencyManager::pump`] drives it
    pub threaded: bool,
}

impl Default for ResidencyConfig {
    fn default() -> Self {
        Self {
            allowed_memory: 0,
            sparse: SparseMode::Auto,
            max_transfers_per_pass: MAX_TRANSFERS_PER_PASS,
            idle_wait_ms: 1,
            min_resident_extent: 1,
            threaded: true,
        }
    }
}

impl ResidencyConfig {
    /// Configuration driven by [`ResidencyManager::pump`]
    pub fn manual() -> Self {
        Self {
            threaded: false,
            ..Self::default()
        }
    }

    pub fn idle_wait(&self) -> Duration {
        Duration::from_millis(self.idle_wait_ms)
    }
}

enum Driver {
    Threaded(TransferThread),
    Manual(TransferWorker),
}

/// A handle with the definition stamp it was created for
///
/// The stamp is kept outside the handle lock so the render thread can spot
/// redefinitions while the worker holds the handle.
struct TrackedHandle {
    stamp: Stamp,
    handle: TextureHandle,
}

/// Owner of every device texture handle
pub struct ResidencyManager {
    context: HandleContext,
    queue: Arc<TransferQueue>,
    stats: Arc<TransferStats>,
    handles: AHashMap<TextureId, TrackedHandle>,
    driver: Option<Driver>,
    sparse_enabled: bool,
}

impl ResidencyManager {
    /// Create a manager and start its transfer worker
    pub fn new(device: Arc<dyn Device>, config: ResidencyConfig) -> TextureResult<Self> {
        let sparse_enabled = Self::eval_sparse(device.as_ref(), config.sparse)?;
        let memory = Arc::new(DeviceMemory::new(MemoryBudget::with_max_bytes(
            config.allowed_memory,
        )));
        let queue = Arc::new(TransferQueue::new());
        let stats = Arc::new(TransferStats::new());

        let worker = TransferWorker::new(
            queue.clone(),
            device.clone(),
            memory.clone(),
            stats.clone(),
            config.max_transfers_per_pass,
        );
        let driver = if config.threaded {
            Driver::Threaded(TransferThread::spawn(worker, config.idle_wait())?)
        } else {
            Driver::Manual(worker)
        };

        log::info!(
            "Texture residency started: {} allowed, sparse {}, {} worker",
            format_bytes(memory.allowed_memory()),
            if sparse_enabled { "enabled" } else { "disabled" },
            if config.threaded { "threaded" } else { "manual" }
        );

        Ok(Self {
            context: HandleContext {
                device,
                memory,
                min_resident_extent: config.min_resident_extent,
            },
            queue,
            stats,
            handles: AHashMap::new(),
            driver: Some(driver),
            sparse_enabled,
        })
    }

    fn eval_sparse(device: &dyn Device, mode: SparseMode) -> TextureResult<bool> {
        let capabilities = device.capabilities();
        match mode {
            SparseMode::Disabled => Ok(false),
            SparseMode::Forced if !capabilities.supports_sparse() => {
                Err(DeviceError::SparseUnsupported.into())
            }
            SparseMode::Forced => Ok(true),
            SparseMode::Auto if !capabilities.supports_sparse() => Ok(false),
            SparseMode::Auto if capabilities.is_sparse_blacklisted() => {
                log::info!(
                    "Sparse textures disabled for vendor '{}'",
                    capabilities.vendor
                );
                Ok(false)
            }
            SparseMode::Auto => Ok(true),
        }
    }

    /// Get the live handle for a texture, creating and submitting one if needed
    ///
    /// Returns `None` for undefined textures. A redefined texture gets a
    /// fresh handle; an idle handle whose pixels changed is resubmitted.
    /// Unsupported formats and targets are returned as configuration errors.
    pub fn acquire_handle(&mut self, texture: &Arc<Texture>) -> TextureResult<Option<TextureHandle>> {
        if !texture.is_defined() {
            return Ok(None);
        }
        let id = texture.id();

        if let Some(tracked) = self.handles.get(&id) {
            if tracked.stamp == texture.stamp() {
                // A handle busy on the worker is settled on a later call
                let refresh = tracked.handle.try_lock().is_some_and(|mut device_texture| {
                    if device_texture.sync_state() == SyncState::Transferred {
                        device_texture.post_transfer();
                    }
                    device_texture.is_outdated() && !device_texture.is_failed()
                });
                if refresh {
                    log::debug!("Texture {} content changed, resubmitting", id);
                    self.queue.submit(&tracked.handle);
                }
                return Ok(Some(tracked.handle.clone()));
            }
        }

        let request = self.allocation_request(texture);
        let handle = match DeviceTexture::new(texture, request, &self.context) {
            Ok(handle) => Arc::new(Mutex::new(handle)),
            Err(err) => {
                if err.is_configuration() {
                    log::error!(
                        "Texture {} ({}) cannot be realized on this device: {}",
                        id,
                        texture.source(),
                        err
                    );
                }
                return Err(err);
            }
        };

        let tracked = TrackedHandle {
            stamp: texture.stamp(),
            handle: handle.clone(),
        };
        if self.handles.insert(id, tracked).is_some() {
            log::debug!("Texture {} redefined, replacing its handle", id);
        }
        self.queue.submit(&handle);
        Ok(Some(handle))
    }

    fn allocation_request(&self, texture: &Texture) -> AllocationRequest {
        match texture.usage() {
            TextureUsage::External => AllocationRequest::External,
            TextureUsage::RenderBuffer => AllocationRequest::Fixed { framebuffer: true },
            TextureUsage::StrictResource => AllocationRequest::Fixed { framebuffer: false },
            TextureUsage::Resource => self
                .sparse_request(texture)
                .unwrap_or(AllocationRequest::Dense),
        }
    }

    fn sparse_request(&self, texture: &Texture) -> Option<AllocationRequest> {
        if !self.sparse_enabled {
            return None;
        }
        let desc = texture.desc()?;
        let target = format::eval_target(desc.target).ok()?;
        let texel = format::eval_texel_format(desc.format).ok()?;
        let page_sizes = self
            .context
            .device
            .sparse_page_sizes(target.view, texel.format);
        let (page_index, page_dimensions) = SparseInfo::select_page(&page_sizes, desc.dimensions)?;
        Some(AllocationRequest::Sparse {
            page_index,
            page_dimensions,
        })
    }

    /// Get the handle of a texture without creating one
    pub fn handle(&self, id: TextureId) -> Option<TextureHandle> {
        self.handles.get(&id).map(|tracked| tracked.handle.clone())
    }

    /// Whether a texture has a handle that can be sampled
    ///
    /// A handle the worker is holding counts as not ready.
    pub fn is_ready(&self, id: TextureId) -> bool {
        self.handles
            .get(&id)
            .and_then(|tracked| tracked.handle.try_lock())
            .is_some_and(|texture| texture.is_ready())
    }

    /// Drop the handle of a texture
    ///
    /// Returns whether a handle existed.
    pub fn release(&mut self, id: TextureId) -> bool {
        let released = self.handles.remove(&id).is_some();
        if released {
            self.queue.request_recompute();
        }
        released
    }

    /// Render-thread housekeeping between frames
    ///
    /// Drops handles of destroyed textures, settles finished transfers and
    /// hands deferred demotions back to the worker.
    pub fn end_frame(&mut self) {
        let before = self.handles.len();
        self.handles.retain(|_, tracked| {
            tracked
                .handle
                .try_lock()
                .is_none_or(|texture| texture.is_source_alive())
        });
        if self.handles.len() != before {
            log::debug!(
                "Collected {} handles of destroyed textures",
                before - self.handles.len()
            );
            self.queue.request_recompute();
        }

        for tracked in self.handles.values() {
            if let Some(mut texture) = tracked.handle.try_lock() {
                if texture.sync_state() == SyncState::Transferred {
                    texture.post_transfer();
                }
            }
        }

        let deferred = self.queue.take_deferred_demotions();
        if deferred.is_empty() {
            return;
        }
        let stats = self.stats.clone();
        self.queue.queue_command(move |_device| {
            for handle in deferred.iter().filter_map(|weak| weak.upgrade()) {
                let mut texture = handle.lock();
                match texture.shed_to_target() {
                    Ok(()) => stats.record_demotion(),
                    Err(err) => {
                        texture.fail(&err);
                        stats.record_failure();
                    }
                }
            }
        });
    }

    /// Get the allowed texture memory in bytes
    pub fn allowed_memory(&self) -> u64 {
        self.context.memory.allowed_memory()
    }

    /// Set the allowed texture memory; 0 restores the default
    ///
    /// The worker rebalances on its next iteration.
    pub fn set_allowed_memory(&self, bytes: u64) {
        self.context.memory.set_allowed_memory(bytes);
        log::info!(
            "Allowed texture memory set to {}",
            format_bytes(self.context.memory.allowed_memory())
        );
        self.queue.request_recompute();
    }

    /// Queue work for the transfer worker
    pub fn queue_command<F>(&self, command: F)
    where
        F: FnOnce(&dyn Device) + Send + 'static,
    {
        self.queue.queue_command(command);
    }

    /// Run one worker iteration when not threaded
    ///
    /// Returns whether transfers remain in flight.
    pub fn pump(&mut self) -> bool {
        match &mut self.driver {
            Some(Driver::Manual(worker)) => worker.process(),
            _ => false,
        }
    }

    /// Pump until no transfer is in flight
    pub fn pump_until_idle(&mut self) {
        while self.pump() {}
    }

    /// Whether the worker runs on its own thread
    pub fn is_threaded(&self) -> bool {
        matches!(self.driver, Some(Driver::Threaded(_)))
    }

    pub fn memory(&self) -> &Arc<DeviceMemory> {
        &self.context.memory
    }

    pub fn stats(&self) -> TransferStatsSnapshot {
        self.stats.snapshot()
    }

    pub fn sparse_enabled(&self) -> bool {
        self.sparse_enabled
    }

    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }
}

impl Drop for ResidencyManager {
    fn drop(&mut self) {
        self.handles.clear();
        // The worker ends the memory session once its last iteration is done
        self.driver.take();
        log::debug!("Texture residency stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::format::TexelFormat;
    use crate::handle::AllocationKind;
    use crate::headless::{HeadlessConfig, HeadlessDevice};
    use crate::resource::TextureDesc;
    use crate::TextureError;
    use mipflow_core::mib;

    fn manager(config: ResidencyConfig) -> (Arc<HeadlessDevice>, ResidencyManager) {
        let device = Arc::new(HeadlessDevice::new());
        let manager = ResidencyManager::new(device.clone(), config).unwrap();
        (device, manager)
    }

    fn texture(usage: TextureUsage, desc: TextureDesc) -> Arc<Texture> {
        let texture = Arc::new(Texture::new("scene", usage));
        texture.define(desc).unwrap();
        for mip in 0..texture.mip_count() {
            let bytes = format::mip_face_bytes(desc.dimensions, mip, desc.format.texel_bytes());
            for face in 0..texture.face_count() {
                texture
                    .assign_mip_face(mip, face, vec![mip as u8; bytes as usize])
                    .unwrap();
            }
        }
        texture
    }

    fn rgba(size: u32) -> Arc<Texture> {
        texture(
            TextureUsage::Resource,
            TextureDesc::new_2d(TexelFormat::RGBA8, size, size),
        )
    }

    #[test]
    fn test_config_defaults() {
        let config: ResidencyConfig =
            serde_json::from_str(r#"{ "allowed_memory": 1024, "sparse": "forced" }"#).unwrap();
        assert_eq!(config.allowed_memory, 1024);
        assert_eq!(config.sparse, SparseMode::Forced);
        assert_eq!(config.max_transfers_per_pass, MAX_TRANSFERS_PER_PASS);
        assert_eq!(config.min_resident_extent, 1);
        assert!(config.threaded);
    }

    #[test]
    fn test_sparse_mode() {
        let sparse = |config: HeadlessConfig, mode: SparseMode| {
            ResidencyManager::new(
                Arc::new(HeadlessDevice::with_config(config)),
                ResidencyConfig {
                    sparse: mode,
                    ..ResidencyConfig::manual()
                },
            )
            .map(|manager| manager.sparse_enabled())
        };
        let amd = || HeadlessConfig {
            vendor: "AMD Radeon".to_string(),
            ..Default::default()
        };

        assert!(sparse(HeadlessConfig::default(), SparseMode::Auto).unwrap());
        assert!(!sparse(HeadlessConfig::default(), SparseMode::Disabled).unwrap());
        assert!(!sparse(amd(), SparseMode::Auto).unwrap());
        assert!(sparse(amd(), SparseMode::Forced).unwrap());
        assert!(!sparse(HeadlessConfig::dense_only(), SparseMode::Auto).unwrap());
        assert!(matches!(
            sparse(HeadlessConfig::dense_only(), SparseMode::Forced),
            Err(TextureError::Device(DeviceError::SparseUnsupported))
        ));
    }

    #[test]
    fn test_undefined_texture() {
        let (device, mut manager) = manager(ResidencyConfig::manual());
        let texture = Arc::new(Texture::new("empty", TextureUsage::Resource));
        assert!(manager.acquire_handle(&texture).unwrap().is_none());
        assert_eq!(manager.handle_count(), 0);
        assert_eq!(device.stats().creates, 0);
    }

    #[test]
    fn test_acquire_is_cheap_and_idempotent() {
        let (device, mut manager) = manager(ResidencyConfig::manual());
        let texture = rgba(64);

        let handle = manager.acquire_handle(&texture).unwrap().unwrap();
        assert_eq!(handle.lock().sync_state(), SyncState::Pending);
        assert_eq!(device.stats().creates, 0);

        let again = manager.acquire_handle(&texture).unwrap().unwrap();
        assert!(Arc::ptr_eq(&handle, &again));
        assert_eq!(manager.handle_count(), 1);

        manager.pump_until_idle();
        assert!(!manager.is_ready(texture.id()));
        manager.acquire_handle(&texture).unwrap();
        assert!(manager.is_ready(texture.id()));
        assert_eq!(manager.memory().snapshot().pending_transfers, 0);
    }

    #[test]
    fn test_allocation_strategy() {
        let (_device, mut manager) = manager(ResidencyConfig::manual());
        let mut kind = |texture: &Arc<Texture>| {
            let handle = manager.acquire_handle(texture).unwrap().unwrap();
            let kind = handle.lock().kind();
            kind
        };

        assert_eq!(kind(&rgba(256)), AllocationKind::Sparse);
        assert_eq!(kind(&rgba(100)), AllocationKind::Dense);
        let strict = texture(
            TextureUsage::StrictResource,
            TextureDesc::new_2d(TexelFormat::RGBA8, 64, 64),
        );
        assert_eq!(kind(&strict), AllocationKind::Fixed);
        let target = Arc::new(Texture::new("target", TextureUsage::RenderBuffer));
        target
            .define(TextureDesc::new_2d(TexelFormat::DEPTH32F, 64, 64).with_mips(1))
            .unwrap();
        assert_eq!(kind(&target), AllocationKind::Framebuffer);
    }

    #[test]
    fn test_dense_when_sparse_disabled() {
        let (_device, mut manager) = manager(ResidencyConfig {
            sparse: SparseMode::Disabled,
            ..ResidencyConfig::manual()
        });
        let handle = manager.acquire_handle(&rgba(256)).unwrap().unwrap();
        assert_eq!(handle.lock().kind(), AllocationKind::Dense);
    }

    #[test]
    fn test_configuration_error() {
        let (_device, mut manager) = manager(ResidencyConfig::manual());
        let texture = Arc::new(Texture::new("rgb", TextureUsage::Resource));
        texture
            .define(TextureDesc::new_2d(TexelFormat::RGB8, 16, 16))
            .unwrap();

        let err = manager.acquire_handle(&texture).err().unwrap();
        assert!(err.is_configuration());
        assert_eq!(manager.handle_count(), 0);
    }

    #[test]
    fn test_settles_at_budget() {
        let (device, mut manager) = manager(ResidencyConfig {
            allowed_memory: (16 + 4 + 1) * 4,
            sparse: SparseMode::Disabled,
            ..ResidencyConfig::manual()
        });
        let texture = rgba(1024);
        let handle = manager.acquire_handle(&texture).unwrap().unwrap();
        device.reset_stats();

        let mut iterations = 0;
        while manager.pump() {
            iterations += 1;
            assert!(!handle.lock().is_ready());
        }
        manager.end_frame();

        let handle = handle.lock();
        assert_eq!(handle.allocated_mip(), 8);
        assert_eq!(handle.populated_mip(), Some(8));
        assert_eq!(handle.resident_size(), (16 + 4 + 1) * 4);
        assert!(handle.is_ready());
        assert_eq!(device.stats().writes, 3);
        assert_eq!(iterations, 2);
        assert_eq!(manager.memory().resident_bytes(), (16 + 4 + 1) * 4);
    }

    #[test]
    fn test_largest_first() {
        let (_device, mut manager) = manager(ResidencyConfig {
            allowed_memory: mib(12),
            sparse: SparseMode::Disabled,
            min_resident_extent: 512,
            ..ResidencyConfig::manual()
        });
        let large = texture(
            TextureUsage::Resource,
            TextureDesc::new_2d(TexelFormat::RGBA8, 2048, 2048).with_mips(3),
        );
        let small = texture(
            TextureUsage::Resource,
            TextureDesc::new_2d(TexelFormat::RGBA8, 1024, 1024).with_mips(2),
        );
        let small_handle = manager.acquire_handle(&small).unwrap().unwrap();
        let large_handle = manager.acquire_handle(&large).unwrap().unwrap();
        manager.pump_until_idle();
        manager.end_frame();

        assert_eq!(large_handle.lock().allocated_mip(), 1);
        assert_eq!(small_handle.lock().allocated_mip(), 0);
        assert_eq!(manager.memory().resident_bytes(), mib(10));
        assert!(manager.is_ready(large.id()));
        assert!(manager.is_ready(small.id()));
    }

    #[test]
    fn test_budget_change_demotes_then_promotes() {
        let (_device, mut manager) = manager(ResidencyConfig {
            sparse: SparseMode::Disabled,
            ..ResidencyConfig::manual()
        });
        let texture = rgba(256);
        let handle = manager.acquire_handle(&texture).unwrap().unwrap();
        manager.pump_until_idle();
        manager.end_frame();
        let full = handle.lock().resident_size();

        let allowed = handle.lock().range_size(2);
        manager.set_allowed_memory(allowed);
        manager.pump();
        // Live mips are only dropped from the target
        assert_eq!(handle.lock().allocated_mip(), 0);
        assert_eq!(handle.lock().target_min_mip(), 2);
        assert!(manager.stats().deferred_demotions > 0);

        manager.end_frame();
        manager.pump();
        assert_eq!(handle.lock().allocated_mip(), 2);
        assert_eq!(manager.memory().resident_bytes(), allowed);
        assert!(handle.lock().is_ready());

        manager.set_allowed_memory(0);
        manager.pump();
        assert_eq!(handle.lock().populated_mip(), Some(0));
        assert_eq!(manager.stats().promotions, 2);
        assert_eq!(manager.memory().resident_bytes(), full);
    }

    #[test]
    fn test_promotion_stays_within_budget() {
        let (_device, mut manager) = manager(ResidencyConfig {
            sparse: SparseMode::Disabled,
            ..ResidencyConfig::manual()
        });
        let texture = rgba(256);
        let handle = manager.acquire_handle(&texture).unwrap().unwrap();
        manager.set_allowed_memory(handle.lock().range_size(4));
        manager.pump_until_idle();
        manager.end_frame();
        assert_eq!(handle.lock().allocated_mip(), 4);

        let allowed = handle.lock().range_size(3);
        manager.set_allowed_memory(allowed);
        for _ in 0..5 {
            manager.pump();
            manager.end_frame();
            assert!(manager.memory().resident_bytes() <= allowed);
        }

        let handle = handle.lock();
        assert_eq!(handle.populated_mip(), Some(3));
        assert_eq!(handle.allocated_mip(), 3);
        assert_eq!(manager.memory().resident_bytes(), allowed);
        assert_eq!(manager.stats().promotions, 1);
    }

    #[test]
    fn test_acquire_does_not_wait_for_worker() {
        let (_device, mut manager) = manager(ResidencyConfig::manual());
        let texture = rgba(64);
        let handle = manager.acquire_handle(&texture).unwrap().unwrap();
        manager.pump_until_idle();
        manager.end_frame();
        assert!(manager.is_ready(texture.id()));

        // Hold the handle the way the worker does during an upload
        let (locked_tx, locked_rx) = crossbeam::channel::bounded(0);
        let (release_tx, release_rx) = crossbeam::channel::bounded::<()>(0);
        let busy = handle.clone();
        let holder = std::thread::spawn(move || {
            let _guard = busy.lock();
            locked_tx.send(()).unwrap();
            let _ = release_rx.recv_timeout(Duration::from_secs(1));
        });
        locked_rx.recv().unwrap();

        let start = Instant::now();
        let again = manager.acquire_handle(&texture).unwrap().unwrap();
        assert!(Arc::ptr_eq(&handle, &again));
        assert!(!manager.is_ready(texture.id()));
        manager.end_frame();
        assert!(start.elapsed() < Duration::from_millis(500));
        assert_eq!(manager.handle_count(), 1);

        let _ = release_tx.send(());
        holder.join().unwrap();
        assert!(manager.is_ready(texture.id()));
    }

    #[test]
    fn test_destroyed_mid_transfer() {
        let (_device, mut manager) = manager(ResidencyConfig::manual());
        let texture = rgba(256);
        let id = texture.id();
        manager.acquire_handle(&texture).unwrap();
        assert!(manager.pump());

        drop(texture);
        manager.pump_until_idle();
        manager.end_frame();

        assert_eq!(manager.handle_count(), 0);
        assert!(manager.handle(id).is_none());
        let memory = manager.memory().snapshot();
        assert_eq!(memory.textures, 0);
        assert_eq!(memory.resident_bytes, 0);
        assert_eq!(memory.pending_transfers, 0);
    }

    #[test]
    fn test_redefinition_replaces_handle() {
        let (_device, mut manager) = manager(ResidencyConfig::manual());
        let texture = rgba(64);
        let first = manager.acquire_handle(&texture).unwrap().unwrap();
        manager.pump_until_idle();

        texture
            .define(TextureDesc::new_2d(TexelFormat::RGBA8, 32, 32))
            .unwrap();
        assert!(first.lock().is_invalid());

        let second = manager.acquire_handle(&texture).unwrap().unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(manager.handle_count(), 1);
        assert_eq!(second.lock().mip_count(), 6);
    }

    #[test]
    fn test_content_refresh() {
        let (_device, mut manager) = manager(ResidencyConfig::manual());
        let texture = rgba(16);
        let handle = manager.acquire_handle(&texture).unwrap().unwrap();
        manager.pump_until_idle();
        manager.end_frame();
        assert!(handle.lock().is_ready());

        texture.assign_mip_face(0, 0, vec![7u8; 16 * 16 * 4]).unwrap();
        assert!(handle.lock().is_outdated());
        assert!(!handle.lock().is_ready());

        manager.acquire_handle(&texture).unwrap();
        assert_eq!(handle.lock().sync_state(), SyncState::Pending);
        manager.pump_until_idle();
        manager.end_frame();
        assert!(handle.lock().is_ready());
        assert_eq!(handle.lock().transfer_count(), 2);
    }

    #[test]
    fn test_release() {
        let (_device, mut manager) = manager(ResidencyConfig::manual());
        let texture = rgba(64);
        manager.acquire_handle(&texture).unwrap();
        manager.pump_until_idle();

        assert!(manager.release(texture.id()));
        assert!(!manager.release(texture.id()));
        assert_eq!(manager.memory().snapshot().textures, 0);
    }

    #[test]
    fn test_device_failure_isolated() {
        let (device, mut manager) = manager(ResidencyConfig::manual());
        let a = rgba(32);
        let b = rgba(32);
        device.fail_next_allocations(1);
        let first = manager.acquire_handle(&a).unwrap().unwrap();
        let second = manager.acquire_handle(&b).unwrap().unwrap();
        manager.pump_until_idle();
        manager.end_frame();

        assert!(first.lock().is_invalid());
        assert!(second.lock().is_ready());
        assert_eq!(manager.stats().failures, 1);

        // Failed handles stay until the texture is redefined
        let again = manager.acquire_handle(&a).unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &again));
    }

    #[test]
    fn test_drop_ends_session() {
        let (device, mut manager) = manager(ResidencyConfig::manual());
        let texture = rgba(128);
        manager.acquire_handle(&texture).unwrap();
        manager.pump_until_idle();
        let memory = manager.memory().clone();
        assert!(memory.is_active());

        drop(manager);
        assert!(!memory.is_active());
        assert_eq!(memory.snapshot().textures, 0);
        assert_eq!(memory.snapshot().resident_bytes, 0);
        assert_eq!(device.object_count(), 0);
    }

    #[test]
    fn test_threaded_worker() {
        let (_device, mut manager) = manager(ResidencyConfig::default());
        assert!(manager.is_threaded());
        let texture = rgba(128);

        let deadline = Instant::now() + Duration::from_secs(5);
        while !manager.is_ready(texture.id()) && Instant::now() < deadline {
            manager.acquire_handle(&texture).unwrap();
            manager.end_frame();
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(manager.is_ready(texture.id()));
        assert_eq!(manager.stats().finished, 1);
    }
}
