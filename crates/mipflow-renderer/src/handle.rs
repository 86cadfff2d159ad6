//! Device Texture Handles
//!
//! The device-side counterpart of a [`Texture`]: storage, residency window
//! and transfer state.
//!
//! ## Transfer state machine
//! - `Idle`: usable for rendering once every wanted mip is populated
//! - `Pending`: queued for the transfer worker, or being uploaded
//! - `Transferred`: upload finished on the worker, awaiting the render thread
//!
//! The render thread moves `Idle -> Pending` when it submits a handle and
//! `Transferred -> Idle` in [`DeviceTexture::post_transfer`]. The worker
//! drives everything in between: [`DeviceTexture::start_transfer`] once,
//! [`DeviceTexture::continue_transfer`] until it reports nothing is left,
//! then [`DeviceTexture::finish_transfer`].
//!
//! ## Mip window
//! Mip 0 is the most detailed. For variable allocations the handle tracks
//! `allocated_mip <= populated_mip <= max_mip`: storage exists from
//! `allocated_mip` and pixels are resident from `populated_mip`. The
//! eviction sweep moves `target_min_mip`, the finest mip the budget allows.

use std::sync::{Arc, Weak};

use glam::UVec3;
use mipflow_core::{DeviceMemory, Stamp};
use parking_lot::Mutex;

use crate::device::{Device, DeviceObjectId, StorageDesc, TextureRegion};
use crate::format::{self, DeviceTarget, DeviceTexelFormat, TexelFormat};
use crate::resource::{ExternalRecycler, Texture, TextureId};
use crate::sampler::SamplerDesc;
use crate::sparse::SparseInfo;
use crate::{TextureError, TextureResult};

/// Shared device texture handle
pub type TextureHandle = Arc<Mutex<DeviceTexture>>;

/// Weak device texture handle, as held by the transfer worker
pub type WeakTextureHandle = Weak<Mutex<DeviceTexture>>;

/// Transfer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Pending,
    Transferred,
}

/// Allocation strategy requested for a new handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationRequest {
    External,
    Fixed { framebuffer: bool },
    Dense,
    Sparse { page_index: u32, page_dimensions: UVec3 },
}

/// Allocation strategy of a handle
pub enum Allocation {
    /// Storage owned by an external producer
    External { recycler: Option<ExternalRecycler> },
    /// Every mip always resident
    Fixed { framebuffer: bool },
    /// Mip range follows the memory budget
    Variable(VariableStorage),
}

/// Backing of a variable allocation
#[derive(Debug, Clone, PartialEq)]
pub enum VariableStorage {
    /// Reallocated and copied whenever the range changes
    Dense,
    /// Full mip chain reserved, pages committed per level
    Sparse(SparseInfo),
}

/// Flat view of the allocation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AllocationKind {
    External,
    Fixed,
    Framebuffer,
    Dense,
    Sparse,
}

/// Shared services a handle needs
#[derive(Clone)]
pub struct HandleContext {
    pub device: Arc<dyn Device>,
    pub memory: Arc<DeviceMemory>,
    /// Variable textures never shed below a mip this many texels wide
    pub min_resident_extent: u32,
}

/// Device-side texture state
pub struct DeviceTexture {
    pub(crate) id: TextureId,
    pub(crate) label: String,
    pub(crate) source: Weak<Texture>,
    pub(crate) device: Arc<dyn Device>,
    pub(crate) memory: Arc<DeviceMemory>,
    pub(crate) target: DeviceTarget,
    pub(crate) texel: DeviceTexelFormat,
    pub(crate) storage_format: TexelFormat,
    pub(crate) dimensions: UVec3,
    pub(crate) allocation: Allocation,
    pub(crate) object: Option<DeviceObjectId>,
    pub(crate) sync_state: SyncState,
    pub(crate) storage_stamp: Stamp,
    pub(crate) content_stamp: Stamp,
    pub(crate) pending_content_stamp: Stamp,
    pub(crate) mip_count: u16,
    pub(crate) max_mip: u16,
    pub(crate) floor_mip: u16,
    pub(crate) allocated_mip: u16,
    pub(crate) populated_mip: Option<u16>,
    pub(crate) target_min_mip: u16,
    pub(crate) virtual_size: u64,
    pub(crate) resident_size: u64,
    pub(crate) sampler: SamplerDesc,
    pub(crate) autogenerate_mips: bool,
    pub(crate) transfer_count: u32,
    pending_debt: bool,
    abandoned: bool,
    failed: bool,
}

impl DeviceTexture {
    /// Create a handle for a defined texture
    ///
    /// No device work happens here; storage is allocated when the transfer
    /// worker starts the first transfer. Format and target are mapped up
    /// front so unsupported combinations fail immediately.
    pub fn new(
        texture: &Arc<Texture>,
        request: AllocationRequest,
        context: &HandleContext,
    ) -> TextureResult<Self> {
        let desc = texture.desc().ok_or(TextureError::Undefined(texture.id()))?;
        let target = format::eval_target(desc.target)?;
        let texel = format::eval_texel_format(desc.format)?;
        let mip_count = desc.mip_count;
        let max_mip = mip_count - 1;

        let (allocation, object) = match request {
            AllocationRequest::External => {
                let object = texture.external_object().ok_or_else(|| {
                    TextureError::InvalidDescription(format!(
                        "external texture {} has no device object",
                        texture.id()
                    ))
                })?;
                let recycler = texture.external_recycler();
                (Allocation::External { recycler }, Some(object))
            }
            AllocationRequest::Fixed { framebuffer } => (Allocation::Fixed { framebuffer }, None),
            AllocationRequest::Dense => (Allocation::Variable(VariableStorage::Dense), None),
            AllocationRequest::Sparse {
                page_index,
                page_dimensions,
            } => {
                let info = SparseInfo::new(
                    page_index,
                    page_dimensions,
                    texel.texel_bytes,
                    desc.dimensions,
                    mip_count,
                    target.faces,
                );
                (Allocation::Variable(VariableStorage::Sparse(info)), None)
            }
        };

        let external = matches!(allocation, Allocation::External { .. });
        let virtual_size = if external {
            0
        } else {
            (0..mip_count)
                .map(|mip| {
                    format::mip_face_bytes(desc.dimensions, mip, texel.texel_bytes)
                        * u64::from(target.faces)
                })
                .sum()
        };

        let handle = Self {
            id: texture.id(),
            label: texture.source().to_string(),
            source: Arc::downgrade(texture),
            device: context.device.clone(),
            memory: context.memory.clone(),
            target,
            texel,
            storage_format: desc.format,
            dimensions: desc.dimensions,
            allocation,
            object,
            sync_state: SyncState::Idle,
            storage_stamp: texture.stamp(),
            content_stamp: if external { texture.data_stamp() } else { 0 },
            pending_content_stamp: 0,
            mip_count,
            max_mip,
            floor_mip: resident_floor(desc.dimensions, max_mip, context.min_resident_extent),
            allocated_mip: 0,
            populated_mip: None,
            target_min_mip: 0,
            virtual_size,
            resident_size: 0,
            sampler: texture.sampler(),
            autogenerate_mips: texture.autogenerate_mips(),
            transfer_count: 0,
            pending_debt: false,
            abandoned: false,
            failed: false,
        };

        handle.memory.increment_textures();
        handle.memory.update_virtual(0, virtual_size);
        if handle.is_sparse() {
            handle.memory.increment_sparse_textures();
        }

        log::debug!(
            "Created {:?} handle for texture {} ({}): {}x{}, {} mips, {} faces",
            handle.kind(),
            handle.id,
            handle.label,
            desc.dimensions.x,
            desc.dimensions.y,
            mip_count,
            target.faces
        );
        Ok(handle)
    }

    /// Get the texture identifier
    pub fn id(&self) -> TextureId {
        self.id
    }

    /// Get the source name
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Get the allocation strategy
    pub fn kind(&self) -> AllocationKind {
        match &self.allocation {
            Allocation::External { .. } => AllocationKind::External,
            Allocation::Fixed { framebuffer: true } => AllocationKind::Framebuffer,
            Allocation::Fixed { framebuffer: false } => AllocationKind::Fixed,
            Allocation::Variable(VariableStorage::Dense) => AllocationKind::Dense,
            Allocation::Variable(VariableStorage::Sparse(_)) => AllocationKind::Sparse,
        }
    }

    pub fn is_variable(&self) -> bool {
        matches!(self.allocation, Allocation::Variable(_))
    }

    pub fn is_sparse(&self) -> bool {
        matches!(self.allocation, Allocation::Variable(VariableStorage::Sparse(_)))
    }

    /// Get the sparse page bookkeeping
    pub fn sparse_info(&self) -> Option<&SparseInfo> {
        match &self.allocation {
            Allocation::Variable(VariableStorage::Sparse(info)) => Some(info),
            _ => None,
        }
    }

    /// Get the device object, if storage exists
    pub fn object(&self) -> Option<DeviceObjectId> {
        self.object
    }

    pub fn sync_state(&self) -> SyncState {
        self.sync_state
    }

    pub fn storage_stamp(&self) -> Stamp {
        self.storage_stamp
    }

    pub fn content_stamp(&self) -> Stamp {
        self.content_stamp
    }

    pub fn mip_count(&self) -> u16 {
        self.mip_count
    }

    pub fn max_mip(&self) -> u16 {
        self.max_mip
    }

    /// First mip backed by device storage
    pub fn allocated_mip(&self) -> u16 {
        self.allocated_mip
    }

    /// First mip holding uploaded pixels
    pub fn populated_mip(&self) -> Option<u16> {
        self.populated_mip
    }

    /// Finest mip the budget currently allows
    pub fn target_min_mip(&self) -> u16 {
        self.target_min_mip
    }

    /// Coarsest mip a variable allocation may shrink to
    pub fn derez_limit(&self) -> u16 {
        match &self.allocation {
            Allocation::Variable(VariableStorage::Sparse(info)) => {
                self.floor_mip.min(info.max_sparse_level)
            }
            _ => self.floor_mip,
        }
    }

    /// Bytes the full mip chain would occupy
    pub fn virtual_size(&self) -> u64 {
        self.virtual_size
    }

    /// Bytes of device storage currently held
    pub fn resident_size(&self) -> u64 {
        self.resident_size
    }

    /// Number of completed transfers
    pub fn transfer_count(&self) -> u32 {
        self.transfer_count
    }

    /// Whether a device error invalidated this handle
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    /// Get the resource, if it is alive and still has the definition this handle was built for
    pub fn source(&self) -> Option<Arc<Texture>> {
        self.source
            .upgrade()
            .filter(|texture| texture.stamp() == self.storage_stamp)
    }

    /// Whether the resource this handle was built from is still alive
    pub fn is_source_alive(&self) -> bool {
        self.source.strong_count() > 0
    }

    /// Whether the handle no longer matches its resource's definition
    pub fn is_invalid(&self) -> bool {
        self.failed
            || self
                .source
                .upgrade()
                .is_none_or(|texture| self.storage_stamp < texture.stamp())
    }

    /// Whether the resource's pixels changed since the last completed upload
    pub fn is_outdated(&self) -> bool {
        self.sync_state == SyncState::Idle
            && self
                .source
                .upgrade()
                .is_some_and(|texture| self.content_stamp < texture.data_stamp())
    }

    /// Whether the handle can be sampled
    pub fn is_ready(&self) -> bool {
        self.sync_state == SyncState::Idle
            && !self.is_invalid()
            && !self.is_outdated()
            && match self.kind() {
                AllocationKind::External | AllocationKind::Framebuffer => self.object.is_some(),
                AllocationKind::Fixed => self.populated_mip == Some(0),
                AllocationKind::Dense | AllocationKind::Sparse => {
                    self.populated_mip.is_some_and(|mip| mip <= self.target_min_mip)
                }
            }
    }

    /// Size of one mip across all faces, as this allocation accounts it
    pub fn mip_size(&self, mip: u16) -> u64 {
        let faces = u64::from(self.target.faces);
        match &self.allocation {
            Allocation::Variable(VariableStorage::Sparse(info)) => {
                info.page_count(format::mip_dimensions(self.dimensions, mip))
                    * info.page_bytes
                    * faces
            }
            _ => format::mip_face_bytes(self.dimensions, mip, self.texel.texel_bytes) * faces,
        }
    }

    /// Size of the mips from `first` to the last
    pub fn range_size(&self, first: u16) -> u64 {
        (first..=self.max_mip).map(|mip| self.mip_size(mip)).sum()
    }

    /// Bytes this handle will hold once it matches the budget decision
    pub fn target_size(&self) -> u64 {
        match &self.allocation {
            Allocation::External { .. } => 0,
            Allocation::Fixed { .. } => self.range_size(0),
            Allocation::Variable(_) => self.range_size(self.target_min_mip),
        }
    }

    /// Queue for transfer; the transfer counts as pending until the worker settles it
    pub(crate) fn mark_pending(&mut self) {
        self.sync_state = SyncState::Pending;
        if !self.pending_debt {
            self.pending_debt = true;
            self.memory.increment_pending_transfers();
        }
    }

    /// Settle the pending transfer count
    pub(crate) fn clear_pending(&mut self) {
        if self.pending_debt {
            self.pending_debt = false;
            self.memory.decrement_pending_transfers();
        }
    }

    /// Allocate storage for the current mip window and reset population
    ///
    /// Called once per transfer on the worker. A handle whose resource was
    /// dropped or redefined is marked abandoned and uploads nothing.
    pub fn start_transfer(&mut self) -> TextureResult<()> {
        let Some(texture) = self.source() else {
            self.abandon();
            return Ok(());
        };
        self.sampler = texture.sampler();
        self.autogenerate_mips = texture.autogenerate_mips();
        self.pending_content_stamp = texture.data_stamp();

        match self.kind() {
            AllocationKind::External => {}
            AllocationKind::Fixed | AllocationKind::Framebuffer => {
                if self.object.is_none() {
                    self.object = Some(self.create_storage(0, None)?);
                }
                self.allocated_mip = 0;
                self.populated_mip = None;
            }
            AllocationKind::Dense => {
                self.populated_mip = None;
                if self.object.is_none() || self.allocated_mip != self.target_min_mip {
                    self.reallocate(self.target_min_mip)?;
                }
            }
            AllocationKind::Sparse => {
                if self.object.is_none() {
                    let page_index = self.sparse_info().map(|info| info.page_index);
                    let object = self.create_storage(0, page_index)?;
                    self.object = Some(object);
                    let levels = self.device.sparse_level_count(object)?;
                    if let Some(info) = self.sparse_info_mut() {
                        info.update_sparse_levels(levels);
                    }
                    // Nothing committed yet
                    self.allocated_mip = self.mip_count;
                }
                self.target_min_mip = self.target_min_mip.min(self.derez_limit());
                self.populated_mip = None;
                self.commit_to(self.target_min_mip)?;
            }
        }

        self.update_size();
        log::debug!(
            "Texture {} ({}) transfer started: mips {}..={} allocated, {} resident",
            self.id,
            self.label,
            self.allocated_mip,
            self.max_mip,
            mipflow_core::format_bytes(self.resident_size)
        );
        Ok(())
    }

    /// Upload the next mip, coarsest first
    ///
    /// Returns whether any mip remains to be uploaded. Mips without host
    /// pixels are skipped.
    pub fn continue_transfer(&mut self) -> TextureResult<bool> {
        if self.abandoned {
            return Ok(false);
        }
        let Some(texture) = self.source() else {
            self.abandon();
            return Ok(false);
        };
        let floor = match self.kind() {
            AllocationKind::External | AllocationKind::Framebuffer => return Ok(false),
            AllocationKind::Fixed => 0,
            AllocationKind::Dense | AllocationKind::Sparse => self.allocated_mip,
        };
        if self.object.is_none() || self.populated_mip.is_some_and(|mip| mip <= floor) {
            return Ok(false);
        }

        let faces = self.target.faces;
        let available = |mip: u16| (0..faces).any(|face| texture.is_mip_face_available(mip, face));
        let mut mip = self.populated_mip.map_or(self.max_mip, |populated| populated - 1);
        while mip > floor && !available(mip) {
            mip -= 1;
        }

        self.upload_mip(&texture, mip)?;
        self.populated_mip = Some(mip);
        Ok(mip > floor)
    }

    /// Complete the transfer on the worker
    ///
    /// Generates mips if requested, records the uploaded content stamp and
    /// refreshes the sampler and size accounting.
    pub fn finish_transfer(&mut self) -> TextureResult<()> {
        if !self.abandoned {
            if let Some(object) = self.object {
                if self.autogenerate_mips && self.populated_mip.is_some() {
                    self.device.generate_mips(object)?;
                }
            }
            self.content_stamp = self.pending_content_stamp;
            self.sync_sampler()?;
        }
        self.update_size();
        self.sync_state = SyncState::Transferred;
        Ok(())
    }

    /// Return a transferred handle to idle on the render thread
    ///
    /// Tells the resource which mip faces reached the device.
    pub fn post_transfer(&mut self) {
        if self.sync_state != SyncState::Transferred {
            return;
        }
        self.sync_state = SyncState::Idle;
        if self.abandoned || self.failed {
            return;
        }
        self.transfer_count += 1;

        let (Some(texture), Some(populated)) = (self.source(), self.populated_mip) else {
            return;
        };
        for mip in populated..=self.max_mip {
            for face in 0..self.target.faces {
                if texture.is_mip_face_available(mip, face) {
                    texture.notify_mip_face_gpu_loaded(mip, face);
                }
            }
        }
    }

    /// Invalidate after a device error
    ///
    /// Storage is released; the resource has to be redefined to retry.
    pub(crate) fn fail(&mut self, error: &TextureError) {
        log::error!(
            "Texture {} ({}) invalidated by device error: {}",
            self.id,
            self.label,
            error
        );
        self.failed = true;
        self.release_storage();
        if self.sync_state == SyncState::Pending {
            self.sync_state = SyncState::Transferred;
        }
        self.clear_pending();
    }

    fn abandon(&mut self) {
        if !self.abandoned {
            log::debug!(
                "Texture {} ({}) abandoned: resource dropped or redefined",
                self.id,
                self.label
            );
        }
        self.abandoned = true;
    }

    fn release_storage(&mut self) {
        if let Allocation::Variable(VariableStorage::Sparse(info)) = &mut self.allocation {
            info.allocated_pages = 0;
        }
        if !matches!(self.allocation, Allocation::External { .. }) {
            if let Some(object) = self.object.take() {
                self.device.destroy_texture(object);
            }
        }
        self.populated_mip = None;
        self.update_size();
    }

    pub(crate) fn sparse_info_mut(&mut self) -> Option<&mut SparseInfo> {
        match &mut self.allocation {
            Allocation::Variable(VariableStorage::Sparse(info)) => Some(info),
            _ => None,
        }
    }

    pub(crate) fn create_storage(
        &self,
        first_mip: u16,
        sparse_page_index: Option<u32>,
    ) -> TextureResult<DeviceObjectId> {
        let desc = StorageDesc {
            label: &self.label,
            dimension: self.target.dimension,
            format: self.texel.format,
            extent: format::mip_dimensions(self.dimensions, first_mip),
            levels: self.mip_count - first_mip,
            faces: self.target.faces,
            sparse_page_index,
        };
        Ok(self.device.create_texture(&desc)?)
    }

    /// Storage level holding a mip
    pub(crate) fn storage_level(&self, mip: u16) -> u16 {
        match self.allocation {
            Allocation::Variable(VariableStorage::Dense) => mip - self.allocated_mip,
            _ => mip,
        }
    }

    /// Upload every available face of one mip
    pub(crate) fn upload_mip(&self, texture: &Texture, mip: u16) -> TextureResult<()> {
        let Some(object) = self.object else {
            return Ok(());
        };
        let level = self.storage_level(mip);
        let extent = format::mip_dimensions(self.dimensions, mip);
        for face in 0..self.target.faces {
            let Some(pixels) = texture.mip_face(mip, face) else {
                continue;
            };
            let upload = format::eval_upload_format(self.storage_format, pixels.format)?;
            self.device.write_region(
                object,
                &TextureRegion::face(level, face, extent),
                upload.format,
                &pixels.bytes,
            )?;
        }
        Ok(())
    }

    /// Commit or decommit whole levels until the committed range starts at `mip`
    pub(crate) fn commit_to(&mut self, mip: u16) -> TextureResult<()> {
        assert!(self.is_sparse(), "page commitment on a non-sparse texture");
        while self.allocated_mip > mip {
            self.commit_level(self.allocated_mip - 1, true)?;
            self.allocated_mip -= 1;
        }
        while self.allocated_mip < mip {
            self.commit_level(self.allocated_mip, false)?;
            self.allocated_mip += 1;
        }
        Ok(())
    }

    fn commit_level(&mut self, mip: u16, commit: bool) -> TextureResult<()> {
        let Some(object) = self.object else {
            return Ok(());
        };
        let faces = self.target.faces;
        let extent = format::mip_dimensions(self.dimensions, mip);
        self.device
            .commit_region(object, &TextureRegion::faces(mip, faces, extent), commit)?;

        if let Some(info) = self.sparse_info_mut() {
            let pages = info.page_count(extent) * u64::from(faces);
            if commit {
                info.record_commit(pages);
            } else {
                info.record_decommit(pages);
            }
        }
        Ok(())
    }

    /// Decommit the page-granular levels, leaving the mip tail
    ///
    /// Returns the pages still accounted beyond the tail, which is zero
    /// unless commit bookkeeping went wrong.
    pub(crate) fn release_sparse_levels(&mut self) -> u64 {
        let Some(tail) = self.sparse_info().map(|info| info.max_sparse_level + 1) else {
            return 0;
        };
        let tail = tail.min(self.mip_count);
        if self.allocated_mip < tail {
            if let Err(err) = self.commit_to(tail) {
                log::warn!("Failed to decommit texture {} ({}): {}", self.id, self.label, err);
            }
        }
        let faces = u64::from(self.target.faces);
        let Some(info) = self.sparse_info() else {
            return 0;
        };
        let tail_pages: u64 = (self.allocated_mip.max(tail)..self.mip_count)
            .map(|mip| info.page_count(format::mip_dimensions(self.dimensions, mip)) * faces)
            .sum();
        info.allocated_pages.saturating_sub(tail_pages)
    }

    /// Apply the sampler, clamped to the resident levels
    pub(crate) fn sync_sampler(&self) -> TextureResult<()> {
        let Some(object) = self.object else {
            return Ok(());
        };
        let sampler = &self.sampler;
        let state = sampler.device_state();
        let state = match self.kind() {
            AllocationKind::External | AllocationKind::Fixed | AllocationKind::Framebuffer => state
                .with_levels(
                    sampler.first_mip(),
                    f32::from(sampler.min_mip),
                    sampler.max_lod(),
                ),
            AllocationKind::Dense => {
                let top = self.max_mip - self.allocated_mip;
                let base = self
                    .populated_mip
                    .map_or(top, |mip| mip - self.allocated_mip);
                let lod_min = sampler.first_mip().saturating_sub(self.allocated_mip).max(base);
                state.with_levels(base, f32::from(lod_min), f32::from(top))
            }
            AllocationKind::Sparse => {
                let base = self.populated_mip.unwrap_or(self.max_mip);
                let lod_min = sampler.first_mip().max(base);
                let lod_max = sampler.max_lod().min(f32::from(self.max_mip));
                state.with_levels(base, f32::from(lod_min), lod_max)
            }
        };
        self.device.apply_sampler(object, &state)?;
        Ok(())
    }

    /// Recompute resident size and push the change into the shared counters
    pub(crate) fn update_size(&mut self) {
        let size = match (&self.allocation, self.object) {
            (_, None) | (Allocation::External { .. }, _) => 0,
            (Allocation::Fixed { .. }, Some(_)) => self.range_size(0),
            (Allocation::Variable(VariableStorage::Dense), Some(_)) => {
                self.range_size(self.allocated_mip)
            }
            (Allocation::Variable(VariableStorage::Sparse(info)), Some(_)) => info.size(),
        };
        self.set_resident_size(size);
    }

    fn set_resident_size(&mut self, size: u64) {
        let previous = self.resident_size;
        self.memory.update_resident(previous, size);
        match self.kind() {
            AllocationKind::Framebuffer => self.memory.update_framebuffer(previous, size),
            AllocationKind::Sparse => self.memory.update_sparse(previous, size),
            _ => {}
        }
        self.resident_size = size;
    }
}

impl Drop for DeviceTexture {
    fn drop(&mut self) {
        self.clear_pending();

        if let Allocation::External { recycler } = &self.allocation {
            if let Some(object) = self.object.take() {
                match recycler {
                    Some(recycler) => recycler(object),
                    None => log::warn!(
                        "No recycler available for texture {} ({}), possible leak",
                        self.id,
                        self.label
                    ),
                }
            }
        }

        if self.is_sparse() && self.object.is_some() {
            let leaked = self.release_sparse_levels();
            if leaked > 0 {
                log::warn!(
                    "Allocated pages remaining {} in texture {} ({})",
                    leaked,
                    self.id,
                    self.label
                );
            }
            if let Err(err) = self.commit_to(self.mip_count) {
                log::warn!("Failed to decommit texture {} ({}): {}", self.id, self.label, err);
            }
            if let Some(info) = self.sparse_info_mut() {
                info.allocated_pages = 0;
            }
        }

        if let Some(object) = self.object.take() {
            self.device.destroy_texture(object);
        }
        self.set_resident_size(0);
        self.memory.update_virtual(self.virtual_size, 0);
        if self.is_sparse() {
            self.memory.decrement_sparse_textures();
        }
        self.memory.decrement_textures();
    }
}

/// First mip no wider than `extent` texels on either axis
fn resident_floor(dimensions: UVec3, max_mip: u16, extent: u32) -> u16 {
    let extent = extent.max(1);
    (0..=max_mip)
        .find(|&mip| {
            let dims = format::mip_dimensions(dimensions, mip);
            dims.x <= extent && dims.y <= extent
        })
        .unwrap_or(max_mip)
}
