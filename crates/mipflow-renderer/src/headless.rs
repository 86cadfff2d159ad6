//! Headless Device
//!
//! An in-memory [`Device`] that keeps texel data on the host. Used by the
//! CLI simulator, tests and benchmarks.
//!
//! Every call is counted in [`DeviceCallStats`], and allocations or uploads
//! can be made to fail on demand to exercise error paths.

use ahash::AHashMap;
use glam::UVec3;
use parking_lot::Mutex;
use serde::Serialize;
use smallvec::SmallVec;

use crate::device::{
    Device, DeviceCapabilities, DeviceError, DeviceFeatures, DeviceObjectId, DeviceResult,
    StorageDesc, TextureRegion,
};
use crate::format;
use crate::sampler::DeviceSamplerState;

/// Headless device configuration
#[derive(Debug, Clone)]
pub struct HeadlessConfig {
    pub vendor: String,
    pub features: DeviceFeatures,
    /// Size of one sparse page in bytes
    pub sparse_page_bytes: u32,
    /// Reject allocations beyond this many bytes
    pub memory_limit: Option<u64>,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            vendor: "Mipflow Headless".to_string(),
            features: DeviceFeatures::all(),
            sparse_page_bytes: 64 * 1024,
            memory_limit: None,
        }
    }
}

impl HeadlessConfig {
    /// Configuration without sparse texture support
    pub fn dense_only() -> Self {
        Self {
            features: DeviceFeatures::all() - DeviceFeatures::SPARSE_TEXTURES,
            ..Default::default()
        }
    }
}

/// Count of device calls by kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeviceCallStats {
    pub creates: u64,
    pub destroys: u64,
    pub writes: u64,
    pub copies: u64,
    pub commits: u64,
    pub decommits: u64,
    pub mip_generations: u64,
    pub sampler_writes: u64,
    pub flushes: u64,
}

struct Level {
    extent: UVec3,
    committed: bool,
    faces: SmallVec<[Option<Vec<u8>>; 1]>,
}

impl Level {
    fn byte_len(&self, texel_bytes: u32) -> usize {
        let extent = self.extent.as_u64vec3();
        (extent.x * extent.y * extent.z * u64::from(texel_bytes)) as usize
    }

    fn face_mut(&mut self, face: u8, texel_bytes: u32) -> &mut Vec<u8> {
        let len = self.byte_len(texel_bytes);
        self.faces[usize::from(face)].get_or_insert_with(|| vec![0; len])
    }
}

struct HeadlessObject {
    label: String,
    texel_bytes: u32,
    faces: u8,
    levels: Vec<Level>,
    page: Option<UVec3>,
    sampler: Option<DeviceSamplerState>,
    bytes: u64,
}

impl HeadlessObject {
    fn level(&self, object: DeviceObjectId, region: &TextureRegion) -> DeviceResult<&Level> {
        let level = self
            .levels
            .get(usize::from(region.level))
            .ok_or(DeviceError::OutOfBounds {
                object,
                level: region.level,
            })?;
        let face_end = u16::from(region.first_face) + u16::from(region.face_count);
        let in_bounds = face_end <= u16::from(self.faces)
            && (region.origin + region.extent).cmple(level.extent).all();
        if !in_bounds {
            return Err(DeviceError::OutOfBounds {
                object,
                level: region.level,
            });
        }
        if !level.committed {
            return Err(DeviceError::Uncommitted {
                object,
                level: region.level,
            });
        }
        Ok(level)
    }

    fn level_page_bytes(&self, level: usize, page_bytes: u32) -> u64 {
        let Some(page) = self.page else {
            return 0;
        };
        let extent = self.levels[level].extent;
        let pages = (extent + page - UVec3::ONE) / page;
        u64::from(pages.x) * u64::from(pages.y) * u64::from(pages.z)
            * u64::from(self.faces)
            * u64::from(page_bytes)
    }
}

#[derive(Default)]
struct HeadlessState {
    objects: AHashMap<DeviceObjectId, HeadlessObject>,
    next_id: u64,
    stats: DeviceCallStats,
    allocated_bytes: u64,
    fail_allocations: u32,
    fail_writes: u32,
}

impl HeadlessState {
    fn reserve(&mut self, bytes: u64, limit: Option<u64>) -> DeviceResult<()> {
        if self.fail_allocations > 0 {
            self.fail_allocations -= 1;
            return Err(DeviceError::OutOfMemory { requested: bytes });
        }
        if limit.is_some_and(|limit| self.allocated_bytes + bytes > limit) {
            return Err(DeviceError::OutOfMemory { requested: bytes });
        }
        self.allocated_bytes += bytes;
        Ok(())
    }
}

/// In-memory device
pub struct HeadlessDevice {
    capabilities: DeviceCapabilities,
    config: HeadlessConfig,
    state: Mutex<HeadlessState>,
}

impl HeadlessDevice {
    /// Create a headless device with default configuration
    pub fn new() -> Self {
        Self::with_config(HeadlessConfig::default())
    }

    /// Create a headless device
    pub fn with_config(config: HeadlessConfig) -> Self {
        log::debug!(
            "Creating headless device '{}' with features {:?}",
            config.vendor,
            config.features
        );
        Self {
            capabilities: DeviceCapabilities {
                vendor: config.vendor.clone(),
                features: config.features,
            },
            config,
            state: Mutex::new(HeadlessState {
                next_id: 1,
                ..Default::default()
            }),
        }
    }

    /// Get the call counters
    pub fn stats(&self) -> DeviceCallStats {
        self.state.lock().stats
    }

    /// Zero the call counters
    pub fn reset_stats(&self) {
        self.state.lock().stats = DeviceCallStats::default();
    }

    /// Get the number of live objects
    pub fn object_count(&self) -> usize {
        self.state.lock().objects.len()
    }

    /// Get the bytes currently allocated or committed
    pub fn allocated_bytes(&self) -> u64 {
        self.state.lock().allocated_bytes
    }

    /// Make the next `count` allocations or commits fail
    pub fn fail_next_allocations(&self, count: u32) {
        self.state.lock().fail_allocations = count;
    }

    /// Make the next `count` uploads fail
    pub fn fail_next_writes(&self, count: u32) {
        self.state.lock().fail_writes = count;
    }

    /// Get the label an object was created with
    pub fn label(&self, object: DeviceObjectId) -> Option<String> {
        self.state
            .lock()
            .objects
            .get(&object)
            .map(|obj| obj.label.clone())
    }

    /// Get the number of storage levels of an object
    pub fn level_count(&self, object: DeviceObjectId) -> Option<u16> {
        self.state
            .lock()
            .objects
            .get(&object)
            .map(|obj| obj.levels.len() as u16)
    }

    /// Whether a storage level has pages committed
    pub fn is_level_committed(&self, object: DeviceObjectId, level: u16) -> bool {
        self.state
            .lock()
            .objects
            .get(&object)
            .and_then(|obj| obj.levels.get(usize::from(level)))
            .is_some_and(|level| level.committed)
    }

    /// Read back one face of a storage level
    ///
    /// Returns `None` if nothing was ever written to it.
    pub fn read_level(&self, object: DeviceObjectId, level: u16, face: u8) -> Option<Vec<u8>> {
        self.state
            .lock()
            .objects
            .get(&object)
            .and_then(|obj| obj.levels.get(usize::from(level)))
            .and_then(|level| level.faces.get(usize::from(face)))
            .and_then(|data| data.clone())
    }

    /// Get the sampler state last applied to an object
    pub fn sampler(&self, object: DeviceObjectId) -> Option<DeviceSamplerState> {
        self.state
            .lock()
            .objects
            .get(&object)
            .and_then(|obj| obj.sampler)
    }

    fn page_dimensions(&self, texel_bytes: u32) -> UVec3 {
        let texels = (self.config.sparse_page_bytes / texel_bytes.max(1)).max(1);
        let log = texels.ilog2();
        let width = 1u32 << log.div_ceil(2);
        UVec3::new(width, (texels / width).max(1), 1)
    }
}

impl Default for HeadlessDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl Device for HeadlessDevice {
    fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    fn sparse_page_sizes(
        &self,
        view: wgpu::TextureViewDimension,
        format: wgpu::TextureFormat,
    ) -> Vec<UVec3> {
        let supported_view = matches!(
            view,
            wgpu::TextureViewDimension::D2 | wgpu::TextureViewDimension::Cube
        );
        match format.block_copy_size(None) {
            Some(texel_bytes) if supported_view && self.capabilities.supports_sparse() => {
                vec![self.page_dimensions(texel_bytes)]
            }
            _ => Vec::new(),
        }
    }

    fn create_texture(&self, desc: &StorageDesc<'_>) -> DeviceResult<DeviceObjectId> {
        if desc.sparse_page_index.is_some() && !self.capabilities.supports_sparse() {
            return Err(DeviceError::SparseUnsupported);
        }

        let texel_bytes = desc.format.block_copy_size(None).unwrap_or(4);
        let sparse = desc.sparse_page_index.is_some();
        let levels: Vec<Level> = (0..desc.levels.max(1))
            .map(|level| Level {
                extent: format::mip_dimensions(desc.extent, level),
                committed: !sparse,
                faces: SmallVec::from_elem(None, usize::from(desc.faces)),
            })
            .collect();

        let bytes = if sparse {
            0
        } else {
            levels
                .iter()
                .map(|level| level.byte_len(texel_bytes) as u64 * u64::from(desc.faces))
                .sum()
        };

        let mut state = self.state.lock();
        state.reserve(bytes, self.config.memory_limit)?;
        let object = DeviceObjectId(state.next_id);
        state.next_id += 1;
        state.stats.creates += 1;
        state.objects.insert(
            object,
            HeadlessObject {
                label: desc.label.to_string(),
                texel_bytes,
                faces: desc.faces,
                levels,
                page: sparse.then(|| self.page_dimensions(texel_bytes)),
                sampler: None,
                bytes,
            },
        );
        log::trace!("Created {:?} '{}' ({} bytes)", object, desc.label, bytes);
        Ok(object)
    }

    fn destroy_texture(&self, object: DeviceObjectId) {
        let mut state = self.state.lock();
        match state.objects.remove(&object) {
            Some(obj) => {
                state.allocated_bytes -= obj.bytes;
                state.stats.destroys += 1;
            }
            None => log::warn!("Destroying unknown device object {:?}", object),
        }
    }

    fn write_region(
        &self,
        object: DeviceObjectId,
        region: &TextureRegion,
        format: wgpu::TextureFormat,
        data: &[u8],
    ) -> DeviceResult<()> {
        let mut state = self.state.lock();
        if state.fail_writes > 0 {
            state.fail_writes -= 1;
            return Err(DeviceError::Lost("injected write failure".to_string()));
        }

        let obj = state
            .objects
            .get_mut(&object)
            .ok_or(DeviceError::UnknownObject(object))?;
        obj.level(object, region)?;

        let texel_bytes = format.block_copy_size(None).unwrap_or(obj.texel_bytes);
        let face_bytes = region.texel_count() * u64::from(texel_bytes);
        let expected = face_bytes * u64::from(region.face_count);
        if data.len() as u64 != expected {
            return Err(DeviceError::SizeMismatch {
                expected,
                actual: data.len() as u64,
            });
        }

        let storage_bytes = obj.texel_bytes;
        let level = &mut obj.levels[usize::from(region.level)];
        let level_extent = level.extent;
        for (i, chunk) in data.chunks_exact(face_bytes as usize).enumerate() {
            let face = region.first_face + i as u8;
            blit(
                chunk,
                region.extent,
                UVec3::ZERO,
                level.face_mut(face, storage_bytes),
                level_extent,
                region.origin,
                region.extent,
                storage_bytes,
            );
        }
        state.stats.writes += 1;
        Ok(())
    }

    fn copy_region(
        &self,
        source: DeviceObjectId,
        region: &TextureRegion,
        destination: DeviceObjectId,
        destination_level: u16,
    ) -> DeviceResult<()> {
        let mut state = self.state.lock();

        let src = state
            .objects
            .get(&source)
            .ok_or(DeviceError::UnknownObject(source))?;
        let texel_bytes = src.texel_bytes;
        let src_level = src.level(source, region)?;
        let row_bytes = region.texel_count() as usize * texel_bytes as usize;
        let staged: Vec<Option<Vec<u8>>> = (0..region.face_count)
            .map(|i| {
                src_level.faces[usize::from(region.first_face + i)]
                    .as_ref()
                    .map(|face| {
                        let mut out = vec![0; row_bytes];
                        blit(
                            face,
                            src_level.extent,
                            region.origin,
                            &mut out,
                            region.extent,
                            UVec3::ZERO,
                            region.extent,
                            texel_bytes,
                        );
                        out
                    })
            })
            .collect();

        let dst = state
            .objects
            .get_mut(&destination)
            .ok_or(DeviceError::UnknownObject(destination))?;
        let dst_region = TextureRegion {
            level: destination_level,
            ..*region
        };
        dst.level(destination, &dst_region)?;
        let dst_bytes = dst.texel_bytes;
        if dst_bytes != texel_bytes {
            return Err(DeviceError::SizeMismatch {
                expected: u64::from(dst_bytes),
                actual: u64::from(texel_bytes),
            });
        }

        let level = &mut dst.levels[usize::from(destination_level)];
        let level_extent = level.extent;
        for (i, data) in staged.into_iter().enumerate() {
            let face = region.first_face + i as u8;
            match data {
                Some(data) => blit(
                    &data,
                    region.extent,
                    UVec3::ZERO,
                    level.face_mut(face, dst_bytes),
                    level_extent,
                    region.origin,
                    region.extent,
                    dst_bytes,
                ),
                None => level.faces[usize::from(face)] = None,
            }
        }
        state.stats.copies += 1;
        Ok(())
    }

    fn commit_region(
        &self,
        object: DeviceObjectId,
        region: &TextureRegion,
        commit: bool,
    ) -> DeviceResult<()> {
        let mut state = self.state.lock();
        let obj = state
            .objects
            .get(&object)
            .ok_or(DeviceError::UnknownObject(object))?;
        if obj.page.is_none() {
            return Err(DeviceError::SparseUnsupported);
        }
        let index = usize::from(region.level);
        let Some(level) = obj.levels.get(index) else {
            return Err(DeviceError::OutOfBounds {
                object,
                level: region.level,
            });
        };
        if level.committed == commit {
            return Ok(());
        }

        // Commitment is tracked per level
        let bytes = obj.level_page_bytes(index, self.config.sparse_page_bytes);
        if commit {
            state.reserve(bytes, self.config.memory_limit)?;
            state.stats.commits += 1;
        } else {
            state.allocated_bytes -= bytes;
            state.stats.decommits += 1;
        }

        let Some(obj) = state.objects.get_mut(&object) else {
            return Err(DeviceError::UnknownObject(object));
        };
        let level = &mut obj.levels[index];
        level.committed = commit;
        if !commit {
            level.faces.iter_mut().for_each(|face| *face = None);
        }
        if commit {
            obj.bytes += bytes;
        } else {
            obj.bytes -= bytes;
        }
        Ok(())
    }

    fn sparse_level_count(&self, object: DeviceObjectId) -> DeviceResult<u16> {
        let state = self.state.lock();
        let obj = state
            .objects
            .get(&object)
            .ok_or(DeviceError::UnknownObject(object))?;
        let page = obj.page.ok_or(DeviceError::SparseUnsupported)?;
        let count = obj
            .levels
            .iter()
            .take_while(|level| level.extent.x >= page.x && level.extent.y >= page.y)
            .count();
        Ok(count as u16)
    }

    fn generate_mips(&self, object: DeviceObjectId) -> DeviceResult<()> {
        let mut state = self.state.lock();
        let obj = state
            .objects
            .get_mut(&object)
            .ok_or(DeviceError::UnknownObject(object))?;
        let texel_bytes = obj.texel_bytes;

        // Nearest-texel reduction of each level from the one above it
        for index in 1..obj.levels.len() {
            let (upper, lower) = obj.levels.split_at_mut(index);
            let parent = &upper[index - 1];
            let child = &mut lower[0];
            if !child.committed {
                continue;
            }
            for face in 0..usize::from(obj.faces) {
                let Some(source) = parent.faces[face].as_ref() else {
                    continue;
                };
                let mut out = vec![0; child.byte_len(texel_bytes)];
                downsample(source, parent.extent, &mut out, child.extent, texel_bytes);
                child.faces[face] = Some(out);
            }
        }
        state.stats.mip_generations += 1;
        Ok(())
    }

    fn apply_sampler(&self, object: DeviceObjectId, sampler: &DeviceSamplerState) -> DeviceResult<()> {
        let mut state = self.state.lock();
        let obj = state
            .objects
            .get_mut(&object)
            .ok_or(DeviceError::UnknownObject(object))?;
        obj.sampler = Some(*sampler);
        state.stats.sampler_writes += 1;
        Ok(())
    }

    fn flush(&self) {
        self.state.lock().stats.flushes += 1;
    }
}

/// Copy a box of texels between two tightly packed buffers
#[allow(clippy::too_many_arguments)]
fn blit(
    src: &[u8],
    src_extent: UVec3,
    src_origin: UVec3,
    dst: &mut [u8],
    dst_extent: UVec3,
    dst_origin: UVec3,
    extent: UVec3,
    texel_bytes: u32,
) {
    let texel = texel_bytes as usize;
    let row = extent.x as usize * texel;
    let offset = |base: UVec3, size: UVec3, y: u32, z: u32| -> usize {
        let (x, y, z) = (base.x as usize, (base.y + y) as usize, (base.z + z) as usize);
        ((z * size.y as usize + y) * size.x as usize + x) * texel
    };
    for z in 0..extent.z {
        for y in 0..extent.y {
            let s = offset(src_origin, src_extent, y, z);
            let d = offset(dst_origin, dst_extent, y, z);
            dst[d..d + row].copy_from_slice(&src[s..s + row]);
        }
    }
}

fn downsample(src: &[u8], src_extent: UVec3, dst: &mut [u8], dst_extent: UVec3, texel_bytes: u32) {
    let texel = texel_bytes as usize;
    let scale = (src_extent / dst_extent).max(UVec3::ONE);
    for z in 0..dst_extent.z {
        for y in 0..dst_extent.y {
            for x in 0..dst_extent.x {
                let s = UVec3::new(x, y, z) * scale;
                let s = ((s.z * src_extent.y + s.y) * src_extent.x + s.x) as usize * texel;
                let d = ((z * dst_extent.y + y) * dst_extent.x + x) as usize * texel;
                dst[d..d + texel].copy_from_slice(&src[s..s + texel]);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn storage(extent: UVec3, levels: u16, sparse: bool) -> StorageDesc<'static> {
        StorageDesc {
            label: "test",
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba8Unorm,
            extent,
            levels,
            faces: 1,
            sparse_page_index: sparse.then_some(0),
        }
    }

    #[test]
    fn test_create_and_destroy() {
        let device = HeadlessDevice::new();
        let object = device
            .create_texture(&storage(UVec3::new(4, 4, 1), 3, false))
            .unwrap();

        assert_eq!(device.object_count(), 1);
        assert_eq!(device.level_count(object), Some(3));
        assert_eq!(device.allocated_bytes(), (16 + 4 + 1) * 4);

        device.destroy_texture(object);
        assert_eq!(device.object_count(), 0);
        assert_eq!(device.allocated_bytes(), 0);
        assert_eq!(device.stats().creates, 1);
        assert_eq!(device.stats().destroys, 1);
    }

    #[test]
    fn test_write_and_read() {
        let device = HeadlessDevice::new();
        let object = device
            .create_texture(&storage(UVec3::new(4, 4, 1), 1, false))
            .unwrap();

        let texels: Vec<u8> = (0..64).collect();
        let region = TextureRegion::face(0, 0, UVec3::new(4, 4, 1));
        device
            .write_region(object, &region, wgpu::TextureFormat::Rgba8Unorm, &texels)
            .unwrap();
        assert_eq!(device.read_level(object, 0, 0).unwrap(), texels);

        let patch = [255u8; 4 * 4];
        let sub = TextureRegion::face(0, 0, UVec3::new(2, 2, 1)).at(UVec3::new(2, 2, 0));
        device
            .write_region(object, &sub, wgpu::TextureFormat::Rgba8Unorm, &patch)
            .unwrap();
        let data = device.read_level(object, 0, 0).unwrap();
        assert_eq!(&data[0..4], &[0, 1, 2, 3]);
        assert_eq!(&data[(2 * 4 + 2) * 4..(2 * 4 + 3) * 4], &[255; 4]);
    }

    #[test]
    fn test_write_validation() {
        let device = HeadlessDevice::new();
        let object = device
            .create_texture(&storage(UVec3::new(4, 4, 1), 1, false))
            .unwrap();
        let format = wgpu::TextureFormat::Rgba8Unorm;

        let bad_size = device.write_region(object, &TextureRegion::face(0, 0, UVec3::new(4, 4, 1)), format, &[0; 3]);
        assert!(matches!(bad_size, Err(DeviceError::SizeMismatch { .. })));

        let out_of_bounds = device.write_region(object, &TextureRegion::face(1, 0, UVec3::ONE), format, &[0; 4]);
        assert!(matches!(out_of_bounds, Err(DeviceError::OutOfBounds { .. })));

        let unknown = device.write_region(DeviceObjectId(99), &TextureRegion::face(0, 0, UVec3::ONE), format, &[0; 4]);
        assert!(matches!(unknown, Err(DeviceError::UnknownObject(_))));
    }

    #[test]
    fn test_copy_region() {
        let device = HeadlessDevice::new();
        let format = wgpu::TextureFormat::Rgba8Unorm;
        let source = device
            .create_texture(&storage(UVec3::new(8, 8, 1), 2, false))
            .unwrap();
        let destination = device
            .create_texture(&storage(UVec3::new(4, 4, 1), 1, false))
            .unwrap();

        let texels = vec![7u8; 4 * 4 * 4];
        let region = TextureRegion::face(1, 0, UVec3::new(4, 4, 1));
        device.write_region(source, &region, format, &texels).unwrap();
        device.copy_region(source, &region, destination, 0).unwrap();

        assert_eq!(device.read_level(destination, 0, 0).unwrap(), texels);
        assert_eq!(device.stats().copies, 1);
    }

    #[test]
    fn test_sparse_commit() {
        let device = HeadlessDevice::new();
        let pages = device.sparse_page_sizes(
            wgpu::TextureViewDimension::D2,
            wgpu::TextureFormat::Rgba8Unorm,
        );
        assert_eq!(pages, vec![UVec3::new(128, 128, 1)]);

        let object = device
            .create_texture(&storage(UVec3::new(512, 512, 1), 10, true))
            .unwrap();
        assert_eq!(device.allocated_bytes(), 0);
        assert_eq!(device.sparse_level_count(object).unwrap(), 3);

        let region = TextureRegion::faces(1, 1, UVec3::new(256, 256, 1));
        let write = device.write_region(
            object,
            &region,
            wgpu::TextureFormat::Rgba8Unorm,
            &vec![0; 256 * 256 * 4],
        );
        assert!(matches!(write, Err(DeviceError::Uncommitted { .. })));

        device.commit_region(object, &region, true).unwrap();
        assert!(device.is_level_committed(object, 1));
        assert_eq!(device.allocated_bytes(), 4 * 64 * 1024);

        device.commit_region(object, &region, false).unwrap();
        assert!(!device.is_level_committed(object, 1));
        assert_eq!(device.allocated_bytes(), 0);
        assert_eq!(device.stats().commits, 1);
        assert_eq!(device.stats().decommits, 1);
    }

    #[test]
    fn test_dense_only_has_no_pages() {
        let device = HeadlessDevice::with_config(HeadlessConfig::dense_only());
        assert!(!device.capabilities().supports_sparse());
        assert!(device
            .sparse_page_sizes(wgpu::TextureViewDimension::D2, wgpu::TextureFormat::Rgba8Unorm)
            .is_empty());
        assert!(matches!(
            device.create_texture(&storage(UVec3::new(256, 256, 1), 1, true)),
            Err(DeviceError::SparseUnsupported)
        ));
    }

    #[test]
    fn test_failure_injection() {
        let device = HeadlessDevice::new();
        device.fail_next_allocations(1);
        assert!(matches!(
            device.create_texture(&storage(UVec3::new(4, 4, 1), 1, false)),
            Err(DeviceError::OutOfMemory { .. })
        ));
        let object = device
            .create_texture(&storage(UVec3::new(4, 4, 1), 1, false))
            .unwrap();

        device.fail_next_writes(1);
        let region = TextureRegion::face(0, 0, UVec3::new(4, 4, 1));
        let format = wgpu::TextureFormat::Rgba8Unorm;
        assert!(device.write_region(object, &region, format, &[0; 64]).is_err());
        assert!(device.write_region(object, &region, format, &[0; 64]).is_ok());
    }

    #[test]
    fn test_memory_limit() {
        let device = HeadlessDevice::with_config(HeadlessConfig {
            memory_limit: Some(100),
            ..Default::default()
        });
        assert!(device
            .create_texture(&storage(UVec3::new(4, 4, 1), 1, false))
            .is_ok());
        assert!(device
            .create_texture(&storage(UVec3::new(4, 4, 1), 1, false))
            .is_err());
    }

    #[test]
    fn test_generate_mips() {
        let device = HeadlessDevice::new();
        let object = device
            .create_texture(&storage(UVec3::new(2, 2, 1), 2, false))
            .unwrap();
        let texels: Vec<u8> = (0..16).collect();
        device
            .write_region(
                object,
                &TextureRegion::face(0, 0, UVec3::new(2, 2, 1)),
                wgpu::TextureFormat::Rgba8Unorm,
                &texels,
            )
            .unwrap();
        device.generate_mips(object).unwrap();

        assert_eq!(device.read_level(object, 1, 0).unwrap(), vec![0, 1, 2, 3]);
        assert_eq!(device.stats().mip_generations, 1);
    }
}
