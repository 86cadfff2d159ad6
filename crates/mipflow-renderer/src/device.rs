//! Device Abstraction
//!
//! The narrow set of device operations the residency manager needs:
//! - Storage creation and destruction
//! - Region uploads and level-to-level copies
//! - Sparse page commitment
//! - Sampler application and mip generation
//!
//! All calls that touch device objects are made from the transfer worker, or
//! from commands the render thread queues onto it.

use bitflags::bitflags;
use glam::UVec3;
use thiserror::Error;

use crate::sampler::DeviceSamplerState;

/// Opaque device texture object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceObjectId(pub u64);

bitflags! {
    /// Optional device features
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct DeviceFeatures: u32 {
        /// Page-granular texture commitment
        const SPARSE_TEXTURES = 1 << 0;
        /// Anisotropic filtering
        const ANISOTROPIC_FILTERING = 1 << 1;
        /// Device-side mip generation
        const MIP_GENERATION = 1 << 2;
    }
}

/// Vendors whose sparse texture support is not trusted
const SPARSE_BLACKLIST: [&str; 3] = ["AMD", "ATI", "INTEL"];

/// What the device reports about itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCapabilities {
    pub vendor: String,
    pub features: DeviceFeatures,
}

impl DeviceCapabilities {
    /// Whether the device exposes sparse textures at all
    pub fn supports_sparse(&self) -> bool {
        self.features.contains(DeviceFeatures::SPARSE_TEXTURES)
    }

    /// Whether the vendor is known to have unreliable sparse support
    pub fn is_sparse_blacklisted(&self) -> bool {
        self.vendor
            .split(|c: char| !c.is_ascii_alphanumeric())
            .any(|word| SPARSE_BLACKLIST.iter().any(|name| word.eq_ignore_ascii_case(name)))
    }
}

/// Device storage allocation request
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StorageDesc<'a> {
    pub label: &'a str,
    pub dimension: wgpu::TextureDimension,
    pub format: wgpu::TextureFormat,
    /// Extent of the first storage level
    pub extent: UVec3,
    pub levels: u16,
    pub faces: u8,
    /// Page size index for sparse storage
    pub sparse_page_index: Option<u32>,
}

/// Rectangular region of one or more faces of a storage level
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureRegion {
    pub level: u16,
    pub first_face: u8,
    pub face_count: u8,
    pub origin: UVec3,
    pub extent: UVec3,
}

impl TextureRegion {
    /// Whole of one face of a level
    pub fn face(level: u16, face: u8, extent: UVec3) -> Self {
        Self {
            level,
            first_face: face,
            face_count: 1,
            origin: UVec3::ZERO,
            extent,
        }
    }

    /// Whole of every face of a level
    pub fn faces(level: u16, face_count: u8, extent: UVec3) -> Self {
        Self {
            level,
            first_face: 0,
            face_count,
            origin: UVec3::ZERO,
            extent,
        }
    }

    /// Place the region at an offset within the level
    pub fn at(mut self, origin: UVec3) -> Self {
        self.origin = origin;
        self
    }

    /// Get the number of texels in one face of the region
    pub fn texel_count(&self) -> u64 {
        let extent = self.extent.as_u64vec3();
        extent.x * extent.y * extent.z
    }
}

/// Transient device failures
///
/// These invalidate the handle that hit them; other handles keep going.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("Out of device memory ({requested} bytes requested)")]
    OutOfMemory { requested: u64 },

    #[error("Unknown device object {0:?}")]
    UnknownObject(DeviceObjectId),

    #[error("Region out of bounds: level {level} of {object:?}")]
    OutOfBounds { object: DeviceObjectId, level: u16 },

    #[error("Level {level} of {object:?} is not committed")]
    Uncommitted { object: DeviceObjectId, level: u16 },

    #[error("Upload size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    #[error("Sparse textures are not supported")]
    SparseUnsupported,

    #[error("Device lost: {0}")]
    Lost(String),
}

/// Result type for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Device operations used by texture residency
pub trait Device: Send + Sync {
    /// Get the device capabilities
    fn capabilities(&self) -> &DeviceCapabilities;

    /// Page sizes available for sparse storage of a format, in preference order
    fn sparse_page_sizes(
        &self,
        view: wgpu::TextureViewDimension,
        format: wgpu::TextureFormat,
    ) -> Vec<UVec3>;

    /// Allocate texture storage
    ///
    /// Sparse storage starts with no pages committed.
    fn create_texture(&self, desc: &StorageDesc<'_>) -> DeviceResult<DeviceObjectId>;

    /// Release texture storage
    fn destroy_texture(&self, object: DeviceObjectId);

    /// Upload pixels into a region
    fn write_region(
        &self,
        object: DeviceObjectId,
        region: &TextureRegion,
        format: wgpu::TextureFormat,
        data: &[u8],
    ) -> DeviceResult<()>;

    /// Copy a region into the same faces and origin of another object's level
    fn copy_region(
        &self,
        source: DeviceObjectId,
        region: &TextureRegion,
        destination: DeviceObjectId,
        destination_level: u16,
    ) -> DeviceResult<()>;

    /// Commit or decommit the pages backing a region
    fn commit_region(
        &self,
        object: DeviceObjectId,
        region: &TextureRegion,
        commit: bool,
    ) -> DeviceResult<()>;

    /// Get the number of page-granular levels of sparse storage
    ///
    /// Levels past this count form the mip tail.
    fn sparse_level_count(&self, object: DeviceObjectId) -> DeviceResult<u16>;

    /// Generate all levels below the first from its contents
    fn generate_mips(&self, object: DeviceObjectId) -> DeviceResult<()>;

    /// Apply sampler state to an object
    fn apply_sampler(&self, object: DeviceObjectId, sampler: &DeviceSamplerState) -> DeviceResult<()>;

    /// Submit queued work
    fn flush(&self);
}
