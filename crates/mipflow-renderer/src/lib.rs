//! # Mipflow Renderer
//!
//! Texture residency management: decides which mip levels of each texture
//! live in device memory, uploads them on a background transfer worker, and
//! sheds detail when the configured budget is exceeded.
//!
//! ## Features
//! - Texel format and target mapping to device-native enumerations
//! - Fixed, dense and sparse allocation strategies
//! - Incremental mip-by-mip uploads, coarsest first
//! - Budget-driven eviction sweep, largest texture first
//! - Promotion back to full detail when the budget allows it
//! - Headless device for simulation and testing

pub mod device;
pub mod eviction;
pub mod format;
pub mod handle;
pub mod headless;
pub mod resource;
pub mod residency;
pub mod sampler;
pub mod sparse;
pub mod transfer;
pub mod variable;

pub use device::{
    Device, DeviceCapabilities, DeviceError, DeviceFeatures, DeviceObjectId, DeviceResult,
    StorageDesc, TextureRegion,
};
pub use eviction::SweepOutcome;
pub use format::{
    ComponentType, DeviceTarget, DeviceTexelFormat, Dimension, Semantic, TexelFormat,
    TextureTarget,
};
pub use handle::{
    Allocation, AllocationKind, AllocationRequest, DeviceTexture, SyncState, TextureHandle,
    WeakTextureHandle,
};
pub use headless::{DeviceCallStats, HeadlessConfig, HeadlessDevice};
pub use residency::{ResidencyConfig, ResidencyManager, SparseMode};
pub use resource::{HostRetention, Texture, TextureDesc, TextureId, TextureUsage};
pub use sampler::{DeviceSamplerState, Filter, SamplerDesc, WrapMode};
pub use sparse::SparseInfo;
pub use transfer::{
    TransferQueue, TransferStats, TransferStatsSnapshot, TransferThread, TransferWorker,
};

use mipflow_platform::PlatformError;
use thiserror::Error;

/// Texture residency errors
#[derive(Error, Debug)]
pub enum TextureError {
    #[error("Unsupported texel format: {0:?}")]
    UnsupportedFormat(TexelFormat),

    #[error("Unsupported texture target: {0:?}")]
    UnsupportedTarget(TextureTarget),

    #[error("Pixel format {provided:?} cannot be uploaded into {storage:?} storage")]
    IncompatibleUpload {
        storage: TexelFormat,
        provided: TexelFormat,
    },

    #[error("Texture {0} has not been defined")]
    Undefined(TextureId),

    #[error("Invalid texture description: {0}")]
    InvalidDescription(String),

    #[error("Mip {mip} out of range (texture has {count} mips)")]
    InvalidMip { mip: u16, count: u16 },

    #[error("Face {face} out of range (texture has {count} faces)")]
    InvalidFace { face: u8, count: u8 },

    #[error("Pixel data size mismatch: expected {expected} bytes, got {actual}")]
    DataSize { expected: u64, actual: u64 },

    #[error("Device error: {0}")]
    Device(#[from] DeviceError),

    #[error("Transfer worker error: {0}")]
    Worker(#[from] PlatformError),
}

impl TextureError {
    /// Whether this error stems from an unsupported configuration
    ///
    /// Configuration errors are not recoverable by retrying and callers are
    /// expected to stop.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::UnsupportedFormat(_) | Self::UnsupportedTarget(_) | Self::IncompatibleUpload { .. }
        )
    }
}

/// Result type for texture residency operations
pub type TextureResult<T> = Result<T, TextureError>;
