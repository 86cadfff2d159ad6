//! Texture Resources
//!
//! Host-side texture definitions: shape, format, per-mip/face pixel data and
//! the stamps the residency manager compares against.
//!
//! A [`Texture`] is shared by the application and the residency manager. The
//! device handle only keeps a weak reference back to it, so dropping the
//! last application reference abandons any upload in flight.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use glam::UVec3;
use mipflow_core::Stamp;
use parking_lot::RwLock;
use smallvec::SmallVec;

use crate::device::DeviceObjectId;
use crate::format::{self, TexelFormat, TextureTarget};
use crate::sampler::SamplerDesc;
use crate::{TextureError, TextureResult};

static NEXT_TEXTURE_ID: AtomicU64 = AtomicU64::new(1);

/// Unique texture identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TextureId(u64);

impl TextureId {
    fn next() -> Self {
        Self(NEXT_TEXTURE_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw identifier value
    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TextureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Usage class, which selects the allocation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureUsage {
    /// Storage supplied by an external producer
    External,
    /// Render target, counted as framebuffer memory
    RenderBuffer,
    /// Always fully resident
    StrictResource,
    /// Streamed; mips are shed under memory pressure
    Resource,
}

/// Whether host pixel data is kept after it reaches the device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HostRetention {
    /// Keep pixels so shed mips can be promoted again
    #[default]
    Keep,
    /// Drop pixels once the device acknowledges the upload
    ReleaseAfterUpload,
}

/// Callback that takes back an externally produced device object
pub type ExternalRecycler = Arc<dyn Fn(DeviceObjectId) + Send + Sync>;

/// Texture shape description
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureDesc {
    pub target: TextureTarget,
    pub format: TexelFormat,
    pub dimensions: UVec3,
    /// Number of mips; zero means a full chain
    pub mip_count: u16,
}

impl TextureDesc {
    /// Describe a 2D texture with a full mip chain
    pub fn new_2d(format: TexelFormat, width: u32, height: u32) -> Self {
        Self {
            target: TextureTarget::Tex2D,
            format,
            dimensions: UVec3::new(width, height, 1),
            mip_count: 0,
        }
    }

    /// Describe a cube texture with a full mip chain
    pub fn new_cube(format: TexelFormat, size: u32) -> Self {
        Self {
            target: TextureTarget::Cube,
            format,
            dimensions: UVec3::new(size, size, 1),
            mip_count: 0,
        }
    }

    /// Limit the mip chain
    pub fn with_mips(mut self, mip_count: u16) -> Self {
        self.mip_count = mip_count;
        self
    }
}

/// Pixel data of one mip face
#[derive(Debug, Clone)]
pub struct MipFace {
    pub format: TexelFormat,
    pub bytes: Arc<[u8]>,
}

#[derive(Debug, Clone, Default)]
struct FaceSlot {
    data: Option<MipFace>,
    gpu_loaded: bool,
}

#[derive(Default)]
struct TextureState {
    desc: Option<TextureDesc>,
    mips: Vec<SmallVec<[FaceSlot; 1]>>,
    stamp: Stamp,
    data_stamp: Stamp,
    sampler: SamplerDesc,
    autogenerate_mips: bool,
    external: Option<DeviceObjectId>,
    recycler: Option<ExternalRecycler>,
}

/// Host texture resource
pub struct Texture {
    id: TextureId,
    source: String,
    usage: TextureUsage,
    retention: HostRetention,
    state: RwLock<TextureState>,
}

impl Texture {
    /// Create an undefined texture
    pub fn new(source: impl Into<String>, usage: TextureUsage) -> Self {
        Self {
            id: TextureId::next(),
            source: source.into(),
            usage,
            retention: HostRetention::default(),
            state: RwLock::new(TextureState::default()),
        }
    }

    /// Set the host retention policy
    pub fn with_retention(mut self, retention: HostRetention) -> Self {
        self.retention = retention;
        self
    }

    /// Get the texture identifier
    pub fn id(&self) -> TextureId {
        self.id
    }

    /// Get the source name used in logs
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Get the usage class
    pub fn usage(&self) -> TextureUsage {
        self.usage
    }

    /// Get the host retention policy
    pub fn retention(&self) -> HostRetention {
        self.retention
    }

    /// (Re)define the texture shape, discarding all pixel data
    ///
    /// Bumps the definition stamp, which invalidates any device handle built
    /// from the previous definition.
    pub fn define(&self, desc: TextureDesc) -> TextureResult<()> {
        let dimensions = desc.dimensions;
        if dimensions.x == 0 || dimensions.y == 0 || dimensions.z == 0 {
            return Err(TextureError::InvalidDescription(format!(
                "zero-sized dimensions {}x{}x{}",
                dimensions.x, dimensions.y, dimensions.z
            )));
        }
        if desc.target != TextureTarget::Tex3D && dimensions.z != 1 {
            return Err(TextureError::InvalidDescription(format!(
                "{:?} texture with depth {}",
                desc.target, dimensions.z
            )));
        }
        if desc.target == TextureTarget::Cube && dimensions.x != dimensions.y {
            return Err(TextureError::InvalidDescription(format!(
                "cube faces must be square, got {}x{}",
                dimensions.x, dimensions.y
            )));
        }

        let full_chain = format::full_mip_count(dimensions);
        let mip_count = match desc.mip_count {
            0 => full_chain,
            count if count <= full_chain => count,
            count => {
                return Err(TextureError::InvalidDescription(format!(
                    "{} mips requested, at most {} possible",
                    count, full_chain
                )));
            }
        };

        let desc = TextureDesc { mip_count, ..desc };
        let faces = usize::from(desc.target.face_count());

        let mut state = self.state.write();
        state.mips = (0..mip_count)
            .map(|_| SmallVec::from_elem(FaceSlot::default(), faces))
            .collect();
        state.desc = Some(desc);
        state.stamp += 1;
        state.data_stamp += 1;
        log::trace!("Texture {} ({}) defined: {:?}", self.id, self.source, desc);
        Ok(())
    }

    /// Whether the texture has been defined
    pub fn is_defined(&self) -> bool {
        self.state.read().desc.is_some()
    }

    /// Get the current shape description
    pub fn desc(&self) -> Option<TextureDesc> {
        self.state.read().desc
    }

    /// Get the definition stamp
    pub fn stamp(&self) -> Stamp {
        self.state.read().stamp
    }

    /// Get the content stamp
    pub fn data_stamp(&self) -> Stamp {
        self.state.read().data_stamp
    }

    /// Get the number of mips
    pub fn mip_count(&self) -> u16 {
        self.state.read().desc.map_or(0, |desc| desc.mip_count)
    }

    /// Get the number of faces per mip
    pub fn face_count(&self) -> u8 {
        self.state
            .read()
            .desc
            .map_or(0, |desc| desc.target.face_count())
    }

    /// Get the dimensions of a mip level
    pub fn mip_dimensions(&self, mip: u16) -> UVec3 {
        self.state
            .read()
            .desc
            .map_or(UVec3::ZERO, |desc| format::mip_dimensions(desc.dimensions, mip))
    }

    /// Assign pixel data to one mip face in the storage format
    pub fn assign_mip_face(&self, mip: u16, face: u8, bytes: impl Into<Arc<[u8]>>) -> TextureResult<()> {
        let format = self
            .desc()
            .ok_or(TextureError::Undefined(self.id))?
            .format;
        self.assign_mip_face_with_format(mip, face, format, bytes)
    }

    /// Assign pixel data to one mip face in a compatible upload format
    ///
    /// Bumps the content stamp.
    pub fn assign_mip_face_with_format(
        &self,
        mip: u16,
        face: u8,
        format: TexelFormat,
        bytes: impl Into<Arc<[u8]>>,
    ) -> TextureResult<()> {
        let bytes = bytes.into();
        let mut state = self.state.write();
        let desc = state.desc.ok_or(TextureError::Undefined(self.id))?;
        check_mip_face(&desc, mip, face)?;
        format::eval_upload_format(desc.format, format)?;

        let expected = format::mip_face_bytes(desc.dimensions, mip, format.texel_bytes());
        if bytes.len() as u64 != expected {
            return Err(TextureError::DataSize {
                expected,
                actual: bytes.len() as u64,
            });
        }

        state.mips[usize::from(mip)][usize::from(face)] = FaceSlot {
            data: Some(MipFace { format, bytes }),
            gpu_loaded: false,
        };
        state.data_stamp += 1;
        Ok(())
    }

    /// Whether host pixels exist for one mip face
    pub fn is_mip_face_available(&self, mip: u16, face: u8) -> bool {
        self.with_slot(mip, face, |slot| slot.data.is_some())
            .unwrap_or(false)
    }

    /// Whether host pixels exist for every face of a mip
    pub fn is_mip_available(&self, mip: u16) -> bool {
        let state = self.state.read();
        state
            .mips
            .get(usize::from(mip))
            .is_some_and(|faces| faces.iter().all(|slot| slot.data.is_some()))
    }

    /// Get host pixels for one mip face
    pub fn mip_face(&self, mip: u16, face: u8) -> Option<MipFace> {
        self.with_slot(mip, face, |slot| slot.data.clone()).flatten()
    }

    /// Acknowledge that one mip face reached the device
    ///
    /// Releases the host pixels when the retention policy asks for it.
    pub fn notify_mip_face_gpu_loaded(&self, mip: u16, face: u8) {
        let mut state = self.state.write();
        let Some(slot) = state
            .mips
            .get_mut(usize::from(mip))
            .and_then(|faces| faces.get_mut(usize::from(face)))
        else {
            return;
        };
        slot.gpu_loaded = true;
        if self.retention == HostRetention::ReleaseAfterUpload {
            slot.data = None;
        }
    }

    /// Whether the device acknowledged one mip face
    pub fn is_mip_face_gpu_loaded(&self, mip: u16, face: u8) -> bool {
        self.with_slot(mip, face, |slot| slot.gpu_loaded)
            .unwrap_or(false)
    }

    /// Get the sampler description
    pub fn sampler(&self) -> SamplerDesc {
        self.state.read().sampler
    }

    /// Set the sampler description
    pub fn set_sampler(&self, sampler: SamplerDesc) {
        self.state.write().sampler = sampler;
    }

    /// Whether the device should generate mips after upload
    pub fn autogenerate_mips(&self) -> bool {
        self.state.read().autogenerate_mips
    }

    /// Request device-side mip generation after upload
    pub fn set_autogenerate_mips(&self, enabled: bool) {
        self.state.write().autogenerate_mips = enabled;
    }

    /// Attach an externally produced device object
    ///
    /// The recycler takes the object back when its handle is released.
    pub fn set_external(&self, object: DeviceObjectId, recycler: Option<ExternalRecycler>) {
        let mut state = self.state.write();
        state.external = Some(object);
        state.recycler = recycler;
        state.data_stamp += 1;
    }

    /// Get the external device object
    pub fn external_object(&self) -> Option<DeviceObjectId> {
        self.state.read().external
    }

    /// Get the external recycler
    pub fn external_recycler(&self) -> Option<ExternalRecycler> {
        self.state.read().recycler.clone()
    }

    fn with_slot<R>(&self, mip: u16, face: u8, f: impl FnOnce(&FaceSlot) -> R) -> Option<R> {
        let state = self.state.read();
        state
            .mips
            .get(usize::from(mip))
            .and_then(|faces| faces.get(usize::from(face)))
            .map(f)
    }
}

impl fmt::Debug for Texture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Texture")
            .field("id", &self.id)
            .field("source", &self.source)
            .field("usage", &self.usage)
            .field("desc", &self.desc())
            .finish()
    }
}

fn check_mip_face(desc: &TextureDesc, mip: u16, face: u8) -> TextureResult<()> {
    if mip >= desc.mip_count {
        return Err(TextureError::InvalidMip {
            mip,
            count: desc.mip_count,
        });
    }
    let faces = desc.target.face_count();
    if face >= faces {
        return Err(TextureError::InvalidFace { face, count: faces });
    }
    Ok(())
}
