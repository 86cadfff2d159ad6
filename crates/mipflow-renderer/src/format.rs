//! Texel Format Mapping
//!
//! Translates abstract texel formats and texture targets into the
//! device-native enumerations used by storage allocation and uploads.
//!
//! Mapping is pure and cheap, so it runs when a handle is created: an
//! unsupported combination is reported before any device work is queued.

use glam::UVec3;

use crate::{TextureError, TextureResult};

/// Number of components per texel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Scalar,
    Vec2,
    Vec3,
    Vec4,
}

impl Dimension {
    /// Get the component count
    pub const fn components(self) -> u32 {
        match self {
            Self::Scalar => 1,
            Self::Vec2 => 2,
            Self::Vec3 => 3,
            Self::Vec4 => 4,
        }
    }
}

/// Storage type of each component
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentType {
    Float,
    Half,
    Int32,
    UInt32,
    UInt16,
    /// Normalized unsigned 16-bit
    NUInt16,
    UInt8,
    /// Normalized unsigned 8-bit
    NUInt8,
}

impl ComponentType {
    /// Get the size of one component in bytes
    pub const fn bytes(self) -> u32 {
        match self {
            Self::Float | Self::Int32 | Self::UInt32 => 4,
            Self::Half | Self::UInt16 | Self::NUInt16 => 2,
            Self::UInt8 | Self::NUInt8 => 1,
        }
    }
}

/// How the components are interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Semantic {
    Red,
    Rg,
    Rgb,
    Rgba,
    Srgba,
    Bgra,
    Sbgra,
    Depth,
    DepthStencil,
}

/// Abstract texel format (dimension, component type, semantic)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TexelFormat {
    pub dimension: Dimension,
    pub component: ComponentType,
    pub semantic: Semantic,
}

impl TexelFormat {
    pub const R8: Self = Self::new(Dimension::Scalar, ComponentType::NUInt8, Semantic::Red);
    pub const RG8: Self = Self::new(Dimension::Vec2, ComponentType::NUInt8, Semantic::Rg);
    pub const RGB8: Self = Self::new(Dimension::Vec3, ComponentType::NUInt8, Semantic::Rgb);
    pub const RGBA8: Self = Self::new(Dimension::Vec4, ComponentType::NUInt8, Semantic::Rgba);
    pub const SRGBA8: Self = Self::new(Dimension::Vec4, ComponentType::NUInt8, Semantic::Srgba);
    pub const BGRA8: Self = Self::new(Dimension::Vec4, ComponentType::NUInt8, Semantic::Bgra);
    pub const SBGRA8: Self = Self::new(Dimension::Vec4, ComponentType::NUInt8, Semantic::Sbgra);
    pub const R16F: Self = Self::new(Dimension::Scalar, ComponentType::Half, Semantic::Red);
    pub const R32F: Self = Self::new(Dimension::Scalar, ComponentType::Float, Semantic::Red);
    pub const RGBA16F: Self = Self::new(Dimension::Vec4, ComponentType::Half, Semantic::Rgba);
    pub const RGBA32F: Self = Self::new(Dimension::Vec4, ComponentType::Float, Semantic::Rgba);
    pub const DEPTH32F: Self = Self::new(Dimension::Scalar, ComponentType::Float, Semantic::Depth);
    pub const DEPTH24_STENCIL8: Self =
        Self::new(Dimension::Scalar, ComponentType::UInt32, Semantic::DepthStencil);

    /// Create a new texel format
    pub const fn new(dimension: Dimension, component: ComponentType, semantic: Semantic) -> Self {
        Self {
            dimension,
            component,
            semantic,
        }
    }

    /// Get the size of one texel in bytes
    pub const fn texel_bytes(&self) -> u32 {
        self.dimension.components() * self.component.bytes()
    }

    /// Whether pixels in this format carry depth
    pub const fn is_depth(&self) -> bool {
        matches!(self.semantic, Semantic::Depth | Semantic::DepthStencil)
    }
}

/// Device-native texel format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceTexelFormat {
    pub format: wgpu::TextureFormat,
    pub texel_bytes: u32,
}

/// Map an abstract texel format to its device format
///
/// Combinations the device cannot store (such as 3-component 8-bit color)
/// are configuration errors.
pub fn eval_texel_format(format: TexelFormat) -> TextureResult<DeviceTexelFormat> {
    use wgpu::TextureFormat as F;
    use ComponentType as C;
    use Dimension as D;
    use Semantic as S;

    let native = match (format.semantic, format.dimension, format.component) {
        (S::Red, D::Scalar, C::NUInt8) => F::R8Unorm,
        (S::Red, D::Scalar, C::UInt8) => F::R8Uint,
        (S::Red, D::Scalar, C::NUInt16) => F::R16Unorm,
        (S::Red, D::Scalar, C::UInt16) => F::R16Uint,
        (S::Red, D::Scalar, C::Half) => F::R16Float,
        (S::Red, D::Scalar, C::Float) => F::R32Float,
        (S::Red, D::Scalar, C::UInt32) => F::R32Uint,
        (S::Red, D::Scalar, C::Int32) => F::R32Sint,

        (S::Rg, D::Vec2, C::NUInt8) => F::Rg8Unorm,
        (S::Rg, D::Vec2, C::UInt8) => F::Rg8Uint,
        (S::Rg, D::Vec2, C::NUInt16) => F::Rg16Unorm,
        (S::Rg, D::Vec2, C::Half) => F::Rg16Float,
        (S::Rg, D::Vec2, C::Float) => F::Rg32Float,

        (S::Rgba, D::Vec4, C::NUInt8) => F::Rgba8Unorm,
        (S::Rgba, D::Vec4, C::UInt8) => F::Rgba8Uint,
        (S::Rgba, D::Vec4, C::NUInt16) => F::Rgba16Unorm,
        (S::Rgba, D::Vec4, C::UInt16) => F::Rgba16Uint,
        (S::Rgba, D::Vec4, C::Half) => F::Rgba16Float,
        (S::Rgba, D::Vec4, C::Float) => F::Rgba32Float,
        (S::Rgba, D::Vec4, C::UInt32) => F::Rgba32Uint,
        (S::Rgba, D::Vec4, C::Int32) => F::Rgba32Sint,

        (S::Srgba, D::Vec4, C::NUInt8) => F::Rgba8UnormSrgb,
        (S::Bgra, D::Vec4, C::NUInt8) => F::Bgra8Unorm,
        (S::Sbgra, D::Vec4, C::NUInt8) => F::Bgra8UnormSrgb,

        (S::Depth, D::Scalar, C::Float) => F::Depth32Float,
        (S::Depth, D::Scalar, C::NUInt16) => F::Depth16Unorm,
        (S::DepthStencil, D::Scalar, C::UInt32) => F::Depth24PlusStencil8,

        _ => return Err(TextureError::UnsupportedFormat(format)),
    };

    Ok(DeviceTexelFormat {
        format: native,
        texel_bytes: format.texel_bytes(),
    })
}

/// Map a storage format and the format of incoming pixel data to the upload layout
///
/// Pixel data may differ from the storage format in channel order or color
/// space, never in texel size or depth-ness.
pub fn eval_upload_format(
    storage: TexelFormat,
    provided: TexelFormat,
) -> TextureResult<DeviceTexelFormat> {
    let upload = eval_texel_format(provided)?;
    if provided.texel_bytes() != storage.texel_bytes() || provided.is_depth() != storage.is_depth() {
        return Err(TextureError::IncompatibleUpload { storage, provided });
    }
    Ok(upload)
}

/// Abstract texture target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureTarget {
    Tex1D,
    Tex2D,
    Tex3D,
    Cube,
}

impl TextureTarget {
    /// Get the number of faces stored per mip
    pub const fn face_count(self) -> u8 {
        match self {
            Self::Cube => 6,
            _ => 1,
        }
    }
}

/// Device-native target
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceTarget {
    pub dimension: wgpu::TextureDimension,
    pub view: wgpu::TextureViewDimension,
    pub faces: u8,
}

/// Map an abstract target to its device target
///
/// Only 2D and cube textures are streamed; anything else is a configuration
/// error.
pub fn eval_target(target: TextureTarget) -> TextureResult<DeviceTarget> {
    match target {
        TextureTarget::Tex2D => Ok(DeviceTarget {
            dimension: wgpu::TextureDimension::D2,
            view: wgpu::TextureViewDimension::D2,
            faces: 1,
        }),
        TextureTarget::Cube => Ok(DeviceTarget {
            dimension: wgpu::TextureDimension::D2,
            view: wgpu::TextureViewDimension::Cube,
            faces: 6,
        }),
        TextureTarget::Tex1D | TextureTarget::Tex3D => Err(TextureError::UnsupportedTarget(target)),
    }
}

/// Number of mips in a full chain for the given base dimensions
pub fn full_mip_count(dimensions: UVec3) -> u16 {
    let largest = dimensions.max_element().max(1);
    (u32::BITS - largest.leading_zeros()) as u16
}

/// Dimensions of a mip level, never smaller than one texel per axis
pub fn mip_dimensions(dimensions: UVec3, mip: u16) -> UVec3 {
    let shift = u32::from(mip).min(31);
    UVec3::new(
        dimensions.x >> shift,
        dimensions.y >> shift,
        dimensions.z >> shift,
    )
    .max(UVec3::ONE)
}

/// Size in bytes of one face of a mip level
pub fn mip_face_bytes(dimensions: UVec3, mip: u16, texel_bytes: u32) -> u64 {
    let dims = mip_dimensions(dimensions, mip).as_u64vec3();
    dims.x * dims.y * dims.z * u64::from(texel_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texel_sizes() {
        assert_eq!(TexelFormat::R8.texel_bytes(), 1);
        assert_eq!(TexelFormat::RGBA8.texel_bytes(), 4);
        assert_eq!(TexelFormat::RGBA16F.texel_bytes(), 8);
        assert_eq!(TexelFormat::RGBA32F.texel_bytes(), 16);
    }

    #[test]
    fn test_eval_texel_format() {
        let rgba = eval_texel_format(TexelFormat::RGBA8).unwrap();
        assert_eq!(rgba.format, wgpu::TextureFormat::Rgba8Unorm);
        assert_eq!(rgba.texel_bytes, 4);

        let srgb = eval_texel_format(TexelFormat::SRGBA8).unwrap();
        assert_eq!(srgb.format, wgpu::TextureFormat::Rgba8UnormSrgb);

        let depth = eval_texel_format(TexelFormat::DEPTH32F).unwrap();
        assert_eq!(depth.format, wgpu::TextureFormat::Depth32Float);
    }

    #[test]
    fn test_unsupported_format() {
        match eval_texel_format(TexelFormat::RGB8) {
            Err(TextureError::UnsupportedFormat(format)) => assert_eq!(format, TexelFormat::RGB8),
            other => panic!("Expected unsupported format, got {:?}", other),
        }
    }

    #[test]
    fn test_upload_format() {
        let upload = eval_upload_format(TexelFormat::RGBA8, TexelFormat::BGRA8).unwrap();
        assert_eq!(upload.format, wgpu::TextureFormat::Bgra8Unorm);

        assert!(matches!(
            eval_upload_format(TexelFormat::RGBA8, TexelFormat::RGBA16F),
            Err(TextureError::IncompatibleUpload { .. })
        ));
        assert!(eval_upload_format(TexelFormat::R32F, TexelFormat::DEPTH32F).is_err());
    }

    #[test]
    fn test_eval_target() {
        assert_eq!(eval_target(TextureTarget::Tex2D).unwrap().faces, 1);
        let cube = eval_target(TextureTarget::Cube).unwrap();
        assert_eq!(cube.faces, 6);
        assert_eq!(cube.view, wgpu::TextureViewDimension::Cube);

        assert!(eval_target(TextureTarget::Tex1D).is_err());
        assert!(matches!(
            eval_target(TextureTarget::Tex3D),
            Err(TextureError::UnsupportedTarget(TextureTarget::Tex3D))
        ));
    }

    #[test]
    fn test_mip_chain() {
        assert_eq!(full_mip_count(UVec3::new(1024, 1024, 1)), 11);
        assert_eq!(full_mip_count(UVec3::new(1, 1, 1)), 1);
        assert_eq!(full_mip_count(UVec3::new(300, 20, 1)), 9);

        let dims = UVec3::new(256, 64, 1);
        assert_eq!(mip_dimensions(dims, 0), dims);
        assert_eq!(mip_dimensions(dims, 2), UVec3::new(64, 16, 1));
        assert_eq!(mip_dimensions(dims, 8), UVec3::new(1, 1, 1));

        assert_eq!(mip_face_bytes(UVec3::new(1024, 1024, 1), 0, 4), 4 * 1024 * 1024);
        assert_eq!(mip_face_bytes(UVec3::new(1024, 1024, 1), 10, 4), 4);
    }
}
