//! Sampler State
//!
//! Abstract sampler descriptions and their device-native form. Each
//! allocation strategy derives the base level and LOD clamps from what is
//! actually resident before handing the state to the device.

use serde::{Deserialize, Serialize};

/// Highest mip level a sampler can name
pub const MAX_MIP_LEVEL: u16 = 0xFF;

/// LOD clamp used when the sampler does not limit the mip range
pub const UNBOUNDED_LOD: f32 = 1000.0;

/// Texture filtering mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Filter {
    MinMagPoint,
    MinPointMagLinear,
    MinLinearMagPoint,
    MinMagLinear,
    MinMagMipPoint,
    MinMagPointMipLinear,
    MinPointMagLinearMipPoint,
    MinPointMagMipLinear,
    MinLinearMagMipPoint,
    MinLinearMagPointMipLinear,
    MinMagLinearMipPoint,
    MinMagMipLinear,
    Anisotropic,
}

/// Texture coordinate wrapping mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WrapMode {
    Repeat,
    Mirror,
    Clamp,
    Border,
    MirrorOnce,
}

/// Depth comparison function
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ComparisonFunction {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

/// Abstract sampler description
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SamplerDesc {
    pub filter: Filter,
    pub wrap_u: WrapMode,
    pub wrap_v: WrapMode,
    pub wrap_w: WrapMode,
    pub comparison: Option<ComparisonFunction>,
    pub max_anisotropy: u8,
    pub border_color: [f32; 4],
    /// Mips below this level are never sampled
    pub mip_offset: u16,
    pub min_mip: u16,
    pub max_mip: u16,
}

impl Default for SamplerDesc {
    fn default() -> Self {
        Self {
            filter: Filter::MinMagMipLinear,
            wrap_u: WrapMode::Repeat,
            wrap_v: WrapMode::Repeat,
            wrap_w: WrapMode::Repeat,
            comparison: None,
            max_anisotropy: 16,
            border_color: [0.0; 4],
            mip_offset: 0,
            min_mip: 0,
            max_mip: MAX_MIP_LEVEL,
        }
    }
}

/// (min, mag, mip) per filter; no mip filter samples the base level only
const FILTER_MODES: [(wgpu::FilterMode, wgpu::FilterMode, Option<wgpu::FilterMode>); 13] = {
    use wgpu::FilterMode::{Linear, Nearest};
    [
        (Nearest, Nearest, None),
        (Nearest, Linear, None),
        (Linear, Nearest, None),
        (Linear, Linear, None),
        (Nearest, Nearest, Some(Nearest)),
        (Nearest, Nearest, Some(Linear)),
        (Nearest, Linear, Some(Nearest)),
        (Nearest, Linear, Some(Linear)),
        (Linear, Nearest, Some(Nearest)),
        (Linear, Nearest, Some(Linear)),
        (Linear, Linear, Some(Nearest)),
        (Linear, Linear, Some(Linear)),
        (Linear, Linear, Some(Linear)),
    ]
};

impl Filter {
    fn index(self) -> usize {
        self as usize
    }
}

impl WrapMode {
    /// Get the device address mode
    pub fn address_mode(self) -> wgpu::AddressMode {
        match self {
            Self::Repeat => wgpu::AddressMode::Repeat,
            // No mirror-once on the device; mirrored repeat is the closest match
            Self::Mirror | Self::MirrorOnce => wgpu::AddressMode::MirrorRepeat,
            Self::Clamp => wgpu::AddressMode::ClampToEdge,
            Self::Border => wgpu::AddressMode::ClampToBorder,
        }
    }
}

impl ComparisonFunction {
    /// Get the device compare function
    pub fn compare_function(self) -> wgpu::CompareFunction {
        match self {
            Self::Never => wgpu::CompareFunction::Never,
            Self::Less => wgpu::CompareFunction::Less,
            Self::Equal => wgpu::CompareFunction::Equal,
            Self::LessEqual => wgpu::CompareFunction::LessEqual,
            Self::Greater => wgpu::CompareFunction::Greater,
            Self::NotEqual => wgpu::CompareFunction::NotEqual,
            Self::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
            Self::Always => wgpu::CompareFunction::Always,
        }
    }
}

/// Device-native sampler state for one texture object
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceSamplerState {
    pub min_filter: wgpu::FilterMode,
    pub mag_filter: wgpu::FilterMode,
    pub mipmap_filter: Option<wgpu::FilterMode>,
    pub address_modes: [wgpu::AddressMode; 3],
    pub compare: Option<wgpu::CompareFunction>,
    pub anisotropy_clamp: u16,
    pub border_color: Option<wgpu::SamplerBorderColor>,
    /// First storage level the device may sample
    pub base_level: u16,
    pub lod_min_clamp: f32,
    pub lod_max_clamp: f32,
}

impl SamplerDesc {
    /// Get the device state before level clamping
    pub fn device_state(&self) -> DeviceSamplerState {
        let (min_filter, mag_filter, mipmap_filter) = FILTER_MODES[self.filter.index()];
        let anisotropy_clamp = if self.filter == Filter::Anisotropic {
            u16::from(self.max_anisotropy.clamp(1, 16))
        } else {
            1
        };

        let address_modes = [
            self.wrap_u.address_mode(),
            self.wrap_v.address_mode(),
            self.wrap_w.address_mode(),
        ];
        let border_color = address_modes
            .contains(&wgpu::AddressMode::ClampToBorder)
            .then(|| border_color(self.border_color));

        DeviceSamplerState {
            min_filter,
            mag_filter,
            mipmap_filter,
            address_modes,
            compare: self.comparison.map(ComparisonFunction::compare_function),
            anisotropy_clamp,
            border_color,
            base_level: 0,
            lod_min_clamp: 0.0,
            lod_max_clamp: UNBOUNDED_LOD,
        }
    }

    /// Lowest mip the sampler allows
    pub fn first_mip(&self) -> u16 {
        self.mip_offset.max(self.min_mip)
    }

    /// LOD upper clamp, unbounded when the sampler names no maximum
    pub fn max_lod(&self) -> f32 {
        if self.max_mip == MAX_MIP_LEVEL {
            UNBOUNDED_LOD
        } else {
            f32::from(self.max_mip)
        }
    }
}

impl DeviceSamplerState {
    /// Restrict sampling to the given storage levels
    pub fn with_levels(mut self, base_level: u16, lod_min: f32, lod_max: f32) -> Self {
        self.base_level = base_level;
        self.lod_min_clamp = lod_min;
        self.lod_max_clamp = if self.mipmap_filter.is_none() {
            lod_min
        } else {
            lod_max.max(lod_min)
        };
        self
    }
}

fn border_color(color: [f32; 4]) -> wgpu::SamplerBorderColor {
    let [r, g, b, a] = color;
    if a < 0.5 {
        wgpu::SamplerBorderColor::TransparentBlack
    } else if r >= 0.5 && g >= 0.5 && b >= 0.5 {
        wgpu::SamplerBorderColor::OpaqueWhite
    } else {
        wgpu::SamplerBorderColor::OpaqueBlack
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_sampler() {
        let state = SamplerDesc::default().device_state();
        assert_eq!(state.min_filter, wgpu::FilterMode::Linear);
        assert_eq!(state.mipmap_filter, Some(wgpu::FilterMode::Linear));
        assert_eq!(state.address_modes, [wgpu::AddressMode::Repeat; 3]);
        assert_eq!(state.anisotropy_clamp, 1);
        assert!(state.border_color.is_none());
        assert!(state.compare.is_none());
    }

    #[test]
    fn test_anisotropic_filter() {
        let desc = SamplerDesc {
            filter: Filter::Anisotropic,
            max_anisotropy: 8,
            ..Default::default()
        };
        let state = desc.device_state();
        assert_eq!(state.anisotropy_clamp, 8);
        assert_eq!(state.mag_filter, wgpu::FilterMode::Linear);
    }

    #[test]
    fn test_wrap_modes() {
        let desc = SamplerDesc {
            wrap_u: WrapMode::Border,
            wrap_v: WrapMode::MirrorOnce,
            wrap_w: WrapMode::Clamp,
            border_color: [1.0, 1.0, 1.0, 1.0],
            ..Default::default()
        };
        let state = desc.device_state();
        assert_eq!(
            state.address_modes,
            [
                wgpu::AddressMode::ClampToBorder,
                wgpu::AddressMode::MirrorRepeat,
                wgpu::AddressMode::ClampToEdge
            ]
        );
        assert_eq!(state.border_color, Some(wgpu::SamplerBorderColor::OpaqueWhite));
    }

    #[test]
    fn test_level_clamping() {
        let desc = SamplerDesc {
            mip_offset: 2,
            min_mip: 1,
            max_mip: 6,
            ..Default::default()
        };
        assert_eq!(desc.first_mip(), 2);
        assert_eq!(desc.max_lod(), 6.0);
        assert_eq!(SamplerDesc::default().max_lod(), UNBOUNDED_LOD);

        let state = desc.device_state().with_levels(2, 2.0, 6.0);
        assert_eq!(state.base_level, 2);
        assert_eq!(state.lod_max_clamp, 6.0);
    }

    #[test]
    fn test_point_filter_samples_base_only() {
        let desc = SamplerDesc {
            filter: Filter::MinMagPoint,
            ..Default::default()
        };
        let state = desc.device_state().with_levels(3, 1.0, 10.0);
        assert!(state.mipmap_filter.is_none());
        assert_eq!(state.lod_max_clamp, 1.0);
    }

    #[test]
    fn test_comparison() {
        let desc = SamplerDesc {
            comparison: Some(ComparisonFunction::LessEqual),
            ..Default::default()
        };
        assert_eq!(desc.device_state().compare, Some(wgpu::CompareFunction::LessEqual));
    }
}
