//! Capability limits derived from the negotiated feature level.
//!
//! Every limit here is a pure function of [`FeatureLevel`]; runtime format probing lives in
//! [`FormatCaps`] and is filled in once during renderer initialization.

use std::collections::BTreeMap;

use aero_gles_formats::DxgiFormat;

pub const MAX_TEXTURE_IMAGE_UNITS: u32 = 16;
pub const MAX_VERTEX_UNIFORM_VECTORS: u32 = 1024;
pub const MAX_FRAGMENT_UNIFORM_VECTORS: u32 = 1024;
pub const MAX_POINT_SIZE: f32 = 1024.0;
pub const MIN_SWAP_INTERVAL: i32 = 0;
pub const MAX_SWAP_INTERVAL: i32 = 4;
/// Upper bound on simultaneously bound color attachments at any feature level.
pub const MAX_DRAW_BUFFERS: usize = 8;
/// Sample counts probed for every candidate format.
pub const MAX_PROBED_SAMPLE_COUNT: u32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FeatureLevel {
    Level9_1,
    Level9_2,
    Level9_3,
    Level10_0,
    Level10_1,
    Level11_0,
}

impl FeatureLevel {
    /// Highest first, the order a device request lists them in.
    pub const ALL: [FeatureLevel; 6] = [
        FeatureLevel::Level11_0,
        FeatureLevel::Level10_1,
        FeatureLevel::Level10_0,
        FeatureLevel::Level9_3,
        FeatureLevel::Level9_2,
        FeatureLevel::Level9_1,
    ];

    pub fn requested(allow_feature_level_9: bool) -> Vec<FeatureLevel> {
        Self::ALL
            .into_iter()
            .filter(|level| allow_feature_level_9 || *level >= FeatureLevel::Level10_0)
            .collect()
    }

    pub fn limits(self) -> FeatureLevelLimits {
        limits(self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureLevelLimits {
    pub max_anisotropy: u32,
    pub viewport_bounds: (i32, i32),
    pub max_vertex_texture_image_units: u32,
    pub max_varying_vectors: u32,
    pub supports_npot_textures: bool,
    pub supports_occlusion_queries: bool,
    pub supports_instancing: bool,
    pub supports_derivatives: bool,
    pub major_shader_model: u32,
    pub minor_shader_model: u32,
    pub max_texture_dimension: u32,
    pub max_cube_map_size: u32,
    pub max_viewport_dimension: u32,
    pub supports_32bit_indices: bool,
    pub max_render_targets: u32,
}

pub fn limits(level: FeatureLevel) -> FeatureLevelLimits {
    use FeatureLevel::*;

    let texture_dimension = match level {
        Level11_0 => 16384,
        Level10_1 | Level10_0 => 8192,
        Level9_3 => 4096,
        Level9_2 | Level9_1 => 2048,
    };

    FeatureLevelLimits {
        max_anisotropy: match level {
            Level9_1 => 2,
            _ => 16,
        },
        viewport_bounds: match level {
            Level11_0 | Level10_1 | Level10_0 => (-32768, 32767),
            Level9_3 => (-8192, 8192),
            Level9_2 | Level9_1 => (-4096, 4096),
        },
        max_vertex_texture_image_units: match level {
            Level11_0 | Level10_1 | Level10_0 => MAX_TEXTURE_IMAGE_UNITS,
            Level9_3 | Level9_2 | Level9_1 => 0,
        },
        max_varying_vectors: match level {
            Level11_0 => 32,
            Level10_1 | Level10_0 => 16,
            Level9_3 | Level9_2 | Level9_1 => 8,
        },
        supports_npot_textures: level >= Level10_0,
        supports_occlusion_queries: level >= Level9_2,
        supports_instancing: level >= Level9_3,
        supports_derivatives: level >= Level9_3,
        major_shader_model: match level {
            Level11_0 => 5,
            _ => 4,
        },
        minor_shader_model: match level {
            Level10_1 => 1,
            _ => 0,
        },
        max_texture_dimension: texture_dimension,
        max_cube_map_size: match level {
            Level9_2 | Level9_1 => 512,
            _ => texture_dimension,
        },
        max_viewport_dimension: texture_dimension,
        supports_32bit_indices: level >= Level10_0,
        max_render_targets: match level {
            Level11_0 => 8,
            // Multiple outputs on 10_x hardware are slow when targets are unbound.
            _ => 1,
        },
    }
}

/// Support for one floating-point format family.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FloatFormatCaps {
    pub texture: bool,
    pub filter: bool,
    pub render: bool,
}

/// Format support probed from the device at initialization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormatCaps {
    pub bgra_texture: bool,
    pub float16: FloatFormatCaps,
    pub float32: FloatFormatCaps,
    pub dxt1: bool,
    pub dxt3: bool,
    pub dxt5: bool,
    pub depth_textures: bool,
    /// Per format, sample counts (ascending, excluding 1) with nonzero quality support.
    pub multisample: BTreeMap<DxgiFormat, Vec<u32>>,
    /// Largest sample count supported by any probed format.
    pub max_supported_samples: u32,
}

impl FormatCaps {
    /// Smallest supported sample count at least `requested`, `Some(0)` for 0, `None` when
    /// the format cannot provide that many samples.
    pub fn nearest_supported_samples(&self, format: DxgiFormat, requested: u32) -> Option<u32> {
        if requested == 0 {
            return Some(0);
        }
        self.multisample
            .get(&format)
            .and_then(|counts| counts.iter().copied().find(|count| *count >= requested))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_level_has_a_consistent_limit_set() {
        for level in FeatureLevel::ALL {
            let limits = level.limits();
            assert!(limits.max_render_targets as usize <= MAX_DRAW_BUFFERS);
            assert!(limits.max_viewport_dimension <= limits.viewport_bounds.1 as u32 + 1);
            assert!(limits.max_cube_map_size <= limits.max_texture_dimension);
        }
    }

    #[test]
    fn nine_one_is_the_most_restricted_level() {
        let limits = FeatureLevel::Level9_1.limits();
        assert_eq!(limits.max_anisotropy, 2);
        assert!(!limits.supports_occlusion_queries);
        assert!(!limits.supports_instancing);
        assert!(!limits.supports_32bit_indices);
        assert_eq!(limits.max_texture_dimension, 2048);
        assert_eq!(limits.max_cube_map_size, 512);
    }

    #[test]
    fn shader_model_tracks_level() {
        assert_eq!(FeatureLevel::Level11_0.limits().major_shader_model, 5);
        let ten_one = FeatureLevel::Level10_1.limits();
        assert_eq!((ten_one.major_shader_model, ten_one.minor_shader_model), (4, 1));
        let ten = FeatureLevel::Level10_0.limits();
        assert_eq!((ten.major_shader_model, ten.minor_shader_model), (4, 0));
    }

    #[test]
    fn requested_levels_are_descending_and_optionally_skip_nine() {
        assert_eq!(FeatureLevel::requested(true).len(), 6);
        assert_eq!(
            FeatureLevel::requested(false),
            vec![
                FeatureLevel::Level11_0,
                FeatureLevel::Level10_1,
                FeatureLevel::Level10_0
            ]
        );
    }

    #[test]
    fn nearest_samples_rounds_up() {
        let mut caps = FormatCaps::default();
        caps.multisample
            .insert(DxgiFormat::R8G8B8A8Unorm, vec![2, 4, 8]);
        assert_eq!(caps.nearest_supported_samples(DxgiFormat::R8G8B8A8Unorm, 0), Some(0));
        assert_eq!(caps.nearest_supported_samples(DxgiFormat::R8G8B8A8Unorm, 3), Some(4));
        assert_eq!(caps.nearest_supported_samples(DxgiFormat::R8G8B8A8Unorm, 16), None);
        assert_eq!(caps.nearest_supported_samples(DxgiFormat::A8Unorm, 2), None);
    }
}
