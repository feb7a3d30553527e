//! Framebuffer configurations and the ordered set a display advertises.
//!
//! Configs are ordered by [`SortConfig`], the EGL 1.4 sorting rules (section 3.4.1): caveat,
//! color buffer type, total size of the requested color components (larger first), then the
//! buffer size, sample, depth and stencil sizes, and finally the config id.
//!
//! The set itself deduplicates with a comparator that counts red, green, blue and luminance
//! bits but not alpha. Two configs that differ only in their alpha size (or only in channel
//! order, like RGBA8 and BGRA8) collapse to the first one added.

use std::cmp::Ordering;

use aero_gles_formats::InternalFormat;
use aero_gles_renderer::ConfigDesc;
use bitflags::bitflags;
use tracing::{debug, error};

use crate::attrib::attribute_pairs;
use crate::consts::*;
use crate::error::EglError;

bitflags! {
    /// `EGL_SURFACE_TYPE`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct SurfaceType: u32 {
        const PBUFFER = EGL_PBUFFER_BIT as u32;
        const PIXMAP = EGL_PIXMAP_BIT as u32;
        const WINDOW = EGL_WINDOW_BIT as u32;
        const SWAP_BEHAVIOR_PRESERVED = EGL_SWAP_BEHAVIOR_PRESERVED_BIT as u32;
    }
}

bitflags! {
    /// `EGL_RENDERABLE_TYPE` and `EGL_CONFORMANT`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ApiMask: u32 {
        const OPENGL_ES = EGL_OPENGL_ES_BIT as u32;
        const OPENGL_ES2 = EGL_OPENGL_ES2_BIT as u32;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    render_target_format: InternalFormat,
    depth_stencil_format: Option<InternalFormat>,

    buffer_size: EGLint,
    red_size: EGLint,
    green_size: EGLint,
    blue_size: EGLint,
    luminance_size: EGLint,
    alpha_size: EGLint,
    alpha_mask_size: EGLint,
    bind_to_texture_rgb: bool,
    bind_to_texture_rgba: bool,
    color_buffer_type: EGLint,
    config_caveat: EGLint,
    config_id: EGLint,
    conformant: ApiMask,
    depth_size: EGLint,
    stencil_size: EGLint,
    level: EGLint,
    max_pbuffer_width: EGLint,
    max_pbuffer_height: EGLint,
    max_pbuffer_pixels: EGLint,
    min_swap_interval: EGLint,
    max_swap_interval: EGLint,
    native_renderable: bool,
    native_visual_id: EGLint,
    native_visual_type: EGLint,
    renderable_type: ApiMask,
    sample_buffers: EGLint,
    samples: EGLint,
    surface_type: SurfaceType,
    transparent_type: EGLint,
    transparent_red: EGLint,
    transparent_green: EGLint,
    transparent_blue: EGLint,
}

impl Config {
    /// Wraps a renderer format pair. Only the color and depth formats the renderer
    /// advertises are accepted.
    pub fn new(
        desc: &ConfigDesc,
        min_swap_interval: EGLint,
        max_swap_interval: EGLint,
        texture_width: EGLint,
        texture_height: EGLint,
    ) -> Result<Self, EglError> {
        // (buffer, red, green, blue, alpha, bind RGB, bind RGBA)
        let color = match desc.render_target_format {
            InternalFormat::Rgb5A1 => (16, 5, 5, 5, 1, false, false),
            InternalFormat::Rgba8 => (32, 8, 8, 8, 8, false, true),
            InternalFormat::Rgb565 => (16, 5, 6, 5, 0, false, false),
            InternalFormat::Rgb8 => (32, 8, 8, 8, 0, true, false),
            InternalFormat::Bgra8 => (32, 8, 8, 8, 8, false, true),
            other => {
                error!(format = ?other, "config requested for a color format that is never advertised");
                return Err(EglError::BadConfig);
            }
        };
        let (depth_size, stencil_size) = match desc.depth_stencil_format {
            None => (0, 0),
            Some(InternalFormat::DepthComponent32) => (32, 0),
            Some(InternalFormat::Depth24Stencil8) => (24, 8),
            Some(InternalFormat::DepthComponent24) => (24, 0),
            Some(InternalFormat::DepthComponent16) => (16, 0),
            Some(other) => {
                error!(format = ?other, "config requested for a depth format that is never advertised");
                return Err(EglError::BadConfig);
            }
        };
        let (buffer_size, red_size, green_size, blue_size, alpha_size, bind_rgb, bind_rgba) = color;
        let samples = desc.multi_sample as EGLint;

        Ok(Self {
            render_target_format: desc.render_target_format,
            depth_stencil_format: desc.depth_stencil_format,
            buffer_size,
            red_size,
            green_size,
            blue_size,
            luminance_size: 0,
            alpha_size,
            alpha_mask_size: 0,
            bind_to_texture_rgb: bind_rgb,
            bind_to_texture_rgba: bind_rgba,
            color_buffer_type: EGL_RGB_BUFFER,
            config_caveat: if desc.fast_config { EGL_NONE } else { EGL_SLOW_CONFIG },
            config_id: 0,
            conformant: ApiMask::OPENGL_ES2,
            depth_size,
            stencil_size,
            level: 0,
            max_pbuffer_width: texture_width,
            max_pbuffer_height: texture_height,
            max_pbuffer_pixels: texture_width.saturating_mul(texture_height),
            min_swap_interval,
            max_swap_interval,
            native_renderable: false,
            native_visual_id: 0,
            native_visual_type: 0,
            renderable_type: ApiMask::OPENGL_ES2,
            sample_buffers: EGLint::from(samples > 0),
            samples,
            surface_type: SurfaceType::PBUFFER | SurfaceType::WINDOW | SurfaceType::SWAP_BEHAVIOR_PRESERVED,
            transparent_type: EGL_NONE,
            transparent_red: 0,
            transparent_green: 0,
            transparent_blue: 0,
        })
    }

    pub fn config_id(&self) -> EGLint {
        self.config_id
    }

    pub fn render_target_format(&self) -> InternalFormat {
        self.render_target_format
    }

    pub fn depth_stencil_format(&self) -> Option<InternalFormat> {
        self.depth_stencil_format
    }

    pub fn surface_type(&self) -> SurfaceType {
        self.surface_type
    }

    pub fn bind_to_texture_rgb(&self) -> bool {
        self.bind_to_texture_rgb
    }

    pub fn bind_to_texture_rgba(&self) -> bool {
        self.bind_to_texture_rgba
    }

    pub fn min_swap_interval(&self) -> EGLint {
        self.min_swap_interval
    }

    pub fn max_swap_interval(&self) -> EGLint {
        self.max_swap_interval
    }

    pub fn samples(&self) -> EGLint {
        self.samples
    }

    /// `eglGetConfigAttrib`. `None` for attributes configs do not have.
    pub fn attribute(&self, attribute: EGLint) -> Option<EGLint> {
        let value = match attribute {
            EGL_BUFFER_SIZE => self.buffer_size,
            EGL_ALPHA_SIZE => self.alpha_size,
            EGL_BLUE_SIZE => self.blue_size,
            EGL_GREEN_SIZE => self.green_size,
            EGL_RED_SIZE => self.red_size,
            EGL_DEPTH_SIZE => self.depth_size,
            EGL_STENCIL_SIZE => self.stencil_size,
            EGL_CONFIG_CAVEAT => self.config_caveat,
            EGL_CONFIG_ID => self.config_id,
            EGL_LEVEL => self.level,
            EGL_NATIVE_RENDERABLE => egl_bool(self.native_renderable),
            EGL_NATIVE_VISUAL_ID => self.native_visual_id,
            EGL_NATIVE_VISUAL_TYPE => self.native_visual_type,
            EGL_SAMPLES => self.samples,
            EGL_SAMPLE_BUFFERS => self.sample_buffers,
            EGL_SURFACE_TYPE => self.surface_type.bits() as EGLint,
            EGL_TRANSPARENT_TYPE => self.transparent_type,
            EGL_TRANSPARENT_BLUE_VALUE => self.transparent_blue,
            EGL_TRANSPARENT_GREEN_VALUE => self.transparent_green,
            EGL_TRANSPARENT_RED_VALUE => self.transparent_red,
            EGL_BIND_TO_TEXTURE_RGB => egl_bool(self.bind_to_texture_rgb),
            EGL_BIND_TO_TEXTURE_RGBA => egl_bool(self.bind_to_texture_rgba),
            EGL_MIN_SWAP_INTERVAL => self.min_swap_interval,
            EGL_MAX_SWAP_INTERVAL => self.max_swap_interval,
            EGL_LUMINANCE_SIZE => self.luminance_size,
            EGL_ALPHA_MASK_SIZE => self.alpha_mask_size,
            EGL_COLOR_BUFFER_TYPE => self.color_buffer_type,
            EGL_RENDERABLE_TYPE => self.renderable_type.bits() as EGLint,
            EGL_MATCH_NATIVE_PIXMAP => EGL_NONE,
            EGL_CONFORMANT => self.conformant.bits() as EGLint,
            EGL_MAX_PBUFFER_WIDTH => self.max_pbuffer_width,
            EGL_MAX_PBUFFER_HEIGHT => self.max_pbuffer_height,
            EGL_MAX_PBUFFER_PIXELS => self.max_pbuffer_pixels,
            _ => return None,
        };
        Some(value)
    }

    /// Whether this config satisfies one `eglChooseConfig` criterion. Keys outside
    /// [`CHOOSE_CONFIG_CRITERIA`] never match.
    fn matches(&self, key: EGLint, value: EGLint) -> bool {
        let at_least = |field: EGLint| field >= value;
        match key {
            EGL_BUFFER_SIZE => at_least(self.buffer_size),
            EGL_ALPHA_SIZE => at_least(self.alpha_size),
            EGL_BLUE_SIZE => at_least(self.blue_size),
            EGL_GREEN_SIZE => at_least(self.green_size),
            EGL_RED_SIZE => at_least(self.red_size),
            EGL_DEPTH_SIZE => at_least(self.depth_size),
            EGL_STENCIL_SIZE => at_least(self.stencil_size),
            EGL_LEVEL => at_least(self.level),
            EGL_SAMPLES => at_least(self.samples),
            EGL_SAMPLE_BUFFERS => at_least(self.sample_buffers),
            EGL_LUMINANCE_SIZE => at_least(self.luminance_size),
            EGL_ALPHA_MASK_SIZE => at_least(self.alpha_mask_size),
            EGL_MAX_PBUFFER_WIDTH => at_least(self.max_pbuffer_width),
            EGL_MAX_PBUFFER_HEIGHT => at_least(self.max_pbuffer_height),
            EGL_MAX_PBUFFER_PIXELS => at_least(self.max_pbuffer_pixels),
            EGL_CONFIG_CAVEAT => self.config_caveat == value,
            EGL_CONFIG_ID => self.config_id == value,
            EGL_NATIVE_RENDERABLE => egl_bool(self.native_renderable) == value,
            EGL_NATIVE_VISUAL_TYPE => self.native_visual_type == value,
            EGL_TRANSPARENT_TYPE => self.transparent_type == value,
            EGL_TRANSPARENT_BLUE_VALUE => self.transparent_blue == value,
            EGL_TRANSPARENT_GREEN_VALUE => self.transparent_green == value,
            EGL_TRANSPARENT_RED_VALUE => self.transparent_red == value,
            EGL_BIND_TO_TEXTURE_RGB => egl_bool(self.bind_to_texture_rgb) == value,
            EGL_BIND_TO_TEXTURE_RGBA => egl_bool(self.bind_to_texture_rgba) == value,
            EGL_MIN_SWAP_INTERVAL => self.min_swap_interval == value,
            EGL_MAX_SWAP_INTERVAL => self.max_swap_interval == value,
            EGL_COLOR_BUFFER_TYPE => self.color_buffer_type == value,
            EGL_SURFACE_TYPE => self
                .surface_type
                .contains(SurfaceType::from_bits_retain(value as u32)),
            EGL_RENDERABLE_TYPE => self
                .renderable_type
                .contains(ApiMask::from_bits_retain(value as u32)),
            EGL_CONFORMANT => self.conformant.contains(ApiMask::from_bits_retain(value as u32)),
            // Native pixmaps are not supported; nothing matches one.
            _ => false,
        }
    }
}

/// Attributes `eglChooseConfig` accepts as criteria.
const CHOOSE_CONFIG_CRITERIA: &[EGLint] = &[
    EGL_BUFFER_SIZE,
    EGL_ALPHA_SIZE,
    EGL_BLUE_SIZE,
    EGL_GREEN_SIZE,
    EGL_RED_SIZE,
    EGL_DEPTH_SIZE,
    EGL_STENCIL_SIZE,
    EGL_LEVEL,
    EGL_SAMPLES,
    EGL_SAMPLE_BUFFERS,
    EGL_LUMINANCE_SIZE,
    EGL_ALPHA_MASK_SIZE,
    EGL_MAX_PBUFFER_WIDTH,
    EGL_MAX_PBUFFER_HEIGHT,
    EGL_MAX_PBUFFER_PIXELS,
    EGL_CONFIG_CAVEAT,
    EGL_CONFIG_ID,
    EGL_NATIVE_RENDERABLE,
    EGL_NATIVE_VISUAL_TYPE,
    EGL_TRANSPARENT_TYPE,
    EGL_TRANSPARENT_BLUE_VALUE,
    EGL_TRANSPARENT_GREEN_VALUE,
    EGL_TRANSPARENT_RED_VALUE,
    EGL_BIND_TO_TEXTURE_RGB,
    EGL_BIND_TO_TEXTURE_RGBA,
    EGL_MIN_SWAP_INTERVAL,
    EGL_MAX_SWAP_INTERVAL,
    EGL_COLOR_BUFFER_TYPE,
    EGL_SURFACE_TYPE,
    EGL_RENDERABLE_TYPE,
    EGL_CONFORMANT,
    EGL_MATCH_NATIVE_PIXMAP,
];

/// The EGL config sorting rules, biased toward the color components a request asks for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SortConfig {
    want_red: bool,
    want_green: bool,
    want_blue: bool,
    want_alpha: bool,
    want_luminance: bool,
}

impl SortConfig {
    /// Only components requested with a size other than 0 or `EGL_DONT_CARE` count.
    pub fn for_request(attributes: &[(EGLint, EGLint)]) -> Self {
        let mut sort = Self::default();
        for &(key, value) in attributes {
            if value == 0 || value == EGL_DONT_CARE {
                continue;
            }
            match key {
                EGL_RED_SIZE => sort.want_red = true,
                EGL_GREEN_SIZE => sort.want_green = true,
                EGL_BLUE_SIZE => sort.want_blue = true,
                EGL_ALPHA_SIZE => sort.want_alpha = true,
                EGL_LUMINANCE_SIZE => sort.want_luminance = true,
                _ => {}
            }
        }
        sort
    }

    /// The comparator the set deduplicates with: every color component except alpha.
    pub fn for_set() -> Self {
        Self {
            want_red: true,
            want_green: true,
            want_blue: true,
            want_alpha: false,
            want_luminance: true,
        }
    }

    fn wanted_components_size(&self, config: &Config) -> EGLint {
        let mut total = 0;
        if self.want_red {
            total += config.red_size;
        }
        if self.want_green {
            total += config.green_size;
        }
        if self.want_blue {
            total += config.blue_size;
        }
        if self.want_luminance {
            total += config.luminance_size;
        }
        if self.want_alpha {
            total += config.alpha_size;
        }
        total
    }

    /// Every sorting rule except the final config id tie break.
    fn compare_attributes(&self, x: &Config, y: &Config) -> Ordering {
        x.config_caveat
            .cmp(&y.config_caveat)
            .then(x.color_buffer_type.cmp(&y.color_buffer_type))
            .then_with(|| self.wanted_components_size(y).cmp(&self.wanted_components_size(x)))
            .then(x.buffer_size.cmp(&y.buffer_size))
            .then(x.sample_buffers.cmp(&y.sample_buffers))
            .then(x.samples.cmp(&y.samples))
            .then(x.depth_size.cmp(&y.depth_size))
            .then(x.stencil_size.cmp(&y.stencil_size))
            .then(x.alpha_mask_size.cmp(&y.alpha_mask_size))
            .then(x.native_visual_type.cmp(&y.native_visual_type))
    }

    pub fn compare(&self, x: &Config, y: &Config) -> Ordering {
        self.compare_attributes(x, y).then(x.config_id.cmp(&y.config_id))
    }

    pub fn less(&self, x: &Config, y: &Config) -> bool {
        self.compare(x, y) == Ordering::Less
    }
}

/// Result of [`ConfigSet::get_configs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigMatches {
    /// Ids of the best matches, preferred first, at most the requested capacity.
    pub configs: Vec<EGLint>,
    /// Number of configs matching the request, independent of the capacity.
    pub total: usize,
}

/// Configs in [`SortConfig::for_set`] order, without duplicates under that order.
#[derive(Debug, Clone, Default)]
pub struct ConfigSet {
    configs: Vec<Config>,
}

impl ConfigSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Config> {
        self.configs.iter()
    }

    pub fn clear(&mut self) {
        self.configs.clear();
    }

    /// Wraps `desc` in a config and inserts it unless an equivalent config is present.
    /// Returns whether the set grew.
    pub fn add(
        &mut self,
        desc: &ConfigDesc,
        min_swap_interval: EGLint,
        max_swap_interval: EGLint,
        texture_width: EGLint,
        texture_height: EGLint,
    ) -> Result<bool, EglError> {
        let config = Config::new(
            desc,
            min_swap_interval,
            max_swap_interval,
            texture_width,
            texture_height,
        )?;
        Ok(self.insert(config))
    }

    fn insert(&mut self, config: Config) -> bool {
        let order = SortConfig::for_set();
        match self.configs.binary_search_by(|probe| order.compare(probe, &config)) {
            Ok(_) => false,
            Err(position) => {
                self.configs.insert(position, config);
                true
            }
        }
    }

    /// Numbers the configs 1..=N in set order.
    pub fn assign_ids(&mut self) {
        for (config, id) in self.configs.iter_mut().zip(1..) {
            config.config_id = id;
        }
        debug!(count = self.configs.len(), "assigned config ids");
    }

    pub fn get(&self, config_id: EGLint) -> Option<&Config> {
        self.configs.iter().find(|config| config.config_id == config_id)
    }

    /// `eglChooseConfig`: the configs passing every criterion of `attributes`, sorted for
    /// the request and truncated to `capacity`.
    pub fn get_configs(&self, attributes: &[EGLint], capacity: usize) -> Result<ConfigMatches, EglError> {
        let criteria = attribute_pairs(attributes)?;
        if let Some((key, _)) = criteria.iter().find(|(key, _)| !CHOOSE_CONFIG_CRITERIA.contains(key)) {
            debug!(attribute = format_args!("{key:#x}"), "unknown config criterion");
            return Err(EglError::BadAttribute);
        }

        let mut passed: Vec<&Config> = self
            .configs
            .iter()
            .filter(|config| {
                criteria
                    .iter()
                    .filter(|(_, value)| *value != EGL_DONT_CARE)
                    .all(|&(key, value)| config.matches(key, value))
            })
            .collect();

        let order = SortConfig::for_request(&criteria);
        passed.sort_by(|x, y| order.compare(x, y));
        Ok(ConfigMatches {
            total: passed.len(),
            configs: passed
                .iter()
                .take(capacity)
                .map(|config| config.config_id)
                .collect(),
        })
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    use super::*;

    fn desc(color: InternalFormat, depth: Option<InternalFormat>) -> ConfigDesc {
        ConfigDesc {
            render_target_format: color,
            depth_stencil_format: depth,
            multi_sample: 0,
            fast_config: true,
        }
    }

    fn config(color: InternalFormat, depth: Option<InternalFormat>, samples: u32, id: EGLint) -> Config {
        let desc = ConfigDesc {
            multi_sample: samples,
            ..desc(color, depth)
        };
        let mut config = Config::new(&desc, 0, 4, 8192, 8192).unwrap();
        config.config_id = id;
        config
    }

    fn standard_set() -> ConfigSet {
        let mut set = ConfigSet::new();
        for color in [InternalFormat::Bgra8, InternalFormat::Rgba8] {
            for depth in [
                None,
                Some(InternalFormat::Depth24Stencil8),
                Some(InternalFormat::DepthComponent16),
            ] {
                set.add(&desc(color, depth), 0, 4, 8192, 8192).unwrap();
            }
        }
        set.assign_ids();
        set
    }

    #[test]
    fn color_formats_map_to_fixed_channel_sizes() {
        let rgb565 = config(InternalFormat::Rgb565, None, 0, 1);
        assert_eq!(rgb565.attribute(EGL_RED_SIZE), Some(5));
        assert_eq!(rgb565.attribute(EGL_GREEN_SIZE), Some(6));
        assert_eq!(rgb565.attribute(EGL_BUFFER_SIZE), Some(16));

        let rgb8 = config(InternalFormat::Rgb8, Some(InternalFormat::Depth24Stencil8), 4, 1);
        assert_eq!(rgb8.attribute(EGL_ALPHA_SIZE), Some(0));
        assert_eq!(rgb8.attribute(EGL_BIND_TO_TEXTURE_RGB), Some(EGL_TRUE));
        assert_eq!(rgb8.attribute(EGL_STENCIL_SIZE), Some(8));
        assert_eq!(rgb8.attribute(EGL_SAMPLE_BUFFERS), Some(1));
        assert_eq!(rgb8.attribute(EGL_HEIGHT), None);

        assert_eq!(
            Config::new(&desc(InternalFormat::Rgba16F, None), 0, 4, 1, 1),
            Err(EglError::BadConfig)
        );
    }

    #[test]
    fn configs_differing_only_in_alpha_collapse() {
        let mut set = ConfigSet::new();
        assert!(set.add(&desc(InternalFormat::Rgb8, None), 0, 4, 64, 64).unwrap());
        assert!(!set.add(&desc(InternalFormat::Rgba8, None), 0, 4, 64, 64).unwrap());
        assert_eq!(set.len(), 1);
        assert_eq!(set.iter().next().unwrap().render_target_format(), InternalFormat::Rgb8);
    }

    #[test]
    fn channel_order_does_not_distinguish_configs() {
        let set = standard_set();
        assert_eq!(set.len(), 3);
        assert!(set
            .iter()
            .all(|config| config.render_target_format() == InternalFormat::Bgra8));
        let ids: Vec<EGLint> = set.iter().map(Config::config_id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        // Smaller depth buffers sort first.
        assert_eq!(set.get(1).unwrap().depth_stencil_format(), None);
        assert_eq!(
            set.get(2).unwrap().depth_stencil_format(),
            Some(InternalFormat::DepthComponent16)
        );
        assert!(set.get(4).is_none());
    }

    #[test]
    fn filters_never_return_smaller_components() {
        let mut set = ConfigSet::new();
        set.add(&desc(InternalFormat::Rgb565, None), 0, 4, 64, 64).unwrap();
        set.add(&desc(InternalFormat::Rgba8, None), 0, 4, 64, 64).unwrap();
        set.assign_ids();

        let matches = set.get_configs(&[EGL_RED_SIZE, 8, EGL_NONE], 10).unwrap();
        assert_eq!(matches.total, 1);
        let chosen = set.get(matches.configs[0]).unwrap();
        assert!(chosen.attribute(EGL_RED_SIZE).unwrap() >= 8);

        let matches = set
            .get_configs(&[EGL_SURFACE_TYPE, EGL_WINDOW_BIT, EGL_NONE], 10)
            .unwrap();
        assert_eq!(matches.total, 2);
        assert!(matches.configs.iter().all(|id| {
            let surface_type = set.get(*id).unwrap().attribute(EGL_SURFACE_TYPE).unwrap();
            surface_type & EGL_WINDOW_BIT != 0
        }));
    }

    #[test]
    fn requested_components_put_larger_colors_first() {
        let mut set = ConfigSet::new();
        set.add(&desc(InternalFormat::Rgb565, None), 0, 4, 64, 64).unwrap();
        set.add(&desc(InternalFormat::Rgba8, None), 0, 4, 64, 64).unwrap();
        set.assign_ids();
        // The set itself prefers more color bits.
        assert_eq!(set.get(1).unwrap().render_target_format(), InternalFormat::Rgba8);

        let matches = set.get_configs(&[EGL_RED_SIZE, 1, EGL_NONE], 10).unwrap();
        assert_eq!(matches.configs, vec![1, 2]);
        // Without a color request the smaller buffer wins.
        let matches = set.get_configs(&[EGL_RED_SIZE, EGL_DONT_CARE, EGL_NONE], 10).unwrap();
        assert_eq!(matches.configs, vec![2, 1]);
        let matches = set.get_configs(&[EGL_RED_SIZE, 0, EGL_NONE], 10).unwrap();
        assert_eq!(matches.configs, vec![2, 1]);
    }

    #[test]
    fn totals_ignore_the_output_capacity() {
        let set = standard_set();
        let matches = set.get_configs(&[EGL_NONE], 1).unwrap();
        assert_eq!(matches.total, 3);
        assert_eq!(matches.configs, vec![1]);
        assert_eq!(set.get_configs(&[], 0).unwrap().configs, Vec::<EGLint>::new());
    }

    #[test]
    fn unknown_attributes_fail_the_whole_query() {
        let set = standard_set();
        assert_eq!(
            set.get_configs(&[EGL_RED_SIZE, 8, EGL_WIDTH, 4, EGL_NONE], 10),
            Err(EglError::BadAttribute)
        );
        let matches = set
            .get_configs(&[EGL_MATCH_NATIVE_PIXMAP, 7, EGL_NONE], 10)
            .unwrap();
        assert_eq!(matches.total, 0);

        // Keys are checked even when nothing could match them.
        assert_eq!(
            ConfigSet::new().get_configs(&[EGL_WIDTH, 4, EGL_NONE], 10),
            Err(EglError::BadAttribute)
        );
    }

    #[test]
    fn dont_care_criteria_are_not_compared() {
        let set = standard_set();
        let request = [
            EGL_CONFIG_CAVEAT,
            EGL_DONT_CARE,
            EGL_MATCH_NATIVE_PIXMAP,
            EGL_DONT_CARE,
            EGL_DEPTH_SIZE,
            EGL_DONT_CARE,
            EGL_NONE,
        ];
        let matches = set.get_configs(&request, 10).unwrap();
        assert_eq!(matches.total, 3);
        assert_eq!(matches.configs, vec![1, 2, 3]);
    }

    fn any_config() -> impl Strategy<Value = Config> {
        let colors = prop::sample::select(vec![
            InternalFormat::Rgb5A1,
            InternalFormat::Rgba8,
            InternalFormat::Rgb565,
            InternalFormat::Rgb8,
            InternalFormat::Bgra8,
        ]);
        let depths = prop::sample::select(vec![
            None,
            Some(InternalFormat::DepthComponent16),
            Some(InternalFormat::DepthComponent24),
            Some(InternalFormat::Depth24Stencil8),
            Some(InternalFormat::DepthComponent32),
        ]);
        let samples = prop::sample::select(vec![0u32, 2, 4]);
        (colors, depths, samples, any::<bool>(), 1..64i32).prop_map(|(color, depth, samples, fast, id)| {
            let desc = ConfigDesc {
                render_target_format: color,
                depth_stencil_format: depth,
                multi_sample: samples,
                fast_config: fast,
            };
            let mut config = Config::new(&desc, 0, 4, 4096, 4096).unwrap();
            config.config_id = id;
            config
        })
    }

    fn any_sort() -> impl Strategy<Value = SortConfig> {
        (any::<bool>(), any::<bool>(), any::<bool>(), any::<bool>()).prop_map(|(r, g, b, a)| SortConfig {
            want_red: r,
            want_green: g,
            want_blue: b,
            want_alpha: a,
            want_luminance: false,
        })
    }

    proptest! {
        #[test]
        fn ordering_is_a_strict_total_order(
            sort in any_sort(),
            x in any_config(),
            y in any_config(),
            z in any_config(),
        ) {
            // Exactly one of x < y, y < x holds between configs with distinct ids.
            if x.config_id != y.config_id {
                prop_assert!(sort.less(&x, &y) != sort.less(&y, &x));
            }
            prop_assert!(!sort.less(&x, &x));
            if sort.less(&x, &y) && sort.less(&y, &z) {
                prop_assert!(sort.less(&x, &z));
            }
        }

        #[test]
        fn sorting_twice_gives_the_same_order(
            sort in any_sort(),
            configs in prop::collection::vec(any_config(), 0..12),
        ) {
            let mut first = configs.clone();
            first.sort_by(|x, y| sort.compare(x, y));
            let mut second = configs;
            second.reverse();
            second.sort_by(|x, y| sort.compare(x, y));
            for (x, y) in first.iter().zip(&second) {
                prop_assert_eq!(sort.compare(x, y), Ordering::Equal);
            }
        }
    }
}
