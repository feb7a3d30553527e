//! The GLES renderer: owns the device, negotiates capabilities and translates GL-level state
//! and commands into device calls.
//!
//! Everything the renderer binds goes through [`StateCache`]; a binding whose value matches
//! the cached one is skipped unless the corresponding force flag is set. Helper operations that
//! bind their own targets (copies, masked clears, presents) leave the cache coherent by
//! unapplying render targets and marking all state dirty afterwards.

mod clear;
mod copy;
mod draw;
mod lost;
mod readback;
mod state;

use std::fmt;
use std::sync::Arc;

use aero_gles_formats::{DxgiFormat, InternalFormat};
use tracing::{debug, error, warn};

use crate::caps::{
    FeatureLevel, FeatureLevelLimits, FloatFormatCaps, FormatCaps, MAX_FRAGMENT_UNIFORM_VECTORS,
    MAX_POINT_SIZE, MAX_PROBED_SAMPLE_COUNT, MAX_SWAP_INTERVAL, MAX_TEXTURE_IMAGE_UNITS,
    MAX_VERTEX_UNIFORM_VECTORS, MIN_SWAP_INTERVAL,
};
use crate::config::RendererConfig;
use crate::device::{
    BindFlags, BufferHandle, DeviceError, DeviceFactory, DeviceRequest, FormatSupport, GpuDevice,
    NativeWindowId, TextureDesc, ViewDesc,
};
use crate::error::RendererError;
use crate::index_buffer::StreamingIndexBuffer;
use crate::render_target::{AttachmentView, RenderTarget};
use crate::state_cache::StateCache;
use crate::stats::RendererStats;
use crate::swap_chain::{SharedSwapChain, SwapChain};
use crate::texture_storage::{TextureStorage2D, TextureStorageCube};

pub use copy::TextureRegion;
pub use draw::VertexBuffer;
pub use readback::PixelPack;

/// Color formats offered as EGL configs, in enumeration order.
pub const CONFIG_RENDER_TARGET_FORMATS: [InternalFormat; 2] = [InternalFormat::Bgra8, InternalFormat::Rgba8];

/// Depth-stencil formats offered as EGL configs, in enumeration order.
pub const CONFIG_DEPTH_STENCIL_FORMATS: [Option<InternalFormat>; 3] = [
    None,
    Some(InternalFormat::Depth24Stencil8),
    Some(InternalFormat::DepthComponent16),
];

/// Device formats whose multisample support is probed at initialization.
const MULTISAMPLE_CANDIDATES: [DxgiFormat; 8] = [
    DxgiFormat::R8G8B8A8Unorm,
    DxgiFormat::B8G8R8A8Unorm,
    DxgiFormat::R16G16B16A16Float,
    DxgiFormat::R32G32B32A32Float,
    DxgiFormat::R32Float,
    DxgiFormat::R16Float,
    DxgiFormat::D24UnormS8Uint,
    DxgiFormat::D16Unorm,
];

/// One surface format combination the backend can render to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConfigDesc {
    pub render_target_format: InternalFormat,
    pub depth_stencil_format: Option<InternalFormat>,
    pub multi_sample: u32,
    pub fast_config: bool,
}

pub struct Renderer {
    factory: Arc<dyn DeviceFactory>,
    config: RendererConfig,
    stats: Arc<RendererStats>,
    device: Option<Box<dyn GpuDevice>>,
    feature_level: FeatureLevel,
    limits: FeatureLevelLimits,
    format_caps: FormatCaps,
    device_lost: bool,
    cache: StateCache,
    line_loop_ib: StreamingIndexBuffer,
    triangle_fan_ib: StreamingIndexBuffer,
    element_ib: StreamingIndexBuffer,
    copy_vb: Option<BufferHandle>,
    clear_vb: Option<BufferHandle>,
    sync_query: Option<u64>,
}

impl fmt::Debug for Renderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Renderer")
            .field("factory", &self.factory.name())
            .field("initialized", &self.device.is_some())
            .field("feature_level", &self.feature_level)
            .field("device_lost", &self.device_lost)
            .finish_non_exhaustive()
    }
}

/// Borrows the live device, refusing work once it was lost.
fn live_device(
    device: &mut Option<Box<dyn GpuDevice>>,
    lost: bool,
) -> Result<&mut dyn GpuDevice, RendererError> {
    if lost {
        return Err(RendererError::DeviceLost);
    }
    match device {
        Some(device) => Ok(device.as_mut()),
        None => Err(RendererError::NotInitialized),
    }
}

fn probe_format_caps(device: &dyn GpuDevice) -> FormatCaps {
    let texture = FormatSupport::TEXTURE2D | FormatSupport::TEXTURECUBE;
    let has = |format: DxgiFormat, flags: FormatSupport| device.format_support(format).contains(flags);
    let float_caps = |format: DxgiFormat| FloatFormatCaps {
        texture: has(format, texture),
        filter: has(format, FormatSupport::SHADER_SAMPLE),
        render: has(format, FormatSupport::RENDER_TARGET),
    };

    let mut caps = FormatCaps {
        bgra_texture: has(
            DxgiFormat::B8G8R8A8Unorm,
            FormatSupport::TEXTURE2D | FormatSupport::RENDER_TARGET,
        ),
        float16: float_caps(DxgiFormat::R16G16B16A16Float),
        float32: float_caps(DxgiFormat::R32G32B32A32Float),
        dxt1: has(DxgiFormat::Bc1Unorm, texture),
        dxt3: has(DxgiFormat::Bc2Unorm, texture),
        dxt5: has(DxgiFormat::Bc3Unorm, texture),
        depth_textures: has(DxgiFormat::D24UnormS8Uint, FormatSupport::DEPTH_STENCIL)
            && has(DxgiFormat::R24G8Typeless, FormatSupport::TEXTURE2D),
        ..FormatCaps::default()
    };

    for format in MULTISAMPLE_CANDIDATES {
        let counts: Vec<u32> = (2..=MAX_PROBED_SAMPLE_COUNT)
            .filter(|count| device.multisample_quality_levels(format, *count) > 0)
            .collect();
        if let Some(max) = counts.last() {
            caps.max_supported_samples = caps.max_supported_samples.max(*max);
        }
        caps.multisample.insert(format, counts);
    }
    caps
}

impl Renderer {
    pub fn new(factory: Arc<dyn DeviceFactory>, config: RendererConfig) -> Self {
        let index_buffer_size = config.initial_index_buffer_size;
        Self {
            factory,
            config,
            stats: Arc::new(RendererStats::new()),
            device: None,
            feature_level: FeatureLevel::Level11_0,
            limits: FeatureLevel::Level11_0.limits(),
            format_caps: FormatCaps::default(),
            device_lost: false,
            cache: StateCache::new(),
            line_loop_ib: StreamingIndexBuffer::new(index_buffer_size),
            triangle_fan_ib: StreamingIndexBuffer::new(index_buffer_size),
            element_ib: StreamingIndexBuffer::new(index_buffer_size),
            copy_vb: None,
            clear_vb: None,
            sync_query: None,
        }
    }

    fn device_request(&self, debug_layer: bool) -> DeviceRequest {
        DeviceRequest {
            feature_levels: FeatureLevel::requested(self.config.allow_feature_level_9),
            debug_layer,
        }
    }

    /// Creates the device and probes its capabilities.
    pub fn initialize(&mut self) -> Result<(), RendererError> {
        let mut device = match self.factory.create_device(&self.device_request(self.config.debug_layer)) {
            Ok(device) => device,
            Err(err) if self.config.debug_layer => {
                warn!(error = %err, "debug device unavailable; falling back to the release runtime");
                self.create_release_device()?
            }
            Err(err) => {
                error!(error = %err, factory = self.factory.name(), "could not create a device");
                return Err(RendererError::DeviceCreation(err.to_string()));
            }
        };

        let format_caps = probe_format_caps(device.as_ref());
        if !device
            .format_support(DxgiFormat::R8G8B8A8Unorm)
            .contains(FormatSupport::RENDER_TARGET)
        {
            error!(description = device.description(), "device cannot render to RGBA8");
            return Err(RendererError::MissingCapability(
                "R8G8B8A8Unorm render targets".to_owned(),
            ));
        }

        self.feature_level = device.feature_level();
        self.limits = self.feature_level.limits();
        self.format_caps = format_caps;
        debug!(
            feature_level = ?self.feature_level,
            description = device.description(),
            debug_layer = device.debug_layer_enabled(),
            max_samples = self.format_caps.max_supported_samples,
            "device created"
        );
        if let Err(err) = device.flush() {
            error!(error = %err, factory = self.factory.name(), "new device failed its first flush");
            return Err(RendererError::DeviceCreation(err.to_string()));
        }
        self.device = Some(device);
        self.reset_helpers();
        Ok(())
    }

    fn create_release_device(&self) -> Result<Box<dyn GpuDevice>, RendererError> {
        self.factory
            .create_device(&self.device_request(false))
            .map_err(|err| {
                error!(error = %err, factory = self.factory.name(), "could not create a device");
                RendererError::DeviceCreation(err.to_string())
            })
    }

    fn reset_helpers(&mut self) {
        let size = self.config.initial_index_buffer_size;
        self.cache = StateCache::new();
        self.line_loop_ib = StreamingIndexBuffer::new(size);
        self.triangle_fan_ib = StreamingIndexBuffer::new(size);
        self.element_ib = StreamingIndexBuffer::new(size);
        self.copy_vb = None;
        self.clear_vb = None;
        self.sync_query = None;
    }

    /// Drops the device and every helper resource created on it.
    pub fn release(&mut self) {
        self.reset_helpers();
        self.device = None;
    }

    pub fn is_initialized(&self) -> bool {
        self.device.is_some()
    }

    pub fn device_mut(&mut self) -> Result<&mut dyn GpuDevice, RendererError> {
        live_device(&mut self.device, self.device_lost)
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn stats(&self) -> &RendererStats {
        &self.stats
    }

    pub fn stats_handle(&self) -> Arc<RendererStats> {
        Arc::clone(&self.stats)
    }

    pub fn factory(&self) -> &Arc<dyn DeviceFactory> {
        &self.factory
    }

    pub fn feature_level(&self) -> FeatureLevel {
        self.feature_level
    }

    pub fn limits(&self) -> &FeatureLevelLimits {
        &self.limits
    }

    pub fn format_caps(&self) -> &FormatCaps {
        &self.format_caps
    }

    pub fn description(&self) -> Option<&str> {
        self.device.as_deref().map(GpuDevice::description)
    }

    pub fn max_render_targets(&self) -> u32 {
        self.limits.max_render_targets
    }

    pub fn max_texture_dimension(&self) -> u32 {
        self.limits.max_texture_dimension
    }

    pub fn max_cube_map_size(&self) -> u32 {
        self.limits.max_cube_map_size
    }

    pub fn max_renderbuffer_size(&self) -> u32 {
        self.limits.max_texture_dimension
    }

    pub fn max_viewport_dimension(&self) -> u32 {
        self.limits.max_viewport_dimension
    }

    pub fn max_texture_image_units(&self) -> u32 {
        MAX_TEXTURE_IMAGE_UNITS
    }

    pub fn max_vertex_texture_image_units(&self) -> u32 {
        self.limits.max_vertex_texture_image_units
    }

    pub fn max_vertex_uniform_vectors(&self) -> u32 {
        MAX_VERTEX_UNIFORM_VECTORS
    }

    pub fn max_fragment_uniform_vectors(&self) -> u32 {
        MAX_FRAGMENT_UNIFORM_VECTORS
    }

    pub fn max_varying_vectors(&self) -> u32 {
        self.limits.max_varying_vectors
    }

    pub fn max_point_size(&self) -> f32 {
        MAX_POINT_SIZE
    }

    pub fn max_anisotropy(&self) -> u32 {
        self.limits.max_anisotropy
    }

    pub fn min_swap_interval(&self) -> i32 {
        MIN_SWAP_INTERVAL
    }

    pub fn max_swap_interval(&self) -> i32 {
        MAX_SWAP_INTERVAL
    }

    pub fn major_shader_model(&self) -> u32 {
        self.limits.major_shader_model
    }

    pub fn minor_shader_model(&self) -> u32 {
        self.limits.minor_shader_model
    }

    pub fn supports_32bit_indices(&self) -> bool {
        self.limits.supports_32bit_indices
    }

    pub fn supports_npot_textures(&self) -> bool {
        self.limits.supports_npot_textures
    }

    pub fn supports_occlusion_queries(&self) -> bool {
        self.limits.supports_occlusion_queries
    }

    pub fn supports_instancing(&self) -> bool {
        self.limits.supports_instancing
    }

    pub fn supports_derivatives(&self) -> bool {
        self.limits.supports_derivatives
    }

    pub fn supports_event_queries(&self) -> bool {
        true
    }

    pub fn supports_share_handles(&self) -> bool {
        self.format_caps.bgra_texture
    }

    pub fn supports_post_sub_buffer(&self) -> bool {
        false
    }

    pub fn supports_luminance_textures(&self) -> bool {
        false
    }

    pub fn max_supported_samples(&self) -> u32 {
        self.format_caps.max_supported_samples
    }

    /// Smallest supported sample count of `format` that is at least `requested`.
    pub fn nearest_supported_samples(&self, format: DxgiFormat, requested: u32) -> Option<u32> {
        self.format_caps.nearest_supported_samples(format, requested)
    }

    /// Every (color, depth-stencil) combination the device can render to.
    pub fn generate_configs(&self) -> Vec<ConfigDesc> {
        let Some(device) = self.device.as_deref() else {
            return Vec::new();
        };
        let mut configs = Vec::new();
        for render_target_format in CONFIG_RENDER_TARGET_FORMATS {
            if !device
                .format_support(render_target_format.renderbuffer_format())
                .contains(FormatSupport::RENDER_TARGET)
            {
                continue;
            }
            for depth_stencil_format in CONFIG_DEPTH_STENCIL_FORMATS {
                let depth_supported = depth_stencil_format.map_or(true, |format| {
                    device
                        .format_support(format.renderbuffer_format())
                        .contains(FormatSupport::DEPTH_STENCIL)
                });
                if depth_supported {
                    configs.push(ConfigDesc {
                        render_target_format,
                        depth_stencil_format,
                        multi_sample: 0,
                        fast_config: true,
                    });
                }
            }
        }
        debug!(count = configs.len(), "generated configs");
        configs
    }

    pub fn create_swap_chain(
        &self,
        window: Option<NativeWindowId>,
        back_buffer_format: InternalFormat,
        depth_buffer_format: Option<InternalFormat>,
    ) -> SwapChain {
        SwapChain::new(window, back_buffer_format, depth_buffer_format)
    }

    pub fn create_texture_storage_2d(
        &self,
        internal_format: InternalFormat,
        render_target: bool,
        width: u32,
        height: u32,
        levels: u32,
    ) -> TextureStorage2D {
        TextureStorage2D::new(internal_format, render_target, width, height, levels)
    }

    pub fn create_texture_storage_2d_from_swap_chain(&self, swap_chain: &SharedSwapChain) -> TextureStorage2D {
        TextureStorage2D::from_swap_chain(swap_chain.clone())
    }

    pub fn create_texture_storage_cube(
        &self,
        internal_format: InternalFormat,
        render_target: bool,
        size: u32,
        levels: u32,
    ) -> TextureStorageCube {
        TextureStorageCube::new(internal_format, render_target, size, levels)
    }

    /// A standalone color or depth-stencil buffer. Zero-sized requests yield no target.
    pub fn create_renderbuffer(
        &mut self,
        width: u32,
        height: u32,
        format: InternalFormat,
        samples: u32,
    ) -> Result<Option<RenderTarget>, RendererError> {
        let formats = format.texture_format_info();
        let depth = formats.dsv != DxgiFormat::Unknown;
        let texture_format = if depth { formats.dsv } else { formats.tex };
        let samples = self
            .nearest_supported_samples(texture_format, samples)
            .ok_or_else(|| {
                RendererError::OutOfMemory(format!("{format:?} cannot be multisampled {samples}x"))
            })?;
        if width == 0 || height == 0 {
            return Ok(None);
        }
        if !depth && formats.rtv == DxgiFormat::Unknown {
            return Err(RendererError::InvalidOperation(format!("{format:?} is not renderable")));
        }

        let bind = if depth {
            BindFlags::DEPTH_STENCIL
        } else {
            BindFlags::SHADER_RESOURCE | BindFlags::RENDER_TARGET
        };
        let desc = TextureDesc {
            sample_count: samples.max(1),
            ..TextureDesc::new_2d(width, height, texture_format, bind)
        };
        let device = self.device_mut()?;
        let texture = device.create_texture(&desc, None).map_err(|err| match err {
            DeviceError::DeviceRemoved(_) => RendererError::DeviceLost,
            other => RendererError::OutOfMemory(format!("failed to create renderbuffer: {other}")),
        })?;
        let (view, shader_resource) = if depth {
            let dsv = device.create_view(&texture, &ViewDesc::depth_stencil(formats.dsv, 0, 0))?;
            (AttachmentView::DepthStencil(dsv), None)
        } else {
            let rtv = device.create_view(&texture, &ViewDesc::render_target(formats.rtv, 0, 0))?;
            let srv = device.create_view(&texture, &ViewDesc::shader_resource(formats.srv, 0, 1))?;
            (AttachmentView::Color(rtv), Some(srv))
        };
        Ok(Some(RenderTarget::texture(
            texture,
            0,
            view,
            shader_resource,
            (width, height),
            format,
            texture_format,
            samples,
            0,
        )))
    }
}
