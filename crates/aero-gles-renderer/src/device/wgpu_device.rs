//! [`GpuDevice`] on wgpu.
//!
//! Every draw or clear is encoded into its own render pass that loads the bound attachments,
//! which keeps the immediate-context model of the seam without batching. Built-in programs are
//! WGSL; application executables are not supported on this backend. Swap chains are headless:
//! presenting reads the back buffer back into a [`PresentedFrame`].

use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use aero_gles_formats::DxgiFormat;
use hashbrown::HashMap;
use lru::LruCache;

use super::handle::HandleTable;
use super::*;

const PIPELINE_CACHE_CAPACITY: usize = 64;

const COPY_WGSL: &str = r#"
struct CopyVertex {
    @location(0) position: vec2<f32>,
    @location(1) uv: vec2<f32>,
};

struct CopyVaryings {
    @builtin(position) position: vec4<f32>,
    @location(0) uv: vec2<f32>,
};

@group(0) @binding(0) var source: texture_2d<f32>;
@group(0) @binding(1) var source_sampler: sampler;

@vertex
fn vs_copy(v: CopyVertex) -> CopyVaryings {
    var out: CopyVaryings;
    out.position = vec4<f32>(v.position, 0.0, 1.0);
    out.uv = v.uv;
    return out;
}

@fragment
fn fs_copy_rgba(in: CopyVaryings) -> @location(0) vec4<f32> {
    return textureSample(source, source_sampler, in.uv);
}

@fragment
fn fs_copy_rgb(in: CopyVaryings) -> @location(0) vec4<f32> {
    let c = textureSample(source, source_sampler, in.uv);
    return vec4<f32>(c.rgb, 1.0);
}

@fragment
fn fs_copy_lum(in: CopyVaryings) -> @location(0) vec4<f32> {
    let c = textureSample(source, source_sampler, in.uv);
    return vec4<f32>(c.rrr, 1.0);
}

@fragment
fn fs_copy_lum_alpha(in: CopyVaryings) -> @location(0) vec4<f32> {
    let c = textureSample(source, source_sampler, in.uv);
    return vec4<f32>(c.rrr, c.a);
}
"#;

/// Clear shader writing the vertex color to `targets` outputs.
fn clear_wgsl(targets: usize) -> String {
    let mut fields = String::new();
    let mut stores = String::new();
    for i in 0..targets.max(1) {
        fields.push_str(&format!("    @location({i}) c{i}: vec4<f32>,\n"));
        stores.push_str(&format!("    out.c{i} = in.color;\n"));
    }
    format!(
        r#"
struct ClearVertex {{
    @location(0) position: vec3<f32>,
    @location(1) color: vec4<f32>,
}};

struct ClearVaryings {{
    @builtin(position) position: vec4<f32>,
    @location(0) color: vec4<f32>,
}};

struct ClearTargets {{
{fields}}};

@vertex
fn vs_clear(v: ClearVertex) -> ClearVaryings {{
    var out: ClearVaryings;
    out.position = vec4<f32>(v.position, 1.0);
    out.color = v.color;
    return out;
}}

@fragment
fn fs_clear(in: ClearVaryings) -> ClearTargets {{
    var out: ClearTargets;
{stores}    return out;
}}
"#
    )
}

pub fn map_format(format: DxgiFormat) -> Option<wgpu::TextureFormat> {
    use wgpu::TextureFormat as F;
    Some(match format {
        DxgiFormat::R8G8B8A8Unorm => F::Rgba8Unorm,
        DxgiFormat::B8G8R8A8Unorm => F::Bgra8Unorm,
        DxgiFormat::R8Unorm => F::R8Unorm,
        DxgiFormat::R8G8Unorm => F::Rg8Unorm,
        DxgiFormat::R16Float => F::R16Float,
        DxgiFormat::R16G16Float => F::Rg16Float,
        DxgiFormat::R16G16B16A16Float => F::Rgba16Float,
        DxgiFormat::R32Float => F::R32Float,
        DxgiFormat::R32G32Float => F::Rg32Float,
        DxgiFormat::R32G32B32A32Float => F::Rgba32Float,
        DxgiFormat::D16Unorm | DxgiFormat::R16Typeless => F::Depth16Unorm,
        DxgiFormat::D24UnormS8Uint | DxgiFormat::R24G8Typeless | DxgiFormat::R24UnormX8Typeless => {
            F::Depth24PlusStencil8
        }
        DxgiFormat::Bc1Unorm => F::Bc1RgbaUnorm,
        DxgiFormat::Bc2Unorm => F::Bc2RgbaUnorm,
        DxgiFormat::Bc3Unorm => F::Bc3RgbaUnorm,
        DxgiFormat::Unknown | DxgiFormat::A8Unorm | DxgiFormat::R16Unorm | DxgiFormat::R32G32B32Float => {
            return None
        }
    })
}

/// Deepest feature level whose limits the adapter meets.
fn feature_level_from_limits(limits: &wgpu::Limits) -> FeatureLevel {
    if limits.max_texture_dimension_2d >= 16384 && limits.max_color_attachments >= 8 {
        FeatureLevel::Level11_0
    } else if limits.max_texture_dimension_2d >= 8192 {
        if limits.max_color_attachments >= 8 {
            FeatureLevel::Level10_1
        } else {
            FeatureLevel::Level10_0
        }
    } else if limits.max_texture_dimension_2d >= 4096 {
        FeatureLevel::Level9_3
    } else {
        FeatureLevel::Level9_1
    }
}

fn map_blend(blend: Blend) -> wgpu::BlendFactor {
    match blend {
        Blend::Zero => wgpu::BlendFactor::Zero,
        Blend::One => wgpu::BlendFactor::One,
        Blend::SrcColor => wgpu::BlendFactor::Src,
        Blend::InvSrcColor => wgpu::BlendFactor::OneMinusSrc,
        Blend::SrcAlpha => wgpu::BlendFactor::SrcAlpha,
        Blend::InvSrcAlpha => wgpu::BlendFactor::OneMinusSrcAlpha,
        Blend::DestAlpha => wgpu::BlendFactor::DstAlpha,
        Blend::InvDestAlpha => wgpu::BlendFactor::OneMinusDstAlpha,
        Blend::DestColor => wgpu::BlendFactor::Dst,
        Blend::InvDestColor => wgpu::BlendFactor::OneMinusDst,
        Blend::SrcAlphaSat => wgpu::BlendFactor::SrcAlphaSaturated,
        Blend::BlendFactor => wgpu::BlendFactor::Constant,
        Blend::InvBlendFactor => wgpu::BlendFactor::OneMinusConstant,
    }
}

fn map_blend_op(op: BlendOp) -> wgpu::BlendOperation {
    match op {
        BlendOp::Add => wgpu::BlendOperation::Add,
        BlendOp::Subtract => wgpu::BlendOperation::Subtract,
        BlendOp::RevSubtract => wgpu::BlendOperation::ReverseSubtract,
        BlendOp::Min => wgpu::BlendOperation::Min,
        BlendOp::Max => wgpu::BlendOperation::Max,
    }
}

fn map_compare(func: ComparisonFunc) -> wgpu::CompareFunction {
    match func {
        ComparisonFunc::Never => wgpu::CompareFunction::Never,
        ComparisonFunc::Less => wgpu::CompareFunction::Less,
        ComparisonFunc::Equal => wgpu::CompareFunction::Equal,
        ComparisonFunc::LessEqual => wgpu::CompareFunction::LessEqual,
        ComparisonFunc::Greater => wgpu::CompareFunction::Greater,
        ComparisonFunc::NotEqual => wgpu::CompareFunction::NotEqual,
        ComparisonFunc::GreaterEqual => wgpu::CompareFunction::GreaterEqual,
        ComparisonFunc::Always => wgpu::CompareFunction::Always,
    }
}

fn map_stencil_op(op: StencilOp) -> wgpu::StencilOperation {
    match op {
        StencilOp::Keep => wgpu::StencilOperation::Keep,
        StencilOp::Zero => wgpu::StencilOperation::Zero,
        StencilOp::Replace => wgpu::StencilOperation::Replace,
        StencilOp::IncrSat => wgpu::StencilOperation::IncrementClamp,
        StencilOp::DecrSat => wgpu::StencilOperation::DecrementClamp,
        StencilOp::Invert => wgpu::StencilOperation::Invert,
        StencilOp::Incr => wgpu::StencilOperation::IncrementWrap,
        StencilOp::Decr => wgpu::StencilOperation::DecrementWrap,
    }
}

fn map_stencil_face(face: &StencilFaceDesc) -> wgpu::StencilFaceState {
    wgpu::StencilFaceState {
        compare: map_compare(face.func),
        fail_op: map_stencil_op(face.fail_op),
        depth_fail_op: map_stencil_op(face.depth_fail_op),
        pass_op: map_stencil_op(face.pass_op),
    }
}

fn map_filter(filter: FilterMode) -> wgpu::FilterMode {
    match filter {
        FilterMode::Point => wgpu::FilterMode::Nearest,
        FilterMode::Linear => wgpu::FilterMode::Linear,
    }
}

fn map_address(mode: AddressMode) -> wgpu::AddressMode {
    match mode {
        AddressMode::Wrap => wgpu::AddressMode::Repeat,
        AddressMode::Mirror => wgpu::AddressMode::MirrorRepeat,
        AddressMode::Clamp => wgpu::AddressMode::ClampToEdge,
    }
}

fn map_write_mask(mask: ColorWriteMask) -> wgpu::ColorWrites {
    let mut out = wgpu::ColorWrites::empty();
    if mask.contains(ColorWriteMask::RED) {
        out |= wgpu::ColorWrites::RED;
    }
    if mask.contains(ColorWriteMask::GREEN) {
        out |= wgpu::ColorWrites::GREEN;
    }
    if mask.contains(ColorWriteMask::BLUE) {
        out |= wgpu::ColorWrites::BLUE;
    }
    if mask.contains(ColorWriteMask::ALPHA) {
        out |= wgpu::ColorWrites::ALPHA;
    }
    out
}

fn backend_error(err: impl std::fmt::Display) -> DeviceError {
    DeviceError::Backend(err.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PipelineKey {
    program: BuiltinProgram,
    color_formats: Vec<wgpu::TextureFormat>,
    depth_format: Option<wgpu::TextureFormat>,
    sample_count: u32,
    blend: BlendDesc,
    depth_stencil: DepthStencilDesc,
}

struct WgpuTexture {
    desc: TextureDesc,
    format: wgpu::TextureFormat,
    texture: wgpu::Texture,
}

struct WgpuView {
    texture: TextureHandle,
    desc: ViewDesc,
    view: wgpu::TextureView,
}

struct WgpuBuffer {
    buffer: wgpu::Buffer,
    /// CPU copy so unaligned writes can be widened to whole words.
    shadow: Vec<u8>,
}

struct WgpuSwapChain {
    desc: SwapChainDesc,
    back_buffer: TextureHandle,
}

#[derive(Default)]
struct BoundState {
    blend: BlendDesc,
    blend_factor: [f32; 4],
    rasterizer: RasterizerDesc,
    depth_stencil: DepthStencilDesc,
    stencil_ref: u32,
    viewport: Option<Viewport>,
    scissor: Option<ScissorRect>,
    samplers: HashMap<(ShaderStage, u32), SamplerDesc>,
    shader_resources: HashMap<(ShaderStage, u32), ViewHandle>,
    render_targets: Vec<Option<ViewHandle>>,
    depth_stencil_view: Option<ViewHandle>,
    vertex_buffer: Option<(BufferHandle, u32, u32)>,
    topology: PrimitiveTopology,
    program: Option<Program>,
}

/// Creates headless wgpu devices.
#[derive(Debug, Default)]
pub struct WgpuDeviceFactory {
    next_device_id: AtomicU64,
    presented: Arc<Mutex<Vec<PresentedFrame>>>,
}

impl WgpuDeviceFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames presented by every device of this factory, oldest first.
    pub fn take_presented(&self) -> Vec<PresentedFrame> {
        std::mem::take(&mut *self.presented.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

impl DeviceFactory for WgpuDeviceFactory {
    fn name(&self) -> &str {
        "wgpu"
    }

    fn create_device(&self, request: &DeviceRequest) -> Result<Box<dyn GpuDevice>, DeviceError> {
        let device_id = self.next_device_id.fetch_add(1, Ordering::Relaxed) + 1;
        let device = pollster::block_on(WgpuDevice::new_headless(
            device_id,
            request,
            self.presented.clone(),
        ))?;
        Ok(Box::new(device))
    }
}

pub struct WgpuDevice {
    device_id: u64,
    feature_level: FeatureLevel,
    debug_layer: bool,
    description: String,
    device: wgpu::Device,
    queue: wgpu::Queue,
    removed: Arc<Mutex<Option<DeviceRemovedReason>>>,
    release_queue: Arc<ReleaseQueue>,
    textures: HandleTable<WgpuTexture>,
    views: HandleTable<WgpuView>,
    buffers: HandleTable<WgpuBuffer>,
    swap_chains: HandleTable<WgpuSwapChain>,
    state: BoundState,
    copy_module: Arc<wgpu::ShaderModule>,
    copy_bind_group_layout: wgpu::BindGroupLayout,
    copy_pipeline_layout: wgpu::PipelineLayout,
    clear_pipeline_layout: wgpu::PipelineLayout,
    clear_modules: HashMap<usize, Arc<wgpu::ShaderModule>>,
    pipelines: LruCache<PipelineKey, Arc<wgpu::RenderPipeline>>,
    next_query: u64,
    queries: HashMap<u64, Arc<AtomicBool>>,
    presented: Arc<Mutex<Vec<PresentedFrame>>>,
}

impl WgpuDevice {
    pub async fn new_headless(
        device_id: u64,
        request: &DeviceRequest,
        presented: Arc<Mutex<Vec<PresentedFrame>>>,
    ) -> Result<Self, DeviceError> {
        let flags = if request.debug_layer {
            wgpu::InstanceFlags::debugging()
        } else {
            wgpu::InstanceFlags::default()
        };
        // Prefer GL on Linux CI to avoid crashes in some Vulkan software adapters.
        let backends = if cfg!(target_os = "linux") {
            wgpu::Backends::GL | wgpu::Backends::PRIMARY
        } else {
            wgpu::Backends::PRIMARY
        };
        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends,
            flags,
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| DeviceError::Unsupported("no suitable wgpu adapter found".to_owned()))?;

        let available = feature_level_from_limits(&adapter.limits());
        let feature_level = request
            .feature_levels
            .iter()
            .copied()
            .find(|level| *level <= available)
            .ok_or_else(|| {
                DeviceError::Unsupported(format!("adapter only reaches {available:?}"))
            })?;

        let required_features = adapter.features() & wgpu::Features::TEXTURE_COMPRESSION_BC;
        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("aero-gles device"),
                    required_features,
                    required_limits: adapter.limits(),
                },
                None,
            )
            .await
            .map_err(backend_error)?;

        let removed = Arc::new(Mutex::new(None));
        let removed_on_error = removed.clone();
        device.on_uncaptured_error(Box::new(move |error| {
            tracing::error!(%error, "wgpu uncaptured error");
            if matches!(error, wgpu::Error::OutOfMemory { .. }) {
                *removed_on_error.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(DeviceRemovedReason::DriverInternalError);
            }
        }));

        let copy_module = Arc::new(device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("aero-gles copy"),
            source: wgpu::ShaderSource::Wgsl(COPY_WGSL.into()),
        }));
        let copy_bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("aero-gles copy bind group layout"),
            entries: &[
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });
        let copy_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("aero-gles copy pipeline layout"),
            bind_group_layouts: &[&copy_bind_group_layout],
            push_constant_ranges: &[],
        });
        let clear_pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("aero-gles clear pipeline layout"),
            bind_group_layouts: &[],
            push_constant_ranges: &[],
        });

        let info = adapter.get_info();
        tracing::debug!(?feature_level, backend = ?info.backend, adapter = %info.name, "wgpu device created");

        Ok(Self {
            device_id,
            feature_level,
            debug_layer: request.debug_layer,
            description: format!("{} ({:?})", info.name, info.backend),
            device,
            queue,
            removed,
            release_queue: ReleaseQueue::new(),
            textures: HandleTable::new(device_id),
            views: HandleTable::new(device_id),
            buffers: HandleTable::new(device_id),
            swap_chains: HandleTable::new(device_id),
            state: BoundState::default(),
            copy_module,
            copy_bind_group_layout,
            copy_pipeline_layout,
            clear_pipeline_layout,
            clear_modules: HashMap::new(),
            pipelines: LruCache::new(
                NonZeroUsize::new(PIPELINE_CACHE_CAPACITY).expect("PIPELINE_CACHE_CAPACITY must be non-zero"),
            ),
            next_query: 0,
            queries: HashMap::new(),
            presented,
        })
    }

    fn check_alive(&self) -> Result<(), DeviceError> {
        match self.removed_reason() {
            Some(reason) => Err(DeviceError::DeviceRemoved(reason)),
            None => Ok(()),
        }
    }

    fn collect_released(&mut self) {
        loop {
            let released = self.release_queue.drain();
            if released.is_empty() {
                break;
            }
            for (kind, id) in released {
                match kind {
                    ResourceKind::Texture => {
                        if let Some(texture) = self.textures.remove(id) {
                            texture.texture.destroy();
                        }
                    }
                    ResourceKind::View => {
                        self.views.remove(id);
                    }
                    ResourceKind::Buffer => {
                        if let Some(buffer) = self.buffers.remove(id) {
                            buffer.buffer.destroy();
                        }
                    }
                    ResourceKind::SwapChain => {
                        self.swap_chains.remove(id);
                    }
                }
            }
        }
    }

    fn texture(&self, handle: &TextureHandle) -> Result<&WgpuTexture, DeviceError> {
        self.textures.get(handle.device_id(), handle.id())
    }

    fn view(&self, handle: &ViewHandle) -> Result<&WgpuView, DeviceError> {
        self.views.get(handle.device_id(), handle.id())
    }

    fn image_copy<'a>(texture: &'a WgpuTexture, subresource: u32, x: u32, y: u32) -> wgpu::ImageCopyTexture<'a> {
        let (mip, slice) = texture.desc.split_subresource(subresource);
        wgpu::ImageCopyTexture {
            texture: &texture.texture,
            mip_level: mip,
            origin: wgpu::Origin3d { x, y, z: slice },
            aspect: wgpu::TextureAspect::All,
        }
    }

    fn submit(&self, encoder: wgpu::CommandEncoder) {
        self.queue.submit([encoder.finish()]);
    }

    fn encoder(&self, label: &str) -> wgpu::CommandEncoder {
        self.device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor { label: Some(label) })
    }

    fn attachment_size(&self, view: &ViewHandle) -> Result<(u32, u32, u32, wgpu::TextureFormat), DeviceError> {
        let view = self.view(view)?;
        let texture = self.texture(&view.texture)?;
        let (width, height) = texture.desc.mip_size(view.desc.most_detailed_mip);
        Ok((width, height, texture.desc.sample_count, texture.format))
    }

    fn clear_module(&mut self, targets: usize) -> Arc<wgpu::ShaderModule> {
        if let Some(module) = self.clear_modules.get(&targets) {
            return module.clone();
        }
        let module = Arc::new(self.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("aero-gles clear"),
            source: wgpu::ShaderSource::Wgsl(clear_wgsl(targets).into()),
        }));
        self.clear_modules.insert(targets, module.clone());
        module
    }

    fn pipeline(&mut self, key: PipelineKey) -> Arc<wgpu::RenderPipeline> {
        if let Some(pipeline) = self.pipelines.get(&key) {
            return pipeline.clone();
        }

        let blend = &key.blend;
        let blend_state = blend.blend_enable.then(|| wgpu::BlendState {
            color: wgpu::BlendComponent {
                src_factor: map_blend(blend.src_blend),
                dst_factor: map_blend(blend.dest_blend),
                operation: map_blend_op(blend.blend_op),
            },
            alpha: wgpu::BlendComponent {
                src_factor: map_blend(blend.src_blend_alpha),
                dst_factor: map_blend(blend.dest_blend_alpha),
                operation: map_blend_op(blend.blend_op_alpha),
            },
        });
        let targets: Vec<Option<wgpu::ColorTargetState>> = key
            .color_formats
            .iter()
            .map(|format| {
                Some(wgpu::ColorTargetState {
                    format: *format,
                    blend: blend_state,
                    write_mask: map_write_mask(blend.write_mask),
                })
            })
            .collect();

        let ds = &key.depth_stencil;
        let depth_stencil = key.depth_format.map(|format| wgpu::DepthStencilState {
            format,
            depth_write_enabled: ds.depth_enable && ds.depth_write,
            depth_compare: if ds.depth_enable {
                map_compare(ds.depth_func)
            } else {
                wgpu::CompareFunction::Always
            },
            stencil: if ds.stencil_enable && format.has_stencil_aspect() {
                wgpu::StencilState {
                    front: map_stencil_face(&ds.front),
                    back: map_stencil_face(&ds.back),
                    read_mask: u32::from(ds.stencil_read_mask),
                    write_mask: u32::from(ds.stencil_write_mask),
                }
            } else {
                wgpu::StencilState::default()
            },
            bias: wgpu::DepthBiasState::default(),
        });

        let copy_attributes = [
            wgpu::VertexAttribute {
                format: wgpu::VertexFormat::Float32x2,
                offset: 0,
                shader_location: 0,
            },
            wgpu::VertexAttribute {
                format: wgpu::VertexFormat::Float32x2,
                offset: 8,
                shader_location: 1,
            },
        ];
        let clear_attributes = [
            wgpu::VertexAttribute {
                format: wgpu::VertexFormat::Float32x3,
                offset: 0,
                shader_location: 0,
            },
            wgpu::VertexAttribute {
                format: wgpu::VertexFormat::Float32x4,
                offset: 12,
                shader_location: 1,
            },
        ];

        let (module, layout, vertex_entry, fragment_entry, attributes) = match key.program {
            BuiltinProgram::ClearSingle | BuiltinProgram::ClearMultiple => (
                self.clear_module(key.color_formats.len()),
                &self.clear_pipeline_layout,
                "vs_clear",
                "fs_clear",
                &clear_attributes[..],
            ),
            program => (
                self.copy_module.clone(),
                &self.copy_pipeline_layout,
                "vs_copy",
                match program {
                    BuiltinProgram::CopyRgb => "fs_copy_rgb",
                    BuiltinProgram::CopyLum => "fs_copy_lum",
                    BuiltinProgram::CopyLumAlpha => "fs_copy_lum_alpha",
                    _ => "fs_copy_rgba",
                },
                &copy_attributes[..],
            ),
        };

        let pipeline = Arc::new(self.device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("aero-gles builtin"),
            layout: Some(layout),
            vertex: wgpu::VertexState {
                module: &module,
                entry_point: vertex_entry,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                buffers: &[wgpu::VertexBufferLayout {
                    array_stride: u64::from(key.program.vertex_stride()),
                    step_mode: wgpu::VertexStepMode::Vertex,
                    attributes,
                }],
            },
            fragment: Some(wgpu::FragmentState {
                module: &module,
                entry_point: fragment_entry,
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                targets: &targets,
            }),
            primitive: wgpu::PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleStrip,
                ..Default::default()
            },
            depth_stencil,
            multisample: wgpu::MultisampleState {
                count: key.sample_count,
                ..Default::default()
            },
            multiview: None,
        }));
        self.pipelines.put(key, pipeline.clone());
        pipeline
    }

    fn sampler(&self, desc: &SamplerDesc) -> wgpu::Sampler {
        self.device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("aero-gles sampler"),
            address_mode_u: map_address(desc.address_u),
            address_mode_v: map_address(desc.address_v),
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: map_filter(desc.mag_filter),
            min_filter: map_filter(desc.min_filter),
            mipmap_filter: map_filter(desc.mip_filter),
            lod_min_clamp: desc.min_lod,
            lod_max_clamp: desc.max_lod.min(32.0),
            ..Default::default()
        })
    }

    fn draw_builtin(&mut self, program: BuiltinProgram, start_vertex: u32) -> Result<(), DeviceError> {
        let color_views: Vec<ViewHandle> = match program {
            BuiltinProgram::ClearMultiple => self.state.render_targets.iter().flatten().cloned().collect(),
            _ => self
                .state
                .render_targets
                .first()
                .cloned()
                .flatten()
                .into_iter()
                .collect(),
        };
        let depth_view = self.state.depth_stencil_view.clone();

        let mut size = None;
        let mut sample_count = 1;
        let mut color_formats = Vec::with_capacity(color_views.len());
        for view in &color_views {
            let (width, height, samples, format) = self.attachment_size(view)?;
            size.get_or_insert((width, height));
            sample_count = samples;
            color_formats.push(format);
        }
        let depth_format = match &depth_view {
            Some(view) => {
                let (width, height, samples, format) = self.attachment_size(view)?;
                size.get_or_insert((width, height));
                sample_count = samples;
                Some(format)
            }
            None => None,
        };
        let Some((width, height)) = size else {
            return Ok(());
        };

        let viewport = self.state.viewport.unwrap_or_else(|| Viewport::full(width, height));
        let vp_x = viewport.x.clamp(0.0, width as f32);
        let vp_y = viewport.y.clamp(0.0, height as f32);
        let vp_w = (viewport.x + viewport.width).min(width as f32) - vp_x;
        let vp_h = (viewport.y + viewport.height).min(height as f32) - vp_y;
        if vp_w <= 0.0 || vp_h <= 0.0 {
            return Ok(());
        }
        let scissor = match (self.state.rasterizer.scissor_enable, self.state.scissor) {
            (true, Some(rect)) => {
                let left = rect.left.clamp(0, width as i32) as u32;
                let top = rect.top.clamp(0, height as i32) as u32;
                let right = rect.right.clamp(0, width as i32) as u32;
                let bottom = rect.bottom.clamp(0, height as i32) as u32;
                if right <= left || bottom <= top {
                    return Ok(());
                }
                (left, top, right - left, bottom - top)
            }
            _ => (0, 0, width, height),
        };

        let (vertex_buffer, stride, offset) = self
            .state
            .vertex_buffer
            .clone()
            .ok_or_else(|| DeviceError::InvalidArgument("no vertex buffer bound".to_owned()))?;
        if stride != program.vertex_stride() {
            return Err(DeviceError::InvalidArgument(format!(
                "{program:?} expects a {} byte stride, got {stride}",
                program.vertex_stride()
            )));
        }

        let bind_group = if program.is_clear() {
            None
        } else {
            let source = self
                .state
                .shader_resources
                .get(&(ShaderStage::Pixel, 0))
                .ok_or_else(|| DeviceError::InvalidArgument("copy without a source view".to_owned()))?;
            let sampler_desc = self
                .state
                .samplers
                .get(&(ShaderStage::Pixel, 0))
                .copied()
                .unwrap_or_else(|| SamplerDesc::clamped(FilterMode::Linear));
            let sampler = self.sampler(&sampler_desc);
            Some(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("aero-gles copy bind group"),
                layout: &self.copy_bind_group_layout,
                entries: &[
                    wgpu::BindGroupEntry {
                        binding: 0,
                        resource: wgpu::BindingResource::TextureView(&self.view(source)?.view),
                    },
                    wgpu::BindGroupEntry {
                        binding: 1,
                        resource: wgpu::BindingResource::Sampler(&sampler),
                    },
                ],
            }))
        };

        let pipeline = self.pipeline(PipelineKey {
            program,
            color_formats,
            depth_format,
            sample_count,
            blend: self.state.blend,
            depth_stencil: self.state.depth_stencil,
        });

        let color_attachments: Vec<Option<wgpu::RenderPassColorAttachment<'_>>> = color_views
            .iter()
            .map(|view| {
                Ok(Some(wgpu::RenderPassColorAttachment {
                    view: &self.view(view)?.view,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    },
                }))
            })
            .collect::<Result<_, DeviceError>>()?;
        let depth_attachment = match &depth_view {
            Some(view) => {
                let has_stencil = depth_format.is_some_and(|f| f.has_stencil_aspect());
                Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &self.view(view)?.view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: has_stencil.then_some(wgpu::Operations {
                        load: wgpu::LoadOp::Load,
                        store: wgpu::StoreOp::Store,
                    }),
                })
            }
            None => None,
        };
        let buffer = &self.buffers.get(vertex_buffer.device_id(), vertex_buffer.id())?.buffer;

        let mut encoder = self.encoder("aero-gles draw");
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("aero-gles builtin pass"),
                color_attachments: &color_attachments,
                depth_stencil_attachment: depth_attachment,
                occlusion_query_set: None,
                timestamp_writes: None,
            });
            pass.set_pipeline(&pipeline);
            pass.set_viewport(vp_x, vp_y, vp_w, vp_h, viewport.min_depth, viewport.max_depth);
            pass.set_scissor_rect(scissor.0, scissor.1, scissor.2, scissor.3);
            pass.set_stencil_reference(self.state.stencil_ref);
            let [r, g, b, a] = self.state.blend_factor;
            pass.set_blend_constant(wgpu::Color {
                r: f64::from(r),
                g: f64::from(g),
                b: f64::from(b),
                a: f64::from(a),
            });
            if let Some(group) = &bind_group {
                pass.set_bind_group(0, group, &[]);
            }
            pass.set_vertex_buffer(0, buffer.slice(u64::from(offset)..));
            pass.draw(start_vertex..start_vertex + 4, 0..1);
        }
        self.submit(encoder);
        Ok(())
    }

    /// Copies a subresource into a mappable buffer and returns the unpadded rows.
    fn read_subresource(&self, texture: &WgpuTexture, subresource: u32) -> Result<MappedSubresource, DeviceError> {
        if texture.desc.format.is_depth() {
            return Err(DeviceError::Unsupported("reading depth textures back".to_owned()));
        }
        let (mip, _) = texture.desc.split_subresource(subresource);
        let (width, height) = texture.desc.mip_size(mip);
        let format = texture.desc.format;
        let row_pitch = format.row_pitch(width);
        let rows = height.div_ceil(format.info().block_height);
        let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
        let padded = row_pitch.div_ceil(align) * align;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("aero-gles readback"),
            size: u64::from(padded) * u64::from(rows),
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self.encoder("aero-gles readback");
        encoder.copy_texture_to_buffer(
            Self::image_copy(texture, subresource, 0, 0),
            wgpu::ImageCopyBuffer {
                buffer: &staging,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(padded),
                    rows_per_image: Some(rows),
                },
            },
            wgpu::Extent3d {
                width,
                height,
                depth_or_array_layers: 1,
            },
        );
        self.submit(encoder);

        let slice = staging.slice(..);
        let (sender, receiver) = futures_intrusive::channel::shared::oneshot_channel();
        slice.map_async(wgpu::MapMode::Read, move |v| {
            sender.send(v).ok();
        });
        let _ = self.device.poll(wgpu::Maintain::Wait);
        pollster::block_on(receiver.receive())
            .ok_or_else(|| DeviceError::Backend("wgpu: map_async dropped".to_owned()))?
            .map_err(backend_error)?;

        let mapped = slice.get_mapped_range();
        let mut data = Vec::with_capacity((row_pitch * rows) as usize);
        for row in 0..rows as usize {
            let start = row * padded as usize;
            data.extend_from_slice(&mapped[start..start + row_pitch as usize]);
        }
        drop(mapped);
        staging.unmap();
        Ok(MappedSubresource { data, row_pitch })
    }

    fn lock_presented(&self) -> MutexGuard<'_, Vec<PresentedFrame>> {
        self.presented.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl GpuDevice for WgpuDevice {
    fn device_id(&self) -> u64 {
        self.device_id
    }

    fn feature_level(&self) -> FeatureLevel {
        self.feature_level
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn debug_layer_enabled(&self) -> bool {
        self.debug_layer
    }

    fn format_support(&self, format: DxgiFormat) -> FormatSupport {
        let Some(mapped) = map_format(format) else {
            return FormatSupport::empty();
        };
        if !self.device.features().contains(mapped.required_features()) {
            return FormatSupport::empty();
        }
        let features = mapped.guaranteed_format_features(self.device.features());
        let usages = features.allowed_usages;
        let flags = features.flags;
        let mut support = FormatSupport::empty();
        if usages.contains(wgpu::TextureUsages::TEXTURE_BINDING) {
            support |= FormatSupport::TEXTURE2D | FormatSupport::TEXTURECUBE;
            if flags.contains(wgpu::TextureFormatFeatureFlags::FILTERABLE) {
                support |= FormatSupport::SHADER_SAMPLE;
            }
        }
        if usages.contains(wgpu::TextureUsages::RENDER_ATTACHMENT) {
            support |= if mapped.is_depth_stencil_format() {
                FormatSupport::DEPTH_STENCIL
            } else {
                FormatSupport::RENDER_TARGET
            };
        }
        if flags.contains(wgpu::TextureFormatFeatureFlags::BLENDABLE) {
            support |= FormatSupport::BLENDABLE;
        }
        if flags.sample_count_supported(4) {
            support |= FormatSupport::MULTISAMPLE_RENDERTARGET;
        }
        if flags.contains(wgpu::TextureFormatFeatureFlags::MULTISAMPLE_RESOLVE) {
            support |= FormatSupport::MULTISAMPLE_RESOLVE;
        }
        support
    }

    fn multisample_quality_levels(&self, format: DxgiFormat, sample_count: u32) -> u32 {
        if sample_count == 1 {
            return 1;
        }
        let Some(mapped) = map_format(format) else {
            return 0;
        };
        let flags = mapped.guaranteed_format_features(self.device.features()).flags;
        u32::from(flags.sample_count_supported(sample_count))
    }

    fn removed_reason(&self) -> Option<DeviceRemovedReason> {
        *self.removed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn create_texture(
        &mut self,
        desc: &TextureDesc,
        initial_data: Option<&[u8]>,
    ) -> Result<TextureHandle, DeviceError> {
        self.check_alive()?;
        self.collect_released();
        let format = map_format(desc.format)
            .ok_or_else(|| DeviceError::Unsupported(format!("{:?} on wgpu", desc.format)))?;
        let mut usage = wgpu::TextureUsages::empty();
        if desc.sample_count <= 1 {
            usage |= wgpu::TextureUsages::COPY_SRC | wgpu::TextureUsages::COPY_DST;
        }
        if desc.bind.contains(BindFlags::SHADER_RESOURCE) {
            usage |= wgpu::TextureUsages::TEXTURE_BINDING;
        }
        if desc.bind.intersects(BindFlags::RENDER_TARGET | BindFlags::DEPTH_STENCIL) {
            usage |= wgpu::TextureUsages::RENDER_ATTACHMENT;
        }
        let texture = self.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("aero-gles texture"),
            size: wgpu::Extent3d {
                width: desc.width,
                height: desc.height,
                depth_or_array_layers: desc.array_size,
            },
            mip_level_count: desc.mip_levels,
            sample_count: desc.sample_count.max(1),
            dimension: wgpu::TextureDimension::D2,
            format,
            usage,
            view_formats: &[],
        });
        let stored = WgpuTexture {
            desc: *desc,
            format,
            texture,
        };
        if let Some(data) = initial_data {
            self.queue.write_texture(
                Self::image_copy(&stored, 0, 0, 0),
                data,
                wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(desc.format.row_pitch(desc.width)),
                    rows_per_image: None,
                },
                wgpu::Extent3d {
                    width: desc.width,
                    height: desc.height,
                    depth_or_array_layers: 1,
                },
            );
        }
        let id = self.textures.insert(stored);
        Ok(TextureHandle::new(self.device_id, id, &self.release_queue))
    }

    fn texture_desc(&self, texture: &TextureHandle) -> Result<TextureDesc, DeviceError> {
        Ok(self.texture(texture)?.desc)
    }

    fn create_view(&mut self, texture: &TextureHandle, desc: &ViewDesc) -> Result<ViewHandle, DeviceError> {
        self.check_alive()?;
        self.collect_released();
        let stored = self.texture(texture)?;
        let aspect = if desc.kind == ViewKind::ShaderResource && stored.format.is_depth_stencil_format() {
            wgpu::TextureAspect::DepthOnly
        } else {
            wgpu::TextureAspect::All
        };
        let dimension = if desc.cube {
            wgpu::TextureViewDimension::Cube
        } else {
            wgpu::TextureViewDimension::D2
        };
        let view = stored.texture.create_view(&wgpu::TextureViewDescriptor {
            label: Some("aero-gles view"),
            format: None,
            dimension: Some(dimension),
            aspect,
            base_mip_level: desc.most_detailed_mip,
            mip_level_count: Some(desc.mip_levels.max(1)),
            base_array_layer: desc.first_array_slice,
            array_layer_count: Some(desc.array_size.max(1)),
        });
        let id = self.views.insert(WgpuView {
            texture: texture.clone(),
            desc: *desc,
            view,
        });
        Ok(ViewHandle::new(self.device_id, id, &self.release_queue))
    }

    fn view_resource(&self, view: &ViewHandle) -> Result<(TextureHandle, ViewDesc), DeviceError> {
        let view = self.view(view)?;
        Ok((view.texture.clone(), view.desc))
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle, DeviceError> {
        self.check_alive()?;
        self.collect_released();
        let size = u64::from(desc.size).next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT);
        let mut usage = wgpu::BufferUsages::COPY_DST;
        if desc.bind.contains(BindFlags::VERTEX_BUFFER) {
            usage |= wgpu::BufferUsages::VERTEX;
        }
        if desc.bind.contains(BindFlags::INDEX_BUFFER) {
            usage |= wgpu::BufferUsages::INDEX;
        }
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("aero-gles buffer"),
            size,
            usage,
            mapped_at_creation: false,
        });
        let id = self.buffers.insert(WgpuBuffer {
            buffer,
            shadow: vec![0; size as usize],
        });
        Ok(BufferHandle::new(self.device_id, id, &self.release_queue))
    }

    fn write_buffer(&mut self, buffer: &BufferHandle, offset: u32, data: &[u8]) -> Result<(), DeviceError> {
        self.check_alive()?;
        let stored = self.buffers.get_mut(buffer.device_id(), buffer.id())?;
        let start = offset as usize;
        let end = start + data.len();
        if end > stored.shadow.len() {
            return Err(DeviceError::InvalidArgument(format!(
                "write of {} bytes at {offset} past buffer end",
                data.len()
            )));
        }
        stored.shadow[start..end].copy_from_slice(data);
        // write_buffer needs 4-byte aligned offsets and sizes.
        let align = wgpu::COPY_BUFFER_ALIGNMENT as usize;
        let aligned_start = start / align * align;
        let aligned_end = end.next_multiple_of(align).min(stored.shadow.len());
        self.queue.write_buffer(
            &stored.buffer,
            aligned_start as u64,
            &stored.shadow[aligned_start..aligned_end],
        );
        Ok(())
    }

    fn update_subresource(
        &mut self,
        texture: &TextureHandle,
        subresource: u32,
        region: Option<SubresourceBox>,
        data: &[u8],
        row_pitch: u32,
    ) -> Result<(), DeviceError> {
        self.check_alive()?;
        let stored = self.texture(texture)?;
        let (mip, _) = stored.desc.split_subresource(subresource);
        let (width, height) = stored.desc.mip_size(mip);
        let region = region.unwrap_or(SubresourceBox::new(0, 0, width, height));
        self.queue.write_texture(
            Self::image_copy(stored, subresource, region.left, region.top),
            data,
            wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(row_pitch),
                rows_per_image: None,
            },
            wgpu::Extent3d {
                width: region.width(),
                height: region.height(),
                depth_or_array_layers: 1,
            },
        );
        Ok(())
    }

    fn copy_subresource_region(
        &mut self,
        dst: &TextureHandle,
        dst_subresource: u32,
        dst_x: u32,
        dst_y: u32,
        src: &TextureHandle,
        src_subresource: u32,
        src_box: Option<SubresourceBox>,
    ) -> Result<(), DeviceError> {
        self.check_alive()?;
        let source = self.texture(src)?;
        let target = self.texture(dst)?;
        if src_box.is_some() && (source.desc.format.is_depth() || source.desc.sample_count > 1) {
            return Err(DeviceError::InvalidArgument(
                "depth-stencil and multisampled copies take the whole subresource".to_owned(),
            ));
        }
        if source.format.has_stencil_aspect() {
            return Err(DeviceError::Unsupported("copying combined depth-stencil textures".to_owned()));
        }
        let (mip, _) = source.desc.split_subresource(src_subresource);
        let (width, height) = source.desc.mip_size(mip);
        let region = src_box.unwrap_or(SubresourceBox::new(0, 0, width, height));
        let mut encoder = self.encoder("aero-gles copy");
        encoder.copy_texture_to_texture(
            Self::image_copy(source, src_subresource, region.left, region.top),
            Self::image_copy(target, dst_subresource, dst_x, dst_y),
            wgpu::Extent3d {
                width: region.width(),
                height: region.height(),
                depth_or_array_layers: 1,
            },
        );
        self.submit(encoder);
        Ok(())
    }

    fn resolve_subresource(
        &mut self,
        dst: &TextureHandle,
        dst_subresource: u32,
        src: &TextureHandle,
        src_subresource: u32,
        _format: DxgiFormat,
    ) -> Result<(), DeviceError> {
        self.check_alive()?;
        let source = self.texture(src)?;
        let target = self.texture(dst)?;
        let (src_mip, src_slice) = source.desc.split_subresource(src_subresource);
        let (dst_mip, dst_slice) = target.desc.split_subresource(dst_subresource);
        let single = |texture: &wgpu::Texture, mip: u32, slice: u32| {
            texture.create_view(&wgpu::TextureViewDescriptor {
                label: Some("aero-gles resolve view"),
                dimension: Some(wgpu::TextureViewDimension::D2),
                base_mip_level: mip,
                mip_level_count: Some(1),
                base_array_layer: slice,
                array_layer_count: Some(1),
                ..Default::default()
            })
        };
        let source_view = single(&source.texture, src_mip, src_slice);
        let target_view = single(&target.texture, dst_mip, dst_slice);
        let mut encoder = self.encoder("aero-gles resolve");
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("aero-gles resolve pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: &source_view,
                resolve_target: Some(&target_view),
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Load,
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        self.submit(encoder);
        Ok(())
    }

    fn map_read(&mut self, texture: &TextureHandle, subresource: u32) -> Result<MappedSubresource, DeviceError> {
        self.check_alive()?;
        let stored = self.texture(texture)?;
        if stored.desc.usage != Usage::Staging {
            return Err(DeviceError::InvalidArgument("only staging textures can be mapped".to_owned()));
        }
        self.read_subresource(stored, subresource)
    }

    fn set_blend_state(&mut self, desc: &BlendDesc, blend_factor: [f32; 4], _sample_mask: u32) {
        self.state.blend = *desc;
        self.state.blend_factor = blend_factor;
    }

    fn set_rasterizer_state(&mut self, desc: &RasterizerDesc) {
        self.state.rasterizer = *desc;
    }

    fn set_depth_stencil_state(&mut self, desc: &DepthStencilDesc, stencil_ref: u32) {
        self.state.depth_stencil = *desc;
        self.state.stencil_ref = stencil_ref;
    }

    fn set_viewport(&mut self, viewport: &Viewport) {
        self.state.viewport = Some(*viewport);
    }

    fn set_scissor_rect(&mut self, rect: &ScissorRect) {
        self.state.scissor = Some(*rect);
    }

    fn set_sampler(&mut self, stage: ShaderStage, slot: u32, desc: Option<&SamplerDesc>) {
        match desc {
            Some(desc) => self.state.samplers.insert((stage, slot), *desc),
            None => self.state.samplers.remove(&(stage, slot)),
        };
    }

    fn set_shader_resource(&mut self, stage: ShaderStage, slot: u32, view: Option<&ViewHandle>) {
        match view {
            Some(view) => self.state.shader_resources.insert((stage, slot), view.clone()),
            None => self.state.shader_resources.remove(&(stage, slot)),
        };
    }

    fn set_render_targets(&mut self, colors: &[Option<ViewHandle>], depth_stencil: Option<&ViewHandle>) {
        self.state.render_targets = colors.to_vec();
        self.state.depth_stencil_view = depth_stencil.cloned();
    }

    fn set_vertex_buffer(&mut self, buffer: Option<&BufferHandle>, stride: u32, offset: u32) {
        self.state.vertex_buffer = buffer.map(|buffer| (buffer.clone(), stride, offset));
    }

    fn set_index_buffer(&mut self, _buffer: Option<&BufferHandle>, _format: IndexFormat, _offset: u32) {}

    fn set_primitive_topology(&mut self, topology: PrimitiveTopology) {
        self.state.topology = topology;
    }

    fn set_program(&mut self, program: Option<Program>) {
        self.state.program = program;
    }

    fn set_constant_buffer(&mut self, _stage: ShaderStage, _data: &[u8]) {}

    fn draw(&mut self, vertex_count: u32, start_vertex: u32) -> Result<(), DeviceError> {
        self.check_alive()?;
        match self.state.program {
            Some(Program::Builtin(program))
                if vertex_count == 4 && self.state.topology == PrimitiveTopology::TriangleStrip =>
            {
                self.draw_builtin(program, start_vertex)
            }
            program => Err(DeviceError::Unsupported(format!(
                "{program:?} draws on wgpu"
            ))),
        }
    }

    fn draw_indexed(&mut self, _index_count: u32, _start_index: u32, _base_vertex: i32) -> Result<(), DeviceError> {
        self.check_alive()?;
        Err(DeviceError::Unsupported(format!(
            "{:?} indexed draws on wgpu",
            self.state.program
        )))
    }

    fn clear_render_target(&mut self, view: &ViewHandle, color: [f32; 4]) -> Result<(), DeviceError> {
        self.check_alive()?;
        let target = &self.view(view)?.view;
        let [r, g, b, a] = color.map(f64::from);
        let mut encoder = self.encoder("aero-gles clear");
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("aero-gles clear pass"),
            color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                view: target,
                resolve_target: None,
                ops: wgpu::Operations {
                    load: wgpu::LoadOp::Clear(wgpu::Color { r, g, b, a }),
                    store: wgpu::StoreOp::Store,
                },
            })],
            depth_stencil_attachment: None,
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        self.submit(encoder);
        Ok(())
    }

    fn clear_depth_stencil(
        &mut self,
        view: &ViewHandle,
        flags: ClearFlags,
        depth: f32,
        stencil: u8,
    ) -> Result<(), DeviceError> {
        self.check_alive()?;
        let (_, _, _, format) = self.attachment_size(view)?;
        let target = &self.view(view)?.view;
        let depth_load = if flags.contains(ClearFlags::DEPTH) {
            wgpu::LoadOp::Clear(depth)
        } else {
            wgpu::LoadOp::Load
        };
        let stencil_load = if flags.contains(ClearFlags::STENCIL) {
            wgpu::LoadOp::Clear(u32::from(stencil))
        } else {
            wgpu::LoadOp::Load
        };
        let mut encoder = self.encoder("aero-gles clear");
        encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
            label: Some("aero-gles depth clear pass"),
            color_attachments: &[],
            depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                view: target,
                depth_ops: Some(wgpu::Operations {
                    load: depth_load,
                    store: wgpu::StoreOp::Store,
                }),
                stencil_ops: format.has_stencil_aspect().then_some(wgpu::Operations {
                    load: stencil_load,
                    store: wgpu::StoreOp::Store,
                }),
            }),
            occlusion_query_set: None,
            timestamp_writes: None,
        });
        self.submit(encoder);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DeviceError> {
        self.check_alive()?;
        self.collect_released();
        self.queue.submit(std::iter::empty());
        let _ = self.device.poll(wgpu::Maintain::Poll);
        Ok(())
    }

    fn insert_event_query(&mut self) -> Result<u64, DeviceError> {
        self.check_alive()?;
        self.next_query += 1;
        let done = Arc::new(AtomicBool::new(false));
        let signal = done.clone();
        self.queue.on_submitted_work_done(move || signal.store(true, Ordering::Release));
        self.queries.insert(self.next_query, done);
        Ok(self.next_query)
    }

    fn event_query_complete(&mut self, query: u64) -> Result<bool, DeviceError> {
        self.check_alive()?;
        // Callbacks only run while the device is polled.
        let _ = self.device.poll(wgpu::Maintain::Poll);
        let done = self
            .queries
            .get(&query)
            .ok_or_else(|| DeviceError::InvalidResource(format!("unknown event query {query}")))?
            .load(Ordering::Acquire);
        if done {
            self.queries.remove(&query);
        }
        Ok(done)
    }

    fn create_swap_chain(&mut self, desc: &SwapChainDesc) -> Result<SwapChainHandle, DeviceError> {
        self.check_alive()?;
        if desc.width == 0 || desc.height == 0 {
            return Err(DeviceError::InvalidArgument("zero-sized swap chain".to_owned()));
        }
        let back_buffer = self.create_texture(
            &TextureDesc::new_2d(
                desc.width,
                desc.height,
                desc.format,
                BindFlags::RENDER_TARGET | BindFlags::SHADER_RESOURCE,
            ),
            None,
        )?;
        let id = self.swap_chains.insert(WgpuSwapChain {
            desc: *desc,
            back_buffer,
        });
        Ok(SwapChainHandle::new(self.device_id, id, &self.release_queue))
    }

    fn resize_swap_chain(&mut self, swap_chain: &SwapChainHandle, width: u32, height: u32) -> Result<(), DeviceError> {
        self.check_alive()?;
        if width == 0 || height == 0 {
            return Err(DeviceError::InvalidArgument("zero-sized swap chain".to_owned()));
        }
        let format = self.swap_chains.get(swap_chain.device_id(), swap_chain.id())?.desc.format;
        let back_buffer = self.create_texture(
            &TextureDesc::new_2d(
                width,
                height,
                format,
                BindFlags::RENDER_TARGET | BindFlags::SHADER_RESOURCE,
            ),
            None,
        )?;
        let entry = self.swap_chains.get_mut(swap_chain.device_id(), swap_chain.id())?;
        entry.desc.width = width;
        entry.desc.height = height;
        entry.back_buffer = back_buffer;
        Ok(())
    }

    fn swap_chain_back_buffer(&mut self, swap_chain: &SwapChainHandle) -> Result<TextureHandle, DeviceError> {
        self.check_alive()?;
        Ok(self
            .swap_chains
            .get(swap_chain.device_id(), swap_chain.id())?
            .back_buffer
            .clone())
    }

    fn present(&mut self, swap_chain: &SwapChainHandle, sync_interval: u32) -> Result<(), DeviceError> {
        self.check_alive()?;
        let chain = self.swap_chains.get(swap_chain.device_id(), swap_chain.id())?;
        let desc = chain.desc;
        let back_buffer = self.texture(&chain.back_buffer)?;
        let mapped = self.read_subresource(back_buffer, 0)?;
        self.lock_presented().push(PresentedFrame {
            window: desc.window,
            width: desc.width,
            height: desc.height,
            format: desc.format,
            sync_interval,
            pixels: mapped.data,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clear_shader_declares_one_output_per_target() {
        let source = clear_wgsl(3);
        assert!(source.contains("@location(2) c2: vec4<f32>"));
        assert!(!source.contains("c3"));
        assert!(clear_wgsl(0).contains("@location(0) c0"));
    }

    #[test]
    fn unsupported_formats_have_no_wgpu_mapping() {
        assert_eq!(map_format(DxgiFormat::A8Unorm), None);
        assert_eq!(map_format(DxgiFormat::R32G32B32Float), None);
        assert_eq!(
            map_format(DxgiFormat::R24G8Typeless),
            Some(wgpu::TextureFormat::Depth24PlusStencil8)
        );
    }

    #[test]
    fn feature_level_tracks_texture_limits() {
        assert_eq!(
            feature_level_from_limits(&wgpu::Limits::default()),
            FeatureLevel::Level10_1
        );
        assert_eq!(
            feature_level_from_limits(&wgpu::Limits::downlevel_webgl2_defaults()),
            FeatureLevel::Level9_1
        );
    }
}
