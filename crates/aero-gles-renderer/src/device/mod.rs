//! The device seam: a D3D11-immediate-context-shaped interface the renderer drives.
//!
//! Two implementations live here: [`soft::SoftwareDevice`], a deterministic CPU device used by
//! tests and headless tooling, and [`wgpu_device::WgpuDevice`] on top of wgpu.

pub mod handle;
pub mod soft;
pub mod wgpu_device;

use std::fmt;

use aero_gles_formats::DxgiFormat;
use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};
use thiserror::Error;

pub use crate::caps::FeatureLevel;
pub use handle::{BufferHandle, ReleaseQueue, ResourceKind, SwapChainHandle, TextureHandle, ViewHandle};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceRemovedReason {
    Hung,
    Removed,
    Reset,
    DriverInternalError,
    InvalidCall,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("out of memory: {0}")]
    OutOfMemory(String),
    #[error("device removed ({0:?})")]
    DeviceRemoved(DeviceRemovedReason),
    #[error("invalid resource: {0}")]
    InvalidResource(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("backend error: {0}")]
    Backend(String),
}

bitflags! {
    /// What a device can do with a format.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FormatSupport: u32 {
        const TEXTURE2D = 1 << 0;
        const TEXTURECUBE = 1 << 1;
        const SHADER_SAMPLE = 1 << 2;
        const RENDER_TARGET = 1 << 3;
        const DEPTH_STENCIL = 1 << 4;
        const BLENDABLE = 1 << 5;
        const MULTISAMPLE_RENDERTARGET = 1 << 6;
        const MULTISAMPLE_RESOLVE = 1 << 7;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct BindFlags: u32 {
        const SHADER_RESOURCE = 1 << 0;
        const RENDER_TARGET = 1 << 1;
        const DEPTH_STENCIL = 1 << 2;
        const VERTEX_BUFFER = 1 << 3;
        const INDEX_BUFFER = 1 << 4;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ColorWriteMask: u8 {
        const RED = 1 << 0;
        const GREEN = 1 << 1;
        const BLUE = 1 << 2;
        const ALPHA = 1 << 3;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ClearFlags: u32 {
        const DEPTH = 1 << 0;
        const STENCIL = 1 << 1;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Usage {
    #[default]
    Default,
    /// CPU-readable copy destination; cannot be bound to the pipeline.
    Staging,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureDesc {
    pub width: u32,
    pub height: u32,
    pub mip_levels: u32,
    pub array_size: u32,
    pub format: DxgiFormat,
    pub sample_count: u32,
    pub usage: Usage,
    pub bind: BindFlags,
    pub cube: bool,
}

impl TextureDesc {
    pub fn new_2d(width: u32, height: u32, format: DxgiFormat, bind: BindFlags) -> Self {
        Self {
            width,
            height,
            mip_levels: 1,
            array_size: 1,
            format,
            sample_count: 1,
            usage: Usage::Default,
            bind,
            cube: false,
        }
    }

    pub fn staging(width: u32, height: u32, format: DxgiFormat) -> Self {
        Self {
            usage: Usage::Staging,
            ..Self::new_2d(width, height, format, BindFlags::empty())
        }
    }

    pub fn subresource(&self, mip: u32, slice: u32) -> u32 {
        mip + slice * self.mip_levels
    }

    pub fn subresource_count(&self) -> u32 {
        self.mip_levels * self.array_size
    }

    /// Mip and array slice addressed by a subresource index.
    pub fn split_subresource(&self, subresource: u32) -> (u32, u32) {
        let levels = self.mip_levels.max(1);
        (subresource % levels, subresource / levels)
    }

    pub fn mip_size(&self, mip: u32) -> (u32, u32) {
        ((self.width >> mip).max(1), (self.height >> mip).max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ViewKind {
    ShaderResource,
    RenderTarget,
    DepthStencil,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ViewDesc {
    pub kind: ViewKind,
    pub format: DxgiFormat,
    pub most_detailed_mip: u32,
    pub mip_levels: u32,
    pub first_array_slice: u32,
    pub array_size: u32,
    /// Shader-resource view over all six faces of a cube texture.
    pub cube: bool,
}

impl ViewDesc {
    pub fn shader_resource(format: DxgiFormat, most_detailed_mip: u32, mip_levels: u32) -> Self {
        Self {
            kind: ViewKind::ShaderResource,
            format,
            most_detailed_mip,
            mip_levels,
            first_array_slice: 0,
            array_size: 1,
            cube: false,
        }
    }

    pub fn shader_resource_cube(format: DxgiFormat, most_detailed_mip: u32, mip_levels: u32) -> Self {
        Self {
            array_size: 6,
            cube: true,
            ..Self::shader_resource(format, most_detailed_mip, mip_levels)
        }
    }

    /// Single-mip view of one array slice (one cube face).
    pub fn shader_resource_slice(format: DxgiFormat, mip: u32, slice: u32) -> Self {
        Self {
            first_array_slice: slice,
            ..Self::shader_resource(format, mip, 1)
        }
    }

    pub fn render_target(format: DxgiFormat, mip: u32, slice: u32) -> Self {
        Self {
            kind: ViewKind::RenderTarget,
            first_array_slice: slice,
            ..Self::shader_resource(format, mip, 1)
        }
    }

    pub fn depth_stencil(format: DxgiFormat, mip: u32, slice: u32) -> Self {
        Self {
            kind: ViewKind::DepthStencil,
            first_array_slice: slice,
            ..Self::shader_resource(format, mip, 1)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferDesc {
    pub size: u32,
    pub bind: BindFlags,
}

/// Source region of a texture copy; front/back are always 0..1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubresourceBox {
    pub left: u32,
    pub top: u32,
    pub right: u32,
    pub bottom: u32,
}

impl SubresourceBox {
    pub fn new(left: u32, top: u32, right: u32, bottom: u32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    pub fn width(&self) -> u32 {
        self.right.saturating_sub(self.left)
    }

    pub fn height(&self) -> u32 {
        self.bottom.saturating_sub(self.top)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappedSubresource {
    pub data: Vec<u8>,
    pub row_pitch: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Blend {
    Zero,
    One,
    SrcColor,
    InvSrcColor,
    SrcAlpha,
    InvSrcAlpha,
    DestAlpha,
    InvDestAlpha,
    DestColor,
    InvDestColor,
    SrcAlphaSat,
    BlendFactor,
    InvBlendFactor,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendOp {
    Add,
    Subtract,
    RevSubtract,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendDesc {
    pub alpha_to_coverage: bool,
    pub blend_enable: bool,
    pub src_blend: Blend,
    pub dest_blend: Blend,
    pub blend_op: BlendOp,
    pub src_blend_alpha: Blend,
    pub dest_blend_alpha: Blend,
    pub blend_op_alpha: BlendOp,
    pub write_mask: ColorWriteMask,
}

impl Default for BlendDesc {
    fn default() -> Self {
        Self {
            alpha_to_coverage: false,
            blend_enable: false,
            src_blend: Blend::One,
            dest_blend: Blend::Zero,
            blend_op: BlendOp::Add,
            src_blend_alpha: Blend::One,
            dest_blend_alpha: Blend::Zero,
            blend_op_alpha: BlendOp::Add,
            write_mask: ColorWriteMask::all(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullMode {
    None,
    Front,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterizerDesc {
    pub cull_mode: CullMode,
    pub front_counter_clockwise: bool,
    pub depth_bias: i32,
    pub slope_scaled_depth_bias: f32,
    pub depth_clip_enable: bool,
    pub scissor_enable: bool,
    pub multisample_enable: bool,
}

impl Default for RasterizerDesc {
    fn default() -> Self {
        Self {
            cull_mode: CullMode::Back,
            front_counter_clockwise: false,
            depth_bias: 0,
            slope_scaled_depth_bias: 0.0,
            depth_clip_enable: true,
            scissor_enable: false,
            multisample_enable: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComparisonFunc {
    Never,
    Less,
    Equal,
    LessEqual,
    Greater,
    NotEqual,
    GreaterEqual,
    Always,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StencilOp {
    Keep,
    Zero,
    Replace,
    IncrSat,
    DecrSat,
    Invert,
    Incr,
    Decr,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StencilFaceDesc {
    pub fail_op: StencilOp,
    pub depth_fail_op: StencilOp,
    pub pass_op: StencilOp,
    pub func: ComparisonFunc,
}

impl Default for StencilFaceDesc {
    fn default() -> Self {
        Self {
            fail_op: StencilOp::Keep,
            depth_fail_op: StencilOp::Keep,
            pass_op: StencilOp::Keep,
            func: ComparisonFunc::Always,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilDesc {
    pub depth_enable: bool,
    pub depth_write: bool,
    pub depth_func: ComparisonFunc,
    pub stencil_enable: bool,
    pub stencil_read_mask: u8,
    pub stencil_write_mask: u8,
    pub front: StencilFaceDesc,
    pub back: StencilFaceDesc,
}

impl Default for DepthStencilDesc {
    fn default() -> Self {
        Self {
            depth_enable: true,
            depth_write: true,
            depth_func: ComparisonFunc::Less,
            stencil_enable: false,
            stencil_read_mask: 0xFF,
            stencil_write_mask: 0xFF,
            front: StencilFaceDesc::default(),
            back: StencilFaceDesc::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterMode {
    Point,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddressMode {
    Wrap,
    Mirror,
    Clamp,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerDesc {
    pub min_filter: FilterMode,
    pub mag_filter: FilterMode,
    pub mip_filter: FilterMode,
    pub address_u: AddressMode,
    pub address_v: AddressMode,
    /// 1 disables anisotropic filtering.
    pub max_anisotropy: u32,
    pub min_lod: f32,
    pub max_lod: f32,
}

impl SamplerDesc {
    pub fn clamped(filter: FilterMode) -> Self {
        Self {
            min_filter: filter,
            mag_filter: filter,
            mip_filter: filter,
            address_u: AddressMode::Clamp,
            address_v: AddressMode::Clamp,
            max_anisotropy: 1,
            min_lod: 0.0,
            max_lod: f32::MAX,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Viewport {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
    pub min_depth: f32,
    pub max_depth: f32,
}

impl Viewport {
    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            width: width as f32,
            height: height as f32,
            min_depth: 0.0,
            max_depth: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScissorRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PrimitiveTopology {
    #[default]
    Undefined,
    PointList,
    LineList,
    LineStrip,
    TriangleList,
    TriangleStrip,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

impl IndexFormat {
    pub fn size(self) -> u32 {
        match self {
            Self::Uint16 => 2,
            Self::Uint32 => 4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Pixel,
}

/// Shaders the renderer itself needs for copies, clears and presentation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinProgram {
    CopyRgba,
    CopyRgb,
    CopyLum,
    CopyLumAlpha,
    ClearSingle,
    ClearMultiple,
}

impl BuiltinProgram {
    /// Copy programs read [`PositionTexCoordVertex`]; clear programs read
    /// [`PositionDepthColorVertex`].
    pub fn vertex_stride(self) -> u32 {
        match self {
            Self::CopyRgba | Self::CopyRgb | Self::CopyLum | Self::CopyLumAlpha => {
                std::mem::size_of::<PositionTexCoordVertex>() as u32
            }
            Self::ClearSingle | Self::ClearMultiple => {
                std::mem::size_of::<PositionDepthColorVertex>() as u32
            }
        }
    }

    pub fn is_clear(self) -> bool {
        matches!(self, Self::ClearSingle | Self::ClearMultiple)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Program {
    Builtin(BuiltinProgram),
    /// Application shaders compiled elsewhere, identified by executable serials.
    Executable { vertex: u64, pixel: u64 },
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PositionTexCoordVertex {
    pub x: f32,
    pub y: f32,
    pub u: f32,
    pub v: f32,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct PositionDepthColorVertex {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

/// Opaque identity of a native window a swap chain presents to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeWindowId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SwapChainDesc {
    pub window: NativeWindowId,
    pub width: u32,
    pub height: u32,
    pub format: DxgiFormat,
    pub buffer_count: u32,
}

/// Back-buffer contents captured at present time by headless swap chains.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresentedFrame {
    pub window: NativeWindowId,
    pub width: u32,
    pub height: u32,
    pub format: DxgiFormat,
    pub sync_interval: u32,
    pub pixels: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRequest {
    /// Acceptable feature levels, highest first.
    pub feature_levels: Vec<FeatureLevel>,
    pub debug_layer: bool,
}

/// Creates devices; kept by the renderer so a lost device can be recreated from scratch.
pub trait DeviceFactory: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn create_device(&self, request: &DeviceRequest) -> Result<Box<dyn GpuDevice>, DeviceError>;
}

/// Device plus immediate context.
///
/// State setters never fail: like their D3D11 counterparts they record state that is validated
/// when a draw consumes it. Calls made after the device was removed fail with
/// [`DeviceError::DeviceRemoved`].
pub trait GpuDevice: Send {
    fn device_id(&self) -> u64;
    fn feature_level(&self) -> FeatureLevel;
    fn description(&self) -> &str;
    fn debug_layer_enabled(&self) -> bool;
    fn format_support(&self, format: DxgiFormat) -> FormatSupport;
    /// Number of quality levels for `sample_count` samples; 0 means unsupported.
    fn multisample_quality_levels(&self, format: DxgiFormat, sample_count: u32) -> u32;
    fn removed_reason(&self) -> Option<DeviceRemovedReason>;

    fn create_texture(
        &mut self,
        desc: &TextureDesc,
        initial_data: Option<&[u8]>,
    ) -> Result<TextureHandle, DeviceError>;
    fn texture_desc(&self, texture: &TextureHandle) -> Result<TextureDesc, DeviceError>;
    fn create_view(&mut self, texture: &TextureHandle, desc: &ViewDesc) -> Result<ViewHandle, DeviceError>;
    /// The texture a view was created from (retained) and the view's description.
    fn view_resource(&self, view: &ViewHandle) -> Result<(TextureHandle, ViewDesc), DeviceError>;
    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle, DeviceError>;
    fn write_buffer(&mut self, buffer: &BufferHandle, offset: u32, data: &[u8]) -> Result<(), DeviceError>;
    fn update_subresource(
        &mut self,
        texture: &TextureHandle,
        subresource: u32,
        region: Option<SubresourceBox>,
        data: &[u8],
        row_pitch: u32,
    ) -> Result<(), DeviceError>;
    /// Depth-stencil and multisampled copies require `src_box == None` (whole subresource).
    #[allow(clippy::too_many_arguments)]
    fn copy_subresource_region(
        &mut self,
        dst: &TextureHandle,
        dst_subresource: u32,
        dst_x: u32,
        dst_y: u32,
        src: &TextureHandle,
        src_subresource: u32,
        src_box: Option<SubresourceBox>,
    ) -> Result<(), DeviceError>;
    fn resolve_subresource(
        &mut self,
        dst: &TextureHandle,
        dst_subresource: u32,
        src: &TextureHandle,
        src_subresource: u32,
        format: DxgiFormat,
    ) -> Result<(), DeviceError>;
    /// Reads a staging texture subresource.
    fn map_read(&mut self, texture: &TextureHandle, subresource: u32) -> Result<MappedSubresource, DeviceError>;

    fn set_blend_state(&mut self, desc: &BlendDesc, blend_factor: [f32; 4], sample_mask: u32);
    fn set_rasterizer_state(&mut self, desc: &RasterizerDesc);
    fn set_depth_stencil_state(&mut self, desc: &DepthStencilDesc, stencil_ref: u32);
    fn set_viewport(&mut self, viewport: &Viewport);
    fn set_scissor_rect(&mut self, rect: &ScissorRect);
    fn set_sampler(&mut self, stage: ShaderStage, slot: u32, desc: Option<&SamplerDesc>);
    fn set_shader_resource(&mut self, stage: ShaderStage, slot: u32, view: Option<&ViewHandle>);
    fn set_render_targets(&mut self, colors: &[Option<ViewHandle>], depth_stencil: Option<&ViewHandle>);
    fn set_vertex_buffer(&mut self, buffer: Option<&BufferHandle>, stride: u32, offset: u32);
    fn set_index_buffer(&mut self, buffer: Option<&BufferHandle>, format: IndexFormat, offset: u32);
    fn set_primitive_topology(&mut self, topology: PrimitiveTopology);
    fn set_program(&mut self, program: Option<Program>);
    fn set_constant_buffer(&mut self, stage: ShaderStage, data: &[u8]);

    fn draw(&mut self, vertex_count: u32, start_vertex: u32) -> Result<(), DeviceError>;
    fn draw_indexed(&mut self, index_count: u32, start_index: u32, base_vertex: i32) -> Result<(), DeviceError>;
    fn clear_render_target(&mut self, view: &ViewHandle, color: [f32; 4]) -> Result<(), DeviceError>;
    fn clear_depth_stencil(
        &mut self,
        view: &ViewHandle,
        flags: ClearFlags,
        depth: f32,
        stencil: u8,
    ) -> Result<(), DeviceError>;
    fn flush(&mut self) -> Result<(), DeviceError>;
    fn insert_event_query(&mut self) -> Result<u64, DeviceError>;
    fn event_query_complete(&mut self, query: u64) -> Result<bool, DeviceError>;

    fn create_swap_chain(&mut self, desc: &SwapChainDesc) -> Result<SwapChainHandle, DeviceError>;
    fn resize_swap_chain(&mut self, swap_chain: &SwapChainHandle, width: u32, height: u32) -> Result<(), DeviceError>;
    fn swap_chain_back_buffer(&mut self, swap_chain: &SwapChainHandle) -> Result<TextureHandle, DeviceError>;
    fn present(&mut self, swap_chain: &SwapChainHandle, sync_interval: u32) -> Result<(), DeviceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subresource_indices_are_mip_major_within_a_slice() {
        let desc = TextureDesc {
            mip_levels: 4,
            array_size: 6,
            cube: true,
            ..TextureDesc::new_2d(16, 16, DxgiFormat::R8G8B8A8Unorm, BindFlags::SHADER_RESOURCE)
        };
        assert_eq!(desc.subresource(2, 3), 14);
        assert_eq!(desc.split_subresource(14), (2, 3));
        assert_eq!(desc.subresource_count(), 24);
        assert_eq!(desc.mip_size(5), (1, 1));
    }

    #[test]
    fn builtin_vertex_layouts_match_struct_sizes() {
        assert_eq!(BuiltinProgram::CopyRgb.vertex_stride(), 16);
        assert_eq!(BuiltinProgram::ClearMultiple.vertex_stride(), 28);
    }
}
