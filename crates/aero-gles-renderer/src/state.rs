//! GL-side pipeline state and its translation into device state descriptions.
//!
//! These are the values a GLES context tracks; the renderer diffs them against what it last
//! applied and only then converts them with the `to_*_desc` functions below.

use bitflags::bitflags;

use crate::device::{
    AddressMode, Blend, BlendDesc, BlendOp, ColorWriteMask, ComparisonFunc, CullMode,
    DepthStencilDesc, FilterMode, RasterizerDesc, SamplerDesc, ScissorRect, StencilFaceDesc,
    StencilOp,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Rectangle {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rectangle {
    pub const fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// True when the rectangle covers all of a `width` x `height` target.
    pub fn covers(&self, width: u32, height: u32) -> bool {
        self.x <= 0
            && self.y <= 0
            && i64::from(self.x) + i64::from(self.width) >= i64::from(width)
            && i64::from(self.y) + i64::from(self.height) >= i64::from(height)
    }

    /// Device scissor for this rectangle; negative origins and sizes are clamped to zero.
    pub fn to_scissor_rect(&self) -> ScissorRect {
        ScissorRect {
            left: self.x.max(0),
            top: self.y.max(0),
            right: self.x.saturating_add(self.width.max(0)),
            bottom: self.y.saturating_add(self.height.max(0)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendFactor {
    Zero,
    One,
    SrcColor,
    OneMinusSrcColor,
    DstColor,
    OneMinusDstColor,
    SrcAlpha,
    OneMinusSrcAlpha,
    DstAlpha,
    OneMinusDstAlpha,
    ConstantColor,
    OneMinusConstantColor,
    ConstantAlpha,
    OneMinusConstantAlpha,
    SrcAlphaSaturate,
}

impl BlendFactor {
    fn is_constant_alpha(self) -> bool {
        matches!(self, Self::ConstantAlpha | Self::OneMinusConstantAlpha)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlendEquation {
    Add,
    Subtract,
    ReverseSubtract,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlendState {
    pub blend: bool,
    pub source_blend_rgb: BlendFactor,
    pub dest_blend_rgb: BlendFactor,
    pub source_blend_alpha: BlendFactor,
    pub dest_blend_alpha: BlendFactor,
    pub blend_equation_rgb: BlendEquation,
    pub blend_equation_alpha: BlendEquation,
    pub color_mask_red: bool,
    pub color_mask_green: bool,
    pub color_mask_blue: bool,
    pub color_mask_alpha: bool,
    pub sample_alpha_to_coverage: bool,
    pub dither: bool,
}

impl Default for BlendState {
    fn default() -> Self {
        Self {
            blend: false,
            source_blend_rgb: BlendFactor::One,
            dest_blend_rgb: BlendFactor::Zero,
            source_blend_alpha: BlendFactor::One,
            dest_blend_alpha: BlendFactor::Zero,
            blend_equation_rgb: BlendEquation::Add,
            blend_equation_alpha: BlendEquation::Add,
            color_mask_red: true,
            color_mask_green: true,
            color_mask_blue: true,
            color_mask_alpha: true,
            sample_alpha_to_coverage: false,
            dither: true,
        }
    }
}

impl BlendState {
    pub fn color_write_mask(&self) -> ColorWriteMask {
        color_write_mask(
            self.color_mask_red,
            self.color_mask_green,
            self.color_mask_blue,
            self.color_mask_alpha,
        )
    }

    /// Blend factor to hand the device: a constant-alpha factor on the color channels reads
    /// the alpha of the constant, so the alpha is splatted across all four components.
    pub fn device_blend_factor(&self, blend_color: [f32; 4]) -> [f32; 4] {
        let uses_constant_alpha = self.source_blend_rgb.is_constant_alpha()
            || self.dest_blend_rgb.is_constant_alpha();
        if uses_constant_alpha {
            [blend_color[3]; 4]
        } else {
            blend_color
        }
    }
}

pub fn color_write_mask(red: bool, green: bool, blue: bool, alpha: bool) -> ColorWriteMask {
    let mut mask = ColorWriteMask::empty();
    mask.set(ColorWriteMask::RED, red);
    mask.set(ColorWriteMask::GREEN, green);
    mask.set(ColorWriteMask::BLUE, blue);
    mask.set(ColorWriteMask::ALPHA, alpha);
    mask
}

fn blend_factor(factor: BlendFactor, alpha: bool) -> Blend {
    match factor {
        BlendFactor::Zero => Blend::Zero,
        BlendFactor::One => Blend::One,
        BlendFactor::SrcColor if alpha => Blend::SrcAlpha,
        BlendFactor::SrcColor => Blend::SrcColor,
        BlendFactor::OneMinusSrcColor if alpha => Blend::InvSrcAlpha,
        BlendFactor::OneMinusSrcColor => Blend::InvSrcColor,
        BlendFactor::DstColor if alpha => Blend::DestAlpha,
        BlendFactor::DstColor => Blend::DestColor,
        BlendFactor::OneMinusDstColor if alpha => Blend::InvDestAlpha,
        BlendFactor::OneMinusDstColor => Blend::InvDestColor,
        BlendFactor::SrcAlpha => Blend::SrcAlpha,
        BlendFactor::OneMinusSrcAlpha => Blend::InvSrcAlpha,
        BlendFactor::DstAlpha => Blend::DestAlpha,
        BlendFactor::OneMinusDstAlpha => Blend::InvDestAlpha,
        BlendFactor::ConstantColor | BlendFactor::ConstantAlpha => Blend::BlendFactor,
        BlendFactor::OneMinusConstantColor | BlendFactor::OneMinusConstantAlpha => {
            Blend::InvBlendFactor
        }
        BlendFactor::SrcAlphaSaturate => Blend::SrcAlphaSat,
    }
}

fn blend_op(equation: BlendEquation) -> BlendOp {
    match equation {
        BlendEquation::Add => BlendOp::Add,
        BlendEquation::Subtract => BlendOp::Subtract,
        BlendEquation::ReverseSubtract => BlendOp::RevSubtract,
        BlendEquation::Min => BlendOp::Min,
        BlendEquation::Max => BlendOp::Max,
    }
}

pub fn to_blend_desc(state: &BlendState) -> BlendDesc {
    BlendDesc {
        alpha_to_coverage: state.sample_alpha_to_coverage,
        blend_enable: state.blend,
        src_blend: blend_factor(state.source_blend_rgb, false),
        dest_blend: blend_factor(state.dest_blend_rgb, false),
        blend_op: blend_op(state.blend_equation_rgb),
        src_blend_alpha: blend_factor(state.source_blend_alpha, true),
        dest_blend_alpha: blend_factor(state.dest_blend_alpha, true),
        blend_op_alpha: blend_op(state.blend_equation_alpha),
        write_mask: state.color_write_mask(),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CullFace {
    Front,
    Back,
    FrontAndBack,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrontFace {
    Cw,
    Ccw,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RasterizerState {
    pub cull_face: bool,
    pub cull_mode: CullFace,
    pub front_face: FrontFace,
    pub polygon_offset_fill: bool,
    pub polygon_offset_factor: f32,
    pub polygon_offset_units: f32,
    pub point_draw_mode: bool,
    pub multi_sample: bool,
}

impl Default for RasterizerState {
    fn default() -> Self {
        Self {
            cull_face: false,
            cull_mode: CullFace::Back,
            front_face: FrontFace::Ccw,
            polygon_offset_fill: false,
            polygon_offset_factor: 0.0,
            polygon_offset_units: 0.0,
            point_draw_mode: false,
            multi_sample: false,
        }
    }
}

impl RasterizerState {
    /// Both faces culled: triangle draws produce nothing and are skipped before reaching the
    /// device, which has no equivalent mode.
    pub fn culls_everything(&self) -> bool {
        self.cull_face && self.cull_mode == CullFace::FrontAndBack
    }
}

/// Device rasterizer state. Winding is inverted because rendering is y-flipped relative to
/// GL window coordinates.
pub fn to_rasterizer_desc(state: &RasterizerState, scissor_enable: bool) -> RasterizerDesc {
    let cull_mode = match (state.cull_face, state.cull_mode) {
        (false, _) | (true, CullFace::FrontAndBack) => CullMode::None,
        (true, CullFace::Front) => CullMode::Front,
        (true, CullFace::Back) => CullMode::Back,
    };
    let (depth_bias, slope_scaled_depth_bias) = if state.polygon_offset_fill {
        (state.polygon_offset_units as i32, state.polygon_offset_factor)
    } else {
        (0, 0.0)
    };
    RasterizerDesc {
        cull_mode,
        front_counter_clockwise: state.front_face != FrontFace::Ccw,
        depth_bias,
        slope_scaled_depth_bias,
        depth_clip_enable: true,
        scissor_enable,
        multisample_enable: state.multi_sample,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DepthStencilState {
    pub depth_test: bool,
    pub depth_func: ComparisonFunc,
    pub depth_mask: bool,
    pub stencil_test: bool,
    pub stencil_func: ComparisonFunc,
    pub stencil_mask: u32,
    pub stencil_fail: StencilOp,
    pub stencil_pass_depth_fail: StencilOp,
    pub stencil_pass_depth_pass: StencilOp,
    pub stencil_writemask: u32,
    pub stencil_back_func: ComparisonFunc,
    pub stencil_back_mask: u32,
    pub stencil_back_fail: StencilOp,
    pub stencil_back_pass_depth_fail: StencilOp,
    pub stencil_back_pass_depth_pass: StencilOp,
    pub stencil_back_writemask: u32,
}

impl Default for DepthStencilState {
    fn default() -> Self {
        Self {
            depth_test: false,
            depth_func: ComparisonFunc::Less,
            depth_mask: true,
            stencil_test: false,
            stencil_func: ComparisonFunc::Always,
            stencil_mask: u32::MAX,
            stencil_fail: StencilOp::Keep,
            stencil_pass_depth_fail: StencilOp::Keep,
            stencil_pass_depth_pass: StencilOp::Keep,
            stencil_writemask: u32::MAX,
            stencil_back_func: ComparisonFunc::Always,
            stencil_back_mask: u32::MAX,
            stencil_back_fail: StencilOp::Keep,
            stencil_back_pass_depth_fail: StencilOp::Keep,
            stencil_back_pass_depth_pass: StencilOp::Keep,
            stencil_back_writemask: u32::MAX,
        }
    }
}

/// Stencil masks are truncated to the 8 bits the device stencil buffer has.
pub fn to_depth_stencil_desc(state: &DepthStencilState) -> DepthStencilDesc {
    DepthStencilDesc {
        depth_enable: state.depth_test,
        depth_write: state.depth_mask,
        depth_func: state.depth_func,
        stencil_enable: state.stencil_test,
        stencil_read_mask: (state.stencil_mask & 0xFF) as u8,
        stencil_write_mask: (state.stencil_writemask & 0xFF) as u8,
        front: StencilFaceDesc {
            fail_op: state.stencil_fail,
            depth_fail_op: state.stencil_pass_depth_fail,
            pass_op: state.stencil_pass_depth_pass,
            func: state.stencil_func,
        },
        back: StencilFaceDesc {
            fail_op: state.stencil_back_fail,
            depth_fail_op: state.stencil_back_pass_depth_fail,
            pass_op: state.stencil_back_pass_depth_pass,
            func: state.stencil_back_func,
        },
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MinFilter {
    Nearest,
    Linear,
    NearestMipmapNearest,
    LinearMipmapNearest,
    NearestMipmapLinear,
    LinearMipmapLinear,
}

impl MinFilter {
    pub fn uses_mipmaps(self) -> bool {
        !matches!(self, Self::Nearest | Self::Linear)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MagFilter {
    Nearest,
    Linear,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WrapMode {
    Repeat,
    ClampToEdge,
    MirroredRepeat,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SamplerState {
    pub min_filter: MinFilter,
    pub mag_filter: MagFilter,
    pub wrap_s: WrapMode,
    pub wrap_t: WrapMode,
    pub max_anisotropy: f32,
    /// Physical mip level of the texture's logical level 0.
    pub lod_offset: u32,
}

impl Default for SamplerState {
    fn default() -> Self {
        Self {
            min_filter: MinFilter::NearestMipmapLinear,
            mag_filter: MagFilter::Linear,
            wrap_s: WrapMode::Repeat,
            wrap_t: WrapMode::Repeat,
            max_anisotropy: 1.0,
            lod_offset: 0,
        }
    }
}

fn address_mode(wrap: WrapMode) -> AddressMode {
    match wrap {
        WrapMode::Repeat => AddressMode::Wrap,
        WrapMode::ClampToEdge => AddressMode::Clamp,
        WrapMode::MirroredRepeat => AddressMode::Mirror,
    }
}

pub fn to_sampler_desc(state: &SamplerState, max_anisotropy: u32) -> SamplerDesc {
    let (min_filter, mip_filter) = match state.min_filter {
        MinFilter::Nearest | MinFilter::NearestMipmapNearest => (FilterMode::Point, FilterMode::Point),
        MinFilter::Linear | MinFilter::LinearMipmapNearest => (FilterMode::Linear, FilterMode::Point),
        MinFilter::NearestMipmapLinear => (FilterMode::Point, FilterMode::Linear),
        MinFilter::LinearMipmapLinear => (FilterMode::Linear, FilterMode::Linear),
    };
    let mag_filter = match state.mag_filter {
        MagFilter::Nearest => FilterMode::Point,
        MagFilter::Linear => FilterMode::Linear,
    };
    let min_lod = state.lod_offset as f32;
    SamplerDesc {
        min_filter,
        mag_filter,
        mip_filter,
        address_u: address_mode(state.wrap_s),
        address_v: address_mode(state.wrap_t),
        max_anisotropy: (state.max_anisotropy.max(1.0) as u32).min(max_anisotropy.max(1)),
        min_lod,
        max_lod: if state.min_filter.uses_mipmaps() {
            f32::MAX
        } else {
            min_lod
        },
    }
}

bitflags! {
    /// Buffers a clear touches.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ClearMask: u32 {
        const COLOR = 1 << 0;
        const DEPTH = 1 << 1;
        const STENCIL = 1 << 2;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClearParameters {
    pub mask: ClearMask,
    pub color: [f32; 4],
    pub color_mask_red: bool,
    pub color_mask_green: bool,
    pub color_mask_blue: bool,
    pub color_mask_alpha: bool,
    pub depth: f32,
    pub stencil: i32,
    pub stencil_write_mask: u32,
    /// Scissor rectangle when the scissor test is enabled.
    pub scissor: Option<Rectangle>,
}

impl Default for ClearParameters {
    fn default() -> Self {
        Self {
            mask: ClearMask::empty(),
            color: [0.0; 4],
            color_mask_red: true,
            color_mask_green: true,
            color_mask_blue: true,
            color_mask_alpha: true,
            depth: 1.0,
            stencil: 0,
            stencil_write_mask: u32::MAX,
            scissor: None,
        }
    }
}

impl ClearParameters {
    pub fn color_write_mask(&self) -> ColorWriteMask {
        color_write_mask(
            self.color_mask_red,
            self.color_mask_green,
            self.color_mask_blue,
            self.color_mask_alpha,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn alpha_channel_factors_use_alpha_variants() {
        let state = BlendState {
            blend: true,
            source_blend_alpha: BlendFactor::SrcColor,
            dest_blend_alpha: BlendFactor::OneMinusDstColor,
            ..BlendState::default()
        };
        let desc = to_blend_desc(&state);
        assert_eq!(desc.src_blend_alpha, Blend::SrcAlpha);
        assert_eq!(desc.dest_blend_alpha, Blend::InvDestAlpha);
        assert_eq!(desc.src_blend, Blend::One);
    }

    #[test]
    fn constant_alpha_splats_the_blend_color_alpha() {
        let color = [0.1, 0.2, 0.3, 0.4];
        let state = BlendState {
            dest_blend_rgb: BlendFactor::OneMinusConstantAlpha,
            ..BlendState::default()
        };
        assert_eq!(state.device_blend_factor(color), [0.4; 4]);
        assert_eq!(BlendState::default().device_blend_factor(color), color);
    }

    #[test]
    fn winding_is_inverted_and_double_culling_is_disabled() {
        let state = RasterizerState {
            cull_face: true,
            cull_mode: CullFace::FrontAndBack,
            ..RasterizerState::default()
        };
        let desc = to_rasterizer_desc(&state, true);
        assert_eq!(desc.cull_mode, CullMode::None);
        assert!(!desc.front_counter_clockwise);
        assert!(desc.scissor_enable);
        assert!(state.culls_everything());
    }

    #[test]
    fn non_mipmapped_sampling_is_pinned_to_the_base_level() {
        let state = SamplerState {
            min_filter: MinFilter::Linear,
            lod_offset: 2,
            max_anisotropy: 64.0,
            ..SamplerState::default()
        };
        let desc = to_sampler_desc(&state, 16);
        assert_eq!((desc.min_lod, desc.max_lod), (2.0, 2.0));
        assert_eq!(desc.max_anisotropy, 16);
        let mipmapped = to_sampler_desc(&SamplerState::default(), 16);
        assert_eq!(mipmapped.max_lod, f32::MAX);
        assert_eq!(mipmapped.mip_filter, FilterMode::Linear);
    }

    #[test]
    fn scissor_rect_clamps_negative_extents() {
        assert_eq!(
            Rectangle::new(-4, 2, -1, 5).to_scissor_rect(),
            ScissorRect {
                left: 0,
                top: 2,
                right: -4,
                bottom: 7
            }
        );
        assert!(Rectangle::new(0, 0, 8, 8).covers(8, 4));
        assert!(!Rectangle::new(1, 0, 8, 8).covers(8, 4));
    }
}
