//! The renderer's record of what is currently bound on the device.
//!
//! Every setter on [`crate::Renderer`] asks the cache whether the incoming value is already
//! current and records it once the device call was issued. Out-of-band device use (quad
//! copies, masked clears, presentation) ends with [`StateCache::mark_all_dirty`], after which
//! the next application of each piece of state reaches the device unconditionally.

use std::sync::atomic::{AtomicU64, Ordering};

use aero_gles_formats::InternalFormat;
use bitflags::bitflags;
use bytemuck::{Pod, Zeroable};

use crate::caps::MAX_DRAW_BUFFERS;
use crate::device::{IndexFormat, PrimitiveTopology, Program, ShaderStage};
use crate::state::{BlendState, DepthStencilState, RasterizerState, Rectangle, SamplerState};

static NEXT_SERIAL: AtomicU64 = AtomicU64::new(1);

/// Process-wide monotonic identity for render targets, storages and buffers. Never 0, which
/// the cache uses for "nothing bound".
pub fn issue_serial() -> u64 {
    NEXT_SERIAL.fetch_add(1, Ordering::Relaxed)
}

bitflags! {
    /// Whole-state bindings that must be re-issued regardless of the cached value.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ForceFlags: u32 {
        const BLEND = 1 << 0;
        const RASTERIZER = 1 << 1;
        const DEPTH_STENCIL = 1 << 2;
        const SCISSOR = 1 << 3;
        const VIEWPORT = 1 << 4;
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AppliedBlend {
    pub state: BlendState,
    pub color: [f32; 4],
    pub sample_mask: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedDepthStencil {
    pub state: DepthStencilState,
    pub stencil_ref: i32,
    pub stencil_back_ref: i32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AppliedViewport {
    pub viewport: Rectangle,
    pub z_near: f32,
    pub z_far: f32,
}

/// Size and format of the bound render target set, taken from the first color attachment
/// (or the depth-stencil attachment when there is no color).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderTargetDesc {
    pub width: u32,
    pub height: u32,
    pub format: InternalFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppliedRenderTargets {
    pub color: [u64; MAX_DRAW_BUFFERS],
    pub depth_stencil: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AppliedBuffer {
    pub serial: u64,
    pub offset: u32,
    /// Stride for vertex buffers, element size for index buffers.
    pub stride: u32,
}

/// Values the translated shaders read from the driver constant buffer.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct DriverConstants {
    /// Half extents and center of the viewport, in pixels.
    pub view_coords: [f32; 4],
    /// `(far - near) / 2`, `(far + near) / 2`, front-face sign, unused.
    pub depth_front: [f32; 4],
    /// `near`, `far`, `far - near`, unused.
    pub depth_range: [f32; 4],
}

/// Per-stage sampler and texture slots.
#[derive(Debug, Clone, Default)]
pub struct StageCache {
    samplers: Vec<Option<SamplerState>>,
    texture_serials: Vec<u64>,
}

impl StageCache {
    pub fn sampler(&self, slot: u32) -> Option<SamplerState> {
        self.samplers.get(slot as usize).copied().flatten()
    }

    pub fn sampler_current(&self, slot: u32, state: &SamplerState) -> bool {
        self.sampler(slot).as_ref() == Some(state)
    }

    pub fn record_sampler(&mut self, slot: u32, state: SamplerState) {
        let slot = slot as usize;
        if self.samplers.len() <= slot {
            self.samplers.resize(slot + 1, None);
        }
        self.samplers[slot] = Some(state);
    }

    /// Serial of the texture bound at `slot`; 0 when none is bound or the slot is dirty.
    pub fn texture_serial(&self, slot: u32) -> u64 {
        self.texture_serials.get(slot as usize).copied().unwrap_or(0)
    }

    pub fn record_texture(&mut self, slot: u32, serial: u64) {
        let slot = slot as usize;
        if self.texture_serials.len() <= slot {
            self.texture_serials.resize(slot + 1, 0);
        }
        self.texture_serials[slot] = serial;
    }

    fn mark_dirty(&mut self) {
        self.samplers.clear();
        self.texture_serials.clear();
    }
}

#[derive(Debug, Clone, Default)]
pub struct StateCache {
    force: ForceFlags,
    blend: Option<AppliedBlend>,
    rasterizer: Option<RasterizerState>,
    depth_stencil: Option<AppliedDepthStencil>,
    scissor: Rectangle,
    scissor_enabled: bool,
    viewport: Option<AppliedViewport>,
    vertex: StageCache,
    pixel: StageCache,
    render_targets: AppliedRenderTargets,
    render_target_desc: Option<RenderTargetDesc>,
    depth_size: Option<u32>,
    stencil_size: u32,
    vertex_buffer: Option<AppliedBuffer>,
    index_buffer: Option<AppliedBuffer>,
    index_format: Option<IndexFormat>,
    program: Option<Program>,
    topology: PrimitiveTopology,
    constants: DriverConstants,
    applied_constants: Option<DriverConstants>,
}

impl StateCache {
    /// A cache that knows nothing about the device: everything is forced.
    pub fn new() -> Self {
        let mut cache = Self::default();
        cache.mark_all_dirty();
        cache
    }

    pub fn is_forced(&self, flag: ForceFlags) -> bool {
        self.force.contains(flag)
    }

    pub fn force(&mut self, flag: ForceFlags) {
        self.force |= flag;
    }

    pub fn stage(&self, stage: ShaderStage) -> &StageCache {
        match stage {
            ShaderStage::Vertex => &self.vertex,
            ShaderStage::Pixel => &self.pixel,
        }
    }

    pub fn stage_mut(&mut self, stage: ShaderStage) -> &mut StageCache {
        match stage {
            ShaderStage::Vertex => &mut self.vertex,
            ShaderStage::Pixel => &mut self.pixel,
        }
    }

    pub fn blend_current(&self, applied: &AppliedBlend) -> bool {
        !self.is_forced(ForceFlags::BLEND) && self.blend.as_ref() == Some(applied)
    }

    pub fn record_blend(&mut self, applied: AppliedBlend) {
        self.blend = Some(applied);
        self.force.remove(ForceFlags::BLEND);
    }

    pub fn rasterizer_current(&self, state: &RasterizerState) -> bool {
        !self.is_forced(ForceFlags::RASTERIZER) && self.rasterizer.as_ref() == Some(state)
    }

    pub fn rasterizer(&self) -> Option<RasterizerState> {
        self.rasterizer
    }

    pub fn record_rasterizer(&mut self, state: RasterizerState) {
        self.rasterizer = Some(state);
        self.force.remove(ForceFlags::RASTERIZER);
    }

    pub fn depth_stencil_current(&self, applied: &AppliedDepthStencil) -> bool {
        !self.is_forced(ForceFlags::DEPTH_STENCIL) && self.depth_stencil.as_ref() == Some(applied)
    }

    pub fn record_depth_stencil(&mut self, applied: AppliedDepthStencil) {
        self.depth_stencil = Some(applied);
        self.force.remove(ForceFlags::DEPTH_STENCIL);
    }

    pub fn scissor_current(&self, scissor: &Rectangle, enabled: bool) -> bool {
        !self.is_forced(ForceFlags::SCISSOR)
            && self.scissor == *scissor
            && self.scissor_enabled == enabled
    }

    /// Records the scissor. Toggling the scissor test changes the rasterizer object, so the
    /// rasterizer is forced when `enabled` flips.
    pub fn record_scissor(&mut self, scissor: Rectangle, enabled: bool) {
        if enabled != self.scissor_enabled {
            self.force(ForceFlags::RASTERIZER);
        }
        self.scissor = scissor;
        self.scissor_enabled = enabled;
        self.force.remove(ForceFlags::SCISSOR);
    }

    pub fn scissor_enabled(&self) -> bool {
        self.scissor_enabled
    }

    pub fn scissor(&self) -> Rectangle {
        self.scissor
    }

    pub fn viewport_current(&self, applied: &AppliedViewport) -> bool {
        !self.is_forced(ForceFlags::VIEWPORT) && self.viewport.as_ref() == Some(applied)
    }

    pub fn record_viewport(&mut self, applied: AppliedViewport) {
        self.viewport = Some(applied);
        self.force.remove(ForceFlags::VIEWPORT);
    }

    pub fn render_targets_current(&self, applied: &AppliedRenderTargets) -> bool {
        self.render_target_desc.is_some()
            && self.depth_size.is_some()
            && self.render_targets == *applied
    }

    /// Records a new render target set. Viewport and scissor are sized relative to it and
    /// are forced; a change of depth buffer precision also forces the rasterizer (depth bias
    /// is expressed in depth buffer units).
    pub fn record_render_targets(
        &mut self,
        applied: AppliedRenderTargets,
        desc: RenderTargetDesc,
        depth_size: u32,
        stencil_size: u32,
    ) {
        self.render_targets = applied;
        self.render_target_desc = Some(desc);
        self.force(ForceFlags::VIEWPORT | ForceFlags::SCISSOR);
        if self.depth_size != Some(depth_size) {
            self.depth_size = Some(depth_size);
            self.force(ForceFlags::RASTERIZER);
        }
        self.stencil_size = stencil_size;
    }

    pub fn render_target_desc(&self) -> Option<RenderTargetDesc> {
        self.render_target_desc
    }

    pub fn stencil_size(&self) -> u32 {
        self.stencil_size
    }

    /// Forgets the bound render targets without touching other state; the next
    /// `apply_render_target` rebinds.
    pub fn invalidate_render_targets(&mut self) {
        self.render_targets = AppliedRenderTargets::default();
        self.render_target_desc = None;
    }

    pub fn vertex_buffer_current(&self, applied: &AppliedBuffer) -> bool {
        self.vertex_buffer.as_ref() == Some(applied)
    }

    pub fn record_vertex_buffer(&mut self, applied: Option<AppliedBuffer>) {
        self.vertex_buffer = applied;
    }

    pub fn index_buffer_current(&self, applied: &AppliedBuffer, format: IndexFormat) -> bool {
        self.index_buffer.as_ref() == Some(applied) && self.index_format == Some(format)
    }

    pub fn record_index_buffer(&mut self, applied: AppliedBuffer, format: IndexFormat) {
        self.index_buffer = Some(applied);
        self.index_format = Some(format);
    }

    pub fn program(&self) -> Option<Program> {
        self.program
    }

    pub fn record_program(&mut self, program: Option<Program>) {
        self.program = program;
    }

    pub fn topology(&self) -> PrimitiveTopology {
        self.topology
    }

    pub fn record_topology(&mut self, topology: PrimitiveTopology) {
        self.topology = topology;
    }

    pub fn constants(&self) -> &DriverConstants {
        &self.constants
    }

    pub fn constants_mut(&mut self) -> &mut DriverConstants {
        &mut self.constants
    }

    /// Driver constants that differ from what the shaders last saw.
    pub fn take_dirty_constants(&mut self) -> Option<DriverConstants> {
        if self.applied_constants == Some(self.constants) {
            return None;
        }
        self.applied_constants = Some(self.constants);
        Some(self.constants)
    }

    pub fn mark_all_dirty(&mut self) {
        self.force = ForceFlags::all();
        self.vertex.mark_dirty();
        self.pixel.mark_dirty();
        self.render_targets = AppliedRenderTargets::default();
        self.render_target_desc = None;
        self.depth_size = None;
        self.vertex_buffer = None;
        self.index_buffer = None;
        self.index_format = None;
        self.program = None;
        self.topology = PrimitiveTopology::Undefined;
        self.applied_constants = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::MinFilter;

    #[test]
    fn new_cache_forces_every_binding() {
        let cache = StateCache::new();
        assert!(!cache.blend_current(&AppliedBlend {
            state: BlendState::default(),
            color: [0.0; 4],
            sample_mask: u32::MAX,
        }));
        assert!(cache.is_forced(ForceFlags::all()));
    }

    #[test]
    fn recorded_state_is_current_until_marked_dirty() {
        let mut cache = StateCache::new();
        let state = RasterizerState::default();
        cache.record_rasterizer(state);
        assert!(cache.rasterizer_current(&state));

        cache.mark_all_dirty();
        assert!(!cache.rasterizer_current(&state));
    }

    #[test]
    fn toggling_the_scissor_test_forces_the_rasterizer() {
        let mut cache = StateCache::new();
        cache.record_rasterizer(RasterizerState::default());
        cache.record_scissor(Rectangle::new(0, 0, 4, 4), false);
        assert!(!cache.is_forced(ForceFlags::RASTERIZER));

        cache.record_scissor(Rectangle::new(0, 0, 4, 4), true);
        assert!(cache.is_forced(ForceFlags::RASTERIZER));
        assert!(cache.scissor_current(&Rectangle::new(0, 0, 4, 4), true));
    }

    #[test]
    fn sampler_slots_grow_on_demand_and_clear_when_dirty() {
        let mut cache = StateCache::new();
        let sampler = SamplerState {
            min_filter: MinFilter::Linear,
            ..SamplerState::default()
        };
        cache.stage_mut(ShaderStage::Pixel).record_sampler(5, sampler);
        cache.stage_mut(ShaderStage::Pixel).record_texture(5, 42);
        assert!(cache.stage(ShaderStage::Pixel).sampler_current(5, &sampler));
        assert!(!cache.stage(ShaderStage::Vertex).sampler_current(5, &sampler));
        assert_eq!(cache.stage(ShaderStage::Pixel).texture_serial(5), 42);

        cache.mark_all_dirty();
        assert_eq!(cache.stage(ShaderStage::Pixel).sampler(5), None);
        assert_eq!(cache.stage(ShaderStage::Pixel).texture_serial(5), 0);
    }

    #[test]
    fn constants_are_handed_out_once_per_change() {
        let mut cache = StateCache::new();
        assert!(cache.take_dirty_constants().is_some());
        assert!(cache.take_dirty_constants().is_none());
        cache.constants_mut().depth_range = [0.0, 1.0, 1.0, 0.0];
        assert!(cache.take_dirty_constants().is_some());
    }

    #[test]
    fn serials_are_unique_and_nonzero() {
        let a = issue_serial();
        let b = issue_serial();
        assert_ne!(a, 0);
        assert!(b > a);
    }
}
