//! Diffed application of pipeline state, render targets, topology and programs.

use tracing::{trace, warn};

use crate::caps::{MAX_DRAW_BUFFERS, MAX_TEXTURE_IMAGE_UNITS};
use crate::device::{Program, ShaderStage, ViewHandle, Viewport};
use crate::error::RendererError;
use crate::framebuffer::Framebuffer;
use crate::state::{
    to_blend_desc, to_depth_stencil_desc, to_rasterizer_desc, to_sampler_desc, BlendState,
    DepthStencilState, FrontFace, RasterizerState, Rectangle, SamplerState,
};
use crate::state_cache::{
    AppliedBlend, AppliedDepthStencil, AppliedRenderTargets, AppliedViewport, ForceFlags,
    RenderTargetDesc, StateCache,
};
use crate::texture_storage::TextureStorage;
use crate::topology::PrimitiveMode;

use super::{live_device, Renderer};

/// Identity of a bound view across devices. Never 0.
pub(super) fn view_identity(view: &ViewHandle) -> u64 {
    (view.device_id() << 32) | u64::from(view.id())
}

impl Renderer {
    fn note_skipped(&self, what: &'static str) {
        trace!(state = what, "redundant bind skipped");
        self.stats.inc_state_binds_skipped();
    }

    fn check_sampler_slot(&self, stage: ShaderStage, slot: u32) -> Result<(), RendererError> {
        let units = match stage {
            ShaderStage::Pixel => MAX_TEXTURE_IMAGE_UNITS,
            ShaderStage::Vertex => self.limits.max_vertex_texture_image_units,
        };
        if slot >= units {
            return Err(RendererError::InvalidValue(format!(
                "{stage:?} sampler {slot} is not below {units}"
            )));
        }
        Ok(())
    }

    /// Binds the sampler of `slot`. `top_level` is the storage's physical base level, which
    /// shifts the sampled level range.
    pub fn set_sampler_state(
        &mut self,
        stage: ShaderStage,
        slot: u32,
        state: &SamplerState,
        top_level: u32,
    ) -> Result<(), RendererError> {
        self.check_sampler_slot(stage, slot)?;
        let state = SamplerState {
            lod_offset: state.lod_offset + top_level,
            ..*state
        };
        let device = live_device(&mut self.device, self.device_lost)?;
        if self.cache.stage(stage).sampler_current(slot, &state) {
            self.note_skipped("sampler");
            return Ok(());
        }
        let desc = to_sampler_desc(&state, self.limits.max_anisotropy);
        device.set_sampler(stage, slot, Some(&desc));
        self.cache.stage_mut(stage).record_sampler(slot, state);
        self.stats.inc_state_binds();
        Ok(())
    }

    /// Binds the shader resource view of `texture` to `slot`, or unbinds the slot.
    pub fn set_texture(
        &mut self,
        stage: ShaderStage,
        slot: u32,
        texture: Option<&mut TextureStorage>,
        mipmapped: bool,
    ) -> Result<(), RendererError> {
        self.check_sampler_slot(stage, slot)?;
        let view = match texture {
            Some(storage) => storage.shader_resource_view(self, mipmapped)?,
            None => None,
        };
        self.set_shader_resource(stage, slot, view.as_ref())
    }

    pub(crate) fn set_shader_resource(
        &mut self,
        stage: ShaderStage,
        slot: u32,
        view: Option<&ViewHandle>,
    ) -> Result<(), RendererError> {
        let identity = view.map_or(0, view_identity);
        let device = live_device(&mut self.device, self.device_lost)?;
        if identity != 0 && self.cache.stage(stage).texture_serial(slot) == identity {
            self.note_skipped("texture");
            return Ok(());
        }
        device.set_shader_resource(stage, slot, view);
        self.cache.stage_mut(stage).record_texture(slot, identity);
        self.stats.inc_state_binds();
        Ok(())
    }

    pub fn set_rasterizer_state(&mut self, state: &RasterizerState) -> Result<(), RendererError> {
        let device = live_device(&mut self.device, self.device_lost)?;
        if self.cache.rasterizer_current(state) {
            self.note_skipped("rasterizer");
            return Ok(());
        }
        device.set_rasterizer_state(&to_rasterizer_desc(state, self.cache.scissor_enabled()));
        self.cache.record_rasterizer(*state);
        self.stats.inc_state_binds();
        Ok(())
    }

    pub fn set_blend_state(
        &mut self,
        state: &BlendState,
        blend_color: [f32; 4],
        sample_mask: u32,
    ) -> Result<(), RendererError> {
        let applied = AppliedBlend {
            state: *state,
            color: blend_color,
            sample_mask,
        };
        let device = live_device(&mut self.device, self.device_lost)?;
        if self.cache.blend_current(&applied) {
            self.note_skipped("blend");
            return Ok(());
        }
        device.set_blend_state(
            &to_blend_desc(state),
            state.device_blend_factor(blend_color),
            sample_mask,
        );
        self.cache.record_blend(applied);
        self.stats.inc_state_binds();
        Ok(())
    }

    /// Binds depth-stencil state. The device has one reference value, read mask and write
    /// mask for both faces, so front and back must agree on them.
    pub fn set_depth_stencil_state(
        &mut self,
        state: &DepthStencilState,
        stencil_ref: i32,
        stencil_back_ref: i32,
    ) -> Result<(), RendererError> {
        if stencil_ref != stencil_back_ref
            || state.stencil_mask != state.stencil_back_mask
            || state.stencil_writemask != state.stencil_back_writemask
        {
            return Err(RendererError::InvalidOperation(
                "separate front and back stencil reference, mask or writemask".to_owned(),
            ));
        }
        let applied = AppliedDepthStencil {
            state: *state,
            stencil_ref,
            stencil_back_ref,
        };
        let device = live_device(&mut self.device, self.device_lost)?;
        if self.cache.depth_stencil_current(&applied) {
            self.note_skipped("depth_stencil");
            return Ok(());
        }
        device.set_depth_stencil_state(&to_depth_stencil_desc(state), stencil_ref.clamp(0, 0xFF) as u32);
        self.cache.record_depth_stencil(applied);
        self.stats.inc_state_binds();
        Ok(())
    }

    /// Records the scissor; the device rectangle is only set while the test is enabled.
    pub fn set_scissor_rectangle(&mut self, scissor: &Rectangle, enabled: bool) -> Result<(), RendererError> {
        let device = live_device(&mut self.device, self.device_lost)?;
        if self.cache.scissor_current(scissor, enabled) {
            self.note_skipped("scissor");
            return Ok(());
        }
        if enabled {
            device.set_scissor_rect(&scissor.to_scissor_rect());
        }
        self.cache.record_scissor(*scissor, enabled);
        self.stats.inc_state_binds();
        Ok(())
    }

    /// Applies the viewport and the driver constants derived from it. Returns `false` when
    /// the clamped viewport is empty and nothing can be drawn.
    ///
    /// With `ignore_viewport` the viewport spans the whole bound render target at depth 0..1.
    pub fn set_viewport(
        &mut self,
        viewport: &Rectangle,
        z_near: f32,
        z_far: f32,
        front_face: FrontFace,
        ignore_viewport: bool,
    ) -> Result<bool, RendererError> {
        let (viewport, z_near, z_far) = if ignore_viewport {
            let desc = self.cache.render_target_desc().ok_or_else(|| {
                RendererError::InvalidOperation("viewport applied before a render target".to_owned())
            })?;
            (
                Rectangle::new(0, 0, desc.width as i32, desc.height as i32),
                0.0,
                1.0,
            )
        } else {
            (*viewport, z_near.clamp(0.0, 1.0), z_far.clamp(0.0, 1.0))
        };

        let (bound_min, bound_max) = self.limits.viewport_bounds;
        let max_dimension = self.limits.max_viewport_dimension.min(i32::MAX as u32) as i32;
        let x = viewport.x.clamp(bound_min, bound_max);
        let y = viewport.y.clamp(bound_min, bound_max);
        let width = viewport.width.clamp(0, max_dimension).min(bound_max - x);
        let height = viewport.height.clamp(0, max_dimension).min(bound_max - y);
        if width <= 0 || height <= 0 {
            return Ok(false);
        }

        let device = live_device(&mut self.device, self.device_lost)?;
        let applied = AppliedViewport {
            viewport,
            z_near,
            z_far,
        };
        if self.cache.viewport_current(&applied) {
            self.note_skipped("viewport");
        } else {
            device.set_viewport(&Viewport {
                x: x as f32,
                y: y as f32,
                width: width as f32,
                height: height as f32,
                min_depth: z_near,
                max_depth: z_far,
            });
            self.cache.record_viewport(applied);
            self.stats.inc_state_binds();

            let (w, h) = (viewport.width as f32, viewport.height as f32);
            let constants = self.cache.constants_mut();
            constants.view_coords = [
                w * 0.5,
                h * 0.5,
                viewport.x as f32 + w * 0.5,
                viewport.y as f32 + h * 0.5,
            ];
            constants.depth_front[0] = (z_far - z_near) * 0.5;
            constants.depth_front[1] = (z_near + z_far) * 0.5;
            constants.depth_range = [z_near, z_far, z_far - z_near, 0.0];
        }
        self.cache.constants_mut().depth_front[2] = match front_face {
            FrontFace::Ccw => 1.0,
            FrontFace::Cw => -1.0,
        };
        Ok(true)
    }

    /// Sets the device topology for `mode`. Returns `false` when `count` is below the
    /// minimum vertex count of the mode.
    pub fn apply_primitive_type(&mut self, mode: PrimitiveMode, count: u32) -> Result<bool, RendererError> {
        let (topology, min_count) = mode.topology();
        let device = live_device(&mut self.device, self.device_lost)?;
        if topology != self.cache.topology() {
            device.set_primitive_topology(topology);
            self.cache.record_topology(topology);
        }
        Ok(count >= min_count)
    }

    /// Binds the attachments of `framebuffer`. Returns `false` without touching the device
    /// when an attachment has no pixels.
    pub fn apply_render_target(&mut self, framebuffer: &Framebuffer) -> Result<bool, RendererError> {
        let mut applied = AppliedRenderTargets::default();
        let mut views: Vec<Option<ViewHandle>> = vec![None; MAX_DRAW_BUFFERS];
        let mut desc = None;
        for (index, target) in framebuffer.color_attachments() {
            if target.width() == 0 || target.height() == 0 {
                return Ok(false);
            }
            let view = target.render_target_view().ok_or_else(|| {
                RendererError::InvalidOperation(format!("color attachment {index} has no render target view"))
            })?;
            applied.color[index] = target.serial();
            views[index] = Some(view);
            desc.get_or_insert(RenderTargetDesc {
                width: target.width(),
                height: target.height(),
                format: target.internal_format(),
            });
        }
        let last_bound = views.iter().rposition(Option::is_some).map_or(0, |i| i + 1);
        views.truncate(last_bound);

        let (depth_stencil_view, depth_size, stencil_size) = match framebuffer.depth_stencil() {
            Some(target) => {
                if target.width() == 0 || target.height() == 0 {
                    return Ok(false);
                }
                let view = target.depth_stencil_view().ok_or_else(|| {
                    RendererError::InvalidOperation("depth attachment has no depth-stencil view".to_owned())
                })?;
                applied.depth_stencil = target.serial();
                let bits = target.internal_format().channel_bits();
                desc.get_or_insert(RenderTargetDesc {
                    width: target.width(),
                    height: target.height(),
                    format: target.internal_format(),
                });
                (Some(view), bits.depth, bits.stencil)
            }
            None => (None, 0, 0),
        };
        let Some(desc) = desc else {
            warn!("framebuffer has no attachments");
            return Ok(false);
        };

        let device = live_device(&mut self.device, self.device_lost)?;
        if self.cache.render_targets_current(&applied) {
            self.note_skipped("render_targets");
            return Ok(true);
        }
        device.set_render_targets(&views, depth_stencil_view.as_ref());
        self.cache.record_render_targets(applied, desc, depth_size, stencil_size);
        // Blend state is per render target on the device.
        self.cache.force(ForceFlags::BLEND);
        self.stats.inc_state_binds();
        Ok(true)
    }

    /// Binds `view` alone as the color target for a helper pass, or unbinds all targets.
    /// The next `apply_render_target` rebinds the framebuffer.
    pub fn set_one_time_render_target(&mut self, view: Option<&ViewHandle>) {
        if let Ok(device) = live_device(&mut self.device, self.device_lost) {
            device.set_render_targets(&[view.cloned()], None);
        }
        self.cache.invalidate_render_targets();
    }

    pub fn unapply_render_targets(&mut self) {
        self.set_one_time_render_target(None);
    }

    /// Forgets everything the cache knows; the next application of each state reaches the
    /// device.
    pub fn mark_all_state_dirty(&mut self) {
        self.cache.mark_all_dirty();
    }

    /// Binds `program` and uploads the driver constants when they changed.
    pub fn apply_shaders(&mut self, program: Program) -> Result<(), RendererError> {
        let device = live_device(&mut self.device, self.device_lost)?;
        if self.cache.program() != Some(program) {
            device.set_program(Some(program));
            self.cache.record_program(Some(program));
        }
        if let Some(constants) = self.cache.take_dirty_constants() {
            let bytes = bytemuck::bytes_of(&constants);
            device.set_constant_buffer(ShaderStage::Vertex, bytes);
            device.set_constant_buffer(ShaderStage::Pixel, bytes);
        }
        Ok(())
    }

    pub fn state_cache(&self) -> &StateCache {
        &self.cache
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use aero_gles_formats::InternalFormat;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::device::soft::SoftwareDeviceOptions;
    use crate::render_target::RenderTarget;
    use crate::renderer::tests::soft_renderer;
    use crate::state::{BlendFactor, ClearMask, ClearParameters, CullFace, MinFilter};
    use crate::swap_chain::{lock_swap_chain, SharedSwapChain};
    use crate::topology::PrimitiveMode;

    fn framebuffer(renderer: &mut Renderer, width: u32, height: u32) -> Framebuffer {
        let color = renderer
            .create_renderbuffer(width, height, InternalFormat::Rgba8, 0)
            .unwrap()
            .unwrap();
        let mut framebuffer = Framebuffer::new();
        framebuffer.set_color_attachment(0, Some(color)).unwrap();
        framebuffer
    }

    #[test]
    fn identical_blend_state_reaches_the_device_once() {
        let (mut renderer, probe) = soft_renderer(SoftwareDeviceOptions::default());
        let state = BlendState::default();
        renderer.set_blend_state(&state, [0.0; 4], u32::MAX).unwrap();
        renderer.set_blend_state(&state, [0.0; 4], u32::MAX).unwrap();
        assert_eq!(probe.counts().blend_state, 1);

        let state = BlendState {
            blend: true,
            source_blend_rgb: BlendFactor::SrcAlpha,
            ..state
        };
        renderer.set_blend_state(&state, [0.0; 4], u32::MAX).unwrap();
        assert_eq!(probe.counts().blend_state, 2);
        assert_eq!(renderer.stats().snapshot().state_binds_skipped, 1);
    }

    #[test]
    fn marking_dirty_reapplies_unchanged_state() {
        let (mut renderer, probe) = soft_renderer(SoftwareDeviceOptions::default());
        let state = RasterizerState::default();
        renderer.set_rasterizer_state(&state).unwrap();
        renderer.set_rasterizer_state(&state).unwrap();
        assert_eq!(probe.counts().rasterizer_state, 1);

        renderer.mark_all_state_dirty();
        renderer.set_rasterizer_state(&state).unwrap();
        assert_eq!(probe.counts().rasterizer_state, 2);
    }

    #[test]
    fn enabling_the_scissor_test_rebinds_the_rasterizer() {
        let (mut renderer, probe) = soft_renderer(SoftwareDeviceOptions::default());
        let rasterizer = RasterizerState {
            cull_face: true,
            cull_mode: CullFace::Back,
            ..RasterizerState::default()
        };
        let rect = Rectangle::new(1, 1, 4, 4);
        renderer.set_scissor_rectangle(&rect, false).unwrap();
        renderer.set_rasterizer_state(&rasterizer).unwrap();
        assert_eq!(probe.counts().scissor_rect, 0);

        renderer.set_scissor_rectangle(&rect, true).unwrap();
        renderer.set_rasterizer_state(&rasterizer).unwrap();
        assert_eq!(probe.counts().scissor_rect, 1);
        assert_eq!(probe.counts().rasterizer_state, 2);
    }

    #[test]
    fn separate_stencil_references_are_rejected() {
        let (mut renderer, probe) = soft_renderer(SoftwareDeviceOptions::default());
        let state = DepthStencilState::default();
        assert!(matches!(
            renderer.set_depth_stencil_state(&state, 1, 2),
            Err(RendererError::InvalidOperation(_))
        ));
        let state = DepthStencilState {
            stencil_back_writemask: 0x0F,
            ..DepthStencilState::default()
        };
        assert!(renderer.set_depth_stencil_state(&state, 0, 0).is_err());
        assert_eq!(probe.counts().depth_stencil_state, 0);

        renderer
            .set_depth_stencil_state(&DepthStencilState::default(), 300, 300)
            .unwrap();
        assert_eq!(probe.counts().depth_stencil_state, 1);
    }

    #[test]
    fn sampler_slots_are_bounded_and_diffed_per_stage() {
        let (mut renderer, probe) = soft_renderer(SoftwareDeviceOptions::default());
        let sampler = SamplerState {
            min_filter: MinFilter::Linear,
            ..SamplerState::default()
        };
        renderer.set_sampler_state(ShaderStage::Pixel, 3, &sampler, 0).unwrap();
        renderer.set_sampler_state(ShaderStage::Pixel, 3, &sampler, 0).unwrap();
        renderer.set_sampler_state(ShaderStage::Pixel, 3, &sampler, 1).unwrap();
        assert_eq!(probe.counts().sampler, 2);
        assert!(matches!(
            renderer.set_sampler_state(ShaderStage::Pixel, MAX_TEXTURE_IMAGE_UNITS, &sampler, 0),
            Err(RendererError::InvalidValue(_))
        ));
    }

    #[test]
    fn textures_rebind_only_when_the_view_changes() {
        let (mut renderer, probe) = soft_renderer(SoftwareDeviceOptions::default());
        let mut storage = renderer.create_texture_storage_2d(InternalFormat::Rgba8, false, 4, 4, 1);
        renderer
            .set_texture(ShaderStage::Pixel, 0, Some(storage.storage_mut()), false)
            .unwrap();
        renderer
            .set_texture(ShaderStage::Pixel, 0, Some(storage.storage_mut()), false)
            .unwrap();
        assert_eq!(probe.counts().shader_resource, 1);

        renderer.set_texture(ShaderStage::Pixel, 0, None, false).unwrap();
        assert_eq!(probe.counts().shader_resource, 2);
    }

    #[test]
    fn viewport_updates_driver_constants() {
        let (mut renderer, probe) = soft_renderer(SoftwareDeviceOptions::default());
        let framebuffer = framebuffer(&mut renderer, 16, 8);
        assert!(renderer.apply_render_target(&framebuffer).unwrap());
        assert!(renderer
            .set_viewport(&Rectangle::new(2, 2, 8, 4), 0.25, 2.0, FrontFace::Ccw, false)
            .unwrap());
        let constants = *renderer.state_cache().constants();
        assert_eq!(constants.view_coords, [4.0, 2.0, 6.0, 4.0]);
        assert_eq!(constants.depth_range, [0.25, 1.0, 0.75, 0.0]);
        assert_eq!(constants.depth_front, [0.375, 0.625, 1.0, 0.0]);

        assert!(renderer
            .set_viewport(&Rectangle::new(2, 2, 8, 4), 0.25, 2.0, FrontFace::Ccw, false)
            .unwrap());
        assert_eq!(probe.counts().viewport, 1);

        assert!(renderer
            .set_viewport(&Rectangle::new(5, 5, 1, 1), 0.5, 0.5, FrontFace::Cw, true)
            .unwrap());
        assert_eq!(renderer.state_cache().constants().view_coords, [8.0, 4.0, 8.0, 4.0]);
        assert_eq!(renderer.state_cache().constants().depth_front[2], -1.0);
    }

    #[test]
    fn empty_viewports_draw_nothing() {
        let (mut renderer, probe) = soft_renderer(SoftwareDeviceOptions::default());
        assert!(!renderer
            .set_viewport(&Rectangle::new(0, 0, 0, 16), 0.0, 1.0, FrontFace::Ccw, false)
            .unwrap());
        assert!(!renderer
            .set_viewport(&Rectangle::new(0, 0, -4, 16), 0.0, 1.0, FrontFace::Ccw, false)
            .unwrap());
        assert_eq!(probe.counts().viewport, 0);
    }

    #[test]
    fn render_targets_rebind_on_change_and_force_blend() {
        let (mut renderer, probe) = soft_renderer(SoftwareDeviceOptions::default());
        let first = framebuffer(&mut renderer, 8, 8);
        let second = framebuffer(&mut renderer, 4, 4);

        assert!(renderer.apply_render_target(&first).unwrap());
        assert!(renderer.apply_render_target(&first).unwrap());
        assert_eq!(probe.counts().render_targets, 1);
        assert_eq!(
            renderer.state_cache().render_target_desc().map(|d| (d.width, d.height)),
            Some((8, 8))
        );

        renderer.set_blend_state(&BlendState::default(), [0.0; 4], u32::MAX).unwrap();
        assert!(renderer.apply_render_target(&second).unwrap());
        renderer.set_blend_state(&BlendState::default(), [0.0; 4], u32::MAX).unwrap();
        assert_eq!(probe.counts().render_targets, 2);
        assert_eq!(probe.counts().blend_state, 2);
    }

    #[test]
    fn one_time_targets_invalidate_the_applied_framebuffer() {
        let (mut renderer, probe) = soft_renderer(SoftwareDeviceOptions::default());
        let framebuffer = framebuffer(&mut renderer, 8, 8);
        renderer.apply_render_target(&framebuffer).unwrap();
        renderer.unapply_render_targets();
        renderer.apply_render_target(&framebuffer).unwrap();
        assert_eq!(probe.counts().render_targets, 3);
    }

    #[test]
    fn depth_only_framebuffers_size_from_the_depth_buffer() {
        let (mut renderer, _) = soft_renderer(SoftwareDeviceOptions::default());
        let depth = renderer
            .create_renderbuffer(6, 3, InternalFormat::Depth24Stencil8, 0)
            .unwrap();
        let mut framebuffer = Framebuffer::new();
        framebuffer.set_depth_stencil_attachment(depth).unwrap();
        assert!(renderer.apply_render_target(&framebuffer).unwrap());
        let desc = renderer.state_cache().render_target_desc().unwrap();
        assert_eq!((desc.width, desc.height), (6, 3));
        assert_eq!(renderer.state_cache().stencil_size(), 8);
    }

    #[test]
    fn zero_sized_default_framebuffers_skip_the_draw() {
        let (mut renderer, probe) = soft_renderer(SoftwareDeviceOptions::default());
        let chain = renderer.create_swap_chain(None, InternalFormat::Bgra8, Some(InternalFormat::Depth24Stencil8));
        let chain: SharedSwapChain = Arc::new(Mutex::new(chain));
        lock_swap_chain(&chain).reset(&mut renderer, 0, 0, 1).unwrap();
        let before = probe.counts();

        let framebuffer = Framebuffer::for_swap_chain(&chain);
        assert_eq!(renderer.apply_render_target(&framebuffer), Ok(false));
        let params = ClearParameters {
            mask: ClearMask::COLOR | ClearMask::DEPTH | ClearMask::STENCIL,
            ..ClearParameters::default()
        };
        renderer.clear(&params, &framebuffer).unwrap();

        let mut depth_only = Framebuffer::new();
        depth_only
            .set_depth_stencil_attachment(Some(RenderTarget::swap_chain_depth(chain.clone())))
            .unwrap();
        assert_eq!(renderer.apply_render_target(&depth_only), Ok(false));
        renderer.clear(&params, &depth_only).unwrap();

        assert_eq!(probe.counts(), before);
        assert!(renderer.state_cache().render_target_desc().is_none());
    }

    #[test]
    fn topology_is_set_on_change_and_short_draws_are_refused() {
        let (mut renderer, probe) = soft_renderer(SoftwareDeviceOptions::default());
        assert!(renderer.apply_primitive_type(PrimitiveMode::Triangles, 3).unwrap());
        assert!(renderer.apply_primitive_type(PrimitiveMode::TriangleFan, 5).unwrap());
        assert!(!renderer.apply_primitive_type(PrimitiveMode::Lines, 1).unwrap());
        assert_eq!(probe.counts().primitive_topology, 2);
    }

    #[test]
    fn driver_constants_upload_once_per_change() {
        let (mut renderer, probe) = soft_renderer(SoftwareDeviceOptions::default());
        let program = Program::Executable { vertex: 1, pixel: 2 };
        renderer.apply_shaders(program).unwrap();
        renderer.apply_shaders(program).unwrap();
        let counts = probe.counts();
        assert_eq!(counts.program, 1);
        assert_eq!(counts.constant_buffer, 2);
    }

    #[test]
    fn lost_devices_refuse_state() {
        let (mut renderer, probe) = soft_renderer(SoftwareDeviceOptions::default());
        probe.remove_device(crate::device::DeviceRemovedReason::Hung);
        assert!(renderer.test_device_lost());
        assert_eq!(
            renderer.set_rasterizer_state(&RasterizerState::default()),
            Err(RendererError::DeviceLost)
        );
    }
}
