//! Framebuffer clears.
//!
//! Unmasked, unscissored clears go straight to the device clear calls. Anything the device
//! clears cannot express (color write masks over present channels, partial stencil write
//! masks, scissor rectangles smaller than the target) draws a quad instead.

use aero_gles_formats::{ChannelBits, InternalFormat};
use tracing::debug;

use crate::device::{
    BindFlags, BlendDesc, BufferDesc, BufferHandle, BuiltinProgram, ClearFlags, ColorWriteMask,
    ComparisonFunc, CullMode, DepthStencilDesc, PositionDepthColorVertex, PrimitiveTopology, Program,
    RasterizerDesc, StencilFaceDesc, StencilOp, ViewHandle, Viewport,
};
use crate::error::RendererError;
use crate::framebuffer::Framebuffer;
use crate::render_target::RenderTarget;
use crate::state::{ClearMask, ClearParameters};

use super::Renderer;

/// Channel sizes of the format the target is stored in.
fn stored_channels(target: &RenderTarget) -> ChannelBits {
    InternalFormat::from_dxgi(target.actual_format())
        .unwrap_or_else(|| target.internal_format())
        .channel_bits()
}

fn masks_present_channel(params: &ClearParameters, bits: &ChannelBits) -> bool {
    let red = bits.red + bits.luminance;
    let green = bits.green + bits.luminance;
    let blue = bits.blue + bits.luminance;
    (!params.color_mask_red && red > 0)
        || (!params.color_mask_green && green > 0)
        || (!params.color_mask_blue && blue > 0)
        || (!params.color_mask_alpha && bits.alpha > 0)
}

/// Clear color for a target: channels the application format lacks read as 0, and alpha as
/// 1, exactly as sampling the texture would.
fn clear_color_for(format: InternalFormat, color: [f32; 4]) -> [f32; 4] {
    let bits = format.channel_bits();
    let pick = |present: bool, value: f32, absent: f32| if present { value } else { absent };
    [
        pick(bits.red > 0 || bits.luminance > 0, color[0], 0.0),
        pick(bits.green > 0 || bits.luminance > 0, color[1], 0.0),
        pick(bits.blue > 0 || bits.luminance > 0, color[2], 0.0),
        pick(bits.alpha > 0, color[3], 1.0),
    ]
}

fn clear_quad(color: [f32; 4], depth: f32) -> [PositionDepthColorVertex; 4] {
    let [r, g, b, a] = color;
    let vertex = |x: f32, y: f32| PositionDepthColorVertex { x, y, z: depth, r, g, b, a };
    [vertex(-1.0, 1.0), vertex(-1.0, -1.0), vertex(1.0, 1.0), vertex(1.0, -1.0)]
}

impl Renderer {
    /// Clears the buffers of `framebuffer` selected by `params.mask`.
    pub fn clear(&mut self, params: &ClearParameters, framebuffer: &Framebuffer) -> Result<(), RendererError> {
        if !self.apply_render_target(framebuffer)? {
            return Ok(());
        }
        let Some(desc) = self.cache.render_target_desc() else {
            return Ok(());
        };

        let need_masked_color = params.mask.contains(ClearMask::COLOR)
            && framebuffer
                .color_attachments()
                .any(|(_, target)| masks_present_channel(params, &stored_channels(target)));
        let stencil_size = self.cache.stencil_size();
        let unmasked_stencil = 1u32.checked_shl(stencil_size).map_or(u32::MAX, |v| v - 1);
        let need_masked_stencil = params.mask.contains(ClearMask::STENCIL)
            && stencil_size > 0
            && (params.stencil_write_mask & unmasked_stencil) != unmasked_stencil;
        let need_scissored = params
            .scissor
            .is_some_and(|scissor| !scissor.covers(desc.width, desc.height));

        if need_masked_color || need_masked_stencil || need_scissored {
            debug!(
                need_masked_color,
                need_masked_stencil, need_scissored, "clearing with a quad"
            );
            self.masked_clear(params, framebuffer, (desc.width, desc.height))
        } else {
            self.direct_clear(params, framebuffer)
        }
    }

    fn direct_clear(&mut self, params: &ClearParameters, framebuffer: &Framebuffer) -> Result<(), RendererError> {
        let device = self.device_mut()?;
        if params.mask.contains(ClearMask::COLOR) {
            for (_, target) in framebuffer.color_attachments() {
                if let Some(view) = target.render_target_view() {
                    device.clear_render_target(&view, clear_color_for(target.internal_format(), params.color))?;
                }
            }
        }
        let mut flags = ClearFlags::empty();
        if params.mask.contains(ClearMask::DEPTH) {
            flags |= ClearFlags::DEPTH;
        }
        if params.mask.contains(ClearMask::STENCIL) {
            flags |= ClearFlags::STENCIL;
        }
        if let (false, Some(view)) = (
            flags.is_empty(),
            framebuffer.depth_stencil().and_then(RenderTarget::depth_stencil_view),
        ) {
            device.clear_depth_stencil(
                &view,
                flags,
                params.depth.clamp(0.0, 1.0),
                (params.stencil & 0xFF) as u8,
            )?;
        }
        self.stats.inc_direct_clears();
        Ok(())
    }

    fn clear_vertex_buffer(&mut self) -> Result<BufferHandle, RendererError> {
        let device = self.device_mut()?;
        let device_id = device.device_id();
        if let Some(buffer) = self.clear_vb.as_ref().filter(|vb| vb.device_id() == device_id) {
            return Ok(buffer.clone());
        }
        let buffer = self.device_mut()?.create_buffer(&BufferDesc {
            size: 4 * BuiltinProgram::ClearSingle.vertex_stride(),
            bind: BindFlags::VERTEX_BUFFER,
        })?;
        self.clear_vb = Some(buffer.clone());
        Ok(buffer)
    }

    fn masked_clear(
        &mut self,
        params: &ClearParameters,
        framebuffer: &Framebuffer,
        (width, height): (u32, u32),
    ) -> Result<(), RendererError> {
        let clear_color = params.mask.contains(ClearMask::COLOR);
        let clear_depth = params.mask.contains(ClearMask::DEPTH);
        let clear_stencil = params.mask.contains(ClearMask::STENCIL);

        let colors: Vec<Option<ViewHandle>> = framebuffer
            .color_attachments()
            .map(|(_, target)| target.render_target_view())
            .collect();
        let depth_stencil = if clear_depth || clear_stencil {
            framebuffer.depth_stencil().and_then(RenderTarget::depth_stencil_view)
        } else {
            None
        };
        let program = if colors.len() > 1 {
            BuiltinProgram::ClearMultiple
        } else {
            BuiltinProgram::ClearSingle
        };

        let blend = BlendDesc {
            write_mask: if clear_color {
                params.color_write_mask()
            } else {
                ColorWriteMask::empty()
            },
            ..BlendDesc::default()
        };
        let always_replace = StencilFaceDesc {
            fail_op: StencilOp::Replace,
            depth_fail_op: StencilOp::Replace,
            pass_op: StencilOp::Replace,
            func: ComparisonFunc::Always,
        };
        let depth_stencil_state = DepthStencilDesc {
            depth_enable: clear_depth,
            depth_write: clear_depth,
            depth_func: ComparisonFunc::Always,
            stencil_enable: clear_stencil,
            stencil_read_mask: 0xFF,
            stencil_write_mask: (params.stencil_write_mask & 0xFF) as u8,
            front: always_replace,
            back: always_replace,
        };
        let rasterizer = RasterizerDesc {
            cull_mode: CullMode::None,
            depth_clip_enable: false,
            scissor_enable: params.scissor.is_some(),
            ..RasterizerDesc::default()
        };
        let vertices = clear_quad(params.color, params.depth.clamp(0.0, 1.0));
        let vertex_buffer = self.clear_vertex_buffer()?;

        let device = self.device_mut()?;
        device.write_buffer(&vertex_buffer, 0, bytemuck::cast_slice(&vertices))?;
        device.set_blend_state(&blend, [1.0; 4], u32::MAX);
        device.set_depth_stencil_state(&depth_stencil_state, (params.stencil & 0xFF) as u32);
        device.set_rasterizer_state(&rasterizer);
        if let Some(scissor) = params.scissor {
            device.set_scissor_rect(&scissor.to_scissor_rect());
        }
        device.set_viewport(&Viewport::full(width, height));
        device.set_render_targets(&colors, depth_stencil.as_ref());
        device.set_vertex_buffer(Some(&vertex_buffer), program.vertex_stride(), 0);
        device.set_primitive_topology(PrimitiveTopology::TriangleStrip);
        device.set_program(Some(Program::Builtin(program)));
        let drawn = device.draw(4, 0);

        self.mark_all_state_dirty();
        drawn?;
        self.stats.inc_masked_clears();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::device::soft::SoftwareDeviceOptions;
    use crate::renderer::tests::{read_back, soft_renderer};
    use crate::state::Rectangle;

    fn color_framebuffer(renderer: &mut Renderer, format: InternalFormat) -> (Framebuffer, RenderTarget) {
        let target = renderer.create_renderbuffer(4, 2, format, 0).unwrap().unwrap();
        let mut framebuffer = Framebuffer::new();
        framebuffer.set_color_attachment(0, Some(target.clone())).unwrap();
        (framebuffer, target)
    }

    fn color_clear(color: [f32; 4]) -> ClearParameters {
        ClearParameters {
            mask: ClearMask::COLOR,
            color,
            ..ClearParameters::default()
        }
    }

    #[test]
    fn plain_color_clears_use_the_device_clear() {
        let (mut renderer, probe) = soft_renderer(SoftwareDeviceOptions::default());
        let (framebuffer, target) = color_framebuffer(&mut renderer, InternalFormat::Rgba8);
        renderer.clear(&color_clear([1.0, 0.0, 0.0, 1.0]), &framebuffer).unwrap();

        assert_eq!(probe.counts().clear_render_target, 1);
        assert_eq!(renderer.stats().snapshot().direct_clears, 1);
        let mapped = read_back(&mut renderer, &target);
        assert_eq!(&mapped.data[..4], &[255, 0, 0, 255]);
    }

    #[test]
    fn formats_without_alpha_clear_alpha_to_one() {
        assert_eq!(
            clear_color_for(InternalFormat::Rgb8, [0.5, 0.5, 0.5, 0.0]),
            [0.5, 0.5, 0.5, 1.0]
        );
        assert_eq!(
            clear_color_for(InternalFormat::Alpha8, [0.5, 0.5, 0.5, 0.25]),
            [0.0, 0.0, 0.0, 0.25]
        );
    }

    #[test]
    fn masked_channels_are_preserved_by_the_quad_clear() {
        let (mut renderer, probe) = soft_renderer(SoftwareDeviceOptions::default());
        let (framebuffer, target) = color_framebuffer(&mut renderer, InternalFormat::Rgba8);
        renderer.clear(&color_clear([0.0, 0.0, 1.0, 1.0]), &framebuffer).unwrap();

        let params = ClearParameters {
            color_mask_blue: false,
            ..color_clear([1.0, 1.0, 0.0, 1.0])
        };
        renderer.clear(&params, &framebuffer).unwrap();
        assert_eq!(renderer.stats().snapshot().masked_clears, 1);
        assert_eq!(probe.counts().clear_render_target, 1);

        let mapped = read_back(&mut renderer, &target);
        assert_eq!(&mapped.data[..4], &[255, 255, 255, 255]);
    }

    #[test]
    fn masking_an_absent_channel_still_clears_directly() {
        let (mut renderer, _) = soft_renderer(SoftwareDeviceOptions::default());
        let (framebuffer, _) = color_framebuffer(&mut renderer, InternalFormat::R8);
        let params = ClearParameters {
            color_mask_green: false,
            color_mask_alpha: false,
            ..color_clear([0.0; 4])
        };
        renderer.clear(&params, &framebuffer).unwrap();
        assert_eq!(renderer.stats().snapshot().masked_clears, 0);
    }

    #[test]
    fn partial_scissors_clear_only_the_rectangle() {
        let (mut renderer, _) = soft_renderer(SoftwareDeviceOptions::default());
        let (framebuffer, target) = color_framebuffer(&mut renderer, InternalFormat::Rgba8);
        let params = ClearParameters {
            scissor: Some(Rectangle::new(0, 0, 2, 2)),
            ..color_clear([0.0, 1.0, 0.0, 1.0])
        };
        renderer.clear(&params, &framebuffer).unwrap();
        assert_eq!(renderer.stats().snapshot().masked_clears, 1);

        let mapped = read_back(&mut renderer, &target);
        assert_eq!(&mapped.data[..8], &[0, 255, 0, 255, 0, 255, 0, 255]);
        assert_eq!(&mapped.data[8..16], &[0; 8]);

        let covering = ClearParameters {
            scissor: Some(Rectangle::new(-1, -1, 10, 10)),
            ..params
        };
        renderer.clear(&covering, &framebuffer).unwrap();
        assert_eq!(renderer.stats().snapshot().direct_clears, 1);
    }

    #[test]
    fn partial_stencil_write_masks_draw_a_quad() {
        let (mut renderer, probe) = soft_renderer(SoftwareDeviceOptions::default());
        let depth = renderer
            .create_renderbuffer(4, 2, InternalFormat::Depth24Stencil8, 0)
            .unwrap();
        let (mut framebuffer, _) = color_framebuffer(&mut renderer, InternalFormat::Rgba8);
        framebuffer.set_depth_stencil_attachment(depth).unwrap();

        let full = ClearParameters {
            mask: ClearMask::DEPTH | ClearMask::STENCIL,
            stencil: 3,
            ..ClearParameters::default()
        };
        renderer.clear(&full, &framebuffer).unwrap();
        assert_eq!(probe.counts().clear_depth_stencil, 1);

        let partial = ClearParameters {
            stencil_write_mask: 0x0F,
            ..full
        };
        renderer.clear(&partial, &framebuffer).unwrap();
        assert_eq!(probe.counts().clear_depth_stencil, 1);
        assert_eq!(renderer.stats().snapshot().masked_clears, 1);
    }

    #[test]
    fn masked_clears_leave_every_binding_dirty() {
        let (mut renderer, probe) = soft_renderer(SoftwareDeviceOptions::default());
        let (framebuffer, _) = color_framebuffer(&mut renderer, InternalFormat::Rgba8);
        let params = ClearParameters {
            color_mask_alpha: false,
            ..color_clear([1.0; 4])
        };
        renderer.clear(&params, &framebuffer).unwrap();
        renderer.clear(&params, &framebuffer).unwrap();
        // Each clear rebinds the framebuffer: once for the clear itself, once by the quad.
        assert_eq!(probe.counts().render_targets, 4);
    }
}
