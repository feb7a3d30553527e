//! Texture copies, framebuffer blits and multisample resolves.
//!
//! Color copies draw a textured quad from a shader-resource view of the source into a one-time
//! render target of the destination, so they can convert between logical formats and stretch.
//! Blits between identically formatted, equally sized rectangles use the device region copy
//! instead; depth-stencil blits only support that path, and only for whole buffers.

use aero_gles_formats::{InternalFormat, PixelFormat};
use tracing::{debug, trace};

use crate::caps::FeatureLevel;
use crate::device::{
    BindFlags, BlendDesc, BufferDesc, BufferHandle, BuiltinProgram, CullMode, DepthStencilDesc,
    FilterMode, PositionTexCoordVertex, PrimitiveTopology, Program, RasterizerDesc, SamplerDesc,
    ShaderStage, SubresourceBox, TextureDesc, TextureHandle, ViewDesc, ViewHandle, Viewport,
};
use crate::error::RendererError;
use crate::framebuffer::Framebuffer;
use crate::render_target::RenderTarget;
use crate::state::Rectangle;
use crate::texture_storage::{TextureStorage2D, TextureStorageCube};

use super::Renderer;

/// A rectangle of a view together with the size of the level it addresses.
#[derive(Debug, Clone)]
pub struct TextureRegion {
    view: ViewHandle,
    area: Rectangle,
    width: u32,
    height: u32,
}

impl TextureRegion {
    pub fn new(view: &ViewHandle, area: Rectangle, width: u32, height: u32) -> Self {
        Self {
            view: view.clone(),
            area,
            width,
            height,
        }
    }

    /// All of a `width` x `height` level.
    pub fn whole(view: &ViewHandle, width: u32, height: u32) -> Self {
        Self::new(view, Rectangle::new(0, 0, width as i32, height as i32), width, height)
    }

    pub fn view(&self) -> &ViewHandle {
        &self.view
    }

    pub fn area(&self) -> Rectangle {
        self.area
    }

    fn in_bounds(&self) -> bool {
        area_in_bounds(self.area, self.width, self.height)
    }
}

/// Negative extents mirror a copy; bounds are checked on the covered pixels.
fn area_in_bounds(area: Rectangle, width: u32, height: u32) -> bool {
    let left = i64::from(area.x.min(area.x.saturating_add(area.width)));
    let top = i64::from(area.y.min(area.y.saturating_add(area.height)));
    let right = left + i64::from(area.width).abs();
    let bottom = top + i64::from(area.height).abs();
    left >= 0 && top >= 0 && right <= i64::from(width) && bottom <= i64::from(height)
}

fn copy_program(format: PixelFormat) -> Result<BuiltinProgram, RendererError> {
    match format {
        PixelFormat::Rgba | PixelFormat::Bgra | PixelFormat::Alpha | PixelFormat::Red | PixelFormat::Rg => {
            Ok(BuiltinProgram::CopyRgba)
        }
        PixelFormat::Rgb => Ok(BuiltinProgram::CopyRgb),
        PixelFormat::Luminance => Ok(BuiltinProgram::CopyLum),
        PixelFormat::LuminanceAlpha => Ok(BuiltinProgram::CopyLumAlpha),
        PixelFormat::DepthComponent | PixelFormat::DepthStencil => Err(RendererError::InvalidOperation(
            format!("{format:?} cannot be the destination of a draw copy"),
        )),
    }
}

/// Strip covering `dest.area` that samples `source.area`, rows kept in order.
fn copy_quad(source: &TextureRegion, dest: &TextureRegion) -> [PositionTexCoordVertex; 4] {
    let (sw, sh) = (source.width as f32, source.height as f32);
    let (dw, dh) = (dest.width as f32, dest.height as f32);
    let s = source.area;
    let d = dest.area;

    let x1 = (d.x as f32 / dw) * 2.0 - 1.0;
    let y1 = ((dh - d.y as f32 - d.height as f32) / dh) * 2.0 - 1.0;
    let x2 = ((d.x + d.width) as f32 / dw) * 2.0 - 1.0;
    let y2 = ((dh - d.y as f32) / dh) * 2.0 - 1.0;

    let u1 = s.x as f32 / sw;
    let v1 = s.y as f32 / sh;
    let u2 = (s.x + s.width) as f32 / sw;
    let v2 = (s.y + s.height) as f32 / sh;

    let vertex = |x: f32, y: f32, u: f32, v: f32| PositionTexCoordVertex { x, y, u, v };
    [
        vertex(x1, y1, u1, v2),
        vertex(x1, y2, u1, v1),
        vertex(x2, y1, u2, v2),
        vertex(x2, y2, u2, v1),
    ]
}

fn missing(what: &str) -> RendererError {
    RendererError::InvalidOperation(format!("framebuffer has no {what}"))
}

impl Renderer {
    fn copy_vertex_buffer(&mut self) -> Result<BufferHandle, RendererError> {
        let device_id = self.device_mut()?.device_id();
        if let Some(buffer) = self.copy_vb.as_ref().filter(|vb| vb.device_id() == device_id) {
            return Ok(buffer.clone());
        }
        let buffer = self.device_mut()?.create_buffer(&BufferDesc {
            size: 4 * BuiltinProgram::CopyRgba.vertex_stride(),
            bind: BindFlags::VERTEX_BUFFER,
        })?;
        self.copy_vb = Some(buffer.clone());
        Ok(buffer)
    }

    /// Draws `source` into `dest`, reshaping channels for a destination of `dest_format`.
    pub fn copy_texture(
        &mut self,
        source: TextureRegion,
        dest: TextureRegion,
        dest_format: PixelFormat,
    ) -> Result<(), RendererError> {
        if !source.in_bounds() || !dest.in_bounds() {
            return Err(RendererError::InvalidValue(format!(
                "copy of {:?} into {:?} leaves its level",
                source.area, dest.area
            )));
        }
        let program = copy_program(dest_format)?;
        let vertex_buffer = self.copy_vertex_buffer()?;
        let vertices = copy_quad(&source, &dest);
        let sampler = SamplerDesc {
            max_lod: if self.feature_level >= FeatureLevel::Level10_0 {
                0.0
            } else {
                f32::MAX
            },
            ..SamplerDesc::clamped(FilterMode::Linear)
        };
        let depth_stencil = DepthStencilDesc {
            depth_enable: false,
            depth_write: false,
            ..DepthStencilDesc::default()
        };
        let rasterizer = RasterizerDesc {
            cull_mode: CullMode::None,
            ..RasterizerDesc::default()
        };

        self.set_one_time_render_target(Some(&dest.view));
        let device = self.device_mut()?;
        device.write_buffer(&vertex_buffer, 0, bytemuck::cast_slice(&vertices))?;
        device.set_vertex_buffer(Some(&vertex_buffer), program.vertex_stride(), 0);
        device.set_blend_state(&BlendDesc::default(), [1.0; 4], u32::MAX);
        device.set_depth_stencil_state(&depth_stencil, 0);
        device.set_rasterizer_state(&rasterizer);
        device.set_primitive_topology(PrimitiveTopology::TriangleStrip);
        device.set_program(Some(Program::Builtin(program)));
        device.set_viewport(&Viewport::full(dest.width, dest.height));
        device.set_sampler(ShaderStage::Pixel, 0, Some(&sampler));
        device.set_shader_resource(ShaderStage::Pixel, 0, Some(&source.view));
        let drawn = device.draw(4, 0);
        device.set_shader_resource(ShaderStage::Pixel, 0, None);

        self.unapply_render_targets();
        self.mark_all_state_dirty();
        drawn?;
        trace!(?program, source = ?source.area, dest = ?dest.area, "quad copy");
        self.stats.inc_quad_copies();
        Ok(())
    }

    /// A single-sample copy of a multisampled subresource, or the subresource itself.
    pub fn resolve_multisampled_texture(
        &mut self,
        texture: &TextureHandle,
        subresource: u32,
    ) -> Result<(TextureHandle, u32), RendererError> {
        let device = self.device_mut()?;
        let desc = device.texture_desc(texture)?;
        if desc.sample_count <= 1 {
            return Ok((texture.clone(), subresource));
        }
        let (mip, _) = desc.split_subresource(subresource);
        let (width, height) = desc.mip_size(mip);
        let resolved = device
            .create_texture(&TextureDesc::new_2d(width, height, desc.format, desc.bind), None)
            .map_err(|err| RendererError::OutOfMemory(format!("failed to create a resolve texture: {err}")))?;
        device.resolve_subresource(&resolved, 0, texture, subresource, desc.format)?;
        debug!(width, height, samples = desc.sample_count, "resolved multisampled texture");
        Ok((resolved, 0))
    }

    /// A view the copy programs can sample `target` through.
    fn sampling_view(&mut self, target: &RenderTarget) -> Result<ViewHandle, RendererError> {
        if target.samples() == 0 {
            return target.shader_resource_view().ok_or_else(|| {
                RendererError::InvalidOperation(format!(
                    "{:?} buffers cannot be sampled",
                    target.internal_format()
                ))
            });
        }
        let texture = target.resource().ok_or_else(|| missing("color storage"))?;
        let (resolved, _) = self.resolve_multisampled_texture(&texture, target.subresource_index())?;
        let srv = InternalFormat::from_dxgi(target.actual_format())
            .unwrap_or_else(|| target.internal_format())
            .texture_format_info()
            .srv;
        Ok(self
            .device_mut()?
            .create_view(&resolved, &ViewDesc::shader_resource(srv, 0, 1))?)
    }

    fn copy_image_into(
        &mut self,
        framebuffer: &Framebuffer,
        source_rect: Rectangle,
        dest_format: PixelFormat,
        (xoffset, yoffset): (i32, i32),
        dest: RenderTarget,
    ) -> Result<(), RendererError> {
        let source = framebuffer
            .read_color_buffer()
            .ok_or_else(|| missing("read color buffer"))?;
        let source_view = self.sampling_view(source)?;
        let dest_view = dest.render_target_view().ok_or_else(|| {
            RendererError::InvalidOperation("copy destination is not color renderable".to_owned())
        })?;
        let dest_rect = Rectangle::new(xoffset, yoffset, source_rect.width, source_rect.height);
        self.copy_texture(
            TextureRegion::new(&source_view, source_rect, source.width(), source.height()),
            TextureRegion::new(&dest_view, dest_rect, dest.width(), dest.height()),
            dest_format,
        )
    }

    /// Copies `source_rect` of the framebuffer's read buffer to (`xoffset`, `yoffset`) of a
    /// 2D storage level.
    #[allow(clippy::too_many_arguments)]
    pub fn copy_image(
        &mut self,
        framebuffer: &Framebuffer,
        source_rect: Rectangle,
        dest_format: PixelFormat,
        xoffset: i32,
        yoffset: i32,
        storage: &mut TextureStorage2D,
        level: u32,
    ) -> Result<(), RendererError> {
        let dest = storage.get_render_target(self, level)?;
        self.copy_image_into(framebuffer, source_rect, dest_format, (xoffset, yoffset), dest)
    }

    /// Cube-face counterpart of [`Renderer::copy_image`].
    #[allow(clippy::too_many_arguments)]
    pub fn copy_image_cube(
        &mut self,
        framebuffer: &Framebuffer,
        source_rect: Rectangle,
        dest_format: PixelFormat,
        xoffset: i32,
        yoffset: i32,
        storage: &mut TextureStorageCube,
        face: u32,
        level: u32,
    ) -> Result<(), RendererError> {
        let dest = storage.get_render_target_face(self, face, level)?;
        self.copy_image_into(framebuffer, source_rect, dest_format, (xoffset, yoffset), dest)
    }

    /// Copies `read_rect` of `read` into `draw_rect` of every color attachment of `draw`
    /// and/or between their depth-stencil buffers.
    pub fn blit_rect(
        &mut self,
        read: &Framebuffer,
        read_rect: Rectangle,
        draw: &Framebuffer,
        draw_rect: Rectangle,
        blit_color: bool,
        blit_depth_stencil: bool,
    ) -> Result<(), RendererError> {
        if blit_color {
            let source = read
                .read_color_buffer()
                .ok_or_else(|| missing("read color buffer"))?;
            for (_, target) in draw.color_attachments() {
                self.blit_color(source, read_rect, target, draw_rect)?;
            }
        }
        if blit_depth_stencil {
            let source = read.depth_stencil().ok_or_else(|| missing("depth-stencil buffer to read"))?;
            let dest = draw.depth_stencil().ok_or_else(|| missing("depth-stencil buffer to draw"))?;
            self.blit_depth_stencil(source, read_rect, dest, draw_rect)?;
        }
        Ok(())
    }

    fn blit_color(
        &mut self,
        source: &RenderTarget,
        read_rect: Rectangle,
        dest: &RenderTarget,
        draw_rect: Rectangle,
    ) -> Result<(), RendererError> {
        let direct = read_rect.width == draw_rect.width
            && read_rect.height == draw_rect.height
            && read_rect.width > 0
            && read_rect.height > 0
            && source.actual_format() == dest.actual_format()
            && dest.samples() == 0
            && area_in_bounds(read_rect, source.width(), source.height())
            && area_in_bounds(draw_rect, dest.width(), dest.height());
        if direct {
            return self.copy_region(source, read_rect, dest, draw_rect, false);
        }

        let source_view = self.sampling_view(source)?;
        let dest_view = dest.render_target_view().ok_or_else(|| missing("color view"))?;
        self.copy_texture(
            TextureRegion::new(&source_view, read_rect, source.width(), source.height()),
            TextureRegion::new(&dest_view, draw_rect, dest.width(), dest.height()),
            dest.internal_format().base_format(),
        )
    }

    fn blit_depth_stencil(
        &mut self,
        source: &RenderTarget,
        read_rect: Rectangle,
        dest: &RenderTarget,
        draw_rect: Rectangle,
    ) -> Result<(), RendererError> {
        let whole = read_rect == draw_rect
            && read_rect == Rectangle::new(0, 0, source.width() as i32, source.height() as i32)
            && (source.width(), source.height()) == (dest.width(), dest.height());
        if !whole || source.actual_format() != dest.actual_format() {
            return Err(RendererError::Unimplemented(
                "partial or converting depth-stencil blits".to_owned(),
            ));
        }
        self.copy_region(source, read_rect, dest, draw_rect, true)
    }

    fn copy_region(
        &mut self,
        source: &RenderTarget,
        read_rect: Rectangle,
        dest: &RenderTarget,
        draw_rect: Rectangle,
        whole_buffer: bool,
    ) -> Result<(), RendererError> {
        let dest_texture = dest.resource().ok_or_else(|| missing("draw storage"))?;
        let source_texture = source.resource().ok_or_else(|| missing("read storage"))?;
        let (read_texture, read_subresource) =
            self.resolve_multisampled_texture(&source_texture, source.subresource_index())?;
        let read_box = (!whole_buffer).then(|| {
            SubresourceBox::new(
                read_rect.x as u32,
                read_rect.y as u32,
                (read_rect.x + read_rect.width) as u32,
                (read_rect.y + read_rect.height) as u32,
            )
        });
        self.device_mut()?.copy_subresource_region(
            &dest_texture,
            dest.subresource_index(),
            draw_rect.x as u32,
            draw_rect.y as u32,
            &read_texture,
            read_subresource,
            read_box,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::device::soft::SoftwareDeviceOptions;
    use crate::renderer::tests::{read_back, soft_renderer};
    use crate::state::{ClearMask, ClearParameters};

    fn filled(renderer: &mut Renderer, width: u32, height: u32, samples: u32, color: [f32; 4]) -> (Framebuffer, RenderTarget) {
        let target = renderer
            .create_renderbuffer(width, height, InternalFormat::Rgba8, samples)
            .unwrap()
            .unwrap();
        let mut framebuffer = Framebuffer::new();
        framebuffer.set_color_attachment(0, Some(target.clone())).unwrap();
        let params = ClearParameters {
            mask: ClearMask::COLOR,
            color,
            ..ClearParameters::default()
        };
        renderer.clear(&params, &framebuffer).unwrap();
        (framebuffer, target)
    }

    fn pixel(data: &[u8], row_pitch: u32, x: usize, y: usize) -> &[u8] {
        let start = y * row_pitch as usize + x * 4;
        &data[start..start + 4]
    }

    #[test]
    fn quad_copies_fill_only_the_destination_area() {
        let (mut renderer, probe) = soft_renderer(SoftwareDeviceOptions::default());
        let (_, source) = filled(&mut renderer, 4, 2, 0, [1.0, 0.0, 0.0, 1.0]);
        let (_, dest) = filled(&mut renderer, 4, 2, 0, [0.0, 0.0, 1.0, 1.0]);

        renderer
            .copy_texture(
                TextureRegion::new(&source.shader_resource_view().unwrap(), Rectangle::new(0, 0, 2, 2), 4, 2),
                TextureRegion::new(&dest.render_target_view().unwrap(), Rectangle::new(2, 0, 2, 2), 4, 2),
                PixelFormat::Rgba,
            )
            .unwrap();

        let mapped = read_back(&mut renderer, &dest);
        for y in 0..2 {
            assert_eq!(pixel(&mapped.data, mapped.row_pitch, 1, y), &[0, 0, 255, 255]);
            assert_eq!(pixel(&mapped.data, mapped.row_pitch, 2, y), &[255, 0, 0, 255]);
        }
        assert_eq!(renderer.stats().snapshot().quad_copies, 1);
        assert_eq!(probe.counts().draws, 1);
    }

    #[test]
    fn destination_formats_pick_the_channel_reshaping() {
        let (mut renderer, _) = soft_renderer(SoftwareDeviceOptions::default());
        let (_, source) = filled(&mut renderer, 2, 2, 0, [1.0, 0.0, 0.0, 0.0]);
        let (_, dest) = filled(&mut renderer, 2, 2, 0, [0.0; 4]);
        let copy = |renderer: &mut Renderer, format| {
            renderer.copy_texture(
                TextureRegion::whole(&source.shader_resource_view().unwrap(), 2, 2),
                TextureRegion::whole(&dest.render_target_view().unwrap(), 2, 2),
                format,
            )
        };

        copy(&mut renderer, PixelFormat::Luminance).unwrap();
        assert_eq!(&read_back(&mut renderer, &dest).data[..4], &[255, 255, 255, 255]);
        copy(&mut renderer, PixelFormat::Rgb).unwrap();
        assert_eq!(&read_back(&mut renderer, &dest).data[..4], &[255, 0, 0, 255]);
        copy(&mut renderer, PixelFormat::LuminanceAlpha).unwrap();
        assert_eq!(&read_back(&mut renderer, &dest).data[..4], &[255, 255, 255, 0]);
        assert!(matches!(
            copy(&mut renderer, PixelFormat::DepthComponent),
            Err(RendererError::InvalidOperation(_))
        ));
    }

    #[test]
    fn copies_outside_either_level_are_rejected() {
        let (mut renderer, probe) = soft_renderer(SoftwareDeviceOptions::default());
        let (_, source) = filled(&mut renderer, 2, 2, 0, [1.0; 4]);
        let result = renderer.copy_texture(
            TextureRegion::new(&source.shader_resource_view().unwrap(), Rectangle::new(1, 0, 2, 2), 2, 2),
            TextureRegion::whole(&source.render_target_view().unwrap(), 2, 2),
            PixelFormat::Rgba,
        );
        assert!(matches!(result, Err(RendererError::InvalidValue(_))));
        assert_eq!(probe.counts().draws, 0);
    }

    #[test]
    fn copy_image_lands_at_the_offset_of_the_level() {
        let (mut renderer, _) = soft_renderer(SoftwareDeviceOptions::default());
        let (framebuffer, _) = filled(&mut renderer, 4, 4, 0, [0.0, 1.0, 0.0, 1.0]);
        let mut storage = renderer.create_texture_storage_2d(InternalFormat::Rgba8, true, 4, 4, 1);
        renderer
            .copy_image(&framebuffer, Rectangle::new(0, 0, 2, 2), PixelFormat::Rgba, 1, 1, &mut storage, 0)
            .unwrap();

        let level = storage.get_render_target(&mut renderer, 0).unwrap();
        let mapped = read_back(&mut renderer, &level);
        assert_eq!(pixel(&mapped.data, mapped.row_pitch, 0, 0), &[0, 0, 0, 0]);
        assert_eq!(pixel(&mapped.data, mapped.row_pitch, 1, 1), &[0, 255, 0, 255]);
        assert_eq!(pixel(&mapped.data, mapped.row_pitch, 2, 2), &[0, 255, 0, 255]);
        assert_eq!(pixel(&mapped.data, mapped.row_pitch, 3, 3), &[0, 0, 0, 0]);
    }

    #[test]
    fn multisampled_sources_are_resolved_before_sampling() {
        let (mut renderer, probe) = soft_renderer(SoftwareDeviceOptions::default());
        let (framebuffer, source) = filled(&mut renderer, 2, 2, 4, [1.0, 1.0, 0.0, 1.0]);
        assert_eq!(source.samples(), 4);
        let mut cube = renderer.create_texture_storage_cube(InternalFormat::Rgba8, true, 2, 1);
        renderer
            .copy_image_cube(&framebuffer, Rectangle::new(0, 0, 2, 2), PixelFormat::Rgba, 0, 0, &mut cube, 3, 0)
            .unwrap();
        assert_eq!(probe.counts().resolves, 1);

        let face = cube.get_render_target_face(&mut renderer, 3, 0).unwrap();
        assert_eq!(&read_back(&mut renderer, &face).data[..4], &[255, 255, 0, 255]);
    }

    #[test]
    fn matching_blits_copy_regions_and_stretches_draw() {
        let (mut renderer, probe) = soft_renderer(SoftwareDeviceOptions::default());
        let (read, _) = filled(&mut renderer, 4, 4, 0, [1.0, 0.0, 1.0, 1.0]);
        let (draw, dest) = filled(&mut renderer, 4, 4, 0, [0.0; 4]);
        probe.reset_counts();

        renderer
            .blit_rect(&read, Rectangle::new(0, 0, 2, 2), &draw, Rectangle::new(2, 2, 2, 2), true, false)
            .unwrap();
        assert_eq!(probe.counts().copies, 1);
        assert_eq!(renderer.stats().snapshot().quad_copies, 0);
        let mapped = read_back(&mut renderer, &dest);
        assert_eq!(pixel(&mapped.data, mapped.row_pitch, 3, 3), &[255, 0, 255, 255]);
        assert_eq!(pixel(&mapped.data, mapped.row_pitch, 1, 1), &[0, 0, 0, 0]);

        renderer
            .blit_rect(&read, Rectangle::new(0, 0, 2, 2), &draw, Rectangle::new(0, 0, 4, 4), true, false)
            .unwrap();
        assert_eq!(renderer.stats().snapshot().quad_copies, 1);
    }

    #[test]
    fn depth_stencil_blits_must_cover_the_whole_buffer() {
        let (mut renderer, probe) = soft_renderer(SoftwareDeviceOptions::default());
        let framebuffer = |renderer: &mut Renderer| {
            let depth = renderer
                .create_renderbuffer(4, 4, InternalFormat::Depth24Stencil8, 0)
                .unwrap();
            let mut framebuffer = Framebuffer::new();
            framebuffer.set_depth_stencil_attachment(depth).unwrap();
            framebuffer
        };
        let read = framebuffer(&mut renderer);
        let draw = framebuffer(&mut renderer);
        let whole = Rectangle::new(0, 0, 4, 4);

        renderer.blit_rect(&read, whole, &draw, whole, false, true).unwrap();
        assert_eq!(probe.counts().copies, 1);

        let partial = Rectangle::new(0, 0, 2, 2);
        assert!(matches!(
            renderer.blit_rect(&read, partial, &draw, partial, false, true),
            Err(RendererError::Unimplemented(_))
        ));
        assert!(matches!(
            renderer.blit_rect(&read, whole, &Framebuffer::new(), whole, false, true),
            Err(RendererError::InvalidOperation(_))
        ));
    }
}
