//! Pixel read-back through staging textures.

use aero_gles_formats::{client_pixel_bytes, convert_row, round_up, FormatError, InternalFormat, PixelFormat, PixelType};
use tracing::trace;

use crate::device::{SubresourceBox, TextureDesc, TextureHandle};
use crate::error::RendererError;
use crate::framebuffer::Framebuffer;
use crate::state::Rectangle;

use super::Renderer;

/// Client memory layout for read-back (`GL_PACK_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelPack {
    /// Row alignment in bytes: 1, 2, 4 or 8.
    pub alignment: u32,
    /// Write the bottom row first (`GL_PACK_REVERSE_ROW_ORDER_ANGLE`).
    pub reverse_row_order: bool,
}

impl Default for PixelPack {
    fn default() -> Self {
        Self {
            alignment: 4,
            reverse_row_order: false,
        }
    }
}

impl PixelPack {
    /// Bytes between the starts of two client rows of `width` pixels.
    pub fn row_pitch(&self, width: u32, format: PixelFormat, ty: PixelType) -> usize {
        let unpadded = width * client_pixel_bytes(format, ty) as u32;
        round_up(unpadded, self.alignment.max(1)) as usize
    }

    /// Bytes a `width` x `height` read writes; the last row is not padded.
    pub fn image_size(&self, width: u32, height: u32, format: PixelFormat, ty: PixelType) -> usize {
        if width == 0 || height == 0 {
            return 0;
        }
        self.row_pitch(width, format, ty) * (height as usize - 1)
            + width as usize * client_pixel_bytes(format, ty)
    }
}

fn conversion_failure(err: FormatError) -> RendererError {
    match err {
        FormatError::Unimplemented(what) => RendererError::Unimplemented(what),
        other => RendererError::Format(other),
    }
}

/// Where the rows of a read land in client memory.
#[derive(Debug, Clone, Copy)]
pub(crate) struct OutputLayout {
    pub offset: usize,
    pub pitch: usize,
}

impl Renderer {
    /// Reads `width` x `height` pixels at (`x`, `y`) of the framebuffer's read buffer into `out`.
    ///
    /// Pixels outside the buffer are left untouched in `out`.
    #[allow(clippy::too_many_arguments)]
    pub fn read_pixels(
        &mut self,
        framebuffer: &Framebuffer,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
        format: PixelFormat,
        ty: PixelType,
        pack: PixelPack,
        out: &mut [u8],
    ) -> Result<(), RendererError> {
        let needed = pack.image_size(width, height, format, ty);
        if out.len() < needed {
            return Err(FormatError::BufferTooSmall {
                needed,
                actual: out.len(),
            }
            .into());
        }
        let source = framebuffer.read_color_buffer().ok_or_else(|| {
            RendererError::InvalidOperation("framebuffer has no read color buffer".to_owned())
        })?;

        let left = i64::from(x).max(0);
        let top = i64::from(y).max(0);
        let right = (i64::from(x) + i64::from(width)).min(i64::from(source.width()));
        let bottom = (i64::from(y) + i64::from(height)).min(i64::from(source.height()));
        if left >= right || top >= bottom {
            return Ok(());
        }
        let area = Rectangle::new(left as i32, top as i32, (right - left) as i32, (bottom - top) as i32);

        let pitch = pack.row_pitch(width, format, ty);
        let column = (left - i64::from(x)) as usize;
        let first_row = (top - i64::from(y)) as usize;
        let row = if pack.reverse_row_order {
            height as usize - first_row - area.height as usize
        } else {
            first_row
        };
        let layout = OutputLayout {
            offset: row * pitch + column * client_pixel_bytes(format, ty),
            pitch,
        };

        let texture = source.resource().ok_or_else(|| {
            RendererError::InvalidOperation("read buffer has no storage".to_owned())
        })?;
        self.read_texture_data(
            &texture,
            source.subresource_index(),
            area,
            source.internal_format(),
            format,
            ty,
            pack.reverse_row_order,
            layout,
            out,
        )
    }

    /// Copies `area` of a subresource through a staging texture and converts it row by row.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn read_texture_data(
        &mut self,
        texture: &TextureHandle,
        subresource: u32,
        area: Rectangle,
        source_format: InternalFormat,
        format: PixelFormat,
        ty: PixelType,
        reverse_row_order: bool,
        layout: OutputLayout,
        out: &mut [u8],
    ) -> Result<(), RendererError> {
        let (width, height) = (area.width as u32, area.height as u32);
        let device_format = self.device_mut()?.texture_desc(texture)?.format;
        let (source, source_subresource) = self.resolve_multisampled_texture(texture, subresource)?;

        let device = self.device_mut()?;
        let staging = device
            .create_texture(&TextureDesc::staging(width, height, device_format), None)
            .map_err(|err| RendererError::OutOfMemory(format!("failed to create a staging texture: {err}")))?;
        let region = SubresourceBox::new(
            area.x as u32,
            area.y as u32,
            area.x as u32 + width,
            area.y as u32 + height,
        );
        device.copy_subresource_region(&staging, 0, 0, 0, &source, source_subresource, Some(region))?;
        let mapped = device.map_read(&staging, 0)?;

        let input_pitch = mapped.row_pitch as usize;
        let pixel_bytes = client_pixel_bytes(format, ty);
        for j in 0..height as usize {
            let source_row = if reverse_row_order { height as usize - 1 - j } else { j };
            let src = &mapped.data[source_row * input_pitch..];
            let start = layout.offset + j * layout.pitch;
            let end = start + width as usize * pixel_bytes;
            let out_len = out.len();
            let dst = out.get_mut(start..end).ok_or(FormatError::BufferTooSmall {
                needed: end,
                actual: out_len,
            })?;
            convert_row(device_format, source_format, format, ty, src, dst, width as usize)
                .map_err(conversion_failure)?;
        }
        trace!(?area, ?format, ?ty, "read back pixels");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::device::soft::SoftwareDeviceOptions;
    use crate::render_target::RenderTarget;
    use crate::renderer::tests::soft_renderer;
    use crate::state::{ClearMask, ClearParameters};

    fn target(renderer: &mut Renderer, format: InternalFormat, samples: u32) -> (Framebuffer, RenderTarget) {
        let target = renderer.create_renderbuffer(2, 2, format, samples).unwrap().unwrap();
        let mut framebuffer = Framebuffer::new();
        framebuffer.set_color_attachment(0, Some(target.clone())).unwrap();
        (framebuffer, target)
    }

    fn clear(renderer: &mut Renderer, framebuffer: &Framebuffer, color: [f32; 4], scissor: Option<Rectangle>) {
        let params = ClearParameters {
            mask: ClearMask::COLOR,
            color,
            scissor,
            ..ClearParameters::default()
        };
        renderer.clear(&params, framebuffer).unwrap();
    }

    /// A 2x2 target whose top row is red and bottom row is blue.
    fn striped(renderer: &mut Renderer) -> Framebuffer {
        let (framebuffer, _) = target(renderer, InternalFormat::Rgba8, 0);
        clear(renderer, &framebuffer, [0.0, 0.0, 1.0, 1.0], None);
        clear(renderer, &framebuffer, [1.0, 0.0, 0.0, 1.0], Some(Rectangle::new(0, 0, 2, 1)));
        framebuffer
    }

    const RED: [u8; 4] = [255, 0, 0, 255];
    const BLUE: [u8; 4] = [0, 0, 255, 255];

    fn read(renderer: &mut Renderer, framebuffer: &Framebuffer, rect: Rectangle, pack: PixelPack) -> Vec<u8> {
        let (width, height) = (rect.width as u32, rect.height as u32);
        let mut out = vec![0u8; pack.image_size(width, height, PixelFormat::Rgba, PixelType::UnsignedByte)];
        renderer
            .read_pixels(
                framebuffer,
                rect.x,
                rect.y,
                width,
                height,
                PixelFormat::Rgba,
                PixelType::UnsignedByte,
                pack,
                &mut out,
            )
            .unwrap();
        out
    }

    #[test]
    fn pack_alignment_pads_every_row_but_the_last() {
        let pack = PixelPack {
            alignment: 4,
            ..PixelPack::default()
        };
        assert_eq!(pack.row_pitch(3, PixelFormat::Rgb, PixelType::UnsignedByte), 12);
        assert_eq!(pack.image_size(3, 2, PixelFormat::Rgb, PixelType::UnsignedByte), 21);
        assert_eq!(pack.image_size(0, 2, PixelFormat::Rgb, PixelType::UnsignedByte), 0);
    }

    #[test]
    fn rows_come_back_top_first_unless_reversed() {
        let (mut renderer, _) = soft_renderer(SoftwareDeviceOptions::default());
        let framebuffer = striped(&mut renderer);

        let out = read(&mut renderer, &framebuffer, Rectangle::new(0, 0, 2, 2), PixelPack::default());
        assert_eq!(&out[..4], &RED);
        assert_eq!(&out[8..12], &BLUE);

        let reversed = PixelPack {
            reverse_row_order: true,
            ..PixelPack::default()
        };
        let out = read(&mut renderer, &framebuffer, Rectangle::new(0, 0, 2, 2), reversed);
        assert_eq!(&out[..4], &BLUE);
        assert_eq!(&out[8..12], &RED);
    }

    #[test]
    fn reads_are_clipped_to_the_buffer() {
        let (mut renderer, _) = soft_renderer(SoftwareDeviceOptions::default());
        let framebuffer = striped(&mut renderer);

        let out = read(&mut renderer, &framebuffer, Rectangle::new(-1, -1, 2, 2), PixelPack::default());
        assert_eq!(&out[..12], &[0; 12]);
        assert_eq!(&out[12..16], &RED);

        let out = read(&mut renderer, &framebuffer, Rectangle::new(5, 5, 1, 1), PixelPack::default());
        assert_eq!(out, vec![0; 4]);
    }

    #[test]
    fn bgra_buffers_read_as_rgba_swap_channels() {
        let (mut renderer, _) = soft_renderer(SoftwareDeviceOptions::default());
        let (framebuffer, _) = target(&mut renderer, InternalFormat::Bgra8, 0);
        clear(&mut renderer, &framebuffer, [1.0, 0.0, 0.0, 1.0], None);
        let out = read(&mut renderer, &framebuffer, Rectangle::new(0, 0, 1, 1), PixelPack::default());
        assert_eq!(out, RED.to_vec());
    }

    #[test]
    fn multisampled_buffers_are_resolved_first() {
        let (mut renderer, probe) = soft_renderer(SoftwareDeviceOptions::default());
        let (framebuffer, _) = target(&mut renderer, InternalFormat::Rgba8, 4);
        clear(&mut renderer, &framebuffer, [0.0, 0.0, 1.0, 1.0], None);
        let out = read(&mut renderer, &framebuffer, Rectangle::new(1, 1, 1, 1), PixelPack::default());
        assert_eq!(out, BLUE.to_vec());
        assert_eq!(probe.counts().resolves, 1);
    }

    #[test]
    fn unsupported_conversions_and_short_buffers_fail() {
        let (mut renderer, _) = soft_renderer(SoftwareDeviceOptions::default());
        let (framebuffer, _) = target(&mut renderer, InternalFormat::Rgba8, 0);
        let mut out = [0u8; 16];
        let result = renderer.read_pixels(
            &framebuffer,
            0,
            0,
            1,
            1,
            PixelFormat::Luminance,
            PixelType::Float,
            PixelPack::default(),
            &mut out,
        );
        assert!(matches!(result, Err(RendererError::Unimplemented(_))));

        let result = renderer.read_pixels(
            &framebuffer,
            0,
            0,
            2,
            2,
            PixelFormat::Rgba,
            PixelType::UnsignedByte,
            PixelPack::default(),
            &mut out[..8],
        );
        assert!(matches!(
            result,
            Err(RendererError::Format(FormatError::BufferTooSmall { needed: 16, .. }))
        ));
    }
}
