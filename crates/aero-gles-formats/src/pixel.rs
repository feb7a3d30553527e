//! Read-back conversion from device texels into client pixel layouts.
//!
//! Three tiers, tried in order by [`convert_row`]:
//! 1. a straight byte copy when the device layout already equals the client layout,
//! 2. a red/blue swap for BGRA8 sources read as RGBA/UNSIGNED_BYTE,
//! 3. a generic decode/encode through [`Color`] over a fixed matrix of formats.
//!
//! Anything outside the matrix is [`FormatError::Unimplemented`].

use half::f16;

use crate::dxgi::DxgiFormat;
use crate::gl::{client_pixel_bytes, PixelFormat, PixelType};
use crate::internal::InternalFormat;
use crate::FormatError;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Color {
    pub red: f32,
    pub green: f32,
    pub blue: f32,
    pub alpha: f32,
}

impl Color {
    pub const fn new(red: f32, green: f32, blue: f32, alpha: f32) -> Self {
        Self {
            red,
            green,
            blue,
            alpha,
        }
    }
}

fn f32_at(data: &[u8], index: usize) -> f32 {
    let at = index * 4;
    f32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn f16_at(data: &[u8], index: usize) -> f32 {
    let at = index * 2;
    f16::from_le_bytes([data[at], data[at + 1]]).to_f32()
}

/// Decodes texel `x` of a staging row.
pub fn read_pixel_color(format: DxgiFormat, row: &[u8], x: usize) -> Result<Color, FormatError> {
    let bytes = format.info().bytes as usize;
    let needed = (x + 1) * bytes;
    if row.len() < needed {
        return Err(FormatError::BufferTooSmall {
            needed,
            actual: row.len(),
        });
    }
    let texel = &row[x * bytes..needed];
    let unorm = |i: usize| f32::from(texel[i]) / 255.0;

    Ok(match format {
        DxgiFormat::R8G8B8A8Unorm => Color::new(unorm(0), unorm(1), unorm(2), unorm(3)),
        DxgiFormat::A8Unorm => Color::new(0.0, 0.0, 0.0, unorm(0)),
        DxgiFormat::R32G32B32A32Float => Color::new(
            f32_at(texel, 0),
            f32_at(texel, 1),
            f32_at(texel, 2),
            f32_at(texel, 3),
        ),
        DxgiFormat::R32G32B32Float => {
            Color::new(f32_at(texel, 0), f32_at(texel, 1), f32_at(texel, 2), 1.0)
        }
        DxgiFormat::R16G16B16A16Float => Color::new(
            f16_at(texel, 0),
            f16_at(texel, 1),
            f16_at(texel, 2),
            f16_at(texel, 3),
        ),
        DxgiFormat::B8G8R8A8Unorm => Color::new(unorm(2), unorm(1), unorm(0), unorm(3)),
        DxgiFormat::R8Unorm => Color::new(unorm(0), 0.0, 0.0, 1.0),
        DxgiFormat::R8G8Unorm => Color::new(unorm(0), unorm(1), 0.0, 1.0),
        DxgiFormat::R16Float => Color::new(f16_at(texel, 0), 0.0, 0.0, 1.0),
        DxgiFormat::R16G16Float => Color::new(f16_at(texel, 0), f16_at(texel, 1), 0.0, 1.0),
        other => {
            return Err(FormatError::Unimplemented(format!(
                "reading texels of device format {other:?}"
            )))
        }
    })
}

fn quantize(value: f32, max: u32) -> u32 {
    (max as f32 * value.clamp(0.0, 1.0) + 0.5) as u32
}

/// Encodes `color` as pixel `x` of a client row laid out as `format`/`ty`.
pub fn write_pixel_color(
    format: PixelFormat,
    ty: PixelType,
    color: Color,
    row: &mut [u8],
    x: usize,
) -> Result<(), FormatError> {
    let bytes = client_pixel_bytes(format, ty);
    let needed = (x + 1) * bytes;
    if row.len() < needed {
        return Err(FormatError::BufferTooSmall {
            needed,
            actual: row.len(),
        });
    }
    let out = &mut row[x * bytes..needed];
    let Color {
        red,
        green,
        blue,
        alpha,
    } = color;

    match (format, ty) {
        (PixelFormat::Rgba, PixelType::UnsignedByte) => {
            out[0] = quantize(red, 255) as u8;
            out[1] = quantize(green, 255) as u8;
            out[2] = quantize(blue, 255) as u8;
            out[3] = quantize(alpha, 255) as u8;
        }
        (PixelFormat::Bgra, PixelType::UnsignedByte) => {
            out[0] = quantize(blue, 255) as u8;
            out[1] = quantize(green, 255) as u8;
            out[2] = quantize(red, 255) as u8;
            out[3] = quantize(alpha, 255) as u8;
        }
        (PixelFormat::Bgra, PixelType::UnsignedShort4444Rev) => {
            // 4444_REV keeps alpha in the most significant nibble.
            let packed = (quantize(alpha, 15) << 12)
                | (quantize(red, 15) << 8)
                | (quantize(green, 15) << 4)
                | quantize(blue, 15);
            out.copy_from_slice(&(packed as u16).to_le_bytes());
        }
        (PixelFormat::Bgra, PixelType::UnsignedShort1555Rev) => {
            let packed = (quantize(alpha, 1) << 15)
                | (quantize(red, 31) << 10)
                | (quantize(green, 31) << 5)
                | quantize(blue, 31);
            out.copy_from_slice(&(packed as u16).to_le_bytes());
        }
        (PixelFormat::Rgb, PixelType::UnsignedShort565) => {
            let packed =
                quantize(blue, 31) | (quantize(green, 63) << 5) | (quantize(red, 31) << 11);
            out.copy_from_slice(&(packed as u16).to_le_bytes());
        }
        (PixelFormat::Rgb, PixelType::UnsignedByte) => {
            out[0] = quantize(red, 255) as u8;
            out[1] = quantize(green, 255) as u8;
            out[2] = quantize(blue, 255) as u8;
        }
        (format, ty) => {
            return Err(FormatError::Unimplemented(format!(
                "writing pixels as {format:?}/{ty:?}"
            )))
        }
    }
    Ok(())
}

/// Bytes per pixel when the device layout can be copied verbatim, or `None`.
pub fn fast_pixel_copy_size(
    source: DxgiFormat,
    source_internal: InternalFormat,
    format: PixelFormat,
    ty: PixelType,
) -> Option<usize> {
    match (source, format, ty) {
        (DxgiFormat::A8Unorm, PixelFormat::Alpha, PixelType::UnsignedByte) => Some(1),
        (DxgiFormat::R8G8B8A8Unorm, PixelFormat::Rgba, PixelType::UnsignedByte)
            if source_internal == InternalFormat::Rgba8 =>
        {
            Some(4)
        }
        (DxgiFormat::B8G8R8A8Unorm, PixelFormat::Bgra, PixelType::UnsignedByte) => Some(4),
        (DxgiFormat::R16G16B16A16Float, PixelFormat::Rgba, PixelType::HalfFloat)
            if source_internal == InternalFormat::Rgba16F =>
        {
            Some(8)
        }
        (DxgiFormat::R32G32B32Float, PixelFormat::Rgb, PixelType::Float) => Some(12),
        (DxgiFormat::R32G32B32A32Float, PixelFormat::Rgba, PixelType::Float)
            if source_internal == InternalFormat::Rgba32F =>
        {
            Some(16)
        }
        _ => None,
    }
}

/// Converts one row of `width` staging texels into client layout.
pub fn convert_row(
    source: DxgiFormat,
    source_internal: InternalFormat,
    format: PixelFormat,
    ty: PixelType,
    src: &[u8],
    dst: &mut [u8],
    width: usize,
) -> Result<(), FormatError> {
    if let Some(pixel_size) = fast_pixel_copy_size(source, source_internal, format, ty) {
        let len = pixel_size * width;
        if src.len() < len || dst.len() < len {
            return Err(FormatError::BufferTooSmall {
                needed: len,
                actual: src.len().min(dst.len()),
            });
        }
        dst[..len].copy_from_slice(&src[..len]);
        return Ok(());
    }

    if source == DxgiFormat::B8G8R8A8Unorm
        && format == PixelFormat::Rgba
        && ty == PixelType::UnsignedByte
    {
        let len = 4 * width;
        if src.len() < len || dst.len() < len {
            return Err(FormatError::BufferTooSmall {
                needed: len,
                actual: src.len().min(dst.len()),
            });
        }
        for (s, d) in src[..len].chunks_exact(4).zip(dst[..len].chunks_exact_mut(4)) {
            let argb = u32::from_le_bytes([s[0], s[1], s[2], s[3]]);
            let abgr =
                (argb & 0xFF00_FF00) | ((argb & 0x0000_00FF) << 16) | ((argb & 0x00FF_0000) >> 16);
            d.copy_from_slice(&abgr.to_le_bytes());
        }
        return Ok(());
    }

    let force_opaque = source_internal.channel_bits().alpha == 0;
    for x in 0..width {
        let mut color = read_pixel_color(source, src, x)?;
        if force_opaque {
            color.alpha = 1.0;
        }
        write_pixel_color(format, ty, color, dst, x)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn fast_path_requires_matching_internal_format() {
        assert_eq!(
            fast_pixel_copy_size(
                DxgiFormat::R8G8B8A8Unorm,
                InternalFormat::Rgba8,
                PixelFormat::Rgba,
                PixelType::UnsignedByte
            ),
            Some(4)
        );
        // RGB8 is widened to RGBA8 on the device; its alpha must not leak through a memcpy.
        assert_eq!(
            fast_pixel_copy_size(
                DxgiFormat::R8G8B8A8Unorm,
                InternalFormat::Rgb8,
                PixelFormat::Rgba,
                PixelType::UnsignedByte
            ),
            None
        );
    }

    #[test]
    fn bgra_source_read_as_rgba_swaps_red_and_blue() {
        let src = [10, 20, 30, 40, 50, 60, 70, 80];
        let mut dst = [0u8; 8];
        convert_row(
            DxgiFormat::B8G8R8A8Unorm,
            InternalFormat::Bgra8,
            PixelFormat::Rgba,
            PixelType::UnsignedByte,
            &src,
            &mut dst,
            2,
        )
        .unwrap();
        assert_eq!(dst, [30, 20, 10, 40, 70, 60, 50, 80]);
    }

    #[test]
    fn generic_path_forces_alpha_for_alphaless_sources() {
        let src = [255, 0, 0, 7];
        let mut dst = [0u8; 4];
        convert_row(
            DxgiFormat::R8G8B8A8Unorm,
            InternalFormat::Rgb8,
            PixelFormat::Rgba,
            PixelType::UnsignedByte,
            &src,
            &mut dst,
            1,
        )
        .unwrap();
        assert_eq!(dst, [255, 0, 0, 255]);
    }

    #[test]
    fn packed_16_bit_layouts() {
        let mut out = [0u8; 2];
        let white = Color::new(1.0, 1.0, 1.0, 1.0);
        write_pixel_color(PixelFormat::Rgb, PixelType::UnsignedShort565, Color::new(1.0, 0.0, 0.0, 1.0), &mut out, 0)
            .unwrap();
        assert_eq!(u16::from_le_bytes(out), 0xF800);
        write_pixel_color(PixelFormat::Bgra, PixelType::UnsignedShort4444Rev, Color::new(0.0, 0.0, 0.0, 1.0), &mut out, 0)
            .unwrap();
        assert_eq!(u16::from_le_bytes(out), 0xF000);
        write_pixel_color(PixelFormat::Bgra, PixelType::UnsignedShort1555Rev, white, &mut out, 0).unwrap();
        assert_eq!(u16::from_le_bytes(out), 0xFFFF);
    }

    #[test]
    fn rgb_unsigned_byte_drops_alpha() {
        let mut out = [0u8; 3];
        write_pixel_color(
            PixelFormat::Rgb,
            PixelType::UnsignedByte,
            Color::new(0.0, 0.5, 1.0, 0.0),
            &mut out,
            0,
        )
        .unwrap();
        assert_eq!(out, [0, 128, 255]);
    }

    #[test]
    fn unsupported_combinations_are_explicit_errors() {
        let mut out = [0u8; 16];
        assert!(matches!(
            write_pixel_color(PixelFormat::Luminance, PixelType::Float, Color::default(), &mut out, 0),
            Err(FormatError::Unimplemented(_))
        ));
        assert!(matches!(
            read_pixel_color(DxgiFormat::R32Float, &[0; 4], 0),
            Err(FormatError::Unimplemented(_))
        ));
    }

    #[test]
    fn float_sources_round_trip_through_the_generic_path() {
        let mut src = Vec::new();
        for v in [0.25f32, 0.5, 0.75] {
            src.extend_from_slice(&v.to_le_bytes());
        }
        let mut dst = [0u8; 4];
        convert_row(
            DxgiFormat::R32G32B32Float,
            InternalFormat::Rgb32F,
            PixelFormat::Rgba,
            PixelType::UnsignedByte,
            &src,
            &mut dst,
            1,
        )
        .unwrap();
        assert_eq!(dst, [64, 128, 191, 255]);
    }
}
