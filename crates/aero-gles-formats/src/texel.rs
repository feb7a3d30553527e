//! Per-texel decode/encode between device formats and normalized RGBA.
//!
//! Decoding follows the D3D default swizzles: missing color channels read as 0 and a missing
//! alpha reads as 1; `A8` reads as `(0, 0, 0, a)`. Depth formats decode their depth value into
//! the red channel.

use half::f16;

use crate::dxgi::{DxgiFormat, FormatClass};
use crate::FormatError;

fn unorm8(byte: u8) -> f32 {
    f32::from(byte) / 255.0
}

fn to_unorm(value: f32, max: u32) -> u32 {
    (value.clamp(0.0, 1.0) * max as f32 + 0.5) as u32
}

fn read_f32(bytes: &[u8], index: usize) -> f32 {
    let start = index * 4;
    f32::from_le_bytes([
        bytes[start],
        bytes[start + 1],
        bytes[start + 2],
        bytes[start + 3],
    ])
}

fn read_f16(bytes: &[u8], index: usize) -> f32 {
    let start = index * 2;
    f16::from_le_bytes([bytes[start], bytes[start + 1]]).to_f32()
}

fn write_f32(out: &mut [u8], index: usize, value: f32) {
    out[index * 4..index * 4 + 4].copy_from_slice(&value.to_le_bytes());
}

fn write_f16(out: &mut [u8], index: usize, value: f32) {
    out[index * 2..index * 2 + 2].copy_from_slice(&f16::from_f32(value).to_le_bytes());
}

fn check_len(format: DxgiFormat, len: usize) -> Result<usize, FormatError> {
    let info = format.info();
    match info.class {
        FormatClass::Compressed => Err(FormatError::Compressed { format }),
        _ if info.bytes == 0 => Err(FormatError::NotColor { format }),
        _ if len < info.bytes as usize => Err(FormatError::BufferTooSmall {
            needed: info.bytes as usize,
            actual: len,
        }),
        _ => Ok(info.bytes as usize),
    }
}

/// Decodes the texel at the start of `bytes`.
pub fn decode_texel(format: DxgiFormat, bytes: &[u8]) -> Result<[f32; 4], FormatError> {
    check_len(format, bytes.len())?;
    Ok(match format {
        DxgiFormat::R8G8B8A8Unorm => [
            unorm8(bytes[0]),
            unorm8(bytes[1]),
            unorm8(bytes[2]),
            unorm8(bytes[3]),
        ],
        DxgiFormat::B8G8R8A8Unorm => [
            unorm8(bytes[2]),
            unorm8(bytes[1]),
            unorm8(bytes[0]),
            unorm8(bytes[3]),
        ],
        DxgiFormat::A8Unorm => [0.0, 0.0, 0.0, unorm8(bytes[0])],
        DxgiFormat::R8Unorm => [unorm8(bytes[0]), 0.0, 0.0, 1.0],
        DxgiFormat::R8G8Unorm => [unorm8(bytes[0]), unorm8(bytes[1]), 0.0, 1.0],
        DxgiFormat::R16Float => [read_f16(bytes, 0), 0.0, 0.0, 1.0],
        DxgiFormat::R16G16Float => [read_f16(bytes, 0), read_f16(bytes, 1), 0.0, 1.0],
        DxgiFormat::R16G16B16A16Float => [
            read_f16(bytes, 0),
            read_f16(bytes, 1),
            read_f16(bytes, 2),
            read_f16(bytes, 3),
        ],
        DxgiFormat::R32Float => [read_f32(bytes, 0), 0.0, 0.0, 1.0],
        DxgiFormat::R32G32Float => [read_f32(bytes, 0), read_f32(bytes, 1), 0.0, 1.0],
        DxgiFormat::R32G32B32Float => [
            read_f32(bytes, 0),
            read_f32(bytes, 1),
            read_f32(bytes, 2),
            1.0,
        ],
        DxgiFormat::R32G32B32A32Float => [
            read_f32(bytes, 0),
            read_f32(bytes, 1),
            read_f32(bytes, 2),
            read_f32(bytes, 3),
        ],
        DxgiFormat::R16Unorm | DxgiFormat::D16Unorm | DxgiFormat::R16Typeless => {
            let raw = u16::from_le_bytes([bytes[0], bytes[1]]);
            [f32::from(raw) / 65535.0, 0.0, 0.0, 1.0]
        }
        DxgiFormat::D24UnormS8Uint | DxgiFormat::R24G8Typeless | DxgiFormat::R24UnormX8Typeless => {
            let raw = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            [(raw & 0x00FF_FFFF) as f32 / 16_777_215.0, 0.0, 0.0, 1.0]
        }
        DxgiFormat::Unknown
        | DxgiFormat::Bc1Unorm
        | DxgiFormat::Bc2Unorm
        | DxgiFormat::Bc3Unorm => unreachable!("rejected by check_len"),
    })
}

/// Encodes `rgba` into the texel at the start of `out`.
///
/// Unorm channels are clamped and rounded to nearest; float channels are stored as-is.
pub fn encode_texel(format: DxgiFormat, rgba: [f32; 4], out: &mut [u8]) -> Result<(), FormatError> {
    check_len(format, out.len())?;
    let [r, g, b, a] = rgba;
    match format {
        DxgiFormat::R8G8B8A8Unorm => {
            out[0] = to_unorm(r, 255) as u8;
            out[1] = to_unorm(g, 255) as u8;
            out[2] = to_unorm(b, 255) as u8;
            out[3] = to_unorm(a, 255) as u8;
        }
        DxgiFormat::B8G8R8A8Unorm => {
            out[0] = to_unorm(b, 255) as u8;
            out[1] = to_unorm(g, 255) as u8;
            out[2] = to_unorm(r, 255) as u8;
            out[3] = to_unorm(a, 255) as u8;
        }
        DxgiFormat::A8Unorm => out[0] = to_unorm(a, 255) as u8,
        DxgiFormat::R8Unorm => out[0] = to_unorm(r, 255) as u8,
        DxgiFormat::R8G8Unorm => {
            out[0] = to_unorm(r, 255) as u8;
            out[1] = to_unorm(g, 255) as u8;
        }
        DxgiFormat::R16Float => write_f16(out, 0, r),
        DxgiFormat::R16G16Float => {
            write_f16(out, 0, r);
            write_f16(out, 1, g);
        }
        DxgiFormat::R16G16B16A16Float => {
            for (i, v) in rgba.into_iter().enumerate() {
                write_f16(out, i, v);
            }
        }
        DxgiFormat::R32Float => write_f32(out, 0, r),
        DxgiFormat::R32G32Float => {
            write_f32(out, 0, r);
            write_f32(out, 1, g);
        }
        DxgiFormat::R32G32B32Float => {
            write_f32(out, 0, r);
            write_f32(out, 1, g);
            write_f32(out, 2, b);
        }
        DxgiFormat::R32G32B32A32Float => {
            for (i, v) in rgba.into_iter().enumerate() {
                write_f32(out, i, v);
            }
        }
        DxgiFormat::R16Unorm | DxgiFormat::D16Unorm | DxgiFormat::R16Typeless => {
            out[..2].copy_from_slice(&(to_unorm(r, 65535) as u16).to_le_bytes());
        }
        DxgiFormat::D24UnormS8Uint | DxgiFormat::R24G8Typeless | DxgiFormat::R24UnormX8Typeless => {
            let stencil = u32::from_le_bytes([out[0], out[1], out[2], out[3]]) & 0xFF00_0000;
            let packed = stencil | to_unorm(r, 0x00FF_FFFF);
            out[..4].copy_from_slice(&packed.to_le_bytes());
        }
        DxgiFormat::Unknown
        | DxgiFormat::Bc1Unorm
        | DxgiFormat::Bc2Unorm
        | DxgiFormat::Bc3Unorm => unreachable!("rejected by check_len"),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bgra_decodes_with_red_and_blue_swapped() {
        let rgba = decode_texel(DxgiFormat::B8G8R8A8Unorm, &[0, 128, 255, 255]).unwrap();
        assert_eq!(rgba[0], 1.0);
        assert_eq!(rgba[2], 0.0);
    }

    #[test]
    fn missing_channels_use_default_swizzle() {
        assert_eq!(
            decode_texel(DxgiFormat::R8Unorm, &[255]).unwrap(),
            [1.0, 0.0, 0.0, 1.0]
        );
        assert_eq!(
            decode_texel(DxgiFormat::A8Unorm, &[255]).unwrap(),
            [0.0, 0.0, 0.0, 1.0]
        );
    }

    #[test]
    fn rg8_reads_red_from_first_byte() {
        let rgba = decode_texel(DxgiFormat::R8G8Unorm, &[255, 0]).unwrap();
        assert_eq!(rgba, [1.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn half_float_round_trip_is_exact_for_representable_values() {
        let mut bytes = [0u8; 8];
        encode_texel(DxgiFormat::R16G16B16A16Float, [0.5, -2.0, 0.25, 1.0], &mut bytes).unwrap();
        assert_eq!(
            decode_texel(DxgiFormat::R16G16B16A16Float, &bytes).unwrap(),
            [0.5, -2.0, 0.25, 1.0]
        );
    }

    #[test]
    fn unorm_encode_clamps_out_of_range_values() {
        let mut bytes = [0u8; 4];
        encode_texel(DxgiFormat::R8G8B8A8Unorm, [2.0, -1.0, 0.5, 1.0], &mut bytes).unwrap();
        assert_eq!(bytes, [255, 0, 128, 255]);
    }

    #[test]
    fn depth_encode_preserves_stencil_byte() {
        let mut bytes = 0xAB00_0000u32.to_le_bytes();
        encode_texel(DxgiFormat::D24UnormS8Uint, [1.0, 0.0, 0.0, 0.0], &mut bytes).unwrap();
        assert_eq!(u32::from_le_bytes(bytes), 0xABFF_FFFF);
    }

    #[test]
    fn compressed_formats_are_rejected() {
        assert_eq!(
            decode_texel(DxgiFormat::Bc1Unorm, &[0; 8]),
            Err(FormatError::Compressed {
                format: DxgiFormat::Bc1Unorm
            })
        );
    }
}
