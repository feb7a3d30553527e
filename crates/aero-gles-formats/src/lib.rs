//! Format tables shared by the GLES renderer and the EGL front end.
//!
//! Two vocabularies meet here: the GL side (`GLenum` constants, logical pixel formats and sized
//! internal formats) and the device side (`DxgiFormat`, the formats textures and views are
//! actually created with). The conversions between them, and the CPU paths that touch texel
//! bytes directly (read-back and the software device), live in this crate so both layers agree
//! on a single table.

pub mod dxgi;
pub mod gl;
pub mod internal;
pub mod pixel;
pub mod texel;

pub use dxgi::{make_valid_size, round_up, DxgiFormat, DxgiFormatInfo, FormatClass, ValidSize};
pub use gl::{client_pixel_bytes, GLenum, PixelFormat, PixelType};
pub use internal::{ChannelBits, InternalFormat, TextureFormatInfo};
pub use texel::{decode_texel, encode_texel};
pub use pixel::{convert_row, fast_pixel_copy_size, read_pixel_color, write_pixel_color, Color};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FormatError {
    #[error("unrecognized GL enum 0x{0:04X}")]
    UnknownEnum(GLenum),
    #[error("{format:?} is block compressed; texel access is not available")]
    Compressed { format: DxgiFormat },
    #[error("{format:?} has no color texel layout")]
    NotColor { format: DxgiFormat },
    #[error("pixel conversion not implemented: {0}")]
    Unimplemented(String),
    #[error("buffer too small: need {needed} bytes, got {actual}")]
    BufferTooSmall { needed: usize, actual: usize },
}
