//! GL enum values and the typed client pixel format/type pairs accepted by read-back.

use crate::FormatError;

pub type GLenum = u32;

pub const GL_NONE: GLenum = 0;

// Pixel types.
pub const GL_UNSIGNED_BYTE: GLenum = 0x1401;
pub const GL_UNSIGNED_SHORT: GLenum = 0x1403;
pub const GL_UNSIGNED_INT: GLenum = 0x1405;
pub const GL_FLOAT: GLenum = 0x1406;
pub const GL_HALF_FLOAT: GLenum = 0x140B;
pub const GL_HALF_FLOAT_OES: GLenum = 0x8D61;
pub const GL_UNSIGNED_SHORT_5_6_5: GLenum = 0x8363;
pub const GL_UNSIGNED_SHORT_4_4_4_4_REV_EXT: GLenum = 0x8365;
pub const GL_UNSIGNED_SHORT_1_5_5_5_REV_EXT: GLenum = 0x8366;

// Unsized (base) formats.
pub const GL_DEPTH_COMPONENT: GLenum = 0x1902;
pub const GL_RED_EXT: GLenum = 0x1903;
pub const GL_ALPHA: GLenum = 0x1906;
pub const GL_RGB: GLenum = 0x1907;
pub const GL_RGBA: GLenum = 0x1908;
pub const GL_LUMINANCE: GLenum = 0x1909;
pub const GL_LUMINANCE_ALPHA: GLenum = 0x190A;
pub const GL_BGRA_EXT: GLenum = 0x80E1;
pub const GL_RG_EXT: GLenum = 0x8227;
pub const GL_DEPTH_STENCIL_OES: GLenum = 0x84F9;

// Sized internal formats.
pub const GL_RGBA4: GLenum = 0x8056;
pub const GL_RGB5_A1: GLenum = 0x8057;
pub const GL_RGB565: GLenum = 0x8D62;
pub const GL_RGB8_OES: GLenum = 0x8051;
pub const GL_RGBA8_OES: GLenum = 0x8058;
pub const GL_BGRA8_EXT: GLenum = 0x93A1;
pub const GL_ALPHA8_EXT: GLenum = 0x803C;
pub const GL_LUMINANCE8_EXT: GLenum = 0x8040;
pub const GL_LUMINANCE8_ALPHA8_EXT: GLenum = 0x8045;
pub const GL_RGBA32F_EXT: GLenum = 0x8814;
pub const GL_RGB32F_EXT: GLenum = 0x8815;
pub const GL_ALPHA32F_EXT: GLenum = 0x8816;
pub const GL_LUMINANCE32F_EXT: GLenum = 0x8818;
pub const GL_LUMINANCE_ALPHA32F_EXT: GLenum = 0x8819;
pub const GL_RGBA16F_EXT: GLenum = 0x881A;
pub const GL_RGB16F_EXT: GLenum = 0x881B;
pub const GL_ALPHA16F_EXT: GLenum = 0x881C;
pub const GL_LUMINANCE16F_EXT: GLenum = 0x881E;
pub const GL_LUMINANCE_ALPHA16F_EXT: GLenum = 0x881F;
pub const GL_R8_EXT: GLenum = 0x8229;
pub const GL_RG8_EXT: GLenum = 0x822B;
pub const GL_R16F_EXT: GLenum = 0x822D;
pub const GL_R32F_EXT: GLenum = 0x822E;
pub const GL_RG16F_EXT: GLenum = 0x822F;
pub const GL_RG32F_EXT: GLenum = 0x8230;
pub const GL_DEPTH_COMPONENT16: GLenum = 0x81A5;
pub const GL_DEPTH_COMPONENT24_OES: GLenum = 0x81A6;
pub const GL_DEPTH_COMPONENT32_OES: GLenum = 0x81A7;
pub const GL_DEPTH24_STENCIL8_OES: GLenum = 0x88F0;
pub const GL_STENCIL_INDEX8: GLenum = 0x8D48;
pub const GL_COMPRESSED_RGB_S3TC_DXT1_EXT: GLenum = 0x83F0;
pub const GL_COMPRESSED_RGBA_S3TC_DXT1_EXT: GLenum = 0x83F1;
pub const GL_COMPRESSED_RGBA_S3TC_DXT3_ANGLE: GLenum = 0x83F2;
pub const GL_COMPRESSED_RGBA_S3TC_DXT5_ANGLE: GLenum = 0x83F3;

/// Logical (unsized) pixel format of client memory or of a texture's base format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    Alpha,
    Red,
    Rg,
    Rgb,
    Rgba,
    Luminance,
    LuminanceAlpha,
    Bgra,
    DepthComponent,
    DepthStencil,
}

impl PixelFormat {
    pub fn from_gl(value: GLenum) -> Result<Self, FormatError> {
        Ok(match value {
            GL_ALPHA => Self::Alpha,
            GL_RED_EXT => Self::Red,
            GL_RG_EXT => Self::Rg,
            GL_RGB => Self::Rgb,
            GL_RGBA => Self::Rgba,
            GL_LUMINANCE => Self::Luminance,
            GL_LUMINANCE_ALPHA => Self::LuminanceAlpha,
            GL_BGRA_EXT => Self::Bgra,
            GL_DEPTH_COMPONENT => Self::DepthComponent,
            GL_DEPTH_STENCIL_OES => Self::DepthStencil,
            other => return Err(FormatError::UnknownEnum(other)),
        })
    }

    pub fn to_gl(self) -> GLenum {
        match self {
            Self::Alpha => GL_ALPHA,
            Self::Red => GL_RED_EXT,
            Self::Rg => GL_RG_EXT,
            Self::Rgb => GL_RGB,
            Self::Rgba => GL_RGBA,
            Self::Luminance => GL_LUMINANCE,
            Self::LuminanceAlpha => GL_LUMINANCE_ALPHA,
            Self::Bgra => GL_BGRA_EXT,
            Self::DepthComponent => GL_DEPTH_COMPONENT,
            Self::DepthStencil => GL_DEPTH_STENCIL_OES,
        }
    }

    pub fn component_count(self) -> usize {
        match self {
            Self::Alpha | Self::Red | Self::Luminance | Self::DepthComponent => 1,
            Self::Rg | Self::LuminanceAlpha | Self::DepthStencil => 2,
            Self::Rgb => 3,
            Self::Rgba | Self::Bgra => 4,
        }
    }
}

/// Client pixel data type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelType {
    UnsignedByte,
    UnsignedShort,
    UnsignedInt,
    Float,
    HalfFloat,
    UnsignedShort565,
    UnsignedShort4444Rev,
    UnsignedShort1555Rev,
}

impl PixelType {
    pub fn from_gl(value: GLenum) -> Result<Self, FormatError> {
        Ok(match value {
            GL_UNSIGNED_BYTE => Self::UnsignedByte,
            GL_UNSIGNED_SHORT => Self::UnsignedShort,
            GL_UNSIGNED_INT => Self::UnsignedInt,
            GL_FLOAT => Self::Float,
            GL_HALF_FLOAT | GL_HALF_FLOAT_OES => Self::HalfFloat,
            GL_UNSIGNED_SHORT_5_6_5 => Self::UnsignedShort565,
            GL_UNSIGNED_SHORT_4_4_4_4_REV_EXT => Self::UnsignedShort4444Rev,
            GL_UNSIGNED_SHORT_1_5_5_5_REV_EXT => Self::UnsignedShort1555Rev,
            other => return Err(FormatError::UnknownEnum(other)),
        })
    }

    pub fn to_gl(self) -> GLenum {
        match self {
            Self::UnsignedByte => GL_UNSIGNED_BYTE,
            Self::UnsignedShort => GL_UNSIGNED_SHORT,
            Self::UnsignedInt => GL_UNSIGNED_INT,
            Self::Float => GL_FLOAT,
            Self::HalfFloat => GL_HALF_FLOAT_OES,
            Self::UnsignedShort565 => GL_UNSIGNED_SHORT_5_6_5,
            Self::UnsignedShort4444Rev => GL_UNSIGNED_SHORT_4_4_4_4_REV_EXT,
            Self::UnsignedShort1555Rev => GL_UNSIGNED_SHORT_1_5_5_5_REV_EXT,
        }
    }

    /// True for the packed 16-bit types that hold a whole pixel in one element.
    pub fn is_packed(self) -> bool {
        matches!(
            self,
            Self::UnsignedShort565 | Self::UnsignedShort4444Rev | Self::UnsignedShort1555Rev
        )
    }

    pub fn element_size(self) -> usize {
        match self {
            Self::UnsignedByte => 1,
            Self::UnsignedShort
            | Self::HalfFloat
            | Self::UnsignedShort565
            | Self::UnsignedShort4444Rev
            | Self::UnsignedShort1555Rev => 2,
            Self::UnsignedInt | Self::Float => 4,
        }
    }
}

/// Bytes per pixel of client memory laid out as `format`/`ty`.
pub fn client_pixel_bytes(format: PixelFormat, ty: PixelType) -> usize {
    if ty.is_packed() {
        ty.element_size()
    } else {
        format.component_count() * ty.element_size()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_format_round_trips_through_gl_enums() {
        for format in [
            PixelFormat::Alpha,
            PixelFormat::Rgb,
            PixelFormat::Rgba,
            PixelFormat::Luminance,
            PixelFormat::LuminanceAlpha,
            PixelFormat::Bgra,
        ] {
            assert_eq!(PixelFormat::from_gl(format.to_gl()), Ok(format));
        }
        assert_eq!(
            PixelFormat::from_gl(0xDEAD),
            Err(FormatError::UnknownEnum(0xDEAD))
        );
    }

    #[test]
    fn both_half_float_enums_decode() {
        assert_eq!(PixelType::from_gl(GL_HALF_FLOAT), Ok(PixelType::HalfFloat));
        assert_eq!(PixelType::from_gl(GL_HALF_FLOAT_OES), Ok(PixelType::HalfFloat));
    }

    #[test]
    fn packed_types_cover_the_whole_pixel() {
        assert_eq!(client_pixel_bytes(PixelFormat::Rgb, PixelType::UnsignedShort565), 2);
        assert_eq!(client_pixel_bytes(PixelFormat::Bgra, PixelType::UnsignedShort4444Rev), 2);
        assert_eq!(client_pixel_bytes(PixelFormat::Rgb, PixelType::UnsignedByte), 3);
        assert_eq!(client_pixel_bytes(PixelFormat::Rgba, PixelType::Float), 16);
    }
}
