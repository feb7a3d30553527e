//! Sized GLES internal formats and the device formats that back them.

use crate::dxgi::DxgiFormat;
use crate::gl::*;
use crate::FormatError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InternalFormat {
    Rgba4,
    Rgb5A1,
    Rgb565,
    Rgb8,
    Rgba8,
    Bgra8,
    Alpha8,
    Luminance8,
    LuminanceAlpha8,
    R8,
    Rg8,
    R16F,
    Rg16F,
    Rgb16F,
    Rgba16F,
    Alpha16F,
    Luminance16F,
    LuminanceAlpha16F,
    R32F,
    Rg32F,
    Rgb32F,
    Rgba32F,
    Alpha32F,
    Luminance32F,
    LuminanceAlpha32F,
    DepthComponent16,
    DepthComponent24,
    DepthComponent32,
    Depth24Stencil8,
    StencilIndex8,
    CompressedRgbDxt1,
    CompressedRgbaDxt1,
    CompressedRgbaDxt3,
    CompressedRgbaDxt5,
}

/// Formats used to create the texture and each kind of view for an internal format.
///
/// `Unknown` means the internal format cannot be used for that view kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureFormatInfo {
    pub tex: DxgiFormat,
    pub srv: DxgiFormat,
    pub rtv: DxgiFormat,
    pub dsv: DxgiFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChannelBits {
    pub red: u32,
    pub green: u32,
    pub blue: u32,
    pub alpha: u32,
    pub luminance: u32,
    pub depth: u32,
    pub stencil: u32,
}

const fn rgba(red: u32, green: u32, blue: u32, alpha: u32) -> ChannelBits {
    ChannelBits {
        red,
        green,
        blue,
        alpha,
        luminance: 0,
        depth: 0,
        stencil: 0,
    }
}

const fn lum(luminance: u32, alpha: u32) -> ChannelBits {
    ChannelBits {
        red: 0,
        green: 0,
        blue: 0,
        alpha,
        luminance,
        depth: 0,
        stencil: 0,
    }
}

const fn ds(depth: u32, stencil: u32) -> ChannelBits {
    ChannelBits {
        red: 0,
        green: 0,
        blue: 0,
        alpha: 0,
        luminance: 0,
        depth,
        stencil,
    }
}

const fn color_tex(format: DxgiFormat) -> TextureFormatInfo {
    TextureFormatInfo {
        tex: format,
        srv: format,
        rtv: format,
        dsv: DxgiFormat::Unknown,
    }
}

const fn compressed_tex(format: DxgiFormat) -> TextureFormatInfo {
    TextureFormatInfo {
        tex: format,
        srv: format,
        rtv: DxgiFormat::Unknown,
        dsv: DxgiFormat::Unknown,
    }
}

impl InternalFormat {
    pub fn from_gl(value: GLenum) -> Result<Self, FormatError> {
        Ok(match value {
            GL_RGBA4 => Self::Rgba4,
            GL_RGB5_A1 => Self::Rgb5A1,
            GL_RGB565 => Self::Rgb565,
            GL_RGB8_OES => Self::Rgb8,
            GL_RGBA8_OES => Self::Rgba8,
            GL_BGRA8_EXT => Self::Bgra8,
            GL_ALPHA8_EXT => Self::Alpha8,
            GL_LUMINANCE8_EXT => Self::Luminance8,
            GL_LUMINANCE8_ALPHA8_EXT => Self::LuminanceAlpha8,
            GL_R8_EXT => Self::R8,
            GL_RG8_EXT => Self::Rg8,
            GL_R16F_EXT => Self::R16F,
            GL_RG16F_EXT => Self::Rg16F,
            GL_RGB16F_EXT => Self::Rgb16F,
            GL_RGBA16F_EXT => Self::Rgba16F,
            GL_ALPHA16F_EXT => Self::Alpha16F,
            GL_LUMINANCE16F_EXT => Self::Luminance16F,
            GL_LUMINANCE_ALPHA16F_EXT => Self::LuminanceAlpha16F,
            GL_R32F_EXT => Self::R32F,
            GL_RG32F_EXT => Self::Rg32F,
            GL_RGB32F_EXT => Self::Rgb32F,
            GL_RGBA32F_EXT => Self::Rgba32F,
            GL_ALPHA32F_EXT => Self::Alpha32F,
            GL_LUMINANCE32F_EXT => Self::Luminance32F,
            GL_LUMINANCE_ALPHA32F_EXT => Self::LuminanceAlpha32F,
            GL_DEPTH_COMPONENT16 => Self::DepthComponent16,
            GL_DEPTH_COMPONENT24_OES => Self::DepthComponent24,
            GL_DEPTH_COMPONENT32_OES => Self::DepthComponent32,
            GL_DEPTH24_STENCIL8_OES => Self::Depth24Stencil8,
            GL_STENCIL_INDEX8 => Self::StencilIndex8,
            GL_COMPRESSED_RGB_S3TC_DXT1_EXT => Self::CompressedRgbDxt1,
            GL_COMPRESSED_RGBA_S3TC_DXT1_EXT => Self::CompressedRgbaDxt1,
            GL_COMPRESSED_RGBA_S3TC_DXT3_ANGLE => Self::CompressedRgbaDxt3,
            GL_COMPRESSED_RGBA_S3TC_DXT5_ANGLE => Self::CompressedRgbaDxt5,
            other => return Err(FormatError::UnknownEnum(other)),
        })
    }

    pub fn to_gl(self) -> GLenum {
        match self {
            Self::Rgba4 => GL_RGBA4,
            Self::Rgb5A1 => GL_RGB5_A1,
            Self::Rgb565 => GL_RGB565,
            Self::Rgb8 => GL_RGB8_OES,
            Self::Rgba8 => GL_RGBA8_OES,
            Self::Bgra8 => GL_BGRA8_EXT,
            Self::Alpha8 => GL_ALPHA8_EXT,
            Self::Luminance8 => GL_LUMINANCE8_EXT,
            Self::LuminanceAlpha8 => GL_LUMINANCE8_ALPHA8_EXT,
            Self::R8 => GL_R8_EXT,
            Self::Rg8 => GL_RG8_EXT,
            Self::R16F => GL_R16F_EXT,
            Self::Rg16F => GL_RG16F_EXT,
            Self::Rgb16F => GL_RGB16F_EXT,
            Self::Rgba16F => GL_RGBA16F_EXT,
            Self::Alpha16F => GL_ALPHA16F_EXT,
            Self::Luminance16F => GL_LUMINANCE16F_EXT,
            Self::LuminanceAlpha16F => GL_LUMINANCE_ALPHA16F_EXT,
            Self::R32F => GL_R32F_EXT,
            Self::Rg32F => GL_RG32F_EXT,
            Self::Rgb32F => GL_RGB32F_EXT,
            Self::Rgba32F => GL_RGBA32F_EXT,
            Self::Alpha32F => GL_ALPHA32F_EXT,
            Self::Luminance32F => GL_LUMINANCE32F_EXT,
            Self::LuminanceAlpha32F => GL_LUMINANCE_ALPHA32F_EXT,
            Self::DepthComponent16 => GL_DEPTH_COMPONENT16,
            Self::DepthComponent24 => GL_DEPTH_COMPONENT24_OES,
            Self::DepthComponent32 => GL_DEPTH_COMPONENT32_OES,
            Self::Depth24Stencil8 => GL_DEPTH24_STENCIL8_OES,
            Self::StencilIndex8 => GL_STENCIL_INDEX8,
            Self::CompressedRgbDxt1 => GL_COMPRESSED_RGB_S3TC_DXT1_EXT,
            Self::CompressedRgbaDxt1 => GL_COMPRESSED_RGBA_S3TC_DXT1_EXT,
            Self::CompressedRgbaDxt3 => GL_COMPRESSED_RGBA_S3TC_DXT3_ANGLE,
            Self::CompressedRgbaDxt5 => GL_COMPRESSED_RGBA_S3TC_DXT5_ANGLE,
        }
    }

    pub fn base_format(self) -> PixelFormat {
        match self {
            Self::Rgba4
            | Self::Rgb5A1
            | Self::Rgba8
            | Self::Rgba16F
            | Self::Rgba32F
            | Self::CompressedRgbaDxt1
            | Self::CompressedRgbaDxt3
            | Self::CompressedRgbaDxt5 => PixelFormat::Rgba,
            Self::Rgb565
            | Self::Rgb8
            | Self::Rgb16F
            | Self::Rgb32F
            | Self::CompressedRgbDxt1 => PixelFormat::Rgb,
            Self::Bgra8 => PixelFormat::Bgra,
            Self::Alpha8 | Self::Alpha16F | Self::Alpha32F => PixelFormat::Alpha,
            Self::Luminance8 | Self::Luminance16F | Self::Luminance32F => PixelFormat::Luminance,
            Self::LuminanceAlpha8 | Self::LuminanceAlpha16F | Self::LuminanceAlpha32F => {
                PixelFormat::LuminanceAlpha
            }
            Self::R8 | Self::R16F | Self::R32F => PixelFormat::Red,
            Self::Rg8 | Self::Rg16F | Self::Rg32F => PixelFormat::Rg,
            Self::DepthComponent16 | Self::DepthComponent24 | Self::DepthComponent32 => {
                PixelFormat::DepthComponent
            }
            Self::Depth24Stencil8 | Self::StencilIndex8 => PixelFormat::DepthStencil,
        }
    }

    pub fn channel_bits(self) -> ChannelBits {
        match self {
            Self::Rgba4 => rgba(4, 4, 4, 4),
            Self::Rgb5A1 => rgba(5, 5, 5, 1),
            Self::Rgb565 => rgba(5, 6, 5, 0),
            Self::Rgb8 => rgba(8, 8, 8, 0),
            Self::Rgba8 | Self::Bgra8 => rgba(8, 8, 8, 8),
            Self::Alpha8 => lum(0, 8),
            Self::Luminance8 => lum(8, 0),
            Self::LuminanceAlpha8 => lum(8, 8),
            Self::R8 => rgba(8, 0, 0, 0),
            Self::Rg8 => rgba(8, 8, 0, 0),
            Self::R16F => rgba(16, 0, 0, 0),
            Self::Rg16F => rgba(16, 16, 0, 0),
            Self::Rgb16F => rgba(16, 16, 16, 0),
            Self::Rgba16F => rgba(16, 16, 16, 16),
            Self::Alpha16F => lum(0, 16),
            Self::Luminance16F => lum(16, 0),
            Self::LuminanceAlpha16F => lum(16, 16),
            Self::R32F => rgba(32, 0, 0, 0),
            Self::Rg32F => rgba(32, 32, 0, 0),
            Self::Rgb32F => rgba(32, 32, 32, 0),
            Self::Rgba32F => rgba(32, 32, 32, 32),
            Self::Alpha32F => lum(0, 32),
            Self::Luminance32F => lum(32, 0),
            Self::LuminanceAlpha32F => lum(32, 32),
            Self::DepthComponent16 => ds(16, 0),
            Self::DepthComponent24 => ds(24, 0),
            Self::DepthComponent32 => ds(32, 0),
            Self::Depth24Stencil8 => ds(24, 8),
            Self::StencilIndex8 => ds(0, 8),
            Self::CompressedRgbDxt1 => rgba(5, 6, 5, 0),
            Self::CompressedRgbaDxt1 => rgba(5, 6, 5, 1),
            Self::CompressedRgbaDxt3 => rgba(5, 6, 5, 4),
            Self::CompressedRgbaDxt5 => rgba(5, 6, 5, 8),
        }
    }

    pub fn is_compressed(self) -> bool {
        matches!(
            self,
            Self::CompressedRgbDxt1
                | Self::CompressedRgbaDxt1
                | Self::CompressedRgbaDxt3
                | Self::CompressedRgbaDxt5
        )
    }

    pub fn is_depth_or_stencil(self) -> bool {
        matches!(
            self.base_format(),
            PixelFormat::DepthComponent | PixelFormat::DepthStencil
        )
    }

    /// Device formats backing this internal format.
    ///
    /// Formats without an exact device equivalent (565, 4444, luminance) are widened to RGBA8
    /// or RGBA float; data uploads convert into the wider layout.
    pub fn texture_format_info(self) -> TextureFormatInfo {
        match self {
            Self::Rgba4
            | Self::Rgb5A1
            | Self::Rgb565
            | Self::Rgb8
            | Self::Rgba8
            | Self::Luminance8
            | Self::LuminanceAlpha8 => color_tex(DxgiFormat::R8G8B8A8Unorm),
            Self::Bgra8 => color_tex(DxgiFormat::B8G8R8A8Unorm),
            Self::Alpha8 => color_tex(DxgiFormat::A8Unorm),
            Self::R8 => color_tex(DxgiFormat::R8Unorm),
            Self::Rg8 => color_tex(DxgiFormat::R8G8Unorm),
            Self::R16F => color_tex(DxgiFormat::R16Float),
            Self::Rg16F => color_tex(DxgiFormat::R16G16Float),
            Self::Rgb16F
            | Self::Rgba16F
            | Self::Alpha16F
            | Self::Luminance16F
            | Self::LuminanceAlpha16F => color_tex(DxgiFormat::R16G16B16A16Float),
            Self::R32F => color_tex(DxgiFormat::R32Float),
            Self::Rg32F => color_tex(DxgiFormat::R32G32Float),
            Self::Rgb32F
            | Self::Rgba32F
            | Self::Alpha32F
            | Self::Luminance32F
            | Self::LuminanceAlpha32F => color_tex(DxgiFormat::R32G32B32A32Float),
            Self::DepthComponent16 => TextureFormatInfo {
                tex: DxgiFormat::R16Typeless,
                srv: DxgiFormat::R16Unorm,
                rtv: DxgiFormat::Unknown,
                dsv: DxgiFormat::D16Unorm,
            },
            Self::DepthComponent24
            | Self::DepthComponent32
            | Self::Depth24Stencil8
            | Self::StencilIndex8 => TextureFormatInfo {
                tex: DxgiFormat::R24G8Typeless,
                srv: DxgiFormat::R24UnormX8Typeless,
                rtv: DxgiFormat::Unknown,
                dsv: DxgiFormat::D24UnormS8Uint,
            },
            Self::CompressedRgbDxt1 | Self::CompressedRgbaDxt1 => {
                compressed_tex(DxgiFormat::Bc1Unorm)
            }
            Self::CompressedRgbaDxt3 => compressed_tex(DxgiFormat::Bc2Unorm),
            Self::CompressedRgbaDxt5 => compressed_tex(DxgiFormat::Bc3Unorm),
        }
    }

    /// Format a renderbuffer of this internal format is created with (no typeless split).
    pub fn renderbuffer_format(self) -> DxgiFormat {
        let info = self.texture_format_info();
        if info.dsv != DxgiFormat::Unknown {
            info.dsv
        } else {
            info.rtv
        }
    }

    /// Best internal format describing a device format, used for swap-chain buffers.
    pub fn from_dxgi(format: DxgiFormat) -> Option<Self> {
        Some(match format {
            DxgiFormat::R8G8B8A8Unorm => Self::Rgba8,
            DxgiFormat::B8G8R8A8Unorm => Self::Bgra8,
            DxgiFormat::A8Unorm => Self::Alpha8,
            DxgiFormat::R8Unorm => Self::R8,
            DxgiFormat::R8G8Unorm => Self::Rg8,
            DxgiFormat::R16Float => Self::R16F,
            DxgiFormat::R16G16Float => Self::Rg16F,
            DxgiFormat::R16G16B16A16Float => Self::Rgba16F,
            DxgiFormat::R32Float => Self::R32F,
            DxgiFormat::R32G32Float => Self::Rg32F,
            DxgiFormat::R32G32B32Float => Self::Rgb32F,
            DxgiFormat::R32G32B32A32Float => Self::Rgba32F,
            DxgiFormat::D16Unorm | DxgiFormat::R16Typeless => Self::DepthComponent16,
            DxgiFormat::D24UnormS8Uint | DxgiFormat::R24G8Typeless => Self::Depth24Stencil8,
            DxgiFormat::Bc1Unorm => Self::CompressedRgbaDxt1,
            DxgiFormat::Bc2Unorm => Self::CompressedRgbaDxt3,
            DxgiFormat::Bc3Unorm => Self::CompressedRgbaDxt5,
            DxgiFormat::Unknown | DxgiFormat::R16Unorm | DxgiFormat::R24UnormX8Typeless => {
                return None
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dxt_formats_map_to_matching_bc_blocks() {
        assert_eq!(
            InternalFormat::CompressedRgbaDxt1.texture_format_info().tex,
            DxgiFormat::Bc1Unorm
        );
        assert_eq!(
            InternalFormat::CompressedRgbaDxt3.texture_format_info().tex,
            DxgiFormat::Bc2Unorm
        );
        assert_eq!(
            InternalFormat::CompressedRgbaDxt5.texture_format_info().tex,
            DxgiFormat::Bc3Unorm
        );
    }

    #[test]
    fn depth_textures_split_typeless_and_view_formats() {
        let info = InternalFormat::Depth24Stencil8.texture_format_info();
        assert_eq!(info.tex, DxgiFormat::R24G8Typeless);
        assert_eq!(info.dsv, DxgiFormat::D24UnormS8Uint);
        assert_eq!(info.rtv, DxgiFormat::Unknown);
        assert_eq!(
            InternalFormat::Depth24Stencil8.renderbuffer_format(),
            DxgiFormat::D24UnormS8Uint
        );
    }

    #[test]
    fn gl_enums_round_trip() {
        for value in [GL_RGBA8_OES, GL_BGRA8_EXT, GL_RGB565, GL_DEPTH24_STENCIL8_OES] {
            assert_eq!(InternalFormat::from_gl(value).map(|f| f.to_gl()), Ok(value));
        }
    }

    #[test]
    fn rgb_formats_have_no_alpha_bits() {
        assert_eq!(InternalFormat::Rgb8.channel_bits().alpha, 0);
        assert_eq!(InternalFormat::Rgb8.base_format(), PixelFormat::Rgb);
        assert_eq!(InternalFormat::Bgra8.channel_bits().alpha, 8);
    }
}
