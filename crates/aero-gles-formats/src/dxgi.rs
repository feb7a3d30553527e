//! Device-side texture formats and their layout metadata.

/// Formats textures, views and swap chains are created with.
///
/// The set mirrors what a D3D11-class device needs to back every GLES 2 internal format,
/// including the typeless/view-format split depth textures rely on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DxgiFormat {
    Unknown,
    R8G8B8A8Unorm,
    B8G8R8A8Unorm,
    A8Unorm,
    R8Unorm,
    R8G8Unorm,
    R16Float,
    R16G16Float,
    R16G16B16A16Float,
    R32Float,
    R32G32Float,
    R32G32B32Float,
    R32G32B32A32Float,
    R16Unorm,
    D16Unorm,
    D24UnormS8Uint,
    R16Typeless,
    R24G8Typeless,
    R24UnormX8Typeless,
    Bc1Unorm,
    Bc2Unorm,
    Bc3Unorm,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatClass {
    Color,
    Depth,
    Typeless,
    Compressed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DxgiFormatInfo {
    /// Bytes per texel, or per block for compressed formats.
    pub bytes: u32,
    pub block_width: u32,
    pub block_height: u32,
    pub red_bits: u32,
    pub green_bits: u32,
    pub blue_bits: u32,
    pub alpha_bits: u32,
    pub depth_bits: u32,
    pub stencil_bits: u32,
    pub class: FormatClass,
}

const fn color(bytes: u32, r: u32, g: u32, b: u32, a: u32) -> DxgiFormatInfo {
    DxgiFormatInfo {
        bytes,
        block_width: 1,
        block_height: 1,
        red_bits: r,
        green_bits: g,
        blue_bits: b,
        alpha_bits: a,
        depth_bits: 0,
        stencil_bits: 0,
        class: FormatClass::Color,
    }
}

const fn depth(bytes: u32, d: u32, s: u32, class: FormatClass) -> DxgiFormatInfo {
    DxgiFormatInfo {
        bytes,
        block_width: 1,
        block_height: 1,
        red_bits: 0,
        green_bits: 0,
        blue_bits: 0,
        alpha_bits: 0,
        depth_bits: d,
        stencil_bits: s,
        class,
    }
}

const fn block(bytes: u32, a: u32) -> DxgiFormatInfo {
    DxgiFormatInfo {
        bytes,
        block_width: 4,
        block_height: 4,
        red_bits: 5,
        green_bits: 6,
        blue_bits: 5,
        alpha_bits: a,
        depth_bits: 0,
        stencil_bits: 0,
        class: FormatClass::Compressed,
    }
}

impl DxgiFormat {
    pub const fn info(self) -> DxgiFormatInfo {
        match self {
            Self::Unknown => color(0, 0, 0, 0, 0),
            Self::R8G8B8A8Unorm | Self::B8G8R8A8Unorm => color(4, 8, 8, 8, 8),
            Self::A8Unorm => color(1, 0, 0, 0, 8),
            Self::R8Unorm => color(1, 8, 0, 0, 0),
            Self::R8G8Unorm => color(2, 8, 8, 0, 0),
            Self::R16Float => color(2, 16, 0, 0, 0),
            Self::R16G16Float => color(4, 16, 16, 0, 0),
            Self::R16G16B16A16Float => color(8, 16, 16, 16, 16),
            Self::R32Float => color(4, 32, 0, 0, 0),
            Self::R32G32Float => color(8, 32, 32, 0, 0),
            Self::R32G32B32Float => color(12, 32, 32, 32, 0),
            Self::R32G32B32A32Float => color(16, 32, 32, 32, 32),
            Self::R16Unorm => color(2, 16, 0, 0, 0),
            Self::D16Unorm => depth(2, 16, 0, FormatClass::Depth),
            Self::D24UnormS8Uint => depth(4, 24, 8, FormatClass::Depth),
            Self::R16Typeless => depth(2, 16, 0, FormatClass::Typeless),
            Self::R24G8Typeless => depth(4, 24, 8, FormatClass::Typeless),
            Self::R24UnormX8Typeless => depth(4, 24, 0, FormatClass::Typeless),
            Self::Bc1Unorm => block(8, 1),
            Self::Bc2Unorm => block(16, 4),
            Self::Bc3Unorm => block(16, 8),
        }
    }

    pub fn is_compressed(self) -> bool {
        self.info().class == FormatClass::Compressed
    }

    /// Depth formats and the typeless formats that alias them.
    pub fn is_depth(self) -> bool {
        matches!(self.info().class, FormatClass::Depth | FormatClass::Typeless)
    }

    pub fn has_stencil(self) -> bool {
        self.info().stencil_bits > 0
    }

    /// Bytes covered by one row of `width` texels (rounded up to whole blocks).
    pub fn row_pitch(self, width: u32) -> u32 {
        let info = self.info();
        width.div_ceil(info.block_width) * info.bytes
    }

    /// Bytes covered by a `width` x `height` image (rounded up to whole blocks).
    pub fn image_size(self, width: u32, height: u32) -> u32 {
        self.row_pitch(width) * height.div_ceil(self.info().block_height)
    }
}

/// Round `value` up to a multiple of `alignment`.
pub fn round_up(value: u32, alignment: u32) -> u32 {
    if alignment <= 1 {
        return value;
    }
    value.div_ceil(alignment) * alignment
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValidSize {
    pub width: u32,
    pub height: u32,
    /// Number of doublings applied; logical level 0 maps to physical level `lod_offset`.
    pub lod_offset: u32,
}

/// Grows a requested texture size until it satisfies the format's block alignment.
///
/// Full textures that already span at least one block are left alone (their small mips are
/// handled by the device); `is_image` forces alignment for staging images. Each doubling is
/// counted so callers can address the original size as a deeper mip of the grown texture.
pub fn make_valid_size(is_image: bool, format: DxgiFormat, width: u32, height: u32) -> ValidSize {
    let info = format.info();
    let mut out = ValidSize {
        width,
        height,
        lod_offset: 0,
    };

    if width == 0 || height == 0 {
        return out;
    }

    if is_image || width < info.block_width || height < info.block_height {
        while out.width % info.block_width != 0 || out.height % info.block_height != 0 {
            out.width <<= 1;
            out.height <<= 1;
            out.lod_offset += 1;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn block_compressed_pitch_covers_partial_blocks() {
        assert_eq!(DxgiFormat::Bc1Unorm.row_pitch(5), 16);
        assert_eq!(DxgiFormat::Bc3Unorm.image_size(4, 6), 32);
        assert_eq!(DxgiFormat::R8G8B8A8Unorm.image_size(3, 2), 24);
    }

    #[test]
    fn small_compressed_textures_grow_and_record_offset() {
        assert_eq!(
            make_valid_size(false, DxgiFormat::Bc1Unorm, 1, 2),
            ValidSize {
                width: 4,
                height: 8,
                lod_offset: 2
            }
        );
    }

    #[test]
    fn block_sized_textures_are_left_alone_unless_image() {
        assert_eq!(
            make_valid_size(false, DxgiFormat::Bc1Unorm, 6, 4),
            ValidSize {
                width: 6,
                height: 4,
                lod_offset: 0
            }
        );
        assert_eq!(
            make_valid_size(true, DxgiFormat::Bc1Unorm, 6, 4),
            ValidSize {
                width: 12,
                height: 8,
                lod_offset: 1
            }
        );
    }

    #[test]
    fn uncompressed_formats_never_grow() {
        assert_eq!(
            make_valid_size(true, DxgiFormat::R8G8B8A8Unorm, 3, 1).lod_offset,
            0
        );
    }

    #[test]
    fn round_up_handles_unit_alignment() {
        assert_eq!(round_up(5, 1), 5);
        assert_eq!(round_up(5, 4), 8);
        assert_eq!(round_up(8, 4), 8);
    }
}
