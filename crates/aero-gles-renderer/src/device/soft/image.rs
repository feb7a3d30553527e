//! CPU pixel storage for one texture subresource.

use aero_gles_formats::{decode_texel, encode_texel, DxgiFormat};

use crate::device::{ColorWriteMask, DeviceError, SubresourceBox};

/// Color and compressed formats keep raw texel bytes; depth formats (and the typeless formats
/// aliasing them) keep separate depth and stencil planes.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Image {
    pub width: u32,
    pub height: u32,
    pub format: DxgiFormat,
    pub texels: Vec<u8>,
    pub depth: Vec<f32>,
    pub stencil: Vec<u8>,
}

impl Image {
    pub fn new(format: DxgiFormat, width: u32, height: u32) -> Self {
        let pixels = (width * height) as usize;
        if format.is_depth() {
            Self {
                width,
                height,
                format,
                texels: Vec::new(),
                depth: vec![0.0; pixels],
                stencil: vec![0; pixels],
            }
        } else {
            Self {
                width,
                height,
                format,
                texels: vec![0; format.image_size(width, height) as usize],
                depth: Vec::new(),
                stencil: Vec::new(),
            }
        }
    }

    pub fn byte_size(&self) -> u64 {
        if self.format.is_depth() {
            u64::from(self.format.image_size(self.width, self.height))
        } else {
            self.texels.len() as u64
        }
    }

    fn texel_range(&self, x: u32, y: u32) -> std::ops::Range<usize> {
        let bytes = self.format.info().bytes as usize;
        let start = y as usize * self.format.row_pitch(self.width) as usize + x as usize * bytes;
        start..start + bytes
    }

    fn index(&self, x: u32, y: u32) -> usize {
        (y * self.width + x) as usize
    }

    /// Texel at (x, y) as RGBA; depth reads into red. Compressed texels read as zero.
    pub fn read(&self, x: u32, y: u32) -> [f32; 4] {
        if self.format.is_depth() {
            return [self.depth[self.index(x, y)], 0.0, 0.0, 1.0];
        }
        decode_texel(self.format, &self.texels[self.texel_range(x, y)]).unwrap_or_default()
    }

    /// Writes the channels enabled in `mask`, keeping the others.
    pub fn write(&mut self, x: u32, y: u32, rgba: [f32; 4], mask: ColorWriteMask) {
        if self.format.is_depth() || self.format.is_compressed() {
            return;
        }
        let mut value = if mask == ColorWriteMask::all() {
            rgba
        } else {
            self.read(x, y)
        };
        for (channel, bit) in [
            ColorWriteMask::RED,
            ColorWriteMask::GREEN,
            ColorWriteMask::BLUE,
            ColorWriteMask::ALPHA,
        ]
        .into_iter()
        .enumerate()
        {
            if mask.contains(bit) {
                value[channel] = rgba[channel];
            }
        }
        let range = self.texel_range(x, y);
        // Only block-compressed formats fail to encode and those returned above.
        let _ = encode_texel(self.format, value, &mut self.texels[range]);
    }

    pub fn depth_at(&self, x: u32, y: u32) -> f32 {
        self.depth[self.index(x, y)]
    }

    pub fn set_depth(&mut self, x: u32, y: u32, depth: f32) {
        let index = self.index(x, y);
        self.depth[index] = depth.clamp(0.0, 1.0);
    }

    pub fn stencil_at(&self, x: u32, y: u32) -> u8 {
        self.stencil[self.index(x, y)]
    }

    pub fn set_stencil(&mut self, x: u32, y: u32, value: u8) {
        let index = self.index(x, y);
        self.stencil[index] = value;
    }

    pub fn fill(&mut self, rgba: [f32; 4]) {
        for y in 0..self.height {
            for x in 0..self.width {
                self.write(x, y, rgba, ColorWriteMask::all());
            }
        }
    }

    /// Tightly packed bytes in the device layout of `format`.
    pub fn to_bytes(&self) -> Vec<u8> {
        if !self.format.is_depth() {
            return self.texels.clone();
        }
        let bytes = self.format.info().bytes as usize;
        let mut out = Vec::with_capacity(self.depth.len() * bytes);
        for (depth, stencil) in self.depth.iter().zip(&self.stencil) {
            if bytes == 2 {
                let raw = (depth.clamp(0.0, 1.0) * 65535.0 + 0.5) as u16;
                out.extend_from_slice(&raw.to_le_bytes());
            } else {
                let raw = (depth.clamp(0.0, 1.0) * 16_777_215.0 + 0.5) as u32
                    | (u32::from(*stencil) << 24);
                out.extend_from_slice(&raw.to_le_bytes());
            }
        }
        out
    }

    fn store_depth_texel(&mut self, index: usize, bytes: &[u8]) {
        if bytes.len() == 2 {
            self.depth[index] = f32::from(u16::from_le_bytes([bytes[0], bytes[1]])) / 65535.0;
        } else {
            let raw = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            self.depth[index] = (raw & 0x00FF_FFFF) as f32 / 16_777_215.0;
            self.stencil[index] = (raw >> 24) as u8;
        }
    }

    fn full_box(&self) -> SubresourceBox {
        SubresourceBox::new(0, 0, self.width, self.height)
    }

    /// Uploads `data` (rows `row_pitch` bytes apart) into `region`.
    pub fn upload(
        &mut self,
        region: Option<SubresourceBox>,
        data: &[u8],
        row_pitch: u32,
    ) -> Result<(), DeviceError> {
        let region = region.unwrap_or_else(|| self.full_box());
        self.check_box(&region)?;
        let info = self.format.info();
        let block_rows = region.height().div_ceil(info.block_height) as usize;
        let row_bytes = self.format.row_pitch(region.width()) as usize;
        let needed = row_pitch as usize * block_rows.saturating_sub(1) + row_bytes;
        if block_rows > 0 && data.len() < needed {
            return Err(DeviceError::InvalidArgument(format!(
                "upload needs {needed} bytes, got {}",
                data.len()
            )));
        }

        let texel_bytes = info.bytes as usize;
        for row in 0..block_rows {
            let src = &data[row * row_pitch as usize..row * row_pitch as usize + row_bytes];
            let block_y = region.top / info.block_height + row as u32;
            if self.format.is_depth() {
                for (i, texel) in src.chunks_exact(texel_bytes).enumerate() {
                    let index = self.index(region.left + i as u32, block_y);
                    self.store_depth_texel(index, texel);
                }
            } else {
                let pitch = self.format.row_pitch(self.width) as usize;
                let start = block_y as usize * pitch + self.format.row_pitch(region.left) as usize;
                self.texels[start..start + row_bytes].copy_from_slice(src);
            }
        }
        Ok(())
    }

    pub fn check_box(&self, region: &SubresourceBox) -> Result<(), DeviceError> {
        if region.left > region.right
            || region.top > region.bottom
            || region.right > self.width
            || region.bottom > self.height
        {
            return Err(DeviceError::InvalidArgument(format!(
                "box {region:?} outside {}x{} subresource",
                self.width, self.height
            )));
        }
        Ok(())
    }

    /// Copies `region` of `src` to (dst_x, dst_y). Formats must share a texel layout.
    pub fn copy_from(
        &mut self,
        dst_x: u32,
        dst_y: u32,
        src: &Image,
        region: Option<SubresourceBox>,
    ) -> Result<(), DeviceError> {
        let region = region.unwrap_or_else(|| src.full_box());
        src.check_box(&region)?;
        self.check_box(&SubresourceBox::new(
            dst_x,
            dst_y,
            dst_x + region.width(),
            dst_y + region.height(),
        ))?;

        if src.format.is_depth() != self.format.is_depth()
            || src.format.info().bytes != self.format.info().bytes
        {
            return Err(DeviceError::InvalidArgument(format!(
                "cannot copy {:?} into {:?}",
                src.format, self.format
            )));
        }

        if self.format.is_depth() {
            for y in 0..region.height() {
                for x in 0..region.width() {
                    let from = src.index(region.left + x, region.top + y);
                    let to = self.index(dst_x + x, dst_y + y);
                    self.depth[to] = src.depth[from];
                    self.stencil[to] = src.stencil[from];
                }
            }
            return Ok(());
        }

        let info = self.format.info();
        let row_bytes = self.format.row_pitch(region.width()) as usize;
        let src_pitch = src.format.row_pitch(src.width) as usize;
        let dst_pitch = self.format.row_pitch(self.width) as usize;
        for row in 0..region.height().div_ceil(info.block_height) {
            let src_start = ((region.top / info.block_height + row) as usize) * src_pitch
                + src.format.row_pitch(region.left) as usize;
            let dst_start = ((dst_y / info.block_height + row) as usize) * dst_pitch
                + self.format.row_pitch(dst_x) as usize;
            self.texels[dst_start..dst_start + row_bytes]
                .copy_from_slice(&src.texels[src_start..src_start + row_bytes]);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn masked_write_keeps_disabled_channels() {
        let mut image = Image::new(DxgiFormat::R8G8B8A8Unorm, 1, 1);
        image.fill([0.0, 0.0, 0.0, 1.0]);
        image.write(0, 0, [1.0, 1.0, 1.0, 0.0], ColorWriteMask::RED | ColorWriteMask::BLUE);
        assert_eq!(image.texels, vec![255, 0, 255, 255]);
    }

    #[test]
    fn depth_stencil_bytes_pack_stencil_in_the_top_byte() {
        let mut image = Image::new(DxgiFormat::D24UnormS8Uint, 1, 1);
        image.set_depth(0, 0, 1.0);
        image.set_stencil(0, 0, 0x5A);
        assert_eq!(image.to_bytes(), vec![0xFF, 0xFF, 0xFF, 0x5A]);

        let mut copy = Image::new(DxgiFormat::R24G8Typeless, 1, 1);
        copy.upload(None, &image.to_bytes(), 4).unwrap();
        assert_eq!(copy.stencil_at(0, 0), 0x5A);
        assert_eq!(copy.depth_at(0, 0), 1.0);
    }

    #[test]
    fn region_copy_moves_only_the_box() {
        let mut src = Image::new(DxgiFormat::R8Unorm, 4, 1);
        src.upload(None, &[1, 2, 3, 4], 4).unwrap();
        let mut dst = Image::new(DxgiFormat::R8Unorm, 4, 1);
        dst.copy_from(0, 0, &src, Some(SubresourceBox::new(2, 0, 4, 1))).unwrap();
        assert_eq!(dst.texels, vec![3, 4, 0, 0]);
    }

    #[test]
    fn out_of_bounds_boxes_are_rejected() {
        let src = Image::new(DxgiFormat::R8Unorm, 2, 2);
        let mut dst = Image::new(DxgiFormat::R8Unorm, 2, 2);
        assert!(dst
            .copy_from(1, 1, &src, Some(SubresourceBox::new(0, 0, 2, 2)))
            .is_err());
    }
}
