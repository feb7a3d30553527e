//! Quad rasterization for the built-in programs.
//!
//! Built-in draws are always a four-vertex strip covering an axis-aligned rectangle, so
//! attributes interpolate separably: the first attribute pair along x, the second along y.
//! Blend equations are not evaluated; the color write mask is.

use bytemuck::pod_read_unaligned;

use super::image::Image;
use crate::device::{
    AddressMode, BuiltinProgram, ComparisonFunc, DeviceError, FilterMode, PositionDepthColorVertex,
    PositionTexCoordVertex, SamplerDesc, ScissorRect, StencilOp, Viewport,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Quad {
    pub left: f32,
    pub right: f32,
    pub bottom: f32,
    pub top: f32,
    /// Texture coordinates at `left`/`right` and at `bottom`/`top`.
    pub u: (f32, f32),
    pub v: (f32, f32),
    pub depth: f32,
    pub color: [f32; 4],
}

struct Corner {
    x: f32,
    y: f32,
    z: f32,
    u: f32,
    v: f32,
    color: [f32; 4],
}

fn corners(program: BuiltinProgram, bytes: &[u8], stride: usize) -> Vec<Corner> {
    bytes
        .chunks_exact(stride)
        .take(4)
        .map(|chunk| {
            if program.is_clear() {
                let v: PositionDepthColorVertex =
                    pod_read_unaligned(&chunk[..std::mem::size_of::<PositionDepthColorVertex>()]);
                Corner {
                    x: v.x,
                    y: v.y,
                    z: v.z,
                    u: 0.0,
                    v: 0.0,
                    color: [v.r, v.g, v.b, v.a],
                }
            } else {
                let v: PositionTexCoordVertex =
                    pod_read_unaligned(&chunk[..std::mem::size_of::<PositionTexCoordVertex>()]);
                Corner {
                    x: v.x,
                    y: v.y,
                    z: 0.0,
                    u: v.u,
                    v: v.v,
                    color: [0.0; 4],
                }
            }
        })
        .collect()
}

/// Reads the four strip vertices of a built-in draw.
pub(crate) fn quad_from_vertices(
    program: BuiltinProgram,
    bytes: &[u8],
    stride: u32,
) -> Result<Quad, DeviceError> {
    let stride = stride as usize;
    if stride < program.vertex_stride() as usize || bytes.len() < stride * 4 {
        return Err(DeviceError::InvalidArgument(format!(
            "{program:?} needs 4 vertices of {} bytes",
            program.vertex_stride()
        )));
    }
    let corners = corners(program, bytes, stride);

    let left = corners.iter().map(|c| c.x).fold(f32::INFINITY, f32::min);
    let right = corners.iter().map(|c| c.x).fold(f32::NEG_INFINITY, f32::max);
    let bottom = corners.iter().map(|c| c.y).fold(f32::INFINITY, f32::min);
    let top = corners.iter().map(|c| c.y).fold(f32::NEG_INFINITY, f32::max);
    let at_x = |x: f32| corners.iter().find(|c| c.x == x).map_or(0.0, |c| c.u);
    let at_y = |y: f32| corners.iter().find(|c| c.y == y).map_or(0.0, |c| c.v);

    Ok(Quad {
        left,
        right,
        bottom,
        top,
        u: (at_x(left), at_x(right)),
        v: (at_y(bottom), at_y(top)),
        depth: corners[0].z,
        color: corners[0].color,
    })
}

/// A covered pixel and the interpolated texture coordinate at its center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct Fragment {
    pub x: u32,
    pub y: u32,
    pub u: f32,
    pub v: f32,
}

fn lerp((a, b): (f32, f32), t: f32) -> f32 {
    a + (b - a) * t
}

/// Pixels of a `target_width` x `target_height` target whose centers fall inside the quad.
pub(crate) fn rasterize(
    quad: &Quad,
    viewport: &Viewport,
    scissor: Option<&ScissorRect>,
    target_width: u32,
    target_height: u32,
) -> Vec<Fragment> {
    if viewport.width <= 0.0 || viewport.height <= 0.0 {
        return Vec::new();
    }
    let mut x_range = (
        viewport.x.max(0.0).floor() as i64,
        ((viewport.x + viewport.width).ceil() as i64).min(i64::from(target_width)),
    );
    let mut y_range = (
        viewport.y.max(0.0).floor() as i64,
        ((viewport.y + viewport.height).ceil() as i64).min(i64::from(target_height)),
    );
    if let Some(rect) = scissor {
        x_range = (x_range.0.max(i64::from(rect.left)), x_range.1.min(i64::from(rect.right)));
        y_range = (y_range.0.max(i64::from(rect.top)), y_range.1.min(i64::from(rect.bottom)));
    }

    let quad_width = quad.right - quad.left;
    let quad_height = quad.top - quad.bottom;
    let mut fragments = Vec::new();
    for py in y_range.0..y_range.1 {
        let ndc_y = 1.0 - ((py as f32 + 0.5 - viewport.y) / viewport.height) * 2.0;
        if ndc_y < quad.bottom || ndc_y >= quad.top {
            continue;
        }
        let ty = if quad_height > 0.0 {
            (ndc_y - quad.bottom) / quad_height
        } else {
            0.0
        };
        for px in x_range.0..x_range.1 {
            let ndc_x = ((px as f32 + 0.5 - viewport.x) / viewport.width) * 2.0 - 1.0;
            if ndc_x < quad.left || ndc_x >= quad.right {
                continue;
            }
            let tx = if quad_width > 0.0 {
                (ndc_x - quad.left) / quad_width
            } else {
                0.0
            };
            fragments.push(Fragment {
                x: px as u32,
                y: py as u32,
                u: lerp(quad.u, tx),
                v: lerp(quad.v, ty),
            });
        }
    }
    fragments
}

fn address(coord: i64, size: u32, mode: AddressMode) -> u32 {
    let size = i64::from(size);
    let wrapped = match mode {
        AddressMode::Clamp => coord.clamp(0, size - 1),
        AddressMode::Wrap => coord.rem_euclid(size),
        AddressMode::Mirror => {
            let period = coord.rem_euclid(size * 2);
            if period < size {
                period
            } else {
                size * 2 - 1 - period
            }
        }
    };
    wrapped as u32
}

/// Samples level `image` at normalized (u, v).
pub(crate) fn sample(image: &Image, sampler: &SamplerDesc, u: f32, v: f32) -> [f32; 4] {
    let x = u * image.width as f32;
    let y = v * image.height as f32;
    let fetch = |tx: i64, ty: i64| {
        image.read(
            address(tx, image.width, sampler.address_u),
            address(ty, image.height, sampler.address_v),
        )
    };

    match sampler.mag_filter {
        FilterMode::Point => fetch(x.floor() as i64, y.floor() as i64),
        FilterMode::Linear => {
            let (fx, fy) = (x - 0.5, y - 0.5);
            let (x0, y0) = (fx.floor(), fy.floor());
            let (ax, ay) = (fx - x0, fy - y0);
            let (x0, y0) = (x0 as i64, y0 as i64);
            let t00 = fetch(x0, y0);
            let t10 = fetch(x0 + 1, y0);
            let t01 = fetch(x0, y0 + 1);
            let t11 = fetch(x0 + 1, y0 + 1);
            let mut out = [0.0; 4];
            for c in 0..4 {
                let top = t00[c] + (t10[c] - t00[c]) * ax;
                let bottom = t01[c] + (t11[c] - t01[c]) * ax;
                out[c] = top + (bottom - top) * ay;
            }
            out
        }
    }
}

/// Output of a copy program for a sampled texel.
pub(crate) fn shade_copy(program: BuiltinProgram, texel: [f32; 4]) -> [f32; 4] {
    let [r, g, b, a] = texel;
    match program {
        BuiltinProgram::CopyRgb => [r, g, b, 1.0],
        BuiltinProgram::CopyLum => [r, r, r, 1.0],
        BuiltinProgram::CopyLumAlpha => [r, r, r, a],
        BuiltinProgram::CopyRgba | BuiltinProgram::ClearSingle | BuiltinProgram::ClearMultiple => {
            texel
        }
    }
}

pub(crate) fn compare<T: PartialOrd>(func: ComparisonFunc, incoming: T, stored: T) -> bool {
    match func {
        ComparisonFunc::Never => false,
        ComparisonFunc::Less => incoming < stored,
        ComparisonFunc::Equal => incoming == stored,
        ComparisonFunc::LessEqual => incoming <= stored,
        ComparisonFunc::Greater => incoming > stored,
        ComparisonFunc::NotEqual => incoming != stored,
        ComparisonFunc::GreaterEqual => incoming >= stored,
        ComparisonFunc::Always => true,
    }
}

pub(crate) fn apply_stencil_op(op: StencilOp, value: u8, reference: u8) -> u8 {
    match op {
        StencilOp::Keep => value,
        StencilOp::Zero => 0,
        StencilOp::Replace => reference,
        StencilOp::IncrSat => value.saturating_add(1),
        StencilOp::DecrSat => value.saturating_sub(1),
        StencilOp::Invert => !value,
        StencilOp::Incr => value.wrapping_add(1),
        StencilOp::Decr => value.wrapping_sub(1),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aero_gles_formats::DxgiFormat;
    use pretty_assertions::assert_eq;

    fn full_screen_copy() -> Vec<u8> {
        let vertices = [
            PositionTexCoordVertex { x: -1.0, y: -1.0, u: 0.0, v: 1.0 },
            PositionTexCoordVertex { x: -1.0, y: 1.0, u: 0.0, v: 0.0 },
            PositionTexCoordVertex { x: 1.0, y: -1.0, u: 1.0, v: 1.0 },
            PositionTexCoordVertex { x: 1.0, y: 1.0, u: 1.0, v: 0.0 },
        ];
        bytemuck::cast_slice(&vertices).to_vec()
    }

    #[test]
    fn full_screen_quad_covers_every_pixel_once() {
        let quad = quad_from_vertices(BuiltinProgram::CopyRgba, &full_screen_copy(), 16).unwrap();
        let fragments = rasterize(&quad, &Viewport::full(4, 2), None, 4, 2);
        assert_eq!(fragments.len(), 8);
        // Row 0 is the top of the target and samples v near 0.
        assert_eq!((fragments[0].x, fragments[0].y), (0, 0));
        assert!((fragments[0].u - 0.125).abs() < 1e-6);
        assert!((fragments[0].v - 0.25).abs() < 1e-6);
    }

    #[test]
    fn scissor_limits_coverage() {
        let quad = quad_from_vertices(BuiltinProgram::CopyRgba, &full_screen_copy(), 16).unwrap();
        let scissor = ScissorRect { left: 1, top: 0, right: 3, bottom: 1 };
        let fragments = rasterize(&quad, &Viewport::full(4, 2), Some(&scissor), 4, 2);
        let covered: Vec<_> = fragments.iter().map(|f| (f.x, f.y)).collect();
        assert_eq!(covered, vec![(1, 0), (2, 0)]);
    }

    #[test]
    fn point_sampling_picks_the_containing_texel() {
        let mut image = Image::new(DxgiFormat::R8Unorm, 2, 1);
        image.upload(None, &[0, 255], 2).unwrap();
        let sampler = SamplerDesc::clamped(FilterMode::Point);
        assert_eq!(sample(&image, &sampler, 0.25, 0.5)[0], 0.0);
        assert_eq!(sample(&image, &sampler, 0.75, 0.5)[0], 1.0);
        let linear = SamplerDesc::clamped(FilterMode::Linear);
        assert!((sample(&image, &linear, 0.5, 0.5)[0] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn copy_programs_reshape_channels() {
        let texel = [0.2, 0.4, 0.6, 0.8];
        assert_eq!(shade_copy(BuiltinProgram::CopyRgb, texel), [0.2, 0.4, 0.6, 1.0]);
        assert_eq!(shade_copy(BuiltinProgram::CopyLum, texel), [0.2, 0.2, 0.2, 1.0]);
        assert_eq!(shade_copy(BuiltinProgram::CopyLumAlpha, texel), [0.2, 0.2, 0.2, 0.8]);
    }

    #[test]
    fn stencil_ops_saturate_or_wrap() {
        assert_eq!(apply_stencil_op(StencilOp::IncrSat, 255, 0), 255);
        assert_eq!(apply_stencil_op(StencilOp::Incr, 255, 0), 0);
        assert_eq!(apply_stencil_op(StencilOp::Replace, 3, 9), 9);
        assert!(compare(ComparisonFunc::LessEqual, 0.5, 0.5));
    }
}
