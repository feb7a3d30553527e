//! GL primitive modes and the index synthesis for modes the device lacks.
//!
//! Line loops become a line strip with the first vertex repeated at the end; triangle fans
//! become a triangle list of `count - 2` triangles around vertex 0.

use crate::device::{IndexFormat, PrimitiveTopology};
use crate::error::RendererError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrimitiveMode {
    Points,
    Lines,
    LineLoop,
    LineStrip,
    Triangles,
    TriangleStrip,
    TriangleFan,
}

impl PrimitiveMode {
    /// Device topology and the vertex count below which nothing is drawn.
    pub fn topology(self) -> (PrimitiveTopology, u32) {
        match self {
            Self::Points => (PrimitiveTopology::PointList, 1),
            Self::Lines => (PrimitiveTopology::LineList, 2),
            Self::LineLoop | Self::LineStrip => (PrimitiveTopology::LineStrip, 2),
            Self::Triangles => (PrimitiveTopology::TriangleList, 3),
            Self::TriangleStrip => (PrimitiveTopology::TriangleStrip, 3),
            Self::TriangleFan => (PrimitiveTopology::TriangleList, 3),
        }
    }

    pub fn is_triangles(self) -> bool {
        matches!(
            self,
            Self::Triangles | Self::TriangleStrip | Self::TriangleFan
        )
    }

    pub fn is_emulated(self) -> bool {
        matches!(self, Self::LineLoop | Self::TriangleFan)
    }
}

/// Client index data of an indexed draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexData<'a> {
    U8(&'a [u8]),
    U16(&'a [u16]),
    U32(&'a [u32]),
}

impl IndexData<'_> {
    pub fn len(&self) -> usize {
        match self {
            Self::U8(v) => v.len(),
            Self::U16(v) => v.len(),
            Self::U32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, i: usize) -> u32 {
        match self {
            Self::U8(v) => u32::from(v[i]),
            Self::U16(v) => u32::from(v[i]),
            Self::U32(v) => v[i],
        }
    }

    /// Smallest and largest index among the first `count`.
    pub fn range(&self, count: usize) -> Option<(u32, u32)> {
        (0..count.min(self.len())).map(|i| self.get(i)).fold(None, |acc, index| {
            Some(match acc {
                None => (index, index),
                Some((lo, hi)) => (lo.min(index), hi.max(index)),
            })
        })
    }

    /// Device index format these indices are streamed as; bytes widen to 16 bits.
    pub fn device_format(&self) -> IndexFormat {
        match self {
            Self::U8(_) | Self::U16(_) => IndexFormat::Uint16,
            Self::U32(_) => IndexFormat::Uint32,
        }
    }
}

fn write_index(out: &mut [u8], slot: usize, value: u32, format: IndexFormat) -> Result<(), RendererError> {
    match format {
        IndexFormat::Uint16 => {
            let value = u16::try_from(value).map_err(|_| {
                RendererError::OutOfMemory(format!("index {value} does not fit a 16-bit index buffer"))
            })?;
            out[slot * 2..slot * 2 + 2].copy_from_slice(&value.to_le_bytes());
        }
        IndexFormat::Uint32 => out[slot * 4..slot * 4 + 4].copy_from_slice(&value.to_le_bytes()),
    }
    Ok(())
}

fn source_index(indices: Option<&IndexData<'_>>, i: usize) -> u32 {
    match indices {
        Some(data) => data.get(i),
        None => i as u32,
    }
}

/// Bytes of index data a line loop over `count` vertices needs.
pub fn line_loop_size(count: u32, format: IndexFormat) -> Result<u32, RendererError> {
    count
        .checked_add(1)
        .and_then(|n| n.checked_mul(format.size()))
        .ok_or_else(|| {
            RendererError::OutOfMemory(format!(
                "a line loop of {count} vertices needs too many indices"
            ))
        })
}

/// Bytes of index data a triangle fan over `count` vertices needs.
pub fn triangle_fan_size(count: u32, format: IndexFormat) -> Result<u32, RendererError> {
    count
        .saturating_sub(2)
        .checked_mul(3)
        .and_then(|n| n.checked_mul(format.size()))
        .ok_or_else(|| {
            RendererError::OutOfMemory(format!(
                "a triangle fan of {count} vertices needs too many indices"
            ))
        })
}

/// Writes `count + 1` indices: the loop's vertices then the first one again.
pub fn fill_line_loop(
    count: u32,
    indices: Option<&IndexData<'_>>,
    format: IndexFormat,
    out: &mut [u8],
) -> Result<(), RendererError> {
    let count = count as usize;
    if count == 0 {
        return Ok(());
    }
    for i in 0..count {
        write_index(out, i, source_index(indices, i), format)?;
    }
    write_index(out, count, source_index(indices, 0), format)
}

/// Writes `3 * (count - 2)` indices, triangle `i` being `(0, i + 1, i + 2)`.
pub fn fill_triangle_fan(
    count: u32,
    indices: Option<&IndexData<'_>>,
    format: IndexFormat,
    out: &mut [u8],
) -> Result<(), RendererError> {
    let triangles = count.saturating_sub(2) as usize;
    for i in 0..triangles {
        write_index(out, i * 3, source_index(indices, 0), format)?;
        write_index(out, i * 3 + 1, source_index(indices, i + 1), format)?;
        write_index(out, i * 3 + 2, source_index(indices, i + 2), format)?;
    }
    Ok(())
}

/// Streams client indices as `format`, widening bytes to 16 bits.
pub fn fill_indices(
    count: u32,
    indices: &IndexData<'_>,
    format: IndexFormat,
    out: &mut [u8],
) -> Result<(), RendererError> {
    for i in 0..count as usize {
        write_index(out, i, indices.get(i), format)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn decode(bytes: &[u8], format: IndexFormat) -> Vec<u32> {
        match format {
            IndexFormat::Uint16 => bytes
                .chunks_exact(2)
                .map(|c| u32::from(u16::from_le_bytes([c[0], c[1]])))
                .collect(),
            IndexFormat::Uint32 => bytes
                .chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
                .collect(),
        }
    }

    #[test]
    fn line_loop_closes_on_the_first_vertex() {
        let size = line_loop_size(4, IndexFormat::Uint32).unwrap();
        let mut out = vec![0; size as usize];
        fill_line_loop(4, None, IndexFormat::Uint32, &mut out).unwrap();
        assert_eq!(decode(&out, IndexFormat::Uint32), vec![0, 1, 2, 3, 0]);
    }

    #[test]
    fn indexed_line_loop_repeats_the_first_client_index() {
        let client = [7u8, 3, 9];
        let mut out = vec![0; line_loop_size(3, IndexFormat::Uint16).unwrap() as usize];
        fill_line_loop(3, Some(&IndexData::U8(&client)), IndexFormat::Uint16, &mut out).unwrap();
        assert_eq!(decode(&out, IndexFormat::Uint16), vec![7, 3, 9, 7]);
    }

    #[test]
    fn fan_expands_to_triangles_around_vertex_zero() {
        let mut out = vec![0; triangle_fan_size(5, IndexFormat::Uint16).unwrap() as usize];
        fill_triangle_fan(5, None, IndexFormat::Uint16, &mut out).unwrap();
        assert_eq!(
            decode(&out, IndexFormat::Uint16),
            vec![0, 1, 2, 0, 2, 3, 0, 3, 4]
        );
    }

    #[test]
    fn oversized_requests_are_out_of_memory() {
        assert!(matches!(
            line_loop_size(u32::MAX, IndexFormat::Uint16),
            Err(RendererError::OutOfMemory(_))
        ));
        assert!(matches!(
            triangle_fan_size(u32::MAX / 2, IndexFormat::Uint32),
            Err(RendererError::OutOfMemory(_))
        ));
        let client = [70_000u32, 1, 2];
        let mut out = vec![0; 8];
        assert!(matches!(
            fill_line_loop(3, Some(&IndexData::U32(&client)), IndexFormat::Uint16, &mut out),
            Err(RendererError::OutOfMemory(_))
        ));
    }

    #[test]
    fn minimum_counts_follow_the_primitive() {
        assert_eq!(PrimitiveMode::Points.topology().1, 1);
        assert_eq!(PrimitiveMode::LineLoop.topology(), (PrimitiveTopology::LineStrip, 2));
        assert_eq!(PrimitiveMode::TriangleFan.topology(), (PrimitiveTopology::TriangleList, 3));
    }

    proptest! {
        #[test]
        fn fans_reference_the_hub_and_consecutive_ring_vertices(count in 3u32..200) {
            let mut out = vec![0; triangle_fan_size(count, IndexFormat::Uint32).unwrap() as usize];
            fill_triangle_fan(count, None, IndexFormat::Uint32, &mut out).unwrap();
            let indices = decode(&out, IndexFormat::Uint32);
            prop_assert_eq!(indices.len() as u32, (count - 2) * 3);
            for (i, tri) in indices.chunks_exact(3).enumerate() {
                prop_assert_eq!(tri, &[0, i as u32 + 1, i as u32 + 2][..]);
            }
        }
    }
}
