//! Vertex input and draw submission, including the index synthesis for line loops and
//! triangle fans.

use tracing::trace;

use crate::device::{BindFlags, BufferDesc, BufferHandle, DeviceError, GpuDevice, IndexFormat};
use crate::error::RendererError;
use crate::index_buffer::StreamingIndexBuffer;
use crate::state_cache::{issue_serial, AppliedBuffer, StateCache};
use crate::stats::RendererStats;
use crate::topology::{
    fill_indices, fill_line_loop, fill_triangle_fan, line_loop_size, triangle_fan_size, IndexData,
    PrimitiveMode,
};

use super::{live_device, Renderer};

/// Client vertex data uploaded to a device buffer.
#[derive(Debug, Clone)]
pub struct VertexBuffer {
    handle: BufferHandle,
    serial: u64,
    size: u32,
}

impl VertexBuffer {
    pub fn handle(&self) -> &BufferHandle {
        &self.handle
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn size(&self) -> u32 {
        self.size
    }
}

fn buffer_failure(what: &str, err: DeviceError) -> RendererError {
    match err {
        DeviceError::DeviceRemoved(_) => RendererError::DeviceLost,
        other => RendererError::OutOfMemory(format!("{what}: {other}")),
    }
}

/// Streams `bytes` of `format` indices into `buffer`, binds it when it is not the current
/// index buffer and returns the first index of the written range.
fn stream_indices(
    device: &mut dyn GpuDevice,
    cache: &mut StateCache,
    buffer: &mut StreamingIndexBuffer,
    bytes: &[u8],
    format: IndexFormat,
) -> Result<u32, RendererError> {
    let len = u32::try_from(bytes.len())
        .map_err(|_| RendererError::OutOfMemory(format!("{} index bytes", bytes.len())))?;
    buffer.reserve(device, len, format)?;
    let offset = buffer.write(device, bytes)?;
    let applied = AppliedBuffer {
        serial: buffer.serial(),
        offset: 0,
        stride: format.size(),
    };
    if !cache.index_buffer_current(&applied, format) {
        device.set_index_buffer(buffer.buffer(), format, 0);
        cache.record_index_buffer(applied, format);
    }
    Ok(offset / format.size())
}

fn note_emulated(stats: &RendererStats, mode: PrimitiveMode, bytes: usize) {
    trace!(?mode, bytes, "emulated primitive indices");
    stats.add_emulated_index_bytes(bytes as u64);
}

impl Renderer {
    pub fn create_vertex_buffer(&mut self, data: &[u8]) -> Result<VertexBuffer, RendererError> {
        let size = u32::try_from(data.len())
            .map_err(|_| RendererError::OutOfMemory(format!("{} byte vertex buffer", data.len())))?;
        if size == 0 {
            return Err(RendererError::InvalidValue("empty vertex buffer".to_owned()));
        }
        let device = self.device_mut()?;
        let handle = device
            .create_buffer(&BufferDesc {
                size,
                bind: BindFlags::VERTEX_BUFFER,
            })
            .map_err(|err| buffer_failure("failed to allocate a vertex buffer", err))?;
        device
            .write_buffer(&handle, 0, data)
            .map_err(|err| buffer_failure("failed to fill a vertex buffer", err))?;
        Ok(VertexBuffer {
            handle,
            serial: issue_serial(),
            size,
        })
    }

    pub fn apply_vertex_buffer(
        &mut self,
        buffer: &VertexBuffer,
        stride: u32,
        offset: u32,
    ) -> Result<(), RendererError> {
        let applied = AppliedBuffer {
            serial: buffer.serial,
            offset,
            stride,
        };
        let device = live_device(&mut self.device, self.device_lost)?;
        if self.cache.vertex_buffer_current(&applied) {
            return Ok(());
        }
        device.set_vertex_buffer(Some(&buffer.handle), stride, offset);
        self.cache.record_vertex_buffer(Some(applied));
        self.stats.inc_state_binds();
        Ok(())
    }

    /// Triangles are skipped entirely when both faces are culled.
    fn culls_draw(&self, mode: PrimitiveMode) -> bool {
        mode.is_triangles()
            && self
                .cache
                .rasterizer()
                .is_some_and(|rasterizer| rasterizer.culls_everything())
    }

    fn emulated_index_format(&self) -> IndexFormat {
        if self.limits.supports_32bit_indices {
            IndexFormat::Uint32
        } else {
            IndexFormat::Uint16
        }
    }

    /// Draws `count` vertices starting at `first`.
    pub fn draw_arrays(&mut self, mode: PrimitiveMode, first: u32, count: u32) -> Result<(), RendererError> {
        if !self.apply_primitive_type(mode, count)? || self.culls_draw(mode) {
            return Ok(());
        }
        if mode.is_emulated() {
            let base_vertex = i32::try_from(first)
                .map_err(|_| RendererError::InvalidValue(format!("first vertex {first}")))?;
            return self.draw_emulated(mode, count, None, base_vertex);
        }
        live_device(&mut self.device, self.device_lost)?.draw(count, first)?;
        Ok(())
    }

    /// Draws the first `count` of `indices`.
    pub fn draw_elements(
        &mut self,
        mode: PrimitiveMode,
        indices: &IndexData<'_>,
        count: u32,
    ) -> Result<(), RendererError> {
        if count as usize > indices.len() {
            return Err(RendererError::InvalidOperation(format!(
                "{count} indices drawn from {} supplied",
                indices.len()
            )));
        }
        if !self.apply_primitive_type(mode, count)? || self.culls_draw(mode) {
            return Ok(());
        }
        if mode.is_emulated() {
            return self.draw_emulated(mode, count, Some(indices), 0);
        }

        let mut format = indices.device_format();
        if format == IndexFormat::Uint32 && !self.limits.supports_32bit_indices {
            match indices.range(count as usize) {
                Some((_, max)) if max > u32::from(u16::MAX) => {
                    return Err(RendererError::InvalidOperation(format!(
                        "index {max} needs 32-bit indices, which {:?} lacks",
                        self.feature_level
                    )));
                }
                _ => format = IndexFormat::Uint16,
            }
        }
        let mut data = vec![0u8; count as usize * format.size() as usize];
        fill_indices(count, indices, format, &mut data)?;

        let device = live_device(&mut self.device, self.device_lost)?;
        let start = stream_indices(device, &mut self.cache, &mut self.element_ib, &data, format)?;
        device.draw_indexed(count, start, 0)?;
        Ok(())
    }

    fn draw_emulated(
        &mut self,
        mode: PrimitiveMode,
        count: u32,
        indices: Option<&IndexData<'_>>,
        base_vertex: i32,
    ) -> Result<(), RendererError> {
        let format = self.emulated_index_format();
        let line_loop = mode == PrimitiveMode::LineLoop;
        let (size, index_count) = if line_loop {
            (line_loop_size(count, format)?, count + 1)
        } else {
            (triangle_fan_size(count, format)?, count.saturating_sub(2) * 3)
        };
        let mut data = vec![0u8; size as usize];
        if line_loop {
            fill_line_loop(count, indices, format, &mut data)?;
        } else {
            fill_triangle_fan(count, indices, format, &mut data)?;
        }

        let device = live_device(&mut self.device, self.device_lost)?;
        let buffer = if line_loop {
            &mut self.line_loop_ib
        } else {
            &mut self.triangle_fan_ib
        };
        let start = stream_indices(device, &mut self.cache, buffer, &data, format)?;
        device.draw_indexed(index_count, start, base_vertex)?;
        note_emulated(&self.stats, mode, data.len());
        Ok(())
    }
}
