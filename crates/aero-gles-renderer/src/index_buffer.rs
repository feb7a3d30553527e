//! Growable scratch index buffer for synthesized indices.
//!
//! Writes append at a moving cursor. A request that does not fit behind the cursor wraps to
//! the start of the buffer (the device orphans the old contents); a request larger than the
//! whole buffer reallocates at `max(request, 2 * size)`. Every reallocation gets a fresh serial
//! so the state cache notices the binding changed.

use tracing::debug;

use crate::device::{BindFlags, BufferDesc, BufferHandle, DeviceError, GpuDevice, IndexFormat};
use crate::error::RendererError;
use crate::state_cache::issue_serial;

#[derive(Debug)]
pub struct StreamingIndexBuffer {
    initial_size: u32,
    buffer: Option<BufferHandle>,
    size: u32,
    write_position: u32,
    format: IndexFormat,
    serial: u64,
}

fn map_failure(err: DeviceError) -> RendererError {
    match err {
        DeviceError::DeviceRemoved(_) => RendererError::DeviceLost,
        other => RendererError::OutOfMemory(format!("failed to map index buffer: {other}")),
    }
}

impl StreamingIndexBuffer {
    pub fn new(initial_size: u32) -> Self {
        Self {
            initial_size: initial_size.max(4),
            buffer: None,
            size: 0,
            write_position: 0,
            format: IndexFormat::Uint16,
            serial: 0,
        }
    }

    pub fn buffer(&self) -> Option<&BufferHandle> {
        self.buffer.as_ref()
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    pub fn format(&self) -> IndexFormat {
        self.format
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    pub fn write_position(&self) -> u32 {
        self.write_position
    }

    /// Drops the device buffer; the next reservation allocates a new one.
    pub fn release(&mut self) {
        self.buffer = None;
        self.size = 0;
        self.write_position = 0;
    }

    /// Makes room for `required` bytes of `format` indices behind the cursor.
    pub fn reserve(
        &mut self,
        device: &mut dyn GpuDevice,
        required: u32,
        format: IndexFormat,
    ) -> Result<(), RendererError> {
        let stale = self
            .buffer
            .as_ref()
            .is_some_and(|buffer| buffer.device_id() != device.device_id());
        if self.buffer.is_none() || stale || format != self.format || required > self.size {
            let grown = if self.buffer.is_none() || stale {
                required.max(self.initial_size)
            } else {
                required.max(self.size.saturating_mul(2))
            };
            let buffer = device
                .create_buffer(&BufferDesc {
                    size: grown,
                    bind: BindFlags::INDEX_BUFFER,
                })
                .map_err(|err| match err {
                    DeviceError::DeviceRemoved(_) => RendererError::DeviceLost,
                    other => RendererError::OutOfMemory(format!(
                        "failed to allocate a {grown} byte index buffer: {other}"
                    )),
                })?;
            debug!(size = grown, ?format, "allocated streaming index buffer");
            self.buffer = Some(buffer);
            self.size = grown;
            self.format = format;
            self.write_position = 0;
            self.serial = issue_serial();
        } else if self.write_position.saturating_add(required) > self.size {
            self.write_position = 0;
        }
        Ok(())
    }

    /// Copies `bytes` to the cursor and returns the byte offset they landed at.
    ///
    /// The caller must have reserved at least `bytes.len()`.
    pub fn write(&mut self, device: &mut dyn GpuDevice, bytes: &[u8]) -> Result<u32, RendererError> {
        let buffer = self
            .buffer
            .as_ref()
            .ok_or_else(|| RendererError::OutOfMemory("index buffer was not reserved".to_owned()))?;
        let len = u32::try_from(bytes.len())
            .map_err(|_| RendererError::OutOfMemory(format!("{} index bytes", bytes.len())))?;
        if self.write_position.saturating_add(len) > self.size {
            return Err(RendererError::OutOfMemory(format!(
                "{len} index bytes do not fit behind offset {} of {}",
                self.write_position, self.size
            )));
        }
        let offset = self.write_position;
        device.write_buffer(buffer, offset, bytes).map_err(map_failure)?;
        self.write_position += len;
        Ok(offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::soft::{SoftwareDeviceFactory, SoftwareDeviceOptions};
    use crate::device::{DeviceFactory, DeviceRequest, FeatureLevel};

    fn device(options: SoftwareDeviceOptions) -> Box<dyn GpuDevice> {
        SoftwareDeviceFactory::new(options)
            .create_device(&DeviceRequest {
                feature_levels: FeatureLevel::requested(true),
                debug_layer: false,
            })
            .unwrap()
    }

    #[test]
    fn appends_until_full_then_wraps() {
        let mut device = device(SoftwareDeviceOptions::default());
        let mut ib = StreamingIndexBuffer::new(16);

        ib.reserve(device.as_mut(), 8, IndexFormat::Uint16).unwrap();
        let serial = ib.serial();
        assert_eq!(ib.write(device.as_mut(), &[1; 8]).unwrap(), 0);
        ib.reserve(device.as_mut(), 6, IndexFormat::Uint16).unwrap();
        assert_eq!(ib.write(device.as_mut(), &[2; 6]).unwrap(), 8);

        ib.reserve(device.as_mut(), 4, IndexFormat::Uint16).unwrap();
        assert_eq!(ib.write_position(), 0);
        assert_eq!(ib.serial(), serial);
        assert_eq!(ib.size(), 16);
    }

    #[test]
    fn oversized_requests_grow_to_at_least_double() {
        let mut device = device(SoftwareDeviceOptions::default());
        let mut ib = StreamingIndexBuffer::new(16);
        ib.reserve(device.as_mut(), 4, IndexFormat::Uint16).unwrap();
        let first = ib.serial();

        ib.reserve(device.as_mut(), 20, IndexFormat::Uint16).unwrap();
        assert_eq!(ib.size(), 32);
        assert_ne!(ib.serial(), first);

        ib.reserve(device.as_mut(), 100, IndexFormat::Uint16).unwrap();
        assert_eq!(ib.size(), 100);
    }

    #[test]
    fn changing_index_width_reallocates() {
        let mut device = device(SoftwareDeviceOptions::default());
        let mut ib = StreamingIndexBuffer::new(64);
        ib.reserve(device.as_mut(), 4, IndexFormat::Uint16).unwrap();
        let first = ib.serial();
        ib.reserve(device.as_mut(), 4, IndexFormat::Uint32).unwrap();
        assert_eq!(ib.format(), IndexFormat::Uint32);
        assert_ne!(ib.serial(), first);
    }

    #[test]
    fn allocation_failure_is_out_of_memory() {
        let mut device = device(SoftwareDeviceOptions {
            max_buffer_bytes: Some(64),
            ..SoftwareDeviceOptions::default()
        });
        let mut ib = StreamingIndexBuffer::new(16);
        assert!(matches!(
            ib.reserve(device.as_mut(), 128, IndexFormat::Uint32),
            Err(RendererError::OutOfMemory(_))
        ));
    }

    #[test]
    fn buffers_from_a_previous_device_are_replaced() {
        let factory = SoftwareDeviceFactory::new(SoftwareDeviceOptions::default());
        let request = DeviceRequest {
            feature_levels: FeatureLevel::requested(true),
            debug_layer: false,
        };
        let mut first = factory.create_device(&request).unwrap();
        let mut ib = StreamingIndexBuffer::new(16);
        ib.reserve(first.as_mut(), 4, IndexFormat::Uint16).unwrap();

        let mut second = factory.create_device(&request).unwrap();
        ib.reserve(second.as_mut(), 4, IndexFormat::Uint16).unwrap();
        assert_eq!(
            ib.buffer().map(|b| b.device_id()),
            Some(second.device_id())
        );
        ib.write(second.as_mut(), &[0; 4]).unwrap();
    }
}
