//! Observation and fault injection for software devices.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::device::{DeviceError, DeviceRemovedReason, PresentedFrame, PrimitiveTopology, Program};

/// Number of times each device entry point ran, summed over every device of a factory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub blend_state: u32,
    pub rasterizer_state: u32,
    pub depth_stencil_state: u32,
    pub viewport: u32,
    pub scissor_rect: u32,
    pub sampler: u32,
    pub shader_resource: u32,
    pub render_targets: u32,
    pub vertex_buffer: u32,
    pub index_buffer: u32,
    pub primitive_topology: u32,
    pub program: u32,
    pub constant_buffer: u32,
    pub draws: u32,
    pub clear_render_target: u32,
    pub clear_depth_stencil: u32,
    pub copies: u32,
    pub resolves: u32,
    pub textures_created: u32,
    pub swap_chains_created: u32,
    pub swap_chain_resizes: u32,
    pub presents: u32,
    pub flushes: u32,
}

/// An application-program draw; the software device records these instead of shading them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DrawRecord {
    pub device_id: u64,
    pub program: Option<Program>,
    pub topology: PrimitiveTopology,
    pub start_vertex: u32,
    pub vertex_count: u32,
    /// Resolved indices (`base_vertex` already applied) for indexed draws.
    pub indices: Option<Vec<u32>>,
    pub render_targets: usize,
}

/// Live object counts of the most recently created device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LiveResources {
    pub textures: usize,
    pub views: usize,
    pub buffers: usize,
    pub swap_chains: usize,
}

#[derive(Debug, Default)]
struct ProbeState {
    counts: CallCounts,
    devices_created: u32,
    current_device: Option<u64>,
    removed: Vec<(u64, DeviceRemovedReason)>,
    failing_creations: u32,
    failing_present: Option<DeviceError>,
    failing_flush: Option<DeviceError>,
    failing_swap_chain: Option<DeviceError>,
    draws: Vec<DrawRecord>,
    presented: Vec<PresentedFrame>,
    live: LiveResources,
}

/// Shared handle onto what every device of a `SoftwareDeviceFactory` does.
#[derive(Debug, Clone, Default)]
pub struct SoftwareDeviceProbe {
    state: Arc<Mutex<ProbeState>>,
}

impl SoftwareDeviceProbe {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ProbeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn counts(&self) -> CallCounts {
        self.lock().counts
    }

    pub fn reset_counts(&self) {
        self.lock().counts = CallCounts::default();
    }

    pub fn devices_created(&self) -> u32 {
        self.lock().devices_created
    }

    pub fn current_device(&self) -> Option<u64> {
        self.lock().current_device
    }

    /// Removes the most recently created device; later devices are unaffected.
    pub fn remove_device(&self, reason: DeviceRemovedReason) {
        let mut state = self.lock();
        if let Some(device) = state.current_device {
            state.removed.push((device, reason));
        }
    }

    /// The next `count` device creations fail.
    pub fn fail_next_device_creations(&self, count: u32) {
        self.lock().failing_creations = count;
    }

    /// The next present returns `error` instead of presenting.
    pub fn fail_next_present(&self, error: DeviceError) {
        self.lock().failing_present = Some(error);
    }

    /// The next flush returns `error`.
    pub fn fail_next_flush(&self, error: DeviceError) {
        self.lock().failing_flush = Some(error);
    }

    /// The next swap chain creation returns `error`.
    pub fn fail_next_swap_chain(&self, error: DeviceError) {
        self.lock().failing_swap_chain = Some(error);
    }

    pub fn draws(&self) -> Vec<DrawRecord> {
        self.lock().draws.clone()
    }

    pub fn presented(&self) -> Vec<PresentedFrame> {
        self.lock().presented.clone()
    }

    pub fn last_presented(&self) -> Option<PresentedFrame> {
        self.lock().presented.last().cloned()
    }

    pub fn live_resources(&self) -> LiveResources {
        self.lock().live
    }

    pub(super) fn record(&self, f: impl FnOnce(&mut CallCounts)) {
        f(&mut self.lock().counts);
    }

    /// Consumes one injected creation failure, if any.
    pub(super) fn take_creation_failure(&self) -> bool {
        let mut state = self.lock();
        if state.failing_creations > 0 {
            state.failing_creations -= 1;
            return true;
        }
        false
    }

    pub(super) fn device_created(&self, device_id: u64) {
        let mut state = self.lock();
        state.devices_created += 1;
        state.current_device = Some(device_id);
        state.live = LiveResources::default();
    }

    pub(super) fn removed_reason(&self, device_id: u64) -> Option<DeviceRemovedReason> {
        self.lock()
            .removed
            .iter()
            .find(|(device, _)| *device == device_id)
            .map(|(_, reason)| *reason)
    }

    pub(super) fn take_present_failure(&self) -> Option<DeviceError> {
        self.lock().failing_present.take()
    }

    pub(super) fn take_flush_failure(&self) -> Option<DeviceError> {
        self.lock().failing_flush.take()
    }

    pub(super) fn take_swap_chain_failure(&self) -> Option<DeviceError> {
        self.lock().failing_swap_chain.take()
    }

    pub(super) fn push_draw(&self, draw: DrawRecord) {
        self.lock().draws.push(draw);
    }

    pub(super) fn push_presented(&self, frame: PresentedFrame) {
        self.lock().presented.push(frame);
    }

    pub(super) fn set_live(&self, device_id: u64, live: LiveResources) {
        let mut state = self.lock();
        if state.current_device == Some(device_id) {
            state.live = live;
        }
    }
}
