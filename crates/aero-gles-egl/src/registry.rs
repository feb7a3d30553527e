//! Native display handle to [`Display`] lookup.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use hashbrown::HashMap;
use tracing::debug;

use crate::display::{Display, DisplayAttributes};

/// Opaque native display handle (`EGLNativeDisplayType`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NativeDisplayId(pub u64);

/// `EGL_DEFAULT_DISPLAY`.
pub const DEFAULT_DISPLAY: NativeDisplayId = NativeDisplayId(0);

pub type SharedDisplay = Arc<Mutex<Display>>;

pub fn lock_display(display: &SharedDisplay) -> MutexGuard<'_, Display> {
    display.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Displays keyed by native handle. One registry per process is the EGL model; tests make
/// their own.
#[derive(Debug, Default)]
pub struct DisplayRegistry {
    displays: Mutex<HashMap<NativeDisplayId, SharedDisplay>>,
}

impl DisplayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<NativeDisplayId, SharedDisplay>> {
        self.displays.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// `eglGetDisplay`: the display for `native`, created on first request. Attributes are
    /// applied while the display is not initialized and ignored afterwards.
    pub fn get_display(&self, native: NativeDisplayId, attributes: DisplayAttributes) -> SharedDisplay {
        let mut displays = self.lock();
        if let Some(display) = displays.get(&native) {
            lock_display(display).set_attributes(attributes);
            return display.clone();
        }
        debug!(display = ?native, "display created");
        let display = Arc::new(Mutex::new(Display::new(native, attributes)));
        displays.insert(native, display.clone());
        display
    }

    pub fn lookup(&self, native: NativeDisplayId) -> Option<SharedDisplay> {
        self.lock().get(&native).cloned()
    }

    /// Terminates the display and forgets it. Holders of the display keep a terminated object.
    pub fn release(&self, native: NativeDisplayId) -> Option<SharedDisplay> {
        let display = self.lock().remove(&native)?;
        lock_display(&display).terminate();
        debug!(display = ?native, "display released");
        Some(display)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use aero_gles_renderer::device::soft::{SoftwareDeviceFactory, SoftwareDeviceOptions};
    use aero_gles_renderer::RendererConfig;

    use super::*;
    use crate::display::DeviceSelection;

    fn soft_attributes(debug_layer: bool) -> DisplayAttributes {
        DisplayAttributes {
            device: DeviceSelection::Factory(Arc::new(SoftwareDeviceFactory::new(SoftwareDeviceOptions {
                debug_layer_available: false,
                ..SoftwareDeviceOptions::default()
            }))),
            renderer: RendererConfig {
                debug_layer,
                ..RendererConfig::default()
            },
        }
    }

    #[test]
    fn displays_are_shared_per_native_handle() {
        let registry = DisplayRegistry::new();
        let first = registry.get_display(DEFAULT_DISPLAY, soft_attributes(false));
        let again = registry.get_display(DEFAULT_DISPLAY, soft_attributes(false));
        assert!(Arc::ptr_eq(&first, &again));
        let other = registry.get_display(NativeDisplayId(9), soft_attributes(false));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(registry.len(), 2);
        assert!(registry.lookup(NativeDisplayId(5)).is_none());
    }

    #[test]
    fn attributes_only_apply_before_initialization() {
        let registry = DisplayRegistry::new();
        let display = registry.get_display(DEFAULT_DISPLAY, soft_attributes(false));
        registry.get_display(DEFAULT_DISPLAY, soft_attributes(true));
        assert!(lock_display(&display).attributes().renderer.debug_layer);

        lock_display(&display).initialize().unwrap();
        registry.get_display(DEFAULT_DISPLAY, soft_attributes(false));
        assert!(lock_display(&display).attributes().renderer.debug_layer);
    }

    #[test]
    fn release_terminates_and_forgets() {
        let registry = DisplayRegistry::new();
        let display = registry.get_display(NativeDisplayId(4), soft_attributes(false));
        lock_display(&display).initialize().unwrap();

        let released = registry.release(NativeDisplayId(4)).unwrap();
        assert!(Arc::ptr_eq(&display, &released));
        assert!(!lock_display(&display).is_initialized());
        assert!(registry.is_empty());
        assert!(registry.release(NativeDisplayId(4)).is_none());
    }
}
