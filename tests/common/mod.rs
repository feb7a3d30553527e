//! Shared fixtures for the workspace-level EGL scenarios.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use aero_gles_egl::{
    lock_display, Context, DeviceSelection, DisplayAttributes, DisplayRegistry, NativeDisplayId, NativeWindow,
    SharedDisplay,
};
use aero_gles_renderer::device::soft::{SoftwareDeviceFactory, SoftwareDeviceOptions, SoftwareDeviceProbe};
use aero_gles_renderer::device::NativeWindowId;
use aero_gles_renderer::{Framebuffer, RendererConfig};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn soft_attributes() -> (DisplayAttributes, SoftwareDeviceProbe) {
    let factory = SoftwareDeviceFactory::new(SoftwareDeviceOptions::default());
    let probe = factory.probe();
    let attributes = DisplayAttributes {
        device: DeviceSelection::Factory(Arc::new(factory)),
        renderer: RendererConfig {
            debug_layer: false,
            ..RendererConfig::default()
        },
    };
    (attributes, probe)
}

/// An initialized display on a software device, registered in its own registry.
pub fn soft_display(native: u64) -> (DisplayRegistry, SharedDisplay, SoftwareDeviceProbe) {
    init_tracing();
    let (attributes, probe) = soft_attributes();
    let registry = DisplayRegistry::new();
    let display = registry.get_display(NativeDisplayId(native), attributes);
    lock_display(&display)
        .initialize()
        .expect("software displays initialize");
    (registry, display, probe)
}

#[derive(Debug)]
pub struct TestWindow {
    id: u64,
    width: AtomicU32,
    height: AtomicU32,
}

impl TestWindow {
    pub fn new(id: u64, width: u32, height: u32) -> Arc<Self> {
        Arc::new(Self {
            id,
            width: AtomicU32::new(width),
            height: AtomicU32::new(height),
        })
    }

    pub fn resize(&self, width: u32, height: u32) {
        self.width.store(width, Ordering::SeqCst);
        self.height.store(height, Ordering::SeqCst);
    }
}

impl NativeWindow for TestWindow {
    fn id(&self) -> NativeWindowId {
        NativeWindowId(self.id)
    }

    fn client_size(&self) -> Option<(u32, u32)> {
        Some((self.width.load(Ordering::SeqCst), self.height.load(Ordering::SeqCst)))
    }
}

#[derive(Debug, Default)]
pub struct TestContext {
    pub reset_notification: bool,
    lost: AtomicBool,
    framebuffer: Mutex<Option<Framebuffer>>,
}

impl TestContext {
    pub fn framebuffer(&self) -> Option<Framebuffer> {
        self.framebuffer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Context for TestContext {
    fn is_reset_notification_enabled(&self) -> bool {
        self.reset_notification
    }

    fn mark_context_lost(&self) {
        self.lost.store(true, Ordering::SeqCst);
    }

    fn is_context_lost(&self) -> bool {
        self.lost.load(Ordering::SeqCst)
    }

    fn make_current(&self, framebuffer: Option<Framebuffer>) {
        *self.framebuffer.lock().unwrap_or_else(PoisonError::into_inner) = framebuffer;
    }
}
