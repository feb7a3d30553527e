//! Shared helpers for `aero-gles-renderer` integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use aero_gles_renderer::device::soft::{SoftwareDeviceFactory, SoftwareDeviceOptions, SoftwareDeviceProbe};
use aero_gles_renderer::{Renderer, RendererConfig};

pub fn require_webgpu() -> bool {
    let Ok(raw) = std::env::var("AERO_REQUIRE_WEBGPU") else {
        return false;
    };

    let v = raw.trim();
    v == "1"
        || v.eq_ignore_ascii_case("true")
        || v.eq_ignore_ascii_case("yes")
        || v.eq_ignore_ascii_case("on")
}

pub fn skip_or_panic(test_name: &str, reason: &str) {
    if require_webgpu() {
        panic!("AERO_REQUIRE_WEBGPU is enabled but {test_name} cannot run: {reason}");
    }
    eprintln!("skipping {test_name}: {reason}");
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// An initialized renderer on a software device, plus the probe watching it.
pub fn soft_renderer_with(options: SoftwareDeviceOptions) -> (Renderer, SoftwareDeviceProbe) {
    init_tracing();
    let factory = SoftwareDeviceFactory::new(options);
    let probe = factory.probe();
    let config = RendererConfig {
        debug_layer: false,
        ..RendererConfig::default()
    };
    let mut renderer = Renderer::new(Arc::new(factory), config);
    renderer.initialize().expect("software device creation never fails unprompted");
    (renderer, probe)
}

pub fn soft_renderer() -> (Renderer, SoftwareDeviceProbe) {
    soft_renderer_with(SoftwareDeviceOptions::default())
}
