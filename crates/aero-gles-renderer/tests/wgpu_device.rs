mod common;

use std::sync::Arc;

use aero_gles_formats::{InternalFormat, PixelFormat, PixelType};
use aero_gles_renderer::device::wgpu_device::WgpuDeviceFactory;
use aero_gles_renderer::state::{ClearMask, ClearParameters};
use aero_gles_renderer::{Framebuffer, PixelPack, Renderer, RendererConfig, RendererError};

fn wgpu_renderer(test_name: &str) -> Option<Renderer> {
    let config = RendererConfig {
        debug_layer: false,
        ..RendererConfig::default()
    };
    let mut renderer = Renderer::new(Arc::new(WgpuDeviceFactory::new()), config);
    match renderer.initialize() {
        Ok(()) => Some(renderer),
        Err(RendererError::DeviceCreation(reason)) | Err(RendererError::MissingCapability(reason)) => {
            common::skip_or_panic(test_name, &reason);
            None
        }
        Err(err) => panic!("unexpected renderer failure: {err}"),
    }
}

#[test]
fn clears_read_back_on_hardware() {
    let Some(mut renderer) = wgpu_renderer(concat!(module_path!(), "::clears_read_back_on_hardware")) else {
        return;
    };
    assert!(!renderer.generate_configs().is_empty());

    let target = renderer
        .create_renderbuffer(8, 8, InternalFormat::Rgba8, 0)
        .unwrap()
        .unwrap();
    let mut framebuffer = Framebuffer::new();
    framebuffer.set_color_attachment(0, Some(target)).unwrap();
    let params = ClearParameters {
        mask: ClearMask::COLOR,
        color: [0.0, 0.0, 1.0, 1.0],
        ..ClearParameters::default()
    };
    renderer.clear(&params, &framebuffer).unwrap();
    renderer.sync(true).unwrap();

    let pack = PixelPack::default();
    let mut out = vec![0u8; pack.image_size(8, 8, PixelFormat::Rgba, PixelType::UnsignedByte)];
    renderer
        .read_pixels(&framebuffer, 0, 0, 8, 8, PixelFormat::Rgba, PixelType::UnsignedByte, pack, &mut out)
        .unwrap();
    assert!(out.chunks(4).all(|pixel| pixel == [0, 0, 255, 255]));
    assert!(!renderer.test_device_lost());
}
