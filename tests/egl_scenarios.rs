mod common;

use std::sync::Arc;

use aero_gles_egl::consts::*;
use aero_gles_egl::{lock_display, Context, EglError};
use aero_gles_formats::{InternalFormat, PixelFormat, PixelType};
use aero_gles_renderer::device::DeviceRemovedReason;
use aero_gles_renderer::state::Rectangle;
use aero_gles_renderer::{lock_swap_chain, Framebuffer, PixelPack};
use common::{TestContext, TestWindow};
use pretty_assertions::assert_eq;

#[test]
fn eight_bit_color_request_lists_every_matching_config_in_id_order() {
    let (_registry, display, _probe) = common::soft_display(1);
    let display = lock_display(&display);

    let request = [EGL_RED_SIZE, 8, EGL_GREEN_SIZE, 8, EGL_BLUE_SIZE, 8, EGL_ALPHA_SIZE, 8, EGL_NONE];
    let matches = display.get_configs(&request, 16).unwrap();
    assert_eq!(matches.total, display.configs().len());

    for id in &matches.configs {
        for channel in [EGL_RED_SIZE, EGL_GREEN_SIZE, EGL_BLUE_SIZE, EGL_ALPHA_SIZE] {
            assert!(display.get_config_attrib(*id, channel).unwrap() >= 8);
        }
    }
    // Same color size and buffer size everywhere, so depth and then the id decide.
    assert_eq!(matches.configs, vec![1, 2, 3]);
    let depths: Vec<EGLint> = matches
        .configs
        .iter()
        .map(|id| display.get_config_attrib(*id, EGL_DEPTH_SIZE).unwrap())
        .collect();
    assert_eq!(depths, vec![0, 16, 24]);

    // RGBA8 and BGRA8 differ only in channel order and collapse to the first enumerated.
    assert!(display
        .configs()
        .iter()
        .all(|config| config.render_target_format() == InternalFormat::Bgra8));

    let again = display.get_configs(&request, 16).unwrap();
    assert_eq!(again, matches);
}

#[test]
fn zero_sized_fixed_window_surface_grows_without_recreation() {
    let (_registry, display, probe) = common::soft_display(2);
    let mut display = lock_display(&display);

    let attributes = [EGL_FIXED_SIZE_ANGLE, EGL_TRUE, EGL_WIDTH, 0, EGL_HEIGHT, 0, EGL_NONE];
    let surface = display
        .create_window_surface(1, TestWindow::new(20, 800, 600), &attributes)
        .unwrap();
    assert_eq!(display.query_surface(surface, EGL_WIDTH), Ok(0));
    {
        let chain = lock_swap_chain(display.surface(surface).unwrap().swap_chain().unwrap());
        assert_eq!((chain.width(), chain.height()), (0, 0));
        assert!(chain.offscreen_texture().is_none());
    }

    display.resize_surface(surface, 640, 480).unwrap();
    assert_eq!(display.query_surface(surface, EGL_WIDTH), Ok(640));
    assert_eq!(display.query_surface(surface, EGL_HEIGHT), Ok(480));
    {
        let chain = lock_swap_chain(display.surface(surface).unwrap().swap_chain().unwrap());
        assert_eq!((chain.width(), chain.height()), (640, 480));
        assert!(chain.has_presentable_chain());
    }

    display.swap_buffers(surface).unwrap();
    let frame = probe.last_presented().unwrap();
    assert_eq!((frame.width, frame.height), (640, 480));
}

#[test]
fn removed_device_is_restored_with_surfaces_at_their_old_size() {
    let (_registry, display, probe) = common::soft_display(3);
    let mut display = lock_display(&display);

    let window = TestWindow::new(30, 32, 16);
    let surface = display.create_window_surface(1, window, &[]).unwrap();
    let pbuffer = display
        .create_offscreen_surface(2, &[EGL_WIDTH, 8, EGL_HEIGHT, 8, EGL_NONE])
        .unwrap();
    let context = Arc::new(TestContext::default());
    let context_id = display.create_context(1, 2, context.clone()).unwrap();
    display
        .make_current(Some(surface), Some(surface), Some(context_id))
        .unwrap();
    let old_device = probe.current_device();

    probe.remove_device(DeviceRemovedReason::Hung);
    assert!(display.test_device_lost());
    assert!(context.is_context_lost());
    assert_eq!(display.swap_buffers(surface), Err(EglError::ContextLost));

    display.restore_lost_device().unwrap();
    assert_ne!(probe.current_device(), old_device);
    for (id, size) in [(surface, (32, 16)), (pbuffer, (8, 8))] {
        let chain = lock_swap_chain(display.surface(id).unwrap().swap_chain().unwrap());
        assert_eq!((chain.width(), chain.height()), size);
        assert_eq!(
            chain.offscreen_texture().map(|texture| texture.device_id()),
            probe.current_device()
        );
    }
    display.swap_buffers(surface).unwrap();
    assert_eq!(probe.last_presented().unwrap().width, 32);
}

#[test]
fn copying_rgba_into_rgb_drops_alpha_only() {
    let (_registry, display, _probe) = common::soft_display(4);
    let mut display = lock_display(&display);
    let renderer = display.renderer_mut().unwrap();

    // Left half teal, right half orange, each with a different alpha.
    let mut texels = Vec::new();
    for _row in 0..4 {
        for column in 0..4 {
            texels.extend_from_slice(if column < 2 {
                &[0x10, 0x80, 0x90, 0x40]
            } else {
                &[0xf0, 0x70, 0x20, 0xc0]
            });
        }
    }
    let mut source = renderer.create_texture_storage_2d(InternalFormat::Rgba8, true, 4, 4, 1);
    source
        .storage_mut()
        .set_data(renderer, 0, 0, None, &texels, 16)
        .unwrap();
    let mut dest = renderer.create_texture_storage_2d(InternalFormat::Rgb8, true, 4, 4, 1);

    let mut read = Framebuffer::new();
    read.set_color_attachment(0, Some(source.get_render_target(renderer, 0).unwrap()))
        .unwrap();
    renderer
        .copy_image(&read, Rectangle::new(0, 0, 4, 4), PixelFormat::Rgb, 0, 0, &mut dest, 0)
        .unwrap();

    let mut written = Framebuffer::new();
    written
        .set_color_attachment(0, Some(dest.get_render_target(renderer, 0).unwrap()))
        .unwrap();
    let pack = PixelPack::default();
    let mut rgb = vec![0u8; pack.image_size(4, 4, PixelFormat::Rgb, PixelType::UnsignedByte)];
    renderer
        .read_pixels(&written, 0, 0, 4, 4, PixelFormat::Rgb, PixelType::UnsignedByte, pack, &mut rgb)
        .unwrap();
    let expected: Vec<u8> = texels
        .chunks(4)
        .flat_map(|texel| texel[..3].to_vec())
        .collect();
    assert_eq!(rgb, expected);

    let mut rgba = vec![0u8; pack.image_size(4, 4, PixelFormat::Rgba, PixelType::UnsignedByte)];
    renderer
        .read_pixels(&written, 0, 0, 4, 4, PixelFormat::Rgba, PixelType::UnsignedByte, pack, &mut rgba)
        .unwrap();
    assert!(rgba.chunks(4).all(|texel| texel[3] == 0xff));
}
