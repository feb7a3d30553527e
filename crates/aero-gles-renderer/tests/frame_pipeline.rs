mod common;

use std::sync::{Arc, Mutex};

use aero_gles_formats::{InternalFormat, PixelFormat, PixelType};
use aero_gles_renderer::device::NativeWindowId;
use aero_gles_renderer::state::{BlendState, ClearMask, ClearParameters, Rectangle};
use aero_gles_renderer::{lock_swap_chain, Framebuffer, PixelPack, SharedSwapChain};
use pretty_assertions::assert_eq;

fn clear_color(color: [f32; 4]) -> ClearParameters {
    ClearParameters {
        mask: ClearMask::COLOR,
        color,
        ..ClearParameters::default()
    }
}

#[test]
fn default_framebuffer_clear_reaches_the_presented_frame() {
    let (mut renderer, probe) = common::soft_renderer();
    let chain: SharedSwapChain = Arc::new(Mutex::new(renderer.create_swap_chain(
        Some(NativeWindowId(5)),
        InternalFormat::Rgba8,
        Some(InternalFormat::Depth24Stencil8),
    )));
    lock_swap_chain(&chain).reset(&mut renderer, 4, 4, 1).unwrap();

    let framebuffer = Framebuffer::for_swap_chain(&chain);
    let params = ClearParameters {
        mask: ClearMask::COLOR | ClearMask::DEPTH,
        color: [0.0, 1.0, 0.0, 1.0],
        ..ClearParameters::default()
    };
    renderer.clear(&params, &framebuffer).unwrap();
    lock_swap_chain(&chain).swap_rect(&mut renderer, 0, 0, 4, 4).unwrap();

    let frame = probe.last_presented().unwrap();
    assert_eq!((frame.width, frame.height), (4, 4));
    assert!(frame.pixels.chunks(4).all(|pixel| pixel == [0, 255, 0, 255]));
    assert_eq!(renderer.stats().snapshot().presents, 2);
}

#[test]
fn generated_mip_levels_read_back_through_a_framebuffer() {
    let (mut renderer, _) = common::soft_renderer();
    let mut storage = renderer.create_texture_storage_2d(InternalFormat::Rgba8, true, 4, 4, 3);
    let red: Vec<u8> = [255u8, 0, 0, 255].repeat(16);
    storage
        .storage_mut()
        .set_data(&mut renderer, 0, 0, None, &red, 16)
        .unwrap();
    storage.generate_mipmap(&mut renderer, 1).unwrap();

    let level_1 = storage.get_render_target(&mut renderer, 1).unwrap();
    assert_eq!((level_1.width(), level_1.height()), (2, 2));
    let mut framebuffer = Framebuffer::new();
    framebuffer.set_color_attachment(0, Some(level_1)).unwrap();

    let pack = PixelPack::default();
    let mut out = vec![0u8; pack.image_size(2, 2, PixelFormat::Rgba, PixelType::UnsignedByte)];
    renderer
        .read_pixels(&framebuffer, 0, 0, 2, 2, PixelFormat::Rgba, PixelType::UnsignedByte, pack, &mut out)
        .unwrap();
    assert_eq!(out, [255u8, 0, 0, 255].repeat(4));
    assert_eq!(renderer.stats().snapshot().quad_copies, 1);
}

#[test]
fn helper_passes_force_the_next_state_application() {
    let (mut renderer, probe) = common::soft_renderer();
    let target = renderer
        .create_renderbuffer(4, 4, InternalFormat::Rgba8, 0)
        .unwrap()
        .unwrap();
    let mut framebuffer = Framebuffer::new();
    framebuffer.set_color_attachment(0, Some(target)).unwrap();

    let blend = BlendState::default();
    renderer.set_blend_state(&blend, [0.0; 4], u32::MAX).unwrap();
    probe.reset_counts();
    renderer.set_blend_state(&blend, [0.0; 4], u32::MAX).unwrap();
    assert_eq!(probe.counts().blend_state, 0);

    // A masked clear draws a quad with its own blend state behind the cache's back.
    let masked = ClearParameters {
        color_mask_red: false,
        ..clear_color([1.0, 1.0, 1.0, 1.0])
    };
    renderer.clear(&masked, &framebuffer).unwrap();
    assert_eq!(renderer.stats().snapshot().masked_clears, 1);

    probe.reset_counts();
    renderer.set_blend_state(&blend, [0.0; 4], u32::MAX).unwrap();
    assert_eq!(probe.counts().blend_state, 1);
}

#[test]
fn scissored_clears_leave_the_outside_untouched() {
    let (mut renderer, _) = common::soft_renderer();
    let target = renderer
        .create_renderbuffer(4, 4, InternalFormat::Rgba8, 0)
        .unwrap()
        .unwrap();
    let mut framebuffer = Framebuffer::new();
    framebuffer.set_color_attachment(0, Some(target)).unwrap();

    renderer.clear(&clear_color([0.0, 0.0, 0.0, 1.0]), &framebuffer).unwrap();
    let scissored = ClearParameters {
        scissor: Some(Rectangle::new(2, 0, 2, 4)),
        ..clear_color([1.0, 1.0, 1.0, 1.0])
    };
    renderer.clear(&scissored, &framebuffer).unwrap();

    let pack = PixelPack::default();
    let mut out = vec![0u8; pack.image_size(4, 1, PixelFormat::Rgba, PixelType::UnsignedByte)];
    renderer
        .read_pixels(&framebuffer, 0, 1, 4, 1, PixelFormat::Rgba, PixelType::UnsignedByte, pack, &mut out)
        .unwrap();
    assert_eq!(&out[..8], &[0, 0, 0, 255, 0, 0, 0, 255]);
    assert_eq!(&out[8..], &[255, 255, 255, 255, 255, 255, 255, 255]);
}

#[test]
fn recovered_renderers_rebuild_swap_chains_at_the_old_size() {
    let (mut renderer, probe) = common::soft_renderer();
    let chain: SharedSwapChain = Arc::new(Mutex::new(renderer.create_swap_chain(
        Some(NativeWindowId(8)),
        InternalFormat::Bgra8,
        None,
    )));
    lock_swap_chain(&chain).reset(&mut renderer, 16, 8, 1).unwrap();

    probe.remove_device(aero_gles_renderer::device::DeviceRemovedReason::Hung);
    assert!(renderer.test_device_lost());
    lock_swap_chain(&chain).release();
    renderer.reset_device().unwrap();

    let mut chain = lock_swap_chain(&chain);
    let (width, height) = (chain.width(), chain.height());
    chain.reset(&mut renderer, width, height, 1).unwrap();
    assert_eq!((chain.width(), chain.height()), (16, 8));
    assert_eq!(
        chain.offscreen_texture().map(|texture| texture.device_id()),
        probe.current_device()
    );
}
