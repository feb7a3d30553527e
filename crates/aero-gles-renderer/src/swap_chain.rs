//! Window and pbuffer swap chains.
//!
//! Applications never draw into the presentable buffer directly. Each swap chain owns an
//! offscreen color texture (plus an optional depth-stencil texture) that render targets point
//! at; presenting blits the offscreen texture into the device back buffer with a textured quad
//! and then presents. Resizing preserves the overlapping part of the offscreen contents.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use aero_gles_formats::{DxgiFormat, InternalFormat};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::caps::MAX_SWAP_INTERVAL;
use crate::device::{
    BindFlags, BlendDesc, BufferDesc, BufferHandle, BuiltinProgram, CullMode, DepthStencilDesc,
    DeviceError, FilterMode, GpuDevice, NativeWindowId, PositionTexCoordVertex, PrimitiveTopology,
    Program, RasterizerDesc, SamplerDesc, ShaderStage, SubresourceBox, SwapChainDesc,
    SwapChainHandle, TextureDesc, TextureHandle, ViewDesc, ViewHandle, Viewport,
};
use crate::error::RendererError;
use crate::renderer::Renderer;
use crate::state_cache::issue_serial;

/// Swap chain status as the EGL layer reports it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SwapChainError {
    #[error("bad parameter: {0}")]
    BadParameter(String),
    #[error("allocation failed: {0}")]
    BadAlloc(String),
    #[error("context lost")]
    ContextLost,
}

impl From<RendererError> for SwapChainError {
    fn from(err: RendererError) -> Self {
        match err {
            RendererError::DeviceLost => Self::ContextLost,
            other => Self::BadAlloc(other.to_string()),
        }
    }
}

fn device_failure(what: &str, err: DeviceError) -> SwapChainError {
    match err {
        DeviceError::DeviceRemoved(reason) => {
            error!(?reason, "device removed while {what}");
            SwapChainError::ContextLost
        }
        other => {
            error!(error = %other, "failed {what}");
            SwapChainError::BadAlloc(format!("{what}: {other}"))
        }
    }
}

/// A swap chain shared between its surface and the render targets that view it.
///
/// Surfaces replace the contents in place on a full reset, so render targets created from
/// the chain keep tracking the current buffers.
pub type SharedSwapChain = Arc<Mutex<SwapChain>>;

pub fn lock_swap_chain(chain: &SharedSwapChain) -> MutexGuard<'_, SwapChain> {
    chain.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Debug)]
pub struct SwapChain {
    window: Option<NativeWindowId>,
    back_buffer_format: InternalFormat,
    depth_buffer_format: Option<InternalFormat>,
    width: u32,
    height: u32,
    swap_interval: u32,

    chain: Option<SwapChainHandle>,
    back_buffer: Option<TextureHandle>,
    back_buffer_rtv: Option<ViewHandle>,

    offscreen: Option<TextureHandle>,
    offscreen_rtv: Option<ViewHandle>,
    offscreen_srv: Option<ViewHandle>,
    offscreen_serial: u64,

    depth: Option<TextureHandle>,
    depth_dsv: Option<ViewHandle>,
    depth_serial: u64,

    pass_through_vb: Option<BufferHandle>,
}

impl SwapChain {
    /// A chain with no buffers yet; [`SwapChain::reset`] allocates them.
    pub fn new(
        window: Option<NativeWindowId>,
        back_buffer_format: InternalFormat,
        depth_buffer_format: Option<InternalFormat>,
    ) -> Self {
        Self {
            window,
            back_buffer_format,
            depth_buffer_format,
            width: 0,
            height: 0,
            swap_interval: 1,
            chain: None,
            back_buffer: None,
            back_buffer_rtv: None,
            offscreen: None,
            offscreen_rtv: None,
            offscreen_srv: None,
            offscreen_serial: 0,
            depth: None,
            depth_dsv: None,
            depth_serial: 0,
            pass_through_vb: None,
        }
    }

    pub fn window(&self) -> Option<NativeWindowId> {
        self.window
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn swap_interval(&self) -> u32 {
        self.swap_interval
    }

    pub fn back_buffer_format(&self) -> InternalFormat {
        self.back_buffer_format
    }

    pub fn depth_buffer_format(&self) -> Option<InternalFormat> {
        self.depth_buffer_format
    }

    /// Device format of the offscreen color texture.
    pub fn offscreen_format(&self) -> DxgiFormat {
        self.back_buffer_format.texture_format_info().rtv
    }

    pub fn depth_format(&self) -> Option<DxgiFormat> {
        self.depth_buffer_format.map(InternalFormat::renderbuffer_format)
    }

    pub fn has_presentable_chain(&self) -> bool {
        self.chain.is_some()
    }

    pub fn offscreen_texture(&self) -> Option<&TextureHandle> {
        self.offscreen.as_ref()
    }

    pub fn render_target_view(&self) -> Option<&ViewHandle> {
        self.offscreen_rtv.as_ref()
    }

    pub fn shader_resource_view(&self) -> Option<&ViewHandle> {
        self.offscreen_srv.as_ref()
    }

    pub fn depth_texture(&self) -> Option<&TextureHandle> {
        self.depth.as_ref()
    }

    pub fn depth_stencil_view(&self) -> Option<&ViewHandle> {
        self.depth_dsv.as_ref()
    }

    /// Changes whenever the offscreen color texture is reallocated.
    pub fn offscreen_serial(&self) -> u64 {
        self.offscreen_serial
    }

    pub fn depth_serial(&self) -> u64 {
        self.depth_serial
    }

    fn release_offscreen(&mut self) {
        self.offscreen = None;
        self.offscreen_rtv = None;
        self.offscreen_srv = None;
        self.depth = None;
        self.depth_dsv = None;
    }

    fn release_presentable(&mut self) {
        self.chain = None;
        self.back_buffer = None;
        self.back_buffer_rtv = None;
    }

    /// Drops every device object. Used before the device is recreated; the size is kept so
    /// the next reset can restore it.
    pub fn release(&mut self) {
        self.release_presentable();
        self.release_offscreen();
        self.pass_through_vb = None;
    }

    /// Recreates the presentable chain and the offscreen buffers at `width` x `height`.
    pub fn reset(
        &mut self,
        renderer: &mut Renderer,
        width: u32,
        height: u32,
        swap_interval: u32,
    ) -> Result<(), SwapChainError> {
        self.release_presentable();

        if swap_interval > MAX_SWAP_INTERVAL as u32 {
            return Err(SwapChainError::BadParameter(format!(
                "swap interval {swap_interval} is above {MAX_SWAP_INTERVAL}"
            )));
        }
        self.swap_interval = swap_interval;

        if width == 0 || height == 0 {
            warn!(width, height, "zero-sized swap chain; buffers released");
            self.release_offscreen();
            self.width = 0;
            self.height = 0;
            return Ok(());
        }

        if let Some(window) = self.window {
            let device = renderer.device_mut()?;
            let desc = SwapChainDesc {
                window,
                width,
                height,
                format: self.offscreen_format(),
                buffer_count: 2,
            };
            let chain = device
                .create_swap_chain(&desc)
                .map_err(|err| device_failure("creating the swap chain", err))?;
            self.chain = Some(chain);
            self.acquire_back_buffer(device)?;
        }

        self.reset_offscreen(renderer, width, height)
    }

    /// Resizes the presentable buffers; a chain without a window falls back to a full reset.
    pub fn resize(&mut self, renderer: &mut Renderer, width: u32, height: u32) -> Result<(), SwapChainError> {
        if width == 0 || height == 0 {
            return Ok(());
        }
        let Some(chain) = self.chain.clone() else {
            return self.reset(renderer, width, height, self.swap_interval);
        };

        self.back_buffer = None;
        self.back_buffer_rtv = None;
        let device = renderer.device_mut()?;
        if let Err(err) = device.resize_swap_chain(&chain, width, height) {
            self.release_presentable();
            return Err(device_failure("resizing the swap chain", err));
        }
        self.acquire_back_buffer(device)?;
        self.reset_offscreen(renderer, width, height)
    }

    fn acquire_back_buffer(&mut self, device: &mut dyn GpuDevice) -> Result<(), SwapChainError> {
        let Some(chain) = self.chain.as_ref() else {
            return Ok(());
        };
        let back_buffer = device
            .swap_chain_back_buffer(chain)
            .map_err(|err| device_failure("getting the back buffer", err))?;
        let rtv = device
            .create_view(&back_buffer, &ViewDesc::render_target(self.offscreen_format(), 0, 0))
            .map_err(|err| device_failure("creating the back buffer view", err))?;
        self.back_buffer = Some(back_buffer);
        self.back_buffer_rtv = Some(rtv);
        Ok(())
    }

    fn reset_offscreen(&mut self, renderer: &mut Renderer, width: u32, height: u32) -> Result<(), SwapChainError> {
        let previous = self.offscreen.take();
        let (previous_width, previous_height) = (self.width, self.height);
        self.release_offscreen();

        let device = renderer.device_mut()?;
        let format = self.offscreen_format();
        let texture = device
            .create_texture(
                &TextureDesc::new_2d(
                    width,
                    height,
                    format,
                    BindFlags::RENDER_TARGET | BindFlags::SHADER_RESOURCE,
                ),
                None,
            )
            .map_err(|err| device_failure("creating the offscreen texture", err))?;
        let rtv = device
            .create_view(&texture, &ViewDesc::render_target(format, 0, 0))
            .map_err(|err| device_failure("creating the offscreen render target view", err))?;
        let srv = device
            .create_view(&texture, &ViewDesc::shader_resource(format, 0, 1))
            .map_err(|err| device_failure("creating the offscreen shader resource view", err))?;

        if let Some(depth_format) = self.depth_format() {
            let depth = device
                .create_texture(
                    &TextureDesc::new_2d(width, height, depth_format, BindFlags::DEPTH_STENCIL),
                    None,
                )
                .map_err(|err| device_failure("creating the depth stencil texture", err))?;
            let dsv = device
                .create_view(&depth, &ViewDesc::depth_stencil(depth_format, 0, 0))
                .map_err(|err| device_failure("creating the depth stencil view", err))?;
            self.depth = Some(depth);
            self.depth_dsv = Some(dsv);
            self.depth_serial = issue_serial();
        }

        // Keep what was drawn: the overlap is anchored to the last rows of the old texture.
        if let Some(previous) = previous.filter(|p| p.device_id() == device.device_id()) {
            let copy_height = previous_height.min(height);
            let source = SubresourceBox::new(
                0,
                previous_height - copy_height,
                previous_width.min(width),
                previous_height,
            );
            let y_offset = height.saturating_sub(previous_height);
            if source.width() > 0 && source.height() > 0 {
                device
                    .copy_subresource_region(&texture, 0, 0, y_offset, &previous, 0, Some(source))
                    .map_err(|err| device_failure("preserving the offscreen contents", err))?;
            }
        }

        self.offscreen = Some(texture);
        self.offscreen_rtv = Some(rtv);
        self.offscreen_srv = Some(srv);
        self.offscreen_serial = issue_serial();
        self.width = width;
        self.height = height;
        debug!(width, height, window = ?self.window, "swap chain reset");

        if self.chain.is_some() {
            self.swap_rect(renderer, 0, 0, width, height)?;
        }
        Ok(())
    }

    fn pass_through_buffer(&mut self, device: &mut dyn GpuDevice) -> Result<BufferHandle, SwapChainError> {
        if let Some(vb) = self
            .pass_through_vb
            .as_ref()
            .filter(|vb| vb.device_id() == device.device_id())
        {
            return Ok(vb.clone());
        }
        let vb = device
            .create_buffer(&BufferDesc {
                size: 4 * BuiltinProgram::CopyRgba.vertex_stride(),
                bind: BindFlags::VERTEX_BUFFER,
            })
            .map_err(|err| device_failure("creating the pass-through vertex buffer", err))?;
        self.pass_through_vb = Some(vb.clone());
        Ok(vb)
    }

    /// Copies the `x, y, width, height` region of the offscreen texture into the back buffer
    /// and presents it. Pbuffers have nothing to present.
    pub fn swap_rect(
        &mut self,
        renderer: &mut Renderer,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    ) -> Result<(), SwapChainError> {
        let (Some(chain), Some(back_buffer_rtv), Some(offscreen_srv)) = (
            self.chain.clone(),
            self.back_buffer_rtv.clone(),
            self.offscreen_srv.clone(),
        ) else {
            return Ok(());
        };
        let sync_interval = if renderer.config().force_vsync_off {
            0
        } else {
            self.swap_interval
        };

        let (w, h) = (self.width as f32, self.height as f32);
        let x1 = x as f32 / w * 2.0 - 1.0;
        let y1 = y as f32 / h * 2.0 - 1.0;
        let x2 = (x + width) as f32 / w * 2.0 - 1.0;
        let y2 = (y + height) as f32 / h * 2.0 - 1.0;
        let u1 = x as f32 / w;
        let v1 = y as f32 / h;
        let u2 = (x + width) as f32 / w;
        let v2 = (y + height) as f32 / h;
        let vertices = [
            PositionTexCoordVertex { x: x1, y: y1, u: u1, v: v1 },
            PositionTexCoordVertex { x: x1, y: y2, u: u1, v: v2 },
            PositionTexCoordVertex { x: x2, y: y1, u: u2, v: v1 },
            PositionTexCoordVertex { x: x2, y: y2, u: u2, v: v2 },
        ];

        let device = renderer.device_mut()?;
        let vb = self.pass_through_buffer(device)?;
        device
            .write_buffer(&vb, 0, bytemuck::cast_slice(&vertices))
            .map_err(|err| device_failure("writing the pass-through quad", err))?;

        device.set_depth_stencil_state(
            &DepthStencilDesc {
                depth_enable: false,
                depth_write: false,
                ..DepthStencilDesc::default()
            },
            0,
        );
        device.set_blend_state(&BlendDesc::default(), [1.0; 4], u32::MAX);
        device.set_rasterizer_state(&RasterizerDesc {
            cull_mode: CullMode::None,
            depth_clip_enable: false,
            ..RasterizerDesc::default()
        });
        let program = BuiltinProgram::CopyRgba;
        device.set_vertex_buffer(Some(&vb), program.vertex_stride(), 0);
        device.set_primitive_topology(PrimitiveTopology::TriangleStrip);
        device.set_program(Some(Program::Builtin(program)));
        device.set_render_targets(&[Some(back_buffer_rtv)], None);
        device.set_viewport(&Viewport::full(self.width, self.height));
        device.set_shader_resource(ShaderStage::Pixel, 0, Some(&offscreen_srv));
        device.set_sampler(ShaderStage::Pixel, 0, Some(&SamplerDesc::clamped(FilterMode::Point)));

        let drawn = device.draw(4, 0);
        let presented = drawn.and_then(|()| device.present(&chain, sync_interval));
        device.set_shader_resource(ShaderStage::Pixel, 0, None);
        renderer.unapply_render_targets();
        renderer.mark_all_state_dirty();

        match presented {
            Ok(()) => {
                renderer.stats().inc_presents();
                Ok(())
            }
            Err(DeviceError::DeviceRemoved(reason)) => {
                error!(?reason, "device removed during present");
                renderer.test_device_lost();
                Err(SwapChainError::ContextLost)
            }
            Err(err) => {
                renderer.stats().inc_present_failures();
                error!(error = %err, "present failed");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::soft::{SoftwareDeviceFactory, SoftwareDeviceOptions, SoftwareDeviceProbe};
    use crate::device::{DeviceRemovedReason, MappedSubresource};
    use crate::RendererConfig;

    fn renderer() -> (Renderer, SoftwareDeviceProbe) {
        let factory = SoftwareDeviceFactory::new(SoftwareDeviceOptions::default());
        let probe = factory.probe();
        let mut renderer = Renderer::new(Arc::new(factory), RendererConfig::default());
        renderer.initialize().unwrap();
        (renderer, probe)
    }

    fn read_offscreen(renderer: &mut Renderer, chain: &SwapChain) -> MappedSubresource {
        let device = renderer.device_mut().unwrap();
        let (w, h) = (chain.width(), chain.height());
        let staging = device
            .create_texture(&TextureDesc::staging(w, h, chain.offscreen_format()), None)
            .unwrap();
        device
            .copy_subresource_region(&staging, 0, 0, 0, chain.offscreen_texture().unwrap(), 0, None)
            .unwrap();
        device.map_read(&staging, 0).unwrap()
    }

    #[test]
    fn zero_sized_reset_succeeds_without_buffers() {
        let (mut renderer, probe) = renderer();
        let mut chain = SwapChain::new(Some(NativeWindowId(1)), InternalFormat::Bgra8, None);
        chain.reset(&mut renderer, 0, 0, 1).unwrap();
        assert_eq!((chain.width(), chain.height()), (0, 0));
        assert!(chain.render_target_view().is_none());
        assert_eq!(probe.counts().swap_chains_created, 0);

        chain.resize(&mut renderer, 64, 32).unwrap();
        assert_eq!((chain.width(), chain.height()), (64, 32));
        assert!(chain.has_presentable_chain());
    }

    #[test]
    fn intervals_above_four_are_rejected() {
        let (mut renderer, _) = renderer();
        let mut chain = SwapChain::new(None, InternalFormat::Rgba8, None);
        assert!(matches!(
            chain.reset(&mut renderer, 4, 4, 5),
            Err(SwapChainError::BadParameter(_))
        ));
    }

    #[test]
    fn pbuffers_allocate_offscreen_and_depth_without_presenting() {
        let (mut renderer, probe) = renderer();
        let mut chain = SwapChain::new(None, InternalFormat::Rgba8, Some(InternalFormat::Depth24Stencil8));
        chain.reset(&mut renderer, 8, 8, 1).unwrap();
        assert!(chain.depth_stencil_view().is_some());
        assert!(!chain.has_presentable_chain());
        chain.swap_rect(&mut renderer, 0, 0, 8, 8).unwrap();
        assert_eq!(probe.counts().presents, 0);
    }

    #[test]
    fn resize_keeps_the_overlapping_rows() {
        let (mut renderer, _) = renderer();
        let mut chain = SwapChain::new(None, InternalFormat::Rgba8, None);
        chain.reset(&mut renderer, 2, 2, 0).unwrap();
        let rtv = chain.render_target_view().unwrap().clone();
        renderer
            .device_mut()
            .unwrap()
            .clear_render_target(&rtv, [1.0, 0.0, 0.0, 1.0])
            .unwrap();

        chain.resize(&mut renderer, 2, 4).unwrap();
        let mapped = read_offscreen(&mut renderer, &chain);
        let pitch = mapped.row_pitch as usize;
        // Growing by two rows moves the old content down by two.
        assert_eq!(&mapped.data[..4], &[0, 0, 0, 0]);
        assert_eq!(&mapped.data[2 * pitch..2 * pitch + 4], &[255, 0, 0, 255]);
        assert_eq!(&mapped.data[3 * pitch + 4..3 * pitch + 8], &[255, 0, 0, 255]);
    }

    #[test]
    fn present_flips_rows_into_the_back_buffer() {
        let (mut renderer, probe) = renderer();
        let mut chain = SwapChain::new(Some(NativeWindowId(9)), InternalFormat::Rgba8, None);
        chain.reset(&mut renderer, 1, 2, 1).unwrap();
        let offscreen = chain.offscreen_texture().unwrap().clone();
        renderer
            .device_mut()
            .unwrap()
            .update_subresource(&offscreen, 0, None, &[10, 20, 30, 255, 40, 50, 60, 255], 4)
            .unwrap();

        chain.swap_rect(&mut renderer, 0, 0, 1, 2).unwrap();
        let frame = probe.last_presented().unwrap();
        assert_eq!(frame.window, NativeWindowId(9));
        assert_eq!(frame.sync_interval, 1);
        assert_eq!(frame.pixels, vec![40, 50, 60, 255, 10, 20, 30, 255]);
        assert_eq!(renderer.stats().snapshot().presents, 2);
    }

    #[test]
    fn removal_during_present_reports_context_lost() {
        let (mut renderer, probe) = renderer();
        let mut chain = SwapChain::new(Some(NativeWindowId(3)), InternalFormat::Bgra8, None);
        chain.reset(&mut renderer, 4, 4, 1).unwrap();
        probe.fail_next_present(DeviceError::DeviceRemoved(DeviceRemovedReason::Reset));
        assert_eq!(
            chain.swap_rect(&mut renderer, 0, 0, 4, 4),
            Err(SwapChainError::ContextLost)
        );

        probe.fail_next_present(DeviceError::Backend("occluded".to_owned()));
        chain.swap_rect(&mut renderer, 0, 0, 4, 4).unwrap();
        assert_eq!(renderer.stats().snapshot().present_failures, 1);
    }
}
