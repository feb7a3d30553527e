//! Render targets: one renderable subresource plus the views the renderer binds.
//!
//! A render target either owns views onto a texture subresource (texture storage levels,
//! cube faces and renderbuffers) or points at a swap chain, in which case the views are read
//! from the chain on every access so they follow resizes and resets.

use aero_gles_formats::{DxgiFormat, InternalFormat};

use crate::device::{TextureHandle, ViewHandle};
use crate::state_cache::issue_serial;
use crate::swap_chain::{lock_swap_chain, SharedSwapChain};

/// The attachment view a texture render target is created with.
#[derive(Debug, Clone)]
pub(crate) enum AttachmentView {
    Color(ViewHandle),
    DepthStencil(ViewHandle),
}

#[derive(Debug, Clone)]
pub struct TextureRenderTarget {
    texture: TextureHandle,
    subresource: u32,
    view: AttachmentView,
    shader_resource: Option<ViewHandle>,
    width: u32,
    height: u32,
    internal_format: InternalFormat,
    actual_format: DxgiFormat,
    samples: u32,
    serial: u64,
    texture_serial: u64,
}

#[derive(Debug, Clone)]
pub enum RenderTarget {
    Texture(TextureRenderTarget),
    /// The color (`depth: false`) or depth-stencil buffer of a swap chain.
    SwapChain { swap_chain: SharedSwapChain, depth: bool },
}

impl RenderTarget {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn texture(
        texture: TextureHandle,
        subresource: u32,
        view: AttachmentView,
        shader_resource: Option<ViewHandle>,
        (width, height): (u32, u32),
        internal_format: InternalFormat,
        actual_format: DxgiFormat,
        samples: u32,
        texture_serial: u64,
    ) -> Self {
        Self::Texture(TextureRenderTarget {
            texture,
            subresource,
            view,
            shader_resource,
            width,
            height,
            internal_format,
            actual_format,
            samples,
            serial: issue_serial(),
            texture_serial,
        })
    }

    pub fn swap_chain_color(swap_chain: SharedSwapChain) -> Self {
        Self::SwapChain {
            swap_chain,
            depth: false,
        }
    }

    pub fn swap_chain_depth(swap_chain: SharedSwapChain) -> Self {
        Self::SwapChain {
            swap_chain,
            depth: true,
        }
    }

    pub fn width(&self) -> u32 {
        match self {
            Self::Texture(rt) => rt.width,
            Self::SwapChain { swap_chain, .. } => lock_swap_chain(swap_chain).width(),
        }
    }

    pub fn height(&self) -> u32 {
        match self {
            Self::Texture(rt) => rt.height,
            Self::SwapChain { swap_chain, .. } => lock_swap_chain(swap_chain).height(),
        }
    }

    pub fn is_depth(&self) -> bool {
        match self {
            Self::Texture(rt) => matches!(rt.view, AttachmentView::DepthStencil(_)),
            Self::SwapChain { depth, .. } => *depth,
        }
    }

    /// The format the application asked for.
    pub fn internal_format(&self) -> InternalFormat {
        match self {
            Self::Texture(rt) => rt.internal_format,
            Self::SwapChain { swap_chain, depth } => {
                let chain = lock_swap_chain(swap_chain);
                match depth {
                    false => chain.back_buffer_format(),
                    true => chain
                        .depth_buffer_format()
                        .unwrap_or(InternalFormat::Depth24Stencil8),
                }
            }
        }
    }

    /// The device format the storage was created with.
    pub fn actual_format(&self) -> DxgiFormat {
        match self {
            Self::Texture(rt) => rt.actual_format,
            Self::SwapChain { swap_chain, depth } => {
                let chain = lock_swap_chain(swap_chain);
                match depth {
                    false => chain.offscreen_format(),
                    true => chain.depth_format().unwrap_or(DxgiFormat::Unknown),
                }
            }
        }
    }

    pub fn samples(&self) -> u32 {
        match self {
            Self::Texture(rt) => rt.samples,
            Self::SwapChain { .. } => 0,
        }
    }

    pub fn render_target_view(&self) -> Option<ViewHandle> {
        match self {
            Self::Texture(rt) => match &rt.view {
                AttachmentView::Color(view) => Some(view.clone()),
                AttachmentView::DepthStencil(_) => None,
            },
            Self::SwapChain { swap_chain, depth: false } => {
                lock_swap_chain(swap_chain).render_target_view().cloned()
            }
            Self::SwapChain { depth: true, .. } => None,
        }
    }

    pub fn depth_stencil_view(&self) -> Option<ViewHandle> {
        match self {
            Self::Texture(rt) => match &rt.view {
                AttachmentView::DepthStencil(view) => Some(view.clone()),
                AttachmentView::Color(_) => None,
            },
            Self::SwapChain { swap_chain, depth: true } => {
                lock_swap_chain(swap_chain).depth_stencil_view().cloned()
            }
            Self::SwapChain { depth: false, .. } => None,
        }
    }

    pub fn shader_resource_view(&self) -> Option<ViewHandle> {
        match self {
            Self::Texture(rt) => rt.shader_resource.clone(),
            Self::SwapChain { swap_chain, depth: false } => {
                lock_swap_chain(swap_chain).shader_resource_view().cloned()
            }
            Self::SwapChain { depth: true, .. } => None,
        }
    }

    /// The texture holding the target's pixels.
    pub fn resource(&self) -> Option<TextureHandle> {
        match self {
            Self::Texture(rt) => Some(rt.texture.clone()),
            Self::SwapChain { swap_chain, depth } => {
                let chain = lock_swap_chain(swap_chain);
                match depth {
                    false => chain.offscreen_texture().cloned(),
                    true => chain.depth_texture().cloned(),
                }
            }
        }
    }

    pub fn subresource_index(&self) -> u32 {
        match self {
            Self::Texture(rt) => rt.subresource,
            Self::SwapChain { .. } => 0,
        }
    }

    /// Identity of the bound attachment; changes whenever the views change.
    pub fn serial(&self) -> u64 {
        match self {
            Self::Texture(rt) => rt.serial,
            Self::SwapChain { .. } => self.texture_serial(),
        }
    }

    /// Serial of the texture storage this target renders into, or 0 for renderbuffers.
    pub fn texture_serial(&self) -> u64 {
        match self {
            Self::Texture(rt) => rt.texture_serial,
            Self::SwapChain { swap_chain, depth } => {
                let chain = lock_swap_chain(swap_chain);
                match depth {
                    false => chain.offscreen_serial(),
                    true => chain.depth_serial(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::device::soft::{SoftwareDeviceFactory, SoftwareDeviceOptions};
    use crate::swap_chain::SwapChain;
    use crate::{Renderer, RendererConfig};

    #[test]
    fn swap_chain_targets_follow_resets() {
        let factory = SoftwareDeviceFactory::new(SoftwareDeviceOptions::default());
        let mut renderer = Renderer::new(Arc::new(factory), RendererConfig::default());
        renderer.initialize().unwrap();

        let chain: SharedSwapChain = Arc::new(Mutex::new(SwapChain::new(
            None,
            InternalFormat::Rgba8,
            Some(InternalFormat::Depth24Stencil8),
        )));
        lock_swap_chain(&chain).reset(&mut renderer, 16, 8, 1).unwrap();

        let color = RenderTarget::swap_chain_color(chain.clone());
        let depth = RenderTarget::swap_chain_depth(chain.clone());
        assert_eq!((color.width(), color.height()), (16, 8));
        assert!(color.render_target_view().is_some());
        assert!(color.depth_stencil_view().is_none());
        assert!(depth.is_depth());
        assert_eq!(depth.actual_format(), DxgiFormat::D24UnormS8Uint);
        let serial = color.serial();

        lock_swap_chain(&chain).reset(&mut renderer, 4, 4, 1).unwrap();
        assert_eq!(color.width(), 4);
        assert_ne!(color.serial(), serial);
    }
}
