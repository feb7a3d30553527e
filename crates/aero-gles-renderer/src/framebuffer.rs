//! Attachment sets the renderer binds as output.

use crate::caps::MAX_DRAW_BUFFERS;
use crate::error::RendererError;
use crate::render_target::RenderTarget;
use crate::swap_chain::{lock_swap_chain, SharedSwapChain};

#[derive(Debug, Clone, Default)]
pub struct Framebuffer {
    color: [Option<RenderTarget>; MAX_DRAW_BUFFERS],
    depth_stencil: Option<RenderTarget>,
    read_buffer: usize,
}

impl Framebuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// The default framebuffer of a surface: its swap chain's color buffer, plus the depth
    /// buffer when the chain has one.
    pub fn for_swap_chain(swap_chain: &SharedSwapChain) -> Self {
        let has_depth = lock_swap_chain(swap_chain).depth_buffer_format().is_some();
        let mut framebuffer = Self::new();
        framebuffer.color[0] = Some(RenderTarget::swap_chain_color(swap_chain.clone()));
        if has_depth {
            framebuffer.depth_stencil = Some(RenderTarget::swap_chain_depth(swap_chain.clone()));
        }
        framebuffer
    }

    pub fn set_color_attachment(
        &mut self,
        index: usize,
        target: Option<RenderTarget>,
    ) -> Result<(), RendererError> {
        let slot = self.color.get_mut(index).ok_or_else(|| {
            RendererError::InvalidValue(format!(
                "color attachment {index} is not below {MAX_DRAW_BUFFERS}"
            ))
        })?;
        if target.as_ref().is_some_and(RenderTarget::is_depth) {
            return Err(RendererError::InvalidOperation(
                "depth buffers cannot be color attachments".to_owned(),
            ));
        }
        *slot = target;
        Ok(())
    }

    pub fn set_depth_stencil_attachment(
        &mut self,
        target: Option<RenderTarget>,
    ) -> Result<(), RendererError> {
        if target.as_ref().is_some_and(|t| !t.is_depth()) {
            return Err(RendererError::InvalidOperation(
                "color buffers cannot be depth-stencil attachments".to_owned(),
            ));
        }
        self.depth_stencil = target;
        Ok(())
    }

    pub fn set_read_buffer(&mut self, index: usize) -> Result<(), RendererError> {
        if index >= MAX_DRAW_BUFFERS {
            return Err(RendererError::InvalidValue(format!(
                "read buffer {index} is not below {MAX_DRAW_BUFFERS}"
            )));
        }
        self.read_buffer = index;
        Ok(())
    }

    pub fn color_attachment(&self, index: usize) -> Option<&RenderTarget> {
        self.color.get(index).and_then(Option::as_ref)
    }

    /// Attached color buffers with their attachment index.
    pub fn color_attachments(&self) -> impl Iterator<Item = (usize, &RenderTarget)> {
        self.color
            .iter()
            .enumerate()
            .filter_map(|(i, target)| target.as_ref().map(|t| (i, t)))
    }

    pub fn color_attachment_count(&self) -> usize {
        self.color_attachments().count()
    }

    pub fn first_color_buffer(&self) -> Option<&RenderTarget> {
        self.color_attachments().next().map(|(_, target)| target)
    }

    pub fn read_color_buffer(&self) -> Option<&RenderTarget> {
        self.color_attachment(self.read_buffer)
    }

    pub fn depth_stencil(&self) -> Option<&RenderTarget> {
        self.depth_stencil.as_ref()
    }
}
