//! Window and pbuffer surfaces.
//!
//! A surface owns one [`SharedSwapChain`] for its whole life. Device loss releases the chain's
//! buffers and a later reset reallocates them inside the same shared chain, so render targets
//! and texture storages that view the chain stay attached.

use std::fmt;
use std::sync::{Arc, Mutex};

use aero_gles_renderer::device::NativeWindowId;
use aero_gles_renderer::{lock_swap_chain, Renderer, SharedSwapChain, TextureStorage2D};
use tracing::{debug, error};

use crate::config::Config;
use crate::consts::*;
use crate::error::EglError;

/// The windowing system's side of a window surface.
///
/// Resize notifications arrive through `Display::on_window_resized`; the surface only asks
/// the window for its current state.
pub trait NativeWindow: Send + Sync + fmt::Debug {
    fn id(&self) -> NativeWindowId;

    /// Client area size in pixels, or `None` when the window is gone.
    fn client_size(&self) -> Option<(u32, u32)>;

    fn is_minimized(&self) -> bool {
        false
    }
}

/// `EGL_TEXTURE_FORMAT` of a pbuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureFormat {
    #[default]
    NoTexture,
    Rgb,
    Rgba,
}

impl TextureFormat {
    pub fn from_egl(value: EGLint) -> Option<Self> {
        match value {
            EGL_NO_TEXTURE => Some(Self::NoTexture),
            EGL_TEXTURE_RGB => Some(Self::Rgb),
            EGL_TEXTURE_RGBA => Some(Self::Rgba),
            _ => None,
        }
    }

    pub fn to_egl(self) -> EGLint {
        match self {
            Self::NoTexture => EGL_NO_TEXTURE,
            Self::Rgb => EGL_TEXTURE_RGB,
            Self::Rgba => EGL_TEXTURE_RGBA,
        }
    }
}

/// `EGL_TEXTURE_TARGET` of a pbuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextureTarget {
    #[default]
    NoTexture,
    Texture2D,
}

impl TextureTarget {
    pub fn from_egl(value: EGLint) -> Option<Self> {
        match value {
            EGL_NO_TEXTURE => Some(Self::NoTexture),
            EGL_TEXTURE_2D => Some(Self::Texture2D),
            _ => None,
        }
    }

    pub fn to_egl(self) -> EGLint {
        match self {
            Self::NoTexture => EGL_NO_TEXTURE,
            Self::Texture2D => EGL_TEXTURE_2D,
        }
    }
}

/// Options accepted by `eglCreateWindowSurface`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WindowSurfaceOptions {
    pub post_sub_buffer_supported: bool,
    /// Use `width` x `height` instead of following the window's client area.
    pub fixed_size: bool,
    pub width: i32,
    pub height: i32,
}

#[derive(Debug)]
pub struct Surface {
    config: Config,
    window: Option<Arc<dyn NativeWindow>>,
    swap_chain: Option<SharedSwapChain>,

    width: i32,
    height: i32,
    fixed_size: bool,
    post_sub_buffer_supported: bool,

    swap_interval: i32,
    swap_interval_dirty: bool,

    texture_format: TextureFormat,
    texture_target: TextureTarget,
    texture_bound: bool,
}

impl Surface {
    fn new(config: Config, window: Option<Arc<dyn NativeWindow>>) -> Self {
        let mut surface = Self {
            config,
            window,
            swap_chain: None,
            width: -1,
            height: -1,
            fixed_size: false,
            post_sub_buffer_supported: false,
            swap_interval: -1,
            swap_interval_dirty: false,
            texture_format: TextureFormat::NoTexture,
            texture_target: TextureTarget::NoTexture,
            texture_bound: false,
        };
        surface.set_swap_interval(1);
        surface
    }

    pub fn for_window(config: Config, window: Arc<dyn NativeWindow>, options: WindowSurfaceOptions) -> Self {
        let mut surface = Self::new(config, Some(window));
        surface.post_sub_buffer_supported = options.post_sub_buffer_supported;
        surface.fixed_size = options.fixed_size;
        if options.fixed_size {
            surface.width = options.width;
            surface.height = options.height;
        }
        surface
    }

    pub fn offscreen(
        config: Config,
        width: i32,
        height: i32,
        texture_format: TextureFormat,
        texture_target: TextureTarget,
    ) -> Self {
        let mut surface = Self::new(config, None);
        surface.width = width;
        surface.height = height;
        surface.texture_format = texture_format;
        surface.texture_target = texture_target;
        surface
    }

    pub fn initialize(&mut self, renderer: &mut Renderer) -> Result<(), EglError> {
        self.reset_swap_chain(renderer)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn window_id(&self) -> Option<NativeWindowId> {
        self.window.as_ref().map(|window| window.id())
    }

    /// -1 until the first swap chain reset.
    pub fn width(&self) -> i32 {
        self.width
    }

    pub fn height(&self) -> i32 {
        self.height
    }

    pub fn is_fixed_size(&self) -> bool {
        self.fixed_size
    }

    pub fn swap_interval(&self) -> i32 {
        self.swap_interval
    }

    pub fn is_swap_interval_dirty(&self) -> bool {
        self.swap_interval_dirty
    }

    pub fn swap_chain(&self) -> Option<&SharedSwapChain> {
        self.swap_chain.as_ref()
    }

    pub fn texture_format(&self) -> TextureFormat {
        self.texture_format
    }

    pub fn texture_target(&self) -> TextureTarget {
        self.texture_target
    }

    pub fn is_texture_bound(&self) -> bool {
        self.texture_bound
    }

    /// Releases the swap chain's device objects ahead of a device reset, and any texture
    /// binding of the offscreen buffer.
    pub fn release(&mut self) {
        if let Some(chain) = &self.swap_chain {
            lock_swap_chain(chain).release();
        }
        self.texture_bound = false;
    }

    /// Full reset at the window's client size, or the stored size for fixed-size and
    /// offscreen surfaces.
    pub fn reset_swap_chain(&mut self, renderer: &mut Renderer) -> Result<(), EglError> {
        let (width, height) = match &self.window {
            Some(window) if !self.fixed_size => window.client_size().ok_or_else(|| {
                error!(window = ?window.id(), "could not read the window client area");
                EglError::BadNativeWindow
            })?,
            _ => (self.width.max(0) as u32, self.height.max(0) as u32),
        };

        if self.swap_chain.is_none() {
            let chain = renderer.create_swap_chain(
                self.window_id(),
                self.config.render_target_format(),
                self.config.depth_stencil_format(),
            );
            self.swap_chain = Some(Arc::new(Mutex::new(chain)));
        }
        self.reset_swap_chain_sized(renderer, width, height)
    }

    fn reset_swap_chain_sized(&mut self, renderer: &mut Renderer, width: u32, height: u32) -> Result<(), EglError> {
        let Some(chain) = &self.swap_chain else {
            return Err(EglError::BadAlloc);
        };
        lock_swap_chain(chain)
            .reset(renderer, width, height, self.swap_interval as u32)
            .map_err(|err| {
                error!(error = %err, width, height, "swap chain reset failed");
                EglError::from(err)
            })?;

        self.width = width as i32;
        self.height = height as i32;
        self.swap_interval_dirty = false;
        debug!(width, height, interval = self.swap_interval, "surface swap chain reset");
        Ok(())
    }

    /// Resizes the presentable buffers, keeping the swap interval.
    pub fn resize_swap_chain(&mut self, renderer: &mut Renderer, width: u32, height: u32) -> Result<(), EglError> {
        let Some(chain) = &self.swap_chain else {
            return Err(EglError::BadAlloc);
        };
        lock_swap_chain(chain)
            .resize(renderer, width.max(1), height.max(1))
            .map_err(|err| {
                error!(error = %err, width, height, "swap chain resize failed");
                EglError::from(err)
            })?;

        self.width = width as i32;
        self.height = height as i32;
        debug!(width, height, "surface swap chain resized");
        Ok(())
    }

    /// Applies a pending swap interval or window size change. Returns whether the swap
    /// chain changed, in which case the current context must be made current again.
    pub fn check_for_out_of_date_swap_chain(&mut self, renderer: &mut Renderer) -> Result<bool, EglError> {
        let (mut client_width, mut client_height) = (self.width.max(0) as u32, self.height.max(0) as u32);
        let mut size_dirty = false;
        if let Some(window) = self.window.as_ref().filter(|_| !self.fixed_size) {
            if !window.is_minimized() {
                if let Some((width, height)) = window.client_size() {
                    size_dirty = width as i32 != self.width || height as i32 != self.height;
                    client_width = width;
                    client_height = height;
                }
            }
        }

        let interval_dirty = self.swap_interval_dirty;
        if interval_dirty {
            self.reset_swap_chain_sized(renderer, client_width, client_height)?;
        } else if size_dirty {
            self.resize_swap_chain(renderer, client_width, client_height)?;
        }
        Ok(interval_dirty || size_dirty)
    }

    /// Presents `x, y, width, height` of the offscreen buffer, clipped to the surface.
    /// Returns whether the swap chain changed afterwards.
    pub fn swap_rect(
        &mut self,
        renderer: &mut Renderer,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    ) -> Result<bool, EglError> {
        if x < 0 || y < 0 || width < 0 || height < 0 {
            return Err(EglError::BadParameter);
        }
        let Some(chain) = self.swap_chain.clone() else {
            return Ok(false);
        };

        let width = width.min(self.width - x);
        let height = height.min(self.height - y);
        if width <= 0 || height <= 0 {
            return Ok(false);
        }

        lock_swap_chain(&chain)
            .swap_rect(renderer, x as u32, y as u32, width as u32, height as u32)
            .map_err(|err| {
                error!(error = %err, "present failed");
                EglError::from(err)
            })?;
        self.check_for_out_of_date_swap_chain(renderer)
    }

    pub fn swap(&mut self, renderer: &mut Renderer) -> Result<bool, EglError> {
        let (width, height) = (self.width, self.height);
        self.swap_rect(renderer, 0, 0, width, height)
    }

    /// `eglPostSubBufferNV`. Does nothing on surfaces created without post-sub-buffer support.
    pub fn post_sub_buffer(
        &mut self,
        renderer: &mut Renderer,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    ) -> Result<bool, EglError> {
        if x < 0 || y < 0 || width < 0 || height < 0 {
            return Err(EglError::BadParameter);
        }
        if !self.post_sub_buffer_supported {
            return Ok(false);
        }
        self.swap_rect(renderer, x, y, width, height)
    }

    /// Clamps `interval` to the config's bounds. Only an actual change of the clamped value
    /// schedules a swap chain reset.
    pub fn set_swap_interval(&mut self, interval: i32) {
        let clamped = interval.clamp(self.config.min_swap_interval(), self.config.max_swap_interval());
        if clamped == self.swap_interval {
            return;
        }
        self.swap_interval = clamped;
        self.swap_interval_dirty = true;
    }

    /// `eglBindTexImage`: the offscreen buffer as a texture storage.
    pub fn bind_tex_image(&mut self, renderer: &Renderer) -> Result<TextureStorage2D, EglError> {
        if self.texture_format == TextureFormat::NoTexture || self.texture_target == TextureTarget::NoTexture {
            return Err(EglError::BadMatch);
        }
        if self.texture_bound {
            return Err(EglError::BadAccess);
        }
        let chain = self.swap_chain.as_ref().ok_or(EglError::BadAlloc)?;
        let storage = renderer.create_texture_storage_2d_from_swap_chain(chain);
        self.texture_bound = true;
        Ok(storage)
    }

    pub fn release_tex_image(&mut self) -> Result<(), EglError> {
        if self.texture_format == TextureFormat::NoTexture || self.texture_target == TextureTarget::NoTexture {
            return Err(EglError::BadMatch);
        }
        self.texture_bound = false;
        Ok(())
    }

    /// `eglQuerySurface`.
    pub fn query(&self, attribute: EGLint) -> Result<EGLint, EglError> {
        let value = match attribute {
            EGL_WIDTH => self.width,
            EGL_HEIGHT => self.height,
            EGL_CONFIG_ID => self.config.config_id(),
            EGL_RENDER_BUFFER => EGL_BACK_BUFFER,
            EGL_SWAP_BEHAVIOR => EGL_BUFFER_PRESERVED,
            EGL_TEXTURE_FORMAT => self.texture_format.to_egl(),
            EGL_TEXTURE_TARGET => self.texture_target.to_egl(),
            EGL_MIPMAP_TEXTURE => EGL_FALSE,
            EGL_LARGEST_PBUFFER => EGL_FALSE,
            EGL_POST_SUB_BUFFER_SUPPORTED_NV => egl_bool(self.post_sub_buffer_supported),
            EGL_FIXED_SIZE_ANGLE => egl_bool(self.fixed_size),
            _ => return Err(EglError::BadAttribute),
        };
        Ok(value)
    }
}
