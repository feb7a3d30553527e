//! The EGL display: renderer owner and surface/context bookkeeping.
//!
//! A display is `Unconfigured` until [`Display::initialize`] creates a renderer and at least
//! one config; [`Display::terminate`] (or a device reset that fails) returns it to
//! `Unconfigured`. The object itself lives on in its [`crate::DisplayRegistry`] and may be
//! initialized again.
//!
//! The renderer never calls back into the display. Operations that can observe device loss
//! poll the renderer and notify every context here.

use std::collections::BTreeMap;
use std::sync::Arc;

use aero_gles_renderer::device::wgpu_device::WgpuDeviceFactory;
use aero_gles_renderer::device::{DeviceFactory, NativeWindowId};
use aero_gles_renderer::{Framebuffer, Renderer, RendererConfig, TextureStorage2D};
use tracing::{debug, error, info, warn};

use crate::attrib::attribute_pairs;
use crate::config::{Config, ConfigMatches, ConfigSet, SurfaceType};
use crate::consts::*;
use crate::context::Context;
use crate::error::EglError;
use crate::registry::NativeDisplayId;
use crate::surface::{NativeWindow, Surface, TextureFormat, TextureTarget, WindowSurfaceOptions};

pub const EGL_VERSION_STRING: &str = "1.4 (aero-gles)";
pub const EGL_CLIENT_APIS_STRING: &str = "OpenGL_ES";

/// Which device backs the renderer of a display.
#[derive(Debug, Clone, Default)]
pub enum DeviceSelection {
    /// The system GPU through wgpu.
    #[default]
    Hardware,
    Factory(Arc<dyn DeviceFactory>),
}

impl DeviceSelection {
    fn factory(&self) -> Arc<dyn DeviceFactory> {
        match self {
            Self::Hardware => Arc::new(WgpuDeviceFactory::new()),
            Self::Factory(factory) => factory.clone(),
        }
    }
}

/// Everything a display needs to create its renderer.
#[derive(Debug, Clone)]
pub struct DisplayAttributes {
    pub device: DeviceSelection,
    pub renderer: RendererConfig,
}

impl Default for DisplayAttributes {
    fn default() -> Self {
        Self {
            device: DeviceSelection::Hardware,
            renderer: RendererConfig::from_env(),
        }
    }
}

impl DisplayAttributes {
    pub fn with_factory(factory: Arc<dyn DeviceFactory>) -> Self {
        Self {
            device: DeviceSelection::Factory(factory),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SurfaceId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContextId(u64);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct CurrentBinding {
    context: Option<ContextId>,
    draw: Option<SurfaceId>,
    read: Option<SurfaceId>,
}

#[derive(Debug)]
pub struct Display {
    native: NativeDisplayId,
    attributes: DisplayAttributes,
    renderer: Option<Renderer>,
    configs: ConfigSet,
    surfaces: BTreeMap<SurfaceId, Surface>,
    contexts: BTreeMap<ContextId, Arc<dyn Context>>,
    current: CurrentBinding,
    next_object_id: u64,
    vendor: String,
    extensions: String,
}

impl Display {
    pub fn new(native: NativeDisplayId, attributes: DisplayAttributes) -> Self {
        Self {
            native,
            attributes,
            renderer: None,
            configs: ConfigSet::new(),
            surfaces: BTreeMap::new(),
            contexts: BTreeMap::new(),
            current: CurrentBinding::default(),
            next_object_id: 1,
            vendor: String::new(),
            extensions: String::new(),
        }
    }

    pub fn native_display(&self) -> NativeDisplayId {
        self.native
    }

    pub fn attributes(&self) -> &DisplayAttributes {
        &self.attributes
    }

    /// Replaces the renderer attributes. Ignored once the display is initialized.
    pub fn set_attributes(&mut self, attributes: DisplayAttributes) -> bool {
        if self.is_initialized() {
            return false;
        }
        self.attributes = attributes;
        true
    }

    pub fn is_initialized(&self) -> bool {
        self.renderer.is_some() && !self.configs.is_empty()
    }

    pub fn renderer(&self) -> Option<&Renderer> {
        self.renderer.as_ref()
    }

    pub fn renderer_mut(&mut self) -> Option<&mut Renderer> {
        self.renderer.as_mut()
    }

    pub fn configs(&self) -> &ConfigSet {
        &self.configs
    }

    fn require_initialized(&self) -> Result<(), EglError> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(EglError::NotInitialized)
        }
    }

    /// Creates the renderer and the config set. Does nothing when already initialized.
    pub fn initialize(&mut self) -> Result<(), EglError> {
        if self.is_initialized() {
            return Ok(());
        }

        let mut renderer = Renderer::new(self.attributes.device.factory(), self.attributes.renderer.clone());
        if let Err(err) = renderer.initialize() {
            error!(error = %err, display = ?self.native, "display initialization failed");
            self.terminate();
            return Err(EglError::NotInitialized);
        }

        let min_swap_interval = renderer.min_swap_interval();
        let max_swap_interval = renderer.max_swap_interval();
        let max_texture_size = renderer.max_texture_dimension() as EGLint;

        let mut configs = ConfigSet::new();
        for desc in renderer.generate_configs() {
            if configs
                .add(&desc, min_swap_interval, max_swap_interval, max_texture_size, max_texture_size)
                .is_err()
            {
                self.terminate();
                return Err(EglError::NotInitialized);
            }
        }
        // The set is already in canonical order, so ids follow it.
        configs.assign_ids();
        if configs.is_empty() {
            error!(display = ?self.native, "renderer advertises no usable configs");
            self.terminate();
            return Err(EglError::NotInitialized);
        }

        self.extensions = extension_string_for(&renderer);
        self.vendor = match renderer.description() {
            Some(adapter) => format!("aero ({adapter})"),
            None => "aero".to_owned(),
        };
        info!(
            display = ?self.native,
            configs = configs.len(),
            feature_level = ?renderer.feature_level(),
            "display initialized"
        );
        self.renderer = Some(renderer);
        self.configs = configs;
        Ok(())
    }

    /// Destroys every surface, then every context, then the renderer. Safe to repeat.
    pub fn terminate(&mut self) {
        for (_, mut surface) in std::mem::take(&mut self.surfaces) {
            surface.release();
        }
        if let Some(context) = self.current.context.and_then(|id| self.contexts.get(&id)) {
            context.make_current(None);
        }
        self.contexts.clear();
        self.current = CurrentBinding::default();

        if let Some(mut renderer) = self.renderer.take() {
            renderer.release();
            debug!(display = ?self.native, "display terminated");
        }
        self.configs.clear();
        self.vendor.clear();
        self.extensions.clear();
    }

    pub fn extension_string(&self) -> &str {
        &self.extensions
    }

    pub fn vendor_string(&self) -> &str {
        &self.vendor
    }

    /// `eglQueryString`.
    pub fn query_string(&self, name: EGLint) -> Result<&str, EglError> {
        self.require_initialized()?;
        match name {
            EGL_VENDOR => Ok(&self.vendor),
            EGL_VERSION => Ok(EGL_VERSION_STRING),
            EGL_EXTENSIONS => Ok(&self.extensions),
            EGL_CLIENT_APIS => Ok(EGL_CLIENT_APIS_STRING),
            _ => Err(EglError::BadParameter),
        }
    }

    pub fn is_valid_config(&self, config_id: EGLint) -> bool {
        self.configs.get(config_id).is_some()
    }

    pub fn is_valid_surface(&self, surface: SurfaceId) -> bool {
        self.surfaces.contains_key(&surface)
    }

    pub fn is_valid_context(&self, context: ContextId) -> bool {
        self.contexts.contains_key(&context)
    }

    pub fn surface(&self, surface: SurfaceId) -> Option<&Surface> {
        self.surfaces.get(&surface)
    }

    pub fn context(&self, context: ContextId) -> Option<&Arc<dyn Context>> {
        self.contexts.get(&context)
    }

    pub fn current_context(&self) -> Option<ContextId> {
        self.current.context
    }

    pub fn current_draw_surface(&self) -> Option<SurfaceId> {
        self.current.draw
    }

    pub fn current_read_surface(&self) -> Option<SurfaceId> {
        self.current.read
    }

    /// `eglChooseConfig`; an empty list is `eglGetConfigs`.
    pub fn get_configs(&self, attributes: &[EGLint], capacity: usize) -> Result<ConfigMatches, EglError> {
        self.require_initialized()?;
        self.configs.get_configs(attributes, capacity)
    }

    pub fn get_config_attrib(&self, config_id: EGLint, attribute: EGLint) -> Result<EGLint, EglError> {
        self.require_initialized()?;
        let config = self.configs.get(config_id).ok_or(EglError::BadConfig)?;
        config.attribute(attribute).ok_or(EglError::BadAttribute)
    }

    fn config(&self, config_id: EGLint) -> Result<Config, EglError> {
        self.configs.get(config_id).cloned().ok_or(EglError::BadConfig)
    }

    fn next_id(&mut self) -> u64 {
        let id = self.next_object_id;
        self.next_object_id += 1;
        id
    }

    fn has_window_surface(&self, window: NativeWindowId) -> bool {
        self.surfaces
            .values()
            .any(|surface| surface.window_id() == Some(window))
    }

    /// Marks every context lost.
    pub fn notify_device_lost(&self) {
        for context in self.contexts.values() {
            context.mark_context_lost();
        }
    }

    /// Polls the renderer for loss, notifying contexts when it is lost.
    pub fn test_device_lost(&mut self) -> bool {
        let lost = self
            .renderer
            .as_mut()
            .is_some_and(|renderer| renderer.test_device_lost());
        if lost {
            self.notify_device_lost();
        }
        lost
    }

    fn recover_if_lost(&mut self) -> Result<(), EglError> {
        if self.test_device_lost() {
            self.restore_lost_device()?;
        }
        Ok(())
    }

    /// Notifies contexts when `result` reports device loss.
    fn lost_aware<T>(&self, result: Result<T, EglError>) -> Result<T, EglError> {
        if let Err(EglError::ContextLost) = &result {
            self.notify_device_lost();
        }
        result
    }

    /// Recreates the device and every surface's swap chain.
    ///
    /// Refused while any context wants reset notifications: the application has to destroy
    /// those first. A failed device reset terminates the display.
    pub fn restore_lost_device(&mut self) -> Result<(), EglError> {
        let Some(renderer) = self.renderer.as_mut() else {
            return Err(EglError::NotInitialized);
        };
        if self
            .contexts
            .values()
            .any(|context| context.is_reset_notification_enabled())
        {
            warn!(display = ?self.native, "device recovery refused: reset notification contexts are alive");
            return Err(EglError::ContextLost);
        }

        for surface in self.surfaces.values_mut() {
            surface.release();
        }
        if let Err(err) = renderer.reset_device() {
            error!(error = %err, display = ?self.native, "device recovery failed");
            self.terminate();
            return Err(EglError::BadAlloc);
        }
        let restored = self
            .surfaces
            .values_mut()
            .try_for_each(|surface| surface.reset_swap_chain(renderer));
        self.lost_aware(restored)?;
        info!(display = ?self.native, surfaces = self.surfaces.len(), "lost device restored");
        Ok(())
    }

    /// `eglCreateWindowSurface`.
    pub fn create_window_surface(
        &mut self,
        config_id: EGLint,
        window: Arc<dyn NativeWindow>,
        attributes: &[EGLint],
    ) -> Result<SurfaceId, EglError> {
        self.require_initialized()?;
        let config = self.config(config_id)?;

        let mut options = WindowSurfaceOptions::default();
        for (key, value) in attribute_pairs(attributes)? {
            match key {
                EGL_RENDER_BUFFER => match value {
                    EGL_BACK_BUFFER => {}
                    // Front buffer rendering is not supported.
                    EGL_SINGLE_BUFFER => return Err(EglError::BadMatch),
                    _ => return Err(EglError::BadAttribute),
                },
                EGL_POST_SUB_BUFFER_SUPPORTED_NV => options.post_sub_buffer_supported = value != EGL_FALSE,
                EGL_WIDTH => options.width = value,
                EGL_HEIGHT => options.height = value,
                EGL_FIXED_SIZE_ANGLE => options.fixed_size = value != EGL_FALSE,
                EGL_VG_COLORSPACE | EGL_VG_ALPHA_FORMAT => return Err(EglError::BadMatch),
                _ => return Err(EglError::BadAttribute),
            }
        }

        if options.width < 0 || options.height < 0 {
            return Err(EglError::BadParameter);
        }
        if !options.fixed_size {
            options.width = -1;
            options.height = -1;
        }
        if !config.surface_type().contains(SurfaceType::WINDOW) {
            return Err(EglError::BadMatch);
        }
        if self.has_window_surface(window.id()) {
            return Err(EglError::BadAlloc);
        }

        self.recover_if_lost()?;

        let mut surface = Surface::for_window(config, window, options);
        let renderer = self.renderer.as_mut().ok_or(EglError::NotInitialized)?;
        let initialized = surface.initialize(renderer);
        self.lost_aware(initialized)?;

        let id = SurfaceId(self.next_id());
        debug!(surface = ?id, window = ?surface.window_id(), width = surface.width(), height = surface.height(), "window surface created");
        self.surfaces.insert(id, surface);
        Ok(id)
    }

    /// `eglCreatePbufferSurface`.
    pub fn create_offscreen_surface(&mut self, config_id: EGLint, attributes: &[EGLint]) -> Result<SurfaceId, EglError> {
        self.require_initialized()?;
        let config = self.config(config_id)?;

        let (mut width, mut height) = (0, 0);
        let mut texture_format = TextureFormat::NoTexture;
        let mut texture_target = TextureTarget::NoTexture;
        for (key, value) in attribute_pairs(attributes)? {
            match key {
                EGL_WIDTH => width = value,
                EGL_HEIGHT => height = value,
                // Never larger than requested.
                EGL_LARGEST_PBUFFER => {}
                EGL_TEXTURE_FORMAT => {
                    texture_format = TextureFormat::from_egl(value).ok_or(EglError::BadAttribute)?;
                }
                EGL_TEXTURE_TARGET => {
                    texture_target = TextureTarget::from_egl(value).ok_or(EglError::BadAttribute)?;
                }
                EGL_MIPMAP_TEXTURE => {
                    if value != EGL_FALSE {
                        return Err(EglError::BadAttribute);
                    }
                }
                EGL_VG_COLORSPACE | EGL_VG_ALPHA_FORMAT => return Err(EglError::BadMatch),
                _ => return Err(EglError::BadAttribute),
            }
        }

        if width < 0 || height < 0 {
            return Err(EglError::BadParameter);
        }
        if width == 0 || height == 0 {
            return Err(EglError::BadAttribute);
        }
        let npot = !(width as u32).is_power_of_two() || !(height as u32).is_power_of_two();
        let supports_npot = self
            .renderer
            .as_ref()
            .is_some_and(Renderer::supports_npot_textures);
        if texture_format != TextureFormat::NoTexture && npot && !supports_npot {
            return Err(EglError::BadMatch);
        }
        if (texture_format == TextureFormat::NoTexture) != (texture_target == TextureTarget::NoTexture) {
            return Err(EglError::BadMatch);
        }
        if !config.surface_type().contains(SurfaceType::PBUFFER) {
            return Err(EglError::BadMatch);
        }
        if (texture_format == TextureFormat::Rgb && !config.bind_to_texture_rgb())
            || (texture_format == TextureFormat::Rgba && !config.bind_to_texture_rgba())
        {
            return Err(EglError::BadAttribute);
        }

        self.recover_if_lost()?;

        let mut surface = Surface::offscreen(config, width, height, texture_format, texture_target);
        let renderer = self.renderer.as_mut().ok_or(EglError::NotInitialized)?;
        let initialized = surface.initialize(renderer);
        self.lost_aware(initialized)?;

        let id = SurfaceId(self.next_id());
        debug!(surface = ?id, width, height, "pbuffer surface created");
        self.surfaces.insert(id, surface);
        Ok(id)
    }

    /// Registers a client API context for `config_id`.
    pub fn create_context(
        &mut self,
        config_id: EGLint,
        client_version: EGLint,
        context: Arc<dyn Context>,
    ) -> Result<ContextId, EglError> {
        self.require_initialized()?;
        self.config(config_id)?;
        if !(2..=3).contains(&client_version) {
            return Err(EglError::BadConfig);
        }

        if self.test_device_lost() && self.restore_lost_device().is_err() {
            return Err(EglError::ContextLost);
        }

        let renderer = self.renderer.as_ref().ok_or(EglError::NotInitialized)?;
        if client_version > 2 && renderer.major_shader_model() < 4 {
            return Err(EglError::BadConfig);
        }

        let id = ContextId(self.next_id());
        self.contexts.insert(id, context);
        debug!(context = ?id, client_version, "context created");
        Ok(id)
    }

    pub fn destroy_surface(&mut self, surface: SurfaceId) -> Result<(), EglError> {
        let mut removed = self.surfaces.remove(&surface).ok_or(EglError::BadSurface)?;
        removed.release();
        if self.current.draw == Some(surface) {
            self.current.draw = None;
        }
        if self.current.read == Some(surface) {
            self.current.read = None;
        }
        Ok(())
    }

    pub fn destroy_context(&mut self, context: ContextId) -> Result<(), EglError> {
        let removed = self.contexts.remove(&context).ok_or(EglError::BadContext)?;
        if self.current.context == Some(context) {
            removed.make_current(None);
            self.current = CurrentBinding::default();
        }
        Ok(())
    }

    fn default_framebuffer(&self, surface: Option<SurfaceId>) -> Option<Framebuffer> {
        surface
            .and_then(|id| self.surfaces.get(&id))
            .and_then(Surface::swap_chain)
            .map(Framebuffer::for_swap_chain)
    }

    /// `eglMakeCurrent`. `None` for the context releases the current binding.
    pub fn make_current(
        &mut self,
        draw: Option<SurfaceId>,
        read: Option<SurfaceId>,
        context: Option<ContextId>,
    ) -> Result<(), EglError> {
        let previous = self.current.context.and_then(|id| self.contexts.get(&id)).cloned();

        let Some(context_id) = context else {
            if draw.is_some() || read.is_some() {
                return Err(EglError::BadMatch);
            }
            if let Some(previous) = previous {
                previous.make_current(None);
            }
            self.current = CurrentBinding::default();
            return Ok(());
        };

        self.require_initialized()?;
        let target = self.contexts.get(&context_id).cloned().ok_or(EglError::BadContext)?;
        if [draw, read]
            .into_iter()
            .flatten()
            .any(|surface| !self.surfaces.contains_key(&surface))
        {
            return Err(EglError::BadSurface);
        }
        if self.test_device_lost() {
            return Err(EglError::ContextLost);
        }

        if let Some(previous) = previous.filter(|_| self.current.context != Some(context_id)) {
            previous.make_current(None);
        }
        target.make_current(self.default_framebuffer(draw));
        self.current = CurrentBinding {
            context: Some(context_id),
            draw,
            read,
        };
        Ok(())
    }

    /// Rebinds the current context when `surface` is its draw surface.
    fn refresh_current(&self, surface: SurfaceId) {
        if self.current.draw != Some(surface) {
            return;
        }
        if let Some(context) = self.current.context.and_then(|id| self.contexts.get(&id)) {
            context.make_current(self.default_framebuffer(Some(surface)));
        }
    }

    fn present(&mut self, id: SurfaceId, region: Option<(i32, i32, i32, i32)>) -> Result<(), EglError> {
        self.require_initialized()?;
        let renderer = self.renderer.as_mut().ok_or(EglError::NotInitialized)?;
        let surface = self.surfaces.get_mut(&id).ok_or(EglError::BadSurface)?;
        if renderer.is_device_lost() {
            return Err(EglError::ContextLost);
        }

        let presented = match region {
            None => surface.swap(renderer),
            Some((x, y, width, height)) => surface.post_sub_buffer(renderer, x, y, width, height),
        };
        if self.lost_aware(presented)? {
            self.refresh_current(id);
        }
        Ok(())
    }

    /// `eglSwapBuffers`.
    pub fn swap_buffers(&mut self, surface: SurfaceId) -> Result<(), EglError> {
        self.present(surface, None)
    }

    /// `eglPostSubBufferNV`.
    pub fn post_sub_buffer(
        &mut self,
        surface: SurfaceId,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
    ) -> Result<(), EglError> {
        self.present(surface, Some((x, y, width, height)))
    }

    /// `eglSwapInterval` on the current draw surface. Applied at the next swap.
    pub fn set_swap_interval(&mut self, interval: EGLint) -> Result<(), EglError> {
        self.require_initialized()?;
        let id = self.current.draw.ok_or(EglError::BadSurface)?;
        let surface = self.surfaces.get_mut(&id).ok_or(EglError::BadSurface)?;
        surface.set_swap_interval(interval);
        Ok(())
    }

    /// Resize notification from the windowing system.
    pub fn on_window_resized(&mut self, window: NativeWindowId) -> Result<(), EglError> {
        self.require_initialized()?;
        let id = self
            .surfaces
            .iter()
            .find(|(_, surface)| surface.window_id() == Some(window))
            .map(|(id, _)| *id)
            .ok_or(EglError::BadNativeWindow)?;
        let renderer = self.renderer.as_mut().ok_or(EglError::NotInitialized)?;
        let Some(surface) = self.surfaces.get_mut(&id) else {
            return Err(EglError::BadSurface);
        };
        let checked = surface.check_for_out_of_date_swap_chain(renderer);
        if self.lost_aware(checked)? {
            self.refresh_current(id);
        }
        Ok(())
    }

    /// Resizes a surface's swap chain explicitly, as fixed-size window surfaces never follow
    /// their window.
    pub fn resize_surface(&mut self, id: SurfaceId, width: i32, height: i32) -> Result<(), EglError> {
        self.require_initialized()?;
        if width < 0 || height < 0 {
            return Err(EglError::BadParameter);
        }
        let renderer = self.renderer.as_mut().ok_or(EglError::NotInitialized)?;
        let surface = self.surfaces.get_mut(&id).ok_or(EglError::BadSurface)?;
        let resized = surface.resize_swap_chain(renderer, width as u32, height as u32);
        self.lost_aware(resized)?;
        self.refresh_current(id);
        Ok(())
    }

    pub fn query_surface(&self, surface: SurfaceId, attribute: EGLint) -> Result<EGLint, EglError> {
        self.require_initialized()?;
        self.surfaces
            .get(&surface)
            .ok_or(EglError::BadSurface)?
            .query(attribute)
    }

    /// `eglBindTexImage`.
    pub fn bind_tex_image(&mut self, surface: SurfaceId, buffer: EGLint) -> Result<TextureStorage2D, EglError> {
        self.require_initialized()?;
        if buffer != EGL_BACK_BUFFER {
            return Err(EglError::BadParameter);
        }
        let renderer = self.renderer.as_ref().ok_or(EglError::NotInitialized)?;
        let surface = self.surfaces.get_mut(&surface).ok_or(EglError::BadSurface)?;
        if surface.window_id().is_some() {
            return Err(EglError::BadSurface);
        }
        surface.bind_tex_image(renderer)
    }

    /// `eglReleaseTexImage`.
    pub fn release_tex_image(&mut self, surface: SurfaceId, buffer: EGLint) -> Result<(), EglError> {
        self.require_initialized()?;
        if buffer != EGL_BACK_BUFFER {
            return Err(EglError::BadParameter);
        }
        let surface = self.surfaces.get_mut(&surface).ok_or(EglError::BadSurface)?;
        if surface.window_id().is_some() {
            return Err(EglError::BadSurface);
        }
        surface.release_tex_image()
    }
}

impl Drop for Display {
    fn drop(&mut self) {
        self.terminate();
    }
}

fn extension_string_for(renderer: &Renderer) -> String {
    let mut extensions = vec!["EGL_EXT_create_context_robustness", "EGL_ANGLE_window_fixed_size"];
    if renderer.supports_post_sub_buffer() {
        extensions.push("EGL_NV_post_sub_buffer");
    }
    extensions.join(" ")
}
