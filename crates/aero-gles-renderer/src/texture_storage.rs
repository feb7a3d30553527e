//! Texture storage: the device texture behind a GL texture and the views derived from it.
//!
//! Storage sizes are grown to the format's block alignment at construction. Logical mip
//! level 0 then lives at physical level `top_level`, and every subresource index is computed
//! relative to it. Views and render targets are created lazily and cached per level (and
//! face), so repeated lookups return the same attachment serials.

use aero_gles_formats::{make_valid_size, round_up, DxgiFormat, InternalFormat, TextureFormatInfo};
use hashbrown::HashMap;
use tracing::debug;

use crate::caps::FeatureLevel;
use crate::device::{BindFlags, DeviceError, SubresourceBox, TextureDesc, TextureHandle, ViewDesc, ViewHandle};
use crate::error::RendererError;
use crate::render_target::{AttachmentView, RenderTarget};
use crate::renderer::{Renderer, TextureRegion};
use crate::state::Rectangle;
use crate::swap_chain::{lock_swap_chain, SharedSwapChain};
use crate::state_cache::issue_serial;

pub const CUBE_FACE_COUNT: u32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextureKind {
    TwoD,
    Cube,
}

/// Bind flags a storage of `format` is created with.
pub fn texture_bind_flags(format: InternalFormat, render_target: bool) -> BindFlags {
    let info = format.texture_format_info();
    let mut bind = BindFlags::empty();
    if info.srv != DxgiFormat::Unknown {
        bind |= BindFlags::SHADER_RESOURCE;
    }
    if info.dsv != DxgiFormat::Unknown {
        bind |= BindFlags::DEPTH_STENCIL;
    }
    if info.rtv != DxgiFormat::Unknown && render_target {
        bind |= BindFlags::RENDER_TARGET;
    }
    bind
}

/// Number of levels in a full mip chain for `width` x `height`.
pub fn full_mip_chain(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

fn allocation_failure(err: DeviceError) -> RendererError {
    match err {
        DeviceError::DeviceRemoved(_) => RendererError::DeviceLost,
        other => RendererError::OutOfMemory(format!("failed to create texture storage: {other}")),
    }
}

/// State shared by 2D and cube storages.
#[derive(Debug)]
pub struct TextureStorage {
    kind: TextureKind,
    internal_format: InternalFormat,
    formats: TextureFormatInfo,
    bind: BindFlags,
    top_level: u32,
    mip_levels: u32,
    width: u32,
    height: u32,
    texture: Option<TextureHandle>,
    swap_chain: Option<SharedSwapChain>,
    srv_cache: HashMap<(u32, u32), ViewHandle>,
    level_srvs: HashMap<(u32, u32), ViewHandle>,
    render_targets: HashMap<(u32, u32), RenderTarget>,
    serial: u64,
}

impl TextureStorage {
    fn new(
        kind: TextureKind,
        internal_format: InternalFormat,
        render_target: bool,
        width: u32,
        height: u32,
        levels: u32,
    ) -> Self {
        let formats = internal_format.texture_format_info();
        let valid = make_valid_size(false, formats.tex, width, height);
        let levels = if levels == 0 {
            full_mip_chain(width, height)
        } else {
            levels
        };
        Self {
            kind,
            internal_format,
            formats,
            bind: texture_bind_flags(internal_format, render_target),
            top_level: valid.lod_offset,
            mip_levels: valid.lod_offset + levels,
            width: valid.width,
            height: valid.height,
            texture: None,
            swap_chain: None,
            srv_cache: HashMap::new(),
            level_srvs: HashMap::new(),
            render_targets: HashMap::new(),
            serial: issue_serial(),
        }
    }

    fn from_swap_chain(swap_chain: SharedSwapChain) -> Self {
        let (internal_format, width, height, serial) = {
            let chain = lock_swap_chain(&swap_chain);
            (
                chain.back_buffer_format(),
                chain.width(),
                chain.height(),
                chain.offscreen_serial(),
            )
        };
        let formats = internal_format.texture_format_info();
        Self {
            kind: TextureKind::TwoD,
            internal_format,
            formats,
            bind: BindFlags::SHADER_RESOURCE | BindFlags::RENDER_TARGET,
            top_level: 0,
            mip_levels: 1,
            width,
            height,
            texture: None,
            swap_chain: Some(swap_chain),
            srv_cache: HashMap::new(),
            level_srvs: HashMap::new(),
            render_targets: HashMap::new(),
            serial,
        }
    }

    pub fn kind(&self) -> TextureKind {
        self.kind
    }

    pub fn internal_format(&self) -> InternalFormat {
        self.internal_format
    }

    /// Device format the texture is created with.
    pub fn texture_format(&self) -> DxgiFormat {
        self.formats.tex
    }

    pub fn bind_flags(&self) -> BindFlags {
        self.bind
    }

    pub fn is_render_target(&self) -> bool {
        self.bind
            .intersects(BindFlags::RENDER_TARGET | BindFlags::DEPTH_STENCIL)
    }

    /// Physical level holding logical level 0.
    pub fn top_level(&self) -> u32 {
        self.top_level
    }

    pub fn level_count(&self) -> u32 {
        self.mip_levels - self.top_level
    }

    pub fn level_width(&self, level: u32) -> u32 {
        (self.width >> (self.top_level + level).min(31)).max(1)
    }

    pub fn level_height(&self, level: u32) -> u32 {
        (self.height >> (self.top_level + level).min(31)).max(1)
    }

    pub fn serial(&self) -> u64 {
        self.serial
    }

    fn array_size(&self) -> u32 {
        match self.kind {
            TextureKind::TwoD => 1,
            TextureKind::Cube => CUBE_FACE_COUNT,
        }
    }

    pub fn subresource_index(&self, level: u32, face: u32) -> u32 {
        (self.top_level + level) + face * self.mip_levels
    }

    fn check_level(&self, level: u32, face: u32) -> Result<(), RendererError> {
        if level >= self.level_count() || face >= self.array_size() {
            return Err(RendererError::InvalidValue(format!(
                "level {level} face {face} is outside a storage of {} levels",
                self.level_count()
            )));
        }
        Ok(())
    }

    /// The device texture, created on first use. Zero-sized storages have none.
    pub fn resource(&mut self, renderer: &mut Renderer) -> Result<Option<TextureHandle>, RendererError> {
        if let Some(chain) = &self.swap_chain {
            return Ok(lock_swap_chain(chain).offscreen_texture().cloned());
        }
        if self.texture.is_none() && self.width > 0 && self.height > 0 {
            let level_9 = renderer.feature_level() < FeatureLevel::Level10_0;
            let desc = TextureDesc {
                mip_levels: if level_9 { 1 } else { self.mip_levels },
                array_size: self.array_size(),
                cube: self.kind == TextureKind::Cube,
                ..TextureDesc::new_2d(self.width, self.height, self.formats.tex, self.bind)
            };
            let texture = renderer
                .device_mut()?
                .create_texture(&desc, None)
                .map_err(allocation_failure)?;
            debug!(
                width = self.width,
                height = self.height,
                levels = desc.mip_levels,
                kind = ?self.kind,
                "created texture storage"
            );
            self.texture = Some(texture);
        }
        Ok(self.texture.clone())
    }

    /// The view sampled by draws: every level when `mipmapped`, otherwise just level 0.
    pub fn shader_resource_view(
        &mut self,
        renderer: &mut Renderer,
        mipmapped: bool,
    ) -> Result<Option<ViewHandle>, RendererError> {
        if let Some(chain) = &self.swap_chain {
            return Ok(lock_swap_chain(chain).shader_resource_view().cloned());
        }
        let levels = if mipmapped { self.level_count() } else { 1 };
        let key = (0, levels);
        if let Some(view) = self.srv_cache.get(&key) {
            return Ok(Some(view.clone()));
        }
        let Some(texture) = self.resource(renderer)? else {
            return Ok(None);
        };
        let desc = match self.kind {
            TextureKind::TwoD => ViewDesc::shader_resource(self.formats.srv, self.top_level, levels),
            TextureKind::Cube => ViewDesc::shader_resource_cube(self.formats.srv, self.top_level, levels),
        };
        let view = renderer
            .device_mut()?
            .create_view(&texture, &desc)
            .map_err(allocation_failure)?;
        self.srv_cache.insert(key, view.clone());
        Ok(Some(view))
    }

    fn level_shader_resource_view(
        &mut self,
        renderer: &mut Renderer,
        texture: &TextureHandle,
        level: u32,
        face: u32,
    ) -> Result<Option<ViewHandle>, RendererError> {
        if self.formats.srv == DxgiFormat::Unknown {
            return Ok(None);
        }
        if let Some(view) = self.level_srvs.get(&(face, level)) {
            return Ok(Some(view.clone()));
        }
        let desc = match self.kind {
            TextureKind::TwoD => ViewDesc::shader_resource(self.formats.srv, self.top_level + level, 1),
            TextureKind::Cube => {
                ViewDesc::shader_resource_slice(self.formats.srv, self.top_level + level, face)
            }
        };
        let view = renderer
            .device_mut()?
            .create_view(texture, &desc)
            .map_err(allocation_failure)?;
        self.level_srvs.insert((face, level), view.clone());
        Ok(Some(view))
    }

    fn render_target(
        &mut self,
        renderer: &mut Renderer,
        level: u32,
        face: u32,
    ) -> Result<RenderTarget, RendererError> {
        if let Some(chain) = &self.swap_chain {
            return Ok(RenderTarget::swap_chain_color(chain.clone()));
        }
        self.check_level(level, face)?;
        if let Some(target) = self.render_targets.get(&(face, level)) {
            return Ok(target.clone());
        }
        let texture = self.resource(renderer)?.ok_or_else(|| {
            RendererError::InvalidOperation("zero-sized storage has no render target".to_owned())
        })?;
        let srv = self.level_shader_resource_view(renderer, &texture, level, face)?;
        let mip = self.top_level + level;
        let view = if self.formats.rtv != DxgiFormat::Unknown && self.bind.contains(BindFlags::RENDER_TARGET) {
            AttachmentView::Color(
                renderer
                    .device_mut()?
                    .create_view(&texture, &ViewDesc::render_target(self.formats.rtv, mip, face))
                    .map_err(allocation_failure)?,
            )
        } else if self.formats.dsv != DxgiFormat::Unknown {
            AttachmentView::DepthStencil(
                renderer
                    .device_mut()?
                    .create_view(&texture, &ViewDesc::depth_stencil(self.formats.dsv, mip, face))
                    .map_err(allocation_failure)?,
            )
        } else {
            return Err(RendererError::InvalidOperation(format!(
                "{:?} storage was not created renderable",
                self.internal_format
            )));
        };
        let target = RenderTarget::texture(
            texture,
            self.subresource_index(level, face),
            view,
            srv,
            (self.level_width(level), self.level_height(level)),
            self.internal_format,
            self.formats.tex,
            0,
            self.serial,
        );
        self.render_targets.insert((face, level), target.clone());
        Ok(target)
    }

    /// Copies `area` of `source`'s subresource into `level` (and `face`), rounding the copy up
    /// to whole compression blocks.
    pub fn update_subresource_level(
        &mut self,
        renderer: &mut Renderer,
        source: &TextureHandle,
        source_subresource: u32,
        level: u32,
        face: u32,
        area: Rectangle,
    ) -> Result<(), RendererError> {
        self.check_level(level, face)?;
        let texture = self.resource(renderer)?.ok_or_else(|| {
            RendererError::InvalidOperation("zero-sized storage cannot be updated".to_owned())
        })?;
        let (x, y) = (area.x.max(0) as u32, area.y.max(0) as u32);
        let full = x == 0
            && y == 0
            && area.width as u32 == self.level_width(level)
            && area.height as u32 == self.level_height(level);
        let info = self.formats.tex.info();
        if !full && (info.depth_bits > 0 || info.stencil_bits > 0) {
            return Err(RendererError::Unimplemented(
                "partial depth-stencil subresource updates".to_owned(),
            ));
        }
        let source_box = (!full).then(|| {
            SubresourceBox::new(
                x,
                y,
                x + round_up(area.width.max(0) as u32, info.block_width),
                y + round_up(area.height.max(0) as u32, info.block_height),
            )
        });
        let destination = self.subresource_index(level, face);
        renderer.device_mut()?.copy_subresource_region(
            &texture,
            destination,
            x,
            y,
            source,
            source_subresource,
            source_box,
        )?;
        Ok(())
    }

    /// Writes client texels already in the storage's device layout.
    pub fn set_data(
        &mut self,
        renderer: &mut Renderer,
        level: u32,
        face: u32,
        area: Option<Rectangle>,
        data: &[u8],
        row_pitch: u32,
    ) -> Result<(), RendererError> {
        self.check_level(level, face)?;
        let texture = self.resource(renderer)?.ok_or_else(|| {
            RendererError::InvalidOperation("zero-sized storage cannot be written".to_owned())
        })?;
        let info = self.formats.tex.info();
        let target_box = area.map(|area| {
            let (x, y) = (area.x.max(0) as u32, area.y.max(0) as u32);
            SubresourceBox::new(
                x,
                y,
                x + round_up(area.width.max(0) as u32, info.block_width),
                y + round_up(area.height.max(0) as u32, info.block_height),
            )
        });
        let subresource = self.subresource_index(level, face);
        renderer
            .device_mut()?
            .update_subresource(&texture, subresource, target_box, data, row_pitch)?;
        Ok(())
    }

    fn generate_mipmap_level(
        &mut self,
        renderer: &mut Renderer,
        face: u32,
        level: u32,
    ) -> Result<(), RendererError> {
        if level == 0 {
            return Err(RendererError::InvalidValue(
                "level 0 has no parent to generate from".to_owned(),
            ));
        }
        let source = self.render_target(renderer, level - 1, face)?;
        let dest = self.render_target(renderer, level, face)?;
        let (Some(source_view), Some(dest_view)) =
            (source.shader_resource_view(), dest.render_target_view())
        else {
            return Err(RendererError::InvalidOperation(format!(
                "{:?} storage cannot generate mipmaps",
                self.internal_format
            )));
        };
        let (sw, sh) = (source.width(), source.height());
        let (dw, dh) = (dest.width(), dest.height());
        renderer.copy_texture(
            TextureRegion::whole(&source_view, sw, sh),
            TextureRegion::whole(&dest_view, dw, dh),
            self.internal_format.base_format(),
        )
    }
}

#[derive(Debug)]
pub struct TextureStorage2D {
    storage: TextureStorage,
}

impl TextureStorage2D {
    pub(crate) fn new(
        internal_format: InternalFormat,
        render_target: bool,
        width: u32,
        height: u32,
        levels: u32,
    ) -> Self {
        Self {
            storage: TextureStorage::new(
                TextureKind::TwoD,
                internal_format,
                render_target,
                width,
                height,
                levels,
            ),
        }
    }

    /// Storage aliasing a swap chain's offscreen buffer.
    pub(crate) fn from_swap_chain(swap_chain: SharedSwapChain) -> Self {
        Self {
            storage: TextureStorage::from_swap_chain(swap_chain),
        }
    }

    pub fn storage(&self) -> &TextureStorage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut TextureStorage {
        &mut self.storage
    }

    pub fn get_render_target(&mut self, renderer: &mut Renderer, level: u32) -> Result<RenderTarget, RendererError> {
        self.storage.render_target(renderer, level, 0)
    }

    /// Fills `level` by drawing level `level - 1` into it.
    pub fn generate_mipmap(&mut self, renderer: &mut Renderer, level: u32) -> Result<(), RendererError> {
        self.storage.generate_mipmap_level(renderer, 0, level)
    }
}

#[derive(Debug)]
pub struct TextureStorageCube {
    storage: TextureStorage,
}

impl TextureStorageCube {
    pub(crate) fn new(internal_format: InternalFormat, render_target: bool, size: u32, levels: u32) -> Self {
        Self {
            storage: TextureStorage::new(
                TextureKind::Cube,
                internal_format,
                render_target,
                size,
                size,
                levels,
            ),
        }
    }

    pub fn storage(&self) -> &TextureStorage {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut TextureStorage {
        &mut self.storage
    }

    pub fn get_render_target_face(
        &mut self,
        renderer: &mut Renderer,
        face: u32,
        level: u32,
    ) -> Result<RenderTarget, RendererError> {
        self.storage.render_target(renderer, level, face)
    }

    pub fn generate_mipmap_face(
        &mut self,
        renderer: &mut Renderer,
        face: u32,
        level: u32,
    ) -> Result<(), RendererError> {
        self.storage.generate_mipmap_level(renderer, face, level)
    }
}
