//! Deterministic CPU implementation of [`GpuDevice`].
//!
//! Every resource is backed by real pixel storage, so copies, clears, resolves, read-back and
//! the renderer's built-in quad programs produce observable results without a GPU. Draws with
//! application programs are recorded on the [`SoftwareDeviceProbe`] rather than shaded.
//! Multisampled textures keep one value per pixel; resolving copies it.

mod image;
mod probe;
mod raster;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use aero_gles_formats::DxgiFormat;
use hashbrown::HashMap;

use super::handle::HandleTable;
use super::*;
use image::Image;

pub use probe::{CallCounts, DrawRecord, LiveResources, SoftwareDeviceProbe};

#[derive(Debug, Clone)]
pub struct SoftwareDeviceOptions {
    /// Highest feature level devices will accept from a request.
    pub feature_level: FeatureLevel,
    pub debug_layer_available: bool,
    pub description: String,
    /// Largest power-of-two sample count reported with nonzero quality levels.
    pub max_sample_count: u32,
    pub max_texture_bytes: Option<u64>,
    pub max_buffer_bytes: Option<u32>,
    /// Polls an event query needs before it reports completion.
    pub event_query_latency: u32,
    /// Formats reported as entirely unsupported.
    pub unsupported_formats: Vec<DxgiFormat>,
}

impl Default for SoftwareDeviceOptions {
    fn default() -> Self {
        Self {
            feature_level: FeatureLevel::Level11_0,
            debug_layer_available: true,
            description: "aero software rasterizer".to_owned(),
            max_sample_count: 4,
            max_texture_bytes: None,
            max_buffer_bytes: None,
            event_query_latency: 1,
            unsupported_formats: Vec::new(),
        }
    }
}

/// Format support a D3D11 driver reports at feature level 10_0 and above.
pub fn default_format_support(format: DxgiFormat) -> FormatSupport {
    let sampled = FormatSupport::TEXTURE2D | FormatSupport::TEXTURECUBE | FormatSupport::SHADER_SAMPLE;
    let renderable = sampled
        | FormatSupport::RENDER_TARGET
        | FormatSupport::BLENDABLE
        | FormatSupport::MULTISAMPLE_RENDERTARGET
        | FormatSupport::MULTISAMPLE_RESOLVE;
    match format {
        DxgiFormat::Unknown => FormatSupport::empty(),
        DxgiFormat::R8G8B8A8Unorm
        | DxgiFormat::B8G8R8A8Unorm
        | DxgiFormat::A8Unorm
        | DxgiFormat::R8Unorm
        | DxgiFormat::R8G8Unorm
        | DxgiFormat::R16Float
        | DxgiFormat::R16G16Float
        | DxgiFormat::R16G16B16A16Float
        | DxgiFormat::R16Unorm => renderable,
        DxgiFormat::R32Float | DxgiFormat::R32G32Float | DxgiFormat::R32G32B32A32Float => {
            sampled | FormatSupport::RENDER_TARGET | FormatSupport::BLENDABLE
        }
        DxgiFormat::R32G32B32Float => FormatSupport::TEXTURE2D | FormatSupport::SHADER_SAMPLE,
        DxgiFormat::D16Unorm | DxgiFormat::D24UnormS8Uint => {
            FormatSupport::TEXTURE2D
                | FormatSupport::TEXTURECUBE
                | FormatSupport::DEPTH_STENCIL
                | FormatSupport::MULTISAMPLE_RENDERTARGET
        }
        DxgiFormat::R16Typeless | DxgiFormat::R24G8Typeless => {
            FormatSupport::TEXTURE2D | FormatSupport::TEXTURECUBE
        }
        DxgiFormat::R24UnormX8Typeless => sampled,
        DxgiFormat::Bc1Unorm | DxgiFormat::Bc2Unorm | DxgiFormat::Bc3Unorm => sampled,
    }
}

#[derive(Debug, Default)]
pub struct SoftwareDeviceFactory {
    options: SoftwareDeviceOptions,
    probe: SoftwareDeviceProbe,
    next_device_id: AtomicU64,
}

impl SoftwareDeviceFactory {
    pub fn new(options: SoftwareDeviceOptions) -> Self {
        Self {
            options,
            probe: SoftwareDeviceProbe::new(),
            next_device_id: AtomicU64::new(0),
        }
    }

    pub fn probe(&self) -> SoftwareDeviceProbe {
        self.probe.clone()
    }

    pub fn options(&self) -> &SoftwareDeviceOptions {
        &self.options
    }
}

impl DeviceFactory for SoftwareDeviceFactory {
    fn name(&self) -> &str {
        "software"
    }

    fn create_device(&self, request: &DeviceRequest) -> Result<Box<dyn GpuDevice>, DeviceError> {
        if self.probe.take_creation_failure() {
            return Err(DeviceError::Backend("injected device creation failure".to_owned()));
        }
        if request.debug_layer && !self.options.debug_layer_available {
            return Err(DeviceError::Unsupported("debug layer is not installed".to_owned()));
        }
        let feature_level = request
            .feature_levels
            .iter()
            .copied()
            .find(|level| *level <= self.options.feature_level)
            .ok_or_else(|| {
                DeviceError::Unsupported(format!(
                    "none of {:?} is available (max {:?})",
                    request.feature_levels, self.options.feature_level
                ))
            })?;

        let device_id = self.next_device_id.fetch_add(1, Ordering::Relaxed) + 1;
        self.probe.device_created(device_id);
        Ok(Box::new(SoftwareDevice::new(
            device_id,
            feature_level,
            request.debug_layer,
            self.options.clone(),
            self.probe.clone(),
        )))
    }
}

#[derive(Debug)]
struct SoftTexture {
    desc: TextureDesc,
    images: Vec<Image>,
}

#[derive(Debug)]
struct SoftView {
    texture: TextureHandle,
    desc: ViewDesc,
}

#[derive(Debug)]
struct SoftBuffer {
    data: Vec<u8>,
}

#[derive(Debug)]
struct SoftSwapChain {
    desc: SwapChainDesc,
    back_buffer: TextureHandle,
}

#[derive(Debug, Clone)]
struct PipelineState {
    blend: BlendDesc,
    rasterizer: RasterizerDesc,
    depth_stencil: DepthStencilDesc,
    stencil_ref: u8,
    viewport: Option<Viewport>,
    scissor: Option<ScissorRect>,
    samplers: HashMap<(ShaderStage, u32), SamplerDesc>,
    shader_resources: HashMap<(ShaderStage, u32), ViewHandle>,
    render_targets: Vec<Option<ViewHandle>>,
    depth_stencil_view: Option<ViewHandle>,
    vertex_buffer: Option<(BufferHandle, u32, u32)>,
    index_buffer: Option<(BufferHandle, IndexFormat, u32)>,
    topology: PrimitiveTopology,
    program: Option<Program>,
}

impl Default for PipelineState {
    fn default() -> Self {
        Self {
            blend: BlendDesc::default(),
            rasterizer: RasterizerDesc::default(),
            depth_stencil: DepthStencilDesc::default(),
            stencil_ref: 0,
            viewport: None,
            scissor: None,
            samplers: HashMap::new(),
            shader_resources: HashMap::new(),
            render_targets: Vec::new(),
            depth_stencil_view: None,
            vertex_buffer: None,
            index_buffer: None,
            topology: PrimitiveTopology::Undefined,
            program: None,
        }
    }
}

#[derive(Debug)]
pub struct SoftwareDevice {
    device_id: u64,
    feature_level: FeatureLevel,
    debug_layer: bool,
    options: SoftwareDeviceOptions,
    probe: SoftwareDeviceProbe,
    release_queue: Arc<ReleaseQueue>,
    textures: HandleTable<SoftTexture>,
    views: HandleTable<SoftView>,
    buffers: HandleTable<SoftBuffer>,
    swap_chains: HandleTable<SoftSwapChain>,
    state: PipelineState,
    texture_bytes: u64,
    next_query: u64,
    queries: HashMap<u64, u32>,
}

impl SoftwareDevice {
    fn new(
        device_id: u64,
        feature_level: FeatureLevel,
        debug_layer: bool,
        options: SoftwareDeviceOptions,
        probe: SoftwareDeviceProbe,
    ) -> Self {
        Self {
            device_id,
            feature_level,
            debug_layer,
            options,
            probe,
            release_queue: ReleaseQueue::new(),
            textures: HandleTable::new(device_id),
            views: HandleTable::new(device_id),
            buffers: HandleTable::new(device_id),
            swap_chains: HandleTable::new(device_id),
            state: PipelineState::default(),
            texture_bytes: 0,
            next_query: 0,
            queries: HashMap::new(),
        }
    }

    /// Frees everything whose last handle was dropped. Freeing a view or swap chain can
    /// release its texture in turn, so this loops until the queue stays empty.
    fn collect_released(&mut self) {
        loop {
            let released = self.release_queue.drain();
            if released.is_empty() {
                break;
            }
            for (kind, id) in released {
                match kind {
                    ResourceKind::Texture => {
                        if let Some(texture) = self.textures.remove(id) {
                            let bytes: u64 = texture.images.iter().map(Image::byte_size).sum();
                            self.texture_bytes = self.texture_bytes.saturating_sub(bytes);
                        }
                    }
                    ResourceKind::View => {
                        self.views.remove(id);
                    }
                    ResourceKind::Buffer => {
                        self.buffers.remove(id);
                    }
                    ResourceKind::SwapChain => {
                        self.swap_chains.remove(id);
                    }
                }
            }
        }
        self.probe.set_live(
            self.device_id,
            LiveResources {
                textures: self.textures.len(),
                views: self.views.len(),
                buffers: self.buffers.len(),
                swap_chains: self.swap_chains.len(),
            },
        );
    }

    fn check_alive(&self) -> Result<(), DeviceError> {
        match self.removed_reason() {
            Some(reason) => Err(DeviceError::DeviceRemoved(reason)),
            None => Ok(()),
        }
    }

    fn texture(&self, handle: &TextureHandle) -> Result<&SoftTexture, DeviceError> {
        self.textures.get(handle.device_id(), handle.id())
    }

    fn view(&self, handle: &ViewHandle) -> Result<&SoftView, DeviceError> {
        self.views.get(handle.device_id(), handle.id())
    }

    fn image(&self, texture: &TextureHandle, subresource: u32) -> Result<&Image, DeviceError> {
        self.texture(texture)?
            .images
            .get(subresource as usize)
            .ok_or_else(|| DeviceError::InvalidArgument(format!("no subresource {subresource}")))
    }

    fn image_mut(&mut self, texture: &TextureHandle, subresource: u32) -> Result<&mut Image, DeviceError> {
        self.textures
            .get_mut(texture.device_id(), texture.id())?
            .images
            .get_mut(subresource as usize)
            .ok_or_else(|| DeviceError::InvalidArgument(format!("no subresource {subresource}")))
    }

    /// Texture and subresource a render-target or depth-stencil view writes to.
    fn view_target(&self, view: &ViewHandle) -> Result<(TextureHandle, u32), DeviceError> {
        let view = self.view(view)?;
        let desc = self.texture(&view.texture)?.desc;
        Ok((
            view.texture.clone(),
            desc.subresource(view.desc.most_detailed_mip, view.desc.first_array_slice),
        ))
    }

    fn allocate(&mut self, desc: &TextureDesc) -> Result<SoftTexture, DeviceError> {
        let mut images = Vec::with_capacity(desc.subresource_count() as usize);
        for _slice in 0..desc.array_size {
            for mip in 0..desc.mip_levels {
                let (width, height) = desc.mip_size(mip);
                images.push(Image::new(desc.format, width, height));
            }
        }
        let bytes: u64 = images.iter().map(Image::byte_size).sum();
        if let Some(limit) = self.options.max_texture_bytes {
            if self.texture_bytes + bytes > limit {
                return Err(DeviceError::OutOfMemory(format!(
                    "{bytes} texture bytes requested, {} of {limit} in use",
                    self.texture_bytes
                )));
            }
        }
        self.texture_bytes += bytes;
        Ok(SoftTexture { desc: *desc, images })
    }

    fn validate_texture_desc(&self, desc: &TextureDesc) -> Result<(), DeviceError> {
        if desc.width == 0 || desc.height == 0 || desc.mip_levels == 0 || desc.array_size == 0 {
            return Err(DeviceError::InvalidArgument(format!("empty texture {desc:?}")));
        }
        if desc.cube && desc.array_size % 6 != 0 {
            return Err(DeviceError::InvalidArgument("cube textures need 6 faces".to_owned()));
        }
        // Typeless textures accept the binds of any format they can be viewed as.
        let support = match desc.format {
            DxgiFormat::R16Typeless => {
                self.format_support(DxgiFormat::D16Unorm) | self.format_support(DxgiFormat::R16Unorm)
            }
            DxgiFormat::R24G8Typeless => {
                self.format_support(DxgiFormat::D24UnormS8Uint)
                    | self.format_support(DxgiFormat::R24UnormX8Typeless)
            }
            format => self.format_support(format),
        };
        if support.is_empty() {
            return Err(DeviceError::Unsupported(format!("{:?}", desc.format)));
        }
        if desc.usage == Usage::Staging && !desc.bind.is_empty() {
            return Err(DeviceError::InvalidArgument(
                "staging textures cannot be bound".to_owned(),
            ));
        }
        if desc.bind.contains(BindFlags::RENDER_TARGET) && !support.contains(FormatSupport::RENDER_TARGET) {
            return Err(DeviceError::Unsupported(format!("{:?} render targets", desc.format)));
        }
        if desc.bind.contains(BindFlags::DEPTH_STENCIL) && !support.contains(FormatSupport::DEPTH_STENCIL) {
            return Err(DeviceError::Unsupported(format!("{:?} depth stencils", desc.format)));
        }
        if desc.sample_count > 1 && self.multisample_quality_levels(desc.format, desc.sample_count) == 0 {
            return Err(DeviceError::Unsupported(format!(
                "{:?} with {} samples",
                desc.format, desc.sample_count
            )));
        }
        Ok(())
    }

    fn read_buffer(&self, buffer: &BufferHandle, offset: usize, len: usize) -> Result<&[u8], DeviceError> {
        let data = &self.buffers.get(buffer.device_id(), buffer.id())?.data;
        data.get(offset..offset + len).ok_or_else(|| {
            DeviceError::InvalidArgument(format!(
                "read of {len} bytes at {offset} past buffer end {}",
                data.len()
            ))
        })
    }

    fn read_indices(&self, count: u32, start_index: u32, base_vertex: i32) -> Result<Vec<u32>, DeviceError> {
        let (buffer, format, offset) = self
            .state
            .index_buffer
            .clone()
            .ok_or_else(|| DeviceError::InvalidArgument("no index buffer bound".to_owned()))?;
        let size = format.size() as usize;
        let start = offset as usize + start_index as usize * size;
        let bytes = self.read_buffer(&buffer, start, count as usize * size)?;
        Ok(bytes
            .chunks_exact(size)
            .map(|raw| {
                let index = match format {
                    IndexFormat::Uint16 => u32::from(u16::from_le_bytes([raw[0], raw[1]])),
                    IndexFormat::Uint32 => u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]),
                };
                (i64::from(index) + i64::from(base_vertex)) as u32
            })
            .collect())
    }

    fn bound_target_size(&self) -> Option<(u32, u32)> {
        let view = self
            .state
            .render_targets
            .iter()
            .flatten()
            .next()
            .or(self.state.depth_stencil_view.as_ref())?;
        let (texture, subresource) = self.view_target(view).ok()?;
        let image = self.image(&texture, subresource).ok()?;
        Some((image.width, image.height))
    }

    fn draw_builtin(&mut self, program: BuiltinProgram, start_vertex: u32) -> Result<(), DeviceError> {
        if self.state.topology != PrimitiveTopology::TriangleStrip {
            return Err(DeviceError::InvalidArgument(format!(
                "{program:?} draws a triangle strip, {:?} is bound",
                self.state.topology
            )));
        }
        let (buffer, stride, offset) = self
            .state
            .vertex_buffer
            .clone()
            .ok_or_else(|| DeviceError::InvalidArgument("no vertex buffer bound".to_owned()))?;
        let start = offset as usize + start_vertex as usize * stride as usize;
        let bytes = self.read_buffer(&buffer, start, stride as usize * 4)?;
        let quad = raster::quad_from_vertices(program, bytes, stride)?;

        let Some((width, height)) = self.bound_target_size() else {
            return Ok(());
        };
        let viewport = self.state.viewport.unwrap_or_else(|| Viewport::full(width, height));
        let scissor = self
            .state
            .rasterizer
            .scissor_enable
            .then_some(self.state.scissor)
            .flatten();
        let fragments = raster::rasterize(&quad, &viewport, scissor.as_ref(), width, height);

        let colors: Vec<[f32; 4]> = if program.is_clear() {
            vec![quad.color; fragments.len()]
        } else {
            let view = self
                .state
                .shader_resources
                .get(&(ShaderStage::Pixel, 0))
                .ok_or_else(|| DeviceError::InvalidArgument("copy without a source view".to_owned()))?;
            let source = self.view(view)?;
            let desc = self.texture(&source.texture)?.desc;
            let image = self.image(
                &source.texture,
                desc.subresource(source.desc.most_detailed_mip, source.desc.first_array_slice),
            )?;
            let sampler = self
                .state
                .samplers
                .get(&(ShaderStage::Pixel, 0))
                .copied()
                .unwrap_or_else(|| SamplerDesc::clamped(FilterMode::Linear));
            fragments
                .iter()
                .map(|f| raster::shade_copy(program, raster::sample(image, &sampler, f.u, f.v)))
                .collect()
        };

        let targets: Vec<(TextureHandle, u32)> = match program {
            BuiltinProgram::ClearMultiple => self
                .state
                .render_targets
                .iter()
                .flatten()
                .map(|view| self.view_target(view))
                .collect::<Result<_, _>>()?,
            _ => self
                .state
                .render_targets
                .first()
                .cloned()
                .flatten()
                .map(|view| self.view_target(&view))
                .transpose()?
                .into_iter()
                .collect(),
        };
        let write_mask = self.state.blend.write_mask;
        for (texture, subresource) in targets {
            let image = self.image_mut(&texture, subresource)?;
            for (fragment, color) in fragments.iter().zip(&colors) {
                if fragment.x < image.width && fragment.y < image.height {
                    image.write(fragment.x, fragment.y, *color, write_mask);
                }
            }
        }

        if let Some(view) = self.state.depth_stencil_view.clone() {
            let ds = self.state.depth_stencil;
            let reference = self.state.stencil_ref;
            let (texture, subresource) = self.view_target(&view)?;
            let image = self.image_mut(&texture, subresource)?;
            for fragment in &fragments {
                let (x, y) = (fragment.x, fragment.y);
                if x >= image.width || y >= image.height {
                    continue;
                }
                let stored_stencil = image.stencil_at(x, y);
                let stencil_pass = !ds.stencil_enable
                    || raster::compare(
                        ds.front.func,
                        reference & ds.stencil_read_mask,
                        stored_stencil & ds.stencil_read_mask,
                    );
                let depth_pass = !ds.depth_enable || raster::compare(ds.depth_func, quad.depth, image.depth_at(x, y));
                if ds.stencil_enable {
                    let op = match (stencil_pass, depth_pass) {
                        (false, _) => ds.front.fail_op,
                        (true, false) => ds.front.depth_fail_op,
                        (true, true) => ds.front.pass_op,
                    };
                    let updated = raster::apply_stencil_op(op, stored_stencil, reference);
                    let mask = ds.stencil_write_mask;
                    image.set_stencil(x, y, (stored_stencil & !mask) | (updated & mask));
                }
                if stencil_pass && depth_pass && ds.depth_enable && ds.depth_write {
                    image.set_depth(x, y, quad.depth);
                }
            }
        }
        Ok(())
    }
}

impl GpuDevice for SoftwareDevice {
    fn device_id(&self) -> u64 {
        self.device_id
    }

    fn feature_level(&self) -> FeatureLevel {
        self.feature_level
    }

    fn description(&self) -> &str {
        &self.options.description
    }

    fn debug_layer_enabled(&self) -> bool {
        self.debug_layer
    }

    fn format_support(&self, format: DxgiFormat) -> FormatSupport {
        if self.options.unsupported_formats.contains(&format) {
            return FormatSupport::empty();
        }
        default_format_support(format)
    }

    fn multisample_quality_levels(&self, format: DxgiFormat, sample_count: u32) -> u32 {
        if sample_count == 1 {
            return 1;
        }
        let supported = sample_count.is_power_of_two()
            && sample_count <= self.options.max_sample_count
            && self
                .format_support(format)
                .contains(FormatSupport::MULTISAMPLE_RENDERTARGET);
        u32::from(supported)
    }

    fn removed_reason(&self) -> Option<DeviceRemovedReason> {
        self.probe.removed_reason(self.device_id)
    }

    fn create_texture(
        &mut self,
        desc: &TextureDesc,
        initial_data: Option<&[u8]>,
    ) -> Result<TextureHandle, DeviceError> {
        self.check_alive()?;
        self.collect_released();
        self.validate_texture_desc(desc)?;
        let mut texture = self.allocate(desc)?;
        if let Some(data) = initial_data {
            let image = &mut texture.images[0];
            image.upload(None, data, desc.format.row_pitch(desc.width))?;
        }
        let id = self.textures.insert(texture);
        self.probe.record(|c| c.textures_created += 1);
        Ok(TextureHandle::new(self.device_id, id, &self.release_queue))
    }

    fn texture_desc(&self, texture: &TextureHandle) -> Result<TextureDesc, DeviceError> {
        Ok(self.texture(texture)?.desc)
    }

    fn create_view(&mut self, texture: &TextureHandle, desc: &ViewDesc) -> Result<ViewHandle, DeviceError> {
        self.check_alive()?;
        self.collect_released();
        let tex = self.texture(texture)?.desc;
        let required = match desc.kind {
            ViewKind::ShaderResource => BindFlags::SHADER_RESOURCE,
            ViewKind::RenderTarget => BindFlags::RENDER_TARGET,
            ViewKind::DepthStencil => BindFlags::DEPTH_STENCIL,
        };
        if !tex.bind.contains(required) {
            return Err(DeviceError::InvalidArgument(format!(
                "{:?} view of a texture bound as {:?}",
                desc.kind, tex.bind
            )));
        }
        if desc.most_detailed_mip + desc.mip_levels.max(1) > tex.mip_levels
            || desc.first_array_slice + desc.array_size.max(1) > tex.array_size
        {
            return Err(DeviceError::InvalidArgument(format!(
                "view {desc:?} outside texture {tex:?}"
            )));
        }
        let id = self.views.insert(SoftView {
            texture: texture.clone(),
            desc: *desc,
        });
        Ok(ViewHandle::new(self.device_id, id, &self.release_queue))
    }

    fn view_resource(&self, view: &ViewHandle) -> Result<(TextureHandle, ViewDesc), DeviceError> {
        let view = self.view(view)?;
        Ok((view.texture.clone(), view.desc))
    }

    fn create_buffer(&mut self, desc: &BufferDesc) -> Result<BufferHandle, DeviceError> {
        self.check_alive()?;
        self.collect_released();
        if desc.size == 0 {
            return Err(DeviceError::InvalidArgument("zero-sized buffer".to_owned()));
        }
        if self.options.max_buffer_bytes.is_some_and(|limit| desc.size > limit) {
            return Err(DeviceError::OutOfMemory(format!("{} byte buffer", desc.size)));
        }
        let id = self.buffers.insert(SoftBuffer {
            data: vec![0; desc.size as usize],
        });
        Ok(BufferHandle::new(self.device_id, id, &self.release_queue))
    }

    fn write_buffer(&mut self, buffer: &BufferHandle, offset: u32, data: &[u8]) -> Result<(), DeviceError> {
        self.check_alive()?;
        let target = &mut self.buffers.get_mut(buffer.device_id(), buffer.id())?.data;
        let start = offset as usize;
        let end = start + data.len();
        if end > target.len() {
            return Err(DeviceError::InvalidArgument(format!(
                "write of {} bytes at {offset} past buffer end {}",
                data.len(),
                target.len()
            )));
        }
        target[start..end].copy_from_slice(data);
        Ok(())
    }

    fn update_subresource(
        &mut self,
        texture: &TextureHandle,
        subresource: u32,
        region: Option<SubresourceBox>,
        data: &[u8],
        row_pitch: u32,
    ) -> Result<(), DeviceError> {
        self.check_alive()?;
        self.image_mut(texture, subresource)?.upload(region, data, row_pitch)
    }

    fn copy_subresource_region(
        &mut self,
        dst: &TextureHandle,
        dst_subresource: u32,
        dst_x: u32,
        dst_y: u32,
        src: &TextureHandle,
        src_subresource: u32,
        src_box: Option<SubresourceBox>,
    ) -> Result<(), DeviceError> {
        self.check_alive()?;
        let src_desc = self.texture(src)?.desc;
        let dst_desc = self.texture(dst)?.desc;
        if src_box.is_some() && (src_desc.format.is_depth() || src_desc.sample_count > 1) {
            return Err(DeviceError::InvalidArgument(
                "depth-stencil and multisampled copies take the whole subresource".to_owned(),
            ));
        }
        if src_desc.sample_count != dst_desc.sample_count {
            return Err(DeviceError::InvalidArgument("sample counts differ".to_owned()));
        }
        let source = self.image(src, src_subresource)?.clone();
        self.image_mut(dst, dst_subresource)?
            .copy_from(dst_x, dst_y, &source, src_box)?;
        self.probe.record(|c| c.copies += 1);
        Ok(())
    }

    fn resolve_subresource(
        &mut self,
        dst: &TextureHandle,
        dst_subresource: u32,
        src: &TextureHandle,
        src_subresource: u32,
        format: DxgiFormat,
    ) -> Result<(), DeviceError> {
        self.check_alive()?;
        if self.texture(dst)?.desc.sample_count != 1 {
            return Err(DeviceError::InvalidArgument("resolve into a multisampled texture".to_owned()));
        }
        if !self.format_support(format).contains(FormatSupport::MULTISAMPLE_RESOLVE) {
            return Err(DeviceError::Unsupported(format!("resolving {format:?}")));
        }
        let source = self.image(src, src_subresource)?.clone();
        self.image_mut(dst, dst_subresource)?
            .copy_from(0, 0, &source, None)?;
        self.probe.record(|c| c.resolves += 1);
        Ok(())
    }

    fn map_read(&mut self, texture: &TextureHandle, subresource: u32) -> Result<MappedSubresource, DeviceError> {
        self.check_alive()?;
        if self.texture(texture)?.desc.usage != Usage::Staging {
            return Err(DeviceError::InvalidArgument("only staging textures can be mapped".to_owned()));
        }
        let image = self.image(texture, subresource)?;
        Ok(MappedSubresource {
            data: image.to_bytes(),
            row_pitch: image.format.row_pitch(image.width),
        })
    }

    fn set_blend_state(&mut self, desc: &BlendDesc, _blend_factor: [f32; 4], _sample_mask: u32) {
        self.probe.record(|c| c.blend_state += 1);
        self.state.blend = *desc;
    }

    fn set_rasterizer_state(&mut self, desc: &RasterizerDesc) {
        self.probe.record(|c| c.rasterizer_state += 1);
        self.state.rasterizer = *desc;
    }

    fn set_depth_stencil_state(&mut self, desc: &DepthStencilDesc, stencil_ref: u32) {
        self.probe.record(|c| c.depth_stencil_state += 1);
        self.state.depth_stencil = *desc;
        self.state.stencil_ref = stencil_ref.min(0xFF) as u8;
    }

    fn set_viewport(&mut self, viewport: &Viewport) {
        self.probe.record(|c| c.viewport += 1);
        self.state.viewport = Some(*viewport);
    }

    fn set_scissor_rect(&mut self, rect: &ScissorRect) {
        self.probe.record(|c| c.scissor_rect += 1);
        self.state.scissor = Some(*rect);
    }

    fn set_sampler(&mut self, stage: ShaderStage, slot: u32, desc: Option<&SamplerDesc>) {
        self.probe.record(|c| c.sampler += 1);
        match desc {
            Some(desc) => self.state.samplers.insert((stage, slot), *desc),
            None => self.state.samplers.remove(&(stage, slot)),
        };
    }

    fn set_shader_resource(&mut self, stage: ShaderStage, slot: u32, view: Option<&ViewHandle>) {
        self.probe.record(|c| c.shader_resource += 1);
        match view {
            Some(view) => self.state.shader_resources.insert((stage, slot), view.clone()),
            None => self.state.shader_resources.remove(&(stage, slot)),
        };
    }

    fn set_render_targets(&mut self, colors: &[Option<ViewHandle>], depth_stencil: Option<&ViewHandle>) {
        self.probe.record(|c| c.render_targets += 1);
        self.state.render_targets = colors.to_vec();
        self.state.depth_stencil_view = depth_stencil.cloned();
    }

    fn set_vertex_buffer(&mut self, buffer: Option<&BufferHandle>, stride: u32, offset: u32) {
        self.probe.record(|c| c.vertex_buffer += 1);
        self.state.vertex_buffer = buffer.map(|buffer| (buffer.clone(), stride, offset));
    }

    fn set_index_buffer(&mut self, buffer: Option<&BufferHandle>, format: IndexFormat, offset: u32) {
        self.probe.record(|c| c.index_buffer += 1);
        self.state.index_buffer = buffer.map(|buffer| (buffer.clone(), format, offset));
    }

    fn set_primitive_topology(&mut self, topology: PrimitiveTopology) {
        self.probe.record(|c| c.primitive_topology += 1);
        self.state.topology = topology;
    }

    fn set_program(&mut self, program: Option<Program>) {
        self.probe.record(|c| c.program += 1);
        self.state.program = program;
    }

    fn set_constant_buffer(&mut self, _stage: ShaderStage, _data: &[u8]) {
        self.probe.record(|c| c.constant_buffer += 1);
    }

    fn draw(&mut self, vertex_count: u32, start_vertex: u32) -> Result<(), DeviceError> {
        self.check_alive()?;
        self.probe.record(|c| c.draws += 1);
        match self.state.program {
            Some(Program::Builtin(program)) if vertex_count == 4 => self.draw_builtin(program, start_vertex),
            program => {
                self.probe.push_draw(DrawRecord {
                    device_id: self.device_id,
                    program,
                    topology: self.state.topology,
                    start_vertex,
                    vertex_count,
                    indices: None,
                    render_targets: self.state.render_targets.iter().flatten().count(),
                });
                Ok(())
            }
        }
    }

    fn draw_indexed(&mut self, index_count: u32, start_index: u32, base_vertex: i32) -> Result<(), DeviceError> {
        self.check_alive()?;
        self.probe.record(|c| c.draws += 1);
        let indices = self.read_indices(index_count, start_index, base_vertex)?;
        self.probe.push_draw(DrawRecord {
            device_id: self.device_id,
            program: self.state.program,
            topology: self.state.topology,
            start_vertex: 0,
            vertex_count: index_count,
            indices: Some(indices),
            render_targets: self.state.render_targets.iter().flatten().count(),
        });
        Ok(())
    }

    fn clear_render_target(&mut self, view: &ViewHandle, color: [f32; 4]) -> Result<(), DeviceError> {
        self.check_alive()?;
        self.probe.record(|c| c.clear_render_target += 1);
        let (texture, subresource) = self.view_target(view)?;
        self.image_mut(&texture, subresource)?.fill(color);
        Ok(())
    }

    fn clear_depth_stencil(
        &mut self,
        view: &ViewHandle,
        flags: ClearFlags,
        depth: f32,
        stencil: u8,
    ) -> Result<(), DeviceError> {
        self.check_alive()?;
        self.probe.record(|c| c.clear_depth_stencil += 1);
        let (texture, subresource) = self.view_target(view)?;
        let image = self.image_mut(&texture, subresource)?;
        for y in 0..image.height {
            for x in 0..image.width {
                if flags.contains(ClearFlags::DEPTH) {
                    image.set_depth(x, y, depth);
                }
                if flags.contains(ClearFlags::STENCIL) {
                    image.set_stencil(x, y, stencil);
                }
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<(), DeviceError> {
        self.check_alive()?;
        if let Some(error) = self.probe.take_flush_failure() {
            return Err(error);
        }
        self.probe.record(|c| c.flushes += 1);
        self.collect_released();
        Ok(())
    }

    fn insert_event_query(&mut self) -> Result<u64, DeviceError> {
        self.check_alive()?;
        self.next_query += 1;
        self.queries.insert(self.next_query, self.options.event_query_latency);
        Ok(self.next_query)
    }

    fn event_query_complete(&mut self, query: u64) -> Result<bool, DeviceError> {
        self.check_alive()?;
        let remaining = self
            .queries
            .get_mut(&query)
            .ok_or_else(|| DeviceError::InvalidResource(format!("unknown event query {query}")))?;
        if *remaining == 0 {
            self.queries.remove(&query);
            return Ok(true);
        }
        *remaining -= 1;
        Ok(false)
    }

    fn create_swap_chain(&mut self, desc: &SwapChainDesc) -> Result<SwapChainHandle, DeviceError> {
        self.check_alive()?;
        if let Some(error) = self.probe.take_swap_chain_failure() {
            return Err(error);
        }
        self.collect_released();
        if desc.width == 0 || desc.height == 0 {
            return Err(DeviceError::InvalidArgument("zero-sized swap chain".to_owned()));
        }
        let back_buffer = self.create_texture(
            &TextureDesc::new_2d(
                desc.width,
                desc.height,
                desc.format,
                BindFlags::RENDER_TARGET | BindFlags::SHADER_RESOURCE,
            ),
            None,
        )?;
        let id = self.swap_chains.insert(SoftSwapChain {
            desc: *desc,
            back_buffer,
        });
        self.probe.record(|c| c.swap_chains_created += 1);
        Ok(SwapChainHandle::new(self.device_id, id, &self.release_queue))
    }

    fn resize_swap_chain(&mut self, swap_chain: &SwapChainHandle, width: u32, height: u32) -> Result<(), DeviceError> {
        self.check_alive()?;
        let mut desc = self.swap_chains.get(swap_chain.device_id(), swap_chain.id())?.desc;
        desc.width = width;
        desc.height = height;
        if width == 0 || height == 0 {
            return Err(DeviceError::InvalidArgument("zero-sized swap chain".to_owned()));
        }
        let back_buffer = self.create_texture(
            &TextureDesc::new_2d(
                width,
                height,
                desc.format,
                BindFlags::RENDER_TARGET | BindFlags::SHADER_RESOURCE,
            ),
            None,
        )?;
        let entry = self.swap_chains.get_mut(swap_chain.device_id(), swap_chain.id())?;
        entry.desc = desc;
        entry.back_buffer = back_buffer;
        self.probe.record(|c| c.swap_chain_resizes += 1);
        self.collect_released();
        Ok(())
    }

    fn swap_chain_back_buffer(&mut self, swap_chain: &SwapChainHandle) -> Result<TextureHandle, DeviceError> {
        self.check_alive()?;
        Ok(self
            .swap_chains
            .get(swap_chain.device_id(), swap_chain.id())?
            .back_buffer
            .clone())
    }

    fn present(&mut self, swap_chain: &SwapChainHandle, sync_interval: u32) -> Result<(), DeviceError> {
        self.check_alive()?;
        if let Some(error) = self.probe.take_present_failure() {
            return Err(error);
        }
        let chain = self.swap_chains.get(swap_chain.device_id(), swap_chain.id())?;
        let desc = chain.desc;
        let back_buffer = chain.back_buffer.clone();
        let pixels = self.image(&back_buffer, 0)?.to_bytes();
        self.probe.record(|c| c.presents += 1);
        self.probe.push_presented(PresentedFrame {
            window: desc.window,
            width: desc.width,
            height: desc.height,
            format: desc.format,
            sync_interval,
            pixels,
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn device() -> (Box<dyn GpuDevice>, SoftwareDeviceProbe) {
        let factory = SoftwareDeviceFactory::new(SoftwareDeviceOptions::default());
        let device = factory
            .create_device(&DeviceRequest {
                feature_levels: FeatureLevel::requested(true),
                debug_layer: false,
            })
            .unwrap();
        (device, factory.probe())
    }

    #[test]
    fn request_is_clamped_to_the_available_level() {
        let factory = SoftwareDeviceFactory::new(SoftwareDeviceOptions {
            feature_level: FeatureLevel::Level9_3,
            debug_layer_available: false,
            ..Default::default()
        });
        let debug = DeviceRequest {
            feature_levels: FeatureLevel::requested(true),
            debug_layer: true,
        };
        assert!(matches!(factory.create_device(&debug), Err(DeviceError::Unsupported(_))));
        let release = DeviceRequest {
            debug_layer: false,
            ..debug
        };
        let device = factory.create_device(&release).unwrap();
        assert_eq!(device.feature_level(), FeatureLevel::Level9_3);
        assert_eq!(device.device_id(), 1);
    }

    #[test]
    fn released_textures_are_freed_after_their_views() {
        let (mut device, probe) = device();
        let texture = device
            .create_texture(
                &TextureDesc::new_2d(4, 4, DxgiFormat::R8G8B8A8Unorm, BindFlags::SHADER_RESOURCE),
                None,
            )
            .unwrap();
        let view = device
            .create_view(&texture, &ViewDesc::shader_resource(DxgiFormat::R8G8B8A8Unorm, 0, 1))
            .unwrap();
        drop(texture);
        device.flush().unwrap();
        assert_eq!(probe.live_resources().textures, 1);
        drop(view);
        device.flush().unwrap();
        assert_eq!(probe.live_resources(), LiveResources::default());
    }

    #[test]
    fn removed_devices_refuse_work() {
        let (mut device, probe) = device();
        probe.remove_device(DeviceRemovedReason::Hung);
        assert_eq!(device.removed_reason(), Some(DeviceRemovedReason::Hung));
        assert_eq!(
            device.flush(),
            Err(DeviceError::DeviceRemoved(DeviceRemovedReason::Hung))
        );
    }

    #[test]
    fn clear_then_map_round_trips_through_staging() {
        let (mut device, _) = device();
        let target = device
            .create_texture(
                &TextureDesc::new_2d(2, 2, DxgiFormat::B8G8R8A8Unorm, BindFlags::RENDER_TARGET),
                None,
            )
            .unwrap();
        let rtv = device
            .create_view(&target, &ViewDesc::render_target(DxgiFormat::B8G8R8A8Unorm, 0, 0))
            .unwrap();
        device.clear_render_target(&rtv, [1.0, 0.0, 0.0, 1.0]).unwrap();

        let staging = device
            .create_texture(&TextureDesc::staging(2, 2, DxgiFormat::B8G8R8A8Unorm), None)
            .unwrap();
        device
            .copy_subresource_region(&staging, 0, 0, 0, &target, 0, None)
            .unwrap();
        let mapped = device.map_read(&staging, 0).unwrap();
        assert_eq!(mapped.row_pitch, 8);
        assert_eq!(&mapped.data[..4], &[0, 0, 255, 255]);
        assert!(device.map_read(&target, 0).is_err());
    }

    #[test]
    fn event_queries_complete_after_latency() {
        let (mut device, _) = device();
        let query = device.insert_event_query().unwrap();
        assert_eq!(device.event_query_complete(query), Ok(false));
        assert_eq!(device.event_query_complete(query), Ok(true));
    }

    #[test]
    fn multisample_support_is_power_of_two_up_to_the_limit() {
        let (device, _) = device();
        assert_eq!(device.multisample_quality_levels(DxgiFormat::R8G8B8A8Unorm, 4), 1);
        assert_eq!(device.multisample_quality_levels(DxgiFormat::R8G8B8A8Unorm, 3), 0);
        assert_eq!(device.multisample_quality_levels(DxgiFormat::R8G8B8A8Unorm, 8), 0);
        assert_eq!(device.multisample_quality_levels(DxgiFormat::Bc1Unorm, 2), 0);
    }
}
