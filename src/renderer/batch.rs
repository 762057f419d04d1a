//! The batch renderer and its per-frame draw cycle

use bytemuck::Zeroable;
use glam::Mat4;

use crate::backend::{
    BlendState, BufferHandle, BufferUsage, CommandBufferHandle, CompareFunction,
    ComputePipelineDescriptor, CullMode, Extent2D, GpuBackend, PipelineHandle,
    RenderPipelineDescriptor, ResourceDescriptor, SamplerHandle, TextureHandle,
};
use crate::binding_table::{
    BindingTable, BindingTableLayout, BindingTableProperties, BindingTableVariant,
};
use crate::error::{RendererError, RendererResult};
use crate::frame::{DeletionQueue, FrameRing, FRAME_OVERLAP};
use crate::renderer::culling::{CullingDispatch, InstanceUpload};
use crate::renderer::indirect::{partition, CullingInput, DrawBucket, INDIRECT_COMMAND_STRIDE};
use crate::renderer::scene_buffers::{
    build_texture_descriptors, check_texture_capacity, collect_instances, create_mapped_buffer,
    upload_buffer, FlattenedScene, MeshRecord, ResourceAddresses,
};
use crate::renderer::ShaderSet;
use crate::resources::TextureData;
use crate::scene::{Scene, SceneData};
use crate::RendererConfig;

/// The two binding tables the renderer owns
#[derive(Debug)]
pub struct BindingTables {
    /// Resource addresses, culling input and per-frame scene data
    pub uniform: BindingTable,
    /// Sampler and image arrays
    pub texture: BindingTable,
}

/// Counts describing what one frame draws
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrawStats {
    pub meshes: usize,
    pub instances: usize,
    pub opaque: usize,
    pub transparent: usize,
    pub culling_workgroups: u32,
}

/// Everything `build_buffers` allocates for one scene
#[derive(Debug)]
struct SceneBuffers {
    meshes: Vec<MeshRecord>,
    instance_count: usize,
    instance_bytes: u64,

    vertex: BufferHandle,
    index: BufferHandle,
    material: BufferHandle,
    instance: BufferHandle,
    bounds: BufferHandle,
    instance_staging: [BufferHandle; FRAME_OVERLAP],
    instances_dirty: bool,
    root: Mat4,

    opaque: Option<DrawBucket>,
    transparent: Option<DrawBucket>,

    addresses: BufferHandle,
    culling_input: BufferHandle,
    scene_data: [BufferHandle; FRAME_OVERLAP],

    address_slot: u32,
    culling_slot: u32,
    scene_slots: [u32; FRAME_OVERLAP],
    texture_slot: u32,

    textures: Vec<TextureHandle>,
    samplers: Vec<SamplerHandle>,
}

impl SceneBuffers {
    fn destroy<B: GpuBackend>(self, backend: &mut B) {
        for bucket in [self.opaque, self.transparent].into_iter().flatten() {
            bucket.destroy(backend);
        }
        let buffers = [
            self.vertex,
            self.index,
            self.material,
            self.instance,
            self.bounds,
            self.addresses,
            self.culling_input,
        ];
        for buffer in buffers
            .into_iter()
            .chain(self.instance_staging)
            .chain(self.scene_data)
        {
            backend.destroy_buffer(buffer);
        }
        for texture in self.textures {
            backend.destroy_texture(texture);
        }
        for sampler in self.samplers {
            backend.destroy_sampler(sampler);
        }
    }
}

/// Objects a build has created so far, released if the build fails
#[derive(Debug, Default)]
struct BuildRollback {
    buffers: Vec<BufferHandle>,
    textures: Vec<TextureHandle>,
    samplers: Vec<SamplerHandle>,
    uniform_slots: Vec<u32>,
}

impl BuildRollback {
    fn bucket(&mut self, bucket: Option<&DrawBucket>) {
        if let Some(bucket) = bucket {
            self.buffers.extend([bucket.live, bucket.template]);
        }
    }

    /// Nothing created here has been recorded into a frame, so it is freed at once
    fn release<B: GpuBackend>(self, backend: &mut B, tables: &mut BindingTables) {
        for slot in self.uniform_slots {
            if let Err(e) = tables.uniform.free_slot(slot) {
                log::error!("Failed to free uniform slot {slot}: {e}");
            }
        }
        for texture in self.textures {
            backend.destroy_texture(texture);
        }
        for sampler in self.samplers {
            backend.destroy_sampler(sampler);
        }
        for buffer in self.buffers.into_iter().rev() {
            backend.destroy_buffer(buffer);
        }
    }
}

/// Draws a flattened scene with GPU culling and two indirect draws per frame.
///
/// Per frame, strictly in this order:
/// [`begin_frame`](Self::begin_frame) → [`update_draw_data`](Self::update_draw_data)
/// → [`cull`](Self::cull) → [`draw`](Self::draw).
pub struct BatchRenderer<B: GpuBackend> {
    config: RendererConfig,
    properties: &'static BindingTableProperties,
    uniform_layout: BindingTableLayout,
    texture_layout: BindingTableLayout,
    tables: BindingTables,
    opaque_pipeline: PipelineHandle,
    transparent_pipeline: PipelineHandle,
    culling: CullingDispatch,
    buffers: Option<SceneBuffers>,
    frames: FrameRing<DeletionQueue<B, BindingTables>>,
}

impl<B: GpuBackend + 'static> BatchRenderer<B> {
    /// Create the binding tables and pipelines.
    ///
    /// Fails with `UnsupportedFeature` on devices that cannot place a combined
    /// image/sampler descriptor as a single array element.
    pub fn new(
        backend: &mut B,
        config: RendererConfig,
        shaders: &ShaderSet,
    ) -> RendererResult<Self> {
        if config.max_samplers == 0 || config.max_images == 0 {
            return Err(RendererError::InvalidParameter(
                "texture table needs room for at least one sampler and one image".into(),
            ));
        }
        if config.instance_groups.is_empty() {
            return Err(RendererError::InvalidParameter(
                "at least one instance group is required".into(),
            ));
        }

        let properties = BindingTableProperties::retrieve(backend)?;
        if !properties.combined_image_sampler_single_array {
            return Err(RendererError::UnsupportedFeature(
                "combined image/sampler descriptors must be writable as a single array element"
                    .into(),
            ));
        }

        let uniform_layout = BindingTableLayout::single_uniform(backend)?;
        let texture_layout =
            BindingTableLayout::texture_arrays(backend, config.max_samplers, config.max_images)?;
        let tables = BindingTables {
            uniform: BindingTable::new(
                backend,
                properties,
                &uniform_layout,
                config.uniform_table_capacity,
                BindingTableVariant::Uniform,
                "uniforms",
            )?,
            texture: BindingTable::new(
                backend,
                properties,
                &texture_layout,
                config.texture_table_capacity,
                BindingTableVariant::ImageSampler,
                "textures",
            )?,
        };

        let uniform = uniform_layout.handle();
        let culling_pipeline = backend.create_compute_pipeline(&ComputePipelineDescriptor {
            label: Some("culling".into()),
            shader: shaders.cull.clone(),
            entry_point: "main".into(),
            binding_layouts: vec![uniform, uniform, uniform],
        })?;

        let mesh_pipeline = |label: &str, transparent: bool| RenderPipelineDescriptor {
            label: Some(label.into()),
            vertex_shader: shaders.mesh_vertex.clone(),
            fragment_shader: shaders.mesh_fragment.clone(),
            binding_layouts: vec![uniform, uniform, texture_layout.handle()],
            color_format: config.color_format,
            depth_format: Some(config.depth_format),
            depth_write_enabled: !transparent,
            depth_compare: CompareFunction::GreaterEqual,
            cull_mode: if transparent { CullMode::None } else { CullMode::Back },
            blend: transparent.then(BlendState::alpha_blending),
        };
        let opaque_pipeline =
            backend.create_render_pipeline(&mesh_pipeline("opaque meshes", false))?;
        let transparent_pipeline =
            backend.create_render_pipeline(&mesh_pipeline("transparent meshes", true))?;

        log::info!(
            "Batch renderer ready on {} ({} samplers, {} images per texture table)",
            backend.name(),
            config.max_samplers,
            config.max_images
        );

        Ok(Self {
            culling: CullingDispatch::new(culling_pipeline, config.culling_workgroup_size),
            config,
            properties,
            uniform_layout,
            texture_layout,
            tables,
            opaque_pipeline,
            transparent_pipeline,
            buffers: None,
            frames: FrameRing::default(),
        })
    }

    /// Flatten `scene` into GPU buffers and fill the binding tables.
    ///
    /// Runs once; later calls log a warning and return without allocating.
    /// All uploads go through the blocking one-shot submit, so they complete
    /// before the first frame that reads them. A failed build releases what it
    /// had created, so the renderer stays unbuilt and may be built again.
    pub fn build_buffers(&mut self, backend: &mut B, scene: &Scene) -> RendererResult<()> {
        if self.buffers.is_some() {
            log::warn!("Scene buffers are already built; ignoring repeat build");
            return Ok(());
        }

        scene.validate()?;
        check_texture_capacity(
            scene.samplers.len(),
            scene.images.len(),
            self.config.max_samplers,
            self.config.max_images,
        )?;

        let flat = FlattenedScene::flatten(scene, &self.config.instance_groups, Mat4::IDENTITY);
        if flat.instances.is_empty() {
            return Err(RendererError::InvalidParameter(
                "scene has no mesh instances to draw".into(),
            ));
        }

        let mut created = BuildRollback::default();
        match self.create_scene_buffers(backend, scene, flat, &mut created) {
            Ok(buffers) => {
                self.buffers = Some(buffers);
                Ok(())
            }
            Err(e) => {
                log::error!("Scene build failed, releasing partial allocations: {e}");
                created.release(backend, &mut self.tables);
                Err(e)
            }
        }
    }

    /// Allocate every scene object, recording each one in `created` as it goes
    fn create_scene_buffers(
        &mut self,
        backend: &mut B,
        scene: &Scene,
        flat: FlattenedScene,
        created: &mut BuildRollback,
    ) -> RendererResult<SceneBuffers> {
        let vertex = upload_buffer(
            backend,
            "vertex",
            bytemuck::cast_slice(&flat.vertices),
            BufferUsage::STORAGE,
        )?;
        created.buffers.push(vertex);
        let index = upload_buffer(
            backend,
            "index",
            bytemuck::cast_slice(&flat.indices),
            BufferUsage::INDEX,
        )?;
        created.buffers.push(index);
        let material = upload_buffer(
            backend,
            "material",
            bytemuck::cast_slice(&flat.materials),
            BufferUsage::STORAGE,
        )?;
        created.buffers.push(material);
        let instance_bytes: &[u8] = bytemuck::cast_slice(&flat.instances);
        let instance = upload_buffer(backend, "instance", instance_bytes, BufferUsage::STORAGE)?;
        created.buffers.push(instance);
        let bounds = upload_buffer(
            backend,
            "bounds",
            bytemuck::cast_slice(&flat.bounds),
            BufferUsage::STORAGE,
        )?;
        created.buffers.push(bounds);
        let instance_staging = per_frame(|i| {
            let buffer = create_mapped_buffer(
                backend,
                &format!("instance staging {i}"),
                instance_bytes.len() as u64,
                BufferUsage::COPY_SRC,
            )?;
            created.buffers.push(buffer);
            Ok(buffer)
        })?;

        let split = partition(&flat.instances, &flat.meshes);
        let opaque = DrawBucket::create(backend, "opaque", &split.opaque)?;
        created.bucket(opaque.as_ref());
        let transparent = DrawBucket::create(backend, "transparent", &split.transparent)?;
        created.bucket(transparent.as_ref());
        log::debug!(
            "Partitioned {} instances: {} opaque, {} transparent",
            split.total(),
            split.opaque.len(),
            split.transparent.len()
        );

        let mut samplers = Vec::with_capacity(scene.samplers.len());
        for desc in &scene.samplers {
            let sampler = backend.create_sampler(desc)?;
            created.samplers.push(sampler);
            samplers.push(sampler);
        }
        let mut textures = Vec::with_capacity(scene.images.len());
        for image in &scene.images {
            let texture = image.decode().upload(backend)?;
            created.textures.push(texture);
            textures.push(texture);
        }

        let addresses = create_mapped_buffer(
            backend,
            "resource addresses",
            std::mem::size_of::<ResourceAddresses>() as u64,
            BufferUsage::UNIFORM,
        )?;
        created.buffers.push(addresses);
        let resource_addresses = ResourceAddresses {
            vertex_buffer: backend.buffer_address(vertex)?,
            material_buffer: backend.buffer_address(material)?,
            instance_buffer: backend.buffer_address(instance)?,
            _padding: 0,
        };
        backend.write_buffer(addresses, 0, bytemuck::bytes_of(&resource_addresses))?;

        let culling_input = create_mapped_buffer(
            backend,
            "culling input",
            std::mem::size_of::<CullingInput>() as u64,
            BufferUsage::UNIFORM,
        )?;
        created.buffers.push(culling_input);
        let input = CullingInput::new(
            opaque.as_ref(),
            transparent.as_ref(),
            backend.buffer_address(bounds)?,
        );
        backend.write_buffer(culling_input, 0, bytemuck::bytes_of(&input))?;

        let scene_data = per_frame(|i| {
            let buffer = create_mapped_buffer(
                backend,
                &format!("scene data {i}"),
                std::mem::size_of::<SceneData>() as u64,
                BufferUsage::UNIFORM,
            )?;
            created.buffers.push(buffer);
            backend.write_buffer(buffer, 0, bytemuck::bytes_of(&SceneData::zeroed()))?;
            Ok(buffer)
        })?;

        let address_descriptor = uniform_descriptor::<B, ResourceAddresses>(backend, addresses)?;
        let culling_descriptor = uniform_descriptor::<B, CullingInput>(backend, culling_input)?;
        let uniform = &mut self.tables.uniform;
        let address_slot = uniform.allocate_slot(backend, &[address_descriptor])?;
        created.uniform_slots.push(address_slot);
        let culling_slot = uniform.allocate_slot(backend, &[culling_descriptor])?;
        created.uniform_slots.push(culling_slot);
        let scene_slots = per_frame(|i| {
            let descriptor = uniform_descriptor::<B, SceneData>(backend, scene_data[i])?;
            let slot = uniform.allocate_slot(backend, &[descriptor])?;
            created.uniform_slots.push(slot);
            Ok(slot)
        })?;

        let texture_descriptors = build_texture_descriptors(
            &samplers,
            &textures,
            self.config.max_samplers,
            self.config.max_images,
        )?;
        let texture_slot = self
            .tables
            .texture
            .allocate_slot(backend, &texture_descriptors)?;

        log::info!(
            "Built scene buffers: {} meshes, {} instances, {} vertices, {} indices, {} images",
            flat.meshes.len(),
            flat.instances.len(),
            flat.vertices.len(),
            flat.indices.len(),
            textures.len()
        );

        Ok(SceneBuffers {
            instance_count: flat.instances.len(),
            instance_bytes: instance_bytes.len() as u64,
            meshes: flat.meshes,
            vertex,
            index,
            material,
            instance,
            bounds,
            instance_staging,
            instances_dirty: false,
            root: Mat4::IDENTITY,
            opaque,
            transparent,
            addresses,
            culling_input,
            scene_data,
            address_slot,
            culling_slot,
            scene_slots,
            texture_slot,
            textures,
            samplers,
        })
    }

    /// Start a new frame.
    ///
    /// Call after the backend has waited for the fence of the frame slot being
    /// reused; this releases everything that slot deferred.
    pub fn begin_frame(&mut self, backend: &mut B) {
        self.frames.advance();
        let Self { frames, tables, .. } = self;
        frames.current_mut().flush(backend, tables);
    }

    /// Write this frame's scene data, and re-walk the scene if `root` moved.
    ///
    /// The re-walk uses the same traversal as the build, so instance record
    /// `i` keeps describing the same node. The new records land in this frame's
    /// staging buffer and are copied to the GPU by the next [`cull`](Self::cull).
    pub fn update_draw_data(
        &mut self,
        backend: &mut B,
        scene: &Scene,
        scene_data: &SceneData,
        root: Mat4,
    ) -> RendererResult<()> {
        let frame = self.frames.index();
        let buffers = self.buffers.as_mut().ok_or_else(not_built)?;
        backend.write_buffer(buffers.scene_data[frame], 0, bytemuck::bytes_of(scene_data))?;

        if root != buffers.root {
            let instances = collect_instances(
                scene,
                &buffers.meshes,
                &self.config.instance_groups,
                root,
            );
            if instances.len() != buffers.instance_count {
                return Err(RendererError::InvalidParameter(format!(
                    "scene now yields {} instances but {} were built",
                    instances.len(),
                    buffers.instance_count
                )));
            }
            backend.write_buffer(
                buffers.instance_staging[frame],
                0,
                bytemuck::cast_slice(&instances),
            )?;
            buffers.instances_dirty = true;
            buffers.root = root;
        }
        Ok(())
    }

    /// Record the culling pass into `cmd`
    pub fn cull(&mut self, backend: &mut B, cmd: CommandBufferHandle) -> RendererResult<()> {
        let frame = self.frames.index();
        let buffers = self.buffers.as_mut().ok_or_else(not_built)?;

        let upload = if buffers.instances_dirty {
            buffers.instances_dirty = false;
            Some(InstanceUpload {
                staging: buffers.instance_staging[frame],
                instances: buffers.instance,
                size: buffers.instance_bytes,
            })
        } else {
            None
        };

        let buckets: Vec<&DrawBucket> = buffers
            .opaque
            .iter()
            .chain(buffers.transparent.iter())
            .collect();
        let uniform = &self.tables.uniform;
        let offsets = [
            (0, uniform.slot_offset(buffers.address_slot)),
            (0, uniform.slot_offset(buffers.scene_slots[frame])),
            (0, uniform.slot_offset(buffers.culling_slot)),
        ];
        self.culling.record(
            backend,
            cmd,
            &buckets,
            upload,
            &[uniform.binding()],
            &offsets,
        );
        Ok(())
    }

    /// Record the opaque draw, then the transparent draw, into `cmd`.
    ///
    /// Must be recorded inside a rendering scope whose attachments match the
    /// configured formats.
    pub fn draw(
        &self,
        backend: &mut B,
        cmd: CommandBufferHandle,
        extent: Extent2D,
    ) -> RendererResult<()> {
        let frame = self.frames.index();
        let buffers = self.buffers.as_ref().ok_or_else(not_built)?;

        backend.cmd_set_viewport(cmd, extent);
        backend.cmd_bind_index_buffer(cmd, buffers.index, 0);
        backend.cmd_bind_binding_tables(
            cmd,
            &[self.tables.uniform.binding(), self.tables.texture.binding()],
        );

        let offsets = [
            (0, self.tables.uniform.slot_offset(buffers.address_slot)),
            (0, self.tables.uniform.slot_offset(buffers.scene_slots[frame])),
            (1, self.tables.texture.slot_offset(buffers.texture_slot)),
        ];
        let passes = [
            (&buffers.opaque, self.opaque_pipeline),
            (&buffers.transparent, self.transparent_pipeline),
        ];
        for (bucket, pipeline) in passes {
            let Some(bucket) = bucket else {
                continue;
            };
            backend.cmd_bind_pipeline(cmd, pipeline);
            backend.cmd_set_binding_table_offsets(cmd, pipeline, 0, &offsets);
            backend.cmd_draw_indexed_indirect(
                cmd,
                bucket.live,
                0,
                bucket.count,
                INDIRECT_COMMAND_STRIDE,
            );
        }
        Ok(())
    }

    /// Swap the image at `image_index` for `texture`.
    ///
    /// The texture-table slot is rewritten in place; the old texture is
    /// destroyed once the current frame slot comes around again.
    pub fn replace_texture(
        &mut self,
        backend: &mut B,
        image_index: usize,
        texture: &TextureData,
    ) -> RendererResult<()> {
        let buffers = self.buffers.as_mut().ok_or_else(not_built)?;
        let Some(&old) = buffers.textures.get(image_index) else {
            return Err(RendererError::InvalidParameter(format!(
                "scene has no image {image_index}"
            )));
        };

        let new = texture.upload(backend)?;
        buffers.textures[image_index] = new;
        let descriptors = build_texture_descriptors(
            &buffers.samplers,
            &buffers.textures,
            self.config.max_samplers,
            self.config.max_images,
        )?;
        self.tables
            .texture
            .write_slot(backend, buffers.texture_slot, &descriptors)?;

        log::debug!("Replaced image {image_index} with '{}'", texture.name);
        self.frames
            .current_mut()
            .push(move |backend: &mut B, _: &mut BindingTables| backend.destroy_texture(old));
        Ok(())
    }

    /// Point a spare uniform slot at a caller-owned buffer
    pub fn allocate_uniform_slot(
        &mut self,
        backend: &mut B,
        buffer: BufferHandle,
        range: u64,
    ) -> RendererResult<u32> {
        let address = backend.buffer_address(buffer)?;
        self.tables
            .uniform
            .allocate_slot(backend, &[ResourceDescriptor::UniformBuffer { address, range }])
    }

    /// Free a uniform slot once the current frame slot comes around again
    pub fn retire_uniform_slot(&mut self, index: u32) {
        self.frames
            .current_mut()
            .push(move |_: &mut B, tables: &mut BindingTables| {
                if let Err(e) = tables.uniform.free_slot(index) {
                    log::error!("Failed to retire uniform slot {index}: {e}");
                }
            });
    }

    pub fn stats(&self) -> DrawStats {
        let Some(buffers) = &self.buffers else {
            return DrawStats::default();
        };
        let opaque = buffers.opaque.as_ref().map_or(0, |b| b.count as usize);
        let transparent = buffers.transparent.as_ref().map_or(0, |b| b.count as usize);
        DrawStats {
            meshes: buffers.meshes.len(),
            instances: buffers.instance_count,
            opaque,
            transparent,
            culling_workgroups: self.culling.workgroup_count((opaque + transparent) as u32),
        }
    }

    pub fn is_built(&self) -> bool {
        self.buffers.is_some()
    }

    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    pub fn properties(&self) -> &'static BindingTableProperties {
        self.properties
    }

    pub fn tables(&self) -> &BindingTables {
        &self.tables
    }

    /// Live buffers of the (opaque, transparent) buckets, when they exist
    pub fn draw_buffers(&self) -> (Option<BufferHandle>, Option<BufferHandle>) {
        match &self.buffers {
            Some(b) => (
                b.opaque.as_ref().map(|bucket| bucket.live),
                b.transparent.as_ref().map(|bucket| bucket.live),
            ),
            None => (None, None),
        }
    }

    /// GPU buffer holding the flattened instance records
    pub fn instance_buffer(&self) -> Option<BufferHandle> {
        self.buffers.as_ref().map(|b| b.instance)
    }

    pub fn culling_pipeline(&self) -> PipelineHandle {
        self.culling.pipeline()
    }

    pub fn mesh_pipelines(&self) -> (PipelineHandle, PipelineHandle) {
        (self.opaque_pipeline, self.transparent_pipeline)
    }

    /// Release every GPU object the renderer owns.
    ///
    /// Waits for the device, runs all deferred deletions, then frees the binding
    /// tables before the buffers their slots point at, and pipelines and
    /// layouts last.
    pub fn destroy(self, backend: &mut B) {
        if let Err(e) = backend.wait_idle() {
            log::error!("Failed to wait for device idle before teardown: {e}");
        }

        let BatchRenderer {
            uniform_layout,
            texture_layout,
            mut tables,
            opaque_pipeline,
            transparent_pipeline,
            culling,
            buffers,
            frames,
            ..
        } = self;

        for mut queue in frames.into_frames() {
            queue.flush(backend, &mut tables);
        }
        tables.uniform.destroy(backend);
        tables.texture.destroy(backend);
        if let Some(buffers) = buffers {
            buffers.destroy(backend);
        }
        backend.destroy_pipeline(culling.pipeline());
        backend.destroy_pipeline(opaque_pipeline);
        backend.destroy_pipeline(transparent_pipeline);
        uniform_layout.destroy(backend);
        texture_layout.destroy(backend);
        log::debug!("Batch renderer destroyed");
    }
}

fn not_built() -> RendererError {
    RendererError::InvalidParameter("scene buffers have not been built".into())
}

/// Uniform descriptor covering a whole `T` at the start of `buffer`
fn uniform_descriptor<B: GpuBackend, T>(
    backend: &B,
    buffer: BufferHandle,
) -> RendererResult<ResourceDescriptor> {
    Ok(ResourceDescriptor::UniformBuffer {
        address: backend.buffer_address(buffer)?,
        range: std::mem::size_of::<T>() as u64,
    })
}

/// Create one object per frame in flight
fn per_frame<T>(
    mut create: impl FnMut(usize) -> RendererResult<T>,
) -> RendererResult<[T; FRAME_OVERLAP]> {
    let mut frames = Vec::with_capacity(FRAME_OVERLAP);
    for i in 0..FRAME_OVERLAP {
        frames.push(create(i)?);
    }
    frames
        .try_into()
        .map_err(|_| RendererError::InvalidParameter("per-frame object count mismatch".into()))
}
