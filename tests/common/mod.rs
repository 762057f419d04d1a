//! Common utilities for renderer integration tests.
//!
//! Every test runs against the dummy backend, whose copies execute eagerly, so
//! GPU-side buffer contents can be read back right after recording.

#![allow(dead_code)]

use batch_renderer::backend::dummy::{DummyBackend, RecordedCommand};
use batch_renderer::backend::{
    CommandBufferHandle, Extent2D, GpuBackend, RenderTargets, SamplerDescriptor, TextureDescriptor,
    TextureFormat, TextureHandle, TextureUsage,
};
use batch_renderer::renderer::{IndirectDrawCommand, InstanceRecord, SPIRV_MAGIC};
use batch_renderer::{
    BatchRenderer, Camera, MaterialConstants, RawMesh, RendererConfig, Scene, SceneData,
    SceneImage, SceneLighting, SceneNode, ShaderSet, Transform,
};
use glam::{Mat4, Vec3};

pub const EXTENT: Extent2D = Extent2D {
    width: 64,
    height: 64,
};

// ============================================================================
// Logging
// ============================================================================

/// Route renderer logs through the test harness; repeat calls are no-ops
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Shaders
// ============================================================================

/// A header-only SPIR-V module; the dummy backend never looks past it
pub fn spirv_module() -> Vec<u8> {
    [SPIRV_MAGIC, 0x0001_0500, 0, 1, 0]
        .iter()
        .flat_map(|w| w.to_le_bytes())
        .collect()
}

pub fn shader_set() -> ShaderSet {
    let module = spirv_module();
    ShaderSet::from_spirv_bytes(&module, &module, &module).unwrap()
}

// ============================================================================
// Scenes
// ============================================================================

/// One cube mesh referenced by `count` sibling nodes spread along X
pub fn repeated_mesh_scene(count: usize) -> Scene {
    let mut scene = Scene::new();
    let mesh = scene.add_mesh(RawMesh::cube());
    for i in 0..count {
        let position = Vec3::new(i as f32 * 2.0, 0.0, 0.0);
        scene
            .add_node(
                SceneNode::mesh(&format!("cube {i}"), Transform::from_position(position), mesh),
                None,
            )
            .unwrap();
    }
    scene.refresh_transforms();
    scene
}

/// `opaque` cube nodes and `transparent` glass plane nodes, interleaved under
/// one parent
pub fn mixed_scene(opaque: usize, transparent: usize) -> Scene {
    let mut scene = Scene::new();
    let solid = scene.add_material(MaterialConstants::plastic(Vec3::new(0.8, 0.2, 0.2)));
    let glass = scene.add_material(MaterialConstants::glass());
    let cube = scene.add_mesh(RawMesh::cube().with_material(solid));
    let pane = scene.add_mesh(
        RawMesh::plane(1.0, 1.0, 1)
            .with_material(glass)
            .with_transparency(true),
    );

    let parent = scene
        .add_node(SceneNode::empty("parent", Transform::default()), None)
        .unwrap();
    for i in 0..opaque.max(transparent) {
        let offset = Vec3::new(0.0, 0.0, i as f32 * -3.0);
        if i < transparent {
            scene
                .add_node(
                    SceneNode::mesh(&format!("pane {i}"), Transform::from_position(offset), pane),
                    Some(parent),
                )
                .unwrap();
        }
        if i < opaque {
            scene
                .add_node(
                    SceneNode::mesh(&format!("cube {i}"), Transform::from_position(offset), cube),
                    Some(parent),
                )
                .unwrap();
        }
    }
    scene.refresh_transforms();
    scene
}

/// Two levels of fan-out under one root, with siblings declared before the
/// children of earlier siblings:
///
/// root ─┬─ a(cube) ── a1(pane)
///       ├─ b(pane)
///       └─ c ─┬─ c1(cube)
///             └─ c2(cube)
pub fn fan_out_scene() -> Scene {
    let mut scene = Scene::new();
    let solid = scene.add_material(MaterialConstants::plastic(Vec3::splat(0.5)));
    let glass = scene.add_material(MaterialConstants::glass());
    let cube = scene.add_mesh(RawMesh::cube().with_material(solid));
    let pane = scene.add_mesh(
        RawMesh::plane(1.0, 1.0, 1)
            .with_material(glass)
            .with_transparency(true),
    );

    let mut add = |name: &str, position: Vec3, kind: Option<usize>, parent: Option<usize>| {
        let local = Transform::from_position(position);
        let node = match kind {
            Some(mesh) => SceneNode::mesh(name, local, mesh),
            None => SceneNode::empty(name, local),
        };
        scene.add_node(node, parent).unwrap()
    };
    let root = add("root", Vec3::ZERO, None, None);
    let a = add("a", Vec3::X, Some(cube), Some(root));
    add("a1", Vec3::Y, Some(pane), Some(a));
    add("b", Vec3::NEG_X, Some(pane), Some(root));
    let c = add("c", Vec3::Z, None, Some(root));
    add("c1", Vec3::X, Some(cube), Some(c));
    add("c2", Vec3::NEG_X, Some(cube), Some(c));

    scene.refresh_transforms();
    scene
}

/// A single cube with `samplers` samplers and `images` small images
pub fn textured_scene(samplers: usize, images: usize) -> Scene {
    let mut scene = repeated_mesh_scene(1);
    for _ in 0..samplers {
        scene.add_sampler(SamplerDescriptor::default());
    }
    for i in 0..images {
        scene.add_image(SceneImage::Rgba8 {
            name: format!("image {i}"),
            width: 2,
            height: 2,
            pixels: vec![255; 16],
        });
    }
    scene
}

pub fn scene_data() -> SceneData {
    let camera = Camera::new(Vec3::new(0.0, 2.0, 8.0), Vec3::ZERO);
    SceneData::new(&camera, SceneLighting::default())
}

// ============================================================================
// Renderer
// ============================================================================

pub fn small_config() -> RendererConfig {
    RendererConfig {
        max_samplers: 2,
        max_images: 4,
        ..RendererConfig::default()
    }
}

pub fn renderer(backend: &mut DummyBackend, config: RendererConfig) -> BatchRenderer<DummyBackend> {
    init_logging();
    BatchRenderer::new(backend, config, &shader_set()).unwrap()
}

pub fn built_renderer(backend: &mut DummyBackend, scene: &Scene) -> BatchRenderer<DummyBackend> {
    let mut renderer = renderer(backend, small_config());
    renderer.build_buffers(backend, scene).unwrap();
    renderer
}

/// Color and depth attachments matching the default renderer formats
pub struct Targets {
    pub color: TextureHandle,
    pub depth: TextureHandle,
}

impl Targets {
    pub fn new(backend: &mut DummyBackend) -> Self {
        let attachment = |format| TextureDescriptor {
            label: None,
            width: EXTENT.width,
            height: EXTENT.height,
            format,
            usage: TextureUsage::RENDER_ATTACHMENT,
        };
        Self {
            color: backend
                .create_texture(&attachment(TextureFormat::Rgba16Float), &[])
                .unwrap(),
            depth: backend
                .create_texture(&attachment(TextureFormat::Depth32Float), &[])
                .unwrap(),
        }
    }

    pub fn render_targets(&self) -> RenderTargets {
        RenderTargets {
            color: self.color,
            depth: Some(self.depth),
            extent: EXTENT,
            clear_color: Some([0.0, 0.0, 0.0, 1.0]),
        }
    }

    pub fn destroy(self, backend: &mut DummyBackend) {
        backend.destroy_texture(self.color);
        backend.destroy_texture(self.depth);
    }
}

/// Run one full frame and return the commands it recorded
pub fn run_frame(
    backend: &mut DummyBackend,
    renderer: &mut BatchRenderer<DummyBackend>,
    scene: &Scene,
    targets: &Targets,
    root: Mat4,
) -> Vec<RecordedCommand> {
    backend.take_commands();
    let cmd: CommandBufferHandle = backend.begin_frame().unwrap();
    renderer.begin_frame(backend);
    renderer
        .update_draw_data(backend, scene, &scene_data(), root)
        .unwrap();
    renderer.cull(backend, cmd).unwrap();
    backend.cmd_begin_rendering(cmd, &targets.render_targets());
    renderer.draw(backend, cmd, EXTENT).unwrap();
    backend.cmd_end_rendering(cmd);
    backend.end_frame(cmd).unwrap();
    backend.take_commands()
}

// ============================================================================
// Readback
// ============================================================================

pub fn read_draw_commands(
    backend: &DummyBackend,
    buffer: batch_renderer::backend::BufferHandle,
) -> Vec<IndirectDrawCommand> {
    bytemuck::pod_collect_to_vec(backend.buffer_data(buffer).unwrap())
}

pub fn read_instances(
    backend: &DummyBackend,
    buffer: batch_renderer::backend::BufferHandle,
) -> Vec<InstanceRecord> {
    bytemuck::pod_collect_to_vec(backend.buffer_data(buffer).unwrap())
}
