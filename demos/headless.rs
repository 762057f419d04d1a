//! # Headless Batch Demo
//!
//! Builds a procedural scene, stamps it across a grid of instance groups and
//! renders a fixed number of frames into offscreen attachments while slowly
//! spinning the scene root. Nothing is presented; the point is to exercise
//! scene flattening, culling and the two indirect draws on a real device.
//!
//! ```bash
//! cargo run --example headless -- --shaders shaders/spv --frames 240 --grid 8
//! ```

use std::path::PathBuf;

use batch_renderer::backend::{
    Extent2D, GpuBackend, RenderTargets, SamplerDescriptor, TextureDescriptor, TextureHandle,
    TextureUsage,
};
use batch_renderer::error::fatal;
use batch_renderer::{
    BatchRenderer, Camera, MaterialConstants, RawMesh, RendererConfig, RendererResult, Scene,
    SceneData, SceneImage, SceneLighting, SceneNode, ShaderSet, Transform, VulkanBackend,
    VulkanBackendConfig,
};
use clap::Parser;
use glam::{Mat4, Vec3, Vec4};

/// Headless batch renderer demo
#[derive(Parser, Debug)]
#[command(name = "headless", about = "Render a procedural scene offscreen with GPU culling")]
struct Args {
    /// Directory holding cull.comp.spv, mesh.vert.spv and mesh.frag.spv
    #[arg(long, default_value = "shaders/spv")]
    shaders: PathBuf,

    /// Number of frames to render before exiting
    #[arg(long, default_value_t = 120)]
    frames: u64,

    /// Instance groups per side; the scene is stamped grid x grid times
    #[arg(long, default_value_t = 4)]
    grid: u32,

    /// Attachment width in pixels
    #[arg(long, default_value_t = 1280)]
    width: u32,

    /// Attachment height in pixels
    #[arg(long, default_value_t = 720)]
    height: u32,

    /// Enable the Khronos validation layer
    #[arg(long)]
    validation: bool,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    if let Err(e) = run(&args) {
        fatal(&e);
    }
}

fn run(args: &Args) -> RendererResult<()> {
    let mut backend = VulkanBackend::new(VulkanBackendConfig {
        application_name: "headless-batch-demo".into(),
        enable_validation: args.validation,
        ..Default::default()
    })?;

    let shaders = ShaderSet::load(&args.shaders)?;
    let config = RendererConfig {
        instance_groups: grid_offsets(args.grid, 12.0),
        ..RendererConfig::default()
    };
    let color_format = config.color_format;
    let depth_format = config.depth_format;

    let scene = build_scene()?;
    let mut renderer = BatchRenderer::new(&mut backend, config, &shaders)?;
    renderer.build_buffers(&mut backend, &scene)?;
    log::info!("Scene stats: {:?}", renderer.stats());

    let extent = Extent2D::new(args.width, args.height);
    let color = attachment(&mut backend, "color", extent, color_format)?;
    let depth = attachment(&mut backend, "depth", extent, depth_format)?;

    let mut camera = Camera::new(Vec3::new(0.0, 30.0, 60.0), Vec3::ZERO);
    camera.set_aspect(extent.width as f32, extent.height as f32);
    let scene_data = SceneData::new(&camera, SceneLighting::default());

    let result = render_frames(
        &mut backend,
        &mut renderer,
        &scene,
        &scene_data,
        color,
        depth,
        extent,
        args.frames,
    );

    renderer.destroy(&mut backend);
    backend.destroy_texture(color);
    backend.destroy_texture(depth);
    result
}

#[allow(clippy::too_many_arguments)]
fn render_frames(
    backend: &mut VulkanBackend,
    renderer: &mut BatchRenderer<VulkanBackend>,
    scene: &Scene,
    scene_data: &SceneData,
    color: TextureHandle,
    depth: TextureHandle,
    extent: Extent2D,
    frames: u64,
) -> RendererResult<()> {
    let targets = RenderTargets {
        color,
        depth: Some(depth),
        extent,
        clear_color: Some([0.02, 0.02, 0.03, 1.0]),
    };

    let start = std::time::Instant::now();
    for frame in 0..frames {
        let cmd = backend.begin_frame()?;
        renderer.begin_frame(backend);

        let root = Mat4::from_rotation_y(frame as f32 * 0.01);
        renderer.update_draw_data(backend, scene, scene_data, root)?;
        renderer.cull(backend, cmd)?;

        backend.cmd_begin_rendering(cmd, &targets);
        renderer.draw(backend, cmd, extent)?;
        backend.cmd_end_rendering(cmd);
        backend.end_frame(cmd)?;

        if frame % 60 == 59 {
            log::info!("Frame {}", frame + 1);
        }
    }
    backend.wait_idle()?;

    let elapsed = start.elapsed();
    if frames > 0 {
        log::info!(
            "Rendered {frames} frames in {:.2?} ({:.2?} per frame)",
            elapsed,
            elapsed / frames as u32
        );
    }
    Ok(())
}

fn attachment(
    backend: &mut VulkanBackend,
    label: &str,
    extent: Extent2D,
    format: batch_renderer::backend::TextureFormat,
) -> RendererResult<TextureHandle> {
    Ok(backend.create_texture(
        &TextureDescriptor {
            label: Some(label.into()),
            width: extent.width,
            height: extent.height,
            format,
            usage: TextureUsage::RENDER_ATTACHMENT,
        },
        &[],
    )?)
}

/// Centered `n x n` grid of offsets on the XZ plane
fn grid_offsets(n: u32, spacing: f32) -> Vec<Vec3> {
    let n = n.max(1);
    let half = (n - 1) as f32 * spacing * 0.5;
    (0..n)
        .flat_map(|x| (0..n).map(move |z| (x, z)))
        .map(|(x, z)| Vec3::new(x as f32 * spacing - half, 0.0, z as f32 * spacing - half))
        .collect()
}

/// A ground plane, a ring of spheres around a textured cube, and glass panes
fn build_scene() -> RendererResult<Scene> {
    let mut scene = Scene::new();

    let sampler = scene.add_sampler(SamplerDescriptor::nearest()) as u32;
    let checker = scene.add_image(SceneImage::Rgba8 {
        name: "checker".into(),
        width: 2,
        height: 2,
        pixels: vec![
            255, 255, 255, 255, 40, 40, 40, 255, //
            40, 40, 40, 255, 255, 255, 255, 255,
        ],
    }) as u32;

    let ground_material = scene.add_material(MaterialConstants::plastic(Vec3::splat(0.4)));
    let crate_material = scene.add_material(
        MaterialConstants::plastic(Vec3::ONE).with_color_texture(checker, sampler),
    );
    let metal = scene.add_material(MaterialConstants::metal(Vec3::new(0.9, 0.6, 0.2), 0.3));
    let glass = scene.add_material(MaterialConstants::glass());

    let ground = scene.add_mesh(
        RawMesh::plane(10.0, 10.0, 4)
            .with_material(ground_material)
            .with_color(Vec4::new(0.6, 0.7, 0.6, 1.0)),
    );
    let cube = scene.add_mesh(RawMesh::cube().with_material(crate_material));
    let sphere = scene.add_mesh(RawMesh::sphere(24, 16).with_material(metal));
    let pane = scene.add_mesh(
        RawMesh::plane(1.5, 1.5, 1)
            .with_material(glass)
            .with_transparency(true),
    );

    let root = scene.add_node(SceneNode::empty("root", Transform::default()), None)?;
    scene.add_node(SceneNode::mesh("ground", Transform::default(), ground), Some(root))?;
    scene.add_node(
        SceneNode::mesh("crate", Transform::from_position(Vec3::new(0.0, 1.0, 0.0)), cube),
        Some(root),
    )?;

    let ring = scene.add_node(SceneNode::empty("ring", Transform::default()), Some(root))?;
    for i in 0..8 {
        let angle = i as f32 / 8.0 * std::f32::consts::TAU;
        let position = Vec3::new(angle.cos() * 3.5, 0.75, angle.sin() * 3.5);
        scene.add_node(
            SceneNode::mesh(
                &format!("sphere {i}"),
                Transform::from_position_scale(position, Vec3::splat(0.75)),
                sphere,
            ),
            Some(ring),
        )?;
    }
    for i in 0..4 {
        let angle = (i as f32 + 0.5) / 4.0 * std::f32::consts::TAU;
        let position = Vec3::new(angle.cos() * 2.0, 1.0, angle.sin() * 2.0);
        scene.add_node(
            SceneNode::mesh(
                &format!("pane {i}"),
                Transform::from_components(
                    position,
                    Vec3::new(std::f32::consts::FRAC_PI_2, 0.0, 0.0),
                    Vec3::ONE,
                ),
                pane,
            ),
            Some(root),
        )?;
    }

    scene.refresh_transforms();
    Ok(scene)
}
