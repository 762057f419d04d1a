//! Batch renderer integration tests.
//!
//! These drive the full build → begin_frame → update → cull → draw cycle on the
//! dummy backend and inspect the resulting buffers and command streams.

mod common;

use batch_renderer::backend::dummy::{DummyBackend, RecordedCommand};
use batch_renderer::backend::{AccessScope, BufferBarrier, BufferHandle};
use batch_renderer::renderer::INDIRECT_COMMAND_STRIDE;
use batch_renderer::{GpuBackend, RendererConfig, RendererError, Scene, TextureData};
use common::*;
use glam::{Mat4, Vec3};
use rstest::rstest;

// ============================================================================
// Scene building
// ============================================================================

/// A mesh referenced by several nodes yields one instance record per node
#[rstest]
#[case::single(1)]
#[case::several(3)]
#[case::many(70)]
fn test_one_instance_per_mesh_node(#[case] nodes: usize) {
    let mut backend = DummyBackend::new();
    let scene = repeated_mesh_scene(nodes);
    let renderer = built_renderer(&mut backend, &scene);

    let instances = read_instances(&backend, renderer.instance_buffer().unwrap());
    assert_eq!(instances.len(), nodes);
    assert!(instances.iter().all(|i| i.mesh_id == 0));
    assert!(instances.iter().all(|i| i.index_count == 36 && i.vertex_count == 24));

    let stats = renderer.stats();
    assert_eq!(stats.meshes, 1);
    assert_eq!(stats.instances, nodes);
    assert_eq!(stats.opaque, nodes);
    assert_eq!(stats.transparent, 0);
    assert_eq!(stats.culling_workgroups, (nodes as u32).div_ceil(64));
}

/// Each instance group stamps the whole hierarchy again at its offset
#[test]
fn test_instance_groups_repeat_the_walk() {
    let mut backend = DummyBackend::new();
    let scene = repeated_mesh_scene(2);
    let config = RendererConfig {
        instance_groups: vec![Vec3::ZERO, Vec3::new(0.0, 10.0, 0.0)],
        ..small_config()
    };
    let mut renderer = renderer(&mut backend, config);
    renderer.build_buffers(&mut backend, &scene).unwrap();

    let instances = read_instances(&backend, renderer.instance_buffer().unwrap());
    assert_eq!(instances.len(), 4);
    for (first, second) in instances[..2].iter().zip(&instances[2..]) {
        let moved = Mat4::from_translation(Vec3::new(0.0, 10.0, 0.0)) * first.model;
        assert!(moved.abs_diff_eq(second.model, 1e-5));
    }
}

/// Buckets keep the original instance index in `first_instance`, and an empty
/// bucket gets no buffer at all
#[rstest]
#[case::opaque_only(2, 0, vec![0, 1], vec![])]
#[case::transparent_only(0, 2, vec![], vec![0, 1])]
#[case::interleaved(2, 1, vec![1, 2], vec![0])]
#[case::mostly_transparent(1, 3, vec![1], vec![0, 2, 3])]
fn test_partition_buckets(
    #[case] opaque: usize,
    #[case] transparent: usize,
    #[case] expected_opaque: Vec<u32>,
    #[case] expected_transparent: Vec<u32>,
) {
    let mut backend = DummyBackend::new();
    let scene = mixed_scene(opaque, transparent);
    let renderer = built_renderer(&mut backend, &scene);

    let (opaque_buffer, transparent_buffer) = renderer.draw_buffers();
    for (buffer, expected) in [
        (opaque_buffer, expected_opaque),
        (transparent_buffer, expected_transparent),
    ] {
        match buffer {
            None => assert!(expected.is_empty()),
            Some(buffer) => {
                let commands = read_draw_commands(&backend, buffer);
                let first: Vec<u32> = commands.iter().map(|c| c.first_instance).collect();
                assert_eq!(first, expected);
                assert!(commands.iter().all(|c| c.instance_count == 1 && c.vertex_offset == 0));
            }
        }
    }
}

/// Building twice keeps the first allocation and creates nothing new
#[test]
fn test_build_is_idempotent() {
    let mut backend = DummyBackend::new();
    let scene = repeated_mesh_scene(3);
    let mut renderer = built_renderer(&mut backend, &scene);
    let buffers = backend.live_buffer_count();
    let instance = renderer.instance_buffer();

    renderer.build_buffers(&mut backend, &scene).unwrap();
    assert_eq!(backend.live_buffer_count(), buffers);
    assert_eq!(renderer.instance_buffer(), instance);
}

/// Sampler and image counts are checked against the fixed table regions
/// before anything is allocated
#[rstest]
#[case::at_capacity(2, 4, true)]
#[case::too_many_samplers(3, 1, false)]
#[case::too_many_images(1, 5, false)]
fn test_texture_capacity(#[case] samplers: usize, #[case] images: usize, #[case] fits: bool) {
    let mut backend = DummyBackend::new();
    let scene = textured_scene(samplers, images);
    let mut renderer = renderer(&mut backend, small_config());
    let buffers_before = backend.live_buffer_count();

    let result = renderer.build_buffers(&mut backend, &scene);
    if fits {
        result.unwrap();
        assert_eq!(backend.live_texture_count(), images);
        assert_eq!(renderer.tables().texture.live_slots(), 1);
    } else {
        assert!(matches!(result, Err(RendererError::CapacityExceeded { .. })));
        assert_eq!(backend.live_buffer_count(), buffers_before);
        assert!(!renderer.is_built());
    }
}

/// The uniform table must hold the addresses, culling input and per-frame
/// scene data; running out partway releases everything the build created
#[test]
fn test_uniform_table_too_small() {
    let mut backend = DummyBackend::new();
    let config = RendererConfig {
        uniform_table_capacity: 3,
        ..small_config()
    };
    let mut renderer = renderer(&mut backend, config);
    let scene = textured_scene(1, 2);
    let buffers_before = backend.live_buffer_count();
    let textures_before = backend.live_texture_count();

    for _ in 0..2 {
        let result = renderer.build_buffers(&mut backend, &scene);
        assert!(matches!(result, Err(RendererError::OutOfSlots { capacity: 3, .. })));
        assert!(!renderer.is_built());
        assert_eq!(renderer.tables().uniform.live_slots(), 0);
        assert_eq!(backend.live_buffer_count(), buffers_before);
        assert_eq!(backend.live_texture_count(), textures_before);
    }
}

/// A scene without mesh nodes is rejected
#[test]
fn test_empty_scene_rejected() {
    let mut backend = DummyBackend::new();
    let mut renderer = renderer(&mut backend, small_config());
    let result = renderer.build_buffers(&mut backend, &repeated_mesh_scene(0));
    assert!(matches!(result, Err(RendererError::InvalidParameter(_))));
}

// ============================================================================
// Frame cycle
// ============================================================================

/// Per-frame operations before the build fail instead of recording anything
#[test]
fn test_frame_before_build() {
    let mut backend = DummyBackend::new();
    let mut renderer = renderer(&mut backend, small_config());
    let cmd = backend.begin_frame().unwrap();

    let scene = repeated_mesh_scene(1);
    let update = renderer.update_draw_data(&mut backend, &scene, &scene_data(), Mat4::IDENTITY);
    assert!(matches!(update, Err(RendererError::InvalidParameter(_))));
    assert!(matches!(
        renderer.cull(&mut backend, cmd),
        Err(RendererError::InvalidParameter(_))
    ));
    assert!(matches!(
        renderer.draw(&mut backend, cmd, EXTENT),
        Err(RendererError::InvalidParameter(_))
    ));
}

/// A frame issues exactly one indirect draw per non-empty bucket
#[test]
fn test_frame_draws_both_buckets() {
    let mut backend = DummyBackend::new();
    let scene = mixed_scene(1, 1);
    let mut renderer = built_renderer(&mut backend, &scene);
    let targets = Targets::new(&mut backend);

    let commands = run_frame(&mut backend, &mut renderer, &scene, &targets, Mat4::IDENTITY);

    let draws: Vec<&RecordedCommand> = commands
        .iter()
        .filter(|c| matches!(c, RecordedCommand::DrawIndexedIndirect { .. }))
        .collect();
    let (opaque, transparent) = renderer.draw_buffers();
    assert_eq!(
        draws,
        vec![
            &RecordedCommand::DrawIndexedIndirect {
                buffer: opaque.unwrap(),
                offset: 0,
                draw_count: 1,
                stride: INDIRECT_COMMAND_STRIDE,
            },
            &RecordedCommand::DrawIndexedIndirect {
                buffer: transparent.unwrap(),
                offset: 0,
                draw_count: 1,
                stride: INDIRECT_COMMAND_STRIDE,
            },
        ]
    );

    let (opaque_pipeline, transparent_pipeline) = renderer.mesh_pipelines();
    assert!(!backend.pipeline_is_blended(opaque_pipeline));
    assert!(backend.pipeline_is_blended(transparent_pipeline));
    assert_eq!(backend.frames_submitted(), 1);

    // The live buffers were reset from their templates during the cull
    for buffer in [opaque.unwrap(), transparent.unwrap()] {
        let live = read_draw_commands(&backend, buffer);
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].instance_count, 1);
    }
}

/// Nested nodes are flattened pre-order with parents composed into children
#[test]
fn test_fan_out_build_order() {
    let mut backend = DummyBackend::new();
    let scene = fan_out_scene();
    let renderer = built_renderer(&mut backend, &scene);

    let instances = read_instances(&backend, renderer.instance_buffer().unwrap());
    let mesh_ids: Vec<u32> = instances.iter().map(|i| i.mesh_id).collect();
    assert_eq!(mesh_ids, vec![0, 1, 1, 0, 0]);

    let positions: Vec<Vec3> = instances
        .iter()
        .map(|i| i.model.transform_point3(Vec3::ZERO))
        .collect();
    assert_eq!(
        positions,
        vec![
            Vec3::X,
            Vec3::new(1.0, 1.0, 0.0),
            Vec3::NEG_X,
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(-1.0, 0.0, 1.0),
        ]
    );

    let (opaque, transparent) = renderer.draw_buffers();
    let first_instances = |buffer: BufferHandle| -> Vec<u32> {
        read_draw_commands(&backend, buffer)
            .iter()
            .map(|c| c.first_instance)
            .collect()
    };
    assert_eq!(first_instances(opaque.unwrap()), vec![0, 3, 4]);
    assert_eq!(first_instances(transparent.unwrap()), vec![1, 2]);
}

/// The second frame's resets and instance copy wait for the first frame's
/// culling, indirect and vertex-stage reads of the same buffers
#[test]
fn test_copies_wait_for_previous_frame() {
    let mut backend = DummyBackend::new();
    let scene = mixed_scene(1, 1);
    let mut renderer = built_renderer(&mut backend, &scene);
    let targets = Targets::new(&mut backend);
    let instance_buffer = renderer.instance_buffer().unwrap();

    run_frame(&mut backend, &mut renderer, &scene, &targets, Mat4::IDENTITY);
    let root = Mat4::from_translation(Vec3::new(1.0, 0.0, 0.0));
    let commands = run_frame(&mut backend, &mut renderer, &scene, &targets, root);

    let position = |command: RecordedCommand| commands.iter().position(|c| *c == command).unwrap();
    let copy_into = |buffer: BufferHandle| {
        commands
            .iter()
            .position(|c| matches!(c, RecordedCommand::CopyBuffer { dst, .. } if *dst == buffer))
            .unwrap()
    };

    let (opaque, transparent) = renderer.draw_buffers();
    for live in [opaque.unwrap(), transparent.unwrap()] {
        let wait = position(RecordedCommand::Barrier(BufferBarrier {
            buffer: live,
            src: AccessScope::ComputeWriteIndirectRead,
            dst: AccessScope::TransferWrite,
        }));
        assert!(wait < copy_into(live));
    }

    let wait = position(RecordedCommand::Barrier(BufferBarrier {
        buffer: instance_buffer,
        src: AccessScope::ComputeVertexRead,
        dst: AccessScope::TransferWrite,
    }));
    assert!(wait < copy_into(instance_buffer));
}

/// Resets precede the dispatch and the indirect-read barriers come last
#[test]
fn test_cull_command_order() {
    let mut backend = DummyBackend::new();
    let scene = mixed_scene(2, 2);
    let mut renderer = built_renderer(&mut backend, &scene);
    let targets = Targets::new(&mut backend);

    let commands = run_frame(&mut backend, &mut renderer, &scene, &targets, Mat4::IDENTITY);
    let dispatch = commands
        .iter()
        .position(|c| matches!(c, RecordedCommand::Dispatch { .. }))
        .unwrap();
    assert_eq!(commands[dispatch], RecordedCommand::Dispatch { x: 1, y: 1, z: 1 });

    let (opaque, transparent) = renderer.draw_buffers();
    let live = [opaque.unwrap(), transparent.unwrap()];
    let copies: Vec<usize> = commands
        .iter()
        .enumerate()
        .filter(|(_, c)| matches!(c, RecordedCommand::CopyBuffer { dst, .. } if live.contains(dst)))
        .map(|(i, _)| i)
        .collect();
    assert_eq!(copies.len(), 2);
    assert!(copies.iter().all(|&i| i < dispatch));

    for buffer in live {
        let barrier = RecordedCommand::Barrier(BufferBarrier {
            buffer,
            src: AccessScope::ComputeWrite,
            dst: AccessScope::IndirectRead,
        });
        let position = commands.iter().position(|c| *c == barrier).unwrap();
        assert!(position > dispatch);
    }

    let begin = commands
        .iter()
        .position(|c| matches!(c, RecordedCommand::BeginRendering { .. }))
        .unwrap();
    assert!(begin > dispatch);
}

/// Moving the root re-walks the scene in build order; an unchanged root
/// copies nothing
#[rstest]
#[case::one_level(mixed_scene(2, 2))]
#[case::fan_out(fan_out_scene())]
fn test_root_transform_update(#[case] scene: Scene) {
    let mut backend = DummyBackend::new();
    let mut renderer = built_renderer(&mut backend, &scene);
    let targets = Targets::new(&mut backend);
    let instance_buffer = renderer.instance_buffer().unwrap();
    let before = read_instances(&backend, instance_buffer);

    let root = Mat4::from_translation(Vec3::new(0.0, 5.0, 0.0)) * Mat4::from_rotation_y(0.5);
    let commands = run_frame(&mut backend, &mut renderer, &scene, &targets, root);
    let copies_into_instances = |commands: &[RecordedCommand]| {
        commands
            .iter()
            .filter(|c| {
                matches!(c, RecordedCommand::CopyBuffer { dst, .. } if *dst == instance_buffer)
            })
            .count()
    };
    assert_eq!(copies_into_instances(&commands), 1);

    let after = read_instances(&backend, instance_buffer);
    assert_eq!(after.len(), before.len());
    for (old, new) in before.iter().zip(&after) {
        assert_eq!(old.mesh_id, new.mesh_id);
        assert!((root * old.model).abs_diff_eq(new.model, 1e-5));
    }

    let commands = run_frame(&mut backend, &mut renderer, &scene, &targets, root);
    assert_eq!(copies_into_instances(&commands), 0);
}

// ============================================================================
// Deferred resource lifetimes
// ============================================================================

/// A replaced image outlives the frames that may still sample it
#[test]
fn test_replace_texture_is_deferred() {
    let mut backend = DummyBackend::new();
    let scene = textured_scene(1, 2);
    let mut renderer = built_renderer(&mut backend, &scene);
    let table = renderer.tables().texture.buffer();
    let writes = backend.write_count(table);
    assert_eq!(backend.live_texture_count(), 2);

    let replacement = TextureData::solid_color([0, 255, 0, 255], "green");
    renderer.replace_texture(&mut backend, 1, &replacement).unwrap();
    assert_eq!(backend.live_texture_count(), 3);
    assert!(backend.write_count(table) > writes);

    renderer.begin_frame(&mut backend);
    assert_eq!(backend.live_texture_count(), 3);
    renderer.begin_frame(&mut backend);
    assert_eq!(backend.live_texture_count(), 2);

    assert!(matches!(
        renderer.replace_texture(&mut backend, 2, &replacement),
        Err(RendererError::InvalidParameter(_))
    ));
}

/// Spare uniform slots can be taken and are returned after the frame slot recycles
#[test]
fn test_uniform_slot_retirement() {
    let mut backend = DummyBackend::new();
    let scene = repeated_mesh_scene(1);
    let config = RendererConfig {
        uniform_table_capacity: 5,
        ..small_config()
    };
    let mut renderer = renderer(&mut backend, config);
    renderer.build_buffers(&mut backend, &scene).unwrap();
    assert_eq!(renderer.tables().uniform.live_slots(), 4);

    let owned = batch_renderer::renderer::create_mapped_buffer(
        &mut backend,
        "caller uniforms",
        64,
        batch_renderer::backend::BufferUsage::UNIFORM,
    )
    .unwrap();
    let slot = renderer.allocate_uniform_slot(&mut backend, owned, 64).unwrap();
    assert_eq!(renderer.tables().uniform.live_slots(), 5);
    assert!(matches!(
        renderer.allocate_uniform_slot(&mut backend, owned, 64),
        Err(RendererError::OutOfSlots { .. })
    ));

    renderer.retire_uniform_slot(slot);
    renderer.begin_frame(&mut backend);
    assert_eq!(renderer.tables().uniform.live_slots(), 5);
    renderer.begin_frame(&mut backend);
    assert_eq!(renderer.tables().uniform.live_slots(), 4);

    backend.destroy_buffer(owned);
}

/// Teardown releases every object the renderer created
#[rstest]
#[case::unbuilt(false)]
#[case::built_and_drawn(true)]
fn test_destroy_releases_everything(#[case] build: bool) {
    let mut backend = DummyBackend::new();
    let scene = textured_scene(2, 3);
    let targets = Targets::new(&mut backend);
    let mut renderer = renderer(&mut backend, small_config());
    if build {
        renderer.build_buffers(&mut backend, &scene).unwrap();
        run_frame(&mut backend, &mut renderer, &scene, &targets, Mat4::IDENTITY);
        renderer
            .replace_texture(&mut backend, 0, &TextureData::white())
            .unwrap();
    }

    renderer.destroy(&mut backend);
    assert_eq!(backend.live_buffer_count(), 0);
    assert_eq!(backend.live_pipeline_count(), 0);
    assert_eq!(backend.live_layout_count(), 0);
    assert_eq!(backend.live_texture_count(), 2);
    assert!(backend.texture_exists(targets.color));
    targets.destroy(&mut backend);
}
