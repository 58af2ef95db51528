//! End-to-end frame tests: parallel traversal, deletion post-pass, laser
//! chains and instance buffer output.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use barrage_core::{
    FnBehavior, Kernel, KernelConfig, LaserTag, Lifetime, NodeId, Receipt, RenderKind, Velocity,
    VisualCatalog,
};
use barrage_shared::math::Transform2D;

const CATALOG: &str = r#"
    [[bullet]]
    name = "orb"
    z_order = 3
    color = true
    deletion_effect = "orb_pop"

    [[bullet]]
    name = "orb_pop"
    color = true

    [[bullet]]
    name = "shard"
    custom = true

    [[laser]]
    name = "beam"
    z_order = 7
    mesh = { width = 6.0, height = 24.0 }
"#;

fn kernel(slots: usize, cutoff: u32) -> Kernel {
    let config = KernelConfig {
        arena_slots: slots,
        parallel_cutoff: cutoff,
        worker_threads: 4,
        max_queue_members: slots,
        deletion_effect_seconds: 0.5,
    };
    Kernel::new(config, VisualCatalog::from_toml_str(CATALOG).unwrap()).unwrap()
}

/// Builds `groups` parents with `per_group` bullet children each.
fn spawn_pattern(kernel: &Kernel, groups: usize, per_group: usize) -> NodeId {
    let orb = kernel.catalog().id_of(RenderKind::Bullet, "orb").unwrap();
    let root = kernel.allocate_one();
    for g in 0..groups {
        let group = kernel.allocate_one();
        kernel.set_child(root, g, group);
        let run = kernel.allocate_run(per_group).unwrap();
        for (slot, bullet) in run.iter().enumerate() {
            kernel.set_child(group, slot, bullet);
            kernel.append_behavior(bullet, Box::new(Velocity::new(0.0, 60.0)));
            assert!(kernel.set_bullet_render_id(bullet, Some(orb)));
        }
    }
    root
}

#[test]
fn test_parallel_frame_moves_every_bullet() {
    let kernel = kernel(4096, 16);
    let root = spawn_pattern(&kernel, 16, 64);
    let orb = kernel.catalog().id_of(RenderKind::Bullet, "orb").unwrap();

    let stats = kernel.step_frame(0.5);
    assert_eq!(stats.roots, 1);
    assert_eq!(stats.visited, 1 + 16 + 16 * 64);
    assert_eq!(stats.live, 1 + 16 + 16 * 64);

    for group in kernel.children(root) {
        for bullet in kernel.children(group) {
            assert_eq!(kernel.local_transform(bullet).ty, 30.0);
        }
    }

    let live = kernel.bullets().with_buffer(orb, |b| {
        assert_eq!(b.stride(), 12);
        assert_eq!(b.capacity_instances(), 2048);
        let floats = b.as_floats();
        assert_eq!(floats.len(), (16 * 64 + 1) * 12);
        assert!(floats[16 * 64 * 12..].iter().all(|&f| f == 0.0));
        for index in 0..b.live_count() {
            let record = b.record(index);
            assert_eq!(record[5], 30.0);
            assert_eq!(record[6], 3.0);
        }
        b.live_count()
    });
    assert_eq!(live, Some(16 * 64));
}

#[test]
fn test_behaviors_run_concurrently_without_losing_updates() {
    let kernel = kernel(2048, 4);
    let root = kernel.allocate_one();
    let counter = Arc::new(AtomicUsize::new(0));
    for slot in 0..256 {
        let child = kernel.allocate_one();
        kernel.set_child(root, slot, child);
        let counter = Arc::clone(&counter);
        kernel.append_behavior(
            child,
            FnBehavior::boxed(move |kernel: &Kernel, node: NodeId, _: f32| {
                counter.fetch_add(1, Ordering::Relaxed);
                // Spawn under self from a worker thread.
                let spawned = kernel.allocate_one();
                if !spawned.is_null() {
                    kernel.set_child(node, 0, spawned);
                }
                Receipt::CONTINUE
            }),
        );
    }

    kernel.execute(root, 1.0);
    assert_eq!(counter.load(Ordering::Relaxed), 256);
    assert_eq!(kernel.tree_size(root), 1 + 256 * 2);
    assert_eq!(kernel.live_count(), 1 + 256 * 2);
}

#[test]
fn test_deletion_effect_fades_then_frees() {
    let kernel = kernel(64, 256);
    let orb = kernel.catalog().id_of(RenderKind::Bullet, "orb").unwrap();
    let pop = kernel.catalog().id_of(RenderKind::Bullet, "orb_pop").unwrap();
    let bullet = kernel.allocate_one();
    kernel.set_bullet_render_id(bullet, Some(orb));
    kernel.append_behavior(bullet, Box::new(Lifetime::with_effect(0.1)));

    let stats = kernel.step_frame(0.25);
    assert_eq!((stats.destroyed, stats.effects), (0, 1));
    assert!(kernel.is_deletion_effect(bullet));
    assert_eq!(kernel.bullets().take_emptied(), vec![orb]);
    assert_eq!(kernel.bullets().member_count(pop), 1);

    // 0.5 s effect: one frame fades to half alpha, the next frees it.
    kernel.step_frame(0.25);
    assert_eq!(kernel.extra(bullet).unwrap().color[3], 0.5);
    let stats = kernel.step_frame(0.25);
    assert_eq!(stats.destroyed, 1);
    assert_eq!(stats.live, 0);
    assert_eq!(kernel.bullets().take_emptied(), vec![pop]);
}

#[test]
fn test_deleted_parent_takes_children() {
    let kernel = kernel(64, 256);
    let root = spawn_pattern(&kernel, 2, 4);
    kernel.append_behavior(root, Box::new(Lifetime::new(0.0)));
    let stats = kernel.step_frame(1.0);
    assert_eq!(stats.visited, 1);
    assert_eq!(stats.destroyed, 1);
    assert_eq!(stats.live, 0);
    assert_eq!(kernel.arena().free_space(), kernel.capacity());
}

#[test]
fn test_laser_splice_and_graze() {
    let kernel = kernel(64, 256);
    let beam = kernel.catalog().id_of(RenderKind::Laser, "beam").unwrap();
    let laser = kernel.allocate_one();
    let segments: Vec<NodeId> = (0..5)
        .map(|slot| {
            let segment = kernel.allocate_one();
            kernel.set_child(laser, slot, segment);
            assert!(kernel.set_laser_render_id(segment, Some(beam)));
            segment
        })
        .collect();

    kernel.advance_frame();
    assert!(kernel.new_graze_this_frame(segments[3]));
    assert!(!kernel.new_graze_this_frame(segments[1]));

    kernel.destroy_subtree(segments[2]);
    let tags: Vec<LaserTag> = kernel.lasers().members(beam).into_iter().map(|(_, t)| t).collect();
    assert_eq!(tags, vec![LaserTag::Head, LaserTag::Mid, LaserTag::Mid, LaserTag::Tail]);
    assert_eq!(tags.iter().filter(|&&t| t == LaserTag::Head).count(), 1);
    assert_eq!(tags.iter().filter(|&&t| t == LaserTag::Tail).count(), 1);
    assert!(kernel.is_laser_head(segments[0]));
    assert!(kernel.is_laser_tail(segments[4]));
    assert_eq!(kernel.laser_tag(segments[1]), LaserTag::Mid);
    assert_eq!(kernel.laser_tag(segments[3]), LaserTag::Mid);
    assert_eq!(kernel.laser_head_of(segments[4]), segments[0]);

    // Removing the head hands its graze stamp to the successor.
    kernel.destroy_subtree(segments[0]);
    assert_eq!(kernel.laser_head_of(segments[4]), segments[1]);
    assert!(!kernel.new_graze_this_frame(segments[4]));
    kernel.advance_frame();
    assert!(kernel.new_graze_this_frame(segments[4]));
}

#[test]
fn test_lasers_spawned_by_parallel_workers_stay_whole() {
    let kernel = kernel(256, 1);
    let beam = kernel.catalog().id_of(RenderKind::Laser, "beam").unwrap();
    let root = kernel.allocate_one();
    let emitters: Vec<NodeId> = (0..4)
        .map(|slot| {
            let emitter = kernel.allocate_one();
            kernel.set_child(root, slot, emitter);
            emitter
        })
        .collect();
    for &emitter in &emitters {
        kernel.append_behavior(
            emitter,
            FnBehavior::boxed(move |kernel: &Kernel, node: NodeId, _: f32| {
                if kernel.child_count(node) == 0 {
                    for slot in 0..16 {
                        let segment = kernel.allocate_one();
                        kernel.set_child(node, slot, segment);
                        assert!(kernel.set_laser_render_id(segment, Some(beam)));
                    }
                }
                Receipt::CONTINUE
            }),
        );
    }

    kernel.execute(root, 1.0);
    assert_eq!(kernel.lasers().member_count(beam), 64);
    for emitter in emitters {
        let segments = kernel.children(emitter);
        assert_eq!(segments.len(), 16);
        assert_eq!(kernel.laser_tag(segments[0]), LaserTag::Head);
        assert_eq!(kernel.laser_tag(segments[15]), LaserTag::Tail);
        for &segment in &segments {
            assert_eq!(kernel.laser_head_of(segment), segments[0]);
        }
        for &segment in &segments[1..15] {
            assert_eq!(kernel.laser_tag(segment), LaserTag::Mid);
        }
    }

    // One laser after another in the snapshot: four heads, four tails.
    let tags: Vec<LaserTag> = kernel.lasers().members(beam).into_iter().map(|(_, t)| t).collect();
    assert_eq!(tags.iter().filter(|&&t| t == LaserTag::Head).count(), 4);
    assert_eq!(tags.iter().filter(|&&t| t == LaserTag::Tail).count(), 4);
    assert!(tags.chunks(16).all(|laser| laser[0] == LaserTag::Head && laser[15] == LaserTag::Tail));
}

#[test]
fn test_render_ids_set_concurrently_from_workers() {
    let kernel = kernel(1024, 4);
    let orb = kernel.catalog().id_of(RenderKind::Bullet, "orb").unwrap();
    let shard = kernel.catalog().id_of(RenderKind::Bullet, "shard").unwrap();
    let root = kernel.allocate_one();
    let mut expected_orbs = Vec::new();
    let mut expected_shards = Vec::new();
    for slot in 0..512 {
        let bullet = kernel.allocate_one();
        kernel.set_child(root, slot, bullet);
        assert!(kernel.set_bullet_render_id(bullet, Some(orb)));
        let target = if slot % 2 == 0 { orb } else { shard };
        if slot % 2 == 0 {
            expected_orbs.push(bullet);
        } else {
            expected_shards.push(bullet);
        }
        kernel.append_behavior(
            bullet,
            FnBehavior::boxed(move |kernel: &Kernel, node: NodeId, _: f32| {
                // Bounce through the other visual so both queues churn.
                assert!(kernel.set_bullet_render_id(node, Some(shard)));
                assert!(kernel.set_bullet_render_id(node, Some(target)));
                Receipt::CONTINUE
            }),
        );
    }

    kernel.execute(root, 1.0);
    let mut orbs = kernel.bullets().members(orb);
    let mut shards = kernel.bullets().members(shard);
    orbs.sort_unstable();
    shards.sort_unstable();
    assert_eq!(orbs, expected_orbs);
    assert_eq!(shards, expected_shards);
    for bullet in kernel.children(root) {
        let id = kernel.bullet_render_id(bullet).unwrap();
        assert!(kernel.bullets().members(id).contains(&bullet));
    }
}

#[test]
fn test_laser_buffer_links_chain() {
    let kernel = kernel(64, 256);
    let beam = kernel.catalog().id_of(RenderKind::Laser, "beam").unwrap();
    let laser = kernel.allocate_one();
    kernel.set_local_transform(laser, Transform2D::from_translation(100.0, 0.0));
    for slot in 0..3 {
        let segment = kernel.allocate_one();
        kernel.set_child(laser, slot, segment);
        #[allow(clippy::cast_precision_loss)]
        kernel.set_local_transform(segment, Transform2D::from_translation(0.0, 10.0 * slot as f32));
        kernel.set_laser_render_id(segment, Some(beam));
    }

    kernel.step_frame(0.0);
    let records: Vec<Vec<f32>> = kernel
        .lasers()
        .with_buffer(beam, |b| (0..b.live_count()).map(|i| b.record(i).to_vec()).collect())
        .unwrap();
    assert_eq!(records.len(), 3);
    assert_eq!(&records[0][..8], &[100.0, 0.0, 100.0, 10.0, 6.0, 0.0, 1.0, 7.0]);
    assert_eq!(&records[1][..8], &[100.0, 10.0, 100.0, 20.0, 6.0, 0.5, 2.0, 7.0]);
    assert_eq!(&records[2][..8], &[100.0, 20.0, 100.0, 20.0, 6.0, 1.0, 3.0, 7.0]);
}

#[test]
fn test_custom_fields_default_to_zero() {
    let kernel = kernel(16, 256);
    let shard = kernel.catalog().id_of(RenderKind::Bullet, "shard").unwrap();
    let a = kernel.allocate_one();
    let b = kernel.allocate_one();
    kernel.set_bullet_render_id(a, Some(shard));
    kernel.set_bullet_render_id(b, Some(shard));
    kernel.set_custom(b, [1.0, 2.0, 3.0, 4.0]);

    kernel.populate_buffers();
    kernel.bullets().with_buffer(shard, |buffer| {
        assert_eq!(buffer.stride(), 12);
        assert_eq!(&buffer.record(0)[8..], &[0.0; 4]);
        assert_eq!(&buffer.record(1)[8..], &[1.0, 2.0, 3.0, 4.0]);
    });
}
