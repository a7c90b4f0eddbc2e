use super::*;
use puppet_native::stub::{Call, StubEngine};

fn mesh_with_tris(n: usize) -> MeshData {
    let positions = vec![
        Vec3::ZERO,
        Vec3::new(1.0, 0.0, 0.0),
        Vec3::new(0.0, 0.0, 1.0),
    ];
    let mut indices = Vec::with_capacity(n * 3);
    for _ in 0..n {
        indices.extend_from_slice(&[0, 1, 2]);
    }
    MeshData { positions, indices }
}

fn desc(id: ColliderId, tag: ColliderTag, shape: ColliderShape) -> ColliderDesc {
    ColliderDesc {
        id,
        tag,
        enabled: true,
        active: true,
        character_collidable: true,
        trigger: matches!(
            tag,
            ColliderTag::Water | ColliderTag::Interactable(_)
        ),
        pose: Pose::default(),
        scale: Vec3::new(1.0, 1.0, 1.0),
        shape,
        terrain: TerrainClass::Default,
        owner_node: None,
    }
}

#[test]
fn budget_accepts_ascending_until_exceeded() {
    let mut eng = StubEngine::new();
    let mut reg = SurfaceRegistry::new(5100, 0.0);
    // Deliberately inserted out of size order.
    reg.upsert(
        &mut eng,
        desc(3, ColliderTag::Static, ColliderShape::Mesh(Some(mesh_with_tris(200_000)))),
        0.0,
    );
    reg.upsert(
        &mut eng,
        desc(1, ColliderTag::Static, ColliderShape::Mesh(Some(mesh_with_tris(100)))),
        0.0,
    );
    reg.upsert(
        &mut eng,
        desc(2, ColliderTag::Static, ColliderShape::Mesh(Some(mesh_with_tris(5000)))),
        0.0,
    );
    let report = reg.rebuild_static(&mut eng, 1.0);
    assert_eq!(report.accepted, vec![1, 2]);
    assert_eq!(report.rejected, vec![3]);
    assert_eq!(report.triangles, 5100);
    assert_eq!(eng.static_tri_count(), 5100);
}

#[test]
fn classification_is_disjoint_for_all_flag_combinations() {
    let tags = [
        ColliderTag::Untagged,
        ColliderTag::Static,
        ColliderTag::Dynamic,
        ColliderTag::Water,
        ColliderTag::Ignored,
        ColliderTag::Interactable(InteractableKind::Heal),
        ColliderTag::Interactable(InteractableKind::Star),
        ColliderTag::Interactable(InteractableKind::Damage),
        ColliderTag::Interactable(InteractableKind::Cap(CapKind::Wing)),
    ];
    let mut eng = StubEngine::new();
    for tag in tags {
        for bits in 0u8..16 {
            let mut d = desc(42, tag, ColliderShape::Box {
                half: Vec3::new(1.0, 1.0, 1.0),
            });
            d.enabled = bits & 1 != 0;
            d.active = bits & 2 != 0;
            d.character_collidable = bits & 4 != 0;
            d.trigger = bits & 8 != 0;

            let mut reg = SurfaceRegistry::new(1000, 0.0);
            reg.upsert(&mut eng, d, 0.0);
            let live = reg.static_count()
                + reg.dynamic_count()
                + reg.interactable_count()
                + reg.water_count();
            assert!(live <= 1, "tag {tag:?} bits {bits:#06b} landed in {live} sets");
        }
    }
}

#[test]
fn reclassification_moves_between_sets() {
    let mut eng = StubEngine::new();
    let mut reg = SurfaceRegistry::new(1000, 0.0);
    let shape = ColliderShape::Box {
        half: Vec3::new(1.0, 1.0, 1.0),
    };
    reg.upsert(&mut eng, desc(7, ColliderTag::Static, shape.clone()), 0.0);
    assert_eq!((reg.static_count(), reg.dynamic_count()), (1, 0));

    // Tag changed to dynamic: must leave the static set and gain an object.
    reg.upsert(&mut eng, desc(7, ColliderTag::Dynamic, shape.clone()), 0.0);
    assert_eq!((reg.static_count(), reg.dynamic_count()), (0, 1));
    assert_eq!(eng.object_count(), 1);

    // Disabled entirely: object deleted, all sets empty.
    let mut off = desc(7, ColliderTag::Dynamic, shape);
    off.enabled = false;
    reg.upsert(&mut eng, off, 0.0);
    assert_eq!(reg.dynamic_count(), 0);
    assert_eq!(eng.object_count(), 0);
}

#[test]
fn debounce_collapses_repeated_dirt() {
    let mut eng = StubEngine::new();
    let mut reg = SurfaceRegistry::new(1000, 250.0);
    reg.mark_dirty(0.0);
    reg.mark_dirty(100.0);
    reg.mark_dirty(200.0);
    // Deadline is replaced, not stacked: due at 450, not 250.
    assert!(!reg.rebuild_pending(300.0));
    assert!(reg.rebuild_pending(450.0));
    reg.rebuild_static(&mut eng, 1.0);
    assert!(!reg.rebuild_pending(10_000.0));
    let uploads = eng
        .calls()
        .iter()
        .filter(|c| matches!(c, Call::LoadStatic { .. }))
        .count();
    assert_eq!(uploads, 1);
}

#[test]
fn unreadable_mesh_excluded_and_reported() {
    let mut eng = StubEngine::new();
    let mut reg = SurfaceRegistry::new(1000, 0.0);
    reg.upsert(&mut eng, desc(1, ColliderTag::Static, ColliderShape::Mesh(None)), 0.0);
    reg.upsert(
        &mut eng,
        desc(2, ColliderTag::Static, ColliderShape::Mesh(Some(mesh_with_tris(4)))),
        0.0,
    );
    let report = reg.rebuild_static(&mut eng, 1.0);
    assert_eq!(report.unreadable, vec![1]);
    assert_eq!(report.accepted, vec![2]);
    assert_eq!(report.triangles, 4);
}

#[test]
fn dynamic_moves_only_beyond_epsilon() {
    let mut eng = StubEngine::new();
    let mut reg = SurfaceRegistry::new(1000, 0.0);
    reg.upsert(
        &mut eng,
        desc(9, ColliderTag::Dynamic, ColliderShape::Box {
            half: Vec3::new(1.0, 1.0, 1.0),
        }),
        0.0,
    );
    eng.take_calls();

    // Sub-epsilon jitter: no move.
    reg.update_pose(9, Pose::new(Vec3::new(MOVE_EPSILON * 0.5, 0.0, 0.0), 0.0));
    reg.advance_dynamics(&mut eng);
    assert!(eng.calls().is_empty());

    // Real motion: exactly one move, and none on the repeat tick.
    reg.update_pose(9, Pose::new(Vec3::new(2.0, 0.0, 0.0), 0.0));
    reg.advance_dynamics(&mut eng);
    reg.advance_dynamics(&mut eng);
    let moves = eng
        .calls()
        .iter()
        .filter(|c| matches!(c, Call::MoveObject(_)))
        .count();
    assert_eq!(moves, 1);
}

#[test]
fn water_volume_lookup() {
    let mut eng = StubEngine::new();
    let mut reg = SurfaceRegistry::new(1000, 0.0);
    let mut d = desc(5, ColliderTag::Water, ColliderShape::Box {
        half: Vec3::new(2.0, 1.0, 2.0),
    });
    d.pose.pos = Vec3::new(10.0, 0.0, 0.0);
    reg.upsert(&mut eng, d, 0.0);
    assert!(reg.water_volume_at(Vec3::new(10.0, 0.5, 1.0)).is_some());
    assert!(reg.water_volume_at(Vec3::new(0.0, 0.0, 0.0)).is_none());
}

#[test]
fn disarm_is_sticky() {
    let mut eng = StubEngine::new();
    let mut reg = SurfaceRegistry::new(1000, 0.0);
    reg.upsert(
        &mut eng,
        desc(
            4,
            ColliderTag::Interactable(InteractableKind::Heal),
            ColliderShape::Sphere { radius: 1.0 },
        ),
        0.0,
    );
    assert!(reg.interactables().all(|(_, e)| e.armed));
    reg.disarm(4);
    assert!(reg.interactables().all(|(_, e)| !e.armed));
}

#[test]
fn dispose_deletes_native_objects() {
    let mut eng = StubEngine::new();
    let mut reg = SurfaceRegistry::new(1000, 0.0);
    for id in 0..3 {
        reg.upsert(
            &mut eng,
            desc(id, ColliderTag::Dynamic, ColliderShape::Box {
                half: Vec3::new(1.0, 1.0, 1.0),
            }),
            0.0,
        );
    }
    assert_eq!(eng.object_count(), 3);
    reg.dispose(&mut eng);
    assert_eq!(eng.object_count(), 0);
    assert_eq!(reg.dynamic_count(), 0);
}
