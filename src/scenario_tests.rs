//! End-to-end scenarios over a full [`Context`] with the stub engine and the
//! in-memory channel bus. Shared handles let tests inspect the engine call
//! log from outside the context and let two contexts replicate over one bus.

use std::cell::RefCell;
use std::rc::Rc;

use puppet_geom::{Pose, Vec3};
use puppet_native::stub::{Call, StubEngine};
use puppet_native::{
    ActorGeometry, ActorHandle, ActorState, CharEngine, FloorHit, ObjectId, SeqId, SoundId,
    SurfaceTri, TerrainClass, TickInput,
};
use puppet_net::{ChannelBus, LocalBus, NetError, NetValue, PeerId};
use puppet_surfaces::{ColliderDesc, ColliderShape, ColliderTag};

use crate::actor::SND_DEATH_LAUGH;
use crate::config::Config;
use crate::context::{Context, FrameInput};
use crate::input::InputFrame;

#[derive(Clone)]
struct SharedStub(Rc<RefCell<StubEngine>>);

impl SharedStub {
    fn new() -> Self {
        SharedStub(Rc::new(RefCell::new(StubEngine::new())))
    }

    fn inner(&self) -> std::cell::RefMut<'_, StubEngine> {
        self.0.borrow_mut()
    }

    fn calls(&self) -> Vec<Call> {
        self.0.borrow().calls().to_vec()
    }
}

impl CharEngine for SharedStub {
    fn create_actor(&mut self, pos: Vec3) -> ActorHandle {
        self.0.borrow_mut().create_actor(pos)
    }
    fn delete_actor(&mut self, handle: ActorHandle) {
        self.0.borrow_mut().delete_actor(handle)
    }
    fn tick(
        &mut self,
        handle: ActorHandle,
        input: &TickInput,
        state: &mut ActorState,
        geo: &mut ActorGeometry,
    ) {
        self.0.borrow_mut().tick(handle, input, state, geo)
    }
    fn load_static_surfaces(&mut self, tris: &[SurfaceTri]) {
        self.0.borrow_mut().load_static_surfaces(tris)
    }
    fn create_surface_object(&mut self, pose: &Pose, tris: &[SurfaceTri]) -> ObjectId {
        self.0.borrow_mut().create_surface_object(pose, tris)
    }
    fn move_surface_object(&mut self, id: ObjectId, pose: &Pose) {
        self.0.borrow_mut().move_surface_object(id, pose)
    }
    fn delete_surface_object(&mut self, id: ObjectId) {
        self.0.borrow_mut().delete_surface_object(id)
    }
    fn set_water_level(&mut self, handle: ActorHandle, level: f32) {
        self.0.borrow_mut().set_water_level(handle, level)
    }
    fn set_gas_level(&mut self, handle: ActorHandle, level: f32) {
        self.0.borrow_mut().set_gas_level(handle, level)
    }
    fn find_floor(&mut self, pos: Vec3) -> Option<FloorHit> {
        self.0.borrow_mut().find_floor(pos)
    }
    fn set_action(&mut self, handle: ActorHandle, flags: u32) {
        self.0.borrow_mut().set_action(handle, flags)
    }
    fn set_state(&mut self, handle: ActorHandle, flags: u32) {
        self.0.borrow_mut().set_state(handle, flags)
    }
    fn set_health(&mut self, handle: ActorHandle, health: f32) {
        self.0.borrow_mut().set_health(handle, health)
    }
    fn set_velocity(&mut self, handle: ActorHandle, vel: Vec3) {
        self.0.borrow_mut().set_velocity(handle, vel)
    }
    fn set_position(&mut self, handle: ActorHandle, pos: Vec3) {
        self.0.borrow_mut().set_position(handle, pos)
    }
    fn set_face_angle(&mut self, handle: ActorHandle, deg: f32) {
        self.0.borrow_mut().set_face_angle(handle, deg)
    }
    fn audio_tick(&mut self, desired_frames: usize, out: &mut [i16]) -> usize {
        self.0.borrow_mut().audio_tick(desired_frames, out)
    }
    fn play_sound(&mut self, sound: SoundId, pos: Vec3) {
        self.0.borrow_mut().play_sound(sound, pos)
    }
    fn play_music(&mut self, seq: SeqId) {
        self.0.borrow_mut().play_music(seq)
    }
    fn stop_music(&mut self) {
        self.0.borrow_mut().stop_music()
    }
}

#[derive(Clone, Default)]
struct SharedBus(Rc<RefCell<LocalBus>>);

impl ChannelBus for SharedBus {
    fn define(&mut self, name: &str, owner: PeerId, default: NetValue) {
        self.0.borrow_mut().define(name, owner, default)
    }
    fn read(&self, name: &str) -> Option<NetValue> {
        self.0.borrow().read(name)
    }
    fn write(&mut self, name: &str, writer: PeerId, value: NetValue) -> Result<(), NetError> {
        self.0.borrow_mut().write(name, writer, value)
    }
}

fn context_with(engine: SharedStub, bus: SharedBus, local_peer: PeerId) -> Context {
    Context::new(
        Config::default(),
        1,
        local_peer,
        Box::new(engine),
        Box::new(bus),
    )
}

fn frame(now_ms: f64) -> FrameInput {
    FrameInput {
        now_ms,
        cam_look: Vec3::new(0.0, 0.0, 1.0),
        ..Default::default()
    }
}

fn forward_frame(now_ms: f64) -> FrameInput {
    FrameInput {
        desktop: Some(InputFrame {
            joy_y: 1.0,
            ..Default::default()
        }),
        ..frame(now_ms)
    }
}

fn static_box(id: u64) -> ColliderDesc {
    ColliderDesc {
        id,
        tag: ColliderTag::Static,
        enabled: true,
        active: true,
        character_collidable: true,
        trigger: false,
        pose: Pose::new(Vec3::ZERO, 0.0),
        scale: Vec3::new(1.0, 1.0, 1.0),
        shape: ColliderShape::Box {
            half: Vec3::new(1.0, 1.0, 1.0),
        },
        terrain: TerrainClass::Default,
        owner_node: None,
    }
}

fn trigger_sphere(id: u64, tag: ColliderTag, owner_node: Option<u64>) -> ColliderDesc {
    ColliderDesc {
        tag,
        trigger: true,
        character_collidable: false,
        shape: ColliderShape::Sphere { radius: 1.0 },
        owner_node,
        ..static_box(id)
    }
}

#[test]
fn two_peer_replication_converges() {
    let bus = SharedBus::default();
    let mut owner = context_with(SharedStub::new(), bus.clone(), 0);
    let mut observer = context_with(SharedStub::new(), bus.clone(), 1);

    // The same scene node exists on both peers; peer 0 owns it.
    owner.spawn_actor(7, 0, Vec3::ZERO).unwrap();
    observer.spawn_actor(7, 0, Vec3::ZERO).unwrap();

    for i in 0..10 {
        let now = i as f64 * 33.0;
        owner.on_frame(&forward_frame(now));
        // Observer input is irrelevant for a remote actor.
        observer.on_frame(&frame(now));
    }

    let a = owner.actor(7).unwrap().current().pos;
    let b = observer.actor(7).unwrap().current().pos;
    assert!(a.z > 1.0, "owner actor should have walked forward, z = {}", a.z);
    assert!(
        a.distance(b) < 0.5,
        "replicated trajectory diverged: {a:?} vs {b:?}"
    );
}

#[test]
fn collider_churn_collapses_to_one_rebuild() {
    let eng = SharedStub::new();
    let mut c = context_with(eng.clone(), SharedBus::default(), 0);
    c.on_frame(&frame(0.0));
    c.collider_changed(static_box(1));
    c.collider_changed(static_box(2));
    c.collider_changed(static_box(3));
    c.on_frame(&frame(100.0));
    assert_eq!(
        eng.calls().iter().filter(|c| matches!(c, Call::LoadStatic { .. })).count(),
        0,
        "debounce window still open"
    );
    c.on_frame(&frame(300.0));
    let loads: Vec<_> = eng
        .calls()
        .into_iter()
        .filter(|c| matches!(c, Call::LoadStatic { .. }))
        .collect();
    assert_eq!(loads, vec![Call::LoadStatic { tris: 36 }], "three boxes, one upload");
}

#[test]
fn lethal_floor_despawns_after_grace() {
    let eng = SharedStub::new();
    let mut c = context_with(eng.clone(), SharedBus::default(), 0);
    eng.inner().set_floor(Some(FloorHit {
        height: 0.0,
        terrain: TerrainClass::DeathPlane,
    }));
    c.spawn_actor(1, 0, Vec3::ZERO).unwrap();
    c.on_frame(&frame(0.0));
    assert_eq!(c.actor_count(), 1);

    c.on_frame(&frame(1100.0));
    assert!(
        eng.calls().contains(&Call::PlaySound(SND_DEATH_LAUGH)),
        "death jingle fires after its delay"
    );
    c.on_frame(&frame(2900.0));
    assert_eq!(c.actor_count(), 1, "still inside the grace period");

    c.on_frame(&frame(3100.0));
    assert_eq!(c.actor_count(), 0, "despawn after the lethal-floor delay");
    assert!(eng.calls().iter().any(|c| matches!(c, Call::DeleteActor(_))));
}

#[test]
fn damage_then_heal_round_trip() {
    let eng = SharedStub::new();
    let mut c = context_with(eng.clone(), SharedBus::default(), 0);
    c.spawn_actor(1, 0, Vec3::ZERO).unwrap();
    c.on_frame(&frame(0.0));

    // Hazard owned by another node overlaps the actor; one wedge per tick.
    c.collider_changed(trigger_sphere(
        100,
        ColliderTag::Interactable(puppet_surfaces::InteractableKind::Damage),
        Some(999),
    ));
    c.on_frame(&frame(33.0));
    c.on_frame(&frame(66.0));
    let hurt = c.actor(1).unwrap().current().health;
    assert_eq!(hurt, puppet_native::FULL_HEALTH - 2.0);

    c.collider_removed(100);
    c.collider_changed(trigger_sphere(
        101,
        ColliderTag::Interactable(puppet_surfaces::InteractableKind::Heal),
        None,
    ));
    c.on_frame(&frame(99.0));
    assert_eq!(c.actor(1).unwrap().current().health, puppet_native::FULL_HEALTH);

    // The heal is one-shot; a later tick must not re-trigger it.
    c.on_frame(&frame(132.0));
    let heals = eng
        .calls()
        .iter()
        .filter(|c| {
            matches!(c, Call::SetHealth { health, .. } if *health == puppet_native::FULL_HEALTH)
        })
        .count();
    assert_eq!(heals, 1);
}

#[test]
fn own_hazard_does_not_hurt() {
    let eng = SharedStub::new();
    let mut c = context_with(eng.clone(), SharedBus::default(), 0);
    c.spawn_actor(1, 0, Vec3::ZERO).unwrap();
    c.collider_changed(trigger_sphere(
        100,
        ColliderTag::Interactable(puppet_surfaces::InteractableKind::Damage),
        Some(1),
    ));
    c.on_frame(&frame(0.0));
    c.on_frame(&frame(33.0));
    assert_eq!(c.actor(1).unwrap().current().health, puppet_native::FULL_HEALTH);
}

#[test]
fn dynamic_surfaces_move_before_actor_ticks() {
    let eng = SharedStub::new();
    let mut c = context_with(eng.clone(), SharedBus::default(), 0);
    c.spawn_actor(1, 0, Vec3::ZERO).unwrap();
    let mut platform = static_box(50);
    platform.tag = ColliderTag::Dynamic;
    c.collider_changed(platform);
    c.on_frame(&frame(0.0));

    c.collider_moved(50, Pose::new(Vec3::new(0.0, 2.0, 0.0), 0.0));
    c.on_frame(&frame(50.0));

    let calls = eng.calls();
    let move_idx = calls
        .iter()
        .rposition(|c| matches!(c, Call::MoveObject(_)))
        .expect("platform move reached the engine");
    let tick_idx = calls
        .iter()
        .rposition(|c| matches!(c, Call::Tick(_)))
        .expect("actor ticked");
    assert!(
        move_idx < tick_idx,
        "surface object must move before the actor tick that observes it"
    );
}

#[test]
fn audio_reaches_drain() {
    let eng = SharedStub::new();
    let mut c = context_with(eng.clone(), SharedBus::default(), 0);
    eng.inner().set_tone_amp(16384);
    c.on_frame(&frame(0.0));
    c.on_frame(&frame(100.0));
    let mut out = vec![0.0f32; 4096];
    let n = c.drain_audio(&mut out);
    assert!(n > 0, "pump output must be drainable");
    assert!((out[0] - 0.5).abs() < 1e-3, "tone amplitude survives the pipeline");
}

#[test]
fn spawn_quota_of_one_rejects_second_actor() {
    let eng = SharedStub::new();
    let cfg = Config {
        actor_quota_per_owner: 1,
        ..Config::default()
    };
    let mut c = Context::new(cfg, 1, 0, Box::new(eng.clone()), Box::new(SharedBus::default()));
    c.spawn_actor(1, 0, Vec3::ZERO).unwrap();
    assert_eq!(c.actor_count(), 1);
    assert!(matches!(
        c.spawn_actor(2, 0, Vec3::ZERO),
        Err(crate::context::SpawnError::QuotaExceeded { owner: 0, quota: 1 })
    ));
    assert_eq!(c.actor_count(), 1, "rejected spawn leaves the registry unchanged");
    assert_eq!(eng.inner().actor_count(), 1, "no native actor leaked");
}

#[test]
fn water_volume_drives_engine_water_level() {
    let eng = SharedStub::new();
    let mut c = context_with(eng.clone(), SharedBus::default(), 0);
    c.spawn_actor(1, 0, Vec3::ZERO).unwrap();
    let mut pool = static_box(200);
    pool.tag = ColliderTag::Water;
    pool.trigger = true;
    pool.character_collidable = false;
    pool.shape = ColliderShape::Box {
        half: Vec3::new(10.0, 10.0, 10.0),
    };
    c.collider_changed(pool);
    c.on_frame(&frame(0.0));
    let water = eng
        .calls()
        .iter()
        .filter_map(|c| match c {
            Call::SetWater { level, .. } => Some(*level),
            _ => None,
        })
        .next_back();
    // Clamped a little above the actor rather than the volume top.
    assert!(matches!(water, Some(l) if l > 0.0 && l < 1.0), "water = {water:?}");
}

#[test]
fn gas_level_fans_out_to_actors() {
    let eng = SharedStub::new();
    let mut c = context_with(eng.clone(), SharedBus::default(), 0);
    c.spawn_actor(1, 0, Vec3::ZERO).unwrap();
    c.spawn_actor(2, 1, Vec3::ZERO).unwrap();

    c.set_gas_level(3.5);
    let pushes = |eng: &SharedStub| {
        eng.calls()
            .iter()
            .filter(|c| matches!(c, Call::SetGas { level, .. } if *level == 3.5))
            .count()
    };
    assert_eq!(pushes(&eng), 2, "every live actor hears the gas change");

    // Actors spawned afterwards inherit the current level.
    c.spawn_actor(3, 2, Vec3::ZERO).unwrap();
    assert_eq!(pushes(&eng), 3);
}

#[test]
fn deferred_death_actions_skip_removed_actor() {
    let eng = SharedStub::new();
    let mut c = context_with(eng.clone(), SharedBus::default(), 0);
    eng.inner().set_floor(Some(FloorHit {
        height: 0.0,
        terrain: TerrainClass::Quicksand,
    }));
    c.spawn_actor(1, 0, Vec3::ZERO).unwrap();
    // First tick sees the lethal floor and schedules the laugh and the nuke.
    c.on_frame(&frame(0.0));

    c.remove_node(1);
    let deletes = |eng: &SharedStub| {
        eng.calls()
            .iter()
            .filter(|c| matches!(c, Call::DeleteActor(_)))
            .count()
    };
    assert_eq!(deletes(&eng), 1);

    // Both deadlines pass with the actor already gone: no stale jingle, no
    // second delete against a dead handle.
    c.on_frame(&frame(1100.0));
    c.on_frame(&frame(3100.0));
    assert!(!eng.calls().contains(&Call::PlaySound(SND_DEATH_LAUGH)));
    assert_eq!(deletes(&eng), 1);
}
