//! Deterministic in-process stand-in for the native engine.
//!
//! Used by the headless harness and by tests. Integrates simple kinematics
//! from the tick inputs, emits a fixed-size triangle fan, synthesizes a
//! constant-amplitude tone, and records an ordered call log so tests can
//! assert cross-call ordering (e.g. dynamic moves before actor ticks).

use hashbrown::HashMap;
use puppet_geom::{Pose, Vec3};

use crate::{
    ACTOR_GEO_MAX_TRIANGLES, ActorGeometry, ActorHandle, ActorState, CharEngine, FloorHit,
    ObjectId, SeqId, SoundId, SurfaceTri, TickInput,
};

const DT: f32 = 1.0 / 30.0;
const WALK_SPEED: f32 = 8.0;
const JUMP_SPEED: f32 = 10.0;
const GRAVITY: f32 = -25.0;

/// One recorded engine entry-point invocation, in call order.
#[derive(Clone, Debug, PartialEq)]
pub enum Call {
    CreateActor(ActorHandle),
    DeleteActor(ActorHandle),
    Tick(ActorHandle),
    LoadStatic { tris: usize },
    CreateObject(ObjectId),
    MoveObject(ObjectId),
    DeleteObject(ObjectId),
    SetWater { handle: ActorHandle, level: f32 },
    SetGas { handle: ActorHandle, level: f32 },
    SetAction { handle: ActorHandle, flags: u32 },
    SetState { handle: ActorHandle, flags: u32 },
    SetHealth { handle: ActorHandle, health: f32 },
    SetVelocity(ActorHandle),
    SetPosition(ActorHandle),
    SetFaceAngle(ActorHandle),
    AudioTick { frames: usize },
    PlaySound(SoundId),
    PlayMusic(SeqId),
    StopMusic,
}

pub struct StubEngine {
    next_handle: i32,
    next_object: ObjectId,
    actors: HashMap<ActorHandle, ActorState>,
    objects: HashMap<ObjectId, Pose>,
    static_tris: usize,
    floor: Option<FloorHit>,
    geo_tris: usize,
    tone_amp: i16,
    calls: Vec<Call>,
    /// Test hook: make the next create fail with the invalid sentinel.
    pub fail_create: bool,
}

impl StubEngine {
    pub fn new() -> Self {
        Self {
            next_handle: 0,
            next_object: 1,
            actors: HashMap::new(),
            objects: HashMap::new(),
            static_tris: 0,
            floor: Some(FloorHit {
                height: 0.0,
                terrain: crate::TerrainClass::Default,
            }),
            geo_tris: 64,
            tone_amp: 0,
            calls: Vec::new(),
            fail_create: false,
        }
    }

    pub fn set_floor(&mut self, floor: Option<FloorHit>) {
        self.floor = floor;
    }

    /// Triangle count the next ticks will report (to exercise geometry padding).
    pub fn set_geo_tris(&mut self, tris: usize) {
        self.geo_tris = tris.min(ACTOR_GEO_MAX_TRIANGLES);
    }

    /// Amplitude of the synthesized constant tone.
    pub fn set_tone_amp(&mut self, amp: i16) {
        self.tone_amp = amp;
    }

    pub fn calls(&self) -> &[Call] {
        &self.calls
    }

    pub fn take_calls(&mut self) -> Vec<Call> {
        std::mem::take(&mut self.calls)
    }

    pub fn actor_state(&self, handle: ActorHandle) -> Option<&ActorState> {
        self.actors.get(&handle)
    }

    pub fn actor_count(&self) -> usize {
        self.actors.len()
    }

    pub fn object_count(&self) -> usize {
        self.objects.len()
    }

    pub fn static_tri_count(&self) -> usize {
        self.static_tris
    }
}

impl Default for StubEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CharEngine for StubEngine {
    fn create_actor(&mut self, pos: Vec3) -> ActorHandle {
        if self.fail_create {
            self.fail_create = false;
            return ActorHandle::INVALID;
        }
        let handle = ActorHandle(self.next_handle);
        self.next_handle += 1;
        self.actors.insert(
            handle,
            ActorState {
                pos,
                ..ActorState::default()
            },
        );
        self.calls.push(Call::CreateActor(handle));
        handle
    }

    fn delete_actor(&mut self, handle: ActorHandle) {
        self.actors.remove(&handle);
        self.calls.push(Call::DeleteActor(handle));
    }

    fn tick(
        &mut self,
        handle: ActorHandle,
        input: &TickInput,
        state: &mut ActorState,
        geo: &mut ActorGeometry,
    ) {
        self.calls.push(Call::Tick(handle));
        let Some(a) = self.actors.get_mut(&handle) else {
            return;
        };
        // Stick drives horizontal velocity in camera space; jump is an impulse.
        let fwd = input.cam_look.flattened();
        let right = fwd.cross(Vec3::UP);
        let wish = (fwd * input.joy_y + right * input.joy_x) * WALK_SPEED;
        a.vel.x = wish.x;
        a.vel.z = wish.z;
        let floor_h = self.floor.map(|f| f.height).unwrap_or(f32::MIN);
        let grounded = a.pos.y <= floor_h + 1e-4;
        if input.jump && grounded {
            a.vel.y = JUMP_SPEED;
        } else if !grounded {
            a.vel.y += GRAVITY * DT;
        } else {
            a.vel.y = 0.0;
        }
        a.pos += a.vel * DT;
        if a.pos.y < floor_h {
            a.pos.y = floor_h;
            a.vel.y = 0.0;
        }
        if wish.length_sq() > 1e-6 {
            a.face_angle_deg = wish.z.atan2(wish.x).to_degrees();
        }
        *state = *a;

        geo.tri_count = self.geo_tris;
        for i in 0..self.geo_tris * 9 {
            geo.positions[i] = a.pos.x + (i % 9) as f32 * 0.01;
            geo.normals[i] = if i % 3 == 1 { 1.0 } else { 0.0 };
            geo.colors[i] = 0.5;
        }
        for i in 0..self.geo_tris * 6 {
            geo.uvs[i] = (i % 6) as f32 / 6.0;
        }
    }

    fn load_static_surfaces(&mut self, tris: &[SurfaceTri]) {
        self.static_tris = tris.len();
        self.calls.push(Call::LoadStatic { tris: tris.len() });
    }

    fn create_surface_object(&mut self, pose: &Pose, _tris: &[SurfaceTri]) -> ObjectId {
        let id = self.next_object;
        self.next_object += 1;
        self.objects.insert(id, *pose);
        self.calls.push(Call::CreateObject(id));
        id
    }

    fn move_surface_object(&mut self, id: ObjectId, pose: &Pose) {
        self.objects.insert(id, *pose);
        self.calls.push(Call::MoveObject(id));
    }

    fn delete_surface_object(&mut self, id: ObjectId) {
        self.objects.remove(&id);
        self.calls.push(Call::DeleteObject(id));
    }

    fn set_water_level(&mut self, handle: ActorHandle, level: f32) {
        self.calls.push(Call::SetWater { handle, level });
    }

    fn set_gas_level(&mut self, handle: ActorHandle, level: f32) {
        self.calls.push(Call::SetGas { handle, level });
    }

    fn find_floor(&mut self, _pos: Vec3) -> Option<FloorHit> {
        self.floor
    }

    fn set_action(&mut self, handle: ActorHandle, flags: u32) {
        if let Some(a) = self.actors.get_mut(&handle) {
            a.action_flags = flags;
        }
        self.calls.push(Call::SetAction { handle, flags });
    }

    fn set_state(&mut self, handle: ActorHandle, flags: u32) {
        if let Some(a) = self.actors.get_mut(&handle) {
            a.state_flags = flags;
        }
        self.calls.push(Call::SetState { handle, flags });
    }

    fn set_health(&mut self, handle: ActorHandle, health: f32) {
        if let Some(a) = self.actors.get_mut(&handle) {
            a.health = health;
        }
        self.calls.push(Call::SetHealth { handle, health });
    }

    fn set_velocity(&mut self, handle: ActorHandle, vel: Vec3) {
        if let Some(a) = self.actors.get_mut(&handle) {
            a.vel = vel;
        }
        self.calls.push(Call::SetVelocity(handle));
    }

    fn set_position(&mut self, handle: ActorHandle, pos: Vec3) {
        if let Some(a) = self.actors.get_mut(&handle) {
            a.pos = pos;
        }
        self.calls.push(Call::SetPosition(handle));
    }

    fn set_face_angle(&mut self, handle: ActorHandle, deg: f32) {
        if let Some(a) = self.actors.get_mut(&handle) {
            a.face_angle_deg = deg;
        }
        self.calls.push(Call::SetFaceAngle(handle));
    }

    fn audio_tick(&mut self, desired_frames: usize, out: &mut [i16]) -> usize {
        let frames = desired_frames.min(out.len());
        out[..frames].fill(self.tone_amp);
        self.calls.push(Call::AudioTick { frames });
        frames
    }

    fn play_sound(&mut self, sound: SoundId, _pos: Vec3) {
        self.calls.push(Call::PlaySound(sound));
    }

    fn play_music(&mut self, seq: SeqId) {
        self.calls.push(Call::PlayMusic(seq));
    }

    fn stop_music(&mut self) {
        self.calls.push(Call::StopMusic);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_tick_delete() {
        let mut eng = StubEngine::new();
        let h = eng.create_actor(Vec3::new(0.0, 0.0, 0.0));
        assert!(h.is_valid());
        let mut state = ActorState::default();
        let mut geo = ActorGeometry::new();
        let input = TickInput {
            cam_look: Vec3::new(0.0, 0.0, 1.0),
            joy_y: 1.0,
            ..TickInput::default()
        };
        eng.tick(h, &input, &mut state, &mut geo);
        assert!(state.pos.length() > 0.0, "stick input should move the actor");
        assert_eq!(geo.tri_count, 64);
        eng.delete_actor(h);
        assert_eq!(eng.actor_count(), 0);
    }

    #[test]
    fn failed_create_returns_sentinel() {
        let mut eng = StubEngine::new();
        eng.fail_create = true;
        assert_eq!(eng.create_actor(Vec3::ZERO), ActorHandle::INVALID);
        assert_eq!(eng.actor_count(), 0);
    }

    #[test]
    fn audio_tick_constant_tone() {
        let mut eng = StubEngine::new();
        eng.set_tone_amp(1000);
        let mut buf = vec![0i16; 512];
        let n = eng.audio_tick(256, &mut buf);
        assert_eq!(n, 256);
        assert!(buf[..256].iter().all(|&s| s == 1000));
        assert!(buf[256..].iter().all(|&s| s == 0));
    }
}
