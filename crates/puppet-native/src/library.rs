//! Runtime binding of the real shared library.
//!
//! Every symbol is resolved once at load; any missing symbol fails the whole
//! load. The `unsafe` in this crate lives here and nowhere else.

use std::path::Path;

use libloading::Library;
use log::info;
use puppet_geom::{Pose, Vec3};

use crate::{
    ActorGeometry, ActorHandle, ActorState, CharEngine, EngineError, FloorHit, ObjectId, SeqId,
    SoundId, SurfaceTri, TerrainClass, TickInput,
};

#[repr(C)]
struct RawInput {
    cam_look: [f32; 3],
    stick_x: f32,
    stick_y: f32,
    button_a: u8,
    button_b: u8,
    button_z: u8,
}

#[repr(C)]
struct RawState {
    pos: [f32; 3],
    vel: [f32; 3],
    face_angle: f32,
    health: f32,
    action: u32,
    flags: u32,
}

#[repr(C)]
struct RawSurface {
    vertices: [[f32; 3]; 3],
    terrain: i16,
}

#[repr(C)]
struct RawTransform {
    position: [f32; 3],
    yaw_deg: f32,
}

type InitFn = unsafe extern "C" fn(*const u8, usize) -> i32;
type TerminateFn = unsafe extern "C" fn();
type ActorCreateFn = unsafe extern "C" fn(f32, f32, f32) -> i32;
type ActorDeleteFn = unsafe extern "C" fn(i32);
type ActorTickFn = unsafe extern "C" fn(
    i32,
    *const RawInput,
    *mut RawState,
    *mut f32,
    *mut f32,
    *mut f32,
    *mut f32,
    *mut u32,
);
type StaticLoadFn = unsafe extern "C" fn(*const RawSurface, u32);
type ObjectCreateFn = unsafe extern "C" fn(*const RawSurface, u32, *const RawTransform) -> u32;
type ObjectMoveFn = unsafe extern "C" fn(u32, *const RawTransform);
type ObjectDeleteFn = unsafe extern "C" fn(u32);
type SetScalarFn = unsafe extern "C" fn(i32, f32);
type SetFlagsFn = unsafe extern "C" fn(i32, u32);
type SetVecFn = unsafe extern "C" fn(i32, f32, f32, f32);
type FindFloorFn = unsafe extern "C" fn(f32, f32, f32, *mut f32, *mut i16) -> i32;
type AudioTickFn = unsafe extern "C" fn(u32, *mut i16) -> u32;
type PlaySoundFn = unsafe extern "C" fn(u32, f32, f32, f32);
type PlayMusicFn = unsafe extern "C" fn(u32);
type StopMusicFn = unsafe extern "C" fn();

struct Api {
    terminate: TerminateFn,
    actor_create: ActorCreateFn,
    actor_delete: ActorDeleteFn,
    actor_tick: ActorTickFn,
    static_load: StaticLoadFn,
    object_create: ObjectCreateFn,
    object_move: ObjectMoveFn,
    object_delete: ObjectDeleteFn,
    set_water: SetScalarFn,
    set_gas: SetScalarFn,
    set_action: SetFlagsFn,
    set_state: SetFlagsFn,
    set_health: SetScalarFn,
    set_velocity: SetVecFn,
    set_position: SetVecFn,
    set_face_angle: SetScalarFn,
    find_floor: FindFloorFn,
    audio_tick: AudioTickFn,
    play_sound: PlaySoundFn,
    play_music: PlayMusicFn,
    stop_music: StopMusicFn,
}

fn sym<T: Copy>(lib: &Library, name: &'static str) -> Result<T, EngineError> {
    // Copy the fn pointer out of the Symbol; the Library is kept alive by
    // LibraryEngine for as long as any pointer can be called.
    unsafe {
        lib.get::<T>(name.as_bytes())
            .map(|s| *s)
            .map_err(|_| EngineError::MissingSymbol {
                name: name.to_string(),
            })
    }
}

/// The real engine, bound from a shared library plus its game-data asset.
pub struct LibraryEngine {
    api: Api,
    // Must outlive every fn pointer in `api`.
    _lib: Library,
    scratch_tris: Vec<RawSurface>,
}

impl LibraryEngine {
    /// Load the shared library at `lib_path`, resolve the full symbol table,
    /// and initialize it with the data asset at `data_path`. Any failure
    /// leaves nothing initialized.
    pub fn load(lib_path: &Path, data_path: &Path) -> Result<Self, EngineError> {
        let data = std::fs::read(data_path).map_err(|_| EngineError::AssetMissing {
            path: data_path.display().to_string(),
        })?;
        let lib = unsafe {
            Library::new(lib_path).map_err(|e| EngineError::LibraryUnavailable {
                path: lib_path.display().to_string(),
                detail: e.to_string(),
            })?
        };

        let init: InitFn = sym(&lib, "csim_init")?;
        let api = Api {
            terminate: sym(&lib, "csim_terminate")?,
            actor_create: sym(&lib, "csim_actor_create")?,
            actor_delete: sym(&lib, "csim_actor_delete")?,
            actor_tick: sym(&lib, "csim_actor_tick")?,
            static_load: sym(&lib, "csim_static_surfaces_load")?,
            object_create: sym(&lib, "csim_surface_object_create")?,
            object_move: sym(&lib, "csim_surface_object_move")?,
            object_delete: sym(&lib, "csim_surface_object_delete")?,
            set_water: sym(&lib, "csim_set_water_level")?,
            set_gas: sym(&lib, "csim_set_gas_level")?,
            set_action: sym(&lib, "csim_set_action")?,
            set_state: sym(&lib, "csim_set_state")?,
            set_health: sym(&lib, "csim_set_health")?,
            set_velocity: sym(&lib, "csim_set_velocity")?,
            set_position: sym(&lib, "csim_set_position")?,
            set_face_angle: sym(&lib, "csim_set_face_angle")?,
            find_floor: sym(&lib, "csim_find_floor")?,
            audio_tick: sym(&lib, "csim_audio_tick")?,
            play_sound: sym(&lib, "csim_play_sound")?,
            play_music: sym(&lib, "csim_play_music")?,
            stop_music: sym(&lib, "csim_stop_music")?,
        };

        let code = unsafe { init(data.as_ptr(), data.len()) };
        if code != 0 {
            return Err(EngineError::InitRejected { code });
        }
        info!(
            "native engine loaded from {} ({} byte asset)",
            lib_path.display(),
            data.len()
        );
        Ok(Self {
            api,
            _lib: lib,
            scratch_tris: Vec::new(),
        })
    }

    fn marshal_tris(&mut self, tris: &[SurfaceTri]) {
        self.scratch_tris.clear();
        self.scratch_tris.reserve(tris.len());
        for t in tris {
            self.scratch_tris.push(RawSurface {
                vertices: [
                    [t.v[0].x, t.v[0].y, t.v[0].z],
                    [t.v[1].x, t.v[1].y, t.v[1].z],
                    [t.v[2].x, t.v[2].y, t.v[2].z],
                ],
                terrain: t.terrain.to_raw(),
            });
        }
    }
}

impl Drop for LibraryEngine {
    fn drop(&mut self) {
        unsafe { (self.api.terminate)() };
    }
}

fn raw_transform(pose: &Pose) -> RawTransform {
    RawTransform {
        position: [pose.pos.x, pose.pos.y, pose.pos.z],
        yaw_deg: pose.yaw_deg,
    }
}

impl CharEngine for LibraryEngine {
    fn create_actor(&mut self, pos: Vec3) -> ActorHandle {
        ActorHandle(unsafe { (self.api.actor_create)(pos.x, pos.y, pos.z) })
    }

    fn delete_actor(&mut self, handle: ActorHandle) {
        unsafe { (self.api.actor_delete)(handle.0) };
    }

    fn tick(
        &mut self,
        handle: ActorHandle,
        input: &TickInput,
        state: &mut ActorState,
        geo: &mut ActorGeometry,
    ) {
        let raw_in = RawInput {
            cam_look: [input.cam_look.x, input.cam_look.y, input.cam_look.z],
            stick_x: input.joy_x,
            stick_y: input.joy_y,
            button_a: input.jump as u8,
            button_b: input.kick as u8,
            button_z: input.crouch as u8,
        };
        let mut raw_state = RawState {
            pos: [0.0; 3],
            vel: [0.0; 3],
            face_angle: 0.0,
            health: 0.0,
            action: 0,
            flags: 0,
        };
        let mut tri_count: u32 = 0;
        unsafe {
            (self.api.actor_tick)(
                handle.0,
                &raw_in,
                &mut raw_state,
                geo.positions.as_mut_ptr(),
                geo.normals.as_mut_ptr(),
                geo.colors.as_mut_ptr(),
                geo.uvs.as_mut_ptr(),
                &mut tri_count,
            );
        }
        state.pos = Vec3::new(raw_state.pos[0], raw_state.pos[1], raw_state.pos[2]);
        state.vel = Vec3::new(raw_state.vel[0], raw_state.vel[1], raw_state.vel[2]);
        state.face_angle_deg = raw_state.face_angle;
        state.health = raw_state.health;
        state.action_flags = raw_state.action;
        state.state_flags = raw_state.flags;
        geo.tri_count = (tri_count as usize).min(crate::ACTOR_GEO_MAX_TRIANGLES);
    }

    fn load_static_surfaces(&mut self, tris: &[SurfaceTri]) {
        self.marshal_tris(tris);
        unsafe {
            (self.api.static_load)(self.scratch_tris.as_ptr(), self.scratch_tris.len() as u32)
        };
    }

    fn create_surface_object(&mut self, pose: &Pose, tris: &[SurfaceTri]) -> ObjectId {
        self.marshal_tris(tris);
        let t = raw_transform(pose);
        unsafe {
            (self.api.object_create)(self.scratch_tris.as_ptr(), self.scratch_tris.len() as u32, &t)
        }
    }

    fn move_surface_object(&mut self, id: ObjectId, pose: &Pose) {
        let t = raw_transform(pose);
        unsafe { (self.api.object_move)(id, &t) };
    }

    fn delete_surface_object(&mut self, id: ObjectId) {
        unsafe { (self.api.object_delete)(id) };
    }

    fn set_water_level(&mut self, handle: ActorHandle, level: f32) {
        unsafe { (self.api.set_water)(handle.0, level) };
    }

    fn set_gas_level(&mut self, handle: ActorHandle, level: f32) {
        unsafe { (self.api.set_gas)(handle.0, level) };
    }

    fn find_floor(&mut self, pos: Vec3) -> Option<FloorHit> {
        let mut height = 0.0f32;
        let mut terrain = 0i16;
        let found =
            unsafe { (self.api.find_floor)(pos.x, pos.y, pos.z, &mut height, &mut terrain) };
        (found != 0).then(|| FloorHit {
            height,
            terrain: TerrainClass::from_raw(terrain),
        })
    }

    fn set_action(&mut self, handle: ActorHandle, flags: u32) {
        unsafe { (self.api.set_action)(handle.0, flags) };
    }

    fn set_state(&mut self, handle: ActorHandle, flags: u32) {
        unsafe { (self.api.set_state)(handle.0, flags) };
    }

    fn set_health(&mut self, handle: ActorHandle, health: f32) {
        unsafe { (self.api.set_health)(handle.0, health) };
    }

    fn set_velocity(&mut self, handle: ActorHandle, vel: Vec3) {
        unsafe { (self.api.set_velocity)(handle.0, vel.x, vel.y, vel.z) };
    }

    fn set_position(&mut self, handle: ActorHandle, pos: Vec3) {
        unsafe { (self.api.set_position)(handle.0, pos.x, pos.y, pos.z) };
    }

    fn set_face_angle(&mut self, handle: ActorHandle, deg: f32) {
        unsafe { (self.api.set_face_angle)(handle.0, deg) };
    }

    fn audio_tick(&mut self, desired_frames: usize, out: &mut [i16]) -> usize {
        let frames = desired_frames.min(out.len());
        let written = unsafe { (self.api.audio_tick)(frames as u32, out.as_mut_ptr()) };
        (written as usize).min(frames)
    }

    fn play_sound(&mut self, sound: SoundId, pos: Vec3) {
        unsafe { (self.api.play_sound)(sound, pos.x, pos.y, pos.z) };
    }

    fn play_music(&mut self, seq: SeqId) {
        unsafe { (self.api.play_music)(seq) };
    }

    fn stop_music(&mut self) {
        unsafe { (self.api.stop_music)() };
    }
}
