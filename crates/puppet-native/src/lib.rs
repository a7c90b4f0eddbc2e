//! Binding layer for the opaque native character-simulation engine.
//!
//! The engine is consumed strictly through the [`CharEngine`] trait: create
//! and delete actors, advance one fixed-timestep tick per actor, upload
//! collision surfaces, set environmental parameters, and pull synthesized
//! audio. All buffers handed across the boundary are caller-owned scratch
//! memory; the engine never retains pointers past a call.

mod library;
pub mod stub;

use std::error::Error;
use std::fmt;

use puppet_geom::{Pose, Vec3};

pub use library::LibraryEngine;

/// Fixed number of triangles the engine may write per actor per tick.
pub const ACTOR_GEO_MAX_TRIANGLES: usize = 1024;

/// Sample rate of the engine's synthesized mono PCM.
pub const NATIVE_SAMPLE_RATE: u32 = 32_000;

/// Full health for a freshly spawned actor (eight display wedges).
pub const FULL_HEALTH: f32 = 8.0;

pub type ObjectId = u32;
pub type SoundId = u32;
pub type SeqId = u32;

/// Opaque per-actor handle issued by the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ActorHandle(pub i32);

impl ActorHandle {
    pub const INVALID: ActorHandle = ActorHandle(-1);

    #[inline]
    pub fn is_valid(self) -> bool {
        self.0 >= 0
    }
}

/// Terrain classification returned by floor queries and carried on surfaces.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TerrainClass {
    #[default]
    Default,
    Slippery,
    Quicksand,
    DeathPlane,
}

impl TerrainClass {
    /// Standing on this terrain kills the actor.
    #[inline]
    pub fn is_lethal(self) -> bool {
        matches!(self, TerrainClass::Quicksand | TerrainClass::DeathPlane)
    }

    pub(crate) fn from_raw(raw: i16) -> TerrainClass {
        match raw {
            1 => TerrainClass::Slippery,
            2 => TerrainClass::Quicksand,
            3 => TerrainClass::DeathPlane,
            _ => TerrainClass::Default,
        }
    }

    pub(crate) fn to_raw(self) -> i16 {
        match self {
            TerrainClass::Default => 0,
            TerrainClass::Slippery => 1,
            TerrainClass::Quicksand => 2,
            TerrainClass::DeathPlane => 3,
        }
    }
}

/// One collision triangle in engine space.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SurfaceTri {
    pub v: [Vec3; 3],
    pub terrain: TerrainClass,
}

impl SurfaceTri {
    #[inline]
    pub const fn new(a: Vec3, b: Vec3, c: Vec3, terrain: TerrainClass) -> Self {
        Self {
            v: [a, b, c],
            terrain,
        }
    }
}

/// Per-tick inputs for one actor.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TickInput {
    /// Camera look direction, flattened to the horizontal plane and normalized.
    pub cam_look: Vec3,
    pub joy_x: f32,
    pub joy_y: f32,
    pub jump: bool,
    pub kick: bool,
    pub crouch: bool,
}

/// Actor state snapshot written by the engine each tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ActorState {
    pub pos: Vec3,
    pub vel: Vec3,
    pub face_angle_deg: f32,
    pub health: f32,
    pub action_flags: u32,
    pub state_flags: u32,
}

impl Default for ActorState {
    fn default() -> Self {
        Self {
            pos: Vec3::ZERO,
            vel: Vec3::ZERO,
            face_angle_deg: 0.0,
            health: FULL_HEALTH,
            action_flags: 0,
            state_flags: 0,
        }
    }
}

/// State-flag bits the engine exposes. Cap bits are the subset a grant can set.
pub mod state_flags {
    pub const WING_CAP: u32 = 1 << 1;
    pub const METAL_CAP: u32 = 1 << 2;
    pub const VANISH_CAP: u32 = 1 << 3;
    pub const HOLDING_OBJECT: u32 = 1 << 4;
    pub const SUBMERGED: u32 = 1 << 5;

    pub const CAP_MASK: u32 = WING_CAP | METAL_CAP | VANISH_CAP;
}

/// Action tokens understood by the engine. Values are opaque pass-throughs.
pub mod actions {
    pub const IDLE: u32 = 0x0C40_0201;
    pub const FREEFALL: u32 = 0x0100_088C;
    pub const THROWING: u32 = 0x0300_0888;
    pub const STAR_DANCE: u32 = 0x0180_1043;
}

/// Triangle geometry written by the engine each tick. Buffers are fixed
/// capacity; `tri_count` says how many leading triangles are live.
#[derive(Clone, Debug)]
pub struct ActorGeometry {
    /// 9 floats per triangle (3 vertices x xyz).
    pub positions: Vec<f32>,
    pub normals: Vec<f32>,
    /// 9 floats per triangle (3 vertices x rgb).
    pub colors: Vec<f32>,
    /// 6 floats per triangle (3 vertices x uv).
    pub uvs: Vec<f32>,
    pub tri_count: usize,
}

impl ActorGeometry {
    pub fn new() -> Self {
        Self {
            positions: vec![0.0; ACTOR_GEO_MAX_TRIANGLES * 9],
            normals: vec![0.0; ACTOR_GEO_MAX_TRIANGLES * 9],
            colors: vec![0.0; ACTOR_GEO_MAX_TRIANGLES * 9],
            uvs: vec![0.0; ACTOR_GEO_MAX_TRIANGLES * 6],
            tri_count: 0,
        }
    }

    /// Zero every buffer slot in the triangle range `[from, to)`.
    pub fn zero_triangles(&mut self, from: usize, to: usize) {
        let to = to.min(ACTOR_GEO_MAX_TRIANGLES);
        if from >= to {
            return;
        }
        self.positions[from * 9..to * 9].fill(0.0);
        self.normals[from * 9..to * 9].fill(0.0);
        self.colors[from * 9..to * 9].fill(0.0);
        self.uvs[from * 6..to * 6].fill(0.0);
    }
}

impl Default for ActorGeometry {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of a floor probe below a point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FloorHit {
    pub height: f32,
    pub terrain: TerrainClass,
}

/// The native engine contract. One method per entry point; implementations
/// are [`LibraryEngine`] (the real shared library) and [`stub::StubEngine`]
/// (deterministic stand-in for the headless harness and tests).
pub trait CharEngine {
    fn create_actor(&mut self, pos: Vec3) -> ActorHandle;
    fn delete_actor(&mut self, handle: ActorHandle);
    fn tick(
        &mut self,
        handle: ActorHandle,
        input: &TickInput,
        state: &mut ActorState,
        geo: &mut ActorGeometry,
    );

    fn load_static_surfaces(&mut self, tris: &[SurfaceTri]);
    fn create_surface_object(&mut self, pose: &Pose, tris: &[SurfaceTri]) -> ObjectId;
    fn move_surface_object(&mut self, id: ObjectId, pose: &Pose);
    fn delete_surface_object(&mut self, id: ObjectId);

    fn set_water_level(&mut self, handle: ActorHandle, level: f32);
    fn set_gas_level(&mut self, handle: ActorHandle, level: f32);
    fn find_floor(&mut self, pos: Vec3) -> Option<FloorHit>;

    fn set_action(&mut self, handle: ActorHandle, flags: u32);
    fn set_state(&mut self, handle: ActorHandle, flags: u32);
    fn set_health(&mut self, handle: ActorHandle, health: f32);
    fn set_velocity(&mut self, handle: ActorHandle, vel: Vec3);
    fn set_position(&mut self, handle: ActorHandle, pos: Vec3);
    fn set_face_angle(&mut self, handle: ActorHandle, deg: f32);

    /// Pull up to `desired_frames` mono samples at [`NATIVE_SAMPLE_RATE`].
    /// Returns the number of frames actually written into `out`.
    fn audio_tick(&mut self, desired_frames: usize, out: &mut [i16]) -> usize;
    fn play_sound(&mut self, sound: SoundId, pos: Vec3);
    fn play_music(&mut self, seq: SeqId);
    fn stop_music(&mut self);
}

/// Load-time failures of the real engine. Always fatal; the binding never
/// partially initializes.
#[derive(Debug)]
pub enum EngineError {
    LibraryUnavailable { path: String, detail: String },
    MissingSymbol { name: String },
    AssetMissing { path: String },
    InitRejected { code: i32 },
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineError::LibraryUnavailable { path, detail } => {
                write!(f, "native library unavailable at {path}: {detail}")
            }
            EngineError::MissingSymbol { name } => {
                write!(f, "native library is missing symbol {name}")
            }
            EngineError::AssetMissing { path } => {
                write!(f, "engine data asset missing or unreadable at {path}")
            }
            EngineError::InitRejected { code } => {
                write!(f, "engine global init rejected the data asset (code {code})")
            }
        }
    }
}

impl Error for EngineError {}
