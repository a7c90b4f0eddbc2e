//! The per-session coordinator: owns the engine binding, the actor registry,
//! the surface registry, deferred work and the audio pipeline, and advances
//! all of them from the host's frame callback.
//!
//! Everything here is single-threaded and cooperative. One frame runs at
//! most one fixed simulation tick; rendering interpolates between the last
//! two tick snapshots at whatever rate frames arrive.

use std::fmt;

use hashbrown::HashMap;
use log::{info, warn};
use puppet_audio::{AudioPump, AudioRing};
use puppet_geom::Vec3;
use puppet_native::CharEngine;
use puppet_net::{ChannelBus, PeerId};
use puppet_surfaces::{ColliderDesc, ColliderId, RebuildReport, SurfaceRegistry};

use crate::actor::{Actor, SND_DEATH_LAUGH};
use crate::config::Config;
use crate::input::{InputFrame, arbitrate};
use crate::schedule::{DeferredAction, DeferredQueue};
use crate::{NodeId, SessionId};

/// Ambient water level when no volume contains the actor: far below any
/// plausible geometry, so characters behave as on dry land.
pub const AMBIENT_WATER_FLOOR: f32 = -10_000.0;

/// Global environment parameters pushed to the engine.
#[derive(Clone, Copy, Debug)]
pub struct EnvParams {
    pub water_level: f32,
    pub gas_level: f32,
}

impl Default for EnvParams {
    fn default() -> Self {
        Self {
            water_level: AMBIENT_WATER_FLOOR,
            gas_level: AMBIENT_WATER_FLOOR,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum SpawnError {
    /// The owner already has its full quota of live actors.
    QuotaExceeded { owner: PeerId, quota: usize },
    /// The engine returned its sentinel handle.
    EngineRejected,
    /// The context has been disposed; no further spawns are accepted.
    Disposed,
}

impl fmt::Display for SpawnError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpawnError::QuotaExceeded { owner, quota } => {
                write!(f, "peer {owner} is at its actor quota ({quota})")
            }
            SpawnError::EngineRejected => write!(f, "engine rejected actor creation"),
            SpawnError::Disposed => write!(f, "context is disposed"),
        }
    }
}

impl std::error::Error for SpawnError {}

#[derive(Debug, PartialEq, Eq)]
pub enum BindError {
    /// Another live session holds the engine and the caller is not focused.
    SessionHeld { held_by: SessionId },
}

impl fmt::Display for BindError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BindError::SessionHeld { held_by } => {
                write!(f, "engine already bound to session {held_by:#x}")
            }
        }
    }
}

impl std::error::Error for BindError {}

/// Everything the host samples for one frame callback.
#[derive(Clone, Copy, Debug, Default)]
pub struct FrameInput {
    pub now_ms: f64,
    pub cam_pos: Vec3,
    pub cam_look: Vec3,
    pub vr: Option<InputFrame>,
    pub desktop: Option<InputFrame>,
    pub gamepad: Option<InputFrame>,
    /// Edge-triggered: toggle the local movement lock this frame.
    pub toggle_lock: bool,
    /// Edge-triggered: log a one-shot state summary this frame.
    pub debug_dump: bool,
}

pub struct Context {
    cfg: Config,
    session: SessionId,
    local_peer: PeerId,
    engine: Box<dyn CharEngine>,
    bus: Box<dyn ChannelBus>,

    actors: HashMap<NodeId, Actor>,
    /// Simulation order is spawn order, independent of map iteration order.
    order: Vec<NodeId>,

    surfaces: SurfaceRegistry,
    deferred: DeferredQueue,
    env: EnvParams,

    last_tick_ms: f64,
    now_ms: f64,
    ticks: u64,
    movement_locked: bool,
    disposed: bool,
    dispose_requested: bool,

    pump: AudioPump,
    ring: AudioRing,
}

impl Context {
    pub fn new(
        cfg: Config,
        session: SessionId,
        local_peer: PeerId,
        engine: Box<dyn CharEngine>,
        bus: Box<dyn ChannelBus>,
    ) -> Self {
        let pump = AudioPump::new(cfg.audio.target_rate, cfg.audio.volume, cfg.audio.enabled);
        let ring = AudioRing::new(cfg.audio.ring_capacity_frames * 2);
        let surfaces = SurfaceRegistry::new(cfg.triangle_budget, cfg.debounce_ms);
        info!(
            "context bound to session {session:#x} (local peer {local_peer}, tick {} ms)",
            cfg.tick_interval_ms
        );
        Self {
            cfg,
            session,
            local_peer,
            engine,
            bus,
            actors: HashMap::new(),
            order: Vec::new(),
            surfaces,
            deferred: DeferredQueue::new(),
            env: EnvParams::default(),
            last_tick_ms: f64::NEG_INFINITY,
            now_ms: 0.0,
            ticks: 0,
            movement_locked: false,
            disposed: false,
            dispose_requested: false,
            pump,
            ring,
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    pub fn local_peer(&self) -> PeerId {
        self.local_peer
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn actor_count(&self) -> usize {
        self.actors.len()
    }

    pub fn actor(&self, node: NodeId) -> Option<&Actor> {
        self.actors.get(&node)
    }

    pub fn movement_locked(&self) -> bool {
        self.movement_locked
    }

    pub fn surfaces(&self) -> &SurfaceRegistry {
        &self.surfaces
    }

    /// One host frame. Order is fixed: frame-scoped toggles, debounced
    /// surface rebuild (outside any tick), due deferred work, then at most
    /// one simulation tick, the audio pump, and interpolation for display.
    pub fn on_frame(&mut self, frame: &FrameInput) {
        if self.disposed {
            return;
        }
        self.now_ms = frame.now_ms;

        if frame.toggle_lock {
            self.movement_locked = !self.movement_locked;
            info!("movement lock {}", if self.movement_locked { "on" } else { "off" });
        }
        if frame.debug_dump {
            self.dump_state();
        }

        if self.surfaces.rebuild_pending(frame.now_ms) {
            self.surfaces.rebuild_static(self.engine.as_mut(), self.cfg.scale);
        }

        while let Some(action) = self.deferred.pop_due(frame.now_ms) {
            self.run_deferred(action);
        }

        let mut input = arbitrate(frame.vr, frame.desktop, frame.gamepad);
        if self.movement_locked {
            input = InputFrame::default();
        }

        let due = frame.now_ms - self.last_tick_ms >= self.cfg.tick_interval_ms;
        if due {
            self.cull_pass(frame.cam_pos);
            // Dynamic surfaces move before any actor consults them.
            self.surfaces.advance_dynamics(self.engine.as_mut());
            for i in 0..self.order.len() {
                let node = self.order[i];
                let Some(actor) = self.actors.get_mut(&node) else {
                    continue;
                };
                let local_input = actor.is_local().then_some(input);
                actor.simulate(
                    self.engine.as_mut(),
                    &mut self.surfaces,
                    self.bus.as_mut(),
                    &self.cfg,
                    local_input,
                    frame.cam_look,
                    self.env.water_level,
                    frame.now_ms,
                    &mut self.deferred,
                );
            }
            self.last_tick_ms = frame.now_ms;
            self.ticks += 1;
        }

        self.pump.step(frame.now_ms, self.engine.as_mut(), &mut self.ring);

        let t = if self.last_tick_ms.is_finite() {
            (((frame.now_ms - self.last_tick_ms) / self.cfg.tick_interval_ms) as f32).clamp(0.0, 1.0)
        } else {
            1.0
        };
        for i in 0..self.order.len() {
            let node = self.order[i];
            if let Some(actor) = self.actors.get_mut(&node) {
                actor.render(self.engine.as_mut(), self.bus.as_ref(), t);
            }
        }

        if self.dispose_requested {
            self.dispose();
        }
    }

    /// Bind a scene node to a new actor owned by `owner`.
    pub fn spawn_actor(
        &mut self,
        node: NodeId,
        owner: PeerId,
        pos: Vec3,
    ) -> Result<(), SpawnError> {
        if self.disposed {
            return Err(SpawnError::Disposed);
        }
        let live = self
            .actors
            .values()
            .filter(|a| a.owner() == owner && !a.nuked)
            .count();
        if live >= self.cfg.actor_quota_per_owner {
            warn!(
                "spawn refused for node {node:#x}: peer {owner} at quota ({live})"
            );
            return Err(SpawnError::QuotaExceeded {
                owner,
                quota: self.cfg.actor_quota_per_owner,
            });
        }
        let is_local = owner == self.local_peer;
        let actor = Actor::spawn(self.engine.as_mut(), node, owner, is_local, pos)
            .ok_or(SpawnError::EngineRejected)?;
        self.engine.set_gas_level(actor.handle(), self.env.gas_level);
        self.actors.insert(node, actor);
        self.order.push(node);
        Ok(())
    }

    /// Scene node gone: delete the native actor and forget the binding.
    pub fn remove_node(&mut self, node: NodeId) {
        if let Some(mut actor) = self.actors.remove(&node) {
            actor.nuke(self.engine.as_mut());
            self.order.retain(|&n| n != node);
        }
    }

    /// A collider was added or its classification inputs changed.
    pub fn collider_changed(&mut self, desc: ColliderDesc) {
        if self.disposed {
            return;
        }
        self.surfaces.upsert(self.engine.as_mut(), desc, self.now_ms);
    }

    pub fn collider_removed(&mut self, id: ColliderId) {
        if self.disposed {
            return;
        }
        self.surfaces.remove(self.engine.as_mut(), id, self.now_ms);
    }

    /// A collider moved without reclassification.
    pub fn collider_moved(&mut self, id: ColliderId, pose: puppet_geom::Pose) {
        self.surfaces.update_pose(id, pose);
    }

    /// Force the debounced rebuild to run on the next frame.
    pub fn rebuild_now(&mut self) -> RebuildReport {
        self.surfaces.rebuild_static(self.engine.as_mut(), self.cfg.scale)
    }

    /// World scale is baked into every uploaded triangle and native actor.
    /// A change invalidates the whole binding; the context tears itself down
    /// and the host rebinds at the new scale.
    pub fn set_scale(&mut self, scale: f32) {
        if (scale - self.cfg.scale).abs() <= f32::EPSILON {
            return;
        }
        warn!(
            "world scale changed {} -> {scale}; disposing context for rebind",
            self.cfg.scale
        );
        self.dispose_requested = true;
    }

    pub fn set_ambient_water(&mut self, level: f32) {
        self.env.water_level = level;
    }

    /// Gas is a session-wide parameter but the engine tracks it per actor;
    /// fan the level out to every live handle. New spawns get the current
    /// level so late joiners match.
    pub fn set_gas_level(&mut self, level: f32) {
        self.env.gas_level = level;
        for actor in self.actors.values() {
            if actor.handle().is_valid() && !actor.nuked {
                self.engine.set_gas_level(actor.handle(), level);
            }
        }
    }

    /// Pull resampled stereo samples for the host's audio output.
    pub fn drain_audio(&mut self, out: &mut [f32]) -> usize {
        self.ring.pop_into(out)
    }

    pub fn audio_skipped_blocks(&self) -> u64 {
        self.pump.skipped_blocks()
    }

    /// Tear down every native resource this context created. Idempotent.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        for node in std::mem::take(&mut self.order) {
            if let Some(mut actor) = self.actors.remove(&node) {
                actor.nuke(self.engine.as_mut());
            }
        }
        self.surfaces.dispose(self.engine.as_mut());
        self.deferred.clear();
        self.disposed = true;
        self.dispose_requested = false;
        info!("context for session {:#x} disposed", self.session);
    }

    fn run_deferred(&mut self, action: DeferredAction) {
        match action {
            DeferredAction::NukeActor { node, destroy } => {
                // Liveness re-check: the actor may have been removed, or
                // revived by a dispose/rebind, since this was scheduled.
                let Some(actor) = self.actors.get_mut(&node) else {
                    return;
                };
                if !actor.dying || actor.nuked {
                    return;
                }
                actor.nuke(self.engine.as_mut());
                if destroy {
                    self.actors.remove(&node);
                    self.order.retain(|&n| n != node);
                }
            }
            DeferredAction::LaughSound { node } => {
                if let Some(actor) = self.actors.get(&node) {
                    if actor.dying && !actor.nuked {
                        let pos = actor.current().pos;
                        self.engine.play_sound(SND_DEATH_LAUGH, pos);
                    }
                }
            }
        }
    }

    /// Distance cull plus the animated-remote cap. The cap bounds how many
    /// of each remote peer's actors animate locally, so peers are ranked
    /// independently. The local participant's own actors are never culled.
    fn cull_pass(&mut self, cam_pos: Vec3) {
        let mut by_owner: HashMap<PeerId, Vec<(NodeId, f32)>> = HashMap::new();
        for &node in &self.order {
            if let Some(actor) = self.actors.get(&node) {
                if !actor.is_local() {
                    by_owner
                        .entry(actor.owner())
                        .or_default()
                        .push((node, actor.current().pos.distance(cam_pos)));
                }
            }
        }
        for (_, mut remotes) in by_owner {
            remotes.sort_by(|a, b| a.1.total_cmp(&b.1));
            for (rank, &(node, dist)) in remotes.iter().enumerate() {
                let over = dist > self.cfg.cull_distance || rank >= self.cfg.remote_animated_cap;
                if let Some(actor) = self.actors.get_mut(&node) {
                    actor.set_over_cull(over);
                }
            }
        }
    }

    fn dump_state(&self) {
        info!(
            "session {:#x}: {} actors, ticks {}, surfaces s/d/i/w {}/{}/{}/{}, {} tris uploaded, {} audio blocks skipped",
            self.session,
            self.actors.len(),
            self.ticks,
            self.surfaces.static_count(),
            self.surfaces.dynamic_count(),
            self.surfaces.interactable_count(),
            self.surfaces.water_count(),
            self.surfaces.uploaded_tris(),
            self.pump.skipped_blocks()
        );
    }
}

/// Single-binding holder: the native engine supports one live context at a
/// time. A focused rebind replaces (and disposes) the current holder; an
/// unfocused bind against a different live session is refused.
#[derive(Default)]
pub struct ContextSlot {
    active: Option<Context>,
}

impl ContextSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active(&self) -> Option<&Context> {
        self.active.as_ref().filter(|c| !c.disposed)
    }

    pub fn active_mut(&mut self) -> Option<&mut Context> {
        self.active.as_mut().filter(|c| !c.disposed)
    }

    pub fn bind(
        &mut self,
        session: SessionId,
        focused: bool,
        make: impl FnOnce() -> Context,
    ) -> Result<&mut Context, BindError> {
        let reuse = self
            .active
            .as_ref()
            .is_some_and(|c| c.session == session && !c.disposed);
        if reuse {
            return Ok(self.active.as_mut().expect("live context checked above"));
        }
        if let Some(held) = self.active.as_ref().filter(|c| !c.disposed) {
            if !focused {
                return Err(BindError::SessionHeld {
                    held_by: held.session,
                });
            }
        }
        if let Some(mut old) = self.active.take() {
            old.dispose();
        }
        Ok(self.active.insert(make()))
    }

    /// Drop the binding for `session` if it is the one held.
    pub fn release(&mut self, session: SessionId) {
        if let Some(ctx) = self.active.as_mut() {
            if ctx.session == session {
                ctx.dispose();
                self.active = None;
            }
        }
    }
}
