//! One simulated character bound to a native engine handle.
//!
//! State and geometry are double-buffered: every simulation tick writes the
//! slot that is not current, then flips the index exactly once, so a render
//! running at frame rate can always interpolate between a complete previous
//! and a complete current snapshot.

use log::{debug, info, warn};
use puppet_geom::{Pose, Vec3, lerp_angle_deg};
use puppet_native::{
    ACTOR_GEO_MAX_TRIANGLES, ActorGeometry, ActorHandle, ActorState, CharEngine, FULL_HEALTH,
    SoundId, TickInput, actions, state_flags,
};
use puppet_net::{ActorChannels, ChannelBus, PeerId, ReplicatedState};
use puppet_surfaces::{ColliderId, InteractableKind, SurfaceRegistry};

use crate::NodeId;
use crate::config::Config;
use crate::input::InputFrame;
use crate::schedule::{DeferredAction, DeferredQueue};

/// Delay before a quicksand/death-plane death removes the actor.
pub const DEATH_DELAY_LETHAL_MS: f64 = 3_000.0;
/// Delay before a health-depleted death removes the actor.
pub const DEATH_DELAY_HEALTH_MS: f64 = 15_000.0;
/// Death jingle offset after the death is detected.
const LAUGH_DELAY_MS: f64 = 1_000.0;

pub const SND_DEATH_LAUGH: SoundId = 0x42;
pub const SND_STAR: SoundId = 0x51;

/// Vertical tolerance for lethal floor contact.
const FLOOR_TOLERANCE: f32 = 0.1;
/// Water pushes to the engine only when it moved at least this much.
const WATER_EPSILON: f32 = 1e-3;
/// Inside a water volume the surface is clamped this far above the actor.
const WATER_ABOVE_ACTOR: f32 = 0.4;
/// Position delta under which a release is a drop, not a throw.
const THROW_MIN_DELTA: f32 = 1e-3;
const FORWARD_TOSS_SPEED: f32 = 2.0;

const CAPSULE_HEIGHT: f32 = 1.6;
const CAPSULE_RADIUS: f32 = 0.35;
const CAPSULE_SAMPLES: usize = 4;

pub struct Actor {
    node: NodeId,
    handle: ActorHandle,
    owner: PeerId,
    is_local: bool,
    channels: ActorChannels,

    states: [ActorState; 2],
    geos: [ActorGeometry; 2],
    cur: usize,
    ticked_once: bool,

    pub dying: bool,
    pub nuked: bool,
    over_cull: bool,
    hidden: bool,

    prev_holding: bool,
    last_remote_action: u32,
    last_water: f32,

    render_pose: Pose,
    render_health: f32,
}

impl Actor {
    /// Create the native actor. A sentinel handle from the engine aborts
    /// construction; the caller decides what to do with the scene node.
    pub fn spawn(
        engine: &mut dyn CharEngine,
        node: NodeId,
        owner: PeerId,
        is_local: bool,
        pos: Vec3,
    ) -> Option<Actor> {
        let handle = engine.create_actor(pos);
        if !handle.is_valid() {
            warn!("actor creation failed for node {node:#x} (owner {owner})");
            return None;
        }
        info!("actor {handle:?} spawned for node {node:#x} (owner {owner}, local={is_local})");
        let initial = ActorState {
            pos,
            ..ActorState::default()
        };
        Some(Actor {
            node,
            handle,
            owner,
            is_local,
            channels: ActorChannels::new(node, owner),
            states: [initial, initial],
            geos: [ActorGeometry::new(), ActorGeometry::new()],
            cur: 0,
            ticked_once: false,
            dying: false,
            nuked: false,
            over_cull: false,
            hidden: false,
            prev_holding: false,
            last_remote_action: 0,
            last_water: f32::NEG_INFINITY,
            render_pose: Pose::new(pos, 0.0),
            render_health: FULL_HEALTH,
        })
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn owner(&self) -> PeerId {
        self.owner
    }

    pub fn is_local(&self) -> bool {
        self.is_local
    }

    pub fn handle(&self) -> ActorHandle {
        self.handle
    }

    pub fn hidden(&self) -> bool {
        self.hidden
    }

    pub fn current(&self) -> &ActorState {
        &self.states[self.cur]
    }

    pub fn previous(&self) -> &ActorState {
        &self.states[1 - self.cur]
    }

    pub fn current_geometry(&self) -> &ActorGeometry {
        &self.geos[self.cur]
    }

    /// Interpolated pose for the host to place the visual representation.
    pub fn render_pose(&self) -> Pose {
        self.render_pose
    }

    pub fn render_health(&self) -> f32 {
        self.render_health
    }

    /// Cull decision for this tick; culled actors keep their identity but
    /// are neither simulated nor shown.
    pub fn set_over_cull(&mut self, over: bool) {
        self.over_cull = over;
        if over {
            self.hidden = true;
        } else if !self.nuked && !self.dying {
            self.hidden = false;
        }
    }

    /// Authoritative per-tick advance. Called once per simulation tick.
    #[allow(clippy::too_many_arguments)]
    pub fn simulate(
        &mut self,
        engine: &mut dyn CharEngine,
        surfaces: &mut SurfaceRegistry,
        bus: &mut dyn ChannelBus,
        cfg: &Config,
        local_input: Option<InputFrame>,
        cam_look: Vec3,
        ambient_water: f32,
        now_ms: f64,
        deferred: &mut DeferredQueue,
    ) {
        if !self.handle.is_valid() || self.nuked {
            return;
        }
        if self.over_cull {
            self.hidden = true;
            return;
        }

        let input = self.build_tick_input(bus, local_input, cam_look);

        // Advance into the non-current slot, then flip once.
        let next = 1 - self.cur;
        engine.tick(
            self.handle,
            &input,
            &mut self.states[next],
            &mut self.geos[next],
        );

        let new_count = self.geos[next].tri_count;
        let old_count = self.geos[self.cur].tri_count;
        if self.ticked_once && new_count != old_count {
            // Zero the stale tail on both buffers so the render-time blend
            // never resurrects geometry from two ticks ago.
            let hi = new_count.max(old_count).min(ACTOR_GEO_MAX_TRIANGLES);
            for geo in &mut self.geos {
                let live = geo.tri_count;
                geo.zero_triangles(live, hi);
            }
        }
        self.cur = next;
        self.ticked_once = true;

        if self.is_local {
            // Post-simulation write so remote observers see the same tick's
            // inputs that produced this state.
            let sampled = local_input.unwrap_or_default();
            if let Err(e) = self.channels.write_inputs(bus, sampled.into()) {
                warn!("input replication failed for node {:#x}: {e}", self.node);
            }
            let st = *self.current();
            let rep = ReplicatedState {
                health: st.health,
                action_flags: st.action_flags,
                state_flags: st.state_flags,
            };
            if let Err(e) = self.channels.write_state(bus, rep) {
                warn!("state replication failed for node {:#x}: {e}", self.node);
            }

            self.evaluate_death(engine, cfg, now_ms, deferred);
            self.evaluate_interactables(engine, surfaces);
        } else {
            let rep = self.channels.read_state(bus);
            self.grant_caps(engine, rep.state_flags);
            if rep.action_flags != self.last_remote_action {
                engine.set_action(self.handle, rep.action_flags);
                self.last_remote_action = rep.action_flags;
            }
        }

        self.resolve_grab_transition(engine, cfg);
        self.update_submersion(engine, surfaces, ambient_water);
    }

    fn build_tick_input(
        &self,
        bus: &dyn ChannelBus,
        local_input: Option<InputFrame>,
        cam_look: Vec3,
    ) -> TickInput {
        let frame: InputFrame = if self.is_local {
            local_input.unwrap_or_default()
        } else {
            self.channels.read_inputs(bus).into()
        };
        TickInput {
            cam_look: cam_look.flattened(),
            joy_x: frame.joy_x,
            joy_y: frame.joy_y,
            jump: frame.jump,
            kick: frame.kick,
            crouch: frame.crouch,
        }
    }

    fn evaluate_death(
        &mut self,
        engine: &mut dyn CharEngine,
        cfg: &Config,
        now_ms: f64,
        deferred: &mut DeferredQueue,
    ) {
        if self.dying {
            return;
        }
        let st = *self.current();
        let delay = if st.health <= 0.0 {
            Some(DEATH_DELAY_HEALTH_MS)
        } else {
            engine.find_floor(st.pos).and_then(|hit| {
                (hit.terrain.is_lethal() && (st.pos.y - hit.height).abs() <= FLOOR_TOLERANCE)
                    .then_some(DEATH_DELAY_LETHAL_MS)
            })
        };
        let Some(delay) = delay else {
            return;
        };
        self.dying = true;
        info!(
            "actor {:?} dying (health {:.1}), nuke in {:.0} ms",
            self.handle, st.health, delay
        );
        deferred.schedule_in(now_ms, LAUGH_DELAY_MS, DeferredAction::LaughSound {
            node: self.node,
        });
        deferred.schedule_in(now_ms, delay, DeferredAction::NukeActor {
            node: self.node,
            destroy: cfg.despawn_on_death,
        });
    }

    fn evaluate_interactables(
        &mut self,
        engine: &mut dyn CharEngine,
        surfaces: &mut SurfaceRegistry,
    ) {
        let st = *self.current();
        let mut hits: Vec<(ColliderId, InteractableKind, bool)> = Vec::new();
        for (&id, entry) in surfaces.interactables() {
            if !entry.armed {
                continue;
            }
            // Sampled line from foot to head against the interactable sphere.
            let overlap = (0..CAPSULE_SAMPLES).any(|i| {
                let h = CAPSULE_HEIGHT * i as f32 / (CAPSULE_SAMPLES - 1) as f32;
                let p = st.pos + Vec3::UP * h;
                p.distance(entry.pose.pos) <= entry.radius + CAPSULE_RADIUS
            });
            if overlap {
                let own = entry.owner_node == Some(self.node);
                hits.push((id, entry.kind, own));
            }
        }
        for (id, kind, own) in hits {
            match kind {
                InteractableKind::Heal => {
                    engine.set_health(self.handle, FULL_HEALTH);
                    self.states[self.cur].health = FULL_HEALTH;
                    surfaces.disarm(id);
                }
                InteractableKind::Cap(cap) => {
                    self.grant_caps(engine, cap.state_flag());
                    surfaces.disarm(id);
                }
                InteractableKind::Star => {
                    engine.set_action(self.handle, actions::STAR_DANCE);
                    engine.play_sound(SND_STAR, st.pos);
                    surfaces.disarm(id);
                }
                InteractableKind::Damage => {
                    // An actor's own hazard never hurts it.
                    if !own {
                        let health = (self.current().health - 1.0).max(0.0);
                        engine.set_health(self.handle, health);
                        self.states[self.cur].health = health;
                    }
                }
            }
        }
    }

    /// Grant the cap bits in `wanted` that the actor does not already hold.
    /// Already-held caps are left alone: no duplicate flag bits, no timer
    /// extension.
    pub fn grant_caps(&mut self, engine: &mut dyn CharEngine, wanted: u32) {
        let held = self.states[self.cur].state_flags;
        let missing = wanted & state_flags::CAP_MASK & !held;
        if missing == 0 {
            return;
        }
        let flags = held | missing;
        engine.set_state(self.handle, flags);
        self.states[self.cur].state_flags = flags;
        debug!("actor {:?} granted cap bits {missing:#x}", self.handle);
    }

    fn resolve_grab_transition(&mut self, engine: &mut dyn CharEngine, cfg: &Config) {
        let holding = self.current().state_flags & state_flags::HOLDING_OBJECT != 0;
        if self.prev_holding && !holding {
            let delta = self.current().pos - self.previous().pos;
            if delta.length() > THROW_MIN_DELTA {
                let dt_s = (cfg.tick_interval_ms / 1000.0) as f32;
                engine.set_velocity(self.handle, delta / dt_s.max(1e-3));
            } else {
                // Standing release: face-forward free fall, not a throw.
                let fwd =
                    puppet_geom::rotate_yaw(Vec3::new(1.0, 0.0, 0.0), self.current().face_angle_deg);
                engine.set_action(self.handle, actions::FREEFALL);
                engine.set_velocity(self.handle, fwd * FORWARD_TOSS_SPEED);
            }
        }
        self.prev_holding = holding;
    }

    fn update_submersion(
        &mut self,
        engine: &mut dyn CharEngine,
        surfaces: &SurfaceRegistry,
        ambient_water: f32,
    ) {
        let st = self.current();
        let center = st.pos + Vec3::UP * (CAPSULE_HEIGHT * 0.5);
        let water = match surfaces.water_volume_at(center) {
            Some(vol) => (st.pos.y + WATER_ABOVE_ACTOR).min(vol.max.y),
            None => ambient_water,
        };
        if (water - self.last_water).abs() > WATER_EPSILON {
            engine.set_water_level(self.handle, water);
            self.last_water = water;
        }
    }

    /// Per-frame interpolation between the previous and current snapshot.
    /// The owner's own actor is placed by the host from [`Self::render_pose`];
    /// remote actors are additionally pushed back into the engine, which is
    /// the source of truth for collision against them.
    pub fn render(&mut self, engine: &mut dyn CharEngine, bus: &dyn ChannelBus, t: f32) {
        if !self.handle.is_valid() || self.nuked || !self.ticked_once {
            return;
        }
        let prev = *self.previous();
        let cur = *self.current();
        let pos = prev.pos.lerp(cur.pos, t);
        let yaw = lerp_angle_deg(prev.face_angle_deg, cur.face_angle_deg, t);
        self.render_pose = Pose::new(pos, yaw);
        if self.is_local {
            self.render_health = prev.health + (cur.health - prev.health) * t;
        } else {
            self.render_health = self.channels.read_state(bus).health;
            // At t = 0 the engine already holds the current snapshot; pushing
            // the previous one would make the next tick integrate from stale
            // state and fall behind the owner.
            if t > 0.0 {
                engine.set_position(self.handle, pos);
                engine.set_face_angle(self.handle, yaw);
            }
        }
    }

    /// Blend the two geometry buffers for display at interpolation factor `t`.
    pub fn blend_geometry(&self, t: f32, out: &mut ActorGeometry) {
        let prev = &self.geos[1 - self.cur];
        let cur = &self.geos[self.cur];
        let count = prev.tri_count.max(cur.tri_count);
        for i in 0..count * 9 {
            out.positions[i] = prev.positions[i] + (cur.positions[i] - prev.positions[i]) * t;
            out.normals[i] = prev.normals[i] + (cur.normals[i] - prev.normals[i]) * t;
            out.colors[i] = cur.colors[i];
        }
        out.uvs[..count * 6].copy_from_slice(&cur.uvs[..count * 6]);
        out.tri_count = count;
    }

    /// Remove the actor from simulation. Identity survives unless the
    /// registry also drops the entry.
    pub fn nuke(&mut self, engine: &mut dyn CharEngine) {
        if self.nuked {
            return;
        }
        engine.delete_actor(self.handle);
        self.nuked = true;
        self.hidden = true;
        info!("actor {:?} nuked (node {:#x})", self.handle, self.node);
    }
}
