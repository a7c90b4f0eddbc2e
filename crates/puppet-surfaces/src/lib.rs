//! Collision surface registry: classifies scene colliders, converts their
//! geometry into native surface triangles under a triangle budget, and keeps
//! the engine's surface sets consistent with scene mutations.
//!
//! Classification is computed once per snapshot from typed collider metadata
//! and cached; a collider belongs to at most one of the four live sets at a
//! time. Static rebuilds are debounced: repeated dirt inside the window
//! collapses into a single rebuild, performed outside the simulation tick.
#![forbid(unsafe_code)]

mod classify;
mod tris;

use hashbrown::HashMap;
use log::{debug, info, warn};
use puppet_geom::{Aabb, Pose, Vec3};
use puppet_native::{CharEngine, ObjectId, SurfaceTri, TerrainClass};

pub use classify::{CapKind, ColliderKind, ColliderTag, InteractableKind, classify};
pub use tris::{box_tris, mesh_tris};

/// Scene-side identity of a collider object.
pub type ColliderId = u64;

/// Pose delta below which a dynamic surface object is not moved.
pub const MOVE_EPSILON: f32 = 1e-4;

#[derive(Clone, Debug)]
pub struct MeshData {
    pub positions: Vec<Vec3>,
    pub indices: Vec<u32>,
}

impl MeshData {
    #[inline]
    pub fn tri_count(&self) -> usize {
        self.indices.len() / 3
    }
}

#[derive(Clone, Debug)]
pub enum ColliderShape {
    Box { half: Vec3 },
    Sphere { radius: f32 },
    /// `None` marks a mesh collider whose mesh data was unreadable.
    Mesh(Option<MeshData>),
}

/// Snapshot of one scene collider, as delivered by a scene mutation event.
#[derive(Clone, Debug)]
pub struct ColliderDesc {
    pub id: ColliderId,
    pub tag: ColliderTag,
    pub enabled: bool,
    pub active: bool,
    pub character_collidable: bool,
    pub trigger: bool,
    pub pose: Pose,
    pub scale: Vec3,
    pub shape: ColliderShape,
    pub terrain: TerrainClass,
    /// Scene node the collider hangs off; interactable damage from an
    /// actor's own node is ignored.
    pub owner_node: Option<u64>,
}

struct DynamicEntry {
    object: ObjectId,
    last_pose: Pose,
    pending_pose: Pose,
}

#[derive(Clone, Debug)]
pub struct InteractableEntry {
    pub kind: InteractableKind,
    pub pose: Pose,
    pub radius: f32,
    pub armed: bool,
    pub owner_node: Option<u64>,
}

/// Outcome of one static rebuild, for diagnostics and tests.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RebuildReport {
    pub accepted: Vec<ColliderId>,
    pub rejected: Vec<ColliderId>,
    pub unreadable: Vec<ColliderId>,
    pub triangles: usize,
}

pub struct SurfaceRegistry {
    statics: HashMap<ColliderId, ColliderDesc>,
    dynamics: HashMap<ColliderId, DynamicEntry>,
    interactables: HashMap<ColliderId, InteractableEntry>,
    waters: HashMap<ColliderId, Aabb>,
    triangle_budget: usize,
    debounce_ms: f64,
    rebuild_due_ms: Option<f64>,
    uploaded_tris: usize,
}

impl SurfaceRegistry {
    pub fn new(triangle_budget: usize, debounce_ms: f64) -> Self {
        Self {
            statics: HashMap::new(),
            dynamics: HashMap::new(),
            interactables: HashMap::new(),
            waters: HashMap::new(),
            triangle_budget,
            debounce_ms,
            rebuild_due_ms: None,
            uploaded_tris: 0,
        }
    }

    /// Arm (or re-arm, replacing the previous deadline) the debounced rebuild.
    pub fn mark_dirty(&mut self, now_ms: f64) {
        self.rebuild_due_ms = Some(now_ms + self.debounce_ms);
    }

    pub fn rebuild_pending(&self, now_ms: f64) -> bool {
        self.rebuild_due_ms.is_some_and(|due| now_ms >= due)
    }

    /// Insert or reclassify a collider snapshot. The collider is removed
    /// from whatever set it was in before being added to its new set, so the
    /// four sets stay disjoint at every point an observer could look.
    pub fn upsert(&mut self, engine: &mut dyn CharEngine, desc: ColliderDesc, now_ms: f64) {
        let was_static = self.detach(engine, desc.id);
        let kind = classify(&desc);
        match kind {
            ColliderKind::Static => {
                self.statics.insert(desc.id, desc);
                self.mark_dirty(now_ms);
            }
            ColliderKind::Dynamic => {
                // One persistent native object, built at the collider's
                // initial scale; moved per tick afterwards.
                let mut tris = Vec::new();
                collect_shape_tris(&desc, &mut tris);
                let object = engine.create_surface_object(&desc.pose, &tris);
                debug!(
                    "dynamic collider {} -> surface object {} ({} tris)",
                    desc.id,
                    object,
                    tris.len()
                );
                let pose = desc.pose;
                self.dynamics.insert(
                    desc.id,
                    DynamicEntry {
                        object,
                        last_pose: pose,
                        pending_pose: pose,
                    },
                );
            }
            ColliderKind::Interactable(kind) => {
                let radius = interact_radius(&desc);
                self.interactables.insert(
                    desc.id,
                    InteractableEntry {
                        kind,
                        pose: desc.pose,
                        radius,
                        armed: true,
                        owner_node: desc.owner_node,
                    },
                );
            }
            ColliderKind::Water => {
                self.waters.insert(desc.id, water_bounds(&desc));
            }
            ColliderKind::None => {}
        }
        if was_static && kind != ColliderKind::Static {
            self.mark_dirty(now_ms);
        }
    }

    /// Remove a collider from all sets (scene node removed).
    pub fn remove(&mut self, engine: &mut dyn CharEngine, id: ColliderId, now_ms: f64) {
        if self.detach(engine, id) {
            self.mark_dirty(now_ms);
        }
    }

    /// Remove from every set; returns whether the static set changed.
    fn detach(&mut self, engine: &mut dyn CharEngine, id: ColliderId) -> bool {
        if let Some(entry) = self.dynamics.remove(&id) {
            engine.delete_surface_object(entry.object);
        }
        self.interactables.remove(&id);
        self.waters.remove(&id);
        self.statics.remove(&id).is_some()
    }

    /// Record a new pose for a dynamic collider (applied on the next tick)
    /// or an interactable/water volume (applied immediately).
    pub fn update_pose(&mut self, id: ColliderId, pose: Pose) {
        if let Some(entry) = self.dynamics.get_mut(&id) {
            entry.pending_pose = pose;
        } else if let Some(entry) = self.interactables.get_mut(&id) {
            entry.pose = pose;
        } else if let Some(bounds) = self.waters.get_mut(&id) {
            let half = (bounds.max - bounds.min) * 0.5;
            *bounds = Aabb::from_center_half(pose.pos, half);
        }
    }

    /// Push pending dynamic moves to the engine. Runs at the top of each
    /// simulation tick, strictly before any actor tick.
    pub fn advance_dynamics(&mut self, engine: &mut dyn CharEngine) {
        for entry in self.dynamics.values_mut() {
            let moved = entry.pending_pose.pos.distance(entry.last_pose.pos) > MOVE_EPSILON
                || (entry.pending_pose.yaw_deg - entry.last_pose.yaw_deg).abs() > MOVE_EPSILON;
            if moved {
                engine.move_surface_object(entry.object, &entry.pending_pose);
                entry.last_pose = entry.pending_pose;
            }
        }
    }

    /// Rebuild and atomically upload the static surface list. Primitive
    /// colliders contribute immediately; mesh colliders are accepted in
    /// ascending triangle-count order until the budget would be exceeded.
    pub fn rebuild_static(&mut self, engine: &mut dyn CharEngine, world_scale: f32) -> RebuildReport {
        self.rebuild_due_ms = None;
        let mut report = RebuildReport::default();
        let mut tris: Vec<SurfaceTri> = Vec::new();

        let mut meshes: Vec<(&ColliderId, &ColliderDesc, usize)> = Vec::new();
        for (id, desc) in self.statics.iter() {
            match &desc.shape {
                ColliderShape::Mesh(Some(mesh)) => meshes.push((id, desc, mesh.tri_count())),
                ColliderShape::Mesh(None) => {
                    warn!("static collider {id}: mesh unreadable, excluded from surface set");
                    report.unreadable.push(*id);
                }
                _ => {
                    collect_shape_tris_scaled(desc, world_scale, &mut tris);
                    report.accepted.push(*id);
                }
            }
        }

        meshes.sort_by_key(|&(id, _, count)| (count, *id));
        for (id, desc, count) in meshes {
            if tris.len() + count > self.triangle_budget {
                warn!(
                    "static collider {id}: {count} tris would exceed budget ({} used of {})",
                    tris.len(),
                    self.triangle_budget
                );
                report.rejected.push(*id);
                continue;
            }
            collect_shape_tris_scaled(desc, world_scale, &mut tris);
            report.accepted.push(*id);
        }

        report.triangles = tris.len();
        engine.load_static_surfaces(&tris);
        self.uploaded_tris = tris.len();
        info!(
            "static surfaces rebuilt: {} tris from {} colliders ({} rejected, {} unreadable)",
            report.triangles,
            report.accepted.len(),
            report.rejected.len(),
            report.unreadable.len()
        );
        report
    }

    pub fn uploaded_tris(&self) -> usize {
        self.uploaded_tris
    }

    /// The water volume containing `p`, if any.
    pub fn water_volume_at(&self, p: Vec3) -> Option<&Aabb> {
        self.waters.values().find(|b| b.contains(p))
    }

    pub fn interactables(&self) -> impl Iterator<Item = (&ColliderId, &InteractableEntry)> {
        self.interactables.iter()
    }

    /// Disarm a one-shot interactable in place.
    pub fn disarm(&mut self, id: ColliderId) {
        if let Some(entry) = self.interactables.get_mut(&id) {
            entry.armed = false;
        }
    }

    pub fn static_count(&self) -> usize {
        self.statics.len()
    }

    pub fn dynamic_count(&self) -> usize {
        self.dynamics.len()
    }

    pub fn interactable_count(&self) -> usize {
        self.interactables.len()
    }

    pub fn water_count(&self) -> usize {
        self.waters.len()
    }

    /// Delete every native object this registry created.
    pub fn dispose(&mut self, engine: &mut dyn CharEngine) {
        for (_, entry) in self.dynamics.drain() {
            engine.delete_surface_object(entry.object);
        }
        self.statics.clear();
        self.interactables.clear();
        self.waters.clear();
        self.rebuild_due_ms = None;
        self.uploaded_tris = 0;
    }
}

fn interact_radius(desc: &ColliderDesc) -> f32 {
    let s = desc.scale.x.max(desc.scale.y).max(desc.scale.z).max(0.0);
    match &desc.shape {
        ColliderShape::Sphere { radius } => radius * s,
        ColliderShape::Box { half } => half.length() * s,
        ColliderShape::Mesh(_) => s,
    }
}

fn water_bounds(desc: &ColliderDesc) -> Aabb {
    let half = match &desc.shape {
        ColliderShape::Box { half } => Vec3::new(
            half.x * desc.scale.x,
            half.y * desc.scale.y,
            half.z * desc.scale.z,
        ),
        ColliderShape::Sphere { radius } => {
            let r = radius * desc.scale.x.max(desc.scale.y).max(desc.scale.z);
            Vec3::new(r, r, r)
        }
        ColliderShape::Mesh(_) => desc.scale,
    };
    Aabb::from_center_half(desc.pose.pos, half)
}

fn collect_shape_tris(desc: &ColliderDesc, out: &mut Vec<SurfaceTri>) {
    collect_shape_tris_scaled(desc, 1.0, out)
}

fn collect_shape_tris_scaled(desc: &ColliderDesc, world_scale: f32, out: &mut Vec<SurfaceTri>) {
    match &desc.shape {
        ColliderShape::Box { half } => {
            box_tris(*half, &desc.pose, desc.scale, world_scale, desc.terrain, out)
        }
        ColliderShape::Sphere { radius } => {
            // Approximated by its bounding box; the engine only eats triangles.
            let half = Vec3::new(*radius, *radius, *radius);
            box_tris(half, &desc.pose, desc.scale, world_scale, desc.terrain, out)
        }
        ColliderShape::Mesh(Some(mesh)) => {
            mesh_tris(mesh, &desc.pose, desc.scale, world_scale, desc.terrain, out)
        }
        ColliderShape::Mesh(None) => {}
    }
}

#[cfg(test)]
mod tests;
