//! Tick/replication/interpolation coordinator for an embedded native
//! character-simulation engine.
//!
//! The native engine advances on a fixed internal timestep; the host renders
//! at whatever rate it likes. This crate decouples the two: a [`Context`]
//! owns the actor registry and collision surface registry, runs at most one
//! fixed simulation tick per frame, replicates owner-authoritative per-actor
//! state over named value channels, and resamples the engine's synthesized
//! audio into a bounded outbound stream.
#![forbid(unsafe_code)]

pub mod actor;
pub mod config;
pub mod context;
pub mod input;
pub mod schedule;

#[cfg(test)]
mod scenario_tests;

pub use actor::Actor;
pub use config::{AudioConfig, Config};
pub use context::{BindError, Context, ContextSlot, EnvParams, FrameInput, SpawnError};
pub use input::{InputFrame, arbitrate};
pub use schedule::{DeferredAction, DeferredQueue};

/// Scene-node identity an actor is bound to.
pub type NodeId = u64;

/// Identity of one simulated session/world.
pub type SessionId = u64;
