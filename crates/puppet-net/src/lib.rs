//! Replication primitives: named value channels with owner-authoritative
//! writes, plus the per-actor channel bundle.
//!
//! Exactly one peer owns each channel (the peer that defined it). Everyone
//! may read; only the owner may write. Channels are created lazily by the
//! owner, so a read can race definition — readers treat a missing channel as
//! its neutral default for that tick.
#![forbid(unsafe_code)]

use std::fmt;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

/// Unique identifier for a participant in the session.
pub type PeerId = u16;

/// Neutral health used before the health channel exists (full wedges).
pub const NEUTRAL_HEALTH: f32 = 8.0;

/// A value carried on a replicated channel. Serde-serializable so a real
/// transport can carry it verbatim.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum NetValue {
    F32(f32),
    U32(u32),
    Bool(bool),
}

impl NetValue {
    #[inline]
    pub fn as_f32(self) -> f32 {
        match self {
            NetValue::F32(v) => v,
            NetValue::U32(v) => v as f32,
            NetValue::Bool(v) => v as u32 as f32,
        }
    }

    #[inline]
    pub fn as_u32(self) -> u32 {
        match self {
            NetValue::F32(v) => v as u32,
            NetValue::U32(v) => v,
            NetValue::Bool(v) => v as u32,
        }
    }

    #[inline]
    pub fn as_bool(self) -> bool {
        match self {
            NetValue::F32(v) => v != 0.0,
            NetValue::U32(v) => v != 0,
            NetValue::Bool(v) => v,
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub enum NetError {
    ChannelMissing,
    NotOwner { owner: PeerId, writer: PeerId },
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NetError::ChannelMissing => write!(f, "replicated channel does not exist"),
            NetError::NotOwner { owner, writer } => {
                write!(f, "peer {writer} wrote a channel owned by peer {owner}")
            }
        }
    }
}

impl std::error::Error for NetError {}

/// The replication backend: a named value store with per-channel ownership.
pub trait ChannelBus {
    /// Create a channel if it does not exist. Re-defining an existing channel
    /// is a no-op (the current value is kept).
    fn define(&mut self, name: &str, owner: PeerId, default: NetValue);
    fn read(&self, name: &str) -> Option<NetValue>;
    fn write(&mut self, name: &str, writer: PeerId, value: NetValue) -> Result<(), NetError>;
}

struct Channel {
    owner: PeerId,
    value: NetValue,
}

/// In-memory bus used by the headless harness and by tests. A transport
/// implementation replicates the same trait surface over the session.
#[derive(Default)]
pub struct LocalBus {
    channels: HashMap<String, Channel>,
}

impl LocalBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl ChannelBus for LocalBus {
    fn define(&mut self, name: &str, owner: PeerId, default: NetValue) {
        if !self.channels.contains_key(name) {
            self.channels.insert(
                name.to_string(),
                Channel {
                    owner,
                    value: default,
                },
            );
        }
    }

    fn read(&self, name: &str) -> Option<NetValue> {
        self.channels.get(name).map(|c| c.value)
    }

    fn write(&mut self, name: &str, writer: PeerId, value: NetValue) -> Result<(), NetError> {
        let ch = self.channels.get_mut(name).ok_or(NetError::ChannelMissing)?;
        if ch.owner != writer {
            return Err(NetError::NotOwner {
                owner: ch.owner,
                writer,
            });
        }
        ch.value = value;
        Ok(())
    }
}

/// Replicated per-tick inputs for one actor.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ReplicatedInput {
    pub joy_x: f32,
    pub joy_y: f32,
    pub jump: bool,
    pub kick: bool,
    pub crouch: bool,
}

/// Replicated scalar state for one actor.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ReplicatedState {
    pub health: f32,
    pub action_flags: u32,
    pub state_flags: u32,
}

impl Default for ReplicatedState {
    fn default() -> Self {
        Self {
            health: NEUTRAL_HEALTH,
            action_flags: 0,
            state_flags: 0,
        }
    }
}

/// The channel bundle for one actor: joystick axes, three buttons, and three
/// scalar state channels. Channel names are keyed by the actor's scene-node
/// identity so every peer derives the same names independently.
pub struct ActorChannels {
    owner: PeerId,
    joy_x: String,
    joy_y: String,
    btn_jump: String,
    btn_kick: String,
    btn_crouch: String,
    health: String,
    action_flags: String,
    state_flags: String,
    defined: bool,
}

impl ActorChannels {
    pub fn new(node_key: u64, owner: PeerId) -> Self {
        let name = |field: &str| format!("actor/{node_key:016x}/{field}");
        Self {
            owner,
            joy_x: name("joy_x"),
            joy_y: name("joy_y"),
            btn_jump: name("jump"),
            btn_kick: name("kick"),
            btn_crouch: name("crouch"),
            health: name("health"),
            action_flags: name("action_flags"),
            state_flags: name("state_flags"),
            defined: false,
        }
    }

    pub fn owner(&self) -> PeerId {
        self.owner
    }

    /// Lazily define every channel with its neutral default. Owner-side only.
    pub fn ensure(&mut self, bus: &mut dyn ChannelBus) {
        if self.defined {
            return;
        }
        bus.define(&self.joy_x, self.owner, NetValue::F32(0.0));
        bus.define(&self.joy_y, self.owner, NetValue::F32(0.0));
        bus.define(&self.btn_jump, self.owner, NetValue::Bool(false));
        bus.define(&self.btn_kick, self.owner, NetValue::Bool(false));
        bus.define(&self.btn_crouch, self.owner, NetValue::Bool(false));
        bus.define(&self.health, self.owner, NetValue::F32(NEUTRAL_HEALTH));
        bus.define(&self.action_flags, self.owner, NetValue::U32(0));
        bus.define(&self.state_flags, self.owner, NetValue::U32(0));
        self.defined = true;
    }

    /// Owner write of the inputs that produced this tick. Called once per
    /// simulation tick, after sampling.
    pub fn write_inputs(
        &mut self,
        bus: &mut dyn ChannelBus,
        input: ReplicatedInput,
    ) -> Result<(), NetError> {
        self.ensure(bus);
        bus.write(&self.joy_x, self.owner, NetValue::F32(input.joy_x))?;
        bus.write(&self.joy_y, self.owner, NetValue::F32(input.joy_y))?;
        bus.write(&self.btn_jump, self.owner, NetValue::Bool(input.jump))?;
        bus.write(&self.btn_kick, self.owner, NetValue::Bool(input.kick))?;
        bus.write(&self.btn_crouch, self.owner, NetValue::Bool(input.crouch))?;
        Ok(())
    }

    /// Owner write of the post-tick scalar state.
    pub fn write_state(
        &mut self,
        bus: &mut dyn ChannelBus,
        state: ReplicatedState,
    ) -> Result<(), NetError> {
        self.ensure(bus);
        bus.write(&self.health, self.owner, NetValue::F32(state.health))?;
        bus.write(
            &self.action_flags,
            self.owner,
            NetValue::U32(state.action_flags),
        )?;
        bus.write(
            &self.state_flags,
            self.owner,
            NetValue::U32(state.state_flags),
        )?;
        Ok(())
    }

    /// Read the owner's replicated inputs; missing channels read neutral.
    pub fn read_inputs(&self, bus: &dyn ChannelBus) -> ReplicatedInput {
        ReplicatedInput {
            joy_x: bus.read(&self.joy_x).map_or(0.0, NetValue::as_f32),
            joy_y: bus.read(&self.joy_y).map_or(0.0, NetValue::as_f32),
            jump: bus.read(&self.btn_jump).is_some_and(NetValue::as_bool),
            kick: bus.read(&self.btn_kick).is_some_and(NetValue::as_bool),
            crouch: bus.read(&self.btn_crouch).is_some_and(NetValue::as_bool),
        }
    }

    /// Read the owner's replicated state; missing channels read neutral.
    pub fn read_state(&self, bus: &dyn ChannelBus) -> ReplicatedState {
        ReplicatedState {
            health: bus
                .read(&self.health)
                .map_or(NEUTRAL_HEALTH, NetValue::as_f32),
            action_flags: bus.read(&self.action_flags).map_or(0, NetValue::as_u32),
            state_flags: bus.read(&self.state_flags).map_or(0, NetValue::as_u32),
        }
    }
}
