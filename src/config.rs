//! Runtime configuration, loaded from TOML with full defaults.

use std::error::Error;
use std::fs;
use std::path::Path;

use serde::Deserialize;

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    /// Wall-clock period between authoritative simulation ticks.
    pub tick_interval_ms: f64,
    /// Global world scale; changing it invalidates all derived native geometry.
    pub scale: f32,
    /// Total triangles the static surface set may hold.
    pub triangle_budget: usize,
    /// Actors one participant may have alive at once.
    pub actor_quota_per_owner: usize,
    /// How many of another participant's actors are fully animated locally.
    pub remote_animated_cap: usize,
    /// Remote actors farther than this from the viewpoint are culled.
    pub cull_distance: f32,
    /// Static rebuild debounce window.
    pub debounce_ms: f64,
    /// Destroy actors after the post-death delay instead of keeping a hidden corpse.
    pub despawn_on_death: bool,
    pub audio: AudioConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tick_interval_ms: 33.0,
            scale: 1.0,
            triangle_budget: 150_000,
            actor_quota_per_owner: 2,
            remote_animated_cap: 4,
            cull_distance: 64.0,
            debounce_ms: 250.0,
            despawn_on_death: true,
            audio: AudioConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default)]
pub struct AudioConfig {
    pub enabled: bool,
    pub volume: f32,
    pub target_rate: u32,
    /// Outbound ring capacity in stereo frames.
    pub ring_capacity_frames: usize,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            volume: 1.0,
            target_rate: 48_000,
            ring_capacity_frames: 16_384,
        }
    }
}

impl Config {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, Box<dyn Error>> {
        let text = fs::read_to_string(path)?;
        let cfg: Config = toml::from_str(&text)?;
        Ok(cfg)
    }
}
