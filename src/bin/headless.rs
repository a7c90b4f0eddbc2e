//! Headless soak harness: runs a full context against the stub engine (or a
//! real engine library when paths are given) and reports per-run statistics.
//!
//! Useful for profiling the coordinator and for exercising the whole frame
//! loop without a host scene.

use std::error::Error;
use std::path::Path;

use clap::Parser;
use log::{info, warn};
use puppet::{Config, Context, ContextSlot, FrameInput, InputFrame};
use puppet_geom::{Pose, Vec3};
use puppet_native::stub::StubEngine;
use puppet_native::{CharEngine, TerrainClass};
use puppet_net::LocalBus;
use puppet_surfaces::{ColliderDesc, ColliderShape, ColliderTag};

#[derive(Parser, Debug)]
#[command(name = "headless", about = "Soak the simulation coordinator without a host scene")]
struct Cli {
    /// Frames to run.
    #[arg(long, default_value_t = 3_000)]
    frames: u64,
    /// Frame period in milliseconds (60 fps by default; ticks are decoupled).
    #[arg(long, default_value_t = 16.0)]
    frame_ms: f64,
    /// Simulated remote peers, one actor each.
    #[arg(long, default_value_t = 3)]
    peers: u16,
    /// Optional TOML config file.
    #[arg(long)]
    config: Option<String>,
    /// Native engine shared library; the stub engine is used when absent.
    #[arg(long)]
    engine_lib: Option<String>,
    /// Engine asset bundle, required with --engine-lib.
    #[arg(long)]
    engine_data: Option<String>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    if let Err(e) = run(Cli::parse()) {
        eprintln!("headless: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn Error>> {
    let cfg = match &cli.config {
        Some(path) => Config::load_from_path(path)?,
        None => Config::default(),
    };

    let engine: Box<dyn CharEngine> = match (&cli.engine_lib, &cli.engine_data) {
        (Some(lib), Some(data)) => Box::new(puppet_native::LibraryEngine::load(
            Path::new(lib),
            Path::new(data),
        )?),
        (Some(_), None) => return Err("--engine-lib requires --engine-data".into()),
        _ => Box::new(StubEngine::new()),
    };

    let mut slot = ContextSlot::new();
    let ctx = slot
        .bind(1, true, || {
            Context::new(cfg.clone(), 1, 0, engine, Box::new(LocalBus::new()))
        })
        .map_err(|e| format!("bind failed: {e}"))?;

    populate_scene(ctx, cli.peers)?;

    let mut audio_out = vec![0.0f32; 4096];
    let mut drained: u64 = 0;
    for i in 0..cli.frames {
        let now_ms = i as f64 * cli.frame_ms;
        // Wiggle the stick so the local actor keeps moving.
        let phase = (now_ms / 1000.0).sin() as f32;
        let frame = FrameInput {
            now_ms,
            cam_pos: Vec3::new(0.0, 2.0, -5.0),
            cam_look: Vec3::new(phase, 0.0, 1.0),
            desktop: Some(InputFrame {
                joy_x: phase,
                joy_y: 1.0,
                jump: i % 97 == 0,
                ..Default::default()
            }),
            ..Default::default()
        };
        ctx.on_frame(&frame);
        drained += ctx.drain_audio(&mut audio_out) as u64;

        if i % 600 == 0 {
            let pose = ctx.actor(1).map(|a| a.render_pose());
            info!("frame {i}: ticks {} local pose {pose:?}", ctx.ticks());
        }
    }

    info!(
        "done: {} frames, {} ticks, {} actors, {} audio samples drained, {} blocks skipped",
        cli.frames,
        ctx.ticks(),
        ctx.actor_count(),
        drained,
        ctx.audio_skipped_blocks()
    );
    slot.release(1);
    Ok(())
}

fn populate_scene(ctx: &mut Context, peers: u16) -> Result<(), Box<dyn Error>> {
    ctx.spawn_actor(1, 0, Vec3::new(0.0, 0.0, 0.0))
        .map_err(|e| format!("local spawn: {e}"))?;
    for peer in 1..=peers {
        let node = 100 + peer as u64;
        if let Err(e) = ctx.spawn_actor(node, peer, Vec3::new(peer as f32 * 3.0, 0.0, 0.0)) {
            warn!("remote spawn for peer {peer} refused: {e}");
        }
    }

    // Ground slab, a drifting platform, a pool and a couple of pickups.
    ctx.collider_changed(ColliderDesc {
        id: 1,
        tag: ColliderTag::Static,
        enabled: true,
        active: true,
        character_collidable: true,
        trigger: false,
        pose: Pose::new(Vec3::new(0.0, -1.0, 0.0), 0.0),
        scale: Vec3::new(1.0, 1.0, 1.0),
        shape: ColliderShape::Box {
            half: Vec3::new(100.0, 1.0, 100.0),
        },
        terrain: TerrainClass::Default,
        owner_node: None,
    });
    ctx.collider_changed(ColliderDesc {
        id: 2,
        tag: ColliderTag::Dynamic,
        pose: Pose::new(Vec3::new(4.0, 1.0, 4.0), 0.0),
        shape: ColliderShape::Box {
            half: Vec3::new(2.0, 0.25, 2.0),
        },
        ..ground_like(2)
    });
    ctx.collider_changed(ColliderDesc {
        id: 3,
        tag: ColliderTag::Water,
        trigger: true,
        character_collidable: false,
        pose: Pose::new(Vec3::new(-20.0, -2.0, 0.0), 0.0),
        shape: ColliderShape::Box {
            half: Vec3::new(8.0, 2.0, 8.0),
        },
        ..ground_like(3)
    });
    ctx.collider_changed(ColliderDesc {
        id: 4,
        tag: ColliderTag::parse("heal"),
        trigger: true,
        character_collidable: false,
        pose: Pose::new(Vec3::new(6.0, 1.0, 0.0), 0.0),
        shape: ColliderShape::Sphere { radius: 0.5 },
        ..ground_like(4)
    });
    Ok(())
}

fn ground_like(id: u64) -> ColliderDesc {
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
