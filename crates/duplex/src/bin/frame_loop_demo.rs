//! # Frame Loop Demo
//!
//! Runs a few frames of texture/material churn on two threads and logs
//! what each sync pass sent.
//!
//! Usage: `frame_loop_demo [config.toml]`

use duplex::{FrameLoop, FrameLoopConfig, Material, Texture};
use duplex_core::{SyncConfig, SyncResult};

const FRAMES: u64 = 12;

fn main() -> SyncResult<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_thread_names(true)
        .init();

    let sync = match std::env::args().nth(1) {
        Some(path) => SyncConfig::from_toml_file(path)?,
        None => SyncConfig::default(),
    };
    let mut frame_loop = FrameLoop::new(FrameLoopConfig {
        sync,
        ..FrameLoopConfig::default()
    })?;

    let albedo = Texture::new(frame_loop.resources(), 64, 64);
    let normal = Texture::new(frame_loop.resources(), 64, 64);
    let ground = Material::new(frame_loop.resources());
    let rock = Material::new(frame_loop.resources());
    ground.set_texture(Some(&albedo))?;
    rock.set_texture(Some(&normal))?;

    let mut transient = Some(Texture::new(frame_loop.resources(), 8, 8));

    for _ in 0..FRAMES {
        let stats = frame_loop.run_frame(|ctx| match ctx.frame {
            // Resizing pulls `ground` in through the dependency.
            3 => albedo.resize(128, 128),
            5 => rock.set_color([0.4, 0.4, 0.45, 1.0]),
            7 => {
                if let Some(texture) = &transient {
                    texture.fill(0xFFFF_FFFF);
                }
                // Destroyed while dirty: its last delta still goes out.
                transient = None;
            }
            frame if frame % 4 == 0 => normal.fill(u32::try_from(frame).unwrap_or(0)),
            _ => {}
        })?;

        tracing::info!(
            frame = stats.frame,
            objects = stats.sync.objects_synced,
            forced = stats.sync.forced_dependants,
            retained = stats.sync.retained_flushed,
            bytes = stats.sync.bytes,
            "frame synced"
        );
    }

    frame_loop.finish()?;

    let ground_core = ground.core_handle().snapshot();
    tracing::info!(
        texture = %ground_core.texture,
        width = ground_core.texture_size.0,
        height = ground_core.texture_size.1,
        version = ground_core.version,
        "ground material on the core thread"
    );
    frame_loop.stats().log_summary();

    drop((ground, rock, albedo, normal));
    Ok(())
}
