// particle-field - GPU Particle Field Background
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

// Headless particle field render: runs FRAMES frames at WIDTHxHEIGHT, logs
// accumulator statistics and neighbor-map recall, and writes a PNG.
// Run with: FRAMES=120 cargo run --release --bin field_snapshot

use anyhow::Context;
use std::time::Instant;

use particle_field::{
    neighbor_recall, CpuField, EngineError, FieldBackend, FieldSettings, FieldStats, GpuField,
    ManualScheduler, ParticleFieldEngine,
};

const DEFAULT_FRAMES: u32 = 60;
const DEFAULT_WIDTH: u32 = 800;
const DEFAULT_HEIGHT: u32 = 600;
const RECALL_STRIDE: u32 = 8;

fn env_u32(name: &str, default: u32) -> u32 {
    match std::env::var(name) {
        Ok(value) => value.trim().parse().unwrap_or_else(|_| {
            log::warn!("{}={:?} is not a number, using {}", name, value, default);
            default
        }),
        Err(_) => default,
    }
}

fn run<B: FieldBackend>(
    mut engine: ParticleFieldEngine<B, ManualScheduler>,
    frames: u32,
    probe_count: u32,
) -> anyhow::Result<()> {
    engine.start()?;
    let started = Instant::now();
    for i in 0..frames {
        let request = engine
            .scheduler_mut()
            .next_due()
            .context("frame loop halted")?;
        engine.tick(request, i as f32 / 60.0)?;
    }
    let elapsed = started.elapsed().as_secs_f32();
    log::info!(
        "{} frames on {} backend in {:.2}s ({:.1} ms/frame)",
        frames,
        engine.backend().name(),
        elapsed,
        elapsed * 1000.0 / frames.max(1) as f32
    );

    let size = engine.size();
    let backend = engine.backend_mut();
    let stats = FieldStats::from_accumulator(&backend.read_accumulator()?);
    log::info!("{}", stats);
    if stats.is_uniform() || stats.is_saturated() {
        log::warn!("accumulator looks degenerate");
    }

    let particles = backend.read_particles()?;
    let neighbors = backend.read_neighbors()?;
    let recall = neighbor_recall(&neighbors, &particles, size, probe_count, RECALL_STRIDE);
    log::info!("neighbor map recall {:.1}%", recall * 100.0);

    let pixels = backend.read_display()?;
    let image = image::RgbaImage::from_raw(size.width, size.height, pixels)
        .context("display readback has the wrong size")?;
    let path = format!(
        "field_snapshot_{}.png",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    );
    image.save(&path)?;
    log::info!("wrote {}", path);

    engine.stop();
    Ok(())
}

fn main() -> anyhow::Result<()> {
    use env_logger::Env;
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let frames = env_u32("FRAMES", DEFAULT_FRAMES);
    let width = env_u32("WIDTH", DEFAULT_WIDTH);
    let height = env_u32("HEIGHT", DEFAULT_HEIGHT);
    let settings = FieldSettings::load_or_default(&FieldSettings::default_path())?;
    let seed_frames = settings.seed_frames;
    let probe_count = settings.probe_count(width, height);

    match GpuField::headless(width, height, settings.clone()) {
        Ok(backend) => run(
            ParticleFieldEngine::create(backend, ManualScheduler::new(), seed_frames),
            frames,
            probe_count,
        ),
        Err(EngineError::ContextUnavailable(reason)) => {
            log::warn!("no GPU ({}); falling back to the CPU model", reason);
            let backend = CpuField::new(width, height, settings)?;
            run(
                ParticleFieldEngine::create(backend, ManualScheduler::new(), seed_frames),
                frames,
                probe_count,
            )
        }
        Err(err) => Err(err.into()),
    }
}
