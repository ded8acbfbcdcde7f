// particle-field - GPU Particle Field Background
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

use std::sync::Arc;
use std::time::Instant;

use particle_field::{EngineError, FieldSettings, FrameOutcome, ParticleFieldEngine};
use winit::{
    event::*,
    event_loop::EventLoop,
    keyboard::{KeyCode, PhysicalKey},
};

const WINDOW_TITLE: &str = "Particle Field";

/// Frame-rate readout for the window title, refreshed twice a second.
struct FrameTimer {
    frames: u32,
    last_update: Instant,
}

impl FrameTimer {
    fn new() -> Self {
        Self {
            frames: 0,
            last_update: Instant::now(),
        }
    }

    fn frame(&mut self, window: &winit::window::Window) {
        self.frames += 1;
        let elapsed = self.last_update.elapsed().as_secs_f32();
        if elapsed >= 0.5 {
            let fps = self.frames as f32 / elapsed;
            let size = window.inner_size();
            window.set_title(&format!(
                "{} - {}x{} | {:.0} FPS | {:.2} ms/frame",
                WINDOW_TITLE,
                size.width,
                size.height,
                fps,
                1000.0 / fps.max(1e-3)
            ));
            self.frames = 0;
            self.last_update = Instant::now();
        }
    }
}

fn main() -> anyhow::Result<()> {
    use env_logger::Env;
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let settings_path = FieldSettings::default_path();
    let settings = match FieldSettings::load_or_default(&settings_path) {
        Ok(settings) => settings,
        Err(err) => {
            log::warn!("ignoring {}: {}", settings_path.display(), err);
            FieldSettings::default()
        }
    };

    let event_loop = EventLoop::new()?;
    let window = Arc::new(
        event_loop.create_window(
            winit::window::WindowAttributes::default()
                .with_title(WINDOW_TITLE)
                .with_inner_size(winit::dpi::LogicalSize::new(1280, 720)),
        )?,
    );

    let mut engine = match ParticleFieldEngine::for_window(window.clone(), settings) {
        Ok(engine) => engine,
        Err(EngineError::ContextUnavailable(reason)) => {
            // the page simply goes without the effect
            log::warn!("particle field disabled: {}", reason);
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };
    engine.start()?;

    let started = Instant::now();
    let mut timer = FrameTimer::new();

    event_loop.run(move |event, target| {
        if let Event::WindowEvent { ref event, window_id } = event {
            if window_id != window.id() {
                return;
            }
            match event {
                WindowEvent::CloseRequested
                | WindowEvent::KeyboardInput {
                    event:
                        KeyEvent {
                            physical_key: PhysicalKey::Code(KeyCode::Escape),
                            state: ElementState::Pressed,
                            ..
                        },
                    ..
                } => {
                    engine.stop();
                    target.exit();
                }
                WindowEvent::Resized(size) => {
                    if let Err(err) = engine.on_resize(size.width, size.height) {
                        log::error!("resize failed, keeping previous field: {}", err);
                    }
                }
                WindowEvent::RedrawRequested => {
                    let Some(request) = engine.scheduler_mut().take_due() else {
                        return;
                    };
                    match engine.tick(request, started.elapsed().as_secs_f32()) {
                        Ok(FrameOutcome::Rendered) => timer.frame(&window),
                        Ok(FrameOutcome::Skipped) => {}
                        Err(err) => {
                            log::error!("particle field halted: {}", err);
                            engine.stop();
                            target.exit();
                        }
                    }
                }
                _ => {}
            }
        }
    })?;

    Ok(())
}
