// particle-field - GPU Particle Field Background
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

use std::sync::Arc;
use winit::window::Window;

use crate::backend::{FieldBackend, FrameInputs};
use crate::error::{EngineError, Result};
use crate::field::FieldSize;
use crate::gpu_field::GpuField;
use crate::scheduler::{FrameRequest, FrameScheduler, WindowScheduler};
use crate::settings::FieldSettings;

const FRAME_LOG_INTERVAL: u64 = 600;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum EngineState {
    /// Resources allocated, no frame loop.
    Ready,
    /// A frame request is outstanding (or being serviced).
    Running,
    /// `stop` released everything.
    Disposed,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    Rendered,
    /// Stale or cancelled request; nothing was submitted.
    Skipped,
}

/// Drives a particle field backend from animation-frame callbacks.
///
/// Lifecycle: `create` -> Ready -> `start` -> Running -> `tick`* -> `stop` -> Disposed.
/// `on_resize` is accepted in Ready and Running and re-seeds the field.
pub struct ParticleFieldEngine<B: FieldBackend, S: FrameScheduler> {
    backend: B,
    scheduler: S,
    state: EngineState,
    frame: u64,
    seed_frames: u64,
    pending: Option<FrameRequest>,
}

impl<B: FieldBackend, S: FrameScheduler> ParticleFieldEngine<B, S> {
    /// Wraps an allocated backend. `seed_frames` is how many frames after
    /// create/resize re-seed the particles.
    pub fn create(backend: B, scheduler: S, seed_frames: u32) -> Self {
        let size = backend.size();
        log::info!(
            "particle field engine created ({} backend, {}x{})",
            backend.name(),
            size.width,
            size.height
        );
        Self {
            backend,
            scheduler,
            state: EngineState::Ready,
            frame: 0,
            seed_frames: seed_frames.max(1) as u64,
            pending: None,
        }
    }

    pub fn start(&mut self) -> Result<()> {
        match self.state {
            EngineState::Disposed => Err(EngineError::Disposed),
            EngineState::Running => Ok(()),
            EngineState::Ready => {
                self.state = EngineState::Running;
                self.pending = Some(self.scheduler.request_frame());
                log::debug!("particle field started");
                Ok(())
            }
        }
    }

    /// Cancels the pending frame, releases the backend and resets the frame
    /// counter. Safe to call in any state.
    pub fn stop(&mut self) {
        if let Some(request) = self.pending.take() {
            self.scheduler.cancel_frame(request);
        }
        if self.state != EngineState::Disposed {
            self.backend.release();
            log::info!("particle field stopped after {} frames", self.frame);
        }
        self.frame = 0;
        self.state = EngineState::Disposed;
    }

    /// Reallocates every target at the new size and restarts seeding.
    /// Zero-sized requests (minimized windows) are ignored. On failure the
    /// previous targets and frame counter are kept.
    pub fn on_resize(&mut self, width: u32, height: u32) -> Result<()> {
        if self.state == EngineState::Disposed {
            return Err(EngineError::Disposed);
        }
        if width == 0 || height == 0 {
            log::warn!("ignoring resize to {}x{}", width, height);
            return Ok(());
        }

        let size = FieldSize::new(width, height);
        if let Err(err) = self.backend.resize(size) {
            log::error!("resize to {}x{} failed: {}", width, height, err);
            return Err(err);
        }
        self.frame = 0;
        log::info!("particle field resized to {}x{}", width, height);
        Ok(())
    }

    /// Animation-frame callback. Renders only if `request` is the one this
    /// engine is waiting for, then asks for the next frame. An error stops
    /// the loop: no further frame is requested.
    pub fn tick(&mut self, request: FrameRequest, time: f32) -> Result<FrameOutcome> {
        if self.state != EngineState::Running || self.pending != Some(request) {
            return Ok(FrameOutcome::Skipped);
        }
        self.pending = None;

        let inputs = FrameInputs {
            frame: self.frame as u32,
            seeding: self.frame < self.seed_frames,
            time,
        };
        if let Err(err) = self.backend.render_frame(inputs) {
            log::error!("frame {} failed: {}", self.frame, err);
            self.state = EngineState::Ready;
            return Err(err);
        }
        self.frame += 1;
        if self.frame % FRAME_LOG_INTERVAL == 0 {
            log::debug!(
                "frame {} ({} submitted)",
                self.frame,
                self.backend.submitted_frames()
            );
        }

        self.pending = Some(self.scheduler.request_frame());
        Ok(FrameOutcome::Rendered)
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == EngineState::Running
    }

    /// Frames rendered since create or the last resize.
    pub fn frame_index(&self) -> u64 {
        self.frame
    }

    pub fn size(&self) -> FieldSize {
        self.backend.size()
    }

    pub fn pending_frame(&self) -> Option<FrameRequest> {
        self.pending
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn scheduler(&self) -> &S {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut S {
        &mut self.scheduler
    }
}

impl ParticleFieldEngine<GpuField, WindowScheduler> {
    /// GPU engine rendering into `window`. Fails with
    /// `EngineError::ContextUnavailable` when no adapter or device exists.
    pub fn for_window(window: Arc<Window>, settings: FieldSettings) -> Result<Self> {
        let inner = window.inner_size();
        let size = FieldSize::at_least_one(inner.width, inner.height);
        if size.width != inner.width || size.height != inner.height {
            log::warn!(
                "window is {}x{}; starting at {}x{} until the first resize",
                inner.width,
                inner.height,
                size.width,
                size.height
            );
        }
        let seed_frames = settings.seed_frames;
        let backend = GpuField::with_surface(window.clone(), size.width, size.height, settings)?;
        Ok(Self::create(backend, WindowScheduler::new(window), seed_frames))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cpu_field::CpuField;
    use crate::scheduler::ManualScheduler;

    fn engine(width: u32, height: u32) -> ParticleFieldEngine<CpuField, ManualScheduler> {
        let settings = FieldSettings {
            seed: Some(3),
            ..FieldSettings::default()
        };
        let seed_frames = settings.seed_frames;
        let backend = CpuField::new(width, height, settings).unwrap();
        ParticleFieldEngine::create(backend, ManualScheduler::new(), seed_frames)
    }

    fn run_frames(engine: &mut ParticleFieldEngine<CpuField, ManualScheduler>, frames: u32) {
        for i in 0..frames {
            let request = engine.scheduler_mut().next_due().expect("frame requested");
            let outcome = engine.tick(request, i as f32 / 60.0).unwrap();
            assert_eq!(outcome, FrameOutcome::Rendered);
        }
    }

    #[test]
    fn create_starts_ready_without_requests() {
        let engine = engine(16, 16);
        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(engine.scheduler().requested_count(), 0);
        assert_eq!(engine.frame_index(), 0);
    }

    #[test]
    fn start_twice_keeps_a_single_loop() {
        let mut engine = engine(16, 16);
        engine.start().unwrap();
        engine.start().unwrap();
        assert_eq!(engine.scheduler().outstanding(), 1);

        run_frames(&mut engine, 5);
        assert_eq!(engine.scheduler().outstanding(), 1);
        assert_eq!(engine.backend().submitted_frames(), 5);
        assert_eq!(engine.frame_index(), 5);
    }

    #[test]
    fn stale_request_is_skipped() {
        let mut engine = engine(16, 16);
        engine.start().unwrap();
        let first = engine.scheduler_mut().next_due().unwrap();
        assert_eq!(engine.tick(first, 0.0).unwrap(), FrameOutcome::Rendered);
        // replaying an already serviced request does nothing
        assert_eq!(engine.tick(first, 0.1).unwrap(), FrameOutcome::Skipped);
        assert_eq!(engine.backend().submitted_frames(), 1);
    }

    #[test]
    fn stop_cancels_pending_frame_and_releases() {
        let mut engine = engine(16, 16);
        engine.start().unwrap();
        run_frames(&mut engine, 3);
        let pending = engine.pending_frame().unwrap();

        engine.stop();
        assert_eq!(engine.state(), EngineState::Disposed);
        assert_eq!(engine.frame_index(), 0);
        assert!(engine.backend().is_released());
        assert_eq!(engine.scheduler().cancelled_count(), 1);
        assert_eq!(engine.scheduler().outstanding(), 0);

        // a callback that was already in flight does no work
        assert_eq!(engine.tick(pending, 1.0).unwrap(), FrameOutcome::Skipped);
        assert_eq!(engine.backend().submitted_frames(), 3);
    }

    #[test]
    fn stop_is_safe_when_idle_or_repeated() {
        let mut engine = engine(16, 16);
        engine.stop();
        engine.stop();
        assert_eq!(engine.state(), EngineState::Disposed);
        assert!(matches!(engine.start(), Err(EngineError::Disposed)));
        assert!(matches!(engine.on_resize(8, 8), Err(EngineError::Disposed)));
    }

    #[test]
    fn resize_resets_frame_counter_and_keeps_running() {
        let mut engine = engine(16, 16);
        engine.start().unwrap();
        run_frames(&mut engine, 6);
        assert_eq!(engine.frame_index(), 6);

        engine.on_resize(24, 12).unwrap();
        assert_eq!(engine.frame_index(), 0);
        assert_eq!(engine.size(), FieldSize::new(24, 12));
        assert!(engine.is_running());
        assert_eq!(engine.scheduler().outstanding(), 1);
    }

    #[test]
    fn resize_while_ready_does_not_start() {
        let mut engine = engine(16, 16);
        engine.on_resize(32, 32).unwrap();
        assert_eq!(engine.state(), EngineState::Ready);
        assert_eq!(engine.scheduler().requested_count(), 0);
    }

    #[test]
    fn zero_sized_resize_is_ignored() {
        let mut engine = engine(16, 16);
        engine.start().unwrap();
        run_frames(&mut engine, 2);
        engine.on_resize(0, 0).unwrap();
        assert_eq!(engine.size(), FieldSize::new(16, 16));
        assert_eq!(engine.frame_index(), 2);
    }

    #[test]
    fn failed_frame_halts_the_loop() {
        let mut engine = engine(16, 16);
        engine.start().unwrap();
        let request = engine.scheduler_mut().next_due().unwrap();
        engine.backend_mut().release();

        assert!(engine.tick(request, 0.0).is_err());
        assert_eq!(engine.pending_frame(), None);
        assert_eq!(engine.scheduler().outstanding(), 0);
        assert_eq!(engine.state(), EngineState::Ready);
    }
}
