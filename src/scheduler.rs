// particle-field - GPU Particle Field Background
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

use std::collections::VecDeque;
use std::sync::Arc;
use winit::window::Window;

/// Handle of one requested animation frame.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct FrameRequest(u64);

impl FrameRequest {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Source of animation-frame callbacks. The engine keeps at most one request
/// outstanding and cancels it on stop.
pub trait FrameScheduler {
    fn request_frame(&mut self) -> FrameRequest;
    fn cancel_frame(&mut self, request: FrameRequest);
}

/// Scheduler fired by hand. Used by headless runs and tests.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    next_id: u64,
    pending: VecDeque<FrameRequest>,
    requested: u64,
    cancelled: u64,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Oldest request still waiting to fire.
    pub fn next_due(&mut self) -> Option<FrameRequest> {
        self.pending.pop_front()
    }

    pub fn outstanding(&self) -> usize {
        self.pending.len()
    }

    pub fn requested_count(&self) -> u64 {
        self.requested
    }

    pub fn cancelled_count(&self) -> u64 {
        self.cancelled
    }
}

impl FrameScheduler for ManualScheduler {
    fn request_frame(&mut self) -> FrameRequest {
        self.next_id += 1;
        self.requested += 1;
        let request = FrameRequest(self.next_id);
        self.pending.push_back(request);
        request
    }

    fn cancel_frame(&mut self, request: FrameRequest) {
        let before = self.pending.len();
        self.pending.retain(|pending| *pending != request);
        if self.pending.len() != before {
            self.cancelled += 1;
        }
    }
}

/// Maps frame requests onto winit redraw requests.
pub struct WindowScheduler {
    window: Arc<Window>,
    next_id: u64,
    outstanding: Option<FrameRequest>,
}

impl WindowScheduler {
    pub fn new(window: Arc<Window>) -> Self {
        Self {
            window,
            next_id: 0,
            outstanding: None,
        }
    }

    /// Called on `RedrawRequested`; yields the request the redraw answers, if any.
    pub fn take_due(&mut self) -> Option<FrameRequest> {
        self.outstanding.take()
    }

    pub fn window(&self) -> &Arc<Window> {
        &self.window
    }
}

impl FrameScheduler for WindowScheduler {
    fn request_frame(&mut self) -> FrameRequest {
        self.next_id += 1;
        let request = FrameRequest(self.next_id);
        self.outstanding = Some(request);
        self.window.request_redraw();
        request
    }

    fn cancel_frame(&mut self, request: FrameRequest) {
        // winit cannot retract a redraw; dropping the handle turns it into a no-op
        if self.outstanding == Some(request) {
            self.outstanding = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_scheduler_fires_in_request_order() {
        let mut scheduler = ManualScheduler::new();
        let first = scheduler.request_frame();
        let second = scheduler.request_frame();
        assert_ne!(first, second);
        assert_eq!(scheduler.next_due(), Some(first));
        assert_eq!(scheduler.next_due(), Some(second));
        assert_eq!(scheduler.next_due(), None);
    }

    #[test]
    fn cancelled_requests_never_fire() {
        let mut scheduler = ManualScheduler::new();
        let request = scheduler.request_frame();
        scheduler.cancel_frame(request);
        assert_eq!(scheduler.outstanding(), 0);
        assert_eq!(scheduler.cancelled_count(), 1);
        assert_eq!(scheduler.next_due(), None);

        // cancelling twice is harmless
        scheduler.cancel_frame(request);
        assert_eq!(scheduler.cancelled_count(), 1);
    }
}
