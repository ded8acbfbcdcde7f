// particle-field - GPU Particle Field Background
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

use thiserror::Error;

/// Errors surfaced by the particle field engine and its backends.
#[derive(Debug, Error)]
pub enum EngineError {
    /// No adapter, device or surface could be acquired. The host should
    /// simply not show the effect.
    #[error("graphics context unavailable: {0}")]
    ContextUnavailable(String),

    /// Render target (re)allocation failed. The engine keeps its previous targets.
    #[error("render target allocation failed: {0}")]
    Allocation(String),

    #[error("invalid field size {width}x{height}")]
    InvalidSize { width: u32, height: u32 },

    #[error("surface error: {0}")]
    Surface(#[from] wgpu::SurfaceError),

    #[error("readback failed: {0}")]
    Readback(String),

    /// The engine was stopped and its resources released.
    #[error("engine has been disposed")]
    Disposed,
}

pub type Result<T> = std::result::Result<T, EngineError>;
