// particle-field - GPU Particle Field Background
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

//! Decorative particle field: a flocking particle population advected on the
//! GPU, with an approximate per-texel nearest-particle map maintained by
//! propagating candidates from the adjacent texels plus one random probe, and
//! rendered as motion-blurred gaussian blobs.
//!
//! [`ParticleFieldEngine`] drives any [`FieldBackend`] from a
//! [`FrameScheduler`]. [`GpuField`] is the wgpu implementation and
//! [`CpuField`] the rayon reference model used for headless runs and tests.

pub mod backend;
pub mod cpu_field;
pub mod engine;
pub mod error;
pub mod field;
pub mod gpu_field;
pub mod kernels;
pub mod scheduler;
pub mod settings;
pub mod spatial_grid;
pub mod stats;

pub use backend::{FieldBackend, FrameInputs, MAX_TEXELS};
pub use cpu_field::CpuField;
pub use engine::{EngineState, FrameOutcome, ParticleFieldEngine};
pub use error::{EngineError, Result};
pub use field::{FieldSize, NeighborSlots, Particle, PingPong, NEIGHBOR_SLOTS};
pub use gpu_field::{GpuContext, GpuField};
pub use scheduler::{FrameRequest, FrameScheduler, ManualScheduler, WindowScheduler};
pub use settings::FieldSettings;
pub use spatial_grid::{neighbor_recall, SpatialGrid};
pub use stats::FieldStats;
