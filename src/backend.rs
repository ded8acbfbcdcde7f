// particle-field - GPU Particle Field Background
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

use crate::error::{EngineError, Result};
use crate::field::{FieldSize, NeighborSlots, Particle};

/// Largest texel count whose particle ids stay exact when stored as `f32`.
pub const MAX_TEXELS: usize = 1 << 24;

/// Per-frame values fed to the four passes.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct FrameInputs {
    /// Frame counter since create/resize (low 32 bits, used for hashing).
    pub frame: u32,
    /// True during the first seed frames; particles are re-seeded.
    pub seeding: bool,
    /// Host clock in seconds.
    pub time: f32,
}

/// A particle field implementation: owns the double-buffered particle,
/// neighbor and accumulator storage and runs update -> neighbor rebuild ->
/// rasterize/blend -> present once per `render_frame`.
pub trait FieldBackend {
    fn name(&self) -> &'static str;

    fn size(&self) -> FieldSize;

    /// Reallocates every target at `size`. On error the previous targets stay in place.
    fn resize(&mut self, size: FieldSize) -> Result<()>;

    /// Runs the four passes and swaps front/back.
    fn render_frame(&mut self, inputs: FrameInputs) -> Result<()>;

    /// Releases all resources. Idempotent.
    fn release(&mut self);

    fn is_released(&self) -> bool;

    /// Number of frames submitted since creation.
    fn submitted_frames(&self) -> u64;

    /// Latest particle state, one record per texel.
    fn read_particles(&mut self) -> Result<Vec<Particle>>;

    /// Latest neighbor map, one slot list per texel.
    fn read_neighbors(&mut self) -> Result<Vec<NeighborSlots>>;

    /// Latest accumulator, RGBA per texel.
    fn read_accumulator(&mut self) -> Result<Vec<[f32; 4]>>;

    /// Presented image as tightly packed RGBA8 rows.
    fn read_display(&mut self) -> Result<Vec<u8>>;
}

pub fn validate_size(size: FieldSize) -> Result<()> {
    if size.is_empty() || size.texel_count() >= MAX_TEXELS {
        return Err(EngineError::InvalidSize {
            width: size.width,
            height: size.height,
        });
    }
    Ok(())
}

/// Quantizes an accumulator texel to a display pixel.
#[inline]
pub fn to_display_pixel(texel: [f32; 4]) -> [u8; 4] {
    texel.map(|c| (c.clamp(0.0, 1.0) * 255.0 + 0.5) as u8)
}
