// particle-field - GPU Particle Field Background
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

use bytemuck::{Pod, Zeroable};

/// Four neighbor candidates per texel. 1-based particle ids, 0 = empty slot.
pub type NeighborSlots = [u32; 4];

pub const NEIGHBOR_SLOTS: usize = 4;

/// One particle, laid out exactly like an `Rgba32Float` texel (x, y, vx, vy).
#[repr(C)]
#[derive(Debug, Default, Copy, Clone, PartialEq, Pod, Zeroable)]
pub struct Particle {
    pub position: [f32; 2],
    pub velocity: [f32; 2],
}

impl Particle {
    pub fn speed(&self) -> f32 {
        crate::kernels::length(self.velocity)
    }
}

/// Canvas size in pixels. The particle, neighbor and accumulator textures all
/// share it, one texel per pixel.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct FieldSize {
    pub width: u32,
    pub height: u32,
}

impl FieldSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Size with each dimension raised to at least 1. A minimized window
    /// reports 0x0; the field starts at 1x1 and grows on the first resize.
    pub fn at_least_one(width: u32, height: u32) -> Self {
        Self::new(width.max(1), height.max(1))
    }

    pub fn texel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn extent(&self) -> [f32; 2] {
        [self.width as f32, self.height as f32]
    }

    #[inline]
    pub fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    /// Texel holding the particle with 1-based `id`.
    #[inline]
    pub fn texel_of_id(&self, id: u32) -> (u32, u32) {
        let idx = id - 1;
        (idx % self.width, idx / self.width)
    }

    #[inline]
    pub fn id_of_texel(&self, x: u32, y: u32) -> u32 {
        self.index(x, y) as u32 + 1
    }

    /// Texel containing a canvas-space position, clamped to the field.
    #[inline]
    pub fn texel_at(&self, position: [f32; 2]) -> (u32, u32) {
        let x = (position[0].max(0.0) as u32).min(self.width - 1);
        let y = (position[1].max(0.0) as u32).min(self.height - 1);
        (x, y)
    }
}

/// A front/back pair. Passes read `back` (last frame's result) and write
/// `front`; `swap` exchanges the roles between frames.
#[derive(Debug)]
pub struct PingPong<T> {
    buffers: [T; 2],
    front: usize,
}

impl<T> PingPong<T> {
    pub fn new(a: T, b: T) -> Self {
        Self {
            buffers: [a, b],
            front: 0,
        }
    }

    pub fn front(&self) -> &T {
        &self.buffers[self.front]
    }

    pub fn back(&self) -> &T {
        &self.buffers[self.front ^ 1]
    }

    pub fn front_mut(&mut self) -> &mut T {
        &mut self.buffers[self.front]
    }

    /// Mutable front together with a shared back, for passes that read the
    /// previous frame while writing the next.
    pub fn split(&mut self) -> (&mut T, &T) {
        let (first, second) = self.buffers.split_at_mut(1);
        if self.front == 0 {
            (&mut first[0], &second[0])
        } else {
            (&mut second[0], &first[0])
        }
    }

    /// Index of the front buffer, used to pick precomputed bind groups.
    pub fn parity(&self) -> usize {
        self.front
    }

    pub fn swap(&mut self) {
        self.front ^= 1;
    }

    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.buffers.iter()
    }
}

impl<T: Clone> PingPong<T> {
    pub fn from_value(value: T) -> Self {
        Self::new(value.clone(), value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn particle_matches_rgba32float_texel() {
        assert_eq!(std::mem::size_of::<Particle>(), 16);
    }

    #[test]
    fn ids_round_trip_through_texels() {
        let size = FieldSize::new(7, 5);
        for y in 0..5 {
            for x in 0..7 {
                let id = size.id_of_texel(x, y);
                assert!(id >= 1);
                assert_eq!(size.texel_of_id(id), (x, y));
            }
        }
    }

    #[test]
    fn ping_pong_swaps_roles() {
        let mut pair = PingPong::new("a", "b");
        assert_eq!((*pair.front(), *pair.back()), ("a", "b"));
        pair.swap();
        assert_eq!((*pair.front(), *pair.back()), ("b", "a"));
        assert_eq!(pair.parity(), 1);

        let (front, back) = pair.split();
        assert_eq!((*front, *back), ("b", "a"));
    }

    #[test]
    fn minimized_window_size_becomes_one_texel() {
        assert_eq!(FieldSize::at_least_one(0, 0), FieldSize::new(1, 1));
        assert_eq!(FieldSize::at_least_one(0, 480), FieldSize::new(1, 480));
        assert_eq!(FieldSize::at_least_one(640, 480), FieldSize::new(640, 480));
    }

    #[test]
    fn texel_at_clamps_to_field() {
        let size = FieldSize::new(10, 10);
        assert_eq!(size.texel_at([-3.0, 4.5]), (0, 4));
        assert_eq!(size.texel_at([10.0, 9.99]), (9, 9));
    }
}
