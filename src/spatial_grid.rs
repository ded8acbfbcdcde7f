// particle-field - GPU Particle Field Background
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

//! Exact nearest-particle queries over a toroidal field, bucketed in a
//! uniform grid. Measures how closely the per-texel neighbor map tracks the
//! true nearest particles.

use crate::field::{FieldSize, NeighborSlots, Particle};
use crate::kernels::{toroidal_distance_sq, EMPTY_DISTANCE};

pub struct SpatialGrid {
    // cells tile the field exactly, so the wrapped edge cells are full size
    cell_size: [f32; 2],
    cols: u32,
    rows: u32,
    extent: [f32; 2],
    cells: Vec<Vec<u32>>,
    active_count: u32,
}

impl SpatialGrid {
    /// Buckets particles with ids `1..=active_count`.
    pub fn build(particles: &[Particle], active_count: u32, size: FieldSize, cell_size: f32) -> Self {
        let target = cell_size.max(1.0);
        let cols = ((size.width as f32 / target).ceil() as u32).max(1);
        let rows = ((size.height as f32 / target).ceil() as u32).max(1);
        let cell_size = [size.width as f32 / cols as f32, size.height as f32 / rows as f32];
        let mut cells = vec![Vec::new(); (cols * rows) as usize];

        let active_count = active_count.min(particles.len() as u32);
        for id in 1..=active_count {
            let p = &particles[id as usize - 1];
            let (cx, cy) = Self::cell_coords(p.position, cell_size, cols, rows);
            cells[(cy * cols + cx) as usize].push(id);
        }

        Self {
            cell_size,
            cols,
            rows,
            extent: size.extent(),
            cells,
            active_count,
        }
    }

    fn cell_coords(position: [f32; 2], cell_size: [f32; 2], cols: u32, rows: u32) -> (u32, u32) {
        let cx = ((position[0].max(0.0) / cell_size[0]) as u32).min(cols - 1);
        let cy = ((position[1].max(0.0) / cell_size[1]) as u32).min(rows - 1);
        (cx, cy)
    }

    /// The `k` nearest active particles to `point`, nearest first, with squared
    /// toroidal distances.
    pub fn k_nearest(&self, particles: &[Particle], point: [f32; 2], k: usize) -> Vec<(u32, f32)> {
        if k == 0 || self.active_count == 0 {
            return Vec::new();
        }

        let mut best: Vec<(u32, f32)> = Vec::with_capacity(k + 1);
        let consider = |id: u32, best: &mut Vec<(u32, f32)>| {
            let d = toroidal_distance_sq(particles[id as usize - 1].position, point, self.extent);
            if best.len() < k || d < best[best.len() - 1].1 {
                let at = best.partition_point(|&(_, bd)| bd <= d);
                best.insert(at, (id, d));
                best.truncate(k);
            }
        };

        let (cx, cy) = Self::cell_coords(point, self.cell_size, self.cols, self.rows);
        let mut ring = 0u32;
        loop {
            // once a ring would wrap onto itself every bucket gets scanned
            if 2 * ring + 1 >= self.cols || 2 * ring + 1 >= self.rows {
                best.clear();
                for id in 1..=self.active_count {
                    consider(id, &mut best);
                }
                return best;
            }

            let r = ring as i64;
            for dy in -r..=r {
                for dx in -r..=r {
                    if dx.abs() != r && dy.abs() != r {
                        continue;
                    }
                    let x = (cx as i64 + dx).rem_euclid(self.cols as i64) as u32;
                    let y = (cy as i64 + dy).rem_euclid(self.rows as i64) as u32;
                    for &id in &self.cells[(y * self.cols + x) as usize] {
                        consider(id, &mut best);
                    }
                }
            }

            // anything outside the scanned square is at least `ring` cells away
            let reach = ring as f32 * self.cell_size[0].min(self.cell_size[1]);
            if best.len() == k && best[k - 1].1 <= reach * reach {
                return best;
            }
            ring += 1;
        }
    }

    pub fn nearest(&self, particles: &[Particle], point: [f32; 2]) -> Option<(u32, f32)> {
        self.k_nearest(particles, point, 1).into_iter().next()
    }
}

/// Fraction of sampled texels whose slot-0 neighbor is (one of) the exact
/// nearest active particles. Texels are sampled every `stride` pixels.
pub fn neighbor_recall(
    neighbors: &[NeighborSlots],
    particles: &[Particle],
    size: FieldSize,
    active_count: u32,
    stride: u32,
) -> f32 {
    let grid = SpatialGrid::build(particles, active_count, size, 16.0);
    let extent = size.extent();
    let stride = stride.max(1);

    let mut sampled = 0u32;
    let mut hits = 0u32;
    for y in (0..size.height).step_by(stride as usize) {
        for x in (0..size.width).step_by(stride as usize) {
            let center = [x as f32 + 0.5, y as f32 + 0.5];
            let Some((_, exact)) = grid.nearest(particles, center) else {
                continue;
            };
            sampled += 1;
            let slot0 = neighbors[size.index(x, y)][0];
            let found = if slot0 == 0 {
                EMPTY_DISTANCE
            } else {
                toroidal_distance_sq(particles[slot0 as usize - 1].position, center, extent)
            };
            if found <= exact + 1e-4 {
                hits += 1;
            }
        }
    }

    if sampled == 0 {
        0.0
    } else {
        hits as f32 / sampled as f32
    }
}
