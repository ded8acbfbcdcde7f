// particle-field - GPU Particle Field Background
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

//! Headless reference model of the particle field. Particles, neighbor slots
//! and the accumulator are plain arrays indexed like the GPU textures; each
//! pass is a rayon loop over rows doing the same arithmetic as its shader.

use rayon::prelude::*;

use crate::backend::{to_display_pixel, validate_size, FieldBackend, FrameInputs};
use crate::error::{EngineError, Result};
use crate::field::{FieldSize, NeighborSlots, Particle, PingPong, NEIGHBOR_SLOTS};
use crate::kernels::{
    self, mix2, palette_color, probe_id, rand4, randn, toroidal_distance_sq, toroidal_offset,
    update_seed, wrap_coord, EMPTY_DISTANCE, TAU,
};
use crate::settings::FieldSettings;

struct CpuBuffers {
    particles: PingPong<Vec<Particle>>,
    neighbors: PingPong<Vec<NeighborSlots>>,
    accumulator: PingPong<Vec<[f32; 4]>>,
    display: Vec<[u8; 4]>,
}

impl CpuBuffers {
    fn new(size: FieldSize) -> Self {
        let texels = size.texel_count();
        Self {
            particles: PingPong::from_value(vec![Particle::default(); texels]),
            neighbors: PingPong::from_value(vec![[0; NEIGHBOR_SLOTS]; texels]),
            accumulator: PingPong::from_value(vec![[0.0; 4]; texels]),
            display: vec![[0; 4]; texels],
        }
    }
}

pub struct CpuField {
    settings: FieldSettings,
    instance_seed: u32,
    size: FieldSize,
    submitted_frames: u64,
    buffers: Option<CpuBuffers>,
}

impl CpuField {
    pub fn new(width: u32, height: u32, settings: FieldSettings) -> Result<Self> {
        let size = FieldSize::new(width, height);
        validate_size(size)?;
        let mut settings = settings;
        settings.sanitize();
        let instance_seed = settings.seed.unwrap_or_else(rand::random);
        log::info!(
            "CPU particle field {}x{} ({} probe ids)",
            width,
            height,
            settings.probe_count(width, height)
        );
        Ok(Self {
            settings,
            instance_seed,
            size,
            submitted_frames: 0,
            buffers: Some(CpuBuffers::new(size)),
        })
    }

    pub fn settings(&self) -> &FieldSettings {
        &self.settings
    }

    pub fn instance_seed(&self) -> u32 {
        self.instance_seed
    }

    /// Latest particle state, without copying.
    pub fn particles(&self) -> Option<&[Particle]> {
        self.buffers.as_ref().map(|b| b.particles.front().as_slice())
    }

    pub fn neighbors(&self) -> Option<&[NeighborSlots]> {
        self.buffers.as_ref().map(|b| b.neighbors.front().as_slice())
    }

    pub fn accumulator(&self) -> Option<&[[f32; 4]]> {
        self.buffers.as_ref().map(|b| b.accumulator.front().as_slice())
    }

    /// Overwrites one particle in the latest state. The next update pass reads it.
    pub fn set_particle(&mut self, x: u32, y: u32, particle: Particle) -> Result<()> {
        let size = self.size;
        let buffers = self.buffers.as_mut().ok_or(EngineError::Disposed)?;
        buffers.particles.front_mut()[size.index(x, y)] = particle;
        Ok(())
    }

    fn buffers_mut(&mut self) -> Result<&mut CpuBuffers> {
        self.buffers.as_mut().ok_or(EngineError::Disposed)
    }
}

impl FieldBackend for CpuField {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn size(&self) -> FieldSize {
        self.size
    }

    fn resize(&mut self, size: FieldSize) -> Result<()> {
        validate_size(size)?;
        if self.buffers.is_none() {
            return Err(EngineError::Disposed);
        }
        self.buffers = Some(CpuBuffers::new(size));
        self.size = size;
        Ok(())
    }

    fn render_frame(&mut self, inputs: FrameInputs) -> Result<()> {
        let size = self.size;
        let settings = self.settings.clone();
        let seed = self.instance_seed;
        let buffers = self.buffers_mut()?;

        // Buffers are swapped after every pass; "front" always holds the newest data.
        buffers.particles.swap();
        {
            let neighbors = buffers.neighbors.front();
            let (out, prev) = buffers.particles.split();
            update_particles(out, prev, neighbors, size, &settings, inputs, seed);
        }

        buffers.neighbors.swap();
        {
            let particles = buffers.particles.front();
            let (out, prev) = buffers.neighbors.split();
            let probe_count = settings.probe_count(size.width, size.height);
            rebuild_neighbors(out, prev, particles, size, inputs.frame, seed, probe_count);
        }

        buffers.accumulator.swap();
        {
            let particles = buffers.particles.front();
            let neighbors = buffers.neighbors.front();
            let (out, prev) = buffers.accumulator.split();
            blend_accumulator(out, prev, neighbors, particles, size, &settings);
        }

        present(&mut buffers.display, buffers.accumulator.front());

        self.submitted_frames += 1;
        Ok(())
    }

    fn release(&mut self) {
        if self.buffers.take().is_some() {
            log::info!("CPU particle field released");
        }
    }

    fn is_released(&self) -> bool {
        self.buffers.is_none()
    }

    fn submitted_frames(&self) -> u64 {
        self.submitted_frames
    }

    fn read_particles(&mut self) -> Result<Vec<Particle>> {
        self.particles().map(<[Particle]>::to_vec).ok_or(EngineError::Disposed)
    }

    fn read_neighbors(&mut self) -> Result<Vec<NeighborSlots>> {
        self.neighbors().map(<[NeighborSlots]>::to_vec).ok_or(EngineError::Disposed)
    }

    fn read_accumulator(&mut self) -> Result<Vec<[f32; 4]>> {
        self.accumulator().map(<[[f32; 4]]>::to_vec).ok_or(EngineError::Disposed)
    }

    fn read_display(&mut self) -> Result<Vec<u8>> {
        let buffers = self.buffers.as_ref().ok_or(EngineError::Disposed)?;
        Ok(bytemuck::cast_slice(&buffers.display).to_vec())
    }
}

#[inline]
fn particle_by_id(particles: &[Particle], id: u32) -> Option<&Particle> {
    if id == 0 {
        None
    } else {
        particles.get(id as usize - 1)
    }
}

/// Pass 1: seeding, toroidal wrap, flocking forces, noise and integration.
pub fn update_particles(
    out: &mut [Particle],
    prev: &[Particle],
    neighbors: &[NeighborSlots],
    size: FieldSize,
    settings: &FieldSettings,
    inputs: FrameInputs,
    instance_seed: u32,
) {
    let extent = size.extent();
    out.par_chunks_mut(size.width as usize)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, slot) in row.iter_mut().enumerate() {
                let (x, y) = (x as u32, y as u32);
                let state = prev[size.index(x, y)];
                let mut position = [
                    wrap_coord(state.position[0], extent[0]),
                    wrap_coord(state.position[1], extent[1]),
                ];
                let mut velocity = state.velocity;

                let r = rand4(update_seed(x, y, inputs.frame, inputs.time, instance_seed));
                if inputs.seeding {
                    position = [
                        wrap_coord(r[0].abs() * extent[0], extent[0]),
                        wrap_coord(r[1].abs() * extent[1], extent[1]),
                    ];
                    let phase = TAU * r[2];
                    velocity = [
                        settings.target_speed * phase.cos(),
                        settings.target_speed * (TAU * 0.25 + phase).cos(),
                    ];
                }

                let (cx, cy) = size.texel_at(position);
                let mut average = [0.0f32; 2];
                let mut repulsion = [0.0f32; 2];
                for &id in neighbors[size.index(cx, cy)].iter() {
                    let Some(other) = particle_by_id(prev, id) else {
                        continue;
                    };
                    average[0] += other.velocity[0] * 0.25;
                    average[1] += other.velocity[1] * 0.25;

                    let d = toroidal_offset(position, other.position, extent);
                    let dist = kernels::length(d);
                    if dist > settings.repulsion_min && dist < settings.repulsion_range {
                        let weight = 1.0 / (dist * (dist + settings.repulsion_falloff));
                        repulsion[0] += d[0] * weight;
                        repulsion[1] += d[1] * weight;
                    }
                }

                velocity[0] += repulsion[0] * settings.repulsion_scale;
                velocity[1] += repulsion[1] * settings.repulsion_scale;
                velocity = mix2(velocity, average, settings.viscosity);

                let speed = kernels::length(velocity);
                if speed > 0.001 {
                    let target = [
                        velocity[0] / speed * settings.target_speed,
                        velocity[1] / speed * settings.target_speed,
                    ];
                    velocity = mix2(velocity, target, settings.speed_relax);
                }

                let noise = randn([r[0], r[1]]);
                velocity[0] += noise[0] * settings.noise_scale;
                velocity[1] += noise[1] * settings.noise_scale;

                position = [
                    wrap_coord(position[0] + velocity[0], extent[0]),
                    wrap_coord(position[1] + velocity[1], extent[1]),
                ];
                *slot = Particle { position, velocity };
            }
        });
}

/// Sorted insert into a 4-slot list keyed by distance. Ignores id 0, ids
/// already present and candidates farther than every slot.
pub fn list_insert(
    ids: &mut NeighborSlots,
    dists: &mut [f32; NEIGHBOR_SLOTS],
    id: u32,
    dist: f32,
) {
    if id == 0 || ids.contains(&id) {
        return;
    }
    let Some(slot) = dists.iter().position(|&d| dist < d) else {
        return;
    };
    for j in (slot + 1..NEIGHBOR_SLOTS).rev() {
        ids[j] = ids[j - 1];
        dists[j] = dists[j - 1];
    }
    ids[slot] = id;
    dists[slot] = dist;
}

/// Pass 2: gathers candidates from this texel, its four axis neighbors and
/// one random probe, keeping the four nearest by toroidal distance.
pub fn rebuild_neighbors(
    out: &mut [NeighborSlots],
    prev: &[NeighborSlots],
    particles: &[Particle],
    size: FieldSize,
    frame: u32,
    instance_seed: u32,
    probe_count: u32,
) {
    let extent = size.extent();
    let max_x = size.width - 1;
    let max_y = size.height - 1;
    out.par_chunks_mut(size.width as usize)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, slot) in row.iter_mut().enumerate() {
                let (x, y) = (x as u32, y as u32);
                let texel_center = [x as f32 + 0.5, y as f32 + 0.5];
                let distance_of = |id: u32| match particle_by_id(particles, id) {
                    Some(p) => toroidal_distance_sq(p.position, texel_center, extent),
                    None => EMPTY_DISTANCE,
                };

                let candidates = [
                    prev[size.index(x, y)],
                    prev[size.index((x + 1).min(max_x), y)],
                    prev[size.index(x, (y + 1).min(max_y))],
                    prev[size.index(x.saturating_sub(1), y)],
                    prev[size.index(x, y.saturating_sub(1))],
                ];

                let mut ids = [0u32; NEIGHBOR_SLOTS];
                let mut dists = [EMPTY_DISTANCE; NEIGHBOR_SLOTS];
                for k in 0..NEIGHBOR_SLOTS {
                    for list in candidates.iter() {
                        let id = list[k];
                        list_insert(&mut ids, &mut dists, id, distance_of(id));
                    }
                }

                let probe = probe_id(x, y, frame, instance_seed, probe_count);
                list_insert(&mut ids, &mut dists, probe, distance_of(probe));

                *slot = ids;
            }
        });
}

/// Pass 3: gaussian blobs of the neighboring particles, blended with the
/// previous accumulator.
pub fn blend_accumulator(
    out: &mut [[f32; 4]],
    prev: &[[f32; 4]],
    neighbors: &[NeighborSlots],
    particles: &[Particle],
    size: FieldSize,
    settings: &FieldSettings,
) {
    let extent = size.extent();
    let retention = settings.trail_retention;
    out.par_chunks_mut(size.width as usize)
        .enumerate()
        .for_each(|(y, row)| {
            for (x, texel) in row.iter_mut().enumerate() {
                let idx = size.index(x as u32, y as u32);
                let pixel = [x as f32 + 0.5, y as f32 + 0.5];

                let mut color = [0.0f32; 4];
                for &id in neighbors[idx].iter() {
                    let Some(p) = particle_by_id(particles, id) else {
                        continue;
                    };
                    // a particle resting exactly on the origin is treated as unset
                    if p.position[0] <= 0.0 && p.position[1] <= 0.0 {
                        continue;
                    }
                    let dx = pixel[0] - p.position[0];
                    let dy = pixel[1] - p.position[1];
                    let intensity = settings.blob_gain * (-0.5 * (dx * dx + dy * dy)).exp();
                    let uv = [p.position[0] / extent[0], p.position[1] / extent[1]];
                    let rgb = palette_color(p.speed(), uv, &settings.palette);
                    color[0] += rgb[0] * intensity;
                    color[1] += rgb[1] * intensity;
                    color[2] += rgb[2] * intensity;
                    color[3] += intensity;
                }

                let previous = prev[idx];
                *texel = std::array::from_fn(|c| color[c] + (previous[c] - color[c]) * retention);
            }
        });
}

/// Pass 4: identity copy of the accumulator into the display format.
pub fn present(display: &mut [[u8; 4]], accumulator: &[[f32; 4]]) {
    display
        .par_iter_mut()
        .zip(accumulator.par_iter())
        .for_each(|(pixel, texel)| *pixel = to_display_pixel(*texel));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_settings() -> FieldSettings {
        FieldSettings {
            seed: Some(7),
            ..FieldSettings::default()
        }
    }

    fn inputs(frame: u32) -> FrameInputs {
        FrameInputs {
            frame,
            seeding: frame < 3,
            time: frame as f32 / 60.0,
        }
    }

    #[test]
    fn list_insert_keeps_sorted_unique_ids() {
        let mut ids = [0; 4];
        let mut dists = [EMPTY_DISTANCE; 4];
        list_insert(&mut ids, &mut dists, 5, 9.0);
        list_insert(&mut ids, &mut dists, 3, 1.0);
        list_insert(&mut ids, &mut dists, 5, 0.5);
        list_insert(&mut ids, &mut dists, 0, 0.0);
        list_insert(&mut ids, &mut dists, 8, 4.0);
        assert_eq!(ids, [3, 8, 5, 0]);
        assert_eq!(dists[..3], [1.0, 4.0, 9.0]);

        list_insert(&mut ids, &mut dists, 11, 2.0);
        list_insert(&mut ids, &mut dists, 12, 100.0);
        assert_eq!(ids, [3, 11, 8, 5]);
    }

    #[test]
    fn list_insert_drops_candidates_beyond_the_fourth_slot() {
        let mut ids = [1, 2, 3, 4];
        let mut dists = [1.0, 2.0, 3.0, 4.0];
        list_insert(&mut ids, &mut dists, 9, 5.0);
        assert_eq!(ids, [1, 2, 3, 4]);
    }

    #[test]
    fn particle_wraps_across_the_right_edge() {
        let size = FieldSize::new(32, 16);
        let settings = FieldSettings {
            noise_scale: 0.0,
            ..test_settings()
        };
        let mut prev = vec![Particle::default(); size.texel_count()];
        prev[0] = Particle {
            position: [31.95, 8.0],
            velocity: [0.25, 0.0],
        };
        let neighbors = vec![[0; 4]; size.texel_count()];
        let mut out = prev.clone();

        update_particles(&mut out, &prev, &neighbors, size, &settings, inputs(10), 7);

        let p = out[0];
        assert!(p.position[0] >= 0.0 && p.position[0] < 1.0, "x = {}", p.position[0]);
        assert!((p.position[1] - 8.0).abs() < 1e-4);
    }

    #[test]
    fn close_neighbors_push_each_other_apart() {
        let size = FieldSize::new(16, 16);
        let settings = FieldSettings {
            noise_scale: 0.0,
            viscosity: 0.0,
            speed_relax: 0.0,
            ..test_settings()
        };
        let mut prev = vec![Particle::default(); size.texel_count()];
        prev[0] = Particle {
            position: [8.0, 8.0],
            velocity: [0.0, 0.0],
        };
        prev[1] = Particle {
            position: [9.0, 8.0],
            velocity: [0.0, 0.0],
        };
        let mut neighbors = vec![[0; 4]; size.texel_count()];
        neighbors[size.index(8, 8)] = [2, 0, 0, 0];
        let mut out = prev.clone();

        update_particles(&mut out, &prev, &neighbors, size, &settings, inputs(10), 7);

        assert!(out[0].velocity[0] < 0.0, "vx = {}", out[0].velocity[0]);
    }

    #[test]
    fn rebuild_finds_particle_sitting_on_the_texel() {
        let size = FieldSize::new(8, 8);
        let mut particles = vec![Particle::default(); size.texel_count()];
        particles[0].position = [3.5, 3.5];
        particles[1].position = [7.9, 7.9];
        let mut prev = vec![[0; 4]; size.texel_count()];
        prev[size.index(4, 3)] = [2, 1, 0, 0];
        let mut out = prev.clone();

        // probe_count 1 always probes id 1
        rebuild_neighbors(&mut out, &prev, &particles, size, 0, 7, 1);

        assert_eq!(out[size.index(3, 3)][0], 1);
        assert_eq!(out[size.index(3, 3)][1], 2);
    }

    #[test]
    fn blend_decays_toward_previous_frame() {
        let size = FieldSize::new(4, 4);
        let settings = test_settings();
        let particles = vec![Particle::default(); size.texel_count()];
        let neighbors = vec![[0; 4]; size.texel_count()];
        let prev = vec![[1.0; 4]; size.texel_count()];
        let mut out = vec![[0.0; 4]; size.texel_count()];

        blend_accumulator(&mut out, &prev, &neighbors, &particles, size, &settings);

        for texel in out {
            for channel in texel {
                assert!((channel - 0.9).abs() < 1e-6);
            }
        }
    }

    #[test]
    fn blend_skips_particles_at_the_origin() {
        let size = FieldSize::new(4, 4);
        let settings = test_settings();
        let mut particles = vec![Particle::default(); size.texel_count()];
        let neighbors = vec![[1, 0, 0, 0]; size.texel_count()];
        let prev = vec![[0.0; 4]; size.texel_count()];
        let mut out = vec![[0.0; 4]; size.texel_count()];

        blend_accumulator(&mut out, &prev, &neighbors, &particles, size, &settings);
        assert!(out.iter().all(|texel| *texel == [0.0; 4]));

        particles[0].position = [0.5, 0.5];
        blend_accumulator(&mut out, &prev, &neighbors, &particles, size, &settings);
        assert!(out[size.index(0, 0)][3] > 0.0);
    }

    #[test]
    fn release_drops_every_buffer() {
        let mut field = CpuField::new(16, 16, test_settings()).unwrap();
        field.render_frame(inputs(0)).unwrap();
        field.release();
        assert!(field.is_released());
        assert!(field.particles().is_none());
        assert!(matches!(field.read_accumulator(), Err(EngineError::Disposed)));
        assert!(matches!(field.render_frame(inputs(1)), Err(EngineError::Disposed)));
    }

    #[test]
    fn resize_reallocates_at_new_size() {
        let mut field = CpuField::new(16, 16, test_settings()).unwrap();
        field.render_frame(inputs(0)).unwrap();
        field.resize(FieldSize::new(24, 10)).unwrap();
        assert_eq!(field.size(), FieldSize::new(24, 10));
        assert_eq!(field.read_particles().unwrap().len(), 240);
        assert!(field
            .read_particles()
            .unwrap()
            .iter()
            .all(|p| *p == Particle::default()));
    }

    #[test]
    fn failed_resize_keeps_previous_buffers() {
        let mut field = CpuField::new(16, 16, test_settings()).unwrap();
        field.render_frame(inputs(0)).unwrap();
        let before = field.read_particles().unwrap();
        assert!(field.resize(FieldSize::new(0, 10)).is_err());
        assert_eq!(field.size(), FieldSize::new(16, 16));
        assert_eq!(field.read_particles().unwrap(), before);
    }
}
