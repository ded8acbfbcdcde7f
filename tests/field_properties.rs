//! Property tests of the particle field on the CPU reference model.
//!
//! These check the invariants every backend must hold:
//! - seeded positions lie inside the field
//! - particles wrap toroidally across the edges
//! - neighbor lists hold unique ids, sorted by toroidal distance, empty slots last

use particle_field::kernels::toroidal_distance_sq;
use particle_field::{
    neighbor_recall, CpuField, FieldBackend, FieldSettings, FieldSize, FrameInputs, NeighborSlots,
    Particle,
};
use proptest::prelude::*;

fn settings(seed: u32) -> FieldSettings {
    FieldSettings {
        seed: Some(seed),
        ..FieldSettings::default()
    }
}

fn inputs(frame: u32, seed_frames: u32) -> FrameInputs {
    FrameInputs {
        frame,
        seeding: frame < seed_frames,
        time: frame as f32 / 60.0,
    }
}

fn run(field: &mut CpuField, frames: u32) {
    let seed_frames = field.settings().seed_frames;
    for frame in 0..frames {
        field.render_frame(inputs(frame, seed_frames)).unwrap();
    }
}

fn assert_in_bounds(particles: &[Particle], size: FieldSize) {
    let [w, h] = size.extent();
    for (i, p) in particles.iter().enumerate() {
        assert!(
            p.position[0] >= 0.0 && p.position[0] < w && p.position[1] >= 0.0 && p.position[1] < h,
            "particle {} at {:?} outside {}x{}",
            i + 1,
            p.position,
            size.width,
            size.height
        );
    }
}

/// Checks uniqueness, tail-only empty slots, id range and distance ordering.
fn assert_neighbor_invariants(
    neighbors: &[NeighborSlots],
    particles: &[Particle],
    size: FieldSize,
    probe_count: u32,
) {
    let extent = size.extent();
    for y in 0..size.height {
        for x in 0..size.width {
            let slots = neighbors[size.index(x, y)];
            let filled = slots.iter().take_while(|&&id| id != 0).count();
            assert!(
                slots[filled..].iter().all(|&id| id == 0),
                "texel ({x}, {y}) has a gap: {slots:?}"
            );
            for i in 0..filled {
                assert!((1..=probe_count).contains(&slots[i]), "texel ({x}, {y}): {slots:?}");
                for j in i + 1..filled {
                    assert_ne!(slots[i], slots[j], "texel ({x}, {y}) duplicates: {slots:?}");
                }
            }

            let center = [x as f32 + 0.5, y as f32 + 0.5];
            let dists: Vec<f32> = slots[..filled]
                .iter()
                .map(|&id| toroidal_distance_sq(particles[id as usize - 1].position, center, extent))
                .collect();
            assert!(
                dists.windows(2).all(|w| w[0] <= w[1]),
                "texel ({x}, {y}) out of order: {slots:?} {dists:?}"
            );
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// After the seeding frames every particle lies in [0, w) x [0, h).
    #[test]
    fn seeding_respects_field_bounds(width in 1u32..48, height in 1u32..48, seed in any::<u32>()) {
        let mut field = CpuField::new(width, height, settings(seed)).unwrap();
        run(&mut field, 3);
        assert_in_bounds(field.particles().unwrap(), field.size());
    }

    /// Positions stay wrapped and neighbor lists stay well formed while the field evolves.
    #[test]
    fn invariants_hold_while_running(width in 2u32..40, height in 2u32..40, seed in any::<u32>(), frames in 4u32..24) {
        let mut field = CpuField::new(width, height, settings(seed)).unwrap();
        run(&mut field, frames);
        let size = field.size();
        let probe_count = field.settings().probe_count(width, height);
        assert_in_bounds(field.particles().unwrap(), size);
        assert_neighbor_invariants(field.neighbors().unwrap(), field.particles().unwrap(), size, probe_count);
    }
}

/// Seeding spreads particles over the whole field instead of clumping at the origin.
#[test]
fn seeding_spreads_particles_evenly() {
    let mut field = CpuField::new(96, 64, settings(11)).unwrap();
    run(&mut field, 3);
    let particles = field.particles().unwrap();
    let n = particles.len() as f32;
    let mean_x = particles.iter().map(|p| p.position[0]).sum::<f32>() / n;
    let mean_y = particles.iter().map(|p| p.position[1]).sum::<f32>() / n;
    assert!((mean_x - 48.0).abs() < 4.0, "mean x {mean_x}");
    assert!((mean_y - 32.0).abs() < 4.0, "mean y {mean_y}");

    let left_half = particles.iter().filter(|p| p.position[0] < 48.0).count() as f32;
    assert!((left_half / n - 0.5).abs() < 0.05);
}

/// A particle just left of the right edge moving right re-enters near x = 0.
#[test]
fn particle_wraps_to_opposite_edge() {
    // neighbor forces and noise off, so the step is exactly the velocity
    let quiet = FieldSettings {
        repulsion_scale: 0.0,
        viscosity: 0.0,
        noise_scale: 0.0,
        ..settings(5)
    };
    let mut field = CpuField::new(40, 20, quiet).unwrap();
    run(&mut field, 3);
    field
        .set_particle(
            0,
            0,
            Particle {
                position: [40.0 - 1e-3, 10.0],
                velocity: [0.25, 0.0],
            },
        )
        .unwrap();
    field.render_frame(inputs(3, 3)).unwrap();

    let p = field.particles().unwrap()[0];
    assert!(p.position[0] >= 0.0 && p.position[0] < 1.0, "x = {}", p.position[0]);
    assert!(p.velocity[0] > 0.0);
}

/// The neighbor map converges toward the exact nearest particles.
#[test]
fn neighbor_map_tracks_nearest_particles() {
    let mut field = CpuField::new(64, 64, settings(21)).unwrap();
    let size = field.size();
    let probe_count = field.settings().probe_count(64, 64);
    run(&mut field, 60);

    let recall = neighbor_recall(
        field.neighbors().unwrap(),
        field.particles().unwrap(),
        size,
        probe_count,
        1,
    );
    assert!(recall > 0.5, "recall {recall}");
}

/// Two instances with different seeds evolve independently.
#[test]
fn instances_with_different_seeds_differ() {
    let mut a = CpuField::new(32, 32, settings(1)).unwrap();
    let mut b = CpuField::new(32, 32, settings(2)).unwrap();
    run(&mut a, 3);
    run(&mut b, 3);
    assert_ne!(a.particles().unwrap(), b.particles().unwrap());

    let mut c = CpuField::new(32, 32, settings(1)).unwrap();
    run(&mut c, 3);
    assert_eq!(a.particles().unwrap(), c.particles().unwrap());
}
