// particle-field - GPU Particle Field Background
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

//! Scalar math shared by the CPU model. Every function here has a twin in
//! `shaders/common.wgsl` and must stay in sync with it.

pub const TAU: f32 = std::f32::consts::TAU;

/// Distance assigned to an empty neighbor slot.
pub const EMPTY_DISTANCE: f32 = 1e9;

// Row stride used to build per-texel seeds (kept in sync with shader SEED_STRIDE)
const SEED_STRIDE: i32 = 2141;
const PROBE_SALT: i32 = 11131;

/// Integer avalanche hash (Wang-style). Wrapping arithmetic and arithmetic
/// right shifts, matching signed integer behavior on the GPU.
#[inline]
pub fn ihash(a: i32) -> i32 {
    let mut a = (a ^ 61) ^ (a >> 16);
    a = a.wrapping_add(a << 3);
    a ^= a >> 4;
    a = a.wrapping_mul(0x27d4_eb2d);
    a ^= a >> 15;
    a
}

// 0x7FFFFFFF rounds to 2^31 in f32; spelled out so the shader uses the same divisor
const HASH_SCALE: f32 = 2_147_483_648.0;

/// Hash mapped to `[-1, 1)`.
#[inline]
pub fn hash(a: i32) -> f32 {
    ihash(a) as f32 / HASH_SCALE
}

#[inline]
pub fn rand4(seed: i32) -> [f32; 4] {
    [
        hash(seed ^ 0x34F8_5A93),
        hash(seed ^ 0x85FB_93D5_u32 as i32),
        hash(seed ^ 0x6253_DF84),
        hash(seed ^ 0x25FC_3625),
    ]
}

/// Box-Muller transform of two uniform samples into a 2D gaussian sample.
#[inline]
pub fn randn(r: [f32; 2]) -> [f32; 2] {
    let magnitude = (-2.0 * (1e-9 + r[0].abs()).ln()).sqrt();
    let angle = r[1] * TAU;
    [magnitude * angle.cos(), magnitude * angle.sin()]
}

/// Seed of the update pass for texel `(x, y)`.
#[inline]
pub fn update_seed(x: u32, y: u32, frame: u32, time: f32, instance_seed: u32) -> i32 {
    let time_term = (time * SEED_STRIDE as f32) as i32;
    let base = (x as i32)
        .wrapping_add((y as i32).wrapping_mul(SEED_STRIDE))
        .wrapping_add(time_term.wrapping_add(frame as i32).wrapping_mul(SEED_STRIDE));
    base ^ instance_seed as i32
}

/// Particle id probed by the neighbor rebuild at texel `(x, y)`, in `1..=probe_count`.
#[inline]
pub fn probe_id(x: u32, y: u32, frame: u32, instance_seed: u32, probe_count: u32) -> u32 {
    let seed = (x as i32)
        .wrapping_add((y as i32).wrapping_mul(SEED_STRIDE))
        .wrapping_add((frame as i32).wrapping_mul(SEED_STRIDE * SEED_STRIDE))
        .wrapping_add(PROBE_SALT);
    let r = ihash(seed ^ instance_seed as i32) as u32;
    1 + r % probe_count.max(1)
}

/// Floored modulo, as GLSL `mod` / WGSL `x - y * floor(x / y)`.
#[inline]
pub fn floor_mod(x: f32, y: f32) -> f32 {
    x - y * (x / y).floor()
}

/// Wraps a coordinate into `[0, extent)`.
#[inline]
pub fn wrap_coord(v: f32, extent: f32) -> f32 {
    let r = floor_mod(v, extent);
    // rounding can land exactly on extent for tiny negative inputs
    if r >= extent || r < 0.0 {
        0.0
    } else {
        r
    }
}

/// Shortest signed offset along one axis of a torus of size `extent`.
#[inline]
pub fn toroidal_delta(d: f32, extent: f32) -> f32 {
    floor_mod(d + extent * 0.5, extent) - extent * 0.5
}

#[inline]
pub fn toroidal_offset(a: [f32; 2], b: [f32; 2], extent: [f32; 2]) -> [f32; 2] {
    [
        toroidal_delta(a[0] - b[0], extent[0]),
        toroidal_delta(a[1] - b[1], extent[1]),
    ]
}

#[inline]
pub fn toroidal_distance_sq(a: [f32; 2], b: [f32; 2], extent: [f32; 2]) -> f32 {
    let d = toroidal_offset(a, b, extent);
    d[0] * d[0] + d[1] * d[1]
}

#[inline]
pub fn length(v: [f32; 2]) -> f32 {
    (v[0] * v[0] + v[1] * v[1]).sqrt()
}

#[inline]
pub fn mix2(a: [f32; 2], b: [f32; 2], t: f32) -> [f32; 2] {
    [a[0] + (b[0] - a[0]) * t, a[1] + (b[1] - a[1]) * t]
}

#[inline]
fn smoothstep01(x: f32) -> f32 {
    let t = x.clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

#[inline]
fn mix3(a: [f32; 3], b: [f32; 3], t: f32) -> [f32; 3] {
    [
        a[0] + (b[0] - a[0]) * t,
        a[1] + (b[1] - a[1]) * t,
        a[2] + (b[2] - a[2]) * t,
    ]
}

/// Three-stop gradient selected by particle speed and normalized position.
pub fn palette_color(speed: f32, uv: [f32; 2], palette: &[[f32; 3]; 3]) -> [f32; 3] {
    let t = 0.5 + 0.5 * (uv[0] * 3.0 + uv[1] * 2.0 + speed * 2.0).sin();
    if t < 0.5 {
        mix3(palette[0], palette[1], smoothstep01(t * 2.0))
    } else {
        mix3(palette[1], palette[2], smoothstep01((t - 0.5) * 2.0))
    }
}
