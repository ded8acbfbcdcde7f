// particle-field - GPU Particle Field Background
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
};

pub const SETTINGS_FILE_NAME: &str = "field_settings.json";
pub const SETTINGS_ENV_VAR: &str = "PARTICLE_FIELD_SETTINGS";

// Palette stops: #AD65D7 -> #BBF3E6 -> #84CEF3
pub const DEFAULT_PALETTE: [[f32; 3]; 3] = [
    [0.678, 0.396, 0.843],
    [0.733, 0.953, 0.902],
    [0.518, 0.808, 0.953],
];

/// Tunables of the particle field. Every instance on a page uses the defaults
/// unless a settings file overrides them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FieldSettings {
    /// Frames after create/resize during which particles are re-seeded.
    pub seed_frames: u32,
    /// Only `width * height / probe_divisor` particle ids are probed into the neighbor map.
    pub probe_divisor: u32,
    pub repulsion_min: f32,
    pub repulsion_range: f32,
    pub repulsion_falloff: f32,
    pub repulsion_scale: f32,
    pub viscosity: f32,
    pub target_speed: f32,
    pub speed_relax: f32,
    pub noise_scale: f32,
    pub blob_gain: f32,
    /// Weight of the previous accumulator frame (motion blur).
    pub trail_retention: f32,
    pub palette: [[f32; 3]; 3],
    /// Fixed hash seed. `None` draws a random one per instance.
    pub seed: Option<u32>,
}

impl Default for FieldSettings {
    fn default() -> Self {
        Self {
            seed_frames: 3,
            probe_divisor: 10,
            repulsion_min: 0.005,
            repulsion_range: 10.0,
            repulsion_falloff: 0.03,
            repulsion_scale: 1.0 / 25.0,
            viscosity: 0.1,
            target_speed: 0.25,
            speed_relax: 0.05,
            noise_scale: 0.01,
            blob_gain: 0.4,
            trail_retention: 0.9,
            palette: DEFAULT_PALETTE,
            seed: None,
        }
    }
}

impl FieldSettings {
    pub fn default_path() -> PathBuf {
        if let Ok(path) = std::env::var(SETTINGS_ENV_VAR) {
            if !path.is_empty() {
                return PathBuf::from(path);
            }
        }
        std::env::current_dir()
            .unwrap_or_else(|_| PathBuf::from("."))
            .join(SETTINGS_FILE_NAME)
    }

    pub fn load_from_disk(path: &Path) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        let mut settings: Self = serde_json::from_str(&data)?;
        settings.sanitize();
        Ok(settings)
    }

    /// Loads `path` if it exists, otherwise returns the defaults.
    pub fn load_or_default(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            Self::load_from_disk(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save_to_disk(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn sanitize(&mut self) {
        self.seed_frames = self.seed_frames.clamp(1, 64);
        self.probe_divisor = self.probe_divisor.clamp(1, 1024);
        self.repulsion_min = self.repulsion_min.clamp(0.0, 1.0);
        self.repulsion_range = self.repulsion_range.clamp(self.repulsion_min, 256.0);
        self.repulsion_falloff = self.repulsion_falloff.clamp(1e-4, 10.0);
        self.repulsion_scale = self.repulsion_scale.clamp(0.0, 1.0);
        self.viscosity = self.viscosity.clamp(0.0, 1.0);
        self.target_speed = self.target_speed.clamp(0.0, 8.0);
        self.speed_relax = self.speed_relax.clamp(0.0, 1.0);
        self.noise_scale = self.noise_scale.clamp(0.0, 1.0);
        self.blob_gain = self.blob_gain.clamp(0.0, 4.0);
        // 1.0 would freeze the accumulator forever
        self.trail_retention = self.trail_retention.clamp(0.0, 0.999);
        for stop in self.palette.iter_mut() {
            for channel in stop.iter_mut() {
                *channel = channel.clamp(0.0, 1.0);
            }
        }
    }

    /// Number of particle ids the neighbor rebuild may probe for a field size.
    pub fn probe_count(&self, width: u32, height: u32) -> u32 {
        let total = width as u64 * height as u64;
        ((total / self.probe_divisor.max(1) as u64) as u32).max(1)
    }
}
