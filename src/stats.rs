// particle-field - GPU Particle Field Background
// Copyright (c) 2025 Filipe da Veiga Ventura Alves
// Licensed under MIT License

use std::fmt;

const LIT_THRESHOLD: f32 = 1e-3;

/// Luminance summary of an accumulator readback.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldStats {
    pub texels: usize,
    pub min: f32,
    pub max: f32,
    pub mean: f32,
    /// Texels brighter than a small threshold.
    pub lit: usize,
    /// Texels at or above full luminance.
    pub saturated: usize,
}

#[inline]
pub fn luminance(texel: [f32; 4]) -> f32 {
    0.2126 * texel[0] + 0.7152 * texel[1] + 0.0722 * texel[2]
}

impl FieldStats {
    pub fn from_accumulator(texels: &[[f32; 4]]) -> Self {
        let mut stats = Self {
            texels: texels.len(),
            min: f32::MAX,
            max: f32::MIN,
            mean: 0.0,
            lit: 0,
            saturated: 0,
        };
        if texels.is_empty() {
            stats.min = 0.0;
            stats.max = 0.0;
            return stats;
        }

        let mut sum = 0.0f64;
        for texel in texels {
            let l = luminance(*texel);
            stats.min = stats.min.min(l);
            stats.max = stats.max.max(l);
            sum += l as f64;
            if l > LIT_THRESHOLD {
                stats.lit += 1;
            }
            if l >= 1.0 {
                stats.saturated += 1;
            }
        }
        stats.mean = (sum / texels.len() as f64) as f32;
        stats
    }

    pub fn is_uniform(&self) -> bool {
        self.max - self.min < 1e-6
    }

    pub fn is_blank(&self) -> bool {
        self.lit == 0
    }

    pub fn is_saturated(&self) -> bool {
        self.texels > 0 && self.saturated == self.texels
    }

    pub fn lit_fraction(&self) -> f32 {
        if self.texels == 0 {
            0.0
        } else {
            self.lit as f32 / self.texels as f32
        }
    }
}

impl fmt::Display for FieldStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "luminance min {:.4} max {:.4} mean {:.4} | lit {:.1}% | saturated {}",
            self.min,
            self.max,
            self.mean,
            self.lit_fraction() * 100.0,
            self.saturated
        )
    }
}
