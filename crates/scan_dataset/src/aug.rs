//! Training-time augmentation over decoded grayscale buffers.

use crate::loader::GrayBuffer;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Augmentation knobs. Each op runs with probability `*_prob`;
/// strengths are relative to the [0, 1] pixel range.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AugmentParams {
    pub flip_prob: f32,
    pub jitter_prob: f32,
    pub jitter_strength: f32,
    pub noise_prob: f32,
    pub noise_strength: f32,
    pub blur_prob: f32,
}

impl Default for AugmentParams {
    fn default() -> Self {
        Self {
            flip_prob: 0.5,
            jitter_prob: 0.3,
            jitter_strength: 0.2,
            noise_prob: 0.2,
            noise_strength: 0.05,
            blur_prob: 0.1,
        }
    }
}

impl AugmentParams {
    /// Parameters that leave every input untouched.
    pub fn disabled() -> Self {
        Self {
            flip_prob: 0.0,
            jitter_prob: 0.0,
            jitter_strength: 0.0,
            noise_prob: 0.0,
            noise_strength: 0.0,
            blur_prob: 0.0,
        }
    }
}

/// Seeded augmentation pipeline. Each sample draws from an RNG keyed by
/// the pipeline seed and a per-sample key, so a given (seed, sample)
/// pair always produces the same transform.
#[derive(Debug, Clone)]
pub struct AugmentPipeline {
    params: AugmentParams,
    seed: u64,
}

impl AugmentPipeline {
    pub fn new(params: AugmentParams, seed: u64) -> Self {
        Self { params, seed }
    }

    /// Applies the configured ops. The flip decision is shared across
    /// channels so image and mask stay aligned; intensity ops touch the
    /// image only since masks are binary.
    pub fn apply(&self, sample_key: u64, image: Option<&mut GrayBuffer>, mask: Option<&mut GrayBuffer>) {
        let mut rng = StdRng::seed_from_u64(self.seed ^ sample_key);
        let flip = self.params.flip_prob > 0.0
            && rng.random_range(0.0..1.0f32) < self.params.flip_prob;
        if let Some(image) = image {
            if flip {
                hflip(image);
            }
            maybe_jitter(&mut rng, &self.params, image);
            maybe_noise(&mut rng, &self.params, image);
            maybe_blur(&mut rng, self.params.blur_prob, image);
        }
        if let Some(mask) = mask {
            if flip {
                hflip(mask);
            }
        }
    }
}

fn hflip(buf: &mut GrayBuffer) {
    let w = buf.width as usize;
    for row in buf.data.chunks_mut(w) {
        row.reverse();
    }
}

fn maybe_jitter(rng: &mut StdRng, params: &AugmentParams, buf: &mut GrayBuffer) {
    let (prob, strength) = (params.jitter_prob, params.jitter_strength);
    if prob <= 0.0 || strength <= 0.0 || rng.random_range(0.0..1.0f32) >= prob {
        return;
    }
    let contrast = 1.0 + rng.random_range(-strength..strength);
    let brightness = rng.random_range(-strength..strength) * 0.5;
    for v in &mut buf.data {
        *v = ((*v - 0.5) * contrast + 0.5 + brightness).clamp(0.0, 1.0);
    }
}

fn maybe_noise(rng: &mut StdRng, params: &AugmentParams, buf: &mut GrayBuffer) {
    let (prob, strength) = (params.noise_prob, params.noise_strength);
    if prob <= 0.0 || strength <= 0.0 || rng.random_range(0.0..1.0f32) >= prob {
        return;
    }
    for v in &mut buf.data {
        *v = (*v + rng.random_range(-strength..strength)).clamp(0.0, 1.0);
    }
}

fn maybe_blur(rng: &mut StdRng, prob: f32, buf: &mut GrayBuffer) {
    if prob <= 0.0 || rng.random_range(0.0..1.0f32) >= prob {
        return;
    }
    box_blur(buf);
}

/// 3x3 box blur clamped at the borders.
fn box_blur(buf: &mut GrayBuffer) {
    let w = buf.width as usize;
    let h = buf.height as usize;
    let src = buf.data.clone();
    for y in 0..h {
        for x in 0..w {
            let mut sum = 0.0f32;
            let mut count = 0.0f32;
            for dy in -1i32..=1 {
                for dx in -1i32..=1 {
                    let nx = x as i32 + dx;
                    let ny = y as i32 + dy;
                    if nx >= 0 && ny >= 0 && (nx as usize) < w && (ny as usize) < h {
                        sum += src[ny as usize * w + nx as usize];
                        count += 1.0;
                    }
                }
            }
            buf.data[y * w + x] = sum / count;
        }
    }
}
