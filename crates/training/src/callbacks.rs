//! Fit-loop callbacks: early stopping, plateau decay, best-checkpoint
//! saving. All three key off the epoch validation loss.

use anyhow::Context;
use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use models::ImtNet;
use std::path::PathBuf;

pub const PLATEAU_FACTOR: f64 = 0.5;
pub const PLATEAU_PATIENCE: usize = 15;
pub const MIN_LEARNING_RATE: f64 = 1e-6;

/// Stops training after `patience` epochs without improvement.
#[derive(Debug)]
pub struct EarlyStopping {
    patience: usize,
    best: f64,
    stale: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best: f64::INFINITY,
            stale: 0,
        }
    }

    /// Returns true when training should stop.
    pub fn update(&mut self, val_loss: f64) -> bool {
        if val_loss < self.best {
            self.best = val_loss;
            self.stale = 0;
            return false;
        }
        self.stale += 1;
        self.stale >= self.patience
    }
}

/// Scales the learning rate by `factor` after `patience` stale epochs,
/// never below `min_lr`. The stale counter resets on every decay.
#[derive(Debug)]
pub struct PlateauDecay {
    factor: f64,
    patience: usize,
    min_lr: f64,
    best: f64,
    stale: usize,
}

impl PlateauDecay {
    pub fn new(factor: f64, patience: usize, min_lr: f64) -> Self {
        Self {
            factor,
            patience,
            min_lr,
            best: f64::INFINITY,
            stale: 0,
        }
    }

    /// Returns the learning rate to use from the next epoch on.
    pub fn update(&mut self, val_loss: f64, lr: f64) -> f64 {
        if val_loss < self.best {
            self.best = val_loss;
            self.stale = 0;
            return lr;
        }
        self.stale += 1;
        if self.stale < self.patience {
            return lr;
        }
        self.stale = 0;
        let next = (lr * self.factor).max(self.min_lr);
        if next < lr {
            tracing::info!(lr = next, "validation plateau, decaying learning rate");
        }
        next
    }
}

/// Writes a checkpoint whenever the validation loss improves, keeping
/// only the best weights on disk.
#[derive(Debug)]
pub struct BestCheckpoint {
    path: PathBuf,
    best: f64,
    best_epoch: usize,
}

impl BestCheckpoint {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            best: f64::INFINITY,
            best_epoch: 0,
        }
    }

    /// Saves `model` when `val_loss` improves on the best seen so far.
    /// Returns true when a checkpoint was written.
    pub fn update<B: Backend>(
        &mut self,
        epoch: usize,
        val_loss: f64,
        model: &ImtNet<B>,
    ) -> anyhow::Result<bool> {
        if val_loss >= self.best {
            return Ok(false);
        }
        self.best = val_loss;
        self.best_epoch = epoch;
        let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
        model
            .clone()
            .save_file(&self.path, &recorder)
            .with_context(|| format!("saving checkpoint to {}", self.path.display()))?;
        Ok(true)
    }

    pub fn best_loss(&self) -> f64 {
        self.best
    }

    pub fn best_epoch(&self) -> usize {
        self.best_epoch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn early_stopping_waits_for_patience() {
        let mut early = EarlyStopping::new(3);
        assert!(!early.update(1.0));
        assert!(!early.update(1.1));
        assert!(!early.update(1.2));
        assert!(early.update(1.3));
    }

    #[test]
    fn improvement_resets_early_stopping() {
        let mut early = EarlyStopping::new(2);
        assert!(!early.update(1.0));
        assert!(!early.update(1.1));
        assert!(!early.update(0.9));
        assert!(!early.update(1.0));
        assert!(early.update(1.0));
    }

    #[test]
    fn plateau_halves_after_patience() {
        let mut plateau = PlateauDecay::new(0.5, 2, 1e-6);
        let mut lr = 1e-3;
        lr = plateau.update(1.0, lr);
        assert_eq!(lr, 1e-3);
        lr = plateau.update(1.0, lr);
        assert_eq!(lr, 1e-3);
        lr = plateau.update(1.0, lr);
        assert_eq!(lr, 5e-4);
        // Counter resets after a decay.
        lr = plateau.update(1.0, lr);
        assert_eq!(lr, 5e-4);
    }

    #[test]
    fn plateau_respects_the_floor() {
        let mut plateau = PlateauDecay::new(0.5, 1, 1e-6);
        let mut lr = 2e-6;
        plateau.update(1.0, lr);
        lr = plateau.update(1.0, lr);
        assert_eq!(lr, 1e-6);
        lr = plateau.update(1.0, lr);
        assert_eq!(lr, 1e-6);
    }
}
