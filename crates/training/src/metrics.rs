//! Streaming evaluation accumulators.

use serde::Serialize;

/// Confusion counts for a binary head at a 0.5 threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BinaryCounts {
    pub true_pos: usize,
    pub false_pos: usize,
    pub true_neg: usize,
    pub false_neg: usize,
}

impl BinaryCounts {
    pub fn update(&mut self, target: f32, pred: f32) {
        let truth = target >= 0.5;
        let positive = pred >= 0.5;
        match (truth, positive) {
            (true, true) => self.true_pos += 1,
            (true, false) => self.false_neg += 1,
            (false, true) => self.false_pos += 1,
            (false, false) => self.true_neg += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.true_pos + self.false_pos + self.true_neg + self.false_neg
    }

    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        (self.true_pos + self.true_neg) as f64 / total as f64
    }

    pub fn recall(&self) -> f64 {
        let positives = self.true_pos + self.false_neg;
        if positives == 0 {
            return 0.0;
        }
        self.true_pos as f64 / positives as f64
    }
}

/// Streaming regression error accumulator.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegressionErrors {
    sum_abs: f64,
    sum_sq: f64,
    n: usize,
}

impl RegressionErrors {
    pub fn update(&mut self, target: f64, pred: f64) {
        let diff = pred - target;
        self.sum_abs += diff.abs();
        self.sum_sq += diff * diff;
        self.n += 1;
    }

    pub fn mae(&self) -> f64 {
        if self.n == 0 {
            return 0.0;
        }
        self.sum_abs / self.n as f64
    }

    pub fn rmse(&self) -> f64 {
        if self.n == 0 {
            return 0.0;
        }
        (self.sum_sq / self.n as f64).sqrt()
    }

    pub fn len(&self) -> usize {
        self.n
    }

    pub fn is_empty(&self) -> bool {
        self.n == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn confusion_counts_and_rates() {
        let mut counts = BinaryCounts::default();
        // 2 tp, 1 fn, 1 fp, 2 tn
        for (t, p) in [(1.0, 0.9), (1.0, 0.5), (1.0, 0.2), (0.0, 0.7), (0.0, 0.1), (0.0, 0.0)] {
            counts.update(t, p);
        }
        assert_eq!(counts.true_pos, 2);
        assert_eq!(counts.false_neg, 1);
        assert_eq!(counts.false_pos, 1);
        assert_eq!(counts.true_neg, 2);
        assert!((counts.accuracy() - 4.0 / 6.0).abs() < 1e-12);
        assert!((counts.recall() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn empty_counts_do_not_divide_by_zero() {
        let counts = BinaryCounts::default();
        assert_eq!(counts.accuracy(), 0.0);
        assert_eq!(counts.recall(), 0.0);
    }

    #[test]
    fn regression_errors_accumulate() {
        let mut errors = RegressionErrors::default();
        errors.update(1.0, 1.5);
        errors.update(2.0, 1.0);
        assert_eq!(errors.len(), 2);
        assert!((errors.mae() - 0.75).abs() < 1e-12);
        assert!((errors.rmse() - (0.625f64).sqrt()).abs() < 1e-12);
    }
}
