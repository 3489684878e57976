//! Seeded shuffle and percentage partition of the scan table.

use crate::types::{DatasetError, DatasetResult, ScanRow};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// Partition percentages. Anything left past `train + valid + test`
/// lands in the held-out set.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SplitSpec {
    pub train: f64,
    pub valid: f64,
    pub test: f64,
}

impl SplitSpec {
    pub fn validate(&self) -> DatasetResult<()> {
        for (name, value) in [("train", self.train), ("valid", self.valid), ("test", self.test)] {
            if !value.is_finite() || value < 0.0 {
                return Err(DatasetError::Validation(format!(
                    "{name} percentage out of range: {value}"
                )));
            }
        }
        let total = self.train + self.valid + self.test;
        if total > 100.0 {
            return Err(DatasetError::Validation(format!(
                "split percentages sum to {total}, must be <= 100"
            )));
        }
        Ok(())
    }
}

/// The four partitions, in shuffle order within each.
#[derive(Debug, Clone)]
pub struct SplitSets {
    pub train: Vec<ScanRow>,
    pub valid: Vec<ScanRow>,
    pub test: Vec<ScanRow>,
    pub holdout: Vec<ScanRow>,
}

/// Seeded full shuffle followed by a cumulative percentage partition.
/// Boundaries are cumulative so percentages summing to exactly 100
/// hold out nothing.
pub fn shuffle_split(mut rows: Vec<ScanRow>, seed: u64, spec: SplitSpec) -> DatasetResult<SplitSets> {
    spec.validate()?;
    let mut rng = StdRng::seed_from_u64(seed);
    rows.shuffle(&mut rng);

    let m = rows.len() as f64;
    let boundary = |cumulative_pct: f64| (cumulative_pct * m / 100.0).floor() as usize;
    let t_end = boundary(spec.train);
    let v_end = boundary(spec.train + spec.valid);
    let s_end = boundary(spec.train + spec.valid + spec.test);

    let holdout = rows.split_off(s_end);
    let test = rows.split_off(v_end);
    let valid = rows.split_off(t_end);
    Ok(SplitSets {
        train: rows,
        valid,
        test,
        holdout,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rows(n: usize) -> Vec<ScanRow> {
        (0..n)
            .map(|i| ScanRow {
                id: format!("{i:04}"),
                image: format!("images/{i:04}.png"),
                mask: format!("masks/{i:04}.png"),
                gt_imt_max: 0.5 + i as f64 * 0.01,
                gt_imt_avg: Some(0.4),
                gt_plaque: false,
                baseline_imt_max: None,
                baseline_imt_avg: None,
            })
            .collect()
    }

    fn ids(rows: &[ScanRow]) -> Vec<String> {
        rows.iter().map(|r| r.id.clone()).collect()
    }

    #[test]
    fn full_percentages_leave_no_holdout() {
        let spec = SplitSpec { train: 70.0, valid: 15.0, test: 15.0 };
        let sets = shuffle_split(rows(20), 7, spec).unwrap();
        assert_eq!(sets.train.len(), 14);
        assert_eq!(sets.valid.len(), 3);
        assert_eq!(sets.test.len(), 3);
        assert!(sets.holdout.is_empty());
    }

    #[test]
    fn partial_percentages_produce_holdout() {
        let spec = SplitSpec { train: 50.0, valid: 25.0, test: 0.0 };
        let sets = shuffle_split(rows(8), 7, spec).unwrap();
        assert_eq!(sets.train.len(), 4);
        assert_eq!(sets.valid.len(), 2);
        assert_eq!(sets.test.len(), 0);
        assert_eq!(sets.holdout.len(), 2);
    }

    #[test]
    fn same_seed_same_partition() {
        let spec = SplitSpec { train: 60.0, valid: 20.0, test: 20.0 };
        let a = shuffle_split(rows(13), 99, spec).unwrap();
        let b = shuffle_split(rows(13), 99, spec).unwrap();
        assert_eq!(ids(&a.train), ids(&b.train));
        assert_eq!(ids(&a.valid), ids(&b.valid));
        assert_eq!(ids(&a.test), ids(&b.test));
    }

    #[test]
    fn different_seed_different_order() {
        let spec = SplitSpec { train: 100.0, valid: 0.0, test: 0.0 };
        let a = shuffle_split(rows(32), 1, spec).unwrap();
        let b = shuffle_split(rows(32), 2, spec).unwrap();
        assert_ne!(ids(&a.train), ids(&b.train));
    }

    #[test]
    fn partitions_are_disjoint_and_complete() {
        let spec = SplitSpec { train: 70.0, valid: 15.0, test: 10.0 };
        let sets = shuffle_split(rows(21), 5, spec).unwrap();
        let mut all = ids(&sets.train);
        all.extend(ids(&sets.valid));
        all.extend(ids(&sets.test));
        all.extend(ids(&sets.holdout));
        assert_eq!(all.len(), 21);
        all.sort();
        all.dedup();
        assert_eq!(all.len(), 21);
    }

    #[test]
    fn oversized_percentages_are_rejected() {
        let spec = SplitSpec { train: 80.0, valid: 15.0, test: 15.0 };
        assert!(shuffle_split(rows(4), 1, spec).is_err());
        let spec = SplitSpec { train: -5.0, valid: 50.0, test: 10.0 };
        assert!(shuffle_split(rows(4), 1, spec).is_err());
    }
}
