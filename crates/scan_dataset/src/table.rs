//! Ground-truth table loading and database-specific filtering.

use crate::types::{DatasetError, DatasetResult, ScanRow};
use scan_contracts::{
    normalize_scan_id, BaselineTable, Database, GroundTruthFile, PLAQUE_IMT_THRESHOLD,
};
use std::path::{Path, PathBuf};

/// Location of the segmentation stage's export for a database.
pub fn ground_truth_path(data_root: &Path, database: Database) -> PathBuf {
    data_root
        .join("segmentation")
        .join(format!("complete_data_{}.json", database.as_str()))
}

/// Location of the published baseline predictions for a database.
pub fn baseline_path(data_root: &Path, database: Database) -> PathBuf {
    data_root
        .join("baselines")
        .join(format!("vila_{}.csv", database.as_str()))
}

/// All usable scans of one database, in normalized-id order.
#[derive(Debug, Clone)]
pub struct ScanTable {
    pub database: Database,
    pub rows: Vec<ScanRow>,
}

impl ScanTable {
    /// Loads the export for `database`, drops rows that fail validation,
    /// normalizes ids, and derives the plaque label.
    pub fn load(data_root: &Path, database: Database) -> DatasetResult<Self> {
        let path = ground_truth_path(data_root, database);
        let file = GroundTruthFile::load(&path)?;
        Self::from_ground_truth(file, database)
    }

    pub fn from_ground_truth(file: GroundTruthFile, database: Database) -> DatasetResult<Self> {
        let needs_avg = database.has_avg_measurement();
        let mut rows = Vec::with_capacity(file.data.len());
        let mut dropped = 0usize;
        for (raw_id, record) in file.data {
            if let Err(error) = record.validate(&raw_id, needs_avg) {
                tracing::warn!(%raw_id, %error, "dropping scan");
                dropped += 1;
                continue;
            }
            let id = match normalize_scan_id(&raw_id) {
                Ok(id) => id,
                Err(error) => {
                    tracing::warn!(%raw_id, %error, "dropping scan");
                    dropped += 1;
                    continue;
                }
            };
            let Some(gt_imt_max) = record.gt_imt_max else {
                dropped += 1;
                continue;
            };
            // CCA masks live under the segmentation output directory;
            // the export records them relative to it.
            let mask = match database {
                Database::Cca => format!("segmentation/{}", record.mask_path),
                Database::Bulb => record.mask_path,
            };
            rows.push(ScanRow {
                id,
                image: record.complete_path,
                mask,
                gt_imt_max,
                gt_imt_avg: record.gt_imt_avg.filter(|v| v.is_finite() && *v > 0.0),
                gt_plaque: gt_imt_max >= PLAQUE_IMT_THRESHOLD,
                baseline_imt_max: None,
                baseline_imt_avg: None,
            });
        }
        if dropped > 0 {
            tracing::warn!(dropped, kept = rows.len(), "filtered invalid scans");
        }
        if rows.is_empty() {
            return Err(DatasetError::Validation(format!(
                "no valid scans in the {database} export"
            )));
        }
        Ok(Self { database, rows })
    }

    /// Attaches published predictions to matching rows for later
    /// comparison reports.
    pub fn merge_baseline(&mut self, baseline: &BaselineTable) {
        let mut matched = 0usize;
        for row in &mut self.rows {
            if let Some(record) = baseline.get(&row.id) {
                row.baseline_imt_max = record.imt_max;
                row.baseline_imt_avg = record.imt_avg;
                matched += 1;
            }
        }
        tracing::info!(matched, total = self.rows.len(), "merged baseline predictions");
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
