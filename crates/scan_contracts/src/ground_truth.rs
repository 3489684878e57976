//! On-disk schema of the segmentation stage's ground-truth export.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Plaque label threshold on the maximum IMT, in millimetres.
pub const PLAQUE_IMT_THRESHOLD: f64 = 1.5;

#[derive(Debug, Error)]
pub enum ContractError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to read {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("invalid record {id}: {reason}")]
    InvalidRecord { id: String, reason: String },
    #[error("scan id {0:?} too short to normalize")]
    ScanId(String),
    #[error("unknown database {0:?}")]
    UnknownDatabase(String),
    #[error("unknown input modality {0:?}")]
    UnknownModality(String),
    #[error("unknown loss {0:?}")]
    UnknownLoss(String),
}

/// One row of the upstream export. Paths are relative to the data root.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    /// Full ultrasound frame.
    pub complete_path: String,
    /// Segmentation mask for the same frame.
    pub mask_path: String,
    /// Maximum IMT in millimetres; absent when the measurement failed.
    #[serde(default)]
    pub gt_imt_max: Option<f64>,
    /// Averaged IMT in millimetres; some databases never export it.
    #[serde(default)]
    pub gt_imt_avg: Option<f64>,
}

impl ScanRecord {
    /// Checks path presence and the ground-truth fields a database
    /// requires. `needs_avg` is false for databases that only measure
    /// the maximum.
    pub fn validate(&self, id: &str, needs_avg: bool) -> Result<(), ContractError> {
        if self.complete_path.trim().is_empty() {
            return Err(invalid(id, "empty image path"));
        }
        if self.mask_path.trim().is_empty() {
            return Err(invalid(id, "empty mask path"));
        }
        check_measurement(id, "gt_imt_max", self.gt_imt_max)?;
        if needs_avg {
            check_measurement(id, "gt_imt_avg", self.gt_imt_avg)?;
        }
        Ok(())
    }
}

fn invalid(id: &str, reason: &str) -> ContractError {
    ContractError::InvalidRecord {
        id: id.to_string(),
        reason: reason.to_string(),
    }
}

fn check_measurement(id: &str, field: &str, value: Option<f64>) -> Result<(), ContractError> {
    match value {
        Some(v) if v.is_finite() && v > 0.0 => Ok(()),
        Some(v) => Err(invalid(id, &format!("{field} out of range: {v}"))),
        None => Err(invalid(id, &format!("{field} missing"))),
    }
}

/// The export file `complete_data_<DATABASE>.json`: records keyed by
/// raw scan identifier under a single `data` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroundTruthFile {
    pub data: BTreeMap<String, ScanRecord>,
}

impl GroundTruthFile {
    pub fn load(path: &Path) -> Result<Self, ContractError> {
        let raw = std::fs::read(path).map_err(|source| ContractError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_slice(&raw).map_err(|source| ContractError::Json {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), ContractError> {
        let body = serde_json::to_vec_pretty(self).map_err(|source| ContractError::Json {
            path: path.to_path_buf(),
            source,
        })?;
        std::fs::write(path, body).map_err(|source| ContractError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Raw identifiers carry a fixed four-character prefix and one trailing
/// marker character; tables are keyed on the bare id between them.
pub fn normalize_scan_id(raw: &str) -> Result<String, ContractError> {
    let chars: Vec<char> = raw.chars().collect();
    if chars.len() < 6 {
        return Err(ContractError::ScanId(raw.to_string()));
    }
    Ok(chars[4..chars.len() - 1].iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(max: Option<f64>, avg: Option<f64>) -> ScanRecord {
        ScanRecord {
            complete_path: "images/0042.png".into(),
            mask_path: "masks/0042.png".into(),
            gt_imt_max: max,
            gt_imt_avg: avg,
        }
    }

    #[test]
    fn normalize_strips_prefix_and_suffix() {
        assert_eq!(normalize_scan_id("IMT_0042R").unwrap(), "0042");
        assert_eq!(normalize_scan_id("IMT_17L").unwrap(), "17");
    }

    #[test]
    fn normalize_rejects_short_ids() {
        assert!(normalize_scan_id("IMT_R").is_err());
        assert!(normalize_scan_id("").is_err());
    }

    #[test]
    fn validate_accepts_complete_record() {
        assert!(record(Some(0.8), Some(0.6)).validate("a", true).is_ok());
    }

    #[test]
    fn validate_rejects_missing_or_bad_measurements() {
        assert!(record(None, Some(0.6)).validate("a", true).is_err());
        assert!(record(Some(f64::NAN), Some(0.6)).validate("a", true).is_err());
        assert!(record(Some(-1.0), Some(0.6)).validate("a", true).is_err());
        assert!(record(Some(0.8), None).validate("a", true).is_err());
        // The averaged measurement is only required when asked for.
        assert!(record(Some(0.8), None).validate("a", false).is_ok());
    }

    #[test]
    fn validate_rejects_empty_paths() {
        let mut rec = record(Some(0.8), Some(0.6));
        rec.mask_path = "  ".into();
        assert!(rec.validate("a", true).is_err());
    }

    #[test]
    fn ground_truth_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("complete_data_CCA.json");
        let mut data = BTreeMap::new();
        data.insert("IMT_0042R".to_string(), record(Some(1.7), Some(1.1)));
        let file = GroundTruthFile { data };
        file.save(&path).unwrap();
        let loaded = GroundTruthFile::load(&path).unwrap();
        assert_eq!(loaded.data.len(), 1);
        assert_eq!(loaded.data["IMT_0042R"].gt_imt_max, Some(1.7));
    }

    #[test]
    fn ground_truth_tolerates_missing_measurements() {
        let raw = r#"{"data": {"IMT_0001L": {"complete_path": "a.png", "mask_path": "b.png"}}}"#;
        let parsed: GroundTruthFile = serde_json::from_str(raw).unwrap();
        assert_eq!(parsed.data["IMT_0001L"].gt_imt_max, None);
    }
}
