//! Core row type and the dataset error taxonomy.

use scan_contracts::{ContractError, InputKind};
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, DatasetError>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("input file missing: {path}")]
    MissingInput { path: PathBuf },
    #[error(transparent)]
    Contract(#[from] ContractError),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("{0}")]
    Other(String),
}

/// One usable scan after filtering, id normalization, and path fixes.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanRow {
    pub id: String,
    /// Image path relative to the data root.
    pub image: String,
    /// Mask path relative to the data root, already carrying the
    /// segmentation prefix for databases that store masks there.
    pub mask: String,
    pub gt_imt_max: f64,
    /// Absent for databases that only export the maximum.
    pub gt_imt_avg: Option<f64>,
    pub gt_plaque: bool,
    pub baseline_imt_max: Option<f64>,
    pub baseline_imt_avg: Option<f64>,
}

impl ScanRow {
    /// Resolves the configured modality into the (image, mask) path pair
    /// to load. Exactly the paths the modality names are returned.
    pub fn paths_for(&self, kind: InputKind) -> (Option<&str>, Option<&str>) {
        match kind {
            InputKind::Image => (Some(self.image.as_str()), None),
            InputKind::Mask => (None, Some(self.mask.as_str())),
            InputKind::ImageAndMask => (Some(self.image.as_str()), Some(self.mask.as_str())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> ScanRow {
        ScanRow {
            id: "0042".into(),
            image: "images/0042.png".into(),
            mask: "segmentation/masks/0042.png".into(),
            gt_imt_max: 1.7,
            gt_imt_avg: Some(1.1),
            gt_plaque: true,
            baseline_imt_max: None,
            baseline_imt_avg: None,
        }
    }

    #[test]
    fn paths_follow_modality() {
        let r = row();
        assert_eq!(r.paths_for(InputKind::Image), (Some("images/0042.png"), None));
        assert_eq!(
            r.paths_for(InputKind::Mask),
            (None, Some("segmentation/masks/0042.png"))
        );
        let (img, mask) = r.paths_for(InputKind::ImageAndMask);
        assert!(img.is_some() && mask.is_some());
    }
}
