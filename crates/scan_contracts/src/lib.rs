//! Shared data contracts for the carotid IMT prediction pipeline.
//!
//! Everything that crosses a crate boundary lives here:
//! - the on-disk schema of the segmentation stage's ground-truth export
//! - output head descriptors and loss assignments
//! - input modality and database selectors
//! - the published baseline table used for comparison reports

pub mod baseline;
pub mod ground_truth;
pub mod heads;

pub use baseline::{BaselineRecord, BaselineTable};
pub use ground_truth::{
    normalize_scan_id, ContractError, GroundTruthFile, ScanRecord, PLAQUE_IMT_THRESHOLD,
};
pub use heads::{default_heads, Database, HeadKind, HeadSpec, InputKind, LossKind};
