//! Dataset layer for the carotid IMT prediction pipeline.
//!
//! - ground-truth table loading and database-specific filtering
//! - seeded shuffle and percentage train/valid/test split
//! - grayscale decode, resize, normalization, and channel stacking
//! - seeded augmentation
//! - batch iteration with threaded prefetch (behind `burn-runtime`)

pub mod aug;
pub mod loader;
pub mod splits;
pub mod table;
pub mod types;

#[cfg(feature = "burn-runtime")]
pub mod batch;

pub use aug::{AugmentParams, AugmentPipeline};
pub use loader::{assemble_input, load_gray, GrayBuffer};
pub use splits::{shuffle_split, SplitSets, SplitSpec};
pub use table::{baseline_path, ground_truth_path, ScanTable};
pub use types::{DatasetError, DatasetResult, ScanRow};

#[cfg(feature = "burn-runtime")]
pub use batch::{target_value, BatchSettings, ScanBatch, ScanBatchIter, SplitLoaders};
