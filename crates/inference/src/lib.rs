#![recursion_limit = "256"]

//! Prediction entry points for trained IMT models: single-scan
//! inference, full-table prediction, and the predictions CSV export.

pub mod predict;

#[cfg(feature = "backend-wgpu")]
pub type InferenceBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type InferenceBackend = burn_ndarray::NdArray<f32>;

pub use predict::{
    predict_scan, predict_table, write_predictions_csv, PredictError, RowPrediction,
    ScanPrediction,
};

use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings, RecorderError};
use burn::tensor::backend::Backend;
use models::{ImtNet, ImtNetConfig};
use std::path::Path;

/// Initializes a network from `cfg` and loads trained weights into it.
pub fn load_imt_net<B: Backend>(
    path: &Path,
    cfg: ImtNetConfig,
    device: &B::Device,
) -> Result<ImtNet<B>, RecorderError> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    ImtNet::<B>::new(cfg, device).load_file(path, &recorder, device)
}

pub mod prelude {
    pub use crate::predict::{predict_scan, predict_table, RowPrediction, ScanPrediction};
    pub use crate::{load_imt_net, InferenceBackend};
}
