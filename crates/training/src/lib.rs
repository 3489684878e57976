#![recursion_limit = "256"]

//! Training orchestration for the carotid IMT prediction pipeline:
//! configuration, losses, the fit loop with callbacks, epoch history,
//! and the end-of-run evaluation report.

pub mod callbacks;
pub mod config;
pub mod history;
pub mod loss;
pub mod metrics;
pub mod pipeline;
pub mod preview;
pub mod report;

pub use config::{PipelineConfig, TrainArgs};
pub use models::{ImtNet, ImtNetConfig};
pub use pipeline::{run_pipeline, run_train, validate_backend_choice, TrainOutcome};

/// Backend alias for training/eval (NdArray by default; WGPU if enabled).
#[cfg(feature = "wgpu-f16")]
pub type TrainBackend = burn_wgpu::Wgpu<burn::tensor::f16>;
#[cfg(all(feature = "backend-wgpu", not(feature = "wgpu-f16")))]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;
