//! Run configuration: one immutable struct built at startup and passed
//! through the whole pipeline.

use clap::{Parser, ValueEnum};
use scan_contracts::{Database, HeadSpec, InputKind, LossKind};
use scan_dataset::{AugmentParams, SplitSpec};
use std::path::PathBuf;

/// Everything one run needs, resolved before any work starts.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Experiment id prefix.
    pub prefix: String,
    pub database: Database,
    pub input: InputKind,
    /// (width, height) every input is resized to.
    pub shape: (u32, u32),
    /// Full head list; disabled heads stay in the list but produce no
    /// outputs, losses, or columns.
    pub heads: Vec<HeadSpec>,
    pub seed: u64,
    pub learning_rate: f64,
    pub epochs: usize,
    pub batch_size: usize,
    pub split: SplitSpec,
    /// Decode worker threads.
    pub n_workers: usize,
    /// Prefetched batch queue depth.
    pub max_queue_size: usize,
    pub augment: AugmentParams,
    pub early_stop_patience: usize,
    /// Run the fit loop; with false, the run only evaluates and exports.
    pub train: bool,
    /// Print diagnostic batches after training.
    pub debug: bool,
    /// Warm-start from an existing checkpoint of the same experiment.
    pub resume: bool,
    /// Skip the full-table prediction and report.
    pub silent: bool,
    /// Fail when no GPU backend is compiled in.
    pub force_gpu: bool,
    /// Request reduced-precision compute.
    pub mixed_precision: bool,
    /// Merge published baseline predictions for comparison.
    pub compare_baseline: bool,
    pub data_root: PathBuf,
    pub out_root: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            prefix: "exp".into(),
            database: Database::Cca,
            input: InputKind::Image,
            shape: (512, 512),
            heads: scan_contracts::default_heads(false),
            seed: 1,
            learning_rate: 1e-4,
            epochs: 40,
            batch_size: 4,
            split: SplitSpec {
                train: 70.0,
                valid: 15.0,
                test: 15.0,
            },
            n_workers: 8,
            max_queue_size: 10,
            augment: AugmentParams::default(),
            early_stop_patience: 30,
            train: true,
            debug: false,
            resume: true,
            silent: false,
            force_gpu: false,
            mixed_precision: false,
            compare_baseline: true,
            data_root: PathBuf::from("."),
            out_root: PathBuf::from("."),
        }
    }
}

impl PipelineConfig {
    /// Composite identifier naming every artifact of a run:
    /// `<prefix>_<database>_<input>_<resolution>` followed by the
    /// enabled head names with the measurement prefix stripped.
    pub fn experiment_id(&self) -> String {
        let mut parts = vec![
            self.prefix.clone(),
            self.database.as_str().to_string(),
            self.input.as_str().to_string(),
            self.shape.0.to_string(),
        ];
        for head in self.heads.iter().filter(|h| h.predict) {
            parts.push(head.short_name().to_string());
        }
        parts.join("_")
    }

    pub fn enabled_heads(&self) -> Vec<HeadSpec> {
        self.heads.iter().filter(|h| h.predict).cloned().collect()
    }

    pub fn checkpoint_path(&self) -> PathBuf {
        self.out_root
            .join("checkpoints")
            .join(format!("weights_{}.bin", self.experiment_id()))
    }

    pub fn model_path(&self) -> PathBuf {
        self.out_root
            .join("models")
            .join(format!("model_{}.bin", self.experiment_id()))
    }

    /// Per-run log directory. The `.h5` suffix is historical; the
    /// directory holds JSONL history and the report.
    pub fn log_dir(&self) -> PathBuf {
        self.out_root
            .join("logs")
            .join(format!("run_{}.h5", self.experiment_id()))
    }
}

/// Database choice on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum DatabaseArg {
    Cca,
    Bulb,
}

impl From<DatabaseArg> for Database {
    fn from(arg: DatabaseArg) -> Self {
        match arg {
            DatabaseArg::Cca => Database::Cca,
            DatabaseArg::Bulb => Database::Bulb,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "train", about = "Train the IMT prediction network end to end")]
pub struct TrainArgs {
    /// Database export to train on.
    #[arg(long, value_enum, default_value_t = DatabaseArg::Cca)]
    pub database: DatabaseArg,
    /// Input modality: img, mask, or img_and_mask.
    #[arg(long, default_value = "img")]
    pub input: String,
    /// Square input resolution in pixels.
    #[arg(long, default_value_t = 512)]
    pub resolution: u32,
    /// Experiment id prefix.
    #[arg(long, default_value = "exp")]
    pub prefix: String,
    /// Seed for shuffling, splitting, augmentation, and init.
    #[arg(long, default_value_t = 1)]
    pub seed: u64,
    /// Adam learning rate.
    #[arg(long, default_value_t = 1e-4)]
    pub lr: f64,
    /// Training epochs.
    #[arg(long, default_value_t = 40)]
    pub epochs: usize,
    /// Batch size.
    #[arg(long, default_value_t = 4)]
    pub batch_size: usize,
    /// Train split percentage.
    #[arg(long, default_value_t = 70.0)]
    pub train_pct: f64,
    /// Validation split percentage.
    #[arg(long, default_value_t = 15.0)]
    pub valid_pct: f64,
    /// Test split percentage.
    #[arg(long, default_value_t = 15.0)]
    pub test_pct: f64,
    /// Decode worker threads for batch loading.
    #[arg(long, default_value_t = 8)]
    pub workers: usize,
    /// Prefetched batch queue depth.
    #[arg(long, default_value_t = 10)]
    pub queue_size: usize,
    /// Early stopping patience in epochs.
    #[arg(long, default_value_t = 30)]
    pub patience: usize,
    /// Enable the plaque classification head.
    #[arg(long, default_value_t = false)]
    pub predict_plaque: bool,
    /// Loss weight of the plaque head.
    #[arg(long, default_value_t = 0.5)]
    pub plaque_weight: f64,
    /// Drop the maximum-IMT head.
    #[arg(long, default_value_t = false)]
    pub skip_imt_max: bool,
    /// Drop the averaged-IMT head.
    #[arg(long, default_value_t = false)]
    pub skip_imt_avg: bool,
    /// Skip the fit loop; evaluate and export only.
    #[arg(long, default_value_t = false)]
    pub no_train: bool,
    /// Print diagnostic batches after training.
    #[arg(long, default_value_t = false)]
    pub debug: bool,
    /// Start from fresh weights even when a checkpoint exists.
    #[arg(long, default_value_t = false)]
    pub no_resume: bool,
    /// Skip the full-table prediction and report.
    #[arg(long, default_value_t = false)]
    pub silent: bool,
    /// Fail when no GPU backend is compiled in.
    #[arg(long, default_value_t = false)]
    pub force_gpu: bool,
    /// Request reduced-precision compute.
    #[arg(long, default_value_t = false)]
    pub mixed_precision: bool,
    /// Skip merging the published baseline predictions.
    #[arg(long, default_value_t = false)]
    pub no_baseline: bool,
    /// Root directory containing the segmentation exports.
    #[arg(long, default_value = ".")]
    pub data_root: String,
    /// Root directory for checkpoints, models, and logs.
    #[arg(long, default_value = ".")]
    pub out_root: String,
    /// Horizontal flip probability during training.
    #[arg(long, default_value_t = 0.5)]
    pub flip_prob: f32,
    /// Brightness/contrast jitter probability.
    #[arg(long, default_value_t = 0.3)]
    pub jitter_prob: f32,
    /// Jitter strength relative to the pixel range.
    #[arg(long, default_value_t = 0.2)]
    pub jitter_strength: f32,
    /// Additive noise probability.
    #[arg(long, default_value_t = 0.2)]
    pub noise_prob: f32,
    /// Noise strength relative to the pixel range.
    #[arg(long, default_value_t = 0.05)]
    pub noise_strength: f32,
    /// Box blur probability.
    #[arg(long, default_value_t = 0.1)]
    pub blur_prob: f32,
}

impl TrainArgs {
    /// Resolves raw arguments into the run configuration. An unknown
    /// input modality is a fatal configuration error here, before any
    /// data is touched.
    pub fn into_config(self) -> anyhow::Result<PipelineConfig> {
        let input: InputKind = self.input.parse()?;
        let database: Database = self.database.into();
        let mut predict_avg = !self.skip_imt_avg;
        if predict_avg && !database.has_avg_measurement() {
            tracing::warn!(%database, "no averaged measurement in this database, disabling the imt_avg head");
            predict_avg = false;
        }
        let heads = vec![
            HeadSpec::new("imt_max", !self.skip_imt_max, LossKind::Mse, 1.0),
            HeadSpec::new("imt_avg", predict_avg, LossKind::Mse, 1.0),
            HeadSpec::new("plaque", self.predict_plaque, LossKind::WeightedBce, self.plaque_weight),
        ];
        Ok(PipelineConfig {
            prefix: self.prefix,
            database,
            input,
            shape: (self.resolution, self.resolution),
            heads,
            seed: self.seed,
            learning_rate: self.lr,
            epochs: self.epochs,
            batch_size: self.batch_size,
            split: SplitSpec {
                train: self.train_pct,
                valid: self.valid_pct,
                test: self.test_pct,
            },
            n_workers: self.workers,
            max_queue_size: self.queue_size,
            augment: AugmentParams {
                flip_prob: self.flip_prob,
                jitter_prob: self.jitter_prob,
                jitter_strength: self.jitter_strength,
                noise_prob: self.noise_prob,
                noise_strength: self.noise_strength,
                blur_prob: self.blur_prob,
            },
            early_stop_patience: self.patience,
            train: !self.no_train,
            debug: self.debug,
            resume: !self.no_resume,
            silent: self.silent,
            force_gpu: self.force_gpu,
            mixed_precision: self.mixed_precision,
            compare_baseline: !self.no_baseline,
            data_root: self.data_root.into(),
            out_root: self.out_root.into(),
        })
    }
}
