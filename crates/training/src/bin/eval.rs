use anyhow::{anyhow, bail};
use burn::tensor::backend::Backend;
use clap::Parser;
use inference::{load_imt_net, InferenceBackend};
use models::ImtNetConfig;
use scan_contracts::{BaselineTable, Database, HeadSpec, InputKind, LossKind};
use scan_dataset::{baseline_path, ScanTable};
use std::path::PathBuf;
use training::config::DatabaseArg;
use training::loss::LossPlan;
use training::pipeline::evaluate_and_export;
use training::PipelineConfig;

#[derive(Parser, Debug)]
#[command(
    name = "eval",
    about = "Evaluate a trained IMT checkpoint over the full ground-truth table"
)]
struct Args {
    /// Database export to evaluate on.
    #[arg(long, value_enum, default_value_t = DatabaseArg::Cca)]
    database: DatabaseArg,
    /// Input modality: img, mask, or img_and_mask.
    #[arg(long, default_value = "img")]
    input: String,
    /// Square input resolution in pixels.
    #[arg(long, default_value_t = 512)]
    resolution: u32,
    /// Experiment id prefix the artifacts were saved under.
    #[arg(long, default_value = "exp")]
    prefix: String,
    /// Evaluate the plaque classification head.
    #[arg(long, default_value_t = false)]
    predict_plaque: bool,
    /// Loss weight of the plaque head.
    #[arg(long, default_value_t = 0.5)]
    plaque_weight: f64,
    /// Drop the maximum-IMT head.
    #[arg(long, default_value_t = false)]
    skip_imt_max: bool,
    /// Drop the averaged-IMT head.
    #[arg(long, default_value_t = false)]
    skip_imt_avg: bool,
    /// Checkpoint to load instead of the one named by the experiment id.
    #[arg(long)]
    checkpoint: Option<String>,
    /// Skip merging the published baseline predictions.
    #[arg(long, default_value_t = false)]
    no_baseline: bool,
    /// Root directory containing the segmentation exports.
    #[arg(long, default_value = ".")]
    data_root: String,
    /// Root directory the training artifacts were written to.
    #[arg(long, default_value = ".")]
    out_root: String,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();
    let args = Args::parse();

    let input: InputKind = args.input.parse()?;
    let database: Database = args.database.into();
    let predict_avg = !args.skip_imt_avg && database.has_avg_measurement();
    let cfg = PipelineConfig {
        prefix: args.prefix,
        database,
        input,
        shape: (args.resolution, args.resolution),
        heads: vec![
            HeadSpec::new("imt_max", !args.skip_imt_max, LossKind::Mse, 1.0),
            HeadSpec::new("imt_avg", predict_avg, LossKind::Mse, 1.0),
            HeadSpec::new("plaque", args.predict_plaque, LossKind::WeightedBce, args.plaque_weight),
        ],
        compare_baseline: !args.no_baseline,
        data_root: args.data_root.into(),
        out_root: args.out_root.into(),
        ..PipelineConfig::default()
    };
    let plan = LossPlan::from_heads(&cfg.heads);
    if plan.is_empty() {
        bail!("no enabled target heads; enable at least one");
    }

    let ckpt = args
        .checkpoint
        .map(PathBuf::from)
        .unwrap_or_else(|| cfg.checkpoint_path());
    if !ckpt.exists() {
        bail!(
            "no checkpoint at {}; train {} first or pass --checkpoint",
            ckpt.display(),
            cfg.experiment_id()
        );
    }

    let device = <InferenceBackend as Backend>::Device::default();
    let model_cfg = ImtNetConfig::from_heads(&cfg.heads, cfg.input.channels());
    let model = load_imt_net::<InferenceBackend>(&ckpt, model_cfg, &device)
        .map_err(|e| anyhow!("loading {}: {e}", ckpt.display()))?;
    println!("loaded {}", ckpt.display());

    let mut table = ScanTable::load(&cfg.data_root, cfg.database)?;
    if cfg.compare_baseline {
        let path = baseline_path(&cfg.data_root, cfg.database);
        if path.exists() {
            let baseline = BaselineTable::load_csv(&path)?;
            table.merge_baseline(&baseline);
        } else {
            tracing::warn!(path = %path.display(), "baseline table not found, skipping comparison");
        }
    }

    evaluate_and_export(&cfg, &plan, &model, &table, &device)
}
