//! The end-to-end run: load, filter, split, fit, and export.

use crate::callbacks::{
    BestCheckpoint, EarlyStopping, PlateauDecay, MIN_LEARNING_RATE, PLATEAU_FACTOR,
    PLATEAU_PATIENCE,
};
use crate::config::{PipelineConfig, TrainArgs};
use crate::history::{EpochMetrics, HeadLoss, HistoryWriter};
use crate::loss::{head_loss, HeadMetrics, LossPlan};
use crate::metrics::BinaryCounts;
use crate::{preview, report, TrainBackend};
use anyhow::{anyhow, bail, Context};
use burn::backend::Autodiff;
use burn::module::{AutodiffModule, Module};
use burn::optim::{AdamConfig, GradientsParams, Optimizer};
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use inference::{load_imt_net, predict_table, write_predictions_csv};
use models::{ImtNet, ImtNetConfig};
use scan_contracts::BaselineTable;
use scan_dataset::{
    baseline_path, shuffle_split, BatchSettings, ScanBatchIter, ScanTable, SplitLoaders,
};
use std::path::PathBuf;
use std::time::Instant;

type ADBackend = Autodiff<TrainBackend>;

/// Summary of a completed run.
#[derive(Debug, Clone)]
pub struct TrainOutcome {
    pub experiment_id: String,
    pub epochs_run: usize,
    pub best_epoch: usize,
    pub best_val_loss: f64,
    pub stopped_early: bool,
    pub checkpoint: PathBuf,
    pub model_path: PathBuf,
}

/// CLI entry point: resolve arguments and run the pipeline.
pub fn run_train(args: TrainArgs) -> anyhow::Result<()> {
    let cfg = args.into_config()?;
    run_pipeline(&cfg)?;
    Ok(())
}

/// Checks the requested device against the compiled backends. A GPU
/// requirement without the wgpu backend is fatal; a mixed-precision
/// request without the f16 backend degrades with a warning.
pub fn validate_backend_choice(config: &PipelineConfig) -> anyhow::Result<()> {
    if config.force_gpu && !cfg!(feature = "backend-wgpu") {
        bail!(
            "GPU required by configuration but the wgpu backend is not compiled in; \
             rebuild with --features backend-wgpu"
        );
    }
    if config.mixed_precision && !cfg!(feature = "wgpu-f16") {
        tracing::warn!("mixed precision requested but the f16 backend is not compiled in, continuing in f32");
    }
    Ok(())
}

/// Runs the whole pipeline from one immutable configuration.
pub fn run_pipeline(cfg: &PipelineConfig) -> anyhow::Result<TrainOutcome> {
    let experiment_id = cfg.experiment_id();
    let plan = LossPlan::from_heads(&cfg.heads);
    if plan.is_empty() {
        bail!("no enabled target heads; enable at least one");
    }
    if !cfg.database.has_avg_measurement() && plan.heads.iter().any(|h| h.name == "imt_avg") {
        bail!(
            "{} ground truth has no averaged measurement; disable the imt_avg head",
            cfg.database
        );
    }
    tracing::info!(%experiment_id, database = %cfg.database, input = %cfg.input, "starting run");
    <ADBackend as Backend>::seed(cfg.seed);
    init_worker_pool(cfg.n_workers);
    for path in [cfg.checkpoint_path(), cfg.model_path()] {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
    }

    let mut table =
        ScanTable::load(&cfg.data_root, cfg.database).context("loading ground-truth table")?;
    if cfg.compare_baseline {
        let path = baseline_path(&cfg.data_root, cfg.database);
        if path.exists() {
            let baseline = BaselineTable::load_csv(&path)?;
            table.merge_baseline(&baseline);
        } else {
            tracing::warn!(path = %path.display(), "baseline table not found, skipping comparison");
        }
    }

    validate_backend_choice(cfg)?;

    let splits = shuffle_split(table.rows.clone(), cfg.seed, cfg.split)?;
    tracing::info!(
        train = splits.train.len(),
        valid = splits.valid.len(),
        test = splits.test.len(),
        holdout = splits.holdout.len(),
        "split table"
    );

    let device = <ADBackend as Backend>::Device::default();
    let model_cfg = ImtNetConfig::from_heads(&cfg.heads, cfg.input.channels());
    let mut model = ImtNet::<ADBackend>::new(model_cfg.clone(), &device);
    let checkpoint = cfg.checkpoint_path();
    if cfg.resume && checkpoint.exists() {
        model = load_imt_net(&checkpoint, model_cfg.clone(), &device)
            .map_err(|e| anyhow!("warm-starting from {}: {e}", checkpoint.display()))?;
        tracing::info!(path = %checkpoint.display(), "warm-started from checkpoint");
    }

    let base = BatchSettings {
        data_root: cfg.data_root.clone(),
        batch_size: cfg.batch_size.max(1),
        shape: cfg.shape,
        input: cfg.input,
        heads: plan.heads.clone(),
        augment: Some(cfg.augment.clone()),
        shuffle: false,
        seed: cfg.seed,
        drop_last: false,
    };
    let loaders = SplitLoaders::new(splits, base, cfg.max_queue_size.max(1));
    let history = HistoryWriter::new(&cfg.log_dir())?;

    let fit = if cfg.train {
        if loaders.train_len() < cfg.batch_size.max(1) {
            bail!(
                "training split holds {} scans, fewer than one batch of {}",
                loaders.train_len(),
                cfg.batch_size
            );
        }
        if loaders.valid_len() == 0 {
            bail!("validation split is empty; raise the valid percentage");
        }
        let (fitted, summary) = fit_model(cfg, &plan, &loaders, model, &history)?;
        model = fitted;
        Some(summary)
    } else {
        None
    };

    // Export and evaluate with the best weights, not the last ones.
    let inner_device = <TrainBackend as Backend>::Device::default();
    let final_model: ImtNet<TrainBackend> = if checkpoint.exists() {
        load_imt_net(&checkpoint, model_cfg, &inner_device)
            .map_err(|e| anyhow!("reloading best checkpoint {}: {e}", checkpoint.display()))?
    } else {
        tracing::warn!("no checkpoint on disk, exporting current weights");
        model.valid()
    };

    if cfg.debug {
        preview::preview_batches(
            &final_model,
            loaders.test_iter(),
            1,
            Some(&cfg.log_dir().join("preview")),
            &inner_device,
        )?;
    }

    if !cfg.silent {
        evaluate_and_export(cfg, &plan, &final_model, &table, &inner_device)?;
    }

    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    final_model
        .clone()
        .save_file(&cfg.model_path(), &recorder)
        .with_context(|| format!("saving model to {}", cfg.model_path().display()))?;
    println!("saved model to {}", cfg.model_path().display());

    let summary = fit.unwrap_or(FitSummary {
        epochs_run: 0,
        best_epoch: 0,
        best_val_loss: f64::INFINITY,
        stopped_early: false,
    });
    Ok(TrainOutcome {
        experiment_id,
        epochs_run: summary.epochs_run,
        best_epoch: summary.best_epoch,
        best_val_loss: summary.best_val_loss,
        stopped_early: summary.stopped_early,
        checkpoint,
        model_path: cfg.model_path(),
    })
}

/// Full-table prediction, CSV export, and the evaluation report.
pub fn evaluate_and_export<B: Backend>(
    cfg: &PipelineConfig,
    plan: &LossPlan,
    model: &ImtNet<B>,
    table: &ScanTable,
    device: &B::Device,
) -> anyhow::Result<()> {
    let predictions = predict_table(
        model,
        &table.rows,
        &cfg.data_root,
        cfg.input,
        cfg.shape,
        &plan.heads,
        device,
    )?;
    let csv_path = cfg.log_dir().join("predictions.csv");
    write_predictions_csv(&csv_path, &predictions, &plan.heads)?;
    tracing::info!(path = %csv_path.display(), rows = predictions.len(), "wrote predictions");
    let rep = report::build_report(plan, &predictions);
    print!("{}", report::render_report(&rep));
    report::write_report(&cfg.log_dir().join("report.txt"), &rep)?;
    Ok(())
}

fn init_worker_pool(n_workers: usize) {
    let result = rayon::ThreadPoolBuilder::new()
        .num_threads(n_workers.max(1))
        .build_global();
    if result.is_err() {
        tracing::debug!("rayon pool already initialized");
    }
}

struct FitSummary {
    epochs_run: usize,
    best_epoch: usize,
    best_val_loss: f64,
    stopped_early: bool,
}

fn fit_model(
    cfg: &PipelineConfig,
    plan: &LossPlan,
    loaders: &SplitLoaders,
    mut model: ImtNet<ADBackend>,
    history: &HistoryWriter,
) -> anyhow::Result<(ImtNet<ADBackend>, FitSummary)> {
    let device = <ADBackend as Backend>::Device::default();
    let inner_device = <TrainBackend as Backend>::Device::default();
    let mut optim = AdamConfig::new().init();
    let mut lr = cfg.learning_rate;
    let steps_per_epoch = loaders.train_len() / cfg.batch_size.max(1);
    let mut best = BestCheckpoint::new(cfg.checkpoint_path());
    let mut early = EarlyStopping::new(cfg.early_stop_patience);
    let mut plateau = PlateauDecay::new(PLATEAU_FACTOR, PLATEAU_PATIENCE, MIN_LEARNING_RATE);
    let mut stopped_early = false;
    let mut epochs_run = 0usize;
    println!(
        "training {} for {} epochs ({steps_per_epoch} steps/epoch, batch {})",
        cfg.experiment_id(),
        cfg.epochs,
        cfg.batch_size
    );

    for epoch in 1..=cfg.epochs {
        let started = Instant::now();
        let mut train_losses = Vec::with_capacity(steps_per_epoch);
        let mut iter = loaders.train_iter(epoch as u64);
        for _ in 0..steps_per_epoch {
            let Some(batch) = iter.next_batch::<ADBackend>(&device)? else {
                break;
            };
            let preds = model.forward(batch.inputs.clone());
            let loss = plan.combined(&batch.targets, &preds);
            let detached = loss.clone().detach();
            let grads = GradientsParams::from_grads(loss.backward(), &model);
            model = optim.step(lr, model, grads);
            train_losses.push(scalar_of(detached)? as f64);
        }
        if train_losses.is_empty() {
            bail!("epoch {epoch} produced no training batches");
        }
        let train_loss = train_losses.iter().sum::<f64>() / train_losses.len() as f64;

        let eval = evaluate_split(&model.valid(), plan, loaders.valid_iter(), &inner_device)?;
        let improved = best.update(epoch, eval.val_loss, &model)?;
        lr = plateau.update(eval.val_loss, lr);

        let binary = plan
            .heads
            .iter()
            .zip(&eval.counts)
            .find_map(|(head, counts)| counts.map(|c| (head, c)));
        history.append(&EpochMetrics {
            epoch,
            learning_rate: lr,
            train_loss,
            val_loss: eval.val_loss,
            head_losses: plan
                .heads
                .iter()
                .zip(&eval.head_losses)
                .map(|(head, loss)| HeadLoss {
                    head: head.name.clone(),
                    val_loss: *loss,
                })
                .collect(),
            plaque_recall: binary.map(|(_, c)| c.recall()),
            plaque_accuracy: binary.map(|(_, c)| c.accuracy()),
            epoch_ms: started.elapsed().as_millis() as u64,
        })?;
        println!(
            "epoch {epoch}: train loss {train_loss:.4}, val loss {:.4}, lr {lr:.2e}{}",
            eval.val_loss,
            if improved { " *" } else { "" }
        );

        epochs_run = epoch;
        if early.update(eval.val_loss) {
            println!("early stopping at epoch {epoch}");
            stopped_early = true;
            break;
        }
    }

    Ok((
        model,
        FitSummary {
            epochs_run,
            best_epoch: best.best_epoch(),
            best_val_loss: best.best_loss(),
            stopped_early,
        },
    ))
}

struct SplitEval {
    val_loss: f64,
    head_losses: Vec<f64>,
    counts: Vec<Option<BinaryCounts>>,
}

/// Per-head validation losses averaged over batches, combined with the
/// plan weights, plus confusion counts for binary heads.
fn evaluate_split<B: Backend>(
    model: &ImtNet<B>,
    plan: &LossPlan,
    mut iter: ScanBatchIter,
    device: &B::Device,
) -> anyhow::Result<SplitEval> {
    let mut head_sums = vec![0.0f64; plan.len()];
    let mut counts: Vec<Option<BinaryCounts>> = plan
        .tracked
        .iter()
        .map(|t| matches!(t, HeadMetrics::BinaryRecallAccuracy).then(BinaryCounts::default))
        .collect();
    let mut batches = 0usize;
    while let Some(batch) = iter.next_batch::<B>(device)? {
        let preds = model.forward(batch.inputs.clone());
        for (i, head) in plan.heads.iter().enumerate() {
            let target = batch.targets[i].clone();
            let pred = preds[i].clone();
            if let Some(c) = counts[i].as_mut() {
                let truths = values_of(target.clone())?;
                let guesses = values_of(pred.clone())?;
                for (t, p) in truths.iter().zip(&guesses) {
                    c.update(*t, *p);
                }
            }
            head_sums[i] += scalar_of(head_loss(head.loss, target, pred))? as f64;
        }
        batches += 1;
    }
    if batches == 0 {
        bail!("validation split produced no batches");
    }
    let head_losses: Vec<f64> = head_sums.iter().map(|sum| sum / batches as f64).collect();
    let val_loss = plan
        .heads
        .iter()
        .zip(&head_losses)
        .map(|(head, loss)| head.weight * loss)
        .sum();
    Ok(SplitEval {
        val_loss,
        head_losses,
        counts,
    })
}

fn values_of<B: Backend>(t: Tensor<B, 2>) -> anyhow::Result<Vec<f32>> {
    t.into_data()
        .to_vec::<f32>()
        .map_err(|e| anyhow!("failed to read tensor values: {e:?}"))
}

fn scalar_of<B: Backend>(t: Tensor<B, 1>) -> anyhow::Result<f32> {
    let values = t
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| anyhow!("failed to read scalar: {e:?}"))?;
    values
        .first()
        .copied()
        .ok_or_else(|| anyhow!("empty scalar tensor"))
}
