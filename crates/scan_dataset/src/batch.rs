//! Batch iteration over scan rows, with optional threaded prefetch.
//!
//! Batches decode on the rayon pool, collate to flat CPU buffers, and
//! only become tensors on the caller's device. The prefetching variant
//! keeps a bounded queue of collated batches warm behind a worker
//! thread, so decode overlaps with the training step.

use crate::aug::{AugmentParams, AugmentPipeline};
use crate::loader::assemble_input;
use crate::splits::SplitSets;
use crate::types::{DatasetError, DatasetResult, ScanRow};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use crossbeam_channel::{bounded, Receiver};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use scan_contracts::{HeadSpec, InputKind};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::io::Write;
use std::path::PathBuf;
use std::thread;
use std::time::Instant;

/// Batch production settings shared by the split iterators.
#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub data_root: PathBuf,
    pub batch_size: usize,
    /// (width, height) every input is resized to.
    pub shape: (u32, u32),
    pub input: InputKind,
    /// Enabled heads only, in declaration order.
    pub heads: Vec<HeadSpec>,
    pub augment: Option<AugmentParams>,
    pub shuffle: bool,
    pub seed: u64,
    pub drop_last: bool,
}

/// One collated batch on the compute device.
#[derive(Debug)]
pub struct ScanBatch<B: Backend> {
    /// [batch, channels, height, width]
    pub inputs: Tensor<B, 4>,
    /// One [batch, 1] target tensor per enabled head, in head order.
    pub targets: Vec<Tensor<B, 2>>,
    pub ids: Vec<String>,
}

/// CPU-side batch as produced by decode workers.
struct RawBatch {
    inputs: Vec<f32>,
    targets: Vec<Vec<f32>>,
    ids: Vec<String>,
    len: usize,
}

enum IterKind {
    Direct { rows: Vec<ScanRow>, cursor: usize },
    Stream { rx: Receiver<Option<RawBatch>>, done: bool },
}

pub struct ScanBatchIter {
    kind: IterKind,
    settings: BatchSettings,
    aug: Option<AugmentPipeline>,
    total: usize,
    samples_out: usize,
    batches_out: usize,
    started: Instant,
    last_log: Instant,
    progress: bool,
    trace_path: Option<PathBuf>,
}

impl ScanBatchIter {
    /// Iterator that assembles batches on the calling thread.
    pub fn direct(rows: Vec<ScanRow>, settings: BatchSettings) -> Self {
        let rows = ordered_rows(rows, &settings);
        let total = rows.len();
        let aug = settings
            .augment
            .clone()
            .map(|params| AugmentPipeline::new(params, settings.seed));
        Self {
            kind: IterKind::Direct { rows, cursor: 0 },
            settings,
            aug,
            total,
            samples_out: 0,
            batches_out: 0,
            started: Instant::now(),
            last_log: Instant::now(),
            progress: std::env::var("SCAN_DATASET_PROGRESS").is_ok_and(|v| v != "0"),
            trace_path: std::env::var("SCAN_DATASET_TRACE").ok().map(PathBuf::from),
        }
    }

    /// Iterator backed by a worker thread keeping up to `queue` collated
    /// batches ready ahead of the caller.
    pub fn prefetched(rows: Vec<ScanRow>, settings: BatchSettings, queue: usize) -> Self {
        let (tx, rx) = bounded(queue.max(1));
        let mut inner = ScanBatchIter::direct(rows, settings.clone());
        let total = inner.total;
        thread::spawn(move || {
            while let Some(raw) = inner.next_raw() {
                if tx.send(Some(raw)).is_err() {
                    return;
                }
            }
            let _ = tx.send(None);
        });
        Self {
            kind: IterKind::Stream { rx, done: false },
            settings,
            aug: None,
            total,
            samples_out: 0,
            batches_out: 0,
            started: Instant::now(),
            last_log: Instant::now(),
            progress: std::env::var("SCAN_DATASET_PROGRESS").is_ok_and(|v| v != "0"),
            trace_path: std::env::var("SCAN_DATASET_TRACE").ok().map(PathBuf::from),
        }
    }

    /// Total samples this iterator was built over, before skips.
    pub fn len(&self) -> usize {
        self.total
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    fn next_raw(&mut self) -> Option<RawBatch> {
        let Self {
            kind,
            settings,
            aug,
            ..
        } = self;
        match kind {
            IterKind::Direct { rows, cursor } => {
                while *cursor < rows.len() {
                    let end = (*cursor + settings.batch_size.max(1)).min(rows.len());
                    let slice = &rows[*cursor..end];
                    *cursor = end;
                    if settings.drop_last && slice.len() < settings.batch_size {
                        return None;
                    }
                    let decoded: Vec<(String, Vec<f32>, Vec<f32>)> = slice
                        .par_iter()
                        .filter_map(|row| match decode_row(row, settings, aug.as_ref()) {
                            Ok((input, targets)) => Some((row.id.clone(), input, targets)),
                            Err(error) => {
                                tracing::warn!(id = %row.id, %error, "skipping scan");
                                None
                            }
                        })
                        .collect();
                    if decoded.is_empty() {
                        continue;
                    }
                    return Some(collate(decoded, settings));
                }
                None
            }
            IterKind::Stream { rx, done } => {
                if *done {
                    return None;
                }
                match rx.recv() {
                    Ok(Some(raw)) => Some(raw),
                    Ok(None) | Err(_) => {
                        *done = true;
                        None
                    }
                }
            }
        }
    }

    /// Next batch as device tensors, or `None` when exhausted. Rows that
    /// fail to decode are skipped with a warning; a batch only surfaces
    /// when at least one row survives.
    pub fn next_batch<B: Backend>(&mut self, device: &B::Device) -> DatasetResult<Option<ScanBatch<B>>> {
        let raw = match self.next_raw() {
            Some(raw) => raw,
            None => return Ok(None),
        };
        let (width, height) = self.settings.shape;
        let channels = self.settings.input.channels();
        let expected = raw.len * channels * (width as usize) * (height as usize);
        if raw.inputs.len() != expected {
            return Err(DatasetError::Validation(format!(
                "collated batch holds {} values, expected {expected}",
                raw.inputs.len()
            )));
        }
        let inputs = Tensor::<B, 1>::from_floats(raw.inputs.as_slice(), device).reshape([
            raw.len,
            channels,
            height as usize,
            width as usize,
        ]);
        let mut targets = Vec::with_capacity(raw.targets.len());
        for values in &raw.targets {
            targets.push(Tensor::<B, 1>::from_floats(values.as_slice(), device).reshape([raw.len, 1]));
        }
        self.samples_out += raw.len;
        self.batches_out += 1;
        self.maybe_log_progress();
        self.maybe_trace(raw.len);
        Ok(Some(ScanBatch {
            inputs,
            targets,
            ids: raw.ids,
        }))
    }

    fn maybe_log_progress(&mut self) {
        if !self.progress || self.last_log.elapsed().as_secs() < 5 {
            return;
        }
        self.last_log = Instant::now();
        let elapsed = self.started.elapsed().as_secs_f64().max(1e-6);
        println!(
            "[dataset] {} batches, {} samples, {:.1} samples/s",
            self.batches_out,
            self.samples_out,
            self.samples_out as f64 / elapsed
        );
    }

    fn maybe_trace(&self, batch_len: usize) {
        let Some(path) = &self.trace_path else { return };
        let record = serde_json::json!({
            "elapsed_ms": self.started.elapsed().as_millis() as u64,
            "batches": self.batches_out,
            "samples": self.samples_out,
            "batch_len": batch_len,
        });
        if let Ok(mut file) = std::fs::OpenOptions::new().create(true).append(true).open(path) {
            let _ = writeln!(file, "{record}");
        }
    }
}

fn ordered_rows(mut rows: Vec<ScanRow>, settings: &BatchSettings) -> Vec<ScanRow> {
    if settings.shuffle {
        let mut rng = StdRng::seed_from_u64(settings.seed);
        rows.shuffle(&mut rng);
    }
    rows
}

fn sample_key(id: &str) -> u64 {
    let mut hasher = DefaultHasher::new();
    id.hash(&mut hasher);
    hasher.finish()
}

fn decode_row(
    row: &ScanRow,
    settings: &BatchSettings,
    aug: Option<&AugmentPipeline>,
) -> DatasetResult<(Vec<f32>, Vec<f32>)> {
    let (image_rel, mask_rel) = row.paths_for(settings.input);
    let image = image_rel.map(|p| settings.data_root.join(p));
    let mask = mask_rel.map(|p| settings.data_root.join(p));
    let input = assemble_input(
        image.as_deref(),
        mask.as_deref(),
        settings.shape,
        aug.map(|pipeline| (pipeline, sample_key(&row.id))),
    )?;
    let mut targets = Vec::with_capacity(settings.heads.len());
    for head in &settings.heads {
        targets.push(target_value(row, head)?);
    }
    Ok((input, targets))
}

fn collate(decoded: Vec<(String, Vec<f32>, Vec<f32>)>, settings: &BatchSettings) -> RawBatch {
    let len = decoded.len();
    let plane = (settings.shape.0 * settings.shape.1) as usize;
    let mut inputs = Vec::with_capacity(len * plane * settings.input.channels());
    let mut targets: Vec<Vec<f32>> = vec![Vec::with_capacity(len); settings.heads.len()];
    let mut ids = Vec::with_capacity(len);
    for (id, input, values) in decoded {
        inputs.extend_from_slice(&input);
        for (slot, value) in targets.iter_mut().zip(values) {
            slot.push(value);
        }
        ids.push(id);
    }
    RawBatch {
        inputs,
        targets,
        ids,
        len,
    }
}

/// Ground-truth value a head trains against.
pub fn target_value(row: &ScanRow, head: &HeadSpec) -> DatasetResult<f32> {
    match head.name.as_str() {
        "imt_max" => Ok(row.gt_imt_max as f32),
        "imt_avg" => row.gt_imt_avg.map(|v| v as f32).ok_or_else(|| {
            DatasetError::Validation(format!("scan {} has no averaged measurement", row.id))
        }),
        "plaque" => Ok(if row.gt_plaque { 1.0 } else { 0.0 }),
        other => Err(DatasetError::Validation(format!(
            "unknown target column {other:?}"
        ))),
    }
}

/// Factory for the per-split iterators of one run. Only the training
/// iterator shuffles, augments, and drops ragged final batches.
pub struct SplitLoaders {
    splits: SplitSets,
    base: BatchSettings,
    queue: usize,
}

impl SplitLoaders {
    pub fn new(splits: SplitSets, base: BatchSettings, queue: usize) -> Self {
        Self { splits, base, queue }
    }

    /// Fresh prefetching training iterator. `round` perturbs the shuffle
    /// seed so every epoch sees a new order.
    pub fn train_iter(&self, round: u64) -> ScanBatchIter {
        let mut settings = self.base.clone();
        settings.shuffle = true;
        settings.drop_last = true;
        settings.seed = self.base.seed ^ round;
        ScanBatchIter::prefetched(self.splits.train.clone(), settings, self.queue)
    }

    pub fn valid_iter(&self) -> ScanBatchIter {
        ScanBatchIter::prefetched(self.splits.valid.clone(), self.eval_settings(), self.queue)
    }

    pub fn test_iter(&self) -> ScanBatchIter {
        ScanBatchIter::direct(self.splits.test.clone(), self.eval_settings())
    }

    fn eval_settings(&self) -> BatchSettings {
        let mut settings = self.base.clone();
        settings.shuffle = false;
        settings.drop_last = false;
        settings.augment = None;
        settings
    }

    pub fn train_len(&self) -> usize {
        self.splits.train.len()
    }

    pub fn valid_len(&self) -> usize {
        self.splits.valid.len()
    }

    pub fn test_len(&self) -> usize {
        self.splits.test.len()
    }
}
