//! Diagnostic batch printer for debug runs.

use anyhow::anyhow;
use burn::tensor::backend::Backend;
use models::ImtNet;
use scan_dataset::{ScanBatch, ScanBatchIter};
use std::path::Path;

/// Consumes up to `loops` batches, printing ground truth, prediction,
/// and absolute error per example, then the mean error over everything
/// printed. With `dump_dir` set, the first input channel of every
/// example is written back out as a PNG for visual inspection.
pub fn preview_batches<B: Backend>(
    model: &ImtNet<B>,
    mut iter: ScanBatchIter,
    loops: usize,
    dump_dir: Option<&Path>,
    device: &B::Device,
) -> anyhow::Result<()> {
    let mut total_err = 0.0f64;
    let mut examples = 0usize;
    for batch_idx in 0..loops {
        let Some(batch) = iter.next_batch::<B>(device)? else {
            break;
        };
        if let Some(dir) = dump_dir {
            dump_inputs(dir, batch_idx, &batch)?;
        }
        let preds = model.forward(batch.inputs.clone());
        let truths = per_head_values(&batch.targets)?;
        let guesses = per_head_values(&preds)?;
        for i in 0..batch.ids.len() {
            let gt: Vec<f32> = truths.iter().map(|head| round4(head[i])).collect();
            let pred: Vec<f32> = guesses.iter().map(|head| round4(head[i])).collect();
            let err: Vec<f32> = gt
                .iter()
                .zip(&pred)
                .map(|(t, p)| round4((t - p).abs()))
                .collect();
            total_err += err.iter().map(|e| *e as f64).sum::<f64>() / err.len().max(1) as f64;
            examples += 1;
            println!("{}: gt {:?} pred {:?} err {:?}", batch.ids[i], gt, pred, err);
        }
    }
    if examples > 0 {
        println!(
            "mean abs error over {examples} examples: {:.4}",
            total_err / examples as f64
        );
    }
    Ok(())
}

fn per_head_values<B: Backend>(tensors: &[burn::tensor::Tensor<B, 2>]) -> anyhow::Result<Vec<Vec<f32>>> {
    tensors
        .iter()
        .map(|t| {
            t.clone()
                .into_data()
                .to_vec::<f32>()
                .map_err(|e| anyhow!("failed to read tensor values: {e:?}"))
        })
        .collect()
}

fn round4(v: f32) -> f32 {
    (v * 1e4).round() / 1e4
}

fn dump_inputs<B: Backend>(dir: &Path, batch_idx: usize, batch: &ScanBatch<B>) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;
    let dims = batch.inputs.dims();
    let (n, c, h, w) = (dims[0], dims[1], dims[2], dims[3]);
    let data = batch
        .inputs
        .clone()
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| anyhow!("failed to read batch inputs: {e:?}"))?;
    for i in 0..n {
        let offset = i * c * h * w;
        let mut img = image::GrayImage::new(w as u32, h as u32);
        for y in 0..h {
            for x in 0..w {
                let v = (data[offset + y * w + x].clamp(0.0, 1.0) * 255.0) as u8;
                img.put_pixel(x as u32, y as u32, image::Luma([v]));
            }
        }
        img.save(dir.join(format!("batch{batch_idx}_{}.png", batch.ids[i])))?;
    }
    Ok(())
}
