//! Single-scan and whole-table prediction.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use models::ImtNet;
use scan_contracts::{HeadSpec, InputKind};
use scan_dataset::{assemble_input, DatasetError, ScanRow};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PredictError {
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error("model produced {got} outputs, expected {expected}")]
    HeadArity { got: usize, expected: usize },
    #[error("failed to read model output: {0}")]
    Output(String),
    #[error("failed to write {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Ordered (head name, value) pairs for one scan, in head declaration
/// order.
#[derive(Debug, Clone, PartialEq)]
pub struct ScanPrediction {
    pub values: Vec<(String, f32)>,
}

impl ScanPrediction {
    pub fn get(&self, name: &str) -> Option<f32> {
        self.values
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }
}

/// Runs the model on one scan given by its input path(s). With both
/// paths the image and mask are depth-stacked into a two-channel input;
/// with neither, the call fails before touching the model.
pub fn predict_scan<B: Backend>(
    model: &ImtNet<B>,
    image: Option<&Path>,
    mask: Option<&Path>,
    shape: (u32, u32),
    heads: &[HeadSpec],
    device: &B::Device,
) -> Result<ScanPrediction, PredictError> {
    let input = assemble_input(image, mask, shape, None)?;
    let channels = image.is_some() as usize + mask.is_some() as usize;
    let (width, height) = shape;
    let input = Tensor::<B, 1>::from_floats(input.as_slice(), device).reshape([
        1,
        channels,
        height as usize,
        width as usize,
    ]);
    let outputs = model.forward(input);

    let enabled: Vec<&HeadSpec> = heads.iter().filter(|h| h.predict).collect();
    if outputs.len() != enabled.len() {
        return Err(PredictError::HeadArity {
            got: outputs.len(),
            expected: enabled.len(),
        });
    }
    let mut values = Vec::with_capacity(enabled.len());
    for (head, out) in enabled.iter().zip(outputs) {
        let scalars = out
            .into_data()
            .to_vec::<f32>()
            .map_err(|e| PredictError::Output(format!("{e:?}")))?;
        let value = scalars
            .first()
            .copied()
            .ok_or_else(|| PredictError::Output("empty head output".into()))?;
        values.push((head.name.clone(), value));
    }
    Ok(ScanPrediction { values })
}

/// One table row together with its prediction.
#[derive(Debug, Clone)]
pub struct RowPrediction {
    pub row: ScanRow,
    pub prediction: ScanPrediction,
}

/// Runs the single-scan predictor over every row, sequentially and in
/// table order, so predictions stay aligned with rows.
pub fn predict_table<B: Backend>(
    model: &ImtNet<B>,
    rows: &[ScanRow],
    data_root: &Path,
    input: InputKind,
    shape: (u32, u32),
    heads: &[HeadSpec],
    device: &B::Device,
) -> Result<Vec<RowPrediction>, PredictError> {
    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let (image_rel, mask_rel) = row.paths_for(input);
        let image = image_rel.map(|p| data_root.join(p));
        let mask = mask_rel.map(|p| data_root.join(p));
        let prediction = predict_scan(model, image.as_deref(), mask.as_deref(), shape, heads, device)?;
        out.push(RowPrediction {
            row: row.clone(),
            prediction,
        });
    }
    Ok(out)
}

/// Writes one row per scan: ground truth first, baseline columns when
/// any row carries merged baseline values, then one `predicted_<name>`
/// column per enabled head, in head order.
pub fn write_predictions_csv(
    path: &Path,
    predictions: &[RowPrediction],
    heads: &[HeadSpec],
) -> Result<(), PredictError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| PredictError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let csv_err = |source| PredictError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let mut writer = csv::Writer::from_path(path).map_err(csv_err)?;

    let with_baseline = predictions
        .iter()
        .any(|rp| rp.row.baseline_imt_max.is_some() || rp.row.baseline_imt_avg.is_some());

    let mut header = vec![
        "scan_id".to_string(),
        "gt_imt_max".to_string(),
        "gt_imt_avg".to_string(),
        "gt_plaque".to_string(),
    ];
    if with_baseline {
        header.push("baseline_imt_max".to_string());
        header.push("baseline_imt_avg".to_string());
    }
    for head in heads.iter().filter(|h| h.predict) {
        header.push(format!("predicted_{}", head.name));
    }
    writer.write_record(&header).map_err(csv_err)?;

    for rp in predictions {
        let mut record = vec![
            rp.row.id.clone(),
            rp.row.gt_imt_max.to_string(),
            rp.row.gt_imt_avg.map(|v| v.to_string()).unwrap_or_default(),
            u8::from(rp.row.gt_plaque).to_string(),
        ];
        if with_baseline {
            record.push(rp.row.baseline_imt_max.map(|v| v.to_string()).unwrap_or_default());
            record.push(rp.row.baseline_imt_avg.map(|v| v.to_string()).unwrap_or_default());
        }
        for (_, value) in &rp.prediction.values {
            record.push(value.to_string());
        }
        writer.write_record(&record).map_err(csv_err)?;
    }
    writer.flush().map_err(|source| PredictError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::InferenceBackend;
    use image::{GrayImage, Luma};
    use models::ImtNetConfig;
    use scan_contracts::default_heads;

    fn tiny_model(heads: &[HeadSpec], channels: usize) -> ImtNet<InferenceBackend> {
        let cfg = ImtNetConfig {
            base_filters: 4,
            depth: 2,
            hidden: 8,
            ..ImtNetConfig::from_heads(heads, channels)
        };
        ImtNet::new(cfg, &Default::default())
    }

    fn write_png(path: &Path, value: u8) {
        let mut img = GrayImage::new(8, 8);
        for p in img.pixels_mut() {
            *p = Luma([value]);
        }
        img.save(path).unwrap();
    }

    fn row(id: &str, image: &str, mask: &str) -> ScanRow {
        ScanRow {
            id: id.into(),
            image: image.into(),
            mask: mask.into(),
            gt_imt_max: 1.7,
            gt_imt_avg: Some(1.1),
            gt_plaque: true,
            baseline_imt_max: None,
            baseline_imt_avg: None,
        }
    }

    #[test]
    fn prediction_carries_one_value_per_enabled_head() {
        let dir = tempfile::tempdir().unwrap();
        let img = dir.path().join("scan.png");
        write_png(&img, 130);
        let heads = default_heads(true);
        let model = tiny_model(&heads, 1);
        let device = Default::default();

        let pred = predict_scan(&model, Some(&img), None, (8, 8), &heads, &device).unwrap();
        let names: Vec<&str> = pred.values.iter().map(|(n, _)| n.as_str()).collect();
        assert_eq!(names, ["imt_max", "imt_avg", "plaque"]);
        let plaque = pred.get("plaque").unwrap();
        assert!((0.0..=1.0).contains(&plaque));
    }

    #[test]
    fn identical_sources_give_identical_predictions() {
        let dir = tempfile::tempdir().unwrap();
        let img = dir.path().join("scan.png");
        write_png(&img, 90);
        let heads = default_heads(false);
        let model = tiny_model(&heads, 1);
        let device = Default::default();

        let from_image = predict_scan(&model, Some(&img), None, (8, 8), &heads, &device).unwrap();
        let from_mask = predict_scan(&model, None, Some(&img), (8, 8), &heads, &device).unwrap();
        assert_eq!(from_image, from_mask);
    }

    #[test]
    fn neither_source_fails_before_the_model() {
        let heads = default_heads(false);
        let model = tiny_model(&heads, 1);
        let err = predict_scan(&model, None, None, (8, 8), &heads, &Default::default());
        assert!(matches!(err, Err(PredictError::Dataset(_))));
    }

    #[test]
    fn table_prediction_preserves_row_order() {
        let dir = tempfile::tempdir().unwrap();
        for (name, value) in [("a.png", 10u8), ("b.png", 200)] {
            write_png(&dir.path().join(name), value);
        }
        let rows = vec![row("0001", "a.png", "a.png"), row("0002", "b.png", "b.png")];
        let heads = default_heads(false);
        let model = tiny_model(&heads, 1);

        let preds = predict_table(
            &model,
            &rows,
            dir.path(),
            InputKind::Image,
            (8, 8),
            &heads,
            &Default::default(),
        )
        .unwrap();
        assert_eq!(preds.len(), 2);
        assert_eq!(preds[0].row.id, "0001");
        assert_eq!(preds[1].row.id, "0002");
        assert_eq!(preds[0].prediction.values.len(), 2);
    }

    #[test]
    fn csv_export_adds_predicted_columns_in_head_order() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("a.png"), 50);
        let rows = vec![row("0001", "a.png", "a.png")];
        let heads = default_heads(true);
        let model = tiny_model(&heads, 1);
        let preds = predict_table(
            &model,
            &rows,
            dir.path(),
            InputKind::Image,
            (8, 8),
            &heads,
            &Default::default(),
        )
        .unwrap();

        let out = dir.path().join("out/predictions.csv");
        write_predictions_csv(&out, &preds, &heads).unwrap();
        let body = std::fs::read_to_string(&out).unwrap();
        let mut lines = body.lines();
        assert_eq!(
            lines.next().unwrap(),
            "scan_id,gt_imt_max,gt_imt_avg,gt_plaque,predicted_imt_max,predicted_imt_avg,predicted_plaque"
        );
        let data = lines.next().unwrap();
        assert!(data.starts_with("0001,1.7,1.1,1,"));
        assert_eq!(data.split(',').count(), 7);
    }

    #[test]
    fn csv_gains_baseline_columns_after_merge() {
        let dir = tempfile::tempdir().unwrap();
        write_png(&dir.path().join("a.png"), 50);
        let mut merged = row("0001", "a.png", "a.png");
        merged.baseline_imt_max = Some(1.62);
        merged.baseline_imt_avg = Some(0.88);
        let rows = vec![merged];
        let heads = default_heads(false);
        let model = tiny_model(&heads, 1);
        let preds = predict_table(
            &model,
            &rows,
            dir.path(),
            InputKind::Image,
            (8, 8),
            &heads,
            &Default::default(),
        )
        .unwrap();

        let out = dir.path().join("predictions.csv");
        write_predictions_csv(&out, &preds, &heads).unwrap();
        let body = std::fs::read_to_string(&out).unwrap();
        let mut lines = body.lines();
        assert_eq!(
            lines.next().unwrap(),
            "scan_id,gt_imt_max,gt_imt_avg,gt_plaque,baseline_imt_max,baseline_imt_avg,predicted_imt_max,predicted_imt_avg"
        );
        assert!(lines.next().unwrap().starts_with("0001,1.7,1.1,1,1.62,0.88,"));
    }
}
