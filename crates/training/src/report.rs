//! End-of-run evaluation over the full table, against ground truth and
//! (where merged) the published baseline.

use crate::loss::LossPlan;
use crate::metrics::{BinaryCounts, RegressionErrors};
use anyhow::Context;
use inference::RowPrediction;
use scan_contracts::HeadKind;
use std::fmt::Write as _;
use std::path::Path;

#[derive(Debug, Clone)]
pub struct RegressionSummary {
    pub head: String,
    pub mae: f64,
    pub rmse: f64,
    pub n: usize,
    pub baseline_mae: Option<f64>,
    pub baseline_rmse: Option<f64>,
    pub baseline_n: usize,
}

#[derive(Debug, Clone)]
pub struct PlaqueSummary {
    pub counts: BinaryCounts,
    pub accuracy: f64,
    pub recall: f64,
}

#[derive(Debug, Clone, Default)]
pub struct EvaluationReport {
    pub rows: usize,
    pub regression: Vec<RegressionSummary>,
    pub plaque: Option<PlaqueSummary>,
}

/// Ground truth for a regression head, when the row has it.
fn regression_truth(head: &str, row: &scan_dataset::ScanRow) -> Option<f64> {
    match head {
        "imt_max" => Some(row.gt_imt_max),
        "imt_avg" => row.gt_imt_avg,
        _ => None,
    }
}

fn baseline_value(head: &str, row: &scan_dataset::ScanRow) -> Option<f64> {
    match head {
        "imt_max" => row.baseline_imt_max,
        "imt_avg" => row.baseline_imt_avg,
        _ => None,
    }
}

pub fn build_report(plan: &LossPlan, predictions: &[RowPrediction]) -> EvaluationReport {
    let mut report = EvaluationReport {
        rows: predictions.len(),
        ..EvaluationReport::default()
    };
    for head in &plan.heads {
        match head.kind() {
            HeadKind::Regression => {
                let mut ours = RegressionErrors::default();
                let mut baseline = RegressionErrors::default();
                for rp in predictions {
                    let Some(truth) = regression_truth(&head.name, &rp.row) else {
                        continue;
                    };
                    if let Some(pred) = rp.prediction.get(&head.name) {
                        ours.update(truth, pred as f64);
                    }
                    if let Some(prior) = baseline_value(&head.name, &rp.row) {
                        baseline.update(truth, prior);
                    }
                }
                report.regression.push(RegressionSummary {
                    head: head.name.clone(),
                    mae: ours.mae(),
                    rmse: ours.rmse(),
                    n: ours.len(),
                    baseline_mae: (!baseline.is_empty()).then(|| baseline.mae()),
                    baseline_rmse: (!baseline.is_empty()).then(|| baseline.rmse()),
                    baseline_n: baseline.len(),
                });
            }
            HeadKind::Binary => {
                let mut counts = BinaryCounts::default();
                for rp in predictions {
                    if let Some(pred) = rp.prediction.get(&head.name) {
                        counts.update(if rp.row.gt_plaque { 1.0 } else { 0.0 }, pred);
                    }
                }
                report.plaque = Some(PlaqueSummary {
                    counts,
                    accuracy: counts.accuracy(),
                    recall: counts.recall(),
                });
            }
        }
    }
    report
}

pub fn render_report(report: &EvaluationReport) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "evaluation over {} scans", report.rows);
    for r in &report.regression {
        let _ = write!(out, "{}: mae {:.4} rmse {:.4} (n={})", r.head, r.mae, r.rmse, r.n);
        match (r.baseline_mae, r.baseline_rmse) {
            (Some(mae), Some(rmse)) => {
                let _ = writeln!(out, " | baseline mae {mae:.4} rmse {rmse:.4} (n={})", r.baseline_n);
            }
            _ => {
                let _ = writeln!(out);
            }
        }
    }
    if let Some(p) = &report.plaque {
        let _ = writeln!(
            out,
            "plaque: accuracy {:.4} recall {:.4} (tp {} fp {} tn {} fn {})",
            p.accuracy, p.recall, p.counts.true_pos, p.counts.false_pos, p.counts.true_neg, p.counts.false_neg
        );
    }
    out
}

pub fn write_report(path: &Path, report: &EvaluationReport) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    std::fs::write(path, render_report(report))
        .with_context(|| format!("writing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use inference::ScanPrediction;
    use scan_contracts::default_heads;
    use scan_dataset::ScanRow;

    fn row_prediction(
        id: &str,
        gt_max: f64,
        baseline_max: Option<f64>,
        pred_max: f32,
        pred_plaque: f32,
    ) -> RowPrediction {
        RowPrediction {
            row: ScanRow {
                id: id.into(),
                image: "a.png".into(),
                mask: "b.png".into(),
                gt_imt_max: gt_max,
                gt_imt_avg: None,
                gt_plaque: gt_max >= 1.5,
                baseline_imt_max: baseline_max,
                baseline_imt_avg: None,
            },
            prediction: ScanPrediction {
                values: vec![("imt_max".into(), pred_max), ("plaque".into(), pred_plaque)],
            },
        }
    }

    fn plan() -> LossPlan {
        let mut heads = default_heads(true);
        heads[1].predict = false;
        LossPlan::from_heads(&heads)
    }

    #[test]
    fn report_compares_ours_and_baseline() {
        let predictions = vec![
            row_prediction("0001", 1.0, Some(1.2), 1.1, 0.1),
            row_prediction("0002", 2.0, None, 1.8, 0.9),
        ];
        let report = build_report(&plan(), &predictions);
        assert_eq!(report.rows, 2);
        let reg = &report.regression[0];
        assert_eq!(reg.head, "imt_max");
        assert_eq!(reg.n, 2);
        assert!((reg.mae - 0.15).abs() < 1e-5);
        // Baseline only covers the row that has one.
        assert_eq!(reg.baseline_n, 1);
        assert!((reg.baseline_mae.unwrap() - 0.2).abs() < 1e-9);

        let plaque = report.plaque.as_ref().unwrap();
        assert_eq!(plaque.counts.true_pos, 1);
        assert_eq!(plaque.counts.true_neg, 1);
        assert_eq!(plaque.accuracy, 1.0);
        assert_eq!(plaque.recall, 1.0);
    }

    #[test]
    fn rendered_report_lists_every_section() {
        let predictions = vec![row_prediction("0001", 1.6, Some(1.5), 1.4, 0.8)];
        let report = build_report(&plan(), &predictions);
        let text = render_report(&report);
        assert!(text.contains("evaluation over 1 scans"));
        assert!(text.contains("imt_max: mae"));
        assert!(text.contains("baseline mae"));
        assert!(text.contains("plaque: accuracy"));
    }
}
