//! Loss functions and the per-run loss plan.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use scan_contracts::{HeadKind, HeadSpec, LossKind};

/// Predictions are clamped this far away from 0 and 1 before the log.
const EPS: f32 = 1e-6;

fn bce_elementwise<B: Backend>(targets: Tensor<B, 2>, preds: Tensor<B, 2>) -> Tensor<B, 2> {
    let preds = preds.clamp(EPS, 1.0 - EPS);
    -(targets.clone() * preds.clone().log()
        + (targets.ones_like() - targets) * (preds.ones_like() - preds).log())
}

/// Mean binary cross-entropy.
pub fn bce<B: Backend>(targets: Tensor<B, 2>, preds: Tensor<B, 2>) -> Tensor<B, 1> {
    bce_elementwise(targets, preds).mean()
}

/// BCE with each element scaled by `10 * label + 1`, so positive labels
/// weigh eleven times a negative one.
pub fn weighted_bce<B: Backend>(targets: Tensor<B, 2>, preds: Tensor<B, 2>) -> Tensor<B, 1> {
    let weights = targets.clone().mul_scalar(10.0).add_scalar(1.0);
    (bce_elementwise(targets, preds) * weights).mean()
}

/// Mean squared error.
pub fn mse<B: Backend>(targets: Tensor<B, 2>, preds: Tensor<B, 2>) -> Tensor<B, 1> {
    let diff = preds - targets;
    (diff.clone() * diff).mean()
}

/// Mean absolute error.
pub fn mae<B: Backend>(targets: Tensor<B, 2>, preds: Tensor<B, 2>) -> Tensor<B, 1> {
    (preds - targets).abs().mean()
}

pub fn head_loss<B: Backend>(kind: LossKind, targets: Tensor<B, 2>, preds: Tensor<B, 2>) -> Tensor<B, 1> {
    match kind {
        LossKind::Mse => mse(targets, preds),
        LossKind::Mae => mae(targets, preds),
        LossKind::Bce => bce(targets, preds),
        LossKind::WeightedBce => weighted_bce(targets, preds),
    }
}

/// Validation metrics tracked for a head beyond its loss.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadMetrics {
    LossOnly,
    BinaryRecallAccuracy,
}

/// Per-head losses, weights, and tracked metrics of one run, resolved
/// once from the head list by iterating it in declaration order.
#[derive(Debug, Clone)]
pub struct LossPlan {
    /// Enabled heads only, in declaration order.
    pub heads: Vec<HeadSpec>,
    pub tracked: Vec<HeadMetrics>,
}

impl LossPlan {
    pub fn from_heads(heads: &[HeadSpec]) -> Self {
        let heads: Vec<HeadSpec> = heads.iter().filter(|h| h.predict).cloned().collect();
        let tracked = heads
            .iter()
            .map(|h| match h.kind() {
                HeadKind::Binary => HeadMetrics::BinaryRecallAccuracy,
                HeadKind::Regression => HeadMetrics::LossOnly,
            })
            .collect();
        Self { heads, tracked }
    }

    pub fn len(&self) -> usize {
        self.heads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heads.is_empty()
    }

    /// Weighted sum of per-head losses over parallel target/prediction
    /// lists in head order.
    pub fn combined<B: Backend>(&self, targets: &[Tensor<B, 2>], preds: &[Tensor<B, 2>]) -> Tensor<B, 1> {
        let mut total: Option<Tensor<B, 1>> = None;
        for ((head, target), pred) in self.heads.iter().zip(targets).zip(preds) {
            let weighted = head_loss(head.loss, target.clone(), pred.clone()).mul_scalar(head.weight);
            total = Some(match total {
                Some(acc) => acc + weighted,
                None => weighted,
            });
        }
        total.unwrap_or_else(|| Tensor::zeros([1], &Default::default()))
    }
}
