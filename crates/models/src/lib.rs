//! Burn network definitions for IMT prediction.
//!
//! Design note: the trunk is modality-agnostic. It only knows its input
//! channel count, so the same architecture serves image-only, mask-only,
//! and stacked inputs. Output heads are declared as a tagged list and
//! produced in declaration order; adding a head never requires touching
//! the forward pass.

use burn::module::{Ignored, Module};
use burn::nn;
use burn::nn::pool::{AdaptiveAvgPool2d, AdaptiveAvgPool2dConfig};
use burn::nn::PaddingConfig2d;
use burn::tensor::activation::{relu, sigmoid};
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use scan_contracts::{HeadKind, HeadSpec};

/// Configuration of [`ImtNet`].
#[derive(Debug, Clone)]
pub struct ImtNetConfig {
    pub in_channels: usize,
    /// Filters of the first conv block; each block doubles them.
    pub base_filters: usize,
    /// Number of stride-2 conv blocks.
    pub depth: usize,
    /// Width of the shared fully-connected layer behind the heads.
    pub hidden: usize,
    /// One entry per output head, in output order.
    pub heads: Vec<HeadKind>,
}

impl Default for ImtNetConfig {
    fn default() -> Self {
        Self {
            in_channels: 1,
            base_filters: 16,
            depth: 4,
            hidden: 64,
            heads: vec![HeadKind::Regression, HeadKind::Regression],
        }
    }
}

impl ImtNetConfig {
    /// Config for the enabled subset of `heads` over a given input
    /// channel count.
    pub fn from_heads(heads: &[HeadSpec], in_channels: usize) -> Self {
        Self {
            in_channels,
            heads: heads
                .iter()
                .filter(|h| h.predict)
                .map(|h| h.kind())
                .collect(),
            ..Self::default()
        }
    }
}

/// Convolutional trunk with adaptive pooling and one linear output head
/// per declared target.
#[derive(Debug, Module)]
pub struct ImtNet<B: Backend> {
    blocks: Vec<nn::conv::Conv2d<B>>,
    pool: AdaptiveAvgPool2d,
    hidden: nn::Linear<B>,
    heads: Vec<nn::Linear<B>>,
    head_kinds: Ignored<Vec<HeadKind>>,
}

impl<B: Backend> ImtNet<B> {
    pub fn new(cfg: ImtNetConfig, device: &B::Device) -> Self {
        let mut blocks = Vec::with_capacity(cfg.depth.max(1));
        let mut channels = cfg.in_channels.max(1);
        let mut filters = cfg.base_filters.max(1);
        for _ in 0..cfg.depth.max(1) {
            blocks.push(
                nn::conv::Conv2dConfig::new([channels, filters], [3, 3])
                    .with_stride([2, 2])
                    .with_padding(PaddingConfig2d::Explicit(1, 1))
                    .init(device),
            );
            channels = filters;
            filters *= 2;
        }
        let pool = AdaptiveAvgPool2dConfig::new([1, 1]).init();
        let hidden = nn::LinearConfig::new(channels, cfg.hidden.max(1)).init(device);
        let heads = cfg
            .heads
            .iter()
            .map(|_| nn::LinearConfig::new(cfg.hidden.max(1), 1).init(device))
            .collect();
        Self {
            blocks,
            pool,
            hidden,
            heads,
            head_kinds: Ignored(cfg.heads),
        }
    }

    /// One [batch, 1] output per head, in declaration order. Binary
    /// heads pass through a sigmoid; regression heads stay raw.
    pub fn forward(&self, input: Tensor<B, 4>) -> Vec<Tensor<B, 2>> {
        let mut x = input;
        for block in &self.blocks {
            x = relu(block.forward(x));
        }
        let x = self.pool.forward(x);
        let x = x.flatten::<2>(1, 3);
        let x = relu(self.hidden.forward(x));
        self.heads
            .iter()
            .zip(self.head_kinds.iter())
            .map(|(head, kind)| {
                let out = head.forward(x.clone());
                match kind {
                    HeadKind::Regression => out,
                    HeadKind::Binary => sigmoid(out),
                }
            })
            .collect()
    }

    pub fn head_count(&self) -> usize {
        self.heads.len()
    }
}

pub mod prelude {
    pub use super::{ImtNet, ImtNetConfig};
}
