//! Variance predictor for duration, pitch and energy.
//!
//! ```text
//! [B, T, H] → Conv1d(k) → ReLU → LayerNorm → Conv1d(k) → ReLU → LayerNorm → Linear(F, 1) → [B, T]
//! ```

use candle_core::{Module, Result, Tensor};
use candle_nn::{self as nn, Conv1dConfig, VarBuilder};

use crate::model::transformer::mask::masked_fill;

#[derive(Debug, Clone)]
pub struct VariancePredictor {
    conv1d_1: nn::Conv1d,
    layer_norm_1: nn::LayerNorm,
    conv1d_2: nn::Conv1d,
    layer_norm_2: nn::LayerNorm,
    linear_layer: nn::Linear,
}

impl VariancePredictor {
    pub fn new(
        input_size: usize,
        filter_size: usize,
        kernel_size: usize,
        vb: VarBuilder,
    ) -> Result<Self> {
        let conv_cfg = Conv1dConfig {
            padding: (kernel_size - 1) / 2,
            ..Default::default()
        };
        let conv_vb = vb.pp("conv_layer");
        Ok(Self {
            conv1d_1: nn::conv1d(
                input_size,
                filter_size,
                kernel_size,
                conv_cfg,
                conv_vb.pp("conv1d_1.conv"),
            )?,
            layer_norm_1: nn::layer_norm(filter_size, 1e-5, conv_vb.pp("layer_norm_1"))?,
            conv1d_2: nn::conv1d(
                filter_size,
                filter_size,
                kernel_size,
                conv_cfg,
                conv_vb.pp("conv1d_2.conv"),
            )?,
            layer_norm_2: nn::layer_norm(filter_size, 1e-5, conv_vb.pp("layer_norm_2"))?,
            linear_layer: nn::linear(filter_size, 1, vb.pp("linear_layer"))?,
        })
    }

    /// Predict one scalar per position, zero where `mask == 1`.
    ///
    /// - `x`: `[B, T, input_size]`
    /// - `mask`: `[B, T]`
    pub fn forward(&self, x: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let h = Self::conv(&self.conv1d_1, x)?.relu()?;
        let h = self.layer_norm_1.forward(&h)?;
        let h = Self::conv(&self.conv1d_2, &h)?.relu()?;
        let h = self.layer_norm_2.forward(&h)?;
        let out = self.linear_layer.forward(&h)?.squeeze(2)?;
        masked_fill(&out, mask, 0.0)
    }

    /// Channel-first convolution on a time-major sequence.
    fn conv(conv: &nn::Conv1d, x: &Tensor) -> Result<Tensor> {
        conv.forward(&x.transpose(1, 2)?.contiguous()?)?
            .transpose(1, 2)?
            .contiguous()
    }
}
