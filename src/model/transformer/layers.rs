//! Feed-forward transformer (FFT) block used by both encoder and decoder.
//!
//! ```text
//! x → MultiHeadAttention → mask → Conv1d FFN → mask
//! ```

use candle_core::{Module, Result, Tensor};
use candle_nn::{self as nn, Conv1dConfig, VarBuilder};

use super::attention::MultiHeadAttention;
use super::mask::masked_fill;

/// Position-wise feed-forward with two 1-D convolutions and a post-norm residual.
#[derive(Debug, Clone)]
pub struct PositionwiseFeedForward {
    w_1: nn::Conv1d,
    w_2: nn::Conv1d,
    layer_norm: nn::LayerNorm,
}

impl PositionwiseFeedForward {
    pub fn new(d_in: usize, d_hid: usize, kernel_size: [usize; 2], vb: VarBuilder) -> Result<Self> {
        let conv = |k: usize| Conv1dConfig {
            padding: (k - 1) / 2,
            ..Default::default()
        };
        Ok(Self {
            w_1: nn::conv1d(d_in, d_hid, kernel_size[0], conv(kernel_size[0]), vb.pp("w_1"))?,
            w_2: nn::conv1d(d_hid, d_in, kernel_size[1], conv(kernel_size[1]), vb.pp("w_2"))?,
            layer_norm: nn::layer_norm(d_in, 1e-5, vb.pp("layer_norm"))?,
        })
    }

    /// `[B, T, d_in]` → `[B, T, d_in]`
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let h = x.transpose(1, 2)?.contiguous()?; // [B, d_in, T]
        let h = self.w_1.forward(&h)?.relu()?;
        let h = self.w_2.forward(&h)?;
        let h = h.transpose(1, 2)?;
        self.layer_norm.forward(&(h + x)?)
    }
}

#[derive(Debug, Clone)]
pub struct FftBlock {
    slf_attn: MultiHeadAttention,
    pos_ffn: PositionwiseFeedForward,
}

impl FftBlock {
    pub fn new(
        d_model: usize,
        n_head: usize,
        d_inner: usize,
        kernel_size: [usize; 2],
        vb: VarBuilder,
    ) -> Result<Self> {
        Ok(Self {
            slf_attn: MultiHeadAttention::new(d_model, n_head, vb.pp("slf_attn"))?,
            pos_ffn: PositionwiseFeedForward::new(d_model, d_inner, kernel_size, vb.pp("pos_ffn"))?,
        })
    }

    /// Forward pass; padded positions (`mask == 1`) come out as zeros.
    ///
    /// - `x`: `[B, T, d_model]`
    /// - `mask`: `[B, T]`
    pub fn forward(&self, x: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let pad = mask.unsqueeze(2)?;
        let h = self.slf_attn.forward(x, mask)?;
        let h = masked_fill(&h, &pad, 0.0)?;
        let h = self.pos_ffn.forward(&h)?;
        masked_fill(&h, &pad, 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_ffn_preserves_length() {
        let dev = Device::Cpu;
        let vb = VarBuilder::zeros(DType::F32, &dev);
        let ffn = PositionwiseFeedForward::new(16, 32, [9, 1], vb).unwrap();
        let x = Tensor::randn(0f32, 1.0, (2, 7, 16), &dev).unwrap();
        assert_eq!(ffn.forward(&x).unwrap().dims(), &[2, 7, 16]);
    }

    #[test]
    fn test_fft_block_zeroes_padding() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let block = FftBlock::new(16, 2, 32, [9, 1], vb).unwrap();
        let x = Tensor::randn(0f32, 1.0, (2, 6, 16), &dev).unwrap();
        let mask = Tensor::new(&[[0u8, 0, 0, 0, 0, 0], [0, 0, 0, 0, 1, 1]], &dev).unwrap();
        let y = block.forward(&x, &mask).unwrap();
        assert_eq!(y.dims(), &[2, 6, 16]);
        let padded: f32 = y
            .narrow(0, 1, 1)
            .unwrap()
            .narrow(1, 4, 2)
            .unwrap()
            .abs()
            .unwrap()
            .sum_all()
            .unwrap()
            .to_scalar()
            .unwrap();
        assert_eq!(padded, 0.0);
    }
}
