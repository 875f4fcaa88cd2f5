//! Multi-head self-attention with key padding mask.
//!
//! Post-norm variant used by FastSpeech2 FFT blocks:
//! ```text
//! out = LayerNorm(fc(softmax(Q·Kᵀ / √d_k + mask) · V) + x)
//! ```

use candle_core::{D, Module, Result, Tensor};
use candle_nn::{self as nn, VarBuilder};

use super::mask::{masked_fill, min_value};

#[derive(Debug, Clone)]
pub struct MultiHeadAttention {
    w_qs: nn::Linear,
    w_ks: nn::Linear,
    w_vs: nn::Linear,
    fc: nn::Linear,
    layer_norm: nn::LayerNorm,
    n_head: usize,
    d_k: usize,
}

impl MultiHeadAttention {
    pub fn new(d_model: usize, n_head: usize, vb: VarBuilder) -> Result<Self> {
        let d_k = d_model / n_head;
        Ok(Self {
            w_qs: nn::linear(d_model, n_head * d_k, vb.pp("w_qs"))?,
            w_ks: nn::linear(d_model, n_head * d_k, vb.pp("w_ks"))?,
            w_vs: nn::linear(d_model, n_head * d_k, vb.pp("w_vs"))?,
            fc: nn::linear(n_head * d_k, d_model, vb.pp("fc"))?,
            layer_norm: nn::layer_norm(d_model, 1e-5, vb.pp("layer_norm"))?,
            n_head,
            d_k,
        })
    }

    /// Forward pass.
    ///
    /// - `x`: `[B, T, d_model]`
    /// - `key_padding_mask`: `[B, T]`, 1 at padded keys
    pub fn forward(&self, x: &Tensor, key_padding_mask: &Tensor) -> Result<Tensor> {
        let (b, t, _) = x.dims3()?;
        let split = |h: Tensor| -> Result<Tensor> {
            h.reshape((b, t, self.n_head, self.d_k))?
                .transpose(1, 2)?
                .contiguous()
        };
        let q = split(self.w_qs.forward(x)?)?; // [B, H, T, d_k]
        let k = split(self.w_ks.forward(x)?)?;
        let v = split(self.w_vs.forward(x)?)?;

        let scores = (q.matmul(&k.t()?.contiguous()?)? / (self.d_k as f64).sqrt())?; // [B, H, T, T]
        let mask = key_padding_mask.unsqueeze(1)?.unsqueeze(1)?; // [B, 1, 1, T]
        let scores = masked_fill(&scores, &mask, min_value(scores.dtype()))?;
        let attn = candle_nn::ops::softmax(&scores, D::Minus1)?;

        let out = attn
            .matmul(&v)? // [B, H, T, d_k]
            .transpose(1, 2)?
            .reshape((b, t, self.n_head * self.d_k))?;
        let out = self.fc.forward(&out)?;
        self.layer_norm.forward(&(out + x)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_attention_shape() {
        let dev = Device::Cpu;
        let vb = VarBuilder::zeros(DType::F32, &dev);
        let attn = MultiHeadAttention::new(16, 2, vb.pp("attn")).unwrap();
        let x = Tensor::randn(0f32, 1.0, (2, 5, 16), &dev).unwrap();
        let mask = Tensor::new(&[[0u8, 0, 0, 0, 0], [0, 0, 0, 1, 1]], &dev).unwrap();
        let y = attn.forward(&x, &mask).unwrap();
        assert_eq!(y.dims(), &[2, 5, 16]);
    }

    #[test]
    fn test_padded_keys_do_not_leak() {
        // Changing content at padded positions must not change valid outputs.
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let attn = MultiHeadAttention::new(8, 2, vb).unwrap();
        let mask = Tensor::new(&[[0u8, 0, 1]], &dev).unwrap();

        let valid = Tensor::randn(0f32, 1.0, (1, 2, 8), &dev).unwrap();
        let pad_a = Tensor::zeros((1, 1, 8), DType::F32, &dev).unwrap();
        let pad_b = Tensor::randn(0f32, 5.0, (1, 1, 8), &dev).unwrap();
        let xa = Tensor::cat(&[&valid, &pad_a], 1).unwrap();
        let xb = Tensor::cat(&[&valid, &pad_b], 1).unwrap();

        let ya = attn.forward(&xa, &mask).unwrap().narrow(1, 0, 2).unwrap();
        let yb = attn.forward(&xb, &mask).unwrap().narrow(1, 0, 2).unwrap();
        let diff: f32 = (ya - yb).unwrap().abs().unwrap().max_all().unwrap().to_scalar().unwrap();
        assert!(diff < 1e-5, "diff = {diff}");
    }
}
