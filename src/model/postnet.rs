//! PostNet: residual refinement of the coarse mel prediction.
//!
//! ```text
//! [B, T, n_mel] → transpose
//! conv 0:     Conv1d(n_mel, 512, k=5) + BatchNorm → tanh
//! conv 1..3:  Conv1d(512, 512, k=5)   + BatchNorm → tanh
//! conv 4:     Conv1d(512, n_mel, k=5) + BatchNorm
//! → transpose → [B, T, n_mel]
//! ```
//!
//! Batch norm uses its running statistics; the caller adds the output back to
//! the input (see [`super::spectral_head`]).

use candle_core::{Module, ModuleT, Result, Tensor};
use candle_nn::{self as nn, Conv1dConfig, VarBuilder};

/// PostNet configuration.
#[derive(Debug, Clone)]
pub struct PostNetConfig {
    pub n_mel_channels: usize,
    pub embedding_dim: usize,
    pub kernel_size: usize,
    pub n_convolutions: usize,
}

impl Default for PostNetConfig {
    fn default() -> Self {
        Self {
            n_mel_channels: 80,
            embedding_dim: 512,
            kernel_size: 5,
            n_convolutions: 5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PostNet {
    convolutions: Vec<(nn::Conv1d, nn::BatchNorm)>,
}

impl PostNet {
    /// Weights at `convolutions.{i}.0.conv.*` and `convolutions.{i}.1.*`.
    pub fn new(cfg: &PostNetConfig, vb: VarBuilder) -> Result<Self> {
        let conv_cfg = Conv1dConfig {
            padding: (cfg.kernel_size - 1) / 2,
            ..Default::default()
        };
        let last = cfg.n_convolutions.saturating_sub(1);
        let convolutions = (0..cfg.n_convolutions)
            .map(|i| {
                let in_dim = if i == 0 { cfg.n_mel_channels } else { cfg.embedding_dim };
                let out_dim = if i == last { cfg.n_mel_channels } else { cfg.embedding_dim };
                let layer_vb = vb.pp(format!("convolutions.{i}"));
                let conv = nn::conv1d(
                    in_dim,
                    out_dim,
                    cfg.kernel_size,
                    conv_cfg,
                    layer_vb.pp("0.conv"),
                )?;
                let norm = nn::batch_norm(out_dim, 1e-5, layer_vb.pp("1"))?;
                Ok((conv, norm))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { convolutions })
    }

    /// `[B, T, n_mel]` → `[B, T, n_mel]` residual.
    pub fn forward(&self, x: &Tensor) -> Result<Tensor> {
        let last = self.convolutions.len().saturating_sub(1);
        let mut h = x.transpose(1, 2)?.contiguous()?;
        for (i, (conv, norm)) in self.convolutions.iter().enumerate() {
            h = norm.forward_t(&conv.forward(&h)?, false)?;
            if i < last {
                h = h.tanh()?;
            }
        }
        h.transpose(1, 2)?.contiguous()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    #[test]
    fn test_postnet_shape() {
        let dev = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &dev);
        let cfg = PostNetConfig {
            n_mel_channels: 8,
            embedding_dim: 16,
            ..Default::default()
        };
        let postnet = PostNet::new(&cfg, vb.pp("postnet")).unwrap();
        let mel = Tensor::randn(0f32, 1.0, (2, 11, 8), &dev).unwrap();
        assert_eq!(postnet.forward(&mel).unwrap().dims(), &[2, 11, 8]);
    }

    #[test]
    fn test_default_layout() {
        let cfg = PostNetConfig::default();
        assert_eq!(cfg.n_convolutions, 5);
        assert_eq!(cfg.kernel_size % 2, 1);
    }
}
