//! Mel-rate decoder: sinusoidal positions + FFT blocks.

use candle_core::{Result, Tensor};
use candle_nn::VarBuilder;

use super::layers::FftBlock;
use super::position::PositionEncoding;
use crate::config::ModelConfig;

#[derive(Debug, Clone)]
pub struct Decoder {
    position_enc: PositionEncoding,
    layer_stack: Vec<FftBlock>,
    max_seq_len: usize,
    training: bool,
}

impl Decoder {
    pub fn new(cfg: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let t = &cfg.transformer;
        let position_enc =
            PositionEncoding::new(cfg.max_seq_len + 1, t.decoder_hidden, vb.dtype(), vb.device())?;
        let layer_stack = (0..t.decoder_layer)
            .map(|i| {
                FftBlock::new(
                    t.decoder_hidden,
                    t.decoder_head,
                    t.conv_filter_size,
                    t.conv_kernel_size,
                    vb.pp(format!("layer_stack.{i}")),
                )
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            position_enc,
            layer_stack,
            max_seq_len: cfg.max_seq_len,
            training: false,
        })
    }

    /// In training mode inputs longer than `max_seq_len` are cut to it.
    pub fn set_training(&mut self, training: bool) {
        self.training = training;
    }

    /// Forward pass.
    ///
    /// - `x`: `[B, T, decoder_hidden]`
    /// - `mask`: `[B, T]` mel padding mask
    ///
    /// Returns the decoded sequence and the (possibly truncated) mask.
    pub fn forward(&self, x: &Tensor, mask: &Tensor) -> Result<(Tensor, Tensor)> {
        let (_b, t, _d) = x.dims3()?;
        let (x, mask) = if self.training && t > self.max_seq_len {
            tracing::warn!(
                "decoder input of {t} frames truncated to max_seq_len {}",
                self.max_seq_len
            );
            (
                x.narrow(1, 0, self.max_seq_len)?,
                mask.narrow(1, 0, self.max_seq_len)?,
            )
        } else {
            (x.clone(), mask.clone())
        };

        let max_len = x.dim(1)?;
        let mut h = x.broadcast_add(&self.position_enc.positions(max_len)?)?;
        for layer in &self.layer_stack {
            h = layer.forward(&h, &mask)?;
        }
        Ok((h, mask))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};

    fn small_cfg() -> ModelConfig {
        let mut cfg = ModelConfig::default();
        cfg.transformer.decoder_layer = 1;
        cfg.transformer.encoder_hidden = 16;
        cfg.transformer.decoder_hidden = 16;
        cfg.transformer.conv_filter_size = 32;
        cfg.max_seq_len = 6;
        cfg
    }

    #[test]
    fn test_decoder_keeps_length_at_inference() {
        let dev = Device::Cpu;
        let vb = VarBuilder::zeros(DType::F32, &dev);
        let dec = Decoder::new(&small_cfg(), vb).unwrap();
        let x = Tensor::randn(0f32, 1.0, (2, 9, 16), &dev).unwrap();
        let mask = Tensor::zeros((2, 9), DType::U8, &dev).unwrap();
        let (y, m) = dec.forward(&x, &mask).unwrap();
        assert_eq!(y.dims(), &[2, 9, 16]);
        assert_eq!(m.dims(), &[2, 9]);
    }

    #[test]
    fn test_decoder_truncates_in_training() {
        let dev = Device::Cpu;
        let vb = VarBuilder::zeros(DType::F32, &dev);
        let mut dec = Decoder::new(&small_cfg(), vb).unwrap();
        dec.set_training(true);
        let x = Tensor::randn(0f32, 1.0, (2, 9, 16), &dev).unwrap();
        let mask = Tensor::zeros((2, 9), DType::U8, &dev).unwrap();
        let (y, m) = dec.forward(&x, &mask).unwrap();
        assert_eq!(y.dims(), &[2, 6, 16]);
        assert_eq!(m.dims(), &[2, 6]);
    }
}
