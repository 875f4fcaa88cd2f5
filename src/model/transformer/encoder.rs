//! Token encoder: embedding + sinusoidal positions + FFT blocks.

use candle_core::{Module, Result, Tensor};
use candle_nn::{self as nn, VarBuilder};

use super::layers::FftBlock;
use super::position::PositionEncoding;
use crate::config::ModelConfig;

#[derive(Debug, Clone)]
pub struct Encoder {
    src_word_emb: nn::Embedding,
    position_enc: PositionEncoding,
    layer_stack: Vec<FftBlock>,
}

impl Encoder {
    pub fn new(cfg: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let t = &cfg.transformer;
        let src_word_emb = nn::embedding(cfg.vocab_size, t.encoder_hidden, vb.pp("src_word_emb"))?;
        let position_enc =
            PositionEncoding::new(cfg.max_seq_len + 1, t.encoder_hidden, vb.dtype(), vb.device())?;
        let layer_stack = (0..t.encoder_layer)
            .map(|i| {
                FftBlock::new(
                    t.encoder_hidden,
                    t.encoder_head,
                    t.conv_filter_size,
                    t.conv_kernel_size,
                    vb.pp(format!("layer_stack.{i}")),
                )
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            src_word_emb,
            position_enc,
            layer_stack,
        })
    }

    /// Forward pass.
    ///
    /// - `src_seq`: `[B, S]` token ids
    /// - `mask`: `[B, S]` source padding mask
    ///
    /// Returns `[B, S, encoder_hidden]`, zero at padded positions.
    pub fn forward(&self, src_seq: &Tensor, mask: &Tensor) -> Result<Tensor> {
        let (_b, max_len) = src_seq.dims2()?;
        let emb = self.src_word_emb.forward(src_seq)?;
        let mut h = emb.broadcast_add(&self.position_enc.positions(max_len)?)?;
        for layer in &self.layer_stack {
            h = layer.forward(&h, mask)?;
        }
        Ok(h)
    }
}
