//! Variance adaptor: duration, pitch and energy prediction plus length regulation.
//!
//! ```text
//! x ─┬─ duration predictor → log_d
//!    ├─ [phoneme level] pitch/energy predictor → bucketize → Embedding → x += emb
//!    ├─ length regulator (d_target or round(exp(log_d) - 1) · d_control)
//!    └─ [frame level]   pitch/energy predictor → bucketize → Embedding → x += emb
//! ```

use candle_core::{D, DType, Device, Module, Tensor};
use candle_nn::{self as nn, VarBuilder};

use super::length_regulator::regulate_length;
use super::predictor::VariancePredictor;
use crate::config::{FeatureLevel, ModelConfig, PreprocessConfig, Quantization, VarianceStats};
use crate::model::transformer::mask::get_mask_from_lengths;
use crate::{Error, Result};

/// Inference-time multipliers on predicted pitch, energy and duration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlFactors {
    pub pitch: f64,
    pub energy: f64,
    pub duration: f64,
}

impl Default for ControlFactors {
    fn default() -> Self {
        Self {
            pitch: 1.0,
            energy: 1.0,
            duration: 1.0,
        }
    }
}

/// Teacher-forcing targets; any of them may be absent.
#[derive(Debug, Clone, Copy, Default)]
pub struct VarianceTargets<'a> {
    pub pitch: Option<&'a Tensor>,
    pub energy: Option<&'a Tensor>,
    pub duration: Option<&'a Tensor>,
}

/// Everything the adaptor hands back to the orchestration.
#[derive(Debug, Clone)]
pub struct VarianceAdaptorOutput {
    /// `[B, L, H]` mel-rate sequence.
    pub output: Tensor,
    pub pitch_prediction: Tensor,
    pub energy_prediction: Tensor,
    /// `[B, T]` log-domain durations, zero at padded tokens.
    pub log_duration_prediction: Tensor,
    /// `[B, T]` durations actually used for expansion.
    pub duration_rounded: Tensor,
    /// `[B]` i64 frame counts.
    pub mel_lens: Tensor,
    /// `[B, L]` mel padding mask.
    pub mel_mask: Tensor,
}

/// `n_bins - 1` quantization boundaries over `[min, max]`.
pub fn quantization_bins(
    range: (f64, f64),
    n_bins: usize,
    quantization: Quantization,
    device: &Device,
) -> Result<Tensor> {
    let (min, max) = range;
    let n = n_bins.saturating_sub(1);
    let linspace = |start: f64, end: f64| -> Vec<f64> {
        match n {
            0 => vec![],
            1 => vec![start],
            _ => (0..n)
                .map(|i| start + (end - start) * i as f64 / (n - 1) as f64)
                .collect(),
        }
    };
    let bins: Vec<f32> = match quantization {
        Quantization::Linear => linspace(min, max).into_iter().map(|v| v as f32).collect(),
        Quantization::Log => {
            if min <= 0.0 {
                return Err(Error::Config(format!(
                    "log quantization needs a positive range, got [{min}, {max}]"
                )));
            }
            linspace(min.ln(), max.ln())
                .into_iter()
                .map(|v| v.exp() as f32)
                .collect()
        }
    };
    Ok(Tensor::from_vec(bins, n, device)?)
}

/// Bucket index of each value: the number of boundaries strictly below it.
///
/// `values` of any shape, `boundaries` `[N]` ascending; returns `u32` indices
/// in `0..=N` with the shape of `values`.
pub fn bucketize(values: &Tensor, boundaries: &Tensor) -> candle_core::Result<Tensor> {
    let values = values.to_dtype(boundaries.dtype())?.unsqueeze(D::Minus1)?;
    values
        .broadcast_gt(boundaries)?
        .to_dtype(DType::F32)?
        .sum(D::Minus1)?
        .to_dtype(DType::U32)
}

/// One quantized variance attribute: predictor, boundaries and embedding.
#[derive(Debug, Clone)]
struct VarianceEmbedding {
    predictor: VariancePredictor,
    bins: Tensor,
    embedding: nn::Embedding,
    level: FeatureLevel,
}

impl VarianceEmbedding {
    /// Returns `(prediction, embedding)`. Without a target the prediction is
    /// scaled by `control` before lookup, and the scaled value is returned.
    fn forward(
        &self,
        x: &Tensor,
        target: Option<&Tensor>,
        mask: &Tensor,
        control: f64,
    ) -> candle_core::Result<(Tensor, Tensor)> {
        let prediction = self.predictor.forward(x, mask)?;
        match target {
            Some(target) => {
                let emb = self.embedding.forward(&bucketize(target, &self.bins)?)?;
                Ok((prediction, emb))
            }
            None => {
                let prediction = (prediction * control)?;
                let emb = self.embedding.forward(&bucketize(&prediction, &self.bins)?)?;
                Ok((prediction, emb))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct VarianceAdaptor {
    duration_predictor: VariancePredictor,
    pitch: VarianceEmbedding,
    energy: VarianceEmbedding,
}

impl VarianceAdaptor {
    pub fn new(
        preprocess: &PreprocessConfig,
        cfg: &ModelConfig,
        stats: &VarianceStats,
        vb: VarBuilder,
    ) -> Result<Self> {
        let hidden = cfg.transformer.encoder_hidden;
        let vp = &cfg.variance_predictor;
        let ve = &cfg.variance_embedding;
        let predictor = |name: &str| {
            VariancePredictor::new(hidden, vp.filter_size, vp.kernel_size, vb.pp(name))
        };

        let pitch = VarianceEmbedding {
            predictor: predictor("pitch_predictor")?,
            bins: quantization_bins(
                stats.pitch_range(),
                ve.n_bins,
                ve.pitch_quantization,
                vb.device(),
            )?,
            embedding: nn::embedding(ve.n_bins, hidden, vb.pp("pitch_embedding"))?,
            level: preprocess.preprocessing.pitch.feature,
        };
        let energy = VarianceEmbedding {
            predictor: predictor("energy_predictor")?,
            bins: quantization_bins(
                stats.energy_range(),
                ve.n_bins,
                ve.energy_quantization,
                vb.device(),
            )?,
            embedding: nn::embedding(ve.n_bins, hidden, vb.pp("energy_embedding"))?,
            level: preprocess.preprocessing.energy.feature,
        };
        tracing::info!(
            "variance adaptor: {} bins, pitch {:?} ({:?}), energy {:?} ({:?})",
            ve.n_bins,
            pitch.level,
            ve.pitch_quantization,
            energy.level,
            ve.energy_quantization,
        );

        Ok(Self {
            duration_predictor: predictor("duration_predictor")?,
            pitch,
            energy,
        })
    }

    /// Forward pass.
    ///
    /// - `x`: `[B, T, H]` encoder output
    /// - `src_mask`: `[B, T]`
    /// - `mel_mask`: caller's `[B, L]` mask, kept only when durations are teacher-forced
    /// - `max_len`: frame count to pad the expansion to
    pub fn forward(
        &self,
        x: &Tensor,
        src_mask: &Tensor,
        mel_mask: Option<&Tensor>,
        max_len: Option<usize>,
        targets: VarianceTargets<'_>,
        controls: ControlFactors,
    ) -> Result<VarianceAdaptorOutput> {
        let log_duration_prediction = self.duration_predictor.forward(x, src_mask)?;

        let mut x = x.clone();
        let mut pitch_prediction = None;
        let mut energy_prediction = None;
        if self.pitch.level == FeatureLevel::PhonemeLevel {
            let (pred, emb) = self.pitch.forward(&x, targets.pitch, src_mask, controls.pitch)?;
            x = (x + emb)?;
            pitch_prediction = Some(pred);
        }
        if self.energy.level == FeatureLevel::PhonemeLevel {
            let (pred, emb) = self.energy.forward(&x, targets.energy, src_mask, controls.energy)?;
            x = (x + emb)?;
            energy_prediction = Some(pred);
        }

        let (x, mel_lens, duration_rounded, mel_mask) = match targets.duration {
            Some(d_target) => {
                let (x, mel_lens) = regulate_length(&x, d_target, max_len)?;
                let mel_mask = match mel_mask {
                    Some(mask) => mask.clone(),
                    None => get_mask_from_lengths(&mel_lens, Some(x.dim(1)?))?,
                };
                let duration_rounded = d_target.to_dtype(x.dtype())?;
                (x, mel_lens, duration_rounded, mel_mask)
            }
            None => {
                let duration_rounded = ((log_duration_prediction.exp()? - 1.0)?.round()?
                    * controls.duration)?
                    .relu()?;
                let (x, mel_lens) = regulate_length(&x, &duration_rounded, max_len)?;
                let mel_mask = get_mask_from_lengths(&mel_lens, Some(x.dim(1)?))?;
                (x, mel_lens, duration_rounded, mel_mask)
            }
        };

        let mut x = x;
        if self.pitch.level == FeatureLevel::FrameLevel {
            let (pred, emb) = self.pitch.forward(&x, targets.pitch, &mel_mask, controls.pitch)?;
            x = (x + emb)?;
            pitch_prediction = Some(pred);
        }
        if self.energy.level == FeatureLevel::FrameLevel {
            let (pred, emb) = self.energy.forward(&x, targets.energy, &mel_mask, controls.energy)?;
            x = (x + emb)?;
            energy_prediction = Some(pred);
        }

        let missing = || Error::Config("variance feature level left unset".to_string());
        Ok(VarianceAdaptorOutput {
            output: x,
            pitch_prediction: pitch_prediction.ok_or_else(missing)?,
            energy_prediction: energy_prediction.ok_or_else(missing)?,
            log_duration_prediction,
            duration_rounded,
            mel_lens,
            mel_mask,
        })
    }
}
