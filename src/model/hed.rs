//! Auxiliary (HED) conditioning fusion.
//!
//! Injects a per-frame 12-dimensional auxiliary descriptor into the mel-rate
//! hidden sequence right after the variance adaptor:
//!
//! ```text
//! hed [B, 12, T] → transpose → Linear(12, H) → tanh → × warm-up scale ─┐
//!                   (absent: zeros [B, T, H]) ─────────────────────────┤
//! adapted [B, T, H] ────────────────────────────── cat(dim=-1) [B, T, 2H]
//!                                                        ↓
//!                                               Linear(2H, H) → [B, T, H]
//! ```
//!
//! The warm-up keeps the signal fully suppressed until `warmup_start`, ramps it
//! linearly over `warmup_ramp` steps and stops scaling at `warmup_end`.

use candle_core::{DType, Device, Module, Tensor};
use candle_nn::{self as nn, VarBuilder};

use crate::config::{HedConfig, ModelConfig};
use crate::model::transformer::mask::max_length;
use crate::{Error, Result};

/// Training-step schedule for the auxiliary signal strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarmupSchedule {
    pub start: u64,
    pub ramp: u64,
    pub end: u64,
}

impl Default for WarmupSchedule {
    fn default() -> Self {
        Self::from_config(&HedConfig::default())
    }
}

impl WarmupSchedule {
    pub fn from_config(cfg: &HedConfig) -> Self {
        Self {
            start: cfg.warmup_start,
            ramp: cfg.warmup_ramp,
            end: cfg.warmup_end,
        }
    }

    /// Scale for `step`, or `None` when no scaling applies (step unknown or
    /// past the window, i.e. full strength).
    ///
    /// `scale = 0` before `start`, then `min((step - start) / ramp, 1)`.
    pub fn scale(&self, step: Option<u64>) -> Option<f64> {
        let step = step?;
        if step >= self.end {
            return None;
        }
        if step < self.start {
            return Some(0.0);
        }
        Some(((step - self.start) as f64 / self.ramp as f64).min(1.0))
    }
}

/// Source of the conditioning embedding.
#[derive(Debug, Clone, Copy)]
pub enum HedInput<'a> {
    /// `[B, input_dim, T]` auxiliary features, channel-first.
    Present(&'a Tensor),
    /// No auxiliary stream; a zero embedding stands in.
    Absent,
}

impl<'a> From<Option<&'a Tensor>> for HedInput<'a> {
    fn from(hed: Option<&'a Tensor>) -> Self {
        match hed {
            Some(signal) => Self::Present(signal),
            None => Self::Absent,
        }
    }
}

/// `Linear` with Xavier-uniform weight init (bias keeps the PyTorch default).
fn xavier_linear(in_dim: usize, out_dim: usize, vb: VarBuilder) -> candle_core::Result<nn::Linear> {
    let bound = (6.0 / (in_dim + out_dim) as f64).sqrt();
    let weight = vb.get_with_hints(
        (out_dim, in_dim),
        "weight",
        nn::Init::Uniform {
            lo: -bound,
            up: bound,
        },
    )?;
    let bias_bound = 1.0 / (in_dim as f64).sqrt();
    let bias = vb.get_with_hints(
        out_dim,
        "bias",
        nn::Init::Uniform {
            lo: -bias_bound,
            up: bias_bound,
        },
    )?;
    Ok(nn::Linear::new(weight, Some(bias)))
}

#[derive(Debug, Clone)]
pub struct HedFusion {
    hed_proj: nn::Linear,
    hed_fuse: nn::Linear,
    input_dim: usize,
    hidden: usize,
    schedule: WarmupSchedule,
    fallback_frames: usize,
}

impl HedFusion {
    /// Parameters live at `hed_proj.*` and `hed_fuse.*` under `vb`.
    pub fn new(cfg: &ModelConfig, vb: VarBuilder) -> candle_core::Result<Self> {
        let hidden = cfg.transformer.encoder_hidden;
        let input_dim = cfg.hed.input_dim;
        Ok(Self {
            hed_proj: xavier_linear(input_dim, hidden, vb.pp("hed_proj"))?,
            hed_fuse: xavier_linear(2 * hidden, hidden, vb.pp("hed_fuse"))?,
            input_dim,
            hidden,
            schedule: WarmupSchedule::from_config(&cfg.hed),
            fallback_frames: cfg.hed.fallback_frames,
        })
    }

    pub fn schedule(&self) -> WarmupSchedule {
        self.schedule
    }

    /// Project a present signal: `[B, input_dim, T]` → `[B, T, H]`, scaled by the warm-up.
    pub fn project(&self, signal: &Tensor, step: Option<u64>) -> Result<Tensor> {
        let (_b, channels, _t) = signal.dims3()?;
        if channels != self.input_dim {
            return Err(Error::ShapeMismatch(format!(
                "auxiliary signal has {channels} features per frame, expected {}",
                self.input_dim
            )));
        }
        let h = signal.transpose(1, 2)?.contiguous()?; // [B, T, input_dim]
        let embed = self.hed_proj.forward(&h)?.tanh()?;
        match self.schedule.scale(step) {
            Some(scale) => Ok((embed * scale)?),
            None => Ok(embed),
        }
    }

    /// Frame count of the zero fallback: longest mel length, else the configured default.
    pub fn fallback_frames(&self, mel_lens: Option<&Tensor>) -> Result<usize> {
        match mel_lens {
            Some(lens) => Ok(max_length(lens)?),
            None => Ok(self.fallback_frames),
        }
    }

    /// Conditioning embedding for either branch, always `[B, T, H]`.
    pub fn embed(
        &self,
        hed: HedInput<'_>,
        batch: usize,
        mel_lens: Option<&Tensor>,
        step: Option<u64>,
        dtype: DType,
        device: &Device,
    ) -> Result<Tensor> {
        match hed {
            HedInput::Present(signal) => self.project(&signal.to_dtype(dtype)?, step),
            HedInput::Absent => {
                let frames = self.fallback_frames(mel_lens)?;
                Ok(Tensor::zeros((batch, frames, self.hidden), dtype, device)?)
            }
        }
    }

    /// Fuse the conditioning embedding into `adapted` (`[B, T, H]` → `[B, T, H]`).
    ///
    /// An absent signal with known `mel_lens` fuses zeros over all `T` adapted
    /// frames; without lengths it falls back to [`Self::fallback_frames`].
    ///
    /// Batch or frame disagreement between the two is a [`Error::ShapeMismatch`].
    pub fn forward(
        &self,
        adapted: &Tensor,
        hed: HedInput<'_>,
        mel_lens: Option<&Tensor>,
        step: Option<u64>,
    ) -> Result<Tensor> {
        let (batch, frames, _hidden) = adapted.dims3()?;
        let embed = match hed {
            // Known lengths: the adapted sequence is already padded to cover them.
            HedInput::Absent if mel_lens.is_some() => {
                Tensor::zeros((batch, frames, self.hidden), adapted.dtype(), adapted.device())?
            }
            _ => self.embed(hed, batch, mel_lens, step, adapted.dtype(), adapted.device())?,
        };
        let (embed_batch, embed_frames, _) = embed.dims3()?;
        if embed_batch != batch {
            return Err(Error::ShapeMismatch(format!(
                "auxiliary signal batch {embed_batch} != adapted batch {batch}"
            )));
        }
        if embed_frames != frames {
            return Err(Error::ShapeMismatch(format!(
                "auxiliary signal has {embed_frames} frames, adapted sequence has {frames}"
            )));
        }
        let fused = Tensor::cat(&[adapted, &embed], 2)?; // [B, T, 2H]
        Ok(self.hed_fuse.forward(&fused)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_nn::VarMap;

    fn small_cfg() -> ModelConfig {
        let mut cfg = ModelConfig::default();
        cfg.transformer.encoder_hidden = 8;
        cfg.transformer.decoder_hidden = 8;
        cfg
    }

    fn fusion() -> HedFusion {
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &Device::Cpu);
        HedFusion::new(&small_cfg(), vb).unwrap()
    }

    fn max_abs_diff(a: &Tensor, b: &Tensor) -> f32 {
        (a - b)
            .unwrap()
            .abs()
            .unwrap()
            .max_all()
            .unwrap()
            .to_scalar()
            .unwrap()
    }

    #[test]
    fn test_schedule_points() {
        let s = WarmupSchedule::default();
        assert_eq!(s.scale(Some(0)), Some(0.0));
        assert_eq!(s.scale(Some(15_999)), Some(0.0));
        assert_eq!(s.scale(Some(16_000)), Some(0.0));
        assert_eq!(s.scale(Some(20_000)), Some(0.25));
        assert_eq!(s.scale(Some(24_000)), Some(0.5));
        assert_eq!(s.scale(Some(32_000)), Some(1.0));
        assert_eq!(s.scale(Some(35_999)), Some(1.0));
        assert_eq!(s.scale(Some(36_000)), None);
        assert_eq!(s.scale(Some(1_000_000)), None);
        assert_eq!(s.scale(None), None);
    }

    #[test]
    fn test_schedule_monotonic() {
        let s = WarmupSchedule::default();
        let effective = |step: u64| s.scale(Some(step)).unwrap_or(1.0);
        let mut prev = 0.0;
        for step in (0..40_000).step_by(250) {
            let v = effective(step);
            assert!(v >= prev, "scale dropped at step {step}: {prev} → {v}");
            assert!((0.0..=1.0).contains(&v));
            prev = v;
        }
    }

    #[test]
    fn test_projection_shape_and_range() {
        let f = fusion();
        let hed = Tensor::randn(0f32, 3.0, (2, 12, 7), &Device::Cpu).unwrap();
        let embed = f.project(&hed, None).unwrap();
        assert_eq!(embed.dims(), &[2, 7, 8]);
        let peak: f32 = embed.abs().unwrap().max_all().unwrap().to_scalar().unwrap();
        assert!(peak <= 1.0);
    }

    #[test]
    fn test_projection_scaled_by_step() {
        let f = fusion();
        let hed = Tensor::randn(0f32, 1.0, (2, 12, 5), &Device::Cpu).unwrap();
        let full = f.project(&hed, None).unwrap();
        let quarter = f.project(&hed, Some(20_000)).unwrap();
        let expected = (&full * 0.25).unwrap();
        assert!(max_abs_diff(&quarter, &expected) < 1e-6);
        let past_window = f.project(&hed, Some(36_000)).unwrap();
        assert!(max_abs_diff(&past_window, &full) < 1e-7);
    }

    #[test]
    fn test_projection_rejects_wrong_width() {
        let f = fusion();
        let hed = Tensor::zeros((1, 10, 5), DType::F32, &Device::Cpu).unwrap();
        assert!(matches!(f.project(&hed, None), Err(Error::ShapeMismatch(_))));
    }

    #[test]
    fn test_fallback_frames() {
        let f = fusion();
        let lens = Tensor::new(&[4i64, 9, 2], &Device::Cpu).unwrap();
        assert_eq!(f.fallback_frames(Some(&lens)).unwrap(), 9);
        assert_eq!(f.fallback_frames(None).unwrap(), 100);
    }

    #[test]
    fn test_absent_embedding_is_zero() {
        let f = fusion();
        let lens = Tensor::new(&[3i64, 6], &Device::Cpu).unwrap();
        let embed = f
            .embed(HedInput::Absent, 2, Some(&lens), Some(20_000), DType::F32, &Device::Cpu)
            .unwrap();
        assert_eq!(embed.dims(), &[2, 6, 8]);
        let total: f32 = embed.abs().unwrap().sum_all().unwrap().to_scalar().unwrap();
        assert_eq!(total, 0.0);
    }

    #[test]
    fn test_absent_matches_fully_suppressed_signal() {
        let f = fusion();
        let dev = Device::Cpu;
        let adapted = Tensor::randn(0f32, 1.0, (2, 6, 8), &dev).unwrap();
        let lens = Tensor::new(&[6i64, 4], &dev).unwrap();
        let hed = Tensor::randn(0f32, 1.0, (2, 12, 6), &dev).unwrap();

        let absent = f.forward(&adapted, HedInput::Absent, Some(&lens), None).unwrap();
        let suppressed = f
            .forward(&adapted, HedInput::Present(&hed), Some(&lens), Some(10_000))
            .unwrap();
        assert_eq!(absent.dims(), adapted.dims());
        assert_eq!(suppressed.dims(), adapted.dims());
        assert!(max_abs_diff(&absent, &suppressed) < 1e-6);
    }

    #[test]
    fn test_fusion_at_step_20000_uses_quarter_scale() {
        let f = fusion();
        let dev = Device::Cpu;
        let adapted = Tensor::randn(0f32, 1.0, (2, 6, 8), &dev).unwrap();
        let hed = Tensor::randn(0f32, 1.0, (2, 12, 6), &dev).unwrap();
        let lens = Tensor::new(&[6i64, 5], &dev).unwrap();

        let fused = f
            .forward(&adapted, HedInput::Present(&hed), Some(&lens), Some(20_000))
            .unwrap();
        let embed = (f.project(&hed, None).unwrap() * 0.25).unwrap();
        let cat = Tensor::cat(&[&adapted, &embed], 2).unwrap();
        let expected = f.hed_fuse.forward(&cat).unwrap();
        assert!(max_abs_diff(&fused, &expected) < 1e-6);
    }

    #[test]
    fn test_absent_covers_padded_frames() {
        let f = fusion();
        let dev = Device::Cpu;
        // Padded past the longest utterance, as with an explicit max mel length.
        let adapted = Tensor::randn(0f32, 1.0, (2, 9, 8), &dev).unwrap();
        let lens = Tensor::new(&[6i64, 4], &dev).unwrap();
        let out = f.forward(&adapted, HedInput::Absent, Some(&lens), None).unwrap();
        assert_eq!(out.dims(), &[2, 9, 8]);
    }

    #[test]
    fn test_frame_mismatch_is_an_error() {
        let f = fusion();
        let dev = Device::Cpu;
        let adapted = Tensor::randn(0f32, 1.0, (2, 6, 8), &dev).unwrap();
        let hed = Tensor::randn(0f32, 1.0, (2, 12, 5), &dev).unwrap();
        let err = f
            .forward(&adapted, HedInput::Present(&hed), None, None)
            .unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch(_)), "{err}");
    }

    #[test]
    fn test_fallback_mismatch_is_an_error() {
        let f = fusion();
        let dev = Device::Cpu;
        let adapted = Tensor::randn(0f32, 1.0, (1, 6, 8), &dev).unwrap();
        // No length information: fallback of 100 frames cannot fuse with 6.
        let err = f.forward(&adapted, HedInput::Absent, None, None).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch(_)));
    }
}
