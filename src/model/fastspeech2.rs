//! Top-level FastSpeech2 acoustic model.
//!
//! `FastSpeech2` orchestrates one forward pass:
//! - Padding masks from source (and optionally mel) lengths
//! - Token encoding, plus a speaker offset on multi-speaker models
//! - Variance adaptation and length regulation to mel-frame rate
//! - Auxiliary (HED) conditioning fusion, warm-up scaled by training step
//! - Decoding, mel projection and PostNet refinement
//!
//! The model keeps no state between calls: identical inputs and parameters give
//! identical outputs.

use candle_core::{DType, Tensor};
use candle_nn::VarBuilder;

use super::hed::{HedFusion, HedInput};
use super::postnet::PostNetConfig;
use super::speaker::{SpeakerConditioner, SpeakerRegistry};
use super::spectral_head::SpectralHead;
use super::transformer::mask::{get_mask_from_lengths, max_length};
use super::transformer::{Decoder, Encoder};
use super::variance::{ControlFactors, VarianceAdaptor, VarianceTargets};
use crate::config::{ModelConfig, PreprocessConfig, VarianceStats};
use crate::{Error, Result};

/// Inputs of one forward pass over a padded batch.
#[derive(Debug, Clone)]
pub struct ForwardInputs {
    /// `[B]` speaker indices, multi-speaker models only.
    pub speakers: Option<Tensor>,
    /// `[B, max_src_len]` token ids.
    pub texts: Tensor,
    /// `[B]` valid token counts.
    pub src_lens: Tensor,
    pub max_src_len: usize,
    /// `[B]` mel frame counts (training).
    pub mel_lens: Option<Tensor>,
    pub max_mel_len: Option<usize>,
    pub p_targets: Option<Tensor>,
    pub e_targets: Option<Tensor>,
    pub d_targets: Option<Tensor>,
    /// `[B, 12, T_mel]` auxiliary features.
    pub hed: Option<Tensor>,
    pub controls: ControlFactors,
    /// Current training step; `None` at inference.
    pub step: Option<u64>,
}

impl ForwardInputs {
    pub fn new(texts: Tensor, src_lens: Tensor, max_src_len: usize) -> Self {
        Self {
            speakers: None,
            texts,
            src_lens,
            max_src_len,
            mel_lens: None,
            max_mel_len: None,
            p_targets: None,
            e_targets: None,
            d_targets: None,
            hed: None,
            controls: ControlFactors::default(),
            step: None,
        }
    }

    pub fn with_speakers(mut self, speakers: Tensor) -> Self {
        self.speakers = Some(speakers);
        self
    }

    pub fn with_mel_lens(mut self, mel_lens: Tensor, max_mel_len: usize) -> Self {
        self.mel_lens = Some(mel_lens);
        self.max_mel_len = Some(max_mel_len);
        self
    }

    pub fn with_targets(
        mut self,
        pitch: Option<Tensor>,
        energy: Option<Tensor>,
        duration: Option<Tensor>,
    ) -> Self {
        self.p_targets = pitch;
        self.e_targets = energy;
        self.d_targets = duration;
        self
    }

    pub fn with_hed(mut self, hed: Tensor) -> Self {
        self.hed = Some(hed);
        self
    }

    pub fn with_controls(mut self, controls: ControlFactors) -> Self {
        self.controls = controls;
        self
    }

    pub fn with_step(mut self, step: u64) -> Self {
        self.step = Some(step);
        self
    }
}

/// Everything a forward pass produces; loss code needs both mel predictions.
#[derive(Debug, Clone)]
pub struct ForwardOutput {
    /// `[B, T, n_mel]` linear projection of the decoder output.
    pub mel: Tensor,
    /// `[B, T, n_mel]` `mel + PostNet(mel)`.
    pub postnet_mel: Tensor,
    pub pitch_prediction: Tensor,
    pub energy_prediction: Tensor,
    pub log_duration_prediction: Tensor,
    pub duration_rounded: Tensor,
    pub src_mask: Tensor,
    pub mel_mask: Tensor,
    pub src_lens: Tensor,
    pub mel_lens: Tensor,
}

/// FastSpeech2 with auxiliary conditioning after the variance adaptor.
#[derive(Debug, Clone)]
pub struct FastSpeech2 {
    encoder: Encoder,
    speaker: SpeakerConditioner,
    variance_adaptor: VarianceAdaptor,
    hed: HedFusion,
    decoder: Decoder,
    head: SpectralHead,
}

impl FastSpeech2 {
    /// Build from explicit speaker count and variance statistics.
    pub fn new(
        preprocess: &PreprocessConfig,
        cfg: &ModelConfig,
        n_speakers: usize,
        stats: &VarianceStats,
        vb: VarBuilder,
    ) -> Result<Self> {
        cfg.validate()?;
        let hidden = cfg.transformer.encoder_hidden;
        let postnet = PostNetConfig {
            n_mel_channels: preprocess.preprocessing.mel.n_mel_channels,
            ..Default::default()
        };

        let model = Self {
            encoder: Encoder::new(cfg, vb.pp("encoder"))?,
            speaker: SpeakerConditioner::new(cfg.multi_speaker, n_speakers, hidden, vb.clone())?,
            variance_adaptor: VarianceAdaptor::new(
                preprocess,
                cfg,
                stats,
                vb.pp("variance_adaptor"),
            )?,
            hed: HedFusion::new(cfg, vb.clone())?,
            decoder: Decoder::new(cfg, vb.pp("decoder"))?,
            head: SpectralHead::new(cfg.transformer.decoder_hidden, &postnet, vb)?,
        };
        tracing::info!(
            "FastSpeech2: hidden={hidden}, n_mel={}, multi_speaker={}, hed warm-up {:?}",
            postnet.n_mel_channels,
            model.speaker.is_enabled(),
            model.hed.schedule(),
        );
        Ok(model)
    }

    /// Build, reading `speakers.json` (multi-speaker only) and `stats.json`
    /// from the preprocessed data directory.
    pub fn load(preprocess: &PreprocessConfig, cfg: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let n_speakers = if cfg.multi_speaker {
            SpeakerRegistry::load(preprocess.speakers_path())?.len()
        } else {
            0
        };
        let stats = VarianceStats::from_file(preprocess.stats_path())?;
        Self::new(preprocess, cfg, n_speakers, &stats, vb)
    }

    /// Toggle training-time behaviour (decoder length cap).
    pub fn set_training(&mut self, training: bool) {
        self.decoder.set_training(training);
    }

    pub fn is_multi_speaker(&self) -> bool {
        self.speaker.is_enabled()
    }

    pub fn forward(&self, inputs: &ForwardInputs) -> Result<ForwardOutput> {
        let (batch, src_t) = inputs.texts.dims2()?;
        if src_t != inputs.max_src_len {
            return Err(Error::ShapeMismatch(format!(
                "texts padded to {src_t} tokens but max_src_len is {}",
                inputs.max_src_len
            )));
        }
        if inputs.src_lens.dims() != [batch] {
            return Err(Error::ShapeMismatch(format!(
                "src_lens {:?} do not match batch {batch}",
                inputs.src_lens.dims()
            )));
        }
        if let Some(d) = &inputs.d_targets
            && d.dims() != [batch, src_t]
        {
            return Err(Error::ShapeMismatch(format!(
                "duration targets {:?} do not match texts [{batch}, {src_t}]",
                d.dims()
            )));
        }
        for (name, target) in [("pitch", &inputs.p_targets), ("energy", &inputs.e_targets)] {
            if let Some(target) = target
                && (target.rank() != 2 || target.dim(0)? != batch)
            {
                return Err(Error::ShapeMismatch(format!(
                    "{name} targets {:?} do not match batch {batch}",
                    target.dims()
                )));
            }
        }
        let longest = max_length(&inputs.src_lens)?;
        if longest > inputs.max_src_len {
            return Err(Error::UndefinedLength(format!(
                "src length {longest} exceeds max_src_len {}",
                inputs.max_src_len
            )));
        }
        if inputs.mel_lens.is_some() && inputs.max_mel_len.is_none() {
            return Err(Error::UndefinedLength(
                "mel_lens given without max_mel_len".to_string(),
            ));
        }
        let texts = inputs.texts.to_dtype(DType::U32)?;

        let src_mask = get_mask_from_lengths(&inputs.src_lens, Some(inputs.max_src_len))?;
        let mel_mask = inputs
            .mel_lens
            .as_ref()
            .map(|lens| get_mask_from_lengths(lens, inputs.max_mel_len))
            .transpose()?;

        let output = self.encoder.forward(&texts, &src_mask)?;
        let output = self.speaker.forward(&output, inputs.speakers.as_ref())?;
        tracing::debug!("encoded: {:?}", output.dims());

        let targets = VarianceTargets {
            pitch: inputs.p_targets.as_ref(),
            energy: inputs.e_targets.as_ref(),
            duration: inputs.d_targets.as_ref(),
        };
        let adapted = self.variance_adaptor.forward(
            &output,
            &src_mask,
            mel_mask.as_ref(),
            inputs.max_mel_len,
            targets,
            inputs.controls,
        )?;
        tracing::debug!("adapted: {:?}", adapted.output.dims());

        let hed = HedInput::from(inputs.hed.as_ref());
        if matches!(hed, HedInput::Absent) {
            tracing::debug!("no auxiliary signal, fusing zero embedding");
        }
        let output = self
            .hed
            .forward(&adapted.output, hed, Some(&adapted.mel_lens), inputs.step)?;

        let (output, mel_mask) = self.decoder.forward(&output, &adapted.mel_mask)?;
        let (mel, postnet_mel) = self.head.forward(&output)?;
        tracing::debug!("mel: {:?}", mel.dims());

        Ok(ForwardOutput {
            mel,
            postnet_mel,
            pitch_prediction: adapted.pitch_prediction,
            energy_prediction: adapted.energy_prediction,
            log_duration_prediction: adapted.log_duration_prediction,
            duration_rounded: adapted.duration_rounded,
            src_mask,
            mel_mask,
            src_lens: inputs.src_lens.clone(),
            mel_lens: adapted.mel_lens,
        })
    }
}
