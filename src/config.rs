//! Configuration for the FastSpeech2 acoustic model.
//!
//! Two documents, mirroring the usual preprocessing/model split:
//!
//! - [`PreprocessConfig`]: where preprocessed data lives and the acoustic
//!   feature layout (mel channels, pitch/energy feature level)
//! - [`ModelConfig`]: transformer, variance predictor, quantization and
//!   auxiliary-conditioning hyperparameters
//!
//! Both deserialize from JSON and fall back to the LJSpeech defaults for any
//! omitted field. [`VarianceStats`] holds the pitch/energy ranges written to
//! `stats.json` by preprocessing.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Whether a prosodic attribute is predicted per token or per mel frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureLevel {
    PhonemeLevel,
    FrameLevel,
}

/// Spacing of pitch/energy quantization boundaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Quantization {
    Linear,
    Log,
}

// ---------------------------------------------------------------------------
// Preprocessing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessConfig {
    pub path: PathConfig,
    pub preprocessing: PreprocessingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    /// Directory containing `speakers.json` and `stats.json`.
    pub preprocessed_path: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PreprocessingConfig {
    pub mel: MelConfig,
    pub pitch: VarianceFeatureConfig,
    pub energy: VarianceFeatureConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MelConfig {
    pub n_mel_channels: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VarianceFeatureConfig {
    pub feature: FeatureLevel,
}

impl Default for PathConfig {
    fn default() -> Self {
        Self {
            preprocessed_path: PathBuf::from("./preprocessed_data/LJSpeech"),
        }
    }
}

impl Default for MelConfig {
    fn default() -> Self {
        Self { n_mel_channels: 80 }
    }
}

impl Default for VarianceFeatureConfig {
    fn default() -> Self {
        Self {
            feature: FeatureLevel::PhonemeLevel,
        }
    }
}

impl PreprocessConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn speakers_path(&self) -> PathBuf {
        self.path.preprocessed_path.join("speakers.json")
    }

    pub fn stats_path(&self) -> PathBuf {
        self.path.preprocessed_path.join("stats.json")
    }
}

// ---------------------------------------------------------------------------
// Model
// ---------------------------------------------------------------------------

/// Top-level model configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub transformer: TransformerConfig,
    pub variance_predictor: VariancePredictorConfig,
    pub variance_embedding: VarianceEmbeddingConfig,
    pub hed: HedConfig,
    pub multi_speaker: bool,
    pub max_seq_len: usize,
    /// Token vocabulary size including the padding id 0.
    pub vocab_size: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformerConfig {
    pub encoder_layer: usize,
    pub encoder_head: usize,
    pub encoder_hidden: usize,
    pub decoder_layer: usize,
    pub decoder_head: usize,
    pub decoder_hidden: usize,
    pub conv_filter_size: usize,
    pub conv_kernel_size: [usize; 2],
    /// Dropout rates (applied in training by an external loop; ignored here).
    pub encoder_dropout: f64,
    pub decoder_dropout: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VariancePredictorConfig {
    pub filter_size: usize,
    pub kernel_size: usize,
    pub dropout: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VarianceEmbeddingConfig {
    pub pitch_quantization: Quantization,
    pub energy_quantization: Quantization,
    pub n_bins: usize,
}

/// Auxiliary (HED) conditioning and its training warm-up window.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HedConfig {
    /// Width of each auxiliary feature frame.
    pub input_dim: usize,
    /// Step at which the signal starts fading in.
    pub warmup_start: u64,
    /// Number of steps from 0.0 to full strength.
    pub warmup_ramp: u64,
    /// Step from which no scaling is applied at all.
    pub warmup_end: u64,
    /// Frames synthesized for the zero fallback when no mel length is known.
    pub fallback_frames: usize,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            transformer: TransformerConfig::default(),
            variance_predictor: VariancePredictorConfig::default(),
            variance_embedding: VarianceEmbeddingConfig::default(),
            hed: HedConfig::default(),
            multi_speaker: false,
            max_seq_len: 1000,
            vocab_size: 361,
        }
    }
}

impl Default for TransformerConfig {
    fn default() -> Self {
        Self {
            encoder_layer: 4,
            encoder_head: 2,
            encoder_hidden: 256,
            decoder_layer: 6,
            decoder_head: 2,
            decoder_hidden: 256,
            conv_filter_size: 1024,
            conv_kernel_size: [9, 1],
            encoder_dropout: 0.2,
            decoder_dropout: 0.2,
        }
    }
}

impl Default for VariancePredictorConfig {
    fn default() -> Self {
        Self {
            filter_size: 256,
            kernel_size: 3,
            dropout: 0.5,
        }
    }
}

impl Default for VarianceEmbeddingConfig {
    fn default() -> Self {
        Self {
            pitch_quantization: Quantization::Linear,
            energy_quantization: Quantization::Linear,
            n_bins: 256,
        }
    }
}

impl Default for HedConfig {
    fn default() -> Self {
        Self {
            input_dim: 12,
            warmup_start: 16_000,
            warmup_ramp: 16_000,
            warmup_end: 36_000,
            fallback_frames: 100,
        }
    }
}

impl ModelConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let cfg: Self = serde_json::from_str(&text)?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Reject hyperparameter combinations the network cannot be built with.
    pub fn validate(&self) -> Result<()> {
        let t = &self.transformer;
        if t.encoder_head == 0 || t.encoder_hidden % t.encoder_head != 0 {
            return Err(Error::Config(format!(
                "encoder_hidden {} not divisible by encoder_head {}",
                t.encoder_hidden, t.encoder_head
            )));
        }
        if t.decoder_head == 0 || t.decoder_hidden % t.decoder_head != 0 {
            return Err(Error::Config(format!(
                "decoder_hidden {} not divisible by decoder_head {}",
                t.decoder_hidden, t.decoder_head
            )));
        }
        // The fused sequence is encoder-width and feeds the decoder directly.
        if t.encoder_hidden != t.decoder_hidden {
            return Err(Error::Config(format!(
                "encoder_hidden {} must equal decoder_hidden {}",
                t.encoder_hidden, t.decoder_hidden
            )));
        }
        for k in t.conv_kernel_size {
            if k % 2 == 0 {
                return Err(Error::Config(format!(
                    "conv_kernel_size must be odd, got {k}"
                )));
            }
        }
        if self.variance_predictor.kernel_size % 2 == 0 {
            return Err(Error::Config(format!(
                "variance predictor kernel_size must be odd, got {}",
                self.variance_predictor.kernel_size
            )));
        }
        if self.variance_embedding.n_bins < 2 {
            return Err(Error::Config(format!(
                "n_bins must be at least 2, got {}",
                self.variance_embedding.n_bins
            )));
        }
        let hed = &self.hed;
        if hed.warmup_ramp == 0 || hed.warmup_start > hed.warmup_end {
            return Err(Error::Config(format!(
                "invalid hed warm-up window: start={} ramp={} end={}",
                hed.warmup_start, hed.warmup_ramp, hed.warmup_end
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Variance statistics
// ---------------------------------------------------------------------------

/// Pitch/energy ranges from preprocessing: each entry is `[min, max, mean, std]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarianceStats {
    pub pitch: [f64; 4],
    pub energy: [f64; 4],
}

impl VarianceStats {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn pitch_range(&self) -> (f64, f64) {
        (self.pitch[0], self.pitch[1])
    }

    pub fn energy_range(&self) -> (f64, f64) {
        (self.energy[0], self.energy[1])
    }
}

impl Default for VarianceStats {
    /// Normalized LJSpeech ranges.
    fn default() -> Self {
        Self {
            pitch: [-2.917079304729967, 11.391254536985784, 207.6309, 46.7749],
            energy: [-1.431044578552246, 8.184337615966797, 37.8254, 26.4304],
        }
    }
}
