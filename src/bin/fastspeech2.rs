//! FastSpeech2 CLI: run one forward pass over token ids.
//!
//! Loads configs (JSON) and optionally safetensors weights, synthesizes a mel
//! spectrogram for each `--tokens` utterance and prints a one-line JSON
//! summary to stdout:
//!
//! ```json
//! {"batch":1,"mel_lens":[123],"mel_shape":[1,123,80],"hed":"absent","step":null}
//! ```
//!
//! Without `--weights` the model is randomly initialized, which is only useful
//! for checking shapes and configuration.

use std::path::PathBuf;

use anyhow::Context;
use candle_core::{DType, Device, Tensor};
use candle_nn::{VarBuilder, VarMap};
use clap::Parser;
use fastspeech2_rs::{
    ControlFactors, FastSpeech2, ForwardInputs,
    config::{ModelConfig, PreprocessConfig, VarianceStats},
    model::speaker::SpeakerRegistry,
};

#[derive(Parser, Debug)]
#[command(
    name = "fastspeech2",
    about = "FastSpeech2 acoustic model forward pass",
    long_about = "Run the FastSpeech2 acoustic model on token id sequences.\n\
                  A JSON summary line is printed to stdout."
)]
struct Args {
    /// Preprocessing config (JSON). Defaults to LJSpeech settings.
    #[arg(long)]
    preprocess_config: Option<PathBuf>,

    /// Model config (JSON). Defaults to LJSpeech settings.
    #[arg(long)]
    model_config: Option<PathBuf>,

    /// Model weights (safetensors). Omit for random initialization.
    #[arg(long, short = 'w')]
    weights: Option<PathBuf>,

    /// Comma-separated token ids; repeat for a batch.
    #[arg(long, short = 't', required = true)]
    tokens: Vec<String>,

    /// Speaker name from speakers.json (multi-speaker models).
    #[arg(long)]
    speaker: Option<String>,

    #[arg(long, default_value_t = 1.0)]
    pitch_control: f64,

    #[arg(long, default_value_t = 1.0)]
    energy_control: f64,

    #[arg(long, default_value_t = 1.0)]
    duration_control: f64,

    /// Feed an all-zero auxiliary signal instead of leaving it absent.
    #[arg(long)]
    zero_hed: bool,

    /// Training step for the auxiliary warm-up schedule.
    #[arg(long)]
    step: Option<u64>,
}

fn parse_tokens(line: &str) -> anyhow::Result<Vec<u32>> {
    line.split(',')
        .map(|t| {
            t.trim()
                .parse::<u32>()
                .with_context(|| format!("invalid token id '{t}'"))
        })
        .collect()
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let preprocess = match &args.preprocess_config {
        Some(path) => PreprocessConfig::from_file(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => PreprocessConfig::default(),
    };
    let model_cfg = match &args.model_config {
        Some(path) => ModelConfig::from_file(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => ModelConfig::default(),
    };

    let utterances = args
        .tokens
        .iter()
        .map(|line| parse_tokens(line))
        .collect::<anyhow::Result<Vec<_>>>()?;
    if utterances.iter().any(|u| u.is_empty()) {
        anyhow::bail!("every utterance needs at least one token");
    }

    let device = Device::cuda_if_available(0)?;
    tracing::info!("Using device: {:?}", device);

    let registry = if model_cfg.multi_speaker {
        Some(
            SpeakerRegistry::load(preprocess.speakers_path())
                .context("failed to load speakers.json")?,
        )
    } else {
        None
    };

    let varmap = VarMap::new();
    let model = match &args.weights {
        Some(path) => {
            // SAFETY: the weights file is not modified while mapped.
            let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[path], DType::F32, &device)? };
            FastSpeech2::load(&preprocess, &model_cfg, vb)
        }
        None => {
            tracing::warn!("no --weights given, using random initialization");
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
            let n_speakers = registry.as_ref().map_or(0, SpeakerRegistry::len);
            FastSpeech2::new(&preprocess, &model_cfg, n_speakers, &VarianceStats::default(), vb)
        }
    }
    .map_err(|e| anyhow::anyhow!("failed to build model: {e}"))?;

    // Pad the batch with token 0.
    let batch = utterances.len();
    let max_src_len = utterances.iter().map(Vec::len).max().unwrap_or(0);
    let mut padded = vec![0u32; batch * max_src_len];
    for (u, ids) in utterances.iter().enumerate() {
        padded[u * max_src_len..u * max_src_len + ids.len()].copy_from_slice(ids);
    }
    let texts = Tensor::from_vec(padded, (batch, max_src_len), &device)?;
    let src_lens: Vec<i64> = utterances.iter().map(|u| u.len() as i64).collect();
    let src_lens = Tensor::from_vec(src_lens, batch, &device)?;

    let mut inputs = ForwardInputs::new(texts, src_lens, max_src_len).with_controls(ControlFactors {
        pitch: args.pitch_control,
        energy: args.energy_control,
        duration: args.duration_control,
    });
    if let Some(step) = args.step {
        inputs = inputs.with_step(step);
    }
    if let Some(registry) = &registry {
        let name = args
            .speaker
            .as_deref()
            .context("multi-speaker model requires --speaker")?;
        let id = registry
            .index_of(name)
            .with_context(|| format!("unknown speaker '{name}'"))?;
        inputs = inputs.with_speakers(Tensor::from_vec(vec![id; batch], batch, &device)?);
    }

    if args.zero_hed {
        // The auxiliary frame count must match the predicted mel length, so
        // run once to learn it.
        let probe = model
            .forward(&inputs)
            .map_err(|e| anyhow::anyhow!("forward pass failed: {e}"))?;
        let frames = probe.mel.dim(1)?;
        let hed = Tensor::zeros((batch, model_cfg.hed.input_dim, frames), DType::F32, &device)?;
        inputs = inputs.with_hed(hed);
    }

    let out = model
        .forward(&inputs)
        .map_err(|e| anyhow::anyhow!("forward pass failed: {e}"))?;
    let mel_lens: Vec<i64> = out.mel_lens.to_vec1()?;

    println!(
        "{}",
        serde_json::json!({
            "batch": batch,
            "mel_lens": mel_lens,
            "mel_shape": out.postnet_mel.dims(),
            "hed": if args.zero_hed { "zero" } else { "absent" },
            "step": args.step,
        })
    );

    Ok(())
}
