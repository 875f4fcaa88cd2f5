//! FastSpeech2 acoustic model in pure Rust.
//!
//! A candle-based implementation of the non-autoregressive FastSpeech2
//! text-to-mel model, extended with an auxiliary per-frame conditioning
//! stream (HED) that is faded in over a training-step warm-up.
//!
//! ## Architecture
//!
//! ```text
//! tokens → Encoder ──(+ speaker embedding)──→ VarianceAdaptor
//!                                                  ↓  (mel-frame rate)
//!                  hed → Linear → tanh → × scale ─→ concat → Linear (fusion)
//!                                                  ↓
//!                                               Decoder
//!                                                  ↓
//!                                   mel_linear → mel ─→ + PostNet(mel)
//! ```
//!
//! ## Modules
//!
//! - [`config`]: preprocessing/model configuration and variance statistics
//! - [`model`]: encoder, variance adaptor, HED fusion, decoder, PostNet

pub mod config;
pub mod model;

mod error;

pub use error::{Error, Result};
pub use model::variance::ControlFactors;
pub use model::{FastSpeech2, ForwardInputs, ForwardOutput};
