//! Prosody (variance) adaptation.
//!
//! - [`predictor`]: conv/LayerNorm scalar predictor shared by duration, pitch and energy
//! - [`length_regulator`]: duration-based expansion from token rate to mel-frame rate
//! - [`adaptor`]: the full adaptor with quantized pitch/energy embeddings

pub mod adaptor;
pub mod length_regulator;
pub mod predictor;

pub use adaptor::{ControlFactors, VarianceAdaptor, VarianceAdaptorOutput, VarianceTargets};
