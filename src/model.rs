//! Model components for FastSpeech2.
//!
//! ## Components
//!
//! - [`transformer`]: FFT-block encoder/decoder and padding masks
//! - [`speaker`]: speaker registry and optional speaker embedding
//! - [`variance`]: duration/pitch/energy prediction and length regulation
//! - [`hed`]: auxiliary conditioning fusion with training warm-up
//! - [`postnet`], [`spectral_head`]: mel projection and residual refinement
//! - [`fastspeech2`]: the full forward pass

pub mod fastspeech2;
pub mod hed;
pub mod postnet;
pub mod speaker;
pub mod spectral_head;
pub mod transformer;
pub mod variance;

pub use fastspeech2::{FastSpeech2, ForwardInputs, ForwardOutput};
