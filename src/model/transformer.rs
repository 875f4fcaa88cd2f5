//! Feed-forward transformer stacks shared by the encoder and decoder.
//!
//! ```text
//! Encoder: Embedding(vocab, 256) + sinusoid → 4 × FFTBlock(2 heads, Conv1d 9/1, 1024)
//! Decoder:                          sinusoid → 6 × FFTBlock(2 heads, Conv1d 9/1, 1024)
//! ```
//!
//! Every block re-applies the padding mask, so padded positions leave each
//! stack as exact zeros.

pub mod attention;
pub mod decoder;
pub mod encoder;
pub mod layers;
pub mod mask;
pub mod position;

pub use decoder::Decoder;
pub use encoder::Encoder;
