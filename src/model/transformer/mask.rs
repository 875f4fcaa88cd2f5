//! Padding masks derived from sequence lengths.
//!
//! Masks are `u8` tensors where `1` marks a padding (invalid) position and
//! `0` marks valid content. They are recomputed per call and never stored.

use candle_core::{DType, Result, Tensor};

/// Build a `[B, max_len]` padding mask from `[B]` lengths.
///
/// `mask[u][i] == 1` iff `i >= lengths[u]`. When `max_len` is `None` the
/// longest length in the batch is used. Lengths above `max_len` are not
/// checked; the row is simply all-valid.
pub fn get_mask_from_lengths(lengths: &Tensor, max_len: Option<usize>) -> Result<Tensor> {
    let lengths = lengths.to_dtype(DType::I64)?;
    let max_len = match max_len {
        Some(m) => m,
        None => max_length(&lengths)?,
    };
    let ids = Tensor::arange(0i64, max_len as i64, lengths.device())?.unsqueeze(0)?; // [1, M]
    ids.broadcast_ge(&lengths.unsqueeze(1)?) // [B, M]
}

/// Largest entry of a `[B]` length vector (0 for an empty batch).
pub fn max_length(lengths: &Tensor) -> Result<usize> {
    let lengths: Vec<i64> = lengths.to_dtype(DType::I64)?.to_vec1()?;
    Ok(lengths.into_iter().max().unwrap_or(0).max(0) as usize)
}

/// Replace positions where `mask != 0` with `value`.
///
/// `mask` must broadcast to `x` (e.g. `[B, T, 1]` against `[B, T, D]`).
pub fn masked_fill(x: &Tensor, mask: &Tensor, value: f64) -> Result<Tensor> {
    let mask = mask.broadcast_as(x.dims())?;
    let fill = Tensor::full(value, x.dims(), x.device())?.to_dtype(x.dtype())?;
    mask.where_cond(&fill, x)
}

/// Most negative finite value of `dtype`, used for additive attention masks.
pub fn min_value(dtype: DType) -> f64 {
    match dtype {
        DType::F32 => f64::from(f32::MIN),
        DType::F16 => f64::from(half::f16::MIN),
        DType::BF16 => f64::from(half::bf16::MIN),
        DType::F64 => f64::MIN,
        _ => f64::from(f32::MIN),
    }
}
