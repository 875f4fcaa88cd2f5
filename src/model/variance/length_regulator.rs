//! Duration-based length regulation.
//!
//! Repeats every token vector `d` times so the sequence moves from token rate
//! to mel-frame rate:
//!
//! ```text
//! x = [a, b, c], d = [2, 0, 3]  →  [a, a, c, c, c]
//! ```

use candle_core::{DType, Result, Tensor};

use crate::model::transformer::mask::{get_mask_from_lengths, masked_fill};

/// Expand `x` by per-token durations.
///
/// - `x`: `[B, T, D]`
/// - `durations`: `[B, T]` non-negative, already rounded
/// - `max_len`: pad (or truncate) every utterance to this many frames; when
///   `None`, the longest expansion in the batch is used
///
/// Returns `(expanded [B, L, D], mel_lens [B] i64)`. Padded frames are zero.
pub fn regulate_length(
    x: &Tensor,
    durations: &Tensor,
    max_len: Option<usize>,
) -> Result<(Tensor, Tensor)> {
    let (b, t, d) = x.dims3()?;
    if durations.dims() != [b, t] {
        candle_core::bail!(
            "durations {:?} do not match token sequence [{b}, {t}]",
            durations.dims()
        );
    }
    let durations: Vec<Vec<i64>> = durations.to_dtype(DType::I64)?.to_vec2()?;

    let expanded: Vec<usize> = durations
        .iter()
        .map(|row| row.iter().map(|&n| n.max(0) as usize).sum())
        .collect();
    let out_len = max_len.unwrap_or_else(|| expanded.iter().copied().max().unwrap_or(0));
    if let Some(longest) = expanded.iter().copied().max()
        && longest > out_len
    {
        tracing::warn!("length regulator truncating {longest} frames to {out_len}");
    }

    // Gather indices into the token axis; padding frames point at token 0
    // and are zeroed by the mask afterwards.
    let mut index = vec![0i64; b * out_len];
    for (u, row) in durations.iter().enumerate() {
        let frames = row
            .iter()
            .take(t)
            .enumerate()
            .flat_map(|(tok, &n)| std::iter::repeat_n(tok as i64, n.max(0) as usize))
            .take(out_len);
        for (f, tok) in frames.enumerate() {
            index[u * out_len + f] = tok;
        }
    }

    let dev = x.device();
    let mel_lens: Vec<i64> = expanded.iter().map(|&n| n.min(out_len) as i64).collect();
    let mel_lens = Tensor::from_vec(mel_lens, b, dev)?;

    let index = Tensor::from_vec(index, (b, out_len), dev)?
        .unsqueeze(2)?
        .expand((b, out_len, d))?
        .contiguous()?;
    let out = x.contiguous()?.gather(&index, 1)?;
    let mask = get_mask_from_lengths(&mel_lens, Some(out_len))?;
    let out = masked_fill(&out, &mask.unsqueeze(2)?, 0.0)?;
    Ok((out, mel_lens))
}
