//! Fixed sinusoidal position table.

use candle_core::{DType, Device, Result, Tensor};

/// `[n_position, d_hid]` table with `sin` on even and `cos` on odd channels.
///
/// Channel pair `(2i, 2i+1)` uses angle `pos / 10000^(2i / d_hid)`.
pub fn sinusoid_table(
    n_position: usize,
    d_hid: usize,
    dtype: DType,
    device: &Device,
) -> Result<Tensor> {
    let mut table = Vec::with_capacity(n_position * d_hid);
    for pos in 0..n_position {
        for j in 0..d_hid {
            let angle = pos as f64 / 10000f64.powf((2 * (j / 2)) as f64 / d_hid as f64);
            table.push(if j % 2 == 0 { angle.sin() } else { angle.cos() } as f32);
        }
    }
    Tensor::from_vec(table, (n_position, d_hid), device)?.to_dtype(dtype)
}

/// Cached table that extends itself on the fly for longer inputs.
#[derive(Debug, Clone)]
pub struct PositionEncoding {
    table: Tensor,
    d_hid: usize,
}

impl PositionEncoding {
    pub fn new(n_position: usize, d_hid: usize, dtype: DType, device: &Device) -> Result<Self> {
        Ok(Self {
            table: sinusoid_table(n_position, d_hid, dtype, device)?,
            d_hid,
        })
    }

    /// Position rows for `len` steps as `[1, len, d_hid]`.
    pub fn positions(&self, len: usize) -> Result<Tensor> {
        let rows = if len <= self.table.dim(0)? {
            self.table.narrow(0, 0, len)?
        } else {
            sinusoid_table(len, self.d_hid, self.table.dtype(), self.table.device())?
        };
        rows.unsqueeze(0)
    }
}
