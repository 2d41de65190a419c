use anyhow::{ensure, Result};
use candle_core::{DType, Tensor};

fn epsilon(t: &Tensor) -> Result<Tensor> {
    let value = if t.dtype() == DType::F16 { 1e-6f32 } else { 1e-12f32 };
    Ok(Tensor::new(&[value], t.device())?.to_dtype(t.dtype())?)
}

/// Scales every row of a `[B,H]` tensor to unit length.
pub fn l2_normalize(rows: &Tensor) -> Result<Tensor> {
    let eps = epsilon(rows)?;
    let norms = rows.sqr()?.sum_keepdim(1)?.sqrt()?.broadcast_add(&eps)?;
    Ok(rows.broadcast_div(&norms)?)
}

/// Mean over unmasked tokens followed by L2 normalisation: `[B,T,H] -> [B,H]`.
/// Padding positions (mask 0) contribute nothing to either the sum or the count.
pub fn masked_mean_l2(hidden: &Tensor, attention_mask: &Tensor) -> Result<Tensor> {
    let (batch, seq, hidden_dim) = match hidden.dims() {
        &[b, t, h] => (b, t, h),
        other => anyhow::bail!("hidden shape must be [B,T,H], got {:?}", other),
    };
    ensure!(
        attention_mask.dims() == [batch, seq],
        "attention mask {:?} does not match hidden [{batch}, {seq}, _]",
        attention_mask.dims()
    );

    let weights = attention_mask.to_device(hidden.device())?.to_dtype(hidden.dtype())?;
    let summed = hidden.broadcast_mul(&weights.unsqueeze(2)?)?.sum(1)?;
    let counts = weights.sum_keepdim(1)?.broadcast_add(&epsilon(hidden)?)?;
    let pooled = l2_normalize(&summed.broadcast_div(&counts)?)?;

    ensure!(pooled.dims() == [batch, hidden_dim], "pooled shape mismatch: {:?}", pooled.dims());
    Ok(pooled)
}
