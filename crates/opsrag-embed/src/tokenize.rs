use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};
use tokenizers::{EncodeInput, Tokenizer, TruncationParams};

/// Token ids, token type ids and attention mask for one padded batch.
pub struct EncodedBatch {
    pub input_ids: Tensor,
    pub token_type_ids: Tensor,
    pub attention_mask: Tensor,
}

pub fn load_tokenizer(path: &std::path::Path, max_len: usize) -> Result<Tokenizer> {
    let mut tokenizer = Tokenizer::from_file(path)
        .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", path.display(), e))?;
    tokenizer
        .with_truncation(Some(TruncationParams { max_length: max_len, ..Default::default() }))
        .map_err(|e| anyhow!("Failed to configure truncation: {}", e))?;
    tokenizer.with_padding(None);
    Ok(tokenizer)
}

/// Encode single texts or (query, passage) pairs and pad to the longest
/// sequence in the batch.
pub fn encode_batch<'s, E>(tokenizer: &Tokenizer, inputs: Vec<E>, pad_id: u32, device: &Device) -> Result<EncodedBatch>
where
    E: Into<EncodeInput<'s>> + Send,
{
    let encodings = tokenizer
        .encode_batch(inputs, true)
        .map_err(|e| anyhow!("Tokenization failed: {}", e))?;
    let batch = encodings.len();
    let max_len = encodings.iter().map(|e| e.get_ids().len()).max().unwrap_or(0).max(1);

    let mut ids = Vec::with_capacity(batch * max_len);
    let mut type_ids = Vec::with_capacity(batch * max_len);
    let mut mask = Vec::with_capacity(batch * max_len);
    for enc in &encodings {
        let len = enc.get_ids().len();
        ids.extend_from_slice(enc.get_ids());
        type_ids.extend_from_slice(enc.get_type_ids());
        mask.extend_from_slice(enc.get_attention_mask());
        let pad = max_len - len;
        ids.extend(std::iter::repeat(pad_id).take(pad));
        type_ids.extend(std::iter::repeat(0u32).take(pad));
        mask.extend(std::iter::repeat(0u32).take(pad));
    }

    Ok(EncodedBatch {
        input_ids: Tensor::from_vec(ids, (batch, max_len), device)?,
        token_type_ids: Tensor::from_vec(type_ids, (batch, max_len), device)?,
        attention_mask: Tensor::from_vec(mask, (batch, max_len), device)?,
    })
}
