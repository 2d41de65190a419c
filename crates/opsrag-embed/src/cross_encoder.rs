use anyhow::{anyhow, Result};
use candle_core::{Device, Tensor};
use candle_nn::{linear, Linear, Module};
use candle_transformers::models::bert::BertModel;
use std::path::Path;
use tokenizers::Tokenizer;
use tracing::info;

use opsrag_core::traits::CrossEncoder;

use crate::device::select_device;
use crate::model::{load_weights, pad_id, read_config};
use crate::tokenize::encode_batch;

const PAIR_MAX_LEN: usize = 512;

/// BERT sequence-classification head (ms-marco style): the `[CLS]` state goes
/// through the pooler and a single-logit classifier.
pub struct CrossEncoderModel {
    bert: BertModel,
    pooler: Linear,
    classifier: Linear,
    tokenizer: Tokenizer,
    device: Device,
    model_id: String,
}

impl CrossEncoderModel {
    pub fn load(model_dir: &Path) -> Result<Self> {
        let device = select_device();
        info!(dir = %model_dir.display(), "loading cross-encoder");
        let tokenizer = crate::tokenize::load_tokenizer(&model_dir.join("tokenizer.json"), PAIR_MAX_LEN)?;
        let (config, raw_config) = read_config(model_dir)?;
        let hidden = raw_config
            .get("hidden_size")
            .and_then(|v| v.as_u64())
            .ok_or_else(|| anyhow!("config.json has no hidden_size"))? as usize;
        let vb = load_weights(model_dir, &device)?;
        let bert = BertModel::load(vb.clone(), &config)?;
        let pooler = linear(hidden, hidden, vb.pp("bert.pooler.dense"))?;
        let classifier = linear(hidden, 1, vb.pp("classifier"))?;
        let name = model_dir
            .file_name()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "cross-encoder".to_string());
        Ok(Self { bert, pooler, classifier, tokenizer, device, model_id: format!("cross:{name}") })
    }
}

impl CrossEncoder for CrossEncoderModel {
    fn model_id(&self) -> &str { &self.model_id }

    fn score(&self, query: &str, passages: &[&str]) -> Result<Vec<f32>> {
        if passages.is_empty() {
            return Ok(Vec::new());
        }
        let pairs: Vec<(&str, &str)> = passages.iter().map(|p| (query, *p)).collect();
        let enc = encode_batch(&self.tokenizer, pairs, pad_id(&self.tokenizer), &self.device)?;
        let hidden = self.bert.forward(&enc.input_ids, &enc.token_type_ids, Some(&enc.attention_mask))?;
        let cls = hidden.narrow(1, 0, 1)?.squeeze(1)?;
        let pooled = self.pooler.forward(&cls)?.tanh()?;
        let logits: Tensor = self.classifier.forward(&pooled)?.squeeze(1)?;
        Ok(logits.to_device(&Device::Cpu)?.to_vec1::<f32>()?)
    }
}
