use anyhow::{anyhow, Result};
use candle_core::{DType, Device, Tensor};
use std::ops::Range;
use std::path::Path;
use tokenizers::Tokenizer;

use hopsearch_core::traits::Tokenize;
use hopsearch_core::Error;

/// XLM-RoBERTa padding id.
pub const PAD_ID: u32 = 1;

/// Tokenized batch, padded to its longest member.
pub struct TokenBatch {
    pub input_ids: Tensor,
    pub attention_mask: Tensor,
    pub token_type_ids: Tensor,
}

pub fn tokenize_batch(tokenizer: &Tokenizer, texts: &[String], max_len: usize, device: &Device) -> Result<TokenBatch> {
    let encodings = tokenizer
        .encode_batch(texts.to_vec(), true)
        .map_err(|e| anyhow!("Tokenization failed: {}", e))?;
    let seq_len = encodings
        .iter()
        .map(|e| e.get_ids().len().min(max_len))
        .max()
        .unwrap_or(0)
        .max(1);

    let mut ids = Vec::with_capacity(texts.len() * seq_len);
    let mut mask = Vec::with_capacity(texts.len() * seq_len);
    for enc in &encodings {
        let n = enc.get_ids().len().min(seq_len);
        ids.extend_from_slice(&enc.get_ids()[..n]);
        mask.extend_from_slice(&enc.get_attention_mask()[..n]);
        ids.extend(std::iter::repeat(PAD_ID).take(seq_len - n));
        mask.extend(std::iter::repeat(0u32).take(seq_len - n));
    }
    let shape = (encodings.len(), seq_len);
    Ok(TokenBatch {
        input_ids: Tensor::from_iter(ids, device)?.reshape(shape)?,
        attention_mask: Tensor::from_iter(mask, device)?.reshape(shape)?,
        token_type_ids: Tensor::zeros(shape, DType::I64, device)?,
    })
}

/// Counts chunk lengths in model tokens.
pub struct HfTokenCounter {
    tokenizer: Tokenizer,
    max_len: usize,
}

impl HfTokenCounter {
    /// Truncation and padding configured in the tokenizer are switched off;
    /// counting has to see the whole text.
    pub fn new(mut tokenizer: Tokenizer, max_len: usize) -> Result<Self> {
        tokenizer
            .with_truncation(None)
            .map_err(|e| anyhow!("Failed to disable truncation: {}", e))?;
        tokenizer.with_padding(None);
        Ok(Self { tokenizer, max_len })
    }

    pub fn from_model_dir(model_dir: &Path, max_len: usize) -> Result<Self> {
        let path = model_dir.join("tokenizer.json");
        let tokenizer = Tokenizer::from_file(&path)
            .map_err(|e| anyhow!("Failed to load tokenizer from {}: {}", path.display(), e))?;
        Self::new(tokenizer, max_len)
    }
}

impl Tokenize for HfTokenCounter {
    fn token_spans(&self, text: &str) -> hopsearch_core::Result<Vec<Range<usize>>> {
        let enc = self
            .tokenizer
            .encode(text, false)
            .map_err(|e| Error::Operation(format!("Tokenization failed: {e}")))?;
        let mut spans: Vec<Range<usize>> = Vec::with_capacity(enc.get_offsets().len());
        for &(start, end) in enc.get_offsets() {
            if start >= end || spans.last().is_some_and(|prev| start < prev.end) {
                continue;
            }
            spans.push(start..end);
        }
        Ok(spans)
    }

    fn max_tokens(&self) -> Option<usize> {
        // Room for the <s> and </s> markers.
        Some(self.max_len.saturating_sub(2))
    }
}
