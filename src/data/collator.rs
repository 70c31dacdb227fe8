// ============================================================
// Layer 4 — Causal LM Collator
// ============================================================
// Implements Burn's Batcher trait to turn a Vec of unpadded
// TokenizedExamples into one padded CausalLmBatch.
//
// Padding is dynamic: each batch is padded (on the right) to
// its own longest sequence, never to the global maximum.
//
//   input_ids      = tokens, then pad_id up to the batch max
//   attention_mask = 1 for tokens, 0 for padding
//   labels         = input_ids, with every pad_id set to -100
//
// The pad id is the EOS id, so the final <|endoftext|> of each
// example is also ignored by the loss. Causal language models
// shift labels inside the loss, so no shift happens here.

use burn::{
    data::dataloader::batcher::Batcher,
    prelude::*,
};

use crate::domain::example::TokenizedExample;

/// Label value skipped by the loss
pub const IGNORE_INDEX: i32 = -100;

// ─── CausalLmBatch ────────────────────────────────────────────────────────────
/// A padded batch ready for the model forward pass.
/// Every tensor has shape [batch_size, seq_len].
#[derive(Debug, Clone)]
pub struct CausalLmBatch<B: Backend> {
    pub input_ids:      Tensor<B, 2, Int>,

    /// 1 = real token, 0 = padding
    pub attention_mask: Tensor<B, 2, Int>,

    /// Target ids, IGNORE_INDEX where the loss must not look
    pub labels:         Tensor<B, 2, Int>,
}

/// Row-major padded buffers, before they become tensors
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollatedBuffers {
    pub batch_size:     usize,
    pub seq_len:        usize,
    pub input_ids:      Vec<i32>,
    pub attention_mask: Vec<i32>,
    pub labels:         Vec<i32>,
}

// ─── CausalLmCollator ─────────────────────────────────────────────────────────
#[derive(Clone, Debug)]
pub struct CausalLmCollator {
    pad_token_id: u32,
}

impl CausalLmCollator {
    pub fn new(pad_token_id: u32) -> Self {
        Self { pad_token_id }
    }

    pub fn pad_token_id(&self) -> u32 {
        self.pad_token_id
    }

    /// Pad and label a list of examples without touching a device
    pub fn collate(&self, items: &[TokenizedExample]) -> CollatedBuffers {
        let batch_size = items.len();
        let seq_len    = items.iter().map(TokenizedExample::len).max().unwrap_or(0);
        let pad        = self.pad_token_id as i32;

        let mut input_ids      = Vec::with_capacity(batch_size * seq_len);
        let mut attention_mask = Vec::with_capacity(batch_size * seq_len);
        let mut labels         = Vec::with_capacity(batch_size * seq_len);

        for item in items {
            for (&id, &mask) in item.input_ids.iter().zip(&item.attention_mask) {
                let id = id as i32;
                input_ids.push(id);
                attention_mask.push(mask as i32);
                labels.push(if id == pad { IGNORE_INDEX } else { id });
            }
            for _ in item.len()..seq_len {
                input_ids.push(pad);
                attention_mask.push(0);
                labels.push(IGNORE_INDEX);
            }
        }

        CollatedBuffers { batch_size, seq_len, input_ids, attention_mask, labels }
    }
}

// ─── Burn Batcher Trait Implementation ────────────────────────────────────────
impl<B: Backend> Batcher<B, TokenizedExample, CausalLmBatch<B>> for CausalLmCollator {
    fn batch(&self, items: Vec<TokenizedExample>, device: &B::Device) -> CausalLmBatch<B> {
        let buf   = self.collate(&items);
        let shape = [buf.batch_size, buf.seq_len];

        let to_tensor = |values: Vec<i32>| {
            Tensor::<B, 1, Int>::from_ints(values.as_slice(), device).reshape(shape)
        };

        CausalLmBatch {
            input_ids:      to_tensor(buf.input_ids),
            attention_mask: to_tensor(buf.attention_mask),
            labels:         to_tensor(buf.labels),
        }
    }
}
