// ============================================================
// Layer 4 — Tokenizer Adapter
// ============================================================
// Converts formatted prompts to token ids with a HuggingFace
// `tokenizers::Tokenizer` (the model's own tokenizer.json).
//
// Settings match what the trainer expects:
//   - truncation ON  (right side, to `max_length` tokens)
//   - padding    OFF (the collator pads each batch later)
//   - special tokens added as the tokenizer's post-processor says
//
// Any truncation/padding stored inside tokenizer.json is
// overridden here so the dataset never depends on it.

use anyhow::Result;
use tokenizers::{Tokenizer, TruncationParams};

use crate::domain::example::TokenizedExample;
use crate::domain::traits::TextEncoder;

/// TextEncoder backed by a HuggingFace tokenizer.
#[derive(Clone)]
pub struct HfTextEncoder {
    tokenizer: Tokenizer,
}

impl HfTextEncoder {
    pub fn new(tokenizer: &Tokenizer) -> Self {
        let mut tokenizer = tokenizer.clone();
        tokenizer.with_padding(None);
        Self { tokenizer }
    }
}

impl TextEncoder for HfTextEncoder {
    fn encode_batch(&self, texts: &[String], max_length: usize) -> Result<Vec<TokenizedExample>> {
        let mut tokenizer = self.tokenizer.clone();
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("Invalid truncation settings: {e}"))?;

        let encodings = tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("Tokenisation error: {e}"))?;

        Ok(encodings
            .into_iter()
            .map(|enc| TokenizedExample {
                input_ids:      enc.get_ids().to_vec(),
                attention_mask: enc.get_attention_mask().to_vec(),
            })
            .collect())
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::tokenizer_store::test_support::word_level_tokenizer;

    #[test]
    fn test_truncates_to_max_length() {
        let dir = tempfile::tempdir().unwrap();
        let tok = word_level_tokenizer(dir.path(), &["a", "b", "c"]);
        let enc = HfTextEncoder::new(&tok);

        let texts = vec!["a b c a b c a b c".to_string(), "a".to_string()];
        let out   = enc.encode_batch(&texts, 4).unwrap();

        assert_eq!(out[0].len(), 4);
        assert_eq!(out[1].len(), 1);
        for ex in &out {
            assert_eq!(ex.input_ids.len(), ex.attention_mask.len());
            assert!(ex.len() <= 4);
        }
    }

    #[test]
    fn test_no_padding_applied() {
        let dir = tempfile::tempdir().unwrap();
        let tok = word_level_tokenizer(dir.path(), &["x", "y"]);
        let enc = HfTextEncoder::new(&tok);

        let texts = vec!["x y x".to_string(), "y".to_string()];
        let out   = enc.encode_batch(&texts, 1024).unwrap();

        assert_eq!(out[0].len(), 3);
        assert_eq!(out[1].len(), 1);
        assert!(out.iter().all(|e| e.attention_mask.iter().all(|&m| m == 1)));
    }

    #[test]
    fn test_end_of_text_is_a_single_token() {
        let dir = tempfile::tempdir().unwrap();
        let tok = word_level_tokenizer(dir.path(), &["answer"]);
        let eos = tok.token_to_id("<|endoftext|>").unwrap();
        let enc = HfTextEncoder::new(&tok);

        let out = enc.encode_batch(&["answer<|endoftext|>".to_string()], 16).unwrap();
        assert_eq!(out[0].input_ids.last(), Some(&eos));
        assert_eq!(out[0].len(), 2);
    }
}
