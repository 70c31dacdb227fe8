// ============================================================
// Layer 6 — Tokenizer Store
// ============================================================
// Loads the base model's tokenizer.json and resolves the
// special token ids the pipeline relies on.
//
// GPT-NeoX tokenizers ship without a pad token. Training pads
// with the end-of-text token instead, so the pad id and the
// EOS id are the same number.

use anyhow::{Context, Result};
use std::path::Path;
use tokenizers::Tokenizer;

use crate::data::formatter::END_OF_TEXT;

/// A loaded tokenizer plus the ids the collator needs
#[derive(Clone)]
pub struct TokenizerStore {
    tokenizer: Tokenizer,
    eos_id:    u32,
}

impl TokenizerStore {
    /// Load tokenizer.json from disk and resolve `<|endoftext|>`
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let tokenizer = Tokenizer::from_file(path)
            .map_err(|e| anyhow::anyhow!(
                "Cannot load tokenizer from '{}': {}", path.display(), e
            ))?;
        Self::from_tokenizer(tokenizer)
            .with_context(|| format!("Tokenizer '{}' is unusable", path.display()))
    }

    pub fn from_tokenizer(tokenizer: Tokenizer) -> Result<Self> {
        let eos_id = tokenizer
            .token_to_id(END_OF_TEXT)
            .ok_or_else(|| anyhow::anyhow!("Tokenizer has no '{END_OF_TEXT}' token"))?;

        tracing::debug!(
            "Tokenizer loaded: vocab={}, eos/pad id={}",
            tokenizer.get_vocab_size(true),
            eos_id
        );
        Ok(Self { tokenizer, eos_id })
    }

    pub fn tokenizer(&self) -> &Tokenizer {
        &self.tokenizer
    }

    pub fn eos_id(&self) -> u32 {
        self.eos_id
    }

    /// Padding reuses the end-of-text token
    pub fn pad_id(&self) -> u32 {
        self.eos_id
    }

    pub fn vocab_size(&self) -> usize {
        self.tokenizer.get_vocab_size(true)
    }
}
