// ============================================================
// Layer 4 — Tokenised Dataset
// ============================================================
// In-memory Burn `Dataset` over tokenised examples, with a
// shuffled constructor used for the training split.

use burn::data::dataset::Dataset;
use rand::seq::SliceRandom;

use crate::domain::example::TokenizedExample;

/// In-memory collection of tokenised examples.
/// Built once per split and held for the whole training run.
#[derive(Debug, Clone, Default)]
pub struct LmDataset {
    examples: Vec<TokenizedExample>,
}

impl LmDataset {
    pub fn new(examples: Vec<TokenizedExample>) -> Self { Self { examples } }

    /// Fisher-Yates shuffle with the thread RNG.
    /// No seed is fixed, so the order differs from run to run.
    pub fn shuffled(mut self) -> Self {
        self.examples.shuffle(&mut rand::thread_rng());
        self
    }

    pub fn examples(&self) -> &[TokenizedExample] { &self.examples }

    /// Length of the longest example, 0 when empty
    pub fn max_len(&self) -> usize {
        self.examples.iter().map(TokenizedExample::len).max().unwrap_or(0)
    }

    pub fn total_tokens(&self) -> usize {
        self.examples.iter().map(TokenizedExample::len).sum()
    }
}

impl Dataset<TokenizedExample> for LmDataset {
    fn get(&self, index: usize) -> Option<TokenizedExample> {
        self.examples.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.examples.len()
    }
}
