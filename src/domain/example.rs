// ============================================================
// Layer 3 — Formatted and Tokenised Examples
// ============================================================
// A QaRecord is first wrapped in the instruction prompt
// (FormattedExample) and then converted to token ids
// (TokenizedExample). Neither type knows about tensors;
// padding and stacking happen later, in the collator.

use serde::{Deserialize, Serialize};

/// A QaRecord rendered into a single instruction-formatted string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormattedExample {
    pub text: String,
}

/// Model input for one example, truncated but NOT padded.
///
/// `input_ids` and `attention_mask` always have the same length,
/// which never exceeds the configured maximum sequence length.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenizedExample {
    pub input_ids:      Vec<u32>,
    pub attention_mask: Vec<u32>,
}

impl TokenizedExample {
    /// Build an example whose every token is attended to
    pub fn from_ids(input_ids: Vec<u32>) -> Self {
        let attention_mask = vec![1; input_ids.len()];
        Self { input_ids, attention_mask }
    }

    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }
}
