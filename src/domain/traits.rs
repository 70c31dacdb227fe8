// ============================================================
// Layer 3 — Core Traits (Abstractions)
// ============================================================
// The dataset assembler only talks to these two traits, so the
// CSV loader and the HuggingFace tokenizer can be swapped for
// in-memory fakes in tests.
//
//   - CsvLoader        implements RecordSource
//   - HfTextEncoder    implements TextEncoder

use anyhow::Result;

use crate::domain::example::TokenizedExample;
use crate::domain::qa_record::QaRecord;

// ─── RecordSource ─────────────────────────────────────────────────────────────
/// Any component that can produce question/answer records.
pub trait RecordSource {
    /// Load every record from this source, in source order.
    /// Fails if the source is missing or lacks a required column.
    fn load_all(&self) -> Result<Vec<QaRecord>>;
}

// ─── TextEncoder ──────────────────────────────────────────────────────────────
/// Any component that can turn text into model token ids.
///
/// Implementations must truncate each sequence to `max_length`
/// tokens and must NOT pad: padding is deferred to batch collation.
pub trait TextEncoder {
    /// Encode a batch of texts, one TokenizedExample per input.
    fn encode_batch(&self, texts: &[String], max_length: usize) -> Result<Vec<TokenizedExample>>;
}
