// ============================================================
// Layer 4 — Autodata (Dataset Assembler)
// ============================================================
// Builds one trainable split from one CSV file:
//
//   Step 1: load rows, keep `question` + `answer`   (CsvLoader)
//   Step 2: wrap each row in the prompt template     (PromptFormatter)
//   Step 3: tokenise in batches, truncate, no pad    (TextEncoder)
//   Step 4: shuffle once                             (LmDataset)
//
// Column validation happens in step 1, so a bad file never
// reaches the tokenizer.

use anyhow::Result;
use std::path::Path;

use crate::data::{
    dataset::LmDataset,
    formatter::PromptFormatter,
    loader::CsvLoader,
};
use crate::domain::example::{FormattedExample, TokenizedExample};
use crate::domain::traits::{RecordSource, TextEncoder};

/// Default maximum sequence length in tokens
pub const DEFAULT_MAX_LENGTH: usize = 1024;

/// Rows handed to the tokenizer per call
const ENCODE_BATCH_SIZE: usize = 1000;

/// A fully prepared split: the formatted texts (source order)
/// and the tokenised, shuffled dataset.
pub struct Autodata {
    max_length: usize,
    formatted:  Vec<FormattedExample>,
    dataset:    LmDataset,
}

impl Autodata {
    /// Build a split from a CSV file on disk
    pub fn from_csv(
        path:       impl AsRef<Path>,
        encoder:    &dyn TextEncoder,
        max_length: usize,
    ) -> Result<Self> {
        let path = path.as_ref();
        tracing::info!("Building dataset from '{}'", path.display());
        Self::from_source(&CsvLoader::new(path), encoder, max_length)
    }

    /// Build a split from any record source
    pub fn from_source(
        source:     &dyn RecordSource,
        encoder:    &dyn TextEncoder,
        max_length: usize,
    ) -> Result<Self> {
        // ── Step 1: Load ──────────────────────────────────────────────────────
        let records = source.load_all()?;

        // ── Step 2: Format ────────────────────────────────────────────────────
        let formatted = PromptFormatter::new().format_all(&records);

        // ── Step 3: Tokenise ──────────────────────────────────────────────────
        let tokenized = encode_all(&formatted, encoder, max_length)?;

        // ── Step 4: Shuffle ───────────────────────────────────────────────────
        let dataset = LmDataset::new(tokenized).shuffled();

        tracing::info!(
            "Dataset ready: {} examples, {} tokens, longest {}",
            dataset.examples().len(),
            dataset.total_tokens(),
            dataset.max_len()
        );

        Ok(Self { max_length, formatted, dataset })
    }

    pub fn max_length(&self) -> usize {
        self.max_length
    }

    /// Formatted texts in source order (before shuffling)
    pub fn formatted(&self) -> &[FormattedExample] {
        &self.formatted
    }

    pub fn tokenized_dataset(&self) -> &LmDataset {
        &self.dataset
    }

    pub fn into_dataset(self) -> LmDataset {
        self.dataset
    }
}

fn encode_all(
    formatted:  &[FormattedExample],
    encoder:    &dyn TextEncoder,
    max_length: usize,
) -> Result<Vec<TokenizedExample>> {
    let mut out = Vec::with_capacity(formatted.len());

    for chunk in formatted.chunks(ENCODE_BATCH_SIZE) {
        let texts: Vec<String> = chunk.iter().map(|f| f.text.clone()).collect();
        let encoded = encoder.encode_batch(&texts, max_length)?;
        anyhow::ensure!(
            encoded.len() == texts.len(),
            "Encoder returned {} sequences for {} texts",
            encoded.len(),
            texts.len()
        );
        out.extend(encoded);
    }

    Ok(out)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::tokenize::HfTextEncoder;
    use crate::data::DatasetError;
    use crate::domain::qa_record::QaRecord;
    use crate::infra::tokenizer_store::test_support::word_level_tokenizer;
    use std::cell::Cell;
    use std::io::Write;

    /// Encodes one id per character, counting calls
    struct CharEncoder {
        calls: Cell<usize>,
    }

    impl TextEncoder for CharEncoder {
        fn encode_batch(&self, texts: &[String], max_length: usize) -> Result<Vec<TokenizedExample>> {
            self.calls.set(self.calls.get() + 1);
            Ok(texts
                .iter()
                .map(|t| {
                    let ids: Vec<u32> = t.chars().take(max_length).map(|c| c as u32).collect();
                    TokenizedExample::from_ids(ids)
                })
                .collect())
        }
    }

    struct InMemory(Vec<QaRecord>);

    impl RecordSource for InMemory {
        fn load_all(&self) -> Result<Vec<QaRecord>> {
            Ok(self.0.clone())
        }
    }

    fn write_csv(content: &str) -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn test_lengths_never_exceed_max() {
        let pairs: Vec<QaRecord> = (0..30)
            .map(|i| QaRecord::new("q".repeat(i * 10), "a".repeat(i * 7)))
            .collect();
        let enc  = CharEncoder { calls: Cell::new(0) };
        let data = Autodata::from_source(&InMemory(pairs), &enc, 64).unwrap();

        assert_eq!(data.tokenized_dataset().examples().len(), 30);
        assert!(data.tokenized_dataset().examples().iter().all(|e| e.len() <= 64));
    }

    #[test]
    fn test_missing_column_fails_before_tokenisation() {
        let file = write_csv("question,reply\nQ,A\n");
        let enc  = CharEncoder { calls: Cell::new(0) };

        let err = match Autodata::from_csv(file.path(), &enc, DEFAULT_MAX_LENGTH) {
            Ok(_) => panic!("expected a missing column error"),
            Err(e) => e,
        };
        assert!(matches!(
            err.downcast_ref::<DatasetError>(),
            Some(DatasetError::MissingColumn { column, .. }) if column == "answer"
        ));
        assert_eq!(enc.calls.get(), 0);
    }

    #[test]
    fn test_identical_files_give_identical_content() {
        let content = "question,answer\nQ1,A1\nQ2,A2\nQ3,A3\n";
        let (f1, f2) = (write_csv(content), write_csv(content));
        let enc = CharEncoder { calls: Cell::new(0) };

        let a = Autodata::from_csv(f1.path(), &enc, DEFAULT_MAX_LENGTH).unwrap();
        let b = Autodata::from_csv(f2.path(), &enc, DEFAULT_MAX_LENGTH).unwrap();
        assert_eq!(a.formatted(), b.formatted());

        // Order may differ after the shuffle, content may not
        let mut ta: Vec<_> = a.tokenized_dataset().examples().to_vec();
        let mut tb: Vec<_> = b.tokenized_dataset().examples().to_vec();
        ta.sort_by(|x, y| x.input_ids.cmp(&y.input_ids));
        tb.sort_by(|x, y| x.input_ids.cmp(&y.input_ids));
        assert_eq!(ta, tb);
    }

    #[test]
    fn test_batches_large_inputs() {
        let pairs: Vec<QaRecord> = (0..2500).map(|i| QaRecord::new(i.to_string(), "a")).collect();
        let enc  = CharEncoder { calls: Cell::new(0) };
        let data = Autodata::from_source(&InMemory(pairs), &enc, 32).unwrap();

        assert_eq!(enc.calls.get(), 3);
        assert_eq!(data.into_dataset().examples().len(), 2500);
    }

    #[test]
    fn test_with_real_tokenizer() {
        let dir  = tempfile::tempdir().unwrap();
        let tok  = word_level_tokenizer(dir.path(), &["what", "is", "x", "y"]);
        let file = write_csv("question,answer\nwhat is x,x is y\n");

        let data = Autodata::from_csv(file.path(), &HfTextEncoder::new(&tok), 8).unwrap();
        let ex   = &data.tokenized_dataset().examples()[0];
        assert_eq!(ex.len(), 8);
        assert_eq!(data.max_length(), 8);
    }
}
