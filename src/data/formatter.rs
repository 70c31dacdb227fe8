// ============================================================
// Layer 4 — Prompt Formatter
// ============================================================
// Wraps every QaRecord in a fixed Korean instruction template
// (KULLM / Alpaca style) and terminates it with the model's
// end-of-text marker:
//
//   아래는 작업을 설명하는 명령어입니다. 요청을 적절히 완료하는 응답을 작성하세요.
//
//   ### 명령어:
//   {question}
//
//   ### 응답:
//   {answer}<|endoftext|>
//
// The output is a pure function of the input row.

use crate::domain::example::FormattedExample;
use crate::domain::qa_record::QaRecord;

/// Fixed preamble placed before every instruction
pub const INSTRUCTION_PREAMBLE: &str =
    "아래는 작업을 설명하는 명령어입니다. 요청을 적절히 완료하는 응답을 작성하세요.";

/// End-of-text marker of the GPT-NeoX / Polyglot vocabulary
pub const END_OF_TEXT: &str = "<|endoftext|>";

#[derive(Debug, Clone, Copy, Default)]
pub struct PromptFormatter;

impl PromptFormatter {
    pub fn new() -> Self {
        Self
    }

    /// Render one record into its training text
    pub fn format(&self, pair: &QaRecord) -> FormattedExample {
        FormattedExample {
            text: format!(
                "{INSTRUCTION_PREAMBLE}\n\n### 명령어:\n{}\n\n### 응답:\n{}{END_OF_TEXT}",
                pair.question, pair.answer
            ),
        }
    }

    /// Render every record, preserving order
    pub fn format_all(&self, pairs: &[QaRecord]) -> Vec<FormattedExample> {
        pairs.iter().map(|p| self.format(p)).collect()
    }
}
