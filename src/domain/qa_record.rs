// ============================================================
// Layer 3 — QaRecord Domain Type
// ============================================================
// One training example in domain terms: a question asked by a
// user and the answer the fine-tuned model should produce.
//
// Example:
//   Question: "전세 계약이 끝나면 보증금은 언제 돌려받나요?"
//   Answer:   "임대차 계약이 종료되면 임대인은 ..."
//
// Rows come from a CSV file with (at least) a `question` and an
// `answer` column; every other column is dropped on load.

use serde::{Deserialize, Serialize};

/// A single question/answer record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QaRecord {
    /// The instruction / question text
    pub question: String,

    /// The expected response text
    pub answer: String,
}

impl QaRecord {
    /// Create a new QaRecord
    pub fn new(question: impl Into<String>, answer: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            answer:   answer.into(),
        }
    }
}
