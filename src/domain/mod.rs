// ============================================================
// Layer 3 — Domain Layer
// ============================================================
// Plain Rust structs and traits describing the training data
// as it moves through the pipeline:
//
//   QaRecord  →  FormattedExample  →  TokenizedExample
//
// Rules for this layer:
//   - NO Burn framework types allowed here
//   - NO file I/O or network calls
//   - Only plain Rust structs, enums, and traits
//
// The data layer (Layer 4) implements the traits declared here,
// and the tests use small fakes of the same traits.

/// A question-answer row read from the CSV source
pub mod qa_record;

/// Prompt-formatted and tokenised forms of a QaRecord
pub mod example;

/// Core abstractions (traits) that other layers implement
pub mod traits;
