// ============================================================
// Layer 6 — Infrastructure Layer
// ============================================================
// Cross-cutting concerns that don't belong to one layer:
//
//   env.rs             — `.env` loading and the Hub write token
//
//   hub.rs             — Resolves config / tokenizer / weights
//                        for a model id (local dir or the Hub)
//
//   tokenizer_store.rs — Loads tokenizer.json and resolves the
//                        end-of-text / padding ids
//
//   checkpoint.rs      — PEFT adapter export, per-epoch
//                        checkpoint directories, train config
//
//   metrics.rs         — Log history as CSV
//
//   publisher.rs       — Uploads the final adapter to a Hub
//                        repository
//
// Reference: Rust Book §7 (Modules)
//            Rust Book §9 (Error Handling with anyhow)

/// Environment file and credentials
pub mod env;

/// Model file resolution (local or Hub download)
pub mod hub;

/// Tokenizer loading
pub mod tokenizer_store;

/// Adapter checkpoints
pub mod checkpoint;

/// Training metrics CSV logger
pub mod metrics;

/// Hub repository upload
pub mod publisher;
