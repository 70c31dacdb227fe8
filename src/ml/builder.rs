// ============================================================
// Layer 5 — Model Builder
// ============================================================
// Turns a model identifier into a LoRA-ready model:
//
//   Step 1: resolve config / tokenizer / weights   (HubClient)
//   Step 2: build GPT-NeoX and import the weights  (weights.rs)
//   Step 3: prepare for reduced-precision training
//           (freeze the base, disable the KV cache)
//   Step 4: attach LoRA to the target modules
//   Step 5: print the trainable-parameter report
//
// Gradient checkpointing is not a model property in Burn; it is
// chosen by the autodiff backend the model is built on
// (see application::train_use_case).

use anyhow::Result;
use burn::prelude::*;
use std::fmt;

use crate::infra::hub::{HubClient, ModelFiles};
use crate::infra::tokenizer_store::TokenizerStore;
use crate::ml::gpt_neox::{GptNeoX, GptNeoXConfig};
use crate::ml::lora::LoraSettings;
use crate::ml::weights::{load_gpt_neox, SafetensorsWeights};

// ─── Parameter Report ─────────────────────────────────────────────────────────
/// Trainable vs. total parameter counts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParameterReport {
    pub trainable: usize,
    pub total:     usize,
}

impl ParameterReport {
    pub fn of<B: Backend>(model: &GptNeoX<B>) -> Self {
        Self {
            trainable: model.num_trainable_params(),
            total:     model.num_params(),
        }
    }

    /// 100 · trainable / total
    pub fn trainable_percent(&self) -> f64 {
        if self.total == 0 {
            return 0.0;
        }
        100.0 * self.trainable as f64 / self.total as f64
    }
}

impl fmt::Display for ParameterReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "trainable params: {} || all params: {} || trainable%: {}",
            self.trainable,
            self.total,
            self.trainable_percent()
        )
    }
}

// ─── Model Builder ────────────────────────────────────────────────────────────
/// What the builder hands back to the training driver
pub struct BuiltModel<B: Backend> {
    pub model:     GptNeoX<B>,
    pub config:    GptNeoXConfig,
    pub tokenizer: TokenizerStore,
    pub report:    ParameterReport,
}

pub struct ModelBuilder {
    model_id: String,
    revision: Option<String>,
    lora:     LoraSettings,
    hub:      HubClient,
}

impl ModelBuilder {
    pub fn new(model_id: impl Into<String>, lora: LoraSettings) -> Self {
        Self {
            model_id: model_id.into(),
            revision: None,
            lora,
            hub: HubClient::new(None),
        }
    }

    pub fn with_revision(mut self, revision: Option<String>) -> Self {
        self.revision = revision;
        self
    }

    pub fn with_hub(mut self, hub: HubClient) -> Self {
        self.hub = hub;
        self
    }

    /// Resolve the identifier, then build from the resolved files
    pub fn build<B: Backend>(&self, device: &B::Device) -> Result<BuiltModel<B>> {
        let files = self.hub.fetch_model(&self.model_id, self.revision.as_deref())?;
        self.build_from_files(&files, device)
    }

    pub fn build_from_files<B: Backend>(&self, files: &ModelFiles, device: &B::Device) -> Result<BuiltModel<B>> {
        // ── Step 1: Tokenizer and architecture ────────────────────────────────
        let tokenizer  = TokenizerStore::load(&files.tokenizer)?;
        let mut config = GptNeoXConfig::from_file(&files.config)?;
        tracing::info!(
            "Architecture: {} layers, hidden={}, heads={}, vocab={}",
            config.num_hidden_layers,
            config.hidden_size,
            config.num_attention_heads,
            config.vocab_size
        );

        // ── Step 2: Pretrained weights ────────────────────────────────────────
        let weights = SafetensorsWeights::open(&files.weights)?;
        let model   = load_gpt_neox(config.init::<B>(device), &weights, device)?;
        drop(weights);
        tracing::info!("Pretrained weights loaded for '{}'", self.model_id);

        // ── Step 3: Freeze base ───────────────────────────────────────────────
        let model = prepare_for_reduced_precision_training(model, &mut config);

        // ── Step 4: LoRA ──────────────────────────────────────────────────────
        let model = model.with_lora(&self.lora, device)?;

        // ── Step 5: Report ────────────────────────────────────────────────────
        let report = ParameterReport::of(&model);
        println!("{report}");

        Ok(BuiltModel { model, config, tokenizer, report })
    }
}

/// Freeze every base parameter and turn off the KV cache.
///
/// Burn keeps a single float type per backend, so there is no
/// separate up-cast of layer norms to f32.
pub fn prepare_for_reduced_precision_training<B: Backend>(
    model:  GptNeoX<B>,
    config: &mut GptNeoXConfig,
) -> GptNeoX<B> {
    config.use_cache = false;
    model.no_grad()
}
