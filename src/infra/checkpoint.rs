// ============================================================
// Layer 6 — Checkpoint Manager
// ============================================================
// Saves LoRA adapters in the PEFT directory layout so that the
// Python ecosystem (PeftModel.from_pretrained) can load them:
//
//   model_outputs/
//     train_config.json              ← run configuration
//     metrics.csv                    ← written by MetricsLogger
//     checkpoint-37/
//       adapter_config.json          ← PEFT LoraConfig
//       adapter_model.safetensors    ← lora_A / lora_B, F32
//       trainer_state.json           ← step, epoch, log history
//     checkpoint-74/
//     ...
//
// Only the adapter is stored. The frozen base model is never
// written; it is re-downloaded by identifier when needed.

use anyhow::{Context, Result};
use burn::prelude::*;
use safetensors::{tensor::TensorView, Dtype};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashMap,
    fs,
    path::{Path, PathBuf},
};

use crate::application::train_use_case::TrainConfig;
use crate::infra::metrics::LogEntry;
use crate::ml::gpt_neox::GptNeoX;
use crate::ml::lora::LoraSettings;

pub const ADAPTER_CONFIG_FILE:  &str = "adapter_config.json";
pub const ADAPTER_WEIGHTS_FILE: &str = "adapter_model.safetensors";
pub const TRAINER_STATE_FILE:   &str = "trainer_state.json";

// ─── adapter_config.json ──────────────────────────────────────────────────────
/// The subset of PEFT's LoraConfig needed to reload an adapter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeftAdapterConfig {
    pub peft_type: String,
    pub task_type: String,
    pub r: usize,
    pub lora_alpha: f64,
    pub lora_dropout: f64,
    pub target_modules: Vec<String>,
    pub bias: String,
    pub base_model_name_or_path: String,
    #[serde(default)]
    pub fan_in_fan_out: bool,
    #[serde(default)]
    pub inference_mode: bool,
}

impl PeftAdapterConfig {
    pub fn from_settings(settings: &LoraSettings, base_model: &str) -> Self {
        Self {
            peft_type:               "LORA".to_string(),
            task_type:               settings.task_type.clone(),
            r:                       settings.r,
            lora_alpha:              settings.alpha,
            lora_dropout:            settings.dropout,
            target_modules:          settings.target_modules.clone(),
            bias:                    settings.bias.clone(),
            base_model_name_or_path: base_model.to_string(),
            fan_in_fan_out:          false,
            inference_mode:          true,
        }
    }
}

// ─── trainer_state.json ───────────────────────────────────────────────────────
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainerState {
    pub global_step:      usize,
    pub epoch:            f64,
    pub max_steps:        usize,
    pub num_train_epochs: usize,
    pub logging_steps:    usize,
    pub log_history:      Vec<LogEntry>,
}

// ─── Adapter Export ───────────────────────────────────────────────────────────
/// Write adapter_config.json + adapter_model.safetensors into `dir`
pub fn write_adapter<B: Backend>(
    model:      &GptNeoX<B>,
    settings:   &LoraSettings,
    base_model: &str,
    dir:        &Path,
) -> Result<()> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Cannot create '{}'", dir.display()))?;

    let config = PeftAdapterConfig::from_settings(settings, base_model);
    write_json(&dir.join(ADAPTER_CONFIG_FILE), &config)?;

    let bytes = adapter_safetensors(model)?;
    let path  = dir.join(ADAPTER_WEIGHTS_FILE);
    fs::write(&path, bytes)
        .with_context(|| format!("Cannot write '{}'", path.display()))?;
    Ok(())
}

/// Serialise every adapter matrix as F32 safetensors bytes
pub fn adapter_safetensors<B: Backend>(model: &GptNeoX<B>) -> Result<Vec<u8>> {
    let mut tensors: Vec<(String, Vec<u8>, Vec<usize>)> = Vec::new();
    for (name, tensor) in model.adapter_tensors() {
        let shape  = tensor.dims().to_vec();
        let values = tensor
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| anyhow::anyhow!("Cannot read tensor '{name}': {e:?}"))?;
        tensors.push((name, bytemuck::cast_slice(&values).to_vec(), shape));
    }
    anyhow::ensure!(!tensors.is_empty(), "Model has no LoRA adapters to save");

    let views = tensors
        .iter()
        .map(|(name, bytes, shape)| {
            TensorView::new(Dtype::F32, shape.clone(), bytes)
                .map(|view| (name.as_str(), view))
                .map_err(|e| anyhow::anyhow!("Invalid tensor '{name}': {e}"))
        })
        .collect::<Result<Vec<_>>>()?;

    let metadata = HashMap::from([("format".to_string(), "pt".to_string())]);
    safetensors::serialize(views, Some(metadata))
        .map_err(|e| anyhow::anyhow!("Safetensors serialisation failed: {e}"))
}

/// README.md for the published adapter repository
pub fn model_card(base_model: &str, repo_id: &str) -> String {
    format!(
        "---\n\
         library_name: peft\n\
         base_model: {base_model}\n\
         tags:\n\
         - lora\n\
         - causal-lm\n\
         ---\n\
         \n\
         # {repo_id}\n\
         \n\
         LoRA adapter for [{base_model}](https://huggingface.co/{base_model}), \
         fine-tuned on Korean legal question/answer pairs.\n"
    )
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)
        .with_context(|| format!("Cannot write '{}'", path.display()))
}

// ─── Checkpoint Manager ───────────────────────────────────────────────────────
/// Owns the output directory and everything written into it
pub struct CheckpointManager {
    dir:        PathBuf,
    base_model: String,
    settings:   LoraSettings,
}

impl CheckpointManager {
    pub fn new(dir: impl Into<PathBuf>, base_model: impl Into<String>, settings: LoraSettings) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Cannot create output directory '{}'", dir.display()))?;
        Ok(Self { dir, base_model: base_model.into(), settings })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn checkpoint_dir(&self, global_step: usize) -> PathBuf {
        self.dir.join(format!("checkpoint-{global_step}"))
    }

    /// Write `checkpoint-{global_step}/` and return its path
    pub fn save<B: Backend>(&self, model: &GptNeoX<B>, state: &TrainerState) -> Result<PathBuf> {
        let dir = self.checkpoint_dir(state.global_step);
        write_adapter(model, &self.settings, &self.base_model, &dir)?;
        write_json(&dir.join(TRAINER_STATE_FILE), state)?;

        tracing::debug!("Saved checkpoint '{}'", dir.display());
        Ok(dir)
    }

    /// Save the run configuration to train_config.json
    pub fn save_config(&self, cfg: &TrainConfig) -> Result<()> {
        let path = self.dir.join("train_config.json");
        write_json(&path, cfg)?;
        tracing::debug!("Saved training config to '{}'", path.display());
        Ok(())
    }
}
