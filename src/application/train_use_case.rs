// ============================================================
// Layer 2 — TrainUseCase
// ============================================================
// Orchestrates the full fine-tuning pipeline in order:
//
//   Step 1: Load .env, read the write token    (Layer 6 - infra)
//   Step 2: Save config                        (Layer 6 - infra)
//   Step 3: Build model + LoRA + tokenizer     (Layer 5 - ml)
//   Step 4: Pad token = end-of-text token      (Layer 4 - data)
//   Step 5: Build train / eval datasets        (Layer 4 - data)
//   Step 6: Run training loop                  (Layer 5 - ml)
//   Step 7: Push the adapter to the Hub        (Layer 6 - infra)
//
// The backend is picked once from `fp16` and
// `gradient_checkpointing`; everything after that is generic
// over B: AutodiffBackend.
//
// Reference: Burn Book §5 (Training)

use anyhow::Result;
use burn::{backend::Autodiff, tensor::backend::AutodiffBackend};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::data::{autodata::Autodata, collator::CausalLmCollator, tokenize::HfTextEncoder};
use crate::infra::{
    checkpoint::CheckpointManager,
    env,
    hub::HubClient,
    metrics::MetricsLogger,
    publisher::{HubPublisher, PublishResult, DEFAULT_ENDPOINT},
};
use crate::ml::{
    builder::ModelBuilder,
    lora::LoraSettings,
    trainer::{resolve_optimizer, TrainSummary, Trainer, TrainerSettings},
    Checkpointed, Cpu, Gpu, GpuHalf,
};

pub const BASE_MODEL_ID:  &str = "nlpai-lab/kullm-polyglot-5.8b-v2";
pub const PUSH_MODEL_ID:  &str = "YoonSeul/LawBot-airflow-test";
pub const TRAIN_FILE:     &str = "train_data.csv";
pub const EVAL_FILE:      &str = "eval_data.csv";

// ─── Training Configuration ──────────────────────────────────────────────────
// Every setting of a run. Saved to train_config.json so a run
// can be reproduced from its output directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub model_id:                    String,
    pub revision:                    Option<String>,
    pub push_model_id:               String,
    pub push_to_hub:                 bool,
    pub hub_endpoint:                String,
    pub env_file:                    Option<String>,
    pub data_dir:                    String,
    pub output_dir:                  String,
    pub max_length:                  usize,
    pub per_device_train_batch_size: usize,
    pub gradient_accumulation_steps: usize,
    pub num_train_epochs:            usize,
    pub learning_rate:               f64,
    pub warmup_steps:                usize,
    pub max_grad_norm:               f32,
    pub fp16:                        bool,
    pub gradient_checkpointing:      bool,
    pub cpu:                         bool,
    pub logging_steps:               usize,
    pub optim:                       String,
    pub seed:                        u64,
    pub lora_r:                      usize,
    pub lora_alpha:                  f64,
    pub lora_dropout:                f64,
    pub target_modules:              Vec<String>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            model_id:                    BASE_MODEL_ID.to_string(),
            revision:                    None,
            push_model_id:               PUSH_MODEL_ID.to_string(),
            push_to_hub:                 true,
            hub_endpoint:                DEFAULT_ENDPOINT.to_string(),
            env_file:                    None,
            data_dir:                    "data".to_string(),
            output_dir:                  "./model_outputs".to_string(),
            max_length:                  1024,
            per_device_train_batch_size: 16,
            gradient_accumulation_steps: 1,
            num_train_epochs:            6,
            learning_rate:               1e-4,
            warmup_steps:                0,
            max_grad_norm:               1.0,
            fp16:                        true,
            gradient_checkpointing:      true,
            cpu:                         false,
            logging_steps:               10,
            optim:                       "paged_adamw_8bit".to_string(),
            seed:                        42,
            lora_r:                      8,
            lora_alpha:                  32.0,
            lora_dropout:                0.05,
            target_modules:              vec!["query_key_value".to_string()],
        }
    }
}

impl TrainConfig {
    pub fn lora_settings(&self) -> LoraSettings {
        LoraSettings::new()
            .with_r(self.lora_r)
            .with_alpha(self.lora_alpha)
            .with_dropout(self.lora_dropout)
            .with_target_modules(self.target_modules.clone())
    }

    pub fn train_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join(TRAIN_FILE)
    }

    pub fn eval_path(&self) -> PathBuf {
        Path::new(&self.data_dir).join(EVAL_FILE)
    }

    fn trainer_settings(&self) -> Result<TrainerSettings> {
        anyhow::ensure!(self.per_device_train_batch_size > 0, "Batch size must be at least 1");
        anyhow::ensure!(self.gradient_accumulation_steps > 0, "Gradient accumulation must be at least 1");

        Ok(TrainerSettings {
            epochs:        self.num_train_epochs,
            batch_size:    self.per_device_train_batch_size,
            grad_accum:    self.gradient_accumulation_steps,
            learning_rate: self.learning_rate,
            warmup_steps:  self.warmup_steps,
            logging_steps: self.logging_steps,
            max_grad_norm: self.max_grad_norm,
            seed:          self.seed,
            optimizer:     resolve_optimizer(&self.optim)?,
        })
    }
}

/// What a finished run produced
#[derive(Debug)]
pub struct RunReport {
    pub summary:   TrainSummary,
    pub published: Option<PublishResult>,
}

// ─── TrainUseCase ─────────────────────────────────────────────────────────────
pub struct TrainUseCase {
    config: TrainConfig,
}

impl TrainUseCase {
    pub fn new(config: TrainConfig) -> Self {
        Self { config }
    }

    /// Execute the full pipeline end to end
    pub fn execute(&self) -> Result<RunReport> {
        let cfg = &self.config;

        // ── Step 1: Environment ───────────────────────────────────────────────
        match &cfg.env_file {
            Some(path) => env::load_env_file(Path::new(path))?,
            None => {
                env::load_dotenv();
            }
        }
        let token = env::write_token();
        if token.is_none() && cfg.push_to_hub {
            tracing::warn!(
                "{} is not set; training will run but the push to '{}' will fail",
                env::WRITE_TOKEN_VAR,
                cfg.push_model_id
            );
        }

        // ── Backend selection ─────────────────────────────────────────────────
        match (cfg.cpu, cfg.fp16, cfg.gradient_checkpointing) {
            (true, fp16, checkpointing) => {
                if fp16 {
                    tracing::warn!("fp16 is not supported on the CPU backend; training in f32");
                }
                if checkpointing {
                    run::<Checkpointed<Cpu>>(cfg, token)
                } else {
                    run::<Autodiff<Cpu>>(cfg, token)
                }
            }
            (false, true,  true)  => run::<Checkpointed<GpuHalf>>(cfg, token),
            (false, true,  false) => run::<Autodiff<GpuHalf>>(cfg, token),
            (false, false, true)  => run::<Checkpointed<Gpu>>(cfg, token),
            (false, false, false) => run::<Autodiff<Gpu>>(cfg, token),
        }
    }
}

/// The pipeline on a concrete backend
pub(crate) fn run<B: AutodiffBackend>(cfg: &TrainConfig, token: Option<String>) -> Result<RunReport> {
    let device = B::Device::default();
    let lora   = cfg.lora_settings();
    tracing::info!("Device: {:?}", device);

    // ── Step 2: Output directory + config ─────────────────────────────────────
    let checkpoints = CheckpointManager::new(&cfg.output_dir, &cfg.model_id, lora.clone())?;
    checkpoints.save_config(cfg)?;
    let settings = cfg.trainer_settings()?;

    // ── Step 3: Model, adapters, tokenizer ────────────────────────────────────
    tracing::info!("Loading base model '{}'", cfg.model_id);
    let built = ModelBuilder::new(&cfg.model_id, lora.clone())
        .with_revision(cfg.revision.clone())
        .with_hub(HubClient::new(token.clone()))
        .build::<B>(&device)?;

    // ── Step 4: Padding with the end-of-text token ────────────────────────────
    let collator = CausalLmCollator::new(built.tokenizer.pad_id());
    tracing::info!("Pad token id = eos token id = {}", built.tokenizer.eos_id());

    // ── Step 5: Datasets ──────────────────────────────────────────────────────
    let encoder       = HfTextEncoder::new(built.tokenizer.tokenizer());
    let train_dataset = Autodata::from_csv(cfg.train_path(), &encoder, cfg.max_length)?.into_dataset();
    let eval_dataset  = Autodata::from_csv(cfg.eval_path(), &encoder, cfg.max_length)?.into_dataset();
    tracing::info!(
        "Split: {} train, {} eval",
        train_dataset.examples().len(),
        eval_dataset.examples().len()
    );

    // ── Step 6: Training loop (Layer 5) ───────────────────────────────────────
    let metrics          = MetricsLogger::create(&cfg.output_dir)?;
    let trainer          = Trainer::new(&settings, collator, &checkpoints, &metrics);
    let (model, summary) = trainer.train(built.model, train_dataset, eval_dataset, &device)?;

    // ── Step 7: Publish ───────────────────────────────────────────────────────
    let published = if cfg.push_to_hub {
        tracing::info!("Pushing adapter to '{}'", cfg.push_model_id);
        let publisher = HubPublisher::new(token)?.with_endpoint(&cfg.hub_endpoint);
        let result    = publisher.push_adapter(&model, &lora, &cfg.model_id, &cfg.push_model_id)?;
        tracing::info!("{} files committed, {}", result.files, result.commit_url.as_deref().unwrap_or("no commit url"));
        Some(result)
    } else {
        tracing::info!("push_to_hub is off; adapter kept in '{}'", checkpoints.dir().display());
        None
    };

    Ok(RunReport { summary, published })
}
