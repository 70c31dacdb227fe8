// ============================================================
// Layer 5 — Training Loop
// ============================================================
// Custom train + evaluation loop over Burn's DataLoader.
//
// Per optimiser step:
//   forward → masked causal-LM loss → backward
//   → accumulate `grad_accum` micro-batches
//   → AdamW update at the scheduled learning rate
//
// Every `logging_steps` updates: mean loss since the last log.
// Every epoch end: mean eval loss, then a PEFT checkpoint.
//
// Notes on the backend:
//   - training runs on B (an AutodiffBackend)
//   - evaluation runs on B::InnerBackend via model.valid(),
//     which also switches dropout off
//   - only LoRA matrices require grad, so GradientsParams holds
//     nothing else and the optimiser never touches base weights
//
// Reference: Burn Book §5, Loshchilov & Hutter (2019) AdamW

use anyhow::{bail, Result};
use burn::{
    data::dataloader::DataLoaderBuilder,
    grad_clipping::GradientClippingConfig,
    module::AutodiffModule,
    optim::{AdamWConfig, GradientsAccumulator, GradientsParams, Optimizer},
    prelude::*,
    tensor::{backend::AutodiffBackend, Element},
};
use std::path::PathBuf;
use std::time::Instant;

use crate::data::{
    collator::{CausalLmBatch, CausalLmCollator},
    dataset::LmDataset,
};
use crate::domain::example::TokenizedExample;
use crate::infra::{
    checkpoint::{CheckpointManager, TrainerState},
    metrics::{LogEntry, MetricsLogger},
};
use crate::ml::gpt_neox::GptNeoX;
use crate::ml::schedule::LinearSchedule;

// ─── Optimiser Selection ──────────────────────────────────────────────────────
/// Optimisers the loop can run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizerKind {
    AdamW,
}

/// Map an optimiser name to what Burn provides.
///
/// 8-bit and paged variants keep their state in reduced precision
/// on the GPU; Burn's AdamW keeps full-precision state, so those
/// names run as plain AdamW with a warning.
pub fn resolve_optimizer(name: &str) -> Result<OptimizerKind> {
    match name {
        "adamw" | "adamw_torch" | "adamw_hf" => Ok(OptimizerKind::AdamW),
        "paged_adamw_8bit" | "paged_adamw_32bit" | "adamw_8bit" | "adamw_bnb_8bit" => {
            tracing::warn!("Optimizer '{}' is not available; using AdamW with full-precision state", name);
            Ok(OptimizerKind::AdamW)
        }
        other => bail!("Unsupported optimizer '{other}'"),
    }
}

// ─── AdamW Epsilon ────────────────────────────────────────────────────────────
/// Denominator guard of the AdamW update
pub const ADAM_EPSILON: f32 = 1e-8;

/// Smallest guard used when the float type cannot hold ADAM_EPSILON
pub const HALF_PRECISION_EPSILON: f32 = 1e-4;

/// `requested`, unless the float element type `E` rounds it away.
///
/// AdamW divides by `sqrt(v) + epsilon` in the backend's own float
/// type. In f16 1e-8 becomes 0, and a parameter whose gradient is
/// still exactly zero (every lora_A on the first step, because
/// lora_B starts at zero) would get 0 / 0.
pub fn adam_epsilon<E: Element>(requested: f32) -> f32 {
    let stored: f32 = E::from_elem(requested).elem();
    if stored >= requested * 0.5 {
        return requested;
    }
    let fallback = HALF_PRECISION_EPSILON.max(requested);
    tracing::warn!(
        "AdamW epsilon {:e} is not representable in {}; using {:e}",
        requested,
        std::any::type_name::<E>(),
        fallback
    );
    fallback
}

// ─── Settings / Summary ───────────────────────────────────────────────────────
#[derive(Debug, Clone)]
pub struct TrainerSettings {
    pub epochs:        usize,
    pub batch_size:    usize,
    pub grad_accum:    usize,
    pub learning_rate: f64,
    pub warmup_steps:  usize,
    pub logging_steps: usize,
    pub max_grad_norm: f32,
    pub seed:          u64,
    pub optimizer:     OptimizerKind,
}

impl TrainerSettings {
    /// Batches the loader yields per epoch (the last one may be short)
    pub fn batches_per_epoch(&self, num_examples: usize) -> usize {
        num_examples.div_ceil(self.batch_size.max(1))
    }

    /// Optimiser updates per epoch.
    /// A trailing partial accumulation window still makes one update.
    pub fn steps_per_epoch(&self, num_examples: usize) -> usize {
        self.batches_per_epoch(num_examples).div_ceil(self.grad_accum.max(1))
    }

    /// AdamW with an epsilon the float element type `E` can represent
    pub fn adamw<E: Element>(&self) -> AdamWConfig {
        AdamWConfig::new()
            .with_beta_1(0.9)
            .with_beta_2(0.999)
            .with_epsilon(adam_epsilon::<E>(ADAM_EPSILON))
            .with_weight_decay(0.0)
            .with_grad_clipping(Some(GradientClippingConfig::Norm(self.max_grad_norm)))
    }
}

#[derive(Debug, Clone)]
pub struct TrainSummary {
    pub global_step: usize,
    pub train_loss:  f64,
    pub eval_loss:   Option<f64>,
    pub checkpoints: Vec<PathBuf>,
}

// ─── Training Loop ────────────────────────────────────────────────────────────
pub struct Trainer<'a> {
    settings:    &'a TrainerSettings,
    collator:    CausalLmCollator,
    checkpoints: &'a CheckpointManager,
    metrics:     &'a MetricsLogger,
}

impl<'a> Trainer<'a> {
    pub fn new(
        settings:    &'a TrainerSettings,
        collator:    CausalLmCollator,
        checkpoints: &'a CheckpointManager,
        metrics:     &'a MetricsLogger,
    ) -> Self {
        Self { settings, collator, checkpoints, metrics }
    }

    pub fn train<B: AutodiffBackend>(
        &self,
        mut model:     GptNeoX<B>,
        train_dataset: LmDataset,
        eval_dataset:  LmDataset,
        device:        &B::Device,
    ) -> Result<(GptNeoX<B>, TrainSummary)> {
        let s = self.settings;
        let OptimizerKind::AdamW = s.optimizer;

        let batches         = s.batches_per_epoch(train_dataset.examples().len());
        let steps_per_epoch = s.steps_per_epoch(train_dataset.examples().len());
        if steps_per_epoch == 0 {
            bail!("Training dataset is empty");
        }
        let max_steps = steps_per_epoch * s.epochs;
        let schedule  = LinearSchedule::new(s.learning_rate, s.warmup_steps, max_steps);

        tracing::info!(
            "Training: {} examples, {} epochs, {} steps/epoch, {} total steps",
            train_dataset.examples().len(),
            s.epochs,
            steps_per_epoch,
            max_steps
        );

        // ── AdamW ─────────────────────────────────────────────────────────────
        let mut optim = s.adamw::<B::FloatElem>().init::<B, GptNeoX<B>>();

        // ── Loaders ───────────────────────────────────────────────────────────
        let train_loader = DataLoaderBuilder::<B, TokenizedExample, CausalLmBatch<B>>::new(self.collator.clone())
            .batch_size(s.batch_size)
            .shuffle(s.seed)
            .num_workers(1)
            .set_device(device.clone())
            .build(train_dataset);

        let eval_loader = DataLoaderBuilder::<B::InnerBackend, TokenizedExample, CausalLmBatch<B::InnerBackend>>::new(
            self.collator.clone(),
        )
        .batch_size(s.batch_size)
        .num_workers(1)
        .set_device(device.clone())
        .build(eval_dataset);

        // ── State ─────────────────────────────────────────────────────────────
        let mut global_step   = 0usize;
        let mut log_history   = Vec::new();
        let mut checkpoints   = Vec::new();
        let mut window_loss   = 0.0f64;
        let mut window_steps  = 0usize;
        let mut total_loss    = 0.0f64;
        let mut last_eval     = None;
        let started           = Instant::now();

        for epoch in 1..=s.epochs {
            let mut accumulator = GradientsAccumulator::<GptNeoX<B>>::new();
            let mut micro       = 0usize;
            let mut step_loss   = 0.0f64;

            for (i, batch) in train_loader.iter().enumerate() {
                // Micro-batches in this window; the last window may be short
                let window = s.grad_accum.min(batches - (i - micro));

                let loss = model.forward_loss(batch.input_ids, batch.attention_mask, batch.labels);
                step_loss += loss.clone().into_scalar().elem::<f64>() / window as f64;

                let grads = (loss / window as f64).backward();
                accumulator.accumulate(&model, GradientsParams::from_grads(grads, &model));
                micro += 1;

                if micro < window {
                    continue;
                }
                micro = 0;

                // ── Optimiser step ────────────────────────────────────────────
                let lr = schedule.lr_at(global_step);
                model = optim.step(lr, model, accumulator.grads());
                global_step += 1;

                window_loss  += step_loss;
                total_loss   += step_loss;
                window_steps += 1;
                step_loss     = 0.0;

                if s.logging_steps > 0 && global_step % s.logging_steps == 0 {
                    let entry = LogEntry::train(
                        global_step,
                        global_step as f64 / steps_per_epoch as f64,
                        window_loss / window_steps as f64,
                        schedule.lr_at(global_step),
                    );
                    println!(
                        "step {:>6}/{} | epoch {:.2} | loss {:.4} | lr {:.3e}",
                        entry.step,
                        max_steps,
                        entry.epoch,
                        window_loss / window_steps as f64,
                        schedule.lr_at(global_step),
                    );
                    self.metrics.log(&entry)?;
                    log_history.push(entry);
                    window_loss  = 0.0;
                    window_steps = 0;
                }
            }

            // ── Evaluation ────────────────────────────────────────────────────
            let eval_loss = evaluate(&model.valid(), eval_loader.iter());
            let epoch_f   = global_step as f64 / steps_per_epoch as f64;

            match eval_loss {
                Some(loss) => {
                    let entry = LogEntry::eval(global_step, epoch_f, loss);
                    self.metrics.log(&entry)?;
                    log_history.push(entry);
                    println!("Epoch {:>2}/{} | eval_loss {:.4}", epoch, s.epochs, loss);
                }
                None => tracing::warn!("Eval dataset is empty; skipping evaluation"),
            }
            last_eval = eval_loss.or(last_eval);

            // ── Checkpoint ────────────────────────────────────────────────────
            let state = TrainerState {
                global_step,
                epoch:            epoch_f,
                max_steps,
                num_train_epochs: s.epochs,
                logging_steps:    s.logging_steps,
                log_history:      log_history.clone(),
            };
            let dir = self.checkpoints.save(&model, &state)?;
            tracing::info!(
                "Epoch {} done in {:.0?}; checkpoint '{}'",
                epoch,
                started.elapsed(),
                dir.display()
            );
            checkpoints.push(dir);
        }

        let summary = TrainSummary {
            global_step,
            train_loss: if global_step > 0 { total_loss / global_step as f64 } else { f64::NAN },
            eval_loss:  last_eval,
            checkpoints,
        };
        tracing::info!("Training complete: {} steps, mean loss {:.4}", global_step, summary.train_loss);
        Ok((model, summary))
    }
}

/// Example-weighted mean loss over every eval batch, None if there are none
fn evaluate<B: Backend>(
    model:   &GptNeoX<B>,
    batches: impl Iterator<Item = CausalLmBatch<B>>,
) -> Option<f64> {
    let mut sum   = 0.0f64;
    let mut count = 0usize;

    for batch in batches {
        let n    = batch.input_ids.dims()[0];
        let loss = model
            .forward_loss(batch.input_ids, batch.attention_mask, batch.labels)
            .into_scalar()
            .elem::<f64>();
        sum   += loss * n as f64;
        count += n;
    }

    (count > 0).then(|| sum / count as f64)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::gpt_neox::tests::tiny_config;
    use crate::ml::lora::LoraSettings;
    use burn::backend::{Autodiff, NdArray};

    type TB = Autodiff<NdArray>;

    fn settings(epochs: usize) -> TrainerSettings {
        TrainerSettings {
            epochs,
            batch_size:    2,
            grad_accum:    1,
            learning_rate: 1e-3,
            warmup_steps:  0,
            logging_steps: 1,
            max_grad_norm: 1.0,
            seed:          42,
            optimizer:     OptimizerKind::AdamW,
        }
    }

    fn dataset(n: u32) -> LmDataset {
        LmDataset::new(
            (0..n)
                .map(|i| TokenizedExample::from_ids(vec![3 + i % 5, 4, 5 + i % 7, 6, 2]))
                .collect(),
        )
    }

    #[test]
    fn test_resolve_optimizer() {
        assert_eq!(resolve_optimizer("paged_adamw_8bit").unwrap(), OptimizerKind::AdamW);
        assert_eq!(resolve_optimizer("adamw_torch").unwrap(), OptimizerKind::AdamW);
        assert!(resolve_optimizer("sgd").is_err());
    }

    #[test]
    fn test_steps_per_epoch() {
        let s = TrainerSettings { batch_size: 16, ..settings(6) };
        assert_eq!(s.steps_per_epoch(0), 0);
        assert_eq!(s.steps_per_epoch(1), 1);
        assert_eq!(s.steps_per_epoch(16), 1);
        assert_eq!(s.steps_per_epoch(17), 2);

        let accum = TrainerSettings { grad_accum: 4, ..s };
        assert_eq!(accum.steps_per_epoch(17), 1);
        assert_eq!(accum.steps_per_epoch(16 * 8), 2);
        assert_eq!(accum.steps_per_epoch(16 * 9), 3);
    }

    #[test]
    fn test_epsilon_kept_representable() {
        // f16 flushes 1e-8 to zero
        assert_eq!(half::f16::from_f32(ADAM_EPSILON).to_f32(), 0.0);

        let eps = adam_epsilon::<half::f16>(ADAM_EPSILON);
        assert_eq!(eps, HALF_PRECISION_EPSILON);
        assert!(half::f16::from_f32(eps).to_f32() > 0.0);

        assert_eq!(adam_epsilon::<f32>(ADAM_EPSILON), ADAM_EPSILON);
    }

    /// One AdamW update from a fresh adapter; returns every lora_A value
    fn lora_a_after_first_step(epsilon: f32) -> Vec<f32> {
        use burn::data::dataloader::batcher::Batcher;

        let device = Default::default();
        let model  = tiny_config()
            .init::<TB>(&device)
            .no_grad()
            .with_lora(&LoraSettings::new(), &device)
            .unwrap();
        let batch: CausalLmBatch<TB> = Batcher::<TB, TokenizedExample, CausalLmBatch<TB>>::batch(
            &CausalLmCollator::new(2),
            dataset(2).examples().to_vec(),
            &device,
        );

        let loss      = model.forward_loss(batch.input_ids, batch.attention_mask, batch.labels);
        let grads     = GradientsParams::from_grads(loss.backward(), &model);
        let mut optim = AdamWConfig::new().with_epsilon(epsilon).init::<TB, GptNeoX<TB>>();
        let model     = optim.step(1e-4, model, grads);

        model
            .layers
            .iter()
            .flat_map(|l| {
                l.attention.query_key_value.adapter.as_ref().unwrap()
                    .lora_a.val().into_data().to_vec::<f32>().unwrap()
            })
            .collect()
    }

    #[test]
    fn test_half_precision_epsilon_keeps_lora_a_finite() {
        // lora_B = 0, so every lora_A gradient is 0 on the first step
        let flushed = half::f16::from_f32(ADAM_EPSILON).to_f32();
        assert!(lora_a_after_first_step(flushed).iter().any(|x| x.is_nan()));

        let eps = half::f16::from_f32(adam_epsilon::<half::f16>(ADAM_EPSILON)).to_f32();
        let a   = lora_a_after_first_step(eps);
        assert!(!a.is_empty());
        assert!(a.iter().all(|x| x.is_finite()));
    }

    #[test]
    fn test_partial_accumulation_window_still_steps() {
        let dir     = tempfile::tempdir().unwrap();
        let device  = Default::default();
        let lora    = LoraSettings::new();
        let model   = tiny_config()
            .init::<TB>(&device)
            .no_grad()
            .with_lora(&lora, &device)
            .unwrap();
        let ckpt    = CheckpointManager::new(dir.path(), "tiny", lora).unwrap();
        let metrics = MetricsLogger::create(dir.path()).unwrap();

        // 3 examples, batch 2 → 2 batches, fewer than grad_accum
        let s       = TrainerSettings { grad_accum: 4, ..settings(1) };
        assert_eq!(s.steps_per_epoch(3), 1);
        let trainer = Trainer::new(&s, CausalLmCollator::new(2), &ckpt, &metrics);

        let (model, summary) = trainer.train(model, dataset(3), dataset(2), &device).unwrap();

        assert_eq!(summary.global_step, 1);
        assert!(summary.train_loss.is_finite());
        assert!(summary.checkpoints[0].ends_with("checkpoint-1"));

        let b_max = model.layers[0]
            .attention
            .query_key_value
            .adapter
            .as_ref()
            .unwrap()
            .lora_b
            .val()
            .abs()
            .max()
            .into_scalar();
        assert!(b_max > 0.0);
    }

    #[test]
    fn test_trains_only_adapters_and_checkpoints_each_epoch() {
        let dir    = tempfile::tempdir().unwrap();
        let device = Default::default();
        let lora   = LoraSettings::new();
        let model  = tiny_config()
            .init::<TB>(&device)
            .no_grad()
            .with_lora(&lora, &device)
            .unwrap();
        let base_before = model.layers[0].attention.query_key_value.base.weight.val().into_data();

        let ckpt    = CheckpointManager::new(dir.path(), "tiny", lora).unwrap();
        let metrics = MetricsLogger::create(dir.path()).unwrap();
        let s       = settings(2);
        let trainer = Trainer::new(&s, CausalLmCollator::new(2), &ckpt, &metrics);

        let (model, summary) = trainer.train(model, dataset(6), dataset(3), &device).unwrap();

        assert_eq!(summary.global_step, 6);
        assert_eq!(summary.checkpoints.len(), 2);
        assert!(summary.checkpoints[0].ends_with("checkpoint-3"));
        assert!(summary.checkpoints[1].ends_with("checkpoint-6"));
        assert!(summary.train_loss.is_finite());
        assert!(summary.eval_loss.unwrap().is_finite());

        // Base weights are frozen
        let base_after = model.layers[0].attention.query_key_value.base.weight.val().into_data();
        base_after.assert_eq(&base_before, true);

        // B moved away from zero
        let b_max = model.layers[0]
            .attention
            .query_key_value
            .adapter
            .as_ref()
            .unwrap()
            .lora_b
            .val()
            .abs()
            .max()
            .into_scalar();
        assert!(b_max > 0.0);

        let csv = std::fs::read_to_string(metrics.csv_path()).unwrap();
        assert_eq!(csv.lines().count(), 1 + 6 + 2);
    }

    #[test]
    fn test_empty_training_set_fails() {
        let dir     = tempfile::tempdir().unwrap();
        let device  = Default::default();
        let ckpt    = CheckpointManager::new(dir.path(), "tiny", LoraSettings::new()).unwrap();
        let metrics = MetricsLogger::create(dir.path()).unwrap();
        let s       = settings(1);
        let trainer = Trainer::new(&s, CausalLmCollator::new(2), &ckpt, &metrics);

        let model = tiny_config().init::<TB>(&device);
        assert!(trainer.train(model, dataset(0), dataset(1), &device).is_err());
    }
}
