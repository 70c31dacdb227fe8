// ============================================================
// Layer 5 — ML / Model Layer (Burn)
// ============================================================
// All Burn model code lives here.
//
//   gpt_neox.rs  — GPT-NeoX causal decoder
//                  • token embeddings
//                  • rotary multi-head self-attention (fused qkv)
//                  • GELU feed-forward
//                  • parallel or sequential residual
//                  • untied LM head + masked causal-LM loss
//
//   lora.rs      — Low-rank adapters wrapped around Linear layers
//
//   weights.rs   — Imports HuggingFace safetensors checkpoints
//                  (F32 / F16 / BF16, sharded or single-file)
//
//   builder.rs   — Model id → frozen base + LoRA + param report
//
//   schedule.rs  — Linear learning-rate schedule
//
//   trainer.rs   — Training loop with per-epoch eval and
//                  PEFT checkpoints
//
// Reference: Burn Book §3 (Building Blocks)
//            Burn Book §5 (Training)
//            Black et al. (2022) GPT-NeoX-20B
//            Hu et al. (2021) LoRA

use burn::backend::{
    autodiff::checkpoint::strategy::BalancedCheckpointing, Autodiff, NdArray, Wgpu,
};

/// GPT-NeoX architecture
pub mod gpt_neox;

/// LoRA adapter and LoRA-wrapped Linear
pub mod lora;

/// Safetensors checkpoint import
pub mod weights;

/// Builds the LoRA-ready model from a model identifier
pub mod builder;

/// Learning-rate schedule
pub mod schedule;

/// Full training loop with evaluation and checkpointing
pub mod trainer;

// ─── Backends ─────────────────────────────────────────────────────────────────
/// GPU, half-precision weights and activations
pub type GpuHalf = Wgpu<half::f16, i32>;

/// GPU, full precision
pub type Gpu = Wgpu<f32, i32>;

/// CPU fallback
pub type Cpu = NdArray<f32>;

/// Autodiff that recomputes cheap activations instead of storing them
pub type Checkpointed<B> = Autodiff<B, BalancedCheckpointing>;
