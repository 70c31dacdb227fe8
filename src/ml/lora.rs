// ============================================================
// Layer 5 — Low-Rank Adaptation (LoRA)
// ============================================================
// Wraps a frozen Linear layer with two small trainable matrices:
//
//   y = base(x) + dropout(x) · A · B · (alpha / r)
//
//   A : [d_in, r]   Kaiming-uniform, bound 1/sqrt(d_in)
//   B : [r, d_out]  zeros
//
// Because B starts at zero, a freshly adapted layer produces
// exactly the base layer's output. Only A and B receive
// gradients; the base weight and bias stay frozen.
//
// Reference: Hu et al. (2021) LoRA: Low-Rank Adaptation of
//            Large Language Models

use burn::{
    module::Param,
    nn::{Dropout, DropoutConfig, Initializer, Linear},
    prelude::*,
};

/// Adapter hyper-parameters, mirrored into adapter_config.json.
#[derive(Config, Debug)]
pub struct LoraSettings {
    /// Rank of the update matrices
    #[config(default = 8)]
    pub r: usize,

    /// Scaling numerator; the update is multiplied by alpha / r
    #[config(default = 32.0)]
    pub alpha: f64,

    #[config(default = 0.05)]
    pub dropout: f64,

    /// Leaf names of the linear layers that receive an adapter
    #[config(default = "vec![String::from(\"query_key_value\")]")]
    pub target_modules: Vec<String>,

    /// Bias adaptation mode; only "none" is supported
    #[config(default = "String::from(\"none\")")]
    pub bias: String,

    #[config(default = "String::from(\"CAUSAL_LM\")")]
    pub task_type: String,
}

impl LoraSettings {
    pub fn scaling(&self) -> f64 {
        self.alpha / self.r as f64
    }

    pub fn targets(&self, leaf_name: &str) -> bool {
        self.target_modules.iter().any(|t| t == leaf_name)
    }
}

// ─── LoraAdapter ──────────────────────────────────────────────────────────────
/// The trainable low-rank pair attached to one linear layer.
#[derive(Module, Debug)]
pub struct LoraAdapter<B: Backend> {
    /// Down-projection `[d_in, r]`
    pub lora_a:  Param<Tensor<B, 2>>,
    /// Up-projection `[r, d_out]`
    pub lora_b:  Param<Tensor<B, 2>>,
    pub dropout: Dropout,
    pub scaling: f64,
}

impl<B: Backend> LoraAdapter<B> {
    pub fn new(d_in: usize, d_out: usize, settings: &LoraSettings, device: &B::Device) -> Self {
        let bound  = 1.0 / (d_in as f64).sqrt();
        let lora_a = Initializer::Uniform { min: -bound, max: bound }.init([d_in, settings.r], device);
        let lora_b = Initializer::Zeros.init([settings.r, d_out], device);

        Self {
            lora_a,
            lora_b,
            dropout: DropoutConfig::new(settings.dropout).init(),
            scaling: settings.scaling(),
        }
    }

    pub fn rank(&self) -> usize {
        self.lora_a.shape().dims::<2>()[1]
    }

    pub fn d_input(&self) -> usize {
        self.lora_a.shape().dims::<2>()[0]
    }

    pub fn d_output(&self) -> usize {
        self.lora_b.shape().dims::<2>()[1]
    }

    /// Trainable element count: r * (d_in + d_out)
    pub fn num_trainable(&self) -> usize {
        self.rank() * (self.d_input() + self.d_output())
    }

    /// Low-rank update for a 2-D input `[n, d_in]` → `[n, d_out]`
    pub fn delta(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        self.dropout
            .forward(x)
            .matmul(self.lora_a.val())
            .matmul(self.lora_b.val())
            .mul_scalar(self.scaling)
    }
}

// ─── LoraLinear ───────────────────────────────────────────────────────────────
/// A linear layer that may carry a LoRA adapter.
///
/// Every linear layer in the transformer uses this type, so the
/// same model struct serves before and after adaptation.
#[derive(Module, Debug)]
pub struct LoraLinear<B: Backend> {
    pub base:    Linear<B>,
    pub adapter: Option<LoraAdapter<B>>,
}

impl<B: Backend> LoraLinear<B> {
    pub fn new(base: Linear<B>) -> Self {
        Self { base, adapter: None }
    }

    /// (d_in, d_out) of the wrapped layer
    pub fn dims(&self) -> (usize, usize) {
        let [d_in, d_out] = self.base.weight.shape().dims::<2>();
        (d_in, d_out)
    }

    /// Freeze the base layer and attach a fresh adapter
    pub fn with_lora(self, settings: &LoraSettings, device: &B::Device) -> Self {
        let (d_in, d_out) = self.dims();
        Self {
            base:    self.base.no_grad(),
            adapter: Some(LoraAdapter::new(d_in, d_out, settings, device)),
        }
    }

    pub fn forward<const D: usize>(&self, x: Tensor<B, D>) -> Tensor<B, D> {
        let out = self.base.forward(x.clone());

        let Some(adapter) = &self.adapter else {
            return out;
        };

        let mut out_dims = x.dims();
        out_dims[D - 1] = adapter.d_output();

        let flat  = x.flatten::<2>(0, D - 2);
        let delta = adapter.delta(flat).reshape(out_dims);
        out + delta
    }
}
