// ============================================================
// Layer 5 — GPT-NeoX Causal Language Model
// ============================================================
// Decoder-only transformer in the GPT-NeoX layout, so the
// checkpoints published for this family load without renaming:
//
//   embed_in → N × layer → final_layer_norm → embed_out
//
// Each layer (parallel residual, the default):
//   x = x + attention(ln1(x)) + mlp(ln2(x))
//
// Attention uses one fused projection (`query_key_value`) whose
// output is laid out per head as [q | k | v]. Rotary position
// embeddings rotate the first `rotary_pct` of every head.
//
// All linear layers are LoraLinear, so adapters can be attached
// by leaf name after the pretrained weights are in place.
//
// Reference: Black et al. (2022) GPT-NeoX-20B
//            Su et al. (2021) RoFormer (rotary embeddings)

use anyhow::{Context, Result};
use burn::{
    nn::{
        attention::generate_autoregressive_mask,
        Embedding, EmbeddingConfig,
        LayerNorm, LayerNormConfig,
        LinearConfig,
    },
    prelude::*,
    tensor::activation::{gelu, log_softmax, softmax},
};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::data::collator::IGNORE_INDEX;
use crate::ml::lora::{LoraLinear, LoraSettings};

/// Large negative logit used for masked attention scores.
/// Kept inside f16 range.
const MASK_VALUE: f32 = -1.0e4;

// ─── Configuration ────────────────────────────────────────────────────────────
/// Architecture hyper-parameters, read from the checkpoint's config.json.
/// Unknown keys are ignored; missing keys take the library defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GptNeoXConfig {
    #[serde(default = "defaults::vocab_size")]
    pub vocab_size: usize,
    #[serde(default = "defaults::hidden_size")]
    pub hidden_size: usize,
    #[serde(default = "defaults::num_hidden_layers")]
    pub num_hidden_layers: usize,
    #[serde(default = "defaults::num_attention_heads")]
    pub num_attention_heads: usize,
    #[serde(default = "defaults::intermediate_size")]
    pub intermediate_size: usize,
    #[serde(default = "defaults::hidden_act")]
    pub hidden_act: String,
    #[serde(default = "defaults::rotary_pct")]
    pub rotary_pct: f64,
    #[serde(default = "defaults::rotary_emb_base")]
    pub rotary_emb_base: f64,
    #[serde(default = "defaults::max_position_embeddings")]
    pub max_position_embeddings: usize,
    #[serde(default = "defaults::layer_norm_eps")]
    pub layer_norm_eps: f64,
    #[serde(default = "defaults::yes")]
    pub use_parallel_residual: bool,
    #[serde(default = "defaults::yes")]
    pub attention_bias: bool,
    #[serde(default)]
    pub use_cache: bool,
    #[serde(default)]
    pub eos_token_id: Option<u32>,
}

mod defaults {
    pub fn vocab_size() -> usize { 50432 }
    pub fn hidden_size() -> usize { 6144 }
    pub fn num_hidden_layers() -> usize { 44 }
    pub fn num_attention_heads() -> usize { 64 }
    pub fn intermediate_size() -> usize { 24576 }
    pub fn hidden_act() -> String { "gelu".into() }
    pub fn rotary_pct() -> f64 { 0.25 }
    pub fn rotary_emb_base() -> f64 { 10000.0 }
    pub fn max_position_embeddings() -> usize { 2048 }
    pub fn layer_norm_eps() -> f64 { 1e-5 }
    pub fn yes() -> bool { true }
}

impl GptNeoXConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Cannot read model config '{}'", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("Invalid model config '{}'", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.num_attention_heads > 0 && self.hidden_size % self.num_attention_heads == 0,
            "hidden_size {} is not divisible by num_attention_heads {}",
            self.hidden_size,
            self.num_attention_heads
        );
        anyhow::ensure!(
            matches!(self.hidden_act.as_str(), "gelu" | "gelu_new" | "gelu_fast"),
            "Unsupported activation '{}'",
            self.hidden_act
        );
        Ok(())
    }

    pub fn head_dim(&self) -> usize {
        self.hidden_size / self.num_attention_heads
    }

    /// Rotated dimensions per head
    pub fn rotary_ndims(&self) -> usize {
        (self.head_dim() as f64 * self.rotary_pct) as usize
    }

    /// Build a randomly initialised model. Parameters are lazy,
    /// so replacing them with pretrained weights right after is cheap.
    pub fn init<B: Backend>(&self, device: &B::Device) -> GptNeoX<B> {
        let layers = (0..self.num_hidden_layers)
            .map(|_| self.init_layer(device))
            .collect();

        GptNeoX {
            embed_in: EmbeddingConfig::new(self.vocab_size, self.hidden_size).init(device),
            layers,
            final_layer_norm: self.layer_norm(device),
            embed_out: LoraLinear::new(
                LinearConfig::new(self.hidden_size, self.vocab_size)
                    .with_bias(false)
                    .init(device),
            ),
        }
    }

    fn init_layer<B: Backend>(&self, device: &B::Device) -> GptNeoXLayer<B> {
        let h = self.hidden_size;
        let linear = |d_in, d_out, bias| {
            LoraLinear::new(LinearConfig::new(d_in, d_out).with_bias(bias).init(device))
        };

        GptNeoXLayer {
            input_layernorm:          self.layer_norm(device),
            post_attention_layernorm: self.layer_norm(device),
            attention: Attention {
                query_key_value: linear(h, 3 * h, self.attention_bias),
                dense:           linear(h, h, self.attention_bias),
                num_heads:       self.num_attention_heads,
                head_dim:        self.head_dim(),
                rotary_ndims:    self.rotary_ndims(),
                rotary_base:     self.rotary_emb_base,
            },
            mlp: Mlp {
                dense_h_to_4h: linear(h, self.intermediate_size, true),
                dense_4h_to_h: linear(self.intermediate_size, h, true),
                tanh_gelu:     self.hidden_act != "gelu",
            },
            use_parallel_residual: self.use_parallel_residual,
        }
    }

    fn layer_norm<B: Backend>(&self, device: &B::Device) -> LayerNorm<B> {
        LayerNormConfig::new(self.hidden_size)
            .with_epsilon(self.layer_norm_eps)
            .init(device)
    }
}

// ─── Attention ────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct Attention<B: Backend> {
    pub query_key_value: LoraLinear<B>,
    pub dense:           LoraLinear<B>,
    pub num_heads:       usize,
    pub head_dim:        usize,
    pub rotary_ndims:    usize,
    pub rotary_base:     f64,
}

impl<B: Backend> Attention<B> {
    /// x: [batch, seq, hidden], key_padding: [batch, seq] (true = padding)
    pub fn forward(&self, x: Tensor<B, 3>, key_padding: Option<Tensor<B, 2, Bool>>) -> Tensor<B, 3> {
        let [batch, seq, hidden] = x.dims();
        let (heads, hd) = (self.num_heads, self.head_dim);
        let device = x.device();

        // [b, s, 3h] → [b, s, heads, 3·hd] → q, k, v as [b, heads, s, hd]
        let qkv = self.query_key_value.forward(x).reshape([batch, seq, heads, 3 * hd]);
        let split = |i: usize| qkv.clone().narrow(3, i * hd, hd).swap_dims(1, 2);
        let (q, k, v) = (split(0), split(1), split(2));

        let (cos, sin) = rotary_tables::<B>(seq, self.rotary_ndims, self.rotary_base, &device);
        let q = apply_rotary(q, cos.clone(), sin.clone(), self.rotary_ndims);
        let k = apply_rotary(k, cos, sin, self.rotary_ndims);

        let scores = q
            .matmul(k.swap_dims(2, 3))
            .div_scalar((hd as f64).sqrt());

        let causal = generate_autoregressive_mask::<B>(batch, seq, &device)
            .unsqueeze_dim::<4>(1)
            .expand([batch, heads, seq, seq]);
        let mut scores = scores.mask_fill(causal, MASK_VALUE);

        if let Some(padding) = key_padding {
            let padding = padding
                .reshape([batch, 1, 1, seq])
                .expand([batch, heads, seq, seq]);
            scores = scores.mask_fill(padding, MASK_VALUE);
        }

        let context = softmax(scores, 3)
            .matmul(v)
            .swap_dims(1, 2)
            .reshape([batch, seq, hidden]);

        self.dense.forward(context)
    }
}

/// cos/sin tables of shape [1, 1, seq, rot], computed in f32 on the host
fn rotary_tables<B: Backend>(
    seq:    usize,
    rot:    usize,
    base:   f64,
    device: &B::Device,
) -> (Tensor<B, 4>, Tensor<B, 4>) {
    let half = rot / 2;
    let inv_freq: Vec<f64> = (0..half)
        .map(|i| 1.0 / base.powf((2 * i) as f64 / rot as f64))
        .collect();

    let mut cos = Vec::with_capacity(seq * rot);
    let mut sin = Vec::with_capacity(seq * rot);
    for t in 0..seq {
        for i in 0..rot {
            let angle = t as f64 * inv_freq[i % half.max(1)];
            cos.push(angle.cos() as f32);
            sin.push(angle.sin() as f32);
        }
    }

    let table = |values: Vec<f32>| {
        Tensor::<B, 4>::from_data(
            TensorData::new(values, [1, 1, seq, rot]).convert::<B::FloatElem>(),
            device,
        )
    };
    (table(cos), table(sin))
}

/// Rotate the first `rot` dims of every head; pass the rest through
fn apply_rotary<B: Backend>(x: Tensor<B, 4>, cos: Tensor<B, 4>, sin: Tensor<B, 4>, rot: usize) -> Tensor<B, 4> {
    if rot == 0 {
        return x;
    }
    let hd = x.dims()[3];
    let x_rot = x.clone().narrow(3, 0, rot);

    let half    = rot / 2;
    let rotated = Tensor::cat(
        vec![x_rot.clone().narrow(3, half, half).neg(), x_rot.clone().narrow(3, 0, half)],
        3,
    );
    let x_rot = x_rot * cos + rotated * sin;

    if rot == hd {
        x_rot
    } else {
        Tensor::cat(vec![x_rot, x.narrow(3, rot, hd - rot)], 3)
    }
}

// ─── MLP ──────────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    pub dense_h_to_4h: LoraLinear<B>,
    pub dense_4h_to_h: LoraLinear<B>,
    pub tanh_gelu:     bool,
}

impl<B: Backend> Mlp<B> {
    pub fn forward(&self, x: Tensor<B, 3>) -> Tensor<B, 3> {
        let h = self.dense_h_to_4h.forward(x);
        let h = if self.tanh_gelu { gelu_tanh(h) } else { gelu(h) };
        self.dense_4h_to_h.forward(h)
    }
}

/// 0.5·x·(1 + tanh(√(2/π)·(x + 0.044715·x³)))
fn gelu_tanh<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    let inner = (x.clone() + x.clone().powf_scalar(3.0).mul_scalar(0.044715))
        .mul_scalar((2.0 / std::f64::consts::PI).sqrt());
    x.mul_scalar(0.5) * (inner.tanh().add_scalar(1.0))
}

// ─── Layer ────────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct GptNeoXLayer<B: Backend> {
    pub input_layernorm:          LayerNorm<B>,
    pub post_attention_layernorm: LayerNorm<B>,
    pub attention:                Attention<B>,
    pub mlp:                      Mlp<B>,
    pub use_parallel_residual:    bool,
}

impl<B: Backend> GptNeoXLayer<B> {
    pub fn forward(&self, x: Tensor<B, 3>, key_padding: Option<Tensor<B, 2, Bool>>) -> Tensor<B, 3> {
        let attn = self
            .attention
            .forward(self.input_layernorm.forward(x.clone()), key_padding);

        if self.use_parallel_residual {
            let mlp = self.mlp.forward(self.post_attention_layernorm.forward(x.clone()));
            x + attn + mlp
        } else {
            let x = x + attn;
            let mlp = self.mlp.forward(self.post_attention_layernorm.forward(x.clone()));
            x + mlp
        }
    }

    /// (leaf name, layer) for every linear layer, in checkpoint order
    fn linears(&self) -> [(&'static str, &LoraLinear<B>); 4] {
        [
            ("attention.query_key_value", &self.attention.query_key_value),
            ("attention.dense",           &self.attention.dense),
            ("mlp.dense_h_to_4h",         &self.mlp.dense_h_to_4h),
            ("mlp.dense_4h_to_h",         &self.mlp.dense_4h_to_h),
        ]
    }
}

// ─── Model ────────────────────────────────────────────────────────────────────
#[derive(Module, Debug)]
pub struct GptNeoX<B: Backend> {
    pub embed_in:         Embedding<B>,
    pub layers:           Vec<GptNeoXLayer<B>>,
    pub final_layer_norm: LayerNorm<B>,
    pub embed_out:        LoraLinear<B>,
}

impl<B: Backend> GptNeoX<B> {
    /// input_ids: [batch, seq] → logits: [batch, seq, vocab]
    pub fn forward(
        &self,
        input_ids:      Tensor<B, 2, Int>,
        attention_mask: Option<Tensor<B, 2, Int>>,
    ) -> Tensor<B, 3> {
        let key_padding = attention_mask.map(|m| m.equal_elem(0));

        let mut x = self.embed_in.forward(input_ids);
        for layer in &self.layers {
            x = layer.forward(x, key_padding.clone());
        }
        self.embed_out.forward(self.final_layer_norm.forward(x))
    }

    /// Mean next-token cross-entropy over labels that are not IGNORE_INDEX.
    /// Position t predicts label t+1.
    pub fn forward_loss(
        &self,
        input_ids:      Tensor<B, 2, Int>,
        attention_mask: Tensor<B, 2, Int>,
        labels:         Tensor<B, 2, Int>,
    ) -> Tensor<B, 1> {
        let logits = self.forward(input_ids, Some(attention_mask));
        causal_lm_loss(logits, labels)
    }

    /// Attach adapters to every linear layer whose leaf name is targeted.
    /// Fails when no layer matches.
    pub fn with_lora(mut self, settings: &LoraSettings, device: &B::Device) -> Result<Self> {
        anyhow::ensure!(
            settings.bias == "none",
            "Unsupported LoRA bias mode '{}'",
            settings.bias
        );

        let mut attached = 0;
        let attach = |linear: LoraLinear<B>, leaf: &str, attached: &mut usize| {
            if settings.targets(leaf) {
                *attached += 1;
                linear.with_lora(settings, device)
            } else {
                linear
            }
        };

        self.layers = self
            .layers
            .into_iter()
            .map(|mut layer| {
                layer.attention.query_key_value =
                    attach(layer.attention.query_key_value, "query_key_value", &mut attached);
                layer.attention.dense = attach(layer.attention.dense, "dense", &mut attached);
                layer.mlp.dense_h_to_4h = attach(layer.mlp.dense_h_to_4h, "dense_h_to_4h", &mut attached);
                layer.mlp.dense_4h_to_h = attach(layer.mlp.dense_4h_to_h, "dense_4h_to_h", &mut attached);
                layer
            })
            .collect();

        anyhow::ensure!(
            attached > 0,
            "No layer matches LoRA target modules {:?}",
            settings.target_modules
        );
        tracing::debug!("LoRA attached to {} linear layers", attached);
        Ok(self)
    }

    /// Sum of adapter parameters; the only trainable weights after freezing
    pub fn num_trainable_params(&self) -> usize {
        self.layers
            .iter()
            .flat_map(|l| l.linears())
            .filter_map(|(_, linear)| linear.adapter.as_ref())
            .map(|a| a.num_trainable())
            .sum()
    }

    /// Adapter matrices under their PEFT names, in PEFT orientation:
    /// `lora_A.weight` is [r, d_in] and `lora_B.weight` is [d_out, r].
    pub fn adapter_tensors(&self) -> Vec<(String, Tensor<B, 2>)> {
        let mut out = Vec::new();
        for (i, layer) in self.layers.iter().enumerate() {
            for (path, linear) in layer.linears() {
                if let Some(adapter) = &linear.adapter {
                    let prefix = format!("base_model.model.gpt_neox.layers.{i}.{path}");
                    out.push((format!("{prefix}.lora_A.weight"), adapter.lora_a.val().transpose()));
                    out.push((format!("{prefix}.lora_B.weight"), adapter.lora_b.val().transpose()));
                }
            }
        }
        out
    }
}

/// Shifted, masked cross-entropy.
/// logits: [b, s, v], labels: [b, s] → scalar loss [1]
pub fn causal_lm_loss<B: Backend>(logits: Tensor<B, 3>, labels: Tensor<B, 2, Int>) -> Tensor<B, 1> {
    let [batch, seq, vocab] = logits.dims();
    if seq < 2 {
        return Tensor::zeros([1], &logits.device());
    }
    let n = batch * (seq - 1);

    let logits  = logits.narrow(1, 0, seq - 1).reshape([n, vocab]);
    let targets = labels.narrow(1, 1, seq - 1).reshape([n]);

    let ignored = targets.clone().equal_elem(IGNORE_INDEX);
    let safe    = targets.mask_fill(ignored.clone(), 0);
    let keep    = ignored.bool_not().float();

    let picked = log_softmax(logits, 1)
        .gather(1, safe.reshape([n, 1]))
        .reshape([n]);

    let count = keep.clone().sum().clamp_min(1.0);
    (picked * keep).sum().neg() / count
}
