// ============================================================
// Layer 5 — Pretrained Weight Import
// ============================================================
// Copies tensors from HuggingFace safetensors files into a
// freshly initialised GptNeoX model.
//
// Conventions handled here:
//   - linear weights are stored [d_out, d_in]; Burn wants
//     [d_in, d_out], so they are transposed on load
//   - F32, F16 and BF16 are accepted and converted to the
//     backend's float type
//   - checkpoints may be split over several shard files
//
// Every tensor the model needs must be present with the
// expected shape; anything else is an error.

use anyhow::{bail, Context, Result};
use burn::{
    module::Param,
    nn::{Embedding, LayerNorm},
    prelude::*,
};
use safetensors::{Dtype, SafeTensors};
use std::path::{Path, PathBuf};

use crate::ml::gpt_neox::GptNeoX;
use crate::ml::lora::LoraLinear;

/// Raw safetensors shards held in memory
pub struct SafetensorsWeights {
    shards: Vec<(PathBuf, Vec<u8>)>,
}

impl SafetensorsWeights {
    pub fn open(files: &[PathBuf]) -> Result<Self> {
        let mut shards = Vec::with_capacity(files.len());
        for path in files {
            let bytes = std::fs::read(path)
                .with_context(|| format!("Cannot read weights '{}'", path.display()))?;
            SafeTensors::deserialize(&bytes)
                .map_err(|e| anyhow::anyhow!("Invalid safetensors file '{}': {e}", path.display()))?;
            tracing::debug!("Read {} ({} MiB)", path.display(), bytes.len() >> 20);
            shards.push((path.clone(), bytes));
        }
        Ok(Self { shards })
    }

    /// Look up a tensor by name across all shards, as f32 values + shape
    pub fn read_f32(&self, name: &str) -> Result<(Vec<f32>, Vec<usize>)> {
        for (path, bytes) in &self.shards {
            let st = SafeTensors::deserialize(bytes)
                .map_err(|e| anyhow::anyhow!("Invalid safetensors file '{}': {e}", path.display()))?;
            let Ok(view) = st.tensor(name) else { continue };

            let values = decode_f32(view.dtype(), view.data())
                .with_context(|| format!("Tensor '{name}' in '{}'", path.display()))?;
            return Ok((values, view.shape().to_vec()));
        }
        bail!("Tensor '{name}' not found in checkpoint")
    }

    pub fn tensor<B: Backend, const D: usize>(
        &self,
        name:     &str,
        expected: [usize; D],
        device:   &B::Device,
    ) -> Result<Tensor<B, D>> {
        let (values, shape) = self.read_f32(name)?;
        anyhow::ensure!(
            shape == expected,
            "Tensor '{name}' has shape {shape:?}, expected {expected:?}"
        );
        Ok(Tensor::from_data(
            TensorData::new(values, expected).convert::<B::FloatElem>(),
            device,
        ))
    }
}

fn decode_f32(dtype: Dtype, data: &[u8]) -> Result<Vec<f32>> {
    Ok(match dtype {
        Dtype::F32  => bytemuck::pod_collect_to_vec::<u8, f32>(data),
        Dtype::F16  => bytemuck::pod_collect_to_vec::<u8, half::f16>(data)
            .into_iter()
            .map(half::f16::to_f32)
            .collect(),
        Dtype::BF16 => bytemuck::pod_collect_to_vec::<u8, half::bf16>(data)
            .into_iter()
            .map(half::bf16::to_f32)
            .collect(),
        other => bail!("Unsupported dtype {other:?}"),
    })
}

// ─── Model Loading ────────────────────────────────────────────────────────────
/// Replace every parameter of `model` with the checkpoint's values
pub fn load_gpt_neox<B: Backend>(
    mut model: GptNeoX<B>,
    weights:   &SafetensorsWeights,
    device:    &B::Device,
) -> Result<GptNeoX<B>> {
    model.embed_in = load_embedding(model.embed_in, weights, "gpt_neox.embed_in", device)?;

    for (i, layer) in model.layers.iter_mut().enumerate() {
        let prefix = format!("gpt_neox.layers.{i}");
        let ln     = |name: &str, norm: LayerNorm<B>| load_layer_norm(norm, weights, &format!("{prefix}.{name}"), device);
        let linear = |name: &str, lin: LoraLinear<B>| load_linear(lin, weights, &format!("{prefix}.{name}"), device);

        layer.input_layernorm          = ln("input_layernorm", layer.input_layernorm.clone())?;
        layer.post_attention_layernorm = ln("post_attention_layernorm", layer.post_attention_layernorm.clone())?;
        layer.attention.query_key_value =
            linear("attention.query_key_value", layer.attention.query_key_value.clone())?;
        layer.attention.dense     = linear("attention.dense", layer.attention.dense.clone())?;
        layer.mlp.dense_h_to_4h   = linear("mlp.dense_h_to_4h", layer.mlp.dense_h_to_4h.clone())?;
        layer.mlp.dense_4h_to_h   = linear("mlp.dense_4h_to_h", layer.mlp.dense_4h_to_h.clone())?;

        tracing::debug!("Loaded layer {i}");
    }

    model.final_layer_norm = load_layer_norm(model.final_layer_norm, weights, "gpt_neox.final_layer_norm", device)?;
    model.embed_out        = load_linear(model.embed_out, weights, "embed_out", device)?;
    Ok(model)
}

fn load_embedding<B: Backend>(
    mut emb: Embedding<B>,
    weights: &SafetensorsWeights,
    prefix:  &str,
    device:  &B::Device,
) -> Result<Embedding<B>> {
    let dims   = emb.weight.shape().dims::<2>();
    emb.weight = Param::from_tensor(weights.tensor(&format!("{prefix}.weight"), dims, device)?);
    Ok(emb)
}

fn load_layer_norm<B: Backend>(
    mut norm: LayerNorm<B>,
    weights:  &SafetensorsWeights,
    prefix:   &str,
    device:   &B::Device,
) -> Result<LayerNorm<B>> {
    let dims   = norm.gamma.shape().dims::<1>();
    norm.gamma = Param::from_tensor(weights.tensor(&format!("{prefix}.weight"), dims, device)?);
    norm.beta  = Param::from_tensor(weights.tensor(&format!("{prefix}.bias"), dims, device)?);
    Ok(norm)
}

fn load_linear<B: Backend>(
    mut linear: LoraLinear<B>,
    weights:    &SafetensorsWeights,
    prefix:     &str,
    device:     &B::Device,
) -> Result<LoraLinear<B>> {
    let (d_in, d_out) = linear.dims();

    let weight: Tensor<B, 2> = weights.tensor(&format!("{prefix}.weight"), [d_out, d_in], device)?;
    linear.base.weight = Param::from_tensor(weight.transpose());

    if linear.base.bias.is_some() {
        let bias = weights.tensor(&format!("{prefix}.bias"), [d_out], device)?;
        linear.base.bias = Some(Param::from_tensor(bias));
    }
    Ok(linear)
}

/// Weight files listed by a sharded checkpoint index, deduplicated, in order
pub fn shards_from_index(index_path: &Path) -> Result<Vec<String>> {
    let text = std::fs::read_to_string(index_path)
        .with_context(|| format!("Cannot read '{}'", index_path.display()))?;
    let index: serde_json::Value = serde_json::from_str(&text)
        .with_context(|| format!("Invalid index '{}'", index_path.display()))?;

    let map = index
        .get("weight_map")
        .and_then(|m| m.as_object())
        .ok_or_else(|| anyhow::anyhow!("'{}' has no weight_map", index_path.display()))?;

    let mut files: Vec<String> = Vec::new();
    for file in map.values().filter_map(|v| v.as_str()) {
        if !files.iter().any(|f| f == file) {
            files.push(file.to_string());
        }
    }
    files.sort();
    Ok(files)
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::ml::gpt_neox::tests::tiny_config;
    use burn::backend::NdArray;
    use safetensors::tensor::TensorView;

    type TB = NdArray;

    pub(crate) type Entry = (String, Vec<u8>, Vec<usize>);

    pub(crate) fn f16_entry<const D: usize>(name: String, t: Tensor<TB, D>) -> Entry {
        let shape  = t.dims().to_vec();
        let values: Vec<f32> = t.into_data().convert::<f32>().to_vec().unwrap();
        let halves: Vec<half::f16> = values.into_iter().map(half::f16::from_f32).collect();
        (name, bytemuck::cast_slice(&halves).to_vec(), shape)
    }

    /// Export a model's parameters the way HF stores them (F16)
    pub(crate) fn export_hf(model: &GptNeoX<TB>) -> Vec<Entry> {
        let mut out = vec![f16_entry("gpt_neox.embed_in.weight".into(), model.embed_in.weight.val())];

        let norm = |out: &mut Vec<Entry>, prefix: String, ln: &LayerNorm<TB>| {
            out.push(f16_entry(format!("{prefix}.weight"), ln.gamma.val()));
            out.push(f16_entry(format!("{prefix}.bias"), ln.beta.val()));
        };

        for (i, layer) in model.layers.iter().enumerate() {
            let p = format!("gpt_neox.layers.{i}");
            norm(&mut out, format!("{p}.input_layernorm"), &layer.input_layernorm);
            norm(&mut out, format!("{p}.post_attention_layernorm"), &layer.post_attention_layernorm);

            for (name, lin) in [
                ("attention.query_key_value", &layer.attention.query_key_value),
                ("attention.dense",           &layer.attention.dense),
                ("mlp.dense_h_to_4h",         &layer.mlp.dense_h_to_4h),
                ("mlp.dense_4h_to_h",         &layer.mlp.dense_4h_to_h),
            ] {
                out.push(f16_entry(format!("{p}.{name}.weight"), lin.base.weight.val().transpose()));
                out.push(f16_entry(format!("{p}.{name}.bias"), lin.base.bias.as_ref().unwrap().val()));
            }
        }

        norm(&mut out, "gpt_neox.final_layer_norm".into(), &model.final_layer_norm);
        out.push(f16_entry("embed_out.weight".into(), model.embed_out.base.weight.val().transpose()));
        out
    }

    pub(crate) fn write_safetensors(path: &Path, tensors: &[Entry]) {
        let views: Vec<(&str, TensorView<'_>)> = tensors
            .iter()
            .map(|(n, b, s)| (n.as_str(), TensorView::new(Dtype::F16, s.clone(), b).unwrap()))
            .collect();
        let bytes = safetensors::serialize(views, None).unwrap();
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_round_trip_through_hf_layout() {
        let dir    = tempfile::tempdir().unwrap();
        let device = Default::default();
        let source = tiny_config().init::<TB>(&device);

        let path = dir.path().join("model.safetensors");
        write_safetensors(&path, &export_hf(&source));

        let weights = SafetensorsWeights::open(&[path]).unwrap();
        let loaded  = load_gpt_neox(tiny_config().init::<TB>(&device), &weights, &device).unwrap();

        let ids = Tensor::<TB, 2, Int>::from_ints([[1, 2, 3]], &device);
        let tol = burn::tensor::Tolerance::<f32>::absolute(2e-2);
        loaded
            .forward(ids.clone(), None)
            .into_data()
            .assert_approx_eq::<f32>(&source.forward(ids, None).into_data(), tol);
    }

    #[test]
    fn test_missing_tensor_is_an_error() {
        let dir    = tempfile::tempdir().unwrap();
        let device = Default::default();
        let mut tensors = export_hf(&tiny_config().init::<TB>(&device));
        tensors.retain(|(n, _, _)| n != "embed_out.weight");

        let path = dir.path().join("model.safetensors");
        write_safetensors(&path, &tensors);

        let weights = SafetensorsWeights::open(&[path]).unwrap();
        let err = load_gpt_neox(tiny_config().init::<TB>(&device), &weights, &device)
            .err()
            .unwrap();
        assert!(err.to_string().contains("embed_out.weight"));
    }

    #[test]
    fn test_decodes_bf16() {
        let values = [half::bf16::from_f32(1.5), half::bf16::from_f32(-2.0)];
        let out = decode_f32(Dtype::BF16, bytemuck::cast_slice(&values)).unwrap();
        assert_eq!(out, vec![1.5, -2.0]);
        assert!(decode_f32(Dtype::I64, &[0; 8]).is_err());
    }

    #[test]
    fn test_shards_from_index() {
        let dir  = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.safetensors.index.json");
        std::fs::write(
            &path,
            r#"{"metadata": {}, "weight_map": {
                "a": "model-00002-of-00002.safetensors",
                "b": "model-00001-of-00002.safetensors",
                "c": "model-00001-of-00002.safetensors"
            }}"#,
        )
        .unwrap();

        assert_eq!(
            shards_from_index(&path).unwrap(),
            vec!["model-00001-of-00002.safetensors", "model-00002-of-00002.safetensors"]
        );
    }
}
