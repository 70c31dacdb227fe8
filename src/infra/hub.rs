// ============================================================
// Layer 6 — Hub Download
// ============================================================
// Resolves a model identifier to the three things the builder
// needs: config.json, tokenizer.json and the safetensors weights.
//
// An identifier that names an existing local directory is read
// from disk. Anything else is fetched from the Hugging Face Hub
// through hf-hub's blocking API, which caches files under
// ~/.cache/huggingface like the Python tooling does.
//
// Sharded checkpoints are detected through
// model.safetensors.index.json; otherwise a single
// model.safetensors is expected.

use anyhow::{Context, Result};
use hf_hub::{
    api::sync::{Api, ApiBuilder, ApiRepo},
    Repo, RepoType,
};
use std::path::{Path, PathBuf};

use crate::ml::weights::shards_from_index;

pub const CONFIG_FILE:    &str = "config.json";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const WEIGHTS_FILE:   &str = "model.safetensors";
pub const WEIGHTS_INDEX:  &str = "model.safetensors.index.json";

/// Local paths of a resolved model
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelFiles {
    pub config:    PathBuf,
    pub tokenizer: PathBuf,
    pub weights:   Vec<PathBuf>,
}

impl ModelFiles {
    /// Files from a local checkpoint directory
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let require = |name: &str| -> Result<PathBuf> {
            let path = dir.join(name);
            anyhow::ensure!(path.is_file(), "'{}' not found", path.display());
            Ok(path)
        };

        let index = dir.join(WEIGHTS_INDEX);
        let weights = if index.is_file() {
            shards_from_index(&index)?
                .iter()
                .map(|f| require(f))
                .collect::<Result<Vec<_>>>()?
        } else {
            vec![require(WEIGHTS_FILE)?]
        };

        Ok(Self {
            config:    require(CONFIG_FILE)?,
            tokenizer: require(TOKENIZER_FILE)?,
            weights,
        })
    }
}

/// Thin wrapper over hf-hub's blocking client
pub struct HubClient {
    token: Option<String>,
}

impl HubClient {
    pub fn new(token: Option<String>) -> Self {
        Self { token }
    }

    fn api(&self) -> Result<Api> {
        let mut builder = ApiBuilder::new().with_progress(true);
        if let Some(token) = &self.token {
            builder = builder.with_token(Some(token.clone()));
        }
        builder.build().context("Failed to initialise the Hugging Face client")
    }

    /// Resolve `model_id` (local directory or Hub repo) to local files
    pub fn fetch_model(&self, model_id: &str, revision: Option<&str>) -> Result<ModelFiles> {
        let local = Path::new(model_id);
        if local.is_dir() {
            tracing::info!("Loading model from local directory '{}'", local.display());
            return ModelFiles::from_dir(local);
        }

        let api  = self.api()?;
        let repo = match revision {
            Some(rev) => api.repo(Repo::with_revision(model_id.to_string(), RepoType::Model, rev.to_string())),
            None      => api.model(model_id.to_string()),
        };
        tracing::info!("Resolving '{}' on the Hugging Face Hub", model_id);

        let get = |repo: &ApiRepo, file: &str| {
            repo.get(file)
                .with_context(|| format!("Cannot download '{file}' from '{model_id}'"))
        };

        let config    = get(&repo, CONFIG_FILE)?;
        let tokenizer = get(&repo, TOKENIZER_FILE)?;

        let weights = match repo.get(WEIGHTS_INDEX) {
            Ok(index) => {
                let shards = shards_from_index(&index)?;
                tracing::info!("Checkpoint is sharded into {} files", shards.len());
                shards
                    .iter()
                    .map(|f| get(&repo, f))
                    .collect::<Result<Vec<_>>>()?
            }
            Err(e) => {
                tracing::debug!("No shard index ({e}), trying a single weights file");
                vec![get(&repo, WEIGHTS_FILE)?]
            }
        };

        Ok(ModelFiles { config, tokenizer, weights })
    }
}
