// ============================================================
// Layer 6 — Hub Publisher
// ============================================================
// Uploads a trained adapter to a Hugging Face model repository
// through the Hub's REST API, the same way `push_to_hub` does:
//
//   1. stage adapter_config.json, adapter_model.safetensors and
//      README.md in a temporary directory
//   2. POST /api/repos/create                    (409 = exists)
//   3. POST /api/models/{repo}/preupload/{rev}   → lfs | regular
//   4. LFS files: batch API → PUT to storage → verify
//   5. POST /api/models/{repo}/commit/{rev}      (NDJSON body)
//
// Regular files are sent inline (base64) in the commit; LFS
// files are referenced by their sha256 oid.

use anyhow::Context;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use burn::prelude::*;
use reqwest::blocking::{Client, Response};
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use crate::infra::checkpoint::{model_card, write_adapter};
use crate::ml::gpt_neox::GptNeoX;
use crate::ml::lora::LoraSettings;

pub const DEFAULT_ENDPOINT: &str = "https://huggingface.co";
const DEFAULT_REVISION: &str = "main";
const LFS_CONTENT_TYPE: &str = "application/vnd.git-lfs+json";

/// Errors raised while publishing to the Hub
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    #[error("Authentication required: set HUGGINGFACE_WRITE_TOKEN")]
    AuthRequired,

    #[error("Invalid repository ID '{repo_id}': must be 'owner/name'")]
    InvalidRepoId { repo_id: String },

    #[error("Failed to create repository '{repo_id}': {message}")]
    RepoCreationFailed { repo_id: String, message: String },

    #[error("Failed to upload '{path}': {message}")]
    UploadFailed { path: String, message: String },

    #[error("Commit to '{repo_id}' failed: {message}")]
    CommitFailed { repo_id: String, message: String },

    #[error("HTTP error: {message}")]
    Http { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Outcome of a successful push
#[derive(Debug, Clone)]
pub struct PublishResult {
    pub repo_id:    String,
    pub repo_url:   String,
    pub commit_url: Option<String>,
    pub files:      usize,
}

impl fmt::Display for PublishResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} 모델 업로드 완료!", self.repo_id)
    }
}

/// Split `owner/name`, rejecting anything else
pub fn validate_repo_id(repo_id: &str) -> Result<(&str, &str), PublishError> {
    match repo_id.split_once('/') {
        Some((owner, name)) if !owner.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((owner, name))
        }
        _ => Err(PublishError::InvalidRepoId { repo_id: repo_id.to_string() }),
    }
}

// ─── Staged Files ─────────────────────────────────────────────────────────────
/// One file to commit, with its LFS identity
#[derive(Debug, Clone)]
pub struct StagedFile {
    pub path_in_repo: String,
    pub content:      Vec<u8>,
    pub oid:          String,
}

impl StagedFile {
    pub fn new(path_in_repo: impl Into<String>, content: Vec<u8>) -> Self {
        let oid = sha256_hex(&content);
        Self { path_in_repo: path_in_repo.into(), content, oid }
    }

    pub fn read(path: &Path, path_in_repo: impl Into<String>) -> Result<Self, PublishError> {
        Ok(Self::new(path_in_repo, fs::read(path)?))
    }

    /// First 512 bytes, base64, as the preupload endpoint expects
    pub fn sample(&self) -> String {
        BASE64.encode(&self.content[..self.content.len().min(512)])
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// How each file travels in the commit
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadMode {
    Regular,
    Lfs,
}

/// NDJSON commit body: one header line, then one line per file
pub fn commit_payload(summary: &str, files: &[(StagedFile, UploadMode)]) -> String {
    let mut lines = vec![serde_json::json!({
        "key": "header",
        "value": { "summary": summary, "description": "" },
    })];

    for (file, mode) in files {
        lines.push(match mode {
            UploadMode::Regular => serde_json::json!({
                "key": "file",
                "value": {
                    "content":  BASE64.encode(&file.content),
                    "path":     file.path_in_repo,
                    "encoding": "base64",
                },
            }),
            UploadMode::Lfs => serde_json::json!({
                "key": "lfsFile",
                "value": {
                    "path": file.path_in_repo,
                    "algo": "sha256",
                    "oid":  file.oid,
                    "size": file.content.len(),
                },
            }),
        });
    }

    lines
        .iter()
        .map(|l| l.to_string())
        .collect::<Vec<_>>()
        .join("\n")
}

// ─── Wire Types ───────────────────────────────────────────────────────────────
#[derive(Deserialize)]
struct PreuploadResponse {
    files: Vec<PreuploadFile>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct PreuploadFile {
    path:        String,
    upload_mode: String,
}

#[derive(Deserialize)]
struct LfsBatchResponse {
    objects: Vec<LfsObject>,
}

#[derive(Deserialize)]
struct LfsObject {
    oid:     String,
    #[serde(default)]
    actions: Option<LfsActions>,
    #[serde(default)]
    error:   Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct LfsActions {
    upload: Option<LfsAction>,
    verify: Option<LfsAction>,
}

#[derive(Deserialize)]
struct LfsAction {
    href:   String,
    #[serde(default)]
    header: std::collections::HashMap<String, String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CommitResponse {
    #[serde(default)]
    commit_url: Option<String>,
}

// ─── Publisher ────────────────────────────────────────────────────────────────
pub struct HubPublisher {
    client:   Client,
    token:    String,
    endpoint: String,
    revision: String,
}

impl HubPublisher {
    /// A publisher authenticated with a write token.
    /// A missing or empty token is rejected up front.
    pub fn new(token: Option<String>) -> Result<Self, PublishError> {
        let token = token
            .filter(|t| !t.trim().is_empty())
            .ok_or(PublishError::AuthRequired)?;

        let client = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| PublishError::Http { message: format!("Failed to create HTTP client: {e}") })?;

        Ok(Self {
            client,
            token,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            revision: DEFAULT_REVISION.to_string(),
        })
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    /// Stage the adapter in a temporary directory and push it
    pub fn push_adapter<B: Backend>(
        &self,
        model:      &GptNeoX<B>,
        settings:   &LoraSettings,
        base_model: &str,
        repo_id:    &str,
    ) -> anyhow::Result<PublishResult> {
        validate_repo_id(repo_id)?;

        let staging = tempfile::tempdir().context("Cannot create staging directory")?;
        write_adapter(model, settings, base_model, staging.path())?;
        fs::write(staging.path().join("README.md"), model_card(base_model, repo_id))
            .context("Cannot write model card")?;

        Ok(self.upload_folder(repo_id, staging.path())?)
    }

    /// Commit every regular file directly inside `dir` to the repo
    pub fn upload_folder(&self, repo_id: &str, dir: &Path) -> Result<PublishResult, PublishError> {
        validate_repo_id(repo_id)?;

        let mut paths: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| p.is_file())
            .collect();
        paths.sort();

        let files = paths
            .iter()
            .map(|p| {
                let name = p.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
                StagedFile::read(p, name)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let repo_url = self.create_repo(repo_id)?;
        let modes    = self.preupload(repo_id, &files)?;

        let lfs: Vec<&StagedFile> = files
            .iter()
            .zip(&modes)
            .filter(|(_, m)| **m == UploadMode::Lfs)
            .map(|(f, _)| f)
            .collect();
        if !lfs.is_empty() {
            self.upload_lfs(repo_id, &lfs)?;
        }

        let count = files.len();
        let commit_files: Vec<(StagedFile, UploadMode)> = files.into_iter().zip(modes).collect();
        let commit_url = self.commit(repo_id, &commit_files)?;

        tracing::info!("Committed {} files to '{}'", count, repo_url);
        Ok(PublishResult { repo_id: repo_id.to_string(), repo_url, commit_url, files: count })
    }

    // ── Step 2: create ────────────────────────────────────────────────────────
    fn create_repo(&self, repo_id: &str) -> Result<String, PublishError> {
        let (owner, name) = validate_repo_id(repo_id)?;
        let url  = format!("{}/api/repos/create", self.endpoint);
        let body = serde_json::json!({
            "name": name,
            "organization": owner,
            "type": "model",
            "private": false,
        });

        let response = self.send(self.client.post(&url).bearer_auth(&self.token).json(&body))?;
        let status   = response.status();

        if status.is_success() || status.as_u16() == 409 {
            // 409 = already exists
            tracing::debug!("Repository '{}' ready (HTTP {})", repo_id, status);
            Ok(format!("{}/{}", self.endpoint, repo_id))
        } else {
            Err(PublishError::RepoCreationFailed {
                repo_id: repo_id.to_string(),
                message: error_body(response),
            })
        }
    }

    // ── Step 3: preupload ─────────────────────────────────────────────────────
    fn preupload(&self, repo_id: &str, files: &[StagedFile]) -> Result<Vec<UploadMode>, PublishError> {
        let url = format!("{}/api/models/{}/preupload/{}", self.endpoint, repo_id, self.revision);
        let body = serde_json::json!({
            "files": files.iter().map(|f| serde_json::json!({
                "path":   f.path_in_repo,
                "sample": f.sample(),
                "size":   f.content.len(),
            })).collect::<Vec<_>>(),
        });

        let response = self.send(self.client.post(&url).bearer_auth(&self.token).json(&body))?;
        if !response.status().is_success() {
            return Err(PublishError::Http { message: format!("preupload: {}", error_body(response)) });
        }
        let parsed: PreuploadResponse = response
            .json()
            .map_err(|e| PublishError::Http { message: format!("preupload response: {e}") })?;

        Ok(files
            .iter()
            .map(|f| {
                let lfs = parsed
                    .files
                    .iter()
                    .any(|p| p.path == f.path_in_repo && p.upload_mode == "lfs");
                if lfs { UploadMode::Lfs } else { UploadMode::Regular }
            })
            .collect())
    }

    // ── Step 4: LFS ───────────────────────────────────────────────────────────
    fn upload_lfs(&self, repo_id: &str, files: &[&StagedFile]) -> Result<(), PublishError> {
        let url  = format!("{}/{}.git/info/lfs/objects/batch", self.endpoint, repo_id);
        let body = serde_json::json!({
            "operation": "upload",
            "transfers": ["basic"],
            "hash_algo": "sha256",
            "objects": files.iter().map(|f| serde_json::json!({
                "oid":  f.oid,
                "size": f.content.len(),
            })).collect::<Vec<_>>(),
        });

        let response = self.send(
            self.client
                .post(&url)
                .bearer_auth(&self.token)
                .header("Accept", LFS_CONTENT_TYPE)
                .header("Content-Type", LFS_CONTENT_TYPE)
                .body(body.to_string()),
        )?;
        if !response.status().is_success() {
            return Err(PublishError::Http { message: format!("LFS batch: {}", error_body(response)) });
        }
        let batch: LfsBatchResponse = response
            .json()
            .map_err(|e| PublishError::Http { message: format!("LFS batch response: {e}") })?;

        for object in batch.objects {
            let Some(file) = files.iter().find(|f| f.oid == object.oid) else { continue };
            let path = file.path_in_repo.clone();

            if let Some(err) = object.error {
                return Err(PublishError::UploadFailed { path, message: err.to_string() });
            }
            // No actions = the object is already stored
            let Some(actions) = object.actions else {
                tracing::debug!("'{}' already on the LFS server", path);
                continue;
            };

            if let Some(upload) = actions.upload {
                if upload.header.contains_key("chunk_size") {
                    return Err(PublishError::UploadFailed {
                        path,
                        message: "multipart LFS uploads are not supported".into(),
                    });
                }
                let mut request = self.client.put(&upload.href).body(file.content.clone());
                for (k, v) in &upload.header {
                    request = request.header(k, v);
                }
                let response = self.send(request)?;
                if !response.status().is_success() {
                    return Err(PublishError::UploadFailed { path, message: error_body(response) });
                }
                tracing::debug!("Uploaded '{}' ({} bytes) to LFS", path, file.content.len());
            }

            if let Some(verify) = actions.verify {
                let mut request = self
                    .client
                    .post(&verify.href)
                    .bearer_auth(&self.token)
                    .json(&serde_json::json!({ "oid": file.oid, "size": file.content.len() }));
                for (k, v) in &verify.header {
                    request = request.header(k, v);
                }
                let response = self.send(request)?;
                if !response.status().is_success() {
                    return Err(PublishError::UploadFailed {
                        path,
                        message: format!("verify: {}", error_body(response)),
                    });
                }
            }
        }
        Ok(())
    }

    // ── Step 5: commit ────────────────────────────────────────────────────────
    fn commit(&self, repo_id: &str, files: &[(StagedFile, UploadMode)]) -> Result<Option<String>, PublishError> {
        let url = format!("{}/api/models/{}/commit/{}", self.endpoint, repo_id, self.revision);
        let payload = commit_payload("Upload LoRA adapter", files);

        let response = self.send(
            self.client
                .post(&url)
                .bearer_auth(&self.token)
                .header("Content-Type", "application/x-ndjson")
                .body(payload),
        )?;
        if !response.status().is_success() {
            return Err(PublishError::CommitFailed {
                repo_id: repo_id.to_string(),
                message: error_body(response),
            });
        }

        let parsed: CommitResponse = response
            .json()
            .map_err(|e| PublishError::Http { message: format!("commit response: {e}") })?;
        Ok(parsed.commit_url)
    }

    fn send(&self, request: reqwest::blocking::RequestBuilder) -> Result<Response, PublishError> {
        request
            .send()
            .map_err(|e| PublishError::Http { message: e.to_string() })
    }
}

fn error_body(response: Response) -> String {
    let status = response.status();
    let body   = response.text().unwrap_or_default();
    format!("HTTP {status}: {body}")
}

impl fmt::Debug for HubPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubPublisher")
            .field("endpoint", &self.endpoint)
            .field("revision", &self.revision)
            .field("token", &"***")
            .finish()
    }
}

// ─── Unit Tests ───────────────────────────────────────────────────────────────
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repo_id_validation() {
        assert_eq!(validate_repo_id("YoonSeul/LawBot-airflow-test").unwrap(), ("YoonSeul", "LawBot-airflow-test"));
        for bad in ["", "noslash", "/name", "owner/", "a/b/c"] {
            assert!(matches!(validate_repo_id(bad), Err(PublishError::InvalidRepoId { .. })), "{bad}");
        }
    }

    #[test]
    fn test_missing_token_is_auth_error() {
        assert!(matches!(HubPublisher::new(None), Err(PublishError::AuthRequired)));
        assert!(matches!(HubPublisher::new(Some("  ".into())), Err(PublishError::AuthRequired)));
        assert!(HubPublisher::new(Some("hf_x".into())).is_ok());
    }

    #[test]
    fn test_token_is_not_printed() {
        let p = HubPublisher::new(Some("hf_secret".into())).unwrap();
        assert!(!format!("{p:?}").contains("hf_secret"));
    }

    #[test]
    fn test_lfs_oid_is_sha256() {
        let f = StagedFile::new("a.txt", b"hello".to_vec());
        assert_eq!(f.oid, "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824");
        assert_eq!(f.sample(), "aGVsbG8=");
    }

    #[test]
    fn test_sample_is_capped() {
        let f = StagedFile::new("big.bin", vec![0u8; 2000]);
        assert_eq!(BASE64.decode(f.sample()).unwrap().len(), 512);
    }

    #[test]
    fn test_commit_payload_lines() {
        let files = vec![
            (StagedFile::new("README.md", b"hi".to_vec()), UploadMode::Regular),
            (StagedFile::new("adapter_model.safetensors", b"hello".to_vec()), UploadMode::Lfs),
        ];
        let payload = commit_payload("Upload", &files);
        let lines: Vec<serde_json::Value> =
            payload.lines().map(|l| serde_json::from_str(l).unwrap()).collect();

        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["key"], "header");
        assert_eq!(lines[0]["value"]["summary"], "Upload");

        assert_eq!(lines[1]["key"], "file");
        assert_eq!(lines[1]["value"]["content"], "aGk=");
        assert_eq!(lines[1]["value"]["encoding"], "base64");

        assert_eq!(lines[2]["key"], "lfsFile");
        assert_eq!(lines[2]["value"]["path"], "adapter_model.safetensors");
        assert_eq!(lines[2]["value"]["algo"], "sha256");
        assert_eq!(lines[2]["value"]["size"], 5);
    }

    #[test]
    fn test_push_rejects_bad_repo_before_network() {
        let dir = tempfile::tempdir().unwrap();
        let p   = HubPublisher::new(Some("hf_x".into())).unwrap().with_endpoint("http://127.0.0.1:9");
        assert!(matches!(
            p.upload_folder("not-a-repo", dir.path()),
            Err(PublishError::InvalidRepoId { .. })
        ));
    }

    // ─── Local Hub ────────────────────────────────────────────────────────────
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread::{self, JoinHandle};

    /// One request as the server saw it
    #[derive(Debug)]
    struct Seen {
        method:  String,
        path:    String,
        auth:    Option<String>,
        body:    Vec<u8>,
    }

    fn read_request(stream: &TcpStream) -> Seen {
        let mut reader = BufReader::new(stream);
        let mut line   = String::new();
        reader.read_line(&mut line).unwrap();
        let mut parts = line.split_whitespace();
        let method    = parts.next().unwrap().to_string();
        let path      = parts.next().unwrap().to_string();

        let mut auth = None;
        let mut len  = 0usize;
        loop {
            let mut header = String::new();
            reader.read_line(&mut header).unwrap();
            let header = header.trim_end();
            if header.is_empty() {
                break;
            }
            if let Some((k, v)) = header.split_once(':') {
                match k.trim().to_ascii_lowercase().as_str() {
                    "content-length" => len = v.trim().parse().unwrap(),
                    "authorization"  => auth = Some(v.trim().to_string()),
                    _ => {}
                }
            }
        }

        let mut body = vec![0u8; len];
        reader.read_exact(&mut body).unwrap();
        Seen { method, path, auth, body }
    }

    /// Serve exactly `n` requests, one connection each, answering with
    /// `route(request, base_url)`. Returns the base URL and the log.
    fn serve<F>(n: usize, route: F) -> (String, JoinHandle<Vec<Seen>>)
    where
        F: Fn(&Seen, &str) -> (u16, String) + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let base     = format!("http://{}", listener.local_addr().unwrap());
        let url      = base.clone();

        let handle = thread::spawn(move || {
            let mut seen = Vec::new();
            for stream in listener.incoming().take(n) {
                let mut stream     = stream.unwrap();
                let request        = read_request(&stream);
                let (status, body) = route(&request, &url);
                write!(
                    stream,
                    "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\n\
                     Content-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                )
                .unwrap();
                stream.flush().unwrap();
                seen.push(request);
            }
            seen
        });
        (base, handle)
    }

    const WEIGHTS: &[u8] = b"safetensors-bytes";

    fn staged_adapter() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("README.md"), b"card").unwrap();
        fs::write(dir.path().join("adapter_model.safetensors"), WEIGHTS).unwrap();
        dir
    }

    /// A Hub where the repo already exists and the weights go through LFS
    fn hub_route(commit_status: u16) -> impl Fn(&Seen, &str) -> (u16, String) + Send + 'static {
        move |req, base| match (req.method.as_str(), req.path.as_str()) {
            ("POST", "/api/repos/create") => (409, r#"{"error":"You already created this model repo"}"#.into()),
            ("POST", "/api/models/owner/adapter/preupload/main") => (200, serde_json::json!({
                "files": [
                    {"path": "README.md", "uploadMode": "regular"},
                    {"path": "adapter_model.safetensors", "uploadMode": "lfs"},
                ]
            }).to_string()),
            ("POST", "/owner/adapter.git/info/lfs/objects/batch") => (200, serde_json::json!({
                "objects": [{
                    "oid": sha256_hex(WEIGHTS),
                    "size": WEIGHTS.len(),
                    "actions": {
                        "upload": {"href": format!("{base}/lfs/upload")},
                        "verify": {"href": format!("{base}/lfs/verify")},
                    },
                }]
            }).to_string()),
            ("PUT", "/lfs/upload") | ("POST", "/lfs/verify") => (200, "{}".into()),
            ("POST", "/api/models/owner/adapter/commit/main") if commit_status == 200 => {
                (200, format!(r#"{{"commitUrl":"{base}/owner/adapter/commit/abc"}}"#))
            }
            ("POST", "/api/models/owner/adapter/commit/main") => (commit_status, r#"{"error":"boom"}"#.into()),
            _ => (404, "{}".into()),
        }
    }

    #[test]
    fn test_upload_folder_runs_the_full_exchange() {
        let (base, server) = serve(6, hub_route(200));
        let dir            = staged_adapter();
        let publisher      = HubPublisher::new(Some("hf_write".into())).unwrap().with_endpoint(&base);

        let result = publisher.upload_folder("owner/adapter", dir.path()).unwrap();
        let seen   = server.join().unwrap();

        assert_eq!(result.files, 2);
        assert_eq!(result.repo_url, format!("{base}/owner/adapter"));
        assert_eq!(result.commit_url.as_deref(), Some(format!("{base}/owner/adapter/commit/abc").as_str()));
        assert_eq!(result.to_string(), "owner/adapter 모델 업로드 완료!");

        let order: Vec<(&str, &str)> = seen.iter().map(|r| (r.method.as_str(), r.path.as_str())).collect();
        assert_eq!(order, vec![
            ("POST", "/api/repos/create"),
            ("POST", "/api/models/owner/adapter/preupload/main"),
            ("POST", "/owner/adapter.git/info/lfs/objects/batch"),
            ("PUT",  "/lfs/upload"),
            ("POST", "/lfs/verify"),
            ("POST", "/api/models/owner/adapter/commit/main"),
        ]);
        assert_eq!(seen[0].auth.as_deref(), Some("Bearer hf_write"));

        let create: serde_json::Value = serde_json::from_slice(&seen[0].body).unwrap();
        assert_eq!(create["name"], "adapter");
        assert_eq!(create["organization"], "owner");

        // Raw bytes go to storage; the commit only references them
        assert_eq!(seen[3].body, WEIGHTS);

        let commit = String::from_utf8(seen[5].body.clone()).unwrap();
        let lines: Vec<serde_json::Value> =
            commit.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0]["key"], "header");
        assert_eq!(lines[1]["key"], "file");
        assert_eq!(lines[1]["value"]["path"], "README.md");
        assert_eq!(lines[1]["value"]["content"], BASE64.encode(b"card"));
        assert_eq!(lines[2]["key"], "lfsFile");
        assert_eq!(lines[2]["value"]["path"], "adapter_model.safetensors");
        assert_eq!(lines[2]["value"]["oid"], sha256_hex(WEIGHTS));
        assert_eq!(lines[2]["value"]["size"], WEIGHTS.len());
    }

    #[test]
    fn test_rejected_commit_is_commit_failed() {
        let (base, server) = serve(6, hub_route(500));
        let dir            = staged_adapter();
        let publisher      = HubPublisher::new(Some("hf_write".into())).unwrap().with_endpoint(&base);

        let err = publisher.upload_folder("owner/adapter", dir.path()).unwrap_err();
        server.join().unwrap();
        match err {
            PublishError::CommitFailed { repo_id, message } => {
                assert_eq!(repo_id, "owner/adapter");
                assert!(message.contains("500"), "{message}");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_forbidden_create_stops_before_upload() {
        let (base, server) = serve(1, |_, _| (403, r#"{"error":"no write access"}"#.into()));
        let dir            = staged_adapter();
        let publisher      = HubPublisher::new(Some("hf_read".into())).unwrap().with_endpoint(&base);

        let err  = publisher.upload_folder("owner/adapter", dir.path()).unwrap_err();
        let seen = server.join().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(matches!(err, PublishError::RepoCreationFailed { .. }));
    }

    #[test]
    fn test_multipart_request_is_refused() {
        let (base, server) = serve(3, |req, base| match req.path.as_str() {
            "/api/repos/create" => (200, "{}".into()),
            "/api/models/owner/adapter/preupload/main" => (200, serde_json::json!({
                "files": [{"path": "adapter_model.safetensors", "uploadMode": "lfs"}]
            }).to_string()),
            _ => (200, serde_json::json!({
                "objects": [{
                    "oid": sha256_hex(WEIGHTS),
                    "actions": {"upload": {
                        "href": format!("{base}/multipart"),
                        "header": {"chunk_size": "5242880"},
                    }},
                }]
            }).to_string()),
        });
        let dir       = staged_adapter();
        let publisher = HubPublisher::new(Some("hf_write".into())).unwrap().with_endpoint(&base);

        let err = publisher.upload_folder("owner/adapter", dir.path()).unwrap_err();
        server.join().unwrap();
        assert!(matches!(err, PublishError::UploadFailed { ref path, .. } if path == "adapter_model.safetensors"));
    }
}
