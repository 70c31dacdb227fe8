// ============================================================
// Layer 6 — Environment and Credentials
// ============================================================
// Loads a local `.env` file (if any) into the process
// environment and reads the Hub write token from it.
//
// Variables already set in the environment win over `.env`.

use std::path::{Path, PathBuf};

/// Name of the write-scoped Hugging Face token variable
pub const WRITE_TOKEN_VAR: &str = "HUGGINGFACE_WRITE_TOKEN";

/// Load `.env` from the working directory or its parents.
/// Returns the file that was loaded, if one was found.
pub fn load_dotenv() -> Option<PathBuf> {
    match dotenvy::dotenv() {
        Ok(path) => {
            tracing::debug!("Loaded environment from '{}'", path.display());
            Some(path)
        }
        Err(e) if e.not_found() => None,
        Err(e) => {
            tracing::warn!("Ignoring unreadable .env file: {e}");
            None
        }
    }
}

/// Load a specific env file
pub fn load_env_file(path: &Path) -> anyhow::Result<()> {
    dotenvy::from_path(path)
        .map_err(|e| anyhow::anyhow!("Cannot load env file '{}': {e}", path.display()))
}

/// The write token, if set and non-empty
pub fn write_token() -> Option<String> {
    std::env::var(WRITE_TOKEN_VAR)
        .ok()
        .filter(|t| !t.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_env_file_sets_token() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "{WRITE_TOKEN_VAR}=hf_from_file").unwrap();

        // Only this test touches the variable
        std::env::remove_var(WRITE_TOKEN_VAR);
        load_env_file(f.path()).unwrap();
        assert_eq!(write_token().as_deref(), Some("hf_from_file"));
        std::env::remove_var(WRITE_TOKEN_VAR);
    }

    #[test]
    fn test_missing_env_file() {
        assert!(load_env_file(Path::new("/no/such/.env")).is_err());
    }
}
