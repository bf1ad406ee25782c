//! HuggingFace `tokenizer.json` models fetched from the hub and cached on disk

use super::{request_segments, Tokenizer, TokenizerError};
use crate::protocol::TokenizeRequest;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;
use tokio::fs;
use tracing::{debug, info, warn};

const TOKENIZER_FILE: &str = "tokenizer.json";
const TOKENIZER_CONFIG_FILE: &str = "tokenizer_config.json";

pub struct HuggingFaceTokenizer {
    model_id: String,
    name: String,
    model_dir: PathBuf,
    hub_endpoint: String,
    timeout: Duration,
    tokenizer: RwLock<Option<tokenizers::Tokenizer>>,
}

impl HuggingFaceTokenizer {
    /// Tokenizer for `model_id`, cached under `cache_root/<safe model name>`
    pub fn new(model_id: impl Into<String>, cache_root: impl AsRef<Path>) -> Self {
        let model_id = model_id.into();
        let short = model_id.rsplit('/').next().unwrap_or(&model_id);
        Self {
            name: format!("huggingface-{}", short),
            model_dir: cache_root.as_ref().join(safe_model_name(&model_id)),
            model_id,
            hub_endpoint: "https://huggingface.co".to_string(),
            timeout: Duration::from_secs(30),
            tokenizer: RwLock::new(None),
        }
    }

    pub fn with_hub_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.hub_endpoint = endpoint.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model_dir(&self) -> &Path {
        &self.model_dir
    }

    async fn load_from_cache(&self) -> Option<Vec<u8>> {
        let path = self.model_dir.join(TOKENIZER_FILE);
        match fs::read(&path).await {
            Ok(bytes) => {
                debug!("Loaded cached tokenizer from {}", path.display());
                Some(bytes)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!("Failed to read cached tokenizer {}: {}", path.display(), e);
                None
            }
        }
    }

    async fn download_and_cache(&self) -> Result<Vec<u8>, TokenizerError> {
        info!("Downloading tokenizer files for {}", self.model_id);

        let client = reqwest::Client::builder()
            .timeout(self.timeout)
            .build()
            .map_err(|e| TokenizerError::Init(e.to_string()))?;

        let json_url = self.file_url(TOKENIZER_FILE);
        let config_url = self.file_url(TOKENIZER_CONFIG_FILE);
        let (json_res, config_res) =
            tokio::join!(client.get(&json_url).send(), client.get(&config_url).send());

        let json_res = json_res.map_err(|e| download_error(&json_url, e))?;
        if !json_res.status().is_success() {
            return Err(TokenizerError::Download {
                url: json_url,
                message: format!("HTTP {}", json_res.status()),
            });
        }
        let tokenizer_json = json_res
            .bytes()
            .await
            .map_err(|e| download_error(&json_url, e))?;

        // The config file is optional; an empty object stands in when absent
        let tokenizer_config = match config_res {
            Ok(res) if res.status().is_success() => res.bytes().await.ok(),
            _ => None,
        }
        .map(|b| b.to_vec())
        .unwrap_or_else(|| b"{}".to_vec());

        fs::create_dir_all(&self.model_dir).await?;
        fs::write(self.model_dir.join(TOKENIZER_FILE), &tokenizer_json).await?;
        fs::write(self.model_dir.join(TOKENIZER_CONFIG_FILE), &tokenizer_config).await?;

        Ok(tokenizer_json.to_vec())
    }

    fn file_url(&self, file: &str) -> String {
        format!("{}/{}/resolve/main/{}", self.hub_endpoint, self.model_id, file)
    }

    fn encode_len(&self, text: &str) -> Result<usize, TokenizerError> {
        let guard = self.tokenizer.read().unwrap_or_else(PoisonError::into_inner);
        let tokenizer = guard.as_ref().ok_or(TokenizerError::NotInitialized)?;
        tokenizer
            .encode(text, false)
            .map(|encoding| encoding.get_ids().len())
            .map_err(|e| TokenizerError::Encode(e.to_string()))
    }
}

impl std::fmt::Debug for HuggingFaceTokenizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HuggingFaceTokenizer")
            .field("model_id", &self.model_id)
            .field("model_dir", &self.model_dir)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

#[async_trait]
impl Tokenizer for HuggingFaceTokenizer {
    fn kind(&self) -> &'static str {
        "huggingface"
    }

    fn name(&self) -> &str {
        &self.name
    }

    async fn initialize(&mut self) -> Result<(), TokenizerError> {
        if self.is_initialized() {
            return Ok(());
        }
        info!("Initializing HuggingFace tokenizer: {}", self.model_id);

        let bytes = match self.load_from_cache().await {
            Some(bytes) => bytes,
            None => self.download_and_cache().await?,
        };

        let tokenizer = tokenizers::Tokenizer::from_bytes(&bytes).map_err(|e| {
            TokenizerError::Init(format!(
                "Failed to initialize HuggingFace tokenizer for {}: {}",
                self.model_id, e
            ))
        })?;

        *self
            .tokenizer
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(tokenizer);
        info!("Tokenizer initialized: {}", self.name);
        Ok(())
    }

    async fn count_tokens(&self, request: &TokenizeRequest) -> Result<usize, TokenizerError> {
        let text = request_segments(request).join(" ");
        self.encode_len(&text)
    }

    fn encode_text(&self, text: &str) -> Option<Vec<u32>> {
        let guard = self.tokenizer.read().unwrap_or_else(PoisonError::into_inner);
        let encoding = guard.as_ref()?.encode(text, false).ok()?;
        Some(encoding.get_ids().to_vec())
    }

    fn is_initialized(&self) -> bool {
        self.tokenizer
            .read()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    fn dispose(&self) {
        self.tokenizer
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

/// Filesystem-safe directory name for a model id
pub(crate) fn safe_model_name(model_id: &str) -> String {
    model_id
        .replace('/', "_")
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn download_error(url: &str, err: reqwest::Error) -> TokenizerError {
    TokenizerError::Download {
        url: url.to_string(),
        message: err.to_string(),
    }
}
