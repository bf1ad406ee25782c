//! Cached tokenizer instances with a tiktoken fallback

use super::{
    ApiTokenizer, HuggingFaceTokenizer, TiktokenTokenizer, Tokenizer, TokenizerError,
    TokenizerResult, DEFAULT_ENCODING,
};
use crate::config::{TokenizerConfig, TokenizerServiceConfig};
use crate::protocol::TokenizeRequest;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{error, info, warn};

/// Hands out tokenizers by configuration, caching each initialized instance
///
/// Initialization failures never reach callers: they are logged and the
/// shared fallback is returned instead.
pub struct TokenizerService {
    settings: TokenizerServiceConfig,
    tokenizers: RwLock<HashMap<String, Arc<dyn Tokenizer>>>,
    fallback: Arc<dyn Tokenizer>,
}

impl TokenizerService {
    pub fn new(settings: TokenizerServiceConfig) -> Result<Self, TokenizerError> {
        let fallback: Arc<dyn Tokenizer> = Arc::new(TiktokenTokenizer::new(DEFAULT_ENCODING)?);
        info!("TokenizerService initialized with fallback {}", fallback.name());
        Ok(Self {
            settings,
            tokenizers: RwLock::new(HashMap::new()),
            fallback,
        })
    }

    /// The shared tiktoken instance used when nothing else is available
    pub fn fallback(&self) -> Arc<dyn Tokenizer> {
        Arc::clone(&self.fallback)
    }

    /// Cache key identifying one tokenizer instance
    pub fn cache_key(config: &TokenizerConfig) -> String {
        match config {
            TokenizerConfig::Tiktoken { encoding } => {
                format!("tiktoken:{}", encoding.as_deref().unwrap_or(DEFAULT_ENCODING))
            }
            TokenizerConfig::Huggingface { model } => format!("hf:{}", model),
            TokenizerConfig::Api { url, .. } => format!("api:{}", url.as_deref().unwrap_or("")),
        }
    }

    /// Tokenizer for `config`, initializing and caching it on first use
    pub async fn get_tokenizer(&self, config: &TokenizerConfig) -> Arc<dyn Tokenizer> {
        let key = Self::cache_key(config);
        if let Some(tokenizer) = self.tokenizers.read().await.get(&key) {
            return Arc::clone(tokenizer);
        }

        // Built outside the lock; a concurrent winner keeps its instance
        match self.build(config).await {
            Ok(tokenizer) => {
                info!("Tokenizer initialized successfully: {} ({})", tokenizer.name(), key);
                let mut cache = self.tokenizers.write().await;
                Arc::clone(cache.entry(key).or_insert(tokenizer))
            }
            Err(e) => {
                error!("Failed to initialize tokenizer {}: {}", key, e);
                self.fallback()
            }
        }
    }

    /// Count tokens with the configured tokenizer, or the fallback when none
    pub async fn count_tokens(
        &self,
        request: &TokenizeRequest,
        config: Option<&TokenizerConfig>,
    ) -> TokenizerResult {
        let tokenizer = match config {
            Some(config) => self.get_tokenizer(config).await,
            None => self.fallback(),
        };

        let (count, used) = match tokenizer.count_tokens(request).await {
            Ok(count) => (count, tokenizer.name().to_string()),
            Err(e) => {
                warn!(
                    "Tokenizer {} failed to count, using fallback: {}",
                    tokenizer.name(),
                    e
                );
                let count = self.fallback.count_tokens(request).await.unwrap_or_else(|e| {
                    error!("Fallback tokenizer failed: {}", e);
                    0
                });
                (count, self.fallback.name().to_string())
            }
        };

        TokenizerResult {
            token_count: count,
            tokenizer_used: used,
            cached: false,
        }
    }

    /// Number of cached instances, excluding the fallback
    pub async fn cached_count(&self) -> usize {
        self.tokenizers.read().await.len()
    }

    /// Release every cached instance
    pub async fn dispose(&self) {
        let mut cache = self.tokenizers.write().await;
        for tokenizer in cache.values() {
            tokenizer.dispose();
        }
        cache.clear();
    }

    async fn build(&self, config: &TokenizerConfig) -> Result<Arc<dyn Tokenizer>, TokenizerError> {
        let timeout = Duration::from_millis(self.settings.timeout_ms);
        let tokenizer: Arc<dyn Tokenizer> = match config {
            TokenizerConfig::Tiktoken { encoding } => {
                let mut t = TiktokenTokenizer::new(encoding.as_deref().unwrap_or(DEFAULT_ENCODING))?;
                t.initialize().await?;
                Arc::new(t)
            }
            TokenizerConfig::Huggingface { model } => {
                info!("Initializing HuggingFace tokenizer for model: {}", model);
                let mut t = HuggingFaceTokenizer::new(model, self.cache_root())
                    .with_hub_endpoint(&self.settings.hub_endpoint)
                    .with_timeout(timeout);
                t.initialize().await?;
                Arc::new(t)
            }
            TokenizerConfig::Api {
                url,
                api_key,
                request_format,
                response_field,
                headers,
                timeout_ms,
            } => {
                let mut t = ApiTokenizer::new(
                    url.as_deref(),
                    api_key.as_ref(),
                    *request_format,
                    response_field.as_deref(),
                    headers.clone(),
                )?
                .with_timeout(timeout_ms.map(Duration::from_millis).unwrap_or(timeout));
                t.initialize().await?;
                Arc::new(t)
            }
        };
        Ok(tokenizer)
    }

    fn cache_root(&self) -> PathBuf {
        self.settings.cache_dir.clone().unwrap_or_else(|| {
            dirs::home_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join(".switchyard")
                .join(".huggingface")
        })
    }
}

impl std::fmt::Debug for TokenizerService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenizerService")
            .field("settings", &self.settings)
            .field("fallback", &self.fallback.name())
            .finish()
    }
}
