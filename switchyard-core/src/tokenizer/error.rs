use thiserror::Error;

/// Failures inside a tokenizer backend
///
/// These never reach callers of the service: it logs them and degrades to
/// the fallback tokenizer.
#[derive(Error, Debug)]
pub enum TokenizerError {
    #[error("Tokenizer initialization failed: {0}")]
    Init(String),

    #[error("Failed to download {url}: {message}")]
    Download { url: String, message: String },

    #[error("Tokenizer cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Encoding failed: {0}")]
    Encode(String),

    #[error("Tokenizer API request failed: {0}")]
    Api(String),

    #[error("Tokenizer request timed out after {0}ms")]
    Timeout(u64),

    #[error("Invalid response from API tokenizer: {0}")]
    InvalidResponse(String),

    #[error("Tokenizer not initialized")]
    NotInitialized,
}

impl From<reqwest::Error> for TokenizerError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TokenizerError::Timeout(0)
        } else {
            TokenizerError::Api(err.to_string())
        }
    }
}
