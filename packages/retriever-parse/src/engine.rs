use std::fmt;
use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::credentials::ApiKey;
use crate::region::AnnotatedRegion;
use crate::response::{extract_usage, regions_or_empty};

#[derive(Debug, Clone)]
pub enum ParseInput {
    FilePath(PathBuf),
    Bytes(Vec<u8>),
}

impl ParseInput {
    /// Loads the image bytes, reading from disk for `FilePath`.
    pub async fn read_bytes(&self) -> Result<Vec<u8>, ParseError> {
        match self {
            ParseInput::FilePath(path) => {
                tokio::fs::read(path).await.map_err(|source| ParseError::Io {
                    path: path.clone(),
                    source,
                })
            }
            ParseInput::Bytes(data) => Ok(data.clone()),
        }
    }
}

/// Token counters reported under `usage` in a chat-completion response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl std::ops::AddAssign for TokenUsage {
    fn add_assign(&mut self, rhs: Self) {
        self.prompt_tokens += rhs.prompt_tokens;
        self.completion_tokens += rhs.completion_tokens;
        self.total_tokens += rhs.total_tokens;
    }
}

/// Raw response body from one successful parse call.
#[derive(Debug, Clone)]
pub struct ParseOutput {
    pub response: Value,
}

impl ParseOutput {
    pub fn new(response: Value) -> Self {
        Self { response }
    }

    /// Regions in the response; empty if the body is malformed.
    pub fn regions(&self) -> Vec<AnnotatedRegion> {
        regions_or_empty(&self.response)
    }

    pub fn usage(&self) -> TokenUsage {
        extract_usage(&self.response)
    }
}

/// Which remote call a failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    RegisterAsset,
    UploadAsset,
    Invoke,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::RegisterAsset => "asset registration",
            Stage::UploadAsset => "asset upload",
            Stage::Invoke => "parse invocation",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{stage} request failed: {source}")]
    Transport {
        stage: Stage,
        #[source]
        source: reqwest::Error,
    },
    #[error("{stage} returned HTTP {status}: {body}")]
    Http {
        stage: Stage,
        status: u16,
        body: String,
    },
    #[error("{stage} returned an invalid body: {reason}")]
    InvalidBody { stage: Stage, reason: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl ParseError {
    /// True for 401/403 responses, which will not succeed on retry with the same key.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, ParseError::Http { status: 401 | 403, .. })
    }
}

/// A remote service that turns one document image into a structured response.
#[async_trait]
pub trait DocumentParser: Send + Sync {
    async fn parse(&self, input: &ParseInput, api_key: &ApiKey) -> Result<ParseOutput, ParseError>;
}
