use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Response};
use serde_json::Value;
use tracing::{debug, info};

use crate::credentials::ApiKey;
use crate::engine::{DocumentParser, ParseError, ParseInput, ParseOutput, Stage};

use super::wire::{AssetRequest, AssetSlot, ChatRequest};

pub const DEFAULT_ASSETS_URL: &str = "https://api.nvcf.nvidia.com/v2/nvcf/assets";
pub const DEFAULT_INVOKE_URL: &str = "https://integrate.api.nvidia.com/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "nvidia/nemoretriever-parse";
pub const BBOX_TOOL: &str = "markdown_bbox";

const IMAGE_CONTENT_TYPE: &str = "image/jpeg";
const ASSET_DESCRIPTION_HEADER: &str = "x-amz-meta-nvcf-asset-description";
const ASSET_REFERENCES_HEADER: &str = "NVCF-INPUT-ASSET-REFERENCES";
const FUNCTION_ASSET_IDS_HEADER: &str = "NVCF-FUNCTION-ASSET-IDS";

/// Endpoints, model and timeouts used by [`NemoRetrieverClient`].
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub assets_url: String,
    pub invoke_url: String,
    pub model: String,
    /// Stored with each uploaded asset.
    pub description: String,
    pub register_timeout: Duration,
    pub upload_timeout: Duration,
    pub invoke_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            assets_url: DEFAULT_ASSETS_URL.to_string(),
            invoke_url: DEFAULT_INVOKE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            description: "Document image".to_string(),
            register_timeout: Duration::from_secs(30),
            upload_timeout: Duration::from_secs(300),
            invoke_timeout: Duration::from_secs(300),
        }
    }
}

/// Talks to NeMo Retriever Parse: uploads an image as an NVCF asset, then
/// asks the model for its `markdown_bbox` tool call on that asset.
pub struct NemoRetrieverClient {
    client: Client,
    options: ClientOptions,
}

impl NemoRetrieverClient {
    pub fn new(options: ClientOptions) -> Result<Self, ParseError> {
        let client = Client::builder().build().map_err(ParseError::Client)?;

        info!(
            "NeMo Retriever client configured: model={}, invoke_url={}",
            options.model, options.invoke_url
        );

        Ok(Self { client, options })
    }

    pub fn options(&self) -> &ClientOptions {
        &self.options
    }

    /// Registers an asset slot and uploads `image` into it. Returns the asset id.
    pub async fn upload_asset(
        &self,
        image: Vec<u8>,
        description: &str,
        api_key: &ApiKey,
    ) -> Result<String, ParseError> {
        if api_key.is_empty() {
            return Err(ParseError::InvalidInput("API key is empty".to_string()));
        }

        let response = self
            .client
            .post(&self.options.assets_url)
            .header(AUTHORIZATION, api_key.bearer())
            .header(ACCEPT, "application/json")
            .json(&AssetRequest {
                content_type: IMAGE_CONTENT_TYPE,
                description,
            })
            .timeout(self.options.register_timeout)
            .send()
            .await
            .map_err(|source| ParseError::Transport {
                stage: Stage::RegisterAsset,
                source,
            })?;

        let slot: AssetSlot = check_status(Stage::RegisterAsset, response)
            .await?
            .json()
            .await
            .map_err(|e| ParseError::InvalidBody {
                stage: Stage::RegisterAsset,
                reason: e.to_string(),
            })?;
        let asset_id = slot.asset_id.into_string()?;
        debug!("Registered asset {} ({} bytes)", asset_id, image.len());

        // The presigned URL carries its own authorization.
        let response = self
            .client
            .put(&slot.upload_url)
            .header(ASSET_DESCRIPTION_HEADER, description)
            .header(CONTENT_TYPE, IMAGE_CONTENT_TYPE)
            .body(image)
            .timeout(self.options.upload_timeout)
            .send()
            .await
            .map_err(|source| ParseError::Transport {
                stage: Stage::UploadAsset,
                source,
            })?;
        check_status(Stage::UploadAsset, response).await?;

        Ok(asset_id)
    }

    /// Runs the parse model against an uploaded asset and returns the raw JSON body.
    pub async fn invoke(&self, asset_id: &str, api_key: &ApiKey) -> Result<Value, ParseError> {
        let request = ChatRequest::for_asset(&self.options.model, BBOX_TOOL, asset_id);

        debug!("Invoking {} for asset {}", self.options.model, asset_id);
        let response = self
            .client
            .post(&self.options.invoke_url)
            .header(AUTHORIZATION, api_key.bearer())
            .header(ACCEPT, "application/json")
            .header(CONTENT_TYPE, "application/json")
            .header(ASSET_REFERENCES_HEADER, asset_id)
            .header(FUNCTION_ASSET_IDS_HEADER, asset_id)
            .json(&request)
            .timeout(self.options.invoke_timeout)
            .send()
            .await
            .map_err(|source| ParseError::Transport {
                stage: Stage::Invoke,
                source,
            })?;

        check_status(Stage::Invoke, response)
            .await?
            .json()
            .await
            .map_err(|e| ParseError::InvalidBody {
                stage: Stage::Invoke,
                reason: e.to_string(),
            })
    }
}

#[async_trait]
impl DocumentParser for NemoRetrieverClient {
    async fn parse(&self, input: &ParseInput, api_key: &ApiKey) -> Result<ParseOutput, ParseError> {
        let image = input.read_bytes().await?;
        let asset_id = self
            .upload_asset(image, &self.options.description, api_key)
            .await?;
        let response = self.invoke(&asset_id, api_key).await?;
        Ok(ParseOutput::new(response))
    }
}

async fn check_status(stage: Stage, response: Response) -> Result<Response, ParseError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let body = response.text().await.unwrap_or_default();
    Err(ParseError::Http {
        stage,
        status: status.as_u16(),
        body,
    })
}
