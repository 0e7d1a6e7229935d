//! Request and response bodies for the NVCF asset and chat-completion endpoints.

use serde::{Deserialize, Serialize};

use crate::engine::{ParseError, Stage};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AssetRequest<'a> {
    pub content_type: &'a str,
    pub description: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct AssetSlot {
    pub upload_url: String,
    pub asset_id: AssetId,
}

/// The service has been seen to send asset ids both as strings and as numbers.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub(crate) enum AssetId {
    Text(String),
    Number(serde_json::Number),
}

impl AssetId {
    pub fn into_string(self) -> Result<String, ParseError> {
        let id = match self {
            AssetId::Text(id) => id,
            AssetId::Number(id) => id.to_string(),
        };
        if id.is_empty() {
            return Err(ParseError::InvalidBody {
                stage: Stage::RegisterAsset,
                reason: "empty assetId".to_string(),
            });
        }
        Ok(id)
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatRequest<'a> {
    pub tools: Vec<Tool<'a>>,
    pub model: &'a str,
    pub messages: Vec<ChatMessage>,
}

#[derive(Debug, Serialize)]
pub(crate) struct Tool<'a> {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub function: ToolFunction<'a>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ToolFunction<'a> {
    pub name: &'a str,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatMessage {
    pub role: &'static str,
    pub content: Vec<ContentPart>,
}

#[derive(Debug, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum ContentPart {
    ImageUrl { image_url: ImageUrl },
}

#[derive(Debug, Serialize)]
pub(crate) struct ImageUrl {
    pub url: String,
}

impl<'a> ChatRequest<'a> {
    /// Single user message pointing at an uploaded asset, with the bbox tool enabled.
    pub fn for_asset(model: &'a str, tool_name: &'a str, asset_id: &str) -> Self {
        Self {
            tools: vec![Tool {
                kind: "function",
                function: ToolFunction { name: tool_name },
            }],
            model,
            messages: vec![ChatMessage {
                role: "user",
                content: vec![ContentPart::ImageUrl {
                    image_url: ImageUrl {
                        url: asset_data_url(asset_id),
                    },
                }],
            }],
        }
    }
}

pub(crate) fn asset_data_url(asset_id: &str) -> String {
    format!("data:image/jpeg;asset_id,{}", asset_id)
}
