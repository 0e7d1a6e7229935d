//! Conversion of chat-completion responses into annotated regions.
//!
//! The service returns its detections inside the first tool call, as a JSON
//! *string* whose first element is the list of page elements:
//!
//! ```text
//! choices[0].message.tool_calls[0].function.arguments
//!   = "[[{\"type\": \"Text\", \"text\": \"...\", \"bbox\": {\"xmin\": ..}}, ...]]"
//! ```

use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use crate::engine::TokenUsage;
use crate::region::{AnnotatedRegion, BoundingBox};

#[derive(Debug, Error, PartialEq)]
pub enum ResponseError {
    #[error("missing field `{0}`")]
    Missing(&'static str),
    #[error("`{field}` should be {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
    #[error("tool call arguments are not valid JSON: {0}")]
    InvalidArguments(String),
    #[error("element {index}: {reason}")]
    InvalidElement { index: usize, reason: String },
}

/// Extracts every region from a response, failing on the first problem.
///
/// Regions keep the order the service listed them in. Boxes are converted from
/// corners to `[x, y, width, height]`.
pub fn parse_regions(response: &Value) -> Result<Vec<AnnotatedRegion>, ResponseError> {
    let message = response
        .get("choices")
        .and_then(|choices| choices.get(0))
        .ok_or(ResponseError::Missing("choices[0]"))?
        .get("message")
        .ok_or(ResponseError::Missing("choices[0].message"))?;

    let arguments = message
        .get("tool_calls")
        .and_then(|calls| calls.get(0))
        .ok_or(ResponseError::Missing("message.tool_calls[0]"))?
        .get("function")
        .and_then(|function| function.get("arguments"))
        .ok_or(ResponseError::Missing("tool_calls[0].function.arguments"))?
        .as_str()
        .ok_or(ResponseError::WrongType {
            field: "function.arguments",
            expected: "a JSON-encoded string",
        })?;

    let decoded: Value = serde_json::from_str(arguments)
        .map_err(|e| ResponseError::InvalidArguments(e.to_string()))?;

    let elements = decoded
        .get(0)
        .ok_or(ResponseError::Missing("arguments[0]"))?
        .as_array()
        .ok_or(ResponseError::WrongType {
            field: "arguments[0]",
            expected: "an array of elements",
        })?;

    elements
        .iter()
        .enumerate()
        .map(|(index, element)| {
            parse_element(element).map_err(|reason| ResponseError::InvalidElement { index, reason })
        })
        .collect()
}

/// Best-effort variant of [`parse_regions`]: a malformed response is logged
/// and yields no regions.
pub fn regions_or_empty(response: &Value) -> Vec<AnnotatedRegion> {
    match parse_regions(response) {
        Ok(regions) => regions,
        Err(e) => {
            warn!("Error parsing response: {}", e);
            Vec::new()
        }
    }
}

/// Reads the `usage` counters, treating anything absent or non-integer as 0.
pub fn extract_usage(response: &Value) -> TokenUsage {
    let usage = response.get("usage");
    let counter = |name: &str| usage.and_then(|u| u.get(name)).and_then(token_count).unwrap_or(0);

    TokenUsage {
        prompt_tokens: counter("prompt_tokens"),
        completion_tokens: counter("completion_tokens"),
        total_tokens: counter("total_tokens"),
    }
}

/// Non-negative integers, including whole-number floats such as `12.0`.
fn token_count(value: &Value) -> Option<u64> {
    value.as_u64().or_else(|| {
        value
            .as_f64()
            .filter(|n| n.fract() == 0.0 && *n >= 0.0 && *n <= u64::MAX as f64)
            .map(|n| n as u64)
    })
}

fn parse_element(element: &Value) -> Result<AnnotatedRegion, String> {
    let label = element
        .get("type")
        .and_then(Value::as_str)
        .ok_or("missing string `type`")?;

    let text = match element.get("text") {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Null) => String::new(),
        Some(other) => other.to_string(),
        None => return Err("missing `text`".to_string()),
    };

    let bbox = element.get("bbox").ok_or("missing `bbox`")?;
    let xmin = coordinate(bbox, "xmin")?;
    let ymin = coordinate(bbox, "ymin")?;
    let xmax = coordinate(bbox, "xmax")?;
    let ymax = coordinate(bbox, "ymax")?;

    Ok(AnnotatedRegion {
        label: label.to_string(),
        bounding_box: BoundingBox::from_corners(xmin, ymin, xmax, ymax),
        text,
    })
}

/// Coordinates arrive as numbers, but numeric strings are accepted too.
fn coordinate(bbox: &Value, name: &str) -> Result<f64, String> {
    match bbox.get(name) {
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| format!("bbox.{} is out of range", name)),
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("bbox.{} is not numeric: {:?}", name, s)),
        Some(_) => Err(format!("bbox.{} is not a number", name)),
        None => Err(format!("missing bbox.{}", name)),
    }
}
