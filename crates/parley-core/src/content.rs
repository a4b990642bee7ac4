//! Message content shapes and their canonical text form.
//!
//! Agents and callers hand the core plain strings, multi-part content
//! (the shape returned by responses-style model APIs), or arbitrary JSON.
//! Everything is collapsed to one canonical text at the message store
//! boundary by [`normalize`], which never fails.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Text stored for content that has no textual reading.
pub const UNSUPPORTED_CONTENT: &str = "[unsupported content]";

/// One part of a multi-part message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ContentPart {
    /// Text content.
    #[serde(rename = "text")]
    Text {
        /// The text.
        text: String,
    },
    /// Image content. Carries no text and is dropped by normalization.
    #[serde(rename = "image")]
    Image {
        /// Base64-encoded image data.
        data: String,
        /// MIME type.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

/// Any content shape accepted by the core.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    /// Plain text.
    Text(String),
    /// Structured multi-part content.
    Parts(Vec<ContentPart>),
    /// Unstructured JSON from an upstream that did not match the other shapes.
    Json(Value),
}

impl MessageContent {
    /// Canonical text of this content. See [`normalize`].
    pub fn to_text(&self) -> String {
        normalize(self)
    }
}

impl From<&str> for MessageContent {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for MessageContent {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<ContentPart>> for MessageContent {
    fn from(parts: Vec<ContentPart>) -> Self {
        Self::Parts(parts)
    }
}

impl From<Value> for MessageContent {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

/// Map any supported content shape to its canonical text.
///
/// - Text is returned unchanged.
/// - Parts: text parts joined with `\n`, trimmed. Parts without any text
///   part (images only) map to [`UNSUPPORTED_CONTENT`].
/// - JSON string: the string. JSON object with a string `text` field: that
///   field. JSON array: its `{"type": "text"}` parts joined like `Parts`.
///   Numbers and booleans: their literal. `null`: empty text.
/// - Anything else: [`UNSUPPORTED_CONTENT`].
pub fn normalize(content: &MessageContent) -> String {
    match content {
        MessageContent::Text(text) => text.clone(),
        MessageContent::Parts(parts) => {
            let texts: Vec<&str> = parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.as_str()),
                    ContentPart::Image { .. } => None,
                })
                .collect();
            text_or_placeholder(&texts, parts.is_empty())
        }
        MessageContent::Json(value) => normalize_json(value),
    }
}

fn normalize_json(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Object(map) => match map.get("text") {
            Some(Value::String(text)) => text.clone(),
            _ => UNSUPPORTED_CONTENT.to_owned(),
        },
        Value::Array(items) => {
            let texts: Vec<&str> = items.iter().filter_map(json_text_part).collect();
            text_or_placeholder(&texts, items.is_empty())
        }
    }
}

fn json_text_part(item: &Value) -> Option<&str> {
    let obj = item.as_object()?;
    if obj.get("type").and_then(Value::as_str) != Some("text") {
        return None;
    }
    Some(obj.get("text").and_then(Value::as_str).unwrap_or_default())
}

/// Joined text parts; a non-empty list without any text part is unsupported.
fn text_or_placeholder(texts: &[&str], empty_input: bool) -> String {
    if texts.is_empty() && !empty_input {
        return UNSUPPORTED_CONTENT.to_owned();
    }
    texts.join("\n").trim().to_owned()
}
