//! Anthropic Messages request/response types
//!
//! [`RoutedRequest`] is the normalized request every adapter consumes.
//! Validation happens during deserialization, so an invalid instance cannot
//! exist. Fields the proxy does not interpret (`tools`, `metadata`,
//! `thinking`, ...) are kept verbatim and forwarded to Messages-compatible
//! backends untouched.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value, json};

/// Maximum number of messages accepted in one request
pub const MAX_MESSAGES: usize = 10_000;

/// Conversation role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One conversation turn
///
/// `content` is either a plain string or an array of content blocks.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    role: MessageRole,
    content: Value,
}

impl Message {
    /// Create a plain-text message
    pub fn text(role: MessageRole, text: impl Into<String>) -> Self {
        Self {
            role,
            content: Value::String(text.into()),
        }
    }

    pub fn role(&self) -> MessageRole {
        self.role
    }

    pub fn content(&self) -> &Value {
        &self.content
    }

    /// Content rendered as plain text
    pub fn flattened(&self) -> String {
        flatten_content(&self.content)
    }

    fn to_value(&self) -> Value {
        json!({
            "role": self.role.as_str(),
            "content": self.content.clone(),
        })
    }
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawMessage {
            role: MessageRole,
            content: Value,
        }

        let raw = RawMessage::deserialize(deserializer)?;
        if !(raw.content.is_string() || raw.content.is_array()) {
            return Err(serde::de::Error::custom(format!(
                "{} message content must be a string or an array of content blocks",
                raw.role.as_str()
            )));
        }

        Ok(Message {
            role: raw.role,
            content: raw.content,
        })
    }
}

/// Render message content (string or content blocks) as plain text
///
/// Text blocks contribute their text, tool results are flattened
/// recursively, tool calls become `[tool_use: name({input})]`. Other block
/// types (images, documents) are dropped.
pub fn flatten_content(content: &Value) -> String {
    match content {
        Value::String(text) => text.clone(),
        Value::Array(blocks) => {
            let parts: Vec<String> = blocks
                .iter()
                .filter_map(|block| match block {
                    Value::Object(obj) => match obj.get("type").and_then(Value::as_str) {
                        Some("text") => obj.get("text").and_then(Value::as_str).map(str::to_string),
                        Some("tool_result") => {
                            Some(flatten_content(obj.get("content").unwrap_or(&Value::Null)))
                        }
                        Some("tool_use") => {
                            let name = obj.get("name").and_then(Value::as_str).unwrap_or("tool");
                            let input = obj.get("input").cloned().unwrap_or_else(|| json!({}));
                            Some(format!("[tool_use: {}({})]", name, input))
                        }
                        _ => None,
                    },
                    Value::String(text) => Some(text.clone()),
                    Value::Null => None,
                    other => Some(other.to_string()),
                })
                .filter(|part| !part.is_empty())
                .collect();
            parts.join("\n")
        }
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Normalized inbound request
#[derive(Debug, Clone, Serialize)]
pub struct RoutedRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<Value>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

fn validate_request_fields(
    model: &str,
    messages: &[Message],
    temperature: Option<f64>,
    top_p: Option<f64>,
    max_tokens: Option<u32>,
) -> Result<(), String> {
    if model.trim().is_empty() {
        return Err("model cannot be empty".to_string());
    }

    if messages.is_empty() {
        return Err("messages array cannot be empty".to_string());
    }
    if messages.len() > MAX_MESSAGES {
        return Err(format!(
            "messages array cannot exceed {} messages (got {})",
            MAX_MESSAGES,
            messages.len()
        ));
    }

    if let Some(temp) = temperature
        && (!temp.is_finite() || temp < 0.0)
    {
        return Err("temperature must be a finite, non-negative number".to_string());
    }
    if let Some(top_p) = top_p
        && (!top_p.is_finite() || !(0.0..=1.0).contains(&top_p))
    {
        return Err("top_p must be between 0.0 and 1.0".to_string());
    }
    if max_tokens == Some(0) {
        return Err("max_tokens must be at least 1".to_string());
    }

    Ok(())
}

impl<'de> Deserialize<'de> for RoutedRequest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct RawRequest {
            model: String,
            messages: Vec<Message>,
            system: Option<Value>,
            #[serde(default)]
            stream: bool,
            max_tokens: Option<u32>,
            temperature: Option<f64>,
            top_p: Option<f64>,
            top_k: Option<u32>,
            stop_sequences: Option<Vec<String>>,
            #[serde(flatten)]
            extra: Map<String, Value>,
        }

        let raw = RawRequest::deserialize(deserializer)?;

        validate_request_fields(
            &raw.model,
            &raw.messages,
            raw.temperature,
            raw.top_p,
            raw.max_tokens,
        )
        .map_err(serde::de::Error::custom)?;

        Ok(RoutedRequest {
            model: raw.model,
            messages: raw.messages,
            system: raw.system,
            stream: raw.stream,
            max_tokens: raw.max_tokens,
            temperature: raw.temperature,
            top_p: raw.top_p,
            top_k: raw.top_k,
            stop_sequences: raw.stop_sequences,
            extra: raw.extra,
        })
    }
}

impl RoutedRequest {
    /// Build a plain-text request (tests and benches)
    pub fn simple(model: impl Into<String>, prompt: impl Into<String>, stream: bool) -> Self {
        Self {
            model: model.into(),
            messages: vec![Message::text(MessageRole::User, prompt)],
            system: None,
            stream,
            max_tokens: Some(1024),
            temperature: None,
            top_p: None,
            top_k: None,
            stop_sequences: None,
            extra: Map::new(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn system(&self) -> Option<&Value> {
        self.system.as_ref()
    }

    /// System prompt rendered as plain text, empty when absent
    pub fn system_text(&self) -> String {
        self.system.as_ref().map(flatten_content).unwrap_or_default()
    }

    pub fn stream(&self) -> bool {
        self.stream
    }

    pub fn max_tokens(&self) -> Option<u32> {
        self.max_tokens
    }

    pub fn temperature(&self) -> Option<f64> {
        self.temperature
    }

    pub fn top_p(&self) -> Option<f64> {
        self.top_p
    }

    pub fn stop_sequences(&self) -> Option<&[String]> {
        self.stop_sequences.as_deref()
    }

    /// Fields forwarded verbatim
    pub fn extra(&self) -> &Map<String, Value> {
        &self.extra
    }

    /// Role of the final message
    pub fn last_role(&self) -> Option<MessageRole> {
        self.messages.last().map(Message::role)
    }

    /// Messages API request body for `model`
    pub fn to_messages_body(&self, model: &str, stream: bool) -> Value {
        let mut body = self.extra.clone();
        body.insert("model".to_string(), Value::from(model));
        body.insert(
            "messages".to_string(),
            Value::Array(self.messages.iter().map(Message::to_value).collect()),
        );
        body.insert("stream".to_string(), Value::Bool(stream));
        if let Some(system) = &self.system {
            body.insert("system".to_string(), system.clone());
        }
        if let Some(max_tokens) = self.max_tokens {
            body.insert("max_tokens".to_string(), Value::from(max_tokens));
        }
        if let Some(temperature) = self.temperature {
            body.insert("temperature".to_string(), Value::from(temperature));
        }
        if let Some(top_p) = self.top_p {
            body.insert("top_p".to_string(), Value::from(top_p));
        }
        if let Some(top_k) = self.top_k {
            body.insert("top_k".to_string(), Value::from(top_k));
        }
        if let Some(stop) = &self.stop_sequences {
            body.insert("stop_sequences".to_string(), json!(stop));
        }
        Value::Object(body)
    }
}

/// Token usage block of a Messages response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
}

impl Usage {
    /// Rough estimate from character counts (~4 chars per token)
    pub fn estimate(prompt_chars: usize, completion_chars: usize) -> Self {
        Self {
            input_tokens: (prompt_chars / 4) as u32,
            output_tokens: (completion_chars / 4) as u32,
        }
    }
}

/// Non-streaming Messages response
///
/// Used to validate upstream bodies and to build responses for translated
/// or locally answered requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessagesResponse {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub role: MessageRole,
    pub model: String,
    pub content: Vec<Value>,
    pub stop_reason: Option<String>,
    #[serde(default)]
    pub stop_sequence: Option<String>,
    #[serde(default)]
    pub usage: Usage,
}

impl MessagesResponse {
    /// Single text block assistant message
    pub fn text(model: &str, text: &str, stop_reason: &str, usage: Usage) -> Self {
        Self {
            id: super::new_message_id(),
            kind: "message".to_string(),
            role: MessageRole::Assistant,
            model: model.to_string(),
            content: vec![json!({ "type": "text", "text": text })],
            stop_reason: Some(stop_reason.to_string()),
            stop_sequence: None,
            usage,
        }
    }

    /// Empty `end_turn` reply
    pub fn empty_turn(model: &str) -> Self {
        Self::text(model, "", "end_turn", Usage::default())
    }

    /// Concatenated text of all text blocks
    pub fn text_content(&self) -> String {
        flatten_content(&Value::Array(self.content.clone()))
    }
}
