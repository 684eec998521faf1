//! Wire protocol types
//!
//! The client-facing protocol is the Anthropic Messages API. Every backend
//! adapter translates from [`RoutedRequest`] and back to Anthropic-shaped
//! JSON or SSE bytes, so responses look the same whichever tier answered.

pub mod messages;
pub mod sse;

pub use messages::{
    Message, MessageRole, MessagesResponse, RoutedRequest, Usage, flatten_content,
};
pub use sse::{SseDecoder, SseFrame};

/// `anthropic-version` header value sent to Messages-compatible backends
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Generate a message id in the `msg_<24 hex>` shape clients expect
pub fn new_message_id() -> String {
    let hex = uuid::Uuid::new_v4().simple().to_string();
    format!("msg_{}", &hex[..24])
}
