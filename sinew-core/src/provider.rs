//! Provider adapter boundary.
//!
//! The runtime invokes a model through exactly one asynchronous call:
//! [`Provider::complete`]. The request carries the compiled prompt as
//! system/user message blocks, a single tool descriptor whose parameters are
//! the contract schema, and a forced selection of that descriptor. The
//! response carries zero or more tool calls — the executor reads the first —
//! plus token usage and an optional cost.
//!
//! [`Provider`] is object-safe via `async_trait`: the executor holds the
//! configured adapter as `Arc<dyn Provider>` out of global config.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors from model providers.
///
/// The step executor treats every variant as a parse-class failure: the
/// attempt is charged, the message becomes retry feedback, and the retry
/// ceiling decides what happens next.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ProviderError {
    /// HTTP or network request failed.
    #[error("request failed: {0}")]
    RequestFailed(String),

    /// Provider rate-limited the request.
    #[error("rate limited")]
    RateLimited,

    /// Authentication/authorization failed.
    #[error("auth failed: {0}")]
    AuthFailed(String),

    /// Could not parse the provider's response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Cache treatment for a message block, for providers with prompt-prefix
/// caching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CacheHint {
    /// Cache this block as an ephemeral prefix.
    Ephemeral,
}

/// One block of a system or user message.
///
/// Providers without prompt caching concatenate block texts; providers with
/// it honour [`MessageBlock::cache`] so the stable prompt prefix stays
/// cache-valid while retry feedback and attachments vary behind it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageBlock {
    /// The text content of this block.
    pub text: String,
    /// Optional cache treatment for this block.
    pub cache: Option<CacheHint>,
}

impl MessageBlock {
    /// A plain, uncached block.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            cache: None,
        }
    }

    /// A block marked as a cacheable prefix.
    pub fn cached(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            cache: Some(CacheHint::Ephemeral),
        }
    }
}

/// The single structured-output descriptor a request forces.
///
/// `parameters` is the contract's JSON Schema. The output schema never
/// appears in prompt text — this descriptor is its only channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDescriptor {
    /// Descriptor name the provider will echo in its tool call.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema for the tool's arguments.
    pub parameters: serde_json::Value,
}

/// Request sent to a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderRequest {
    /// Model to invoke.
    pub model: String,
    /// System message blocks.
    pub system: Vec<MessageBlock>,
    /// User message blocks, in order.
    pub user: Vec<MessageBlock>,
    /// The structured-output descriptor.
    pub tool: ToolDescriptor,
    /// Whether the provider must select `tool` (always true for step
    /// execution; carried explicitly for adapter fidelity).
    pub force_tool: bool,
    /// Sampling temperature.
    pub temperature: Option<f64>,
}

/// A tool call extracted from a provider response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Name of the invoked descriptor.
    pub name: String,
    /// Raw argument payload, a JSON document in string form.
    pub arguments: String,
}

/// Token usage from a single provider call.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Input tokens consumed.
    pub input_tokens: u64,
    /// Output tokens generated.
    pub output_tokens: u64,
    /// Tokens read from cache (if supported).
    pub cache_read_tokens: Option<u64>,
    /// Tokens written to cache (if supported).
    pub cache_creation_tokens: Option<u64>,
}

/// Response from a provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderResponse {
    /// Tool calls in the response; the executor reads the first.
    pub tool_calls: Vec<ToolCall>,
    /// Token usage.
    pub usage: TokenUsage,
    /// Actual model used.
    pub model: String,
    /// Cost of this call as reported by the adapter (None if unknown).
    pub cost: Option<Decimal>,
}

/// LLM provider interface.
///
/// Implementations translate [`ProviderRequest`] into their vendor API and
/// surface the first structured-output tool call back. The executor runs
/// `complete` under a timeout derived from the effective budget; adapters
/// should not impose their own retry policy; retrying is the executor's
/// decision.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Send a completion request to the provider.
    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError>;

    /// Whether this provider honours [`CacheHint`] markers on message
    /// blocks. Providers that return false receive the same blocks and may
    /// simply concatenate them.
    fn supports_prompt_caching(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_display() {
        assert_eq!(
            ProviderError::RequestFailed("timeout".into()).to_string(),
            "request failed: timeout"
        );
        assert_eq!(ProviderError::RateLimited.to_string(), "rate limited");
        assert_eq!(
            ProviderError::InvalidResponse("bad json".into()).to_string(),
            "invalid response: bad json"
        );
    }

    #[test]
    fn message_block_constructors() {
        let plain = MessageBlock::text("hello");
        assert!(plain.cache.is_none());

        let cached = MessageBlock::cached("stable prefix");
        assert_eq!(cached.cache, Some(CacheHint::Ephemeral));
    }

    #[test]
    fn request_roundtrip() {
        let request = ProviderRequest {
            model: "mock-model".into(),
            system: vec![MessageBlock::text("system")],
            user: vec![MessageBlock::cached("stable"), MessageBlock::text("tail")],
            tool: ToolDescriptor {
                name: "output".into(),
                description: "Return the structured output".into(),
                parameters: serde_json::json!({"type": "object"}),
            },
            force_tool: true,
            temperature: Some(0.2),
        };
        let json = serde_json::to_value(&request).unwrap();
        let back: ProviderRequest = serde_json::from_value(json).unwrap();
        assert_eq!(back.user.len(), 2);
        assert_eq!(back.tool.name, "output");
        assert!(back.force_tool);
    }
}
