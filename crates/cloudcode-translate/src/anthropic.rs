// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Client-facing Anthropic Messages API shapes.
//!
//! Grounded on `loom_server_llm_anthropic::types`: the same
//! `AnthropicMessage`/`AnthropicContent` tagged-enum shape for request
//! content blocks, extended with an `Image` variant (`source.type ==
//! "base64"`, not implemented in the source crate) and
//! `thinking`/`tool_use`/`tool_result` kept as-is.

use serde::{Deserialize, Serialize};

/// An inbound Anthropic Messages API request.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnthropicRequest {
	pub model: String,
	pub messages: Vec<AnthropicMessage>,
	pub max_tokens: u32,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub system: Option<AnthropicSystemPrompt>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub temperature: Option<f32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tools: Option<Vec<AnthropicTool>>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub stop_sequences: Option<Vec<String>>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub stream: Option<bool>,
}

/// `system` may be a bare string or a list of text blocks; both forms are
/// accepted and flattened to a single string for the Google translation.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum AnthropicSystemPrompt {
	Text(String),
	Blocks(Vec<AnthropicContent>),
}

impl AnthropicSystemPrompt {
	pub fn as_text(&self) -> String {
		match self {
			AnthropicSystemPrompt::Text(text) => text.clone(),
			AnthropicSystemPrompt::Blocks(blocks) => blocks
				.iter()
				.filter_map(|block| match block {
					AnthropicContent::Text { text } => Some(text.as_str()),
					_ => None,
				})
				.collect::<Vec<_>>()
				.join("\n"),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnthropicRole {
	User,
	Assistant,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnthropicMessage {
	pub role: AnthropicRole,
	pub content: AnthropicMessageContent,
}

/// `content` is either a bare string (shorthand for a single text block) or
/// an explicit list of content blocks.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum AnthropicMessageContent {
	Text(String),
	Blocks(Vec<AnthropicContent>),
}

impl AnthropicMessageContent {
	pub fn blocks(&self) -> Vec<AnthropicContent> {
		match self {
			AnthropicMessageContent::Text(text) => vec![AnthropicContent::Text { text: text.clone() }],
			AnthropicMessageContent::Blocks(blocks) => blocks.clone(),
		}
	}
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicContent {
	Text {
		text: String,
	},
	Thinking {
		thinking: String,
	},
	ToolUse {
		id: String,
		name: String,
		input: serde_json::Value,
	},
	ToolResult {
		tool_use_id: String,
		content: AnthropicToolResultContent,
		#[serde(default, skip_serializing_if = "Option::is_none")]
		is_error: Option<bool>,
	},
	Image {
		source: AnthropicImageSource,
	},
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(untagged)]
pub enum AnthropicToolResultContent {
	Text(String),
	Blocks(Vec<AnthropicContent>),
}

impl AnthropicToolResultContent {
	pub fn as_text(&self) -> String {
		match self {
			AnthropicToolResultContent::Text(text) => text.clone(),
			AnthropicToolResultContent::Blocks(blocks) => blocks
				.iter()
				.filter_map(|block| match block {
					AnthropicContent::Text { text } => Some(text.as_str()),
					_ => None,
				})
				.collect::<Vec<_>>()
				.join("\n"),
		}
	}
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AnthropicImageSource {
	Base64 {
		media_type: String,
		data: String,
	},
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AnthropicTool {
	pub name: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	pub input_schema: serde_json::Value,
}

/// A complete (non-streaming) Messages API response, for the unary
/// `:generateContent` path.
#[derive(Debug, Clone, Serialize)]
pub struct AnthropicResponse {
	pub id: String,
	#[serde(rename = "type")]
	pub response_type: String,
	pub role: String,
	pub content: Vec<AnthropicContent>,
	pub model: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub stop_reason: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub stop_sequence: Option<String>,
	pub usage: AnthropicUsage,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnthropicUsage {
	pub input_tokens: u32,
	pub output_tokens: u32,
}

/// True if `model` is a model family this service emits `thinking` blocks
/// for: Claude-family models with "thinking" in the id, or any Gemini model
/// at major version 3 or above. Name-pattern detection only.
pub fn is_thinking_model(model: &str) -> bool {
	let lower = model.to_lowercase();
	if lower.contains("thinking") {
		return true;
	}
	gemini_major_version(&lower).is_some_and(|major| major >= 3)
}

fn gemini_major_version(lower_model: &str) -> Option<u32> {
	let rest = lower_model.strip_prefix("gemini-")?;
	let major_str: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
	major_str.parse().ok()
}

/// The `anthropic-beta` header value attached when the request targets a
/// thinking-capable model.
pub const INTERLEAVED_THINKING_BETA: &str = "interleaved-thinking-2025-05-14";
