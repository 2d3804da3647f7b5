// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! The Google `generateContent`-shaped upstream payload and the Cloud Code
//! envelope wrapped around it.
//!
//! Grounded on `loom_server_llm_vertex::types`: `VertexRequest`/
//! `VertexContent`/`VertexPart` have exactly this `contents`/
//! `systemInstruction`/`generationConfig`/`tools` shape. `CloudCodeEnvelope`
//! is new — the Vertex client this is grounded on talks to Vertex AI
//! directly with no wrapping envelope, but Cloud Code's
//! `v1internal:streamGenerateContent` envelope (`{project, model, request,
//! userAgent, requestId}`) is a distinct wire format, so it is implemented
//! fresh here rather than reused.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleRequest {
	pub contents: Vec<GoogleContent>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub system_instruction: Option<GoogleContent>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub generation_config: Option<GoogleGenerationConfig>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub tools: Option<Vec<GoogleTool>>,
	pub session_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleContent {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub role: Option<String>,
	pub parts: Vec<GooglePart>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GooglePart {
	// `Thought` must be tried before `Text`: both have a `text` field, and
	// untagged deserialization takes the first variant that matches, so a
	// thinking part (`{"text": ..., "thought": true}`) would otherwise be
	// silently parsed as a plain text part.
	Thought {
		text: String,
		thought: bool,
	},
	Text {
		text: String,
	},
	FunctionCall {
		#[serde(rename = "functionCall")]
		function_call: GoogleFunctionCall,
	},
	FunctionResponse {
		#[serde(rename = "functionResponse")]
		function_response: GoogleFunctionResponse,
	},
	InlineData {
		#[serde(rename = "inlineData")]
		inline_data: GoogleInlineData,
	},
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleFunctionCall {
	pub name: String,
	pub args: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleFunctionResponse {
	pub name: String,
	pub response: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleInlineData {
	pub mime_type: String,
	pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleGenerationConfig {
	#[serde(skip_serializing_if = "Option::is_none")]
	pub max_output_tokens: Option<u32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub temperature: Option<f32>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub stop_sequences: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleTool {
	pub function_declarations: Vec<GoogleFunctionDeclaration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GoogleFunctionDeclaration {
	pub name: String,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub description: Option<String>,
	pub parameters: serde_json::Value,
}

/// The outer Cloud Code envelope posted to
/// `{base}/v1internal:streamGenerateContent` (or `:generateContent`).
#[derive(Debug, Clone, Serialize)]
pub struct CloudCodeEnvelope {
	pub project: String,
	pub model: String,
	pub request: GoogleRequest,
	#[serde(rename = "userAgent")]
	pub user_agent: String,
	#[serde(rename = "requestId")]
	pub request_id: String,
}

impl CloudCodeEnvelope {
	pub fn new(project: impl Into<String>, model: impl Into<String>, request: GoogleRequest) -> Self {
		Self {
			project: project.into(),
			model: model.into(),
			request,
			user_agent: "antigravity".to_string(),
			request_id: format!("agent-{}", uuid::Uuid::new_v4()),
		}
	}
}

/// One `data:` chunk of the upstream SSE stream.
#[derive(Debug, Clone, Deserialize)]
pub struct GoogleStreamChunk {
	#[serde(default)]
	pub candidates: Vec<GoogleCandidate>,
	#[serde(default, rename = "usageMetadata")]
	pub usage_metadata: Option<GoogleUsageMetadata>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GoogleCandidate {
	#[serde(default)]
	pub content: Option<GoogleContent>,
	#[serde(default, rename = "finishReason")]
	pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GoogleUsageMetadata {
	#[serde(default)]
	pub prompt_token_count: u32,
	#[serde(default)]
	pub candidates_token_count: u32,
	#[serde(default)]
	pub total_token_count: u32,
}
