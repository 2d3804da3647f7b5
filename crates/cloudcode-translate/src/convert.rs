// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Anthropic request → Google `generateContent` request, the unary half of
//! the wire translation layer.
//!
//! Grounded on `loom_server_llm_vertex::types`'s `From<&LlmRequest> for
//! VertexRequest` for the output envelope shape, combined with
//! `loom_server_llm_anthropic::types`'s content-block parsing for the
//! input side (role mapping, `tool_use`/`tool_result` block handling).

use std::collections::HashMap;

use sha2::{Digest, Sha256};

use crate::anthropic::{
	AnthropicContent, AnthropicImageSource, AnthropicMessageContent, AnthropicRequest, AnthropicResponse,
	AnthropicRole, AnthropicToolResultContent, AnthropicUsage,
};
use crate::google::{
	GoogleContent, GoogleFunctionCall, GoogleFunctionDeclaration, GoogleFunctionResponse,
	GoogleGenerationConfig, GoogleInlineData, GooglePart, GoogleRequest, GoogleStreamChunk, GoogleTool,
};
use crate::sse::map_finish_reason;

/// A deterministic hash of `text`, truncated to 32 hex characters — used as
/// the `sessionId` so repeated requests with the same opening user message
/// land on the same upstream session cache.
pub fn derive_session_id(text: &str) -> String {
	let digest = Sha256::digest(text.as_bytes());
	hex::encode(digest)[..32].to_string()
}

fn first_user_message_text(request: &AnthropicRequest) -> String {
	request
		.messages
		.iter()
		.find(|message| message.role == AnthropicRole::User)
		.map(|message| {
			message
				.content
				.blocks()
				.iter()
				.filter_map(|block| match block {
					AnthropicContent::Text { text } => Some(text.clone()),
					_ => None,
				})
				.collect::<Vec<_>>()
				.join("\n")
		})
		.unwrap_or_default()
}

/// Map every `tool_use` block's id to its name, across the whole
/// conversation, so a later `tool_result` (which only carries the id) can
/// be converted into a Google `functionResponse` (which is keyed by name).
fn collect_tool_use_names(request: &AnthropicRequest) -> HashMap<String, String> {
	let mut names = HashMap::new();
	for message in &request.messages {
		for block in message.content.blocks() {
			if let AnthropicContent::ToolUse { id, name, .. } = block {
				names.insert(id, name);
			}
		}
	}
	names
}

fn convert_block(block: &AnthropicContent, tool_names: &HashMap<String, String>) -> Option<GooglePart> {
	match block {
		AnthropicContent::Text { text } => Some(GooglePart::Text { text: text.clone() }),
		AnthropicContent::Thinking { thinking } => Some(GooglePart::Thought {
			text: thinking.clone(),
			thought: true,
		}),
		AnthropicContent::ToolUse { name, input, .. } => Some(GooglePart::FunctionCall {
			function_call: GoogleFunctionCall {
				name: name.clone(),
				args: input.clone(),
			},
		}),
		AnthropicContent::ToolResult {
			tool_use_id, content, ..
		} => {
			let name = tool_names
				.get(tool_use_id)
				.cloned()
				.unwrap_or_else(|| tool_use_id.clone());
			Some(GooglePart::FunctionResponse {
				function_response: GoogleFunctionResponse {
					name,
					response: serde_json::json!({ "result": content.as_text() }),
				},
			})
		}
		AnthropicContent::Image { source } => {
			let AnthropicImageSource::Base64 { media_type, data } = source;
			Some(GooglePart::InlineData {
				inline_data: GoogleInlineData {
					mime_type: media_type.clone(),
					data: data.clone(),
				},
			})
		}
	}
}

fn google_role(role: AnthropicRole) -> &'static str {
	match role {
		AnthropicRole::User => "user",
		AnthropicRole::Assistant => "model",
	}
}

/// Build the Google `generateContent` request body (minus the
/// project/model/envelope fields the dispatcher adds) from an Anthropic
/// Messages API request.
pub fn anthropic_to_google(request: &AnthropicRequest) -> GoogleRequest {
	let tool_names = collect_tool_use_names(request);
	let session_id = derive_session_id(&first_user_message_text(request));

	let mut contents: Vec<GoogleContent> = Vec::new();
	for message in &request.messages {
		let role = google_role(message.role);
		let parts: Vec<GooglePart> = message
			.content
			.blocks()
			.iter()
			.filter_map(|block| convert_block(block, &tool_names))
			.collect();
		if parts.is_empty() {
			continue;
		}
		match contents.last_mut() {
			Some(last) if last.role.as_deref() == Some(role) => last.parts.extend(parts),
			_ => contents.push(GoogleContent {
				role: Some(role.to_string()),
				parts,
			}),
		}
	}

	let system_instruction = request.system.as_ref().map(|system| GoogleContent {
		role: None,
		parts: vec![GooglePart::Text {
			text: system.as_text(),
		}],
	});

	let generation_config = Some(GoogleGenerationConfig {
		max_output_tokens: Some(request.max_tokens),
		temperature: request.temperature,
		stop_sequences: request.stop_sequences.clone(),
	});

	let tools = request.tools.as_ref().map(|tools| {
		vec![GoogleTool {
			function_declarations: tools
				.iter()
				.map(|tool| GoogleFunctionDeclaration {
					name: tool.name.clone(),
					description: tool.description.clone(),
					parameters: tool.input_schema.clone(),
				})
				.collect(),
		}]
	});

	GoogleRequest {
		contents,
		system_instruction,
		generation_config,
		tools,
		session_id,
	}
}

/// Assembles a complete (non-streaming) Anthropic Messages API response from
/// a single Google `generateContent` reply, for the unary `:generateContent`
/// path. The block-kind mapping mirrors `sse::AnthropicStreamTranslator`'s
/// per-part handling, but produces whole blocks instead of delta events
/// since there is exactly one reply to assemble, not a sequence of chunks.
pub fn google_response_to_anthropic(
	message_id: impl Into<String>,
	model: impl Into<String>,
	response: &GoogleStreamChunk,
) -> AnthropicResponse {
	let candidate = response.candidates.first();
	let content = candidate
		.and_then(|candidate| candidate.content.as_ref())
		.map(|content| content.parts.iter().filter_map(google_part_to_content_block).collect())
		.unwrap_or_default();

	let stop_reason = candidate
		.and_then(|candidate| candidate.finish_reason.as_deref())
		.map(map_finish_reason)
		.unwrap_or("end_turn");

	let usage = response.usage_metadata.as_ref();

	AnthropicResponse {
		id: message_id.into(),
		response_type: "message".to_string(),
		role: "assistant".to_string(),
		content,
		model: model.into(),
		stop_reason: Some(stop_reason.to_string()),
		stop_sequence: None,
		usage: AnthropicUsage {
			input_tokens: usage.map(|usage| usage.prompt_token_count).unwrap_or(0),
			output_tokens: usage.map(|usage| usage.candidates_token_count).unwrap_or(0),
		},
	}
}

fn google_part_to_content_block(part: &GooglePart) -> Option<AnthropicContent> {
	match part {
		GooglePart::Text { text } => Some(AnthropicContent::Text { text: text.clone() }),
		GooglePart::Thought { text, thought: true } => Some(AnthropicContent::Thinking {
			thinking: text.clone(),
		}),
		GooglePart::Thought { text, .. } => Some(AnthropicContent::Text { text: text.clone() }),
		GooglePart::FunctionCall { function_call } => Some(AnthropicContent::ToolUse {
			id: format!("toolu_{}", uuid::Uuid::new_v4()),
			name: function_call.name.clone(),
			input: function_call.args.clone(),
		}),
		GooglePart::FunctionResponse { .. } | GooglePart::InlineData { .. } => None,
	}
}
