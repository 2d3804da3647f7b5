// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Anthropic Messages API ↔ Google Cloud Code wire translation: request
//! shape conversion and Server-Sent-Event re-streaming.

pub mod anthropic;
pub mod convert;
pub mod google;
pub mod sse;

pub use anthropic::{
	is_thinking_model, AnthropicContent, AnthropicMessage, AnthropicMessageContent, AnthropicRequest,
	AnthropicResponse, AnthropicRole, AnthropicSystemPrompt, AnthropicTool, AnthropicUsage,
	INTERLEAVED_THINKING_BETA,
};
pub use convert::{anthropic_to_google, derive_session_id, google_response_to_anthropic};
pub use google::{CloudCodeEnvelope, GoogleRequest, GoogleStreamChunk};
pub use sse::{map_finish_reason, AnthropicSseEvent, AnthropicSseStream, AnthropicStreamTranslator, SseError};
