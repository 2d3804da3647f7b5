// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Google SSE → Anthropic SSE, the streaming half of the wire translation
//! layer.
//!
//! The parsing loop — buffer raw bytes into a `String`, split on `"\n\n"`
//! event boundaries, tolerate chunk fragmentation across polls — is reused
//! verbatim from `loom_server_llm_proxy::stream::ProxyLlmStream`'s
//! `pin_project!`-based `Stream` impl. What changes is the event
//! vocabulary it drives: instead of an internal `LlmEvent` enum, this
//! drives the Anthropic `message_start` / `content_block_start` /
//! `content_block_delta` / `content_block_stop` / `message_delta` /
//! `message_stop` state machine.

use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures::Stream;
use pin_project_lite::pin_project;
use serde_json::json;

use crate::google::{GoogleCandidate, GooglePart, GoogleStreamChunk, GoogleUsageMetadata};

/// One Anthropic SSE event: the `event:` name and its `data:` JSON payload.
#[derive(Debug, Clone, PartialEq)]
pub struct AnthropicSseEvent {
	pub event: &'static str,
	pub data: serde_json::Value,
}

impl AnthropicSseEvent {
	/// Render as the wire format: `event: <name>\ndata: <json>\n\n`.
	pub fn to_wire(&self) -> String {
		format!("event: {}\ndata: {}\n\n", self.event, self.data)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenBlockKind {
	Text,
	ToolUse,
	Thinking,
}

impl OpenBlockKind {
	fn type_name(self) -> &'static str {
		match self {
			OpenBlockKind::Text => "text",
			OpenBlockKind::ToolUse => "tool_use",
			OpenBlockKind::Thinking => "thinking",
		}
	}
}

/// Drives the block-open/block-close state machine, independent of how the
/// underlying bytes arrive — the `Stream` wrapper below feeds it one parsed
/// `GoogleStreamChunk` at a time.
pub struct AnthropicStreamTranslator {
	message_id: String,
	model: String,
	next_index: u32,
	open_block: Option<(u32, OpenBlockKind)>,
	started: bool,
	stopped: bool,
	usage: GoogleUsageMetadata,
}

impl AnthropicStreamTranslator {
	pub fn new(message_id: impl Into<String>, model: impl Into<String>) -> Self {
		Self {
			message_id: message_id.into(),
			model: model.into(),
			next_index: 0,
			open_block: None,
			started: false,
			stopped: false,
			usage: GoogleUsageMetadata {
				prompt_token_count: 0,
				candidates_token_count: 0,
				total_token_count: 0,
			},
		}
	}

	fn message_start_event(&mut self) -> AnthropicSseEvent {
		self.started = true;
		AnthropicSseEvent {
			event: "message_start",
			data: json!({
				"type": "message_start",
				"message": {
					"id": self.message_id,
					"type": "message",
					"role": "assistant",
					"content": [],
					"model": self.model,
					"stop_reason": null,
					"stop_sequence": null,
					"usage": {"input_tokens": 0, "output_tokens": 0},
				}
			}),
		}
	}

	fn close_open_block(&mut self) -> Option<AnthropicSseEvent> {
		let (index, _) = self.open_block.take()?;
		Some(AnthropicSseEvent {
			event: "content_block_stop",
			data: json!({"type": "content_block_stop", "index": index}),
		})
	}

	fn open_block(&mut self, kind: OpenBlockKind) -> (u32, Vec<AnthropicSseEvent>) {
		let mut events = Vec::new();
		if let Some(event) = self.close_open_block() {
			events.push(event);
		}
		let index = self.next_index;
		self.next_index += 1;
		self.open_block = Some((index, kind));
		let content_block = match kind {
			OpenBlockKind::Text => json!({"type": "text", "text": ""}),
			OpenBlockKind::ToolUse => json!({"type": "tool_use", "id": "", "name": "", "input": {}}),
			OpenBlockKind::Thinking => json!({"type": "thinking", "thinking": ""}),
		};
		events.push(AnthropicSseEvent {
			event: "content_block_start",
			data: json!({
				"type": "content_block_start",
				"index": index,
				"content_block": content_block,
			}),
		});
		(index, events)
	}

	/// Convert one upstream chunk into zero or more Anthropic SSE events,
	/// advancing internal state. Call `finish()` once the upstream stream
	/// ends to synthesize a closing sequence if one hasn't been emitted.
	pub fn translate_chunk(&mut self, chunk: &GoogleStreamChunk) -> Vec<AnthropicSseEvent> {
		let mut events = Vec::new();
		if !self.started {
			events.push(self.message_start_event());
		}

		if let Some(usage) = &chunk.usage_metadata {
			self.usage = usage.clone();
		}

		let mut finish_reason = None;
		for candidate in &chunk.candidates {
			if let Some(reason) = &candidate.finish_reason {
				finish_reason = Some(reason.clone());
			}
			let Some(content) = &candidate.content else {
				continue;
			};
			for part in &content.parts {
				events.extend(self.translate_part(part));
			}
		}

		if let Some(reason) = finish_reason {
			events.extend(self.finish_with_reason(&reason));
		}

		events
	}

	fn translate_part(&mut self, part: &GooglePart) -> Vec<AnthropicSseEvent> {
		let mut events = Vec::new();
		match part {
			GooglePart::Text { text } => {
				let index = self.ensure_open(OpenBlockKind::Text, &mut events);
				events.push(AnthropicSseEvent {
					event: "content_block_delta",
					data: json!({
						"type": "content_block_delta",
						"index": index,
						"delta": {"type": "text_delta", "text": text},
					}),
				});
			}
			GooglePart::Thought { text, thought } if *thought => {
				let index = self.ensure_open(OpenBlockKind::Thinking, &mut events);
				events.push(AnthropicSseEvent {
					event: "content_block_delta",
					data: json!({
						"type": "content_block_delta",
						"index": index,
						"delta": {"type": "thinking_delta", "thinking": text},
					}),
				});
			}
			GooglePart::Thought { text, .. } => {
				let index = self.ensure_open(OpenBlockKind::Text, &mut events);
				events.push(AnthropicSseEvent {
					event: "content_block_delta",
					data: json!({
						"type": "content_block_delta",
						"index": index,
						"delta": {"type": "text_delta", "text": text},
					}),
				});
			}
			GooglePart::FunctionCall { function_call } => {
				let index = self.ensure_open(OpenBlockKind::ToolUse, &mut events);
				events.push(AnthropicSseEvent {
					event: "content_block_delta",
					data: json!({
						"type": "content_block_delta",
						"index": index,
						"delta": {
							"type": "input_json_delta",
							"partial_json": function_call.args.to_string(),
						},
					}),
				});
			}
			GooglePart::FunctionResponse { .. } | GooglePart::InlineData { .. } => {
				tracing::trace!("dropping non-assistant-visible part in stream translation");
			}
		}
		events
	}

	fn ensure_open(&mut self, kind: OpenBlockKind, events: &mut Vec<AnthropicSseEvent>) -> u32 {
		if let Some((index, open_kind)) = self.open_block {
			if open_kind == kind {
				return index;
			}
		}
		let (index, opening) = self.open_block(kind);
		events.extend(opening);
		index
	}

	fn finish_with_reason(&mut self, finish_reason: &str) -> Vec<AnthropicSseEvent> {
		let mut events = Vec::new();
		if let Some(event) = self.close_open_block() {
			events.push(event);
		}
		let stop_reason = map_finish_reason(finish_reason);
		events.push(AnthropicSseEvent {
			event: "message_delta",
			data: json!({
				"type": "message_delta",
				"delta": {"stop_reason": stop_reason, "stop_sequence": null},
				"usage": {
					"input_tokens": self.usage.prompt_token_count,
					"output_tokens": self.usage.candidates_token_count,
				},
			}),
		});
		events.push(AnthropicSseEvent {
			event: "message_stop",
			data: json!({"type": "message_stop"}),
		});
		self.stopped = true;
		events
	}

	/// Called once the upstream stream ends without ever sending a
	/// `finishReason` — synthesizes `end_turn` so every opened block is
	/// still closed and `message_stop` is still emitted.
	pub fn finish(&mut self) -> Vec<AnthropicSseEvent> {
		if self.stopped {
			return Vec::new();
		}
		if !self.started {
			let mut events = vec![self.message_start_event()];
			events.extend(self.finish_with_reason("STOP"));
			return events;
		}
		self.finish_with_reason("STOP")
	}
}

/// Maps a Google `finishReason` to an Anthropic `stop_reason`, shared by
/// the streaming translator above and the unary response assembler in
/// `convert::google_response_to_anthropic`.
pub fn map_finish_reason(reason: &str) -> &'static str {
	match reason {
		"STOP" => "end_turn",
		"MAX_TOKENS" => "max_tokens",
		"TOOL_USE" | "TOOL_CALLS" => "tool_use",
		"SAFETY" => "stop_sequence",
		_ => "end_turn",
	}
}

pin_project! {
	/// Wraps the raw upstream byte stream, buffering partial SSE frames and
	/// emitting fully-translated Anthropic SSE wire strings.
	///
	/// Grounded on `ProxyLlmStream`'s buffer-and-split-on-blank-line loop;
	/// see module docs.
	pub struct AnthropicSseStream<S> {
		#[pin]
		inner: S,
		buffer: String,
		translator: AnthropicStreamTranslator,
		finished: bool,
	}
}

impl<S> AnthropicSseStream<S> {
	pub fn new(inner: S, message_id: impl Into<String>, model: impl Into<String>) -> Self {
		Self {
			inner,
			buffer: String::new(),
			translator: AnthropicStreamTranslator::new(message_id, model),
			finished: false,
		}
	}
}

#[derive(Debug, thiserror::Error)]
pub enum SseError {
	#[error("upstream byte stream error: {0}")]
	Transport(String),
	#[error("upstream bytes were not valid utf-8: {0}")]
	Utf8(#[from] std::str::Utf8Error),
}

fn parse_event_block(block: &str, events: &mut Vec<serde_json::Value>) {
	let mut data_lines = Vec::new();
	for line in block.lines() {
		if let Some(data) = line.strip_prefix("data:") {
			data_lines.push(data.trim());
		}
	}
	if data_lines.is_empty() {
		return;
	}
	let joined = data_lines.join("\n");
	if joined.trim() == "[DONE]" {
		return;
	}
	if let Ok(value) = serde_json::from_str::<serde_json::Value>(&joined) {
		events.push(value);
	}
}

impl<S, E> Stream for AnthropicSseStream<S>
where
	S: Stream<Item = Result<Bytes, E>>,
	E: std::fmt::Display,
{
	type Item = Result<String, SseError>;

	fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
		let mut this = self.project();
		loop {
			if let Some(pos) = this.buffer.find("\n\n") {
				let block: String = this.buffer.drain(..pos + 2).collect();
				let mut raw_events = Vec::new();
				parse_event_block(&block, &mut raw_events);
				let mut out = String::new();
				for raw in raw_events {
					let chunk: GoogleStreamChunk = match serde_json::from_value(raw) {
						Ok(chunk) => chunk,
						Err(_) => continue,
					};
					for event in this.translator.translate_chunk(&chunk) {
						out.push_str(&event.to_wire());
					}
				}
				if out.is_empty() {
					continue;
				}
				return Poll::Ready(Some(Ok(out)));
			}

			if *this.finished {
				return Poll::Ready(None);
			}

			match this.inner.as_mut().poll_next(cx) {
				Poll::Ready(Some(Ok(bytes))) => match std::str::from_utf8(&bytes) {
					Ok(text) => this.buffer.push_str(text),
					Err(err) => return Poll::Ready(Some(Err(SseError::Utf8(err)))),
				},
				Poll::Ready(Some(Err(err))) => {
					return Poll::Ready(Some(Err(SseError::Transport(err.to_string()))))
				}
				Poll::Ready(None) => {
					*this.finished = true;
					if !this.buffer.is_empty() {
						let mut raw_events = Vec::new();
						parse_event_block(this.buffer, &mut raw_events);
						this.buffer.clear();
						let mut out = String::new();
						for raw in raw_events {
							if let Ok(chunk) = serde_json::from_value::<GoogleStreamChunk>(raw) {
								for event in this.translator.translate_chunk(&chunk) {
									out.push_str(&event.to_wire());
								}
							}
						}
						for event in this.translator.finish() {
							out.push_str(&event.to_wire());
						}
						if !out.is_empty() {
							return Poll::Ready(Some(Ok(out)));
						}
						continue;
					}
					let closing: String = this
						.translator
						.finish()
						.iter()
						.map(AnthropicSseEvent::to_wire)
						.collect();
					if closing.is_empty() {
						return Poll::Ready(None);
					}
					return Poll::Ready(Some(Ok(closing)));
				}
				Poll::Pending => return Poll::Pending,
			}
		}
	}
}


#[cfg(test)]
mod proptest_translator {
	use proptest::prelude::*;

	use super::*;
	use crate::google::GoogleContent;

	fn run_chunks(parts: &[String]) -> Vec<AnthropicSseEvent> {
		let mut translator = AnthropicStreamTranslator::new("msg_1", "model");
		let mut events = Vec::new();
		for text in parts {
			events.extend(translator.translate_chunk(&chunk_with_text(text)));
		}
		events.extend(translator.finish());
		events
	}

	fn chunk_with_text(text: &str) -> GoogleStreamChunk {
		GoogleStreamChunk {
			candidates: vec![GoogleCandidate {
				content: Some(GoogleContent {
					role: Some("model".to_string()),
					parts: vec![GooglePart::Text { text: text.to_string() }],
				}),
				finish_reason: None,
			}],
			usage_metadata: None,
		}
	}

	proptest! {
		#[test]
		fn every_opened_block_is_closed_exactly_once(parts in proptest::collection::vec("[a-zA-Z ]{0,12}", 0..8)) {
			let events = run_chunks(&parts);
			let opens = events.iter().filter(|e| e.event == "content_block_start").count();
			let closes = events.iter().filter(|e| e.event == "content_block_stop").count();
			prop_assert_eq!(opens, closes);
		}

		#[test]
		fn block_indices_form_a_dense_prefix_of_naturals(parts in proptest::collection::vec("[a-zA-Z ]{1,12}", 1..8)) {
			let events = run_chunks(&parts);
			let mut indices: Vec<u64> = events
				.iter()
				.filter(|e| e.event == "content_block_start")
				.map(|e| e.data["index"].as_u64().unwrap())
				.collect();
			indices.sort_unstable();
			let expected: Vec<u64> = (0..indices.len() as u64).collect();
			prop_assert_eq!(indices, expected);
		}

		#[test]
		fn stream_always_ends_with_message_stop(parts in proptest::collection::vec("[a-zA-Z ]{0,12}", 0..8)) {
			let events = run_chunks(&parts);
			prop_assert_eq!(events.last().map(|e| e.event), Some("message_stop"));
		}
	}
}
