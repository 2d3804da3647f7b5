// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Substring-based error classification, used only as a last-resort
//! fallback for transport-library errors that don't carry a structured
//! status code.
//!
//! Grounded on `loom-server-llm-anthropic::pool`'s `is_quota_message` /
//! `is_permanent_auth_message` (tested directly in that crate's
//! `pool::tests`) plus a network-error substring list for classifying a
//! failed token refresh as `AuthNetwork` rather than `AuthInvalid`.

const NETWORK_ERROR_SUBSTRINGS: &[&str] = &[
	"fetch failed",
	"network",
	"econnreset",
	"etimedout",
	"socket hang up",
	"timeout",
];

const QUOTA_SUBSTRINGS: &[&str] = &[
	"resource_exhausted",
	"quota_exhausted",
	"rate limit",
	"rate_limit",
	"usage limit",
	"5-hour",
	"rolling window",
];

const AUTH_INVALID_SUBSTRINGS: &[&str] = &[
	"401",
	"403",
	"unauthenticated",
	"invalid_grant",
	"unauthorized",
	"forbidden",
	"invalid api key",
	"invalid authentication",
];

/// True if `message` looks like a transport-level network failure (DNS,
/// connection reset, timeout) rather than an application-level error.
pub fn is_network_error_message(message: &str) -> bool {
	contains_any(message, NETWORK_ERROR_SUBSTRINGS)
}

/// True if `message` looks like a quota/rate-limit signal from the upstream.
pub fn is_quota_message(message: &str) -> bool {
	contains_any(message, QUOTA_SUBSTRINGS)
}

/// True if `message` looks like a permanent authentication failure.
pub fn is_auth_invalid_message(message: &str) -> bool {
	contains_any(message, AUTH_INVALID_SUBSTRINGS)
}

fn contains_any(message: &str, needles: &[&str]) -> bool {
	let lower = message.to_lowercase();
	needles.iter().any(|needle| lower.contains(needle))
}
