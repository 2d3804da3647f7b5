// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! The closed error taxonomy the dispatcher classifies every upstream and
//! credential failure into.
//!
//! Modelled on `loom_common_core::error::LlmError`: a flat, `thiserror`
//! derived enum carrying structured fields rather than formatted strings,
//! so callers can match on the variant instead of parsing `.to_string()`.

use thiserror::Error;

use crate::model::ModelId;

/// Every failure the dispatcher can surface, internally or to a client.
#[derive(Clone, Debug, Error)]
pub enum DispatchError {
	/// The upstream returned a quota/rate-limit signal for this account and
	/// model. `reset_ms` is the caller-observed `retryDelay`, if the upstream
	/// supplied one; `None` means "use the configured default cooldown".
	#[error("account {email} rate limited for {model}: retry in {reset_ms:?}ms")]
	RateLimited {
		email: String,
		model: ModelId,
		reset_ms: Option<u64>,
	},

	/// The account's credentials are permanently unusable (revoked refresh
	/// token, invalid API key, 401/403 from upstream).
	#[error("account {email} has invalid credentials: {reason}")]
	AuthInvalid { email: String, reason: String },

	/// A transport-level failure while trying to refresh credentials —
	/// distinct from `AuthInvalid` because the account is not at fault and
	/// should not be disabled.
	#[error("network error during credential refresh: {cause}")]
	AuthNetwork { cause: String },

	/// No account in the pool is eligible to serve this `(model)` request.
	#[error("no account available (all rate limited: {all_rate_limited})")]
	NoAccounts { all_rate_limited: bool },

	/// The retry budget was exhausted without a successful response.
	#[error("max retries exceeded after {attempts} attempts")]
	MaxRetries { attempts: u32 },

	/// The upstream returned an HTTP error outside the rate-limit/auth
	/// cases above.
	#[error("upstream error {status_code} ({error_type}), retryable={retryable}")]
	Upstream {
		status_code: u16,
		error_type: String,
		retryable: bool,
	},
}

impl DispatchError {
	/// HTTP status to surface to the client for this error kind.
	pub fn client_status(&self) -> u16 {
		match self {
			DispatchError::RateLimited { .. } => 429,
			DispatchError::AuthInvalid { .. } => 401,
			DispatchError::NoAccounts { .. } => 503,
			DispatchError::AuthNetwork { .. } => 500,
			DispatchError::MaxRetries { .. } => 500,
			DispatchError::Upstream { status_code, .. } => *status_code,
		}
	}

	/// The `snake_case` error kind used in the Anthropic-shaped error
	/// envelope `{type: "error", error: {type, message}}`.
	pub fn kind(&self) -> &'static str {
		match self {
			DispatchError::RateLimited { .. } => "rate_limit_error",
			DispatchError::AuthInvalid { .. } => "authentication_error",
			DispatchError::AuthNetwork { .. } => "api_error",
			DispatchError::NoAccounts { .. } => "overloaded_error",
			DispatchError::MaxRetries { .. } => "api_error",
			DispatchError::Upstream { .. } => "api_error",
		}
	}

	/// Whether the dispatcher should keep retrying (possibly on a different
	/// account) after seeing this error, vs. treat it as terminal for the
	/// request.
	pub fn is_retryable(&self) -> bool {
		match self {
			DispatchError::RateLimited { .. } => true,
			DispatchError::AuthInvalid { .. } => true,
			DispatchError::AuthNetwork { .. } => true,
			DispatchError::Upstream { retryable, .. } => *retryable,
			DispatchError::NoAccounts { .. } => false,
			DispatchError::MaxRetries { .. } => false,
		}
	}
}
