// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Produce a usable bearer token and project id for an account, memoized
//! with a TTL.
//!
//! Grounded on `OAuthClient::get_access_token`: a read-lock fast path for a
//! fresh token, then a write-lock double-checked refresh. That pattern
//! coalesces concurrent callers for a single email without a separate
//! pending-future registry — adopted verbatim here for both the token
//! cache and the project-id cache, generalized from "one account, one
//! lock" to "one lock per email, created on first use".

use std::collections::HashMap;
use std::sync::Arc;

use cloudcode_core::{is_network_error_message, Account, AccountSource, DispatchError};
use cloudcode_secret::SecretString;
use tokio::sync::{Mutex as AsyncMutex, RwLock};

use crate::adapters::{DatabaseAuthReader, RefreshError, TokenRefresher};

/// How long a cached access token is considered fresh before a refresh is
/// attempted.
pub const TOKEN_REFRESH_INTERVAL_MS: u64 = 300_000;

#[derive(Clone)]
struct TokenCacheEntry {
	token: SecretString,
	extracted_at: u64,
}

impl TokenCacheEntry {
	fn is_fresh(&self, now: u64) -> bool {
		now.saturating_sub(self.extracted_at) < TOKEN_REFRESH_INTERVAL_MS
	}
}

/// The outcome of a successful `get_token` call: the bearer token, and
/// whether the account's `isInvalid` flag should now be cleared (it was
/// set, and this refresh proves the credential works again). The caller
/// (the dispatcher) applies that as a ledger mutation plus persist — the
/// resolver only classifies.
pub struct TokenResolution {
	pub token: SecretString,
	pub should_clear_invalid: bool,
}

/// Per-email single-flight locks for the token and project caches. A
/// caller that finds no entry for an email creates one lazily; the lock
/// itself, not this outer map, is what serializes concurrent refreshes.
#[derive(Default)]
struct Caches {
	tokens: AsyncMutex<HashMap<String, Arc<RwLock<Option<TokenCacheEntry>>>>>,
	projects: AsyncMutex<HashMap<String, Arc<RwLock<Option<String>>>>>,
}

async fn lock_for<T: Clone>(
	map: &AsyncMutex<HashMap<String, Arc<RwLock<Option<T>>>>>,
	email: &str,
) -> Arc<RwLock<Option<T>>> {
	let mut guard = map.lock().await;
	guard
		.entry(email.to_string())
		.or_insert_with(|| Arc::new(RwLock::new(None)))
		.clone()
}

pub struct CredentialResolver {
	refresher: Arc<dyn TokenRefresher>,
	database_reader: Option<Arc<dyn DatabaseAuthReader>>,
	default_project_id: String,
	project_discovery_endpoints: Vec<String>,
	caches: Caches,
}

impl CredentialResolver {
	pub fn new(
		refresher: Arc<dyn TokenRefresher>,
		database_reader: Option<Arc<dyn DatabaseAuthReader>>,
		default_project_id: impl Into<String>,
		project_discovery_endpoints: Vec<String>,
	) -> Self {
		Self {
			refresher,
			database_reader,
			default_project_id: default_project_id.into(),
			project_discovery_endpoints,
			caches: Caches::default(),
		}
	}

	/// Produce a bearer token usable for one upstream call against
	/// `account`.
	pub async fn get_token(&self, account: &Account, now: u64) -> Result<TokenResolution, DispatchError> {
		match account.source {
			AccountSource::Manual => {
				let api_key = account.api_key.clone().unwrap_or_default();
				Ok(TokenResolution {
					token: SecretString::new(api_key),
					should_clear_invalid: false,
				})
			}
			AccountSource::Database => {
				let reader = self.database_reader.as_ref().ok_or_else(|| DispatchError::AuthInvalid {
					email: account.email.clone(),
					reason: "no database auth reader configured".to_string(),
				})?;
				let credential = reader.read().await.map_err(|cause| DispatchError::AuthNetwork { cause })?;
				Ok(TokenResolution {
					token: credential.api_key,
					should_clear_invalid: false,
				})
			}
			AccountSource::Oauth => self.get_oauth_token(account, now).await,
		}
	}

	async fn get_oauth_token(&self, account: &Account, now: u64) -> Result<TokenResolution, DispatchError> {
		let lock = lock_for(&self.caches.tokens, &account.email).await;

		{
			let cached = lock.read().await;
			if let Some(entry) = cached.as_ref() {
				if entry.is_fresh(now) {
					return Ok(TokenResolution {
						token: entry.token.clone(),
						should_clear_invalid: false,
					});
				}
			}
		}

		let mut cached = lock.write().await;
		if let Some(entry) = cached.as_ref() {
			if entry.is_fresh(now) {
				return Ok(TokenResolution {
					token: entry.token.clone(),
					should_clear_invalid: false,
				});
			}
		}

		let refresh_token = account.refresh_token.clone().unwrap_or_default();
		match self.refresher.refresh(&refresh_token).await {
			Ok(refreshed) => {
				*cached = Some(TokenCacheEntry {
					token: refreshed.access_token.clone(),
					extracted_at: now,
				});
				Ok(TokenResolution {
					token: refreshed.access_token,
					should_clear_invalid: account.is_invalid,
				})
			}
			Err(RefreshError::InvalidGrant { reason }) => Err(DispatchError::AuthInvalid {
				email: account.email.clone(),
				reason,
			}),
			Err(RefreshError::Network { cause }) => {
				if is_network_error_message(&cause) {
					Err(DispatchError::AuthNetwork { cause })
				} else {
					Err(DispatchError::AuthInvalid {
						email: account.email.clone(),
						reason: cause,
					})
				}
			}
		}
	}

	/// Produce the Google Cloud project id to use for `account`, resolving
	/// through the cache, the account's configured project, or the
	/// `loadCodeAssist` discovery endpoints in order.
	pub async fn get_project(
		&self,
		account: &Account,
		token: &str,
		http: &dyn crate::adapters::UpstreamHttp,
	) -> String {
		let lock = lock_for(&self.caches.projects, &account.email).await;

		{
			let cached = lock.read().await;
			if let Some(project_id) = cached.as_ref() {
				return project_id.clone();
			}
		}

		let mut cached = lock.write().await;
		if let Some(project_id) = cached.as_ref() {
			return project_id.clone();
		}

		if let Some(project_id) = &account.project_id {
			*cached = Some(project_id.clone());
			return project_id.clone();
		}

		for endpoint in &self.project_discovery_endpoints {
			if let Some(project_id) = discover_project(http, endpoint, token).await {
				*cached = Some(project_id.clone());
				return project_id;
			}
		}

		tracing::warn!(email = %account.email, "project discovery exhausted, using default project id");
		self.default_project_id.clone()
	}

	/// Clears both caches for `email`, or every entry if `email` is `None`.
	/// Called by the Dispatcher when upstream returns `401/AUTH_INVALID`.
	pub async fn clear(&self, email: Option<&str>) {
		match email {
			Some(email) => {
				self.caches.tokens.lock().await.remove(email);
				self.caches.projects.lock().await.remove(email);
			}
			None => {
				self.caches.tokens.lock().await.clear();
				self.caches.projects.lock().await.clear();
			}
		}
	}
}

async fn discover_project(http: &dyn crate::adapters::UpstreamHttp, endpoint: &str, token: &str) -> Option<String> {
	let headers = vec![("Authorization".to_string(), format!("Bearer {token}"))];
	let response = http.post(endpoint, headers, serde_json::json!({}), false).await.ok()?;
	let crate::adapters::UpstreamResponse::Json { body, .. } = response else {
		return None;
	};
	match body.get("cloudaicompanionProject")? {
		serde_json::Value::String(id) => Some(id.clone()),
		serde_json::Value::Object(obj) => obj.get("id")?.as_str().map(str::to_string),
		_ => None,
	}
}
