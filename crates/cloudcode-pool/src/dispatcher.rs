// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! End-to-end request lifecycle — select an account, resolve credentials,
//! call the upstream, translate the response, and retry on transient
//! failure.
//!
//! Grounded on two shapes combined: `AnthropicPool::complete`'s select →
//! call → classify → `mark_cooling`/`mark_disabled` loop (generalized here
//! to per-model cooldowns rather than account-level only) and `ZaiClient`'s
//! `RetryConfig`/`retry()` closure (for the *transient* HTTP-level
//! exponential back-off, reused here as `cloudcode_http::retry`'s bare
//! `backoff_delay` formula rather than the whole combinator, since this
//! loop re-selects an account between attempts instead of retrying the same
//! call in place).

use std::collections::HashMap;
use std::sync::{Arc, Mutex as SyncMutex};

use cloudcode_core::{is_auth_invalid_message, is_network_error_message, is_quota_message};
use cloudcode_core::{Account, AccountPool, Clock, DispatchError, ModelId};
use cloudcode_credentials::AccountStore;
use cloudcode_http::backoff_delay;
use cloudcode_translate::{
	anthropic_to_google, google_response_to_anthropic, is_thinking_model, AnthropicRequest, AnthropicResponse,
	AnthropicSseStream, CloudCodeEnvelope, GoogleRequest, GoogleStreamChunk, SseError, INTERLEAVED_THINKING_BETA,
};
use futures::stream::BoxStream;

use crate::adapters::{UpstreamByteStream, UpstreamHttp, UpstreamResponse};
use crate::resolver::CredentialResolver;
use crate::selector::{self, SelectionStrategy};
use crate::ledger;

/// A fully-translated Anthropic SSE wire string, or a translation failure.
pub type TranslatedEventStream = BoxStream<'static, Result<String, SseError>>;

/// Google Cloud Code hosts tried in order on every attempt. Compiled in,
/// matching the convention used elsewhere for provider endpoint constants
/// (`oauth_flow::TOKEN_ENDPOINT`) — overridable via `DispatcherConfig`
/// rather than a hardcoded `const`, since a deployment-specific value has
/// no business being baked into the binary.
pub fn default_endpoints() -> Vec<String> {
	vec!["https://cloudcode-pa.googleapis.com".to_string()]
}

/// Upper bound on how long the dispatcher will sleep in one go while
/// waiting for a rate limit to clear, regardless of the ledger's reported
/// `min_wait`.
pub const MAX_WAIT_MS: u64 = 30_000;

/// Request envelope the Dispatcher consumes: the client's Anthropic
/// Messages API request plus lifecycle knobs not part of that wire format.
#[derive(Debug, Clone)]
pub struct DispatchRequest {
	pub anthropic: AnthropicRequest,
	/// Absolute wall-clock instant (epoch ms) by which the request must
	/// complete; checked before every attempt and before every back-off
	/// sleep. `None` means no deadline.
	pub deadline_ms: Option<u64>,
	/// Whether the dispatcher may substitute a fallback model (per
	/// `DispatcherConfig::model_fallback`) when every account is
	/// rate-limited for the requested model.
	pub allow_model_fallback: bool,
}

/// Compiled-in, per-instance dispatcher configuration: endpoint fallback
/// list, optional model-fallback mapping, and the account-selection
/// strategy. Retry budget and cooldown duration live on
/// `AccountPool::settings`, not here.
pub struct DispatcherConfig {
	pub endpoints: Vec<String>,
	pub model_fallback: HashMap<ModelId, ModelId>,
	pub max_wait_ms: u64,
	pub strategy: SelectionStrategy,
	/// `X-Goog-Api-Client` header value sent on every upstream call.
	pub api_client_header: String,
	/// `Client-Metadata` header value sent on every upstream call.
	pub client_metadata_header: String,
}

impl Default for DispatcherConfig {
	fn default() -> Self {
		Self {
			endpoints: default_endpoints(),
			model_fallback: HashMap::new(),
			max_wait_ms: MAX_WAIT_MS,
			strategy: SelectionStrategy::default(),
			api_client_header: "gl-rust/cloudcode".to_string(),
			client_metadata_header: "ideType=IDE_UNSPECIFIED,platform=PLATFORM_UNSPECIFIED,pluginType=GEMINI"
				.to_string(),
		}
	}
}

/// Owns the `AccountPool`, the credential caches (via the resolver), and
/// drives the retry loop. The pool lock is a plain `std::sync::Mutex`: its
/// critical sections are short, in-memory decisions and are never held
/// across upstream I/O or token-refresh I/O.
pub struct Dispatcher {
	pool: SyncMutex<AccountPool>,
	resolver: CredentialResolver,
	store: Arc<dyn AccountStore>,
	http: Arc<dyn UpstreamHttp>,
	clock: Arc<dyn Clock>,
	config: DispatcherConfig,
}

enum Outcome {
	Json(serde_json::Value),
	Stream(UpstreamByteStream),
}

/// How one attempt against a single selected account failed, classified so
/// the outer loop knows whether to re-select, back off in place, or fail
/// the request outright.
enum AttemptError {
	RateLimited { reset_ms: Option<u64> },
	AuthInvalid { reason: String },
	Retryable,
	Terminal(DispatchError),
}

enum UpstreamClassification {
	RateLimited { reset_ms: Option<u64> },
	AuthInvalid { reason: String },
	Retryable,
	Terminal { error_type: String },
}

impl Dispatcher {
	pub fn new(
		pool: AccountPool,
		resolver: CredentialResolver,
		store: Arc<dyn AccountStore>,
		http: Arc<dyn UpstreamHttp>,
		clock: Arc<dyn Clock>,
		config: DispatcherConfig,
	) -> Self {
		Self {
			pool: SyncMutex::new(pool),
			resolver,
			store,
			http,
			clock,
			config,
		}
	}

	/// A snapshot of the current pool, for health/status reporting.
	pub fn pool_snapshot(&self) -> AccountPool {
		self.pool.lock().expect("pool mutex poisoned").clone()
	}

	/// `send-message(req)`: the unary path. Builds the Google request once,
	/// dispatches it through the retry loop, and assembles a complete
	/// Anthropic Messages API response from the single upstream reply.
	pub async fn send_message(&self, request: DispatchRequest) -> Result<AnthropicResponse, DispatchError> {
		let google_request = anthropic_to_google(&request.anthropic);
		let outcome = self.dispatch_loop(&request, &google_request, false).await?;
		let Outcome::Json(body) = outcome else {
			unreachable!("a unary dispatch never yields a streaming outcome");
		};
		let chunk: GoogleStreamChunk = serde_json::from_value(body).map_err(|err| DispatchError::Upstream {
			status_code: 502,
			error_type: format!("malformed upstream body: {err}"),
			retryable: false,
		})?;
		let message_id = format!("msg_{}", uuid::Uuid::new_v4());
		Ok(google_response_to_anthropic(message_id, request.anthropic.model.clone(), &chunk))
	}

	/// `send-message-stream(req, sink)`: the streaming path. Returns a
	/// stream of already-translated Anthropic SSE wire strings; the caller
	/// writes each item to its sink in order.
	pub async fn send_message_stream(
		&self,
		request: DispatchRequest,
	) -> Result<TranslatedEventStream, DispatchError> {
		let google_request = anthropic_to_google(&request.anthropic);
		let outcome = self.dispatch_loop(&request, &google_request, true).await?;
		let Outcome::Stream(bytes) = outcome else {
			unreachable!("a streaming dispatch never yields a unary outcome");
		};
		let message_id = format!("msg_{}", uuid::Uuid::new_v4());
		let translated = AnthropicSseStream::new(bytes, message_id, request.anthropic.model.clone());
		Ok(Box::pin(translated))
	}

	async fn dispatch_loop(
		&self,
		request: &DispatchRequest,
		google_request: &GoogleRequest,
		stream: bool,
	) -> Result<Outcome, DispatchError> {
		let mut attempts: u32 = 0;
		let mut model = request.anthropic.model.clone();
		let mut tried_model_fallback = false;

		loop {
			let now = self.clock.now_ms();
			if let Some(deadline) = request.deadline_ms {
				if now >= deadline {
					return Err(DispatchError::MaxRetries { attempts });
				}
			}

			let max_retries = {
				let pool = self.pool.lock().expect("pool mutex poisoned");
				pool.settings.max_retries
			};
			if attempts >= max_retries {
				return Err(DispatchError::MaxRetries { attempts });
			}

			let model_id = ModelId::new_checked(model.as_str());
			let allow_fallback = request.allow_model_fallback && !tried_model_fallback;
			let selection = self.select_or_decide(&model_id, now, allow_fallback);

			match selection {
				Selection::Account(account) => {
					match self.attempt_account(&account, &model, google_request, stream, now).await {
						Ok(outcome) => {
							self.touch_last_used(&account.email, now).await;
							return Ok(outcome);
						}
						Err(AttemptError::RateLimited { reset_ms }) => {
							self.record_rate_limited(&account.email, reset_ms, &model_id, now).await;
							attempts += 1;
						}
						Err(AttemptError::AuthInvalid { reason }) => {
							self.record_invalid(&account.email, reason, now).await;
							self.resolver.clear(Some(&account.email)).await;
							attempts += 1;
						}
						Err(AttemptError::Retryable) => {
							attempts += 1;
							if let Some(deadline) = request.deadline_ms {
								if self.clock.now_ms() >= deadline {
									return Err(DispatchError::MaxRetries { attempts });
								}
							}
							tokio::time::sleep(backoff_delay(attempts)).await;
						}
						Err(AttemptError::Terminal(err)) => return Err(err),
					}
				}
				Selection::Fallback(fallback_model) => {
					tried_model_fallback = true;
					model = fallback_model.as_str().to_string();
				}
				Selection::Wait(wait_ms) => {
					if let Some(deadline) = request.deadline_ms {
						if self.clock.now_ms() >= deadline {
							return Err(DispatchError::MaxRetries { attempts });
						}
					}
					tokio::time::sleep(std::time::Duration::from_millis(wait_ms)).await;
				}
				Selection::NoAccounts { all_rate_limited } => {
					return Err(DispatchError::NoAccounts { all_rate_limited });
				}
				Selection::AuthExhausted { email, reason } => {
					return Err(DispatchError::AuthInvalid { email, reason });
				}
			}
		}
	}

	/// Clears expired cooldowns and decides what the dispatcher should do
	/// next: dispatch to a chosen account, fall back to a different model,
	/// wait for a cooldown to clear, or give up. Never mutates anything
	/// beyond `activeIndex`/expired-cooldown bookkeeping, both of which are
	/// pure ledger/selector operations.
	fn select_or_decide(&self, model_id: &ModelId, now: u64, allow_fallback: bool) -> Selection {
		let mut pool = self.pool.lock().expect("pool mutex poisoned");
		ledger::clear_expired(&mut pool, now);
		let available = ledger::available_accounts(&pool, Some(model_id), now);

		if available.is_empty() {
			let wait = selector::should_wait(&pool, model_id, now);
			if !wait.should_wait {
				// `should_wait` is false either because the pool is empty, or
				// because at least one account is invalid (an invalid account
				// can never become available by waiting). Distinguish the two:
				// an invalid-only exhaustion is an auth failure the client
				// should see as 401, not the generic 503 `NoAccounts`.
				if let Some(invalid) = pool.accounts.iter().find(|account| account.is_invalid) {
					return Selection::AuthExhausted {
						email: invalid.email.clone(),
						reason: invalid
							.invalid_reason
							.clone()
							.unwrap_or_else(|| "account marked invalid".to_string()),
					};
				}
				return Selection::NoAccounts { all_rate_limited: false };
			}
			if allow_fallback {
				if let Some(fallback) = self.config.model_fallback.get(model_id) {
					return Selection::Fallback(fallback.clone());
				}
			}
			return Selection::Wait(wait.wait_ms.min(self.config.max_wait_ms));
		}

		let result = selector::select(&mut pool, model_id, now, self.config.strategy);
		match result.account_index {
			Some(index) => {
				pool.active_index = result.new_active_index;
				Selection::Account(pool.accounts[index].clone())
			}
			None => Selection::NoAccounts { all_rate_limited: false },
		}
	}

	async fn attempt_account(
		&self,
		account: &Account,
		model: &str,
		google_request: &GoogleRequest,
		stream: bool,
		now: u64,
	) -> Result<Outcome, AttemptError> {
		let resolution = self
			.resolver
			.get_token(account, now)
			.await
			.map_err(classify_resolver_error)?;
		if resolution.should_clear_invalid {
			self.record_clear_invalid(&account.email).await;
		}

		let project = self.resolver.get_project(account, resolution.token.expose(), self.http.as_ref()).await;
		let envelope = CloudCodeEnvelope::new(project, model, google_request.clone());
		let body = serde_json::to_value(&envelope).map_err(|err| {
			AttemptError::Terminal(DispatchError::Upstream {
				status_code: 500,
				error_type: format!("failed to serialize upstream request: {err}"),
				retryable: false,
			})
		})?;
		let headers = self.build_headers(resolution.token.expose(), model);

		let method = if stream { "streamGenerateContent" } else { "generateContent" };
		let mut saw_retryable = false;
		for endpoint in &self.config.endpoints {
			let url = format!("{endpoint}/v1internal:{method}");
			match self.http.post(&url, headers.clone(), body.clone(), stream).await {
				Ok(response) => {
					let status = match &response {
						UpstreamResponse::Json { status, .. } => *status,
						UpstreamResponse::Stream { status, .. } => *status,
					};
					if (200..300).contains(&status) {
						return Ok(match response {
							UpstreamResponse::Json { body, .. } => Outcome::Json(body),
							UpstreamResponse::Stream { body, .. } => Outcome::Stream(body),
						});
					}
					let error_body = match response {
						UpstreamResponse::Json { body, .. } => body,
						UpstreamResponse::Stream { .. } => serde_json::Value::Null,
					};
					match classify_upstream_status(status, &error_body) {
						UpstreamClassification::RateLimited { reset_ms } => {
							return Err(AttemptError::RateLimited { reset_ms })
						}
						UpstreamClassification::AuthInvalid { reason } => {
							return Err(AttemptError::AuthInvalid { reason })
						}
						UpstreamClassification::Retryable => {
							saw_retryable = true;
							continue;
						}
						UpstreamClassification::Terminal { error_type } => {
							return Err(AttemptError::Terminal(DispatchError::Upstream {
								status_code: status,
								error_type,
								retryable: false,
							}))
						}
					}
				}
				Err(transport_err) => {
					if is_network_error_message(&transport_err.0) {
						saw_retryable = true;
						continue;
					}
					return Err(AttemptError::Terminal(DispatchError::Upstream {
						status_code: 0,
						error_type: transport_err.0,
						retryable: false,
					}));
				}
			}
		}
		if saw_retryable {
			Err(AttemptError::Retryable)
		} else {
			Err(AttemptError::Terminal(DispatchError::Upstream {
				status_code: 0,
				error_type: "no upstream endpoint configured".to_string(),
				retryable: false,
			}))
		}
	}

	fn build_headers(&self, token: &str, model: &str) -> Vec<(String, String)> {
		let mut headers = vec![
			("Authorization".to_string(), format!("Bearer {token}")),
			("Content-Type".to_string(), "application/json".to_string()),
			("X-Goog-Api-Client".to_string(), self.config.api_client_header.clone()),
			("Client-Metadata".to_string(), self.config.client_metadata_header.clone()),
		];
		if is_thinking_model(model) {
			headers.push(("anthropic-beta".to_string(), INTERLEAVED_THINKING_BETA.to_string()));
		}
		headers
	}

	/// Mutates the pool under the coarse lock, persists the snapshot
	/// outside it, and no-ops (without persisting) when `mutate` reports no
	/// change — e.g. `mark_rate_limited` against an unknown email.
	async fn mutate_and_persist(&self, mutate: impl FnOnce(&mut AccountPool) -> bool) {
		let snapshot = {
			let mut pool = self.pool.lock().expect("pool mutex poisoned");
			if !mutate(&mut pool) {
				return;
			}
			pool.clone()
		};
		if let Err(err) = self.store.save(&snapshot).await {
			tracing::warn!(error = %err, "failed to persist account pool after mutation");
		}
	}

	async fn touch_last_used(&self, email: &str, now: u64) {
		self.mutate_and_persist(|pool| match pool.find_mut(email) {
			Some(account) => {
				account.last_used = Some(now);
				true
			}
			None => false,
		})
		.await;
	}

	async fn record_rate_limited(&self, email: &str, reset_ms: Option<u64>, model: &ModelId, now: u64) {
		self.mutate_and_persist(|pool| ledger::mark_rate_limited(pool, email, reset_ms, model, now))
			.await;
	}

	async fn record_invalid(&self, email: &str, reason: String, now: u64) {
		self.mutate_and_persist(|pool| ledger::mark_invalid(pool, email, reason.clone(), now))
			.await;
	}

	async fn record_clear_invalid(&self, email: &str) {
		self.mutate_and_persist(|pool| ledger::clear_invalid(pool, email)).await;
	}
}

enum Selection {
	Account(Account),
	Fallback(ModelId),
	Wait(u64),
	NoAccounts { all_rate_limited: bool },
	/// Every account is unavailable and at least one is invalid, rather than
	/// merely rate-limited — surfaced as `DispatchError::AuthInvalid` (401)
	/// instead of the generic `NoAccounts` (503).
	AuthExhausted { email: String, reason: String },
}

fn classify_resolver_error(err: DispatchError) -> AttemptError {
	match err {
		DispatchError::AuthInvalid { reason, .. } => AttemptError::AuthInvalid { reason },
		DispatchError::AuthNetwork { .. } => AttemptError::Retryable,
		other => AttemptError::Terminal(other),
	}
}

fn classify_upstream_status(status: u16, body: &serde_json::Value) -> UpstreamClassification {
	let message = extract_error_message(body).unwrap_or_default();
	if status == 429 || is_quota_message(&message) {
		return UpstreamClassification::RateLimited {
			reset_ms: find_retry_delay_ms(body),
		};
	}
	if status == 401 || status == 403 || is_auth_invalid_message(&message) {
		return UpstreamClassification::AuthInvalid {
			reason: if message.is_empty() {
				format!("http {status}")
			} else {
				message
			},
		};
	}
	if (500..600).contains(&status) {
		return UpstreamClassification::Retryable;
	}
	UpstreamClassification::Terminal {
		error_type: extract_error_status(body).unwrap_or_else(|| format!("http_{status}")),
	}
}

fn extract_error_message(body: &serde_json::Value) -> Option<String> {
	body.get("error")?.get("message")?.as_str().map(str::to_string)
}

fn extract_error_status(body: &serde_json::Value) -> Option<String> {
	body.get("error")?.get("status")?.as_str().map(str::to_string)
}

/// Searches a Google error body for a `google.rpc.RetryInfo`-shaped
/// `retryDelay` field (e.g. `"30s"`) at any depth, returning its value in
/// milliseconds.
fn find_retry_delay_ms(value: &serde_json::Value) -> Option<u64> {
	match value {
		serde_json::Value::Object(map) => {
			if let Some(serde_json::Value::String(delay)) = map.get("retryDelay") {
				if let Some(ms) = parse_seconds_suffix_to_ms(delay) {
					return Some(ms);
				}
			}
			map.values().find_map(find_retry_delay_ms)
		}
		serde_json::Value::Array(items) => items.iter().find_map(find_retry_delay_ms),
		_ => None,
	}
}

fn parse_seconds_suffix_to_ms(value: &str) -> Option<u64> {
	let seconds: f64 = value.strip_suffix('s')?.parse().ok()?;
	Some((seconds * 1000.0).round() as u64)
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use async_trait::async_trait;
	use cloudcode_core::clock::manual::ManualClock;
	use cloudcode_core::{AccountSource, PoolSettings};
	use cloudcode_credentials::MemoryAccountStore;
	use cloudcode_translate::{AnthropicMessage, AnthropicMessageContent, AnthropicRole};

	use super::*;
	use crate::adapters::{RefreshError, RefreshedToken, TokenRefresher, UpstreamTransportError};
	use crate::resolver::{CredentialResolver, TOKEN_REFRESH_INTERVAL_MS};

	fn oauth_account(email: &str) -> Account {
		Account::new(email, AccountSource::Oauth, 0).with_refresh_token("rt")
	}

	fn sample_request() -> AnthropicRequest {
		AnthropicRequest {
			model: "gemini-2.0-flash".to_string(),
			messages: vec![AnthropicMessage {
				role: AnthropicRole::User,
				content: AnthropicMessageContent::Text("hello".to_string()),
			}],
			max_tokens: 256,
			system: None,
			temperature: None,
			tools: None,
			stop_sequences: None,
			stream: Some(false),
		}
	}

	struct WorkingRefresher;
	#[async_trait]
	impl TokenRefresher for WorkingRefresher {
		async fn refresh(&self, _refresh_token: &str) -> Result<RefreshedToken, RefreshError> {
			Ok(RefreshedToken {
				access_token: cloudcode_secret::SecretString::new("token"),
				expires_in_ms: TOKEN_REFRESH_INTERVAL_MS,
			})
		}
	}

	fn resolver() -> CredentialResolver {
		CredentialResolver::new(Arc::new(WorkingRefresher), None, "default-project", vec![])
	}

	fn success_body() -> serde_json::Value {
		serde_json::json!({
			"candidates": [{
				"content": {"role": "model", "parts": [{"text": "hi"}]},
				"finishReason": "STOP",
			}]
		})
	}

	struct ScriptedHttp {
		responses: SyncMutex<Vec<Result<(u16, serde_json::Value), String>>>,
		calls: AtomicUsize,
	}

	impl ScriptedHttp {
		fn new(responses: Vec<Result<(u16, serde_json::Value), String>>) -> Self {
			Self {
				responses: SyncMutex::new(responses),
				calls: AtomicUsize::new(0),
			}
		}
	}

	#[async_trait]
	impl UpstreamHttp for ScriptedHttp {
		async fn post(
			&self,
			_url: &str,
			_headers: Vec<(String, String)>,
			_body: serde_json::Value,
			_stream: bool,
		) -> Result<UpstreamResponse, UpstreamTransportError> {
			self.calls.fetch_add(1, Ordering::SeqCst);
			let mut responses = self.responses.lock().unwrap();
			if responses.is_empty() {
				return Err(UpstreamTransportError("no more scripted responses".to_string()));
			}
			match responses.remove(0) {
				Ok((status, body)) => Ok(UpstreamResponse::Json { status, body }),
				Err(cause) => Err(UpstreamTransportError(cause)),
			}
		}
	}

	fn pool_with(accounts: Vec<Account>) -> AccountPool {
		AccountPool::new(accounts, PoolSettings::default())
	}

	fn dispatcher(
		pool: AccountPool,
		http: Arc<dyn UpstreamHttp>,
		clock: Arc<dyn Clock>,
	) -> Dispatcher {
		Dispatcher::new(
			pool,
			resolver(),
			Arc::new(MemoryAccountStore::new(AccountPool::empty())),
			http,
			clock,
			DispatcherConfig::default(),
		)
	}

	#[tokio::test]
	async fn successful_unary_dispatch_assembles_anthropic_response_and_touches_last_used() {
		let http = Arc::new(ScriptedHttp::new(vec![Ok((200, success_body()))]));
		let clock = Arc::new(ManualClock::new(1_000));
		let dispatcher = dispatcher(pool_with(vec![oauth_account("a@example.com")]), http, clock);

		let response = dispatcher
			.send_message(DispatchRequest {
				anthropic: sample_request(),
				deadline_ms: None,
				allow_model_fallback: false,
			})
			.await
			.unwrap();

		assert_eq!(response.stop_reason.as_deref(), Some("end_turn"));
		assert_eq!(dispatcher.pool_snapshot().accounts[0].last_used, Some(1_000));
	}

	#[tokio::test]
	async fn fail_over_on_rate_limit_moves_to_the_other_account() {
		let rate_limited_body = serde_json::json!({"error": {"message": "RESOURCE_EXHAUSTED: quota", "status": "RESOURCE_EXHAUSTED"}});
		let http = Arc::new(ScriptedHttp::new(vec![Ok((429, rate_limited_body)), Ok((200, success_body()))]));
		let clock = Arc::new(ManualClock::new(1_000));
		let dispatcher = dispatcher(
			pool_with(vec![oauth_account("a@example.com"), oauth_account("b@example.com")]),
			http,
			clock,
		);

		let response = dispatcher
			.send_message(DispatchRequest {
				anthropic: sample_request(),
				deadline_ms: None,
				allow_model_fallback: false,
			})
			.await
			.unwrap();
		assert_eq!(response.stop_reason.as_deref(), Some("end_turn"));

		let pool = dispatcher.pool_snapshot();
		let a = pool.find("a@example.com").unwrap();
		assert!(a.model_rate_limits.values().next().unwrap().is_rate_limited);
		let b = pool.find("b@example.com").unwrap();
		assert_eq!(b.last_used, Some(1_000));
	}

	#[tokio::test]
	async fn auth_invalid_exhaustion_surfaces_as_401() {
		struct InvalidGrantRefresher;
		#[async_trait]
		impl TokenRefresher for InvalidGrantRefresher {
			async fn refresh(&self, _refresh_token: &str) -> Result<RefreshedToken, RefreshError> {
				Err(RefreshError::InvalidGrant {
					reason: "invalid_grant".to_string(),
				})
			}
		}

		let http: Arc<dyn UpstreamHttp> = Arc::new(ScriptedHttp::new(vec![]));
		let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(1_000));
		let dispatcher = Dispatcher::new(
			pool_with(vec![oauth_account("a@example.com")]),
			CredentialResolver::new(Arc::new(InvalidGrantRefresher), None, "default-project", vec![]),
			Arc::new(MemoryAccountStore::new(AccountPool::empty())),
			http,
			clock,
			DispatcherConfig::default(),
		);

		let err = dispatcher
			.send_message(DispatchRequest {
				anthropic: sample_request(),
				deadline_ms: None,
				allow_model_fallback: false,
			})
			.await
			.unwrap_err();

		assert!(matches!(
			err,
			DispatchError::AuthInvalid { ref email, ref reason }
				if email == "a@example.com" && reason == "invalid_grant"
		));
		assert_eq!(err.client_status(), 401);
		assert!(dispatcher.pool_snapshot().accounts[0].is_invalid);
	}

	#[tokio::test]
	async fn endpoint_fallback_tries_the_next_host_on_a_5xx_before_marking_the_account() {
		struct TwoHostHttp {
			calls: SyncMutex<Vec<String>>,
		}
		#[async_trait]
		impl UpstreamHttp for TwoHostHttp {
			async fn post(
				&self,
				url: &str,
				_headers: Vec<(String, String)>,
				_body: serde_json::Value,
				_stream: bool,
			) -> Result<UpstreamResponse, UpstreamTransportError> {
				self.calls.lock().unwrap().push(url.to_string());
				if url.contains("primary") {
					Ok(UpstreamResponse::Json {
						status: 503,
						body: serde_json::json!({"error": {"message": "unavailable"}}),
					})
				} else {
					Ok(UpstreamResponse::Json {
						status: 200,
						body: success_body(),
					})
				}
			}
		}

		let http = Arc::new(TwoHostHttp {
			calls: SyncMutex::new(Vec::new()),
		});
		let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(1_000));
		let mut config = DispatcherConfig::default();
		config.endpoints = vec![
			"https://primary.example.com".to_string(),
			"https://secondary.example.com".to_string(),
		];
		let dispatcher = Dispatcher::new(
			pool_with(vec![oauth_account("a@example.com")]),
			resolver(),
			Arc::new(MemoryAccountStore::new(AccountPool::empty())),
			http.clone(),
			clock,
			config,
		);

		let response = dispatcher
			.send_message(DispatchRequest {
				anthropic: sample_request(),
				deadline_ms: None,
				allow_model_fallback: false,
			})
			.await
			.unwrap();
		assert_eq!(response.stop_reason.as_deref(), Some("end_turn"));
		assert_eq!(http.calls.lock().unwrap().len(), 2);
		assert!(!dispatcher.pool_snapshot().accounts[0].is_invalid);
	}

	#[tokio::test]
	async fn persistent_5xx_exhausts_retries_and_fails_with_max_retries() {
		let http = Arc::new(ScriptedHttp::new(vec![
			Ok((503, serde_json::json!({"error": {"message": "unavailable"}}))),
			Ok((503, serde_json::json!({"error": {"message": "unavailable"}}))),
			Ok((503, serde_json::json!({"error": {"message": "unavailable"}}))),
			Ok((503, serde_json::json!({"error": {"message": "unavailable"}}))),
			Ok((503, serde_json::json!({"error": {"message": "unavailable"}}))),
		]));
		let clock = Arc::new(ManualClock::new(1_000));
		let mut pool = pool_with(vec![oauth_account("a@example.com")]);
		pool.settings.max_retries = 3;
		let dispatcher = dispatcher(pool, http, clock);

		let err = dispatcher
			.send_message(DispatchRequest {
				anthropic: sample_request(),
				deadline_ms: None,
				allow_model_fallback: false,
			})
			.await
			.unwrap_err();
		assert!(matches!(err, DispatchError::MaxRetries { attempts: 3 }));
	}

	#[tokio::test]
	async fn no_accounts_on_an_empty_pool_does_not_wait() {
		let http: Arc<dyn UpstreamHttp> = Arc::new(ScriptedHttp::new(vec![]));
		let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(1_000));
		let dispatcher = Dispatcher::new(
			AccountPool::empty(),
			resolver(),
			Arc::new(MemoryAccountStore::new(AccountPool::empty())),
			http,
			clock,
			DispatcherConfig::default(),
		);
		let err = dispatcher
			.send_message(DispatchRequest {
				anthropic: sample_request(),
				deadline_ms: None,
				allow_model_fallback: false,
			})
			.await
			.unwrap_err();
		assert!(matches!(err, DispatchError::NoAccounts { all_rate_limited: false }));
	}

	#[tokio::test]
	async fn thinking_model_request_attaches_interleaved_thinking_beta_header() {
		struct HeaderCapturingHttp {
			seen_headers: SyncMutex<Vec<(String, String)>>,
		}
		#[async_trait]
		impl UpstreamHttp for HeaderCapturingHttp {
			async fn post(
				&self,
				_url: &str,
				headers: Vec<(String, String)>,
				_body: serde_json::Value,
				_stream: bool,
			) -> Result<UpstreamResponse, UpstreamTransportError> {
				*self.seen_headers.lock().unwrap() = headers;
				Ok(UpstreamResponse::Json {
					status: 200,
					body: success_body(),
				})
			}
		}

		let http = Arc::new(HeaderCapturingHttp {
			seen_headers: SyncMutex::new(Vec::new()),
		});
		let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(1_000));
		let dispatcher = Dispatcher::new(
			pool_with(vec![oauth_account("a@example.com")]),
			resolver(),
			Arc::new(MemoryAccountStore::new(AccountPool::empty())),
			http.clone(),
			clock,
			DispatcherConfig::default(),
		);

		let mut request = sample_request();
		request.model = "claude-opus-4-thinking".to_string();
		dispatcher
			.send_message(DispatchRequest {
				anthropic: request,
				deadline_ms: None,
				allow_model_fallback: false,
			})
			.await
			.unwrap();

		let headers = http.seen_headers.lock().unwrap();
		assert!(headers.iter().any(|(name, value)| name == "anthropic-beta" && value == INTERLEAVED_THINKING_BETA));
	}

	#[test]
	fn retry_delay_is_parsed_from_nested_google_error_body() {
		let body = serde_json::json!({
			"error": {
				"code": 429,
				"message": "RESOURCE_EXHAUSTED",
				"details": [{"@type": "type.googleapis.com/google.rpc.RetryInfo", "retryDelay": "30s"}]
			}
		});
		assert_eq!(find_retry_delay_ms(&body), Some(30_000));
	}

	#[test]
	fn classification_treats_401_as_auth_invalid_regardless_of_body() {
		let classification = classify_upstream_status(401, &serde_json::Value::Null);
		assert!(matches!(classification, UpstreamClassification::AuthInvalid { .. }));
	}

	#[test]
	fn classification_treats_other_4xx_as_terminal() {
		let classification = classify_upstream_status(400, &serde_json::json!({"error": {"status": "INVALID_ARGUMENT"}}));
		match classification {
			UpstreamClassification::Terminal { error_type } => assert_eq!(error_type, "INVALID_ARGUMENT"),
			_ => panic!("expected terminal classification"),
		}
	}
}
