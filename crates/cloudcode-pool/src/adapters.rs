// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! The narrow external-adapter traits the account pool depends on: a token
//! refresher, a database-credential reader, and an upstream HTTP
//! transport. `AccountStore` lives in `cloudcode_credentials`; `Clock`
//! lives in `cloudcode_core`.
//!
//! `TokenRefresher` is grounded on `oauth_flow::refresh_token`'s signature
//! and its `ExchangeResult::{Success,Failed}` split — distinguishing a
//! structured `invalid_grant` from a transport failure is exactly
//! `RefreshOutcome`'s job here. `UpstreamHttp` is new: per-provider clients
//! elsewhere in this codebase each own their `reqwest::Client` directly, but
//! the dispatcher needs an explicit narrow boundary so it can be tested
//! against a fake transport.

use async_trait::async_trait;
use bytes::Bytes;
use cloudcode_secret::SecretString;
use futures::stream::BoxStream;

/// A successfully refreshed OAuth access token.
#[derive(Debug, Clone)]
pub struct RefreshedToken {
	pub access_token: SecretString,
	pub expires_in_ms: u64,
}

/// The two ways a refresh can fail, distinguishably: a revoked/invalid
/// refresh token vs. a transport-level failure reaching the token
/// endpoint.
#[derive(Debug, Clone)]
pub enum RefreshError {
	/// The refresh token itself is no longer usable (`invalid_grant`).
	InvalidGrant { reason: String },
	/// A network or transport failure; the account is not at fault.
	Network { cause: String },
}

/// Turns an OAuth refresh token into a fresh access token. Implementations
/// talk to a specific provider's token endpoint.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
	async fn refresh(&self, refresh_token: &str) -> Result<RefreshedToken, RefreshError>;
}

/// The credential read from the Antigravity desktop app's local database,
/// for `source=database` accounts. The reader itself is out of scope for
/// this workspace; only this boundary is implemented here.
#[derive(Debug, Clone)]
pub struct DatabaseCredential {
	pub api_key: SecretString,
	pub email: Option<String>,
}

#[async_trait]
pub trait DatabaseAuthReader: Send + Sync {
	async fn read(&self) -> Result<DatabaseCredential, String>;
}

/// A byte stream from an upstream HTTP response, boxed so trait objects
/// can be used across the dispatcher without a generic parameter.
pub type UpstreamByteStream = BoxStream<'static, Result<Bytes, UpstreamTransportError>>;

#[derive(Debug, Clone, thiserror::Error)]
#[error("upstream transport error: {0}")]
pub struct UpstreamTransportError(pub String);

/// The result of an upstream call: either a unary JSON body or a streaming
/// byte response, selected by the `stream` flag on the request.
pub enum UpstreamResponse {
	Json {
		status: u16,
		body: serde_json::Value,
	},
	Stream {
		status: u16,
		body: UpstreamByteStream,
	},
}

/// `post(url, headers, jsonBody, {stream}) -> Response | AsyncByteStream`.
/// The core assumes cancellation propagates through the returned stream;
/// it implements no cancellation wiring of its own.
#[async_trait]
pub trait UpstreamHttp: Send + Sync {
	async fn post(
		&self,
		url: &str,
		headers: Vec<(String, String)>,
		body: serde_json::Value,
		stream: bool,
	) -> Result<UpstreamResponse, UpstreamTransportError>;
}

/// A `reqwest`-backed `UpstreamHttp`, grounded on
/// `loom_common_http::client::new_client`'s shared-client construction.
pub struct ReqwestUpstreamHttp {
	client: reqwest::Client,
}

impl ReqwestUpstreamHttp {
	pub fn new() -> reqwest::Result<Self> {
		Ok(Self {
			client: cloudcode_http::new_client()?,
		})
	}

	pub fn with_client(client: reqwest::Client) -> Self {
		Self { client }
	}
}

#[async_trait]
impl UpstreamHttp for ReqwestUpstreamHttp {
	async fn post(
		&self,
		url: &str,
		headers: Vec<(String, String)>,
		body: serde_json::Value,
		stream: bool,
	) -> Result<UpstreamResponse, UpstreamTransportError> {
		let mut request = self.client.post(url).json(&body);
		for (name, value) in headers {
			request = request.header(name, value);
		}
		let response = request
			.send()
			.await
			.map_err(|err| UpstreamTransportError(err.to_string()))?;
		let status = response.status().as_u16();

		if stream {
			use futures::StreamExt;
			let byte_stream = response
				.bytes_stream()
				.map(|chunk| chunk.map_err(|err| UpstreamTransportError(err.to_string())));
			Ok(UpstreamResponse::Stream {
				status,
				body: Box::pin(byte_stream),
			})
		} else {
			let body = response
				.json::<serde_json::Value>()
				.await
				.map_err(|err| UpstreamTransportError(err.to_string()))?;
			Ok(UpstreamResponse::Json { status, body })
		}
	}
}
