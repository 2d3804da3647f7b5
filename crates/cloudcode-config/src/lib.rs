// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Environment-variable driven configuration for the account pool and
//! dispatcher.
//!
//! Follows the `VAR` / `VAR_FILE` secret convention ([`env::load_secret_env`])
//! and the "load everything, apply defaults, validate at the end" shape used
//! throughout this codebase's other `from_env` constructors.

pub mod env;

pub use cloudcode_secret::SecretString;
pub use env::{load_secret_env, require_secret_env, ConfigError, RequiredSecretError, SecretEnvError};

use std::path::PathBuf;

use cloudcode_core::PoolSettings;
use tracing::{debug, info};

/// Default upstream host, matching `cloudcode_pool::dispatcher::default_endpoints`.
const DEFAULT_UPSTREAM_ENDPOINT: &str = "https://cloudcode-pa.googleapis.com";

/// Default Cloud Resource Manager host used for ambient project-id discovery.
const DEFAULT_PROJECT_DISCOVERY_ENDPOINT: &str = "https://cloudresourcemanager.googleapis.com";

/// Upper bound a dispatcher will ever sleep for a single all-rate-limited
/// wait, absent an explicit `CLOUDCODE_MAX_WAIT_MS` override.
const DEFAULT_MAX_WAIT_MS: u64 = 30_000;

/// Account-pool and dispatcher configuration, assembled from the process
/// environment.
///
/// No field here has a hardcoded "right" value baked into calling code: the
/// compiled-in defaults below exist so a deployment can omit the variable
/// entirely, not so the defaults are load-bearing.
#[derive(Clone, Debug)]
pub struct PoolConfig {
	/// Path to the on-disk account store JSON file.
	pub account_store_path: PathBuf,

	/// Google Cloud project id used when an account has none of its own and
	/// discovery is unavailable or disabled.
	pub default_project_id: String,

	/// Hosts queried, in order, when resolving a project id for an account
	/// that doesn't carry one.
	pub project_discovery_endpoints: Vec<String>,

	/// Upstream Cloud Code hosts the dispatcher rotates across within a
	/// single attempt.
	pub upstream_endpoints: Vec<String>,

	/// How long an account stays excluded from selection after a rate limit.
	pub cooldown_duration_ms: u64,

	/// Attempts (account switches plus backoff retries) before a dispatch
	/// gives up with [`cloudcode_core::DispatchError::MaxRetries`].
	pub max_retries: u32,

	/// Cap on how long the dispatcher will sleep when every account is
	/// rate-limited and no model fallback is available.
	pub max_wait_ms: u64,

	/// OAuth client id used by the token refresher adapter, if configured
	/// via the environment rather than supplied programmatically.
	pub oauth_client_id: Option<String>,

	/// OAuth client secret, loaded with `_FILE` indirection support.
	pub oauth_client_secret: Option<SecretString>,
}

impl PoolConfig {
	/// Loads configuration from the environment, applying the compiled-in
	/// defaults documented on each field for anything unset.
	///
	/// Recognized variables:
	/// - `CLOUDCODE_ACCOUNT_STORE_PATH` (default: `accounts.json`)
	/// - `CLOUDCODE_DEFAULT_PROJECT_ID`
	/// - `CLOUDCODE_PROJECT_DISCOVERY_ENDPOINTS` (comma-separated)
	/// - `CLOUDCODE_UPSTREAM_ENDPOINTS` (comma-separated)
	/// - `CLOUDCODE_COOLDOWN_SECS` (default: 60)
	/// - `CLOUDCODE_MAX_RETRIES` (default: 5)
	/// - `CLOUDCODE_MAX_WAIT_MS` (default: 30000)
	/// - `CLOUDCODE_OAUTH_CLIENT_ID`
	/// - `CLOUDCODE_OAUTH_CLIENT_SECRET` (or `_FILE`)
	pub fn from_env() -> Result<Self, ConfigError> {
		debug!("loading pool configuration from environment");

		let account_store_path =
			PathBuf::from(env::var_or("CLOUDCODE_ACCOUNT_STORE_PATH", "accounts.json"));
		let default_project_id = env::var_or("CLOUDCODE_DEFAULT_PROJECT_ID", "");
		let project_discovery_endpoints = env::list_env(
			"CLOUDCODE_PROJECT_DISCOVERY_ENDPOINTS",
			vec![DEFAULT_PROJECT_DISCOVERY_ENDPOINT.to_string()],
		);
		let upstream_endpoints = env::list_env(
			"CLOUDCODE_UPSTREAM_ENDPOINTS",
			vec![DEFAULT_UPSTREAM_ENDPOINT.to_string()],
		);
		let cooldown_secs = env::u64_env("CLOUDCODE_COOLDOWN_SECS", 60)?;
		let max_retries = env::u64_env("CLOUDCODE_MAX_RETRIES", 5)? as u32;
		let max_wait_ms = env::u64_env("CLOUDCODE_MAX_WAIT_MS", DEFAULT_MAX_WAIT_MS)?;
		let oauth_client_id = std::env::var("CLOUDCODE_OAUTH_CLIENT_ID").ok();
		let oauth_client_secret = env::load_secret_env("CLOUDCODE_OAUTH_CLIENT_SECRET")?;

		info!(
			account_store_path = %account_store_path.display(),
			default_project_id_set = !default_project_id.is_empty(),
			upstream_endpoints = upstream_endpoints.len(),
			cooldown_secs,
			max_retries,
			max_wait_ms,
			"loaded pool configuration"
		);

		Ok(Self {
			account_store_path,
			default_project_id,
			project_discovery_endpoints,
			upstream_endpoints,
			cooldown_duration_ms: cooldown_secs.saturating_mul(1000),
			max_retries,
			max_wait_ms,
			oauth_client_id,
			oauth_client_secret,
		})
	}

	/// Projects the cooldown/retry fields onto [`PoolSettings`], the shape
	/// `AccountPool` itself carries.
	pub fn pool_settings(&self) -> PoolSettings {
		PoolSettings {
			cooldown_duration_ms: self.cooldown_duration_ms,
			max_retries: self.max_retries,
		}
	}
}

impl Default for PoolConfig {
	fn default() -> Self {
		Self {
			account_store_path: PathBuf::from("accounts.json"),
			default_project_id: String::new(),
			project_discovery_endpoints: vec![DEFAULT_PROJECT_DISCOVERY_ENDPOINT.to_string()],
			upstream_endpoints: vec![DEFAULT_UPSTREAM_ENDPOINT.to_string()],
			cooldown_duration_ms: PoolSettings::default().cooldown_duration_ms,
			max_retries: PoolSettings::default().max_retries,
			max_wait_ms: DEFAULT_MAX_WAIT_MS,
			oauth_client_id: None,
			oauth_client_secret: None,
		}
	}
}
