// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! The on-disk account data model: one credentialed Google identity plus
//! the pool that holds them.
//!
//! Field shape and JSON casing are the account-store wire format; the
//! `PartialEq`-derived `Account`/`AccountPool` here are what gets loaded and
//! saved verbatim by an `AccountStore` implementation (see
//! `cloudcode-credentials`). Mutation methods are deliberately narrow and
//! named after the operations in `AnthropicPool`'s `mark_cooling` /
//! `mark_disabled`, generalized to the per-model ledger this pool needs.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::model::ModelId;

/// Where an account's credential comes from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountSource {
	Oauth,
	Database,
	Manual,
}

/// Per-(account, model) rate-limit state.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelRateLimit {
	pub is_rate_limited: bool,
	/// Absolute wall-clock instant in epoch milliseconds, never a duration.
	pub reset_time: Option<u64>,
}

/// A single credentialed Google identity and its mutable runtime state.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
	pub email: String,
	pub source: AccountSource,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub refresh_token: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub api_key: Option<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub project_id: Option<String>,
	pub added_at: u64,
	pub last_used: Option<u64>,
	#[serde(default, skip_serializing_if = "std::ops::Not::not")]
	pub is_invalid: bool,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub invalid_reason: Option<String>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub invalid_at: Option<u64>,
	#[serde(default)]
	pub model_rate_limits: HashMap<ModelId, ModelRateLimit>,
}

impl Account {
	/// Build a fresh, never-used account with no rate-limit or invalidity
	/// state, as the external loader produces at boot.
	pub fn new(email: impl Into<String>, source: AccountSource, added_at: u64) -> Self {
		Self {
			email: email.into(),
			source,
			refresh_token: None,
			api_key: None,
			project_id: None,
			added_at,
			last_used: None,
			is_invalid: false,
			invalid_reason: None,
			invalid_at: None,
			model_rate_limits: HashMap::new(),
		}
	}

	pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(token.into());
		self
	}

	pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
		self.api_key = Some(key.into());
		self
	}

	pub fn with_project_id(mut self, project_id: impl Into<String>) -> Self {
		self.project_id = Some(project_id.into());
		self
	}
}

/// Cooldown/retry defaults the ledger falls back on when a mutation doesn't
/// specify them explicitly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolSettings {
	pub cooldown_duration_ms: u64,
	pub max_retries: u32,
}

impl Default for PoolSettings {
	fn default() -> Self {
		Self {
			cooldown_duration_ms: 60_000,
			max_retries: 5,
		}
	}
}

/// An ordered sequence of accounts plus the round-robin cursor and shared
/// settings, exactly as persisted to and loaded from disk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountPool {
	pub accounts: Vec<Account>,
	pub settings: PoolSettings,
	pub active_index: usize,
}

impl AccountPool {
	pub fn new(accounts: Vec<Account>, settings: PoolSettings) -> Self {
		Self {
			accounts,
			settings,
			active_index: 0,
		}
	}

	pub fn empty() -> Self {
		Self {
			accounts: Vec::new(),
			settings: PoolSettings::default(),
			active_index: 0,
		}
	}

	/// `0 <= active_index < len(accounts)` whenever the pool is non-empty;
	/// called after every mutation that might move `active_index` out of
	/// range (e.g. an account being removed).
	pub fn clamp_active_index(&mut self) {
		if self.accounts.is_empty() {
			self.active_index = 0;
		} else if self.active_index >= self.accounts.len() {
			self.active_index = self.accounts.len() - 1;
		}
	}

	pub fn find_mut(&mut self, email: &str) -> Option<&mut Account> {
		self.accounts.iter_mut().find(|a| a.email == email)
	}

	pub fn find(&self, email: &str) -> Option<&Account> {
		self.accounts.iter().find(|a| a.email == email)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn pool_round_trips_through_json() {
		let mut pool = AccountPool::new(
			vec![Account::new("a@example.com", AccountSource::Oauth, 1_000).with_refresh_token("rt")],
			PoolSettings::default(),
		);
		pool.accounts[0]
			.model_rate_limits
			.insert(ModelId::new("claude-3-opus"), ModelRateLimit {
				is_rate_limited: true,
				reset_time: Some(5_000),
			});

		let json = serde_json::to_string(&pool).unwrap();
		let restored: AccountPool = serde_json::from_str(&json).unwrap();
		assert_eq!(pool, restored);
	}

	#[test]
	fn clamp_active_index_handles_shrinking_pool() {
		let mut pool = AccountPool::new(
			vec![
				Account::new("a@example.com", AccountSource::Manual, 0).with_api_key("k"),
			],
			PoolSettings::default(),
		);
		pool.active_index = 5;
		pool.clamp_active_index();
		assert_eq!(pool.active_index, 0);

		pool.accounts.clear();
		pool.clamp_active_index();
		assert_eq!(pool.active_index, 0);
	}

	#[test]
	fn invalid_account_field_is_omitted_when_false() {
		let account = Account::new("a@example.com", AccountSource::Manual, 0).with_api_key("k");
		let json = serde_json::to_string(&account).unwrap();
		assert!(!json.contains("isInvalid"), "isInvalid=false should be omitted, not serialized: {json}");
		assert!(json.contains("\"apiKey\""));
		assert!(json.contains("\"addedAt\""));
	}
}
