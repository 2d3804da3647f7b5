// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Rate-limit bookkeeping: pure operations over an account list and a
//! model id. No operation here measures time itself — `now` is always an
//! explicit parameter, so the whole module is deterministically testable.
//!
//! Grounded on `AnthropicPool::select_account_index`'s cooldown-expiry
//! sweep (`for runtime in &mut state.runtimes { if CoolingDown && now >=
//! until { mark Available } }`) and its `mark_cooling`/`mark_disabled`,
//! generalized from one cooldown per account to a `HashMap<ModelId,
//! ModelRateLimit>` per account, with `ModelId::all()` as the documented
//! wildcard for "every model".

use cloudcode_core::{Account, AccountPool, ModelId, ModelRateLimit};

/// The rate-limit entry that governs `model` for this account: an exact
/// match if present, else the wildcard entry, else none (available).
fn effective_rate_limit<'a>(account: &'a Account, model: &ModelId) -> Option<&'a ModelRateLimit> {
	account
		.model_rate_limits
		.get(model)
		.or_else(|| account.model_rate_limits.get(&ModelId::all()))
}

/// `account.isInvalid ∨ (modelRateLimits[model].isRateLimited ∧ resetTime > now)`.
pub fn is_rate_limited(account: &Account, model: &ModelId, now: u64) -> bool {
	if account.is_invalid {
		return true;
	}
	match effective_rate_limit(account, model) {
		Some(entry) => entry.is_rate_limited && entry.reset_time.is_some_and(|reset| reset > now),
		None => false,
	}
}

/// Accounts for which `is_rate_limited` is false. With `model: None`, only
/// `isInvalid` filters — no model-specific cooldown is considered.
pub fn available_accounts<'a>(
	pool: &'a AccountPool,
	model: Option<&ModelId>,
	now: u64,
) -> Vec<&'a Account> {
	pool.accounts
		.iter()
		.filter(|account| match model {
			Some(model) => !is_rate_limited(account, model, now),
			None => !account.is_invalid,
		})
		.collect()
}

/// For each rate-limit entry with `resetTime <= now`, clears it
/// (`isRateLimited = false, resetTime = None`). Returns the count cleared.
/// Idempotent: a second call with the same `now` clears nothing further.
pub fn clear_expired(pool: &mut AccountPool, now: u64) -> usize {
	let mut cleared = 0;
	for account in &mut pool.accounts {
		for entry in account.model_rate_limits.values_mut() {
			if entry.is_rate_limited && entry.reset_time.is_some_and(|reset| reset <= now) {
				entry.is_rate_limited = false;
				entry.reset_time = None;
				cleared += 1;
			}
		}
	}
	cleared
}

/// Sets `{isRateLimited: true, resetTime: now + (reset_ms ?? cooldownDurationMs ?? 60_000)}`
/// for `(email, model)`. Returns `false` without mutating the pool if
/// `email` is unknown. Initializes the per-model entry if absent.
pub fn mark_rate_limited(
	pool: &mut AccountPool,
	email: &str,
	reset_ms: Option<u64>,
	model: &ModelId,
	now: u64,
) -> bool {
	let cooldown = pool.settings.cooldown_duration_ms;
	let Some(account) = pool.find_mut(email) else {
		return false;
	};
	let reset_time = now + reset_ms.unwrap_or(cooldown);
	let entry = account.model_rate_limits.entry(model.clone()).or_default();
	entry.is_rate_limited = true;
	entry.reset_time = Some(reset_time);
	true
}

/// Sets `isInvalid=true, invalidReason=reason, invalidAt=now`. Idempotent.
/// Returns `false` without mutating the pool if `email` is unknown.
pub fn mark_invalid(pool: &mut AccountPool, email: &str, reason: impl Into<String>, now: u64) -> bool {
	let Some(account) = pool.find_mut(email) else {
		return false;
	};
	account.is_invalid = true;
	account.invalid_reason = Some(reason.into());
	account.invalid_at = Some(now);
	true
}

/// Sets `isInvalid=false, invalidReason=None`. Called only from the
/// Credential Resolver on a successful token refresh.
pub fn clear_invalid(pool: &mut AccountPool, email: &str) -> bool {
	let Some(account) = pool.find_mut(email) else {
		return false;
	};
	account.is_invalid = false;
	account.invalid_reason = None;
	true
}

/// When every account is unavailable, the shortest wait (floored at 0)
/// until one becomes available again, defaulting to `cooldownDurationMs`
/// if no account has a valid reset time for `model`.
pub fn min_wait(pool: &AccountPool, model: &ModelId, now: u64) -> u64 {
	let min_reset = pool
		.accounts
		.iter()
		.filter(|account| !account.is_invalid)
		.filter_map(|account| effective_rate_limit(account, model))
		.filter(|entry| entry.is_rate_limited)
		.filter_map(|entry| entry.reset_time)
		.min();

	match min_reset {
		Some(reset) => reset.saturating_sub(now),
		None => pool.settings.cooldown_duration_ms,
	}
}

#[cfg(test)]
mod tests {
	use cloudcode_core::AccountSource;

	use super::*;

	fn account_with_limit(email: &str, model: ModelId, is_rate_limited: bool, reset_time: Option<u64>) -> Account {
		let mut account = Account::new(email, AccountSource::Oauth, 0).with_refresh_token("rt");
		account.model_rate_limits.insert(
			model,
			ModelRateLimit {
				is_rate_limited,
				reset_time,
			},
		);
		account
	}

	#[test]
	fn invalid_account_is_excluded_regardless_of_rate_limits() {
		let mut account = Account::new("a@example.com", AccountSource::Oauth, 0).with_refresh_token("rt");
		account.is_invalid = true;
		let pool = AccountPool::new(vec![account], Default::default());
		let available = available_accounts(&pool, Some(&ModelId::new("m")), 1_000);
		assert!(available.is_empty());
	}

	#[test]
	fn clear_expired_clears_only_entries_whose_reset_has_passed() {
		let mut pool = AccountPool::new(
			vec![
				account_with_limit("a@example.com", ModelId::new("m"), true, Some(500)),
				account_with_limit("b@example.com", ModelId::new("m"), true, Some(1_500)),
			],
			Default::default(),
		);
		let cleared = clear_expired(&mut pool, 1_000);
		assert_eq!(cleared, 1);
		assert!(!pool.accounts[0].model_rate_limits[&ModelId::new("m")].is_rate_limited);
		assert!(pool.accounts[1].model_rate_limits[&ModelId::new("m")].is_rate_limited);
	}

	#[test]
	fn clear_expired_is_idempotent() {
		let mut pool = AccountPool::new(
			vec![account_with_limit("a@example.com", ModelId::new("m"), true, Some(500))],
			Default::default(),
		);
		assert_eq!(clear_expired(&mut pool, 1_000), 1);
		assert_eq!(clear_expired(&mut pool, 1_000), 0);
	}

	#[test]
	fn mark_rate_limited_on_unknown_email_leaves_pool_unchanged() {
		let pool_before = AccountPool::new(
			vec![Account::new("a@example.com", AccountSource::Oauth, 0).with_refresh_token("rt")],
			Default::default(),
		);
		let mut pool_after = pool_before.clone();
		let changed = mark_rate_limited(&mut pool_after, "nobody@example.com", None, &ModelId::new("m"), 1_000);
		assert!(!changed);
		assert_eq!(pool_before, pool_after);
	}

	#[test]
	fn mark_rate_limited_defaults_to_cooldown_duration_when_reset_ms_is_null() {
		let mut pool = AccountPool::new(
			vec![Account::new("a@example.com", AccountSource::Oauth, 0).with_refresh_token("rt")],
			Default::default(),
		);
		assert_eq!(pool.settings.cooldown_duration_ms, 60_000);
		mark_rate_limited(&mut pool, "a@example.com", None, &ModelId::new("m"), 1_000);
		let entry = &pool.accounts[0].model_rate_limits[&ModelId::new("m")];
		assert_eq!(entry.reset_time, Some(61_000));
	}

	#[test]
	fn mark_rate_limited_then_clear_expired_after_window_restores_availability() {
		let mut pool = AccountPool::new(
			vec![Account::new("a@example.com", AccountSource::Oauth, 0).with_refresh_token("rt")],
			Default::default(),
		);
		let model = ModelId::new("m");
		mark_rate_limited(&mut pool, "a@example.com", Some(30_000), &model, 1_000);
		assert!(is_rate_limited(&pool.accounts[0], &model, 1_000));
		clear_expired(&mut pool, 31_001);
		assert!(!is_rate_limited(&pool.accounts[0], &model, 31_001));
	}

	#[test]
	fn wildcard_rate_limit_applies_to_every_model() {
		let account = account_with_limit("a@example.com", ModelId::all(), true, Some(5_000));
		assert!(is_rate_limited(&account, &ModelId::new("any-model"), 1_000));
		assert!(!is_rate_limited(&account, &ModelId::new("any-model"), 6_000));
	}

	#[test]
	fn min_wait_returns_the_smallest_reset_across_rate_limited_accounts() {
		let pool = AccountPool::new(
			vec![
				account_with_limit("a@example.com", ModelId::new("m"), true, Some(6_000)),
				account_with_limit("b@example.com", ModelId::new("m"), true, Some(9_000)),
			],
			Default::default(),
		);
		assert_eq!(min_wait(&pool, &ModelId::new("m"), 1_000), 5_000);
	}

	#[test]
	fn min_wait_defaults_to_cooldown_duration_when_no_entries() {
		let pool = AccountPool::empty();
		assert_eq!(min_wait(&pool, &ModelId::new("m"), 1_000), 60_000);
	}

	#[test]
	fn invalid_account_with_one_rate_limited_means_selection_should_not_wait() {
		let mut invalid = Account::new("a@example.com", AccountSource::Oauth, 0).with_refresh_token("rt");
		invalid.is_invalid = true;
		let rate_limited = account_with_limit("b@example.com", ModelId::new("m"), true, Some(5_000));
		let pool = AccountPool::new(vec![invalid, rate_limited], Default::default());
		assert!(available_accounts(&pool, Some(&ModelId::new("m")), 1_000).is_empty());
	}
}
