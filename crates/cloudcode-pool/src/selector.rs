// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Which account serves the next `(model)` request.
//!
//! `AnthropicPool`'s `AccountSelectionStrategy` ships `RoundRobin` and
//! `FirstAvailable`. This adds a sticky-window strategy, `StickyRoundRobin`
//! (the default): prefer the current index if it's still available and was
//! used within the sticky window, otherwise fall back to the same
//! oldest-`lastUsed`-first scan the plain round robin performs. The
//! selection never mutates the pool; the caller is responsible for
//! `lastUsed := now` after a successful call.

use cloudcode_core::{AccountPool, ModelId};

use crate::ledger;

/// The coherence window during which the last-used account is preferred,
/// to keep warming the upstream's session cache. Not explicit in the
/// distilled spec; resolved as an open question in `DESIGN.md`.
pub const STICKY_WINDOW_MS: u64 = 60_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SelectionStrategy {
	#[default]
	StickyRoundRobin,
	RoundRobin,
	FirstAvailable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectResult {
	/// The index of the chosen account, or `None` if no account is
	/// available for this model right now.
	pub account_index: Option<usize>,
	/// What `activeIndex` should become (unchanged if nothing was chosen).
	pub new_active_index: usize,
}

fn available_indices(pool: &AccountPool, model: &ModelId, now: u64) -> Vec<usize> {
	pool.accounts
		.iter()
		.enumerate()
		.filter(|(_, account)| !ledger::is_rate_limited(account, model, now))
		.map(|(index, _)| index)
		.collect()
}

fn oldest_used_first(pool: &AccountPool, candidates: &[usize]) -> usize {
	*candidates
		.iter()
		.min_by_key(|&&index| pool.accounts[index].last_used.map(|ts| ts as i64).unwrap_or(i64::MIN))
		.expect("candidates is non-empty")
}

/// Picks the next account to serve a `(model)` request. Clears expired
/// cooldowns first, then applies the configured strategy.
pub fn select(pool: &mut AccountPool, model: &ModelId, now: u64, strategy: SelectionStrategy) -> SelectResult {
	ledger::clear_expired(pool, now);
	let available = available_indices(pool, model, now);

	if available.is_empty() {
		return SelectResult {
			account_index: None,
			new_active_index: pool.active_index,
		};
	}

	let chosen = match strategy {
		SelectionStrategy::FirstAvailable => available[0],
		SelectionStrategy::RoundRobin => oldest_used_first(pool, &available),
		SelectionStrategy::StickyRoundRobin => {
			let active = pool.active_index;
			let sticky = available.contains(&active)
				&& pool.accounts[active]
					.last_used
					.is_some_and(|last_used| now.saturating_sub(last_used) < STICKY_WINDOW_MS);
			if sticky {
				active
			} else {
				oldest_used_first(pool, &available)
			}
		}
	};

	SelectResult {
		account_index: Some(chosen),
		new_active_index: chosen,
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitDecision {
	pub should_wait: bool,
	pub wait_ms: u64,
}

/// Whether the dispatcher should sleep and retry rather than fail
/// outright: true only when every account is unavailable *solely* due to
/// rate limits (none invalid — an invalid account can never become
/// available by waiting).
pub fn should_wait(pool: &AccountPool, model: &ModelId, now: u64) -> WaitDecision {
	if pool.accounts.is_empty() {
		return WaitDecision {
			should_wait: false,
			wait_ms: 0,
		};
	}
	if pool.accounts.iter().any(|account| account.is_invalid) {
		return WaitDecision {
			should_wait: false,
			wait_ms: 0,
		};
	}
	WaitDecision {
		should_wait: true,
		wait_ms: ledger::min_wait(pool, model, now),
	}
}
