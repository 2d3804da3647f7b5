// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Back-off delay computation for the dispatcher's retry loop.
//!
//! Grounded on `loom_server_llm_zai::client`'s `RetryConfig`/`retry()`
//! pattern (a generic `RetryableError`-bounded retry helper around an async
//! closure) — but the dispatcher's own loop re-selects accounts between
//! attempts, so the piece reused here is the *back-off formula* rather than
//! the whole closure-wrapping combinator: `BASE * 2^attempt + jitter(0..BASE)`,
//! capped at `MAX_BACKOFF_MS`.

use std::time::Duration;

/// Base delay for the first retry.
pub const BASE_DELAY_MS: u64 = 250;

/// Upper bound on any single back-off sleep, regardless of attempt count.
pub const MAX_BACKOFF_MS: u64 = 10_000;

/// `min(BASE * 2^attempt + rand(0..BASE), MAX_BACKOFF_MS)`, `attempt` being
/// 1-indexed (the delay before the *next* attempt, given this many have
/// already failed).
pub fn backoff_delay(attempt: u32) -> Duration {
	let exponential = BASE_DELAY_MS.saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX));
	let jitter = fastrand::u64(0..BASE_DELAY_MS);
	let delay_ms = exponential.saturating_add(jitter).min(MAX_BACKOFF_MS);
	Duration::from_millis(delay_ms)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn first_attempt_delay_is_within_one_base_unit_of_base() {
		let delay = backoff_delay(0);
		assert!(delay.as_millis() >= BASE_DELAY_MS as u128);
		assert!(delay.as_millis() < (BASE_DELAY_MS * 2) as u128);
	}

	#[test]
	fn delay_is_capped_at_max_backoff_for_large_attempts() {
		for attempt in 10..20 {
			assert_eq!(backoff_delay(attempt), Duration::from_millis(MAX_BACKOFF_MS));
		}
	}

	#[test]
	fn delay_grows_with_attempt_count_before_the_cap() {
		let early = backoff_delay(1).as_millis();
		let later = backoff_delay(3).as_millis();
		assert!(later >= early);
	}
}
