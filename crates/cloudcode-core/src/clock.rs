// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! An injectable clock.
//!
//! The teacher (`loom-server-llm-anthropic::pool`) calls `Instant::now()`
//! and `SystemTime::now()` directly wherever it needs the current time.
//! That is fine for a single cooldown check, but the ledger and selector
//! here need `now` to be an explicit, deterministic parameter so that
//! cooldown-expiry and sticky-window tests do not depend on wall-clock
//! timing. `Clock` is the seam: production code uses `SystemClock`, tests
//! use a `ManualClock` that advances on command.

/// Current time, expressed as milliseconds since the Unix epoch.
pub trait Clock: Send + Sync {
	fn now_ms(&self) -> u64;
}

/// Clock backed by the OS wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
	fn now_ms(&self) -> u64 {
		std::time::SystemTime::now()
			.duration_since(std::time::UNIX_EPOCH)
			.expect("system clock before unix epoch")
			.as_millis() as u64
	}
}

#[cfg(any(test, feature = "test-util"))]
pub mod manual {
	use super::Clock;
	use std::sync::atomic::{AtomicU64, Ordering};

	/// A clock a test can advance deterministically.
	#[derive(Debug, Default)]
	pub struct ManualClock(AtomicU64);

	impl ManualClock {
		pub fn new(start_ms: u64) -> Self {
			Self(AtomicU64::new(start_ms))
		}

		pub fn advance(&self, ms: u64) {
			self.0.fetch_add(ms, Ordering::SeqCst);
		}

		pub fn set(&self, ms: u64) {
			self.0.store(ms, Ordering::SeqCst);
		}
	}

	impl Clock for ManualClock {
		fn now_ms(&self) -> u64 {
			self.0.load(Ordering::SeqCst)
		}
	}
}

#[cfg(test)]
mod tests {
	use super::manual::ManualClock;
	use super::*;

	#[test]
	fn system_clock_returns_increasing_values() {
		let clock = SystemClock;
		let first = clock.now_ms();
		std::thread::sleep(std::time::Duration::from_millis(5));
		let second = clock.now_ms();
		assert!(second >= first);
	}

	#[test]
	fn manual_clock_advances_deterministically() {
		let clock = ManualClock::new(1_000);
		assert_eq!(clock.now_ms(), 1_000);
		clock.advance(500);
		assert_eq!(clock.now_ms(), 1_500);
		clock.set(9_999);
		assert_eq!(clock.now_ms(), 9_999);
	}
}
