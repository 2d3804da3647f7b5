// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! A model identifier, with an explicit wildcard for "applies to every
//! model".
//!
//! An empty string meaning "all models" is never accepted implicitly:
//! callers that mean the wildcard use `ModelId::all()` explicitly.
//! `ModelId::new_checked` maps an untrusted empty string to that wildcard
//! instead of panicking; the plain `ModelId::new` is for literal,
//! known-non-empty call sites such as request deserialization, and panics on
//! empty input since that indicates a caller bug, not a runtime condition.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The literal wildcard model id meaning "every model".
const WILDCARD: &str = "*";

/// A model identifier (e.g. `"claude-sonnet-4-20250514"`), or the
/// documented wildcard meaning every model.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModelId(String);

impl ModelId {
	/// The wildcard model id, matching every per-model ledger entry.
	pub fn all() -> Self {
		Self(WILDCARD.to_string())
	}

	/// Build a model id from a known-non-empty string.
	///
	/// # Panics
	/// Panics if `id` is empty — callers that might legitimately have no
	/// model id must use [`ModelId::new_checked`] and handle the wildcard
	/// explicitly instead of silently defaulting to the per-account cooldown.
	pub fn new(id: impl Into<String>) -> Self {
		let id = id.into();
		assert!(
			!id.is_empty(),
			"ModelId::new called with an empty string; use ModelId::all() for the wildcard"
		);
		Self(id)
	}

	/// Build a model id from a string that might be empty, mapping an empty
	/// string to the explicit wildcard rather than propagating it silently.
	pub fn new_checked(id: impl Into<String>) -> Self {
		let id = id.into();
		if id.is_empty() {
			Self::all()
		} else {
			Self(id)
		}
	}

	pub fn is_wildcard(&self) -> bool {
		self.0 == WILDCARD
	}

	pub fn as_str(&self) -> &str {
		&self.0
	}
}

impl fmt::Display for ModelId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

impl Borrow<str> for ModelId {
	fn borrow(&self) -> &str {
		&self.0
	}
}

impl From<&str> for ModelId {
	fn from(value: &str) -> Self {
		ModelId::new_checked(value)
	}
}

impl From<String> for ModelId {
	fn from(value: String) -> Self {
		ModelId::new_checked(value)
	}
}
