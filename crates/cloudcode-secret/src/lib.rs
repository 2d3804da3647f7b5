// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! A wrapper type for sensitive values (refresh tokens, access tokens, API
//! keys) that redacts itself in `Debug` output and zeroes its backing memory
//! on drop.
//!
//! Nothing in this crate prevents a caller from logging the exposed value
//! directly — `expose()` hands back a plain `&str`. The protection here is
//! against the *accidental* case: a `{:?}` on a struct that happens to
//! contain a secret field must never leak it.

use std::fmt;

use zeroize::Zeroize;

/// A string value that must not be logged or displayed in plain form.
#[derive(Clone)]
pub struct SecretString(String);

/// Alias kept for call sites that read more naturally as "a secret", e.g.
/// config structs holding an API key rather than a specifically textual
/// token.
pub type Secret = SecretString;

impl SecretString {
	/// Wrap a value as a secret.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Access the underlying value.
	///
	/// Named `expose` rather than implementing `Deref` so every call site is
	/// a visible, greppable admission that a secret is about to leave this
	/// wrapper.
	pub fn expose(&self) -> &str {
		&self.0
	}

	/// Consume the wrapper, returning the underlying value.
	pub fn into_inner(self) -> String {
		self.0
	}
}

impl fmt::Debug for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("[REDACTED]")
	}
}

impl fmt::Display for SecretString {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str("[REDACTED]")
	}
}

impl PartialEq for SecretString {
	fn eq(&self, other: &Self) -> bool {
		self.0 == other.0
	}
}

impl Eq for SecretString {}

impl Drop for SecretString {
	fn drop(&mut self) {
		self.0.zeroize();
	}
}

#[cfg(feature = "serde")]
impl serde::Serialize for SecretString {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: serde::Serializer,
	{
		serializer.serialize_str(&self.0)
	}
}

#[cfg(feature = "serde")]
impl<'de> serde::Deserialize<'de> for SecretString {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: serde::Deserializer<'de>,
	{
		let value = String::deserialize(deserializer)?;
		Ok(SecretString::new(value))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn debug_output_is_redacted() {
		let secret = SecretString::new("sk-ant-super-secret");
		assert_eq!(format!("{secret:?}"), "[REDACTED]");
	}

	#[test]
	fn display_output_is_redacted() {
		let secret = SecretString::new("rt_refresh_token_value");
		assert_eq!(format!("{secret}"), "[REDACTED]");
	}

	#[test]
	fn expose_returns_original_value() {
		let secret = SecretString::new("at_access_token");
		assert_eq!(secret.expose(), "at_access_token");
	}

	#[test]
	fn equality_compares_inner_value() {
		assert_eq!(SecretString::new("same"), SecretString::new("same"));
		assert_ne!(SecretString::new("a"), SecretString::new("b"));
	}

	#[cfg(feature = "serde")]
	#[test]
	fn serializes_as_plain_string() {
		let secret = SecretString::new("rt_test");
		let json = serde_json::to_string(&secret).unwrap();
		assert_eq!(json, "\"rt_test\"");
	}

	#[cfg(feature = "serde")]
	#[test]
	fn deserializes_from_plain_string() {
		let secret: SecretString = serde_json::from_str("\"at_test\"").unwrap();
		assert_eq!(secret.expose(), "at_test");
	}

	#[cfg(feature = "serde")]
	#[test]
	fn round_trip_inside_struct_does_not_leak_debug() {
		#[derive(serde::Serialize, serde::Deserialize)]
		struct Holder {
			token: SecretString,
		}

		#[derive(Debug, serde::Serialize, serde::Deserialize)]
		struct DebugHolder {
			token: SecretString,
		}

		let holder = Holder {
			token: SecretString::new("leak-me-not"),
		};
		let json = serde_json::to_string(&holder).unwrap();
		let restored: DebugHolder = serde_json::from_str(&json).unwrap();
		assert!(!format!("{restored:?}").contains("leak-me-not"));
	}
}
