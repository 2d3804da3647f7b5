// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Environment variable helpers for loading secrets.
//!
//! Supports the `VAR` / `VAR_FILE` convention used by Docker secrets and
//! Kubernetes: set `VAR` directly, or point `VAR_FILE` at a file containing
//! the value (a mounted secret volume).

use std::path::PathBuf;
use std::{env, fs};

use cloudcode_secret::SecretString;
use thiserror::Error;

/// Errors that can occur when loading a secret from the environment.
#[derive(Debug, Error)]
pub enum SecretEnvError {
	#[error("failed to read secret file at {path}: {source}")]
	Io {
		path: PathBuf,
		#[source]
		source: std::io::Error,
	},

	#[error("secret file path in {var} is empty")]
	EmptyPath { var: String },
}

/// Error returned when a required secret is not found.
#[derive(Debug, Error)]
pub enum RequiredSecretError {
	#[error("required secret not found: set either {var} or {file_var}")]
	Missing { var: String, file_var: String },

	#[error(transparent)]
	Load(#[from] SecretEnvError),
}

/// Load a secret using the `VAR` / `VAR_FILE` convention.
///
/// Precedence: if `{var}_FILE` is set, the secret is read from that path
/// (a single trailing newline is stripped); otherwise `{var}` is used
/// directly; otherwise `Ok(None)`.
pub fn load_secret_env(var: &str) -> Result<Option<SecretString>, SecretEnvError> {
	let file_var = format!("{var}_FILE");

	if let Ok(path_str) = env::var(&file_var) {
		if path_str.is_empty() {
			return Err(SecretEnvError::EmptyPath { var: file_var });
		}

		let path = PathBuf::from(&path_str);
		let content = fs::read_to_string(&path).map_err(|e| SecretEnvError::Io {
			path: path.clone(),
			source: e,
		})?;

		let secret = content.strip_suffix('\n').unwrap_or(&content).to_string();
		return Ok(Some(SecretString::new(secret)));
	}

	if let Ok(value) = env::var(var) {
		return Ok(Some(SecretString::new(value)));
	}

	Ok(None)
}

/// Load a secret, failing if neither `VAR` nor `VAR_FILE` is set.
pub fn require_secret_env(var: &str) -> Result<SecretString, RequiredSecretError> {
	load_secret_env(var)
		.map_err(RequiredSecretError::Load)?
		.ok_or_else(|| RequiredSecretError::Missing {
			var: var.to_string(),
			file_var: format!("{var}_FILE"),
		})
}

/// Read a plain (non-secret) environment variable, falling back to `default`.
pub fn var_or(var: &str, default: impl Into<String>) -> String {
	env::var(var).unwrap_or_else(|_| default.into())
}

/// Read an integer environment variable, falling back to `default` when
/// unset or unparseable-ignoring: an unset variable silently uses the
/// default, but a *set, malformed* value is treated as a configuration
/// error rather than silently discarded.
pub fn u64_env(var: &str, default: u64) -> Result<u64, ConfigError> {
	match env::var(var) {
		Ok(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
			key: var.to_string(),
			message: format!("invalid integer value '{raw}'"),
		}),
		Err(_) => Ok(default),
	}
}

/// Read a comma-separated list environment variable, falling back to
/// `default` when unset. Empty entries (from trailing commas or repeated
/// separators) are dropped.
pub fn list_env(var: &str, default: Vec<String>) -> Vec<String> {
	match env::var(var) {
		Ok(raw) => raw
			.split(',')
			.map(str::trim)
			.filter(|s| !s.is_empty())
			.map(str::to_string)
			.collect(),
		Err(_) => default,
	}
}

/// Errors surfaced while parsing non-secret configuration values.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("invalid value for {key}: {message}")]
	InvalidValue { key: String, message: String },

	#[error("missing required environment variable {0}")]
	MissingEnvVar(String),

	#[error(transparent)]
	Secret(#[from] RequiredSecretError),
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::io::Write;
	use tempfile::NamedTempFile;

	mod load_secret_env_tests {
		use super::*;

		#[test]
		fn returns_none_when_not_set() {
			let unique_var = "CLOUDCODE_TEST_NONEXISTENT_VAR_12345";
			env::remove_var(unique_var);
			env::remove_var(format!("{unique_var}_FILE"));

			let result = load_secret_env(unique_var).unwrap();
			assert!(result.is_none());
		}

		#[test]
		fn reads_from_direct_env_var() {
			let unique_var = "CLOUDCODE_TEST_DIRECT_VAR_12345";
			env::set_var(unique_var, "direct-secret-value");
			env::remove_var(format!("{unique_var}_FILE"));

			let result = load_secret_env(unique_var).unwrap();
			assert_eq!(result.unwrap().expose(), "direct-secret-value");

			env::remove_var(unique_var);
		}

		#[test]
		fn reads_from_file_when_file_var_set() {
			let unique_var = "CLOUDCODE_TEST_FILE_VAR_12345";
			let mut temp_file = NamedTempFile::new().unwrap();
			writeln!(temp_file, "file-secret-value").unwrap();

			env::set_var(format!("{unique_var}_FILE"), temp_file.path().to_str().unwrap());
			env::remove_var(unique_var);

			let result = load_secret_env(unique_var).unwrap();
			assert_eq!(result.unwrap().expose(), "file-secret-value");

			env::remove_var(format!("{unique_var}_FILE"));
		}

		#[test]
		fn file_var_takes_precedence() {
			let unique_var = "CLOUDCODE_TEST_PRECEDENCE_VAR_12345";
			let mut temp_file = NamedTempFile::new().unwrap();
			writeln!(temp_file, "file-secret").unwrap();

			env::set_var(unique_var, "direct-secret");
			env::set_var(format!("{unique_var}_FILE"), temp_file.path().to_str().unwrap());

			let result = load_secret_env(unique_var).unwrap();
			assert_eq!(result.unwrap().expose(), "file-secret");

			env::remove_var(unique_var);
			env::remove_var(format!("{unique_var}_FILE"));
		}

		#[test]
		fn returns_error_for_missing_file() {
			let unique_var = "CLOUDCODE_TEST_MISSING_FILE_VAR_12345";
			env::set_var(format!("{unique_var}_FILE"), "/nonexistent/path/to/secret");

			let result = load_secret_env(unique_var);
			assert!(matches!(result.unwrap_err(), SecretEnvError::Io { .. }));

			env::remove_var(format!("{unique_var}_FILE"));
		}

		#[test]
		fn returns_error_for_empty_file_path() {
			let unique_var = "CLOUDCODE_TEST_EMPTY_PATH_VAR_12345";
			env::set_var(format!("{unique_var}_FILE"), "");

			let result = load_secret_env(unique_var);
			assert!(matches!(result.unwrap_err(), SecretEnvError::EmptyPath { .. }));

			env::remove_var(format!("{unique_var}_FILE"));
		}
	}

	mod require_secret_env_tests {
		use super::*;

		#[test]
		fn returns_secret_when_set() {
			let unique_var = "CLOUDCODE_TEST_REQUIRE_VAR_12345";
			env::set_var(unique_var, "required-secret");

			let result = require_secret_env(unique_var).unwrap();
			assert_eq!(result.expose(), "required-secret");

			env::remove_var(unique_var);
		}

		#[test]
		fn returns_error_when_not_set() {
			let unique_var = "CLOUDCODE_TEST_REQUIRE_MISSING_VAR_12345";
			env::remove_var(unique_var);
			env::remove_var(format!("{unique_var}_FILE"));

			let result = require_secret_env(unique_var);
			assert!(matches!(result.unwrap_err(), RequiredSecretError::Missing { .. }));
		}
	}

	mod list_env_tests {
		use super::*;

		#[test]
		fn splits_and_trims_entries() {
			let unique_var = "CLOUDCODE_TEST_LIST_VAR_12345";
			env::set_var(unique_var, "a, b ,,c");

			let result = list_env(unique_var, vec!["default".to_string()]);
			assert_eq!(result, vec!["a", "b", "c"]);

			env::remove_var(unique_var);
		}

		#[test]
		fn falls_back_to_default_when_unset() {
			let unique_var = "CLOUDCODE_TEST_LIST_MISSING_VAR_12345";
			env::remove_var(unique_var);

			let result = list_env(unique_var, vec!["fallback".to_string()]);
			assert_eq!(result, vec!["fallback"]);
		}
	}

	mod u64_env_tests {
		use super::*;

		#[test]
		fn falls_back_to_default_when_unset() {
			let unique_var = "CLOUDCODE_TEST_U64_MISSING_VAR_12345";
			env::remove_var(unique_var);

			assert_eq!(u64_env(unique_var, 42).unwrap(), 42);
		}

		#[test]
		fn parses_set_value() {
			let unique_var = "CLOUDCODE_TEST_U64_VAR_12345";
			env::set_var(unique_var, "7200");

			assert_eq!(u64_env(unique_var, 42).unwrap(), 7200);

			env::remove_var(unique_var);
		}

		#[test]
		fn rejects_malformed_value() {
			let unique_var = "CLOUDCODE_TEST_U64_BAD_VAR_12345";
			env::set_var(unique_var, "not-a-number");

			assert!(u64_env(unique_var, 42).is_err());

			env::remove_var(unique_var);
		}
	}
}
