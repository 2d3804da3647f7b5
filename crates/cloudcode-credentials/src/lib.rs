// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! The `AccountStore` adapter boundary: "load the account list" and
//! "persist mutated account state", the two capabilities the dispatcher
//! consumes from the (out-of-scope) on-disk JSON store.
//!
//! Grounded on `loom_cli_credentials::store_fallback::KeyringThenFileStore`'s
//! `CredentialStore` impl: read-whole-file, write-whole-file-atomically via
//! a temp file plus rename. That crate keys credentials per provider id;
//! here the unit of storage is the whole pool (accounts + settings +
//! `activeIndex`), since the dispatcher owns the pool as a single value.

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use cloudcode_core::AccountPool;
use thiserror::Error;

/// Failure modes for loading or persisting the account pool.
#[derive(Debug, Error)]
pub enum StoreError {
	#[error("failed to read account store at {path}: {source}")]
	Read { path: PathBuf, source: io::Error },

	#[error("failed to write account store at {path}: {source}")]
	Write { path: PathBuf, source: io::Error },

	#[error("failed to rename temporary account store file into place at {path}: {source}")]
	Rename { path: PathBuf, source: io::Error },

	#[error("account store at {path} contains invalid JSON: {source}")]
	Parse {
		path: PathBuf,
		source: serde_json::Error,
	},

	#[error("failed to serialize account pool: {0}")]
	Serialize(#[source] serde_json::Error),
}

/// `load() -> Pool`, `save(Pool)` — the only two operations the dispatcher
/// needs from persistence. Implementations must be crash-safe: a process
/// killed mid-`save` must leave either the old or the new content on disk,
/// never a truncated file.
#[async_trait]
pub trait AccountStore: Send + Sync {
	async fn load(&self) -> Result<AccountPool, StoreError>;
	async fn save(&self, pool: &AccountPool) -> Result<(), StoreError>;
}

/// Reads and writes the account pool as pretty-printed JSON at a fixed
/// path, writing through a sibling temp file and renaming it into place so
/// a crash mid-write never leaves a truncated store.
pub struct FileAccountStore {
	path: PathBuf,
}

impl FileAccountStore {
	pub fn new(path: impl Into<PathBuf>) -> Self {
		Self { path: path.into() }
	}

	fn tmp_path(&self) -> PathBuf {
		let mut tmp = self.path.clone();
		let file_name = tmp
			.file_name()
			.map(|n| format!("{}.tmp", n.to_string_lossy()))
			.unwrap_or_else(|| "accounts.json.tmp".to_string());
		tmp.set_file_name(file_name);
		tmp
	}
}

#[async_trait]
impl AccountStore for FileAccountStore {
	async fn load(&self) -> Result<AccountPool, StoreError> {
		match tokio::fs::read_to_string(&self.path).await {
			Ok(contents) => serde_json::from_str(&contents).map_err(|source| StoreError::Parse {
				path: self.path.clone(),
				source,
			}),
			Err(source) if source.kind() == io::ErrorKind::NotFound => {
				tracing::debug!(path = %self.path.display(), "account store not found, starting empty");
				Ok(AccountPool::empty())
			}
			Err(source) => Err(StoreError::Read {
				path: self.path.clone(),
				source,
			}),
		}
	}

	async fn save(&self, pool: &AccountPool) -> Result<(), StoreError> {
		let json = serde_json::to_string_pretty(pool).map_err(StoreError::Serialize)?;
		let tmp = self.tmp_path();
		tokio::fs::write(&tmp, json.as_bytes())
			.await
			.map_err(|source| StoreError::Write {
				path: tmp.clone(),
				source,
			})?;
		tokio::fs::rename(&tmp, &self.path)
			.await
			.map_err(|source| StoreError::Rename {
				path: self.path.clone(),
				source,
			})?;
		tracing::debug!(path = %self.path.display(), accounts = pool.accounts.len(), "account store saved");
		Ok(())
	}
}

/// In-memory `AccountStore`, for dispatcher/pool tests that need `load`/
/// `save` to round-trip without touching a filesystem.
pub struct MemoryAccountStore {
	state: tokio::sync::Mutex<AccountPool>,
}

impl MemoryAccountStore {
	pub fn new(initial: AccountPool) -> Self {
		Self {
			state: tokio::sync::Mutex::new(initial),
		}
	}
}

#[async_trait]
impl AccountStore for MemoryAccountStore {
	async fn load(&self) -> Result<AccountPool, StoreError> {
		Ok(self.state.lock().await.clone())
	}

	async fn save(&self, pool: &AccountPool) -> Result<(), StoreError> {
		*self.state.lock().await = pool.clone();
		Ok(())
	}
}
