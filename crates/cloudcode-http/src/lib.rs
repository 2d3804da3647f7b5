// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Shared HTTP client construction and retry back-off, used by the
//! dispatcher and the credential resolver's upstream calls.

pub mod client;
pub mod retry;

pub use client::{builder, new_client, new_client_with_timeout, user_agent};
pub use retry::{backoff_delay, BASE_DELAY_MS, MAX_BACKOFF_MS};
