// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Shared `reqwest::Client` construction, grounded on
//! `loom_common_http::client::new_client`/`builder`: one client per process,
//! a sane default timeout, and a product-identifying user agent rather than
//! reqwest's default.

use std::time::Duration;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// The `User-Agent` sent on every upstream call, e.g. `cloudcode/0.1.0`.
pub fn user_agent() -> String {
	format!("cloudcode/{}", env!("CARGO_PKG_VERSION"))
}

/// A `reqwest::ClientBuilder` pre-configured with the shared timeout and
/// user agent; callers add TLS/proxy/etc. overrides before calling `build`.
pub fn builder() -> reqwest::ClientBuilder {
	reqwest::Client::builder()
		.timeout(DEFAULT_TIMEOUT)
		.user_agent(user_agent())
}

/// The client most callers want: shared defaults, no further customization.
pub fn new_client() -> reqwest::Result<reqwest::Client> {
	builder().build()
}

/// A client with a caller-supplied timeout, for the streaming upstream call
/// where the default would be too short.
pub fn new_client_with_timeout(timeout: Duration) -> reqwest::Result<reqwest::Client> {
	reqwest::Client::builder()
		.timeout(timeout)
		.user_agent(user_agent())
		.build()
}
