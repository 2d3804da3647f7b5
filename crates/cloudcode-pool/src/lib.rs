// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Account selection, credential resolution, and the request dispatch/retry
//! loop: the rate-limit ledger, credential resolver, account selector,
//! dispatcher, and the narrow external-adapter traits it depends on. Wire
//! translation lives in `cloudcode_translate`; this crate is its only
//! caller.

pub mod adapters;
pub mod dispatcher;
pub mod ledger;
pub mod resolver;
pub mod selector;

pub use adapters::{
	DatabaseAuthReader, DatabaseCredential, RefreshError, RefreshedToken, ReqwestUpstreamHttp, TokenRefresher,
	UpstreamByteStream, UpstreamHttp, UpstreamResponse, UpstreamTransportError,
};
pub use dispatcher::{DispatchRequest, Dispatcher, DispatcherConfig, TranslatedEventStream};
pub use resolver::{CredentialResolver, TokenResolution, TOKEN_REFRESH_INTERVAL_MS};
pub use selector::{SelectResult, SelectionStrategy, WaitDecision, STICKY_WINDOW_MS};
