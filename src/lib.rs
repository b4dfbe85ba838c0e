//! Resilience and trust layer for a document-processing API gateway: OAuth session flows with
//! anti-forgery state, connector rate limiting, classified upstream retries, and a deterministic
//! Prometheus-style metrics registry.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod clock;
pub mod config;
pub mod connector;
pub mod error;
pub mod flows;
pub mod http;
pub mod llm;
pub mod oauth;
pub mod obs;
pub mod resilience;
pub mod store;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		clock::{Clock, FixedClock},
		config::OAuthClientConfig,
		flows::OAuthFlowManager,
		http::ReqwestHttpClient,
		store::{MemoryStore, StateStore, TokenStore},
	};

	/// Client identifier used by test OAuth clients.
	pub const TEST_CLIENT_ID: &str = "client-id";
	/// Client secret used by test OAuth clients.
	pub const TEST_CLIENT_SECRET: &str = "client-secret";

	/// Builds a reqwest HTTP client that accepts the self-signed certificates produced by
	/// `httpmock` during tests.
	pub fn test_reqwest_http_client() -> ReqwestHttpClient {
		let client = ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()
			.expect("Failed to build insecure Reqwest client for tests.");

		ReqwestHttpClient::with_client(client)
	}

	/// Builds an OAuth client configuration whose endpoints live under `base`.
	pub fn test_oauth_config(base: &str) -> OAuthClientConfig {
		let base = base.trim_end_matches('/');

		OAuthClientConfig::new(
			TEST_CLIENT_ID,
			TEST_CLIENT_SECRET,
			Url::parse("http://localhost/callback").expect("Redirect fixture should parse."),
			Url::parse(&format!("{base}/auth")).expect("Authorization fixture should parse."),
			Url::parse(&format!("{base}/token")).expect("Token fixture should parse."),
		)
	}

	/// Constructs an [`OAuthFlowManager`] backed by a fresh in-memory store and the provided
	/// clock.
	pub fn build_test_flow_manager(
		config: OAuthClientConfig,
		clock: Arc<FixedClock>,
	) -> (OAuthFlowManager, Arc<MemoryStore>) {
		let store = Arc::new(MemoryStore::default());
		let states: Arc<dyn StateStore> = store.clone();
		let tokens: Arc<dyn TokenStore> = store.clone();
		let clock: Arc<dyn Clock> = clock;
		let manager = OAuthFlowManager::new(Some(config), states, tokens)
			.expect("Test OAuth configuration should be complete.")
			.with_http_client(test_reqwest_http_client())
			.with_clock(clock);

		(manager, store)
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

pub use reqwest;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
