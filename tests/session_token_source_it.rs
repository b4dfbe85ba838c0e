#![cfg(feature = "test")]

// std
use std::sync::Arc;
// crates.io
use httpmock::prelude::*;
use time::{Duration, macros};
use url::Url;
// self
use homer_gateway::{
	_preludet::test_reqwest_http_client,
	auth::{OAuthToken, SessionKey},
	clock::{Clock, FixedClock},
	config::OAuthClientConfig,
	error::{Error, ExchangeError},
	flows::{CredentialResolver, OAuthFlowManager, TokenSource},
	store::{MemoryStore, StateStore, TokenStore},
};

const SESSION: &str = "session-refresh";

async fn setup(server: &MockServer) -> (Arc<OAuthFlowManager>, Arc<MemoryStore>, Arc<FixedClock>) {
	let config = OAuthClientConfig::new(
		"client-it",
		"secret-it",
		Url::parse("http://localhost/callback").expect("Redirect URL fixture should parse."),
		Url::parse(&server.url("/auth")).expect("Mock auth endpoint should parse."),
		Url::parse(&server.url("/token")).expect("Mock token endpoint should parse."),
	);
	let store = Arc::new(MemoryStore::default());
	let clock = Arc::new(FixedClock::new(macros::datetime!(2026-02-22 12:00 UTC)));
	let states: Arc<dyn StateStore> = store.clone();
	let tokens: Arc<dyn TokenStore> = store.clone();
	let dyn_clock: Arc<dyn Clock> = clock.clone();
	let manager = OAuthFlowManager::new(Some(config), states, tokens)
		.expect("OAuth configuration fixture should be complete.")
		.with_http_client(test_reqwest_http_client())
		.with_clock(dyn_clock);
	let expired = OAuthToken::bearer("access-0")
		.with_refresh_token("refresh-1")
		.with_expiry(macros::datetime!(2026-02-22 11:59 UTC));

	store
		.save_token(SessionKey::new(SESSION).expect("Session fixture should be valid."), expired)
		.await
		.expect("Memory store writes never fail.");

	(Arc::new(manager), store, clock)
}

#[tokio::test]
async fn expired_token_is_refreshed_and_persisted_with_original_refresh_secret() {
	let server = MockServer::start_async().await;
	let (manager, store, _) = setup(&server).await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200)
				.header("content-type", "application/json")
				.body(r#"{"access_token":"access-1","token_type":"Bearer","expires_in":3600}"#);
		})
		.await;
	let source = manager
		.session_token_source(SESSION)
		.await
		.expect("Session lookup should succeed.")
		.expect("Stored session should produce a token source.");
	let token = source.token().await.expect("Refresh should succeed.");

	mock.assert_async().await;

	assert_eq!(token.access_token.expose(), "access-1");
	assert_eq!(token.refresh_token.as_ref().map(|secret| secret.expose()), Some("refresh-1"));

	let stored = store
		.token(SESSION)
		.await
		.expect("Memory store lookups never fail.")
		.expect("Session token should remain stored.");

	assert_eq!(stored.access_token.expose(), "access-1");
	assert_eq!(stored.refresh_token.as_ref().map(|secret| secret.expose()), Some("refresh-1"));
	assert_eq!(stored.expiry, Some(macros::datetime!(2026-02-22 13:00 UTC)));
}

#[tokio::test]
async fn concurrent_callers_share_one_refresh() {
	let server = MockServer::start_async().await;
	let (manager, _, _) = setup(&server).await;
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(200)
				.header("content-type", "application/json")
				.body(
					r#"{"access_token":"access-2","refresh_token":"refresh-2","token_type":"Bearer","expires_in":3600}"#,
				);
		})
		.await;
	let first = manager
		.session_token_source(SESSION)
		.await
		.expect("Session lookup should succeed.")
		.expect("Stored session should produce a token source.");
	let second = manager
		.session_token_source(SESSION)
		.await
		.expect("Session lookup should succeed.")
		.expect("Stored session should produce a token source.");
	let (a, b) = tokio::join!(first.token(), second.token());
	let a = a.expect("First caller should receive a token.");
	let b = b.expect("Second caller should receive a token.");

	mock.assert_async().await;

	assert_eq!(a.access_token.expose(), "access-2");
	assert_eq!(b.access_token.expose(), "access-2");
	assert_eq!(b.refresh_token.as_ref().map(|secret| secret.expose()), Some("refresh-2"));
}

#[tokio::test]
async fn revoked_refresh_secret_fails_and_keeps_stored_token() {
	let server = MockServer::start_async().await;
	let (manager, store, _) = setup(&server).await;

	server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(400)
				.header("content-type", "application/json")
				.body(r#"{"error":"invalid_grant"}"#);
		})
		.await;

	let resolver = CredentialResolver::new(Some(manager), Some("static-token".into()));
	let err = resolver
		.token_source(Some(SESSION))
		.await
		.expect("Stored session should resolve to its own source.")
		.token()
		.await
		.expect_err("Rejected refresh should fail.");

	assert!(matches!(err, Error::TokenRefreshFailed(ExchangeError::Rejected { .. })));
	assert_eq!(err.http_status(), 502);

	let stored = store
		.token(SESSION)
		.await
		.expect("Memory store lookups never fail.")
		.expect("Session token should remain stored.");

	assert_eq!(stored.access_token.expose(), "access-0");
}

#[tokio::test]
async fn fresh_token_is_served_without_contacting_token_endpoint() {
	let server = MockServer::start_async().await;
	let (manager, store, clock) = setup(&server).await;

	store
		.save_token(
			SessionKey::new(SESSION).expect("Session fixture should be valid."),
			OAuthToken::bearer("access-live").with_expiry(clock.now() + Duration::minutes(30)),
		)
		.await
		.expect("Memory store writes never fail.");

	let token = manager
		.session_token_source(SESSION)
		.await
		.expect("Session lookup should succeed.")
		.expect("Stored session should produce a token source.")
		.token()
		.await
		.expect("Live token needs no refresh.");

	assert_eq!(token.access_token.expose(), "access-live");
	assert_eq!(token.refresh_token.as_ref().map(|secret| secret.expose()), Some("refresh-1"));
}

#[tokio::test]
async fn throttled_refresh_reports_retry_after() {
	let server = MockServer::start_async().await;
	let (manager, _, _) = setup(&server).await;

	server
		.mock_async(|when, then| {
			when.method(POST).path("/token");
			then.status(429)
				.header("content-type", "application/json")
				.header("retry-after", "30")
				.body(r#"{"error":"slow_down"}"#);
		})
		.await;

	let err = manager
		.session_token_source(SESSION)
		.await
		.expect("Session lookup should succeed.")
		.expect("Stored session should produce a token source.")
		.token()
		.await
		.expect_err("Throttled refresh should fail.");

	let Error::TokenRefreshFailed(cause) = &err else {
		panic!("Refresh failures should be reported as such, got {err:?}.");
	};

	assert_eq!(cause.status(), Some(429));
	assert_eq!(cause.retry_after(), Some(Duration::seconds(30)));
}
