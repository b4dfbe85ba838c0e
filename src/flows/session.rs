//! Token sources handed to connectors.
//!
//! [`SessionTokenSource`] decorates a [`RefreshingTokenSource`] so every successful call
//! persists the (possibly refreshed) token back to the [`TokenStore`] while holding the
//! session's guard. [`CredentialResolver`] picks the session source when one exists and falls
//! back to a static credential otherwise.

// self
use crate::{
	_prelude::*,
	auth::{OAuthToken, SessionKey},
	clock::Clock,
	connector::ConnectorError,
	error::ExchangeError,
	flows::OAuthFlowManager,
	oauth::OAuthFacade,
	obs::{CallSpan, Component},
	store::TokenStore,
};

/// Future returned by [`TokenSource::token`].
pub type TokenFuture<'a> = Pin<Box<dyn Future<Output = Result<OAuthToken>> + 'a + Send>>;

/// Produces a currently usable OAuth token.
pub trait TokenSource
where
	Self: Send + Sync,
{
	/// Returns a token that is valid now, refreshing it first when necessary.
	fn token(&self) -> TokenFuture<'_>;
}

/// Always returns the same long-lived credential.
#[derive(Clone, Debug)]
pub struct StaticTokenSource(OAuthToken);
impl StaticTokenSource {
	/// Wraps a bearer access token with no expiry.
	pub fn new(access_token: impl Into<String>) -> Self {
		Self(OAuthToken::bearer(access_token))
	}
}
impl TokenSource for StaticTokenSource {
	fn token(&self) -> TokenFuture<'_> {
		Box::pin(async move { Ok(self.0.clone()) })
	}
}

/// Reads a session's stored token and refreshes it through the token endpoint once it
/// expires.
///
/// The stored token is re-read on every call, so a caller that waited behind another caller's
/// refresh picks up the rotated token instead of refreshing again.
pub struct RefreshingTokenSource {
	session_key: SessionKey,
	facade: OAuthFacade,
	tokens: Arc<dyn TokenStore>,
	clock: Arc<dyn Clock>,
}
impl RefreshingTokenSource {
	pub(crate) fn new(
		session_key: SessionKey,
		facade: OAuthFacade,
		tokens: Arc<dyn TokenStore>,
		clock: Arc<dyn Clock>,
	) -> Self {
		Self { session_key, facade, tokens, clock }
	}
}
impl TokenSource for RefreshingTokenSource {
	fn token(&self) -> TokenFuture<'_> {
		Box::pin(async move {
			let current = self.tokens.token(self.session_key.as_str()).await?.ok_or_else(|| {
				Error::from(ConnectorError::unavailable("session token is no longer stored"))
			})?;
			let now = self.clock.now();

			if current.is_valid_at(now) {
				return Ok(current);
			}

			let refresh_token = current
				.refresh_token
				.as_ref()
				.ok_or(Error::TokenRefreshFailed(ExchangeError::MissingRefreshToken))?;
			let mut refreshed = CallSpan::new(Component::OAuth, "refresh_token")
				.instrument(self.facade.refresh_token(refresh_token, now))
				.await
				.map_err(|err| {
					tracing::warn!(
						error = %err,
						status = ?err.status(),
						retry_after = ?err.retry_after(),
						"OAuth token refresh failed."
					);

					Error::TokenRefreshFailed(err)
				})?;

			refreshed.inherit_refresh_token(&current);

			tracing::info!(has_expiry = refreshed.expiry.is_some(), "OAuth token refreshed.");

			Ok(refreshed)
		})
	}
}
impl Debug for RefreshingTokenSource {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RefreshingTokenSource")
			.field("session_key", &self.session_key)
			.field("facade", &self.facade)
			.finish()
	}
}

/// Persists every token produced by `inner` under `session_key`.
///
/// Calls for one session are serialized behind a shared guard, so a refresh and its write-back
/// never interleave with another caller's.
pub struct SessionTokenSource {
	session_key: SessionKey,
	inner: Arc<dyn TokenSource>,
	tokens: Arc<dyn TokenStore>,
	guard: Arc<AsyncMutex<()>>,
}
impl SessionTokenSource {
	/// Wraps `inner` with its own guard.
	pub fn new(
		session_key: SessionKey,
		inner: Arc<dyn TokenSource>,
		tokens: Arc<dyn TokenStore>,
	) -> Self {
		Self { session_key, inner, tokens, guard: Default::default() }
	}

	/// Session this source persists into.
	pub fn session_key(&self) -> &SessionKey {
		&self.session_key
	}
}
impl TokenSource for SessionTokenSource {
	fn token(&self) -> TokenFuture<'_> {
		Box::pin(async move {
			let _singleflight = self.guard.lock().await;
			let token = self.inner.token().await?;

			self.tokens.save_token(self.session_key.clone(), token.clone()).await?;

			tracing::debug!(
				has_refresh_token = token.refresh_token.is_some(),
				"Persisted session token."
			);

			Ok(token)
		})
	}
}
impl Debug for SessionTokenSource {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("SessionTokenSource").field("session_key", &self.session_key).finish()
	}
}

impl OAuthFlowManager {
	/// Returns a persisting, refreshing token source for `session_key`, or `None` when the
	/// session has no stored token.
	pub async fn session_token_source(
		&self,
		session_key: &str,
	) -> Result<Option<SessionTokenSource>> {
		let Ok(session_key) = SessionKey::new(session_key) else {
			return Ok(None);
		};

		if self.tokens.token(session_key.as_str()).await?.is_none() {
			return Ok(None);
		}

		let inner = RefreshingTokenSource::new(
			session_key.clone(),
			self.facade.clone(),
			self.tokens.clone(),
			self.clock.clone(),
		);
		let guard = self.session_guard(&session_key);

		Ok(Some(SessionTokenSource {
			session_key,
			inner: Arc::new(inner),
			tokens: self.tokens.clone(),
			guard,
		}))
	}
}

/// Chooses the credential for a connector call.
///
/// Resolution order: the OAuth session named by the request, then the static access token,
/// then [`ConnectorError::Unavailable`].
#[derive(Clone, Debug, Default)]
pub struct CredentialResolver {
	oauth: Option<Arc<OAuthFlowManager>>,
	fallback: Option<StaticTokenSource>,
}
impl CredentialResolver {
	/// Creates a resolver; blank static tokens are ignored.
	pub fn new(oauth: Option<Arc<OAuthFlowManager>>, static_access_token: Option<String>) -> Self {
		let fallback = static_access_token
			.filter(|token| !token.trim().is_empty())
			.map(|token| StaticTokenSource::new(token.trim()));

		Self { oauth, fallback }
	}

	/// Returns the token source for a request carrying `session_key`.
	pub async fn token_source(&self, session_key: Option<&str>) -> Result<Arc<dyn TokenSource>> {
		let session_key = session_key.map(str::trim).filter(|key| !key.is_empty());

		if let (Some(manager), Some(session_key)) = (&self.oauth, session_key) {
			if let Some(source) = manager.session_token_source(session_key).await? {
				return Ok(Arc::new(source));
			}

			tracing::debug!("No OAuth token is stored for the session; trying the static token.");
		}

		match &self.fallback {
			Some(source) => Ok(Arc::new(source.clone())),
			None => Err(ConnectorError::unavailable(
				"connect an OAuth session or set GOOGLE_DOCS_ACCESS_TOKEN",
			)
			.into()),
		}
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::{_preludet::*, clock::FixedClock, store::MemoryStore};

	fn manager() -> (Arc<OAuthFlowManager>, Arc<MemoryStore>) {
		let clock = Arc::new(FixedClock::new(macros::datetime!(2026-02-22 12:00 UTC)));
		let (manager, store) =
			build_test_flow_manager(test_oauth_config("http://127.0.0.1:9"), clock);

		(Arc::new(manager), store)
	}

	#[tokio::test]
	async fn valid_token_is_persisted_without_refresh() {
		let (manager, store) = manager();
		let key = SessionKey::new("session-1").expect("Session fixture should be valid.");
		let token = OAuthToken::bearer("access-1")
			.with_refresh_token("refresh-1")
			.with_expiry(macros::datetime!(2026-02-22 13:00 UTC));

		store.save_token(key.clone(), token).await.expect("Memory store never fails.");

		let source = manager
			.session_token_source("session-1")
			.await
			.expect("Lookup should succeed.")
			.expect("Stored session should yield a source.");
		let token = source.token().await.expect("Valid token needs no refresh.");

		assert_eq!(token.access_token.expose(), "access-1");
		assert_eq!(source.session_key(), &key);
	}

	#[tokio::test]
	async fn expired_token_without_refresh_secret_fails() {
		let (manager, store) = manager();
		let key = SessionKey::new("session-2").expect("Session fixture should be valid.");

		store
			.save_token(
				key,
				OAuthToken::bearer("stale").with_expiry(macros::datetime!(2026-02-22 11:00 UTC)),
			)
			.await
			.expect("Memory store never fails.");

		let source = manager
			.session_token_source("session-2")
			.await
			.expect("Lookup should succeed.")
			.expect("Stored session should yield a source.");
		let err = source.token().await.expect_err("Expired token cannot be refreshed.");

		assert!(matches!(err, Error::TokenRefreshFailed(ExchangeError::MissingRefreshToken)));
		assert_eq!(err.code(), "connector_upstream_unauthorized");
	}

	#[tokio::test]
	async fn resolver_prefers_session_then_static_then_unavailable() {
		let (manager, store) = manager();

		store
			.save_token(
				SessionKey::new("session-3").expect("Session fixture should be valid."),
				OAuthToken::bearer("session-access"),
			)
			.await
			.expect("Memory store never fails.");

		let resolver = CredentialResolver::new(Some(manager.clone()), Some(" static ".into()));
		let from_session = resolver
			.token_source(Some("session-3"))
			.await
			.expect("Session should resolve.")
			.token()
			.await
			.expect("Session token is valid.");

		assert_eq!(from_session.access_token.expose(), "session-access");

		for key in [None, Some(""), Some("unknown-session")] {
			let token = resolver
				.token_source(key)
				.await
				.expect("Static fallback should resolve.")
				.token()
				.await
				.expect("Static token is always valid.");

			assert_eq!(token.access_token.expose(), "static");
		}

		let err = CredentialResolver::new(Some(manager), None)
			.token_source(Some("unknown-session"))
			.await
			.err()
			.expect("Nothing to fall back to.");

		assert_eq!(err.code(), "connector_service_unavailable");
		assert_eq!(err.http_status(), 503);
	}
}
