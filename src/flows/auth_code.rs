//! Authorization-code flow: state issuance, callback validation, and code exchange.

// self
use crate::{
	_prelude::*,
	auth::{OAuthStateToken, SessionKey},
	error::ExchangeError,
	flows::OAuthFlowManager,
	obs::{CallSpan, Component},
	store::OAuthState,
};

/// Result of [`OAuthFlowManager::start_auth`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuthStart {
	/// Correlation key the client presents on later connector calls.
	pub session_key: SessionKey,
	/// Provider consent URL the end user should be redirected to.
	pub authorization_url: Url,
	/// Instant after which the embedded `state` is rejected.
	#[serde(with = "time::serde::rfc3339")]
	pub state_expires_at: OffsetDateTime,
}

/// Result of a successful [`OAuthFlowManager::complete_auth`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct AuthCallback {
	/// Session the issued token was stored under.
	pub session_key: SessionKey,
	/// Access token expiry, when the provider reported one.
	#[serde(with = "time::serde::rfc3339::option")]
	pub expires_at: Option<OffsetDateTime>,
}

/// Query parameters delivered to the redirect URI.
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
pub struct CallbackParams {
	/// Anti-forgery value issued by [`OAuthFlowManager::start_auth`].
	#[serde(default)]
	pub state: Option<String>,
	/// Authorization code to redeem.
	#[serde(default)]
	pub code: Option<String>,
	/// OAuth error reported by the provider (for example `access_denied`).
	#[serde(default)]
	pub error: Option<String>,
	/// Human-readable explanation accompanying `error`.
	#[serde(default)]
	pub error_description: Option<String>,
}

impl OAuthFlowManager {
	/// Issues a new session key and `state`, records the pending state, and returns the
	/// consent URL.
	pub async fn start_auth(&self) -> Result<AuthStart> {
		let span = CallSpan::new(Component::OAuth, "start_auth");

		span.instrument(async move {
			let session_key = SessionKey::new(self.random_value()?)
				.map_err(|err| Error::oauth_unavailable(err.to_string()))?;
			let state = OAuthStateToken::new(self.random_value()?)
				.map_err(|err| Error::oauth_unavailable(err.to_string()))?;
			let state_expires_at = self.clock.now() + self.state_ttl.get();
			let authorization_url = self.authorization_url(&state);

			self.states
				.save_state(OAuthState {
					state,
					session_key: session_key.clone(),
					expires_at: state_expires_at,
				})
				.await?;

			tracing::info!(%state_expires_at, "OAuth authorization started.");

			Ok(AuthStart { session_key, authorization_url, state_expires_at })
		})
		.await
	}

	/// Redeems `code` for the session bound to `state`.
	///
	/// Both values are trimmed. A blank `state` fails with [`Error::OAuthStateInvalid`] and a
	/// blank `code` with [`ExchangeError::MissingCode`]; neither consumes the pending state.
	/// Otherwise the state is consumed (single use) before the code is exchanged.
	pub async fn complete_auth(&self, state: &str, code: &str) -> Result<AuthCallback> {
		let span = CallSpan::new(Component::OAuth, "complete_auth");

		span.instrument(async move {
			let state = state.trim();
			let code = code.trim();

			if state.is_empty() {
				return Err(Error::OAuthStateInvalid);
			}
			if code.is_empty() {
				return Err(Error::OAuthExchangeFailed(ExchangeError::MissingCode));
			}

			let now = self.clock.now();
			let session_key = self.states.consume_state(state, now).await?.ok_or_else(|| {
				tracing::warn!("OAuth callback presented an unknown or expired state.");

				Error::OAuthStateInvalid
			})?;
			let token = self.facade.exchange_code(code, now).await.map_err(|err| {
				tracing::warn!(
					error = %err,
					status = ?err.status(),
					retry_after = ?err.retry_after(),
					"OAuth code exchange failed."
				);

				Error::OAuthExchangeFailed(err)
			})?;
			let expires_at = token.expiry;

			self.tokens.save_token(session_key.clone(), token).await?;

			tracing::info!(has_expiry = expires_at.is_some(), "OAuth authorization completed.");

			Ok(AuthCallback { session_key, expires_at })
		})
		.await
	}

	/// Handles the redirect query: a provider-reported `error` short-circuits to
	/// [`Error::OAuthAccessDenied`] before `state` or `code` are inspected.
	pub async fn handle_callback(&self, params: CallbackParams) -> Result<AuthCallback> {
		if let Some(error) = non_blank(params.error.as_deref()) {
			let message = non_blank(params.error_description.as_deref()).unwrap_or(error);

			tracing::info!(error, "OAuth consent was denied.");

			return Err(Error::OAuthAccessDenied { message: message.to_owned() });
		}

		self.complete_auth(
			params.state.as_deref().unwrap_or_default(),
			params.code.as_deref().unwrap_or_default(),
		)
		.await
	}

	/// Builds the consent URL; parameters are appended in key order.
	fn authorization_url(&self, state: &OAuthStateToken) -> Url {
		let mut url = self.config.auth_url.clone();
		let mut pairs = url.query_pairs_mut();

		pairs.append_pair("access_type", "offline");
		pairs.append_pair("client_id", &self.config.client_id);
		pairs.append_pair("prompt", "consent");
		pairs.append_pair("redirect_uri", self.config.redirect_url.as_str());
		pairs.append_pair("response_type", "code");

		if !self.config.scopes.is_empty() {
			pairs.append_pair("scope", &self.config.scopes.join(" "));
		}

		pairs.append_pair("state", state.as_str());

		drop(pairs);

		url
	}

	fn random_value(&self) -> Result<String> {
		(self.generator)().map_err(|err| Error::oauth_unavailable(err.to_string()))
	}
}

fn non_blank(value: Option<&str>) -> Option<&str> {
	value.map(str::trim).filter(|value| !value.is_empty())
}
