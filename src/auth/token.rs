//! OAuth token model persisted per session.

pub mod secret;

pub use secret::TokenSecret;

// self
use crate::_prelude::*;

/// Tokens are treated as expired this long before their recorded expiry.
pub const EXPIRY_DELTA: Duration = Duration::seconds(10);

/// OAuth credential issued by the authorization server for a single session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthToken {
	/// Bearer credential presented to upstream APIs.
	pub access_token: TokenSecret,
	/// Long-lived secret used to mint new access tokens, when the provider issued one.
	pub refresh_token: Option<TokenSecret>,
	/// Token type reported by the provider (usually `Bearer`).
	pub token_type: String,
	/// Absolute expiry; `None` means the provider did not say.
	#[serde(with = "time::serde::rfc3339::option")]
	pub expiry: Option<OffsetDateTime>,
}
impl OAuthToken {
	/// Creates a bearer token with no refresh secret and no expiry.
	pub fn bearer(access_token: impl Into<String>) -> Self {
		Self {
			access_token: TokenSecret::new(access_token),
			refresh_token: None,
			token_type: "Bearer".into(),
			expiry: None,
		}
	}

	/// Attaches a refresh secret; blank values are ignored.
	pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
		self.refresh_token = TokenSecret::non_empty(refresh_token);

		self
	}

	/// Sets the absolute expiry instant.
	pub fn with_expiry(mut self, expiry: OffsetDateTime) -> Self {
		self.expiry = Some(expiry);

		self
	}

	/// Returns `true` if the token can no longer be presented at `now`.
	///
	/// Tokens without an expiry never expire; otherwise [`EXPIRY_DELTA`] is subtracted from the
	/// expiry before comparing.
	pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
		match self.expiry {
			Some(expiry) => now >= expiry - EXPIRY_DELTA,
			None => false,
		}
	}

	/// Returns `true` if the access token is present and not expired at `now`.
	pub fn is_valid_at(&self, now: OffsetDateTime) -> bool {
		!self.access_token.is_empty() && !self.is_expired_at(now)
	}

	/// Carries the previous refresh secret forward when this token omits one.
	///
	/// Providers routinely drop `refresh_token` from refresh responses; the stored secret must
	/// survive those updates.
	pub fn inherit_refresh_token(&mut self, previous: &OAuthToken) {
		if self.refresh_token.is_none() {
			self.refresh_token = previous.refresh_token.clone();
		}
	}

	/// Formats the `Authorization` header value.
	pub fn authorization_header(&self) -> String {
		let kind = if self.token_type.is_empty() { "Bearer" } else { self.token_type.as_str() };

		format!("{kind} {}", self.access_token.expose())
	}
}
impl Debug for OAuthToken {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("OAuthToken")
			.field("access_token", &"<redacted>")
			.field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
			.field("token_type", &self.token_type)
			.field("expiry", &self.expiry)
			.finish()
	}
}
