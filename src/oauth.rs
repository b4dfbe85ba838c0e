//! Token endpoint facade built on the `oauth2` crate's client with a lenient token response.

pub use oauth2;

// crates.io
use oauth2::{
	AccessToken, AuthUrl, AuthorizationCode, Client, ClientId, ClientSecret, EndpointNotSet,
	EndpointSet, HttpClientError, RedirectUrl, RefreshToken, RequestTokenError, Scope,
	StandardRevocableToken, TokenResponse, TokenType, TokenUrl,
	basic::{
		BasicErrorResponse, BasicRequestTokenError, BasicRevocationErrorResponse,
		BasicTokenIntrospectionResponse,
	},
};
// self
use crate::{
	_prelude::*,
	auth::{OAuthToken, TokenSecret},
	config::OAuthClientConfig,
	error::{ExchangeError, TransportError},
	http::{ResponseMetadata, ResponseMetadataSlot, ReqwestHttpClient},
};

type ConfiguredClient = Client<
	BasicErrorResponse,
	LenientTokenResponse,
	BasicTokenIntrospectionResponse,
	StandardRevocableToken,
	BasicRevocationErrorResponse,
	EndpointSet,
	EndpointNotSet,
	EndpointNotSet,
	EndpointNotSet,
	EndpointSet,
>;

/// Token type exactly as the provider spelled it; blank when omitted.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub(crate) struct RawTokenType(String);
impl TokenType for RawTokenType {}

/// Token endpoint response that tolerates a missing `token_type`.
///
/// Some providers omit the field even though RFC 6749 requires it; such tokens are treated as
/// bearer tokens.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct LenientTokenResponse {
	access_token: AccessToken,
	#[serde(default)]
	token_type: RawTokenType,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	expires_in: Option<u64>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	refresh_token: Option<RefreshToken>,
}
impl TokenResponse for LenientTokenResponse {
	type TokenType = RawTokenType;

	fn access_token(&self) -> &AccessToken {
		&self.access_token
	}

	fn token_type(&self) -> &Self::TokenType {
		&self.token_type
	}

	fn expires_in(&self) -> Option<std::time::Duration> {
		self.expires_in.map(std::time::Duration::from_secs)
	}

	fn refresh_token(&self) -> Option<&RefreshToken> {
		self.refresh_token.as_ref()
	}

	fn scopes(&self) -> Option<&Vec<Scope>> {
		None
	}
}

/// Performs authorization-code and refresh-token grants against the configured token endpoint.
#[derive(Clone)]
pub(crate) struct OAuthFacade {
	oauth_client: ConfiguredClient,
	http_client: ReqwestHttpClient,
	token_url: Url,
}
impl OAuthFacade {
	pub(crate) fn new(config: &OAuthClientConfig, http_client: ReqwestHttpClient) -> Self {
		let oauth_client = Client::new(ClientId::new(config.client_id.clone()))
			.set_client_secret(ClientSecret::new(config.client_secret.clone()))
			.set_auth_uri(AuthUrl::from_url(config.auth_url.clone()))
			.set_token_uri(TokenUrl::from_url(config.token_url.clone()))
			.set_redirect_uri(RedirectUrl::from_url(config.redirect_url.clone()));

		Self { oauth_client, http_client, token_url: config.token_url.clone() }
	}

	pub(crate) fn with_http_client(mut self, http_client: ReqwestHttpClient) -> Self {
		self.http_client = http_client;

		self
	}

	/// Redeems an authorization code; `now` anchors the relative `expires_in`.
	pub(crate) async fn exchange_code(
		&self,
		code: &str,
		now: OffsetDateTime,
	) -> Result<OAuthToken, ExchangeError> {
		let meta = ResponseMetadataSlot::default();
		let instrumented = self.http_client.instrumented(meta.clone());
		let response = self
			.oauth_client
			.exchange_code(AuthorizationCode::new(code.to_owned()))
			.request_async(&instrumented)
			.await
			.map_err(|err| map_request_error(meta.take(), err))?;

		Ok(map_token_response(&response, now))
	}

	/// Runs a refresh-token grant. The returned token carries a refresh secret only when the
	/// provider rotated it.
	pub(crate) async fn refresh_token(
		&self,
		refresh_token: &TokenSecret,
		now: OffsetDateTime,
	) -> Result<OAuthToken, ExchangeError> {
		let meta = ResponseMetadataSlot::default();
		let instrumented = self.http_client.instrumented(meta.clone());
		let refresh_secret = RefreshToken::new(refresh_token.expose().to_owned());
		let response = self
			.oauth_client
			.exchange_refresh_token(&refresh_secret)
			.request_async(&instrumented)
			.await
			.map_err(|err| map_request_error(meta.take(), err))?;

		Ok(map_token_response(&response, now))
	}
}
impl Debug for OAuthFacade {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("OAuthFacade")
			.field("client_id", &self.oauth_client.client_id().as_str())
			.field("token_url", &self.token_url.as_str())
			.finish()
	}
}

fn map_token_response(response: &LenientTokenResponse, now: OffsetDateTime) -> OAuthToken {
	let token_type = match response.token_type().0.trim() {
		kind if kind.is_empty() || kind.eq_ignore_ascii_case("bearer") => "Bearer".to_owned(),
		kind => kind.to_owned(),
	};
	let expiry = response
		.expires_in()
		.and_then(|expires_in| Duration::try_from(expires_in).ok())
		.filter(|expires_in| expires_in.is_positive())
		.map(|expires_in| now + expires_in);

	OAuthToken {
		access_token: TokenSecret::new(response.access_token().secret().to_owned()),
		refresh_token: response
			.refresh_token()
			.and_then(|refresh| TokenSecret::non_empty(refresh.secret().to_owned())),
		token_type,
		expiry,
	}
}

fn map_request_error(
	meta: Option<ResponseMetadata>,
	err: BasicRequestTokenError<HttpClientError<ReqwestError>>,
) -> ExchangeError {
	let (status, retry_after) =
		meta.map(|value| (value.status, value.retry_after)).unwrap_or_default();

	match err {
		RequestTokenError::ServerResponse(response) => ExchangeError::Rejected {
			error: response.error().as_ref().to_owned(),
			description: response.error_description().cloned(),
			status,
			retry_after,
		},
		RequestTokenError::Request(HttpClientError::Reqwest(inner)) =>
			TransportError::from(*inner).into(),
		RequestTokenError::Request(HttpClientError::Http(inner)) => inner.into(),
		RequestTokenError::Request(HttpClientError::Io(inner)) => TransportError::Io(inner).into(),
		RequestTokenError::Request(HttpClientError::Other(message)) =>
			ExchangeError::Unexpected { message, status },
		RequestTokenError::Request(_) =>
			ExchangeError::Unexpected { message: "HTTP client error".into(), status },
		RequestTokenError::Parse(source, _body) => ExchangeError::ResponseParse { source, status },
		RequestTokenError::Other(message) => ExchangeError::Unexpected { message, status },
	}
}
