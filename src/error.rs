//! Gateway-level error types shared across flows, connectors, providers, and stores.

// self
use crate::{_prelude::*, connector::ConnectorError};

/// Gateway-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Canonical gateway error exposed by public APIs.
///
/// Every variant maps to a stable machine-readable [`code`](Error::code) so callers and
/// metrics can tell client misuse, upstream flakiness, and permanent upstream failures apart.
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),

	/// The OAuth flow is not configured or could not be initialized.
	#[error("OAuth is unavailable: {reason}.")]
	OAuthUnavailable {
		/// Human-readable explanation.
		reason: String,
	},
	/// The user declined consent at the authorization server.
	#[error("OAuth access was denied: {message}.")]
	OAuthAccessDenied {
		/// Provider-supplied `error_description`, falling back to `error`.
		message: String,
	},
	/// The `state` parameter is missing, unknown, already consumed, or expired.
	#[error("OAuth state is invalid or expired.")]
	OAuthStateInvalid,
	/// The token endpoint rejected the authorization code or was unreachable.
	#[error("OAuth code exchange failed.")]
	OAuthExchangeFailed(#[source] ExchangeError),
	/// A stored session token could not be refreshed.
	#[error("OAuth token refresh failed.")]
	TokenRefreshFailed(#[source] ExchangeError),
	/// The connector rate limit rejected the request.
	#[error("Connector rate limit exceeded.")]
	RateLimited {
		/// Suggested wait before the next window opens.
		retry_after: Duration,
	},
	/// Connector-level failure classified into the connector taxonomy.
	#[error(transparent)]
	Connector(#[from] ConnectorError),
	/// Upstream provider call failed terminally or after exhausting retries.
	#[error("{message}")]
	Upstream {
		/// Error category recorded in metrics (`timeout`, `upstream_5xx`, ...).
		category: &'static str,
		/// Stable top-level message.
		message: String,
	},
	/// The caller cancelled the request.
	#[error("Request was cancelled.")]
	Cancelled,
	/// The caller's deadline passed before the upstream call completed.
	#[error("Request deadline exceeded.")]
	DeadlineExceeded,
}
impl Error {
	/// Stable machine-readable code for this error.
	pub fn code(&self) -> &'static str {
		match self {
			Self::Storage(_) | Self::Config(_) => "internal_error",
			Self::OAuthUnavailable { .. } => "connector_service_unavailable",
			Self::OAuthAccessDenied { .. } => "oauth_access_denied",
			Self::OAuthStateInvalid => "invalid_oauth_state",
			Self::OAuthExchangeFailed(ExchangeError::MissingCode) => "missing_oauth_code",
			Self::OAuthExchangeFailed(_) => "oauth_exchange_failed",
			Self::TokenRefreshFailed(_) => "connector_upstream_unauthorized",
			Self::RateLimited { .. } => "connector_rate_limited",
			Self::Connector(err) => err.code(),
			Self::Upstream { .. } => "upstream_request_failed",
			Self::Cancelled => "request_cancelled",
			Self::DeadlineExceeded => "upstream_timeout",
		}
	}

	/// HTTP status a transport layer should use when surfacing this error.
	pub fn http_status(&self) -> u16 {
		match self {
			Self::Storage(_) | Self::Config(_) => 500,
			Self::OAuthUnavailable { .. } => 503,
			Self::OAuthAccessDenied { .. } | Self::OAuthStateInvalid => 400,
			Self::OAuthExchangeFailed(ExchangeError::MissingCode) => 400,
			Self::OAuthExchangeFailed(_) | Self::TokenRefreshFailed(_) => 502,
			Self::RateLimited { .. } => 429,
			Self::Connector(err) => err.http_status(),
			Self::Upstream { .. } => 502,
			Self::Cancelled => 499,
			Self::DeadlineExceeded => 504,
		}
	}

	/// Returns `true` when the failure was caused by the client rather than the upstream.
	pub fn is_client_error(&self) -> bool {
		matches!(self.http_status(), 400..=499)
	}

	pub(crate) fn oauth_unavailable(reason: impl Into<String>) -> Self {
		Self::OAuthUnavailable { reason: reason.into() }
	}
}

/// Configuration and validation failures raised while assembling the gateway.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: BoxError,
	},
	/// A required setting is absent or blank.
	#[error("Setting `{name}` is required.")]
	MissingSetting {
		/// Environment variable or field name.
		name: &'static str,
	},
	/// A setting holds a URL that cannot be parsed.
	#[error("Setting `{name}` is not a valid URL.")]
	InvalidUrl {
		/// Environment variable or field name.
		name: &'static str,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Box::new(src) }
	}
}
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Reasons an authorization-code exchange or refresh grant failed at the token endpoint.
#[derive(Debug, ThisError)]
pub enum ExchangeError {
	/// The callback did not carry an authorization code.
	#[error("Authorization code is missing.")]
	MissingCode,
	/// Token endpoint answered with an OAuth error document.
	#[error("Token endpoint returned an OAuth error: {error}.")]
	Rejected {
		/// OAuth `error` field.
		error: String,
		/// OAuth `error_description` field, when present.
		description: Option<String>,
		/// HTTP status code, when available.
		status: Option<u16>,
		/// `Retry-After` hint sent with the rejection.
		retry_after: Option<Duration>,
	},
	/// Token endpoint responded with malformed JSON that could not be parsed.
	#[error("Token endpoint returned malformed JSON.")]
	ResponseParse {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::error::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Token endpoint returned something the OAuth client could not interpret.
	#[error("Token endpoint returned an unexpected response: {message}.")]
	Unexpected {
		/// Summary of the failure.
		message: String,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// The session has no refresh token so an expired access token cannot be renewed.
	#[error("Stored token has expired and carries no refresh token.")]
	MissingRefreshToken,
	/// HTTP request construction failed.
	#[error(transparent)]
	HttpRequest(#[from] oauth2::http::Error),
	/// Transport failure (DNS, TCP, TLS, IO).
	#[error(transparent)]
	Transport(#[from] TransportError),
}
impl ExchangeError {
	/// Wait the token endpoint asked for before the next attempt, if any.
	pub fn retry_after(&self) -> Option<Duration> {
		match self {
			Self::Rejected { retry_after, .. } => *retry_after,
			_ => None,
		}
	}

	/// HTTP status returned by the token endpoint, when one was observed.
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::Rejected { status, .. }
			| Self::ResponseParse { status, .. }
			| Self::Unexpected { status, .. } => *status,
			_ => None,
		}
	}
}

/// Transport-level failures (network, IO).
#[derive(Debug, ThisError)]
pub enum TransportError {
	/// Underlying HTTP client reported a network failure.
	#[error("Network error occurred while calling the token endpoint.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
	/// Request timed out before the token endpoint answered.
	#[error("Request timed out while calling the token endpoint.")]
	Timeout,
	/// Underlying IO failure surfaced during transport.
	#[error("I/O error occurred while calling the token endpoint.")]
	Io(#[from] std::io::Error),
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Box::new(src) }
	}
}
impl From<ReqwestError> for TransportError {
	fn from(e: ReqwestError) -> Self {
		if e.is_timeout() { Self::Timeout } else { Self::network(e) }
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn oauth_errors_carry_stable_codes() {
		assert_eq!(Error::OAuthStateInvalid.code(), "invalid_oauth_state");
		assert_eq!(Error::OAuthStateInvalid.http_status(), 400);
		assert_eq!(
			Error::OAuthExchangeFailed(ExchangeError::Unexpected {
				message: "boom".into(),
				status: Some(500),
			})
			.code(),
			"oauth_exchange_failed"
		);
		assert_eq!(Error::oauth_unavailable("not configured").http_status(), 503);
		assert!(Error::OAuthAccessDenied { message: "access_denied".into() }.is_client_error());
	}

	#[test]
	fn missing_code_is_reported_as_client_error() {
		let err = Error::OAuthExchangeFailed(ExchangeError::MissingCode);

		assert_eq!(err.code(), "missing_oauth_code");
		assert!(err.is_client_error());
		assert!(
			StdError::source(&err).is_some(),
			"Exchange failures should expose their cause as the error source."
		);
	}

	#[test]
	fn upstream_errors_present_stable_message() {
		let err = Error::Upstream {
			category: "upstream_5xx",
			message: "Upstream request failed after retries.".into(),
		};

		assert_eq!(err.to_string(), "Upstream request failed after retries.");
		assert_eq!(err.http_status(), 502);
		assert!(!err.is_client_error());
	}
}
