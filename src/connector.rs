//! Document connector contract, its error taxonomy, and the admission/retry/metrics gateway in
//! front of it.

pub mod gateway;

pub use gateway::ConnectorGateway;

// self
use crate::{_prelude::*, auth::SessionKey, resilience::Classify};

/// Connector name reserved for deployments without a document backend.
pub const NOOP_CONNECTOR_NAME: &str = "none";

/// Future returned by every [`DocumentConnector`] operation.
pub type ConnectorFuture<'a, T> =
	Pin<Box<dyn Future<Output = Result<T, ConnectorError>> + 'a + Send>>;

/// Document pulled from or pushed to an external source.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
	/// Upstream document identifier.
	pub id: String,
	/// Display title; connectors fall back to the identifier when the upstream has none.
	pub title: String,
	/// Plain-text body.
	pub content: String,
}

/// Request to read a document.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImportRequest {
	/// Upstream document identifier.
	pub document_id: String,
	/// Session whose OAuth token should authorize the call, if any.
	pub session_key: Option<SessionKey>,
}
impl ImportRequest {
	/// Creates a request without a session binding.
	pub fn new(document_id: impl Into<String>) -> Self {
		Self { document_id: document_id.into(), session_key: None }
	}

	/// Binds the request to an OAuth session.
	pub fn with_session_key(mut self, session_key: SessionKey) -> Self {
		self.session_key = Some(session_key);

		self
	}
}

/// Request to replace a document's body.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExportRequest {
	/// Upstream document identifier.
	pub document_id: String,
	/// New plain-text body.
	pub content: String,
	/// Session whose OAuth token should authorize the call, if any.
	pub session_key: Option<SessionKey>,
}
impl ExportRequest {
	/// Creates a request without a session binding.
	pub fn new(document_id: impl Into<String>, content: impl Into<String>) -> Self {
		Self { document_id: document_id.into(), content: content.into(), session_key: None }
	}

	/// Binds the request to an OAuth session.
	pub fn with_session_key(mut self, session_key: SessionKey) -> Self {
		self.session_key = Some(session_key);

		self
	}
}

/// Document source and sink consumed by the gateway.
pub trait DocumentConnector
where
	Self: Send + Sync,
{
	/// Stable connector name used in metrics and logs.
	fn name(&self) -> &str;

	/// Reads a document.
	fn import_document<'a>(&'a self, request: &'a ImportRequest) -> ConnectorFuture<'a, Document>;

	/// Replaces a document's content.
	fn export_content<'a>(&'a self, request: &'a ExportRequest) -> ConnectorFuture<'a, ()>;
}

/// Failure taxonomy every connector maps its upstream errors into.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum ConnectorError {
	/// No connector backend is configured.
	#[error("No connector is configured.")]
	NotConfigured,
	/// The upstream rejected the credentials the gateway presented.
	#[error("Connector credentials were rejected by the upstream service.")]
	Unauthorized,
	/// The credentials are valid but lack access to the document.
	#[error("Connector access to the document is forbidden.")]
	Forbidden,
	/// The document does not exist.
	#[error("Connector document was not found.")]
	NotFound,
	/// The upstream is throttling or failing, or no credential is available.
	#[error("Connector service is unavailable: {message}.")]
	Unavailable {
		/// Human-readable explanation.
		message: String,
	},
	/// The connector does not implement the requested operation.
	#[error("Connector operation is not implemented.")]
	NotImplemented,
}
impl ConnectorError {
	/// Builds an [`Unavailable`](ConnectorError::Unavailable) error.
	pub fn unavailable(message: impl Into<String>) -> Self {
		Self::Unavailable { message: message.into() }
	}

	/// Classifies an upstream HTTP status; statuses outside the taxonomy yield `None`.
	pub fn from_status(status: u16) -> Option<Self> {
		match status {
			401 => Some(Self::Unauthorized),
			403 => Some(Self::Forbidden),
			404 => Some(Self::NotFound),
			429 | 500.. => Some(Self::unavailable(format!("upstream responded with {status}"))),
			_ => None,
		}
	}

	/// Stable machine-readable code.
	pub fn code(&self) -> &'static str {
		match self {
			Self::NotConfigured => "connector_unavailable",
			Self::Unauthorized => "connector_upstream_unauthorized",
			Self::Forbidden => "connector_forbidden",
			Self::NotFound => "connector_document_not_found",
			Self::Unavailable { .. } => "connector_service_unavailable",
			Self::NotImplemented => "connector_not_implemented",
		}
	}

	/// HTTP status a transport layer should answer with.
	pub fn http_status(&self) -> u16 {
		match self {
			Self::NotConfigured => 400,
			Self::Unauthorized => 502,
			Self::Forbidden => 403,
			Self::NotFound => 404,
			Self::Unavailable { .. } => 503,
			Self::NotImplemented => 501,
		}
	}
}
impl Classify for ConnectorError {
	fn is_retryable(&self) -> bool {
		matches!(self, Self::Unavailable { .. })
	}

	fn category(&self) -> &'static str {
		self.code()
	}
}

/// Placeholder connector used when no backend is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopConnector;
impl DocumentConnector for NoopConnector {
	fn name(&self) -> &str {
		NOOP_CONNECTOR_NAME
	}

	fn import_document<'a>(&'a self, _: &'a ImportRequest) -> ConnectorFuture<'a, Document> {
		Box::pin(async { Err(ConnectorError::NotImplemented) })
	}

	fn export_content<'a>(&'a self, _: &'a ExportRequest) -> ConnectorFuture<'a, ()> {
		Box::pin(async { Err(ConnectorError::NotImplemented) })
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn upstream_statuses_map_into_taxonomy() {
		assert_eq!(ConnectorError::from_status(401), Some(ConnectorError::Unauthorized));
		assert_eq!(ConnectorError::from_status(403), Some(ConnectorError::Forbidden));
		assert_eq!(ConnectorError::from_status(404), Some(ConnectorError::NotFound));
		assert!(matches!(
			ConnectorError::from_status(429),
			Some(ConnectorError::Unavailable { .. })
		));
		assert!(matches!(
			ConnectorError::from_status(502),
			Some(ConnectorError::Unavailable { .. })
		));
		assert_eq!(ConnectorError::from_status(400), None);
	}

	#[test]
	fn codes_and_statuses_follow_handler_contract() {
		let cases = [
			(ConnectorError::NotConfigured, "connector_unavailable", 400),
			(ConnectorError::Unauthorized, "connector_upstream_unauthorized", 502),
			(ConnectorError::Forbidden, "connector_forbidden", 403),
			(ConnectorError::NotFound, "connector_document_not_found", 404),
			(ConnectorError::unavailable("down"), "connector_service_unavailable", 503),
			(ConnectorError::NotImplemented, "connector_not_implemented", 501),
		];

		for (err, code, status) in cases {
			assert_eq!(err.code(), code);
			assert_eq!(err.http_status(), status);

			let gateway_error = Error::from(err);

			assert_eq!(gateway_error.code(), code);
			assert_eq!(gateway_error.http_status(), status);
		}
	}

	#[test]
	fn only_unavailable_is_retryable() {
		assert!(ConnectorError::unavailable("throttled").is_retryable());
		assert!(!ConnectorError::NotFound.is_retryable());
		assert!(!ConnectorError::Unauthorized.is_retryable());
	}

	#[tokio::test]
	async fn noop_connector_reports_not_implemented() {
		let connector = NoopConnector;

		assert_eq!(connector.name(), NOOP_CONNECTOR_NAME);
		assert_eq!(
			connector.import_document(&ImportRequest::new("doc-1")).await,
			Err(ConnectorError::NotImplemented)
		);
		assert_eq!(
			connector.export_content(&ExportRequest::new("doc-1", "body")).await,
			Err(ConnectorError::NotImplemented)
		);
	}
}
