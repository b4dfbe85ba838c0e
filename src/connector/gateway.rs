//! Admission, retry, and metrics around a [`DocumentConnector`].

// crates.io
use tokio::time::Instant;
// self
use crate::{
	_prelude::*,
	connector::{
		ConnectorError, Document, DocumentConnector, ExportRequest, ImportRequest,
		NOOP_CONNECTOR_NAME,
	},
	obs::{CallSpan, CallStatus, Component, MetricsRegistry},
	resilience::{
		AttemptFailure, CallContext, RateLimitDecision, RateLimitPolicy, RetryError, RetryPolicy,
	},
};

const IMPORT: &str = "import";
const EXPORT: &str = "export";
const NO_ERROR: &str = "none";

/// Runs connector operations behind the rate limiter, the retry policy, and the metrics
/// registry.
///
/// Every request is admitted (or rejected) before any upstream work starts. Rejected requests
/// are not recorded in the metrics registry; every admitted request records exactly one
/// connector observation.
#[derive(Clone)]
pub struct ConnectorGateway {
	connector: Arc<dyn DocumentConnector>,
	limiter: Arc<dyn RateLimitPolicy>,
	retry: RetryPolicy,
	metrics: Arc<MetricsRegistry>,
}
impl ConnectorGateway {
	/// Creates a gateway using the default retry policy.
	pub fn new(
		connector: Arc<dyn DocumentConnector>,
		limiter: Arc<dyn RateLimitPolicy>,
		metrics: Arc<MetricsRegistry>,
	) -> Self {
		Self { connector, limiter, retry: RetryPolicy::default(), metrics }
	}

	/// Overrides the retry policy.
	pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;

		self
	}

	/// Name of the wrapped connector.
	pub fn connector_name(&self) -> &str {
		self.connector.name()
	}

	/// Imports a document.
	pub async fn import_document(
		&self,
		ctx: &CallContext,
		request: ImportRequest,
	) -> Result<Document> {
		self.admit(IMPORT)?;

		let started = Instant::now();

		if let Some(err) = self.unconfigured(IMPORT, started) {
			return Err(err);
		}

		let span = CallSpan::new(Component::Connector, IMPORT);

		tracing::info!(
			connector = self.connector.name(),
			operation = IMPORT,
			document_id = request.document_id.trim(),
			"Connector call started."
		);

		let result = span
			.instrument(self.retry.run(ctx, |_| self.connector.import_document(&request)))
			.await
			.map_err(into_gateway_error);

		self.observe(IMPORT, started, result.as_ref().err());

		result
	}

	/// Replaces a document's content.
	pub async fn export_content(&self, ctx: &CallContext, request: ExportRequest) -> Result<()> {
		self.admit(EXPORT)?;

		let started = Instant::now();

		if let Some(err) = self.unconfigured(EXPORT, started) {
			return Err(err);
		}

		let span = CallSpan::new(Component::Connector, EXPORT);

		tracing::info!(
			connector = self.connector.name(),
			operation = EXPORT,
			document_id = request.document_id.trim(),
			"Connector call started."
		);

		let result = span
			.instrument(self.retry.run(ctx, |_| self.connector.export_content(&request)))
			.await
			.map_err(into_gateway_error);

		self.observe(EXPORT, started, result.as_ref().err());

		result
	}

	fn admit(&self, operation: &'static str) -> Result<()> {
		match self.limiter.check() {
			RateLimitDecision::Allow => Ok(()),
			RateLimitDecision::Delay(directive) => {
				tracing::info!(
					operation,
					retry_after_ms = directive.recommended_backoff.whole_milliseconds() as i64,
					"Connector request rate limited."
				);

				Err(Error::RateLimited { retry_after: directive.recommended_backoff })
			},
		}
	}

	fn unconfigured(&self, operation: &'static str, started: Instant) -> Option<Error> {
		if self.connector.name() != NOOP_CONNECTOR_NAME {
			return None;
		}

		let err = Error::from(ConnectorError::NotConfigured);

		self.observe(operation, started, Some(&err));

		Some(err)
	}

	fn observe(&self, operation: &'static str, started: Instant, err: Option<&Error>) {
		let duration = started.elapsed();
		let (status, error_code) = match err {
			None => (CallStatus::Success, NO_ERROR),
			Some(err) => (CallStatus::Error, err.code()),
		};
		let connector = self.connector.name();

		self.metrics.record_connector_call(
			connector,
			operation,
			status.as_str(),
			error_code,
			duration,
		);

		match err {
			None => tracing::info!(
				component = Component::Connector.as_str(),
				connector,
				operation,
				status = status.as_str(),
				error_code,
				duration_ms = duration.as_millis() as u64,
				"Connector call completed."
			),
			Some(err) => tracing::warn!(
				component = Component::Connector.as_str(),
				connector,
				operation,
				status = status.as_str(),
				error_code,
				duration_ms = duration.as_millis() as u64,
				error = %err,
				"Connector call failed."
			),
		}
	}
}
impl Debug for ConnectorGateway {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ConnectorGateway")
			.field("connector", &self.connector.name())
			.field("retry", &self.retry)
			.finish()
	}
}

fn into_gateway_error(err: RetryError<ConnectorError>) -> Error {
	match err {
		RetryError::Cancelled => Error::Cancelled,
		RetryError::DeadlineExceeded => Error::DeadlineExceeded,
		RetryError::Terminal(err) | RetryError::Exhausted { last: AttemptFailure::Failed(err), .. } =>
			err.into(),
		RetryError::Exhausted { last: AttemptFailure::TimedOut, .. } =>
			ConnectorError::unavailable("upstream timed out").into(),
	}
}
