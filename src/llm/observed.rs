//! [`LlmProvider`] wrapper adding the retry policy, per-call metrics, and completion logs.

// crates.io
use tokio::time::Instant;
// self
use crate::{
	_prelude::*,
	llm::{LlmProvider, RewriteRequest, SummarizeRequest},
	obs::{CallSpan, CallStatus, Component, MetricsRegistry},
	resilience::{CallContext, Classify, RetryError, RetryPolicy, UpstreamError},
};

const SUMMARIZE: &str = "summarize";
const REWRITE: &str = "rewrite";
const NO_ERROR: &str = "none";

/// Wraps a provider with the retry policy, per-call metrics, and structured logs.
///
/// One metrics observation is recorded per logical call, after the retry policy has produced
/// a final outcome.
#[derive(Clone)]
pub struct ObservedProvider {
	inner: Arc<dyn LlmProvider>,
	retry: RetryPolicy,
	metrics: Arc<MetricsRegistry>,
}
impl ObservedProvider {
	/// Wraps `inner` using the default retry policy.
	pub fn new(inner: Arc<dyn LlmProvider>, metrics: Arc<MetricsRegistry>) -> Self {
		Self { inner, retry: RetryPolicy::default(), metrics }
	}

	/// Overrides the retry policy.
	pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
		self.retry = retry;

		self
	}

	/// Name of the wrapped provider.
	pub fn name(&self) -> &str {
		self.inner.name()
	}

	/// Summarizes documents through the wrapped provider.
	pub async fn summarize(&self, ctx: &CallContext, request: &SummarizeRequest) -> Result<String> {
		self.observe(SUMMARIZE, self.retry.run(ctx, |_| self.inner.summarize(request))).await
	}

	/// Rewrites text through the wrapped provider.
	pub async fn rewrite(&self, ctx: &CallContext, request: &RewriteRequest) -> Result<String> {
		self.observe(REWRITE, self.retry.run(ctx, |_| self.inner.rewrite(request))).await
	}

	async fn observe<Fut>(&self, operation: &'static str, call: Fut) -> Result<String>
	where
		Fut: Future<Output = Result<String, RetryError<UpstreamError>>>,
	{
		let provider = self.inner.name();
		let started = Instant::now();

		tracing::debug!(provider, operation, "Provider call started.");

		let result = CallSpan::new(Component::Provider, operation).instrument(call).await;
		let duration = started.elapsed();
		let (status, error_category) = match &result {
			Ok(_) => (CallStatus::Success, NO_ERROR),
			Err(err) => (CallStatus::Error, err.category()),
		};

		self.metrics.record_provider_call(
			provider,
			operation,
			status.as_str(),
			error_category,
			duration,
		);
		tracing::info!(
			component = Component::Provider.as_str(),
			provider,
			operation,
			status = status.as_str(),
			error_category,
			duration_ms = duration.as_millis() as u64,
			"Provider call completed."
		);

		result.map_err(Error::from)
	}
}
impl Debug for ObservedProvider {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("ObservedProvider")
			.field("provider", &self.inner.name())
			.field("retry", &self.retry)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// std
	use std::{
		sync::atomic::{AtomicU32, Ordering},
		time::Duration as StdDuration,
	};
	// self
	use super::*;
	use crate::llm::{MockProvider, ProviderFuture};

	struct FlakyProvider {
		calls: AtomicU32,
		status: u16,
	}
	impl LlmProvider for FlakyProvider {
		fn name(&self) -> &str {
			"flaky"
		}

		fn summarize<'a>(&'a self, _: &'a SummarizeRequest) -> ProviderFuture<'a> {
			self.calls.fetch_add(1, Ordering::SeqCst);

			let status = self.status;

			Box::pin(async move {
				Err(UpstreamError::Status { service: "flaky".into(), status, message: String::new() })
			})
		}

		fn rewrite<'a>(&'a self, _: &'a RewriteRequest) -> ProviderFuture<'a> {
			Box::pin(async { Err(UpstreamError::Timeout) })
		}
	}

	fn policy() -> RetryPolicy {
		RetryPolicy::new(StdDuration::from_secs(1), 2, StdDuration::from_millis(10))
	}

	#[tokio::test]
	async fn success_is_recorded_with_none_category() {
		let metrics = Arc::new(MetricsRegistry::new());
		let provider = ObservedProvider::new(Arc::new(MockProvider), metrics.clone());
		let request = RewriteRequest { text: "hi".into(), mode: "formal".into(), ..Default::default() };
		let output =
			provider.rewrite(&CallContext::new(), &request).await.expect("Mock rewrite succeeds.");

		assert_eq!(output, "[mock rewrite:formal] hi");
		assert_eq!(metrics.provider_requests("mock", "rewrite", "success", "none"), 1);
	}

	#[tokio::test(start_paused = true)]
	async fn exhausted_retries_record_last_category() {
		let metrics = Arc::new(MetricsRegistry::new());
		let inner = Arc::new(FlakyProvider { calls: AtomicU32::new(0), status: 503 });
		let provider =
			ObservedProvider::new(inner.clone(), metrics.clone()).with_retry_policy(policy());
		let err = provider
			.summarize(&CallContext::new(), &SummarizeRequest::default())
			.await
			.expect_err("Persistent 503 should fail.");

		assert_eq!(inner.calls.load(Ordering::SeqCst), 3);
		assert_eq!(err.code(), "upstream_request_failed");
		assert_eq!(err.to_string(), "Upstream request failed after retries.");
		assert_eq!(metrics.provider_requests("flaky", "summarize", "error", "upstream_5xx"), 1);
	}

	#[tokio::test]
	async fn client_errors_are_not_retried() {
		let metrics = Arc::new(MetricsRegistry::new());
		let inner = Arc::new(FlakyProvider { calls: AtomicU32::new(0), status: 400 });
		let provider = ObservedProvider::new(inner.clone(), metrics.clone());
		let err = provider
			.summarize(&CallContext::new(), &SummarizeRequest::default())
			.await
			.expect_err("400 should fail immediately.");

		assert_eq!(inner.calls.load(Ordering::SeqCst), 1);
		assert!(matches!(err, Error::Upstream { category: "upstream_4xx", .. }));
		assert_eq!(metrics.provider_requests("flaky", "summarize", "error", "upstream_4xx"), 1);
	}

	#[tokio::test]
	async fn cancelled_calls_are_recorded_as_cancelled() {
		let metrics = Arc::new(MetricsRegistry::new());
		let provider = ObservedProvider::new(Arc::new(MockProvider), metrics.clone());
		let ctx = CallContext::new();

		ctx.cancel();

		let err = provider
			.rewrite(&ctx, &RewriteRequest::default())
			.await
			.expect_err("Cancelled context should short-circuit.");

		assert!(matches!(err, Error::Cancelled));
		assert_eq!(metrics.provider_requests("mock", "rewrite", "error", "cancelled"), 1);
	}
}
