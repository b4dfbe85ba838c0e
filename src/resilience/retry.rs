//! Timeout, exponential backoff, and transient-failure classification for upstream calls.

// std
use std::{io::ErrorKind, time::Duration as StdDuration};
// crates.io
use tokio::time::{self, Instant};
use tokio_util::sync::CancellationToken;
// self
use crate::{
	_prelude::*,
	config::{MAX_MAX_RETRIES, RetrySettings},
};

type BoxError = Box<dyn StdError + Send + Sync>;

/// Top-level message presented once every attempt has failed.
pub const RETRIES_EXHAUSTED_MESSAGE: &str = "Upstream request failed after retries.";

const TRANSIENT_MARKERS: [&str; 7] = [
	"timeout",
	"timed out",
	"temporarily unavailable",
	"connection reset",
	"connection refused",
	"broken pipe",
	"eof",
];

/// Caller-owned cancellation scope for one inbound request.
///
/// Cloning shares the cancellation signal; [`child`](CallContext::child) derives a scope that is
/// cancelled with its parent but can also be cancelled on its own.
#[derive(Clone, Debug, Default)]
pub struct CallContext {
	cancel: CancellationToken,
	deadline: Option<Instant>,
}
impl CallContext {
	/// Creates a context that is never cancelled and has no deadline.
	pub fn new() -> Self {
		Self::default()
	}

	/// Binds the context to an existing cancellation token.
	pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
		self.cancel = cancel;

		self
	}

	/// Sets an absolute deadline, keeping the earlier one if a deadline already exists.
	pub fn with_deadline(mut self, deadline: Instant) -> Self {
		self.deadline = Some(self.deadline.map_or(deadline, |current| current.min(deadline)));

		self
	}

	/// Sets a deadline `timeout` from now.
	pub fn with_timeout(self, timeout: StdDuration) -> Self {
		self.with_deadline(Instant::now() + timeout)
	}

	/// Derives a child scope sharing this context's deadline.
	pub fn child(&self) -> Self {
		Self { cancel: self.cancel.child_token(), deadline: self.deadline }
	}

	/// Signals cancellation to every clone and child of this context.
	pub fn cancel(&self) {
		self.cancel.cancel();
	}

	/// Deadline of this scope, if any.
	pub fn deadline(&self) -> Option<Instant> {
		self.deadline
	}

	/// Returns the interruption that has already happened, if any.
	pub fn interrupted(&self) -> Option<Interrupt> {
		if self.cancel.is_cancelled() {
			Some(Interrupt::Cancelled)
		} else if self.deadline.is_some_and(|deadline| Instant::now() >= deadline) {
			Some(Interrupt::DeadlineExceeded)
		} else {
			None
		}
	}

	/// Resolves once the scope is cancelled or its deadline passes.
	pub async fn done(&self) -> Interrupt {
		match self.deadline {
			Some(deadline) => tokio::select! {
				biased;

				_ = self.cancel.cancelled() => Interrupt::Cancelled,
				_ = time::sleep_until(deadline) => Interrupt::DeadlineExceeded,
			},
			None => {
				self.cancel.cancelled().await;

				Interrupt::Cancelled
			},
		}
	}
}

/// Why a [`CallContext`] stopped accepting work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Interrupt {
	/// The caller cancelled the request.
	Cancelled,
	/// The caller's deadline passed.
	DeadlineExceeded,
}

/// Failure classification consulted between attempts.
pub trait Classify {
	/// Returns `true` when another attempt may succeed.
	fn is_retryable(&self) -> bool;

	/// Stable metrics label (`timeout`, `rate_limited`, `upstream_5xx`, ...).
	fn category(&self) -> &'static str;
}

/// Outcome of a single failed attempt.
#[derive(Debug, ThisError)]
pub enum AttemptFailure<E> {
	/// The per-attempt timeout elapsed.
	#[error("Upstream attempt timed out.")]
	TimedOut,
	/// The operation returned an error.
	#[error("{0}")]
	Failed(#[source] E),
}
impl<E> Classify for AttemptFailure<E>
where
	E: Classify,
{
	fn is_retryable(&self) -> bool {
		match self {
			Self::TimedOut => true,
			Self::Failed(err) => err.is_retryable(),
		}
	}

	fn category(&self) -> &'static str {
		match self {
			Self::TimedOut => "timeout",
			Self::Failed(err) => err.category(),
		}
	}
}

/// Terminal result of [`RetryPolicy::run`].
#[derive(Debug, ThisError)]
pub enum RetryError<E> {
	/// The caller cancelled the request during an attempt or backoff.
	#[error("Request was cancelled.")]
	Cancelled,
	/// The caller's deadline passed; never retried.
	#[error("Request deadline exceeded.")]
	DeadlineExceeded,
	/// The operation failed with a non-retryable error.
	#[error("{0}")]
	Terminal(#[source] E),
	/// Every attempt failed with a retryable error.
	#[error("Upstream request failed after retries.")]
	Exhausted {
		/// Attempts made, including the first.
		attempts: u32,
		/// Failure of the final attempt.
		#[source]
		last: AttemptFailure<E>,
	},
}
impl<E> RetryError<E> {
	/// Returns the last operation error, if one was observed.
	pub fn last_error(&self) -> Option<&E> {
		match self {
			Self::Terminal(err) | Self::Exhausted { last: AttemptFailure::Failed(err), .. } =>
				Some(err),
			_ => None,
		}
	}
}
impl<E> Classify for RetryError<E>
where
	E: Classify,
{
	fn is_retryable(&self) -> bool {
		false
	}

	fn category(&self) -> &'static str {
		match self {
			Self::Cancelled => "cancelled",
			Self::DeadlineExceeded => "timeout",
			Self::Terminal(err) => err.category(),
			Self::Exhausted { last, .. } => last.category(),
		}
	}
}
impl<E> From<Interrupt> for RetryError<E> {
	fn from(interrupt: Interrupt) -> Self {
		match interrupt {
			Interrupt::Cancelled => Self::Cancelled,
			Interrupt::DeadlineExceeded => Self::DeadlineExceeded,
		}
	}
}
impl<E> From<RetryError<E>> for Error
where
	E: Classify + Display,
{
	fn from(err: RetryError<E>) -> Self {
		match err {
			RetryError::Cancelled => Self::Cancelled,
			RetryError::DeadlineExceeded => Self::DeadlineExceeded,
			RetryError::Terminal(inner) =>
				Self::Upstream { category: inner.category(), message: inner.to_string() },
			RetryError::Exhausted { last, .. } => Self::Upstream {
				category: last.category(),
				message: RETRIES_EXHAUSTED_MESSAGE.into(),
			},
		}
	}
}

/// Per-attempt timeout plus bounded exponential backoff.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
	timeout: StdDuration,
	max_retries: u32,
	base_delay: StdDuration,
}
impl RetryPolicy {
	/// Creates a policy; `max_retries` is capped at [`MAX_MAX_RETRIES`].
	pub fn new(timeout: StdDuration, max_retries: u32, base_delay: StdDuration) -> Self {
		Self { timeout, max_retries: max_retries.min(MAX_MAX_RETRIES), base_delay }
	}

	/// Builds a policy from loaded settings, falling back to defaults for unusable durations.
	pub fn from_settings(settings: &RetrySettings) -> Self {
		let defaults = RetrySettings::default();
		let to_std = |value: Duration, fallback: Duration| {
			StdDuration::try_from(value)
				.or_else(|_| StdDuration::try_from(fallback))
				.unwrap_or(StdDuration::ZERO)
		};

		Self::new(
			to_std(settings.timeout, defaults.timeout),
			settings.max_retries,
			to_std(settings.base_delay, defaults.base_delay),
		)
	}

	/// Total attempts allowed, including the first.
	pub fn max_attempts(&self) -> u32 {
		self.max_retries + 1
	}

	/// Per-attempt timeout.
	pub fn timeout(&self) -> StdDuration {
		self.timeout
	}

	/// Delay before attempt `attempt + 1`: `base_delay << attempt`.
	pub fn backoff(&self, attempt: u32) -> StdDuration {
		self.base_delay.saturating_mul(1_u32 << attempt.min(16))
	}

	/// Runs `op` until it succeeds, fails terminally, exhausts the attempt budget, or `ctx` is
	/// interrupted.
	///
	/// `op` receives the zero-based attempt index. Each attempt is raced against both the
	/// per-attempt timeout and `ctx`; a per-attempt timeout is retried while an interrupted
	/// `ctx` is propagated immediately. Backoff waits are cancellable.
	pub async fn run<T, E, F, Fut>(&self, ctx: &CallContext, mut op: F) -> Result<T, RetryError<E>>
	where
		E: Classify + Display,
		F: FnMut(u32) -> Fut,
		Fut: Future<Output = Result<T, E>>,
	{
		let attempts = self.max_attempts();
		let mut attempt = 0;

		loop {
			if let Some(interrupt) = ctx.interrupted() {
				return Err(interrupt.into());
			}

			let failure = tokio::select! {
				biased;

				interrupt = ctx.done() => return Err(interrupt.into()),
				outcome = time::timeout(self.timeout, op(attempt)) => match outcome {
					Ok(Ok(value)) => return Ok(value),
					Ok(Err(err)) => AttemptFailure::Failed(err),
					Err(_) => AttemptFailure::TimedOut,
				},
			};

			let failure = match failure {
				AttemptFailure::Failed(err) if !err.is_retryable() =>
					return Err(RetryError::Terminal(err)),
				failure => failure,
			};

			if attempt + 1 >= attempts {
				tracing::warn!(
					attempts,
					error_category = failure.category(),
					"Upstream call failed after exhausting retries."
				);

				return Err(RetryError::Exhausted { attempts, last: failure });
			}

			let delay = self.backoff(attempt);

			tracing::warn!(
				attempt = attempt + 1,
				max_attempts = attempts,
				delay_ms = delay.as_millis() as u64,
				error_category = failure.category(),
				error = %failure,
				"Retrying upstream call."
			);

			tokio::select! {
				biased;

				interrupt = ctx.done() => return Err(interrupt.into()),
				_ = time::sleep(delay) => {},
			}

			attempt += 1;
		}
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self::from_settings(&RetrySettings::default())
	}
}

/// Error returned by an upstream HTTP service (LLM provider or document API).
#[derive(Debug, ThisError)]
pub enum UpstreamError {
	/// The service answered with a non-success HTTP status.
	#[error("{service} request failed with status {status}{}.", format_detail(.message))]
	Status {
		/// Service name (`openai`, `gemini`, `google_docs`, ...).
		service: String,
		/// HTTP status code.
		status: u16,
		/// Trimmed response body excerpt; may be empty.
		message: String,
	},
	/// The service did not answer in time.
	#[error("Upstream request timed out.")]
	Timeout,
	/// The request failed below HTTP (DNS, TCP, TLS, IO).
	#[error("Network error while calling upstream: {0}.")]
	Network(#[source] BoxError),
	/// Any other failure, such as an undecodable response.
	#[error("{0}")]
	Other(String),
}
impl UpstreamError {
	/// Wraps a transport-level error.
	pub fn network(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::Network(Box::new(src))
	}
}
impl Classify for UpstreamError {
	fn is_retryable(&self) -> bool {
		match self {
			Self::Status { status, .. } => is_retryable_status(*status),
			Self::Timeout => true,
			Self::Network(source) => is_transient(source.as_ref()),
			Self::Other(message) => contains_transient_marker(message),
		}
	}

	fn category(&self) -> &'static str {
		match self {
			Self::Status { status: 429, .. } => "rate_limited",
			Self::Status { status: 500.., .. } => "upstream_5xx",
			Self::Status { .. } => "upstream_4xx",
			Self::Timeout => "timeout",
			Self::Network(source) if is_timeout(source.as_ref()) => "timeout",
			Self::Network(_) => "network",
			Self::Other(_) => "unknown",
		}
	}
}
impl From<ReqwestError> for UpstreamError {
	fn from(e: ReqwestError) -> Self {
		if e.is_timeout() { Self::Timeout } else { Self::network(e) }
	}
}

/// HTTP 429 and every 5xx are worth another attempt.
pub fn is_retryable_status(status: u16) -> bool {
	status == 429 || status >= 500
}

/// Walks the source chain looking for known-transient network conditions.
pub fn is_transient(err: &(dyn StdError + 'static)) -> bool {
	let mut current = Some(err);

	while let Some(err) = current {
		if err.downcast_ref::<ReqwestError>().is_some_and(|e| e.is_timeout() || e.is_connect())
			|| err.downcast_ref::<std::io::Error>().is_some_and(|e| is_transient_io(e.kind()))
			|| contains_transient_marker(&err.to_string())
		{
			return true;
		}

		current = err.source();
	}

	false
}

fn is_timeout(err: &(dyn StdError + 'static)) -> bool {
	let mut current = Some(err);

	while let Some(err) = current {
		if err.downcast_ref::<ReqwestError>().is_some_and(ReqwestError::is_timeout)
			|| err.downcast_ref::<std::io::Error>().is_some_and(|io| io.kind() == ErrorKind::TimedOut)
		{
			return true;
		}

		current = err.source();
	}

	false
}

fn is_transient_io(kind: ErrorKind) -> bool {
	matches!(
		kind,
		ErrorKind::TimedOut
			| ErrorKind::ConnectionReset
			| ErrorKind::ConnectionRefused
			| ErrorKind::ConnectionAborted
			| ErrorKind::BrokenPipe
			| ErrorKind::UnexpectedEof
	)
}

fn contains_transient_marker(message: &str) -> bool {
	let message = message.to_ascii_lowercase();

	TRANSIENT_MARKERS.iter().any(|marker| message.contains(marker))
}

fn format_detail(message: &str) -> String {
	let message = message.trim();

	if message.is_empty() { String::new() } else { format!(": {message}") }
}

#[cfg(test)]
mod tests {
	// std
	use std::io;
	// self
	use super::*;

	fn status(code: u16) -> UpstreamError {
		UpstreamError::Status { service: "openai".into(), status: code, message: String::new() }
	}

	fn policy(max_retries: u32) -> RetryPolicy {
		RetryPolicy::new(StdDuration::from_secs(1), max_retries, StdDuration::from_millis(200))
	}

	#[test]
	fn classification_follows_status_and_transport_signals() {
		assert!(status(429).is_retryable());
		assert!(status(503).is_retryable());
		assert!(!status(400).is_retryable());
		assert_eq!(status(429).category(), "rate_limited");
		assert_eq!(status(502).category(), "upstream_5xx");
		assert_eq!(status(404).category(), "upstream_4xx");

		let reset = UpstreamError::network(io::Error::from(ErrorKind::ConnectionReset));

		assert!(reset.is_retryable());
		assert_eq!(reset.category(), "network");
		assert!(UpstreamError::Other("unexpected EOF while decoding".into()).is_retryable());
		assert!(!UpstreamError::Other("invalid input".into()).is_retryable());
		assert!(!UpstreamError::network(io::Error::other("certificate rejected")).is_retryable());
	}

	#[test]
	fn retry_budget_is_capped() {
		assert_eq!(policy(99).max_attempts(), MAX_MAX_RETRIES + 1);
		assert_eq!(RetryPolicy::default().max_attempts(), 3);
		assert_eq!(policy(2).backoff(0), StdDuration::from_millis(200));
		assert_eq!(policy(2).backoff(2), StdDuration::from_millis(800));
	}

	#[test]
	fn status_message_is_optional() {
		assert_eq!(status(500).to_string(), "openai request failed with status 500.");
		assert_eq!(
			UpstreamError::Status { service: "gemini".into(), status: 400, message: " bad ".into() }
				.to_string(),
			"gemini request failed with status 400: bad."
		);
	}

	#[tokio::test(start_paused = true)]
	async fn retryable_failures_use_whole_budget_with_backoff() {
		let started = Instant::now();
		let mut calls = 0;
		let result: Result<(), _> = policy(2)
			.run(&CallContext::new(), |_| {
				calls += 1;

				async { Err(status(500)) }
			})
			.await;
		let err = result.expect_err("Persistent 5xx should exhaust the retry budget.");

		assert_eq!(calls, 3);
		assert!(matches!(err, RetryError::Exhausted { attempts: 3, .. }));
		assert_eq!(err.category(), "upstream_5xx");
		assert_eq!(err.to_string(), RETRIES_EXHAUSTED_MESSAGE);
		assert!(started.elapsed() >= StdDuration::from_millis(600));
		assert!(started.elapsed() < StdDuration::from_millis(700));
	}

	#[tokio::test(start_paused = true)]
	async fn terminal_failures_are_attempted_once() {
		let mut calls = 0;
		let result: Result<(), _> = policy(5)
			.run(&CallContext::new(), |_| {
				calls += 1;

				async { Err(status(400)) }
			})
			.await;

		assert_eq!(calls, 1);
		assert!(matches!(
			result,
			Err(RetryError::Terminal(UpstreamError::Status { status: 400, .. }))
		));
	}

	#[tokio::test(start_paused = true)]
	async fn recovers_after_transient_failure() {
		let value = policy(2)
			.run(&CallContext::new(), |attempt| async move {
				if attempt == 0 { Err(status(503)) } else { Ok(attempt) }
			})
			.await
			.expect("Second attempt should succeed.");

		assert_eq!(value, 1);
	}

	#[tokio::test(start_paused = true)]
	async fn per_attempt_timeout_is_retried() {
		let mut calls = 0;
		let result: Result<(), RetryError<UpstreamError>> = policy(2)
			.run(&CallContext::new(), |_| {
				calls += 1;

				async {
					time::sleep(StdDuration::from_secs(30)).await;

					Ok(())
				}
			})
			.await;
		let err = result.expect_err("Hanging attempts should time out.");

		assert_eq!(calls, 3);
		assert!(matches!(err, RetryError::Exhausted { last: AttemptFailure::TimedOut, .. }));
		assert_eq!(err.category(), "timeout");
	}

	#[tokio::test(start_paused = true)]
	async fn parent_deadline_is_not_retried() {
		let ctx = CallContext::new().with_timeout(StdDuration::from_millis(500));
		let mut calls = 0;
		let result: Result<(), RetryError<UpstreamError>> = policy(5)
			.run(&ctx, |_| {
				calls += 1;

				async {
					time::sleep(StdDuration::from_secs(30)).await;

					Ok(())
				}
			})
			.await;

		assert_eq!(calls, 1);
		assert!(matches!(result, Err(RetryError::DeadlineExceeded)));
	}

	#[tokio::test(start_paused = true)]
	async fn cancellation_during_backoff_stops_retrying() {
		let ctx = CallContext::new();
		let policy = policy(5);
		let mut calls = 0;
		let (result, ()) = tokio::join!(
			policy.run(&ctx, |_| {
				calls += 1;

				async { Err::<(), _>(status(503)) }
			}),
			async {
				time::sleep(StdDuration::from_millis(50)).await;
				ctx.cancel();
			}
		);

		assert_eq!(calls, 1);
		assert!(matches!(result, Err(RetryError::Cancelled)));
	}

	#[tokio::test]
	async fn cancelled_context_never_runs_the_operation() {
		let ctx = CallContext::new();
		let child = ctx.child();

		ctx.cancel();

		let result: Result<(), RetryError<UpstreamError>> =
			policy(2).run(&child, |_| async { Ok(()) }).await;

		assert!(matches!(result, Err(RetryError::Cancelled)));

		let err = Error::from(result.expect_err("Cancelled run should fail."));

		assert_eq!(err.code(), "request_cancelled");
	}
}
