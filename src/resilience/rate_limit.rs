//! Fixed-window rate limiting for connector requests.
//!
//! The window is keyed to nothing but wall-clock minute boundaries in UTC, so every caller in
//! the process shares one budget. Multi-instance deployments need an external counter instead.

// self
use crate::{
	_prelude::*,
	clock::{Clock, SystemClock},
};

const WINDOW_SECONDS: i64 = 60;

/// Admission policy consulted once per connector request before any upstream work.
pub trait RateLimitPolicy
where
	Self: Send + Sync,
{
	/// Evaluates (and, when admitted, counts) the next request.
	fn check(&self) -> RateLimitDecision;

	/// Boolean shorthand for [`check`](RateLimitPolicy::check).
	fn allow(&self) -> bool {
		matches!(self.check(), RateLimitDecision::Allow)
	}
}

/// Result emitted by a [`RateLimitPolicy`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
	/// The request may proceed immediately.
	Allow,
	/// The request was rejected and should be retried later.
	Delay(RetryDirective),
}

/// Advises callers when to retry after a [`RateLimitDecision::Delay`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryDirective {
	/// Instant when the next window opens.
	pub earliest_retry_at: OffsetDateTime,
	/// Time remaining until [`earliest_retry_at`](RetryDirective::earliest_retry_at).
	pub recommended_backoff: Duration,
}

/// Connector limiter: either disabled or a shared fixed window.
#[derive(Debug)]
pub enum RateLimiter {
	/// Every request is admitted.
	Disabled,
	/// Requests are counted per wall-clock minute.
	FixedWindow(FixedWindowLimiter),
}
impl RateLimiter {
	/// Builds a limiter admitting `limit` requests per minute; `0` disables enforcement.
	pub fn new(limit: u32, clock: Arc<dyn Clock>) -> Self {
		if limit == 0 {
			tracing::info!("Connector rate limiting is disabled.");

			Self::Disabled
		} else {
			Self::FixedWindow(FixedWindowLimiter::new(limit, clock))
		}
	}

	/// Builds a limiter reading the system clock.
	pub fn per_minute(limit: u32) -> Self {
		Self::new(limit, Arc::new(SystemClock))
	}

	/// Returns `true` when requests are actually counted.
	pub fn is_enabled(&self) -> bool {
		matches!(self, Self::FixedWindow(_))
	}
}
impl RateLimitPolicy for RateLimiter {
	fn check(&self) -> RateLimitDecision {
		match self {
			Self::Disabled => RateLimitDecision::Allow,
			Self::FixedWindow(limiter) => limiter.check(),
		}
	}
}

/// Counter reset whenever the UTC minute bucket changes.
pub struct FixedWindowLimiter {
	limit: u32,
	clock: Arc<dyn Clock>,
	window: Mutex<RateWindow>,
}
impl FixedWindowLimiter {
	/// Creates a limiter admitting `limit` requests per minute.
	pub fn new(limit: u32, clock: Arc<dyn Clock>) -> Self {
		Self { limit, clock, window: Mutex::new(RateWindow::default()) }
	}

	/// Configured per-minute budget.
	pub fn limit(&self) -> u32 {
		self.limit
	}
}
impl RateLimitPolicy for FixedWindowLimiter {
	fn check(&self) -> RateLimitDecision {
		let now = self.clock.now();
		let current = now.unix_timestamp().div_euclid(WINDOW_SECONDS);
		let mut window = self.window.lock();

		if window.minute != Some(current) {
			*window = RateWindow { minute: Some(current), count: 0 };
		}
		if window.count >= self.limit {
			drop(window);

			let into_window = Duration::seconds(now.unix_timestamp().rem_euclid(WINDOW_SECONDS))
				+ Duration::nanoseconds(now.nanosecond().into());
			let recommended_backoff = Duration::seconds(WINDOW_SECONDS) - into_window;

			tracing::debug!(limit = self.limit, "Connector request rejected by rate limiter.");

			return RateLimitDecision::Delay(RetryDirective {
				earliest_retry_at: now + recommended_backoff,
				recommended_backoff,
			});
		}

		window.count += 1;

		RateLimitDecision::Allow
	}
}
impl Debug for FixedWindowLimiter {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		let window = self.window.lock();

		f.debug_struct("FixedWindowLimiter")
			.field("limit", &self.limit)
			.field("minute", &window.minute)
			.field("count", &window.count)
			.finish()
	}
}

#[derive(Clone, Copy, Debug, Default)]
struct RateWindow {
	// Unix minute index of the active window.
	minute: Option<i64>,
	count: u32,
}
