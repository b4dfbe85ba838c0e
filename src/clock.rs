//! Wall-clock sources shared by the rate limiter, OAuth stores, and flows.

// self
use crate::_prelude::*;

/// Source of "now" for components whose behavior depends on wall-clock time.
pub trait Clock
where
	Self: Send + Sync,
{
	/// Returns the current instant in UTC.
	fn now(&self) -> OffsetDateTime;
}

/// Clock backed by the operating system.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;
impl Clock for SystemClock {
	fn now(&self) -> OffsetDateTime {
		OffsetDateTime::now_utc()
	}
}

/// Manually driven clock for deterministic tests and replays.
#[derive(Debug)]
pub struct FixedClock(Mutex<OffsetDateTime>);
impl FixedClock {
	/// Creates a clock frozen at `instant`.
	pub fn new(instant: OffsetDateTime) -> Self {
		Self(Mutex::new(instant))
	}

	/// Moves the clock to `instant`.
	pub fn set(&self, instant: OffsetDateTime) {
		*self.0.lock() = instant;
	}

	/// Moves the clock forward by `delta`.
	pub fn advance(&self, delta: Duration) {
		let mut guard = self.0.lock();

		*guard += delta;
	}
}
impl Clock for FixedClock {
	fn now(&self) -> OffsetDateTime {
		*self.0.lock()
	}
}
