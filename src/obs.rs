//! Observability helpers for upstream calls.
//!
//! - [`MetricsRegistry`] aggregates per-call counters and latency histograms and renders them in
//!   the Prometheus text exposition format. With the `metrics` feature every record is also
//!   forwarded to the global `metrics` recorder.
//! - [`CallSpan`] emits `homer_gateway.call` spans tagged with `component` and `operation`.

mod metrics;
mod tracing;

pub use self::metrics::*;
pub use self::tracing::*;

// self
use crate::_prelude::*;

/// Gateway components whose upstream calls are observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Component {
	/// LLM provider calls.
	Provider,
	/// Document connector import/export calls.
	Connector,
	/// OAuth authorization and refresh calls.
	OAuth,
}
impl Component {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Component::Provider => "provider",
			Component::Connector => "connector",
			Component::OAuth => "oauth",
		}
	}
}
impl Display for Component {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Terminal status recorded for every observed call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CallStatus {
	/// The call returned a result.
	Success,
	/// The call failed terminally.
	Error,
}
impl CallStatus {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			CallStatus::Success => "success",
			CallStatus::Error => "error",
		}
	}
}
impl Display for CallStatus {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
