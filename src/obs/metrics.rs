// std
use std::{fmt::Write as _, time::Duration as StdDuration};
// self
use crate::_prelude::*;

/// Content type for [`MetricsRegistry::render`] output.
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";
/// Latency bucket upper bounds, in seconds.
pub const DURATION_BUCKETS: [f64; 11] =
	[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

const PROVIDER_FAMILY: FamilySpec = FamilySpec {
	requests: "homer_provider_requests_total",
	requests_help: "Total provider requests.",
	duration: "homer_provider_request_duration_seconds",
	duration_help: "Provider request duration in seconds.",
	labels: ["provider", "operation", "status", "error_category"],
};
const CONNECTOR_FAMILY: FamilySpec = FamilySpec {
	requests: "homer_connector_requests_total",
	requests_help: "Total connector import/export requests.",
	duration: "homer_connector_request_duration_seconds",
	duration_help: "Connector request duration in seconds.",
	labels: ["connector", "operation", "status", "error_code"],
};

type LabelValues = [String; 4];

/// In-memory counters and latency histograms for provider and connector calls.
///
/// Series are created lazily on first observation and never removed. All state sits behind a
/// single mutex, so each observation is atomic with respect to concurrent recorders and
/// renders.
#[derive(Debug, Default)]
pub struct MetricsRegistry {
	state: Mutex<RegistryState>,
}
impl MetricsRegistry {
	/// Creates an empty registry.
	pub fn new() -> Self {
		Self::default()
	}

	/// Records one completed provider call.
	pub fn record_provider_call(
		&self,
		provider: &str,
		operation: &str,
		status: &str,
		error_category: &str,
		duration: StdDuration,
	) {
		let values = [provider, operation, status, error_category].map(str::to_owned);

		mirror(&PROVIDER_FAMILY, &values, duration);
		self.state.lock().provider.record(values, duration.as_secs_f64());
	}

	/// Records one completed connector call.
	pub fn record_connector_call(
		&self,
		connector: &str,
		operation: &str,
		status: &str,
		error_code: &str,
		duration: StdDuration,
	) {
		let values = [connector, operation, status, error_code].map(str::to_owned);

		mirror(&CONNECTOR_FAMILY, &values, duration);
		self.state.lock().connector.record(values, duration.as_secs_f64());
	}

	/// Returns the provider request count for an exact label tuple.
	pub fn provider_requests(
		&self,
		provider: &str,
		operation: &str,
		status: &str,
		error_category: &str,
	) -> u64 {
		let values = [provider, operation, status, error_category].map(str::to_owned);

		self.state.lock().provider.requests.get(&values).copied().unwrap_or(0)
	}

	/// Returns the connector request count for an exact label tuple.
	pub fn connector_requests(
		&self,
		connector: &str,
		operation: &str,
		status: &str,
		error_code: &str,
	) -> u64 {
		let values = [connector, operation, status, error_code].map(str::to_owned);

		self.state.lock().connector.requests.get(&values).copied().unwrap_or(0)
	}

	/// Renders every family in the Prometheus text exposition format.
	///
	/// Output is deterministic: series are ordered by their label values joined with `|`, and
	/// labels within a line are ordered by key.
	pub fn render(&self) -> String {
		let state = self.state.lock();
		let mut out = String::new();

		state.provider.render(&PROVIDER_FAMILY, &mut out);
		state.connector.render(&CONNECTOR_FAMILY, &mut out);

		out
	}
}

#[derive(Debug, Default)]
struct RegistryState {
	provider: Family,
	connector: Family,
}

struct FamilySpec {
	requests: &'static str,
	requests_help: &'static str,
	duration: &'static str,
	duration_help: &'static str,
	labels: [&'static str; 4],
}

#[derive(Debug, Default)]
struct Family {
	requests: HashMap<LabelValues, u64>,
	latency: HashMap<LabelValues, Histogram>,
}
impl Family {
	fn record(&mut self, values: LabelValues, seconds: f64) {
		self.latency.entry(values.clone()).or_default().observe(seconds);
		*self.requests.entry(values).or_default() += 1;
	}

	fn render(&self, spec: &FamilySpec, out: &mut String) {
		let _ = writeln!(out, "# HELP {} {}", spec.requests, spec.requests_help);
		let _ = writeln!(out, "# TYPE {} counter", spec.requests);

		for (values, count) in sorted_series(&self.requests) {
			let _ = writeln!(out, "{}{{{}}} {count}", spec.requests, format_labels(spec, values));
		}

		let _ = writeln!(out, "# HELP {} {}", spec.duration, spec.duration_help);
		let _ = writeln!(out, "# TYPE {} histogram", spec.duration);

		for (values, histogram) in sorted_series(&self.latency) {
			histogram.render(spec.duration, &format_labels(spec, values), out);
		}
	}
}

#[derive(Clone, Debug, PartialEq)]
struct Histogram {
	// Observations at or below the bucket bound at the same index.
	counts: [u64; DURATION_BUCKETS.len()],
	count: u64,
	sum: f64,
}
impl Histogram {
	fn observe(&mut self, value: f64) {
		self.count += 1;
		self.sum += value;

		for (bound, count) in DURATION_BUCKETS.iter().zip(self.counts.iter_mut()) {
			if value <= *bound {
				*count += 1;
			}
		}
	}

	fn render(&self, name: &str, labels: &str, out: &mut String) {
		for (bound, count) in DURATION_BUCKETS.iter().zip(self.counts) {
			let bound = format_bound(*bound);

			let _ = writeln!(out, "{name}_bucket{{{labels},le=\"{bound}\"}} {count}");
		}

		let _ = writeln!(out, "{name}_bucket{{{labels},le=\"+Inf\"}} {}", self.count);
		let _ = writeln!(out, "{name}_sum{{{labels}}} {}", self.sum);
		let _ = writeln!(out, "{name}_count{{{labels}}} {}", self.count);
	}
}
impl Default for Histogram {
	fn default() -> Self {
		Self { counts: [0; DURATION_BUCKETS.len()], count: 0, sum: 0.0 }
	}
}

fn sorted_series<V>(series: &HashMap<LabelValues, V>) -> Vec<(&LabelValues, &V)> {
	let mut entries: Vec<_> =
		series.iter().map(|(values, v)| (values.join("|"), values, v)).collect();

	entries.sort_by(|a, b| a.0.cmp(&b.0));

	entries.into_iter().map(|(_, values, v)| (values, v)).collect()
}

fn format_labels(spec: &FamilySpec, values: &LabelValues) -> String {
	let mut pairs: BTreeMap<&str, &str> = BTreeMap::new();

	for (key, value) in spec.labels.iter().zip(values) {
		pairs.insert(key, value);
	}

	pairs
		.into_iter()
		.map(|(key, value)| format!("{key}=\"{}\"", escape_label_value(value)))
		.collect::<Vec<_>>()
		.join(",")
}

fn escape_label_value(value: &str) -> String {
	let mut escaped = String::with_capacity(value.len());

	for c in value.chars() {
		match c {
			'\\' => escaped.push_str("\\\\"),
			'"' => escaped.push_str("\\\""),
			'\n' => escaped.push_str("\\n"),
			c => escaped.push(c),
		}
	}

	escaped
}

// Fixed six decimals with trailing zeros (and a dangling point) removed.
fn format_bound(bound: f64) -> String {
	let fixed = format!("{bound:.6}");

	fixed.trim_end_matches('0').trim_end_matches('.').to_owned()
}

#[cfg(feature = "metrics")]
fn mirror(spec: &FamilySpec, values: &LabelValues, duration: StdDuration) {
	let labels: Vec<metrics::Label> = spec
		.labels
		.iter()
		.zip(values)
		.map(|(key, value)| metrics::Label::new(*key, value.clone()))
		.collect();

	metrics::counter!(spec.requests, labels.clone()).increment(1);
	metrics::histogram!(spec.duration, labels).record(duration.as_secs_f64());
}

#[cfg(not(feature = "metrics"))]
fn mirror(spec: &FamilySpec, values: &LabelValues, duration: StdDuration) {
	let _ = (spec, values, duration);
}
