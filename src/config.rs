//! Gateway configuration loaded from the process environment.
//!
//! Every loader has a `from_lookup` twin that reads through a caller-supplied closure, so tests
//! can inject settings without mutating process-global environment variables.

// self
use crate::{_prelude::*, error::ConfigError};

/// Google's OAuth 2.0 authorization endpoint.
pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
/// Google's OAuth 2.0 token endpoint.
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
/// Scope requested when none is configured.
pub const GOOGLE_DOCS_SCOPE: &str = "https://www.googleapis.com/auth/documents";
/// Default lifetime of a pending authorization `state`.
pub const DEFAULT_STATE_TTL: Duration = Duration::minutes(10);
/// Default per-attempt upstream timeout.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::seconds(15);
/// Default retry budget on top of the first attempt.
pub const DEFAULT_MAX_RETRIES: u32 = 2;
/// Retry budget ceiling applied regardless of configuration.
pub const MAX_MAX_RETRIES: u32 = 5;
/// Default base delay for exponential backoff.
pub const DEFAULT_RETRY_BASE_DELAY: Duration = Duration::milliseconds(200);
/// Default connector admission budget per wall-clock minute.
pub const DEFAULT_CONNECTOR_RATE_LIMIT_PER_MINUTE: u32 = 60;

/// Complete gateway configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GatewayConfig {
	/// OAuth client settings; `None` when any required value is missing.
	pub oauth: Option<OAuthClientConfig>,
	/// Lifetime of pending authorization states.
	pub state_ttl: StateTtl,
	/// Long-lived credential used when a request has no OAuth session.
	pub static_access_token: Option<String>,
	/// Upstream retry policy settings.
	pub retry: RetrySettings,
	/// Connector admissions per minute; `0` disables rate limiting.
	pub connector_rate_limit_per_minute: u32,
}
impl Default for GatewayConfig {
	fn default() -> Self {
		Self {
			oauth: None,
			state_ttl: StateTtl::default(),
			static_access_token: None,
			retry: RetrySettings::default(),
			connector_rate_limit_per_minute: DEFAULT_CONNECTOR_RATE_LIMIT_PER_MINUTE,
		}
	}
}
impl GatewayConfig {
	/// Loads the configuration from the process environment.
	pub fn from_env() -> Result<Self, ConfigError> {
		Self::from_lookup(|name| std::env::var(name).ok())
	}

	/// Loads the configuration through `lookup`, which returns the raw value for a variable.
	pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let oauth = match OAuthClientConfig::from_lookup(&lookup) {
			Ok(config) => Some(config),
			Err(ConfigError::MissingSetting { name }) => {
				tracing::debug!(setting = name, "OAuth client is not configured");

				None
			},
			Err(err) => return Err(err),
		};

		Ok(Self {
			oauth,
			state_ttl: StateTtl::from_lookup(&lookup),
			static_access_token: non_blank(&lookup, "GOOGLE_DOCS_ACCESS_TOKEN"),
			retry: RetrySettings::from_lookup(&lookup),
			connector_rate_limit_per_minute: connector_rate_limit_from_lookup(&lookup),
		})
	}
}

/// OAuth client registration plus the provider endpoints it talks to.
#[derive(Clone, PartialEq, Eq)]
pub struct OAuthClientConfig {
	/// Registered client identifier.
	pub client_id: String,
	/// Registered client secret.
	pub client_secret: String,
	/// Redirect URI registered with the provider.
	pub redirect_url: Url,
	/// Authorization endpoint.
	pub auth_url: Url,
	/// Token endpoint.
	pub token_url: Url,
	/// Scopes requested during authorization, in configured order.
	pub scopes: Vec<String>,
}
impl OAuthClientConfig {
	/// Creates a configuration requesting the default Google Docs scope.
	pub fn new(
		client_id: impl Into<String>,
		client_secret: impl Into<String>,
		redirect_url: Url,
		auth_url: Url,
		token_url: Url,
	) -> Self {
		Self {
			client_id: client_id.into(),
			client_secret: client_secret.into(),
			redirect_url,
			auth_url,
			token_url,
			scopes: vec![GOOGLE_DOCS_SCOPE.into()],
		}
	}

	/// Replaces the requested scopes.
	pub fn with_scopes<I, S>(mut self, scopes: I) -> Self
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		self.scopes = scopes.into_iter().map(Into::into).collect();

		self
	}

	/// Reads `GOOGLE_OAUTH_*` settings through `lookup`.
	///
	/// Client id, client secret, and redirect URL are required; endpoints default to Google's.
	pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
	where
		F: Fn(&str) -> Option<String>,
	{
		let client_id = required(&lookup, "GOOGLE_OAUTH_CLIENT_ID")?;
		let client_secret = required(&lookup, "GOOGLE_OAUTH_CLIENT_SECRET")?;
		let redirect_url = parse_url(
			"GOOGLE_OAUTH_REDIRECT_URL",
			&required(&lookup, "GOOGLE_OAUTH_REDIRECT_URL")?,
		)?;
		let auth_url = parse_url(
			"GOOGLE_OAUTH_AUTH_URL",
			&non_blank(&lookup, "GOOGLE_OAUTH_AUTH_URL").unwrap_or_else(|| GOOGLE_AUTH_URL.into()),
		)?;
		let token_url = parse_url(
			"GOOGLE_OAUTH_TOKEN_URL",
			&non_blank(&lookup, "GOOGLE_OAUTH_TOKEN_URL")
				.unwrap_or_else(|| GOOGLE_TOKEN_URL.into()),
		)?;
		let scopes = parse_scopes(lookup("GOOGLE_OAUTH_SCOPES").as_deref().unwrap_or_default());

		Ok(Self { client_id, client_secret, redirect_url, auth_url, token_url, scopes })
	}
}
impl Debug for OAuthClientConfig {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("OAuthClientConfig")
			.field("client_id", &self.client_id)
			.field("client_secret_set", &!self.client_secret.is_empty())
			.field("redirect_url", &self.redirect_url.as_str())
			.field("auth_url", &self.auth_url.as_str())
			.field("token_url", &self.token_url.as_str())
			.field("scopes", &self.scopes)
			.finish()
	}
}

/// Lifetime of a pending authorization `state`, floor-guarded against non-positive values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StateTtl(Duration);
impl StateTtl {
	/// Wraps `ttl`, substituting [`DEFAULT_STATE_TTL`] when it is zero or negative.
	pub fn new(ttl: Duration) -> Self {
		if ttl.is_positive() { Self(ttl) } else { Self(DEFAULT_STATE_TTL) }
	}

	/// Returns the effective duration.
	pub fn get(self) -> Duration {
		self.0
	}

	fn from_lookup<F>(lookup: F) -> Self
	where
		F: Fn(&str) -> Option<String>,
	{
		non_blank(&lookup, "GOOGLE_OAUTH_STATE_TTL")
			.and_then(|raw| parse_go_duration(&raw))
			.map(Self::new)
			.unwrap_or_default()
	}
}
impl Default for StateTtl {
	fn default() -> Self {
		Self(DEFAULT_STATE_TTL)
	}
}

/// Raw retry settings before they are turned into a
/// [`RetryPolicy`](crate::resilience::RetryPolicy).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetrySettings {
	/// Per-attempt timeout.
	pub timeout: Duration,
	/// Retries on top of the first attempt, already capped at [`MAX_MAX_RETRIES`].
	pub max_retries: u32,
	/// Base delay doubled for every subsequent attempt.
	pub base_delay: Duration,
}
impl RetrySettings {
	fn from_lookup<F>(lookup: F) -> Self
	where
		F: Fn(&str) -> Option<String>,
	{
		let mut settings = Self::default();

		if let Some(ms) = non_blank(&lookup, "LLM_TIMEOUT_MS")
			.and_then(|raw| raw.parse::<i64>().ok())
			.filter(|ms| *ms > 0)
		{
			settings.timeout = Duration::milliseconds(ms);
		}
		if let Some(retries) =
			non_blank(&lookup, "LLM_MAX_RETRIES").and_then(|raw| raw.parse::<u32>().ok())
		{
			settings.max_retries = retries.min(MAX_MAX_RETRIES);
		}

		settings
	}
}
impl Default for RetrySettings {
	fn default() -> Self {
		Self {
			timeout: DEFAULT_CALL_TIMEOUT,
			max_retries: DEFAULT_MAX_RETRIES,
			base_delay: DEFAULT_RETRY_BASE_DELAY,
		}
	}
}

fn connector_rate_limit_from_lookup<F>(lookup: F) -> u32
where
	F: Fn(&str) -> Option<String>,
{
	non_blank(&lookup, "CONNECTOR_RATE_LIMIT_PER_MINUTE")
		.and_then(|raw| raw.parse::<u32>().ok())
		.unwrap_or(DEFAULT_CONNECTOR_RATE_LIMIT_PER_MINUTE)
}

fn non_blank<F>(lookup: F, name: &str) -> Option<String>
where
	F: Fn(&str) -> Option<String>,
{
	lookup(name).map(|raw| raw.trim().to_owned()).filter(|raw| !raw.is_empty())
}

fn required<F>(lookup: F, name: &'static str) -> Result<String, ConfigError>
where
	F: Fn(&str) -> Option<String>,
{
	non_blank(lookup, name).ok_or(ConfigError::MissingSetting { name })
}

fn parse_url(name: &'static str, raw: &str) -> Result<Url, ConfigError> {
	Url::parse(raw).map_err(|source| ConfigError::InvalidUrl { name, source })
}

/// Splits on commas and spaces, drops blanks and duplicates, and keeps first-seen order.
fn parse_scopes(raw: &str) -> Vec<String> {
	let mut scopes: Vec<String> = Vec::new();

	for scope in raw.split([',', ' ']).map(str::trim).filter(|scope| !scope.is_empty()) {
		if !scopes.iter().any(|seen| seen == scope) {
			scopes.push(scope.to_owned());
		}
	}

	if scopes.is_empty() {
		scopes.push(GOOGLE_DOCS_SCOPE.into());
	}

	scopes
}

// Largest duration Go can represent (`math.MaxInt64` nanoseconds, about 292 years).
const MAX_GO_DURATION: Duration = Duration::nanoseconds(i64::MAX);

/// Parses Go-style duration strings such as `10m`, `90s`, `1h30m`, or `250ms`.
///
/// Values whose magnitude exceeds [`MAX_GO_DURATION`] are rejected.
fn parse_go_duration(raw: &str) -> Option<Duration> {
	let mut rest = raw.trim();
	let negative = rest.starts_with('-');

	rest = rest.trim_start_matches(['-', '+']);

	if rest.is_empty() {
		return None;
	}
	if rest == "0" {
		return Some(Duration::ZERO);
	}

	let mut total = Duration::ZERO;

	while !rest.is_empty() {
		let digits = rest.find(|c: char| !(c.is_ascii_digit() || c == '.')).unwrap_or(rest.len());
		let value = rest[..digits].parse::<f64>().ok()?;

		rest = &rest[digits..];

		let unit_len = rest.find(|c: char| c.is_ascii_digit() || c == '.').unwrap_or(rest.len());
		let unit_seconds = match &rest[..unit_len] {
			"ns" => 1e-9,
			"us" | "µs" => 1e-6,
			"ms" => 1e-3,
			"s" => 1.0,
			"m" => 60.0,
			"h" => 3600.0,
			_ => return None,
		};

		rest = &rest[unit_len..];
		total = total.checked_add(Duration::checked_seconds_f64(value * unit_seconds)?)?;

		if total > MAX_GO_DURATION {
			return None;
		}
	}

	Some(if negative { -total } else { total })
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
		let map: HashMap<String, String> =
			pairs.iter().map(|(k, v)| ((*k).to_owned(), (*v).to_owned())).collect();

		move |name| map.get(name).cloned()
	}

	#[test]
	fn oauth_requires_client_credentials_and_redirect() {
		let config = GatewayConfig::from_lookup(lookup_from(&[
			("GOOGLE_OAUTH_CLIENT_ID", "client-id"),
			("GOOGLE_OAUTH_CLIENT_SECRET", "client-secret"),
		]))
		.expect("Missing OAuth settings should not fail the whole configuration.");

		assert!(config.oauth.is_none());

		let config = GatewayConfig::from_lookup(lookup_from(&[
			("GOOGLE_OAUTH_CLIENT_ID", "client-id"),
			("GOOGLE_OAUTH_CLIENT_SECRET", "client-secret"),
			("GOOGLE_OAUTH_REDIRECT_URL", "http://localhost/callback"),
			("GOOGLE_OAUTH_AUTH_URL", "https://accounts.example.com/auth"),
		]))
		.expect("Complete OAuth settings should load.");
		let oauth = config.oauth.expect("OAuth client should be configured.");

		assert_eq!(oauth.auth_url.as_str(), "https://accounts.example.com/auth");
		assert_eq!(oauth.token_url.as_str(), GOOGLE_TOKEN_URL);
		assert_eq!(oauth.scopes, vec![GOOGLE_DOCS_SCOPE.to_owned()]);
	}

	#[test]
	fn invalid_redirect_url_is_a_hard_error() {
		let err = GatewayConfig::from_lookup(lookup_from(&[
			("GOOGLE_OAUTH_CLIENT_ID", "client-id"),
			("GOOGLE_OAUTH_CLIENT_SECRET", "client-secret"),
			("GOOGLE_OAUTH_REDIRECT_URL", "not a url"),
		]))
		.expect_err("Malformed redirect URL should be rejected.");

		assert!(matches!(err, ConfigError::InvalidUrl { name: "GOOGLE_OAUTH_REDIRECT_URL", .. }));
	}

	#[test]
	fn scopes_are_deduplicated_in_order() {
		assert_eq!(parse_scopes("b, a b,,c"), vec!["b", "a", "c"]);
		assert_eq!(parse_scopes("  "), vec![GOOGLE_DOCS_SCOPE]);
	}

	#[test]
	fn state_ttl_is_floor_guarded() {
		let ttl = |raw: &str| StateTtl::from_lookup(lookup_from(&[("GOOGLE_OAUTH_STATE_TTL", raw)]));

		assert_eq!(ttl("90s").get(), Duration::seconds(90));
		assert_eq!(ttl("1h30m").get(), Duration::minutes(90));
		assert_eq!(ttl("0").get(), DEFAULT_STATE_TTL);
		assert_eq!(ttl("-5m").get(), DEFAULT_STATE_TTL);
		assert_eq!(ttl("soon").get(), DEFAULT_STATE_TTL);
		assert_eq!(StateTtl::new(Duration::ZERO).get(), DEFAULT_STATE_TTL);
	}

	#[test]
	fn out_of_range_state_ttl_falls_back_to_default() {
		let ttl = |raw: &str| StateTtl::from_lookup(lookup_from(&[("GOOGLE_OAUTH_STATE_TTL", raw)]));

		assert_eq!(ttl("99999999999999999999h").get(), DEFAULT_STATE_TTL);
		assert_eq!(ttl("2562048h").get(), DEFAULT_STATE_TTL);
		assert_eq!(ttl("2562047h").get(), Duration::hours(2_562_047));
		assert_eq!(ttl(&format!("1{}s", "0".repeat(400))).get(), DEFAULT_STATE_TTL);

		let config = GatewayConfig::from_lookup(lookup_from(&[(
			"GOOGLE_OAUTH_STATE_TTL",
			"99999999999999999999h",
		)]))
		.expect("Oversized TTL should not fail configuration loading.");

		assert_eq!(config.state_ttl.get(), DEFAULT_STATE_TTL);
	}

	#[test]
	fn default_config_keeps_rate_limiting_enabled() {
		let config = GatewayConfig::default();

		assert_eq!(config.connector_rate_limit_per_minute, DEFAULT_CONNECTOR_RATE_LIMIT_PER_MINUTE);
		assert_eq!(config, GatewayConfig::from_lookup(|_| None).expect("Empty lookup loads."));
	}

	#[test]
	fn retry_settings_are_capped() {
		let settings = RetrySettings::from_lookup(lookup_from(&[
			("LLM_TIMEOUT_MS", "2500"),
			("LLM_MAX_RETRIES", "12"),
		]));

		assert_eq!(settings.timeout, Duration::milliseconds(2500));
		assert_eq!(settings.max_retries, MAX_MAX_RETRIES);

		let settings = RetrySettings::from_lookup(lookup_from(&[
			("LLM_TIMEOUT_MS", "-1"),
			("LLM_MAX_RETRIES", "nope"),
		]));

		assert_eq!(settings, RetrySettings::default());
	}

	#[test]
	fn connector_rate_limit_defaults_and_disables() {
		let limit = |raw: &str| {
			connector_rate_limit_from_lookup(lookup_from(&[("CONNECTOR_RATE_LIMIT_PER_MINUTE", raw)]))
		};

		assert_eq!(limit(""), DEFAULT_CONNECTOR_RATE_LIMIT_PER_MINUTE);
		assert_eq!(limit("invalid"), DEFAULT_CONNECTOR_RATE_LIMIT_PER_MINUTE);
		assert_eq!(limit("-3"), DEFAULT_CONNECTOR_RATE_LIMIT_PER_MINUTE);
		assert_eq!(limit("0"), 0);
		assert_eq!(limit("5"), 5);
	}
}
