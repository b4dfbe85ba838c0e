//! OAuth session orchestration: authorization-code start/callback handling and the token
//! sources connectors use to authorize upstream calls.

pub mod auth_code;
pub mod session;

pub use auth_code::*;
pub use session::*;

// self
use crate::{
	_prelude::*,
	auth::{self, OPAQUE_TOKEN_BYTES, RandomError, SessionKey},
	clock::{Clock, SystemClock},
	config::{DEFAULT_CALL_TIMEOUT, GatewayConfig, OAuthClientConfig, StateTtl},
	http::ReqwestHttpClient,
	oauth::OAuthFacade,
	store::{StateStore, TokenStore},
};

/// Source of the opaque values used as session keys and `state` nonces.
pub type TokenGenerator = Arc<dyn Fn() -> Result<String, RandomError> + Send + Sync>;

/// Coordinates the authorization-code flow for a single OAuth client.
///
/// The manager owns the state and token stores, the token endpoint facade, and a per-session
/// guard map so refreshes for one session never interleave. All collaborators are injected,
/// which lets tests substitute stores, clocks, HTTP clients, and random sources.
#[derive(Clone)]
pub struct OAuthFlowManager {
	config: OAuthClientConfig,
	facade: OAuthFacade,
	states: Arc<dyn StateStore>,
	tokens: Arc<dyn TokenStore>,
	clock: Arc<dyn Clock>,
	state_ttl: StateTtl,
	generator: TokenGenerator,
	session_guards: Arc<Mutex<HashMap<SessionKey, Arc<AsyncMutex<()>>>>>,
}
impl OAuthFlowManager {
	/// Builds a manager for `config`.
	///
	/// Returns [`Error::OAuthUnavailable`] when the client is not configured or the HTTP
	/// transport cannot be built.
	pub fn new(
		config: Option<OAuthClientConfig>,
		states: Arc<dyn StateStore>,
		tokens: Arc<dyn TokenStore>,
	) -> Result<Self> {
		let config = config.ok_or_else(|| {
			Error::oauth_unavailable(
				"GOOGLE_OAUTH_CLIENT_ID, GOOGLE_OAUTH_CLIENT_SECRET, and GOOGLE_OAUTH_REDIRECT_URL are required",
			)
		})?;
		let http_client = ReqwestHttpClient::new(DEFAULT_CALL_TIMEOUT)
			.map_err(|err| Error::oauth_unavailable(err.to_string()))?;
		let facade = OAuthFacade::new(&config, http_client);

		Ok(Self {
			config,
			facade,
			states,
			tokens,
			clock: Arc::new(SystemClock),
			state_ttl: StateTtl::default(),
			generator: Arc::new(|| auth::random_token(OPAQUE_TOKEN_BYTES)),
			session_guards: Default::default(),
		})
	}

	/// Builds a manager from loaded gateway settings, applying the configured state TTL.
	pub fn from_config(
		config: &GatewayConfig,
		states: Arc<dyn StateStore>,
		tokens: Arc<dyn TokenStore>,
	) -> Result<Self> {
		Ok(Self::new(config.oauth.clone(), states, tokens)?.with_state_ttl(config.state_ttl))
	}

	/// Replaces the HTTP client used for token endpoint calls.
	pub fn with_http_client(mut self, http_client: ReqwestHttpClient) -> Self {
		self.facade = self.facade.with_http_client(http_client);

		self
	}

	/// Replaces the clock used for state expiry and token freshness.
	pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
		self.clock = clock;

		self
	}

	/// Overrides the lifetime of pending authorization states.
	pub fn with_state_ttl(mut self, state_ttl: StateTtl) -> Self {
		self.state_ttl = state_ttl;

		self
	}

	/// Replaces the random source for session keys and `state` values.
	pub fn with_token_generator<F>(mut self, generator: F) -> Self
	where
		F: 'static + Fn() -> Result<String, RandomError> + Send + Sync,
	{
		self.generator = Arc::new(generator);

		self
	}

	/// OAuth client settings this manager was built with.
	pub fn config(&self) -> &OAuthClientConfig {
		&self.config
	}

	/// Effective lifetime of pending authorization states.
	pub fn state_ttl(&self) -> StateTtl {
		self.state_ttl
	}

	/// Returns the shared guard for `session_key`, dropping guards no token source holds any
	/// more.
	fn session_guard(&self, session_key: &SessionKey) -> Arc<AsyncMutex<()>> {
		let mut guards = self.session_guards.lock();

		guards.retain(|key, guard| key == session_key || Arc::strong_count(guard) > 1);
		guards.entry(session_key.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
	}
}
impl Debug for OAuthFlowManager {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("OAuthFlowManager")
			.field("config", &self.config)
			.field("facade", &self.facade)
			.field("state_ttl", &self.state_ttl)
			.finish()
	}
}
