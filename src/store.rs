//! Storage contracts and the built-in in-memory backend for OAuth state and session tokens.
//!
//! Both contracts return boxed futures so external backends (Redis, SQL) can sit behind the
//! same trait objects when the gateway runs on more than one instance. The bundled
//! [`MemoryStore`] keeps everything in-process.

pub mod memory;

pub use memory::MemoryStore;

// self
use crate::{
	_prelude::*,
	auth::{OAuthStateToken, OAuthToken, SessionKey},
};

/// Future returned by every store operation.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Pending authorization attempt keyed by its anti-forgery `state` value.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthState {
	/// Anti-forgery nonce embedded in the authorization URL.
	pub state: OAuthStateToken,
	/// Session the resulting token will be stored under.
	pub session_key: SessionKey,
	/// Last instant at which the state may be consumed.
	pub expires_at: OffsetDateTime,
}
impl OAuthState {
	/// Returns `true` while `now` has not passed the expiry instant.
	pub fn is_live_at(&self, now: OffsetDateTime) -> bool {
		now <= self.expires_at
	}
}

/// Single-use store for pending authorization `state` values.
pub trait StateStore
where
	Self: Send + Sync,
{
	/// Inserts or replaces the entry for `state.state`.
	fn save_state(&self, state: OAuthState) -> StoreFuture<'_, ()>;

	/// Atomically removes the entry for `state` and returns its session key if it was still
	/// live at `now`.
	///
	/// The entry is deleted whether or not it had expired, so a state value can never be
	/// presented twice.
	fn consume_state<'a>(
		&'a self,
		state: &'a str,
		now: OffsetDateTime,
	) -> StoreFuture<'a, Option<SessionKey>>;
}

/// Session-keyed OAuth token store.
pub trait TokenStore
where
	Self: Send + Sync,
{
	/// Upserts the token for `session_key`.
	///
	/// When `token` carries no refresh secret, the previously stored refresh secret is kept;
	/// access token, token type, and expiry always take the newer values.
	fn save_token(&self, session_key: SessionKey, token: OAuthToken) -> StoreFuture<'_, ()>;

	/// Returns an owned copy of the token stored for `session_key`.
	fn token<'a>(&'a self, session_key: &'a str) -> StoreFuture<'a, Option<OAuthToken>>;
}

/// Error type produced by [`StateStore`] and [`TokenStore`] implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}
