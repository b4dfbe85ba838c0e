//! Thread-safe in-memory [`StateStore`] + [`TokenStore`] implementation.

// self
use crate::{
	_prelude::*,
	auth::{OAuthStateToken, OAuthToken, SessionKey},
	store::{OAuthState, StateStore, StoreError, StoreFuture, TokenStore},
};

type StateMap = Arc<Mutex<HashMap<OAuthStateToken, OAuthState>>>;
type TokenMap = Arc<Mutex<HashMap<SessionKey, OAuthToken>>>;

/// Process-local store holding pending states and session tokens, each behind its own lock.
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
	states: StateMap,
	tokens: TokenMap,
}
impl MemoryStore {
	/// Number of pending (unconsumed) states, expired or not.
	pub fn pending_states(&self) -> usize {
		self.states.lock().len()
	}

	/// Drops states that expired before `now`, returning how many were removed.
	pub fn purge_expired_states(&self, now: OffsetDateTime) -> usize {
		let mut guard = self.states.lock();
		let before = guard.len();

		guard.retain(|_, entry| entry.is_live_at(now));

		before - guard.len()
	}

	fn save_state_now(map: &StateMap, state: OAuthState) {
		map.lock().insert(state.state.clone(), state);
	}

	fn consume_state_now(map: &StateMap, state: &str, now: OffsetDateTime) -> Option<SessionKey> {
		let entry = map.lock().remove(state)?;

		if entry.is_live_at(now) { Some(entry.session_key) } else { None }
	}

	fn save_token_now(map: &TokenMap, session_key: SessionKey, mut token: OAuthToken) {
		let mut guard = map.lock();

		if let Some(existing) = guard.get(&session_key) {
			token.inherit_refresh_token(existing);
		}

		guard.insert(session_key, token);
	}

	fn token_now(map: &TokenMap, session_key: &str) -> Option<OAuthToken> {
		map.lock().get(session_key).cloned()
	}
}
impl StateStore for MemoryStore {
	fn save_state(&self, state: OAuthState) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			Self::save_state_now(&self.states, state);

			Ok::<_, StoreError>(())
		})
	}

	fn consume_state<'a>(
		&'a self,
		state: &'a str,
		now: OffsetDateTime,
	) -> StoreFuture<'a, Option<SessionKey>> {
		Box::pin(async move { Ok(Self::consume_state_now(&self.states, state, now)) })
	}
}
impl TokenStore for MemoryStore {
	fn save_token(&self, session_key: SessionKey, token: OAuthToken) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			Self::save_token_now(&self.tokens, session_key, token);

			Ok(())
		})
	}

	fn token<'a>(&'a self, session_key: &'a str) -> StoreFuture<'a, Option<OAuthToken>> {
		Box::pin(async move { Ok(Self::token_now(&self.tokens, session_key)) })
	}
}
