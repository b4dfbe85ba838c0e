//! Opaque identifiers exchanged with clients and authorization servers.

// std
use std::{borrow::Borrow, ops::Deref};
// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{TryRngCore, rngs::OsRng};
// self
use crate::_prelude::*;

macro_rules! def_id {
	($name:ident, $doc:literal, $kind:literal) => {
		#[doc = $doc]
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Creates a new identifier after trimming and validation.
			pub fn new(value: impl AsRef<str>) -> Result<Self, IdentifierError> {
				let view = value.as_ref().trim();

				validate_view($kind, view)?;

				Ok(Self(view.to_owned()))
			}

			/// Returns the identifier as a string slice.
			pub fn as_str(&self) -> &str {
				&self.0
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &Self::Target {
				&self.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}
		impl TryFrom<String> for $name {
			type Error = IdentifierError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				Self::new(value)
			}
		}
		impl Borrow<str> for $name {
			fn borrow(&self) -> &str {
				&self.0
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, concat!($kind, "({})"), self.0)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
		impl FromStr for $name {
			type Err = IdentifierError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s)
			}
		}
	};
}

/// Bytes of entropy behind every generated session key and state value.
pub const OPAQUE_TOKEN_BYTES: usize = 32;

const IDENTIFIER_MAX_LEN: usize = 256;

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// The identifier was empty or whitespace.
	#[error("{kind} cannot be empty.")]
	Empty {
		/// Kind of identifier (session key, state).
		kind: &'static str,
	},
	/// The identifier contains whitespace characters.
	#[error("{kind} contains whitespace.")]
	ContainsWhitespace {
		/// Kind of identifier (session key, state).
		kind: &'static str,
	},
	/// The identifier exceeded the allowed character count.
	#[error("{kind} exceeds {max} characters.")]
	TooLong {
		/// Kind of identifier (session key, state).
		kind: &'static str,
		/// Maximum permitted character count.
		max: usize,
	},
}

/// The operating system could not supply random bytes.
#[derive(Debug, ThisError)]
#[error("Secure random generation failed.")]
pub struct RandomError(#[source] Box<dyn StdError + Send + Sync>);
impl RandomError {
	/// Wraps the entropy source failure.
	pub fn new(src: impl 'static + Send + Sync + StdError) -> Self {
		Self(Box::new(src))
	}
}

def_id! { SessionKey, "Opaque correlation id handed to clients in place of their OAuth token.", "SessionKey" }
def_id! { OAuthStateToken, "Anti-forgery `state` nonce embedded in authorization URLs.", "OAuthState" }

/// Produces a URL-safe (unpadded base64) string from `len` bytes of OS entropy.
pub fn random_token(len: usize) -> Result<String, RandomError> {
	let mut bytes = vec![0_u8; len];

	OsRng.try_fill_bytes(&mut bytes).map_err(RandomError::new)?;

	Ok(URL_SAFE_NO_PAD.encode(bytes))
}

fn validate_view(kind: &'static str, view: &str) -> Result<(), IdentifierError> {
	if view.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	if view.chars().any(char::is_whitespace) {
		return Err(IdentifierError::ContainsWhitespace { kind });
	}
	if view.len() > IDENTIFIER_MAX_LEN {
		return Err(IdentifierError::TooLong { kind, max: IDENTIFIER_MAX_LEN });
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn identifiers_trim_and_validate() {
		let key = SessionKey::new("  session-1 ").expect("Surrounding whitespace is trimmed.");

		assert_eq!(key.as_str(), "session-1");
		assert!(SessionKey::new("   ").is_err());
		assert!(OAuthStateToken::new("with space").is_err());
		assert!(SessionKey::new("a".repeat(IDENTIFIER_MAX_LEN + 1)).is_err());
	}

	#[test]
	fn generated_tokens_are_url_safe_and_unique() {
		let first = random_token(OPAQUE_TOKEN_BYTES).expect("OS entropy should be available.");
		let second = random_token(OPAQUE_TOKEN_BYTES).expect("OS entropy should be available.");

		// 32 bytes encode to 43 unpadded base64 characters.
		assert_eq!(first.len(), 43);
		assert_ne!(first, second);
		assert!(first.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
	}

	#[test]
	fn serde_round_trip_enforces_validation() {
		let key: SessionKey =
			serde_json::from_str("\"session-42\"").expect("Session key should deserialize.");

		assert_eq!(key.as_ref(), "session-42");
		assert!(serde_json::from_str::<SessionKey>("\"\"").is_err());
	}

	#[test]
	fn borrow_supports_fast_lookup() {
		let map: HashMap<SessionKey, u8> = HashMap::from_iter([(
			SessionKey::new("session-123").expect("Session key used for lookup should be valid."),
			7_u8,
		)]);

		assert_eq!(map.get("session-123"), Some(&7));
	}
}
