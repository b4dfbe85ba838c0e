//! Redacting wrapper for access and refresh token material.

// self
use crate::_prelude::*;

/// Token secret that never prints its value through `Debug` or `Display`.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TokenSecret(String);
impl TokenSecret {
	/// Wraps a new secret string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Wraps `value` unless it is blank, which providers use to mean "not issued".
	pub fn non_empty(value: impl Into<String>) -> Option<Self> {
		let value = value.into();

		if value.trim().is_empty() { None } else { Some(Self(value)) }
	}

	/// Returns the inner token value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}

	/// Returns `true` when the secret holds no characters.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}
}
impl From<&str> for TokenSecret {
	fn from(value: &str) -> Self {
		Self::new(value)
	}
}
impl Debug for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("TokenSecret(<redacted>)")
	}
}
impl Display for TokenSecret {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn formatters_never_leak_the_secret() {
		let secret = TokenSecret::new("ya29.super-secret");

		assert_eq!(format!("{secret:?}"), "TokenSecret(<redacted>)");
		assert_eq!(format!("{secret}"), "<redacted>");
		assert_eq!(secret.expose(), "ya29.super-secret");
	}

	#[test]
	fn blank_values_are_treated_as_absent() {
		assert!(TokenSecret::non_empty("").is_none());
		assert!(TokenSecret::non_empty("  ").is_none());
		assert!(TokenSecret::non_empty("refresh-1").is_some());
	}
}
