//! Credential checking and opaque session token issuing.
//!
//! Tokens are handed out on a successful check and never looked at again;
//! there is no registry to verify them against.

use std::fmt;

use thiserror::Error;
use uuid::Uuid;

/// Failure returned when a credential check does not match.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum AuthError {
    /// Either the username or the password differs from the expected pair.
    #[error("username or password incorrect")]
    InvalidCredentials,
}

/// The username/password pair a service accepts.
#[derive(Clone, PartialEq, Eq)]
#[cfg_attr(feature = "with-serde", derive(serde::Deserialize, serde::Serialize))]
#[cfg_attr(feature = "with-serde", serde(default))]
pub struct CredentialPair {
    pub username: String,
    pub password: String,
}

impl CredentialPair {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl Default for CredentialPair {
    fn default() -> Self {
        Self::new("admin", "123456")
    }
}

impl fmt::Debug for CredentialPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialPair")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Opaque token handed back on a successful login.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    /// Generate a fresh token from a random v4 UUID.
    pub fn generate() -> Self {
        Self(Uuid::new_v4().hyphenated().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Checks submitted credentials against a single expected pair.
#[derive(Debug, Clone)]
pub struct Authenticator {
    expected: CredentialPair,
}

impl Authenticator {
    pub fn new(expected: CredentialPair) -> Self {
        Self { expected }
    }

    /// Compare `username` and `password` exactly (case-sensitive) and issue a
    /// new token when both match.
    pub fn authenticate(&self, username: &str, password: &str) -> Result<SessionToken, AuthError> {
        if username == self.expected.username && password == self.expected.password {
            Ok(SessionToken::generate())
        } else {
            Err(AuthError::InvalidCredentials)
        }
    }
}
