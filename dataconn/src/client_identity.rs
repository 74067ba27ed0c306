//! Client identity validation.
//!
//! A client identity names one peer in a single path component: no empty
//! string, no `/`. It's used both as a stdinserver socket suffix and as an
//! opaque label transports attach to an accepted connection.

use std::fmt;

use crate::error::DataconnError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ClientIdentity(String);

impl ClientIdentity {
    pub fn parse(s: impl Into<String>) -> Result<Self, DataconnError> {
        let s = s.into();
        validate_client_identity(&s)?;
        Ok(Self(s))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ClientIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Validate that `s` is a single non-empty path component: non-empty, and
/// containing no `/`.
pub fn validate_client_identity(s: &str) -> Result<(), DataconnError> {
    if s.is_empty() {
        return Err(DataconnError::InvalidClientIdentity(
            s.to_owned(),
            "must not be empty".to_owned(),
        ));
    }
    if s.contains('/') {
        return Err(DataconnError::InvalidClientIdentity(
            s.to_owned(),
            "must not contain '/'".to_owned(),
        ));
    }
    Ok(())
}
