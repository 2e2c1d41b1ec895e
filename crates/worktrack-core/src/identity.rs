use std::fmt;

use crate::error::AccessError;

/// The authenticated caller of a mutating operation.
///
/// Resolution of who the caller is happens at the boundary; the
/// repositories only require that one was supplied.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    /// Wrap a resolved caller name.
    ///
    /// # Errors
    ///
    /// [`AccessError::Unauthorized`] when the name is empty or contains
    /// whitespace.
    pub fn new(raw: impl Into<String>) -> Result<Self, AccessError> {
        let raw = raw.into();
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(AccessError::Unauthorized("empty identity".to_string()));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(AccessError::Unauthorized(format!(
                "identity '{trimmed}' must not contain whitespace"
            )));
        }
        Ok(Self(trimmed.to_string()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
