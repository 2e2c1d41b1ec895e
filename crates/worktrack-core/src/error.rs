use std::fmt;

/// Machine-readable error codes for boundary layers and scripts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigParseError,
    ItemNotFound,
    IterationNotFound,
    MalformedFilter,
    FieldConversion,
    VersionConflict,
    BadParameter,
    Unauthorized,
    Cancelled,
    StoreFailure,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::ConfigParseError => "E1002",
            Self::ItemNotFound => "E2001",
            Self::IterationNotFound => "E2002",
            Self::MalformedFilter => "E2101",
            Self::FieldConversion => "E2102",
            Self::VersionConflict => "E2201",
            Self::BadParameter => "E2301",
            Self::Unauthorized => "E4001",
            Self::Cancelled => "E5001",
            Self::StoreFailure => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::ConfigParseError => "Config file parse error",
            Self::ItemNotFound => "Work item not found",
            Self::IterationNotFound => "Iteration not found",
            Self::MalformedFilter => "Filter could not be parsed",
            Self::FieldConversion => "Field value does not match its declared kind",
            Self::VersionConflict => "Work item was modified concurrently",
            Self::BadParameter => "Bad parameter",
            Self::Unauthorized => "Caller identity required",
            Self::Cancelled => "Request cancelled",
            Self::StoreFailure => "Backing store failure",
        }
    }

    /// Optional remediation hint that can be surfaced to callers.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::ConfigParseError => Some("Fix syntax in .worktrack/config.toml and retry."),
            Self::ItemNotFound | Self::IterationNotFound => None,
            Self::MalformedFilter => {
                Some("Pass a JSON object of field/value pairs, e.g. {\"system.state\":\"open\"}.")
            }
            Self::FieldConversion => {
                Some("Check the work item type for the field's kind and send a matching value.")
            }
            Self::VersionConflict => Some("Reload the work item and retry with its current version."),
            Self::BadParameter => None,
            Self::Unauthorized => Some("Set --as or WORKTRACK_IDENTITY."),
            Self::Cancelled => Some("Retry the request; nothing was committed."),
            Self::StoreFailure => Some("Retry once. If persistent, report a bug with logs."),
        }
    }

    /// Status code the HTTP boundary should answer with.
    #[must_use]
    pub const fn status(self) -> u16 {
        match self {
            Self::ItemNotFound | Self::IterationNotFound => 404,
            Self::MalformedFilter | Self::FieldConversion | Self::BadParameter => 400,
            Self::VersionConflict => 409,
            Self::Unauthorized => 401,
            Self::Cancelled => 499,
            Self::ConfigParseError | Self::StoreFailure => 500,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// The kind of record a lookup was for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entity {
    WorkItem,
    Iteration,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkItem => f.write_str("work item"),
            Self::Iteration => f.write_str("iteration"),
        }
    }
}

/// Errors surfaced by the work item access layer.
///
/// Every variant except [`AccessError::Internal`] is recoverable at the
/// boundary: the repositories never retry, they report the specific kind
/// upward.
#[derive(Debug, thiserror::Error)]
pub enum AccessError {
    /// No record with the given id exists.
    #[error("{entity} with id '{id}' not found")]
    NotFound { entity: Entity, id: String },

    /// Filter text is not a value of the expected shape.
    #[error("could not parse filter: {0}")]
    MalformedFilter(String),

    /// A value does not convert to the declared kind of its field.
    #[error("field '{field}': {reason}")]
    FieldConversion { field: String, reason: String },

    /// The caller's expected version is stale.
    #[error("version conflict on work item '{id}': expected {expected}, stored {actual}")]
    VersionConflict { id: String, expected: u64, actual: u64 },

    /// Unknown type name, missing required field, or another bad argument.
    #[error("bad parameter '{parameter}': {reason}")]
    BadParameter { parameter: String, reason: String },

    /// No caller identity was available for a mutating operation.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The request was cancelled before commit.
    #[error("operation cancelled")]
    Cancelled,

    /// Backing store or transaction provider failure.
    #[error("internal error: {0:#}")]
    Internal(#[from] anyhow::Error),
}

impl AccessError {
    pub(crate) fn item_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: Entity::WorkItem,
            id: id.into(),
        }
    }

    pub(crate) fn iteration_not_found(id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: Entity::Iteration,
            id: id.into(),
        }
    }

    pub(crate) fn field(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::FieldConversion {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn bad_parameter(parameter: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::BadParameter {
            parameter: parameter.into(),
            reason: reason.into(),
        }
    }

    /// Machine-readable code associated with this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::NotFound {
                entity: Entity::WorkItem,
                ..
            } => ErrorCode::ItemNotFound,
            Self::NotFound {
                entity: Entity::Iteration,
                ..
            } => ErrorCode::IterationNotFound,
            Self::MalformedFilter(_) => ErrorCode::MalformedFilter,
            Self::FieldConversion { .. } => ErrorCode::FieldConversion,
            Self::VersionConflict { .. } => ErrorCode::VersionConflict,
            Self::BadParameter { .. } => ErrorCode::BadParameter,
            Self::Unauthorized(_) => ErrorCode::Unauthorized,
            Self::Cancelled => ErrorCode::Cancelled,
            Self::Internal(_) => ErrorCode::StoreFailure,
        }
    }

    /// Optional remediation hint for callers.
    #[must_use]
    pub const fn hint(&self) -> Option<&'static str> {
        self.code().hint()
    }

    /// Whether this error is a caller mistake (400-class) rather than a
    /// server-side failure.
    #[must_use]
    pub const fn is_client_error(&self) -> bool {
        let status = self.code().status();
        status >= 400 && status < 500
    }
}

#[cfg(test)]
mod tests {
    use super::{AccessError, ErrorCode};
    use std::collections::HashSet;

    const ALL: [ErrorCode; 10] = [
        ErrorCode::ConfigParseError,
        ErrorCode::ItemNotFound,
        ErrorCode::IterationNotFound,
        ErrorCode::MalformedFilter,
        ErrorCode::FieldConversion,
        ErrorCode::VersionConflict,
        ErrorCode::BadParameter,
        ErrorCode::Unauthorized,
        ErrorCode::Cancelled,
        ErrorCode::StoreFailure,
    ];

    #[test]
    fn all_codes_are_unique() {
        let mut seen = HashSet::new();
        for code in ALL {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        for code in ALL {
            let code = code.code();
            assert_eq!(code.len(), 5);
            assert!(code.starts_with('E'));
            assert!(code.chars().skip(1).all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn filter_and_conversion_errors_have_distinct_remediation() {
        let malformed = AccessError::MalformedFilter("x".into());
        let conversion = AccessError::field("system.title", "expected string");
        assert_ne!(malformed.code(), conversion.code());
        assert_ne!(malformed.hint(), conversion.hint());
        assert!(malformed.is_client_error());
        assert!(conversion.is_client_error());
    }

    #[test]
    fn not_found_codes_follow_entity() {
        assert_eq!(
            AccessError::item_not_found("7").code(),
            ErrorCode::ItemNotFound
        );
        assert_eq!(
            AccessError::iteration_not_found("7").code(),
            ErrorCode::IterationNotFound
        );
    }

    #[test]
    fn internal_errors_are_not_client_errors() {
        let err = AccessError::from(anyhow::anyhow!("disk on fire"));
        assert_eq!(err.code(), ErrorCode::StoreFailure);
        assert!(!err.is_client_error());
        assert_eq!(ErrorCode::VersionConflict.status(), 409);
    }
}
