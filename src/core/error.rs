use thiserror::Error;

/// Failure reported by the external document store.
///
/// Cloneable so a single failed batch can be memoized against every key it
/// covered.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Entity '{0}' not found")]
    NotFound(String),

    #[error("Entity '{0}' already exists")]
    AlreadyExists(String),

    #[error("Transaction aborted: {0}")]
    Aborted(String),

    #[error("Transaction '{0}' is no longer active")]
    TransactionClosed(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Batch for '{0}' was dropped before completing")]
    BatchDropped(String),

    #[error("Store error: {0}")]
    Internal(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// A single schema violation, addressed by a dotted/bracketed property path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub path: String,
    pub message: String,
}

impl FieldError {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for FieldError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.path.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}: {}", self.path, self.message)
        }
    }
}

fn join_errors(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// A stored document could not be produced for the caller.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LoadError {
    #[error("{kind} '{id}' not found")]
    NotFound { kind: String, id: String },

    #[error("{kind} '{id}' failed validation on load: {}", join_errors(.errors))]
    Invalid {
        kind: String,
        id: String,
        errors: Vec<FieldError>,
    },
}

impl LoadError {
    pub fn id(&self) -> &str {
        match self {
            Self::NotFound { id, .. } | Self::Invalid { id, .. } => id,
        }
    }

    pub fn errors(&self) -> &[FieldError] {
        match self {
            Self::NotFound { .. } => &[],
            Self::Invalid { errors, .. } => errors,
        }
    }
}

/// A document was rejected before being written.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind} '{id}' failed validation on save: {}", join_errors(.errors))]
pub struct SaveError {
    pub kind: String,
    pub id: String,
    pub errors: Vec<FieldError>,
}

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Save(#[from] SaveError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("A principal is already attached to this context")]
    PrincipalAlreadyAttached,

    #[error("Lock error: {0}")]
    Lock(String),

    /// Expected failure that aborts a unit of work without indicating a bug,
    /// such as a rejected business rule.
    #[error("{0}")]
    NonFatal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::Lock(err.to_string())
    }
}

/// Classifies errors escaping a transaction body.
///
/// Non-fatal errors still roll the transaction back; they are only logged at
/// a lower severity.
pub trait ErrorClass {
    fn is_non_fatal(&self) -> bool {
        false
    }
}

impl ErrorClass for Error {
    fn is_non_fatal(&self) -> bool {
        matches!(self, Self::NonFatal(_))
    }
}

impl ErrorClass for StoreError {}
