//! Application-wide error types.

use std::fmt;

use thiserror::Error;

/// Application-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Application-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Database error: {0}")]
    DatabaseSqlx(sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Entity not found: {entity_type} with id {id}")]
    NotFound { entity_type: String, id: String },

    /// A second entity referenced by the operation is missing.
    #[error("Relation not found: {entity_type} with id {id}")]
    RelationNotFound { entity_type: String, id: String },

    #[error("Duplicate: {0}")]
    Duplicate(String),

    #[error("User {requested_by} is not allowed to ping user {user_id}")]
    PingNotAllowed {
        user_id: String,
        requested_by: String,
    },

    /// The provider reported a permanently dead destination.
    #[error("Invalid target: {0}")]
    InvalidTarget(String),

    #[error("Unsupported: {0}")]
    Unsupported(String),

    #[error("Deadline exceeded: {0}")]
    Deadline(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("{0}")]
    Aggregate(AggregateError),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        if let sqlx::Error::Database(db_err) = &err
            && db_err.is_unique_violation()
        {
            return Self::Duplicate(db_err.message().to_string());
        }
        Self::DatabaseSqlx(err)
    }
}

impl From<fanout::FanoutError<Error>> for Error {
    fn from(err: fanout::FanoutError<Error>) -> Self {
        match err {
            fanout::FanoutError::Cancelled => {
                Self::Deadline("cancelled before fan-out started".to_string())
            }
            fanout::FanoutError::Failed(errors) => Self::combine(errors)
                .unwrap_or_else(|| Self::Other("fan-out failed without errors".to_string())),
        }
    }
}

impl Error {
    pub fn not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn relation_not_found(entity_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::RelationNotFound {
            entity_type: entity_type.into(),
            id: id.into(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn deadline(operation: impl Into<String>) -> Self {
        Self::Deadline(operation.into())
    }

    /// Combine independent failures into one error.
    ///
    /// Returns `None` for an empty list and the error itself for a single one.
    pub fn combine(errors: impl IntoIterator<Item = Error>) -> Option<Error> {
        let mut errors: Vec<Error> = errors.into_iter().collect();
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(Self::Aggregate(AggregateError { errors })),
        }
    }

    /// Combine the results of independent steps, keeping every failure.
    pub fn combine_results(results: impl IntoIterator<Item = Result<()>>) -> Result<()> {
        match Self::combine(results.into_iter().filter_map(std::result::Result::err)) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Append follow-up failures, e.g. from compensation, keeping this error first.
    pub fn with_followups(self, followups: impl IntoIterator<Item = Error>) -> Error {
        let followups: Vec<Error> = followups.into_iter().collect();
        if followups.is_empty() {
            return self;
        }
        let mut errors = Vec::with_capacity(followups.len() + 1);
        errors.push(self);
        errors.extend(followups);
        Self::Aggregate(AggregateError { errors })
    }

    pub fn is_duplicate(&self) -> bool {
        self.any(&|e| matches!(e, Self::Duplicate(_)))
    }

    pub fn is_invalid_target(&self) -> bool {
        self.any(&|e| matches!(e, Self::InvalidTarget(_)))
    }

    pub fn is_not_found(&self) -> bool {
        self.any(&|e| matches!(e, Self::NotFound { .. } | Self::RelationNotFound { .. }))
    }

    /// Whether every cause is `Unsupported`, i.e. nothing actually failed.
    pub fn is_unsupported(&self) -> bool {
        self.causes()
            .iter()
            .all(|e| matches!(e, Self::Unsupported(_)))
    }

    /// Drop `Unsupported` causes, returning whatever actually failed.
    pub fn without_unsupported(self) -> Option<Error> {
        match self {
            Self::Unsupported(_) => None,
            Self::Aggregate(agg) => Self::combine(
                agg.errors
                    .into_iter()
                    .filter_map(Error::without_unsupported),
            ),
            other => Some(other),
        }
    }

    pub fn is_deadline(&self) -> bool {
        self.any(&|e| matches!(e, Self::Deadline(_)))
    }

    /// Whether this error, or any error nested in an aggregate, matches.
    pub fn any(&self, pred: &dyn Fn(&Error) -> bool) -> bool {
        match self {
            Self::Aggregate(agg) => agg.errors.iter().any(|e| e.any(pred)),
            other => pred(other),
        }
    }

    /// Nested errors of an aggregate, or the error itself.
    pub fn causes(&self) -> Vec<&Error> {
        match self {
            Self::Aggregate(agg) => agg.errors.iter().flat_map(Error::causes).collect(),
            other => vec![other],
        }
    }
}

/// Several independent failures that happened together.
#[derive(Debug)]
pub struct AggregateError {
    errors: Vec<Error>,
}

impl AggregateError {
    pub fn errors(&self) -> &[Error] {
        &self.errors
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors occurred:", self.errors.len())?;
        for err in &self.errors {
            write!(f, "\n\t* {}", err)?;
        }
        Ok(())
    }
}
