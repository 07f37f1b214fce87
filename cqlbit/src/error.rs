use std::sync::{Arc, PoisonError};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CqlError {

    #[error("Invalid entity definition `{entity}`: {reason}")]
    InvalidEntityDefinition { entity: String, reason: String },

    #[error("Unsupported column type for `{column}`: {declared}")]
    UnsupportedColumnType { column: String, declared: String },

    #[error("Unknown table `{table}` for entity `{entity}`")]
    UnknownTable { entity: String, table: String },

    #[error("Unknown column `{column}` for entity `{entity}`")]
    UnknownColumn { entity: String, column: String },

    #[error("Missing key clause for `{entity}`: {missing:?} not bound")]
    MissingKeyClause { entity: String, missing: Vec<String> },

    #[error("Counter and non-counter statements cannot share a batch")]
    MixedCounterOperation,

    #[error("{statement} statements are not supported in a {group}")]
    UnsupportedStatementInGroup { group: &'static str, statement: &'static str },

    #[error("Conflicting conditions: {0}")]
    ConflictingConditions(String),

    #[error("Invalid value for `{column}`: {reason}")]
    InvalidValue { column: String, reason: String },

    #[error("Not Found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Condition not applied: {0}")]
    ConditionNotApplied(String),

    #[error("Execution failure: {0}")]
    ExecutionFailure(#[from] DriverError),

    #[error("Execution cancelled")]
    Cancelled,

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Schema creation for `{entity}` failed: {cause}")]
    SchemaCreation { entity: String, #[source] cause: Arc<CqlError> },

    #[error("Config error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("serde error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Custom error: {0}")]
    Custom(String),
}

impl CqlError {
    pub fn invalid_definition(entity: impl Into<String>, reason: impl Into<String>) -> Self {
        CqlError::InvalidEntityDefinition { entity: entity.into(), reason: reason.into() }
    }

    pub fn invalid_value(column: impl Into<String>, reason: impl Into<String>) -> Self {
        CqlError::InvalidValue { column: column.into(), reason: reason.into() }
    }

    pub fn unknown_column(entity: impl Into<String>, column: impl Into<String>) -> Self {
        CqlError::UnknownColumn { entity: entity.into(), column: column.into() }
    }
}

impl<T> From<PoisonError<T>> for CqlError
{
    fn from(e: PoisonError<T>) -> Self {
        CqlError::Custom(format!("Poison error: {:?}", e.to_string()))
    }
}

/// Errors reported by the driver collaborator, before translation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DriverError {
    #[error("keyspace {0} does not exist")]
    KeyspaceNotFound(String),

    #[error("invalid query: {0}")]
    Invalid(String),

    #[error("not enough replicas available: {0}")]
    Unavailable(String),

    #[error("driver timeout: {0}")]
    Timeout(String),

    #[error("{0}")]
    Execution(String),
}
