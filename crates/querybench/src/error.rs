//! Harness error types.

use thiserror::Error;

/// Errors raised by the benchmark harness and its backends.
#[derive(Debug, Error)]
pub enum Error {
    /// The schema script could not be read or applied.
    #[error("schema error: {0}")]
    Schema(String),

    /// The shared connection pool could not be created.
    #[error("connection pool error: {0}")]
    Pool(#[source] sqlx::Error),

    /// Generated fixture data does not match what the store holds.
    #[error("fixture inconsistency: {0}")]
    Fixture(String),

    /// Invalid harness configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The async runtime could not be started.
    #[error("runtime error: {0}")]
    Runtime(#[source] std::io::Error),

    /// Statement failed in the raw sqlx path or the session backend.
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Statement failed in a sea-orm / sea-query backend.
    #[error("sea-orm error: {0}")]
    SeaOrm(#[from] sea_orm::DbErr),

    /// A statement could not be built.
    #[error("query build error: {0}")]
    QueryBuild(String),

    /// No scenario registered under this name.
    #[error("unknown scenario: {0}")]
    UnknownScenario(String),

    /// A scenario with this name is already registered.
    #[error("duplicate scenario: {0}")]
    DuplicateScenario(String),

    /// Backends disagree on the result of a scenario.
    #[error("scenario {scenario} is not equivalent across backends: {detail}")]
    Inequivalent { scenario: String, detail: String },

    /// A forked worker failed or produced unreadable output.
    #[error("fork error: {0}")]
    Fork(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Whether this error must abort the whole trial.
    ///
    /// Non-fatal errors come from a single benchmarked operation; the runner
    /// records the iteration as failed and carries on.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Error::Database(_) | Error::SeaOrm(_) | Error::QueryBuild(_)
        )
    }
}

/// Result alias for harness operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(Error::Schema("bad ddl".into()).is_fatal());
        assert!(Error::Fixture("expected 10 users, found 9".into()).is_fatal());
        assert!(Error::Config("threads must be 1".into()).is_fatal());
        assert!(!Error::Database(sqlx::Error::RowNotFound).is_fatal());
        assert!(!Error::SeaOrm(sea_orm::DbErr::RecordNotFound("t_user".into())).is_fatal());
        assert!(!Error::QueryBuild("column count mismatch".into()).is_fatal());
    }
}
