//! Error types for the SELECT execution core.

use thiserror::Error;

/// Result alias used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors this core can report to its caller.
///
/// Internal consistency violations (double `init`, `prepare` before `init`)
/// are not represented here: they are programming errors in the caller and
/// are reported as panics, matching spec's "fatal internal error" framing.
#[derive(Debug, Error)]
pub enum Error {
    /// An `ORDER BY`/`GROUP BY`/`DISTINCT ON` position or a `FETCH PERCENT`
    /// value fell outside its valid range.
    #[error("invalid value for {what}: {detail}")]
    InvalidValue {
        /// What was being validated (e.g. `"ORDER BY position"`).
        what: &'static str,
        /// Human-readable detail, e.g. the offending value.
        detail: String,
    },

    /// A schema- or table-qualified wildcard (`schema.table.*`) did not
    /// resolve to any filter in the `FROM` clause.
    #[error("table or view not found: {0}")]
    TableOrViewNotFound(String),

    /// `FETCH ... WITH TIES` was requested without an `ORDER BY`.
    #[error("WITH TIES requires an ORDER BY clause")]
    WithTiesWithoutOrderBy,

    /// A requested combination of features is not supported together, e.g.
    /// `DISTINCT ON` with `DISTINCT`, or MVCC `FOR UPDATE` with `GROUP BY`,
    /// any form of `DISTINCT`, quick aggregate, or a join.
    #[error("unsupported feature combination: {0}")]
    UnsupportedFeatureCombination(&'static str),

    /// An error propagated unchanged from an external collaborator (the
    /// table filter, index, result sink, or session).
    #[error("collaborator error: {0}")]
    Collaborator(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Convenience constructor for [`Error::InvalidValue`].
    pub fn invalid_value(what: &'static str, detail: impl Into<String>) -> Self {
        Error::InvalidValue {
            what,
            detail: detail.into(),
        }
    }
}
