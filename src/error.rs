//! Error taxonomy for the query pipeline.
//!
//! Two layers:
//!
//! - [`ConnectorError`] is what a [`SourceConnector`](crate::traits::SourceConnector)
//!   reports. Its [`ConnectorErrorKind`] says structurally whether the data
//!   source or object was missing, so nothing downstream inspects message text.
//! - [`QueryError`] is what the pipeline surfaces to callers. Each variant
//!   maps to a stable [`code`](QueryError::code) string.
//!
//! Degraded outcomes (empty knowledge tier, per-table introspection
//! failures, reasoning failures) are not errors; they are logged and absorbed
//! where they happen.

use thiserror::Error;

/// Category of a connector failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectorErrorKind {
    /// The data source, database, schema, or table does not exist.
    NotFound,
    /// The request was rejected before reaching the source (bad parameters).
    InvalidInput,
    /// The source could not be reached or opened.
    Unavailable,
    /// The source rejected or failed the statement.
    Query,
    Other,
}

/// Failure reported by a source connector.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ConnectorError {
    pub kind: ConnectorErrorKind,
    pub message: String,
}

impl ConnectorError {
    pub fn new(kind: ConnectorErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ConnectorErrorKind::NotFound, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ConnectorErrorKind::InvalidInput, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ConnectorErrorKind::Unavailable, message)
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::new(ConnectorErrorKind::Query, message)
    }

    pub fn is_not_found(&self) -> bool {
        self.kind == ConnectorErrorKind::NotFound
    }
}

/// Error surfaced by the pipeline, router, and executor.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Rejected before any external call.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Unknown data source, database, schema, or table.
    #[error("not found: {0}")]
    NotFound(String),

    /// A collaborator (connector, knowledge store, model) failed.
    #[error("{context}: {source:#}")]
    Upstream {
        context: String,
        #[source]
        source: anyhow::Error,
    },
}

impl QueryError {
    pub fn upstream(context: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        QueryError::Upstream {
            context: context.into(),
            source: source.into(),
        }
    }

    /// Stable error code for API and CLI consumers.
    pub fn code(&self) -> &'static str {
        match self {
            QueryError::InvalidInput(_) => "bad_request",
            QueryError::NotFound(_) => "not_found",
            QueryError::Upstream { .. } => "internal",
        }
    }
}

impl From<ConnectorError> for QueryError {
    fn from(err: ConnectorError) -> Self {
        match err.kind {
            ConnectorErrorKind::NotFound => QueryError::NotFound(err.message),
            ConnectorErrorKind::InvalidInput => QueryError::InvalidInput(err.message),
            _ => QueryError::upstream("connector failed", err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connector_kinds_map_structurally() {
        let e: QueryError = ConnectorError::not_found("data source 7 is not registered").into();
        assert!(matches!(e, QueryError::NotFound(_)));
        assert_eq!(e.code(), "not_found");

        let e: QueryError = ConnectorError::invalid_input("path is required").into();
        assert_eq!(e.code(), "bad_request");

        let e: QueryError = ConnectorError::query("no such column: amount2").into();
        assert_eq!(e.code(), "internal");
        assert!(e.to_string().contains("no such column"));
    }

    #[test]
    fn not_found_is_not_inferred_from_message_text() {
        let e: QueryError = ConnectorError::query("table not found").into();
        assert!(matches!(e, QueryError::Upstream { .. }));
    }
}
