//! Error taxonomy for the search engine.
//!
//! Errors fall into three behavioral classes:
//! - query/compilation errors abort the whole request and are surfaced verbatim;
//! - cancellation-class errors (`Canceled`, `BudgetExhausted`) are recovered
//!   locally and never reach the caller as errors;
//! - backend failures other than cancellation abort the evaluation.
//!
//! `NoResults` is a sentinel, not a failure: a predicate that resolves to it
//! means "matches nothing", which is distinct from an empty expansion meaning
//! "no constraint".

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SearchError {
    /// The query is malformed or combines fields in an unsupported way.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A field value could not be compiled to a regex.
    #[error("invalid regex in `{field}:` value: {source}")]
    InvalidRegex {
        field: &'static str,
        #[source]
        source: regex::Error,
    },

    /// Sentinel: a predicate sub-search matched nothing. The enclosing
    /// disjunct contributes zero results, which is not an error condition.
    #[error("no results")]
    NoResults,

    /// Sentinel: the shared result budget is exhausted. Producers stop
    /// emitting; the evaluator filters this out as a non-error.
    #[error("result budget exhausted")]
    BudgetExhausted,

    /// The overall wall-clock deadline elapsed.
    #[error("search timed out")]
    DeadlineExceeded,

    /// The evaluation was canceled, either by the caller or by a sibling
    /// task's failure.
    #[error("search canceled")]
    Canceled,

    /// A backend call failed for a reason other than cancellation.
    #[error("{backend} backend failed")]
    Backend {
        backend: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl SearchError {
    /// True for the cancellation class: errors that are recovered locally and
    /// never surfaced to the caller.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, SearchError::Canceled | SearchError::BudgetExhausted)
    }

    /// True when the error reflects a deadline rather than a failure. Deadline
    /// errors are converted to alerts at the top of the evaluation.
    pub fn is_deadline(&self) -> bool {
        matches!(self, SearchError::DeadlineExceeded)
    }

    /// Wrap a backend failure, tagging which collaborator produced it.
    pub fn backend(backend: &'static str, source: impl Into<anyhow::Error>) -> Self {
        SearchError::Backend {
            backend,
            source: source.into(),
        }
    }
}

pub type Result<T, E = SearchError> = std::result::Result<T, E>;
