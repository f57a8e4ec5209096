//! search-core: concurrent compilation, evaluation and pagination of
//! search query plans.
//!
//! A query string parses into a disjunctive-normal-form [`query::Plan`].
//! Each clause compiles ([`compile::Compiler`]) into a tree of
//! [`jobs::Job`] values over pluggable [`backend`] traits, and the
//! [`eval::PlanEvaluator`] runs the clauses concurrently, merging their
//! output under one deduplicating, budgeted aggregator. [`pagination`]
//! layers a cursor-based repository walk on top for exhaustive paging.

pub mod backend;
pub mod compile;
pub mod config;
pub mod error;
pub mod eval;
pub mod jobs;
pub mod pagination;
pub mod query;
pub mod results;
pub mod telemetry;

pub use compile::{CompileConfig, Compiler};
pub use error::SearchError;
pub use eval::{EvalConfig, PlanEvaluator, SearchResults};
pub use pagination::{PagedSearcher, SearchCursor};
pub use query::{parse, Plan};
pub use results::{SearchMatch, Stats};
