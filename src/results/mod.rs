//! Result values, statistics, deduplication and alerts.

pub mod alert;
pub mod dedup;
pub mod matches;
pub mod stats;

pub use alert::{longer, Alert, ProposedQuery};
pub use dedup::Deduper;
pub use matches::{
    CommitMatch, CommitMatchKind, FileMatch, LineMatch, MatchKey, RepoMatch, Repository,
    SearchMatch,
};
pub use stats::Stats;
