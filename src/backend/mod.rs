//! Backend seams: the evaluator talks to repository resolution and the
//! indexed, unindexed, symbol, commit and structural searchers only through
//! the traits here. Production wiring plugs real services in; tests and the
//! CLI use [`memory::MemoryBackend`].

pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;

use crate::error::SearchError;
use crate::query::{BasicQuery, Field};
use crate::results::{Repository, SearchMatch, Stats};

/// A repository plus the revisions to search in it. An empty revision list
/// means the default branch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRevisions {
    pub repo: Repository,
    pub revs: Vec<String>,
}

impl RepoRevisions {
    pub fn head(repo: Repository) -> RepoRevisions {
        RepoRevisions { repo, revs: Vec::new() }
    }
}

/// Outcome of resolving `repo:` filters against the known universe.
#[derive(Debug, Clone, Default)]
pub struct ResolvedRepos {
    pub repos: Vec<RepoRevisions>,
    /// `repo@rev` strings that named unknown revisions.
    pub missing_revs: Vec<String>,
    /// The resolver stopped early because more repos matched than `limit`.
    pub over_limit: bool,
    pub excluded_forks: usize,
    pub excluded_archived: usize,
}

/// Validated repository filters extracted from one clause.
#[derive(Debug, Clone, Default)]
pub struct RepoFilters {
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub revs: Vec<String>,
    pub include_forks: bool,
    pub include_archived: bool,
    pub visibility: Option<String>,
    pub limit: Option<usize>,
}

impl RepoFilters {
    /// Extract and validate the repo-affecting filters of a clause. Predicate
    /// values (`contains...`) are rewritten away before this runs.
    pub fn from_clause(clause: &BasicQuery) -> Result<RepoFilters, SearchError> {
        // `context:global` is the default context and the only one defined
        // here; anything else would silently widen or narrow the search.
        if let Some(p) = clause
            .parameters
            .iter()
            .find(|p| p.field == Field::Context && (p.negated || p.value != "global"))
        {
            return Err(SearchError::InvalidQuery(format!(
                "the search context `{}` is not defined; only context:global is available",
                p.value
            )));
        }
        let mut filters = RepoFilters {
            include: clause.values(Field::Repo).map(String::from).collect(),
            exclude: clause.negated_values(Field::Repo).map(String::from).collect(),
            revs: clause.values(Field::Rev).map(String::from).collect(),
            include_forks: matches!(clause.value(Field::Fork), Some("yes") | Some("true")),
            include_archived: matches!(clause.value(Field::Archived), Some("yes") | Some("true")),
            visibility: clause.value(Field::Visibility).map(String::from),
            limit: None,
        };
        // Strip `@rev` suffixes into the revision list.
        for pattern in &mut filters.include {
            if let Some((base, rev)) = pattern.rsplit_once('@') {
                let rev = rev.to_string();
                *pattern = base.to_string();
                if !rev.is_empty() && !filters.revs.contains(&rev) {
                    filters.revs.push(rev);
                }
            }
        }
        for pattern in filters.include.iter().chain(&filters.exclude) {
            Regex::new(pattern)
                .map_err(|source| SearchError::InvalidRegex { field: "repo", source })?;
        }
        Ok(filters)
    }
}

/// Which repositories an index query runs over.
#[derive(Debug, Clone)]
pub enum IndexScope {
    /// All indexed repositories, without listing them up front.
    Universe,
    Repos(Vec<RepoRevisions>),
}

/// A query for the trigram-indexed backend.
#[derive(Debug, Clone)]
pub struct IndexQuery {
    pub pattern: String,
    pub is_regex: bool,
    pub case_sensitive: bool,
    /// Literal substrings every match must contain, extracted from the
    /// pattern for index candidate selection.
    pub literals: Vec<String>,
    pub include_paths: Vec<String>,
    pub exclude_paths: Vec<String>,
    pub languages: Vec<String>,
    pub file_match_limit: usize,
    pub path_only: bool,
    pub scope: IndexScope,
}

/// A query for the on-demand (unindexed) text searcher.
#[derive(Debug, Clone)]
pub struct TextQuery {
    pub pattern: String,
    pub is_regex: bool,
    pub case_sensitive: bool,
    pub include_paths: Vec<String>,
    pub exclude_paths: Vec<String>,
    pub languages: Vec<String>,
    pub file_match_limit: usize,
    pub path_only: bool,
    pub repos: Vec<RepoRevisions>,
}

#[derive(Debug, Clone)]
pub struct SymbolQuery {
    pub pattern: String,
    pub case_sensitive: bool,
    pub include_paths: Vec<String>,
    pub limit: usize,
    pub scope: IndexScope,
}

#[derive(Debug, Clone)]
pub struct CommitQuery {
    pub pattern: String,
    pub is_regex: bool,
    pub case_sensitive: bool,
    /// Search the diff text instead of the commit message.
    pub diff: bool,
    pub limit: usize,
    pub repos: Vec<RepoRevisions>,
}

#[derive(Debug, Clone)]
pub struct StructuralQuery {
    pub pattern: String,
    pub include_paths: Vec<String>,
    pub languages: Vec<String>,
    pub file_match_limit: usize,
    pub repos: Vec<RepoRevisions>,
}

/// One backend call's worth of results.
#[derive(Debug, Clone, Default)]
pub struct BackendResponse {
    pub matches: Vec<SearchMatch>,
    pub stats: Stats,
}

/// Resolves `repo:` filters against the set of known repositories.
#[async_trait]
pub trait RepoResolver: Send + Sync {
    async fn resolve(&self, filters: &RepoFilters) -> Result<ResolvedRepos, SearchError>;

    /// Total number of known repositories, used for pagination batch sizing.
    async fn count(&self) -> Result<usize, SearchError>;
}

#[async_trait]
pub trait IndexedBackend: Send + Sync {
    async fn search(&self, query: &IndexQuery) -> Result<BackendResponse, SearchError>;

    /// Repositories present in the index, so the compiler can split a scoped
    /// search into indexed and unindexed halves.
    async fn indexed_repos(
        &self,
        candidates: &[RepoRevisions],
    ) -> Result<Vec<Repository>, SearchError>;
}

#[async_trait]
pub trait UnindexedBackend: Send + Sync {
    async fn search(&self, query: &TextQuery) -> Result<BackendResponse, SearchError>;
}

#[async_trait]
pub trait SymbolBackend: Send + Sync {
    async fn search(&self, query: &SymbolQuery) -> Result<BackendResponse, SearchError>;
}

#[async_trait]
pub trait CommitBackend: Send + Sync {
    async fn search(&self, query: &CommitQuery) -> Result<BackendResponse, SearchError>;
}

#[async_trait]
pub trait StructuralBackend: Send + Sync {
    async fn search(&self, query: &StructuralQuery) -> Result<BackendResponse, SearchError>;
}

/// The full set of collaborators the compiler wires jobs to.
#[derive(Clone)]
pub struct Backends {
    pub resolver: Arc<dyn RepoResolver>,
    pub indexed: Arc<dyn IndexedBackend>,
    pub unindexed: Arc<dyn UnindexedBackend>,
    pub symbols: Arc<dyn SymbolBackend>,
    pub commits: Arc<dyn CommitBackend>,
    pub structural: Arc<dyn StructuralBackend>,
}

impl std::fmt::Debug for Backends {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backends").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::Parameter;

    #[test]
    fn filters_split_rev_suffix() {
        let mut q = BasicQuery::default();
        q.parameters
            .push(Parameter::new(Field::Repo, "^github\\.com/foo$@v1.2"));
        let f = RepoFilters::from_clause(&q).unwrap();
        assert_eq!(f.include, vec!["^github\\.com/foo$"]);
        assert_eq!(f.revs, vec!["v1.2"]);
    }

    #[test]
    fn filters_reject_bad_regex() {
        let mut q = BasicQuery::default();
        q.parameters.push(Parameter::new(Field::Repo, "foo[("));
        match RepoFilters::from_clause(&q) {
            Err(SearchError::InvalidRegex { field, .. }) => assert_eq!(field, "repo"),
            other => panic!("expected InvalidRegex, got {other:?}"),
        }
    }

    #[test]
    fn negated_repo_goes_to_exclude() {
        let mut q = BasicQuery::default();
        let mut p = Parameter::new(Field::Repo, "vendor");
        p.negated = true;
        q.parameters.push(p);
        let f = RepoFilters::from_clause(&q).unwrap();
        assert!(f.include.is_empty());
        assert_eq!(f.exclude, vec!["vendor"]);
    }
}
