//! Leaf jobs: each one prepares a single backend call and delivers its
//! response into the sink.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{Job, MatchSink, RunContext};
use crate::backend::{
    CommitBackend, CommitQuery, IndexQuery, IndexedBackend, RepoFilters, RepoResolver,
    StructuralBackend, StructuralQuery, SymbolBackend, SymbolQuery, TextQuery, UnindexedBackend,
};
use crate::error::SearchError;
use crate::results::{Alert, RepoMatch, SearchMatch, Stats};

/// Result cap a structural search retries with after hitting the default cap.
const STRUCTURAL_RETRY_LIMIT: usize = 1000;

pub struct IndexedSearchJob {
    backend: Arc<dyn IndexedBackend>,
    query: IndexQuery,
    /// Degrade to an empty (flagged) response instead of failing when the
    /// index is unreachable. Set unless the query demanded `index:only`.
    degrade_on_error: bool,
}

impl IndexedSearchJob {
    pub fn new(
        backend: Arc<dyn IndexedBackend>,
        query: IndexQuery,
        degrade_on_error: bool,
    ) -> Arc<dyn Job> {
        Arc::new(IndexedSearchJob {
            backend,
            query,
            degrade_on_error,
        })
    }
}

impl fmt::Debug for IndexedSearchJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexedSearchJob")
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Job for IndexedSearchJob {
    fn name(&self) -> &'static str {
        "IndexedSearch"
    }

    async fn run(
        &self,
        cx: &RunContext,
        sink: Arc<dyn MatchSink>,
    ) -> Result<Option<Alert>, SearchError> {
        cx.check()?;
        match self.backend.search(&self.query).await {
            Ok(response) => {
                cx.check()?;
                sink.push(response.matches, response.stats)?;
                Ok(None)
            }
            Err(e @ SearchError::Backend { .. }) if self.degrade_on_error => {
                warn!(error = %e, "index unavailable, degrading");
                let mut stats = Stats::default();
                stats.index_unavailable = true;
                sink.push(Vec::new(), stats)?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

pub struct UnindexedSearchJob {
    backend: Arc<dyn UnindexedBackend>,
    query: TextQuery,
}

impl UnindexedSearchJob {
    pub fn new(backend: Arc<dyn UnindexedBackend>, query: TextQuery) -> Arc<dyn Job> {
        Arc::new(UnindexedSearchJob { backend, query })
    }
}

impl fmt::Debug for UnindexedSearchJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UnindexedSearchJob")
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Job for UnindexedSearchJob {
    fn name(&self) -> &'static str {
        "UnindexedSearch"
    }

    async fn run(
        &self,
        cx: &RunContext,
        sink: Arc<dyn MatchSink>,
    ) -> Result<Option<Alert>, SearchError> {
        if self.query.repos.is_empty() {
            return Ok(None);
        }
        cx.check()?;
        let response = self.backend.search(&self.query).await?;
        cx.check()?;
        sink.push(response.matches, response.stats)?;
        Ok(None)
    }
}

pub struct SymbolSearchJob {
    backend: Arc<dyn SymbolBackend>,
    query: SymbolQuery,
}

impl SymbolSearchJob {
    pub fn new(backend: Arc<dyn SymbolBackend>, query: SymbolQuery) -> Arc<dyn Job> {
        Arc::new(SymbolSearchJob { backend, query })
    }
}

impl fmt::Debug for SymbolSearchJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SymbolSearchJob")
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Job for SymbolSearchJob {
    fn name(&self) -> &'static str {
        "SymbolSearch"
    }

    async fn run(
        &self,
        cx: &RunContext,
        sink: Arc<dyn MatchSink>,
    ) -> Result<Option<Alert>, SearchError> {
        cx.check()?;
        let response = self.backend.search(&self.query).await?;
        cx.check()?;
        sink.push(response.matches, response.stats)?;
        Ok(None)
    }
}

pub struct CommitSearchJob {
    backend: Arc<dyn CommitBackend>,
    query: CommitQuery,
}

impl CommitSearchJob {
    pub fn new(backend: Arc<dyn CommitBackend>, query: CommitQuery) -> Arc<dyn Job> {
        Arc::new(CommitSearchJob { backend, query })
    }
}

impl fmt::Debug for CommitSearchJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommitSearchJob")
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Job for CommitSearchJob {
    fn name(&self) -> &'static str {
        "CommitSearch"
    }

    async fn run(
        &self,
        cx: &RunContext,
        sink: Arc<dyn MatchSink>,
    ) -> Result<Option<Alert>, SearchError> {
        if self.query.repos.is_empty() {
            return Ok(None);
        }
        cx.check()?;
        let response = self.backend.search(&self.query).await?;
        cx.check()?;
        sink.push(response.matches, response.stats)?;
        Ok(None)
    }
}

/// Emits one repository match per repo the filters resolve to.
pub struct RepoNameSearchJob {
    resolver: Arc<dyn RepoResolver>,
    filters: RepoFilters,
}

impl RepoNameSearchJob {
    pub fn new(resolver: Arc<dyn RepoResolver>, filters: RepoFilters) -> Arc<dyn Job> {
        Arc::new(RepoNameSearchJob { resolver, filters })
    }
}

impl fmt::Debug for RepoNameSearchJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RepoNameSearchJob")
            .field("filters", &self.filters)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Job for RepoNameSearchJob {
    fn name(&self) -> &'static str {
        "RepoSearch"
    }

    async fn run(
        &self,
        cx: &RunContext,
        sink: Arc<dyn MatchSink>,
    ) -> Result<Option<Alert>, SearchError> {
        cx.check()?;
        let resolved = self.resolver.resolve(&self.filters).await?;
        cx.check()?;

        let alert = if resolved.missing_revs.is_empty() {
            None
        } else {
            Some(Alert::for_missing_repo_revs(resolved.missing_revs.clone()))
        };

        let mut stats = Stats::default();
        stats.excluded_forks = resolved.excluded_forks;
        stats.excluded_archived = resolved.excluded_archived;
        let matches: Vec<SearchMatch> = resolved
            .repos
            .into_iter()
            .map(|rr| {
                SearchMatch::Repo(RepoMatch {
                    rev: rr.revs.first().cloned(),
                    repo: rr.repo,
                })
            })
            .collect();
        stats.result_count = matches.len();
        sink.push(matches, stats)?;
        Ok(alert)
    }
}

pub struct StructuralSearchJob {
    backend: Arc<dyn StructuralBackend>,
    query: StructuralQuery,
}

impl StructuralSearchJob {
    pub fn new(backend: Arc<dyn StructuralBackend>, query: StructuralQuery) -> Arc<dyn Job> {
        Arc::new(StructuralSearchJob { backend, query })
    }
}

impl fmt::Debug for StructuralSearchJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructuralSearchJob")
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Job for StructuralSearchJob {
    fn name(&self) -> &'static str {
        "StructuralSearch"
    }

    async fn run(
        &self,
        cx: &RunContext,
        sink: Arc<dyn MatchSink>,
    ) -> Result<Option<Alert>, SearchError> {
        if self.query.repos.is_empty() {
            return Ok(None);
        }
        cx.check()?;
        let mut response = self.backend.search(&self.query).await?;
        // Structural matchers confirm candidates file by file, so the first
        // pass runs with a low cap. Hitting it means the candidate set was
        // truncated; retry once with a cap high enough to be exhaustive.
        if response.stats.limit_hit && self.query.file_match_limit < STRUCTURAL_RETRY_LIMIT {
            cx.check()?;
            debug!("structural search hit its cap, retrying with a higher one");
            let mut widened = self.query.clone();
            widened.file_match_limit = STRUCTURAL_RETRY_LIMIT;
            response = self.backend.search(&widened).await?;
        }
        cx.check()?;
        sink.push(response.matches, response.stats)?;
        Ok(None)
    }
}

/// Computes how many repositories the search silently excluded (forks and
/// archives) without searching anything. Runs as optional work.
pub struct ComputeExcludedJob {
    resolver: Arc<dyn RepoResolver>,
    filters: RepoFilters,
}

impl ComputeExcludedJob {
    pub fn new(resolver: Arc<dyn RepoResolver>, filters: RepoFilters) -> Arc<dyn Job> {
        Arc::new(ComputeExcludedJob { resolver, filters })
    }
}

impl fmt::Debug for ComputeExcludedJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComputeExcludedJob")
            .field("filters", &self.filters)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Job for ComputeExcludedJob {
    fn name(&self) -> &'static str {
        "ComputeExcluded"
    }

    async fn run(
        &self,
        cx: &RunContext,
        sink: Arc<dyn MatchSink>,
    ) -> Result<Option<Alert>, SearchError> {
        cx.check()?;
        let resolved = self.resolver.resolve(&self.filters).await?;
        cx.check()?;
        let mut stats = Stats::default();
        stats.excluded_forks = resolved.excluded_forks;
        stats.excluded_archived = resolved.excluded_archived;
        sink.push(Vec::new(), stats)?;
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryBackend, MemoryRepo};
    use crate::backend::IndexScope;
    use crate::jobs::CollectSink;

    fn backends() -> crate::backend::Backends {
        MemoryBackend::new(vec![
            MemoryRepo::new(1, "acme/api").file("main.rs", "fn main() {}\n"),
            MemoryRepo::new(2, "acme/fork").fork(),
        ])
        .into_backends()
    }

    #[tokio::test]
    async fn repo_job_emits_repo_matches() {
        let b = backends();
        let job = RepoNameSearchJob::new(b.resolver, RepoFilters::default());
        let sink = CollectSink::new();
        job.run(&RunContext::default(), sink.clone()).await.unwrap();
        let (matches, stats) = sink.take();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].repo().name, "acme/api");
        assert_eq!(stats.excluded_forks, 1);
    }

    #[tokio::test]
    async fn indexed_job_pushes_backend_results() {
        let b = backends();
        let job = IndexedSearchJob::new(
            b.indexed,
            IndexQuery {
                pattern: "main".into(),
                is_regex: false,
                case_sensitive: false,
                literals: vec!["main".into()],
                include_paths: Vec::new(),
                exclude_paths: Vec::new(),
                languages: Vec::new(),
                file_match_limit: 10,
                path_only: false,
                scope: IndexScope::Universe,
            },
            true,
        );
        let sink = CollectSink::new();
        job.run(&RunContext::default(), sink.clone()).await.unwrap();
        let (matches, stats) = sink.take();
        assert_eq!(matches.len(), 1);
        assert_eq!(stats.searched.len(), 1);
    }

    #[tokio::test]
    async fn canceled_context_stops_leaves() {
        let b = backends();
        let job = RepoNameSearchJob::new(b.resolver, RepoFilters::default());
        let cx = RunContext::default();
        cx.cancel();
        let sink = CollectSink::new();
        let err = job.run(&cx, sink).await.unwrap_err();
        assert!(err.is_cancellation());
    }

    #[tokio::test]
    async fn excluded_job_reports_counts_only() {
        let b = backends();
        let job = ComputeExcludedJob::new(b.resolver, RepoFilters::default());
        let sink = CollectSink::new();
        job.run(&RunContext::default(), sink.clone()).await.unwrap();
        let (matches, stats) = sink.take();
        assert!(matches.is_empty());
        assert_eq!(stats.excluded_forks, 1);
    }
}
