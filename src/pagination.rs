//! Cursor-based pagination over a repository-ordered search.
//!
//! A page walks the resolved repository list in batches, searching each
//! batch to completion and slicing the requested window out of the ordered
//! results. The cursor records how far the walk got: the index of the next
//! repository plus how many results were already returned from it, so a
//! page boundary inside one repository resumes mid-repository.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::backend::{RepoFilters, RepoResolver, RepoRevisions};
use crate::error::SearchError;
use crate::eval::PlanEvaluator;
use crate::query::{Field, Parameter, Plan};
use crate::results::{SearchMatch, Stats};

/// An opaque position in a paginated search. Treated by clients as a token;
/// the fields only mean anything against the same query and repository
/// ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchCursor {
    /// Index of the next repository to search.
    pub repository_offset: u32,
    /// Results already returned from that repository.
    pub result_offset: u32,
    /// The walk reached the end; later pages are empty.
    pub finished: bool,
}

impl SearchCursor {
    pub fn start() -> SearchCursor {
        SearchCursor {
            repository_offset: 0,
            result_offset: 0,
            finished: false,
        }
    }

    pub fn encode(&self) -> String {
        let bytes = bincode::serialize(self).expect("cursor serialization is infallible");
        URL_SAFE_NO_PAD.encode(bytes)
    }

    pub fn decode(token: &str) -> Result<SearchCursor, SearchError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| SearchError::InvalidQuery("malformed pagination cursor".into()))?;
        bincode::deserialize(&bytes)
            .map_err(|_| SearchError::InvalidQuery("malformed pagination cursor".into()))
    }
}

/// One batch's worth of results. Stats are populated even when the batch
/// failed, so a partial page still reports what was searched.
pub struct BatchOutcome {
    pub matches: Vec<SearchMatch>,
    pub stats: Stats,
    pub error: Option<SearchError>,
}

/// Runs the underlying search restricted to one repository batch.
#[async_trait]
pub trait BatchExecutor: Send + Sync {
    async fn search_batch(&self, repos: &[RepoRevisions]) -> BatchOutcome;
}

/// Caches the global repository count, which only feeds batch sizing and
/// tolerates staleness.
pub struct RepoCountCache {
    ttl: Duration,
    state: Mutex<Option<(Instant, usize)>>,
}

impl RepoCountCache {
    pub fn new(ttl: Duration) -> RepoCountCache {
        RepoCountCache {
            ttl,
            state: Mutex::new(None),
        }
    }

    pub async fn get(&self, resolver: &dyn RepoResolver) -> Result<usize, SearchError> {
        {
            let state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            if let Some((at, count)) = *state {
                if at.elapsed() < self.ttl {
                    return Ok(count);
                }
            }
        }
        let count = resolver.count().await?;
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        *state = Some((Instant::now(), count));
        Ok(count)
    }
}

/// One page of results plus the cursor for the next one.
#[derive(Debug, Clone)]
pub struct Page {
    pub matches: Vec<SearchMatch>,
    pub stats: Stats,
    pub cursor: SearchCursor,
}

pub struct PagedSearcher {
    resolver: Arc<dyn RepoResolver>,
    executor: Arc<dyn BatchExecutor>,
    repo_count: RepoCountCache,
}

/// Batches never shrink below this many repositories.
const MIN_BATCH: usize = 10;
/// Nor grow beyond this many.
const MAX_BATCH: usize = 1000;

/// An eighth of the universe per batch keeps small installs to a handful of
/// rounds without asking a large one for everything at once.
fn batch_size(total_repos: usize) -> usize {
    (total_repos / 8).clamp(MIN_BATCH, MAX_BATCH)
}

impl PagedSearcher {
    pub fn new(
        resolver: Arc<dyn RepoResolver>,
        executor: Arc<dyn BatchExecutor>,
        count_ttl: Duration,
    ) -> PagedSearcher {
        PagedSearcher {
            resolver,
            executor,
            repo_count: RepoCountCache::new(count_ttl),
        }
    }

    /// Fetch one page of up to `limit` results starting at `cursor`.
    pub async fn search_page(
        &self,
        filters: &RepoFilters,
        limit: usize,
        cursor: SearchCursor,
    ) -> Result<Page, SearchError> {
        if cursor.finished || limit == 0 {
            return Ok(Page {
                matches: Vec::new(),
                stats: Stats::default(),
                cursor,
            });
        }

        let mut repos = self.resolver.resolve(filters).await?.repos;
        repos.sort_by(|a, b| a.repo.cmp(&b.repo));
        let total = self.repo_count.get(self.resolver.as_ref()).await?;
        let batch = batch_size(total);

        // The repository list may have shrunk since the cursor was issued.
        let mut next_repo = (cursor.repository_offset as usize).min(repos.len());
        let skip = cursor.result_offset as usize;

        let mut collected: Vec<SearchMatch> = Vec::new();
        let mut stats = Stats::default();
        let mut degraded = false;
        while next_repo < repos.len() && collected.len() < skip + limit {
            let end = (next_repo + batch).min(repos.len());
            let outcome = self.executor.search_batch(&repos[next_repo..end]).await;
            stats.merge(&outcome.stats);
            collected.extend(outcome.matches);
            next_repo = end;
            match outcome.error {
                None => {}
                Some(e) if e.is_cancellation() || e.is_deadline() => {
                    // Return what we have; the cursor stays resumable.
                    debug!(error = %e, "batch degraded, closing the page early");
                    degraded = true;
                    break;
                }
                Some(e) => return Err(e),
            }
        }
        collected.sort();
        let exhausted = next_repo >= repos.len() && !degraded;

        let page_start = skip.min(collected.len());
        let page_end = (page_start + limit).min(collected.len());
        let page: Vec<SearchMatch> = collected[page_start..page_end].to_vec();

        let cursor = match collected.get(page_end) {
            Some(next_match) => {
                // The page boundary fell inside the walked range: point the
                // cursor at the first unreturned match.
                let repo = next_match.repo();
                let idx = repos
                    .iter()
                    .position(|rr| &rr.repo == repo)
                    .unwrap_or(repos.len());
                let within = collected[..page_end]
                    .iter()
                    .filter(|m| m.repo() == repo)
                    .count();
                SearchCursor {
                    repository_offset: idx as u32,
                    result_offset: within as u32,
                    finished: false,
                }
            }
            None => SearchCursor {
                repository_offset: next_repo as u32,
                result_offset: 0,
                finished: exhausted,
            },
        };

        Ok(Page {
            matches: page,
            stats,
            cursor,
        })
    }
}

/// Scopes a compiled plan to each repository batch by appending a `repo:`
/// filter, then evaluates it.
pub struct PlanBatchExecutor {
    evaluator: PlanEvaluator,
    plan: Plan,
}

impl PlanBatchExecutor {
    pub fn new(evaluator: PlanEvaluator, plan: Plan) -> PlanBatchExecutor {
        PlanBatchExecutor { evaluator, plan }
    }
}

#[async_trait]
impl BatchExecutor for PlanBatchExecutor {
    async fn search_batch(&self, repos: &[RepoRevisions]) -> BatchOutcome {
        let alternation = repos
            .iter()
            .map(|rr| regex::escape(&rr.repo.name))
            .collect::<Vec<_>>()
            .join("|");
        let scoped = format!("^({alternation})$");
        let mut clauses = self.plan.clauses().to_vec();
        for clause in &mut clauses {
            clause.parameters.push(Parameter::new(Field::Repo, scoped.clone()));
        }
        let plan = match Plan::new(clauses) {
            Ok(plan) => plan,
            Err(e) => {
                return BatchOutcome {
                    matches: Vec::new(),
                    stats: Stats::default(),
                    error: Some(e),
                }
            }
        };
        match self.evaluator.evaluate(&plan).await {
            Ok(results) => BatchOutcome {
                matches: results.matches,
                stats: results.stats,
                error: None,
            },
            Err(e) => BatchOutcome {
                matches: Vec::new(),
                stats: Stats::default(),
                error: Some(e),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::backend::ResolvedRepos;
    use crate::results::{FileMatch, Repository};

    struct FakeRepos {
        names: Vec<String>,
        count_calls: AtomicUsize,
    }

    impl FakeRepos {
        fn new(n: usize) -> FakeRepos {
            FakeRepos {
                names: (0..n).map(|i| format!("repo/{i:03}")).collect(),
                count_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl RepoResolver for FakeRepos {
        async fn resolve(&self, _filters: &RepoFilters) -> Result<ResolvedRepos, SearchError> {
            Ok(ResolvedRepos {
                repos: self
                    .names
                    .iter()
                    .enumerate()
                    .map(|(i, name)| RepoRevisions::head(Repository {
                        id: i as u32,
                        name: name.clone(),
                    }))
                    .collect(),
                ..Default::default()
            })
        }

        async fn count(&self) -> Result<usize, SearchError> {
            self.count_calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.names.len())
        }
    }

    /// Three file matches per repository, deterministic paths.
    struct ThreePerRepo;

    #[async_trait]
    impl BatchExecutor for ThreePerRepo {
        async fn search_batch(&self, repos: &[RepoRevisions]) -> BatchOutcome {
            let mut matches = Vec::new();
            let mut stats = Stats::default();
            for rr in repos {
                stats.searched.insert(rr.repo.clone());
                for f in 0..3 {
                    matches.push(SearchMatch::File(FileMatch {
                        repo: rr.repo.clone(),
                        path: format!("file{f}.rs"),
                        rev: None,
                        lines: Vec::new(),
                        limit_hit: false,
                    }));
                }
            }
            stats.result_count = matches.len();
            BatchOutcome {
                matches,
                stats,
                error: None,
            }
        }
    }

    #[test]
    fn cursor_round_trips() {
        let cursor = SearchCursor {
            repository_offset: 42,
            result_offset: 7,
            finished: false,
        };
        let token = cursor.encode();
        assert_eq!(SearchCursor::decode(&token).unwrap(), cursor);
    }

    #[test]
    fn bad_cursor_token_is_an_error() {
        assert!(SearchCursor::decode("not a cursor!").is_err());
        assert!(SearchCursor::decode("AAAA").is_err());
    }

    #[test]
    fn batch_sizing_is_clamped() {
        assert_eq!(batch_size(0), 10);
        assert_eq!(batch_size(79), 10);
        assert_eq!(batch_size(800), 100);
        assert_eq!(batch_size(1_000_000), 1000);
    }

    #[tokio::test]
    async fn pages_cover_everything_exactly_once() {
        let searcher = PagedSearcher::new(
            Arc::new(FakeRepos::new(20)),
            Arc::new(ThreePerRepo),
            Duration::from_secs(60),
        );
        let filters = RepoFilters::default();

        let mut all = Vec::new();
        let mut cursor = SearchCursor::start();
        let mut rounds = 0;
        loop {
            let page = searcher.search_page(&filters, 7, cursor).await.unwrap();
            all.extend(page.matches);
            cursor = page.cursor;
            if cursor.finished {
                break;
            }
            rounds += 1;
            assert!(rounds < 50, "pagination did not terminate");
        }

        // 20 repos x 3 files, no duplicates, globally ordered.
        assert_eq!(all.len(), 60);
        let mut sorted = all.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), 60);
        assert_eq!(all, sorted);
    }

    #[tokio::test]
    async fn page_boundary_resumes_mid_repository() {
        let searcher = PagedSearcher::new(
            Arc::new(FakeRepos::new(5)),
            Arc::new(ThreePerRepo),
            Duration::from_secs(60),
        );
        let filters = RepoFilters::default();

        // Two results: the boundary is inside repo/000.
        let page = searcher
            .search_page(&filters, 2, SearchCursor::start())
            .await
            .unwrap();
        assert_eq!(page.matches.len(), 2);
        assert_eq!(page.cursor.repository_offset, 0);
        assert_eq!(page.cursor.result_offset, 2);

        let page2 = searcher.search_page(&filters, 2, page.cursor).await.unwrap();
        assert_eq!(page2.matches.len(), 2);
        // file2.rs of repo/000 then file0.rs of repo/001.
        assert_eq!(page2.matches[0].repo().name, "repo/000");
        assert_eq!(page2.matches[1].repo().name, "repo/001");
    }

    #[tokio::test]
    async fn stale_cursor_beyond_the_repo_list_finishes() {
        let searcher = PagedSearcher::new(
            Arc::new(FakeRepos::new(3)),
            Arc::new(ThreePerRepo),
            Duration::from_secs(60),
        );
        let cursor = SearchCursor {
            repository_offset: 99,
            result_offset: 0,
            finished: false,
        };
        let page = searcher
            .search_page(&RepoFilters::default(), 5, cursor)
            .await
            .unwrap();
        assert!(page.matches.is_empty());
        assert!(page.cursor.finished);
    }

    #[tokio::test]
    async fn repo_count_is_cached() {
        let repos = Arc::new(FakeRepos::new(4));
        let searcher = PagedSearcher::new(
            repos.clone(),
            Arc::new(ThreePerRepo),
            Duration::from_secs(60),
        );
        let filters = RepoFilters::default();
        searcher
            .search_page(&filters, 3, SearchCursor::start())
            .await
            .unwrap();
        searcher
            .search_page(&filters, 3, SearchCursor::start())
            .await
            .unwrap();
        assert_eq!(repos.count_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn deadline_in_a_batch_degrades_but_keeps_results() {
        struct FirstBatchThenTimeout {
            calls: AtomicUsize,
        }

        #[async_trait]
        impl BatchExecutor for FirstBatchThenTimeout {
            async fn search_batch(&self, repos: &[RepoRevisions]) -> BatchOutcome {
                let call = self.calls.fetch_add(1, Ordering::SeqCst);
                let mut outcome = ThreePerRepo.search_batch(repos).await;
                if call > 0 {
                    outcome.matches.clear();
                    outcome.error = Some(SearchError::DeadlineExceeded);
                }
                outcome
            }
        }

        let searcher = PagedSearcher::new(
            Arc::new(FakeRepos::new(40)),
            Arc::new(FirstBatchThenTimeout {
                calls: AtomicUsize::new(0),
            }),
            Duration::from_secs(60),
        );
        // Batch size is 10, so satisfying 100 results needs several batches;
        // the second one times out.
        let page = searcher
            .search_page(&RepoFilters::default(), 100, SearchCursor::start())
            .await
            .unwrap();
        assert_eq!(page.matches.len(), 30);
        assert!(!page.cursor.finished);
        // Stats from the failed batch still arrive.
        assert_eq!(page.stats.searched.len(), 20);
    }
}
