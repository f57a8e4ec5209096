//! The job tree: a compiled query is a tree of [`Job`] values. Leaves call
//! one backend each; interior nodes combine children (union, intersection,
//! timeout, limit, priority ordering, permission filtering).
//!
//! Jobs push matches into a [`MatchSink`] as they arrive. A sink returning
//! `BudgetExhausted` tells the producer to stop early; that is cooperative
//! cancellation, not failure.

pub mod combinators;
pub mod leaf;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use async_trait::async_trait;

use crate::error::SearchError;
use crate::results::{Alert, SearchMatch, Stats};

pub use combinators::{AndJob, FilterJob, LimitJob, NoopJob, OrJob, PriorityJob, TimeoutJob};
pub use leaf::{
    CommitSearchJob, ComputeExcludedJob, IndexedSearchJob, RepoNameSearchJob, StructuralSearchJob,
    SymbolSearchJob, UnindexedSearchJob,
};

/// Shared run state: a cooperative cancellation flag and an optional
/// wall-clock deadline. Cloning is cheap; all clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct RunContext {
    cancel: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl RunContext {
    pub fn new(deadline: Option<Instant>) -> RunContext {
        RunContext {
            cancel: Arc::new(AtomicBool::new(false)),
            deadline,
        }
    }

    /// A child context sharing this one's cancel flag.
    pub fn child(&self) -> RunContext {
        self.clone()
    }

    pub fn cancel(&self) {
        self.cancel.store(true, Ordering::Relaxed);
    }

    pub fn is_canceled(&self) -> bool {
        self.cancel.load(Ordering::Relaxed)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Bail out if the run was canceled or the deadline passed. Leaves call
    /// this before and after each backend round trip.
    pub fn check(&self) -> Result<(), SearchError> {
        if self.is_canceled() {
            return Err(SearchError::Canceled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(SearchError::DeadlineExceeded);
            }
        }
        Ok(())
    }
}

/// Where jobs deliver their matches. Implementations must be safe to share
/// across concurrently running jobs.
pub trait MatchSink: Send + Sync {
    /// Deliver a batch of matches plus the stats describing how they were
    /// produced. `Err(BudgetExhausted)` asks the producer to stop.
    fn push(&self, matches: Vec<SearchMatch>, stats: Stats) -> Result<(), SearchError>;
}

/// A compiled search operation.
#[async_trait]
pub trait Job: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Run to completion, delivering matches into `sink`. The returned alert
    /// is advisory; an error aborts the enclosing evaluation unless it is of
    /// the cancellation class.
    async fn run(
        &self,
        cx: &RunContext,
        sink: Arc<dyn MatchSink>,
    ) -> Result<Option<Alert>, SearchError>;

    /// Direct children, for tree rendering.
    fn children(&self) -> Vec<Arc<dyn Job>> {
        Vec::new()
    }
}

/// A sink that captures everything pushed into it. Used where a combinator
/// needs a child's complete output before it can proceed.
#[derive(Default)]
pub struct CollectSink {
    inner: Mutex<(Vec<SearchMatch>, Stats)>,
}

impl CollectSink {
    pub fn new() -> Arc<CollectSink> {
        Arc::new(CollectSink::default())
    }

    pub fn take(&self) -> (Vec<SearchMatch>, Stats) {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut *guard)
    }
}

impl MatchSink for CollectSink {
    fn push(&self, matches: Vec<SearchMatch>, stats: Stats) -> Result<(), SearchError> {
        let mut guard = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        guard.0.extend(matches);
        guard.1.merge(&stats);
        Ok(())
    }
}

/// Render a job tree as an indented outline.
pub fn render_tree(job: &Arc<dyn Job>) -> String {
    let mut out = String::new();
    render_into(job, 0, &mut out);
    out
}

fn render_into(job: &Arc<dyn Job>, depth: usize, out: &mut String) {
    for _ in 0..depth {
        out.push_str("  ");
    }
    out.push_str(job.name());
    out.push('\n');
    for child in job.children() {
        render_into(&child, depth + 1, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn cancel_flag_is_shared_with_children() {
        let cx = RunContext::new(None);
        let child = cx.child();
        assert!(cx.check().is_ok());
        child.cancel();
        assert!(cx.is_canceled());
        assert!(matches!(cx.check(), Err(SearchError::Canceled)));
    }

    #[test]
    fn expired_deadline_fails_check() {
        let cx = RunContext::new(Some(Instant::now() - Duration::from_secs(1)));
        assert!(matches!(cx.check(), Err(SearchError::DeadlineExceeded)));
    }

    #[test]
    fn collect_sink_accumulates() {
        let sink = CollectSink::new();
        let mut stats = Stats::default();
        stats.result_count = 2;
        sink.push(Vec::new(), stats.clone()).unwrap();
        sink.push(Vec::new(), stats).unwrap();
        let (matches, stats) = sink.take();
        assert!(matches.is_empty());
        assert_eq!(stats.result_count, 4);
    }
}
