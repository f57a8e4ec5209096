//! Interior nodes of the job tree.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use rustc_hash::FxHashMap;
use tokio::task::JoinSet;
use tracing::debug;

use super::{CollectSink, Job, MatchSink, RunContext};
use crate::error::SearchError;
use crate::results::{Alert, MatchKey, SearchMatch, Stats};

/// Produces nothing. Stands in for branches that compile to no work.
#[derive(Debug)]
pub struct NoopJob;

#[async_trait]
impl Job for NoopJob {
    fn name(&self) -> &'static str {
        "Noop"
    }

    async fn run(
        &self,
        _cx: &RunContext,
        _sink: Arc<dyn MatchSink>,
    ) -> Result<Option<Alert>, SearchError> {
        Ok(None)
    }
}

/// Runs all children concurrently and unions their output. The highest
/// priority alert wins; the first non-cancellation error aborts.
#[derive(Debug)]
pub struct OrJob {
    children: Vec<Arc<dyn Job>>,
}

impl OrJob {
    /// Collapse trivial cases instead of building a one-child union.
    pub fn new(mut children: Vec<Arc<dyn Job>>) -> Arc<dyn Job> {
        match children.len() {
            0 => Arc::new(NoopJob),
            1 => children.pop().expect("len checked"),
            _ => Arc::new(OrJob { children }),
        }
    }
}

#[async_trait]
impl Job for OrJob {
    fn name(&self) -> &'static str {
        "Or"
    }

    async fn run(
        &self,
        cx: &RunContext,
        sink: Arc<dyn MatchSink>,
    ) -> Result<Option<Alert>, SearchError> {
        let mut tasks = JoinSet::new();
        for child in &self.children {
            let child = Arc::clone(child);
            let cx = cx.child();
            let sink = Arc::clone(&sink);
            tasks.spawn(async move { child.run(&cx, sink).await });
        }

        let mut alert = None;
        let mut first_err: Option<SearchError> = None;
        while let Some(joined) = tasks.join_next().await {
            match joined.map_err(|e| SearchError::backend("task", e))? {
                Ok(a) => alert = Alert::max(alert, a),
                Err(e) if e.is_cancellation() => {}
                Err(e) => {
                    if first_err.is_none() {
                        first_err = Some(e);
                    }
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(alert),
        }
    }

    fn children(&self) -> Vec<Arc<dyn Job>> {
        self.children.clone()
    }
}

/// Runs all children to completion and emits only the matches every child
/// produced, merged by identity key. File matches in the intersection carry
/// the union of their line matches.
#[derive(Debug)]
pub struct AndJob {
    children: Vec<Arc<dyn Job>>,
}

impl AndJob {
    pub fn new(mut children: Vec<Arc<dyn Job>>) -> Arc<dyn Job> {
        match children.len() {
            0 => Arc::new(NoopJob),
            1 => children.pop().expect("len checked"),
            _ => Arc::new(AndJob { children }),
        }
    }
}

#[async_trait]
impl Job for AndJob {
    fn name(&self) -> &'static str {
        "And"
    }

    async fn run(
        &self,
        cx: &RunContext,
        sink: Arc<dyn MatchSink>,
    ) -> Result<Option<Alert>, SearchError> {
        let mut tasks = JoinSet::new();
        for (i, child) in self.children.iter().enumerate() {
            let child = Arc::clone(child);
            let cx = cx.child();
            let capture = CollectSink::new();
            let capture2 = Arc::clone(&capture);
            tasks.spawn(async move {
                let outcome = child.run(&cx, capture2).await;
                (i, outcome, capture)
            });
        }

        let n = self.children.len();
        let mut captured: Vec<Option<Vec<SearchMatch>>> = (0..n).map(|_| None).collect();
        let mut stats = Stats::default();
        let mut alert = None;
        while let Some(joined) = tasks.join_next().await {
            let (i, outcome, capture) = joined.map_err(|e| SearchError::backend("task", e))?;
            match outcome {
                Ok(a) => alert = Alert::max(alert, a),
                Err(e) if e.is_cancellation() => {}
                Err(e) => return Err(e),
            }
            let (matches, child_stats) = capture.take();
            stats.merge(&child_stats);
            captured[i] = Some(matches);
        }

        let mut sets = captured.into_iter().flatten();
        let Some(first) = sets.next() else {
            return Ok(alert);
        };
        let mut intersection: FxHashMap<MatchKey, SearchMatch> =
            first.into_iter().map(|m| (m.key(), m)).collect();
        for set in sets {
            let mut next = FxHashMap::default();
            for m in set {
                let key = m.key();
                if let Some(mut kept) = intersection.remove(&key) {
                    merge_lines(&mut kept, m);
                    next.insert(key, kept);
                }
            }
            intersection = next;
            if intersection.is_empty() {
                break;
            }
        }

        let matches: Vec<SearchMatch> = intersection.into_values().collect();
        debug!(kept = matches.len(), "intersected child result sets");
        sink.push(matches, stats)?;
        Ok(alert)
    }

    fn children(&self) -> Vec<Arc<dyn Job>> {
        self.children.clone()
    }
}

fn merge_lines(kept: &mut SearchMatch, incoming: SearchMatch) {
    if let (SearchMatch::File(a), SearchMatch::File(b)) = (kept, incoming) {
        for line in b.lines {
            if !a.lines.contains(&line) {
                a.lines.push(line);
            }
        }
        a.lines.sort_by_key(|l| l.line);
        a.limit_hit |= b.limit_hit;
    }
}

/// Imposes a wall-clock deadline on its child. The child observes the
/// deadline through its context; on expiry the child is canceled and the
/// deadline error propagates for conversion to an alert further up.
#[derive(Debug)]
pub struct TimeoutJob {
    timeout: Duration,
    child: Arc<dyn Job>,
}

impl TimeoutJob {
    pub fn new(timeout: Duration, child: Arc<dyn Job>) -> Arc<dyn Job> {
        Arc::new(TimeoutJob { timeout, child })
    }
}

#[async_trait]
impl Job for TimeoutJob {
    fn name(&self) -> &'static str {
        "Timeout"
    }

    async fn run(
        &self,
        cx: &RunContext,
        sink: Arc<dyn MatchSink>,
    ) -> Result<Option<Alert>, SearchError> {
        let child_cx = cx.child();
        match tokio::time::timeout(self.timeout, self.child.run(&child_cx, sink)).await {
            Ok(outcome) => outcome,
            Err(_) => {
                child_cx.cancel();
                Err(SearchError::DeadlineExceeded)
            }
        }
    }

    fn children(&self) -> Vec<Arc<dyn Job>> {
        vec![Arc::clone(&self.child)]
    }
}

/// Caps how many results the child may deliver. Reaching the cap stops the
/// child early and is reported as success with `limit_hit` set.
#[derive(Debug)]
pub struct LimitJob {
    limit: usize,
    child: Arc<dyn Job>,
}

impl LimitJob {
    pub fn new(limit: usize, child: Arc<dyn Job>) -> Arc<dyn Job> {
        Arc::new(LimitJob { limit, child })
    }
}

struct LimitSink {
    inner: Arc<dyn MatchSink>,
    remaining: Mutex<usize>,
}

impl MatchSink for LimitSink {
    fn push(&self, mut matches: Vec<SearchMatch>, mut stats: Stats) -> Result<(), SearchError> {
        let mut remaining = self.remaining.lock().unwrap_or_else(|e| e.into_inner());
        if *remaining == 0 {
            return Err(SearchError::BudgetExhausted);
        }
        let mut total = 0;
        let mut keep = matches.len();
        for (i, m) in matches.iter().enumerate() {
            total += m.result_count();
            if total >= *remaining {
                keep = i + 1;
                break;
            }
        }
        if total >= *remaining {
            matches.truncate(keep);
            stats.limit_hit = true;
            *remaining = 0;
        } else {
            *remaining -= total;
        }
        drop(remaining);
        self.inner.push(matches, stats)
    }
}

#[async_trait]
impl Job for LimitJob {
    fn name(&self) -> &'static str {
        "Limit"
    }

    async fn run(
        &self,
        cx: &RunContext,
        sink: Arc<dyn MatchSink>,
    ) -> Result<Option<Alert>, SearchError> {
        let limited = Arc::new(LimitSink {
            inner: sink,
            remaining: Mutex::new(self.limit),
        });
        let child_cx = cx.child();
        match self.child.run(&child_cx, limited).await {
            Err(SearchError::BudgetExhausted) => Ok(None),
            outcome => outcome,
        }
    }

    fn children(&self) -> Vec<Arc<dyn Job>> {
        vec![Arc::clone(&self.child)]
    }
}

/// Runs a required job and an optional job concurrently. When the required
/// job finishes, the optional one gets a short grace period and is then
/// canceled; its cancellation never fails the search.
#[derive(Debug)]
pub struct PriorityJob {
    required: Arc<dyn Job>,
    optional: Arc<dyn Job>,
    grace: Duration,
}

impl PriorityJob {
    pub fn new(required: Arc<dyn Job>, optional: Arc<dyn Job>, grace: Duration) -> Arc<dyn Job> {
        Arc::new(PriorityJob {
            required,
            optional,
            grace,
        })
    }
}

#[async_trait]
impl Job for PriorityJob {
    fn name(&self) -> &'static str {
        "Priority"
    }

    async fn run(
        &self,
        cx: &RunContext,
        sink: Arc<dyn MatchSink>,
    ) -> Result<Option<Alert>, SearchError> {
        // Separate cancel flag: the optional side can be stopped without
        // touching the required side.
        let opt_cx = RunContext::new(cx.deadline());
        let optional = Arc::clone(&self.optional);
        let opt_sink = Arc::clone(&sink);
        let opt_cx2 = opt_cx.child();
        let mut handle = tokio::spawn(async move { optional.run(&opt_cx2, opt_sink).await });

        let required = self.required.run(cx, sink).await;

        let optional = match tokio::time::timeout(self.grace, &mut handle).await {
            Ok(joined) => joined,
            Err(_) => {
                debug!("grace period over, canceling optional work");
                opt_cx.cancel();
                handle.await
            }
        };

        let required_alert = required?;
        match optional.map_err(|e| SearchError::backend("task", e))? {
            Ok(a) => Ok(Alert::max(required_alert, a)),
            Err(e) if e.is_cancellation() => Ok(required_alert),
            Err(e) => Err(e),
        }
    }

    fn children(&self) -> Vec<Arc<dyn Job>> {
        vec![Arc::clone(&self.required), Arc::clone(&self.optional)]
    }
}

/// Decides whether a match may be shown. Used for sub-repository permission
/// enforcement.
pub trait MatchFilter: Send + Sync + std::fmt::Debug {
    fn allow(&self, m: &SearchMatch) -> bool;
}

/// Drops child matches the filter rejects before they reach the sink.
#[derive(Debug)]
pub struct FilterJob {
    child: Arc<dyn Job>,
    filter: Arc<dyn MatchFilter>,
}

impl FilterJob {
    pub fn new(child: Arc<dyn Job>, filter: Arc<dyn MatchFilter>) -> Arc<dyn Job> {
        Arc::new(FilterJob { child, filter })
    }
}

struct FilterSink {
    inner: Arc<dyn MatchSink>,
    filter: Arc<dyn MatchFilter>,
}

impl MatchSink for FilterSink {
    fn push(&self, matches: Vec<SearchMatch>, stats: Stats) -> Result<(), SearchError> {
        let kept: Vec<SearchMatch> =
            matches.into_iter().filter(|m| self.filter.allow(m)).collect();
        self.inner.push(kept, stats)
    }
}

#[async_trait]
impl Job for FilterJob {
    fn name(&self) -> &'static str {
        "Filter"
    }

    async fn run(
        &self,
        cx: &RunContext,
        sink: Arc<dyn MatchSink>,
    ) -> Result<Option<Alert>, SearchError> {
        let filtered = Arc::new(FilterSink {
            inner: sink,
            filter: Arc::clone(&self.filter),
        });
        self.child.run(cx, filtered).await
    }

    fn children(&self) -> Vec<Arc<dyn Job>> {
        vec![Arc::clone(&self.child)]
    }
}
