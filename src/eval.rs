//! Plan evaluation: clause fan-out, predicate expansion, result budgeting
//! and final assembly.
//!
//! A plan's clauses run concurrently under a semaphore. All of them share
//! one aggregator that deduplicates matches, merges stats and enforces the
//! result budget; the push that exhausts the budget flips a shared cancel
//! flag so in-flight work winds down instead of being aborted mid-write.
//!
//! Stats merge before budget enforcement, so counters still reflect work
//! whose matches were discarded. Consumers see counts that can exceed the
//! returned match list; the `N+` presentation accounts for that.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::{debug, instrument, warn};

use crate::compile::Compiler;
use crate::error::SearchError;
use crate::jobs::{MatchSink, RunContext};
use crate::query::predicate::partition;
use crate::query::{BasicQuery, Plan, SelectKind};
use crate::results::{Alert, Deduper, SearchMatch, Stats};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EvalConfig {
    /// Clauses evaluated concurrently.
    pub concurrency: usize,
    /// Result budget when the query has no `count:`.
    pub default_max_results: usize,
    /// Deadline when the query has no `timeout:`.
    #[serde(with = "humantime_serde_secs")]
    pub default_timeout: Duration,
    /// Upper bound on any deadline. Queries with `count:` but no `timeout:`
    /// get this much.
    #[serde(with = "humantime_serde_secs")]
    pub max_timeout: Duration,
    /// How deep predicate sub-searches may nest.
    pub max_predicate_depth: usize,
}

impl Default for EvalConfig {
    fn default() -> Self {
        EvalConfig {
            concurrency: 16,
            default_max_results: 30,
            default_timeout: Duration::from_secs(20),
            max_timeout: Duration::from_secs(60),
            max_predicate_depth: 3,
        }
    }
}

mod humantime_serde_secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_secs().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// The assembled outcome of one evaluation.
#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    pub matches: Vec<SearchMatch>,
    pub stats: Stats,
    pub alert: Option<Alert>,
}

impl SearchResults {
    /// `"12"` when the search was exhaustive, `"12+"` when any repository
    /// was skipped, truncated or only partially searched.
    pub fn approximate_result_count(&self) -> String {
        let n: usize = self.matches.iter().map(|m| m.result_count()).sum();
        if self.stats.is_incomplete() {
            format!("{n}+")
        } else {
            n.to_string()
        }
    }
}

#[derive(Clone)]
pub struct PlanEvaluator {
    compiler: Arc<Compiler>,
    config: EvalConfig,
}

type EvalFuture<'a> =
    Pin<Box<dyn Future<Output = Result<SearchResults, SearchError>> + Send + 'a>>;

impl PlanEvaluator {
    pub fn new(compiler: Compiler, config: EvalConfig) -> PlanEvaluator {
        PlanEvaluator {
            compiler: Arc::new(compiler),
            config,
        }
    }

    /// Evaluate a plan and return the deduplicated, fully ordered results.
    #[instrument(skip_all, fields(clauses = plan.len()))]
    pub async fn evaluate(&self, plan: &Plan) -> Result<SearchResults, SearchError> {
        self.eval_inner(plan.clone(), None, 0).await
    }

    /// Evaluate a plan, forwarding matches to `stream` as they arrive. The
    /// stream sees raw (non-deduplicated) matches; the returned result set
    /// carries the final stats and alert but no match list.
    #[instrument(skip_all, fields(clauses = plan.len()))]
    pub async fn evaluate_streaming(
        &self,
        plan: &Plan,
        stream: Arc<dyn MatchSink>,
    ) -> Result<SearchResults, SearchError> {
        self.eval_inner(plan.clone(), Some(stream), 0).await
    }

    fn eval_inner(
        &self,
        plan: Plan,
        stream: Option<Arc<dyn MatchSink>>,
        depth: usize,
    ) -> EvalFuture<'_> {
        Box::pin(async move {
            let want_count = self.want_count(&plan)?;
            let timeout = self.effective_timeout(&plan)?;
            let started = Instant::now();
            let cx = RunContext::new(Some(started + timeout));
            let streaming = stream.is_some();
            let aggregator = Arc::new(Aggregator::new(want_count, stream, cx.clone()));

            let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
            let mut tasks = JoinSet::new();
            for clause in plan.clauses().iter().cloned() {
                let this = self.clone();
                let semaphore = Arc::clone(&semaphore);
                let sink: Arc<dyn MatchSink> = Arc::clone(&aggregator) as _;
                let cx = cx.child();
                let want = want_count;
                tasks.spawn(async move {
                    let _permit = semaphore
                        .acquire_owned()
                        .await
                        .map_err(|e| SearchError::backend("semaphore", e))?;
                    this.eval_clause(clause, &cx, sink, want, streaming, depth).await
                });
            }

            let mut alert = None;
            let mut first_err: Option<SearchError> = None;
            let mut deadline_hit = false;
            let join_all = async {
                while let Some(joined) = tasks.join_next().await {
                    match joined.map_err(|e| SearchError::backend("task", e))? {
                        Ok(a) => alert = Alert::max(alert.take(), a),
                        Err(e) if e.is_cancellation() => {}
                        Err(e) if e.is_deadline() => deadline_hit = true,
                        Err(e) => {
                            if first_err.is_none() {
                                cx.cancel();
                                first_err = Some(e);
                            }
                        }
                    }
                }
                Ok::<(), SearchError>(())
            };
            match tokio::time::timeout(timeout, join_all).await {
                Ok(outcome) => outcome?,
                Err(_) => {
                    debug!("deadline elapsed, winding down clause tasks");
                    cx.cancel();
                    tasks.shutdown().await;
                    deadline_hit = true;
                }
            }
            if let Some(e) = first_err {
                return Err(e);
            }

            let (mut matches, stats) = Arc::try_unwrap(aggregator)
                .map(Aggregator::into_parts)
                .unwrap_or_else(|agg| agg.snapshot());
            matches.sort();

            if deadline_hit && stats.timed_out.is_empty() {
                alert = Alert::max(alert, Some(Alert::for_timeout(started.elapsed())));
            }

            Ok(SearchResults {
                matches,
                stats,
                alert,
            })
        })
    }

    /// Evaluate one clause: expand its predicates, apply `select:`, compile
    /// and run. Returns the clause's alert, if any.
    async fn eval_clause(
        &self,
        clause: BasicQuery,
        cx: &RunContext,
        sink: Arc<dyn MatchSink>,
        want_count: usize,
        streaming: bool,
        depth: usize,
    ) -> Result<Option<Alert>, SearchError> {
        let clause = match self.expand_predicates(clause, depth).await {
            Ok(clause) => clause,
            // A predicate that matches nothing silences its whole clause.
            Err(SearchError::NoResults) => return Ok(None),
            Err(e) => return Err(e),
        };
        cx.check()?;

        let sink = match clause.select() {
            Some(kind) => Arc::new(SelectSink { inner: sink, kind }) as Arc<dyn MatchSink>,
            None => sink,
        };

        let job = self.compiler.compile(&clause, want_count, streaming).await?;
        job.run(cx, sink).await
    }

    /// Replace every predicate parameter with the literal filters its
    /// sub-search resolves to.
    async fn expand_predicates(
        &self,
        clause: BasicQuery,
        depth: usize,
    ) -> Result<BasicQuery, SearchError> {
        let (predicates, any) = partition(&clause);
        if !any {
            return Ok(clause);
        }
        if depth >= self.config.max_predicate_depth {
            return Err(SearchError::InvalidQuery(format!(
                "predicates nested more than {} levels deep",
                self.config.max_predicate_depth
            )));
        }

        let mut rewritten: Vec<Vec<crate::query::Parameter>> = Vec::new();
        for (_, predicate) in &predicates {
            let sub_plan = predicate.plan(&clause);
            debug!(?predicate, "expanding predicate via sub-search");
            let sub = self.eval_inner(sub_plan, None, depth + 1).await?;
            rewritten.push(predicate.rewrite(&sub.matches)?);
        }

        let mut expanded = BasicQuery {
            parameters: Vec::new(),
            pattern: clause.pattern.clone(),
        };
        let predicate_indices: Vec<usize> = predicates.iter().map(|(i, _)| *i).collect();
        for (i, p) in clause.parameters.into_iter().enumerate() {
            if !predicate_indices.contains(&i) {
                expanded.parameters.push(p);
            }
        }
        for params in rewritten {
            expanded.parameters.extend(params);
        }
        Ok(expanded)
    }

    /// The shared result budget for one evaluation.
    fn want_count(&self, plan: &Plan) -> Result<usize, SearchError> {
        let mut want = None;
        for clause in plan.clauses() {
            if let Some(n) = clause.count()? {
                want = Some(want.map_or(n, |w: usize| w.max(n)));
            }
        }
        Ok(want.unwrap_or(self.config.default_max_results))
    }

    /// The evaluation deadline. An explicit `timeout:` is clamped to the
    /// maximum; `count:` without `timeout:` gets the maximum, since asking
    /// for more results implies waiting for them.
    fn effective_timeout(&self, plan: &Plan) -> Result<Duration, SearchError> {
        let mut explicit: Option<Duration> = None;
        let mut has_count = false;
        for clause in plan.clauses() {
            if let Some(t) = clause.timeout()? {
                explicit = Some(explicit.map_or(t, |e: Duration| e.max(t)));
            }
            if clause.count()?.is_some() {
                has_count = true;
            }
        }
        Ok(match explicit {
            Some(t) => t.min(self.config.max_timeout),
            None if has_count => self.config.max_timeout,
            None => self.config.default_timeout,
        })
    }
}

/// Applies a `select:` projection before matches reach the aggregator.
struct SelectSink {
    inner: Arc<dyn MatchSink>,
    kind: SelectKind,
}

impl MatchSink for SelectSink {
    fn push(&self, matches: Vec<SearchMatch>, stats: Stats) -> Result<(), SearchError> {
        let projected: Vec<SearchMatch> =
            matches.into_iter().filter_map(|m| m.select(self.kind)).collect();
        self.inner.push(projected, stats)
    }
}

/// A streaming sink backed by an unbounded channel. Dropping the receiving
/// stream cancels producers on their next push.
pub fn streaming_channel() -> (
    Arc<dyn MatchSink>,
    UnboundedReceiverStream<(Vec<SearchMatch>, Stats)>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Arc::new(ChannelSink { tx }), UnboundedReceiverStream::new(rx))
}

struct ChannelSink {
    tx: mpsc::UnboundedSender<(Vec<SearchMatch>, Stats)>,
}

impl MatchSink for ChannelSink {
    fn push(&self, matches: Vec<SearchMatch>, stats: Stats) -> Result<(), SearchError> {
        self.tx
            .send((matches, stats))
            .map_err(|_| SearchError::Canceled)
    }
}

struct AggState {
    dedup: Deduper,
    stats: Stats,
    remaining: usize,
    exhausted: bool,
}

/// The one sink every clause of an evaluation shares.
struct Aggregator {
    state: Mutex<AggState>,
    stream: Option<Arc<dyn MatchSink>>,
    cx: RunContext,
}

impl Aggregator {
    fn new(budget: usize, stream: Option<Arc<dyn MatchSink>>, cx: RunContext) -> Aggregator {
        Aggregator {
            state: Mutex::new(AggState {
                dedup: Deduper::new(),
                stats: Stats::default(),
                remaining: budget,
                exhausted: false,
            }),
            stream,
            cx,
        }
    }

    fn into_parts(self) -> (Vec<SearchMatch>, Stats) {
        let state = self.state.into_inner().unwrap_or_else(|e| e.into_inner());
        (state.dedup.into_results(), state.stats)
    }

    /// Fallback for the (not expected) case of a surviving task still
    /// holding the aggregator when results are assembled.
    fn snapshot(&self) -> (Vec<SearchMatch>, Stats) {
        warn!("aggregator still shared at assembly time");
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        let dedup = std::mem::take(&mut state.dedup);
        (dedup.into_results(), state.stats.clone())
    }
}

impl MatchSink for Aggregator {
    fn push(&self, matches: Vec<SearchMatch>, stats: Stats) -> Result<(), SearchError> {
        let forward = {
            let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
            // Stats merge unconditionally, including for matches the budget
            // is about to discard.
            state.stats.merge(&stats);
            if state.exhausted {
                return Err(SearchError::BudgetExhausted);
            }
            let mut kept = Vec::new();
            for m in matches {
                if state.remaining == 0 {
                    break;
                }
                let cost = m.result_count();
                state.remaining = state.remaining.saturating_sub(cost);
                if self.stream.is_some() {
                    kept.push(m);
                } else {
                    state.dedup.add(m);
                }
            }
            if state.remaining == 0 {
                state.exhausted = true;
                state.stats.limit_hit = true;
                self.cx.cancel();
            }
            kept
        };
        if let Some(stream) = &self.stream {
            if !forward.is_empty() {
                stream.push(forward, stats)?;
            }
        }
        Ok(())
    }
}
