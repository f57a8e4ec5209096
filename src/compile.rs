//! Clause compilation: turns one `BasicQuery` into a job tree.
//!
//! Compilation resolves `repo:` filters up front, splits the searchable set
//! into indexed and unindexed halves, and builds one leaf job per backend
//! the clause needs. Pattern `and`/`or` trees become the corresponding
//! combinators. The root of every compiled clause is a priority node:
//! result-bearing jobs are required, bookkeeping (excluded-repo counting)
//! is optional and runs on a grace period.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex_syntax::hir::{Hir, HirKind};
use tracing::debug;

use crate::backend::{
    Backends, CommitQuery, IndexQuery, IndexScope, RepoFilters, RepoRevisions, StructuralQuery,
    SymbolQuery, TextQuery,
};
use crate::error::SearchError;
use crate::jobs::combinators::MatchFilter;
use crate::jobs::{
    AndJob, CommitSearchJob, ComputeExcludedJob, FilterJob, IndexedSearchJob, Job, LimitJob,
    MatchSink, OrJob, PriorityJob, RepoNameSearchJob, RunContext, StructuralSearchJob,
    SymbolSearchJob, TimeoutJob, UnindexedSearchJob,
};
use crate::query::{BasicQuery, Field, IndexMode, Pattern, PatternExpr, PatternKind};
use crate::results::Alert;

/// Commit and diff search refuse to run over more repositories than this.
pub const COMMIT_REPO_LIMIT: usize = 50;

/// Fields that may accompany a repo-name search. A clause using anything
/// else gets no repo results even when `type:` defaults would include them.
const REPO_SEARCH_FIELDS: &[Field] = &[
    Field::Repo,
    Field::Rev,
    Field::Context,
    Field::Case,
    Field::Fork,
    Field::Archived,
    Field::Visibility,
    Field::Count,
    Field::Timeout,
    Field::Index,
    Field::Select,
    Field::Type,
];

#[derive(Debug, Clone)]
pub struct CompileConfig {
    /// Grace period granted to optional work after required work finishes.
    pub optional_grace: Duration,
    /// First-pass result cap for structural search.
    pub structural_limit: usize,
    pub commit_repo_limit: usize,
    /// Ceiling for commit and diff search when the clause sets no
    /// `timeout:` of its own.
    pub commit_timeout: Duration,
    /// How many repositories a `repo:` filter may resolve to; resolution
    /// past the cap is reported through an alert.
    pub repo_limit: usize,
    /// Repo regex substituted for the whole-index scope when an instance
    /// restricts global search. Unset means global search is unrestricted.
    pub default_scope: Option<String>,
}

impl Default for CompileConfig {
    fn default() -> Self {
        CompileConfig {
            optional_grace: Duration::from_millis(100),
            structural_limit: 30,
            commit_repo_limit: COMMIT_REPO_LIMIT,
            commit_timeout: Duration::from_secs(60),
            repo_limit: 800,
            default_scope: None,
        }
    }
}

pub struct Compiler {
    backends: Backends,
    config: CompileConfig,
    sub_repo_filter: Option<Arc<dyn MatchFilter>>,
}

/// Per-clause searchable scope, fixed once at the start of compilation.
struct Scope {
    /// No repo-affecting filters: indexed search runs over the whole index
    /// without enumerating repositories.
    global: bool,
    indexed: Vec<RepoRevisions>,
    unindexed: Vec<RepoRevisions>,
    case_sensitive: bool,
    include_paths: Vec<String>,
    exclude_paths: Vec<String>,
    languages: Vec<String>,
    limit: usize,
    path_only: bool,
    index_mode: IndexMode,
}

impl Scope {
    fn all_repos(&self) -> Vec<RepoRevisions> {
        let mut all = self.indexed.clone();
        all.extend(self.unindexed.iter().cloned());
        all
    }
}

impl Compiler {
    pub fn new(backends: Backends, config: CompileConfig) -> Compiler {
        Compiler {
            backends,
            config,
            sub_repo_filter: None,
        }
    }

    /// Enforce sub-repository permissions on everything compiled here.
    pub fn with_sub_repo_filter(mut self, filter: Arc<dyn MatchFilter>) -> Compiler {
        self.sub_repo_filter = Some(filter);
        self
    }

    /// Compile one clause into a runnable job tree. `want_count` bounds the
    /// per-backend result caps; `streaming` marks evaluations that keep the
    /// full deadline for every result type.
    pub async fn compile(
        &self,
        clause: &BasicQuery,
        want_count: usize,
        streaming: bool,
    ) -> Result<Arc<dyn Job>, SearchError> {
        let types = clause.result_types();
        let mut filters = RepoFilters::from_clause(clause)?;
        let pattern = effective_pattern(clause);

        let mut global = is_global(clause);
        if global {
            if let Some(scope) = &self.config.default_scope {
                filters.include.push(scope.clone());
                global = false;
            }
        }
        let index_mode = clause.index_mode();

        let (indexed, unindexed, resolution_alert) = if global && index_mode != IndexMode::No {
            (Vec::new(), Vec::new(), None)
        } else {
            filters.limit = Some(self.config.repo_limit);
            let resolved = self.backends.resolver.resolve(&filters).await?;
            if resolved.repos.is_empty() && !global {
                return Ok(alert_job(Alert::for_no_resolved_repos()));
            }
            let mut alert = (!resolved.missing_revs.is_empty())
                .then(|| Alert::for_missing_repo_revs(resolved.missing_revs.clone()));
            if resolved.over_limit {
                alert = Alert::max(
                    alert,
                    Some(Alert::for_truncated_repos(self.config.repo_limit)),
                );
            }
            match index_mode {
                IndexMode::No => (Vec::new(), resolved.repos, alert),
                IndexMode::Only => {
                    let names = self.backends.indexed.indexed_repos(&resolved.repos).await?;
                    let indexed = resolved
                        .repos
                        .into_iter()
                        .filter(|rr| names.contains(&rr.repo))
                        .collect();
                    (indexed, Vec::new(), alert)
                }
                IndexMode::Auto => {
                    let names = self.backends.indexed.indexed_repos(&resolved.repos).await?;
                    let (indexed, unindexed): (Vec<_>, Vec<_>) = resolved
                        .repos
                        .into_iter()
                        .partition(|rr| names.contains(&rr.repo));
                    (indexed, unindexed, alert)
                }
            }
        };

        let scope = Scope {
            global: global && index_mode != IndexMode::No,
            indexed,
            unindexed,
            case_sensitive: clause.case_sensitive(),
            include_paths: clause.values(Field::File).map(String::from).collect(),
            exclude_paths: clause.negated_values(Field::File).map(String::from).collect(),
            languages: clause.values(Field::Lang).map(String::from).collect(),
            limit: want_count,
            path_only: types.path && !types.file,
            index_mode,
        };

        let mut required: Vec<Arc<dyn Job>> = Vec::new();
        let mut optional: Vec<Arc<dyn Job>> = Vec::new();

        if types.wants_text() || types.symbol {
            if let Some(expr) = &pattern {
                if !expr.is_empty() || types.wants_text() {
                    if types.wants_text() {
                        required.push(self.compile_pattern_expr(expr, &scope)?);
                    }
                    if types.symbol {
                        if let Some(leaf) = expr.first_leaf() {
                            required.push(self.symbol_job(leaf, &scope));
                        }
                    }
                }
            } else if !scope.include_paths.is_empty() && types.wants_text() {
                // `file:` with no pattern lists the matching paths.
                required.push(self.path_listing_job(&scope));
            }
        }

        if types.wants_commit_search() {
            let leaf = pattern.as_ref().and_then(|e| e.first_leaf());
            let jobs = self.commit_jobs(clause, leaf, &types, &scope)?;
            if !jobs.is_empty() {
                let timeout = clause.timeout()?;
                let commit_root = LimitJob::new(
                    want_count,
                    TimeoutJob::new(
                        timeout.unwrap_or(self.config.commit_timeout),
                        OrJob::new(jobs),
                    ),
                );
                // Commit search keeps the full deadline when it is the only
                // result type left or the user opted into a longer run;
                // otherwise it rides the optional side of the priority node.
                let full_deadline =
                    streaming || timeout.is_some() || clause.count()?.is_some();
                if full_deadline || required.is_empty() {
                    required.push(commit_root);
                } else {
                    optional.push(commit_root);
                }
            }
        }

        if types.repo {
            if let Some(job) = self.repo_job(clause, &pattern, &filters)? {
                required.push(job);
            }
        }

        if required.is_empty() && resolution_alert.is_none() {
            debug!("clause compiled to no work");
        }

        let required_root: Arc<dyn Job> = match resolution_alert {
            Some(alert) => OrJob::new(vec![alert_job(alert), OrJob::new(required)]),
            None => OrJob::new(required),
        };
        optional.push(ComputeExcludedJob::new(
            Arc::clone(&self.backends.resolver),
            filters,
        ));
        let mut root = PriorityJob::new(
            required_root,
            OrJob::new(optional),
            self.config.optional_grace,
        );

        if let Some(filter) = &self.sub_repo_filter {
            root = FilterJob::new(root, Arc::clone(filter));
        }
        Ok(root)
    }

    fn compile_pattern_expr(
        &self,
        expr: &PatternExpr,
        scope: &Scope,
    ) -> Result<Arc<dyn Job>, SearchError> {
        match expr {
            PatternExpr::Leaf(p) => self.text_jobs(p, scope),
            PatternExpr::And(children) => {
                let jobs = children
                    .iter()
                    .map(|c| self.compile_pattern_expr(c, scope))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(AndJob::new(jobs))
            }
            PatternExpr::Or(children) => {
                let jobs = children
                    .iter()
                    .map(|c| self.compile_pattern_expr(c, scope))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(OrJob::new(jobs))
            }
        }
    }

    /// The indexed/unindexed (or structural) jobs for one pattern leaf.
    fn text_jobs(&self, pattern: &Pattern, scope: &Scope) -> Result<Arc<dyn Job>, SearchError> {
        if pattern.negated {
            return Err(SearchError::InvalidQuery(
                "negated patterns are not supported".into(),
            ));
        }
        if pattern.kind == PatternKind::Structural && !pattern.text.is_empty() {
            let job = StructuralSearchJob::new(
                Arc::clone(&self.backends.structural),
                StructuralQuery {
                    pattern: pattern.text.clone(),
                    include_paths: scope.include_paths.clone(),
                    languages: scope.languages.clone(),
                    file_match_limit: self.config.structural_limit,
                    repos: scope.all_repos(),
                },
            );
            return Ok(job);
        }

        // An empty structural pattern degrades to a literal match-all.
        let (text, is_regex) = match pattern.kind {
            PatternKind::Regex => (pattern.text.clone(), true),
            PatternKind::Literal | PatternKind::Structural => (pattern.text.clone(), false),
        };
        if is_regex {
            regex::Regex::new(&text).map_err(|source| SearchError::InvalidRegex {
                field: "content",
                source,
            })?;
        }

        let mut jobs: Vec<Arc<dyn Job>> = Vec::new();
        if scope.index_mode != IndexMode::No && (scope.global || !scope.indexed.is_empty()) {
            let query = IndexQuery {
                pattern: text.clone(),
                is_regex,
                case_sensitive: scope.case_sensitive,
                literals: extract_literals(&text, is_regex),
                include_paths: scope.include_paths.clone(),
                exclude_paths: scope.exclude_paths.clone(),
                languages: scope.languages.clone(),
                file_match_limit: scope.limit,
                path_only: scope.path_only,
                scope: if scope.global {
                    IndexScope::Universe
                } else {
                    IndexScope::Repos(scope.indexed.clone())
                },
            };
            jobs.push(IndexedSearchJob::new(
                Arc::clone(&self.backends.indexed),
                query,
                scope.index_mode != IndexMode::Only,
            ));
        }
        if !scope.unindexed.is_empty() {
            jobs.push(UnindexedSearchJob::new(
                Arc::clone(&self.backends.unindexed),
                TextQuery {
                    pattern: text,
                    is_regex,
                    case_sensitive: scope.case_sensitive,
                    include_paths: scope.include_paths.clone(),
                    exclude_paths: scope.exclude_paths.clone(),
                    languages: scope.languages.clone(),
                    file_match_limit: scope.limit,
                    path_only: scope.path_only,
                    repos: scope.unindexed.clone(),
                },
            ));
        }
        Ok(OrJob::new(jobs))
    }

    /// A path listing for `file:` clauses without a pattern.
    fn path_listing_job(&self, scope: &Scope) -> Arc<dyn Job> {
        let query = IndexQuery {
            pattern: String::new(),
            is_regex: true,
            case_sensitive: scope.case_sensitive,
            literals: Vec::new(),
            include_paths: scope.include_paths.clone(),
            exclude_paths: scope.exclude_paths.clone(),
            languages: scope.languages.clone(),
            file_match_limit: scope.limit,
            path_only: true,
            scope: if scope.global {
                IndexScope::Universe
            } else {
                IndexScope::Repos(scope.all_repos())
            },
        };
        IndexedSearchJob::new(Arc::clone(&self.backends.indexed), query, true)
    }

    fn symbol_job(&self, pattern: &Pattern, scope: &Scope) -> Arc<dyn Job> {
        SymbolSearchJob::new(
            Arc::clone(&self.backends.symbols),
            SymbolQuery {
                pattern: match pattern.kind {
                    PatternKind::Regex => pattern.text.clone(),
                    _ => regex::escape(&pattern.text),
                },
                case_sensitive: scope.case_sensitive,
                include_paths: scope.include_paths.clone(),
                limit: scope.limit,
                scope: if scope.global {
                    IndexScope::Universe
                } else {
                    IndexScope::Repos(scope.all_repos())
                },
            },
        )
    }

    fn commit_jobs(
        &self,
        clause: &BasicQuery,
        leaf: Option<&Pattern>,
        types: &crate::query::ResultTypes,
        scope: &Scope,
    ) -> Result<Vec<Arc<dyn Job>>, SearchError> {
        let repos = scope.all_repos();
        if scope.global {
            return Err(SearchError::InvalidQuery(
                "commit and diff search require repo: filters to bound the search".into(),
            ));
        }
        if repos.len() > self.config.commit_repo_limit {
            let narrowed = repos
                .iter()
                .take(self.config.commit_repo_limit)
                .map(|rr| regex::escape(&rr.repo.name))
                .collect::<Vec<_>>()
                .join("|");
            let mut query = String::new();
            if let Some(leaf) = leaf {
                query.push_str(&leaf.text);
                query.push(' ');
            }
            query.push_str(&format!("repo:^({narrowed})$"));
            return Ok(vec![alert_job(Alert::for_over_repo_limit(
                self.config.commit_repo_limit,
                Some(query),
            ))]);
        }

        let (pattern, is_regex) = match leaf {
            Some(p) => (p.text.clone(), p.kind == PatternKind::Regex),
            None => (String::new(), true),
        };
        let mut jobs: Vec<Arc<dyn Job>> = Vec::new();
        for diff in [false, true] {
            if (diff && !types.diff) || (!diff && !types.commit) {
                continue;
            }
            jobs.push(CommitSearchJob::new(
                Arc::clone(&self.backends.commits),
                CommitQuery {
                    pattern: pattern.clone(),
                    is_regex,
                    case_sensitive: clause.case_sensitive(),
                    diff,
                    limit: scope.limit,
                    repos: repos.clone(),
                },
            ));
        }
        Ok(jobs)
    }

    /// The repo-name search job, when the clause is eligible for one.
    fn repo_job(
        &self,
        clause: &BasicQuery,
        pattern: &Option<PatternExpr>,
        filters: &RepoFilters,
    ) -> Result<Option<Arc<dyn Job>>, SearchError> {
        let explicit = clause.values(Field::Type).any(|v| v == "repo");
        if clause
            .parameters
            .iter()
            .any(|p| !REPO_SEARCH_FIELDS.contains(&p.field))
        {
            return Ok(None);
        }

        let mut filters = filters.clone();
        if let Some(leaf) = pattern.as_ref().and_then(|e| e.first_leaf()) {
            if leaf.text.is_empty() {
                // No name filter to add.
            } else if leaf.text.contains('@') {
                // `@` separates repo and revision in repo search syntax, so a
                // pattern containing one cannot be a repo name filter.
                if explicit {
                    return Err(SearchError::InvalidQuery(
                        "a repo search pattern cannot contain @; use repo:name@rev instead".into(),
                    ));
                }
                return Ok(None);
            } else {
                filters.include.push(match leaf.kind {
                    PatternKind::Regex => leaf.text.clone(),
                    _ => regex::escape(&leaf.text),
                });
            }
        }
        Ok(Some(RepoNameSearchJob::new(
            Arc::clone(&self.backends.resolver),
            filters,
        )))
    }
}

/// `content:` overrides the pattern; otherwise the clause's pattern tree is
/// used as parsed.
fn effective_pattern(clause: &BasicQuery) -> Option<PatternExpr> {
    if let Some(content) = clause.value(Field::Content) {
        return Some(PatternExpr::Leaf(Pattern::literal(content)));
    }
    clause.pattern.clone()
}

/// A clause without repo-affecting filters searches the whole universe.
/// `context:` does not count: `context:global` is the default context, and
/// every other value is rejected during filter validation.
fn is_global(clause: &BasicQuery) -> bool {
    !clause.parameters.iter().any(|p| {
        matches!(
            p.field,
            Field::Repo
                | Field::Rev
                | Field::RepoHasFile
                | Field::Fork
                | Field::Archived
                | Field::Visibility
        )
    })
}

/// Literal substrings every match must contain, for index candidate
/// selection. Non-regex patterns are their own literal.
pub fn extract_literals(pattern: &str, is_regex: bool) -> Vec<String> {
    if !is_regex {
        if pattern.is_empty() {
            return Vec::new();
        }
        return vec![pattern.to_string()];
    }
    let Ok(hir) = regex_syntax::parse(pattern) else {
        return Vec::new();
    };
    let mut literals = Vec::new();
    collect_literals(&hir, &mut literals);
    literals.retain(|l| l.len() >= 3);
    literals
}

fn collect_literals(hir: &Hir, out: &mut Vec<String>) {
    match hir.kind() {
        HirKind::Literal(lit) => {
            if let Ok(s) = std::str::from_utf8(&lit.0) {
                out.push(s.to_string());
            }
        }
        HirKind::Concat(parts) => {
            for part in parts {
                collect_literals(part, out);
            }
        }
        HirKind::Capture(cap) => collect_literals(&cap.sub, out),
        _ => {}
    }
}

struct AlertJob(Alert);

impl fmt::Debug for AlertJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlertJob").field("title", &self.0.title).finish()
    }
}

#[async_trait]
impl Job for AlertJob {
    fn name(&self) -> &'static str {
        "Alert"
    }

    async fn run(
        &self,
        _cx: &RunContext,
        _sink: Arc<dyn MatchSink>,
    ) -> Result<Option<Alert>, SearchError> {
        Ok(Some(self.0.clone()))
    }
}

fn alert_job(alert: Alert) -> Arc<dyn Job> {
    Arc::new(AlertJob(alert))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::{MemoryBackend, MemoryRepo};
    use crate::jobs::{render_tree, CollectSink};
    use crate::query::parse;
    use crate::results::SearchMatch;

    fn compiler() -> Compiler {
        let backends = MemoryBackend::new(vec![
            MemoryRepo::new(1, "acme/api")
                .file("src/main.rs", "fn main() {\n    serve();\n}\n")
                .commit("c1", "add serve entrypoint", "+serve\n"),
            MemoryRepo::new(2, "acme/docs").file("README.md", "how to serve traffic\n"),
            MemoryRepo::new(3, "acme/legacy")
                .unindexed()
                .file("old.rs", "fn serve() {}\n"),
        ])
        .into_backends();
        Compiler::new(backends, CompileConfig::default())
    }

    async fn run_query(query: &str) -> Vec<SearchMatch> {
        let plan = parse(query, PatternKind::Literal).unwrap();
        let job = compiler()
            .compile(&plan.clauses()[0], 100, false)
            .await
            .unwrap();
        let sink = CollectSink::new();
        job.run(&RunContext::default(), sink.clone()).await.unwrap();
        sink.take().0
    }

    #[tokio::test]
    async fn global_search_hits_the_index_only() {
        let matches = run_query("serve").await;
        // Two indexed repos match; the unindexed one is invisible to a
        // global search.
        let mut repos: Vec<&str> = matches.iter().map(|m| m.repo().name.as_str()).collect();
        repos.sort();
        repos.dedup();
        assert_eq!(repos, vec!["acme/api", "acme/docs"]);
    }

    #[tokio::test]
    async fn default_scope_bounds_global_search() {
        let backends = MemoryBackend::new(vec![
            MemoryRepo::new(1, "acme/api").file("src/main.rs", "serve\n"),
            MemoryRepo::new(2, "other/thing").file("lib.rs", "serve\n"),
        ])
        .into_backends();
        let config = CompileConfig {
            default_scope: Some("^acme/".into()),
            ..CompileConfig::default()
        };
        let compiler = Compiler::new(backends, config);

        let plan = parse("serve", PatternKind::Literal).unwrap();
        let job = compiler.compile(&plan.clauses()[0], 100, false).await.unwrap();
        let sink = CollectSink::new();
        job.run(&RunContext::default(), sink.clone()).await.unwrap();
        let matches = sink.take().0;
        assert!(!matches.is_empty());
        assert!(matches.iter().all(|m| m.repo().name.starts_with("acme/")));
    }

    #[tokio::test]
    async fn context_global_keeps_the_universe_scope() {
        // The default context must not turn the clause into a scoped
        // per-repo search that would pull in unindexed repos.
        let bare = run_query("serve").await;
        let with_context = run_query("context:global serve").await;
        let names = |ms: &[SearchMatch]| {
            let mut out: Vec<String> = ms.iter().map(|m| m.repo().name.clone()).collect();
            out.sort();
            out.dedup();
            out
        };
        assert_eq!(names(&bare), names(&with_context));
        assert!(!names(&with_context).contains(&"acme/legacy".to_string()));
    }

    #[tokio::test]
    async fn unknown_context_is_rejected() {
        let plan = parse("context:myteam serve", PatternKind::Literal).unwrap();
        let err = compiler()
            .compile(&plan.clauses()[0], 100, false)
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn scoped_search_reaches_unindexed_repos() {
        let matches = run_query("repo:acme serve").await;
        assert!(matches
            .iter()
            .any(|m| m.repo().name == "acme/legacy"));
    }

    #[tokio::test]
    async fn index_no_skips_the_index() {
        let matches = run_query("repo:acme index:no serve").await;
        // Every repo is reachable, but nothing reports as indexed.
        assert!(!matches.is_empty());
    }

    #[tokio::test]
    async fn bare_repo_filter_lists_repos() {
        let matches = run_query("repo:docs").await;
        assert!(matches
            .iter()
            .any(|m| matches!(m, SearchMatch::Repo(r) if r.repo.name == "acme/docs")));
    }

    #[tokio::test]
    async fn unresolvable_repo_filter_alerts() {
        let plan = parse("repo:doesnotexist serve", PatternKind::Literal).unwrap();
        let job = compiler()
            .compile(&plan.clauses()[0], 100, false)
            .await
            .unwrap();
        let sink = CollectSink::new();
        let alert = job.run(&RunContext::default(), sink).await.unwrap();
        assert_eq!(alert.unwrap().title, "No repositories found");
    }

    #[tokio::test]
    async fn commit_search_requires_repo_scope() {
        let plan = parse("type:commit serve", PatternKind::Literal).unwrap();
        let err = compiler()
            .compile(&plan.clauses()[0], 100, false)
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn commit_search_finds_messages() {
        let matches = run_query("repo:acme/api type:commit entrypoint").await;
        assert!(matches
            .iter()
            .any(|m| matches!(m, SearchMatch::Commit(_))));
    }

    async fn compile_tree(query: &str) -> Arc<dyn Job> {
        let plan = parse(query, PatternKind::Literal).unwrap();
        compiler()
            .compile(&plan.clauses()[0], 100, false)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn commit_only_queries_are_required_work() {
        let job = compile_tree("repo:acme/api type:commit entrypoint").await;
        let children = job.children();
        let required = render_tree(&children[0]);
        assert!(required.contains("Commit"));
        // The commit subtree carries its own limit and deadline.
        assert!(required.contains("Limit"));
        assert!(required.contains("Timeout"));
    }

    #[tokio::test]
    async fn commit_rides_optional_beside_other_result_types() {
        let job = compile_tree("repo:acme/api type:file type:commit entrypoint").await;
        let children = job.children();
        assert!(!render_tree(&children[0]).contains("Commit"));
        assert!(render_tree(&children[1]).contains("Commit"));
    }

    #[tokio::test]
    async fn explicit_timeout_keeps_commit_search_required() {
        let job =
            compile_tree("repo:acme/api type:file type:commit timeout:5s entrypoint").await;
        let children = job.children();
        assert!(render_tree(&children[0]).contains("Commit"));
    }

    #[tokio::test]
    async fn repo_resolution_past_the_cap_alerts() {
        let backends = MemoryBackend::new(vec![
            MemoryRepo::new(1, "acme/api").file("a.rs", "serve\n"),
            MemoryRepo::new(2, "acme/docs").file("b.md", "serve\n"),
            MemoryRepo::new(3, "acme/tools").file("c.rs", "serve\n"),
        ])
        .into_backends();
        let config = CompileConfig {
            repo_limit: 1,
            ..CompileConfig::default()
        };
        let compiler = Compiler::new(backends, config);

        let plan = parse("repo:acme serve", PatternKind::Literal).unwrap();
        let job = compiler.compile(&plan.clauses()[0], 100, false).await.unwrap();
        let sink = CollectSink::new();
        let alert = job.run(&RunContext::default(), sink).await.unwrap();
        assert_eq!(alert.unwrap().title, "Too many matching repositories");
    }

    #[tokio::test]
    async fn at_sign_pattern_with_explicit_repo_type_is_an_error() {
        let plan = parse("type:repo foo@bar", PatternKind::Literal).unwrap();
        let err = compiler()
            .compile(&plan.clauses()[0], 100, false)
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::InvalidQuery(_)));
    }

    #[test]
    fn literal_extraction() {
        assert_eq!(extract_literals("serve", false), vec!["serve"]);
        let lits = extract_literals("foo(bar|baz)qux", true);
        assert!(lits.contains(&"foo".to_string()));
        assert!(extract_literals(".*", true).is_empty());
    }
}
