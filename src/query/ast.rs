//! Parsed query model.
//!
//! A query arrives as a `Plan`: a disjunctive-normal-form list of
//! `BasicQuery` clauses. Each clause carries zero or more field parameters
//! and at most one pattern expression tree. The plan is immutable during
//! evaluation; predicate expansion produces rewritten copies.

use std::time::Duration;

use crate::error::SearchError;

/// A well-known query field. Unknown fields are rejected at parse time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Repo,
    File,
    Lang,
    Rev,
    Case,
    Fork,
    Archived,
    Visibility,
    Count,
    Timeout,
    Type,
    Index,
    Select,
    Context,
    Content,
    RepoHasFile,
}

impl Field {
    pub fn parse(name: &str) -> Option<Field> {
        Some(match name {
            "repo" | "r" => Field::Repo,
            "file" | "f" | "path" => Field::File,
            "lang" | "language" => Field::Lang,
            "rev" | "revision" => Field::Rev,
            "case" => Field::Case,
            "fork" => Field::Fork,
            "archived" => Field::Archived,
            "visibility" => Field::Visibility,
            "count" => Field::Count,
            "timeout" => Field::Timeout,
            "type" => Field::Type,
            "index" => Field::Index,
            "select" => Field::Select,
            "context" => Field::Context,
            "content" => Field::Content,
            "repohasfile" => Field::RepoHasFile,
            _ => return None,
        })
    }

    pub fn name(&self) -> &'static str {
        match self {
            Field::Repo => "repo",
            Field::File => "file",
            Field::Lang => "lang",
            Field::Rev => "rev",
            Field::Case => "case",
            Field::Fork => "fork",
            Field::Archived => "archived",
            Field::Visibility => "visibility",
            Field::Count => "count",
            Field::Timeout => "timeout",
            Field::Type => "type",
            Field::Index => "index",
            Field::Select => "select",
            Field::Context => "context",
            Field::Content => "content",
            Field::RepoHasFile => "repohasfile",
        }
    }
}

/// One `field:value` term, possibly negated (`-field:value`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parameter {
    pub field: Field,
    pub value: String,
    pub negated: bool,
}

impl Parameter {
    pub fn new(field: Field, value: impl Into<String>) -> Self {
        Parameter {
            field,
            value: value.into(),
            negated: false,
        }
    }
}

/// How the pattern text is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PatternKind {
    #[default]
    Literal,
    Regex,
    Structural,
}

/// A single search pattern atom.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    pub text: String,
    pub kind: PatternKind,
    pub negated: bool,
}

impl Pattern {
    pub fn literal(text: impl Into<String>) -> Self {
        Pattern {
            text: text.into(),
            kind: PatternKind::Literal,
            negated: false,
        }
    }

    pub fn regex(text: impl Into<String>) -> Self {
        Pattern {
            text: text.into(),
            kind: PatternKind::Regex,
            negated: false,
        }
    }
}

/// The pattern expression tree of a clause. A clause has at most one of
/// these; `And`/`Or` nodes compile to the corresponding job combinators.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PatternExpr {
    Leaf(Pattern),
    And(Vec<PatternExpr>),
    Or(Vec<PatternExpr>),
}

impl PatternExpr {
    /// The leftmost leaf pattern, used where a single representative pattern
    /// is needed (repo-filter rewriting, structural dispatch).
    pub fn first_leaf(&self) -> Option<&Pattern> {
        match self {
            PatternExpr::Leaf(p) => Some(p),
            PatternExpr::And(children) | PatternExpr::Or(children) => {
                children.iter().find_map(|c| c.first_leaf())
            }
        }
    }

    /// True when every leaf of the expression is empty text.
    pub fn is_empty(&self) -> bool {
        match self {
            PatternExpr::Leaf(p) => p.text.is_empty(),
            PatternExpr::And(children) | PatternExpr::Or(children) => {
                children.iter().all(|c| c.is_empty())
            }
        }
    }
}

/// Result types requested via `type:`. Defaults to file, path and repo, the
/// same default set the result dispatch always used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResultTypes {
    pub file: bool,
    pub path: bool,
    pub repo: bool,
    pub symbol: bool,
    pub commit: bool,
    pub diff: bool,
}

impl Default for ResultTypes {
    fn default() -> Self {
        ResultTypes {
            file: true,
            path: true,
            repo: true,
            symbol: false,
            commit: false,
            diff: false,
        }
    }
}

impl ResultTypes {
    pub fn none() -> Self {
        ResultTypes {
            file: false,
            path: false,
            repo: false,
            symbol: false,
            commit: false,
            diff: false,
        }
    }

    /// True when a content or path search is requested.
    pub fn wants_text(&self) -> bool {
        self.file || self.path
    }

    pub fn wants_commit_search(&self) -> bool {
        self.commit || self.diff
    }
}

/// Indexed-backend participation requested via `index:`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexMode {
    /// Use the index where available and fall back to unindexed search.
    #[default]
    Auto,
    /// Only search the index; skip unindexed repositories.
    Only,
    /// Skip the index entirely.
    No,
}

/// Lossy projection requested via `select:`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectKind {
    Repo,
    File,
    Commit,
}

impl SelectKind {
    pub fn parse(value: &str) -> Option<SelectKind> {
        Some(match value {
            "repo" => SelectKind::Repo,
            "file" => SelectKind::File,
            "commit" => SelectKind::Commit,
            _ => return None,
        })
    }
}

/// One conjunctive clause of the plan.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BasicQuery {
    pub parameters: Vec<Parameter>,
    pub pattern: Option<PatternExpr>,
}

impl BasicQuery {
    /// First non-negated value of `field`, if any.
    pub fn value(&self, field: Field) -> Option<&str> {
        self.parameters
            .iter()
            .find(|p| p.field == field && !p.negated)
            .map(|p| p.value.as_str())
    }

    /// All non-negated values of `field`.
    pub fn values(&self, field: Field) -> impl Iterator<Item = &str> {
        self.parameters
            .iter()
            .filter(move |p| p.field == field && !p.negated)
            .map(|p| p.value.as_str())
    }

    /// All negated values of `field`.
    pub fn negated_values(&self, field: Field) -> impl Iterator<Item = &str> {
        self.parameters
            .iter()
            .filter(move |p| p.field == field && p.negated)
            .map(|p| p.value.as_str())
    }

    pub fn has_field(&self, field: Field) -> bool {
        self.parameters.iter().any(|p| p.field == field)
    }

    /// Validated `count:` value.
    pub fn count(&self) -> Result<Option<usize>, SearchError> {
        match self.value(Field::Count) {
            None => Ok(None),
            Some(v) => v
                .parse::<usize>()
                .map(Some)
                .map_err(|_| SearchError::InvalidQuery(format!("invalid count: value {v:?}"))),
        }
    }

    /// Parsed `timeout:` value, e.g. `2s` or `200ms`.
    pub fn timeout(&self) -> Result<Option<Duration>, SearchError> {
        match self.value(Field::Timeout) {
            None => Ok(None),
            Some(v) => parse_duration(v).map(Some).ok_or_else(|| {
                SearchError::InvalidQuery(format!(
                    "invalid timeout: value {v:?} (examples: \"timeout:2s\", \"timeout:200ms\")"
                ))
            }),
        }
    }

    pub fn case_sensitive(&self) -> bool {
        matches!(self.value(Field::Case), Some("yes") | Some("true"))
    }

    pub fn index_mode(&self) -> IndexMode {
        match self.value(Field::Index) {
            Some("only") => IndexMode::Only,
            Some("no") | Some("false") => IndexMode::No,
            _ => IndexMode::Auto,
        }
    }

    pub fn select(&self) -> Option<SelectKind> {
        self.value(Field::Select).and_then(SelectKind::parse)
    }

    /// Result types requested via `type:`, or the default set.
    pub fn result_types(&self) -> ResultTypes {
        let mut explicit = ResultTypes::none();
        let mut any = false;
        for v in self.values(Field::Type) {
            any = true;
            match v {
                "file" => explicit.file = true,
                "path" => explicit.path = true,
                "repo" => explicit.repo = true,
                "symbol" => explicit.symbol = true,
                "commit" => explicit.commit = true,
                "diff" => explicit.diff = true,
                _ => {}
            }
        }
        if any {
            explicit
        } else {
            ResultTypes::default()
        }
    }
}

/// A disjunctive-normal-form plan: a non-empty ordered list of clauses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Plan {
    clauses: Vec<BasicQuery>,
}

impl Plan {
    pub fn new(clauses: Vec<BasicQuery>) -> Result<Plan, SearchError> {
        if clauses.is_empty() {
            return Err(SearchError::InvalidQuery(
                "a query plan must have at least one clause".into(),
            ));
        }
        Ok(Plan { clauses })
    }

    /// A single-clause plan.
    pub fn singleton(clause: BasicQuery) -> Plan {
        Plan {
            clauses: vec![clause],
        }
    }

    pub fn clauses(&self) -> &[BasicQuery] {
        &self.clauses
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    pub fn is_empty(&self) -> bool {
        false // invariant: never empty
    }
}

/// Parse a duration with an `ms`, `s` or `m` suffix. Bare numbers are seconds.
pub fn parse_duration(v: &str) -> Option<Duration> {
    let v = v.trim();
    if let Some(ms) = v.strip_suffix("ms") {
        return ms.parse::<u64>().ok().map(Duration::from_millis);
    }
    if let Some(m) = v.strip_suffix('m') {
        return m.parse::<u64>().ok().map(|n| Duration::from_secs(n * 60));
    }
    if let Some(s) = v.strip_suffix('s') {
        return s.parse::<u64>().ok().map(Duration::from_secs);
    }
    v.parse::<u64>().ok().map(Duration::from_secs)
}
