//! Predicate terms: `repo:contains.file(...)`, `repo:contains.content(...)`
//! and `file:contains.content(...)`.
//!
//! A predicate cannot be compiled directly; it generates its own sub-plan,
//! which the evaluator runs to completion with captured (never streamed)
//! results. The captured matches are then folded back into the enclosing
//! clause as plain `repo:` / `file:` literals. A predicate whose sub-plan
//! produces nothing resolves to the sentinel "matches nothing", which must
//! not be confused with an empty rewrite meaning "no constraint".

use regex::escape;

use crate::error::SearchError;
use crate::query::ast::{BasicQuery, Field, Parameter, Pattern, PatternExpr, PatternKind, Plan};
use crate::results::SearchMatch;

/// A recognized predicate term within a clause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Predicate {
    /// `repo:contains.file(path)` — repos containing a path matching `path`.
    RepoContainsFile { path: String },
    /// `repo:contains.content(pattern)` — repos with content matching `pattern`.
    RepoContainsContent { pattern: String },
    /// `file:contains.content(pattern)` — files whose content matches `pattern`.
    FileContainsContent { pattern: String },
}

impl Predicate {
    /// Recognize a parameter as a predicate. Negated parameters never are.
    pub fn from_parameter(param: &Parameter) -> Option<Predicate> {
        if param.negated {
            return None;
        }
        let body = param.value.as_str();
        match param.field {
            Field::Repo => {
                if let Some(arg) = predicate_arg(body, "contains.file") {
                    return Some(Predicate::RepoContainsFile { path: arg });
                }
                if let Some(arg) = predicate_arg(body, "contains.content") {
                    return Some(Predicate::RepoContainsContent { pattern: arg });
                }
                // Bare `contains(...)` means content containment.
                if let Some(arg) = predicate_arg(body, "contains") {
                    return Some(Predicate::RepoContainsContent { pattern: arg });
                }
                None
            }
            Field::File => {
                if let Some(arg) = predicate_arg(body, "contains.content") {
                    return Some(Predicate::FileContainsContent { pattern: arg });
                }
                if let Some(arg) = predicate_arg(body, "contains") {
                    return Some(Predicate::FileContainsContent { pattern: arg });
                }
                None
            }
            _ => None,
        }
    }

    /// The generated sub-plan whose results answer the predicate. The
    /// sub-plan inherits the enclosing clause's repo scope so that
    /// `repo:foo repo:contains.file(x)` only inspects `foo`.
    pub fn plan(&self, enclosing: &BasicQuery) -> Plan {
        let mut clause = BasicQuery::default();
        for p in &enclosing.parameters {
            // Carry repo-scoping fields only; everything else belongs to the
            // outer search, not to the containment probe.
            if matches!(
                p.field,
                Field::Repo | Field::Rev | Field::Fork | Field::Archived | Field::Visibility
            ) && Predicate::from_parameter(p).is_none()
            {
                clause.parameters.push(p.clone());
            }
        }
        match self {
            Predicate::RepoContainsFile { path } => {
                clause.parameters.push(Parameter::new(Field::File, path.clone()));
                clause.parameters.push(Parameter::new(Field::Type, "path"));
                clause.parameters.push(Parameter::new(Field::Select, "repo"));
            }
            Predicate::RepoContainsContent { pattern } => {
                clause.pattern = Some(PatternExpr::Leaf(Pattern {
                    text: pattern.clone(),
                    kind: PatternKind::Regex,
                    negated: false,
                }));
                clause.parameters.push(Parameter::new(Field::Type, "file"));
                clause.parameters.push(Parameter::new(Field::Select, "repo"));
            }
            Predicate::FileContainsContent { pattern } => {
                clause.pattern = Some(PatternExpr::Leaf(Pattern {
                    text: pattern.clone(),
                    kind: PatternKind::Regex,
                    negated: false,
                }));
                clause.parameters.push(Parameter::new(Field::Type, "file"));
            }
        }
        Plan::singleton(clause)
    }

    /// Fold captured sub-plan matches back into literal parameters.
    ///
    /// Returns the sentinel `NoResults` when nothing matched: the enclosing
    /// disjunct then contributes zero results. An empty parameter list would
    /// instead mean "unconstrained", which is the opposite.
    pub fn rewrite(&self, matches: &[SearchMatch]) -> Result<Vec<Parameter>, SearchError> {
        match self {
            Predicate::RepoContainsFile { .. } | Predicate::RepoContainsContent { .. } => {
                let mut names: Vec<String> =
                    matches.iter().map(|m| m.repo().name.clone()).collect();
                names.sort();
                names.dedup();
                if names.is_empty() {
                    return Err(SearchError::NoResults);
                }
                let alternation = names.iter().map(|n| escape(n)).collect::<Vec<_>>().join("|");
                Ok(vec![Parameter::new(
                    Field::Repo,
                    format!("^({alternation})$"),
                )])
            }
            Predicate::FileContainsContent { .. } => {
                let mut paths: Vec<String> = matches
                    .iter()
                    .filter_map(|m| match m {
                        SearchMatch::File(f) => Some(f.path.clone()),
                        _ => None,
                    })
                    .collect();
                paths.sort();
                paths.dedup();
                if paths.is_empty() {
                    return Err(SearchError::NoResults);
                }
                let alternation = paths.iter().map(|p| escape(p)).collect::<Vec<_>>().join("|");
                Ok(vec![Parameter::new(
                    Field::File,
                    format!("^({alternation})$"),
                )])
            }
        }
    }

}

/// Extract `arg` from `name(arg)`, requiring the closing parenthesis to be
/// the final character.
fn predicate_arg(value: &str, name: &str) -> Option<String> {
    let rest = value.strip_prefix(name)?;
    let rest = rest.strip_prefix('(')?;
    let arg = rest.strip_suffix(')')?;
    if arg.is_empty() {
        return None;
    }
    Some(arg.to_string())
}

/// Split a clause's parameters into predicates and plain parameters.
pub fn partition(clause: &BasicQuery) -> (Vec<(usize, Predicate)>, bool) {
    let mut predicates = Vec::new();
    for (i, p) in clause.parameters.iter().enumerate() {
        if let Some(pred) = Predicate::from_parameter(p) {
            predicates.push((i, pred));
        }
    }
    let has = !predicates.is_empty();
    (predicates, has)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::{RepoMatch, Repository};

    fn repo_match(name: &str) -> SearchMatch {
        SearchMatch::Repo(RepoMatch {
            repo: Repository {
                id: 1,
                name: name.into(),
            },
            rev: None,
        })
    }

    #[test]
    fn recognizes_repo_contains_file() {
        let p = Parameter::new(Field::Repo, "contains.file(go\\.mod)");
        let pred = Predicate::from_parameter(&p).unwrap();
        assert_eq!(
            pred,
            Predicate::RepoContainsFile {
                path: "go\\.mod".into()
            }
        );
    }

    #[test]
    fn bare_contains_means_content() {
        let p = Parameter::new(Field::Repo, "contains(TODO)");
        assert_eq!(
            Predicate::from_parameter(&p).unwrap(),
            Predicate::RepoContainsContent {
                pattern: "TODO".into()
            }
        );
    }

    #[test]
    fn plain_repo_filter_is_not_a_predicate() {
        let p = Parameter::new(Field::Repo, "^github\\.com/foo$");
        assert!(Predicate::from_parameter(&p).is_none());
    }

    #[test]
    fn negated_predicate_ignored() {
        let mut p = Parameter::new(Field::Repo, "contains.file(x)");
        p.negated = true;
        assert!(Predicate::from_parameter(&p).is_none());
    }

    #[test]
    fn rewrite_produces_anchored_alternation() {
        let pred = Predicate::RepoContainsFile { path: "x".into() };
        let params = pred
            .rewrite(&[repo_match("a/b"), repo_match("c/d"), repo_match("a/b")])
            .unwrap();
        assert_eq!(params.len(), 1);
        assert_eq!(params[0].field, Field::Repo);
        assert_eq!(params[0].value, "^(a/b|c/d)$");
    }

    #[test]
    fn empty_rewrite_is_the_sentinel() {
        let pred = Predicate::RepoContainsContent {
            pattern: "nope".into(),
        };
        match pred.rewrite(&[]) {
            Err(SearchError::NoResults) => {}
            other => panic!("expected NoResults sentinel, got {other:?}"),
        }
    }

    #[test]
    fn sub_plan_inherits_repo_scope() {
        let mut clause = BasicQuery::default();
        clause.parameters.push(Parameter::new(Field::Repo, "^foo$"));
        clause
            .parameters
            .push(Parameter::new(Field::Repo, "contains.file(README)"));
        clause.parameters.push(Parameter::new(Field::Lang, "rust"));

        let pred = Predicate::RepoContainsFile {
            path: "README".into(),
        };
        let plan = pred.plan(&clause);
        let sub = &plan.clauses()[0];
        assert_eq!(sub.value(Field::Repo), Some("^foo$"));
        assert!(!sub.has_field(Field::Lang));
        assert_eq!(sub.value(Field::File), Some("README"));
    }
}
