//! Query string parsing into a disjunctive-normal-form plan.
//!
//! The grammar is a small subset of the full search syntax: whitespace
//! separated tokens, `field:value` filters with optional `-` negation,
//! quoting for values with spaces, and the keywords `and` / `or`. `or`
//! splits the query into plan clauses; `and` builds a pattern expression
//! tree inside a clause. Everything else accumulates into the pattern.

use crate::error::SearchError;
use crate::query::ast::{
    BasicQuery, Field, Parameter, Pattern, PatternExpr, PatternKind, Plan,
};

/// Parse `input` into a plan, interpreting bare patterns as `kind`.
pub fn parse(input: &str, kind: PatternKind) -> Result<Plan, SearchError> {
    let tokens = tokenize(input);
    if tokens.is_empty() {
        return Err(SearchError::InvalidQuery("empty query".into()));
    }

    let mut clauses = Vec::new();
    for group in tokens.split(|t| t.eq_ignore_ascii_case("or")) {
        if group.is_empty() {
            return Err(SearchError::InvalidQuery(
                "`or` requires an expression on each side".into(),
            ));
        }
        clauses.push(parse_clause(group, kind)?);
    }
    Plan::new(clauses)
}

fn parse_clause(tokens: &[String], kind: PatternKind) -> Result<BasicQuery, SearchError> {
    let mut clause = BasicQuery::default();
    // Pattern atoms between `and` keywords. Adjacent bare tokens within one
    // atom are joined by a space, which is how literal search treats them.
    let mut atoms: Vec<Vec<String>> = vec![Vec::new()];

    for tok in tokens {
        if tok.eq_ignore_ascii_case("and") {
            atoms.push(Vec::new());
            continue;
        }
        let (negated, body) = match tok.strip_prefix('-') {
            Some(rest) if rest.contains(':') => (true, rest),
            _ => (false, tok.as_str()),
        };
        if let Some((name, value)) = body.split_once(':') {
            // `std::fmt` is a pattern, not a field: a field value never
            // starts with another colon.
            if value.starts_with(':') {
                atoms
                    .last_mut()
                    .expect("atoms is never empty")
                    .push(tok.clone());
                continue;
            }
            if let Some(field) = Field::parse(name) {
                if value.is_empty() {
                    return Err(SearchError::InvalidQuery(format!(
                        "field `{name}:` requires a value"
                    )));
                }
                clause.parameters.push(Parameter {
                    field,
                    value: value.to_string(),
                    negated,
                });
                continue;
            }
            if !negated && looks_like_field(name) {
                return Err(SearchError::InvalidQuery(format!(
                    "unrecognized field `{name}:`"
                )));
            }
        }
        atoms
            .last_mut()
            .expect("atoms is never empty")
            .push(tok.clone());
    }

    let leaves: Vec<PatternExpr> = atoms
        .into_iter()
        .filter(|a| !a.is_empty())
        .map(|a| {
            PatternExpr::Leaf(Pattern {
                text: a.join(" "),
                kind,
                negated: false,
            })
        })
        .collect();

    clause.pattern = match leaves.len() {
        0 => None,
        1 => Some(leaves.into_iter().next().expect("len checked")),
        _ => Some(PatternExpr::And(leaves)),
    };
    // A clause with no filters and no pattern would match everything.
    if clause.parameters.is_empty() && clause.pattern.is_none() {
        return Err(SearchError::InvalidQuery(
            "expected a pattern or filter in the expression".into(),
        ));
    }
    Ok(clause)
}

/// A token prefix only counts as a field name if it is plausibly one:
/// all-lowercase alphabetic. This keeps patterns like `std::fmt` intact.
fn looks_like_field(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_lowercase())
}

/// Split on whitespace while honoring single and double quotes, so that
/// `repo:"my repo"` stays one token.
fn tokenize(input: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut cur = String::new();
    let mut quote: Option<char> = None;

    for c in input.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => cur.push(c),
            None => match c {
                '"' | '\'' => quote = Some(c),
                c if c.is_whitespace() => {
                    if !cur.is_empty() {
                        out.push(std::mem::take(&mut cur));
                    }
                }
                c => cur.push(c),
            },
        }
    }
    if !cur.is_empty() {
        out.push(cur);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::ast::Field;

    #[test]
    fn single_clause_with_fields() {
        let plan = parse("repo:^github\\.com/foo$ file:\\.rs$ needle", PatternKind::Literal).unwrap();
        assert_eq!(plan.len(), 1);
        let clause = &plan.clauses()[0];
        assert_eq!(clause.value(Field::Repo), Some("^github\\.com/foo$"));
        assert_eq!(clause.value(Field::File), Some("\\.rs$"));
        assert_eq!(clause.pattern.as_ref().unwrap().first_leaf().unwrap().text, "needle");
    }

    #[test]
    fn or_splits_clauses() {
        let plan = parse("foo or bar or baz", PatternKind::Literal).unwrap();
        assert_eq!(plan.len(), 3);
    }

    #[test]
    fn and_builds_pattern_tree() {
        let plan = parse("foo and bar", PatternKind::Literal).unwrap();
        let clause = &plan.clauses()[0];
        match clause.pattern.as_ref().unwrap() {
            PatternExpr::And(children) => assert_eq!(children.len(), 2),
            other => panic!("expected And, got {other:?}"),
        }
    }

    #[test]
    fn negated_parameter() {
        let plan = parse("-file:_test\\.go$ handler", PatternKind::Literal).unwrap();
        let clause = &plan.clauses()[0];
        let param = &clause.parameters[0];
        assert!(param.negated);
        assert_eq!(param.field, Field::File);
    }

    #[test]
    fn quoted_value_keeps_spaces() {
        let plan = parse(r#"repo:"my repo" x"#, PatternKind::Literal).unwrap();
        assert_eq!(plan.clauses()[0].value(Field::Repo), Some("my repo"));
    }

    #[test]
    fn bare_tokens_join_into_one_literal() {
        let plan = parse("hello world", PatternKind::Literal).unwrap();
        let leaf = plan.clauses()[0].pattern.as_ref().unwrap().first_leaf().unwrap();
        assert_eq!(leaf.text, "hello world");
    }

    #[test]
    fn double_colon_is_not_a_field() {
        let plan = parse("std::fmt::Display", PatternKind::Literal).unwrap();
        let clause = &plan.clauses()[0];
        assert!(clause.parameters.is_empty());
        assert!(clause.pattern.is_some());
    }

    #[test]
    fn unknown_lowercase_field_rejected() {
        assert!(parse("bogusfield:value x", PatternKind::Literal).is_err());
    }

    #[test]
    fn empty_query_rejected() {
        assert!(parse("   ", PatternKind::Literal).is_err());
    }

    #[test]
    fn dangling_or_rejected() {
        assert!(parse("needle or", PatternKind::Literal).is_err());
        assert!(parse("or needle", PatternKind::Literal).is_err());
        assert!(parse("foo or or bar", PatternKind::Literal).is_err());
    }

    #[test]
    fn bare_and_rejected() {
        assert!(parse("and", PatternKind::Literal).is_err());
    }
}
