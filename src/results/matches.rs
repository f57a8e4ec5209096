//! Result values: repository, file and commit matches.
//!
//! Every match carries an identity key for deduplication and a total order
//! (repository name, then path or commit) so merged result sets come out
//! deterministic regardless of backend arrival order.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::query::SelectKind;

/// A repository reference. Ordering is by name first so result output and
/// pagination walk repositories alphabetically; the id only breaks ties.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Repository {
    pub id: u32,
    pub name: String,
}

impl Ord for Repository {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name.cmp(&other.name).then(self.id.cmp(&other.id))
    }
}

impl PartialOrd for Repository {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// One matching line with the byte ranges of its highlights.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineMatch {
    /// Zero-based line number.
    pub line: u32,
    pub text: String,
    /// Highlight ranges as (start, length) in bytes within `text`.
    pub ranges: Vec<(u32, u32)>,
}

/// A content or path match within one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMatch {
    pub repo: Repository,
    pub path: String,
    pub rev: Option<String>,
    /// Empty for a path-only match.
    pub lines: Vec<LineMatch>,
    /// True when the backend truncated this file's matches.
    pub limit_hit: bool,
}

/// A repository-level match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoMatch {
    pub repo: Repository,
    pub rev: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommitMatchKind {
    Commit,
    Diff,
}

/// A commit message or diff match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMatch {
    pub repo: Repository,
    pub commit: String,
    pub kind: CommitMatchKind,
    /// Message or diff excerpt containing the match.
    pub preview: String,
    /// Highlight ranges as (start, length) in bytes within `preview`.
    pub ranges: Vec<(u32, u32)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SearchMatch {
    Repo(RepoMatch),
    File(FileMatch),
    Commit(CommitMatch),
}

/// Identity of a match for deduplication. Two matches with equal keys are
/// the same logical result and get merged.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MatchKey {
    Repo {
        name: String,
        rev: Option<String>,
    },
    File {
        repo: String,
        path: String,
        rev: Option<String>,
    },
    Commit {
        repo: String,
        commit: String,
        kind: CommitMatchKind,
    },
}

impl SearchMatch {
    pub fn key(&self) -> MatchKey {
        match self {
            SearchMatch::Repo(m) => MatchKey::Repo {
                name: m.repo.name.clone(),
                rev: m.rev.clone(),
            },
            SearchMatch::File(m) => MatchKey::File {
                repo: m.repo.name.clone(),
                path: m.path.clone(),
                rev: m.rev.clone(),
            },
            SearchMatch::Commit(m) => MatchKey::Commit {
                repo: m.repo.name.clone(),
                commit: m.commit.clone(),
                kind: m.kind,
            },
        }
    }

    pub fn repo(&self) -> &Repository {
        match self {
            SearchMatch::Repo(m) => &m.repo,
            SearchMatch::File(m) => &m.repo,
            SearchMatch::Commit(m) => &m.repo,
        }
    }

    /// How many results this match counts for. Files count once per matching
    /// line and at least once (path matches have no lines); commits count
    /// their highlight ranges the same way.
    pub fn result_count(&self) -> usize {
        match self {
            SearchMatch::File(m) => m.lines.len().max(1),
            SearchMatch::Commit(m) => m.ranges.len().max(1),
            SearchMatch::Repo(_) => 1,
        }
    }

    /// Lossy projection for `select:`. Returns `None` when the match has no
    /// representation at the requested granularity.
    pub fn select(&self, kind: SelectKind) -> Option<SearchMatch> {
        match kind {
            SelectKind::Repo => Some(SearchMatch::Repo(RepoMatch {
                repo: self.repo().clone(),
                rev: match self {
                    SearchMatch::Repo(m) => m.rev.clone(),
                    SearchMatch::File(m) => m.rev.clone(),
                    SearchMatch::Commit(_) => None,
                },
            })),
            SelectKind::File => match self {
                SearchMatch::File(m) => Some(SearchMatch::File(FileMatch {
                    repo: m.repo.clone(),
                    path: m.path.clone(),
                    rev: m.rev.clone(),
                    lines: Vec::new(),
                    limit_hit: false,
                })),
                _ => None,
            },
            SelectKind::Commit => match self {
                SearchMatch::Commit(m) => Some(SearchMatch::Commit(m.clone())),
                _ => None,
            },
        }
    }

    /// Secondary sort key within one repository.
    fn within_repo_key(&self) -> (u8, &str) {
        match self {
            SearchMatch::Repo(_) => (0, ""),
            SearchMatch::File(m) => (1, m.path.as_str()),
            SearchMatch::Commit(m) => (2, m.commit.as_str()),
        }
    }
}

impl Ord for SearchMatch {
    fn cmp(&self, other: &Self) -> Ordering {
        self.repo()
            .cmp(other.repo())
            .then_with(|| self.within_repo_key().cmp(&other.within_repo_key()))
    }
}

impl PartialOrd for SearchMatch {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn repo(name: &str) -> Repository {
        Repository {
            id: 0,
            name: name.into(),
        }
    }

    fn file(repo_name: &str, path: &str, n_lines: usize) -> SearchMatch {
        SearchMatch::File(FileMatch {
            repo: repo(repo_name),
            path: path.into(),
            rev: None,
            lines: (0..n_lines)
                .map(|i| LineMatch {
                    line: i as u32,
                    text: "x".into(),
                    ranges: vec![(0, 1)],
                })
                .collect(),
            limit_hit: false,
        })
    }

    #[test]
    fn order_is_repo_then_path() {
        let mut ms = vec![
            file("b/repo", "a.rs", 1),
            file("a/repo", "z.rs", 1),
            file("a/repo", "a.rs", 1),
        ];
        ms.sort();
        let paths: Vec<_> = ms
            .iter()
            .map(|m| match m {
                SearchMatch::File(f) => (f.repo.name.as_str(), f.path.as_str()),
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(
            paths,
            vec![("a/repo", "a.rs"), ("a/repo", "z.rs"), ("b/repo", "a.rs")]
        );
    }

    #[test]
    fn path_match_counts_once() {
        assert_eq!(file("r", "p", 0).result_count(), 1);
        assert_eq!(file("r", "p", 3).result_count(), 3);
    }

    #[test]
    fn commit_match_counts_its_ranges() {
        let commit = SearchMatch::Commit(CommitMatch {
            repo: repo("r"),
            commit: "abc123".into(),
            kind: CommitMatchKind::Commit,
            preview: "fix the thing".into(),
            ranges: vec![(0, 3), (4, 7)],
        });
        assert_eq!(commit.result_count(), 2);
    }

    #[test]
    fn select_repo_is_lossy() {
        let projected = file("r", "p", 2).select(SelectKind::Repo).unwrap();
        match projected {
            SearchMatch::Repo(m) => assert_eq!(m.repo.name, "r"),
            other => panic!("expected repo match, got {other:?}"),
        }
    }

    #[test]
    fn select_commit_drops_files() {
        assert!(file("r", "p", 1).select(SelectKind::Commit).is_none());
    }

    #[test]
    fn identical_files_share_a_key() {
        assert_eq!(file("r", "p", 1).key(), file("r", "p", 5).key());
        assert_ne!(file("r", "p", 1).key(), file("r", "q", 1).key());
    }
}
