//! In-memory backend used by the CLI and the test suites. One `MemoryBackend`
//! implements every backend trait over a set of repositories loaded into
//! memory, with naive scanning standing in for the real index.

use std::sync::Arc;

use async_trait::async_trait;
use regex::{Regex, RegexBuilder};

use super::{
    BackendResponse, Backends, CommitBackend, CommitQuery, IndexQuery, IndexScope, IndexedBackend,
    RepoFilters, RepoResolver, RepoRevisions, ResolvedRepos, StructuralBackend, StructuralQuery,
    SymbolBackend, SymbolQuery, TextQuery, UnindexedBackend,
};
use crate::error::SearchError;
use crate::results::{
    CommitMatch, CommitMatchKind, FileMatch, LineMatch, Repository, SearchMatch, Stats,
};

#[derive(Debug, Clone)]
pub struct MemoryCommit {
    pub id: String,
    pub message: String,
    pub diff: String,
}

#[derive(Debug, Clone)]
pub struct MemoryRepo {
    pub repo: Repository,
    pub fork: bool,
    pub archived: bool,
    pub visibility: String,
    pub branches: Vec<String>,
    /// Present in the trigram index. Unindexed repos are only reachable
    /// through the on-demand searcher.
    pub indexed: bool,
    pub files: Vec<(String, String)>,
    pub commits: Vec<MemoryCommit>,
}

impl MemoryRepo {
    pub fn new(id: u32, name: impl Into<String>) -> MemoryRepo {
        MemoryRepo {
            repo: Repository {
                id,
                name: name.into(),
            },
            fork: false,
            archived: false,
            visibility: "public".into(),
            branches: vec!["main".into()],
            indexed: true,
            files: Vec::new(),
            commits: Vec::new(),
        }
    }

    pub fn file(mut self, path: impl Into<String>, content: impl Into<String>) -> MemoryRepo {
        self.files.push((path.into(), content.into()));
        self
    }

    pub fn commit(
        mut self,
        id: impl Into<String>,
        message: impl Into<String>,
        diff: impl Into<String>,
    ) -> MemoryRepo {
        self.commits.push(MemoryCommit {
            id: id.into(),
            message: message.into(),
            diff: diff.into(),
        });
        self
    }

    pub fn fork(mut self) -> MemoryRepo {
        self.fork = true;
        self
    }

    pub fn archived(mut self) -> MemoryRepo {
        self.archived = true;
        self
    }

    pub fn unindexed(mut self) -> MemoryRepo {
        self.indexed = false;
        self
    }
}

#[derive(Debug, Default)]
pub struct MemoryBackend {
    repos: Vec<MemoryRepo>,
}

impl MemoryBackend {
    pub fn new(mut repos: Vec<MemoryRepo>) -> MemoryBackend {
        repos.sort_by(|a, b| a.repo.cmp(&b.repo));
        MemoryBackend { repos }
    }

    /// Wire one shared backend into every collaborator slot.
    pub fn into_backends(self) -> Backends {
        let shared = Arc::new(self);
        Backends {
            resolver: shared.clone(),
            indexed: shared.clone(),
            unindexed: shared.clone(),
            symbols: shared.clone(),
            commits: shared.clone(),
            structural: shared,
        }
    }

    fn repo_by_name(&self, name: &str) -> Option<&MemoryRepo> {
        self.repos.iter().find(|r| r.repo.name == name)
    }

    fn scoped<'a>(&'a self, scope: &IndexScope) -> Vec<&'a MemoryRepo> {
        match scope {
            IndexScope::Universe => self.repos.iter().filter(|r| r.indexed).collect(),
            IndexScope::Repos(list) => list
                .iter()
                .filter_map(|rr| self.repo_by_name(&rr.repo.name))
                .collect(),
        }
    }

    fn search_files(
        &self,
        repos: &[&MemoryRepo],
        pattern: &Regex,
        include_paths: &[Regex],
        exclude_paths: &[Regex],
        languages: &[String],
        limit: usize,
        path_only: bool,
        indexed: bool,
    ) -> BackendResponse {
        let mut response = BackendResponse::default();
        'repos: for repo in repos {
            response.stats.searched.insert(repo.repo.clone());
            if indexed {
                response.stats.indexed.insert(repo.repo.clone());
            }
            for (path, content) in &repo.files {
                if !include_paths.is_empty() && !include_paths.iter().all(|re| re.is_match(path)) {
                    continue;
                }
                if exclude_paths.iter().any(|re| re.is_match(path)) {
                    continue;
                }
                if !languages.is_empty() && !languages.iter().any(|l| language_matches(l, path)) {
                    continue;
                }
                let m = if path_only {
                    pattern.is_match(path).then(|| FileMatch {
                        repo: repo.repo.clone(),
                        path: path.clone(),
                        rev: None,
                        lines: Vec::new(),
                        limit_hit: false,
                    })
                } else {
                    match_lines(&repo.repo, path, content, pattern)
                };
                if let Some(m) = m {
                    response.stats.result_count += m.lines.len().max(1);
                    response.matches.push(SearchMatch::File(m));
                    if response.matches.len() >= limit {
                        response.stats.limit_hit = true;
                        break 'repos;
                    }
                }
            }
        }
        response
    }
}

fn compile_pattern(
    pattern: &str,
    is_regex: bool,
    case_sensitive: bool,
) -> Result<Regex, SearchError> {
    let source = if is_regex {
        pattern.to_string()
    } else {
        regex::escape(pattern)
    };
    RegexBuilder::new(&source)
        .case_insensitive(!case_sensitive)
        .build()
        .map_err(|source| SearchError::InvalidRegex {
            field: "content",
            source,
        })
}

fn compile_paths(patterns: &[String]) -> Result<Vec<Regex>, SearchError> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|source| SearchError::InvalidRegex {
                field: "file",
                source,
            })
        })
        .collect()
}

fn language_matches(lang: &str, path: &str) -> bool {
    let ext = path.rsplit('.').next().unwrap_or("");
    match lang.to_ascii_lowercase().as_str() {
        "rust" => ext == "rs",
        "go" => ext == "go",
        "python" => ext == "py",
        "typescript" => ext == "ts" || ext == "tsx",
        "javascript" => ext == "js" || ext == "jsx",
        "markdown" => ext == "md",
        other => ext == other,
    }
}

fn match_lines(repo: &Repository, path: &str, content: &str, re: &Regex) -> Option<FileMatch> {
    let mut lines = Vec::new();
    for (i, line) in content.lines().enumerate() {
        let ranges: Vec<(u32, u32)> = re
            .find_iter(line)
            .map(|m| (m.start() as u32, (m.end() - m.start()) as u32))
            .collect();
        if !ranges.is_empty() {
            lines.push(LineMatch {
                line: i as u32,
                text: line.to_string(),
                ranges,
            });
        }
    }
    if lines.is_empty() {
        return None;
    }
    Some(FileMatch {
        repo: repo.clone(),
        path: path.to_string(),
        rev: None,
        lines,
        limit_hit: false,
    })
}

#[async_trait]
impl RepoResolver for MemoryBackend {
    async fn resolve(&self, filters: &RepoFilters) -> Result<ResolvedRepos, SearchError> {
        let include = compile_paths(&filters.include)?;
        let exclude = compile_paths(&filters.exclude)?;
        let mut resolved = ResolvedRepos::default();
        for repo in &self.repos {
            if !include.is_empty() && !include.iter().all(|re| re.is_match(&repo.repo.name)) {
                continue;
            }
            if exclude.iter().any(|re| re.is_match(&repo.repo.name)) {
                continue;
            }
            if repo.fork && !filters.include_forks {
                resolved.excluded_forks += 1;
                continue;
            }
            if repo.archived && !filters.include_archived {
                resolved.excluded_archived += 1;
                continue;
            }
            if let Some(vis) = &filters.visibility {
                if &repo.visibility != vis {
                    continue;
                }
            }
            if let Some(limit) = filters.limit {
                if resolved.repos.len() >= limit {
                    resolved.over_limit = true;
                    break;
                }
            }
            let mut revs = Vec::new();
            for rev in &filters.revs {
                if repo.branches.iter().any(|b| b == rev) {
                    revs.push(rev.clone());
                } else {
                    resolved.missing_revs.push(format!("{}@{}", repo.repo.name, rev));
                }
            }
            if !filters.revs.is_empty() && revs.is_empty() {
                continue;
            }
            resolved.repos.push(RepoRevisions {
                repo: repo.repo.clone(),
                revs,
            });
        }
        Ok(resolved)
    }

    async fn count(&self) -> Result<usize, SearchError> {
        Ok(self.repos.len())
    }
}

#[async_trait]
impl IndexedBackend for MemoryBackend {
    async fn search(&self, query: &IndexQuery) -> Result<BackendResponse, SearchError> {
        let re = compile_pattern(&query.pattern, query.is_regex, query.case_sensitive)?;
        let include = compile_paths(&query.include_paths)?;
        let exclude = compile_paths(&query.exclude_paths)?;
        let repos = self.scoped(&query.scope);
        Ok(self.search_files(
            &repos,
            &re,
            &include,
            &exclude,
            &query.languages,
            query.file_match_limit,
            query.path_only,
            true,
        ))
    }

    async fn indexed_repos(
        &self,
        candidates: &[RepoRevisions],
    ) -> Result<Vec<Repository>, SearchError> {
        Ok(candidates
            .iter()
            .filter(|rr| {
                self.repo_by_name(&rr.repo.name)
                    .is_some_and(|r| r.indexed)
            })
            .map(|rr| rr.repo.clone())
            .collect())
    }
}

#[async_trait]
impl UnindexedBackend for MemoryBackend {
    async fn search(&self, query: &TextQuery) -> Result<BackendResponse, SearchError> {
        let re = compile_pattern(&query.pattern, query.is_regex, query.case_sensitive)?;
        let include = compile_paths(&query.include_paths)?;
        let exclude = compile_paths(&query.exclude_paths)?;
        let repos: Vec<&MemoryRepo> = query
            .repos
            .iter()
            .filter_map(|rr| self.repo_by_name(&rr.repo.name))
            .collect();
        Ok(self.search_files(
            &repos,
            &re,
            &include,
            &exclude,
            &query.languages,
            query.file_match_limit,
            query.path_only,
            false,
        ))
    }
}

#[async_trait]
impl SymbolBackend for MemoryBackend {
    async fn search(&self, query: &SymbolQuery) -> Result<BackendResponse, SearchError> {
        let re = compile_pattern(&query.pattern, true, query.case_sensitive)?;
        let include = compile_paths(&query.include_paths)?;
        let mut response = BackendResponse::default();
        'repos: for repo in self.scoped(&query.scope) {
            response.stats.searched.insert(repo.repo.clone());
            for (path, content) in &repo.files {
                if !include.is_empty() && !include.iter().all(|p| p.is_match(path)) {
                    continue;
                }
                let mut lines = Vec::new();
                for (i, line) in content.lines().enumerate() {
                    if !looks_like_definition(line) {
                        continue;
                    }
                    let ranges: Vec<(u32, u32)> = re
                        .find_iter(line)
                        .map(|m| (m.start() as u32, (m.end() - m.start()) as u32))
                        .collect();
                    if !ranges.is_empty() {
                        lines.push(LineMatch {
                            line: i as u32,
                            text: line.to_string(),
                            ranges,
                        });
                    }
                }
                if lines.is_empty() {
                    continue;
                }
                response.stats.result_count += lines.len();
                response.matches.push(SearchMatch::File(FileMatch {
                    repo: repo.repo.clone(),
                    path: path.clone(),
                    rev: None,
                    lines,
                    limit_hit: false,
                }));
                if response.matches.len() >= query.limit {
                    response.stats.limit_hit = true;
                    break 'repos;
                }
            }
        }
        Ok(response)
    }
}

fn looks_like_definition(line: &str) -> bool {
    let trimmed = line.trim_start();
    ["fn ", "pub fn ", "struct ", "pub struct ", "enum ", "trait ", "func ", "def ", "class "]
        .iter()
        .any(|kw| trimmed.starts_with(kw))
}

#[async_trait]
impl CommitBackend for MemoryBackend {
    async fn search(&self, query: &CommitQuery) -> Result<BackendResponse, SearchError> {
        let re = compile_pattern(&query.pattern, query.is_regex, query.case_sensitive)?;
        let mut response = BackendResponse::default();
        'repos: for rr in &query.repos {
            let Some(repo) = self.repo_by_name(&rr.repo.name) else {
                continue;
            };
            response.stats.searched.insert(repo.repo.clone());
            for commit in &repo.commits {
                let haystack = if query.diff { &commit.diff } else { &commit.message };
                let ranges: Vec<(u32, u32)> = re
                    .find_iter(haystack)
                    .map(|m| (m.start() as u32, (m.end() - m.start()) as u32))
                    .collect();
                if ranges.is_empty() {
                    continue;
                }
                response.stats.result_count += 1;
                response.matches.push(SearchMatch::Commit(CommitMatch {
                    repo: repo.repo.clone(),
                    commit: commit.id.clone(),
                    kind: if query.diff {
                        CommitMatchKind::Diff
                    } else {
                        CommitMatchKind::Commit
                    },
                    preview: haystack.clone(),
                    ranges,
                }));
                if response.matches.len() >= query.limit {
                    response.stats.limit_hit = true;
                    break 'repos;
                }
            }
        }
        Ok(response)
    }
}

#[async_trait]
impl StructuralBackend for MemoryBackend {
    async fn search(&self, query: &StructuralQuery) -> Result<BackendResponse, SearchError> {
        // Holes (`:[name]`) become non-greedy wildcards; everything else is
        // matched verbatim.
        let re = structural_to_regex(&query.pattern)?;
        let include = compile_paths(&query.include_paths)?;
        let repos: Vec<&MemoryRepo> = query
            .repos
            .iter()
            .filter_map(|rr| self.repo_by_name(&rr.repo.name))
            .collect();
        Ok(self.search_files(
            &repos,
            &re,
            &include,
            &[],
            &query.languages,
            query.file_match_limit,
            false,
            false,
        ))
    }
}

fn structural_to_regex(pattern: &str) -> Result<Regex, SearchError> {
    let mut source = String::new();
    let mut rest = pattern;
    while let Some(start) = rest.find(":[") {
        source.push_str(&regex::escape(&rest[..start]));
        match rest[start..].find(']') {
            Some(end) => {
                source.push_str(".*?");
                rest = &rest[start + end + 1..];
            }
            None => {
                source.push_str(&regex::escape(&rest[start..]));
                rest = "";
            }
        }
    }
    source.push_str(&regex::escape(rest));
    Regex::new(&source).map_err(|source| SearchError::InvalidRegex {
        field: "content",
        source,
    })
}
