//! Identity-keyed result deduplication with line-level merging.

use rustc_hash::FxHashMap;

use super::{MatchKey, SearchMatch};

/// Collects matches, merging duplicates by identity key. Two file matches
/// for the same (repo, path, rev) merge their line matches; anything else
/// with the same key keeps the first occurrence.
#[derive(Debug, Default)]
pub struct Deduper {
    seen: FxHashMap<MatchKey, usize>,
    items: Vec<SearchMatch>,
}

impl Deduper {
    pub fn new() -> Deduper {
        Deduper::default()
    }

    /// Add one match, merging it into an existing entry if the key is known.
    /// Returns true when the match was new.
    pub fn add(&mut self, m: SearchMatch) -> bool {
        let key = m.key();
        match self.seen.get(&key) {
            Some(&idx) => {
                merge_into(&mut self.items[idx], m);
                false
            }
            None => {
                self.seen.insert(key, self.items.len());
                self.items.push(m);
                true
            }
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Deduplicated matches in insertion order.
    pub fn into_results(self) -> Vec<SearchMatch> {
        self.items
    }
}

fn merge_into(existing: &mut SearchMatch, incoming: SearchMatch) {
    match (existing, incoming) {
        (SearchMatch::File(a), SearchMatch::File(b)) => {
            for line in b.lines {
                if !a.lines.contains(&line) {
                    a.lines.push(line);
                }
            }
            a.lines.sort_by_key(|l| l.line);
            a.limit_hit |= b.limit_hit;
        }
        (SearchMatch::Commit(a), SearchMatch::Commit(b)) => {
            for range in b.ranges {
                if !a.ranges.contains(&range) {
                    a.ranges.push(range);
                }
            }
        }
        // Same key, nothing further to merge.
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::results::{FileMatch, LineMatch, RepoMatch, Repository};

    fn repo() -> Repository {
        Repository {
            id: 1,
            name: "r".into(),
        }
    }

    fn file_with_lines(lines: &[u32]) -> SearchMatch {
        SearchMatch::File(FileMatch {
            repo: repo(),
            path: "src/lib.rs".into(),
            rev: None,
            lines: lines
                .iter()
                .map(|&n| LineMatch {
                    line: n,
                    text: format!("line {n}"),
                    ranges: vec![(0, 4)],
                })
                .collect(),
            limit_hit: false,
        })
    }

    #[test]
    fn duplicate_files_merge_lines() {
        let mut d = Deduper::new();
        assert!(d.add(file_with_lines(&[3, 1])));
        assert!(!d.add(file_with_lines(&[2, 3])));
        let results = d.into_results();
        assert_eq!(results.len(), 1);
        match &results[0] {
            SearchMatch::File(f) => {
                let nums: Vec<u32> = f.lines.iter().map(|l| l.line).collect();
                assert_eq!(nums, vec![1, 2, 3]);
            }
            other => panic!("expected file match, got {other:?}"),
        }
    }

    #[test]
    fn distinct_paths_stay_separate() {
        let mut d = Deduper::new();
        d.add(file_with_lines(&[1]));
        d.add(SearchMatch::Repo(RepoMatch {
            repo: repo(),
            rev: None,
        }));
        assert_eq!(d.len(), 2);
    }

    #[test]
    fn duplicate_repo_matches_collapse() {
        let mut d = Deduper::new();
        let m = SearchMatch::Repo(RepoMatch {
            repo: repo(),
            rev: None,
        });
        assert!(d.add(m.clone()));
        assert!(!d.add(m));
        assert_eq!(d.len(), 1);
    }
}
