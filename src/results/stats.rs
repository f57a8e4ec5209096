//! Aggregate statistics accumulated across backends and clauses.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::Repository;

/// Search-wide statistics. `merge` is associative and commutative, so
/// partial stats from concurrently running jobs can be folded in any order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Some backend truncated its results.
    pub limit_hit: bool,
    pub searched: BTreeSet<Repository>,
    pub indexed: BTreeSet<Repository>,
    pub cloning: BTreeSet<Repository>,
    pub missing: BTreeSet<Repository>,
    pub timed_out: BTreeSet<Repository>,
    /// Repositories only partially searched (e.g. per-repo deadline).
    pub partial: BTreeSet<Repository>,
    pub excluded_forks: usize,
    pub excluded_archived: usize,
    /// Line-granularity result count, including results later discarded by
    /// the budget or dedup.
    pub result_count: usize,
    /// An indexed backend was unreachable and the search degraded.
    pub index_unavailable: bool,
}

impl Stats {
    pub fn merge(&mut self, other: &Stats) {
        self.limit_hit |= other.limit_hit;
        self.searched.extend(other.searched.iter().cloned());
        self.indexed.extend(other.indexed.iter().cloned());
        self.cloning.extend(other.cloning.iter().cloned());
        self.missing.extend(other.missing.iter().cloned());
        self.timed_out.extend(other.timed_out.iter().cloned());
        self.partial.extend(other.partial.iter().cloned());
        self.excluded_forks += other.excluded_forks;
        self.excluded_archived += other.excluded_archived;
        self.result_count += other.result_count;
        self.index_unavailable |= other.index_unavailable;
    }

    /// True when any repository was skipped, truncated or only partially
    /// searched. Drives the "approximate count" presentation.
    pub fn is_incomplete(&self) -> bool {
        self.limit_hit
            || !self.cloning.is_empty()
            || !self.missing.is_empty()
            || !self.timed_out.is_empty()
            || !self.partial.is_empty()
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

    fn sample(a: &str, count: usize) -> Stats {
        let mut s = Stats::default();
        s.searched.insert(repo(a));
        s.result_count = count;
        s
    }

    #[test]
    fn merge_is_commutative() {
        let a = sample("a", 2);
        let b = sample("b", 3);

        let mut ab = a.clone();
        ab.merge(&b);
        let mut ba = b.clone();
        ba.merge(&a);
        assert_eq!(ab, ba);
        assert_eq!(ab.result_count, 5);
        assert_eq!(ab.searched.len(), 2);
    }

    #[test]
    fn merge_is_associative() {
        let a = sample("a", 1);
        let b = sample("b", 1);
        let c = sample("c", 1);

        let mut left = a.clone();
        left.merge(&b);
        left.merge(&c);

        let mut bc = b.clone();
        bc.merge(&c);
        let mut right = a.clone();
        right.merge(&bc);

        assert_eq!(left, right);
    }

    #[test]
    fn repo_sets_deduplicate() {
        let mut s = sample("a", 1);
        s.merge(&sample("a", 1));
        assert_eq!(s.searched.len(), 1);
        assert_eq!(s.result_count, 2);
    }

    #[test]
    fn incompleteness_signals() {
        let mut s = Stats::default();
        assert!(!s.is_incomplete());
        s.timed_out.insert(repo("slow"));
        assert!(s.is_incomplete());
    }
}
