//! End-to-end pagination tests: a paged walk over an in-memory corpus must
//! return every result exactly once, in order, resuming correctly across
//! page boundaries that fall inside a repository.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use search_core::backend::memory::{MemoryBackend, MemoryRepo};
use search_core::backend::RepoFilters;
use search_core::compile::CompileConfig;
use search_core::pagination::PlanBatchExecutor;
use search_core::query::{parse, PatternKind};
use search_core::{Compiler, EvalConfig, PagedSearcher, PlanEvaluator, SearchCursor};

fn corpus(repos: usize, files_per_repo: usize) -> MemoryBackend {
    MemoryBackend::new(
        (0..repos)
            .map(|i| {
                let mut repo = MemoryRepo::new(i as u32 + 1, format!("corpus/repo-{i:03}"));
                for f in 0..files_per_repo {
                    repo = repo.file(format!("file-{f}.txt"), "one needle here\n");
                }
                repo
            })
            .collect(),
    )
}

fn searcher(backend: MemoryBackend, query: &str) -> Result<PagedSearcher> {
    let backends = backend.into_backends();
    let evaluator = PlanEvaluator::new(
        Compiler::new(backends.clone(), CompileConfig::default()),
        EvalConfig::default(),
    );
    let plan = parse(query, PatternKind::Literal)?;
    Ok(PagedSearcher::new(
        backends.resolver,
        Arc::new(PlanBatchExecutor::new(evaluator, plan)),
        Duration::from_secs(30),
    ))
}

#[tokio::test]
async fn pages_cover_the_corpus_exactly_once() -> Result<()> {
    let searcher = searcher(corpus(15, 4), "count:1000 needle")?;
    let filters = RepoFilters::default();

    let mut cursor = SearchCursor::start();
    let mut all = Vec::new();
    let mut pages = 0;
    loop {
        let page = searcher.search_page(&filters, 7, cursor).await?;
        all.extend(page.matches);
        pages += 1;
        assert!(pages < 100, "pagination did not terminate");
        if page.cursor.finished {
            break;
        }
        cursor = page.cursor;
    }

    // 15 repos x 4 files, no duplicates, fully ordered.
    assert_eq!(all.len(), 60);
    let mut sorted = all.clone();
    sorted.sort();
    assert_eq!(all, sorted);
    let distinct: BTreeSet<_> = all
        .iter()
        .map(|m| (m.repo().name.clone(), format!("{m:?}")))
        .collect();
    assert_eq!(distinct.len(), 60);
    Ok(())
}

#[tokio::test]
async fn cursor_survives_a_round_trip_through_its_token() -> Result<()> {
    let searcher = searcher(corpus(12, 3), "count:1000 needle")?;
    let filters = RepoFilters::default();

    let first = searcher
        .search_page(&filters, 5, SearchCursor::start())
        .await?;
    assert_eq!(first.matches.len(), 5);
    assert!(!first.cursor.finished);

    // Encode and decode as a client would between requests.
    let token = first.cursor.encode();
    let resumed = SearchCursor::decode(&token)?;
    assert_eq!(resumed, first.cursor);

    let second = searcher.search_page(&filters, 5, resumed).await?;
    assert_eq!(second.matches.len(), 5);
    assert_ne!(first.matches.last(), second.matches.first());
    Ok(())
}

#[tokio::test]
async fn boundary_inside_a_repository_resumes_without_gaps() -> Result<()> {
    // 5 files per repo with a page size of 3 forces every boundary to fall
    // mid-repository.
    let searcher = searcher(corpus(4, 5), "count:1000 needle")?;
    let filters = RepoFilters::default();

    let mut cursor = SearchCursor::start();
    let mut paged = Vec::new();
    loop {
        let page = searcher.search_page(&filters, 3, cursor).await?;
        paged.extend(page.matches);
        if page.cursor.finished {
            break;
        }
        cursor = page.cursor;
    }

    // A single unpaginated walk must agree with the stitched pages.
    let whole = searcher
        .search_page(&filters, 1000, SearchCursor::start())
        .await?;
    assert!(whole.cursor.finished);
    assert_eq!(paged, whole.matches);
    Ok(())
}

#[tokio::test]
async fn finished_cursor_yields_an_empty_page() -> Result<()> {
    let searcher = searcher(corpus(2, 1), "count:1000 needle")?;
    let filters = RepoFilters::default();

    let page = searcher
        .search_page(&filters, 100, SearchCursor::start())
        .await?;
    assert_eq!(page.matches.len(), 2);
    assert!(page.cursor.finished);

    let after = searcher.search_page(&filters, 100, page.cursor).await?;
    assert!(after.matches.is_empty());
    assert!(after.cursor.finished);
    Ok(())
}
