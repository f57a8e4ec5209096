use anyhow::Result;
use clap::{Parser, Subcommand};
use search_core::backend::memory::{MemoryBackend, MemoryRepo};
use search_core::backend::RepoFilters;
use search_core::config::Config;
use search_core::jobs::render_tree;
use search_core::pagination::{PagedSearcher, PlanBatchExecutor, SearchCursor};
use search_core::query::{parse, PatternKind};
use search_core::results::SearchMatch;
use search_core::telemetry::{init_telemetry, shutdown_telemetry};
use search_core::{CompileConfig, Compiler, PlanEvaluator};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, Level};
use walkdir::WalkDir;

/// search-core - query-plan search over local directories
#[derive(Parser, Debug)]
#[command(name = "search-core")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Generate a template configuration file and exit
    #[arg(long, value_name = "FILE")]
    init: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse a query and print its compiled job tree
    Explain {
        /// The search query
        query: String,

        /// Interpret bare patterns as regular expressions
        #[arg(short, long)]
        regex: bool,
    },
    /// Run a query over one or more local directories
    Run {
        /// The search query
        query: String,

        /// Directories to search; each becomes one repository
        #[arg(short, long = "path", value_name = "DIR", required = true)]
        paths: Vec<PathBuf>,

        /// Interpret bare patterns as regular expressions
        #[arg(short, long)]
        regex: bool,

        /// Page through results instead of returning one batch
        #[arg(long, value_name = "N")]
        page_size: Option<usize>,

        /// Print matches as JSON lines
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Handle --init flag: generate template config and exit
    if let Some(init_path) = args.init {
        let path = if init_path.as_os_str().is_empty() {
            PathBuf::from("search_core.toml")
        } else {
            init_path
        };

        if path.exists() {
            eprintln!("Error: Config file already exists: {}", path.display());
            eprintln!("Remove it first or choose a different path.");
            std::process::exit(1);
        }

        Config::write_template(&path)?;
        println!("✓ Generated config file: {}", path.display());
        return Ok(());
    }

    let config = load_config(&args)?;
    let telemetry = config.telemetry.clone().with_env_overrides();
    let log_level = if args.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_telemetry(
        telemetry.enabled,
        &telemetry.otlp_endpoint,
        &telemetry.service_name,
        log_level,
    )?;

    let outcome = match args.command {
        Some(Commands::Explain { query, regex }) => explain(&config, &query, regex).await,
        Some(Commands::Run {
            query,
            paths,
            regex,
            page_size,
            json,
        }) => run(&config, &query, &paths, regex, page_size, json).await,
        None => {
            eprintln!("No command given. Try `search-core explain <query>`.");
            std::process::exit(2);
        }
    };

    shutdown_telemetry();
    outcome
}

async fn explain(config: &Config, query: &str, regex: bool) -> Result<()> {
    let kind = if regex {
        PatternKind::Regex
    } else {
        PatternKind::Literal
    };
    let plan = parse(query, kind)?;
    println!("plan: {} clause(s)", plan.len());

    // Compile against an empty backend; the shape of the tree is what
    // matters here.
    let compiler = Compiler::new(
        MemoryBackend::new(Vec::new()).into_backends(),
        CompileConfig::default(),
    );
    for (i, clause) in plan.clauses().iter().enumerate() {
        let job = compiler
            .compile(clause, config.evaluation.default_max_results, false)
            .await?;
        println!("clause {i}:");
        print!("{}", render_tree(&job));
    }
    Ok(())
}

async fn run(
    config: &Config,
    query: &str,
    paths: &[PathBuf],
    regex: bool,
    page_size: Option<usize>,
    json: bool,
) -> Result<()> {
    let kind = if regex {
        PatternKind::Regex
    } else {
        PatternKind::Literal
    };
    let plan = parse(query, kind)?;

    let mut repos = Vec::new();
    for (i, path) in paths.iter().enumerate() {
        repos.push(load_repo(i as u32 + 1, path)?);
    }
    info!(repos = repos.len(), "loaded repositories");
    let backends = MemoryBackend::new(repos).into_backends();
    let evaluator = PlanEvaluator::new(
        Compiler::new(backends.clone(), config.compile_config()),
        config.evaluation.clone(),
    );

    if let Some(page_size) = page_size {
        let searcher = PagedSearcher::new(
            backends.resolver,
            Arc::new(PlanBatchExecutor::new(evaluator, plan)),
            config.pagination.repo_count_ttl(),
        );
        let mut cursor = SearchCursor::start();
        let mut page_no = 0;
        loop {
            let page = searcher
                .search_page(&RepoFilters::default(), page_size, cursor)
                .await?;
            if !page.matches.is_empty() {
                if !json {
                    println!("--- page {page_no} ---");
                }
                for m in &page.matches {
                    print_match(m, json)?;
                }
            }
            cursor = page.cursor;
            page_no += 1;
            if cursor.finished {
                break;
            }
        }
        return Ok(());
    }

    let results = evaluator.evaluate(&plan).await?;
    for m in &results.matches {
        print_match(m, json)?;
    }
    if let Some(alert) = &results.alert {
        eprintln!("alert: {}", alert.title);
        if let Some(desc) = &alert.description {
            eprintln!("  {desc}");
        }
    }
    println!(
        "{} result(s), {} repositories searched",
        results.approximate_result_count(),
        results.stats.searched.len()
    );
    Ok(())
}

/// Load one directory as an in-memory repository. Binary and oversized
/// files are skipped.
fn load_repo(id: u32, root: &Path) -> Result<MemoryRepo> {
    const MAX_FILE_SIZE: u64 = 1024 * 1024;

    let name = root
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| root.display().to_string());
    let mut repo = MemoryRepo::new(id, name);

    for entry in WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git" && e.file_name() != "target")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
    {
        if entry.metadata().map(|m| m.len() > MAX_FILE_SIZE).unwrap_or(true) {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(entry.path()) else {
            continue;
        };
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .replace('\\', "/");
        repo = repo.file(rel, content);
    }
    Ok(repo)
}

fn print_match(m: &SearchMatch, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(m)?);
        return Ok(());
    }
    match m {
        SearchMatch::Repo(r) => println!("{}", r.repo.name),
        SearchMatch::File(f) => {
            if f.lines.is_empty() {
                println!("{}:{}", f.repo.name, f.path);
            }
            for line in &f.lines {
                println!("{}:{}:{}: {}", f.repo.name, f.path, line.line + 1, line.text);
            }
        }
        SearchMatch::Commit(c) => {
            println!("{}@{}: {}", c.repo.name, c.commit, c.preview.lines().next().unwrap_or(""))
        }
    }
    Ok(())
}

fn load_config(args: &Args) -> Result<Config> {
    let base_config = if let Some(ref config_path) = args.config {
        // Explicit config file specified
        if !config_path.exists() {
            anyhow::bail!(
                "Config file not found: {}\nUse --init {} to generate a template.",
                config_path.display(),
                config_path.display()
            );
        }
        Config::from_file(config_path)?
    } else {
        // Try default locations
        match Config::from_default_locations()? {
            Some((config, _path)) => config,
            None => Config::default(),
        }
    };
    Ok(base_config)
}
