use anyhow::{bail, Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tcg_core::error::PoolError;
use tcg_core::{
    load_config, AppConfig, GenerationRequest, GenerationResult, Label, Pipeline, RequestHandle,
    WorkerPool,
};
use tcg_knowledge::{KnowledgeStore, KnowledgeType, SearchFilter};
use tracing_subscriber::EnvFilter;

fn cli() -> Command {
    Command::new("tcg")
        .version(tcg_core::VERSION)
        .about("Knowledge-backed test case generation for automotive controllers")
        .subcommand_required(true)
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::Count)
                .help("Raise log verbosity (-v debug, -vv trace)"),
        )
        .subcommand(
            Command::new("generate")
                .about("Generate one test case from a requirement")
                .arg(
                    Arg::new("requirement")
                        .long("requirement")
                        .short('r')
                        .required(true)
                        .help("Requirement text"),
                )
                .arg(
                    Arg::new("standard")
                        .long("standard")
                        .action(ArgAction::Append)
                        .help("Applicable standard, e.g. \"ISO 26262\" (repeatable)"),
                )
                .arg(
                    Arg::new("spec-file")
                        .long("spec-file")
                        .action(ArgAction::Append)
                        .value_parser(value_parser!(PathBuf))
                        .help("Specification document to analyze (repeatable)"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the full result as JSON"),
                ),
        )
        .subcommand(
            Command::new("batch")
                .about("Generate test cases for every line of a file through the worker pool")
                .arg(
                    Arg::new("file")
                        .long("file")
                        .short('f')
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("File with one requirement per line"),
                ),
        )
        .subcommand(
            Command::new("kb")
                .about("Knowledge base maintenance")
                .subcommand_required(true)
                .subcommand(Command::new("seed").about("Insert the built-in seed knowledge"))
                .subcommand(
                    Command::new("search")
                        .about("Hybrid search over the knowledge base")
                        .arg(Arg::new("query").required(true).help("Search text"))
                        .arg(
                            Arg::new("type")
                                .long("type")
                                .action(ArgAction::Append)
                                .help("Restrict to a knowledge type, e.g. best_practice"),
                        )
                        .arg(
                            Arg::new("top-k")
                                .long("top-k")
                                .value_parser(value_parser!(usize))
                                .help("Maximum number of hits"),
                        ),
                )
                .subcommand(
                    Command::new("export")
                        .about("Write every item to a JSON file")
                        .arg(Arg::new("path").required(true).value_parser(value_parser!(PathBuf))),
                )
                .subcommand(
                    Command::new("import")
                        .about("Load items from a JSON export")
                        .arg(Arg::new("path").required(true).value_parser(value_parser!(PathBuf))),
                )
                .subcommand(Command::new("stats").about("Show item counts and usage")),
        )
}

fn init_logging(verbosity: u8, json: bool) {
    let default = match verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn required<'a, T: Clone + Send + Sync + 'static>(args: &'a ArgMatches, name: &str) -> Result<&'a T> {
    args.get_one::<T>(name)
        .with_context(|| format!("missing argument --{name}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_logging(matches.get_count("verbose"), matches.get_flag("log-json"));

    let config = load_config(matches.get_one::<PathBuf>("config").map(PathBuf::as_path))
        .context("loading configuration")?;

    match matches.subcommand() {
        Some(("generate", args)) => cmd_generate(&config, args).await,
        Some(("batch", args)) => cmd_batch(&config, args).await,
        Some(("kb", args)) => cmd_kb(&config, args).await,
        Some((other, _)) => bail!("unknown command {other}"),
        None => bail!("no command given"),
    }
}

async fn cmd_generate(config: &AppConfig, args: &ArgMatches) -> Result<()> {
    let requirement = required::<String>(args, "requirement")?;
    let standards: Vec<String> = args
        .get_many::<String>("standard")
        .map(|v| v.cloned().collect())
        .unwrap_or_default();
    let spec_files: Vec<PathBuf> = args
        .get_many::<PathBuf>("spec-file")
        .map(|v| v.cloned().collect())
        .unwrap_or_default();

    let pipeline = Pipeline::from_config(config).await?;
    let request = GenerationRequest::new(requirement.as_str())
        .with_standards(standards)
        .with_spec_files(spec_files);
    let result = pipeline.generate(&request).await;
    save_snapshot(config, pipeline.store()).await?;

    if args.get_flag("json") {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        print_result(&result);
    }

    if !result.success {
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_batch(config: &AppConfig, args: &ArgMatches) -> Result<()> {
    let path = required::<PathBuf>(args, "file")?;
    let content = tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    let requirements: Vec<&str> = content.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if requirements.is_empty() {
        bail!("{} contains no requirements", path.display());
    }

    let pipeline = Arc::new(Pipeline::from_config(config).await?);
    let pool = WorkerPool::start(Arc::clone(&pipeline), &config.workflow);
    tracing::info!(count = requirements.len(), "batch started");

    let mut pending: VecDeque<RequestHandle> = VecDeque::new();
    let mut results: Vec<GenerationResult> = Vec::with_capacity(requirements.len());
    for requirement in requirements {
        let mut request = GenerationRequest::new(requirement);
        loop {
            match pool.submit(request) {
                Ok(handle) => {
                    pending.push_back(handle);
                    break;
                }
                Err(PoolError::QueueFull(_)) => {
                    // Drain the oldest request to make room, then resubmit.
                    let Some(oldest) = pending.pop_front() else {
                        bail!("queue full with nothing in flight");
                    };
                    results.push(oldest.wait().await?);
                    request = GenerationRequest::new(requirement);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
    while let Some(handle) = pending.pop_front() {
        results.push(handle.wait().await?);
    }

    let stats = pool.stats();
    pool.shutdown().await;
    save_snapshot(config, pipeline.store()).await?;

    for result in &results {
        let summary = match (&result.test_case, result.quality_score()) {
            (Some(case), Some(q)) => format!("{} ({} steps, quality {q:.2})", case.name, case.test_steps.len()),
            _ => result.error.clone().unwrap_or_default(),
        };
        println!("{}\t{}\t{summary}", result.request_id, result.status());
    }
    println!(
        "completed {} failed {} cancelled {} timed out {}",
        stats.completed, stats.failed, stats.cancelled, stats.timed_out
    );

    if results.iter().any(|r| !r.success) {
        std::process::exit(1);
    }
    Ok(())
}

async fn cmd_kb(config: &AppConfig, args: &ArgMatches) -> Result<()> {
    let store = open_store(config).await?;

    match args.subcommand() {
        Some(("seed", _)) => {
            let ids = store.seed_initial_knowledge().await?;
            save_snapshot(config, &store).await?;
            for id in ids {
                println!("{id}");
            }
        }
        Some(("search", sub)) => {
            let query = required::<String>(sub, "query")?;
            let mut filter = SearchFilter::new()
                .with_top_k(sub.get_one::<usize>("top-k").copied().unwrap_or(config.knowledge.default_top_k));
            if let Some(types) = sub.get_many::<String>("type") {
                let kinds = types
                    .map(|t| t.parse::<KnowledgeType>())
                    .collect::<Result<Vec<_>, _>>()?;
                filter = filter.with_types(kinds);
            }
            let hits = store.search(query, &filter).await?;
            if hits.is_empty() {
                println!("no matches");
            }
            for hit in hits {
                let preview: String = hit.item.content.chars().take(60).collect();
                println!(
                    "{:.3}\t{}\t{}\t{preview}",
                    hit.confidence,
                    hit.item.kind,
                    hit.item.id
                );
            }
        }
        Some(("export", sub)) => {
            let path = required::<PathBuf>(sub, "path")?;
            let count = store.export_to_file(path).await?;
            println!("exported {count} items to {}", path.display());
        }
        Some(("import", sub)) => {
            let path = required::<PathBuf>(sub, "path")?;
            let report = store.import_from_file(path).await?;
            save_snapshot(config, &store).await?;
            println!(
                "inserted {} updated {} skipped {}",
                report.inserted, report.updated, report.skipped
            );
        }
        Some(("stats", _)) => {
            println!("{}", serde_json::to_string_pretty(&store.stats())?);
        }
        Some((other, _)) => bail!("unknown kb command {other}"),
        None => bail!("no kb command given"),
    }
    Ok(())
}

/// Store over the configured snapshot, if one exists yet
async fn open_store(config: &AppConfig) -> Result<KnowledgeStore> {
    let store = KnowledgeStore::new(config.knowledge.clone());
    if let Some(path) = config.knowledge.snapshot_path.as_deref().filter(|p| p.exists()) {
        store
            .import_from_file(path)
            .await
            .with_context(|| format!("loading snapshot {}", path.display()))?;
    }
    Ok(store)
}

async fn save_snapshot(config: &AppConfig, store: &KnowledgeStore) -> Result<()> {
    let Some(path) = config.knowledge.snapshot_path.as_deref() else {
        return Ok(());
    };
    write_snapshot(store, path).await
}

async fn write_snapshot(store: &KnowledgeStore, path: &Path) -> Result<()> {
    let count = store
        .export_to_file(path)
        .await
        .with_context(|| format!("writing snapshot {}", path.display()))?;
    tracing::debug!(path = %path.display(), count, "snapshot written");
    Ok(())
}

fn print_result(result: &GenerationResult) {
    println!("request:  {}", result.request_id);
    println!("status:   {}", result.status());
    println!("elapsed:  {:.2}s", result.execution_time);
    if let Some(error) = &result.error {
        println!("error:    {error}");
        return;
    }

    if let Some(case) = &result.test_case {
        println!();
        println!("{} [{}]", case.name, case.id);
        println!(
            "{} / {} / {}",
            case.domain.label(),
            case.subsystem.label(),
            case.test_patterns.iter().map(|p| p.label()).collect::<Vec<_>>().join("、")
        );
        println!();
        println!("Preconditions:");
        for p in &case.preconditions {
            println!("  - {p}");
        }
        println!("Steps:");
        for step in &case.test_steps {
            println!("  {:>2}. [{}] {}", step.step_number, step.step_type, step.action);
            println!("      expect: {}", step.expected_result);
        }
        println!("Pass criteria: {}", case.pass_criteria);
    }

    if let Some(explanations) = &result.explanations {
        println!();
        println!("{explanations}");
    }

    if let Some(metrics) = &result.metrics {
        println!("quality:  {:.2}", metrics.quality_score);
        for r in &metrics.recommendations {
            println!("  * {}", r.suggestion);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        cli().debug_assert();
    }

    #[test]
    fn generate_collects_repeated_standards() {
        let m = cli()
            .try_get_matches_from([
                "tcg",
                "generate",
                "--requirement",
                "验证VCU Ready模式",
                "--standard",
                "ISO 26262",
                "--standard",
                "GB/T 18384",
            ])
            .unwrap();
        let (name, args) = m.subcommand().unwrap();
        assert_eq!(name, "generate");
        let standards: Vec<&String> = args.get_many::<String>("standard").unwrap().collect();
        assert_eq!(standards, ["ISO 26262", "GB/T 18384"]);
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let m = cli()
            .try_get_matches_from(["tcg", "kb", "stats", "-vv", "--log-json"])
            .unwrap();
        assert_eq!(m.get_count("verbose"), 2);
        assert!(m.get_flag("log-json"));
    }

    #[test]
    fn kb_search_takes_type_and_top_k() {
        let m = cli()
            .try_get_matches_from(["tcg", "kb", "search", "故障注入", "--type", "test_pattern", "--top-k", "3"])
            .unwrap();
        let (_, kb) = m.subcommand().unwrap();
        let (_, search) = kb.subcommand().unwrap();
        assert_eq!(search.get_one::<usize>("top-k"), Some(&3));
        assert_eq!(search.get_one::<String>("query").unwrap(), "故障注入");
    }

    #[test]
    fn missing_subcommand_is_rejected() {
        assert!(cli().try_get_matches_from(["tcg"]).is_err());
    }

    #[tokio::test]
    async fn snapshot_round_trips_through_open_store() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.knowledge.snapshot_path = Some(dir.path().join("kb.json"));

        let store = open_store(&config).await.unwrap();
        assert!(store.is_empty());
        store.seed_initial_knowledge().await.unwrap();
        save_snapshot(&config, &store).await.unwrap();

        let reopened = open_store(&config).await.unwrap();
        assert_eq!(reopened.len(), 3);
    }
}
