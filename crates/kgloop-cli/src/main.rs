//! kgloop CLI - self-improving knowledge graph extraction

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use kgloop_core::analysis::{AnalysisReport, ExtractionMetadata, Reflector};
use kgloop_core::apply::{ApplicationResult, ApplyOptions, ChangeApplier};
use kgloop_core::config::Config;
use kgloop_core::control::{ImprovementLoop, LoopInput, RunOptions};
use kgloop_core::curation::{Changeset, Curator};
use kgloop_core::oracle::{LlmOracle, QualityOracle};
use kgloop_core::pipeline::{ModuleRegistry, PipelineOrchestrator, Relationship};
use kgloop_core::playbook::PlaybookStore;
use serde::Serialize;
use tracing::debug;

#[derive(Parser)]
#[command(name = "kgloop")]
#[command(author, version, about = "Self-improving knowledge graph extraction", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Playbook directory (defaults to playbook.root from the config)
    #[arg(long, global = true)]
    playbook: Option<PathBuf>,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the playbook layout with the built-in pipeline
    Init,

    /// Show version, artifacts and history
    Status,

    /// Run the pipeline over a relationships file
    Process {
        /// JSON file: an array of relationships or {"relationships": [...]}
        #[arg(short, long)]
        input: PathBuf,

        /// Write the processed relationships here instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Analyze extraction quality and save a report
    Analyze {
        #[arg(short, long)]
        input: PathBuf,

        /// Source text the relationships were extracted from
        #[arg(short, long)]
        source: PathBuf,

        /// Extraction version tag (defaults to v{current version})
        #[arg(long)]
        extraction_version: Option<String>,

        #[arg(long, default_value = "")]
        book_title: String,
    },

    /// Turn an analysis report into a changeset
    Curate {
        #[arg(short, long)]
        report: PathBuf,
    },

    /// Apply a changeset under the risk policy
    Apply {
        #[arg(short, long)]
        changeset: PathBuf,

        /// Preview only; nothing is written
        #[arg(long)]
        dry_run: bool,

        /// Send low-risk operations to approval as well
        #[arg(long)]
        no_auto_apply: bool,
    },

    /// Apply operator-approved operations regardless of risk
    Approve {
        #[arg(short, long)]
        changeset: PathBuf,

        /// Operation ids, e.g. change_002
        #[arg(required = true)]
        ids: Vec<String>,
    },

    /// Run the improvement loop
    Run {
        #[arg(short, long)]
        input: PathBuf,

        #[arg(short, long)]
        source: PathBuf,

        #[arg(long)]
        max_iterations: Option<u32>,

        #[arg(long)]
        dry_run: bool,

        #[arg(long, default_value = "")]
        book_title: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a config value
    Get { key: String },
    /// Set a config value
    Set { key: String, value: String },
    /// List all config values
    List,
    /// Show config file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("kgloop=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Err(err) = run(cli).await {
        eprintln!("Error: {:#}", err);
        if let Some(core) = err.downcast_ref::<kgloop_core::Error>() {
            eprintln!("  code: {}", core.code());
            if let Some(suggestion) = core.suggestion() {
                eprintln!("  try: {}", suggestion);
            }
        }
        std::process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let config = Config::load()?;
    let ctx = Ctx {
        root: cli.playbook.clone().unwrap_or_else(|| config.playbook.root.clone()),
        format: cli.format,
        quiet: cli.quiet,
        config,
    };

    match cli.command {
        Commands::Init => cmd_init(&ctx),
        Commands::Status => cmd_status(&ctx),
        Commands::Process { input, output } => cmd_process(&ctx, &input, output.as_deref()),
        Commands::Analyze {
            input,
            source,
            extraction_version,
            book_title,
        } => cmd_analyze(&ctx, &input, &source, extraction_version, book_title).await,
        Commands::Curate { report } => cmd_curate(&ctx, &report).await,
        Commands::Apply {
            changeset,
            dry_run,
            no_auto_apply,
        } => cmd_apply(&ctx, &changeset, dry_run, no_auto_apply).await,
        Commands::Approve { changeset, ids } => cmd_approve(&ctx, &changeset, &ids).await,
        Commands::Run {
            input,
            source,
            max_iterations,
            dry_run,
            book_title,
        } => cmd_run(&ctx, &input, &source, max_iterations, dry_run, book_title).await,
        Commands::Config { action } => cmd_config(action, ctx.quiet),
    }
}

struct Ctx {
    root: PathBuf,
    format: OutputFormat,
    quiet: bool,
    config: Config,
}

impl Ctx {
    fn store(&self) -> anyhow::Result<PlaybookStore> {
        let store = PlaybookStore::open(&self.root)?
            .with_lock_timeout(Duration::from_secs(self.config.apply.lock_timeout_secs));
        Ok(store)
    }

    /// Build the oracle first so a missing credential fails before any work
    fn oracle(&self) -> anyhow::Result<Arc<dyn QualityOracle>> {
        let oracle = LlmOracle::from_config(&self.config.oracle)?;
        debug!(model = %oracle.model(), "Oracle ready");
        Ok(Arc::new(oracle))
    }

    fn json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    fn say(&self, line: impl AsRef<str>) {
        if !self.quiet {
            println!("{}", line.as_ref());
        }
    }
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let text = fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&text).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Accept a bare array or an extraction document with a `relationships` key
fn read_relationships(path: &Path) -> anyhow::Result<Vec<Relationship>> {
    let value: serde_json::Value = read_json(path)?;
    let list = match value {
        serde_json::Value::Object(mut map) => map
            .remove("relationships")
            .with_context(|| format!("{} has no \"relationships\" array", path.display()))?,
        other => other,
    };
    serde_json::from_value(list).with_context(|| format!("Invalid relationships in {}", path.display()))
}

fn read_text(path: &Path) -> anyhow::Result<String> {
    fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
}

// ============================================================================
// Command Implementations
// ============================================================================

fn cmd_init(ctx: &Ctx) -> anyhow::Result<()> {
    let store = PlaybookStore::init(&ctx.root)?;
    let version = store.versions().current()?;
    if ctx.json() {
        return print_json(&serde_json::json!({
            "root": store.root(),
            "version": version,
        }));
    }
    ctx.say(format!("Playbook ready at {} (v{})", store.root().display(), version));
    Ok(())
}

fn cmd_status(ctx: &Ctx) -> anyhow::Result<()> {
    let store = ctx.store()?;
    let versions = store.versions();
    let version = versions.current()?;
    let snapshot = store.snapshot()?;
    let pipeline = store.load_pipeline_config()?;
    let rollback_points = versions.rollback_points()?;
    let reports = store.recent_reports(1)?;

    if ctx.json() {
        return print_json(&serde_json::json!({
            "root": store.root(),
            "version": version,
            "snapshot": snapshot,
            "pipeline": pipeline,
            "changesets": rollback_points,
            "latest_report": reports.first(),
        }));
    }

    println!("Playbook: {}", store.root().display());
    println!("Version:  v{}", version);
    println!();
    println!("Pipeline:");
    for module in pipeline.ordered() {
        let marker = if module.enabled { " " } else { "-" };
        println!("  {} {:>4}  {}", marker, module.priority, module.name);
    }
    println!();
    println!(
        "Artifacts: {} modules, {} prompts, {} configs, {} vocabularies",
        snapshot.modules.len(),
        snapshot.prompts.len(),
        snapshot.configs.len(),
        snapshot.vocabularies.len()
    );
    println!("Changesets: {}", rollback_points.len());
    for point in &rollback_points {
        println!("  v{} -> v{}  {}", point.source_version, point.target_version, point.changeset.display());
    }
    if let Some(report) = reports.first() {
        if let Ok(report) = serde_json::from_value::<AnalysisReport>(report.clone()) {
            match report.issue_rate() {
                Some(rate) => println!("Latest issue rate: {:.1}%", rate * 100.0),
                None => println!("Latest issue rate: unknown"),
            }
        }
    }
    Ok(())
}

fn cmd_process(ctx: &Ctx, input: &Path, output: Option<&Path>) -> anyhow::Result<()> {
    let store = ctx.store()?;
    let batch = read_relationships(input)?;
    let pipeline = store.load_pipeline_config()?;
    let orchestrator = PipelineOrchestrator::from_config(&pipeline, &ModuleRegistry::with_builtins())?;

    let total = batch.len();
    let run = orchestrator.process(batch);
    let retained = run.retained().count();

    match output {
        Some(path) => {
            fs::write(path, serde_json::to_string_pretty(&run.batch)?)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            ctx.say(format!(
                "Processed {} relationships ({} retained) -> {}",
                total,
                retained,
                path.display()
            ));
        }
        None if ctx.json() => print_json(&run)?,
        None => print_json(&run.batch)?,
    }

    for failure in &run.failures {
        eprintln!("Module {} (priority {}) failed: {}", failure.module, failure.priority, failure.message);
    }
    Ok(())
}

async fn cmd_analyze(
    ctx: &Ctx,
    input: &Path,
    source: &Path,
    extraction_version: Option<String>,
    book_title: String,
) -> anyhow::Result<()> {
    let oracle = ctx.oracle()?;
    let store = ctx.store()?;
    let batch = read_relationships(input)?;
    let source_text = read_text(source)?;

    let version = match extraction_version {
        Some(v) => v,
        None => format!("v{}", store.versions().current()?),
    };
    let metadata = ExtractionMetadata::new(version).with_book_title(book_title);

    let reflector = Reflector::new(oracle, store, ctx.config.reflector.clone());
    let (report, path) = reflector.analyze_with_history(&batch, &source_text, &metadata).await?;

    if ctx.json() {
        return print_json(&report);
    }
    if let Some(kind) = report.error {
        ctx.say(format!("Oracle output unusable ({}); raw response kept in the report", kind));
    } else {
        ctx.say(format!(
            "{} issue categories, issue rate {}",
            report.issue_categories.len(),
            report
                .issue_rate()
                .map(|r| format!("{:.1}%", r * 100.0))
                .unwrap_or_else(|| "unknown".to_string())
        ));
        for category in &report.issue_categories {
            ctx.say(format!("  [{}] {} ({})", category.severity, category.category_name, category.count));
        }
    }
    ctx.say(format!("Report saved to {}", path.display()));
    Ok(())
}

async fn cmd_curate(ctx: &Ctx, report_path: &Path) -> anyhow::Result<()> {
    let oracle = ctx.oracle()?;
    let store = ctx.store()?;
    let report: AnalysisReport = read_json(report_path)?;
    let version = store.versions().current()?;

    let curator = Curator::new(oracle, store);
    let (changeset, path) = curator.curate_and_save(&report, version, None).await?;

    if ctx.json() {
        return print_json(&changeset);
    }
    if let Some(kind) = changeset.error {
        ctx.say(format!("Oracle output unusable ({}); raw response kept in the changeset", kind));
    }
    ctx.say(format!(
        "Changeset v{} -> v{}: {} operations",
        changeset.source_version(),
        changeset.target_version(),
        changeset.file_operations.len()
    ));
    for op in &changeset.file_operations {
        ctx.say(format!(
            "  {} {:<18} {:<8} {:<6} {}",
            op.operation_id,
            op.operation_type.to_string(),
            op.priority.to_string(),
            op.risk_level.to_string(),
            op.file_path
        ));
    }
    ctx.say(format!("Changeset saved to {}", path.display()));
    Ok(())
}

fn print_application(ctx: &Ctx, result: &ApplicationResult) -> anyhow::Result<()> {
    if ctx.json() {
        return print_json(result);
    }
    for applied in &result.applied {
        ctx.say(format!("  applied   {} -> {}", applied.operation.operation_id, applied.written_path));
    }
    for op in &result.requires_approval {
        ctx.say(format!("  approval  {} ({} risk) {}", op.operation_id, op.risk_level, op.file_path));
    }
    for op in &result.skipped {
        ctx.say(format!("  skipped   {} {}", op.operation_id, op.file_path));
    }
    for failed in &result.failed {
        ctx.say(format!("  failed    {}: {}", failed.operation_id, failed.error));
    }
    ctx.say(result.summary().to_string());
    Ok(())
}

async fn cmd_apply(ctx: &Ctx, changeset_path: &Path, dry_run: bool, no_auto_apply: bool) -> anyhow::Result<()> {
    let store = ctx.store()?;
    let changeset: Changeset = read_json(changeset_path)?;
    let options = ApplyOptions {
        dry_run,
        auto_apply_low_risk: ctx.config.apply.auto_apply_low_risk && !no_auto_apply,
    };

    let result = ChangeApplier::new(store.clone()).apply(&changeset, options).await?;
    print_application(ctx, &result)?;

    if !dry_run {
        advance_if_current(ctx, &store, &changeset, &result).await?;
    }
    Ok(())
}

/// Advance once per changeset: later approvals of the same changeset find
/// the version already moved and leave it alone
async fn advance_if_current(
    ctx: &Ctx,
    store: &PlaybookStore,
    changeset: &Changeset,
    result: &ApplicationResult,
) -> anyhow::Result<()> {
    if !result.has_applied() {
        return Ok(());
    }
    let versions = store.versions();
    if versions.current()? == changeset.source_version() {
        let next = versions.advance(changeset.source_version()).await?;
        ctx.say(format!("Playbook now at v{}", next));
    }
    Ok(())
}

async fn cmd_approve(ctx: &Ctx, changeset_path: &Path, ids: &[String]) -> anyhow::Result<()> {
    let store = ctx.store()?;
    let changeset: Changeset = read_json(changeset_path)?;

    let result = ChangeApplier::new(store.clone()).approve(&changeset, ids).await?;
    print_application(ctx, &result)?;
    advance_if_current(ctx, &store, &changeset, &result).await
}

async fn cmd_run(
    ctx: &Ctx,
    input: &Path,
    source: &Path,
    max_iterations: Option<u32>,
    dry_run: bool,
    book_title: String,
) -> anyhow::Result<()> {
    let oracle = ctx.oracle()?;
    let store = ctx.store()?;
    let loop_input = LoopInput {
        batch: read_relationships(input)?,
        source_text: read_text(source)?,
        book_title,
    };

    let mut options = RunOptions::from_config(&ctx.config);
    options.apply.dry_run = dry_run;
    if let Some(max) = max_iterations {
        options.max_iterations = max;
    }

    let looper = ImprovementLoop::new(oracle, store, &ctx.config);
    let outcomes = looper.run(&loop_input, &options).await?;

    if ctx.json() {
        return print_json(&outcomes);
    }
    for outcome in &outcomes {
        let rate = outcome
            .report
            .issue_rate()
            .map(|r| format!("{:.1}%", r * 100.0))
            .unwrap_or_else(|| "unknown".to_string());
        let summary = outcome
            .application
            .as_ref()
            .map(|a| a.summary().to_string())
            .unwrap_or_else(|| "no changes".to_string());
        ctx.say(format!("v{}: {} (issue rate {}; {})", outcome.version, outcome.state, rate, summary));
    }
    Ok(())
}

fn cmd_config(action: ConfigAction, quiet: bool) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            println!("{}", config.get(&key)?);
        }
        ConfigAction::Set { key, value } => {
            let mut config = Config::load()?;
            config.set(&key, &value)?;
            config.save()?;
            if !quiet {
                println!("Set {} = {}", key, value);
            }
        }
        ConfigAction::List => {
            let config = Config::load()?;
            for (key, value) in config.list()? {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Path => {
            println!("{}", Config::config_path()?.display());
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "main_tests.rs"]
mod tests;
