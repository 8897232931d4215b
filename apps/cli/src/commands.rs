//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use styleguide_core::{
    KnowledgeResolver, Pipeline, ProgressReporter, RunRequest, render,
};
use styleguide_openrouter::{OpenRouterCapability, OpenRouterSettings};
use styleguide_shared::{
    AppConfig, PipelineConfig, StyleGuideDocument, expand_home, init_config, load_config,
    validate_api_key,
};
use styleguide_storage::{GuidelineSeed, Storage};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// styleguide: generate reviewed style guides for product listing copy.
#[derive(Parser)]
#[command(
    name = "styleguide",
    version,
    about = "Generate compliance-reviewed, per-field style guides for product listing copy.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Rendering of a generated document.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum OutputFormat {
    Markdown,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the pipeline for one category and product type.
    Generate {
        /// Product category (e.g. "Fashion").
        #[arg(long)]
        category: String,

        /// Product type within the category (e.g. "Women's Dress").
        #[arg(long)]
        product_type: String,

        /// Field hint, comma-separated (defaults to the config value).
        #[arg(long, value_delimiter = ',')]
        fields: Vec<String>,

        /// Database path (defaults to the config value).
        #[arg(long)]
        db: Option<PathBuf>,

        /// OpenRouter model ID (defaults to the config value).
        #[arg(long)]
        model: Option<String>,

        /// Review ceiling per field.
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Field loops run at once.
        #[arg(long)]
        concurrency: Option<usize>,

        /// Output format.
        #[arg(long, default_value = "markdown")]
        format: OutputFormat,

        /// Print the document without publishing it.
        #[arg(long)]
        no_persist: bool,
    },

    /// Manage baseline and legal guideline records.
    Knowledge {
        #[command(subcommand)]
        action: KnowledgeAction,
    },

    /// Inspect published style guides.
    Published {
        #[command(subcommand)]
        action: PublishedAction,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Knowledge subcommands.
#[derive(Subcommand)]
pub(crate) enum KnowledgeAction {
    /// Import `[[baseline]]` / `[[legal]]` records from a TOML file.
    Import {
        /// Seed file path.
        file: PathBuf,

        #[arg(long)]
        db: Option<PathBuf>,
    },
    /// Show the guidance a run would resolve.
    Show {
        #[arg(long)]
        category: String,

        #[arg(long)]
        product_type: String,

        #[arg(long)]
        db: Option<PathBuf>,
    },
}

/// Published-guide subcommands.
#[derive(Subcommand)]
pub(crate) enum PublishedAction {
    /// List published field guides, newest first.
    List {
        #[arg(long)]
        category: Option<String>,

        #[arg(long)]
        product_type: Option<String>,

        #[arg(long)]
        db: Option<PathBuf>,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "styleguide=info",
        1 => "styleguide=debug",
        _ => "styleguide=trace",
    };

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    // Logs go to stderr; stdout carries the rendered document.
    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Command::Generate {
            category,
            product_type,
            fields,
            db,
            model,
            max_iterations,
            concurrency,
            format,
            no_persist,
        } => {
            let opts = GenerateOptions {
                category,
                product_type,
                fields,
                db,
                model,
                max_iterations,
                concurrency,
                format,
                persist: !no_persist,
            };
            cmd_generate(opts).await
        }
        Command::Knowledge { action } => match action {
            KnowledgeAction::Import { file, db } => cmd_knowledge_import(&file, db).await,
            KnowledgeAction::Show {
                category,
                product_type,
                db,
            } => cmd_knowledge_show(&category, &product_type, db).await,
        },
        Command::Published { action } => match action {
            PublishedAction::List {
                category,
                product_type,
                db,
            } => cmd_published_list(category.as_deref(), product_type.as_deref(), db).await,
        },
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

/// Database path from the flag, else the config default.
fn resolve_db_path(config: &AppConfig, flag: Option<PathBuf>) -> Result<PathBuf> {
    match flag {
        Some(p) => Ok(p),
        None => Ok(expand_home(&config.defaults.db_path)?),
    }
}

// ---------------------------------------------------------------------------
// generate
// ---------------------------------------------------------------------------

struct GenerateOptions {
    category: String,
    product_type: String,
    fields: Vec<String>,
    db: Option<PathBuf>,
    model: Option<String>,
    max_iterations: Option<u32>,
    concurrency: Option<usize>,
    format: OutputFormat,
    persist: bool,
}

async fn cmd_generate(opts: GenerateOptions) -> Result<()> {
    // Validate API key before doing anything
    let config = load_config()?;
    let api_key = validate_api_key(&config)?;

    let mut pipeline_config = PipelineConfig::from(&config);
    if let Some(n) = opts.max_iterations {
        if n == 0 {
            return Err(eyre!("--max-iterations must be at least 1"));
        }
        pipeline_config.max_review_iterations = n;
    }
    if let Some(n) = opts.concurrency {
        if n == 0 {
            return Err(eyre!("--concurrency must be at least 1"));
        }
        pipeline_config.max_concurrent_fields = n;
    }

    let mut settings = OpenRouterSettings::from_config(&config, api_key)?;
    if let Some(model) = opts.model {
        settings = settings.with_model(model);
    }
    let capability = Arc::new(OpenRouterCapability::new(settings)?);

    let db_path = resolve_db_path(&config, opts.db)?;
    let storage = Arc::new(Storage::open(&db_path).await?);

    let fields = if opts.fields.is_empty() {
        config.defaults.fields_needed.clone()
    } else {
        opts.fields
    };
    let request = RunRequest::new(opts.category, opts.product_type).with_fields(fields);

    info!(
        category = %request.category,
        product_type = %request.product_type,
        model = capability.model(),
        db = %db_path.display(),
        persist = opts.persist,
        "generating style guide"
    );

    let mut pipeline = Pipeline::new(capability, storage.clone(), pipeline_config)?;
    if opts.persist {
        pipeline = pipeline.with_sink(storage.clone());
    }

    let reporter = CliProgress::new();
    let outcome = pipeline.run(request, &reporter).await;
    reporter.spinner.finish_and_clear();

    drop(pipeline);
    if let Ok(storage) = Arc::try_unwrap(storage) {
        storage.close().await;
    }

    let document = outcome?;
    print_document(&document, &opts.format)?;

    if opts.persist {
        eprintln!("Published record {} ({} fields)", document.id, document.fields.len());
    }
    let unresolved = document.unresolved_fields();
    if !unresolved.is_empty() {
        eprintln!(
            "Warning: {} field(s) left unresolved after review: {}",
            unresolved.len(),
            unresolved.join(", ")
        );
    }

    Ok(())
}

fn print_document(document: &StyleGuideDocument, format: &OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Markdown => print!("{}", render::to_markdown(document)),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(document)?),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
}

impl CliProgress {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]);
        spinner.set_style(style);
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn stage_finished(&self, stage: &str, attempt: u32, success: bool) {
        if !success {
            self.spinner
                .set_message(format!("{stage}: attempt {attempt} failed, retrying"));
        }
    }

    fn field_finished(&self, field: &str, current: usize, total: usize) {
        self.spinner
            .set_message(format!("Fields [{current}/{total}] {field} done"));
    }

    fn done(&self, _document: &StyleGuideDocument) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// knowledge
// ---------------------------------------------------------------------------

async fn cmd_knowledge_import(file: &Path, db: Option<PathBuf>) -> Result<()> {
    let config = load_config()?;
    let content = std::fs::read_to_string(file)
        .map_err(|e| eyre!("cannot read '{}': {e}", file.display()))?;
    let seed: GuidelineSeed = toml::from_str(&content)
        .map_err(|e| eyre!("invalid seed file '{}': {e}", file.display()))?;

    let storage = Storage::open(&resolve_db_path(&config, db)?).await?;
    let (baseline, legal) = storage.import_guidelines(&seed).await?;
    storage.close().await;

    println!("Imported {baseline} baseline and {legal} legal record(s).");
    Ok(())
}

async fn cmd_knowledge_show(category: &str, product_type: &str, db: Option<PathBuf>) -> Result<()> {
    let config = load_config()?;
    let db_path = resolve_db_path(&config, db)?;
    if !db_path.exists() {
        return Err(eyre!("no database at '{}'", db_path.display()));
    }

    let storage = Arc::new(Storage::open_readonly(&db_path).await?);
    let pipeline_config = PipelineConfig::from(&config);
    let resolver = KnowledgeResolver::new(storage.clone(), pipeline_config.knowledge_timeout);
    let bundle = resolver.resolve_bundle(category, product_type).await?;
    drop(resolver);

    for guidance in [&bundle.baseline, &bundle.legal] {
        let level = guidance.matched.map(|m| m.as_str()).unwrap_or("none");
        println!("[{}] matched: {level}", guidance.kind.as_str());
        if guidance.is_empty() {
            println!("  (no guidance)");
        } else {
            for line in guidance.text.lines() {
                println!("  {line}");
            }
        }
        println!();
    }

    if let Ok(storage) = Arc::try_unwrap(storage) {
        storage.close().await;
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// published
// ---------------------------------------------------------------------------

async fn cmd_published_list(
    category: Option<&str>,
    product_type: Option<&str>,
    db: Option<PathBuf>,
) -> Result<()> {
    let config = load_config()?;
    let db_path = resolve_db_path(&config, db)?;
    if !db_path.exists() {
        println!("No published style guides yet.");
        return Ok(());
    }

    let storage = Storage::open_readonly(&db_path).await?;
    let rows = storage.list_published(category, product_type).await?;
    storage.close().await;

    if rows.is_empty() {
        println!("No published style guides match.");
        return Ok(());
    }

    for row in &rows {
        let flag = if row.unresolved { " [unresolved]" } else { "" };
        println!(
            "{}  {} / {}  {}{}  ({})",
            row.record_id,
            row.category,
            row.product_type,
            row.field_name,
            flag,
            row.created_at.format("%Y-%m-%d %H:%M")
        );
    }
    println!("\n{} row(s)", rows.len());
    Ok(())
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
