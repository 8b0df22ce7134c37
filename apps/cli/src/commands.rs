//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use lawledger_core::{Pipeline, ProgressReporter, ResetMode, StageTotals};
use lawledger_shared::{AppConfig, Category, init_config, load_config, load_config_from};
use lawledger_storage::Ledger;
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// lawledger: incremental acquisition of the national law database.
#[derive(Parser)]
#[command(
    name = "lawledger",
    version,
    about = "Crawl, download and convert national laws and regulations into markdown.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ~/.lawledger/lawledger.toml).
    #[arg(long, global = true, env = "LAWLEDGER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Document root directory, overriding the config file.
    #[arg(long, global = true)]
    pub root: Option<PathBuf>,

    /// Ledger database file, overriding the config file.
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Create the ledger schema.
    Init,

    /// Apply pending schema migrations and repair missing columns.
    Migrate,

    /// Crawl listing metadata into the ledger.
    Crawl {
        /// Category id (1-10) or table code; all top-level categories if omitted.
        #[arg(short, long, value_parser = parse_category)]
        category: Option<Category>,
    },

    /// Download pending source documents.
    Download {
        #[arg(short, long, value_parser = parse_category)]
        category: Option<Category>,

        /// Convert downloaded documents to markdown afterwards.
        #[arg(long)]
        transform: bool,
    },

    /// Convert downloaded documents to markdown.
    Parse {
        #[arg(short, long, value_parser = parse_category)]
        category: Option<Category>,
    },

    /// Discover new documents and carry them through to markdown.
    Workflow {
        #[arg(short, long, value_parser = parse_category)]
        category: Option<Category>,
    },

    /// Repair ledger flags from the files on disk.
    Sync {
        #[arg(short, long, value_parser = parse_category)]
        category: Option<Category>,
    },

    /// Move misfiled documents into their classified directories.
    Reorganize {
        #[arg(short, long, value_parser = parse_category)]
        category: Option<Category>,
    },

    /// Clear progress flags.
    Reset {
        /// `missing` resets rows whose source file is gone; `all` resets every fetched row.
        #[arg(long, default_value = "missing")]
        mode: ResetMode,

        #[arg(short, long, value_parser = parse_category)]
        category: Option<Category>,

        /// Leave already transformed rows alone.
        #[arg(long)]
        keep_transformed: bool,
    },

    /// Drop cached session cookies and run a fresh handshake.
    RefreshCookies,

    /// Show per-category progress counts.
    Status,

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
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

/// Accept a numeric id, a table code or a category label.
fn parse_category(value: &str) -> std::result::Result<Category, String> {
    if let Ok(id) = value.parse::<u8>() {
        return Category::try_from(id);
    }
    Category::from_api_type(value).ok_or_else(|| format!("unknown category {value:?}"))
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "lawledger=info",
        1 => "lawledger=debug",
        _ => "lawledger=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Resolve config: file (explicit or default) then flag overrides.
fn resolve_config(cli: &Cli) -> Result<AppConfig> {
    let mut config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    if let Some(root) = &cli.root {
        config.storage.root_dir = root.clone();
    }
    if let Some(db) = &cli.db {
        config.storage.database = db.clone();
    }
    Ok(config)
}

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    if let Command::Config { action } = &cli.command {
        return match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(&resolve_config(&cli)?),
        };
    }

    let config = resolve_config(&cli)?;
    match cli.command {
        Command::Init => cmd_init(&config).await,
        Command::Migrate => cmd_migrate(&config).await,
        Command::Status => cmd_status(&config).await,
        command => {
            let pipeline = Pipeline::connect(config).await?;
            run_pipeline(&pipeline, command).await
        }
    }
}

async fn run_pipeline(pipeline: &Pipeline, command: Command) -> Result<()> {
    match command {
        Command::Crawl { category } => {
            let reporter = CliProgress::new();
            let reports = pipeline.crawl(category, &reporter).await?;
            reporter.finish();
            for r in &reports {
                println!(
                    "  {:<12} {:>4}/{:<4} pages  {:>6} rows  {} failed pages",
                    r.category.label(),
                    r.pages_fetched,
                    r.pages_total,
                    r.items_written,
                    r.pages_failed
                );
            }
        }
        Command::Download {
            category,
            transform,
        } => {
            let reporter = CliProgress::new();
            let (downloads, transforms) = pipeline.download(category, transform, &reporter).await?;
            reporter.finish();
            print_totals("Downloaded", &downloads);
            if transform {
                print_totals("Converted", &transforms);
            }
        }
        Command::Parse { category } => {
            let reporter = CliProgress::new();
            let totals = pipeline.parse(category, &reporter).await?;
            reporter.finish();
            print_totals("Converted", &totals);
        }
        Command::Workflow { category } => {
            let reporter = CliProgress::new();
            let report = pipeline.full_workflow(category, &reporter).await?;
            reporter.finish();
            println!();
            println!("  New documents: {}", report.discovered);
            print_totals("Downloaded", &report.downloads);
            print_totals("Converted", &report.transforms);
            println!("  Moved:         {}", report.reorganized.moved);
            for (category, message) in &report.category_errors {
                println!("  Error [{}]: {message}", category.label());
            }
            println!("  Time:          {:.1}s", report.elapsed.as_secs_f64());
            println!();
        }
        Command::Sync { category } => {
            let report = pipeline.sync(category).await?;
            println!(
                "Checked {} rows, {} present on disk, {} corrected",
                report.checked, report.present, report.corrected
            );
        }
        Command::Reorganize { category } => {
            let report = pipeline.reorganize(category).await?;
            println!(
                "Scanned {} files: {} moved, {} skipped ({} without a ledger title), {} failed",
                report.scanned, report.moved, report.skipped, report.unmatched, report.failed
            );
        }
        Command::Reset {
            mode,
            category,
            keep_transformed,
        } => {
            let changed = pipeline.reset(mode, category, keep_transformed).await?;
            println!("Reset {changed} rows");
        }
        Command::RefreshCookies => {
            let count = pipeline.refresh_cookies().await;
            if count == 0 {
                println!("No session cookies obtained; requests will proceed without them");
            } else {
                println!("Obtained {count} session cookies");
            }
        }
        Command::Init | Command::Migrate | Command::Status | Command::Config { .. } => {
            return Err(eyre!("command does not need the pipeline"));
        }
    }
    Ok(())
}

fn print_totals(label: &str, totals: &StageTotals) {
    println!(
        "  {:<14} {} of {} ({} failed)",
        format!("{label}:"),
        totals.succeeded,
        totals.attempted,
        totals.failed
    );
}

// ---------------------------------------------------------------------------
// Ledger commands
// ---------------------------------------------------------------------------

async fn cmd_init(config: &AppConfig) -> Result<()> {
    let ledger = Ledger::open(&config.storage.database).await?;
    info!(db = %config.storage.database.display(), "ledger initialized");
    println!(
        "Ledger ready at {} (schema v{})",
        config.storage.database.display(),
        ledger.get_schema_version().await
    );
    Ok(())
}

async fn cmd_migrate(config: &AppConfig) -> Result<()> {
    let ledger = Ledger::open(&config.storage.database).await?;
    let repaired = ledger.migrate().await?;
    println!(
        "Schema at v{}; {repaired} missing columns added",
        ledger.get_schema_version().await
    );
    Ok(())
}

async fn cmd_status(config: &AppConfig) -> Result<()> {
    let ledger = Ledger::open_readonly(&config.storage.database).await?;
    println!(
        "  {:<4} {:<14} {:>8} {:>8} {:>12}",
        "id", "table", "total", "fetched", "transformed"
    );
    for category in Category::ALL {
        let counts = ledger.counts(category).await?;
        println!(
            "  {:<4} {:<14} {:>8} {:>8} {:>12}  {}",
            category.id(),
            category.table(),
            counts.total,
            counts.fetched,
            counts.transformed,
            category.label()
        );
        let violations = ledger.invariant_violations(category).await?;
        if violations > 0 {
            println!("       {violations} rows transformed but not fetched");
        }
    }
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: &AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(config)?;
    println!("{toml_str}");
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
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl ProgressReporter for CliProgress {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn items_started(&self, stage: &str, total: usize) {
        self.spinner.set_message(format!("{stage} [0/{total}]"));
    }

    fn item_finished(&self, stage: &str, current: usize, total: usize, ok: bool) {
        let mark = if ok { "" } else { " (failed)" };
        self.spinner
            .set_message(format!("{stage} [{current}/{total}]{mark}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn category_argument_forms() {
        assert_eq!(parse_category("1").unwrap(), Category::Constitution);
        assert_eq!(parse_category("dfxfg").unwrap(), Category::LocalRegulation);
        assert_eq!(parse_category("司法解释").unwrap(), Category::JudicialInterpretation);
        assert!(parse_category("11").is_err());
        assert!(parse_category("unknown").is_err());
    }

    #[test]
    fn flags_override_config_file() {
        let cli = Cli::try_parse_from([
            "lawledger",
            "--config",
            "/nonexistent/lawledger.toml",
            "status",
        ])
        .unwrap();
        assert!(resolve_config(&cli).is_err());

        let cli = Cli::try_parse_from([
            "lawledger",
            "--root",
            "/tmp/laws",
            "--db",
            "/tmp/laws/x.db",
            "reset",
            "--mode",
            "all",
            "--keep-transformed",
        ])
        .unwrap();
        let Command::Reset {
            mode,
            keep_transformed,
            ..
        } = &cli.command
        else {
            panic!("expected reset");
        };
        assert_eq!(*mode, ResetMode::All);
        assert!(*keep_transformed);
        assert_eq!(cli.root.as_deref(), Some(std::path::Path::new("/tmp/laws")));
    }
}
