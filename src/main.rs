use bqdump::cli::{export_tables, test_auth};
use bqdump::config::{ExportConfig, parse_table_list};
use clap::{Args, Parser, Subcommand, builder::styling};
use eyre::Result;
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};

// CLI Styling
const STYLES: styling::Styles = styling::Styles::styled()
    .header(styling::AnsiColor::BrightWhite.on_default())
    .usage(styling::AnsiColor::BrightWhite.on_default())
    .literal(styling::AnsiColor::Green.on_default())
    .placeholder(styling::AnsiColor::Cyan.on_default());

/// bqdump: export BigQuery tables to local CSV files
///
/// With no command, exports every configured table.
#[derive(Parser)]
#[command(name = "bqdump", version, styles = STYLES)]
struct Cli {
    /// The dotenv file to source configuration from (ignored if missing)
    #[arg(short, long, global = true, default_value = ".env")]
    env: String,

    /// More verbose logging
    #[arg(long, global = true)]
    debug: bool,

    /// Command to execute
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Export tables to CSV files (default)
    Export(ExportArgs),

    /// Test authorization and access to the source dataset
    Auth(SourceArgs),
}

/// Where to read from and how to authenticate
#[derive(Args, Default)]
struct SourceArgs {
    /// Credential JSON file (overrides GOOGLE_APPLICATION_CREDENTIALS)
    #[arg(short, long)]
    credentials: Option<PathBuf>,

    /// Billing project for query jobs (overrides BIGQUERY_PROJECT)
    #[arg(short, long)]
    project: Option<String>,

    /// Source dataset as project.dataset (overrides BIGQUERY_DATASET)
    #[arg(short, long)]
    dataset: Option<String>,
}

impl SourceArgs {
    fn apply(self, config: &mut ExportConfig) {
        if let Some(credentials) = self.credentials {
            config.credentials_path = credentials;
        }
        if let Some(project) = self.project {
            config.project = Some(project);
        }
        if let Some(dataset) = self.dataset {
            config.dataset = dataset;
        }
    }
}

#[derive(Args, Default)]
struct ExportArgs {
    #[command(flatten)]
    source: SourceArgs,

    /// Directory to write the CSV files to (default: current directory)
    #[arg(short, long)]
    output_dir: Option<PathBuf>,

    /// Comma-separated list of tables to export (overrides BIGQUERY_TABLES)
    #[arg(short, long)]
    tables: Option<String>,

    /// Only export tables whose name matches this regex
    #[arg(long)]
    include: Option<String>,

    /// Skip tables whose name matches this regex
    #[arg(long)]
    exclude: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let env_loaded = Path::new(&cli.env).exists();
    if env_loaded {
        dotenvy::from_filename(&cli.env)?;
    }

    let log_level = match cli.debug {
        true => "debug",
        false => "info",
    };
    let env = env_logger::Env::default().filter_or("LOG_LEVEL", log_level);
    env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .init();

    match env_loaded {
        true => log::debug!("Loaded configuration from {}", cli.env.bright_black()),
        false => log::debug!("No dotenv file at {}", cli.env.bright_black()),
    }

    let mut config = ExportConfig::from_env()?;

    match cli
        .command
        .unwrap_or_else(|| Commands::Export(ExportArgs::default()))
    {
        Commands::Export(args) => {
            args.source.apply(&mut config);
            if let Some(dir) = args.output_dir {
                config.output_dir = dir;
            }
            if let Some(tables) = args.tables {
                config.tables = parse_table_list(&tables);
            }
            config.filter_tables(args.include.as_deref(), args.exclude.as_deref())?;

            let output = match config.output_dir.as_os_str().is_empty() {
                true => PathBuf::from("."),
                false => config.output_dir.clone(),
            };
            log::info!(
                "Exporting {} from {} to {}",
                config.tables.join(", ").cyan(),
                config.dataset.cyan(),
                output.display().bright_black()
            );

            let written = export_tables(&config).await?;
            log::info!("✓ Wrote {} file(s)", written.len());
        }
        Commands::Auth(args) => {
            args.apply(&mut config);
            log::info!("Testing authorization");
            test_auth(&config).await?;
        }
    }

    Ok(())
}
