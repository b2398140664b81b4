use std::io::Write;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};

use cmd::commands::{self, QueryArgs};
use cmd::common::{SheetContext, exit_status};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "sheetq")]
struct Cli {
    /// DuckDB database file holding the dataset tables
    #[arg(long, env = "SHEETQ_DB", global = true, default_value = "sheetq.duckdb")]
    db: PathBuf,

    /// YAML configuration file; environment variables override it
    #[arg(long, env = "SHEETQ_CONFIG", global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List dataset tables and their inferred columns
    Tables,
    /// Show a dataset's columns, row count and indexes
    Describe { dataset: String },
    /// Filtered, paginated read of one dataset
    Query {
        dataset: String,
        /// JSON filter, e.g. '{"age": {"$gte": 18}}'
        #[arg(short, long)]
        filter: Option<String>,
        #[arg(short, long, default_value_t = 1)]
        page: u64,
        #[arg(short, long, default_value_t = 50)]
        limit: u64,
        /// Include cache statistics
        #[arg(long)]
        stats: bool,
    },
    /// Create indexes for columns likely to be filtered on
    Advise { dataset: String },
    /// Insert rows given as a JSON object or array of objects
    Insert {
        dataset: String,
        #[arg(short, long)]
        rows: String,
    },
    /// Update rows matching a filter
    Update {
        dataset: String,
        #[arg(short, long)]
        filter: String,
        #[arg(long)]
        values: String,
    },
    /// Delete rows matching a filter
    Delete {
        dataset: String,
        #[arg(short, long)]
        filter: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    diagnostics::init_diagnostics();

    let cli = Cli::parse();
    let ctx = SheetContext::new(cli.db, cli.config);
    let stdout = std::io::stdout();
    let mut out = stdout.lock();

    let result = match cli.command {
        Commands::Tables => commands::tables_command(&ctx, &mut out).await,
        Commands::Describe { dataset } => commands::describe_command(&ctx, &dataset, &mut out).await,
        Commands::Query {
            dataset,
            filter,
            page,
            limit,
            stats,
        } => {
            let args = QueryArgs {
                filter,
                page,
                limit,
                stats,
            };
            commands::query_command(&ctx, &dataset, &args, &mut out).await
        }
        Commands::Advise { dataset } => commands::advise_command(&ctx, &dataset, &mut out).await,
        Commands::Insert { dataset, rows } => {
            commands::insert_command(&ctx, &dataset, &rows, &mut out).await
        }
        Commands::Update {
            dataset,
            filter,
            values,
        } => commands::update_command(&ctx, &dataset, &filter, &values, &mut out).await,
        Commands::Delete { dataset, filter } => {
            commands::delete_command(&ctx, &dataset, &filter, &mut out).await
        }
    };

    out.flush()?;
    match result {
        Ok(()) => Ok(ExitCode::SUCCESS),
        Err(e) => {
            diagnostics::log_error!("sheetq failed: {error}", error: format!("{e:#}"));
            Ok(ExitCode::from(exit_status(&e)))
        }
    }
}
