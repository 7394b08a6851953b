//! Command-line interface for `pgshp`, which exports the result of a PostGIS
//! query to an ESRI Shapefile.
//!
//! The CLI is built using [`clap`] for argument parsing and [`tracing`] for
//! structured logging. It parses arguments, configures logging, and delegates
//! to [`pgshp_core`].
//!
//! # Available Commands
//!
//! - `export` - Run a query and write the result as a Shapefile
//! - `inspect` - Run a query and display the schema of its result

mod display;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing::{Level, info};
use tracing_log::LogTracer;
use tracing_subscriber::FmtSubscriber;

use pgshp_core::{
    DEFAULT_BATCH_SIZE, DEFAULT_DATABASE_URL, DEFAULT_GEOMETRY_COLUMN, DEFAULT_OUTPUT,
    DEFAULT_QUERY, ExportConfig, PgShpError,
};

use crate::display::{display_export_summary, display_table_info};

#[derive(Parser)]
#[command(
    name = "pgshp",
    version,
    about = "Export PostGIS query results to Shapefiles",
    long_about = "pgshp runs a SQL query against a PostgreSQL/PostGIS database and writes the\n\
                  result, geometry column and attributes, to an ESRI Shapefile."
)]
/// Command-line arguments and options for the `pgshp` CLI.
struct Cli {
    /// Enable verbose (INFO level) logging output.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable debug (DEBUG level) logging output with detailed diagnostics.
    #[arg(short, long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands for the `pgshp` CLI.
#[derive(Subcommand)]
enum Commands {
    /// Runs the query and writes the result to a Shapefile.
    ///
    /// Existing files at the output path are overwritten.
    Export {
        #[command(flatten)]
        source: SourceArgs,

        /// Path of the `.shp` file; `.shx`, `.dbf`, `.cpg` and `.prj` are
        /// written next to it.
        #[arg(short, long, value_name = "PATH", default_value = DEFAULT_OUTPUT)]
        output: PathBuf,

        /// Do not write the `.prj` projection file.
        #[arg(long)]
        no_prj: bool,
    },

    /// Runs the query and displays the schema of its result.
    Inspect {
        #[command(flatten)]
        source: SourceArgs,
    },
}

/// Where the features come from.
#[derive(Args)]
struct SourceArgs {
    /// PostgreSQL connection string.
    #[arg(
        long,
        env = "DATABASE_URL",
        value_name = "URL",
        default_value = DEFAULT_DATABASE_URL,
        hide_default_value = true,
        hide_env_values = true
    )]
    database_url: String,

    /// SQL query producing the features.
    #[arg(short, long, value_name = "SQL", default_value = DEFAULT_QUERY)]
    query: String,

    /// Name of the geometry column in the query result.
    #[arg(short, long, value_name = "COLUMN", default_value = DEFAULT_GEOMETRY_COLUMN)]
    geometry_column: String,

    /// Number of rows per record batch while reading.
    #[arg(long, value_name = "ROWS", default_value_t = DEFAULT_BATCH_SIZE)]
    batch_size: usize,
}

impl SourceArgs {
    fn into_config(self) -> ExportConfig {
        ExportConfig::new()
            .with_database_url(self.database_url)
            .with_sql(self.query)
            .with_geometry_column(self.geometry_column)
            .with_batch_size(self.batch_size)
    }
}

/// Entry point for the `pgshp` command-line interface.
///
/// Parses arguments, configures logging and runs the command. Failures are
/// reported on standard error and end the process with exit status 1.
#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(err) = init_logging(cli.verbose, cli.debug) {
        eprintln!("Failed to initialize logging: {err}");
        return ExitCode::FAILURE;
    }

    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err);
            ExitCode::FAILURE
        },
    }
}

fn init_logging(verbose: bool, debug: bool) -> Result<()> {
    let log_level = if debug {
        Level::DEBUG
    } else if verbose {
        Level::INFO
    } else {
        Level::WARN
    };

    // Bridge logs from the `log` crate to the `tracing` ecosystem.
    LogTracer::init()?;

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Export {
            source,
            output,
            no_prj,
        } => {
            let config = source
                .into_config()
                .with_output(output)
                .with_prj(!no_prj);
            handle_export(&config).await
        },
        Commands::Inspect { source } => handle_inspect(&source.into_config()).await,
    }
}

async fn handle_export(config: &ExportConfig) -> Result<()> {
    info!("Export command: {config:?}");
    let summary = pgshp_core::export(config).await?;
    display_export_summary(&summary);
    Ok(())
}

async fn handle_inspect(config: &ExportConfig) -> Result<()> {
    info!("Inspect command: {config:?}");
    let info = pgshp_core::inspect(config).await?;
    display_table_info(&info);
    Ok(())
}

fn report(err: &anyhow::Error) {
    let Some(err) = err.downcast_ref::<PgShpError>() else {
        eprintln!("Error: {err:#}");
        return;
    };

    eprintln!("{}", err.user_message());
    if let Some(suggestion) = err.recovery_suggestion() {
        eprintln!("\nSuggestion: {suggestion}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_export_defaults() {
        let cli = Cli::try_parse_from(["pgshp", "export"]).unwrap();
        let Commands::Export {
            source,
            output,
            no_prj,
        } = cli.command
        else {
            panic!("expected export command");
        };

        assert_eq!(source.query, "SELECT * FROM public.roads");
        assert_eq!(source.geometry_column, "geom");
        assert_eq!(source.batch_size, 8192);
        assert_eq!(output, PathBuf::from("roads_export.shp"));
        assert!(!no_prj);
    }

    #[test]
    fn test_export_overrides() {
        let cli = Cli::try_parse_from([
            "pgshp",
            "-v",
            "export",
            "--database-url",
            "postgresql://gis:gis@db:5433/gis",
            "--query",
            "SELECT * FROM parcels",
            "--geometry-column",
            "shape",
            "--batch-size",
            "500",
            "--output",
            "parcels.shp",
            "--no-prj",
        ])
        .unwrap();
        assert!(cli.verbose);

        let Commands::Export {
            source,
            output,
            no_prj,
        } = cli.command
        else {
            panic!("expected export command");
        };
        let config = source.into_config().with_output(output).with_prj(!no_prj);

        assert_eq!(config.database_url, "postgresql://gis:gis@db:5433/gis");
        assert_eq!(config.sql, "SELECT * FROM parcels");
        assert_eq!(config.geometry_column, "shape");
        assert_eq!(config.batch_size, 500);
        assert_eq!(config.output, PathBuf::from("parcels.shp"));
        assert!(!config.write_prj);
    }

    #[test]
    fn test_inspect_command() {
        let cli = Cli::try_parse_from(["pgshp", "inspect", "-g", "the_geom", "-d"]).unwrap();
        assert!(cli.debug);
        assert!(matches!(
            cli.command,
            Commands::Inspect { source } if source.geometry_column == "the_geom"
        ));
    }

    #[tokio::test]
    async fn test_run_rejects_zero_batch_size() {
        let cli = Cli::try_parse_from(["pgshp", "inspect", "--batch-size", "0"]).unwrap();

        let err = run(cli.command).await.unwrap_err();

        let err = err.downcast_ref::<PgShpError>().unwrap();
        assert!(matches!(err, PgShpError::Config(_)));
    }
}
