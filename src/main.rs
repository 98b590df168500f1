//! querytask - Run one SQL statement and stream its results.

use anyhow::Context;
use db_querytask::cli::Cli;
use db_querytask::config::Config;
use db_querytask::db::{Connection, SqlxConnection};
use db_querytask::logging;
use db_querytask::output::ConsolePrinter;
use db_querytask::query::QueryOrchestrator;
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();

    // Query output owns stdout; logs go to stderr unless a file is requested.
    if cli.log_to_file() {
        logging::init_file_logging();
    } else {
        logging::init_stderr_logging();
    }

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            error!("{e:#}");
            eprintln!("Error: {e:#}");
            std::process::exit(1);
        }
    }
}

/// Runs the query. Returns false if the query itself reported an error.
async fn run(cli: Cli) -> anyhow::Result<bool> {
    let format = cli.parse_output_format()?;

    let config_path = cli.config_path();
    info!("Loading config from: {}", config_path.display());
    let mut config = Config::load_from_file(&config_path)?;
    config.apply_env_defaults();

    let connection_config = cli.resolve_connection(&config)?;
    let sql = cli.read_sql(std::io::stdin().lock())?;

    info!("Connection: {}", connection_config.display_string());
    let connection = SqlxConnection::connect(&connection_config.url)
        .await
        .with_context(|| format!("connecting to {}", connection_config.display_string()))?;

    let task = QueryOrchestrator::prepare(&connection, &sql, config.pipeline.clone()).await?;
    let printer = Arc::new(ConsolePrinter::new(std::io::stdout(), format));
    task.add_listener(printer.clone());
    task.start()?;

    tokio::select! {
        _ = task.wait() => {}
        _ = tokio::signal::ctrl_c() => {
            warn!("Cancelling query (press Ctrl-C again to exit)");
            printer.mark_cancelled();
            task.cancel();

            tokio::select! {
                _ = task.wait() => {}
                _ = tokio::signal::ctrl_c() => {
                    warn!("Exiting without waiting for the query");
                    std::process::exit(130);
                }
            }
        }
    }

    connection.close().await?;
    Ok(task.is_cancelled() || !task.has_error())
}
