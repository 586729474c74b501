//! db-session - run SQL statements in one transaction from the command line.

use clap::Parser;
use db_session::config::Config;
use db_session::db::{AnyBackend, Session};
use db_session::format::render;
use std::time::Instant;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    // Logs go to stderr so stdout carries only results
    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    init_tracing(&config);

    let session_config = config.session_config()?;
    let statements = config.statements();
    let parameters = config.parameters(&statements)?;

    info!(
        backend = %session_config.db_type,
        server = %session_config.display_target(),
        statements = statements.len(),
        "Starting db-session v{}",
        env!("CARGO_PKG_VERSION")
    );

    let backend = AnyBackend::from_config(&session_config);
    let mut session = Session::connect(backend, session_config).await?;

    let started = Instant::now();
    let result = session.execute(statements, parameters).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    if let Err(e) = session.close().await {
        error!(error = %e, "Failed to close session");
    }

    match result {
        Ok(output) => {
            println!("{}", render(&output, config.format, elapsed_ms)?);
            Ok(())
        }
        Err(e) => {
            error!(error = %e, suggestion = e.suggestion().unwrap_or_default(), "Execution failed");
            Err(e.into())
        }
    }
}
