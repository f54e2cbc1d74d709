use crate::app::AppState;
use crate::config::Config;
use crate::db::{import_postal_codes, Database};
use crate::responses::error_to_response;
use crate::router::handle;
use astra::Server;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod app;
mod config;
mod db;
mod domain;
mod errors;
mod geocoder;
mod map;
mod markers;
mod responses;
mod router;
mod session;
mod templates;

#[cfg(test)]
mod tests;

#[derive(Parser)]
#[command(name = "pinmap", version, about = "Postal code geocoding and listing map markers")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Serve the lookup API and map page (default)
    Serve,
    /// Load a whitespace-delimited postal code file into the store
    Import {
        /// Lines of `<prefix> <suffix> <lat> <lng>` or `<code> <lat> <lng>`
        path: PathBuf,
    },
}

fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .compact()
        .init();

    let cli = Cli::parse();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "invalid configuration");
            std::process::exit(2);
        }
    };

    let result = match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config),
        Command::Import { path } => import(&config, &path),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "pinmap exited with error");
        std::process::exit(1);
    }
}

fn import(config: &Config, path: &std::path::Path) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::new(config.db_path.clone());
    let summary = import_postal_codes(&db, path)?;
    println!(
        "Imported {} postal codes into {} ({} lines applied, {} skipped)",
        summary.records, config.db_path, summary.lines_applied, summary.skipped_lines
    );
    Ok(())
}

fn serve(config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let state = AppState::from_config(config)?;

    tracing::info!(
        addr = %config.bind,
        db = %config.db_path,
        provider = config.geocoder_url.as_ref().map(|u| u.as_str()).unwrap_or("disabled"),
        "starting server"
    );

    let server = Server::bind(&config.bind).max_workers(config.workers);

    server.serve(move |req, _info| {
        let path = req.uri().path().to_string();
        match handle(req, &state) {
            Ok(resp) => resp,
            Err(err) => error_to_response(err, &path),
        }
    })?;

    tracing::info!("server shut down cleanly");
    Ok(())
}
