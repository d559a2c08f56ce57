use std::process;

use anyhow::Context as _;
use clap::Parser;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

use stratum::cli::{execute, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = load_env(&cli) {
        error!("{:#}", e);
        process::exit(1);
    }

    match execute(cli).await {
        Ok(output) => print!("{}", output),
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            process::exit(1);
        }
    }
}

/// Tokens and passwords in contexts may reference variables from a .env file
fn load_env(cli: &Cli) -> anyhow::Result<()> {
    if let Some(ref env_file) = cli.env_file {
        dotenvy::from_path(env_file)
            .with_context(|| format!("Failed to load env file {}", env_file.display()))?;
    } else if let Ok(path) = dotenvy::dotenv() {
        debug!("Loaded {}", path.display());
    }
    Ok(())
}
