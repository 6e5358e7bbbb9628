//! Workdesk - business console client
//!
#![doc = "Workdesk - business console client"]
#![doc = "Main entry point for the Workdesk command-line client."]

use anyhow::Result;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use workdesk::cli::{Cli, Commands};
use workdesk::commands;
use workdesk::config::Config;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let cli = Cli::parse_args();

    init_tracing(cli.verbose);

    // Load and validate configuration
    let config_path = cli.config.as_deref().unwrap_or("config/config.yaml");
    let config = Config::load(config_path, &cli)?;
    config.validate()?;

    match cli.command {
        Commands::Login { email, password } => {
            tracing::info!("Starting login for {}", email);
            commands::session::login(&config, &email, password).await
        }
        Commands::Logout => commands::session::logout(&config),
        Commands::Status => commands::session::status(&config),
        Commands::List { kind, filters, all } => {
            tracing::debug!("Listing {} with {} filters", kind, filters.len());
            commands::resources::list(&config, &kind, filters, all).await
        }
        Commands::Get { kind, id } => commands::resources::get(&config, &kind, &id).await,
        Commands::Create { kind, data } => {
            commands::resources::create(&config, &kind, &data).await
        }
        Commands::Update { kind, id, data } => {
            commands::resources::update(&config, &kind, &id, &data).await
        }
        Commands::Delete { kind, id } => commands::resources::delete(&config, &kind, &id).await,
    }
}

/// Initialize tracing subscriber with environment filter
///
/// `RUST_LOG` wins when set; otherwise `--verbose` selects debug output.
fn init_tracing(verbose: bool) {
    let default_filter = if verbose { "workdesk=debug" } else { "workdesk=info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}
