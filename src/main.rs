use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::{info, warn};

use msim_server::config::ServerSettings;
use msim_server::service::server::{start_server, ServerState};
use msim_server::store::MemoryStore;
use msim_server::utils::logging::init_logging;
use msim_server::utils::metrics::init_metrics;
use msim_server::Result;

#[derive(Parser)]
#[command(name = "msim-server")]
#[command(about = "MySpaceIM protocol server", long_about = None)]
struct Cli {
    /// TOML settings file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Listen address, overrides the settings file
    #[arg(short, long)]
    address: Option<String>,

    /// Print an example settings file and exit
    #[arg(long)]
    print_config: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.print_config {
        println!("{}", ServerSettings::example_config());
        return Ok(());
    }

    let mut settings = match &cli.config {
        Some(path) => ServerSettings::from_file(path)?,
        None => ServerSettings::default(),
    };
    settings.apply_env();
    if let Some(address) = cli.address {
        settings.server.address = address;
    }
    settings.validate_strict()?;

    init_logging(&settings.logging)?;
    init_metrics();

    if settings.accounts.is_empty() {
        warn!("No accounts configured; every login will be rejected");
    }
    info!(
        accounts = settings.accounts.len(),
        address = %settings.server.address,
        "Starting {}",
        settings.logging.app_name
    );

    let store = Arc::new(MemoryStore::with_accounts(settings.accounts));
    let state = Arc::new(ServerState::with_store(settings.server, store));
    start_server(state).await
}
