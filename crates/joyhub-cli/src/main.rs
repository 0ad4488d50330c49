//! joyhub CLI: run the hub and inspect its stored data.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use joyhub_driver::mock::MockDriver;
use joyhub_hub::{server, setup, Config, Hub};
use joyhub_store::Store;
use tokio::net::TcpListener;

#[derive(Parser)]
#[command(
    name = "joyhub",
    about = "Share emulated game controllers between browser clients",
    version,
    propagate_version = true
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the hub against the simulated controller driver.
    Serve {
        /// Path to configuration file.
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Address to bind, overriding the config.
        #[arg(long)]
        bind: Option<String>,

        /// Port to listen on, overriding the config.
        #[arg(short, long)]
        port: Option<u16>,

        /// Simulated macros finish after this many milliseconds.
        #[arg(long, default_value_t = 1000)]
        mock_macro_ms: u64,
    },

    /// Print the known-device registry.
    Devices {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the saved macro library.
    Macros {
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Print the default configuration as TOML.
    DefaultConfig,
}

fn init_tracing(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Serve {
            config,
            bind,
            port,
            mock_macro_ms,
        } => {
            let mut config = setup::load_config(config.as_deref())?;
            init_tracing(&config.server.log_level);
            if let Some(bind) = bind {
                config.server.bind = bind;
            }
            if let Some(port) = port {
                config.server.port = port;
            }

            tracing::warn!("no hardware driver linked, using the simulated controller driver");
            let driver =
                MockDriver::new().with_macro_duration(Duration::from_millis(mock_macro_ms));
            let hub = Hub::new(&config, Arc::new(driver));
            tracing::info!(data_dir = %hub.store().dir().display(), "storage ready");

            let addr = format!("{}:{}", config.server.bind, config.server.port);
            let listener = TcpListener::bind(&addr).await?;
            server::serve(hub, listener).await?;
        }
        Commands::Devices { config } => {
            let store = open_store(config)?;
            let devices = store.known_devices().await?;
            println!("{}", serde_json::to_string_pretty(&devices)?);
        }
        Commands::Macros { config } => {
            let store = open_store(config)?;
            let macros = store.macros().await?;
            println!("{}", serde_json::to_string_pretty(&macros)?);
        }
        Commands::DefaultConfig => {
            print!("{}", toml::to_string_pretty(&Config::default())?);
        }
    }

    Ok(())
}

fn open_store(config: Option<PathBuf>) -> anyhow::Result<Store> {
    let config = setup::load_config(config.as_deref())?;
    init_tracing(&config.server.log_level);
    Ok(Store::open(setup::data_dir(&config)))
}
