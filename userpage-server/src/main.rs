mod config;
mod crypto;
mod db;
mod webserver;

use crate::{
    config::ServerConfig,
    db::{UserpageDb, DB},
};
use anyhow::Context;
use clap::{Parser, Subcommand};
use std::{path::PathBuf, sync::Arc};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "userpage-server")]
#[command(about = "Profile records, pictures and accounts for the user page", long_about = None)]
struct Cli {
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Start the userpage server")]
    Start {
        #[arg(long, value_name = "API_SERVER_PORT")]
        api_server_port: Option<u16>,

        #[arg(long, value_name = "API_SERVER_HOSTNAME")]
        api_server_hostname: Option<String>,

        #[arg(short, long, value_name = "DATA_DIRECTORY")]
        data_directory: Option<PathBuf>,

        #[arg(long, value_name = "PUBLIC_URL")]
        public_url: Option<String>,

        #[arg(long, value_name = "LOG_LEVEL")]
        log_level: Option<String>,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut config = ServerConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Start {
            api_server_port,
            api_server_hostname,
            data_directory,
            public_url,
            log_level,
        } => {
            if let Some(port) = api_server_port {
                config.api_server_port = port;
            }
            if let Some(hostname) = api_server_hostname {
                config.api_server_hostname = hostname;
            }
            if let Some(dir) = data_directory {
                config.data_directory = dir;
            }
            if public_url.is_some() {
                config.public_url = public_url;
            }
            if let Some(level) = log_level {
                config.log_level = level;
            }

            // Set up tracing; RUST_LOG wins over the configured level
            let filter = EnvFilter::try_from_default_env()
                .or_else(|_| EnvFilter::try_new(&config.log_level))
                .context("invalid log level")?;
            let collector = tracing_subscriber::fmt().with_env_filter(filter).finish();
            tracing::subscriber::set_global_default(collector)
                .context("There was a problem setting up tracing")?;

            let addr = config.socket_addr()?;
            std::fs::create_dir_all(&config.data_directory).with_context(|| {
                format!(
                    "creating data directory {}",
                    config.data_directory.display()
                )
            })?;
            let db_file = config.db_path().to_string_lossy().into_owned();

            // Create tokio async runtime
            let rt = tokio::runtime::Runtime::new()?;

            rt.block_on(async move {
                // Create or open the datastore
                let ds = Arc::new(UserpageDb::new(db_file, config.public_url()).await?);

                let app = webserver::router(ds.clone(), config.max_upload_bytes)
                    .layer(webserver::cors(&config.cors_origins)?);

                tracing::info!(%addr, public_url = %config.public_url(), "userpage server listening");
                println!("\nuserpage started successfully! (Press Ctrl+C to exit)");

                webserver::start_webserver(addr, app).await?;

                // Make sure everything written so far hits the disk
                ds.db.flush_async().await?;
                anyhow::Ok(())
            })?;
        }
    }

    Ok(())
}
