//! OTA update console.
//!
//! Runs a simulated update service and a console client that drives a full
//! update session against it.
//!
//! Run both in one process:
//!   cargo run -p ota-demo-console -- demo --install
//!
//! Or separately:
//!   cargo run -p ota-demo-console -- serve --port 8700
//!   cargo run -p ota-demo-console -- update --url ws://127.0.0.1:8700 --install

mod console;
mod service;

use clap::{Args, Parser, Subcommand};
use ota_client::ClientConfig;
use ota_core::Channel;
use service::ServiceOptions;
use std::net::SocketAddr;
use std::path::PathBuf;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ota-console", about = "Drive an OTA update session")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the simulated update service.
    Serve {
        #[arg(long, default_value_t = 8700)]
        port: u16,
        #[command(flatten)]
        service: ServiceArgs,
    },
    /// Connect to a running service and update.
    Update {
        #[command(flatten)]
        client: ClientArgs,
    },
    /// Start a service on a free port and update against it.
    Demo {
        #[command(flatten)]
        service: ServiceArgs,
        #[command(flatten)]
        client: ClientArgs,
    },
}

#[derive(Args)]
struct ServiceArgs {
    /// Report the system as up to date.
    #[arg(long)]
    up_to_date: bool,
    /// Fail validation of downloaded packages.
    #[arg(long)]
    corrupt: bool,
}

#[derive(Args)]
struct ClientArgs {
    /// Service URL; overrides `service_url` from the config file.
    #[arg(long, env = "OTA_SERVICE_URL")]
    url: Option<String>,
    /// TOML client configuration.
    #[arg(long, env = "OTA_CONFIG")]
    config: Option<PathBuf>,
    /// Release channel preference (live, rc, dev).
    #[arg(long)]
    channel: Option<Channel>,
    /// Only download over wifi.
    #[arg(long)]
    wifi_only: bool,
    /// Offer candidates from every channel.
    #[arg(long)]
    all_channels: bool,
    /// Search only.
    #[arg(long)]
    no_download: bool,
    /// Install after a successful download.
    #[arg(long)]
    install: bool,
}

impl ServiceArgs {
    fn options(&self) -> ServiceOptions {
        ServiceOptions {
            up_to_date: self.up_to_date,
            corrupt: self.corrupt,
            ..ServiceOptions::default()
        }
    }
}

impl ClientArgs {
    fn config(&self) -> anyhow::Result<ClientConfig> {
        let mut config = match &self.config {
            Some(path) => ClientConfig::load(path)?,
            None => ClientConfig::default(),
        };
        if let Some(url) = &self.url {
            config.service_url = Some(url.clone());
        }
        if let Some(channel) = self.channel {
            config.preferences.channel = channel;
        }
        if self.wifi_only {
            config.preferences.wifi_only = true;
        }
        Ok(config)
    }

    fn plan(&self) -> console::Plan {
        console::Plan {
            all_channels: self.all_channels,
            download: !self.no_download,
            install: self.install,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("ota_console=info".parse()?))
        .init();

    match Cli::parse().command {
        Command::Serve { port, service } => {
            let addr: SocketAddr = ([127, 0, 0, 1], port).into();
            let listener = TcpListener::bind(addr).await?;
            service::run(listener, service.options()).await
        }
        Command::Update { client } => {
            let config = client.config()?;
            let url = config
                .service_url
                .clone()
                .ok_or_else(|| anyhow::anyhow!("no service URL; pass --url or set service_url"))?;
            update(config, &url, client.plan()).await
        }
        Command::Demo { service, client } => {
            let listener = TcpListener::bind(("127.0.0.1", 0)).await?;
            let url = format!("ws://{}", listener.local_addr()?);
            let options = service.options();
            tokio::spawn(async move {
                if let Err(e) = service::run(listener, options).await {
                    tracing::error!("Update service failed: {}", e);
                }
            });
            update(client.config()?, &url, client.plan()).await
        }
    }
}

async fn update(config: ClientConfig, url: &str, plan: console::Plan) -> anyhow::Result<()> {
    tracing::info!("Updating via {} ({})", url, config.endpoint);
    let state = console::run(config, url, plan).await?;
    println!("session ended in phase {}", state.phase);
    if let Some(candidate) = &state.current_candidate {
        println!("candidate: {candidate}");
    }
    Ok(())
}
