#![cfg_attr(test, allow(clippy::unwrap_used))]

use std::net::Ipv4Addr;
use std::process::ExitCode;
use std::str::FromStr;

use anyhow::{Context as _, Result};
use clap::Parser;
use clap::error::ErrorKind;
use overlay::OverlayServer;

mod signals;

/// Name pattern for the virtual interface; the kernel fills in `%d`.
const INTERFACE_PATTERN: &str = "ovp%d";
const OVERLAY_NETMASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 0);
const BIND_ADDRESS: Ipv4Addr = Ipv4Addr::UNSPECIFIED;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let _ = e.print();

            return if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            };
        }
    };

    setup_logging();

    let num_workers = num_workers();

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(num_workers)
        .enable_all()
        .build()
        .expect("Failed to create tokio runtime");

    tracing::debug!(%num_workers, "Created runtime");

    match runtime.block_on(try_main(cli)) {
        Ok(()) => {
            tracing::info!("Goodbye!");

            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!("{e:#}");

            ExitCode::FAILURE
        }
    }
}

async fn try_main(cli: Cli) -> Result<()> {
    tracing::info!(version = env!("CARGO_PKG_VERSION"), "Overpass started");

    let mut server = OverlayServer::new(
        INTERFACE_PATTERN,
        cli.address,
        OVERLAY_NETMASK,
        BIND_ADDRESS,
        overlay::OVERLAY_PORT,
    )
    .await
    .context("Failed to create overlay server")?;

    server.start().context("Failed to start overlay server")?;

    if cli.client.is_empty() {
        tracing::info!("No known clients... Overpass functionality will be limited");
    }

    for mapping in &cli.client {
        tracing::info!(
            "Adding known client mapping {} -> {}",
            mapping.overlay,
            mapping.external
        );

        server
            .add_known_client(mapping.overlay, mapping.external)
            .context("Failed to register client")?;
    }

    let mut terminate = signals::Terminate::new().context("Failed to install signal handlers")?;
    terminate.recv().await;

    tracing::info!("Caught signal: shutting down");

    Ok(())
}

fn setup_logging() {
    use tracing_subscriber::EnvFilter;

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
}

fn num_workers() -> usize {
    let cores = std::thread::available_parallelism()
        .map(std::num::NonZeroUsize::get)
        .unwrap_or(1);

    // Make sure we have at least two workers: one direction of traffic must
    // never starve the other.
    std::cmp::max(2, cores)
}

#[derive(Parser, Debug)]
#[command(version, about = "User-space overlay network agent", long_about = None)]
struct Cli {
    /// IPv4 address to use on the overlay network. Needs to be unique among clients.
    #[arg(long)]
    address: Ipv4Addr,

    /// Known client, as `<overlay client IP>:<external IP>`. May be repeated.
    #[arg(short, long = "client")]
    client: Vec<ClientSpec>,
}

/// A peer registration: where on the overlay it lives, and where it really is.
#[derive(Debug, Clone)]
struct ClientSpec {
    overlay: Ipv4Addr,
    external: Ipv4Addr,
}

impl FromStr for ClientSpec {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (overlay, external) = s
            .split_once(':')
            .context("expected <overlay client IP>:<external IP>")?;

        Ok(Self {
            overlay: overlay.parse().context("invalid overlay client IP")?,
            external: external.parse().context("invalid external IP")?,
        })
    }
}
