//! flowlat - per-flow latency probe
//!
//! Attaches the traffic classifier to a network interface and prints one
//! latency line per completed TCP handshake or UDP request/response pair.
//!
//! ## Usage
//!
//! ```bash
//! # Observe everything crossing eth0
//! sudo ./flowlat -i eth0 --ebpf-object path/to/flowlat.o
//!
//! # Only flows involving 1.1.1.1 on port 53
//! sudo ./flowlat -i eth0 --ip 1.1.1.1 --port 53
//! ```

use std::net::IpAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use log::{error, info};
use pnet::datalink;
use tokio::signal::unix::{signal, SignalKind};
use tokio_util::sync::CancellationToken;

use flowlat_daemon::{events, FlowTable, Probe, UserFilter};

/// Per-flow latency probe for TCP handshakes and UDP request/response pairs
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Interface to attach the probe to
    #[clap(short, long, default_value = "eth0")]
    iface: String,

    /// IP address to track (optional)
    #[clap(long)]
    ip: Option<IpAddr>,

    /// Port number to track (optional)
    #[clap(long, value_parser = clap::value_parser!(u16).range(1..))]
    port: Option<u16>,

    /// Path to the classifier object file (if not embedded)
    #[clap(long)]
    ebpf_object: Option<PathBuf>,

    /// Verbose logging
    #[clap(short, long)]
    verbose: bool,
}

/// Print all available network interfaces, one per line
fn display_interfaces() {
    for (i, iface) in datalink::interfaces().iter().enumerate() {
        println!("{i}) {}", iface.name);
    }
}

fn resolve_interface(name: &str) -> Option<datalink::NetworkInterface> {
    datalink::interfaces().into_iter().find(|i| i.name == name)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    env_logger::Builder::from_default_env()
        .filter_level(if args.verbose {
            log::LevelFilter::Debug
        } else {
            log::LevelFilter::Info
        })
        .init();

    let Some(iface) = resolve_interface(&args.iface) else {
        error!("Could not find interface {}", args.iface);
        display_interfaces();
        std::process::exit(1);
    };

    let filter = UserFilter::new(args.ip, args.port);
    if let Some(ip) = filter.addr() {
        info!("Filtering results on IP {ip}");
    }
    if let Some(port) = filter.port() {
        info!("Filtering results on port {port}");
    }

    let ctx = CancellationToken::new();
    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::spawn({
        let ctx = ctx.clone();
        async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("Caught SIGINT... Exiting"),
                _ = sigterm.recv() => info!("Caught SIGTERM... Exiting"),
            }
            ctx.cancel();
        }
    });

    info!("Starting up the probe on {}", iface.name);
    let probe = Probe::load(&iface.name, args.ebpf_object)?;
    let table = Arc::new(FlowTable::new());

    events::run(ctx, probe, table, filter).await
}
