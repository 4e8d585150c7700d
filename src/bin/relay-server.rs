//! Relay server binary
//!
//! Run with: cargo run --bin relay-server [HOST]
//!
//! The optional HOST argument rebinds every transport to that address
//! (default 0.0.0.0). Ports are fixed by the reference deployment:
//! 5555 stream, 8765 duplex control, 8766 duplex video, 5005 datagram.
//!
//! Logging is controlled through RUST_LOG, e.g.:
//!   RUST_LOG=relay_rs=debug cargo run --bin relay-server

use std::net::{IpAddr, SocketAddr};

use relay_rs::{RelayConfig, RelayServer};

fn print_usage() {
    eprintln!("Usage: relay-server [HOST]");
    eprintln!();
    eprintln!("Arguments:");
    eprintln!("  HOST    Address to bind all transports to (default: 0.0.0.0)");
    eprintln!();
    eprintln!("Examples:");
    eprintln!("  relay-server              # binds to 0.0.0.0");
    eprintln!("  relay-server 127.0.0.1    # local only");
}

fn parse_host(arg: &str) -> Result<IpAddr, String> {
    let normalized = if arg == "localhost" { "127.0.0.1" } else { arg };
    normalized
        .parse()
        .map_err(|_| format!("Invalid host: '{arg}'. Expected an IP address or 'localhost'"))
}

fn config_for_host(host: IpAddr) -> RelayConfig {
    let defaults = RelayConfig::default();
    let rebind = |addr: SocketAddr| SocketAddr::new(host, addr.port());

    RelayConfig::default()
        .stream_addr(rebind(defaults.stream_addr))
        .control_addr(rebind(defaults.control_addr))
        .video_addr(rebind(defaults.video_addr))
        .datagram_addr(rebind(defaults.datagram_addr))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = std::env::args().collect();

    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let config = match args.get(1) {
        Some(host_arg) => match parse_host(host_arg) {
            Ok(host) => config_for_host(host),
            Err(e) => {
                eprintln!("Error: {e}");
                eprintln!();
                print_usage();
                std::process::exit(1);
            }
        },
        None => RelayConfig::default(),
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("relay_rs=info".parse()?),
        )
        .init();

    let server = RelayServer::new(config);

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Failed to install ctrl-c handler");
            }
        })
        .await?;

    Ok(())
}
