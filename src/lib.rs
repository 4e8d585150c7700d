//! Multi-transport relay
//!
//! A relay process that simultaneously serves three transports and
//! bridges them:
//!
//! - **Datagram ingest**: a video producer sends chunked JPEG frames;
//!   the relay reassembles out-of-order, possibly-lossy chunks into
//!   complete frames under a staleness timeout.
//! - **Duplex sessions**: persistent full-duplex connections on two
//!   planes — a control/chat channel routed by client name, and a
//!   video-subscription channel fed by the broadcaster.
//! - **Stream sessions**: persistent connections speaking
//!   newline-delimited JSON, served thread-per-connection.
//!
//! ```text
//!  producer ──datagrams──► reassembly ──► bounded queue ──► fan-out ──► subscribers
//!
//!  stream/control client ──JSON──► routing engine ──► named target sessions
//! ```
//!
//! Delivery is fire-and-forget throughout: no acknowledgements, no
//! retries, no ordering between independent senders. A failing session
//! only ever affects itself.
//!
//! # Example
//!
//! ```no_run
//! use relay_rs::{RelayConfig, RelayServer};
//!
//! #[tokio::main]
//! async fn main() -> relay_rs::Result<()> {
//!     let server = RelayServer::new(RelayConfig::default());
//!     server.run_until(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     }).await
//! }
//! ```

pub mod broadcast;
pub mod config;
pub mod error;
pub mod media;
pub mod protocol;
pub mod reassembly;
pub mod registry;
pub mod routing;
pub mod server;
pub mod stats;

pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use protocol::envelope::ControlMessage;
pub use routing::RoutingTable;
pub use server::RelayServer;
