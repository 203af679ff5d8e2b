//! # stepwright-relay
//!
//! MCP server that puts the stepwright engine behind a coordinating process.
//! The coordinator loads a page snapshot, records steps by XPath and replays
//! steps from their bundles; every replayed step answers true or false and
//! leaves loading/success/error notices behind.
//!
//! ```rust,no_run
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! stepwright_relay::run_server(stepwright::EngineConfig::default()).await
//! # }
//! ```

mod relay;
mod server;

pub use relay::Relay;
pub use server::{run_server, RelayServer};
