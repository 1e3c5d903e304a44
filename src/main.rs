/* STATIC Proxy (AGPL-3.0)

Copyright (C) 2025 - 404 Contributors

This program is free software: you can redistribute it and/or modify
it under the terms of the GNU Affero General Public License as published by
the Free Software Foundation, either version 3 of the License, or
(at your option) any later version.

This program is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
GNU Affero General Public License for more details.

You should have received a copy of the GNU Affero General Public License
along with this program.  If not, see <https://www.gnu.org/licenses/>.

*/

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use relay_proxy::{app::RelayApp, config::RelayConfig, utils::init_tracing};

/// Content-rewriting forward proxy.
///
/// Behavior lives in the TOML config; the flags below only pick the file, the log format,
/// and optionally override the listener.
#[derive(Debug, Parser)]
#[command(name = "relay", about = "Relay: content-rewriting forward proxy")]
struct Cli {
    /// Path to the relay configuration file (TOML).
    #[arg(short, long, default_value = "config/relay.example.toml")]
    config: PathBuf,

    /// Emit JSON-formatted logs.
    #[arg(long, default_value_t = false)]
    json_logs: bool,

    /// Overrides `listener.bind_address`.
    #[arg(long)]
    bind_address: Option<String>,

    /// Overrides `listener.bind_port`.
    #[arg(long)]
    bind_port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_tracing(cli.json_logs);

    let mut config = RelayConfig::load(&cli.config)
        .with_context(|| format!("could not load {}", cli.config.display()))?;
    if let Some(address) = cli.bind_address {
        config.listener.bind_address = address;
    }
    if let Some(port) = cli.bind_port {
        config.listener.bind_port = port;
    }

    let app = RelayApp::new(config)?;
    app.run().await
}
