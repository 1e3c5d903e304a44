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

use std::{net::SocketAddr, sync::Arc};

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use crate::config::ListenerConfig;

use super::connection::{handle_connection, RelayState};

/// ProxyServer owns the listening socket and spawns one task per client connection.
///
/// - Binds the configured address:port (or takes a pre-bound listener from tests)
/// - Accepts connections in a loop, one tokio task each
/// - Shares `RelayState` (settings, policy, stage pipeline, upstream client, telemetry)
///   read-only through an `Arc`
///
/// **Concurrency:**
/// Every request builds its own `Flow`, so flags, rewrite base and outbound headers of one
/// request are never visible to another. Nothing in `RelayState` is mutated after startup.
pub struct ProxyServer {
    listener_cfg: ListenerConfig,
    state: Arc<RelayState>,
}

impl ProxyServer {
    pub fn new(listener_cfg: ListenerConfig, state: Arc<RelayState>) -> Self {
        Self { listener_cfg, state }
    }

    /// Binds the configured address and serves until the process exits.
    pub async fn run(self) -> Result<()> {
        let addr = SocketAddr::new(
            self.listener_cfg
                .bind_address
                .parse()
                .with_context(|| format!("invalid bind address {:?}", self.listener_cfg.bind_address))?,
            self.listener_cfg.bind_port,
        );
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        self.serve(listener).await
    }

    /// Accept loop over an already bound listener.
    ///
    /// **Error Handling:**
    /// - Bind errors: returned from `run` (fatal)
    /// - Accept errors: returned from here (fatal)
    /// - Connection errors (client reset, malformed HTTP): logged in the task, loop continues
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        let addr = listener.local_addr()?;
        tracing::info!(%addr, endpoint = %self.state.settings.endpoint_path, "relay listener online");

        loop {
            let (socket, peer) = listener.accept().await?;
            let state = self.state.clone();
            tracing::trace!(%peer, "accepted client");

            tokio::spawn(async move {
                if let Err(err) = handle_connection(socket, peer, state).await {
                    tracing::debug!(%peer, "client session ended with error: {err:?}");
                }
            });
        }
    }
}
