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

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::net::TcpListener;

use crate::{
    assets::{ScriptBundle, BUILTIN_STEALTH_PROFILE, BUILTIN_STEALTH_PROFILE_NAME},
    config::{BlockPolicy, HeaderProfile, RelayConfig},
    proxy::{client::UpstreamClient, stages::StagePipeline, ProxyServer, RelayState},
    telemetry::TelemetrySink,
};

/// RelayApp wires configuration into the running proxy: blocking policy, stealth profile,
/// stage pipeline, upstream client, telemetry, and finally the server that owns them.
///
/// Everything built here is immutable after startup and shared by all request tasks.
pub struct RelayApp {
    server: ProxyServer,
}

impl RelayApp {
    pub fn new(config: RelayConfig) -> Result<Self> {
        let telemetry = TelemetrySink::new(config.telemetry.clone());

        let policy = BlockPolicy::from_config(&config.policy);
        let profile = match &config.stealth.profile_path {
            Some(path) => HeaderProfile::load_from_file(path)?,
            None => HeaderProfile::from_json(BUILTIN_STEALTH_PROFILE, BUILTIN_STEALTH_PROFILE_NAME)
                .context("built-in stealth profile is invalid")?,
        };
        tracing::debug!(
            ad_domains = policy.ad_domain_count(),
            profile = profile.name(),
            "blocking policy and stealth profile loaded"
        );

        let scripts = ScriptBundle::load();
        let pipeline = StagePipeline::build(&config, profile, &scripts)?;
        let client = UpstreamClient::new(&config.proxy)?;

        let state = Arc::new(RelayState {
            settings: config.proxy.clone(),
            policy,
            pipeline,
            client,
            telemetry,
        });
        let server = ProxyServer::new(config.listener.clone(), state);

        Ok(Self { server })
    }

    /// Binds the configured listener and serves until Ctrl+C.
    pub async fn run(self) -> Result<()> {
        tokio::select! {
            result = self.server.run() => result,
            signal = tokio::signal::ctrl_c() => {
                signal.context("failed to listen for shutdown signal")?;
                tracing::info!("shutdown signal received");
                Ok(())
            }
        }
    }

    /// Serves on a listener the caller already bound (ephemeral ports in tests).
    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        self.server.serve(listener).await
    }
}
