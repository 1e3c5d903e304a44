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

use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{bail, Context, Result};
use serde::Deserialize;

/// Configuration loaders and structures for the relay proxy.
///
/// These types mirror `relay.example.toml` and apply defaults for every key, so an empty
/// file (or no file at all) yields a working loopback deployment.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RelayConfig {
    /// Listener configuration (bind address and port).
    #[serde(default)]
    pub listener: ListenerConfig,
    /// Proxy endpoint and upstream behavior.
    #[serde(default)]
    pub proxy: ProxySettings,
    /// Additions to the built-in ad-domain and image-extension lists.
    #[serde(default)]
    pub policy: PolicyConfig,
    /// Stealth identity profile selection.
    #[serde(default)]
    pub stealth: StealthConfig,
    /// Telemetry configuration (stdout vs structured log output).
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl RelayConfig {
    /// Reads the config file, deserializes TOML, and normalizes relative paths.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        let mut cfg = Self::from_toml(&raw)
            .with_context(|| format!("invalid relay config: {}", path.display()))?;

        if let Some(profile) = cfg.stealth.profile_path.as_mut() {
            Self::absolutize(path.parent(), profile);
        }

        Ok(cfg)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let cfg: RelayConfig = toml::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn validate(&self) -> Result<()> {
        let endpoint = &self.proxy.endpoint_path;
        if !endpoint.starts_with('/') || endpoint.contains('?') || endpoint.contains('#') {
            bail!("proxy.endpoint_path must be an absolute path without query: {endpoint:?}");
        }
        if self.proxy.stream_buffer_chunks == 0 {
            bail!("proxy.stream_buffer_chunks must be at least 1");
        }
        Ok(())
    }

    /// Resolves a relative path against the config file's location.
    fn absolutize(base_dir: Option<&Path>, target: &mut PathBuf) {
        if target.is_relative() {
            if let Some(dir) = base_dir {
                *target = dir.join(&*target);
            }
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListenerConfig {
    /// Bind address for the HTTP listener (defaults to loopback).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            bind_port: default_bind_port(),
        }
    }
}

fn default_bind_address() -> String {
    "127.0.0.1".into()
}

fn default_bind_port() -> u16 {
    8080
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProxySettings {
    /// Path of the single proxy endpoint. Rewritten links re-enter the proxy here.
    #[serde(default = "default_endpoint_path")]
    pub endpoint_path: String,
    /// Redirects followed transparently before the response is classified.
    #[serde(default = "default_max_redirects")]
    pub max_redirects: usize,
    /// Upstream connect timeout in seconds; 0 leaves the HTTP stack default in place.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Depth of the bounded channel between the upstream reader and the client writer.
    #[serde(default = "default_stream_buffer_chunks")]
    pub stream_buffer_chunks: usize,
    /// Refuse loopback/private/link-local targets before any upstream call.
    #[serde(default)]
    pub block_private_networks: bool,
    /// User-Agent sent upstream when the client supplied none and stealth mode is off.
    #[serde(default = "default_fallback_user_agent")]
    pub fallback_user_agent: String,
}

impl ProxySettings {
    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_secs > 0).then(|| Duration::from_secs(self.connect_timeout_secs))
    }
}

impl Default for ProxySettings {
    fn default() -> Self {
        Self {
            endpoint_path: default_endpoint_path(),
            max_redirects: default_max_redirects(),
            connect_timeout_secs: default_connect_timeout(),
            stream_buffer_chunks: default_stream_buffer_chunks(),
            block_private_networks: false,
            fallback_user_agent: default_fallback_user_agent(),
        }
    }
}

fn default_endpoint_path() -> String {
    "/proxy".into()
}

fn default_max_redirects() -> usize {
    10
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_stream_buffer_chunks() -> usize {
    8
}

fn default_fallback_user_agent() -> String {
    "Relay-Proxy/1.0".into()
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PolicyConfig {
    /// Appended to the built-in ad-domain list.
    #[serde(default)]
    pub extra_ad_domains: Vec<String>,
    /// Appended to the built-in image-extension list (with or without the leading dot).
    #[serde(default)]
    pub extra_image_extensions: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StealthConfig {
    /// JSON header profile used when `stealthMode=true`. Built-in profile when unset.
    #[serde(default)]
    pub profile_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelemetryConfig {
    #[serde(default)]
    pub mode: TelemetryMode,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TelemetryMode {
    /// Print structured, readable logs through tracing.
    #[default]
    Stdout,
    /// Emit one JSON object per event for ingestion systems.
    Json,
}
