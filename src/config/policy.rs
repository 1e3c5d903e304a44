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

use std::collections::HashSet;

use url::Url;

use super::PolicyConfig;

/// Ad and analytics hosts refused when `adBlock=true`. Subdomains match too.
pub const DEFAULT_AD_DOMAINS: &[&str] = &[
    "doubleclick.net",
    "googlesyndication.com",
    "google-analytics.com",
    "googletagservices.com",
    "adservice.google.com",
    "adnxs.com",
    "scorecardresearch.com",
    "crwdcntrl.net",
    "ad.gt",
    "adform.net",
    "taboola.com",
    "outbrain.com",
    "adsrvr.org",
    "criteo.com",
    "pubmatic.com",
    "rubiconproject.com",
    "openx.net",
    "yieldmo.com",
];

/// Path extensions refused when `blockImages=true`.
pub const DEFAULT_IMAGE_EXTENSIONS: &[&str] =
    &[".png", ".jpg", ".jpeg", ".gif", ".webp", ".svg", ".bmp", ".ico"];

/// Process-wide blocking lists. Built once at startup and shared read-only.
#[derive(Debug, Clone)]
pub struct BlockPolicy {
    ad_domains: HashSet<String>,
    image_extensions: Vec<String>,
}

impl Default for BlockPolicy {
    fn default() -> Self {
        Self::from_config(&PolicyConfig::default())
    }
}

impl BlockPolicy {
    pub fn from_config(cfg: &PolicyConfig) -> Self {
        let ad_domains = DEFAULT_AD_DOMAINS
            .iter()
            .map(|d| d.to_string())
            .chain(cfg.extra_ad_domains.iter().cloned())
            .map(|d| d.trim().trim_start_matches('.').to_ascii_lowercase())
            .filter(|d| !d.is_empty())
            .collect();

        let mut image_extensions: Vec<String> = DEFAULT_IMAGE_EXTENSIONS
            .iter()
            .map(|e| e.to_string())
            .chain(cfg.extra_image_extensions.iter().cloned())
            .map(|ext| {
                let ext = ext.trim().to_ascii_lowercase();
                if ext.starts_with('.') {
                    ext
                } else {
                    format!(".{ext}")
                }
            })
            .filter(|ext| ext.len() > 1)
            .collect();
        image_extensions.sort();
        image_extensions.dedup();

        Self {
            ad_domains,
            image_extensions,
        }
    }

    /// True when the host equals a listed domain or is a subdomain of one.
    pub fn is_ad_host(&self, host: &str) -> bool {
        let host = host.trim_end_matches('.').to_ascii_lowercase();
        let mut candidate = host.as_str();
        loop {
            if self.ad_domains.contains(candidate) {
                return true;
            }
            match candidate.split_once('.') {
                Some((_, parent)) => candidate = parent,
                None => return false,
            }
        }
    }

    /// Case-insensitive extension match against the URL path.
    pub fn is_image_path(&self, path: &str) -> bool {
        let lower = path.to_ascii_lowercase();
        self.image_extensions.iter().any(|ext| lower.ends_with(ext.as_str()))
    }

    pub fn is_ad_url(&self, url: &Url) -> bool {
        url.host_str().map(|h| self.is_ad_host(h)).unwrap_or(false)
    }

    pub fn ad_domain_count(&self) -> usize {
        self.ad_domains.len()
    }
}
