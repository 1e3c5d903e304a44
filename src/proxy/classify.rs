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

use std::net::{Ipv4Addr, Ipv6Addr};

use http::{header, HeaderMap, HeaderValue};
use serde::Serialize;
use url::{form_urlencoded, Host, Url};

use crate::{
    config::BlockPolicy,
    utils::{ProxyError, ProxyResult},
};

pub const AD_BLOCK: &str = "adBlock";
pub const BLOCK_IMAGES: &str = "blockImages";
pub const STEALTH_MODE: &str = "stealthMode";
pub const BLOCK_SCRIPTS: &str = "blockScripts";
pub const OPEN_LINKS_IN_NEW_TAB: &str = "openLinksInNewTab";

/// Preflight answers are cacheable for a day.
pub const PREFLIGHT_MAX_AGE_SECS: u32 = 86_400;

/// Ordered pass-through query parameters: every pair except `url`, in arrival order.
///
/// The recognized keys (`adBlock`, `blockImages`, `stealthMode`, `blockScripts`,
/// `openLinksInNewTab`) are read through [`ProxyParams::flag`]; everything else is carried
/// opaquely so it survives navigation unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProxyParams {
    entries: Vec<(String, String)>,
}

impl ProxyParams {
    pub fn new(entries: Vec<(String, String)>) -> Self {
        Self { entries }
    }

    /// First value for `key`, if any.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// A flag is on only when its first value is exactly `true`.
    pub fn flag(&self, key: &str) -> bool {
        self.get(key) == Some("true")
    }

    /// Form-encoded parameter string appended to every rewritten link.
    pub fn serialize(&self) -> String {
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in &self.entries {
            serializer.append_pair(key, value);
        }
        serializer.finish()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyFlags {
    pub ad_block: bool,
    pub block_images: bool,
    pub stealth_mode: bool,
    pub block_scripts: bool,
    pub open_links_in_new_tab: bool,
}

impl ProxyFlags {
    pub fn from_params(params: &ProxyParams) -> Self {
        Self {
            ad_block: params.flag(AD_BLOCK),
            block_images: params.flag(BLOCK_IMAGES),
            stealth_mode: params.flag(STEALTH_MODE),
            block_scripts: params.flag(BLOCK_SCRIPTS),
            open_links_in_new_tab: params.flag(OPEN_LINKS_IN_NEW_TAB),
        }
    }
}

/// A validated proxy request: absolute http(s) target plus its flag set.
#[derive(Debug, Clone)]
pub struct ProxyRequest {
    pub target: Url,
    pub flags: ProxyFlags,
    pub params: ProxyParams,
}

impl ProxyRequest {
    /// Parses `url=<abs-url>&flag=...` from the endpoint's query string.
    pub fn from_query(query: Option<&str>) -> ProxyResult<Self> {
        let mut target: Option<String> = None;
        let mut entries = Vec::new();

        for (key, value) in form_urlencoded::parse(query.unwrap_or_default().as_bytes()) {
            if key == "url" {
                if target.is_none() {
                    target = Some(value.into_owned());
                }
            } else {
                entries.push((key.into_owned(), value.into_owned()));
            }
        }

        let raw = target
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .ok_or(ProxyError::MissingTargetUrl)?;
        let target = Url::parse(&raw).map_err(|err| ProxyError::InvalidTargetUrl(format!("{raw}: {err}")))?;
        if !matches!(target.scheme(), "http" | "https") || target.host_str().is_none() {
            return Err(ProxyError::InvalidTargetUrl(raw));
        }

        let params = ProxyParams::new(entries);
        Ok(Self {
            target,
            flags: ProxyFlags::from_params(&params),
            params,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    AdDomain,
    ImageExtension,
}

impl BlockReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlockReason::AdDomain => "ad_domain",
            BlockReason::ImageExtension => "image_extension",
        }
    }
}

/// Outcome of request classification. `Blocked` exits early with an empty 204.
#[derive(Debug)]
pub enum Classification {
    Proxy(ProxyRequest),
    Blocked(ProxyRequest, BlockReason),
}

/// Request Classifier: parse the target, then apply the blocking policy.
pub fn classify(
    query: Option<&str>,
    policy: &BlockPolicy,
    block_private_networks: bool,
) -> ProxyResult<Classification> {
    let request = ProxyRequest::from_query(query)?;

    if block_private_networks && is_private_target(&request.target) {
        return Err(ProxyError::PrivateNetwork(request.target.to_string()));
    }

    if request.flags.ad_block && policy.is_ad_url(&request.target) {
        return Ok(Classification::Blocked(request, BlockReason::AdDomain));
    }
    if request.flags.block_images && policy.is_image_path(request.target.path()) {
        return Ok(Classification::Blocked(request, BlockReason::ImageExtension));
    }

    Ok(Classification::Proxy(request))
}

/// Loopback, private, link-local, unspecified and `localhost` targets.
pub fn is_private_target(url: &Url) -> bool {
    match url.host() {
        Some(Host::Ipv4(ip)) => is_private_v4(ip),
        Some(Host::Ipv6(ip)) => is_private_v6(ip),
        Some(Host::Domain(domain)) => {
            let domain = domain.trim_end_matches('.').to_ascii_lowercase();
            domain == "localhost" || domain.ends_with(".localhost")
        }
        None => true,
    }
}

fn is_private_v4(ip: Ipv4Addr) -> bool {
    ip.is_loopback() || ip.is_private() || ip.is_link_local() || ip.is_unspecified() || ip.octets()[0] == 0
}

fn is_private_v6(ip: Ipv6Addr) -> bool {
    if let Some(mapped) = ip.to_ipv4_mapped() {
        return is_private_v4(mapped);
    }
    let first = ip.segments()[0];
    ip.is_loopback() || ip.is_unspecified() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
}

/// CORS preflight headers. Nothing is remembered between the preflight and the real request.
pub fn preflight_headers(request: &HeaderMap) -> HeaderMap {
    let mut headers = HeaderMap::new();
    let origin = request
        .get(header::ORIGIN)
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static("*"));
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET,HEAD,POST,PUT,DELETE,OPTIONS"),
    );
    if let Some(requested) = request.get(header::ACCESS_CONTROL_REQUEST_HEADERS) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, requested.clone());
    }
    headers.insert(header::ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
    headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from(PREFLIGHT_MAX_AGE_SECS));
    headers.insert(header::VARY, HeaderValue::from_static("Origin"));
    headers
}
