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

use anyhow::{Context, Result};
use async_trait::async_trait;
use http::{
    header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, REFERER, USER_AGENT},
    HeaderMap, HeaderName, HeaderValue,
};
use url::Url;

use crate::{proxy::flow::Flow, rewrite::unwrap_proxy_link};

use super::FlowStage;

pub const DEFAULT_ACCEPT: &str =
    "text/html,application/xhtml+xml,application/xml;q=0.9,image/webp,image/apng,*/*;q=0.8";
pub const DEFAULT_ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9,ja;q=0.8";

/// Builds the base upstream header set. The client's Host and connection headers never
/// reach upstream; only the headers named here are carried over.
pub struct OutboundHeadersStage {
    endpoint: String,
    fallback_user_agent: HeaderValue,
}

impl OutboundHeadersStage {
    pub fn new(endpoint: String, fallback_user_agent: String) -> Result<Self> {
        let fallback_user_agent = HeaderValue::from_str(&fallback_user_agent)
            .with_context(|| format!("invalid fallback user agent {fallback_user_agent:?}"))?;
        Ok(Self {
            endpoint,
            fallback_user_agent,
        })
    }

    /// Referer points at the target's origin unless the client's own Referer was a proxy
    /// link, in which case the page it wraps is used.
    fn referer(&self, flow: &mut Flow) -> Option<HeaderValue> {
        let client = flow.request.headers.get(REFERER).and_then(|v| v.to_str().ok());
        if let Some(raw) = client {
            match Url::parse(raw) {
                Ok(url) => {
                    if let Some(original) = unwrap_proxy_link(&self.endpoint, &url) {
                        if let Ok(value) = HeaderValue::from_str(&original) {
                            flow.metadata.referer_unwrapped = true;
                            return Some(value);
                        }
                    }
                }
                Err(err) => {
                    tracing::debug!(flow_id = %flow.id, referer = raw, error = %err, "could not parse client referer");
                }
            }
        }
        HeaderValue::from_str(&flow.target_url().origin().ascii_serialization()).ok()
    }
}

#[async_trait]
impl FlowStage for OutboundHeadersStage {
    async fn on_request(&self, flow: &mut Flow) -> Result<()> {
        let mut outbound = HeaderMap::new();

        copy_or(&flow.request.headers, &mut outbound, ACCEPT, DEFAULT_ACCEPT);
        copy_or(&flow.request.headers, &mut outbound, ACCEPT_LANGUAGE, DEFAULT_ACCEPT_LANGUAGE);
        if let Some(referer) = self.referer(flow) {
            outbound.insert(REFERER, referer);
        }

        let user_agent = flow
            .request
            .headers
            .get(USER_AGENT)
            .cloned()
            .unwrap_or_else(|| self.fallback_user_agent.clone());
        outbound.insert(USER_AGENT, user_agent);

        if !flow.request.body.is_empty() {
            if let Some(content_type) = flow.request.headers.get(CONTENT_TYPE) {
                outbound.insert(CONTENT_TYPE, content_type.clone());
            }
        }

        flow.outbound = outbound;
        Ok(())
    }
}

fn copy_or(from: &HeaderMap, to: &mut HeaderMap, name: HeaderName, fallback: &'static str) {
    let value = from
        .get(&name)
        .filter(|v| !v.is_empty())
        .cloned()
        .unwrap_or_else(|| HeaderValue::from_static(fallback));
    to.insert(name, value);
}
