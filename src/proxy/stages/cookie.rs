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
use cookie::Cookie;
use http::header::{HeaderValue, COOKIE, SET_COOKIE};

use crate::proxy::flow::Flow;

use super::FlowStage;

/// Forwards the client's cookies upstream and scopes upstream cookies to the proxy origin
/// by dropping their `Domain` attribute.
pub struct CookieStage;

impl CookieStage {
    fn forward_request_cookies(&self, flow: &mut Flow) -> Result<()> {
        let mut collected = String::new();
        let mut count = 0;

        for value in flow.request.headers.get_all(COOKIE).iter() {
            let Ok(raw) = value.to_str() else { continue };
            for parsed in Cookie::split_parse(raw) {
                let Ok(c) = parsed else { continue };
                if count > 0 {
                    collected.push_str("; ");
                }
                collected.push_str(c.name());
                collected.push('=');
                collected.push_str(c.value());
                count += 1;
            }
        }

        if !collected.is_empty() {
            let value = HeaderValue::from_str(&collected).context("invalid Cookie after normalization")?;
            flow.outbound.insert(COOKIE, value);
        }
        flow.metadata.cookies_forwarded = count;
        Ok(())
    }

    fn scope_set_cookies(&self, flow: &mut Flow) -> Result<()> {
        let Some(response) = flow.response.as_mut() else { return Ok(()) };

        let originals: Vec<HeaderValue> = response.headers.get_all(SET_COOKIE).iter().cloned().collect();
        if originals.is_empty() {
            return Ok(());
        }
        response.headers.remove(SET_COOKIE);

        let mut rewritten = 0;
        for value in originals {
            let scoped = match value.to_str() {
                Ok(raw) => {
                    let stripped = strip_domain_attribute(raw);
                    if stripped.len() != raw.len() {
                        rewritten += 1;
                    }
                    HeaderValue::from_str(&stripped).context("invalid Set-Cookie after stripping domain")?
                }
                Err(_) => value,
            };
            response.headers.append(SET_COOKIE, scoped);
        }
        flow.metadata.set_cookies_rewritten = rewritten;
        Ok(())
    }
}

#[async_trait]
impl FlowStage for CookieStage {
    async fn on_request(&self, flow: &mut Flow) -> Result<()> {
        self.forward_request_cookies(flow)
    }

    async fn on_response_headers(&self, flow: &mut Flow) -> Result<()> {
        self.scope_set_cookies(flow)
    }
}

/// Removes every `Domain=` attribute from a Set-Cookie value, keeping the rest verbatim.
pub fn strip_domain_attribute(raw: &str) -> String {
    let mut parts = raw.split(';');
    let mut out = String::with_capacity(raw.len());
    if let Some(pair) = parts.next() {
        out.push_str(pair);
    }
    for attr in parts {
        let name = attr.split('=').next().unwrap_or_default().trim();
        if name.eq_ignore_ascii_case("domain") {
            continue;
        }
        out.push(';');
        out.push_str(attr);
    }
    out
}
