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

use anyhow::Result;
use async_trait::async_trait;
use http::header::{HeaderValue, CACHE_CONTROL};

use crate::proxy::{flow::Flow, response};

use super::FlowStage;

/// Upstream headers that never reach the client: transport framing the proxy redoes,
/// framing and security policies that would break a re-origined page, and caching the
/// proxy decides itself.
pub const EXCLUDED_RESPONSE_HEADERS: &[&str] = &[
    "content-encoding",
    "transfer-encoding",
    "connection",
    "keep-alive",
    "content-length",
    "strict-transport-security",
    "content-security-policy",
    "content-security-policy-report-only",
    "x-frame-options",
    "cross-origin-embedder-policy",
    "cross-origin-opener-policy",
    "cache-control",
    "referrer-policy",
];

/// Filters upstream response headers and sets Cache-Control from the content type.
pub struct ResponseHeadersStage;

#[async_trait]
impl FlowStage for ResponseHeadersStage {
    async fn on_response_headers(&self, flow: &mut Flow) -> Result<()> {
        let Some(response) = flow.response.as_mut() else { return Ok(()) };

        for name in EXCLUDED_RESPONSE_HEADERS {
            if response.headers.remove(*name).is_some() {
                flow.metadata.headers_dropped.push((*name).to_string());
            }
        }

        let directive = response::cache_directive(response::content_type(&response.headers));
        response
            .headers
            .insert(CACHE_CONTROL, HeaderValue::from_static(directive));
        Ok(())
    }
}
