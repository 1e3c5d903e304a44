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

use std::{fmt, time::Instant};

use bytes::Bytes;
use http::{HeaderMap, Method, StatusCode, Uri};
use url::Url;
use uuid::Uuid;

use crate::{
    proxy::{classify::ProxyRequest, pump::ByteStream, response::BodyKind},
    rewrite::RewriteContext,
};

/// Flow tracks one proxy request from classification to the last byte written downstream.
///
/// Everything request-scoped lives here (target, flags, rewrite context, outbound headers)
/// so concurrent requests never observe each other's state. A Flow is owned by the task
/// serving the request and mutated through `&mut` by each stage in turn.
#[derive(Debug)]
pub struct Flow {
    /// UUID v7, time-ordered, used for log and telemetry correlation.
    pub id: Uuid,

    /// What the client sent to the proxy endpoint.
    pub request: RequestParts,

    /// Validated target and flag set.
    pub target: ProxyRequest,

    /// Base URL, endpoint and parameter string shared by the HTML, CSS and script rewriters.
    pub context: RewriteContext,

    /// Headers for the upstream request. Built from scratch; client headers are copied in
    /// selectively by the request stages.
    pub outbound: HeaderMap,

    /// None until upstream answers.
    pub response: Option<ResponseParts>,

    pub metadata: FlowMetadata,
}

impl Flow {
    pub fn new(request: RequestParts, target: ProxyRequest, endpoint: &str) -> Self {
        let context = RewriteContext::new(target.target.clone(), endpoint, target.params.serialize());
        Self {
            id: Uuid::now_v7(),
            request,
            target,
            context,
            outbound: HeaderMap::new(),
            response: None,
            metadata: FlowMetadata::default(),
        }
    }

    pub fn target_url(&self) -> &Url {
        &self.target.target
    }
}

/// Owned copy of the inbound request.
#[derive(Debug)]
pub struct RequestParts {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Debug)]
pub struct ResponseParts {
    pub status: StatusCode,
    pub headers: HeaderMap,
    /// URL of the final response after redirects.
    pub final_url: Url,
    pub kind: BodyKind,
    pub body: UpstreamBody,
}

/// Upstream payload: a lazy byte stream for passthrough content, fully materialized text
/// for documents the proxy rewrites.
pub enum UpstreamBody {
    Empty,
    Stream(ByteStream),
    Text(String),
}

impl UpstreamBody {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            UpstreamBody::Text(text) => Some(text),
            _ => None,
        }
    }
}

impl fmt::Debug for UpstreamBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpstreamBody::Empty => f.write_str("Empty"),
            UpstreamBody::Stream(_) => f.write_str("Stream(..)"),
            UpstreamBody::Text(text) => f.debug_struct("Text").field("len", &text.len()).finish(),
        }
    }
}

/// Scratchpad for stages to record what they did; telemetry reads it once the flow ends.
#[derive(Debug)]
pub struct FlowMetadata {
    pub started: Instant,

    /// Stealth profile applied to the outbound headers, if any.
    pub profile_name: Option<String>,

    /// Set when the client's Referer pointed back into the proxy and was unwrapped.
    pub referer_unwrapped: bool,

    pub cookies_forwarded: usize,

    pub set_cookies_rewritten: usize,

    pub headers_dropped: Vec<String>,

    /// True once the HTML or CSS rewriter replaced the body.
    pub body_rewritten: bool,

    /// True when rewriting failed and the original text was served instead.
    pub rewrite_failed_open: bool,
}

impl Default for FlowMetadata {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            profile_name: None,
            referer_unwrapped: false,
            cookies_forwarded: 0,
            set_cookies_rewritten: 0,
            headers_dropped: Vec::new(),
            body_rewritten: false,
            rewrite_failed_open: false,
        }
    }
}
