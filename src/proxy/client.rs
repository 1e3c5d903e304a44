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

use std::{error::Error as StdError, future::Future, io};

use anyhow::{Context, Result};
use futures_util::TryStreamExt;
use reqwest::redirect::{Attempt, Policy};
use thiserror::Error;

use crate::{
    config::ProxySettings,
    proxy::{
        classify,
        flow::{Flow, ResponseParts, UpstreamBody},
        response::{self, BodyKind},
    },
    utils::{ProxyError, ProxyResult},
};

/// Raised from the redirect policy when a hop leaves the public internet.
#[derive(Debug, Error)]
#[error("redirect to private network target refused: {0}")]
struct PrivateRedirect(String);

/// Upstream HTTP client. One request per flow, redirects followed up to the configured
/// limit, compressed bodies decoded transparently. Never retries.
#[derive(Clone)]
pub struct UpstreamClient {
    http: reqwest::Client,
}

impl UpstreamClient {
    pub fn new(cfg: &ProxySettings) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .use_rustls_tls()
            .redirect(redirect_policy(cfg.max_redirects, cfg.block_private_networks))
            .gzip(true)
            .brotli(true)
            .deflate(true);
        if let Some(timeout) = cfg.connect_timeout() {
            builder = builder.connect_timeout(timeout);
        }
        let http = builder.build().context("failed to build upstream HTTP client")?;
        Ok(Self { http })
    }

    /// Sends the flow's outbound request and reads the response head. Rewritable bodies
    /// are materialized as text (charset-decoded); everything else stays a lazy stream.
    ///
    /// The request is assembled before the returned future starts, so the future owns
    /// everything it touches and never borrows the flow.
    pub fn fetch(&self, flow: &Flow) -> impl Future<Output = ProxyResult<ResponseParts>> + Send + 'static {
        let id = flow.id;
        let method = flow.request.method.clone();
        let target = flow.target_url().clone();
        let mut request = self
            .http
            .request(method.clone(), target.clone())
            .headers(flow.outbound.clone());
        if !flow.request.body.is_empty() {
            request = request.body(flow.request.body.clone());
        }

        async move {
            tracing::debug!(flow_id = %id, %method, target = %target, "dispatching upstream request");
            let upstream = request.send().await.map_err(upstream_error)?;

            let status = upstream.status();
            let headers = upstream.headers().clone();
            let final_url = upstream.url().clone();
            let kind = BodyKind::classify(response::content_type(&headers));

            let body = if method == http::Method::HEAD {
                UpstreamBody::Empty
            } else if kind.is_rewritten() {
                UpstreamBody::Text(upstream.text().await?)
            } else {
                UpstreamBody::Stream(Box::pin(upstream.bytes_stream().map_err(io::Error::other)))
            };

            tracing::debug!(
                flow_id = %id,
                status = status.as_u16(),
                kind = kind.as_str(),
                redirected = final_url != target,
                "upstream responded"
            );

            Ok(ResponseParts {
                status,
                headers,
                final_url,
                kind,
                body,
            })
        }
    }
}

/// Follows at most `max` redirects; with `block_private` set, a hop that lands on a
/// private target aborts the request instead of being followed.
fn redirect_policy(max: usize, block_private: bool) -> Policy {
    Policy::custom(move |attempt: Attempt| {
        if attempt.previous().len() > max {
            attempt.error("too many redirects")
        } else if block_private && classify::is_private_target(attempt.url()) {
            let target = attempt.url().to_string();
            attempt.error(PrivateRedirect(target))
        } else {
            attempt.follow()
        }
    })
}

/// Surfaces a refused private redirect as the same 403 a private first hop gets.
fn upstream_error(err: reqwest::Error) -> ProxyError {
    let mut source = err.source();
    while let Some(cause) = source {
        if let Some(refused) = cause.downcast_ref::<PrivateRedirect>() {
            return ProxyError::PrivateNetwork(refused.0.clone());
        }
        source = cause.source();
    }
    ProxyError::Upstream(err)
}
