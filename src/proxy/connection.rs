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

use std::{convert::Infallible, net::SocketAddr, sync::Arc};

use anyhow::{anyhow, Result};
use bytes::Bytes;
use http::{
    header::{self, HeaderValue},
    Method, Request, Response, StatusCode,
};
use http_body_util::BodyExt;
use hyper::{body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use serde_json::json;
use tokio::net::TcpStream;
use uuid::Uuid;

use crate::{
    config::{BlockPolicy, ProxySettings},
    proxy::{
        classify::{self, Classification},
        client::UpstreamClient,
        flow::{Flow, RequestParts, ResponseParts, UpstreamBody},
        pump::{empty_body, full_body, spawn_pump, PumpOutcome, RelayBody},
        response::BodyKind,
        stages::StagePipeline,
    },
    telemetry::TelemetrySink,
    utils::{ProxyError, ProxyResult},
};

const FORWARDED_METHODS: &[Method] = &[Method::GET, Method::HEAD, Method::POST, Method::PUT, Method::DELETE];

/// Everything a request handler needs. Built once at startup and shared read-only by every
/// connection task.
pub struct RelayState {
    pub settings: ProxySettings,
    pub policy: BlockPolicy,
    pub pipeline: StagePipeline,
    pub client: UpstreamClient,
    pub telemetry: TelemetrySink,
}

/// Serves HTTP/1.1 on one accepted client socket until the client hangs up.
pub async fn handle_connection(socket: TcpStream, peer: SocketAddr, state: Arc<RelayState>) -> Result<()> {
    let io = TokioIo::new(socket);
    let service = service_fn(move |req| {
        let state = state.clone();
        async move { Ok::<_, Infallible>(handle_request(req, peer, &state).await) }
    });

    http1::Builder::new()
        .serve_connection(io, service)
        .await
        .map_err(|err| anyhow!("connection from {peer} failed: {err}"))
}

/// Turns one inbound request into a response; failures become plain-text error responses.
pub async fn handle_request(req: Request<Incoming>, peer: SocketAddr, state: &RelayState) -> Response<RelayBody> {
    match dispatch(req, peer, state).await {
        Ok(response) => response,
        Err(err) => {
            if err.status().is_server_error() {
                tracing::warn!(%peer, error = %err, "request failed");
            } else {
                tracing::debug!(%peer, error = %err, "request rejected");
            }
            error_response(&err)
        }
    }
}

/// Request lifecycle for the proxy endpoint.
///
/// 1. Off-endpoint paths get 404; OPTIONS is answered locally as a CORS preflight
/// 2. Methods outside GET/HEAD/POST/PUT/DELETE get 405
/// 3. Classify: bad targets fail with 400/403, blocked targets end with an empty 204
/// 4. Build the `Flow` and run the request stages (outbound headers, profile, cookies)
/// 5. One upstream fetch; a transport failure becomes 502
/// 6. Move the rewrite base to the final URL, run the response header and body stages
/// 7. `respond` writes the head and either the rewritten text or the pumped stream
async fn dispatch(req: Request<Incoming>, peer: SocketAddr, state: &RelayState) -> ProxyResult<Response<RelayBody>> {
    let (parts, body) = req.into_parts();

    if parts.uri.path() != state.settings.endpoint_path {
        return Ok(text_response(StatusCode::NOT_FOUND, "Not Found"));
    }

    if parts.method == Method::OPTIONS {
        let mut response = Response::new(empty_body());
        *response.status_mut() = StatusCode::NO_CONTENT;
        *response.headers_mut() = classify::preflight_headers(&parts.headers);
        return Ok(response);
    }

    if !FORWARDED_METHODS.contains(&parts.method) {
        let mut response = text_response(StatusCode::METHOD_NOT_ALLOWED, "Method Not Allowed");
        response
            .headers_mut()
            .insert(header::ALLOW, HeaderValue::from_static("GET, HEAD, POST, PUT, DELETE, OPTIONS"));
        return Ok(response);
    }

    let classification = classify::classify(
        parts.uri.query(),
        &state.policy,
        state.settings.block_private_networks,
    )?;
    let target = match classification {
        Classification::Proxy(target) => target,
        Classification::Blocked(target, reason) => {
            let id = Uuid::now_v7();
            tracing::debug!(flow_id = %id, %peer, target = %target.target, reason = reason.as_str(), "request blocked");
            state.telemetry.emit(
                "flow_blocked",
                id,
                json!({
                    "target_host": target.target.host_str(),
                    "reason": reason.as_str(),
                }),
            );
            let mut response = Response::new(empty_body());
            *response.status_mut() = StatusCode::NO_CONTENT;
            return Ok(response);
        }
    };

    let body = if parts.method == Method::GET || parts.method == Method::HEAD {
        Bytes::new()
    } else {
        body.collect()
            .await
            .map_err(|err| ProxyError::Other(anyhow!("failed to read request body: {err}")))?
            .to_bytes()
    };

    let request = RequestParts {
        method: parts.method,
        uri: parts.uri,
        headers: parts.headers,
        body,
    };
    let mut flow = Flow::new(request, target, &state.settings.endpoint_path);
    tracing::debug!(flow_id = %flow.id, %peer, method = %flow.request.method, target = %flow.target_url(), "proxying");

    state.pipeline.process_request(&mut flow).await?;

    let pending = state.client.fetch(&flow);
    let upstream = match pending.await {
        Ok(upstream) => upstream,
        Err(err) => {
            tracing::warn!(flow_id = %flow.id, target = %flow.target_url(), error = %err, "upstream fetch failed");
            return Err(err);
        }
    };
    flow.context.set_base(upstream.final_url.clone());
    flow.response = Some(upstream);

    state.pipeline.process_response_headers(&mut flow).await?;
    state.pipeline.process_response_body(&mut flow).await?;

    respond(flow, state)
}

/// Writes the flow's response head and hands the body to the client. Streamed bodies go
/// through the pump; the completion event fires once the last byte is relayed.
fn respond(mut flow: Flow, state: &RelayState) -> ProxyResult<Response<RelayBody>> {
    let ResponseParts {
        status,
        mut headers,
        kind,
        body,
        ..
    } = flow
        .response
        .take()
        .ok_or_else(|| ProxyError::Other(anyhow!("flow {} has no upstream response", flow.id)))?;

    let summary = completion_summary(&flow, status, kind);

    let body = match body {
        UpstreamBody::Empty => {
            emit_completed(&state.telemetry, flow.id, summary, 0, flow.metadata.started);
            empty_body()
        }
        UpstreamBody::Text(text) => {
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(text.len()));
            emit_completed(&state.telemetry, flow.id, summary, text.len() as u64, flow.metadata.started);
            full_body(text)
        }
        UpstreamBody::Stream(stream) => {
            let (body, pump) = spawn_pump(stream, state.settings.stream_buffer_chunks);
            let telemetry = state.telemetry.clone();
            let id = flow.id;
            let started = flow.metadata.started;
            tokio::spawn(async move {
                match pump.await {
                    Ok(report) => {
                        match &report.outcome {
                            PumpOutcome::Completed => {}
                            PumpOutcome::DownstreamClosed => {
                                tracing::debug!(flow_id = %id, bytes = report.bytes, "client closed stream early")
                            }
                            PumpOutcome::UpstreamFailed(err) => {
                                tracing::warn!(flow_id = %id, bytes = report.bytes, error = %err, "upstream stream failed")
                            }
                        }
                        let mut summary = summary;
                        summary["outcome"] = json!(format!("{:?}", report.outcome));
                        emit_completed(&telemetry, id, summary, report.bytes, started);
                    }
                    Err(err) => tracing::warn!(flow_id = %id, error = %err, "stream pump task failed"),
                }
            });
            body
        }
    };

    let mut response = Response::new(body);
    *response.status_mut() = status;
    *response.headers_mut() = headers;
    Ok(response)
}

/// Per-flow fields of the `flow_completed` event; byte count and timing are added on emit.
fn completion_summary(flow: &Flow, status: StatusCode, kind: BodyKind) -> serde_json::Value {
    json!({
        "target_host": flow.target_url().host_str(),
        "status": status.as_u16(),
        "kind": kind.as_str(),
        "flags": flow.target.flags,
        "profile": flow.metadata.profile_name,
        "rewritten": flow.metadata.body_rewritten,
        "rewrite_failed_open": flow.metadata.rewrite_failed_open,
        "referer_unwrapped": flow.metadata.referer_unwrapped,
        "cookies_forwarded": flow.metadata.cookies_forwarded,
        "set_cookies_rewritten": flow.metadata.set_cookies_rewritten,
        "headers_dropped": flow.metadata.headers_dropped,
    })
}

fn emit_completed(
    telemetry: &TelemetrySink,
    id: Uuid,
    mut summary: serde_json::Value,
    bytes: u64,
    started: std::time::Instant,
) {
    summary["bytes"] = json!(bytes);
    summary["elapsed_ms"] = json!(started.elapsed().as_millis() as u64);
    telemetry.emit("flow_completed", id, summary);
}

fn text_response(status: StatusCode, message: &'static str) -> Response<RelayBody> {
    let mut response = Response::new(full_body(message));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

pub fn error_response(err: &ProxyError) -> Response<RelayBody> {
    text_response(err.status(), err.public_message())
}
