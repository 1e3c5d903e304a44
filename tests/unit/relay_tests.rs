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

use std::{convert::Infallible, net::SocketAddr};

use bytes::Bytes;
use http::{header, Method, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::{body::Incoming, server::conn::http1, service::service_fn};
use hyper_util::rt::TokioIo;
use relay_proxy::{app::RelayApp, config::RelayConfig};
use tokio::net::TcpListener;

const PAGE: &str = r#"<!DOCTYPE html>
<html><head><title>Upstream</title>
<meta http-equiv="Content-Security-Policy" content="default-src 'self'">
<link rel="stylesheet" href="/style.css">
<style>.hero{background:url(img/hero.png)}</style>
</head>
<body>
<a href="next.html">next</a>
<img src="/image.png" srcset="/small.png 1x, /large.png 2x">
<script src="app.js" integrity="sha384-abc"></script>
</body></html>"#;

fn image_bytes() -> Vec<u8> {
    (0..256 * 1024).map(|i| (i % 251) as u8).collect()
}

async fn upstream(req: Request<Incoming>) -> Result<Response<Full<Bytes>>, Infallible> {
    let path = req.uri().path().to_string();
    let builder = Response::builder();
    let response = match path.as_str() {
        "/page" | "/landing/" => builder
            .header(header::CONTENT_TYPE, "text/html; charset=utf-8")
            .header(header::CONTENT_SECURITY_POLICY, "default-src 'self'")
            .header(header::X_FRAME_OPTIONS, "DENY")
            .header(header::SET_COOKIE, "sid=42; Domain=127.0.0.1; Path=/; HttpOnly")
            .body(Full::new(Bytes::from_static(PAGE.as_bytes()))),
        "/style.css" => builder
            .header(header::CONTENT_TYPE, "text/css")
            .body(Full::new(Bytes::from_static(b"@import 'base.css'; body{background:url(\"bg.png\")}"))),
        "/image.png" => builder
            .header(header::CONTENT_TYPE, "image/png")
            .header(header::CACHE_CONTROL, "no-cache")
            .body(Full::new(Bytes::from(image_bytes()))),
        "/redirect" => builder
            .status(StatusCode::FOUND)
            .header(header::LOCATION, "/landing/")
            .body(Full::new(Bytes::new())),
        "/echo" => {
            let method = req.method().to_string();
            let headers = req.headers().clone();
            let body = req.into_body().collect().await.map(|b| b.to_bytes()).unwrap_or_default();
            let text = |name: header::HeaderName| {
                headers
                    .get(name)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or("")
                    .to_string()
            };
            let report = serde_json::json!({
                "method": method,
                "user_agent": text(header::USER_AGENT),
                "referer": text(header::REFERER),
                "cookie": text(header::COOKIE),
                "content_type": text(header::CONTENT_TYPE),
                "host": text(header::HOST),
                "body": String::from_utf8_lossy(&body),
            });
            builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Full::new(Bytes::from(report.to_string())))
        }
        _ => builder
            .status(StatusCode::NOT_FOUND)
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Full::new(Bytes::from_static(b"missing"))),
    };
    Ok(response.expect("valid upstream response"))
}

async fn spawn_upstream() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind upstream");
    let addr = listener.local_addr().expect("upstream addr");
    tokio::spawn(async move {
        loop {
            let Ok((socket, _)) = listener.accept().await else { break };
            tokio::spawn(async move {
                let _ = http1::Builder::new()
                    .serve_connection(TokioIo::new(socket), service_fn(upstream))
                    .await;
            });
        }
    });
    addr
}

async fn spawn_relay(config: RelayConfig) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind relay");
    let addr = listener.local_addr().expect("relay addr");
    let app = RelayApp::new(config).expect("relay app");
    tokio::spawn(app.serve(listener));
    addr
}

struct Harness {
    relay: SocketAddr,
    upstream: SocketAddr,
    http: reqwest::Client,
}

impl Harness {
    async fn start() -> Self {
        Self::with_config(RelayConfig::default()).await
    }

    async fn with_config(config: RelayConfig) -> Self {
        let upstream = spawn_upstream().await;
        let relay = spawn_relay(config).await;
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .expect("client");
        Self { relay, upstream, http }
    }

    fn upstream_url(&self, path: &str) -> String {
        format!("http://{}{}", self.upstream, path)
    }

    fn proxy_url(&self, target: &str, flags: &str) -> String {
        let mut url = format!("http://{}/proxy?url={}", self.relay, urlencoding::encode(target));
        if !flags.is_empty() {
            url.push('&');
            url.push_str(flags);
        }
        url
    }

    async fn get(&self, target: &str, flags: &str) -> reqwest::Response {
        self.http
            .get(self.proxy_url(target, flags))
            .send()
            .await
            .expect("relay reachable")
    }
}

#[tokio::test]
async fn html_is_rewritten_and_sanitized() {
    let h = Harness::start().await;
    let response = h.get(&h.upstream_url("/page"), "adBlock=true").await;

    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers().clone();
    assert_eq!(headers[header::CONTENT_TYPE], "text/html; charset=utf-8");
    assert_eq!(headers[header::CACHE_CONTROL], "no-store");
    assert!(headers.get(header::CONTENT_SECURITY_POLICY).is_none());
    assert!(headers.get(header::X_FRAME_OPTIONS).is_none());
    assert_eq!(headers[header::SET_COOKIE], "sid=42; Path=/; HttpOnly");

    let body = response.text().await.expect("body");
    let encoded = |path: &str| urlencoding::encode(&h.upstream_url(path)).into_owned();
    assert!(body.contains(&format!("/proxy?url={}", encoded("/style.css"))), "{body}");
    assert!(body.contains(&format!("/proxy?url={}", encoded("/next.html"))), "{body}");
    assert!(body.contains(&format!("/proxy?url={}", encoded("/image.png"))), "{body}");
    assert!(body.contains(&format!("/proxy?url={}", encoded("/large.png"))), "{body}");
    assert!(body.contains(&format!("/proxy?url={}", encoded("/img/hero.png"))), "{body}");
    assert!(body.contains("<!-- CSP meta tag removed by proxy -->"));
    assert!(!body.contains("integrity="));
    assert!(body.contains("__relay_injected__"));
    assert!(body.contains("adBlock=true"));
}

#[tokio::test]
async fn stylesheet_references_are_rewritten() {
    let h = Harness::start().await;
    let response = h.get(&h.upstream_url("/style.css"), "").await;

    assert_eq!(response.headers()[header::CONTENT_TYPE], "text/css; charset=utf-8");
    let body = response.text().await.expect("body");
    let bg = urlencoding::encode(&h.upstream_url("/bg.png")).into_owned();
    let base = urlencoding::encode(&h.upstream_url("/base.css")).into_owned();
    assert!(body.contains(&format!("url(\"/proxy?url={bg}\")")), "{body}");
    assert!(body.contains(&format!("@import '/proxy?url={base}'")), "{body}");
}

#[tokio::test]
async fn binary_bodies_stream_unchanged_with_long_cache() {
    let h = Harness::start().await;
    let response = h.get(&h.upstream_url("/image.png"), "blockImages=false").await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()[header::CONTENT_TYPE], "image/png");
    assert_eq!(
        response.headers()[header::CACHE_CONTROL],
        "public, max-age=604800, s-maxage=604800, immutable"
    );
    let bytes = response.bytes().await.expect("body");
    assert_eq!(bytes.as_ref(), image_bytes().as_slice());
}

#[tokio::test]
async fn blocked_targets_get_empty_no_content() {
    let h = Harness::start().await;

    let ad = h.get("https://ads.doubleclick.net/pixel", "adBlock=true").await;
    assert_eq!(ad.status(), StatusCode::NO_CONTENT);
    assert!(ad.bytes().await.expect("body").is_empty());

    let image = h.get(&h.upstream_url("/photo.JPG"), "blockImages=true").await;
    assert_eq!(image.status(), StatusCode::NO_CONTENT);

    let allowed = h.get(&h.upstream_url("/image.png"), "adBlock=true").await;
    assert_eq!(allowed.status(), StatusCode::OK);
}

#[tokio::test]
async fn malformed_requests_are_rejected() {
    let h = Harness::start().await;

    let missing = h
        .http
        .get(format!("http://{}/proxy", h.relay))
        .send()
        .await
        .expect("relay reachable");
    assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    assert_eq!(missing.text().await.expect("body"), "URL parameter is required");

    let invalid = h
        .http
        .get(format!("http://{}/proxy?url=not-a-url", h.relay))
        .send()
        .await
        .expect("relay reachable");
    assert_eq!(invalid.status(), StatusCode::BAD_REQUEST);
    assert_eq!(invalid.text().await.expect("body"), "Invalid URL provided");

    let elsewhere = h
        .http
        .get(format!("http://{}/other", h.relay))
        .send()
        .await
        .expect("relay reachable");
    assert_eq!(elsewhere.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn unreachable_upstream_maps_to_bad_gateway() {
    let h = Harness::start().await;
    let closed = {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        listener.local_addr().expect("addr")
    };

    let response = h.get(&format!("http://{closed}/"), "").await;
    assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    assert_eq!(response.text().await.expect("body"), "Error fetching the requested URL.");
}

#[tokio::test]
async fn upstream_status_and_redirects() {
    let h = Harness::start().await;

    let missing = h.get(&h.upstream_url("/nope"), "").await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
    assert_eq!(missing.text().await.expect("body"), "missing");

    let landed = h.get(&h.upstream_url("/redirect"), "").await;
    assert_eq!(landed.status(), StatusCode::OK);
    let body = landed.text().await.expect("body");
    let next = urlencoding::encode(&h.upstream_url("/landing/next.html")).into_owned();
    assert!(body.contains(&format!("/proxy?url={next}")), "relative links follow the final URL: {body}");
}

#[tokio::test]
async fn preflight_answers_without_upstream() {
    let h = Harness::start().await;
    let response = h
        .http
        .request(Method::OPTIONS, format!("http://{}/proxy?url=https%3A%2F%2Fsite.test%2F", h.relay))
        .header(header::ORIGIN, "https://shell.test")
        .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "x-token")
        .send()
        .await
        .expect("relay reachable");

    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    let headers = response.headers();
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_ORIGIN], "https://shell.test");
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_HEADERS], "x-token");
    assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    assert_eq!(headers[header::ACCESS_CONTROL_MAX_AGE], "86400");
}

#[tokio::test]
async fn outbound_request_carries_method_body_and_unwrapped_referer() {
    let h = Harness::start().await;
    let referer = h.proxy_url(&h.upstream_url("/page"), "adBlock=true");

    let response = h
        .http
        .post(h.proxy_url(&h.upstream_url("/echo"), ""))
        .header(header::REFERER, referer)
        .header(header::COOKIE, "a=1; b=2")
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
        .body("q=relay")
        .send()
        .await
        .expect("relay reachable");

    assert_eq!(response.status(), StatusCode::OK);
    let echo: serde_json::Value = serde_json::from_str(&response.text().await.expect("body")).expect("json");
    assert_eq!(echo["method"], "POST");
    assert_eq!(echo["body"], "q=relay");
    assert_eq!(echo["content_type"], "application/x-www-form-urlencoded");
    assert_eq!(echo["referer"], h.upstream_url("/page"));
    assert_eq!(echo["cookie"], "a=1; b=2");
    assert_eq!(echo["user_agent"], "Relay-Proxy/1.0");
    assert_eq!(echo["host"], h.upstream.to_string());
}

#[tokio::test]
async fn stealth_mode_sends_browser_identity() {
    let h = Harness::start().await;
    let response = h
        .http
        .get(h.proxy_url(&h.upstream_url("/echo"), "stealthMode=true"))
        .header(header::USER_AGENT, "curl/8.0")
        .send()
        .await
        .expect("relay reachable");

    let echo: serde_json::Value = serde_json::from_str(&response.text().await.expect("body")).expect("json");
    let ua = echo["user_agent"].as_str().expect("ua");
    assert!(ua.contains("Chrome/126.0.0.0"), "{ua}");
}

#[tokio::test]
async fn private_network_guard_refuses_loopback() {
    let mut config = RelayConfig::default();
    config.proxy.block_private_networks = true;
    let h = Harness::with_config(config).await;

    let response = h.get(&h.upstream_url("/page"), "").await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn concurrent_requests_do_not_share_flags() {
    let h = Harness::start().await;
    let page = h.upstream_url("/page");

    let (a, b) = tokio::join!(
        h.get(&page, "blockScripts=true"),
        h.get(&page, "openLinksInNewTab=true"),
    );
    let (a, b) = (a.text().await.expect("a"), b.text().await.expect("b"));

    assert!(a.contains("<!-- Script blocked by proxy -->"));
    assert!(!a.contains("__relay_injected__"));
    assert!(!a.contains("target=\"_blank\""));
    assert!(b.contains("__relay_injected__"));
    assert!(b.contains("target=\"_blank\""));
    assert!(!b.contains("blockScripts"));
}
