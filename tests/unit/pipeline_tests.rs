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

use std::fs;

use bytes::Bytes;
use http::header::{
    ACCEPT_LANGUAGE, CACHE_CONTROL, CONTENT_LENGTH, CONTENT_SECURITY_POLICY, CONTENT_TYPE, COOKIE, REFERER,
    SET_COOKIE, USER_AGENT,
};
use http::{HeaderMap, HeaderValue, Method, StatusCode};
use relay_proxy::assets::ScriptBundle;
use relay_proxy::config::{HeaderProfile, RelayConfig};
use relay_proxy::proxy::classify::ProxyRequest;
use relay_proxy::proxy::flow::{Flow, RequestParts, ResponseParts, UpstreamBody};
use relay_proxy::proxy::response::BodyKind;
use relay_proxy::proxy::stages::StagePipeline;
use serde_json::json;
use tempfile::tempdir;

fn build_flow(query: &str, headers: HeaderMap) -> Flow {
    let target = ProxyRequest::from_query(Some(query)).expect("valid query");
    Flow::new(
        RequestParts {
            method: Method::GET,
            uri: format!("/proxy?{query}").parse().expect("uri"),
            headers,
            body: Bytes::new(),
        },
        target,
        "/proxy",
    )
}

fn client_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(USER_AGENT, HeaderValue::from_static("automation"));
    headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US"));
    headers.insert(COOKIE, HeaderValue::from_static("session=abc; theme=dark"));
    headers
}

fn default_pipeline() -> StagePipeline {
    let profile = HeaderProfile::from_json(relay_proxy::assets::BUILTIN_STEALTH_PROFILE, "builtin").expect("profile");
    StagePipeline::build(&RelayConfig::default(), profile, &ScriptBundle::default()).expect("pipeline")
}

fn attach_html(flow: &mut Flow, html: &str, extra: &[(&'static str, &'static str)]) {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("text/html; charset=utf-8"));
    for (name, value) in extra {
        headers.append(*name, HeaderValue::from_static(value));
    }
    flow.response = Some(ResponseParts {
        status: StatusCode::OK,
        headers,
        final_url: flow.target_url().clone(),
        kind: BodyKind::Html,
        body: UpstreamBody::Text(html.to_string()),
    });
}

#[tokio::test]
async fn stealth_profile_from_file_rewrites_outbound_headers() {
    let dir = tempdir().expect("tempdir");
    let profile = json!({
        "fingerprint": {"name": "Firefox Windows"},
        "remove": ["Sec-CH-UA"],
        "replace": [["User-Agent", "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:127.0)"]],
        "set": [["Sec-Fetch-Site", "same-origin"]],
        "append": [["Accept-Language", "en-US,en;q=0.9"]]
    });
    let profile_path = dir.path().join("firefox-windows.json");
    fs::write(&profile_path, serde_json::to_string_pretty(&profile).expect("json")).expect("write profile");

    let profile = HeaderProfile::load_from_file(&profile_path).expect("profile loads");
    let pipeline = StagePipeline::build(&RelayConfig::default(), profile, &ScriptBundle::default()).expect("pipeline");
    let mut flow = build_flow("url=https%3A%2F%2Fsite.test%2Fhome&stealthMode=true", client_headers());

    pipeline.process_request(&mut flow).await.expect("request stages");

    assert_eq!(flow.metadata.profile_name.as_deref(), Some("Firefox Windows"));
    assert_eq!(
        flow.outbound.get(USER_AGENT).and_then(|v| v.to_str().ok()),
        Some("Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:127.0)")
    );
    assert_eq!(flow.outbound["sec-fetch-site"], "same-origin");
    let languages: Vec<_> = flow
        .outbound
        .get_all(ACCEPT_LANGUAGE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .collect();
    assert_eq!(languages, vec!["en-US", "en-US,en;q=0.9"]);
    assert_eq!(flow.outbound[COOKIE], "session=abc; theme=dark");
    assert_eq!(flow.outbound[REFERER], "https://site.test");
}

#[tokio::test]
async fn html_response_runs_every_response_stage() {
    let pipeline = default_pipeline();
    let mut flow = build_flow("url=https%3A%2F%2Fsite.test%2Fblog%2F&adBlock=true", client_headers());
    pipeline.process_request(&mut flow).await.expect("request stages");
    assert_eq!(flow.outbound[USER_AGENT], "automation");

    attach_html(
        &mut flow,
        r#"<!DOCTYPE html><html><head><meta http-equiv="Content-Security-Policy" content="default-src 'self'"><link rel="stylesheet" href="/s.css" integrity="sha256-x"></head><body><img src="a.png"></body></html>"#,
        &[
            ("content-security-policy", "default-src 'self'"),
            ("content-length", "999"),
            ("set-cookie", "sid=1; Domain=.site.test; Path=/"),
            ("x-upstream", "kept"),
        ],
    );

    pipeline.process_response_headers(&mut flow).await.expect("header stages");
    pipeline.process_response_body(&mut flow).await.expect("body stages");

    let response = flow.response.as_ref().expect("response");
    assert!(response.headers.get(CONTENT_SECURITY_POLICY).is_none());
    assert!(response.headers.get(CONTENT_LENGTH).is_none());
    assert_eq!(response.headers[CACHE_CONTROL], "no-store");
    assert_eq!(response.headers[SET_COOKIE], "sid=1; Path=/");
    assert_eq!(response.headers["x-upstream"], "kept");

    let html = response.body.as_text().expect("text body");
    assert!(html.contains("<!-- CSP meta tag removed by proxy -->"), "{html}");
    assert!(!html.contains("integrity"), "{html}");
    assert!(html.contains("/proxy?url=https%3A%2F%2Fsite.test%2Fs.css"), "{html}");
    assert!(html.contains("/proxy?url=https%3A%2F%2Fsite.test%2Fblog%2Fa.png"), "{html}");
    assert!(html.contains("__relay_injected__"), "{html}");
    assert!(flow.metadata.body_rewritten);
}

#[tokio::test]
async fn concurrent_flows_keep_their_own_flags() {
    let pipeline = default_pipeline();

    let run = |query: &'static str| {
        let pipeline = pipeline.clone();
        async move {
            let mut flow = build_flow(query, HeaderMap::new());
            pipeline.process_request(&mut flow).await.expect("request stages");
            attach_html(&mut flow, "<html><head></head><body><a href=\"/next\">n</a></body></html>", &[]);
            pipeline.process_response_headers(&mut flow).await.expect("header stages");
            pipeline.process_response_body(&mut flow).await.expect("body stages");
            flow
        }
    };

    let (a, b) = tokio::join!(
        tokio::spawn(run("url=https%3A%2F%2Fone.test%2F&stealthMode=true&adBlock=true")),
        tokio::spawn(run("url=https%3A%2F%2Ftwo.test%2F&openLinksInNewTab=true")),
    );
    let (a, b) = (a.expect("task a"), b.expect("task b"));

    let html_a = a.response.as_ref().and_then(|r| r.body.as_text()).expect("a body");
    let html_b = b.response.as_ref().and_then(|r| r.body.as_text()).expect("b body");

    assert!(html_a.contains("url=https%3A%2F%2Fone.test%2Fnext"), "{html_a}");
    assert!(html_a.contains("stealthMode=true") && html_a.contains("adBlock=true"));
    assert!(!html_a.contains("two.test"));
    assert!(!html_a.contains("target=\"_blank\""));
    assert!(html_b.contains("url=https%3A%2F%2Ftwo.test%2Fnext"), "{html_b}");
    assert!(html_b.contains("openLinksInNewTab=true"));
    assert!(html_b.contains("target=\"_blank\""));
    assert!(!html_b.contains("stealthMode"));

    assert!(a.metadata.profile_name.is_some());
    assert!(b.metadata.profile_name.is_none());
}
