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

use std::cell::{Cell, RefCell};

use lol_html::{
    element, errors::RewritingError, html_content::ContentType, html_content::Element, rewrite_str, text,
    RewriteStrSettings,
};

use super::{css, url::RewriteContext};

/// Attributes whose whole value is a single URL.
pub const URL_ATTRIBUTES: &[&str] = &["href", "src", "data-src", "action", "formaction", "poster"];

/// Attributes removed everywhere: integrity hashes cannot match rewritten URLs.
const STRIPPED_ATTRIBUTES: &[&str] = &["integrity", "crossorigin"];

const CSP_META_MARKER: &str = "<!-- CSP meta tag removed by proxy -->";
const SCRIPT_BLOCKED_MARKER: &str = "<!-- Script blocked by proxy -->";

/// Per-document switches for [`rewrite_html`].
#[derive(Debug, Default, Clone, Copy)]
pub struct HtmlRewriteOptions<'a> {
    pub block_scripts: bool,
    pub open_links_in_new_tab: bool,
    /// Rendered `<script>` placed first in `<head>`; ignored when scripts are blocked.
    pub injection: Option<&'a str>,
}

/// Rewrites an HTML document in one streaming pass.
///
/// Element visitors run in declaration order for each start tag: CSP meta removal, script
/// blocking, integrity stripping, injection, URL attribute rewriting, link targets.
pub fn rewrite_html(
    html: &str,
    ctx: &RewriteContext,
    opts: &HtmlRewriteOptions<'_>,
) -> Result<String, RewritingError> {
    let injection = opts.injection.filter(|_| !opts.block_scripts);
    let injected = Cell::new(false);
    let style_text = RefCell::new(String::new());

    let mut handlers = vec![element!("meta[http-equiv]", |el| {
        let equiv = el.get_attribute("http-equiv").unwrap_or_default();
        if equiv.trim().eq_ignore_ascii_case("content-security-policy") {
            el.replace(CSP_META_MARKER, ContentType::Html);
        } else if equiv.trim().eq_ignore_ascii_case("refresh") {
            if let Some(content) = el.get_attribute("content") {
                if let Some(next) = rewrite_meta_refresh(&content, ctx) {
                    el.set_attribute("content", &next)?;
                }
            }
        }
        Ok(())
    })];

    if opts.block_scripts {
        handlers.push(element!("script", |el| {
            el.replace(SCRIPT_BLOCKED_MARKER, ContentType::Html);
            Ok(())
        }));
    }

    handlers.push(element!("*", |el| {
        for name in STRIPPED_ATTRIBUTES {
            el.remove_attribute(name);
        }
        Ok(())
    }));

    if let Some(script) = injection {
        handlers.push(element!("head", |el| {
            if !injected.get() {
                el.prepend(script, ContentType::Html);
                injected.set(true);
            }
            Ok(())
        }));
    }

    handlers.push(element!("*", |el| {
        if el.removed() {
            return Ok(());
        }
        visit_url_attributes(el, ctx)
    }));

    handlers.push(text!("style", |chunk| {
        style_text.borrow_mut().push_str(chunk.as_str());
        if chunk.last_in_text_node() {
            let buffered = std::mem::take(&mut *style_text.borrow_mut());
            chunk.replace(&css::rewrite_css(&buffered, ctx), ContentType::Html);
        } else {
            chunk.remove();
        }
        Ok(())
    }));

    if opts.open_links_in_new_tab {
        handlers.push(element!("a", |el| {
            if !el.has_attribute("target") {
                el.set_attribute("target", "_blank")?;
                el.set_attribute("rel", "noopener noreferrer")?;
            }
            Ok(())
        }));
    }

    let rewritten = rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: handlers,
            ..RewriteStrSettings::default()
        },
    )?;

    match injection {
        Some(script) if !injected.get() => Ok(insert_without_head(rewritten, script)),
        _ => Ok(rewritten),
    }
}

/// Applies the URL Rewrite Rule to every URL-bearing attribute of one element.
fn visit_url_attributes(
    el: &mut Element<'_, '_>,
    ctx: &RewriteContext,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    for name in URL_ATTRIBUTES {
        if let Some(raw) = el.get_attribute(name) {
            let value = decode_attribute(&raw);
            let next = ctx.rewrite(&value);
            if next != raw {
                el.set_attribute(name, &next)?;
            }
        }
    }

    if let Some(raw) = el.get_attribute("srcset") {
        let next = rewrite_srcset(&decode_attribute(&raw), ctx);
        if next != raw {
            el.set_attribute("srcset", &next)?;
        }
    }

    if let Some(raw) = el.get_attribute("style") {
        let decoded = decode_style_attribute(&raw);
        let next = css::rewrite_url_functions(&decoded, ctx);
        if next != decoded {
            el.set_attribute("style", &next.replace('"', "&quot;"))?;
        }
    }

    Ok(())
}

/// Rewrites each `srcset` candidate independently, keeping its width/density descriptor.
pub fn rewrite_srcset(srcset: &str, ctx: &RewriteContext) -> String {
    srcset
        .split(',')
        .filter_map(|candidate| {
            let mut parts = candidate.split_whitespace();
            let url = parts.next()?;
            let descriptor = parts.collect::<Vec<_>>().join(" ");
            let rewritten = ctx.rewrite(url);
            if descriptor.is_empty() {
                Some(rewritten.into_owned())
            } else {
                Some(format!("{} {}", rewritten, descriptor))
            }
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// `content="5; url=/next"` → `content="5; url=<proxy link>"`.
fn rewrite_meta_refresh(content: &str, ctx: &RewriteContext) -> Option<String> {
    let (delay, rest) = content.split_once(';').or_else(|| content.split_once(','))?;
    let rest = rest.trim();
    let target = rest
        .get(..4)
        .filter(|head| head.eq_ignore_ascii_case("url="))
        .map(|_| &rest[4..])
        .unwrap_or(rest)
        .trim()
        .trim_matches(|c| c == '\'' || c == '"');
    if target.is_empty() {
        return None;
    }
    Some(format!("{}; url={}", delay.trim(), ctx.rewrite(&decode_attribute(target))))
}

/// Attribute values arrive with entities intact; only `&amp;` matters for URL resolution.
fn decode_attribute(raw: &str) -> String {
    raw.replace("&amp;", "&")
}

/// Inline styles also carry quoted `url()` arguments as entities.
fn decode_style_attribute(raw: &str) -> String {
    if !raw.contains('&') {
        return raw.to_owned();
    }
    raw.replace("&quot;", "\"")
        .replace("&#34;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

/// No `<head>` in the document: place the script after a doctype, or at the very start.
fn insert_without_head(body: String, script: &str) -> String {
    let lower = body.to_ascii_lowercase();
    let at = lower
        .find("<!doctype")
        .and_then(|idx| lower[idx..].find('>').map(|rel| idx + rel + 1))
        .filter(|_| lower.trim_start().starts_with("<!doctype"))
        .unwrap_or(0);

    let mut out = String::with_capacity(body.len() + script.len());
    out.push_str(&body[..at]);
    out.push_str(script);
    out.push_str(&body[at..]);
    out
}
