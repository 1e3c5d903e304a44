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

use std::sync::Arc;

use crate::assets::ScriptBundle;

use super::url::RewriteContext;

/// Renders the navigation interception script for one document.
///
/// The output is a pure function of the template and the request's [`RewriteContext`]; the
/// proxy holds no state about what the script later patches inside the page.
#[derive(Clone)]
pub struct NavigationScript {
    template: Arc<str>,
}

impl NavigationScript {
    pub fn new(bundle: &ScriptBundle) -> Self {
        Self {
            template: Arc::clone(&bundle.navigation_intercept),
        }
    }

    /// Returns a complete `<script>` element ready to be placed first in `<head>`.
    pub fn render(&self, ctx: &RewriteContext) -> String {
        let body = self
            .template
            .replace("{{endpoint_json}}", &js_string(ctx.endpoint()))
            .replace("{{params_json}}", &js_string(ctx.params()))
            .replace("{{base_json}}", &js_string(ctx.base().as_str()));

        let mut element = String::with_capacity(body.len() + 17);
        element.push_str("<script>");
        element.push_str(&body);
        element.push_str("</script>");
        element
    }
}

impl Default for NavigationScript {
    fn default() -> Self {
        Self::new(&ScriptBundle::load())
    }
}

/// JSON-encodes a value as a JS string literal that cannot terminate the host `<script>`.
fn js_string(value: &str) -> String {
    serde_json::Value::String(value.to_owned())
        .to_string()
        .replace('<', "\\u003c")
        .replace('\u{2028}', "\\u2028")
        .replace('\u{2029}', "\\u2029")
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn render(base: &str, params: &str) -> String {
        let ctx = RewriteContext::new(Url::parse(base).unwrap(), "/proxy", params);
        NavigationScript::default().render(&ctx)
    }

    #[test]
    fn embeds_request_constants() {
        let script = render("https://site.test/page", "adBlock=true&stealthMode=true");
        assert!(script.starts_with("<script>"));
        assert!(script.ends_with("</script>"));
        assert!(script.contains(r#"var PROXY_ENDPOINT = "/proxy";"#));
        assert!(script.contains(r#"var PROXY_PARAMS = "adBlock=true&stealthMode=true";"#));
        assert!(script.contains(r#"var ORIGINAL_URL_BASE = "https://site.test/page";"#));
        assert!(!script.contains("{{"));
    }

    #[test]
    fn guards_against_double_execution() {
        let script = render("https://site.test/", "");
        assert!(script.contains("if (window.__relay_injected__) return;"));
        assert!(script.contains("window.__relay_injected__ = true;"));
    }

    #[test]
    fn reports_navigation_to_parent_frame() {
        let script = render("https://site.test/", "");
        assert!(script.contains("type: 'proxy-nav'"));
        for hook in ["history.pushState", "history.replaceState", "'popstate'", "'DOMContentLoaded'"] {
            assert!(script.contains(hook), "missing {hook}");
        }
        for api in ["window.fetch", "XMLHttpRequest.prototype.open", "Location.prototype.assign", "Location.prototype.replace", "window.open", "MutationObserver"] {
            assert!(script.contains(api), "missing {api}");
        }
    }

    #[test]
    fn only_links_carrying_a_target_count_as_proxied() {
        let script = render("https://site.test/list", "");
        let start = script.find("var isProxied").expect("isProxied helper");
        let end = start + script[start..].find("};").expect("isProxied body");
        let helper = &script[start..end];
        // `?page=2` resolves to the endpoint path itself and must still be rewritten.
        assert!(helper.contains("parsed.pathname === PROXY_ENDPOINT"));
        assert!(helper.contains("parsed.searchParams.has('url')"));
    }

    #[test]
    fn hostile_params_cannot_close_the_script() {
        let script = render("https://site.test/a", "x=</script><script>alert(1)</script>");
        assert_eq!(script.matches("</script>").count(), 1);
        assert!(script.contains("\\u003c/script>"));
    }
}
