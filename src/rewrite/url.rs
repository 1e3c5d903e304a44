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

use std::borrow::Cow;

use url::Url;

/// Prefixes the URL Rewrite Rule never touches (compared case-insensitively after trimming).
const PASSTHROUGH_PREFIXES: &[&str] = &["data:", "blob:", "#", "javascript:"];

/// Per-request rewriting state: where relative references resolve from, which endpoint
/// rewritten links re-enter, and the flag string every link carries.
#[derive(Debug, Clone)]
pub struct RewriteContext {
    base: Url,
    endpoint: String,
    params: String,
}

impl RewriteContext {
    pub fn new(base: Url, endpoint: impl Into<String>, params: impl Into<String>) -> Self {
        Self {
            base,
            endpoint: endpoint.into(),
            params: params.into(),
        }
    }

    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Moves the base after upstream redirects so relative links resolve against the final page.
    pub fn set_base(&mut self, base: Url) {
        self.base = base;
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Serialized pass-through flags, without a leading `&`.
    pub fn params(&self) -> &str {
        &self.params
    }

    /// Builds the proxy link for an already absolute URL.
    pub fn proxy_link(&self, absolute: &str) -> String {
        let mut link = String::with_capacity(self.endpoint.len() + absolute.len() * 3 / 2 + self.params.len() + 8);
        link.push_str(&self.endpoint);
        link.push_str("?url=");
        link.push_str(&urlencoding::encode(absolute));
        if !self.params.is_empty() {
            link.push('&');
            link.push_str(&self.params);
        }
        link
    }

    /// URL Rewrite Rule. Passthrough schemes, fragments and empty values come back as-is;
    /// anything that fails to resolve against the base also comes back as-is.
    pub fn rewrite<'a>(&self, candidate: &'a str) -> Cow<'a, str> {
        let trimmed = candidate.trim();
        if trimmed.is_empty() || is_passthrough(trimmed) || self.is_proxied(trimmed) {
            return Cow::Borrowed(candidate);
        }

        match self.base.join(trimmed) {
            Ok(absolute) => Cow::Owned(self.proxy_link(absolute.as_str())),
            Err(err) => {
                tracing::trace!(candidate = %trimmed, error = %err, "rewrite: left unresolvable url unchanged");
                Cow::Borrowed(candidate)
            }
        }
    }

    fn is_proxied(&self, trimmed: &str) -> bool {
        trimmed
            .strip_prefix(self.endpoint.as_str())
            .map(|rest| rest.starts_with("?url="))
            .unwrap_or(false)
    }
}

fn is_passthrough(trimmed: &str) -> bool {
    PASSTHROUGH_PREFIXES.iter().any(|prefix| {
        trimmed
            .get(..prefix.len())
            .map(|head| head.eq_ignore_ascii_case(prefix))
            .unwrap_or(false)
    })
}

/// Returns the original target carried by a proxy link, when `link` points at `endpoint`.
pub fn unwrap_proxy_link(endpoint: &str, link: &Url) -> Option<String> {
    if !link.path().starts_with(endpoint) {
        return None;
    }
    link.query_pairs()
        .find(|(key, _)| key == "url")
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}
