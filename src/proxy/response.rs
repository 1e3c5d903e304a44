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

use http::{header, HeaderMap};

/// Long-lived caching for static media.
pub const STATIC_CACHE_DIRECTIVE: &str = "public, max-age=604800, s-maxage=604800, immutable";
pub const NO_STORE_DIRECTIVE: &str = "no-store";

const STATIC_MEDIA_PREFIXES: &[&str] = &["image/", "font/", "video/", "audio/"];

/// How the upstream body is handled: rewritten as text or streamed through untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Html,
    Css,
    Stream,
}

impl BodyKind {
    /// Response Classifier. Unknown or missing content types stream.
    pub fn classify(content_type: Option<&str>) -> Self {
        let Some(content_type) = content_type else {
            return BodyKind::Stream;
        };
        let lowered = content_type.to_ascii_lowercase();
        if lowered.contains("text/html") {
            BodyKind::Html
        } else if lowered.contains("text/css") {
            BodyKind::Css
        } else {
            BodyKind::Stream
        }
    }

    pub fn is_rewritten(&self) -> bool {
        !matches!(self, BodyKind::Stream)
    }

    /// Content type advertised after the body was re-encoded as UTF-8.
    pub fn rewritten_content_type(&self) -> Option<&'static str> {
        match self {
            BodyKind::Html => Some("text/html; charset=utf-8"),
            BodyKind::Css => Some("text/css; charset=utf-8"),
            BodyKind::Stream => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BodyKind::Html => "html",
            BodyKind::Css => "css",
            BodyKind::Stream => "stream",
        }
    }
}

pub fn content_type(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::CONTENT_TYPE).and_then(|v| v.to_str().ok())
}

/// Cache-Control sent downstream, derived only from the upstream content type.
pub fn cache_directive(content_type: Option<&str>) -> &'static str {
    let Some(content_type) = content_type else {
        return NO_STORE_DIRECTIVE;
    };
    let lowered = content_type.trim().to_ascii_lowercase();
    if STATIC_MEDIA_PREFIXES.iter().any(|prefix| lowered.starts_with(prefix)) {
        STATIC_CACHE_DIRECTIVE
    } else {
        NO_STORE_DIRECTIVE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_by_content_type() {
        assert_eq!(BodyKind::classify(Some("text/html; charset=Shift_JIS")), BodyKind::Html);
        assert_eq!(BodyKind::classify(Some("TEXT/HTML")), BodyKind::Html);
        assert_eq!(BodyKind::classify(Some("text/css")), BodyKind::Css);
        assert_eq!(BodyKind::classify(Some("image/png")), BodyKind::Stream);
        assert_eq!(BodyKind::classify(Some("application/javascript")), BodyKind::Stream);
        assert_eq!(BodyKind::classify(None), BodyKind::Stream);
    }

    #[test]
    fn media_gets_long_cache() {
        assert_eq!(cache_directive(Some("image/webp")), STATIC_CACHE_DIRECTIVE);
        assert_eq!(cache_directive(Some("font/woff2")), STATIC_CACHE_DIRECTIVE);
        assert_eq!(cache_directive(Some("video/mp4")), STATIC_CACHE_DIRECTIVE);
        assert_eq!(cache_directive(Some("audio/ogg")), STATIC_CACHE_DIRECTIVE);
        assert_eq!(cache_directive(Some("text/html")), NO_STORE_DIRECTIVE);
        assert_eq!(cache_directive(Some("application/json")), NO_STORE_DIRECTIVE);
        assert_eq!(cache_directive(None), NO_STORE_DIRECTIVE);
    }
}
