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

use super::url::RewriteContext;

/// Rewrites every `url(...)` reference and every quoted `@import` target in a stylesheet.
pub fn rewrite_css(css: &str, ctx: &RewriteContext) -> String {
    let with_urls = rewrite_url_functions(css, ctx);
    rewrite_imports(&with_urls, ctx)
}

/// Rewrites only `url(...)` references; used for inline `style` attributes too.
pub fn rewrite_url_functions(css: &str, ctx: &RewriteContext) -> String {
    let lower = css.to_ascii_lowercase();
    let bytes = css.as_bytes();
    let mut out = String::with_capacity(css.len() + css.len() / 4);
    let mut cursor = 0;

    while let Some(rel) = lower[cursor..].find("url(") {
        let start = cursor + rel;
        let open_end = start + 4;

        if start > 0 && is_ident_byte(bytes[start - 1]) {
            out.push_str(&css[cursor..open_end]);
            cursor = open_end;
            continue;
        }

        let Some(token) = parse_url_token(css, open_end) else {
            out.push_str(&css[cursor..open_end]);
            cursor = open_end;
            continue;
        };

        out.push_str(&css[cursor..start]);
        out.push_str("url(");
        if let Some(quote) = token.quote {
            out.push(quote);
            out.push_str(&ctx.rewrite(token.value));
            out.push(quote);
        } else {
            out.push_str(&ctx.rewrite(token.value));
        }
        out.push(')');
        cursor = token.end;
    }

    out.push_str(&css[cursor..]);
    out
}

fn rewrite_imports(css: &str, ctx: &RewriteContext) -> String {
    let lower = css.to_ascii_lowercase();
    let mut out = String::with_capacity(css.len());
    let mut cursor = 0;

    while let Some(rel) = lower[cursor..].find("@import") {
        let start = cursor + rel;
        let keyword_end = start + "@import".len();
        let after = &css[keyword_end..];
        let value_start = keyword_end + (after.len() - after.trim_start().len());

        let quote = css[value_start..].chars().next().filter(|c| *c == '"' || *c == '\'');
        let Some(quote) = quote else {
            out.push_str(&css[cursor..keyword_end]);
            cursor = keyword_end;
            continue;
        };

        let inner_start = value_start + 1;
        let Some(close_rel) = css[inner_start..].find(quote) else {
            break;
        };
        let inner_end = inner_start + close_rel;

        out.push_str(&css[cursor..inner_start]);
        out.push_str(&ctx.rewrite(&css[inner_start..inner_end]));
        out.push(quote);
        cursor = inner_end + 1;
    }

    out.push_str(&css[cursor..]);
    out
}

struct UrlToken<'a> {
    quote: Option<char>,
    value: &'a str,
    /// Byte offset just past the closing parenthesis.
    end: usize,
}

fn parse_url_token(css: &str, open_end: usize) -> Option<UrlToken<'_>> {
    let rest = &css[open_end..];
    let leading_ws = rest.len() - rest.trim_start().len();
    let body_start = open_end + leading_ws;

    match css[body_start..].chars().next()? {
        quote @ ('"' | '\'') => {
            let inner_start = body_start + 1;
            let close_rel = css[inner_start..].find(quote)?;
            let inner_end = inner_start + close_rel;
            let after_quote = &css[inner_end + 1..];
            let paren_rel = after_quote.find(')')?;
            if !after_quote[..paren_rel].trim().is_empty() {
                return None;
            }
            Some(UrlToken {
                quote: Some(quote),
                value: &css[inner_start..inner_end],
                end: inner_end + 1 + paren_rel + 1,
            })
        }
        _ => {
            let close_rel = css[body_start..].find(')')?;
            Some(UrlToken {
                quote: None,
                value: css[body_start..body_start + close_rel].trim_end(),
                end: body_start + close_rel + 1,
            })
        }
    }
}

fn is_ident_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'-' || b == b'_'
}
