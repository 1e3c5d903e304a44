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

use std::{fs, path::Path, str::FromStr};

use anyhow::{Context, Result};
use http::header::{HeaderMap, HeaderName, HeaderValue};

/// Identity header profile applied to outbound requests in stealth mode.
///
/// Profiles are JSON documents with `remove`, `replace`, `set` and `append` rule lists and
/// a `fingerprint.name` label. They are parsed once at startup and never mutated after.
#[derive(Debug, Clone)]
pub struct HeaderProfile {
    name: String,
    rules: HeaderProfileRules,
}

#[derive(Debug, Clone, Default)]
struct HeaderProfileRules {
    remove: Vec<HeaderName>,
    replace: Vec<HeaderValueRule>,
    set: Vec<HeaderValueRule>,
    append: Vec<HeaderValueRule>,
}

#[derive(Debug, Clone)]
struct HeaderValueRule {
    name: HeaderName,
    value: HeaderValue,
}

impl HeaderProfile {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("failed to read header profile: {}", path.display()))?;
        let fallback = path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("profile")
            .to_string();
        Self::from_json(&raw, &fallback)
            .with_context(|| format!("invalid header profile: {}", path.display()))
    }

    pub fn from_json(raw: &str, fallback_name: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(raw).context("profile is not valid JSON")?;
        let name = value
            .get("fingerprint")
            .and_then(|fp| fp.get("name"))
            .and_then(|name| name.as_str())
            .unwrap_or(fallback_name)
            .to_string();

        let rules = HeaderProfileRules {
            remove: parse_header_list(value.get("remove")),
            replace: parse_pairs(value.get("replace"))?,
            set: parse_pairs(value.get("set"))?,
            append: parse_pairs(value.get("append"))?,
        };

        Ok(Self { name, rules })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Applies remove → replace → set → append, in that order.
    pub fn apply(&self, headers: &mut HeaderMap) {
        for name in &self.rules.remove {
            headers.remove(name);
        }

        for rule in &self.rules.replace {
            if headers.contains_key(&rule.name) {
                headers.insert(rule.name.clone(), rule.value.clone());
            }
        }

        for rule in &self.rules.set {
            if !headers.contains_key(&rule.name) {
                headers.insert(rule.name.clone(), rule.value.clone());
            }
        }

        for rule in &self.rules.append {
            headers.append(rule.name.clone(), rule.value.clone());
        }
    }
}

fn parse_header_list(value: Option<&serde_json::Value>) -> Vec<HeaderName> {
    value
        .and_then(|v| v.as_array())
        .map(|arr| {
            arr.iter()
                .filter_map(|item| item.as_str())
                .filter_map(|name| HeaderName::from_str(name).ok())
                .collect()
        })
        .unwrap_or_default()
}

fn parse_pairs(value: Option<&serde_json::Value>) -> Result<Vec<HeaderValueRule>> {
    let mut rules = Vec::new();
    let Some(raw) = value.and_then(|v| v.as_array()) else {
        return Ok(rules);
    };

    for entry in raw.iter().filter_map(|v| v.as_array()) {
        if entry.len() < 2 {
            continue;
        }
        let Some(name) = entry[0].as_str() else { continue };
        let Ok(name) = HeaderName::from_str(name) else { continue };
        let text = match &entry[1] {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        let value = HeaderValue::from_str(&text)
            .with_context(|| format!("invalid value for header {}", name))?;
        rules.push(HeaderValueRule { name, value });
    }
    Ok(rules)
}
