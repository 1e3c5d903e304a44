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

/// Built-in stealth identity profile (desktop Chrome on Windows).
pub const BUILTIN_STEALTH_PROFILE: &str = include_str!("../assets/profiles/chrome-windows.json");

/// Name the built-in profile falls back to when its JSON carries no fingerprint name.
pub const BUILTIN_STEALTH_PROFILE_NAME: &str = "chrome-windows";

/// Client-side script templates compiled into the binary.
#[derive(Clone)]
pub struct ScriptBundle {
    /// Navigation interception template; `{{endpoint_json}}`, `{{params_json}}` and
    /// `{{base_json}}` are substituted per response.
    pub navigation_intercept: Arc<str>,
}

impl ScriptBundle {
    pub fn load() -> Self {
        Self {
            navigation_intercept: Arc::from(include_str!("../assets/js/navigation_intercept.js")),
        }
    }
}

impl Default for ScriptBundle {
    fn default() -> Self {
        Self::load()
    }
}
