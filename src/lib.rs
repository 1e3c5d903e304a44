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

//! Content-rewriting forward proxy.
//!
//! Every page, stylesheet and subresource is fetched server-side and re-served from the
//! proxy's own origin. HTML and CSS bodies are rewritten so all outgoing references route
//! back through the single proxy endpoint, carrying the caller's flag set along.

pub mod app;
pub mod assets;
pub mod config;
pub mod proxy;
pub mod rewrite;
pub mod telemetry;
pub mod utils;
