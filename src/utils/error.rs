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

use http::StatusCode;
use thiserror::Error;

pub type ProxyResult<T> = Result<T, ProxyError>;

/// Terminal failures for a single proxied request. Every variant maps to one plain-text
/// status response; nothing here is retried.
#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("missing url parameter")]
    MissingTargetUrl,

    #[error("invalid target url: {0}")]
    InvalidTargetUrl(String),

    #[error("private network target refused: {0}")]
    PrivateNetwork(String),

    #[error("upstream fetch failed: {0}")]
    Upstream(#[from] reqwest::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ProxyError {
    pub fn status(&self) -> StatusCode {
        match self {
            ProxyError::MissingTargetUrl | ProxyError::InvalidTargetUrl(_) => StatusCode::BAD_REQUEST,
            ProxyError::PrivateNetwork(_) => StatusCode::FORBIDDEN,
            ProxyError::Upstream(_) => StatusCode::BAD_GATEWAY,
            ProxyError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Body sent to the client. Internal detail stays in the logs.
    pub fn public_message(&self) -> &'static str {
        match self {
            ProxyError::MissingTargetUrl => "URL parameter is required",
            ProxyError::InvalidTargetUrl(_) => "Invalid URL provided",
            ProxyError::PrivateNetwork(_) => "Access to private networks is blocked",
            ProxyError::Upstream(_) => "Error fetching the requested URL.",
            ProxyError::Other(_) => "Internal proxy error",
        }
    }
}
