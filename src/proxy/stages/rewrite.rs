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

use anyhow::Result;
use async_trait::async_trait;
use http::header::{HeaderValue, CONTENT_TYPE};

use crate::{
    assets::ScriptBundle,
    proxy::{flow::Flow, flow::UpstreamBody, response::BodyKind},
    rewrite::{rewrite_css, rewrite_html, HtmlRewriteOptions, NavigationScript},
};

use super::FlowStage;

/// Rewrites HTML and CSS bodies so every reference re-enters the proxy. A document the
/// HTML rewriter cannot process is served unchanged.
pub struct RewriteStage {
    script: NavigationScript,
}

impl RewriteStage {
    pub fn new(scripts: &ScriptBundle) -> Self {
        Self {
            script: NavigationScript::new(scripts),
        }
    }
}

#[async_trait]
impl FlowStage for RewriteStage {
    async fn on_response_body(&self, flow: &mut Flow) -> Result<()> {
        let Some(response) = flow.response.as_mut() else { return Ok(()) };
        let UpstreamBody::Text(text) = &response.body else { return Ok(()) };
        let flags = flow.target.flags;

        let rewritten = match response.kind {
            BodyKind::Html => {
                let injection = (!flags.block_scripts).then(|| self.script.render(&flow.context));
                let opts = HtmlRewriteOptions {
                    block_scripts: flags.block_scripts,
                    open_links_in_new_tab: flags.open_links_in_new_tab,
                    injection: injection.as_deref(),
                };
                match rewrite_html(text, &flow.context, &opts) {
                    Ok(html) => Some(html),
                    Err(err) => {
                        tracing::warn!(flow_id = %flow.id, error = %err, "html rewrite failed; serving original document");
                        flow.metadata.rewrite_failed_open = true;
                        None
                    }
                }
            }
            BodyKind::Css => Some(rewrite_css(text, &flow.context)),
            BodyKind::Stream => return Ok(()),
        };

        if let Some(body) = rewritten {
            response.body = UpstreamBody::Text(body);
            flow.metadata.body_rewritten = true;
        }
        if let Some(content_type) = response.kind.rewritten_content_type() {
            response
                .headers
                .insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        Ok(())
    }
}
