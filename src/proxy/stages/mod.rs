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

//! Flow stages run in a fixed order for every proxied request. Request stages build the
//! upstream header set from scratch; response stages sanitize headers, then rewrite the
//! body. Each stage reads only the Flow it is handed, so concurrent flows never share
//! mutable state.

mod cookie;
mod header_profile;
mod outbound;
mod rewrite;
mod sanitize;

pub use cookie::CookieStage;
pub use header_profile::HeaderProfileStage;
pub use outbound::OutboundHeadersStage;
pub use rewrite::RewriteStage;
pub use sanitize::ResponseHeadersStage;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::{assets::ScriptBundle, config::HeaderProfile, config::RelayConfig, proxy::flow::Flow};

#[derive(Clone)]
/// Ordered pipeline of stages run for every flow.
pub struct StagePipeline {
    inner: Arc<PipelineInner>,
}

struct PipelineInner {
    stages: Vec<Arc<dyn FlowStage>>,
}

impl StagePipeline {
    /// Request stages: base headers, then stealth overrides, then cookies. Response stages:
    /// Set-Cookie scoping and header filtering before the body rewriter.
    pub fn build(cfg: &RelayConfig, profile: HeaderProfile, scripts: &ScriptBundle) -> Result<Self> {
        let stages: Vec<Arc<dyn FlowStage>> = vec![
            Arc::new(OutboundHeadersStage::new(
                cfg.proxy.endpoint_path.clone(),
                cfg.proxy.fallback_user_agent.clone(),
            )?),
            Arc::new(HeaderProfileStage::new(profile)),
            Arc::new(CookieStage),
            Arc::new(ResponseHeadersStage),
            Arc::new(RewriteStage::new(scripts)),
        ];
        Ok(Self::from_stages(stages))
    }

    pub fn from_stages(stages: Vec<Arc<dyn FlowStage>>) -> Self {
        Self {
            inner: Arc::new(PipelineInner { stages }),
        }
    }

    pub async fn process_request(&self, flow: &mut Flow) -> Result<()> {
        for stage in &self.inner.stages {
            stage.on_request(flow).await?;
        }
        Ok(())
    }

    pub async fn process_response_headers(&self, flow: &mut Flow) -> Result<()> {
        for stage in &self.inner.stages {
            stage.on_response_headers(flow).await?;
        }
        Ok(())
    }

    pub async fn process_response_body(&self, flow: &mut Flow) -> Result<()> {
        for stage in &self.inner.stages {
            stage.on_response_body(flow).await?;
        }
        Ok(())
    }
}

#[async_trait]
pub trait FlowStage: Send + Sync {
    async fn on_request(&self, _flow: &mut Flow) -> Result<()> {
        Ok(())
    }

    async fn on_response_headers(&self, _flow: &mut Flow) -> Result<()> {
        Ok(())
    }

    async fn on_response_body(&self, _flow: &mut Flow) -> Result<()> {
        Ok(())
    }
}
