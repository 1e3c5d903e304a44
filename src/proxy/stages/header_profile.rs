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

use crate::{config::HeaderProfile, proxy::flow::Flow};

use super::FlowStage;

/// Applies the stealth header profile to the outbound request when `stealthMode=true`.
/// The profile replaces the client's identity headers wholesale; base headers such as
/// Accept and Referer are left alone.
pub struct HeaderProfileStage {
    profile: HeaderProfile,
}

impl HeaderProfileStage {
    pub fn new(profile: HeaderProfile) -> Self {
        Self { profile }
    }
}

#[async_trait]
impl FlowStage for HeaderProfileStage {
    async fn on_request(&self, flow: &mut Flow) -> Result<()> {
        if !flow.target.flags.stealth_mode {
            return Ok(());
        }
        self.profile.apply(&mut flow.outbound);
        flow.metadata.profile_name = Some(self.profile.name().to_string());
        tracing::trace!(flow_id = %flow.id, profile = self.profile.name(), "stealth profile applied");
        Ok(())
    }
}
