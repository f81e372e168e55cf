// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{
    config::FirewallPolicy,
    host::{Host, Syscall},
    install::{InstallContext, InstallError, Result},
};

use tracing::{info, instrument, warn};

/// Open web ports through ufw, as far as firewall policy asks for.
///
/// # Errors
///
/// - Return [`InstallError::FirewallMissing`] if policy requires ufw but it
///   is not installed.
/// - Return [`InstallError::Host`] if ufw fails.
#[instrument(skip(host, ctx), level = "debug")]
pub fn run(host: &impl Host, ctx: &mut InstallContext) -> Result<()> {
    let policy = ctx.settings.firewall.policy;
    if policy == FirewallPolicy::Skip {
        info!("firewall left alone");
        return Ok(());
    }

    if host.has_program("ufw") {
        info!("allow web traffic through ufw");
        host.run(&Syscall::root("ufw").args(["allow", "Apache Full"]))?;
        return Ok(());
    }

    match policy {
        FirewallPolicy::Required => Err(InstallError::FirewallMissing),
        _ => {
            warn!("ufw is not installed, make sure ports 80 and 443 are reachable");
            Ok(())
        }
    }
}
