// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{
    host::{Host, Syscall},
    install::{InstallContext, InstallError, Result},
};

use std::path::Path;
use tracing::{info, instrument, warn};

/// Programs every run depends on.
pub const REQUIRED_PROGRAMS: [&str; 3] = ["sudo", "apt-get", "systemctl"];

/// Check that host is fit for installation, and resolve server address.
///
/// # Errors
///
/// - Return [`InstallError::Precondition`] if running as root, or if a
///   required program is missing.
#[instrument(skip(host, ctx), level = "debug")]
pub fn run(host: &impl Host, ctx: &mut InstallContext) -> Result<()> {
    if host.is_root() {
        return Err(InstallError::Precondition(
            "refusing to run as root, run as a regular user with sudo access instead".into(),
        ));
    }

    for program in REQUIRED_PROGRAMS {
        if !host.has_program(program) {
            return Err(InstallError::Precondition(format!(
                "required program {program:?} is not installed"
            )));
        }
    }

    if !host.exists(Path::new("/etc/debian_version")) {
        warn!("host does not look like Debian, package names may not match");
    }

    let address = match &ctx.settings.site.server_name {
        Some(name) => name.clone(),
        None => detect_address(host),
    };
    info!("nextcloud will answer on {address}");
    ctx.server_address = Some(address);

    Ok(())
}

/// First address reported by `hostname -I`, or localhost.
pub fn detect_address(host: &impl Host) -> String {
    match host.run(&Syscall::new("hostname").arg("-I")) {
        Ok(output) => match output.split_whitespace().next() {
            Some(address) => address.to_string(),
            None => {
                warn!("host reports no address, falling back to localhost");
                "localhost".into()
            }
        },
        Err(error) => {
            warn!("cannot detect host address, falling back to localhost: {error}");
            "localhost".into()
        }
    }
}
