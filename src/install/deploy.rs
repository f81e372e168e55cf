// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{
    host::{Host, Syscall},
    install::{InstallContext, InstallError, Result, Step},
};

use tracing::{info, instrument, warn};

/// Move staged release into place, and hand it to the web server user.
///
/// Anything at the install directory is replaced wholesale. Its Nextcloud
/// configuration gets preserved in the backup directory first.
///
/// # Errors
///
/// - Return [`InstallError::MissingState`] if no release was staged.
/// - Return [`InstallError::Host`] if a filesystem command fails.
#[instrument(skip(host, ctx), level = "debug")]
pub fn run(host: &impl Host, ctx: &mut InstallContext) -> Result<()> {
    let tree = ctx
        .staged
        .as_ref()
        .map(|staged| staged.tree().to_path_buf())
        .ok_or(InstallError::MissingState {
            what: "staged release",
            step: Step::Download,
        })?;

    let config_php = ctx.settings.config_php_path();
    ctx.preserve(host, &config_php)?;

    let paths = &ctx.settings.paths;
    let web_user = &ctx.settings.nextcloud.web_user;
    let owner = format!("{web_user}:{web_user}");

    if host.exists(&paths.install_dir) {
        warn!("replace existing {}", paths.install_dir.display());
        host.run(&Syscall::root("rm").arg("-rf").arg(&paths.install_dir))?;
    }

    if let Some(parent) = paths.install_dir.parent() {
        host.run(&Syscall::root("mkdir").arg("-p").arg(parent))?;
    }

    info!("deploy nextcloud to {}", paths.install_dir.display());
    host.run(&Syscall::root("mv").arg(&tree).arg(&paths.install_dir))?;
    host.run(
        &Syscall::root("install")
            .args(["-d", "-o", web_user, "-g", web_user, "-m", "750"])
            .arg(&paths.data_dir),
    )?;
    host.run(&Syscall::root("chown").args(["-R", owner.as_str()]).arg(&paths.install_dir))?;
    for (kind, mode) in [("d", "750"), ("f", "640")] {
        host.run(
            &Syscall::root("find")
                .arg(&paths.install_dir)
                .args(["-type", kind, "-exec", "chmod", mode, "{}", "+"]),
        )?;
    }

    Ok(())
}
