// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{
    host::{install_file, Host, Syscall},
    install::{InstallContext, Result},
    render::PhpIni,
};

use tracing::{info, instrument};

/// Write PHP overrides for both the Apache and CLI runtimes.
///
/// CLI gets the same limits because `occ` and cron run through it.
///
/// # Errors
///
/// - Return [`InstallError::Render`](crate::install::InstallError::Render)
///   if a limit is malformed.
/// - Return [`InstallError::Host`](crate::install::InstallError::Host) if
///   writing a file or restarting Apache fails.
#[instrument(skip(host, ctx), level = "debug")]
pub fn run(host: &impl Host, ctx: &mut InstallContext) -> Result<()> {
    let php = &ctx.settings.php;
    let contents = PhpIni::new(
        &php.memory_limit,
        &php.upload_max_filesize,
        &php.post_max_size,
        php.max_execution_time,
    )?
    .render()?;

    for path in ctx.settings.php_ini_paths() {
        ctx.preserve(host, &path)?;
        info!("write {}", path.display());
        install_file(host, &contents, &path, 0o644)?;
    }
    host.run(&Syscall::root("systemctl").args(["restart", "apache2"]))?;

    Ok(())
}
