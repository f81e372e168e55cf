// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{
    host::{install_file, Host, Syscall},
    install::{InstallContext, Result},
    render::VirtualHost,
};

use std::path::Path;
use tracing::{info, instrument};

/// Apache modules Nextcloud relies on.
pub const APACHE_MODULES: [&str; 5] = ["rewrite", "headers", "env", "dir", "mime"];

const DEFAULT_SITE: &str = "/etc/apache2/sites-enabled/000-default.conf";

/// Write Nextcloud's virtual host, enable it, and restart Apache.
///
/// # Errors
///
/// - Return [`InstallError::Render`](crate::install::InstallError::Render)
///   if a site value is unsafe.
/// - Return [`InstallError::Host`](crate::install::InstallError::Host) if an
///   Apache tool fails.
#[instrument(skip(host, ctx), level = "debug")]
pub fn run(host: &impl Host, ctx: &mut InstallContext) -> Result<()> {
    let site = &ctx.settings.site;
    let vhost = VirtualHost::new(
        ctx.server_address(),
        &site.server_admin,
        &ctx.settings.paths.install_dir,
        &site.site_name,
    )?;
    let contents = vhost.render()?;

    let path = ctx.settings.apache_site_path();
    ctx.preserve(host, &path)?;
    info!("write {}", path.display());
    install_file(host, &contents, &path, 0o644)?;

    host.run(&Syscall::root("a2enmod").args(APACHE_MODULES))?;
    host.run(&Syscall::root("a2ensite").arg(ctx.settings.apache_site_file()))?;
    if host.exists(Path::new(DEFAULT_SITE)) {
        host.run(&Syscall::root("a2dissite").arg("000-default"))?;
    }
    host.run(&Syscall::root("systemctl").args(["restart", "apache2"]))?;

    Ok(())
}
