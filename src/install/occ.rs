// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Nextcloud's `occ` administration tool.
//!
//! Every `occ` call runs as the web server user, because Nextcloud refuses
//! to touch its own tree as anyone else.

use crate::{
    config::InstallSettings,
    host::{Host, Syscall},
    install::{InstallContext, Result},
    render::check_host_name,
};

use tracing::{info, instrument};

/// APCu backed local memory cache.
pub const LOCAL_CACHE: &str = r"\OC\Memcache\APCu";

/// Start an `occ` command line.
pub fn occ(settings: &InstallSettings) -> Syscall {
    Syscall::as_user(&settings.nextcloud.web_user, "php").arg(settings.occ_path())
}

/// Trusted domains to register, in index order starting at 1.
///
/// Index 0 already holds localhost after the unattended install.
pub fn trusted_domains(ctx: &InstallContext) -> Vec<String> {
    let mut domains: Vec<String> = Vec::new();
    let candidates = std::iter::once(ctx.server_address().to_string())
        .chain(ctx.settings.nextcloud.trusted_domains.iter().cloned());
    for domain in candidates {
        if domain != "localhost" && !domains.contains(&domain) {
            domains.push(domain);
        }
    }

    domains
}

/// Run Nextcloud's unattended installer against the provisioned database.
///
/// # Errors
///
/// - Return [`InstallError::MissingState`](crate::install::InstallError::MissingState)
///   if credentials were not collected.
/// - Return [`InstallError::Host`](crate::install::InstallError::Host) if
///   installer fails.
#[instrument(skip(host, ctx), level = "debug")]
pub fn setup(host: &impl Host, ctx: &mut InstallContext) -> Result<()> {
    let credentials = ctx.credentials()?;
    let settings = &ctx.settings;

    info!("install nextcloud with admin {:?}", credentials.admin_user);
    host.run(
        &occ(settings)
            .args(["maintenance:install", "--database", "mysql"])
            .args(["--database-name", credentials.db_name.as_str()])
            .args(["--database-user", credentials.db_user.as_str()])
            .arg("--database-pass")
            .secret_arg(credentials.db_password()?.expose())
            .args(["--admin-user", credentials.admin_user.as_str()])
            .arg("--admin-pass")
            .secret_arg(credentials.admin_password.expose())
            .arg("--data-dir")
            .arg(&settings.paths.data_dir)
            .interactive(),
    )?;

    Ok(())
}

/// Apply post-install settings: trusted domains, local cache, locale, and
/// cron based background jobs.
///
/// # Errors
///
/// - Return [`InstallError::Render`](crate::install::InstallError::Render)
///   if a trusted domain is not a plain host name.
/// - Return [`InstallError::Host`](crate::install::InstallError::Host) if an
///   `occ` call fails.
#[instrument(skip(host, ctx), level = "debug")]
pub fn configure(host: &impl Host, ctx: &mut InstallContext) -> Result<()> {
    let settings = &ctx.settings;
    let next = &settings.nextcloud;

    for (index, domain) in trusted_domains(ctx).iter().enumerate() {
        check_host_name("nextcloud.trusted_domains", domain)?;
        info!("trust domain {domain}");
        host.run(&system_set(settings, "trusted_domains", Some(index + 1), domain))?;
    }

    host.run(&system_set(settings, "memcache.local", None, LOCAL_CACHE))?;
    host.run(&system_set(settings, "default_phone_region", None, &next.phone_region))?;
    host.run(&system_set(settings, "default_locale", None, &next.default_locale))?;
    host.run(&occ(settings).arg("background:cron"))?;

    let cron = settings.paths.install_dir.join("cron.php");
    let entry = format!("*/5 * * * * php -f {}\n", cron.display());
    info!("schedule background jobs for {}", next.web_user);
    host.run(
        &Syscall::root("crontab")
            .args(["-u", next.web_user.as_str(), "-"])
            .stdin(entry),
    )?;

    Ok(())
}

fn system_set(settings: &InstallSettings, key: &str, index: Option<usize>, value: &str) -> Syscall {
    let mut syscall = occ(settings).args(["config:system:set", key]);
    if let Some(index) = index {
        syscall = syscall.arg(index.to_string());
    }
    syscall.arg(format!("--value={value}"))
}
