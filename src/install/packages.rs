// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{
    config::InstallSettings,
    host::{Host, Syscall},
    install::{InstallContext, Result},
};

use tracing::{info, instrument};

/// PHP extensions Nextcloud needs.
const PHP_EXTENSIONS: [&str; 12] = [
    "gd", "mysql", "curl", "mbstring", "intl", "gmp", "bcmath", "xml", "zip", "imagick", "apcu",
    "bz2",
];

/// Full package list for settings.
pub fn package_list(settings: &InstallSettings) -> Vec<String> {
    let version = &settings.php.version;
    let mut packages = vec![
        "apache2".to_string(),
        "mariadb-server".to_string(),
        "libapache2-mod-php".to_string(),
    ];
    packages.extend(PHP_EXTENSIONS.iter().map(|ext| format!("php{version}-{ext}")));
    packages.push("unzip".to_string());
    packages.extend(settings.packages.extra.iter().cloned());

    packages
}

/// Refresh package index, then install everything Nextcloud needs.
///
/// # Errors
///
/// - Return [`InstallError::Host`](crate::install::InstallError::Host) if
///   apt-get fails.
#[instrument(skip(host, ctx), level = "debug")]
pub fn run(host: &impl Host, ctx: &mut InstallContext) -> Result<()> {
    let packages = package_list(&ctx.settings);
    info!("install {} packages", packages.len());

    host.run(&Syscall::root("apt-get").arg("update").interactive())?;
    host.run(
        &Syscall::root("apt-get")
            .env("DEBIAN_FRONTEND", "noninteractive")
            .args(["install", "-y"])
            .args(packages)
            .interactive(),
    )?;

    Ok(())
}
