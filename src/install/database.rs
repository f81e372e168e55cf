// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! MariaDB hardening and provisioning.
//!
//! SQL is fed to the `mysql` client through stdin as root, which Debian's
//! MariaDB authenticates over its unix socket. Secrets never show up on a
//! command line this way.
//!
//! Hardening does what `mysql_secure_installation` does interactively: give
//! root a password while keeping socket authentication, drop anonymous
//! users, drop remote root logins, and drop the test database.

use crate::{
    credentials::{CredentialSet, Secret},
    host::{Host, Syscall},
    install::{InstallContext, InstallError, Result},
};

use regex::Regex;
use std::sync::LazyLock;
use tracing::{info, instrument};

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]{1,64}$").unwrap());

/// SQL that locks down a fresh MariaDB server.
pub fn hardening_sql(root_password: &Secret) -> String {
    format!(
        "ALTER USER 'root'@'localhost' IDENTIFIED VIA unix_socket OR mysql_native_password USING PASSWORD({});\n\
         DELETE FROM mysql.global_priv WHERE User = '';\n\
         DELETE FROM mysql.global_priv WHERE User = 'root' AND Host NOT IN ('localhost', '127.0.0.1', '::1');\n\
         DROP DATABASE IF EXISTS test;\n\
         DELETE FROM mysql.db WHERE Db = 'test' OR Db = 'test\\\\_%';\n\
         FLUSH PRIVILEGES;\n",
        literal(root_password.expose()),
    )
}

/// SQL that creates Nextcloud's database and its local user.
///
/// # Errors
///
/// - Return [`InstallError::Unsafe`] if database or user name is not a plain
///   identifier.
/// - Return [`InstallError::Credential`] if database password is missing.
pub fn provisioning_sql(credentials: &CredentialSet) -> Result<String> {
    let db = identifier("database.name", &credentials.db_name)?;
    let user = identifier("database.user", &credentials.db_user)?;
    let password = literal(credentials.db_password()?.expose());

    Ok(format!(
        "CREATE DATABASE IF NOT EXISTS `{db}` CHARACTER SET utf8mb4 COLLATE utf8mb4_general_ci;\n\
         CREATE USER IF NOT EXISTS '{user}'@'localhost' IDENTIFIED BY {password};\n\
         ALTER USER '{user}'@'localhost' IDENTIFIED BY {password};\n\
         GRANT ALL PRIVILEGES ON `{db}`.* TO '{user}'@'localhost';\n\
         FLUSH PRIVILEGES;\n"
    ))
}

/// Harden MariaDB, then provision Nextcloud's database.
///
/// # Errors
///
/// - Return [`InstallError::MissingState`] if credentials were not collected.
/// - Return [`InstallError::Host`] if the mysql client fails.
#[instrument(skip(host, ctx), level = "debug")]
pub fn run(host: &impl Host, ctx: &mut InstallContext) -> Result<()> {
    let credentials = ctx.credentials()?;

    host.run(&Syscall::root("systemctl").args(["enable", "--now", "mariadb"]))?;

    info!("harden mariadb");
    let hardening = hardening_sql(credentials.root_password()?);
    host.run(&Syscall::root("mysql").stdin(hardening))?;

    info!("create database {:?} for user {:?}", credentials.db_name, credentials.db_user);
    let provisioning = provisioning_sql(credentials)?;
    host.run(&Syscall::root("mysql").stdin(provisioning))?;

    Ok(())
}

fn identifier<'a>(field: &'static str, value: &'a str) -> Result<&'a str> {
    if IDENTIFIER.is_match(value) {
        Ok(value)
    } else {
        Err(InstallError::Unsafe {
            field,
            value: value.to_string(),
        })
    }
}

fn literal(value: &str) -> String {
    format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
}
