// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration file templates.
//!
//! Apache and PHP read the files rendered here, so every value is validated
//! before it is substituted. A value that could break out of its directive,
//! e.g., by smuggling in a newline, is rejected instead of escaped.

use handlebars::Handlebars;
use regex::Regex;
use serde::Serialize;
use std::{net::IpAddr, path::Path, sync::LazyLock};

static HOSTNAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?",
        r"(\.[A-Za-z0-9]([A-Za-z0-9-]{0,61}[A-Za-z0-9])?)*$",
    ))
    .unwrap()
});
static EMAIL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+$").unwrap());
static LOG_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").unwrap());
static SIZE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+[KMG]?$").unwrap());

const VIRTUAL_HOST: &str = r#"<VirtualHost *:80>
    ServerName {{server_name}}
    ServerAdmin {{server_admin}}
    DocumentRoot {{document_root}}

    <Directory {{document_root}}/>
        Require all granted
        AllowOverride All
        Options FollowSymLinks MultiViews

        <IfModule mod_dav.c>
            Dav off
        </IfModule>
    </Directory>

    ErrorLog ${APACHE_LOG_DIR}/{{log_name}}_error.log
    CustomLog ${APACHE_LOG_DIR}/{{log_name}}_access.log combined
</VirtualHost>
"#;

const PHP_INI: &str = r#"; Managed by oxicloud.
memory_limit = {{memory_limit}}
upload_max_filesize = {{upload_max_filesize}}
post_max_size = {{post_max_size}}
max_execution_time = {{max_execution_time}}
output_buffering = 0

opcache.enable = 1
opcache.interned_strings_buffer = 16
opcache.max_accelerated_files = 10000
opcache.memory_consumption = 128
opcache.save_comments = 1
opcache.revalidate_freq = 60

apc.enable_cli = 1
"#;

/// Apache virtual host serving Nextcloud.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VirtualHost {
    pub server_name: String,
    pub server_admin: String,
    pub document_root: String,
    pub log_name: String,
}

impl VirtualHost {
    /// Construct new virtual host, validating every value.
    ///
    /// # Errors
    ///
    /// - Return [`RenderError::Invalid`] naming the first unusable value.
    pub fn new(
        server_name: impl Into<String>,
        server_admin: impl Into<String>,
        document_root: &Path,
        log_name: impl Into<String>,
    ) -> Result<Self> {
        let vhost = Self {
            server_name: server_name.into(),
            server_admin: server_admin.into(),
            document_root: safe_path("document_root", document_root)?,
            log_name: log_name.into(),
        };
        check_host_name("server_name", &vhost.server_name)?;
        check_email("server_admin", &vhost.server_admin)?;
        check(&LOG_NAME, "log_name", &vhost.log_name)?;

        Ok(vhost)
    }

    /// Render site file.
    ///
    /// # Errors
    ///
    /// - Return [`RenderError::Template`] if rendering fails.
    pub fn render(&self) -> Result<String> {
        render("virtual_host", VIRTUAL_HOST, self)
    }
}

/// PHP override file for Nextcloud.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhpIni {
    pub memory_limit: String,
    pub upload_max_filesize: String,
    pub post_max_size: String,
    pub max_execution_time: u32,
}

impl PhpIni {
    /// Construct new PHP override, validating every value.
    ///
    /// # Errors
    ///
    /// - Return [`RenderError::Invalid`] naming the first unusable value.
    pub fn new(
        memory_limit: impl Into<String>,
        upload_max_filesize: impl Into<String>,
        post_max_size: impl Into<String>,
        max_execution_time: u32,
    ) -> Result<Self> {
        let ini = Self {
            memory_limit: memory_limit.into(),
            upload_max_filesize: upload_max_filesize.into(),
            post_max_size: post_max_size.into(),
            max_execution_time,
        };
        check_size("memory_limit", &ini.memory_limit)?;
        check_size("upload_max_filesize", &ini.upload_max_filesize)?;
        check_size("post_max_size", &ini.post_max_size)?;

        Ok(ini)
    }

    /// Render ini file.
    ///
    /// # Errors
    ///
    /// - Return [`RenderError::Template`] if rendering fails.
    pub fn render(&self) -> Result<String> {
        render("php_ini", PHP_INI, self)
    }
}

/// Check that value is a plain host name or IP address.
///
/// # Errors
///
/// - Return [`RenderError::Invalid`] otherwise.
pub fn check_host_name(field: &'static str, value: &str) -> Result<()> {
    if value.parse::<IpAddr>().is_ok() {
        return Ok(());
    }

    check(&HOSTNAME, field, value)
}

/// Check that value is a plain email address.
///
/// # Errors
///
/// - Return [`RenderError::Invalid`] otherwise.
pub fn check_email(field: &'static str, value: &str) -> Result<()> {
    check(&EMAIL, field, value)
}

/// Check that value is a PHP size, e.g., "512M".
///
/// # Errors
///
/// - Return [`RenderError::Invalid`] otherwise.
pub fn check_size(field: &'static str, value: &str) -> Result<()> {
    check(&SIZE, field, value)
}

fn render(name: &str, template: &str, data: &impl Serialize) -> Result<String> {
    let mut handlebars = Handlebars::new();
    handlebars.set_strict_mode(true);
    handlebars.register_escape_fn(handlebars::no_escape);
    handlebars
        .register_template_string(name, template)
        .map_err(|error| RenderError::Template(error.to_string()))?;

    handlebars
        .render(name, data)
        .map_err(|error| RenderError::Template(error.to_string()))
}

fn safe_path(field: &'static str, path: &Path) -> Result<String> {
    let value = path.to_string_lossy().trim_end_matches('/').to_string();
    let unsafe_char = |c: char| c.is_whitespace() || c.is_control() || "\"'<>$\\".contains(c);
    if !path.is_absolute() || value.is_empty() || value.chars().any(unsafe_char) {
        return Err(RenderError::Invalid {
            field,
            value: value.clone(),
        });
    }

    Ok(value)
}

fn check(pattern: &Regex, field: &'static str, value: &str) -> Result<()> {
    if pattern.is_match(value) {
        Ok(())
    } else {
        Err(RenderError::Invalid {
            field,
            value: value.to_string(),
        })
    }
}

/// Template rendering error types.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    /// Value cannot be substituted safely.
    #[error("refusing to render {field} = {value:?}")]
    Invalid { field: &'static str, value: String },

    /// Template engine failed.
    #[error("template rendering failed: {0}")]
    Template(String),
}

/// Friendly result alias :3
pub type Result<T, E = RenderError> = std::result::Result<T, E>;
