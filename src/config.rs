// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the installation settings file that Oxicloud uses to
//! parameterize an installation. Every field has a sensible default, so an
//! empty file (or no file at all) describes the stock Raspberry Pi install.
//!
//! # General Layout
//!
//! ```toml
//! [release]
//! version = "29.0.4"
//! base_url = "https://download.nextcloud.com/server/releases"
//!
//! [paths]
//! install_dir = "/var/www/nextcloud"
//! data_dir = "/var/nextcloud-data"
//! backup_root = "~"
//!
//! [php]
//! version = "8.2"
//! memory_limit = "512M"
//!
//! [firewall]
//! policy = "best-effort"
//! ```
//!
//! Path fields are shell expanded on parse, so `~` and `$VAR` work as
//! expected.

use crate::render::{self, RenderError};

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    path::{Path, PathBuf},
    str::FromStr,
    sync::LazyLock,
};
use tracing::{debug, info};

static VERSION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+\.\d+\.\d+$").unwrap());
static PHP_VERSION: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+\.\d+$").unwrap());
static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_]+$").unwrap());
static SITE_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_.-]+$").unwrap());
static USER_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z_][a-z0-9_-]{0,31}$").unwrap());
static PACKAGE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9+.-]+$").unwrap());

/// Installation settings.
///
/// Fixed at start of the run, and never mutated by any installation step.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct InstallSettings {
    /// Release of Nextcloud to install.
    pub release: ReleaseSettings,

    /// Filesystem locations.
    pub paths: PathSettings,

    /// PHP runtime limits.
    pub php: PhpSettings,

    /// Database naming.
    pub database: DatabaseSettings,

    /// Apache virtual host.
    pub site: SiteSettings,

    /// Post-install application settings.
    pub nextcloud: NextcloudSettings,

    /// Firewall handling.
    pub firewall: FirewallSettings,

    /// Additional OS packages.
    pub packages: PackageSettings,
}

impl InstallSettings {
    /// Load installation settings from file at target path.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if file cannot be read.
    /// - Return [`ConfigError::Deserialize`] if file content is malformed.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("load settings from {}", path.display());
        read_to_string(path)
            .map_err(|source| ConfigError::Read {
                source,
                path: path.to_path_buf(),
            })?
            .parse()
    }

    /// Load installation settings from explicit path, or fallback path if
    /// it exists, or use defaults.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if explicit file cannot be read.
    /// - Return [`ConfigError::Deserialize`] if file content is malformed.
    pub fn load_or_default(explicit: Option<&Path>, fallback: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        match fallback {
            Some(path) if path.exists() => Self::load(path),
            _ => {
                debug!("no settings file found, use defaults");
                Ok(Self::default())
            }
        }
    }

    /// Check that every value is safe to hand to external tools.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        check(&VERSION, "release.version", &self.release.version)?;
        if !self.release.base_url.starts_with("https://") {
            return Err(invalid("release.base_url", "must use https"));
        }

        for (field, path) in [
            ("paths.install_dir", &self.paths.install_dir),
            ("paths.data_dir", &self.paths.data_dir),
            ("paths.backup_root", &self.paths.backup_root),
        ] {
            if !path.is_absolute() {
                return Err(invalid(field, "must be an absolute path"));
            }
        }

        if self.paths.data_dir.starts_with(&self.paths.install_dir) {
            return Err(invalid(
                "paths.data_dir",
                "must live outside of the install directory",
            ));
        }

        check(&PHP_VERSION, "php.version", &self.php.version)?;
        render::check_size("php.memory_limit", &self.php.memory_limit)?;
        render::check_size("php.upload_max_filesize", &self.php.upload_max_filesize)?;
        render::check_size("php.post_max_size", &self.php.post_max_size)?;
        if self.php.max_execution_time == 0 {
            return Err(invalid("php.max_execution_time", "must be positive"));
        }

        check(&IDENTIFIER, "database.name", &self.database.name)?;
        check(&IDENTIFIER, "database.user", &self.database.user)?;

        check(&SITE_NAME, "site.site_name", &self.site.site_name)?;
        if let Some(name) = &self.site.server_name {
            render::check_host_name("site.server_name", name)?;
        }
        render::check_email("site.server_admin", &self.site.server_admin)?;

        check(&USER_NAME, "nextcloud.web_user", &self.nextcloud.web_user)?;
        for domain in &self.nextcloud.trusted_domains {
            render::check_host_name("nextcloud.trusted_domains", domain)?;
        }

        for package in &self.packages.extra {
            check(&PACKAGE, "packages.extra", package)?;
        }

        Ok(())
    }

    /// Nextcloud release archive file name.
    pub fn archive_name(&self) -> String {
        format!("nextcloud-{}.zip", self.release.version)
    }

    /// Apache site file for Nextcloud virtual host.
    pub fn apache_site_path(&self) -> PathBuf {
        PathBuf::from("/etc/apache2/sites-available").join(self.apache_site_file())
    }

    /// File name of Apache site, as understood by a2ensite.
    pub fn apache_site_file(&self) -> String {
        format!("{}.conf", self.site.site_name)
    }

    /// PHP ini override files for the Apache and CLI runtimes.
    pub fn php_ini_paths(&self) -> [PathBuf; 2] {
        let base = PathBuf::from("/etc/php").join(&self.php.version);
        let file = format!("90-{}.ini", self.site.site_name);
        [
            base.join("apache2").join("conf.d").join(&file),
            base.join("cli").join("conf.d").join(&file),
        ]
    }

    /// Path to Nextcloud's administrative tool.
    pub fn occ_path(&self) -> PathBuf {
        self.paths.install_dir.join("occ")
    }

    /// Path to Nextcloud's own configuration file.
    pub fn config_php_path(&self) -> PathBuf {
        self.paths.install_dir.join("config").join("config.php")
    }
}

impl FromStr for InstallSettings {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut settings: InstallSettings =
            toml::de::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Perform shell expansion on every path field.
        settings.paths.install_dir = expand(&settings.paths.install_dir)?;
        settings.paths.data_dir = expand(&settings.paths.data_dir)?;
        settings.paths.backup_root = expand(&settings.paths.backup_root)?;

        Ok(settings)
    }
}

impl Display for InstallSettings {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Release selection.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ReleaseSettings {
    /// Exact release version, e.g., "29.0.4".
    pub version: String,

    /// Directory URL that hosts release archives and their digests.
    pub base_url: String,
}

impl Default for ReleaseSettings {
    fn default() -> Self {
        Self {
            version: "29.0.4".into(),
            base_url: "https://download.nextcloud.com/server/releases".into(),
        }
    }
}

/// Filesystem locations.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PathSettings {
    /// Where the Nextcloud tree is deployed, also the Apache document root.
    pub install_dir: PathBuf,

    /// Where Nextcloud keeps user data.
    pub data_dir: PathBuf,

    /// Parent directory of timestamped backup directories.
    pub backup_root: PathBuf,
}

impl Default for PathSettings {
    fn default() -> Self {
        Self {
            install_dir: "/var/www/nextcloud".into(),
            data_dir: "/var/nextcloud-data".into(),
            backup_root: crate::path::home_dir().unwrap_or_else(|_| "/root".into()),
        }
    }
}

/// PHP runtime limits.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PhpSettings {
    /// Packaged PHP version, e.g., "8.2" on Debian bookworm.
    pub version: String,

    pub memory_limit: String,

    pub upload_max_filesize: String,

    pub post_max_size: String,

    /// Seconds.
    pub max_execution_time: u32,
}

impl Default for PhpSettings {
    fn default() -> Self {
        Self {
            version: "8.2".into(),
            memory_limit: "512M".into(),
            upload_max_filesize: "1G".into(),
            post_max_size: "1G".into(),
            max_execution_time: 360,
        }
    }
}

/// Database naming.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub name: String,
    pub user: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            name: "nextcloud".into(),
            user: "nextcloud".into(),
        }
    }
}

/// Apache virtual host settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SiteSettings {
    /// Host name to serve. Detected from host address if absent.
    pub server_name: Option<String>,

    pub server_admin: String,

    /// Base name of site and PHP override files.
    pub site_name: String,
}

impl Default for SiteSettings {
    fn default() -> Self {
        Self {
            server_name: None,
            server_admin: "webmaster@localhost".into(),
            site_name: "nextcloud".into(),
        }
    }
}

/// Post-install application settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NextcloudSettings {
    /// Admin user name offered when operator enters nothing.
    pub default_admin: String,

    /// Extra trusted domains besides localhost and the server address.
    pub trusted_domains: Vec<String>,

    pub phone_region: String,

    pub default_locale: String,

    /// System user that runs Apache and owns the Nextcloud tree.
    pub web_user: String,
}

impl Default for NextcloudSettings {
    fn default() -> Self {
        Self {
            default_admin: "admin".into(),
            trusted_domains: Vec::new(),
            phone_region: "US".into(),
            default_locale: "en_US".into(),
            web_user: "www-data".into(),
        }
    }
}

/// Firewall handling.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FirewallSettings {
    pub policy: FirewallPolicy,
}

/// What to do about the optional firewall tool.
#[derive(Default, Debug, PartialEq, Eq, Clone, Copy, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FirewallPolicy {
    /// Open web ports if ufw is installed, warn otherwise.
    #[default]
    BestEffort,

    /// Fail installation if ufw is not installed.
    Required,

    /// Leave firewall alone.
    Skip,
}

/// Additional OS packages.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PackageSettings {
    pub extra: Vec<String>,
}

fn expand(path: &Path) -> Result<PathBuf> {
    Ok(PathBuf::from(
        shellexpand::full(path.to_string_lossy().as_ref())
            .map_err(ConfigError::ShellExpansion)?
            .into_owned(),
    ))
}

fn check(pattern: &Regex, field: &'static str, value: &str) -> Result<()> {
    if pattern.is_match(value) {
        Ok(())
    } else {
        Err(invalid(field, format!("{value:?} does not match {}", pattern.as_str())))
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read settings file.
    #[error("failed to read settings from {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Setting holds a value that cannot be used safely.
    #[error("invalid setting {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    /// Setting cannot be substituted into a rendered file or command.
    #[error(transparent)]
    Render(#[from] RenderError),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
