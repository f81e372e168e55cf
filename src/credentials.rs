// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Credential collection and generation.
//!
//! An installation needs six pieces of identity: the Nextcloud admin user and
//! password chosen by the operator, the database name and user taken from the
//! settings, and two generated secrets for the database user and the MariaDB
//! root account.
//!
//! # Credential Record
//!
//! All six values are written once to a plaintext __credential record__ inside
//! the backup directory, readable by its owner only. The record is the sole
//! durable copy of the generated secrets. Its layout is fixed:
//!
//! ```text
//! Nextcloud Admin User: admin
//! Nextcloud Admin Password: Sup3rSecret!
//! Database Name: nextcloud
//! Database User: nextcloud
//! Database Password: 4fGh7KqPz2Lm
//! MariaDB Root Password: Xy9Tb3Wn8RcV
//! ```

use crate::prompt::{PromptError, Prompter};

use base64::{engine::general_purpose::STANDARD, Engine};
use regex::Regex;
use ring::rand::{SecureRandom, SystemRandom};
use std::{
    fmt::{Debug, Display, Formatter, Result as FmtResult},
    fs::{read_to_string, OpenOptions},
    io::Write,
    os::unix::fs::OpenOptionsExt,
    path::{Path, PathBuf},
    str::FromStr,
    sync::LazyLock,
};
use tracing::{info, instrument, warn};

/// Exact length of every generated secret.
pub const SECRET_LEN: usize = 12;

/// Minimum length of the admin password.
pub const MIN_PASSWORD_LEN: usize = 8;

static USERNAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").unwrap());

const ADMIN_USER: &str = "Nextcloud Admin User";
const ADMIN_PASSWORD: &str = "Nextcloud Admin Password";
const DB_NAME: &str = "Database Name";
const DB_USER: &str = "Database User";
const DB_PASSWORD: &str = "Database Password";
const ROOT_PASSWORD: &str = "MariaDB Root Password";

/// Secret string that stays out of debug output.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    /// Wrap a secret value.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the secret value itself.
    pub fn expose(&self) -> &str {
        self.0.as_str()
    }
}

impl Debug for Secret {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str("Secret(****)")
    }
}

/// Validate a candidate admin user name.
///
/// Empty input is replaced by `default`.
///
/// # Errors
///
/// - Return [`CredentialError::InvalidUsername`] if the name holds anything
///   other than letters, digits, hyphen, or underscore.
pub fn validate_username(input: &str, default: &str) -> Result<String> {
    let name = input.trim();
    let name = if name.is_empty() { default } else { name };

    if USERNAME.is_match(name) {
        Ok(name.to_string())
    } else {
        Err(CredentialError::InvalidUsername(name.to_string()))
    }
}

/// Validate a candidate admin password against its confirmation.
///
/// # Errors
///
/// - Return [`CredentialError::PasswordTooShort`] if password has fewer than
///   [`MIN_PASSWORD_LEN`] characters.
/// - Return [`CredentialError::PasswordMismatch`] if confirmation differs.
pub fn validate_password(password: &str, confirmation: &str) -> Result<()> {
    check_password_length(password)?;
    if password.as_bytes() != confirmation.as_bytes() {
        return Err(CredentialError::PasswordMismatch);
    }

    Ok(())
}

fn check_password_length(password: &str) -> Result<()> {
    if password.chars().count() < MIN_PASSWORD_LEN {
        return Err(CredentialError::PasswordTooShort(MIN_PASSWORD_LEN));
    }

    Ok(())
}

/// Generate a random secret of exactly [`SECRET_LEN`] characters.
///
/// Random bytes are rendered as base64 with `=`, `+`, and `/` dropped. More
/// bytes are drawn whenever stripping leaves too few characters.
///
/// # Errors
///
/// - Return [`CredentialError::Random`] if the system random source fails.
pub fn generate_secret() -> Result<Secret> {
    let rng = SystemRandom::new();
    let mut secret = String::with_capacity(SECRET_LEN);
    let mut bytes = [0u8; 16];

    while secret.len() < SECRET_LEN {
        rng.fill(&mut bytes).map_err(|_| CredentialError::Random)?;
        secret.extend(
            STANDARD
                .encode(bytes)
                .chars()
                .filter(|c| !matches!(c, '=' | '+' | '/')),
        );
    }

    secret.truncate(SECRET_LEN);
    Ok(Secret(secret))
}

/// Interactively collect a valid admin identity.
///
/// Keeps asking until a valid user name is given, then keeps asking for a
/// password until one is long enough and matched by its confirmation. A short
/// password is rejected before confirmation is requested. A mismatch starts
/// the password prompt over.
///
/// # Errors
///
/// - Return [`CredentialError::Prompt`] if prompting itself fails.
pub fn collect(prompter: &mut impl Prompter, default_admin: &str) -> Result<(String, Secret)> {
    let username = loop {
        let input = prompter.text("Nextcloud admin username", Some(default_admin))?;
        match validate_username(&input, default_admin) {
            Ok(name) => break name,
            Err(error) => warn!("{error}, use letters, digits, '-' or '_' only"),
        }
    };

    let password = loop {
        let password = prompter.secret("Nextcloud admin password")?;
        if let Err(error) = check_password_length(&password) {
            warn!("{error}");
            continue;
        }

        let confirmation = prompter.secret("Confirm admin password")?;
        match validate_password(&password, &confirmation) {
            Ok(()) => break Secret(password),
            Err(error) => warn!("{error}"),
        }
    };

    info!("admin account will be {username:?}");
    Ok((username, password))
}

/// Complete credential set of one installation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialSet {
    pub admin_user: String,
    pub admin_password: Secret,
    pub db_name: String,
    pub db_user: String,
    pub db_password: Option<Secret>,
    pub root_password: Option<Secret>,
}

impl CredentialSet {
    /// Construct new credential set without generated secrets.
    pub fn new(
        admin_user: impl Into<String>,
        admin_password: Secret,
        db_name: impl Into<String>,
        db_user: impl Into<String>,
    ) -> Self {
        Self {
            admin_user: admin_user.into(),
            admin_password,
            db_name: db_name.into(),
            db_user: db_user.into(),
            db_password: None,
            root_password: None,
        }
    }

    /// Generate each missing secret independently.
    ///
    /// # Errors
    ///
    /// - Return [`CredentialError::Random`] if the system random source fails.
    pub fn fill_missing_secrets(&mut self) -> Result<()> {
        if self.db_password.is_none() {
            self.db_password = Some(generate_secret()?);
        }

        if self.root_password.is_none() {
            self.root_password = Some(generate_secret()?);
        }

        Ok(())
    }

    /// Database user password.
    ///
    /// # Errors
    ///
    /// - Return [`CredentialError::MissingSecret`] if not generated yet.
    pub fn db_password(&self) -> Result<&Secret> {
        self.db_password
            .as_ref()
            .ok_or(CredentialError::MissingSecret(DB_PASSWORD))
    }

    /// MariaDB root password.
    ///
    /// # Errors
    ///
    /// - Return [`CredentialError::MissingSecret`] if not generated yet.
    pub fn root_password(&self) -> Result<&Secret> {
        self.root_password
            .as_ref()
            .ok_or(CredentialError::MissingSecret(ROOT_PASSWORD))
    }

    /// Freeze credential set into its record form.
    ///
    /// # Errors
    ///
    /// - Return [`CredentialError::MissingSecret`] if secrets are missing.
    pub fn record(&self) -> Result<CredentialRecord> {
        Ok(CredentialRecord {
            admin_user: self.admin_user.clone(),
            admin_password: self.admin_password.clone(),
            db_name: self.db_name.clone(),
            db_user: self.db_user.clone(),
            db_password: self.db_password()?.clone(),
            root_password: self.root_password()?.clone(),
        })
    }
}

/// Credential record with every secret present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialRecord {
    pub admin_user: String,
    pub admin_password: Secret,
    pub db_name: String,
    pub db_user: String,
    pub db_password: Secret,
    pub root_password: Secret,
}

impl CredentialRecord {
    /// Write record to a new file readable by its owner only.
    ///
    /// Existing file at path is truncated, and keeps its own permissions.
    ///
    /// # Errors
    ///
    /// - Return [`CredentialError::WriteRecord`] if file cannot be written.
    #[instrument(skip(self, path), level = "debug")]
    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let to_error = |source| CredentialError::WriteRecord {
            source,
            path: path.to_path_buf(),
        };

        let mut file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .map_err(to_error)?;
        file.write_all(self.to_string().as_bytes()).map_err(to_error)?;
        info!("credentials recorded at {}", path.display());

        Ok(())
    }

    /// Read record back from file.
    ///
    /// # Errors
    ///
    /// - Return [`CredentialError::ReadRecord`] if file cannot be read.
    /// - Return [`CredentialError::MalformedRecord`] if content is malformed.
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        read_to_string(path)
            .map_err(|source| CredentialError::ReadRecord {
                source,
                path: path.to_path_buf(),
            })?
            .parse()
    }
}

impl From<CredentialRecord> for CredentialSet {
    fn from(record: CredentialRecord) -> Self {
        Self {
            admin_user: record.admin_user,
            admin_password: record.admin_password,
            db_name: record.db_name,
            db_user: record.db_user,
            db_password: Some(record.db_password),
            root_password: Some(record.root_password),
        }
    }
}

impl Display for CredentialRecord {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        writeln!(fmt, "{ADMIN_USER}: {}", self.admin_user)?;
        writeln!(fmt, "{ADMIN_PASSWORD}: {}", self.admin_password.expose())?;
        writeln!(fmt, "{DB_NAME}: {}", self.db_name)?;
        writeln!(fmt, "{DB_USER}: {}", self.db_user)?;
        writeln!(fmt, "{DB_PASSWORD}: {}", self.db_password.expose())?;
        writeln!(fmt, "{ROOT_PASSWORD}: {}", self.root_password.expose())
    }
}

impl FromStr for CredentialRecord {
    type Err = CredentialError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut lines = data.lines().filter(|line| !line.trim().is_empty());
        let mut field = |label: &'static str| -> Result<String> {
            lines
                .next()
                .and_then(|line| line.split_once(": "))
                .filter(|(key, _)| *key == label)
                .map(|(_, value)| value.to_string())
                .ok_or(CredentialError::MalformedRecord(label))
        };

        Ok(Self {
            admin_user: field(ADMIN_USER)?,
            admin_password: Secret(field(ADMIN_PASSWORD)?),
            db_name: field(DB_NAME)?,
            db_user: field(DB_USER)?,
            db_password: Secret(field(DB_PASSWORD)?),
            root_password: Secret(field(ROOT_PASSWORD)?),
        })
    }
}

/// Credential error types.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// User name holds forbidden characters.
    #[error("invalid username {0:?}")]
    InvalidUsername(String),

    /// Password is too short.
    #[error("password must be at least {0} characters long")]
    PasswordTooShort(usize),

    /// Password and confirmation differ.
    #[error("passwords do not match")]
    PasswordMismatch,

    /// System random source failed.
    #[error("system random number generator failed")]
    Random,

    /// Secret has not been generated yet.
    #[error("{0} has not been generated")]
    MissingSecret(&'static str),

    /// Record file cannot be written.
    #[error("failed to write credential record to {:?}", path.display())]
    WriteRecord {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Record file cannot be read.
    #[error("failed to read credential record from {:?}", path.display())]
    ReadRecord {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Record file does not follow the record layout.
    #[error("credential record is missing line {0:?}")]
    MalformedRecord(&'static str),

    /// Prompting failed.
    #[error(transparent)]
    Prompt(#[from] PromptError),
}

/// Friendly result alias :3
pub type Result<T, E = CredentialError> = std::result::Result<T, E>;
