// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Installation procedure.
//!
//! Installing Nextcloud is a fixed, ordered list of [`Step`]s. Each step is a
//! short sequence of external commands and file writes, and either succeeds
//! as a whole or stops the run. There is no rollback. Steps that already
//! finished stay finished, so the operator can fix whatever went wrong and
//! pick up where the run stopped with [`Selection::From`], or retry one step
//! alone with [`Selection::Only`].
//!
//! # Shared State
//!
//! Steps talk to each other through an [`InstallContext`] only: the admin
//! identity and generated secrets, the backup directory, the staged release,
//! and the address the server answers on. A step that needs something an
//! earlier step produces fails with [`InstallError::MissingState`] when that
//! earlier step did not run, e.g., deploying without downloading first.
//!
//! # Step Order
//!
//! 1. `preflight`: refuse root, check required tools, resolve address.
//! 2. `credentials`: collect admin identity, preserve prior configuration.
//! 3. `secrets`: generate database secrets, write credential record.
//! 4. `packages`: install Apache, MariaDB, and PHP.
//! 5. `database`: harden MariaDB, create Nextcloud database and user.
//! 6. `download`: fetch and verify release, extract into staging.
//! 7. `deploy`: move release into place, normalize ownership and modes.
//! 8. `web-server`: write virtual host, enable modules and site.
//! 9. `php`: write PHP limits and caching overrides.
//! 10. `setup`: run Nextcloud's unattended installer.
//! 11. `configure`: trusted domains, cache backend, locale, cron.
//! 12. `firewall`: open web ports if ufw is around.
//! 13. `cleanup`: delete downloaded artifacts.
//!
//! Preflight always runs, whatever the selection.

pub mod database;
pub mod deploy;
pub mod firewall;
pub mod occ;
pub mod packages;
pub mod php;
pub mod preflight;
pub mod webserver;

use crate::{
    artifact::{fetch_verified, ArtifactError, Release, StagedRelease},
    backup::{Backup, BackupError},
    config::InstallSettings,
    credentials::{self, CredentialError, CredentialSet},
    host::{Host, HostError},
    prompt::Prompter,
    render::RenderError,
};

use chrono::{DateTime, Local};
use std::{
    collections::HashSet,
    fmt::{Display, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};
use tracing::{info, instrument};

/// One step of the installation procedure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Step {
    Preflight,
    Credentials,
    Secrets,
    Packages,
    Database,
    Download,
    Deploy,
    WebServer,
    Php,
    Setup,
    Configure,
    Firewall,
    Cleanup,
}

impl Step {
    /// Every step in execution order.
    pub const ALL: [Step; 13] = [
        Step::Preflight,
        Step::Credentials,
        Step::Secrets,
        Step::Packages,
        Step::Database,
        Step::Download,
        Step::Deploy,
        Step::WebServer,
        Step::Php,
        Step::Setup,
        Step::Configure,
        Step::Firewall,
        Step::Cleanup,
    ];

    /// Name used on the command line.
    pub fn name(&self) -> &'static str {
        match self {
            Step::Preflight => "preflight",
            Step::Credentials => "credentials",
            Step::Secrets => "secrets",
            Step::Packages => "packages",
            Step::Database => "database",
            Step::Download => "download",
            Step::Deploy => "deploy",
            Step::WebServer => "web-server",
            Step::Php => "php",
            Step::Setup => "setup",
            Step::Configure => "configure",
            Step::Firewall => "firewall",
            Step::Cleanup => "cleanup",
        }
    }

    /// One line description of what step does.
    pub fn summary(&self) -> &'static str {
        match self {
            Step::Preflight => "check preconditions",
            Step::Credentials => "collect admin account and back up configuration",
            Step::Secrets => "generate secrets and write credential record",
            Step::Packages => "install os packages",
            Step::Database => "harden mariadb and provision database",
            Step::Download => "download and verify nextcloud release",
            Step::Deploy => "deploy nextcloud files",
            Step::WebServer => "configure apache virtual host",
            Step::Php => "configure php runtime",
            Step::Setup => "run nextcloud unattended installer",
            Step::Configure => "apply post-install settings",
            Step::Firewall => "open web ports in firewall",
            Step::Cleanup => "remove downloaded artifacts",
        }
    }
}

impl Display for Step {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.name())
    }
}

impl FromStr for Step {
    type Err = UnknownStep;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        Step::ALL
            .into_iter()
            .find(|step| step.name() == data)
            .ok_or_else(|| UnknownStep(data.to_string()))
    }
}

/// Name does not belong to any step.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown step {0:?}")]
pub struct UnknownStep(pub String);

/// Which steps to run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// Whole procedure.
    #[default]
    All,

    /// Named step and every step after it.
    From(Step),

    /// Named step alone.
    Only(Step),
}

impl Selection {
    /// Steps to run in execution order, always led by preflight.
    pub fn steps(&self) -> Vec<Step> {
        let mut steps = vec![Step::Preflight];
        match self {
            Selection::All => steps.extend(Step::ALL),
            Selection::From(first) => {
                steps.extend(Step::ALL.into_iter().filter(|step| step >= first))
            }
            Selection::Only(step) => steps.push(*step),
        }
        steps.dedup();

        steps
    }
}

/// State threaded through every step of one run.
#[derive(Debug)]
pub struct InstallContext {
    pub(crate) settings: InstallSettings,
    pub(crate) credentials: Option<CredentialSet>,
    pub(crate) staged: Option<StagedRelease>,
    pub(crate) server_address: Option<String>,
    pub(crate) record_path: Option<PathBuf>,
    backup: Option<Backup>,
    preserved: HashSet<PathBuf>,
    started: DateTime<Local>,
}

impl InstallContext {
    /// Construct new context for one run.
    pub fn new(settings: InstallSettings) -> Self {
        Self {
            settings,
            credentials: None,
            staged: None,
            server_address: None,
            record_path: None,
            backup: None,
            preserved: HashSet::new(),
            started: Local::now(),
        }
    }

    /// Use credentials from an earlier run instead of asking for them.
    pub fn with_credentials(mut self, credentials: CredentialSet) -> Self {
        self.credentials = Some(credentials);
        self
    }

    /// Installation settings.
    pub fn settings(&self) -> &InstallSettings {
        &self.settings
    }

    /// Credentials collected or loaded so far.
    ///
    /// # Errors
    ///
    /// - Return [`InstallError::MissingState`] if none were collected.
    pub fn credentials(&self) -> Result<&CredentialSet> {
        self.credentials.as_ref().ok_or(InstallError::MissingState {
            what: "credentials",
            step: Step::Credentials,
        })
    }

    /// Address the server answers on, once preflight resolved it.
    pub fn server_address(&self) -> &str {
        self.server_address.as_deref().unwrap_or("localhost")
    }

    /// Backup directory of this run, if one was created.
    pub fn backup_dir(&self) -> Option<&Path> {
        self.backup.as_ref().map(Backup::path)
    }

    /// Backup directory of this run, created on first use.
    ///
    /// # Errors
    ///
    /// - Return [`InstallError::Backup`] if directory cannot be created.
    pub fn backup(&mut self) -> Result<&Backup> {
        if self.backup.is_none() {
            self.backup = Some(Backup::create(&self.settings.paths.backup_root, &self.started)?);
        }

        self.backup.as_ref().ok_or(InstallError::MissingState {
            what: "backup directory",
            step: Step::Credentials,
        })
    }

    /// Root of release tree staged by download step, if any.
    pub fn staged_tree(&self) -> Option<&Path> {
        self.staged.as_ref().map(StagedRelease::tree)
    }

    /// Preserve existing file in backup directory, once per run.
    ///
    /// # Errors
    ///
    /// - Return [`InstallError::Backup`] if copy fails.
    pub fn preserve(&mut self, host: &impl Host, path: &Path) -> Result<()> {
        if self.preserved.contains(path) {
            return Ok(());
        }

        self.backup()?.preserve(host, path)?;
        self.preserved.insert(path.to_path_buf());

        Ok(())
    }

    /// Files that get overwritten or deleted by this procedure.
    pub fn managed_config_files(&self) -> Vec<PathBuf> {
        let mut files = vec![self.settings.apache_site_path()];
        files.extend(self.settings.php_ini_paths());
        files.push(self.settings.config_php_path());
        files
    }
}

/// Outcome of a finished run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub steps: Vec<Step>,
    pub url: String,
    pub admin_user: Option<String>,
    pub backup_dir: Option<PathBuf>,
    pub record_path: Option<PathBuf>,
}

impl Display for InstallReport {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let steps = self.steps.iter().map(Step::name).collect::<Vec<_>>().join(", ");
        writeln!(fmt, "completed steps: {steps}")?;
        writeln!(fmt, "nextcloud url: {}", self.url)?;
        if let Some(user) = &self.admin_user {
            writeln!(fmt, "admin user: {user}")?;
        }
        if let Some(path) = &self.record_path {
            writeln!(fmt, "credentials: {} (keep it safe)", path.display())?;
        }
        if let Some(path) = &self.backup_dir {
            writeln!(fmt, "backups: {}", path.display())?;
        }

        Ok(())
    }
}

/// Driver of the installation procedure.
pub struct Installer<H, P>
where
    H: Host,
    P: Prompter,
{
    host: H,
    prompter: P,
    client: reqwest::Client,
    context: InstallContext,
}

impl<H, P> Installer<H, P>
where
    H: Host,
    P: Prompter,
{
    /// Construct new installer.
    pub fn new(host: H, prompter: P, client: reqwest::Client, context: InstallContext) -> Self {
        Self {
            host,
            prompter,
            client,
            context,
        }
    }

    /// Host commands run on.
    pub fn host(&self) -> &H {
        &self.host
    }

    /// Prompter answers come from.
    pub fn prompter(&self) -> &P {
        &self.prompter
    }

    /// Current state of the run.
    pub fn context(&self) -> &InstallContext {
        &self.context
    }

    /// Run selected steps in order, stopping at the first failure.
    ///
    /// # Errors
    ///
    /// - Return [`StepError`] naming the step that failed.
    pub async fn run(&mut self, selection: Selection) -> Result<InstallReport, StepError> {
        let steps = selection.steps();
        let total = steps.len();

        for (index, step) in steps.iter().copied().enumerate() {
            info!("[{}/{total}] {}", index + 1, step.summary());
            self.execute(step)
                .await
                .map_err(|source| StepError { step, source })?;
            info!(status = "done", "{step}");
        }

        Ok(InstallReport {
            steps,
            url: format!("http://{}/", self.context.server_address()),
            admin_user: self.context.credentials.as_ref().map(|c| c.admin_user.clone()),
            backup_dir: self.context.backup_dir().map(Path::to_path_buf),
            record_path: self.context.record_path.clone(),
        })
    }

    /// Run one step.
    ///
    /// # Errors
    ///
    /// - Return [`InstallError`] describing why step failed.
    #[instrument(skip(self), level = "debug")]
    pub async fn execute(&mut self, step: Step) -> Result<()> {
        let host = &self.host;
        let ctx = &mut self.context;
        match step {
            Step::Preflight => preflight::run(host, ctx),
            Step::Credentials => collect_credentials(host, &mut self.prompter, ctx),
            Step::Secrets => record_secrets(ctx),
            Step::Packages => packages::run(host, ctx),
            Step::Database => database::run(host, ctx),
            Step::Download => {
                let settings = &ctx.settings.release;
                let release = Release::new(&settings.base_url, &settings.version);
                ctx.staged = Some(fetch_verified(&self.client, &release).await?);
                Ok(())
            }
            Step::Deploy => deploy::run(host, ctx),
            Step::WebServer => webserver::run(host, ctx),
            Step::Php => php::run(host, ctx),
            Step::Setup => occ::setup(host, ctx),
            Step::Configure => occ::configure(host, ctx),
            Step::Firewall => firewall::run(host, ctx),
            Step::Cleanup => cleanup(ctx),
        }
    }
}

fn collect_credentials(
    host: &impl Host,
    prompter: &mut impl Prompter,
    ctx: &mut InstallContext,
) -> Result<()> {
    if ctx.credentials.is_some() {
        info!("use previously recorded credentials");
    } else {
        let default_admin = &ctx.settings.nextcloud.default_admin;
        let (user, password) = credentials::collect(prompter, default_admin)?;
        ctx.credentials = Some(CredentialSet::new(
            user,
            password,
            &ctx.settings.database.name,
            &ctx.settings.database.user,
        ));
    }

    for path in ctx.managed_config_files() {
        ctx.preserve(host, &path)?;
    }

    Ok(())
}

fn record_secrets(ctx: &mut InstallContext) -> Result<()> {
    let credentials = ctx.credentials.as_mut().ok_or(InstallError::MissingState {
        what: "credentials",
        step: Step::Credentials,
    })?;
    credentials.fill_missing_secrets()?;
    let record = credentials.record()?;

    let path = ctx.backup()?.record_path();
    record.write(&path)?;
    ctx.record_path = Some(path);

    Ok(())
}

fn cleanup(ctx: &mut InstallContext) -> Result<()> {
    match ctx.staged.take() {
        Some(staged) => {
            info!("remove {}", staged.workdir().display());
            staged.close()?;
        }
        None => info!("nothing to clean up"),
    }

    Ok(())
}

/// Step failure.
#[derive(Debug, thiserror::Error)]
#[error("step {step} failed")]
pub struct StepError {
    pub step: Step,

    #[source]
    pub source: InstallError,
}

impl StepError {
    /// Step that a later run should resume from once the failure is fixed.
    ///
    /// Returns `None` when there is nothing worth resuming: steps before any
    /// host change simply start over, and a failed cleanup leaves a finished
    /// install behind.
    pub fn resume_step(&self) -> Option<Step> {
        // INVARIANT: Staged release only lives in memory of the run that
        // downloaded it.
        match (self.step, &self.source) {
            (Step::Preflight | Step::Credentials | Step::Secrets | Step::Cleanup, _) => None,
            (_, InstallError::MissingState { step: Step::Download, .. }) => Some(Step::Download),
            (Step::Deploy, _) => Some(Step::Download),
            (step, _) => Some(step),
        }
    }
}

/// Installation error types.
#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// Host is not fit for installation.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// State produced by an earlier step is missing.
    #[error("{what} not available, run step {step} first")]
    MissingState { what: &'static str, step: Step },

    /// Firewall is required by policy but not installed.
    #[error("firewall policy requires ufw, but it is not installed")]
    FirewallMissing,

    /// Value cannot be handed to an external tool safely.
    #[error("refusing to use {field} = {value:?}")]
    Unsafe { field: &'static str, value: String },

    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Host(#[from] HostError),

    #[error(transparent)]
    Backup(#[from] BackupError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Render(#[from] RenderError),
}

/// Friendly result alias :3
pub type Result<T, E = InstallError> = std::result::Result<T, E>;
