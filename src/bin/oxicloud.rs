// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use oxicloud::{
    config::InstallSettings,
    credentials::{CredentialRecord, CredentialSet},
    host::SystemHost,
    install::StepError,
    path::default_settings_path,
    prompt::InquirePrompter,
    InstallContext, Installer, Selection, Step,
};

use anyhow::{Context, Result};
use clap::Parser;
use std::{path::PathBuf, process::exit, time::Duration};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Install Nextcloud on a Debian based single-board computer.
#[derive(Debug, Clone, Parser)]
#[command(about, long_about, version)]
struct Cli {
    /// Path to installation settings file.
    #[arg(short, long, value_name = "path")]
    pub config: Option<PathBuf>,

    /// Resume installation at step, running it and every step after it.
    #[arg(long, value_name = "step", conflicts_with = "only")]
    pub from: Option<Step>,

    /// Run a single step alone.
    #[arg(long, value_name = "step")]
    pub only: Option<Step>,

    /// Reuse credential record written by an earlier run.
    #[arg(long, value_name = "record")]
    pub credentials: Option<PathBuf>,

    /// List installation steps in order and exit.
    #[arg(long, conflicts_with_all = ["from", "only", "print_config"])]
    pub list_steps: bool,

    /// Print effective installation settings and exit.
    #[arg(long, conflicts_with_all = ["from", "only"])]
    pub print_config: bool,
}

impl Cli {
    fn selection(&self) -> Selection {
        match (self.from, self.only) {
            (Some(step), _) => Selection::From(step),
            (_, Some(step)) => Selection::Only(step),
            _ => Selection::All,
        }
    }

    async fn run(self) -> Result<()> {
        if self.list_steps {
            for (index, step) in Step::ALL.iter().enumerate() {
                println!("{:>2}. {:<12} {}", index + 1, step.name(), step.summary());
            }
            return Ok(());
        }

        let fallback = default_settings_path().ok();
        let settings =
            InstallSettings::load_or_default(self.config.as_deref(), fallback.as_deref())?;
        settings.validate()?;
        if self.print_config {
            print!("{settings}");
            return Ok(());
        }

        let mut context = InstallContext::new(settings);
        if let Some(path) = &self.credentials {
            let record = CredentialRecord::read(path)?;
            info!("reuse credentials from {}", path.display());
            context = context.with_credentials(CredentialSet::from(record));
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("oxicloud/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .context("failed to build http client")?;

        let selection = self.selection();
        let host = SystemHost::default();
        let mut installer = Installer::new(host, InquirePrompter::new(), client, context);
        match installer.run(selection).await {
            Ok(report) => {
                for line in report.to_string().lines() {
                    info!(status = "done", "{line}");
                }
                Ok(())
            }
            Err(error) => {
                let hint = resume_hint(&error);
                Err(anyhow::Error::new(error).context(hint))
            }
        }
    }
}

fn resume_hint(error: &StepError) -> String {
    match error.resume_step() {
        Some(step) => format!(
            "installation stopped at {failed}, once fixed resume with \
             `oxicloud --from {step} --credentials <record>`",
            failed = error.step,
        ),
        None if error.step == Step::Cleanup => {
            "installation finished, but downloaded release was not removed".to_string()
        }
        None => "installation stopped early, run oxicloud again once fixed".to_string(),
    }
}

#[tokio::main]
async fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = run().await {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

async fn run() -> Result<()> {
    Cli::parse().run().await
}
