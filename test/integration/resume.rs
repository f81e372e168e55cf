// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{client, scratch_settings, RecordingHost};

use anyhow::Result;
use oxicloud::{
    credentials::{CredentialRecord, CredentialSet, Secret},
    install::InstallError,
    prompt::ScriptedPrompter,
    InstallContext, Installer, Selection, Step,
};
use pretty_assertions::assert_eq;

fn record() -> CredentialRecord {
    CredentialRecord {
        admin_user: "admin".into(),
        admin_password: Secret::new("Sup3rSecret!"),
        db_name: "nextcloud".into(),
        db_user: "nextcloud".into(),
        db_password: Secret::new("dbPassw0rd12"),
        root_password: Secret::new("r00tPassw0rd"),
    }
}

#[tokio::test]
async fn resume_without_credentials_names_missing_step() -> Result<()> {
    let backups = tempfile::tempdir()?;
    let mut installer = Installer::new(
        RecordingHost::new(),
        ScriptedPrompter::default(),
        client()?,
        InstallContext::new(scratch_settings(&backups)),
    );

    let error = installer
        .run(Selection::From(Step::Database))
        .await
        .expect_err("database step to fail");
    assert_eq!(error.step, Step::Database);
    assert!(matches!(
        error.source,
        InstallError::MissingState {
            step: Step::Credentials,
            ..
        }
    ));
    assert_eq!(installer.host().position("sudo mysql"), None);

    Ok(())
}

#[tokio::test]
async fn resume_with_record_reuses_its_secrets() -> Result<()> {
    let backups = tempfile::tempdir()?;
    let path = backups.path().join("credentials.txt");
    record().write(&path)?;

    let credentials = CredentialSet::from(CredentialRecord::read(&path)?);
    let context = InstallContext::new(scratch_settings(&backups)).with_credentials(credentials);
    let mut installer =
        Installer::new(RecordingHost::new(), ScriptedPrompter::default(), client()?, context);

    let report = installer.run(Selection::Only(Step::Database)).await?;
    assert_eq!(report.steps, vec![Step::Preflight, Step::Database]);

    let sql = installer.host().stdin_of("mysql");
    assert!(sql[0].contains("USING PASSWORD('r00tPassw0rd')"));
    assert!(sql[1].contains("IDENTIFIED BY 'dbPassw0rd12'"));

    Ok(())
}

#[tokio::test]
async fn preloaded_credentials_skip_prompting() -> Result<()> {
    let backups = tempfile::tempdir()?;
    let context = InstallContext::new(scratch_settings(&backups)).with_credentials(record().into());
    let mut installer =
        Installer::new(RecordingHost::new(), ScriptedPrompter::default(), client()?, context);

    let report = installer.run(Selection::Only(Step::Secrets)).await?;
    assert!(installer.prompter().asked().is_empty());

    // Recorded secrets survive, nothing gets regenerated.
    let path = report.record_path.expect("record to be written");
    assert_eq!(CredentialRecord::read(path)?, record());

    Ok(())
}

#[tokio::test]
async fn deploy_without_download_names_missing_step() -> Result<()> {
    let backups = tempfile::tempdir()?;
    let mut installer = Installer::new(
        RecordingHost::new(),
        ScriptedPrompter::default(),
        client()?,
        InstallContext::new(scratch_settings(&backups)),
    );

    let error = installer
        .run(Selection::Only(Step::Deploy))
        .await
        .expect_err("deploy step to fail");
    assert_eq!(error.step, Step::Deploy);
    assert!(matches!(
        error.source,
        InstallError::MissingState {
            step: Step::Download,
            ..
        }
    ));
    assert_eq!(installer.host().position("rm -rf"), None);

    Ok(())
}
