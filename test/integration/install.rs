// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{client, published_digest, release_zip, scratch_settings, RecordingHost, ReleaseServer};

use anyhow::Result;
use oxicloud::{
    artifact::ArtifactError,
    credentials::{CredentialRecord, SECRET_LEN},
    install::InstallError,
    prompt::ScriptedPrompter,
    InstallContext, Installer, Selection, Step,
};
use pretty_assertions::assert_eq;
use std::{fs::read_to_string, os::unix::fs::PermissionsExt, path::PathBuf};

#[tokio::test]
async fn fresh_host_gets_full_install() -> Result<()> {
    let backups = tempfile::tempdir()?;
    let archive = release_zip()?;
    let digest = published_digest(&archive);
    let server = ReleaseServer::start(archive, digest).await?;

    let mut settings = scratch_settings(&backups);
    settings.release.base_url = server.base_url();
    let host = RecordingHost::new().with_program("ufw");
    let prompter = ScriptedPrompter::new(["admin", "Sup3rSecret!", "Sup3rSecret!"]);
    let mut installer = Installer::new(host, prompter, client()?, InstallContext::new(settings));

    let report = installer.run(Selection::All).await?;
    assert_eq!(report.steps, Step::ALL.to_vec());
    assert_eq!(report.url, "http://192.168.1.20/");
    assert_eq!(report.admin_user.as_deref(), Some("admin"));
    assert_eq!(installer.prompter().remaining(), 0);

    // Credential record is private, complete, and holds two distinct secrets.
    let record_path = report.record_path.clone().expect("record to be written");
    assert!(record_path.starts_with(backups.path()));
    assert_eq!(std::fs::metadata(&record_path)?.permissions().mode() & 0o777, 0o600);
    let content = read_to_string(&record_path)?;
    assert_eq!(content.lines().count(), 6);
    assert!(content.contains("Nextcloud Admin User: admin\n"));
    assert!(content.contains("Nextcloud Admin Password: Sup3rSecret!\n"));
    let record = CredentialRecord::read(&record_path)?;
    assert_eq!(record.db_password.expose().len(), SECRET_LEN);
    assert_eq!(record.root_password.expose().len(), SECRET_LEN);
    assert_ne!(record.db_password, record.root_password);

    // Secrets go through stdin or get masked, never into a logged command line.
    let host = installer.host();
    for command in host.commands() {
        assert!(!command.contains("Sup3rSecret!"), "leaked in {command}");
        assert!(!command.contains(record.db_password.expose()), "leaked in {command}");
        assert!(!command.contains(record.root_password.expose()), "leaked in {command}");
    }
    let sql = host.stdin_of("mysql");
    assert_eq!(sql.len(), 2);
    assert!(sql[0].contains(record.root_password.expose()));
    assert!(sql[1].contains(record.db_password.expose()));

    // Steps ran in order.
    let order = [
        "apt-get install -y apache2",
        "sudo mysql",
        "mv ",
        "a2ensite nextcloud.conf",
        "/etc/php/8.2/cli/conf.d/90-nextcloud.ini",
        "maintenance:install",
        "background:cron",
        "ufw allow Apache Full",
    ]
    .map(|needle| host.position(needle).unwrap_or_else(|| panic!("{needle:?} not run")));
    assert!(order.windows(2).all(|pair| pair[0] < pair[1]), "out of order: {order:?}");
    assert!(host
        .commands()
        .iter()
        .any(|command| command.contains("--admin-user admin --admin-pass ****")));

    // Staged release was moved from a temporary tree that cleanup removed.
    let mv = host
        .calls()
        .into_iter()
        .find(|call| call.program() == "mv")
        .expect("deploy to move release");
    let staged = mv.arg_values().next().map(PathBuf::from).expect("source path");
    assert!(staged.ends_with("extract/nextcloud"));
    assert!(!staged.exists());

    Ok(())
}

#[tokio::test]
async fn checksum_mismatch_stops_before_deploy() -> Result<()> {
    let backups = tempfile::tempdir()?;
    let archive = release_zip()?;
    let digest = published_digest(b"some other archive");
    let server = ReleaseServer::start(archive, digest).await?;

    let mut settings = scratch_settings(&backups);
    settings.release.base_url = server.base_url();
    let prompter = ScriptedPrompter::new(["admin", "Sup3rSecret!", "Sup3rSecret!"]);
    let mut installer = Installer::new(
        RecordingHost::new(),
        prompter,
        client()?,
        InstallContext::new(settings),
    );

    let error = installer.run(Selection::All).await.expect_err("download to fail");
    assert_eq!(error.step, Step::Download);
    assert!(matches!(
        error.source,
        InstallError::Artifact(ArtifactError::ChecksumMismatch { .. })
    ));

    let host = installer.host();
    assert!(host.position("sudo mysql").is_some());
    assert_eq!(host.position("mv "), None);
    assert_eq!(host.position("/var/www/nextcloud"), None);

    Ok(())
}

#[tokio::test]
async fn missing_release_is_reported_by_status() -> Result<()> {
    let backups = tempfile::tempdir()?;
    let archive = release_zip()?;
    let digest = published_digest(&archive);
    let server = ReleaseServer::start(archive, digest).await?;

    let mut settings = scratch_settings(&backups);
    settings.release.base_url = server.base_url();
    settings.release.version = "30.0.0".into();
    let mut installer = Installer::new(
        RecordingHost::new(),
        ScriptedPrompter::default(),
        client()?,
        InstallContext::new(settings),
    );

    let error = installer
        .run(Selection::Only(Step::Download))
        .await
        .expect_err("download to fail");
    assert_eq!(error.step, Step::Download);
    assert!(matches!(
        error.source,
        InstallError::Artifact(ArtifactError::Status { status, .. }) if status.as_u16() == 404
    ));

    Ok(())
}
