// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{client, published_digest, release_zip, scratch_settings, RecordingHost, ReleaseServer};

use anyhow::Result;
use oxicloud::{
    config::{FirewallPolicy, InstallSettings},
    install::{InstallError, StepError},
    prompt::ScriptedPrompter,
    InstallContext, InstallReport, Installer, Selection, Step,
};
use pretty_assertions::assert_eq;

async fn run_only(
    host: RecordingHost,
    settings: InstallSettings,
    step: Step,
) -> Result<(Installer<RecordingHost, ScriptedPrompter>, Result<InstallReport, StepError>)> {
    let context = InstallContext::new(settings);
    let mut installer = Installer::new(host, ScriptedPrompter::default(), client()?, context);
    let result = installer.run(Selection::Only(step)).await;
    Ok((installer, result))
}

#[tokio::test]
async fn preflight_refuses_root() -> Result<()> {
    let backups = tempfile::tempdir()?;
    let (installer, result) =
        run_only(RecordingHost::new().as_root(), scratch_settings(&backups), Step::Packages).await?;

    let error = result.expect_err("preflight to fail");
    assert_eq!(error.step, Step::Preflight);
    assert!(matches!(error.source, InstallError::Precondition(_)));
    assert!(installer.host().commands().is_empty());

    Ok(())
}

#[tokio::test]
async fn preflight_requires_package_manager() -> Result<()> {
    let backups = tempfile::tempdir()?;
    let host = RecordingHost::new().without_program("apt-get");
    let (_, result) = run_only(host, scratch_settings(&backups), Step::Packages).await?;

    let error = result.expect_err("preflight to fail");
    assert_eq!(error.step, Step::Preflight);
    assert!(matches!(
        error.source,
        InstallError::Precondition(ref message) if message.contains("apt-get")
    ));

    Ok(())
}

#[tokio::test]
async fn server_address_prefers_configured_name() -> Result<()> {
    let backups = tempfile::tempdir()?;
    let mut settings = scratch_settings(&backups);
    settings.site.server_name = Some("cloud.example.org".into());
    let (installer, result) = run_only(RecordingHost::new(), settings, Step::Preflight).await?;

    assert_eq!(result?.url, "http://cloud.example.org/");
    assert_eq!(installer.host().position("hostname"), None);

    Ok(())
}

#[tokio::test]
async fn server_address_falls_back_to_localhost() -> Result<()> {
    let backups = tempfile::tempdir()?;
    let host = RecordingHost::new().failing_on("hostname");
    let (_, result) = run_only(host, scratch_settings(&backups), Step::Preflight).await?;

    assert_eq!(result?.url, "http://localhost/");

    Ok(())
}

#[tokio::test]
async fn credentials_reprompt_until_valid() -> Result<()> {
    let backups = tempfile::tempdir()?;
    let prompter = ScriptedPrompter::new([
        "",
        "short",
        "Sup3rSecret!",
        "Sup3rSecret?",
        "Sup3rSecret!",
        "Sup3rSecret!",
    ]);
    let mut installer = Installer::new(
        RecordingHost::new(),
        prompter,
        client()?,
        InstallContext::new(scratch_settings(&backups)),
    );

    let report = installer.run(Selection::Only(Step::Credentials)).await?;
    assert_eq!(report.admin_user.as_deref(), Some("admin"));
    assert_eq!(report.record_path, None);
    assert_eq!(
        installer.prompter().asked(),
        [
            "Nextcloud admin username",
            "Nextcloud admin password",
            "Nextcloud admin password",
            "Confirm admin password",
            "Nextcloud admin password",
            "Confirm admin password",
        ]
    );
    assert_eq!(installer.prompter().remaining(), 0);

    Ok(())
}

#[tokio::test]
async fn credentials_step_preserves_existing_configuration() -> Result<()> {
    let backups = tempfile::tempdir()?;
    let host = RecordingHost::new()
        .with_existing("/etc/apache2/sites-available/nextcloud.conf")
        .with_existing("/var/www/nextcloud/config/config.php");
    let prompter = ScriptedPrompter::new(["admin", "Sup3rSecret!", "Sup3rSecret!"]);
    let context = InstallContext::new(scratch_settings(&backups));
    let mut installer = Installer::new(host, prompter, client()?, context);

    let report = installer.run(Selection::Only(Step::Credentials)).await?;
    let backup = report.backup_dir.expect("backup directory to exist");
    assert!(backup.starts_with(backups.path()));

    let copies = installer
        .host()
        .commands()
        .into_iter()
        .filter(|command| command.starts_with("sudo cp -p"))
        .collect::<Vec<_>>();
    assert_eq!(
        copies,
        [
            format!(
                "sudo cp -p /etc/apache2/sites-available/nextcloud.conf {}",
                backup.join("etc_apache2_sites-available_nextcloud.conf").display()
            ),
            format!(
                "sudo cp -p /var/www/nextcloud/config/config.php {}",
                backup.join("var_www_nextcloud_config_config.php").display()
            ),
        ]
    );

    Ok(())
}

#[tokio::test]
async fn deploy_normalizes_ownership_and_modes() -> Result<()> {
    let backups = tempfile::tempdir()?;
    let archive = release_zip()?;
    let digest = published_digest(&archive);
    let server = ReleaseServer::start(archive, digest).await?;

    let mut settings = scratch_settings(&backups);
    settings.release.base_url = server.base_url();
    let host = RecordingHost::new().with_existing("/var/www/nextcloud");
    let context = InstallContext::new(settings);
    let mut installer = Installer::new(host, ScriptedPrompter::default(), client()?, context);

    installer.run(Selection::Only(Step::Download)).await?;
    let staged = installer.host().commands().len();
    installer.run(Selection::Only(Step::Deploy)).await?;

    let tree = installer
        .context()
        .staged_tree()
        .expect("release to stay staged until cleanup");
    let expect = vec![
        "hostname -I".to_string(),
        "sudo rm -rf /var/www/nextcloud".to_string(),
        "sudo mkdir -p /var/www".to_string(),
        format!("sudo mv {} /var/www/nextcloud", tree.display()),
        "sudo install -d -o www-data -g www-data -m 750 /var/nextcloud-data".to_string(),
        "sudo chown -R www-data:www-data /var/www/nextcloud".to_string(),
        "sudo find /var/www/nextcloud -type d -exec chmod 750 {} +".to_string(),
        "sudo find /var/www/nextcloud -type f -exec chmod 640 {} +".to_string(),
    ];
    assert_eq!(installer.host().commands()[staged..].to_vec(), expect);

    Ok(())
}

#[tokio::test]
async fn deploy_skips_removal_on_fresh_host() -> Result<()> {
    let backups = tempfile::tempdir()?;
    let archive = release_zip()?;
    let digest = published_digest(&archive);
    let server = ReleaseServer::start(archive, digest).await?;

    let mut settings = scratch_settings(&backups);
    settings.release.base_url = server.base_url();
    let context = InstallContext::new(settings);
    let mut installer =
        Installer::new(RecordingHost::new(), ScriptedPrompter::default(), client()?, context);

    installer.run(Selection::Only(Step::Download)).await?;
    installer.run(Selection::Only(Step::Deploy)).await?;

    let host = installer.host();
    assert_eq!(host.position("rm -rf"), None);
    let mkdir = host.position("mkdir -p /var/www").expect("parent created");
    let mv = host.position("mv ").expect("release moved");
    assert!(mkdir < mv);

    Ok(())
}

#[tokio::test]
async fn web_server_backs_up_site_before_overwrite() -> Result<()> {
    let backups = tempfile::tempdir()?;
    let host = RecordingHost::new()
        .with_existing("/etc/apache2/sites-available/nextcloud.conf")
        .with_existing("/etc/apache2/sites-enabled/000-default.conf");
    let (installer, result) = run_only(host, scratch_settings(&backups), Step::WebServer).await?;
    result?;

    let host = installer.host();
    let backup = host
        .position("cp -p /etc/apache2/sites-available/nextcloud.conf")
        .expect("site to be preserved");
    let write = host.position("install -D -m 644").expect("site to be written");
    assert!(backup < write);

    let enable = host.position("a2enmod rewrite headers env dir mime").expect("modules enabled");
    let site = host.position("a2ensite nextcloud.conf").expect("site enabled");
    let default = host.position("a2dissite 000-default").expect("default site disabled");
    let restart = host.position("systemctl restart apache2").expect("apache restarted");
    assert!(write < enable && enable < site && site < default && default < restart);

    Ok(())
}

#[tokio::test]
async fn web_server_leaves_missing_default_site_alone() -> Result<()> {
    let backups = tempfile::tempdir()?;
    let (installer, result) =
        run_only(RecordingHost::new(), scratch_settings(&backups), Step::WebServer).await?;
    result?;

    assert_eq!(installer.host().position("a2dissite"), None);
    assert_eq!(installer.host().position("cp -p"), None);

    Ok(())
}

#[tokio::test]
async fn php_overrides_both_runtimes() -> Result<()> {
    let backups = tempfile::tempdir()?;
    let (installer, result) =
        run_only(RecordingHost::new(), scratch_settings(&backups), Step::Php).await?;
    result?;

    let host = installer.host();
    let apache = host.position("/etc/php/8.2/apache2/conf.d/90-nextcloud.ini").expect("apache ini");
    let cli = host.position("/etc/php/8.2/cli/conf.d/90-nextcloud.ini").expect("cli ini");
    let restart = host.position("systemctl restart apache2").expect("apache restarted");
    assert!(apache < cli && cli < restart);

    Ok(())
}

#[tokio::test]
async fn configure_trusts_domains_and_schedules_cron() -> Result<()> {
    let backups = tempfile::tempdir()?;
    let mut settings = scratch_settings(&backups);
    settings.site.server_name = Some("cloud.example.org".into());
    settings.nextcloud.trusted_domains = vec!["192.168.1.20".into()];
    let (installer, result) = run_only(RecordingHost::new(), settings, Step::Configure).await?;
    result?;

    let occ = "sudo -u www-data php /var/www/nextcloud/occ";
    let expect = vec![
        format!("{occ} config:system:set trusted_domains 1 --value=cloud.example.org"),
        format!("{occ} config:system:set trusted_domains 2 --value=192.168.1.20"),
        format!("{occ} config:system:set memcache.local --value=\\OC\\Memcache\\APCu"),
        format!("{occ} config:system:set default_phone_region --value=US"),
        format!("{occ} config:system:set default_locale --value=en_US"),
        format!("{occ} background:cron"),
        "sudo crontab -u www-data -".to_string(),
    ];
    assert_eq!(installer.host().commands(), expect);
    assert_eq!(
        installer.host().stdin_of("crontab"),
        ["*/5 * * * * php -f /var/www/nextcloud/cron.php\n"]
    );

    Ok(())
}

#[tokio::test]
async fn configure_rejects_odd_trusted_domain() -> Result<()> {
    let backups = tempfile::tempdir()?;
    let mut settings = scratch_settings(&backups);
    settings.nextcloud.trusted_domains = vec!["evil.example.org --value=x".into()];
    let (_, result) = run_only(RecordingHost::new(), settings, Step::Configure).await?;

    let error = result.expect_err("configure to fail");
    assert_eq!(error.step, Step::Configure);
    assert!(matches!(error.source, InstallError::Render(_)));

    Ok(())
}

#[tokio::test]
async fn firewall_best_effort_tolerates_missing_ufw() -> Result<()> {
    let backups = tempfile::tempdir()?;
    let (installer, result) =
        run_only(RecordingHost::new(), scratch_settings(&backups), Step::Firewall).await?;
    result?;

    assert_eq!(installer.host().position("ufw"), None);

    Ok(())
}

#[tokio::test]
async fn firewall_required_fails_without_ufw() -> Result<()> {
    let backups = tempfile::tempdir()?;
    let mut settings = scratch_settings(&backups);
    settings.firewall.policy = FirewallPolicy::Required;
    let (_, result) = run_only(RecordingHost::new(), settings, Step::Firewall).await?;

    let error = result.expect_err("firewall to fail");
    assert_eq!(error.step, Step::Firewall);
    assert!(matches!(error.source, InstallError::FirewallMissing));

    Ok(())
}

#[tokio::test]
async fn firewall_skip_leaves_ufw_alone() -> Result<()> {
    let backups = tempfile::tempdir()?;
    let mut settings = scratch_settings(&backups);
    settings.firewall.policy = FirewallPolicy::Skip;
    let host = RecordingHost::new().with_program("ufw");
    let (installer, result) = run_only(host, settings, Step::Firewall).await?;
    result?;

    assert_eq!(installer.host().position("ufw"), None);

    Ok(())
}

#[tokio::test]
async fn failing_command_stops_run() -> Result<()> {
    let backups = tempfile::tempdir()?;
    let host = RecordingHost::new().failing_on("apt-get");
    let mut installer = Installer::new(
        host,
        ScriptedPrompter::default(),
        client()?,
        InstallContext::new(scratch_settings(&backups)),
    );

    let error = installer
        .run(Selection::From(Step::Packages))
        .await
        .expect_err("packages to fail");
    assert_eq!(error.step, Step::Packages);
    assert!(matches!(error.source, InstallError::Host(_)));
    assert_eq!(installer.host().position("mysql"), None);

    Ok(())
}
