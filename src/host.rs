// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! External command execution.
//!
//! Every installation step boils down to calling some external tool: the
//! package manager, the database client, Apache's site tools, Nextcloud's
//! `occ`, or ufw. A [`Syscall`] describes one such call, and a [`Host`]
//! executes it.
//!
//! # Privileges
//!
//! Oxicloud refuses to run as root. Commands that need elevated privileges
//! are marked as such, and [`SystemHost`] runs them through sudo. Commands
//! that must run as the web server user (Nextcloud's `occ`) go through
//! `sudo -u <user>`.
//!
//! # Secrets
//!
//! Arguments marked secret are masked when a command is displayed, so
//! command lines can be logged and reported in errors freely. Prefer passing
//! secrets through stdin where the tool allows it.

use std::{
    ffi::OsString,
    fmt::{Display, Formatter, Result as FmtResult},
    io::Write,
    path::Path,
    process::{Command, Stdio},
};
use tracing::{debug, instrument};

/// Who a command runs as.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub enum Privilege {
    /// Invoking user.
    #[default]
    Unprivileged,

    /// Superuser.
    Root,

    /// Named system user.
    User(String),
}

/// One argument of a command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Arg {
    value: OsString,
    secret: bool,
}

/// Description of one external command.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Syscall {
    program: String,
    args: Vec<Arg>,
    env: Vec<(String, String)>,
    stdin: Option<String>,
    privilege: Privilege,
    interactive: bool,
}

impl Syscall {
    /// Construct new unprivileged command.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            ..Default::default()
        }
    }

    /// Construct new command that runs as root.
    pub fn root(program: impl Into<String>) -> Self {
        Self::new(program).privilege(Privilege::Root)
    }

    /// Construct new command that runs as named user.
    pub fn as_user(user: impl Into<String>, program: impl Into<String>) -> Self {
        Self::new(program).privilege(Privilege::User(user.into()))
    }

    /// Set privilege to run with.
    pub fn privilege(mut self, privilege: Privilege) -> Self {
        self.privilege = privilege;
        self
    }

    /// Append an argument.
    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(Arg {
            value: arg.into(),
            secret: false,
        });
        self
    }

    /// Append several arguments.
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<OsString>>) -> Self {
        for arg in args {
            self = self.arg(arg);
        }
        self
    }

    /// Append an argument that is masked on display.
    pub fn secret_arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(Arg {
            value: arg.into(),
            secret: true,
        });
        self
    }

    /// Set environment variable for command.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Feed payload to command through stdin.
    pub fn stdin(mut self, payload: impl Into<String>) -> Self {
        self.stdin = Some(payload.into());
        self
    }

    /// Let command talk to the terminal directly instead of capturing its
    /// output.
    pub fn interactive(mut self) -> Self {
        self.interactive = true;
        self
    }

    /// Name of program to run.
    pub fn program(&self) -> &str {
        self.program.as_str()
    }

    /// Privilege command runs with.
    pub fn privilege_level(&self) -> &Privilege {
        &self.privilege
    }

    /// Payload fed through stdin, if any.
    pub fn stdin_payload(&self) -> Option<&str> {
        self.stdin.as_deref()
    }

    /// Unmasked argument list.
    pub fn arg_values(&self) -> impl Iterator<Item = &OsString> {
        self.args.iter().map(|arg| &arg.value)
    }

    /// Expand into the program and argument list that actually get executed.
    ///
    /// With `elevate` set, privileged commands are wrapped in sudo, and
    /// environment variables travel through `env` because sudo resets the
    /// environment. Without `elevate`, privilege is ignored.
    pub fn expand(&self, elevate: bool) -> (String, Vec<OsString>) {
        let wrap = elevate && self.privilege != Privilege::Unprivileged;
        if !wrap {
            let args = self.args.iter().map(|arg| arg.value.clone()).collect();
            return (self.program.clone(), args);
        }

        let mut args: Vec<OsString> = Vec::new();
        if let Privilege::User(user) = &self.privilege {
            args.extend(["-u".into(), user.into()]);
        }

        if !self.env.is_empty() {
            args.push("env".into());
            args.extend(self.env.iter().map(|(k, v)| OsString::from(format!("{k}={v}"))));
        }

        args.push(self.program.as_str().into());
        args.extend(self.args.iter().map(|arg| arg.value.clone()));

        ("sudo".into(), args)
    }
}

impl Display for Syscall {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match &self.privilege {
            Privilege::Unprivileged => {}
            Privilege::Root => fmt.write_str("sudo ")?,
            Privilege::User(user) => write!(fmt, "sudo -u {user} ")?,
        }

        for (key, value) in &self.env {
            write!(fmt, "{key}={value} ")?;
        }

        fmt.write_str(&self.program)?;
        for arg in &self.args {
            if arg.secret {
                fmt.write_str(" ****")?;
            } else {
                write!(fmt, " {}", arg.value.to_string_lossy())?;
            }
        }

        Ok(())
    }
}

/// Executor of external commands.
pub trait Host {
    /// Run command to completion.
    ///
    /// Returns captured output, or an empty string for interactive commands.
    fn run(&self, syscall: &Syscall) -> Result<String>;

    /// Check if program can be found on `PATH`.
    fn has_program(&self, program: &str) -> bool;

    /// Check if current process runs with superuser privileges.
    fn is_root(&self) -> bool;

    /// Check if path exists, even where the invoking user cannot look.
    fn exists(&self, path: &Path) -> bool;
}

/// Host that executes commands on the running system.
#[derive(Debug, Clone)]
pub struct SystemHost {
    elevate: bool,
}

impl SystemHost {
    /// Construct new system host.
    ///
    /// Privileged commands are run through sudo when `elevate` is set, and
    /// directly otherwise.
    pub fn new(elevate: bool) -> Self {
        Self { elevate }
    }
}

impl Default for SystemHost {
    fn default() -> Self {
        Self::new(true)
    }
}

impl Host for SystemHost {
    #[instrument(skip(self, syscall), level = "debug")]
    fn run(&self, syscall: &Syscall) -> Result<String> {
        debug!("run {syscall}");
        let (program, args) = syscall.expand(self.elevate);
        let mut command = Command::new(&program);
        command.args(&args);
        if !(self.elevate && syscall.privilege != Privilege::Unprivileged) {
            command.envs(syscall.env.iter().map(|(k, v)| (k, v)));
        }

        if syscall.interactive {
            syscall_interactive(syscall, command)
        } else {
            syscall_non_interactive(syscall, command)
        }
    }

    fn has_program(&self, program: &str) -> bool {
        if which::which(program).is_ok() {
            return true;
        }

        // INVARIANT: Debian leaves sbin off the PATH of regular users.
        ["/usr/sbin", "/sbin"]
            .iter()
            .any(|dir| Path::new(dir).join(program).is_file())
    }

    fn is_root(&self) -> bool {
        nix::unistd::geteuid().is_root()
    }

    fn exists(&self, path: &Path) -> bool {
        if path.exists() {
            return true;
        }

        // INVARIANT: Only ask root when we might lack permission to look.
        self.elevate
            && self
                .run(&Syscall::root("test").arg("-e").arg(path))
                .is_ok()
    }
}

fn syscall_interactive(syscall: &Syscall, mut command: Command) -> Result<String> {
    if syscall.stdin.is_some() {
        command.stdin(Stdio::piped());
    }

    let mut child = command.spawn().map_err(|source| spawn_error(syscall, source))?;
    let unfed = feed_stdin(syscall, &mut child);
    let status = child.wait().map_err(|source| spawn_error(syscall, source))?;
    if !status.success() {
        return Err(HostError::Syscall {
            command: syscall.to_string(),
            message: format!("exited with {status}"),
        });
    }

    if let Some(source) = unfed {
        return Err(spawn_error(syscall, source));
    }

    Ok(String::new())
}

fn syscall_non_interactive(syscall: &Syscall, mut command: Command) -> Result<String> {
    command
        .stdin(if syscall.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

    let mut child = command.spawn().map_err(|source| spawn_error(syscall, source))?;
    let unfed = feed_stdin(syscall, &mut child);
    let output = child
        .wait_with_output()
        .map_err(|source| spawn_error(syscall, source))?;
    let stdout = String::from_utf8_lossy(output.stdout.as_slice()).into_owned();
    let stderr = String::from_utf8_lossy(output.stderr.as_slice()).into_owned();

    if !output.status.success() {
        let mut message = format!("exited with {}", output.status);
        for (name, stream) in [("stdout", &stdout), ("stderr", &stderr)] {
            if !stream.trim().is_empty() {
                message.push_str(format!("\n{name}: {}", stream.trim_end()).as_str());
            }
        }

        return Err(HostError::Syscall {
            command: syscall.to_string(),
            message,
        });
    }

    if let Some(source) = unfed {
        return Err(spawn_error(syscall, source));
    }

    // INVARIANT: Chomp trailing newlines.
    let stdout = stdout
        .strip_suffix("\r\n")
        .or(stdout.strip_suffix('\n'))
        .map(ToString::to_string)
        .unwrap_or(stdout);

    Ok(stdout)
}

/// Write payload to child's stdin, handing back any write failure.
///
/// Caller still waits on child, and reports its exit status first.
fn feed_stdin(syscall: &Syscall, child: &mut std::process::Child) -> Option<std::io::Error> {
    let payload = syscall.stdin.as_ref()?;

    // INVARIANT: Drop stdin handle after writing so the child sees EOF.
    let Some(mut stdin) = child.stdin.take() else {
        return Some(std::io::Error::other("stdin is not available"));
    };

    stdin.write_all(payload.as_bytes()).err()
}

fn spawn_error(syscall: &Syscall, source: std::io::Error) -> HostError {
    HostError::Spawn {
        command: syscall.to_string(),
        source,
    }
}

/// Place file with given contents at destination as root.
///
/// Contents are written to a private temporary file first, then copied into
/// place by `install`, which sets mode and ownership in one go.
///
/// # Errors
///
/// - Return [`HostError::Staging`] if temporary file cannot be written.
/// - Return [`HostError::Syscall`] if `install` fails.
#[instrument(skip(host, contents), level = "debug")]
pub fn install_file(host: &impl Host, contents: &str, dest: &Path, mode: u32) -> Result<()> {
    let mut staged = tempfile::NamedTempFile::new().map_err(HostError::Staging)?;
    staged
        .write_all(contents.as_bytes())
        .map_err(HostError::Staging)?;
    staged.flush().map_err(HostError::Staging)?;

    host.run(
        &Syscall::root("install")
            .args(["-D", "-m", format!("{mode:o}").as_str()])
            .arg(staged.path())
            .arg(dest),
    )?;

    Ok(())
}

/// External command error types.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Command could not be started.
    #[error("failed to run {command:?}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// Command ran but failed.
    #[error("command {command:?} failed: {message}")]
    Syscall { command: String, message: String },

    /// Temporary file for staged content cannot be written.
    #[error("failed to stage file content")]
    Staging(#[source] std::io::Error),
}

/// Friendly result alias :3
pub type Result<T, E = HostError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::fs::read_to_string;

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn display_masks_secrets() {
        let syscall = Syscall::as_user("www-data", "php")
            .args(["occ", "maintenance:install", "--admin-pass"])
            .secret_arg("Sup3rSecret!");
        assert_eq!(
            syscall.to_string(),
            "sudo -u www-data php occ maintenance:install --admin-pass ****"
        );
    }

    #[test]
    fn expand_wraps_privileged_commands_in_sudo() {
        let syscall = Syscall::root("apt-get")
            .env("DEBIAN_FRONTEND", "noninteractive")
            .args(["install", "-y", "apache2"]);
        let (program, args) = syscall.expand(true);
        assert_eq!(program, "sudo");
        assert_eq!(
            strings(args),
            ["env", "DEBIAN_FRONTEND=noninteractive", "apt-get", "install", "-y", "apache2"]
        );

        let (program, args) = syscall.expand(false);
        assert_eq!(program, "apt-get");
        assert_eq!(strings(args), ["install", "-y", "apache2"]);
    }

    #[test]
    fn expand_runs_as_named_user() {
        let (program, args) = Syscall::as_user("www-data", "php").arg("occ").expand(true);
        assert_eq!(program, "sudo");
        assert_eq!(strings(args), ["-u", "www-data", "php", "occ"]);
    }

    #[test]
    fn unprivileged_commands_are_never_wrapped() {
        let (program, args) = Syscall::new("hostname").arg("-I").expand(true);
        assert_eq!(program, "hostname");
        assert_eq!(strings(args), ["-I"]);
    }

    #[test]
    fn system_host_captures_output_and_stdin() -> anyhow::Result<()> {
        let host = SystemHost::new(false);
        let output = host.run(&Syscall::new("cat").stdin("hello\n"))?;
        assert_eq!(output, "hello");
        Ok(())
    }

    #[test]
    fn system_host_reports_child_that_ignores_stdin() {
        let host = SystemHost::new(false);
        let payload = "SELECT 1;\n".repeat(200_000);
        let result = host.run(
            &Syscall::new("sh")
                .args(["-c", "echo access denied >&2; exit 3"])
                .stdin(payload),
        );
        assert!(matches!(
            result,
            Err(HostError::Syscall { ref message, .. }) if message.contains("stderr: access denied")
        ));
    }

    #[test]
    fn system_host_reports_failure() {
        let host = SystemHost::new(false);
        let result = host.run(&Syscall::new("false"));
        assert!(matches!(result, Err(HostError::Syscall { command, .. }) if command == "false"));
    }

    #[test]
    fn install_file_places_content_with_mode() -> anyhow::Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir()?;
        let dest = dir.path().join("nested").join("site.conf");
        install_file(&SystemHost::new(false), "Listen 80\n", &dest, 0o644)?;

        assert_eq!(read_to_string(&dest)?, "Listen 80\n");
        assert_eq!(std::fs::metadata(&dest)?.permissions().mode() & 0o777, 0o644);

        Ok(())
    }
}
