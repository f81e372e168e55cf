// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Release artifact download and verification.
//!
//! Nextcloud publishes every release as a zip archive next to a digest file
//! holding its SHA-256 checksum:
//!
//! ```text
//! https://download.nextcloud.com/server/releases/nextcloud-29.0.4.zip
//! https://download.nextcloud.com/server/releases/nextcloud-29.0.4.zip.sha256
//! ```
//!
//! Both are fetched fresh into a private working directory on every run. The
//! archive is only extracted once its digest matches the published one, and
//! it is only ever extracted into that working directory. Moving the tree to
//! its final location is left to the deploy step, so a bad download can never
//! leave a half-extracted tree where Apache would serve it.

use futures::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use sha2::{Digest, Sha256};
use std::{
    fs::File,
    io::{BufReader, Read},
    path::{Path, PathBuf},
    time::Duration,
};
use tempfile::TempDir;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, instrument};

/// A specific, immutable Nextcloud release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Release {
    base_url: String,
    version: String,
}

impl Release {
    /// Construct new release description.
    pub fn new(base_url: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            version: version.into(),
        }
    }

    /// Release version.
    pub fn version(&self) -> &str {
        self.version.as_str()
    }

    /// File name of release archive.
    pub fn archive_name(&self) -> String {
        format!("nextcloud-{}.zip", self.version)
    }

    /// URL of release archive.
    pub fn archive_url(&self) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), self.archive_name())
    }

    /// URL of published digest of release archive.
    pub fn digest_url(&self) -> String {
        format!("{}.sha256", self.archive_url())
    }
}

/// Verified release extracted into a private working directory.
///
/// Dropping the staged release deletes the archive, its digest, and whatever
/// is left of the extracted tree.
#[derive(Debug)]
pub struct StagedRelease {
    workdir: TempDir,
    tree: PathBuf,
}

impl StagedRelease {
    /// Extracted top-level `nextcloud` directory.
    pub fn tree(&self) -> &Path {
        self.tree.as_path()
    }

    /// Private working directory.
    pub fn workdir(&self) -> &Path {
        self.workdir.path()
    }

    /// Delete working directory and everything in it.
    ///
    /// # Errors
    ///
    /// - Return [`ArtifactError::Io`] if deletion fails.
    pub fn close(self) -> Result<()> {
        let path = self.workdir.path().to_path_buf();
        self.workdir
            .close()
            .map_err(|source| ArtifactError::Io { source, path })
    }
}

/// Download release and its digest, verify, and extract.
///
/// # Errors
///
/// - Return [`ArtifactError::Http`] or [`ArtifactError::Status`] if either
///   download fails.
/// - Return [`ArtifactError::ChecksumMismatch`] if the archive does not
///   match its published digest. Nothing is extracted in that case.
/// - Return [`ArtifactError::Zip`] or [`ArtifactError::UnexpectedLayout`] if
///   extraction fails.
#[instrument(skip(client, release), level = "debug")]
pub async fn fetch_verified(client: &reqwest::Client, release: &Release) -> Result<StagedRelease> {
    let workdir = tempfile::Builder::new()
        .prefix("oxicloud-")
        .tempdir()
        .map_err(ArtifactError::Workdir)?;
    let archive = workdir.path().join(release.archive_name());
    let digest = workdir.path().join(format!("{}.sha256", release.archive_name()));

    info!("download nextcloud {}", release.version());
    download(client, &release.archive_url(), &archive).await?;
    download(client, &release.digest_url(), &digest).await?;

    let tree = unpack_verified(&archive, &digest, &workdir.path().join("extract"))?;

    Ok(StagedRelease { workdir, tree })
}

/// Stream URL to file, showing progress.
///
/// # Errors
///
/// - Return [`ArtifactError::Http`] if request or transfer fails.
/// - Return [`ArtifactError::Status`] if server does not answer with success.
/// - Return [`ArtifactError::Io`] if file cannot be written.
pub async fn download(client: &reqwest::Client, url: &str, dest: &Path) -> Result<u64> {
    debug!("fetch {url}");
    let response = client.get(url).send().await?;
    let status = response.status();
    if !status.is_success() {
        return Err(ArtifactError::Status {
            url: url.to_string(),
            status,
        });
    }

    let bar = match response.content_length() {
        Some(length) => ProgressBar::new(length),
        None => ProgressBar::new_spinner(),
    };
    let style = ProgressStyle::with_template(
        "{elapsed_precise:.green}  {msg:<40}  [{wide_bar:.yellow/blue}] {bytes}/{total_bytes}",
    )?
    .progress_chars("-Cco.");
    bar.set_style(style);
    bar.set_message(
        dest.file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
    );
    bar.enable_steady_tick(Duration::from_millis(100));

    let io_error = |source| ArtifactError::Io {
        source,
        path: dest.to_path_buf(),
    };
    let mut file = tokio::fs::File::create(dest).await.map_err(io_error)?;
    let mut stream = response.bytes_stream();
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await.map_err(io_error)?;
        written += chunk.len() as u64;
        bar.set_position(written);
    }
    file.flush().await.map_err(io_error)?;
    bar.finish_and_clear();

    Ok(written)
}

/// Extract archive into staging directory if it matches published digest.
///
/// Returns path to the extracted top-level `nextcloud` directory.
///
/// # Errors
///
/// - Return [`ArtifactError::ChecksumMismatch`] if digests differ.
/// - Return [`ArtifactError::MalformedDigest`] if digest file is malformed.
/// - Return [`ArtifactError::Zip`] if archive cannot be extracted.
/// - Return [`ArtifactError::UnexpectedLayout`] if archive lacks a top-level
///   `nextcloud` directory.
pub fn unpack_verified(archive: &Path, digest_file: &Path, staging: &Path) -> Result<PathBuf> {
    verify(archive, digest_file)?;
    extract(archive, staging)
}

/// Compare archive against its published digest.
///
/// # Errors
///
/// - Return [`ArtifactError::ChecksumMismatch`] if digests differ.
/// - Return [`ArtifactError::MalformedDigest`] if digest file is malformed.
/// - Return [`ArtifactError::Io`] if either file cannot be read.
#[instrument(level = "debug")]
pub fn verify(archive: &Path, digest_file: &Path) -> Result<()> {
    let published = std::fs::read_to_string(digest_file).map_err(|source| ArtifactError::Io {
        source,
        path: digest_file.to_path_buf(),
    })?;
    let expected = parse_published_digest(&published)?;
    let actual = sha256_file(archive)?;

    if expected != actual {
        return Err(ArtifactError::ChecksumMismatch { expected, actual });
    }

    info!("checksum of {} verified", archive.display());
    Ok(())
}

/// Extract SHA-256 digest from published digest file.
///
/// Digest files follow `sha256sum` output, i.e., the hex digest followed by
/// the file name.
///
/// # Errors
///
/// - Return [`ArtifactError::MalformedDigest`] if first token is not 64 hex
///   digits.
pub fn parse_published_digest(content: &str) -> Result<String> {
    let token = content.split_whitespace().next().unwrap_or_default();
    if token.len() != 64 || !token.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ArtifactError::MalformedDigest(token.to_string()));
    }

    Ok(token.to_ascii_lowercase())
}

/// Compute hex encoded SHA-256 digest of file.
///
/// # Errors
///
/// - Return [`ArtifactError::Io`] if file cannot be read.
pub fn sha256_file(path: &Path) -> Result<String> {
    let io_error = |source| ArtifactError::Io {
        source,
        path: path.to_path_buf(),
    };
    let mut reader = BufReader::new(File::open(path).map_err(io_error)?);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; 8192];

    loop {
        let n = reader.read(&mut buffer).map_err(io_error)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

/// Extract zip archive into staging directory.
///
/// # Errors
///
/// - Return [`ArtifactError::Zip`] if archive cannot be extracted.
/// - Return [`ArtifactError::UnexpectedLayout`] if archive lacks a top-level
///   `nextcloud` directory.
#[instrument(level = "debug")]
pub fn extract(archive: &Path, staging: &Path) -> Result<PathBuf> {
    let file = File::open(archive).map_err(|source| ArtifactError::Io {
        source,
        path: archive.to_path_buf(),
    })?;
    let mut zip = zip::ZipArchive::new(BufReader::new(file))?;
    info!("extract {} entries", zip.len());
    zip.extract(staging)?;

    let tree = staging.join("nextcloud");
    if !tree.is_dir() {
        return Err(ArtifactError::UnexpectedLayout(archive.to_path_buf()));
    }

    Ok(tree)
}

/// Artifact error types.
#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    /// Private working directory cannot be created.
    #[error("failed to create working directory")]
    Workdir(#[source] std::io::Error),

    /// HTTP request or transfer failed.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// Server answered with non-success status.
    #[error("download of {url} failed with status {status}")]
    Status {
        url: String,
        status: reqwest::StatusCode,
    },

    /// File cannot be read or written.
    #[error("i/o failure at {:?}", path.display())]
    Io {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Published digest is not a SHA-256 hex digest.
    #[error("published digest {0:?} is not a sha256 hex digest")]
    MalformedDigest(String),

    /// Archive does not match published digest.
    #[error("checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch { expected: String, actual: String },

    /// Archive cannot be extracted.
    #[error(transparent)]
    Zip(#[from] zip::result::ZipError),

    /// Archive lacks top-level `nextcloud` directory.
    #[error("archive {:?} has no top-level nextcloud directory", .0.display())]
    UnexpectedLayout(PathBuf),

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),
}

/// Friendly result alias :3
pub type Result<T, E = ArtifactError> = std::result::Result<T, E>;
