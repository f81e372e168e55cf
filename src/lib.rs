// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Nextcloud installer for Debian based single-board computers.
//!
//! Oxicloud turns a fresh Debian (or Raspberry Pi OS) host into a working
//! Nextcloud server in one run: it installs Apache, MariaDB, and PHP, hardens
//! the database, downloads and verifies a pinned Nextcloud release, deploys
//! it, and configures everything around it. See [`install`] for the step
//! list.
//!
//! Oxicloud runs as a regular user, and elevates through sudo only for the
//! commands that need it. Secrets it generates are written once to a
//! credential record readable by the invoking user alone.

pub mod artifact;
pub mod backup;
pub mod config;
pub mod credentials;
pub mod host;
pub mod install;
pub mod path;
pub mod prompt;
pub mod render;

pub use install::{InstallContext, InstallReport, Installer, Selection, Step};
