// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout for the configuration file that bibsync uses to
//! remember links between Overleaf projects and Zotero libraries. File I/O is
//! left to the [`LinkStore`](crate::store::LinkStore).
//!
//! # Credentials
//!
//! Links hold the Overleaf Git token and the Zotero API key in plaintext. The
//! configuration file must therefore be treated like any other secret.

use crate::zotero::LibraryRef;

use serde::{Deserialize, Serialize};
use std::{
    collections::BTreeMap,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    path::{Path, PathBuf},
    str::FromStr,
};

/// Bibliography file path used when a link does not name one.
pub const DEFAULT_BIB_PATH: &str = "references.bib";

/// Layout of the link configuration file.
///
/// Maps project names to the [`Link`] stored for them. Links are kept sorted
/// by project name so that the file content stays stable across saves.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct LinkConfig {
    #[serde(default)]
    pub links: BTreeMap<String, Link>,
}

impl FromStr for LinkConfig {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let mut config: LinkConfig =
            serde_json::from_str(data).map_err(ConfigError::Deserialize)?;

        // INVARIANT: Every link knows the project name it is filed under.
        for (name, link) in config.links.iter_mut() {
            link.name = name.clone();
        }

        Ok(config)
    }
}

impl Display for LinkConfig {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let data = serde_json::to_string_pretty(self).map_err(ConfigError::Serialize)?;
        writeln!(fmt, "{data}")
    }
}

/// Link between one Overleaf project and one Zotero library.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Link {
    /// Project name the link is filed under.
    #[serde(skip)]
    pub name: String,

    /// Overleaf project to write the bibliography into.
    pub overleaf: OverleafProject,

    /// Zotero library to read items from.
    pub zotero: ZoteroSource,
}

impl Link {
    /// Construct new link.
    pub fn new(name: impl Into<String>, overleaf: OverleafProject, zotero: ZoteroSource) -> Self {
        Self {
            name: name.into(),
            overleaf,
            zotero,
        }
    }
}

/// Overleaf project settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct OverleafProject {
    /// Git URL of the project, e.g., `https://git.overleaf.com/<id>`.
    pub git_url: String,

    /// Git authentication token.
    pub token: String,

    /// Path of the bibliography file relative to the project root.
    #[serde(default = "default_bib_path")]
    pub bib_path: PathBuf,

    /// Directory to keep a reusable working copy of the project in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub work_dir: Option<WorkDir>,
}

impl OverleafProject {
    /// Construct new project settings with default bibliography path.
    pub fn new(git_url: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            git_url: git_url.into(),
            token: token.into(),
            bib_path: default_bib_path(),
            work_dir: None,
        }
    }
}

fn default_bib_path() -> PathBuf {
    PathBuf::from(DEFAULT_BIB_PATH)
}

/// Zotero library settings.
#[derive(Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct ZoteroSource {
    /// Library or collection to read.
    pub library: LibraryRef,

    /// API key needed for private and group libraries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

/// Directory acting as a reusable working copy of an Overleaf project.
///
/// Stored verbatim. Shell expansion is applied when the path is resolved, so
/// entries like `~/overleaf/thesis` survive a load and save unchanged.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct WorkDir(PathBuf);

impl WorkDir {
    /// Construct new working copy directory.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// Treat working copy directory as [`Path`] slice, without expansion.
    pub fn as_path(&self) -> &Path {
        self.0.as_path()
    }

    /// Resolve working copy directory with shell expansion applied.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::ShellExpansion`] if a referenced variable is
    ///   not set.
    pub fn resolve(&self) -> Result<PathBuf> {
        let raw = self.to_string();
        let path = shellexpand::full(&raw)?;
        Ok(PathBuf::from(path.into_owned()))
    }
}

impl Display for WorkDir {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(self.as_path().to_string_lossy().as_ref())
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to deserialize configuration.
    #[error("malformed link configuration")]
    Deserialize(#[source] serde_json::Error),

    /// Failed to serialize configuration.
    #[error("failed to serialize link configuration")]
    Serialize(#[source] serde_json::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;
