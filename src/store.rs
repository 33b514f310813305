// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Link store management and manipulation.
//!
//! Bibsync remembers every link between an Overleaf project and a Zotero
//! library in one JSON file called the __link store__. The default location
//! is `$XDG_CONFIG_HOME/zotero_overleaf/config.json`, but the store can be
//! opened at any path.
//!
//! # Atomic Writes
//!
//! The store is always rewritten in full. New content goes into a temporary
//! file next to the store, which is then renamed over the old file. A crash
//! midway leaves either the old or the new store behind, never a truncated
//! one. Concurrent writers are not coordinated, the last rename wins.

use crate::{
    config::{ConfigError, Link, LinkConfig},
    path::{default_config_path, NoWayHome},
};

use mkdirp::mkdirp;
use std::{
    collections::BTreeMap,
    fs::read_to_string,
    io::{ErrorKind, Write},
    path::{Path, PathBuf},
};
use tempfile::NamedTempFile;
use tracing::{debug, info, instrument};

/// Persistent collection of links.
#[derive(Debug, Clone)]
pub struct LinkStore {
    path: PathBuf,
}

impl LinkStore {
    /// Open link store at target path.
    ///
    /// The file itself is only touched when links are loaded or saved.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Open link store at its default location.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NoWayHome`] if the user's configuration
    ///   directory cannot be determined.
    pub fn open_default() -> Result<Self> {
        Ok(Self::open(default_config_path()?))
    }

    /// Path to the link store file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all links keyed by project name.
    ///
    /// A missing store file simply means that no links exist yet.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::Read`] if the store file cannot be read.
    /// - Return [`StoreError::Config`] if the store file is malformed.
    #[instrument(skip(self), level = "debug")]
    pub fn load_links(&self) -> Result<BTreeMap<String, Link>> {
        Ok(self.load()?.links)
    }

    /// Insert link, replacing any link filed under the same project name.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::EmptyName`] if link has no project name.
    /// - Return [`StoreError::Read`] or [`StoreError::Config`] if the current
    ///   store cannot be loaded.
    /// - Return [`StoreError::Write`] if the store cannot be written.
    #[instrument(skip(self, link), fields(project = %link.name), level = "debug")]
    pub fn save_link(&self, link: Link) -> Result<()> {
        if link.name.trim().is_empty() {
            return Err(StoreError::EmptyName);
        }

        let mut config = self.load()?;
        let name = link.name.clone();
        match config.links.insert(name.clone(), link) {
            Some(_) => info!("update link {name:?}"),
            None => info!("add link {name:?}"),
        }

        self.write(&config)
    }

    /// Remove link filed under project name, returning it.
    ///
    /// # Errors
    ///
    /// - Return [`StoreError::NoSuchLink`] if no link has that name.
    /// - Return [`StoreError::Read`] or [`StoreError::Config`] if the current
    ///   store cannot be loaded.
    /// - Return [`StoreError::Write`] if the store cannot be written.
    #[instrument(skip(self), level = "debug")]
    pub fn remove_link(&self, name: &str) -> Result<Link> {
        let mut config = self.load()?;
        let link = config
            .links
            .remove(name)
            .ok_or_else(|| StoreError::NoSuchLink {
                name: name.to_string(),
            })?;
        self.write(&config)?;
        info!("remove link {name:?}");

        Ok(link)
    }

    fn load(&self) -> Result<LinkConfig> {
        match read_to_string(&self.path) {
            Ok(data) => Ok(data.parse::<LinkConfig>()?),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("no link store at {:?}, start empty", self.path.display());
                Ok(LinkConfig::default())
            }
            Err(err) => Err(StoreError::Read {
                source: err,
                path: self.path.clone(),
            }),
        }
    }

    fn write(&self, config: &LinkConfig) -> Result<()> {
        let write_error = |source: std::io::Error| StoreError::Write {
            source,
            path: self.path.clone(),
        };
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        mkdirp(&parent).map_err(write_error)?;

        // INVARIANT: Temporary file lives on the same file system so the rename is atomic.
        //   - Temporary files are created with owner-only permissions.
        let mut file = NamedTempFile::new_in(&parent).map_err(write_error)?;
        file.write_all(config.to_string().as_bytes())
            .map_err(write_error)?;
        file.as_file().sync_all().map_err(write_error)?;
        file.persist(&self.path)
            .map_err(|err| write_error(err.error))?;
        debug!("wrote link store to {:?}", self.path.display());

        Ok(())
    }
}

/// All possible error types for link store interaction.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Link store file is malformed.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Default link store location cannot be determined.
    #[error(transparent)]
    NoWayHome(#[from] NoWayHome),

    /// Link store file cannot be read from.
    #[error("failed to read link store at {:?}", path.display())]
    Read {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// Link store file cannot be written to.
    #[error("failed to write link store at {:?}", path.display())]
    Write {
        #[source]
        source: std::io::Error,
        path: PathBuf,
    },

    /// No link is filed under the requested project name.
    #[error("no link named {name:?}")]
    NoSuchLink { name: String },

    /// Links must be filed under a project name.
    #[error("link has no project name")]
    EmptyName,
}

/// Friendly result alias :3
pub type Result<T, E = StoreError> = std::result::Result<T, E>;
