// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Sync session.
//!
//! One run of bibsync for one link: fetch the items of the linked Zotero
//! library, format them into a bibliography, and hand the bibliography to the
//! Overleaf project. Nothing is written to the project unless fetching and
//! formatting both succeeded.
//!
//! Transient failures of the fetch or of the push are retried once after a
//! short pause. A second failure is reported as is.

use crate::{
    bibtex::{self, SkipWarning},
    config::Link,
    overleaf::{BibliographySink, OverleafClient, OverleafError, SyncOutcome},
    zotero::{ZoteroClient, ZoteroError},
};

use std::time::Duration;
use tracing::{info, instrument, warn};

/// Pause before retrying a transient failure.
pub const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Result of one sync run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    /// Project name of the synced link.
    pub project: String,

    /// Amount of entries in the written bibliography.
    pub entries: usize,

    /// Items left out of the bibliography.
    pub warnings: Vec<SkipWarning>,

    /// What happened to the Overleaf project.
    pub outcome: SyncOutcome,
}

/// Sync pipeline from Zotero to a bibliography sink.
#[derive(Debug, Clone)]
pub struct SyncSession<S = OverleafClient>
where
    S: BibliographySink,
{
    zotero: ZoteroClient,
    sink: S,
    retry_delay: Duration,
}

impl<S> SyncSession<S>
where
    S: BibliographySink,
{
    /// Construct new session out of a Zotero client and a sink.
    pub fn new(zotero: ZoteroClient, sink: S) -> Self {
        Self {
            zotero,
            sink,
            retry_delay: RETRY_DELAY,
        }
    }

    /// Set pause before retrying a transient failure.
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Sync bibliography of one link.
    ///
    /// # Errors
    ///
    /// - Return [`SessionError::Zotero`] if items cannot be fetched.
    /// - Return [`SessionError::Overleaf`] if the bibliography cannot be
    ///   written into the project.
    #[instrument(skip(self, link), fields(project = %link.name), level = "debug")]
    pub async fn run(&self, link: &Link) -> Result<SyncReport> {
        let library = &link.zotero.library;
        let api_key = link.zotero.api_key.as_deref();

        info!("fetch items of {library}");
        let items = match self.zotero.fetch_items(library, api_key).await {
            Err(err) if err.is_transient() => {
                warn!("{err}, retry once");
                tokio::time::sleep(self.retry_delay).await;
                self.zotero.fetch_items(library, api_key).await?
            }
            result => result?,
        };

        let bibliography = bibtex::format(&items);
        for warning in bibliography.warnings() {
            warn!("{warning}");
        }

        info!(
            "write {} entries to {:?}",
            bibliography.entries(),
            link.overleaf.bib_path.display()
        );
        let outcome = match self.sink.sync(&link.overleaf, bibliography.content()) {
            Err(err) if err.is_transient() => {
                warn!("{err}, retry once");
                tokio::time::sleep(self.retry_delay).await;
                self.sink.sync(&link.overleaf, bibliography.content())?
            }
            result => result?,
        };
        info!("{}: {outcome}", link.name);

        Ok(SyncReport {
            project: link.name.clone(),
            entries: bibliography.entries(),
            warnings: bibliography.warnings().to_vec(),
            outcome,
        })
    }
}

/// Sync session error types.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Zotero(#[from] ZoteroError),

    #[error(transparent)]
    Overleaf(#[from] OverleafError),
}

impl SessionError {
    /// Check if running the sync again later may succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Zotero(err) => err.is_transient(),
            Self::Overleaf(err) => err.is_transient(),
        }
    }

    /// Remediation for the operator, if bibsync knows one.
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::Zotero(ZoteroError::Auth { .. } | ZoteroError::MissingApiKey { .. }) => Some(
                "create a zotero api key with read access at https://www.zotero.org/settings/keys, then run `bibsync add` again",
            ),
            Self::Zotero(ZoteroError::KeyOwnerMismatch { .. }) => Some(
                "use an api key of the library owner, or the numeric user id in the library url",
            ),
            Self::Zotero(ZoteroError::NotFound { .. }) => {
                Some("check the library url of the link, private libraries need an api key")
            }
            Self::Zotero(ZoteroError::InvalidUrl(_)) => {
                Some("copy the library url out of the zotero web interface")
            }
            Self::Overleaf(OverleafError::Auth { .. }) => Some(
                "generate a new git token in the overleaf account settings, then run `bibsync add` again",
            ),
            Self::Overleaf(OverleafError::ManualEdit { .. }) => Some(
                "move manual changes into zotero, or run `bibsync sync --force` to overwrite them",
            ),
            Self::Overleaf(OverleafError::Conflict { .. }) => {
                Some("the project changed during the sync, run `bibsync sync` again")
            }
            err if err.is_transient() => Some("check the network connection and try again later"),
            _ => None,
        }
    }
}

/// Friendly result alias :3
pub type Result<T, E = SessionError> = std::result::Result<T, E>;
