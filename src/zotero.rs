// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Zotero web API access.
//!
//! Bibsync reads the items of a Zotero library through the
//! [Zotero web API](https://www.zotero.org/support/dev/web_api/v3/start).
//! The library to read is given by a [`LibraryRef`] parsed from the URL the
//! user copies out of the Zotero web interface. Private and group libraries
//! need an API key, which is sent along with every request.
//!
//! Nothing is cached locally. Every sync fetches the full item set again, so
//! the generated bibliography always mirrors the current state of the library.

pub mod client;
pub mod item;
pub mod library;

pub use client::ZoteroClient;
pub use item::{Creator, Item, ItemData};
pub use library::{InvalidUrl, LibraryKind, LibraryRef};

/// Zotero web API error types.
#[derive(Debug, thiserror::Error)]
pub enum ZoteroError {
    /// Library URL cannot be parsed.
    #[error(transparent)]
    InvalidUrl(#[from] InvalidUrl),

    /// User library is referenced by name, but no API key was given to
    /// resolve its numeric user ID.
    #[error("user library {name:?} is referenced by name, an api key is needed to resolve it")]
    MissingApiKey { name: String },

    /// User library is referenced by name, but the API key belongs to
    /// another user.
    #[error("user library {name:?} is referenced by name, but the api key belongs to {owner:?}")]
    KeyOwnerMismatch { name: String, owner: String },

    /// API key is missing, invalid, or lacks access to the library.
    #[error("zotero denied access to {url}, check the api key and its permissions")]
    Auth { url: String },

    /// Library or collection does not exist.
    #[error("zotero library or collection not found at {url}")]
    NotFound { url: String },

    /// Network failure, rate limiting, or server side error.
    #[error("temporary failure talking to zotero at {url}: {reason}")]
    Transient { url: String, reason: String },

    /// Response status that bibsync does not know how to handle.
    #[error("zotero answered {url} with unexpected status {status}")]
    UnexpectedStatus { url: String, status: u16 },

    /// Response body is not what the web API documents.
    #[error("failed to decode zotero response from {url}")]
    Decode {
        #[source]
        source: reqwest::Error,
        url: String,
    },

    /// HTTP client cannot be set up, or request cannot be built.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

impl ZoteroError {
    /// Check if retrying the same request may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

/// Friendly result alias :3
pub type Result<T, E = ZoteroError> = std::result::Result<T, E>;
