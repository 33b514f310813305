// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Keep the bibliography of an Overleaf project in sync with Zotero.
//!
//! Bibsync remembers __links__ between Overleaf projects and Zotero libraries
//! or collections. Syncing a link fetches every item of the Zotero side,
//! formats the items as BibTeX, and commits the result into the Overleaf
//! project through its Git access.
//!
//! # Flow
//!
//! 1. [`store::LinkStore`] loads the link and its credentials.
//! 2. [`zotero::ZoteroClient`] fetches the items of the linked library.
//! 3. [`bibtex::format`] turns the items into bibliography content.
//! 4. [`overleaf::OverleafClient`] commits and pushes the content.
//!
//! [`session::SyncSession`] strings these steps together for one link.

pub mod bibtex;
pub mod config;
pub mod overleaf;
pub mod path;
pub mod session;
pub mod store;
pub mod zotero;
