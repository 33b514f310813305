// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Zotero library references.
//!
//! Users point bibsync at their bibliography by pasting the URL of a Zotero
//! library or collection as shown in the Zotero web interface. A
//! [`LibraryRef`] is the parsed form of such a URL. It names exactly one user
//! or group library, optionally narrowed down to one collection.
//!
//! # Accepted URL Shapes
//!
//! 1. User library: `https://www.zotero.org/<user>[/library]`
//! 2. User collection: `https://www.zotero.org/<user>/collections/<key>`
//! 3. Group library: `https://www.zotero.org/groups/<id>[/<slug>][/library]`
//! 4. Group collection: `https://www.zotero.org/groups/<id>[/<slug>]/collections/<key>`
//!
//! Anything trailing the collection key, e.g., `/items/<key>` when an item is
//! selected in the web interface, is ignored.

use serde::{Deserialize, Serialize};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    str::FromStr,
};
use url::Url;

const WEB_HOSTS: [&str; 2] = ["zotero.org", "www.zotero.org"];
const VIEW_SEGMENTS: [&str; 5] = ["library", "items", "collections", "tags", "search"];

/// Kind of Zotero library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LibraryKind {
    /// Personal library of a Zotero user.
    User,

    /// Shared library of a Zotero group.
    Group,
}

impl LibraryKind {
    /// Path prefix used by the Zotero web API for this kind of library.
    pub fn api_segment(&self) -> &'static str {
        match self {
            Self::User => "users",
            Self::Group => "groups",
        }
    }
}

/// Reference to a Zotero library, or to one collection inside of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct LibraryRef {
    kind: LibraryKind,
    id: String,
    collection: Option<String>,
}

impl LibraryRef {
    /// Construct new library reference.
    pub fn new(kind: LibraryKind, id: impl Into<String>, collection: Option<String>) -> Self {
        Self {
            kind,
            id: id.into(),
            collection,
        }
    }

    pub fn kind(&self) -> LibraryKind {
        self.kind
    }

    /// Library identifier.
    ///
    /// Numeric for groups. For users this is either the numeric user ID, or
    /// the user name shown in web URLs.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn collection(&self) -> Option<&str> {
        self.collection.as_deref()
    }

    /// Check if library is a user library addressed by user name.
    ///
    /// The web API only understands numeric user IDs, so these references
    /// must be resolved through an API key first.
    pub fn is_named_user(&self) -> bool {
        self.kind == LibraryKind::User && !is_numeric(&self.id)
    }

    /// Same reference pointing at a different library ID.
    pub fn with_id(&self, id: impl Into<String>) -> Self {
        Self {
            kind: self.kind,
            id: id.into(),
            collection: self.collection.clone(),
        }
    }

    /// Library path relative to the web API root, e.g., `groups/1234`.
    pub fn api_path(&self) -> String {
        format!("{}/{}", self.kind.api_segment(), self.id)
    }
}

impl FromStr for LibraryRef {
    type Err = InvalidUrl;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        let data = data.trim();
        let invalid = |reason: &str| InvalidUrl {
            url: data.to_string(),
            reason: reason.to_string(),
        };

        // INVARIANT: Tolerate URLs pasted without their scheme.
        let url = if data.contains("://") {
            Url::parse(data)
        } else {
            Url::parse(&format!("https://{data}"))
        }
        .map_err(|_| invalid("not a url"))?;

        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid("expected an http or https url"));
        }

        if !url.host_str().is_some_and(|host| WEB_HOSTS.contains(&host)) {
            return Err(invalid("expected a zotero.org url"));
        }

        let segments = url
            .path_segments()
            .map(|segments| segments.filter(|s| !s.is_empty()).collect::<Vec<_>>())
            .unwrap_or_default();

        let (kind, id, view) = match segments.as_slice() {
            [] => return Err(invalid("missing library name")),
            ["groups"] => return Err(invalid("missing group id")),
            ["groups", id, rest @ ..] => {
                if !is_numeric(id) {
                    return Err(invalid("group id must be numeric"));
                }

                // INVARIANT: Group URLs may carry a human readable slug after the ID.
                let view = match rest {
                    [slug, view @ ..] if !VIEW_SEGMENTS.contains(slug) => view,
                    view => view,
                };
                (LibraryKind::Group, *id, view)
            }
            [user, view @ ..] => {
                if !user
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
                {
                    return Err(invalid("malformed user name"));
                }
                (LibraryKind::User, *user, view)
            }
        };

        let collection = match view {
            [] | ["library", ..] | ["items", ..] => None,
            ["collections", key, ..] => {
                if !key.chars().all(|c| c.is_ascii_alphanumeric()) {
                    return Err(invalid("malformed collection key"));
                }
                Some(key.to_string())
            }
            ["collections"] => return Err(invalid("missing collection key")),
            _ => return Err(invalid("unrecognized library or collection path")),
        };

        Ok(Self::new(kind, id, collection))
    }
}

impl Display for LibraryRef {
    /// Canonical web URL of the library or collection.
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str("https://www.zotero.org/")?;
        if self.kind == LibraryKind::Group {
            fmt.write_str("groups/")?;
        }

        match &self.collection {
            Some(key) => write!(fmt, "{}/collections/{key}", self.id),
            None => write!(fmt, "{}/library", self.id),
        }
    }
}

impl TryFrom<String> for LibraryRef {
    type Error = InvalidUrl;

    fn try_from(data: String) -> Result<Self, Self::Error> {
        data.parse()
    }
}

impl From<LibraryRef> for String {
    fn from(library: LibraryRef) -> Self {
        library.to_string()
    }
}

fn is_numeric(data: &str) -> bool {
    !data.is_empty() && data.chars().all(|c| c.is_ascii_digit())
}

/// URL does not name a Zotero library or collection.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
#[error("invalid zotero url {url:?}: {reason}")]
pub struct InvalidUrl {
    pub url: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use simple_test_case::test_case;

    #[test_case(
        "https://www.zotero.org/alice/library",
        LibraryKind::User, "alice", None;
        "user library"
    )]
    #[test_case(
        "https://www.zotero.org/alice",
        LibraryKind::User, "alice", None;
        "bare user library"
    )]
    #[test_case(
        "https://www.zotero.org/alice/collections/ABC123",
        LibraryKind::User, "alice", Some("ABC123");
        "user collection"
    )]
    #[test_case(
        "https://www.zotero.org/alice/collections/ABC123/items/XYZ789/item-details",
        LibraryKind::User, "alice", Some("ABC123");
        "user collection with selected item"
    )]
    #[test_case(
        "https://www.zotero.org/groups/2345678/lab_papers/library",
        LibraryKind::Group, "2345678", None;
        "group library"
    )]
    #[test_case(
        "https://www.zotero.org/groups/2345678",
        LibraryKind::Group, "2345678", None;
        "bare group library"
    )]
    #[test_case(
        "https://www.zotero.org/groups/2345678/lab_papers/collections/QW12ER34",
        LibraryKind::Group, "2345678", Some("QW12ER34");
        "group collection"
    )]
    #[test_case(
        "zotero.org/groups/2345678/collections/QW12ER34/",
        LibraryKind::Group, "2345678", Some("QW12ER34");
        "group collection without slug or scheme"
    )]
    #[test]
    fn parse_library_url(url: &str, kind: LibraryKind, id: &str, collection: Option<&str>) {
        let result: LibraryRef = url.parse().unwrap();
        let expect = LibraryRef::new(kind, id, collection.map(str::to_string));
        pretty_assertions::assert_eq!(result, expect);
    }

    #[test_case("https://example.org/alice/library"; "foreign host")]
    #[test_case("ftp://www.zotero.org/alice/library"; "foreign scheme")]
    #[test_case("https://www.zotero.org/"; "no library")]
    #[test_case("https://www.zotero.org/groups/"; "no group id")]
    #[test_case("https://www.zotero.org/groups/lab/library"; "non numeric group id")]
    #[test_case("https://www.zotero.org/alice/collections"; "no collection key")]
    #[test_case("https://www.zotero.org/alice/settings/keys"; "unknown view")]
    #[test_case("not a url at all"; "garbage")]
    #[test]
    fn parse_library_url_rejects(url: &str) {
        let result = url.parse::<LibraryRef>();
        assert!(result.is_err(), "{url:?} should not parse");
    }

    #[test]
    fn canonical_url_parses_back() {
        for reference in [
            LibraryRef::new(LibraryKind::User, "alice", None),
            LibraryRef::new(LibraryKind::User, "12345", Some("ABC123".into())),
            LibraryRef::new(LibraryKind::Group, "2345678", None),
            LibraryRef::new(LibraryKind::Group, "2345678", Some("QW12ER34".into())),
        ] {
            let result: LibraryRef = reference.to_string().parse().unwrap();
            assert_eq!(result, reference);
        }
    }

    #[test]
    fn named_users_need_resolution() {
        let named: LibraryRef = "https://www.zotero.org/alice".parse().unwrap();
        let numeric = named.with_id("12345");
        let group: LibraryRef = "https://www.zotero.org/groups/99".parse().unwrap();

        assert!(named.is_named_user());
        assert!(!numeric.is_named_user());
        assert!(!group.is_named_user());
        assert_eq!(numeric.api_path(), "users/12345");
        assert_eq!(group.api_path(), "groups/99");
    }
}
