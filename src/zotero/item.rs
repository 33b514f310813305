// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Zotero item records.
//!
//! Layout of the item records returned by the Zotero web API in its JSON
//! format. Only the fields that end up in a bibliography are modeled, the rest
//! are ignored during deserialization.

use serde::{Deserialize, Serialize};

/// Item types that never make it into a bibliography.
const NON_BIBLIOGRAPHIC: [&str; 3] = ["note", "attachment", "annotation"];

/// Single item of a Zotero library.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
pub struct Item {
    /// Library-unique item key.
    pub key: String,

    /// Bibliographic metadata.
    pub data: ItemData,
}

impl Item {
    /// Check if item is a bibliographic record instead of a note or file.
    pub fn is_bibliographic(&self) -> bool {
        !NON_BIBLIOGRAPHIC.contains(&self.data.item_type.as_str())
    }
}

/// Bibliographic metadata of an item.
///
/// Zotero reports unset fields as empty strings. Use [`non_empty`] to read
/// optional fields.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ItemData {
    pub item_type: String,
    pub title: Option<String>,
    pub creators: Vec<Creator>,
    pub date: Option<String>,
    pub publication_title: Option<String>,
    pub proceedings_title: Option<String>,
    pub book_title: Option<String>,
    pub volume: Option<String>,
    pub issue: Option<String>,
    pub pages: Option<String>,
    pub edition: Option<String>,
    pub series: Option<String>,
    pub publisher: Option<String>,
    pub place: Option<String>,
    pub university: Option<String>,
    pub institution: Option<String>,
    pub report_number: Option<String>,
    pub url: Option<String>,
    #[serde(rename = "DOI")]
    pub doi: Option<String>,
    #[serde(rename = "ISBN")]
    pub isbn: Option<String>,
    #[serde(rename = "ISSN")]
    pub issn: Option<String>,
}

/// Person or organization credited on an item.
#[derive(Default, Debug, PartialEq, Eq, Clone, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Creator {
    /// Role of creator, e.g., "author", "editor", "translator".
    pub creator_type: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,

    /// Single field name used for organizations.
    pub name: Option<String>,
}

impl Creator {
    /// Construct new two field creator.
    pub fn person(
        creator_type: impl Into<String>,
        last_name: impl Into<String>,
        first_name: impl Into<String>,
    ) -> Self {
        Self {
            creator_type: creator_type.into(),
            first_name: Some(first_name.into()),
            last_name: Some(last_name.into()),
            name: None,
        }
    }

    /// Name used to sort and cite the creator.
    pub fn family_name(&self) -> Option<&str> {
        non_empty(&self.last_name).or_else(|| non_empty(&self.name))
    }

    pub fn is_editor(&self) -> bool {
        matches!(self.creator_type.as_str(), "editor" | "seriesEditor")
    }

    /// Check if creator is a primary creator of the item.
    ///
    /// Zotero's primary creator type depends on the item type, e.g., a film has
    /// a "director", a patent an "inventor". Everything that is not a known
    /// secondary role counts.
    pub fn is_primary(&self) -> bool {
        !self.is_editor()
            && !matches!(
                self.creator_type.as_str(),
                "translator"
                    | "contributor"
                    | "reviewedAuthor"
                    | "bookAuthor"
                    | "commenter"
                    | "counsel"
                    | "cosponsor"
                    | "castMember"
                    | "guest"
                    | "interviewer"
                    | "recipient"
                    | "wordsBy"
            )
    }
}

/// Read optional string field, treating blank values as absent.
pub fn non_empty(field: &Option<String>) -> Option<&str> {
    field.as_deref().map(str::trim).filter(|value| !value.is_empty())
}
