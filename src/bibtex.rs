// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! BibTeX bibliography generation.
//!
//! Turns Zotero items into the content of a `.bib` file that a LaTeX project
//! can pull in with `\bibliography{references}`.
//!
//! # Citation Keys
//!
//! Every entry is cited through a key made of the family name of its first
//! author followed by its year of publication, e.g., `turing1950`. Keys are
//! folded to lower case ASCII letters and digits. Items without a known year
//! use `nodate` instead of the year.
//!
//! Two items can easily map to the same key. Colliding items receive the
//! suffixes `a`, `b`, `c`, and so on. Suffixes are handed out by ascending
//! Zotero item key, never by the order in which items were fetched.
//!
//! # Stable Output
//!
//! Entries are written in ascending citation key order, and the file header
//! does not carry a timestamp. Thus, formatting the same set of items always
//! produces byte-identical output. Bibsync relies on this to detect that a
//! project is already up to date without creating empty commits.

use crate::zotero::item::{non_empty, Creator, Item};

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt::{Display, Formatter, Result as FmtResult, Write},
};
use tracing::{debug, warn};

/// Generated bibliography file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bibliography {
    content: String,
    entries: usize,
    warnings: Vec<SkipWarning>,
}

impl Bibliography {
    /// Full content of the bibliography file.
    pub fn content(&self) -> &str {
        &self.content
    }

    /// Amount of entries written.
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Items left out of the bibliography.
    pub fn warnings(&self) -> &[SkipWarning] {
        &self.warnings
    }
}

/// Item that was left out of the bibliography.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkipWarning {
    pub item_key: String,
    pub reason: SkipReason,
}

impl Display for SkipWarning {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        write!(fmt, "skipped zotero item {}: {}", self.item_key, self.reason)
    }
}

/// Reason for leaving an item out of the bibliography.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingTitle,
    MissingAuthor,
}

impl Display for SkipReason {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::MissingTitle => fmt.write_str("no title"),
            Self::MissingAuthor => fmt.write_str("no author or editor"),
        }
    }
}

/// Format items into a BibTeX bibliography.
///
/// Items without a title, or without any author or editor, are skipped. Each
/// skip is logged and recorded in [`Bibliography::warnings`].
pub fn format(items: &[Item]) -> Bibliography {
    let mut warnings = Vec::new();
    let mut groups: BTreeMap<String, Vec<Entry<'_>>> = BTreeMap::new();

    for item in items {
        match Entry::try_from_item(item) {
            Ok(entry) => groups.entry(entry.base_key()).or_default().push(entry),
            Err(reason) => {
                let warning = SkipWarning {
                    item_key: item.key.clone(),
                    reason,
                };
                warn!("{warning}");
                warnings.push(warning);
            }
        }
    }
    warnings.sort_by(|a, b| a.item_key.cmp(&b.item_key));

    let taken: BTreeSet<String> = groups.keys().cloned().collect();
    let mut entries = BTreeMap::new();
    for (base, mut group) in groups {
        if group.len() == 1 {
            entries.insert(base, group.remove(0));
            continue;
        }

        // INVARIANT: Disambiguate by Zotero item key so input order never matters.
        group.sort_by(|a, b| a.item.key.cmp(&b.item.key));
        let mut suffix = 0;
        for entry in group {
            let key = loop {
                let candidate = format!("{base}{}", alpha_suffix(suffix));
                suffix += 1;
                if !taken.contains(&candidate) && !entries.contains_key(&candidate) {
                    break candidate;
                }
            };
            debug!("disambiguate {} as {key}", entry.item.key);
            entries.insert(key, entry);
        }
    }

    let mut content = String::new();
    content.push_str("% Generated by bibsync from a Zotero library.\n");
    content.push_str("% Manual changes are overwritten by the next sync.\n");
    let _ = writeln!(content, "% Total entries: {}", entries.len());
    for (key, entry) in &entries {
        content.push('\n');
        entry.render(key, &mut content);
    }

    Bibliography {
        content,
        entries: entries.len(),
        warnings,
    }
}

/// Item that passed validation.
#[derive(Debug)]
struct Entry<'a> {
    item: &'a Item,
    title: &'a str,
    authors: Vec<&'a Creator>,
    editors: Vec<&'a Creator>,
    year: Option<&'a str>,
}

impl<'a> Entry<'a> {
    fn try_from_item(item: &'a Item) -> Result<Self, SkipReason> {
        let data = &item.data;
        let title = non_empty(&data.title).ok_or(SkipReason::MissingTitle)?;
        let named = |creator: &&Creator| creator.family_name().is_some();
        let authors = data
            .creators
            .iter()
            .filter(|c| c.is_primary())
            .filter(named)
            .collect::<Vec<_>>();
        let editors = data
            .creators
            .iter()
            .filter(|c| c.is_editor())
            .filter(named)
            .collect::<Vec<_>>();

        if authors.is_empty() && editors.is_empty() {
            return Err(SkipReason::MissingAuthor);
        }

        Ok(Self {
            item,
            title,
            authors,
            editors,
            year: non_empty(&data.date).and_then(find_year),
        })
    }

    fn base_key(&self) -> String {
        let mut key = String::new();
        if let Some(name) = self
            .authors
            .first()
            .or(self.editors.first())
            .and_then(|creator| creator.family_name())
        {
            fold_ascii(name, &mut key);
        }

        if key.is_empty() {
            key.push_str("anon");
        }
        key.push_str(self.year.unwrap_or("nodate"));

        key
    }

    fn entry_type(&self) -> &'static str {
        match self.item.data.item_type.as_str() {
            "journalArticle" | "magazineArticle" | "newspaperArticle" => "article",
            "book" => "book",
            "bookSection" => "incollection",
            "conferencePaper" => "inproceedings",
            "thesis" => "phdthesis",
            "report" => "techreport",
            "manuscript" => "unpublished",
            _ => "misc",
        }
    }

    fn render(&self, key: &str, out: &mut String) {
        let data = &self.item.data;
        let entry_type = self.entry_type();
        let mut fields: Vec<(&str, String)> = Vec::new();

        if !self.authors.is_empty() {
            fields.push(("author", join_names(&self.authors)));
        }
        if !self.editors.is_empty() {
            fields.push(("editor", join_names(&self.editors)));
        }
        fields.push(("title", escape(self.title)));

        let container = match entry_type {
            "article" => Some(("journal", &data.publication_title)),
            "inproceedings" => Some((
                "booktitle",
                if non_empty(&data.proceedings_title).is_some() {
                    &data.proceedings_title
                } else {
                    &data.publication_title
                },
            )),
            "incollection" => Some(("booktitle", &data.book_title)),
            "phdthesis" => Some(("school", &data.university)),
            "techreport" => Some(("institution", &data.institution)),
            _ => None,
        };
        if let Some((name, value)) = container {
            push_escaped(&mut fields, name, value);
        }

        if let Some(year) = self.year {
            fields.push(("year", year.to_string()));
        }
        push_escaped(&mut fields, "edition", &data.edition);
        push_escaped(&mut fields, "series", &data.series);
        push_escaped(&mut fields, "volume", &data.volume);
        // INVARIANT: At most one number field, report numbers win over issues.
        let number = match entry_type {
            "techreport" if non_empty(&data.report_number).is_some() => &data.report_number,
            _ => &data.issue,
        };
        push_escaped(&mut fields, "number", number);
        if let Some(pages) = non_empty(&data.pages) {
            fields.push(("pages", escape(&pages.replace('-', "--").replace("----", "--"))));
        }
        push_escaped(&mut fields, "publisher", &data.publisher);
        push_escaped(&mut fields, "address", &data.place);
        push_escaped(&mut fields, "isbn", &data.isbn);
        push_escaped(&mut fields, "issn", &data.issn);

        // INVARIANT: Identifiers are verbatim, only braces would break the entry.
        for (name, value) in [("doi", &data.doi), ("url", &data.url)] {
            if let Some(value) = non_empty(value) {
                fields.push((name, value.replace(['{', '}'], "")));
            }
        }

        let _ = writeln!(out, "@{entry_type}{{{key},");
        for (name, value) in fields {
            let _ = writeln!(out, "  {name} = {{{value}}},");
        }
        out.push_str("}\n");
    }
}

fn push_escaped(fields: &mut Vec<(&str, String)>, name: &'static str, value: &Option<String>) {
    if let Some(value) = non_empty(value) {
        fields.push((name, escape(value)));
    }
}

fn join_names(creators: &[&Creator]) -> String {
    creators
        .iter()
        .map(|creator| match (non_empty(&creator.last_name), non_empty(&creator.first_name)) {
            (Some(last), Some(first)) => format!("{}, {}", escape(last), escape(first)),
            (Some(last), None) => escape(last),
            // INVARIANT: Protect organization names from being split by BibTeX.
            _ => format!("{{{}}}", escape(creator.family_name().unwrap_or_default())),
        })
        .collect::<Vec<_>>()
        .join(" and ")
}

/// Find first four digit year in a free form date.
fn find_year(date: &str) -> Option<&str> {
    let bytes = date.as_bytes();
    (0..bytes.len().saturating_sub(3)).find_map(|start| {
        let window = &bytes[start..start + 4];
        let bounded = (start == 0 || !bytes[start - 1].is_ascii_digit())
            && bytes.get(start + 4).is_none_or(|b| !b.is_ascii_digit());
        (bounded && window.iter().all(u8::is_ascii_digit)).then(|| &date[start..start + 4])
    })
}

/// Fold name into lower case ASCII letters and digits.
fn fold_ascii(name: &str, out: &mut String) {
    for c in name.chars().flat_map(char::to_lowercase) {
        match c {
            'a'..='z' | '0'..='9' => out.push(c),
            'à' | 'á' | 'â' | 'ã' | 'å' | 'ā' | 'ą' => out.push('a'),
            'ä' | 'æ' => out.push_str("ae"),
            'ç' | 'ć' | 'č' => out.push('c'),
            'ď' | 'đ' | 'ð' => out.push('d'),
            'è' | 'é' | 'ê' | 'ë' | 'ē' | 'ę' | 'ě' => out.push('e'),
            'ì' | 'í' | 'î' | 'ï' | 'ī' | 'ı' => out.push('i'),
            'ł' | 'ľ' | 'ĺ' => out.push('l'),
            'ñ' | 'ń' | 'ň' => out.push('n'),
            'ò' | 'ó' | 'ô' | 'õ' | 'ō' | 'ő' => out.push('o'),
            'ö' | 'ø' | 'œ' => out.push_str("oe"),
            'ř' | 'ŕ' => out.push('r'),
            'ß' => out.push_str("ss"),
            'ś' | 'š' | 'ş' => out.push('s'),
            'ť' | 'ţ' => out.push('t'),
            'ù' | 'ú' | 'û' | 'ū' | 'ů' | 'ű' => out.push('u'),
            'ü' => out.push_str("ue"),
            'ý' | 'ÿ' => out.push('y'),
            'ź' | 'ż' | 'ž' => out.push('z'),
            'þ' => out.push_str("th"),
            _ => {}
        }
    }
}

/// Suffix for the n-th colliding entry: a, b, ..., z, aa, ab, ...
fn alpha_suffix(mut index: usize) -> String {
    let mut suffix = Vec::new();
    loop {
        suffix.push(b'a' + (index % 26) as u8);
        if index < 26 {
            break;
        }
        index = index / 26 - 1;
    }
    suffix.reverse();
    String::from_utf8_lossy(&suffix).into_owned()
}

/// Escape characters that carry special meaning in LaTeX.
fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' | '%' | '$' | '#' | '_' | '{' | '}' => {
                out.push('\\');
                out.push(c);
            }
            '~' => out.push_str(r"\textasciitilde{}"),
            '^' => out.push_str(r"\textasciicircum{}"),
            '\\' => out.push_str(r"\textbackslash{}"),
            '\n' | '\r' | '\t' => out.push(' '),
            c => out.push(c),
        }
    }
    out
}
