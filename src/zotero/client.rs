// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Zotero web API client.
//!
//! Fetches the items of a library or collection. Responses are paginated
//! through the `Link` header, which is followed until no `rel="next"` page is
//! left. When a collection is requested, all of its subcollections are walked
//! too, mirroring what the Zotero web interface shows for that collection.

use crate::zotero::{item::Item, library::LibraryRef, Result, ZoteroError};

use reqwest::{
    header::{HeaderMap, LINK},
    Client, Response, StatusCode,
};
use serde::{de::DeserializeOwned, Deserialize};
use std::collections::{HashSet, VecDeque};
use tracing::{debug, info, instrument};

/// Root of the public Zotero web API.
pub const DEFAULT_API_URL: &str = "https://api.zotero.org";

/// Maximum amount of records the web API hands out per page.
pub const PAGE_LIMIT: usize = 100;

const API_VERSION: &str = "3";

/// Client for the Zotero web API.
#[derive(Debug, Clone)]
pub struct ZoteroClient {
    http: Client,
    base_url: String,
}

impl ZoteroClient {
    /// Construct new client for the public Zotero web API.
    ///
    /// # Errors
    ///
    /// - Return [`ZoteroError::Http`] if the HTTP client cannot be set up.
    pub fn new() -> Result<Self> {
        Self::with_base_url(DEFAULT_API_URL)
    }

    /// Construct new client for a web API served from a different root.
    ///
    /// # Errors
    ///
    /// - Return [`ZoteroError::Http`] if the HTTP client cannot be set up.
    pub fn with_base_url(base_url: impl Into<String>) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("bibsync/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Fetch all bibliographic items of a library or collection.
    ///
    /// Items of every subcollection below a requested collection are included.
    /// Items filed in more than one collection are only returned once. Notes
    /// and attachments are left out. Order follows the order in which the web
    /// API returns items.
    ///
    /// # Errors
    ///
    /// - Return [`ZoteroError::MissingApiKey`] if a user library referenced
    ///   by name cannot be resolved without an API key.
    /// - Return [`ZoteroError::KeyOwnerMismatch`] if the API key belongs to
    ///   another user than the one named in the library URL.
    /// - Return [`ZoteroError::Auth`] if access is denied.
    /// - Return [`ZoteroError::NotFound`] if library or collection is missing.
    /// - Return [`ZoteroError::Transient`] on network or server failure.
    /// - Return [`ZoteroError::Decode`] if a response cannot be decoded.
    #[instrument(skip(self, library, api_key), fields(library = %library), level = "debug")]
    pub async fn fetch_items(
        &self,
        library: &LibraryRef,
        api_key: Option<&str>,
    ) -> Result<Vec<Item>> {
        let library = self.resolve_library(library, api_key).await?;
        let prefix = library.api_path();

        let endpoints = match library.collection() {
            Some(collection) => {
                let mut collections = vec![collection.to_string()];
                collections.extend(
                    self.fetch_subcollections(&prefix, collection, api_key)
                        .await?,
                );
                collections
                    .into_iter()
                    .map(|key| format!("{}/{prefix}/collections/{key}/items/top", self.base_url))
                    .collect::<Vec<_>>()
            }
            None => vec![format!("{}/{prefix}/items/top", self.base_url)],
        };

        let mut seen = HashSet::new();
        let mut items = Vec::new();
        for endpoint in endpoints {
            for item in self.get_all::<Item>(&endpoint, api_key).await? {
                if !item.is_bibliographic() {
                    debug!("skip {} item {}", item.data.item_type, item.key);
                    continue;
                }

                // INVARIANT: Items filed in several collections are only kept once.
                if seen.insert(item.key.clone()) {
                    items.push(item);
                }
            }
        }

        info!("fetched {} items from {library}", items.len());
        Ok(items)
    }

    /// Look up the owner of an API key.
    ///
    /// # Errors
    ///
    /// - Return [`ZoteroError::Auth`] if the key is unknown.
    /// - Return [`ZoteroError::Transient`] on network or server failure.
    /// - Return [`ZoteroError::Decode`] if the response cannot be decoded.
    #[instrument(skip(self, api_key), level = "debug")]
    pub async fn fetch_key_info(&self, api_key: &str) -> Result<KeyInfo> {
        let url = format!("{}/keys/current", self.base_url);
        let response = self.get(&url, Some(api_key)).await?;
        response
            .json::<KeyInfo>()
            .await
            .map_err(|source| ZoteroError::Decode { source, url })
    }

    async fn resolve_library(
        &self,
        library: &LibraryRef,
        api_key: Option<&str>,
    ) -> Result<LibraryRef> {
        if !library.is_named_user() {
            return Ok(library.clone());
        }

        let api_key = api_key.ok_or_else(|| ZoteroError::MissingApiKey {
            name: library.id().to_string(),
        })?;
        let key = self.fetch_key_info(api_key).await?;
        // INVARIANT: A named user link only ever reads that user's library.
        if !key.username.eq_ignore_ascii_case(library.id()) {
            return Err(ZoteroError::KeyOwnerMismatch {
                name: library.id().to_string(),
                owner: key.username,
            });
        }

        debug!("resolved user {:?} to user id {}", library.id(), key.user_id);
        Ok(library.with_id(key.user_id.to_string()))
    }

    async fn fetch_subcollections(
        &self,
        prefix: &str,
        parent: &str,
        api_key: Option<&str>,
    ) -> Result<Vec<String>> {
        let mut found: Vec<String> = Vec::new();
        let mut pending = VecDeque::from([parent.to_string()]);

        // Use BFS to walk the collection tree.
        while let Some(key) = pending.pop_front() {
            let url = format!("{}/{prefix}/collections/{key}/collections", self.base_url);
            for collection in self.get_all::<CollectionRecord>(&url, api_key).await? {
                // INVARIANT: Visit every collection once, even if the tree is malformed.
                if collection.key != parent && !found.contains(&collection.key) {
                    pending.push_back(collection.key.clone());
                    found.push(collection.key);
                }
            }
        }

        debug!("collection {parent} has {} subcollections", found.len());
        Ok(found)
    }

    async fn get_all<T>(&self, endpoint: &str, api_key: Option<&str>) -> Result<Vec<T>>
    where
        T: DeserializeOwned,
    {
        let mut records = Vec::new();
        let mut next = Some(format!("{endpoint}?format=json&limit={PAGE_LIMIT}"));

        while let Some(url) = next.take() {
            let response = self.get(&url, api_key).await?;
            next = next_page(response.headers());

            let page: Vec<T> = response
                .json()
                .await
                .map_err(|source| ZoteroError::Decode {
                    source,
                    url: url.clone(),
                })?;
            debug!("received {} records from {url}", page.len());
            records.extend(page);
        }

        Ok(records)
    }

    async fn get(&self, url: &str, api_key: Option<&str>) -> Result<Response> {
        let mut request = self
            .http
            .get(url)
            .header("Zotero-API-Version", API_VERSION);
        if let Some(api_key) = api_key {
            request = request.header("Zotero-API-Key", api_key);
        }

        let response = request.send().await.map_err(|err| {
            if err.is_builder() {
                ZoteroError::Http(err)
            } else {
                ZoteroError::Transient {
                    url: url.to_string(),
                    reason: err.to_string(),
                }
            }
        })?;

        check_status(url, response)
    }
}

/// Owner of an API key.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct KeyInfo {
    #[serde(rename = "userID")]
    pub user_id: u64,

    #[serde(default)]
    pub username: String,
}

#[derive(Debug, Deserialize)]
struct CollectionRecord {
    key: String,
}

fn check_status(url: &str, response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let url = url.to_string();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(ZoteroError::Auth { url }),
        StatusCode::NOT_FOUND => Err(ZoteroError::NotFound { url }),
        StatusCode::TOO_MANY_REQUESTS => Err(ZoteroError::Transient {
            url,
            reason: "rate limited".into(),
        }),
        status if status.is_server_error() => Err(ZoteroError::Transient {
            url,
            reason: format!("server answered {status}"),
        }),
        status => Err(ZoteroError::UnexpectedStatus {
            url,
            status: status.as_u16(),
        }),
    }
}

/// Extract URL of next page from a `Link` header.
fn next_page(headers: &HeaderMap) -> Option<String> {
    let links = headers.get(LINK)?.to_str().ok()?;
    links.split(',').find_map(|link| {
        let mut parts = link.split(';');
        let target = parts
            .next()?
            .trim()
            .strip_prefix('<')?
            .strip_suffix('>')?;
        parts
            .any(|param| param.trim() == r#"rel="next""#)
            .then(|| target.to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bibtex;
    use pretty_assertions::assert_eq;
    use reqwest::header::HeaderValue;
    use serde_json::{json, Value};
    use wiremock::{
        matchers::{header, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    fn item_json(key: &str, title: Option<&str>, last_name: &str, date: &str) -> Value {
        json!({
            "key": key,
            "version": 7,
            "data": {
                "key": key,
                "itemType": "journalArticle",
                "title": title.unwrap_or(""),
                "creators": [
                    { "creatorType": "author", "firstName": "Ann", "lastName": last_name }
                ],
                "date": date,
                "publicationTitle": "Journal of Tests"
            }
        })
    }

    fn keys(items: &[Item]) -> Vec<&str> {
        items.iter().map(|item| item.key.as_str()).collect()
    }

    #[tokio::test]
    async fn fetch_items_follows_pagination() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        let next = format!(
            r#"<{}/groups/99/items/top?format=json&limit=100&start=100>; rel="next", <{}/groups/99/items/top?format=json&limit=100&start=100>; rel="last""#,
            server.uri(),
            server.uri(),
        );
        Mock::given(method("GET"))
            .and(path("/groups/99/items/top"))
            .and(query_param("start", "100"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                item_json("CCCC3333", Some("Third"), "Cole", "2021"),
            ])))
            .with_priority(1)
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/groups/99/items/top"))
            .and(query_param("limit", "100"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("Link", next.as_str())
                    .set_body_json(json!([
                        item_json("AAAA1111", Some("First"), "Abel", "2019"),
                        item_json("BBBB2222", Some("Second"), "Baker", "2020"),
                    ])),
            )
            .with_priority(2)
            .mount(&server)
            .await;

        let client = ZoteroClient::with_base_url(server.uri())?;
        let library: LibraryRef = "https://www.zotero.org/groups/99/lab/library".parse()?;
        let items = client.fetch_items(&library, None).await?;

        assert_eq!(keys(&items), vec!["AAAA1111", "BBBB2222", "CCCC3333"]);

        Ok(())
    }

    #[tokio::test]
    async fn fetch_items_walks_subcollections() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        let mut note = item_json("NOTE0000", None, "", "");
        note["data"]["itemType"] = json!("note");

        for (collection, children, items) in [
            (
                "ROOT0000",
                json!([{ "key": "SUB00001" }]),
                json!([
                    item_json("AAAA1111", Some("First"), "Abel", "2019"),
                    item_json("BBBB2222", Some("Second"), "Baker", "2020"),
                ]),
            ),
            (
                "SUB00001",
                json!([]),
                json!([
                    item_json("BBBB2222", Some("Second"), "Baker", "2020"),
                    item_json("CCCC3333", Some("Third"), "Cole", "2021"),
                    note,
                ]),
            ),
        ] {
            Mock::given(method("GET"))
                .and(path(format!("/users/7/collections/{collection}/collections")))
                .respond_with(ResponseTemplate::new(200).set_body_json(children))
                .mount(&server)
                .await;
            Mock::given(method("GET"))
                .and(path(format!("/users/7/collections/{collection}/items/top")))
                .respond_with(ResponseTemplate::new(200).set_body_json(items))
                .mount(&server)
                .await;
        }

        let client = ZoteroClient::with_base_url(server.uri())?;
        let library: LibraryRef = "https://www.zotero.org/7/collections/ROOT0000".parse()?;
        let items = client.fetch_items(&library, None).await?;

        assert_eq!(keys(&items), vec!["AAAA1111", "BBBB2222", "CCCC3333"]);

        Ok(())
    }

    #[tokio::test]
    async fn fetch_then_format_named_user_collection() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/keys/current"))
            .and(header("Zotero-API-Key", "s3cret"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "key": "s3cret", "userID": 475425, "username": "alice" })),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/475425/collections/ABC123/collections"))
            .and(header("Zotero-API-Key", "s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/475425/collections/ABC123/items/top"))
            .and(header("Zotero-API-Key", "s3cret"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                item_json("GOOD0001", Some("A Complete Record"), "Turing", "1950"),
                item_json("BAD00002", None, "Hopper", "1952"),
            ])))
            .mount(&server)
            .await;

        let client = ZoteroClient::with_base_url(server.uri())?;
        let library: LibraryRef = "https://www.zotero.org/alice/collections/ABC123".parse()?;
        let items = client.fetch_items(&library, Some("s3cret")).await?;
        let bibliography = bibtex::format(&items);

        assert_eq!(items.len(), 2);
        assert_eq!(bibliography.entries(), 1);
        assert_eq!(bibliography.warnings().len(), 1);
        assert_eq!(bibliography.warnings()[0].item_key, "BAD00002");
        assert!(bibliography.content().contains("@article{turing1950,"));

        Ok(())
    }

    #[tokio::test]
    async fn named_user_without_api_key() -> anyhow::Result<()> {
        let client = ZoteroClient::with_base_url("http://127.0.0.1:9")?;
        let library: LibraryRef = "https://www.zotero.org/alice/library".parse()?;
        let result = client.fetch_items(&library, None).await;

        assert!(matches!(result, Err(ZoteroError::MissingApiKey { .. })));

        Ok(())
    }

    #[tokio::test]
    async fn api_key_of_another_user_is_rejected() -> anyhow::Result<()> {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/keys/current"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "key": "s3cret", "userID": 999, "username": "bob" })),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/users/999/items/top"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                item_json("BOB00001", Some("Not Alice's"), "Bobson", "2020"),
            ])))
            .expect(0)
            .mount(&server)
            .await;

        let client = ZoteroClient::with_base_url(server.uri())?;
        let library: LibraryRef = "https://www.zotero.org/alice/library".parse()?;
        let result = client.fetch_items(&library, Some("s3cret")).await;

        assert!(matches!(
            result,
            Err(ZoteroError::KeyOwnerMismatch { ref name, ref owner }) if name == "alice" && owner == "bob"
        ));

        Ok(())
    }

    #[test]
    fn base_url_loses_trailing_slash() -> anyhow::Result<()> {
        let client = ZoteroClient::with_base_url("http://127.0.0.1:9/")?;
        assert_eq!(client.base_url, "http://127.0.0.1:9");
        assert_eq!(ZoteroClient::new()?.base_url, DEFAULT_API_URL);

        Ok(())
    }

    #[tokio::test]
    async fn error_statuses_are_classified() -> anyhow::Result<()> {
        let library: LibraryRef = "https://www.zotero.org/12345/library".parse()?;
        for status in [403, 404, 503, 429, 400] {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/users/12345/items/top"))
                .respond_with(ResponseTemplate::new(status))
                .mount(&server)
                .await;

            let client = ZoteroClient::with_base_url(server.uri())?;
            let result = client.fetch_items(&library, Some("key")).await;
            match (status, result) {
                (403, Err(ZoteroError::Auth { .. })) => {}
                (404, Err(ZoteroError::NotFound { .. })) => {}
                (503 | 429, Err(err @ ZoteroError::Transient { .. })) => {
                    assert!(err.is_transient());
                }
                (400, Err(ZoteroError::UnexpectedStatus { status: 400, .. })) => {}
                (status, result) => panic!("status {status} classified as {result:?}"),
            }
        }

        Ok(())
    }

    #[test]
    fn next_page_from_link_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            LINK,
            HeaderValue::from_static(
                r#"<https://api.zotero.org/users/1/items?start=0>; rel="first", <https://api.zotero.org/users/1/items?start=25>; rel="next""#,
            ),
        );
        assert_eq!(
            next_page(&headers),
            Some("https://api.zotero.org/users/1/items?start=25".to_string())
        );

        headers.insert(
            LINK,
            HeaderValue::from_static(r#"<https://api.zotero.org/users/1/items?start=0>; rel="first""#),
        );
        assert_eq!(next_page(&headers), None);
        assert_eq!(next_page(&HeaderMap::new()), None);
    }
}
