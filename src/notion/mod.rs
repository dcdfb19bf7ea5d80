use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::fmt;
use tracing::{debug, warn};

use crate::model::Book;
use crate::notion::model::{BlockPage, QueryDatabaseResp, RetrieveDatabaseResp};

pub mod blocks;
pub mod model;

const NOTION_API_BASE: &str = "https://api.notion.com/";

/// Notion accepts at most this many children per append call.
pub const MAX_BLOCKS_PER_APPEND: usize = 100;

/// Page size used when listing child blocks.
pub const LIST_PAGE_SIZE: usize = 100;

#[derive(Clone)]
pub struct NotionClient {
    http: Client,
    base_url: Url,
    token: String,
    version: String,
}

/// Target database and property names of the book pages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotionIds {
    pub database_id: String,
    pub f_title: String,
    pub f_author: String,
    pub f_translator: String,
    pub f_category: String,
    pub f_cover: String,
    pub f_isbn: String,
    pub f_publisher: String,
    pub f_status: String,
    pub f_book_id: String,
    pub f_note_count: String,
}

impl fmt::Debug for NotionClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NotionClient")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// The sink operations the sync engine relies on.
#[async_trait]
pub trait NotionService: Send + Sync {
    /// First page whose title and author contain the given values.
    async fn query_page(&self, ids: &NotionIds, title: &str, author: &str)
        -> Result<Option<String>>;

    async fn create_page(&self, ids: &NotionIds, book: &Book) -> Result<String>;

    /// One page (at most [`LIST_PAGE_SIZE`]) of top-level children.
    async fn list_child_blocks(&self, block_id: &str, start_cursor: Option<&str>)
        -> Result<BlockPage>;

    /// Append at most [`MAX_BLOCKS_PER_APPEND`] children, at the end or right
    /// after the block `after`. Returns the ids of the created blocks in order.
    async fn append_child_blocks(
        &self,
        block_id: &str,
        children: &[Value],
        after: Option<&str>,
    ) -> Result<Vec<String>>;

    async fn delete_block(&self, block_id: &str) -> Result<()>;

    async fn list_database_fields(&self, database_id: &str) -> Result<Vec<String>>;
}

impl NotionClient {
    pub fn new(token: String, version: String) -> Self {
        let base_url = Url::parse(NOTION_API_BASE).expect("valid default Notion URL");
        Self::with_base_url(token, version, base_url)
    }

    pub fn with_base_url(token: String, version: String, base_url: Url) -> Self {
        let http = Client::builder()
            .user_agent("shelf-notion-sync/0.1")
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            token,
            version,
        }
    }

    pub fn build_request(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<reqwest::Request> {
        let endpoint = self
            .base_url
            .join(path)
            .context("invalid Notion base URL")?;
        let mut builder = self
            .http
            .request(method, endpoint)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Notion-Version", &self.version);
        if let Some(body) = body {
            builder = builder
                .header("Content-Type", "application/json")
                .json(body);
        }
        builder.build().context("failed to build Notion request")
    }

    async fn execute<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<&Value>,
    ) -> Result<T> {
        let request = self.build_request(method, path, body)?;
        debug!(method = %request.method(), url = %request.url(), "sending notion request");
        let res = self
            .http
            .execute(request)
            .await
            .context("failed to reach Notion")?;

        if res.status() == StatusCode::TOO_MANY_REQUESTS {
            let body = res.text().await.unwrap_or_default();
            warn!("rate limited by Notion: {}", body);
            return Err(anyhow!("received 429 from Notion: {}", body));
        }
        if !res.status().is_success() {
            let status = res.status();
            let body = res.text().await.unwrap_or_default();
            return Err(anyhow!("notion error {}: {}", status, body));
        }

        res.json::<T>().await.context("invalid Notion response")
    }

    pub async fn retrieve_database(&self, database_id: &str) -> Result<RetrieveDatabaseResp> {
        self.execute(Method::GET, &format!("v1/databases/{}", database_id), None)
            .await
            .context("failed to retrieve database schema")
    }
}

#[async_trait]
impl NotionService for NotionClient {
    async fn query_page(
        &self,
        ids: &NotionIds,
        title: &str,
        author: &str,
    ) -> Result<Option<String>> {
        let body = build_query_request(ids, title, author);
        let resp: QueryDatabaseResp = self
            .execute(
                Method::POST,
                &format!("v1/databases/{}/query", ids.database_id),
                Some(&body),
            )
            .await?;
        Ok(resp.results.into_iter().next().map(|p| p.id))
    }

    async fn create_page(&self, ids: &NotionIds, book: &Book) -> Result<String> {
        let body = build_book_page_request(ids, book);
        let resp: model::PageRef = self.execute(Method::POST, "v1/pages", Some(&body)).await?;
        Ok(resp.id)
    }

    async fn list_child_blocks(
        &self,
        block_id: &str,
        start_cursor: Option<&str>,
    ) -> Result<BlockPage> {
        let mut path = format!("v1/blocks/{}/children?page_size={}", block_id, LIST_PAGE_SIZE);
        if let Some(cursor) = start_cursor {
            path.push_str("&start_cursor=");
            path.push_str(cursor);
        }
        self.execute(Method::GET, &path, None).await
    }

    async fn append_child_blocks(
        &self,
        block_id: &str,
        children: &[Value],
        after: Option<&str>,
    ) -> Result<Vec<String>> {
        if children.len() > MAX_BLOCKS_PER_APPEND {
            bail!(
                "cannot append {} blocks in one call (max {})",
                children.len(),
                MAX_BLOCKS_PER_APPEND
            );
        }
        let body = build_append_request(children, after);
        let resp: model::AppendedBlocks = self
            .execute(
                Method::PATCH,
                &format!("v1/blocks/{}/children", block_id),
                Some(&body),
            )
            .await?;
        Ok(resp.results.into_iter().map(|b| b.id).collect())
    }

    async fn delete_block(&self, block_id: &str) -> Result<()> {
        let _: Value = self
            .execute(Method::DELETE, &format!("v1/blocks/{}", block_id), None)
            .await?;
        Ok(())
    }

    async fn list_database_fields(&self, database_id: &str) -> Result<Vec<String>> {
        let db = self.retrieve_database(database_id).await?;
        let mut names: Vec<String> = db.properties.into_keys().collect();
        names.sort();
        Ok(names)
    }
}

fn rich_text(content: &str) -> Value {
    json!({
        "rich_text": [
            {
                "type": "text",
                "text": { "content": content }
            }
        ]
    })
}

pub fn build_append_request(children: &[Value], after: Option<&str>) -> Value {
    let mut body = json!({ "children": children });
    if let Some(after) = after {
        body["after"] = json!(after);
    }
    body
}

pub fn build_query_request(ids: &NotionIds, title: &str, author: &str) -> Value {
    let author = if author.is_empty() { "Unknown author" } else { author };
    json!({
        "filter": {
            "and": [
                { "property": ids.f_title, "title": { "contains": title } },
                { "property": ids.f_author, "rich_text": { "contains": author } }
            ]
        }
    })
}

pub fn build_book_page_request(ids: &NotionIds, book: &Book) -> Value {
    let mut properties = Map::new();
    properties.insert(
        ids.f_title.clone(),
        json!({
            "title": [
                {
                    "type": "text",
                    "text": { "content": book.title }
                }
            ]
        }),
    );

    let author = if book.author.is_empty() {
        "Unknown author"
    } else {
        book.author.as_str()
    };
    properties.insert(ids.f_author.clone(), rich_text(author));
    properties.insert(ids.f_translator.clone(), rich_text(&book.translator));
    properties.insert(ids.f_category.clone(), rich_text(&book.category));
    properties.insert(ids.f_isbn.clone(), rich_text(&book.isbn));
    properties.insert(ids.f_publisher.clone(), rich_text(&book.publisher));
    properties.insert(ids.f_book_id.clone(), rich_text(&book.book_id));

    if !book.cover.is_empty() {
        properties.insert(
            ids.f_cover.clone(),
            json!({
                "files": [
                    {
                        "type": "external",
                        "name": format!("{}-cover", book.title),
                        "external": { "url": book.cover }
                    }
                ]
            }),
        );
    }

    properties.insert(
        ids.f_status.clone(),
        json!({ "select": { "name": book.status.as_str() } }),
    );
    properties.insert(
        ids.f_note_count.clone(),
        json!({ "number": book.note_count }),
    );

    json!({
        "parent": { "database_id": ids.database_id },
        "properties": Value::Object(properties),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Provenance, ReadStatus};

    fn sample_ids() -> NotionIds {
        NotionIds {
            database_id: "book-db".into(),
            f_title: "title".into(),
            f_author: "author".into(),
            f_translator: "translator".into(),
            f_category: "category".into(),
            f_cover: "cover".into(),
            f_isbn: "isbn".into(),
            f_publisher: "publisher".into(),
            f_status: "status".into(),
            f_book_id: "book-id".into(),
            f_note_count: "notes".into(),
        }
    }

    fn sample_book() -> Book {
        Book {
            book_id: "b1".into(),
            title: "Dune".into(),
            author: "".into(),
            translator: "".into(),
            category: "SF".into(),
            cover: "https://cdn/dune.jpg".into(),
            isbn: "978".into(),
            publisher: "Ace".into(),
            status: ReadStatus::Done,
            has_notes: true,
            note_count: 4,
            provenance: vec![Provenance::Shelf, Provenance::Notes],
        }
    }

    #[test]
    fn book_page_request_maps_properties() {
        let body = build_book_page_request(&sample_ids(), &sample_book());
        assert_eq!(body["parent"]["database_id"], "book-db");
        assert_eq!(body["properties"]["title"]["title"][0]["text"]["content"], "Dune");
        assert_eq!(
            body["properties"]["author"]["rich_text"][0]["text"]["content"],
            "Unknown author"
        );
        assert_eq!(body["properties"]["status"]["select"]["name"], "done");
        assert_eq!(body["properties"]["notes"]["number"], 4);
        assert_eq!(
            body["properties"]["cover"]["files"][0]["external"]["url"],
            "https://cdn/dune.jpg"
        );
    }

    #[test]
    fn book_page_request_omits_empty_cover() {
        let mut book = sample_book();
        book.cover.clear();
        let body = build_book_page_request(&sample_ids(), &book);
        assert!(body["properties"].get("cover").is_none());
    }

    #[test]
    fn query_request_filters_on_title_and_author() {
        let body = build_query_request(&sample_ids(), "Dune", "Herbert");
        assert_eq!(body["filter"]["and"][0]["property"], "title");
        assert_eq!(body["filter"]["and"][0]["title"]["contains"], "Dune");
        assert_eq!(body["filter"]["and"][1]["rich_text"]["contains"], "Herbert");
    }

    #[test]
    fn build_request_sets_headers() {
        let client = NotionClient::new("token".into(), "2022-06-28".into());
        let body = json!({ "sample": true });
        let request = client
            .build_request(Method::PATCH, "v1/blocks/abc/children", Some(&body))
            .unwrap();
        assert_eq!(request.method(), Method::PATCH);
        assert_eq!(request.url().path(), "/v1/blocks/abc/children");
        let headers = request.headers();
        assert_eq!(
            headers
                .get("Authorization")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "Bearer token"
        );
        assert_eq!(
            headers
                .get("Notion-Version")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "2022-06-28"
        );
        assert_eq!(
            headers
                .get("Content-Type")
                .and_then(|h| h.to_str().ok())
                .unwrap(),
            "application/json"
        );
    }

    #[test]
    fn bodiless_request_has_no_content_type() {
        let client = NotionClient::new("token".into(), "2022-06-28".into());
        let request = client
            .build_request(Method::DELETE, "v1/blocks/abc", None)
            .unwrap();
        assert!(request.headers().get("Content-Type").is_none());
    }

    #[tokio::test]
    async fn oversized_append_is_rejected_before_sending() {
        let client = NotionClient::new("token".into(), "2022-06-28".into());
        let blocks = vec![blocks::divider(); MAX_BLOCKS_PER_APPEND + 1];
        let err = client
            .append_child_blocks("page", &blocks, None)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("max 100"));
    }

    #[test]
    fn append_request_carries_anchor_only_when_given() {
        let children = vec![blocks::divider()];
        let body = build_append_request(&children, None);
        assert!(body.get("after").is_none());
        assert_eq!(body["children"].as_array().unwrap().len(), 1);
        let body = build_append_request(&children, Some("blk-9"));
        assert_eq!(body["after"], "blk-9");
    }
}
