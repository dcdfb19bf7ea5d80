#![allow(dead_code)]

use anyhow::{anyhow, Result};
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

use shelf_notion_sync::config::{self, Config};
use shelf_notion_sync::db::{self, CursorStore};
use shelf_notion_sync::model::{Book, StreamKind};
use shelf_notion_sync::notion::blocks::block_text;
use shelf_notion_sync::notion::model::{Block, BlockPage};
use shelf_notion_sync::notion::{NotionIds, NotionService};
use shelf_notion_sync::sync::{Pacing, RetryPolicy, SyncContext};
use shelf_notion_sync::upstream::{
    BookDetail, NotebookEntry, Session, ShelfBook, UpstreamError, UpstreamResult, UpstreamSource,
};

pub fn test_config() -> Config {
    serde_yaml::from_str(config::example()).unwrap()
}

pub async fn setup_store() -> CursorStore {
    let pool = db::init_pool("sqlite::memory:").await.unwrap();
    db::run_migrations(&pool).await.unwrap();
    CursorStore::new(pool)
}

pub fn context<'a>(
    upstream: &'a ScriptedUpstream,
    sink: &'a InMemoryNotion,
    store: &'a CursorStore,
    ids: &'a NotionIds,
    cfg: &'a Config,
) -> SyncContext<'a> {
    SyncContext {
        upstream,
        sink,
        store,
        ids,
        sections: &cfg.notion.sections,
        pacing: Pacing::none(),
        retry: RetryPolicy::new(2).with_initial_delay(std::time::Duration::ZERO),
    }
}

// ---------------------------------------------------------------------------
// Notion

#[derive(Debug, Clone)]
pub struct PageRecord {
    pub id: String,
    pub title: String,
    pub author: String,
    pub blocks: Vec<(String, Value)>,
}

#[derive(Default)]
struct NotionState {
    pages: Vec<PageRecord>,
    next_id: usize,
    append_calls: Vec<usize>,
    delete_calls: Vec<String>,
    fail_deletes: HashSet<String>,
    fail_append_on_call: Option<usize>,
    fail_create: bool,
    fields: Vec<String>,
}

/// A Notion database held in memory. Pages are appended to and listed the way
/// the API does it.
#[derive(Clone)]
pub struct InMemoryNotion {
    state: Arc<Mutex<NotionState>>,
    pub list_page_size: usize,
}

impl InMemoryNotion {
    pub fn new() -> Self {
        Self {
            state: Arc::default(),
            list_page_size: 100,
        }
    }

    pub async fn set_fields(&self, fields: &[&str]) {
        self.state.lock().await.fields = fields.iter().map(|s| s.to_string()).collect();
    }

    pub async fn fail_create(&self) {
        self.state.lock().await.fail_create = true;
    }

    /// Fail the n-th (0-indexed) append call from now on.
    pub async fn fail_append_on_call(&self, n: usize) {
        let mut s = self.state.lock().await;
        let offset = s.append_calls.len();
        s.fail_append_on_call = Some(offset + n);
    }

    pub async fn fail_delete_of(&self, block_id: &str) {
        self.state.lock().await.fail_deletes.insert(block_id.to_string());
    }

    pub async fn pages(&self) -> Vec<PageRecord> {
        self.state.lock().await.pages.clone()
    }

    pub async fn append_calls(&self) -> Vec<usize> {
        self.state.lock().await.append_calls.clone()
    }

    pub async fn delete_calls(&self) -> Vec<String> {
        self.state.lock().await.delete_calls.clone()
    }

    /// Seed a page with existing blocks; returns the page id.
    pub async fn seed_page(&self, title: &str, author: &str, blocks: Vec<Value>) -> String {
        let mut s = self.state.lock().await;
        let id = format!("page-{}", s.next_id);
        s.next_id += 1;
        let mut page = PageRecord {
            id: id.clone(),
            title: title.into(),
            author: author.into(),
            blocks: Vec::new(),
        };
        for b in blocks {
            let bid = format!("blk-{}", s.next_id);
            s.next_id += 1;
            page.blocks.push((bid, b));
        }
        s.pages.push(page);
        id
    }

    /// `(type, text)` of every block of the page, in order.
    pub async fn outline(&self, page_id: &str) -> Vec<(String, String)> {
        let s = self.state.lock().await;
        s.pages
            .iter()
            .find(|p| p.id == page_id)
            .map(|p| {
                p.blocks
                    .iter()
                    .map(|(_, b)| {
                        (
                            b["type"].as_str().unwrap_or_default().to_string(),
                            block_text(b),
                        )
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl NotionService for InMemoryNotion {
    async fn query_page(&self, _ids: &NotionIds, title: &str, author: &str) -> Result<Option<String>> {
        let author = if author.is_empty() { "Unknown author" } else { author };
        let s = self.state.lock().await;
        Ok(s.pages
            .iter()
            .find(|p| p.title.contains(title) && p.author.contains(author))
            .map(|p| p.id.clone()))
    }

    async fn create_page(&self, _ids: &NotionIds, book: &Book) -> Result<String> {
        let mut s = self.state.lock().await;
        if s.fail_create {
            return Err(anyhow!("create failed"));
        }
        let id = format!("page-{}", s.next_id);
        s.next_id += 1;
        let author = if book.author.is_empty() {
            "Unknown author".to_string()
        } else {
            book.author.clone()
        };
        s.pages.push(PageRecord {
            id: id.clone(),
            title: book.title.clone(),
            author,
            blocks: Vec::new(),
        });
        Ok(id)
    }

    async fn list_child_blocks(&self, block_id: &str, start_cursor: Option<&str>) -> Result<BlockPage> {
        let s = self.state.lock().await;
        let page = s
            .pages
            .iter()
            .find(|p| p.id == block_id)
            .ok_or_else(|| anyhow!("no such page {}", block_id))?;
        let start: usize = start_cursor.map(|c| c.parse().unwrap()).unwrap_or(0);
        let end = (start + self.list_page_size).min(page.blocks.len());
        let results = page.blocks[start..end]
            .iter()
            .map(|(id, b)| {
                let mut v = b.clone();
                v["id"] = json!(id);
                serde_json::from_value::<Block>(v).unwrap()
            })
            .collect();
        let has_more = end < page.blocks.len();
        Ok(BlockPage {
            results,
            has_more,
            next_cursor: has_more.then(|| end.to_string()),
        })
    }

    async fn append_child_blocks(
        &self,
        block_id: &str,
        children: &[Value],
        after: Option<&str>,
    ) -> Result<Vec<String>> {
        let mut s = self.state.lock().await;
        let call = s.append_calls.len();
        s.append_calls.push(children.len());
        if s.fail_append_on_call == Some(call) {
            return Err(anyhow!("append failed"));
        }
        if children.len() > 100 {
            return Err(anyhow!("too many children"));
        }
        let mut next = s.next_id;
        let new_blocks: Vec<(String, Value)> = children
            .iter()
            .map(|c| {
                next += 1;
                (format!("blk-{}", next), c.clone())
            })
            .collect();
        s.next_id = next + 1;
        let created: Vec<String> = new_blocks.iter().map(|(id, _)| id.clone()).collect();
        let page = s
            .pages
            .iter_mut()
            .find(|p| p.id == block_id)
            .ok_or_else(|| anyhow!("no such page {}", block_id))?;
        let at = match after {
            None => page.blocks.len(),
            Some(anchor) => {
                page.blocks
                    .iter()
                    .position(|(id, _)| id == anchor)
                    .ok_or_else(|| anyhow!("no such block {}", anchor))?
                    + 1
            }
        };
        page.blocks.splice(at..at, new_blocks);
        Ok(created)
    }

    async fn delete_block(&self, block_id: &str) -> Result<()> {
        let mut s = self.state.lock().await;
        s.delete_calls.push(block_id.to_string());
        if s.fail_deletes.contains(block_id) {
            return Err(anyhow!("delete failed"));
        }
        for page in s.pages.iter_mut() {
            page.blocks.retain(|(id, _)| id != block_id);
        }
        Ok(())
    }

    async fn list_database_fields(&self, _database_id: &str) -> Result<Vec<String>> {
        Ok(self.state.lock().await.fields.clone())
    }
}

// ---------------------------------------------------------------------------
// Upstream

#[derive(Debug, Clone)]
pub enum Reply {
    Payload(Value),
    Empty,
    Expired,
    ServerError,
}

impl Reply {
    fn into_result(self) -> UpstreamResult<Option<Value>> {
        match self {
            Reply::Payload(v) => Ok(Some(v)),
            Reply::Empty => Ok(None),
            Reply::Expired => Err(UpstreamError::SessionExpired),
            Reply::ServerError => Err(UpstreamError::Api {
                code: -1,
                message: "boom".into(),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeCall {
    pub book_id: String,
    pub cursor: String,
    pub kind: StreamKind,
    pub cookie: String,
}

#[derive(Default)]
struct UpstreamState {
    shelf: Vec<ShelfBook>,
    notebook: Vec<NotebookEntry>,
    details: HashMap<String, BookDetail>,
    scripted: HashMap<(String, StreamKind), VecDeque<Reply>>,
    fallback: HashMap<(String, StreamKind), Reply>,
    change_calls: Vec<ChangeCall>,
    refreshes: usize,
    shelf_replies: VecDeque<Reply>,
}

/// Upstream that answers from scripted replies and records every call.
#[derive(Clone, Default)]
pub struct ScriptedUpstream {
    state: Arc<Mutex<UpstreamState>>,
}

impl ScriptedUpstream {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_shelf(&self, book: ShelfBook) {
        self.state.lock().await.shelf.push(book);
    }

    pub async fn add_notebook(&self, entry: NotebookEntry) {
        self.state.lock().await.notebook.push(entry);
    }

    pub async fn add_detail(&self, id: &str, detail: BookDetail) {
        self.state.lock().await.details.insert(id.to_string(), detail);
    }

    /// Replies served in order before falling back to `always`.
    pub async fn script(&self, id: &str, kind: StreamKind, replies: Vec<Reply>) {
        self.state
            .lock()
            .await
            .scripted
            .entry((id.to_string(), kind))
            .or_default()
            .extend(replies);
    }

    pub async fn always(&self, id: &str, kind: StreamKind, reply: Reply) {
        self.state
            .lock()
            .await
            .fallback
            .insert((id.to_string(), kind), reply);
    }

    pub async fn script_shelf(&self, replies: Vec<Reply>) {
        self.state.lock().await.shelf_replies.extend(replies);
    }

    pub async fn change_calls(&self) -> Vec<ChangeCall> {
        self.state.lock().await.change_calls.clone()
    }

    pub async fn refreshes(&self) -> usize {
        self.state.lock().await.refreshes
    }
}

#[async_trait::async_trait]
impl UpstreamSource for ScriptedUpstream {
    async fn list_by_ownership(&self, _session: &Session) -> UpstreamResult<Vec<ShelfBook>> {
        let mut s = self.state.lock().await;
        if let Some(reply) = s.shelf_replies.pop_front() {
            reply.into_result()?;
        }
        Ok(s.shelf.clone())
    }

    async fn list_by_annotation_presence(&self, _session: &Session) -> UpstreamResult<Vec<NotebookEntry>> {
        Ok(self.state.lock().await.notebook.clone())
    }

    async fn get_entity_detail(&self, _session: &Session, book_id: &str) -> UpstreamResult<Option<BookDetail>> {
        Ok(self.state.lock().await.details.get(book_id).cloned())
    }

    async fn get_changes_since(
        &self,
        session: &Session,
        book_id: &str,
        cursor: &str,
        kind: StreamKind,
    ) -> UpstreamResult<Option<Value>> {
        let mut s = self.state.lock().await;
        s.change_calls.push(ChangeCall {
            book_id: book_id.to_string(),
            cursor: cursor.to_string(),
            kind,
            cookie: session.cookie().to_string(),
        });
        let key = (book_id.to_string(), kind);
        let scripted = s.scripted.get_mut(&key).and_then(VecDeque::pop_front);
        let reply = scripted
            .or_else(|| s.fallback.get(&key).cloned())
            .unwrap_or(Reply::Empty);
        reply.into_result()
    }

    async fn refresh_session(&self, session: &Session) -> UpstreamResult<Session> {
        let mut s = self.state.lock().await;
        s.refreshes += 1;
        let cookie = format!("wr_skey=refreshed-{}", s.refreshes);
        Ok(session.with_set_cookies([cookie.as_str()]))
    }
}

// ---------------------------------------------------------------------------
// Payload helpers

pub fn shelf_book(id: &str, title: &str, author: &str) -> ShelfBook {
    ShelfBook {
        book_id: Some(id.into()),
        title: Some(title.into()),
        author: Some(author.into()),
        finish_reading: Some(false),
        ..Default::default()
    }
}

pub fn highlights(synckey: &str, marks: &[(i64, &str)]) -> Reply {
    let updated: Vec<Value> = marks
        .iter()
        .map(|(uid, text)| json!({ "chapterUid": uid, "markText": text }))
        .collect();
    Reply::Payload(json!({ "updated": updated, "synckey": synckey }))
}

pub fn reviews(synckey: &str, notes: &[(i64, &str)]) -> Reply {
    let reviews: Vec<Value> = notes
        .iter()
        .map(|(uid, content)| json!({ "review": { "chapterUid": uid, "content": content } }))
        .collect();
    Reply::Payload(json!({ "reviews": reviews, "synckey": synckey }))
}

/// Count of `heading_1` blocks with the given text.
pub fn heading_count(outline: &[(String, String)], label: &str) -> usize {
    outline
        .iter()
        .filter(|(t, text)| t == "heading_1" && text == label)
        .count()
}
