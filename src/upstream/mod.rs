use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, COOKIE, REFERER, SET_COOKIE, USER_AGENT};
use reqwest::{redirect, Client, StatusCode, Url};
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::model::StreamKind;

pub mod model;
pub mod session;

pub use model::{BookDetail, NotebookEntry, ShelfBook};
pub use session::Session;

/// `errCode` the reading service uses for an expired login.
pub const SESSION_EXPIRED_CODE: i64 = -2012;

const BROWSER_UA: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
    AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Pages visited, in order, to renew the session cookies.
const BOOTSTRAP_PATHS: [&str; 2] = ["", "web/shelf"];

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("session expired")]
    SessionExpired,
    #[error("upstream api error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("upstream http {status}: {body}")]
    Http { status: StatusCode, body: String },
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl UpstreamError {
    pub fn is_session_expired(&self) -> bool {
        matches!(self, UpstreamError::SessionExpired)
    }
}

pub type UpstreamResult<T> = Result<T, UpstreamError>;

/// Operations of the reading service the sync engine consumes.
#[async_trait]
pub trait UpstreamSource: Send + Sync {
    /// Books on the shelf (flat records).
    async fn list_by_ownership(&self, session: &Session) -> UpstreamResult<Vec<ShelfBook>>;

    /// Books that carry notes (nested records with a mark count).
    async fn list_by_annotation_presence(
        &self,
        session: &Session,
    ) -> UpstreamResult<Vec<NotebookEntry>>;

    async fn get_entity_detail(
        &self,
        session: &Session,
        book_id: &str,
    ) -> UpstreamResult<Option<BookDetail>>;

    /// Raw change payload of one stream; `None` when the service returned no body.
    async fn get_changes_since(
        &self,
        session: &Session,
        book_id: &str,
        cursor: &str,
        kind: StreamKind,
    ) -> UpstreamResult<Option<Value>>;

    /// Revisit the bootstrap pages and fold any renewed cookies into a new session.
    async fn refresh_session(&self, session: &Session) -> UpstreamResult<Session>;
}

#[derive(Debug, Clone)]
pub struct WeReadClient {
    http: Client,
    base_url: Url,
    refresh_pause: Duration,
}

impl WeReadClient {
    pub fn new(base_url: Url, refresh_pause: Duration) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static(BROWSER_UA));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        if let Ok(referer) = HeaderValue::from_str(base_url.as_str()) {
            headers.insert(REFERER, referer);
        }
        let http = Client::builder()
            .default_headers(headers)
            .redirect(redirect::Policy::limited(5))
            .build()
            .expect("reqwest client");
        Self {
            http,
            base_url,
            refresh_pause,
        }
    }

    fn endpoint(&self, path: &str) -> UpstreamResult<Url> {
        self.base_url
            .join(path)
            .map_err(|e| UpstreamError::Decode(format!("bad endpoint {}: {}", path, e)))
    }

    fn cookie_header(session: &Session) -> UpstreamResult<HeaderValue> {
        HeaderValue::from_str(session.cookie())
            .map_err(|_| UpstreamError::Decode("cookie is not a valid header value".into()))
    }

    async fn get_json(
        &self,
        session: &Session,
        path: &str,
        query: &[(&str, &str)],
    ) -> UpstreamResult<Option<Value>> {
        let url = self.endpoint(path)?;
        debug!(%url, "upstream request");
        let res = self
            .http
            .get(url)
            .query(query)
            .header(COOKIE, Self::cookie_header(session)?)
            .send()
            .await?;
        let status = res.status();
        let body = res.text().await?;
        interpret_body(status, &body)
    }

    async fn get_typed<T: DeserializeOwned>(
        &self,
        session: &Session,
        path: &str,
        query: &[(&str, &str)],
    ) -> UpstreamResult<Option<T>> {
        match self.get_json(session, path, query).await? {
            None => Ok(None),
            Some(v) => serde_json::from_value(v)
                .map(Some)
                .map_err(|e| UpstreamError::Decode(format!("{}: {}", path, e))),
        }
    }
}

/// Classifies a raw response: session expiry and api errors first (the service
/// reports them with any status), then http failures, then the JSON payload.
pub fn interpret_body(status: StatusCode, body: &str) -> UpstreamResult<Option<Value>> {
    let trimmed = body.trim();
    let parsed: Option<Value> = if trimmed.is_empty() {
        None
    } else {
        serde_json::from_str(trimmed).ok()
    };

    if let Some(code) = parsed
        .as_ref()
        .and_then(|v| v.get("errCode"))
        .and_then(Value::as_i64)
    {
        if code == SESSION_EXPIRED_CODE {
            return Err(UpstreamError::SessionExpired);
        }
        if code != 0 {
            let message = parsed
                .as_ref()
                .and_then(|v| v.get("errMsg"))
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            return Err(UpstreamError::Api { code, message });
        }
    }

    if !status.is_success() {
        return Err(UpstreamError::Http {
            status,
            body: trimmed.chars().take(200).collect(),
        });
    }

    match parsed {
        None if trimmed.is_empty() => Ok(None),
        None => Err(UpstreamError::Decode("response is not JSON".into())),
        Some(Value::Null) => Ok(None),
        Some(v) => Ok(Some(v)),
    }
}

/// Parses `books[]` one entry at a time, dropping the ones that do not fit.
fn parse_books<T: DeserializeOwned>(payload: Option<Value>, listing: &str) -> Vec<T> {
    let Some(Value::Array(items)) = payload.and_then(|mut v| v.get_mut("books").map(Value::take))
    else {
        return Vec::new();
    };
    items
        .into_iter()
        .enumerate()
        .filter_map(|(i, item)| match serde_json::from_value::<T>(item) {
            Ok(book) => Some(book),
            Err(err) => {
                warn!(listing, index = i, %err, "skipping malformed listing entry");
                None
            }
        })
        .collect()
}

#[async_trait]
impl UpstreamSource for WeReadClient {
    #[instrument(skip_all)]
    async fn list_by_ownership(&self, session: &Session) -> UpstreamResult<Vec<ShelfBook>> {
        let payload = self.get_json(session, "web/shelf/sync", &[]).await?;
        let books = parse_books(payload, "shelf");
        info!(count = books.len(), "fetched shelf listing");
        Ok(books)
    }

    #[instrument(skip_all)]
    async fn list_by_annotation_presence(
        &self,
        session: &Session,
    ) -> UpstreamResult<Vec<NotebookEntry>> {
        let payload = self.get_json(session, "api/user/notebook", &[]).await?;
        let books = parse_books(payload, "notebook");
        info!(count = books.len(), "fetched notebook listing");
        Ok(books)
    }

    #[instrument(skip(self, session))]
    async fn get_entity_detail(
        &self,
        session: &Session,
        book_id: &str,
    ) -> UpstreamResult<Option<BookDetail>> {
        self.get_typed(session, "api/book/info", &[("bookId", book_id)])
            .await
    }

    #[instrument(skip(self, session))]
    async fn get_changes_since(
        &self,
        session: &Session,
        book_id: &str,
        cursor: &str,
        kind: StreamKind,
    ) -> UpstreamResult<Option<Value>> {
        match kind {
            StreamKind::Highlights => {
                self.get_json(
                    session,
                    "web/book/bookmarklist",
                    &[("bookId", book_id), ("synckey", cursor)],
                )
                .await
            }
            StreamKind::Annotations => {
                self.get_json(
                    session,
                    "web/review/list",
                    &[
                        ("bookId", book_id),
                        ("listType", "11"),
                        ("mine", "1"),
                        ("synckey", cursor),
                    ],
                )
                .await
            }
        }
    }

    #[instrument(skip_all)]
    async fn refresh_session(&self, session: &Session) -> UpstreamResult<Session> {
        let mut current = session.clone();
        let mut last_err = None;
        let mut visited = 0;

        for (i, path) in BOOTSTRAP_PATHS.iter().enumerate() {
            if i > 0 {
                tokio::time::sleep(self.refresh_pause).await;
            }
            let url = self.endpoint(path)?;
            let res = self
                .http
                .get(url)
                .header(ACCEPT, "text/html,application/xhtml+xml")
                .header(COOKIE, Self::cookie_header(&current)?)
                .send()
                .await;
            match res {
                Ok(res) => {
                    let set_cookies: Vec<String> = res
                        .headers()
                        .get_all(SET_COOKIE)
                        .iter()
                        .filter_map(|v| v.to_str().ok().map(str::to_string))
                        .collect();
                    debug!(path, renewed = set_cookies.len(), "visited bootstrap page");
                    current = current.with_set_cookies(set_cookies.iter().map(String::as_str));
                    visited += 1;
                }
                Err(err) => {
                    warn!(path, %err, "bootstrap visit failed; continuing");
                    last_err = Some(err);
                }
            }
        }

        match (visited, last_err) {
            (0, Some(err)) => Err(err.into()),
            _ => Ok(current),
        }
    }
}
