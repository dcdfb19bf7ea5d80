use tracing::{info, instrument, warn};

use crate::model::{ChangeBatch, StreamKind, INITIAL_CURSOR};
use crate::sync::batch::shape;
use crate::sync::retry::{call_with_refresh, refresh_or_keep, RetryPolicy};
use crate::upstream::{Session, UpstreamError, UpstreamResult, UpstreamSource};

/// Result of fetching one stream for one book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub kind: StreamKind,
    /// `None` when nothing could be fetched.
    pub batch: Option<ChangeBatch>,
    /// Cursor to persist: the returned one, or the supplied one on failure.
    pub cursor: String,
    pub diagnostic: Option<String>,
}

impl FetchOutcome {
    pub fn succeeded(&self) -> bool {
        self.batch.is_some()
    }

    pub fn has_update(&self) -> bool {
        self.batch.as_ref().map(|b| b.has_update).unwrap_or(false)
    }

    fn fetched(kind: StreamKind, batch: ChangeBatch) -> Self {
        Self {
            kind,
            cursor: batch.cursor.clone(),
            batch: Some(batch),
            diagnostic: None,
        }
    }

    fn failed(kind: StreamKind, supplied: &str, diagnostic: String) -> Self {
        Self {
            kind,
            batch: None,
            cursor: supplied.to_string(),
            diagnostic: Some(diagnostic),
        }
    }
}

async fn request<S>(
    source: &S,
    policy: &RetryPolicy,
    session: Session,
    book_id: &str,
    cursor: &str,
    kind: StreamKind,
) -> (UpstreamResult<Option<serde_json::Value>>, Session)
where
    S: UpstreamSource + ?Sized,
{
    call_with_refresh(source, policy, session, |s| async move {
        source.get_changes_since(&s, book_id, cursor, kind).await
    })
    .await
}

fn empty_batch(kind: StreamKind, supplied: &str) -> ChangeBatch {
    ChangeBatch {
        content: crate::model::BatchContent::empty(kind),
        cursor: supplied.to_string(),
        has_update: false,
    }
}

/// Fetches one stream since `cursor`.
///
/// Session expiry is handled by the retry policy. When an incremental request
/// comes back empty or fails, the session is refreshed once and the request is
/// reissued from the initial cursor. `has_update` is always judged against the
/// cursor supplied here. The session to use afterwards is returned alongside.
#[instrument(skip(source, policy, session))]
pub async fn fetch_changes<S>(
    source: &S,
    policy: &RetryPolicy,
    session: Session,
    book_id: &str,
    cursor: &str,
    kind: StreamKind,
) -> (FetchOutcome, Session)
where
    S: UpstreamSource + ?Sized,
{
    let incremental = cursor != INITIAL_CURSOR;
    let (first, session) = request(source, policy, session, book_id, cursor, kind).await;

    let (result, session) = match first {
        Ok(Some(payload)) => (Ok(Some(payload)), session),
        Err(UpstreamError::SessionExpired) => {
            warn!(stream = kind.as_str(), "session still expired after refresh");
            return (
                FetchOutcome::failed(kind, cursor, "session expired".into()),
                session,
            );
        }
        Ok(None) if !incremental => (Ok(None), session),
        Err(err) if !incremental => {
            warn!(stream = kind.as_str(), %err, "fetch failed");
            return (FetchOutcome::failed(kind, cursor, err.to_string()), session);
        }
        demote => {
            match &demote {
                Ok(_) => warn!(stream = kind.as_str(), "incremental fetch returned nothing; refetching from start"),
                Err(err) => warn!(stream = kind.as_str(), %err, "incremental fetch failed; refetching from start"),
            }
            let session = refresh_or_keep(source, session).await;
            request(source, policy, session, book_id, INITIAL_CURSOR, kind).await
        }
    };

    let outcome = match result {
        Ok(Some(payload)) => FetchOutcome::fetched(kind, shape(kind, payload, cursor)),
        Ok(None) => FetchOutcome::fetched(kind, empty_batch(kind, cursor)),
        Err(err) => {
            warn!(stream = kind.as_str(), %err, "fetch failed");
            FetchOutcome::failed(kind, cursor, err.to_string())
        }
    };
    if let Some(batch) = &outcome.batch {
        info!(
            stream = kind.as_str(),
            items = batch.content.item_count(),
            has_update = batch.has_update,
            cursor = %batch.cursor,
            "fetched changes"
        );
    }
    (outcome, session)
}
