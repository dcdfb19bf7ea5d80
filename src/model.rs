use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Cursor value meaning "start of stream"; fetching with it is a full fetch.
pub const INITIAL_CURSOR: &str = "0";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ReadStatus {
    Done,
    NotDone,
}

impl ReadStatus {
    pub fn from_finished(finished: bool) -> Self {
        if finished {
            ReadStatus::Done
        } else {
            ReadStatus::NotDone
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReadStatus::Done => "done",
            ReadStatus::NotDone => "not-done",
        }
    }
}

/// Upstream listing that contributed to a merged book record.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Provenance {
    Shelf,
    Notes,
    Detail,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Shelf => "shelf",
            Provenance::Notes => "notes",
            Provenance::Detail => "detail",
        }
    }
}

/// Canonical book record, rebuilt on every run from the upstream listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Book {
    pub book_id: String,
    pub title: String,
    pub author: String,
    pub translator: String,
    pub category: String,
    pub cover: String,
    pub isbn: String,
    pub publisher: String,
    pub status: ReadStatus,
    pub has_notes: bool,
    pub note_count: u64,
    pub provenance: Vec<Provenance>,
}

impl Book {
    /// Listings the record came from, e.g. `shelf+notes`.
    pub fn provenance_label(&self) -> String {
        self.provenance
            .iter()
            .map(Provenance::as_str)
            .collect::<Vec<_>>()
            .join("+")
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Highlights,
    Annotations,
}

impl StreamKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamKind::Highlights => "highlights",
            StreamKind::Annotations => "annotations",
        }
    }
}

/// Last-seen position of both change streams of one book.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncCursor {
    pub book_id: String,
    pub highlight_cursor: String,
    pub annotation_cursor: String,
    pub last_sync_time: DateTime<Utc>,
}

impl SyncCursor {
    /// Cursor that forces a full fetch of both streams.
    pub fn initial(book_id: &str) -> Self {
        Self {
            book_id: book_id.to_string(),
            highlight_cursor: INITIAL_CURSOR.to_string(),
            annotation_cursor: INITIAL_CURSOR.to_string(),
            last_sync_time: epoch(),
        }
    }

    pub fn for_stream(&self, kind: StreamKind) -> &str {
        match kind {
            StreamKind::Highlights => &self.highlight_cursor,
            StreamKind::Annotations => &self.annotation_cursor,
        }
    }
}

pub fn epoch() -> DateTime<Utc> {
    Utc.timestamp_millis_opt(0).single().unwrap_or_default()
}

/// Converts a seconds-or-millis upstream timestamp to UTC.
pub fn timestamp_to_utc(ts: i64) -> Option<DateTime<Utc>> {
    if ts <= 0 {
        return None;
    }
    let millis = if ts > 9_999_999_999 { ts } else { ts * 1000 };
    Utc.timestamp_millis_opt(millis).single()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Highlight {
    pub text: String,
    pub chapter_uid: i64,
    pub chapter_title: String,
    pub created_at: Option<DateTime<Utc>>,
    pub style: Option<i64>,
    pub color_style: Option<i64>,
    pub range: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Annotation {
    pub content: String,
    pub abstract_text: String,
    pub range: Option<String>,
    pub chapter_uid: i64,
    pub chapter_title: String,
    pub created_at: Option<DateTime<Utc>>,
    pub review_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter<T> {
    pub chapter_uid: i64,
    pub title: String,
    pub items: Vec<T>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchContent {
    Highlights(Vec<Chapter<Highlight>>),
    Annotations(Vec<Chapter<Annotation>>),
}

impl BatchContent {
    pub fn empty(kind: StreamKind) -> Self {
        match kind {
            StreamKind::Highlights => BatchContent::Highlights(Vec::new()),
            StreamKind::Annotations => BatchContent::Annotations(Vec::new()),
        }
    }

    pub fn item_count(&self) -> usize {
        match self {
            BatchContent::Highlights(chapters) => chapters.iter().map(|c| c.items.len()).sum(),
            BatchContent::Annotations(chapters) => chapters.iter().map(|c| c.items.len()).sum(),
        }
    }
}

/// Shaped result of one stream fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeBatch {
    pub content: BatchContent,
    pub cursor: String,
    pub has_update: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaVersion {
    pub version: i64,
    pub updated_at: DateTime<Utc>,
}
