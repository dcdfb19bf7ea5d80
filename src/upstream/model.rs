//! Raw payloads of the reading service.
//!
//! The service is loose with types (ids and sync keys arrive as strings or
//! numbers, flags as booleans or 0/1), so fields go through lenient helpers.
use serde::{Deserialize, Deserializer};
use serde_json::Value;

fn lenient_string<'de, D>(d: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(d)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_i64<'de, D>(d: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(d)? {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    })
}

fn lenient_flag<'de, D>(d: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(d)? {
        Value::Bool(b) => Some(b),
        Value::Number(n) => Some(n.as_i64().unwrap_or(0) != 0),
        _ => None,
    })
}

/// Flat book record: a bookshelf entry, a book-info response, or the nested
/// `book` object of a notebook entry.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct BookDetail {
    #[serde(default, deserialize_with = "lenient_string")]
    pub book_id: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub author: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub translator: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub cover: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub category: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub isbn: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub publisher: Option<String>,
    #[serde(default, deserialize_with = "lenient_flag")]
    pub finish_reading: Option<bool>,
}

impl BookDetail {
    /// Shallow merge: every field present in `over` replaces ours.
    pub fn overlay(self, over: BookDetail) -> BookDetail {
        BookDetail {
            book_id: over.book_id.or(self.book_id),
            title: over.title.or(self.title),
            author: over.author.or(self.author),
            translator: over.translator.or(self.translator),
            cover: over.cover.or(self.cover),
            category: over.category.or(self.category),
            isbn: over.isbn.or(self.isbn),
            publisher: over.publisher.or(self.publisher),
            finish_reading: over.finish_reading.or(self.finish_reading),
        }
    }
}

pub type ShelfBook = BookDetail;

/// Entry of the notebook listing: books that carry notes.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct NotebookEntry {
    #[serde(default, deserialize_with = "lenient_string")]
    pub book_id: Option<String>,
    #[serde(default)]
    pub book: BookDetail,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub marks_count: Option<i64>,
}

/// Response of the bookmark (highlight) list.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct BookmarkList {
    #[serde(default)]
    pub updated: Vec<Value>,
    #[serde(default)]
    pub chapters: Vec<Value>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub synckey: Option<String>,
}

/// Flat highlight from `updated[]`.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RawMark {
    #[serde(deserialize_with = "lenient_i64")]
    pub chapter_uid: Option<i64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub chapter_title: Option<String>,
    pub mark_text: String,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub created: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub style: Option<i64>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub color_style: Option<i64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub range: Option<String>,
}

/// Chapter from `chapters[]`, carrying its own marks.
#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RawChapterMarks {
    #[serde(deserialize_with = "lenient_i64")]
    pub chapter_uid: Option<i64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub title: Option<String>,
    #[serde(default)]
    pub marks: Vec<Value>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RawChapterMark {
    pub mark_text: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub range: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub create_time: Option<i64>,
}

/// Response of the review (thought) list.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct ReviewList {
    #[serde(default)]
    pub reviews: Vec<Value>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub synckey: Option<String>,
}

/// Review fields; used both for the nested `review` object and for entries
/// that carry their fields directly.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReviewBody {
    #[serde(default, deserialize_with = "lenient_string")]
    pub content: Option<String>,
    #[serde(default, rename = "abstract", deserialize_with = "lenient_string")]
    pub abstract_text: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub range: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub chapter_uid: Option<i64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub chapter_name: Option<String>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub chapter_title: Option<String>,
    #[serde(default, deserialize_with = "lenient_i64")]
    pub create_time: Option<i64>,
    #[serde(default, deserialize_with = "lenient_string")]
    pub review_id: Option<String>,
}

/// The two shapes a review-list entry comes in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReviewForm {
    /// Details under `review` (an object or a JSON-encoded string); `outer`
    /// holds the fields of the wrapping entry used as fallbacks.
    Nested { review: ReviewBody, outer: ReviewBody },
    /// No `review` object; fields sit on the entry itself.
    Flat(ReviewBody),
}

impl ReviewForm {
    pub fn parse(entry: &Value) -> Result<ReviewForm, String> {
        let outer: ReviewBody =
            serde_json::from_value(entry.clone()).map_err(|e| format!("bad review entry: {}", e))?;
        match entry.get("review") {
            None | Some(Value::Null) => Ok(ReviewForm::Flat(outer)),
            Some(Value::String(encoded)) => {
                let review: ReviewBody = serde_json::from_str(encoded)
                    .map_err(|e| format!("bad encoded review: {}", e))?;
                Ok(ReviewForm::Nested { review, outer })
            }
            Some(obj @ Value::Object(_)) => {
                let review: ReviewBody = serde_json::from_value(obj.clone())
                    .map_err(|e| format!("bad review object: {}", e))?;
                Ok(ReviewForm::Nested { review, outer })
            }
            Some(other) => Err(format!("unexpected review value: {}", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn book_detail_accepts_numeric_ids_and_int_flags() {
        let d: BookDetail = serde_json::from_value(json!({
            "bookId": 12345,
            "title": "T",
            "finishReading": 1
        }))
        .unwrap();
        assert_eq!(d.book_id.as_deref(), Some("12345"));
        assert_eq!(d.finish_reading, Some(true));
        assert!(d.author.is_none());
    }

    #[test]
    fn overlay_prefers_present_fields() {
        let base = BookDetail {
            title: Some("Old".into()),
            author: Some("A".into()),
            ..Default::default()
        };
        let over = BookDetail {
            title: Some("New".into()),
            ..Default::default()
        };
        let merged = base.overlay(over);
        assert_eq!(merged.title.as_deref(), Some("New"));
        assert_eq!(merged.author.as_deref(), Some("A"));
    }

    #[test]
    fn review_form_parses_all_shapes() {
        let obj = json!({ "reviewId": "r1", "review": { "content": "c", "chapterUid": 3 } });
        match ReviewForm::parse(&obj).unwrap() {
            ReviewForm::Nested { review, outer } => {
                assert_eq!(review.content.as_deref(), Some("c"));
                assert_eq!(outer.review_id.as_deref(), Some("r1"));
            }
            other => panic!("unexpected {:?}", other),
        }

        let encoded = json!({ "review": "{\"abstract\":\"quote\"}" });
        assert!(matches!(
            ReviewForm::parse(&encoded).unwrap(),
            ReviewForm::Nested { .. }
        ));

        let flat = json!({ "content": "x", "chapterUid": "7" });
        match ReviewForm::parse(&flat).unwrap() {
            ReviewForm::Flat(body) => assert_eq!(body.chapter_uid, Some(7)),
            other => panic!("unexpected {:?}", other),
        }

        assert!(ReviewForm::parse(&json!({ "review": "{not json" })).is_err());
    }
}
