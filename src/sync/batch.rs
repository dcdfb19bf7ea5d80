//! Shaping raw change payloads into chapter-grouped batches.
use std::collections::BTreeMap;

use serde_json::Value;
use tracing::warn;

use crate::model::{
    timestamp_to_utc, Annotation, BatchContent, ChangeBatch, Chapter, Highlight, StreamKind,
};
use crate::upstream::model::{
    BookmarkList, RawChapterMark, RawChapterMarks, RawMark, ReviewBody, ReviewForm, ReviewList,
};

const UNKNOWN_CHAPTER: &str = "Unknown chapter";

fn chapter_fallback(uid: i64) -> String {
    format!("Chapter {}", uid)
}

/// Turns one stream payload into a [`ChangeBatch`]. `requested_cursor` is the
/// cursor the caller asked with; the new cursor falls back to it when the
/// payload carries none.
pub fn shape(kind: StreamKind, payload: Value, requested_cursor: &str) -> ChangeBatch {
    let (content, returned) = match kind {
        StreamKind::Highlights => {
            let list: BookmarkList = serde_json::from_value(payload).unwrap_or_else(|err| {
                warn!(%err, "unreadable bookmark list; treating as empty");
                BookmarkList::default()
            });
            let synckey = list.synckey.clone();
            (BatchContent::Highlights(shape_highlights(list)), synckey)
        }
        StreamKind::Annotations => {
            let list: ReviewList = serde_json::from_value(payload).unwrap_or_else(|err| {
                warn!(%err, "unreadable review list; treating as empty");
                ReviewList::default()
            });
            let synckey = list.synckey.clone();
            (BatchContent::Annotations(shape_annotations(&list.reviews)), synckey)
        }
    };
    let cursor = returned.unwrap_or_else(|| requested_cursor.to_string());
    ChangeBatch {
        has_update: cursor != requested_cursor,
        content,
        cursor,
    }
}

fn insert<T>(groups: &mut BTreeMap<i64, Chapter<T>>, uid: i64, title: String, item: T) {
    groups
        .entry(uid)
        .or_insert_with(|| Chapter {
            chapter_uid: uid,
            title,
            items: Vec::new(),
        })
        .items
        .push(item);
}

/// Prefers the flat `updated[]` form; falls back to `chapters[].marks[]`.
pub fn shape_highlights(list: BookmarkList) -> Vec<Chapter<Highlight>> {
    let mut groups: BTreeMap<i64, Chapter<Highlight>> = BTreeMap::new();

    if !list.updated.is_empty() {
        for (i, raw) in list.updated.into_iter().enumerate() {
            let mark: RawMark = match serde_json::from_value(raw) {
                Ok(m) => m,
                Err(err) => {
                    warn!(index = i, %err, "skipping malformed highlight");
                    continue;
                }
            };
            let (Some(uid), false) = (mark.chapter_uid, mark.mark_text.trim().is_empty()) else {
                warn!(index = i, "highlight without text or chapter; skipping");
                continue;
            };
            let title = mark.chapter_title.clone().unwrap_or_else(|| chapter_fallback(uid));
            let item = Highlight {
                text: mark.mark_text,
                chapter_uid: uid,
                chapter_title: title.clone(),
                created_at: mark.created.and_then(timestamp_to_utc),
                style: mark.style,
                color_style: mark.color_style,
                range: mark.range,
            };
            insert(&mut groups, uid, title, item);
        }
    } else {
        for (i, raw) in list.chapters.into_iter().enumerate() {
            let chapter: RawChapterMarks = match serde_json::from_value(raw) {
                Ok(c) => c,
                Err(err) => {
                    warn!(index = i, %err, "skipping malformed chapter");
                    continue;
                }
            };
            let Some(uid) = chapter.chapter_uid else {
                warn!(index = i, "chapter without id; skipping");
                continue;
            };
            let title = chapter.title.unwrap_or_else(|| chapter_fallback(uid));
            for raw_mark in chapter.marks {
                let mark: RawChapterMark = match serde_json::from_value(raw_mark) {
                    Ok(m) => m,
                    Err(err) => {
                        warn!(chapter = uid, %err, "skipping malformed mark");
                        continue;
                    }
                };
                if mark.mark_text.trim().is_empty() {
                    continue;
                }
                let item = Highlight {
                    text: mark.mark_text,
                    chapter_uid: uid,
                    chapter_title: title.clone(),
                    created_at: mark.create_time.and_then(timestamp_to_utc),
                    style: None,
                    color_style: None,
                    range: mark.range,
                };
                insert(&mut groups, uid, title.clone(), item);
            }
        }
    }

    groups.into_values().collect()
}

fn normalize_review(form: ReviewForm) -> ReviewBody {
    match form {
        ReviewForm::Flat(body) => body,
        ReviewForm::Nested { review, outer } => ReviewBody {
            content: review.content.or(outer.content),
            abstract_text: review.abstract_text.or(outer.abstract_text),
            range: review.range.or(outer.range),
            chapter_uid: review.chapter_uid.or(outer.chapter_uid),
            chapter_name: review.chapter_name.or(outer.chapter_name),
            chapter_title: review.chapter_title.or(outer.chapter_title),
            create_time: review.create_time.or(outer.create_time),
            review_id: outer.review_id.or(review.review_id),
        },
    }
}

pub fn shape_annotations(reviews: &[Value]) -> Vec<Chapter<Annotation>> {
    let mut groups: BTreeMap<i64, Chapter<Annotation>> = BTreeMap::new();

    for (i, entry) in reviews.iter().enumerate() {
        let body = match ReviewForm::parse(entry) {
            Ok(form) => normalize_review(form),
            Err(err) => {
                warn!(index = i, %err, "skipping malformed review");
                continue;
            }
        };
        let content = body.content.unwrap_or_default();
        let abstract_text = body.abstract_text.unwrap_or_default();
        if content.trim().is_empty() && abstract_text.trim().is_empty() {
            continue;
        }
        let uid = body.chapter_uid.unwrap_or(0);
        let title = body
            .chapter_name
            .or(body.chapter_title)
            .unwrap_or_else(|| UNKNOWN_CHAPTER.to_string());
        let item = Annotation {
            content,
            abstract_text,
            range: body.range,
            chapter_uid: uid,
            chapter_title: title.clone(),
            created_at: body.create_time.and_then(timestamp_to_utc),
            review_id: body.review_id,
        };
        insert(&mut groups, uid, title, item);
    }

    groups.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn unchanged_cursor_means_no_update() {
        let b = shape(StreamKind::Highlights, json!({ "updated": [], "synckey": 42 }), "42");
        assert!(!b.has_update);
        assert_eq!(b.cursor, "42");

        let b = shape(StreamKind::Highlights, json!({ "updated": [], "synckey": 43 }), "42");
        assert!(b.has_update);
        assert_eq!(b.cursor, "43");
    }

    #[test]
    fn missing_synckey_keeps_requested_cursor() {
        let b = shape(StreamKind::Annotations, json!({ "reviews": [] }), "17");
        assert_eq!(b.cursor, "17");
        assert!(!b.has_update);
    }

    #[test]
    fn highlights_group_by_chapter_ascending() {
        let payload = json!({
            "updated": [
                { "chapterUid": 5, "markText": "e" },
                { "chapterUid": 1, "markText": "a", "chapterTitle": "One" },
                { "chapterUid": 3, "markText": "c" },
                { "chapterUid": 1, "markText": "b" },
                { "markText": "no chapter" },
                { "chapterUid": 2, "markText": "  " }
            ],
            "synckey": "9"
        });
        let b = shape(StreamKind::Highlights, payload, "0");
        let BatchContent::Highlights(chapters) = b.content else {
            panic!("wrong kind");
        };
        let uids: Vec<i64> = chapters.iter().map(|c| c.chapter_uid).collect();
        assert_eq!(uids, vec![1, 3, 5]);
        assert_eq!(chapters[0].title, "One");
        assert_eq!(chapters[0].items.len(), 2);
        assert_eq!(chapters[1].title, "Chapter 3");
    }

    #[test]
    fn chapters_form_is_used_without_updated() {
        let payload = json!({
            "chapters": [
                { "chapterUid": 2, "title": "Two", "marks": [
                    { "markText": "x", "createTime": 1_700_000_000 },
                    { "bad": true }
                ]}
            ]
        });
        let b = shape(StreamKind::Highlights, payload, "0");
        assert_eq!(b.content.item_count(), 1);
        let BatchContent::Highlights(chapters) = b.content else {
            panic!("wrong kind");
        };
        assert!(chapters[0].items[0].created_at.is_some());
    }

    #[test]
    fn reviews_in_every_form_are_normalised() {
        let reviews = vec![
            json!({ "reviewId": "r1", "review": { "content": "obj", "chapterUid": 4, "chapterName": "Four" } }),
            json!({ "review": "{\"abstract\":\"quoted\",\"chapterUid\":2}" }),
            json!({ "content": "flat" }),
            json!({ "review": { "chapterUid": 1 } }),
            json!({ "review": "{broken" }),
        ];
        let chapters = shape_annotations(&reviews);
        let uids: Vec<i64> = chapters.iter().map(|c| c.chapter_uid).collect();
        assert_eq!(uids, vec![0, 2, 4]);
        assert_eq!(chapters[0].title, UNKNOWN_CHAPTER);
        assert_eq!(chapters[2].items[0].review_id.as_deref(), Some("r1"));
        assert_eq!(chapters[1].items[0].abstract_text, "quoted");
    }
}
