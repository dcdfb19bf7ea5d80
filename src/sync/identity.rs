//! Merging of the shelf and notebook listings into one record per book.
use std::collections::HashMap;

use tracing::{debug, warn};

use crate::model::{Book, Provenance, ReadStatus};
use crate::upstream::{BookDetail, NotebookEntry, ShelfBook};

/// An entry from either listing, before normalisation.
#[derive(Debug, Clone)]
pub enum ListingRecord {
    Flat(ShelfBook),
    Nested(NotebookEntry),
}

/// Canonical shape both listing forms reduce to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedRecord {
    pub book_id: String,
    pub detail: BookDetail,
    pub marks_count: Option<i64>,
}

impl ListingRecord {
    /// `None` when the entry carries no usable book id.
    pub fn normalize(self) -> Option<NormalizedRecord> {
        match self {
            ListingRecord::Flat(detail) => {
                let book_id = non_empty(detail.book_id.clone())?;
                Some(NormalizedRecord {
                    book_id,
                    detail,
                    marks_count: None,
                })
            }
            ListingRecord::Nested(entry) => {
                let book_id = non_empty(entry.book_id.or_else(|| entry.book.book_id.clone()))?;
                Some(NormalizedRecord {
                    book_id,
                    detail: entry.book,
                    marks_count: entry.marks_count,
                })
            }
        }
    }
}

fn non_empty(s: Option<String>) -> Option<String> {
    s.filter(|s| !s.trim().is_empty())
}

struct Merged {
    detail: BookDetail,
    status: ReadStatus,
    has_notes: bool,
    note_count: u64,
    provenance: Vec<Provenance>,
}

/// Builds a [`Book`] from a detail record attributed to the given listings.
pub fn book_from_detail(
    book_id: &str,
    detail: BookDetail,
    status: ReadStatus,
    has_notes: bool,
    note_count: u64,
    provenance: Vec<Provenance>,
) -> Book {
    Book {
        book_id: book_id.to_string(),
        title: detail.title.unwrap_or_default(),
        author: detail.author.unwrap_or_default(),
        translator: detail.translator.unwrap_or_default(),
        category: detail.category.unwrap_or_default(),
        cover: detail.cover.unwrap_or_default(),
        isbn: detail.isbn.unwrap_or_default(),
        publisher: detail.publisher.unwrap_or_default(),
        status,
        has_notes,
        note_count,
        provenance,
    }
}

/// Folds the flat shelf listing and then the nested notebook listing into one
/// record per book id. Notebook detail fields win on conflict. Output follows
/// first-seen order.
pub fn resolve(shelf: Vec<ShelfBook>, notebook: Vec<NotebookEntry>) -> Vec<Book> {
    let mut order: Vec<String> = Vec::new();
    let mut merged: HashMap<String, Merged> = HashMap::new();

    for record in shelf.into_iter().map(ListingRecord::Flat) {
        let Some(rec) = record.normalize() else {
            warn!("shelf entry without book id; skipping");
            continue;
        };
        let status = ReadStatus::from_finished(rec.detail.finish_reading.unwrap_or(false));
        if merged.contains_key(&rec.book_id) {
            debug!(book_id = %rec.book_id, "duplicate shelf entry; keeping first");
            continue;
        }
        order.push(rec.book_id.clone());
        merged.insert(
            rec.book_id,
            Merged {
                detail: rec.detail,
                status,
                has_notes: false,
                note_count: 0,
                provenance: vec![Provenance::Shelf],
            },
        );
    }

    for record in notebook.into_iter().map(ListingRecord::Nested) {
        let Some(rec) = record.normalize() else {
            warn!("notebook entry without book id; skipping");
            continue;
        };
        let note_count = rec.marks_count.unwrap_or(0).max(0) as u64;
        match merged.get_mut(&rec.book_id) {
            Some(existing) => {
                existing.detail = std::mem::take(&mut existing.detail).overlay(rec.detail);
                existing.has_notes = true;
                existing.note_count = note_count;
                if !existing.provenance.contains(&Provenance::Notes) {
                    existing.provenance.push(Provenance::Notes);
                }
            }
            None => {
                order.push(rec.book_id.clone());
                merged.insert(
                    rec.book_id,
                    Merged {
                        detail: rec.detail,
                        status: ReadStatus::NotDone,
                        has_notes: true,
                        note_count,
                        provenance: vec![Provenance::Notes],
                    },
                );
            }
        }
    }

    order
        .into_iter()
        .filter_map(|id| {
            let m = merged.remove(&id)?;
            Some(book_from_detail(
                &id,
                m.detail,
                m.status,
                m.has_notes,
                m.note_count,
                m.provenance,
            ))
        })
        .collect()
}
