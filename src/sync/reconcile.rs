//! Section replacement on a book page.
//!
//! A section is a `heading_1` whose text equals one of the managed labels,
//! followed by every block up to the next managed heading. Replacing a section
//! deletes that run and inserts a freshly built one in its place, so managed
//! sections keep the order of their labels.
use anyhow::Result;
use serde_json::Value;
use tracing::{debug, error, info, instrument, warn};

use crate::notion::model::Block;
use crate::notion::{blocks, NotionService, MAX_BLOCKS_PER_APPEND};
use crate::sync::Pacing;

/// What to do when the new content is empty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyPolicy {
    /// Rewrite the section with a placeholder.
    Placeholder,
    /// Leave the existing section untouched.
    Preserve,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionOutcome {
    pub label: String,
    pub success: bool,
    /// True when the section was left as it was.
    pub untouched: bool,
    pub deleted: usize,
    pub delete_failures: usize,
    pub appended: usize,
    pub diagnostic: Option<String>,
}

impl SectionOutcome {
    fn new(label: &str) -> Self {
        Self {
            label: label.to_string(),
            success: true,
            untouched: false,
            deleted: 0,
            delete_failures: 0,
            appended: 0,
            diagnostic: None,
        }
    }

    /// Section deliberately left as it was.
    pub fn unchanged(label: &str) -> Self {
        Self {
            untouched: true,
            ..Self::new(label)
        }
    }

    pub fn failed(label: &str, diagnostic: impl Into<String>) -> Self {
        Self {
            success: false,
            diagnostic: Some(diagnostic.into()),
            ..Self::new(label)
        }
    }
}

/// Every top-level block of a page, following `next_cursor` to the end.
pub async fn list_all_blocks<N>(sink: &N, page_id: &str) -> Result<Vec<Block>>
where
    N: NotionService + ?Sized,
{
    let mut all = Vec::new();
    let mut cursor: Option<String> = None;
    loop {
        let page = sink.list_child_blocks(page_id, cursor.as_deref()).await?;
        all.extend(page.results);
        match (page.has_more, page.next_cursor) {
            (true, Some(next)) => cursor = Some(next),
            _ => break,
        }
    }
    Ok(all)
}

/// Ids of the blocks making up every occurrence of `label`'s section.
pub fn section_block_ids(existing: &[Block], label: &str, known_labels: &[&str]) -> Vec<String> {
    let mut marked = Vec::new();
    let mut inside = false;
    for block in existing {
        if let Some(text) = block.heading_text() {
            if text == label {
                inside = true;
                marked.push(block.id.clone());
                continue;
            }
            if known_labels.contains(&text.as_str()) {
                inside = false;
                continue;
            }
        }
        if inside {
            marked.push(block.id.clone());
        }
    }
    marked
}

/// Where a rebuilt section goes on the page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Placement {
    /// Old heading left in place; only the body is rebuilt after it.
    pub keep_heading: Option<String>,
    /// Insert after this block; `None` appends at the end of the page.
    pub after: Option<String>,
}

/// Picks the insertion point for `label`'s rebuilt section.
///
/// The section must end up before the next managed section: the one right
/// after its old position, or when it has none, the first one whose label
/// comes later in `known_labels`.
pub fn placement(
    existing: &[Block],
    targets: &[String],
    label: &str,
    known_labels: &[&str],
) -> Placement {
    let rank = |l: &str| known_labels.iter().position(|k| *k == l);
    let first_target = existing.iter().position(|b| targets.contains(&b.id));

    let next_section = existing.iter().enumerate().position(|(i, block)| {
        let Some(text) = block.heading_text() else {
            return false;
        };
        if text == label || rank(&text).is_none() {
            return false;
        }
        match first_target {
            Some(start) => i > start,
            None => rank(&text) > rank(label),
        }
    });
    let Some(next) = next_section else {
        return Placement::default();
    };

    let anchor = existing[..next]
        .iter()
        .rev()
        .find(|b| !targets.contains(&b.id))
        .map(|b| b.id.clone());
    match (anchor, first_target) {
        (Some(after), _) => Placement {
            keep_heading: None,
            after: Some(after),
        },
        (None, Some(start)) => {
            let heading = existing[start].id.clone();
            Placement {
                keep_heading: Some(heading.clone()),
                after: Some(heading),
            }
        }
        (None, None) => {
            warn!("page starts with a later section; appending at the end");
            Placement::default()
        }
    }
}

/// Heading, divider, then the items or a placeholder.
pub fn section_content(label: &str, items: Vec<Value>, placeholder: &str) -> Vec<Value> {
    let mut content = Vec::with_capacity(items.len() + 2);
    content.push(blocks::heading(label));
    content.push(blocks::divider());
    if items.is_empty() {
        content.push(blocks::placeholder(placeholder));
    } else {
        content.extend(items);
    }
    content
}

/// Replaces the `label` section of `page_id` with `items`.
///
/// Deletions are one block at a time and a failed delete is skipped. Appends go
/// in chunks of [`MAX_BLOCKS_PER_APPEND`]; a failed chunk stops the rest and
/// fails the section.
#[instrument(skip(sink, known_labels, items, placeholder, pacing), fields(items = items.len()))]
#[allow(clippy::too_many_arguments)]
pub async fn replace_section<N>(
    sink: &N,
    page_id: &str,
    label: &str,
    known_labels: &[&str],
    items: Vec<Value>,
    placeholder: &str,
    empty: EmptyPolicy,
    pacing: &Pacing,
) -> SectionOutcome
where
    N: NotionService + ?Sized,
{
    if items.is_empty() && empty == EmptyPolicy::Preserve {
        debug!("no new content; leaving section as is");
        return SectionOutcome::unchanged(label);
    }

    let existing = match list_all_blocks(sink, page_id).await {
        Ok(blocks) => blocks,
        Err(err) => {
            error!(?err, "failed to list page blocks");
            return SectionOutcome::failed(label, format!("list blocks: {:#}", err));
        }
    };

    let mut outcome = SectionOutcome::new(label);
    let targets = section_block_ids(&existing, label, known_labels);
    let place = placement(&existing, &targets, label, known_labels);
    let doomed = targets
        .iter()
        .filter(|id| place.keep_heading.as_ref() != Some(*id));
    for (i, id) in doomed.enumerate() {
        if i > 0 {
            tokio::time::sleep(pacing.between_deletes).await;
        }
        match sink.delete_block(id).await {
            Ok(()) => outcome.deleted += 1,
            Err(err) => {
                warn!(block_id = %id, ?err, "failed to delete block; skipping");
                outcome.delete_failures += 1;
            }
        }
    }

    let mut content = section_content(label, items, placeholder);
    if place.keep_heading.is_some() {
        content.remove(0);
    }
    let mut after = place.after;
    for (i, chunk) in content.chunks(MAX_BLOCKS_PER_APPEND).enumerate() {
        if i > 0 {
            tokio::time::sleep(pacing.between_appends).await;
        }
        let created = match sink.append_child_blocks(page_id, chunk, after.as_deref()).await {
            Ok(ids) => ids,
            Err(err) => {
                error!(?err, chunk = i, "failed to append blocks; abandoning section");
                outcome.success = false;
                outcome.diagnostic = Some(format!("append chunk {}: {:#}", i, err));
                return outcome;
            }
        };
        outcome.appended += chunk.len();
        if after.is_some() {
            match created.last() {
                Some(last) => after = Some(last.clone()),
                None => {
                    error!(chunk = i, "no block ids returned; cannot place the next chunk");
                    outcome.success = false;
                    outcome.diagnostic = Some(format!("append chunk {}: no block ids returned", i));
                    return outcome;
                }
            }
        }
    }

    info!(
        deleted = outcome.deleted,
        delete_failures = outcome.delete_failures,
        appended = outcome.appended,
        "replaced section"
    );
    outcome
}
