//! Block JSON builders for the managed sections of a book page.
use serde_json::{json, Value};

use crate::model::{Annotation, Chapter, Highlight};

/// Notion rejects a single text object longer than this (UTF-16 units).
pub const MAX_TEXT_LEN: usize = 2000;

/// Splits `content` on char boundaries into pieces Notion accepts.
pub fn split_text(content: &str) -> Vec<&str> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut units = 0;
    for (i, c) in content.char_indices() {
        if units + c.len_utf16() > MAX_TEXT_LEN {
            pieces.push(&content[start..i]);
            start = i;
            units = 0;
        }
        units += c.len_utf16();
    }
    if start < content.len() || pieces.is_empty() {
        pieces.push(&content[start..]);
    }
    pieces
}

/// Text runs for `content`, each carrying `annotations` when given.
fn text_runs(content: &str, annotations: Option<&Value>) -> Vec<Value> {
    split_text(content)
        .into_iter()
        .map(|piece| {
            let mut run = json!({ "type": "text", "text": { "content": piece } });
            if let Some(a) = annotations {
                run["annotations"] = a.clone();
            }
            run
        })
        .collect()
}

pub fn heading(label: &str) -> Value {
    json!({
        "object": "block",
        "type": "heading_1",
        "heading_1": { "rich_text": text_runs(label, None) }
    })
}

pub fn divider() -> Value {
    json!({ "object": "block", "type": "divider", "divider": {} })
}

pub fn placeholder(message: &str) -> Value {
    json!({
        "object": "block",
        "type": "paragraph",
        "paragraph": {
            "rich_text": text_runs(message, Some(&json!({ "italic": true })))
        }
    })
}

pub fn highlight_block(h: &Highlight) -> Value {
    json!({
        "object": "block",
        "type": "quote",
        "quote": { "rich_text": text_runs(&h.text, None) }
    })
}

/// One quote per thought: the quoted passage, then the reader's note in bold blue.
pub fn annotation_block(a: &Annotation) -> Value {
    let mut rich = Vec::new();
    if !a.abstract_text.is_empty() {
        rich.extend(text_runs(&a.abstract_text, None));
    }
    if !a.content.is_empty() {
        let prefix = if rich.is_empty() { "" } else { "\n" };
        let note = format!("{}💭 {}", prefix, a.content);
        rich.extend(text_runs(&note, Some(&json!({ "bold": true, "color": "blue" }))));
    }
    json!({
        "object": "block",
        "type": "quote",
        "quote": { "rich_text": rich }
    })
}

fn ascending<T>(chapters: &[Chapter<T>]) -> Vec<&Chapter<T>> {
    let mut sorted: Vec<&Chapter<T>> = chapters.iter().collect();
    sorted.sort_by_key(|c| c.chapter_uid);
    sorted
}

pub fn highlight_blocks(chapters: &[Chapter<Highlight>]) -> Vec<Value> {
    ascending(chapters)
        .into_iter()
        .flat_map(|c| c.items.iter().map(highlight_block))
        .collect()
}

pub fn annotation_blocks(chapters: &[Chapter<Annotation>]) -> Vec<Value> {
    ascending(chapters)
        .into_iter()
        .flat_map(|c| c.items.iter().map(annotation_block))
        .collect()
}

/// Plain text carried by a built block, used in logs and tests.
pub fn block_text(block: &Value) -> String {
    let Some(typ) = block.get("type").and_then(Value::as_str) else {
        return String::new();
    };
    block
        .get(typ)
        .and_then(|b| b.get("rich_text"))
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p.get("text")?.get("content")?.as_str())
                .collect()
        })
        .unwrap_or_default()
}
