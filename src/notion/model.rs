use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize, Debug)]
pub struct DatabaseProperty {
    pub id: String,
    #[serde(rename = "type")]
    pub typ: String,
}

#[derive(Deserialize, Debug)]
pub struct RetrieveDatabaseResp {
    pub id: String,
    #[serde(default)]
    pub title: Vec<Value>,
    pub properties: std::collections::HashMap<String, DatabaseProperty>,
}

#[derive(Deserialize, Debug)]
pub struct QueryDatabaseResp {
    #[serde(default)]
    pub results: Vec<PageRef>,
}

#[derive(Deserialize, Debug)]
pub struct PageRef {
    pub id: String,
}

/// Response of `PATCH /v1/blocks/{id}/children`: the newly created blocks.
#[derive(Deserialize, Debug, Default)]
pub struct AppendedBlocks {
    #[serde(default)]
    pub results: Vec<PageRef>,
}

/// One top-level block as returned by `GET /v1/blocks/{id}/children`.
#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct Block {
    pub id: String,
    #[serde(rename = "type")]
    pub typ: String,
    #[serde(flatten)]
    pub body: serde_json::Map<String, Value>,
}

impl Block {
    /// Plain text of a `heading_1` block, `None` for every other block type.
    pub fn heading_text(&self) -> Option<String> {
        if self.typ != "heading_1" {
            return None;
        }
        let rich = self.body.get("heading_1")?.get("rich_text")?.as_array()?;
        let text: String = rich
            .iter()
            .filter_map(|rt| {
                rt.get("plain_text")
                    .or_else(|| rt.get("text").and_then(|t| t.get("content")))
                    .and_then(Value::as_str)
            })
            .collect();
        Some(text)
    }
}

/// One page of child blocks.
#[derive(Deserialize, Debug, Clone, Default)]
pub struct BlockPage {
    #[serde(default)]
    pub results: Vec<Block>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_cursor: Option<String>,
}
