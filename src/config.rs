//! Configuration loader and validator for the bookshelf to Notion syncer.
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::notion::NotionIds;
use crate::sync::retry::RetryPolicy;
use crate::sync::Pacing;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub upstream: Upstream,
    pub notion: Notion,
}

/// App-level settings. Pauses are in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    #[serde(default = "default_entity_pause")]
    pub entity_pause_ms: u64,
    #[serde(default = "default_append_pause")]
    pub append_pause_ms: u64,
    #[serde(default = "default_delete_pause")]
    pub delete_pause_ms: u64,
    #[serde(default = "default_refresh_pause")]
    pub refresh_pause_ms: u64,
    #[serde(default = "default_session_retry_attempts")]
    pub session_retry_attempts: u32,
}

/// Reading service settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Upstream {
    #[serde(default = "default_upstream_base")]
    pub base_url: String,
    #[serde(default)]
    pub cookie: String,
}

/// Notion API settings and database mapping.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Notion {
    #[serde(default)]
    pub token: String,
    pub version: String,
    #[serde(default)]
    pub database_id: String,
    pub fields: BookFields,
    #[serde(default)]
    pub sections: Sections,
}

/// Property names of the book database.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookFields {
    pub title: String,
    pub author: String,
    pub translator: String,
    pub category: String,
    pub cover: String,
    pub isbn: String,
    pub publisher: String,
    pub status: String,
    pub book_id: String,
    pub note_count: String,
}

/// Heading labels that delimit the managed sections of a book page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Sections {
    pub highlights: String,
    pub annotations: String,
    pub placeholder: String,
}

impl Default for Sections {
    fn default() -> Self {
        Self {
            highlights: "📌 Highlights".into(),
            annotations: "💭 Thoughts".into(),
            placeholder: "Nothing here yet".into(),
        }
    }
}

fn default_entity_pause() -> u64 {
    1000
}

fn default_append_pause() -> u64 {
    500
}

fn default_delete_pause() -> u64 {
    100
}

fn default_refresh_pause() -> u64 {
    300
}

fn default_session_retry_attempts() -> u32 {
    2
}

fn default_upstream_base() -> String {
    "https://weread.qq.com/".into()
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Default location of the sync state database.
    pub fn database_url(&self) -> String {
        format!(
            "sqlite://{}/sync-state.db",
            self.app.data_dir.trim_end_matches('/')
        )
    }

    /// Apply `WEREAD_COOKIE`, `NOTION_TOKEN` and `NOTION_DATABASE_ID` when set.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(cookie) = std::env::var("WEREAD_COOKIE") {
            self.upstream.cookie = cookie;
        }
        if let Ok(token) = std::env::var("NOTION_TOKEN") {
            self.notion.token = token;
        }
        if let Ok(db) = std::env::var("NOTION_DATABASE_ID") {
            self.notion.database_id = db;
        }
    }

    pub fn notion_ids(&self) -> NotionIds {
        let f = &self.notion.fields;
        NotionIds {
            database_id: self.notion.database_id.clone(),
            f_title: f.title.clone(),
            f_author: f.author.clone(),
            f_translator: f.translator.clone(),
            f_category: f.category.clone(),
            f_cover: f.cover.clone(),
            f_isbn: f.isbn.clone(),
            f_publisher: f.publisher.clone(),
            f_status: f.status.clone(),
            f_book_id: f.book_id.clone(),
            f_note_count: f.note_count.clone(),
        }
    }

    /// Fields whose absence from the database forces a full resync.
    pub fn required_fields(&self) -> Vec<String> {
        let f = &self.notion.fields;
        vec![
            f.title.clone(),
            f.author.clone(),
            f.status.clone(),
            f.category.clone(),
            f.cover.clone(),
            f.note_count.clone(),
        ]
    }

    pub fn pacing(&self) -> Pacing {
        Pacing {
            between_entities: Duration::from_millis(self.app.entity_pause_ms),
            between_appends: Duration::from_millis(self.app.append_pause_ms),
            between_deletes: Duration::from_millis(self.app.delete_pause_ms),
        }
    }

    pub fn session_retry(&self) -> RetryPolicy {
        RetryPolicy::new(self.app.session_retry_attempts)
    }
}

/// Load configuration from a YAML file, apply env overrides and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    cfg.apply_env_overrides();
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }
    if cfg.app.session_retry_attempts == 0 {
        return Err(ConfigError::Invalid(
            "app.session_retry_attempts must be > 0",
        ));
    }

    if reqwest::Url::parse(&cfg.upstream.base_url).is_err() {
        return Err(ConfigError::Invalid("upstream.base_url must be a valid URL"));
    }
    if cfg.upstream.cookie.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "upstream.cookie must be non-empty (or set WEREAD_COOKIE)",
        ));
    }

    if cfg.notion.token.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "notion.token must be non-empty (or set NOTION_TOKEN)",
        ));
    }
    if cfg.notion.version.trim().is_empty() {
        return Err(ConfigError::Invalid("notion.version must be non-empty"));
    }
    if cfg.notion.database_id.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "notion.database_id must be non-empty (or set NOTION_DATABASE_ID)",
        ));
    }

    let f = &cfg.notion.fields;
    let named = [
        (&f.title, "notion.fields.title must be non-empty"),
        (&f.author, "notion.fields.author must be non-empty"),
        (&f.translator, "notion.fields.translator must be non-empty"),
        (&f.category, "notion.fields.category must be non-empty"),
        (&f.cover, "notion.fields.cover must be non-empty"),
        (&f.isbn, "notion.fields.isbn must be non-empty"),
        (&f.publisher, "notion.fields.publisher must be non-empty"),
        (&f.status, "notion.fields.status must be non-empty"),
        (&f.book_id, "notion.fields.book_id must be non-empty"),
        (&f.note_count, "notion.fields.note_count must be non-empty"),
    ];
    for (value, msg) in named {
        if value.trim().is_empty() {
            return Err(ConfigError::Invalid(msg));
        }
    }

    let s = &cfg.notion.sections;
    if s.highlights.trim().is_empty() || s.annotations.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "notion.sections labels must be non-empty",
        ));
    }
    if s.highlights == s.annotations {
        return Err(ConfigError::Invalid(
            "notion.sections.highlights and notion.sections.annotations must differ",
        ));
    }

    Ok(())
}

/// Returns an example YAML document covering every key.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  entity_pause_ms: 1000
  append_pause_ms: 500
  delete_pause_ms: 100
  refresh_pause_ms: 300
  session_retry_attempts: 2

upstream:
  base_url: "https://weread.qq.com/"
  cookie: "wr_vid=1; wr_skey=abc"

notion:
  token: "YOUR_NOTION_INTEGRATION_TOKEN"
  version: "2022-06-28"
  database_id: "NOTION_BOOK_DATABASE_ID"
  fields:
    title: "Title"
    author: "Author"
    translator: "Translator"
    category: "Category"
    cover: "Cover"
    isbn: "ISBN"
    publisher: "Publisher"
    status: "Status"
    book_id: "Book ID"
    note_count: "Notes"
  sections:
    highlights: "📌 Highlights"
    annotations: "💭 Thoughts"
    placeholder: "Nothing here yet"
"#
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn example_cfg() -> Config {
        serde_yaml::from_str(example()).unwrap()
    }

    #[test]
    fn parse_example_ok() {
        let cfg = example_cfg();
        validate(&cfg).unwrap();
        assert_eq!(cfg.app.session_retry_attempts, 2);
        assert_eq!(cfg.notion.sections.highlights, "📌 Highlights");
    }

    #[test]
    fn defaults_fill_optional_keys() {
        let yaml = r#"app:
  data_dir: "./data"
upstream:
  cookie: "a=b"
notion:
  token: "t"
  version: "2022-06-28"
  database_id: "db"
  fields:
    title: "T"
    author: "A"
    translator: "Tr"
    category: "C"
    cover: "Co"
    isbn: "I"
    publisher: "P"
    status: "S"
    book_id: "B"
    note_count: "N"
"#;
        let cfg: Config = serde_yaml::from_str(yaml).unwrap();
        validate(&cfg).unwrap();
        assert_eq!(cfg.app.entity_pause_ms, 1000);
        assert_eq!(cfg.app.append_pause_ms, 500);
        assert_eq!(cfg.upstream.base_url, "https://weread.qq.com/");
        assert_eq!(cfg.notion.sections, Sections::default());
    }

    #[test]
    fn invalid_cookie() {
        let mut cfg = example_cfg();
        cfg.upstream.cookie = "  ".into();
        match validate(&cfg).unwrap_err() {
            ConfigError::Invalid(msg) => assert!(msg.contains("upstream.cookie")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_database_id() {
        let mut cfg = example_cfg();
        cfg.notion.database_id = "".into();
        match validate(&cfg).unwrap_err() {
            ConfigError::Invalid(msg) => assert!(msg.contains("database_id")),
            _ => panic!("wrong error"),
        }
    }

    #[test]
    fn invalid_field_mappings() {
        let mut cfg = example_cfg();
        cfg.notion.fields.title = "".into();
        match validate(&cfg).unwrap_err() {
            ConfigError::Invalid(msg) => assert!(msg.contains("fields.title")),
            _ => panic!("wrong error"),
        }

        let mut cfg = example_cfg();
        cfg.notion.fields.note_count = "".into();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn section_labels_must_differ() {
        let mut cfg = example_cfg();
        cfg.notion.sections.annotations = cfg.notion.sections.highlights.clone();
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn zero_session_attempts_rejected() {
        let mut cfg = example_cfg();
        cfg.app.session_retry_attempts = 0;
        assert!(matches!(validate(&cfg), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn required_fields_follow_mapping() {
        let cfg = example_cfg();
        assert_eq!(
            cfg.required_fields(),
            vec!["Title", "Author", "Status", "Category", "Cover", "Notes"]
        );
    }

    #[test]
    fn ensure_dirs_creates_data_dir() {
        let td = tempdir().unwrap();
        let data_path = td.path().join("data");
        let mut cfg = example_cfg();
        cfg.app.data_dir = data_path.to_string_lossy().to_string();
        cfg.ensure_dirs().unwrap();
        assert!(data_path.exists());
        assert!(cfg.database_url().ends_with("/data/sync-state.db"));
    }

    #[test]
    fn load_from_file_ok() {
        let td = tempdir().unwrap();
        let p = td.path().join("config.yaml");
        fs::write(&p, example()).unwrap();
        let cfg = load(Some(&p)).unwrap();
        assert_eq!(cfg.notion.fields.book_id, "Book ID");
    }
}
