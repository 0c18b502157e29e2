//! Data models for Tally
//!
//! A [`Todo`] is stored as a plain [`Document`] tagged with `"type": "todo"`.
//! Timestamps are kept as milliseconds since the epoch so that the view
//! index orders them numerically.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::document::{Document, DocumentError};

/// Document `type` value for todos
pub const TODO_TYPE: &str = "todo";

/// A single task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Todo {
    /// Unique identifier
    pub id: Uuid,
    pub title: String,
    pub completed: bool,
    /// Tags for organization
    pub tags: Vec<String>,
    /// When this todo was created
    pub created_at: DateTime<Utc>,
    /// When this todo was last updated
    pub updated_at: DateTime<Utc>,
    /// Revision of the stored document, if it has been saved
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
}

impl Todo {
    /// Create a new, open todo
    pub fn new(title: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            completed: false,
            tags: Vec::new(),
            created_at: now,
            updated_at: now,
            rev: None,
        }
    }

    pub fn set_title(&mut self, title: impl Into<String>) {
        self.title = title.into();
        self.touch();
    }

    pub fn set_completed(&mut self, completed: bool) {
        if self.completed != completed {
            self.completed = completed;
            self.touch();
        }
    }

    /// Add a tag
    pub fn add_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
            self.touch();
        }
    }

    /// Remove a tag
    pub fn remove_tag(&mut self, tag: &str) {
        if let Some(pos) = self.tags.iter().position(|t| t == tag) {
            self.tags.remove(pos);
            self.touch();
        }
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|t| t == tag)
    }

    /// Document id under which this todo is stored
    pub fn doc_id(&self) -> String {
        format!("todo:{}", self.id)
    }

    pub fn to_document(&self) -> Document {
        let mut doc = Document::new(self.doc_id())
            .with_field("type", TODO_TYPE)
            .with_field("title", self.title.clone())
            .with_field("completed", self.completed)
            .with_field("tags", self.tags.clone())
            .with_field("created_at", self.created_at.timestamp_millis())
            .with_field("updated_at", self.updated_at.timestamp_millis());
        doc.rev = self.rev.clone();
        doc
    }

    pub fn from_document(doc: &Document) -> Result<Self, DocumentError> {
        if doc.get("type").and_then(Value::as_str) != Some(TODO_TYPE) {
            return Err(DocumentError::InvalidType("type".to_string()));
        }

        let raw_id = doc.id.strip_prefix("todo:").unwrap_or(&doc.id);
        let id = Uuid::parse_str(raw_id).map_err(|_| DocumentError::InvalidUuid(doc.id.clone()))?;

        let title = doc
            .get("title")
            .and_then(Value::as_str)
            .ok_or_else(|| DocumentError::MissingField("title".to_string()))?
            .to_string();

        let completed = doc
            .get("completed")
            .and_then(Value::as_bool)
            .unwrap_or(false);

        let tags = match doc.get("tags") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|t| t.as_str().map(String::from))
                .collect(),
            Some(_) => return Err(DocumentError::InvalidType("tags".to_string())),
            None => Vec::new(),
        };

        Ok(Self {
            id,
            title,
            completed,
            tags,
            created_at: read_timestamp(doc, "created_at")?,
            updated_at: read_timestamp(doc, "updated_at")?,
            rev: doc.rev.clone(),
        })
    }

    fn touch(&mut self) {
        self.updated_at = now_millis();
    }
}

/// Current time truncated to what survives storage
fn now_millis() -> DateTime<Utc> {
    let millis = Utc::now().timestamp_millis();
    Utc.timestamp_millis_opt(millis)
        .single()
        .unwrap_or_else(Utc::now)
}

fn read_timestamp(doc: &Document, field: &str) -> Result<DateTime<Utc>, DocumentError> {
    let millis = doc
        .get(field)
        .and_then(Value::as_i64)
        .ok_or_else(|| DocumentError::MissingField(field.to_string()))?;
    Utc.timestamp_millis_opt(millis)
        .single()
        .ok_or(DocumentError::InvalidTimestamp(millis))
}
