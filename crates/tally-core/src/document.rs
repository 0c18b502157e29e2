//! JSON documents and revisions
//!
//! A [`Document`] is the unit the store reads and writes: an id, an optional
//! revision, a tombstone flag and free-form JSON fields. It serializes with
//! the usual `_id` / `_rev` / `_deleted` keys.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Errors that can occur while interpreting documents
#[derive(Error, Debug)]
pub enum DocumentError {
    #[error("Automerge error: {0}")]
    Automerge(#[from] automerge::AutomergeError),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid field type for {0}")]
    InvalidType(String),

    #[error("Invalid UUID: {0}")]
    InvalidUuid(String),

    #[error("Invalid timestamp: {0}")]
    InvalidTimestamp(i64),

    #[error("Invalid revision: {0}")]
    InvalidRevision(String),

    #[error("Invalid document body for '{id}': {source}")]
    InvalidBody {
        id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A stored JSON document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: String,

    #[serde(rename = "_rev", default, skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,

    #[serde(rename = "_deleted", default, skip_serializing_if = "is_false")]
    pub deleted: bool,

    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl Document {
    /// Create an empty, never-written document
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            rev: None,
            deleted: false,
            fields: Map::new(),
        }
    }

    /// Builder-style field setter
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(key.into(), value.into());
        self
    }

    /// Set the revision this write is based on
    pub fn with_rev(mut self, rev: impl Into<String>) -> Self {
        self.rev = Some(rev.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(key.into(), value.into());
    }

    /// Serialize only the user fields (no `_id`/`_rev`)
    pub fn body_json(&self) -> String {
        Value::Object(self.fields.clone()).to_string()
    }

    /// Rebuild a document from its stored parts
    pub fn from_parts(
        id: impl Into<String>,
        rev: impl Into<String>,
        deleted: bool,
        body: &str,
    ) -> Result<Self, DocumentError> {
        let id = id.into();
        let fields = match serde_json::from_str::<Value>(body) {
            Ok(Value::Object(map)) => map,
            Ok(_) => return Err(DocumentError::InvalidType(format!("body of {}", id))),
            Err(source) => return Err(DocumentError::InvalidBody { id, source }),
        };

        Ok(Self {
            id,
            rev: Some(rev.into()),
            deleted,
            fields,
        })
    }
}

/// A parsed `<generation>-<hash>` revision
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub generation: u64,
    pub hash: String,
}

impl Revision {
    /// First revision of a brand-new document
    pub fn first() -> Self {
        Self {
            generation: 1,
            hash: fresh_hash(),
        }
    }

    /// Revision that follows this one
    pub fn next(&self) -> Self {
        Self {
            generation: self.generation + 1,
            hash: fresh_hash(),
        }
    }

    /// Next revision after an optional current one.
    ///
    /// An unparseable current revision restarts at generation 1.
    pub fn after(current: Option<&str>) -> Self {
        current
            .and_then(|rev| rev.parse::<Revision>().ok())
            .map(|rev| rev.next())
            .unwrap_or_else(Revision::first)
    }
}

fn fresh_hash() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

impl FromStr for Revision {
    type Err = DocumentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (generation, hash) = s
            .split_once('-')
            .ok_or_else(|| DocumentError::InvalidRevision(s.to_string()))?;
        let generation = generation
            .parse::<u64>()
            .map_err(|_| DocumentError::InvalidRevision(s.to_string()))?;
        if hash.is_empty() {
            return Err(DocumentError::InvalidRevision(s.to_string()));
        }
        Ok(Self {
            generation,
            hash: hash.to_string(),
        })
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.generation, self.hash)
    }
}
