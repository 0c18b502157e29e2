//! Automerge replica
//!
//! The replica is the source of truth for every stored document. It is a
//! single Automerge document with a `docs` map keyed by document id; each
//! entry holds the current revision, a tombstone flag and the JSON body.
//! Keeping bodies as JSON text lets the replica hold arbitrary documents
//! while Automerge still merges per-document entries independently.

use automerge::{transaction::Transactable, AutoCommit, ObjId, ObjType, ReadDoc, ROOT};

use crate::document::{Document, DocumentError};

/// Keys used in the Automerge document structure
mod keys {
    pub const DOCS: &str = "docs";
    pub const SCHEMA_VERSION: &str = "schema_version";

    pub const REV: &str = "rev";
    pub const DELETED: &str = "deleted";
    pub const BODY: &str = "body";
}

/// Current schema version
pub const CURRENT_SCHEMA_VERSION: u64 = 1;

/// One document as held by the replica
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEntry {
    pub id: String,
    pub rev: String,
    pub deleted: bool,
    pub body: String,
}

impl StoredEntry {
    /// Approximate bytes this entry adds to the saved replica
    pub fn size_hint(&self) -> u64 {
        (self.id.len() + self.rev.len() + self.body.len()) as u64
    }

    pub fn to_document(&self) -> Result<Document, DocumentError> {
        Document::from_parts(self.id.clone(), self.rev.clone(), self.deleted, &self.body)
    }
}

/// Document container backed by Automerge
pub struct ReplicaDocument {
    doc: AutoCommit,
}

impl ReplicaDocument {
    /// Create a new empty replica
    pub fn new() -> Result<Self, DocumentError> {
        let mut doc = AutoCommit::new();
        doc.put(ROOT, keys::SCHEMA_VERSION, CURRENT_SCHEMA_VERSION)?;
        doc.put_object(ROOT, keys::DOCS, ObjType::Map)?;
        Ok(Self { doc })
    }

    /// Load a replica from Automerge bytes
    pub fn load(bytes: &[u8]) -> Result<Self, DocumentError> {
        let doc = AutoCommit::load(bytes)?;
        let replica = Self { doc };
        // Fail early if the structure is not ours
        replica.docs_id()?;
        Ok(replica)
    }

    /// Save the replica to bytes
    pub fn save(&mut self) -> Vec<u8> {
        self.doc.save()
    }

    /// Merge another replica into this one
    pub fn merge(&mut self, other: &mut ReplicaDocument) -> Result<(), DocumentError> {
        self.doc.merge(&mut other.doc)?;
        Ok(())
    }

    /// Look up an entry, including tombstones
    pub fn get(&self, id: &str) -> Result<Option<StoredEntry>, DocumentError> {
        let docs_id = self.docs_id()?;
        match self.doc.get(&docs_id, id)? {
            Some((_, entry_id)) => Ok(Some(self.read_entry(&entry_id, id)?)),
            None => Ok(None),
        }
    }

    /// Insert or overwrite an entry
    pub fn write(&mut self, entry: &StoredEntry) -> Result<(), DocumentError> {
        let docs_id = self.docs_id()?;

        let entry_id = match self.doc.get(&docs_id, entry.id.as_str())? {
            Some((_, existing)) => existing,
            None => self
                .doc
                .put_object(&docs_id, entry.id.as_str(), ObjType::Map)?,
        };

        self.doc.put(&entry_id, keys::REV, entry.rev.clone())?;
        self.doc
            .put(&entry_id, keys::DELETED, if entry.deleted { 1_i64 } else { 0 })?;
        self.doc.put(&entry_id, keys::BODY, entry.body.clone())?;
        Ok(())
    }

    /// All entries, including tombstones
    pub fn entries(&self) -> Result<Vec<StoredEntry>, DocumentError> {
        let docs_id = self.docs_id()?;

        let mut entries = Vec::new();
        for key in self.doc.keys(&docs_id) {
            if let Some((_, entry_id)) = self.doc.get(&docs_id, &key)? {
                entries.push(self.read_entry(&entry_id, &key)?);
            }
        }
        Ok(entries)
    }

    /// Number of entries, including tombstones
    pub fn len(&self) -> usize {
        match self.docs_id() {
            Ok(docs_id) => self.doc.keys(&docs_id).count(),
            Err(_) => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ==================== Private helpers ====================

    fn docs_id(&self) -> Result<ObjId, DocumentError> {
        Ok(self
            .doc
            .get(ROOT, keys::DOCS)?
            .ok_or_else(|| DocumentError::MissingField(keys::DOCS.to_string()))?
            .1)
    }

    fn read_entry(&self, obj_id: &ObjId, id: &str) -> Result<StoredEntry, DocumentError> {
        let rev = self.get_string(obj_id, keys::REV)?;
        let body = self.get_string(obj_id, keys::BODY)?;
        let deleted = match self.doc.get(obj_id, keys::DELETED)? {
            Some((value, _)) => {
                value
                    .to_i64()
                    .ok_or_else(|| DocumentError::InvalidType(keys::DELETED.to_string()))?
                    != 0
            }
            None => false,
        };

        Ok(StoredEntry {
            id: id.to_string(),
            rev,
            deleted,
            body,
        })
    }

    fn get_string(&self, obj_id: &ObjId, key: &str) -> Result<String, DocumentError> {
        match self.doc.get(obj_id, key)? {
            Some((value, _)) => value
                .to_str()
                .map(|s| s.to_string())
                .ok_or_else(|| DocumentError::InvalidType(key.to_string())),
            None => Err(DocumentError::MissingField(key.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str, rev: &str, body: &str) -> StoredEntry {
        StoredEntry {
            id: id.to_string(),
            rev: rev.to_string(),
            deleted: false,
            body: body.to_string(),
        }
    }

    #[test]
    fn test_new_replica_is_empty() {
        let replica = ReplicaDocument::new().unwrap();
        assert!(replica.is_empty());
        assert!(replica.entries().unwrap().is_empty());
    }

    #[test]
    fn test_write_and_get() {
        let mut replica = ReplicaDocument::new().unwrap();
        replica
            .write(&entry("a", "1-abc", r#"{"title":"x"}"#))
            .unwrap();

        let stored = replica.get("a").unwrap().unwrap();
        assert_eq!(stored.rev, "1-abc");
        assert!(!stored.deleted);

        let doc = stored.to_document().unwrap();
        assert_eq!(doc.get("title").unwrap(), "x");
        assert!(replica.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_overwrite_and_tombstone() {
        let mut replica = ReplicaDocument::new().unwrap();
        replica.write(&entry("a", "1-abc", "{}")).unwrap();

        let mut tombstone = entry("a", "2-def", "{}");
        tombstone.deleted = true;
        replica.write(&tombstone).unwrap();

        let stored = replica.get("a").unwrap().unwrap();
        assert_eq!(stored.rev, "2-def");
        assert!(stored.deleted);
        assert_eq!(replica.len(), 1);
    }

    #[test]
    fn test_save_and_load_roundtrip() {
        let mut replica = ReplicaDocument::new().unwrap();
        replica.write(&entry("a", "1-abc", "{}")).unwrap();
        replica.write(&entry("b", "1-def", "{}")).unwrap();

        let bytes = replica.save();
        let loaded = ReplicaDocument::load(&bytes).unwrap();
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.get("b").unwrap().unwrap().rev, "1-def");
    }

    #[test]
    fn test_merge_replicas() {
        let mut left = ReplicaDocument::new().unwrap();
        let mut right = ReplicaDocument::load(&left.save()).unwrap();

        left.write(&entry("a", "1-abc", "{}")).unwrap();
        right.write(&entry("b", "1-def", "{}")).unwrap();

        left.merge(&mut right).unwrap();
        assert_eq!(left.len(), 2);
    }

    #[test]
    fn test_load_rejects_garbage() {
        assert!(ReplicaDocument::load(b"not automerge").is_err());
    }
}
