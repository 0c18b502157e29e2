//! SQLite view index
//!
//! Named views are served from a SQLite table rather than by scanning the
//! replica. The replica remains the source of truth; an index for a view is
//! built from it on the first query of that view and reused until a write
//! marks it stale. That first build is the cold cost the sync bridge
//! pre-warms away.
//!
//! ## Tables
//!
//! - `schema_info` - Schema version tracking
//! - `view_rows` - One row per (view, indexed document)

use std::collections::HashSet;
use std::path::Path;

use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::error::{StorageError, StorageResult};
use crate::document::Document;
use crate::store::QueryParams;

/// Current schema version for migrations
pub const SCHEMA_VERSION: i32 = 1;

/// A named view: documents keyed by the value of one top-level field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewDefinition {
    pub name: String,
    pub field: String,
}

impl ViewDefinition {
    pub fn new(name: impl Into<String>, field: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            field: field.into(),
        }
    }
}

/// A row returned from the index, before documents are attached
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRow {
    pub id: String,
    pub key: Value,
}

/// Lazily built SQLite index over the replica
pub struct ViewIndex {
    conn: Connection,
    views: Vec<ViewDefinition>,
    built: HashSet<String>,
}

impl ViewIndex {
    /// Open or create the index database
    pub fn open(path: &Path, views: Vec<ViewDefinition>) -> StorageResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| StorageError::from_io(e, parent.to_path_buf()))?;
        }

        let conn = Connection::open(path)?;
        Self::with_connection(conn, views)
    }

    /// Open an in-memory index
    pub fn open_in_memory(views: Vec<ViewDefinition>) -> StorageResult<Self> {
        Self::with_connection(Connection::open_in_memory()?, views)
    }

    fn with_connection(conn: Connection, views: Vec<ViewDefinition>) -> StorageResult<Self> {
        init_schema(&conn)?;
        // Rows left over from a previous process may be stale; start unbuilt
        conn.execute("DELETE FROM view_rows", [])?;

        Ok(Self {
            conn,
            views,
            built: HashSet::new(),
        })
    }

    pub fn views(&self) -> &[ViewDefinition] {
        &self.views
    }

    pub fn has_view(&self, name: &str) -> bool {
        self.views.iter().any(|v| v.name == name)
    }

    pub fn is_built(&self, name: &str) -> bool {
        self.built.contains(name)
    }

    /// Mark every view stale
    pub fn invalidate(&mut self) {
        self.built.clear();
    }

    /// Rebuild one view from the given documents.
    ///
    /// Tombstones and documents without the view's field are skipped.
    /// Returns the number of indexed rows.
    pub fn build(&mut self, name: &str, docs: &[Document]) -> StorageResult<usize> {
        let Some(definition) = self.views.iter().find(|v| v.name == name).cloned() else {
            return Ok(0);
        };

        let tx = self.conn.transaction()?;
        tx.execute("DELETE FROM view_rows WHERE view = ?1", params![name])?;

        let mut count = 0;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO view_rows (view, key, key_json, doc_id) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for doc in docs.iter().filter(|d| !d.deleted) {
                if let Some(value) = doc.get(&definition.field) {
                    stmt.execute(params![name, sql_key(value), value.to_string(), doc.id])?;
                    count += 1;
                }
            }
        }

        tx.commit()?;
        self.built.insert(name.to_string());
        Ok(count)
    }

    /// Query a built view
    pub fn query(&self, name: &str, query: &QueryParams) -> StorageResult<Vec<IndexRow>> {
        let mut sql = String::from("SELECT doc_id, key_json FROM view_rows WHERE view = ?");
        let mut args = vec![SqlValue::Text(name.to_string())];

        if let Some(ref key) = query.key {
            sql.push_str(" AND key IS ?");
            args.push(sql_key(key));
        }

        // Descending queries walk from start_key downwards
        let (lower, upper) = if query.descending {
            (&query.end_key, &query.start_key)
        } else {
            (&query.start_key, &query.end_key)
        };
        if let Some(lower) = lower {
            sql.push_str(" AND key >= ?");
            args.push(sql_key(lower));
        }
        if let Some(upper) = upper {
            sql.push_str(" AND key <= ?");
            args.push(sql_key(upper));
        }

        let order = if query.descending { "DESC" } else { "ASC" };
        sql.push_str(&format!(" ORDER BY key {order}, doc_id {order}"));

        match query.limit {
            Some(limit) => {
                sql.push_str(" LIMIT ?");
                args.push(SqlValue::Integer(limit as i64));
            }
            None if query.skip > 0 => sql.push_str(" LIMIT -1"),
            None => {}
        }
        if query.skip > 0 {
            sql.push_str(" OFFSET ?");
            args.push(SqlValue::Integer(query.skip as i64));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(args), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut result = Vec::new();
        for row in rows {
            let (id, key_json) = row?;
            result.push(IndexRow {
                id,
                key: serde_json::from_str(&key_json).unwrap_or(Value::Null),
            });
        }
        Ok(result)
    }
}

/// Initialize the index schema
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_info (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );

        -- key is untyped so integers, reals and text keep their own ordering
        CREATE TABLE IF NOT EXISTS view_rows (
            view TEXT NOT NULL,
            key BLOB,
            key_json TEXT NOT NULL,
            doc_id TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_view_rows_key ON view_rows(view, key, doc_id);
        "#,
    )?;

    conn.execute(
        "INSERT OR REPLACE INTO schema_info (key, value) VALUES ('schema_version', ?1)",
        params![SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}

/// Map a JSON key onto a SQLite value with a sensible sort order
fn sql_key(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn docs() -> Vec<Document> {
        vec![
            Document::new("a").with_field("priority", 3),
            Document::new("b").with_field("priority", 1),
            Document::new("c").with_field("priority", 2),
            Document::new("d").with_field("other", true),
        ]
    }

    fn index() -> ViewIndex {
        ViewIndex::open_in_memory(vec![ViewDefinition::new("by_priority", "priority")]).unwrap()
    }

    fn ids(rows: &[IndexRow]) -> Vec<&str> {
        rows.iter().map(|r| r.id.as_str()).collect()
    }

    #[test]
    fn test_build_skips_docs_without_field() {
        let mut index = index();
        assert!(!index.is_built("by_priority"));

        let count = index.build("by_priority", &docs()).unwrap();
        assert_eq!(count, 3);
        assert!(index.is_built("by_priority"));
    }

    #[test]
    fn test_query_orders_by_key() {
        let mut index = index();
        index.build("by_priority", &docs()).unwrap();

        let rows = index.query("by_priority", &QueryParams::default()).unwrap();
        assert_eq!(ids(&rows), vec!["b", "c", "a"]);
        assert_eq!(rows[0].key, json!(1));

        let desc = QueryParams {
            descending: true,
            ..Default::default()
        };
        let rows = index.query("by_priority", &desc).unwrap();
        assert_eq!(ids(&rows), vec!["a", "c", "b"]);
    }

    #[test]
    fn test_query_key_range_and_limit() {
        let mut index = index();
        index.build("by_priority", &docs()).unwrap();

        let rows = index
            .query("by_priority", &QueryParams::with_key(json!(2)))
            .unwrap();
        assert_eq!(ids(&rows), vec!["c"]);

        let range = QueryParams {
            start_key: Some(json!(2)),
            end_key: Some(json!(3)),
            ..Default::default()
        };
        assert_eq!(ids(&index.query("by_priority", &range).unwrap()), vec!["c", "a"]);

        let limited = QueryParams {
            limit: Some(1),
            skip: 1,
            ..Default::default()
        };
        assert_eq!(ids(&index.query("by_priority", &limited).unwrap()), vec!["c"]);
    }

    #[test]
    fn test_tombstones_not_indexed() {
        let mut index = index();
        let mut docs = docs();
        docs[0].deleted = true;

        assert_eq!(index.build("by_priority", &docs).unwrap(), 2);
    }

    #[test]
    fn test_invalidate_marks_stale() {
        let mut index = index();
        index.build("by_priority", &docs()).unwrap();

        index.invalidate();
        assert!(!index.is_built("by_priority"));
        assert!(index.has_view("by_priority"));
        assert!(!index.has_view("nope"));
    }

    #[test]
    fn test_boolean_keys() {
        let mut index =
            ViewIndex::open_in_memory(vec![ViewDefinition::new("by_done", "completed")]).unwrap();
        let docs = vec![
            Document::new("a").with_field("completed", true),
            Document::new("b").with_field("completed", false),
        ];
        index.build("by_done", &docs).unwrap();

        let rows = index
            .query("by_done", &QueryParams::with_key(json!(true)))
            .unwrap();
        assert_eq!(ids(&rows), vec!["a"]);
        assert_eq!(rows[0].key, json!(true));
    }
}
