//! Storefront persistence: a SQLite implementation of the backend boundary.
//! Rows are kept as JSON documents per table; objects as blobs keyed by path.

#![forbid(unsafe_code)]

use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use bytes::Bytes;
use metrics::{counter, histogram};
use rusqlite::{params, types::Value as SqlValue, Connection, OptionalExtension};
use serde_json::Value as Json;
use storefront_core::Table;
use storefront_store::{
    has_updated_at, public_object_url, stamp_new, Backend, BackendError, BackendResult, Record,
};
use tracing::debug;

/// SQLite-backed store. Calls are synchronous under the connection mutex.
pub struct SqliteBackend {
    db: Mutex<Connection>,
    public_base: String,
    bucket: String,
}

impl SqliteBackend {
    pub fn open_default() -> Result<Self> {
        let path = std::env::var("STOREFRONT_DB_PATH").unwrap_or_else(|_| default_db_path());
        Self::open(&path)
    }

    pub fn open(path: &str) -> Result<Self> {
        let db = Connection::open(path).with_context(|| format!("opening sqlite db at {}", path))?;
        Self::with_connection(db)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory().context("opening in-memory sqlite")?)
    }

    fn with_connection(db: Connection) -> Result<Self> {
        let started = std::time::Instant::now();
        db.pragma_update(None, "journal_mode", "WAL").ok();
        db.pragma_update(None, "synchronous", "NORMAL").ok();
        for table in Table::ALL {
            db.execute(
                &format!(
                    "CREATE TABLE IF NOT EXISTS {t} (
                        seq  INTEGER PRIMARY KEY AUTOINCREMENT,
                        id   TEXT NOT NULL UNIQUE,
                        body TEXT NOT NULL
                    )",
                    t = table.as_str()
                ),
                [],
            )
            .with_context(|| format!("creating {} table", table))?;
        }
        db.execute(
            "CREATE TABLE IF NOT EXISTS objects (
                path         TEXT PRIMARY KEY,
                content_type TEXT NOT NULL,
                bytes        BLOB NOT NULL,
                ts           INTEGER NOT NULL
            )",
            [],
        )
        .context("creating objects table")?;
        let me = Self {
            db: Mutex::new(db),
            public_base: storefront_store::public_base_url(),
            bucket: storefront_store::bucket_name(),
        };
        histogram!("persist_open_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(me)
    }

    pub fn with_storage(mut self, public_base: impl Into<String>, bucket: impl Into<String>) -> Self {
        self.public_base = public_base.into();
        self.bucket = bucket.into();
        self
    }

    fn conn(&self) -> BackendResult<MutexGuard<'_, Connection>> {
        self.db.lock().map_err(|_| BackendError::Internal("sqlite connection lock poisoned".into()))
    }

    /// Stored object bytes and content type.
    pub fn object(&self, path: &str) -> BackendResult<Option<(Vec<u8>, String)>> {
        let db = self.conn()?;
        db.query_row("SELECT bytes, content_type FROM objects WHERE path = ?1", [path], |row| {
            Ok((row.get::<_, Vec<u8>>(0)?, row.get::<_, String>(1)?))
        })
        .optional()
        .map_err(db_err)
    }
}

fn db_err(e: rusqlite::Error) -> BackendError {
    BackendError::Storage(e.to_string())
}

fn encode(rec: &Record) -> BackendResult<String> {
    serde_json::to_string(rec).map_err(|e| BackendError::Decode(e.to_string()))
}

fn decode(body: &str) -> BackendResult<Record> {
    serde_json::from_str(body).map_err(|e| BackendError::Decode(e.to_string()))
}

fn record_id(rec: &Record) -> BackendResult<String> {
    rec.get("id")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| BackendError::Internal("row without id".into()))
}

/// SQL value comparable with `json_extract(body, ...)`; `None` means JSON null.
fn sql_value(v: &Json) -> Option<SqlValue> {
    match v {
        Json::Null => None,
        Json::Bool(b) => Some(SqlValue::Integer(*b as i64)),
        Json::Number(n) => Some(match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => SqlValue::Real(n.as_f64().unwrap_or(0.0)),
        }),
        Json::String(s) => Some(SqlValue::Text(s.clone())),
        other => Some(SqlValue::Text(other.to_string())),
    }
}

/// `WHERE` clause + bound params for `column == value`.
fn where_eq(column: &str, value: &Json) -> (String, Vec<SqlValue>) {
    let path = SqlValue::Text(format!("$.{}", column));
    match sql_value(value) {
        None => ("json_extract(body, ?1) IS NULL".to_string(), vec![path]),
        Some(v) => ("json_extract(body, ?1) = ?2".to_string(), vec![path, v]),
    }
}

fn observe_write(started: std::time::Instant) {
    histogram!("persist_write_ms", started.elapsed().as_secs_f64() * 1000.0);
    counter!("persist_write_total", 1u64);
}

#[async_trait::async_trait]
impl Backend for SqliteBackend {
    async fn batch_insert(&self, table: Table, records: Vec<Record>) -> BackendResult<Vec<Record>> {
        let started = std::time::Instant::now();
        let mut db = self.conn()?;
        let tx = db.transaction().map_err(db_err)?;
        let mut out = Vec::with_capacity(records.len());
        for rec in records {
            let rec = stamp_new(table, rec);
            tx.execute(
                &format!("INSERT INTO {} (id, body) VALUES (?1, ?2)", table.as_str()),
                params![record_id(&rec)?, encode(&rec)?],
            )
            .map_err(db_err)?;
            out.push(rec);
        }
        tx.commit().map_err(db_err)?;
        observe_write(started);
        debug!(%table, rows = out.len(), "batch insert");
        Ok(out)
    }

    async fn insert(&self, table: Table, record: Record) -> BackendResult<Record> {
        let mut rows = self.batch_insert(table, vec![record]).await?;
        rows.pop().ok_or_else(|| BackendError::Internal("insert returned no row".into()))
    }

    async fn update(&self, table: Table, id: &str, fields: Record) -> BackendResult<Record> {
        let started = std::time::Instant::now();
        let mut db = self.conn()?;
        let tx = db.transaction().map_err(db_err)?;
        let body: Option<String> = tx
            .query_row(&format!("SELECT body FROM {} WHERE id = ?1", table.as_str()), [id], |r| r.get(0))
            .optional()
            .map_err(db_err)?;
        let mut row = decode(&body.ok_or_else(|| BackendError::NotFound(format!("{table}/{id}")))?)?;
        for (k, v) in fields {
            if k != "id" {
                row.insert(k, v);
            }
        }
        if has_updated_at(table) {
            row.insert("updated_at".into(), Json::String(chrono::Utc::now().to_rfc3339()));
        }
        tx.execute(&format!("UPDATE {} SET body = ?1 WHERE id = ?2", table.as_str()), params![encode(&row)?, id])
            .map_err(db_err)?;
        tx.commit().map_err(db_err)?;
        observe_write(started);
        Ok(row)
    }

    async fn batch_delete(&self, table: Table, ids: &[String]) -> BackendResult<()> {
        let started = std::time::Instant::now();
        let mut db = self.conn()?;
        let tx = db.transaction().map_err(db_err)?;
        let mut removed = 0usize;
        for id in ids {
            removed += tx
                .execute(&format!("DELETE FROM {} WHERE id = ?1", table.as_str()), [id])
                .map_err(db_err)?;
        }
        tx.commit().map_err(db_err)?;
        observe_write(started);
        debug!(%table, requested = ids.len(), removed, "batch delete");
        Ok(())
    }

    async fn delete_where(&self, table: Table, column: &str, value: &Json) -> BackendResult<u64> {
        let started = std::time::Instant::now();
        let db = self.conn()?;
        let (clause, args) = where_eq(column, value);
        let n = db
            .execute(
                &format!("DELETE FROM {} WHERE {}", table.as_str(), clause),
                rusqlite::params_from_iter(args.iter()),
            )
            .map_err(db_err)?;
        observe_write(started);
        Ok(n as u64)
    }

    async fn select_eq(&self, table: Table, column: &str, value: &Json) -> BackendResult<Vec<Record>> {
        let started = std::time::Instant::now();
        let db = self.conn()?;
        let (clause, args) = where_eq(column, value);
        let mut stmt = db
            .prepare(&format!("SELECT body FROM {} WHERE {} ORDER BY seq", table.as_str(), clause))
            .map_err(db_err)?;
        let mut rows = stmt.query(rusqlite::params_from_iter(args.iter())).map_err(db_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(db_err)? {
            let body: String = row.get(0).map_err(db_err)?;
            out.push(decode(&body)?);
        }
        histogram!("persist_get_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(out)
    }

    async fn select_all(&self, table: Table) -> BackendResult<Vec<Record>> {
        let started = std::time::Instant::now();
        let db = self.conn()?;
        let mut stmt = db.prepare(&format!("SELECT body FROM {} ORDER BY seq", table.as_str())).map_err(db_err)?;
        let mut rows = stmt.query([]).map_err(db_err)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next().map_err(db_err)? {
            let body: String = row.get(0).map_err(db_err)?;
            out.push(decode(&body)?);
        }
        histogram!("persist_get_ms", started.elapsed().as_secs_f64() * 1000.0);
        Ok(out)
    }

    async fn upload_object(&self, bytes: Bytes, path: &str, content_type: &str) -> BackendResult<String> {
        let started = std::time::Instant::now();
        let db = self.conn()?;
        let exists: Option<i64> = db
            .query_row("SELECT 1 FROM objects WHERE path = ?1", [path], |r| r.get(0))
            .optional()
            .map_err(db_err)?;
        if exists.is_some() {
            return Err(BackendError::Conflict(format!("object already exists: {path}")));
        }
        db.execute(
            "INSERT INTO objects(path, content_type, bytes, ts) VALUES (?1, ?2, ?3, ?4)",
            params![path, content_type, &bytes[..], now_ts()],
        )
        .map_err(db_err)?;
        observe_write(started);
        Ok(public_object_url(&self.public_base, &self.bucket, path))
    }
}

fn default_db_path() -> String {
    if let Some(home) = std::env::var_os("HOME") {
        let mut p = std::path::PathBuf::from(home);
        p.push(".storefront");
        let _ = std::fs::create_dir_all(&p);
        p.push("storefront.db");
        return p.to_string_lossy().to_string();
    }
    // Fallback to current directory
    "storefront.db".to_string()
}

fn now_ts() -> i64 {
    let now = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default();
    now.as_secs() as i64
}
