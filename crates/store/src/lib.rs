//! Storefront backend boundary: table CRUD plus object storage.
//!
//! The hosted database/storage service is abstracted behind [`Backend`]. Rows
//! travel as JSON objects ([`Record`]); typed rows from `storefront-core`
//! convert through [`to_record`] / [`from_record`].

#![forbid(unsafe_code)]

pub mod memory;

use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value as Json;
use storefront_core::Table;

pub use memory::{Call, FailRule, MemoryBackend, Op};

/// A row as exchanged with the backend.
pub type Record = serde_json::Map<String, Json>;

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendError {
    #[error("not_found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("storage: {0}")]
    Storage(String),
    #[error("decode: {0}")]
    Decode(String),
    #[error("unavailable: {0}")]
    Unavailable(String),
    #[error("internal: {0}")]
    Internal(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

/// Remote data service: CRUD on tables plus object upload.
///
/// Implementations assign `id` (and timestamps where the table has them) on
/// insert and return the stored rows.
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    /// Bulk create; returns the created rows with assigned ids, in input order.
    async fn batch_insert(&self, table: Table, records: Vec<Record>) -> BackendResult<Vec<Record>>;

    /// Single-row insert.
    async fn insert(&self, table: Table, record: Record) -> BackendResult<Record>;

    /// Partial update of one row; returns the row after the update.
    async fn update(&self, table: Table, id: &str, fields: Record) -> BackendResult<Record>;

    /// Delete every row whose id is listed. Unknown ids are ignored.
    async fn batch_delete(&self, table: Table, ids: &[String]) -> BackendResult<()>;

    /// Delete rows where `column == value`; returns the number removed.
    async fn delete_where(&self, table: Table, column: &str, value: &Json) -> BackendResult<u64>;

    /// Rows where `column == value`, in insertion order.
    async fn select_eq(&self, table: Table, column: &str, value: &Json) -> BackendResult<Vec<Record>>;

    /// Every row of `table`, in insertion order.
    async fn select_all(&self, table: Table) -> BackendResult<Vec<Record>>;

    /// Store an object and return its public URL.
    async fn upload_object(&self, bytes: Bytes, path: &str, content_type: &str) -> BackendResult<String>;
}

pub fn to_record<T: Serialize>(row: &T) -> BackendResult<Record> {
    match serde_json::to_value(row).map_err(|e| BackendError::Decode(e.to_string()))? {
        Json::Object(map) => Ok(map),
        other => Err(BackendError::Decode(format!("expected a JSON object, got {other}"))),
    }
}

pub fn from_record<T: DeserializeOwned>(record: Record) -> BackendResult<T> {
    serde_json::from_value(Json::Object(record)).map_err(|e| BackendError::Decode(e.to_string()))
}

pub fn from_records<T: DeserializeOwned>(records: Vec<Record>) -> BackendResult<Vec<T>> {
    records.into_iter().map(from_record).collect()
}

/// Tables carrying an `updated_at` column.
pub fn has_updated_at(table: Table) -> bool {
    matches!(table, Table::Products | Table::ProductVariants)
}

/// Assign an id (unless one is given) and creation timestamps to a new row.
pub fn stamp_new(table: Table, mut rec: Record) -> Record {
    let now = Json::String(chrono::Utc::now().to_rfc3339());
    if !matches!(rec.get("id"), Some(Json::String(s)) if !s.is_empty()) {
        rec.insert("id".into(), Json::String(uuid::Uuid::new_v4().to_string()));
    }
    rec.entry("created_at").or_insert_with(|| now.clone());
    if has_updated_at(table) {
        rec.entry("updated_at").or_insert(now);
    }
    rec
}

pub fn public_base_url() -> String {
    std::env::var("STOREFRONT_PUBLIC_URL")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "http://localhost:54321/storage/v1/object/public".to_string())
}

pub fn bucket_name() -> String {
    std::env::var("STOREFRONT_BUCKET")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| "product-images".to_string())
}

pub fn public_object_url(base: &str, bucket: &str, path: &str) -> String {
    format!("{}/{}/{}", base.trim_end_matches('/'), bucket, path.trim_start_matches('/'))
}
