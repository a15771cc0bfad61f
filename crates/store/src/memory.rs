//! In-process backend. Holds tables and objects in RAM; supports injected
//! failures and records every call so tests can assert on traffic.

#![forbid(unsafe_code)]

use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;
use chrono::Utc;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use storefront_core::Table;
use tracing::debug;

use crate::{has_updated_at, public_object_url, stamp_new, Backend, BackendError, BackendResult, Record};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Op {
    BatchInsert,
    Insert,
    Update,
    BatchDelete,
    DeleteWhere,
    SelectEq,
    SelectAll,
    Upload,
}

/// One observed backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Call {
    pub op: Op,
    pub table: Option<Table>,
    /// Row id, object path or row count, depending on the op.
    pub detail: String,
}

/// Make matching calls fail. `remaining: None` fails forever.
#[derive(Debug, Clone)]
pub struct FailRule {
    pub op: Op,
    pub table: Option<Table>,
    pub remaining: Option<usize>,
    pub error: BackendError,
}

impl FailRule {
    pub fn always(op: Op, table: Option<Table>, error: BackendError) -> Self {
        Self { op, table, remaining: None, error }
    }

    pub fn once(op: Op, table: Option<Table>, error: BackendError) -> Self {
        Self { op, table, remaining: Some(1), error }
    }
}

#[derive(Default)]
struct State {
    tables: FxHashMap<Table, Vec<Record>>,
    objects: FxHashMap<String, (Bytes, String)>,
    calls: Vec<Call>,
    rules: Vec<FailRule>,
}

impl State {
    fn rows(&mut self, table: Table) -> &mut Vec<Record> {
        self.tables.entry(table).or_default()
    }

    /// Log the call, then consult failure rules.
    fn enter(&mut self, op: Op, table: Option<Table>, detail: impl Into<String>) -> BackendResult<()> {
        self.calls.push(Call { op, table, detail: detail.into() });
        let hit = self
            .rules
            .iter_mut()
            .position(|r| r.op == op && (r.table.is_none() || r.table == table) && r.remaining != Some(0));
        if let Some(i) = hit {
            let rule = &mut self.rules[i];
            if let Some(n) = rule.remaining.as_mut() {
                *n -= 1;
            }
            debug!(?op, ?table, error = %rule.error, "injected backend failure");
            return Err(rule.error.clone());
        }
        Ok(())
    }
}

pub struct MemoryBackend {
    state: Mutex<State>,
    public_base: String,
    bucket: String,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_storage(crate::public_base_url(), crate::bucket_name())
    }

    pub fn with_storage(public_base: impl Into<String>, bucket: impl Into<String>) -> Self {
        Self { state: Mutex::new(State::default()), public_base: public_base.into(), bucket: bucket.into() }
    }

    fn state(&self) -> BackendResult<MutexGuard<'_, State>> {
        self.state.lock().map_err(|_| BackendError::Internal("memory backend lock poisoned".into()))
    }

    pub fn push_rule(&self, rule: FailRule) {
        if let Ok(mut st) = self.state() {
            st.rules.push(rule);
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().map(|st| st.calls.clone()).unwrap_or_default()
    }

    pub fn reset_calls(&self) {
        if let Ok(mut st) = self.state() {
            st.calls.clear();
        }
    }

    /// Snapshot of a table's rows.
    pub fn rows(&self, table: Table) -> Vec<Record> {
        self.state().map(|st| st.tables.get(&table).cloned().unwrap_or_default()).unwrap_or_default()
    }

    /// Stored object bytes and content type.
    pub fn object(&self, path: &str) -> Option<(Bytes, String)> {
        self.state().ok().and_then(|st| st.objects.get(path).cloned())
    }

    /// Insert rows verbatim (ids included), bypassing rules and the call log.
    pub fn seed(&self, table: Table, records: Vec<Record>) {
        if let Ok(mut st) = self.state() {
            st.rows(table).extend(records);
        }
    }
}

/// Missing columns read as null, matching SQL semantics.
fn column_value<'a>(rec: &'a Record, column: &str) -> &'a Json {
    rec.get(column).unwrap_or(&Json::Null)
}

fn id_of(rec: &Record) -> Option<&str> {
    rec.get("id").and_then(|v| v.as_str())
}

#[async_trait::async_trait]
impl Backend for MemoryBackend {
    async fn batch_insert(&self, table: Table, records: Vec<Record>) -> BackendResult<Vec<Record>> {
        let mut st = self.state()?;
        st.enter(Op::BatchInsert, Some(table), records.len().to_string())?;
        let created: Vec<Record> = records.into_iter().map(|r| stamp_new(table, r)).collect();
        st.rows(table).extend(created.iter().cloned());
        Ok(created)
    }

    async fn insert(&self, table: Table, record: Record) -> BackendResult<Record> {
        let mut st = self.state()?;
        st.enter(Op::Insert, Some(table), "1")?;
        let created = stamp_new(table, record);
        st.rows(table).push(created.clone());
        Ok(created)
    }

    async fn update(&self, table: Table, id: &str, fields: Record) -> BackendResult<Record> {
        let mut st = self.state()?;
        st.enter(Op::Update, Some(table), id)?;
        let row = st
            .rows(table)
            .iter_mut()
            .find(|r| id_of(r) == Some(id))
            .ok_or_else(|| BackendError::NotFound(format!("{table}/{id}")))?;
        for (k, v) in fields {
            if k != "id" {
                row.insert(k, v);
            }
        }
        if has_updated_at(table) {
            row.insert("updated_at".into(), Json::String(Utc::now().to_rfc3339()));
        }
        Ok(row.clone())
    }

    async fn batch_delete(&self, table: Table, ids: &[String]) -> BackendResult<()> {
        let mut st = self.state()?;
        st.enter(Op::BatchDelete, Some(table), ids.join(","))?;
        st.rows(table).retain(|r| !id_of(r).map(|id| ids.iter().any(|x| x == id)).unwrap_or(false));
        Ok(())
    }

    async fn delete_where(&self, table: Table, column: &str, value: &Json) -> BackendResult<u64> {
        let mut st = self.state()?;
        st.enter(Op::DeleteWhere, Some(table), format!("{column}={value}"))?;
        let rows = st.rows(table);
        let before = rows.len();
        rows.retain(|r| column_value(r, column) != value);
        Ok((before - rows.len()) as u64)
    }

    async fn select_eq(&self, table: Table, column: &str, value: &Json) -> BackendResult<Vec<Record>> {
        let mut st = self.state()?;
        st.enter(Op::SelectEq, Some(table), format!("{column}={value}"))?;
        Ok(st.rows(table).iter().filter(|r| column_value(r, column) == value).cloned().collect())
    }

    async fn select_all(&self, table: Table) -> BackendResult<Vec<Record>> {
        let mut st = self.state()?;
        st.enter(Op::SelectAll, Some(table), "*")?;
        Ok(st.rows(table).to_vec())
    }

    async fn upload_object(&self, bytes: Bytes, path: &str, content_type: &str) -> BackendResult<String> {
        let mut st = self.state()?;
        st.enter(Op::Upload, None, path)?;
        if st.objects.contains_key(path) {
            return Err(BackendError::Conflict(format!("object already exists: {path}")));
        }
        st.objects.insert(path.to_string(), (bytes, content_type.to_string()));
        Ok(public_object_url(&self.public_base, &self.bucket, path))
    }
}
