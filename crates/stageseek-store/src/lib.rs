//! Datastore collaborator capability for Stage Seek.
//!
//! The sync pipeline and web handlers never speak SQL; they go through the
//! [`Datastore`] trait, a thin query-builder capability with idempotent
//! upsert semantics. [`RestDatastore`] implements it against a PostgREST
//! dialect endpoint; [`MemoryDatastore`] is the seeded test double.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "stageseek-store";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("datastore request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("datastore returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("encoding record: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FilterOp {
    Eq,
    ILike,
    Gte,
}

#[derive(Debug, Clone)]
struct Filter {
    column: String,
    op: FilterOp,
    value: String,
}

/// Read-side query builder. Filters compose left to right; `columns` is an
/// opaque projection/embedding string passed through to the datastore.
#[derive(Debug, Clone, Default)]
pub struct SelectQuery {
    columns: Option<String>,
    filters: Vec<Filter>,
    order_asc: Option<String>,
}

impl SelectQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn columns(mut self, columns: impl Into<String>) -> Self {
        self.columns = Some(columns.into());
        self
    }

    pub fn eq(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push(Filter {
            column: column.into(),
            op: FilterOp::Eq,
            value: value.into(),
        });
        self
    }

    /// Case-insensitive pattern match; `%` wildcards as in the datastore.
    pub fn ilike(mut self, column: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.filters.push(Filter {
            column: column.into(),
            op: FilterOp::ILike,
            value: pattern.into(),
        });
        self
    }

    pub fn gte(mut self, column: impl Into<String>, value: impl Into<String>) -> Self {
        self.filters.push(Filter {
            column: column.into(),
            op: FilterOp::Gte,
            value: value.into(),
        });
        self
    }

    pub fn order_asc(mut self, column: impl Into<String>) -> Self {
        self.order_asc = Some(column.into());
        self
    }
}

/// The capability consumed by the sync core and the web handlers.
///
/// `upsert` is insert-or-update keyed on `conflict_key` (a column name, or a
/// comma-separated composite) and returns the resulting row; this is the
/// idempotence mechanism every sync write relies on.
#[async_trait]
pub trait Datastore: Send + Sync {
    async fn upsert(
        &self,
        table: &str,
        record: Value,
        conflict_key: &str,
    ) -> Result<Option<Value>, StoreError>;

    async fn insert(&self, table: &str, record: Value) -> Result<Option<Value>, StoreError>;

    async fn select(&self, table: &str, query: &SelectQuery) -> Result<Vec<Value>, StoreError>;

    /// Invoke an opaque stored procedure (e.g. the search ranking function).
    async fn rpc(&self, function: &str, params: Value) -> Result<Value, StoreError>;
}

fn postgrest_params(query: &SelectQuery) -> Vec<(String, String)> {
    let mut params = Vec::new();
    params.push((
        "select".to_string(),
        query.columns.clone().unwrap_or_else(|| "*".to_string()),
    ));
    for filter in &query.filters {
        let rendered = match filter.op {
            FilterOp::Eq => format!("eq.{}", filter.value),
            FilterOp::ILike => format!("ilike.{}", filter.value.replace('%', "*")),
            FilterOp::Gte => format!("gte.{}", filter.value),
        };
        params.push((filter.column.clone(), rendered));
    }
    if let Some(column) = &query.order_asc {
        params.push(("order".to_string(), format!("{column}.asc")));
    }
    params
}

/// PostgREST-dialect client. One instance per credential role: the anon key
/// for web reads, the service key for sync writes (bypasses row policies).
#[derive(Debug, Clone)]
pub struct RestDatastore {
    base_url: String,
    http: reqwest::Client,
}

impl RestDatastore {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> anyhow::Result<Self> {
        let mut headers = HeaderMap::new();
        let mut bearer = HeaderValue::from_str(&format!("Bearer {api_key}"))
            .context("building authorization header")?;
        bearer.set_sensitive(true);
        headers.insert(AUTHORIZATION, bearer);
        let mut apikey =
            HeaderValue::from_str(api_key).context("building apikey header")?;
        apikey.set_sensitive(true);
        headers.insert("apikey", apikey);

        let http = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(timeout)
            .default_headers(headers)
            .build()
            .context("building datastore http client")?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{}", self.base_url, table)
    }

    async fn read_rows(resp: reqwest::Response) -> Result<Vec<Value>, StoreError> {
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                message,
            });
        }
        let body: Value = resp.json().await?;
        match body {
            Value::Array(rows) => Ok(rows),
            Value::Null => Ok(Vec::new()),
            other => Ok(vec![other]),
        }
    }
}

#[async_trait]
impl Datastore for RestDatastore {
    async fn upsert(
        &self,
        table: &str,
        record: Value,
        conflict_key: &str,
    ) -> Result<Option<Value>, StoreError> {
        debug!(table, conflict_key, "datastore upsert");
        let resp = self
            .http
            .post(self.table_url(table))
            .query(&[("on_conflict", conflict_key)])
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&record)
            .send()
            .await?;
        Ok(Self::read_rows(resp).await?.into_iter().next())
    }

    async fn insert(&self, table: &str, record: Value) -> Result<Option<Value>, StoreError> {
        debug!(table, "datastore insert");
        let resp = self
            .http
            .post(self.table_url(table))
            .header("Prefer", "return=representation")
            .json(&record)
            .send()
            .await?;
        Ok(Self::read_rows(resp).await?.into_iter().next())
    }

    async fn select(&self, table: &str, query: &SelectQuery) -> Result<Vec<Value>, StoreError> {
        let resp = self
            .http
            .get(self.table_url(table))
            .query(&postgrest_params(query))
            .send()
            .await?;
        Self::read_rows(resp).await
    }

    async fn rpc(&self, function: &str, params: Value) -> Result<Value, StoreError> {
        let resp = self
            .http
            .post(format!("{}/rpc/{}", self.base_url, function))
            .json(&params)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let message = resp.text().await.unwrap_or_default();
            return Err(StoreError::Status {
                status: status.as_u16(),
                message,
            });
        }
        Ok(resp.json().await?)
    }
}

/// In-memory datastore honoring the same upsert/select semantics; used by
/// engine, orchestrator, and handler tests. Tables are keyed by name, rows
/// get generated ids, and rpc responses can be scripted per function.
#[derive(Debug, Default)]
pub struct MemoryDatastore {
    tables: Mutex<HashMap<String, Vec<Value>>>,
    rpc_responses: Mutex<HashMap<String, Value>>,
    failing_tables: Mutex<HashSet<String>>,
}

impl MemoryDatastore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a table's rows, for assertions.
    pub async fn rows(&self, table: &str) -> Vec<Value> {
        self.tables
            .lock()
            .await
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    pub async fn set_rpc_response(&self, function: &str, response: Value) {
        self.rpc_responses
            .lock()
            .await
            .insert(function.to_string(), response);
    }

    /// Make every subsequent write to `table` fail, to exercise the
    /// per-event recovery path.
    pub async fn fail_writes_to(&self, table: &str) {
        self.failing_tables.lock().await.insert(table.to_string());
    }

    async fn check_writable(&self, table: &str) -> Result<(), StoreError> {
        if self.failing_tables.lock().await.contains(table) {
            return Err(StoreError::Status {
                status: 503,
                message: format!("write to {table} rejected"),
            });
        }
        Ok(())
    }

    fn ensure_id(record: &mut Value) {
        if let Value::Object(map) = record {
            map.entry("id")
                .or_insert_with(|| Value::String(Uuid::new_v4().to_string()));
        }
    }

    fn merge_into(existing: &mut Value, record: &Value) {
        if let (Value::Object(target), Value::Object(source)) = (existing, record) {
            for (key, value) in source {
                target.insert(key.clone(), value.clone());
            }
        }
    }

    fn matches(row: &Value, filter: &Filter) -> bool {
        let Some(actual) = row.get(&filter.column) else {
            return false;
        };
        match filter.op {
            FilterOp::Eq => match actual {
                Value::String(s) => s == &filter.value,
                Value::Bool(b) => filter.value.parse::<bool>() == Ok(*b),
                Value::Number(n) => {
                    filter.value.parse::<f64>().ok() == n.as_f64()
                }
                _ => false,
            },
            FilterOp::ILike => {
                let needle = filter.value.trim_matches('%').to_lowercase();
                actual
                    .as_str()
                    .map(|s| s.to_lowercase().contains(&needle))
                    .unwrap_or(false)
            }
            FilterOp::Gte => match actual {
                Value::Number(n) => {
                    let Ok(bound) = filter.value.parse::<f64>() else {
                        return false;
                    };
                    n.as_f64().map(|v| v >= bound).unwrap_or(false)
                }
                // ISO dates compare correctly as strings.
                Value::String(s) => s.as_str() >= filter.value.as_str(),
                _ => false,
            },
        }
    }

    fn sort_key(row: &Value, column: &str) -> String {
        match row.get(column) {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => String::new(),
        }
    }
}

#[async_trait]
impl Datastore for MemoryDatastore {
    async fn upsert(
        &self,
        table: &str,
        mut record: Value,
        conflict_key: &str,
    ) -> Result<Option<Value>, StoreError> {
        self.check_writable(table).await?;
        let key_columns: Vec<&str> = conflict_key.split(',').map(str::trim).collect();
        let mut tables = self.tables.lock().await;
        let rows = tables.entry(table.to_string()).or_default();

        if let Some(existing) = rows.iter_mut().find(|row| {
            key_columns
                .iter()
                .all(|column| row.get(column).is_some() && row.get(column) == record.get(column))
        }) {
            Self::merge_into(existing, &record);
            return Ok(Some(existing.clone()));
        }

        Self::ensure_id(&mut record);
        rows.push(record.clone());
        Ok(Some(record))
    }

    async fn insert(&self, table: &str, mut record: Value) -> Result<Option<Value>, StoreError> {
        self.check_writable(table).await?;
        Self::ensure_id(&mut record);
        self.tables
            .lock()
            .await
            .entry(table.to_string())
            .or_default()
            .push(record.clone());
        Ok(Some(record))
    }

    async fn select(&self, table: &str, query: &SelectQuery) -> Result<Vec<Value>, StoreError> {
        let tables = self.tables.lock().await;
        let mut rows: Vec<Value> = tables
            .get(table)
            .map(|rows| {
                rows.iter()
                    .filter(|row| query.filters.iter().all(|f| Self::matches(row, f)))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        if let Some(column) = &query.order_asc {
            rows.sort_by_key(|row| Self::sort_key(row, column));
        }
        Ok(rows)
    }

    async fn rpc(&self, function: &str, _params: Value) -> Result<Value, StoreError> {
        Ok(self
            .rpc_responses
            .lock()
            .await
            .get(function)
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new())))
    }
}
