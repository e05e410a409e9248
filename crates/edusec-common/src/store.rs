//! Record store contract
//!
//! The durable store is external to the engine. Components only rely on
//! insert, filtered select (equality / range / order / limit), update and
//! upsert over JSON rows, plus typed helpers layered on top.
//! [`InMemoryRecordStore`] backs tests and single-process deployments.

use crate::error::{StoreError, StoreResult};
use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::cmp::Ordering as CmpOrdering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

/// Logical tables consumed by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    /// Role assignments
    RoleAssignments,
    /// Append-only rate-limit history
    RateLimitHistory,
    /// One block row per user
    RateLimitBlocks,
    /// One reset-boundary row per user
    RateLimitResets,
    /// Append-only security events
    SecurityEvents,
    /// Security alerts
    SecurityAlerts,
}

impl Table {
    /// Storage name
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::RoleAssignments => "role_assignments",
            Table::RateLimitHistory => "role_request_rate_limits",
            Table::RateLimitBlocks => "rate_limit_blocks",
            Table::RateLimitResets => "rate_limit_resets",
            Table::SecurityEvents => "security_events",
            Table::SecurityAlerts => "security_alerts",
        }
    }
}

/// Row filter
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// field == value
    Eq(String, Value),
    /// field > value
    Gt(String, Value),
    /// field >= value
    Gte(String, Value),
    /// field < value
    Lt(String, Value),
    /// field <= value
    Lte(String, Value),
    /// field is one of values
    In(String, Vec<Value>),
}

impl Filter {
    /// Check a row against the filter. Missing fields never match.
    pub fn matches(&self, row: &Value) -> bool {
        match self {
            Filter::Eq(f, v) => row.get(f.as_str()) == Some(v),
            Filter::In(f, vs) => row.get(f.as_str()).map(|x| vs.contains(x)).unwrap_or(false),
            Filter::Gt(f, v) => compare_field(row, f, v) == Some(CmpOrdering::Greater),
            Filter::Gte(f, v) => matches!(
                compare_field(row, f, v),
                Some(CmpOrdering::Greater | CmpOrdering::Equal)
            ),
            Filter::Lt(f, v) => compare_field(row, f, v) == Some(CmpOrdering::Less),
            Filter::Lte(f, v) => matches!(
                compare_field(row, f, v),
                Some(CmpOrdering::Less | CmpOrdering::Equal)
            ),
        }
    }
}

fn compare_field(row: &Value, field: &str, bound: &Value) -> Option<CmpOrdering> {
    row.get(field).and_then(|x| compare_values(x, bound))
}

/// Sort direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Order {
    /// Smallest first
    Asc,
    /// Largest first
    Desc,
}

/// Filtered select / update target
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    /// Target table
    pub table: Table,
    /// Conjunction of filters
    pub filters: Vec<Filter>,
    /// Optional ordering
    pub order_by: Option<(String, Order)>,
    /// Optional row limit
    pub limit: Option<usize>,
}

impl Query {
    /// Select every row of a table
    pub fn table(table: Table) -> Self {
        Self {
            table,
            filters: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    /// Equality filter
    pub fn eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Eq(field.to_string(), value.into()));
        self
    }

    /// Strictly-greater filter
    pub fn gt(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Gt(field.to_string(), value.into()));
        self
    }

    /// Greater-or-equal filter
    pub fn gte(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Gte(field.to_string(), value.into()));
        self
    }

    /// Strictly-less filter
    pub fn lt(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Lt(field.to_string(), value.into()));
        self
    }

    /// Less-or-equal filter
    pub fn lte(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::Lte(field.to_string(), value.into()));
        self
    }

    /// Membership filter
    pub fn one_of(mut self, field: &str, values: Vec<Value>) -> Self {
        self.filters.push(Filter::In(field.to_string(), values));
        self
    }

    /// Order results
    pub fn order_by(mut self, field: &str, order: Order) -> Self {
        self.order_by = Some((field.to_string(), order));
        self
    }

    /// Limit results
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a row satisfies every filter
    pub fn matches(&self, row: &Value) -> bool {
        self.filters.iter().all(|f| f.matches(row))
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<CmpOrdering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => x.as_f64()?.partial_cmp(&y.as_f64()?),
        },
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

/// Row shape bound to a table
pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    /// Table the record lives in
    const TABLE: Table;
}

/// Durable record store consumed by the engine.
///
/// Implementations are expected to bound every call with their own timeout.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Append rows
    async fn insert(&self, table: Table, rows: Vec<Value>) -> StoreResult<()>;

    /// Filtered select
    async fn select(&self, query: &Query) -> StoreResult<Vec<Value>>;

    /// Merge `patch` into every matching row; returns the number of rows touched
    async fn update(&self, query: &Query, patch: Value) -> StoreResult<usize>;

    /// Insert or replace rows keyed by `conflict_keys`
    async fn upsert(&self, table: Table, conflict_keys: &[&str], rows: Vec<Value>) -> StoreResult<()>;
}

impl dyn RecordStore {
    /// Insert typed records
    pub async fn insert_records<T: Record>(&self, records: &[T]) -> StoreResult<()> {
        let rows = records
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        self.insert(T::TABLE, rows).await
    }

    /// Upsert typed records
    pub async fn upsert_records<T: Record>(&self, conflict_keys: &[&str], records: &[T]) -> StoreResult<()> {
        let rows = records
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        self.upsert(T::TABLE, conflict_keys, rows).await
    }

    /// Select typed records
    pub async fn fetch<T: Record>(&self, query: &Query) -> StoreResult<Vec<T>> {
        debug_assert_eq!(query.table, T::TABLE);
        self.select(query)
            .await?
            .into_iter()
            .map(|row| serde_json::from_value(row).map_err(StoreError::from))
            .collect()
    }
}

/// In-memory record store.
///
/// Keeps per-table select counters and supports fault injection so callers
/// can observe fetch amortization and fail-closed behaviour.
#[derive(Default)]
pub struct InMemoryRecordStore {
    tables: RwLock<HashMap<Table, Vec<Value>>>,
    select_counts: DashMap<Table, u64>,
    unavailable: AtomicBool,
}

impl InMemoryRecordStore {
    /// Create empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`]
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of selects issued against a table
    pub fn select_count(&self, table: Table) -> u64 {
        self.select_counts.get(&table).map(|c| *c).unwrap_or(0)
    }

    /// Number of rows currently held by a table
    pub fn row_count(&self, table: Table) -> usize {
        self.tables.read().get(&table).map(|t| t.len()).unwrap_or(0)
    }

    fn check_available(&self) -> StoreResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("record store unreachable".into()))
        } else {
            Ok(())
        }
    }
}

fn merge(target: &mut Value, patch: &Value) {
    if let (Some(target), Some(patch)) = (target.as_object_mut(), patch.as_object()) {
        for (k, v) in patch {
            target.insert(k.clone(), v.clone());
        }
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn insert(&self, table: Table, rows: Vec<Value>) -> StoreResult<()> {
        self.check_available()?;
        self.tables.write().entry(table).or_default().extend(rows);
        Ok(())
    }

    async fn select(&self, query: &Query) -> StoreResult<Vec<Value>> {
        self.check_available()?;
        *self.select_counts.entry(query.table).or_insert(0) += 1;

        let tables = self.tables.read();
        let mut rows: Vec<Value> = tables
            .get(&query.table)
            .map(|t| t.iter().filter(|r| query.matches(r)).cloned().collect())
            .unwrap_or_default();
        drop(tables);

        if let Some((field, order)) = &query.order_by {
            rows.sort_by(|a, b| {
                let ord = match (a.get(field.as_str()), b.get(field.as_str())) {
                    (Some(x), Some(y)) => compare_values(x, y).unwrap_or(CmpOrdering::Equal),
                    (Some(_), None) => CmpOrdering::Less,
                    (None, Some(_)) => CmpOrdering::Greater,
                    (None, None) => CmpOrdering::Equal,
                };
                match order {
                    Order::Asc => ord,
                    Order::Desc => ord.reverse(),
                }
            });
        }
        if let Some(limit) = query.limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn update(&self, query: &Query, patch: Value) -> StoreResult<usize> {
        self.check_available()?;
        let mut tables = self.tables.write();
        let mut touched = 0;
        if let Some(rows) = tables.get_mut(&query.table) {
            for row in rows.iter_mut().filter(|r| query.matches(r)) {
                merge(row, &patch);
                touched += 1;
            }
        }
        Ok(touched)
    }

    async fn upsert(&self, table: Table, conflict_keys: &[&str], rows: Vec<Value>) -> StoreResult<()> {
        self.check_available()?;
        if conflict_keys.is_empty() {
            return Err(StoreError::Conflict("upsert requires at least one conflict key".into()));
        }
        let mut tables = self.tables.write();
        let existing = tables.entry(table).or_default();
        for row in rows {
            let position = existing.iter().position(|r| {
                conflict_keys.iter().all(|k| r.get(*k).is_some() && r.get(*k) == row.get(*k))
            });
            match position {
                Some(i) => existing[i] = row,
                None => existing.push(row),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_select_filters_order_limit() {
        let store = InMemoryRecordStore::new();
        store
            .insert(
                Table::RateLimitHistory,
                vec![
                    json!({"user_id": "u1", "created_at": 10}),
                    json!({"user_id": "u1", "created_at": 30}),
                    json!({"user_id": "u2", "created_at": 20}),
                    json!({"user_id": "u1", "created_at": 20}),
                ],
            )
            .await
            .unwrap();

        let q = Query::table(Table::RateLimitHistory)
            .eq("user_id", "u1")
            .gte("created_at", 15)
            .order_by("created_at", Order::Desc)
            .limit(1);
        let rows = store.select(&q).await.unwrap();
        assert_eq!(rows, vec![json!({"user_id": "u1", "created_at": 30})]);
        assert_eq!(store.select_count(Table::RateLimitHistory), 1);
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_key() {
        let store = InMemoryRecordStore::new();
        let keys = ["user_id"];
        store
            .upsert(Table::RateLimitBlocks, &keys, vec![json!({"user_id": "u1", "reason": "a"})])
            .await
            .unwrap();
        store
            .upsert(Table::RateLimitBlocks, &keys, vec![json!({"user_id": "u1", "reason": "b"})])
            .await
            .unwrap();
        assert_eq!(store.row_count(Table::RateLimitBlocks), 1);

        let rows = store.select(&Query::table(Table::RateLimitBlocks)).await.unwrap();
        assert_eq!(rows[0]["reason"], "b");
    }

    #[tokio::test]
    async fn test_update_merges_patch() {
        let store = InMemoryRecordStore::new();
        store
            .insert(Table::SecurityAlerts, vec![json!({"id": "a1", "acknowledged": false})])
            .await
            .unwrap();
        let q = Query::table(Table::SecurityAlerts).eq("id", "a1");
        let touched = store.update(&q, json!({"acknowledged": true})).await.unwrap();
        assert_eq!(touched, 1);
        let rows = store.select(&q).await.unwrap();
        assert_eq!(rows[0]["acknowledged"], true);
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let store = InMemoryRecordStore::new();
        store.set_unavailable(true);
        let err = store.select(&Query::table(Table::RoleAssignments)).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));

        store.set_unavailable(false);
        assert!(store.select(&Query::table(Table::RoleAssignments)).await.is_ok());
    }

    #[test]
    fn test_range_filter_ignores_missing_fields() {
        let f = Filter::Gte("created_at".into(), json!(5));
        assert!(f.matches(&json!({"created_at": 5})));
        assert!(!f.matches(&json!({"created_at": 4})));
        assert!(!f.matches(&json!({"other": 9})));
    }
}
