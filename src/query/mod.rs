//! Declarative query builder and evaluator.
//!
//! Clauses are fluent, consuming `self`, and accumulate in whatever order
//! the caller likes — the evaluator applies them in a fixed order
//! regardless: rows → join → map → where → select → distinct → sort →
//! filter → (cache write) → limit. Caching is keyed on every clause except
//! `limit`/`offset`, so two queries differing only in their window share a
//! cache entry.

mod ops;

pub use ops::Predicate;

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;

use crate::cache::Cache;
use crate::collection::Collection;
use crate::error::{FoliodbError, FoliodbResult};
use crate::row::Row;
use crate::table::Table;
use crate::value::{Identifier, Value};

/// A user-supplied row transform with a stable textual identity for cache
/// canonicalization. Construct with [`NamedFn::new`]; closures lacking a
/// meaningful name still work but collapse cache identity to `"anonymous"`,
/// which the caller should pair with [`Query::no_cache`].
#[derive(Clone)]
pub struct NamedFn<F: ?Sized> {
    id: String,
    f: Arc<F>,
}

impl<F: ?Sized> NamedFn<F> {
    pub fn new(id: impl Into<String>, f: Arc<F>) -> Self {
        Self { id: id.into(), f }
    }

    pub fn anonymous(f: Arc<F>) -> Self {
        Self {
            id: "anonymous".to_string(),
            f,
        }
    }
}

pub type MapFn = NamedFn<dyn Fn(&mut Row) + Send + Sync>;
pub type FilterFn = NamedFn<dyn Fn(&Row) -> bool + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SortOrder {
    Asc,
    Desc,
}

struct WhereClause {
    column: String,
    predicate: Predicate,
}

struct JoinClause<'a> {
    right: &'a Table,
    left_col: String,
    predicate: Predicate,
    right_col: String,
    prefix: String,
}

struct SelectClause {
    column: String,
    new_name: String,
}

struct SortClause {
    column: String,
    order: SortOrder,
}

/// A declarative query against a single table, built with fluent clause
/// methods and resolved with [`Query::run`].
pub struct Query<'a> {
    table: &'a Table,
    join: Option<JoinClause<'a>>,
    maps: Vec<MapFn>,
    wheres: Vec<WhereClause>,
    selects: Vec<SelectClause>,
    distinct: Vec<String>,
    sorts: Vec<SortClause>,
    filters: Vec<FilterFn>,
    limit: Option<(usize, usize)>,
    cache_enabled: bool,
    cache_expiration: Option<Duration>,
    error: Option<FoliodbError>,
}

impl<'a> Query<'a> {
    pub(crate) fn new(table: &'a Table) -> Self {
        Self {
            table,
            join: None,
            maps: Vec::new(),
            wheres: Vec::new(),
            selects: Vec::new(),
            distinct: Vec::new(),
            sorts: Vec::new(),
            filters: Vec::new(),
            limit: None,
            cache_enabled: true,
            cache_expiration: None,
            error: None,
        }
    }

    /// Left outer join against `right`: for each left row, import the
    /// single best-matching right row's columns under `prefix + name`
    /// (default `<right_table>.`). Non-matching left rows pass through
    /// unchanged.
    pub fn join(
        mut self,
        right: &'a Table,
        left_col: impl Into<String>,
        op: &str,
        right_col: impl Into<String>,
        prefix: Option<String>,
    ) -> Self {
        let right_col = right_col.into();
        match Predicate::parse(op, Value::Text(right_col.clone())) {
            Ok(predicate) => {
                let prefix = prefix.unwrap_or_else(|| format!("{}.", right.name()));
                self.join = Some(JoinClause {
                    right,
                    left_col: left_col.into(),
                    predicate,
                    right_col,
                    prefix,
                });
            }
            Err(e) => self.error = Some(e),
        }
        self
    }

    pub fn map(mut self, f: MapFn) -> Self {
        self.maps.push(f);
        self
    }

    pub fn r#where(mut self, column: impl Into<String>, op: &str, value: Value) -> Self {
        match Predicate::parse(op, value) {
            Ok(predicate) => {
                self.wheres.push(WhereClause {
                    column: column.into(),
                    predicate,
                });
            }
            Err(e) => self.error = Some(e),
        }
        self
    }

    pub fn select(mut self, column: impl Into<String>, new_name: impl Into<String>) -> Self {
        self.selects.push(SelectClause {
            column: column.into(),
            new_name: new_name.into(),
        });
        self
    }

    pub fn distinct(mut self, column: impl Into<String>) -> Self {
        self.distinct.push(column.into());
        self
    }

    pub fn sort(mut self, column: impl Into<String>, order: SortOrder) -> Self {
        self.sorts.push(SortClause {
            column: column.into(),
            order,
        });
        self
    }

    pub fn filter(mut self, f: FilterFn) -> Self {
        self.filters.push(f);
        self
    }

    /// `max` must be at least 1. `offset` beyond the materialized size
    /// yields an empty window rather than an error.
    pub fn limit(mut self, max: usize, offset: usize) -> Self {
        self.limit = Some((max, offset));
        self
    }

    pub fn no_cache(mut self) -> Self {
        self.cache_enabled = false;
        self
    }

    pub fn cache_expiration(mut self, expiration: Duration) -> Self {
        self.cache_expiration = Some(expiration);
        self
    }

    /// Evaluate the query: rows → join → map → where → select → distinct →
    /// sort → filter → (cache write) → limit.
    pub fn run(mut self) -> FoliodbResult<Collection> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        if let Some((max, _)) = self.limit {
            if max < 1 {
                return Err(FoliodbError::QueryMalformed(
                    "limit must be at least 1".to_string(),
                ));
            }
        }

        let cache = self.table.cache();
        let payload = self.canonical_payload();
        let key = Cache::key_for_payload(&payload);

        // A failed cache read (a `valid()` I/O error, or a corrupt/
        // undeserializable entry) is never fatal — it falls through to a
        // fresh evaluation rather than failing the query.
        let cache_hit = self.cache_enabled
            && cache.valid(&key, self.cache_expiration).unwrap_or_else(|e| {
                tracing::debug!(error = %e, "cache validity check failed, treating as a miss");
                false
            });
        let rows = if cache_hit {
            match cache.get::<Vec<CachedRow>>(&key) {
                Ok(cached) => cached.into_iter().map(CachedRow::into_row).collect(),
                Err(_) => self.evaluate(&cache, &key)?,
            }
        } else {
            self.evaluate(&cache, &key)?
        };

        let total = rows.len();
        let (limit, offset) = self.limit.unwrap_or((total.max(1), 0));
        Ok(Collection::new(rows, offset, limit, total))
    }

    fn evaluate(&self, cache: &Cache, key: &str) -> FoliodbResult<Vec<Row>> {
        let ids = self.table.rows(&[])?;
        let mut rows: Vec<Row> = ids
            .iter()
            .map(|id| self.table.read_row_for_query(id))
            .collect::<FoliodbResult<_>>()?;

        if let Some(join) = &self.join {
            self.apply_join(&mut rows, join)?;
        }

        for m in &self.maps {
            for row in &mut rows {
                (m.f)(row);
            }
        }

        rows.retain(|row| {
            self.wheres
                .iter()
                .all(|w| w.predicate.matches(row.get(&w.column)))
        });

        if !self.selects.is_empty() {
            for row in &mut rows {
                for s in &self.selects {
                    if let Some(value) = row.columns.remove(&s.column) {
                        row.columns.insert(s.new_name.clone(), value);
                    }
                }
            }
        }

        if !self.distinct.is_empty() {
            let mut seen: std::collections::HashSet<Vec<String>> = std::collections::HashSet::new();
            rows.retain(|row| {
                let key: Vec<String> = self
                    .distinct
                    .iter()
                    .map(|c| row.get(c).map(|v| v.to_canonical_string()).unwrap_or_default())
                    .collect();
                seen.insert(key)
            });
        }

        if !self.sorts.is_empty() {
            rows.sort_by(|a, b| {
                for s in &self.sorts {
                    let null = Value::Null;
                    let av = a.get(&s.column).unwrap_or(&null);
                    let bv = b.get(&s.column).unwrap_or(&null);
                    let ordering = av.compare(bv);
                    let ordering = if s.order == SortOrder::Desc {
                        ordering.reverse()
                    } else {
                        ordering
                    };
                    if ordering != std::cmp::Ordering::Equal {
                        return ordering;
                    }
                }
                std::cmp::Ordering::Equal
            });
        }

        for f in &self.filters {
            rows.retain(|row| (f.f)(row));
        }

        if self.cache_enabled {
            let cacheable: Vec<CachedRow> = rows.iter().map(CachedRow::from_row).collect();
            // A failed cache write is logged-and-ignored; it never fails
            // the query itself.
            if let Err(e) = cache.put(key, &cacheable) {
                tracing::debug!(error = %e, "cache write failed, continuing uncached");
            }
        }

        Ok(rows)
    }

    fn apply_join(&self, rows: &mut [Row], join: &JoinClause) -> FoliodbResult<()> {
        let right_ids = join.right.rows(&[])?;
        let right_rows: Vec<Row> = right_ids
            .iter()
            .map(|id| join.right.read_row_for_query(id))
            .collect::<FoliodbResult<_>>()?;

        for row in rows.iter_mut() {
            let left_value = row.get(&join.left_col).cloned();
            let matched = right_rows.iter().find(|right| {
                let right_value = right_column_value(right, &join.right_col);
                join.predicate.matches_pair(left_value.as_ref(), right_value.as_ref())
            });
            if let Some(right) = matched {
                for (name, value) in &right.columns {
                    row.columns
                        .insert(format!("{}{name}", join.prefix), value.clone());
                }
                row.columns.insert(
                    format!("{}_id", join.prefix),
                    Value::Text(right.id.as_str().to_string()),
                );
            }
        }
        Ok(())
    }

    /// The normalized payload used to derive the cache key: every clause
    /// bucket defaults to empty, `where`/`select`/`sort` are key-sorted,
    /// and `map`/`filter`/`distinct` are sorted by the callable's stable
    /// identity. `limit`/`offset` are intentionally excluded.
    fn canonical_payload(&self) -> String {
        let mut wheres: Vec<(String, String, String)> = self
            .wheres
            .iter()
            .map(|w| {
                (
                    w.column.clone(),
                    w.predicate.label().to_string(),
                    w.predicate.canonical_operand(),
                )
            })
            .collect();
        wheres.sort();

        let mut selects: Vec<(String, String)> = self
            .selects
            .iter()
            .map(|s| (s.column.clone(), s.new_name.clone()))
            .collect();
        selects.sort();

        let mut sorts: Vec<(String, String)> = self
            .sorts
            .iter()
            .map(|s| {
                (
                    s.column.clone(),
                    match s.order {
                        SortOrder::Asc => "asc".to_string(),
                        SortOrder::Desc => "desc".to_string(),
                    },
                )
            })
            .collect();
        sorts.sort();

        let mut distinct = self.distinct.clone();
        distinct.sort();

        let mut maps: Vec<String> = self.maps.iter().map(|m| m.id.clone()).collect();
        maps.sort();

        let mut filters: Vec<String> = self.filters.iter().map(|f| f.id.clone()).collect();
        filters.sort();

        let join = self.join.as_ref().map(|j| {
            (
                j.right.name().as_str().to_string(),
                j.left_col.clone(),
                j.right_col.clone(),
                j.prefix.clone(),
            )
        });

        let payload = CanonicalPayload {
            table: self.table.name().as_str().to_string(),
            join,
            maps,
            wheres: wheres.into_iter().map(|(c, op, operand)| (c, format!("{op}:{operand}"))).collect(),
            selects,
            distinct,
            sorts,
            filters,
        };
        serde_json::to_string(&payload).unwrap_or_default()
    }
}

fn right_column_value(row: &Row, column: &str) -> Option<Value> {
    if column == "_id" {
        Some(Value::Text(row.id.as_str().to_string()))
    } else {
        row.get(column).cloned()
    }
}

impl Predicate {
    /// Evaluate a join predicate between a left and a right operand,
    /// ignoring the literal operand this predicate was parsed with.
    fn matches_pair(&self, left: Option<&Value>, right: Option<&Value>) -> bool {
        let null = Value::Null;
        let right = right.unwrap_or(&null);
        match self {
            Predicate::Eq(_) => left.map(|l| l.loosely_eq(right)).unwrap_or(false),
            Predicate::Neq(_) => left.map(|l| !l.loosely_eq(right)).unwrap_or(false),
            Predicate::Lt(_) => left.map(|l| l.compare(right) == std::cmp::Ordering::Less).unwrap_or(false),
            Predicate::Lte(_) => left
                .map(|l| l.compare(right) != std::cmp::Ordering::Greater)
                .unwrap_or(false),
            Predicate::Gt(_) => left.map(|l| l.compare(right) == std::cmp::Ordering::Greater).unwrap_or(false),
            Predicate::Gte(_) => left
                .map(|l| l.compare(right) != std::cmp::Ordering::Less)
                .unwrap_or(false),
            _ => left.map(|l| l.loosely_eq(right)).unwrap_or(false),
        }
    }
}

#[derive(Serialize)]
struct CanonicalPayload {
    table: String,
    join: Option<(String, String, String, String)>,
    maps: Vec<String>,
    wheres: Vec<(String, String)>,
    selects: Vec<(String, String)>,
    distinct: Vec<String>,
    sorts: Vec<(String, String)>,
    filters: Vec<String>,
}

#[derive(Serialize, serde::Deserialize)]
struct CachedRow {
    id: String,
    columns: std::collections::BTreeMap<String, Value>,
}

impl CachedRow {
    fn from_row(row: &Row) -> Self {
        Self {
            id: row.id.as_str().to_string(),
            columns: row.columns.clone(),
        }
    }

    fn into_row(self) -> Row {
        Row {
            id: Identifier::new(self.id).unwrap_or_else(|_| {
                Identifier::new("cached").expect("literal identifier is valid")
            }),
            columns: self.columns,
        }
    }
}
