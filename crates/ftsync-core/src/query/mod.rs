//! Ranked multi-table search composition.
//!
//! Each configured [`SearchTable`] contributes one SELECT over its index
//! table, joined back to content rows through the attachment alias and
//! restricted to a column subset of the match expression. The composed query
//! UNION ALLs every contribution, groups by row identity, rolls child rows
//! up to their parents via `group_concat` and orders by ascending summed
//! rank (lower = stronger, the engine's bm25 convention).

pub mod strategy;

use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::lock_conn;
use crate::normalize::{Normalizer, WordTokenizer};

pub use strategy::{MatchStrategy, PlainStrategy, VerbatimStrategy};

/// One searchable table: its backing index, the column subset to match
/// against, and the SQL pieces recovering stable row identities.
///
/// Inside the generated SELECT the index table is aliased `idx`; `row_key`,
/// `group_key` and `joins` may reference it and any join aliases. The
/// `{schema}` placeholder in join fragments is replaced with the attachment
/// alias of the content database.
#[derive(Debug, Clone)]
pub struct SearchTable {
    pub content_table: String,
    pub index_table: String,
    pub match_columns: Vec<String>,
    pub row_key: String,
    pub group_key: String,
    pub joins: Vec<String>,
}

/// 1-based pagination window.
#[derive(Debug, Clone, Copy)]
pub struct Page {
    pub page: usize,
    pub per_page: usize,
}

/// One composed search result row.
#[derive(Debug, Clone, Serialize)]
pub struct MatchRow {
    /// Grouped row identity.
    pub row_key: i64,
    /// Distinct roll-up identities, comma-concatenated.
    pub group_keys: Option<String>,
    /// Summed rank; ascending order, lower is a stronger match.
    pub rank: f64,
}

/// Composes and executes ranked match queries over the index connection.
pub struct QueryComposer {
    conn: Arc<Mutex<Connection>>,
    schema: String,
    tables: Vec<SearchTable>,
    normalizer: Box<dyn Normalizer>,
}

impl QueryComposer {
    /// `schema` is the alias the content database is attached under on
    /// `conn`. The default normalizer is the lowercasing word tokenizer.
    pub fn new(conn: Arc<Mutex<Connection>>, schema: impl Into<String>, tables: Vec<SearchTable>) -> Self {
        Self::with_normalizer(conn, schema, tables, Box::new(WordTokenizer::default()))
    }

    pub fn with_normalizer(
        conn: Arc<Mutex<Connection>>,
        schema: impl Into<String>,
        tables: Vec<SearchTable>,
        normalizer: Box<dyn Normalizer>,
    ) -> Self {
        Self {
            conn,
            schema: schema.into(),
            tables,
            normalizer,
        }
    }

    pub fn tables(&self) -> &[SearchTable] {
        &self.tables
    }

    /// Expression for `text` under `strategy`, using this composer's
    /// normalizer.
    pub fn match_expression(&self, text: &str, strategy: &dyn MatchStrategy) -> String {
        strategy.expression(text, self.normalizer.as_ref())
    }

    /// SELECT for one table, yielding `(row_key, group_key, rank)`. The
    /// match expression is carried as a bound parameter, never spliced in.
    pub fn per_table_match_sql(&self, table: &SearchTable) -> String {
        let mut joins = String::new();
        for join in &table.joins {
            joins.push(' ');
            joins.push_str(&join.replace("{schema}", &self.schema));
        }
        format!(
            "SELECT {row_key} AS row_key, {group_key} AS group_key, idx.rank AS rank \
             FROM {index_table} AS idx{joins} WHERE {index_table} MATCH ?",
            row_key = table.row_key,
            group_key = table.group_key,
            index_table = table.index_table,
        )
    }

    /// The full union-group-order statement over every configured table.
    pub fn composed_match_sql(&self, page: Option<Page>) -> String {
        let subs: Vec<String> = self
            .tables
            .iter()
            .map(|t| self.per_table_match_sql(t))
            .collect();
        format!(
            "SELECT r.row_key, group_concat(DISTINCT r.group_key) AS group_keys, \
             sum(r.rank) AS rank \
             FROM ( {} ) AS r GROUP BY r.row_key ORDER BY sum(r.rank){}",
            subs.join(" UNION ALL "),
            limit_sql(page),
        )
    }

    /// Column-scoped expression bound for one table's MATCH parameter.
    fn scoped_expression(table: &SearchTable, expr: &str) -> String {
        if table.match_columns.is_empty() {
            expr.to_string()
        } else {
            format!("{{{}}} : {}", table.match_columns.join(" "), expr)
        }
    }

    /// Execute the composed query. No matches yields an empty list, never
    /// an error.
    pub fn match_rows(
        &self,
        text: &str,
        strategy: &dyn MatchStrategy,
        page: Option<Page>,
    ) -> Result<Vec<MatchRow>> {
        if self.tables.is_empty() {
            return Ok(Vec::new());
        }
        let expr = self.match_expression(text, strategy);
        let sql = self.composed_match_sql(page);
        let params: Vec<String> = self
            .tables
            .iter()
            .map(|t| Self::scoped_expression(t, &expr))
            .collect();

        let conn = lock_conn(&self.conn)?;
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(rusqlite::params_from_iter(params.iter()), |row| {
            Ok(MatchRow {
                row_key: row.get(0)?,
                group_keys: row.get(1)?,
                rank: row.get(2)?,
            })
        })?;
        let out = rows.collect::<rusqlite::Result<Vec<_>>>()?;
        debug!(expr = %expr, results = out.len(), "composed match");
        Ok(out)
    }

    /// [`match_rows`](Self::match_rows) with the strategy resolved by name
    /// (`"plain"`, `"plain-prefix"`, `"verbatim"`).
    pub fn match_named(&self, text: &str, strategy: &str, page: Option<Page>) -> Result<Vec<MatchRow>> {
        let strategy = strategy::by_name(strategy)?;
        self.match_rows(text, strategy.as_ref(), page)
    }
}

fn limit_sql(page: Option<Page>) -> String {
    match page {
        Some(p) => format!(
            " LIMIT {} OFFSET {}",
            p.per_page,
            p.page.saturating_sub(1) * p.per_page
        ),
        None => String::new(),
    }
}
