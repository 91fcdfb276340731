//! Driver for one contentless FTS5 index table.
//!
//! A contentless index stores only derived terms and positions, keyed by an
//! external document identity (`doc` = the content row's rowid). The driver
//! owns the index table plus an `fts5vocab` companion in `instance` mode,
//! which exposes individual `(term, doc, col, offset)` occurrences and is
//! used for integrity inspection and for reconstructing previously indexed
//! text — deletion is self-describing and never needs the caller to remember
//! what was indexed.

use std::sync::{Arc, Mutex};

use rusqlite::{Connection, ToSql};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{FtsError, Result};
use crate::lock_conn;

use super::statement::StatementBuilder;

/// The pseudo-column carrying the document identity. Always excluded from
/// an index target's column list, always implicitly present as `doc`.
pub const ROWID_COLUMN: &str = "rowid";

/// Suffix of the vocabulary companion table.
const VOCAB_SUFFIX: &str = "_v";

/// Ceiling on distinct broken documents reported by a single check. Beyond
/// it the check raises instead of returning an unbounded result set.
const BROKEN_DOC_LIMIT: usize = 1000;

/// Ordered `(column, text)` pairs fed into or read back from an index.
pub type ColumnData = Vec<(String, String)>;

/// A named contentless index: table name plus its ordered index columns.
#[derive(Debug, Clone)]
pub struct IndexTarget {
    name: String,
    columns: Vec<String>,
}

impl IndexTarget {
    /// The `rowid` pseudo-column is stripped from `columns` if present.
    pub fn new(
        name: impl Into<String>,
        columns: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        let mut cols: Vec<String> = columns.into_iter().map(Into::into).collect();
        cols.retain(|c| c != ROWID_COLUMN);
        Self {
            name: name.into(),
            columns: cols,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Name of the vocabulary companion table.
    pub fn vocab_name(&self) -> String {
        format!("{}{}", self.name, VOCAB_SUFFIX)
    }
}

/// One broken document: a `doc` with conflicting double-written positions.
#[derive(Debug, Clone, Serialize)]
pub struct BrokenDoc {
    pub doc: i64,
    /// Number of `(col, offset)` positions carrying more than one term.
    pub conflicts: usize,
}

/// One conflicting position, with every term written to it.
#[derive(Debug, Clone, Serialize)]
pub struct BrokenEntry {
    pub terms: String,
    pub doc: i64,
    pub column: String,
    pub offset: i64,
    pub count: usize,
}

/// Driver bound to one [`IndexTarget`] and one connection.
pub struct FtsIndex {
    conn: Arc<Mutex<Connection>>,
    target: IndexTarget,
    builder: StatementBuilder,
}

impl FtsIndex {
    pub fn new(conn: Arc<Mutex<Connection>>, target: IndexTarget) -> Self {
        let builder = StatementBuilder::new(target.name());
        Self {
            conn,
            target,
            builder,
        }
    }

    pub fn target(&self) -> &IndexTarget {
        &self.target
    }

    pub fn statement_builder(&self) -> &StatementBuilder {
        &self.builder
    }

    /// Shared handle to the underlying index connection.
    pub fn connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.conn)
    }

    /// True iff the target's backing table is present in the schema catalog.
    pub fn exists(&self) -> Result<bool> {
        let conn = lock_conn(&self.conn)?;
        table_exists(&conn, self.target.name())
    }

    /// Idempotent creation of the contentless index table and its vocabulary
    /// companion. `extra` supplies additional FTS5 options (e.g. `tokenize`)
    /// and can never override `content`.
    ///
    /// DDL reports no row count through the engine, so convergence is
    /// verified against the schema catalog and a failure to converge raises.
    pub fn create(&self, extra: &[(&str, &str)]) -> Result<bool> {
        let conn = lock_conn(&self.conn)?;
        if table_exists(&conn, self.target.name())? {
            return Ok(true);
        }

        let mut parts: Vec<String> = self.target.columns().to_vec();
        parts.push("content=''".to_string());
        for (key, value) in extra {
            if *key != "content" {
                parts.push(format!("{key}='{value}'"));
            }
        }

        let sql = format!(
            "CREATE VIRTUAL TABLE {name} USING fts5 ({cols});\n\
             CREATE VIRTUAL TABLE IF NOT EXISTS {vocab} USING fts5vocab ({name}, instance);",
            name = self.target.name(),
            vocab = self.target.vocab_name(),
            cols = parts.join(", "),
        );
        conn.execute_batch(&sql)?;

        if !table_exists(&conn, self.target.name())? {
            return Err(FtsError::Invariant {
                message: format!(
                    "index table \"{}\" missing after creation",
                    self.target.name()
                ),
            });
        }
        info!("created contentless index {}", self.target.name());
        Ok(true)
    }

    /// Idempotent drop of the index table and its vocabulary companion.
    pub fn drop_index(&self) -> Result<bool> {
        let conn = lock_conn(&self.conn)?;
        let sql = format!(
            "DROP TABLE IF EXISTS {vocab};\nDROP TABLE IF EXISTS {name};",
            name = self.target.name(),
            vocab = self.target.vocab_name(),
        );
        conn.execute_batch(&sql)?;

        if table_exists(&conn, self.target.name())? {
            return Err(FtsError::Invariant {
                message: format!(
                    "index table \"{}\" still present after drop",
                    self.target.name()
                ),
            });
        }
        info!("dropped contentless index {}", self.target.name());
        Ok(true)
    }

    /// Broken documents: positions written twice with conflicting terms are
    /// the signature of an index mutated without a matching delete.
    pub fn check_broken(&self) -> Result<Vec<BrokenDoc>> {
        let conn = lock_conn(&self.conn)?;
        self.guard_broken_count(&conn)?;

        let sql = format!(
            "SELECT doc, count(*) AS conflicts FROM ({sub}) GROUP BY doc ORDER BY doc",
            sub = self.broken_groups_sql(),
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(BrokenDoc {
                doc: row.get(0)?,
                conflicts: row.get(1)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    /// Per-position detail of every conflicting `(doc, col, offset)` group.
    pub fn check_broken_detailed(&self) -> Result<Vec<BrokenEntry>> {
        let conn = lock_conn(&self.conn)?;
        self.guard_broken_count(&conn)?;

        let sql = format!(
            "SELECT group_concat(term) AS terms, doc, col, offset, count(*) AS cnt \
             FROM {vocab} GROUP BY doc, col, offset HAVING cnt > 1 \
             ORDER BY doc, col, offset",
            vocab = self.target.vocab_name(),
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map([], |row| {
            Ok(BrokenEntry {
                terms: row.get(0)?,
                doc: row.get(1)?,
                column: row.get(2)?,
                offset: row.get(3)?,
                count: row.get(4)?,
            })
        })?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(Into::into)
    }

    fn broken_groups_sql(&self) -> String {
        format!(
            "SELECT doc, count(*) AS cnt FROM {vocab} \
             GROUP BY doc, col, offset HAVING cnt > 1",
            vocab = self.target.vocab_name(),
        )
    }

    fn guard_broken_count(&self, conn: &Connection) -> Result<()> {
        let sql = format!(
            "SELECT count(DISTINCT doc) FROM ({sub})",
            sub = self.broken_groups_sql(),
        );
        let count: usize = conn.query_row(&sql, [], |row| row.get(0))?;
        if count > BROKEN_DOC_LIMIT {
            return Err(FtsError::TooManyBrokenDocs {
                count,
                limit: BROKEN_DOC_LIMIT,
            });
        }
        Ok(())
    }

    /// Reconstructs previously indexed text for `doc`, optionally restricted
    /// to `columns`, as `(column, space-joined terms)` pairs ordered by
    /// column name.
    pub fn terms_for(&self, doc: i64, columns: Option<&[&str]>) -> Result<ColumnData> {
        if let Some(cols) = columns {
            self.check_column_names(cols)?;
        }
        let conn = lock_conn(&self.conn)?;
        self.terms_for_on(&conn, doc, columns)
    }

    fn terms_for_on(
        &self,
        conn: &Connection,
        doc: i64,
        columns: Option<&[&str]>,
    ) -> Result<ColumnData> {
        let mut params: Vec<Box<dyn ToSql>> = vec![Box::new(doc)];
        let col_where = match columns {
            Some(cols) if !cols.is_empty() => {
                let placeholders: Vec<String> =
                    (0..cols.len()).map(|i| format!("?{}", i + 2)).collect();
                for c in cols {
                    params.push(Box::new(c.to_string()));
                }
                format!(" AND col IN ({})", placeholders.join(", "))
            }
            _ => String::new(),
        };

        let sql = format!(
            "SELECT term, col FROM {vocab} WHERE doc = ?1{col_where} \
             ORDER BY doc, col, offset",
            vocab = self.target.vocab_name(),
        );
        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut rows = stmt.query(param_refs.as_slice())?;

        let mut data: ColumnData = Vec::new();
        while let Some(row) = rows.next()? {
            let term: String = row.get(0)?;
            let col: String = row.get(1)?;
            match data.last_mut() {
                Some((name, joined)) if *name == col => {
                    joined.push(' ');
                    joined.push_str(&term);
                }
                _ => data.push((col, term)),
            }
        }
        Ok(data)
    }

    /// Index `data` under `doc`. The caller guarantees `doc` does not
    /// already carry different data: re-inserting identical data is a no-op
    /// by the engine's contentless semantics, but divergent data under an
    /// existing `doc` double-writes positions and breaks the index (see
    /// [`check_broken`](Self::check_broken)).
    pub fn insert(&self, doc: i64, data: &[(String, String)]) -> Result<()> {
        self.check_data_columns(data)?;
        let conn = lock_conn(&self.conn)?;
        self.execute_mutation(&conn, doc, data, false, "insert")
    }

    /// Delete exactly `data` for `doc`. The data must match what was
    /// originally indexed; use [`delete_for`](Self::delete_for) to let the
    /// index describe its own contents.
    pub fn delete(&self, doc: i64, data: &[(String, String)]) -> Result<()> {
        self.check_data_columns(data)?;
        let conn = lock_conn(&self.conn)?;
        self.execute_mutation(&conn, doc, data, true, "delete")
    }

    /// Delete whatever is currently indexed for `doc`, optionally restricted
    /// to `columns`. Reconstructs the indexed terms first, so the caller
    /// never has to remember what was inserted. Deleting a `doc` with no
    /// entries is a no-op, not an error.
    pub fn delete_for(&self, doc: i64, columns: Option<&[&str]>) -> Result<()> {
        if let Some(cols) = columns {
            self.check_column_names(cols)?;
        }
        let mut conn = lock_conn(&self.conn)?;
        let tx = conn.transaction()?;
        let data = self.terms_for_on(&tx, doc, columns)?;
        self.execute_mutation(&tx, doc, &data, true, "delete")?;
        tx.commit().map_err(Into::into)
    }

    /// Clear the whole index, vocabulary included, in one logical step.
    pub fn delete_all(&self) -> Result<()> {
        let conn = lock_conn(&self.conn)?;
        let sql = self.builder.build(&[], true);
        conn.execute(&sql, [])?;
        debug!("cleared index {}", self.target.name());
        Ok(())
    }

    /// Read-modify-write: fetch the existing terms for the touched columns,
    /// delete them if any existed, then index the new data. Behaves as a
    /// plain insert when `doc` carries nothing yet (insert-or-update).
    pub fn update(&self, doc: i64, data: &[(String, String)]) -> Result<()> {
        self.check_data_columns(data)?;
        let mut conn = lock_conn(&self.conn)?;
        let tx = conn.transaction()?;

        let touched: Vec<&str> = data.iter().map(|(c, _)| c.as_str()).collect();
        let old = self.terms_for_on(&tx, doc, Some(&touched))?;
        if !old.is_empty() {
            self.execute_mutation(&tx, doc, &old, true, "update")?;
        }
        self.execute_mutation(&tx, doc, data, false, "update")?;
        tx.commit().map_err(Into::into)
    }

    /// Build and execute one mutation statement, asserting the engine
    /// reports exactly one affected logical row.
    fn execute_mutation(
        &self,
        conn: &Connection,
        doc: i64,
        data: &[(String, String)],
        delete: bool,
        context: &str,
    ) -> Result<()> {
        let mut names: Vec<&str> = Vec::with_capacity(data.len() + 1);
        names.push(ROWID_COLUMN);
        names.extend(data.iter().map(|(c, _)| c.as_str()));
        let sql = self.builder.build(&names, delete);

        let mut bound: Vec<(String, Box<dyn ToSql>)> =
            vec![(format!(":{ROWID_COLUMN}"), Box::new(doc))];
        for (col, value) in data {
            bound.push((format!(":{col}"), Box::new(value.clone())));
        }
        let params: Vec<(&str, &dyn ToSql)> = bound
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_ref()))
            .collect();

        let affected = conn.execute(&sql, params.as_slice())?;
        if affected != 1 {
            return Err(FtsError::Invariant {
                message: format!(
                    "{context} on {} affected {affected} rows for doc {doc}, expected 1",
                    self.target.name()
                ),
            });
        }
        debug!(doc, op = context, index = self.target.name(), "index mutation");
        Ok(())
    }

    fn check_data_columns(&self, data: &[(String, String)]) -> Result<()> {
        for (col, _) in data {
            if !self.target.columns.iter().any(|c| c == col) {
                return Err(FtsError::validation(format!(
                    "column \"{col}\" is not in the configured columns of \"{}\"",
                    self.target.name()
                )));
            }
        }
        Ok(())
    }

    fn check_column_names(&self, columns: &[&str]) -> Result<()> {
        for col in columns {
            if !self.target.columns.iter().any(|c| c == col) {
                return Err(FtsError::validation(format!(
                    "column \"{col}\" is not in the configured columns of \"{}\"",
                    self.target.name()
                )));
            }
        }
        Ok(())
    }
}

/// Schema-catalog check shared with the trigger machinery.
pub(crate) fn table_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}
