//! Change-capture triggers.
//!
//! One [`ChangeTrigger`] per (content table × operation). The trigger fires
//! synchronously inside the mutating statement: a native SQL function is
//! registered on the content connection and a `CREATE TRIGGER … BEGIN SELECT
//! fn(…); END` statement wires row events to it. The callback packs the
//! fired values, remaps content columns to index columns and dispatches to
//! the driver, so a rollback of the content statement also rolls back the
//! firing itself.

use std::panic::RefUnwindSafe;
use std::sync::{Arc, Mutex};

use rusqlite::functions::{Context, FunctionFlags};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{FtsError, IntegrityKind, Result};
use crate::lock_conn;

use super::driver::{table_exists, FtsIndex, IndexTarget};

/// Suffix appended to a content table name to form its index table name.
pub const FTS_TABLE_SUFFIX: &str = "_fts5";

const FUNC_SUFFIX: &str = "_replicate";

/// Index table name for a content table.
pub fn fts_table_name(content_table: &str) -> String {
    format!("{content_table}{FTS_TABLE_SUFFIX}")
}

/// The closed set of captured operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOp {
    Insert,
    Update,
    Delete,
}

impl TriggerOp {
    pub const ALL: [TriggerOp; 3] = [TriggerOp::Insert, TriggerOp::Update, TriggerOp::Delete];

    pub fn keyword(&self) -> &'static str {
        match self {
            TriggerOp::Insert => "INSERT",
            TriggerOp::Update => "UPDATE",
            TriggerOp::Delete => "DELETE",
        }
    }

    pub fn name_suffix(&self) -> &'static str {
        match self {
            TriggerOp::Insert => "_ai",
            TriggerOp::Update => "_au",
            TriggerOp::Delete => "_ad",
        }
    }

    /// Row reference the trigger body reads from.
    fn row_ref(&self) -> &'static str {
        match self {
            TriggerOp::Delete => "old",
            _ => "new",
        }
    }
}

/// Maps a fired content row onto its index-space document id. Receives the
/// primary key value and the remaining fired `(content column, value)`
/// pairs. The default passes the primary key through; override it when the
/// index spans a one-to-many relation and `doc` is not the row's own key.
pub type RowidResolver = Arc<dyn Fn(i64, &[(String, String)]) -> i64 + Send + Sync + RefUnwindSafe>;

/// Configuration of one content table's capture: which table, its primary
/// key, and the explicit content-column → index-column map (ordered pairs;
/// the map need not cover every content column, and the primary key's
/// target is the `rowid` pseudo-column).
#[derive(Debug, Clone)]
pub struct TriggerBinding {
    pub table: String,
    pub pk_column: String,
    pub column_map: Vec<(String, String)>,
}

/// A single (content table × operation) trigger.
///
/// Lifecycle: unbound → registered ([`register_function`]) → active
/// ([`create_trigger`]) → verified ([`verify`]). [`create`] walks the whole
/// chain and raises if it did not converge. [`drop_trigger`] returns to
/// unbound; the function registration may remain, which is tolerated.
///
/// [`register_function`]: Self::register_function
/// [`create_trigger`]: Self::create_trigger
/// [`verify`]: Self::verify
/// [`create`]: Self::create
/// [`drop_trigger`]: Self::drop_trigger
pub struct ChangeTrigger {
    content: Arc<Mutex<Connection>>,
    binding: TriggerBinding,
    op: TriggerOp,
    driver: Arc<FtsIndex>,
    rowid_resolver: Option<RowidResolver>,
}

impl ChangeTrigger {
    pub fn new(
        content: Arc<Mutex<Connection>>,
        binding: TriggerBinding,
        op: TriggerOp,
        driver: Arc<FtsIndex>,
    ) -> Self {
        Self {
            content,
            binding,
            op,
            driver,
            rowid_resolver: None,
        }
    }

    pub fn with_rowid_resolver(mut self, resolver: RowidResolver) -> Self {
        self.rowid_resolver = Some(resolver);
        self
    }

    pub fn op(&self) -> TriggerOp {
        self.op
    }

    pub fn table(&self) -> &str {
        &self.binding.table
    }

    pub fn driver(&self) -> &Arc<FtsIndex> {
        &self.driver
    }

    pub fn trigger_name(&self) -> String {
        format!("{}{}", self.binding.table, self.op.name_suffix())
    }

    pub fn function_name(&self) -> String {
        format!("{}{}", self.trigger_name(), FUNC_SUFFIX)
    }

    /// Fired column order: primary key first, then the mapped content
    /// columns in column-map order. This ordering is load-bearing for the
    /// positional zip in the callback.
    pub fn trigger_columns(&self) -> Vec<String> {
        let mut cols = vec![self.binding.pk_column.clone()];
        cols.extend(
            self.binding
                .column_map
                .iter()
                .map(|(content, _)| content.clone())
                .filter(|c| *c != self.binding.pk_column),
        );
        cols
    }

    /// Register the callback, create the trigger, then self-verify.
    pub fn create(&self) -> Result<()> {
        self.register_function()?;
        self.create_trigger()?;
        self.verify(false)
    }

    /// Install the native callback function on the content connection.
    pub fn register_function(&self) -> Result<()> {
        let columns = self.trigger_columns();
        let n_args = columns.len();
        let driver = Arc::clone(&self.driver);
        let op = self.op;
        let column_map = self.binding.column_map.clone();
        let pk_column = self.binding.pk_column.clone();
        let resolver = self.rowid_resolver.clone();

        let conn = lock_conn(&self.content)?;
        conn.create_scalar_function(
            &self.function_name(),
            n_args as i32,
            FunctionFlags::SQLITE_UTF8,
            move |ctx| {
                apply_fired_row(ctx, &driver, op, &columns, &column_map, &pk_column, resolver.as_ref())
                    .map_err(|e| rusqlite::Error::UserFunctionError(Box::new(e)))?;
                Ok(0i64)
            },
        )?;
        debug!(function = %self.function_name(), "registered trigger callback");
        Ok(())
    }

    /// Create only the trigger object.
    pub fn create_trigger(&self) -> Result<()> {
        let row_ref = self.op.row_ref();
        let fired: Vec<String> = self
            .trigger_columns()
            .iter()
            .map(|c| format!("{row_ref}.{c}"))
            .collect();
        let sql = format!(
            "CREATE TRIGGER IF NOT EXISTS {name} AFTER {op} ON {table} \
             BEGIN SELECT {func}({args}); END;",
            name = self.trigger_name(),
            op = self.op.keyword(),
            table = self.binding.table,
            func = self.function_name(),
            args = fired.join(", "),
        );
        let conn = lock_conn(&self.content)?;
        conn.execute_batch(&sql)?;
        info!(trigger = %self.trigger_name(), "created change trigger");
        Ok(())
    }

    /// Drop only the trigger object; the callback registration stays.
    pub fn drop_trigger(&self) -> Result<()> {
        let conn = lock_conn(&self.content)?;
        conn.execute_batch(&format!("DROP TRIGGER IF EXISTS {}", self.trigger_name()))?;
        if trigger_exists(&conn, &self.trigger_name(), &self.binding.table)? {
            return Err(FtsError::Invariant {
                message: format!(
                    "trigger \"{}\" still present after drop",
                    self.trigger_name()
                ),
            });
        }
        Ok(())
    }

    /// Check the dependent artifacts, in order: content table (with `all`),
    /// callback function, trigger, index table (with `all`). The first
    /// missing artifact raises its integrity kind.
    pub fn verify(&self, all: bool) -> Result<()> {
        if all {
            let conn = lock_conn(&self.content)?;
            if !table_exists(&conn, &self.binding.table)? {
                return Err(FtsError::Integrity {
                    kind: IntegrityKind::ContentTable,
                    name: self.binding.table.clone(),
                });
            }
        }
        {
            let conn = lock_conn(&self.content)?;
            if !function_exists(&conn, &self.function_name())? {
                return Err(FtsError::Integrity {
                    kind: IntegrityKind::TriggerFunction,
                    name: self.function_name(),
                });
            }
            if !trigger_exists(&conn, &self.trigger_name(), &self.binding.table)? {
                return Err(FtsError::Integrity {
                    kind: IntegrityKind::Trigger,
                    name: self.trigger_name(),
                });
            }
        }
        if all && !self.driver.exists()? {
            return Err(FtsError::Integrity {
                kind: IntegrityKind::IndexTable,
                name: self.driver.target().name().to_string(),
            });
        }
        Ok(())
    }
}

/// Pack positional fired values into named pairs, resolve the index-space
/// document, remap through the column map and dispatch on the operation.
/// NULL values carry no indexable text and are omitted from the payload.
fn apply_fired_row(
    ctx: &Context<'_>,
    driver: &FtsIndex,
    op: TriggerOp,
    columns: &[String],
    column_map: &[(String, String)],
    pk_column: &str,
    resolver: Option<&RowidResolver>,
) -> Result<()> {
    if ctx.len() != columns.len() {
        return Err(FtsError::Invariant {
            message: format!(
                "trigger fired {} values for {} configured columns",
                ctx.len(),
                columns.len()
            ),
        });
    }

    let pk: i64 = ctx.get(0)?;
    let mut row: Vec<(String, String)> = Vec::with_capacity(columns.len() - 1);
    for (i, name) in columns.iter().enumerate().skip(1) {
        let value = match ctx.get_raw(i) {
            ValueRef::Null => continue,
            ValueRef::Text(text) => String::from_utf8_lossy(text).into_owned(),
            ValueRef::Integer(v) => v.to_string(),
            ValueRef::Real(v) => v.to_string(),
            ValueRef::Blob(_) => {
                return Err(FtsError::validation(format!(
                    "column \"{name}\" fired a blob value, which is not indexable"
                )))
            }
        };
        row.push((name.clone(), value));
    }

    let doc = match resolver {
        Some(resolve) => resolve(pk, &row),
        None => pk,
    };

    let mut data: Vec<(String, String)> = Vec::with_capacity(row.len());
    for (name, value) in row {
        if name == pk_column {
            continue;
        }
        if let Some((_, target)) = column_map.iter().find(|(content, _)| *content == name) {
            data.push((target.clone(), value));
        }
    }

    match op {
        TriggerOp::Insert => driver.insert(doc, &data),
        TriggerOp::Update => driver.update(doc, &data),
        TriggerOp::Delete => {
            let cols: Vec<&str> = data.iter().map(|(c, _)| c.as_str()).collect();
            driver.delete_for(doc, Some(&cols))
        }
    }
}

/// The per-table bundle: insert, update and delete triggers sharing one
/// driver over the table's contentless index.
pub struct TriggerGroup {
    triggers: Vec<ChangeTrigger>,
    driver: Arc<FtsIndex>,
}

impl TriggerGroup {
    pub fn new(
        content: Arc<Mutex<Connection>>,
        index: Arc<Mutex<Connection>>,
        binding: TriggerBinding,
        rowid_resolver: Option<RowidResolver>,
    ) -> Self {
        let target = IndexTarget::new(
            fts_table_name(&binding.table),
            binding.column_map.iter().map(|(_, idx)| idx.clone()),
        );
        let driver = Arc::new(FtsIndex::new(index, target));

        let triggers = TriggerOp::ALL
            .into_iter()
            .map(|op| {
                let trigger = ChangeTrigger::new(
                    Arc::clone(&content),
                    binding.clone(),
                    op,
                    Arc::clone(&driver),
                );
                match &rowid_resolver {
                    Some(r) => trigger.with_rowid_resolver(Arc::clone(r)),
                    None => trigger,
                }
            })
            .collect();

        Self { triggers, driver }
    }

    pub fn triggers(&self) -> &[ChangeTrigger] {
        &self.triggers
    }

    pub fn driver(&self) -> &Arc<FtsIndex> {
        &self.driver
    }

    pub fn fts_table_name(&self) -> &str {
        self.driver.target().name()
    }

    /// Index columns of the bundle's target (the `rowid` map target is
    /// already stripped).
    pub fn fts_columns(&self) -> &[String] {
        self.driver.target().columns()
    }

    /// Register callbacks and create all three triggers.
    pub fn create_all(&self) -> Result<()> {
        for trigger in &self.triggers {
            trigger.create()?;
        }
        Ok(())
    }
}

pub(crate) fn trigger_exists(conn: &Connection, name: &str, table: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master \
         WHERE type = 'trigger' AND name = ?1 AND tbl_name = ?2",
        [name, table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

pub(crate) fn function_exists(conn: &Connection, name: &str) -> Result<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM pragma_function_list WHERE name = ?1",
        [name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_binding() -> TriggerBinding {
        TriggerBinding {
            table: "test_tbl".into(),
            pk_column: "id".into(),
            column_map: vec![
                ("id".into(), "rowid".into()),
                ("title".into(), "title".into()),
                ("body".into(), "content".into()),
            ],
        }
    }

    fn setup() -> (Arc<Mutex<Connection>>, Arc<Mutex<Connection>>) {
        let content = Arc::new(Mutex::new(Connection::open_in_memory().unwrap()));
        let index = Arc::new(Mutex::new(Connection::open_in_memory().unwrap()));
        content
            .lock()
            .unwrap()
            .execute_batch("CREATE TABLE test_tbl (id INTEGER PRIMARY KEY, title TEXT, body TEXT)")
            .unwrap();
        (content, index)
    }

    fn group_with_index(
        content: &Arc<Mutex<Connection>>,
        index: &Arc<Mutex<Connection>>,
    ) -> TriggerGroup {
        let group = TriggerGroup::new(
            Arc::clone(content),
            Arc::clone(index),
            test_binding(),
            None,
        );
        group.driver().create(&[]).unwrap();
        group
    }

    #[test]
    fn test_names() {
        let (content, index) = setup();
        let group = TriggerGroup::new(content, index, test_binding(), None);
        assert_eq!(group.fts_table_name(), "test_tbl_fts5");
        assert_eq!(group.fts_columns(), ["title", "content"]);

        let insert = &group.triggers()[0];
        assert_eq!(insert.op(), TriggerOp::Insert);
        assert_eq!(insert.trigger_name(), "test_tbl_ai");
        assert_eq!(insert.function_name(), "test_tbl_ai_replicate");

        let delete = &group.triggers()[2];
        assert_eq!(delete.trigger_name(), "test_tbl_ad");
    }

    #[test]
    fn test_trigger_columns_pk_first() {
        let (content, index) = setup();
        let binding = TriggerBinding {
            table: "test_tbl".into(),
            pk_column: "id".into(),
            column_map: vec![
                ("title".into(), "title".into()),
                ("id".into(), "rowid".into()),
                ("body".into(), "content".into()),
            ],
        };
        let group = TriggerGroup::new(content, index, binding, None);
        assert_eq!(group.triggers()[0].trigger_columns(), ["id", "title", "body"]);
    }

    #[test]
    fn test_create_and_fire_insert() {
        let (content, index) = setup();
        let group = group_with_index(&content, &index);
        group.triggers()[0].create().unwrap();

        content
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO test_tbl (id, title, body) VALUES (?1, ?2, ?3)",
                rusqlite::params![117, "some title", "some body"],
            )
            .unwrap();

        let terms = group.driver().terms_for(117, None).unwrap();
        assert_eq!(
            terms,
            vec![
                ("content".to_string(), "some body".to_string()),
                ("title".to_string(), "some title".to_string()),
            ]
        );
    }

    #[test]
    fn test_fire_insert_skips_null_columns() {
        let (content, index) = setup();
        let group = group_with_index(&content, &index);
        group.triggers()[0].create().unwrap();

        content
            .lock()
            .unwrap()
            .execute(
                "INSERT INTO test_tbl (id, title) VALUES (?1, ?2)",
                rusqlite::params![7, "only a title"],
            )
            .unwrap();

        let terms = group.driver().terms_for(7, None).unwrap();
        assert_eq!(terms, vec![("title".to_string(), "only a title".to_string())]);
    }

    #[test]
    fn test_fire_update() {
        let (content, index) = setup();
        let group = group_with_index(&content, &index);
        group.create_all().unwrap();

        {
            let conn = content.lock().unwrap();
            conn.execute(
                "INSERT INTO test_tbl (id, title, body) VALUES (115, 'first second third', 'щось за contents')",
                [],
            )
            .unwrap();
            conn.execute(
                "UPDATE test_tbl SET body = 'content що став новим' WHERE id = 115",
                [],
            )
            .unwrap();
        }

        let terms = group.driver().terms_for(115, None).unwrap();
        assert_eq!(
            terms,
            vec![
                ("content".to_string(), "content що став новим".to_string()),
                ("title".to_string(), "first second third".to_string()),
            ]
        );
        assert!(group.driver().check_broken().unwrap().is_empty());
    }

    #[test]
    fn test_fire_delete() {
        let (content, index) = setup();
        let group = group_with_index(&content, &index);
        group.create_all().unwrap();

        {
            let conn = content.lock().unwrap();
            conn.execute(
                "INSERT INTO test_tbl (id, title, body) VALUES (115, 'first second third', 'щось за contents')",
                [],
            )
            .unwrap();
            conn.execute("DELETE FROM test_tbl WHERE id = 115", []).unwrap();
        }

        assert!(group.driver().terms_for(115, None).unwrap().is_empty());
        assert!(group.driver().check_broken().unwrap().is_empty());
    }

    #[test]
    fn test_rowid_resolver_override() {
        let (content, index) = setup();
        let binding = test_binding();
        let resolver: RowidResolver = Arc::new(|pk, _row| pk + 1000);
        let group = TriggerGroup::new(
            Arc::clone(&content),
            Arc::clone(&index),
            binding,
            Some(resolver),
        );
        group.driver().create(&[]).unwrap();
        group.triggers()[0].create().unwrap();

        content
            .lock()
            .unwrap()
            .execute("INSERT INTO test_tbl (id, title) VALUES (1, 'derived doc')", [])
            .unwrap();

        assert!(group.driver().terms_for(1, None).unwrap().is_empty());
        assert_eq!(
            group.driver().terms_for(1001, None).unwrap(),
            vec![("title".to_string(), "derived doc".to_string())]
        );
    }

    #[test]
    fn test_verify_unregistered() {
        let (content, index) = setup();
        let group = group_with_index(&content, &index);
        let err = group.triggers()[0].verify(false).unwrap_err();
        assert!(matches!(
            err,
            FtsError::Integrity {
                kind: IntegrityKind::TriggerFunction,
                ..
            }
        ));
    }

    #[test]
    fn test_verify_all_passes_after_create() {
        let (content, index) = setup();
        let group = group_with_index(&content, &index);
        group.create_all().unwrap();
        for trigger in group.triggers() {
            trigger.verify(true).unwrap();
        }
    }

    #[test]
    fn test_drop_trigger_keeps_function() {
        let (content, index) = setup();
        let group = group_with_index(&content, &index);
        let trigger = &group.triggers()[0];
        trigger.create().unwrap();
        trigger.drop_trigger().unwrap();

        let conn = content.lock().unwrap();
        assert!(!trigger_exists(&conn, &trigger.trigger_name(), trigger.table()).unwrap());
        assert!(function_exists(&conn, &trigger.function_name()).unwrap());
    }

    #[test]
    fn test_callback_error_aborts_statement() {
        let (content, index) = setup();
        let group = group_with_index(&content, &index);
        group.triggers()[0].create().unwrap();
        // breaking the index table makes the callback fail, which must
        // abort the content statement itself
        group.driver().drop_index().unwrap();

        let result = content.lock().unwrap().execute(
            "INSERT INTO test_tbl (id, title) VALUES (1, 'doomed')",
            [],
        );
        assert!(result.is_err());

        let count: i64 = content
            .lock()
            .unwrap()
            .query_row("SELECT count(*) FROM test_tbl", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 0);
    }
}
