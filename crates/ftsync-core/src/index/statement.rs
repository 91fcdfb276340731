//! Mutation-statement builder for contentless FTS5 tables.
//!
//! Contentless tables take every mutation through `INSERT`: plain inserts
//! carry column values, deletes are inserts of the special `'delete'` /
//! `'delete-all'` commands with the table's own name prefixed to the column
//! list. This builder produces all three parameterized shapes and nothing
//! else; it performs no I/O.

const DELETE_MARKER: &str = "'delete'";
const DELETE_ALL_MARKER: &str = "'delete-all'";

/// Builds parameterized mutation statements for one named index table.
#[derive(Debug, Clone)]
pub struct StatementBuilder {
    table_name: String,
}

impl StatementBuilder {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    /// Input order preserved, repeated names (e.g. a doubled identity
    /// column) kept only at their first occurrence.
    fn normalize<'a>(&self, columns: &[&'a str]) -> Vec<&'a str> {
        let mut seen: Vec<&str> = Vec::with_capacity(columns.len());
        for &c in columns {
            if !seen.contains(&c) {
                seen.push(c);
            }
        }
        seen
    }

    /// Target column list; the delete form is prefixed with the table's own
    /// name (the FTS5 command column).
    pub fn column_list(&self, columns: &[&str], delete: bool) -> Vec<String> {
        let mut cols: Vec<String> = self
            .normalize(columns)
            .into_iter()
            .map(str::to_string)
            .collect();
        if delete {
            cols.insert(0, self.table_name.clone());
        }
        cols
    }

    /// One named bind parameter per column. The delete form is prefixed with
    /// the `'delete'` marker, or `'delete-all'` when the column set is empty
    /// (a full delete carries no column placeholders).
    pub fn param_list(&self, columns: &[&str], delete: bool) -> Vec<String> {
        let mut params: Vec<String> = self
            .normalize(columns)
            .into_iter()
            .map(|c| format!(":{c}"))
            .collect();
        if delete {
            let marker = if params.is_empty() {
                DELETE_ALL_MARKER
            } else {
                DELETE_MARKER
            };
            params.insert(0, marker.to_string());
        }
        params
    }

    /// Full statement text for the given columns and mode.
    pub fn build(&self, columns: &[&str], delete: bool) -> String {
        format!(
            "INSERT INTO {} ({}) VALUES ({})",
            self.table_name,
            self.column_list(columns, delete).join(", "),
            self.param_list(columns, delete).join(", ")
        )
    }
}
