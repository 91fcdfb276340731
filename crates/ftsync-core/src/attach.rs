//! Cross-connection attachment.
//!
//! The search path joins index tables against their content tables through a
//! schema alias: the content database is ATTACHed to the index connection.
//! File-backed sources are rewritten to read-only URLs (the index side never
//! mutates content), and `PRAGMA read_uncommitted` lets shared-cache readers
//! see in-flight content without blocking; callers needing strict isolation
//! pass `read_uncommitted = false`.

use rusqlite::{Connection, OptionalExtension};
use tracing::info;
use url::form_urlencoded;

use crate::error::{FtsError, Result};

/// One row of `pragma_database_list`.
#[derive(Debug, Clone)]
pub struct DbInfo {
    pub seq: i64,
    pub name: String,
    pub file: String,
}

/// A database to attach: either a URI/path, or another connection whose
/// `main` file is resolved through the catalog.
pub enum AttachSource<'a> {
    Uri(&'a str),
    Connection(&'a Connection),
}

/// Look up one schema in the connection's database list.
pub fn db_info(conn: &Connection, schema: &str) -> Result<Option<DbInfo>> {
    conn.query_row(
        "SELECT seq, name, file FROM pragma_database_list WHERE name = ?1",
        [schema],
        |row| {
            Ok(DbInfo {
                seq: row.get(0)?,
                name: row.get(1)?,
                file: row.get(2)?,
            })
        },
    )
    .optional()
    .map_err(Into::into)
}

/// True iff a database is attached under `alias`.
pub fn is_attached(conn: &Connection, alias: &str) -> Result<bool> {
    Ok(db_info(conn, alias)?.is_some())
}

/// File backing the connection's `main` schema. Errors when `main` is not
/// file-backed (a plain in-memory database cannot be attached elsewhere).
pub fn connection_uri(conn: &Connection) -> Result<String> {
    let info = db_info(conn, "main")?.ok_or_else(|| FtsError::Attach {
        message: "\"main\" schema not found in database list".to_string(),
    })?;
    if info.file.is_empty() {
        return Err(FtsError::Attach {
            message: "\"main\" schema is not bound to a file".to_string(),
        });
    }
    Ok(info.file)
}

/// Rewrite a source so it attaches read-only unless it is already a
/// shared-memory URL. Plain paths become `file:` URLs to carry the mode.
fn read_only_url(source: &str) -> String {
    if let Some(query) = source.strip_prefix("file:").and_then(|rest| {
        rest.split_once('?').map(|(_, q)| q)
    }) {
        let pairs: Vec<(String, String)> = form_urlencoded::parse(query.as_bytes())
            .into_owned()
            .collect();
        let mode = pairs.iter().find(|(k, _)| k == "mode").map(|(_, v)| v.as_str());
        if mode == Some("memory") {
            return source.to_string();
        }
        let base = &source[..source.len() - query.len() - 1];
        let mut serializer = form_urlencoded::Serializer::new(String::new());
        for (key, value) in pairs.iter().filter(|(k, _)| k != "mode") {
            serializer.append_pair(key, value);
        }
        serializer.append_pair("mode", "ro");
        return format!("{base}?{}", serializer.finish());
    }
    match source.strip_prefix("file:") {
        Some(rest) => format!("file:{rest}?mode=ro"),
        None => format!("file:{source}?mode=ro"),
    }
}

/// Attach `source` to `conn` under `alias`.
pub fn attach(
    conn: &Connection,
    source: AttachSource<'_>,
    alias: &str,
    read_uncommitted: bool,
) -> Result<()> {
    let url = match source {
        AttachSource::Uri(uri) if !uri.is_empty() => uri.to_string(),
        AttachSource::Uri(_) => {
            return Err(FtsError::Attach {
                message: "attach source must be a non-empty URI".to_string(),
            })
        }
        AttachSource::Connection(other) => connection_uri(other)?,
    };
    let url = read_only_url(&url);

    conn.execute(&format!("ATTACH DATABASE ?1 AS {alias}"), [&url])?;
    if read_uncommitted {
        conn.pragma_update(None, "read_uncommitted", true)?;
    }
    info!(alias, url = %url, "attached content database");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_only_url_memory_untouched() {
        let url = "file:memdb_blog?mode=memory&cache=shared";
        assert_eq!(read_only_url(url), url);
    }

    #[test]
    fn test_read_only_url_rewrites_query() {
        let rewritten = read_only_url("file:/tmp/blog.sqlite3?cache=shared&mode=rw");
        assert_eq!(rewritten, "file:/tmp/blog.sqlite3?cache=shared&mode=ro");
    }

    #[test]
    fn test_read_only_url_plain_path() {
        assert_eq!(read_only_url("/tmp/blog.sqlite3"), "file:/tmp/blog.sqlite3?mode=ro");
        assert_eq!(
            read_only_url("file:/tmp/blog.sqlite3"),
            "file:/tmp/blog.sqlite3?mode=ro"
        );
    }

    #[test]
    fn test_connection_uri_rejects_plain_memory() {
        let conn = Connection::open_in_memory().unwrap();
        let err = connection_uri(&conn).unwrap_err();
        assert!(matches!(err, FtsError::Attach { .. }));
    }

    #[test]
    fn test_attach_shared_memory() {
        let content =
            Connection::open("file:memdb_attach_test?mode=memory&cache=shared").unwrap();
        content
            .execute_batch(
                "CREATE TABLE blog_entry (id INTEGER PRIMARY KEY, headline TEXT);
                 INSERT INTO blog_entry VALUES (15, 'some headline');",
            )
            .unwrap();

        let index = Connection::open_in_memory().unwrap();
        assert!(!is_attached(&index, "blog").unwrap());
        attach(
            &index,
            AttachSource::Uri("file:memdb_attach_test?mode=memory&cache=shared"),
            "blog",
            true,
        )
        .unwrap();
        assert!(is_attached(&index, "blog").unwrap());

        let headline: String = index
            .query_row("SELECT headline FROM blog.blog_entry WHERE id = 15", [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(headline, "some headline");
    }

    #[test]
    fn test_attach_file_backed_read_only() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("content.sqlite3");
        let content = Connection::open(&path).unwrap();
        content
            .execute_batch(
                "CREATE TABLE blog_entry (id INTEGER PRIMARY KEY, headline TEXT);
                 INSERT INTO blog_entry VALUES (1, 'file backed');",
            )
            .unwrap();

        let index = Connection::open_in_memory().unwrap();
        attach(
            &index,
            AttachSource::Connection(&content),
            "blog",
            false,
        )
        .unwrap();

        let count: i64 = index
            .query_row("SELECT count(*) FROM blog.blog_entry", [], |row| row.get(0))
            .unwrap();
        assert_eq!(count, 1);

        // attached read-only: writes through the alias must fail
        let result = index.execute("INSERT INTO blog.blog_entry VALUES (2, 'nope')", []);
        assert!(result.is_err());
    }

    #[test]
    fn test_db_info_main() {
        let conn = Connection::open_in_memory().unwrap();
        let info = db_info(&conn, "main").unwrap().unwrap();
        assert_eq!(info.name, "main");
        assert!(info.file.is_empty());
    }
}
