//! Wire a blog-style content database to contentless indexes and search it.
//!
//! Run with: `cargo run --example blog_search -- "body text"`

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use ftsync_core::{IndexedStore, SearchTable, StoreConfig, TriggerBinding};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let query = std::env::args().nth(1).unwrap_or_else(|| "body".to_string());

    let content_uri = "file:blog_example?mode=memory&cache=shared";
    let content = Arc::new(Mutex::new(Connection::open(content_uri)?));
    content.lock().unwrap().execute_batch(
        "CREATE TABLE blog_entry (id INTEGER PRIMARY KEY, headline TEXT NOT NULL);
         CREATE TABLE blog_entrytext (id INTEGER PRIMARY KEY, entry_id INTEGER NOT NULL, body_text TEXT NOT NULL);",
    )?;
    let index = Arc::new(Mutex::new(Connection::open_in_memory()?));

    let store = IndexedStore::new(
        content,
        index,
        StoreConfig {
            attach_as: "blog".into(),
            content_url: Some(content_uri.into()),
            read_uncommitted: true,
            bindings: vec![
                TriggerBinding {
                    table: "blog_entry".into(),
                    pk_column: "id".into(),
                    column_map: vec![
                        ("id".into(), "rowid".into()),
                        ("headline".into(), "headline".into()),
                    ],
                },
                TriggerBinding {
                    table: "blog_entrytext".into(),
                    pk_column: "id".into(),
                    column_map: vec![
                        ("id".into(), "rowid".into()),
                        ("body_text".into(), "body_text".into()),
                    ],
                },
            ],
            tables: vec![
                SearchTable {
                    content_table: "blog_entry".into(),
                    index_table: "blog_entry_fts5".into(),
                    match_columns: vec!["headline".into()],
                    row_key: "bet.id".into(),
                    group_key: "idx.rowid".into(),
                    joins: vec![
                        "INNER JOIN {schema}.blog_entry AS be ON be.id = idx.rowid".into(),
                        "INNER JOIN {schema}.blog_entrytext AS bet ON bet.entry_id = idx.rowid"
                            .into(),
                    ],
                },
                SearchTable {
                    content_table: "blog_entrytext".into(),
                    index_table: "blog_entrytext_fts5".into(),
                    match_columns: vec!["body_text".into()],
                    row_key: "idx.rowid".into(),
                    group_key: "bet.entry_id".into(),
                    joins: vec![
                        "INNER JOIN {schema}.blog_entrytext AS bet ON bet.id = idx.rowid".into(),
                    ],
                },
            ],
        },
    )?;

    // content mutations maintain the indexes through the wired triggers
    {
        let conn = store.content_connection();
        let conn = conn.lock().unwrap();
        conn.execute_batch(
            "INSERT INTO blog_entry VALUES (1, 'full text search in sqlite');
             INSERT INTO blog_entry VALUES (2, 'second entry about nothing');
             INSERT INTO blog_entrytext VALUES (10, 1, 'a body text about contentless indexes');
             INSERT INTO blog_entrytext VALUES (20, 2, 'another body on triggers and vocabularies');",
        )?;
    }

    println!("Searching for '{query}'...");
    let rows = store.match_named(&query, "plain-prefix", None)?;
    println!("Found {} row(s):", rows.len());
    for row in rows {
        println!("  {}", serde_json::to_string(&row)?);
    }

    Ok(())
}
