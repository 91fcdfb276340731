//! ftsync — trigger-driven synchronization of SQLite FTS5 contentless
//! indexes, with ranked multi-table search composition.
//!
//! Content tables stay the single source of truth; their full-text indexes
//! are *contentless* (terms and positions only, keyed by the content row's
//! identity), kept consistent by triggers that fire inside the mutating
//! statement itself. A vocabulary companion table makes every index
//! self-describing: deletion reconstructs what was indexed, and corruption
//! (double-written positions) is detectable and quantifiable.
//!
//! # Example
//!
//! ```rust,ignore
//! use ftsync_core::{IndexedStore, StoreConfig, TriggerBinding, SearchTable};
//!
//! let store = IndexedStore::new(content_conn, index_conn, StoreConfig {
//!     attach_as: "blog".into(),
//!     bindings: vec![TriggerBinding {
//!         table: "blog_entry".into(),
//!         pk_column: "id".into(),
//!         column_map: vec![
//!             ("id".into(), "rowid".into()),
//!             ("headline".into(), "headline".into()),
//!         ],
//!     }],
//!     tables: vec![/* SearchTable per index */],
//!     ..Default::default()
//! })?;
//!
//! // content mutations now maintain the index; search is one call
//! let rows = store.match_named("full text search", "plain", None)?;
//! ```

pub mod attach;
pub mod error;
pub mod index;
pub mod normalize;
pub mod query;
pub mod store;

pub use error::{FtsError, IntegrityKind, Result};
pub use index::{
    fts_table_name, BrokenDoc, BrokenEntry, ChangeTrigger, ColumnData, FtsIndex, IndexTarget,
    RowidResolver, StatementBuilder, TriggerBinding, TriggerGroup, TriggerOp,
};
pub use normalize::{Normalizer, WordTokenizer};
pub use query::{
    MatchRow, MatchStrategy, Page, PlainStrategy, QueryComposer, SearchTable, VerbatimStrategy,
};
pub use store::{IndexedStore, StoreConfig};

use std::sync::{Mutex, MutexGuard};

use rusqlite::Connection;

/// Take a shared connection, mapping a poisoned lock to a database error
/// instead of panicking inside library code.
pub(crate) fn lock_conn(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock().map_err(|_| FtsError::Database {
        message: "connection lock poisoned".to_string(),
        source: None,
    })
}
