//! The indexed store: content tables in one database, their contentless
//! indexes in another, held consistent by triggers and searched through the
//! composer.
//!
//! Construction wires everything: the content database is attached to the
//! index connection under a schema alias, one trigger group is built per
//! binding, and every trigger goes through integrity resolution before the
//! write path is considered live.

use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::info;

use crate::attach::{self, AttachSource};
use crate::error::{FtsError, Result};
use crate::index::{integrity, RowidResolver, TriggerBinding, TriggerGroup};
use crate::lock_conn;
use crate::normalize::Normalizer;
use crate::query::{MatchRow, MatchStrategy, Page, QueryComposer, SearchTable};

/// Wiring of one indexed store. Plain data; lifecycle of every collaborator
/// is owned by the caller.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Schema alias the content database is attached under.
    pub attach_as: String,
    /// Explicit URI of the content database. When `None`, the content
    /// connection's `main` file is used (which then must be file-backed or
    /// a shared-cache URI).
    pub content_url: Option<String>,
    /// Attach for reading in-flight content without blocking. Pass `false`
    /// for strict committed-read isolation.
    pub read_uncommitted: bool,
    /// One trigger binding per captured content table.
    pub bindings: Vec<TriggerBinding>,
    /// Search-side configuration per table.
    pub tables: Vec<SearchTable>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            attach_as: "content".to_string(),
            content_url: None,
            read_uncommitted: true,
            bindings: Vec::new(),
            tables: Vec::new(),
        }
    }
}

/// Container tying a content connection, an index connection, the trigger
/// groups keeping them consistent, and the query composer.
pub struct IndexedStore {
    content: Arc<Mutex<Connection>>,
    index: Arc<Mutex<Connection>>,
    attach_as: String,
    groups: Vec<TriggerGroup>,
    composer: QueryComposer,
}

impl IndexedStore {
    pub fn new(
        content: Arc<Mutex<Connection>>,
        index: Arc<Mutex<Connection>>,
        config: StoreConfig,
    ) -> Result<Self> {
        Self::build(content, index, config, None, None)
    }

    /// As [`new`](Self::new), with a custom normalizer for the composer
    /// and/or a rowid resolver applied to every trigger group.
    pub fn with_collaborators(
        content: Arc<Mutex<Connection>>,
        index: Arc<Mutex<Connection>>,
        config: StoreConfig,
        normalizer: Option<Box<dyn Normalizer>>,
        rowid_resolver: Option<RowidResolver>,
    ) -> Result<Self> {
        Self::build(content, index, config, normalizer, rowid_resolver)
    }

    fn build(
        content: Arc<Mutex<Connection>>,
        index: Arc<Mutex<Connection>>,
        config: StoreConfig,
        normalizer: Option<Box<dyn Normalizer>>,
        rowid_resolver: Option<RowidResolver>,
    ) -> Result<Self> {
        let StoreConfig {
            attach_as,
            content_url,
            read_uncommitted,
            bindings,
            tables,
        } = config;

        Self::attach_content(&content, &index, &attach_as, content_url.as_deref(), read_uncommitted)?;

        let groups: Vec<TriggerGroup> = bindings
            .into_iter()
            .map(|binding| {
                TriggerGroup::new(
                    Arc::clone(&content),
                    Arc::clone(&index),
                    binding,
                    rowid_resolver.clone(),
                )
            })
            .collect();

        // integrity gates the write path: every trigger is verified (and
        // repaired at most once per artifact kind) before any mutation runs
        for group in &groups {
            for trigger in group.triggers() {
                integrity::resolve(trigger)?;
            }
        }
        info!(groups = groups.len(), "indexed store ready");

        let composer = match normalizer {
            Some(n) => QueryComposer::with_normalizer(Arc::clone(&index), attach_as.clone(), tables, n),
            None => QueryComposer::new(Arc::clone(&index), attach_as.clone(), tables),
        };

        Ok(Self {
            content,
            index,
            attach_as,
            groups,
            composer,
        })
    }

    fn attach_content(
        content: &Arc<Mutex<Connection>>,
        index: &Arc<Mutex<Connection>>,
        alias: &str,
        content_url: Option<&str>,
        read_uncommitted: bool,
    ) -> Result<()> {
        // resolve the source before taking the index lock; the trigger path
        // locks content first, so the two locks are never held together
        let url = match content_url {
            Some(url) => url.to_string(),
            None => {
                let content_conn = lock_conn(content)?;
                attach::connection_uri(&content_conn)?
            }
        };

        let index_conn = lock_conn(index)?;
        if !attach::is_attached(&index_conn, alias)? {
            attach::attach(&index_conn, AttachSource::Uri(&url), alias, read_uncommitted)?;
        }
        if !attach::is_attached(&index_conn, alias)? {
            return Err(FtsError::Attach {
                message: format!("content is not attached as \"{alias}\""),
            });
        }
        Ok(())
    }

    pub fn attach_as(&self) -> &str {
        &self.attach_as
    }

    pub fn is_attached(&self) -> Result<bool> {
        let conn = lock_conn(&self.index)?;
        attach::is_attached(&conn, &self.attach_as)
    }

    pub fn content_connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.content)
    }

    pub fn index_connection(&self) -> Arc<Mutex<Connection>> {
        Arc::clone(&self.index)
    }

    pub fn groups(&self) -> &[TriggerGroup] {
        &self.groups
    }

    pub fn composer(&self) -> &QueryComposer {
        &self.composer
    }

    /// Composed ranked search; empty result for no matches.
    pub fn match_rows(
        &self,
        text: &str,
        strategy: &dyn MatchStrategy,
        page: Option<Page>,
    ) -> Result<Vec<MatchRow>> {
        self.composer.match_rows(text, strategy, page)
    }

    /// [`match_rows`](Self::match_rows) with the strategy resolved by name.
    pub fn match_named(&self, text: &str, strategy: &str, page: Option<Page>) -> Result<Vec<MatchRow>> {
        self.composer.match_named(text, strategy, page)
    }
}
