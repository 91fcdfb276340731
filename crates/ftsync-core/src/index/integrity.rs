//! Bounded, idempotent repair of trigger integrity.
//!
//! A trigger depends on three repairable artifacts (its callback function,
//! the trigger object, the index table) plus the content table, which has no
//! repair path. Each repairable kind gets at most one repair attempt per
//! resolution pass; a second failure of the same kind aborts instead of
//! respinning on a repair that does not stick.

use tracing::{info, warn};

use crate::error::{FtsError, IntegrityKind, Result};

use super::trigger::ChangeTrigger;

#[derive(Default)]
struct RepairAttempts {
    function: usize,
    trigger: usize,
    index_table: usize,
}

impl RepairAttempts {
    fn get(&self, kind: IntegrityKind) -> usize {
        match kind {
            IntegrityKind::TriggerFunction => self.function,
            IntegrityKind::Trigger => self.trigger,
            IntegrityKind::IndexTable => self.index_table,
            IntegrityKind::ContentTable => 0,
        }
    }

    fn bump(&mut self, kind: IntegrityKind) {
        match kind {
            IntegrityKind::TriggerFunction => self.function += 1,
            IntegrityKind::Trigger => self.trigger += 1,
            IntegrityKind::IndexTable => self.index_table += 1,
            IntegrityKind::ContentTable => {}
        }
    }
}

/// Verify a trigger's dependent artifacts and drive the repair loop until
/// verification converges or a kind exhausts its single repair attempt.
pub fn resolve(trigger: &ChangeTrigger) -> Result<()> {
    let mut attempts = RepairAttempts::default();

    loop {
        let (kind, name) = match trigger.verify(true) {
            Ok(()) => return Ok(()),
            Err(FtsError::Integrity { kind, name }) => (kind, name),
            Err(other) => return Err(other),
        };

        if kind == IntegrityKind::ContentTable || attempts.get(kind) > 0 {
            warn!(%kind, %name, "trigger integrity can not be resolved");
            return Err(FtsError::IntegrityUnresolved { kind, name });
        }
        attempts.bump(kind);
        info!(%kind, %name, "repairing missing trigger artifact");

        match kind {
            IntegrityKind::TriggerFunction => trigger.register_function()?,
            IntegrityKind::Trigger => trigger.create_trigger()?,
            IntegrityKind::IndexTable => {
                trigger.driver().create(&[])?;
            }
            IntegrityKind::ContentTable => unreachable!("content table has no repair path"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use rusqlite::Connection;

    use super::*;
    use crate::index::trigger::{TriggerBinding, TriggerGroup};

    fn setup() -> (Arc<Mutex<Connection>>, Arc<Mutex<Connection>>) {
        let content = Arc::new(Mutex::new(Connection::open_in_memory().unwrap()));
        let index = Arc::new(Mutex::new(Connection::open_in_memory().unwrap()));
        content
            .lock()
            .unwrap()
            .execute_batch("CREATE TABLE test_tbl (id INTEGER PRIMARY KEY, title TEXT)")
            .unwrap();
        (content, index)
    }

    fn binding(table: &str) -> TriggerBinding {
        TriggerBinding {
            table: table.into(),
            pk_column: "id".into(),
            column_map: vec![("id".into(), "rowid".into()), ("title".into(), "title".into())],
        }
    }

    #[test]
    fn test_resolves_everything_from_scratch() {
        let (content, index) = setup();
        let group = TriggerGroup::new(content, Arc::clone(&index), binding("test_tbl"), None);

        // nothing exists yet: one repair per kind converges
        let trigger = &group.triggers()[0];
        resolve(trigger).unwrap();
        trigger.verify(true).unwrap();
        assert!(group.driver().exists().unwrap());
    }

    #[test]
    fn test_resolves_missing_index_table() {
        let (content, index) = setup();
        let group = TriggerGroup::new(content, Arc::clone(&index), binding("test_tbl"), None);
        let trigger = &group.triggers()[0];
        trigger.create().unwrap();
        assert!(!group.driver().exists().unwrap());

        resolve(trigger).unwrap();
        assert!(group.driver().exists().unwrap());
    }

    #[test]
    fn test_resolves_missing_function() {
        let (content, index) = setup();
        let group = TriggerGroup::new(content, Arc::clone(&index), binding("test_tbl"), None);
        let trigger = &group.triggers()[0];
        // the trigger object can exist without its function being registered
        trigger.create_trigger().unwrap();
        group.driver().create(&[]).unwrap();

        resolve(trigger).unwrap();
        trigger.verify(true).unwrap();
    }

    #[test]
    fn test_missing_content_table_is_fatal() {
        let (content, index) = setup();
        let group = TriggerGroup::new(content, index, binding("missing_tbl"), None);

        let err = resolve(&group.triggers()[0]).unwrap_err();
        assert!(matches!(
            err,
            FtsError::IntegrityUnresolved {
                kind: IntegrityKind::ContentTable,
                ..
            }
        ));
    }

    #[test]
    fn test_same_kind_fails_after_one_attempt() {
        let (content, index) = setup();
        // squat the trigger name on another table: verification keeps
        // failing for the trigger kind while the idempotent repair is a
        // no-op, so the loop must stop after its single attempt
        {
            let conn = content.lock().unwrap();
            conn.execute_batch(
                "CREATE TABLE other_tbl (id INTEGER PRIMARY KEY, title TEXT);
                 CREATE TRIGGER test_tbl_ai AFTER INSERT ON other_tbl \
                 BEGIN SELECT 1; END;",
            )
            .unwrap();
        }
        let group = TriggerGroup::new(content, index, binding("test_tbl"), None);

        let err = resolve(&group.triggers()[0]).unwrap_err();
        assert!(matches!(
            err,
            FtsError::IntegrityUnresolved {
                kind: IntegrityKind::Trigger,
                ..
            }
        ));
    }
}
