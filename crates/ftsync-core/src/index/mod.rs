//! Contentless-index maintenance: statement building, the index driver,
//! change-capture triggers and integrity resolution.

pub mod driver;
pub mod integrity;
pub mod statement;
pub mod trigger;

pub use driver::{BrokenDoc, BrokenEntry, ColumnData, FtsIndex, IndexTarget, ROWID_COLUMN};
pub use statement::StatementBuilder;
pub use trigger::{
    fts_table_name, ChangeTrigger, RowidResolver, TriggerBinding, TriggerGroup, TriggerOp,
    FTS_TABLE_SUFFIX,
};
