//! ALTER TABLE: definition diffing and the copy-table engine.
//!
//! An alteration starts from the current [`TableDefinition`] and an
//! [`AlterRequest`]. [`compute_delta`] validates the request and decides
//! how it can be carried out:
//!
//! - rename and index enable/disable only touch metadata and never copy;
//! - DISCARD/IMPORT TABLESPACE is passed straight to the engine;
//! - everything else builds a shadow table with the new definition, copies
//!   every row into it and swaps it in under the original name.
//!
//! [`AlterTable`] drives those steps against a [`StorageEngine`], taking
//! name locks and waiting for open handles through a shared [`TableCache`].
//!
//! ```
//! use rpl::alter::{AlterRequest, AlterTable, BasicSession, ColumnDef, ColumnType,
//!     EngineRegistry, MemoryEngine, TableCache, TableDefinition, TableName};
//! use std::sync::Arc;
//!
//! let engine = Arc::new(MemoryEngine::new("MEMORY"));
//! let mut def = TableDefinition::new(TableName::new("test", "t"), "MEMORY");
//! def.columns.push(ColumnDef::new("id", ColumnType::Integer));
//! engine.create(&def).unwrap();
//!
//! let mut engines = EngineRegistry::default();
//! engines.register(engine);
//! let cache = TableCache::default();
//! let mut session = BasicSession::new(1);
//!
//! let request = AlterRequest {
//!     rename: Some(TableName::new("test", "t2")),
//!     ..Default::default()
//! };
//! let mut alter = AlterTable::new(&engines, &cache, &mut session);
//! alter.execute(&TableName::new("test", "t"), &request).unwrap();
//! ```
//!
//! [`StorageEngine`]: engine::StorageEngine

pub mod copy;
pub mod definition;
pub mod diff;
pub mod engine;
pub mod memory;
pub mod request;
pub mod sort;
pub mod table_cache;

pub use copy::{AlterOutcome, AlterState, AlterTable, CopyProgress};
pub use definition::{
    ColumnDef, ColumnType, ForeignKeyDef, KeyDef, KeyPart, KeyType, Row, TableDefinition,
    TableName, Value,
};
pub use diff::{compute_delta, AlterPlan, ColumnOrigin, NewColumn, TableDefinitionDelta};
pub use engine::{BasicSession, EngineRegistry, KeySwitch, RowCursor, Session, StorageEngine};
pub use memory::MemoryEngine;
pub use request::{
    AlterDefault, AlterRequest, BuildMethod, ColumnPosition, ColumnSpec, DropItem, DropKind,
    KeysOnOff, TablespaceOp,
};
pub use table_cache::TableCache;
pub use sort::RowSorter;

use thiserror::Error;

/// Statement-level ALTER TABLE errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AlterError {
    #[error("Unknown column '{column}' in '{table}'")]
    BadField { column: String, table: String },

    #[error("You can't delete all columns with ALTER TABLE; use DROP TABLE instead")]
    CantRemoveAllFields,

    #[error("Can't DROP '{0}'; check that column/key exists")]
    CantDropFieldOrKey(String),

    #[error("Duplicate column name '{0}'")]
    DupFieldName(String),

    #[error("Duplicate key name '{0}'")]
    DupKeyName(String),

    #[error("Incorrect index name '{0}'")]
    WrongNameForIndex(String),

    #[error("Table '{0}' already exists")]
    TableExists(String),

    #[error("Table storage engine for '{0}' doesn't have this option")]
    IllegalHa(String),

    #[error("Cannot delete or update a parent row: a foreign key constraint fails")]
    RowIsReferenced,

    #[error("Error on rename of '{from}' to '{to}'")]
    ErrorOnRename { from: String, to: String },

    /// BLOB/TEXT columns cannot carry a default.
    #[error("BLOB/TEXT column '{0}' can't have a default value")]
    InvalidDefault(String),

    #[error("Data truncated for column '{column}' at row {row}")]
    DataTruncated { column: String, row: u64 },

    #[error("Column '{0}' cannot be null")]
    BadNull(String),

    #[error("Duplicate entry '{entry}' for key '{key}'")]
    DuplicateKey { entry: String, key: String },

    #[error("Query execution was interrupted")]
    Killed,

    #[error("Table '{0}' doesn't exist")]
    NoSuchTable(String),

    #[error("Unknown table engine '{0}'")]
    UnknownEngine(String),

    #[error("This version doesn't yet support '{0}'")]
    NotSupportedYet(String),

    #[error("Got error from storage engine: {0}")]
    Engine(String),

    /// ORDER BY could not write or read back a sorted run.
    #[error("Error in sort file: {0}")]
    SortFile(String),
}

impl AlterError {
    /// Row-level errors that `IGNORE` turns into a skipped row.
    pub fn is_skippable(&self) -> bool {
        matches!(
            self,
            AlterError::DuplicateKey { .. } | AlterError::BadNull(_)
        )
    }
}
