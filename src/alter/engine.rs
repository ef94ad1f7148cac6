//! Storage engine and session interfaces used by the alter driver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::alter::definition::{names_eq, Row, TableDefinition, TableName};
use crate::alter::AlterError;

/// Position of a sequential scan. Scans are resumable: the engine only
/// ever advances the cursor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RowCursor {
    pub position: u64,
}

/// Result of an index enable/disable request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySwitch {
    Done,
    /// The engine has no notion of disabled indexes.
    Unsupported,
}

/// What the alter driver needs from a storage engine.
///
/// Implementations use interior mutability; one engine instance is shared
/// by every session.
pub trait StorageEngine: Send + Sync {
    fn name(&self) -> &str;

    /// Engines that cannot be altered at all.
    fn can_alter(&self) -> bool {
        true
    }

    /// Whether rows may move to another engine (no foreign keys pin them).
    fn can_switch_engines(&self, _table: &TableName) -> bool {
        true
    }

    /// Rows are stored in primary key order, so ORDER BY is pointless.
    fn primary_key_is_clustered(&self) -> bool {
        false
    }

    fn table_exists(&self, table: &TableName) -> bool;
    fn definition(&self, table: &TableName) -> Result<TableDefinition, AlterError>;
    fn create_table(&self, def: &TableDefinition) -> Result<(), AlterError>;
    fn drop_table(&self, table: &TableName) -> Result<(), AlterError>;
    fn rename_table(&self, from: &TableName, to: &TableName) -> Result<(), AlterError>;

    fn row_count(&self, table: &TableName) -> Result<u64, AlterError>;

    /// Next row of a scan, `None` at the end.
    fn read_row(&self, table: &TableName, cursor: &mut RowCursor)
        -> Result<Option<Row>, AlterError>;

    /// Insert one row. Unique key violations come back as
    /// [`AlterError::DuplicateKey`], NULL in a NOT NULL column as
    /// [`AlterError::BadNull`]; a failed insert changes nothing.
    fn write_row(&self, table: &TableName, row: Row) -> Result<(), AlterError>;

    fn start_bulk_insert(&self, _table: &TableName, _expected_rows: u64) {}

    fn end_bulk_insert(&self, _table: &TableName) -> Result<(), AlterError> {
        Ok(())
    }

    fn commit(&self, _table: &TableName) -> Result<(), AlterError> {
        Ok(())
    }

    /// Enable non-unique indexes.
    fn enable_indexes(&self, _table: &TableName) -> Result<KeySwitch, AlterError> {
        Ok(KeySwitch::Unsupported)
    }

    /// Disable non-unique indexes.
    fn disable_indexes(&self, _table: &TableName) -> Result<KeySwitch, AlterError> {
        Ok(KeySwitch::Unsupported)
    }

    fn indexes_are_disabled(&self, _table: &TableName) -> bool {
        false
    }

    fn discard_tablespace(&self, table: &TableName) -> Result<(), AlterError> {
        Err(AlterError::IllegalHa(table.name.clone()))
    }

    fn import_tablespace(&self, table: &TableName) -> Result<(), AlterError> {
        Err(AlterError::IllegalHa(table.name.clone()))
    }
}

/// The calling session.
pub trait Session {
    /// Connection id, used in shadow table names.
    fn id(&self) -> u64;

    /// Checked once per copied row.
    fn is_killed(&self) -> bool;

    /// Record a note or warning for the statement.
    fn push_warning(&mut self, message: String);
}

/// A session with a shareable kill flag that keeps its warnings.
#[derive(Debug, Default)]
pub struct BasicSession {
    id: u64,
    killed: Arc<AtomicBool>,
    pub warnings: Vec<String>,
}

impl BasicSession {
    pub fn new(id: u64) -> Self {
        BasicSession {
            id,
            killed: Arc::new(AtomicBool::new(false)),
            warnings: Vec::new(),
        }
    }

    /// Flag another thread can set to kill the statement.
    pub fn kill_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.killed)
    }
}

impl Session for BasicSession {
    fn id(&self) -> u64 {
        self.id
    }

    fn is_killed(&self) -> bool {
        self.killed.load(Ordering::Relaxed)
    }

    fn push_warning(&mut self, message: String) {
        self.warnings.push(message);
    }
}

/// Installed storage engines.
#[derive(Default)]
pub struct EngineRegistry {
    engines: Vec<Arc<dyn StorageEngine>>,
}

impl EngineRegistry {
    pub fn register(&mut self, engine: Arc<dyn StorageEngine>) {
        self.engines.push(engine);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn StorageEngine>> {
        self.engines
            .iter()
            .find(|e| names_eq(e.name(), name))
            .cloned()
    }

    /// The engine holding `table`.
    pub fn find_table(&self, table: &TableName) -> Option<Arc<dyn StorageEngine>> {
        self.engines
            .iter()
            .find(|e| e.table_exists(table))
            .cloned()
    }

    pub fn table_exists(&self, table: &TableName) -> bool {
        self.engines.iter().any(|e| e.table_exists(table))
    }
}

impl std::fmt::Debug for EngineRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.engines.iter().map(|e| e.name()))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alter::memory::MemoryEngine;

    #[test]
    fn test_registry_lookup() {
        let mut registry = EngineRegistry::default();
        let memory = Arc::new(MemoryEngine::new("MEMORY"));
        let def = TableDefinition::new(TableName::new("test", "t"), "MEMORY");
        memory.create(&def).unwrap();
        registry.register(memory);
        registry.register(Arc::new(MemoryEngine::new("ARCHIVE")));

        assert_eq!(registry.get("memory").unwrap().name(), "MEMORY");
        assert!(registry.get("InnoDB").is_none());
        let owner = registry.find_table(&TableName::new("test", "t")).unwrap();
        assert_eq!(owner.name(), "MEMORY");
        assert!(!registry.table_exists(&TableName::new("test", "u")));
    }

    #[test]
    fn test_basic_session_kill_flag() {
        let mut session = BasicSession::new(9);
        assert!(!session.is_killed());
        session.kill_flag().store(true, Ordering::Relaxed);
        assert!(session.is_killed());
        session.push_warning("note".into());
        assert_eq!(session.warnings, vec!["note".to_string()]);
    }
}
