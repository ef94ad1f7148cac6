//! In-memory storage engine.
//!
//! Holds rows in insertion order and enforces primary/unique keys, NOT NULL
//! and AUTO_INCREMENT on insert. Capabilities can be switched off to
//! model engines that refuse some operations, and failures can be injected
//! into renames and table creation.

use parking_lot::Mutex;
use std::collections::HashMap;

use crate::alter::definition::{Row, TableDefinition, TableName, Value};
use crate::alter::engine::{KeySwitch, RowCursor, StorageEngine};
use crate::alter::AlterError;

#[derive(Debug, Clone, Copy)]
struct Capabilities {
    alter: bool,
    switch_engines: bool,
    clustered_primary_key: bool,
    index_switch: bool,
    tablespaces: bool,
}

#[derive(Debug, Default)]
struct Faults {
    /// Renames whose target matches fail once.
    rename_to: Vec<String>,
    create: bool,
}

#[derive(Debug)]
struct MemTable {
    def: TableDefinition,
    rows: Vec<Row>,
    next_auto_increment: u64,
    indexes_disabled: bool,
    discarded: bool,
}

impl MemTable {
    fn new(def: TableDefinition) -> Self {
        MemTable {
            next_auto_increment: def.auto_increment.max(1),
            def,
            rows: Vec::new(),
            indexes_disabled: false,
            discarded: false,
        }
    }

    /// Store `row`. NULL in an auto_increment column takes the next value;
    /// so does 0 when `zero_is_auto` is set.
    fn insert(&mut self, mut row: Row, zero_is_auto: bool) -> Result<(), AlterError> {
        let columns = &self.def.columns;
        if row.len() != columns.len() {
            return Err(AlterError::Engine(format!(
                "row has {} values, table {} has {} columns",
                row.len(),
                self.def.table,
                columns.len()
            )));
        }

        for (i, col) in columns.iter().enumerate() {
            let generate = match row[i] {
                Value::Null => true,
                Value::Int(0) => zero_is_auto,
                _ => false,
            };
            if col.auto_increment && generate {
                row[i] = Value::Int(self.next_auto_increment as i64);
            } else if !col.nullable && row[i].is_null() {
                return Err(AlterError::BadNull(col.name.clone()));
            }
        }

        for key in self.def.keys.iter().filter(|k| k.key_type.is_unique()) {
            let indexes: Vec<usize> = key
                .parts
                .iter()
                .filter_map(|p| self.def.column_index(&p.column))
                .collect();
            let project = |r: &Row| -> Vec<Value> { indexes.iter().map(|&i| r[i].clone()).collect() };
            let values = project(&row);
            if values.iter().any(Value::is_null) {
                continue;
            }
            if self.rows.iter().any(|r| project(r) == values) {
                return Err(AlterError::DuplicateKey {
                    entry: values
                        .iter()
                        .map(|v| v.to_string())
                        .collect::<Vec<_>>()
                        .join("-"),
                    key: key.name.clone(),
                });
            }
        }

        for (i, col) in columns.iter().enumerate() {
            if let (true, Value::Int(v)) = (col.auto_increment, &row[i]) {
                if *v >= 0 && *v as u64 >= self.next_auto_increment {
                    self.next_auto_increment = *v as u64 + 1;
                }
            }
        }
        self.rows.push(row);
        Ok(())
    }
}

/// A storage engine keeping everything in a map behind a mutex.
#[derive(Debug)]
pub struct MemoryEngine {
    name: String,
    caps: Capabilities,
    tables: Mutex<HashMap<String, MemTable>>,
    faults: Mutex<Faults>,
}

impl MemoryEngine {
    /// An engine that supports every operation except tablespaces.
    pub fn new(name: impl Into<String>) -> Self {
        MemoryEngine {
            name: name.into(),
            caps: Capabilities {
                alter: true,
                switch_engines: true,
                clustered_primary_key: false,
                index_switch: true,
                tablespaces: false,
            },
            tables: Mutex::new(HashMap::new()),
            faults: Mutex::new(Faults::default()),
        }
    }

    /// Refuse every ALTER TABLE.
    pub fn without_alter(mut self) -> Self {
        self.caps.alter = false;
        self
    }

    /// Refuse to hand rows to another engine.
    pub fn without_engine_switch(mut self) -> Self {
        self.caps.switch_engines = false;
        self
    }

    pub fn with_clustered_primary_key(mut self) -> Self {
        self.caps.clustered_primary_key = true;
        self
    }

    /// No ENABLE/DISABLE KEYS support.
    pub fn without_index_switch(mut self) -> Self {
        self.caps.index_switch = false;
        self
    }

    pub fn with_tablespaces(mut self) -> Self {
        self.caps.tablespaces = true;
        self
    }

    /// Make the next rename onto `target` fail.
    pub fn fail_rename_to(&self, target: &TableName) {
        self.faults.lock().rename_to.push(target.key());
    }

    /// Make the next table creation fail.
    pub fn fail_next_create(&self) {
        self.faults.lock().create = true;
    }

    pub fn create(&self, def: &TableDefinition) -> Result<(), AlterError> {
        if std::mem::take(&mut self.faults.lock().create) {
            return Err(AlterError::Engine(format!(
                "cannot create table {}",
                def.table
            )));
        }
        let mut tables = self.tables.lock();
        let key = def.table.key();
        if tables.contains_key(&key) {
            return Err(AlterError::TableExists(def.table.name.clone()));
        }
        tables.insert(key, MemTable::new(def.clone()));
        Ok(())
    }

    /// Insert as a client statement would: 0 in an auto_increment column
    /// asks for a generated value.
    pub fn insert(&self, table: &TableName, row: Row) -> Result<(), AlterError> {
        self.with_table(table, |t| t.insert(row, true))
    }

    /// All rows of `table`, in storage order.
    pub fn rows(&self, table: &TableName) -> Result<Vec<Row>, AlterError> {
        self.with_table(table, |t| Ok(t.rows.clone()))
    }

    pub fn table_names(&self) -> Vec<TableName> {
        let mut names: Vec<TableName> = self
            .tables
            .lock()
            .values()
            .map(|t| t.def.table.clone())
            .collect();
        names.sort_by_key(|t| t.key());
        names
    }

    fn with_table<T, F>(&self, table: &TableName, f: F) -> Result<T, AlterError>
    where
        F: FnOnce(&mut MemTable) -> Result<T, AlterError>,
    {
        let mut tables = self.tables.lock();
        let t = tables
            .get_mut(&table.key())
            .ok_or_else(|| AlterError::NoSuchTable(table.to_string()))?;
        if t.discarded {
            return Err(AlterError::Engine(format!(
                "tablespace of {} has been discarded",
                table
            )));
        }
        f(t)
    }
}

impl StorageEngine for MemoryEngine {
    fn name(&self) -> &str {
        &self.name
    }

    fn can_alter(&self) -> bool {
        self.caps.alter
    }

    fn can_switch_engines(&self, _table: &TableName) -> bool {
        self.caps.switch_engines
    }

    fn primary_key_is_clustered(&self) -> bool {
        self.caps.clustered_primary_key
    }

    fn table_exists(&self, table: &TableName) -> bool {
        self.tables.lock().contains_key(&table.key())
    }

    fn definition(&self, table: &TableName) -> Result<TableDefinition, AlterError> {
        let tables = self.tables.lock();
        let t = tables
            .get(&table.key())
            .ok_or_else(|| AlterError::NoSuchTable(table.to_string()))?;
        let mut def = t.def.clone();
        if def.columns.iter().any(|c| c.auto_increment) {
            def.auto_increment = t.next_auto_increment;
        }
        Ok(def)
    }

    fn create_table(&self, def: &TableDefinition) -> Result<(), AlterError> {
        self.create(def)
    }

    fn drop_table(&self, table: &TableName) -> Result<(), AlterError> {
        self.tables
            .lock()
            .remove(&table.key())
            .map(|_| ())
            .ok_or_else(|| AlterError::NoSuchTable(table.to_string()))
    }

    fn rename_table(&self, from: &TableName, to: &TableName) -> Result<(), AlterError> {
        let rename_error = || AlterError::ErrorOnRename {
            from: from.to_string(),
            to: to.to_string(),
        };
        {
            let mut faults = self.faults.lock();
            if let Some(i) = faults.rename_to.iter().position(|k| *k == to.key()) {
                faults.rename_to.remove(i);
                return Err(rename_error());
            }
        }
        let mut tables = self.tables.lock();
        if tables.contains_key(&to.key()) {
            return Err(rename_error());
        }
        let mut t = tables
            .remove(&from.key())
            .ok_or_else(|| AlterError::NoSuchTable(from.to_string()))?;
        t.def.table = to.clone();
        tables.insert(to.key(), t);
        Ok(())
    }

    fn row_count(&self, table: &TableName) -> Result<u64, AlterError> {
        self.with_table(table, |t| Ok(t.rows.len() as u64))
    }

    fn read_row(
        &self,
        table: &TableName,
        cursor: &mut RowCursor,
    ) -> Result<Option<Row>, AlterError> {
        self.with_table(table, |t| {
            let row = t.rows.get(cursor.position as usize).cloned();
            if row.is_some() {
                cursor.position += 1;
            }
            Ok(row)
        })
    }

    fn write_row(&self, table: &TableName, row: Row) -> Result<(), AlterError> {
        // Copied rows keep their values, 0 included.
        self.with_table(table, |t| t.insert(row, false))
    }

    fn enable_indexes(&self, table: &TableName) -> Result<KeySwitch, AlterError> {
        if !self.caps.index_switch {
            return Ok(KeySwitch::Unsupported);
        }
        self.with_table(table, |t| {
            t.indexes_disabled = false;
            Ok(KeySwitch::Done)
        })
    }

    fn disable_indexes(&self, table: &TableName) -> Result<KeySwitch, AlterError> {
        if !self.caps.index_switch {
            return Ok(KeySwitch::Unsupported);
        }
        self.with_table(table, |t| {
            t.indexes_disabled = true;
            Ok(KeySwitch::Done)
        })
    }

    fn indexes_are_disabled(&self, table: &TableName) -> bool {
        self.tables
            .lock()
            .get(&table.key())
            .is_some_and(|t| t.indexes_disabled)
    }

    fn discard_tablespace(&self, table: &TableName) -> Result<(), AlterError> {
        if !self.caps.tablespaces {
            return Err(AlterError::IllegalHa(table.name.clone()));
        }
        self.with_table(table, |t| {
            t.discarded = true;
            Ok(())
        })
    }

    fn import_tablespace(&self, table: &TableName) -> Result<(), AlterError> {
        if !self.caps.tablespaces {
            return Err(AlterError::IllegalHa(table.name.clone()));
        }
        let mut tables = self.tables.lock();
        let t = tables
            .get_mut(&table.key())
            .ok_or_else(|| AlterError::NoSuchTable(table.to_string()))?;
        t.discarded = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alter::definition::{ColumnDef, ColumnType, KeyDef};

    fn users() -> TableDefinition {
        let mut def = TableDefinition::new(TableName::new("test", "users"), "MEMORY");
        def.columns = vec![
            ColumnDef::new("id", ColumnType::Integer).auto_increment(),
            ColumnDef::varchar("email", 30).not_null(),
        ];
        def.keys = vec![KeyDef::primary(&["id"]), KeyDef::unique("email", &["email"])];
        def
    }

    #[test]
    fn test_insert_enforces_keys() {
        let engine = MemoryEngine::new("MEMORY");
        let t = users().table;
        engine.create(&users()).unwrap();

        engine.insert(&t, vec![Value::Null, Value::Text("a@x".into())]).unwrap();
        engine.insert(&t, vec![Value::Int(10), Value::Text("b@x".into())]).unwrap();
        engine.insert(&t, vec![Value::Null, Value::Text("c@x".into())]).unwrap();

        let rows = engine.rows(&t).unwrap();
        assert_eq!(rows[0][0], Value::Int(1));
        assert_eq!(rows[2][0], Value::Int(11));

        assert_eq!(
            engine.insert(&t, vec![Value::Null, Value::Text("a@x".into())]),
            Err(AlterError::DuplicateKey {
                entry: "a@x".into(),
                key: "email".into()
            })
        );
        assert_eq!(
            engine.insert(&t, vec![Value::Int(5), Value::Null]),
            Err(AlterError::BadNull("email".into()))
        );
        // Failed inserts leave the counter alone.
        assert_eq!(engine.definition(&t).unwrap().auto_increment, 12);
    }

    #[test]
    fn test_scan_with_cursor() {
        let engine = MemoryEngine::new("MEMORY");
        let t = users().table;
        engine.create(&users()).unwrap();
        for email in ["a", "b"] {
            engine.insert(&t, vec![Value::Null, Value::Text(email.into())]).unwrap();
        }
        let mut cursor = RowCursor::default();
        assert!(engine.read_row(&t, &mut cursor).unwrap().is_some());
        assert!(engine.read_row(&t, &mut cursor).unwrap().is_some());
        assert!(engine.read_row(&t, &mut cursor).unwrap().is_none());
        assert_eq!(cursor.position, 2);
    }

    #[test]
    fn test_rename_fault_is_one_shot() {
        let engine = MemoryEngine::new("MEMORY");
        let from = users().table;
        let to = from.with_name("people");
        engine.create(&users()).unwrap();

        engine.fail_rename_to(&to);
        assert!(matches!(
            engine.rename_table(&from, &to),
            Err(AlterError::ErrorOnRename { .. })
        ));
        assert!(engine.table_exists(&from));

        engine.rename_table(&from, &to).unwrap();
        assert!(!engine.table_exists(&from));
        assert_eq!(engine.definition(&to).unwrap().table.name, "people");
    }

    #[test]
    fn test_capabilities() {
        let engine = MemoryEngine::new("ARCHIVE").without_index_switch();
        let t = users().table;
        engine.create(&users()).unwrap();
        assert_eq!(engine.disable_indexes(&t).unwrap(), KeySwitch::Unsupported);
        assert_eq!(
            engine.discard_tablespace(&t),
            Err(AlterError::IllegalHa("users".into()))
        );

        let engine = MemoryEngine::new("MEMORY").with_tablespaces();
        engine.create(&users()).unwrap();
        engine.discard_tablespace(&t).unwrap();
        assert!(engine.rows(&t).is_err());
        engine.import_tablespace(&t).unwrap();
        assert!(engine.rows(&t).unwrap().is_empty());
    }

    #[test]
    fn test_copied_zero_keeps_its_value() {
        let engine = MemoryEngine::new("MEMORY");
        let t = users().table;
        engine.create(&users()).unwrap();

        engine.write_row(&t, vec![Value::Int(0), Value::Text("zero@x".into())]).unwrap();
        engine.write_row(&t, vec![Value::Null, Value::Text("new@x".into())]).unwrap();
        engine.insert(&t, vec![Value::Int(0), Value::Text("user@x".into())]).unwrap();

        let ids: Vec<Value> = engine.rows(&t).unwrap().into_iter().map(|r| r[0].clone()).collect();
        assert_eq!(ids, vec![Value::Int(0), Value::Int(1), Value::Int(2)]);
    }
}
