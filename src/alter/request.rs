//! The operations an ALTER TABLE statement asks for.

use serde::{Deserialize, Serialize};

use crate::alter::definition::{ColumnDef, ForeignKeyDef, KeyDef, TableName, Value};

/// Where a new or changed column goes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnPosition {
    /// Changed columns stay where they were; new columns are appended.
    #[default]
    Default,
    First,
    After(String),
}

/// `ADD COLUMN` (no `change`) or `CHANGE old new` / `MODIFY`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub def: ColumnDef,
    /// Name of the existing column being replaced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change: Option<String>,
    #[serde(default)]
    pub position: ColumnPosition,
}

impl ColumnSpec {
    pub fn add(def: ColumnDef) -> Self {
        ColumnSpec {
            def,
            change: None,
            position: ColumnPosition::Default,
        }
    }

    pub fn change(old_name: impl Into<String>, def: ColumnDef) -> Self {
        ColumnSpec {
            def,
            change: Some(old_name.into()),
            position: ColumnPosition::Default,
        }
    }

    pub fn at(mut self, position: ColumnPosition) -> Self {
        self.position = position;
        self
    }
}

/// `ALTER COLUMN c SET DEFAULT v` (`Some`) or `DROP DEFAULT` (`None`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlterDefault {
    pub column: String,
    pub default: Option<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropKind {
    Column,
    Key,
    ForeignKey,
}

/// One `DROP ...` clause.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DropItem {
    pub kind: DropKind,
    pub name: String,
}

impl DropItem {
    pub fn column(name: impl Into<String>) -> Self {
        DropItem {
            kind: DropKind::Column,
            name: name.into(),
        }
    }

    pub fn key(name: impl Into<String>) -> Self {
        DropItem {
            kind: DropKind::Key,
            name: name.into(),
        }
    }

    pub fn foreign_key(name: impl Into<String>) -> Self {
        DropItem {
            kind: DropKind::ForeignKey,
            name: name.into(),
        }
    }
}

/// `ENABLE KEYS` / `DISABLE KEYS`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeysOnOff {
    #[default]
    LeaveAsIs,
    Enable,
    Disable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TablespaceOp {
    Discard,
    Import,
}

/// `ALTER ONLINE` / `ALTER OFFLINE`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BuildMethod {
    #[default]
    Default,
    Online,
    Offline,
}

/// A full ALTER TABLE request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlterRequest {
    pub columns: Vec<ColumnSpec>,
    pub drop: Vec<DropItem>,
    pub alter_defaults: Vec<AlterDefault>,
    pub add_keys: Vec<KeyDef>,
    pub add_foreign_keys: Vec<ForeignKeyDef>,
    pub rename: Option<TableName>,
    pub engine: Option<String>,
    pub auto_increment: Option<u64>,
    pub keys_onoff: KeysOnOff,
    pub tablespace: Option<TablespaceOp>,
    pub build_method: BuildMethod,
    /// Copy rows in this column order.
    pub order_by: Vec<String>,
    /// Skip rows that violate a unique key or a NOT NULL column.
    pub ignore: bool,
}

impl AlterRequest {
    /// Whether anything besides a rename and keys on/off was asked for.
    pub fn changes_structure(&self) -> bool {
        !self.columns.is_empty()
            || !self.drop.is_empty()
            || !self.alter_defaults.is_empty()
            || !self.add_keys.is_empty()
            || !self.add_foreign_keys.is_empty()
            || self.engine.is_some()
            || self.auto_increment.is_some()
            || !self.order_by.is_empty()
    }

    /// Metadata-only: rename and/or keys on/off.
    pub fn is_fast_path(&self) -> bool {
        self.tablespace.is_none() && !self.changes_structure()
    }

    /// Anything other than the tablespace operation itself.
    pub fn has_other_than_tablespace(&self) -> bool {
        self.changes_structure()
            || self.rename.is_some()
            || self.keys_onoff != KeysOnOff::LeaveAsIs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alter::definition::ColumnType;

    #[test]
    fn test_fast_path_classification() {
        let rename = AlterRequest {
            rename: Some(TableName::new("test", "t2")),
            keys_onoff: KeysOnOff::Disable,
            ignore: true,
            ..Default::default()
        };
        assert!(rename.is_fast_path());

        let add = AlterRequest {
            columns: vec![ColumnSpec::add(ColumnDef::new("c", ColumnType::Integer))],
            ..Default::default()
        };
        assert!(!add.is_fast_path());

        let ordered = AlterRequest {
            order_by: vec!["id".into()],
            ..Default::default()
        };
        assert!(!ordered.is_fast_path());
    }

    #[test]
    fn test_request_from_json() {
        let req: AlterRequest = serde_json::from_str(
            r#"{
                "columns": [{"def": {"name": "c", "column_type": "integer"},
                             "position": {"after": "id"}}],
                "drop": [{"kind": "foreign_key", "name": "t_ibfk_1"}],
                "keys_onoff": "disable"
            }"#,
        )
        .unwrap();
        assert_eq!(req.columns[0].position, ColumnPosition::After("id".into()));
        assert_eq!(req.drop[0], DropItem::foreign_key("t_ibfk_1"));
        assert_eq!(req.keys_onoff, KeysOnOff::Disable);
        assert!(!req.ignore);
    }
}
