//! Table definition diff.
//!
//! [`compute_delta`] turns the current definition and a request into an
//! [`AlterPlan`]. Every name the request refers to is checked here, so a
//! bad request fails before any table is touched.
//!
//! The new column list is built in two passes. Existing columns are walked
//! first: dropped ones are left out, changed ones without a position take
//! the old column's place, the rest are carried over (with any
//! `ALTER COLUMN ... DEFAULT` applied). New columns and positioned changes
//! are then placed FIRST, AFTER a placed column, or at the end.
//!
//! Keys follow their columns: a part whose column went away is removed, a
//! prefix that no longer fits becomes a whole-column part, and a key left
//! with no parts is dropped.

use tracing::debug;

use crate::alter::definition::{
    names_eq, ColumnDef, ForeignKeyDef, KeyDef, KeyPart, KeyType, TableDefinition, TableName,
    PRIMARY_KEY_NAME,
};
use crate::alter::request::{
    AlterRequest, BuildMethod, ColumnPosition, ColumnSpec, DropItem, DropKind, KeysOnOff,
    TablespaceOp,
};
use crate::alter::AlterError;

/// Where a column of the new definition comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnOrigin {
    /// Carried over from the named old column.
    Kept(String),
    /// Redefined from the named old column.
    Changed(String),
    New,
}

impl ColumnOrigin {
    /// The old column whose values fill this one.
    pub fn source(&self) -> Option<&str> {
        match self {
            ColumnOrigin::Kept(name) | ColumnOrigin::Changed(name) => Some(name),
            ColumnOrigin::New => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewColumn {
    pub def: ColumnDef,
    pub origin: ColumnOrigin,
}

/// Everything the copy engine needs to build the new table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableDefinitionDelta {
    pub new_columns: Vec<NewColumn>,
    pub drop_columns: Vec<String>,
    /// The complete key list of the new table.
    pub new_keys: Vec<KeyDef>,
    /// Keys dropped by request or because none of their columns survived.
    pub drop_keys: Vec<String>,
    pub foreign_keys: Vec<ForeignKeyDef>,
    pub drop_foreign_keys: Vec<String>,
    pub engine_change: Option<String>,
    pub rename: Option<TableName>,
    pub auto_increment: u64,
    /// A new column that no existing row can fill; the copy fails on the
    /// first row.
    pub error_if_not_empty: Option<String>,
}

impl TableDefinitionDelta {
    /// The definition the altered table will have.
    pub fn definition(&self, old: &TableDefinition) -> TableDefinition {
        TableDefinition {
            table: self.rename.clone().unwrap_or_else(|| old.table.clone()),
            engine: self
                .engine_change
                .clone()
                .unwrap_or_else(|| old.engine.clone()),
            temporary: old.temporary,
            columns: self.new_columns.iter().map(|c| c.def.clone()).collect(),
            keys: self.new_keys.clone(),
            foreign_keys: self.foreign_keys.clone(),
            auto_increment: self.auto_increment,
        }
    }

    /// For each new column, the index of the old column it copies from.
    pub fn source_indexes(&self, old: &TableDefinition) -> Vec<Option<usize>> {
        self.new_columns
            .iter()
            .map(|c| c.origin.source().and_then(|s| old.column_index(s)))
            .collect()
    }
}

/// How an alteration will be carried out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlterPlan {
    Tablespace(TablespaceOp),
    /// Rename and/or keys on/off on the live table.
    NoCopy {
        rename: Option<TableName>,
        keys_onoff: KeysOnOff,
    },
    Copy(Box<TableDefinitionDelta>),
}

/// DROP clauses, each of which must match something exactly once.
struct DropList<'a> {
    items: Vec<(&'a DropItem, bool)>,
}

impl<'a> DropList<'a> {
    fn new(items: &'a [DropItem]) -> Self {
        DropList {
            items: items.iter().map(|i| (i, false)).collect(),
        }
    }

    fn take(&mut self, kind: DropKind, name: &str) -> bool {
        match self
            .items
            .iter_mut()
            .find(|(i, used)| !*used && i.kind == kind && names_eq(&i.name, name))
        {
            Some(entry) => {
                entry.1 = true;
                true
            }
            None => false,
        }
    }

    fn first_unmatched(&self) -> Option<&DropItem> {
        self.items.iter().find(|(_, used)| !used).map(|(i, _)| *i)
    }
}

/// Validate `request` against `old` and decide how to carry it out.
pub fn compute_delta(
    old: &TableDefinition,
    request: &AlterRequest,
) -> Result<AlterPlan, AlterError> {
    if let Some(op) = request.tablespace {
        if request.has_other_than_tablespace() {
            return Err(AlterError::NotSupportedYet(
                "DISCARD/IMPORT TABLESPACE combined with other alterations".to_string(),
            ));
        }
        return Ok(AlterPlan::Tablespace(op));
    }

    let rename = request
        .rename
        .clone()
        .filter(|target| !target.same_as(&old.table));

    // Temporary tables have no catalog entry to edit in place.
    if request.is_fast_path() && !old.temporary {
        return Ok(AlterPlan::NoCopy {
            rename,
            keys_onoff: request.keys_onoff,
        });
    }

    let mut drops = DropList::new(&request.drop);
    let mut auto_increment = request.auto_increment.unwrap_or(old.auto_increment);
    let mut drop_columns = Vec::new();
    let mut new_columns: Vec<NewColumn> = Vec::new();
    let mut pending: Vec<(&ColumnSpec, Option<String>)> =
        request.columns.iter().map(|s| (s, None)).collect();
    let mut defaults: Vec<_> = request.alter_defaults.iter().collect();
    let bad_field = |column: &str| AlterError::BadField {
        column: column.to_string(),
        table: old.table.name.clone(),
    };

    for col in &old.columns {
        if drops.take(DropKind::Column, &col.name) {
            if col.auto_increment && request.auto_increment.is_none() {
                auto_increment = 0;
            }
            drop_columns.push(col.name.clone());
            continue;
        }

        let changed = pending.iter().position(|(spec, source)| {
            source.is_none()
                && spec
                    .change
                    .as_deref()
                    .is_some_and(|c| names_eq(c, &col.name))
        });
        if let Some(i) = changed {
            if pending[i].0.position == ColumnPosition::Default {
                let (spec, _) = pending.remove(i);
                new_columns.push(NewColumn {
                    def: spec.def.clone(),
                    origin: ColumnOrigin::Changed(col.name.clone()),
                });
            } else {
                pending[i].1 = Some(col.name.clone());
            }
            continue;
        }

        let mut def = col.clone();
        if let Some(i) = defaults.iter().position(|d| names_eq(&d.column, &col.name)) {
            let alter = defaults.remove(i);
            if alter.default.is_some() && def.column_type.is_blob() {
                return Err(AlterError::InvalidDefault(col.name.clone()));
            }
            def.default = alter.default.clone();
        }
        new_columns.push(NewColumn {
            def,
            origin: ColumnOrigin::Kept(col.name.clone()),
        });
    }

    let mut error_if_not_empty = None;
    for (spec, source) in pending {
        let origin = match (&spec.change, source) {
            (Some(_), Some(source)) => ColumnOrigin::Changed(source),
            (Some(old_name), None) => return Err(bad_field(old_name)),
            (None, _) => ColumnOrigin::New,
        };
        if origin == ColumnOrigin::New && spec.def.needs_value() && error_if_not_empty.is_none() {
            error_if_not_empty = Some(spec.def.name.clone());
        }
        let column = NewColumn {
            def: spec.def.clone(),
            origin,
        };
        match &spec.position {
            ColumnPosition::Default => new_columns.push(column),
            ColumnPosition::First => new_columns.insert(0, column),
            ColumnPosition::After(name) => {
                let i = new_columns
                    .iter()
                    .position(|c| names_eq(&c.def.name, name))
                    .ok_or_else(|| bad_field(name))?;
                new_columns.insert(i + 1, column);
            }
        }
    }

    if let Some(alter) = defaults.first() {
        return Err(bad_field(&alter.column));
    }
    if new_columns.is_empty() {
        return Err(AlterError::CantRemoveAllFields);
    }
    for (i, col) in new_columns.iter().enumerate() {
        if new_columns[..i].iter().any(|c| names_eq(&c.def.name, &col.def.name)) {
            return Err(AlterError::DupFieldName(col.def.name.clone()));
        }
    }

    let (new_keys, drop_keys) = build_keys(old, &new_columns, request, &mut drops)?;
    let target = rename.as_ref().unwrap_or(&old.table);
    let (foreign_keys, drop_foreign_keys) =
        build_foreign_keys(old, &target.name, &new_columns, request, &mut drops)?;

    if let Some(item) = drops.first_unmatched() {
        return Err(AlterError::CantDropFieldOrKey(item.name.clone()));
    }

    if request.build_method == BuildMethod::Online {
        return Err(AlterError::NotSupportedYet(
            "ALTER ONLINE that needs a table copy".to_string(),
        ));
    }

    Ok(AlterPlan::Copy(Box::new(TableDefinitionDelta {
        new_columns,
        drop_columns,
        new_keys,
        drop_keys,
        foreign_keys,
        drop_foreign_keys,
        engine_change: request.engine.clone(),
        rename,
        auto_increment,
        error_if_not_empty,
    })))
}

fn find_by_source<'a>(columns: &'a [NewColumn], old_name: &str) -> Option<&'a NewColumn> {
    columns
        .iter()
        .find(|c| c.origin.source().is_some_and(|s| names_eq(s, old_name)))
}

/// A prefix part stays a prefix only while both column types take prefixes,
/// the prefix is shorter than the old column, and the new column still
/// holds it.
fn keeps_prefix(old: Option<&ColumnDef>, new: &ColumnDef, length: u32) -> bool {
    let Some(old) = old else {
        return false;
    };
    old.column_type.can_have_key_part()
        && new.column_type.can_have_key_part()
        && !(old.length == length && !old.column_type.is_blob())
        && !(new.length > 0 && new.length < length)
}

fn build_keys(
    old: &TableDefinition,
    columns: &[NewColumn],
    request: &AlterRequest,
    drops: &mut DropList<'_>,
) -> Result<(Vec<KeyDef>, Vec<String>), AlterError> {
    let mut keys: Vec<KeyDef> = Vec::new();
    let mut dropped = Vec::new();

    for key in &old.keys {
        if drops.take(DropKind::Key, &key.name) {
            dropped.push(key.name.clone());
            continue;
        }
        let parts: Vec<KeyPart> = key
            .parts
            .iter()
            .filter_map(|part| {
                let new = find_by_source(columns, &part.column)?;
                let length = part
                    .length
                    .filter(|&len| keeps_prefix(old.column(&part.column), &new.def, len));
                Some(KeyPart {
                    column: new.def.name.clone(),
                    length,
                })
            })
            .collect();
        if parts.is_empty() {
            debug!("Dropping key {} with no remaining columns", key.name);
            dropped.push(key.name.clone());
            continue;
        }
        keys.push(KeyDef {
            name: key.name.clone(),
            key_type: key.key_type,
            parts,
        });
    }

    for key in &request.add_keys {
        let mut key = key.clone();
        if key.key_type == KeyType::Primary {
            if keys.iter().any(|k| k.key_type == KeyType::Primary) {
                return Err(AlterError::WrongNameForIndex(PRIMARY_KEY_NAME.to_string()));
            }
            key.name = PRIMARY_KEY_NAME.to_string();
        } else if names_eq(&key.name, PRIMARY_KEY_NAME) {
            return Err(AlterError::WrongNameForIndex(key.name));
        }
        for part in &key.parts {
            if !columns.iter().any(|c| names_eq(&c.def.name, &part.column)) {
                return Err(AlterError::BadField {
                    column: part.column.clone(),
                    table: old.table.name.clone(),
                });
            }
        }
        if key.name.is_empty() {
            let base = key
                .parts
                .first()
                .map(|p| p.column.clone())
                .unwrap_or_else(|| "key".to_string());
            key.name = unused_key_name(&keys, &base);
        } else if keys.iter().any(|k| names_eq(&k.name, &key.name)) {
            return Err(AlterError::DupKeyName(key.name));
        }
        if key.key_type == KeyType::Primary {
            keys.insert(0, key);
        } else {
            keys.push(key);
        }
    }

    Ok((keys, dropped))
}

/// `base`, or `base_2`, `base_3`, ... if taken.
fn unused_key_name(keys: &[KeyDef], base: &str) -> String {
    let taken = |name: &str| keys.iter().any(|k| names_eq(&k.name, name));
    if !taken(base) && !names_eq(base, PRIMARY_KEY_NAME) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{}_{}", base, n))
        .find(|name| !taken(name))
        .unwrap_or_else(|| base.to_string())
}

fn build_foreign_keys(
    old: &TableDefinition,
    table_name: &str,
    columns: &[NewColumn],
    request: &AlterRequest,
    drops: &mut DropList<'_>,
) -> Result<(Vec<ForeignKeyDef>, Vec<String>), AlterError> {
    let mut fks = Vec::new();
    let mut dropped = Vec::new();

    for fk in &old.foreign_keys {
        if drops.take(DropKind::ForeignKey, &fk.name) {
            dropped.push(fk.name.clone());
            continue;
        }
        let mut fk = fk.clone();
        for column in fk.columns.iter_mut() {
            match find_by_source(columns, column) {
                Some(new) => *column = new.def.name.clone(),
                // Still referenced by a constraint.
                None => return Err(AlterError::CantDropFieldOrKey(column.clone())),
            }
        }
        fks.push(fk);
    }

    let prefix = format!("{}_ibfk_", table_name);
    let mut counter = fks
        .iter()
        .filter_map(|f| f.name.strip_prefix(&prefix)?.parse::<u32>().ok())
        .max()
        .unwrap_or(0);

    for fk in &request.add_foreign_keys {
        for column in &fk.columns {
            if !columns.iter().any(|c| names_eq(&c.def.name, column)) {
                return Err(AlterError::BadField {
                    column: column.clone(),
                    table: old.table.name.clone(),
                });
            }
        }
        let mut fk = fk.clone();
        if fk.name.is_empty() {
            counter += 1;
            fk.name = format!("{}{}", prefix, counter);
        }
        fks.push(fk);
    }

    Ok((fks, dropped))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alter::definition::{ColumnType, Value};
    use crate::alter::request::{AlterDefault, DropItem};

    fn table() -> TableDefinition {
        let mut def = TableDefinition::new(TableName::new("test", "t"), "MEMORY");
        def.columns = vec![
            ColumnDef::new("id", ColumnType::Integer).auto_increment(),
            ColumnDef::varchar("name", 20),
            ColumnDef::new("body", ColumnType::Text),
        ];
        def.keys = vec![
            KeyDef::primary(&["id"]),
            KeyDef {
                name: "name_idx".into(),
                key_type: KeyType::Multiple,
                parts: vec![KeyPart::prefix("name", 8)],
            },
            KeyDef::index("body_idx", &["body"]),
        ];
        def.foreign_keys = vec![ForeignKeyDef {
            name: "t_ibfk_3".into(),
            columns: vec!["name".into()],
            referenced_table: "parent".into(),
            referenced_columns: vec!["name".into()],
        }];
        def.auto_increment = 100;
        def
    }

    fn delta(request: &AlterRequest) -> TableDefinitionDelta {
        match compute_delta(&table(), request).unwrap() {
            AlterPlan::Copy(delta) => *delta,
            other => panic!("expected a copy plan, got {:?}", other),
        }
    }

    fn names(delta: &TableDefinitionDelta) -> Vec<&str> {
        delta.new_columns.iter().map(|c| c.def.name.as_str()).collect()
    }

    #[test]
    fn test_rename_and_keys_are_fast_path() {
        let request = AlterRequest {
            rename: Some(TableName::new("test", "t2")),
            keys_onoff: KeysOnOff::Disable,
            ..Default::default()
        };
        assert_eq!(
            compute_delta(&table(), &request).unwrap(),
            AlterPlan::NoCopy {
                rename: Some(TableName::new("test", "t2")),
                keys_onoff: KeysOnOff::Disable,
            }
        );

        let same_name = AlterRequest {
            rename: Some(TableName::new("TEST", "T")),
            ..Default::default()
        };
        assert!(matches!(
            compute_delta(&table(), &same_name).unwrap(),
            AlterPlan::NoCopy { rename: None, .. }
        ));
    }

    #[test]
    fn test_temporary_rename_copies() {
        let mut old = table();
        old.temporary = true;
        let request = AlterRequest {
            rename: Some(TableName::new("test", "t2")),
            ..Default::default()
        };
        assert!(matches!(
            compute_delta(&old, &request).unwrap(),
            AlterPlan::Copy(_)
        ));
    }

    #[test]
    fn test_drop_auto_increment_column() {
        let request = AlterRequest {
            drop: vec![DropItem::column("id")],
            ..Default::default()
        };
        let d = delta(&request);
        assert_eq!(names(&d), vec!["name", "body"]);
        assert_eq!(d.auto_increment, 0);
        assert_eq!(d.drop_columns, vec!["id".to_string()]);
        // The primary key had only `id`.
        assert!(d.drop_keys.contains(&"PRIMARY".to_string()));

        let explicit = AlterRequest {
            drop: vec![DropItem::column("id")],
            auto_increment: Some(7),
            ..Default::default()
        };
        assert_eq!(delta(&explicit).auto_increment, 7);
    }

    #[test]
    fn test_column_placement() {
        let request = AlterRequest {
            columns: vec![
                ColumnSpec::add(ColumnDef::new("a", ColumnType::Integer))
                    .at(ColumnPosition::First),
                ColumnSpec::add(ColumnDef::new("b", ColumnType::Integer))
                    .at(ColumnPosition::After("name".into())),
                ColumnSpec::add(ColumnDef::new("z", ColumnType::Integer)),
                ColumnSpec::change("body", ColumnDef::new("content", ColumnType::Text)),
            ],
            ..Default::default()
        };
        let d = delta(&request);
        assert_eq!(names(&d), vec!["a", "id", "name", "b", "content", "z"]);
        assert_eq!(d.new_columns[4].origin, ColumnOrigin::Changed("body".into()));
        assert_eq!(d.new_columns[0].origin, ColumnOrigin::New);
        // The key on `body` follows the rename.
        let body_idx = d.new_keys.iter().find(|k| k.name == "body_idx").unwrap();
        assert_eq!(body_idx.parts[0].column, "content");
    }

    #[test]
    fn test_positioned_change() {
        let request = AlterRequest {
            columns: vec![ColumnSpec::change("body", ColumnDef::new("body", ColumnType::Text))
                .at(ColumnPosition::First)],
            ..Default::default()
        };
        assert_eq!(names(&delta(&request)), vec!["body", "id", "name"]);
    }

    #[test]
    fn test_bad_field_references() {
        let after_missing = AlterRequest {
            columns: vec![ColumnSpec::add(ColumnDef::new("x", ColumnType::Integer))
                .at(ColumnPosition::After("nope".into()))],
            ..Default::default()
        };
        assert_eq!(
            compute_delta(&table(), &after_missing).unwrap_err(),
            AlterError::BadField {
                column: "nope".into(),
                table: "t".into()
            }
        );

        let change_missing = AlterRequest {
            columns: vec![ColumnSpec::change("ghost", ColumnDef::new("x", ColumnType::Integer))],
            ..Default::default()
        };
        assert!(matches!(
            compute_delta(&table(), &change_missing),
            Err(AlterError::BadField { column, .. }) if column == "ghost"
        ));

        let default_missing = AlterRequest {
            alter_defaults: vec![AlterDefault {
                column: "ghost".into(),
                default: None,
            }],
            ..Default::default()
        };
        assert!(matches!(
            compute_delta(&table(), &default_missing),
            Err(AlterError::BadField { .. })
        ));
    }

    #[test]
    fn test_cannot_remove_all_fields() {
        let request = AlterRequest {
            drop: vec![
                DropItem::column("id"),
                DropItem::column("name"),
                DropItem::column("body"),
            ],
            ..Default::default()
        };
        assert_eq!(
            compute_delta(&table(), &request).unwrap_err(),
            AlterError::CantRemoveAllFields
        );
    }

    #[test]
    fn test_unknown_drop_fails() {
        let request = AlterRequest {
            drop: vec![DropItem::key("no_such_key")],
            ..Default::default()
        };
        assert_eq!(
            compute_delta(&table(), &request).unwrap_err(),
            AlterError::CantDropFieldOrKey("no_such_key".into())
        );
    }

    #[test]
    fn test_key_prefix_reset() {
        // New column shorter than the prefix.
        let request = AlterRequest {
            columns: vec![ColumnSpec::change("name", ColumnDef::varchar("name", 5))],
            ..Default::default()
        };
        let d = delta(&request);
        assert_eq!(d.new_keys[1].parts[0].length, None);

        // Still fits.
        let wider = AlterRequest {
            columns: vec![ColumnSpec::change("name", ColumnDef::varchar("name", 50))],
            ..Default::default()
        };
        assert_eq!(delta(&wider).new_keys[1].parts[0].length, Some(8));

        // Type can no longer take a prefix.
        let to_int = AlterRequest {
            columns: vec![ColumnSpec::change("name", ColumnDef::new("name", ColumnType::Integer))],
            ..Default::default()
        };
        assert_eq!(delta(&to_int).new_keys[1].parts[0].length, None);
    }

    #[test]
    fn test_new_key_validation() {
        let named_primary = AlterRequest {
            add_keys: vec![KeyDef::index("primary", &["name"])],
            ..Default::default()
        };
        assert_eq!(
            compute_delta(&table(), &named_primary).unwrap_err(),
            AlterError::WrongNameForIndex("primary".into())
        );

        let second_primary = AlterRequest {
            add_keys: vec![KeyDef::primary(&["name"])],
            ..Default::default()
        };
        assert!(matches!(
            compute_delta(&table(), &second_primary),
            Err(AlterError::WrongNameForIndex(_))
        ));

        let unnamed = AlterRequest {
            add_keys: vec![KeyDef::index("", &["name"]), KeyDef::index("", &["name"])],
            ..Default::default()
        };
        let d = delta(&unnamed);
        let key_names: Vec<_> = d.new_keys.iter().map(|k| k.name.as_str()).collect();
        assert_eq!(key_names, vec!["PRIMARY", "name_idx", "body_idx", "name", "name_2"]);
    }

    #[test]
    fn test_foreign_keys() {
        let request = AlterRequest {
            add_foreign_keys: vec![ForeignKeyDef {
                name: String::new(),
                columns: vec!["id".into()],
                referenced_table: "other".into(),
                referenced_columns: vec!["id".into()],
            }],
            ..Default::default()
        };
        let d = delta(&request);
        assert_eq!(d.foreign_keys[1].name, "t_ibfk_4");

        let drop = AlterRequest {
            drop: vec![DropItem::foreign_key("t_ibfk_3")],
            ..Default::default()
        };
        let d = delta(&drop);
        assert!(d.foreign_keys.is_empty());
        assert_eq!(d.drop_foreign_keys, vec!["t_ibfk_3".to_string()]);

        // `name` is still used by t_ibfk_3.
        let referenced = AlterRequest {
            drop: vec![DropItem::column("name")],
            ..Default::default()
        };
        assert_eq!(
            compute_delta(&table(), &referenced).unwrap_err(),
            AlterError::CantDropFieldOrKey("name".into())
        );
    }

    #[test]
    fn test_alter_default() {
        let set = AlterRequest {
            alter_defaults: vec![AlterDefault {
                column: "name".into(),
                default: Some(Value::Text("anon".into())),
            }],
            ..Default::default()
        };
        let d = delta(&set);
        assert_eq!(d.new_columns[1].def.default, Some(Value::Text("anon".into())));

        let blob = AlterRequest {
            alter_defaults: vec![AlterDefault {
                column: "body".into(),
                default: Some(Value::Text("x".into())),
            }],
            ..Default::default()
        };
        assert_eq!(
            compute_delta(&table(), &blob).unwrap_err(),
            AlterError::InvalidDefault("body".into())
        );
    }

    #[test]
    fn test_error_if_not_empty() {
        let request = AlterRequest {
            columns: vec![
                ColumnSpec::add(ColumnDef::new("ok", ColumnType::Date)),
                ColumnSpec::add(ColumnDef::new("born", ColumnType::Date).not_null()),
            ],
            ..Default::default()
        };
        assert_eq!(delta(&request).error_if_not_empty.as_deref(), Some("born"));
    }

    #[test]
    fn test_tablespace_and_online() {
        let discard = AlterRequest {
            tablespace: Some(TablespaceOp::Discard),
            ..Default::default()
        };
        assert_eq!(
            compute_delta(&table(), &discard).unwrap(),
            AlterPlan::Tablespace(TablespaceOp::Discard)
        );

        let mixed = AlterRequest {
            tablespace: Some(TablespaceOp::Import),
            rename: Some(TableName::new("test", "x")),
            ..Default::default()
        };
        assert!(matches!(
            compute_delta(&table(), &mixed),
            Err(AlterError::NotSupportedYet(_))
        ));

        let online = AlterRequest {
            build_method: BuildMethod::Online,
            drop: vec![DropItem::key("body_idx")],
            ..Default::default()
        };
        assert!(matches!(
            compute_delta(&table(), &online),
            Err(AlterError::NotSupportedYet(_))
        ));
    }

    #[test]
    fn test_duplicate_column() {
        let request = AlterRequest {
            columns: vec![ColumnSpec::add(ColumnDef::new("NAME", ColumnType::Integer))],
            ..Default::default()
        };
        assert_eq!(
            compute_delta(&table(), &request).unwrap_err(),
            AlterError::DupFieldName("NAME".into())
        );
    }
}
