//! Table, column, key and foreign key definitions.
//!
//! These are plain data: they serialize to and from JSON with serde so a
//! caller can keep a table's definition next to its data, and render to
//! `CREATE TABLE` DDL for display.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the primary key. Reserved: no other key may use it.
pub const PRIMARY_KEY_NAME: &str = "PRIMARY";

/// Case-insensitive identifier comparison.
pub fn names_eq(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// A schema-qualified table name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableName {
    pub schema: String,
    pub name: String,
}

impl TableName {
    pub fn new(schema: impl Into<String>, name: impl Into<String>) -> Self {
        TableName {
            schema: schema.into(),
            name: name.into(),
        }
    }

    /// Same schema, different table.
    pub fn with_name(&self, name: impl Into<String>) -> Self {
        TableName::new(self.schema.clone(), name)
    }

    /// Lower-cased `schema.name`, used as a lookup key.
    pub fn key(&self) -> String {
        format!("{}.{}", self.schema, self.name).to_lowercase()
    }

    pub fn same_as(&self, other: &TableName) -> bool {
        names_eq(&self.schema, &other.schema) && names_eq(&self.name, &other.name)
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Column types understood by the copy engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Integer,
    BigInt,
    Varchar,
    Blob,
    Text,
    Date,
    Datetime,
    Timestamp,
}

impl ColumnType {
    /// BLOB and TEXT: no defaults, stored out of row.
    pub fn is_blob(self) -> bool {
        matches!(self, ColumnType::Blob | ColumnType::Text)
    }

    /// Whether an index may cover only a prefix of the value.
    pub fn can_have_key_part(self) -> bool {
        matches!(self, ColumnType::Varchar | ColumnType::Blob | ColumnType::Text)
    }

    pub fn is_integer(self) -> bool {
        matches!(self, ColumnType::Integer | ColumnType::BigInt)
    }

    pub fn sql_name(self) -> &'static str {
        match self {
            ColumnType::Integer => "int",
            ColumnType::BigInt => "bigint",
            ColumnType::Varchar => "varchar",
            ColumnType::Blob => "blob",
            ColumnType::Text => "text",
            ColumnType::Date => "date",
            ColumnType::Datetime => "datetime",
            ColumnType::Timestamp => "timestamp",
        }
    }
}

/// A stored value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Int(i64),
    Text(String),
    Bytes(Vec<u8>),
}

/// One row, in column order.
pub type Row = Vec<Value>;

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Convert to `column`'s type. The flag is set when data was lost on
    /// the way (unparsable number, string longer than the column).
    pub fn coerce(&self, column: &ColumnDef) -> (Value, bool) {
        if self.is_null() {
            return (Value::Null, false);
        }
        match column.column_type {
            ColumnType::Integer | ColumnType::BigInt => match self {
                Value::Int(i) => (Value::Int(*i), false),
                other => match other.to_string().trim().parse::<i64>() {
                    Ok(i) => (Value::Int(i), false),
                    Err(_) => (Value::Int(0), true),
                },
            },
            ColumnType::Blob => match self {
                Value::Bytes(b) => (Value::Bytes(b.clone()), false),
                other => (Value::Bytes(other.to_string().into_bytes()), false),
            },
            ColumnType::Varchar => {
                let s = self.to_string();
                let limit = column.length as usize;
                if s.chars().count() > limit {
                    (Value::Text(s.chars().take(limit).collect()), true)
                } else {
                    (Value::Text(s), false)
                }
            }
            _ => (Value::Text(self.to_string()), false),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Int(i) => write!(f, "{}", i),
            Value::Text(s) => write!(f, "{}", s),
            Value::Bytes(b) => write!(f, "{}", String::from_utf8_lossy(b)),
        }
    }
}

fn is_false(v: &bool) -> bool {
    !v
}

/// Column definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
    /// Declared length in characters (VARCHAR), zero when not applicable.
    #[serde(default)]
    pub length: u32,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    /// `None` means the column has no default value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub auto_increment: bool,
}

fn default_nullable() -> bool {
    true
}

impl ColumnDef {
    /// A nullable column with no default.
    pub fn new(name: impl Into<String>, column_type: ColumnType) -> Self {
        ColumnDef {
            name: name.into(),
            column_type,
            length: 0,
            nullable: true,
            default: None,
            auto_increment: false,
        }
    }

    pub fn varchar(name: impl Into<String>, length: u32) -> Self {
        ColumnDef {
            length,
            ..ColumnDef::new(name, ColumnType::Varchar)
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn auto_increment(mut self) -> Self {
        self.auto_increment = true;
        self.nullable = false;
        self
    }

    /// Rows added before this column existed need a value the column
    /// cannot supply.
    pub fn needs_value(&self) -> bool {
        !self.nullable && self.default.is_none() && !self.auto_increment
    }

    fn sql_type(&self) -> String {
        match self.column_type {
            ColumnType::Varchar => format!("varchar({})", self.length),
            t => t.sql_name().to_string(),
        }
    }
}

/// Key kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyType {
    Primary,
    Unique,
    Multiple,
}

impl KeyType {
    /// Primary and unique keys reject duplicates.
    pub fn is_unique(self) -> bool {
        !matches!(self, KeyType::Multiple)
    }
}

/// One column of a key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyPart {
    pub column: String,
    /// Prefix length; `None` covers the whole column.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub length: Option<u32>,
}

impl KeyPart {
    pub fn new(column: impl Into<String>) -> Self {
        KeyPart {
            column: column.into(),
            length: None,
        }
    }

    pub fn prefix(column: impl Into<String>, length: u32) -> Self {
        KeyPart {
            column: column.into(),
            length: Some(length),
        }
    }
}

/// Index definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyDef {
    /// Empty for an unnamed key; one is picked when the key is added.
    #[serde(default)]
    pub name: String,
    pub key_type: KeyType,
    pub parts: Vec<KeyPart>,
}

impl KeyDef {
    pub fn primary(columns: &[&str]) -> Self {
        KeyDef {
            name: PRIMARY_KEY_NAME.to_string(),
            key_type: KeyType::Primary,
            parts: columns.iter().map(|c| KeyPart::new(*c)).collect(),
        }
    }

    pub fn unique(name: impl Into<String>, columns: &[&str]) -> Self {
        KeyDef {
            name: name.into(),
            key_type: KeyType::Unique,
            parts: columns.iter().map(|c| KeyPart::new(*c)).collect(),
        }
    }

    pub fn index(name: impl Into<String>, columns: &[&str]) -> Self {
        KeyDef {
            name: name.into(),
            key_type: KeyType::Multiple,
            parts: columns.iter().map(|c| KeyPart::new(*c)).collect(),
        }
    }
}

/// Foreign key constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyDef {
    /// Empty for an unnamed constraint.
    #[serde(default)]
    pub name: String,
    pub columns: Vec<String>,
    pub referenced_table: String,
    pub referenced_columns: Vec<String>,
}

/// A table's persisted definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDefinition {
    pub table: TableName,
    pub engine: String,
    /// Session-private table.
    #[serde(default, skip_serializing_if = "is_false")]
    pub temporary: bool,
    pub columns: Vec<ColumnDef>,
    #[serde(default)]
    pub keys: Vec<KeyDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub foreign_keys: Vec<ForeignKeyDef>,
    /// Next AUTO_INCREMENT value; zero lets the engine pick.
    #[serde(default)]
    pub auto_increment: u64,
}

impl TableDefinition {
    pub fn new(table: TableName, engine: impl Into<String>) -> Self {
        TableDefinition {
            table,
            engine: engine.into(),
            temporary: false,
            columns: Vec::new(),
            keys: Vec::new(),
            foreign_keys: Vec::new(),
            auto_increment: 0,
        }
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| names_eq(&c.name, name))
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.column_index(name).map(|i| &self.columns[i])
    }

    pub fn key(&self, name: &str) -> Option<&KeyDef> {
        self.keys.iter().find(|k| names_eq(&k.name, name))
    }

    pub fn primary_key(&self) -> Option<&KeyDef> {
        self.keys.iter().find(|k| k.key_type == KeyType::Primary)
    }

    /// Render as `CREATE TABLE` DDL.
    pub fn to_ddl(&self) -> String {
        let kind = if self.temporary { "TEMPORARY TABLE" } else { "TABLE" };
        let mut ddl = format!("CREATE {} `{}` (\n", kind, self.table.name);
        let mut parts: Vec<String> = Vec::new();

        for col in &self.columns {
            parts.push(format_column_ddl(col));
        }
        for key in &self.keys {
            parts.push(format_key_ddl(key));
        }
        for fk in &self.foreign_keys {
            parts.push(format_fk_ddl(fk));
        }

        ddl.push_str(&parts.join(",\n"));
        ddl.push_str("\n)");
        ddl.push_str(&format!(" ENGINE={}", self.engine));
        if self.auto_increment > 0 {
            ddl.push_str(&format!(" AUTO_INCREMENT={}", self.auto_increment));
        }
        ddl.push(';');
        ddl
    }
}

fn quote_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::Int(i) => i.to_string(),
        other => format!("'{}'", other.to_string().replace('\'', "''")),
    }
}

fn format_column_ddl(col: &ColumnDef) -> String {
    let mut parts = vec![format!("  `{}` {}", col.name, col.sql_type())];
    if !col.nullable {
        parts.push("NOT NULL".to_string());
    }
    if let Some(ref default) = col.default {
        parts.push(format!("DEFAULT {}", quote_value(default)));
    }
    if col.auto_increment {
        parts.push("AUTO_INCREMENT".to_string());
    }
    parts.join(" ")
}

fn format_key_ddl(key: &KeyDef) -> String {
    let cols = key
        .parts
        .iter()
        .map(|p| match p.length {
            Some(len) => format!("`{}`({})", p.column, len),
            None => format!("`{}`", p.column),
        })
        .collect::<Vec<_>>()
        .join(", ");
    match key.key_type {
        KeyType::Primary => format!("  PRIMARY KEY ({})", cols),
        KeyType::Unique => format!("  UNIQUE KEY `{}` ({})", key.name, cols),
        KeyType::Multiple => format!("  KEY `{}` ({})", key.name, cols),
    }
}

fn format_fk_ddl(fk: &ForeignKeyDef) -> String {
    let quote = |cols: &[String]| {
        cols.iter()
            .map(|c| format!("`{}`", c))
            .collect::<Vec<_>>()
            .join(", ")
    };
    format!(
        "  CONSTRAINT `{}` FOREIGN KEY ({}) REFERENCES `{}` ({})",
        fk.name,
        quote(&fk.columns),
        fk.referenced_table,
        quote(&fk.referenced_columns)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TableDefinition {
        let mut def = TableDefinition::new(TableName::new("test", "users"), "MEMORY");
        def.columns.push(ColumnDef::new("id", ColumnType::Integer).auto_increment());
        def.columns.push(ColumnDef::varchar("name", 10).with_default(Value::Text("x".into())));
        def.keys.push(KeyDef::primary(&["id"]));
        def.keys.push(KeyDef {
            name: "name_idx".into(),
            key_type: KeyType::Multiple,
            parts: vec![KeyPart::prefix("name", 4)],
        });
        def
    }

    #[test]
    fn test_to_ddl() {
        let ddl = sample().to_ddl();
        assert!(ddl.starts_with("CREATE TABLE `users` (\n"));
        assert!(ddl.contains("  `id` int NOT NULL AUTO_INCREMENT"));
        assert!(ddl.contains("  `name` varchar(10) DEFAULT 'x'"));
        assert!(ddl.contains("  PRIMARY KEY (`id`)"));
        assert!(ddl.contains("  KEY `name_idx` (`name`(4))"));
        assert!(ddl.ends_with(") ENGINE=MEMORY;"));
    }

    #[test]
    fn test_json_round_trip_and_defaults() {
        let def = sample();
        let json = serde_json::to_string(&def).unwrap();
        let back: TableDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(back, def);

        let col: ColumnDef =
            serde_json::from_str(r#"{"name":"c","column_type":"text"}"#).unwrap();
        assert!(col.nullable);
        assert!(col.default.is_none());
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let def = sample();
        assert_eq!(def.column_index("NAME"), Some(1));
        assert!(def.key("Name_Idx").is_some());
        assert!(TableName::new("Test", "USERS").same_as(&def.table));
    }

    #[test]
    fn test_coerce() {
        let int_col = ColumnDef::new("n", ColumnType::Integer);
        assert_eq!(Value::Text("42".into()).coerce(&int_col), (Value::Int(42), false));
        assert_eq!(Value::Text("abc".into()).coerce(&int_col), (Value::Int(0), true));

        let short = ColumnDef::varchar("s", 3);
        assert_eq!(Value::Int(12345).coerce(&short), (Value::Text("123".into()), true));
        assert_eq!(Value::Null.coerce(&short), (Value::Null, false));
    }
}
