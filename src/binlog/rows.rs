//! Table-map and row events.
//!
//! Row events refer to tables by a numeric id that a preceding Table_map
//! event assigns. The [`TableMapRegistry`] keeps that mapping for the
//! lifetime of one stream; a rows event for an id that was never mapped is
//! undecodable.
//!
//! Row images are kept as raw bytes. The dumper prints these events in
//! base64 form only, so the column values are never interpreted.

use serde::Serialize;
use std::collections::HashMap;

use crate::binlog::constants::STMT_END_F;
use crate::binlog::events::{fit_post_header, lossy, FieldReader};
use crate::RplError;

/// Post-header length that means "4-byte table id" (pre-5.1.4 layout).
const SHORT_TABLE_ID_POST_HEADER_LEN: usize = 6;

/// Read a packed (length-encoded) integer.
///
/// | First byte | Value |
/// |------------|-------|
/// | 0..=250 | the byte itself |
/// | 251 | NULL (rejected here) |
/// | 252 | next 2 bytes |
/// | 253 | next 3 bytes |
/// | 254 | next 8 bytes |
pub(crate) fn read_packed(r: &mut FieldReader<'_>) -> Result<u64, RplError> {
    match r.u8()? {
        n @ 0..=250 => Ok(u64::from(n)),
        252 => r.uint(2),
        253 => r.uint(3),
        254 => r.uint(8),
        _ => Err(r.truncated()),
    }
}

/// Append a packed integer.
pub(crate) fn write_packed(out: &mut Vec<u8>, v: u64) {
    if v < 251 {
        out.push(v as u8);
    } else if v < 1 << 16 {
        out.push(252);
        out.extend_from_slice(&(v as u16).to_le_bytes());
    } else if v < 1 << 24 {
        out.push(253);
        out.extend_from_slice(&(v as u32).to_le_bytes()[..3]);
    } else {
        out.push(254);
        out.extend_from_slice(&v.to_le_bytes());
    }
}

fn bitmap_len(width: u64) -> usize {
    ((width + 7) / 8) as usize
}

/// Table id and flags shared by Table_map and rows post-headers.
fn parse_table_post_header(post: &[u8], what: &'static str) -> Result<(u64, u16), RplError> {
    let mut r = FieldReader::new(post, what);
    if post.len() == SHORT_TABLE_ID_POST_HEADER_LEN {
        Ok((u64::from(r.u32()?), r.u16()?))
    } else {
        Ok((r.uint(6)?, r.u16()?))
    }
}

fn write_table_post_header(out: &mut Vec<u8>, table_id: u64, flags: u16, post_len: usize) {
    let start = out.len();
    if post_len == SHORT_TABLE_ID_POST_HEADER_LEN {
        out.extend_from_slice(&(table_id as u32).to_le_bytes());
    } else {
        out.extend_from_slice(&table_id.to_le_bytes()[..6]);
    }
    out.extend_from_slice(&flags.to_le_bytes());
    fit_post_header(out, start, post_len);
}

/// Table id to table name and column layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableMapEvent {
    pub table_id: u64,
    pub flags: u16,
    pub db: String,
    pub table: String,
    pub column_types: Vec<u8>,
    pub metadata: Vec<u8>,
    pub null_bits: Vec<u8>,
}

impl TableMapEvent {
    pub(crate) fn parse(post: &[u8], data: &[u8]) -> Result<Self, RplError> {
        let (table_id, flags) = parse_table_post_header(post, "Table_map")?;
        let mut d = FieldReader::new(data, "Table_map");
        let db_len = d.u8()? as usize;
        let db = lossy(d.bytes(db_len)?);
        d.skip(1)?;
        let tbl_len = d.u8()? as usize;
        let table = lossy(d.bytes(tbl_len)?);
        d.skip(1)?;
        let column_count = read_packed(&mut d)?;
        let column_types = d.bytes(column_count as usize)?.to_vec();
        let (metadata, null_bits) = if d.remaining() > 0 {
            let meta_len = read_packed(&mut d)? as usize;
            let metadata = d.bytes(meta_len)?.to_vec();
            let null_bits = d.bytes(bitmap_len(column_count))?.to_vec();
            (metadata, null_bits)
        } else {
            (Vec::new(), Vec::new())
        };
        Ok(TableMapEvent {
            table_id,
            flags,
            db,
            table,
            column_types,
            metadata,
            null_bits,
        })
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>, post_len: usize) {
        write_table_post_header(out, self.table_id, self.flags, post_len);
        for name in [&self.db, &self.table] {
            let b = name.as_bytes();
            let n = b.len().min(u8::MAX as usize);
            out.push(n as u8);
            out.extend_from_slice(&b[..n]);
            out.push(0);
        }
        write_packed(out, self.column_types.len() as u64);
        out.extend_from_slice(&self.column_types);
        if !self.metadata.is_empty() || !self.null_bits.is_empty() {
            write_packed(out, self.metadata.len() as u64);
            out.extend_from_slice(&self.metadata);
            out.extend_from_slice(&self.null_bits);
        }
    }

    pub fn column_count(&self) -> usize {
        self.column_types.len()
    }
}

/// Write, Update or Delete rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowsEvent {
    pub table_id: u64,
    pub flags: u16,
    /// Number of columns in the table.
    pub width: u64,
    pub columns_present: Vec<u8>,
    /// After-image columns (Update_rows only).
    pub columns_after: Option<Vec<u8>>,
    pub rows: Vec<u8>,
}

impl RowsEvent {
    pub(crate) fn parse(
        post: &[u8],
        data: &[u8],
        has_after_image: bool,
        registry: &TableMapRegistry,
        what: &'static str,
    ) -> Result<Self, RplError> {
        let (table_id, flags) = parse_table_post_header(post, what)?;
        if registry.get(table_id).is_none() {
            return Err(RplError::Parse(format!(
                "{} event refers to table id {} with no preceding Table_map event",
                what, table_id
            )));
        }
        let mut d = FieldReader::new(data, what);
        let width = read_packed(&mut d)?;
        let columns_present = d.bytes(bitmap_len(width))?.to_vec();
        let columns_after = if has_after_image {
            Some(d.bytes(bitmap_len(width))?.to_vec())
        } else {
            None
        };
        Ok(RowsEvent {
            table_id,
            flags,
            width,
            columns_present,
            columns_after,
            rows: d.rest().to_vec(),
        })
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>, post_len: usize) {
        write_table_post_header(out, self.table_id, self.flags, post_len);
        write_packed(out, self.width);
        out.extend_from_slice(&self.columns_present);
        if let Some(after) = &self.columns_after {
            out.extend_from_slice(after);
        }
        out.extend_from_slice(&self.rows);
    }

    /// Last rows event of a statement.
    pub fn is_statement_end(&self) -> bool {
        self.flags & STMT_END_F != 0
    }
}

/// Table ids seen so far in one stream.
#[derive(Debug, Default, Clone)]
pub struct TableMapRegistry {
    tables: HashMap<u64, TableMapEvent>,
}

impl TableMapRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or re-register) a mapping.
    pub fn insert(&mut self, map: TableMapEvent) {
        self.tables.insert(map.table_id, map);
    }

    pub fn get(&self, table_id: u64) -> Option<&TableMapEvent> {
        self.tables.get(&table_id)
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn clear(&mut self) {
        self.tables.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binlog::constants::TABLE_MAP_HEADER_LEN;

    fn sample_map() -> TableMapEvent {
        TableMapEvent {
            table_id: 0x0102_0304_0506,
            flags: 1,
            db: "test".into(),
            table: "t1".into(),
            column_types: vec![3, 15, 252],
            metadata: vec![0x40, 0, 2],
            null_bits: vec![0b110],
        }
    }

    #[test]
    fn test_packed_boundaries() {
        for v in [0u64, 250, 251, 0xffff, 0x1_0000, 0xff_ffff, 0x100_0000, u64::MAX] {
            let mut out = Vec::new();
            write_packed(&mut out, v);
            let mut r = FieldReader::new(&out, "Test");
            assert_eq!(read_packed(&mut r).unwrap(), v);
            assert_eq!(r.remaining(), 0);
        }
        let mut r = FieldReader::new(&[251], "Test");
        assert!(read_packed(&mut r).is_err());
    }

    #[test]
    fn test_table_map_with_metadata() {
        let map = sample_map();
        let mut out = Vec::new();
        map.write(&mut out, TABLE_MAP_HEADER_LEN);
        let (post, data) = out.split_at(TABLE_MAP_HEADER_LEN);
        assert_eq!(TableMapEvent::parse(post, data).unwrap(), map);
    }

    #[test]
    fn test_table_map_short_id() {
        let mut map = sample_map();
        map.table_id = 77;
        map.metadata.clear();
        map.null_bits.clear();
        let mut out = Vec::new();
        map.write(&mut out, 6);
        let (post, data) = out.split_at(6);
        let parsed = TableMapEvent::parse(post, data).unwrap();
        assert_eq!(parsed.table_id, 77);
        assert!(parsed.metadata.is_empty());
    }

    #[test]
    fn test_rows_need_table_map() {
        let rows = RowsEvent {
            table_id: 9,
            flags: STMT_END_F,
            width: 3,
            columns_present: vec![0b111],
            columns_after: Some(vec![0b101]),
            rows: vec![1, 2, 3, 4],
        };
        let mut out = Vec::new();
        rows.write(&mut out, 8);
        let (post, data) = out.split_at(8);

        let mut registry = TableMapRegistry::new();
        assert!(RowsEvent::parse(post, data, true, &registry, "Update_rows").is_err());

        let mut map = sample_map();
        map.table_id = 9;
        registry.insert(map);
        let parsed = RowsEvent::parse(post, data, true, &registry, "Update_rows").unwrap();
        assert_eq!(parsed, rows);
        assert!(parsed.is_statement_end());
    }
}
