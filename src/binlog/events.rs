//! Typed event bodies.
//!
//! Each body type knows how to parse itself from the post-header and data
//! section of an event and how to write itself back. The common header and
//! the checksum are handled by [`codec`](crate::binlog::codec).
//!
//! Strings taken from events (database names, file names) are decoded
//! lossily as UTF-8. Statement text is kept as raw bytes because it can carry
//! binary literals.

use serde::Serialize;

use crate::binlog::constants::*;
use crate::binlog::event_type::EventType;
use crate::binlog::header::EventHeader;
use crate::binlog::rows::{RowsEvent, TableMapEvent};
use crate::RplError;

/// Longest file name a Rotate event may carry.
pub const MAX_LOG_IDENT_LEN: usize = 511;

/// A decoded event: common header plus typed body.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEvent {
    pub header: EventHeader,
    pub body: EventBody,
}

impl LogEvent {
    /// Event type from the header, `Unknown` for unrecognised codes.
    pub fn event_type(&self) -> EventType {
        self.header.event_type().unwrap_or(EventType::Unknown)
    }
}

/// Closed set of event bodies this crate decodes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum EventBody {
    StartV3(StartV3Event),
    Stop,
    Query(QueryEvent),
    Rotate(RotateEvent),
    /// LOAD_EVENT and NEW_LOAD_EVENT.
    Load(LoadEvent),
    CreateFile(CreateFileEvent),
    AppendBlock(AppendBlockEvent),
    ExecLoad(FileIdEvent),
    DeleteFile(FileIdEvent),
    BeginLoadQuery(AppendBlockEvent),
    ExecuteLoadQuery(ExecuteLoadQueryEvent),
    FormatDescription(crate::binlog::format::FormatDescription),
    Xid(XidEvent),
    TableMap(TableMapEvent),
    WriteRows(RowsEvent),
    UpdateRows(RowsEvent),
    DeleteRows(RowsEvent),
    Incident(IncidentEvent),
    /// Any type without a decoder; holds the bytes after the common header.
    Unknown(Vec<u8>),
}

/// Bounds-checked little-endian cursor over an event section.
pub(crate) struct FieldReader<'a> {
    buf: &'a [u8],
    pos: usize,
    what: &'static str,
}

impl<'a> FieldReader<'a> {
    pub(crate) fn new(buf: &'a [u8], what: &'static str) -> Self {
        FieldReader { buf, pos: 0, what }
    }

    pub(crate) fn truncated(&self) -> RplError {
        RplError::Parse(format!("{} event is truncated", self.what))
    }

    pub(crate) fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub(crate) fn bytes(&mut self, n: usize) -> Result<&'a [u8], RplError> {
        if self.remaining() < n {
            return Err(self.truncated());
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub(crate) fn u8(&mut self) -> Result<u8, RplError> {
        Ok(self.bytes(1)?[0])
    }

    pub(crate) fn u16(&mut self) -> Result<u16, RplError> {
        self.bytes(2).map(|b| u16::from_le_bytes([b[0], b[1]]))
    }

    pub(crate) fn u32(&mut self) -> Result<u32, RplError> {
        self.bytes(4).map(|b| u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub(crate) fn uint(&mut self, n: usize) -> Result<u64, RplError> {
        Ok(self
            .bytes(n)?
            .iter()
            .rev()
            .fold(0u64, |acc, &b| (acc << 8) | u64::from(b)))
    }

    pub(crate) fn skip(&mut self, n: usize) -> Result<(), RplError> {
        self.bytes(n).map(|_| ())
    }

    /// Bytes up to the next NUL (or the end); the NUL is consumed.
    pub(crate) fn cstr(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        match rest.iter().position(|&b| b == 0) {
            Some(n) => {
                self.pos += n + 1;
                &rest[..n]
            }
            None => {
                self.pos = self.buf.len();
                rest
            }
        }
    }

    pub(crate) fn rest(&mut self) -> &'a [u8] {
        let rest = &self.buf[self.pos..];
        self.pos = self.buf.len();
        rest
    }
}

pub(crate) fn lossy(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

/// Pad or cut the post-header that starts at `start` to exactly `post_len`.
pub(crate) fn fit_post_header(out: &mut Vec<u8>, start: usize, post_len: usize) {
    out.resize(start + post_len, 0);
}

// ── Start_v3 ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StartV3Event {
    pub binlog_version: u16,
    pub server_version: String,
    pub created: u32,
}

impl StartV3Event {
    pub(crate) fn parse(post: &[u8]) -> Result<Self, RplError> {
        let mut r = FieldReader::new(post, "Start_v3");
        let binlog_version = r.u16()?;
        let ver = r.bytes(ST_SERVER_VER_LEN)?;
        let end = ver.iter().position(|&b| b == 0).unwrap_or(ver.len());
        Ok(StartV3Event {
            binlog_version,
            server_version: lossy(&ver[..end]),
            created: r.u32()?,
        })
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>, post_len: usize) {
        let start = out.len();
        out.extend_from_slice(&self.binlog_version.to_le_bytes());
        let mut ver = [0u8; ST_SERVER_VER_LEN];
        let n = self.server_version.len().min(ST_SERVER_VER_LEN - 1);
        ver[..n].copy_from_slice(&self.server_version.as_bytes()[..n]);
        out.extend_from_slice(&ver);
        out.extend_from_slice(&self.created.to_le_bytes());
        fit_post_header(out, start, post_len);
    }
}

// ── Query ──────────────────────────────────────────────────────────

/// A statement, with the session context it ran in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryEvent {
    pub thread_id: u32,
    pub exec_time: u32,
    pub error_code: u16,
    pub db: String,
    pub query: Vec<u8>,
    /// Raw status-variable block, kept for re-encoding.
    pub status_vars: Vec<u8>,
    pub flags2: Option<u32>,
    pub lc_time_names: Option<u16>,
    pub charset_database: Option<u16>,
}

impl QueryEvent {
    /// A plain statement with no status variables.
    pub fn new(db: &str, query: &[u8]) -> Self {
        QueryEvent {
            thread_id: 0,
            exec_time: 0,
            error_code: 0,
            db: db.to_string(),
            query: query.to_vec(),
            status_vars: Vec::new(),
            flags2: None,
            lc_time_names: None,
            charset_database: None,
        }
    }

    /// Parse a Query (or Execute_load_query) post-header and data section.
    ///
    /// The status-variable length is present only when the post-header is
    /// at least 13 bytes long.
    pub(crate) fn parse(post: &[u8], data: &[u8], what: &'static str) -> Result<Self, RplError> {
        let mut p = FieldReader::new(post, what);
        let thread_id = p.u32()?;
        let exec_time = p.u32()?;
        let db_len = p.u8()? as usize;
        let error_code = p.u16()?;
        let status_vars_len = if post.len() >= QUERY_HEADER_LEN {
            p.u16()? as usize
        } else {
            0
        };
        if status_vars_len > data.len().min(MAX_SIZE_LOG_EVENT_STATUS) {
            return Err(RplError::Parse(format!(
                "{} event has an invalid status variable length {}",
                what, status_vars_len
            )));
        }

        let mut d = FieldReader::new(data, what);
        let status_vars = d.bytes(status_vars_len)?.to_vec();
        let db = lossy(d.bytes(db_len)?);
        d.skip(1)?;
        let query = d.rest().to_vec();

        let mut ev = QueryEvent {
            thread_id,
            exec_time,
            error_code,
            db,
            query,
            status_vars,
            flags2: None,
            lc_time_names: None,
            charset_database: None,
        };
        ev.parse_status_vars()?;
        Ok(ev)
    }

    /// Unknown status codes end the walk; whatever follows is kept raw.
    fn parse_status_vars(&mut self) -> Result<(), RplError> {
        let vars = self.status_vars.clone();
        let mut r = FieldReader::new(&vars, "Query");
        while r.remaining() > 0 {
            match r.u8()? {
                Q_FLAGS2_CODE => self.flags2 = Some(r.u32()?),
                Q_LC_TIME_NAMES_CODE => self.lc_time_names = Some(r.u16()?),
                Q_CHARSET_DATABASE_CODE => self.charset_database = Some(r.u16()?),
                _ => break,
            }
        }
        Ok(())
    }

    pub(crate) fn write_post_header(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.thread_id.to_le_bytes());
        out.extend_from_slice(&self.exec_time.to_le_bytes());
        out.push(self.db.len().min(u8::MAX as usize) as u8);
        out.extend_from_slice(&self.error_code.to_le_bytes());
        out.extend_from_slice(&(self.status_vars.len() as u16).to_le_bytes());
    }

    pub(crate) fn write_data(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.status_vars);
        let db = self.db.as_bytes();
        out.extend_from_slice(&db[..db.len().min(u8::MAX as usize)]);
        out.push(0);
        out.extend_from_slice(&self.query);
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>, post_len: usize) {
        let start = out.len();
        self.write_post_header(out);
        fit_post_header(out, start, post_len);
        self.write_data(out);
    }
}

// ── Execute_load_query ─────────────────────────────────────────────

/// How LOAD DATA treats rows that collide with existing keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DupHandling {
    Error,
    Ignore,
    Replace,
}

impl DupHandling {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(DupHandling::Error),
            1 => Some(DupHandling::Ignore),
            2 => Some(DupHandling::Replace),
            _ => None,
        }
    }

    pub fn code(self) -> u8 {
        match self {
            DupHandling::Error => 0,
            DupHandling::Ignore => 1,
            DupHandling::Replace => 2,
        }
    }
}

/// A LOAD DATA statement whose data arrived in Begin_load_query and
/// Append_block events. `query[fn_pos_start..fn_pos_end]` is the part that
/// names the file and gets rewritten on output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecuteLoadQueryEvent {
    pub query: QueryEvent,
    pub file_id: u32,
    pub fn_pos_start: u32,
    pub fn_pos_end: u32,
    pub dup_handling: DupHandling,
}

impl ExecuteLoadQueryEvent {
    pub(crate) fn parse(post: &[u8], data: &[u8]) -> Result<Self, RplError> {
        if post.len() < EXECUTE_LOAD_QUERY_HEADER_LEN {
            return Err(RplError::Parse(
                "Execute_load_query event is truncated".to_string(),
            ));
        }
        let query = QueryEvent::parse(post, data, "Execute_load_query")?;
        let mut r = FieldReader::new(&post[ELQ_FILE_ID_OFFSET..], "Execute_load_query");
        let file_id = r.u32()?;
        let fn_pos_start = r.u32()?;
        let fn_pos_end = r.u32()?;
        let dup_code = r.u8()?;
        let dup_handling = DupHandling::from_u8(dup_code).ok_or_else(|| {
            RplError::Parse(format!(
                "Execute_load_query event has invalid duplicate handling {}",
                dup_code
            ))
        })?;
        if fn_pos_start > fn_pos_end || fn_pos_end as usize > query.query.len() {
            return Err(RplError::Parse(format!(
                "Execute_load_query file name span {}..{} is outside the statement",
                fn_pos_start, fn_pos_end
            )));
        }
        Ok(ExecuteLoadQueryEvent {
            query,
            file_id,
            fn_pos_start,
            fn_pos_end,
            dup_handling,
        })
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>, post_len: usize) {
        let start = out.len();
        self.query.write_post_header(out);
        fit_post_header(out, start, QUERY_HEADER_LEN);
        out.extend_from_slice(&self.file_id.to_le_bytes());
        out.extend_from_slice(&self.fn_pos_start.to_le_bytes());
        out.extend_from_slice(&self.fn_pos_end.to_le_bytes());
        out.push(self.dup_handling.code());
        fit_post_header(out, start, post_len);
        self.query.write_data(out);
    }
}

// ── Rotate ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RotateEvent {
    /// Position in the next log; 4 when the post-header is empty (version 1).
    pub position: u64,
    pub new_log_ident: String,
}

impl RotateEvent {
    pub(crate) fn parse(post: &[u8], data: &[u8]) -> Result<Self, RplError> {
        let position = if post.is_empty() {
            BIN_LOG_HEADER_SIZE
        } else {
            FieldReader::new(post, "Rotate").uint(8)?
        };
        let ident = &data[..data.len().min(MAX_LOG_IDENT_LEN)];
        Ok(RotateEvent {
            position,
            new_log_ident: lossy(ident),
        })
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>, post_len: usize) {
        let start = out.len();
        if post_len > 0 {
            out.extend_from_slice(&self.position.to_le_bytes());
        }
        fit_post_header(out, start, post_len);
        let ident = self.new_log_ident.as_bytes();
        out.extend_from_slice(&ident[..ident.len().min(MAX_LOG_IDENT_LEN)]);
    }
}

// ── Load family ────────────────────────────────────────────────────

/// Field and line options of a LOAD DATA statement.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct SqlEx {
    pub field_term: Vec<u8>,
    pub enclosed: Vec<u8>,
    pub line_term: Vec<u8>,
    pub line_start: Vec<u8>,
    pub escaped: Vec<u8>,
    pub opt_flags: u8,
}

const FIELD_TERM_EMPTY: u8 = 0x1;
const ENCLOSED_EMPTY: u8 = 0x2;
const LINE_TERM_EMPTY: u8 = 0x4;
const LINE_START_EMPTY: u8 = 0x8;
const ESCAPED_EMPTY: u8 = 0x10;

impl SqlEx {
    /// New layout: five length-prefixed strings and the option byte.
    /// Old layout (LOAD_EVENT only): five single characters, the option
    /// byte and a mask of which of the five are empty.
    fn parse(r: &mut FieldReader<'_>, new_format: bool) -> Result<Self, RplError> {
        if new_format {
            let next = |r: &mut FieldReader<'_>| -> Result<Vec<u8>, RplError> {
                let n = r.u8()? as usize;
                Ok(r.bytes(n)?.to_vec())
            };
            Ok(SqlEx {
                field_term: next(r)?,
                enclosed: next(r)?,
                line_term: next(r)?,
                line_start: next(r)?,
                escaped: next(r)?,
                opt_flags: r.u8()?,
            })
        } else {
            let chars = r.bytes(5)?;
            let opt_flags = r.u8()?;
            let empty = r.u8()?;
            let pick = |i: usize, flag: u8| {
                if empty & flag != 0 {
                    Vec::new()
                } else {
                    vec![chars[i]]
                }
            };
            Ok(SqlEx {
                field_term: pick(0, FIELD_TERM_EMPTY),
                enclosed: pick(1, ENCLOSED_EMPTY),
                line_term: pick(2, LINE_TERM_EMPTY),
                line_start: pick(3, LINE_START_EMPTY),
                escaped: pick(4, ESCAPED_EMPTY),
                opt_flags,
            })
        }
    }

    fn write(&self, out: &mut Vec<u8>, new_format: bool) {
        let parts = [
            (&self.field_term, FIELD_TERM_EMPTY),
            (&self.enclosed, ENCLOSED_EMPTY),
            (&self.line_term, LINE_TERM_EMPTY),
            (&self.line_start, LINE_START_EMPTY),
            (&self.escaped, ESCAPED_EMPTY),
        ];
        if new_format {
            for (s, _) in parts {
                let n = s.len().min(u8::MAX as usize);
                out.push(n as u8);
                out.extend_from_slice(&s[..n]);
            }
            out.push(self.opt_flags);
        } else {
            let mut empty = 0u8;
            for (s, flag) in parts {
                match s.first() {
                    Some(&c) => out.push(c),
                    None => {
                        out.push(0);
                        empty |= flag;
                    }
                }
            }
            out.push(self.opt_flags);
            out.push(empty);
        }
    }
}

/// LOAD DATA INFILE as logged by 3.23 and 4.0 servers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LoadEvent {
    pub thread_id: u32,
    pub exec_time: u32,
    pub skip_lines: u32,
    pub table_name: String,
    pub db: String,
    pub fname: String,
    pub sql_ex: SqlEx,
    pub fields: Vec<String>,
}

impl LoadEvent {
    /// Parse the Load post-header plus the data that follows `skip` extra
    /// post-header bytes (the Create_file file id).
    ///
    /// Returns the event and the unconsumed tail (the Create_file block).
    pub(crate) fn parse<'a>(
        load_post: &[u8],
        data: &'a [u8],
        new_format: bool,
        fname_nul_terminated: bool,
    ) -> Result<(Self, &'a [u8]), RplError> {
        let mut p = FieldReader::new(load_post, "Load");
        let thread_id = p.u32()?;
        let exec_time = p.u32()?;
        let skip_lines = p.u32()?;
        let table_len = p.u8()? as usize;
        let db_len = p.u8()? as usize;
        let num_fields = p.u32()? as usize;

        let mut d = FieldReader::new(data, "Load");
        let sql_ex = SqlEx::parse(&mut d, new_format)?;
        if num_fields > data.len() {
            return Err(RplError::Parse(format!(
                "Load event declares {} fields in {} bytes",
                num_fields,
                data.len()
            )));
        }
        let field_lens = d.bytes(num_fields)?.to_vec();
        let mut fields = Vec::with_capacity(num_fields);
        for len in field_lens {
            fields.push(lossy(d.bytes(len as usize)?));
            d.skip(1)?;
        }
        let table_name = lossy(d.bytes(table_len)?);
        d.skip(1)?;
        let db = lossy(d.bytes(db_len)?);
        d.skip(1)?;
        let fname = if fname_nul_terminated {
            lossy(d.cstr())
        } else {
            let rest = d.rest();
            let end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
            lossy(&rest[..end])
        };
        Ok((
            LoadEvent {
                thread_id,
                exec_time,
                skip_lines,
                table_name,
                db,
                fname,
                sql_ex,
                fields,
            },
            d.rest(),
        ))
    }

    pub(crate) fn write_post_header(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.thread_id.to_le_bytes());
        out.extend_from_slice(&self.exec_time.to_le_bytes());
        out.extend_from_slice(&self.skip_lines.to_le_bytes());
        out.push(self.table_name.len().min(u8::MAX as usize) as u8);
        out.push(self.db.len().min(u8::MAX as usize) as u8);
        out.extend_from_slice(&(self.fields.len() as u32).to_le_bytes());
    }

    pub(crate) fn write_data(&self, out: &mut Vec<u8>, new_format: bool) {
        self.sql_ex.write(out, new_format);
        for f in &self.fields {
            out.push(f.len().min(u8::MAX as usize) as u8);
        }
        for f in &self.fields {
            let b = f.as_bytes();
            out.extend_from_slice(&b[..b.len().min(u8::MAX as usize)]);
            out.push(0);
        }
        for name in [&self.table_name, &self.db] {
            let b = name.as_bytes();
            out.extend_from_slice(&b[..b.len().min(u8::MAX as usize)]);
            out.push(0);
        }
        out.extend_from_slice(self.fname.as_bytes());
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>, post_len: usize, new_format: bool) {
        let start = out.len();
        self.write_post_header(out);
        fit_post_header(out, start, post_len);
        self.write_data(out, new_format);
    }

    /// True for LOAD DATA with REPLACE semantics.
    pub fn is_replace(&self) -> bool {
        self.sql_ex.opt_flags & REPLACE_FLAG != 0
    }

    /// True for LOAD DATA with IGNORE semantics.
    pub fn is_ignore(&self) -> bool {
        self.sql_ex.opt_flags & IGNORE_FLAG != 0
    }
}

/// First part of a 4.x LOAD DATA: the statement plus the first data block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CreateFileEvent {
    pub load: LoadEvent,
    pub file_id: u32,
    pub block: Vec<u8>,
}

impl CreateFileEvent {
    pub(crate) fn parse(
        load_post_len: usize,
        create_post_len: usize,
        body: &[u8],
    ) -> Result<Self, RplError> {
        if body.len() < load_post_len + create_post_len {
            return Err(RplError::Parse("Create_file event is truncated".to_string()));
        }
        let load_post = &body[..load_post_len];
        let mut p = FieldReader::new(&body[load_post_len..], "Create_file");
        let file_id = p.u32()?;
        let data = &body[load_post_len + create_post_len..];
        let (load, block) = LoadEvent::parse(load_post, data, true, true)?;
        Ok(CreateFileEvent {
            load,
            file_id,
            block: block.to_vec(),
        })
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>, load_post_len: usize, create_post_len: usize) {
        let start = out.len();
        self.load.write_post_header(out);
        fit_post_header(out, start, load_post_len);
        let start = out.len();
        out.extend_from_slice(&self.file_id.to_le_bytes());
        fit_post_header(out, start, create_post_len);
        self.load.write_data(out, true);
        out.push(0);
        out.extend_from_slice(&self.block);
    }
}

/// A block of LOAD DATA file content (Append_block, Begin_load_query).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppendBlockEvent {
    pub file_id: u32,
    pub block: Vec<u8>,
}

impl AppendBlockEvent {
    pub(crate) fn parse(post: &[u8], data: &[u8], what: &'static str) -> Result<Self, RplError> {
        Ok(AppendBlockEvent {
            file_id: FieldReader::new(post, what).u32()?,
            block: data.to_vec(),
        })
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>, post_len: usize) {
        let start = out.len();
        out.extend_from_slice(&self.file_id.to_le_bytes());
        fit_post_header(out, start, post_len);
        out.extend_from_slice(&self.block);
    }
}

/// Exec_load and Delete_file carry only the file id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FileIdEvent {
    pub file_id: u32,
}

impl FileIdEvent {
    pub(crate) fn parse(post: &[u8], what: &'static str) -> Result<Self, RplError> {
        Ok(FileIdEvent {
            file_id: FieldReader::new(post, what).u32()?,
        })
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>, post_len: usize) {
        let start = out.len();
        out.extend_from_slice(&self.file_id.to_le_bytes());
        fit_post_header(out, start, post_len);
    }
}

// ── Xid / Incident ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct XidEvent {
    pub xid: u64,
}

/// Incident codes.
pub const INCIDENT_NONE: u16 = 0;
pub const INCIDENT_LOST_EVENTS: u16 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IncidentEvent {
    pub code: u16,
    pub message: String,
}

impl IncidentEvent {
    pub(crate) fn parse(post: &[u8], data: &[u8]) -> Result<Self, RplError> {
        let code = FieldReader::new(post, "Incident").u16()?;
        let mut d = FieldReader::new(data, "Incident");
        let message = if d.remaining() > 0 {
            let n = d.u8()? as usize;
            lossy(d.bytes(n)?)
        } else {
            String::new()
        };
        Ok(IncidentEvent { code, message })
    }

    pub(crate) fn write(&self, out: &mut Vec<u8>, post_len: usize) {
        let start = out.len();
        out.extend_from_slice(&self.code.to_le_bytes());
        fit_post_header(out, start, post_len);
        let msg = self.message.as_bytes();
        let n = msg.len().min(u8::MAX as usize);
        out.push(n as u8);
        out.extend_from_slice(&msg[..n]);
    }

    /// Name of the incident code as printed in dumps.
    pub fn description(&self) -> &'static str {
        match self.code {
            INCIDENT_NONE => "NOTHING",
            INCIDENT_LOST_EVENTS => "LOST_EVENTS",
            _ => "UNKNOWN",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_reader_bounds() {
        let mut r = FieldReader::new(&[1, 2, 3], "Test");
        assert_eq!(r.u16().unwrap(), 0x0201);
        assert!(r.u16().is_err());
        assert_eq!(r.u8().unwrap(), 3);
        assert_eq!(r.remaining(), 0);
    }

    #[test]
    fn test_field_reader_uint48() {
        let mut r = FieldReader::new(&[1, 0, 0, 0, 0, 1], "Test");
        assert_eq!(r.uint(6).unwrap(), 0x0100_0000_0001);
    }

    #[test]
    fn test_query_status_vars() {
        let mut q = QueryEvent::new("test", b"INSERT INTO t VALUES (1)");
        q.status_vars = vec![Q_FLAGS2_CODE, 0x00, 0x40, 0, 0, Q_CHARSET_DATABASE_CODE, 8, 0];
        let mut buf = Vec::new();
        q.write(&mut buf, QUERY_HEADER_LEN);
        let (post, data) = buf.split_at(QUERY_HEADER_LEN);
        let parsed = QueryEvent::parse(post, data, "Query").unwrap();
        assert_eq!(parsed.flags2, Some(0x4000));
        assert_eq!(parsed.charset_database, Some(8));
        assert_eq!(parsed.lc_time_names, None);
        assert_eq!(parsed.db, "test");
        assert_eq!(parsed.query, b"INSERT INTO t VALUES (1)");
    }

    #[test]
    fn test_query_rejects_oversized_status_vars() {
        let mut q = QueryEvent::new("", b"BEGIN");
        q.status_vars = vec![0xff; 12];
        let mut buf = Vec::new();
        q.write(&mut buf, QUERY_HEADER_LEN);
        let (post, data) = buf.split_at(QUERY_HEADER_LEN);
        assert!(QueryEvent::parse(post, data, "Query").is_err());
    }

    #[test]
    fn test_query_unknown_status_code_stops_walk() {
        let mut q = QueryEvent::new("db", b"x");
        q.status_vars = vec![99, Q_FLAGS2_CODE, 1, 0, 0, 0];
        let mut buf = Vec::new();
        q.write(&mut buf, QUERY_HEADER_LEN);
        let (post, data) = buf.split_at(QUERY_HEADER_LEN);
        let parsed = QueryEvent::parse(post, data, "Query").unwrap();
        assert_eq!(parsed.flags2, None);
        assert_eq!(parsed.status_vars.len(), 6);
    }

    #[test]
    fn test_old_sql_ex_empty_flags() {
        let bytes = [b',', b'"', b'\n', 0, b'\\', OPT_ENCLOSED_FLAG, LINE_START_EMPTY];
        let mut r = FieldReader::new(&bytes, "Load");
        let ex = SqlEx::parse(&mut r, false).unwrap();
        assert_eq!(ex.field_term, b",");
        assert_eq!(ex.line_start, b"");
        assert_eq!(ex.escaped, b"\\");
        assert_eq!(ex.opt_flags, OPT_ENCLOSED_FLAG);
    }

    #[test]
    fn test_load_field_count_sanity() {
        let load = LoadEvent {
            thread_id: 1,
            exec_time: 0,
            skip_lines: 0,
            table_name: "t".into(),
            db: "d".into(),
            fname: "/tmp/x".into(),
            sql_ex: SqlEx::default(),
            fields: vec![],
        };
        let mut buf = Vec::new();
        load.write_post_header(&mut buf);
        buf[L_NUM_FIELDS_OFFSET..L_NUM_FIELDS_OFFSET + 4].copy_from_slice(&1000u32.to_le_bytes());
        let mut data = Vec::new();
        load.write_data(&mut data, true);
        assert!(LoadEvent::parse(&buf, &data, true, false).is_err());
    }

    #[test]
    fn test_elq_span_checked() {
        let ev = ExecuteLoadQueryEvent {
            query: QueryEvent::new("d", b"LOAD DATA INFILE 'a' INTO TABLE t"),
            file_id: 3,
            fn_pos_start: 10,
            fn_pos_end: 500,
            dup_handling: DupHandling::Ignore,
        };
        let mut buf = Vec::new();
        ev.write(&mut buf, EXECUTE_LOAD_QUERY_HEADER_LEN);
        let (post, data) = buf.split_at(EXECUTE_LOAD_QUERY_HEADER_LEN);
        assert!(ExecuteLoadQueryEvent::parse(post, data).is_err());
    }

    #[test]
    fn test_rotate_without_post_header() {
        let r = RotateEvent::parse(&[], b"master-bin.000002").unwrap();
        assert_eq!(r.position, 4);
        assert_eq!(r.new_log_ident, "master-bin.000002");
    }

    #[test]
    fn test_incident_description() {
        let ev = IncidentEvent::parse(&[1, 0], &[3, b'a', b'b', b'c']).unwrap();
        assert_eq!(ev.description(), "LOST_EVENTS");
        assert_eq!(ev.message, "abc");
    }
}
