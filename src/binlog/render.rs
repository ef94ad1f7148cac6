//! Text rendering of events.
//!
//! Every event is rendered into two accumulators: `head` receives the
//! header comment and any textual form, `body` receives a `BINLOG '...'`
//! base64 block. Both are written to the sink together, head first, once
//! the event is complete, so output of two events never interleaves.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{Local, LocalResult, TimeZone};
use std::io::Write;
use std::str::FromStr;

use crate::binlog::constants::*;
use crate::binlog::events::{DupHandling, EventBody, ExecuteLoadQueryEvent, LoadEvent, QueryEvent};
use crate::binlog::header::EventHeader;
use crate::binlog::load::SavedCreate;
use crate::binlog::reader::SourcedEvent;
use crate::util::hex::hex_dump;
use crate::util::{wprint, wprintln};
use crate::RplError;

/// Statement terminator used between `DELIMITER /*!*/;` and `DELIMITER ;`.
pub const DELIMITER: &str = "/*!*/;";

/// Width of the lines of a `BINLOG` block.
const BASE64_LINE_LEN: usize = 76;

/// Byte widths of the v3/v4 header fields, for `--hexdump`.
const HEADER_FIELD_WIDTHS: [usize; 6] = [4, 1, 4, 4, 4, 2];

/// When events are printed as `BINLOG` statements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Base64Output {
    /// Never; an event that has no other form stops the dump.
    Never,
    /// Only for events without a textual form.
    #[default]
    Auto,
    /// For every event.
    Always,
}

impl FromStr for Base64Output {
    type Err = RplError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "never" => Ok(Base64Output::Never),
            "auto" => Ok(Base64Output::Auto),
            "always" => Ok(Base64Output::Always),
            _ => Err(RplError::Argument(format!(
                "Invalid --base64-output value '{}': expected never, auto or always",
                s
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    pub short_form: bool,
    pub hexdump: bool,
    pub base64_output: Base64Output,
}

/// Per-stream rendering state.
#[derive(Debug)]
pub struct Renderer {
    options: RenderOptions,
    /// Database of the last `use` printed.
    last_db: String,
    printed_format_description: bool,
    head: Vec<u8>,
    body: Vec<u8>,
}

/// `#YYMMDD HH:MM:SS` in local time, hours space-padded.
pub fn format_timestamp(ts: u32) -> String {
    match Local.timestamp_opt(i64::from(ts), 0) {
        LocalResult::Single(t) | LocalResult::Ambiguous(t, _) => {
            t.format("%y%m%d %_H:%M:%S").to_string()
        }
        LocalResult::None => ts.to_string(),
    }
}

/// Base64 of `raw`, broken into 76-column lines.
pub fn base64_lines(raw: &[u8]) -> String {
    let encoded = STANDARD.encode(raw);
    encoded
        .as_bytes()
        .chunks(BASE64_LINE_LEN)
        .map(|c| String::from_utf8_lossy(c))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Quote a LOAD DATA terminator the way the server prints it.
pub fn pretty_print_str(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(bytes.len() + 2);
    s.push('\'');
    for &c in bytes {
        match c {
            b'\n' => s.push_str("\\n"),
            b'\r' => s.push_str("\\r"),
            b'\\' => s.push_str("\\\\"),
            0x08 => s.push_str("\\b"),
            b'\t' => s.push_str("\\t"),
            b'\'' => s.push_str("\\'"),
            0 => s.push_str("\\0"),
            _ => s.push(c as char),
        }
    }
    s.push('\'');
    s
}

impl Renderer {
    pub fn new(options: RenderOptions) -> Self {
        Renderer {
            options,
            last_db: String::new(),
            printed_format_description: false,
            head: Vec::new(),
            body: Vec::new(),
        }
    }

    pub fn options(&self) -> &RenderOptions {
        &self.options
    }

    /// True once a FORMAT_DESCRIPTION (or Start_v3) has been printed as a
    /// `BINLOG` statement. Row events are only replayable after that.
    pub fn printed_format_description(&self) -> bool {
        self.printed_format_description
    }

    fn flush(&mut self, out: &mut dyn Write) -> Result<(), RplError> {
        out.write_all(&self.head)
            .and_then(|_| out.write_all(&self.body))
            .map_err(|e| RplError::Io(e.to_string()))?;
        self.head.clear();
        self.body.clear();
        Ok(())
    }

    /// `#<when> server id N  end_log_pos P `, preceded by the hex dump when
    /// requested and `raw` is available.
    fn header(&mut self, header: &EventHeader, position: u64, raw: Option<&[u8]>) -> Result<(), RplError> {
        if self.options.hexdump {
            if let Some(raw) = raw {
                self.hexdump(position, raw)?;
            }
        }
        wprint!(
            self.head,
            "#{} server id {}  end_log_pos {} ",
            format_timestamp(header.timestamp),
            header.server_id,
            header.next_position
        )
    }

    fn hexdump(&mut self, position: u64, raw: &[u8]) -> Result<(), RplError> {
        let (fixed, rest) = raw.split_at(LOG_EVENT_HEADER_LEN.min(raw.len()));
        wprintln!(
            self.head,
            "# Position  Timestamp   Type   Master ID        Size      Master Pos    Flags "
        )?;
        let mut line = format!("# {:08x}", position);
        let mut remaining = fixed;
        for width in HEADER_FIELD_WIDTHS {
            let (field, tail) = remaining.split_at(width.min(remaining.len()));
            line.push_str("  ");
            line.push_str(
                &field
                    .iter()
                    .map(|b| format!("{:02x}", b))
                    .collect::<Vec<_>>()
                    .join(" "),
            );
            remaining = tail;
        }
        wprintln!(self.head, "{}", line.trim_end())?;
        for l in hex_dump(rest, position + fixed.len() as u64).lines() {
            wprintln!(self.head, "# {}", l)?;
        }
        Ok(())
    }

    fn base64_block(&mut self, raw: &[u8]) -> Result<(), RplError> {
        wprint!(self.body, "\nBINLOG '\n{}\n'{}\n", base64_lines(raw), DELIMITER)
    }

    /// Header comment plus `BINLOG` block, whatever the event type.
    pub fn event_base64(&mut self, ev: &SourcedEvent, out: &mut dyn Write) -> Result<(), RplError> {
        self.header(&ev.event.header, ev.position, Some(&ev.raw))?;
        self.base64_block(&ev.raw)?;
        self.flush(out)
    }

    /// Default rendering of one event.
    pub fn event(&mut self, ev: &SourcedEvent, out: &mut dyn Write) -> Result<(), RplError> {
        let header = &ev.event.header;
        let short = self.options.short_form;
        match &ev.event.body {
            EventBody::Query(q) => {
                self.query_header(header, ev.position, Some(&ev.raw), q, "Query")?;
                self.head.extend_from_slice(&q.query);
                wprintln!(self.head, "\n{}", DELIMITER)?;
            }
            EventBody::ExecuteLoadQuery(elq) => {
                return self.execute_load_query(ev, elq, None, out);
            }
            EventBody::StartV3(_) | EventBody::FormatDescription(_) => {
                self.start(ev)?;
            }
            EventBody::Stop if !short => {
                self.header(header, ev.position, Some(&ev.raw))?;
                wprintln!(self.head, "\tStop")?;
            }
            EventBody::Rotate(r) if !short => {
                self.header(header, ev.position, Some(&ev.raw))?;
                wprintln!(self.head, "\tRotate to {}  pos: {}", r.new_log_ident, r.position)?;
            }
            EventBody::Xid(x) => {
                if !short {
                    self.header(header, ev.position, Some(&ev.raw))?;
                    wprintln!(self.head, "\tXid = {}", x.xid)?;
                }
                wprintln!(self.head, "COMMIT{}", DELIMITER)?;
            }
            EventBody::Load(load) => {
                self.load_data(header, ev.position, Some(&ev.raw), load, false, false)?;
            }
            EventBody::CreateFile(cf) => {
                // The file name still points at the server, so the statement
                // is only shown as a comment until Exec_load arrives.
                if !short {
                    self.load_data(header, ev.position, Some(&ev.raw), &cf.load, false, true)?;
                    wprintln!(self.head, "# file_id: {}  block_len: {}", cf.file_id, cf.block.len())?;
                }
            }
            EventBody::AppendBlock(b) | EventBody::BeginLoadQuery(b) if !short => {
                self.header(header, ev.position, Some(&ev.raw))?;
                wprintln!(
                    self.head,
                    "\n#{}: file_id: {}  block_len: {}",
                    header.type_name(),
                    b.file_id,
                    b.block.len()
                )?;
            }
            EventBody::ExecLoad(e) if !short => {
                self.header(header, ev.position, Some(&ev.raw))?;
                wprintln!(self.head, "\n#Exec_load: file_id={}", e.file_id)?;
            }
            EventBody::DeleteFile(e) if !short => {
                self.header(header, ev.position, Some(&ev.raw))?;
                wprintln!(self.head, "\n#Delete_file: file_id={}", e.file_id)?;
            }
            EventBody::Incident(i) if !short => {
                self.header(header, ev.position, Some(&ev.raw))?;
                wprintln!(
                    self.head,
                    "\n# Incident: {}\nRELOAD DATABASE; # Shall generate syntax error",
                    i.description()
                )?;
            }
            EventBody::TableMap(map) if !short => {
                self.header(header, ev.position, Some(&ev.raw))?;
                wprintln!(
                    self.head,
                    "\tTable_map: `{}`.`{}` mapped to number {}",
                    map.db,
                    map.table,
                    map.table_id
                )?;
                self.base64_block(&ev.raw)?;
            }
            EventBody::WriteRows(rows) | EventBody::UpdateRows(rows) | EventBody::DeleteRows(rows)
                if !short =>
            {
                self.header(header, ev.position, Some(&ev.raw))?;
                wprintln!(
                    self.head,
                    "\t{}: table id {}{}",
                    header.type_name(),
                    rows.table_id,
                    if rows.is_statement_end() { " flags: STMT_END_F" } else { "" }
                )?;
                self.base64_block(&ev.raw)?;
            }
            EventBody::Unknown(_) if !short => {
                self.header(header, ev.position, Some(&ev.raw))?;
                wprintln!(self.head, "\n# Unknown event")?;
            }
            _ => {}
        }
        self.flush(out)
    }

    /// Start_v3 and Format_desc.
    fn start(&mut self, ev: &SourcedEvent) -> Result<(), RplError> {
        let header = &ev.event.header;
        let (binlog_version, server_version, created) = match &ev.event.body {
            EventBody::StartV3(s) => (s.binlog_version, s.server_version.as_str(), s.created),
            EventBody::FormatDescription(f) => (f.binlog_version, f.server_version.as_str(), f.created),
            _ => return Ok(()),
        };
        if !self.options.short_form {
            self.header(header, ev.position, Some(&ev.raw))?;
            wprint!(
                self.head,
                "\tStart: binlog v {}, server v {} created {}",
                binlog_version,
                server_version,
                format_timestamp(header.timestamp)
            )?;
            if created != 0 {
                wprint!(self.head, " at startup")?;
            }
            wprintln!(self.head)?;
            if header.flags & LOG_EVENT_BINLOG_IN_USE_F != 0 {
                wprintln!(
                    self.head,
                    "# Warning: this binlog was not closed properly. Most probably drizzled crashed writing it."
                )?;
            }
        }
        // A server restart: anything left open by the old instance is gone.
        if header.flags & LOG_EVENT_ARTIFICIAL_F == 0 && created != 0 {
            wprintln!(self.head, "ROLLBACK{}", DELIMITER)?;
        }
        if self.options.base64_output != Base64Output::Never && !self.options.short_form {
            wprintln!(self.head, "BINLOG '\n{}\n'{}", base64_lines(&ev.raw), DELIMITER)?;
            self.printed_format_description = true;
        }
        Ok(())
    }

    /// Header comment, `use db` and `SET TIMESTAMP` of a statement event.
    fn query_header(
        &mut self,
        header: &EventHeader,
        position: u64,
        raw: Option<&[u8]>,
        q: &QueryEvent,
        type_name: &str,
    ) -> Result<(), RplError> {
        if !self.options.short_form {
            self.header(header, position, raw)?;
            wprintln!(
                self.head,
                "\t{}\tthread_id={}\texec_time={}\terror_code={}",
                type_name,
                q.thread_id,
                q.exec_time,
                q.error_code
            )?;
        }
        if header.flags & LOG_EVENT_SUPPRESS_USE_F == 0 && self.last_db != q.db {
            self.last_db = q.db.clone();
            if !q.db.is_empty() {
                wprintln!(self.head, "use {}{}", q.db, DELIMITER)?;
            }
        }
        wprintln!(self.head, "SET TIMESTAMP={}{}", header.timestamp, DELIMITER)
    }

    /// Execute_load_query, with its file name span replaced by `local` when
    /// the data file was rebuilt locally.
    pub fn execute_load_query(
        &mut self,
        ev: &SourcedEvent,
        elq: &ExecuteLoadQueryEvent,
        local: Option<&str>,
        out: &mut dyn Write,
    ) -> Result<(), RplError> {
        self.query_header(
            &ev.event.header,
            ev.position,
            Some(&ev.raw),
            &elq.query,
            "Execute_load_query",
        )?;
        let query = &elq.query.query;
        match local {
            Some(fname) => {
                let start = (elq.fn_pos_start as usize).min(query.len());
                let end = (elq.fn_pos_end as usize).clamp(start, query.len());
                self.head.extend_from_slice(&query[..start]);
                wprint!(self.head, " LOCAL INFILE '{}'", fname)?;
                match elq.dup_handling {
                    DupHandling::Replace => wprint!(self.head, " REPLACE")?,
                    DupHandling::Ignore => wprint!(self.head, " IGNORE")?,
                    DupHandling::Error => {}
                }
                wprint!(self.head, " INTO")?;
                self.head.extend_from_slice(&query[end..]);
            }
            None => self.head.extend_from_slice(query),
        }
        wprintln!(self.head, "\n{}", DELIMITER)?;
        if !self.options.short_form {
            wprintln!(self.head, "# file_id: {} ", elq.file_id)?;
        }
        self.flush(out)
    }

    /// A Create_file whose data now lives in a local file: printed as a
    /// runnable `LOAD DATA LOCAL INFILE`.
    pub fn exec_load(&mut self, saved: &SavedCreate, out: &mut dyn Write) -> Result<(), RplError> {
        let cf = &saved.event;
        self.load_data(&saved.header, 0, None, &cf.load, true, false)?;
        if !self.options.short_form {
            wprintln!(self.head, "# file_id: {}  block_len: {}", cf.file_id, cf.block.len())?;
        }
        self.flush(out)
    }

    fn load_data(
        &mut self,
        header: &EventHeader,
        position: u64,
        raw: Option<&[u8]>,
        load: &LoadEvent,
        local: bool,
        commented: bool,
    ) -> Result<(), RplError> {
        let comment = if commented { "# " } else { "" };
        if !self.options.short_form {
            self.header(header, position, raw)?;
            wprintln!(
                self.head,
                "\tQuery\tthread_id={}\texec_time={}",
                load.thread_id,
                load.exec_time
            )?;
        }
        let different_db = self.last_db != load.db;
        if different_db && !commented {
            self.last_db = load.db.clone();
        }
        if different_db && !load.db.is_empty() {
            wprintln!(self.head, "{}use {}{}", comment, load.db, DELIMITER)?;
        }
        if header.flags & LOG_EVENT_THREAD_SPECIFIC_F != 0 {
            wprintln!(
                self.head,
                "{}SET @@session.pseudo_thread_id={}{}",
                comment,
                load.thread_id,
                DELIMITER
            )?;
        }
        wprint!(
            self.head,
            "{}LOAD DATA {}INFILE '{}' ",
            comment,
            if local { "LOCAL " } else { "" },
            load.fname
        )?;
        if load.is_replace() {
            wprint!(self.head, " REPLACE ")?;
        } else if load.is_ignore() {
            wprint!(self.head, " IGNORE ")?;
        }
        let ex = &load.sql_ex;
        wprint!(
            self.head,
            "INTO TABLE `{}` FIELDS TERMINATED BY {}",
            load.table_name,
            pretty_print_str(&ex.field_term)
        )?;
        if ex.opt_flags & OPT_ENCLOSED_FLAG != 0 {
            wprint!(self.head, " OPTIONALLY ")?;
        }
        wprint!(
            self.head,
            " ENCLOSED BY {} ESCAPED BY {} LINES TERMINATED BY {}",
            pretty_print_str(&ex.enclosed),
            pretty_print_str(&ex.escaped),
            pretty_print_str(&ex.line_term)
        )?;
        if !ex.line_start.is_empty() {
            wprint!(self.head, " STARTING BY {}", pretty_print_str(&ex.line_start))?;
        }
        if load.skip_lines > 0 {
            wprint!(self.head, " IGNORE {} LINES", load.skip_lines)?;
        }
        if !load.fields.is_empty() {
            wprint!(self.head, " ({})", load.fields.join(","))?;
        }
        wprintln!(self.head, "{}", DELIMITER)
    }
}
