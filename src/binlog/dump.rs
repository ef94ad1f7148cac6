//! The dump session: turns one or more binlogs into a replayable SQL script.
//!
//! A [`DumpSession`] owns all state that lives across logs: the filter
//! window, the event counter, the LOAD DATA reassembly table and the
//! cancellation flag. State that is reset for every log (the active format
//! description, the Table_map registry and what has been printed so far)
//! lives in a [`LogState`].
//!
//! Every event goes through [`DumpSession::process_event`], which applies
//! the filters, prints the event and feeds LOAD DATA events to the
//! reassembly table. It answers [`Flow::Continue`] or [`Flow::Stop`]; an
//! `Err` stops the whole run.
//!
//! # Filters
//!
//! Applied in order to every event except FORMAT_DESCRIPTION:
//!
//! 1. `--offset` and `--start-datetime`: events are dropped until one passes
//!    both, after which both filters are off for the rest of the run;
//! 2. `--server-id`: events from other servers are dropped;
//! 3. `--stop-datetime` and `--stop-position`: the first event at or past
//!    either ends the run cleanly.

use chrono::{Local, LocalResult, NaiveDate, NaiveDateTime, TimeZone};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::binlog::codec::DecodeContext;
use crate::binlog::constants::{BINLOG_DUMP_NON_BLOCK, BIN_LOG_HEADER_SIZE};
use crate::binlog::events::EventBody;
use crate::binlog::format::FormatDescription;
use crate::binlog::load::{
    base_name, convert_path_separators, AppendOutcome, LoadReassembly, SavedCreate,
    BEGIN_LOAD_BASE_NAME,
};
use crate::binlog::reader::{EventSource, LocalLogReader, RemoteLogReader, SourcedEvent};
use crate::binlog::remote::{check_server_version, BinlogConnection};
use crate::binlog::render::{Base64Output, RenderOptions, Renderer};
use crate::util::wprintln;
use crate::RplError;

/// Whether the run goes on after an event or a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Requested end of the range reached (or the run was interrupted).
    Stop,
}

/// Where the filter window stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Window {
    /// `--offset`/`--start-datetime` still apply.
    BeforeWindow,
    InWindow,
    Stopped,
}

/// Everything that controls a dump.
#[derive(Debug, Clone)]
pub struct DumpOptions {
    /// First event position in the first log.
    pub start_position: u64,
    /// Events at or past this position in the last log are not printed.
    pub stop_position: u64,
    /// Seconds since the epoch.
    pub start_datetime: u32,
    pub stop_datetime: u32,
    /// Number of leading events to skip.
    pub offset: u64,
    /// Only events from this server; 0 means all.
    pub server_id: u32,
    /// Only statements run in this database.
    pub database: Option<String>,
    pub render: RenderOptions,
    pub force_if_open: bool,
    pub force_read: bool,
    pub to_last_log: bool,
    /// Directory for rebuilt LOAD DATA files.
    pub local_load_dir: PathBuf,
    pub disable_log_bin: bool,
    pub charset: Option<String>,
}

impl Default for DumpOptions {
    fn default() -> Self {
        DumpOptions {
            start_position: BIN_LOG_HEADER_SIZE,
            stop_position: u64::MAX,
            start_datetime: 0,
            stop_datetime: u32::MAX,
            offset: 0,
            server_id: 0,
            database: None,
            render: RenderOptions::default(),
            force_if_open: false,
            force_read: false,
            to_last_log: false,
            local_load_dir: std::env::temp_dir(),
            disable_log_bin: false,
            charset: None,
        }
    }
}

/// Parse a `--start-datetime`/`--stop-datetime` value in local time.
///
/// Accepts `YYYY-MM-DD HH:MM:SS`, `YYYY-MM-DD HH:MM`, `YYYY-MM-DD` and
/// `YYYYMMDDHHMMSS`.
pub fn parse_datetime(s: &str) -> Result<u32, RplError> {
    let bad = || RplError::Argument(format!("Incorrect date and time argument: {}", s));
    let trimmed = s.trim();
    let naive = ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y%m%d%H%M%S"]
        .iter()
        .find_map(|f| NaiveDateTime::parse_from_str(trimmed, f).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(bad)?;
    let local = match Local.from_local_datetime(&naive) {
        LocalResult::Single(t) | LocalResult::Ambiguous(t, _) => t,
        LocalResult::None => return Err(bad()),
    };
    u32::try_from(local.timestamp()).map_err(|_| bad())
}

/// Per-log decoding and printing state.
#[derive(Debug)]
pub struct LogState {
    pub name: String,
    pub ctx: DecodeContext,
    pub renderer: Renderer,
    /// Events at or past this position end the run.
    pub stop_position: u64,
}

impl LogState {
    pub fn new(name: &str, format: FormatDescription, options: &DumpOptions) -> Self {
        LogState {
            name: name.to_string(),
            ctx: DecodeContext::new(format).with_force(options.force_read),
            renderer: Renderer::new(options.render),
            stop_position: u64::MAX,
        }
    }
}

/// State of one dump run across all of its logs.
pub struct DumpSession {
    options: DumpOptions,
    window: Window,
    /// Non-FORMAT_DESCRIPTION events looked at while the window was closed.
    skipped: u64,
    /// Events handed to [`process_event`](Self::process_event).
    rec_count: u64,
    loads: LoadReassembly,
    interrupted: Arc<AtomicBool>,
    /// Start and stop position of the log being dumped.
    start_position: u64,
    stop_position: u64,
}

impl DumpSession {
    pub fn new(options: DumpOptions) -> Self {
        let loads = LoadReassembly::new(&options.local_load_dir);
        DumpSession {
            start_position: options.start_position,
            stop_position: options.stop_position,
            options,
            window: Window::BeforeWindow,
            skipped: 0,
            rec_count: 0,
            loads,
            interrupted: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Use `flag` as the interruption flag; the session stops at the next
    /// event boundary once it is set.
    pub fn with_interrupt(mut self, flag: Arc<AtomicBool>) -> Self {
        self.interrupted = flag;
        self
    }

    pub fn options(&self) -> &DumpOptions {
        &self.options
    }

    pub fn window(&self) -> Window {
        self.window
    }

    pub fn rec_count(&self) -> u64 {
        self.rec_count
    }

    pub fn loads(&self) -> &LoadReassembly {
        &self.loads
    }

    /// A fresh [`LogState`] for the log about to be dumped.
    pub fn log_state(&self, name: &str, format: FormatDescription) -> LogState {
        let mut log = LogState::new(name, format, &self.options);
        log.stop_position = self.stop_position;
        log
    }

    fn skips_database(&self, db: &str) -> bool {
        self.options
            .database
            .as_deref()
            .is_some_and(|wanted| wanted != db)
    }

    /// Filter, print and account for one event.
    pub fn process_event(
        &mut self,
        log: &mut LogState,
        ev: SourcedEvent,
        out: &mut dyn Write,
    ) -> Result<Flow, RplError> {
        let result = self.dispatch(log, ev, out);
        self.rec_count += 1;
        result
    }

    fn dispatch(
        &mut self,
        log: &mut LogState,
        ev: SourcedEvent,
        out: &mut dyn Write,
    ) -> Result<Flow, RplError> {
        let header = ev.event.header;
        let is_format = matches!(ev.event.body, EventBody::FormatDescription(_));

        if !is_format {
            if self.window == Window::BeforeWindow {
                let early = self.skipped < self.options.offset
                    || header.timestamp < self.options.start_datetime;
                if early {
                    self.skipped += 1;
                    return Ok(Flow::Continue);
                }
                // Timestamps are not monotonic; once in, stay in.
                self.window = Window::InWindow;
            }
            if self.options.server_id != 0 && header.server_id != self.options.server_id {
                return Ok(Flow::Continue);
            }
            if header.timestamp >= self.options.stop_datetime || ev.position >= log.stop_position {
                debug!(position = ev.position, "end of requested range");
                self.window = Window::Stopped;
                return Ok(Flow::Stop);
            }
        }

        let render = *log.renderer.options();
        if !render.short_form {
            wprintln!(out, "# at {}", ev.position)?;
        }

        match &ev.event.body {
            EventBody::Query(q) => {
                if self.skips_database(&q.db) {
                    return Ok(Flow::Continue);
                }
                if render.base64_output == Base64Output::Always {
                    log.renderer.event_base64(&ev, out)?;
                } else {
                    log.renderer.event(&ev, out)?;
                }
            }
            EventBody::CreateFile(cf) => {
                // Not saving a skipped Create_file also drops its Append_block
                // and Exec_load events.
                if self.skips_database(&cf.load.db) {
                    return Ok(Flow::Continue);
                }
                if render.base64_output == Base64Output::Always {
                    log.renderer.event_base64(&ev, out)?;
                } else {
                    log.renderer.event(&ev, out)?;
                }
                if log.ctx.format.binlog_version >= 3 {
                    let saved = SavedCreate {
                        header,
                        event: cf.clone(),
                    };
                    self.loads.on_create_or_begin(
                        cf.file_id,
                        base_name(&cf.load.fname),
                        &cf.block,
                        Some(saved),
                    )?;
                }
            }
            EventBody::AppendBlock(block) => {
                log.renderer.event(&ev, out)?;
                if self.loads.on_append(block.file_id, &block.block)? == AppendOutcome::UnknownFileId {
                    warn!(
                        "Ignoring Append_block as there is no Create_file event for file_id: {}",
                        block.file_id
                    );
                }
            }
            EventBody::ExecLoad(exec) => {
                log.renderer.event(&ev, out)?;
                match self.loads.on_execute(exec.file_id) {
                    Some(mut saved) => {
                        saved.event.load.fname = convert_path_separators(&saved.event.load.fname);
                        log.renderer.exec_load(&saved, out)?;
                    }
                    None => warn!(
                        "Ignoring Execute_load_log_event as there is no Create_file event for file_id: {}",
                        exec.file_id
                    ),
                }
            }
            EventBody::DeleteFile(del) => {
                log.renderer.event(&ev, out)?;
                self.loads.on_delete(del.file_id);
            }
            EventBody::FormatDescription(fd) => {
                log.ctx.replace_format(fd.clone());
                log.renderer.event(&ev, out)?;
                if !self.options.force_if_open && fd.is_in_use() {
                    return Err(RplError::Stream(format!(
                        "Attempting to dump binlog '{}', which was not closed properly. \
                         Most probably, drizzled is still writing it, or it crashed. \
                         Rerun with --force-if-open to ignore this problem.",
                        log.name
                    )));
                }
            }
            EventBody::BeginLoadQuery(block) => {
                log.renderer.event(&ev, out)?;
                self.loads
                    .on_create_or_begin(block.file_id, BEGIN_LOAD_BASE_NAME, &block.block, None)?;
            }
            EventBody::ExecuteLoadQuery(elq) => {
                let fname = self.loads.on_execute_query(elq.file_id);
                if !self.skips_database(&elq.query.db) {
                    match fname {
                        Some(path) => {
                            let local = convert_path_separators(&path.to_string_lossy());
                            log.renderer.execute_load_query(&ev, elq, Some(&local), out)?;
                        }
                        None => warn!(
                            "Ignoring Execute_load_query since there is no Begin_load_query event for file_id: {}",
                            elq.file_id
                        ),
                    }
                }
            }
            EventBody::TableMap(_)
            | EventBody::WriteRows(_)
            | EventBody::UpdateRows(_)
            | EventBody::DeleteRows(_) => {
                // Only replayable as BINLOG statements, which need a
                // FORMAT_DESCRIPTION printed before them.
                if !log.renderer.printed_format_description() && !render.short_form {
                    let type_name = header.type_name();
                    return Err(RplError::Stream(
                        if render.base64_output == Base64Output::Never {
                            format!(
                                "--base64-output=never specified, but binlog contains a {} event \
                                 which must be printed in base64.",
                                type_name
                            )
                        } else {
                            format!(
                                "malformed binlog: it does not contain any \
                                 Format_description_log_event. I now found a {} event, which is \
                                 not safe to process without a Format_description_log_event.",
                                type_name
                            )
                        },
                    ));
                }
                log.renderer.event(&ev, out)?;
            }
            EventBody::Unknown(_) => {
                warn!(
                    position = ev.position,
                    type_code = header.type_code,
                    "skipping unknown event"
                );
                log.renderer.event(&ev, out)?;
            }
            _ => log.renderer.event(&ev, out)?,
        }
        Ok(Flow::Continue)
    }

    /// Read `source` to its end (or the end of the range).
    pub fn drain<S: EventSource>(
        &mut self,
        source: &mut S,
        log: &mut LogState,
        out: &mut dyn Write,
    ) -> Result<Flow, RplError> {
        loop {
            if self.interrupted.load(Ordering::SeqCst) {
                warn!(log = %log.name, "interrupted");
                return Ok(Flow::Stop);
            }
            let Some(ev) = source.next_event(&mut log.ctx)? else {
                return Ok(Flow::Continue);
            };
            if self.process_event(log, ev, out)? == Flow::Stop {
                return Ok(Flow::Stop);
            }
        }
    }

    /// Dump a local binlog file.
    ///
    /// FORMAT_DESCRIPTION events before the start position are printed when
    /// base64 output is allowed, and otherwise only adopted.
    pub fn dump_file(&mut self, path: &Path, out: &mut dyn Write) -> Result<Flow, RplError> {
        let (mut reader, probe) = LocalLogReader::open(path, self.start_position)?;
        let name = path.display().to_string();
        let mut log = self.log_state(&name, probe.format);
        for ev in probe.format_events {
            if log.renderer.options().base64_output == Base64Output::Never {
                if let EventBody::FormatDescription(fd) = &ev.event.body {
                    log.ctx.replace_format(fd.clone());
                }
            } else if self.process_event(&mut log, ev, out)? == Flow::Stop {
                return Ok(Flow::Stop);
            }
        }
        self.drain(&mut reader, &mut log, out)
    }

    /// Dump a binlog from a non-seekable stream such as standard input.
    pub fn dump_stream<R: Read>(&mut self, source: R, out: &mut dyn Write) -> Result<Flow, RplError> {
        let mut reader = LocalLogReader::unseekable(source, self.start_position)?;
        let mut log = self.log_state("-", FormatDescription::new(3)?);
        self.drain(&mut reader, &mut log, out)
    }

    /// Dump `log_name` from a server over `conn`. The connection is used up:
    /// the server ends it when the dump finishes.
    pub fn dump_remote<C: BinlogConnection>(
        &mut self,
        mut conn: C,
        log_name: &str,
        out: &mut dyn Write,
    ) -> Result<Flow, RplError> {
        let format = check_server_version(&mut conn)?;
        let flags = if self.options.to_last_log {
            BINLOG_DUMP_NON_BLOCK
        } else {
            0
        };
        let mut reader = RemoteLogReader::start(
            conn,
            log_name,
            self.start_position,
            self.options.to_last_log,
            flags,
        )?;
        let mut log = self.log_state(log_name, format);
        self.drain(&mut reader, &mut log, out)
    }

    /// Statements that go before the first log.
    pub fn write_preamble(&self, out: &mut dyn Write) -> Result<(), RplError> {
        wprintln!(out, "/*!40019 SET @@session.max_insert_delayed_threads=0*/;")?;
        if self.options.disable_log_bin {
            wprintln!(out, "/*!32316 SET @OLD_SQL_LOG_BIN=@@SQL_LOG_BIN, SQL_LOG_BIN=0*/;")?;
        }
        wprintln!(
            out,
            "/*!50003 SET @OLD_COMPLETION_TYPE=@@COMPLETION_TYPE,COMPLETION_TYPE=0*/;"
        )?;
        if let Some(cs) = &self.options.charset {
            wprintln!(
                out,
                "\n/*!40101 SET @OLD_CHARACTER_SET_CLIENT=@@CHARACTER_SET_CLIENT */;\
                 \n/*!40101 SET @OLD_CHARACTER_SET_RESULTS=@@CHARACTER_SET_RESULTS */;\
                 \n/*!40101 SET @OLD_COLLATION_CONNECTION=@@COLLATION_CONNECTION */;\
                 \n/*!40101 SET NAMES {} */;",
                cs
            )?;
        }
        Ok(())
    }

    /// Statements that go after the last log. The `ROLLBACK` undoes a
    /// transaction left half-printed by a crashed log.
    pub fn write_epilogue(&self, out: &mut dyn Write) -> Result<(), RplError> {
        wprintln!(out, "# End of log file")?;
        wprintln!(out, "ROLLBACK /* added by drizzlebinlog */;")?;
        wprintln!(out, "/*!50003 SET COMPLETION_TYPE=@OLD_COMPLETION_TYPE*/;")?;
        if self.options.disable_log_bin {
            wprintln!(out, "/*!32316 SET SQL_LOG_BIN=@OLD_SQL_LOG_BIN*/;")?;
        }
        if self.options.charset.is_some() {
            wprintln!(out, "/*!40101 SET CHARACTER_SET_CLIENT=@OLD_CHARACTER_SET_CLIENT */;")?;
            wprintln!(out, "/*!40101 SET CHARACTER_SET_RESULTS=@OLD_CHARACTER_SET_RESULTS */;")?;
            wprintln!(out, "/*!40101 SET COLLATION_CONNECTION=@OLD_COLLATION_CONNECTION */;")?;
        }
        Ok(())
    }

    /// Dump `logs` in order with `dump_one`, wrapped in the preamble and
    /// epilogue. `--start-position` applies to the first log only and
    /// `--stop-position` to the last one only.
    ///
    /// The epilogue is written even when a log fails; the first error is
    /// returned afterwards.
    pub fn run<F>(&mut self, logs: &[String], out: &mut dyn Write, mut dump_one: F) -> Result<(), RplError>
    where
        F: FnMut(&mut DumpSession, &str, &mut dyn Write) -> Result<Flow, RplError>,
    {
        self.write_preamble(out)?;
        let mut result = Ok(());
        for (i, name) in logs.iter().enumerate() {
            self.start_position = if i == 0 {
                self.options.start_position
            } else {
                BIN_LOG_HEADER_SIZE
            };
            self.stop_position = if i + 1 == logs.len() {
                self.options.stop_position
            } else {
                u64::MAX
            };
            info!(log = %name, start = self.start_position, "dumping log");
            wprintln!(out, "DELIMITER /*!*/;")?;
            let flow = dump_one(self, name, out);
            wprintln!(out, "DELIMITER ;")?;
            match flow {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => break,
                Err(e) => {
                    result = Err(e);
                    break;
                }
            }
        }
        self.write_epilogue(out)?;
        out.flush().map_err(|e| RplError::Io(e.to_string()))?;
        if self.loads.pending() > 0 {
            debug!(pending = self.loads.pending(), "unfinished LOAD DATA files left behind");
        }
        debug!(events = self.rec_count, "dump finished");
        result
    }

    /// [`run`](Self::run) over local files, `-` meaning standard input.
    pub fn run_local(&mut self, logs: &[String], out: &mut dyn Write) -> Result<(), RplError> {
        self.run(logs, out, |session, name, out| {
            if name == "-" {
                session.dump_stream(io::stdin().lock(), out)
            } else {
                session.dump_file(Path::new(name), out)
            }
        })
    }
}
