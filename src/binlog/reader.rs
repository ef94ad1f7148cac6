//! Event stream readers.
//!
//! An [`EventSource`] yields decoded events in log order together with the
//! position each one started at. Two sources exist:
//!
//! - [`LocalLogReader`]: a binlog file (probed first, see
//!   [`probe_initial`]) or standard input;
//! - [`RemoteLogReader`]: a `COM_BINLOG_DUMP` stream from a server.
//!
//! Both decode with the [`DecodeContext`] passed in by the caller, so a
//! FORMAT_DESCRIPTION event adopted by the dispatcher governs every event
//! read after it.

use byteorder::{ByteOrder, LittleEndian};
use std::fs::File;
use std::io::{BufReader, ErrorKind, Read, Seek, SeekFrom};
use std::path::Path;
use tracing::{debug, warn};

use crate::binlog::codec::{decode, DecodeContext};
use crate::binlog::constants::*;
use crate::binlog::events::{EventBody, LogEvent};
use crate::binlog::format::{probe_initial, Probe};
use crate::binlog::remote::{BinlogConnection, DumpRequest};
use crate::RplError;

/// A decoded event with its raw bytes and starting position.
#[derive(Debug, Clone)]
pub struct SourcedEvent {
    /// Offset of the first header byte in the originating log.
    pub position: u64,
    pub raw: Vec<u8>,
    pub event: LogEvent,
}

/// Anything that yields events in log order.
pub trait EventSource {
    /// Next event, or `None` at the end of the stream.
    fn next_event(&mut self, ctx: &mut DecodeContext) -> Result<Option<SourcedEvent>, RplError>;
}

/// Outcome of reading one raw event.
#[derive(Debug)]
pub enum RawRead {
    Event(Vec<u8>),
    /// Nothing left at an event boundary.
    Eof,
    /// Partial or implausible event.
    Corrupt(String),
}

/// Fill `buf` as far as the source allows; returns the number of bytes read.
pub(crate) fn read_fully<R: Read + ?Sized>(src: &mut R, buf: &mut [u8]) -> Result<usize, RplError> {
    let mut filled = 0;
    while filled < buf.len() {
        match src.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(RplError::Io(format!("Read error: {}", e))),
        }
    }
    Ok(filled)
}

/// Read one raw event whose common header is `header_len` bytes long.
///
/// Only the first `min(header_len, 19)` bytes are needed to learn the event
/// length, so a FORMAT_DESCRIPTION event is readable under any description.
pub fn read_raw_event<R: Read + ?Sized>(src: &mut R, header_len: usize) -> Result<RawRead, RplError> {
    let head_len = header_len.min(LOG_EVENT_MINIMAL_HEADER_LEN);
    let mut head = vec![0u8; head_len];
    let got = read_fully(src, &mut head)?;
    if got == 0 {
        return Ok(RawRead::Eof);
    }
    if got < head_len {
        return Ok(RawRead::Corrupt(format!(
            "event header truncated after {} bytes",
            got
        )));
    }
    let event_len = LittleEndian::read_u32(&head[EVENT_LEN_OFFSET..]);
    if (event_len as usize) < head_len {
        return Ok(RawRead::Corrupt(format!("event too small ({} bytes)", event_len)));
    }
    if event_len > MAX_EVENT_SIZE {
        return Ok(RawRead::Corrupt(format!("event too big ({} bytes)", event_len)));
    }
    let mut raw = head;
    raw.resize(event_len as usize, 0);
    let got = read_fully(src, &mut raw[head_len..])?;
    if got < event_len as usize - head_len {
        return Ok(RawRead::Corrupt(format!(
            "event truncated: {} of {} bytes",
            head_len + got,
            event_len
        )));
    }
    Ok(RawRead::Event(raw))
}

/// Sequential reader over a local binlog (or standard input).
pub struct LocalLogReader<R: Read> {
    source: R,
    position: u64,
}

impl<R: Read> LocalLogReader<R> {
    /// Wrap a source already positioned at `position`.
    pub fn new(source: R, position: u64) -> Self {
        LocalLogReader { source, position }
    }

    /// Offset of the next event.
    pub fn position(&self) -> u64 {
        self.position
    }
}

impl<R: Read + Seek> LocalLogReader<R> {
    /// Probe the log format, then position the reader at `start_position`.
    pub fn open_seekable(mut source: R, start_position: u64) -> Result<(Self, Probe), RplError> {
        let probe = probe_initial(&mut source, start_position)?;
        source.seek(SeekFrom::Start(start_position)).map_err(|e| {
            RplError::Io(format!("Cannot seek to offset {}: {}", start_position, e))
        })?;
        Ok((LocalLogReader::new(source, start_position), probe))
    }
}

impl LocalLogReader<BufReader<File>> {
    /// Open and probe a binlog file.
    pub fn open(path: &Path, start_position: u64) -> Result<(Self, Probe), RplError> {
        let file = File::open(path)
            .map_err(|e| RplError::Io(format!("Cannot open {}: {}", path.display(), e)))?;
        Self::open_seekable(BufReader::new(file), start_position)
    }
}

impl<R: Read> LocalLogReader<R> {
    /// Non-seekable input: discard `start_position` bytes (the magic number
    /// included) and read from there. The format is not probed.
    pub fn unseekable(mut source: R, start_position: u64) -> Result<Self, RplError> {
        let mut remaining = start_position;
        let mut buf = [0u8; 4096];
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            if read_fully(&mut source, &mut buf[..want])? < want {
                return Err(RplError::Io("Failed reading from file.".to_string()));
            }
            remaining -= want as u64;
        }
        Ok(LocalLogReader::new(source, start_position))
    }
}

impl<R: Read> EventSource for LocalLogReader<R> {
    /// A corrupt or truncated event ends the stream quietly when the active
    /// description says the log is still in use; otherwise it is fatal.
    fn next_event(&mut self, ctx: &mut DecodeContext) -> Result<Option<SourcedEvent>, RplError> {
        let position = self.position;
        let problem = match read_raw_event(&mut self.source, ctx.format.header_length)? {
            RawRead::Eof => return Ok(None),
            RawRead::Corrupt(msg) => msg,
            RawRead::Event(raw) => match decode(&raw, ctx) {
                Ok(event) => {
                    self.position += raw.len() as u64;
                    return Ok(Some(SourcedEvent {
                        position,
                        raw,
                        event,
                    }));
                }
                Err(e) => e.to_string(),
            },
        };
        if ctx.format.is_in_use() {
            debug!(position, problem = %problem, "log in use, treating unreadable event as end of log");
            return Ok(None);
        }
        warn!(position, "{}", problem);
        Err(RplError::Parse(format!(
            "Could not read entry at offset {}: Error in log format or read error.",
            position
        )))
    }
}

/// Event stream from a replication connection.
pub struct RemoteLogReader<C: BinlogConnection> {
    conn: C,
    log_name: String,
    position: u64,
    to_last_log: bool,
}

impl<C: BinlogConnection> RemoteLogReader<C> {
    /// Send the dump request and return a reader for the reply stream.
    pub fn start(
        mut conn: C,
        log_name: &str,
        start_position: u64,
        to_last_log: bool,
        flags: u16,
    ) -> Result<Self, RplError> {
        let request = DumpRequest {
            position: start_position as u32,
            flags,
            server_id: 0,
            log_name: log_name.to_string(),
        };
        conn.request_dump(&request)?;
        Ok(RemoteLogReader {
            conn,
            log_name: log_name.to_string(),
            position: start_position,
            to_last_log,
        })
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    pub fn into_inner(self) -> C {
        self.conn
    }
}

impl<C: BinlogConnection> EventSource for RemoteLogReader<C> {
    fn next_event(&mut self, ctx: &mut DecodeContext) -> Result<Option<SourcedEvent>, RplError> {
        loop {
            let packet = self.conn.read_packet().map_err(|e| {
                RplError::Remote(format!("Got error reading packet from server: {}", e))
            })?;
            if packet.len() < PACKET_EOF_MAX_LEN && packet.first() == Some(&PACKET_EOF_MARKER) {
                return Ok(None);
            }
            let raw = packet.get(1..).unwrap_or_default().to_vec();
            let event = decode(&raw, ctx).map_err(|e| {
                RplError::Parse(format!("Could not construct log event object: {}", e))
            })?;

            let mut advance = raw.len() as u64;
            match &event.body {
                // Server-generated Rotate: timestamp 0, not part of the log.
                EventBody::Rotate(rotate) if event.header.timestamp == 0 => {
                    if !self.to_last_log {
                        if rotate.new_log_ident.as_bytes() != self.log_name.as_bytes() {
                            debug!(next = %rotate.new_log_ident, "end of requested log");
                            return Ok(None);
                        }
                        continue;
                    }
                    advance = 0;
                }
                // Sent unprompted when the dump starts past offset 4.
                EventBody::FormatDescription(_) if self.position != BIN_LOG_HEADER_SIZE => {
                    advance = 0;
                }
                _ => {}
            }

            let position = self.position;
            self.position += advance;
            return Ok(Some(SourcedEvent {
                position,
                raw,
                event,
            }));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binlog::codec::encode;
    use crate::binlog::event_type::EventType;
    use crate::binlog::events::QueryEvent;
    use crate::binlog::format::FormatDescription;
    use crate::binlog::header::EventHeader;
    use std::io::Cursor;

    fn query_bytes(fd: &FormatDescription, sql: &str) -> Vec<u8> {
        let ev = LogEvent {
            header: EventHeader {
                type_code: EventType::Query.code(),
                ..Default::default()
            },
            body: EventBody::Query(QueryEvent::new("test", sql.as_bytes())),
        };
        encode(&ev, fd).unwrap()
    }

    #[test]
    fn test_read_raw_event_eof_and_truncation() {
        let fd = FormatDescription::new(4).unwrap();
        let bytes = query_bytes(&fd, "SELECT 1");
        let mut src = Cursor::new(bytes.clone());
        assert!(matches!(read_raw_event(&mut src, 19).unwrap(), RawRead::Event(ref r) if r == &bytes));
        assert!(matches!(read_raw_event(&mut src, 19).unwrap(), RawRead::Eof));

        let mut short = Cursor::new(bytes[..bytes.len() - 2].to_vec());
        assert!(matches!(read_raw_event(&mut short, 19).unwrap(), RawRead::Corrupt(_)));
        let mut header_only = Cursor::new(bytes[..7].to_vec());
        assert!(matches!(read_raw_event(&mut header_only, 19).unwrap(), RawRead::Corrupt(_)));
    }

    #[test]
    fn test_local_reader_positions() {
        let fd = FormatDescription::new(4).unwrap();
        let a = query_bytes(&fd, "INSERT INTO t VALUES (1)");
        let b = query_bytes(&fd, "INSERT INTO t VALUES (2)");
        let mut stream = a.clone();
        stream.extend_from_slice(&b);
        let mut reader = LocalLogReader::new(Cursor::new(stream), 4);
        let mut ctx = DecodeContext::new(fd);
        let first = reader.next_event(&mut ctx).unwrap().unwrap();
        let second = reader.next_event(&mut ctx).unwrap().unwrap();
        assert_eq!(first.position, 4);
        assert_eq!(second.position, 4 + a.len() as u64);
        assert!(reader.next_event(&mut ctx).unwrap().is_none());
    }

    #[test]
    fn test_truncation_is_soft_when_in_use() {
        let mut fd = FormatDescription::new(4).unwrap();
        let bytes = query_bytes(&fd, "SELECT 1");
        let cut = bytes[..bytes.len() - 3].to_vec();

        let mut reader = LocalLogReader::new(Cursor::new(cut.clone()), 4);
        let mut ctx = DecodeContext::new(fd.clone());
        let err = reader.next_event(&mut ctx).unwrap_err();
        assert!(err.to_string().contains("Could not read entry at offset 4"));

        fd.flags = LOG_EVENT_BINLOG_IN_USE_F;
        let mut reader = LocalLogReader::new(Cursor::new(cut), 4);
        let mut ctx = DecodeContext::new(fd);
        assert!(reader.next_event(&mut ctx).unwrap().is_none());
    }

    #[test]
    fn test_unseekable_skips_prefix() {
        let fd = FormatDescription::new(4).unwrap();
        let mut stream = BINLOG_MAGIC.to_vec();
        stream.extend_from_slice(&query_bytes(&fd, "SELECT 2"));
        let mut reader = LocalLogReader::unseekable(Cursor::new(stream), 4).unwrap();
        let mut ctx = DecodeContext::new(fd);
        let ev = reader.next_event(&mut ctx).unwrap().unwrap();
        assert_eq!(ev.position, 4);

        assert!(LocalLogReader::unseekable(Cursor::new(vec![0u8; 2]), 4).is_err());
    }
}
