//! Format description state.
//!
//! A [`FormatDescription`] says how to cut the events that follow it: the
//! common header length and, per event type, the length of the fixed
//! post-header. Exactly one description is active while a stream is decoded.
//! It starts out as a built-in description chosen by probing the log (local
//! files, see [`probe_initial`]) or by asking the server for its version
//! ([`FormatDescription::from_version_string`]), and is replaced every time a
//! FORMAT_DESCRIPTION event goes by.
//!
//! ## Binlog versions
//!
//! | Version | Server | Header | Notes |
//! |---------|--------|--------|-------|
//! | 1 | 3.23 | 13 bytes | no next-position or flags; Rotate has no position |
//! | 3 | 4.0.2+ | 19 bytes | positions are stored relative to the event start |
//! | 4 | 5.0+ | 19+ bytes | layout declared by a FORMAT_DESCRIPTION event |

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;
use std::io::{Read, Seek, SeekFrom};

use crate::binlog::codec::{decode, DecodeContext};
use crate::binlog::constants::*;
use crate::binlog::event_type::EventType;
use crate::binlog::reader::{read_fully, read_raw_event, RawRead, SourcedEvent};
use crate::RplError;

/// Server version written into built-in version 4 descriptions.
pub const DEFAULT_SERVER_VERSION: &str = "7.0.0-drizzle";

/// How to interpret the events of a log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FormatDescription {
    /// 1, 3 or 4.
    pub binlog_version: u16,
    pub server_version: String,
    /// Creation time of the log, or 0 when the log was not started at server startup.
    pub created: u32,
    /// Common header length for every event except FormatDescription.
    pub header_length: usize,
    /// Post-header length per event type; index 0 is type code 1.
    pub post_header_lengths: Vec<u8>,
    /// Every event ends with a CRC32 of the bytes before it.
    pub checksum_present: bool,
    /// Header flags of the event that installed this description.
    pub flags: u16,
}

impl FormatDescription {
    /// Built-in description for a binlog version (1, 3 or 4).
    ///
    /// # Examples
    ///
    /// ```
    /// use rpl::binlog::format::FormatDescription;
    ///
    /// let v1 = FormatDescription::new(1).unwrap();
    /// assert_eq!(v1.header_length, 13);
    /// let v4 = FormatDescription::new(4).unwrap();
    /// assert_eq!(v4.header_length, 19);
    /// assert!(FormatDescription::new(2).is_err());
    /// ```
    pub fn new(binlog_version: u16) -> Result<Self, RplError> {
        match binlog_version {
            1 | 3 => {
                let mut lens = vec![0u8; EventType::FormatDescription.code() as usize - 1];
                let set = |lens: &mut Vec<u8>, t: EventType, len: usize| {
                    lens[t.code() as usize - 1] = len as u8;
                };
                set(&mut lens, EventType::StartV3, START_V3_HEADER_LEN);
                set(&mut lens, EventType::Query, QUERY_HEADER_MINIMAL_LEN);
                set(
                    &mut lens,
                    EventType::Rotate,
                    if binlog_version == 1 { 0 } else { ROTATE_HEADER_LEN },
                );
                set(&mut lens, EventType::Load, LOAD_HEADER_LEN);
                set(&mut lens, EventType::CreateFile, CREATE_FILE_HEADER_LEN);
                set(&mut lens, EventType::AppendBlock, APPEND_BLOCK_HEADER_LEN);
                set(&mut lens, EventType::ExecLoad, EXEC_LOAD_HEADER_LEN);
                set(&mut lens, EventType::DeleteFile, DELETE_FILE_HEADER_LEN);
                set(&mut lens, EventType::NewLoad, LOAD_HEADER_LEN);
                Ok(FormatDescription {
                    binlog_version,
                    server_version: if binlog_version == 1 { "3.23" } else { "4.0" }.to_string(),
                    created: 0,
                    header_length: if binlog_version == 1 {
                        OLD_HEADER_LEN
                    } else {
                        LOG_EVENT_MINIMAL_HEADER_LEN
                    },
                    post_header_lengths: lens,
                    checksum_present: false,
                    flags: 0,
                })
            }
            4 => {
                let mut lens = vec![0u8; LOG_EVENT_TYPES];
                let set = |lens: &mut Vec<u8>, t: EventType, len: usize| {
                    lens[t.code() as usize - 1] = len as u8;
                };
                set(&mut lens, EventType::StartV3, START_V3_HEADER_LEN);
                set(&mut lens, EventType::Query, QUERY_HEADER_LEN);
                set(&mut lens, EventType::Rotate, ROTATE_HEADER_LEN);
                set(&mut lens, EventType::Load, LOAD_HEADER_LEN);
                set(&mut lens, EventType::CreateFile, CREATE_FILE_HEADER_LEN);
                set(&mut lens, EventType::AppendBlock, APPEND_BLOCK_HEADER_LEN);
                set(&mut lens, EventType::ExecLoad, EXEC_LOAD_HEADER_LEN);
                set(&mut lens, EventType::DeleteFile, DELETE_FILE_HEADER_LEN);
                set(&mut lens, EventType::NewLoad, LOAD_HEADER_LEN);
                set(&mut lens, EventType::FormatDescription, FORMAT_DESCRIPTION_HEADER_LEN);
                set(&mut lens, EventType::TableMap, TABLE_MAP_HEADER_LEN);
                set(&mut lens, EventType::WriteRows, ROWS_HEADER_LEN);
                set(&mut lens, EventType::UpdateRows, ROWS_HEADER_LEN);
                set(&mut lens, EventType::DeleteRows, ROWS_HEADER_LEN);
                set(&mut lens, EventType::BeginLoadQuery, APPEND_BLOCK_HEADER_LEN);
                set(&mut lens, EventType::ExecuteLoadQuery, EXECUTE_LOAD_QUERY_HEADER_LEN);
                set(&mut lens, EventType::Incident, INCIDENT_HEADER_LEN);
                Ok(FormatDescription {
                    binlog_version,
                    server_version: DEFAULT_SERVER_VERSION.to_string(),
                    created: 0,
                    header_length: LOG_EVENT_HEADER_LEN,
                    post_header_lengths: lens,
                    checksum_present: false,
                    flags: 0,
                })
            }
            v => Err(RplError::Argument(format!(
                "Unsupported binlog version {}",
                v
            ))),
        }
    }

    /// Bootstrap description for a remote server, from its `VERSION()`.
    ///
    /// 3.x servers write version 1 logs. 4.x servers write version 3 logs.
    /// 5.x and 6.x servers send their own FORMAT_DESCRIPTION right away, and
    /// version 3 is enough to read it.
    pub fn from_version_string(server_version: &str) -> Result<Self, RplError> {
        match server_version.as_bytes().first() {
            Some(b'3') => Self::new(1),
            Some(b'4') | Some(b'5') | Some(b'6') => Self::new(3),
            _ => Err(RplError::Remote(format!(
                "Could not find server version: Master reported unrecognized server version '{}'.",
                server_version
            ))),
        }
    }

    /// Post-header length for a type code, or `None` if this description
    /// does not cover the type.
    pub fn post_header_len(&self, type_code: u8) -> Option<usize> {
        if type_code == 0 {
            return None;
        }
        self.post_header_lengths
            .get(type_code as usize - 1)
            .map(|&len| len as usize)
    }

    /// Number of event types this description covers.
    pub fn number_of_event_types(&self) -> usize {
        self.post_header_lengths.len()
    }

    /// True if the log was not closed cleanly (still being written, or the
    /// server crashed).
    pub fn is_in_use(&self) -> bool {
        self.flags & LOG_EVENT_BINLOG_IN_USE_F != 0
    }

    /// Decode a complete FORMAT_DESCRIPTION event, header included.
    ///
    /// The header always ends at byte 19. A trailing checksum-algorithm byte
    /// plus CRC32 is recognised from the description's own post-header
    /// length, which covers exactly the fixed part and the type table.
    pub fn decode(event: &[u8]) -> Result<Self, RplError> {
        let body = event
            .get(LOG_EVENT_MINIMAL_HEADER_LEN..)
            .filter(|b| b.len() > ST_COMMON_HEADER_LEN_OFFSET)
            .ok_or_else(|| RplError::Parse("Format_desc event is truncated".to_string()))?;
        let flags = LittleEndian::read_u16(&event[FLAGS_OFFSET..]);

        let binlog_version = LittleEndian::read_u16(&body[ST_BINLOG_VER_OFFSET..]);
        let server_version =
            fixed_cstr(&body[ST_SERVER_VER_OFFSET..ST_SERVER_VER_OFFSET + ST_SERVER_VER_LEN]);
        let created = LittleEndian::read_u32(&body[ST_CREATED_OFFSET..]);
        let header_length = body[ST_COMMON_HEADER_LEN_OFFSET] as usize;
        if header_length < OLD_HEADER_LEN {
            return Err(RplError::Parse(format!(
                "Format_desc event declares a {}-byte header",
                header_length
            )));
        }

        let table = &body[ST_COMMON_HEADER_LEN_OFFSET + 1..];
        let fd_index = EventType::FormatDescription.code() as usize - 1;
        let mut type_count = table.len();
        let mut checksum_present = false;
        if let Some(own) = table
            .get(fd_index)
            .and_then(|&l| (l as usize).checked_sub(ST_COMMON_HEADER_LEN_OFFSET + 1))
        {
            if own > fd_index && table.len() == own + 1 + BINLOG_CHECKSUM_LEN {
                type_count = own;
                checksum_present = table[own] == BINLOG_CHECKSUM_ALG_CRC32;
                if checksum_present {
                    verify_checksum(event)?;
                }
            }
        }

        Ok(FormatDescription {
            binlog_version,
            server_version,
            created,
            header_length,
            post_header_lengths: table[..type_count].to_vec(),
            checksum_present,
            flags,
        })
    }

    /// Append the body (everything after the 19-byte header, checksum
    /// excluded) to `out`.
    pub(crate) fn write_body(&self, out: &mut Vec<u8>) {
        let start = out.len();
        out.resize(start + ST_COMMON_HEADER_LEN_OFFSET + 1, 0);
        let buf = &mut out[start..];
        LittleEndian::write_u16(&mut buf[ST_BINLOG_VER_OFFSET..], self.binlog_version);
        let ver = self.server_version.as_bytes();
        let n = ver.len().min(ST_SERVER_VER_LEN - 1);
        buf[ST_SERVER_VER_OFFSET..ST_SERVER_VER_OFFSET + n].copy_from_slice(&ver[..n]);
        LittleEndian::write_u32(&mut buf[ST_CREATED_OFFSET..], self.created);
        buf[ST_COMMON_HEADER_LEN_OFFSET] = self.header_length as u8;
        out.extend_from_slice(&self.post_header_lengths);
        if self.checksum_present {
            out.push(BINLOG_CHECKSUM_ALG_CRC32);
        }
    }
}

/// Check the trailing CRC32 of a raw event.
pub(crate) fn verify_checksum(event: &[u8]) -> Result<(), RplError> {
    if event.len() < LOG_EVENT_MINIMAL_HEADER_LEN + BINLOG_CHECKSUM_LEN {
        return Err(RplError::Parse("event too short to carry a checksum".to_string()));
    }
    let split = event.len() - BINLOG_CHECKSUM_LEN;
    let stored = LittleEndian::read_u32(&event[split..]);
    let computed = crc32fast::hash(&event[..split]);
    if stored != computed {
        return Err(RplError::Parse(format!(
            "event checksum mismatch: stored 0x{:08x}, computed 0x{:08x}",
            stored, computed
        )));
    }
    Ok(())
}

fn fixed_cstr(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Result of probing the start of a local log.
#[derive(Debug)]
pub struct Probe {
    /// Description to decode the requested range with.
    pub format: FormatDescription,
    /// FORMAT_DESCRIPTION events found before the start offset, in order.
    pub format_events: Vec<SourcedEvent>,
}

/// Work out the format of a local log before reading it for real.
///
/// Starts from a version 3 description, checks the magic number and then
/// looks at successive events from offset 4:
///
/// - a START_EVENT_V3 shorter than a version 4 start event marks a 3.23 log
///   (version 1); probing stops at the first start event either way;
/// - nothing at or after `start_position` is consumed;
/// - FORMAT_DESCRIPTION events are decoded and adopted;
/// - ROTATE events are skipped;
/// - anything else ends the probe.
///
/// The source is left at the position it had on entry.
pub fn probe_initial<R: Read + Seek>(
    source: &mut R,
    start_position: u64,
) -> Result<Probe, RplError> {
    let saved = source
        .stream_position()
        .map_err(|e| RplError::Io(format!("Cannot query file position: {}", e)))?;
    let seek = |source: &mut R, pos: u64| {
        source
            .seek(SeekFrom::Start(pos))
            .map(|_| ())
            .map_err(|e| RplError::Io(format!("Cannot seek to offset {}: {}", pos, e)))
    };

    seek(source, 0)?;
    let mut magic = [0u8; BINLOG_MAGIC.len()];
    if read_fully(source, &mut magic)? < magic.len() {
        return Err(RplError::Parse(
            "Failed reading header; probably an empty file.".to_string(),
        ));
    }
    if magic != BINLOG_MAGIC {
        return Err(RplError::Parse("File is not a binary log file.".to_string()));
    }

    let mut ctx = DecodeContext::new(FormatDescription::new(3)?);
    let mut format_events = Vec::new();
    let mut pos = BIN_LOG_HEADER_SIZE;
    loop {
        seek(source, pos)?;
        let mut window = [0u8; PROBE_HEADER_LEN];
        if read_fully(source, &mut window)? < PROBE_HEADER_LEN {
            // Fewer than one header's worth left: the log may still be growing.
            break;
        }
        let type_code = window[EVENT_TYPE_OFFSET];
        let event_len = LittleEndian::read_u32(&window[EVENT_LEN_OFFSET..]) as usize;

        if type_code == EventType::StartV3.code() {
            if event_len < LOG_EVENT_MINIMAL_HEADER_LEN + START_V3_HEADER_LEN {
                ctx.replace_format(FormatDescription::new(1)?);
            }
            break;
        } else if pos >= start_position {
            break;
        } else if type_code == EventType::FormatDescription.code()
            || type_code == EventType::Rotate.code()
        {
            seek(source, pos)?;
            let name = EventType::from_u8(type_code).map(EventType::name).unwrap_or("Unknown");
            let raw = match read_raw_event(source, ctx.format.header_length)? {
                RawRead::Event(raw) => raw,
                RawRead::Eof | RawRead::Corrupt(_) => {
                    return Err(RplError::Parse(format!(
                        "Could not read a {} event at offset {}; this could be a log format error or read error.",
                        name, pos
                    )))
                }
            };
            let event = decode(&raw, &mut ctx).map_err(|e| {
                RplError::Parse(format!(
                    "Could not read a {} event at offset {}: {}",
                    name, pos, e
                ))
            })?;
            let next = pos + raw.len() as u64;
            if type_code == EventType::FormatDescription.code() {
                if let crate::binlog::events::EventBody::FormatDescription(fd) = &event.body {
                    ctx.replace_format(fd.clone());
                }
                format_events.push(SourcedEvent {
                    position: pos,
                    raw,
                    event,
                });
            }
            pos = next;
        } else {
            break;
        }
    }

    seek(source, saved)?;
    Ok(Probe {
        format: ctx.format,
        format_events,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_v4_table() {
        let fd = FormatDescription::new(4).unwrap();
        assert_eq!(fd.number_of_event_types(), LOG_EVENT_TYPES);
        assert_eq!(fd.post_header_len(EventType::Query.code()), Some(13));
        assert_eq!(fd.post_header_len(EventType::ExecuteLoadQuery.code()), Some(26));
        assert_eq!(fd.post_header_len(EventType::FormatDescription.code()), Some(84));
        assert_eq!(fd.post_header_len(EventType::Heartbeat.code()), Some(0));
        assert_eq!(fd.post_header_len(0), None);
        assert_eq!(fd.post_header_len(28), None);
    }

    #[test]
    fn test_v1_and_v3_tables() {
        let v1 = FormatDescription::new(1).unwrap();
        let v3 = FormatDescription::new(3).unwrap();
        assert_eq!(v1.number_of_event_types(), 14);
        assert_eq!(v1.post_header_len(EventType::Rotate.code()), Some(0));
        assert_eq!(v3.post_header_len(EventType::Rotate.code()), Some(8));
        assert_eq!(v3.post_header_len(EventType::Query.code()), Some(11));
        assert_eq!(v3.post_header_len(EventType::TableMap.code()), None);
    }

    #[test]
    fn test_from_version_string() {
        assert_eq!(FormatDescription::from_version_string("3.23.58").unwrap().binlog_version, 1);
        assert_eq!(FormatDescription::from_version_string("4.0.20").unwrap().binlog_version, 3);
        assert_eq!(FormatDescription::from_version_string("5.1.30-log").unwrap().binlog_version, 3);
        assert_eq!(FormatDescription::from_version_string("6.0.4").unwrap().binlog_version, 3);
        assert!(FormatDescription::from_version_string("7.0").is_err());
        assert!(FormatDescription::from_version_string("").is_err());
    }

    fn encode_fd_event(fd: &FormatDescription) -> Vec<u8> {
        let mut body = Vec::new();
        fd.write_body(&mut body);
        let mut event = vec![0u8; LOG_EVENT_MINIMAL_HEADER_LEN];
        event[EVENT_TYPE_OFFSET] = EventType::FormatDescription.code();
        event.extend_from_slice(&body);
        if fd.checksum_present {
            event.extend_from_slice(&[0u8; 4]);
        }
        let len = event.len() as u32;
        LittleEndian::write_u32(&mut event[EVENT_LEN_OFFSET..], len);
        LittleEndian::write_u16(&mut event[FLAGS_OFFSET..], fd.flags);
        if fd.checksum_present {
            let split = event.len() - 4;
            let crc = crc32fast::hash(&event[..split]);
            LittleEndian::write_u32(&mut event[split..], crc);
        }
        event
    }

    #[test]
    fn test_decode_plain() {
        let mut fd = FormatDescription::new(4).unwrap();
        fd.created = 1_230_000_000;
        fd.flags = LOG_EVENT_BINLOG_IN_USE_F;
        let decoded = FormatDescription::decode(&encode_fd_event(&fd)).unwrap();
        assert_eq!(decoded, fd);
        assert!(decoded.is_in_use());
    }

    #[test]
    fn test_decode_with_checksum() {
        let mut fd = FormatDescription::new(4).unwrap();
        fd.checksum_present = true;
        let mut event = encode_fd_event(&fd);
        let decoded = FormatDescription::decode(&event).unwrap();
        assert!(decoded.checksum_present);
        assert_eq!(decoded.number_of_event_types(), LOG_EVENT_TYPES);

        let n = event.len();
        event[n - 1] ^= 0xff;
        assert!(FormatDescription::decode(&event).is_err());
    }

    #[test]
    fn test_decode_rejects_small_header() {
        let mut fd = FormatDescription::new(4).unwrap();
        fd.header_length = 5;
        assert!(FormatDescription::decode(&encode_fd_event(&fd)).is_err());
        assert!(FormatDescription::decode(&[0u8; 30]).is_err());
    }
}
