//! Event decoding and encoding.
//!
//! [`decode`] turns one complete raw event into a [`LogEvent`] using the
//! active [`FormatDescription`] held in a [`DecodeContext`]; [`encode`] is
//! its inverse. The context also carries the Table_map registry so that
//! rows events can be checked against the tables mapped earlier in the same
//! stream.

use tracing::debug;

use crate::binlog::constants::*;
use crate::binlog::event_type::{EventType, ENUM_END_EVENT};
use crate::binlog::events::*;
use crate::binlog::format::{verify_checksum, FormatDescription};
use crate::binlog::header::{peek_event_length, EventHeader};
use crate::binlog::rows::{RowsEvent, TableMapEvent, TableMapRegistry};
use crate::RplError;

/// Per-stream decoding state.
#[derive(Debug, Clone)]
pub struct DecodeContext {
    pub format: FormatDescription,
    pub table_maps: TableMapRegistry,
    /// Decode types without a decoder as [`EventBody::Unknown`] instead of
    /// failing.
    pub force: bool,
}

impl DecodeContext {
    pub fn new(format: FormatDescription) -> Self {
        DecodeContext {
            format,
            table_maps: TableMapRegistry::new(),
            force: false,
        }
    }

    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    /// Make `format` the active description. The previous one is dropped.
    pub fn replace_format(&mut self, format: FormatDescription) {
        debug!(
            binlog_version = format.binlog_version,
            header_length = format.header_length,
            checksum = format.checksum_present,
            "format description replaced"
        );
        self.format = format;
    }
}

/// Decode one complete event (header included).
///
/// Checks that the length field matches the buffer and that the type code
/// is valid before anything else. Version 3 positions are converted from
/// "start of this event" to "start of the next event".
pub fn decode(buf: &[u8], ctx: &mut DecodeContext) -> Result<LogEvent, RplError> {
    let declared = peek_event_length(buf)
        .filter(|_| buf.len() >= OLD_HEADER_LEN)
        .ok_or_else(|| RplError::Parse(format!("event is too short ({} bytes)", buf.len())))?;
    if declared as usize != buf.len() {
        return Err(RplError::Parse(format!(
            "event length {} does not match the {} bytes read",
            declared,
            buf.len()
        )));
    }
    let type_code = buf[EVENT_TYPE_OFFSET];
    if type_code >= ENUM_END_EVENT {
        return Err(RplError::Parse(format!("invalid event type code {}", type_code)));
    }

    if type_code == EventType::FormatDescription.code() {
        let fd = FormatDescription::decode(buf)?;
        let header = EventHeader::parse(buf, LOG_EVENT_MINIMAL_HEADER_LEN)
            .ok_or_else(|| RplError::Parse("Format_desc event is truncated".to_string()))?;
        return Ok(LogEvent {
            header,
            body: EventBody::FormatDescription(fd),
        });
    }

    let fmt = &ctx.format;
    let header_len = fmt.header_length;
    let post_len = fmt.post_header_len(type_code).ok_or_else(|| {
        RplError::Parse(format!(
            "event type {} is not covered by the active format description",
            type_code
        ))
    })?;
    let data = if fmt.checksum_present {
        verify_checksum(buf)?;
        &buf[..buf.len() - BINLOG_CHECKSUM_LEN]
    } else {
        buf
    };
    let event_type = EventType::from_u8(type_code).unwrap_or(EventType::Unknown);
    if data.len() < header_len + post_len {
        return Err(RplError::Parse(format!(
            "{} event is truncated ({} bytes)",
            event_type.name(),
            buf.len()
        )));
    }

    let mut header = EventHeader::parse(data, header_len)
        .ok_or_else(|| RplError::Parse("event header is truncated".to_string()))?;
    if fmt.binlog_version == 3
        && type_code < EventType::FormatDescription.code()
        && header.next_position != 0
    {
        header.next_position += u64::from(header.event_length);
    }

    let body = &data[header_len..];
    let (post, rest) = body.split_at(post_len);
    let load_post_len = || {
        fmt.post_header_len(EventType::Load.code())
            .unwrap_or(LOAD_HEADER_LEN)
    };

    let body = match event_type {
        EventType::StartV3 => EventBody::StartV3(StartV3Event::parse(post)?),
        EventType::Stop => EventBody::Stop,
        EventType::Query => EventBody::Query(QueryEvent::parse(post, rest, "Query")?),
        EventType::Rotate => EventBody::Rotate(RotateEvent::parse(post, rest)?),
        EventType::Load | EventType::NewLoad => {
            let new_format = event_type == EventType::NewLoad;
            EventBody::Load(LoadEvent::parse(post, rest, new_format, false)?.0)
        }
        EventType::CreateFile => {
            EventBody::CreateFile(CreateFileEvent::parse(load_post_len(), post_len, body)?)
        }
        EventType::AppendBlock => {
            EventBody::AppendBlock(AppendBlockEvent::parse(post, rest, "Append_block")?)
        }
        EventType::BeginLoadQuery => {
            EventBody::BeginLoadQuery(AppendBlockEvent::parse(post, rest, "Begin_load_query")?)
        }
        EventType::ExecLoad => EventBody::ExecLoad(FileIdEvent::parse(post, "Exec_load")?),
        EventType::DeleteFile => EventBody::DeleteFile(FileIdEvent::parse(post, "Delete_file")?),
        EventType::ExecuteLoadQuery => {
            EventBody::ExecuteLoadQuery(ExecuteLoadQueryEvent::parse(post, rest)?)
        }
        EventType::Xid => EventBody::Xid(XidEvent {
            xid: FieldReader::new(rest, "Xid").uint(8)?,
        }),
        EventType::TableMap => {
            let map = TableMapEvent::parse(post, rest)?;
            ctx.table_maps.insert(map.clone());
            EventBody::TableMap(map)
        }
        EventType::WriteRows => EventBody::WriteRows(RowsEvent::parse(
            post,
            rest,
            false,
            &ctx.table_maps,
            "Write_rows",
        )?),
        EventType::UpdateRows => EventBody::UpdateRows(RowsEvent::parse(
            post,
            rest,
            true,
            &ctx.table_maps,
            "Update_rows",
        )?),
        EventType::DeleteRows => EventBody::DeleteRows(RowsEvent::parse(
            post,
            rest,
            false,
            &ctx.table_maps,
            "Delete_rows",
        )?),
        EventType::Incident => EventBody::Incident(IncidentEvent::parse(post, rest)?),
        EventType::FormatDescription => EventBody::FormatDescription(FormatDescription::decode(buf)?),
        EventType::Unknown
        | EventType::Intvar
        | EventType::Slave
        | EventType::Rand
        | EventType::UserVar
        | EventType::PreGaWriteRows
        | EventType::PreGaUpdateRows
        | EventType::PreGaDeleteRows
        | EventType::Heartbeat => {
            if !ctx.force {
                return Err(RplError::Parse(format!(
                    "Found invalid event in binary log (type code {})",
                    type_code
                )));
            }
            EventBody::Unknown(body.to_vec())
        }
    };
    Ok(LogEvent { header, body })
}

/// Encode an event under `format`. Length, positions and checksum are
/// recomputed; the header's `event_length` is ignored.
pub fn encode(event: &LogEvent, format: &FormatDescription) -> Result<Vec<u8>, RplError> {
    let type_code = event.header.type_code;
    let (header_len, checksum) = match &event.body {
        EventBody::FormatDescription(fd) => (LOG_EVENT_MINIMAL_HEADER_LEN, fd.checksum_present),
        _ => (format.header_length, format.checksum_present),
    };
    let post_len = |code: u8| {
        format.post_header_len(code).ok_or_else(|| {
            RplError::Argument(format!(
                "event type {} is not covered by the format description",
                code
            ))
        })
    };

    let mut out = Vec::with_capacity(header_len + 64);
    out.resize(header_len, 0);
    match &event.body {
        EventBody::FormatDescription(fd) => fd.write_body(&mut out),
        EventBody::StartV3(ev) => ev.write(&mut out, post_len(type_code)?),
        EventBody::Stop => {}
        EventBody::Query(ev) => ev.write(&mut out, post_len(type_code)?),
        EventBody::Rotate(ev) => ev.write(&mut out, post_len(type_code)?),
        EventBody::Load(ev) => ev.write(
            &mut out,
            post_len(type_code)?,
            type_code != EventType::Load.code(),
        ),
        EventBody::CreateFile(ev) => ev.write(
            &mut out,
            post_len(EventType::Load.code())?,
            post_len(type_code)?,
        ),
        EventBody::AppendBlock(ev) | EventBody::BeginLoadQuery(ev) => {
            ev.write(&mut out, post_len(type_code)?)
        }
        EventBody::ExecLoad(ev) | EventBody::DeleteFile(ev) => {
            ev.write(&mut out, post_len(type_code)?)
        }
        EventBody::ExecuteLoadQuery(ev) => ev.write(&mut out, post_len(type_code)?),
        EventBody::Xid(ev) => {
            let start = out.len();
            fit_post_header(&mut out, start, post_len(type_code)?);
            out.extend_from_slice(&ev.xid.to_le_bytes());
        }
        EventBody::TableMap(ev) => ev.write(&mut out, post_len(type_code)?),
        EventBody::WriteRows(ev) | EventBody::UpdateRows(ev) | EventBody::DeleteRows(ev) => {
            ev.write(&mut out, post_len(type_code)?)
        }
        EventBody::Incident(ev) => ev.write(&mut out, post_len(type_code)?),
        EventBody::Unknown(raw) => out.extend_from_slice(raw),
    }

    let total = out.len() + if checksum { BINLOG_CHECKSUM_LEN } else { 0 };
    let mut header = event.header;
    header.event_length = total as u32;
    if format.binlog_version == 3
        && type_code < EventType::FormatDescription.code()
        && header.next_position != 0
    {
        header.next_position = header.next_position.saturating_sub(total as u64);
    }
    let mut head = Vec::with_capacity(header_len);
    header.write_to(&mut head, header_len);
    out[..header_len].copy_from_slice(&head);

    if checksum {
        let crc = crc32fast::hash(&out);
        out.extend_from_slice(&crc.to_le_bytes());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(t: EventType) -> EventHeader {
        EventHeader {
            timestamp: 1_262_304_000,
            type_code: t.code(),
            server_id: 1,
            event_length: 0,
            next_position: 500,
            flags: 0,
        }
    }

    fn round_trip(ev: &LogEvent, ctx: &mut DecodeContext) -> LogEvent {
        let bytes = encode(ev, &ctx.format).unwrap();
        let mut decoded = decode(&bytes, ctx).unwrap();
        assert_eq!(decoded.header.event_length as usize, bytes.len());
        decoded.header.event_length = 0;
        decoded
    }

    #[test]
    fn test_query_round_trip_v4() {
        let mut ctx = DecodeContext::new(FormatDescription::new(4).unwrap());
        let ev = LogEvent {
            header: header(EventType::Query),
            body: EventBody::Query(QueryEvent::new("test", b"CREATE TABLE t (a INT)")),
        };
        assert_eq!(round_trip(&ev, &mut ctx), ev);
    }

    #[test]
    fn test_v3_positions_are_relative() {
        let mut ctx = DecodeContext::new(FormatDescription::new(3).unwrap());
        let ev = LogEvent {
            header: header(EventType::Query),
            body: EventBody::Query(QueryEvent::new("d", b"DELETE FROM t")),
        };
        let bytes = encode(&ev, &ctx.format).unwrap();
        let stored = u32::from_le_bytes(bytes[13..17].try_into().unwrap());
        assert_eq!(stored as usize, 500 - bytes.len());
        assert_eq!(decode(&bytes, &mut ctx).unwrap().header.next_position, 500);
    }

    #[test]
    fn test_v1_rotate_has_no_position() {
        let mut ctx = DecodeContext::new(FormatDescription::new(1).unwrap());
        let mut h = header(EventType::Rotate);
        h.next_position = 0;
        let ev = LogEvent {
            header: h,
            body: EventBody::Rotate(RotateEvent {
                position: 4,
                new_log_ident: "log.002".into(),
            }),
        };
        let bytes = encode(&ev, &ctx.format).unwrap();
        assert_eq!(bytes.len(), 13 + 7);
        assert_eq!(round_trip(&ev, &mut ctx), ev);
    }

    #[test]
    fn test_create_file_keeps_block() {
        let mut ctx = DecodeContext::new(FormatDescription::new(4).unwrap());
        let ev = LogEvent {
            header: header(EventType::CreateFile),
            body: EventBody::CreateFile(CreateFileEvent {
                load: LoadEvent {
                    thread_id: 3,
                    exec_time: 0,
                    skip_lines: 1,
                    table_name: "t".into(),
                    db: "test".into(),
                    fname: "/tmp/data.txt".into(),
                    sql_ex: SqlEx {
                        field_term: b"\t".to_vec(),
                        enclosed: Vec::new(),
                        line_term: b"\n".to_vec(),
                        line_start: Vec::new(),
                        escaped: b"\\".to_vec(),
                        opt_flags: 0,
                    },
                    fields: vec!["a".into(), "b".into()],
                },
                file_id: 11,
                block: b"1\t2\n3\t4\n".to_vec(),
            }),
        };
        assert_eq!(round_trip(&ev, &mut ctx), ev);
    }

    #[test]
    fn test_checksummed_events() {
        let mut fd = FormatDescription::new(4).unwrap();
        fd.checksum_present = true;
        let mut ctx = DecodeContext::new(fd);
        let ev = LogEvent {
            header: header(EventType::Xid),
            body: EventBody::Xid(XidEvent { xid: 42 }),
        };
        let mut bytes = encode(&ev, &ctx.format).unwrap();
        assert_eq!(bytes.len(), 19 + 8 + 4);
        assert_eq!(round_trip(&ev, &mut ctx), ev);
        bytes[20] ^= 1;
        assert!(decode(&bytes, &mut ctx).is_err());
    }

    #[test]
    fn test_sanity_checks() {
        let mut ctx = DecodeContext::new(FormatDescription::new(4).unwrap());
        let ev = LogEvent {
            header: header(EventType::Stop),
            body: EventBody::Stop,
        };
        let mut bytes = encode(&ev, &ctx.format).unwrap();
        bytes.push(0);
        assert!(decode(&bytes, &mut ctx).is_err());
        bytes.pop();
        bytes[EVENT_TYPE_OFFSET] = ENUM_END_EVENT;
        assert!(decode(&bytes, &mut ctx).is_err());
        assert!(decode(&[0u8; 5], &mut ctx).is_err());
    }

    #[test]
    fn test_undecoded_types_need_force() {
        let mut ctx = DecodeContext::new(FormatDescription::new(4).unwrap());
        let mut bytes = vec![0u8; 19 + 9];
        bytes[EVENT_TYPE_OFFSET] = EventType::Intvar.code();
        bytes[EVENT_LEN_OFFSET] = bytes.len() as u8;
        assert!(decode(&bytes, &mut ctx).is_err());
        ctx.force = true;
        let ev = decode(&bytes, &mut ctx).unwrap();
        assert!(matches!(ev.body, EventBody::Unknown(ref raw) if raw.len() == 9));
    }

    #[test]
    fn test_type_outside_format_table() {
        let mut ctx = DecodeContext::new(FormatDescription::new(3).unwrap()).with_force(true);
        let mut bytes = vec![0u8; 19 + 8];
        bytes[EVENT_TYPE_OFFSET] = EventType::Xid.code();
        bytes[EVENT_LEN_OFFSET] = bytes.len() as u8;
        assert!(decode(&bytes, &mut ctx).is_err());
    }

    #[test]
    fn test_table_map_registers() {
        let mut ctx = DecodeContext::new(FormatDescription::new(4).unwrap());
        let ev = LogEvent {
            header: header(EventType::TableMap),
            body: EventBody::TableMap(TableMapEvent {
                table_id: 5,
                flags: 0,
                db: "d".into(),
                table: "t".into(),
                column_types: vec![3],
                metadata: Vec::new(),
                null_bits: Vec::new(),
            }),
        };
        round_trip(&ev, &mut ctx);
        assert!(ctx.table_maps.get(5).is_some());
    }
}
