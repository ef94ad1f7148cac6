//! Common event header.
//!
//! Every event starts with the same fields:
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 4 | timestamp (seconds since epoch) |
//! | 4 | 1 | type code |
//! | 5 | 4 | originating server id |
//! | 9 | 4 | event length, header included |
//! | 13 | 4 | position of the next event (v3/v4 only) |
//! | 17 | 2 | flags (v3/v4 only) |
//!
//! Version 1 logs stop after the event length (13 bytes). Version 4 logs may
//! declare a longer header; the extra bytes are carried as zeros.

use byteorder::{ByteOrder, LittleEndian};
use serde::Serialize;

use crate::binlog::constants::*;
use crate::binlog::event_type::EventType;

/// Decoded common header of one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct EventHeader {
    pub timestamp: u32,
    pub type_code: u8,
    pub server_id: u32,
    /// Total event length, header included.
    pub event_length: u32,
    /// Position of the next event in the originating log, or 0 if unknown.
    pub next_position: u64,
    pub flags: u16,
}

impl EventHeader {
    /// Parse the header fields present in a header of `header_len` bytes.
    ///
    /// Returns `None` if `buf` is shorter than `header_len` or `header_len`
    /// is below the version 1 size.
    ///
    /// # Examples
    ///
    /// ```
    /// use rpl::binlog::header::EventHeader;
    ///
    /// let mut buf = vec![0u8; 19];
    /// buf[4] = 2; // Query
    /// buf[9] = 19; // length
    /// let hdr = EventHeader::parse(&buf, 19).unwrap();
    /// assert_eq!(hdr.type_code, 2);
    /// assert_eq!(hdr.event_length, 19);
    /// ```
    pub fn parse(buf: &[u8], header_len: usize) -> Option<Self> {
        if header_len < OLD_HEADER_LEN || buf.len() < header_len {
            return None;
        }
        let mut hdr = EventHeader {
            timestamp: LittleEndian::read_u32(&buf[EVENT_TIMESTAMP_OFFSET..]),
            type_code: buf[EVENT_TYPE_OFFSET],
            server_id: LittleEndian::read_u32(&buf[SERVER_ID_OFFSET..]),
            event_length: LittleEndian::read_u32(&buf[EVENT_LEN_OFFSET..]),
            next_position: 0,
            flags: 0,
        };
        if header_len >= LOG_EVENT_MINIMAL_HEADER_LEN {
            hdr.next_position = u64::from(LittleEndian::read_u32(&buf[LOG_POS_OFFSET..]));
            hdr.flags = LittleEndian::read_u16(&buf[FLAGS_OFFSET..]);
        }
        Some(hdr)
    }

    /// Append `header_len` bytes of header to `out`.
    pub fn write_to(&self, out: &mut Vec<u8>, header_len: usize) {
        let start = out.len();
        out.resize(start + header_len, 0);
        let buf = &mut out[start..];
        LittleEndian::write_u32(&mut buf[EVENT_TIMESTAMP_OFFSET..], self.timestamp);
        buf[EVENT_TYPE_OFFSET] = self.type_code;
        LittleEndian::write_u32(&mut buf[SERVER_ID_OFFSET..], self.server_id);
        LittleEndian::write_u32(&mut buf[EVENT_LEN_OFFSET..], self.event_length);
        if header_len >= LOG_EVENT_MINIMAL_HEADER_LEN {
            LittleEndian::write_u32(&mut buf[LOG_POS_OFFSET..], self.next_position as u32);
            LittleEndian::write_u16(&mut buf[FLAGS_OFFSET..], self.flags);
        }
    }

    /// Event type, if the code is one this crate knows.
    pub fn event_type(&self) -> Option<EventType> {
        EventType::from_u8(self.type_code)
    }

    /// Display name of the event type ("Unknown" for unrecognised codes).
    pub fn type_name(&self) -> &'static str {
        self.event_type().map(EventType::name).unwrap_or("Unknown")
    }
}

/// Read the length field of a raw event without parsing the rest.
pub fn peek_event_length(buf: &[u8]) -> Option<u32> {
    buf.get(EVENT_LEN_OFFSET..EVENT_LEN_OFFSET + 4)
        .map(LittleEndian::read_u32)
}

/// Read the type code of a raw event without parsing the rest.
pub fn peek_type_code(buf: &[u8]) -> Option<u8> {
    buf.get(EVENT_TYPE_OFFSET).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> EventHeader {
        EventHeader {
            timestamp: 1_200_000_000,
            type_code: 2,
            server_id: 7,
            event_length: 80,
            next_position: 184,
            flags: 0x8,
        }
    }

    #[test]
    fn test_v4_layout() {
        let mut out = Vec::new();
        sample().write_to(&mut out, LOG_EVENT_HEADER_LEN);
        assert_eq!(out.len(), 19);
        assert_eq!(LittleEndian::read_u32(&out[LOG_POS_OFFSET..]), 184);
        assert_eq!(EventHeader::parse(&out, 19), Some(sample()));
    }

    #[test]
    fn test_v1_header_has_no_position() {
        let mut out = Vec::new();
        sample().write_to(&mut out, OLD_HEADER_LEN);
        assert_eq!(out.len(), 13);
        let hdr = EventHeader::parse(&out, OLD_HEADER_LEN).unwrap();
        assert_eq!(hdr.next_position, 0);
        assert_eq!(hdr.flags, 0);
        assert_eq!(hdr.event_length, 80);
    }

    #[test]
    fn test_short_buffer() {
        assert!(EventHeader::parse(&[0u8; 10], 19).is_none());
        assert!(EventHeader::parse(&[0u8; 19], 12).is_none());
        assert_eq!(peek_event_length(&[0u8; 12]), None);
    }

    #[test]
    fn test_longer_header_is_zero_padded() {
        let mut out = Vec::new();
        sample().write_to(&mut out, 23);
        assert_eq!(out.len(), 23);
        assert_eq!(&out[19..], &[0, 0, 0, 0]);
        assert_eq!(peek_type_code(&out), Some(2));
    }
}
