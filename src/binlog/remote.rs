//! Replication connection.
//!
//! Just enough of the client protocol to pull a binlog from a server:
//!
//! 1. read the protocol-10 handshake and answer it with a
//!    `mysql_native_password` scramble;
//! 2. run `SELECT VERSION()` to pick the bootstrap format description;
//! 3. send `COM_BINLOG_DUMP` and read one event per packet until the server
//!    sends an EOF packet.
//!
//! Packets are framed as a 3-byte little-endian payload length and a 1-byte
//! sequence number. Payloads of exactly `0xffffff` bytes continue in the
//! next packet.
//!
//! [`BinlogConnection`] is the seam the dump session talks to, so tests can
//! script a server without a socket.

use byteorder::{ByteOrder, LittleEndian};
use sha1::{Digest, Sha1};
use std::io::{Read, Write};
use std::net::TcpStream;
use tracing::debug;

use crate::binlog::format::FormatDescription;
use crate::binlog::reader::read_fully;
use crate::util::mysql::ConnectionConfig;
use crate::RplError;

const MAX_PAYLOAD_LEN: usize = 0xff_ffff;

const COM_QUERY: u8 = 0x03;
const COM_BINLOG_DUMP: u8 = 0x12;

const CLIENT_LONG_PASSWORD: u32 = 0x0000_0001;
const CLIENT_LONG_FLAG: u32 = 0x0000_0004;
const CLIENT_PROTOCOL_41: u32 = 0x0000_0200;
const CLIENT_TRANSACTIONS: u32 = 0x0000_2000;
const CLIENT_SECURE_CONNECTION: u32 = 0x0000_8000;

const UTF8_GENERAL_CI: u8 = 33;
const OK_HEADER: u8 = 0x00;
const EOF_HEADER: u8 = 0xfe;
const ERR_HEADER: u8 = 0xff;
const NULL_COLUMN: u8 = 0xfb;

/// Body of a `COM_BINLOG_DUMP` command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DumpRequest {
    pub position: u32,
    pub flags: u16,
    pub server_id: u32,
    pub log_name: String,
}

impl DumpRequest {
    /// `position:u32 | flags:u16 | server_id:u32 | log_name`, little-endian,
    /// without the command byte.
    ///
    /// # Examples
    ///
    /// ```
    /// use rpl::binlog::remote::DumpRequest;
    ///
    /// let req = DumpRequest { position: 4, flags: 0, server_id: 0, log_name: "bin.000001".into() };
    /// let buf = req.encode();
    /// assert_eq!(&buf[..4], &[4, 0, 0, 0]);
    /// assert_eq!(&buf[10..], b"bin.000001");
    /// ```
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; 10];
        LittleEndian::write_u32(&mut buf[0..], self.position);
        LittleEndian::write_u16(&mut buf[4..], self.flags);
        LittleEndian::write_u32(&mut buf[6..], self.server_id);
        buf.extend_from_slice(self.log_name.as_bytes());
        buf
    }
}

/// What the dump session needs from a server connection.
pub trait BinlogConnection {
    /// Run a text query and return its rows; `None` is SQL NULL.
    fn query(&mut self, sql: &str) -> Result<Vec<Vec<Option<String>>>, RplError>;

    /// Send a dump request. The reply is read with [`read_packet`](Self::read_packet).
    fn request_dump(&mut self, request: &DumpRequest) -> Result<(), RplError>;

    /// Next packet payload of the dump reply.
    fn read_packet(&mut self) -> Result<Vec<u8>, RplError>;
}

/// Ask the server for its version and map it to a bootstrap description.
pub fn check_server_version<C: BinlogConnection + ?Sized>(
    conn: &mut C,
) -> Result<FormatDescription, RplError> {
    let prefix = "Could not find server version: ";
    let rows = conn.query("SELECT VERSION()").map_err(|e| {
        RplError::Remote(format!(
            "{}Query failed when checking master version: {}",
            prefix, e
        ))
    })?;
    let row = rows.into_iter().next().ok_or_else(|| {
        RplError::Remote(format!(
            "{}Master returned no rows for SELECT VERSION().",
            prefix
        ))
    })?;
    let version = row.into_iter().next().flatten().ok_or_else(|| {
        RplError::Remote(format!("{}Master reported NULL for the version.", prefix))
    })?;
    debug!(server_version = %version, "connected");
    FormatDescription::from_version_string(&version)
}

/// `mysql_native_password` response:
/// `SHA1(password) XOR SHA1(nonce + SHA1(SHA1(password)))`.
/// Empty passwords send an empty response.
pub fn scramble_native(nonce: &[u8], password: &[u8]) -> Option<[u8; 20]> {
    if password.is_empty() {
        return None;
    }
    let stage1 = Sha1::digest(password);
    let stage2 = Sha1::digest(stage1);
    let mut hasher = Sha1::new();
    hasher.update(nonce);
    hasher.update(stage2);
    let mix = hasher.finalize();
    let mut out = [0u8; 20];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = stage1[i] ^ mix[i];
    }
    Some(out)
}

/// Initial handshake sent by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub protocol_version: u8,
    pub server_version: String,
    pub connection_id: u32,
    pub capabilities: u32,
    pub nonce: Vec<u8>,
}

impl Handshake {
    pub fn parse(payload: &[u8]) -> Result<Self, RplError> {
        let bad = || RplError::Remote("Malformed handshake packet from server".to_string());
        let protocol_version = *payload.first().ok_or_else(bad)?;
        if protocol_version != 10 {
            return Err(RplError::Remote(format!(
                "Unsupported protocol version {}",
                protocol_version
            )));
        }
        let rest = &payload[1..];
        let nul = rest.iter().position(|&b| b == 0).ok_or_else(bad)?;
        let server_version = String::from_utf8_lossy(&rest[..nul]).into_owned();
        let rest = &rest[nul + 1..];
        if rest.len() < 4 + 8 + 1 + 2 {
            return Err(bad());
        }
        let connection_id = LittleEndian::read_u32(rest);
        let mut nonce = rest[4..12].to_vec();
        let mut capabilities = u32::from(LittleEndian::read_u16(&rest[13..]));
        let rest = &rest[15..];
        // charset(1) status(2) capabilities-upper(2) auth-data-len(1) reserved(10)
        if rest.len() >= 16 {
            capabilities |= u32::from(LittleEndian::read_u16(&rest[3..])) << 16;
            let auth_len = rest[5] as usize;
            let part2 = &rest[16..];
            let want = auth_len.saturating_sub(8).max(13).min(part2.len());
            let part2 = &part2[..want];
            let end = part2.iter().position(|&b| b == 0).unwrap_or(part2.len());
            nonce.extend_from_slice(&part2[..end]);
        }
        Ok(Handshake {
            protocol_version,
            server_version,
            connection_id,
            capabilities,
            nonce,
        })
    }
}

fn server_error(payload: &[u8]) -> RplError {
    if payload.len() < 3 {
        return RplError::Remote("Unknown error".to_string());
    }
    let code = LittleEndian::read_u16(&payload[1..]);
    let mut msg = &payload[3..];
    if msg.first() == Some(&b'#') && msg.len() >= 6 {
        msg = &msg[6..];
    }
    RplError::Remote(format!("{} ({})", String::from_utf8_lossy(msg), code))
}

/// Read a length-encoded string from a text-protocol row.
fn read_lenenc_str(buf: &[u8], pos: &mut usize) -> Result<Option<String>, RplError> {
    let bad = || RplError::Remote("Malformed result row from server".to_string());
    if buf.get(*pos) == Some(&NULL_COLUMN) {
        *pos += 1;
        return Ok(None);
    }
    let len = read_lenenc_count(buf, pos).ok_or_else(bad)?;
    let bytes = buf.get(*pos..*pos + len).ok_or_else(bad)?;
    *pos += len;
    Ok(Some(String::from_utf8_lossy(bytes).into_owned()))
}

/// Synchronous client connection over any byte stream.
pub struct ClientConnection<S: Read + Write> {
    stream: S,
    seq: u8,
    pub handshake: Handshake,
}

impl ClientConnection<TcpStream> {
    /// Connect over TCP and authenticate.
    pub fn connect(config: &ConnectionConfig) -> Result<Self, RplError> {
        let stream = TcpStream::connect((config.host.as_str(), config.port)).map_err(|e| {
            RplError::Remote(format!(
                "Failed on connect: can't connect to {}:{} ({})",
                config.host, config.port, e
            ))
        })?;
        Self::handshake(stream, config)
    }
}

impl<S: Read + Write> ClientConnection<S> {
    /// Run the handshake on an already-open stream.
    pub fn handshake(stream: S, config: &ConnectionConfig) -> Result<Self, RplError> {
        let mut conn = ClientConnection {
            stream,
            seq: 0,
            handshake: Handshake {
                protocol_version: 0,
                server_version: String::new(),
                connection_id: 0,
                capabilities: 0,
                nonce: Vec::new(),
            },
        };
        let payload = conn.read_payload()?;
        if payload.first() == Some(&ERR_HEADER) {
            return Err(server_error(&payload));
        }
        conn.handshake = Handshake::parse(&payload)?;
        if conn.handshake.capabilities & CLIENT_PROTOCOL_41 == 0 {
            return Err(RplError::Remote(
                "Server does not support protocol 4.1".to_string(),
            ));
        }

        let capabilities = CLIENT_LONG_PASSWORD
            | CLIENT_LONG_FLAG
            | CLIENT_PROTOCOL_41
            | CLIENT_TRANSACTIONS
            | CLIENT_SECURE_CONNECTION;
        let mut response = Vec::with_capacity(64);
        response.extend_from_slice(&capabilities.to_le_bytes());
        response.extend_from_slice(&(MAX_PAYLOAD_LEN as u32).to_le_bytes());
        response.push(UTF8_GENERAL_CI);
        response.extend_from_slice(&[0u8; 23]);
        response.extend_from_slice(config.user.as_bytes());
        response.push(0);
        let password = config.password.as_deref().unwrap_or("");
        match scramble_native(&conn.handshake.nonce, password.as_bytes()) {
            Some(token) => {
                response.push(token.len() as u8);
                response.extend_from_slice(&token);
            }
            None => response.push(0),
        }
        conn.write_payload(&response)?;

        let reply = conn.read_payload()?;
        match reply.first() {
            Some(&OK_HEADER) => Ok(conn),
            Some(&ERR_HEADER) => Err(server_error(&reply)),
            Some(&EOF_HEADER) => Err(RplError::Remote(
                "Server requested an unsupported authentication method".to_string(),
            )),
            _ => Err(RplError::Remote(
                "Unexpected reply to authentication".to_string(),
            )),
        }
    }

    fn read_payload(&mut self) -> Result<Vec<u8>, RplError> {
        let mut payload = Vec::new();
        loop {
            let mut head = [0u8; 4];
            if read_fully(&mut self.stream, &mut head)? < head.len() {
                return Err(RplError::Remote("Lost connection to server".to_string()));
            }
            let len = LittleEndian::read_u24(&head);
            self.seq = head[3].wrapping_add(1);
            let start = payload.len();
            payload.resize(start + len as usize, 0);
            if read_fully(&mut self.stream, &mut payload[start..])? < len as usize {
                return Err(RplError::Remote("Lost connection to server".to_string()));
            }
            if (len as usize) < MAX_PAYLOAD_LEN {
                return Ok(payload);
            }
        }
    }

    fn write_payload(&mut self, payload: &[u8]) -> Result<(), RplError> {
        let mut frames = Vec::with_capacity(payload.len() + 8);
        let mut offset = 0;
        loop {
            let end = (offset + MAX_PAYLOAD_LEN).min(payload.len());
            let chunk = &payload[offset..end];
            let mut head = [0u8; 4];
            LittleEndian::write_u24(&mut head, chunk.len() as u32);
            head[3] = self.seq;
            self.seq = self.seq.wrapping_add(1);
            frames.extend_from_slice(&head);
            frames.extend_from_slice(chunk);
            offset = end;
            // A full-size frame is always followed by another, possibly empty.
            if chunk.len() < MAX_PAYLOAD_LEN {
                break;
            }
        }
        self.stream
            .write_all(&frames)
            .and_then(|_| self.stream.flush())
            .map_err(|e| RplError::Remote(format!("Lost connection to server: {}", e)))
    }

    fn command(&mut self, command: u8, arg: &[u8]) -> Result<(), RplError> {
        self.seq = 0;
        let mut payload = Vec::with_capacity(arg.len() + 1);
        payload.push(command);
        payload.extend_from_slice(arg);
        self.write_payload(&payload)
    }

    /// Skip packets up to and including the next EOF packet.
    fn skip_to_eof(&mut self) -> Result<(), RplError> {
        loop {
            let p = self.read_payload()?;
            match p.first() {
                Some(&EOF_HEADER) if p.len() < 9 => return Ok(()),
                Some(&ERR_HEADER) => return Err(server_error(&p)),
                _ => {}
            }
        }
    }
}

impl<S: Read + Write> BinlogConnection for ClientConnection<S> {
    fn query(&mut self, sql: &str) -> Result<Vec<Vec<Option<String>>>, RplError> {
        self.command(COM_QUERY, sql.as_bytes())?;
        let head = self.read_payload()?;
        let columns = match head.first() {
            Some(&ERR_HEADER) => return Err(server_error(&head)),
            Some(&OK_HEADER) => return Ok(Vec::new()),
            Some(_) => read_lenenc_count(&head, &mut 0).ok_or_else(|| {
                RplError::Remote("Malformed result set header".to_string())
            })?,
            None => return Err(RplError::Remote("Empty reply to query".to_string())),
        };
        // Column definitions, then EOF.
        self.skip_to_eof()?;

        let mut rows = Vec::new();
        loop {
            let p = self.read_payload()?;
            match p.first() {
                Some(&EOF_HEADER) if p.len() < 9 => return Ok(rows),
                Some(&ERR_HEADER) => return Err(server_error(&p)),
                _ => {
                    let mut pos = 0;
                    let mut row = Vec::with_capacity(columns);
                    for _ in 0..columns {
                        row.push(read_lenenc_str(&p, &mut pos)?);
                    }
                    rows.push(row);
                }
            }
        }
    }

    fn request_dump(&mut self, request: &DumpRequest) -> Result<(), RplError> {
        debug!(log = %request.log_name, position = request.position, "requesting binlog dump");
        self.command(COM_BINLOG_DUMP, &request.encode())
    }

    fn read_packet(&mut self) -> Result<Vec<u8>, RplError> {
        let p = self.read_payload()?;
        if p.first() == Some(&ERR_HEADER) {
            return Err(server_error(&p));
        }
        Ok(p)
    }
}

fn read_lenenc_count(buf: &[u8], pos: &mut usize) -> Option<usize> {
    let first = *buf.get(*pos)?;
    *pos += 1;
    let n = match first {
        0..=250 => return Some(first as usize),
        252 => 2,
        253 => 3,
        254 => 8,
        _ => return None,
    };
    let bytes = buf.get(*pos..*pos + n)?;
    *pos += n;
    Some(bytes.iter().rev().fold(0usize, |acc, &b| (acc << 8) | b as usize))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    /// In-memory duplex: reads come from `input`, writes go to `output`.
    struct Duplex {
        input: Cursor<Vec<u8>>,
        output: Vec<u8>,
    }

    impl Read for Duplex {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            self.input.read(buf)
        }
    }

    impl Write for Duplex {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.output.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn frame(seq: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = vec![0u8; 4];
        LittleEndian::write_u24(&mut out, payload.len() as u32);
        out[3] = seq;
        out.extend_from_slice(payload);
        out
    }

    fn handshake_payload() -> Vec<u8> {
        let mut p = vec![10];
        p.extend_from_slice(b"5.1.30\0");
        p.extend_from_slice(&7u32.to_le_bytes());
        p.extend_from_slice(b"abcdefgh");
        p.push(0);
        p.extend_from_slice(&0xf7ffu16.to_le_bytes());
        p.push(UTF8_GENERAL_CI);
        p.extend_from_slice(&2u16.to_le_bytes());
        p.extend_from_slice(&0u16.to_le_bytes());
        p.push(21);
        p.extend_from_slice(&[0u8; 10]);
        p.extend_from_slice(b"ijklmnopqrst\0");
        p
    }

    #[test]
    fn test_handshake_nonce() {
        let hs = Handshake::parse(&handshake_payload()).unwrap();
        assert_eq!(hs.server_version, "5.1.30");
        assert_eq!(hs.connection_id, 7);
        assert_eq!(hs.nonce, b"abcdefghijklmnopqrst");
        assert!(hs.capabilities & CLIENT_PROTOCOL_41 != 0);
    }

    #[test]
    fn test_scramble() {
        assert!(scramble_native(b"01234567890123456789", b"").is_none());
        let a = scramble_native(b"01234567890123456789", b"secret").unwrap();
        let b = scramble_native(b"98765432109876543210", b"secret").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_connect_query_and_dump() {
        let mut input = frame(0, &handshake_payload());
        input.extend(frame(2, &[OK_HEADER, 0, 0, 2, 0, 0, 0]));
        // SELECT VERSION(): 1 column, one definition, EOF, one row, EOF
        input.extend(frame(1, &[1]));
        input.extend(frame(2, b"\x03def\x00\x00\x00\x09VERSION()"));
        input.extend(frame(3, &[EOF_HEADER, 0, 0, 2, 0]));
        input.extend(frame(4, b"\x0a5.1.30-log"));
        input.extend(frame(5, &[EOF_HEADER, 0, 0, 2, 0]));
        // dump reply: EOF right away
        input.extend(frame(1, &[EOF_HEADER, 0, 0, 0, 0]));

        let duplex = Duplex {
            input: Cursor::new(input),
            output: Vec::new(),
        };
        let config = ConnectionConfig::default();
        let mut conn = ClientConnection::handshake(duplex, &config).unwrap();
        let fd = check_server_version(&mut conn).unwrap();
        assert_eq!(fd.binlog_version, 3);

        conn.request_dump(&DumpRequest {
            position: 4,
            flags: 0,
            server_id: 0,
            log_name: "bin.000001".into(),
        })
        .unwrap();
        let eof = conn.read_packet().unwrap();
        assert_eq!(eof[0], EOF_HEADER);

        let sent = &conn.stream.output;
        let dump_cmd = frame(0, &[&[COM_BINLOG_DUMP][..], &[4, 0, 0, 0, 0, 0, 0, 0, 0, 0], b"bin.000001"].concat());
        assert!(sent.ends_with(&dump_cmd));
    }

    #[test]
    fn test_error_packet_message() {
        let mut p = vec![ERR_HEADER];
        p.extend_from_slice(&1236u16.to_le_bytes());
        p.extend_from_slice(b"#HY000Could not find first log file name");
        let e = server_error(&p);
        assert_eq!(
            e.to_string(),
            "Remote error: Could not find first log file name (1236)"
        );
    }

    struct Scripted(Vec<Vec<Option<String>>>);

    impl BinlogConnection for Scripted {
        fn query(&mut self, _sql: &str) -> Result<Vec<Vec<Option<String>>>, RplError> {
            Ok(self.0.clone())
        }
        fn request_dump(&mut self, _request: &DumpRequest) -> Result<(), RplError> {
            Ok(())
        }
        fn read_packet(&mut self) -> Result<Vec<u8>, RplError> {
            Ok(vec![EOF_HEADER])
        }
    }

    #[test]
    fn test_version_errors() {
        let err = check_server_version(&mut Scripted(vec![])).unwrap_err();
        assert!(err.to_string().contains("Master returned no rows"));
        let err = check_server_version(&mut Scripted(vec![vec![None]])).unwrap_err();
        assert!(err.to_string().contains("Master reported NULL"));
        let fd = check_server_version(&mut Scripted(vec![vec![Some("3.23.58".into())]])).unwrap();
        assert_eq!(fd.binlog_version, 1);
    }
}
