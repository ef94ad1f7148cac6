//! Binary log layout constants.
//!
//! Offsets are relative to the start of an event (header fields) or to the
//! start of the post-header (body fields). All multi-byte integers in a
//! binary log are little-endian.

/// Magic number at offset 0 of every binary log file.
pub const BINLOG_MAGIC: [u8; 4] = [0xfe, 0x62, 0x69, 0x6e];
/// Size of the magic number; the first event starts here.
pub const BIN_LOG_HEADER_SIZE: u64 = 4;

// Common header
pub const EVENT_TIMESTAMP_OFFSET: usize = 0; // 4 bytes
pub const EVENT_TYPE_OFFSET: usize = 4; // 1 byte
pub const SERVER_ID_OFFSET: usize = 5; // 4 bytes
pub const EVENT_LEN_OFFSET: usize = 9; // 4 bytes
pub const LOG_POS_OFFSET: usize = 13; // 4 bytes
pub const FLAGS_OFFSET: usize = 17; // 2 bytes

/// Header length of version 1 (3.23-era) logs.
pub const OLD_HEADER_LEN: usize = 13;
/// Header length of version 3 and 4 logs.
pub const LOG_EVENT_HEADER_LEN: usize = 19;
/// Header length that FormatDescription and Rotate events keep in every version.
pub const LOG_EVENT_MINIMAL_HEADER_LEN: usize = 19;
/// Bytes examined per candidate event while probing a local file.
pub const PROBE_HEADER_LEN: usize = EVENT_LEN_OFFSET + 4;

/// Set on the FormatDescription of a log that is still being written.
pub const LOG_EVENT_BINLOG_IN_USE_F: u16 = 0x1;
pub const LOG_EVENT_THREAD_SPECIFIC_F: u16 = 0x4;
pub const LOG_EVENT_SUPPRESS_USE_F: u16 = 0x8;
/// Event made up by the server, not written by a statement.
pub const LOG_EVENT_ARTIFICIAL_F: u16 = 0x20;

// Post-header lengths
pub const ST_SERVER_VER_LEN: usize = 50;
pub const START_V3_HEADER_LEN: usize = 2 + ST_SERVER_VER_LEN + 4;
pub const QUERY_HEADER_MINIMAL_LEN: usize = 4 + 4 + 1 + 2;
pub const QUERY_HEADER_LEN: usize = QUERY_HEADER_MINIMAL_LEN + 2;
pub const ROTATE_HEADER_LEN: usize = 8;
pub const LOAD_HEADER_LEN: usize = 4 + 4 + 4 + 1 + 1 + 4;
pub const CREATE_FILE_HEADER_LEN: usize = 4;
pub const APPEND_BLOCK_HEADER_LEN: usize = 4;
pub const EXEC_LOAD_HEADER_LEN: usize = 4;
pub const DELETE_FILE_HEADER_LEN: usize = 4;
pub const EXECUTE_LOAD_QUERY_EXTRA_HEADER_LEN: usize = 4 + 4 + 4 + 1;
pub const EXECUTE_LOAD_QUERY_HEADER_LEN: usize =
    QUERY_HEADER_LEN + EXECUTE_LOAD_QUERY_EXTRA_HEADER_LEN;
pub const TABLE_MAP_HEADER_LEN: usize = 8;
pub const ROWS_HEADER_LEN: usize = 8;
pub const INCIDENT_HEADER_LEN: usize = 2;
/// Number of event types described by a version 4 FormatDescription.
pub const LOG_EVENT_TYPES: usize = 27;
pub const FORMAT_DESCRIPTION_HEADER_LEN: usize = START_V3_HEADER_LEN + 1 + LOG_EVENT_TYPES;

// Start_v3 / FormatDescription body
pub const ST_BINLOG_VER_OFFSET: usize = 0;
pub const ST_SERVER_VER_OFFSET: usize = 2;
pub const ST_CREATED_OFFSET: usize = 2 + ST_SERVER_VER_LEN;
pub const ST_COMMON_HEADER_LEN_OFFSET: usize = ST_CREATED_OFFSET + 4;

// Query post-header
pub const Q_THREAD_ID_OFFSET: usize = 0;
pub const Q_EXEC_TIME_OFFSET: usize = 4;
pub const Q_DB_LEN_OFFSET: usize = 8;
pub const Q_ERR_CODE_OFFSET: usize = 9;
pub const Q_STATUS_VARS_LEN_OFFSET: usize = 11;

// Query status variables
pub const Q_FLAGS2_CODE: u8 = 0;
pub const Q_LC_TIME_NAMES_CODE: u8 = 7;
pub const Q_CHARSET_DATABASE_CODE: u8 = 8;
/// Upper bound on the status-variable block of a Query event.
pub const MAX_SIZE_LOG_EVENT_STATUS: usize = 1 + 4 + 1 + 2 + 1 + 2;

// Load post-header
pub const L_THREAD_ID_OFFSET: usize = 0;
pub const L_EXEC_TIME_OFFSET: usize = 4;
pub const L_SKIP_LINES_OFFSET: usize = 8;
pub const L_TBL_LEN_OFFSET: usize = 12;
pub const L_DB_LEN_OFFSET: usize = 13;
pub const L_NUM_FIELDS_OFFSET: usize = 14;
pub const L_SQL_EX_OFFSET: usize = 18;
pub const L_DATA_OFFSET: usize = LOAD_HEADER_LEN;

// sql_ex option flags
pub const DUMPFILE_FLAG: u8 = 0x1;
pub const OPT_ENCLOSED_FLAG: u8 = 0x2;
pub const REPLACE_FLAG: u8 = 0x4;
pub const IGNORE_FLAG: u8 = 0x8;

// Execute_load_query extra post-header, relative to its start
pub const ELQ_FILE_ID_OFFSET: usize = QUERY_HEADER_LEN;
pub const ELQ_FN_POS_START_OFFSET: usize = ELQ_FILE_ID_OFFSET + 4;
pub const ELQ_FN_POS_END_OFFSET: usize = ELQ_FILE_ID_OFFSET + 8;
pub const ELQ_DUP_HANDLING_OFFSET: usize = ELQ_FILE_ID_OFFSET + 12;

// Rows event flags
pub const STMT_END_F: u16 = 0x1;
pub const NO_FOREIGN_KEY_CHECKS_F: u16 = 0x2;
pub const RELAXED_UNIQUE_CHECKS_F: u16 = 0x4;

/// Checksum algorithm byte meaning "CRC32".
pub const BINLOG_CHECKSUM_ALG_CRC32: u8 = 1;
pub const BINLOG_CHECKSUM_LEN: usize = 4;

/// Largest event the readers accept (default `max_allowed_packet`).
pub const MAX_EVENT_SIZE: u32 = 1024 * 1024 * 1024;

// Remote dump
/// Leading status byte of an EOF packet.
pub const PACKET_EOF_MARKER: u8 = 254;
/// Packets shorter than this with an EOF status byte end the stream.
pub const PACKET_EOF_MAX_LEN: usize = 8;
/// Asks the server not to block at the end of the last log.
pub const BINLOG_DUMP_NON_BLOCK: u16 = 1;
