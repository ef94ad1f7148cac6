//! Binary log event type codes.
//!
//! Maps the 1-byte type field (offset 4 of the common header) to an
//! [`EventType`]. Display names are the ones the dump tool prints in its
//! header comments and error messages.

use serde::Serialize;
use std::fmt;

/// One past the largest valid event type code.
pub const ENUM_END_EVENT: u8 = 28;

/// All event type codes a version 4 log can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventType {
    /// Never written; placeholder for code 0.
    Unknown,
    /// Start of a 3.23/4.x log (START_EVENT_V3 = 1)
    StartV3,
    /// Statement (QUERY_EVENT = 2)
    Query,
    /// Server shutdown (STOP_EVENT = 3)
    Stop,
    /// Switch to the next log (ROTATE_EVENT = 4)
    Rotate,
    /// Auto-increment or LAST_INSERT_ID value (INTVAR_EVENT = 5)
    Intvar,
    /// Old LOAD DATA (LOAD_EVENT = 6)
    Load,
    /// Unused slave marker (SLAVE_EVENT = 7)
    Slave,
    /// LOAD DATA start with first block (CREATE_FILE_EVENT = 8)
    CreateFile,
    /// LOAD DATA continuation block (APPEND_BLOCK_EVENT = 9)
    AppendBlock,
    /// Execute a LOAD DATA created with CreateFile (EXEC_LOAD_EVENT = 10)
    ExecLoad,
    /// Abandon a LOAD DATA (DELETE_FILE_EVENT = 11)
    DeleteFile,
    /// LOAD DATA with long terminators (NEW_LOAD_EVENT = 12)
    NewLoad,
    /// RAND() seeds (RAND_EVENT = 13)
    Rand,
    /// User variable (USER_VAR_EVENT = 14)
    UserVar,
    /// Layout of the events that follow (FORMAT_DESCRIPTION_EVENT = 15)
    FormatDescription,
    /// Transaction commit (XID_EVENT = 16)
    Xid,
    /// LOAD DATA start without a statement (BEGIN_LOAD_QUERY_EVENT = 17)
    BeginLoadQuery,
    /// LOAD DATA statement (EXECUTE_LOAD_QUERY_EVENT = 18)
    ExecuteLoadQuery,
    /// Table id to table name mapping (TABLE_MAP_EVENT = 19)
    TableMap,
    /// Pre-GA row insert (PRE_GA_WRITE_ROWS_EVENT = 20)
    PreGaWriteRows,
    /// Pre-GA row update (PRE_GA_UPDATE_ROWS_EVENT = 21)
    PreGaUpdateRows,
    /// Pre-GA row delete (PRE_GA_DELETE_ROWS_EVENT = 22)
    PreGaDeleteRows,
    /// Row insert (WRITE_ROWS_EVENT = 23)
    WriteRows,
    /// Row update (UPDATE_ROWS_EVENT = 24)
    UpdateRows,
    /// Row delete (DELETE_ROWS_EVENT = 25)
    DeleteRows,
    /// Something happened the log cannot express (INCIDENT_EVENT = 26)
    Incident,
    /// Keep-alive on the replication connection (HEARTBEAT_LOG_EVENT = 27)
    Heartbeat,
}

impl EventType {
    /// Map a type code to an event type; codes at or past
    /// [`ENUM_END_EVENT`] return `None`.
    ///
    /// # Examples
    ///
    /// ```
    /// use rpl::binlog::event_type::EventType;
    ///
    /// assert_eq!(EventType::from_u8(2), Some(EventType::Query));
    /// assert_eq!(EventType::from_u8(15), Some(EventType::FormatDescription));
    /// assert_eq!(EventType::from_u8(28), None);
    /// ```
    pub fn from_u8(code: u8) -> Option<Self> {
        let t = match code {
            0 => EventType::Unknown,
            1 => EventType::StartV3,
            2 => EventType::Query,
            3 => EventType::Stop,
            4 => EventType::Rotate,
            5 => EventType::Intvar,
            6 => EventType::Load,
            7 => EventType::Slave,
            8 => EventType::CreateFile,
            9 => EventType::AppendBlock,
            10 => EventType::ExecLoad,
            11 => EventType::DeleteFile,
            12 => EventType::NewLoad,
            13 => EventType::Rand,
            14 => EventType::UserVar,
            15 => EventType::FormatDescription,
            16 => EventType::Xid,
            17 => EventType::BeginLoadQuery,
            18 => EventType::ExecuteLoadQuery,
            19 => EventType::TableMap,
            20 => EventType::PreGaWriteRows,
            21 => EventType::PreGaUpdateRows,
            22 => EventType::PreGaDeleteRows,
            23 => EventType::WriteRows,
            24 => EventType::UpdateRows,
            25 => EventType::DeleteRows,
            26 => EventType::Incident,
            27 => EventType::Heartbeat,
            _ => return None,
        };
        Some(t)
    }

    /// The on-disk type code.
    pub fn code(self) -> u8 {
        match self {
            EventType::Unknown => 0,
            EventType::StartV3 => 1,
            EventType::Query => 2,
            EventType::Stop => 3,
            EventType::Rotate => 4,
            EventType::Intvar => 5,
            EventType::Load => 6,
            EventType::Slave => 7,
            EventType::CreateFile => 8,
            EventType::AppendBlock => 9,
            EventType::ExecLoad => 10,
            EventType::DeleteFile => 11,
            EventType::NewLoad => 12,
            EventType::Rand => 13,
            EventType::UserVar => 14,
            EventType::FormatDescription => 15,
            EventType::Xid => 16,
            EventType::BeginLoadQuery => 17,
            EventType::ExecuteLoadQuery => 18,
            EventType::TableMap => 19,
            EventType::PreGaWriteRows => 20,
            EventType::PreGaUpdateRows => 21,
            EventType::PreGaDeleteRows => 22,
            EventType::WriteRows => 23,
            EventType::UpdateRows => 24,
            EventType::DeleteRows => 25,
            EventType::Incident => 26,
            EventType::Heartbeat => 27,
        }
    }

    /// Name printed in header comments and diagnostics.
    pub fn name(self) -> &'static str {
        match self {
            EventType::StartV3 => "Start_v3",
            EventType::Stop => "Stop",
            EventType::Query => "Query",
            EventType::Rotate => "Rotate",
            EventType::Load => "Load",
            EventType::NewLoad => "New_load",
            EventType::Slave => "Slave",
            EventType::CreateFile => "Create_file",
            EventType::AppendBlock => "Append_block",
            EventType::DeleteFile => "Delete_file",
            EventType::ExecLoad => "Exec_load",
            EventType::Xid => "Xid",
            EventType::FormatDescription => "Format_desc",
            EventType::TableMap => "Table_map",
            EventType::WriteRows => "Write_rows",
            EventType::UpdateRows => "Update_rows",
            EventType::DeleteRows => "Delete_rows",
            EventType::BeginLoadQuery => "Begin_load_query",
            EventType::ExecuteLoadQuery => "Execute_load_query",
            EventType::Incident => "Incident",
            _ => "Unknown",
        }
    }

    /// True for the row-based replication events that can only be printed
    /// in base64 form.
    pub fn is_row_event(self) -> bool {
        matches!(
            self,
            EventType::TableMap
                | EventType::WriteRows
                | EventType::UpdateRows
                | EventType::DeleteRows
                | EventType::PreGaWriteRows
                | EventType::PreGaUpdateRows
                | EventType::PreGaDeleteRows
        )
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
