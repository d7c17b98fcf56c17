//! Outbound payload builders.
//!
//! Builders produce bare payloads; the session driver frames them with the
//! next sequence number.

use bytes::{BufMut, Bytes, BytesMut};

use super::lenenc::{put_lenenc_int, put_lenenc_str};
use super::packet::capabilities::{CLIENT_DEPRECATE_EOF, CLIENT_PROTOCOL_41};
use super::packet::status::SERVER_STATUS_AUTOCOMMIT;
use super::value::{column_type, encode_value, ColumnType, ValueError};
use crate::backend::{Column, Value};

/// MySQL server error codes sent in ERR packets
pub mod error_codes {
    pub const ER_NOT_SUPPORTED_AUTH_MODE: u16 = 1251;
    pub const ER_ACCESS_DENIED: u16 = 1045;
    pub const ER_NO_DB: u16 = 1046;
    pub const ER_UNKNOWN_COM: u16 = 1047;
    pub const ER_NO_SUCH_THREAD: u16 = 1094;
    pub const ER_BAD_DB: u16 = 1049;
    pub const ER_DUP_ENTRY: u16 = 1062;
    pub const ER_PARSE: u16 = 1064;
    pub const ER_EMPTY_QUERY: u16 = 1065;
    pub const ER_UNKNOWN: u16 = 1105;
    pub const ER_TABLEACCESS_DENIED: u16 = 1142;
    pub const ER_NO_SUCH_TABLE: u16 = 1146;
    pub const ER_NET_PACKETS_OUT_OF_ORDER: u16 = 1156;
    pub const ER_UNKNOWN_SYSTEM_VARIABLE: u16 = 1193;
    pub const ER_SPECIFIC_ACCESS_DENIED: u16 = 1227;
    pub const ER_WRONG_VALUE_FOR_VAR: u16 = 1231;
    pub const ER_INCORRECT_GLOBAL_LOCAL_VAR: u16 = 1238;
    pub const ER_NOT_SUPPORTED_YET: u16 = 1235;
    pub const ER_MALFORMED_PACKET: u16 = 1835;
}

/// OK packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
}

impl OkPacket {
    pub fn new() -> Self {
        Self {
            affected_rows: 0,
            last_insert_id: 0,
            status_flags: SERVER_STATUS_AUTOCOMMIT,
            warnings: 0,
        }
    }

    pub fn with_affected_rows(mut self, affected_rows: u64) -> Self {
        self.affected_rows = affected_rows;
        self
    }

    pub fn with_status(mut self, status_flags: u16) -> Self {
        self.status_flags = status_flags;
        self
    }

    pub fn encode(&self, capabilities: u32) -> Bytes {
        self.encode_with_header(0x00, capabilities)
    }

    /// OK packet with the 0xFE header that ends a result set under CLIENT_DEPRECATE_EOF
    pub fn encode_as_eof(&self, capabilities: u32) -> Bytes {
        self.encode_with_header(0xFE, capabilities)
    }

    fn encode_with_header(&self, header: u8, capabilities: u32) -> Bytes {
        let mut buf = BytesMut::with_capacity(16);
        buf.put_u8(header);
        put_lenenc_int(&mut buf, self.affected_rows);
        put_lenenc_int(&mut buf, self.last_insert_id);
        if capabilities & CLIENT_PROTOCOL_41 != 0 {
            buf.put_u16_le(self.status_flags);
            buf.put_u16_le(self.warnings);
        }
        buf.freeze()
    }
}

impl Default for OkPacket {
    fn default() -> Self {
        Self::new()
    }
}

/// ERR packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrPacket {
    pub error_code: u16,
    pub sql_state: String,
    pub error_message: String,
}

impl ErrPacket {
    pub fn new(error_code: u16, sql_state: &str, error_message: impl Into<String>) -> Self {
        Self {
            error_code,
            sql_state: sql_state.to_string(),
            error_message: error_message.into(),
        }
    }

    pub fn encode(&self, capabilities: u32) -> Bytes {
        let mut buf = BytesMut::with_capacity(9 + self.error_message.len());
        buf.put_u8(0xFF);
        buf.put_u16_le(self.error_code);
        if capabilities & CLIENT_PROTOCOL_41 != 0 {
            buf.put_u8(b'#');
            let mut state = [b'0'; 5];
            for (dst, src) in state.iter_mut().zip(self.sql_state.bytes()) {
                *dst = src;
            }
            buf.extend_from_slice(&state);
        }
        buf.extend_from_slice(self.error_message.as_bytes());
        buf.freeze()
    }
}

/// EOF packet (pre CLIENT_DEPRECATE_EOF result set delimiter)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EofPacket {
    pub warnings: u16,
    pub status_flags: u16,
}

impl EofPacket {
    pub fn new(status_flags: u16) -> Self {
        Self {
            warnings: 0,
            status_flags,
        }
    }

    pub fn encode(&self, capabilities: u32) -> Bytes {
        let mut buf = BytesMut::with_capacity(5);
        buf.put_u8(0xFE);
        if capabilities & CLIENT_PROTOCOL_41 != 0 {
            buf.put_u16_le(self.warnings);
            buf.put_u16_le(self.status_flags);
        }
        buf.freeze()
    }
}

/// Column definition (Protocol::ColumnDefinition41)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub schema: String,
    pub table: String,
    pub org_table: String,
    pub name: String,
    pub org_name: String,
    pub character_set: u16,
    pub column_length: u32,
    pub column_type: ColumnType,
    pub flags: u16,
    pub decimals: u8,
}

impl ColumnDefinition {
    /// Describe a backend column under the name the client should see
    pub fn for_column(column: &Column, name: &str) -> Result<Self, ValueError> {
        let column_type = column_type(&column.ty)?;
        Ok(Self {
            schema: String::new(),
            table: String::new(),
            org_table: String::new(),
            name: name.to_string(),
            org_name: column.name.clone(),
            character_set: column_type.charset(),
            column_length: column_type.max_length(),
            column_type,
            flags: column_type.flags(),
            decimals: column_type.decimals(),
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(32 + self.name.len() * 2);
        put_lenenc_str(&mut buf, "def");
        put_lenenc_str(&mut buf, &self.schema);
        put_lenenc_str(&mut buf, &self.table);
        put_lenenc_str(&mut buf, &self.org_table);
        put_lenenc_str(&mut buf, &self.name);
        put_lenenc_str(&mut buf, &self.org_name);
        // length of the fixed-length fields that follow
        buf.put_u8(0x0C);
        buf.put_u16_le(self.character_set);
        buf.put_u32_le(self.column_length);
        buf.put_u8(self.column_type.code());
        buf.put_u16_le(self.flags);
        buf.put_u8(self.decimals);
        buf.put_u16_le(0);
        buf.freeze()
    }
}

pub fn column_count(count: usize) -> Bytes {
    let mut buf = BytesMut::with_capacity(9);
    put_lenenc_int(&mut buf, count as u64);
    buf.freeze()
}

/// Text-protocol row: one length-encoded value (or 0xFB) per column
pub fn text_row(columns: &[Column], values: &[Value]) -> Result<Bytes, ValueError> {
    if columns.len() != values.len() {
        return Err(ValueError::RowWidth {
            expected: columns.len(),
            actual: values.len(),
        });
    }
    let mut buf = BytesMut::new();
    for (column, value) in columns.iter().zip(values) {
        encode_value(&mut buf, &column.ty, value)?;
    }
    Ok(buf.freeze())
}

/// Terminator after the last row; `status_flags` already includes MORE_RESULTS_EXISTS if needed
pub fn result_set_end(capabilities: u32, status_flags: u16) -> Bytes {
    if capabilities & CLIENT_DEPRECATE_EOF != 0 {
        OkPacket::new()
            .with_status(status_flags)
            .encode_as_eof(capabilities)
    } else {
        EofPacket::new(status_flags).encode(capabilities)
    }
}
