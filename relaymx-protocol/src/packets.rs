use bytes::{Bytes, BytesMut, BufMut};

use crate::error::{ProxyError, Result};
use crate::primitives::{read_null_str, write_lenenc_int, write_lenenc_str, write_null_str};

/// A parsed client command, dispatched from the first byte of a `COM_QUERY`-
/// family packet.
#[derive(Debug, Clone)]
pub enum Command {
    Quit,
    InitDb(Bytes),
    Query(Bytes),
    FieldList(Bytes),
    Ping,
    Statistics,
    ChangeUser(Bytes),
    StmtPrepare(Bytes),
    StmtExecute(Bytes),
    StmtClose(Bytes),
    SetOption(Bytes),
    Other { opcode: u8, payload: Bytes },
}

pub const COM_QUIT: u8 = 0x01;
pub const COM_INIT_DB: u8 = 0x02;
pub const COM_QUERY: u8 = 0x03;
pub const COM_FIELD_LIST: u8 = 0x04;
pub const COM_PING: u8 = 0x0e;
pub const COM_STATISTICS: u8 = 0x09;
pub const COM_CHANGE_USER: u8 = 0x11;
pub const COM_STMT_PREPARE: u8 = 0x16;
pub const COM_STMT_EXECUTE: u8 = 0x17;
pub const COM_STMT_CLOSE: u8 = 0x19;
pub const COM_SET_OPTION: u8 = 0x1b;

impl Command {
    pub fn parse(payload: &[u8]) -> Result<Self> {
        let opcode = *payload.first().ok_or_else(|| ProxyError::Protocol("empty command packet".into()))?;
        let rest = Bytes::copy_from_slice(&payload[1..]);
        Ok(match opcode {
            COM_QUIT => Command::Quit,
            COM_INIT_DB => Command::InitDb(rest),
            COM_QUERY => Command::Query(rest),
            COM_FIELD_LIST => Command::FieldList(rest),
            COM_PING => Command::Ping,
            COM_STATISTICS => Command::Statistics,
            COM_CHANGE_USER => Command::ChangeUser(rest),
            COM_STMT_PREPARE => Command::StmtPrepare(rest),
            COM_STMT_EXECUTE => Command::StmtExecute(rest),
            COM_STMT_CLOSE => Command::StmtClose(rest),
            COM_SET_OPTION => Command::SetOption(rest),
            opcode => Command::Other { opcode, payload: rest },
        })
    }

    /// Whether this command opcode is considered session-modifying and
    /// therefore subject to session-command-list replay. `COM_QUERY` text is
    /// classified separately by a `QueryClassifier`.
    pub fn is_unconditionally_session_modifying(&self) -> bool {
        matches!(
            self,
            Command::InitDb(_) | Command::ChangeUser(_) | Command::SetOption(_) | Command::StmtPrepare(_)
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct OkPacket {
    pub affected_rows: u64,
    pub last_insert_id: u64,
    pub status_flags: u16,
    pub warnings: u16,
    pub info: Bytes,
}

impl OkPacket {
    pub fn write(&self, dst: &mut BytesMut) {
        dst.put_u8(0x00);
        write_lenenc_int(dst, self.affected_rows);
        write_lenenc_int(dst, self.last_insert_id);
        dst.put_u16_le(self.status_flags);
        dst.put_u16_le(self.warnings);
        dst.put_slice(&self.info);
    }
}

#[derive(Debug, Clone)]
pub struct ErrPacket {
    pub error_code: u16,
    pub sql_state: [u8; 5],
    pub message: Bytes,
}

impl ErrPacket {
    pub fn new(error_code: u16, sql_state: &str, message: impl Into<Bytes>) -> Self {
        let mut state = [0u8; 5];
        let bytes = sql_state.as_bytes();
        let n = bytes.len().min(5);
        state[..n].copy_from_slice(&bytes[..n]);
        Self { error_code, sql_state: state, message: message.into() }
    }

    pub fn write(&self, dst: &mut BytesMut) {
        dst.put_u8(0xFF);
        dst.put_u16_le(self.error_code);
        dst.put_u8(b'#');
        dst.put_slice(&self.sql_state);
        dst.put_slice(&self.message);
    }
}

#[derive(Debug, Clone, Default)]
pub struct EofPacket {
    pub warnings: u16,
    pub status_flags: u16,
}

impl EofPacket {
    pub fn write(&self, dst: &mut BytesMut) {
        dst.put_u8(0xFE);
        dst.put_u16_le(self.warnings);
        dst.put_u16_le(self.status_flags);
    }
}

#[derive(Debug, Clone)]
pub struct ColumnDefinition {
    pub name: String,
    pub column_type: u8,
    pub flags: u16,
    pub decimals: u8,
}

impl ColumnDefinition {
    pub fn write(&self, dst: &mut BytesMut) {
        write_lenenc_str(dst, b"def");
        write_lenenc_str(dst, b""); // schema
        write_lenenc_str(dst, b""); // table
        write_lenenc_str(dst, b""); // org_table
        write_lenenc_str(dst, self.name.as_bytes());
        write_lenenc_str(dst, self.name.as_bytes()); // org_name
        write_lenenc_int(dst, 0x0c); // length of fixed fields below
        dst.put_u16_le(0x21); // charset: utf8_general_ci
        dst.put_u32_le(0); // column length
        dst.put_u8(self.column_type);
        dst.put_u16_le(self.flags);
        dst.put_u8(self.decimals);
        dst.put_u16_le(0); // filler
    }
}

#[derive(Debug, Clone)]
pub struct TextRow {
    pub values: Vec<Option<Bytes>>,
}

impl TextRow {
    pub fn write(&self, dst: &mut BytesMut) {
        for value in &self.values {
            match value {
                Some(bytes) => write_lenenc_str(dst, bytes),
                None => dst.put_u8(0xFB),
            }
        }
    }
}

pub fn parse_null_terminated(payload: &[u8]) -> Result<Bytes> {
    let (value, _) = read_null_str(payload)?;
    Ok(value)
}
