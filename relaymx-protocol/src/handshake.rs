use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{ProxyError, Result};
use crate::primitives::{read_lenenc_str, read_null_str, write_null_str};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CapabilityFlags: u32 {
        const CLIENT_LONG_PASSWORD     = 0x0000_0001;
        const CLIENT_FOUND_ROWS        = 0x0000_0002;
        const CLIENT_LONG_FLAG         = 0x0000_0004;
        const CLIENT_CONNECT_WITH_DB   = 0x0000_0008;
        const CLIENT_NO_SCHEMA         = 0x0000_0010;
        const CLIENT_COMPRESS          = 0x0000_0020;
        const CLIENT_ODBC              = 0x0000_0040;
        const CLIENT_LOCAL_FILES       = 0x0000_0080;
        const CLIENT_IGNORE_SPACE      = 0x0000_0100;
        const CLIENT_PROTOCOL_41       = 0x0000_0200;
        const CLIENT_INTERACTIVE       = 0x0000_0400;
        const CLIENT_SSL               = 0x0000_0800;
        const CLIENT_IGNORE_SIGPIPE    = 0x0000_1000;
        const CLIENT_TRANSACTIONS      = 0x0000_2000;
        const CLIENT_RESERVED          = 0x0000_4000;
        const CLIENT_SECURE_CONNECTION = 0x0000_8000;
        const CLIENT_MULTI_STATEMENTS  = 0x0001_0000;
        const CLIENT_MULTI_RESULTS     = 0x0002_0000;
        const CLIENT_PS_MULTI_RESULTS  = 0x0004_0000;
        const CLIENT_PLUGIN_AUTH       = 0x0008_0000;
        const CLIENT_CONNECT_ATTRS     = 0x0010_0000;
        const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA = 0x0020_0000;
        const CLIENT_SESSION_TRACK     = 0x0080_0000;
        const CLIENT_DEPRECATE_EOF     = 0x0100_0000;
    }
}

/// The default capabilities the proxy advertises to clients.
pub fn default_server_capabilities() -> CapabilityFlags {
    CapabilityFlags::CLIENT_LONG_PASSWORD
        | CapabilityFlags::CLIENT_FOUND_ROWS
        | CapabilityFlags::CLIENT_LONG_FLAG
        | CapabilityFlags::CLIENT_CONNECT_WITH_DB
        | CapabilityFlags::CLIENT_PROTOCOL_41
        | CapabilityFlags::CLIENT_TRANSACTIONS
        | CapabilityFlags::CLIENT_SECURE_CONNECTION
        | CapabilityFlags::CLIENT_MULTI_STATEMENTS
        | CapabilityFlags::CLIENT_MULTI_RESULTS
        | CapabilityFlags::CLIENT_PLUGIN_AUTH
        | CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
        | CapabilityFlags::CLIENT_SESSION_TRACK
}

pub const AUTH_PLUGIN_NAME: &[u8] = b"mysql_native_password";

/// The server's initial handshake packet (protocol version 10).
pub struct HandshakeV10 {
    pub connection_id: u32,
    pub scramble: [u8; 20],
    pub capabilities: CapabilityFlags,
    pub server_version: String,
}

impl HandshakeV10 {
    pub fn new(connection_id: u32, scramble: [u8; 20]) -> Self {
        Self {
            connection_id,
            scramble,
            capabilities: default_server_capabilities(),
            server_version: "8.0.34-relaymx".to_string(),
        }
    }

    pub fn write(&self, dst: &mut BytesMut) {
        dst.put_u8(10); // protocol version
        write_null_str(dst, self.server_version.as_bytes());
        dst.put_u32_le(self.connection_id);
        dst.put_slice(&self.scramble[..8]);
        dst.put_u8(0); // filler
        let caps = self.capabilities.bits();
        dst.put_u16_le((caps & 0xFFFF) as u16);
        dst.put_u8(0x21); // character set: utf8_general_ci
        dst.put_u16_le(0x0002); // status flags: SERVER_STATUS_AUTOCOMMIT
        dst.put_u16_le(((caps >> 16) & 0xFFFF) as u16);
        dst.put_u8(21); // auth plugin data length (scramble + NUL)
        dst.put_bytes(0, 10); // reserved
        dst.put_slice(&self.scramble[8..]);
        dst.put_u8(0); // NUL terminator for the second scramble part
        write_null_str(dst, AUTH_PLUGIN_NAME);
    }
}

/// The client's response to [`HandshakeV10`], MySQL 4.1+ protocol.
pub struct HandshakeResponse41 {
    pub capabilities: CapabilityFlags,
    pub username: Bytes,
    pub auth_response: Bytes,
    pub database: Option<Bytes>,
    pub auth_plugin_name: Option<Bytes>,
}

impl HandshakeResponse41 {
    pub fn parse(src: &[u8]) -> Result<Self> {
        if src.len() < 32 {
            return Err(ProxyError::Protocol("handshake response shorter than fixed header".into()));
        }
        let capabilities = CapabilityFlags::from_bits_truncate(u32::from_le_bytes([src[0], src[1], src[2], src[3]]));
        // bytes [4..8) max packet size, [8] charset, [9..32) reserved are not needed downstream.
        let mut offset = 32;

        let (username, consumed) = read_null_str(&src[offset..])?;
        offset += consumed;

        let auth_response = if capabilities.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA) {
            let (data, consumed) = read_lenenc_str(&src[offset..])?;
            offset += consumed;
            data
        } else if capabilities.contains(CapabilityFlags::CLIENT_SECURE_CONNECTION) {
            let len = *src.get(offset).ok_or_else(|| ProxyError::Protocol("truncated auth response length".into()))? as usize;
            offset += 1;
            let data = src.get(offset..offset + len).ok_or_else(|| ProxyError::Protocol("truncated auth response".into()))?;
            offset += len;
            Bytes::copy_from_slice(data)
        } else {
            let (data, consumed) = read_null_str(&src[offset..])?;
            offset += consumed;
            data
        };

        let database = if capabilities.contains(CapabilityFlags::CLIENT_CONNECT_WITH_DB) {
            let (data, consumed) = read_null_str(&src[offset..])?;
            offset += consumed;
            Some(data)
        } else {
            None
        };

        let auth_plugin_name = if capabilities.contains(CapabilityFlags::CLIENT_PLUGIN_AUTH) {
            let (data, consumed) = read_null_str(&src[offset..])?;
            offset += consumed;
            Some(data)
        } else {
            None
        };
        let _ = offset;

        Ok(Self { capabilities, username, auth_response, database, auth_plugin_name })
    }
}
