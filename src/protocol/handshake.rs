use bytes::{BufMut, Bytes, BytesMut};
use rand::RngCore;
use sha1::{Digest, Sha1};

use super::lenenc::{
    get_bytes, get_lenenc_bytes, get_null_terminated_lossy, get_u32, get_u8, put_null_terminated,
    CodecError,
};
use super::packet::capabilities::*;
use super::packet::status::SERVER_STATUS_AUTOCOMMIT;

pub const NATIVE_PASSWORD_PLUGIN: &str = "mysql_native_password";
/// utf8mb4_general_ci
pub const DEFAULT_CHARSET: u8 = 0x2d;
pub const SCRAMBLE_LEN: usize = 20;

/// Fixed-size prefix shared by SSLRequest and HandshakeResponse41
const HANDSHAKE_PREFIX_LEN: usize = 32;

/// Initial handshake (server -> client), protocol version 10
#[derive(Debug, Clone)]
pub struct ServerGreeting {
    pub server_version: String,
    pub connection_id: u32,
    pub scramble: [u8; SCRAMBLE_LEN],
    pub capability_flags: u32,
    pub character_set: u8,
    pub status_flags: u16,
}

impl ServerGreeting {
    pub fn new(connection_id: u32, server_version: &str, capability_flags: u32) -> Self {
        let mut scramble = [0u8; SCRAMBLE_LEN];
        rand::thread_rng().fill_bytes(&mut scramble);
        // The scramble is sent NUL-terminated, so it must not contain NUL itself
        for b in scramble.iter_mut() {
            if *b == 0 {
                *b = 0x5a;
            }
        }

        Self {
            server_version: server_version.to_string(),
            connection_id,
            scramble,
            capability_flags,
            character_set: DEFAULT_CHARSET,
            status_flags: SERVER_STATUS_AUTOCOMMIT,
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(128);

        buf.put_u8(10);
        put_null_terminated(&mut buf, &self.server_version);
        buf.put_u32_le(self.connection_id);

        // Auth plugin data part 1 + filler
        buf.extend_from_slice(&self.scramble[..8]);
        buf.put_u8(0);

        buf.put_u16_le((self.capability_flags & 0xFFFF) as u16);
        buf.put_u8(self.character_set);
        buf.put_u16_le(self.status_flags);
        buf.put_u16_le((self.capability_flags >> 16) as u16);

        buf.put_u8((SCRAMBLE_LEN + 1) as u8);
        buf.extend_from_slice(&[0u8; 10]);

        // Auth plugin data part 2 (12 bytes + NUL)
        buf.extend_from_slice(&self.scramble[8..]);
        buf.put_u8(0);

        put_null_terminated(&mut buf, NATIVE_PASSWORD_PLUGIN);
        buf.freeze()
    }
}

/// SSLRequest: the 32-byte handshake prefix with CLIENT_SSL set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SslRequest {
    pub capability_flags: u32,
    pub max_packet_size: u32,
    pub character_set: u8,
}

/// Handshake response (client -> server)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientHandshake {
    pub capability_flags: u32,
    pub max_packet_size: u32,
    pub character_set: u8,
    pub username: String,
    pub auth_response: Vec<u8>,
    pub database: Option<String>,
    pub auth_plugin_name: String,
}

/// What a client may send while the server waits for its handshake response
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeMessage {
    SslRequest(SslRequest),
    Response(ClientHandshake),
}

impl HandshakeMessage {
    pub fn parse(payload: &[u8]) -> Result<Self, CodecError> {
        let mut buf = payload;
        let capability_flags = get_u32(&mut buf)?;
        let max_packet_size = get_u32(&mut buf)?;
        let character_set = get_u8(&mut buf)?;
        get_bytes(&mut buf, 23)?;

        if payload.len() == HANDSHAKE_PREFIX_LEN && capability_flags & CLIENT_SSL != 0 {
            return Ok(HandshakeMessage::SslRequest(SslRequest {
                capability_flags,
                max_packet_size,
                character_set,
            }));
        }

        let username = String::from_utf8_lossy(super::lenenc::get_null_terminated(&mut buf)?)
            .into_owned();

        let auth_response = if capability_flags & CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA != 0 {
            get_lenenc_bytes(&mut buf)?.to_vec()
        } else if capability_flags & CLIENT_SECURE_CONNECTION != 0 {
            let len = get_u8(&mut buf)? as usize;
            get_bytes(&mut buf, len)?.to_vec()
        } else {
            super::lenenc::get_null_terminated(&mut buf)?.to_vec()
        };

        let database = if capability_flags & CLIENT_CONNECT_WITH_DB != 0 && !buf.is_empty() {
            Some(get_null_terminated_lossy(&mut buf)).filter(|db| !db.is_empty())
        } else {
            None
        };

        let auth_plugin_name = if capability_flags & CLIENT_PLUGIN_AUTH != 0 && !buf.is_empty() {
            get_null_terminated_lossy(&mut buf)
        } else {
            NATIVE_PASSWORD_PLUGIN.to_string()
        };

        // Connection attributes, if any, are ignored.
        Ok(HandshakeMessage::Response(ClientHandshake {
            capability_flags,
            max_packet_size,
            character_set,
            username,
            auth_response,
            database,
            auth_plugin_name,
        }))
    }
}

/// AuthSwitchRequest asking the client to answer with mysql_native_password
pub fn auth_switch_request(scramble: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(2 + NATIVE_PASSWORD_PLUGIN.len() + scramble.len() + 1);
    buf.put_u8(0xFE);
    put_null_terminated(&mut buf, NATIVE_PASSWORD_PLUGIN);
    buf.extend_from_slice(scramble);
    buf.put_u8(0);
    buf.freeze()
}

/// Compute mysql_native_password auth response
pub fn compute_auth_response(password: &str, scramble: &[u8]) -> Vec<u8> {
    if password.is_empty() {
        return Vec::new();
    }

    let stage1 = Sha1::digest(password.as_bytes());
    let stage2 = Sha1::digest(stage1);

    let mut hasher = Sha1::new();
    hasher.update(scramble);
    hasher.update(stage2);
    let mask = hasher.finalize();

    stage1.iter().zip(mask.iter()).map(|(a, b)| a ^ b).collect()
}

/// Check a client's auth response against the expected password
pub fn verify_native_password(password: &str, scramble: &[u8], auth_response: &[u8]) -> bool {
    compute_auth_response(password, scramble) == auth_response
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a HandshakeResponse41 payload the way a client library would
    pub(crate) fn client_handshake_payload(
        capability_flags: u32,
        username: &str,
        auth_response: &[u8],
        database: Option<&str>,
        plugin: &str,
    ) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u32_le(capability_flags);
        buf.put_u32_le(16 * 1024 * 1024);
        buf.put_u8(DEFAULT_CHARSET);
        buf.extend_from_slice(&[0u8; 23]);
        put_null_terminated(&mut buf, username);
        buf.put_u8(auth_response.len() as u8);
        buf.extend_from_slice(auth_response);
        if let Some(db) = database {
            put_null_terminated(&mut buf, db);
        }
        put_null_terminated(&mut buf, plugin);
        buf.to_vec()
    }

    #[test]
    fn test_greeting_layout() {
        let greeting = ServerGreeting::new(42, "8.0.31", DEFAULT_CAPABILITIES);
        let payload = greeting.encode();

        assert_eq!(payload[0], 10);
        let version_end = payload.iter().position(|&b| b == 0).unwrap();
        assert_eq!(&payload[1..version_end], b"8.0.31");

        let mut rest = &payload[version_end + 1..];
        assert_eq!(get_u32(&mut rest).unwrap(), 42);
        assert_eq!(&rest[..8], &greeting.scramble[..8]);
        assert_eq!(rest[8], 0);
        assert!(payload.ends_with(b"mysql_native_password\0"));
        assert!(!greeting.scramble.contains(&0));
    }

    #[test]
    fn test_greeting_capabilities_split() {
        let caps = DEFAULT_CAPABILITIES | CLIENT_SSL;
        let payload = ServerGreeting::new(1, "v", caps).encode();
        // version "v\0" is 2 bytes: lower caps at 1+2+4+8+1 = 16
        let lower = u16::from_le_bytes([payload[16], payload[17]]) as u32;
        let upper = u16::from_le_bytes([payload[21], payload[22]]) as u32;
        assert_eq!(lower | (upper << 16), caps);
    }

    #[test]
    fn test_parse_handshake_response() {
        let caps = CLIENT_PROTOCOL_41 | CLIENT_SECURE_CONNECTION | CLIENT_CONNECT_WITH_DB | CLIENT_PLUGIN_AUTH;
        let payload = client_handshake_payload(caps, "app", &[1, 2, 3], Some("orders"), "mysql_native_password");
        match HandshakeMessage::parse(&payload).unwrap() {
            HandshakeMessage::Response(resp) => {
                assert_eq!(resp.username, "app");
                assert_eq!(resp.auth_response, vec![1, 2, 3]);
                assert_eq!(resp.database.as_deref(), Some("orders"));
                assert_eq!(resp.auth_plugin_name, "mysql_native_password");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_ssl_request() {
        let mut buf = BytesMut::new();
        buf.put_u32_le(CLIENT_PROTOCOL_41 | CLIENT_SSL);
        buf.put_u32_le(1 << 24);
        buf.put_u8(DEFAULT_CHARSET);
        buf.extend_from_slice(&[0u8; 23]);
        match HandshakeMessage::parse(&buf).unwrap() {
            HandshakeMessage::SslRequest(req) => {
                assert_ne!(req.capability_flags & CLIENT_SSL, 0);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_parse_truncated_handshake_fails() {
        assert!(HandshakeMessage::parse(&[0x00, 0x02, 0x00]).is_err());
        // Prefix without the username terminator
        let mut buf = vec![0u8; 32];
        buf[1] = 0x02;
        buf.extend_from_slice(b"root");
        assert!(HandshakeMessage::parse(&buf).is_err());
    }

    #[test]
    fn test_native_password_roundtrip() {
        let scramble = [7u8; SCRAMBLE_LEN];
        let response = compute_auth_response("secret", &scramble);
        assert_eq!(response.len(), 20);
        assert!(verify_native_password("secret", &scramble, &response));
        assert!(!verify_native_password("other", &scramble, &response));
        assert!(verify_native_password("", &scramble, &[]));
    }

    #[test]
    fn test_auth_switch_request_layout() {
        let payload = auth_switch_request(&[1u8; SCRAMBLE_LEN]);
        assert_eq!(payload[0], 0xFE);
        assert!(payload[1..].starts_with(b"mysql_native_password\0"));
        assert_eq!(payload.len(), 1 + 22 + SCRAMBLE_LEN + 1);
    }
}
