use bytes::{Buf, BufMut, Bytes, BytesMut};

/// MySQL packet header size: 3 bytes length + 1 byte sequence
pub const PACKET_HEADER_SIZE: usize = 4;
/// Payload length that signals a continuation packet (16MB - 1)
pub const MAX_PACKET_SIZE: usize = 0xFF_FF_FF;

/// MySQL wire protocol packet
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub sequence_id: u8,
    pub payload: Bytes,
}

impl Packet {
    pub fn new(sequence_id: u8, payload: impl Into<Bytes>) -> Self {
        Self {
            sequence_id,
            payload: payload.into(),
        }
    }

    /// Write header and payload to `dst`
    pub fn encode(&self, dst: &mut BytesMut) {
        let len = self.payload.len();
        dst.reserve(PACKET_HEADER_SIZE + len);
        dst.put_uint_le(len as u64, 3);
        dst.put_u8(self.sequence_id);
        dst.extend_from_slice(&self.payload);
    }

    /// Try to decode one packet, returns None if the frame is not complete yet
    pub fn decode(src: &mut BytesMut) -> Option<Self> {
        if src.len() < PACKET_HEADER_SIZE {
            return None;
        }

        let len = src[0] as usize | ((src[1] as usize) << 8) | ((src[2] as usize) << 16);
        if src.len() < PACKET_HEADER_SIZE + len {
            return None;
        }

        let sequence_id = src[3];
        src.advance(PACKET_HEADER_SIZE);
        let payload = src.split_to(len).freeze();

        Some(Self {
            sequence_id,
            payload,
        })
    }

    /// Payload length as announced in the header of a buffered frame
    pub fn peek_len(src: &[u8]) -> Option<usize> {
        if src.len() < 3 {
            return None;
        }
        Some(src[0] as usize | ((src[1] as usize) << 8) | ((src[2] as usize) << 16))
    }
}

/// MySQL capability flags
pub mod capabilities {
    pub const CLIENT_LONG_PASSWORD: u32 = 1;
    pub const CLIENT_FOUND_ROWS: u32 = 1 << 1;
    pub const CLIENT_LONG_FLAG: u32 = 1 << 2;
    pub const CLIENT_CONNECT_WITH_DB: u32 = 1 << 3;
    pub const CLIENT_PROTOCOL_41: u32 = 1 << 9;
    pub const CLIENT_SSL: u32 = 1 << 11;
    pub const CLIENT_TRANSACTIONS: u32 = 1 << 13;
    pub const CLIENT_SECURE_CONNECTION: u32 = 1 << 15;
    pub const CLIENT_MULTI_STATEMENTS: u32 = 1 << 16;
    pub const CLIENT_MULTI_RESULTS: u32 = 1 << 17;
    pub const CLIENT_PLUGIN_AUTH: u32 = 1 << 19;
    pub const CLIENT_CONNECT_ATTRS: u32 = 1 << 20;
    pub const CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA: u32 = 1 << 21;
    pub const CLIENT_DEPRECATE_EOF: u32 = 1 << 24;
    pub const CLIENT_QUERY_ATTRIBUTES: u32 = 1 << 27;

    /// Capabilities advertised in the server greeting.
    ///
    /// CLIENT_SSL is added on top of this only when a TLS acceptor is configured.
    pub const DEFAULT_CAPABILITIES: u32 = CLIENT_LONG_PASSWORD
        | CLIENT_FOUND_ROWS
        | CLIENT_LONG_FLAG
        | CLIENT_CONNECT_WITH_DB
        | CLIENT_PROTOCOL_41
        | CLIENT_TRANSACTIONS
        | CLIENT_SECURE_CONNECTION
        | CLIENT_MULTI_STATEMENTS
        | CLIENT_MULTI_RESULTS
        | CLIENT_PLUGIN_AUTH
        | CLIENT_PLUGIN_AUTH_LENENC_CLIENT_DATA
        | CLIENT_CONNECT_ATTRS
        | CLIENT_DEPRECATE_EOF
        | CLIENT_QUERY_ATTRIBUTES;
}

/// Server status flags carried by OK and EOF packets
pub mod status {
    pub const SERVER_STATUS_IN_TRANS: u16 = 0x0001;
    pub const SERVER_STATUS_AUTOCOMMIT: u16 = 0x0002;
    pub const SERVER_MORE_RESULTS_EXISTS: u16 = 0x0008;
}

/// Leading byte of a command-phase packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Quit,
    Query,
    Other(u8),
}

impl From<u8> for Command {
    fn from(value: u8) -> Self {
        match value {
            0x01 => Command::Quit,
            0x03 => Command::Query,
            other => Command::Other(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_writes_length_and_sequence() {
        let mut buf = BytesMut::new();
        Packet::new(7, vec![0x03, b'a', b'b']).encode(&mut buf);
        assert_eq!(&buf[..], &[3, 0, 0, 7, 0x03, b'a', b'b']);
    }

    #[test]
    fn test_decode_waits_for_complete_frame() {
        let mut buf = BytesMut::from(&[5u8, 0, 0, 1, b'h', b'e'][..]);
        assert!(Packet::decode(&mut buf).is_none());
        assert_eq!(buf.len(), 6);

        buf.extend_from_slice(b"llo");
        let packet = Packet::decode(&mut buf).unwrap();
        assert_eq!(packet.sequence_id, 1);
        assert_eq!(&packet.payload[..], b"hello");
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_empty_payload() {
        let mut buf = BytesMut::from(&[0u8, 0, 0, 9][..]);
        let packet = Packet::decode(&mut buf).unwrap();
        assert_eq!(packet.sequence_id, 9);
        assert!(packet.payload.is_empty());
    }

    #[test]
    fn test_command_from_byte() {
        assert_eq!(Command::from(0x03), Command::Query);
        assert_eq!(Command::from(0x01), Command::Quit);
        assert_eq!(Command::from(0x0e), Command::Other(0x0e));
    }
}
