use bytes::Bytes;

use super::lenenc::{get_lenenc_int, CodecError};
use super::packet::capabilities::CLIENT_QUERY_ATTRIBUTES;
use super::packet::Command;

/// Parsed command from a client in the command phase
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    Query(String),
    Quit,
    Unsupported(u8),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CommandError {
    #[error("empty command packet")]
    Empty,

    #[error("malformed query attributes: {0}")]
    Attributes(#[from] CodecError),

    #[error("query attributes with {0} parameters are not supported")]
    AttributesNotSupported(u64),
}

impl ClientCommand {
    /// Parse a command packet payload.
    ///
    /// When CLIENT_QUERY_ATTRIBUTES was negotiated, COM_QUERY carries a
    /// parameter count and parameter set count before the SQL text.
    pub fn parse(payload: &Bytes, capabilities: u32) -> Result<Self, CommandError> {
        let Some(&first) = payload.first() else {
            return Err(CommandError::Empty);
        };

        match Command::from(first) {
            Command::Query => {
                let mut data = &payload[1..];
                if capabilities & CLIENT_QUERY_ATTRIBUTES != 0 {
                    let parameter_count = get_lenenc_int(&mut data)?;
                    let _parameter_sets = get_lenenc_int(&mut data)?;
                    if parameter_count > 0 {
                        return Err(CommandError::AttributesNotSupported(parameter_count));
                    }
                }
                Ok(ClientCommand::Query(
                    String::from_utf8_lossy(data).into_owned(),
                ))
            }
            Command::Quit => Ok(ClientCommand::Quit),
            Command::Other(code) => Ok(ClientCommand::Unsupported(code)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_query() {
        let payload = Bytes::from_static(b"\x03SELECT 1");
        assert_eq!(
            ClientCommand::parse(&payload, 0).unwrap(),
            ClientCommand::Query("SELECT 1".into())
        );
    }

    #[test]
    fn test_parse_query_with_attribute_prefix() {
        let payload = Bytes::from_static(b"\x03\x00\x01SELECT 1");
        assert_eq!(
            ClientCommand::parse(&payload, CLIENT_QUERY_ATTRIBUTES).unwrap(),
            ClientCommand::Query("SELECT 1".into())
        );
    }

    #[test]
    fn test_parse_query_with_bound_attributes_is_rejected() {
        let payload = Bytes::from_static(b"\x03\x02\x01...");
        assert_eq!(
            ClientCommand::parse(&payload, CLIENT_QUERY_ATTRIBUTES),
            Err(CommandError::AttributesNotSupported(2))
        );
    }

    #[test]
    fn test_parse_quit_and_unsupported() {
        assert_eq!(
            ClientCommand::parse(&Bytes::from_static(b"\x01"), 0).unwrap(),
            ClientCommand::Quit
        );
        assert_eq!(
            ClientCommand::parse(&Bytes::from_static(b"\x0e"), 0).unwrap(),
            ClientCommand::Unsupported(0x0e)
        );
        assert_eq!(
            ClientCommand::parse(&Bytes::new(), 0),
            Err(CommandError::Empty)
        );
    }
}
