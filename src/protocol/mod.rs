pub mod codec;
pub mod command;
pub mod handshake;
pub mod lenenc;
pub mod packet;
pub mod response;
pub mod value;

pub use codec::PacketCodec;
pub use command::{ClientCommand, CommandError};
pub use handshake::{ClientHandshake, HandshakeMessage, ServerGreeting, SslRequest};
pub use lenenc::CodecError;
pub use packet::{capabilities, status, Packet};
pub use response::{error_codes, ColumnDefinition, EofPacket, ErrPacket, OkPacket};
pub use value::ValueError;
