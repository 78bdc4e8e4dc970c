//! Peer initialization messages.
//!
//! Peer init messages are the first frame on a fresh peer socket. Unlike every
//! other frame their code is a single byte.

use bytes::{Buf, BufMut, Bytes};

use crate::Token;
use crate::constants::ConnectionType;
use crate::protocol::{CodeSpace, MessageRead, MessageWrite, ProtocolRead, ProtocolWrite};
use crate::{Error, Result};

/// Peer init message codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PeerInitCode {
    PierceFirewall = 0,
    PeerInit = 1,
}

impl TryFrom<u8> for PeerInitCode {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(PeerInitCode::PierceFirewall),
            1 => Ok(PeerInitCode::PeerInit),
            _ => Err(Error::UnknownMessageCode(u32::from(value))),
        }
    }
}

impl From<PeerInitCode> for u8 {
    fn from(code: PeerInitCode) -> Self {
        code as u8
    }
}

/// Peer initialization messages.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerInitMessage {
    /// Response to an indirect connection request.
    /// Token is from the ConnectToPeer server message.
    PierceFirewall { token: Token },

    /// Initiate a direct connection to another peer.
    PeerInit {
        username: String,
        connection_type: ConnectionType,
        token: Token,
    },

    /// A code this client does not know.
    Unknown { code: u32, payload: Bytes },
}

impl MessageWrite for PeerInitMessage {
    const CODE_SPACE: CodeSpace = CodeSpace::PeerInit;

    fn code(&self) -> u32 {
        let code = match self {
            PeerInitMessage::PierceFirewall { .. } => PeerInitCode::PierceFirewall,
            PeerInitMessage::PeerInit { .. } => PeerInitCode::PeerInit,
            PeerInitMessage::Unknown { code, .. } => return *code,
        };
        u32::from(u8::from(code))
    }

    fn write_payload<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        match self {
            PeerInitMessage::PierceFirewall { token } => {
                token.write_to(buf);
            }
            PeerInitMessage::PeerInit {
                username,
                connection_type,
                token,
            } => {
                username.write_to(buf);
                connection_type.as_str().write_to(buf);
                token.write_to(buf);
            }
            PeerInitMessage::Unknown { code, .. } => {
                return Err(Error::UnknownMessageCode(*code));
            }
        }
        Ok(())
    }
}

impl MessageRead for PeerInitMessage {
    const CODE_SPACE: CodeSpace = CodeSpace::PeerInit;

    fn read_with_code<B: Buf>(code: u32, buf: &mut B) -> Result<Self> {
        let known = u8::try_from(code)
            .ok()
            .and_then(|c| PeerInitCode::try_from(c).ok());
        match known {
            Some(PeerInitCode::PierceFirewall) => {
                let token = i32::read_from(buf)?;
                Ok(PeerInitMessage::PierceFirewall { token })
            }
            Some(PeerInitCode::PeerInit) => {
                let username = String::read_from(buf)?;
                let conn_type_str = String::read_from(buf)?;
                let connection_type = ConnectionType::parse(&conn_type_str)?;
                let token = i32::read_from(buf)?;
                Ok(PeerInitMessage::PeerInit {
                    username,
                    connection_type,
                    token,
                })
            }
            None => Ok(PeerInitMessage::Unknown {
                code,
                payload: buf.copy_to_bytes(buf.remaining()),
            }),
        }
    }
}
