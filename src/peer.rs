//! Peer messages sent over P connections.

use bytes::{Buf, BufMut, Bytes};

use crate::protocol::{
    CodeSpace, MessageRead, MessageWrite, ProtocolRead, ProtocolWrite, read_bytes, write_bytes,
};
use crate::shares::ShareListing;
use crate::{Error, Result};

/// Peer message codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum PeerCode {
    SharesRequest = 4,
    SharesReply = 5,
    GetUserInfoRequest = 15,
    GetUserInfoReply = 16,
}

impl TryFrom<u32> for PeerCode {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            4 => Ok(PeerCode::SharesRequest),
            5 => Ok(PeerCode::SharesReply),
            15 => Ok(PeerCode::GetUserInfoRequest),
            16 => Ok(PeerCode::GetUserInfoReply),
            _ => Err(Error::UnknownMessageCode(value)),
        }
    }
}

impl From<PeerCode> for u32 {
    fn from(code: PeerCode) -> Self {
        code as u32
    }
}

/// Peer messages.
#[derive(Debug, Clone, PartialEq)]
pub enum PeerMessage {
    /// Request shared file list.
    SharesRequest,

    /// Response with shared file list.
    SharesReply { listing: ShareListing },

    /// Request user info.
    GetUserInfoRequest,

    /// Response with user info.
    ///
    /// `queue_size` and `slots_free` are carried as-is; this client does not
    /// interpret them.
    GetUserInfoReply {
        description: String,
        picture: Option<Vec<u8>>,
        total_uploads: i32,
        queue_size: i32,
        slots_free: bool,
    },

    /// A code this client does not know.
    Unknown { code: u32, payload: Bytes },
}

impl MessageWrite for PeerMessage {
    const CODE_SPACE: CodeSpace = CodeSpace::Peer;

    fn code(&self) -> u32 {
        let code = match self {
            PeerMessage::SharesRequest => PeerCode::SharesRequest,
            PeerMessage::SharesReply { .. } => PeerCode::SharesReply,
            PeerMessage::GetUserInfoRequest => PeerCode::GetUserInfoRequest,
            PeerMessage::GetUserInfoReply { .. } => PeerCode::GetUserInfoReply,
            PeerMessage::Unknown { code, .. } => return *code,
        };
        code.into()
    }

    fn write_payload<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        match self {
            PeerMessage::SharesRequest | PeerMessage::GetUserInfoRequest => {}
            PeerMessage::SharesReply { listing } => {
                buf.put_slice(&listing.compress()?);
            }
            PeerMessage::GetUserInfoReply {
                description,
                picture,
                total_uploads,
                queue_size,
                slots_free,
            } => {
                description.write_to(buf);
                if let Some(pic) = picture {
                    true.write_to(buf);
                    write_bytes(buf, pic);
                } else {
                    false.write_to(buf);
                }
                total_uploads.write_to(buf);
                queue_size.write_to(buf);
                slots_free.write_to(buf);
            }
            PeerMessage::Unknown { code, .. } => return Err(Error::UnknownMessageCode(*code)),
        }
        Ok(())
    }
}

impl MessageRead for PeerMessage {
    const CODE_SPACE: CodeSpace = CodeSpace::Peer;

    fn read_with_code<B: Buf>(code: u32, buf: &mut B) -> Result<Self> {
        let Ok(known) = PeerCode::try_from(code) else {
            return Ok(PeerMessage::Unknown {
                code,
                payload: buf.copy_to_bytes(buf.remaining()),
            });
        };
        match known {
            PeerCode::SharesRequest => Ok(PeerMessage::SharesRequest),
            PeerCode::SharesReply => {
                let compressed = buf.copy_to_bytes(buf.remaining());
                let listing = ShareListing::decompress(&compressed)?;
                Ok(PeerMessage::SharesReply { listing })
            }
            PeerCode::GetUserInfoRequest => Ok(PeerMessage::GetUserInfoRequest),
            PeerCode::GetUserInfoReply => {
                let description = String::read_from(buf)?;
                let has_picture = bool::read_from(buf)?;
                let picture = if has_picture {
                    Some(read_bytes(buf)?)
                } else {
                    None
                };
                let total_uploads = i32::read_from(buf)?;
                let queue_size = i32::read_from(buf)?;
                let slots_free = bool::read_from(buf)?;

                Ok(PeerMessage::GetUserInfoReply {
                    description,
                    picture,
                    total_uploads,
                    queue_size,
                    slots_free,
                })
            }
        }
    }
}
