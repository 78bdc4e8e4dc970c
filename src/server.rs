//! Server message types.
//!
//! Server messages are used by clients to interface with the Soulseek server.
//! Only the subset needed for login, status and peer discovery is registered;
//! anything else decodes to an `Unknown` value carrying the raw code.

use bytes::{Buf, BufMut, Bytes};
use std::net::Ipv4Addr;

use crate::Token;
use crate::constants::{
    CLIENT_MINOR_VERSION, CLIENT_VERSION, ConnectionType, LoginRejectionReason, UserStatus,
};
use crate::protocol::{CodeSpace, MessageRead, MessageWrite, ProtocolRead, ProtocolWrite, login_hash};
use crate::{Error, Result};

/// Server message codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ServerCode {
    Login = 1,
    SetListenPort = 2,
    GetPeerAddress = 3,
    ConnectToPeer = 18,
    SetStatus = 28,
    SharedFoldersFiles = 35,
    CantConnectToPeer = 1001,
}

impl TryFrom<u32> for ServerCode {
    type Error = Error;

    fn try_from(value: u32) -> Result<Self> {
        match value {
            1 => Ok(ServerCode::Login),
            2 => Ok(ServerCode::SetListenPort),
            3 => Ok(ServerCode::GetPeerAddress),
            18 => Ok(ServerCode::ConnectToPeer),
            28 => Ok(ServerCode::SetStatus),
            35 => Ok(ServerCode::SharedFoldersFiles),
            1001 => Ok(ServerCode::CantConnectToPeer),
            _ => Err(Error::UnknownMessageCode(value)),
        }
    }
}

impl From<ServerCode> for u32 {
    fn from(code: ServerCode) -> Self {
        code as u32
    }
}

/// Messages that can be sent to the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerRequest {
    /// Login to the server. The MD5 digest is derived when encoding.
    Login {
        username: String,
        password: String,
        version: i32,
        minor_version: i32,
    },
    /// Set the port we're listening on for peer connections.
    SetListenPort { port: i32 },
    /// Get a peer's address.
    GetPeerAddress { username: String },
    /// Ask the server to have a peer connect to us (indirect connection).
    ConnectToPeer {
        token: Token,
        username: String,
        connection_type: ConnectionType,
    },
    /// Set our online status.
    SetStatus { status: UserStatus },
    /// Report shared folders and files count.
    SharedFoldersFiles { dirs: i32, files: i32 },
    /// Report we can't connect to a peer that asked us to.
    CantConnectToPeer { token: Token, username: String },
    /// A code this client does not know.
    Unknown { code: u32, payload: Bytes },
}

impl ServerRequest {
    /// Login request carrying this client's version numbers.
    pub fn login(username: impl Into<String>, password: impl Into<String>) -> Self {
        ServerRequest::Login {
            username: username.into(),
            password: password.into(),
            version: CLIENT_VERSION,
            minor_version: CLIENT_MINOR_VERSION,
        }
    }
}

impl MessageWrite for ServerRequest {
    const CODE_SPACE: CodeSpace = CodeSpace::Server;

    fn code(&self) -> u32 {
        let code = match self {
            ServerRequest::Login { .. } => ServerCode::Login,
            ServerRequest::SetListenPort { .. } => ServerCode::SetListenPort,
            ServerRequest::GetPeerAddress { .. } => ServerCode::GetPeerAddress,
            ServerRequest::ConnectToPeer { .. } => ServerCode::ConnectToPeer,
            ServerRequest::SetStatus { .. } => ServerCode::SetStatus,
            ServerRequest::SharedFoldersFiles { .. } => ServerCode::SharedFoldersFiles,
            ServerRequest::CantConnectToPeer { .. } => ServerCode::CantConnectToPeer,
            ServerRequest::Unknown { code, .. } => return *code,
        };
        code.into()
    }

    fn write_payload<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        match self {
            ServerRequest::Login {
                username,
                password,
                version,
                minor_version,
            } => {
                username.write_to(buf);
                password.write_to(buf);
                version.write_to(buf);
                login_hash(username, password).write_to(buf);
                minor_version.write_to(buf);
            }
            ServerRequest::SetListenPort { port } => port.write_to(buf),
            ServerRequest::GetPeerAddress { username } => username.write_to(buf),
            ServerRequest::ConnectToPeer {
                token,
                username,
                connection_type,
            } => {
                token.write_to(buf);
                username.write_to(buf);
                connection_type.as_str().write_to(buf);
            }
            ServerRequest::SetStatus { status } => i32::from(*status).write_to(buf),
            ServerRequest::SharedFoldersFiles { dirs, files } => {
                dirs.write_to(buf);
                files.write_to(buf);
            }
            ServerRequest::CantConnectToPeer { token, username } => {
                token.write_to(buf);
                username.write_to(buf);
            }
            ServerRequest::Unknown { code, .. } => return Err(Error::UnknownMessageCode(*code)),
        }
        Ok(())
    }
}

impl MessageRead for ServerRequest {
    const CODE_SPACE: CodeSpace = CodeSpace::Server;

    fn read_with_code<B: Buf>(code: u32, buf: &mut B) -> Result<Self> {
        let Ok(known) = ServerCode::try_from(code) else {
            return Ok(ServerRequest::Unknown {
                code,
                payload: buf.copy_to_bytes(buf.remaining()),
            });
        };
        match known {
            ServerCode::Login => {
                let username = String::read_from(buf)?;
                let password = String::read_from(buf)?;
                let version = i32::read_from(buf)?;
                let _digest = String::read_from(buf)?; // derived from username + password
                let minor_version = i32::read_from(buf)?;
                Ok(ServerRequest::Login {
                    username,
                    password,
                    version,
                    minor_version,
                })
            }
            ServerCode::SetListenPort => Ok(ServerRequest::SetListenPort {
                port: i32::read_from(buf)?,
            }),
            ServerCode::GetPeerAddress => Ok(ServerRequest::GetPeerAddress {
                username: String::read_from(buf)?,
            }),
            ServerCode::ConnectToPeer => {
                let token = i32::read_from(buf)?;
                let username = String::read_from(buf)?;
                let connection_type = ConnectionType::parse(&String::read_from(buf)?)?;
                Ok(ServerRequest::ConnectToPeer {
                    token,
                    username,
                    connection_type,
                })
            }
            ServerCode::SetStatus => Ok(ServerRequest::SetStatus {
                status: UserStatus::try_from(i32::read_from(buf)?)?,
            }),
            ServerCode::SharedFoldersFiles => {
                let dirs = i32::read_from(buf)?;
                let files = i32::read_from(buf)?;
                Ok(ServerRequest::SharedFoldersFiles { dirs, files })
            }
            ServerCode::CantConnectToPeer => {
                let token = i32::read_from(buf)?;
                let username = String::read_from(buf)?;
                Ok(ServerRequest::CantConnectToPeer { token, username })
            }
        }
    }
}

/// Messages received from the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerResponse {
    /// Login accepted.
    LoginSuccess {
        greeting: String,
        own_ip: Ipv4Addr,
        password_digest: Option<String>,
    },
    /// Login rejected.
    LoginFailure { reason: LoginRejectionReason },
    /// A peer's address. An all-zero address means the user is offline.
    PeerAddress {
        username: String,
        ip: Ipv4Addr,
        port: i32,
    },
    /// A peer asks us to connect to it and pierce its firewall.
    ConnectToPeer {
        username: String,
        connection_type: ConnectionType,
        ip: Ipv4Addr,
        port: i32,
        token: Token,
        privileged: bool,
    },
    /// The peer could not satisfy our ConnectToPeer request.
    CantConnectToPeer {
        token: Token,
        username: Option<String>,
    },
    /// A code this client does not know, or one the server never sends.
    Unknown { code: u32, payload: Bytes },
}

impl MessageRead for ServerResponse {
    const CODE_SPACE: CodeSpace = CodeSpace::Server;

    fn read_with_code<B: Buf>(code: u32, buf: &mut B) -> Result<Self> {
        match ServerCode::try_from(code) {
            Ok(ServerCode::Login) => {
                let success = bool::read_from(buf)?;
                if success {
                    let greeting = String::read_from(buf)?;
                    let own_ip = Ipv4Addr::read_from(buf)?;
                    let password_digest = if buf.has_remaining() {
                        Some(String::read_from(buf)?)
                    } else {
                        None
                    };
                    Ok(ServerResponse::LoginSuccess {
                        greeting,
                        own_ip,
                        password_digest,
                    })
                } else {
                    let reason = LoginRejectionReason::from_string(String::read_from(buf)?);
                    Ok(ServerResponse::LoginFailure { reason })
                }
            }
            Ok(ServerCode::GetPeerAddress) => {
                let username = String::read_from(buf)?;
                let ip = Ipv4Addr::read_from(buf)?;
                let port = i32::read_from(buf)?;
                Ok(ServerResponse::PeerAddress { username, ip, port })
            }
            Ok(ServerCode::ConnectToPeer) => {
                let username = String::read_from(buf)?;
                let connection_type = ConnectionType::parse(&String::read_from(buf)?)?;
                let ip = Ipv4Addr::read_from(buf)?;
                let port = i32::read_from(buf)?;
                let token = i32::read_from(buf)?;
                let privileged = if buf.has_remaining() {
                    bool::read_from(buf)?
                } else {
                    false
                };
                Ok(ServerResponse::ConnectToPeer {
                    username,
                    connection_type,
                    ip,
                    port,
                    token,
                    privileged,
                })
            }
            Ok(ServerCode::CantConnectToPeer) => {
                let token = i32::read_from(buf)?;
                let username = if buf.has_remaining() {
                    Some(String::read_from(buf)?)
                } else {
                    None
                };
                Ok(ServerResponse::CantConnectToPeer { token, username })
            }
            Ok(
                ServerCode::SetListenPort | ServerCode::SetStatus | ServerCode::SharedFoldersFiles,
            )
            | Err(_) => Ok(ServerResponse::Unknown {
                code,
                payload: buf.copy_to_bytes(buf.remaining()),
            }),
        }
    }
}

impl MessageWrite for ServerResponse {
    const CODE_SPACE: CodeSpace = CodeSpace::Server;

    fn code(&self) -> u32 {
        let code = match self {
            ServerResponse::LoginSuccess { .. } | ServerResponse::LoginFailure { .. } => {
                ServerCode::Login
            }
            ServerResponse::PeerAddress { .. } => ServerCode::GetPeerAddress,
            ServerResponse::ConnectToPeer { .. } => ServerCode::ConnectToPeer,
            ServerResponse::CantConnectToPeer { .. } => ServerCode::CantConnectToPeer,
            ServerResponse::Unknown { code, .. } => return *code,
        };
        code.into()
    }

    fn write_payload<B: BufMut>(&self, buf: &mut B) -> Result<()> {
        match self {
            ServerResponse::LoginSuccess {
                greeting,
                own_ip,
                password_digest,
            } => {
                true.write_to(buf);
                greeting.write_to(buf);
                own_ip.write_to(buf);
                if let Some(digest) = password_digest {
                    digest.write_to(buf);
                }
            }
            ServerResponse::LoginFailure { reason } => {
                false.write_to(buf);
                reason.as_str().write_to(buf);
            }
            ServerResponse::PeerAddress { username, ip, port } => {
                username.write_to(buf);
                ip.write_to(buf);
                port.write_to(buf);
            }
            ServerResponse::ConnectToPeer {
                username,
                connection_type,
                ip,
                port,
                token,
                privileged,
            } => {
                username.write_to(buf);
                connection_type.as_str().write_to(buf);
                ip.write_to(buf);
                port.write_to(buf);
                token.write_to(buf);
                privileged.write_to(buf);
            }
            ServerResponse::CantConnectToPeer { token, username } => {
                token.write_to(buf);
                if let Some(username) = username {
                    username.write_to(buf);
                }
            }
            ServerResponse::Unknown { code, .. } => return Err(Error::UnknownMessageCode(*code)),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::read_message;
    use bytes::BytesMut;

    fn roundtrip_request(msg: ServerRequest) -> ServerRequest {
        let frame = msg.to_frame().unwrap();
        read_message(&mut frame.clone()).unwrap()
    }

    fn roundtrip_response(msg: ServerResponse) -> ServerResponse {
        let frame = msg.to_frame().unwrap();
        read_message(&mut frame.clone()).unwrap()
    }

    #[test]
    fn test_login_wire_layout() {
        let frame = ServerRequest::login("alice", "secret").to_frame().unwrap();
        let mut buf = frame.clone();

        let len = i32::read_from(&mut buf).unwrap();
        assert_eq!(len as usize, frame.len() - 4);
        assert_eq!(i32::read_from(&mut buf).unwrap(), 1);
        assert_eq!(String::read_from(&mut buf).unwrap(), "alice");
        assert_eq!(String::read_from(&mut buf).unwrap(), "secret");
        assert_eq!(i32::read_from(&mut buf).unwrap(), CLIENT_VERSION);
        assert_eq!(
            String::read_from(&mut buf).unwrap(),
            format!("{:x}", md5::compute(b"alicesecret"))
        );
        assert_eq!(i32::read_from(&mut buf).unwrap(), CLIENT_MINOR_VERSION);
        assert!(!buf.has_remaining());
    }

    #[test]
    fn test_request_roundtrips() {
        let requests = vec![
            ServerRequest::login("alice", ""),
            ServerRequest::SetListenPort { port: 2234 },
            ServerRequest::GetPeerAddress {
                username: String::new(),
            },
            ServerRequest::ConnectToPeer {
                token: 42,
                username: "bob".to_string(),
                connection_type: ConnectionType::Peer,
            },
            ServerRequest::SetStatus {
                status: UserStatus::Online,
            },
            ServerRequest::SharedFoldersFiles { dirs: 0, files: 0 },
            ServerRequest::CantConnectToPeer {
                token: -7,
                username: "carol".to_string(),
            },
        ];
        for request in requests {
            assert_eq!(roundtrip_request(request.clone()), request);
        }
    }

    #[test]
    fn test_response_roundtrips() {
        let responses = vec![
            ServerResponse::LoginSuccess {
                greeting: String::new(),
                own_ip: Ipv4Addr::new(10, 0, 0, 1),
                password_digest: None,
            },
            ServerResponse::LoginSuccess {
                greeting: "Welcome".to_string(),
                own_ip: Ipv4Addr::new(10, 0, 0, 1),
                password_digest: Some("abc".to_string()),
            },
            ServerResponse::LoginFailure {
                reason: LoginRejectionReason::InvalidPassword,
            },
            ServerResponse::PeerAddress {
                username: "bob".to_string(),
                ip: Ipv4Addr::new(127, 0, 0, 1),
                port: 2234,
            },
            ServerResponse::ConnectToPeer {
                username: "bob".to_string(),
                connection_type: ConnectionType::Peer,
                ip: Ipv4Addr::new(1, 2, 3, 4),
                port: 5000,
                token: 42,
                privileged: true,
            },
            ServerResponse::CantConnectToPeer {
                token: 42,
                username: None,
            },
        ];
        for response in responses {
            assert_eq!(roundtrip_response(response.clone()), response);
        }
    }

    #[test]
    fn test_connect_to_peer_without_privileged_flag() {
        let mut body = BytesMut::new();
        "bob".write_to(&mut body);
        "P".write_to(&mut body);
        Ipv4Addr::new(1, 2, 3, 4).write_to(&mut body);
        5000i32.write_to(&mut body);
        9i32.write_to(&mut body);

        let mut frame = BytesMut::new();
        (4 + body.len() as i32).write_to(&mut frame);
        18i32.write_to(&mut frame);
        frame.extend_from_slice(&body);

        match read_message::<ServerResponse, _>(&mut frame.freeze()).unwrap() {
            ServerResponse::ConnectToPeer {
                token, privileged, ..
            } => {
                assert_eq!(token, 9);
                assert!(!privileged);
            }
            other => panic!("Wrong message type: {other:?}"),
        }
    }

    #[test]
    fn test_unknown_code_is_sentinel() {
        let mut frame = BytesMut::new();
        8i32.write_to(&mut frame);
        9999i32.write_to(&mut frame);
        frame.extend_from_slice(&[1, 2, 3, 4]);

        let msg: ServerResponse = read_message(&mut frame.freeze()).unwrap();
        assert_eq!(
            msg,
            ServerResponse::Unknown {
                code: 9999,
                payload: Bytes::from_static(&[1, 2, 3, 4]),
            }
        );
        assert!(matches!(
            msg.to_frame(),
            Err(Error::UnknownMessageCode(9999))
        ));
    }
}
