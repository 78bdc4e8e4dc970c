//! Protocol constants and enumerations.

use std::fmt;

use crate::{Error, Result};

/// Connection types used in the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionType {
    /// Peer to Peer connection
    Peer,
    /// File Transfer connection
    File,
    /// Distributed Network connection
    Distributed,
}

impl ConnectionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionType::Peer => "P",
            ConnectionType::File => "F",
            ConnectionType::Distributed => "D",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "P" => Ok(ConnectionType::Peer),
            "F" => Ok(ConnectionType::File),
            "D" => Ok(ConnectionType::Distributed),
            _ => Err(Error::InvalidConnectionType(s.to_string())),
        }
    }
}

/// User status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(i32)]
pub enum UserStatus {
    #[default]
    Offline = 0,
    Away = 1,
    Online = 2,
}

impl TryFrom<i32> for UserStatus {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            0 => Ok(UserStatus::Offline),
            1 => Ok(UserStatus::Away),
            2 => Ok(UserStatus::Online),
            _ => Err(Error::InvalidUserStatus(value)),
        }
    }
}

impl From<UserStatus> for i32 {
    fn from(status: UserStatus) -> Self {
        status as i32
    }
}

/// Login rejection reasons.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginRejectionReason {
    InvalidUsername,
    EmptyPassword,
    InvalidPassword,
    InvalidVersion,
    ServerFull,
    ServerPrivate,
    Other(String),
}

impl LoginRejectionReason {
    pub fn as_str(&self) -> &str {
        match self {
            LoginRejectionReason::InvalidUsername => "INVALIDUSERNAME",
            LoginRejectionReason::EmptyPassword => "EMPTYPASSWORD",
            LoginRejectionReason::InvalidPassword => "INVALIDPASS",
            LoginRejectionReason::InvalidVersion => "INVALIDVERSION",
            LoginRejectionReason::ServerFull => "SVRFULL",
            LoginRejectionReason::ServerPrivate => "SVRPRIVATE",
            LoginRejectionReason::Other(s) => s,
        }
    }

    pub fn from_string(s: String) -> Self {
        match s.as_str() {
            "INVALIDUSERNAME" => LoginRejectionReason::InvalidUsername,
            "EMPTYPASSWORD" => LoginRejectionReason::EmptyPassword,
            "INVALIDPASS" => LoginRejectionReason::InvalidPassword,
            "INVALIDVERSION" => LoginRejectionReason::InvalidVersion,
            "SVRFULL" => LoginRejectionReason::ServerFull,
            "SVRPRIVATE" => LoginRejectionReason::ServerPrivate,
            _ => LoginRejectionReason::Other(s),
        }
    }
}

impl fmt::Display for LoginRejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Client version sent in the Login message.
pub const CLIENT_VERSION: i32 = 182;

/// Minor client version sent in the Login message.
pub const CLIENT_MINOR_VERSION: i32 = 157;

/// Default listen port for peers.
pub const DEFAULT_PEER_PORT: u16 = 2234;

/// Default server port.
pub const DEFAULT_SERVER_PORT: u16 = 2242;

/// Default Soulseek server address.
pub const DEFAULT_SERVER_HOST: &str = "server.slsknet.org";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_type_strings() {
        for ct in [
            ConnectionType::Peer,
            ConnectionType::File,
            ConnectionType::Distributed,
        ] {
            assert_eq!(ConnectionType::parse(ct.as_str()).unwrap(), ct);
        }
        assert!(ConnectionType::parse("X").is_err());
    }

    #[test]
    fn test_login_rejection_reason_roundtrip() {
        let reason = LoginRejectionReason::from_string("INVALIDPASS".to_string());
        assert_eq!(reason, LoginRejectionReason::InvalidPassword);
        assert_eq!(reason.to_string(), "INVALIDPASS");
        assert_eq!(
            LoginRejectionReason::from_string("BANNED".to_string()),
            LoginRejectionReason::Other("BANNED".to_string())
        );
    }
}
