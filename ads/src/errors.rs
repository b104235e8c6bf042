use std::fmt::{self, Display};

use crate::{CommandId, DecodeError, FrameError};

/// Non-zero result code reported by an ADS device, either in the AMS header or in the leading
/// result field of a response payload.
#[derive(Copy, Clone, Debug, Eq, Hash, PartialEq)]
pub struct AdsError(pub u32);

impl AdsError {
    pub const TARGET_PORT_NOT_FOUND: AdsError = AdsError(0x0006);
    pub const TARGET_MACHINE_NOT_FOUND: AdsError = AdsError(0x0007);
    pub const DEVICE_ERROR: AdsError = AdsError(0x0700);
    pub const SERVICE_NOT_SUPPORTED: AdsError = AdsError(0x0701);
    pub const INVALID_INDEX_GROUP: AdsError = AdsError(0x0702);
    pub const INVALID_INDEX_OFFSET: AdsError = AdsError(0x0703);
    pub const INVALID_SIZE: AdsError = AdsError(0x0705);
    pub const INVALID_DATA: AdsError = AdsError(0x0706);
    pub const NOT_READY: AdsError = AdsError(0x0707);
    pub const BUSY: AdsError = AdsError(0x0708);
    pub const SYMBOL_NOT_FOUND: AdsError = AdsError(0x0710);
    pub const SYMBOL_VERSION_INVALID: AdsError = AdsError(0x0711);
    pub const INVALID_NOTIFICATION_HANDLE: AdsError = AdsError(0x0714);
    pub const DEVICE_TIMEOUT: AdsError = AdsError(0x0719);

    fn description(&self) -> Option<&'static str> {
        let description = match *self {
            AdsError::TARGET_PORT_NOT_FOUND => "target port not found",
            AdsError::TARGET_MACHINE_NOT_FOUND => "target machine not found",
            AdsError::DEVICE_ERROR => "general device error",
            AdsError::SERVICE_NOT_SUPPORTED => "service not supported",
            AdsError::INVALID_INDEX_GROUP => "invalid index group",
            AdsError::INVALID_INDEX_OFFSET => "invalid index offset",
            AdsError::INVALID_SIZE => "invalid size",
            AdsError::INVALID_DATA => "invalid data",
            AdsError::NOT_READY => "device not ready",
            AdsError::BUSY => "device busy",
            AdsError::SYMBOL_NOT_FOUND => "symbol not found",
            AdsError::SYMBOL_VERSION_INVALID => "symbol version invalid",
            AdsError::INVALID_NOTIFICATION_HANDLE => "invalid notification handle",
            AdsError::DEVICE_TIMEOUT => "device timeout",
            _ => return None,
        };
        Some(description)
    }
}

impl Display for AdsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.description() {
            Some(description) => write!(f, "{} ({:#06x})", description, self.0),
            None => write!(f, "ADS error {:#06x}", self.0),
        }
    }
}

#[derive(Debug)]
pub enum ErrorKind {
    UnsupportedCommand(u16),
    UnexpectedResponse(CommandId),
    InvalidNetId(String),
    Ads(AdsError),
    Frame(FrameError),
    Protocol(String),
    Decode(DecodeError),
    Io(std::io::Error),
    TransportClosed,
    Timeout,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::UnsupportedCommand(command_id) => {
                write!(f, "unsupported command ID: {}", command_id)
            }
            ErrorKind::UnexpectedResponse(command_id) => {
                write!(f, "unexpected command ID as response: {}", command_id)
            }
            ErrorKind::InvalidNetId(net_id) => write!(f, "invalid AMS NetId: {:?}", net_id),
            ErrorKind::Ads(error) => write!(f, "device returned {}", error),
            ErrorKind::Frame(error) => write!(f, "AMS/TCP framing error: {}", error),
            ErrorKind::Protocol(message) => write!(f, "protocol error: {}", message),
            ErrorKind::Decode(error) => write!(f, "decode error: {}", error),
            ErrorKind::Io(error) => write!(f, "IO error: {}", error),
            ErrorKind::TransportClosed => write!(f, "transport closed"),
            ErrorKind::Timeout => write!(f, "request timed out"),
        }
    }
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
}

impl Error {
    pub fn protocol<M>(message: M) -> Self
    where
        M: Into<String>,
    {
        ErrorKind::Protocol(message.into()).into()
    }

    /// The ADS result code, if the device rejected the request.
    pub fn ads_error(&self) -> Option<AdsError> {
        match self.kind {
            ErrorKind::Ads(error) => Some(error),
            _ => None,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ads error: {}", self.kind)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(other: std::io::Error) -> Self {
        let kind = match other.kind() {
            // Only raised when decoding from an in-memory buffer; the frame reader maps a short
            // socket read to TransportClosed itself.
            std::io::ErrorKind::UnexpectedEof => ErrorKind::Protocol("truncated packet".into()),
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe => ErrorKind::TransportClosed,
            _ => ErrorKind::Io(other),
        };
        Error { kind }
    }
}

impl From<FrameError> for Error {
    fn from(other: FrameError) -> Self {
        Error {
            kind: ErrorKind::Frame(other),
        }
    }
}

impl From<DecodeError> for Error {
    fn from(other: DecodeError) -> Self {
        Error {
            kind: ErrorKind::Decode(other),
        }
    }
}

impl From<AdsError> for Error {
    fn from(other: AdsError) -> Self {
        Error {
            kind: ErrorKind::Ads(other),
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Self { kind }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
