use std::fmt::{self, Display};

use ads::{AdsError, DecodeError};

#[derive(Debug)]
pub enum ErrorKind {
    ConfigInvalid(String),
    TransportClosed,
    Timeout,
    Protocol(ads::Error),
    /// The device rejected a request with an ADS result code.
    Device(AdsError),
    UnknownSymbol(String),
    NotificationRegistrationFailed { symbol: String, inner: ads::Error },
    NotConnected,
    Cancelled,
    IdleTimeout,
    /// Every symbol of an interval batch failed to read.
    ReadFailed,
    Decode(DecodeError),
    Encode(serde_json::Error),
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::ConfigInvalid(reason) => write!(f, "invalid configuration: {}", reason),
            ErrorKind::TransportClosed => write!(f, "transport closed"),
            ErrorKind::Timeout => write!(f, "request timed out"),
            ErrorKind::Protocol(error) => write!(f, "protocol: {}", error),
            ErrorKind::Device(error) => write!(f, "device: {}", error),
            ErrorKind::UnknownSymbol(name) => write!(f, "unknown symbol {:?}", name),
            ErrorKind::NotificationRegistrationFailed { symbol, inner } => write!(
                f,
                "failed to register notification for {:?}: {}",
                symbol, inner
            ),
            ErrorKind::NotConnected => write!(f, "not connected"),
            ErrorKind::Cancelled => write!(f, "cancelled"),
            ErrorKind::IdleTimeout => write!(f, "no update before the idle timeout"),
            ErrorKind::ReadFailed => write!(f, "every symbol read failed"),
            ErrorKind::Decode(error) => write!(f, "decode: {}", error),
            ErrorKind::Encode(error) => write!(f, "encode: {}", error),
        }
    }
}

#[derive(Debug)]
pub struct Error {
    pub kind: ErrorKind,
}

impl Error {
    pub fn config<M>(message: M) -> Self
    where
        M: Into<String>,
    {
        ErrorKind::ConfigInvalid(message.into()).into()
    }

    /// Whether the host should simply invoke the failed operation again.
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            ErrorKind::TransportClosed
            | ErrorKind::Timeout
            | ErrorKind::Protocol(_)
            | ErrorKind::Device(_)
            | ErrorKind::NotConnected
            | ErrorKind::IdleTimeout
            | ErrorKind::ReadFailed => true,
            ErrorKind::ConfigInvalid(_)
            | ErrorKind::UnknownSymbol(_)
            | ErrorKind::NotificationRegistrationFailed { .. }
            | ErrorKind::Cancelled
            | ErrorKind::Decode(_)
            | ErrorKind::Encode(_) => false,
        }
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)
    }
}

impl std::error::Error for Error {}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Self {
        Error { kind }
    }
}

impl From<ads::Error> for Error {
    fn from(other: ads::Error) -> Self {
        let kind = match other.kind {
            ads::ErrorKind::TransportClosed => ErrorKind::TransportClosed,
            ads::ErrorKind::Timeout => ErrorKind::Timeout,
            ads::ErrorKind::Ads(code) => ErrorKind::Device(code),
            ads::ErrorKind::Decode(error) => ErrorKind::Decode(error),
            kind => ErrorKind::Protocol(ads::Error { kind }),
        };
        Error { kind }
    }
}

impl From<DecodeError> for Error {
    fn from(other: DecodeError) -> Self {
        ErrorKind::Decode(other).into()
    }
}

pub type Result<T> = std::result::Result<T, Error>;
