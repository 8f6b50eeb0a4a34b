use serde_derive::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::str::FromStr;

pub type WireResult<T> = Result<T, WireError>;

#[derive(Debug, Clone, Eq, PartialEq)]
pub enum WireError {
    /// The peer closed the stream.
    Closed,
    /// A frame body exceeds the hard size cap.
    TooLarge(usize),
    /// A message failed to encode or decode.
    Codec(String),
    /// Malformed `host:port` address.
    AddrParse,
    /// Configuration text failed to parse.
    Config(String),
    Io(io::ErrorKind),
}

impl From<io::Error> for WireError {
    #[inline]
    fn from(io_error: io::Error) -> Self {
        match io_error.kind() {
            io::ErrorKind::UnexpectedEof
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => WireError::Closed,
            kind => WireError::Io(kind),
        }
    }
}

impl From<bincode::Error> for WireError {
    #[inline]
    fn from(error: bincode::Error) -> Self {
        WireError::Codec(error.to_string())
    }
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            WireError::Closed => write!(f, "stream closed by peer"),
            WireError::TooLarge(size) => write!(f, "frame of {} bytes exceeds the size cap", size),
            WireError::Codec(detail) => write!(f, "codec failure: {}", detail),
            WireError::AddrParse => write!(f, "malformed host:port address"),
            WireError::Config(detail) => write!(f, "configuration failure: {}", detail),
            WireError::Io(kind) => write!(f, "io failure: {:?}", kind),
        }
    }
}

impl std::error::Error for WireError {}

/// Network location of a worker or scheduler as a `hostname:port` pair.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct WorkerAddr {
    pub host: String,
    pub port: u16,
}

impl WorkerAddr {
    #[inline]
    pub fn new<S: Into<String>>(host: S, port: u16) -> WorkerAddr {
        WorkerAddr {
            host: host.into(),
            port,
        }
    }
}

impl FromStr for WorkerAddr {
    type Err = WireError;

    /// Parse an address of the form `hostname:port`, splitting on the last
    /// colon so bare IPv6 hosts keep their inner separators.
    fn from_str(text: &str) -> WireResult<WorkerAddr> {
        let split = text.rfind(':').ok_or(WireError::AddrParse)?;
        let (host, port) = text.split_at(split);

        if host.is_empty() {
            return Err(WireError::AddrParse);
        }

        let port = port[1..].parse::<u16>().map_err(|_| WireError::AddrParse)?;

        Ok(WorkerAddr::new(host, port))
    }
}

impl fmt::Display for WorkerAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl From<(String, u16)> for WorkerAddr {
    #[inline]
    fn from((host, port): (String, u16)) -> WorkerAddr {
        WorkerAddr { host, port }
    }
}

impl From<(&str, u16)> for WorkerAddr {
    #[inline]
    fn from((host, port): (&str, u16)) -> WorkerAddr {
        WorkerAddr::new(host, port)
    }
}
