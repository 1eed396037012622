mod common;
mod enums;
mod header;
mod packet;
mod question;
mod resource;

pub use enums::{RecordClass, RecordType};
pub use header::DNSHeader;
pub use packet::DNSPacket;
pub use question::DNSQuestion;
pub use resource::DNSRecord;

use std::fmt;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    InvalidHeader,
    InvalidLabel,
    InvalidQuestion,
    InvalidRecord,
    Truncated,
    Io(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::InvalidHeader => write!(f, "Invalid DNS header"),
            ParseError::InvalidLabel => write!(f, "Invalid label in domain name"),
            ParseError::InvalidQuestion => write!(f, "Invalid question section"),
            ParseError::InvalidRecord => write!(f, "Invalid resource record"),
            ParseError::Truncated => write!(f, "Packet shorter than its section counts"),
            ParseError::Io(msg) => write!(f, "IO error: {}", msg),
        }
    }
}

impl std::error::Error for ParseError {}

impl From<std::io::Error> for ParseError {
    fn from(err: std::io::Error) -> Self {
        ParseError::Io(err.to_string())
    }
}
