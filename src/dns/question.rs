use super::common::{labels_of, read_name, write_name};
use super::enums::{RecordClass, RecordType};
use super::ParseError;

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DNSQuestion {
    pub labels: Vec<String>,
    pub qtype: RecordType,
    pub qclass: RecordClass,
}

impl DNSQuestion {
    pub fn new(name: &str, qtype: RecordType) -> Self {
        DNSQuestion {
            labels: labels_of(name),
            qtype,
            qclass: RecordClass::IN,
        }
    }

    /// Owner name as a dot-terminated, lowercased FQDN. This is the canonical
    /// form used for cache keys, PTR table lookups and rule routing.
    pub fn fqdn(&self) -> String {
        let mut name = String::with_capacity(self.labels.iter().map(|l| l.len() + 1).sum());
        for label in &self.labels {
            name.push_str(&label.to_lowercase());
            name.push('.');
        }
        if name.is_empty() {
            name.push('.');
        }
        name
    }

    pub(super) fn parse(buf: &[u8], offset: usize) -> Result<(Self, usize), ParseError> {
        let (labels, offset) = read_name(buf, offset)?;
        if offset + 4 > buf.len() {
            return Err(ParseError::InvalidQuestion);
        }

        let qtype = u16::from_be_bytes([buf[offset], buf[offset + 1]]).into();
        let qclass = u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]).into();

        Ok((
            DNSQuestion {
                labels,
                qtype,
                qclass,
            },
            offset + 4,
        ))
    }

    pub(super) fn write(&self, out: &mut Vec<u8>) -> Result<(), ParseError> {
        write_name(out, &self.labels)?;
        out.extend_from_slice(&u16::from(self.qtype).to_be_bytes());
        out.extend_from_slice(&u16::from(self.qclass).to_be_bytes());
        Ok(())
    }
}
