use std::net::{Ipv4Addr, Ipv6Addr};

use super::common::{encode_name, labels_of, read_name, write_name};
use super::enums::{RecordClass, RecordType};
use super::ParseError;

/// A resource record with raw rdata. Names inside rdata are stored in
/// uncompressed wire form (see `decode_rdata`), so a record serializes
/// correctly even when it no longer lives at its original packet offset.
#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DNSRecord {
    pub labels: Vec<String>,
    pub rtype: RecordType,
    pub rclass: RecordClass,
    pub ttl: u32,
    pub rdata: Vec<u8>,
}

impl DNSRecord {
    pub fn a(name: &str, ttl: u32, addr: Ipv4Addr) -> Self {
        DNSRecord {
            labels: labels_of(name),
            rtype: RecordType::A,
            rclass: RecordClass::IN,
            ttl,
            rdata: addr.octets().to_vec(),
        }
    }

    pub fn aaaa(name: &str, ttl: u32, addr: Ipv6Addr) -> Self {
        DNSRecord {
            labels: labels_of(name),
            rtype: RecordType::AAAA,
            rclass: RecordClass::IN,
            ttl,
            rdata: addr.octets().to_vec(),
        }
    }

    pub fn ptr(name: &str, ttl: u32, target: &str) -> Result<Self, ParseError> {
        Ok(DNSRecord {
            labels: labels_of(name),
            rtype: RecordType::PTR,
            rclass: RecordClass::IN,
            ttl,
            rdata: encode_name(&labels_of(target))?,
        })
    }

    /// Owner name as a dot-terminated string.
    pub fn name(&self) -> String {
        let mut name: String = self
            .labels
            .iter()
            .map(|label| format!("{}.", label))
            .collect();
        if name.is_empty() {
            name.push('.');
        }
        name
    }

    pub(super) fn parse(buf: &[u8], offset: usize) -> Result<(Self, usize), ParseError> {
        let (labels, offset) = read_name(buf, offset)?;
        if offset + 10 > buf.len() {
            return Err(ParseError::InvalidRecord);
        }

        let rtype: RecordType = u16::from_be_bytes([buf[offset], buf[offset + 1]]).into();
        let rclass: RecordClass = u16::from_be_bytes([buf[offset + 2], buf[offset + 3]]).into();
        let ttl = u32::from_be_bytes([
            buf[offset + 4],
            buf[offset + 5],
            buf[offset + 6],
            buf[offset + 7],
        ]);
        let rdlength = u16::from_be_bytes([buf[offset + 8], buf[offset + 9]]) as usize;

        let rdata_start = offset + 10;
        let rdata_end = rdata_start + rdlength;
        if rdata_end > buf.len() {
            return Err(ParseError::InvalidRecord);
        }

        let rdata = decode_rdata(buf, rdata_start, rdata_end, rtype)?;

        Ok((
            DNSRecord {
                labels,
                rtype,
                rclass,
                ttl,
                rdata,
            },
            rdata_end,
        ))
    }

    pub(super) fn write(&self, out: &mut Vec<u8>) -> Result<(), ParseError> {
        write_name(out, &self.labels)?;
        out.extend_from_slice(&u16::from(self.rtype).to_be_bytes());
        out.extend_from_slice(&u16::from(self.rclass).to_be_bytes());
        out.extend_from_slice(&self.ttl.to_be_bytes());
        if self.rdata.len() > u16::MAX as usize {
            return Err(ParseError::InvalidRecord);
        }
        out.extend_from_slice(&(self.rdata.len() as u16).to_be_bytes());
        out.extend_from_slice(&self.rdata);
        Ok(())
    }

    /// Human-readable rdata for the access log and the HTTP JSON view.
    pub fn rdata_text(&self) -> String {
        match self.rtype {
            RecordType::A if self.rdata.len() == 4 => {
                Ipv4Addr::new(self.rdata[0], self.rdata[1], self.rdata[2], self.rdata[3])
                    .to_string()
            }
            RecordType::AAAA if self.rdata.len() == 16 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&self.rdata);
                Ipv6Addr::from(octets).to_string()
            }
            RecordType::CNAME | RecordType::NS | RecordType::PTR | RecordType::DNAME => {
                match read_name(&self.rdata, 0) {
                    Ok((labels, _)) => {
                        labels.iter().map(|label| format!("{}.", label)).collect()
                    }
                    Err(_) => hex_string(&self.rdata),
                }
            }
            RecordType::MX if self.rdata.len() > 2 => {
                let preference = u16::from_be_bytes([self.rdata[0], self.rdata[1]]);
                match read_name(&self.rdata, 2) {
                    Ok((labels, _)) => {
                        let target: String =
                            labels.iter().map(|label| format!("{}.", label)).collect();
                        format!("{} {}", preference, target)
                    }
                    Err(_) => hex_string(&self.rdata),
                }
            }
            RecordType::TXT => txt_strings(&self.rdata),
            _ => hex_string(&self.rdata),
        }
    }
}

/// Copy rdata out of the packet, rewriting embedded names into uncompressed
/// form. Raw copy would leave compression pointers aimed at offsets that no
/// longer exist once the record is cached and re-serialized.
fn decode_rdata(
    buf: &[u8],
    start: usize,
    end: usize,
    rtype: RecordType,
) -> Result<Vec<u8>, ParseError> {
    match rtype {
        RecordType::CNAME | RecordType::NS | RecordType::PTR | RecordType::DNAME => {
            let (labels, _) = read_name(buf, start)?;
            encode_name(&labels)
        }
        RecordType::MX => {
            if start + 2 > end {
                return Err(ParseError::InvalidRecord);
            }
            let mut rdata = buf[start..start + 2].to_vec();
            let (labels, _) = read_name(buf, start + 2)?;
            rdata.extend(encode_name(&labels)?);
            Ok(rdata)
        }
        RecordType::SRV => {
            if start + 6 > end {
                return Err(ParseError::InvalidRecord);
            }
            let mut rdata = buf[start..start + 6].to_vec();
            let (labels, _) = read_name(buf, start + 6)?;
            rdata.extend(encode_name(&labels)?);
            Ok(rdata)
        }
        RecordType::SOA => {
            let (mname, offset) = read_name(buf, start)?;
            let (rname, offset) = read_name(buf, offset)?;
            if offset + 20 > buf.len() {
                return Err(ParseError::InvalidRecord);
            }
            let mut rdata = encode_name(&mname)?;
            rdata.extend(encode_name(&rname)?);
            rdata.extend_from_slice(&buf[offset..offset + 20]);
            Ok(rdata)
        }
        _ => Ok(buf[start..end].to_vec()),
    }
}

fn hex_string(data: &[u8]) -> String {
    data.iter().map(|byte| format!("{:02x}", byte)).collect()
}

/// TXT rdata is a sequence of length-prefixed character strings.
fn txt_strings(data: &[u8]) -> String {
    let mut parts = Vec::new();
    let mut offset = 0;
    while offset < data.len() {
        let len = data[offset] as usize;
        offset += 1;
        let end = (offset + len).min(data.len());
        parts.push(String::from_utf8_lossy(&data[offset..end]).into_owned());
        offset = end;
    }
    parts.join(" ")
}
