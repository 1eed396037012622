use bitstream_io::{BigEndian, BitRead, BitReader, BitWrite, BitWriter};

use super::ParseError;

pub const HEADER_LEN: usize = 12;

#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DNSHeader {
    pub id: u16,
    pub qr: bool,
    pub opcode: u8,
    pub aa: bool,
    pub tc: bool,
    pub rd: bool,
    pub ra: bool,
    pub z: u8,
    pub rcode: u8,
    pub qdcount: u16,
    pub ancount: u16,
    pub nscount: u16,
    pub arcount: u16,
}

impl DNSHeader {
    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        if buf.len() < HEADER_LEN {
            return Err(ParseError::InvalidHeader);
        }

        let mut reader = BitReader::<_, BigEndian>::new(&buf[..HEADER_LEN]);
        let mut header = DNSHeader::default();
        header.id = reader.read_var::<u16>(16)?;
        header.qr = reader.read_var::<u8>(1)? == 1;
        header.opcode = reader.read_var::<u8>(4)?;
        header.aa = reader.read_var::<u8>(1)? == 1;
        header.tc = reader.read_var::<u8>(1)? == 1;
        header.rd = reader.read_var::<u8>(1)? == 1;
        header.ra = reader.read_var::<u8>(1)? == 1;
        header.z = reader.read_var::<u8>(3)?;
        header.rcode = reader.read_var::<u8>(4)?;
        header.qdcount = reader.read_var::<u16>(16)?;
        header.ancount = reader.read_var::<u16>(16)?;
        header.nscount = reader.read_var::<u16>(16)?;
        header.arcount = reader.read_var::<u16>(16)?;
        Ok(header)
    }

    pub fn write(&self, out: &mut Vec<u8>) -> Result<(), ParseError> {
        let mut writer = BitWriter::<_, BigEndian>::new(out);
        writer.write_var::<u16>(16, self.id)?;
        writer.write_var::<u8>(1, self.qr as u8)?;
        writer.write_var::<u8>(4, self.opcode)?;
        writer.write_var::<u8>(1, self.aa as u8)?;
        writer.write_var::<u8>(1, self.tc as u8)?;
        writer.write_var::<u8>(1, self.rd as u8)?;
        writer.write_var::<u8>(1, self.ra as u8)?;
        writer.write_var::<u8>(3, self.z)?;
        writer.write_var::<u8>(4, self.rcode)?;
        writer.write_var::<u16>(16, self.qdcount)?;
        writer.write_var::<u16>(16, self.ancount)?;
        writer.write_var::<u16>(16, self.nscount)?;
        writer.write_var::<u16>(16, self.arcount)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_round_trip() {
        let header = DNSHeader {
            id: 0xBEEF,
            qr: true,
            opcode: 0,
            aa: false,
            tc: false,
            rd: true,
            ra: true,
            z: 0,
            rcode: 3,
            qdcount: 1,
            ancount: 2,
            nscount: 0,
            arcount: 1,
        };

        let mut wire = Vec::new();
        header.write(&mut wire).unwrap();
        assert_eq!(wire.len(), HEADER_LEN);
        assert_eq!(DNSHeader::parse(&wire).unwrap(), header);
    }

    #[test]
    fn test_short_buffer_rejected() {
        assert_eq!(
            DNSHeader::parse(&[0u8; 4]).unwrap_err(),
            ParseError::InvalidHeader
        );
    }
}
