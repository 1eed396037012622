use super::enums::RecordType;
use super::header::{DNSHeader, HEADER_LEN};
use super::question::DNSQuestion;
use super::resource::DNSRecord;
use super::ParseError;

#[derive(Clone, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct DNSPacket {
    pub header: DNSHeader,
    pub questions: Vec<DNSQuestion>,
    pub answers: Vec<DNSRecord>,
    pub authorities: Vec<DNSRecord>,
    pub additionals: Vec<DNSRecord>,
}

impl DNSPacket {
    /// Build a recursive query for one question.
    pub fn query(id: u16, name: &str, qtype: RecordType) -> Self {
        DNSPacket {
            header: DNSHeader {
                id,
                rd: true,
                qdcount: 1,
                ..DNSHeader::default()
            },
            questions: vec![DNSQuestion::new(name, qtype)],
            answers: Vec::new(),
            authorities: Vec::new(),
            additionals: Vec::new(),
        }
    }

    /// Start a response to `req`: question copied, recursion flags set,
    /// NOERROR until a caller says otherwise.
    pub fn response_to(req: &DNSPacket) -> Self {
        DNSPacket {
            header: DNSHeader {
                id: req.header.id,
                qr: true,
                opcode: req.header.opcode,
                rd: req.header.rd,
                ra: true,
                qdcount: req.questions.len() as u16,
                ..DNSHeader::default()
            },
            questions: req.questions.clone(),
            answers: Vec::new(),
            authorities: Vec::new(),
            additionals: Vec::new(),
        }
    }

    pub fn parse(buf: &[u8]) -> Result<Self, ParseError> {
        let header = DNSHeader::parse(buf)?;
        let mut offset = HEADER_LEN;

        let mut questions = Vec::with_capacity(header.qdcount as usize);
        for _ in 0..header.qdcount {
            let (question, next) = DNSQuestion::parse(buf, offset)?;
            questions.push(question);
            offset = next;
        }

        let mut sections = [Vec::new(), Vec::new(), Vec::new()];
        for (section, count) in sections
            .iter_mut()
            .zip([header.ancount, header.nscount, header.arcount])
        {
            section.reserve(count as usize);
            for _ in 0..count {
                let (record, next) = DNSRecord::parse(buf, offset)?;
                section.push(record);
                offset = next;
            }
        }

        let [answers, authorities, additionals] = sections;
        Ok(DNSPacket {
            header,
            questions,
            answers,
            authorities,
            additionals,
        })
    }

    /// Serialize to wire bytes, names uncompressed, section counts taken
    /// from the actual section lengths.
    pub fn serialize(&self) -> Result<Vec<u8>, ParseError> {
        let mut header = self.header.clone();
        header.qdcount = self.questions.len() as u16;
        header.ancount = self.answers.len() as u16;
        header.nscount = self.authorities.len() as u16;
        header.arcount = self.additionals.len() as u16;

        let mut out = Vec::with_capacity(512);
        header.write(&mut out)?;
        for question in &self.questions {
            question.write(&mut out)?;
        }
        for record in self
            .answers
            .iter()
            .chain(&self.authorities)
            .chain(&self.additionals)
        {
            record.write(&mut out)?;
        }
        Ok(out)
    }

    pub fn first_question(&self) -> Option<&DNSQuestion> {
        self.questions.first()
    }

    /// Smallest TTL across answer records, if any.
    pub fn min_answer_ttl(&self) -> Option<u64> {
        self.answers.iter().map(|record| record.ttl as u64).min()
    }
}
