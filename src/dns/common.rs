use super::ParseError;

/// Upper bound on compression-pointer hops while reading one name.
const MAX_JUMPS: usize = 5;

/// Read a domain name starting at `start`, following compression pointers.
/// Returns the labels and the offset just past the name at the top level
/// (after the first pointer if one was followed).
pub fn read_name(buf: &[u8], start: usize) -> Result<(Vec<String>, usize), ParseError> {
    let mut labels = Vec::new();
    let mut offset = start;
    let mut jumps = 0;
    let mut resume_at = None;

    loop {
        if offset >= buf.len() {
            return Err(ParseError::InvalidLabel);
        }

        let len = buf[offset];

        if (len & 0xC0) == 0xC0 {
            if offset + 1 >= buf.len() {
                return Err(ParseError::InvalidLabel);
            }
            if resume_at.is_none() {
                resume_at = Some(offset + 2);
            }
            jumps += 1;
            if jumps > MAX_JUMPS {
                return Err(ParseError::InvalidLabel);
            }
            offset = u16::from_be_bytes([len & 0x3F, buf[offset + 1]]) as usize;
            continue;
        }

        if len == 0 {
            return Ok((labels, resume_at.unwrap_or(offset + 1)));
        }

        if len > 63 {
            return Err(ParseError::InvalidLabel);
        }

        offset += 1;
        let end = offset + len as usize;
        if end > buf.len() {
            return Err(ParseError::InvalidLabel);
        }

        let label =
            String::from_utf8(buf[offset..end].to_vec()).map_err(|_| ParseError::InvalidLabel)?;
        labels.push(label);
        offset = end;
    }
}

/// Append a name in uncompressed wire form.
pub fn write_name(out: &mut Vec<u8>, labels: &[String]) -> Result<(), ParseError> {
    for label in labels {
        if label.is_empty() || label.len() > 63 {
            return Err(ParseError::InvalidLabel);
        }
        out.push(label.len() as u8);
        out.extend_from_slice(label.as_bytes());
    }
    out.push(0);
    Ok(())
}

/// Encode a name into a fresh buffer, uncompressed.
pub fn encode_name(labels: &[String]) -> Result<Vec<u8>, ParseError> {
    let mut out = Vec::with_capacity(labels.iter().map(|l| l.len() + 1).sum::<usize>() + 1);
    write_name(&mut out, labels)?;
    Ok(out)
}

/// Split a dotted name into labels, dropping empty segments (so both
/// `example.com` and `example.com.` yield the same labels).
pub fn labels_of(name: &str) -> Vec<String> {
    name.split('.')
        .filter(|part| !part.is_empty())
        .map(|part| part.to_string())
        .collect()
}
