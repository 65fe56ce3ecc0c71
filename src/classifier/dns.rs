//! DNS question extraction.
//!
//! Only the first question is read; answers are application payload and
//! never looked at.

/// Well-known DNS port.
pub const PORT: u16 = 53;

/// Size of the fixed DNS header.
pub const HEADER_LEN: usize = 12;

const MAX_LABELS: usize = 128;

/// First question of a DNS message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Question {
    pub name: String,
    /// Bytes from the start of the message to the end of the question
    pub consumed: usize,
}

/// Read the first question, `Ok(None)` when the message carries none.
pub fn parse_question(data: &[u8]) -> Result<Option<Question>, String> {
    if data.len() < HEADER_LEN {
        return Err(format!("DNS header too short: {} bytes", data.len()));
    }

    let query_count = u16::from_be_bytes([data[4], data[5]]);
    if query_count == 0 {
        return Ok(None);
    }

    let (name, name_len) = parse_name(&data[HEADER_LEN..])?;
    let end = HEADER_LEN + name_len;
    // QTYPE and QCLASS
    if data.len() < end + 4 {
        return Err("DNS question truncated".to_string());
    }

    Ok(Some(Question {
        name,
        consumed: end + 4,
    }))
}

fn parse_name(data: &[u8]) -> Result<(String, usize), String> {
    let mut labels = Vec::with_capacity(4);
    let mut pos = 0;

    loop {
        let len = *data
            .get(pos)
            .ok_or_else(|| "Unexpected end of data while parsing domain name".to_string())?
            as usize;

        if len == 0 {
            pos += 1;
            break;
        }

        // Compression pointer; questions rarely use one, stop at it
        if (len & 0xC0) == 0xC0 {
            pos += 2;
            break;
        }

        if len > 63 {
            return Err(format!("Invalid label length: {len}"));
        }

        let label = data
            .get(pos + 1..pos + 1 + len)
            .ok_or_else(|| "Label extends beyond data".to_string())?;
        match std::str::from_utf8(label) {
            Ok(s) => labels.push(s.to_string()),
            Err(_) => labels.push(format!("[{}]", hex::encode(label))),
        }
        pos += 1 + len;

        if labels.len() > MAX_LABELS {
            return Err("Too many labels in domain name".to_string());
        }
    }

    if pos > data.len() {
        return Err("Compression pointer truncated".to_string());
    }

    let name = if labels.is_empty() {
        ".".to_string()
    } else {
        labels.join(".")
    };
    Ok((name, pos))
}
