use crate::protocol::Value;

/// A possible error decoding a RESP frame.
///
/// `Incomplete` is a flow-control signal: the buffer ends in the middle of
/// a frame and the caller should read more bytes. Only `Protocol` is fatal
/// for a connection.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("incomplete frame")]
    Incomplete,

    #[error("{0}")]
    Protocol(String),
}

impl DecodeError {
    fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }
}

/// A decoded value together with the number of buffer bytes it occupied,
/// including any stray CRLF skipped in front of it.
#[derive(Debug)]
pub struct Frame {
    pub value: Value,
    pub consumed: usize,
}

/// Decode every complete frame in `buffer`.
///
/// Returns the frames and the offset where the undecoded tail begins; the
/// caller keeps those bytes and retries once more data has arrived, so the
/// decoder is resumable across socket reads.
pub fn decode(buffer: &[u8]) -> Result<(Vec<Frame>, usize), DecodeError> {
    let mut frames = Vec::new();
    let mut pos = 0;

    while pos < buffer.len() {
        match parse_value(buffer, pos) {
            Ok((value, next)) => {
                frames.push(Frame {
                    value,
                    consumed: next - pos,
                });
                pos = next;
            }
            Err(DecodeError::Incomplete) => break,
            Err(err) => return Err(err),
        }
    }

    Ok((frames, pos))
}

fn parse_value(buffer: &[u8], mut pos: usize) -> Result<(Value, usize), DecodeError> {
    // Tolerate stray CRLFs left over between frames.
    while buffer[pos..].starts_with(b"\r\n") {
        pos += 2;
    }

    if pos >= buffer.len() {
        return Err(DecodeError::Incomplete);
    }

    match buffer[pos] {
        b'+' => parse_simple_string(buffer, pos),
        b'-' => parse_simple_error(buffer, pos),
        b':' => parse_integer(buffer, pos),
        b'$' => parse_bulk_string(buffer, pos),
        b'*' => parse_array(buffer, pos),
        byte => Err(DecodeError::protocol(format!(
            "invalid RESP value: {}",
            byte as char
        ))),
    }
}

fn parse_simple_string(buffer: &[u8], pos: usize) -> Result<(Value, usize), DecodeError> {
    let (line, next) = read_line(buffer, pos)?;
    let value = String::from_utf8_lossy(line).into_owned();
    Ok((Value::SimpleString(value), next))
}

fn parse_simple_error(buffer: &[u8], pos: usize) -> Result<(Value, usize), DecodeError> {
    let (line, next) = read_line(buffer, pos)?;
    let value = String::from_utf8_lossy(line).into_owned();
    Ok((Value::SimpleError(value), next))
}

fn parse_integer(buffer: &[u8], pos: usize) -> Result<(Value, usize), DecodeError> {
    let (line, next) = read_line(buffer, pos)?;
    let value = parse_number(line, "invalid integer value")?;
    Ok((Value::Integer(value), next))
}

fn parse_bulk_string(buffer: &[u8], pos: usize) -> Result<(Value, usize), DecodeError> {
    let (line, payload_start) = read_line(buffer, pos)?;
    let length = parse_number(line, "invalid bulk string length")?;

    if length < 0 {
        return Ok((Value::NullBulkString, payload_start));
    }

    let length = length as usize;
    let payload_end = payload_start + length;

    if buffer.len() < payload_end + 2 {
        return Err(DecodeError::Incomplete);
    }

    if &buffer[payload_end..payload_end + 2] != b"\r\n" {
        return Err(DecodeError::protocol("bulk string not terminated by \\r\\n"));
    }

    let value = buffer[payload_start..payload_end].to_vec();
    Ok((Value::BulkString(value), payload_end + 2))
}

fn parse_array(buffer: &[u8], pos: usize) -> Result<(Value, usize), DecodeError> {
    let (line, mut pos) = read_line(buffer, pos)?;
    let length = parse_number(line, "invalid array length")?;

    if length < 0 {
        return Ok((Value::NullArray, pos));
    }

    let mut values = Vec::with_capacity(length as usize);

    for _ in 0..length {
        let (value, next) = parse_value(buffer, pos)?;
        values.push(value);
        pos = next;
    }

    // Command-name normalization: requests arrive as arrays of bulk
    // strings, and the dispatcher matches on the uppercased first element.
    if let Some(Value::BulkString(name)) = values.first_mut() {
        name.make_ascii_uppercase();
    }

    Ok((Value::Array(values), pos))
}

/// The payload of the length-prefixed line starting at `pos` (skipping the
/// prefix byte), plus the offset just past its CRLF terminator.
fn read_line(buffer: &[u8], pos: usize) -> Result<(&[u8], usize), DecodeError> {
    let start = pos + 1;
    let mut end = start;

    while end + 1 < buffer.len() {
        if buffer[end] == b'\r' && buffer[end + 1] == b'\n' {
            return Ok((&buffer[start..end], end + 2));
        }
        end += 1;
    }

    Err(DecodeError::Incomplete)
}

fn parse_number(line: &[u8], error: &str) -> Result<i64, DecodeError> {
    let text = std::str::from_utf8(line).map_err(|_| DecodeError::protocol(error))?;

    text.parse()
        .map_err(|_| DecodeError::protocol(format!("{}: {}", error, text)))
}
