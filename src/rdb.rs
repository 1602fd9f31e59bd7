use std::collections::HashMap;
use std::io;
use std::path::Path;

/// The snapshot a master hands a freshly synced replica: a valid, empty
/// RDB image (version 11, aux fields, CRC tail), sent verbatim.
pub const EMPTY_RDB: &[u8] =
    b"REDIS0011\xfa\x09redis-ver\x057.2.0\xfa\x0aredis-bits\xc0\x40\xfa\x05ctime\
\xc2\x6d\x08\xbc\x65\xfa\x08used-mem\xc2\xb0\xc4\x10\x00\xfa\x08aof-base\xc0\x00\
\xff\xf0\x6e\x3b\xfe\xc0\xff\x5a\xa2";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RdbError {
    #[error("missing REDIS magic header")]
    BadMagic,

    #[error("truncated snapshot at offset {0}")]
    Truncated(usize),

    #[error("unsupported value type {value_type} at offset {offset}")]
    UnsupportedValueType { value_type: u8, offset: usize },
}

/// Read a snapshot file into memory; an absent file is not an error and
/// yields `None` (the server starts empty).
pub fn read_file(dir: &str, dbfilename: &str) -> io::Result<Option<Vec<u8>>> {
    let path = Path::new(dir).join(dbfilename);

    if !path.exists() {
        return Ok(None);
    }

    std::fs::read(&path).map(Some)
}

/// Decode an RDB image into key → (value, optional absolute expiry-ms).
pub fn parse(data: &[u8]) -> Result<HashMap<String, (String, Option<u64>)>, RdbError> {
    if data.len() < 9 || &data[..5] != b"REDIS" {
        return Err(RdbError::BadMagic);
    }

    let mut entries = HashMap::new();
    let mut pos = 9; // magic + 4-byte version

    while pos < data.len() {
        let op = data[pos];
        pos += 1;

        match op {
            // Aux field: string key + string value, discarded.
            0xFA => {
                let (_, next) = parse_string(data, pos)?;
                let (_, next) = parse_string(data, next)?;
                pos = next;
            }
            // Select-db: the database number, discarded.
            0xFE => {
                let (_, next) = parse_length(data, pos)?;
                pos = next;
            }
            // Resize hint: two hash table sizes, discarded.
            0xFB => {
                let (_, next) = parse_length(data, pos)?;
                let (_, next) = parse_length(data, next)?;
                pos = next;
            }
            // Expiry in seconds: 4 little-endian bytes, scaled to ms.
            0xFD => {
                let bytes = take(data, pos, 4)?;
                let expiry = u32::from_le_bytes(bytes.try_into().unwrap()) as u64 * 1000;
                let (key, value, next) = parse_key_value(data, pos + 4)?;
                entries.insert(key, (value, Some(expiry)));
                pos = next;
            }
            // Expiry in milliseconds: 8 little-endian bytes.
            0xFC => {
                let bytes = take(data, pos, 8)?;
                let expiry = u64::from_le_bytes(bytes.try_into().unwrap());
                let (key, value, next) = parse_key_value(data, pos + 8)?;
                entries.insert(key, (value, Some(expiry)));
                pos = next;
            }
            0xFF => break,
            // Anything else is the value-type byte of a plain key/value.
            _ => {
                let (key, value, next) = parse_key_value(data, pos - 1)?;
                entries.insert(key, (value, None));
                pos = next;
            }
        }
    }

    Ok(entries)
}

fn parse_key_value(data: &[u8], pos: usize) -> Result<(String, String, usize), RdbError> {
    let value_type = *take(data, pos, 1)?.first().unwrap();

    // String encoding, plus the legacy list/set/hash type bytes whose
    // payloads decode the same way here.
    if !matches!(value_type, 0 | 9 | 10 | 11 | 12 | 13) {
        return Err(RdbError::UnsupportedValueType {
            value_type,
            offset: pos,
        });
    }

    let (key, pos) = parse_string(data, pos + 1)?;
    let (value, pos) = parse_string(data, pos)?;
    Ok((key, value, pos))
}

/// Length encoding selected by the top two bits of the first byte:
/// 6-bit literal, 14-bit big-endian, 32-bit little-endian follower, or the
/// special form where the low six bits give a power of two (the
/// small-integer encoding some aux fields use).
fn parse_length(data: &[u8], pos: usize) -> Result<(usize, usize), RdbError> {
    let first = *take(data, pos, 1)?.first().unwrap();
    let pos = pos + 1;

    match first >> 6 {
        0b00 => Ok((first as usize, pos)),
        0b01 => {
            let second = *take(data, pos, 1)?.first().unwrap();
            let length = (((first & 0x3F) as usize) << 8) + second as usize;
            Ok((length, pos + 1))
        }
        0b10 => {
            let bytes = take(data, pos, 4)?;
            let length = u32::from_le_bytes(bytes.try_into().unwrap()) as usize;
            Ok((length, pos + 4))
        }
        _ => Ok((1usize << (first & 0x3F), pos)),
    }
}

fn parse_string(data: &[u8], pos: usize) -> Result<(String, usize), RdbError> {
    let (length, pos) = parse_length(data, pos)?;
    let bytes = take(data, pos, length)?;
    let value = String::from_utf8_lossy(bytes).into_owned();
    Ok((value, pos + length))
}

fn take(data: &[u8], pos: usize, len: usize) -> Result<&[u8], RdbError> {
    if pos + len > data.len() {
        return Err(RdbError::Truncated(pos));
    }
    Ok(&data[pos..pos + len])
}
