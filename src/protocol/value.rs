use bytes::Bytes;

/// A RESP value, either decoded off the wire or about to be written to it.
///
/// `Rdb` is the one non-standard frame: a bulk-length-prefixed payload with
/// no trailing CRLF, used for the FULLRESYNC snapshot body.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    SimpleString(String),

    SimpleError(String),

    Integer(i64),

    BulkString(Vec<u8>),

    Array(Vec<Value>),

    NullBulkString,

    NullArray,

    Rdb(Bytes),
}

impl Value {
    pub fn ok() -> Self {
        Self::simple_string("OK")
    }

    pub fn simple_string(value: &str) -> Self {
        Self::SimpleString(value.to_string())
    }

    pub fn simple_error(value: &str) -> Self {
        Self::SimpleError(value.to_string())
    }

    pub fn bulk_string(value: &str) -> Self {
        Self::BulkString(value.as_bytes().to_vec())
    }

    /// Reply-domain text. The empty string encodes as a null bulk string;
    /// callers that need a literal empty bulk use `bulk_string` instead.
    pub fn text(value: &str) -> Self {
        if value.is_empty() {
            Self::NullBulkString
        } else {
            Self::bulk_string(value)
        }
    }

    pub fn command_str(command: &str, args: &[&str]) -> Self {
        let mut array = Vec::with_capacity(args.len() + 1);
        array.push(Self::bulk_string(command));
        array.extend(args.iter().map(|arg| Self::bulk_string(arg)));
        Self::Array(array)
    }

    /// The decoded text of a bulk string, with replacement for invalid UTF-8.
    pub fn as_text(&self) -> Option<String> {
        match self {
            Value::BulkString(bytes) => Some(String::from_utf8_lossy(bytes).into_owned()),
            Value::SimpleString(value) => Some(value.clone()),
            _ => None,
        }
    }
}
