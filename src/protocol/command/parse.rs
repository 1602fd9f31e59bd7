use crate::protocol::{Command, Value};
use std::{collections::VecDeque, fmt::Display, str::FromStr, time::Duration};

/// A frame that cannot be dispatched at all: not an array of bulk strings,
/// or an argument that fails numeric conversion. The connection layer
/// reports these as an `-Err:` line and closes, the same as a decode error.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("{0}")]
pub struct FromValueError(pub String);

impl From<&str> for FromValueError {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

// A recognized name whose argument shape does not match is answered the
// same way as a name we do not know at all: with a null bulk string.
fn unknown(name: &str) -> Result<Command, FromValueError> {
    Ok(Command::Unknown {
        name: name.to_string(),
    })
}

pub fn from_value(value: Value) -> Result<Command, FromValueError> {
    match value {
        Value::Array(values) => from_values(values),
        _ => Err("value must be a RESP array".into()),
    }
}

fn from_values(values: Vec<Value>) -> Result<Command, FromValueError> {
    if values.is_empty() {
        return Err("RESP array must not be empty".into());
    }

    let mut parts = VecDeque::with_capacity(values.len());

    for (idx, value) in values.into_iter().enumerate() {
        match value {
            Value::BulkString(bytes) => {
                parts.push_back(String::from_utf8_lossy(&bytes).into_owned());
            }
            _ => {
                return Err(FromValueError(format!(
                    "RESP array element at index {} must be a bulk string",
                    idx
                )));
            }
        }
    }

    from_parts(parts)
}

fn from_parts(mut args: VecDeque<String>) -> Result<Command, FromValueError> {
    let command = args.pop_front().unwrap();

    match command.to_uppercase().as_str() {
        "PING" => Ok(Command::Ping),
        "ECHO" => parse_echo(args),
        "GET" => parse_get(args),
        "SET" => parse_set(args),
        "DEL" => parse_del(args),
        "EXISTS" => parse_exists(args),
        "INCR" => parse_incr(args),
        "TYPE" => parse_type(args),
        "KEYS" => parse_keys(args),
        "CONFIG" => parse_config(args),
        "INFO" => parse_info(args),
        "REPLCONF" => parse_replconf(args),
        "PSYNC" => parse_psync(args),
        "WAIT" => parse_wait(args),
        "XADD" => parse_xadd(args),
        "XRANGE" => parse_xrange(args),
        "XREAD" => parse_xread(args),
        "MULTI" => Ok(Command::Multi),
        "EXEC" => Ok(Command::Exec),
        "DISCARD" => Ok(Command::Discard),
        name => unknown(name),
    }
}

fn parse_echo(mut args: VecDeque<String>) -> Result<Command, FromValueError> {
    match args.pop_front() {
        Some(message) => Ok(Command::Echo { message }),
        None => unknown("ECHO"),
    }
}

fn parse_get(mut args: VecDeque<String>) -> Result<Command, FromValueError> {
    match args.pop_front() {
        Some(key) => Ok(Command::Get { key }),
        None => unknown("GET"),
    }
}

fn parse_set(mut args: VecDeque<String>) -> Result<Command, FromValueError> {
    if args.len() < 2 {
        return unknown("SET");
    }

    let key = args.pop_front().unwrap();
    let value = args.pop_front().unwrap();

    let expiry = match args.pop_front() {
        None => None,
        Some(option) => {
            let unit_ms = match option.to_uppercase().as_str() {
                "PX" => 1,
                "EX" => 1000,
                _ => return unknown("SET"),
            };

            match args.pop_front() {
                None => return unknown("SET"),
                Some(text) => {
                    let ttl: u64 = parse_number(&text, "integer value for SET expiry")?;
                    Some(Duration::from_millis(ttl * unit_ms))
                }
            }
        }
    };

    Ok(Command::Set { key, value, expiry })
}

fn parse_del(mut args: VecDeque<String>) -> Result<Command, FromValueError> {
    match args.pop_front() {
        Some(key) => Ok(Command::Del { key }),
        None => unknown("DEL"),
    }
}

fn parse_exists(mut args: VecDeque<String>) -> Result<Command, FromValueError> {
    match args.pop_front() {
        Some(key) => Ok(Command::Exists { key }),
        None => unknown("EXISTS"),
    }
}

fn parse_incr(mut args: VecDeque<String>) -> Result<Command, FromValueError> {
    match args.pop_front() {
        Some(key) => Ok(Command::Incr { key }),
        None => unknown("INCR"),
    }
}

fn parse_type(mut args: VecDeque<String>) -> Result<Command, FromValueError> {
    match args.pop_front() {
        Some(key) => Ok(Command::Type { key }),
        None => unknown("TYPE"),
    }
}

fn parse_keys(mut args: VecDeque<String>) -> Result<Command, FromValueError> {
    match args.pop_front() {
        Some(pattern) => Ok(Command::Keys { pattern }),
        None => unknown("KEYS"),
    }
}

fn parse_config(mut args: VecDeque<String>) -> Result<Command, FromValueError> {
    if args.len() < 2 {
        return unknown("CONFIG");
    }

    let subcommand = args.pop_front().unwrap();
    let key = args.pop_front().unwrap();

    if subcommand.eq_ignore_ascii_case("GET") {
        Ok(Command::ConfigGet { key })
    } else {
        // Only CONFIG GET is supported.
        unknown("CONFIG")
    }
}

fn parse_info(mut args: VecDeque<String>) -> Result<Command, FromValueError> {
    Ok(Command::Info {
        section: args.pop_front(),
    })
}

fn parse_replconf(mut args: VecDeque<String>) -> Result<Command, FromValueError> {
    if args.len() < 2 {
        return unknown("REPLCONF");
    }

    let key = args.pop_front().unwrap();
    let value = args.pop_front().unwrap();

    if key.eq_ignore_ascii_case("GETACK") {
        return Ok(Command::ReplConfGetAck);
    }

    if key.eq_ignore_ascii_case("ACK") {
        let offset = parse_number(&value, "REPLCONF ACK offset")?;
        return Ok(Command::ReplConfAck { offset });
    }

    Ok(Command::ReplConf { key, value })
}

fn parse_psync(mut args: VecDeque<String>) -> Result<Command, FromValueError> {
    if args.len() < 2 {
        return unknown("PSYNC");
    }

    let master_replid = match args.pop_front().unwrap() {
        id if id == "?" => None,
        id => Some(id),
    };

    let offset: i64 = parse_number(&args.pop_front().unwrap(), "PSYNC offset")?;
    let master_repl_offset = if offset < 0 { None } else { Some(offset as u64) };

    Ok(Command::Psync {
        master_replid,
        master_repl_offset,
    })
}

fn parse_wait(mut args: VecDeque<String>) -> Result<Command, FromValueError> {
    if args.len() < 2 {
        return unknown("WAIT");
    }

    let replicas = parse_number(&args.pop_front().unwrap(), "WAIT replica count")?;
    let timeout_ms = parse_number(&args.pop_front().unwrap(), "WAIT timeout")?;

    Ok(Command::Wait {
        replicas,
        timeout_ms,
    })
}

fn parse_xadd(mut args: VecDeque<String>) -> Result<Command, FromValueError> {
    if args.len() < 2 {
        return unknown("XADD");
    }

    let key = args.pop_front().unwrap();
    let id = args.pop_front().unwrap();

    // Zero field/value pairs is a valid entry; a dangling field is not.
    if args.len() % 2 != 0 {
        return unknown("XADD");
    }

    let mut fields = Vec::with_capacity(args.len() / 2);
    while let (Some(field), Some(value)) = (args.pop_front(), args.pop_front()) {
        fields.push((field, value));
    }

    Ok(Command::XAdd { key, id, fields })
}

fn parse_xrange(mut args: VecDeque<String>) -> Result<Command, FromValueError> {
    if args.len() < 3 {
        return unknown("XRANGE");
    }

    let key = args.pop_front().unwrap();
    let start = args.pop_front().unwrap();
    let end = args.pop_front().unwrap();

    Ok(Command::XRange { key, start, end })
}

fn parse_xread(mut args: VecDeque<String>) -> Result<Command, FromValueError> {
    let mut block_ms = None;

    match args.front() {
        Some(arg) if arg.eq_ignore_ascii_case("BLOCK") => {
            args.pop_front();
            let value = args
                .pop_front()
                .ok_or_else(|| FromValueError("syntax error in BLOCK argument".to_string()))?;
            block_ms = Some(parse_number(&value, "BLOCK timeout")?);
        }
        _ => {}
    }

    match args.pop_front() {
        Some(arg) if arg.eq_ignore_ascii_case("STREAMS") => {}
        _ => return unknown("XREAD"),
    }

    if args.is_empty() || args.len() % 2 != 0 {
        return unknown("XREAD");
    }

    let mid = args.len() / 2;
    let mut parts: Vec<String> = args.into();
    let ids = parts.split_off(mid);

    Ok(Command::XRead {
        block_ms,
        keys: parts,
        ids,
    })
}

fn parse_number<T>(text: &str, desc: &str) -> Result<T, FromValueError>
where
    T: FromStr,
    T::Err: Display,
{
    text.parse().map_err(|_| {
        let message = format!("invalid {}: {}", desc, text);
        FromValueError(message)
    })
}
