use crate::protocol::{Command, Value};

/// Render a command back into its wire form. Used for the replication
/// handshake and for fanning write commands out to replicas.
pub fn to_value(command: &Command) -> Value {
    match command {
        Command::Ping => Value::command_str("PING", &[]),
        Command::Echo { message } => Value::command_str("ECHO", &[message]),
        Command::Get { key } => Value::command_str("GET", &[key]),
        Command::Set {
            key,
            value,
            expiry: None,
        } => Value::command_str("SET", &[key, value]),
        Command::Set {
            key,
            value,
            expiry: Some(expiry),
        } => {
            let expiry = expiry.as_millis().to_string();
            Value::command_str("SET", &[key, value, "PX", &expiry])
        }
        Command::Del { key } => Value::command_str("DEL", &[key]),
        Command::Exists { key } => Value::command_str("EXISTS", &[key]),
        Command::Incr { key } => Value::command_str("INCR", &[key]),
        Command::Type { key } => Value::command_str("TYPE", &[key]),
        Command::Keys { pattern } => Value::command_str("KEYS", &[pattern]),
        Command::ConfigGet { key } => Value::command_str("CONFIG", &["GET", key]),
        Command::Info { section: None } => Value::command_str("INFO", &[]),
        Command::Info {
            section: Some(section),
        } => Value::command_str("INFO", &[section]),
        Command::ReplConf { key, value } => Value::command_str("REPLCONF", &[key, value]),
        Command::ReplConfGetAck => Value::command_str("REPLCONF", &["GETACK", "*"]),
        Command::ReplConfAck { offset } => {
            let offset = offset.to_string();
            Value::command_str("REPLCONF", &["ACK", &offset])
        }
        Command::Psync {
            master_replid,
            master_repl_offset,
        } => {
            let replid = match master_replid {
                Some(replid) => replid.clone(),
                None => "?".to_string(),
            };

            let offset = match master_repl_offset {
                Some(offset) => offset.to_string(),
                None => "-1".to_string(),
            };

            Value::command_str("PSYNC", &[&replid, &offset])
        }
        Command::Wait {
            replicas,
            timeout_ms,
        } => {
            let replicas = replicas.to_string();
            let timeout = timeout_ms.to_string();
            Value::command_str("WAIT", &[&replicas, &timeout])
        }
        Command::XAdd { key, id, fields } => {
            let mut args = vec![key.as_str(), id.as_str()];
            for (field, value) in fields {
                args.push(field);
                args.push(value);
            }
            Value::command_str("XADD", &args)
        }
        Command::XRange { key, start, end } => Value::command_str("XRANGE", &[key, start, end]),
        Command::XRead {
            block_ms,
            keys,
            ids,
        } => {
            let block;
            let mut args: Vec<&str> = Vec::new();
            if let Some(timeout) = block_ms {
                block = timeout.to_string();
                args.push("BLOCK");
                args.push(&block);
            }
            args.push("STREAMS");
            args.extend(keys.iter().map(|key| key.as_str()));
            args.extend(ids.iter().map(|id| id.as_str()));
            Value::command_str("XREAD", &args)
        }
        Command::Multi => Value::command_str("MULTI", &[]),
        Command::Exec => Value::command_str("EXEC", &[]),
        Command::Discard => Value::command_str("DISCARD", &[]),
        Command::Unknown { name } => Value::command_str(name, &[]),
    }
}
