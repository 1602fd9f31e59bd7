mod format;
mod parse;

use crate::protocol::Value;
use std::time::Duration;

pub use parse::FromValueError;

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Ping,

    Echo {
        message: String,
    },

    Get {
        key: String,
    },

    Set {
        key: String,
        value: String,
        expiry: Option<Duration>,
    },

    Del {
        key: String,
    },

    Exists {
        key: String,
    },

    Incr {
        key: String,
    },

    Type {
        key: String,
    },

    Keys {
        pattern: String,
    },

    ConfigGet {
        key: String,
    },

    Info {
        section: Option<String>,
    },

    ReplConf {
        key: String,
        value: String,
    },

    ReplConfGetAck,

    ReplConfAck {
        offset: u64,
    },

    Psync {
        master_replid: Option<String>,
        master_repl_offset: Option<u64>,
    },

    Wait {
        replicas: usize,
        timeout_ms: u64,
    },

    XAdd {
        key: String,
        id: String,
        fields: Vec<(String, String)>,
    },

    XRange {
        key: String,
        start: String,
        end: String,
    },

    XRead {
        block_ms: Option<u64>,
        keys: Vec<String>,
        ids: Vec<String>,
    },

    Multi,

    Exec,

    Discard,

    Unknown {
        name: String,
    },
}

impl Command {
    /// Write commands mutate the store and fan out to every replica.
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Set { .. } | Self::Del { .. } | Self::Incr { .. })
    }

    pub fn to_value(&self) -> Value {
        format::to_value(self)
    }
}

impl TryFrom<Value> for Command {
    type Error = FromValueError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        parse::from_value(value)
    }
}
