pub mod listener;
pub mod replica;
mod replication;

use crate::options::ServerOptions;
use crate::protocol::{Command, Value};
use crate::rdb;
use crate::store::{self, EntryId, Store, StreamEntry};
use anyhow::Context;
use bytes::Bytes;
use std::collections::VecDeque;
use std::fmt::Write;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info};

pub use replication::ReplicationManager;

// WAIT treats its timeout as "timeout plus a small grace", so a zero
// timeout still gives replicas a bounded chance to acknowledge.
const WAIT_GRACE_MS: u64 = 200;
const WAIT_POLL_MS: u64 = 10;

/// Shared server state: the boot-time options, the store, and the
/// replication registry, composed behind one context.
pub struct Server {
    options: ServerOptions,
    store: Store,
    replication: ReplicationManager,
}

/// Per-connection state. `sender` feeds the connection's writer task;
/// `replication_feed` marks the follower's channel to its leader, where
/// replies are suppressed and applied bytes are counted.
pub struct Session {
    pub peer: SocketAddr,
    pub sender: UnboundedSender<Value>,
    pub replication_feed: bool,
    pub promoted: bool,
    multi_active: bool,
    queued: VecDeque<Command>,
}

impl Session {
    pub fn new(peer: SocketAddr, sender: UnboundedSender<Value>) -> Self {
        Self {
            peer,
            sender,
            replication_feed: false,
            promoted: false,
            multi_active: false,
            queued: VecDeque::new(),
        }
    }

    pub fn feed(peer: SocketAddr, sender: UnboundedSender<Value>) -> Self {
        Self {
            replication_feed: true,
            ..Self::new(peer, sender)
        }
    }
}

impl Server {
    /// Build the shared context, loading the RDB snapshot when one is
    /// configured. A snapshot that exists but does not parse is fatal.
    pub fn new(options: ServerOptions) -> anyhow::Result<Self> {
        let store = Store::new();

        if let (Some(dir), Some(dbfilename)) = (&options.dir, &options.dbfilename) {
            match rdb::read_file(dir, dbfilename).context("failed to read RDB snapshot")? {
                Some(data) => {
                    let entries = rdb::parse(&data).context("failed to parse RDB snapshot")?;
                    info!("loaded {} keys from {}/{}", entries.len(), dir, dbfilename);
                    for (key, (value, expiry_ms)) in entries {
                        store.set(&key, &value, expiry_ms);
                    }
                }
                None => info!("snapshot {}/{} not found; starting empty", dir, dbfilename),
            }
        }

        Ok(Self {
            options,
            store,
            replication: ReplicationManager::new(),
        })
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn replication(&self) -> &ReplicationManager {
        &self.replication
    }

    pub fn is_master(&self) -> bool {
        !self.options.is_replica()
    }

    /// Execute one command and return its replies. Handlers never touch
    /// the socket: the caller owns delivery, which is what lets EXEC
    /// gather queued replies by re-dispatching.
    pub async fn dispatch(&self, command: Command, session: &mut Session) -> Vec<Value> {
        if session.multi_active && !matches!(command, Command::Exec | Command::Discard) {
            session.queued.push_back(command);
            return vec![Value::simple_string("QUEUED")];
        }

        // Write commands propagate whether or not their reply is sent,
        // and before the outcome is known.
        let fanout = (self.is_master()
            && self.replication.replica_present()
            && command.is_write())
        .then(|| command.to_value());
        let answers_on_feed = matches!(command, Command::ReplConfGetAck);

        let replies = match command {
            Command::Ping => vec![Value::simple_string("PONG")],
            Command::Echo { message } => vec![Value::text(&message)],
            Command::Get { key } => {
                let reply = match self.store.get(&key) {
                    Some(value) => Value::text(&value),
                    None => Value::NullBulkString,
                };
                vec![reply]
            }
            Command::Set { key, value, expiry } => {
                let expiry_ms = expiry.map(|ttl| store::now_ms() + ttl.as_millis() as u64);
                self.replication
                    .apply_write(fanout, || self.store.set(&key, &value, expiry_ms));
                vec![Value::ok()]
            }
            Command::Del { key } => {
                self.replication
                    .apply_write(fanout, || self.store.remove(&key));
                vec![Value::ok()]
            }
            Command::Exists { key } => {
                vec![Value::Integer(self.store.exists(&key) as i64)]
            }
            Command::Incr { key } => {
                let result = self
                    .replication
                    .apply_write(fanout, || self.store.incr(&key));
                let reply = match result {
                    Ok(value) => Value::Integer(value),
                    Err(err) => Value::SimpleError(err.to_string()),
                };
                vec![reply]
            }
            Command::Type { key } => vec![Value::bulk_string(self.store.value_type(&key))],
            Command::Keys { pattern: _ } => {
                let keys = self
                    .store
                    .keys()
                    .into_iter()
                    .map(|key| Value::bulk_string(&key))
                    .collect();
                vec![Value::Array(keys)]
            }
            Command::ConfigGet { key } => {
                let value = self.options.config_get(&key);
                vec![Value::Array(vec![
                    Value::bulk_string(&key),
                    Value::text(&value),
                ])]
            }
            Command::Info { .. } => vec![self.info()],
            Command::ReplConf { key, value } => {
                debug!("REPLCONF {} {} from {}", key, value, session.peer);
                vec![Value::ok()]
            }
            Command::ReplConfGetAck => {
                // The reported offset excludes the GETACK frame itself;
                // its bytes are counted after dispatch.
                let offset = self.replication.offset();
                vec![Command::ReplConfAck { offset }.to_value()]
            }
            Command::ReplConfAck { offset } => {
                debug!("replica {} acknowledged offset {}", session.peer, offset);
                self.replication.increment_ack();
                vec![]
            }
            Command::Psync { .. } => {
                session.promoted = true;
                self.replication
                    .register(session.peer, session.sender.clone());
                debug!(
                    "{} promoted to replica feed ({} links)",
                    session.peer,
                    self.replication.replica_count()
                );
                vec![
                    Value::simple_string(&format!(
                        "FULLRESYNC {} 0",
                        self.options.master_replid
                    )),
                    Value::Rdb(Bytes::from_static(rdb::EMPTY_RDB)),
                ]
            }
            Command::Wait {
                replicas,
                timeout_ms,
            } => vec![self.wait_for_acks(replicas, timeout_ms).await],
            Command::XAdd { key, id, fields } => {
                let reply = match self.store.append_stream(&key, &id, fields) {
                    Ok(id) => Value::bulk_string(&id.to_string()),
                    Err(err) => Value::SimpleError(err.to_string()),
                };
                vec![reply]
            }
            Command::XRange { key, start, end } => {
                let reply = match self.store.range(&key, &start, &end) {
                    Ok(entries) => {
                        Value::Array(entries.iter().map(entry_value).collect())
                    }
                    Err(err) => Value::SimpleError(err.to_string()),
                };
                vec![reply]
            }
            Command::XRead {
                block_ms,
                keys,
                ids,
            } => vec![self.xread(block_ms, keys, ids).await],
            Command::Multi => {
                session.multi_active = true;
                session.queued.clear();
                vec![Value::ok()]
            }
            Command::Exec => {
                if !session.multi_active {
                    return vec![Value::simple_error("ERR EXEC without MULTI")];
                }

                session.multi_active = false;
                let queued: Vec<Command> = session.queued.drain(..).collect();
                let mut replies = Vec::new();

                for command in queued {
                    replies.extend(Box::pin(self.dispatch(command, session)).await);
                }

                vec![Value::Array(replies)]
            }
            Command::Discard => {
                if !session.multi_active {
                    return vec![Value::simple_error("ERR DISCARD without MULTI")];
                }

                session.multi_active = false;
                session.queued.clear();
                vec![Value::ok()]
            }
            Command::Unknown { name } => {
                debug!("unknown command {} from {}", name, session.peer);
                vec![Value::NullBulkString]
            }
        };

        // On the replication feed only GETACK answers; everything else is
        // applied silently.
        if session.replication_feed && !answers_on_feed {
            return Vec::new();
        }

        replies
    }

    fn info(&self) -> Value {
        let role = if self.options.is_replica() {
            "slave"
        } else {
            "master"
        };

        let mut info = String::new();
        let _ = write!(info, "role:{}\r\n", role);
        let _ = write!(info, "master_replid:{}\r\n", self.options.master_replid);
        let _ = write!(info, "master_repl_offset:{}\r\n", self.replication.offset());

        Value::text(&info)
    }

    /// The WAIT barrier: ask every replica for an ack, then poll the
    /// counter until enough arrive or the (grace-extended) timeout ends.
    /// GETACK rides each link's FIFO behind any pending writes, so an ack
    /// reflects the writes propagated before it.
    async fn wait_for_acks(&self, target: usize, timeout_ms: u64) -> Value {
        self.replication.reset_ack();
        self.replication.broadcast(Command::ReplConfGetAck.to_value());

        let deadline =
            tokio::time::Instant::now() + Duration::from_millis(timeout_ms + WAIT_GRACE_MS);

        while self.replication.ack_count() < target && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(WAIT_POLL_MS)).await;
        }

        let acks = self.replication.ack_count();
        self.replication.reset_ack();
        Value::Integer(acks as i64)
    }

    async fn xread(&self, block_ms: Option<u64>, keys: Vec<String>, ids: Vec<String>) -> Value {
        match block_ms {
            Some(timeout_ms) => {
                // The blocking form watches the first stream and returns
                // only the entry that arrives while it waits.
                let key = &keys[0];
                match self.store.wait_for_entry(key, timeout_ms).await {
                    Some(entry) => Value::Array(vec![Value::Array(vec![
                        Value::bulk_string(key),
                        Value::Array(vec![entry_value(&entry)]),
                    ])]),
                    None => Value::NullBulkString,
                }
            }
            None => {
                let mut streams = Vec::with_capacity(keys.len());

                for (key, id) in keys.iter().zip(&ids) {
                    let after = match EntryId::parse(id) {
                        Ok(id) => id,
                        Err(err) => return Value::SimpleError(err.to_string()),
                    };

                    let entries = self.store.entries_after(key, after);
                    streams.push(Value::Array(vec![
                        Value::bulk_string(key),
                        Value::Array(entries.iter().map(entry_value).collect()),
                    ]));
                }

                Value::Array(streams)
            }
        }
    }
}

/// `[id, [field, value, …]]`, field order preserved from XADD.
fn entry_value(entry: &StreamEntry) -> Value {
    let mut fields = Vec::with_capacity(entry.fields.len() * 2);
    for (field, value) in &entry.fields {
        fields.push(Value::bulk_string(field));
        fields.push(Value::bulk_string(value));
    }

    Value::Array(vec![
        Value::bulk_string(&entry.id.to_string()),
        Value::Array(fields),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options;
    use tokio::sync::mpsc;

    fn master() -> Server {
        let options = options::parse_args(std::iter::empty());
        Server::new(options).unwrap()
    }

    fn replica() -> Server {
        let args = ["--replicaof".to_string(), "localhost 6379".to_string()];
        Server::new(options::parse_args(args.into_iter())).unwrap()
    }

    fn session() -> Session {
        let (sender, _receiver) = mpsc::unbounded_channel();
        Session::new("127.0.0.1:40000".parse().unwrap(), sender)
    }

    fn feed_session() -> Session {
        let (sender, _receiver) = mpsc::unbounded_channel();
        Session::feed("127.0.0.1:6379".parse().unwrap(), sender)
    }

    fn command(parts: &[&str]) -> Command {
        let values = parts.iter().map(|part| Value::bulk_string(part)).collect();
        Command::try_from(Value::Array(values)).unwrap()
    }

    async fn one_reply(server: &Server, session: &mut Session, parts: &[&str]) -> Value {
        let mut replies = server.dispatch(command(parts), session).await;
        assert_eq!(replies.len(), 1, "expected a single reply");
        replies.remove(0)
    }

    #[tokio::test]
    async fn ping_pongs() {
        let server = master();
        let mut session = session();
        let reply = one_reply(&server, &mut session, &["PING"]).await;
        assert_eq!(reply, Value::simple_string("PONG"));
    }

    #[tokio::test]
    async fn set_then_get() {
        let server = master();
        let mut session = session();

        let reply = one_reply(&server, &mut session, &["SET", "foo", "bar"]).await;
        assert_eq!(reply, Value::ok());

        let reply = one_reply(&server, &mut session, &["GET", "foo"]).await;
        assert_eq!(reply, Value::bulk_string("bar"));
    }

    #[tokio::test]
    async fn get_missing_is_null() {
        let server = master();
        let mut session = session();
        let reply = one_reply(&server, &mut session, &["GET", "nope"]).await;
        assert_eq!(reply, Value::NullBulkString);
    }

    #[tokio::test]
    async fn set_with_px_expires() {
        let server = master();
        let mut session = session();

        one_reply(&server, &mut session, &["SET", "k", "v", "PX", "30"]).await;
        tokio::time::sleep(Duration::from_millis(80)).await;

        let reply = one_reply(&server, &mut session, &["GET", "k"]).await;
        assert_eq!(reply, Value::NullBulkString);

        let reply = one_reply(&server, &mut session, &["KEYS", "*"]).await;
        assert_eq!(reply, Value::Array(vec![]));
    }

    #[tokio::test]
    async fn exists_counts_live_keys_only() {
        let server = master();
        let mut session = session();

        one_reply(&server, &mut session, &["SET", "here", "v"]).await;
        assert_eq!(
            one_reply(&server, &mut session, &["EXISTS", "here"]).await,
            Value::Integer(1)
        );
        assert_eq!(
            one_reply(&server, &mut session, &["EXISTS", "gone"]).await,
            Value::Integer(0)
        );
    }

    #[tokio::test]
    async fn incr_non_integer_is_an_error() {
        let server = master();
        let mut session = session();

        one_reply(&server, &mut session, &["SET", "word", "abc"]).await;
        let reply = one_reply(&server, &mut session, &["INCR", "word"]).await;
        assert_eq!(
            reply,
            Value::simple_error("ERR value is not an integer or out of range")
        );
    }

    #[tokio::test]
    async fn unknown_command_is_null() {
        let server = master();
        let mut session = session();
        let reply = one_reply(&server, &mut session, &["NOSUCHTHING"]).await;
        assert_eq!(reply, Value::NullBulkString);
    }

    #[tokio::test]
    async fn type_of_each_kind() {
        let server = master();
        let mut session = session();

        one_reply(&server, &mut session, &["SET", "s", "v"]).await;
        one_reply(&server, &mut session, &["XADD", "x", "1-1", "a", "1"]).await;

        assert_eq!(
            one_reply(&server, &mut session, &["TYPE", "s"]).await,
            Value::bulk_string("string")
        );
        assert_eq!(
            one_reply(&server, &mut session, &["TYPE", "x"]).await,
            Value::bulk_string("stream")
        );
        assert_eq!(
            one_reply(&server, &mut session, &["TYPE", "none"]).await,
            Value::bulk_string("none")
        );
    }

    #[tokio::test]
    async fn config_get_known_and_unknown() {
        let args = ["--dir".to_string(), "/data".to_string()];
        let server = Server::new(options::parse_args(args.into_iter())).unwrap();
        let mut session = session();

        let reply = one_reply(&server, &mut session, &["CONFIG", "GET", "dir"]).await;
        assert_eq!(
            reply,
            Value::Array(vec![Value::bulk_string("dir"), Value::bulk_string("/data")])
        );

        let reply = one_reply(&server, &mut session, &["CONFIG", "GET", "nothing"]).await;
        assert_eq!(
            reply,
            Value::Array(vec![Value::bulk_string("nothing"), Value::NullBulkString])
        );
    }

    #[tokio::test]
    async fn info_reports_role_and_replid() {
        let server = master();
        let mut session = session();

        let reply = one_reply(&server, &mut session, &["INFO", "replication"]).await;
        let text = reply.as_text().unwrap();
        assert!(text.contains("role:master"));
        assert!(text.contains(&format!(
            "master_replid:{}",
            server.options().master_replid
        )));
        assert!(text.contains("master_repl_offset:0"));
    }

    #[tokio::test]
    async fn info_on_replica() {
        let server = replica();
        let mut session = session();

        let reply = one_reply(&server, &mut session, &["INFO"]).await;
        let text = reply.as_text().unwrap();
        assert!(text.contains("role:slave"));
    }

    #[tokio::test]
    async fn xadd_and_xrange_shape() {
        let server = master();
        let mut session = session();

        let reply = one_reply(&server, &mut session, &["XADD", "s", "1-1", "a", "1"]).await;
        assert_eq!(reply, Value::bulk_string("1-1"));
        one_reply(&server, &mut session, &["XADD", "s", "1-2", "a", "2"]).await;

        let reply = one_reply(&server, &mut session, &["XRANGE", "s", "-", "+"]).await;
        let expected = Value::Array(vec![
            Value::Array(vec![
                Value::bulk_string("1-1"),
                Value::Array(vec![Value::bulk_string("a"), Value::bulk_string("1")]),
            ]),
            Value::Array(vec![
                Value::bulk_string("1-2"),
                Value::Array(vec![Value::bulk_string("a"), Value::bulk_string("2")]),
            ]),
        ]);
        assert_eq!(reply, expected);
    }

    #[tokio::test]
    async fn xadd_accepts_entry_without_fields() {
        let server = master();
        let mut session = session();

        let reply = one_reply(&server, &mut session, &["XADD", "s", "1-1"]).await;
        assert_eq!(reply, Value::bulk_string("1-1"));

        let reply = one_reply(&server, &mut session, &["XRANGE", "s", "-", "+"]).await;
        let expected = Value::Array(vec![Value::Array(vec![
            Value::bulk_string("1-1"),
            Value::Array(vec![]),
        ])]);
        assert_eq!(reply, expected);
    }

    #[tokio::test]
    async fn xadd_rejects_minimum_id() {
        let server = master();
        let mut session = session();

        let reply = one_reply(&server, &mut session, &["XADD", "s", "0-0", "a", "1"]).await;
        assert_eq!(
            reply,
            Value::simple_error("ERR The ID specified in XADD must be greater than 0-0")
        );
    }

    #[tokio::test]
    async fn xadd_rejects_stale_id() {
        let server = master();
        let mut session = session();

        one_reply(&server, &mut session, &["XADD", "s", "2-1", "a", "1"]).await;
        let reply = one_reply(&server, &mut session, &["XADD", "s", "1-1", "a", "1"]).await;
        assert_eq!(
            reply,
            Value::simple_error(
                "ERR The ID specified in XADD is equal or smaller than the target stream top item"
            )
        );
    }

    #[tokio::test]
    async fn xread_returns_entries_after_id() {
        let server = master();
        let mut session = session();

        one_reply(&server, &mut session, &["XADD", "s", "1-1", "a", "1"]).await;
        one_reply(&server, &mut session, &["XADD", "s", "1-2", "a", "2"]).await;

        let reply =
            one_reply(&server, &mut session, &["XREAD", "STREAMS", "s", "1-1"]).await;
        let expected = Value::Array(vec![Value::Array(vec![
            Value::bulk_string("s"),
            Value::Array(vec![Value::Array(vec![
                Value::bulk_string("1-2"),
                Value::Array(vec![Value::bulk_string("a"), Value::bulk_string("2")]),
            ])]),
        ])]);
        assert_eq!(reply, expected);
    }

    #[tokio::test]
    async fn xread_block_times_out_to_null() {
        let server = master();
        let mut session = session();

        let reply = one_reply(
            &server,
            &mut session,
            &["XREAD", "BLOCK", "30", "STREAMS", "s", "0-0"],
        )
        .await;
        assert_eq!(reply, Value::NullBulkString);
    }

    #[tokio::test]
    async fn multi_queues_and_exec_replays() {
        let server = master();
        let mut session = session();

        let reply = one_reply(&server, &mut session, &["MULTI"]).await;
        assert_eq!(reply, Value::ok());

        let reply = one_reply(&server, &mut session, &["SET", "a", "1"]).await;
        assert_eq!(reply, Value::simple_string("QUEUED"));

        let reply = one_reply(&server, &mut session, &["INCR", "a"]).await;
        assert_eq!(reply, Value::simple_string("QUEUED"));

        // Nothing executed yet.
        assert_eq!(server.store().get("a"), None);

        let reply = one_reply(&server, &mut session, &["EXEC"]).await;
        assert_eq!(
            reply,
            Value::Array(vec![Value::ok(), Value::Integer(2)])
        );
        assert_eq!(server.store().get("a"), Some("2".to_string()));
    }

    #[tokio::test]
    async fn discard_drops_the_queue() {
        let server = master();
        let mut session = session();

        one_reply(&server, &mut session, &["MULTI"]).await;
        one_reply(&server, &mut session, &["SET", "a", "1"]).await;

        let reply = one_reply(&server, &mut session, &["DISCARD"]).await;
        assert_eq!(reply, Value::ok());
        assert_eq!(server.store().get("a"), None);

        // The queue is gone: EXEC now errors.
        let reply = one_reply(&server, &mut session, &["EXEC"]).await;
        assert_eq!(reply, Value::simple_error("ERR EXEC without MULTI"));
    }

    #[tokio::test]
    async fn exec_without_multi_errors() {
        let server = master();
        let mut session = session();
        let reply = one_reply(&server, &mut session, &["EXEC"]).await;
        assert_eq!(reply, Value::simple_error("ERR EXEC without MULTI"));
    }

    #[tokio::test]
    async fn discard_without_multi_errors() {
        let server = master();
        let mut session = session();
        let reply = one_reply(&server, &mut session, &["DISCARD"]).await;
        assert_eq!(reply, Value::simple_error("ERR DISCARD without MULTI"));
    }

    #[tokio::test]
    async fn psync_promotes_and_sends_snapshot() {
        let server = master();
        let (sender, mut receiver) = mpsc::unbounded_channel();
        let mut session = Session::new("127.0.0.1:40001".parse().unwrap(), sender);

        let replies = server
            .dispatch(command(&["PSYNC", "?", "-1"]), &mut session)
            .await;

        assert!(session.promoted);
        assert_eq!(server.replication().replica_count(), 1);
        assert_eq!(replies.len(), 2);
        assert_eq!(
            replies[0],
            Value::simple_string(&format!(
                "FULLRESYNC {} 0",
                server.options().master_replid
            ))
        );
        assert_eq!(replies[1], Value::Rdb(Bytes::from_static(rdb::EMPTY_RDB)));

        // Writes issued after the promotion land on the link in order.
        let mut client = self::session();
        server
            .dispatch(command(&["SET", "foo", "bar"]), &mut client)
            .await;
        server
            .dispatch(command(&["SET", "foo", "baz"]), &mut client)
            .await;

        assert_eq!(
            receiver.recv().await.unwrap(),
            Value::command_str("SET", &["foo", "bar"])
        );
        assert_eq!(
            receiver.recv().await.unwrap(),
            Value::command_str("SET", &["foo", "baz"])
        );
    }

    #[tokio::test]
    async fn replica_feed_applies_writes_silently() {
        let server = replica();
        let mut feed = feed_session();

        let replies = server
            .dispatch(command(&["SET", "foo", "bar"]), &mut feed)
            .await;
        assert!(replies.is_empty());
        assert_eq!(server.store().get("foo"), Some("bar".to_string()));

        let replies = server.dispatch(command(&["PING"]), &mut feed).await;
        assert!(replies.is_empty());
    }

    #[tokio::test]
    async fn replica_feed_answers_getack_with_offset() {
        let server = replica();
        let mut feed = feed_session();

        server.replication().add_offset(31);

        let replies = server
            .dispatch(command(&["REPLCONF", "GETACK", "*"]), &mut feed)
            .await;
        assert_eq!(
            replies,
            vec![Value::command_str("REPLCONF", &["ACK", "31"])]
        );
    }

    #[tokio::test]
    async fn ack_from_replica_increments_counter() {
        let server = master();
        let mut session = session();

        let replies = server
            .dispatch(command(&["REPLCONF", "ACK", "42"]), &mut session)
            .await;
        assert!(replies.is_empty());
        assert_eq!(server.replication().ack_count(), 1);
    }

    #[tokio::test]
    async fn wait_with_no_replicas_returns_zero() {
        let server = master();
        let mut session = session();

        let started = std::time::Instant::now();
        let reply = one_reply(&server, &mut session, &["WAIT", "0", "100"]).await;
        assert_eq!(reply, Value::Integer(0));
        assert!(started.elapsed() < Duration::from_millis(400));
    }

    #[tokio::test]
    async fn wait_counts_incoming_acks() {
        let server = master();
        let (sender, mut receiver) = mpsc::unbounded_channel();
        server
            .replication()
            .register("127.0.0.1:40002".parse().unwrap(), sender);

        // Simulate the replica: acknowledge as soon as GETACK arrives.
        let store = std::sync::Arc::new(server);
        let waiter = {
            let server = store.clone();
            tokio::spawn(async move {
                let mut session = {
                    let (sender, _receiver) = mpsc::unbounded_channel();
                    Session::new("127.0.0.1:40003".parse().unwrap(), sender)
                };
                server
                    .dispatch(command(&["WAIT", "1", "500"]), &mut session)
                    .await
            })
        };

        let getack = receiver.recv().await.unwrap();
        assert_eq!(getack, Value::command_str("REPLCONF", &["GETACK", "*"]));
        store.replication().increment_ack();

        let replies = waiter.await.unwrap();
        assert_eq!(replies, vec![Value::Integer(1)]);
    }
}
