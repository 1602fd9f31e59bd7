use crate::protocol::{self, Command, Frame, Value, ValueWriter};
use crate::rdb;
use crate::server::{listener, Server, Session};
use anyhow::{bail, Context};
use bytes::{Buf, BytesMut};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, BufWriter};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Spawn the outbound leader connection for a server booted with
/// `--replicaof`. A failed or broken link is logged; the follower does not
/// redial.
pub fn start(server: Arc<Server>) -> JoinHandle<()> {
    tokio::spawn(async move {
        if let Err(err) = run(server).await {
            error!("replication client stopped: {:#}", err);
        }
    })
}

async fn run(server: Arc<Server>) -> anyhow::Result<()> {
    let (host, port) = server
        .options()
        .replica_of
        .clone()
        .context("server is not configured as a replica")?;
    let address = format!("{}:{}", host, port);

    let mut stream = TcpStream::connect(&address)
        .await
        .with_context(|| format!("failed to connect to leader {}", address))?;
    let peer = stream.peer_addr().context("leader socket has no peer")?;

    let mut buffer = BytesMut::with_capacity(4096);
    handshake(server.as_ref(), &mut stream, &mut buffer).await?;

    let snapshot = read_snapshot(&mut stream, &mut buffer).await?;
    let entries = rdb::parse(&snapshot).context("leader sent an unparseable snapshot")?;
    info!("full resync from {}: {} keys", address, entries.len());
    for (key, (value, expiry_ms)) in entries {
        server.store().set(&key, &value, expiry_ms);
    }

    // Everything after the snapshot is the live command feed.
    let (read_half, write_half) = stream.into_split();
    let (sender, receiver) = mpsc::unbounded_channel();
    listener::spawn_writer(write_half, receiver);

    let mut session = Session::feed(peer, sender);
    apply_feed(server.as_ref(), read_half, &mut session, buffer).await;

    info!("leader connection closed; not reconnecting");
    Ok(())
}

/// PING, both REPLCONF steps, then PSYNC. Each step has one expected
/// reply; anything else aborts the sync.
async fn handshake(
    server: &Server,
    stream: &mut TcpStream,
    buffer: &mut BytesMut,
) -> anyhow::Result<()> {
    let port = server.options().port.to_string();

    let steps = [
        (Command::Ping, "PONG".to_string()),
        (
            Command::ReplConf {
                key: "listening-port".to_string(),
                value: port,
            },
            "OK".to_string(),
        ),
        (
            Command::ReplConf {
                key: "capa".to_string(),
                value: "psync2".to_string(),
            },
            "OK".to_string(),
        ),
    ];

    for (command, expected) in steps {
        send(stream, &command.to_value()).await?;
        let frame = read_frame(stream, buffer).await?;

        match frame.value.as_text() {
            Some(reply) if reply == expected => {}
            _ => bail!("unexpected handshake reply: {:?}", frame.value),
        }
    }

    let psync = Command::Psync {
        master_replid: None,
        master_repl_offset: None,
    };
    send(stream, &psync.to_value()).await?;

    let frame = read_frame(stream, buffer).await?;
    match frame.value.as_text() {
        Some(reply) if reply.starts_with("FULLRESYNC") => {
            info!("leader replied {}", reply);
            Ok(())
        }
        _ => bail!("expected FULLRESYNC, got {:?}", frame.value),
    }
}

async fn send(stream: &mut TcpStream, value: &Value) -> anyhow::Result<()> {
    let mut writer = ValueWriter::new(BufWriter::new(stream));
    writer
        .write(value)
        .await
        .context("failed to write to leader")
}

/// Read one frame, buffering reads as needed. Only the first decoded frame
/// is consumed; any bytes after it stay put for the next caller.
async fn read_frame(stream: &mut TcpStream, buffer: &mut BytesMut) -> anyhow::Result<Frame> {
    loop {
        let (frames, _) = protocol::decode(buffer)
            .map_err(|err| anyhow::anyhow!("protocol error from leader: {}", err))?;

        if let Some(frame) = frames.into_iter().next() {
            buffer.advance(frame.consumed);
            return Ok(frame);
        }

        if stream.read_buf(buffer).await? == 0 {
            bail!("leader closed the connection during handshake");
        }
    }
}

/// The snapshot body arrives as `$<len>\r\n<bytes>` with no trailing CRLF,
/// so it cannot go through the regular decoder.
async fn read_snapshot(stream: &mut TcpStream, buffer: &mut BytesMut) -> anyhow::Result<Vec<u8>> {
    let header_end = loop {
        match find_crlf(buffer) {
            Some(at) => break at,
            None => {
                if stream.read_buf(buffer).await? == 0 {
                    bail!("leader closed the connection before the snapshot");
                }
            }
        }
    };

    if buffer.first() != Some(&b'$') {
        bail!("expected a bulk-framed snapshot, got {:?}", buffer.first());
    }

    let length: usize = std::str::from_utf8(&buffer[1..header_end])
        .ok()
        .and_then(|text| text.parse().ok())
        .context("invalid snapshot length")?;

    let total = header_end + 2 + length;
    while buffer.len() < total {
        if stream.read_buf(buffer).await? == 0 {
            bail!("leader closed the connection mid-snapshot");
        }
    }

    buffer.advance(header_end + 2);
    Ok(buffer.split_to(length).to_vec())
}

fn find_crlf(buffer: &BytesMut) -> Option<usize> {
    buffer.windows(2).position(|pair| pair == b"\r\n")
}

/// Apply the replicated command stream. Every applied frame advances the
/// offset by its wire size; only GETACK produces a reply, built before its
/// own bytes are counted.
async fn apply_feed(
    server: &Server,
    mut reader: OwnedReadHalf,
    session: &mut Session,
    mut buffer: BytesMut,
) {
    loop {
        let (frames, tail) = match protocol::decode(&buffer) {
            Ok(decoded) => decoded,
            Err(err) => {
                warn!("protocol error on replication feed: {}", err);
                return;
            }
        };

        for frame in frames {
            let consumed = frame.consumed as u64;

            match Command::try_from(frame.value) {
                Ok(command) => {
                    for value in server.dispatch(command, session).await {
                        if session.sender.send(value).is_err() {
                            return;
                        }
                    }
                }
                Err(err) => warn!("ignoring malformed feed frame: {}", err),
            }

            server.replication().add_offset(consumed);
        }

        let _ = buffer.split_to(tail);

        match reader.read_buf(&mut buffer).await {
            Ok(0) => return,
            Ok(_) => {}
            Err(err) => {
                warn!("error reading from leader: {}", err);
                return;
            }
        }
    }
}
