use crate::protocol::{self, Command, Value, ValueWriter};
use crate::server::{Server, Session};
use bytes::BytesMut;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, BufWriter};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub fn start(server: Arc<Server>) -> JoinHandle<io::Result<()>> {
    tokio::spawn(async move {
        let listener = bind(&server).await?;
        serve(listener, server).await
    })
}

async fn bind(server: &Server) -> io::Result<TcpListener> {
    let options = server.options();
    let addr: SocketAddr = format!("{}:{}", options.host, options.port)
        .parse()
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;

    let socket = TcpSocket::new_v4()?;
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(1024)
}

async fn serve(listener: TcpListener, server: Arc<Server>) -> io::Result<()> {
    info!("listening on {}", listener.local_addr()?);

    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                info!("accepted connection from {}", peer);
                let server = server.clone();
                tokio::spawn(async move { handle_client(server, socket, peer).await });
            }
            Err(err) => {
                warn!("error accepting new connection; shutting down: {}", err);
                break;
            }
        }
    }

    Ok(())
}

async fn handle_client(server: Arc<Server>, socket: TcpStream, peer: SocketAddr) {
    let (read_half, write_half) = socket.into_split();
    let (sender, receiver) = mpsc::unbounded_channel();
    spawn_writer(write_half, receiver);

    let mut session = Session::new(peer, sender);
    read_loop(&server, read_half, &mut session).await;

    // A promoted connection is a replica link; its registration dies with
    // the socket.
    if session.promoted {
        server.replication().unregister(peer);
    }

    info!("closing connection from {}", peer);
}

/// The connection's single writer: drains the reply channel in order until
/// every sender (the session and, for replicas, the registry link) is gone.
pub(crate) fn spawn_writer(
    write_half: OwnedWriteHalf,
    mut receiver: mpsc::UnboundedReceiver<Value>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut writer = ValueWriter::new(BufWriter::new(write_half));

        while let Some(value) = receiver.recv().await {
            if let Err(err) = writer.write(&value).await {
                warn!("error writing value to client: {}", err);
                break;
            }
        }
    })
}

async fn read_loop(server: &Server, mut reader: OwnedReadHalf, session: &mut Session) {
    let mut buffer = BytesMut::with_capacity(4096);

    loop {
        match reader.read_buf(&mut buffer).await {
            Ok(0) => break,
            Ok(_) => {}
            Err(err) => {
                warn!("error reading from {}: {}", session.peer, err);
                break;
            }
        }

        let (frames, tail) = match protocol::decode(&buffer) {
            Ok(decoded) => decoded,
            Err(err) => {
                // Malformed RESP ends the connection after one error line.
                let _ = session
                    .sender
                    .send(Value::simple_error(&format!("Err: {}", err)));
                break;
            }
        };

        let _ = buffer.split_to(tail);

        for frame in frames {
            if !process_frame(server, frame.value, session).await {
                return;
            }
        }
    }
}

/// Parse and dispatch one frame; false means the connection is done.
/// A frame that cannot be parsed at all (not an array of bulk strings, or
/// a number that does not convert) gets one `-Err:` line and the
/// connection closes, the same as a malformed RESP frame.
async fn process_frame(server: &Server, value: Value, session: &mut Session) -> bool {
    let command = match Command::try_from(value) {
        Ok(command) => command,
        Err(err) => {
            let _ = session
                .sender
                .send(Value::simple_error(&format!("Err: {}", err)));
            return false;
        }
    };

    for value in server.dispatch(command, session).await {
        if session.sender.send(value).is_err() {
            return false;
        }
    }

    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn start_test_server() -> SocketAddr {
        let mut options = options::parse_args(std::iter::empty());
        options.port = 0;

        let server = Arc::new(Server::new(options).unwrap());
        let listener = bind(&server).await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve(listener, server));
        addr
    }

    async fn read_some(socket: &mut TcpStream) -> Vec<u8> {
        let mut buffer = [0u8; 1024];
        let n = socket.read(&mut buffer).await.unwrap();
        buffer[..n].to_vec()
    }

    #[tokio::test]
    async fn ping_over_the_wire() {
        let addr = start_test_server().await;
        let mut socket = TcpStream::connect(addr).await.unwrap();

        socket.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        assert_eq!(read_some(&mut socket).await, b"+PONG\r\n");
    }

    #[tokio::test]
    async fn set_and_get_over_the_wire() {
        let addr = start_test_server().await;
        let mut socket = TcpStream::connect(addr).await.unwrap();

        socket
            .write_all(b"*3\r\n$3\r\nSET\r\n$3\r\nfoo\r\n$3\r\nbar\r\n")
            .await
            .unwrap();
        assert_eq!(read_some(&mut socket).await, b"+OK\r\n");

        socket
            .write_all(b"*2\r\n$3\r\nGET\r\n$3\r\nfoo\r\n")
            .await
            .unwrap();
        assert_eq!(read_some(&mut socket).await, b"$3\r\nbar\r\n");
    }

    #[tokio::test]
    async fn command_split_across_reads() {
        let addr = start_test_server().await;
        let mut socket = TcpStream::connect(addr).await.unwrap();

        socket.write_all(b"*1\r\n$4\r\nPI").await.unwrap();
        socket.flush().await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        socket.write_all(b"NG\r\n").await.unwrap();

        assert_eq!(read_some(&mut socket).await, b"+PONG\r\n");
    }

    #[tokio::test]
    async fn bad_arity_answers_null_and_stays_open() {
        let addr = start_test_server().await;
        let mut socket = TcpStream::connect(addr).await.unwrap();

        // GET with no key falls through to the unknown-command reply.
        socket.write_all(b"*1\r\n$3\r\nGET\r\n").await.unwrap();
        assert_eq!(read_some(&mut socket).await, b"$-1\r\n");

        // The connection is still usable.
        socket.write_all(b"*1\r\n$4\r\nPING\r\n").await.unwrap();
        assert_eq!(read_some(&mut socket).await, b"+PONG\r\n");
    }

    #[tokio::test]
    async fn unconvertible_argument_closes_with_error() {
        let addr = start_test_server().await;
        let mut socket = TcpStream::connect(addr).await.unwrap();

        socket
            .write_all(b"*5\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n$2\r\nPX\r\n$3\r\nabc\r\n")
            .await
            .unwrap();

        let reply = read_some(&mut socket).await;
        assert!(reply.starts_with(b"-Err: "), "got {:?}", reply);

        let mut rest = Vec::new();
        socket.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn malformed_frame_closes_with_error() {
        let addr = start_test_server().await;
        let mut socket = TcpStream::connect(addr).await.unwrap();

        socket.write_all(b"!bogus\r\n").await.unwrap();

        let reply = read_some(&mut socket).await;
        assert!(reply.starts_with(b"-Err: "), "got {:?}", reply);

        // The server hangs up after the error line.
        let mut rest = Vec::new();
        socket.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }
}
