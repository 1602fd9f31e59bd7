use crate::protocol::Value;
use std::io;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};

pub struct ValueWriter<W> {
    writer: BufWriter<W>,
}

impl<W> ValueWriter<W>
where
    W: AsyncWrite + Unpin,
{
    pub fn new(writer: BufWriter<W>) -> Self {
        Self { writer }
    }

    pub async fn write(&mut self, value: &Value) -> io::Result<()> {
        self.write_value(value).await?;
        self.writer.flush().await
    }

    async fn write_value(&mut self, value: &Value) -> io::Result<()> {
        match value {
            Value::SimpleString(val) => self.write_simple_string(val).await,
            Value::SimpleError(val) => self.write_simple_error(val).await,
            Value::Integer(val) => self.write_integer(*val).await,
            Value::BulkString(bytes) => self.write_bulk_string(bytes.as_slice()).await,
            Value::Array(values) => self.write_array(values.as_slice()).await,
            Value::NullBulkString => self.writer.write_all(b"$-1\r\n").await,
            Value::NullArray => self.writer.write_all(b"*-1\r\n").await,
            Value::Rdb(bytes) => self.write_rdb(bytes).await,
        }
    }

    async fn write_simple_string(&mut self, val: &str) -> io::Result<()> {
        let value = format!("+{}\r\n", val);
        self.writer.write_all(value.as_bytes()).await
    }

    async fn write_simple_error(&mut self, val: &str) -> io::Result<()> {
        let value = format!("-{}\r\n", val);
        self.writer.write_all(value.as_bytes()).await
    }

    async fn write_integer(&mut self, val: i64) -> io::Result<()> {
        let value = format!(":{}\r\n", val);
        self.writer.write_all(value.as_bytes()).await
    }

    async fn write_bulk_string(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_length_prefix(b'$', bytes.len()).await?;
        self.writer.write_all(bytes).await?;
        self.writer.write_all(b"\r\n").await
    }

    async fn write_array(&mut self, values: &[Value]) -> io::Result<()> {
        self.write_length_prefix(b'*', values.len()).await?;

        for value in values {
            Box::pin(self.write_value(value)).await?;
        }

        Ok(())
    }

    // Snapshot payload: length-prefixed like a bulk string, but the body is
    // not CRLF-terminated.
    async fn write_rdb(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.write_length_prefix(b'$', bytes.len()).await?;
        self.writer.write_all(bytes).await
    }

    async fn write_length_prefix(&mut self, prefix: u8, len: usize) -> io::Result<()> {
        self.writer.write_all(&[prefix]).await?;
        self.writer.write_all(len.to_string().as_bytes()).await?;
        self.writer.write_all(b"\r\n").await
    }
}
