//! # Synchronous Client API
//!
//! Purpose: Expose a compact, blocking API for issuing commands to a
//! CoralKV server over RESP.
//!
//! ## Design Principles
//! 1. **Facade Pattern**: `KvClient` hides connection management and
//!    protocol details behind typed helpers.
//! 2. **Reconnect On Demand**: One lazily re-established connection per
//!    client; an IO failure drops it so the next call dials fresh.
//! 3. **Raw Escape Hatch**: `raw` executes any command, which is how the
//!    integration tests drive the sorted-set surface.

use std::fmt;
use std::io::{BufReader, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

use parking_lot::Mutex;

use crate::resp::{encode_command, read_reply, Reply};

/// Result type for the sync client.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the sync client.
#[derive(Debug)]
pub enum ClientError {
    /// Network or IO failure while reading/writing.
    Io(std::io::Error),
    /// RESP framing or parse error.
    Protocol,
    /// Server returned an error reply.
    Server { message: String },
    /// Response type did not match the expected command response.
    UnexpectedResponse,
    /// Address could not be resolved into a socket address.
    InvalidAddress,
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClientError::Io(err) => write!(f, "io error: {}", err),
            ClientError::Protocol => write!(f, "protocol error"),
            ClientError::Server { message } => write!(f, "server error: {}", message),
            ClientError::UnexpectedResponse => write!(f, "unexpected response"),
            ClientError::InvalidAddress => write!(f, "invalid address"),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<std::io::Error> for ClientError {
    fn from(err: std::io::Error) -> Self {
        ClientError::Io(err)
    }
}

/// TTL state returned by the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientTtl {
    /// Key is missing or already expired.
    Missing,
    /// Key exists without expiration.
    NoExpiry,
    /// Key expires after the provided duration.
    ExpiresIn(Duration),
}

/// Configuration for the synchronous client.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address, e.g. "127.0.0.1:7878".
    pub addr: String,
    /// Optional TCP read timeout.
    pub read_timeout: Option<Duration>,
    /// Optional TCP write timeout.
    pub write_timeout: Option<Duration>,
    /// Optional TCP connect timeout.
    pub connect_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            addr: "127.0.0.1:7878".to_string(),
            read_timeout: Some(Duration::from_secs(5)),
            write_timeout: Some(Duration::from_secs(5)),
            connect_timeout: Some(Duration::from_secs(5)),
        }
    }
}

struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    encode_buf: Vec<u8>,
    line_buf: Vec<u8>,
}

impl Connection {
    fn connect(config: &ClientConfig) -> ClientResult<Self> {
        let addr = config
            .addr
            .to_socket_addrs()
            .map_err(|_| ClientError::InvalidAddress)?
            .next()
            .ok_or(ClientError::InvalidAddress)?;
        let stream = match config.connect_timeout {
            Some(timeout) => TcpStream::connect_timeout(&addr, timeout)?,
            None => TcpStream::connect(addr)?,
        };
        stream.set_read_timeout(config.read_timeout)?;
        stream.set_write_timeout(config.write_timeout)?;
        stream.set_nodelay(true)?;

        let reader = BufReader::new(stream.try_clone()?);
        Ok(Connection {
            reader,
            writer: stream,
            encode_buf: Vec::with_capacity(256),
            line_buf: Vec::with_capacity(64),
        })
    }

    fn exec(&mut self, args: &[&[u8]]) -> ClientResult<Reply> {
        encode_command(args, &mut self.encode_buf);
        self.writer.write_all(&self.encode_buf)?;
        self.writer.flush()?;
        read_reply(&mut self.reader, &mut self.line_buf)
    }
}

/// Blocking client with one reconnecting connection.
pub struct KvClient {
    config: ClientConfig,
    conn: Mutex<Option<Connection>>,
}

impl KvClient {
    /// Connects with default configuration.
    pub fn connect(addr: impl Into<String>) -> ClientResult<Self> {
        let config = ClientConfig {
            addr: addr.into(),
            ..ClientConfig::default()
        };
        Self::with_config(config)
    }

    /// Connects with a custom configuration, dialing eagerly so a bad
    /// address fails here instead of on first use.
    pub fn with_config(config: ClientConfig) -> ClientResult<Self> {
        let conn = Connection::connect(&config)?;
        Ok(KvClient {
            config,
            conn: Mutex::new(Some(conn)),
        })
    }

    /// Executes any command and returns the decoded reply.
    ///
    /// Server error replies come back as `Ok(Reply::Error)`; transport
    /// failures drop the connection so the next call reconnects.
    pub fn raw(&self, args: &[&[u8]]) -> ClientResult<Reply> {
        let mut slot = self.conn.lock();
        if slot.is_none() {
            *slot = Some(Connection::connect(&self.config)?);
        }
        let conn = match slot.as_mut() {
            Some(conn) => conn,
            None => return Err(ClientError::Protocol),
        };
        match conn.exec(args) {
            Ok(reply) => Ok(reply),
            Err(err) => {
                *slot = None;
                Err(err)
            }
        }
    }

    /// Fetches a value by key; `Ok(None)` when the key is missing.
    pub fn get(&self, key: &[u8]) -> ClientResult<Option<Vec<u8>>> {
        match self.raw(&[b"GET", key])? {
            Reply::Bulk(data) => Ok(data),
            Reply::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Sets a value for a key without expiration.
    pub fn set(&self, key: &[u8], value: &[u8]) -> ClientResult<()> {
        match self.raw(&[b"SET", key, value])? {
            Reply::Simple(_) => Ok(()),
            Reply::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Sets a value and attaches an expiration.
    pub fn set_with_ttl(&self, key: &[u8], value: &[u8], ttl: Duration) -> ClientResult<()> {
        let seconds = ttl.as_secs().max(1).to_string();
        match self.raw(&[b"SET", key, value, b"EX", seconds.as_bytes()])? {
            Reply::Simple(_) => Ok(()),
            Reply::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Deletes a key. Returns true when a key was removed.
    pub fn delete(&self, key: &[u8]) -> ClientResult<bool> {
        match self.raw(&[b"DEL", key])? {
            Reply::Integer(count) => Ok(count > 0),
            Reply::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Sets a time-to-live on a key. Returns true when the TTL was set.
    pub fn expire(&self, key: &[u8], ttl: Duration) -> ClientResult<bool> {
        let seconds = ttl.as_secs().max(1).to_string();
        match self.raw(&[b"EXPIRE", key, seconds.as_bytes()])? {
            Reply::Integer(value) => Ok(value == 1),
            Reply::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Returns TTL status for a key.
    pub fn ttl(&self, key: &[u8]) -> ClientResult<ClientTtl> {
        match self.raw(&[b"TTL", key])? {
            Reply::Integer(-2) => Ok(ClientTtl::Missing),
            Reply::Integer(-1) => Ok(ClientTtl::NoExpiry),
            Reply::Integer(value) if value >= 0 => {
                Ok(ClientTtl::ExpiresIn(Duration::from_secs(value as u64)))
            }
            Reply::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Type name of the value at a key, `"none"` when missing.
    pub fn type_of(&self, key: &[u8]) -> ClientResult<String> {
        match self.raw(&[b"TYPE", key])? {
            Reply::Simple(name) => Ok(name),
            Reply::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Pings the server. Returns the response payload.
    pub fn ping(&self, payload: Option<&[u8]>) -> ClientResult<Vec<u8>> {
        let reply = match payload {
            Some(data) => self.raw(&[b"PING", data])?,
            None => self.raw(&[b"PING"])?,
        };
        match reply {
            Reply::Simple(text) => Ok(text.into_bytes()),
            Reply::Bulk(Some(data)) => Ok(data),
            Reply::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }

    /// Fetches server INFO output.
    pub fn info(&self) -> ClientResult<Vec<u8>> {
        match self.raw(&[b"INFO"])? {
            Reply::Bulk(Some(data)) => Ok(data),
            Reply::Error(message) => Err(ClientError::Server { message }),
            _ => Err(ClientError::UnexpectedResponse),
        }
    }
}
