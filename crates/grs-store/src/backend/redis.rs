//! Redis backend speaking RESP2 over a plain TCP connection.
//!
//! Only the handful of commands the inventory needs are issued:
//!
//! ```text
//! AUTH [user] <password>     on connect, when a password is configured
//! SELECT <db>                on connect, when db != 0
//! PING                       health check
//! SET <key> <value>
//! GET <key>                  nil bulk reply -> key absent
//! SCAN <cursor> MATCH <escaped-prefix>* COUNT 512
//! ```
//!
//! One connection is shared behind a mutex. A call that fails at the
//! transport level (timeout, reset, malformed reply) drops the connection;
//! the next call dials again. Redis error replies (`-ERR ...`) leave the
//! connection in place.

use std::collections::BTreeSet;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Mutex;

use grs_core::RedisConfig;
use tracing::{debug, warn};

use super::KvBackend;
use crate::error::{BackendError, BackendResult};

/// Keys requested per `SCAN` round trip.
const SCAN_COUNT: &[u8] = b"512";

/// Largest bulk string accepted, matching Redis's `proto-max-bulk-len`.
const MAX_BULK_LEN: i64 = 512 * 1024 * 1024;

/// Largest array accepted in one reply.
const MAX_ARRAY_LEN: i64 = 1024 * 1024;

/// Elements preallocated for an array reply before any arrive.
const ARRAY_PREALLOC: usize = 1024;

// ── RESP codec ──────────────────────────────────────────────────────

/// A decoded RESP2 reply.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Reply {
    Simple(String),
    Error(String),
    Integer(i64),
    /// `None` is the nil bulk string (`$-1`).
    Bulk(Option<Vec<u8>>),
    /// `None` is the nil array (`*-1`).
    Array(Option<Vec<Reply>>),
}

/// Encode a command as a RESP array of bulk strings.
fn encode_command(args: &[&[u8]]) -> Vec<u8> {
    let mut out = Vec::with_capacity(16 + args.iter().map(|a| a.len() + 16).sum::<usize>());
    out.extend_from_slice(format!("*{}\r\n", args.len()).as_bytes());
    for arg in args {
        out.extend_from_slice(format!("${}\r\n", arg.len()).as_bytes());
        out.extend_from_slice(arg);
        out.extend_from_slice(b"\r\n");
    }
    out
}

/// Read one complete reply from `reader`.
fn read_reply<R: BufRead>(reader: &mut R) -> BackendResult<Reply> {
    let line = read_line(reader)?;
    let (&kind, rest) = line
        .split_first()
        .ok_or_else(|| BackendError::Protocol("empty reply line".to_string()))?;
    let text = std::str::from_utf8(rest)
        .map_err(|e| BackendError::Protocol(format!("non-utf8 reply header: {e}")))?;

    match kind {
        b'+' => Ok(Reply::Simple(text.to_string())),
        b'-' => Ok(Reply::Error(text.to_string())),
        b':' => Ok(Reply::Integer(parse_int(text)?)),
        b'$' => {
            let len = parse_int(text)?;
            if len < 0 {
                return Ok(Reply::Bulk(None));
            }
            if len > MAX_BULK_LEN {
                return Err(BackendError::Protocol(format!(
                    "bulk string of {len} bytes exceeds limit of {MAX_BULK_LEN}"
                )));
            }
            let mut buf = vec![0u8; len as usize + 2];
            reader.read_exact(&mut buf)?;
            if !buf.ends_with(b"\r\n") {
                return Err(BackendError::Protocol(
                    "bulk string not terminated by CRLF".to_string(),
                ));
            }
            buf.truncate(len as usize);
            Ok(Reply::Bulk(Some(buf)))
        }
        b'*' => {
            let len = parse_int(text)?;
            if len < 0 {
                return Ok(Reply::Array(None));
            }
            if len > MAX_ARRAY_LEN {
                return Err(BackendError::Protocol(format!(
                    "array of {len} elements exceeds limit of {MAX_ARRAY_LEN}"
                )));
            }
            let mut items = Vec::with_capacity((len as usize).min(ARRAY_PREALLOC));
            for _ in 0..len {
                items.push(read_reply(reader)?);
            }
            Ok(Reply::Array(Some(items)))
        }
        other => Err(BackendError::Protocol(format!(
            "unexpected reply type byte 0x{other:02x}"
        ))),
    }
}

/// Read a CRLF-terminated line, without the terminator.
fn read_line<R: BufRead>(reader: &mut R) -> BackendResult<Vec<u8>> {
    let mut line = Vec::new();
    let n = reader.read_until(b'\n', &mut line)?;
    if n == 0 {
        return Err(BackendError::Io("connection closed by server".to_string()));
    }
    if !line.ends_with(b"\r\n") {
        return Err(BackendError::Protocol("reply line not terminated by CRLF".to_string()));
    }
    line.truncate(line.len() - 2);
    Ok(line)
}

fn parse_int(text: &str) -> BackendResult<i64> {
    text.parse()
        .map_err(|_| BackendError::Protocol(format!("invalid integer in reply: {text:?}")))
}

/// Escape glob metacharacters so `prefix` matches literally in `SCAN MATCH`.
fn match_pattern(prefix: &str) -> String {
    let mut pattern = String::with_capacity(prefix.len() + 1);
    for c in prefix.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('*');
    pattern
}

// ── Connection ──────────────────────────────────────────────────────

/// A single authenticated connection to the server.
struct Connection {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
}

impl Connection {
    /// Dial the server, apply timeouts, then authenticate and select the db.
    fn establish(config: &RedisConfig) -> BackendResult<Self> {
        let addr = config
            .address
            .to_socket_addrs()
            .map_err(|e| {
                BackendError::Unavailable(format!(
                    "dns resolution failed for {}: {e}",
                    config.address
                ))
            })?
            .next()
            .ok_or_else(|| {
                BackendError::Unavailable(format!("no address found for {}", config.address))
            })?;

        let stream = TcpStream::connect_timeout(&addr, config.connect_timeout()).map_err(|e| {
            BackendError::Unavailable(format!("tcp connect to {}: {e}", config.address))
        })?;
        stream.set_read_timeout(Some(config.io_timeout()))?;
        stream.set_write_timeout(Some(config.io_timeout()))?;
        let _ = stream.set_nodelay(true);

        let mut conn = Self {
            reader: BufReader::new(stream.try_clone()?),
            writer: stream,
        };

        if let Some(password) = config.password() {
            let reply = match &config.username {
                Some(user) => conn.call(&[b"AUTH", user.as_bytes(), password.as_bytes()])?,
                None => conn.call(&[b"AUTH", password.as_bytes()])?,
            };
            expect_ok(reply)
                .map_err(|e| BackendError::Unavailable(format!("auth rejected: {e}")))?;
        }
        if config.db != 0 {
            let db = config.db.to_string();
            let reply = conn.call(&[b"SELECT", db.as_bytes()])?;
            expect_ok(reply)
                .map_err(|e| BackendError::Unavailable(format!("select db {}: {e}", config.db)))?;
        }

        debug!(address = %config.address, db = config.db, "established redis connection");
        Ok(conn)
    }

    /// Send one command and read its reply.
    fn call(&mut self, args: &[&[u8]]) -> BackendResult<Reply> {
        self.writer.write_all(&encode_command(args))?;
        self.writer.flush()?;
        read_reply(&mut self.reader)
    }
}

fn expect_ok(reply: Reply) -> BackendResult<()> {
    match reply {
        Reply::Simple(s) if s == "OK" => Ok(()),
        other => Err(unexpected(other)),
    }
}

fn unexpected(reply: Reply) -> BackendError {
    match reply {
        Reply::Error(msg) => BackendError::Server(msg),
        other => BackendError::Protocol(format!("unexpected reply: {other:?}")),
    }
}

// ── RedisBackend ────────────────────────────────────────────────────

/// A [`KvBackend`] on a Redis server.
pub struct RedisBackend {
    config: RedisConfig,
    conn: Mutex<Option<Connection>>,
}

impl std::fmt::Debug for RedisBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisBackend")
            .field("address", &self.config.address)
            .field("db", &self.config.db)
            .finish()
    }
}

impl RedisBackend {
    /// Connect eagerly and confirm the server answers `PING`.
    ///
    /// Fails with [`BackendError::Unavailable`] if the server cannot be
    /// reached or rejects the credentials.
    pub fn connect(config: &RedisConfig) -> BackendResult<Self> {
        let conn = Connection::establish(config)?;
        let backend = Self {
            config: config.clone(),
            conn: Mutex::new(Some(conn)),
        };
        backend
            .ping()
            .map_err(|e| BackendError::Unavailable(e.to_string()))?;
        Ok(backend)
    }

    /// Run one command on the shared connection, dialing first if needed.
    fn execute(&self, args: &[&[u8]]) -> BackendResult<Reply> {
        let mut slot = match self.conn.lock() {
            Ok(slot) => slot,
            Err(poisoned) => {
                // A caller panicked mid-command; the stream may hold a partial
                // reply, so start over on a fresh connection.
                warn!(address = %self.config.address, "recovering poisoned redis connection lock");
                let mut slot = poisoned.into_inner();
                *slot = None;
                self.conn.clear_poison();
                slot
            }
        };
        let mut conn = match slot.take() {
            Some(conn) => conn,
            None => Connection::establish(&self.config)?,
        };
        match conn.call(args) {
            Ok(reply) => {
                *slot = Some(conn);
                Ok(reply)
            }
            Err(e) => {
                warn!(address = %self.config.address, error = %e, "dropping redis connection");
                Err(e)
            }
        }
    }
}

impl KvBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    fn set(&self, key: &str, value: &[u8]) -> BackendResult<()> {
        expect_ok(self.execute(&[b"SET", key.as_bytes(), value])?)
    }

    fn get(&self, key: &str) -> BackendResult<Option<Vec<u8>>> {
        match self.execute(&[b"GET", key.as_bytes()])? {
            Reply::Bulk(value) => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    fn keys_with_prefix(&self, prefix: &str) -> BackendResult<Vec<String>> {
        let pattern = match_pattern(prefix);
        // SCAN may return a key more than once across iterations.
        let mut keys = BTreeSet::new();
        let mut cursor = "0".to_string();
        loop {
            let reply = self.execute(&[
                b"SCAN",
                cursor.as_bytes(),
                b"MATCH",
                pattern.as_bytes(),
                b"COUNT",
                SCAN_COUNT,
            ])?;
            let (next, batch) = parse_scan_reply(reply)?;
            for key in batch {
                if key.starts_with(prefix) {
                    keys.insert(key);
                }
            }
            if next == "0" {
                break;
            }
            cursor = next;
        }
        Ok(keys.into_iter().collect())
    }

    fn ping(&self) -> BackendResult<()> {
        match self.execute(&[b"PING"])? {
            Reply::Simple(s) if s == "PONG" => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

/// Split a `SCAN` reply into the next cursor and the batch of keys.
fn parse_scan_reply(reply: Reply) -> BackendResult<(String, Vec<String>)> {
    let Reply::Array(Some(mut parts)) = reply else {
        return Err(unexpected(reply));
    };
    if parts.len() != 2 {
        return Err(BackendError::Protocol(format!(
            "scan reply has {} elements, expected 2",
            parts.len()
        )));
    }
    let batch = parts.pop();
    let cursor = parts.pop();
    let cursor = match cursor {
        Some(Reply::Bulk(Some(bytes))) => bulk_to_string(bytes)?,
        other => {
            return Err(BackendError::Protocol(format!("bad scan cursor: {other:?}")));
        }
    };
    let keys = match batch {
        Some(Reply::Array(Some(items))) => items
            .into_iter()
            .map(|item| match item {
                Reply::Bulk(Some(bytes)) => bulk_to_string(bytes),
                other => Err(BackendError::Protocol(format!("bad scan key: {other:?}"))),
            })
            .collect::<BackendResult<Vec<_>>>()?,
        other => {
            return Err(BackendError::Protocol(format!("bad scan batch: {other:?}")));
        }
    };
    Ok((cursor, keys))
}

fn bulk_to_string(bytes: Vec<u8>) -> BackendResult<String> {
    String::from_utf8(bytes).map_err(|e| BackendError::Protocol(format!("non-utf8 key: {e}")))
}

// ── Tests ────────────────────────────────────────────────────────────
