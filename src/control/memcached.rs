//! Memcached-backed lock store speaking the ASCII protocol over TCP.
//!
//! A background connector thread owns connection establishment and publishes
//! link transitions through a mutex + condvar. Calls are serialized on one
//! gate; a call that finds no live link waits up to `connect_wait` for the
//! connector and otherwise fails as unavailable without touching the wire.
//! A parked link is checked for a server-side close on every connector tick
//! and again before a call takes it. A wire failure drops the link and wakes
//! the connector. Calls are never retried.

#![allow(missing_docs)]

use std::io::{self, BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::{Condvar, Mutex};

use crate::control::lock_store::LockStore;
use crate::core::config::LockStoreConfig;
use crate::core::errors::{Result, VmgError};

/// Longest key memcached accepts.
const MAX_KEY_LEN: usize = 250;

/// Connection and timing parameters for [`MemcachedLockStore`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemcachedConfig {
    pub host: String,
    pub port: u16,
    pub connect_wait: Duration,
    pub io_timeout: Duration,
    pub reconnect_interval: Duration,
}

impl From<&LockStoreConfig> for MemcachedConfig {
    fn from(value: &LockStoreConfig) -> Self {
        Self {
            host: value.host.clone(),
            port: value.port,
            connect_wait: Duration::from_millis(value.connect_wait_ms),
            io_timeout: Duration::from_millis(value.io_timeout_ms),
            reconnect_interval: Duration::from_millis(value.reconnect_interval_ms),
        }
    }
}

impl MemcachedConfig {
    #[must_use]
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConnectorSignal {
    Reconnect,
    Shutdown,
}

#[derive(Debug, Default)]
struct Link {
    stream: Option<TcpStream>,
    /// The stream is checked out by an in-flight call.
    in_use: bool,
}

#[derive(Debug, Default)]
struct Shared {
    link: Mutex<Link>,
    changed: Condvar,
    shutdown: AtomicBool,
}

/// Parsed single-line server reply.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Reply {
    Stored,
    NotStored,
    Exists,
    Deleted,
    NotFound,
    Error,
    ClientError(String),
    ServerError(String),
    Other(String),
}

impl Reply {
    fn parse(line: &str) -> Self {
        match line {
            "STORED" => Self::Stored,
            "NOT_STORED" => Self::NotStored,
            "EXISTS" => Self::Exists,
            "DELETED" => Self::Deleted,
            "NOT_FOUND" => Self::NotFound,
            "ERROR" => Self::Error,
            _ => {
                if let Some(rest) = line.strip_prefix("CLIENT_ERROR") {
                    Self::ClientError(rest.trim().to_string())
                } else if let Some(rest) = line.strip_prefix("SERVER_ERROR") {
                    Self::ServerError(rest.trim().to_string())
                } else {
                    Self::Other(line.to_string())
                }
            }
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Stored => "STORED".to_string(),
            Self::NotStored => "NOT_STORED".to_string(),
            Self::Exists => "EXISTS".to_string(),
            Self::Deleted => "DELETED".to_string(),
            Self::NotFound => "NOT_FOUND".to_string(),
            Self::Error => "ERROR".to_string(),
            Self::ClientError(msg) => format!("CLIENT_ERROR {msg}"),
            Self::ServerError(msg) => format!("SERVER_ERROR {msg}"),
            Self::Other(line) => format!("unexpected reply {line:?}"),
        }
    }
}

/// Memcached client holding the protective-mode flag.
pub struct MemcachedLockStore {
    config: MemcachedConfig,
    endpoint: String,
    shared: Arc<Shared>,
    gate: Mutex<()>,
    signals: Sender<ConnectorSignal>,
    connector: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for MemcachedLockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemcachedLockStore")
            .field("endpoint", &self.endpoint)
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl MemcachedLockStore {
    /// Validate the endpoint and start the background connector.
    pub fn connect(config: MemcachedConfig) -> Result<Self> {
        if config.host.trim().is_empty() {
            return Err(VmgError::InvalidConfig {
                details: "memcached host must not be blank".to_string(),
            });
        }
        if config.port == 0 {
            return Err(VmgError::InvalidConfig {
                details: "memcached port must be in 1..=65535".to_string(),
            });
        }

        let endpoint = config.endpoint();
        let shared = Arc::new(Shared::default());
        let (signals, rx) = bounded(1);

        let worker_shared = Arc::clone(&shared);
        let worker_config = config.clone();
        let handle = thread::Builder::new()
            .name("vmg-memcached-connector".to_string())
            .spawn(move || run_connector(&worker_shared, &worker_config, &rx))
            .map_err(|error| VmgError::Runtime {
                details: format!("failed to spawn memcached connector: {error}"),
            })?;

        Ok(Self {
            config,
            endpoint,
            shared,
            gate: Mutex::new(()),
            signals,
            connector: Mutex::new(Some(handle)),
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Whether the connector currently holds a live link.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        let link = self.shared.link.lock();
        link.stream.is_some() || link.in_use
    }

    fn call(&self, operation: &'static str, request: &[u8]) -> Result<Reply> {
        let _gate = self.gate.lock();
        if self.shared.shutdown.load(Ordering::Acquire) {
            return Err(VmgError::LockStore {
                operation,
                details: "client has been shut down".to_string(),
            });
        }

        let mut stream = self.checkout()?;
        let outcome = exchange(&mut stream, request);

        let mut link = self.shared.link.lock();
        link.in_use = false;
        match outcome {
            Ok(reply) => {
                link.stream = Some(stream);
                Ok(reply)
            }
            Err(error) => {
                drop(link);
                drop(stream);
                eprintln!(
                    "[VMG-MEMCACHED] connection to {} lost during {operation}: {error}",
                    self.endpoint
                );
                let _ = self.signals.try_send(ConnectorSignal::Reconnect);
                Err(VmgError::LockStore {
                    operation,
                    details: error.to_string(),
                })
            }
        }
    }

    /// Take the live stream, waiting at most `connect_wait` for one to appear.
    /// A parked stream whose peer has gone counts as no stream.
    fn checkout(&self) -> Result<TcpStream> {
        let deadline = Instant::now() + self.config.connect_wait;
        let mut link = self.shared.link.lock();
        loop {
            if let Some(stream) = link.stream.take() {
                if !peer_closed(&stream) {
                    link.in_use = true;
                    return Ok(stream);
                }
                eprintln!(
                    "[VMG-MEMCACHED] idle connection to {} closed by server",
                    self.endpoint
                );
            }
            if self.shared.shutdown.load(Ordering::Acquire) {
                break;
            }
            let _ = self.signals.try_send(ConnectorSignal::Reconnect);
            if self
                .shared
                .changed
                .wait_until(&mut link, deadline)
                .timed_out()
                && link.stream.is_none()
            {
                break;
            }
        }
        #[allow(clippy::cast_possible_truncation)]
        let waited_ms = self.config.connect_wait.as_millis() as u64;
        Err(VmgError::LockStoreUnavailable {
            endpoint: self.endpoint.clone(),
            waited_ms,
        })
    }
}

impl LockStore for MemcachedLockStore {
    fn set(&self, key: &str, payload: &str) -> Result<()> {
        validate_key(key)?;
        match self.call("set", &encode_set(key, payload))? {
            Reply::Stored => Ok(()),
            other => Err(VmgError::LockStore {
                operation: "set",
                details: other.describe(),
            }),
        }
    }

    fn clear(&self, key: &str) -> Result<()> {
        validate_key(key)?;
        match self.call("delete", &encode_delete(key))? {
            Reply::Deleted | Reply::NotFound => Ok(()),
            other => Err(VmgError::LockStore {
                operation: "delete",
                details: other.describe(),
            }),
        }
    }

    fn name(&self) -> &'static str {
        "memcached"
    }

    fn shutdown(&self) {
        if self.shared.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        let _ = self.signals.try_send(ConnectorSignal::Shutdown);
        if let Some(handle) = self.connector.lock().take() {
            let _ = handle.join();
        }
        let mut link = self.shared.link.lock();
        link.stream = None;
        self.shared.changed.notify_all();
    }
}

impl Drop for MemcachedLockStore {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_connector(shared: &Shared, config: &MemcachedConfig, signals: &Receiver<ConnectorSignal>) {
    let endpoint = config.endpoint();
    let mut reported_down = false;
    loop {
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }

        let needs_link = {
            let mut link = shared.link.lock();
            if link.stream.as_ref().is_some_and(peer_closed) {
                link.stream = None;
                shared.changed.notify_all();
                eprintln!("[VMG-MEMCACHED] idle connection to {endpoint} closed by server");
                reported_down = true;
            }
            link.stream.is_none() && !link.in_use
        };
        if needs_link {
            match open_stream(config) {
                Ok(stream) => {
                    let mut link = shared.link.lock();
                    if link.stream.is_none()
                        && !link.in_use
                        && !shared.shutdown.load(Ordering::Acquire)
                    {
                        link.stream = Some(stream);
                        shared.changed.notify_all();
                        if reported_down {
                            eprintln!("[VMG-MEMCACHED] connection established to {endpoint}");
                        }
                        reported_down = false;
                    }
                }
                Err(error) => {
                    if !reported_down {
                        eprintln!("[VMG-MEMCACHED] cannot connect to {endpoint}: {error}");
                        reported_down = true;
                    }
                }
            }
        }

        match signals.recv_timeout(config.reconnect_interval) {
            Ok(ConnectorSignal::Reconnect) | Err(RecvTimeoutError::Timeout) => {}
            Ok(ConnectorSignal::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

fn open_stream(config: &MemcachedConfig) -> io::Result<TcpStream> {
    let addrs: Vec<SocketAddr> = (config.host.as_str(), config.port)
        .to_socket_addrs()?
        .collect();
    let mut last_error =
        io::Error::new(io::ErrorKind::AddrNotAvailable, "no addresses resolved");
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, config.io_timeout) {
            Ok(stream) => {
                stream.set_read_timeout(Some(config.io_timeout))?;
                stream.set_write_timeout(Some(config.io_timeout))?;
                stream.set_nodelay(true)?;
                return Ok(stream);
            }
            Err(error) => last_error = error,
        }
    }
    Err(last_error)
}

/// Non-blocking check of an idle stream. Anything other than `WouldBlock`
/// means the link can no longer carry a request.
fn peer_closed(stream: &TcpStream) -> bool {
    if stream.set_nonblocking(true).is_err() {
        return true;
    }
    let mut byte = [0u8; 1];
    let closed = match stream.peek(&mut byte) {
        Err(error) => error.kind() != io::ErrorKind::WouldBlock,
        Ok(_) => true,
    };
    stream.set_nonblocking(false).is_err() || closed
}

fn exchange(stream: &mut TcpStream, request: &[u8]) -> io::Result<Reply> {
    stream.write_all(request)?;
    stream.flush()?;
    let mut reader = BufReader::new(&*stream);
    let mut line = String::new();
    if reader.read_line(&mut line)? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "connection closed by server",
        ));
    }
    Ok(Reply::parse(line.trim_end_matches(['\r', '\n'])))
}

fn validate_key(key: &str) -> Result<()> {
    if key.is_empty()
        || key.len() > MAX_KEY_LEN
        || key.bytes().any(|b| b.is_ascii_whitespace() || b.is_ascii_control())
    {
        return Err(VmgError::LockStore {
            operation: "validate",
            details: format!("invalid memcached key {key:?}"),
        });
    }
    Ok(())
}

fn encode_set(key: &str, payload: &str) -> Vec<u8> {
    let mut out = format!("set {key} 0 0 {}\r\n", payload.len()).into_bytes();
    out.extend_from_slice(payload.as_bytes());
    out.extend_from_slice(b"\r\n");
    out
}

fn encode_delete(key: &str) -> Vec<u8> {
    format!("delete {key}\r\n").into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::lock_store::LOCK_KEY;
    use std::io::Read;
    use std::net::TcpListener;

    fn config_for(port: u16, connect_wait: Duration) -> MemcachedConfig {
        MemcachedConfig {
            host: "127.0.0.1".to_string(),
            port,
            connect_wait,
            io_timeout: Duration::from_secs(2),
            reconnect_interval: Duration::from_millis(20),
        }
    }

    /// Read one request (command line plus data block for `set`) from `reader`.
    fn read_request(reader: &mut BufReader<TcpStream>) -> Option<String> {
        let mut line = String::new();
        if reader.read_line(&mut line).ok()? == 0 {
            return None;
        }
        if line.starts_with("set ") {
            let len: usize = line.split_whitespace().nth(4)?.parse().ok()?;
            let mut data = vec![0u8; len + 2];
            reader.read_exact(&mut data).ok()?;
            line.push_str(&String::from_utf8_lossy(&data));
        }
        Some(line)
    }

    /// Serve one connection, answering each request with the next canned reply.
    fn serve(listener: TcpListener, replies: Vec<&'static str>) -> JoinHandle<Vec<String>> {
        thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let mut reader = BufReader::new(stream);
            let mut seen = Vec::new();
            for reply in replies {
                let Some(request) = read_request(&mut reader) else {
                    break;
                };
                seen.push(request);
                writer.write_all(reply.as_bytes()).unwrap();
                writer.write_all(b"\r\n").unwrap();
            }
            seen
        })
    }

    #[test]
    fn reply_parsing() {
        assert_eq!(Reply::parse("STORED"), Reply::Stored);
        assert_eq!(Reply::parse("NOT_FOUND"), Reply::NotFound);
        assert_eq!(
            Reply::parse("SERVER_ERROR out of memory"),
            Reply::ServerError("out of memory".to_string())
        );
        assert_eq!(
            Reply::parse("CLIENT_ERROR bad data chunk"),
            Reply::ClientError("bad data chunk".to_string())
        );
        assert_eq!(Reply::parse("VALUE x"), Reply::Other("VALUE x".to_string()));
    }

    #[test]
    fn request_encoding() {
        assert_eq!(
            encode_set("k", "{\"a\":1}"),
            b"set k 0 0 7\r\n{\"a\":1}\r\n".to_vec()
        );
        assert_eq!(encode_delete("k"), b"delete k\r\n".to_vec());
    }

    #[test]
    fn key_validation() {
        assert!(validate_key(LOCK_KEY).is_ok());
        assert!(validate_key("").is_err());
        assert!(validate_key("has space").is_err());
        assert!(validate_key("tab\tkey").is_err());
        assert!(validate_key(&"k".repeat(MAX_KEY_LEN + 1)).is_err());
    }

    #[test]
    fn zero_port_rejected_at_construction() {
        let err = MemcachedLockStore::connect(config_for(0, Duration::from_millis(10)))
            .expect_err("port 0");
        assert_eq!(err.code(), "VMG-1001");
    }

    #[test]
    fn set_stores_payload() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = serve(listener, vec!["STORED"]);

        let store = MemcachedLockStore::connect(config_for(port, Duration::from_secs(3))).unwrap();
        store.set(LOCK_KEY, "{\"status\":{}}").unwrap();
        store.shutdown();

        let seen = server.join().unwrap();
        assert_eq!(
            seen,
            vec![format!("set {LOCK_KEY} 0 0 13\r\n{{\"status\":{{}}}}\r\n")]
        );
    }

    #[test]
    fn clear_treats_not_found_as_success() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = serve(listener, vec!["NOT_FOUND", "DELETED"]);

        let store = MemcachedLockStore::connect(config_for(port, Duration::from_secs(3))).unwrap();
        store.clear(LOCK_KEY).unwrap();
        store.clear(LOCK_KEY).unwrap();
        store.shutdown();

        let seen = server.join().unwrap();
        assert_eq!(seen.len(), 2);
        assert!(seen.iter().all(|r| r == &format!("delete {LOCK_KEY}\r\n")));
    }

    #[test]
    fn server_error_reply_fails_but_keeps_link() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = serve(listener, vec!["SERVER_ERROR out of memory", "STORED"]);

        let store = MemcachedLockStore::connect(config_for(port, Duration::from_secs(3))).unwrap();
        let err = store.set(LOCK_KEY, "x").expect_err("server error");
        assert_eq!(err.code(), "VMG-3002");
        assert!(err.to_string().contains("SERVER_ERROR out of memory"));
        assert!(store.is_connected());
        store.set(LOCK_KEY, "x").unwrap();
        store.shutdown();
        assert_eq!(server.join().unwrap().len(), 2);
    }

    #[test]
    fn unreachable_server_is_unavailable() {
        let port = {
            let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
            listener.local_addr().unwrap().port()
        };
        let wait = Duration::from_millis(150);
        let store = MemcachedLockStore::connect(config_for(port, wait)).unwrap();

        let started = Instant::now();
        let err = store.clear(LOCK_KEY).expect_err("nothing listening");
        assert_eq!(err.code(), "VMG-3001");
        assert!(started.elapsed() >= wait);
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(!store.is_connected());
    }

    #[test]
    fn reconnects_after_server_drops_connection() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            // First connection: read the request and hang up without replying.
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream);
            let _ = read_request(&mut reader);
            drop(reader);
            // Second connection: answer normally.
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let mut reader = BufReader::new(stream);
            let request = read_request(&mut reader);
            writer.write_all(b"STORED\r\n").unwrap();
            request
        });

        let store = MemcachedLockStore::connect(config_for(port, Duration::from_secs(3))).unwrap();
        let err = store.set(LOCK_KEY, "first").expect_err("peer hung up");
        assert_eq!(err.code(), "VMG-3002");
        store.set(LOCK_KEY, "second").unwrap();
        store.shutdown();

        let request = server.join().unwrap().unwrap();
        assert!(request.ends_with("second\r\n"));
    }

    #[test]
    fn idle_disconnect_is_noticed_before_next_call() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            // First connection: hang up while the client is idle.
            let (stream, _) = listener.accept().unwrap();
            drop(stream);
            // Second connection: answer normally.
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let mut reader = BufReader::new(stream);
            let request = read_request(&mut reader);
            writer.write_all(b"DELETED\r\n").unwrap();
            request
        });

        let store = MemcachedLockStore::connect(config_for(port, Duration::from_secs(3))).unwrap();
        thread::sleep(Duration::from_millis(300));
        store.clear(LOCK_KEY).unwrap();
        assert!(store.is_connected());
        store.shutdown();

        let request = server.join().unwrap();
        assert_eq!(request, Some(format!("delete {LOCK_KEY}\r\n")));
    }

    #[test]
    fn peer_closed_detects_hangup() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server_side, _) = listener.accept().unwrap();
        assert!(!peer_closed(&client));

        drop(server_side);
        let deadline = Instant::now() + Duration::from_secs(2);
        while !peer_closed(&client) {
            assert!(Instant::now() < deadline, "close never observed");
            thread::sleep(Duration::from_millis(10));
        }
    }

    #[test]
    fn overlapping_calls_are_serialized() {
        let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut writer = stream.try_clone().unwrap();
            let mut reader = BufReader::new(stream);
            let mut interleaved = false;
            let mut seen = Vec::new();
            for _ in 0..2 {
                let request = read_request(&mut reader).unwrap();
                thread::sleep(Duration::from_millis(150));
                // Nothing else may arrive while this request is unanswered.
                interleaved |= !reader.buffer().is_empty();
                writer.set_nonblocking(true).unwrap();
                let mut byte = [0u8; 1];
                interleaved |= writer.peek(&mut byte).is_ok();
                writer.set_nonblocking(false).unwrap();
                let reply: &[u8] = if request.starts_with("set ") {
                    b"STORED\r\n"
                } else {
                    b"DELETED\r\n"
                };
                writer.write_all(reply).unwrap();
                seen.push(request);
            }
            (interleaved, seen)
        });

        let store = MemcachedLockStore::connect(config_for(port, Duration::from_secs(3))).unwrap();
        thread::scope(|scope| {
            let setter = scope.spawn(|| store.set(LOCK_KEY, "payload"));
            let clearer = scope.spawn(|| store.clear(LOCK_KEY));
            setter.join().unwrap().unwrap();
            clearer.join().unwrap().unwrap();
        });
        store.shutdown();

        let (interleaved, seen) = server.join().unwrap();
        assert!(!interleaved, "second request arrived before the first reply");
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn calls_after_shutdown_fail() {
        let port = {
            let listener = TcpListener::bind(("127.0.0.1", 0)).unwrap();
            listener.local_addr().unwrap().port()
        };
        let store =
            MemcachedLockStore::connect(config_for(port, Duration::from_millis(10))).unwrap();
        store.shutdown();
        let err = store.set(LOCK_KEY, "x").expect_err("shut down");
        assert_eq!(err.code(), "VMG-3002");
    }
}
