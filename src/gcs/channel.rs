//! Device channel: transport-agnostic command/response endpoint.
//!
//! The controller firmware speaks one line-oriented ASCII conversation at a
//! time, regardless of how the bytes reach it. Two backends are provided:
//!
//! - [`TcpChannel`] talks GCS directly to the controller on port 50000.
//! - [`RelayChannel`] talks the same ASCII through an EPICS asyn gateway,
//!   where replies arrive asynchronously and must be polled for within a
//!   bounded wait window.
//!
//! The backend is chosen explicitly by the caller via [`TransportKind`];
//! there is no address-shape sniffing.
//!
//! Multi-line GCS replies mark every non-final line with a trailing space
//! before the linefeed, so a reply is complete once a line arrives without
//! the continuation marker.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use super::error::{GcsError, GcsResult};

/// Default GCS TCP port on PI controllers.
pub const DEFAULT_PORT: u16 = 50000;

/// Default per-operation socket timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(7);

/// Connection establishment timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Default reply wait window for the relay backend.
const RELAY_WAIT: Duration = Duration::from_secs(2);

/// Poll interval while waiting for a relayed reply.
const RELAY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Transport-agnostic command/response endpoint to the controller.
///
/// All device-facing modules consume this trait; the concrete backend is
/// invisible to them.
pub trait DeviceChannel: Send {
    /// Fire-and-forget command write.
    fn send(&mut self, cmd: &str) -> GcsResult<()>;

    /// Command write followed by a blocking reply read.
    ///
    /// The relay backend returns an empty string when its wait window
    /// expires without a reply.
    fn query(&mut self, cmd: &str) -> GcsResult<String>;

    /// Close the transport.
    fn close(&mut self) -> GcsResult<()>;

    /// Checked command: write, then verify the controller accepted it.
    ///
    /// A nonzero `ERR?` code maps to [`GcsError::Controller`].
    fn command(&mut self, cmd: &str) -> GcsResult<()> {
        self.send(cmd)?;
        let reply = self.query("ERR?")?;
        match reply.trim().parse::<i32>() {
            Ok(0) => Ok(()),
            Ok(code) => Err(GcsError::Controller { code }),
            Err(_) => Err(GcsError::Parse(format!("invalid ERR? reply {reply:?}"))),
        }
    }
}

/// How to reach the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportKind {
    /// Direct GCS over TCP (`host:port`, port normally 50000).
    Direct { addr: String },
    /// EPICS asyn ASCII gateway relaying to the controller.
    Relay { addr: String },
}

impl TransportKind {
    /// Open the selected transport.
    pub fn connect(&self) -> GcsResult<Box<dyn DeviceChannel>> {
        match self {
            TransportKind::Direct { addr } => Ok(Box::new(TcpChannel::connect(addr)?)),
            TransportKind::Relay { addr } => Ok(Box::new(RelayChannel::connect(addr)?)),
        }
    }
}

/// A reply is complete once it ends in a linefeed whose line does not carry
/// the GCS continuation marker (a space immediately before the linefeed).
fn reply_complete(buf: &[u8]) -> bool {
    match buf {
        [.., b' ', b'\n'] => false,
        [.., b'\n'] => true,
        _ => false,
    }
}

fn open_stream(addr: &str) -> GcsResult<TcpStream> {
    let resolved = addr
        .to_socket_addrs()
        .map_err(GcsError::Connection)?
        .next()
        .ok_or_else(|| GcsError::Command(format!("address {addr} did not resolve")))?;
    let stream = TcpStream::connect_timeout(&resolved, CONNECT_TIMEOUT)?;
    stream.set_nodelay(true)?;
    stream.set_read_timeout(Some(DEFAULT_TIMEOUT))?;
    stream.set_write_timeout(Some(DEFAULT_TIMEOUT))?;
    Ok(stream)
}

/// Direct GCS connection over TCP.
pub struct TcpChannel {
    stream: TcpStream,
    addr: String,
}

impl TcpChannel {
    /// Connect to a controller at `host:port`.
    pub fn connect(addr: &str) -> GcsResult<Self> {
        let stream = open_stream(addr)?;
        debug!("GCS TCP connection established to {addr}");
        Ok(Self {
            stream,
            addr: addr.to_string(),
        })
    }

    /// Set the timeout for reads and writes.
    ///
    /// The default is 7 seconds. Increase for long moves.
    pub fn set_timeout(&mut self, timeout: Duration) -> GcsResult<()> {
        self.stream.set_read_timeout(Some(timeout))?;
        self.stream.set_write_timeout(Some(timeout))?;
        Ok(())
    }

    /// Drop and re-establish the connection.
    ///
    /// Use this to recover from socket timeouts.
    pub fn reconnect(&mut self) -> GcsResult<()> {
        self.stream = open_stream(&self.addr)?;
        Ok(())
    }

    fn read_reply(&mut self) -> GcsResult<String> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = match self.stream.read(&mut chunk) {
                Ok(0) => {
                    return Err(GcsError::Command(
                        "connection closed by controller".to_string(),
                    ))
                }
                Ok(n) => n,
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    return Err(GcsError::Timeout)
                }
                Err(e) => return Err(GcsError::Connection(e)),
            };
            buf.extend_from_slice(&chunk[..n]);
            if reply_complete(&buf) {
                break;
            }
        }
        String::from_utf8(buf).map_err(|e| GcsError::Parse(format!("non-ASCII reply: {e}")))
    }
}

impl DeviceChannel for TcpChannel {
    fn send(&mut self, cmd: &str) -> GcsResult<()> {
        trace!("-> {cmd}");
        self.stream.write_all(cmd.as_bytes())?;
        self.stream.write_all(b"\n")?;
        Ok(())
    }

    fn query(&mut self, cmd: &str) -> GcsResult<String> {
        self.send(cmd)?;
        let reply = self.read_reply()?;
        trace!("<- {}", reply.trim_end());
        Ok(reply)
    }

    fn close(&mut self) -> GcsResult<()> {
        self.stream.shutdown(std::net::Shutdown::Both)?;
        Ok(())
    }
}

/// GCS over an EPICS asyn ASCII gateway.
///
/// The gateway forwards commands to the controller and buffers its replies;
/// they are not synchronized with the write, so `query` polls the stream
/// inside a bounded wait window and returns an empty string when the window
/// expires. Callers that need certainty must check device state afterward.
pub struct RelayChannel {
    stream: TcpStream,
    terminator: &'static str,
    wait: Duration,
}

impl RelayChannel {
    /// Connect to an asyn gateway at `host:port`.
    pub fn connect(addr: &str) -> GcsResult<Self> {
        let stream = open_stream(addr)?;
        stream.set_read_timeout(Some(RELAY_POLL_INTERVAL))?;
        debug!("relay connection established to {addr}");
        Ok(Self {
            stream,
            terminator: "\n",
            wait: RELAY_WAIT,
        })
    }

    /// Set the reply wait window (default 2 s).
    pub fn set_wait(&mut self, wait: Duration) {
        self.wait = wait;
    }
}

impl DeviceChannel for RelayChannel {
    fn send(&mut self, cmd: &str) -> GcsResult<()> {
        trace!("-> {cmd}");
        self.stream.write_all(cmd.as_bytes())?;
        self.stream.write_all(self.terminator.as_bytes())?;
        Ok(())
    }

    fn query(&mut self, cmd: &str) -> GcsResult<String> {
        self.send(cmd)?;
        let deadline = Instant::now() + self.wait;
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    return Err(GcsError::Command("connection closed by gateway".to_string()))
                }
                Ok(n) => {
                    buf.extend_from_slice(&chunk[..n]);
                    if reply_complete(&buf) {
                        break;
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::TimedOut => {
                    if Instant::now() >= deadline {
                        warn!("relay reply window expired for {cmd:?}");
                        return Ok(String::new());
                    }
                }
                Err(e) => return Err(GcsError::Connection(e)),
            }
        }
        let reply = String::from_utf8(buf)
            .map_err(|e| GcsError::Parse(format!("non-ASCII reply: {e}")))?;
        trace!("<- {}", reply.trim_end());
        Ok(reply)
    }

    fn close(&mut self) -> GcsResult<()> {
        self.stream.shutdown(std::net::Shutdown::Both)?;
        Ok(())
    }
}

/// Scripted channel for tests: maps command prefixes to canned replies and
/// records everything written to it.
///
/// Clones share state, so a test can keep a handle while the driver owns
/// the boxed channel.
#[derive(Clone, Default)]
pub struct MockChannel {
    inner: Arc<Mutex<MockInner>>,
}

#[derive(Default)]
struct MockInner {
    stubs: Vec<(String, String)>,
    queued: Vec<(String, VecDeque<String>)>,
    log: Vec<String>,
}

impl MockChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stub a repeatable reply for commands starting with `prefix`.
    ///
    /// Later stubs for the same prefix take precedence.
    pub fn stub(&self, prefix: &str, reply: &str) {
        let mut inner = self.lock();
        inner.stubs.push((prefix.to_string(), reply.to_string()));
    }

    /// Queue a one-shot reply for commands starting with `prefix`.
    ///
    /// One-shot replies are consumed in FIFO order and take precedence over
    /// repeatable stubs.
    pub fn stub_once(&self, prefix: &str, reply: &str) {
        let mut inner = self.lock();
        if let Some((_, queue)) = inner.queued.iter_mut().find(|(p, _)| p.as_str() == prefix) {
            queue.push_back(reply.to_string());
        } else {
            inner
                .queued
                .push((prefix.to_string(), VecDeque::from([reply.to_string()])));
        }
    }

    /// Everything sent or queried so far, in order.
    pub fn log(&self) -> Vec<String> {
        self.lock().log.clone()
    }

    /// Count of logged commands starting with `prefix`.
    pub fn count(&self, prefix: &str) -> usize {
        self.lock()
            .log
            .iter()
            .filter(|cmd| cmd.starts_with(prefix))
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl DeviceChannel for MockChannel {
    fn send(&mut self, cmd: &str) -> GcsResult<()> {
        self.lock().log.push(cmd.to_string());
        Ok(())
    }

    fn query(&mut self, cmd: &str) -> GcsResult<String> {
        let mut inner = self.lock();
        inner.log.push(cmd.to_string());
        if let Some((_, queue)) = inner
            .queued
            .iter_mut()
            .find(|(prefix, queue)| cmd.starts_with(prefix.as_str()) && !queue.is_empty())
        {
            // pop_front cannot fail: the queue was just checked non-empty
            return Ok(queue.pop_front().unwrap_or_default());
        }
        if let Some((_, reply)) = inner
            .stubs
            .iter()
            .rev()
            .find(|(prefix, _)| cmd.starts_with(prefix.as_str()))
        {
            return Ok(reply.clone());
        }
        if cmd.starts_with("ERR?") {
            return Ok("0".to_string());
        }
        Err(GcsError::Command(format!("no stubbed reply for {cmd:?}")))
    }

    fn close(&mut self) -> GcsResult<()> {
        Ok(())
    }
}
