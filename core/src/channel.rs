//! StateChannel: the single request/response pipe to the engine.
//!
//! RULE: one request in flight, ever. `send_request` takes `&mut self` and
//! blocks until the matching response has been read, so two requests can
//! never interleave on one channel.

use std::{
    io::{self, BufRead, BufReader, Write},
    net::{Shutdown, TcpListener, TcpStream, ToSocketAddrs},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::{
    error::{ControlError, ControlResult},
    protocol::{decode_frame, encode_frame, Request, Response},
};

/// Who opens the TCP connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionMode {
    /// The controller dials the engine.
    Client,
    /// The controller listens and the engine dials in.
    Server,
}

impl std::str::FromStr for ConnectionMode {
    type Err = ControlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "client" => Ok(ConnectionMode::Client),
            "server" => Ok(ConnectionMode::Server),
            other => Err(ControlError::Config(format!("unknown connection mode '{other}'"))),
        }
    }
}

/// The seam between channel logic and the bytes on the wire.
/// TCP in production; tests plug in a scripted engine.
pub trait Transport {
    /// Send one request and block until its response arrives.
    fn exchange(&mut self, request: &Request) -> ControlResult<Response>;

    /// Release the underlying resource. Called at most once per transport.
    fn close(&mut self) -> ControlResult<()>;

    /// Human-readable peer description for log lines.
    fn peer(&self) -> String;
}

// ── TCP ──────────────────────────────────────────────────────────────────────

pub struct TcpTransport {
    reader: BufReader<TcpStream>,
    writer: TcpStream,
    peer:   String,
}

impl TcpTransport {
    pub fn new(stream: TcpStream, read_timeout: Option<Duration>) -> ControlResult<Self> {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let setup = |stream: &TcpStream| -> io::Result<TcpStream> {
            stream.set_nodelay(true)?;
            stream.set_read_timeout(read_timeout)?;
            stream.try_clone()
        };
        let reader_stream = setup(&stream).map_err(|e| ControlError::connection(&peer, e))?;
        Ok(Self {
            reader: BufReader::new(reader_stream),
            writer: stream,
            peer,
        })
    }

    fn read_frame(&mut self) -> ControlResult<String> {
        let mut line = String::new();
        loop {
            line.clear();
            let read = self
                .reader
                .read_line(&mut line)
                .map_err(|e| ControlError::connection(&self.peer, e))?;
            if read == 0 {
                return Err(ControlError::connection(
                    &self.peer,
                    io::Error::new(io::ErrorKind::UnexpectedEof, "engine closed the connection"),
                ));
            }
            // Blank lines are keep-alives, not frames.
            if !line.trim().is_empty() {
                return Ok(line);
            }
        }
    }
}

impl Transport for TcpTransport {
    fn exchange(&mut self, request: &Request) -> ControlResult<Response> {
        let frame = encode_frame(request)?;
        self.writer
            .write_all(&frame)
            .and_then(|_| self.writer.flush())
            .map_err(|e| ControlError::connection(&self.peer, e))?;
        let line = self.read_frame()?;
        decode_frame(&line)
    }

    fn close(&mut self) -> ControlResult<()> {
        match self.writer.shutdown(Shutdown::Both) {
            Ok(()) => Ok(()),
            // Peer already gone: nothing left to release.
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(e) => Err(ControlError::connection(&self.peer, e)),
        }
    }

    fn peer(&self) -> String {
        self.peer.clone()
    }
}

/// Open a TCP transport to (or from) the engine.
///
/// - `Client`: dial `host:port`, giving up after `connect_timeout` per address.
/// - `Server`: bind `host:port` and block until the engine connects once.
pub fn connect(
    host: &str,
    port: u16,
    mode: ConnectionMode,
    connect_timeout: Duration,
    read_timeout: Option<Duration>,
) -> ControlResult<StateChannel<TcpTransport>> {
    let addr = format!("{host}:{port}");
    let stream = match mode {
        ConnectionMode::Client => dial(&addr, connect_timeout)?,
        ConnectionMode::Server => {
            let listener =
                TcpListener::bind(&addr).map_err(|e| ControlError::connection(&addr, e))?;
            log::info!("Waiting for engine to connect on {addr}");
            let (stream, remote) = listener
                .accept()
                .map_err(|e| ControlError::connection(&addr, e))?;
            log::info!("Engine connected from {remote}");
            stream
        }
    };
    Ok(StateChannel::new(TcpTransport::new(stream, read_timeout)?))
}

fn dial(addr: &str, timeout: Duration) -> ControlResult<TcpStream> {
    let candidates = addr
        .to_socket_addrs()
        .map_err(|e| ControlError::connection(addr, e))?;
    let mut last_err =
        io::Error::new(io::ErrorKind::AddrNotAvailable, "host resolved to no addresses");
    for candidate in candidates {
        match TcpStream::connect_timeout(&candidate, timeout) {
            Ok(stream) => {
                log::info!("Connected to engine at {candidate}");
                return Ok(stream);
            }
            Err(e) => {
                log::debug!("connect to {candidate} failed: {e}");
                last_err = e;
            }
        }
    }
    Err(ControlError::connection(addr, last_err))
}

// ── Channel ──────────────────────────────────────────────────────────────────

pub struct StateChannel<T: Transport> {
    transport:     Option<T>,
    requests_sent: u64,
}

impl<T: Transport> StateChannel<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport:     Some(transport),
            requests_sent: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.transport.is_some()
    }

    pub fn requests_sent(&self) -> u64 {
        self.requests_sent
    }

    /// Send one request, block for its response.
    /// An `error` response becomes `ControlError::Rejected`.
    pub fn send_request(&mut self, request: Request) -> ControlResult<Response> {
        let transport = self.transport.as_mut().ok_or(ControlError::ChannelClosed)?;
        self.requests_sent += 1;
        log::trace!("-> {} ({})", request.kind(), transport.peer());
        match transport.exchange(&request)? {
            Response::Error { message } => Err(ControlError::Rejected { message }),
            response => {
                log::trace!("<- {}", response.kind());
                Ok(response)
            }
        }
    }

    /// Send a request whose only valid answer is `ack`.
    pub fn send_expect_ack(&mut self, request: Request) -> ControlResult<()> {
        let kind = request.kind();
        match self.send_request(request)? {
            Response::Ack => Ok(()),
            other => Err(ControlError::protocol(
                format!("ack for {kind}"),
                other.kind(),
            )),
        }
    }

    /// Idempotent. Safe to call on an already-closed channel.
    pub fn close(&mut self) -> ControlResult<()> {
        match self.transport.take() {
            Some(mut transport) => {
                log::debug!("Closing channel to {}", transport.peer());
                transport.close()
            }
            None => Ok(()),
        }
    }
}

impl<T: Transport> Drop for StateChannel<T> {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::debug!("close on drop failed: {e}");
        }
    }
}
