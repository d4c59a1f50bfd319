//! TCP stand-in for the Bluetooth serial link
//!
//! Accepts a single peer at a time; further connections are closed straight
//! away. Sockets are non-blocking, so polling never stalls the sampling
//! loop. A write the socket only partly takes keeps its tail in a backlog
//! drained by later polls; a write arriving while the backlog is non-empty
//! is rejected whole, so the peer never sees a torn chunk.

use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

use datalogger_core::transport::{CommandTransport, LineAssembler, TransportError, TransportEvent};
use log::{debug, info, warn};

const READ_BUF_SIZE: usize = 256;

pub struct TcpLink {
    listener: TcpListener,
    peer: Option<TcpStream>,
    assembler: LineAssembler,
    last_rx: Option<Instant>,
    idle: Duration,
    backlog: Vec<u8>,
}

impl TcpLink {
    /// Listen on `addr`. Unterminated commands complete after `idle` of
    /// silence.
    pub fn bind(addr: impl ToSocketAddrs, idle: Duration) -> io::Result<Self> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;

        Ok(Self {
            listener,
            peer: None,
            assembler: LineAssembler::new(),
            last_rx: None,
            idle,
            backlog: Vec::new(),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Bytes accepted by [`CommandTransport::send_bytes`] but not yet taken
    /// by the socket.
    pub fn pending_bytes(&self) -> usize {
        self.backlog.len()
    }

    /// Accept, receive and flush idle input, returning the resulting events
    /// in the order they happened.
    pub fn poll(&mut self) -> Vec<TransportEvent> {
        let mut events = Vec::new();
        if let Err(e) = self.drain_backlog() {
            debug!("Write to peer failed: {}", e);
        }
        self.accept(&mut events);
        self.receive(&mut events);
        self.flush_idle(&mut events);
        events
    }

    fn accept(&mut self, events: &mut Vec<TransportEvent>) {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if self.peer.is_some() {
                        warn!("Refusing {}: a peer is already connected", addr);
                        continue;
                    }
                    if let Err(e) = stream.set_nonblocking(true) {
                        warn!("Cannot configure connection from {}: {}", addr, e);
                        continue;
                    }

                    info!("Peer {} connected", addr);
                    self.peer = Some(stream);
                    self.assembler = LineAssembler::new();
                    self.last_rx = None;
                    events.push(TransportEvent::PeerConnected);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    break;
                }
            }
        }
    }

    fn receive(&mut self, events: &mut Vec<TransportEvent>) {
        let Some(stream) = self.peer.as_mut() else {
            return;
        };

        let mut buf = [0u8; READ_BUF_SIZE];
        loop {
            match stream.read(&mut buf) {
                Ok(0) => break self.disconnect(events),
                Ok(n) => {
                    self.last_rx = Some(Instant::now());
                    self.assembler.feed(&buf[..n], |line| {
                        events.push(TransportEvent::CommandReceived(line))
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Read from peer failed: {}", e);
                    break self.disconnect(events);
                }
            }
        }
    }

    fn flush_idle(&mut self, events: &mut Vec<TransportEvent>) {
        let quiet = self.last_rx.is_some_and(|at| at.elapsed() >= self.idle);
        if quiet && self.assembler.has_pending() {
            if let Some(line) = self.assembler.flush() {
                debug!("Completing unterminated command after {:?}", self.idle);
                events.push(TransportEvent::CommandReceived(line));
            }
        }
    }

    fn drain_backlog(&mut self) -> io::Result<()> {
        let Some(stream) = self.peer.as_mut() else {
            return Ok(());
        };
        if self.backlog.is_empty() {
            return Ok(());
        }

        let written = write_some(stream, &self.backlog)?;
        self.backlog.drain(..written);
        Ok(())
    }

    fn disconnect(&mut self, events: &mut Vec<TransportEvent>) {
        if self.peer.take().is_some() {
            info!("Peer disconnected");
            self.assembler = LineAssembler::new();
            self.last_rx = None;
            self.backlog.clear();
            events.push(TransportEvent::PeerDisconnected);
        }
    }
}

/// Write as much of `bytes` as the socket takes without blocking.
fn write_some(stream: &mut TcpStream, bytes: &[u8]) -> io::Result<usize> {
    let mut written = 0;
    while written < bytes.len() {
        match stream.write(&bytes[written..]) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(written)
}

impl CommandTransport for TcpLink {
    fn has_peer(&self) -> bool {
        self.peer.is_some()
    }

    fn send_bytes(&mut self, bytes: &[u8]) -> Result<(), TransportError> {
        if self.peer.is_none() {
            return Err(TransportError::NoPeer);
        }

        let rejected = |e: io::Error| {
            debug!("Write to peer failed: {}", e);
            TransportError::Rejected
        };
        self.drain_backlog().map_err(rejected)?;
        if !self.backlog.is_empty() {
            debug!("Peer is not reading, {} bytes still queued", self.backlog.len());
            return Err(TransportError::Rejected);
        }

        let stream = self.peer.as_mut().ok_or(TransportError::NoPeer)?;
        let written = write_some(stream, bytes).map_err(rejected)?;
        self.backlog.extend_from_slice(&bytes[written..]);
        Ok(())
    }
}
