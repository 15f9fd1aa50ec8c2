//! Link transports
//!
//! A transport is an open duplex byte stream to the robot. Reads and writes
//! proceed independently so the read loop never blocks a writer.

use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::LinkError;

/// An open connection to the robot
pub trait LinkTransport: Send + Sync {
    /// Block until data arrives. `Ok(0)` means the remote end closed.
    fn read_chunk(&self, buf: &mut [u8]) -> Result<usize, LinkError>;

    /// Write all bytes to the link
    fn write_bytes(&self, bytes: &[u8]) -> Result<(), LinkError>;

    /// Release the connection. Idempotent, callable from any thread, and
    /// unblocks a pending `read_chunk`.
    fn close(&self);

    /// Endpoint description for logs
    fn describe(&self) -> String;
}

/// Strategy for opening a transport to a device
pub trait LinkConnector: Send + Sync {
    /// Open a connection. May block for a long time.
    fn open(&self, device_id: &str) -> Result<Box<dyn LinkTransport>, LinkError>;

    /// Short name of the strategy for logs
    fn name(&self) -> String;
}

impl<T: LinkConnector + ?Sized> LinkConnector for Box<T> {
    fn open(&self, device_id: &str) -> Result<Box<dyn LinkTransport>, LinkError> {
        (**self).open(device_id)
    }

    fn name(&self) -> String {
        (**self).name()
    }
}

/// Tries a primary connector, then exactly one fallback
pub struct FallbackConnector {
    primary: Box<dyn LinkConnector>,
    fallback: Option<Box<dyn LinkConnector>>,
}

impl FallbackConnector {
    pub fn new(primary: Box<dyn LinkConnector>, fallback: Box<dyn LinkConnector>) -> Self {
        Self {
            primary,
            fallback: Some(fallback),
        }
    }

    /// Connector without a fallback strategy
    pub fn primary_only(primary: Box<dyn LinkConnector>) -> Self {
        Self {
            primary,
            fallback: None,
        }
    }
}

impl LinkConnector for FallbackConnector {
    fn open(&self, device_id: &str) -> Result<Box<dyn LinkTransport>, LinkError> {
        let primary_err = match self.primary.open(device_id) {
            Ok(transport) => return Ok(transport),
            Err(e) => e,
        };

        let Some(fallback) = &self.fallback else {
            return Err(LinkError::ConnectFailed(format!(
                "{}: {}",
                self.primary.name(),
                primary_err
            )));
        };

        warn!(
            "Could not connect to {} via {} ({}), trying {}",
            device_id,
            self.primary.name(),
            primary_err,
            fallback.name()
        );

        fallback.open(device_id).map_err(|fallback_err| {
            LinkError::ConnectFailed(format!(
                "{}: {}; {}: {}",
                self.primary.name(),
                primary_err,
                fallback.name(),
                fallback_err
            ))
        })
    }

    fn name(&self) -> String {
        match &self.fallback {
            Some(fallback) => format!("{} (fallback {})", self.primary.name(), fallback.name()),
            None => self.primary.name(),
        }
    }
}

/// Connects to `host:port` endpoints, e.g. a serial-over-TCP bridge or a simulator
#[derive(Debug, Clone)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for TcpConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl LinkConnector for TcpConnector {
    fn open(&self, device_id: &str) -> Result<Box<dyn LinkTransport>, LinkError> {
        let addr = device_id
            .to_socket_addrs()
            .map_err(|e| LinkError::ConnectFailed(format!("{}: {}", device_id, e)))?
            .next()
            .ok_or_else(|| LinkError::ConnectFailed(format!("{}: no address", device_id)))?;

        let stream = TcpStream::connect_timeout(&addr, self.connect_timeout)?;
        stream.set_nodelay(true)?;
        info!("TCP link open to {}", addr);
        Ok(Box::new(TcpTransport::new(stream)?))
    }

    fn name(&self) -> String {
        "tcp".to_string()
    }
}

/// TCP stream transport
pub struct TcpTransport {
    reader: Mutex<TcpStream>,
    writer: Mutex<TcpStream>,
    control: TcpStream,
    peer: String,
    closed: AtomicBool,
}

impl TcpTransport {
    pub fn new(stream: TcpStream) -> io::Result<Self> {
        let peer = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        Ok(Self {
            reader: Mutex::new(stream.try_clone()?),
            writer: Mutex::new(stream.try_clone()?),
            control: stream,
            peer,
            closed: AtomicBool::new(false),
        })
    }
}

impl LinkTransport for TcpTransport {
    fn read_chunk(&self, buf: &mut [u8]) -> Result<usize, LinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LinkError::Closed);
        }
        let mut reader = self.reader.lock().map_err(|_| LinkError::Closed)?;
        loop {
            match reader.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) if self.closed.load(Ordering::Acquire) => return Err(LinkError::Closed),
                Err(e) => return Err(LinkError::Read(e.to_string())),
            }
        }
    }

    fn write_bytes(&self, bytes: &[u8]) -> Result<(), LinkError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(LinkError::Closed);
        }
        let mut writer = self.writer.lock().map_err(|_| LinkError::Closed)?;
        writer
            .write_all(bytes)
            .and_then(|_| writer.flush())
            .map_err(|e| LinkError::Write(e.to_string()))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("Closing TCP link to {}", self.peer);
        // Shutdown wakes a reader blocked in read()
        if let Err(e) = self.control.shutdown(Shutdown::Both) {
            debug!("TCP shutdown for {}: {}", self.peer, e);
        }
    }

    fn describe(&self) -> String {
        format!("tcp://{}", self.peer)
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.close();
    }
}
