//! Bluetooth RFCOMM fallback
//!
//! When a robot's serial profile cannot be reached, the same remote device is
//! dialled again directly on a fixed RFCOMM channel. The device id must then
//! be the robot's Bluetooth address (`00:11:22:33:44:55`). A bound node such
//! as `/dev/rfcomm0` does not say which device it belongs to, so it has no
//! fallback.
//!
//! Sockets are opened through BlueZ with the `bluetooth` feature on Linux.

use std::fmt;

use tracing::info;

use super::transport::{LinkConnector, LinkTransport};
use super::{LinkError, RESERVED_RFCOMM_CHANNEL};

/// Parse a colon separated Bluetooth device address
pub fn parse_bt_address(s: &str) -> Option<[u8; 6]> {
    let mut address = [0u8; 6];
    let mut parts = s.split(':');
    for byte in address.iter_mut() {
        let part = parts.next()?;
        if part.len() != 2 {
            return None;
        }
        *byte = u8::from_str_radix(part, 16).ok()?;
    }
    if parts.next().is_some() {
        return None;
    }
    Some(address)
}

/// Remote device and channel an [`RfcommConnector`] dials
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RfcommTarget {
    pub address: [u8; 6],
    pub channel: u8,
}

impl fmt::Display for RfcommTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.address;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X} channel {}",
            a, b, c, d, e, g, self.channel
        )
    }
}

/// Connects to the requested device on a fixed RFCOMM channel
#[derive(Debug, Clone)]
pub struct RfcommConnector {
    channel: u8,
}

impl RfcommConnector {
    pub fn new(channel: u8) -> Self {
        Self { channel }
    }

    /// Where a connection to `device_id` goes
    pub fn target(&self, device_id: &str) -> Result<RfcommTarget, LinkError> {
        let address = parse_bt_address(device_id.trim()).ok_or_else(|| {
            LinkError::ConnectFailed(format!(
                "{} is not a Bluetooth address, no RFCOMM fallback",
                device_id
            ))
        })?;
        Ok(RfcommTarget {
            address,
            channel: self.channel,
        })
    }
}

impl Default for RfcommConnector {
    fn default() -> Self {
        Self::new(RESERVED_RFCOMM_CHANNEL)
    }
}

impl LinkConnector for RfcommConnector {
    fn open(&self, device_id: &str) -> Result<Box<dyn LinkTransport>, LinkError> {
        let target = self.target(device_id)?;
        info!("Opening RFCOMM link to {}", target);
        socket::connect(target)
    }

    fn name(&self) -> String {
        format!("rfcomm channel {}", self.channel)
    }
}

#[cfg(not(all(target_os = "linux", feature = "bluetooth")))]
mod socket {
    use super::{LinkError, LinkTransport, RfcommTarget};

    pub(super) fn connect(target: RfcommTarget) -> Result<Box<dyn LinkTransport>, LinkError> {
        Err(LinkError::ConnectFailed(format!(
            "{}: built without Bluetooth support",
            target
        )))
    }
}

#[cfg(all(target_os = "linux", feature = "bluetooth"))]
mod socket {
    use std::io;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::mpsc::{self, RecvTimeoutError};
    use std::sync::Mutex;
    use std::time::Duration;

    use bluer::rfcomm::{SocketAddr, Stream};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::runtime::Runtime;
    use tokio::sync::mpsc as async_mpsc;
    use tokio::task::JoinHandle;
    use tracing::debug;

    use super::{LinkError, LinkTransport, RfcommTarget};

    const READ_POLL: Duration = Duration::from_millis(100);
    const CHUNK_SIZE: usize = 1024;

    type WriteRequest = (Vec<u8>, mpsc::SyncSender<io::Result<()>>);

    pub(super) fn connect(target: RfcommTarget) -> Result<Box<dyn LinkTransport>, LinkError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("link-rfcomm")
            .enable_io()
            .build()?;

        // Socket work runs on the private runtime; callers only wait on
        // std channels, so any thread may use the transport
        let addr = SocketAddr::new(bluer::Address::new(target.address), target.channel);
        let (opened_tx, opened_rx) = mpsc::sync_channel(1);
        runtime.spawn(async move {
            let _ = opened_tx.send(Stream::connect(addr).await);
        });
        let stream = opened_rx
            .recv()
            .map_err(|_| LinkError::ConnectFailed(format!("{}: connect aborted", target)))?
            .map_err(|e| LinkError::ConnectFailed(format!("{}: {}", target, e)))?;

        let (mut read_half, mut write_half) = stream.into_split();

        let (in_tx, in_rx) = mpsc::channel();
        let reader = runtime.spawn(async move {
            let mut buf = vec![0u8; CHUNK_SIZE];
            loop {
                match read_half.read(&mut buf).await {
                    Ok(n) => {
                        if in_tx.send(Ok(buf[..n].to_vec())).is_err() || n == 0 {
                            break;
                        }
                    }
                    Err(e) => {
                        let _ = in_tx.send(Err(e));
                        break;
                    }
                }
            }
        });

        let (out_tx, mut out_rx) = async_mpsc::unbounded_channel::<WriteRequest>();
        runtime.spawn(async move {
            while let Some((bytes, done)) = out_rx.recv().await {
                let result = match write_half.write_all(&bytes).await {
                    Ok(()) => write_half.flush().await,
                    Err(e) => Err(e),
                };
                let _ = done.send(result);
            }
        });

        Ok(Box::new(RfcommTransport {
            runtime: Some(runtime),
            incoming: Mutex::new(Incoming {
                rx: in_rx,
                pending: Vec::new(),
            }),
            outgoing: Mutex::new(Some(out_tx)),
            reader,
            name: target.to_string(),
            closed: AtomicBool::new(false),
        }))
    }

    struct Incoming {
        rx: mpsc::Receiver<io::Result<Vec<u8>>>,
        pending: Vec<u8>,
    }

    struct RfcommTransport {
        runtime: Option<Runtime>,
        incoming: Mutex<Incoming>,
        outgoing: Mutex<Option<async_mpsc::UnboundedSender<WriteRequest>>>,
        reader: JoinHandle<()>,
        name: String,
        closed: AtomicBool,
    }

    impl LinkTransport for RfcommTransport {
        fn read_chunk(&self, buf: &mut [u8]) -> Result<usize, LinkError> {
            let mut incoming = self.incoming.lock().map_err(|_| LinkError::Closed)?;
            loop {
                if self.closed.load(Ordering::Acquire) {
                    return Err(LinkError::Closed);
                }
                if !incoming.pending.is_empty() {
                    let n = incoming.pending.len().min(buf.len());
                    buf[..n].copy_from_slice(&incoming.pending[..n]);
                    incoming.pending.drain(..n);
                    return Ok(n);
                }
                match incoming.rx.recv_timeout(READ_POLL) {
                    Ok(Ok(data)) if data.is_empty() => return Ok(0),
                    Ok(Ok(data)) => incoming.pending = data,
                    Ok(Err(e)) => return Err(LinkError::Read(e.to_string())),
                    Err(RecvTimeoutError::Timeout) => {}
                    Err(RecvTimeoutError::Disconnected) => return Err(LinkError::Closed),
                }
            }
        }

        fn write_bytes(&self, bytes: &[u8]) -> Result<(), LinkError> {
            let (done_tx, done_rx) = mpsc::sync_channel(1);
            {
                let outgoing = self.outgoing.lock().map_err(|_| LinkError::Closed)?;
                let tx = outgoing.as_ref().ok_or(LinkError::Closed)?;
                tx.send((bytes.to_vec(), done_tx))
                    .map_err(|_| LinkError::Closed)?;
            }
            match done_rx.recv() {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(LinkError::Write(e.to_string())),
                Err(_) => Err(LinkError::Closed),
            }
        }

        fn close(&self) {
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            debug!("Closing RFCOMM link {}", self.name);
            if let Ok(mut outgoing) = self.outgoing.lock() {
                outgoing.take();
            }
            self.reader.abort();
        }

        fn describe(&self) -> String {
            format!("rfcomm {}", self.name)
        }
    }

    impl Drop for RfcommTransport {
        fn drop(&mut self) {
            self.close();
            if let Some(runtime) = self.runtime.take() {
                runtime.shutdown_background();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_bt_address() {
        assert_eq!(
            parse_bt_address("00:11:22:33:aa:FF"),
            Some([0x00, 0x11, 0x22, 0x33, 0xAA, 0xFF])
        );
        assert_eq!(parse_bt_address("/dev/rfcomm5"), None);
        assert_eq!(parse_bt_address("00:11:22:33:44"), None);
        assert_eq!(parse_bt_address("00:11:22:33:44:55:66"), None);
        assert_eq!(parse_bt_address("0:11:22:33:44:55"), None);
        assert_eq!(parse_bt_address("00:11:22:33:44:5G"), None);
    }

    #[test]
    fn test_target_is_requested_device_on_reserved_channel() {
        let connector = RfcommConnector::default();
        let target = connector.target("00:11:22:33:44:55").unwrap();
        assert_eq!(target.address, [0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        assert_eq!(target.channel, RESERVED_RFCOMM_CHANNEL);
        assert_eq!(target.to_string(), "00:11:22:33:44:55 channel 1");

        let other = connector.target("66:77:88:99:AA:BB").unwrap();
        assert_eq!(other.to_string(), "66:77:88:99:AA:BB channel 1");
    }

    #[test]
    fn test_no_fallback_for_device_paths() {
        let connector = RfcommConnector::default();
        for device in ["/dev/rfcomm5", "/dev/ttyUSB0", "COM3"] {
            let err = connector.open(device).err().expect("open must fail");
            let message = err.to_string();
            assert!(message.contains(device), "{}", message);
            assert!(message.contains("not a Bluetooth address"), "{}", message);
        }
        assert_eq!(connector.name(), "rfcomm channel 1");
    }

    #[cfg(not(all(target_os = "linux", feature = "bluetooth")))]
    #[test]
    fn test_address_without_bluetooth_support() {
        let err = RfcommConnector::default()
            .open("00:11:22:33:44:55")
            .err()
            .expect("open must fail");
        assert!(err
            .to_string()
            .contains("00:11:22:33:44:55 channel 1: built without Bluetooth support"));
    }
}
