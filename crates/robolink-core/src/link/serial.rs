//! Serial port handling
//!
//! Provides serial port access for the robot link. Bluetooth SPP devices show
//! up as serial nodes once bound (`/dev/rfcomm*` on Linux, `COMx` on Windows).

use serialport::{SerialPort, SerialPortInfo, SerialPortType};
use std::collections::HashMap;
#[cfg(target_os = "linux")]
use std::fs;
use std::io::{self, Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use tracing::{debug, info};

use super::rfcomm::RfcommConnector;
use super::transport::{FallbackConnector, LinkConnector, LinkTransport};
use super::{LinkError, DEFAULT_BAUD_RATE, RESERVED_RFCOMM_CHANNEL};

/// Read poll interval, bounds how long `close()` takes to release a reader
const READ_POLL: Duration = Duration::from_millis(100);

/// Information about an available serial port
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortInfo {
    /// Port name (e.g., "/dev/rfcomm0" or "COM3")
    pub name: String,

    /// USB vendor ID (if USB device)
    pub vid: Option<u16>,

    /// USB product ID (if USB device)
    pub pid: Option<u16>,

    /// Manufacturer name (if available)
    pub manufacturer: Option<String>,

    /// Product name (if available)
    pub product: Option<String>,

    /// Whether the port is a Bluetooth serial link
    pub bluetooth: bool,
}

impl PortInfo {
    fn bare(name: String) -> Self {
        let bluetooth = is_bluetooth_name(&name);
        Self {
            name,
            vid: None,
            pid: None,
            manufacturer: None,
            product: None,
            bluetooth,
        }
    }
}

impl From<SerialPortInfo> for PortInfo {
    fn from(info: SerialPortInfo) -> Self {
        let mut port = PortInfo::bare(info.port_name);
        match info.port_type {
            SerialPortType::UsbPort(usb_info) => {
                port.vid = Some(usb_info.vid);
                port.pid = Some(usb_info.pid);
                port.manufacturer = usb_info.manufacturer;
                port.product = usb_info.product;
            }
            SerialPortType::BluetoothPort => port.bluetooth = true,
            _ => {}
        }
        port
    }
}

fn is_bluetooth_name(name: &str) -> bool {
    let basename = name.rsplit('/').next().unwrap_or(name);
    basename.starts_with("rfcomm") || basename.contains("Bluetooth")
}

/// Sort key so that Bluetooth nodes come first, each group in numeric order
fn port_sort_key(name: &str) -> (u8, usize, String) {
    let basename = name.rsplit('/').next().unwrap_or(name);
    for (rank, prefix) in [(0u8, "rfcomm"), (1, "ttyACM"), (2, "ttyUSB")] {
        if let Some(rest) = basename.strip_prefix(prefix) {
            let num = rest.parse::<usize>().unwrap_or(usize::MAX);
            return (rank, num, basename.to_string());
        }
    }
    (3, 0, basename.to_string())
}

/// List serial ports a robot might be reachable on, Bluetooth links first
pub fn list_ports() -> Vec<PortInfo> {
    let mut map: HashMap<String, PortInfo> = HashMap::new();
    for info in serialport::available_ports().unwrap_or_default() {
        let p = PortInfo::from(info);
        map.entry(p.name.clone()).or_insert(p);
    }

    // Bound rfcomm nodes are not always reported by the enumeration API
    #[cfg(target_os = "linux")]
    if let Ok(entries) = fs::read_dir("/dev") {
        for entry in entries.flatten() {
            if let Some(fname) = entry.file_name().to_str() {
                if fname.starts_with("rfcomm") {
                    let full = format!("/dev/{}", fname);
                    map.entry(full.clone())
                        .or_insert_with(|| PortInfo::bare(full));
                }
            }
        }
    }

    let mut v: Vec<PortInfo> = map.into_values().collect();
    v.sort_by_key(|p| port_sort_key(&p.name));
    v
}

/// Open a serial port configured 8N1 without flow control
pub fn open_port(name: &str, baud_rate: u32) -> Result<Box<dyn SerialPort>, LinkError> {
    let mut port = serialport::new(name, baud_rate)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(READ_POLL)
        .open()?;

    // Keep DTR asserted, toggling it resets Arduino-style boards
    if let Err(e) = port.write_data_terminal_ready(true) {
        debug!("open_port: failed to set DTR on {}: {} (continuing)", name, e);
    }
    port.clear(serialport::ClearBuffer::All)?;
    Ok(port)
}

/// Opens the device id as a serial port path
#[derive(Debug, Clone)]
pub struct SerialConnector {
    baud_rate: u32,
}

impl SerialConnector {
    pub fn new(baud_rate: u32) -> Self {
        Self { baud_rate }
    }
}

impl Default for SerialConnector {
    fn default() -> Self {
        Self::new(DEFAULT_BAUD_RATE)
    }
}

impl LinkConnector for SerialConnector {
    fn open(&self, device_id: &str) -> Result<Box<dyn LinkTransport>, LinkError> {
        info!("Opening serial link {} at {} baud", device_id, self.baud_rate);
        let port = open_port(device_id, self.baud_rate)?;
        Ok(Box::new(SerialTransport::new(port, device_id)?))
    }

    fn name(&self) -> String {
        "serial".to_string()
    }
}

/// Standard connector: the device as a serial port, then the same device on
/// the reserved RFCOMM channel
pub fn default_connector(baud_rate: u32) -> FallbackConnector {
    FallbackConnector::new(
        Box::new(SerialConnector::new(baud_rate)),
        Box::new(RfcommConnector::new(RESERVED_RFCOMM_CHANNEL)),
    )
}

/// Serial port transport with independent read and write handles
pub struct SerialTransport {
    reader: Mutex<Option<Box<dyn SerialPort>>>,
    writer: Mutex<Option<Box<dyn SerialPort>>>,
    name: String,
    closed: AtomicBool,
}

impl SerialTransport {
    pub fn new(port: Box<dyn SerialPort>, name: &str) -> Result<Self, LinkError> {
        let writer = port.try_clone()?;
        Ok(Self {
            reader: Mutex::new(Some(port)),
            writer: Mutex::new(Some(writer)),
            name: name.to_string(),
            closed: AtomicBool::new(false),
        })
    }
}

impl LinkTransport for SerialTransport {
    fn read_chunk(&self, buf: &mut [u8]) -> Result<usize, LinkError> {
        let mut guard = self.reader.lock().map_err(|_| LinkError::Closed)?;
        loop {
            if self.closed.load(Ordering::Acquire) {
                guard.take();
                return Err(LinkError::Closed);
            }
            let port = guard.as_mut().ok_or(LinkError::Closed)?;
            match port.read(buf) {
                Ok(n) => return Ok(n),
                Err(ref e)
                    if e.kind() == io::ErrorKind::TimedOut
                        || e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::Interrupted =>
                {
                    // Nothing yet, poll again
                }
                Err(e) => return Err(LinkError::Read(e.to_string())),
            }
        }
    }

    fn write_bytes(&self, bytes: &[u8]) -> Result<(), LinkError> {
        let mut guard = self.writer.lock().map_err(|_| LinkError::Closed)?;
        let port = guard.as_mut().ok_or(LinkError::Closed)?;
        port.write_all(bytes)
            .and_then(|_| port.flush())
            .map_err(|e| LinkError::Write(e.to_string()))
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        debug!("Closing serial link {}", self.name);
        if let Ok(mut writer) = self.writer.lock() {
            writer.take();
        }
        // A reader blocked in read_chunk drops its handle on the next poll
        if let Ok(mut reader) = self.reader.try_lock() {
            reader.take();
        }
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}

impl Drop for SerialTransport {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports() {
        // This test just ensures the function doesn't panic
        let ports = list_ports();
        for port in &ports {
            println!("Found port: {} - {:?}", port.name, port.product);
        }
    }

    #[test]
    fn test_port_sorting() {
        let names = vec![
            "/dev/ttyUSB1",
            "/dev/ttyACM0",
            "/dev/rfcomm1",
            "/dev/someport",
            "/dev/rfcomm0",
            "/dev/ttyUSB0",
        ];
        let mut ports: Vec<PortInfo> = names
            .into_iter()
            .map(|n| PortInfo::bare(n.to_string()))
            .collect();

        ports.sort_by_key(|p| port_sort_key(&p.name));
        let ordered: Vec<String> = ports.iter().map(|p| p.name.clone()).collect();

        assert_eq!(
            ordered,
            vec![
                "/dev/rfcomm0",
                "/dev/rfcomm1",
                "/dev/ttyACM0",
                "/dev/ttyUSB0",
                "/dev/ttyUSB1",
                "/dev/someport",
            ]
        );
        assert!(ports[0].bluetooth);
        assert!(!ports[2].bluetooth);
    }

    #[test]
    fn test_default_connector_names() {
        assert_eq!(SerialConnector::default().name(), "serial");
        assert_eq!(
            default_connector(DEFAULT_BAUD_RATE).name(),
            "serial (fallback rfcomm channel 1)"
        );
    }

    #[test]
    fn test_fallback_stays_on_requested_device() {
        let connector = default_connector(DEFAULT_BAUD_RATE);
        for device in ["/dev/robolink-missing5", "/dev/robolink-missing-usb"] {
            let message = connector.open(device).err().expect("open must fail").to_string();
            assert!(message.contains("rfcomm channel 1"), "{}", message);
            assert!(
                message.contains(&format!("{} is not a Bluetooth address", device)),
                "{}",
                message
            );
            assert!(!message.contains("/dev/rfcomm1"), "{}", message);
        }
    }

    #[cfg(not(all(target_os = "linux", feature = "bluetooth")))]
    #[test]
    fn test_fallback_dials_requested_address() {
        let message = default_connector(DEFAULT_BAUD_RATE)
            .open("00:11:22:33:44:55")
            .err()
            .expect("open must fail")
            .to_string();
        assert!(message.contains("00:11:22:33:44:55 channel 1"), "{}", message);
    }
}
