//! Robot Link Communication
//!
//! Manages the duplex serial link to the robot controller.
//!
//! The link is an always-open byte stream carrying newline-terminated ASCII
//! commands. A [`LinkSession`] owns the transport, frames incoming bytes,
//! arbitrates writers and keeps the link alive with an idle filler.

pub mod codec;
pub mod command;
mod error;
pub mod rfcomm;
pub mod serial;
mod session;
pub mod sink;
pub mod transport;
pub mod watchdog;

pub use codec::{encode, FrameDecoder, LineCodec};
pub use command::{bypasses_busy_gate, CommandError, DriveCommand, Keyframe, KeyframeSet};
pub use error::LinkError;
pub use rfcomm::{RfcommConnector, RfcommTarget};
pub use serial::{default_connector, list_ports, PortInfo, SerialConnector};
pub use session::{LinkConfig, LinkSession, LinkState, LinkStats};
pub use sink::{ChannelSink, EventSink, SessionEvent};
pub use transport::{FallbackConnector, LinkConnector, LinkTransport, TcpConnector};
pub use watchdog::{Watchdog, WatchdogAction, WatchdogConfig};

/// Frame terminator byte
pub const FRAME_TERMINATOR: u8 = b'\n';

/// Reply payload the controller sends as an idle filler
pub const FILLER_FRAME: &str = "0";

/// Reserved reset command, always bypasses the busy gate
pub const RESET_COMMAND: &str = "r";

/// Default baud rate for the robot controller
pub const DEFAULT_BAUD_RATE: u32 = 115200;

/// Default idle time before a keepalive filler is sent
pub const DEFAULT_MIN_COMM_INTERVAL_MS: u64 = 900;

/// Default silence after which the link is deemed dead
pub const DEFAULT_TIMEOUT_MS: u64 = 3000;

/// Default watchdog tick period
pub const DEFAULT_TICK_MS: u64 = 50;

/// Timeout multiplier applied while the connection is still being opened
pub const CONNECTING_TIMEOUT_MULTIPLIER: u32 = 4;

/// Maximum unterminated frame length kept in the decode buffer
pub const MAX_FRAME_LEN: usize = 4096;

/// RFCOMM channel dialled on the robot by the fallback connection
pub const RESERVED_RFCOMM_CHANNEL: u8 = 1;
