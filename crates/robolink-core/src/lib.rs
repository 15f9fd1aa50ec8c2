//! # Robolink Core Library
//!
//! Core functionality for driving a small robot over a serial or Bluetooth
//! SPP link.

#![cfg_attr(docsrs, feature(doc_cfg))]

//!
//! This library provides:
//! - A long-lived link session with connection fallback, framing,
//!   keepalive/timeout supervision and single-listener event delivery
//! - The robot's line protocol (speed, reset and keyframe commands)
//! - PID steering for the vision-guided driving modes
//! - Joystick, tilt and voice mixing for manual driving
//! - Persisted per-mode PID settings
//!
//! ## Example
//!
//! ```rust,ignore
//! use robolink_core::prelude::*;
//!
//! let session = LinkSession::new(default_connector(115200), LinkConfig::default())?;
//! let (sink, mut events) = ChannelSink::new();
//! session.set_sink(&sink);
//! session.connect("/dev/rfcomm0")?;
//!
//! while let Some(event) = events.recv().await {
//!     if event == SessionEvent::Connected {
//!         session.write_command(&DriveCommand::Speed { left: 30, right: 30 });
//!     }
//! }
//! ```

pub mod control;
pub mod link;
pub mod settings;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::control::{
        differential, joystick, tilt, LostTarget, PidController, PidDrive, TiltControl,
        VisionSample, VoiceDrive, WheelSpeeds,
    };
    pub use crate::link::{
        default_connector, encode, list_ports, ChannelSink, DriveCommand, EventSink,
        FallbackConnector, FrameDecoder, Keyframe, KeyframeSet, LinkConfig, LinkConnector,
        LinkError, LinkSession, LinkState, LinkTransport, SerialConnector, SessionEvent,
        TcpConnector, WatchdogConfig,
    };
    pub use crate::settings::{PidSettings, SettingsError, SettingsStore};
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
