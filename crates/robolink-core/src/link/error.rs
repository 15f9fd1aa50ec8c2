//! Link errors

use thiserror::Error;

/// Errors that can occur on the robot link
#[derive(Error, Debug)]
pub enum LinkError {
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    #[error("Read failed: {0}")]
    Read(String),

    #[error("Write failed: {0}")]
    Write(String),

    #[error("Link closed")]
    Closed,

    #[error("Connection timed out")]
    Timeout,

    #[error("Not connected")]
    NotConnected,

    #[error("Robot busy, previous command not acknowledged")]
    Busy,

    #[error("Serial port error: {0}")]
    Serial(String),

    #[error("Invalid link configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serialport::Error> for LinkError {
    fn from(e: serialport::Error) -> Self {
        LinkError::Serial(e.to_string())
    }
}
