//! Robot commands
//!
//! Defines the commands understood by the robot controller firmware.
//!
//! Wire format is ASCII with comma separated fields:
//! - `r` - reset / stop everything
//! - `s,<left>,<right>` - wheel speeds, -100..=100
//! - `k,<time>,<ch1>,...,<chN>` - keyframe for the servo channels

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::RESET_COMMAND;

/// Errors raised while parsing structured command payloads
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CommandError {
    #[error("Empty command")]
    Empty,

    #[error("Invalid command format: {0}")]
    InvalidFormat(String),

    #[error("Invalid number in field '{field}': '{value}'")]
    InvalidNumber { field: String, value: String },

    #[error("Missing field: {0}")]
    MissingField(&'static str),
}

fn parse_field(field: &str, value: &str) -> Result<i32, CommandError> {
    value
        .trim()
        .parse::<i32>()
        .map_err(|_| CommandError::InvalidNumber {
            field: field.to_string(),
            value: value.to_string(),
        })
}

/// A command sent to the robot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DriveCommand {
    /// Stop motors and reset controller state ('r')
    Reset,

    /// Set wheel speeds ('s')
    Speed { left: i32, right: i32 },

    /// Servo keyframe ('k')
    Keyframe(Keyframe),

    /// Any other text, passed through untouched
    Raw(String),
}

impl DriveCommand {
    /// Speed command that stops both wheels
    pub fn stop() -> Self {
        DriveCommand::Speed { left: 0, right: 0 }
    }
}

/// Whether command text skips the wait for the previous reply.
///
/// Only the reset command does, so the robot can always be stopped.
pub fn bypasses_busy_gate(command: &str) -> bool {
    command == RESET_COMMAND
}

impl fmt::Display for DriveCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriveCommand::Reset => f.write_str(RESET_COMMAND),
            DriveCommand::Speed { left, right } => write!(f, "s,{},{}", left, right),
            DriveCommand::Keyframe(frame) => {
                write!(f, "k,{}", frame.time)?;
                for value in &frame.channels {
                    write!(f, ",{}", value)?;
                }
                Ok(())
            }
            DriveCommand::Raw(text) => f.write_str(text),
        }
    }
}

impl FromStr for DriveCommand {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim_end_matches(['\r', '\n']);
        if s.is_empty() {
            return Err(CommandError::Empty);
        }
        if s == RESET_COMMAND {
            return Ok(DriveCommand::Reset);
        }

        let mut fields = s.split(',');
        match fields.next() {
            Some("s") => {
                let left = fields.next().ok_or(CommandError::MissingField("left"))?;
                let right = fields.next().ok_or(CommandError::MissingField("right"))?;
                if fields.next().is_some() {
                    return Err(CommandError::InvalidFormat(s.to_string()));
                }
                Ok(DriveCommand::Speed {
                    left: parse_field("left", left)?,
                    right: parse_field("right", right)?,
                })
            }
            Some("k") => {
                let time = fields.next().ok_or(CommandError::MissingField("time"))?;
                let time = parse_field("time", time)?;
                let channels = fields
                    .enumerate()
                    .map(|(i, v)| parse_field(&format!("ch{}", i + 1), v))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(DriveCommand::Keyframe(Keyframe { time, channels }))
            }
            _ => Ok(DriveCommand::Raw(s.to_string())),
        }
    }
}

/// A servo keyframe: playback delay plus one value per channel
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyframe {
    /// Interpolation time in milliseconds
    pub time: i32,
    /// Channel values
    pub channels: Vec<i32>,
}

impl Keyframe {
    pub fn new(time: i32, channels: Vec<i32>) -> Self {
        Self { time, channels }
    }

    /// Parse a stored keyframe line (`time,ch1,ch2,...`).
    ///
    /// Only digits and commas are accepted. Missing or empty channel
    /// fields become 0 and fields beyond `num_channels` are ignored.
    pub fn parse_line(line: &str, num_channels: usize) -> Result<Self, CommandError> {
        if line.is_empty() {
            return Err(CommandError::Empty);
        }
        if !line.bytes().all(|b| b.is_ascii_digit() || b == b',') {
            return Err(CommandError::InvalidFormat(line.to_string()));
        }

        let fields: Vec<&str> = line.split(',').collect();
        let time = parse_field("time", fields[0])?;

        let mut channels = vec![0; num_channels];
        for (i, slot) in channels.iter_mut().enumerate() {
            match fields.get(i + 1) {
                Some(v) if !v.is_empty() => *slot = parse_field(&format!("ch{}", i + 1), v)?,
                _ => {}
            }
        }

        Ok(Self { time, channels })
    }

    /// Stored line form (`time,ch1,...`)
    pub fn to_line(&self) -> String {
        std::iter::once(self.time)
            .chain(self.channels.iter().copied())
            .map(|v| v.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }

    /// Command sending this keyframe with the given playback delay
    pub fn to_command(&self, delay_ms: i32) -> DriveCommand {
        DriveCommand::Keyframe(Keyframe {
            time: delay_ms,
            channels: self.channels.clone(),
        })
    }
}

/// An ordered list of keyframes, as saved in a keyframe file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyframeSet {
    /// Number of servo channels per frame
    pub num_channels: usize,
    /// Frames in playback order
    pub frames: Vec<Keyframe>,
}

impl KeyframeSet {
    pub fn new(num_channels: usize) -> Self {
        Self {
            num_channels,
            frames: Vec::new(),
        }
    }

    /// Parse a keyframe file. Reading stops at the first empty line.
    pub fn parse(text: &str, num_channels: usize) -> Result<Self, CommandError> {
        let frames = text
            .lines()
            .map(|l| l.trim_end_matches('\r'))
            .take_while(|l| !l.is_empty())
            .map(|l| Keyframe::parse_line(l, num_channels))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            num_channels,
            frames,
        })
    }

    /// Serialize to the file format, one frame per line
    pub fn to_text(&self) -> String {
        let mut out = String::new();
        for frame in &self.frames {
            out.push_str(&frame.to_line());
            out.push('\n');
        }
        out
    }

    /// Commands for playing back every frame with its own stored time
    pub fn commands(&self) -> Vec<DriveCommand> {
        self.frames.iter().map(|f| f.to_command(f.time)).collect()
    }
}
