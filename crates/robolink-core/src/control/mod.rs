//! Driving control
//!
//! Turns operator input and vision measurements into wheel speed commands:
//! - PID steering for the vision-guided modes (line following, face pursuit)
//! - Joystick, tilt and voice mixing for manual driving

mod drive;
mod pid;

pub use drive::{
    differential, joystick, tilt, touch_axes, LostTarget, PidDrive, TiltControl, VisionSample,
    VoiceDrive, WheelSpeeds,
};
pub use pid::PidController;

/// Largest wheel speed magnitude accepted by the robot
pub const SPEED_LIMIT: i32 = 100;

/// Default cruising speed of the PID driving modes
pub const DEFAULT_MAX_SPEED: i32 = 50;

/// Ignore accelerometer changes smaller than this (m/s²)
pub const TILT_JITTER_MARGIN: f32 = 0.1;

/// Accelerometer readings are clamped to this magnitude (m/s²)
pub const TILT_LIMIT: f32 = 5.0;

/// Starting speed for voice driving
pub const VOICE_DEFAULT_SPEED: i32 = 20;

/// Voice speed changes in steps of this size
pub const VOICE_SPEED_STEP: i32 = 10;
