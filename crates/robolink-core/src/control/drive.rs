//! Wheel speed mixing for the driving modes

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::pid::PidController;
use super::{SPEED_LIMIT, TILT_JITTER_MARGIN, TILT_LIMIT, VOICE_DEFAULT_SPEED, VOICE_SPEED_STEP};
use crate::link::DriveCommand;
use crate::settings::PidSettings;

/// Left and right wheel speeds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WheelSpeeds {
    pub left: i32,
    pub right: i32,
}

impl WheelSpeeds {
    /// Build speeds clamped to `±SPEED_LIMIT`
    pub fn clamped(left: i32, right: i32) -> Self {
        Self {
            left: left.clamp(-SPEED_LIMIT, SPEED_LIMIT),
            right: right.clamp(-SPEED_LIMIT, SPEED_LIMIT),
        }
    }

    pub fn to_command(self) -> DriveCommand {
        DriveCommand::Speed {
            left: self.left,
            right: self.right,
        }
    }
}

/// Steer around a base speed: left gets `base + output`, right `base - output`.
///
/// The output is truncated toward zero before mixing and both wheels are
/// clamped to `±range`.
pub fn differential(base: i32, output: f32, range: i32) -> WheelSpeeds {
    let range = range.abs();
    let out = output as i32;
    WheelSpeeds {
        left: base.saturating_add(out).clamp(-range, range),
        right: base.saturating_sub(out).clamp(-range, range),
    }
}

/// Mix joystick axes (both in [-100, 100], y forward) into wheel speeds
pub fn joystick(x: i32, y: i32) -> WheelSpeeds {
    WheelSpeeds::clamped(y.saturating_add(x), y.saturating_sub(x))
}

/// Normalise a touch position on a pad of the given size to joystick axes.
///
/// The pad centre is (0, 0); right and up are positive.
pub fn touch_axes(px: f32, py: f32, width: f32, height: f32) -> (i32, i32) {
    if width <= 0.0 || height <= 0.0 {
        return (0, 0);
    }
    let x = (100.0 * (2.0 * px / width - 1.0)) as i32;
    let y = (100.0 * (1.0 - 2.0 * py / height)) as i32;
    (x, y)
}

/// Round half up, like the accelerometer mixing always did
fn round_half_up(v: f32) -> i32 {
    (v + 0.5).floor() as i32
}

/// Tilt of one axis as a speed contribution in steps of 5
fn tilt_axis(v: f32) -> i32 {
    let v = v.clamp(-TILT_LIMIT, TILT_LIMIT);
    -5 * (round_half_up(100.0 * v / 5.0) / 5)
}

/// Mix accelerometer readings (m/s², clamped to ±5) into wheel speeds.
///
/// Tilting the top of the device away (negative y) drives forward.
pub fn tilt(x: f32, y: f32) -> WheelSpeeds {
    let tx = tilt_axis(x);
    let ty = tilt_axis(y);
    WheelSpeeds::clamped(ty + tx, ty - tx)
}

/// Accelerometer driving with jitter suppression
#[derive(Debug, Clone)]
pub struct TiltControl {
    last_x: f32,
    last_y: f32,
    jitter_margin: f32,
}

impl Default for TiltControl {
    fn default() -> Self {
        Self::new(TILT_JITTER_MARGIN)
    }
}

impl TiltControl {
    pub fn new(jitter_margin: f32) -> Self {
        Self {
            last_x: 0.0,
            last_y: 0.0,
            jitter_margin,
        }
    }

    pub fn reset(&mut self) {
        self.last_x = 0.0;
        self.last_y = 0.0;
    }

    /// Feed a reading. Returns new wheel speeds, or `None` if neither axis
    /// moved by more than the jitter margin.
    pub fn update(&mut self, x: f32, y: f32) -> Option<WheelSpeeds> {
        let mut changed = false;
        if (self.last_x - x).abs() > self.jitter_margin {
            self.last_x = x.clamp(-TILT_LIMIT, TILT_LIMIT);
            changed = true;
        }
        if (self.last_y - y).abs() > self.jitter_margin {
            self.last_y = y.clamp(-TILT_LIMIT, TILT_LIMIT);
            changed = true;
        }
        changed.then(|| tilt(self.last_x, self.last_y))
    }
}

/// One measurement from the image processing stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VisionSample {
    /// Signed distance of the target from the image centre, [-100, 100]
    pub error: i32,
    /// Whether a target was detected at all
    pub found: bool,
}

impl VisionSample {
    pub fn found(error: i32) -> Self {
        Self {
            error: error.clamp(-SPEED_LIMIT, SPEED_LIMIT),
            found: true,
        }
    }

    pub fn lost() -> Self {
        Self {
            error: 0,
            found: false,
        }
    }

    /// Sample for a target at pixel column `x` of an image `width` wide
    pub fn from_horizontal_position(x: f32, width: f32) -> Self {
        if width <= 0.0 {
            return Self::lost();
        }
        Self::found((100.0 * (2.0 * x / width - 1.0)) as i32)
    }
}

/// What a PID mode sends when the target disappears
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LostTarget {
    /// Stop both wheels on every lost sample (line following)
    Stop,
    /// Send one reset, then stay silent until the target is back (face pursuit)
    Reset,
}

/// A vision-guided driving mode steered by a PID controller
#[derive(Debug, Clone)]
pub struct PidDrive {
    pid: PidController,
    max_speed: i32,
    lost: LostTarget,
    searching: bool,
}

impl PidDrive {
    pub fn new(settings: &PidSettings, lost: LostTarget) -> Self {
        Self {
            pid: PidController::from_settings(settings),
            max_speed: settings.max_speed,
            lost,
            searching: false,
        }
    }

    /// Apply changed settings without resetting the controller
    pub fn apply_settings(&mut self, settings: &PidSettings) {
        self.pid.set_gains(settings.kp, settings.ki, settings.kd);
        self.max_speed = settings.max_speed;
    }

    pub fn max_speed(&self) -> i32 {
        self.max_speed
    }

    pub fn is_searching(&self) -> bool {
        self.searching
    }

    /// Start (or restart) the mode with a clean controller
    pub fn activate(&mut self) {
        self.pid.reset();
        self.searching = false;
    }

    /// Command that halts the robot when the mode is switched off
    pub fn deactivate(&mut self) -> DriveCommand {
        self.searching = false;
        DriveCommand::stop()
    }

    /// Turn a vision sample into the next command, if any
    pub fn on_sample(&mut self, sample: VisionSample) -> Option<DriveCommand> {
        if sample.found {
            self.searching = false;
            let output = self.pid.update(sample.error as f32);
            let speeds = differential(self.max_speed, output, SPEED_LIMIT);
            return Some(speeds.to_command());
        }

        match self.lost {
            LostTarget::Stop => Some(DriveCommand::stop()),
            LostTarget::Reset if self.searching => None,
            LostTarget::Reset => {
                debug!("Target lost, searching");
                self.searching = true;
                Some(DriveCommand::Reset)
            }
        }
    }
}

/// Spoken command driving
#[derive(Debug, Clone)]
pub struct VoiceDrive {
    speed: i32,
}

impl Default for VoiceDrive {
    fn default() -> Self {
        Self {
            speed: VOICE_DEFAULT_SPEED,
        }
    }
}

impl VoiceDrive {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current speed, in [10, 100]
    pub fn speed(&self) -> i32 {
        self.speed
    }

    /// Handle one recognised word. Speed changes produce no command.
    pub fn handle(&mut self, word: &str) -> Option<DriveCommand> {
        let s = self.speed;
        let speeds = match word.trim().to_ascii_lowercase().as_str() {
            "go" => (s, s),
            "left" => (-s, s),
            "right" => (s, -s),
            "back" => (-s, -s),
            "stop" => (0, 0),
            "fast" => {
                if self.speed <= SPEED_LIMIT - VOICE_SPEED_STEP {
                    self.speed += VOICE_SPEED_STEP;
                }
                return None;
            }
            "slow" => {
                if self.speed > VOICE_SPEED_STEP {
                    self.speed -= VOICE_SPEED_STEP;
                }
                return None;
            }
            _ => return None,
        };
        Some(DriveCommand::Speed {
            left: speeds.0,
            right: speeds.1,
        })
    }
}
