//! PID controller

use crate::settings::PidSettings;

/// PID controller used to steer toward a vision target.
///
/// The integral term folds the gain into the accumulator on every update
/// (`integral = (integral + error) * ki`), so `ki` acts as a decay factor as
/// well as a gain. The accumulator is not clamped; callers clamp the wheel
/// speeds derived from the output.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PidController {
    kp: f32,
    ki: f32,
    kd: f32,
    last_error: f32,
    integral: f32,
}

impl PidController {
    /// Create a controller with the given gains
    pub fn new(kp: f32, ki: f32, kd: f32) -> Self {
        Self {
            kp,
            ki,
            kd,
            last_error: 0.0,
            integral: 0.0,
        }
    }

    /// Create a controller from stored settings
    pub fn from_settings(settings: &PidSettings) -> Self {
        Self::new(settings.kp, settings.ki, settings.kd)
    }

    /// Replace the gains, keeping the accumulated state
    pub fn set_gains(&mut self, kp: f32, ki: f32, kd: f32) {
        self.kp = kp;
        self.ki = ki;
        self.kd = kd;
    }

    /// Current gains as `(kp, ki, kd)`
    pub fn gains(&self) -> (f32, f32, f32) {
        (self.kp, self.ki, self.kd)
    }

    /// Clear the error history. Call whenever a driving mode (re)starts.
    pub fn reset(&mut self) {
        self.last_error = 0.0;
        self.integral = 0.0;
    }

    /// Feed one error sample and get the control output
    pub fn update(&mut self, error: f32) -> f32 {
        let p = error * self.kp;
        self.integral = (self.integral + error) * self.ki;
        let d = (error - self.last_error) * self.kd;
        self.last_error = error;
        p + self.integral + d
    }
}
