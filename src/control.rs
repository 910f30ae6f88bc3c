//! Feedback-control building blocks used by controlled actuators and by
//! motors' internal regulation loops.

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// A discrete control element: feed an input in, read the regulated output.
pub trait Controller {
    fn update(&mut self, input: f32);
    fn output(&self) -> f32;
}

/// How a [`Pid`] measures error between target and input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorMode {
    /// Plain difference.
    Linear,
    /// Difference wrapped to [-pi, pi], for angular quantities.
    Angular,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PidParams {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    pub max_out: f32,
    pub max_iout: f32,
}

/// PID regulator with integral anti-windup and output clamping.
#[derive(Debug, Clone)]
pub struct Pid {
    params: PidParams,
    mode: ErrorMode,
    target: f32,
    integral: f32,
    last_error: f32,
    out: f32,
}

impl Pid {
    pub fn new(params: PidParams, mode: ErrorMode) -> Self {
        Self {
            params,
            mode,
            target: 0.0,
            integral: 0.0,
            last_error: 0.0,
            out: 0.0,
        }
    }

    pub fn set_target(&mut self, target: f32) {
        self.target = target;
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    /// Drop accumulated state, keeping gains and target.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last_error = 0.0;
        self.out = 0.0;
    }

    fn error(&self, current: f32) -> f32 {
        let diff = self.target - current;
        match self.mode {
            ErrorMode::Linear => diff,
            ErrorMode::Angular => {
                let mut d = diff;
                while d > core::f32::consts::PI {
                    d -= 2.0 * core::f32::consts::PI;
                }
                while d < -core::f32::consts::PI {
                    d += 2.0 * core::f32::consts::PI;
                }
                d
            }
        }
    }
}

impl Controller for Pid {
    fn update(&mut self, input: f32) {
        let error = self.error(input);

        let pout = self.params.kp * error;

        self.integral += self.params.ki * error;
        self.integral = self
            .integral
            .clamp(-self.params.max_iout, self.params.max_iout);

        let dout = self.params.kd * (error - self.last_error);
        self.last_error = error;

        self.out = (pout + self.integral + dout).clamp(-self.params.max_out, self.params.max_out);
    }

    fn output(&self) -> f32 {
        self.out
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct RampParams {
    /// Maximum output change per second.
    pub rate: f32,
}

/// Slew-rate limiter: the output chases the input at a bounded rate,
/// measured against the monotonic clock.
#[derive(Debug, Clone)]
pub struct Ramp {
    rate: f32,
    out: f32,
    last_update: Instant,
}

impl Ramp {
    pub fn new(params: RampParams) -> Self {
        Self {
            rate: params.rate,
            out: 0.0,
            last_update: Instant::now(),
        }
    }

    pub fn set_rate(&mut self, rate: f32) {
        self.rate = rate;
    }

    pub fn reset_to(&mut self, value: f32) {
        self.out = value;
        self.last_update = Instant::now();
    }
}

impl Controller for Ramp {
    fn update(&mut self, input: f32) {
        let now = Instant::now();
        let dt = now.duration_since(self.last_update).as_secs_f32();
        self.last_update = now;

        let diff = input - self.out;
        let max_step = self.rate * dt;
        if diff.abs() <= max_step {
            self.out = input;
        } else {
            self.out += max_step.copysign(diff);
        }
    }

    fn output(&self) -> f32 {
        self.out
    }
}

/// Two controllers in sequence: the first stage's output feeds the second.
/// Nest `Chain`s for longer pipelines.
#[derive(Debug, Clone)]
pub struct Chain<A: Controller, B: Controller> {
    pub first: A,
    pub second: B,
}

impl<A: Controller, B: Controller> Chain<A, B> {
    pub fn new(first: A, second: B) -> Self {
        Self { first, second }
    }
}

impl<A: Controller, B: Controller> Controller for Chain<A, B> {
    fn update(&mut self, input: f32) {
        self.first.update(input);
        self.second.update(self.first.output());
    }

    fn output(&self) -> f32 {
        self.second.output()
    }
}
