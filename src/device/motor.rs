//! DJI-style bus motors: feedback decoding, unit conversion, and the
//! per-motor speed regulator feeding the bus command batcher.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use static_assertions::const_assert_eq;

use crate::codec::{read_i16_be, read_u16_be, write_i16_be, write_u16_be, Wire};
use crate::context::Ctx;
use crate::control::{Controller, ErrorMode, Pid, PidParams};
use crate::device::group::BusGroupInfo;
use crate::device::{Device, Heartbeat};
use crate::error::CoreError;
use crate::io::can::CanBus;
use crate::registry::{InitInfo, Keyed};

/// Rotor angle comes off the wire as a 13-bit tick count per revolution.
const ANGLE_SCALE: f32 = core::f32::consts::TAU / 8192.0;
/// Speed comes off the wire in rpm.
const RPM_SCALE: f32 = core::f32::consts::TAU / 60.0;

/// The supported motor models. Each model pins its id range, feedback
/// arbitration id, command bucket layout, and gearbox reduction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotorKind {
    M2006,
    M3508,
    M6020,
}

impl MotorKind {
    /// Gearbox reduction from rotor to output shaft.
    pub fn reduction(&self) -> f32 {
        match self {
            MotorKind::M2006 => 1.0 / 36.0,
            MotorKind::M3508 => 1.0 / 19.0,
            MotorKind::M6020 => 1.0,
        }
    }

    pub fn valid_id(&self, id: u8) -> bool {
        match self {
            MotorKind::M2006 | MotorKind::M3508 => (1..=8).contains(&id),
            MotorKind::M6020 => (1..=7).contains(&id),
        }
    }

    /// Arbitration id the motor reports feedback on.
    pub fn feedback_id(&self, id: u8) -> u32 {
        match self {
            MotorKind::M2006 | MotorKind::M3508 => 0x200 + id as u32,
            MotorKind::M6020 => 0x204 + id as u32,
        }
    }

    /// Command frame this motor's current is batched into.
    pub fn bucket(&self, id: u8) -> u16 {
        match self {
            MotorKind::M2006 | MotorKind::M3508 => {
                if id <= 4 {
                    0x200
                } else {
                    0x1FF
                }
            }
            MotorKind::M6020 => {
                if id <= 4 {
                    0x1FF
                } else {
                    0x2FF
                }
            }
        }
    }

    /// Two-byte position inside the command frame.
    pub fn slot(&self, id: u8) -> u8 {
        (id - 1) % 4
    }
}

/// Feedback record every supported model reports, big-endian.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotorFeedback {
    /// Rotor angle in raw ticks, 0..8192.
    pub angle_raw: u16,
    /// Rotor speed in rpm, before reduction.
    pub rpm: i16,
    /// Torque current in controller units.
    pub current: i16,
    /// Winding temperature in degrees Celsius.
    pub temperature: u8,
}

impl Wire for MotorFeedback {
    const SIZE: usize = 8;

    fn encode(&self, buf: &mut [u8]) {
        write_u16_be(buf, 0, self.angle_raw);
        write_i16_be(buf, 2, self.rpm);
        write_i16_be(buf, 4, self.current);
        buf[6] = self.temperature;
        buf[7] = 0;
    }

    fn decode(buf: &[u8]) -> Self {
        Self {
            angle_raw: read_u16_be(buf, 0),
            rpm: read_i16_be(buf, 2),
            current: read_i16_be(buf, 4),
            temperature: buf[6],
        }
    }
}

const_assert_eq!(MotorFeedback::SIZE, 8);

/// A settable motor addressed through the registry by name. The anchor for
/// [`crate::device::actuator::ControlledActuator`]'s generic parameter.
pub trait Motor: Keyed<Key = String> {
    /// Command a new output shaft speed in rad/s.
    fn set(&self, target: f32);
}

/// A motor on a CAN bus. All state mutation happens on its feedback
/// listener; readers see the latest decoded values.
#[derive(Debug)]
pub struct BusMotor {
    name: String,
    kind: MotorKind,
    bus: String,
    id: u8,
    angle: Cell<f32>,
    speed: Cell<f32>,
    current: Cell<i16>,
    temperature: Cell<u8>,
    command: Cell<i16>,
    pid: RefCell<Pid>,
    heartbeat: Heartbeat,
}

impl Keyed for BusMotor {
    type Key = String;

    fn describe(&self) -> String {
        format!(
            "{:?} motor {} on {} (id {})",
            self.kind, self.name, self.bus, self.id
        )
    }
}

impl Device for BusMotor {
    fn heartbeat(&self) -> &Heartbeat {
        &self.heartbeat
    }
}

impl Motor for BusMotor {
    fn set(&self, target: f32) {
        self.pid.borrow_mut().set_target(target);
        self.refresh_command();
    }
}

impl BusMotor {
    pub fn kind(&self) -> MotorKind {
        self.kind
    }

    pub fn id(&self) -> u8 {
        self.id
    }

    /// Output shaft angle in radians, [0, 2π).
    pub fn angle(&self) -> f32 {
        self.angle.get()
    }

    /// Output shaft speed in rad/s.
    pub fn speed(&self) -> f32 {
        self.speed.get()
    }

    /// Last reported torque current, controller units.
    pub fn current(&self) -> i16 {
        self.current.get()
    }

    pub fn temperature(&self) -> u8 {
        self.temperature.get()
    }

    /// Current command the bus group will batch on its next tick.
    pub fn command(&self) -> i16 {
        self.command.get()
    }

    fn refresh_command(&self) {
        let mut pid = self.pid.borrow_mut();
        pid.update(self.speed.get());
        let out = pid
            .output()
            .clamp(i16::MIN as f32, i16::MAX as f32);
        self.command.set(out as i16);
    }

    fn apply_feedback(&self, fb: MotorFeedback) {
        self.angle.set(fb.angle_raw as f32 * ANGLE_SCALE);
        self.speed
            .set(fb.rpm as f32 * RPM_SCALE * self.kind.reduction());
        self.current.set(fb.current);
        self.temperature.set(fb.temperature);
        self.heartbeat.touch();
        self.refresh_command();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MotorInfo {
    pub name: String,
    /// Registry key of the bus the motor hangs off. The bus must already be
    /// initialized.
    pub bus: String,
    pub kind: MotorKind,
    /// Hardware id set by the motor's dial switch.
    pub id: u8,
    pub speed_pid: PidParams,
    /// Feedback liveness window; `None` disables the check.
    pub heartbeat_timeout: Option<Duration>,
}

impl InitInfo for MotorInfo {
    type Owner = BusMotor;

    fn key(&self) -> String {
        self.name.clone()
    }

    fn build(self, ctx: &Ctx) -> Result<Rc<BusMotor>, CoreError> {
        if !self.kind.valid_id(self.id) {
            return Err(CoreError::InvalidConfig(format!(
                "{:?} id {} out of range",
                self.kind, self.id
            )));
        }

        let bus = ctx.get::<CanBus>(&self.bus)?;
        let group = ctx.get_or_init(BusGroupInfo::new(self.bus.clone()))?;

        let motor = Rc::new(BusMotor {
            name: self.name,
            kind: self.kind,
            bus: self.bus,
            id: self.id,
            angle: Cell::new(0.0),
            speed: Cell::new(0.0),
            current: Cell::new(0),
            temperature: Cell::new(0),
            command: Cell::new(0),
            pid: RefCell::new(Pid::new(self.speed_pid, ErrorMode::Linear)),
            heartbeat: Heartbeat::new(self.heartbeat_timeout),
        });

        // Claim the command slot before wiring the listener so a conflict
        // leaves no half-registered motor behind.
        group.register(&motor)?;

        let listener = motor.clone();
        bus.on_record::<MotorFeedback, _>(self.kind.feedback_id(self.id), move |fb| {
            listener.apply_feedback(fb);
        });

        Ok(motor)
    }
}
