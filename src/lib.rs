//! # robocore
//!
//! Runtime core for embedded-style robot controllers: a single-threaded
//! cooperative scheduler, a typed keyed registry that owns every
//! hardware-bound object, layered I/O channels (raw streams, magic-framed
//! links, CAN), and a DJI-style motor family with per-bus command batching.
//!
//! ## Architecture
//!
//! - [`sched`] / [`context`] - cooperative scheduler and the explicit
//!   runtime context threaded through all construction
//! - [`registry`] - typed keyed object store; only keys travel between
//!   components
//! - [`codec`] - fixed-layout wire records and parser combinators
//! - [`io`] - channels owning transports and fanning frames out to
//!   listeners
//! - [`control`] - PID, ramp, and chained controllers
//! - [`device`] - heartbeat liveness, motors, bus command groups, actuators
//!
//! ## Quick start
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use robocore::context::Context;
//! use robocore::control::PidParams;
//! use robocore::device::motor::{MotorInfo, MotorKind};
//! use robocore::io::can::CanBusInfo;
//! use robocore::sched::Scheduler;
//!
//! fn main() -> Result<(), robocore::CoreError> {
//!     let ctx = Context::new();
//!     let sched = Scheduler::new()?;
//!
//!     ctx.init(CanBusInfo::interface("can0", "can0"))?;
//!     ctx.init(MotorInfo {
//!         name: "feeder".into(),
//!         bus: "can0".into(),
//!         kind: MotorKind::M2006,
//!         id: 1,
//!         speed_pid: PidParams {
//!             kp: 8.0,
//!             ki: 0.1,
//!             kd: 0.0,
//!             max_out: 10_000.0,
//!             max_iout: 2_000.0,
//!         },
//!         heartbeat_timeout: Some(Duration::from_millis(100)),
//!     })?;
//!
//!     sched.run(&ctx);
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod context;
pub mod control;
pub mod device;
pub mod error;
pub mod io;
pub mod registry;
pub mod sched;

pub use context::{Context, Ctx};
pub use error::CoreError;
pub use registry::{InitInfo, Keyed};
pub use sched::{wait_for, yield_now, Scheduler};
