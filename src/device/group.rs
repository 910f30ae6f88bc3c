//! Per-bus command batching.
//!
//! DJI-style motors do not take individual command frames: up to four
//! motors share one 8-byte frame per bucket id. The group owns the periodic
//! task that assembles and transmits those frames for every motor on one
//! bus.

use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::time::Duration;

use crate::codec::write_i16_be;
use crate::context::Ctx;
use crate::device::motor::BusMotor;
use crate::error::CoreError;
use crate::io::can::CanBus;
use crate::registry::{InitInfo, Keyed};
use crate::sched::wait_for;

/// Bound on motors per bus: three buckets of four slots.
pub const MAX_GROUP_MOTORS: usize = 12;

/// Every command bucket the supported motor family maps into.
const COMMAND_BUCKETS: [u16; 3] = [0x200, 0x1FF, 0x2FF];

pub const DEFAULT_TICK: Duration = Duration::from_millis(2);

struct SlotEntry {
    bucket: u16,
    slot: u8,
    // Non-owning: the registry owns the motor, not the group.
    motor: Weak<BusMotor>,
}

/// One command batcher per bus, created lazily by the first motor that
/// joins it.
pub struct BusGroup {
    bus: String,
    link: Rc<CanBus>,
    motors: RefCell<heapless::Vec<SlotEntry, MAX_GROUP_MOTORS>>,
}

impl Keyed for BusGroup {
    type Key = String;

    fn describe(&self) -> String {
        format!("command group for {}", self.bus)
    }
}

impl BusGroup {
    /// Claim the motor's `(bucket, slot)` position. Two motors whose ids
    /// resolve to the same position cannot share a bus.
    pub fn register(&self, motor: &Rc<BusMotor>) -> Result<(), CoreError> {
        let bucket = motor.kind().bucket(motor.id());
        let slot = motor.kind().slot(motor.id());

        let mut motors = self.motors.borrow_mut();
        if motors.iter().any(|e| e.bucket == bucket && e.slot == slot) {
            tracing::error!(bus = %self.bus, bucket, slot, "command slot already taken");
            return Err(CoreError::SlotConflict {
                bus: self.bus.clone(),
                bucket,
                slot,
            });
        }
        motors
            .push(SlotEntry {
                bucket,
                slot,
                motor: Rc::downgrade(motor),
            })
            .map_err(|_| {
                CoreError::InvalidConfig(format!(
                    "more than {MAX_GROUP_MOTORS} motors on {}",
                    self.bus
                ))
            })
    }

    pub fn len(&self) -> usize {
        self.motors.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Assemble and send one frame per bucket that has a live motor.
    async fn flush(&self) -> Result<(), CoreError> {
        for bucket in COMMAND_BUCKETS {
            let mut data = [0u8; 8];
            let mut occupied = false;
            {
                let motors = self.motors.borrow();
                for entry in motors.iter().filter(|e| e.bucket == bucket) {
                    if let Some(motor) = entry.motor.upgrade() {
                        write_i16_be(&mut data, 2 * entry.slot as usize, motor.command());
                        occupied = true;
                    }
                }
            }
            if occupied {
                self.link.send(bucket as u32, &data).await?;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct BusGroupInfo {
    pub bus: String,
    pub tick: Duration,
}

impl BusGroupInfo {
    pub fn new(bus: impl Into<String>) -> Self {
        Self {
            bus: bus.into(),
            tick: DEFAULT_TICK,
        }
    }

    pub fn with_tick(bus: impl Into<String>, tick: Duration) -> Self {
        Self {
            bus: bus.into(),
            tick,
        }
    }
}

impl InitInfo for BusGroupInfo {
    type Owner = BusGroup;

    fn key(&self) -> String {
        self.bus.clone()
    }

    fn build(self, ctx: &Ctx) -> Result<Rc<BusGroup>, CoreError> {
        let link = ctx.get::<CanBus>(&self.bus)?;
        let group = Rc::new(BusGroup {
            bus: self.bus,
            link,
            motors: RefCell::new(heapless::Vec::new()),
        });

        let tick = self.tick;
        let batcher = group.clone();
        ctx.spawn(async move {
            loop {
                wait_for(tick).await;
                if let Err(err) = batcher.flush().await {
                    tracing::error!(
                        bus = %batcher.bus,
                        error = %err,
                        "command batch send failed, stopping batcher"
                    );
                    return;
                }
            }
        });

        Ok(group)
    }
}
