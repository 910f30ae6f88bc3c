//! Hardware-bound device base: liveness tracking shared by everything that
//! expects periodic feedback from the bus.

pub mod actuator;
pub mod group;
pub mod motor;

use std::cell::Cell;
use std::time::Duration;

use tokio::time::Instant;

/// Feedback liveness tracker. The device's feedback listener calls
/// [`Heartbeat::touch`] on every inbound record; anyone may ask whether the
/// device has been heard from recently.
///
/// A `None` timeout disables the check entirely. With a timeout set, a
/// device that has never been heard from counts as offline.
#[derive(Debug)]
pub struct Heartbeat {
    timeout: Option<Duration>,
    last_seen: Cell<Option<Instant>>,
}

impl Heartbeat {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            timeout,
            last_seen: Cell::new(None),
        }
    }

    /// Record that feedback arrived now.
    pub fn touch(&self) {
        self.last_seen.set(Some(Instant::now()));
    }

    pub fn is_online(&self) -> bool {
        let Some(timeout) = self.timeout else {
            return true;
        };
        match self.last_seen.get() {
            Some(seen) => seen.elapsed() <= timeout,
            None => false,
        }
    }
}

/// Anything with a heartbeat. Object-safe so mixed device sets can be
/// checked together.
pub trait Device {
    fn heartbeat(&self) -> &Heartbeat;

    /// Advisory only; no operation is blocked by an offline device.
    fn offline(&self) -> bool {
        !self.heartbeat().is_online()
    }
}

/// True if any device in the set has gone quiet.
pub fn any_offline(devices: &[&dyn Device]) -> bool {
    devices.iter().any(|d| d.offline())
}
