//! CAN bus channel speaking the kernel SocketCAN frame layout.
//!
//! Every frame on the wire is a fixed 16-byte record; inbound frames are
//! routed to listeners by their 29/11-bit arbitration id. Off Linux (and in
//! tests) the bus runs over any attached transport that speaks the same
//! 16-byte records.

use std::rc::Rc;

use static_assertions::const_assert_eq;
use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

use crate::codec::Wire;
use crate::context::Ctx;
use crate::error::CoreError;
use crate::io::transport::BoxedIo;
use crate::io::{KeyedFanout, Payload};
use crate::registry::{InitInfo, Keyed};

/// Classical CAN data field limit.
pub const CAN_MAX_DATA: usize = 8;

/// One SocketCAN `can_frame`: little-endian id, data length code, three
/// bytes of padding, then the data field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanFrame {
    pub id: u32,
    pub dlc: u8,
    pub data: [u8; CAN_MAX_DATA],
}

impl Wire for CanFrame {
    const SIZE: usize = 16;

    fn encode(&self, buf: &mut [u8]) {
        buf[0..4].copy_from_slice(&self.id.to_le_bytes());
        buf[4] = self.dlc;
        buf[5..8].fill(0);
        buf[8..16].copy_from_slice(&self.data);
    }

    fn decode(buf: &[u8]) -> Self {
        let mut data = [0u8; CAN_MAX_DATA];
        data.copy_from_slice(&buf[8..16]);
        Self {
            id: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            dlc: buf[4],
            data,
        }
    }
}

const_assert_eq!(CanFrame::SIZE, 16);

/// How a [`CanBus`] reaches the physical (or simulated) bus.
pub enum CanLink {
    /// A kernel CAN network interface, e.g. "can0". Linux only.
    Interface(String),
    /// A pre-opened transport carrying 16-byte frame records.
    Attached(BoxedIo),
}

pub struct CanBus {
    name: String,
    fanout: KeyedFanout<u32>,
    writer: Mutex<Option<WriteHalf<BoxedIo>>>,
}

impl Keyed for CanBus {
    type Key = String;

    fn describe(&self) -> String {
        format!("CAN bus {}", self.name)
    }
}

impl CanBus {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a listener for frames carrying arbitration id `id`. The
    /// payload handed to the listener is the data field, `dlc` bytes long.
    pub fn on_frame<F, Fut>(&self, id: u32, f: F)
    where
        F: Fn(Payload) -> Fut + 'static,
        Fut: std::future::Future<Output = ()> + 'static,
    {
        self.fanout.on_frame(id, f);
    }

    pub fn on_record<T, F>(&self, id: u32, f: F)
    where
        T: Wire + 'static,
        F: Fn(T) + 'static,
    {
        self.fanout.on_record(id, f);
    }

    /// Transmit `data` under arbitration id `id`.
    pub async fn send(&self, id: u32, data: &[u8]) -> Result<(), CoreError> {
        if data.len() > CAN_MAX_DATA {
            return Err(CoreError::PayloadTooLarge {
                len: data.len(),
                max: CAN_MAX_DATA,
            });
        }
        let mut frame = CanFrame {
            id,
            dlc: data.len() as u8,
            data: [0u8; CAN_MAX_DATA],
        };
        frame.data[..data.len()].copy_from_slice(data);

        let mut buf = [0u8; CanFrame::SIZE];
        frame.encode(&mut buf);

        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or_else(|| {
            CoreError::Transport(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "bus not open yet",
            ))
        })?;
        writer.write_all(&buf).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn pump(self: Rc<Self>, ctx: Ctx, mut reader: ReadHalf<BoxedIo>) {
        let mut buf = [0u8; CanFrame::SIZE];
        loop {
            if let Err(err) = reader.read_exact(&mut buf).await {
                if err.kind() == std::io::ErrorKind::UnexpectedEof {
                    tracing::info!(bus = %self.name, "bus closed");
                } else {
                    tracing::error!(bus = %self.name, error = %err, "bus read failed");
                }
                return;
            }
            let frame = CanFrame::decode(&buf);
            let len = (frame.dlc as usize).min(CAN_MAX_DATA);
            self.fanout.dispatch(&ctx, frame.id, &frame.data[..len]);
        }
    }
}

pub struct CanBusInfo {
    pub name: String,
    pub link: CanLink,
}

impl CanBusInfo {
    pub fn interface(name: impl Into<String>, interface: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            link: CanLink::Interface(interface.into()),
        }
    }

    pub fn attached(name: impl Into<String>, io: BoxedIo) -> Self {
        Self {
            name: name.into(),
            link: CanLink::Attached(io),
        }
    }
}

impl InitInfo for CanBusInfo {
    type Owner = CanBus;

    fn key(&self) -> String {
        self.name.clone()
    }

    fn build(self, ctx: &Ctx) -> Result<Rc<CanBus>, CoreError> {
        let bus = Rc::new(CanBus {
            name: self.name,
            fanout: KeyedFanout::new(),
            writer: Mutex::new(None),
        });

        // The socket registers with the reactor, so opening happens on the
        // task queue rather than here.
        let pump_bus = bus.clone();
        let pump_ctx = ctx.clone();
        let link = self.link;
        ctx.spawn(async move {
            let io: BoxedIo = match link {
                CanLink::Attached(io) => io,
                #[cfg(target_os = "linux")]
                CanLink::Interface(interface) => {
                    match crate::io::transport::CanSocket::open(&interface) {
                        Ok(socket) => Box::new(socket),
                        Err(err) => {
                            tracing::error!(
                                bus = %pump_bus.name,
                                interface = %interface,
                                error = %err,
                                "SocketCAN open failed"
                            );
                            return;
                        }
                    }
                }
                #[cfg(not(target_os = "linux"))]
                CanLink::Interface(interface) => {
                    tracing::error!(
                        bus = %pump_bus.name,
                        interface = %interface,
                        "SocketCAN is unavailable on this target"
                    );
                    return;
                }
            };
            let (reader, writer) = tokio::io::split(io);
            *pump_bus.writer.lock().await = Some(writer);
            pump_bus.pump(pump_ctx, reader).await;
        });

        Ok(bus)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::sched::yield_now;
    use std::cell::RefCell;

    async fn settle(ctx: &Context) {
        ctx.tasks
            .run_until(async {
                for _ in 0..8 {
                    yield_now().await;
                }
            })
            .await;
    }

    fn bus_pair(ctx: &Ctx) -> (Rc<CanBus>, tokio::io::DuplexStream) {
        let (near, far) = tokio::io::duplex(256);
        let bus = ctx
            .init(CanBusInfo::attached("can0", Box::new(near)))
            .unwrap();
        (bus, far)
    }

    #[test]
    fn frame_layout_round_trips() {
        let frame = CanFrame {
            id: 0x205,
            dlc: 8,
            data: [1, 2, 3, 4, 5, 6, 7, 8],
        };
        let mut buf = [0u8; CanFrame::SIZE];
        frame.encode(&mut buf);
        assert_eq!(&buf[0..4], &[0x05, 0x02, 0x00, 0x00]);
        assert_eq!(buf[4], 8);
        assert_eq!(CanFrame::decode(&buf), frame);
    }

    #[tokio::test]
    async fn inbound_frames_route_by_id() {
        let ctx = Context::new();
        let (bus, mut far) = bus_pair(&ctx);

        let seen = Rc::new(RefCell::new(Vec::new()));
        {
            let seen = seen.clone();
            bus.on_frame(0x201, move |p: Payload| {
                let seen = seen.clone();
                async move {
                    seen.borrow_mut().push(p.to_vec());
                }
            });
        }

        for (id, byte) in [(0x201u32, 0xAAu8), (0x202, 0xBB)] {
            let mut frame = CanFrame {
                id,
                dlc: 3,
                data: [0u8; CAN_MAX_DATA],
            };
            frame.data[..3].fill(byte);
            let mut buf = [0u8; CanFrame::SIZE];
            frame.encode(&mut buf);
            far.write_all(&buf).await.unwrap();
        }
        settle(&ctx).await;

        // Only the 0x201 listener fired, and it saw dlc bytes, not 8.
        assert_eq!(*seen.borrow(), vec![vec![0xAA, 0xAA, 0xAA]]);
    }

    #[tokio::test]
    async fn send_emits_one_wire_frame() {
        let ctx = Context::new();
        let (bus, mut far) = bus_pair(&ctx);
        settle(&ctx).await;

        ctx.tasks
            .run_until(bus.send(0x1FF, &[9, 8, 7, 6]))
            .await
            .unwrap();

        let mut buf = [0u8; CanFrame::SIZE];
        far.read_exact(&mut buf).await.unwrap();
        let frame = CanFrame::decode(&buf);
        assert_eq!(frame.id, 0x1FF);
        assert_eq!(frame.dlc, 4);
        assert_eq!(&frame.data[..4], &[9, 8, 7, 6]);
    }

    #[tokio::test]
    async fn oversized_payload_rejected() {
        let ctx = Context::new();
        let (bus, _far) = bus_pair(&ctx);
        settle(&ctx).await;

        let err = ctx
            .tasks
            .run_until(bus.send(0x200, &[0u8; 9]))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::PayloadTooLarge { len: 9, max: 8 }
        ));
    }
}
