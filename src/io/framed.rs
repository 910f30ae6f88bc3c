//! Keyed channel over a byte stream with magic-delimited frames.
//!
//! Wire format: two magic bytes, a one-byte frame key, then a fixed-length
//! body whose length is a function of the key. The channel accumulates
//! inbound bytes and re-synchronizes after corruption by discarding one
//! byte at a time until the magic lines up again; at most the frames whose
//! bytes were corrupted are lost.

use std::rc::Rc;

use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

use crate::codec::{Literal, NBytes, Parse, Wire};
use crate::context::{Ctx, Context};
use crate::error::CoreError;
use crate::io::transport::{BoxedIo, StreamSource};
use crate::io::{KeyedFanout, Payload};
use crate::registry::{InitInfo, Keyed};

/// Frame delimiter, the 16-bit magic 0xAA55 in transmission order.
pub const FRAME_MAGIC: [u8; 2] = [0x55, 0xAA];

const HEADER_LEN: usize = FRAME_MAGIC.len() + 1;
const READ_CHUNK: usize = 512;

/// Maps a frame key to its fixed body length, `None` for keys this link
/// does not speak.
pub type BodyLenFn = fn(u8) -> Option<usize>;

pub struct FramedLink {
    name: String,
    body_len: BodyLenFn,
    fanout: KeyedFanout<u8>,
    writer: Mutex<Option<WriteHalf<BoxedIo>>>,
}

impl Keyed for FramedLink {
    type Key = String;

    fn describe(&self) -> String {
        format!("framed link {}", self.name)
    }
}

impl FramedLink {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn on_frame<F, Fut>(&self, key: u8, f: F)
    where
        F: Fn(Payload) -> Fut + 'static,
        Fut: std::future::Future<Output = ()> + 'static,
    {
        self.fanout.on_frame(key, f);
    }

    pub fn on_record<T, F>(&self, key: u8, f: F)
    where
        T: Wire + 'static,
        F: Fn(T) + 'static,
    {
        self.fanout.on_record(key, f);
    }

    /// Frame `body` under `key` and write it out. The body length must
    /// match the key's fixed layout exactly.
    pub async fn send(&self, key: u8, body: &[u8]) -> Result<(), CoreError> {
        let expected = (self.body_len)(key)
            .ok_or(CoreError::MalformedFrame("no body length for frame key"))?;
        if body.len() > expected {
            return Err(CoreError::PayloadTooLarge {
                len: body.len(),
                max: expected,
            });
        }
        if body.len() < expected {
            return Err(CoreError::MalformedFrame("body shorter than frame layout"));
        }

        let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
        frame.extend_from_slice(&FRAME_MAGIC);
        frame.push(key);
        frame.extend_from_slice(body);

        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or_else(|| {
            CoreError::Transport(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "transport not open yet",
            ))
        })?;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    /// Extract every complete frame at the front of `acc`, leaving any
    /// partial tail for the next read.
    fn drain(&self, ctx: &Context, acc: &mut Vec<u8>) {
        loop {
            if acc.len() < HEADER_LEN {
                return;
            }
            let mut header = (Literal::new(FRAME_MAGIC), NBytes::<1>::default());
            if header.parse(acc) == 0 {
                // Not at a frame boundary; shift by one and retry.
                acc.remove(0);
                continue;
            }
            let key = header.output().1[0];
            let body_len = match (self.body_len)(key) {
                Some(len) => len,
                None => {
                    tracing::warn!(link = %self.name, key, "unknown frame key, resyncing");
                    acc.remove(0);
                    continue;
                }
            };
            let total = HEADER_LEN + body_len;
            if acc.len() < total {
                return;
            }
            self.fanout.dispatch(ctx, key, &acc[HEADER_LEN..total]);
            acc.drain(..total);
        }
    }

    async fn pump(self: Rc<Self>, ctx: Ctx, mut reader: ReadHalf<BoxedIo>) {
        let mut acc: Vec<u8> = Vec::new();
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => {
                    tracing::info!(link = %self.name, "peer closed stream");
                    return;
                }
                Ok(n) => {
                    acc.extend_from_slice(&chunk[..n]);
                    self.drain(&ctx, &mut acc);
                }
                Err(err) => {
                    tracing::error!(link = %self.name, error = %err, "stream read failed");
                    return;
                }
            }
        }
    }
}

pub struct FramedLinkInfo {
    pub name: String,
    pub source: StreamSource,
    pub body_len: BodyLenFn,
}

impl InitInfo for FramedLinkInfo {
    type Owner = FramedLink;

    fn key(&self) -> String {
        self.name.clone()
    }

    fn build(self, ctx: &Ctx) -> Result<Rc<FramedLink>, CoreError> {
        let link = Rc::new(FramedLink {
            name: self.name,
            body_len: self.body_len,
            fanout: KeyedFanout::new(),
            writer: Mutex::new(None),
        });

        let pump_link = link.clone();
        let pump_ctx = ctx.clone();
        let source = self.source;
        ctx.spawn(async move {
            let io = match source.open().await {
                Ok(io) => io,
                Err(err) => {
                    tracing::error!(link = %pump_link.name, error = %err, "transport open failed");
                    return;
                }
            };
            let (reader, writer) = tokio::io::split(io);
            *pump_link.writer.lock().await = Some(writer);
            pump_link.pump(pump_ctx, reader).await;
        });

        Ok(link)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sched::yield_now;
    use std::cell::RefCell;

    fn referee_lens(key: u8) -> Option<usize> {
        match key {
            0x01 => Some(4),
            0x02 => Some(2),
            _ => None,
        }
    }

    async fn settle(ctx: &Context) {
        ctx.tasks
            .run_until(async {
                for _ in 0..8 {
                    yield_now().await;
                }
            })
            .await;
    }

    fn framed_pair(ctx: &Ctx) -> (Rc<FramedLink>, tokio::io::DuplexStream) {
        let (near, far) = tokio::io::duplex(256);
        let link = ctx
            .init(FramedLinkInfo {
                name: "referee".into(),
                source: StreamSource::Attached(Box::new(near)),
                body_len: referee_lens,
            })
            .unwrap();
        (link, far)
    }

    #[tokio::test]
    async fn frames_route_by_key() {
        let ctx = Context::new();
        let (link, mut far) = framed_pair(&ctx);

        let bodies = Rc::new(RefCell::new(Vec::new()));
        {
            let bodies = bodies.clone();
            link.on_frame(0x01, move |p: Payload| {
                let bodies = bodies.clone();
                async move {
                    bodies.borrow_mut().push(p.to_vec());
                }
            });
        }

        // One frame for key 1, one for key 2 (no listener), split across
        // two writes to exercise reassembly.
        far.write_all(&[0x55, 0xAA, 0x01, 10, 11]).await.unwrap();
        far.write_all(&[12, 13, 0x55, 0xAA, 0x02, 1, 2]).await.unwrap();
        settle(&ctx).await;

        assert_eq!(*bodies.borrow(), vec![vec![10, 11, 12, 13]]);
    }

    #[tokio::test]
    async fn resync_skips_corrupt_prefix() {
        let ctx = Context::new();
        let (link, mut far) = framed_pair(&ctx);

        let bodies = Rc::new(RefCell::new(Vec::new()));
        {
            let bodies = bodies.clone();
            link.on_frame(0x02, move |p: Payload| {
                let bodies = bodies.clone();
                async move {
                    bodies.borrow_mut().push(p.to_vec());
                }
            });
        }

        // Garbage, then a frame with an unknown key, then a valid frame.
        let mut noise = vec![0x00, 0x55, 0x13];
        noise.extend_from_slice(&[0x55, 0xAA, 0x7F]);
        noise.extend_from_slice(&[0x55, 0xAA, 0x02, 42, 43]);
        far.write_all(&noise).await.unwrap();
        settle(&ctx).await;

        assert_eq!(*bodies.borrow(), vec![vec![42, 43]]);
    }

    #[tokio::test]
    async fn send_validates_body_length() {
        let ctx = Context::new();
        let (link, mut far) = framed_pair(&ctx);
        settle(&ctx).await;

        let too_long = ctx.tasks.run_until(link.send(0x02, &[1, 2, 3])).await;
        assert!(matches!(
            too_long.unwrap_err(),
            CoreError::PayloadTooLarge { len: 3, max: 2 }
        ));

        let too_short = ctx.tasks.run_until(link.send(0x02, &[1])).await;
        assert!(matches!(
            too_short.unwrap_err(),
            CoreError::MalformedFrame(_)
        ));

        ctx.tasks.run_until(link.send(0x02, &[1, 2])).await.unwrap();
        let mut buf = [0u8; 5];
        far.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0x55, 0xAA, 0x02, 1, 2]);
    }
}
