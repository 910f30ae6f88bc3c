//! Unkeyed byte-stream channel.
//!
//! A [`StreamLink`] owns one stream transport and fans every inbound buffer
//! out to every listener. Chunk boundaries are whatever the transport
//! delivers; listeners that need framing layer it themselves or use a
//! [`super::framed::FramedLink`] instead.

use std::rc::Rc;

use tokio::io::{AsyncReadExt, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::Mutex;

use crate::codec::Wire;
use crate::context::Ctx;
use crate::error::CoreError;
use crate::io::transport::{BoxedIo, StreamSource};
use crate::io::{Fanout, Payload};
use crate::registry::{InitInfo, Keyed};

const READ_CHUNK: usize = 1024;

pub struct StreamLink {
    name: String,
    fanout: Fanout,
    // Present once the transport is open. Writes serialize on this lock so
    // concurrent senders never interleave their bytes.
    writer: Mutex<Option<WriteHalf<BoxedIo>>>,
}

impl Keyed for StreamLink {
    type Key = String;

    fn describe(&self) -> String {
        format!("stream link {}", self.name)
    }
}

impl StreamLink {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Register a listener for every inbound buffer.
    pub fn on_frame<F, Fut>(&self, f: F)
    where
        F: Fn(Payload) -> Fut + 'static,
        Fut: std::future::Future<Output = ()> + 'static,
    {
        self.fanout.on_frame(f);
    }

    /// Register a listener that decodes each buffer as one fixed-layout
    /// record. Buffers too short for the record are dropped with a warning.
    pub fn on_record<T, F>(&self, f: F)
    where
        T: Wire + 'static,
        F: Fn(T) + 'static,
    {
        self.fanout.on_record(f);
    }

    /// Write `bytes` to the transport. Fails until the transport has
    /// finished opening.
    pub async fn send(&self, bytes: &[u8]) -> Result<(), CoreError> {
        let mut writer = self.writer.lock().await;
        let writer = writer.as_mut().ok_or_else(|| {
            CoreError::Transport(std::io::Error::new(
                std::io::ErrorKind::NotConnected,
                "transport not open yet",
            ))
        })?;
        writer.write_all(bytes).await?;
        writer.flush().await?;
        Ok(())
    }

    async fn pump(self: Rc<Self>, ctx: Ctx, mut reader: ReadHalf<BoxedIo>) {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            match reader.read(&mut chunk).await {
                Ok(0) => {
                    tracing::info!(link = %self.name, "peer closed stream");
                    return;
                }
                Ok(n) => self.fanout.dispatch(&ctx, &chunk[..n]),
                Err(err) => {
                    tracing::error!(link = %self.name, error = %err, "stream read failed");
                    return;
                }
            }
        }
    }
}

pub struct StreamLinkInfo {
    pub name: String,
    pub source: StreamSource,
}

impl StreamLinkInfo {
    pub fn remote(name: impl Into<String>, endpoint: crate::io::transport::Endpoint) -> Self {
        Self {
            name: name.into(),
            source: StreamSource::Remote(endpoint),
        }
    }

    pub fn attached(name: impl Into<String>, io: BoxedIo) -> Self {
        Self {
            name: name.into(),
            source: StreamSource::Attached(io),
        }
    }
}

impl InitInfo for StreamLinkInfo {
    type Owner = StreamLink;

    fn key(&self) -> String {
        self.name.clone()
    }

    fn build(self, ctx: &Ctx) -> Result<Rc<StreamLink>, CoreError> {
        let link = Rc::new(StreamLink {
            name: self.name,
            fanout: Fanout::new(),
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

    #[tokio::test]
    async fn inbound_bytes_reach_every_listener() {
        let ctx = Context::new();
        let (near, mut far) = tokio::io::duplex(64);
        let link = ctx
            .init(StreamLinkInfo::attached("uart0", Box::new(near)))
            .unwrap();

        let seen = Rc::new(RefCell::new(Vec::new()));
        for tag in ["a", "b"] {
            let seen = seen.clone();
            link.on_frame(move |p: Payload| {
                let seen = seen.clone();
                async move {
                    seen.borrow_mut().push((tag, p.to_vec()));
                }
            });
        }

        far.write_all(&[1, 2, 3]).await.unwrap();
        settle(&ctx).await;

        assert_eq!(
            *seen.borrow(),
            vec![("a", vec![1, 2, 3]), ("b", vec![1, 2, 3])]
        );
    }

    #[tokio::test]
    async fn send_reaches_peer() {
        let ctx = Context::new();
        let (near, mut far) = tokio::io::duplex(64);
        let link = ctx
            .init(StreamLinkInfo::attached("uart0", Box::new(near)))
            .unwrap();

        // Let the pump open the transport before sending.
        settle(&ctx).await;
        ctx.tasks
            .run_until(link.send(b"ping"))
            .await
            .unwrap();

        let mut buf = [0u8; 4];
        far.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }

    #[tokio::test]
    async fn send_before_open_fails() {
        let ctx = Context::new();
        let (near, _far) = tokio::io::duplex(64);
        let link = ctx
            .init(StreamLinkInfo::attached("uart0", Box::new(near)))
            .unwrap();

        // The pump task has not run yet, so the writer is still absent.
        let err = link.send(b"x").await.unwrap_err();
        assert!(matches!(err, CoreError::Transport(_)));
    }
}
