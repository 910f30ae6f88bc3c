//! Layered I/O dispatch: channels own a transport, decode inbound bytes,
//! and route decoded records to registered listeners.
//!
//! Two channel shapes exist. Unkeyed channels ([`stream::StreamLink`]) hand
//! every inbound buffer to every listener; keyed channels
//! ([`can::CanBus`], [`framed::FramedLink`]) route by a sub-identifier.
//! Either way, dispatch copies the buffer into an immutable shared snapshot
//! and spawns one task per matching listener, so a slow listener never
//! blocks its peers or the next read.

pub mod can;
pub mod framed;
pub mod stream;
pub mod transport;

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::rc::Rc;

use crate::codec::Wire;
use crate::context::Context;

/// Immutable snapshot of one inbound buffer, decoupled from the channel's
/// reusable read buffer so listeners may hold it as long as they like.
pub type Payload = Rc<[u8]>;

type ListenerFuture = Pin<Box<dyn Future<Output = ()>>>;

/// A registered listener. Listeners live as long as their channel; there is
/// no unregistration.
#[derive(Clone)]
struct Listener(Rc<dyn Fn(Payload) -> ListenerFuture>);

impl Listener {
    fn wrap<F, Fut>(f: F) -> Self
    where
        F: Fn(Payload) -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        Listener(Rc::new(move |payload: Payload| -> ListenerFuture {
            Box::pin(f(payload))
        }))
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Listener")
    }
}

/// Listener list for unkeyed channels: every dispatch reaches every
/// listener, in registration order.
#[derive(Debug, Default)]
pub struct Fanout {
    listeners: RefCell<Vec<Listener>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_frame<F, Fut>(&self, f: F)
    where
        F: Fn(Payload) -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        self.listeners.borrow_mut().push(Listener::wrap(f));
    }

    /// Register a synchronous listener for a fixed-layout record; shorter
    /// buffers are dropped with a warning (malformed traffic is local).
    pub fn on_record<T, F>(&self, f: F)
    where
        T: Wire + 'static,
        F: Fn(T) + 'static,
    {
        let f = Rc::new(f);
        self.on_frame(move |payload: Payload| {
            let f = f.clone();
            async move {
                if payload.len() < T::SIZE {
                    tracing::warn!(len = payload.len(), need = T::SIZE, "dropping short record");
                    return;
                }
                f(T::decode(&payload));
            }
        });
    }

    pub fn dispatch(&self, ctx: &Context, bytes: &[u8]) {
        tracing::trace!(len = bytes.len(), "dispatching buffer");
        let payload: Payload = Rc::from(bytes);
        let listeners = self.listeners.borrow().clone();
        for listener in listeners {
            ctx.spawn(listener.0(payload.clone()));
        }
    }

    pub fn len(&self) -> usize {
        self.listeners.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Listener table for keyed channels: listeners are registered against a
/// sub-identifier and invoked only for matching traffic. Entries are never
/// removed; the table may grow at any time.
#[derive(Debug)]
pub struct KeyedFanout<K: Ord + Copy + fmt::Debug> {
    listeners: RefCell<BTreeMap<K, Vec<Listener>>>,
}

impl<K: Ord + Copy + fmt::Debug> Default for KeyedFanout<K> {
    fn default() -> Self {
        Self {
            listeners: RefCell::new(BTreeMap::new()),
        }
    }
}

impl<K: Ord + Copy + fmt::Debug + 'static> KeyedFanout<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_frame<F, Fut>(&self, key: K, f: F)
    where
        F: Fn(Payload) -> Fut + 'static,
        Fut: Future<Output = ()> + 'static,
    {
        self.listeners
            .borrow_mut()
            .entry(key)
            .or_default()
            .push(Listener::wrap(f));
    }

    pub fn on_record<T, F>(&self, key: K, f: F)
    where
        T: Wire + 'static,
        F: Fn(T) + 'static,
    {
        let f = Rc::new(f);
        self.on_frame(key, move |payload: Payload| {
            let f = f.clone();
            async move {
                if payload.len() < T::SIZE {
                    tracing::warn!(len = payload.len(), need = T::SIZE, "dropping short record");
                    return;
                }
                f(T::decode(&payload));
            }
        });
    }

    /// Route one inbound buffer. Traffic for keys nobody listens on is
    /// silently dropped.
    pub fn dispatch(&self, ctx: &Context, key: K, bytes: &[u8]) {
        let matching = match self.listeners.borrow().get(&key) {
            Some(list) => list.clone(),
            None => return,
        };
        tracing::trace!(?key, len = bytes.len(), "dispatching frame");
        let payload: Payload = Rc::from(bytes);
        for listener in matching {
            ctx.spawn(listener.0(payload.clone()));
        }
    }

    pub fn keys(&self) -> Vec<K> {
        self.listeners.borrow().keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Context;
    use crate::sched::yield_now;
    use std::cell::RefCell;

    #[tokio::test]
    async fn fanout_reaches_all_in_registration_order() {
        let ctx = Context::new();
        let fanout = Fanout::new();
        let seen = Rc::new(RefCell::new(Vec::new()));

        for tag in ["a", "b", "c"] {
            let seen = seen.clone();
            fanout.on_frame(move |p: Payload| {
                let seen = seen.clone();
                async move {
                    seen.borrow_mut().push((tag, p.len()));
                }
            });
        }

        fanout.dispatch(&ctx, &[1, 2, 3]);
        // Listener tasks were spawned onto the context queue; drive it.
        ctx.tasks
            .run_until(async {
                for _ in 0..4 {
                    yield_now().await;
                }
            })
            .await;

        assert_eq!(*seen.borrow(), vec![("a", 3), ("b", 3), ("c", 3)]);
    }

    #[tokio::test]
    async fn keyed_dispatch_only_matching_key() {
        let ctx = Context::new();
        let table = KeyedFanout::<u32>::new();
        let hits = Rc::new(Cell2::default());

        #[derive(Default)]
        struct Cell2 {
            a: std::cell::Cell<u32>,
            b: std::cell::Cell<u32>,
        }

        {
            let hits = hits.clone();
            table.on_frame(0x201, move |_p| {
                let hits = hits.clone();
                async move { hits.a.set(hits.a.get() + 1) }
            });
        }
        {
            let hits = hits.clone();
            table.on_frame(0x202, move |_p| {
                let hits = hits.clone();
                async move { hits.b.set(hits.b.get() + 1) }
            });
        }

        table.dispatch(&ctx, 0x201, &[0u8; 8]);
        table.dispatch(&ctx, 0x203, &[0u8; 8]);

        ctx.tasks
            .run_until(async {
                for _ in 0..4 {
                    yield_now().await;
                }
            })
            .await;

        assert_eq!(hits.a.get(), 1);
        assert_eq!(hits.b.get(), 0);
    }
}
