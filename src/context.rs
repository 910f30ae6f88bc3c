//! Runtime context: the registry, the cooperative task queue, and the stop
//! signal, threaded explicitly through every constructor that needs them.
//!
//! There are no ambient globals; code that wants to reach a device or a
//! channel holds a [`Ctx`] and asks by key.

use std::future::Future;
use std::rc::Rc;

use tokio::sync::Notify;
use tokio::task::LocalSet;

use crate::error::CoreError;
use crate::registry::{InitInfo, Keyed, Registry};

/// Shared handle to the runtime context.
///
/// Registry entries commonly keep a `Ctx` of their own, which forms a
/// reference cycle with the registry that owns them. Entries live for the
/// remainder of the process by contract, so the cycle is accepted.
pub type Ctx = Rc<Context>;

pub struct Context {
    registry: Registry,
    pub(crate) tasks: LocalSet,
    stop_signal: Notify,
}

impl Context {
    pub fn new() -> Ctx {
        Rc::new(Context {
            registry: Registry::new(),
            tasks: LocalSet::new(),
            stop_signal: Notify::new(),
        })
    }

    /// Construct the owner described by `info` and store it under its key.
    ///
    /// A repeated `init` for the same key fails with `AlreadyInitialized`;
    /// callers that want first-wins semantics use [`Context::get_or_init`].
    /// Dependencies must be initialized before their dependents — `build`
    /// may look other entries up, and no dependency graph is computed here.
    pub fn init<I: InitInfo>(self: &Ctx, info: I) -> Result<Rc<I::Owner>, CoreError> {
        let key = info.key();
        if self.registry.contains::<I::Owner>(&key) {
            return Err(CoreError::AlreadyInitialized {
                type_name: std::any::type_name::<I::Owner>(),
                key: format!("{key:?}"),
            });
        }
        let instance = info.build(self)?;
        self.registry.insert::<I::Owner>(key, instance.clone())?;
        tracing::info!(entry = %instance.describe(), "registered");
        Ok(instance)
    }

    /// Look up the live instance for `key`; logs and fails with `NotFound`
    /// when nothing was initialized under it.
    pub fn get<T: Keyed>(&self, key: &T::Key) -> Result<Rc<T>, CoreError> {
        self.registry.get::<T>(key)
    }

    /// Sole-instance lookup for unkeyed owners.
    pub fn get_single<T: Keyed<Key = ()>>(&self) -> Result<Rc<T>, CoreError> {
        self.registry.get::<T>(&())
    }

    /// Return the entry for `info.key()`, initializing it first if absent.
    /// Used where call order cannot guarantee prior initialization, e.g. a
    /// motor reaching for the bus group it shares with its siblings.
    pub fn get_or_init<I: InitInfo>(self: &Ctx, info: I) -> Result<Rc<I::Owner>, CoreError> {
        let key = info.key();
        if self.registry.contains::<I::Owner>(&key) {
            return self.registry.get::<I::Owner>(&key);
        }
        self.init(info)
    }

    pub fn contains<T: Keyed>(&self, key: &T::Key) -> bool {
        self.registry.contains::<T>(key)
    }

    /// Enqueue a suspendable task. Fire-and-forget: the task starts on a
    /// future scheduler turn and no result is observable by the caller.
    /// Valid both before the scheduler runs and from within tasks.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + 'static,
    {
        self.tasks.spawn_local(task);
    }

    /// Enqueue a plain callable for a future scheduler turn, deferring it
    /// out of the caller's current call stack.
    pub fn post<F>(&self, f: F)
    where
        F: FnOnce() + 'static,
    {
        self.spawn(async move { f() });
    }

    /// Ask the scheduler loop to return. Cooperative: outstanding tasks are
    /// abandoned once the loop exits.
    pub fn stop(&self) {
        tracing::info!("stop requested");
        self.stop_signal.notify_one();
    }

    pub(crate) async fn stopped(&self) {
        self.stop_signal.notified().await;
    }
}
