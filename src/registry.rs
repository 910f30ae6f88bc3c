//! Generic keyed object store.
//!
//! The registry creates and owns every long-lived hardware-bound object and
//! is the only mechanism unrelated components use to reach each other: only
//! keys travel between components, never references. One table exists per
//! owner type; within a table at most one live instance exists per key.
//!
//! Sole-instance ("unkeyed") objects simply use `Key = ()`.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::rc::Rc;
use std::sync::{Mutex, PoisonError};

use crate::context::Ctx;
use crate::error::CoreError;

/// An object the registry can own: addressed by `Key`, self-describing for
/// diagnostics.
pub trait Keyed: 'static {
    type Key: Eq + Hash + Clone + fmt::Debug + 'static;

    /// Human-readable identity used in logs ("Dji motor gimbal_yaw on can0").
    fn describe(&self) -> String;
}

/// Immutable plain-data description of how to construct a registry entry.
///
/// `build` runs outside the registry lock, so a constructor may freely look
/// up (or lazily initialize) other entries it depends on.
pub trait InitInfo: 'static {
    type Owner: Keyed;

    fn key(&self) -> <Self::Owner as Keyed>::Key;
    fn build(self, ctx: &Ctx) -> Result<Rc<Self::Owner>, CoreError>;
}

type Table<T> = HashMap<<T as Keyed>::Key, Rc<T>>;

/// Type- and key-indexed storage. Insert/lookup take a mutex because setup
/// and teardown run outside the steady-state scheduler loop; steady-state
/// access is single-threaded and uncontended.
#[derive(Default)]
pub struct Registry {
    tables: Mutex<HashMap<TypeId, Box<dyn Any>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_table<T: Keyed, R>(&self, f: impl FnOnce(&mut Table<T>) -> R) -> R {
        let mut tables = self
            .tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let slot = tables
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Box::new(Table::<T>::new()));
        // The TypeId key guarantees the downcast.
        f(slot.downcast_mut::<Table<T>>().expect("registry table type"))
    }

    /// Store `instance` under `key`. Fails if the key is already taken.
    pub fn insert<T: Keyed>(&self, key: T::Key, instance: Rc<T>) -> Result<(), CoreError> {
        self.with_table::<T, _>(|table| {
            if table.contains_key(&key) {
                return Err(CoreError::AlreadyInitialized {
                    type_name: type_name::<T>(),
                    key: format!("{key:?}"),
                });
            }
            table.insert(key, instance);
            Ok(())
        })
    }

    /// Look up the live instance for `key`. The returned `Rc` aliases the
    /// registry-owned instance; its identity is stable across calls.
    pub fn get<T: Keyed>(&self, key: &T::Key) -> Result<Rc<T>, CoreError> {
        self.with_table::<T, _>(|table| {
            table.get(key).cloned().ok_or_else(|| {
                tracing::error!(
                    owner = type_name::<T>(),
                    key = ?key,
                    "registry lookup failed"
                );
                CoreError::NotFound {
                    type_name: type_name::<T>(),
                    key: format!("{key:?}"),
                }
            })
        })
    }

    /// Non-failing existence probe.
    pub fn contains<T: Keyed>(&self, key: &T::Key) -> bool {
        self.with_table::<T, _>(|table| table.contains_key(key))
    }

    /// Number of live entries for owner type `T`.
    pub fn count<T: Keyed>(&self) -> usize {
        self.with_table::<T, _>(|table| table.len())
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tables = self
            .tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        f.debug_struct("Registry")
            .field("type_tables", &tables.len())
            .finish()
    }
}
