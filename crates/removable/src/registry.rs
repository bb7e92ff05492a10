//! Registry of removable record types
//!
//! Maps each registered type to its options and hook chains. Registering a
//! type again merges the new options over the earlier ones key by key and
//! starts empty hook chains.

use std::any::{type_name, Any, TypeId};
use std::sync::{Arc, PoisonError, RwLock};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::Lazy;
use tracing::debug;

use crate::error::{RemovalError, RemovalResult};
use crate::hooks::{HookChain, HookRegistry, HookTiming, RemovalEvent, RemovalHook};
use crate::options::RemovableOptions;

/// Hook chains of one type, shared between the registry and handles
pub type SharedHooks<T> = Arc<RwLock<HookRegistry<T>>>;

struct Registration {
    type_name: &'static str,
    options: Arc<RemovableOptions>,
    // `RwLock<HookRegistry<T>>` for the registered `T`
    hooks: Arc<dyn Any + Send + Sync>,
}

static GLOBAL_REGISTRY: Lazy<RemovableRegistry> = Lazy::new(RemovableRegistry::new);

/// Per-type removable configuration keyed by `TypeId`
#[derive(Default)]
pub struct RemovableRegistry {
    entries: DashMap<TypeId, Registration>,
}

impl RemovableRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry used by `Removable`
    pub fn global() -> &'static RemovableRegistry {
        &GLOBAL_REGISTRY
    }

    /// Register `T`, merging `options` over any earlier ones
    ///
    /// Hooks added before are dropped; handles from an earlier registration
    /// no longer reach the registry.
    pub fn register<T>(&self, options: RemovableOptions) -> RemovalResult<SharedHooks<T>>
    where
        T: Send + Sync + 'static,
    {
        let hooks: SharedHooks<T> = Arc::new(RwLock::new(HookRegistry::new()));
        match self.entries.entry(TypeId::of::<T>()) {
            Entry::Occupied(mut entry) => {
                let options = options.merge(&entry.get().options);
                options.check()?;
                debug!(
                    "Re-registering {} as removable (column: {}, validate: {})",
                    type_name::<T>(),
                    options.column_name(),
                    options.validate()
                );
                let registration = entry.get_mut();
                registration.options = Arc::new(options);
                registration.hooks = hooks.clone();
            }
            Entry::Vacant(entry) => {
                options.check()?;
                debug!(
                    "Registering {} as removable (column: {}, validate: {})",
                    type_name::<T>(),
                    options.column_name(),
                    options.validate()
                );
                entry.insert(Registration {
                    type_name: type_name::<T>(),
                    options: Arc::new(options),
                    hooks: hooks.clone(),
                });
            }
        }
        Ok(hooks)
    }

    pub fn is_registered<T: 'static>(&self) -> bool {
        self.entries.contains_key(&TypeId::of::<T>())
    }

    /// Options `T` was registered with
    pub fn options<T: 'static>(&self) -> RemovalResult<Arc<RemovableOptions>> {
        self.entries
            .get(&TypeId::of::<T>())
            .map(|registration| Arc::clone(&registration.options))
            .ok_or_else(not_registered::<T>)
    }

    pub fn hooks<T>(&self) -> RemovalResult<SharedHooks<T>>
    where
        T: Send + Sync + 'static,
    {
        let hooks = self
            .entries
            .get(&TypeId::of::<T>())
            .map(|registration| Arc::clone(&registration.hooks))
            .ok_or_else(not_registered::<T>)?;
        hooks
            .downcast::<RwLock<HookRegistry<T>>>()
            .map_err(|_| not_registered::<T>())
    }

    /// Append a hook to `T`'s chain for `event` and `timing`
    pub fn add_hook<T>(
        &self,
        event: RemovalEvent,
        timing: HookTiming,
        hook: Arc<dyn RemovalHook<T>>,
    ) -> RemovalResult<()>
    where
        T: Send + Sync + 'static,
    {
        let hooks = self.hooks::<T>()?;
        hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(event, timing, hook);
        Ok(())
    }

    /// Copy of the current chain, so no lock is held while hooks run
    pub fn hook_chain<T>(&self, event: RemovalEvent, timing: HookTiming) -> RemovalResult<HookChain<T>>
    where
        T: Send + Sync + 'static,
    {
        let hooks = self.hooks::<T>()?;
        let chain = hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .chain(event, timing)
            .clone();
        Ok(chain)
    }

    /// Names of all registered types
    pub fn registered_types(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.entries.iter().map(|entry| entry.type_name).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn not_registered<T>() -> RemovalError {
    RemovalError::NotRegistered {
        type_name: type_name::<T>(),
    }
}

/// Whether `T` has been registered with the global registry
pub fn is_removable<T: 'static>() -> bool {
    RemovableRegistry::global().is_registered::<T>()
}
