//! The `Removable` behavior
//!
//! Opt a model in with `impl Removable for Post {}` and register it once at
//! startup:
//!
//! ```ignore
//! Post::register(RemovableOptions::default())?
//!     .before_remove(|post: &mut Post| {
//!         post.title.push_str(" (removed)");
//!         Ok(())
//!     });
//!
//! post.remove(&pool, None).await?;
//! let visible = Post::present()?.get(&pool).await?;
//! ```
//!
//! `remove` and `unremove` run in one transaction: before hooks, marker
//! assignment, save, after hooks, then commit. Any failure rolls the
//! transaction back. The in-memory marker is left as assigned.

use std::sync::{Arc, PoisonError};

use chrono::{DateTime, Utc};
use removable_orm::backends::DatabasePool;
use removable_orm::error::ModelError;
use removable_orm::model::{CrudOperations, Model, QueryMethods, SaveOptions};
use removable_orm::query::QueryBuilder;
use removable_orm::transaction::Transaction;
use tracing::{debug, warn};

use crate::error::{RemovalError, RemovalResult};
use crate::hooks::{from_fn, HookChain, HookError, HookTiming, RemovalEvent, RemovalHook};
use crate::options::RemovableOptions;
use crate::registry::{RemovableRegistry, SharedHooks};
use crate::scopes::RemovableScopes;

/// Soft deletion for a model
pub trait Removable: Model + Sized + 'static {
    /// Register this type
    ///
    /// Registering again merges the new options over the earlier ones and
    /// starts with no hooks.
    fn register(options: RemovableOptions) -> RemovalResult<RemovableHandle<Self>> {
        let hooks = RemovableRegistry::global().register::<Self>(options)?;
        Ok(RemovableHandle { hooks })
    }

    fn is_removable() -> bool {
        RemovableRegistry::global().is_registered::<Self>()
    }

    fn removable(&self) -> bool {
        Self::is_removable()
    }

    fn removable_options() -> RemovalResult<Arc<RemovableOptions>> {
        RemovableRegistry::global().options::<Self>()
    }

    fn before_remove<F>(hook: F) -> RemovalResult<()>
    where
        F: Fn(&mut Self) -> Result<(), HookError> + Send + Sync + 'static,
    {
        Self::add_hook(RemovalEvent::Remove, HookTiming::Before, hook)
    }

    fn after_remove<F>(hook: F) -> RemovalResult<()>
    where
        F: Fn(&mut Self) -> Result<(), HookError> + Send + Sync + 'static,
    {
        Self::add_hook(RemovalEvent::Remove, HookTiming::After, hook)
    }

    fn before_unremove<F>(hook: F) -> RemovalResult<()>
    where
        F: Fn(&mut Self) -> Result<(), HookError> + Send + Sync + 'static,
    {
        Self::add_hook(RemovalEvent::Unremove, HookTiming::Before, hook)
    }

    fn after_unremove<F>(hook: F) -> RemovalResult<()>
    where
        F: Fn(&mut Self) -> Result<(), HookError> + Send + Sync + 'static,
    {
        Self::add_hook(RemovalEvent::Unremove, HookTiming::After, hook)
    }

    /// Append any hook, including async `RemovalHook` implementations
    fn add_hook<H>(event: RemovalEvent, timing: HookTiming, hook: H) -> RemovalResult<()>
    where
        H: RemovalHook<Self> + 'static,
    {
        RemovableRegistry::global().add_hook::<Self>(event, timing, Arc::new(hook))
    }

    /// Records whose marker is null
    fn present() -> RemovalResult<QueryBuilder<Self>> {
        Self::query().present()
    }

    /// Records whose marker is set
    fn removed() -> RemovalResult<QueryBuilder<Self>> {
        Self::query().removed()
    }

    /// Whether the in-memory marker is set; `false` for unregistered types
    fn is_removed(&self) -> bool {
        Self::removable_options()
            .and_then(|options| Ok(self.attribute(options.column_name())?))
            .map(|marker| !marker.is_null())
            .unwrap_or(false)
    }

    /// The in-memory marker as a timestamp
    fn removed_at(&self) -> Option<DateTime<Utc>> {
        let options = Self::removable_options().ok()?;
        let marker = self.attribute(options.column_name()).ok()?;
        serde_json::from_value(marker).ok()
    }

    /// Write the in-memory marker
    ///
    /// The default goes through `Model::set_attribute`, which rebuilds the
    /// record from its serialized fields and so resets fields the model does
    /// not serialize (`#[serde(skip)]`). Models carrying such state assign
    /// their marker field here instead.
    fn set_removal_marker(&mut self, column: &str, marker: Option<DateTime<Utc>>) -> RemovalResult<()> {
        let value = serde_json::to_value(marker).map_err(ModelError::from)?;
        self.set_attribute(column, value)?;
        Ok(())
    }

    /// Mark as removed; `Ok(false)` when validation or a hook rejects it
    async fn remove(&mut self, pool: &dyn DatabasePool, options: Option<SaveOptions>) -> RemovalResult<bool> {
        downgrade_save_failure(transition(self, pool, RemovalEvent::Remove, options).await)
    }

    /// Mark as removed; validation and hook failures are errors
    async fn remove_strict(&mut self, pool: &dyn DatabasePool, options: Option<SaveOptions>) -> RemovalResult<()> {
        transition(self, pool, RemovalEvent::Remove, options).await
    }

    /// Clear the removal marker; `Ok(false)` when validation or a hook rejects it
    async fn unremove(&mut self, pool: &dyn DatabasePool, options: Option<SaveOptions>) -> RemovalResult<bool> {
        downgrade_save_failure(transition(self, pool, RemovalEvent::Unremove, options).await)
    }

    /// Clear the removal marker; validation and hook failures are errors
    async fn unremove_strict(&mut self, pool: &dyn DatabasePool, options: Option<SaveOptions>) -> RemovalResult<()> {
        transition(self, pool, RemovalEvent::Unremove, options).await
    }
}

/// Returned by `Removable::register` to chain hook registration
pub struct RemovableHandle<T> {
    hooks: SharedHooks<T>,
}

impl<T: Removable> RemovableHandle<T> {
    fn push(self, event: RemovalEvent, timing: HookTiming, hook: Arc<dyn RemovalHook<T>>) -> Self {
        self.hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .register(event, timing, hook);
        self
    }

    pub fn before_remove<F>(self, hook: F) -> Self
    where
        F: Fn(&mut T) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.push(RemovalEvent::Remove, HookTiming::Before, from_fn(hook))
    }

    pub fn after_remove<F>(self, hook: F) -> Self
    where
        F: Fn(&mut T) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.push(RemovalEvent::Remove, HookTiming::After, from_fn(hook))
    }

    pub fn before_unremove<F>(self, hook: F) -> Self
    where
        F: Fn(&mut T) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.push(RemovalEvent::Unremove, HookTiming::Before, from_fn(hook))
    }

    pub fn after_unremove<F>(self, hook: F) -> Self
    where
        F: Fn(&mut T) -> Result<(), HookError> + Send + Sync + 'static,
    {
        self.push(RemovalEvent::Unremove, HookTiming::After, from_fn(hook))
    }

    pub fn hook<H>(self, event: RemovalEvent, timing: HookTiming, hook: H) -> Self
    where
        H: RemovalHook<T> + 'static,
    {
        self.push(event, timing, Arc::new(hook))
    }
}

fn downgrade_save_failure(result: RemovalResult<()>) -> RemovalResult<bool> {
    match result {
        Ok(()) => Ok(true),
        Err(error) if error.is_save_failure() => {
            debug!("Removal change rejected: {}", error);
            Ok(false)
        }
        Err(error) => Err(error),
    }
}

async fn transition<T: Removable>(
    model: &mut T,
    pool: &dyn DatabasePool,
    event: RemovalEvent,
    options: Option<SaveOptions>,
) -> RemovalResult<()> {
    let registry = RemovableRegistry::global();
    let config = registry.options::<T>()?;
    let before = registry.hook_chain::<T>(event, HookTiming::Before)?;
    let after = registry.hook_chain::<T>(event, HookTiming::After)?;

    let mut tx = Transaction::begin(pool).await?;
    debug!("{} {}({:?})", event, T::table_name(), model.primary_key());

    match apply(model, &mut tx, &config, event, options, &before, &after).await {
        Ok(()) => {
            tx.commit().await?;
            Ok(())
        }
        Err(error) => {
            debug!("{} on {} failed, rolling back: {}", event, T::table_name(), error);
            if let Err(rollback_error) = tx.rollback().await {
                warn!("Rollback after failed {} on {} failed: {}", event, T::table_name(), rollback_error);
            }
            Err(error)
        }
    }
}

async fn apply<T: Removable>(
    model: &mut T,
    tx: &mut Transaction,
    config: &RemovableOptions,
    event: RemovalEvent,
    options: Option<SaveOptions>,
    before: &HookChain<T>,
    after: &HookChain<T>,
) -> RemovalResult<()> {
    before
        .run(model)
        .await
        .map_err(|source| RemovalError::HookAborted {
            event,
            timing: HookTiming::Before,
            source,
        })?;

    // Assigned after the before hooks, overriding any marker they set
    let column = config.column_name();
    model.attribute(column)?;
    let marker = match event {
        RemovalEvent::Remove => Some(Utc::now()),
        RemovalEvent::Unremove => None,
    };
    model.set_removal_marker(column, marker)?;

    let save_options = options.unwrap_or_default().merge(config.save_defaults());
    model.save_strict_in(tx, Some(save_options)).await?;

    after
        .run(model)
        .await
        .map_err(|source| RemovalError::HookAborted {
            event,
            timing: HookTiming::After,
            source,
        })?;

    Ok(())
}
