//! Removal lifecycle hooks
//!
//! Hooks run around `remove` and `unremove`, in registration order, and may
//! mutate the record. The first failing hook stops the chain.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

/// Which mutation a hook is attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemovalEvent {
    Remove,
    Unremove,
}

impl fmt::Display for RemovalEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RemovalEvent::Remove => write!(f, "remove"),
            RemovalEvent::Unremove => write!(f, "unremove"),
        }
    }
}

/// Whether a hook runs before the save or after it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookTiming {
    Before,
    After,
}

impl fmt::Display for HookTiming {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookTiming::Before => write!(f, "before"),
            HookTiming::After => write!(f, "after"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum HookError {
    Validation {
        message: String,
        hint: Option<String>,
    },
    Failed {
        message: String,
    },
    Halted {
        reason: String,
    },
}

impl HookError {
    pub fn validation(message: &str) -> Self {
        Self::Validation {
            message: message.to_string(),
            hint: None,
        }
    }

    pub fn validation_with_hint(message: &str, hint: &str) -> Self {
        Self::Validation {
            message: message.to_string(),
            hint: Some(hint.to_string()),
        }
    }

    pub fn failed(message: &str) -> Self {
        Self::Failed {
            message: message.to_string(),
        }
    }

    /// Stop the operation without it being an error in the hook itself
    pub fn halt(reason: &str) -> Self {
        Self::Halted {
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for HookError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HookError::Validation { message, hint } => {
                write!(f, "Validation error: {}", message)?;
                if let Some(hint) = hint {
                    write!(f, " (hint: {})", hint)?;
                }
                Ok(())
            }
            HookError::Failed { message } => write!(f, "Hook failed: {}", message),
            HookError::Halted { reason } => write!(f, "Halted: {}", reason),
        }
    }
}

impl std::error::Error for HookError {}

/// A callback run around a removal event
///
/// Plain closures `Fn(&mut T) -> Result<(), HookError>` implement this trait,
/// so only hooks that need to await have to implement it by hand.
#[async_trait]
pub trait RemovalHook<T>: Send + Sync {
    async fn call(&self, model: &mut T) -> Result<(), HookError>;
}

#[async_trait]
impl<T, F> RemovalHook<T> for F
where
    T: Send + 'static,
    F: Fn(&mut T) -> Result<(), HookError> + Send + Sync,
{
    async fn call(&self, model: &mut T) -> Result<(), HookError> {
        self(model)
    }
}

/// Share a closure as a hook
pub fn from_fn<T, F>(f: F) -> Arc<dyn RemovalHook<T>>
where
    T: Send + 'static,
    F: Fn(&mut T) -> Result<(), HookError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Ordered hooks for one event and timing
pub struct HookChain<T> {
    hooks: Vec<Arc<dyn RemovalHook<T>>>,
}

impl<T> HookChain<T> {
    pub fn new() -> Self {
        Self { hooks: Vec::new() }
    }

    pub fn push(&mut self, hook: Arc<dyn RemovalHook<T>>) {
        self.hooks.push(hook);
    }

    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }

    /// Run every hook in order, stopping at the first failure
    pub async fn run(&self, model: &mut T) -> Result<(), HookError> {
        for hook in &self.hooks {
            hook.call(model).await?;
        }
        Ok(())
    }
}

impl<T> Clone for HookChain<T> {
    fn clone(&self) -> Self {
        Self {
            hooks: self.hooks.clone(),
        }
    }
}

impl<T> Default for HookChain<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// All hook chains registered for one record type
pub struct HookRegistry<T> {
    before_remove: HookChain<T>,
    after_remove: HookChain<T>,
    before_unremove: HookChain<T>,
    after_unremove: HookChain<T>,
}

impl<T> HookRegistry<T> {
    pub fn new() -> Self {
        Self {
            before_remove: HookChain::new(),
            after_remove: HookChain::new(),
            before_unremove: HookChain::new(),
            after_unremove: HookChain::new(),
        }
    }

    pub fn chain(&self, event: RemovalEvent, timing: HookTiming) -> &HookChain<T> {
        match (event, timing) {
            (RemovalEvent::Remove, HookTiming::Before) => &self.before_remove,
            (RemovalEvent::Remove, HookTiming::After) => &self.after_remove,
            (RemovalEvent::Unremove, HookTiming::Before) => &self.before_unremove,
            (RemovalEvent::Unremove, HookTiming::After) => &self.after_unremove,
        }
    }

    fn chain_mut(&mut self, event: RemovalEvent, timing: HookTiming) -> &mut HookChain<T> {
        match (event, timing) {
            (RemovalEvent::Remove, HookTiming::Before) => &mut self.before_remove,
            (RemovalEvent::Remove, HookTiming::After) => &mut self.after_remove,
            (RemovalEvent::Unremove, HookTiming::Before) => &mut self.before_unremove,
            (RemovalEvent::Unremove, HookTiming::After) => &mut self.after_unremove,
        }
    }

    pub fn register(&mut self, event: RemovalEvent, timing: HookTiming, hook: Arc<dyn RemovalHook<T>>) {
        self.chain_mut(event, timing).push(hook);
    }

    pub fn hook_count(&self, event: RemovalEvent, timing: HookTiming) -> usize {
        self.chain(event, timing).len()
    }
}

impl<T> Default for HookRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
