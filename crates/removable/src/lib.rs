//! # removable: soft deletion for removable-orm models
//!
//! Records are never deleted. Removing one stamps a nullable timestamp column
//! (`removed_at` by default) and unremoving clears it again. Registered types
//! get `present` / `removed` query scopes and before/after hooks around both
//! operations.
//!
//! ```ignore
//! use removable::{Removable, RemovableOptions};
//!
//! impl Removable for Post {}
//!
//! Post::register(RemovableOptions::new().with_validation(true))?;
//!
//! let mut post = Post::find_or_fail(&pool, 1).await?;
//! if !post.remove(&pool, None).await? {
//!     // rejected by validation or a hook
//! }
//! assert_eq!(Post::removed()?.count(&pool).await?, 1);
//! ```

pub mod error;
pub mod hooks;
pub mod options;
pub mod registry;
pub mod removable;
pub mod scopes;

pub use error::{RemovalError, RemovalResult};
pub use hooks::{from_fn, HookChain, HookError, HookRegistry, HookTiming, RemovalEvent, RemovalHook};
pub use options::{RemovableOptions, DEFAULT_COLUMN_NAME};
pub use registry::{is_removable, RemovableRegistry};
pub use removable::{Removable, RemovableHandle};
pub use scopes::RemovableScopes;

pub use removable_orm as orm;
