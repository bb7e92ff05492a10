//! `present` / `removed` query scopes

use removable_orm::query::QueryBuilder;

use crate::error::RemovalResult;
use crate::registry::RemovableRegistry;

/// Removal scopes on a model's query builder
///
/// The marker column comes from the model's registration, so scopes on an
/// unregistered model fail with `NotRegistered`.
pub trait RemovableScopes: Sized {
    /// Restrict to records whose marker is null
    fn present(self) -> RemovalResult<Self>;

    /// Restrict to records whose marker is set
    fn removed(self) -> RemovalResult<Self>;
}

impl<M: 'static> RemovableScopes for QueryBuilder<M> {
    fn present(self) -> RemovalResult<Self> {
        let options = RemovableRegistry::global().options::<M>()?;
        Ok(self.where_null(options.column_name()))
    }

    fn removed(self) -> RemovalResult<Self> {
        let options = RemovableRegistry::global().options::<M>()?;
        Ok(self.where_not_null(options.column_name()))
    }
}
