//! Principal scoping and filter composition shared by every store.
//!
//! Records carry two identities: `created_by` (the acting principal) and
//! `owner` (the billing/isolation boundary). A [`Scope`] names exactly one of
//! them, and every public listing or lookup goes through it.

use sqlx::{QueryBuilder, Sqlite};
use tracing::debug;

/// Which principal column a query is restricted to, and the principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    CreatedBy(String),
    Owner(String),
}

impl Scope {
    pub fn created_by(principal: impl Into<String>) -> Self {
        Self::CreatedBy(principal.into())
    }

    pub fn owner(principal: impl Into<String>) -> Self {
        Self::Owner(principal.into())
    }

    pub const fn column(&self) -> &'static str {
        match self {
            Self::CreatedBy(_) => "created_by",
            Self::Owner(_) => "owner",
        }
    }

    pub fn principal(&self) -> &str {
        match self {
            Self::CreatedBy(principal) | Self::Owner(principal) => principal,
        }
    }
}

/// A typed predicate that can be ANDed onto a [`Select`].
pub trait Filter {
    fn apply(&self, select: &mut Select);
}

impl<T: Filter + ?Sized> Filter for &T {
    fn apply(&self, select: &mut Select) {
        (**self).apply(select);
    }
}

impl Filter for Scope {
    fn apply(&self, select: &mut Select) {
        select.eq(self.column(), self.principal());
    }
}

/// A `SELECT ... FROM ... WHERE ...` under construction. Predicates are
/// joined with `AND`; all values are bound, never interpolated.
pub struct Select {
    builder: QueryBuilder<'static, Sqlite>,
    has_where: bool,
}

impl Select {
    pub(crate) fn new(columns: &str, table: &str) -> Self {
        Self {
            builder: QueryBuilder::new(format!("SELECT {columns} FROM {table}")),
            has_where: false,
        }
    }

    /// Start a new predicate and return the builder to write it into.
    pub fn and(&mut self) -> &mut QueryBuilder<'static, Sqlite> {
        self.builder
            .push(if self.has_where { " AND " } else { " WHERE " });
        self.has_where = true;
        &mut self.builder
    }

    pub(crate) fn scoped(mut self, scope: &Scope) -> Self {
        scope.apply(&mut self);
        self
    }

    pub fn eq(&mut self, column: &str, value: impl Into<String>) -> &mut Self {
        self.and()
            .push(column)
            .push(" = ")
            .push_bind(value.into());
        self
    }

    pub(crate) fn matching(mut self, column: &str, value: impl Into<String>) -> Self {
        self.eq(column, value);
        self
    }

    pub(crate) fn filtered<F: Filter>(mut self, filters: &[F]) -> Self {
        for filter in filters {
            filter.apply(&mut self);
        }
        self
    }

    pub(crate) fn newest_first(mut self) -> Self {
        self.builder.push(" ORDER BY created_at DESC, id DESC");
        self
    }

    pub(crate) fn page(mut self, limit: Option<i64>, offset: Option<i64>) -> Self {
        // SQLite only accepts OFFSET after a LIMIT; -1 means unbounded.
        if limit.is_some() || offset.is_some() {
            self.builder.push(" LIMIT ").push_bind(limit.unwrap_or(-1));
        }
        if let Some(offset) = offset {
            self.builder.push(" OFFSET ").push_bind(offset);
        }
        self
    }

    pub(crate) fn into_builder(self) -> QueryBuilder<'static, Sqlite> {
        debug!(sql = self.builder.sql(), "composed select");
        self.builder
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_selects_its_column() {
        assert_eq!(Scope::created_by("alice").column(), "created_by");
        assert_eq!(Scope::owner("team-a").column(), "owner");
        assert_eq!(Scope::owner("team-a").principal(), "team-a");
    }

    #[test]
    fn predicates_are_joined_with_and() {
        let builder = Select::new("id", "bundles")
            .scoped(&Scope::owner("team-a"))
            .matching("name", "llm")
            .newest_first()
            .page(Some(10), Some(20))
            .into_builder();
        assert_eq!(
            builder.sql(),
            "SELECT id FROM bundles WHERE owner = ? AND name = ? \
             ORDER BY created_at DESC, id DESC LIMIT ? OFFSET ?"
        );
    }

    #[test]
    fn offset_without_limit_is_unbounded() {
        let builder = Select::new("id", "endpoints")
            .page(None, Some(5))
            .into_builder();
        assert_eq!(builder.sql(), "SELECT id FROM endpoints LIMIT ? OFFSET ?");
    }
}
