//! Data-access backends under comparison.
//!
//! Each backend wraps one library and exposes the same capability set over
//! the shared fixture store, so any scenario can run against all of them.
//!
//! | Backend | Library | Style |
//! |---|---|---|
//! | [`SeaOrmBackend`] | sea-orm | fluent entity queries |
//! | [`SeaQueryBackend`] | sea-query | SQL builder |
//! | [`SqlxSessionBackend`] | sqlx | mapped rows with a session identity map |

pub mod seaorm;
pub mod seaquery;
pub mod session;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{CountTarget, OrderFilter, UserFilter, UserMutation, UserOrdering, UserRow};
use crate::store::FixtureStore;

pub use seaorm::SeaOrmBackend;
pub use seaquery::SeaQueryBackend;
pub use session::SqlxSessionBackend;

/// Identifies a backend in registries and reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    SeaOrm,
    SeaQuery,
    SqlxSession,
}

impl BackendKind {
    pub const ALL: [BackendKind; 3] = [
        BackendKind::SeaOrm,
        BackendKind::SeaQuery,
        BackendKind::SqlxSession,
    ];

    pub fn name(self) -> &'static str {
        match self {
            BackendKind::SeaOrm => "sea-orm",
            BackendKind::SeaQuery => "sea-query",
            BackendKind::SqlxSession => "sqlx-session",
        }
    }

    /// Open this backend on the shared store.
    pub fn open(self, store: &FixtureStore) -> Box<dyn BackendAdapter> {
        match self {
            BackendKind::SeaOrm => Box::new(SeaOrmBackend::new(store)),
            BackendKind::SeaQuery => Box::new(SeaQueryBackend::new(store)),
            BackendKind::SqlxSession => Box::new(SqlxSessionBackend::new(store)),
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for BackendKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        BackendKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| Error::Config(format!("unknown backend: {}", s)))
    }
}

/// Open every requested backend on the shared store.
pub fn open_all(store: &FixtureStore, kinds: &[BackendKind]) -> Vec<Box<dyn BackendAdapter>> {
    kinds.iter().map(|kind| kind.open(store)).collect()
}

/// Capability set every backend implements with identical semantics.
///
/// Mutating methods run inside a transaction: committed on success, rolled
/// back before the error is returned otherwise.
pub trait BackendAdapter {
    fn kind(&self) -> BackendKind;

    /// Fetch one user by primary key.
    fn select_by_key(&mut self, key: &str) -> Result<Option<UserRow>>;

    /// Users matching `filter`, optionally ordered and capped.
    fn select_filtered(
        &mut self,
        filter: &UserFilter,
        order: Option<UserOrdering>,
        limit: Option<u64>,
    ) -> Result<Vec<UserRow>>;

    /// Number of rows matching the target predicate.
    fn count(&mut self, target: &CountTarget) -> Result<u64>;

    /// Users owning at least one order matching `filter`.
    fn join_filtered(
        &mut self,
        filter: &OrderFilter,
        distinct: bool,
        limit: Option<u64>,
    ) -> Result<Vec<UserRow>>;

    fn insert_one(&mut self, user: &UserRow) -> Result<u64>;

    /// Insert all users atomically. `batched` sends one multi-row statement,
    /// otherwise one statement per row.
    fn insert_batch(&mut self, users: &[UserRow], batched: bool) -> Result<u64>;

    fn update_by_key(&mut self, key: &str, mutation: &UserMutation) -> Result<u64>;

    fn update_by_predicate(&mut self, filter: &UserFilter, mutation: &UserMutation)
        -> Result<u64>;

    fn delete_by_predicate(&mut self, filter: &UserFilter) -> Result<u64>;

    /// Drop any backend-local result cache. No-op for cacheless backends.
    fn reset_local_cache(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_names_round_trip() {
        for kind in BackendKind::ALL {
            assert_eq!(kind.name().parse::<BackendKind>().unwrap(), kind);
        }
        assert!("hibernate".parse::<BackendKind>().is_err());
    }
}
