//! sqlx backend with a session identity map.
//!
//! Rows are mapped with `FromRow` and every loaded user is tracked by key,
//! the way an ORM session tracks managed entities. A key already in the map
//! is served from it without touching the database, and a row loaded by a
//! query resolves to the tracked instance. The map lives until
//! [`BackendAdapter::reset_local_cache`] clears it.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::{QueryBuilder, Sqlite, SqlitePool, Transaction};
use tokio::runtime::Runtime;

use crate::error::Result;
use crate::model::{CountTarget, OrderFilter, UserFilter, UserMutation, UserOrdering, UserRow};
use crate::store::{push_order_filter, push_user_filter, FixtureStore};

use super::{BackendAdapter, BackendKind};

const SELECT_USERS: &str = "SELECT id, username, email, age, phone, address FROM t_user";

const INSERT_USERS: &str = "INSERT INTO t_user (id, username, email, age, phone, address) ";

async fn finish<T>(
    tx: Transaction<'static, Sqlite>,
    result: std::result::Result<T, sqlx::Error>,
) -> Result<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                tracing::warn!(error = %rollback, "sqlx rollback failed");
            }
            Err(err.into())
        }
    }
}

fn push_limit(qb: &mut QueryBuilder<'_, Sqlite>, limit: Option<u64>) {
    if let Some(limit) = limit {
        qb.push(" LIMIT ").push_bind(limit as i64);
    }
}

fn insert_users<'a>(rows: &'a [UserRow]) -> QueryBuilder<'a, Sqlite> {
    let mut qb = QueryBuilder::new(INSERT_USERS);
    qb.push_values(rows, |mut b, user| {
        b.push_bind(&user.id)
            .push_bind(&user.username)
            .push_bind(&user.email)
            .push_bind(user.age)
            .push_bind(&user.phone)
            .push_bind(&user.address);
    });
    qb
}

/// Backend mapping rows through sqlx with session-scoped caching.
pub struct SqlxSessionBackend {
    pool: SqlitePool,
    rt: Arc<Runtime>,
    identity: HashMap<String, UserRow>,
}

impl SqlxSessionBackend {
    pub fn new(store: &FixtureStore) -> Self {
        Self {
            pool: store.pool().clone(),
            rt: store.runtime(),
            identity: HashMap::new(),
        }
    }

    /// Users currently tracked by the session.
    pub fn tracked(&self) -> usize {
        self.identity.len()
    }

    /// Resolve loaded rows against the identity map.
    fn track(&mut self, rows: Vec<UserRow>) -> Vec<UserRow> {
        rows.into_iter()
            .map(|row| {
                self.identity
                    .entry(row.id.clone())
                    .or_insert(row)
                    .clone()
            })
            .collect()
    }

    fn execute_write(&self, mut qb: QueryBuilder<'_, Sqlite>) -> Result<u64> {
        self.rt.block_on(async {
            let mut tx = self.pool.begin().await?;
            let result = qb
                .build()
                .execute(&mut *tx)
                .await
                .map(|res| res.rows_affected());
            finish(tx, result).await
        })
    }
}

impl BackendAdapter for SqlxSessionBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::SqlxSession
    }

    fn select_by_key(&mut self, key: &str) -> Result<Option<UserRow>> {
        if let Some(user) = self.identity.get(key) {
            return Ok(Some(user.clone()));
        }

        let sql = format!("{} WHERE id = ?1", SELECT_USERS);
        let row = self.rt.block_on(
            sqlx::query_as::<_, UserRow>(&sql)
                .bind(key)
                .fetch_optional(&self.pool),
        )?;
        Ok(row.map(|row| {
            self.identity
                .entry(row.id.clone())
                .or_insert(row)
                .clone()
        }))
    }

    fn select_filtered(
        &mut self,
        filter: &UserFilter,
        order: Option<UserOrdering>,
        limit: Option<u64>,
    ) -> Result<Vec<UserRow>> {
        let mut qb = QueryBuilder::new(SELECT_USERS);
        push_user_filter(&mut qb, filter);
        if let Some(ordering) = order {
            qb.push(" ORDER BY ")
                .push(ordering.column.as_str())
                .push(if ordering.descending { " DESC" } else { " ASC" });
        }
        push_limit(&mut qb, limit);

        let rows = self
            .rt
            .block_on(qb.build_query_as::<UserRow>().fetch_all(&self.pool))?;
        Ok(self.track(rows))
    }

    fn count(&mut self, target: &CountTarget) -> Result<u64> {
        let mut qb = match target {
            CountTarget::Users(filter) => {
                let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM t_user");
                push_user_filter(&mut qb, filter);
                qb
            }
            CountTarget::Orders(filter) => {
                let mut qb = QueryBuilder::new("SELECT COUNT(*) FROM t_order");
                push_order_filter(&mut qb, filter, None);
                qb
            }
        };
        let count: i64 = self
            .rt
            .block_on(qb.build_query_scalar().fetch_one(&self.pool))?;
        Ok(count as u64)
    }

    fn join_filtered(
        &mut self,
        filter: &OrderFilter,
        distinct: bool,
        limit: Option<u64>,
    ) -> Result<Vec<UserRow>> {
        let mut qb = QueryBuilder::new("SELECT ");
        if distinct {
            qb.push("DISTINCT ");
        }
        qb.push(
            "u.id, u.username, u.email, u.age, u.phone, u.address \
             FROM t_user u INNER JOIN t_order o ON u.id = o.user_id",
        );
        push_order_filter(&mut qb, filter, Some("o"));
        push_limit(&mut qb, limit);

        let rows = self
            .rt
            .block_on(qb.build_query_as::<UserRow>().fetch_all(&self.pool))?;
        Ok(self.track(rows))
    }

    fn insert_one(&mut self, user: &UserRow) -> Result<u64> {
        let inserted = self.execute_write(insert_users(std::slice::from_ref(user)))?;
        self.identity.insert(user.id.clone(), user.clone());
        Ok(inserted)
    }

    fn insert_batch(&mut self, users: &[UserRow], batched: bool) -> Result<u64> {
        if users.is_empty() {
            return Ok(0);
        }

        let inserted = if batched {
            self.execute_write(insert_users(users))?
        } else {
            self.rt.block_on(async {
                let mut tx = self.pool.begin().await?;
                let result = async {
                    let mut inserted = 0;
                    for user in users {
                        inserted += insert_users(std::slice::from_ref(user))
                            .build()
                            .execute(&mut *tx)
                            .await?
                            .rows_affected();
                    }
                    Ok::<u64, sqlx::Error>(inserted)
                }
                .await;
                finish(tx, result).await
            })?
        };

        for user in users {
            self.identity.insert(user.id.clone(), user.clone());
        }
        Ok(inserted)
    }

    fn update_by_key(&mut self, key: &str, mutation: &UserMutation) -> Result<u64> {
        let mut qb = QueryBuilder::new("UPDATE t_user SET age = ");
        qb.push_bind(mutation.age).push(" WHERE id = ").push_bind(key);
        let updated = self.execute_write(qb)?;

        if let Some(user) = self.identity.get_mut(key) {
            user.age = mutation.age;
        }
        Ok(updated)
    }

    fn update_by_predicate(
        &mut self,
        filter: &UserFilter,
        mutation: &UserMutation,
    ) -> Result<u64> {
        let mut qb = QueryBuilder::new("UPDATE t_user SET age = ");
        qb.push_bind(mutation.age);
        push_user_filter(&mut qb, filter);
        let updated = self.execute_write(qb)?;

        // Bulk statements bypass tracked instances.
        self.identity.clear();
        Ok(updated)
    }

    fn delete_by_predicate(&mut self, filter: &UserFilter) -> Result<u64> {
        let mut qb = QueryBuilder::new("DELETE FROM t_user");
        push_user_filter(&mut qb, filter);
        let deleted = self.execute_write(qb)?;

        self.identity.clear();
        Ok(deleted)
    }

    fn reset_local_cache(&mut self) {
        self.identity.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::fixtures::Dataset;

    fn populated(users: usize) -> (FixtureStore, Vec<String>) {
        let store = FixtureStore::with_schema(&PoolConfig::new().with_min_idle(1)).unwrap();
        let data = Dataset::users_linear(users).generate(9);
        store.populate(&data).unwrap();
        (store, data.user_keys())
    }

    #[test]
    fn test_repeated_lookup_is_served_from_session() {
        let (store, keys) = populated(5);
        let mut backend = SqlxSessionBackend::new(&store);

        let first = backend.select_by_key(&keys[2]).unwrap().unwrap();
        assert_eq!(backend.tracked(), 1);

        // Change the row behind the session's back.
        store
            .runtime()
            .block_on(
                sqlx::query("UPDATE t_user SET age = 77 WHERE id = ?1")
                    .bind(&keys[2])
                    .execute(store.pool()),
            )
            .unwrap();

        let cached = backend.select_by_key(&keys[2]).unwrap().unwrap();
        assert_eq!(cached, first);

        backend.reset_local_cache();
        assert_eq!(backend.tracked(), 0);
        let fresh = backend.select_by_key(&keys[2]).unwrap().unwrap();
        assert_eq!(fresh.age, 77);
    }

    #[test]
    fn test_bulk_update_clears_session() {
        let (store, keys) = populated(10);
        let mut backend = SqlxSessionBackend::new(&store);

        backend.select_filtered(&UserFilter::default(), None, None).unwrap();
        assert_eq!(backend.tracked(), 10);

        let updated = backend
            .update_by_predicate(&UserFilter::age_at_least(25), &UserMutation::set_age(88))
            .unwrap();
        assert_eq!(updated, 5);
        assert_eq!(backend.tracked(), 0);
        assert_eq!(backend.select_by_key(&keys[9]).unwrap().unwrap().age, 88);
    }

    #[test]
    fn test_failed_batch_leaves_session_untouched() {
        let (store, keys) = populated(3);
        let mut backend = SqlxSessionBackend::new(&store);

        let mut rows = Dataset::users_linear(3).generate(10).users;
        rows[1].id = keys[0].clone();
        for batched in [true, false] {
            assert!(backend.insert_batch(&rows, batched).is_err());
            assert_eq!(backend.tracked(), 0);
            assert_eq!(store.count_rows("t_user").unwrap(), 3);
        }
    }
}
