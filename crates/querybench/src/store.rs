//! Shared fixture store.
//!
//! Owns the single SQLite connection pool every backend runs against, the
//! tokio runtime that drives it, and the raw insert/delete paths used to
//! build fixtures. Fixture writes never go through a benchmarked backend, so
//! their cost is never attributed to one.

use std::path::PathBuf;
use std::sync::Arc;

use once_cell::sync::OnceCell;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use tokio::runtime::Runtime;

use crate::config::PoolConfig;
use crate::error::{Error, Result};
use crate::fixtures::GeneratedData;
use crate::model::{CountTarget, OrderFilter, OrderRow, UserFilter, UserRow};
use crate::schema;

/// Rows per transaction when populating fixtures.
const POPULATION_BATCH_SIZE: usize = 1_000;

/// File name of the database inside a temporary directory.
const DATABASE_FILE: &str = "querybench.db";

static GLOBAL: OnceCell<Arc<FixtureStore>> = OnceCell::new();

/// Initialize the process-wide store.
///
/// Call once at program entry. Later calls return the store created by the
/// first one and ignore `config`.
pub fn init_global(config: &PoolConfig) -> Result<Arc<FixtureStore>> {
    GLOBAL
        .get_or_try_init(|| {
            let store = FixtureStore::open(config)?;
            store.ensure_schema()?;
            Ok(Arc::new(store))
        })
        .cloned()
}

/// The process-wide store, if [`init_global`] has run.
pub fn global() -> Option<Arc<FixtureStore>> {
    GLOBAL.get().cloned()
}

/// Shared database, pool, and fixture primitives.
pub struct FixtureStore {
    rt: Arc<Runtime>,
    pool: SqlitePool,
    path: PathBuf,
    schema_path: Option<PathBuf>,
    schema_applied: OnceCell<usize>,
    _dir: Option<tempfile::TempDir>,
}

impl FixtureStore {
    /// Open the pool described by `config`.
    ///
    /// The schema is not applied; see [`FixtureStore::ensure_schema`].
    pub fn open(config: &PoolConfig) -> Result<Self> {
        config.validate()?;

        let rt = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("querybench-io")
            .enable_all()
            .build()
            .map_err(Error::Runtime)?;

        let (path, dir) = match &config.database_path {
            Some(path) => (path.clone(), None),
            None => {
                let dir = tempfile::tempdir().map_err(Error::Runtime)?;
                (dir.path().join(DATABASE_FILE), Some(dir))
            }
        };

        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(false);

        let pool = rt
            .block_on(
                SqlitePoolOptions::new()
                    .max_connections(config.max_connections)
                    .min_connections(config.min_idle)
                    .acquire_timeout(config.acquire_timeout)
                    .connect_with(options),
            )
            .map_err(Error::Pool)?;

        tracing::info!(
            path = %path.display(),
            max_connections = config.max_connections,
            min_idle = config.min_idle,
            "connection pool ready"
        );

        Ok(Self {
            rt: Arc::new(rt),
            pool,
            path,
            schema_path: config.schema_path.clone(),
            schema_applied: OnceCell::new(),
            _dir: dir,
        })
    }

    /// Open a store and apply the schema.
    pub fn with_schema(config: &PoolConfig) -> Result<Self> {
        let store = Self::open(config)?;
        store.ensure_schema()?;
        Ok(store)
    }

    /// Runtime driving the async libraries.
    pub fn runtime(&self) -> Arc<Runtime> {
        self.rt.clone()
    }

    /// The shared pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Database file backing the pool.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Apply the schema script. Runs at most once per store.
    ///
    /// Returns the number of statements executed.
    pub fn ensure_schema(&self) -> Result<usize> {
        self.schema_applied
            .get_or_try_init(|| {
                let script = schema::load_script(self.schema_path.as_deref())?;
                let statements = schema::split_statements(&script);
                self.rt.block_on(async {
                    for stmt in &statements {
                        sqlx::query(stmt)
                            .execute(&self.pool)
                            .await
                            .map_err(|e| Error::Schema(format!("{}: {}", stmt, e)))?;
                    }
                    Ok::<_, Error>(())
                })?;
                tracing::info!(statements = statements.len(), "schema applied");
                Ok(statements.len())
            })
            .copied()
    }

    /// Delete every row, orders first.
    pub fn purge_all(&self) -> Result<()> {
        self.rt.block_on(async {
            let mut tx = self.pool.begin().await?;
            sqlx::query("DELETE FROM t_order").execute(&mut *tx).await?;
            sqlx::query("DELETE FROM t_user").execute(&mut *tx).await?;
            tx.commit().await
        })
        .map_err(|e| Error::Fixture(format!("purge failed: {}", e)))?;
        tracing::debug!("fixture purged");
        Ok(())
    }

    /// Insert users directly, in chunked transactions.
    pub fn bulk_insert_users(&self, users: &[UserRow]) -> Result<()> {
        self.rt
            .block_on(async {
                for chunk in users.chunks(POPULATION_BATCH_SIZE) {
                    let mut tx = self.pool.begin().await?;
                    for user in chunk {
                        sqlx::query(
                            "INSERT INTO t_user (id, username, email, age, phone, address) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        )
                        .bind(&user.id)
                        .bind(&user.username)
                        .bind(&user.email)
                        .bind(user.age)
                        .bind(&user.phone)
                        .bind(&user.address)
                        .execute(&mut *tx)
                        .await?;
                    }
                    tx.commit().await?;
                }
                Ok::<_, sqlx::Error>(())
            })
            .map_err(|e| Error::Fixture(format!("user insert failed: {}", e)))
    }

    /// Insert orders directly, in chunked transactions.
    pub fn bulk_insert_orders(&self, orders: &[OrderRow]) -> Result<()> {
        self.rt
            .block_on(async {
                for chunk in orders.chunks(POPULATION_BATCH_SIZE) {
                    let mut tx = self.pool.begin().await?;
                    for order in chunk {
                        sqlx::query(
                            "INSERT INTO t_order (id, user_id, order_no, amount, status, remark) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                        )
                        .bind(&order.id)
                        .bind(&order.user_id)
                        .bind(&order.order_no)
                        .bind(order.amount.cents())
                        .bind(order.status)
                        .bind(&order.remark)
                        .execute(&mut *tx)
                        .await?;
                    }
                    tx.commit().await?;
                }
                Ok::<_, sqlx::Error>(())
            })
            .map_err(|e| Error::Fixture(format!("order insert failed: {}", e)))
    }

    /// Rows in `table` (`t_user` or `t_order`).
    pub fn count_rows(&self, table: &str) -> Result<u64> {
        let sql = match table {
            "t_user" => "SELECT COUNT(*) FROM t_user",
            "t_order" => "SELECT COUNT(*) FROM t_order",
            other => return Err(Error::Fixture(format!("unknown table {}", other))),
        };
        let count: i64 = self
            .rt
            .block_on(sqlx::query_scalar(sql).fetch_one(&self.pool))
            .map_err(|e| Error::Fixture(format!("cannot count {}: {}", table, e)))?;
        Ok(count as u64)
    }

    /// Count matching rows directly, bypassing every backend.
    pub fn count(&self, target: &CountTarget) -> Result<u64> {
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

    /// Replace the store contents with `data` and verify the row counts.
    pub fn populate(&self, data: &GeneratedData) -> Result<()> {
        self.purge_all()?;
        self.bulk_insert_users(&data.users)?;
        self.bulk_insert_orders(&data.orders)?;

        let users = self.count_rows("t_user")?;
        let orders = self.count_rows("t_order")?;
        if users != data.users.len() as u64 || orders != data.orders.len() as u64 {
            return Err(Error::Fixture(format!(
                "expected {} users and {} orders, found {} and {}",
                data.users.len(),
                data.orders.len(),
                users,
                orders
            )));
        }

        tracing::debug!(users, orders, "fixture populated");
        Ok(())
    }

    /// Close every pooled connection. Call once at program exit.
    pub fn close(&self) {
        self.rt.block_on(self.pool.close());
        tracing::info!("connection pool closed");
    }
}

/// Append `WHERE` clauses for a user filter.
pub(crate) fn push_user_filter(qb: &mut QueryBuilder<'_, Sqlite>, filter: &UserFilter) {
    let mut sep = " WHERE ";
    if let Some(min) = filter.min_age {
        qb.push(sep).push("age >= ").push_bind(min);
        sep = " AND ";
    }
    if let Some(max) = filter.max_age {
        qb.push(sep).push("age <= ").push_bind(max);
    }
}

/// Append `WHERE` clauses for an order filter, optionally qualified by a
/// table alias.
pub(crate) fn push_order_filter(
    qb: &mut QueryBuilder<'_, Sqlite>,
    filter: &OrderFilter,
    alias: Option<&str>,
) {
    let prefix = alias.map(|a| format!("{}.", a)).unwrap_or_default();
    let mut sep = " WHERE ";
    if let Some(status) = filter.status {
        qb.push(sep).push(format!("{}status = ", prefix)).push_bind(status);
        sep = " AND ";
    }
    if let Some(min) = filter.min_amount {
        qb.push(sep)
            .push(format!("{}amount >= ", prefix))
            .push_bind(min.cents());
    }
}
