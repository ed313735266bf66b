//! sea-query backend: hand-built SQL statements, rows mapped by column name.

use std::sync::Arc;

use sea_orm::sea_query::{
    Alias, Asterisk, ConditionalStatement, DeleteStatement, Expr, Func, InsertStatement, Order,
    Query, SelectStatement, SimpleExpr, UpdateStatement,
};
use sea_orm::{
    ConnectionTrait, DatabaseConnection, DbErr, DeriveIden, QueryResult, SqlxSqliteConnector,
    StatementBuilder, TransactionTrait,
};
use tokio::runtime::Runtime;

use crate::error::{Error, Result};
use crate::model::{
    CountTarget, OrderFilter, UserColumn, UserFilter, UserMutation, UserOrdering, UserRow,
};
use crate::store::FixtureStore;

use super::seaorm::finish;
use super::{BackendAdapter, BackendKind};

#[derive(DeriveIden, Clone, Copy)]
enum TUser {
    #[sea_orm(iden = "t_user")]
    Table,
    Id,
    Username,
    Email,
    Age,
    Phone,
    Address,
}

#[derive(DeriveIden, Clone, Copy)]
enum TOrder {
    #[sea_orm(iden = "t_order")]
    Table,
    UserId,
    Amount,
    Status,
}

const USER_COLUMNS: [TUser; 6] = [
    TUser::Id,
    TUser::Username,
    TUser::Email,
    TUser::Age,
    TUser::Phone,
    TUser::Address,
];

const COUNT_ALIAS: &str = "cnt";

fn user_column(column: UserColumn) -> TUser {
    match column {
        UserColumn::Id => TUser::Id,
        UserColumn::Username => TUser::Username,
        UserColumn::Age => TUser::Age,
    }
}

fn user_predicates(filter: &UserFilter) -> Vec<SimpleExpr> {
    let mut exprs = Vec::with_capacity(2);
    if let Some(min) = filter.min_age {
        exprs.push(Expr::col((TUser::Table, TUser::Age)).gte(min));
    }
    if let Some(max) = filter.max_age {
        exprs.push(Expr::col((TUser::Table, TUser::Age)).lte(max));
    }
    exprs
}

fn order_predicates(filter: &OrderFilter) -> Vec<SimpleExpr> {
    let mut exprs = Vec::with_capacity(2);
    if let Some(status) = filter.status {
        exprs.push(Expr::col((TOrder::Table, TOrder::Status)).eq(status));
    }
    if let Some(min) = filter.min_amount {
        exprs.push(Expr::col((TOrder::Table, TOrder::Amount)).gte(min.cents()));
    }
    exprs
}

fn apply<S: ConditionalStatement>(stmt: &mut S, predicates: Vec<SimpleExpr>) {
    for expr in predicates {
        stmt.and_where(expr);
    }
}

fn user_from_row(row: &QueryResult) -> std::result::Result<UserRow, DbErr> {
    Ok(UserRow {
        id: row.try_get("", "id")?,
        username: row.try_get("", "username")?,
        email: row.try_get("", "email")?,
        age: row.try_get("", "age")?,
        phone: row.try_get("", "phone")?,
        address: row.try_get("", "address")?,
    })
}

fn insert_statement(rows: &[UserRow]) -> Result<InsertStatement> {
    let mut stmt = Query::insert();
    stmt.into_table(TUser::Table).columns(USER_COLUMNS);
    for row in rows {
        stmt.values([
            row.id.clone().into(),
            row.username.clone().into(),
            row.email.clone().into(),
            row.age.into(),
            row.phone.clone().into(),
            row.address.clone().into(),
        ])
        .map_err(|e| Error::QueryBuild(e.to_string()))?;
    }
    Ok(stmt)
}

fn update_statement(predicates: Vec<SimpleExpr>, mutation: &UserMutation) -> UpdateStatement {
    let mut stmt = Query::update();
    stmt.table(TUser::Table).value(TUser::Age, mutation.age);
    apply(&mut stmt, predicates);
    stmt
}

fn delete_statement(filter: &UserFilter) -> DeleteStatement {
    let mut stmt = Query::delete();
    stmt.from_table(TUser::Table);
    apply(&mut stmt, user_predicates(filter));
    stmt
}

/// Backend building every statement with sea-query.
pub struct SeaQueryBackend {
    db: DatabaseConnection,
    rt: Arc<Runtime>,
}

impl SeaQueryBackend {
    pub fn new(store: &FixtureStore) -> Self {
        let db = SqlxSqliteConnector::from_sqlx_sqlite_pool(store.pool().clone());
        Self {
            db,
            rt: store.runtime(),
        }
    }

    fn fetch_users(&self, stmt: &SelectStatement) -> Result<Vec<UserRow>> {
        let stmt = self.db.get_database_backend().build(stmt);
        let rows = self.rt.block_on(self.db.query_all(stmt))?;
        let users = rows
            .iter()
            .map(user_from_row)
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(users)
    }

    fn fetch_count(&self, stmt: &SelectStatement) -> Result<u64> {
        let stmt = self.db.get_database_backend().build(stmt);
        let row = self.rt.block_on(self.db.query_one(stmt))?;
        let count: i64 = match row {
            Some(row) => row.try_get("", COUNT_ALIAS)?,
            None => 0,
        };
        Ok(count as u64)
    }

    /// Run one write statement in its own transaction.
    fn execute_write<S: StatementBuilder>(&self, stmt: &S) -> Result<u64> {
        let stmt = self.db.get_database_backend().build(stmt);
        self.rt.block_on(async {
            let txn = self.db.begin().await?;
            let result = txn.execute(stmt).await.map(|res| res.rows_affected());
            finish(txn, result).await
        })
    }
}

impl BackendAdapter for SeaQueryBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::SeaQuery
    }

    fn select_by_key(&mut self, key: &str) -> Result<Option<UserRow>> {
        let stmt = Query::select()
            .columns(USER_COLUMNS)
            .from(TUser::Table)
            .and_where(Expr::col(TUser::Id).eq(key))
            .to_owned();
        Ok(self.fetch_users(&stmt)?.into_iter().next())
    }

    fn select_filtered(
        &mut self,
        filter: &UserFilter,
        order: Option<UserOrdering>,
        limit: Option<u64>,
    ) -> Result<Vec<UserRow>> {
        let mut stmt = Query::select();
        stmt.columns(USER_COLUMNS).from(TUser::Table);
        apply(&mut stmt, user_predicates(filter));
        if let Some(ordering) = order {
            let direction = if ordering.descending {
                Order::Desc
            } else {
                Order::Asc
            };
            stmt.order_by(user_column(ordering.column), direction);
        }
        if let Some(limit) = limit {
            stmt.limit(limit);
        }
        self.fetch_users(&stmt)
    }

    fn count(&mut self, target: &CountTarget) -> Result<u64> {
        let mut stmt = Query::select();
        stmt.expr_as(Func::count(Expr::col(Asterisk)), Alias::new(COUNT_ALIAS));
        match target {
            CountTarget::Users(filter) => {
                stmt.from(TUser::Table);
                apply(&mut stmt, user_predicates(filter));
            }
            CountTarget::Orders(filter) => {
                stmt.from(TOrder::Table);
                apply(&mut stmt, order_predicates(filter));
            }
        }
        self.fetch_count(&stmt)
    }

    fn join_filtered(
        &mut self,
        filter: &OrderFilter,
        distinct: bool,
        limit: Option<u64>,
    ) -> Result<Vec<UserRow>> {
        let mut stmt = Query::select();
        stmt.columns(USER_COLUMNS.map(|col| (TUser::Table, col)))
            .from(TUser::Table)
            .inner_join(
                TOrder::Table,
                Expr::col((TUser::Table, TUser::Id)).equals((TOrder::Table, TOrder::UserId)),
            );
        apply(&mut stmt, order_predicates(filter));
        if distinct {
            stmt.distinct();
        }
        if let Some(limit) = limit {
            stmt.limit(limit);
        }
        self.fetch_users(&stmt)
    }

    fn insert_one(&mut self, row: &UserRow) -> Result<u64> {
        let stmt = insert_statement(std::slice::from_ref(row))?;
        self.execute_write(&stmt)
    }

    fn insert_batch(&mut self, rows: &[UserRow], batched: bool) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        if batched {
            let stmt = insert_statement(rows)?;
            return self.execute_write(&stmt);
        }

        let backend = self.db.get_database_backend();
        let statements = rows
            .iter()
            .map(|row| insert_statement(std::slice::from_ref(row)).map(|s| backend.build(&s)))
            .collect::<Result<Vec<_>>>()?;
        self.rt.block_on(async {
            let txn = self.db.begin().await?;
            let result = async {
                let mut inserted = 0;
                for stmt in statements {
                    inserted += txn.execute(stmt).await?.rows_affected();
                }
                Ok::<u64, DbErr>(inserted)
            }
            .await;
            finish(txn, result).await
        })
    }

    fn update_by_key(&mut self, key: &str, mutation: &UserMutation) -> Result<u64> {
        let stmt = update_statement(vec![Expr::col(TUser::Id).eq(key)], mutation);
        self.execute_write(&stmt)
    }

    fn update_by_predicate(
        &mut self,
        filter: &UserFilter,
        mutation: &UserMutation,
    ) -> Result<u64> {
        let stmt = update_statement(user_predicates(filter), mutation);
        self.execute_write(&stmt)
    }

    fn delete_by_predicate(&mut self, filter: &UserFilter) -> Result<u64> {
        let stmt = delete_statement(filter);
        self.execute_write(&stmt)
    }

    fn reset_local_cache(&mut self) {}
}

#[cfg(test)]
mod tests {
    use sea_orm::sea_query::SqliteQueryBuilder;

    use super::*;
    use crate::config::PoolConfig;
    use crate::fixtures::Dataset;

    #[test]
    fn test_count_statement_shape() {
        let mut stmt = Query::select();
        stmt.expr_as(Func::count(Expr::col(Asterisk)), Alias::new(COUNT_ALIAS))
            .from(TUser::Table);
        apply(&mut stmt, user_predicates(&UserFilter::age_between(25, 35)));
        let sql = stmt.to_string(SqliteQueryBuilder);
        assert!(sql.contains(r#"FROM "t_user""#), "{}", sql);
        assert!(sql.contains(r#""age" >= 25"#), "{}", sql);
        assert!(sql.contains(r#""age" <= 35"#), "{}", sql);
    }

    #[test]
    fn test_update_by_key_touches_one_row() {
        let store = FixtureStore::with_schema(&PoolConfig::new().with_min_idle(1)).unwrap();
        let data = Dataset::users_linear(10).generate(4);
        store.populate(&data).unwrap();
        let mut backend = SeaQueryBackend::new(&store);

        let key = &data.users[3].id;
        assert_eq!(backend.update_by_key(key, &UserMutation::set_age(99)).unwrap(), 1);
        assert_eq!(backend.select_by_key(key).unwrap().unwrap().age, 99);
        assert_eq!(backend.update_by_key("missing", &UserMutation::set_age(1)).unwrap(), 0);
    }
}
