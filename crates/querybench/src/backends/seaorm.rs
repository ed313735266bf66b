//! sea-orm backend: fluent queries over generated entity types.

use std::sync::Arc;

use sea_orm::sea_query::Expr;
use sea_orm::{
    ColumnTrait, Condition, DatabaseConnection, DatabaseTransaction, DbErr, EntityTrait, Order,
    PaginatorTrait, QueryFilter, QueryOrder, QuerySelect, Set, SqlxSqliteConnector,
    TransactionTrait,
};
use tokio::runtime::Runtime;

use crate::error::Result;
use crate::model::{
    CountTarget, OrderFilter, UserColumn, UserFilter, UserMutation, UserOrdering, UserRow,
};
use crate::store::FixtureStore;

use super::{BackendAdapter, BackendKind};

pub mod user {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "t_user")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: String,
        pub username: String,
        pub email: String,
        pub age: i32,
        pub phone: String,
        pub address: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(has_many = "super::order::Entity")]
        Order,
    }

    impl Related<super::order::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::Order.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}

pub mod order {
    use sea_orm::entity::prelude::*;

    #[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel)]
    #[sea_orm(table_name = "t_order")]
    pub struct Model {
        #[sea_orm(primary_key, auto_increment = false)]
        pub id: String,
        pub user_id: String,
        pub order_no: String,
        /// Cents.
        pub amount: i64,
        pub status: i32,
        pub remark: String,
    }

    #[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
    pub enum Relation {
        #[sea_orm(
            belongs_to = "super::user::Entity",
            from = "Column::UserId",
            to = "super::user::Column::Id"
        )]
        User,
    }

    impl Related<super::user::Entity> for Entity {
        fn to() -> RelationDef {
            Relation::User.def()
        }
    }

    impl ActiveModelBehavior for ActiveModel {}
}

impl From<user::Model> for UserRow {
    fn from(model: user::Model) -> Self {
        UserRow {
            id: model.id,
            username: model.username,
            email: model.email,
            age: model.age,
            phone: model.phone,
            address: model.address,
        }
    }
}

fn active_user(row: &UserRow) -> user::ActiveModel {
    user::ActiveModel {
        id: Set(row.id.clone()),
        username: Set(row.username.clone()),
        email: Set(row.email.clone()),
        age: Set(row.age),
        phone: Set(row.phone.clone()),
        address: Set(row.address.clone()),
    }
}

fn user_column(column: UserColumn) -> user::Column {
    match column {
        UserColumn::Id => user::Column::Id,
        UserColumn::Username => user::Column::Username,
        UserColumn::Age => user::Column::Age,
    }
}

fn user_condition(filter: &UserFilter) -> Condition {
    Condition::all()
        .add_option(filter.min_age.map(|min| user::Column::Age.gte(min)))
        .add_option(filter.max_age.map(|max| user::Column::Age.lte(max)))
}

fn order_condition(filter: &OrderFilter) -> Condition {
    Condition::all()
        .add_option(filter.status.map(|status| order::Column::Status.eq(status)))
        .add_option(
            filter
                .min_amount
                .map(|min| order::Column::Amount.gte(min.cents())),
        )
}

/// Commit on success, roll back and return the original error otherwise.
pub(super) async fn finish<T>(
    txn: DatabaseTransaction,
    result: std::result::Result<T, DbErr>,
) -> Result<T> {
    match result {
        Ok(value) => {
            txn.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = txn.rollback().await {
                tracing::warn!(error = %rollback, "sea-orm rollback failed");
            }
            Err(err.into())
        }
    }
}

/// Backend driving sea-orm entities.
pub struct SeaOrmBackend {
    db: DatabaseConnection,
    rt: Arc<Runtime>,
}

impl SeaOrmBackend {
    /// Wrap the store's pool in a sea-orm connection.
    pub fn new(store: &FixtureStore) -> Self {
        let db = SqlxSqliteConnector::from_sqlx_sqlite_pool(store.pool().clone());
        Self {
            db,
            rt: store.runtime(),
        }
    }
}

impl BackendAdapter for SeaOrmBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::SeaOrm
    }

    fn select_by_key(&mut self, key: &str) -> Result<Option<UserRow>> {
        let model = self
            .rt
            .block_on(user::Entity::find_by_id(key.to_owned()).one(&self.db))?;
        Ok(model.map(UserRow::from))
    }

    fn select_filtered(
        &mut self,
        filter: &UserFilter,
        order: Option<UserOrdering>,
        limit: Option<u64>,
    ) -> Result<Vec<UserRow>> {
        let mut query = user::Entity::find().filter(user_condition(filter));
        if let Some(ordering) = order {
            let direction = if ordering.descending {
                Order::Desc
            } else {
                Order::Asc
            };
            query = query.order_by(user_column(ordering.column), direction);
        }
        if let Some(limit) = limit {
            query = query.limit(limit);
        }

        let models = self.rt.block_on(query.all(&self.db))?;
        Ok(models.into_iter().map(UserRow::from).collect())
    }

    fn count(&mut self, target: &CountTarget) -> Result<u64> {
        let count = match target {
            CountTarget::Users(filter) => self.rt.block_on(
                user::Entity::find()
                    .filter(user_condition(filter))
                    .count(&self.db),
            )?,
            CountTarget::Orders(filter) => self.rt.block_on(
                order::Entity::find()
                    .filter(order_condition(filter))
                    .count(&self.db),
            )?,
        };
        Ok(count)
    }

    fn join_filtered(
        &mut self,
        filter: &OrderFilter,
        distinct: bool,
        limit: Option<u64>,
    ) -> Result<Vec<UserRow>> {
        let mut query = user::Entity::find()
            .inner_join(order::Entity)
            .filter(order_condition(filter));
        if distinct {
            query = query.distinct();
        }
        if let Some(limit) = limit {
            query = query.limit(limit);
        }

        let models = self.rt.block_on(query.all(&self.db))?;
        Ok(models.into_iter().map(UserRow::from).collect())
    }

    fn insert_one(&mut self, row: &UserRow) -> Result<u64> {
        self.rt.block_on(async {
            let txn = self.db.begin().await?;
            let result = user::Entity::insert(active_user(row))
                .exec_without_returning(&txn)
                .await;
            finish(txn, result).await
        })
    }

    fn insert_batch(&mut self, rows: &[UserRow], batched: bool) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        self.rt.block_on(async {
            let txn = self.db.begin().await?;
            let result = if batched {
                user::Entity::insert_many(rows.iter().map(active_user))
                    .exec_without_returning(&txn)
                    .await
            } else {
                async {
                    let mut inserted = 0;
                    for row in rows {
                        inserted += user::Entity::insert(active_user(row))
                            .exec_without_returning(&txn)
                            .await?;
                    }
                    Ok::<u64, DbErr>(inserted)
                }
                .await
            };
            finish(txn, result).await
        })
    }

    fn update_by_key(&mut self, key: &str, mutation: &UserMutation) -> Result<u64> {
        self.rt.block_on(async {
            let txn = self.db.begin().await?;
            let result = user::Entity::update_many()
                .col_expr(user::Column::Age, Expr::value(mutation.age))
                .filter(user::Column::Id.eq(key))
                .exec(&txn)
                .await
                .map(|res| res.rows_affected);
            finish(txn, result).await
        })
    }

    fn update_by_predicate(
        &mut self,
        filter: &UserFilter,
        mutation: &UserMutation,
    ) -> Result<u64> {
        self.rt.block_on(async {
            let txn = self.db.begin().await?;
            let result = user::Entity::update_many()
                .col_expr(user::Column::Age, Expr::value(mutation.age))
                .filter(user_condition(filter))
                .exec(&txn)
                .await
                .map(|res| res.rows_affected);
            finish(txn, result).await
        })
    }

    fn delete_by_predicate(&mut self, filter: &UserFilter) -> Result<u64> {
        self.rt.block_on(async {
            let txn = self.db.begin().await?;
            let result = user::Entity::delete_many()
                .filter(user_condition(filter))
                .exec(&txn)
                .await
                .map(|res| res.rows_affected);
            finish(txn, result).await
        })
    }

    fn reset_local_cache(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::fixtures::Dataset;
    use crate::model::Amount;

    #[test]
    fn test_join_without_distinct_repeats_users() {
        let store = FixtureStore::with_schema(&PoolConfig::new().with_min_idle(1)).unwrap();
        let dataset = Dataset::users(40).with_orders();
        store.populate(&dataset.generate(2)).unwrap();
        let mut backend = SeaOrmBackend::new(&store);

        let filter = OrderFilter::status(0).with_min_amount(Amount::from_units(100));
        let all = backend.join_filtered(&filter, false, None).unwrap();
        let distinct = backend.join_filtered(&filter, true, None).unwrap();
        assert_eq!(all.len() as u64, dataset.expected_orders(&filter));
        assert_eq!(distinct.len() as u64, dataset.expected_users_with_orders(&filter));
        assert!(all.len() > distinct.len());
    }
}
