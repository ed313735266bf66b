//! Records and predicates shared by every backend.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Money with exact cent precision, stored as an integer count of cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Amount(i64);

impl Amount {
    pub const fn from_cents(cents: i64) -> Self {
        Amount(cents)
    }

    pub const fn from_units(units: i64) -> Self {
        Amount(units * 100)
    }

    pub const fn cents(self) -> i64 {
        self.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

/// Row of `t_user`.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct UserRow {
    pub id: String,
    pub username: String,
    pub email: String,
    pub age: i32,
    pub phone: String,
    pub address: String,
}

/// Row of `t_order`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderRow {
    pub id: String,
    pub user_id: String,
    pub order_no: String,
    pub amount: Amount,
    pub status: i32,
    pub remark: String,
}

/// Conjunctive predicate over `t_user`. Empty matches every row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UserFilter {
    pub min_age: Option<i32>,
    pub max_age: Option<i32>,
}

impl UserFilter {
    /// `age >= min`.
    pub fn age_at_least(min: i32) -> Self {
        Self {
            min_age: Some(min),
            max_age: None,
        }
    }

    /// `min <= age <= max`.
    pub fn age_between(min: i32, max: i32) -> Self {
        Self {
            min_age: Some(min),
            max_age: Some(max),
        }
    }

    pub fn matches(&self, user: &UserRow) -> bool {
        self.min_age.map_or(true, |min| user.age >= min)
            && self.max_age.map_or(true, |max| user.age <= max)
    }
}

/// Conjunctive predicate over `t_order`. Empty matches every row.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OrderFilter {
    pub status: Option<i32>,
    pub min_amount: Option<Amount>,
}

impl OrderFilter {
    pub fn status(status: i32) -> Self {
        Self {
            status: Some(status),
            min_amount: None,
        }
    }

    pub fn with_min_amount(mut self, amount: Amount) -> Self {
        self.min_amount = Some(amount);
        self
    }

    pub fn matches(&self, order: &OrderRow) -> bool {
        self.status.map_or(true, |s| order.status == s)
            && self.min_amount.map_or(true, |min| order.amount >= min)
    }
}

/// What a count capability counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountTarget {
    Users(UserFilter),
    Orders(OrderFilter),
}

/// Sortable `t_user` columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserColumn {
    Id,
    Username,
    Age,
}

impl UserColumn {
    pub fn as_str(self) -> &'static str {
        match self {
            UserColumn::Id => "id",
            UserColumn::Username => "username",
            UserColumn::Age => "age",
        }
    }
}

/// Explicit ordering for list queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserOrdering {
    pub column: UserColumn,
    pub descending: bool,
}

impl UserOrdering {
    pub fn asc(column: UserColumn) -> Self {
        Self {
            column,
            descending: false,
        }
    }

    pub fn desc(column: UserColumn) -> Self {
        Self {
            column,
            descending: true,
        }
    }
}

/// Column assignments applied by update capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserMutation {
    pub age: i32,
}

impl UserMutation {
    pub fn set_age(age: i32) -> Self {
        Self { age }
    }
}

/// Result of one capability call, reduced to what equivalence checks need.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Key of the record found, if any.
    Record(Option<String>),
    /// Keys of the records returned, in result order.
    Records(Vec<String>),
    Count(u64),
    Affected(u64),
}

impl Outcome {
    pub fn from_users(rows: &[UserRow]) -> Self {
        Outcome::Records(rows.iter().map(|u| u.id.clone()).collect())
    }

    /// Number of rows produced or touched.
    pub fn rows(&self) -> u64 {
        match self {
            Outcome::Record(found) => u64::from(found.is_some()),
            Outcome::Records(keys) => keys.len() as u64,
            Outcome::Count(n) | Outcome::Affected(n) => *n,
        }
    }

    /// Canonical form for comparison; unordered results compare as sets.
    pub fn normalized(mut self, ordered: bool) -> Self {
        if let Outcome::Records(keys) = &mut self {
            if !ordered {
                keys.sort_unstable();
            }
        }
        self
    }
}
