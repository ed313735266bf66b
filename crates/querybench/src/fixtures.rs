//! Test data generation for benchmarks.
//!
//! Record content is a pure function of the record index, so every backend
//! and every run sees the same values. Identities are UUIDs drawn from a
//! seeded RNG: unique, opaque, and reproducible for a given seed.
//!
//! # Selectivity
//!
//! For `n` users:
//!
//! - user `i` owns `2 + i % 4` orders, i.e. 14 orders per block of 4 users
//! - order `j` has status `j % 3`; per block of 4 users that is 6 orders
//!   with status 0, 5 with status 1 and 3 with status 2
//! - order `j` of user `i` costs `100 + 10i + 5j` units plus 50 cents, so
//!   every amount is at least `100.50`
//!
//! The `expected_*` methods on [`Dataset`] compute these counts from the
//! formulas alone. Scenario assertions rely on them.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use uuid::Uuid;

use crate::model::{Amount, OrderFilter, OrderRow, UserFilter, UserRow};

/// Orders owned by each user within one block of four users.
const ORDERS_PER_USER_CYCLE: [u64; 4] = [2, 3, 4, 5];

/// Separates the order identity stream from the user identity stream.
const ORDER_SEED_SALT: u64 = 0x9e37_79b9_7f4a_7c15;

/// Age shape of generated users.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgeDistribution {
    /// `base + i % modulus`.
    Cyclic { base: i32, modulus: i32 },
    /// `base + i`.
    Linear { base: i32 },
}

impl AgeDistribution {
    pub fn age_of(&self, index: usize) -> i32 {
        match *self {
            AgeDistribution::Cyclic { base, modulus } => base + (index as i32 % modulus),
            AgeDistribution::Linear { base } => base + index as i32,
        }
    }

    /// Number of indexes in `0..count` whose age lies in `[min, max]`.
    fn count_in_range(&self, count: usize, min: i32, max: i32) -> u64 {
        match *self {
            AgeDistribution::Linear { base } => {
                if count == 0 {
                    return 0;
                }
                overlap(base, base + count as i32 - 1, min, max)
            }
            AgeDistribution::Cyclic { base, modulus } => {
                let modulus_len = modulus as usize;
                let full_cycles = (count / modulus_len) as u64;
                let rest = count % modulus_len;
                let per_cycle = overlap(base, base + modulus - 1, min, max);
                let partial = if rest == 0 {
                    0
                } else {
                    overlap(base, base + rest as i32 - 1, min, max)
                };
                full_cycles * per_cycle + partial
            }
        }
    }
}

impl Default for AgeDistribution {
    fn default() -> Self {
        AgeDistribution::Cyclic {
            base: 20,
            modulus: 50,
        }
    }
}

/// Count of integers in both `[lo, hi]` and `[min, max]`.
fn overlap(lo: i32, hi: i32, min: i32, max: i32) -> u64 {
    let start = lo.max(min);
    let end = hi.min(max);
    if end < start {
        0
    } else {
        (end - start + 1) as u64
    }
}

/// Shape and cardinality of a fixture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dataset {
    pub users: usize,
    pub ages: AgeDistribution,
    /// Whether each user gets its orders.
    pub orders: bool,
}

impl Dataset {
    /// No rows at all.
    pub const fn empty() -> Self {
        Self {
            users: 0,
            ages: AgeDistribution::Linear { base: 20 },
            orders: false,
        }
    }

    /// `users` users with ages `20 + i % 50`.
    pub const fn users(users: usize) -> Self {
        Self {
            users,
            ages: AgeDistribution::Cyclic {
                base: 20,
                modulus: 50,
            },
            orders: false,
        }
    }

    /// `users` users with ages `20 + i`.
    pub const fn users_linear(users: usize) -> Self {
        Self {
            users,
            ages: AgeDistribution::Linear { base: 20 },
            orders: false,
        }
    }

    pub const fn with_orders(mut self) -> Self {
        self.orders = true;
        self
    }

    pub const fn with_users(mut self, users: usize) -> Self {
        self.users = users;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.users == 0
    }

    /// Generate the rows of this dataset.
    pub fn generate(&self, seed: u64) -> GeneratedData {
        let users = generate_users_with(self.users, seed, self.ages);
        let orders = if self.orders {
            let mut rng = StdRng::seed_from_u64(seed ^ ORDER_SEED_SALT);
            users
                .iter()
                .enumerate()
                .flat_map(|(i, user)| generate_orders_for(user, i, &mut rng))
                .collect()
        } else {
            Vec::new()
        };
        GeneratedData { users, orders }
    }

    /// Orders this dataset holds.
    pub fn expected_order_count(&self) -> u64 {
        if self.orders {
            total_orders(self.users)
        } else {
            0
        }
    }

    /// Users matching `filter`.
    pub fn expected_users(&self, filter: &UserFilter) -> u64 {
        let min = filter.min_age.unwrap_or(i32::MIN);
        let max = filter.max_age.unwrap_or(i32::MAX);
        self.ages.count_in_range(self.users, min, max)
    }

    /// Orders matching `filter`.
    pub fn expected_orders(&self, filter: &OrderFilter) -> u64 {
        if !self.orders {
            return 0;
        }
        match filter.min_amount {
            None => match filter.status {
                Some(status) => orders_with_status(self.users, status),
                None => total_orders(self.users),
            },
            Some(min) => (0..self.users)
                .map(|i| {
                    (0..orders_of_user(i) as usize)
                        .filter(|&j| order_matches(i, j, filter.status, min))
                        .count() as u64
                })
                .sum(),
        }
    }

    /// Distinct users owning at least one order matching `filter`.
    pub fn expected_users_with_orders(&self, filter: &OrderFilter) -> u64 {
        if !self.orders {
            return 0;
        }
        let min = filter.min_amount.unwrap_or(Amount::from_cents(i64::MIN));
        (0..self.users)
            .filter(|&i| {
                (0..orders_of_user(i) as usize).any(|j| order_matches(i, j, filter.status, min))
            })
            .count() as u64
    }
}

/// Rows produced for one fixture.
#[derive(Debug, Clone, Default)]
pub struct GeneratedData {
    pub users: Vec<UserRow>,
    pub orders: Vec<OrderRow>,
}

impl GeneratedData {
    /// User identities in generation order.
    pub fn user_keys(&self) -> Vec<String> {
        self.users.iter().map(|u| u.id.clone()).collect()
    }
}

/// Orders owned by user `index`.
pub fn orders_of_user(index: usize) -> u64 {
    ORDERS_PER_USER_CYCLE[index % ORDERS_PER_USER_CYCLE.len()]
}

/// Status of order `j` of any user.
pub fn order_status(j: usize) -> i32 {
    (j % 3) as i32
}

/// Amount of order `j` of user `i`.
pub fn order_amount(i: usize, j: usize) -> Amount {
    let units = 100 + 10 * i as i64 + 5 * j as i64;
    Amount::from_cents(units * 100 + 50)
}

fn order_matches(i: usize, j: usize, status: Option<i32>, min: Amount) -> bool {
    status.map_or(true, |s| order_status(j) == s) && order_amount(i, j) >= min
}

/// Orders generated for `users` users.
pub fn total_orders(users: usize) -> u64 {
    let block: u64 = ORDERS_PER_USER_CYCLE.iter().sum();
    let partial: u64 = ORDERS_PER_USER_CYCLE[..users % 4].iter().sum();
    (users / 4) as u64 * block + partial
}

/// Orders with the given status generated for `users` users.
pub fn orders_with_status(users: usize, status: i32) -> u64 {
    if !(0..3).contains(&status) {
        return 0;
    }
    // Orders j < c with j % 3 == s.
    let per_user = |c: u64| {
        let s = status as u64;
        if c > s {
            (c - 1 - s) / 3 + 1
        } else {
            0
        }
    };
    let block: u64 = ORDERS_PER_USER_CYCLE.iter().map(|&c| per_user(c)).sum();
    let partial: u64 = ORDERS_PER_USER_CYCLE[..users % 4]
        .iter()
        .map(|&c| per_user(c))
        .sum();
    (users / 4) as u64 * block + partial
}

/// Draw a fresh UUID identity.
pub fn random_id(rng: &mut impl Rng) -> String {
    uuid::Builder::from_random_bytes(rng.gen())
        .into_uuid()
        .to_string()
}

/// Generate `count` users with the default age shape.
pub fn generate_users(count: usize, seed: u64) -> Vec<UserRow> {
    generate_users_with(count, seed, AgeDistribution::default())
}

/// Generate `count` users with the given age shape.
pub fn generate_users_with(count: usize, seed: u64, ages: AgeDistribution) -> Vec<UserRow> {
    let mut rng = StdRng::seed_from_u64(seed);

    (0..count)
        .map(|i| UserRow {
            id: random_id(&mut rng),
            username: format!("user_{}", i),
            email: format!("user{}@example.com", i),
            age: ages.age_of(i),
            phone: "1234567890".to_string(),
            address: format!("Address {}", i),
        })
        .collect()
}

/// Generate the orders of user `index`.
pub fn generate_orders_for(user: &UserRow, index: usize, rng: &mut StdRng) -> Vec<OrderRow> {
    (0..orders_of_user(index) as usize)
        .map(|j| OrderRow {
            id: random_id(rng),
            user_id: user.id.clone(),
            order_no: format!("ORDER_{}_{}", index, j),
            amount: order_amount(index, j),
            status: order_status(j),
            remark: format!("Order remark {}_{}", index, j),
        })
        .collect()
}

/// A user to be inserted by a benchmarked operation.
pub fn fresh_user(rng: &mut StdRng, age: i32) -> UserRow {
    let id = random_id(rng);
    UserRow {
        username: format!("user_{}", id),
        id,
        email: "user@example.com".to_string(),
        age,
        phone: "1234567890".to_string(),
        address: "Test Address".to_string(),
    }
}

/// Parse a generated identity back into a UUID.
pub fn parse_id(id: &str) -> Option<Uuid> {
    Uuid::parse_str(id).ok()
}
