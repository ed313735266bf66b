//! Scenario registry.
//!
//! A [`Scenario`] names one [`Capability`] with fixed arguments, the dataset
//! it runs on, and the lifetime of that dataset. The same scenario value is
//! dispatched to every backend, so the arguments (predicate, ordering, row
//! cap) are identical by construction.

use std::sync::Arc;

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::backends::BackendAdapter;
use crate::cache::CachePolicy;
use crate::error::{Error, Result};
use crate::fixtures::{fresh_user, Dataset};
use crate::model::{
    Amount, CountTarget, OrderFilter, Outcome, UserColumn, UserFilter, UserMutation,
    UserOrdering,
};

/// Mixes the iteration index into the trial seed.
const ITERATION_SEED_MIX: u64 = 0x2545_f491_4f6c_dd1d;

/// Which fixture key a key lookup targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeySource {
    /// Always the user at this index.
    Fixed(usize),
    /// Walk the key pool, one key per invocation.
    Rotating,
}

/// How long a scenario's dataset lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FixtureScope {
    /// Populated once at trial setup; the scenario only reads.
    Trial,
    /// Purged and repopulated before every iteration.
    Iteration,
}

/// One operation of the backend capability set, with its arguments.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    SelectByKey(KeySource),
    SelectFiltered {
        filter: UserFilter,
        order: Option<UserOrdering>,
        limit: Option<u64>,
    },
    Count(CountTarget),
    JoinFiltered {
        filter: OrderFilter,
        distinct: bool,
        limit: Option<u64>,
    },
    InsertOne {
        age: i32,
    },
    /// Users get ages `base_age + i`.
    InsertBatch {
        size: usize,
        batched: bool,
        base_age: i32,
    },
    UpdateByKey {
        key: KeySource,
        mutation: UserMutation,
    },
    UpdateByPredicate {
        filter: UserFilter,
        mutation: UserMutation,
    },
    DeleteByPredicate {
        filter: UserFilter,
    },
}

impl Capability {
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            Capability::InsertOne { .. }
                | Capability::InsertBatch { .. }
                | Capability::UpdateByKey { .. }
                | Capability::UpdateByPredicate { .. }
                | Capability::DeleteByPredicate { .. }
        )
    }

    /// Whether result order is part of the result.
    pub fn ordered(&self) -> bool {
        matches!(
            self,
            Capability::SelectFiltered {
                order: Some(_),
                ..
            }
        )
    }

    /// Whether only the result cardinality is determined: a row cap without
    /// an ordering lets the database pick any qualifying rows.
    pub fn cardinality_only(&self) -> bool {
        match self {
            Capability::SelectFiltered {
                order: None,
                limit: Some(_),
                ..
            } => true,
            Capability::JoinFiltered { limit, .. } => limit.is_some(),
            _ => false,
        }
    }

    /// The key pool this capability draws from, if it looks rows up by key.
    pub fn key_source(&self) -> Option<KeySource> {
        match *self {
            Capability::SelectByKey(source) => Some(source),
            Capability::UpdateByKey { key, .. } => Some(key),
            _ => None,
        }
    }

    /// Reduce an outcome to the form compared across backends.
    pub fn comparable(&self, outcome: Outcome) -> Outcome {
        if self.cardinality_only() {
            Outcome::Count(outcome.rows())
        } else {
            outcome.normalized(self.ordered())
        }
    }

    /// Run this capability once.
    pub fn invoke(
        &self,
        backend: &mut dyn BackendAdapter,
        state: &mut IterationState,
    ) -> Result<Outcome> {
        match *self {
            Capability::SelectByKey(source) => {
                let key = state.key(source)?;
                let user = backend.select_by_key(&key)?;
                Ok(Outcome::Record(user.map(|u| u.id)))
            }
            Capability::SelectFiltered {
                filter,
                order,
                limit,
            } => {
                let users = backend.select_filtered(&filter, order, limit)?;
                Ok(Outcome::from_users(&users))
            }
            Capability::Count(target) => Ok(Outcome::Count(backend.count(&target)?)),
            Capability::JoinFiltered {
                filter,
                distinct,
                limit,
            } => {
                let users = backend.join_filtered(&filter, distinct, limit)?;
                Ok(Outcome::from_users(&users))
            }
            Capability::InsertOne { age } => {
                let user = fresh_user(&mut state.rng, age);
                Ok(Outcome::Affected(backend.insert_one(&user)?))
            }
            Capability::InsertBatch {
                size,
                batched,
                base_age,
            } => {
                let users: Vec<_> = (0..size)
                    .map(|i| fresh_user(&mut state.rng, base_age + i as i32))
                    .collect();
                Ok(Outcome::Affected(backend.insert_batch(&users, batched)?))
            }
            Capability::UpdateByKey { key, mutation } => {
                let key = state.key(key)?;
                Ok(Outcome::Affected(backend.update_by_key(&key, &mutation)?))
            }
            Capability::UpdateByPredicate { filter, mutation } => Ok(Outcome::Affected(
                backend.update_by_predicate(&filter, &mutation)?,
            )),
            Capability::DeleteByPredicate { filter } => {
                Ok(Outcome::Affected(backend.delete_by_predicate(&filter)?))
            }
        }
    }
}

/// Explicit state of one iteration.
///
/// Built from the trial seed and the iteration index only, so a given
/// iteration replays identically for every backend.
#[derive(Debug)]
pub struct IterationState {
    iteration: u64,
    rng: StdRng,
    cursor: usize,
    fixed_draws: u64,
    keys: Arc<[String]>,
}

impl IterationState {
    pub fn new(seed: u64, iteration: u64, keys: Arc<[String]>) -> Self {
        let mixed = seed ^ iteration.wrapping_add(1).wrapping_mul(ITERATION_SEED_MIX);
        Self {
            iteration,
            rng: StdRng::seed_from_u64(mixed),
            cursor: 0,
            fixed_draws: 0,
            keys,
        }
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Invocations that drew a rotating key so far.
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Whether the next draw from `source` returns a key already drawn in
    /// this iteration: every fixed draw after the first, and a rotating draw
    /// each time the cursor wraps the pool.
    pub fn next_key_repeats(&self, source: KeySource) -> bool {
        match source {
            KeySource::Fixed(_) => self.fixed_draws > 0,
            KeySource::Rotating => {
                !self.keys.is_empty() && self.cursor > 0 && self.cursor % self.keys.len() == 0
            }
        }
    }

    fn key(&mut self, source: KeySource) -> Result<String> {
        if self.keys.is_empty() {
            return Err(Error::Fixture("scenario needs keys but the fixture is empty".into()));
        }
        let index = match source {
            KeySource::Fixed(index) => {
                self.fixed_draws += 1;
                index
            }
            KeySource::Rotating => {
                let index = self.cursor % self.keys.len();
                self.cursor += 1;
                index
            }
        };
        self.keys.get(index).cloned().ok_or_else(|| {
            Error::Fixture(format!(
                "key index {} outside fixture of {} users",
                index,
                self.keys.len()
            ))
        })
    }
}

/// A named capability bound to its dataset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenario {
    pub name: String,
    pub capability: Capability,
    pub dataset: Dataset,
    pub fixture: FixtureScope,
    pub cache: CachePolicy,
}

impl Scenario {
    /// A read scenario over a dataset populated once per trial.
    pub fn read(name: impl Into<String>, capability: Capability, dataset: Dataset) -> Self {
        Self {
            name: name.into(),
            capability,
            dataset,
            fixture: FixtureScope::Trial,
            cache: CachePolicy::default(),
        }
    }

    /// A mutating scenario over a dataset rebuilt before every iteration.
    pub fn write(name: impl Into<String>, capability: Capability, dataset: Dataset) -> Self {
        Self {
            name: name.into(),
            capability,
            dataset,
            fixture: FixtureScope::Iteration,
            cache: CachePolicy::default(),
        }
    }

    pub fn with_cache(mut self, cache: CachePolicy) -> Self {
        self.cache = cache;
        self
    }

    /// Override the user count of trial-scoped datasets. Iteration-scoped
    /// datasets keep their size, since their keys and predicates are tied to it.
    pub fn scaled(&self, users: Option<usize>) -> Self {
        let mut scenario = self.clone();
        if let (Some(users), FixtureScope::Trial) = (users, self.fixture) {
            if !scenario.dataset.is_empty() {
                scenario.dataset = scenario.dataset.with_users(users);
            }
        }
        scenario
    }
}

/// Named scenarios, each dispatched to every backend.
#[derive(Debug, Default)]
pub struct ScenarioRegistry {
    scenarios: Vec<Scenario>,
}

impl ScenarioRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The standard comparison suite.
    pub fn standard() -> Self {
        let users = Dataset::users(1000);
        let orders = Dataset::users(500).with_orders();
        let amount_floor = Amount::from_units(100);

        let scenarios = vec![
            Scenario::read(
                "query/select_by_id",
                Capability::SelectByKey(KeySource::Rotating),
                users,
            ),
            Scenario::read(
                "query/select_list",
                Capability::SelectFiltered {
                    filter: UserFilter::age_at_least(25),
                    order: Some(UserOrdering::desc(UserColumn::Username)),
                    limit: Some(10),
                },
                users,
            ),
            Scenario::read(
                "query/count",
                Capability::Count(CountTarget::Users(UserFilter::age_between(25, 35))),
                users,
            ),
            Scenario::read(
                "complex/join",
                Capability::JoinFiltered {
                    filter: OrderFilter::status(1).with_min_amount(amount_floor),
                    distinct: true,
                    limit: Some(20),
                },
                orders,
            ),
            Scenario::read(
                "complex/aggregation",
                Capability::Count(CountTarget::Orders(OrderFilter::status(1))),
                orders,
            ),
            Scenario::write(
                "insert/single",
                Capability::InsertOne { age: 25 },
                Dataset::empty(),
            ),
            Scenario::write(
                "insert/batch_10",
                Capability::InsertBatch {
                    size: 10,
                    batched: true,
                    base_age: 25,
                },
                Dataset::empty(),
            ),
            Scenario::write(
                "insert/batch_10_rows",
                Capability::InsertBatch {
                    size: 10,
                    batched: false,
                    base_age: 25,
                },
                Dataset::empty(),
            ),
            Scenario::write(
                "update/by_id",
                Capability::UpdateByKey {
                    key: KeySource::Fixed(50),
                    mutation: UserMutation::set_age(99),
                },
                Dataset::users_linear(100),
            ),
            Scenario::write(
                "update/by_predicate",
                Capability::UpdateByPredicate {
                    filter: UserFilter::age_at_least(50),
                    mutation: UserMutation::set_age(88),
                },
                Dataset::users_linear(100),
            ),
            Scenario::write(
                "delete/by_predicate",
                Capability::DeleteByPredicate {
                    filter: UserFilter::age_at_least(40),
                },
                Dataset::users_linear(50),
            ),
        ];

        let mut registry = Self::new();
        registry.scenarios = scenarios;
        registry
    }

    /// Add a scenario. Names are unique.
    pub fn register(&mut self, scenario: Scenario) -> Result<()> {
        if self.scenarios.iter().any(|s| s.name == scenario.name) {
            return Err(Error::DuplicateScenario(scenario.name));
        }
        self.scenarios.push(scenario);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Result<&Scenario> {
        self.scenarios
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| Error::UnknownScenario(name.to_string()))
    }

    /// Scenarios whose name contains `filter`, in registration order.
    pub fn matching(&self, filter: &str) -> Vec<&Scenario> {
        self.scenarios
            .iter()
            .filter(|s| s.name.contains(filter))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Scenario> {
        self.scenarios.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.scenarios.iter().map(|s| s.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(n: usize) -> Arc<[String]> {
        (0..n).map(|i| format!("k{}", i)).collect()
    }

    #[test]
    fn test_standard_registry() {
        let registry = ScenarioRegistry::standard();
        assert_eq!(registry.len(), 11);
        assert_eq!(registry.matching("insert/").len(), 3);
        assert_eq!(registry.matching("").len(), 11);
        assert!(registry.get("query/count").is_ok());
        assert!(matches!(
            registry.get("query/nope"),
            Err(Error::UnknownScenario(_))
        ));

        for scenario in registry.iter() {
            assert_eq!(scenario.cache, CachePolicy::ResetEachIteration);
            let iteration_scoped = scenario.fixture == FixtureScope::Iteration;
            assert_eq!(scenario.capability.is_mutating(), iteration_scoped, "{}", scenario.name);
        }
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = ScenarioRegistry::standard();
        let copy = registry.get("query/count").unwrap().clone();
        let err = registry.register(copy).unwrap_err();
        assert!(matches!(err, Error::DuplicateScenario(name) if name == "query/count"));
        assert_eq!(registry.len(), 11);
    }

    #[test]
    fn test_rotating_keys_wrap() {
        let mut state = IterationState::new(1, 0, keys(3));
        let drawn: Vec<_> = (0..4).map(|_| state.key(KeySource::Rotating).unwrap()).collect();
        assert_eq!(drawn, vec!["k0", "k1", "k2", "k0"]);
        assert_eq!(state.cursor(), 4);
        assert!(!state.next_key_repeats(KeySource::Rotating));
        assert_eq!(state.key(KeySource::Fixed(1)).unwrap(), "k1");
        assert!(state.key(KeySource::Fixed(3)).is_err());
    }

    #[test]
    fn test_key_repeats_are_detected() {
        let mut state = IterationState::new(1, 0, keys(2));
        let mut repeats = Vec::new();
        for _ in 0..5 {
            repeats.push(state.next_key_repeats(KeySource::Rotating));
            state.key(KeySource::Rotating).unwrap();
        }
        assert_eq!(repeats, vec![false, false, true, false, true]);

        assert!(!state.next_key_repeats(KeySource::Fixed(0)));
        state.key(KeySource::Fixed(0)).unwrap();
        assert!(state.next_key_repeats(KeySource::Fixed(0)));

        let empty = IterationState::new(1, 0, keys(0));
        assert!(!empty.next_key_repeats(KeySource::Rotating));
    }

    #[test]
    fn test_iteration_state_is_reproducible() {
        let mut a = IterationState::new(7, 2, keys(1));
        let mut b = IterationState::new(7, 2, keys(1));
        let mut c = IterationState::new(7, 3, keys(1));
        let ua = fresh_user(&mut a.rng, 25);
        assert_eq!(ua, fresh_user(&mut b.rng, 25));
        assert_ne!(ua.id, fresh_user(&mut c.rng, 25).id);
    }

    #[test]
    fn test_empty_fixture_has_no_keys() {
        let mut state = IterationState::new(1, 0, keys(0));
        assert!(matches!(
            state.key(KeySource::Rotating),
            Err(Error::Fixture(_))
        ));
    }

    #[test]
    fn test_comparable_outcomes() {
        let join = Capability::JoinFiltered {
            filter: OrderFilter::status(1),
            distinct: true,
            limit: Some(2),
        };
        assert!(join.cardinality_only());
        assert_eq!(
            join.comparable(Outcome::Records(vec!["a".into(), "b".into()])),
            Outcome::Count(2)
        );

        let list = Capability::SelectFiltered {
            filter: UserFilter::default(),
            order: Some(UserOrdering::asc(UserColumn::Age)),
            limit: Some(2),
        };
        assert!(list.ordered());
        assert!(!list.cardinality_only());
    }

    #[test]
    fn test_scaling_only_touches_trial_fixtures() {
        let registry = ScenarioRegistry::standard();
        let read = registry.get("query/count").unwrap().scaled(Some(200));
        assert_eq!(read.dataset.users, 200);
        let write = registry.get("update/by_id").unwrap().scaled(Some(200));
        assert_eq!(write.dataset.users, 100);
    }
}
