//! Trial lifecycle and measurement.
//!
//! Every (scenario, backend) pair gets its own [`Trial`]:
//!
//! 1. `setup`: schema, purge, baseline fixture
//! 2. `begin_iteration`: repopulate iteration-scoped fixtures, reset caches
//! 3. `invoke`: the measured operation, repeated over a fixed time window
//! 4. `teardown`: purge
//!
//! Warm-up and measured iterations go through the same steps; only measured
//! samples reach the report.

use std::hint::black_box;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backends::{BackendAdapter, BackendKind};
use crate::cache::CacheController;
use crate::config::TrialConfig;
use crate::error::{Error, Result};
use crate::fixtures::GeneratedData;
use crate::model::Outcome;
use crate::report::{BackendResult, IterationSample, ScenarioReport};
use crate::scenario::{FixtureScope, IterationState, Scenario};
use crate::store::FixtureStore;

/// One scenario on one backend, from setup to teardown.
pub struct Trial<'a> {
    store: &'a FixtureStore,
    scenario: &'a Scenario,
    backend: Box<dyn BackendAdapter>,
    data: GeneratedData,
    keys: Arc<[String]>,
    seed: u64,
    cache: CacheController,
}

impl<'a> Trial<'a> {
    /// Prepare the store and open the backend.
    ///
    /// Any error here is fatal to the trial.
    pub fn setup(
        store: &'a FixtureStore,
        scenario: &'a Scenario,
        kind: BackendKind,
        seed: u64,
    ) -> Result<Self> {
        store.ensure_schema()?;
        let data = scenario.dataset.generate(seed);
        store.populate(&data)?;
        let keys: Arc<[String]> = data.user_keys().into();

        tracing::debug!(
            scenario = %scenario.name,
            backend = %kind,
            users = data.users.len(),
            orders = data.orders.len(),
            "trial setup"
        );

        Ok(Self {
            store,
            scenario,
            backend: kind.open(store),
            data,
            keys,
            seed,
            cache: CacheController::new(),
        })
    }

    pub fn backend(&self) -> BackendKind {
        self.backend.kind()
    }

    /// Cache resets issued so far.
    pub fn cache_resets(&self) -> u64 {
        self.cache.resets()
    }

    /// Start iteration `iteration`: rebuild iteration-scoped data and clear
    /// the backend's local cache.
    pub fn begin_iteration(&mut self, iteration: u64) -> Result<IterationState> {
        if self.scenario.fixture == FixtureScope::Iteration {
            self.store.populate(&self.data)?;
        }
        self.cache.prepare(self.scenario.cache, self.backend.as_mut());
        Ok(IterationState::new(self.seed, iteration, self.keys.clone()))
    }

    /// Run the scenario's operation once.
    ///
    /// A key lookup that would revisit a key already drawn in this iteration
    /// first clears the backend's local cache under the scenario's policy, so
    /// repeated keys read from the store on every backend.
    pub fn invoke(&mut self, state: &mut IterationState) -> Result<Outcome> {
        if let Some(source) = self.scenario.capability.key_source() {
            if state.next_key_repeats(source) {
                self.cache.prepare(self.scenario.cache, self.backend.as_mut());
            }
        }
        self.scenario.capability.invoke(self.backend.as_mut(), state)
    }

    /// Purge everything the trial wrote.
    pub fn teardown(self) -> Result<()> {
        self.store.purge_all()?;
        tracing::debug!(
            scenario = %self.scenario.name,
            backend = %self.backend.kind(),
            "trial teardown"
        );
        Ok(())
    }
}

/// Repeat the operation until `window` has elapsed.
///
/// A non-fatal operation error ends the iteration and marks the sample
/// failed. Fatal errors propagate.
fn measure(
    trial: &mut Trial<'_>,
    state: &mut IterationState,
    iteration: u32,
    window: Duration,
) -> Result<IterationSample> {
    let mut operations = 0u64;
    let start = Instant::now();
    loop {
        match trial.invoke(state) {
            Ok(outcome) => {
                black_box(outcome);
                operations += 1;
            }
            Err(err) if !err.is_fatal() => {
                return Ok(IterationSample::failed(
                    iteration,
                    operations,
                    start.elapsed(),
                    err.to_string(),
                ));
            }
            Err(err) => return Err(err),
        }
        let elapsed = start.elapsed();
        if elapsed >= window {
            return Ok(IterationSample::completed(iteration, operations, elapsed));
        }
    }
}

/// Runs scenarios against a set of backends under one configuration.
pub struct Runner<'a> {
    store: &'a FixtureStore,
    config: TrialConfig,
    backends: Vec<BackendKind>,
}

impl<'a> Runner<'a> {
    pub fn new(store: &'a FixtureStore, config: TrialConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            config,
            backends: BackendKind::ALL.to_vec(),
        })
    }

    /// Restrict the comparison set.
    pub fn with_backends(mut self, backends: Vec<BackendKind>) -> Self {
        self.backends = backends;
        self
    }

    pub fn config(&self) -> &TrialConfig {
        &self.config
    }

    pub fn backends(&self) -> &[BackendKind] {
        &self.backends
    }

    /// Run the scenario once per backend on a fresh fixture and require the
    /// outcomes to agree.
    pub fn verify_equivalence(&self, scenario: &Scenario) -> Result<Vec<Outcome>> {
        let scenario = scenario.scaled(self.config.users_override);
        let mut outcomes: Vec<(BackendKind, Outcome)> = Vec::with_capacity(self.backends.len());

        for &kind in &self.backends {
            let mut trial = Trial::setup(self.store, &scenario, kind, self.config.seed)
                .map_err(|err| self.abandon(err))?;
            let outcome = match trial.begin_iteration(0) {
                Ok(mut state) => trial.invoke(&mut state),
                Err(err) => return Err(self.abandon(err)),
            };
            trial.teardown()?;

            let outcome = outcome.map_err(|err| Error::Inequivalent {
                scenario: scenario.name.clone(),
                detail: format!("{} failed: {}", kind, err),
            })?;
            outcomes.push((kind, scenario.capability.comparable(outcome)));
        }

        if let Some((first_kind, first)) = outcomes.first() {
            for (kind, outcome) in &outcomes[1..] {
                if outcome != first {
                    return Err(Error::Inequivalent {
                        scenario: scenario.name.clone(),
                        detail: format!(
                            "{} returned {:?}, {} returned {:?}",
                            first_kind, first, kind, outcome
                        ),
                    });
                }
            }
        }

        tracing::debug!(scenario = %scenario.name, backends = outcomes.len(), "outcomes agree");
        Ok(outcomes.into_iter().map(|(_, outcome)| outcome).collect())
    }

    /// Verify, then measure the scenario on every backend.
    pub fn run_scenario(&self, scenario: &Scenario) -> Result<ScenarioReport> {
        self.verify_equivalence(scenario)?;

        let scaled = scenario.scaled(self.config.users_override);
        let mut report = ScenarioReport::new(&scaled.name);
        for &kind in &self.backends {
            report.results.push(self.run_trial(&scaled, kind)?);
        }
        Ok(report)
    }

    /// Run scenarios in order. Stops at the first fatal error.
    pub fn run_all<'s>(
        &self,
        scenarios: impl IntoIterator<Item = &'s Scenario>,
    ) -> Result<Vec<ScenarioReport>> {
        scenarios
            .into_iter()
            .map(|scenario| self.run_scenario(scenario))
            .collect()
    }

    /// Warm-ups and measured iterations of one scenario on one backend.
    ///
    /// The store is purged whether the trial completes or aborts.
    pub fn run_trial(&self, scenario: &Scenario, kind: BackendKind) -> Result<BackendResult> {
        let mut trial = Trial::setup(self.store, scenario, kind, self.config.seed)
            .map_err(|err| self.abandon(err))?;
        match self.iterate(&mut trial, scenario, kind) {
            Ok(result) => {
                trial.teardown()?;
                Ok(result)
            }
            Err(err) => Err(self.abandon(err)),
        }
    }

    /// Purge after a fatal error and hand the error back.
    fn abandon(&self, err: Error) -> Error {
        if let Err(purge) = self.store.purge_all() {
            tracing::warn!(error = %purge, "purge after aborted trial failed");
        }
        err
    }

    fn iterate(
        &self,
        trial: &mut Trial<'_>,
        scenario: &Scenario,
        kind: BackendKind,
    ) -> Result<BackendResult> {
        let mut result = BackendResult::new(kind);
        let mut iteration = 0u64;

        for warmup in 0..self.config.warmup_iterations {
            let mut state = trial.begin_iteration(iteration)?;
            iteration += 1;
            let sample = measure(trial, &mut state, warmup, self.config.warmup_time)?;
            if let Some(error) = &sample.error {
                tracing::warn!(
                    scenario = %scenario.name,
                    backend = %kind,
                    warmup,
                    %error,
                    "warm-up iteration failed"
                );
            }
        }

        for measured in 0..self.config.measurement_iterations {
            let mut state = trial.begin_iteration(iteration)?;
            iteration += 1;
            let sample = measure(trial, &mut state, measured, self.config.measurement_time)?;
            match &sample.error {
                Some(error) => tracing::warn!(
                    scenario = %scenario.name,
                    backend = %kind,
                    iteration = measured,
                    %error,
                    "iteration failed"
                ),
                None => tracing::debug!(
                    scenario = %scenario.name,
                    backend = %kind,
                    iteration = measured,
                    ops_per_sec = sample.throughput(),
                    "iteration"
                ),
            }
            result.samples.push(sample);
        }

        let summary = result.summary();
        tracing::info!(
            scenario = %scenario.name,
            backend = %kind,
            score = summary.score,
            valid = summary.valid,
            failed = summary.failed,
            cache_resets = trial.cache_resets(),
            "trial complete"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::scenario::ScenarioRegistry;

    fn quick() -> TrialConfig {
        TrialConfig::new()
            .with_warmup(1, Duration::from_millis(10))
            .with_measurement(2, Duration::from_millis(20))
            .with_forks(0)
            .with_users(60)
    }

    fn store() -> FixtureStore {
        FixtureStore::with_schema(&PoolConfig::new().with_min_idle(1)).unwrap()
    }

    #[test]
    fn test_runner_rejects_threads() {
        let store = store();
        let result = Runner::new(&store, quick().with_threads(4));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_trial_resets_cache_every_iteration() {
        let store = store();
        let registry = ScenarioRegistry::standard();
        let scenario = registry.get("query/select_by_id").unwrap().scaled(Some(30));

        let mut trial = Trial::setup(&store, &scenario, BackendKind::SqlxSession, 1).unwrap();
        for iteration in 0..4 {
            let mut state = trial.begin_iteration(iteration).unwrap();
            assert!(matches!(
                trial.invoke(&mut state).unwrap(),
                Outcome::Record(Some(_))
            ));
        }
        assert_eq!(trial.cache_resets(), 4);
        trial.teardown().unwrap();
        assert_eq!(store.count_rows("t_user").unwrap(), 0);
    }

    #[test]
    fn test_rotating_lookup_reads_store_after_wrap() {
        let store = store();
        let registry = ScenarioRegistry::standard();
        let scenario = registry.get("query/select_by_id").unwrap().scaled(Some(3));

        let mut trial = Trial::setup(&store, &scenario, BackendKind::SqlxSession, 1).unwrap();
        let mut state = trial.begin_iteration(0).unwrap();
        for _ in 0..3 {
            assert!(matches!(
                trial.invoke(&mut state).unwrap(),
                Outcome::Record(Some(_))
            ));
        }

        // Every key is now in the session; the next pass must still see the
        // store.
        store.purge_all().unwrap();
        for _ in 0..4 {
            assert_eq!(trial.invoke(&mut state).unwrap(), Outcome::Record(None));
        }
        assert_eq!(state.cursor(), 7);
        assert_eq!(trial.cache_resets(), 3);
        trial.teardown().unwrap();
    }

    #[test]
    fn test_fixed_key_update_resets_between_invocations() {
        let store = store();
        let registry = ScenarioRegistry::standard();
        let scenario = registry.get("update/by_id").unwrap();

        let mut trial = Trial::setup(&store, scenario, BackendKind::SqlxSession, 1).unwrap();
        let mut state = trial.begin_iteration(0).unwrap();
        for _ in 0..3 {
            assert_eq!(trial.invoke(&mut state).unwrap(), Outcome::Affected(1));
        }
        assert_eq!(trial.cache_resets(), 3);
        trial.teardown().unwrap();
    }

    #[test]
    fn test_aborted_trial_purges_store() {
        let store = store();
        let runner = Runner::new(&store, quick()).unwrap();
        let scenario = Scenario::read(
            "query/out_of_range",
            crate::scenario::Capability::SelectByKey(crate::scenario::KeySource::Fixed(10)),
            crate::fixtures::Dataset::users(5),
        );

        let err = runner.run_trial(&scenario, BackendKind::SeaQuery).unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(store.count_rows("t_user").unwrap(), 0);

        assert!(runner.verify_equivalence(&scenario).is_err());
        assert_eq!(store.count_rows("t_user").unwrap(), 0);
    }

    #[test]
    fn test_iteration_fixture_is_rebuilt() {
        let store = store();
        let registry = ScenarioRegistry::standard();
        let scenario = registry.get("delete/by_predicate").unwrap();

        let mut trial = Trial::setup(&store, scenario, BackendKind::SeaQuery, 1).unwrap();
        for iteration in 0..3 {
            let mut state = trial.begin_iteration(iteration).unwrap();
            // Users aged 40..=69 out of 20..=69.
            assert_eq!(trial.invoke(&mut state).unwrap(), Outcome::Affected(30));
            assert_eq!(trial.invoke(&mut state).unwrap(), Outcome::Affected(0));
        }
        trial.teardown().unwrap();
    }

    #[test]
    fn test_run_scenario_reports_every_backend() {
        let store = store();
        let runner = Runner::new(&store, quick()).unwrap();
        let registry = ScenarioRegistry::standard();
        let report = runner
            .run_scenario(registry.get("query/count").unwrap())
            .unwrap();

        assert_eq!(report.scenario, "query/count");
        assert_eq!(report.results.len(), 3);
        for result in &report.results {
            let summary = result.summary();
            assert_eq!(summary.valid, 2);
            assert_eq!(summary.failed, 0);
            assert!(summary.score.unwrap() > 0.0);
        }
    }

    #[test]
    fn test_failed_operation_marks_sample() {
        let store = store();
        let scenario = Scenario::write(
            "insert/duplicate",
            crate::scenario::Capability::InsertOne { age: 30 },
            crate::fixtures::Dataset::empty(),
        );
        let mut trial = Trial::setup(&store, &scenario, BackendKind::SeaOrm, 3).unwrap();
        // The same iteration state replays the same fresh user, so a second
        // state for the same iteration collides on the primary key.
        let mut state = trial.begin_iteration(0).unwrap();
        trial.invoke(&mut state).unwrap();
        let mut replay = IterationState::new(3, 0, Arc::from(Vec::<String>::new()));
        let sample = measure(&mut trial, &mut replay, 0, Duration::from_millis(50)).unwrap();

        assert!(!sample.is_valid());
        assert_eq!(sample.operations, 0);
        assert!(sample.error.is_some());
        assert_eq!(store.count_rows("t_user").unwrap(), 1);
        trial.teardown().unwrap();
    }
}
