//! Cross-backend integration tests on a shared fixture.

use std::collections::BTreeSet;

use querybench::backends::{open_all, BackendAdapter, BackendKind};
use querybench::fixtures::{fresh_user, orders_with_status, Dataset};
use querybench::model::{
    Amount, CountTarget, OrderFilter, UserColumn, UserFilter, UserMutation, UserOrdering,
};
use querybench::{FixtureStore, PoolConfig};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn store() -> FixtureStore {
    FixtureStore::with_schema(&PoolConfig::new().with_min_idle(1)).unwrap()
}

fn keys(rows: &[querybench::UserRow]) -> BTreeSet<String> {
    rows.iter().map(|u| u.id.clone()).collect()
}

fn all_backends(store: &FixtureStore) -> Vec<Box<dyn BackendAdapter>> {
    open_all(store, &BackendKind::ALL)
}

#[test]
fn test_status_count_end_to_end() {
    let store = store();
    let dataset = Dataset::users(500).with_orders();
    store.populate(&dataset.generate(12345)).unwrap();

    let target = CountTarget::Orders(OrderFilter::status(1));
    let expected = orders_with_status(500, 1);
    assert_eq!(expected, 625);
    assert_eq!(store.count(&target).unwrap(), expected);

    for mut backend in all_backends(&store) {
        assert_eq!(backend.count(&target).unwrap(), expected, "{}", backend.kind());
    }
}

#[test]
fn test_counts_match_direct_count() {
    let store = store();
    for users in [0, 1, 7, 200] {
        let dataset = Dataset::users(users).with_orders();
        store.populate(&dataset.generate(users as u64)).unwrap();

        let targets = [
            CountTarget::Users(UserFilter::default()),
            CountTarget::Users(UserFilter::age_between(25, 35)),
            CountTarget::Orders(OrderFilter::default()),
            CountTarget::Orders(OrderFilter::status(2).with_min_amount(Amount::from_units(150))),
        ];
        for target in &targets {
            let direct = store.count(target).unwrap();
            for mut backend in all_backends(&store) {
                assert_eq!(
                    backend.count(target).unwrap(),
                    direct,
                    "{} {:?} on {} users",
                    backend.kind(),
                    target,
                    users
                );
            }
        }
    }
}

#[test]
fn test_filtered_and_joined_sets_agree() {
    let store = store();
    let dataset = Dataset::users(120).with_orders();
    store.populate(&dataset.generate(8)).unwrap();

    let user_filter = UserFilter::age_at_least(25);
    let order_filter = OrderFilter::status(1).with_min_amount(Amount::from_units(500));

    let mut listed = Vec::new();
    let mut joined = Vec::new();
    for mut backend in all_backends(&store) {
        listed.push(keys(&backend.select_filtered(&user_filter, None, None).unwrap()));
        joined.push(keys(&backend.join_filtered(&order_filter, true, None).unwrap()));
    }

    assert_eq!(listed[0].len() as u64, dataset.expected_users(&user_filter));
    assert_eq!(joined[0].len() as u64, dataset.expected_users_with_orders(&order_filter));
    assert!(listed.iter().all(|set| set == &listed[0]));
    assert!(joined.iter().all(|set| set == &joined[0]));
}

#[test]
fn test_ordered_list_agrees_in_order() {
    let store = store();
    store.populate(&Dataset::users(300).generate(2)).unwrap();

    let order = Some(UserOrdering::desc(UserColumn::Username));
    let filter = UserFilter::age_at_least(25);
    let lists: Vec<Vec<String>> = all_backends(&store)
        .iter_mut()
        .map(|backend| {
            backend
                .select_filtered(&filter, order, Some(10))
                .unwrap()
                .into_iter()
                .map(|u| u.username)
                .collect()
        })
        .collect();

    assert_eq!(lists[0].len(), 10);
    assert_eq!(lists[0][0], "user_99");
    let mut sorted = lists[0].clone();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    assert_eq!(lists[0], sorted);
    assert!(lists.iter().all(|list| list == &lists[0]));
}

#[test]
fn test_failed_batch_is_atomic_on_every_backend() {
    let store = store();
    let data = Dataset::users(10).generate(3);
    store.populate(&data).unwrap();

    let mut rng = StdRng::seed_from_u64(99);
    let mut batch: Vec<_> = (0..5).map(|i| fresh_user(&mut rng, 30 + i)).collect();
    // Third row collides with an existing primary key.
    batch[2].id = data.users[4].id.clone();

    for mut backend in all_backends(&store) {
        for batched in [true, false] {
            let result = backend.insert_batch(&batch, batched);
            let err = result.expect_err("duplicate key must fail");
            assert!(!err.is_fatal(), "{}: {}", backend.kind(), err);
            assert_eq!(store.count_rows("t_user").unwrap(), 10, "{}", backend.kind());
        }
    }
}

#[test]
fn test_reset_cache_reads_through_after_purge() {
    let store = store();
    let mut rng = StdRng::seed_from_u64(4);

    for mut backend in all_backends(&store) {
        let user = fresh_user(&mut rng, 25);
        assert_eq!(backend.insert_one(&user).unwrap(), 1);
        assert!(backend.select_by_key(&user.id).unwrap().is_some());

        store.purge_all().unwrap();
        backend.reset_local_cache();
        assert!(
            backend.select_by_key(&user.id).unwrap().is_none(),
            "{} served a purged row",
            backend.kind()
        );
    }
}

#[test]
fn test_mutations_agree() {
    let store = store();
    let dataset = Dataset::users_linear(100);
    let data = dataset.generate(5);

    let mut affected = Vec::new();
    for mut backend in all_backends(&store) {
        store.populate(&data).unwrap();
        let by_key = backend
            .update_by_key(&data.users[50].id, &UserMutation::set_age(99))
            .unwrap();
        let by_predicate = backend
            .update_by_predicate(&UserFilter::age_at_least(50), &UserMutation::set_age(88))
            .unwrap();
        let deleted = backend
            .delete_by_predicate(&UserFilter::age_at_least(40))
            .unwrap();
        let remaining = store.count_rows("t_user").unwrap();
        affected.push((by_key, by_predicate, deleted, remaining));
    }

    // Ages 20..=119; user 50 now 99, so age >= 50 matches users 30..=99.
    assert_eq!(affected[0], (1, 70, 80, 20));
    assert!(affected.iter().all(|a| a == &affected[0]));
}
