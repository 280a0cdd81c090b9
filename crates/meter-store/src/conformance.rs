//! Concurrency checks shared by every backend's test module.
//!
//! Each check takes a store and a prefix for the identifiers it creates, so
//! backends that share a database across runs can pass a unique prefix.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use meter_core::{
    ApplyReason, BillingCustomerId, BillingEvent, BillingSubscriptionId, EventSequence,
    QuotaDecision, QuotaLimit, UserId,
};

use crate::Store;

const LIMIT: u64 = 5;
const CALLS: usize = 60;
const MERGES: i64 = 20;
const ROUNDS: usize = 8;

fn user(id: String) -> UserId {
    UserId::new(id).unwrap()
}

fn event(user_id: &UserId, customer: &str, seq: i64, period_end: DateTime<Utc>) -> BillingEvent {
    BillingEvent {
        user_id: user_id.clone(),
        billing_customer_id: BillingCustomerId::new(customer).unwrap(),
        billing_subscription_id: BillingSubscriptionId::new(format!("sub_{customer}")).unwrap(),
        plan_id: Some(format!("plan_{seq}")),
        current_period_end: Some(period_end),
        event_sequence: EventSequence(seq),
    }
}

/// Resets interleaved with consumes: every decision must be explained by some
/// serial order of the calls.
pub(crate) async fn reset_interleaved_with_consume<S: Store + 'static>(store: Arc<S>, prefix: &str) {
    let user_id = user(format!("{prefix}_reset"));
    let limit = QuotaLimit::new(LIMIT).unwrap();

    let mut consumes = Vec::new();
    let mut resets = Vec::new();
    for i in 0..CALLS {
        let store = Arc::clone(&store);
        let user_id = user_id.clone();
        if i % 10 == 5 {
            resets.push(tokio::spawn(async move { store.reset_quota(&user_id).await }));
        } else {
            consumes.push(tokio::spawn(
                async move { store.consume_quota(&user_id, limit).await },
            ));
        }
    }

    let decisions: Vec<QuotaDecision> = join_all(consumes)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();
    let reset_count = resets.len();
    for record in join_all(resets).await {
        assert_eq!(record.unwrap().unwrap().count, 0);
    }

    let final_count = store.get_quota(&user_id).await.unwrap().unwrap().count;
    assert!(final_count <= LIMIT, "count {final_count} exceeds limit");

    let mut admitted: HashMap<u64, usize> = HashMap::new();
    for decision in &decisions {
        if decision.allowed {
            assert!((1..=LIMIT).contains(&decision.count), "{decision:?}");
            assert_eq!(decision.remaining_before_call, LIMIT - (decision.count - 1));
            *admitted.entry(decision.count).or_default() += 1;
        } else {
            assert_eq!(decision.count, LIMIT, "denied below the limit: {decision:?}");
            assert_eq!(decision.remaining_before_call, 0);
        }
    }

    // Between two resets each counter value is handed out at most once.
    for (count, seen) in &admitted {
        assert!(
            *seen <= reset_count + 1,
            "count {count} admitted {seen} times across {reset_count} resets"
        );
    }
    // The surviving counter was reached one admitted call at a time.
    for count in 1..=final_count {
        assert!(admitted.contains_key(&count), "no admitted call produced {count}");
    }
}

/// Events for one user applied concurrently in a scrambled order: the newest
/// event wins and only one merge creates the record.
pub(crate) async fn concurrent_merges_keep_newest<S: Store + 'static>(store: Arc<S>, prefix: &str) {
    let user_id = user(format!("{prefix}_merge"));
    let customer = format!("{prefix}_cus_merge");
    let base = Utc::now();
    let period_end = |seq: i64| base + Duration::days(seq);

    let merges = (0..MERGES).map(|i| {
        let seq = (i * 7) % MERGES + 1;
        let store = Arc::clone(&store);
        let ev = event(&user_id, &customer, seq, period_end(seq));
        tokio::spawn(async move { store.merge_subscription(&ev).await })
    });
    let outcomes: Vec<_> = join_all(merges)
        .await
        .into_iter()
        .map(|r| r.unwrap().unwrap())
        .collect();

    let created = outcomes
        .iter()
        .filter(|o| o.reason == ApplyReason::Created)
        .count();
    assert_eq!(created, 1);
    assert!(outcomes.iter().all(|o| o.applied || o.is_stale()));

    let record = store.get_subscription(&user_id).await.unwrap().unwrap();
    assert_eq!(record.event_sequence, EventSequence(MERGES));
    assert_eq!(record.plan_id, Some(format!("plan_{MERGES}")));
    assert_eq!(
        record.current_period_end.map(|t| t.timestamp()),
        Some(period_end(MERGES).timestamp())
    );
    assert_eq!(record.billing_customer_id.unwrap().as_str(), customer);
}

/// Two users claiming the same customer at once: exactly one wins and the
/// other is told who owns it.
pub(crate) async fn racing_users_single_owner<S: Store + 'static>(store: Arc<S>, prefix: &str) {
    for round in 0..ROUNDS {
        let customer = format!("{prefix}_cus_race_{round}");
        let a = user(format!("{prefix}_a_{round}"));
        let b = user(format!("{prefix}_b_{round}"));
        let end = Utc::now() + Duration::days(30);

        let claims = [&a, &b].map(|u| {
            let store = Arc::clone(&store);
            let ev = event(u, &customer, 1, end);
            tokio::spawn(async move { store.merge_subscription(&ev).await })
        });
        let [first, second] = claims;
        let first = first.await.unwrap().unwrap();
        let second = second.await.unwrap().unwrap();

        let (winner, loser, rejected) = match (first.applied, second.applied) {
            (true, false) => (&a, &b, second),
            (false, true) => (&b, &a, first),
            other => panic!("round {round}: expected one winner, got {other:?}"),
        };
        match rejected.reason {
            ApplyReason::IdentityConflict(conflict) => assert_eq!(&conflict.owner, winner),
            reason => panic!("round {round}: expected identity conflict, got {reason:?}"),
        }

        assert!(store.get_subscription(loser).await.unwrap().is_none());
        let record = store.get_subscription(winner).await.unwrap().unwrap();
        assert_eq!(record.billing_customer_id.unwrap().as_str(), customer);
    }
}
