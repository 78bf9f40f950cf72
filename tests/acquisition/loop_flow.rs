use tokio::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

use eipkeeper::{
    acquisition::{AcquisitionErrorKind, AcquisitionSettings, RunOutcome},
    provider::{ProviderError, ProviderErrorKind},
    session::{AllocatedAddress, SessionRecord, SessionStore},
};

use super::{ScriptedProvider, allocation_id, loop_with_store, test_settings};

fn kept(ip: &str) -> AllocatedAddress {
    AllocatedAddress {
        ip: ip.to_string(),
        allocation_id: allocation_id(ip),
    }
}

#[tokio::test(start_paused = true)]
async fn given_mixed_addresses_when_run_then_quota_is_reached_over_two_batches() {
    let (engine, store) = loop_with_store(test_settings());
    let provider = ScriptedProvider::with_addresses(&[
        "43.204.6.17",
        "10.0.0.5",
        "43.204.10.8",
        "43.204.11.2",
        "8.8.8.8",
        "43.204.16.40",
        "43.204.17.99",
    ]);
    let (session, _) = store
        .get_or_create("scenario", 5)
        .await
        .expect("session should be created");

    let started = Instant::now();
    let report = engine
        .run(session, &provider, &CancellationToken::new())
        .await
        .expect("run should complete");

    assert_eq!(report.outcome, RunOutcome::Complete);
    assert_eq!(report.batches, 2);
    assert_eq!(report.acquisitions, 7);
    assert_eq!(
        report.status.created_ips,
        vec![
            "43.204.6.17",
            "10.0.0.5",
            "43.204.10.8",
            "43.204.11.2",
            "8.8.8.8",
            "43.204.16.40",
            "43.204.17.99",
        ]
    );
    assert_eq!(
        report.status.allocated_ips,
        vec![
            kept("43.204.6.17"),
            kept("43.204.10.8"),
            kept("43.204.11.2"),
            kept("43.204.16.40"),
            kept("43.204.17.99"),
        ]
    );
    assert_eq!(report.status.released_ips, vec!["10.0.0.5", "8.8.8.8"]);
    assert_eq!(
        provider.release_calls(),
        vec![allocation_id("10.0.0.5"), allocation_id("8.8.8.8")]
    );

    // one batch wait plus a unit pause after each of the two releases
    assert!(started.elapsed() >= Duration::from_secs(62));

    let stored = store
        .get("scenario")
        .await
        .expect("store read should succeed")
        .expect("session should exist");
    assert_eq!(stored.allocated_ips.len(), 5);
    assert_eq!(stored.batch_size, 0);
}

#[tokio::test(start_paused = true)]
async fn duplicate_address_is_skipped_without_counting_towards_quota() {
    let settings = AcquisitionSettings {
        quota: 2,
        ..test_settings()
    };
    let (engine, store) = loop_with_store(settings);
    let provider = ScriptedProvider::with_addresses(&[
        "43.204.6.17",
        "43.204.6.17",
        "43.205.28.1",
    ]);
    let (session, _) = store
        .get_or_create("dedup", 2)
        .await
        .expect("session should be created");

    let report = engine
        .run(session, &provider, &CancellationToken::new())
        .await
        .expect("run should complete");

    assert_eq!(report.outcome, RunOutcome::Complete);
    assert_eq!(report.status.created_ips, vec!["43.204.6.17", "43.205.28.1"]);
    assert_eq!(
        report.status.allocated_ips,
        vec![kept("43.204.6.17"), kept("43.205.28.1")]
    );
    assert!(provider.release_calls().is_empty());
    assert_eq!(provider.acquire_calls(), 3);
}

#[tokio::test(start_paused = true)]
async fn complete_session_makes_no_provider_calls() {
    let (engine, store) = loop_with_store(test_settings());
    let mut record = SessionRecord::new("done", 5);
    for last in 1..=5 {
        let ip = format!("43.204.6.{last}");
        record.created_ips.push(ip.clone());
        record.allocated_ips.push(kept(&ip));
    }
    record.batch_size = 0;
    store.insert(record.clone()).await;

    let report = engine
        .run(record, &ScriptedProvider::default(), &CancellationToken::new())
        .await
        .expect("complete session should finish immediately");

    assert_eq!(report.outcome, RunOutcome::Complete);
    assert_eq!(report.batches, 0);
    assert_eq!(report.acquisitions, 0);
}

#[tokio::test(start_paused = true)]
async fn acquire_failure_discards_the_unsaved_batch() {
    let (engine, store) = loop_with_store(test_settings());
    let provider = ScriptedProvider::with_addresses(&["43.204.6.1", "43.204.10.2"]);
    provider.push_acquire_error(
        ProviderError::new(ProviderErrorKind::Rejected, "address limit exceeded")
            .with_provider_code("AddressLimitExceeded"),
    );
    let (session, _) = store
        .get_or_create("acquire-fails", 5)
        .await
        .expect("session should be created");

    let err = engine
        .run(session, &provider, &CancellationToken::new())
        .await
        .expect_err("provider failure must abort the run");

    assert_eq!(err.kind, AcquisitionErrorKind::Provider);
    assert_eq!(
        err.provider_error
            .as_ref()
            .and_then(|inner| inner.provider_code.as_deref()),
        Some("AddressLimitExceeded")
    );

    let stored = store
        .get("acquire-fails")
        .await
        .expect("store read should succeed")
        .expect("session should exist");
    assert!(stored.created_ips.is_empty());
    assert!(stored.allocated_ips.is_empty());
    assert!(stored.released_ips.is_empty());
    assert_eq!(stored.batch_size, 5);
}

#[tokio::test(start_paused = true)]
async fn acquire_failure_in_a_later_batch_keeps_the_earlier_checkpoint() {
    let (engine, store) = loop_with_store(test_settings());
    let provider = ScriptedProvider::with_addresses(&[
        "43.204.6.17",
        "10.0.0.5",
        "43.204.6.1",
        "43.204.6.2",
        "43.204.6.3",
    ]);
    provider.push_acquire_error(ProviderError::new(ProviderErrorKind::Backend, "boom"));
    let (session, _) = store
        .get_or_create("late-failure", 5)
        .await
        .expect("session should be created");

    let err = engine
        .run(session, &provider, &CancellationToken::new())
        .await
        .expect_err("second batch failure must abort the run");
    assert_eq!(err.kind, AcquisitionErrorKind::Provider);
    assert_eq!(provider.acquire_calls(), 6);

    let stored = store
        .get("late-failure")
        .await
        .expect("store read should succeed")
        .expect("session should exist");
    assert_eq!(
        stored.created_ips,
        vec!["43.204.6.17", "10.0.0.5", "43.204.6.1", "43.204.6.2", "43.204.6.3"]
    );
    assert_eq!(stored.allocated_ips.len(), 4);
    assert_eq!(stored.released_ips, vec!["10.0.0.5"]);
    assert_eq!(stored.batch_size, 1);
}

#[tokio::test(start_paused = true)]
async fn attempt_ceiling_stops_a_run_that_never_qualifies() {
    let settings = AcquisitionSettings {
        quota: 2,
        max_acquisitions_per_run: 3,
        ..test_settings()
    };
    let (engine, store) = loop_with_store(settings);
    let provider = ScriptedProvider::with_addresses(&[
        "10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4", "10.0.0.5",
    ]);
    let (session, _) = store
        .get_or_create("runaway", 2)
        .await
        .expect("session should be created");

    let err = engine
        .run(session, &provider, &CancellationToken::new())
        .await
        .expect_err("ceiling must fail the run");

    assert_eq!(err.kind, AcquisitionErrorKind::AttemptBudgetExhausted);
    assert_eq!(provider.acquire_calls(), 3);

    let stored = store
        .get("runaway")
        .await
        .expect("store read should succeed")
        .expect("session should exist");
    assert_eq!(stored.released_ips, vec!["10.0.0.1", "10.0.0.2", "10.0.0.3"]);
    assert!(stored.allocated_ips.is_empty());
}
