use std::collections::HashSet;

use ci_dispatcher::config::DispatcherConfig;
use ci_dispatcher::error::DispatchError;
use ci_dispatcher::scheduler::{
    CommitId, CommitLedger, CommitStatus, Dispatcher, Liveness, Placement, RunnerId,
    RunnerRegistry,
};

fn commit(id: &str) -> CommitId {
    CommitId::parse(id).unwrap()
}

fn runner(port: u16) -> RunnerId {
    RunnerId::new("localhost", port)
}

/// Each commit must sit in exactly one of the three ledger states
fn assert_single_state(ledger: &CommitLedger, commits: &[CommitId]) {
    let pending: HashSet<CommitId> = ledger.pending().into_iter().collect();
    let assigned: HashSet<CommitId> = ledger.assignments().into_iter().map(|(c, _)| c).collect();
    let completed: HashSet<CommitId> = ledger.completed().into_iter().map(|r| r.commit.clone()).collect();

    for c in commits {
        let hits = [pending.contains(c), assigned.contains(c), completed.contains(c)]
            .iter()
            .filter(|&&hit| hit)
            .count();
        assert!(hits <= 1, "{} appears in {} states", c, hits);
    }
    assert_eq!(pending.len() + assigned.len() + completed.len(), ledger.len());
}

#[test]
fn test_enqueue_is_idempotent() {
    let mut ledger = CommitLedger::new();

    assert!(ledger.enqueue(commit("abc123")));
    assert!(!ledger.enqueue(commit("abc123")));

    assert_eq!(ledger.len(), 1);
    assert_eq!(ledger.pending(), vec![commit("abc123")]);
    assert_eq!(ledger.status(&commit("abc123")), Some(CommitStatus::Pending));
}

#[test]
fn test_enqueue_ignores_assigned_and_completed_commits() {
    let mut ledger = CommitLedger::new();
    let a = commit("aaa");
    let b = commit("bbb");

    ledger.enqueue(a.clone());
    ledger.enqueue(b.clone());
    assert!(ledger.try_assign(&a, &runner(1)));
    ledger.complete(&b, b"done".to_vec()).unwrap();

    assert!(!ledger.enqueue(a.clone()));
    assert!(!ledger.enqueue(b.clone()));
    assert_eq!(ledger.status(&a), Some(CommitStatus::Assigned));
    assert_eq!(ledger.status(&b), Some(CommitStatus::Completed));
    assert_eq!(ledger.pending_len(), 0);
}

#[test]
fn test_try_assign_requires_pending() {
    let mut ledger = CommitLedger::new();
    let c = commit("def456");

    // Unknown commit
    assert!(!ledger.try_assign(&c, &runner(1)));

    ledger.enqueue(c.clone());
    assert!(ledger.try_assign(&c, &runner(1)));
    assert_eq!(ledger.assigned_runner(&c), Some(&runner(1)));

    // Already assigned: the second runner loses
    assert!(!ledger.try_assign(&c, &runner(2)));
    assert_eq!(ledger.assigned_runner(&c), Some(&runner(1)));
}

#[test]
fn test_complete_assigned_commit() {
    let mut ledger = CommitLedger::new();
    let c = commit("def456");
    ledger.enqueue(c.clone());
    ledger.try_assign(&c, &runner(1));

    let assigned_to = ledger.complete(&c, b"hello".to_vec()).unwrap();
    assert_eq!(assigned_to, Some(runner(1)));

    let result = ledger.result(&c).unwrap();
    assert_eq!(result.payload, b"hello");
    assert_eq!(result.runner, Some(runner(1)));
    assert_eq!(ledger.status(&c), Some(CommitStatus::Completed));
    assert!(ledger.assigned_runner(&c).is_none());
}

#[test]
fn test_duplicate_results_are_stale() {
    let mut ledger = CommitLedger::new();
    let c = commit("def456");
    ledger.enqueue(c.clone());
    ledger.try_assign(&c, &runner(1));
    ledger.complete(&c, b"hello".to_vec()).unwrap();

    let second = ledger.complete(&c, b"other".to_vec());
    assert!(matches!(second, Err(DispatchError::StaleResult(ref id)) if id == "def456"));
    assert_eq!(ledger.result(&c).unwrap().payload, b"hello");
    assert_eq!(ledger.len(), 1);
}

#[test]
fn test_results_for_unknown_commit_are_stale() {
    let mut ledger = CommitLedger::new();
    let result = ledger.complete(&commit("nope"), b"x".to_vec());
    assert!(matches!(result, Err(DispatchError::StaleResult(_))));
    assert!(ledger.is_empty());
}

#[test]
fn test_results_for_pending_commit_are_accepted() {
    let mut ledger = CommitLedger::new();
    let c = commit("abc");
    ledger.enqueue(c.clone());

    assert_eq!(ledger.complete(&c, b"early".to_vec()).unwrap(), None);
    assert_eq!(ledger.status(&c), Some(CommitStatus::Completed));
    assert_eq!(ledger.pending_len(), 0);
}

#[test]
fn test_requeue_moves_assigned_commit_to_back_of_queue() {
    let mut ledger = CommitLedger::new();
    let (a, b) = (commit("aaa"), commit("bbb"));
    ledger.enqueue(a.clone());
    ledger.enqueue(b.clone());
    ledger.try_assign(&a, &runner(1));

    assert!(ledger.requeue(&a));
    assert_eq!(ledger.pending(), vec![b.clone(), a.clone()]);
    assert!(ledger.assigned_runner(&a).is_none());

    // Not assigned any more: no-op
    assert!(!ledger.requeue(&a));
    assert!(!ledger.requeue(&commit("unknown")));
}

#[test]
fn test_requeue_after_completion_is_noop() {
    let mut ledger = CommitLedger::new();
    let c = commit("ccc");
    ledger.enqueue(c.clone());
    ledger.try_assign(&c, &runner(1));
    ledger.complete(&c, Vec::new()).unwrap();

    assert!(!ledger.requeue(&c));
    assert_eq!(ledger.status(&c), Some(CommitStatus::Completed));
}

#[test]
fn test_each_commit_in_exactly_one_state_through_lifecycle() {
    let mut ledger = CommitLedger::new();
    let commits: Vec<CommitId> = (0..6).map(|i| commit(&format!("c{}", i))).collect();

    for c in &commits {
        ledger.enqueue(c.clone());
        ledger.enqueue(c.clone());
    }
    assert_single_state(&ledger, &commits);

    for c in &commits[..4] {
        assert!(ledger.try_assign(c, &runner(1)));
    }
    assert_single_state(&ledger, &commits);

    ledger.complete(&commits[0], b"ok".to_vec()).unwrap();
    ledger.requeue(&commits[1]);
    ledger.complete(&commits[4], b"ok".to_vec()).unwrap();
    assert_single_state(&ledger, &commits);

    assert_eq!(ledger.len(), commits.len());
    assert_eq!(ledger.completed_len(), 2);
    assert_eq!(ledger.assigned_len(), 2);
    assert_eq!(ledger.pending_len(), 2);
}

#[test]
fn test_register_is_idempotent() {
    let mut registry = RunnerRegistry::new();

    assert!(registry.register(runner(8900)).is_none());
    assert_eq!(registry.register(runner(8900)), Some(HashSet::new()));

    assert_eq!(registry.len(), 1);
    assert_eq!(registry.list(), vec![runner(8900)]);
}

#[test]
fn test_registry_keeps_registration_order() {
    let mut registry = RunnerRegistry::new();
    registry.register(runner(3));
    registry.register(runner(1));
    registry.register(runner(2));
    registry.register(runner(1));

    assert_eq!(registry.list(), vec![runner(3), runner(1), runner(2)]);

    registry.evict(&runner(1));
    assert_eq!(registry.list(), vec![runner(3), runner(2)]);
}

#[test]
fn test_evict_returns_held_commits() {
    let mut registry = RunnerRegistry::new();
    registry.register(runner(1));
    registry.note_assigned(&runner(1), &commit("aaa"));
    registry.note_assigned(&runner(1), &commit("bbb"));
    registry.release(&runner(1), &commit("bbb"));

    let held = registry.evict(&runner(1));
    assert_eq!(held, HashSet::from([commit("aaa")]));
    assert!(registry.is_empty());

    // Unknown runner
    assert!(registry.evict(&runner(1)).is_empty());
}

#[test]
fn test_missed_probes_mark_runner_unresponsive() {
    let mut registry = RunnerRegistry::new();
    registry.register(runner(1));
    registry.register(runner(2));

    assert_eq!(registry.record_missed(&runner(1)), Some(1));
    assert_eq!(registry.record_missed(&runner(1)), Some(2));
    assert_eq!(registry.get(&runner(1)).unwrap().liveness, Liveness::Unresponsive);
    assert_eq!(registry.available(), vec![runner(2)]);
    assert_eq!(registry.list().len(), 2);

    registry.record_alive(&runner(1));
    let state = registry.get(&runner(1)).unwrap();
    assert_eq!(state.liveness, Liveness::Alive);
    assert_eq!(state.missed_probes, 0);

    assert_eq!(registry.record_missed(&runner(9)), None);
}

#[test]
fn test_reregistration_replaces_entry() {
    let mut registry = RunnerRegistry::new();
    registry.register(runner(1));
    registry.register(runner(2));
    registry.note_assigned(&runner(1), &commit("aaa"));
    registry.record_missed(&runner(1));

    let held = registry.register(runner(1));
    assert_eq!(held, Some(HashSet::from([commit("aaa")])));

    let state = registry.get(&runner(1)).unwrap();
    assert!(state.is_alive());
    assert_eq!(state.missed_probes, 0);
    assert!(state.assigned.is_empty());
    assert_eq!(registry.list(), vec![runner(1), runner(2)]);
}

// -----------------------------------------------------------------------------
// Dispatcher state transitions that need no runner on the wire
// -----------------------------------------------------------------------------

fn dispatcher(results: &tempfile::TempDir, max_missed_probes: u32) -> Dispatcher {
    let mut config = DispatcherConfig::new("127.0.0.1", 0).with_results_dir(results.path());
    config.max_missed_probes = max_missed_probes;
    config.runner_timeout_ms = 300;
    Dispatcher::new(&config)
}

#[tokio::test]
async fn test_submit_without_runners_keeps_commit_pending() {
    let tmp = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher(&tmp, 1);

    let result = dispatcher.submit(commit("abc123")).await;
    assert!(matches!(result, Err(DispatchError::NoRunnersAvailable)));
    assert_eq!(
        dispatcher.commit_status(&commit("abc123")).await,
        Some(CommitStatus::Pending)
    );

    let again = dispatcher.dispatch(commit("abc123")).await;
    assert!(matches!(again, Err(DispatchError::NoRunnersAvailable)));
    assert_eq!(dispatcher.pending_commits().await, vec![commit("abc123")]);
}

#[tokio::test]
async fn test_place_without_runners() {
    let tmp = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher(&tmp, 1);
    let _ = dispatcher.submit(commit("abc")).await;

    assert_eq!(dispatcher.place(&commit("abc")).await, Placement::NoRunners);
    assert_eq!(dispatcher.place(&commit("unknown")).await, Placement::NotPending);
}

#[tokio::test]
async fn test_unreachable_runner_is_evicted_during_placement() {
    let tmp = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher(&tmp, 1);

    // Reserve a port and release it so connections are refused
    let port = {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap().port()
    };
    let dead = RunnerId::new("127.0.0.1", port);
    dispatcher.register(dead.clone()).await;

    let placement = dispatcher.dispatch(commit("abc")).await.unwrap();
    assert_eq!(placement, Placement::Declined);
    assert!(dispatcher.runners().await.is_empty());
    assert_eq!(
        dispatcher.commit_status(&commit("abc")).await,
        Some(CommitStatus::Pending)
    );
}

#[tokio::test]
async fn test_runner_evicted_after_reaching_miss_threshold() {
    let tmp = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher(&tmp, 2);
    let r = runner(1);
    dispatcher.register(r.clone()).await;

    assert!(dispatcher.runner_failed(&r).await.is_none());
    assert_eq!(dispatcher.runners().await, vec![r.clone()]);

    assert_eq!(dispatcher.runner_failed(&r).await, Some(Vec::new()));
    assert!(dispatcher.runners().await.is_empty());

    // Already gone
    assert!(dispatcher.runner_failed(&r).await.is_none());
}

#[tokio::test]
async fn test_evict_requeues_assigned_commits() {
    let tmp = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher(&tmp, 1);
    let r = runner(1);
    dispatcher.register(r.clone()).await;
    let _ = dispatcher.submit(commit("def456")).await;

    {
        let ledger = dispatcher.ledger();
        let registry = dispatcher.registry();
        let mut ledger = ledger.write().await;
        let mut registry = registry.write().await;
        assert!(ledger.try_assign(&commit("def456"), &r));
        registry.note_assigned(&r, &commit("def456"));
    }

    let requeued = dispatcher.evict(&r).await;
    assert_eq!(requeued, vec![commit("def456")]);
    assert_eq!(
        dispatcher.commit_status(&commit("def456")).await,
        Some(CommitStatus::Pending)
    );
    assert!(dispatcher.runners().await.is_empty());

    // Unknown runner
    assert!(dispatcher.evict(&r).await.is_empty());
}

#[tokio::test]
async fn test_reregistration_requeues_held_commits() {
    let tmp = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher(&tmp, 1);
    let r = runner(1);
    assert!(dispatcher.register(r.clone()).await.is_empty());
    let _ = dispatcher.submit(commit("def456")).await;
    {
        let ledger = dispatcher.ledger();
        let registry = dispatcher.registry();
        let mut ledger = ledger.write().await;
        let mut registry = registry.write().await;
        ledger.try_assign(&commit("def456"), &r);
        registry.note_assigned(&r, &commit("def456"));
    }

    let requeued = dispatcher.register(r.clone()).await;
    assert_eq!(requeued, vec![commit("def456")]);
    assert_eq!(
        dispatcher.commit_status(&commit("def456")).await,
        Some(CommitStatus::Pending)
    );
    assert_eq!(dispatcher.runners().await, vec![r]);
}

#[tokio::test]
async fn test_complete_persists_and_releases_runner() {
    let tmp = tempfile::tempdir().unwrap();
    let dispatcher = dispatcher(&tmp, 1);
    let r = runner(1);
    let c = commit("def456");
    dispatcher.register(r.clone()).await;
    let _ = dispatcher.submit(c.clone()).await;
    {
        let ledger = dispatcher.ledger();
        let registry = dispatcher.registry();
        let mut ledger = ledger.write().await;
        let mut registry = registry.write().await;
        ledger.try_assign(&c, &r);
        registry.note_assigned(&r, &c);
    }

    assert_eq!(dispatcher.complete(&c, b"hello".to_vec()).await.unwrap(), Some(r.clone()));
    assert_eq!(
        std::fs::read(tmp.path().join("def456")).unwrap(),
        b"hello"
    );
    assert!(dispatcher
        .registry()
        .read()
        .await
        .get(&r)
        .unwrap()
        .assigned
        .is_empty());

    let stale = dispatcher.complete(&c, b"again".to_vec()).await;
    assert!(matches!(stale, Err(DispatchError::StaleResult(_))));
    assert_eq!(
        dispatcher.store().load(&c).await.unwrap().as_deref(),
        Some(&b"hello"[..])
    );
}
