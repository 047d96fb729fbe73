//! Integration tests: Dispatcher scheduling loop and manual runs

mod common;

use std::collections::HashSet;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use filebridge_core::config::{DispatcherConfig, SyncConfig};
use filebridge_core::domain::{EndpointId, NextSync, RunTag, ScheduleId};
use filebridge_core::ports::{StatusKind, SyncEvent};
use filebridge_sync::{Dispatcher, DispatcherState};

use common::{context, drain, endpoint, remote_with, wait_until, MemoryFactory, MemoryRepository};

fn due_now(schedule: i64) -> NextSync {
    NextSync::Scheduled {
        schedule_id: ScheduleId::new(schedule),
        endpoint_id: EndpointId::new(7),
        name: "nightly".to_string(),
        due: Utc::now() - chrono::Duration::seconds(1),
    }
}

fn statuses(events: &[SyncEvent], kind: StatusKind) -> Vec<String> {
    events
        .iter()
        .filter_map(|e| match e {
            SyncEvent::Status { kind: k, message } if *k == kind => Some(message.clone()),
            _ => None,
        })
        .collect()
}

#[tokio::test(start_paused = true)]
async fn test_schedule_read_error_backs_off_and_restarts() {
    let repo = MemoryRepository::new();
    repo.push_next(Err("disk full"));
    let factory = MemoryFactory::new(remote_with(&[], Utc::now()));
    let (ctx, mut rx) = context(SyncConfig::default());

    let dispatcher = Dispatcher::new(repo.clone(), factory, ctx, DispatcherConfig::default());
    dispatcher.start();

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(repo.next_sync_calls.load(Ordering::SeqCst), 1);
    assert_eq!(dispatcher.state(), DispatcherState::ErrorBackoff);

    tokio::time::sleep(Duration::from_secs(541)).await;
    assert_eq!(repo.next_sync_calls.load(Ordering::SeqCst), 2);

    let events = drain(&mut rx);
    let errors = statuses(&events, StatusKind::Error);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("disk full"));
    let warnings = statuses(&events, StatusKind::Warning);
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("10 minutes"));

    dispatcher.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_no_schedule_stops_the_loop() {
    let repo = MemoryRepository::new();
    let factory = MemoryFactory::new(remote_with(&[], Utc::now()));
    let (ctx, mut rx) = context(SyncConfig::default());

    let dispatcher = Dispatcher::new(repo.clone(), factory, ctx, DispatcherConfig::default());
    dispatcher.start();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(dispatcher.state(), DispatcherState::Stopped);
    assert!(!dispatcher.is_running());
    let infos = statuses(&drain(&mut rx), StatusKind::InfoMessage);
    assert!(infos.iter().any(|m| m.contains("No transfer schedule")));
}

#[tokio::test(start_paused = true)]
async fn test_same_fingerprint_dispatches_once() {
    let local = tempfile::tempdir().unwrap();
    let repo = MemoryRepository::new();
    let item = due_now(3);
    repo.push_next(Ok(Some(item.clone())));
    repo.push_next(Ok(Some(item.clone())));
    repo.push_next(Ok(Some(item)));
    repo.bind(ScheduleId::new(3), endpoint(local.path()));
    let factory = MemoryFactory::new(remote_with(&[], Utc::now()));
    let (ctx, _rx) = context(SyncConfig::default());

    let dispatcher = Dispatcher::new(repo.clone(), factory.clone(), ctx, DispatcherConfig::default());
    dispatcher.start();
    tokio::time::sleep(Duration::from_secs(30)).await;
    dispatcher.shutdown().await;

    assert_eq!(repo.next_sync_calls.load(Ordering::SeqCst), 4);
    assert_eq!(repo.select_calls.load(Ordering::SeqCst), 1);
    assert_eq!(factory.created.load(Ordering::SeqCst), 1);
    // nothing to download: the run is recorded as an activation
    let results = repo.results();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].1.tag, RunTag::Scheduled(ScheduleId::new(3)));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_manual_run_concurrent_with_scheduled_run() {
    let local = tempfile::tempdir().unwrap();
    let ep = endpoint(local.path());
    let repo = MemoryRepository::new();
    repo.push_next(Ok(Some(due_now(3))));
    repo.bind(ScheduleId::new(3), ep.clone());
    let factory = MemoryFactory::new(remote_with(&[("a.txt", "0123456789")], Utc::now()));
    let settings = SyncConfig {
        verify_after_transfer: false,
        ..SyncConfig::default()
    };
    let (ctx, _rx) = context(settings);

    let dispatcher = Dispatcher::new(repo.clone(), factory, ctx, DispatcherConfig::default());
    dispatcher.start();
    dispatcher.run_now(ep.clone()).await;

    let both = wait_until(Duration::from_secs(5), || repo.syncs().len() == 2).await;
    assert!(both, "expected two recorded runs, got {:?}", repo.results());
    dispatcher.shutdown().await;

    let tags: HashSet<i64> = repo.syncs().iter().map(|r| r.tag.as_i64()).collect();
    assert_eq!(tags, HashSet::from([-7, 3]));
    assert_eq!(dispatcher.files_transferred(), 2);
}

#[tokio::test]
async fn test_run_for_unbound_schedule_reports_error() {
    let repo = MemoryRepository::new();
    repo.push_next(Ok(Some(due_now(9))));
    let factory = MemoryFactory::new(remote_with(&[], Utc::now()));
    let (ctx, mut rx) = context(SyncConfig::default());

    let dispatcher = Dispatcher::new(repo.clone(), factory.clone(), ctx, DispatcherConfig::default());
    dispatcher.start();
    let selected = wait_until(Duration::from_secs(5), || {
        repo.select_calls.load(Ordering::SeqCst) == 1
    })
    .await;
    assert!(selected);
    dispatcher.shutdown().await;

    assert_eq!(factory.created.load(Ordering::SeqCst), 0);
    let errors = statuses(&drain(&mut rx), StatusKind::Error);
    assert!(errors.iter().any(|m| m.contains("No endpoint bound")));
}

#[tokio::test]
async fn test_stop_reports_transferred_total() {
    let repo = MemoryRepository::new();
    let factory = MemoryFactory::new(remote_with(&[], Utc::now()));
    let (ctx, mut rx) = context(SyncConfig::default());

    let dispatcher = Dispatcher::new(repo, factory, ctx, DispatcherConfig::default());
    assert_eq!(dispatcher.state(), DispatcherState::Idle);
    dispatcher.stop();

    let infos = statuses(&drain(&mut rx), StatusKind::InfoMessage);
    assert!(infos.iter().any(|m| m.contains("0 file(s) transferred")));
}

#[tokio::test(start_paused = true)]
async fn test_restart_does_not_dispatch_same_item_twice() {
    let local = tempfile::tempdir().unwrap();
    let repo = MemoryRepository::new();
    let item = due_now(3);
    for _ in 0..3 {
        repo.push_next(Ok(Some(item.clone())));
    }
    repo.bind(ScheduleId::new(3), endpoint(local.path()));
    let factory = MemoryFactory::new(remote_with(&[], Utc::now()));
    let (ctx, _rx) = context(SyncConfig::default());

    let dispatcher = Dispatcher::new(repo.clone(), factory, ctx, DispatcherConfig::default());
    dispatcher.start();
    tokio::task::yield_now().await;
    dispatcher.stop();
    dispatcher.start();

    tokio::time::sleep(Duration::from_secs(30)).await;
    dispatcher.shutdown().await;

    assert_eq!(repo.select_calls.load(Ordering::SeqCst), 1);
    assert_eq!(repo.results().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_stopped_loop_ends_in_stopped_state() {
    let repo = MemoryRepository::new();
    repo.push_next(Err("disk full"));
    let factory = MemoryFactory::new(remote_with(&[], Utc::now()));
    let (ctx, _rx) = context(SyncConfig::default());

    let dispatcher = Dispatcher::new(repo.clone(), factory, ctx, DispatcherConfig::default());
    dispatcher.start();
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert_eq!(dispatcher.state(), DispatcherState::ErrorBackoff);

    dispatcher.shutdown().await;
    assert_eq!(dispatcher.state(), DispatcherState::Stopped);
    assert!(!dispatcher.is_running());
    assert_eq!(repo.next_sync_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_download_failure_reported_as_transfer_error() {
    let local = tempfile::tempdir().unwrap();
    let ep = endpoint(local.path());
    let repo = MemoryRepository::new();
    let remote = remote_with(&[("a.txt", "0123456789")], Utc::now());
    // listed but gone by the time it is fetched
    remote.lock().unwrap().contents.clear();
    let factory = MemoryFactory::new(remote);
    let (ctx, mut rx) = context(SyncConfig::default());

    let dispatcher = Dispatcher::new(repo.clone(), factory, ctx, DispatcherConfig::default());
    dispatcher.run_now(ep).await;

    let failures = statuses(&drain(&mut rx), StatusKind::TransferError);
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("a.txt"), "{}", failures[0]);
    assert!(repo.results().is_empty());
    assert_eq!(dispatcher.files_transferred(), 0);
}

#[tokio::test]
async fn test_history_error_counts_as_not_transferred() {
    let repo = MemoryRepository::new();
    repo.history_down.store(true, Ordering::SeqCst);
    let factory = MemoryFactory::new(remote_with(&[], Utc::now()));
    let (ctx, mut rx) = context(SyncConfig::default());

    let dispatcher = Dispatcher::new(repo, factory, ctx, DispatcherConfig::default());
    assert!(!dispatcher.check_database("a.txt", 10, Utc::now()).await);

    let errors = statuses(&drain(&mut rx), StatusKind::Error);
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("database is locked"));
}
