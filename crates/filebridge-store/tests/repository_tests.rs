//! Integration tests for SqliteTransferRepository
//!
//! Every test works on a fresh in-memory SQLite database.

use std::path::PathBuf;

use chrono::{TimeZone, Utc, Weekday};

use filebridge_core::domain::{
    Credentials, Direction, Endpoint, EndpointId, FileProbe, InstanceId, NextSync, Protocol,
    RunTag, Schedule, ScheduleId, ScrambledSecret, SyncResult, TransferMode, TransferredFile,
    WeekPoint,
};
use filebridge_core::ports::{ITransferRepository, ModifyOp};
use filebridge_store::{DatabasePool, SqliteTransferRepository};

// ============================================================================
// Test helpers
// ============================================================================

async fn setup() -> SqliteTransferRepository {
    let pool = DatabasePool::in_memory()
        .await
        .expect("Failed to create in-memory database");
    SqliteTransferRepository::new(pool.pool().clone())
}

async fn insert_endpoint(repo: &SqliteTransferRepository, instance: InstanceId) -> Endpoint {
    let mut endpoint = Endpoint::new(
        EndpointId::new(0),
        instance,
        Protocol::Sftp,
        "sftp.example.com",
        "outgoing/daily",
        "/srv/filebridge/in",
    )
    .with_credentials(Credentials::private_key(
        "transfer",
        ScrambledSecret::new("eJzLSM3JyQcABiwCFQ=="),
        Some("hunter2".to_string()),
    ))
    .with_direction(Direction::GET | Direction::HOTFOLDER_PUT)
    .with_transfer_mode(TransferMode::Ascii)
    .with_port(2222);
    repo.modify_endpoint(&mut endpoint, ModifyOp::Insert)
        .await
        .unwrap();
    endpoint
}

/// Runs every 5 minutes across the whole week
fn all_week(endpoint: EndpointId) -> Schedule {
    Schedule::new(
        ScheduleId::new(0),
        endpoint,
        "continuous",
        WeekPoint::new(Weekday::Mon, 0, 0).unwrap(),
        WeekPoint::new(Weekday::Sun, 23, 55).unwrap(),
        5,
    )
}

fn transferred(name: &str, size: u64) -> TransferredFile {
    TransferredFile {
        name: name.to_string(),
        size,
        modified: Utc.with_ymd_and_hms(2024, 3, 4, 8, 30, 0).unwrap(),
        checksum: "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad".to_string(),
    }
}

// ============================================================================
// Instances
// ============================================================================

#[tokio::test]
async fn test_init_instance_is_idempotent() {
    let repo = setup().await;
    let first = repo.init_instance("worker-01").await.unwrap();
    let again = repo.init_instance("worker-01").await.unwrap();
    let other = repo.init_instance("worker-02").await.unwrap();

    assert_eq!(first, again);
    assert_ne!(first, other);
}

// ============================================================================
// Endpoints
// ============================================================================

#[tokio::test]
async fn test_endpoint_insert_assigns_id_and_reloads() {
    let repo = setup().await;
    let instance = repo.init_instance("worker-01").await.unwrap();
    let endpoint = insert_endpoint(&repo, instance).await;
    assert!(endpoint.id.as_i64() > 0);

    let loaded = repo.get_endpoints(instance).await.unwrap();
    assert_eq!(loaded.len(), 1);
    let loaded = &loaded[0];
    assert_eq!(loaded, &endpoint);
    assert_eq!(loaded.remote_dir.as_str(), "/outgoing/daily");
    assert_eq!(loaded.local_dir(), &PathBuf::from("/srv/filebridge/in/"));
    assert_eq!(loaded.port, Some(2222));
    assert!(loaded.direction.contains(Direction::HOTFOLDER_PUT));
}

#[tokio::test]
async fn test_endpoint_update_and_delete() {
    let repo = setup().await;
    let instance = repo.init_instance("worker-01").await.unwrap();
    let mut endpoint = insert_endpoint(&repo, instance).await;
    let mut schedule = all_week(endpoint.id);
    repo.modify_schedule(&mut schedule, ModifyOp::Insert)
        .await
        .unwrap();

    endpoint.host = "backup.example.com".to_string();
    repo.modify_endpoint(&mut endpoint, ModifyOp::Update)
        .await
        .unwrap();
    let loaded = repo.get_endpoints(instance).await.unwrap();
    assert_eq!(loaded[0].host, "backup.example.com");

    repo.modify_endpoint(&mut endpoint, ModifyOp::Delete)
        .await
        .unwrap();
    assert!(repo.get_endpoints(instance).await.unwrap().is_empty());
    // schedules go with their endpoint
    assert!(repo.get_schedules(endpoint.id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_update_of_unknown_endpoint_fails() {
    let repo = setup().await;
    let instance = repo.init_instance("worker-01").await.unwrap();
    let mut endpoint = Endpoint::new(
        EndpointId::new(404),
        instance,
        Protocol::PlainFtp,
        "ftp.example.com",
        "/",
        "/tmp/in",
    );
    assert!(repo
        .modify_endpoint(&mut endpoint, ModifyOp::Update)
        .await
        .is_err());
}

// ============================================================================
// Schedules
// ============================================================================

#[tokio::test]
async fn test_schedule_insert_and_select_endpoint() {
    let repo = setup().await;
    let instance = repo.init_instance("worker-01").await.unwrap();
    let endpoint = insert_endpoint(&repo, instance).await;

    let mut schedule = all_week(endpoint.id);
    repo.modify_schedule(&mut schedule, ModifyOp::Insert)
        .await
        .unwrap();
    assert!(schedule.id.as_i64() > 0);

    let schedules = repo.get_schedules(endpoint.id).await.unwrap();
    assert_eq!(schedules, vec![schedule.clone()]);
    assert_eq!(schedules[0].repeats(), 2016);

    let bound = repo.select_endpoint(schedule.id).await.unwrap();
    assert_eq!(bound.map(|e| e.id), Some(endpoint.id));
    assert!(repo
        .select_endpoint(ScheduleId::new(999))
        .await
        .unwrap()
        .is_none());
}

#[tokio::test]
async fn test_invalid_schedule_is_rejected() {
    let repo = setup().await;
    let instance = repo.init_instance("worker-01").await.unwrap();
    let endpoint = insert_endpoint(&repo, instance).await;

    let mut schedule = all_week(endpoint.id);
    schedule.stride_minutes = 2;
    assert!(repo
        .modify_schedule(&mut schedule, ModifyOp::Insert)
        .await
        .is_err());
    assert_eq!(schedule.id, ScheduleId::new(0));
}

#[tokio::test]
async fn test_next_sync_without_schedules_is_none() {
    let repo = setup().await;
    let instance = repo.init_instance("worker-01").await.unwrap();
    insert_endpoint(&repo, instance).await;

    assert!(repo.get_next_sync(instance).await.unwrap().is_none());
}

#[tokio::test]
async fn test_next_sync_ignores_disabled_schedules() {
    let repo = setup().await;
    let instance = repo.init_instance("worker-01").await.unwrap();
    let endpoint = insert_endpoint(&repo, instance).await;
    let mut schedule = all_week(endpoint.id);
    schedule.enabled = false;
    repo.modify_schedule(&mut schedule, ModifyOp::Insert)
        .await
        .unwrap();

    assert!(repo.get_next_sync(instance).await.unwrap().is_none());
}

#[tokio::test]
async fn test_next_sync_picks_enabled_schedule() {
    let repo = setup().await;
    let instance = repo.init_instance("worker-01").await.unwrap();
    let endpoint = insert_endpoint(&repo, instance).await;
    let mut schedule = all_week(endpoint.id);
    repo.modify_schedule(&mut schedule, ModifyOp::Insert)
        .await
        .unwrap();

    let next = repo.get_next_sync(instance).await.unwrap().expect("a due item");
    match next {
        NextSync::Scheduled {
            schedule_id, due, ..
        } => {
            assert_eq!(schedule_id, schedule.id);
            assert!(due - Utc::now() <= chrono::Duration::minutes(5));
            let reloaded = repo.get_endpoints(instance).await.unwrap();
            assert!(reloaded[0].next_sync.is_some());
        }
        // only in the last minutes of the week
        NextSync::Rollover { due } => assert!(due > Utc::now()),
    }

    let other = repo.init_instance("worker-02").await.unwrap();
    assert!(repo.get_next_sync(other).await.unwrap().is_none());
}

// ============================================================================
// Run history
// ============================================================================

#[tokio::test]
async fn test_log_sync_records_files_and_bumps_last_sync() {
    let repo = setup().await;
    let instance = repo.init_instance("worker-01").await.unwrap();
    let endpoint = insert_endpoint(&repo, instance).await;
    let run_time = Utc.with_ymd_and_hms(2024, 3, 4, 9, 0, 0).unwrap();

    let result = SyncResult::new(
        RunTag::Manual(endpoint.id),
        endpoint.id,
        Direction::GET,
        run_time,
        vec![transferred("a.csv", 10), transferred("b.csv", 20)],
    );
    repo.log_sync(&result).await.unwrap();

    let reloaded = repo.get_endpoints(instance).await.unwrap();
    assert_eq!(reloaded[0].last_sync, Some(run_time));

    let probe = FileProbe {
        instance_id: instance,
        name: "a.csv".to_string(),
        size: 10,
        modified: Utc.with_ymd_and_hms(2024, 3, 4, 8, 30, 0).unwrap(),
    };
    assert!(repo.verify_file(&probe).await.unwrap());

    let resized = FileProbe {
        size: 11,
        ..probe.clone()
    };
    assert!(!repo.verify_file(&resized).await.unwrap());

    let elsewhere = FileProbe {
        instance_id: InstanceId::new(instance.as_i64() + 1),
        ..probe
    };
    assert!(!repo.verify_file(&elsewhere).await.unwrap());
}

#[tokio::test]
async fn test_log_activation_without_files() {
    let repo = setup().await;
    let instance = repo.init_instance("worker-01").await.unwrap();
    let endpoint = insert_endpoint(&repo, instance).await;
    let run_time = Utc.with_ymd_and_hms(2024, 3, 5, 9, 0, 0).unwrap();

    let result = SyncResult::new(
        RunTag::Scheduled(ScheduleId::new(1)),
        endpoint.id,
        Direction::GET,
        run_time,
        Vec::new(),
    );
    repo.log_activation(&result).await.unwrap();

    let reloaded = repo.get_endpoints(instance).await.unwrap();
    assert_eq!(reloaded[0].last_sync, Some(run_time));
}

#[tokio::test]
async fn test_logging_for_unknown_endpoint_fails() {
    let repo = setup().await;
    let result = SyncResult::new(
        RunTag::Hotfolder(EndpointId::new(77)),
        EndpointId::new(77),
        Direction::HOTFOLDER_PUT,
        Utc::now(),
        vec![transferred("x.csv", 1)],
    );
    assert!(repo.log_sync(&result).await.is_err());
}
