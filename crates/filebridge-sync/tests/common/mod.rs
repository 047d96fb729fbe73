//! Shared test doubles for the sync integration tests
//!
//! - [`MemoryTransport`] serves a scripted remote directory and records
//!   uploads. Names in `RemoteState::reject` fail to store.
//! - [`MemoryRepository`] scripts `get_next_sync` answers and records every
//!   run result.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::anyhow;
use chrono::{DateTime, Utc};

use filebridge_core::config::SyncConfig;
use filebridge_core::domain::{
    Endpoint, EndpointId, FileEntry, FileProbe, InstanceId, NextSync, Protocol, Schedule,
    ScheduleId, SyncResult, TransferError,
};
use filebridge_core::ports::{
    ChannelSink, ITransferRepository, ITransport, ITransportFactory, ModifyOp, Notifier,
    SyncEvent,
};
use filebridge_sync::SyncContext;
use tokio::sync::mpsc::UnboundedReceiver;

// ============================================================================
// Remote side
// ============================================================================

/// Contents of the fake remote directory
#[derive(Debug, Default)]
pub struct RemoteState {
    pub listing: Vec<FileEntry>,
    pub contents: HashMap<String, Vec<u8>>,
    pub stored: HashMap<String, u64>,
    pub reject: HashSet<String>,
    pub connects: usize,
}

pub type SharedRemote = Arc<Mutex<RemoteState>>;

/// Remote directory holding `files` (name, content), modified at `modified`
pub fn remote_with(files: &[(&str, &str)], modified: DateTime<Utc>) -> SharedRemote {
    let mut state = RemoteState::default();
    for (name, content) in files {
        state
            .listing
            .push(FileEntry::new(*name, content.len() as u64, modified));
        state
            .contents
            .insert(name.to_string(), content.as_bytes().to_vec());
    }
    Arc::new(Mutex::new(state))
}

pub struct MemoryTransport {
    local_dir: PathBuf,
    protocol: Protocol,
    remote: SharedRemote,
}

#[async_trait::async_trait]
impl ITransport for MemoryTransport {
    async fn connect(&mut self) -> Result<(), TransferError> {
        self.remote.lock().unwrap().connects += 1;
        Ok(())
    }

    async fn list_files(&mut self) -> Result<Vec<FileEntry>, TransferError> {
        Ok(self.remote.lock().unwrap().listing.clone())
    }

    async fn fetch_one(&mut self, name: &str) -> Result<u64, TransferError> {
        let content = self
            .remote
            .lock()
            .unwrap()
            .contents
            .get(name)
            .cloned()
            .ok_or_else(|| TransferError::file(name, "no such remote file"))?;
        tokio::fs::write(self.local_dir.join(name), &content).await?;
        Ok(content.len() as u64)
    }

    async fn store_one(&mut self, local_file: &Path) -> Result<u64, TransferError> {
        let size = tokio::fs::metadata(local_file).await?.len();
        let name = local_file
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let mut remote = self.remote.lock().unwrap();
        if remote.reject.contains(&name) {
            return Err(TransferError::Remote(format!("552 cannot store {name}")));
        }
        remote.stored.insert(name, size);
        Ok(size)
    }

    async fn remote_size(&mut self, name: &str) -> Result<Option<u64>, TransferError> {
        Ok(self.remote.lock().unwrap().stored.get(name).copied())
    }

    async fn disconnect(&mut self) {}

    fn protocol(&self) -> Protocol {
        self.protocol
    }
}

/// Factory handing out [`MemoryTransport`]s over one shared remote
pub struct MemoryFactory {
    pub remote: SharedRemote,
    pub created: AtomicUsize,
}

impl MemoryFactory {
    pub fn new(remote: SharedRemote) -> Arc<Self> {
        Arc::new(Self {
            remote,
            created: AtomicUsize::new(0),
        })
    }
}

impl ITransportFactory for MemoryFactory {
    fn create(&self, endpoint: &Endpoint) -> Result<Box<dyn ITransport>, TransferError> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MemoryTransport {
            local_dir: endpoint.local_dir().clone(),
            protocol: endpoint.protocol,
            remote: Arc::clone(&self.remote),
        }))
    }
}

// ============================================================================
// Repository
// ============================================================================

/// How a run result reached the repository
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Logged {
    Activation,
    Sync,
}

#[derive(Default)]
pub struct MemoryRepository {
    next_sync: Mutex<VecDeque<Result<Option<NextSync>, String>>>,
    endpoints: Mutex<HashMap<ScheduleId, Endpoint>>,
    results: Mutex<Vec<(Logged, SyncResult)>>,
    pub next_sync_calls: AtomicUsize,
    pub select_calls: AtomicUsize,
    /// Makes `verify_file` fail
    pub history_down: AtomicBool,
}

impl MemoryRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queues one `get_next_sync` answer; an empty queue answers `Ok(None)`
    pub fn push_next(&self, answer: Result<Option<NextSync>, &str>) {
        self.next_sync
            .lock()
            .unwrap()
            .push_back(answer.map_err(str::to_string));
    }

    pub fn bind(&self, schedule: ScheduleId, endpoint: Endpoint) {
        self.endpoints.lock().unwrap().insert(schedule, endpoint);
    }

    pub fn results(&self) -> Vec<(Logged, SyncResult)> {
        self.results.lock().unwrap().clone()
    }

    pub fn syncs(&self) -> Vec<SyncResult> {
        self.results()
            .into_iter()
            .filter(|(logged, _)| *logged == Logged::Sync)
            .map(|(_, r)| r)
            .collect()
    }
}

#[async_trait::async_trait]
impl ITransferRepository for MemoryRepository {
    async fn init_instance(&self, _hostname: &str) -> anyhow::Result<InstanceId> {
        Ok(InstanceId::new(1))
    }

    async fn get_endpoints(&self, _instance: InstanceId) -> anyhow::Result<Vec<Endpoint>> {
        Ok(self.endpoints.lock().unwrap().values().cloned().collect())
    }

    async fn get_schedules(&self, _endpoint: EndpointId) -> anyhow::Result<Vec<Schedule>> {
        Ok(Vec::new())
    }

    async fn modify_endpoint(&self, _endpoint: &mut Endpoint, _op: ModifyOp) -> anyhow::Result<()> {
        Ok(())
    }

    async fn modify_schedule(&self, _schedule: &mut Schedule, _op: ModifyOp) -> anyhow::Result<()> {
        Ok(())
    }

    async fn get_next_sync(&self, _instance: InstanceId) -> anyhow::Result<Option<NextSync>> {
        self.next_sync_calls.fetch_add(1, Ordering::SeqCst);
        match self.next_sync.lock().unwrap().pop_front() {
            Some(Ok(item)) => Ok(item),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Ok(None),
        }
    }

    async fn select_endpoint(&self, schedule: ScheduleId) -> anyhow::Result<Option<Endpoint>> {
        self.select_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.endpoints.lock().unwrap().get(&schedule).cloned())
    }

    async fn log_activation(&self, result: &SyncResult) -> anyhow::Result<()> {
        self.results
            .lock()
            .unwrap()
            .push((Logged::Activation, result.clone()));
        Ok(())
    }

    async fn log_sync(&self, result: &SyncResult) -> anyhow::Result<()> {
        self.results
            .lock()
            .unwrap()
            .push((Logged::Sync, result.clone()));
        Ok(())
    }

    async fn verify_file(&self, _probe: &FileProbe) -> anyhow::Result<bool> {
        if self.history_down.load(Ordering::SeqCst) {
            return Err(anyhow!("database is locked"));
        }
        Ok(false)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Endpoint 7 on a plain FTP host, local directory `dir`
pub fn endpoint(dir: &Path) -> Endpoint {
    Endpoint::new(
        EndpointId::new(7),
        InstanceId::new(1),
        Protocol::PlainFtp,
        "files.example.com",
        "/outgoing",
        dir,
    )
}

/// Context with default settings and a channel sink
pub fn context(settings: SyncConfig) -> (SyncContext, UnboundedReceiver<SyncEvent>) {
    let (sink, rx) = ChannelSink::new();
    let ctx = SyncContext::new(InstanceId::new(1), settings, Notifier::new(Arc::new(sink)));
    (ctx, rx)
}

/// Everything published so far
pub fn drain(rx: &mut UnboundedReceiver<SyncEvent>) -> Vec<SyncEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

/// Polls `condition` every 10 ms until it holds or `limit` elapses
pub async fn wait_until(limit: Duration, condition: impl Fn() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
