//! Test doubles shared by the unit tests.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::daemon::{DownloadDaemon, TaskId, TaskState, TaskStatus, TransferRequest};
use crate::error::{Error, Result, UploadFailure};
use crate::job::{FetchUnit, MessageHandle};
use crate::resolve::{ResolvedSource, Resolver};
use crate::upload::{SendFile, UploadTransport};

struct FakeTask {
    request: TransferRequest,
    polls: u32,
    done: bool,
}

/// In-memory download daemon.
///
/// Each transfer reports `Active` for `steps - 1` polls, then completes by
/// writing the locator's content (default: the locator itself) into the
/// target file.
pub struct FakeDaemon {
    steps: u32,
    tasks: Mutex<HashMap<TaskId, FakeTask>>,
    next_id: AtomicUsize,
    failing: HashSet<String>,
    fail_times: Mutex<HashMap<String, u32>>,
    stalling: HashSet<String>,
    content: HashMap<String, Vec<u8>>,
    create_errors: AtomicU32,
    active: AtomicUsize,
    max_active: AtomicUsize,
    created: AtomicUsize,
    cancelled: Mutex<Vec<TaskId>>,
}

impl Default for FakeDaemon {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeDaemon {
    pub fn new() -> Self {
        Self {
            steps: 1,
            tasks: Mutex::new(HashMap::new()),
            next_id: AtomicUsize::new(1),
            failing: HashSet::new(),
            fail_times: Mutex::new(HashMap::new()),
            stalling: HashSet::new(),
            content: HashMap::new(),
            create_errors: AtomicU32::new(0),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            created: AtomicUsize::new(0),
            cancelled: Mutex::new(Vec::new()),
        }
    }

    pub fn with_steps(mut self, steps: u32) -> Self {
        self.steps = steps.max(1);
        self
    }

    /// Transfers of `locator` always end in `Error`.
    pub fn failing(mut self, locator: &str) -> Self {
        self.failing.insert(locator.to_string());
        self
    }

    /// The first `times` transfers of `locator` end in `Error`.
    pub fn failing_times(self, locator: &str, times: u32) -> Self {
        self.fail_times
            .lock()
            .unwrap()
            .insert(locator.to_string(), times);
        self
    }

    /// Transfers of `locator` never finish.
    pub fn stalling(mut self, locator: &str) -> Self {
        self.stalling.insert(locator.to_string());
        self
    }

    pub fn with_content(mut self, locator: &str, bytes: &[u8]) -> Self {
        self.content.insert(locator.to_string(), bytes.to_vec());
        self
    }

    /// The next `n` create calls fail with an RPC error.
    pub fn rejecting_creates(self, n: u32) -> Self {
        self.create_errors.store(n, Ordering::SeqCst);
        self
    }

    /// Highest number of simultaneously running transfers seen.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn cancelled(&self) -> Vec<TaskId> {
        self.cancelled.lock().unwrap().clone()
    }

    /// Forget every task, as a restarted daemon would.
    pub fn forget_all(&self) {
        let mut tasks = self.tasks.lock().unwrap();
        let running = tasks.values().filter(|t| !t.done).count();
        self.active.fetch_sub(running, Ordering::SeqCst);
        tasks.clear();
    }

    fn finish(&self, task: &mut FakeTask) {
        if !task.done {
            task.done = true;
            self.active.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl DownloadDaemon for FakeDaemon {
    async fn create_transfer(&self, request: &TransferRequest) -> Result<TaskId> {
        let rejected = self
            .create_errors
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if rejected {
            return Err(Error::DaemonRpc {
                code: 1,
                message: "temporarily unavailable".into(),
            });
        }

        let id = TaskId(format!("gid{:04}", self.next_id.fetch_add(1, Ordering::SeqCst)));
        self.created.fetch_add(1, Ordering::SeqCst);
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);

        self.tasks.lock().unwrap().insert(
            id.clone(),
            FakeTask {
                request: request.clone(),
                polls: 0,
                done: false,
            },
        );
        Ok(id)
    }

    async fn status(&self, task_id: &TaskId) -> Result<TaskStatus> {
        let (state, write): (TaskState, Option<(PathBuf, Vec<u8>)>) = {
            let mut tasks = self.tasks.lock().unwrap();
            let Some(task) = tasks.get_mut(task_id) else {
                return Ok(TaskStatus::missing());
            };
            if task.done {
                return Ok(TaskStatus {
                    state: TaskState::Removed,
                    bytes_done: 0,
                    bytes_total: 0,
                    error: None,
                });
            }

            task.polls += 1;
            let locator = task.request.locator.clone();
            if self.stalling.contains(&locator) || task.polls < self.steps {
                (TaskState::Active, None)
            } else {
                let fail_once = {
                    let mut fail_times = self.fail_times.lock().unwrap();
                    match fail_times.get_mut(&locator) {
                        Some(n) if *n > 0 => {
                            *n -= 1;
                            true
                        }
                        _ => false,
                    }
                };
                self.finish(task);
                if fail_once || self.failing.contains(&locator) {
                    (TaskState::Error, None)
                } else {
                    let bytes = self
                        .content
                        .get(&locator)
                        .cloned()
                        .unwrap_or_else(|| locator.clone().into_bytes());
                    let path = task.request.dir.join(&task.request.file_name);
                    (TaskState::Complete, Some((path, bytes)))
                }
            }
        };

        let total = 100;
        match (state, write) {
            (TaskState::Complete, Some((path, bytes))) => {
                tokio::fs::create_dir_all(path.parent().unwrap()).await?;
                let len = bytes.len() as u64;
                tokio::fs::write(&path, bytes).await?;
                Ok(TaskStatus {
                    state,
                    bytes_done: len,
                    bytes_total: len,
                    error: None,
                })
            }
            (TaskState::Error, _) => Ok(TaskStatus {
                state,
                bytes_done: 0,
                bytes_total: total,
                error: Some("[3] Resource not found".into()),
            }),
            _ => Ok(TaskStatus {
                state,
                bytes_done: 10,
                bytes_total: total,
                error: None,
            }),
        }
    }

    async fn cancel(&self, task_id: &TaskId) -> Result<()> {
        self.cancelled.lock().unwrap().push(task_id.clone());
        if let Some(task) = self.tasks.lock().unwrap().get_mut(task_id) {
            self.finish(task);
        }
        Ok(())
    }

    async fn purge(&self, task_id: &TaskId) -> Result<()> {
        self.tasks.lock().unwrap().remove(task_id);
        Ok(())
    }
}

/// Upload transport recording every call.
#[derive(Default)]
pub struct FakeTransport {
    parts: Mutex<Vec<(i64, u32, Vec<u8>)>>,
    sent: Mutex<Vec<(i64, u32, SendFile)>>,
    /// Parts that fail once with a transient error.
    flaky_parts: Mutex<HashSet<u32>>,
    /// Every part upload fails with this kind.
    broken: Option<UploadFailure>,
    discarded: Mutex<Vec<i64>>,
    max_file_size: Option<u64>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn flaky_at(self, part: u32) -> Self {
        self.flaky_parts.lock().unwrap().insert(part);
        self
    }

    pub fn broken(mut self, kind: UploadFailure) -> Self {
        self.broken = Some(kind);
        self
    }

    pub fn with_max_file_size(mut self, limit: u64) -> Self {
        self.max_file_size = Some(limit);
        self
    }

    /// File ids whose staged parts were dropped.
    pub fn discarded(&self) -> Vec<i64> {
        self.discarded.lock().unwrap().clone()
    }

    /// Part numbers in the order they were accepted.
    pub fn accepted_parts(&self) -> Vec<u32> {
        self.parts.lock().unwrap().iter().map(|(_, p, _)| *p).collect()
    }

    /// Concatenation of accepted parts, in part order.
    pub fn reassembled(&self) -> Vec<u8> {
        let mut parts = self.parts.lock().unwrap().clone();
        parts.sort_by_key(|(_, p, _)| *p);
        parts.dedup_by_key(|(_, p, _)| *p);
        parts.into_iter().flat_map(|(_, _, b)| b).collect()
    }

    pub fn sent(&self) -> Vec<(i64, u32, SendFile)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl UploadTransport for FakeTransport {
    async fn save_part(&self, file_id: i64, part: u32, _total_parts: u32, bytes: Vec<u8>) -> Result<()> {
        if let Some(kind) = self.broken {
            return Err(Error::upload(kind, "rejected"));
        }
        if self.flaky_parts.lock().unwrap().remove(&part) {
            return Err(Error::upload(UploadFailure::Transient, "connection reset"));
        }
        self.parts.lock().unwrap().push((file_id, part, bytes));
        Ok(())
    }

    async fn send_file(&self, file_id: i64, total_parts: u32, file: &SendFile) -> Result<MessageHandle> {
        self.sent.lock().unwrap().push((file_id, total_parts, file.clone()));
        Ok(MessageHandle {
            chat_id: file.chat_id,
            message_id: 1000 + file_id % 1000,
        })
    }

    async fn discard(&self, file_id: i64) -> Result<()> {
        self.discarded.lock().unwrap().push(file_id);
        Ok(())
    }

    fn max_file_size(&self) -> u64 {
        self.max_file_size.unwrap_or(u64::MAX)
    }
}

/// Resolver answering from a fixed table.
#[derive(Default)]
pub struct StaticResolver {
    plans: HashMap<String, ResolvedSource>,
    transient_failures: AtomicU32,
    calls: AtomicU32,
    invalidated: Mutex<Vec<String>>,
}

impl StaticResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, reference: &str, locators: &[&str]) -> Self {
        let units = locators
            .iter()
            .enumerate()
            .map(|(i, l)| FetchUnit::new(i as u32, *l))
            .collect();
        self.plans.insert(
            reference.to_string(),
            ResolvedSource {
                title: Some(format!("title of {}", reference)),
                units,
            },
        );
        self
    }

    /// The next `n` calls fail.
    pub fn failing_times(self, n: u32) -> Self {
        self.transient_failures.store(n, Ordering::SeqCst);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    /// References whose cached plan was dropped.
    pub fn invalidated(&self) -> Vec<String> {
        self.invalidated.lock().unwrap().clone()
    }
}

#[async_trait]
impl Resolver for StaticResolver {
    async fn resolve(&self, reference: &str) -> Result<ResolvedSource> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing = self
            .transient_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(Error::UnresolvableSource("manifest host unreachable".into()));
        }
        self.plans
            .get(reference)
            .cloned()
            .ok_or_else(|| Error::UnresolvableSource(format!("unknown reference {}", reference)))
    }

    async fn invalidate(&self, reference: &str) -> Result<()> {
        self.invalidated.lock().unwrap().push(reference.to_string());
        Ok(())
    }
}
