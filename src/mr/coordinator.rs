use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use futures::future::{self, Ready};
use futures::StreamExt;
use tarpc::context;
use tarpc::server::incoming::Incoming;
use tokio_serde::formats::Json;
use tracing::{debug, info, warn};

use crate::mr::config::{JobConfig, Tuning};
use crate::mr::error::MrError;
use crate::mr::types::{GetTaskReply, MapTaskInfo, ReduceTaskInfo, TaskKind, TaskStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Map,
    Reduce,
    Done,
}

struct TaskRecord {
    status: TaskStatus,
    started_at: Option<Instant>,
}

impl TaskRecord {
    fn idle() -> Self {
        Self {
            status: TaskStatus::Idle,
            started_at: None,
        }
    }
}

/// Marks a stalled `InProgress` task `Idle` so the caller can reassign it.
/// Must run under the same lock that guards the task table: the mutation
/// and the read it gates are not separable operations.
fn reclaim_if_timed_out(record: &mut TaskRecord, timeout: Duration) -> bool {
    if record.status == TaskStatus::InProgress {
        if let Some(started_at) = record.started_at {
            if started_at.elapsed() > timeout {
                record.status = TaskStatus::Idle;
                record.started_at = None;
            }
        }
    }
    record.status == TaskStatus::Idle
}

struct State {
    phase: Phase,
    files: Vec<String>,
    n_reduce: usize,
    map_tasks: Vec<TaskRecord>,
    reduce_tasks: Vec<TaskRecord>,
    map_done: usize,
    reduce_done: usize,
}

impl State {
    fn new(config: &JobConfig) -> Self {
        Self {
            phase: Phase::Map,
            files: config.files.clone(),
            n_reduce: config.n_reduce,
            map_tasks: (0..config.files.len()).map(|_| TaskRecord::idle()).collect(),
            reduce_tasks: (0..config.n_reduce).map(|_| TaskRecord::idle()).collect(),
            map_done: 0,
            reduce_done: 0,
        }
    }

    /// Lowest-id eligible task wins: this biases re-execution toward the
    /// straggler rather than fair rotation, intentionally.
    fn assign_map(&mut self, tuning: &Tuning) -> GetTaskReply {
        for (idx, record) in self.map_tasks.iter_mut().enumerate() {
            if reclaim_if_timed_out(record, tuning.map_task_timeout) {
                record.status = TaskStatus::InProgress;
                record.started_at = Some(Instant::now());
                return GetTaskReply::map(
                    String::new(),
                    MapTaskInfo {
                        id: idx as i64,
                        input_file: self.files[idx].clone(),
                        n_reduce: self.n_reduce as i64,
                    },
                );
            }
        }
        GetTaskReply::idle(String::new())
    }

    fn assign_reduce(&mut self, tuning: &Tuning) -> GetTaskReply {
        for (idx, record) in self.reduce_tasks.iter_mut().enumerate() {
            if reclaim_if_timed_out(record, tuning.reduce_task_timeout) {
                record.status = TaskStatus::InProgress;
                record.started_at = Some(Instant::now());
                return GetTaskReply::reduce(
                    String::new(),
                    ReduceTaskInfo {
                        id: idx as i64,
                        n_maps: self.map_tasks.len() as i64,
                    },
                );
            }
        }
        GetTaskReply::idle(String::new())
    }

    fn assign_done(&self) -> Result<GetTaskReply, MrError> {
        if self.map_done == self.map_tasks.len() && self.reduce_done == self.reduce_tasks.len() {
            Ok(GetTaskReply::exit(String::new()))
        } else {
            Err(MrError::IncompleteInPhaseDone {
                map_done: self.map_done,
                map_total: self.map_tasks.len(),
                reduce_done: self.reduce_done,
                reduce_total: self.reduce_tasks.len(),
            })
        }
    }

    /// Idempotent: a duplicate or late report for an already-`Completed`
    /// task is a no-op, which is what lets timeout-driven re-execution and
    /// stale reports from reclaimed workers coexist safely.
    fn report_task_done(&mut self, kind: TaskKind, id: i64) -> Result<(), MrError> {
        if id < 0 {
            return Err(MrError::BadArgument(format!("negative task id {id}")));
        }
        let idx = id as usize;
        match kind {
            TaskKind::Map => {
                let record = self
                    .map_tasks
                    .get_mut(idx)
                    .ok_or_else(|| MrError::BadArgument(format!("map id {id} out of range")))?;
                if record.status != TaskStatus::Completed {
                    self.map_done += 1;
                    if self.map_done == self.map_tasks.len() {
                        self.phase = Phase::Reduce;
                    }
                }
                self.map_tasks[idx].status = TaskStatus::Completed;
            }
            TaskKind::Reduce => {
                let record = self
                    .reduce_tasks
                    .get_mut(idx)
                    .ok_or_else(|| MrError::BadArgument(format!("reduce id {id} out of range")))?;
                if record.status != TaskStatus::Completed {
                    self.reduce_done += 1;
                    if self.reduce_done == self.reduce_tasks.len() {
                        self.phase = Phase::Done;
                    }
                }
                self.reduce_tasks[idx].status = TaskStatus::Completed;
            }
        }
        Ok(())
    }
}

/// The coordinator: holds the authoritative task table behind a single
/// coordinator-wide mutex, assigns idle tasks, reclaims stalled ones, and
/// advances the Map -> Reduce -> Done phase machine.
///
/// Cheap to clone: every clone shares the same `Arc<Mutex<State>>`, which
/// is what lets `tarpc` hand one clone to every inbound connection without
/// duplicating state.
#[derive(Clone)]
pub struct Coordinator {
    state: Arc<Mutex<State>>,
    tuning: Tuning,
    job_id: Arc<str>,
}

impl Coordinator {
    pub fn new(config: &JobConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(State::new(config))),
            tuning: config.tuning,
            job_id: Arc::from(config.job_id.as_str()),
        }
    }

    /// True iff phase = Done. Cheap and lock-bounded, safe to poll.
    pub fn done(&self) -> bool {
        matches!(self.state.lock().unwrap().phase, Phase::Done)
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }
}

/// RPC surface between workers and the coordinator: `GetTask` and
/// `ReportTaskDone`, per the wire contract. `Done`/`Stop` are local calls
/// made by the process hosting the coordinator, not RPCs.
#[tarpc::service]
pub trait Server {
    async fn get_task() -> Result<GetTaskReply, MrError>;
    async fn report_task_done(kind: TaskKind, id: i64) -> Result<(), MrError>;
}

#[tarpc::server]
impl Server for Coordinator {
    type GetTaskFut = Ready<Result<GetTaskReply, MrError>>;
    type ReportTaskDoneFut = Ready<Result<(), MrError>>;

    fn get_task(self, _: context::Context) -> Self::GetTaskFut {
        let mut state = self.state.lock().unwrap();
        let result = match state.phase {
            Phase::Map => Ok(state.assign_map(&self.tuning)),
            Phase::Reduce => Ok(state.assign_reduce(&self.tuning)),
            Phase::Done => state.assign_done(),
        };
        drop(state);

        let result = result.map(|mut reply| {
            reply.job_id = self.job_id.to_string();
            reply
        });

        match &result {
            Ok(reply) => debug!(kind = ?reply.kind, job_id = %reply.job_id, "coordinator: assigned task"),
            Err(e) => warn!("coordinator: get_task failed: {e}"),
        }

        future::ready(result)
    }

    fn report_task_done(self, _: context::Context, kind: TaskKind, id: i64) -> Self::ReportTaskDoneFut {
        let mut state = self.state.lock().unwrap();
        let result = state.report_task_done(kind, id);
        drop(state);

        match &result {
            Ok(()) => info!(kind = ?kind, id, "coordinator: task reported done"),
            Err(e) => warn!("coordinator: report_task_done({kind:?}, {id}) failed: {e}"),
        }

        future::ready(result)
    }
}

/// The running RPC server plus the lifecycle controls (`done`/`stop`) the
/// external driver (the coordinator binary's main loop) uses to wait for
/// and then tear down the job.
pub struct CoordinatorServer {
    coordinator: Coordinator,
    listen_addr: SocketAddr,
    listener_task: tokio::task::JoinHandle<()>,
    stopped: Arc<AtomicBool>,
}

impl CoordinatorServer {
    /// Binds the RPC listener and starts serving in the background.
    pub async fn bind(config: JobConfig) -> anyhow::Result<Self> {
        let coordinator = Coordinator::new(&config);
        let server_transport = tarpc::serde_transport::tcp::listen(config.listen_addr, Json::default).await?;
        let local_addr = server_transport.local_addr();
        let coordinator_for_server = coordinator.clone();

        let listener_task = tokio::spawn(
            server_transport
                .filter_map(|r| async { r.ok() })
                .map(tarpc::server::BaseChannel::with_defaults)
                .execute(coordinator_for_server.serve()),
        );

        info!(job_id = %config.job_id, addr = %local_addr, n_map = config.files.len(), n_reduce = config.n_reduce, "coordinator: listening");

        Ok(Self {
            coordinator,
            listen_addr: local_addr,
            listener_task,
            stopped: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn done(&self) -> bool {
        self.coordinator.done()
    }

    pub fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }

    pub fn job_id(&self) -> &str {
        self.coordinator.job_id()
    }

    /// Closes the RPC listener. Idempotent: a second call is a no-op. Does
    /// not interrupt in-flight handlers; they complete naturally.
    pub fn stop(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        self.listener_task.abort();
        info!("coordinator: stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;

    fn config(n_files: usize, n_reduce: usize) -> JobConfig {
        JobConfig {
            files: (0..n_files).map(|i| format!("input-{i}")).collect(),
            n_reduce,
            job_id: "test-job".to_string(),
            listen_addr: "127.0.0.1:0".parse::<SocketAddr>().unwrap(),
            tuning: Tuning::default(),
        }
    }

    #[test]
    fn assigns_lowest_id_map_task_first() {
        let mut state = State::new(&config(3, 2));
        let tuning = Tuning::default();
        let reply = state.assign_map(&tuning);
        assert_eq!(reply.map_task.unwrap().id, 0);
    }

    #[test]
    fn idle_when_all_map_tasks_assigned() {
        let mut state = State::new(&config(1, 1));
        let tuning = Tuning::default();
        let _ = state.assign_map(&tuning);
        let reply = state.assign_map(&tuning);
        assert!(matches!(reply.kind, crate::mr::types::ReplyKind::Idle));
    }

    #[test]
    fn timed_out_in_progress_task_is_reassigned() {
        let mut state = State::new(&config(1, 1));
        let tuning = Tuning {
            map_task_timeout: Duration::from_millis(0),
            ..Tuning::default()
        };
        let _ = state.assign_map(&tuning);
        std::thread::sleep(Duration::from_millis(5));
        let reply = state.assign_map(&tuning);
        assert_eq!(reply.map_task.unwrap().id, 0);
    }

    #[test]
    fn duplicate_report_is_idempotent() {
        let mut state = State::new(&config(1, 1));
        state.report_task_done(TaskKind::Map, 0).unwrap();
        assert_eq!(state.map_done, 1);
        assert_eq!(state.phase, Phase::Reduce);
        state.report_task_done(TaskKind::Map, 0).unwrap();
        assert_eq!(state.map_done, 1);
        assert_eq!(state.phase, Phase::Reduce);
    }

    #[test]
    fn late_report_after_reassignment_is_absorbed() {
        let mut state = State::new(&config(1, 1));
        let tuning = Tuning {
            map_task_timeout: Duration::from_millis(0),
            ..Tuning::default()
        };
        let _ = state.assign_map(&tuning); // worker A
        std::thread::sleep(Duration::from_millis(5));
        let _ = state.assign_map(&tuning); // reclaimed, worker B
        state.report_task_done(TaskKind::Map, 0).unwrap(); // worker B done
        assert_eq!(state.map_done, 1);
        state.report_task_done(TaskKind::Map, 0).unwrap(); // worker A, late
        assert_eq!(state.map_done, 1);
        assert_eq!(state.phase, Phase::Reduce);
    }

    #[test]
    fn phase_advances_map_to_reduce_to_done() {
        let mut state = State::new(&config(1, 1));
        assert_eq!(state.phase, Phase::Map);
        state.report_task_done(TaskKind::Map, 0).unwrap();
        assert_eq!(state.phase, Phase::Reduce);
        assert!(state.assign_done().is_err());
        state.report_task_done(TaskKind::Reduce, 0).unwrap();
        assert_eq!(state.phase, Phase::Done);
        assert!(state.assign_done().is_ok());
    }

    #[test]
    fn out_of_range_id_is_bad_argument() {
        let mut state = State::new(&config(1, 1));
        let err = state.report_task_done(TaskKind::Map, 5).unwrap_err();
        assert!(matches!(err, MrError::BadArgument(_)));
    }
}
