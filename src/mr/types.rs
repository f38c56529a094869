use serde::{Deserialize, Serialize};

/// The kind of task a worker is assigned or is reporting done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    Map,
    Reduce,
}

/// Lifecycle of a single task, as seen by the coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    Idle,
    InProgress,
    Completed,
}

/// What `GetTask` handed back. `Idle` and `Exit` carry no payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplyKind {
    Map,
    Reduce,
    Idle,
    Exit,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapTaskInfo {
    pub id: i64,
    pub input_file: String,
    pub n_reduce: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReduceTaskInfo {
    pub id: i64,
    pub n_maps: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetTaskReply {
    pub job_id: String,
    pub kind: ReplyKind,
    pub map_task: Option<MapTaskInfo>,
    pub reduce_task: Option<ReduceTaskInfo>,
}

impl GetTaskReply {
    pub fn idle(job_id: String) -> Self {
        Self {
            job_id,
            kind: ReplyKind::Idle,
            map_task: None,
            reduce_task: None,
        }
    }

    pub fn exit(job_id: String) -> Self {
        Self {
            job_id,
            kind: ReplyKind::Exit,
            map_task: None,
            reduce_task: None,
        }
    }

    pub fn map(job_id: String, task: MapTaskInfo) -> Self {
        Self {
            job_id,
            kind: ReplyKind::Map,
            map_task: Some(task),
            reduce_task: None,
        }
    }

    pub fn reduce(job_id: String, task: ReduceTaskInfo) -> Self {
        Self {
            job_id,
            kind: ReplyKind::Reduce,
            map_task: None,
            reduce_task: Some(task),
        }
    }
}

/// One emitted record: the unit of both map output and reduce input.
///
/// Field names are capitalized on the wire to match the persisted
/// intermediate encoding (`{"Key":"...","Value":"..."}`, one JSON object
/// per line).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyValue {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "Value")]
    pub value: String,
}

impl KeyValue {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}
