use std::time::Instant;

use tarpc::context;
use tracing::{debug, info, warn};

use crate::mr::coordinator::ServerClient;
use crate::mr::config::Tuning;
use crate::mr::error::MrError;
use crate::mr::function::{MapFn, ReduceFn};
use crate::mr::hash::bucket_for_key;
use crate::mr::storage::Storage;
use crate::mr::types::{GetTaskReply, MapTaskInfo, ReduceTaskInfo, ReplyKind, TaskKind};

/// One worker process: a coordinator RPC client, a storage backend, and
/// the user's map/reduce functions, wired together by a single-threaded
/// pull loop. Nothing here is shared across workers, so nothing here
/// needs a lock.
pub struct WorkerContext {
    client: ServerClient,
    storage: Box<dyn Storage>,
    map_fn: MapFn,
    reduce_fn: ReduceFn,
    tuning: Tuning,
}

impl WorkerContext {
    pub fn new(
        client: ServerClient,
        storage: Box<dyn Storage>,
        map_fn: MapFn,
        reduce_fn: ReduceFn,
        tuning: Tuning,
    ) -> Self {
        Self {
            client,
            storage,
            map_fn,
            reduce_fn,
            tuning,
        }
    }

    /// Runs until an `Exit` reply is received or a transport failure makes
    /// further progress impossible. Execution failures on a single task are
    /// not fatal: the coordinator reclaims the task by timeout.
    pub async fn run(mut self) -> Result<(), MrError> {
        loop {
            let reply = match self.poll_get_task().await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!("worker: could not reach coordinator: {e}, backing off");
                    tokio::time::sleep(self.tuning.worker_idle_wait).await;
                    continue;
                }
            };

            if reply.kind == ReplyKind::Exit {
                info!(job_id = %reply.job_id, "worker: received exit, terminating");
                return Ok(());
            }

            self.storage.set_job(&reply.job_id);

            if let Err(e) = self.handle_task(&reply).await {
                warn!("worker: task failed: {e}, backing off");
                tokio::time::sleep(self.tuning.worker_idle_wait).await;
            }
        }
    }

    /// Polls `GetTask` until a non-`Idle` reply arrives, sleeping
    /// `WorkerIdleWait` between polls so the worker never busy-loops.
    async fn poll_get_task(&self) -> Result<GetTaskReply, MrError> {
        loop {
            let reply = self
                .client
                .get_task(context::current())
                .await
                .map_err(|e| MrError::TransportFailure(e.to_string()))??;

            if reply.kind == ReplyKind::Idle {
                tokio::time::sleep(self.tuning.worker_idle_wait).await;
                continue;
            }
            return Ok(reply);
        }
    }

    async fn handle_task(&mut self, reply: &GetTaskReply) -> Result<(), MrError> {
        match reply.kind {
            ReplyKind::Map => {
                let info = reply
                    .map_task
                    .as_ref()
                    .ok_or_else(|| MrError::BadArgument("map reply missing payload".into()))?;
                let start = Instant::now();
                debug!(job_id = %reply.job_id, id = info.id, file = %info.input_file, "worker: starting map task");
                self.execute_map(info).await?;
                info!(
                    job_id = %reply.job_id,
                    id = info.id,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "worker: finished map task"
                );
                self.report_done(TaskKind::Map, info.id).await
            }
            ReplyKind::Reduce => {
                let info = reply
                    .reduce_task
                    .as_ref()
                    .ok_or_else(|| MrError::BadArgument("reduce reply missing payload".into()))?;
                let start = Instant::now();
                debug!(job_id = %reply.job_id, id = info.id, "worker: starting reduce task");
                self.execute_reduce(info).await?;
                info!(
                    job_id = %reply.job_id,
                    id = info.id,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "worker: finished reduce task"
                );
                self.report_done(TaskKind::Reduce, info.id).await
            }
            other => Err(MrError::BadArgument(format!(
                "unexpected reply kind for handle_task: {other:?}"
            ))),
        }
    }

    async fn execute_map(&self, info: &MapTaskInfo) -> Result<(), MrError> {
        let content = self.storage.read_input(&info.input_file).await?;
        let records = (self.map_fn)(&info.input_file, &content);

        let n_reduce = info.n_reduce as usize;
        let mut buckets: Vec<Vec<_>> = (0..n_reduce).map(|_| Vec::new()).collect();
        for kv in records {
            let bucket = bucket_for_key(&kv.key, n_reduce);
            buckets[bucket].push(kv);
        }

        self.storage
            .write_intermediate(info.id, info.n_reduce, buckets)
            .await
    }

    async fn execute_reduce(&self, info: &ReduceTaskInfo) -> Result<(), MrError> {
        let mut records = self
            .storage
            .read_intermediate_for_reduce(info.id, info.n_maps)
            .await?;
        records.sort_by(|a, b| a.key.cmp(&b.key));

        let mut outputs = Vec::new();
        let mut i = 0;
        while i < records.len() {
            let key = records[i].key.clone();
            let mut values = Vec::new();
            while i < records.len() && records[i].key == key {
                values.push(records[i].value.clone());
                i += 1;
            }
            let reduced = (self.reduce_fn)(&key, &values);
            outputs.push((key, reduced));
        }

        self.storage.write_output(info.id, outputs).await
    }

    async fn report_done(&self, kind: TaskKind, id: i64) -> Result<(), MrError> {
        self.client
            .report_task_done(context::current(), kind, id)
            .await
            .map_err(|e| MrError::TransportFailure(e.to_string()))??;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mr::types::KeyValue;

    #[test]
    fn map_output_partitions_by_hash() {
        let records = vec![
            KeyValue::new("x", "1"),
            KeyValue::new("y", "1"),
            KeyValue::new("x", "1"),
        ];
        let n_reduce = 4;
        let mut buckets: Vec<Vec<KeyValue>> = (0..n_reduce).map(|_| Vec::new()).collect();
        for kv in records {
            buckets[bucket_for_key(&kv.key, n_reduce)].push(kv);
        }
        let x_bucket = bucket_for_key("x", n_reduce);
        assert_eq!(buckets[x_bucket].len(), 2);
    }

    #[test]
    fn reduce_groups_consecutive_runs_after_sort() {
        let mut records = vec![
            KeyValue::new("b", "1"),
            KeyValue::new("a", "1"),
            KeyValue::new("a", "1"),
        ];
        records.sort_by(|a, b| a.key.cmp(&b.key));
        assert_eq!(
            records.iter().map(|kv| kv.key.as_str()).collect::<Vec<_>>(),
            vec!["a", "a", "b"]
        );
    }
}
