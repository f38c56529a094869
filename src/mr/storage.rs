use std::io::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::mr::error::MrError;
use crate::mr::types::KeyValue;

/// Pluggable capability for reading inputs and publishing intermediate and
/// output artifacts under a job-scoped namespace.
///
/// Every method is safe to call concurrently from multiple workers, but in
/// practice is never called concurrently for the same `mapId` by design of
/// the scheduler (one in-progress assignment per task at a time, barring
/// the at-least-once re-execution the timeout model embraces).
#[async_trait]
pub trait Storage: Send + Sync {
    /// Binds the backend instance to a job namespace; all subsequent keys
    /// are scoped under it.
    fn set_job(&mut self, job_id: &str);

    /// Resolves `name` to an input blob.
    async fn read_input(&self, name: &str) -> Result<String, MrError>;

    /// Publishes exactly `buckets.len()` artifacts named deterministically
    /// from `(jobId, mapId, r)`. Must be atomic per artifact.
    async fn write_intermediate(
        &self,
        map_id: i64,
        n_reduce: i64,
        buckets: Vec<Vec<KeyValue>>,
    ) -> Result<(), MrError>;

    /// Fetches all `(m, reduceId)` artifacts for `m in 0..nMaps` and
    /// concatenates their decoded records in ascending `m` order. A
    /// not-found artifact is treated as empty, not an error.
    async fn read_intermediate_for_reduce(
        &self,
        reduce_id: i64,
        n_maps: i64,
    ) -> Result<Vec<KeyValue>, MrError>;

    /// Publishes the final partition `mr-out-<reduceId>` atomically.
    async fn write_output(&self, reduce_id: i64, kvs: Vec<(String, String)>) -> Result<(), MrError>;
}

fn encode_records(records: &[KeyValue]) -> Result<String, MrError> {
    let mut buf = String::new();
    for kv in records {
        let line = serde_json::to_string(kv)
            .map_err(|e| MrError::StorageIOFailure(format!("encode record: {e}")))?;
        buf.push_str(&line);
        buf.push('\n');
    }
    Ok(buf)
}

fn decode_records(contents: &str) -> Result<Vec<KeyValue>, MrError> {
    contents
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| {
            serde_json::from_str(line)
                .map_err(|e| MrError::StorageIOFailure(format!("decode record: {e}")))
        })
        .collect()
}

/// Local filesystem storage backend.
///
/// Intermediate and output artifacts are published via a write-temp,
/// rename-over discipline, so a reader never observes a partially written
/// artifact and a re-execution simply overwrites the prior one.
pub struct LocalStorage {
    root: PathBuf,
    job_id: String,
}

impl LocalStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            job_id: String::new(),
        }
    }

    fn job_root(&self) -> PathBuf {
        self.root.join(&self.job_id)
    }

    fn intermediate_dir(&self) -> PathBuf {
        self.job_root().join("intermediate")
    }

    fn output_dir(&self) -> PathBuf {
        self.job_root().join("output")
    }

    async fn publish_atomic(dir: &Path, final_path: &Path, contents: &str) -> Result<(), MrError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| MrError::StorageIOFailure(format!("mkdir {}: {e}", dir.display())))?;

        let mut tmp = tempfile::NamedTempFile::new_in(dir)
            .map_err(|e| MrError::StorageIOFailure(format!("create temp file: {e}")))?;
        tmp.write_all(contents.as_bytes())
            .map_err(|e| MrError::StorageIOFailure(format!("write temp file: {e}")))?;
        tmp.persist(final_path)
            .map_err(|e| MrError::StorageIOFailure(format!("rename into {}: {}", final_path.display(), e)))?;
        Ok(())
    }
}

#[async_trait]
impl Storage for LocalStorage {
    fn set_job(&mut self, job_id: &str) {
        self.job_id = job_id.to_string();
    }

    async fn read_input(&self, name: &str) -> Result<String, MrError> {
        tokio::fs::read_to_string(name)
            .await
            .map_err(|e| MrError::StorageIOFailure(format!("cannot read {name}: {e}")))
    }

    async fn write_intermediate(
        &self,
        map_id: i64,
        n_reduce: i64,
        buckets: Vec<Vec<KeyValue>>,
    ) -> Result<(), MrError> {
        let dir = self.intermediate_dir();
        for r in 0..n_reduce {
            let final_path = dir.join(format!("mr-{map_id}-{r}"));
            let contents = encode_records(&buckets[r as usize])?;
            Self::publish_atomic(&dir, &final_path, &contents).await?;
        }
        Ok(())
    }

    async fn read_intermediate_for_reduce(
        &self,
        reduce_id: i64,
        n_maps: i64,
    ) -> Result<Vec<KeyValue>, MrError> {
        let dir = self.intermediate_dir();
        let mut records = Vec::new();
        for m in 0..n_maps {
            let path = dir.join(format!("mr-{m}-{reduce_id}"));
            match tokio::fs::read_to_string(&path).await {
                Ok(contents) => records.extend(decode_records(&contents)?),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(MrError::StorageIOFailure(format!(
                        "cannot read {}: {e}",
                        path.display()
                    )))
                }
            }
        }
        Ok(records)
    }

    async fn write_output(&self, reduce_id: i64, kvs: Vec<(String, String)>) -> Result<(), MrError> {
        let dir = self.output_dir();
        let final_path = dir.join(format!("mr-out-{reduce_id}"));
        let mut contents = String::new();
        for (key, value) in &kvs {
            contents.push_str(key);
            contents.push(' ');
            contents.push_str(value);
            contents.push('\n');
        }
        Self::publish_atomic(&dir, &final_path, &contents).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn intermediate_round_trips_per_bucket() {
        let tmp = tempfile::tempdir().unwrap();
        let mut storage = LocalStorage::new(tmp.path());
        storage.set_job("job-1");

        let buckets = vec![
            vec![KeyValue::new("a", "1"), KeyValue::new("a", "1")],
            vec![KeyValue::new("b", "1")],
        ];
        storage.write_intermediate(0, 2, buckets.clone()).await.unwrap();

        let for_reduce_0 = storage.read_intermediate_for_reduce(0, 1).await.unwrap();
        assert_eq!(for_reduce_0, buckets[0]);

        let for_reduce_1 = storage.read_intermediate_for_reduce(1, 1).await.unwrap();
        assert_eq!(for_reduce_1, buckets[1]);
    }

    #[tokio::test]
    async fn missing_partition_is_empty_not_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut storage = LocalStorage::new(tmp.path());
        storage.set_job("job-2");

        let records = storage.read_intermediate_for_reduce(0, 3).await.unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn output_lines_are_key_space_value() {
        let tmp = tempfile::tempdir().unwrap();
        let mut storage = LocalStorage::new(tmp.path());
        storage.set_job("job-3");

        storage
            .write_output(0, vec![("a".into(), "2".into()), ("b".into(), "1".into())])
            .await
            .unwrap();

        let path = tmp.path().join("job-3").join("output").join("mr-out-0");
        let contents = tokio::fs::read_to_string(path).await.unwrap();
        assert_eq!(contents, "a 2\nb 1\n");
    }

    #[tokio::test]
    async fn rewriting_an_artifact_overwrites_it() {
        let tmp = tempfile::tempdir().unwrap();
        let mut storage = LocalStorage::new(tmp.path());
        storage.set_job("job-4");

        storage
            .write_intermediate(0, 1, vec![vec![KeyValue::new("x", "1")]])
            .await
            .unwrap();
        storage
            .write_intermediate(0, 1, vec![vec![KeyValue::new("y", "1")]])
            .await
            .unwrap();

        let records = storage.read_intermediate_for_reduce(0, 1).await.unwrap();
        assert_eq!(records, vec![KeyValue::new("y", "1")]);
    }
}
