use std::sync::Arc;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use tokio::sync::Semaphore;

use crate::mr::error::MrError;
use crate::mr::storage::Storage;
use crate::mr::types::KeyValue;

/// S3-backed storage. Reads inputs from a configured input prefix and
/// publishes intermediates/outputs under `jobs/<jobId>/...`.
///
/// `PutObject` is a single atomic operation in S3, so no temp-then-rename
/// dance is needed the way local storage requires. Per-bucket fan-out on
/// `write_intermediate`/`read_intermediate_for_reduce` is bounded by a
/// semaphore sized to `StorageMaxConcurrency`.
pub struct S3Storage {
    client: Client,
    bucket: String,
    input_prefix: String,
    job_id: String,
    semaphore: Arc<Semaphore>,
}

impl S3Storage {
    pub async fn new(bucket: String, input_prefix: String, max_concurrency: usize) -> Result<Self, MrError> {
        let config = aws_config::load_from_env().await;
        let client = Client::new(&config);
        let input_prefix = normalize_prefix(input_prefix);
        Ok(Self {
            client,
            bucket,
            input_prefix,
            job_id: String::new(),
            semaphore: Arc::new(Semaphore::new(max_concurrency.max(1))),
        })
    }

    fn intermediate_key(&self, map_id: i64, reduce_id: i64) -> String {
        format!("jobs/{}/intermediate/mr-{}-{}.txt", self.job_id, map_id, reduce_id)
    }

    fn output_key(&self, reduce_id: i64) -> String {
        format!("jobs/{}/output/mr-out-{}.txt", self.job_id, reduce_id)
    }
}

fn normalize_prefix(mut prefix: String) -> String {
    if !prefix.is_empty() && !prefix.ends_with('/') {
        prefix.push('/');
    }
    prefix
}

fn encode_records(records: &[KeyValue]) -> Result<Vec<u8>, MrError> {
    let mut buf = Vec::new();
    for kv in records {
        serde_json::to_writer(&mut buf, kv)
            .map_err(|e| MrError::StorageIOFailure(format!("encode record: {e}")))?;
        buf.push(b'\n');
    }
    Ok(buf)
}

fn decode_records(bytes: &[u8]) -> Result<Vec<KeyValue>, MrError> {
    std::str::from_utf8(bytes)
        .map_err(|e| MrError::StorageIOFailure(format!("non-utf8 intermediate: {e}")))?
        .lines()
        .filter(|line| !line.is_empty())
        .map(|line| {
            serde_json::from_str(line)
                .map_err(|e| MrError::StorageIOFailure(format!("decode record: {e}")))
        })
        .collect()
}

#[async_trait]
impl Storage for S3Storage {
    fn set_job(&mut self, job_id: &str) {
        self.job_id = job_id.to_string();
    }

    async fn read_input(&self, name: &str) -> Result<String, MrError> {
        let key = format!("{}{}", self.input_prefix, name);
        let out = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| MrError::StorageIOFailure(format!("get s3://{}/{key}: {e}", self.bucket)))?;
        let bytes = out
            .body
            .collect()
            .await
            .map_err(|e| MrError::StorageIOFailure(format!("read body of {key}: {e}")))?
            .into_bytes();
        String::from_utf8(bytes.to_vec())
            .map_err(|e| MrError::StorageIOFailure(format!("non-utf8 input {key}: {e}")))
    }

    async fn write_intermediate(
        &self,
        map_id: i64,
        n_reduce: i64,
        buckets: Vec<Vec<KeyValue>>,
    ) -> Result<(), MrError> {
        let puts = (0..n_reduce as usize).map(|r| {
            let client = self.client.clone();
            let bucket = self.bucket.clone();
            let key = self.intermediate_key(map_id, r as i64);
            let semaphore = Arc::clone(&self.semaphore);
            let body = encode_records(&buckets[r]);
            async move {
                let body = body?;
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|e| MrError::StorageIOFailure(format!("semaphore closed: {e}")))?;
                client
                    .put_object()
                    .bucket(&bucket)
                    .key(&key)
                    .body(ByteStream::from(body))
                    .send()
                    .await
                    .map_err(|e| MrError::StorageIOFailure(format!("put s3://{bucket}/{key}: {e}")))?;
                Ok::<(), MrError>(())
            }
        });
        futures::future::try_join_all(puts).await?;
        Ok(())
    }

    async fn read_intermediate_for_reduce(
        &self,
        reduce_id: i64,
        n_maps: i64,
    ) -> Result<Vec<KeyValue>, MrError> {
        let gets = (0..n_maps).map(|m| {
            let client = self.client.clone();
            let bucket = self.bucket.clone();
            let key = self.intermediate_key(m, reduce_id);
            let semaphore = Arc::clone(&self.semaphore);
            async move {
                let _permit = semaphore
                    .acquire()
                    .await
                    .map_err(|e| MrError::StorageIOFailure(format!("semaphore closed: {e}")))?;
                match client.get_object().bucket(&bucket).key(&key).send().await {
                    Ok(out) => {
                        let bytes = out
                            .body
                            .collect()
                            .await
                            .map_err(|e| MrError::StorageIOFailure(format!("read body of {key}: {e}")))?
                            .into_bytes();
                        decode_records(&bytes)
                    }
                    Err(e) if is_not_found(&e) => Ok(Vec::new()),
                    Err(e) => Err(MrError::StorageIOFailure(format!(
                        "get s3://{bucket}/{key}: {e}"
                    ))),
                }
            }
        });
        let per_map = futures::future::try_join_all(gets).await?;
        Ok(per_map.into_iter().flatten().collect())
    }

    async fn write_output(&self, reduce_id: i64, kvs: Vec<(String, String)>) -> Result<(), MrError> {
        let mut buf = Vec::new();
        for (key, value) in &kvs {
            buf.extend_from_slice(key.as_bytes());
            buf.push(b' ');
            buf.extend_from_slice(value.as_bytes());
            buf.push(b'\n');
        }
        let key = self.output_key(reduce_id);
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(buf))
            .send()
            .await
            .map_err(|e| MrError::StorageIOFailure(format!("put s3://{}/{key}: {e}", self.bucket)))?;
        Ok(())
    }
}

fn is_not_found<E>(err: &aws_sdk_s3::error::SdkError<E>) -> bool
where
    E: std::fmt::Debug,
{
    // NoSuchKey is the only benign "missing partition" case; anything else
    // (auth failure, network error, bucket policy) is a real StorageIOFailure.
    matches!(
        err,
        aws_sdk_s3::error::SdkError::ServiceError(service_err)
            if format!("{:?}", service_err.err()).contains("NoSuchKey")
    )
}
