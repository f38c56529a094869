//! End-to-end scenarios driving a real `CoordinatorServer` over TCP against
//! one or more `WorkerContext`s, using the local storage backend and the
//! built-in wordcount application.

use std::net::SocketAddr;
use std::time::Duration;

use tarpc::{client, context, tokio_serde::formats::Json};

use mapreduce_rs::mr::config::{JobConfig, Tuning};
use mapreduce_rs::mr::coordinator::{CoordinatorServer, ServerClient};
use mapreduce_rs::mr::function::load_app;
use mapreduce_rs::mr::storage::LocalStorage;
use mapreduce_rs::mr::types::TaskKind;
use mapreduce_rs::mr::worker::WorkerContext;

async fn start_coordinator(files: Vec<String>, n_reduce: usize, tuning: Tuning) -> (CoordinatorServer, SocketAddr) {
    let config = JobConfig {
        files,
        n_reduce,
        job_id: "it".to_string(),
        listen_addr: "127.0.0.1:0".parse().unwrap(),
        tuning,
    };
    let server = CoordinatorServer::bind(config).await.expect("bind coordinator");
    let addr = server.listen_addr();
    (server, addr)
}

async fn connect(addr: SocketAddr) -> ServerClient {
    let transport = tarpc::serde_transport::tcp::connect(addr, Json::default)
        .await
        .expect("connect to coordinator");
    ServerClient::new(client::Config::default(), transport).spawn()
}

fn wordcount_worker(client: ServerClient, root: &std::path::Path, tuning: Tuning) -> WorkerContext {
    let (map_fn, reduce_fn) = load_app("wordcount").unwrap();
    let storage = Box::new(LocalStorage::new(root));
    WorkerContext::new(client, storage, map_fn, reduce_fn, tuning)
}

#[tokio::test]
async fn single_input_word_count_end_to_end() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("in-0.txt");
    tokio::fs::write(&input, "a b a c b a").await.unwrap();

    let tuning = Tuning::default();
    let (server, addr) = start_coordinator(vec![input.to_string_lossy().to_string()], 1, tuning).await;

    let client = connect(addr).await;
    let worker = wordcount_worker(client, tmp.path(), tuning);
    worker.run().await.expect("worker run");

    assert!(server.done());
    server.stop();

    let job_dir = tmp.path().join(server.job_id());
    let output = tokio::fs::read_to_string(job_dir.join("output").join("mr-out-0"))
        .await
        .unwrap();
    let mut lines: Vec<&str> = output.lines().collect();
    lines.sort();
    assert_eq!(lines, vec!["a 3", "b 2", "c 1"]);
}

#[tokio::test]
async fn two_inputs_two_reduces_partition_correctly() {
    let tmp = tempfile::tempdir().unwrap();
    let in0 = tmp.path().join("in-0.txt");
    let in1 = tmp.path().join("in-1.txt");
    tokio::fs::write(&in0, "alpha beta alpha").await.unwrap();
    tokio::fs::write(&in1, "beta gamma beta").await.unwrap();

    let tuning = Tuning::default();
    let (server, addr) = start_coordinator(
        vec![in0.to_string_lossy().to_string(), in1.to_string_lossy().to_string()],
        2,
        tuning,
    )
    .await;

    let client = connect(addr).await;
    let worker = wordcount_worker(client, tmp.path(), tuning);
    worker.run().await.expect("worker run");

    assert!(server.done());

    let job_dir = tmp.path().join(server.job_id());
    let mut combined = String::new();
    for r in 0..2 {
        combined.push_str(
            &tokio::fs::read_to_string(job_dir.join("output").join(format!("mr-out-{r}")))
                .await
                .unwrap(),
        );
    }
    let mut lines: Vec<&str> = combined.lines().collect();
    lines.sort();
    assert_eq!(lines, vec!["alpha 2", "beta 3", "gamma 1"]);
}

#[tokio::test]
async fn stalled_map_task_is_reassigned_to_a_second_worker() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("in-0.txt");
    tokio::fs::write(&input, "x y z").await.unwrap();

    let tuning = Tuning {
        map_task_timeout: Duration::from_millis(20),
        worker_idle_wait: Duration::from_millis(5),
        ..Tuning::default()
    };
    let (server, addr) = start_coordinator(vec![input.to_string_lossy().to_string()], 1, tuning).await;

    // Worker A claims the map task directly via the RPC surface, then
    // "crashes" (drops its client) without ever reporting it done.
    {
        let client_a = connect(addr).await;
        let reply = client_a.get_task(context::current()).await.unwrap().unwrap();
        assert_eq!(reply.kind, mapreduce_rs::mr::types::ReplyKind::Map);
    }

    tokio::time::sleep(Duration::from_millis(40)).await;

    // Worker B polls past the reclaim window and should receive the same
    // map task id, then carry the whole job to completion.
    let client_b = connect(addr).await;
    let worker_b = wordcount_worker(client_b, tmp.path(), tuning);
    worker_b.run().await.expect("worker b run");

    assert!(server.done());
}

#[tokio::test]
async fn duplicate_and_late_report_task_done_are_absorbed() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("in-0.txt");
    tokio::fs::write(&input, "only one line").await.unwrap();

    let tuning = Tuning::default();
    let (server, addr) = start_coordinator(vec![input.to_string_lossy().to_string()], 1, tuning).await;
    let client = connect(addr).await;

    let reply = client.get_task(context::current()).await.unwrap().unwrap();
    let map_id = reply.map_task.unwrap().id;

    client
        .report_task_done(context::current(), TaskKind::Map, map_id)
        .await
        .unwrap()
        .unwrap();
    // Duplicate report for the same task must not error and must not
    // double-count toward phase advancement.
    client
        .report_task_done(context::current(), TaskKind::Map, map_id)
        .await
        .unwrap()
        .unwrap();

    let reduce_reply = client.get_task(context::current()).await.unwrap().unwrap();
    assert_eq!(reduce_reply.kind, mapreduce_rs::mr::types::ReplyKind::Reduce);
    let reduce_id = reduce_reply.reduce_task.unwrap().id;
    client
        .report_task_done(context::current(), TaskKind::Reduce, reduce_id)
        .await
        .unwrap()
        .unwrap();

    assert!(server.done());
    server.stop();
}

#[tokio::test]
async fn done_phase_serves_exit_and_stop_is_idempotent() {
    let tmp = tempfile::tempdir().unwrap();
    let input = tmp.path().join("in-0.txt");
    tokio::fs::write(&input, "solo").await.unwrap();

    let tuning = Tuning::default();
    let (server, addr) = start_coordinator(vec![input.to_string_lossy().to_string()], 1, tuning).await;
    let client = connect(addr).await;
    let worker = wordcount_worker(client, tmp.path(), tuning);
    worker.run().await.expect("worker run");

    assert!(server.done());

    let probe = connect(addr).await;
    let reply = probe.get_task(context::current()).await.unwrap().unwrap();
    assert_eq!(reply.kind, mapreduce_rs::mr::types::ReplyKind::Exit);

    server.stop();
    server.stop(); // idempotent, must not panic
}
