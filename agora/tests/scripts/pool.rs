use std::time::Duration;

use agora::{Subsystem, VmStatus};
use agora_core::AgoraError;
use serde_json::json;

use crate::helpers::wait_until;
use crate::{pool_in, write_script};

const LONG: Duration = Duration::from_secs(5);

#[tokio::test]
async fn one_shot_run_writes_output_and_frees_its_slot() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, runtime) = pool_in(dir.path(), 2, LONG);
    pool.start().await.unwrap();
    write_script(dir.path(), "hello.gct", "# greet\nprint hi\nprint-args");

    let id = pool.load("hello.gct").await.unwrap();
    assert_eq!(pool.in_use(), 1);
    let info = pool.query(id).unwrap();
    assert_eq!((info.name.as_str(), info.status, info.repeat), ("hello", VmStatus::Loaded, None));

    pool.run_with_context(id, Some(json!({"venue": "kraken"}))).await.unwrap();
    assert_eq!(runtime.runs(), 1);
    assert_eq!(pool.in_use(), 0);
    assert!(matches!(pool.query(id), Err(AgoraError::NotFound { .. })));

    let log = std::fs::read_to_string(dir.path().join("output/hello.log")).unwrap();
    assert_eq!(log, "hi\n{\"venue\":\"kraken\"}\n");
}

#[tokio::test]
async fn load_is_bounded_and_checks_its_input() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, _) = pool_in(dir.path(), 2, LONG);
    write_script(dir.path(), "tick.gct", "print tick");
    write_script(dir.path(), "broken.gct", "explode now");
    write_script(dir.path(), "notes.txt", "print tick");

    let err = pool.load("tick.gct").await.unwrap_err();
    assert_eq!(err.status_code(), "not-started");
    pool.start().await.unwrap();

    pool.load("tick.gct").await.unwrap();
    pool.load(dir.path().join("tick.gct")).await.unwrap();
    let err = pool.load("tick.gct").await.unwrap_err();
    assert!(matches!(err, AgoraError::CapacityExhausted(_)));
    assert_eq!(err.status_code(), "capacity-exhausted");
    assert_eq!(pool.list().len(), 2);

    // rejected loads never hold a slot
    assert_eq!(pool.stop_all().await, 2);
    assert!(matches!(pool.load("broken.gct").await, Err(AgoraError::InvalidArg(_))));
    assert!(matches!(pool.load("notes.txt").await, Err(AgoraError::InvalidArg(_))));
    assert!(matches!(pool.load("missing.gct").await, Err(AgoraError::NotFound { .. })));
    assert_eq!(pool.in_use(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_runs_of_one_vm_start_it_once() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, runtime) = pool_in(dir.path(), 2, LONG);
    pool.start().await.unwrap();
    write_script(dir.path(), "slow.gct", "sleep 100\nprint done");

    let id = pool.load("slow.gct").await.unwrap();
    let (a, b, c) = tokio::join!(
        pool.run_with_context(id, None),
        pool.run_with_context(id, None),
        pool.run_with_context(id, None),
    );
    let results = [a, b, c];
    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(
        results
            .iter()
            .filter_map(|r| r.as_ref().err())
            .all(|e| matches!(e, AgoraError::InvalidArg(_)))
    );
    assert_eq!(runtime.runs(), 1);
    assert_eq!(pool.in_use(), 0);
}

#[tokio::test]
async fn repeating_script_runs_until_stopped() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, runtime) = pool_in(dir.path(), 2, LONG);
    pool.start().await.unwrap();
    write_script(dir.path(), "tick.gct", "repeat 20\nprint tick");

    let id = pool.load("tick.gct").await.unwrap();
    assert_eq!(pool.query(id).unwrap().repeat, Some(Duration::from_millis(20)));
    pool.compile_and_run(id).await.unwrap();
    let err = pool.compile_and_run(id).await.unwrap_err();
    assert!(matches!(err, AgoraError::InvalidArg(_)));

    wait_until(|| runtime.runs() >= 3).await;
    assert_eq!(pool.in_use(), 1);
    assert!(pool.query(id).unwrap().runs >= 3);

    pool.stop(id).await.unwrap();
    assert_eq!(pool.in_use(), 0);
    let after_stop = runtime.runs();
    tokio::time::sleep(Duration::from_millis(80)).await;
    assert_eq!(runtime.runs(), after_stop);
    assert!(matches!(pool.stop(id).await, Err(AgoraError::NotFound { .. })));
}

#[tokio::test]
async fn timed_out_run_is_cancelled_and_released() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, _) = pool_in(dir.path(), 1, Duration::from_millis(100));
    pool.start().await.unwrap();
    write_script(dir.path(), "slow.gct", "sleep 60000\nprint never");

    let id = pool.load("slow.gct").await.unwrap();
    let err = pool.compile_and_run(id).await.unwrap_err();
    assert!(matches!(err, AgoraError::Timeout { .. }));
    assert_eq!(pool.in_use(), 0);
    assert!(!dir.path().join("output/slow.log").exists());

    // the freed slot is usable again
    pool.load("slow.gct").await.unwrap();
}

#[tokio::test]
async fn failing_run_reports_and_removes_the_vm() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, _) = pool_in(dir.path(), 1, LONG);
    pool.start().await.unwrap();
    write_script(dir.path(), "boom.gct", "repeat 10\nfail boom");

    let id = pool.load("boom.gct").await.unwrap();
    let err = pool.compile_and_run(id).await.unwrap_err();
    assert!(matches!(err, AgoraError::Permanent { .. }));
    assert!(pool.list().is_empty());
    assert_eq!(pool.in_use(), 0);
}

#[tokio::test]
async fn autoload_list_runs_on_start() {
    let dir = tempfile::tempdir().unwrap();
    let (pool, runtime) = pool_in(dir.path(), 2, LONG);
    write_script(dir.path(), "boot.gct", "print booted");
    write_script(dir.path(), "tick.gct", "repeat 1000\nprint tick");

    assert_eq!(pool.autoload_toggle("boot", true).await.unwrap(), vec!["boot.gct"]);
    assert_eq!(
        pool.autoload_toggle("tick.gct", true).await.unwrap(),
        vec!["boot.gct", "tick.gct"]
    );
    assert!(matches!(
        pool.autoload_toggle("ghost", true).await,
        Err(AgoraError::NotFound { .. })
    ));

    pool.start().await.unwrap();
    assert_eq!(runtime.runs(), 2);
    let log = std::fs::read_to_string(dir.path().join("output/boot.log")).unwrap();
    assert_eq!(log, "booted\n");
    // only the repeating one keeps a VM
    let vms = pool.list();
    assert_eq!(vms.len(), 1);
    assert_eq!(vms[0].name, "tick");

    assert_eq!(pool.autoload_toggle("tick", false).await.unwrap(), vec!["boot.gct"]);
    assert!(pool.autoload_toggle("tick", false).await.is_err());

    Subsystem::stop(&pool).await.unwrap();
    assert_eq!(pool.in_use(), 0);
}
