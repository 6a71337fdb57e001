#![cfg(unix)]
#![allow(clippy::unwrap_used, clippy::expect_used)] // Integration tests use unwrap for brevity

//! End-to-end tests driving real `sh` subprocesses through the pool runner.

use std::collections::HashMap;
use std::time::Duration;

use parproc_runner::pool::BoxError;
use parproc_runner::{
    CommandHandle, CommandSpec, Manifest, PoolRunner, ProcessHandle, ProcessStatus,
};

const TIMEOUT: Duration = Duration::from_secs(30);

/// Highest number of overlapping start/end intervals recorded in `log`.
fn max_overlap(log: &str) -> usize {
    let mut active = 0_usize;
    let mut max = 0_usize;
    for line in log.lines() {
        match line.split_whitespace().next() {
            Some("start") => {
                active += 1;
                max = max.max(active);
            }
            Some("end") => active -= 1,
            _ => {}
        }
    }
    max
}

#[tokio::test]
async fn real_processes_respect_pool_bound() {
    let dir = tempfile::TempDir::new().unwrap();
    let log = dir.path().join("events.log");

    let items: Vec<_> = (0..6)
        .map(|i| {
            let script = format!(
                "echo \"start {i}\" >> '{log}'; sleep 0.2; echo \"end {i}\" >> '{log}'; echo done-{i}",
                log = log.display()
            );
            (format!("job-{i}"), CommandHandle::new(CommandSpec::shell(script)))
        })
        .collect();
    let mut runner = PoolRunner::with_pool_size(items, 2_usize);

    let mut outputs = HashMap::new();
    tokio::time::timeout(
        TIMEOUT,
        runner.run(|handle: &mut CommandHandle, key: &str| {
            assert_eq!(handle.status(), ProcessStatus::Terminated);
            assert!(handle.success());
            outputs.insert(key.to_string(), handle.stdout());
            Ok::<_, BoxError>(())
        }),
    )
    .await
    .expect("run should finish")
    .unwrap();

    assert!(runner.is_empty());
    assert_eq!(outputs.len(), 6);
    for i in 0..6 {
        assert_eq!(outputs[&format!("job-{i}")], format!("done-{i}\n"));
    }

    let events = std::fs::read_to_string(&log).unwrap();
    let overlap = max_overlap(&events);
    assert!(overlap <= 2, "pool bound exceeded: {overlap}\n{events}");
    assert!(overlap >= 1);
}

#[tokio::test]
async fn unbounded_pool_starts_everything_together() {
    let items: Vec<_> = (0..4)
        .map(|i| (format!("n{i}"), CommandHandle::new(CommandSpec::shell("sleep 0.3"))))
        .collect();
    let mut runner = PoolRunner::with_pool_size(items, 0_i64);

    let started = std::time::Instant::now();
    let mut finished = 0;
    tokio::time::timeout(
        TIMEOUT,
        runner.run(|_h: &mut CommandHandle, _k: &str| {
            finished += 1;
            Ok::<_, BoxError>(())
        }),
    )
    .await
    .expect("run should finish")
    .unwrap();

    assert_eq!(finished, 4);
    // Four sequential sleeps would take 1.2s.
    assert!(started.elapsed() < Duration::from_millis(1100));
}

#[tokio::test]
async fn manifest_jobs_run_with_their_cwd_and_env() {
    let dir = tempfile::TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join("sub")).unwrap();
    std::fs::write(dir.path().join("sub").join("marker.txt"), "marker\n").unwrap();

    let manifest = Manifest::parse(
        r#"
pool_size = 1

[[job]]
name = "cat"
command = ["sh", "-c", "cat marker.txt"]
cwd = "sub"

[[job]]
name = "env"
command = ["sh", "-c", "echo $GREETING; exit 4"]
env = { GREETING = "hello" }
"#,
    )
    .unwrap();
    let pool_size = manifest.pool_size.unwrap();
    let mut runner = PoolRunner::with_pool_size(manifest.into_handles(Some(dir.path())), pool_size)
        .with_poll_interval(Duration::from_millis(5));

    let mut results = Vec::new();
    tokio::time::timeout(
        TIMEOUT,
        runner.run(|handle: &mut CommandHandle, key: &str| {
            results.push((key.to_string(), handle.stdout(), handle.exit_code()));
            Ok::<_, BoxError>(())
        }),
    )
    .await
    .expect("run should finish")
    .unwrap();

    assert_eq!(
        results,
        vec![
            ("cat".to_string(), "marker\n".to_string(), Some(0)),
            ("env".to_string(), "hello\n".to_string(), Some(4)),
        ]
    );
}

#[tokio::test]
async fn missing_program_aborts_run_with_start_error() {
    let mut runner = PoolRunner::new([(
        "ghost",
        CommandHandle::new(CommandSpec::new("/nonexistent/parproc-ghost")),
    )]);

    let err = runner
        .run(|_h: &mut CommandHandle, _k: &str| Ok::<_, BoxError>(()))
        .await
        .unwrap_err();

    assert!(
        err.to_string().starts_with("Failed to start process ghost"),
        "{err}"
    );
    assert!(runner.contains("ghost"));
}

#[tokio::test]
async fn backgrounded_grandchild_releases_pool_slot() {
    let mut runner = PoolRunner::with_pool_size(
        [
            (
                "daemonize",
                CommandHandle::new(CommandSpec::shell("sleep 5 & echo launched")),
            ),
            ("after", CommandHandle::new(CommandSpec::shell("echo next"))),
        ],
        1_usize,
    );

    let started = std::time::Instant::now();
    let mut outputs = Vec::new();
    tokio::time::timeout(
        TIMEOUT,
        runner.run(|handle: &mut CommandHandle, key: &str| {
            outputs.push((key.to_string(), handle.stdout()));
            Ok::<_, BoxError>(())
        }),
    )
    .await
    .expect("run should finish")
    .unwrap();

    assert!(
        started.elapsed() < Duration::from_secs(3),
        "run waited for the grandchild: {:?}",
        started.elapsed()
    );
    assert_eq!(
        outputs,
        vec![
            ("daemonize".to_string(), "launched\n".to_string()),
            ("after".to_string(), "next\n".to_string()),
        ]
    );
}

#[tokio::test]
async fn rerun_after_callback_error_reports_without_restarting() {
    let mut runner = PoolRunner::with_pool_size(
        [
            ("first", CommandHandle::new(CommandSpec::shell("echo one"))),
            ("second", CommandHandle::new(CommandSpec::shell("echo two"))),
        ],
        1_usize,
    );

    let err = tokio::time::timeout(
        TIMEOUT,
        runner.run(|_h: &mut CommandHandle, key: &str| Err::<(), _>(format!("reject {key}"))),
    )
    .await
    .expect("run should finish")
    .unwrap_err();
    assert!(err.to_string().contains("reject first"), "{err}");

    let mut outputs = Vec::new();
    tokio::time::timeout(
        TIMEOUT,
        runner.run(|handle: &mut CommandHandle, key: &str| {
            outputs.push((key.to_string(), handle.stdout()));
            Ok::<_, BoxError>(())
        }),
    )
    .await
    .expect("run should finish")
    .unwrap();

    assert_eq!(
        outputs,
        vec![
            ("first".to_string(), "one\n".to_string()),
            ("second".to_string(), "two\n".to_string()),
        ]
    );
    assert!(runner.is_empty());
}
