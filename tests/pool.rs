use anyhow::bail;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use warehouse_loader::WorkerPool;
use warehouse_loader::pool::PoolError;

#[test]
fn results_are_indexed_not_completion_ordered() -> anyhow::Result<()> {
    let n = 16u64;
    let out = WorkerPool::new(4).run(16, |i| {
        // later tasks finish first
        thread::sleep(Duration::from_millis(2 * (n - i as u64)));
        Ok(format!("chunk-{i}"))
    })?;
    let expected: Vec<String> = (0..16).map(|i| format!("chunk-{i}")).collect();
    assert_eq!(out, expected);
    Ok(())
}

#[test]
fn first_failure_stops_scheduling() {
    let calls = AtomicUsize::new(0);
    let result = WorkerPool::new(4).run(200, |i| {
        calls.fetch_add(1, Ordering::SeqCst);
        if i == 0 {
            bail!("corrupted chunk");
        }
        thread::sleep(Duration::from_millis(5));
        Ok(i)
    });

    match result {
        Err(PoolError::Task { index, source }) => {
            assert_eq!(index, 0);
            assert_eq!(source.to_string(), "corrupted chunk");
        }
        other => panic!("expected task failure, got {other:?}"),
    }
    assert!(calls.load(Ordering::SeqCst) < 200);
}

#[test]
fn worker_count_is_clamped() {
    assert_eq!(WorkerPool::new(0).workers(), 1);
    assert_eq!(WorkerPool::new(4).workers(), 4);
}
