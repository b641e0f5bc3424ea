//! End-to-end tests for the worker pool
//!
//! Checks result delivery for every dispatch policy and batch size,
//! lifecycle hooks, backpressure on a bounded shared queue, progress totals
//! and fault propagation.

use anyhow::Result;
use fanfold_config::{DispatchPolicy, TransportConfig, WorkerPoolConfig};
use fanfold_execution::{
    ExecutionError, Paralleller, ProgressReport, Worker, WorkerContext, WorkerPool, WorkerRole,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

fn config(workers: usize, batch_size: usize, dispatch: DispatchPolicy) -> WorkerPoolConfig {
    WorkerPoolConfig {
        worker_count: workers,
        batch_size,
        dispatch,
        poll_interval: Duration::from_millis(10),
        ..Default::default()
    }
}

#[test]
fn test_collector_receives_every_result() {
    for dispatch in [DispatchPolicy::SharedQueue, DispatchPolicy::PerWorker] {
        for batch_size in [1, 10, 100] {
            let results = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&results);
            let mut pool =
                WorkerPool::from_fn(config(4, batch_size, dispatch), |x: u32| Ok(x + 1))
                    .unwrap()
                    .with_collector(move |r: u32| sink.lock().unwrap().push(r));

            pool.start().unwrap();
            pool.map(0..1_000u32).unwrap();
            let stats = pool.join_with_stats().unwrap();

            let mut results = results.lock().unwrap().clone();
            results.sort();
            assert_eq!(
                results,
                (1..=1_000u32).collect::<Vec<_>>(),
                "dispatch = {}, batch_size = {}",
                dispatch,
                batch_size
            );
            assert_eq!(stats.tasks_processed, 1_000);
            assert_eq!(stats.results_collected, 1_000);
        }
    }
}

struct Tracked {
    entered: Arc<AtomicUsize>,
    exited: Arc<AtomicUsize>,
    seen: usize,
}

impl Worker for Tracked {
    type Task = String;
    type Output = usize;

    fn enter(&mut self, _ctx: &WorkerContext) -> Result<()> {
        self.entered.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn process(&mut self, task: String) -> Result<usize> {
        self.seen += 1;
        Ok(task.len())
    }

    fn exit(&mut self, _ctx: &WorkerContext) {
        self.exited.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_lifecycle_hooks_run_once_per_worker() {
    let entered = Arc::new(AtomicUsize::new(0));
    let exited = Arc::new(AtomicUsize::new(0));
    let (e, x) = (Arc::clone(&entered), Arc::clone(&exited));

    let mut pool = WorkerPool::new(config(3, 2, DispatchPolicy::PerWorker), move |_ctx| Tracked {
        entered: Arc::clone(&e),
        exited: Arc::clone(&x),
        seen: 0,
    })
    .unwrap();

    pool.start().unwrap();
    pool.map((0..25).map(|i| "x".repeat(i))).unwrap();
    let stats = pool.join_with_stats().unwrap();

    assert_eq!(stats.tasks_processed, 25);
    assert_eq!(entered.load(Ordering::SeqCst), 3);
    assert_eq!(exited.load(Ordering::SeqCst), 3);
}

#[test]
fn test_exit_runs_after_a_failure() {
    struct Failing {
        exited: Arc<AtomicUsize>,
    }

    impl Worker for Failing {
        type Task = u32;
        type Output = u32;

        fn process(&mut self, task: u32) -> Result<u32> {
            anyhow::bail!("task {} rejected", task)
        }

        fn exit(&mut self, _ctx: &WorkerContext) {
            self.exited.fetch_add(1, Ordering::SeqCst);
        }
    }

    let exited = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&exited);
    let mut pool = WorkerPool::new(config(2, 1, DispatchPolicy::SharedQueue), move |_ctx| Failing {
        exited: Arc::clone(&counter),
    })
    .unwrap();

    pool.start().unwrap();
    let _ = pool.add_task(7);
    let err = pool.join().unwrap_err();

    assert!(matches!(
        err,
        ExecutionError::WorkerFailed { role: WorkerRole::Worker, .. }
    ));
    assert!(err.to_string().contains("task 7 rejected"));
    assert_eq!(exited.load(Ordering::SeqCst), 2);
}

#[test]
fn test_failed_enter_is_reported() {
    struct NoEnter;

    impl Worker for NoEnter {
        type Task = u32;
        type Output = u32;

        fn enter(&mut self, ctx: &WorkerContext) -> Result<()> {
            anyhow::bail!("slot {} has no resource", ctx.idx)
        }

        fn process(&mut self, task: u32) -> Result<u32> {
            Ok(task)
        }
    }

    let mut pool =
        WorkerPool::new(config(1, 1, DispatchPolicy::PerWorker), |_ctx| NoEnter).unwrap();
    pool.start().unwrap();
    let err = pool.join().unwrap_err();
    assert!(err.to_string().contains("no resource"), "unexpected error: {}", err);
}

#[test]
fn test_add_task_blocks_on_full_shared_queue() {
    let gate = Arc::new(Mutex::new(()));
    let held = gate.lock().unwrap();
    let worker_gate = Arc::clone(&gate);

    let pool_config = WorkerPoolConfig {
        queue_capacity: 2,
        ..config(1, 1, DispatchPolicy::SharedQueue)
    };
    let mut pool = WorkerPool::from_fn(pool_config, move |x: u32| {
        let _pass = worker_gate.lock().map_err(|_| anyhow::anyhow!("gate poisoned"))?;
        Ok(x)
    })
    .unwrap();
    pool.start().unwrap();

    let (done_tx, done_rx) = std::sync::mpsc::channel();
    let submitter = thread::spawn(move || {
        // One task is held by the blocked worker and two fill the queue
        for i in 0..4u32 {
            pool.add_task(i).unwrap();
            done_tx.send(i).unwrap();
        }
        pool
    });

    thread::sleep(Duration::from_millis(200));
    let accepted: Vec<u32> = done_rx.try_iter().collect();
    assert_eq!(accepted, vec![0, 1, 2], "fourth add_task should block");

    drop(held);
    let pool = submitter.join().unwrap();
    assert_eq!(done_rx.recv_timeout(Duration::from_secs(1)).unwrap(), 3);
    assert_eq!(pool.join_with_stats().unwrap().tasks_processed, 4);
}

#[test]
fn test_final_progress_report_is_accurate() {
    let reports: Arc<Mutex<Vec<ProgressReport>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&reports);

    let mut pool = WorkerPool::from_fn(config(3, 5, DispatchPolicy::PerWorker), |x: u64| Ok(x))
        .unwrap()
        .with_progress(move |report| sink.lock().unwrap().push(*report))
        .with_progress_total(200);

    pool.start().unwrap();
    pool.map(0..200u64).unwrap();
    pool.join().unwrap();

    let reports = reports.lock().unwrap();
    let last = reports.last().copied().unwrap();
    assert_eq!(last.processed, 200);
    assert_eq!(last.loaded, 200);
    assert_eq!(last.added, 200);
    assert_eq!(last.total, Some(200));
    // Counters never run backwards
    assert!(reports.windows(2).all(|w| w[0].processed <= w[1].processed));
}

#[test]
fn test_progress_callback_panic_fails_join() {
    let mut pool = WorkerPool::from_fn(config(2, 1, DispatchPolicy::PerWorker), |x: u32| Ok(x))
        .unwrap()
        .with_progress(|report| {
            if report.processed > 0 {
                panic!("progress display closed");
            }
        });

    pool.start().unwrap();
    // Submission may observe the cancellation
    let _ = pool.map(0..100u32);
    let err = pool.join().unwrap_err();

    assert!(
        matches!(err, ExecutionError::ThreadPanicked(_)),
        "unexpected error: {}",
        err
    );
    assert!(err.to_string().contains("progress display closed"));
}

#[test]
fn test_results_larger_than_a_chunk() {
    let collected = Arc::new(AtomicUsize::new(0));
    let sink = Arc::clone(&collected);
    let mut pool = WorkerPool::from_fn(config(2, 3, DispatchPolicy::PerWorker), |n: usize| {
        Ok("y".repeat(n))
    })
    .unwrap()
    .with_transport(TransportConfig { chunk_size: 16 })
    .with_collector(move |s: String| {
        sink.fetch_add(s.len(), Ordering::SeqCst);
    });

    pool.start().unwrap();
    pool.map(0..50usize).unwrap();
    pool.join().unwrap();
    assert_eq!(collected.load(Ordering::SeqCst), (0..50).sum::<usize>());
}

#[test]
fn test_cancel_interrupts_blocked_submitter() {
    let pool_config = WorkerPoolConfig {
        queue_capacity: 1,
        ..config(1, 1, DispatchPolicy::SharedQueue)
    };
    let mut pool = WorkerPool::from_fn(pool_config, |x: u32| {
        thread::sleep(Duration::from_millis(200));
        Ok(x)
    })
    .unwrap();
    let cancel = pool.cancel_handle();
    pool.start().unwrap();

    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        cancel.cancel();
    });
    let started = Instant::now();
    let result = pool.map(0..100u32);
    canceller.join().unwrap();

    assert!(matches!(result, Err(ExecutionError::Cancelled)));
    assert!(started.elapsed() < Duration::from_secs(5));
    assert!(pool.join().unwrap_err().is_cancelled());
}
