//! Peripheral worker queue: ordering and back-pressure.

use std::sync::mpsc;
use std::sync::{Arc, Mutex};

use portcore::Error;
use portcore::peripheral::ThreadedRunner;

#[test]
fn full_queue_reports_busy() {
    let runner: ThreadedRunner<2> = ThreadedRunner::new("test").unwrap();
    let (started_tx, started_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    let blocker = runner
        .schedule(move || {
            started_tx.send(()).unwrap();
            release_rx.recv().unwrap();
            Ok(0)
        })
        .unwrap();
    started_rx.recv().unwrap();

    let first = runner.schedule(|| Ok(1)).unwrap();
    let second = runner.schedule(|| Ok(2)).unwrap();
    assert!(matches!(runner.schedule(|| Ok(3)), Err(Error::Busy)));
    assert_eq!(runner.queued(), 2);

    release_tx.send(()).unwrap();
    let results = futures_lite::future::block_on(async {
        (blocker.await, first.await, second.await)
    });
    assert_eq!(results, (Ok(0), Ok(1), Ok(2)));

    // Room again once drained.
    assert_eq!(futures_lite::future::block_on(runner.run(|| Ok(4))), Ok(4));
}

#[test]
fn jobs_run_in_submission_order() {
    let runner: ThreadedRunner = ThreadedRunner::new("order").unwrap();
    let order = Arc::new(Mutex::new(Vec::new()));

    let pending: Vec<_> = (0..5)
        .map(|i| {
            let order = Arc::clone(&order);
            runner
                .schedule(move || {
                    order.lock().unwrap().push(i);
                    Ok(())
                })
                .unwrap()
        })
        .collect();
    futures_lite::future::block_on(async {
        for job in pending {
            job.await.unwrap();
        }
    });

    assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn stopped_runner_refuses_work() {
    let runner: ThreadedRunner = ThreadedRunner::new("stopped").unwrap();
    runner.stop();
    assert!(matches!(
        runner.schedule(|| Ok(())),
        Err(Error::RunnerStopped)
    ));
}
