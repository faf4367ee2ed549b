use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, RecvTimeoutError};

use taskmon::predicate::{fallible, Always};
use taskmon::{
    BlockingHandler, MonitorConfig, MonitorEvent, MonitorRequest, MonitorStatus,
    MonitoringService, OutcomeTally, PredicateError, ReleaseHook, Tracked,
};

/// Upper bound for any single scenario; a hang fails the test instead of the suite.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

const TEST_POLLING: Duration = Duration::from_millis(100);

type CountingHandler = BlockingHandler<OutcomeTally>;

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn service() -> Arc<MonitoringService<String>> {
    init_tracing();
    Arc::new(MonitoringService::new(MonitorConfig::with_polling_delay(TEST_POLLING)).unwrap())
}

fn tally_handler(subjects: &[Tracked<String>]) -> Arc<CountingHandler> {
    Arc::new(CountingHandler::with_hook(subjects, OutcomeTally::default()).unwrap())
}

fn subject(name: &str) -> Tracked<String> {
    Tracked::new(name.to_string())
}

/// Runs `f` on another thread and fails if it does not finish in time.
fn run_with_timeout<F>(f: F)
where
    F: FnOnce() + Send + 'static,
{
    let (tx, rx) = bounded::<()>(1);
    thread::spawn(move || {
        f();
        let _ = tx.send(());
    });
    match rx.recv_timeout(TEST_TIMEOUT) {
        Ok(()) => {}
        Err(RecvTimeoutError::Timeout) => panic!("test did not finish within {TEST_TIMEOUT:?}"),
        Err(RecvTimeoutError::Disconnected) => panic!("test thread panicked"),
    }
}

/// Polls `cond` until it holds or the test timeout expires.
fn eventually(cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + TEST_TIMEOUT;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    cond()
}

/// Reports `Continue` for the first `n` calls, then `Done`. The countdown is
/// shared by every subject the predicate is attached to.
fn finish_after(n: usize) -> impl Fn(&String) -> MonitorStatus + Send + Sync + 'static {
    let remaining = AtomicUsize::new(n);
    move |_: &String| {
        let before = remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |r| r.checked_sub(1))
            .unwrap_or(0);
        if before == 0 {
            MonitorStatus::Done
        } else {
            MonitorStatus::Continue
        }
    }
}

#[test]
fn await_completion_without_subjects_returns_immediately() {
    let service = service();
    let started = Instant::now();
    service.await_completion(finish_after(1), &[]).unwrap();
    service
        .await_request(MonitorRequest::builder().predicate(finish_after(1)).build().unwrap())
        .unwrap();
    assert!(started.elapsed() < TEST_POLLING);
    assert_eq!(service.pending_count(), 0);
}

#[test]
fn await_completion_without_predicate_is_invalid_argument() {
    let service = service();
    let err = MonitorRequest::<String>::builder()
        .subject(subject("vm"))
        .build()
        .and_then(|req| service.await_request(req))
        .unwrap_err();
    assert!(err.is_invalid_argument());
    assert_eq!(service.pending_count(), 0);
}

#[test]
fn monitor_without_predicate_is_invalid_argument() {
    let service = service();
    let err = MonitorRequest::<String>::builder()
        .shared_predicate(None)
        .build()
        .and_then(|req| service.submit(req))
        .unwrap_err();
    assert!(err.is_invalid_argument());
}

#[test]
fn await_completion_single_subject() {
    let service = service();
    run_with_timeout(move || {
        service.await_completion(finish_after(1), &[subject("task")]).unwrap();
        assert_eq!(service.pending_count(), 0);
    });
}

#[test]
fn await_completion_multiple_subjects() {
    let service = service();
    run_with_timeout(move || {
        service
            .await_completion(finish_after(1), &[subject("a"), subject("b")])
            .unwrap();
        assert_eq!(service.pending_count(), 0);
    });
}

#[test]
fn monitor_counts_one_completion() {
    let service = service();
    let object = subject("vm-1");
    let handler = tally_handler(&[object.clone()]);

    {
        let handler = Arc::clone(&handler);
        run_with_timeout(move || {
            service.register(&handler);
            service.monitor(finish_after(1), &[object]).unwrap();
            handler.wait();
            service.unregister(&handler);
        });
    }

    assert_eq!(handler.hook().completes(), 1);
    assert_eq!(handler.hook().failures(), 0);
    assert_eq!(handler.hook().timeouts(), 0);
}

#[test]
fn monitor_counts_completions_for_every_subject() {
    let service = service();
    let objects = [subject("vm-1"), subject("vm-2")];
    let handler = tally_handler(&objects);

    {
        let handler = Arc::clone(&handler);
        run_with_timeout(move || {
            service.register(&handler);
            service.monitor(finish_after(1), &objects).unwrap();
            handler.wait();
            service.unregister(&handler);
        });
    }

    assert_eq!(handler.hook().completes(), 2);
    assert_eq!(handler.hook().failures(), 0);
    assert_eq!(handler.hook().timeouts(), 0);
}

#[test]
fn monitor_reaches_timeout() {
    let service = service();
    let object = subject("stuck");
    let handler = tally_handler(&[object.clone()]);

    {
        let handler = Arc::clone(&handler);
        run_with_timeout(move || {
            service.register(&handler);
            service
                .monitor_with_timeout(
                    TEST_POLLING + Duration::from_millis(10),
                    Always(MonitorStatus::Continue),
                    &[object],
                )
                .unwrap();
            handler.wait();
            service.unregister(&handler);
        });
    }

    assert_eq!(handler.hook().completes(), 0);
    assert_eq!(handler.hook().failures(), 0);
    assert_eq!(handler.hook().timeouts(), 1);
}

#[test]
fn monitor_multiple_subjects_reach_timeout() {
    let service = service();
    let objects = [subject("stuck-1"), subject("stuck-2")];
    let handler = tally_handler(&objects);

    {
        let handler = Arc::clone(&handler);
        run_with_timeout(move || {
            service.register(&handler);
            service
                .monitor_with_timeout(
                    TEST_POLLING + Duration::from_millis(10),
                    Always(MonitorStatus::Continue),
                    &objects,
                )
                .unwrap();
            handler.wait();
            service.unregister(&handler);
        });
    }

    assert_eq!(handler.hook().completes(), 0);
    assert_eq!(handler.hook().failures(), 0);
    assert_eq!(handler.hook().timeouts(), 2);
}

#[test]
fn await_completion_with_timeout_releases_stuck_subjects() {
    let service = service();
    run_with_timeout(move || {
        service
            .await_completion_with_timeout(
                Duration::from_millis(150),
                Always(MonitorStatus::Continue),
                &[subject("never")],
            )
            .unwrap();
    });
}

#[test]
fn continue_then_done_completes_on_second_evaluation() {
    let service = service();
    let object = subject("slow");
    let handler = tally_handler(&[object.clone()]);
    let calls = Arc::new(AtomicUsize::new(0));
    let predicate = {
        let calls = Arc::clone(&calls);
        move |_: &String| {
            if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                MonitorStatus::Continue
            } else {
                MonitorStatus::Done
            }
        }
    };

    let started = Instant::now();
    {
        let handler = Arc::clone(&handler);
        run_with_timeout(move || {
            service.register(&handler);
            service.monitor(predicate, &[object]).unwrap();
            handler.wait();
            service.unregister(&handler);
        });
    }

    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(handler.hook().completes(), 1);
    // Two ticks are needed; allow for the service having started just before `started`.
    assert!(started.elapsed() >= TEST_POLLING + TEST_POLLING / 2);
}

#[test]
fn mixed_outcomes_are_tallied_before_release() {
    let service = service();
    let good = subject("good");
    let bad = subject("bad");
    let objects = [good.clone(), bad.clone()];
    let handler = tally_handler(&objects);

    let good_name = good.value().clone();
    let predicate = move |s: &String| {
        if *s == good_name {
            MonitorStatus::Done
        } else {
            MonitorStatus::Failed
        }
    };

    {
        let handler = Arc::clone(&handler);
        run_with_timeout(move || {
            service.register(&handler);
            service.monitor(predicate, &objects).unwrap();
            handler.wait();
            service.unregister(&handler);
        });
    }

    assert!(handler.is_released());
    assert_eq!(handler.hook().completes(), 1);
    assert_eq!(handler.hook().failures(), 1);
    assert_eq!(handler.hook().timeouts(), 0);
}

#[test]
fn predicate_errors_fail_only_their_subject() {
    let service = service();
    let flaky = subject("flaky");
    let healthy = subject("healthy");
    let objects = [flaky.clone(), healthy.clone()];
    let handler = tally_handler(&objects);

    let flaky_name = flaky.value().clone();
    let calls = Arc::new(AtomicUsize::new(0));
    let predicate = {
        let calls = Arc::clone(&calls);
        fallible(move |s: &String| {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if *s == flaky_name {
                Err(PredicateError::new("HTTP 500 from provider"))
            } else if n < 3 {
                Ok(MonitorStatus::Continue)
            } else {
                Ok(MonitorStatus::Done)
            }
        })
    };

    {
        let handler = Arc::clone(&handler);
        run_with_timeout(move || {
            service.register(&handler);
            service.monitor(predicate, &objects).unwrap();
            handler.wait();
            service.unregister(&handler);
        });
    }

    assert_eq!(handler.hook().failures(), 1);
    assert_eq!(handler.hook().completes(), 1);
}

#[test]
fn panicking_predicate_does_not_stop_the_scheduler() {
    let service = service();
    let first = subject("first");
    let handler = tally_handler(&[first.clone()]);
    service.register(&handler);
    service
        .monitor(|_: &String| -> MonitorStatus { panic!("predicate bug") }, &[first])
        .unwrap();
    handler.wait_timeout(TEST_TIMEOUT).unwrap();
    assert_eq!(handler.hook().failures(), 1);
    service.unregister(&handler);

    let svc = Arc::clone(&service);
    run_with_timeout(move || {
        svc.await_completion(Always(MonitorStatus::Done), &[subject("second")]).unwrap();
    });
}

#[test]
fn exactly_one_event_per_subject() {
    let service = service();
    let seen = Arc::new(AtomicUsize::new(0));
    let listener = {
        let seen = Arc::clone(&seen);
        Arc::new(move |_: &MonitorEvent<String>| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
    };
    service.register(&listener);

    let objects = [subject("x"), subject("y"), subject("z")];
    let svc = Arc::clone(&service);
    run_with_timeout(move || {
        svc.await_completion(Always(MonitorStatus::Done), &objects).unwrap();
    });

    assert!(eventually(|| seen.load(Ordering::SeqCst) == 3));
    // A few more ticks must not re-emit anything.
    thread::sleep(TEST_POLLING * 3);
    assert_eq!(seen.load(Ordering::SeqCst), 3);
    assert_eq!(service.pending_count(), 0);
}

#[test]
fn registering_twice_delivers_once() {
    let service = service();
    let seen = Arc::new(AtomicUsize::new(0));
    let listener = {
        let seen = Arc::clone(&seen);
        Arc::new(move |_: &MonitorEvent<String>| {
            seen.fetch_add(1, Ordering::SeqCst);
        })
    };
    assert!(service.register(&listener));
    assert!(!service.register(&listener));

    let svc = Arc::clone(&service);
    run_with_timeout(move || {
        svc.await_completion(Always(MonitorStatus::Done), &[subject("once")]).unwrap();
    });
    assert!(eventually(|| seen.load(Ordering::SeqCst) >= 1));
    thread::sleep(TEST_POLLING);
    assert_eq!(seen.load(Ordering::SeqCst), 1);

    assert!(service.unregister(&listener));
    assert!(!service.unregister(&listener));
}

#[test]
fn caller_side_wait_timeout_after_shutdown() {
    let service = service();
    let object = subject("abandoned");
    let handler = Arc::new(BlockingHandler::new(&[object.clone()]).unwrap());
    service.register(&handler);
    service.monitor(Always(MonitorStatus::Continue), &[object]).unwrap();

    service.shutdown();
    let err = handler.wait_timeout(TEST_POLLING * 3).unwrap_err();
    assert!(err.is_timeout());
    assert!(!handler.is_released());
}

struct FaultyHook;

impl ReleaseHook<String> for FaultyHook {
    fn before_release(&self, _event: &MonitorEvent<String>) {
        panic!("release hook bug");
    }
}

#[test]
fn panicking_release_hook_does_not_strand_waiter() {
    let service = service();
    let object = subject("hooked");
    let handler = Arc::new(BlockingHandler::with_hook(&[object.clone()], FaultyHook).unwrap());
    service.register(&handler);
    service.monitor(Always(MonitorStatus::Done), &[object]).unwrap();

    handler.wait_timeout(TEST_TIMEOUT).unwrap();
    assert!(handler.is_released());
    service.unregister(&handler);
}

#[test]
fn maximal_timeout_behaves_as_no_deadline() {
    let service = service();
    let object = subject("forever");
    let handler = tally_handler(&[object.clone()]);
    {
        let handler = Arc::clone(&handler);
        run_with_timeout(move || {
            service.register(&handler);
            service
                .monitor_with_timeout(Duration::MAX, finish_after(2), &[object])
                .unwrap();
            handler.wait();
            service.unregister(&handler);
        });
    }
    assert_eq!(handler.hook().completes(), 1);
    assert_eq!(handler.hook().timeouts(), 0);
}
