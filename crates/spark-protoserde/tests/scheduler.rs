//! 刷新调度器的时序、隔离与停止语义。

use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use spark_protoserde::scheduler::{JobError, JobFn, RefreshJob, RefreshScheduler};
use tokio::time::{Instant, sleep};
use tracing_test::traced_test;

const INTERVAL: Duration = Duration::from_secs(10);

fn counting_job(counter: Arc<AtomicUsize>) -> Arc<dyn RefreshJob> {
    Arc::new(JobFn(move || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), JobError>(())
        }
    }))
}

#[tokio::test(start_paused = true)]
async fn first_run_happens_after_one_full_interval() {
    let counter = Arc::new(AtomicUsize::new(0));
    let scheduler = RefreshScheduler::new(counting_job(Arc::clone(&counter)), INTERVAL, "descriptor")
        .expect("参数合法");
    scheduler.start().await;
    assert!(scheduler.is_running());

    sleep(INTERVAL - Duration::from_millis(10)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 0, "启动时不应立即触发");

    sleep(Duration::from_millis(20)).await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    sleep(INTERVAL * 2).await;
    assert!(counter.load(Ordering::SeqCst) >= 3);

    scheduler.stop().await;
    assert!(!scheduler.is_running());
    let settled = counter.load(Ordering::SeqCst);
    sleep(INTERVAL * 3).await;
    assert_eq!(counter.load(Ordering::SeqCst), settled, "停止后不再触发");
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn failing_and_panicking_cycles_do_not_halt_the_schedule() {
    let cycle = Arc::new(AtomicUsize::new(0));
    let job = {
        let cycle = Arc::clone(&cycle);
        Arc::new(JobFn(move || {
            let attempt = cycle.fetch_add(1, Ordering::SeqCst);
            async move {
                match attempt {
                    0 => Err::<(), JobError>(Box::new(io::Error::other("bucket unreachable"))),
                    1 => panic!("descriptor parser exploded"),
                    _ => Ok(()),
                }
            }
        }))
    };
    let scheduler = RefreshScheduler::new(job, INTERVAL, "routes").expect("参数合法");
    scheduler.start().await;

    sleep(INTERVAL * 3 + Duration::from_millis(10)).await;
    let stats = scheduler.stats();
    assert_eq!(stats.runs, 3);
    assert_eq!(stats.failures, 2);
    assert!(scheduler.is_running());
    assert!(logs_contain("background refresh failed"));
    assert!(logs_contain("bucket unreachable"));
    assert!(logs_contain("background refresh panicked"));

    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn restarting_replaces_the_previous_run() {
    let counter = Arc::new(AtomicUsize::new(0));
    let scheduler = RefreshScheduler::new(counting_job(Arc::clone(&counter)), INTERVAL, "descriptor")
        .expect("参数合法");
    scheduler.start().await;
    sleep(INTERVAL / 2).await;
    scheduler.start().await;

    // 旧循环本会在 1.0 个间隔处触发，新循环在 1.5 个间隔处触发
    sleep(INTERVAL * 3 / 4).await;
    assert_eq!(counter.load(Ordering::SeqCst), 0);
    sleep(INTERVAL / 2).await;
    assert_eq!(counter.load(Ordering::SeqCst), 1);

    scheduler.stop().await;
    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stop_waits_for_in_flight_work() {
    let finished = Arc::new(AtomicUsize::new(0));
    let job = {
        let finished = Arc::clone(&finished);
        Arc::new(JobFn(move || {
            let finished = Arc::clone(&finished);
            async move {
                sleep(Duration::from_millis(500)).await;
                finished.fetch_add(1, Ordering::SeqCst);
                Ok::<(), JobError>(())
            }
        }))
    };
    let scheduler = RefreshScheduler::new(job, INTERVAL, "descriptor").expect("参数合法");
    scheduler.start().await;
    sleep(INTERVAL + Duration::from_millis(100)).await;

    scheduler.stop().await;
    assert_eq!(finished.load(Ordering::SeqCst), 1, "在途任务应被等待完成");
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn hung_job_is_abandoned_after_the_shutdown_timeout() {
    let job: Arc<dyn RefreshJob> = Arc::new(JobFn(|| async {
        sleep(Duration::from_secs(3600)).await;
        Ok::<(), JobError>(())
    }));
    let scheduler = RefreshScheduler::new(job, INTERVAL, "descriptor")
        .expect("参数合法")
        .with_shutdown_timeout(Duration::from_secs(1));
    scheduler.start().await;
    sleep(INTERVAL + Duration::from_millis(1)).await;

    let began = Instant::now();
    scheduler.stop().await;
    let waited = began.elapsed();
    assert!(waited >= Duration::from_secs(1));
    assert!(waited < Duration::from_secs(60));
    assert!(!scheduler.is_running());
    assert!(logs_contain("did not finish in time"));
}
