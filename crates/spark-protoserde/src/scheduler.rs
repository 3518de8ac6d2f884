//! # scheduler 模块说明
//!
//! ## 角色定位（Why）
//! - 后台周期性驱动刷新逻辑（描述符集 + 路由表），使消息路径永远不必等待网络。
//!
//! ## 契约（What）
//! - 首次触发发生在启动后整整一个间隔，而非立即；
//! - `start` 在已运行时先停止上一轮；`stop` 幂等、无需先 `start`；
//! - 每一轮的错误或 panic 都被捕获并记录，不影响后续轮次；
//! - `stop` 最多等待 `shutdown_timeout`（默认 5 秒）让在途任务收尾，超时即强制取消。
//!
//! ## 实现（How）
//! - 运行在 tokio 后台任务上，停止信号经 `watch` 通道传递；任务不会阻止运行时关闭；
//! - 后台任务挂在启动方当前 span 之下的 `background_refresh` span 中，日志可追溯到启动者；
//! - 运行状态由 `parking_lot::Mutex` 保护，锁从不跨越 `.await`。

use std::error::Error as StdError;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, interval_at};
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::error::ConfigurationError;

/// 刷新任务可返回的任意错误。
pub type JobError = Box<dyn StdError + Send + Sync>;

/// 停止时默认的等待上限。
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// 一轮后台刷新。
#[async_trait]
pub trait RefreshJob: Send + Sync + 'static {
    async fn run(&self) -> Result<(), JobError>;
}

/// 闭包适配器：`JobFn(|| async { ... })`。
pub struct JobFn<F>(pub F);

#[async_trait]
impl<F, Fut> RefreshJob for JobFn<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
    async fn run(&self) -> Result<(), JobError> {
        (self.0)().await
    }
}

/// 累计运行统计。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SchedulerStats {
    pub runs: u64,
    pub failures: u64,
}

#[derive(Default)]
struct Counters {
    runs: AtomicU64,
    failures: AtomicU64,
}

struct RunningTask {
    stop: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// 绑定单个刷新任务的周期调度器。
pub struct RefreshScheduler {
    job: Arc<dyn RefreshJob>,
    interval: Duration,
    label: String,
    shutdown_timeout: Duration,
    running: Mutex<Option<RunningTask>>,
    counters: Arc<Counters>,
}

impl RefreshScheduler {
    /// 校验前置条件：间隔严格为正，标签非空白。
    pub fn new(
        job: Arc<dyn RefreshJob>,
        interval: Duration,
        label: impl Into<String>,
    ) -> Result<Self, ConfigurationError> {
        let label = label.into();
        if interval.is_zero() {
            return Err(ConfigurationError::invalid(
                "interval",
                "refresh interval must be strictly positive",
            ));
        }
        if label.trim().is_empty() {
            return Err(ConfigurationError::invalid(
                "label",
                "scheduler label must not be blank",
            ));
        }
        Ok(Self {
            job,
            interval,
            label,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            running: Mutex::new(None),
            counters: Arc::new(Counters::default()),
        })
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// 开始周期触发；若已在运行，先停止上一轮。
    pub async fn start(&self) {
        self.stop().await;

        let (stop, stopped) = watch::channel(false);
        let handle = tokio::spawn(
            drive(
                Arc::clone(&self.job),
                self.interval,
                self.label.clone(),
                Arc::clone(&self.counters),
                stopped,
            )
            .instrument(info_span!("background_refresh", label = %self.label)),
        );
        info!(label = %self.label, interval = ?self.interval, "background refresh started");
        let replaced = self.running.lock().replace(RunningTask { stop, handle });
        // 两个 start 并发时，后写入者胜出，被替换的任务直接取消
        if let Some(task) = replaced {
            task.handle.abort();
        }
    }

    /// 停止后续触发并等待在途任务，超时则强制取消。重复调用无副作用。
    pub async fn stop(&self) {
        let Some(task) = self.running.lock().take() else {
            return;
        };
        // 接收端可能已随任务结束而释放
        let _ = task.stop.send(true);
        let mut handle = task.handle;
        match tokio::time::timeout(self.shutdown_timeout, &mut handle).await {
            Ok(_) => info!(label = %self.label, "background refresh stopped"),
            Err(_) => {
                warn!(
                    label = %self.label,
                    timeout = ?self.shutdown_timeout,
                    "background refresh did not finish in time, aborting"
                );
                handle.abort();
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            runs: self.counters.runs.load(Ordering::Relaxed),
            failures: self.counters.failures.load(Ordering::Relaxed),
        }
    }
}

impl Drop for RefreshScheduler {
    fn drop(&mut self) {
        if let Some(task) = self.running.get_mut().take() {
            task.handle.abort();
        }
    }
}

async fn drive(
    job: Arc<dyn RefreshJob>,
    period: Duration,
    label: String,
    counters: Arc<Counters>,
    mut stopped: watch::Receiver<bool>,
) {
    let mut ticker = interval_at(Instant::now() + period, period);
    loop {
        tokio::select! {
            biased;
            _ = stopped.changed() => break,
            _ = ticker.tick() => run_once(job.as_ref(), &label, &counters).await,
        }
    }
}

async fn run_once(job: &dyn RefreshJob, label: &str, counters: &Counters) {
    debug!(label, "background refresh cycle starting");
    let outcome = AssertUnwindSafe(job.run()).catch_unwind().await;
    counters.runs.fetch_add(1, Ordering::Relaxed);
    match outcome {
        Ok(Ok(())) => debug!(label, "background refresh cycle finished"),
        Ok(Err(err)) => {
            counters.failures.fetch_add(1, Ordering::Relaxed);
            error!(label, error = %err, "background refresh failed");
        }
        Err(panic) => {
            counters.failures.fetch_add(1, Ordering::Relaxed);
            let message = panic
                .downcast_ref::<&str>()
                .map(|text| (*text).to_owned())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_owned());
            error!(label, panic = %message, "background refresh panicked");
        }
    }
}
