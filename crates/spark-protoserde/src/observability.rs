//! 为没有自带 `tracing` 订阅者的宿主提供一键安装。
//!
//! # 教案式说明
//! - **意图（Why）**：库内部只通过 `tracing` 宏输出结构化日志；独立运行的宿主（命令行工具、测试夹具）
//!   需要一个最小订阅者才能看到缓存降级、路由变化等事件。
//! - **逻辑（How）**：`EnvFilter`（优先读取 `RUST_LOG`，否则使用调用方给出的指令）叠加 `fmt` 层，
//!   设为全局默认订阅者。
//! - **契约（What）**：进程内只能成功一次；重复调用返回 [`InstallError::AlreadyInstalled`]，
//!   外部已设置订阅者时返回 [`InstallError::SubscriberAlreadySet`]。

use std::sync::OnceLock;

use thiserror::Error;
use tracing::dispatcher;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;

static INSTALLED: OnceLock<()> = OnceLock::new();

#[derive(Debug, Error)]
pub enum InstallError {
    #[error("fmt subscriber is already installed")]
    AlreadyInstalled,
    #[error("a global tracing subscriber was set elsewhere")]
    SubscriberAlreadySet,
    #[error("invalid filter directive: {0}")]
    Filter(String),
    #[error("failed to set global subscriber: {0}")]
    SetGlobal(#[from] dispatcher::SetGlobalDefaultError),
}

/// 安装 `fmt + EnvFilter` 订阅者；`default_directive` 形如 `info` 或 `spark_protoserde=debug`。
pub fn install_fmt_subscriber(default_directive: &str) -> Result<(), InstallError> {
    if INSTALLED.get().is_some() {
        return Err(InstallError::AlreadyInstalled);
    }
    if dispatcher::has_been_set() {
        return Err(InstallError::SubscriberAlreadySet);
    }

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_directive).map_err(|err| InstallError::Filter(err.to_string()))?,
    };
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer());
    tracing::subscriber::set_global_default(subscriber)?;

    INSTALLED.set(()).map_err(|_| InstallError::AlreadyInstalled)
}
