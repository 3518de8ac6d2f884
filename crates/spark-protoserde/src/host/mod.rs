//! # host 模块说明
//!
//! ## 角色定位（Why）
//! - 面向宿主框架（消息中间件插件、网关等）的薄门面：一次 `configure`，之后按通道取序列化器。
//!
//! ## 生命周期（What）
//! 1. [`ProtoSerde::configure`]：解析配置并冷加载描述符集与路由表，任何失败都会终止启动；
//! 2. [`ProtoSerde::serializer`] / [`ProtoSerde::deserializer`]：按通道创建编解码器，可任意克隆与并发使用；
//! 3. [`ProtoSerde::start_background_refresh`]：按间隔刷新，失败只记录日志并继续服务旧快照；
//! 4. [`ProtoSerde::shutdown`]：停止后台刷新，最多等待配置的超时。

mod channel;
mod runtime;

use std::sync::Arc;

use tracing::info;

pub use channel::{ChannelDeserializer, ChannelSerializer, Deserialized, METADATA_FILE, METADATA_MESSAGE_TYPE};

use crate::bundle::SchemaBundle;
use crate::configuration::{PropertyResolver, RemoteStoreSettings, SerdeSettings};
use crate::error::{Result, RouteNotFoundError};
use crate::routing::{RouteDiff, RouteTable, Target};
use crate::scheduler::{RefreshScheduler, SchedulerStats};
use crate::source::ObjectStore;
use runtime::{RuntimeRefresh, SerdeRuntime};

/// 动态 protobuf ⇄ JSON 编解码宿主。
pub struct ProtoSerde {
    runtime: Arc<SerdeRuntime>,
    scheduler: RefreshScheduler,
}

impl ProtoSerde {
    /// 读取配置并完成冷加载。远端存储按 `s3.*` 键构建带签名的 S3 客户端。
    pub async fn configure(resolver: &dyn PropertyResolver) -> Result<Self> {
        let settings = SerdeSettings::from_resolver(resolver)?;
        let store = match &settings.store {
            Some(store) => Some(remote_store(store)?),
            None => None,
        };
        Self::start(settings, store).await
    }

    /// 与 [`ProtoSerde::configure`] 相同，但远端对象由调用方提供的存储实现读取。
    pub async fn configure_with_store(
        resolver: &dyn PropertyResolver,
        store: Arc<dyn ObjectStore>,
    ) -> Result<Self> {
        let settings = SerdeSettings::from_resolver(resolver)?;
        Self::start(settings, Some(store)).await
    }

    async fn start(settings: SerdeSettings, store: Option<Arc<dyn ObjectStore>>) -> Result<Self> {
        let interval = settings.background_refresh;
        let grace = settings.shutdown_timeout;
        let runtime = Arc::new(SerdeRuntime::initialize(settings, store).await?);
        let scheduler = RefreshScheduler::new(
            Arc::new(RuntimeRefresh(Arc::clone(&runtime))),
            interval,
            "protoserde-refresh",
        )?
        .with_shutdown_timeout(grace);
        Ok(Self { runtime, scheduler })
    }

    pub fn settings(&self) -> &SerdeSettings {
        &self.runtime.settings
    }

    /// 创建通道序列化器；key 侧直接拒绝，value 侧的路由在每次调用时解析。
    pub fn serializer(&self, channel: &str, target: Target) -> Result<ChannelSerializer, RouteNotFoundError> {
        reject_key_target(channel, target)?;
        Ok(ChannelSerializer::new(Arc::clone(&self.runtime), channel.to_owned()))
    }

    pub fn deserializer(&self, channel: &str, target: Target) -> Result<ChannelDeserializer, RouteNotFoundError> {
        reject_key_target(channel, target)?;
        Ok(ChannelDeserializer::new(Arc::clone(&self.runtime), channel.to_owned()))
    }

    /// 通道当前能否映射到某个类型（含默认类型）。
    pub fn can_route(&self, channel: &str) -> bool {
        self.runtime.router.route(channel, Target::Value).is_ok()
    }

    /// 立即执行一轮刷新。
    ///
    /// 返回 `None` 表示生效的输入没有变化。来源拉取或解析失败不会报错：该来源继续
    /// 提供上一份成功快照，因此失败同样表现为 `None`；若另一来源确有变化，则返回
    /// 只包含那部分变化的 `Some(diff)`，其中差异也可能为空。
    pub async fn refresh(&self) -> Result<Option<RouteDiff>> {
        self.runtime.refresh().await
    }

    /// 让下一次刷新无视间隔、重新查询远端。
    pub fn invalidate_caches(&self) {
        self.runtime.invalidate();
    }

    pub async fn start_background_refresh(&self) {
        self.scheduler.start().await;
    }

    pub async fn shutdown(&self) {
        self.scheduler.stop().await;
        info!("protobuf serde shut down");
    }

    pub fn route_table(&self) -> Arc<RouteTable> {
        self.runtime.router.snapshot()
    }

    pub fn bundle(&self) -> Arc<SchemaBundle> {
        self.runtime.bundle()
    }

    pub fn is_refreshing(&self) -> bool {
        self.scheduler.is_running()
    }

    pub fn scheduler_stats(&self) -> SchedulerStats {
        self.scheduler.stats()
    }
}

fn reject_key_target(channel: &str, target: Target) -> Result<(), RouteNotFoundError> {
    match target {
        Target::Value => Ok(()),
        Target::Key => Err(RouteNotFoundError::UnsupportedTarget {
            channel: channel.to_owned(),
            target: target.to_string(),
        }),
    }
}

#[cfg(feature = "s3-store")]
fn remote_store(settings: &RemoteStoreSettings) -> Result<Arc<dyn ObjectStore>> {
    Ok(Arc::new(crate::source::S3ObjectStore::new(settings.clone())))
}

#[cfg(not(feature = "s3-store"))]
fn remote_store(_settings: &RemoteStoreSettings) -> Result<Arc<dyn ObjectStore>> {
    Err(crate::error::ConfigurationError::invalid(
        crate::configuration::keys::STORE_ENDPOINT,
        "built without the `s3-store` feature, use `ProtoSerde::configure_with_store`",
    )
    .into())
}
