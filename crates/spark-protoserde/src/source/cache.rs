//! 自适应远端缓存。
//!
//! # 教案式说明
//! - **意图 (Why)**：描述符集与路由表都存放在远端对象存储中，可能随时变化；每条消息都去拉取显然不可行，
//!   完全不刷新又无法热更新。本缓存在两者之间取折中：刷新间隔内零网络开销，到期后先用廉价的元数据
//!   查询判断是否真的变了，只有变了才下载。
//! - **契约 (What)**：
//!   - `load` 幂等且可被任意多个调用方并发调用；
//!   - 读者永远看到完整的快照（`ArcSwapOption` 整体替换）；
//!   - 刷新失败时保留并返回上一个可用快照；从未成功过时返回 [`RemoteFetchError`]；
//!   - `invalidate` 只清空令牌与时间戳，下一次 `load` 必定重新查询远端。
//! - **执行逻辑 (How)**：
//!   1. 快路径无锁：快照存在且未过期即返回；
//!   2. 慢路径获取异步互斥闸门后**再次检查**，避免争用下的重复拉取；
//!   3. `stat` 比较令牌，未变则只刷新时间戳，变了才 `get` 并解析后发布；
//!   4. 任何一步失败都降级到旧快照。
//! - **设计权衡 (Trade-offs)**：失败不推进时间戳，故障期间每次 `load` 都会进入慢路径重试一次 `stat`；
//!   闸门保证同一时刻只有一个请求在途。

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::store::{ObjectLocation, ObjectStore};
use crate::bundle::{self, SchemaBundle};
use crate::error::{FetchCause, RemoteFetchError};

/// 将下载到的字节解析为缓存值。
pub trait PayloadParser: Send + Sync + 'static {
    type Output: Send + Sync + 'static;

    fn parse(&self, payload: &[u8]) -> Result<Self::Output, FetchCause>;
}

/// 描述符集 → 已链接的 [`SchemaBundle`]。
#[derive(Clone, Copy, Debug, Default)]
pub struct BundleParser;

impl PayloadParser for BundleParser {
    type Output = SchemaBundle;

    fn parse(&self, payload: &[u8]) -> Result<SchemaBundle, FetchCause> {
        Ok(bundle::load(payload)?)
    }
}

/// 扁平 JSON 对象 → 通道到类型名的映射。
#[derive(Clone, Copy, Debug, Default)]
pub struct RouteMapParser;

impl PayloadParser for RouteMapParser {
    type Output = BTreeMap<String, String>;

    fn parse(&self, payload: &[u8]) -> Result<Self::Output, FetchCause> {
        serde_json::from_slice(payload).map_err(|err| FetchCause::Payload(err.to_string()))
    }
}

/// 一次成功拉取的结果。
pub struct CacheEntry<T> {
    pub value: Arc<T>,
    /// `None` 表示已被 `invalidate`。
    pub change_token: Option<String>,
    /// 最近一次确认“远端与本地一致”的时刻；`None` 表示必须重新确认。
    pub refreshed_at: Option<Instant>,
    pub fetched_at: DateTime<Utc>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl<T> Clone for CacheEntry<T> {
    fn clone(&self) -> Self {
        Self {
            value: Arc::clone(&self.value),
            change_token: self.change_token.clone(),
            refreshed_at: self.refreshed_at,
            fetched_at: self.fetched_at,
            last_modified: self.last_modified,
        }
    }
}

impl<T> fmt::Debug for CacheEntry<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheEntry")
            .field("change_token", &self.change_token)
            .field("refreshed_at", &self.refreshed_at)
            .field("fetched_at", &self.fetched_at)
            .field("last_modified", &self.last_modified)
            .finish_non_exhaustive()
    }
}

pub struct AdaptiveCache<P: PayloadParser> {
    store: Arc<dyn ObjectStore>,
    location: ObjectLocation,
    refresh_interval: Duration,
    parser: P,
    entry: ArcSwapOption<CacheEntry<P::Output>>,
    gate: Mutex<()>,
}

/// 描述符集来源。
pub type BundleSource = AdaptiveCache<BundleParser>;
/// 远端路由表来源。
pub type RouteMapSource = AdaptiveCache<RouteMapParser>;

impl<P: PayloadParser> AdaptiveCache<P> {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        location: ObjectLocation,
        refresh_interval: Duration,
        parser: P,
    ) -> Self {
        Self {
            store,
            location,
            refresh_interval,
            parser,
            entry: ArcSwapOption::empty(),
            gate: Mutex::new(()),
        }
    }

    pub fn location(&self) -> &ObjectLocation {
        &self.location
    }

    pub fn refresh_interval(&self) -> Duration {
        self.refresh_interval
    }

    /// 人类可读的来源描述，如 `s3://bucket/key`。
    pub fn describe(&self) -> String {
        self.location.to_string()
    }

    /// 当前快照（诊断用途）。
    pub fn snapshot(&self) -> Option<Arc<CacheEntry<P::Output>>> {
        self.entry.load_full()
    }

    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        self.entry.load().as_ref().and_then(|entry| entry.last_modified)
    }

    pub async fn load(&self) -> Result<Arc<P::Output>, RemoteFetchError> {
        if let Some(value) = self.fresh() {
            return Ok(value);
        }

        let _gate = self.gate.lock().await;
        if let Some(value) = self.fresh() {
            debug!(location = %self.location, "refreshed concurrently, reusing snapshot");
            return Ok(value);
        }

        let previous = self.entry.load_full();
        match self.refresh(previous.as_deref()).await {
            Ok(value) => Ok(value),
            Err(cause) => match previous {
                Some(entry) => {
                    warn!(
                        location = %self.location,
                        error = %cause,
                        "refresh failed, serving last good snapshot"
                    );
                    Ok(Arc::clone(&entry.value))
                }
                None => Err(RemoteFetchError {
                    location: self.describe(),
                    cause,
                }),
            },
        }
    }

    /// 强制下一次 `load` 重新查询远端；快照本身保留，继续作为降级兜底。
    pub fn invalidate(&self) {
        self.entry.rcu(|current| {
            current.as_ref().map(|entry| {
                let mut cleared = CacheEntry::clone(entry);
                cleared.change_token = None;
                cleared.refreshed_at = None;
                Arc::new(cleared)
            })
        });
        debug!(location = %self.location, "cache invalidated");
    }

    fn fresh(&self) -> Option<Arc<P::Output>> {
        let guard = self.entry.load();
        let entry = guard.as_ref()?;
        let refreshed_at = entry.refreshed_at?;
        (refreshed_at.elapsed() < self.refresh_interval).then(|| Arc::clone(&entry.value))
    }

    /// 慢路径主体，只在持有闸门时调用。
    async fn refresh(
        &self,
        previous: Option<&CacheEntry<P::Output>>,
    ) -> Result<Arc<P::Output>, FetchCause> {
        let stat = self.store.stat_object(&self.location).await?;

        if let Some(previous) = previous {
            if previous.change_token.as_deref() == Some(stat.change_token.as_str()) {
                let mut touched = previous.clone();
                touched.refreshed_at = Some(Instant::now());
                self.entry.store(Some(Arc::new(touched)));
                debug!(location = %self.location, token = %stat.change_token, "remote object unchanged");
                return Ok(Arc::clone(&previous.value));
            }
        }

        let payload = self.store.get_object(&self.location).await?;
        let value = Arc::new(self.parser.parse(&payload)?);
        self.entry.store(Some(Arc::new(CacheEntry {
            value: Arc::clone(&value),
            change_token: Some(stat.change_token.clone()),
            refreshed_at: Some(Instant::now()),
            fetched_at: Utc::now(),
            last_modified: stat.last_modified,
        })));
        info!(
            location = %self.location,
            token = %stat.change_token,
            bytes = payload.len(),
            "published new snapshot"
        );
        Ok(value)
    }
}
